//! Recorded gesture scripts for headless runs.
//!
//! A script is a JSON array of events with millisecond offsets from the start
//! of the replay:
//!
//! ```json
//! [
//!   { "kind": "start", "at_ms": 0, "touches": [[180, 180]] },
//!   { "kind": "end", "at_ms": 40, "release": [180, 180], "remaining": 0 }
//! ]
//! ```

use glbview::gesture::TouchPoint;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    #[error("failed to read gesture script: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse gesture script: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptEvent {
    Layout {
        at_ms: u64,
        width: f32,
        height: f32,
    },
    Start {
        at_ms: u64,
        touches: Vec<[f32; 2]>,
    },
    Move {
        at_ms: u64,
        touches: Vec<[f32; 2]>,
    },
    End {
        at_ms: u64,
        release: [f32; 2],
        #[serde(default)]
        remaining: usize,
    },
    Terminate {
        at_ms: u64,
    },
}

impl ScriptEvent {
    pub fn at_ms(&self) -> u64 {
        match self {
            ScriptEvent::Layout { at_ms, .. }
            | ScriptEvent::Start { at_ms, .. }
            | ScriptEvent::Move { at_ms, .. }
            | ScriptEvent::End { at_ms, .. }
            | ScriptEvent::Terminate { at_ms } => *at_ms,
        }
    }
}

pub fn points(touches: &[[f32; 2]]) -> Vec<TouchPoint> {
    touches.iter().map(|[x, y]| TouchPoint::new(*x, *y)).collect()
}

/// Events ordered by time; ties keep file order.
pub fn parse_script(json: &str) -> Result<Vec<ScriptEvent>, ScriptError> {
    let mut events: Vec<ScriptEvent> = serde_json::from_str(json)?;
    events.sort_by_key(ScriptEvent::at_ms);
    Ok(events)
}

pub fn load_script(path: &Path) -> Result<Vec<ScriptEvent>, ScriptError> {
    let json = std::fs::read_to_string(path)?;
    parse_script(&json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_orders_events() {
        let events = parse_script(
            r#"[
                { "kind": "end", "at_ms": 40, "release": [1, 2] },
                { "kind": "start", "at_ms": 0, "touches": [[1, 2]] },
                { "kind": "terminate", "at_ms": 40 }
            ]"#,
        )
        .unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ScriptEvent::Start { .. }));
        assert_eq!(
            events[1],
            ScriptEvent::End {
                at_ms: 40,
                release: [1.0, 2.0],
                remaining: 0
            }
        );
        assert!(matches!(events[2], ScriptEvent::Terminate { at_ms: 40 }));
    }

    #[test]
    fn unknown_kind_is_an_error() {
        assert!(matches!(
            parse_script(r#"[{ "kind": "wiggle", "at_ms": 0 }]"#),
            Err(ScriptError::Json(_))
        ));
    }
}
