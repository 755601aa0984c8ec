use glbview::gesture::TouchPoint;
use std::collections::BTreeMap;
use winit::event::TouchPhase;

/// A gesture callback for the viewer, derived from raw window input.
#[derive(Debug, Clone, PartialEq)]
pub enum TouchEvent {
    Start(Vec<TouchPoint>),
    Move(Vec<TouchPoint>),
    End { release: TouchPoint, remaining: usize },
    Cancel,
}

// Touch ids from winit are device-assigned; the mouse gets one no device uses.
const MOUSE_ID: u64 = u64::MAX;

/// Tracks every point currently down so each event can report the full set.
/// Left-mouse dragging acts as one extra finger.
#[derive(Debug, Default)]
pub struct TouchTracker {
    active: BTreeMap<u64, TouchPoint>,
    cursor: Option<TouchPoint>,
}

impl TouchTracker {
    pub fn points(&self) -> Vec<TouchPoint> {
        self.active.values().copied().collect()
    }

    pub fn handle_touch(&mut self, phase: TouchPhase, id: u64, x: f32, y: f32) -> Option<TouchEvent> {
        let point = TouchPoint::new(x, y);
        match phase {
            TouchPhase::Started => {
                self.active.insert(id, point);
                Some(TouchEvent::Start(self.points()))
            }
            TouchPhase::Moved => {
                let slot = self.active.get_mut(&id)?;
                *slot = point;
                Some(TouchEvent::Move(self.points()))
            }
            TouchPhase::Ended => {
                self.active.remove(&id)?;
                Some(TouchEvent::End {
                    release: point,
                    remaining: self.active.len(),
                })
            }
            TouchPhase::Cancelled => {
                self.active.clear();
                Some(TouchEvent::Cancel)
            }
        }
    }

    pub fn cursor_moved(&mut self, x: f32, y: f32) -> Option<TouchEvent> {
        self.cursor = Some(TouchPoint::new(x, y));
        if self.active.contains_key(&MOUSE_ID) {
            return self.handle_touch(TouchPhase::Moved, MOUSE_ID, x, y);
        }
        None
    }

    pub fn left_button(&mut self, pressed: bool) -> Option<TouchEvent> {
        let cursor = self.cursor?;
        let phase = match (pressed, self.active.contains_key(&MOUSE_ID)) {
            (true, false) => TouchPhase::Started,
            (false, true) => TouchPhase::Ended,
            _ => return None,
        };
        self.handle_touch(phase, MOUSE_ID, cursor.x, cursor.y)
    }

    /// Window lost focus or the cursor left mid-drag.
    pub fn cancel(&mut self) -> Option<TouchEvent> {
        if self.active.is_empty() {
            return None;
        }
        self.active.clear();
        Some(TouchEvent::Cancel)
    }
}
