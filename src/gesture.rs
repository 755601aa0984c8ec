//! Touch gesture interpreter.
//!
//! One finger down arms a short hold timer. If the timer fires, or the finger
//! travels past the tap slop first, the gesture becomes a drag that rotates
//! the model. A release before either happens is a tap. Two fingers down
//! switch to pinching: the distance ratio zooms the camera and the change in
//! bearing between the fingers adds to yaw.
//!
//! The interpreter holds no clock; every call takes `now`, and the host calls
//! [`GestureInterpreter::poll`] each frame so the hold timer can fire.

use crate::config::ViewerConfig;
use std::f32::consts::PI;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub x: f32,
    pub y: f32,
}

impl TouchPoint {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &TouchPoint) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// Bearing from `self` to `other`, radians.
    pub fn bearing(&self, other: &TouchPoint) -> f32 {
        (other.y - self.y).atan2(other.x - self.x)
    }
}

/// Orientation and zoom the gestures drive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewState {
    pub yaw: f32,
    pub pitch: f32,
    pub camera_distance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GestureSettings {
    pub rotation_speed: f32,
    pub pitch_speed: f32,
    pub pitch_min: f32,
    pub pitch_max: f32,
    pub hold_delay: Duration,
    pub tap_slop_px: f32,
    pub zoom_min: f32,
    pub zoom_max: f32,
}

impl From<&ViewerConfig> for GestureSettings {
    fn from(config: &ViewerConfig) -> Self {
        Self {
            rotation_speed: config.rotation_speed,
            pitch_speed: config.pitch_speed,
            pitch_min: config.pitch_min,
            pitch_max: config.pitch_max,
            hold_delay: config.hold_delay(),
            tap_slop_px: config.tap_slop_px,
            zoom_min: config.zoom_min,
            zoom_max: config.zoom_max,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GestureOutcome {
    None,
    Rotated,
    Zoomed,
    Tap { x: f32, y: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    /// Finger down, hold timer armed.
    Pending {
        start: TouchPoint,
        started_at: Instant,
        deadline: Instant,
    },
    Dragging {
        last: TouchPoint,
    },
    Pinching {
        initial_distance: f32,
        initial_camera_distance: f32,
        last_bearing: f32,
    },
    /// A pinch lost a finger; wait for the rest to lift.
    Finished,
}

pub struct GestureInterpreter {
    settings: GestureSettings,
    phase: Phase,
}

impl GestureInterpreter {
    pub fn new(settings: GestureSettings) -> Self {
        Self {
            settings,
            phase: Phase::Idle,
        }
    }

    pub fn has_pending_timer(&self) -> bool {
        matches!(self.phase, Phase::Pending { .. })
    }

    pub fn is_drag_armed(&self) -> bool {
        matches!(self.phase, Phase::Dragging { .. })
    }

    pub fn is_pinching(&self) -> bool {
        matches!(self.phase, Phase::Pinching { .. })
    }

    /// `touches` are all points currently down, including the new one.
    pub fn touch_start(
        &mut self,
        touches: &[TouchPoint],
        view: &ViewState,
        now: Instant,
    ) -> GestureOutcome {
        match touches {
            [] => {}
            [single] => {
                self.phase = Phase::Pending {
                    start: *single,
                    started_at: now,
                    deadline: now + self.settings.hold_delay,
                };
            }
            [a, b, ..] => {
                self.phase = Phase::Pinching {
                    initial_distance: a.distance(b).max(f32::EPSILON),
                    initial_camera_distance: view.camera_distance,
                    last_bearing: a.bearing(b),
                };
            }
        }
        GestureOutcome::None
    }

    pub fn touch_move(
        &mut self,
        touches: &[TouchPoint],
        view: &mut ViewState,
        now: Instant,
    ) -> GestureOutcome {
        match (self.phase, touches) {
            (
                Phase::Pinching {
                    initial_distance,
                    initial_camera_distance,
                    last_bearing,
                },
                [a, b, ..],
            ) => {
                let ratio = a.distance(b) / initial_distance;
                view.camera_distance = pinch_distance(
                    initial_camera_distance,
                    ratio,
                    self.settings.zoom_min,
                    self.settings.zoom_max,
                );
                let bearing = a.bearing(b);
                view.yaw += wrap_angle(bearing - last_bearing);
                self.phase = Phase::Pinching {
                    initial_distance,
                    initial_camera_distance,
                    last_bearing: bearing,
                };
                GestureOutcome::Zoomed
            }
            (Phase::Pending { start, deadline, .. }, [point, ..]) => {
                let moved_past_slop = start.distance(point) > self.settings.tap_slop_px;
                if moved_past_slop || now > deadline {
                    self.phase = Phase::Dragging { last: start };
                    self.drag_to(*point, view)
                } else {
                    GestureOutcome::None
                }
            }
            (Phase::Dragging { .. }, [point, ..]) => self.drag_to(*point, view),
            _ => GestureOutcome::None,
        }
    }

    fn drag_to(&mut self, point: TouchPoint, view: &mut ViewState) -> GestureOutcome {
        let Phase::Dragging { last } = self.phase else {
            return GestureOutcome::None;
        };
        let dx = point.x - last.x;
        let dy = point.y - last.y;
        view.yaw += dx * self.settings.rotation_speed;
        view.pitch = (view.pitch + dy * self.settings.pitch_speed)
            .clamp(self.settings.pitch_min, self.settings.pitch_max);
        self.phase = Phase::Dragging { last: point };
        GestureOutcome::Rotated
    }

    /// `release` is the lifted point, `remaining` the number still down.
    pub fn touch_end(
        &mut self,
        release: TouchPoint,
        remaining: usize,
        now: Instant,
    ) -> GestureOutcome {
        match self.phase {
            Phase::Pending {
                start, started_at, ..
            } => {
                self.phase = Phase::Idle;
                let elapsed = now.saturating_duration_since(started_at);
                let displacement = start.distance(&release);
                if elapsed <= self.settings.hold_delay && displacement <= self.settings.tap_slop_px
                {
                    GestureOutcome::Tap {
                        x: release.x,
                        y: release.y,
                    }
                } else {
                    GestureOutcome::None
                }
            }
            Phase::Pinching { .. } if remaining >= 2 => GestureOutcome::None,
            Phase::Pinching { .. } | Phase::Finished if remaining > 0 => {
                self.phase = Phase::Finished;
                GestureOutcome::None
            }
            Phase::Dragging { .. } if remaining > 0 => GestureOutcome::None,
            _ => {
                self.phase = Phase::Idle;
                GestureOutcome::None
            }
        }
    }

    /// Fire the hold timer if its deadline has passed. Returns true when this
    /// call armed a drag.
    pub fn poll(&mut self, now: Instant) -> bool {
        if let Phase::Pending {
            start, deadline, ..
        } = self.phase
        {
            if now > deadline {
                self.phase = Phase::Dragging { last: start };
                return true;
            }
        }
        false
    }

    /// The platform interrupted the gesture: drop timers and armed state.
    pub fn terminate(&mut self) {
        self.phase = Phase::Idle;
    }
}

/// Camera distance for a pinch ratio, clamped to the zoom range. Spreading the
/// fingers (ratio > 1) moves the camera closer.
pub fn pinch_distance(initial: f32, ratio: f32, zoom_min: f32, zoom_max: f32) -> f32 {
    let distance = if ratio.is_finite() && ratio > 0.0 {
        initial / ratio
    } else if ratio > 0.0 {
        zoom_min
    } else {
        zoom_max
    };
    distance.clamp(zoom_min, zoom_max)
}

/// Wrap to [-PI, PI).
pub fn wrap_angle(angle: f32) -> f32 {
    if !angle.is_finite() {
        return 0.0;
    }
    (angle + PI).rem_euclid(2.0 * PI) - PI
}
