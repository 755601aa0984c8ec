use std::time::{Duration, Instant};

/// Frame cadence report, produced about twice a second.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FpsReport {
    pub fps: f32,
    pub cadence_ms: f32,
    pub render_ms: f32,
}

pub struct FrameTiming {
    last_frame_time: Option<Instant>,
    last_fps_time: Instant,
    frame_count: u32,
    pub frame_dt: f32,
    render_ms: f32,
    report_interval: Duration,
}

impl FrameTiming {
    pub fn new(now: Instant) -> Self {
        Self {
            last_frame_time: None,
            last_fps_time: now,
            frame_count: 0,
            frame_dt: 1.0 / 60.0,
            render_ms: 0.0,
            report_interval: Duration::from_millis(500),
        }
    }

    pub fn set_render_ms(&mut self, render_ms: f32) {
        self.render_ms = render_ms;
    }

    /// Record a frame at `now`. Returns a report when the interval has elapsed.
    pub fn update(&mut self, now: Instant) -> Option<FpsReport> {
        let dt_duration = if let Some(last) = self.last_frame_time {
            now.saturating_duration_since(last)
        } else {
            Duration::from_millis(16)
        };
        self.last_frame_time = Some(now);
        self.frame_dt = dt_duration.as_secs_f32().max(0.0);

        self.frame_count = self.frame_count.saturating_add(1);
        let elapsed = now.saturating_duration_since(self.last_fps_time);
        if elapsed < self.report_interval {
            return None;
        }
        let report = FpsReport {
            fps: self.frame_count as f32 / elapsed.as_secs_f32(),
            cadence_ms: (self.frame_dt * 1000.0).max(0.0),
            render_ms: self.render_ms,
        };
        self.frame_count = 0;
        self.last_fps_time = now;
        Some(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_every_half_second() {
        let t0 = Instant::now();
        let mut timing = FrameTiming::new(t0);
        let mut reports = Vec::new();
        for frame in 1..=60u64 {
            if let Some(report) = timing.update(t0 + Duration::from_millis(frame * 16)) {
                reports.push(report);
            }
        }
        assert_eq!(reports.len(), 1);
        assert!((reports[0].fps - 32.0 / 0.512).abs() < 0.5);
        assert!((timing.frame_dt - 0.016).abs() < 1e-4);
    }
}
