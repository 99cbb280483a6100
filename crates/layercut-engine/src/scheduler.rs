// crates/layercut-engine/src/scheduler.rs
//
// PlaybackClock: the monotonic project clock. Wall time is sampled when
// playback starts; each tick derives project time from the elapsed wall
// span, so pause freezes it and seek jumps it. The clock never assumes
// wall == project.

use std::time::Instant;

#[derive(Clone, Copy, Debug)]
pub struct PlaybackClock {
    wall_start: Option<Instant>,
    t_at_start: i64,
}

impl PlaybackClock {
    pub fn new() -> Self {
        Self { wall_start: None, t_at_start: 0 }
    }

    pub fn is_running(&self) -> bool {
        self.wall_start.is_some()
    }

    /// Begin advancing from project time `t_ms`.
    pub fn start(&mut self, now: Instant, t_ms: i64) {
        self.wall_start = Some(now);
        self.t_at_start = t_ms;
    }

    /// Freeze at the current position.
    pub fn stop(&mut self, now: Instant, total_ms: i64) {
        self.t_at_start = self.current(now, total_ms);
        self.wall_start = None;
    }

    /// Jump to `t_ms`; a running clock keeps running from there.
    pub fn seek(&mut self, now: Instant, t_ms: i64) {
        self.t_at_start = t_ms;
        if self.wall_start.is_some() {
            self.wall_start = Some(now);
        }
    }

    /// Project time at wall instant `now`, clamped to [0, total_ms].
    pub fn current(&self, now: Instant, total_ms: i64) -> i64 {
        let t = match self.wall_start {
            Some(start) => self.t_at_start + now.duration_since(start).as_millis() as i64,
            None => self.t_at_start,
        };
        t.clamp(0, total_ms.max(0))
    }
}

impl Default for PlaybackClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn stopped_clock_holds_position() {
        let clock = PlaybackClock::new();
        let now = Instant::now();
        assert_eq!(clock.current(now, 10_000), 0);
        assert_eq!(clock.current(now + Duration::from_secs(5), 10_000), 0);
    }

    #[test]
    fn running_clock_tracks_wall_span() {
        let mut clock = PlaybackClock::new();
        let t0 = Instant::now();
        clock.start(t0, 1000);
        assert_eq!(clock.current(t0 + Duration::from_millis(500), 10_000), 1500);
    }

    #[test]
    fn current_clamps_to_total() {
        let mut clock = PlaybackClock::new();
        let t0 = Instant::now();
        clock.start(t0, 4000);
        assert_eq!(clock.current(t0 + Duration::from_secs(10), 5000), 5000);
    }

    #[test]
    fn pause_freezes_then_resume_continues() {
        let mut clock = PlaybackClock::new();
        let t0 = Instant::now();
        clock.start(t0, 0);
        let t1 = t0 + Duration::from_millis(800);
        clock.stop(t1, 10_000);
        assert_eq!(clock.current(t1 + Duration::from_secs(3), 10_000), 800);
        clock.start(t1 + Duration::from_secs(3), 800);
        assert_eq!(
            clock.current(t1 + Duration::from_secs(3) + Duration::from_millis(200), 10_000),
            1000
        );
    }

    #[test]
    fn seek_jumps_running_clock() {
        let mut clock = PlaybackClock::new();
        let t0 = Instant::now();
        clock.start(t0, 0);
        let t1 = t0 + Duration::from_millis(300);
        clock.seek(t1, 7000);
        assert_eq!(clock.current(t1 + Duration::from_millis(100), 10_000), 7100);
    }
}
