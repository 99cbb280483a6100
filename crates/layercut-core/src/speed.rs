// crates/layercut-core/src/speed.rs
//
// SpeedController: rewrites a layer's frame sequence for fast-forward or
// slow-motion. The original sequence is snapshotted on the first speed
// change, so any speed maps from the pristine frames and repeated changes
// never compound resampling error. Audio layers keep their frames; the
// audio engine handles pitch-preserving stretch separately.

use crate::frame::{interpolate, Frame};
use crate::frame_service::FrameService;

#[derive(Clone, Debug)]
pub struct SpeedController {
    speed:                f32,
    snapshot:             Option<Vec<Frame>>,
    original_duration_ms: i64,
}

impl SpeedController {
    pub fn new() -> Self {
        Self { speed: 1.0, snapshot: None, original_duration_ms: 0 }
    }

    pub fn speed(&self) -> f32 { self.speed }

    pub fn original_duration_ms(&self) -> i64 { self.original_duration_ms }

    /// Rewrite `service` for playback speed `s` (> 0). Returns the layer's
    /// new duration in milliseconds: floor(original / s).
    pub fn set_speed(&mut self, service: &mut FrameService, duration_ms: i64, s: f32) -> i64 {
        debug_assert!(s > 0.0);
        if self.snapshot.is_none() {
            self.snapshot = Some(service.frames().to_vec());
            self.original_duration_ms = duration_ms;
        }
        self.speed = s;
        let snap = self.snapshot.as_ref().unwrap();

        let rewritten = if (s - 1.0).abs() < f32::EPSILON {
            snap.clone()
        } else if s > 1.0 {
            fast_forward(snap, s)
        } else {
            slow_motion(snap, s)
        };
        service.replace(rewritten);

        (self.original_duration_ms as f64 / s as f64).floor() as i64
    }

    /// Record a speed without rewriting any frames. Audio layers use this:
    /// their transform frames stay neutral and the audio engine produces
    /// the pitch-preserved buffer instead.
    pub fn note_speed(&mut self, s: f32) {
        debug_assert!(s > 0.0);
        self.speed = s;
    }
}

impl Default for SpeedController {
    fn default() -> Self { Self::new() }
}

/// s > 1: pick every s-th original frame, with a small search window that
/// prefers anchor-marked frames (keyframe preference) over the exact stride
/// position.
fn fast_forward(snap: &[Frame], s: f32) -> Vec<Frame> {
    let n = snap.len();
    if n == 0 {
        return Vec::new();
    }
    let target = (n as f32 / s).floor() as usize;
    let window = 3.min((s / 2.0) as usize);
    let mut out = Vec::with_capacity(target);
    for i in 0..target {
        let base = ((i as f32 * s).floor() as usize).min(n - 1);
        let pick = anchor_near(snap, base, window).unwrap_or(base);
        out.push(snap[pick].clone());
    }
    out
}

/// Nearest index within ±window of `base` whose frame is anchor-marked.
fn anchor_near(snap: &[Frame], base: usize, window: usize) -> Option<usize> {
    for d in 0..=window {
        if let Some(i) = base.checked_sub(d) {
            if snap[i].anchor {
                return Some(i);
            }
        }
        let i = base + d;
        if i < snap.len() && snap[i].anchor {
            return Some(i);
        }
    }
    None
}

/// s < 1: stretch by interpolating between neighbouring originals.
fn slow_motion(snap: &[Frame], s: f32) -> Vec<Frame> {
    let n = snap.len();
    if n == 0 {
        return Vec::new();
    }
    let target = (n as f32 / s).floor() as usize;
    let mut out = Vec::with_capacity(target);
    for i in 0..target {
        let orig_pos = i as f32 * s;
        let base = (orig_pos.floor() as usize).min(n - 1);
        let alpha = orig_pos - base as f32;
        if base == n - 1 || alpha == 0.0 {
            out.push(snap[base].clone());
        } else {
            out.push(interpolate(&snap[base], &snap[base + 1], alpha));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service_with(n: usize) -> FrameService {
        let mut s = FrameService::new(0, 24, false);
        for i in 0..n {
            s.push(Frame { x: i as f32, ..Frame::neutral() });
        }
        s
    }

    #[test]
    fn double_speed_halves_length_and_duration() {
        let mut svc = service_with(240); // 10 s at 24 fps
        let mut ctl = SpeedController::new();
        let dur = ctl.set_speed(&mut svc, 10_000, 2.0);
        assert_eq!(svc.len(), 120);
        assert_eq!(dur, 5000);
        // Output index i holds original frame floor(i*2).
        assert_eq!(svc.get(10).unwrap().x, 20.0);
    }

    #[test]
    fn speed_round_trip_restores_frames() {
        let mut svc = service_with(240);
        let mut ctl = SpeedController::new();
        ctl.set_speed(&mut svc, 10_000, 2.0);
        let dur = ctl.set_speed(&mut svc, 5000, 1.0);
        assert_eq!(svc.len(), 240);
        assert_eq!(dur, 10_000);
        assert_eq!(svc.get(123).unwrap().x, 123.0);
    }

    #[test]
    fn half_speed_interpolates_between_neighbours() {
        let mut svc = service_with(10);
        let mut ctl = SpeedController::new();
        ctl.set_speed(&mut svc, 416, 0.5);
        assert_eq!(svc.len(), 20);
        assert_eq!(svc.get(0).unwrap().x, 0.0);
        // Output 1 sits at orig_pos 0.5 → lerp(frame0, frame1, 0.5).
        assert_eq!(svc.get(1).unwrap().x, 0.5);
        assert_eq!(svc.get(2).unwrap().x, 1.0);
    }

    #[test]
    fn fast_forward_prefers_anchor_in_window() {
        let mut svc = service_with(100);
        svc.get_mut(41).unwrap().anchor = true;
        let mut ctl = SpeedController::new();
        // s = 4 → window = min(3, 2) = 2; output 10 strides to 40, anchor at 41 wins.
        ctl.set_speed(&mut svc, 4166, 4.0);
        assert_eq!(svc.get(10).unwrap().x, 41.0);
    }

    #[test]
    fn slow_motion_clamps_at_last_frame() {
        let mut svc = service_with(4);
        let mut ctl = SpeedController::new();
        ctl.set_speed(&mut svc, 166, 0.5);
        assert_eq!(svc.len(), 8);
        // Beyond base == n-1 every output copies the final original.
        assert_eq!(svc.get(7).unwrap().x, 3.0);
    }
}
