// crates/layercut-core/src/frame_service.rs
//
// FrameService: one layer's ordered, time-indexed transform sequence at a
// fixed internal rate. Index i covers local time [i, i+1) * 1000/fps ms
// from the layer's start. Seeking and interval editing are plain Vec index
// math, with no keyframe curves to solve.

use tracing::warn;

use crate::frame::{interpolate, Frame};

#[derive(Clone, Debug)]
pub struct FrameService {
    fps:    u32,
    frames: Vec<Frame>,
}

impl FrameService {
    /// `prefilled` seeds floor(duration_ms / frame_dur) neutral frames;
    /// otherwise the sequence starts empty and is pushed by the demuxer.
    pub fn new(duration_ms: i64, fps: u32, prefilled: bool) -> Self {
        let frames = if prefilled {
            let n = Self::ms_to_len(duration_ms, fps);
            vec![Frame::neutral(); n]
        } else {
            Vec::new()
        };
        Self { fps, frames }
    }

    fn ms_to_len(duration_ms: i64, fps: u32) -> usize {
        ((duration_ms.max(0) * fps as i64) / 1000) as usize
    }

    pub fn fps(&self) -> u32 { self.fps }

    pub fn len(&self) -> usize { self.frames.len() }

    pub fn is_empty(&self) -> bool { self.frames.is_empty() }

    /// Duration implied by the current length, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        self.frames.len() as i64 * 1000 / self.fps as i64
    }

    pub fn frame_dur_ms(&self) -> i64 { 1000 / self.fps as i64 }

    pub fn get(&self, i: usize) -> Option<&Frame> { self.frames.get(i) }

    pub fn get_mut(&mut self, i: usize) -> Option<&mut Frame> { self.frames.get_mut(i) }

    pub fn push(&mut self, frame: Frame) { self.frames.push(frame); }

    /// Replace the frame at `i`. Out-of-range writes are ignored.
    pub fn update(&mut self, i: usize, frame: Frame) {
        if let Some(slot) = self.frames.get_mut(i) {
            *slot = frame;
        }
    }

    pub fn slice(&self, start: usize, count: usize) -> &[Frame] {
        let lo = start.min(self.frames.len());
        let hi = (start + count).min(self.frames.len());
        &self.frames[lo..hi]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Frame> { self.frames.iter() }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Frame> { self.frames.iter_mut() }

    pub fn frames(&self) -> &[Frame] { &self.frames }

    /// Replace the whole sequence (speed controller rewrite).
    pub fn replace(&mut self, frames: Vec<Frame>) { self.frames = frames; }

    /// Project time → frame index, or -1 before the layer's start.
    /// Times past the end still map to an index; get_frame handles range.
    pub fn time_to_index(&self, project_ms: i64, layer_start_ms: i64) -> i64 {
        let local = project_ms - layer_start_ms;
        if local < 0 {
            return -1;
        }
        local * self.fps as i64 / 1000
    }

    /// The frame under `project_ms`, or None when out of range.
    pub fn get_frame(&self, project_ms: i64, layer_start_ms: i64) -> Option<&Frame> {
        let idx = self.time_to_index(project_ms, layer_start_ms);
        if idx < 0 {
            return None;
        }
        self.frames.get(idx as usize)
    }

    /// Grow or shrink the sequence by `delta_ms`. Extension duplicates the
    /// last frame (or seeds a neutral frame when empty); shrink truncates
    /// from the tail. Length never drops below one frame.
    pub fn adjust_total_time(&mut self, delta_ms: i64) {
        let delta_frames = delta_ms * self.fps as i64 / 1000;
        if delta_frames >= 0 {
            let tail = self.frames.last().cloned().unwrap_or_else(Frame::neutral);
            self.frames.extend(std::iter::repeat(tail).take(delta_frames as usize));
        } else {
            let want = self.frames.len() as i64 + delta_frames;
            if want < 1 {
                warn!("frame service shrink clamped: len={} delta_ms={delta_ms}", self.frames.len());
            }
            self.frames.truncate(want.max(1) as usize);
        }
    }

    /// Remove the frames covering [t0_s, t1_s) of local time. Returns false
    /// without mutating when the range is empty or lies outside the sequence.
    pub fn remove_interval(&mut self, t0_s: f64, t1_s: f64) -> bool {
        if !(t0_s < t1_s) {
            return false;
        }
        let i0 = (t0_s * self.fps as f64).floor().max(0.0) as usize;
        let i1 = ((t1_s * self.fps as f64).floor() as usize).min(self.frames.len());
        if i0 >= self.frames.len() || i0 >= i1 {
            return false;
        }
        self.frames.drain(i0..i1);
        true
    }

    /// Prepend `count` duplicates of the first frame (or neutral frames
    /// when empty). Start-side extension of still layers.
    pub fn extend_front(&mut self, count: usize) {
        let head = self.frames.first().cloned().unwrap_or_else(Frame::neutral);
        self.frames.splice(0..0, std::iter::repeat(head).take(count));
    }

    /// Split off the first `count` frames into a new service, leaving the
    /// remainder here. Used by the timeline's split operation.
    pub fn split_off_front(&mut self, count: usize) -> FrameService {
        let count = count.min(self.frames.len());
        let rest = self.frames.split_off(count);
        let head = std::mem::replace(&mut self.frames, rest);
        FrameService { fps: self.fps, frames: head }
    }

    /// Linear interpolation between two frames (see `frame::interpolate`).
    pub fn interpolate(a: &Frame, b: &Frame, alpha: f32) -> Frame {
        interpolate(a, b, alpha)
    }

    /// The frame at `idx`, or the nearest previous frame that carries a
    /// payload when the slot itself is empty. During a progressive load
    /// only every k-th slot is filled; this is the placeholder rule.
    pub fn nearest_filled(&self, idx: usize) -> Option<&Frame> {
        let idx = idx.min(self.frames.len().checked_sub(1)?);
        if self.frames[idx].payload.is_some() {
            return Some(&self.frames[idx]);
        }
        self.frames[..idx].iter().rev().find(|f| f.payload.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Raster;
    use std::sync::Arc;

    fn svc(duration_ms: i64) -> FrameService {
        FrameService::new(duration_ms, 24, true)
    }

    #[test]
    fn prefilled_length_matches_duration() {
        let s = svc(1000);
        assert_eq!(s.len(), 24);
        // Implied duration within one frame of the requested duration.
        assert!((s.duration_ms() - 1000).abs() <= s.frame_dur_ms());
    }

    #[test]
    fn time_to_index_maps_local_time() {
        let s = svc(2000);
        assert_eq!(s.time_to_index(500, 500), 0);
        assert_eq!(s.time_to_index(1500, 500), 24);
        assert_eq!(s.time_to_index(400, 500), -1);
    }

    #[test]
    fn get_frame_out_of_range_is_none() {
        let s = svc(1000);
        assert!(s.get_frame(0, 500).is_none());     // before start
        assert!(s.get_frame(1600, 500).is_none());  // past end
        assert!(s.get_frame(500, 500).is_some());
        assert!(s.get_frame(1499, 500).is_some());
    }

    #[test]
    fn adjust_total_time_extends_with_last_frame() {
        let mut s = svc(1000);
        s.get_mut(23).unwrap().x = 7.0;
        s.adjust_total_time(500);
        assert_eq!(s.len(), 36);
        assert_eq!(s.get(35).unwrap().x, 7.0);
    }

    #[test]
    fn adjust_total_time_shrink_clamps_to_one_frame() {
        let mut s = svc(1000);
        s.adjust_total_time(-5000);
        assert_eq!(s.len(), 1);
    }

    #[test]
    fn adjust_total_time_on_empty_seeds_neutral() {
        let mut s = FrameService::new(0, 24, false);
        s.adjust_total_time(1000);
        assert_eq!(s.len(), 24);
        assert!(s.get(0).unwrap().is_identity());
    }

    #[test]
    fn remove_interval_drops_exact_range() {
        let mut s = svc(10_000); // 240 frames
        for (i, f) in s.iter_mut().enumerate() {
            f.x = i as f32;
        }
        assert!(s.remove_interval(3.0, 5.0));
        assert_eq!(s.len(), 240 - 48);
        // Frames outside the cut keep their order and content.
        assert_eq!(s.get(71).unwrap().x, 71.0);
        assert_eq!(s.get(72).unwrap().x, 120.0);
    }

    #[test]
    fn remove_interval_rejects_bad_ranges() {
        let mut s = svc(1000);
        assert!(!s.remove_interval(2.0, 1.0));   // reversed
        assert!(!s.remove_interval(1.0, 1.0));   // empty
        assert!(!s.remove_interval(5.0, 6.0));   // outside
        assert_eq!(s.len(), 24);
    }

    #[test]
    fn split_off_front_partitions_sequence() {
        let mut s = svc(1000);
        for (i, f) in s.iter_mut().enumerate() {
            f.x = i as f32;
        }
        let head = s.split_off_front(10);
        assert_eq!(head.len(), 10);
        assert_eq!(s.len(), 14);
        assert_eq!(head.get(9).unwrap().x, 9.0);
        assert_eq!(s.get(0).unwrap().x, 10.0);
    }

    #[test]
    fn nearest_filled_scans_backward() {
        let mut s = svc(1000);
        let r = Arc::new(Raster::solid(1, 1, [1, 2, 3, 255]));
        s.get_mut(4).unwrap().payload = Some(r);
        assert!(s.nearest_filled(10).is_some());
        assert!(s.nearest_filled(4).is_some());
        assert!(s.nearest_filled(3).is_none());
    }
}
