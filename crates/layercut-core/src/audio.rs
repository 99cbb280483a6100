// crates/layercut-core/src/audio.rs
//
// AudioBuffer: owned planar f32 PCM plus the pure buffer operations:
// interval cut, split, peaks, pitch-preserving stretch, offline mix.
// Decoding bytes into a buffer is the media crate's job.

use std::collections::HashMap;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::AudioError;

#[derive(Clone, Debug)]
pub struct AudioBuffer {
    /// Identity for derived-buffer caching. Every new buffer (including
    /// results of cut/split/stretch) gets a fresh id, so caches keyed on it
    /// are invalidated by construction when a source is replaced.
    pub id:          Uuid,
    pub sample_rate: u32,
    /// One plane per channel, equal lengths.
    pub planes:      Vec<Vec<f32>>,
}

impl AudioBuffer {
    pub fn new(sample_rate: u32, channels: u16, len_samples: usize) -> Self {
        Self {
            id:          Uuid::new_v4(),
            sample_rate,
            planes:      vec![vec![0.0; len_samples]; channels as usize],
        }
    }

    pub fn from_planes(sample_rate: u32, planes: Vec<Vec<f32>>) -> Self {
        debug_assert!(!planes.is_empty());
        debug_assert!(planes.iter().all(|p| p.len() == planes[0].len()));
        Self { id: Uuid::new_v4(), sample_rate, planes }
    }

    pub fn channels(&self) -> u16 { self.planes.len() as u16 }

    pub fn len_samples(&self) -> usize {
        self.planes.first().map(|p| p.len()).unwrap_or(0)
    }

    pub fn duration_s(&self) -> f64 {
        self.len_samples() as f64 / self.sample_rate as f64
    }

    pub fn duration_ms(&self) -> i64 {
        (self.duration_s() * 1000.0).round() as i64
    }

    fn check_range(&self, t0_s: f64, t1_s: f64) -> Result<(usize, usize), AudioError> {
        let dur = self.duration_s();
        if !(0.0 <= t0_s && t0_s < t1_s && t1_s <= dur) {
            return Err(AudioError::InvalidTimeRange { t0: t0_s, t1: t1_s, duration: dur });
        }
        let start = (t0_s * self.sample_rate as f64).round() as usize;
        let end = ((t1_s * self.sample_rate as f64).round() as usize).min(self.len_samples());
        Ok((start, end))
    }

    /// New buffer with `[t0, t1)` removed: `[0, t0)` and `[t1, end)` are
    /// copied per channel, contiguously and unchanged.
    pub fn remove_interval(&self, t0_s: f64, t1_s: f64) -> Result<AudioBuffer, AudioError> {
        let (start, end) = self.check_range(t0_s, t1_s)?;
        let planes: Vec<Vec<f32>> = self
            .planes
            .iter()
            .map(|p| {
                let mut out = Vec::with_capacity(p.len() - (end - start));
                out.extend_from_slice(&p[..start]);
                out.extend_from_slice(&p[end..]);
                out
            })
            .collect();
        if planes[0].is_empty() {
            return Err(AudioError::EmptyResult);
        }
        Ok(AudioBuffer::from_planes(self.sample_rate, planes))
    }

    /// Two new buffers split at `t_s`; precondition 0 < t < duration.
    pub fn split(&self, t_s: f64) -> Result<(AudioBuffer, AudioBuffer), AudioError> {
        let dur = self.duration_s();
        if !(0.0 < t_s && t_s < dur) {
            return Err(AudioError::InvalidTimeRange { t0: t_s, t1: t_s, duration: dur });
        }
        let at = (t_s * self.sample_rate as f64).round() as usize;
        let left: Vec<Vec<f32>> = self.planes.iter().map(|p| p[..at].to_vec()).collect();
        let right: Vec<Vec<f32>> = self.planes.iter().map(|p| p[at..].to_vec()).collect();
        Ok((
            AudioBuffer::from_planes(self.sample_rate, left),
            AudioBuffer::from_planes(self.sample_rate, right),
        ))
    }

    /// `n` normalized amplitude peaks in [0, 1] for waveform display.
    pub fn peaks(&self, n: usize) -> Vec<f32> {
        let len = self.len_samples();
        if n == 0 || len == 0 {
            return Vec::new();
        }
        let bucket = (len / n).max(1);
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let lo = i * bucket;
            if lo >= len {
                break;
            }
            let hi = ((i + 1) * bucket).min(len);
            let mut peak = 0.0f32;
            for p in &self.planes {
                for &s in &p[lo..hi] {
                    peak = peak.max(s.abs());
                }
            }
            out.push(peak.min(1.0));
        }
        out
    }
}

// ── Pitch-preserving stretch ──────────────────────────────────────────────────

/// Overlap-add window length in samples (~23 ms at 44.1 kHz).
const OLA_WINDOW: usize = 1024;

/// Time-stretch `buf` by speed `s` without changing pitch: output duration
/// is input / s. Hann-windowed overlap-add with a fixed synthesis hop and a
/// speed-scaled analysis hop; grains keep the source's local waveform so
/// pitch is preserved.
pub fn stretch(buf: &AudioBuffer, s: f32) -> AudioBuffer {
    debug_assert!(s > 0.0);
    if (s - 1.0).abs() < 1e-6 {
        let mut out = buf.clone();
        out.id = Uuid::new_v4();
        return out;
    }
    let n = buf.len_samples();
    let syn_hop = OLA_WINDOW / 2;
    let ana_hop = (syn_hop as f64 * s as f64).max(1.0);
    let out_len = (n as f64 / s as f64).ceil() as usize;

    let window: Vec<f32> = (0..OLA_WINDOW)
        .map(|i| {
            let p = i as f32 / (OLA_WINDOW - 1) as f32;
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * p).cos()
        })
        .collect();

    let grains = out_len / syn_hop + 2;
    let acc_len = out_len + OLA_WINDOW;
    let mut planes = Vec::with_capacity(buf.planes.len());
    for src in &buf.planes {
        let mut acc = vec![0.0f32; acc_len];
        let mut norm = vec![0.0f32; acc_len];
        for g in 0..grains {
            let out_pos = g * syn_hop;
            let in_pos = (g as f64 * ana_hop) as usize;
            if in_pos >= n || out_pos >= out_len {
                break;
            }
            for i in 0..OLA_WINDOW {
                let si = in_pos + i;
                if si >= n {
                    break;
                }
                let w = window[i];
                acc[out_pos + i] += src[si] * w;
                norm[out_pos + i] += w;
            }
        }
        let mut plane = Vec::with_capacity(out_len);
        for i in 0..out_len {
            plane.push(if norm[i] > 1e-6 { acc[i] / norm[i] } else { 0.0 });
        }
        planes.push(plane);
    }
    AudioBuffer::from_planes(buf.sample_rate, planes)
}

/// Cache of stretched derivatives keyed by (source id, speed in thousandths).
/// Mutating a source produces a new buffer id, so stale entries simply stop
/// being hit; purge() drops them when a source is released.
#[derive(Default)]
pub struct StretchCache {
    entries: HashMap<(Uuid, u32), Arc<AudioBuffer>>,
}

impl StretchCache {
    pub fn new() -> Self { Self::default() }

    pub fn get_or_stretch(&mut self, src: &AudioBuffer, speed: f32) -> Arc<AudioBuffer> {
        let key = (src.id, (speed * 1000.0).round() as u32);
        self.entries
            .entry(key)
            .or_insert_with(|| Arc::new(stretch(src, speed)))
            .clone()
    }

    pub fn purge(&mut self, src_id: Uuid) {
        self.entries.retain(|(id, _), _| *id != src_id);
    }
}

// ── Offline mix ───────────────────────────────────────────────────────────────

/// Mix every audio source into one buffer of exactly `total_ms`.
/// Placement is sample-accurate: source k starts at start_ms[k]. Channel
/// counts are reconciled by cycling source planes; the sum is soft-clipped
/// to [-1, 1]. Deterministic: identical inputs produce identical samples.
pub fn mix_offline(
    sources:     &[(i64, Arc<AudioBuffer>)],
    total_ms:    i64,
    sample_rate: u32,
    channels:    u16,
) -> AudioBuffer {
    let out_len = ((total_ms.max(0) as f64 / 1000.0) * sample_rate as f64).ceil() as usize;
    let mut out = AudioBuffer::new(sample_rate, channels, out_len);
    for (start_ms, src) in sources {
        let at = ((*start_ms).max(0) as f64 / 1000.0 * sample_rate as f64).round() as usize;
        let n = src.len_samples();
        for ch in 0..channels as usize {
            let src_plane = &src.planes[ch % src.planes.len()];
            let dst = &mut out.planes[ch];
            for i in 0..n {
                let o = at + i;
                if o >= out_len {
                    break;
                }
                dst[o] = (dst[o] + src_plane[i]).clamp(-1.0, 1.0);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_buffer(secs: f64) -> AudioBuffer {
        let rate = 1000u32; // 1 kHz keeps sample indices readable
        let n = (secs * rate as f64) as usize;
        let plane: Vec<f32> = (0..n).map(|i| (i % 100) as f32 / 100.0).collect();
        AudioBuffer::from_planes(rate, vec![plane.clone(), plane])
    }

    #[test]
    fn remove_interval_shrinks_and_preserves_outside() {
        let buf = ramp_buffer(10.0);
        let cut = buf.remove_interval(3.0, 5.0).unwrap();
        assert_eq!(cut.len_samples(), 8000);
        // [0, 3 s) unchanged, [5 s, 10 s) follows contiguously.
        assert_eq!(cut.planes[0][2999], buf.planes[0][2999]);
        assert_eq!(cut.planes[0][3000], buf.planes[0][5000]);
        assert_eq!(cut.planes[0][7999], buf.planes[0][9999]);
    }

    #[test]
    fn remove_interval_validates_range() {
        let buf = ramp_buffer(2.0);
        assert!(buf.remove_interval(1.5, 1.0).is_err());
        assert!(buf.remove_interval(-0.5, 1.0).is_err());
        assert!(buf.remove_interval(0.0, 3.0).is_err());
    }

    #[test]
    fn split_partitions_samples() {
        let buf = ramp_buffer(4.0);
        let (l, r) = buf.split(1.0).unwrap();
        assert_eq!(l.len_samples(), 1000);
        assert_eq!(r.len_samples(), 3000);
        assert_eq!(r.planes[0][0], buf.planes[0][1000]);
    }

    #[test]
    fn split_rejects_endpoints() {
        let buf = ramp_buffer(2.0);
        assert!(buf.split(0.0).is_err());
        assert!(buf.split(2.0).is_err());
    }

    #[test]
    fn stretch_changes_duration_not_rate() {
        let buf = ramp_buffer(4.0);
        let slow = stretch(&buf, 0.5);
        assert_eq!(slow.sample_rate, buf.sample_rate);
        let want = (buf.len_samples() as f64 / 0.5).ceil() as usize;
        assert_eq!(slow.len_samples(), want);
        let fast = stretch(&buf, 2.0);
        assert_eq!(fast.len_samples(), buf.len_samples() / 2);
    }

    #[test]
    fn stretch_cache_hits_same_key() {
        let buf = ramp_buffer(1.0);
        let mut cache = StretchCache::new();
        let a = cache.get_or_stretch(&buf, 2.0);
        let b = cache.get_or_stretch(&buf, 2.0);
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn mix_offline_places_sources_at_start() {
        let mut a = AudioBuffer::new(1000, 2, 1000);
        a.planes[0].iter_mut().for_each(|s| *s = 0.25);
        a.planes[1].iter_mut().for_each(|s| *s = 0.25);
        let mixed = mix_offline(&[(2000, Arc::new(a))], 5000, 1000, 2);
        assert_eq!(mixed.len_samples(), 5000);
        assert_eq!(mixed.planes[0][1999], 0.0);
        assert_eq!(mixed.planes[0][2000], 0.25);
        assert_eq!(mixed.planes[0][2999], 0.25);
        assert_eq!(mixed.planes[0][3000], 0.0);
    }

    #[test]
    fn mix_offline_is_deterministic() {
        let buf = Arc::new(ramp_buffer(2.0));
        let m1 = mix_offline(&[(0, buf.clone()), (500, buf.clone())], 3000, 1000, 2);
        let m2 = mix_offline(&[(0, buf.clone()), (500, buf)], 3000, 1000, 2);
        assert_eq!(m1.planes, m2.planes);
    }

    #[test]
    fn peaks_normalized_bucket_count() {
        let buf = ramp_buffer(10.0);
        let p = buf.peaks(50);
        assert_eq!(p.len(), 50);
        assert!(p.iter().all(|&v| (0.0..=1.0).contains(&v)));
    }
}
