// crates/layercut-core/src/config.rs
//
// Engine-wide tunables. Defaults match the constants the engine was built
// against; fps_internal may be configured but must stay stable within a
// project, since layer frame services are sized against it at ingest time.

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Per-layer frame-service rate. Every layer's transform sequence is
    /// indexed at this rate regardless of the source's native fps.
    pub fps_internal: u32,
    /// Reduced rate for the first demux pass; the layer becomes usable as
    /// soon as this pass completes.
    pub first_pass_fps: u32,
    /// Frames decoded between cooperative yields.
    pub chunk_size: usize,
    /// Minimum yield between demux chunks, in milliseconds.
    pub chunk_yield_ms: u64,
    /// Cap on estimated uncompressed frame memory per source. Sources over
    /// the cap are decoded at a reduced internal resolution.
    pub frame_mem_cap_bytes: u64,
    /// Output sample rate for all decoded and mixed audio.
    pub audio_sample_rate: u32,
    /// Channel count for decoded and mixed audio.
    pub audio_channels: u16,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fps_internal:        24,
            first_pass_fps:      12,
            chunk_size:          30,
            chunk_yield_ms:      10,
            frame_mem_cap_bytes: 1 << 30,
            audio_sample_rate:   44_100,
            audio_channels:      2,
        }
    }
}

impl EngineConfig {
    /// Duration of one frame-service slot in milliseconds (rounded down).
    pub fn frame_dur_ms(&self) -> i64 {
        1000 / self.fps_internal as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let c = EngineConfig::default();
        assert_eq!(c.fps_internal, 24);
        assert_eq!(c.first_pass_fps, 12);
        assert_eq!(c.frame_mem_cap_bytes, 1_073_741_824);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let c: EngineConfig = serde_json::from_str(r#"{ "fps_internal": 30 }"#).unwrap();
        assert_eq!(c.fps_internal, 30);
        assert_eq!(c.chunk_size, 30);
    }
}
