// crates/layercut-core/src/media_types.rs
//
// Types that flow across the channel between the media worker threads and
// the engine. No ffmpeg, just plain data.

use std::path::PathBuf;
use std::sync::Arc;

use uuid::Uuid;

use crate::audio::AudioBuffer;
use crate::error::{ExportError, SourceIngestError};
use crate::surface::Raster;

/// Which demux pass produced a frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum IngestPass {
    /// Reduced-rate pass; the layer becomes usable when it completes.
    First,
    /// Full-rate back-fill pass.
    Second,
}

/// Results sent from media worker threads to the engine. Drained between
/// ticks; a render tick never observes a half-applied result.
pub enum MediaResult {
    // ── Ingest ───────────────────────────────────────────────────────────────
    /// Source metadata. `width`/`height` are the decode size after the
    /// memory size-guard, aspect preserved.
    SourceMetadata {
        layer:       Uuid,
        duration_ms: i64,
        width:       u32,
        height:      u32,
        source_fps:  f32,
    },
    /// One decoded frame for slot `index` of the layer's frame service.
    IngestFrame {
        layer:    Uuid,
        index:    usize,
        raster:   Arc<Raster>,
        anchor:   bool,
        pass:     IngestPass,
        total:    usize,
        is_last:  bool,
    },
    /// First pass complete; the layer is usable at reduced quality.
    LayerReady { layer: Uuid },
    /// Second pass complete; every slot is filled.
    FullQuality { layer: Uuid },
    /// Decoded audio for an audio layer.
    AudioDecoded { layer: Uuid, buffer: Arc<AudioBuffer> },
    /// Decoded still for an image layer.
    ImageDecoded { layer: Uuid, raster: Arc<Raster> },
    /// Normalized waveform peaks for display.
    Peaks { layer: Uuid, peaks: Vec<f32> },
    IngestError { layer: Uuid, error: SourceIngestError },

    // ── Export ───────────────────────────────────────────────────────────────
    ExportProgress { job: Uuid, frame: u64, total: u64 },
    ExportDone { job: Uuid, path: PathBuf },
    ExportFailed { job: Uuid, error: ExportError },

    // ── Snapshots ────────────────────────────────────────────────────────────
    FrameSaved { path: PathBuf },
}
