// crates/layercut-core/src/analysis.rs
//
// Message envelopes for external analysis workers (speech-to-text,
// vision). The engine only defines the contract: workers receive owned
// copies of decoded media and can never mutate engine state. No worker
// runtime lives in this repository.

use std::sync::Arc;

use crate::audio::AudioBuffer;
use crate::surface::Raster;

#[derive(Clone, Debug)]
pub enum AnalysisPayload {
    /// An owned copy of one decoded visual frame.
    Frame(Arc<Raster>),
    /// An owned handle to decoded PCM.
    Audio(Arc<AudioBuffer>),
}

#[derive(Clone, Debug)]
pub enum AnalysisRequest {
    LoadModel { name: String },
    Analyze {
        payload:      AnalysisPayload,
        timestamp_ms: i64,
        prompt:       Option<String>,
    },
}

#[derive(Clone, Debug)]
pub enum AnalysisResponse {
    Progress { pct: f32 },
    Complete { text: String, timestamp_ms: i64 },
    Error { message: String },
}
