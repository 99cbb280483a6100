// crates/layercut-core/src/error.rs
//
// Error taxonomy for the engine. One enum per failure domain; every
// fallible public operation returns Result<T, Kind>. Errors never unwind
// past a render tick; per-layer render failures degrade to a placeholder
// frame instead.

use thiserror::Error;

/// Failures while turning a source file into a populated layer.
/// Terminal for that source only; the rest of the project is unaffected.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceIngestError {
    #[error("unsupported container: {0}")]
    UnsupportedContainer(String),

    #[error("no video track in source")]
    NoVideoTrack,

    #[error("unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("decoder error: {0}")]
    DecoderError(String),

    /// A per-frame seek in the fallback capture path missed its deadline.
    #[error("seek timed out at {at_ms} ms")]
    SeekTimeout { at_ms: i64 },

    #[error("estimated frame memory {estimated} exceeds cap {cap}")]
    SizeGuardExceeded { estimated: u64, cap: u64 },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AudioError {
    #[error("audio decode failed: {0}")]
    DecodeFailed(String),

    /// Range preconditions are 0 <= t0 < t1 <= duration.
    #[error("invalid time range [{t0}, {t1}] for buffer of {duration} s")]
    InvalidTimeRange { t0: f64, t1: f64, duration: f64 },

    #[error("operation produced an empty buffer")]
    EmptyResult,
}

/// Edit operations are check-then-apply: on error the timeline and every
/// layer are left exactly as they were.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EditError {
    #[error("time {t_ms} ms is outside the layer")]
    OutOfBounds { t_ms: i64 },

    #[error("layer is still loading")]
    LayerNotReady,

    #[error("operation not supported by this layer kind")]
    IncompatibleOperation,

    #[error("no such layer")]
    NoSuchLayer,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExportError {
    #[error("no encodable video codec available")]
    NoEncodableVideoCodec,

    #[error("encoder failure: {0}")]
    EncoderFailure(String),

    #[error("export cancelled")]
    Cancelled,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("output surface unavailable")]
    SurfaceUnavailable,

    #[error("audio output unavailable: {0}")]
    AudioContextUnavailable(String),
}
