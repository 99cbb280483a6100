// crates/layercut-core/src/lib.rs
//
// Pure engine data and algorithms. No ffmpeg, no audio device, no runtime
// handles. Everything here is deterministic and unit-testable.

pub mod analysis;
pub mod audio;
pub mod commands;
pub mod config;
pub mod error;
pub mod frame;
pub mod frame_service;
pub mod layer;
pub mod media_types;
pub mod project;
pub mod speed;
pub mod surface;
pub mod timeline;

pub use audio::AudioBuffer;
pub use config::EngineConfig;
pub use error::{AudioError, EditError, ExportError, SessionError, SourceIngestError};
pub use frame::Frame;
pub use frame_service::FrameService;
pub use layer::{LayerKind, MediaLayer};
pub use surface::{Raster, RasterSurface};
pub use timeline::Timeline;
