// crates/layercut-media/src/lib.rs
//
// FFmpeg-backed media pipelines: probing, progressive frame extraction,
// audio decode, deterministic export, PNG snapshots, and the MediaWorker
// that runs them on background threads.

pub mod audio;
pub mod demux;
pub mod export;
pub mod probe;
pub mod remux;
pub mod snapshot;
pub mod worker;

pub use export::ExportSpec;
pub use probe::SourceInfo;
pub use worker::MediaWorker;
