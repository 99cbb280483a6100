// crates/layercut-engine/src/lib.rs
//
// The engine runtime: playback clock, per-tick render dispatch, live audio
// output, and the Engine value that ties the timeline, the media worker,
// and the control surface together. No UI; bindings are the caller's job.

pub mod audio_out;
pub mod engine;
pub mod fonts;
pub mod scheduler;

pub use engine::Engine;
pub use scheduler::PlaybackClock;
