// crates/layercut-media/src/probe.rs
//
// In-process FFmpeg probing: duration, stream presence, video dimensions
// and source frame rate. One open per probe; the demuxer re-opens its own
// context afterwards.

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::media::Type;
use tracing::debug;

use layercut_core::error::SourceIngestError;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceInfo {
    pub duration_ms: i64,
    pub width:       u32,
    pub height:      u32,
    /// Source video frame rate; 0 for audio-only files.
    pub fps:         f32,
    pub has_video:   bool,
    pub has_audio:   bool,
}

pub fn probe_source(path: &Path) -> Result<SourceInfo, SourceIngestError> {
    let ictx = input(path)
        .map_err(|e| SourceIngestError::UnsupportedContainer(e.to_string()))?;

    let mut duration_ms =
        (ictx.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64 * 1000.0) as i64;

    let video = ictx.streams().best(Type::Video);
    let audio = ictx.streams().best(Type::Audio);

    let (mut width, mut height, mut fps) = (0u32, 0u32, 0.0f32);
    if let Some(stream) = &video {
        let (w, h) = unsafe {
            let p = stream.parameters().as_ptr();
            ((*p).width as u32, (*p).height as u32)
        };
        width = w;
        height = h;
        let rate = stream.avg_frame_rate();
        if rate.denominator() > 0 {
            fps = rate.numerator() as f32 / rate.denominator() as f32;
        }
    }

    // Container-level duration can be missing; fall back to stream duration.
    if duration_ms <= 0 {
        if let Some(stream) = video.as_ref().or(audio.as_ref()) {
            let tb = stream.time_base();
            duration_ms = (stream.duration() as f64 * tb.numerator() as f64
                / tb.denominator() as f64
                * 1000.0) as i64;
        }
    }
    if duration_ms <= 0 {
        return Err(SourceIngestError::DecoderError("duration unknown".into()));
    }

    let info = SourceInfo {
        duration_ms,
        width,
        height,
        fps,
        has_video: video.is_some(),
        has_audio: audio.is_some(),
    };
    debug!("[probe] {}: {info:?}", path.display());
    Ok(info)
}
