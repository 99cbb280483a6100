// crates/layercut-media/src/audio.rs
//
// Audio decode: source container → planar f32 AudioBuffer at the engine's
// mix rate. Every decoded frame passes through a lazily-created resampler
// so arbitrary source formats land as planar f32 at the target rate and
// layout; mono sources are expanded by the resampler's layout conversion.

use std::path::Path;

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::input;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::Sample;
use ffmpeg::media::Type;
use ffmpeg::software::resampling;
use ffmpeg::util::channel_layout::ChannelLayout;
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use tracing::debug;

use layercut_core::audio::AudioBuffer;
use layercut_core::error::AudioError;

const TARGET_FMT: Sample = Sample::F32(SampleType::Planar);

/// Decode the audio track of `path` into an owned planar buffer.
pub fn decode_audio(
    path:        &Path,
    sample_rate: u32,
    channels:    u16,
) -> Result<AudioBuffer, AudioError> {
    let mut ictx =
        input(path).map_err(|e| AudioError::DecodeFailed(format!("open: {e}")))?;

    let stream_idx = ictx
        .streams()
        .best(Type::Audio)
        .ok_or_else(|| AudioError::DecodeFailed("no audio stream".into()))?
        .index();

    let dec_ctx = ffmpeg::codec::context::Context::from_parameters(
        ictx.stream(stream_idx).unwrap().parameters(),
    )
    .map_err(|e| AudioError::DecodeFailed(format!("decoder params: {e}")))?;
    let mut decoder = dec_ctx
        .decoder()
        .audio()
        .map_err(|e| AudioError::DecodeFailed(format!("open decoder: {e}")))?;

    let mut resampler: Option<resampling::Context> = None;
    let mut planes: Vec<Vec<f32>> = vec![Vec::new(); channels as usize];

    for result in ictx.packets() {
        let (stream, packet) =
            result.map_err(|e| AudioError::DecodeFailed(format!("read packet: {e}")))?;
        if stream.index() != stream_idx {
            continue;
        }
        if decoder.send_packet(&packet).is_err() {
            continue; // a bad packet should not abort the whole decode
        }
        drain_decoder(&mut decoder, &mut resampler, &mut planes, sample_rate, channels)?;
    }

    // Flush decoder-internal frames.
    let _ = decoder.send_eof();
    drain_decoder(&mut decoder, &mut resampler, &mut planes, sample_rate, channels)?;

    if planes[0].is_empty() {
        return Err(AudioError::EmptyResult);
    }
    let buf = AudioBuffer::from_planes(sample_rate, planes);
    debug!("[audio] decoded {:.2}s at {sample_rate} Hz ← {}", buf.duration_s(), path.display());
    Ok(buf)
}

fn drain_decoder(
    decoder:     &mut ffmpeg::decoder::audio::Audio,
    resampler:   &mut Option<resampling::Context>,
    planes:      &mut [Vec<f32>],
    sample_rate: u32,
    channels:    u16,
) -> Result<(), AudioError> {
    let mut raw = AudioFrame::empty();
    while decoder.receive_frame(&mut raw).is_ok() {
        let needs_resample = raw.format() != TARGET_FMT
            || raw.rate() != sample_rate
            || raw.ch_layout().channels() != channels as u32;
        if !needs_resample {
            push_planes(&raw, planes);
            continue;
        }
        // Create the resampler on the first frame; only then is the real
        // input format known. Mono must be declared as MONO or swr
        // misreads the layout.
        if resampler.is_none() {
            let src_layout = if raw.ch_layout().channels() >= 2 {
                raw.ch_layout()
            } else {
                ChannelLayout::MONO
            };
            let target_layout =
                if channels >= 2 { ChannelLayout::STEREO } else { ChannelLayout::MONO };
            let ctx = resampling::Context::get2(
                raw.format(), src_layout,    raw.rate(),
                TARGET_FMT,   target_layout, sample_rate,
            )
            .map_err(|e| AudioError::DecodeFailed(format!("create resampler: {e}")))?;
            *resampler = Some(ctx);
        }
        let rs = resampler.as_mut().unwrap();
        let mut resampled = AudioFrame::empty();
        if rs.run(&raw, &mut resampled).is_ok() && resampled.samples() > 0 {
            push_planes(&resampled, planes);
        }
    }
    Ok(())
}

/// Append one planar f32 frame to the accumulating planes.
fn push_planes(frame: &AudioFrame, planes: &mut [Vec<f32>]) {
    let n = frame.samples();
    if n == 0 {
        return;
    }
    for (ch, plane) in planes.iter_mut().enumerate() {
        unsafe {
            let bytes = frame.data(ch);
            let f32s = std::slice::from_raw_parts(bytes.as_ptr() as *const f32, n);
            plane.extend_from_slice(f32s);
        }
    }
}
