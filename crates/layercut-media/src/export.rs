// crates/layercut-media/src/export.rs
//
// Deterministic offline export: re-render the composition at a fixed rate
// into an H.264 + AAC MP4 (first encodable codec from a preference list).
//
// Design:
//   • `ExportSpec`        is the complete job description handed from the engine.
//   • `export_timeline()` is blocking, runs on its own thread, and sends
//     ExportProgress / ExportDone / ExportFailed over the result channel.
//
// Stream layout: stream 0 H.264 video (YUV420P, CRF 18), stream 1 AAC
// audio (FLTP stereo, 44100 Hz, 128 kbps).
//
// PTS strategy: video uses the output frame counter in 1/fps; audio uses
// the output sample counter in 1/sample_rate. Both start at zero.
//
// Audio comes from a single offline mix built before the frame loop:
// real-time capture would inherit playback drift and dropped frames; the
// offline mix is sample-accurate no matter how fast frames render. The
// video track is a pure function of t_ms: frame i renders the composition
// at i*1000/fps onto a dedicated offline surface, so two exports of the
// same timeline are pixel- and sample-identical.
//
// Cancellation: the cancel flag is checked every frame; a cancelled or
// failed export deletes the partial output file.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::Sender;
use ffmpeg_the_third as ffmpeg;
use ffmpeg::codec::{self, Id as CodecId};
use ffmpeg::encoder;
use ffmpeg::format::sample::Type as SampleType;
use ffmpeg::format::{output as open_output, Pixel, Sample};
use ffmpeg::util::channel_layout::{ChannelLayout, ChannelLayoutMask};
use ffmpeg::util::frame::audio::Audio as AudioFrame;
use ffmpeg::util::frame::video::Video as VideoFrame;
use ffmpeg::util::rational::Rational;
use ffmpeg::Packet;
use tracing::info;
use uuid::Uuid;

use layercut_core::audio::{mix_offline, stretch, AudioBuffer};
use layercut_core::error::ExportError;
use layercut_core::layer::LayerKind;
use layercut_core::media_types::MediaResult;
use layercut_core::surface::RasterSurface;
use layercut_core::{EngineConfig, Timeline};

// ── Public types ──────────────────────────────────────────────────────────────

/// Complete description of an export job.
#[derive(Clone)]
pub struct ExportSpec {
    pub job_id: Uuid,
    pub width:  u32,
    pub height: u32,
    /// Output frame rate (integer; fractional rates not needed here).
    pub fps:    u32,
    /// Audio bitrate in bits/s.
    pub bitrate_audio: usize,
    /// Destination file, including extension (`.mp4`).
    pub output: PathBuf,
}

impl ExportSpec {
    pub fn new(job_id: Uuid, width: u32, height: u32, fps: u32, output: PathBuf) -> Self {
        Self { job_id, width, height, fps, bitrate_audio: 128_000, output }
    }
}

/// Send a progress update every this many encoded video frames.
const PROGRESS_INTERVAL: u64 = 15;

/// Codec preference lists; the first one with an available encoder wins.
const VIDEO_CODECS: [CodecId; 2] = [CodecId::H264, CodecId::VP9];
const AUDIO_CODECS: [CodecId; 2] = [CodecId::AAC, CodecId::OPUS];

// ── Public entry point ────────────────────────────────────────────────────────

/// Export `timeline` to disk. Blocking; run this on a dedicated thread.
/// `timeline` is the engine's snapshot clone; the live one is untouched.
pub fn export_timeline(
    mut timeline: Timeline,
    spec:         ExportSpec,
    cfg:          EngineConfig,
    cancel:       Arc<AtomicBool>,
    tx:           Sender<MediaResult>,
) {
    match run_export(&mut timeline, &spec, &cfg, &cancel, &tx) {
        Ok(()) => {
            let _ = tx.send(MediaResult::ExportDone {
                job:  spec.job_id,
                path: spec.output.clone(),
            });
        }
        Err(e) => {
            // The partial artifact is never useful.
            let _ = std::fs::remove_file(&spec.output);
            let _ = tx.send(MediaResult::ExportFailed { job: spec.job_id, error: e });
        }
    }
}

// ── Audio FIFO ────────────────────────────────────────────────────────────────

/// Stereo FLTP sample buffer between the offline mix and the AAC encoder.
/// AAC wants exactly `frame_size` (typically 1024) samples per input
/// frame; the mix is pushed in per-video-frame spans of arbitrary length,
/// so full frames are popped from the front and the tail is zero-padded
/// only at the final flush.
struct AudioFifo {
    left:  Vec<f32>,
    right: Vec<f32>,
}

impl AudioFifo {
    fn new() -> Self {
        Self { left: Vec::new(), right: Vec::new() }
    }

    fn len(&self) -> usize {
        self.left.len()
    }

    fn push_span(&mut self, mix: &AudioBuffer, lo: usize, hi: usize) {
        let n = mix.len_samples();
        let (lo, hi) = (lo.min(n), hi.min(n));
        self.left.extend_from_slice(&mix.planes[0][lo..hi]);
        let right_plane = if mix.planes.len() >= 2 { &mix.planes[1] } else { &mix.planes[0] };
        self.right.extend_from_slice(&right_plane[lo..hi]);
    }

    /// Pop one encoder-sized frame; short tails are zero-padded.
    fn pop_frame(&mut self, n: usize, sample_idx: i64, rate: u32) -> AudioFrame {
        let available = self.left.len().min(n);

        let mut frame = AudioFrame::new(
            Sample::F32(SampleType::Planar),
            n,
            ChannelLayoutMask::STEREO,
        );
        frame.set_rate(rate);
        frame.set_pts(Some(sample_idx));

        unsafe {
            let ldata = frame.data_mut(0);
            let ldst = std::slice::from_raw_parts_mut(ldata.as_mut_ptr() as *mut f32, n);
            ldst[..available].copy_from_slice(&self.left[..available]);
            if available < n {
                ldst[available..].fill(0.0);
            }

            let rdata = frame.data_mut(1);
            let rdst = std::slice::from_raw_parts_mut(rdata.as_mut_ptr() as *mut f32, n);
            rdst[..available].copy_from_slice(&self.right[..available]);
            if available < n {
                rdst[available..].fill(0.0);
            }
        }

        self.left.drain(..available);
        self.right.drain(..available);
        frame
    }
}

// ── Audio encoder state ───────────────────────────────────────────────────────

struct AudioEncState {
    encoder:        ffmpeg::encoder::Audio,
    out_sample_idx: i64,
    frame_size:     usize,
    fifo:           AudioFifo,
    rate:           u32,
    audio_tb:       Rational,
    ost_audio_tb:   Rational,
}

impl AudioEncState {
    fn drain_fifo(
        &mut self,
        octx:  &mut ffmpeg::format::context::Output,
        flush: bool,
    ) -> Result<(), ExportError> {
        while self.fifo.len() >= self.frame_size || (flush && self.fifo.len() > 0) {
            let frame = self.fifo.pop_frame(self.frame_size, self.out_sample_idx, self.rate);
            self.out_sample_idx += self.frame_size as i64;
            self.encoder
                .send_frame(&frame)
                .map_err(|e| ExportError::EncoderFailure(format!("send audio frame: {e}")))?;
            self.drain_packets(octx)?;
        }
        Ok(())
    }

    fn drain_packets(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
    ) -> Result<(), ExportError> {
        let mut pkt = Packet::empty();
        while self.encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(1);
            pkt.rescale_ts(self.audio_tb, self.ost_audio_tb);
            pkt.write_interleaved(octx)
                .map_err(|e| ExportError::EncoderFailure(format!("write audio packet: {e}")))?;
        }
        Ok(())
    }

    fn flush_encoder(
        &mut self,
        octx: &mut ffmpeg::format::context::Output,
    ) -> Result<(), ExportError> {
        self.encoder
            .send_eof()
            .map_err(|e| ExportError::EncoderFailure(format!("audio EOF: {e}")))?;
        self.drain_packets(octx)
    }
}

// ── Internal implementation ───────────────────────────────────────────────────

fn first_available(list: &[CodecId]) -> Option<(CodecId, ffmpeg::Codec)> {
    list.iter().find_map(|&id| encoder::find(id).map(|c| (id, c)))
}

fn run_export(
    timeline: &mut Timeline,
    spec:     &ExportSpec,
    cfg:      &EngineConfig,
    cancel:   &Arc<AtomicBool>,
    tx:       &Sender<MediaResult>,
) -> Result<(), ExportError> {
    let total_ms = timeline.total_time_ms();
    if total_ms <= 0 {
        return Err(ExportError::EncoderFailure("timeline is empty".into()));
    }
    let total_frames = (total_ms as f64 / 1000.0 * spec.fps as f64).ceil() as u64;
    let rate = cfg.audio_sample_rate;

    // ── Offline audio mix ─────────────────────────────────────────────────────
    // Built up front; pitch-preserved stretch is applied per layer speed.
    let sources: Vec<(i64, Arc<AudioBuffer>)> = timeline
        .layers()
        .iter()
        .filter_map(|l| match &l.kind {
            LayerKind::Audio(a) => {
                let buf = a.buffer.clone()?;
                let speed = l.speed();
                let buf = if (speed - 1.0).abs() > 1e-3 {
                    Arc::new(stretch(&buf, speed))
                } else {
                    buf
                };
                Some((l.base.start_time_ms, buf))
            }
            _ => None,
        })
        .collect();
    let mix = mix_offline(&sources, total_ms, rate, 2);

    // ── Output context ────────────────────────────────────────────────────────
    let mut octx = open_output(&spec.output)
        .map_err(|e| ExportError::EncoderFailure(format!("open output: {e}")))?;

    let (_vid_id, vcodec) =
        first_available(&VIDEO_CODECS).ok_or(ExportError::NoEncodableVideoCodec)?;
    let (_aud_id, acodec) = first_available(&AUDIO_CODECS)
        .ok_or_else(|| ExportError::EncoderFailure("no audio encoder".into()))?;

    // ── Video encoder (stream 0) ──────────────────────────────────────────────
    let out_tb = Rational::new(1, spec.fps as i32);

    let mut ost_video = octx
        .add_stream(vcodec)
        .map_err(|e| ExportError::EncoderFailure(format!("add video stream: {e}")))?;
    ost_video.set_time_base(out_tb);

    let video_enc_ctx = codec::context::Context::new_with_codec(vcodec);
    let mut video_enc = video_enc_ctx
        .encoder()
        .video()
        .map_err(|e| ExportError::EncoderFailure(format!("video encoder context: {e}")))?;
    video_enc.set_width(spec.width);
    video_enc.set_height(spec.height);
    video_enc.set_format(Pixel::YUV420P);
    video_enc.set_time_base(out_tb);
    video_enc.set_frame_rate(Some(Rational::new(spec.fps as i32, 1)));
    video_enc.set_bit_rate(0); // CRF controls quality

    let mut opts = ffmpeg::Dictionary::new();
    opts.set("crf", "18");
    opts.set("preset", "fast");
    let mut video_encoder = video_enc
        .open_as_with(vcodec, opts)
        .map_err(|e| ExportError::EncoderFailure(format!("open video encoder: {e}")))?;

    // Square pixels; must be set after open (codec init resets SAR).
    video_encoder.set_aspect_ratio(Rational::new(1, 1));

    unsafe {
        let ret = ffmpeg::ffi::avcodec_parameters_from_context(
            (**(*octx.as_mut_ptr()).streams.add(0)).codecpar,
            video_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
        );
        if ret < 0 {
            return Err(ExportError::EncoderFailure(format!(
                "avcodec_parameters_from_context (video): {ret}"
            )));
        }
    }

    // ── Audio encoder (stream 1) ──────────────────────────────────────────────
    let audio_tb = Rational::new(1, rate as i32);

    let mut ost_audio = octx
        .add_stream(acodec)
        .map_err(|e| ExportError::EncoderFailure(format!("add audio stream: {e}")))?;
    ost_audio.set_time_base(audio_tb);

    let audio_enc_ctx = codec::context::Context::new_with_codec(acodec);
    let mut audio_enc = audio_enc_ctx
        .encoder()
        .audio()
        .map_err(|e| ExportError::EncoderFailure(format!("audio encoder context: {e}")))?;
    audio_enc.set_rate(rate as i32);
    audio_enc.set_ch_layout(ChannelLayout::STEREO);
    audio_enc.set_format(Sample::F32(SampleType::Planar));
    audio_enc.set_bit_rate(spec.bitrate_audio);

    let audio_encoder = audio_enc
        .open_as_with(acodec, ffmpeg::Dictionary::new())
        .map_err(|e| ExportError::EncoderFailure(format!("open audio encoder: {e}")))?;
    let audio_frame_size = (audio_encoder.frame_size() as usize).max(1024);
    let ost_audio_tb = octx.stream(1).unwrap().time_base();

    unsafe {
        let ret = ffmpeg::ffi::avcodec_parameters_from_context(
            (**(*octx.as_mut_ptr()).streams.add(1)).codecpar,
            audio_encoder.as_ptr() as *mut ffmpeg::ffi::AVCodecContext,
        );
        if ret < 0 {
            return Err(ExportError::EncoderFailure(format!(
                "avcodec_parameters_from_context (audio): {ret}"
            )));
        }
    }

    octx.write_header()
        .map_err(|e| ExportError::EncoderFailure(format!("write header: {e}")))?;

    let mut audio_state = AudioEncState {
        encoder:        audio_encoder,
        out_sample_idx: 0,
        frame_size:     audio_frame_size,
        fifo:           AudioFifo::new(),
        rate,
        audio_tb,
        ost_audio_tb,
    };

    // ── Frame loop ────────────────────────────────────────────────────────────
    // One RGBA→YUV scaler reused across every frame.
    let mut scaler = ffmpeg::software::scaling::Context::get(
        Pixel::RGBA,    spec.width, spec.height,
        Pixel::YUV420P, spec.width, spec.height,
        ffmpeg::software::scaling::Flags::BILINEAR,
    )
    .map_err(|e| ExportError::EncoderFailure(format!("create scaler: {e}")))?;

    let mut offline = RasterSurface::new(spec.width, spec.height);
    let ost_video_tb = octx.stream(0).unwrap().time_base();

    for i in 0..total_frames {
        if cancel.load(Ordering::Relaxed) {
            return Err(ExportError::Cancelled);
        }
        let t_ms = (i as i64) * 1000 / spec.fps as i64;
        timeline.render_at(&mut offline, t_ms, false);

        let mut rgba = VideoFrame::new(Pixel::RGBA, spec.width, spec.height);
        {
            let stride = rgba.stride(0);
            let row_bytes = spec.width as usize * 4;
            let src = offline.pixels();
            let dst = rgba.data_mut(0);
            for row in 0..spec.height as usize {
                dst[row * stride..row * stride + row_bytes]
                    .copy_from_slice(&src[row * row_bytes..(row + 1) * row_bytes]);
            }
        }

        let mut yuv = VideoFrame::empty();
        scaler
            .run(&rgba, &mut yuv)
            .map_err(|e| ExportError::EncoderFailure(format!("scale frame: {e}")))?;
        yuv.set_pts(Some(i as i64));
        unsafe {
            (*yuv.as_mut_ptr()).sample_aspect_ratio = ffmpeg::ffi::AVRational { num: 1, den: 1 };
        }

        video_encoder
            .send_frame(&yuv)
            .map_err(|e| ExportError::EncoderFailure(format!("send video frame: {e}")))?;
        let mut pkt = Packet::empty();
        while video_encoder.receive_packet(&mut pkt).is_ok() {
            pkt.set_stream(0);
            pkt.rescale_ts(out_tb, ost_video_tb);
            pkt.write_interleaved(&mut octx)
                .map_err(|e| ExportError::EncoderFailure(format!("write video packet: {e}")))?;
        }

        // Feed this frame's span of the mix and drain full AAC frames.
        let lo = (i as usize) * rate as usize / spec.fps as usize;
        let hi = (i as usize + 1) * rate as usize / spec.fps as usize;
        audio_state.fifo.push_span(&mix, lo, hi);
        audio_state.drain_fifo(&mut octx, false)?;

        if (i + 1) % PROGRESS_INTERVAL == 0 || i + 1 == total_frames {
            let _ = tx.send(MediaResult::ExportProgress {
                job:   spec.job_id,
                frame: i + 1,
                total: total_frames,
            });
        }
    }

    // ── Flush ─────────────────────────────────────────────────────────────────
    video_encoder
        .send_eof()
        .map_err(|e| ExportError::EncoderFailure(format!("video EOF: {e}")))?;
    let mut pkt = Packet::empty();
    while video_encoder.receive_packet(&mut pkt).is_ok() {
        pkt.set_stream(0);
        pkt.rescale_ts(out_tb, ost_video_tb);
        pkt.write_interleaved(&mut octx)
            .map_err(|e| ExportError::EncoderFailure(format!("write flush packet: {e}")))?;
    }

    audio_state.drain_fifo(&mut octx, true)?;
    audio_state.flush_encoder(&mut octx)?;

    octx.write_trailer()
        .map_err(|e| ExportError::EncoderFailure(format!("write trailer: {e}")))?;

    info!(
        "[export] {} frames + {:.2}s audio → {}",
        total_frames,
        mix.duration_s(),
        spec.output.display()
    );
    Ok(())
}
