// crates/layercut-media/src/demux.rs
//
// Progressive frame extraction: source container → decoded RGBA rasters in
// fixed frame-service slots at the engine's internal rate.
//
// Two passes over the source:
//   Pass 1: every k-th slot (k = ceil(fps_internal / first_pass_fps)),
//            after which the layer is usable with placeholder lookups.
//   Pass 2: back-fills the remaining slots at full rate.
//
// Both passes decode sequentially (no per-frame seeking) and map decoded
// PTS → slot index. Frames are sent through a bounded channel; a full
// channel blocks this producer thread, which is the pipeline's
// backpressure. Between chunks the producer sleeps so consumers are never
// starved during a long import.
//
// The seek-capture fallback services sparse slot sets by seeking per slot
// with a hard per-seek deadline; it exists for sources whose streams fail
// mid-file during sequential decode.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, Pixel};
use ffmpeg::media::Type;
use ffmpeg::software::scaling::{context::Context as SwsContext, flag::Flags};
use ffmpeg::util::picture;
use tracing::{debug, warn};
use uuid::Uuid;

use layercut_core::error::SourceIngestError;
use layercut_core::media_types::{IngestPass, MediaResult};
use layercut_core::surface::Raster;
use layercut_core::EngineConfig;

use crate::probe::SourceInfo;

/// Per-seek deadline in the seek-capture fallback.
const SEEK_DEADLINE: Duration = Duration::from_secs(2);

// ── Size guard ────────────────────────────────────────────────────────────────

/// Decode dimensions after the memory cap: estimated uncompressed size
/// `w*h*4*fps*dur` over the cap shrinks both axes by sqrt(est/cap),
/// preserving aspect. Dimensions are kept even for the scaler.
pub fn guarded_decode_size(
    info: &SourceInfo,
    cfg:  &EngineConfig,
) -> Result<(u32, u32), SourceIngestError> {
    let dur_s = info.duration_ms as f64 / 1000.0;
    let est = info.width as u64 * info.height as u64 * 4
        * cfg.fps_internal as u64
        * dur_s.ceil() as u64;
    if est <= cfg.frame_mem_cap_bytes {
        return Ok((info.width & !1, info.height & !1));
    }
    let factor = (est as f64 / cfg.frame_mem_cap_bytes as f64).sqrt();
    let w = ((info.width as f64 / factor) as u32) & !1;
    let h = ((info.height as f64 / factor) as u32) & !1;
    if w < 16 || h < 16 {
        return Err(SourceIngestError::SizeGuardExceeded {
            estimated: est,
            cap:       cfg.frame_mem_cap_bytes,
        });
    }
    warn!("[demux] size guard: {}x{} → {w}x{h} (est {est} B)", info.width, info.height);
    Ok((w, h))
}

// ── Sequential decoder ────────────────────────────────────────────────────────

struct SlotDecoder {
    ictx:      ffmpeg::format::context::Input,
    decoder:   ffmpeg::decoder::video::Video,
    video_idx: usize,
    scaler:    SwsContext,
    tb_num:    i32,
    tb_den:    i32,
    out_w:     u32,
    out_h:     u32,
}

impl SlotDecoder {
    fn open(path: &Path, out_w: u32, out_h: u32) -> Result<Self, SourceIngestError> {
        let ictx = input(path)
            .map_err(|e| SourceIngestError::UnsupportedContainer(e.to_string()))?;
        let video_idx = ictx
            .streams()
            .best(Type::Video)
            .ok_or(SourceIngestError::NoVideoTrack)?
            .index();

        let (tb_num, tb_den) = {
            let tb = ictx.stream(video_idx).unwrap().time_base();
            (tb.numerator(), tb.denominator())
        };

        // Second context for decoder params (Parameters borrows from ictx).
        let ictx2 = input(path)
            .map_err(|e| SourceIngestError::UnsupportedContainer(e.to_string()))?;
        let stream2 = ictx2.stream(video_idx).unwrap();
        let dec_ctx = ffmpeg::codec::context::Context::from_parameters(stream2.parameters())
            .map_err(|e| SourceIngestError::UnsupportedCodec(e.to_string()))?;
        let decoder = dec_ctx
            .decoder()
            .video()
            .map_err(|e| SourceIngestError::UnsupportedCodec(e.to_string()))?;

        let scaler = SwsContext::get(
            decoder.format(), decoder.width(), decoder.height(),
            Pixel::RGBA, out_w, out_h,
            Flags::BILINEAR,
        )
        .map_err(|e| SourceIngestError::DecoderError(e.to_string()))?;

        Ok(Self { ictx, decoder, video_idx, scaler, tb_num, tb_den, out_w, out_h })
    }

    fn pts_to_secs(&self, pts: i64) -> f64 {
        pts as f64 * self.tb_num as f64 / self.tb_den as f64
    }

    /// Decode the next frame. Returns (raster, pts_secs, is_keyframe).
    fn next_frame(&mut self) -> Option<(Raster, f64, bool)> {
        let mut decoded = ffmpeg::util::frame::video::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.scale_out(&decoded);
            }
            let mut advanced = false;
            for result in self.ictx.packets() {
                let Ok((stream, packet)) = result else { continue };
                if stream.index() != self.video_idx {
                    continue;
                }
                if self.decoder.send_packet(&packet).is_err() {
                    continue;
                }
                advanced = true;
                break;
            }
            if !advanced {
                // EOF: flush decoder-held frames (B-frame reordering).
                let _ = self.decoder.send_eof();
                if self.decoder.receive_frame(&mut decoded).is_ok() {
                    return self.scale_out(&decoded);
                }
                return None;
            }
        }
    }

    fn scale_out(&mut self, decoded: &ffmpeg::util::frame::video::Video) -> Option<(Raster, f64, bool)> {
        let pts = decoded.pts().unwrap_or(0);
        let is_key = decoded.kind() == picture::Type::I;
        let mut out = ffmpeg::util::frame::video::Video::empty();
        if self.scaler.run(decoded, &mut out).is_err() {
            return None;
        }
        let stride = out.stride(0);
        let raw = out.data(0);
        let data: Vec<u8> = (0..self.out_h as usize)
            .flat_map(|row| {
                let s = row * stride;
                &raw[s..s + self.out_w as usize * 4]
            })
            .copied()
            .collect();
        Some((Raster::from_rgba(self.out_w, self.out_h, data), self.pts_to_secs(pts), is_key))
    }
}

// ── Extraction passes ─────────────────────────────────────────────────────────

/// Run both progressive passes for `layer`, sending results on `tx`.
/// Terminal for this source on error; the worker discards the layer.
pub fn extract_frames(
    path:   &Path,
    layer:  Uuid,
    info:   &SourceInfo,
    cfg:    &EngineConfig,
    cancel: &Arc<AtomicBool>,
    tx:     &Sender<MediaResult>,
) -> Result<(), SourceIngestError> {
    if !info.has_video {
        return Err(SourceIngestError::NoVideoTrack);
    }
    let (out_w, out_h) = guarded_decode_size(info, cfg)?;
    let total_slots = (info.duration_ms * cfg.fps_internal as i64 / 1000).max(1) as usize;

    let _ = tx.send(MediaResult::SourceMetadata {
        layer,
        duration_ms: info.duration_ms,
        width:       out_w,
        height:      out_h,
        source_fps:  info.fps,
    });

    let mut filled = vec![false; total_slots];
    let stride = cfg.fps_internal.div_ceil(cfg.first_pass_fps).max(1) as usize;

    // Pass 1: reduced rate, layer becomes usable afterwards.
    run_pass(
        path, layer, cfg, cancel, tx,
        out_w, out_h, total_slots, stride, IngestPass::First, &mut filled,
    )?;
    let _ = tx.send(MediaResult::LayerReady { layer });

    // Pass 2: full rate back-fill into the remaining slots.
    run_pass(
        path, layer, cfg, cancel, tx,
        out_w, out_h, total_slots, 1, IngestPass::Second, &mut filled,
    )?;
    let _ = tx.send(MediaResult::FullQuality { layer });
    debug!("[demux] complete: {} slots ← {}", total_slots, path.display());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_pass(
    path:        &Path,
    layer:       Uuid,
    cfg:         &EngineConfig,
    cancel:      &Arc<AtomicBool>,
    tx:          &Sender<MediaResult>,
    out_w:       u32,
    out_h:       u32,
    total_slots: usize,
    stride:      usize,
    pass:        IngestPass,
    filled:      &mut [bool],
) -> Result<(), SourceIngestError> {
    let mut dec = SlotDecoder::open(path, out_w, out_h)?;
    let mut sent_in_chunk = 0usize;
    let mut sent_any = false;

    while let Some((raster, pts_secs, is_key)) = dec.next_frame() {
        if cancel.load(Ordering::Relaxed) {
            return Err(SourceIngestError::DecoderError("cancelled".into()));
        }
        let slot = (pts_secs * cfg.fps_internal as f64).floor() as i64;
        if slot < 0 || slot as usize >= total_slots {
            continue;
        }
        let slot = slot as usize;
        if filled[slot] || slot % stride != 0 {
            continue;
        }
        filled[slot] = true;
        sent_any = true;
        let is_last = slot + stride >= total_slots;
        // A full channel blocks here; that is the decoder backpressure.
        let _ = tx.send(MediaResult::IngestFrame {
            layer,
            index: slot,
            raster: Arc::new(raster),
            anchor: is_key,
            pass,
            total: total_slots,
            is_last,
        });

        sent_in_chunk += 1;
        if sent_in_chunk >= cfg.chunk_size {
            sent_in_chunk = 0;
            std::thread::sleep(Duration::from_millis(cfg.chunk_yield_ms));
        }
    }

    if !sent_any && pass == IngestPass::First {
        return Err(SourceIngestError::DecoderError("no frames decoded".into()));
    }
    Ok(())
}

// ── Seek-capture fallback ─────────────────────────────────────────────────────

/// Capture specific slots by seeking per slot. Seeks are strictly
/// serialized; each one has a hard deadline. A timed-out slot is skipped
/// (the frame service's nearest-previous rule covers it) and reported so
/// the caller can log it.
pub fn seek_capture_frames(
    path:   &PathBuf,
    layer:  Uuid,
    slots:  &[usize],
    cfg:    &EngineConfig,
    out_w:  u32,
    out_h:  u32,
    total:  usize,
    cancel: &Arc<AtomicBool>,
    tx:     &Sender<MediaResult>,
) -> Result<usize, SourceIngestError> {
    let mut captured = 0usize;
    for (i, &slot) in slots.iter().enumerate() {
        if cancel.load(Ordering::Relaxed) {
            break;
        }
        let target_s = slot as f64 / cfg.fps_internal as f64;
        match capture_one(path, target_s, out_w, out_h) {
            Ok((raster, anchor)) => {
                captured += 1;
                let _ = tx.send(MediaResult::IngestFrame {
                    layer,
                    index: slot,
                    raster: Arc::new(raster),
                    anchor,
                    pass: IngestPass::Second,
                    total,
                    is_last: i + 1 == slots.len(),
                });
            }
            Err(SourceIngestError::SeekTimeout { at_ms }) => {
                warn!("[demux] seek timeout at {at_ms} ms, slot {slot} left to placeholder");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(captured)
}

fn capture_one(
    path:     &PathBuf,
    target_s: f64,
    out_w:    u32,
    out_h:    u32,
) -> Result<(Raster, bool), SourceIngestError> {
    let deadline = Instant::now() + SEEK_DEADLINE;
    let mut dec = SlotDecoder::open(path, out_w, out_h)?;

    let seek_ts = (target_s * dec.tb_den as f64 / dec.tb_num as f64) as i64;
    let _ = dec.ictx.seek(seek_ts, ..=seek_ts);

    // Decode forward from the keyframe until we reach the target.
    let mut last: Option<(Raster, bool)> = None;
    while let Some((raster, pts_secs, is_key)) = dec.next_frame() {
        if Instant::now() > deadline {
            return Err(SourceIngestError::SeekTimeout { at_ms: (target_s * 1000.0) as i64 });
        }
        let done = pts_secs >= target_s;
        last = Some((raster, is_key));
        if done {
            break;
        }
    }
    last.ok_or_else(|| SourceIngestError::DecoderError(format!("no frame at t={target_s:.3}")))
}
