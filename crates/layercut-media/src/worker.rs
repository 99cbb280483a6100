// crates/layercut-media/src/worker.rs
//
// MediaWorker: owns the background threads for ingest, export, and frame
// snapshots, and the bounded result channel the engine drains between
// ticks. All public API the engine calls lives here.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{error, info};
use uuid::Uuid;

use layercut_core::error::SourceIngestError;
use layercut_core::media_types::MediaResult;
use layercut_core::project::SourceKind;
use layercut_core::surface::Raster;
use layercut_core::{EngineConfig, Timeline};

use crate::audio::decode_audio;
use crate::demux::extract_frames;
use crate::export::{export_timeline, ExportSpec};
use crate::probe::probe_source;
use crate::remux::fix_duration;
use crate::snapshot::save_frame_png;

/// How many sources decode concurrently. More than this queues behind a
/// gatekeeper thread rather than parking one thread per waiting source.
const INGEST_CONCURRENCY: u32 = 2;

/// Waveform peak buckets delivered with every decoded audio buffer.
const PEAK_BUCKETS: usize = 512;

pub struct MediaWorker {
    /// Shared result channel: ingest frames, audio, export progress.
    /// Bounded: a full channel blocks producers, which is the demux
    /// pipeline's in-flight frame backpressure.
    pub rx: Receiver<MediaResult>,
    tx:     Sender<MediaResult>,

    cfg:            EngineConfig,
    shutdown:       Arc<AtomicBool>,
    /// (active_count, Condvar) semaphore for ingest threads.
    ingest_sem:     Arc<(Mutex<u32>, Condvar)>,
    /// Per-layer ingest cancel flags. Removed when the job finishes.
    ingest_cancels: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
    /// Per-job export cancel flags.
    export_cancels: Arc<Mutex<HashMap<Uuid, Arc<AtomicBool>>>>,
}

impl MediaWorker {
    pub fn new(cfg: EngineConfig) -> Self {
        let (tx, rx) = bounded(512);
        Self {
            rx,
            tx,
            cfg,
            shutdown:       Arc::new(AtomicBool::new(false)),
            ingest_sem:     Arc::new((Mutex::new(0), Condvar::new())),
            ingest_cancels: Arc::new(Mutex::new(HashMap::new())),
            export_cancels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for flag in self.ingest_cancels.lock().unwrap().values() {
            flag.store(true, Ordering::Relaxed);
        }
        for flag in self.export_cancels.lock().unwrap().values() {
            flag.store(true, Ordering::Relaxed);
        }
    }

    // ── Ingest ────────────────────────────────────────────────────────────────

    /// Decode `path` into layer `layer` on a background thread. Results
    /// stream over `rx`; errors are terminal for this source only.
    pub fn ingest(&self, layer: Uuid, path: PathBuf, kind: SourceKind) {
        let tx = self.tx.clone();
        let sd = self.shutdown.clone();
        let sem = self.ingest_sem.clone();
        let cfg = self.cfg.clone();
        let cancel = Arc::new(AtomicBool::new(false));
        self.ingest_cancels.lock().unwrap().insert(layer, Arc::clone(&cancel));
        let cancels_ref = Arc::clone(&self.ingest_cancels);

        // Gatekeeper thread acquires the semaphore before the real work so
        // at most INGEST_CONCURRENCY + 1 threads exist at a time.
        thread::spawn(move || {
            {
                let (lock, cvar) = &*sem;
                let mut count = lock.lock().unwrap();
                while *count >= INGEST_CONCURRENCY {
                    count = cvar.wait(count).unwrap();
                }
                *count += 1;
            }
            struct SemGuard(Arc<(Mutex<u32>, Condvar)>);
            impl Drop for SemGuard {
                fn drop(&mut self) {
                    let (lock, cvar) = &*self.0;
                    *lock.lock().unwrap() -= 1;
                    cvar.notify_one();
                }
            }
            let _guard = SemGuard(sem);

            if sd.load(Ordering::Relaxed) {
                return;
            }
            let result = match kind {
                SourceKind::Video => ingest_video(&path, layer, &cfg, &cancel, &tx),
                SourceKind::Audio => ingest_audio(&path, layer, &cfg, &tx),
                SourceKind::Image => ingest_image(&path, layer, &tx),
            };
            if let Err(e) = result {
                error!("[worker] ingest failed for {}: {e}", path.display());
                let _ = tx.send(MediaResult::IngestError { layer, error: e });
            }
            cancels_ref.lock().unwrap().remove(&layer);
        });
    }

    /// Abandon an in-flight ingest (layer was removed mid-load).
    pub fn cancel_ingest(&self, layer: Uuid) {
        if let Some(flag) = self.ingest_cancels.lock().unwrap().get(&layer) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    // ── Export ────────────────────────────────────────────────────────────────

    /// Spawn a background thread to export `timeline` (a snapshot clone;
    /// the live timeline is never touched off-thread).
    pub fn start_export(&self, timeline: Timeline, spec: ExportSpec) {
        let job_id = spec.job_id;
        let cancel = Arc::new(AtomicBool::new(false));
        let tx = self.tx.clone();
        let sd = self.shutdown.clone();
        let cfg = self.cfg.clone();

        // Register before spawning so cancel_export can never miss the flag.
        self.export_cancels.lock().unwrap().insert(job_id, Arc::clone(&cancel));
        let cancels_ref = Arc::clone(&self.export_cancels);

        thread::spawn(move || {
            if sd.load(Ordering::Relaxed) {
                let _ = tx.send(MediaResult::ExportFailed {
                    job:   job_id,
                    error: layercut_core::error::ExportError::Cancelled,
                });
                return;
            }
            info!("[worker] export {job_id} started → {}", spec.output.display());
            export_timeline(timeline, spec, cfg, cancel, tx);
            cancels_ref.lock().unwrap().remove(&job_id);
        });
    }

    /// Signal the export job to stop after its current frame.
    pub fn cancel_export(&self, job_id: Uuid) {
        if let Some(flag) = self.export_cancels.lock().unwrap().get(&job_id) {
            flag.store(true, Ordering::Relaxed);
        }
    }

    // ── Snapshots ─────────────────────────────────────────────────────────────

    pub fn save_frame(&self, mut timeline: Timeline, t_ms: i64, dest: PathBuf) {
        let tx = self.tx.clone();
        thread::spawn(move || match save_frame_png(&mut timeline, t_ms, &dest) {
            Ok(()) => {
                let _ = tx.send(MediaResult::FrameSaved { path: dest });
            }
            Err(e) => error!("[worker] save_frame: {e}"),
        });
    }
}

// ── Per-kind ingest bodies ────────────────────────────────────────────────────

fn ingest_video(
    path:   &PathBuf,
    layer:  Uuid,
    cfg:    &EngineConfig,
    cancel: &Arc<AtomicBool>,
    tx:     &Sender<MediaResult>,
) -> Result<(), SourceIngestError> {
    match probe_source(path) {
        Ok(info) => extract_frames(path, layer, &info, cfg, cancel, tx),
        // Recorded sources often lack a finalized duration header; a
        // stream-copy remux repairs the container without re-encoding.
        Err(SourceIngestError::DecoderError(msg)) if msg.contains("duration") => {
            let (_tmp, fixed) = fix_duration(path)?;
            let info = probe_source(&fixed)?;
            extract_frames(&fixed, layer, &info, cfg, cancel, tx)
        }
        Err(e) => Err(e),
    }
}

fn ingest_audio(
    path:  &PathBuf,
    layer: Uuid,
    cfg:   &EngineConfig,
    tx:    &Sender<MediaResult>,
) -> Result<(), SourceIngestError> {
    let buf = decode_audio(path, cfg.audio_sample_rate, cfg.audio_channels)
        .map_err(|e| SourceIngestError::DecoderError(e.to_string()))?;
    let peaks = buf.peaks(PEAK_BUCKETS);
    let _ = tx.send(MediaResult::AudioDecoded { layer, buffer: Arc::new(buf) });
    let _ = tx.send(MediaResult::Peaks { layer, peaks });
    Ok(())
}

fn ingest_image(
    path:  &PathBuf,
    layer: Uuid,
    tx:    &Sender<MediaResult>,
) -> Result<(), SourceIngestError> {
    let img = image::open(path)
        .map_err(|e| SourceIngestError::DecoderError(e.to_string()))?
        .to_rgba8();
    let (w, h) = (img.width(), img.height());
    let raster = Raster::from_rgba(w, h, img.into_raw());
    let _ = tx.send(MediaResult::ImageDecoded { layer, raster: Arc::new(raster) });
    Ok(())
}
