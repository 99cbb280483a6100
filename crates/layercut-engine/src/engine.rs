// crates/layercut-engine/src/engine.rs
//
// Engine: the single value that owns the timeline, the media worker, the
// playback clock, the live audio output, and the output surface. The
// control surface is plain method calls; callers that prefer a queue push
// EngineCommands and the engine drains them at the top of each tick,
// which is also what makes edits atomic with respect to rendering: worker
// results and commands are only applied between ticks, so a render tick
// always observes a stable timeline.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};
use uuid::Uuid;

use layercut_core::commands::EngineCommand;
use layercut_core::error::{EditError, SourceIngestError};
use layercut_core::layer::{LayerKind, MediaLayer, TransformChange};
use layercut_core::media_types::MediaResult;
use layercut_core::project::{
    self, apply_saved_frames, source_kind_from_ext, FrameTuple, LayerDescriptor, SourceKind,
};
use layercut_core::surface::RasterSurface;
use layercut_core::timeline::{AspectRatio, RemoveScope, ResizeSide};
use layercut_core::{EngineConfig, Timeline};
use layercut_media::{ExportSpec, MediaWorker};

use crate::audio_out::LiveAudioOutput;
use crate::fonts;
use crate::scheduler::PlaybackClock;

pub struct Engine {
    cfg:      EngineConfig,
    timeline: Timeline,
    worker:   MediaWorker,
    clock:    PlaybackClock,
    audio:    LiveAudioOutput,
    output:   RasterSurface,
    font:     Option<Arc<fontdue::Font>>,

    queue: Vec<EngineCommand>,
    /// Audio layers already scheduled this playback session.
    started_audio: HashSet<Uuid>,
    /// Saved transform arrays waiting for their layer's ingest to finish.
    pending_frames: HashMap<Uuid, Vec<FrameTuple>>,
    /// Waveform peaks per audio layer, for display queries.
    peaks: HashMap<Uuid, Vec<f32>>,
    ingest_errors: Vec<(Uuid, SourceIngestError)>,

    export_job:      Option<Uuid>,
    export_progress: Option<(u64, u64)>,
    export_done:     Option<PathBuf>,
    export_error:    Option<String>,
}

impl Engine {
    pub fn new(cfg: EngineConfig) -> Self {
        let timeline = Timeline::default();
        let (w, h) = timeline.surface_size();
        Self {
            worker:          MediaWorker::new(cfg.clone()),
            timeline,
            clock:           PlaybackClock::new(),
            audio:           LiveAudioOutput::new(),
            output:          RasterSurface::new(w, h),
            font:            fonts::load_default_font(),
            cfg,
            queue:           Vec::new(),
            started_audio:   HashSet::new(),
            pending_frames:  HashMap::new(),
            peaks:           HashMap::new(),
            ingest_errors:   Vec::new(),
            export_job:      None,
            export_progress: None,
            export_done:     None,
            export_error:    None,
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn timeline(&self) -> &Timeline { &self.timeline }

    pub fn output(&self) -> &RasterSurface { &self.output }

    pub fn is_playing(&self) -> bool { self.timeline.playing }

    pub fn time_ms(&self) -> i64 { self.timeline.time_ms }

    pub fn peaks(&self, layer: Uuid) -> Option<&[f32]> {
        self.peaks.get(&layer).map(|p| p.as_slice())
    }

    pub fn export_status(&self) -> Option<(u64, u64)> { self.export_progress }

    pub fn export_done(&self) -> Option<&PathBuf> { self.export_done.as_ref() }

    pub fn export_error(&self) -> Option<&str> { self.export_error.as_deref() }

    pub fn take_ingest_errors(&mut self) -> Vec<(Uuid, SourceIngestError)> {
        std::mem::take(&mut self.ingest_errors)
    }

    pub fn set_font(&mut self, font: Arc<fontdue::Font>) {
        self.font = Some(font);
    }

    pub fn shutdown(&self) {
        self.worker.shutdown();
    }

    // ── Playback ──────────────────────────────────────────────────────────────

    pub fn play(&mut self, now: Instant) {
        let total = self.timeline.total_time_ms();
        // Play at the very end restarts from the top.
        if total > 0 && self.timeline.time_ms >= total {
            self.timeline.time_ms = 0;
        }
        self.timeline.playing = true;
        self.clock.start(now, self.timeline.time_ms);
        self.audio.stop_all();
        self.started_audio.clear();
    }

    pub fn pause(&mut self, now: Instant) {
        self.clock.stop(now, self.timeline.total_time_ms());
        self.timeline.playing = false;
        self.audio.stop_all();
        self.started_audio.clear();
    }

    /// Jump the project clock. Playing audio stops; if still playing, the
    /// next tick reschedules sources from the new offset.
    pub fn seek(&mut self, now: Instant, t_ms: i64) {
        let t = t_ms.clamp(0, self.timeline.total_time_ms());
        self.timeline.time_ms = t;
        self.clock.seek(now, t);
        self.audio.stop_all();
        self.started_audio.clear();
    }

    /// Advance and render one tick. Call this at the display refresh.
    /// Order: queued commands, worker results, clock, render, audio.
    pub fn tick(&mut self, now: Instant) {
        let queued = std::mem::take(&mut self.queue);
        for cmd in queued {
            self.process_command(cmd, now);
        }
        self.pump();

        let total = self.timeline.total_time_ms();
        if self.timeline.playing {
            self.timeline.time_ms = self.clock.current(now, total);
        }
        let t = self.timeline.time_ms;
        let playing = self.timeline.playing;

        self.timeline.render_at(&mut self.output, t, playing);

        if playing {
            self.dispatch_audio(t);
            if total > 0 && t >= total {
                self.pause(now);
            }
        }
    }

    /// Start every visible, not-yet-started audio layer at the right
    /// offset. At most one start per layer per playback session.
    fn dispatch_audio(&mut self, t_ms: i64) {
        let mut to_start: Vec<(Uuid, Arc<layercut_core::audio::AudioBuffer>, f32, f64)> =
            Vec::new();
        for layer in self.timeline.layers() {
            if !layer.base.ready || !layer.is_visible(t_ms) {
                continue;
            }
            let LayerKind::Audio(a) = &layer.kind else { continue };
            let Some(buf) = &a.buffer else { continue };
            if self.started_audio.contains(&layer.id()) {
                continue;
            }
            let offset_s = (t_ms - layer.base.start_time_ms) as f64 / 1000.0;
            to_start.push((layer.id(), buf.clone(), layer.speed(), offset_s));
        }
        for (id, buf, speed, offset) in to_start {
            // Mark even on failure (no device) so we don't retry every tick.
            self.started_audio.insert(id);
            if let Err(e) = self.audio.start_layer(id, &buf, speed, offset) {
                warn!("[engine] audio start failed for {id}: {e}");
            }
        }
    }

    // ── Command queue ─────────────────────────────────────────────────────────

    pub fn submit(&mut self, cmd: EngineCommand) {
        self.queue.push(cmd);
    }

    fn process_command(&mut self, cmd: EngineCommand, now: Instant) {
        use EngineCommand::*;
        let result: Result<(), EditError> = match cmd {
            Play => {
                self.play(now);
                Ok(())
            }
            Pause => {
                self.pause(now);
                Ok(())
            }
            Seek(t) => {
                self.seek(now, t);
                Ok(())
            }
            AddSource(path) => {
                if let Err(e) = self.add_source(&path) {
                    warn!("[engine] add_source {}: {e}", path.display());
                }
                Ok(())
            }
            AddText(text) => {
                self.add_text(text);
                Ok(())
            }
            RemoveLayer(id) => self.remove_layer(id),
            CloneLayer(id) => self.timeline.clone_layer(id).map(|_| ()),
            SplitLayer { id, t_ms } => self.timeline.split(id, t_ms).map(|_| ()),
            ReorderLayer { id, new_index } => self.timeline.reorder(id, new_index),
            SelectLayer(Some(id)) => self.timeline.select(id),
            SelectLayer(None) => {
                self.timeline.deselect();
                Ok(())
            }
            MoveLayer { id, delta_ms } => self.timeline.move_layer(id, delta_ms),
            ResizeLayer { id, delta_ms, side } => self.timeline.resize(id, delta_ms, side),
            SetSpeed { id, speed } => self.set_speed(id, speed),
            SetTransform { id, change } => self.set_transform(id, change),
            RemoveInterval { t0_ms, t1_ms, scope } => {
                self.remove_interval(t0_ms, t1_ms, scope).map(|_| ())
            }
            SetAspectRatio(a) => {
                self.set_aspect_ratio(a);
                Ok(())
            }
            Export { output, width, height, fps } => {
                self.export(width, height, fps, output);
                Ok(())
            }
            CancelExport(job) => {
                self.worker.cancel_export(job);
                Ok(())
            }
            SaveFramePng { t_ms, path } => {
                self.save_frame_png(t_ms, path);
                Ok(())
            }
        };
        if let Err(e) = result {
            warn!("[engine] command failed: {e}");
        }
    }

    // ── Sources ───────────────────────────────────────────────────────────────

    /// Ingest a source file: the layer appears immediately (not ready) and
    /// is populated by worker results. Returns the new layer id.
    pub fn add_source(&mut self, path: &Path) -> Result<Uuid, SourceIngestError> {
        let ext = path.extension().unwrap_or_default().to_string_lossy();
        let kind = source_kind_from_ext(&ext).ok_or_else(|| {
            SourceIngestError::UnsupportedContainer(format!("unknown extension: {ext}"))
        })?;
        let name = path.file_name().unwrap_or_default().to_string_lossy().to_string();
        let fps = self.cfg.fps_internal;

        let layer = match kind {
            SourceKind::Video => MediaLayer::video(name, fps),
            SourceKind::Audio => MediaLayer::audio(name, fps),
            SourceKind::Image => {
                // Placeholder raster until the decode result lands.
                let mut l = MediaLayer::image(
                    name,
                    fps,
                    Arc::new(layercut_core::surface::Raster::new(1, 1)),
                );
                l.base.ready = false;
                l
            }
        };
        let id = self.timeline.add(layer);
        self.worker.ingest(id, path.to_path_buf(), kind);
        info!("[engine] ingest started: {} → layer {id}", path.display());
        Ok(id)
    }

    pub fn add_text(&mut self, text: impl Into<String>) -> Uuid {
        let layer = MediaLayer::text(text, self.cfg.fps_internal, self.font.clone());
        self.timeline.add(layer)
    }

    pub fn remove_layer(&mut self, id: Uuid) -> Result<(), EditError> {
        self.worker.cancel_ingest(id);
        self.audio.stop_layer(id);
        let removed = self.timeline.remove(id)?;
        if let LayerKind::Audio(a) = &removed.kind {
            if let Some(buf) = &a.buffer {
                self.audio.purge_stretch(buf.id);
            }
        }
        self.peaks.remove(&id);
        self.pending_frames.remove(&id);
        Ok(())
    }

    // ── Edits ─────────────────────────────────────────────────────────────────

    pub fn select(&mut self, id: Uuid) -> Result<(), EditError> {
        self.timeline.select(id)
    }

    pub fn deselect(&mut self) {
        self.timeline.deselect();
    }

    pub fn reorder(&mut self, id: Uuid, new_index: usize) -> Result<(), EditError> {
        self.timeline.reorder(id, new_index)
    }

    pub fn move_layer(&mut self, id: Uuid, delta_ms: i64) -> Result<(), EditError> {
        self.timeline.move_layer(id, delta_ms)
    }

    pub fn resize_layer(
        &mut self,
        id: Uuid,
        delta_ms: i64,
        side: ResizeSide,
    ) -> Result<(), EditError> {
        self.timeline.resize(id, delta_ms, side)
    }

    pub fn split_layer(&mut self, id: Uuid, t_ms: i64) -> Result<Uuid, EditError> {
        self.timeline.split(id, t_ms)
    }

    pub fn clone_layer(&mut self, id: Uuid) -> Result<Uuid, EditError> {
        self.timeline.clone_layer(id)
    }

    pub fn set_speed(&mut self, id: Uuid, speed: f32) -> Result<(), EditError> {
        let layer = self.timeline.layer_mut(id).ok_or(EditError::NoSuchLayer)?;
        layer.set_speed(speed)?;
        // A mid-session speed change restarts the layer's audio on the
        // next tick with the stretched buffer.
        self.audio.stop_layer(id);
        self.started_audio.remove(&id);
        Ok(())
    }

    pub fn set_transform(&mut self, id: Uuid, change: TransformChange) -> Result<(), EditError> {
        let t = self.timeline.time_ms;
        let layer = self.timeline.layer_mut(id).ok_or(EditError::NoSuchLayer)?;
        layer.apply_change(change, t);
        Ok(())
    }

    pub fn remove_interval(
        &mut self,
        t0_ms: i64,
        t1_ms: i64,
        scope: RemoveScope,
    ) -> Result<usize, EditError> {
        self.timeline.remove_interval(t0_ms, t1_ms, scope)
    }

    pub fn set_aspect_ratio(&mut self, aspect: AspectRatio) {
        self.timeline.set_aspect(aspect);
        let (w, h) = self.timeline.surface_size();
        self.output.resize(w, h);
    }

    // ── Export ────────────────────────────────────────────────────────────────

    /// Kick off a deterministic offline export of the current composition.
    /// The live session stays fully usable while it runs.
    pub fn export(&mut self, width: u32, height: u32, fps: u32, output: PathBuf) -> Uuid {
        let job_id = Uuid::new_v4();
        let spec = ExportSpec::new(job_id, width, height, fps, output);
        self.export_job = Some(job_id);
        self.export_progress = Some((0, 0));
        self.export_done = None;
        self.export_error = None;
        self.worker.start_export(self.timeline.clone(), spec);
        job_id
    }

    pub fn cancel_export(&mut self) {
        if let Some(job) = self.export_job {
            self.worker.cancel_export(job);
        }
    }

    pub fn save_frame_png(&mut self, t_ms: i64, path: PathBuf) {
        self.worker.save_frame(self.timeline.clone(), t_ms, path);
    }

    // ── Project files ─────────────────────────────────────────────────────────

    pub fn save_project(&self) -> Result<String, serde_json::Error> {
        project::serialize_project(&self.timeline)
    }

    pub fn load_project_file(&mut self, path: &Path) -> anyhow::Result<usize> {
        let json = std::fs::read_to_string(path)?;
        Ok(self.load_project(&json)?)
    }

    /// Rebuild a timeline from a project file. Media layers re-ingest from
    /// their `uri`; saved transforms are applied when ingest completes.
    /// Returns how many descriptors were loaded; unknown types are skipped
    /// with a warning.
    pub fn load_project(&mut self, json: &str) -> Result<usize, serde_json::Error> {
        let descriptors = project::parse_project(json)?;
        let mut loaded = 0usize;
        for d in descriptors {
            match self.load_descriptor(&d) {
                Some(()) => loaded += 1,
                None => warn!("[engine] skipping unknown layer type '{}' ({})", d.kind, d.name),
            }
        }
        Ok(loaded)
    }

    fn load_descriptor(&mut self, d: &LayerDescriptor) -> Option<()> {
        match d.kind.as_str() {
            "VideoLayer" | "AudioLayer" | "ImageLayer" => {
                let uri = d.uri.as_ref()?;
                let id = match self.add_source(Path::new(uri)) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!("[engine] project source '{uri}': {e}");
                        return Some(()); // known type; the source itself failed
                    }
                };
                if let Some(layer) = self.timeline.layer_mut(id) {
                    layer.base.start_time_ms = d.start_time;
                }
                if let Some(frames) = &d.frames {
                    self.pending_frames.insert(id, frames.clone());
                }
                Some(())
            }
            "TextLayer" => {
                let id = self.add_text(d.name.clone());
                if let Some(layer) = self.timeline.layer_mut(id) {
                    layer.base.start_time_ms = d.start_time;
                    let delta = d.total_time - layer.base.total_time_ms;
                    if delta != 0 {
                        let _ = layer.adjust_total_time(delta);
                    }
                    if let Some(frames) = &d.frames {
                        apply_saved_frames(layer, frames);
                    }
                }
                Some(())
            }
            _ => None,
        }
    }

    // ── Worker results ────────────────────────────────────────────────────────

    /// Drain every pending worker result. Runs between renders only.
    pub fn pump(&mut self) {
        loop {
            let result = match self.worker.rx.try_recv() {
                Ok(r) => r,
                Err(_) => break,
            };
            self.handle_result(result);
        }
    }

    fn handle_result(&mut self, result: MediaResult) {
        match result {
            MediaResult::SourceMetadata { layer, duration_ms, width, height, source_fps } => {
                if let Some(l) = self.timeline.layer_mut(layer) {
                    l.begin_video_ingest(duration_ms, width, height, source_fps);
                }
            }
            MediaResult::IngestFrame { layer, index, raster, anchor, .. } => {
                if let Some(l) = self.timeline.layer_mut(layer) {
                    l.set_ingest_frame(index, raster, anchor);
                }
            }
            MediaResult::LayerReady { layer } => {
                let pending = self.pending_frames.remove(&layer);
                if let Some(l) = self.timeline.layer_mut(layer) {
                    l.mark_ready();
                    if let Some(frames) = pending {
                        apply_saved_frames(l, &frames);
                    }
                    info!("[engine] layer {layer} ready");
                }
            }
            MediaResult::FullQuality { layer } => {
                if let Some(l) = self.timeline.layer_mut(layer) {
                    l.mark_dirty();
                    info!("[engine] layer {layer} at full quality");
                }
            }
            MediaResult::AudioDecoded { layer, buffer } => {
                let pending = self.pending_frames.remove(&layer);
                if let Some(l) = self.timeline.layer_mut(layer) {
                    l.attach_audio_buffer(buffer);
                    if let Some(frames) = pending {
                        apply_saved_frames(l, &frames);
                    }
                }
            }
            MediaResult::ImageDecoded { layer, raster } => {
                let pending = self.pending_frames.remove(&layer);
                if let Some(l) = self.timeline.layer_mut(layer) {
                    l.base.width = raster.width;
                    l.base.height = raster.height;
                    if let LayerKind::Image(s) = &mut l.kind {
                        s.raster = raster;
                    }
                    l.base.ready = true;
                    l.mark_dirty();
                    if let Some(frames) = pending {
                        apply_saved_frames(l, &frames);
                    }
                }
            }
            MediaResult::Peaks { layer, peaks } => {
                self.peaks.insert(layer, peaks);
            }
            MediaResult::IngestError { layer, error } => {
                // Terminal for this source only: discard the half-built
                // layer, keep the project intact.
                warn!("[engine] ingest error on {layer}: {error}");
                let _ = self.timeline.remove(layer);
                self.pending_frames.remove(&layer);
                self.ingest_errors.push((layer, error));
            }
            MediaResult::ExportProgress { job, frame, total } => {
                if self.export_job == Some(job) {
                    self.export_progress = Some((frame, total));
                }
            }
            MediaResult::ExportDone { job, path } => {
                if self.export_job == Some(job) {
                    self.export_job = None;
                    self.export_progress = None;
                    self.export_done = Some(path);
                }
            }
            MediaResult::ExportFailed { job, error } => {
                if self.export_job == Some(job) {
                    self.export_job = None;
                    self.export_progress = None;
                    self.export_error = Some(error.to_string());
                }
            }
            MediaResult::FrameSaved { path } => {
                info!("[engine] frame saved → {}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercut_core::surface::Raster;
    use std::time::Duration;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default())
    }

    fn add_still(e: &mut Engine, duration_ms: i64) -> Uuid {
        let layer = MediaLayer::image(
            "still",
            e.cfg.fps_internal,
            Arc::new(Raster::solid(4, 4, [8, 8, 8, 255])),
        );
        let id = e.timeline.add(layer);
        let delta = duration_ms - e.timeline.layer(id).unwrap().base.total_time_ms;
        if delta != 0 {
            e.timeline.resize(id, delta, ResizeSide::End).unwrap();
        }
        id
    }

    #[test]
    fn sequential_playback_renders_the_right_layer() {
        let mut e = engine();
        let a = add_still(&mut e, 3000);
        e.timeline.time_ms = 3000;
        let b = add_still(&mut e, 2000);
        assert_eq!(e.timeline.total_time_ms(), 5000);

        let t0 = Instant::now();
        e.timeline.time_ms = 0;
        e.play(t0);
        for (dt, want) in [(0u64, a), (1500, a), (2999, a), (3000, b), (3500, b), (4999, b)] {
            e.tick(t0 + Duration::from_millis(dt));
            assert_eq!(e.timeline().visible_at(e.time_ms()), vec![want], "dt={dt}");
        }
    }

    #[test]
    fn playback_stops_at_total_time() {
        let mut e = engine();
        add_still(&mut e, 2000);
        let t0 = Instant::now();
        e.play(t0);
        e.tick(t0 + Duration::from_millis(2500));
        assert!(!e.is_playing());
        assert_eq!(e.time_ms(), 2000);
    }

    #[test]
    fn play_at_end_restarts_from_zero() {
        let mut e = engine();
        add_still(&mut e, 1000);
        e.timeline.time_ms = 1000;
        let t0 = Instant::now();
        e.play(t0);
        assert_eq!(e.time_ms(), 0);
        assert!(e.is_playing());
    }

    #[test]
    fn seek_clamps_and_clears_audio_session() {
        let mut e = engine();
        add_still(&mut e, 2000);
        e.started_audio.insert(Uuid::new_v4());
        let t0 = Instant::now();
        e.seek(t0, 99_999);
        assert_eq!(e.time_ms(), 2000);
        assert!(e.started_audio.is_empty());
    }

    #[test]
    fn queued_commands_apply_on_tick() {
        let mut e = engine();
        let id = add_still(&mut e, 2000);
        e.submit(EngineCommand::SplitLayer { id, t_ms: 500 });
        e.submit(EngineCommand::SelectLayer(Some(id)));
        e.tick(Instant::now());
        assert_eq!(e.timeline().layers().len(), 2);
        assert_eq!(e.timeline().selected(), Some(id));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let mut e = engine();
        let err = e.add_source(Path::new("notes.txt")).unwrap_err();
        assert!(matches!(err, SourceIngestError::UnsupportedContainer(_)));
        assert!(e.timeline().is_empty());
    }

    #[test]
    fn text_project_round_trip() {
        let mut e = engine();
        let id = e.add_text("hello world");
        e.timeline.move_layer(id, 1200).unwrap();
        let json = e.save_project().unwrap();

        let mut e2 = engine();
        let loaded = e2.load_project(&json).unwrap();
        assert_eq!(loaded, 1);
        let layer = &e2.timeline().layers()[0];
        assert_eq!(layer.base.name, "hello world");
        assert_eq!(layer.base.start_time_ms, 1200);
        assert_eq!(layer.base.total_time_ms, 5000);
    }

    #[test]
    fn unknown_project_type_is_skipped() {
        let mut e = engine();
        let json = r#"[{ "type": "HologramLayer", "name": "x", "width": 0, "height": 0,
                         "start_time": 0, "total_time": 1000 }]"#;
        let loaded = e.load_project(json).unwrap();
        assert_eq!(loaded, 0);
        assert!(e.timeline().is_empty());
    }

    #[test]
    fn aspect_change_resizes_output_surface() {
        let mut e = engine();
        e.set_aspect_ratio(AspectRatio::OneOne);
        assert_eq!((e.output().width(), e.output().height()), (960, 960));
    }

    #[test]
    fn render_tick_is_idempotent_without_edits() {
        let mut e = engine();
        add_still(&mut e, 2000);
        let t0 = Instant::now();
        e.tick(t0);
        let first: Vec<u8> = e.output().pixels().to_vec();
        e.tick(t0 + Duration::from_millis(5));
        assert_eq!(e.output().pixels(), &first[..]);
    }
}
