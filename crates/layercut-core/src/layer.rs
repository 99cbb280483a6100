// crates/layercut-core/src/layer.rs
//
// MediaLayer: one content-bearing track on the timeline. A tagged sum over
// {Video, Audio, Image, Text} with a shared base. Every variant owns a
// frame service, a render surface, and a speed controller; variant state
// carries the decoded carriers. The timeline owns its layers exclusively;
// clones deep-copy transforms and share carriers by Arc.

use std::sync::Arc;

use uuid::Uuid;

use crate::audio::AudioBuffer;
use crate::error::EditError;
use crate::frame::Frame;
use crate::frame_service::FrameService;
use crate::speed::SpeedController;
use crate::surface::{BlitTransform, Raster, RasterSurface};

/// Default on-timeline duration for content without intrinsic length
/// (stills, text).
pub const DEFAULT_STILL_MS: i64 = 5000;

// ── Shared base ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct LayerBase {
    pub id:            Uuid,
    pub name:          String,
    pub start_time_ms: i64,
    pub total_time_ms: i64,
    /// Intrinsic content size (aspect source for the letterbox fit).
    pub width:         u32,
    pub height:        u32,
    pub ready:         bool,
    pub frames:        FrameService,
    pub speed:         SpeedController,
    pub surface:       RasterSurface,
    /// Render idempotence cache: same time + not dirty → re-blit only.
    last_rendered_ms:  Option<i64>,
    dirty:             bool,
}

impl LayerBase {
    fn new(name: String, fps: u32, duration_ms: i64, prefilled: bool) -> Self {
        Self {
            id:               Uuid::new_v4(),
            name,
            start_time_ms:    0,
            total_time_ms:    duration_ms,
            width:            0,
            height:           0,
            ready:            false,
            frames:           FrameService::new(duration_ms, fps, prefilled),
            speed:            SpeedController::new(),
            surface:          RasterSurface::new(0, 0),
            last_rendered_ms: None,
            dirty:            true,
        }
    }
}

// ── Variant state ─────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct VideoState {
    pub source_fps: f32,
}

#[derive(Clone, Debug)]
pub struct AudioState {
    pub buffer:            Option<Arc<AudioBuffer>>,
    /// Duration before any speed was applied.
    pub original_total_ms: i64,
}

#[derive(Clone, Debug)]
pub struct ImageState {
    pub raster: Arc<Raster>,
}

#[derive(Clone)]
pub struct TextState {
    pub text:    String,
    pub color:   [u8; 4],
    pub shadow:  bool,
    pub font_px: f32,
    pub font:    Option<Arc<fontdue::Font>>,
    /// Lazily rasterized text image; cleared whenever text or style change.
    cached:      Option<Arc<Raster>>,
}

impl std::fmt::Debug for TextState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextState")
            .field("text", &self.text)
            .field("color", &self.color)
            .field("shadow", &self.shadow)
            .field("font_px", &self.font_px)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub enum LayerKind {
    Video(VideoState),
    Audio(AudioState),
    Image(ImageState),
    Text(TextState),
}

impl LayerKind {
    pub fn tag(&self) -> &'static str {
        match self {
            LayerKind::Video(_) => "VideoLayer",
            LayerKind::Audio(_) => "AudioLayer",
            LayerKind::Image(_) => "ImageLayer",
            LayerKind::Text(_)  => "TextLayer",
        }
    }
}

// ── Transform change ──────────────────────────────────────────────────────────

/// Deltas applied uniformly to every frame of the layer. `ref_time` on
/// `apply_change` is accepted but ignored; changes are global to the
/// layer, matching observed behavior.
#[derive(Clone, Copy, Debug, Default)]
pub struct TransformChange {
    pub dx:        Option<f32>,
    pub dy:        Option<f32>,
    pub dscale:    Option<f32>,
    pub drotation: Option<f32>,
}

// ── MediaLayer ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct MediaLayer {
    pub base: LayerBase,
    pub kind: LayerKind,
}

impl MediaLayer {
    // ── Constructors ──────────────────────────────────────────────────────────

    /// A video layer awaiting demux. Not ready until the first pass lands.
    pub fn video(name: impl Into<String>, fps: u32) -> Self {
        Self {
            base: LayerBase::new(name.into(), fps, 0, false),
            kind: LayerKind::Video(VideoState { source_fps: 0.0 }),
        }
    }

    /// An audio layer awaiting decode.
    pub fn audio(name: impl Into<String>, fps: u32) -> Self {
        Self {
            base: LayerBase::new(name.into(), fps, 0, false),
            kind: LayerKind::Audio(AudioState { buffer: None, original_total_ms: 0 }),
        }
    }

    /// An image layer: ready immediately, transforms only.
    pub fn image(name: impl Into<String>, fps: u32, raster: Arc<Raster>) -> Self {
        let mut base = LayerBase::new(name.into(), fps, DEFAULT_STILL_MS, true);
        base.width = raster.width;
        base.height = raster.height;
        base.ready = true;
        Self { base, kind: LayerKind::Image(ImageState { raster }) }
    }

    /// A text layer; the raster is produced on demand from the string.
    pub fn text(text: impl Into<String>, fps: u32, font: Option<Arc<fontdue::Font>>) -> Self {
        let text = text.into();
        let mut base = LayerBase::new(text.clone(), fps, DEFAULT_STILL_MS, true);
        base.ready = true;
        let state = TextState {
            text,
            color: [255, 255, 255, 255],
            shadow: false,
            font_px: 48.0,
            font,
            cached: None,
        };
        let mut layer = Self { base, kind: LayerKind::Text(state) };
        layer.refresh_text_size();
        layer
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn id(&self) -> Uuid { self.base.id }

    pub fn is_audio(&self) -> bool { matches!(self.kind, LayerKind::Audio(_)) }

    pub fn is_video(&self) -> bool { matches!(self.kind, LayerKind::Video(_)) }

    pub fn end_time_ms(&self) -> i64 { self.base.start_time_ms + self.base.total_time_ms }

    /// Visibility window: start <= t < start + total.
    pub fn is_visible(&self, t_ms: i64) -> bool {
        self.base.start_time_ms <= t_ms && t_ms < self.end_time_ms()
    }

    pub fn mark_dirty(&mut self) {
        self.base.dirty = true;
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Size the layer's own render surface to the output canvas and reset
    /// the render cache. Called on add and on aspect-ratio change.
    pub fn init(&mut self, canvas_w: u32, canvas_h: u32) {
        self.base.surface.resize(canvas_w, canvas_h);
        self.base.last_rendered_ms = None;
        self.base.dirty = true;
    }

    /// Demux metadata arrived: pre-size the frame service to full internal
    /// rate so both progressive passes write into fixed slots.
    pub fn begin_video_ingest(&mut self, duration_ms: i64, w: u32, h: u32, source_fps: f32) {
        self.base.total_time_ms = duration_ms;
        self.base.width = w;
        self.base.height = h;
        self.base.frames = FrameService::new(duration_ms, self.base.frames.fps(), true);
        if let LayerKind::Video(v) = &mut self.kind {
            v.source_fps = source_fps;
        }
        self.base.dirty = true;
    }

    /// Write a decoded carrier into slot `idx` (either pass).
    pub fn set_ingest_frame(&mut self, idx: usize, raster: Arc<Raster>, anchor: bool) {
        if let Some(f) = self.base.frames.get_mut(idx) {
            f.payload = Some(raster);
            f.anchor = anchor;
        }
        self.base.dirty = true;
    }

    /// First pass complete: the layer becomes usable with placeholder slots.
    pub fn mark_ready(&mut self) {
        self.base.ready = true;
        self.base.dirty = true;
    }

    /// Decoded audio arrived.
    pub fn attach_audio_buffer(&mut self, buf: Arc<AudioBuffer>) {
        let dur = buf.duration_ms();
        self.base.total_time_ms = dur;
        self.base.frames = FrameService::new(dur, self.base.frames.fps(), true);
        if let LayerKind::Audio(a) = &mut self.kind {
            a.buffer = Some(buf);
            a.original_total_ms = dur;
        }
        self.base.ready = true;
    }

    // ── Render ────────────────────────────────────────────────────────────────

    /// Draw this layer's contribution at `t_ms` onto `out`. Not ready or
    /// not visible → no-op. Audio layers have no visual contribution; their
    /// scheduling is the playback scheduler's job. Re-renders at an
    /// unchanged time re-blit the cached surface.
    pub fn render(&mut self, out: &mut RasterSurface, t_ms: i64, _playing: bool) {
        if !self.base.ready || !self.is_visible(t_ms) {
            return;
        }
        if self.is_audio() {
            return;
        }
        if self.base.last_rendered_ms == Some(t_ms) && !self.base.dirty {
            self.base.surface.composite_onto(out);
            return;
        }

        let idx = self.base.frames.time_to_index(t_ms, self.base.start_time_ms);
        if idx < 0 {
            return;
        }
        let Some(frame) = self.base.frames.get(idx as usize).cloned() else { return };
        let content = self.content_raster(&frame, idx as usize);

        self.base.surface.clear();
        if let Some(raster) = content {
            let t = BlitTransform {
                offset_x:     frame.x,
                offset_y:     frame.y,
                scale:        frame.scale,
                rotation_deg: frame.rotation_deg,
            };
            self.base.surface.draw_raster(&raster, t);
        }
        self.base.last_rendered_ms = Some(t_ms);
        self.base.dirty = false;
        self.base.surface.composite_onto(out);
    }

    /// The visual carrier for `frame`. Video slots that are still empty
    /// during a progressive load fall back to the nearest previous filled
    /// slot; a placeholder is always preferred over a blank.
    fn content_raster(&mut self, frame: &Frame, idx: usize) -> Option<Arc<Raster>> {
        match &mut self.kind {
            LayerKind::Video(_) => frame
                .payload
                .clone()
                .or_else(|| self.base.frames.nearest_filled(idx).and_then(|f| f.payload.clone())),
            LayerKind::Image(img) => Some(img.raster.clone()),
            LayerKind::Text(txt) => {
                if txt.cached.is_none() {
                    let font = txt.font.as_ref()?;
                    let raster = RasterSurface::rasterize_text(
                        font, &txt.text, txt.font_px, txt.color, txt.shadow,
                    );
                    txt.cached = Some(Arc::new(raster));
                }
                txt.cached.clone()
            }
            LayerKind::Audio(_) => None,
        }
    }

    // ── Edit operations ───────────────────────────────────────────────────────

    /// Apply transform deltas to every frame. `_ref_time_ms` is accepted
    /// but ignored; the change is uniform across the layer. A scale change
    /// rescales each frame's offset so the content point at the canvas
    /// centre stays put.
    pub fn apply_change(&mut self, change: TransformChange, _ref_time_ms: i64) {
        for f in self.base.frames.iter_mut() {
            if let Some(ds) = change.dscale {
                let old = f.scale;
                let new = (old + ds).max(0.01);
                if old > 0.0 {
                    f.x *= new / old;
                    f.y *= new / old;
                }
                f.scale = new;
            }
            if let Some(dx) = change.dx {
                f.x += dx;
            }
            if let Some(dy) = change.dy {
                f.y += dy;
            }
            if let Some(dr) = change.drotation {
                f.rotation_deg += dr;
            }
        }
        self.mark_dirty();
    }

    /// Change playback speed. Visual variants rewrite their frame sequence
    /// from the speed controller's snapshot; audio keeps its (neutral)
    /// transforms and only tracks duration; the pitch-preserved buffer is
    /// produced by the audio engine.
    pub fn set_speed(&mut self, s: f32) -> Result<(), EditError> {
        if s <= 0.0 {
            return Err(EditError::IncompatibleOperation);
        }
        if !self.base.ready {
            return Err(EditError::LayerNotReady);
        }
        match &self.kind {
            LayerKind::Audio(a) => {
                // The controller never resamples audio frames: they are
                // transform-only. Duration comes from the pre-speed buffer
                // length; the audio engine owns the pitch-preserved stretch.
                let new_dur = (a.original_total_ms as f64 / s as f64).floor() as i64;
                self.base.speed.note_speed(s);
                let delta = new_dur - self.base.frames.duration_ms();
                self.base.frames.adjust_total_time(delta);
                self.base.total_time_ms = new_dur;
            }
            _ => {
                let new_dur =
                    self.base.speed.set_speed(&mut self.base.frames, self.base.total_time_ms, s);
                self.base.total_time_ms = new_dur;
            }
        }
        self.mark_dirty();
        Ok(())
    }

    pub fn speed(&self) -> f32 { self.base.speed.speed() }

    /// Deep-copy transforms and metadata; decoded carriers are shared.
    /// Same start, same duration, new id.
    pub fn clone_layer(&self) -> MediaLayer {
        let mut copy = self.clone();
        copy.base.id = Uuid::new_v4();
        copy.base.last_rendered_ms = None;
        copy.base.dirty = true;
        copy
    }

    /// Extend or shrink by `delta_ms`. Video and audio duration is owned by
    /// the decoded carrier and cannot be stretched this way.
    pub fn adjust_total_time(&mut self, delta_ms: i64) -> Result<(), EditError> {
        match self.kind {
            LayerKind::Video(_) | LayerKind::Audio(_) => Err(EditError::IncompatibleOperation),
            _ => {
                self.base.frames.adjust_total_time(delta_ms);
                self.base.total_time_ms = (self.base.total_time_ms + delta_ms)
                    .max(self.base.frames.frame_dur_ms());
                self.mark_dirty();
                Ok(())
            }
        }
    }

    /// Remove project-time interval `[t0, t1]`, clipped to this layer's
    /// extent. Duration shrinks by the removed span; content outside is
    /// preserved in order.
    pub fn remove_interval(&mut self, t0_ms: i64, t1_ms: i64) -> Result<(), EditError> {
        if !self.base.ready {
            return Err(EditError::LayerNotReady);
        }
        let lo = t0_ms.max(self.base.start_time_ms);
        let hi = t1_ms.min(self.end_time_ms());
        if lo >= hi {
            return Err(EditError::OutOfBounds { t_ms: t0_ms });
        }
        let local0 = (lo - self.base.start_time_ms) as f64 / 1000.0;
        let local1 = (hi - self.base.start_time_ms) as f64 / 1000.0;

        if let LayerKind::Audio(a) = &mut self.kind {
            let Some(buf) = &a.buffer else { return Err(EditError::LayerNotReady) };
            let cut = buf
                .remove_interval(local0, local1)
                .map_err(|_| EditError::OutOfBounds { t_ms: t0_ms })?;
            let new_dur = cut.duration_ms();
            a.buffer = Some(Arc::new(cut));
            a.original_total_ms = new_dur;
            let delta = new_dur - self.base.frames.duration_ms();
            self.base.frames.adjust_total_time(delta);
            self.base.total_time_ms = new_dur;
        } else {
            if !self.base.frames.remove_interval(local0, local1) {
                return Err(EditError::OutOfBounds { t_ms: t0_ms });
            }
            self.base.total_time_ms -= hi - lo;
        }
        self.mark_dirty();
        Ok(())
    }

    /// Split at project time `t_ms`: the returned layer is the left half
    /// (ends at t); `self` becomes the right half (starts at t).
    pub fn split_at(&mut self, t_ms: i64) -> Result<MediaLayer, EditError> {
        if !self.base.ready {
            return Err(EditError::LayerNotReady);
        }
        if t_ms <= self.base.start_time_ms || t_ms >= self.end_time_ms() {
            return Err(EditError::OutOfBounds { t_ms });
        }

        let pct = (t_ms - self.base.start_time_ms) as f64 / self.base.total_time_ms as f64;
        let split_idx = (pct * self.base.frames.len() as f64).round() as usize;
        let left_total = (pct * self.base.total_time_ms as f64).round() as i64;

        let mut left = self.clone_layer();
        let left_frames = self.base.frames.split_off_front(split_idx);
        left.base.frames = left_frames;
        left.base.total_time_ms = left_total;

        self.base.start_time_ms += left_total;
        self.base.total_time_ms -= left_total;

        if let LayerKind::Audio(a) = &mut self.kind {
            let Some(buf) = &a.buffer else { return Err(EditError::LayerNotReady) };
            let (l, r) = buf
                .split(left_total as f64 / 1000.0)
                .map_err(|_| EditError::OutOfBounds { t_ms })?;
            let (l, r) = (Arc::new(l), Arc::new(r));
            if let LayerKind::Audio(la) = &mut left.kind {
                la.original_total_ms = l.duration_ms();
                left.base.total_time_ms = l.duration_ms();
                la.buffer = Some(l);
            }
            a.original_total_ms = r.duration_ms();
            self.base.total_time_ms = r.duration_ms();
            a.buffer = Some(r);
        }

        self.mark_dirty();
        Ok(left)
    }

    // ── Text state ────────────────────────────────────────────────────────────

    pub fn set_text(&mut self, text: impl Into<String>) -> Result<(), EditError> {
        let LayerKind::Text(t) = &mut self.kind else {
            return Err(EditError::IncompatibleOperation);
        };
        t.text = text.into();
        self.base.name = t.text.clone();
        t.cached = None;
        self.refresh_text_size();
        self.mark_dirty();
        Ok(())
    }

    pub fn set_text_style(
        &mut self,
        color:   Option<[u8; 4]>,
        shadow:  Option<bool>,
        font_px: Option<f32>,
    ) -> Result<(), EditError> {
        let LayerKind::Text(t) = &mut self.kind else {
            return Err(EditError::IncompatibleOperation);
        };
        if let Some(c) = color {
            t.color = c;
        }
        if let Some(s) = shadow {
            t.shadow = s;
        }
        if let Some(px) = font_px {
            t.font_px = px;
        }
        t.cached = None;
        self.refresh_text_size();
        self.mark_dirty();
        Ok(())
    }

    fn refresh_text_size(&mut self) {
        if let LayerKind::Text(t) = &self.kind {
            if let Some(font) = &t.font {
                let (w, h) = RasterSurface::measure_text(font, &t.text, t.font_px);
                self.base.width = w.ceil() as u32;
                self.base.height = h.ceil() as u32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_layer(duration_ms: i64) -> MediaLayer {
        let mut l = MediaLayer::image("still", 24, Arc::new(Raster::solid(8, 8, [9, 9, 9, 255])));
        let delta = duration_ms - l.base.total_time_ms;
        l.adjust_total_time(delta).unwrap();
        l.base.total_time_ms = duration_ms;
        l
    }

    fn audio_layer(duration_s: f64) -> MediaLayer {
        let mut l = MediaLayer::audio("tone", 24);
        let rate = 1000u32;
        let n = (duration_s * rate as f64) as usize;
        let plane: Vec<f32> = (0..n).map(|i| (i as f32 * 0.001).sin()).collect();
        l.attach_audio_buffer(Arc::new(AudioBuffer::from_planes(rate, vec![plane])));
        l
    }

    #[test]
    fn visibility_window_is_half_open() {
        let mut l = image_layer(2000);
        l.base.start_time_ms = 1000;
        assert!(!l.is_visible(999));
        assert!(l.is_visible(1000));
        assert!(l.is_visible(2999));
        assert!(!l.is_visible(3000));
    }

    #[test]
    fn clone_layer_shares_carrier_new_id() {
        let l = image_layer(2000);
        let c = l.clone_layer();
        assert_ne!(c.id(), l.id());
        assert_eq!(c.base.start_time_ms, l.base.start_time_ms);
        assert_eq!(c.base.total_time_ms, l.base.total_time_ms);
        let (LayerKind::Image(a), LayerKind::Image(b)) = (&l.kind, &c.kind) else { panic!() };
        assert!(Arc::ptr_eq(&a.raster, &b.raster));
    }

    #[test]
    fn split_partitions_duration_and_frames() {
        let mut l = image_layer(2000);
        l.base.start_time_ms = 1000;
        let orig_len = l.base.frames.len();
        let left = l.split_at(1500).unwrap();
        assert_eq!(left.base.start_time_ms, 1000);
        assert_eq!(left.base.total_time_ms, 500);
        assert_eq!(l.base.start_time_ms, 1500);
        assert_eq!(l.base.total_time_ms, 1500);
        assert_eq!(left.base.frames.len() + l.base.frames.len(), orig_len);
    }

    #[test]
    fn split_outside_extent_fails_cleanly() {
        let mut l = image_layer(2000);
        l.base.start_time_ms = 1000;
        assert!(l.split_at(1000).is_err());
        assert!(l.split_at(3000).is_err());
        assert_eq!(l.base.total_time_ms, 2000);
    }

    #[test]
    fn audio_split_partitions_samples() {
        let mut l = audio_layer(4.0);
        let left = l.split_at(1000).unwrap();
        let (LayerKind::Audio(la), LayerKind::Audio(ra)) = (&left.kind, &l.kind) else { panic!() };
        assert_eq!(la.buffer.as_ref().unwrap().len_samples(), 1000);
        assert_eq!(ra.buffer.as_ref().unwrap().len_samples(), 3000);
        assert_eq!(left.base.total_time_ms + l.base.total_time_ms, 4000);
    }

    #[test]
    fn audio_remove_interval_shrinks_duration() {
        let mut l = audio_layer(10.0);
        l.remove_interval(3000, 5000).unwrap();
        assert_eq!(l.base.total_time_ms, 8000);
        let fdur = l.base.frames.frame_dur_ms();
        assert!((l.base.frames.duration_ms() - 8000).abs() <= fdur);
    }

    #[test]
    fn adjust_total_time_refused_for_av() {
        let mut l = audio_layer(2.0);
        assert_eq!(l.adjust_total_time(500), Err(EditError::IncompatibleOperation));
        let mut v = MediaLayer::video("clip", 24);
        v.base.ready = true;
        assert_eq!(v.adjust_total_time(500), Err(EditError::IncompatibleOperation));
    }

    #[test]
    fn speed_round_trip_restores_duration() {
        let mut l = image_layer(4000);
        let before = (l.base.total_time_ms, l.base.frames.len());
        l.set_speed(2.0).unwrap();
        assert_eq!(l.base.total_time_ms, 2000);
        l.set_speed(1.0).unwrap();
        assert_eq!(l.base.total_time_ms, before.0);
        assert_eq!(l.base.frames.len(), before.1);
    }

    #[test]
    fn apply_change_is_uniform_and_centre_preserving() {
        let mut l = image_layer(1000);
        for f in l.base.frames.iter_mut() {
            f.x = 10.0;
            f.y = -4.0;
        }
        l.apply_change(
            TransformChange { dscale: Some(1.0), ..Default::default() },
            250, // accepted, ignored
        );
        for f in l.base.frames.iter() {
            assert_eq!(f.scale, 2.0);
            assert_eq!(f.x, 20.0);
            assert_eq!(f.y, -8.0);
        }
    }

    #[test]
    fn render_idempotent_at_same_time() {
        let mut l = image_layer(1000);
        l.init(32, 32);
        let mut out1 = RasterSurface::new(32, 32);
        l.render(&mut out1, 100, false);
        let mut out2 = RasterSurface::new(32, 32);
        l.render(&mut out2, 100, false);
        assert_eq!(out1.pixels(), out2.pixels());
    }

    #[test]
    fn progressive_video_renders_nearest_previous_frame() {
        let mut v = MediaLayer::video("clip", 24);
        v.begin_video_ingest(1000, 4, 4, 24.0);
        // Only slot 0 has landed (first pass in flight).
        v.set_ingest_frame(0, Arc::new(Raster::solid(4, 4, [255, 255, 255, 255])), true);
        v.mark_ready();
        v.init(8, 8);
        let mut out = RasterSurface::new(8, 8);
        // t = 500 ms lands in slot 12, still empty, so the slot-0 payload stands in.
        v.render(&mut out, 500, true);
        let centre = ((4 * 8 + 4) * 4) as usize;
        assert_eq!(out.pixels()[centre + 3], 255);
    }

    #[test]
    fn render_skips_when_not_visible_or_not_ready() {
        let mut l = image_layer(1000);
        l.init(16, 16);
        let mut out = RasterSurface::new(16, 16);
        l.render(&mut out, 5000, false);
        assert!(out.pixels().iter().all(|&b| b == 0));
        l.base.ready = false;
        l.render(&mut out, 100, false);
        assert!(out.pixels().iter().all(|&b| b == 0));
    }
}
