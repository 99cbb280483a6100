// crates/layercut-core/src/timeline.rs
//
// Timeline: the ordered layer set and every edit operation on it.
// Iteration order is the z-order; later layers paint over earlier ones.
// All edits are check-then-apply: a failed edit leaves the timeline
// untouched. The total-duration cache is recomputed on structural change.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EditError;
use crate::layer::{LayerKind, MediaLayer};
use crate::surface::RasterSurface;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum AspectRatio {
    SixteenNine, // 16:9  landscape
    NineSixteen, // 9:16  vertical
    OneOne,      // 1:1   square
    ThreeFour,   // 3:4   portrait
}

impl AspectRatio {
    pub fn ratio(self) -> f32 {
        match self {
            AspectRatio::SixteenNine => 16.0 / 9.0,
            AspectRatio::NineSixteen => 9.0 / 16.0,
            AspectRatio::OneOne      => 1.0,
            AspectRatio::ThreeFour   => 3.0 / 4.0,
        }
    }

    /// Output surface size for this ratio.
    pub fn surface_size(self) -> (u32, u32) {
        match self {
            AspectRatio::SixteenNine => (1280, 720),
            AspectRatio::NineSixteen => (720, 1280),
            AspectRatio::OneOne      => (960, 960),
            AspectRatio::ThreeFour   => (960, 1280),
        }
    }
}

/// Which layer kinds an interval removal touches.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RemoveScope {
    Audio,
    Video,
    Image,
    Text,
}

impl RemoveScope {
    fn matches(self, kind: &LayerKind) -> bool {
        matches!(
            (self, kind),
            (RemoveScope::Audio, LayerKind::Audio(_))
                | (RemoveScope::Video, LayerKind::Video(_))
                | (RemoveScope::Image, LayerKind::Image(_))
                | (RemoveScope::Text, LayerKind::Text(_))
        )
    }
}

/// Which side a resize drags.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResizeSide {
    Start,
    End,
}

/// Cloning snapshots the whole composition: the export worker renders
/// from its own copy so the live timeline is never touched off-thread.
#[derive(Clone)]
pub struct Timeline {
    layers:      Vec<MediaLayer>,
    selected:    Option<Uuid>,
    pub time_ms: i64,
    pub playing: bool,
    aspect:      AspectRatio,
    surface_w:   u32,
    surface_h:   u32,
    total_cache: i64,
}

impl Timeline {
    pub fn new(aspect: AspectRatio) -> Self {
        let (w, h) = aspect.surface_size();
        Self {
            layers:      Vec::new(),
            selected:    None,
            time_ms:     0,
            playing:     false,
            aspect,
            surface_w:   w,
            surface_h:   h,
            total_cache: 0,
        }
    }

    // ── Queries ───────────────────────────────────────────────────────────────

    pub fn layers(&self) -> &[MediaLayer] { &self.layers }

    pub fn layers_mut(&mut self) -> &mut [MediaLayer] { &mut self.layers }

    pub fn is_empty(&self) -> bool { self.layers.is_empty() }

    pub fn layer(&self, id: Uuid) -> Option<&MediaLayer> {
        self.layers.iter().find(|l| l.id() == id)
    }

    pub fn layer_mut(&mut self, id: Uuid) -> Option<&mut MediaLayer> {
        self.layers.iter_mut().find(|l| l.id() == id)
    }

    pub fn aspect(&self) -> AspectRatio { self.aspect }

    pub fn surface_size(&self) -> (u32, u32) { (self.surface_w, self.surface_h) }

    /// Total project duration: max over layers of start + total; 0 when empty.
    pub fn total_time_ms(&self) -> i64 { self.total_cache }

    fn recompute_total(&mut self) {
        self.total_cache = self.layers.iter().map(|l| l.end_time_ms()).max().unwrap_or(0);
    }

    /// Layers visible at `t`, in z-order.
    pub fn visible_at(&self, t_ms: i64) -> Vec<Uuid> {
        self.layers.iter().filter(|l| l.is_visible(t_ms)).map(|l| l.id()).collect()
    }

    pub fn selected(&self) -> Option<Uuid> {
        // Selection is weak: a stale id (layer since removed) reads as none.
        self.selected.filter(|id| self.layers.iter().any(|l| l.id() == *id))
    }

    // ── Structural edits ──────────────────────────────────────────────────────

    /// Append at the back of the z-order, starting at the current playhead.
    pub fn add(&mut self, mut layer: MediaLayer) -> Uuid {
        layer.base.start_time_ms = self.time_ms;
        layer.init(self.surface_w, self.surface_h);
        let id = layer.id();
        self.layers.push(layer);
        self.recompute_total();
        id
    }

    pub fn remove(&mut self, id: Uuid) -> Result<MediaLayer, EditError> {
        let idx = self
            .layers
            .iter()
            .position(|l| l.id() == id)
            .ok_or(EditError::NoSuchLayer)?;
        if self.selected == Some(id) {
            self.selected = None;
        }
        let layer = self.layers.remove(idx);
        self.recompute_total();
        Ok(layer)
    }

    pub fn reorder(&mut self, id: Uuid, new_index: usize) -> Result<(), EditError> {
        let idx = self
            .layers
            .iter()
            .position(|l| l.id() == id)
            .ok_or(EditError::NoSuchLayer)?;
        let layer = self.layers.remove(idx);
        let new_index = new_index.min(self.layers.len());
        self.layers.insert(new_index, layer);
        Ok(())
    }

    pub fn select(&mut self, id: Uuid) -> Result<(), EditError> {
        if self.layers.iter().any(|l| l.id() == id) {
            self.selected = Some(id);
            Ok(())
        } else {
            Err(EditError::NoSuchLayer)
        }
    }

    pub fn deselect(&mut self) {
        self.selected = None;
    }

    /// Clone a layer in place: the copy sits directly above the original.
    pub fn clone_layer(&mut self, id: Uuid) -> Result<Uuid, EditError> {
        let idx = self
            .layers
            .iter()
            .position(|l| l.id() == id)
            .ok_or(EditError::NoSuchLayer)?;
        let copy = self.layers[idx].clone_layer();
        let copy_id = copy.id();
        self.layers.insert(idx + 1, copy);
        self.recompute_total();
        Ok(copy_id)
    }

    /// Split a layer at project time `t_ms`. The clone becomes the left
    /// half and is inserted just below the original (which becomes the
    /// right half). Returns the clone's id.
    pub fn split(&mut self, id: Uuid, t_ms: i64) -> Result<Uuid, EditError> {
        let idx = self
            .layers
            .iter()
            .position(|l| l.id() == id)
            .ok_or(EditError::NoSuchLayer)?;
        let left = self.layers[idx].split_at(t_ms)?;
        let left_id = left.id();
        self.layers.insert(idx, left);
        self.recompute_total();
        Ok(left_id)
    }

    /// Drag one edge of a layer by `delta_ms`. End-side resizes delegate to
    /// the layer's duration adjustment. Start-side resizes shift the start
    /// and compensate the duration when the carrier permits; video and
    /// audio carriers own their duration, so for them the drag degrades to
    /// a pure move.
    pub fn resize(&mut self, id: Uuid, delta_ms: i64, side: ResizeSide) -> Result<(), EditError> {
        let layer = self
            .layers
            .iter_mut()
            .find(|l| l.id() == id)
            .ok_or(EditError::NoSuchLayer)?;
        match side {
            ResizeSide::End => layer.adjust_total_time(delta_ms)?,
            ResizeSide::Start => match layer.kind {
                LayerKind::Video(_) | LayerKind::Audio(_) => {
                    layer.base.start_time_ms = (layer.base.start_time_ms + delta_ms).max(0);
                }
                _ => {
                    if delta_ms > 0 {
                        // Trim from the front.
                        if delta_ms >= layer.base.total_time_ms {
                            return Err(EditError::OutOfBounds { t_ms: delta_ms });
                        }
                        let t1 = delta_ms as f64 / 1000.0;
                        if !layer.base.frames.remove_interval(0.0, t1) {
                            return Err(EditError::OutOfBounds { t_ms: delta_ms });
                        }
                        layer.base.total_time_ms -= delta_ms;
                    } else if delta_ms < 0 {
                        let n = (-delta_ms * layer.base.frames.fps() as i64 / 1000) as usize;
                        layer.base.frames.extend_front(n);
                        layer.base.total_time_ms += -delta_ms;
                    }
                    layer.base.start_time_ms = (layer.base.start_time_ms + delta_ms).max(0);
                    layer.mark_dirty();
                }
            },
        }
        self.recompute_total();
        Ok(())
    }

    /// Shift a layer in time. No frame-level mutation.
    pub fn move_layer(&mut self, id: Uuid, delta_ms: i64) -> Result<(), EditError> {
        let layer = self
            .layers
            .iter_mut()
            .find(|l| l.id() == id)
            .ok_or(EditError::NoSuchLayer)?;
        layer.base.start_time_ms = (layer.base.start_time_ms + delta_ms).max(0);
        self.recompute_total();
        Ok(())
    }

    /// Remove project interval `[t0, t1]` from every in-scope layer whose
    /// extent overlaps it, clipped per layer. Returns how many layers were
    /// cut.
    pub fn remove_interval(
        &mut self,
        t0_ms: i64,
        t1_ms: i64,
        scope: RemoveScope,
    ) -> Result<usize, EditError> {
        if t0_ms >= t1_ms {
            return Err(EditError::OutOfBounds { t_ms: t0_ms });
        }
        // Check-then-apply: validate every target before any layer is cut.
        let targets: Vec<usize> = self
            .layers
            .iter()
            .enumerate()
            .filter(|(_, l)| {
                scope.matches(&l.kind)
                    && l.base.start_time_ms < t1_ms
                    && l.end_time_ms() > t0_ms
            })
            .map(|(i, _)| i)
            .collect();
        if targets.iter().any(|&i| !self.layers[i].base.ready) {
            return Err(EditError::LayerNotReady);
        }
        let mut cut = 0;
        for &i in &targets {
            if self.layers[i].remove_interval(t0_ms, t1_ms).is_ok() {
                cut += 1;
            }
        }
        self.recompute_total();
        Ok(cut)
    }

    /// Change the output aspect: resizes the output surface and every
    /// layer's render surface (which also resets render caches). Layer
    /// content is untouched.
    pub fn set_aspect(&mut self, aspect: AspectRatio) {
        self.aspect = aspect;
        let (w, h) = aspect.surface_size();
        self.surface_w = w;
        self.surface_h = h;
        for layer in &mut self.layers {
            layer.init(w, h);
        }
    }

    // ── Composition ───────────────────────────────────────────────────────────

    /// Render the composition at `t_ms` onto `out`: clear, then every
    /// visible layer in z-order. Shared by the live scheduler and the
    /// export loop (`playing = false` there).
    pub fn render_at(&mut self, out: &mut RasterSurface, t_ms: i64, playing: bool) {
        out.clear();
        for layer in &mut self.layers {
            layer.render(out, t_ms, playing);
        }
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(AspectRatio::SixteenNine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::AudioBuffer;
    use crate::surface::Raster;
    use std::sync::Arc;

    fn still(duration_ms: i64) -> MediaLayer {
        let mut l = MediaLayer::image("still", 24, Arc::new(Raster::solid(4, 4, [7, 7, 7, 255])));
        let delta = duration_ms - l.base.total_time_ms;
        l.adjust_total_time(delta).unwrap();
        l.base.total_time_ms = duration_ms;
        l
    }

    fn tone(duration_s: f64) -> MediaLayer {
        let mut l = MediaLayer::audio("tone", 24);
        let n = (duration_s * 1000.0) as usize;
        l.attach_audio_buffer(Arc::new(AudioBuffer::from_planes(1000, vec![vec![0.5; n]])));
        l
    }

    #[test]
    fn total_time_is_max_extent_zero_when_empty() {
        let mut tl = Timeline::default();
        assert_eq!(tl.total_time_ms(), 0);
        tl.add(still(3000));
        tl.time_ms = 3000;
        tl.add(still(2000));
        assert_eq!(tl.total_time_ms(), 5000);
    }

    #[test]
    fn sequential_layers_visible_in_their_windows() {
        let mut tl = Timeline::default();
        let a = tl.add(still(3000));
        tl.time_ms = 3000;
        let b = tl.add(still(2000));
        for t in [0, 1500, 2999] {
            assert_eq!(tl.visible_at(t), vec![a], "t={t}");
        }
        for t in [3000, 3500, 4999] {
            assert_eq!(tl.visible_at(t), vec![b], "t={t}");
        }
        assert!(tl.visible_at(5000).is_empty());
    }

    #[test]
    fn split_produces_adjacent_halves() {
        let mut tl = Timeline::default();
        tl.time_ms = 1000;
        let id = tl.add(still(2000));
        let left = tl.split(id, 1500).unwrap();
        let lc = tl.layer(left).unwrap();
        let orig = tl.layer(id).unwrap();
        assert_eq!(lc.base.start_time_ms, 1000);
        assert_eq!(lc.base.total_time_ms, 500);
        assert_eq!(orig.base.start_time_ms, 1500);
        assert_eq!(orig.base.total_time_ms, 1500);
        assert_eq!(tl.total_time_ms(), 3000);
    }

    #[test]
    fn remove_clears_selection_and_total() {
        let mut tl = Timeline::default();
        let id = tl.add(still(2000));
        tl.select(id).unwrap();
        tl.remove(id).unwrap();
        assert!(tl.selected().is_none());
        assert_eq!(tl.total_time_ms(), 0);
        assert!(tl.remove(id).is_err());
    }

    #[test]
    fn selection_is_weak() {
        let mut tl = Timeline::default();
        let id = tl.add(still(1000));
        tl.select(id).unwrap();
        assert_eq!(tl.selected(), Some(id));
        tl.remove(id).unwrap();
        assert_eq!(tl.selected(), None);
    }

    #[test]
    fn reorder_changes_z_order() {
        let mut tl = Timeline::default();
        let a = tl.add(still(1000));
        let b = tl.add(still(1000));
        assert_eq!(tl.layers()[0].id(), a);
        tl.reorder(a, 1).unwrap();
        assert_eq!(tl.layers()[0].id(), b);
        assert_eq!(tl.layers()[1].id(), a);
    }

    #[test]
    fn scoped_interval_removal_only_touches_matching_kind() {
        let mut tl = Timeline::default();
        let audio = tl.add(tone(10.0));
        let image = tl.add(still(10_000));
        let cut = tl.remove_interval(3000, 5000, RemoveScope::Audio).unwrap();
        assert_eq!(cut, 1);
        assert_eq!(tl.layer(audio).unwrap().base.total_time_ms, 8000);
        assert_eq!(tl.layer(image).unwrap().base.total_time_ms, 10_000);
    }

    #[test]
    fn resize_end_extends_still_layer() {
        let mut tl = Timeline::default();
        let id = tl.add(still(2000));
        tl.resize(id, 1000, ResizeSide::End).unwrap();
        assert_eq!(tl.layer(id).unwrap().base.total_time_ms, 3000);
        assert_eq!(tl.total_time_ms(), 3000);
    }

    #[test]
    fn resize_start_trims_still_layer_front() {
        let mut tl = Timeline::default();
        tl.time_ms = 1000;
        let id = tl.add(still(2000));
        tl.resize(id, 500, ResizeSide::Start).unwrap();
        let l = tl.layer(id).unwrap();
        assert_eq!(l.base.start_time_ms, 1500);
        assert_eq!(l.base.total_time_ms, 1500);
    }

    #[test]
    fn resize_start_on_audio_is_pure_move() {
        let mut tl = Timeline::default();
        let id = tl.add(tone(4.0));
        tl.resize(id, 500, ResizeSide::Start).unwrap();
        let l = tl.layer(id).unwrap();
        assert_eq!(l.base.start_time_ms, 500);
        assert_eq!(l.base.total_time_ms, 4000);
    }

    #[test]
    fn aspect_change_resizes_surfaces_not_content() {
        let mut tl = Timeline::default();
        let id = tl.add(still(1000));
        tl.set_aspect(AspectRatio::NineSixteen);
        assert_eq!(tl.surface_size(), (720, 1280));
        let l = tl.layer(id).unwrap();
        assert_eq!(l.base.surface.width(), 720);
        assert_eq!(l.base.total_time_ms, 1000);
    }

    #[test]
    fn render_at_composites_in_z_order() {
        let mut tl = Timeline::default();
        let mut below = MediaLayer::image("below", 24, Arc::new(Raster::solid(4, 4, [255, 0, 0, 255])));
        below.adjust_total_time(0).unwrap();
        tl.add(below);
        let above = MediaLayer::image("above", 24, Arc::new(Raster::solid(4, 4, [0, 255, 0, 255])));
        tl.add(above);
        let (w, h) = tl.surface_size();
        let mut out = RasterSurface::new(w, h);
        tl.render_at(&mut out, 100, false);
        // Centre pixel belongs to the later (front-most) layer.
        let i = (((h / 2) * w + w / 2) * 4) as usize;
        assert_eq!(&out.pixels()[i..i + 3], &[0, 255, 0]);
    }
}
