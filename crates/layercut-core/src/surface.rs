// crates/layercut-core/src/surface.rs
//
// CPU raster types. Raster is an immutable decoded image (video frame,
// still, rasterized text); RasterSurface is a mutable RGBA canvas a layer
// draws into and the scheduler composites from. All pixel math runs in
// gamma-encoded byte space, a correct approximation for SDR content.
//
// The transformed blit is inverse-mapped: for each destination pixel the
// source position is computed by undoing translate/rotate/scale, then
// sampled bilinearly. Rows are processed in parallel with rayon.

use rayon::prelude::*;

// ── Raster ────────────────────────────────────────────────────────────────────

/// An owned RGBA8 image. Shared between frames by Arc: decoded video
/// carriers are large and clones must not copy them.
#[derive(Clone, Debug, PartialEq)]
pub struct Raster {
    pub width:  u32,
    pub height: u32,
    pub data:   Vec<u8>,
}

impl Raster {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0; (width * height * 4) as usize] }
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Self {
        debug_assert_eq!(data.len(), (width * height * 4) as usize);
        Self { width, height, data }
    }

    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..width * height {
            data.extend_from_slice(&rgba);
        }
        Self { width, height, data }
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * self.width + x) * 4) as usize;
        [self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]
    }

    /// Bilinear sample at fractional source coordinates. Out-of-bounds
    /// samples are transparent.
    fn sample(&self, sx: f32, sy: f32) -> [u8; 4] {
        if sx < 0.0 || sy < 0.0 || sx > self.width as f32 - 1.0 || sy > self.height as f32 - 1.0 {
            return [0, 0, 0, 0];
        }
        let x0 = sx.floor() as u32;
        let y0 = sy.floor() as u32;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let fx = sx - x0 as f32;
        let fy = sy - y0 as f32;

        let p00 = self.pixel(x0, y0);
        let p10 = self.pixel(x1, y0);
        let p01 = self.pixel(x0, y1);
        let p11 = self.pixel(x1, y1);

        let mut out = [0u8; 4];
        for c in 0..4 {
            let top = p00[c] as f32 * (1.0 - fx) + p10[c] as f32 * fx;
            let bot = p01[c] as f32 * (1.0 - fx) + p11[c] as f32 * fx;
            out[c] = (top * (1.0 - fy) + bot * fy).round().clamp(0.0, 255.0) as u8;
        }
        out
    }
}

// ── Pixel helpers ─────────────────────────────────────────────────────────────

/// Source-over blend of one RGBA pixel onto a destination slot.
#[inline]
fn blend_over(dst: &mut [u8], src: [u8; 4]) {
    let sa = src[3] as u32;
    if sa == 0 {
        return;
    }
    if sa == 255 {
        dst[0] = src[0];
        dst[1] = src[1];
        dst[2] = src[2];
        dst[3] = 255;
        return;
    }
    let ia = 255 - sa;
    for c in 0..3 {
        dst[c] = ((src[c] as u32 * sa + dst[c] as u32 * ia) / 255) as u8;
    }
    dst[3] = (sa + dst[3] as u32 * ia / 255).min(255) as u8;
}

/// Letterbox/pillarbox fit of a `src_w x src_h` image into `dst_w x dst_h`.
/// Returns (offset_x, offset_y, fitted_w, fitted_h).
pub fn fit_rect(src_w: u32, src_h: u32, dst_w: u32, dst_h: u32) -> (f32, f32, f32, f32) {
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return (0.0, 0.0, 0.0, 0.0);
    }
    let sx = dst_w as f32 / src_w as f32;
    let sy = dst_h as f32 / src_h as f32;
    let s = sx.min(sy);
    let w = src_w as f32 * s;
    let h = src_h as f32 * s;
    ((dst_w as f32 - w) * 0.5, (dst_h as f32 - h) * 0.5, w, h)
}

// ── RasterSurface ─────────────────────────────────────────────────────────────

/// Parameters of a transformed blit: the raster is fitted (letterboxed)
/// into the surface, then scaled about the surface centre, offset, and
/// rotated about its own centre.
#[derive(Clone, Copy, Debug)]
pub struct BlitTransform {
    pub offset_x:     f32,
    pub offset_y:     f32,
    pub scale:        f32,
    pub rotation_deg: f32,
}

impl Default for BlitTransform {
    fn default() -> Self {
        Self { offset_x: 0.0, offset_y: 0.0, scale: 1.0, rotation_deg: 0.0 }
    }
}

#[derive(Clone, Debug)]
pub struct RasterSurface {
    width:  u32,
    height: u32,
    data:   Vec<u8>,
}

impl RasterSurface {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, data: vec![0; (width * height * 4) as usize] }
    }

    pub fn width(&self) -> u32 { self.width }
    pub fn height(&self) -> u32 { self.height }

    /// Resize and clear. Contents are not preserved.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        self.data.clear();
        self.data.resize((width * height * 4) as usize, 0);
    }

    pub fn clear(&mut self) {
        self.data.fill(0);
    }

    pub fn fill(&mut self, rgba: [u8; 4]) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
    }

    pub fn pixels(&self) -> &[u8] { &self.data }

    pub fn put_pixels(&mut self, data: &[u8]) {
        let n = self.data.len().min(data.len());
        self.data[..n].copy_from_slice(&data[..n]);
    }

    /// Draw `src` fitted into this surface under `t`. The raster keeps its
    /// aspect (letterbox fit), then the frame transform applies: scale about
    /// the surface centre, translate by the offset, rotate about the drawn
    /// image's centre.
    pub fn draw_raster(&mut self, src: &Raster, t: BlitTransform) {
        if self.width == 0 || self.height == 0 || src.width == 0 || src.height == 0 {
            return;
        }
        let (fx, fy, fw, fh) = fit_rect(src.width, src.height, self.width, self.height);
        if fw <= 0.0 || fh <= 0.0 {
            return;
        }

        // Fitted-image centre after scale-about-surface-centre and offset.
        let sw = self.width as f32;
        let sh = self.height as f32;
        let icx = fx + fw * 0.5;
        let icy = fy + fh * 0.5;
        let cx = sw * 0.5 + (icx - sw * 0.5) * t.scale + t.offset_x;
        let cy = sh * 0.5 + (icy - sh * 0.5) * t.scale + t.offset_y;

        let half_w = fw * t.scale * 0.5;
        let half_h = fh * t.scale * 0.5;
        let rad = t.rotation_deg.to_radians();
        let (sin, cos) = rad.sin_cos();

        // Axis-aligned bounds of the rotated rect, clipped to the surface.
        let ext_x = half_w * cos.abs() + half_h * sin.abs();
        let ext_y = half_w * sin.abs() + half_h * cos.abs();
        let x0 = ((cx - ext_x).floor().max(0.0)) as u32;
        let y0 = ((cy - ext_y).floor().max(0.0)) as u32;
        let x1 = ((cx + ext_x).ceil().min(sw)) as u32;
        let y1 = ((cy + ext_y).ceil().min(sh)) as u32;
        if x0 >= x1 || y0 >= y1 {
            return;
        }

        let px_per_src_x = src.width as f32 / (fw * t.scale);
        let px_per_src_y = src.height as f32 / (fh * t.scale);
        let row_bytes = (self.width * 4) as usize;

        self.data[(y0 as usize * row_bytes)..(y1 as usize * row_bytes)]
            .par_chunks_exact_mut(row_bytes)
            .enumerate()
            .for_each(|(ri, row)| {
                let dy = (y0 + ri as u32) as f32 + 0.5 - cy;
                for dx_i in x0..x1 {
                    let dx = dx_i as f32 + 0.5 - cx;
                    // Undo the rotation (clockwise degrees → inverse is ccw).
                    let ux = dx * cos + dy * sin;
                    let uy = -dx * sin + dy * cos;
                    if ux.abs() > half_w || uy.abs() > half_h {
                        continue;
                    }
                    let sx = (ux + half_w) * px_per_src_x - 0.5;
                    let sy = (uy + half_h) * px_per_src_y - 0.5;
                    let p = src.sample(sx, sy);
                    let o = dx_i as usize * 4;
                    blend_over(&mut row[o..o + 4], p);
                }
            });
    }

    /// Composite this surface onto `out` at 1:1, source-over. Both surfaces
    /// are canvas-sized; a mismatch (mid-resize) draws the overlap only.
    pub fn composite_onto(&self, out: &mut RasterSurface) {
        let w = (self.width.min(out.width) * 4) as usize;
        let rows = self.height.min(out.height) as usize;
        let src_stride = (self.width * 4) as usize;
        let dst_stride = (out.width * 4) as usize;
        out.data
            .par_chunks_exact_mut(dst_stride)
            .take(rows)
            .enumerate()
            .for_each(|(y, drow)| {
                let srow = &self.data[y * src_stride..y * src_stride + w];
                for (d, s) in drow[..w].chunks_exact_mut(4).zip(srow.chunks_exact(4)) {
                    blend_over(d, [s[0], s[1], s[2], s[3]]);
                }
            });
    }

    /// Snapshot the surface as a Raster.
    pub fn to_raster(&self) -> Raster {
        Raster { width: self.width, height: self.height, data: self.data.clone() }
    }

    // ── Text facility ─────────────────────────────────────────────────────────

    /// Advance width and line height of `text` at `px`, in pixels.
    pub fn measure_text(font: &fontdue::Font, text: &str, px: f32) -> (f32, f32) {
        let mut w = 0.0f32;
        for ch in text.chars() {
            let m = font.metrics(ch, px);
            w += m.advance_width;
        }
        let h = font
            .horizontal_line_metrics(px)
            .map(|lm| lm.ascent - lm.descent)
            .unwrap_or(px * 1.2);
        (w, h)
    }

    /// Rasterize `text` into a tight standalone Raster. The optional shadow
    /// is a 2 px black offset pass drawn first.
    pub fn rasterize_text(
        font:   &fontdue::Font,
        text:   &str,
        px:     f32,
        color:  [u8; 4],
        shadow: bool,
    ) -> Raster {
        let (tw, th) = Self::measure_text(font, text, px);
        let pad = if shadow { 2 } else { 0 };
        let w = (tw.ceil() as u32 + pad + 2).max(1);
        let h = (th.ceil() as u32 + pad + 2).max(1);
        let mut out = Raster::new(w, h);
        let ascent = font.horizontal_line_metrics(px).map(|lm| lm.ascent).unwrap_or(px);

        if shadow {
            Self::draw_text_run(&mut out, font, text, px, 2.0, ascent + 2.0, [0, 0, 0, 160]);
        }
        Self::draw_text_run(&mut out, font, text, px, 0.0, ascent, color);
        out
    }

    fn draw_text_run(
        out:      &mut Raster,
        font:     &fontdue::Font,
        text:     &str,
        px:       f32,
        origin_x: f32,
        baseline: f32,
        color:    [u8; 4],
    ) {
        let mut pen_x = origin_x;
        for ch in text.chars() {
            let (m, coverage) = font.rasterize(ch, px);
            let gx = (pen_x + m.xmin as f32).round() as i64;
            let gy = (baseline - m.ymin as f32 - m.height as f32).round() as i64;
            for row in 0..m.height {
                let oy = gy + row as i64;
                if oy < 0 || oy >= out.height as i64 {
                    continue;
                }
                for col in 0..m.width {
                    let ox = gx + col as i64;
                    if ox < 0 || ox >= out.width as i64 {
                        continue;
                    }
                    let a = coverage[row * m.width + col] as u32;
                    if a == 0 {
                        continue;
                    }
                    let src = [color[0], color[1], color[2], (color[3] as u32 * a / 255) as u8];
                    let i = ((oy as u32 * out.width + ox as u32) * 4) as usize;
                    blend_over(&mut out.data[i..i + 4], src);
                }
            }
            pen_x += m.advance_width;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fit_rect_letterboxes_wide_into_square() {
        let (x, y, w, h) = fit_rect(200, 100, 100, 100);
        assert_eq!((x, y), (0.0, 25.0));
        assert_eq!((w, h), (100.0, 50.0));
    }

    #[test]
    fn fit_rect_pillarboxes_tall_into_wide() {
        let (x, y, w, h) = fit_rect(100, 200, 200, 100);
        assert_eq!((x, y), (75.0, 0.0));
        assert_eq!((w, h), (50.0, 100.0));
    }

    #[test]
    fn blend_over_opaque_replaces() {
        let mut dst = [10, 20, 30, 255];
        blend_over(&mut dst, [200, 100, 50, 255]);
        assert_eq!(dst, [200, 100, 50, 255]);
    }

    #[test]
    fn blend_over_transparent_is_noop() {
        let mut dst = [10, 20, 30, 255];
        blend_over(&mut dst, [200, 100, 50, 0]);
        assert_eq!(dst, [10, 20, 30, 255]);
    }

    #[test]
    fn draw_raster_identity_centers_content() {
        let mut s = RasterSurface::new(10, 10);
        let r = Raster::solid(10, 10, [255, 0, 0, 255]);
        s.draw_raster(&r, BlitTransform::default());
        // Centre pixel is red, fully opaque.
        let i = ((5 * 10 + 5) * 4) as usize;
        assert_eq!(&s.pixels()[i..i + 4], &[255, 0, 0, 255]);
    }

    #[test]
    fn draw_raster_offset_moves_content() {
        let mut s = RasterSurface::new(20, 20);
        let r = Raster::solid(4, 4, [0, 255, 0, 255]);
        // Scale the 4x4 down and push it to the far corner: centre stays empty.
        let t = BlitTransform { offset_x: 8.0, offset_y: 8.0, scale: 0.2, ..Default::default() };
        s.draw_raster(&r, t);
        let centre = ((10 * 20 + 10) * 4) as usize;
        assert_eq!(s.pixels()[centre + 3], 0);
    }

    #[test]
    fn composite_onto_is_source_over() {
        let mut below = RasterSurface::new(4, 4);
        below.fill([0, 0, 255, 255]);
        let mut above = RasterSurface::new(4, 4);
        // Above is transparent, so below must survive untouched.
        above.composite_onto(&mut below);
        assert_eq!(&below.pixels()[..4], &[0, 0, 255, 255]);
    }

    #[test]
    fn resize_clears_contents() {
        let mut s = RasterSurface::new(4, 4);
        s.fill([9, 9, 9, 255]);
        s.resize(8, 8);
        assert_eq!(s.width(), 8);
        assert!(s.pixels().iter().all(|&b| b == 0));
    }
}
