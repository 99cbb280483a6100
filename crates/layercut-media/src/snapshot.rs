// crates/layercut-media/src/snapshot.rs
//
// Frame snapshot: render the composition at one instant and write a PNG.

use std::io::BufWriter;
use std::path::Path;

use anyhow::Result;
use tracing::debug;

use layercut_core::surface::RasterSurface;
use layercut_core::Timeline;

/// Render `timeline` at `t_ms` onto a throwaway offline surface and write
/// the pixels as an RGBA PNG.
pub fn save_frame_png(timeline: &mut Timeline, t_ms: i64, dest: &Path) -> Result<()> {
    let (w, h) = timeline.surface_size();
    let mut surface = RasterSurface::new(w, h);
    timeline.render_at(&mut surface, t_ms, false);
    write_png(&surface, dest)
}

pub fn write_png(surface: &RasterSurface, dest: &Path) -> Result<()> {
    let file = std::fs::File::create(dest)?;
    let w = &mut BufWriter::new(file);
    let mut encoder = png::Encoder::new(w, surface.width(), surface.height());
    encoder.set_color(png::ColorType::Rgba);
    encoder.set_depth(png::BitDepth::Eight);
    let mut writer = encoder.write_header()?;
    writer.write_image_data(surface.pixels())?;
    debug!("[snapshot] PNG saved → {}", dest.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use layercut_core::layer::MediaLayer;
    use layercut_core::surface::Raster;
    use std::sync::Arc;

    #[test]
    fn save_frame_writes_a_png() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("frame.png");

        let mut timeline = Timeline::default();
        timeline.add(MediaLayer::image(
            "still",
            24,
            Arc::new(Raster::solid(8, 8, [200, 40, 40, 255])),
        ));
        save_frame_png(&mut timeline, 100, &dest).unwrap();

        let bytes = std::fs::read(&dest).unwrap();
        assert!(bytes.starts_with(&[0x89, b'P', b'N', b'G']));
    }
}
