// crates/layercut-engine/src/fonts.rs
//
// Default font discovery for text layers. Scans the usual system font
// locations and loads the first parseable TTF/OTF; callers may override
// with Engine::set_font.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::warn;

/// Fonts larger than this are skipped (CJK mega-fonts slow first render).
const MAX_FONT_BYTES: u64 = 12 * 1024 * 1024;

const CANDIDATES: &[&str] = &[
    "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
    "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
    "/usr/share/fonts/TTF/DejaVuSans.ttf",
    "/System/Library/Fonts/Supplemental/Arial.ttf",
    "C:\\Windows\\Fonts\\arial.ttf",
];

pub fn load_font_file(path: &Path) -> Option<Arc<fontdue::Font>> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.len() > MAX_FONT_BYTES {
        warn!("[fonts] skipping oversized font: {}", path.display());
        return None;
    }
    let bytes = std::fs::read(path).ok()?;
    match fontdue::Font::from_bytes(bytes, fontdue::FontSettings::default()) {
        Ok(font) => Some(Arc::new(font)),
        Err(e) => {
            warn!("[fonts] unparseable font {}: {e}", path.display());
            None
        }
    }
}

/// The first usable system font: known paths first, then a shallow scan of
/// the platform font directories.
pub fn load_default_font() -> Option<Arc<fontdue::Font>> {
    for cand in CANDIDATES {
        if let Some(font) = load_font_file(Path::new(cand)) {
            return Some(font);
        }
    }
    for dir in ["/usr/share/fonts", "/usr/local/share/fonts", "C:\\Windows\\Fonts"] {
        if let Some(font) = scan_dir(Path::new(dir), 2) {
            return Some(font);
        }
    }
    warn!("[fonts] no system font found; text layers will not render");
    None
}

fn scan_dir(dir: &Path, depth: u8) -> Option<Arc<fontdue::Font>> {
    let entries = std::fs::read_dir(dir).ok()?;
    let mut subdirs: Vec<PathBuf> = Vec::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            subdirs.push(path);
            continue;
        }
        let ext = path.extension().unwrap_or_default().to_string_lossy().to_lowercase();
        if ext == "ttf" || ext == "otf" {
            if let Some(font) = load_font_file(&path) {
                return Some(font);
            }
        }
    }
    if depth > 0 {
        for sub in subdirs {
            if let Some(font) = scan_dir(&sub, depth - 1) {
                return Some(font);
            }
        }
    }
    None
}
