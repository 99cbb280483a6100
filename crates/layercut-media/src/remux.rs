// crates/layercut-media/src/remux.rs
//
// Duration repair for recorded sources. Live-captured containers often
// ship without a duration header (the recorder never finalizes one); a
// plain stream-copy remux rebuilds container metadata and cues without
// re-encoding a single frame.

use std::path::{Path, PathBuf};

use ffmpeg_the_third as ffmpeg;
use ffmpeg::format::{input, output};
use tracing::info;

use layercut_core::error::SourceIngestError;

/// Stream-copy `src` into a fresh container next to the temp dir and
/// return the repaired file's path. The caller owns the temp file's
/// lifetime through the returned handle.
pub fn fix_duration(src: &Path) -> Result<(tempfile::TempDir, PathBuf), SourceIngestError> {
    let dir = tempfile::tempdir()
        .map_err(|e| SourceIngestError::DecoderError(format!("tempdir: {e}")))?;
    let ext = src.extension().unwrap_or_default().to_string_lossy().to_string();
    let dst = dir.path().join(format!("repaired.{}", if ext.is_empty() { "mp4" } else { &ext }));

    let mut ictx = input(src)
        .map_err(|e| SourceIngestError::UnsupportedContainer(e.to_string()))?;
    let mut octx = output(&dst)
        .map_err(|e| SourceIngestError::DecoderError(format!("open output: {e}")))?;

    // Mirror every input stream with copied parameters; codec_tag must be
    // cleared or the target container may reject the source's tag.
    let mut stream_map = vec![-1i32; ictx.nb_streams() as usize];
    let mut next_out = 0i32;
    for (i, ist) in ictx.streams().enumerate() {
        let medium = ist.parameters().medium();
        if !matches!(
            medium,
            ffmpeg::media::Type::Video | ffmpeg::media::Type::Audio | ffmpeg::media::Type::Subtitle
        ) {
            continue;
        }
        let mut ost = octx
            .add_stream(ffmpeg::encoder::find(ffmpeg::codec::Id::None))
            .map_err(|e| SourceIngestError::DecoderError(format!("add stream: {e}")))?;
        ost.set_parameters(ist.parameters());
        unsafe {
            (*ost.parameters().as_mut_ptr()).codec_tag = 0;
        }
        stream_map[i] = next_out;
        next_out += 1;
    }

    octx.set_metadata(ictx.metadata().to_owned());
    octx.write_header()
        .map_err(|e| SourceIngestError::DecoderError(format!("write header: {e}")))?;

    for result in ictx.packets() {
        let (stream, mut packet) =
            result.map_err(|e| SourceIngestError::DecoderError(format!("read packet: {e}")))?;
        let out_idx = stream_map[stream.index()];
        if out_idx < 0 {
            continue;
        }
        let ost_tb = octx.stream(out_idx as usize).unwrap().time_base();
        packet.rescale_ts(stream.time_base(), ost_tb);
        packet.set_position(-1);
        packet.set_stream(out_idx as usize);
        packet
            .write_interleaved(&mut octx)
            .map_err(|e| SourceIngestError::DecoderError(format!("write packet: {e}")))?;
    }

    octx.write_trailer()
        .map_err(|e| SourceIngestError::DecoderError(format!("write trailer: {e}")))?;

    info!("[remux] duration repaired: {} → {}", src.display(), dst.display());
    Ok((dir, dst))
}
