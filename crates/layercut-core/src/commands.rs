// crates/layercut-core/src/commands.rs
//
// Every engine action is expressible as an EngineCommand. Callers may
// drive the engine through direct method calls or queue these; the engine
// drains the queue between ticks, which is what keeps edits atomic with
// respect to rendering.

use std::path::PathBuf;

use uuid::Uuid;

use crate::layer::TransformChange;
use crate::timeline::{AspectRatio, RemoveScope, ResizeSide};

#[derive(Debug, Clone)]
pub enum EngineCommand {
    // ── Playback ─────────────────────────────────────────────────────────────
    Play,
    Pause,
    Seek(i64),

    // ── Sources ──────────────────────────────────────────────────────────────
    AddSource(PathBuf),
    AddText(String),

    // ── Layer edits ──────────────────────────────────────────────────────────
    RemoveLayer(Uuid),
    CloneLayer(Uuid),
    SplitLayer { id: Uuid, t_ms: i64 },
    ReorderLayer { id: Uuid, new_index: usize },
    SelectLayer(Option<Uuid>),
    MoveLayer { id: Uuid, delta_ms: i64 },
    ResizeLayer { id: Uuid, delta_ms: i64, side: ResizeSide },
    SetSpeed { id: Uuid, speed: f32 },
    SetTransform { id: Uuid, change: TransformChange },
    RemoveInterval { t0_ms: i64, t1_ms: i64, scope: RemoveScope },

    // ── View ─────────────────────────────────────────────────────────────────
    SetAspectRatio(AspectRatio),

    // ── Export ───────────────────────────────────────────────────────────────
    /// Deterministic offline re-render into `output` at `fps`.
    Export { output: PathBuf, width: u32, height: u32, fps: u32 },
    /// Request the running export job to stop after its current frame.
    CancelExport(Uuid),
    /// Render the composition at `t_ms` and write a PNG snapshot.
    SaveFramePng { t_ms: i64, path: PathBuf },
}
