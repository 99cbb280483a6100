// crates/layercut-core/src/project.rs
//
// Project file schema: a JSON array of layer descriptors. Sources are
// re-ingested from `uri` on load; transform arrays overwrite the
// pipeline-initialized frames once ingest completes. Text layers are
// reconstructed from `name` alone.

use serde::{Deserialize, Serialize};

use crate::frame::Frame;
use crate::layer::MediaLayer;
use crate::timeline::Timeline;

/// `[x, y, scale, rotation_deg, anchor]` per frame-service slot.
pub type FrameTuple = (f32, f32, f32, f32, u8);

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LayerDescriptor {
    #[serde(rename = "type")]
    pub kind:       String,
    pub name:       String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri:        Option<String>,
    pub width:      u32,
    pub height:     u32,
    pub start_time: i64,
    pub total_time: i64,
    /// Missing frames ⇒ keep the pipeline-initialized neutral sequence.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames:     Option<Vec<FrameTuple>>,
}

/// Media kind inferred from a source file extension.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SourceKind {
    Video,
    Audio,
    Image,
}

pub fn source_kind_from_ext(ext: &str) -> Option<SourceKind> {
    match ext.to_ascii_lowercase().as_str() {
        "mp4" | "webm" | "mov"          => Some(SourceKind::Video),
        "mp3" | "wav" | "ogg"           => Some(SourceKind::Audio),
        "jpg" | "jpeg" | "png" | "gif" | "webp" => Some(SourceKind::Image),
        _ => None,
    }
}

pub fn parse_project(json: &str) -> Result<Vec<LayerDescriptor>, serde_json::Error> {
    serde_json::from_str(json)
}

pub fn serialize_project(timeline: &Timeline) -> Result<String, serde_json::Error> {
    let descriptors: Vec<LayerDescriptor> =
        timeline.layers().iter().map(describe_layer).collect();
    serde_json::to_string_pretty(&descriptors)
}

pub fn describe_layer(layer: &MediaLayer) -> LayerDescriptor {
    LayerDescriptor {
        kind:       layer.kind.tag().to_string(),
        name:       layer.base.name.clone(),
        uri:        None,
        width:      layer.base.width,
        height:     layer.base.height,
        start_time: layer.base.start_time_ms,
        total_time: layer.base.total_time_ms,
        frames:     Some(
            layer
                .base
                .frames
                .iter()
                .map(|f| (f.x, f.y, f.scale, f.rotation_deg, f.anchor as u8))
                .collect(),
        ),
    }
}

/// Overwrite a layer's transforms with a saved frame array. Payloads in
/// already-populated slots are kept; the save format carries transforms
/// only. Applied after ingest completes so lengths line up; a saved array
/// longer than the live service is truncated to it.
pub fn apply_saved_frames(layer: &mut MediaLayer, saved: &[FrameTuple]) {
    let len = layer.base.frames.len();
    for (i, &(x, y, scale, rot, anchor)) in saved.iter().take(len).enumerate() {
        if let Some(f) = layer.base.frames.get_mut(i) {
            let payload = f.payload.take();
            *f = Frame { x, y, scale, rotation_deg: rot, anchor: anchor != 0, payload };
        }
    }
    layer.mark_dirty();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::Raster;
    use std::sync::Arc;

    #[test]
    fn extension_inference_covers_spec_table() {
        assert_eq!(source_kind_from_ext("mp4"), Some(SourceKind::Video));
        assert_eq!(source_kind_from_ext("WEBM"), Some(SourceKind::Video));
        assert_eq!(source_kind_from_ext("wav"), Some(SourceKind::Audio));
        assert_eq!(source_kind_from_ext("png"), Some(SourceKind::Image));
        assert_eq!(source_kind_from_ext("txt"), None);
    }

    #[test]
    fn descriptor_round_trip() {
        let mut tl = Timeline::default();
        tl.add(MediaLayer::image(
            "photo",
            24,
            Arc::new(Raster::solid(4, 4, [1, 2, 3, 255])),
        ));
        let json = serialize_project(&tl).unwrap();
        let parsed = parse_project(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].kind, "ImageLayer");
        assert_eq!(parsed[0].total_time, 5000);
        assert!(parsed[0].frames.as_ref().is_some_and(|f| f.len() == 120));
    }

    #[test]
    fn missing_frames_field_parses_as_none() {
        let json = r#"[{ "type": "TextLayer", "name": "hi", "width": 0, "height": 0,
                         "start_time": 0, "total_time": 5000 }]"#;
        let parsed = parse_project(json).unwrap();
        assert!(parsed[0].frames.is_none());
    }

    #[test]
    fn apply_saved_frames_overwrites_transforms_keeps_payloads() {
        let mut layer =
            MediaLayer::image("p", 24, Arc::new(Raster::solid(2, 2, [0, 0, 0, 255])));
        let r = Arc::new(Raster::solid(1, 1, [9, 9, 9, 255]));
        layer.base.frames.get_mut(0).unwrap().payload = Some(r.clone());
        let saved = vec![(5.0, 6.0, 2.0, 90.0, 1)];
        apply_saved_frames(&mut layer, &saved);
        let f = layer.base.frames.get(0).unwrap();
        assert_eq!((f.x, f.y, f.scale, f.rotation_deg), (5.0, 6.0, 2.0, 90.0));
        assert!(f.anchor);
        assert!(f.payload.is_some());
    }
}
