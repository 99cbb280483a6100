// crates/layercut-core/src/frame.rs
//
// Frame: one per-instant transform record in a layer's frame service.
// Position is in output-canvas logical pixels, scale is multiplicative,
// rotation is degrees clockwise. The payload is an optional shared handle
// to a decoded raster (video frames); image/text/audio layers carry
// transforms only.

use std::sync::Arc;

use crate::surface::Raster;

#[derive(Clone, Debug)]
pub struct Frame {
    pub x:            f32,
    pub y:            f32,
    pub scale:        f32,
    pub rotation_deg: f32,
    /// Keyframe-like mark: sampling heuristics prefer anchor frames.
    pub anchor:       bool,
    pub payload:      Option<Arc<Raster>>,
}

impl Frame {
    /// The identity transform with no payload.
    pub fn neutral() -> Self {
        Self { x: 0.0, y: 0.0, scale: 1.0, rotation_deg: 0.0, anchor: false, payload: None }
    }

    pub fn with_payload(payload: Arc<Raster>) -> Self {
        Self { payload: Some(payload), ..Self::neutral() }
    }

    /// True when the transform leaves the raster untouched, letting render
    /// skip the per-pixel inverse-mapping path.
    pub fn is_identity(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.scale == 1.0 && self.rotation_deg == 0.0
    }
}

#[inline]
fn lerp(a: f32, b: f32, alpha: f32) -> f32 {
    a + (b - a) * alpha
}

/// Linear interpolation between two frames at `alpha` in [0, 1].
///
/// Rotation is interpolated linearly in degrees: a 350°→10° tween goes the
/// long way around rather than through 0°. Known quirk, kept.
///
/// The payload is the nearest non-null carrier, preferring anchor frames:
/// an anchored payload on either side wins over proximity; otherwise the
/// nearer side's payload is taken, falling back to the other side.
pub fn interpolate(a: &Frame, b: &Frame, alpha: f32) -> Frame {
    let near_a = alpha <= 0.5;
    let payload = match (a.anchor && a.payload.is_some(), b.anchor && b.payload.is_some()) {
        (true, true)  => if near_a { a.payload.clone() } else { b.payload.clone() },
        (true, false) => a.payload.clone(),
        (false, true) => b.payload.clone(),
        (false, false) => {
            if near_a {
                a.payload.clone().or_else(|| b.payload.clone())
            } else {
                b.payload.clone().or_else(|| a.payload.clone())
            }
        }
    };
    Frame {
        x:            lerp(a.x, b.x, alpha),
        y:            lerp(a.y, b.y, alpha),
        scale:        lerp(a.scale, b.scale, alpha),
        rotation_deg: lerp(a.rotation_deg, b.rotation_deg, alpha),
        anchor:       false,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raster() -> Arc<Raster> {
        Arc::new(Raster::solid(2, 2, [255, 0, 0, 255]))
    }

    #[test]
    fn neutral_is_identity() {
        assert!(Frame::neutral().is_identity());
    }

    #[test]
    fn interpolate_midpoint() {
        let a = Frame { x: 0.0, y: 10.0, scale: 1.0, rotation_deg: 0.0, ..Frame::neutral() };
        let b = Frame { x: 20.0, y: 30.0, scale: 3.0, rotation_deg: 90.0, ..Frame::neutral() };
        let m = interpolate(&a, &b, 0.5);
        assert_eq!(m.x, 10.0);
        assert_eq!(m.y, 20.0);
        assert_eq!(m.scale, 2.0);
        assert_eq!(m.rotation_deg, 45.0);
        assert!(!m.anchor);
    }

    #[test]
    fn interpolate_rotation_is_naive_linear() {
        let a = Frame { rotation_deg: 350.0, ..Frame::neutral() };
        let b = Frame { rotation_deg: 10.0, ..Frame::neutral() };
        // No shortest-arc handling: midpoint is 180, not 0.
        assert_eq!(interpolate(&a, &b, 0.5).rotation_deg, 180.0);
    }

    #[test]
    fn interpolate_payload_prefers_anchor() {
        let mut a = Frame::with_payload(raster());
        a.anchor = true;
        let b = Frame::with_payload(raster());
        // Even at alpha close to b, the anchored side wins.
        let out = interpolate(&a, &b, 0.9);
        assert!(Arc::ptr_eq(out.payload.as_ref().unwrap(), a.payload.as_ref().unwrap()));
    }

    #[test]
    fn interpolate_payload_falls_back_to_non_null() {
        let a = Frame::neutral();
        let b = Frame::with_payload(raster());
        let out = interpolate(&a, &b, 0.1);
        assert!(out.payload.is_some());
    }
}
