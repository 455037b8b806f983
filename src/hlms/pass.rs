//! Pass Preparation
//!
//! Runs once per pass, before any per-object work: derives the pass-scoped
//! property set, hashes it into the upper half of the permutation key, and
//! composes the view·projection matrices every draw of the pass shares.

use glam::Mat4;

use crate::id::IdString;
use crate::properties::PropertySet;
use crate::scene::{PassContext, TargetFormatClass};

// ─── Prepared Pass ────────────────────────────────────────────────────────────

/// Pass-scoped state frozen by [`prepare`], consumed by every draw of the
/// pass.
#[derive(Debug, Clone)]
pub struct PreparedPass {
    /// Upper-half contribution to the final permutation key.
    pub pass_hash: u32,
    /// `[0]` is view·projection (Y-flipped when the target needs it);
    /// `[1]` is identity, selected by draws that bypass the camera.
    pub view_proj: [Mat4; 2],
    pub caster_pass: bool,
    /// `(near, 1 / (far - near))` of the shadow camera, for depth-range
    /// constants in caster shaders.
    pub shadow_depth_range: Option<(f32, f32)>,
    /// Pass-scoped properties, merged into each permutation before
    /// template expansion.
    pub properties: PropertySet,
}

/// Derive the pass hash and shared matrices for one pass.
#[must_use]
pub fn prepare(ctx: &PassContext) -> PreparedPass {
    let mut props = PropertySet::new();
    if ctx.caster_pass {
        props.set(IdString::new("hlms_shadowcaster"), 1);
    }
    if ctx.dual_paraboloid {
        props.set(IdString::new("hlms_dual_paraboloid_mapping"), 1);
    }
    let format = match ctx.target_format {
        TargetFormatClass::Ldr => 0,
        TargetFormatClass::Hdr => 1,
        TargetFormatClass::DepthOnly => 2,
    };
    props.set(IdString::new("hlms_target_format"), format);
    if ctx.shadow.is_some() {
        props.set(IdString::new("hlms_num_shadow_maps"), 1);
    }

    let (view, mut projection) = match (ctx.caster_pass, &ctx.shadow) {
        (true, Some(shadow)) => (shadow.light_view, shadow.light_projection),
        _ => (ctx.view_matrix, ctx.projection_matrix),
    };

    // Rendering into a texture flips the window-space Y axis on some
    // APIs; negating row 1 of the projection cancels it out.
    if ctx.requires_texture_flipping {
        projection.x_axis.y = -projection.x_axis.y;
        projection.y_axis.y = -projection.y_axis.y;
        projection.z_axis.y = -projection.z_axis.y;
        projection.w_axis.y = -projection.w_axis.y;
    }

    let shadow_depth_range = ctx.shadow.as_ref().map(|shadow| {
        let (near, far) = shadow.depth_range;
        (near, 1.0 / (far - near))
    });

    PreparedPass {
        pass_hash: props.hash(),
        view_proj: [projection * view, Mat4::IDENTITY],
        caster_pass: ctx.caster_pass,
        shadow_depth_range,
        properties: props,
    }
}

/// Combine the two halves of the permutation key: pass bits above,
/// renderable bits below.
#[inline]
#[must_use]
pub fn combine_hashes(pass_hash: u32, renderable_hash: u32) -> u32 {
    (pass_hash << 16) | (renderable_hash & 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::ShadowParams;
    use glam::Vec4;

    #[test]
    fn test_identity_slot_is_always_identity() {
        let prepared = prepare(&PassContext::default());
        assert_eq!(prepared.view_proj[1], Mat4::IDENTITY);
    }

    #[test]
    fn test_texture_flip_negates_projection_row() {
        let ctx = PassContext {
            projection_matrix: Mat4::perspective_lh(1.0, 16.0 / 9.0, 0.1, 100.0),
            ..PassContext::default()
        };
        let upright = prepare(&ctx);
        let flipped = prepare(&PassContext {
            requires_texture_flipping: true,
            ..ctx
        });

        let v = Vec4::new(0.3, 0.7, 2.0, 1.0);
        let a = upright.view_proj[0] * v;
        let b = flipped.view_proj[0] * v;
        assert_eq!(a.x, b.x);
        assert_eq!(a.y, -b.y);
        assert_eq!(a.z, b.z);
        assert_eq!(a.w, b.w);
    }

    #[test]
    fn test_caster_pass_uses_the_light_camera() {
        let light_view = Mat4::from_translation(glam::Vec3::new(0.0, -10.0, 0.0));
        let light_projection = Mat4::orthographic_lh(-5.0, 5.0, -5.0, 5.0, 2.0, 52.0);
        let prepared = prepare(&PassContext {
            caster_pass: true,
            shadow: Some(ShadowParams {
                light_view,
                light_projection,
                depth_range: (2.0, 52.0),
            }),
            ..PassContext::default()
        });

        assert_eq!(prepared.view_proj[0], light_projection * light_view);
        let (near, inv_range) = prepared.shadow_depth_range.unwrap();
        assert_eq!(near, 2.0);
        assert_eq!(inv_range, 1.0 / 50.0);
    }

    #[test]
    fn test_caster_pass_changes_hash() {
        let normal = prepare(&PassContext::default());
        let caster = prepare(&PassContext {
            caster_pass: true,
            ..PassContext::default()
        });
        assert_ne!(normal.pass_hash, caster.pass_hash);
    }

    #[test]
    fn test_combine_keeps_renderable_bits_low() {
        let combined = combine_hashes(0xABCD, 0x1234_5678);
        assert_eq!(combined, (0xABCD << 16) | 0x5678);
    }
}
