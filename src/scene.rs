//! Scene Interface
//!
//! The types the scene layer hands the material system each frame: vertex
//! declarations describing geometry, the [`Renderable`] trait for objects
//! that can be drawn, the per-frame [`QueuedRenderable`] records, and the
//! [`PassContext`] describing the render target / camera state of one pass.
//!
//! Scene graph, culling and queue sorting all live outside this crate; the
//! queue arrives pre-sorted and draws are emitted in queue order.

use glam::Mat4;

use crate::id::IdString;
use crate::rhi::DrawCall;

// ─── Vertex Declaration ───────────────────────────────────────────────────────

/// Vertex attribute semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexSemantic {
    Position,
    Normal,
    Tangent,
    /// Per-vertex colour.
    Colour,
    /// Texture coordinates; `index` selects the UV channel.
    TexCoord,
    BlendIndices,
    BlendWeights,
}

/// One attribute of a vertex layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VertexElement {
    pub semantic: VertexSemantic,
    /// Channel index; only meaningful for `TexCoord`.
    pub index: u8,
    /// Number of components (2 for a vec2 UV, etc.).
    pub component_count: u8,
}

/// Ordered list of vertex attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexDeclaration {
    elements: Vec<VertexElement>,
}

impl VertexDeclaration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, semantic: VertexSemantic, index: u8, component_count: u8) -> &mut Self {
        self.elements.push(VertexElement {
            semantic,
            index,
            component_count,
        });
        self
    }

    #[inline]
    pub fn elements(&self) -> impl Iterator<Item = &VertexElement> {
        self.elements.iter()
    }

    #[must_use]
    pub fn has(&self, semantic: VertexSemantic) -> bool {
        self.elements.iter().any(|e| e.semantic == semantic)
    }

    /// Number of UV channels (highest channel index + 1).
    #[must_use]
    pub fn uv_count(&self) -> u8 {
        self.elements
            .iter()
            .filter(|e| e.semantic == VertexSemantic::TexCoord)
            .map(|e| e.index + 1)
            .max()
            .unwrap_or(0)
    }
}

// ─── Renderable ───────────────────────────────────────────────────────────────

/// A drawable object, as seen by the material system.
pub trait Renderable {
    fn vertex_declaration(&self) -> &VertexDeclaration;

    /// Full world transform of the parent node.
    fn world_transform(&self) -> Mat4;

    /// Whether this draw uses the identity projection (HUD overlays).
    fn use_identity_projection(&self) -> bool {
        false
    }

    fn has_skeleton(&self) -> bool {
        false
    }

    fn draw_call(&self) -> DrawCall;
}

// ─── Queued Renderable ────────────────────────────────────────────────────────

/// One entry of the per-frame draw queue.
///
/// Produced by the scene for every visible object; the material system
/// memoizes `final_hash` into it on first resolution so subsequent frames
/// skip property derivation until the datablock invalidates it.
pub struct QueuedRenderable<'a> {
    pub renderable: &'a dyn Renderable,
    /// Name of the datablock to draw with.
    pub datablock: IdString,
    pub(crate) final_hash: Option<u32>,
}

impl<'a> QueuedRenderable<'a> {
    #[must_use]
    pub fn new(renderable: &'a dyn Renderable, datablock: IdString) -> Self {
        Self {
            renderable,
            datablock,
            final_hash: None,
        }
    }

    /// Cached permutation key, once resolved.
    #[inline]
    #[must_use]
    pub fn final_hash(&self) -> Option<u32> {
        self.final_hash
    }

    /// Drop the cached key (the datablock changed under us).
    pub fn invalidate(&mut self) {
        self.final_hash = None;
    }
}

// ─── Pass Context ─────────────────────────────────────────────────────────────

/// Broad class of the colour/depth targets a pass renders into; part of
/// the pass hash so HDR and LDR variants never share pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TargetFormatClass {
    #[default]
    Ldr,
    Hdr,
    DepthOnly,
}

/// Shadow-mapping state resolved by the compositor for caster passes.
#[derive(Debug, Clone, Copy)]
pub struct ShadowParams {
    pub light_view: Mat4,
    pub light_projection: Mat4,
    /// (near, far) of the shadow camera, for depth-range constants.
    pub depth_range: (f32, f32),
}

/// Camera / target state for one pass, supplied by the scene.
#[derive(Debug, Clone, Copy)]
pub struct PassContext {
    pub view_matrix: Mat4,
    /// Projection already in the render system's clip-depth range.
    pub projection_matrix: Mat4,
    /// Whether the bound target needs a Y-flip of the projection.
    pub requires_texture_flipping: bool,
    pub caster_pass: bool,
    pub dual_paraboloid: bool,
    pub target_format: TargetFormatClass,
    pub shadow: Option<ShadowParams>,
}

impl Default for PassContext {
    fn default() -> Self {
        Self {
            view_matrix: Mat4::IDENTITY,
            projection_matrix: Mat4::IDENTITY,
            requires_texture_flipping: false,
            caster_pass: false,
            dual_paraboloid: false,
            target_format: TargetFormatClass::Ldr,
            shadow: None,
        }
    }
}
