//! Unlit Datablock
//!
//! The material parameter block of the unlit family: up to sixteen diffuse
//! texture units with per-unit blend modes and UV atlas support, an
//! optional constant colour, optional alpha testing, and per-unit texture
//! animation matrices.
//!
//! Every mutation marks the block dirty; [`flush`](UnlitDatablock::flush)
//! recomputes the derived texture hash and returns it to service. Hashing
//! and packing only ever read clean blocks.

use std::any::Any;
use std::sync::Arc;

use glam::{Mat4, Vec4};
use smallvec::SmallVec;
use xxhash_rust::xxh3::Xxh3;

use crate::id::IdString;
use crate::rhi::{Blendblock, CompareFunction, Macroblock, TextureHandle};

use super::HlmsDatablock;

/// Texture units a single unlit datablock can reference.
pub const NUM_UNLIT_TEXTURE_TYPES: usize = 16;

// ─── Blend Modes ──────────────────────────────────────────────────────────────

/// How a texture unit combines with the colour accumulated so far. Each
/// variant names a piece in the template library carrying its shader
/// expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum UnlitBlendMode {
    #[default]
    NormalNonPremul,
    NormalPremul,
    Add,
    Subtract,
    Multiply,
    Multiply2x,
    Screen,
    Overlay,
    Lighten,
    Darken,
    GrainExtract,
    GrainMerge,
    Difference,
}

impl UnlitBlendMode {
    /// Template piece carrying this mode's blend expression.
    #[must_use]
    pub fn piece_name(self) -> &'static str {
        match self {
            Self::NormalNonPremul => "NormalNonPremul",
            Self::NormalPremul => "NormalPremul",
            Self::Add => "Add",
            Self::Subtract => "Subtract",
            Self::Multiply => "Multiply",
            Self::Multiply2x => "Multiply2x",
            Self::Screen => "Screen",
            Self::Overlay => "Overlay",
            Self::Lighten => "Lighten",
            Self::Darken => "Darken",
            Self::GrainExtract => "GrainExtract",
            Self::GrainMerge => "GrainMerge",
            Self::Difference => "Difference",
        }
    }

    /// Parse a material-script token.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "NormalNonPremul" => Some(Self::NormalNonPremul),
            "NormalPremul" => Some(Self::NormalPremul),
            "Add" => Some(Self::Add),
            "Subtract" => Some(Self::Subtract),
            "Multiply" => Some(Self::Multiply),
            "Multiply2x" => Some(Self::Multiply2x),
            "Screen" => Some(Self::Screen),
            "Overlay" => Some(Self::Overlay),
            "Lighten" => Some(Self::Lighten),
            "Darken" => Some(Self::Darken),
            "GrainExtract" => Some(Self::GrainExtract),
            "GrainMerge" => Some(Self::GrainMerge),
            "Difference" => Some(Self::Difference),
            _ => None,
        }
    }
}

// ─── Texture Units ────────────────────────────────────────────────────────────

/// UV window of an atlas-packed texture: `(offset.xy, scale.zw)`, packed
/// into one vec4 constant per atlas-enabled unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UvAtlasParams {
    pub u_offset: f32,
    pub v_offset: f32,
    pub u_scale: f32,
    pub v_scale: f32,
}

impl Default for UvAtlasParams {
    fn default() -> Self {
        Self {
            u_offset: 0.0,
            v_offset: 0.0,
            u_scale: 1.0,
            v_scale: 1.0,
        }
    }
}

/// One bound diffuse texture and its combine options.
#[derive(Debug, Clone)]
pub struct TextureUnit {
    pub texture: TextureHandle,
    /// Source name, kept for diagnostics and serialization.
    pub name: String,
    /// UV channel this unit samples; validated against the vertex
    /// declaration at hash time.
    pub uv_set: u8,
    pub blend_mode: UnlitBlendMode,
    pub is_atlas: bool,
    pub atlas_params: UvAtlasParams,
    /// `Some` enables texture animation for this unit; the matrix is
    /// uploaded per object.
    pub texture_matrix: Option<Mat4>,
}

impl TextureUnit {
    #[must_use]
    pub fn new(texture: TextureHandle, name: impl Into<String>) -> Self {
        Self {
            texture,
            name: name.into(),
            uv_set: 0,
            blend_mode: UnlitBlendMode::default(),
            is_atlas: false,
            atlas_params: UvAtlasParams::default(),
            texture_matrix: None,
        }
    }
}

// ─── Datablock ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockState {
    Dirty,
    Clean,
}

/// Material parameters of one unlit material.
#[derive(Debug)]
pub struct UnlitDatablock {
    name: IdString,
    macroblock: Arc<Macroblock>,
    blendblock: Arc<Blendblock>,
    units: SmallVec<[TextureUnit; 4]>,
    colour: Option<Vec4>,
    alpha_test: Option<(CompareFunction, f32)>,
    texture_hash: u32,
    state: BlockState,
}

impl UnlitDatablock {
    #[must_use]
    pub fn new(name: IdString, macroblock: Arc<Macroblock>, blendblock: Arc<Blendblock>) -> Self {
        Self {
            name,
            macroblock,
            blendblock,
            units: SmallVec::new(),
            colour: None,
            alpha_test: None,
            texture_hash: 0,
            state: BlockState::Dirty,
        }
    }

    // ─── Mutation ─────────────────────────────────────────────────────────

    /// Bind `unit` at slot `index`, replacing whatever was there. Slots in
    /// between are left untouched; units are consumed in slot order.
    ///
    /// # Panics
    /// If `index` is out of range.
    pub fn set_texture(&mut self, index: usize, unit: TextureUnit) {
        assert!(index < NUM_UNLIT_TEXTURE_TYPES, "texture unit out of range");
        if self.units.len() <= index {
            // Gaps are not representable; callers fill slots densely.
            assert_eq!(self.units.len(), index, "texture units must be dense");
            self.units.push(unit);
        } else {
            self.units[index] = unit;
        }
        self.state = BlockState::Dirty;
    }

    /// Direct access to a bound unit. Marks the block dirty.
    ///
    /// # Panics
    /// If no unit is bound at `index`.
    pub fn texture_unit_mut(&mut self, index: usize) -> &mut TextureUnit {
        self.state = BlockState::Dirty;
        &mut self.units[index]
    }

    pub fn set_colour(&mut self, colour: Option<Vec4>) {
        self.colour = colour;
        self.state = BlockState::Dirty;
    }

    pub fn set_alpha_test(&mut self, test: Option<(CompareFunction, f32)>) {
        self.alpha_test = test;
        self.state = BlockState::Dirty;
    }

    pub fn set_blend_mode(&mut self, index: usize, mode: UnlitBlendMode) {
        self.units[index].blend_mode = mode;
        self.state = BlockState::Dirty;
    }

    pub fn set_texture_matrix(&mut self, index: usize, matrix: Option<Mat4>) {
        self.units[index].texture_matrix = matrix;
        self.state = BlockState::Dirty;
    }

    pub fn set_uv_atlas(&mut self, index: usize, params: Option<UvAtlasParams>) {
        let unit = &mut self.units[index];
        match params {
            Some(params) => {
                unit.is_atlas = true;
                unit.atlas_params = params;
            }
            None => {
                unit.is_atlas = false;
                unit.atlas_params = UvAtlasParams::default();
            }
        }
        self.state = BlockState::Dirty;
    }

    /// Recompute derived state and return the block to service. Cached
    /// permutation keys of queued renderables using this block are stale
    /// after a flush that changed the texture hash.
    pub fn flush(&mut self) {
        self.texture_hash = self.calculate_texture_hash();
        self.state = BlockState::Clean;
    }

    fn calculate_texture_hash(&self) -> u32 {
        let mut hasher = Xxh3::new();
        hasher.update(&(self.units.len() as u32).to_le_bytes());
        for unit in &self.units {
            hasher.update(&unit.texture.0.to_le_bytes());
        }
        // Truncation keeps enough entropy for a rebind diff.
        hasher.digest() as u32
    }

    // ─── Access ───────────────────────────────────────────────────────────

    #[inline]
    #[must_use]
    pub fn texture_units(&self) -> &[TextureUnit] {
        &self.units
    }

    #[inline]
    #[must_use]
    pub fn num_texture_units(&self) -> usize {
        self.units.len()
    }

    /// Units with an animation matrix, in slot order.
    #[must_use]
    pub fn texture_matrix_count(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.texture_matrix.is_some())
            .count()
    }

    #[inline]
    #[must_use]
    pub fn colour(&self) -> Option<Vec4> {
        self.colour
    }

    #[inline]
    #[must_use]
    pub fn alpha_test(&self) -> Option<(CompareFunction, f32)> {
        self.alpha_test
    }
}

impl HlmsDatablock for UnlitDatablock {
    fn name(&self) -> IdString {
        self.name
    }

    fn macroblock(&self) -> &Arc<Macroblock> {
        &self.macroblock
    }

    fn blendblock(&self) -> &Arc<Blendblock> {
        &self.blendblock
    }

    fn texture_hash(&self) -> u32 {
        debug_assert_eq!(
            self.state,
            BlockState::Clean,
            "texture hash read from a dirty datablock"
        );
        self.texture_hash
    }

    fn is_clean(&self) -> bool {
        self.state == BlockState::Clean
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
