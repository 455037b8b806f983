//! Unlit Material Family
//!
//! The [`HlmsFamily`] strategy for unlit rendering: no lights, no surface
//! model — a constant and/or vertex colour combined with up to sixteen
//! diffuse textures through per-unit blend modes, plus alpha testing, UV
//! atlases and texture animation.
//!
//! Property and piece names here are the contract with the templates under
//! `templates/`; renaming one side breaks the other.

use std::sync::Arc;

use glam::{Mat4, Vec4};
use smallvec::SmallVec;

use crate::errors::{HlmsError, Result};
use crate::id::IdString;
use crate::properties::PropertySet;
use crate::rhi::{
    Blendblock, CompareFunction, Macroblock, RenderSystem, ShaderStage, TextureManager,
    VariabilityMask,
};
use crate::scene::{Renderable, VertexSemantic};

use super::cache::{ConstantLayout, ShaderCacheEntry};
use super::datablock::{
    NUM_UNLIT_TEXTURE_TYPES, TextureUnit, UnlitBlendMode, UnlitDatablock, UvAtlasParams,
};
use super::pass::PreparedPass;
use super::{HlmsDatablock, HlmsFamily, StagePieces};

/// The unlit family strategy. Stateless; all per-material state lives in
/// [`UnlitDatablock`].
#[derive(Debug, Default)]
pub struct UnlitHlms;

impl UnlitHlms {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

fn as_unlit(block: &dyn HlmsDatablock) -> Result<&UnlitDatablock> {
    block
        .as_any()
        .downcast_ref::<UnlitDatablock>()
        .ok_or_else(|| HlmsError::DatablockValidation {
            datablock: block.name(),
            message: "datablock does not belong to the unlit family".into(),
        })
}

// ─── Script Parsing ───────────────────────────────────────────────────────────

/// `key{i}` → `i`, for per-unit options.
fn unit_index(key: &str, prefix: &str) -> Option<usize> {
    key.strip_prefix(prefix)?.parse().ok()
}

fn parse_f32(datablock: IdString, key: &str, token: Option<&str>) -> Result<f32> {
    token
        .and_then(|t| t.parse().ok())
        .ok_or_else(|| HlmsError::DatablockValidation {
            datablock,
            message: format!("option '{key}' expects a number"),
        })
}

fn unit_mut<'d>(
    datablock: &'d mut UnlitDatablock,
    name: IdString,
    key: &str,
    index: usize,
) -> Result<&'d mut TextureUnit> {
    if index >= datablock.num_texture_units() {
        return Err(HlmsError::DatablockValidation {
            datablock: name,
            message: format!("option '{key}' must follow 'diffuse_map{index}'"),
        });
    }
    Ok(datablock.texture_unit_mut(index))
}

impl UnlitHlms {
    /// Serialize a datablock back to script form. Re-parsing the output
    /// reproduces the same derived properties and texture hash.
    #[must_use]
    pub fn export(block: &UnlitDatablock) -> String {
        let mut out = String::new();
        if let Some(colour) = block.colour() {
            out.push_str(&format!(
                "diffuse {} {} {} {}\n",
                colour.x, colour.y, colour.z, colour.w
            ));
        }
        if let Some((cmp, threshold)) = block.alpha_test() {
            out.push_str(&format!("alpha_test {} {threshold}\n", cmp.symbol()));
        }
        for (i, unit) in block.texture_units().iter().enumerate() {
            out.push_str(&format!("diffuse_map{i} {}\n", unit.name));
            if unit.uv_set != 0 {
                out.push_str(&format!("uv_set{i} {}\n", unit.uv_set));
            }
            if unit.blend_mode != UnlitBlendMode::default() {
                out.push_str(&format!("blendmode{i} {}\n", unit.blend_mode.piece_name()));
            }
            if unit.is_atlas {
                let p = unit.atlas_params;
                out.push_str(&format!(
                    "atlas{i} {} {} {} {}\n",
                    p.u_offset, p.v_offset, p.u_scale, p.v_scale
                ));
            }
            if unit.texture_matrix.is_some() {
                out.push_str(&format!("animate{i}\n"));
            }
        }
        out
    }

    fn parse_script(
        name: IdString,
        block: &mut UnlitDatablock,
        script: &str,
        textures: &mut dyn TextureManager,
    ) -> Result<()> {
        for line in script.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut tokens = line.split_whitespace();
            let key = tokens.next().unwrap_or_default();

            match key {
                "diffuse" => {
                    let r = parse_f32(name, key, tokens.next())?;
                    let g = parse_f32(name, key, tokens.next())?;
                    let b = parse_f32(name, key, tokens.next())?;
                    let a = parse_f32(name, key, tokens.next())?;
                    block.set_colour(Some(Vec4::new(r, g, b, a)));
                }
                "alpha_test" => {
                    let cmp = tokens.next().and_then(CompareFunction::parse).ok_or_else(|| {
                        HlmsError::DatablockValidation {
                            datablock: name,
                            message: "alpha_test expects a comparison and a threshold".into(),
                        }
                    })?;
                    let threshold = parse_f32(name, key, tokens.next())?;
                    block.set_alpha_test(Some((cmp, threshold)));
                }
                _ => Self::parse_unit_option(name, block, key, &mut tokens, textures)?,
            }
        }
        Ok(())
    }

    fn parse_unit_option<'s>(
        name: IdString,
        block: &mut UnlitDatablock,
        key: &str,
        tokens: &mut impl Iterator<Item = &'s str>,
        textures: &mut dyn TextureManager,
    ) -> Result<()> {
        if let Some(index) = unit_index(key, "diffuse_map") {
            if index >= NUM_UNLIT_TEXTURE_TYPES {
                return Err(HlmsError::DatablockValidation {
                    datablock: name,
                    message: format!(
                        "texture unit {index} out of range (max {})",
                        NUM_UNLIT_TEXTURE_TYPES - 1
                    ),
                });
            }
            let tex_name = tokens.next().ok_or_else(|| HlmsError::DatablockValidation {
                datablock: name,
                message: format!("'{key}' expects a texture name"),
            })?;
            let handle =
                textures
                    .acquire(tex_name)
                    .ok_or_else(|| HlmsError::TextureNotFound {
                        datablock: name,
                        name: tex_name.to_string(),
                    })?;
            block.set_texture(index, TextureUnit::new(handle, tex_name));
        } else if let Some(index) = unit_index(key, "uv_set") {
            let set = parse_f32(name, key, tokens.next())?;
            unit_mut(block, name, key, index)?.uv_set = set as u8;
        } else if let Some(index) = unit_index(key, "blendmode") {
            let mode = tokens.next().and_then(UnlitBlendMode::parse).ok_or_else(|| {
                HlmsError::DatablockValidation {
                    datablock: name,
                    message: format!("'{key}' expects a blend mode name"),
                }
            })?;
            unit_mut(block, name, key, index)?.blend_mode = mode;
        } else if let Some(index) = unit_index(key, "atlas") {
            let u_offset = parse_f32(name, key, tokens.next())?;
            let v_offset = parse_f32(name, key, tokens.next())?;
            let u_scale = parse_f32(name, key, tokens.next())?;
            let v_scale = parse_f32(name, key, tokens.next())?;
            unit_mut(block, name, key, index)?;
            block.set_uv_atlas(
                index,
                Some(UvAtlasParams {
                    u_offset,
                    v_offset,
                    u_scale,
                    v_scale,
                }),
            );
        } else if let Some(index) = unit_index(key, "animate") {
            unit_mut(block, name, key, index)?.texture_matrix = Some(Mat4::IDENTITY);
        } else {
            return Err(HlmsError::DatablockValidation {
                datablock: name,
                message: format!("unknown option '{key}'"),
            });
        }
        Ok(())
    }
}

// ─── Constant Packing Helpers ─────────────────────────────────────────────────

fn write_bytes(buffer: &mut [u8], cursor: &mut usize, bytes: &[u8]) {
    buffer[*cursor..*cursor + bytes.len()].copy_from_slice(bytes);
    *cursor += bytes.len();
}

// ─── Family Implementation ────────────────────────────────────────────────────

impl HlmsFamily for UnlitHlms {
    fn name(&self) -> &str {
        "unlit"
    }

    fn create_datablock(
        &self,
        name: IdString,
        macroblock: Arc<Macroblock>,
        blendblock: Arc<Blendblock>,
        script: &str,
        textures: &mut dyn TextureManager,
    ) -> Result<Box<dyn HlmsDatablock>> {
        let mut block = UnlitDatablock::new(name, macroblock, blendblock);
        Self::parse_script(name, &mut block, script, textures)?;
        block.flush();
        Ok(Box::new(block))
    }

    fn calculate_properties(
        &self,
        renderable: &dyn Renderable,
        datablock: &dyn HlmsDatablock,
        props: &mut PropertySet,
        pieces: &mut StagePieces,
    ) -> Result<()> {
        let block = as_unlit(datablock)?;
        let decl = renderable.vertex_declaration();

        // Geometry-driven properties.
        let uv_count = decl.uv_count();
        props.set(IdString::new("hlms_uv_count"), i32::from(uv_count));
        for element in decl.elements() {
            if element.semantic == VertexSemantic::TexCoord {
                props.set(
                    IdString::new(&format!("hlms_uv_count{}", element.index)),
                    i32::from(element.component_count),
                );
            }
        }
        if decl.has(VertexSemantic::Colour) {
            props.set(IdString::new("hlms_colour"), 1);
        }
        if decl.has(VertexSemantic::Normal) {
            props.set(IdString::new("hlms_normal"), 1);
        }
        if renderable.has_skeleton() || decl.has(VertexSemantic::BlendIndices) {
            props.set(IdString::new("hlms_skeleton"), 1);
        }

        // Datablock-driven properties.
        if block.colour().is_some() {
            props.set(IdString::new("diffuse"), 1);
        }
        let units = block.texture_units();
        if !units.is_empty() {
            props.set(IdString::new("diffuse_map"), units.len() as i32);
        }

        let mut atlas_count = 0;
        let mut animated_channels: u32 = 0;
        for (i, unit) in units.iter().enumerate() {
            if unit.uv_set >= uv_count {
                return Err(HlmsError::DatablockValidation {
                    datablock: datablock.name(),
                    message: format!(
                        "texture unit {i} reads uv_set {} but the mesh has {uv_count} UV channel(s)",
                        unit.uv_set
                    ),
                });
            }
            props.set(
                IdString::new(&format!("diffuse_map_count{i}")),
                i32::from(unit.uv_set),
            );
            pieces.stage_mut(ShaderStage::Pixel).set(
                IdString::new(&format!("blend_mode_idx{i}")),
                format!("@insertpiece( {} )", unit.blend_mode.piece_name()),
            );
            if unit.is_atlas {
                props.set(IdString::new(&format!("uv_atlas{i}")), 1);
                atlas_count += 1;
            }
            // Texture matrices are keyed by the UV channel they transform,
            // matching the vertex shader's per-channel gating; the channel
            // can carry at most one.
            if unit.texture_matrix.is_some() {
                let channel = u32::from(unit.uv_set);
                if animated_channels & (1 << channel) != 0 {
                    return Err(HlmsError::DatablockValidation {
                        datablock: datablock.name(),
                        message: format!(
                            "texture unit {i} animates uv_set {} which another unit already animates",
                            unit.uv_set
                        ),
                    });
                }
                animated_channels |= 1 << channel;
                props.set(
                    IdString::new(&format!("hlms_texture_matrix_count{}", unit.uv_set)),
                    1,
                );
            }
        }
        if atlas_count > 0 {
            props.set(IdString::new("uv_atlas"), atlas_count);
        }
        if animated_channels != 0 {
            props.set(
                IdString::new("hlms_texture_matrix_count"),
                animated_channels.count_ones() as i32,
            );
        }

        if let Some((cmp, _)) = block.alpha_test() {
            props.set(IdString::new("alpha_test"), 1);
            pieces.stage_mut(ShaderStage::Pixel).set(
                IdString::new("alpha_test_cmp_func"),
                cmp.symbol().to_string(),
            );
        }

        Ok(())
    }

    fn declare_layout(&self, props: &PropertySet) -> ConstantLayout {
        let mut layout = ConstantLayout::default();

        layout
            .vertex
            .push("worldViewProj", 64, VariabilityMask::PER_OBJECT);
        let matrices = props.get(IdString::new("hlms_texture_matrix_count"));
        for i in 0..matrices {
            layout
                .vertex
                .push(&format!("texture_matrix{i}"), 64, VariabilityMask::PER_OBJECT);
        }
        if props.get(IdString::new("hlms_shadowcaster")) != 0
            && props.get(IdString::new("hlms_num_shadow_maps")) != 0
        {
            layout
                .vertex
                .push("shadowDepthRange", 8, VariabilityMask::PER_PASS);
        }

        if props.get(IdString::new("diffuse")) != 0 {
            layout
                .pixel
                .push("constColour", 16, VariabilityMask::PER_OBJECT);
        }
        if props.get(IdString::new("alpha_test")) != 0 {
            layout
                .pixel
                .push("alpha_test_threshold", 4, VariabilityMask::PER_OBJECT);
        }
        let atlases = props.get(IdString::new("uv_atlas"));
        for i in 0..atlases {
            layout
                .pixel
                .push(&format!("atlas_offsets{i}"), 16, VariabilityMask::PER_OBJECT);
        }

        layout
    }

    fn sampler_units(&self, props: &PropertySet) -> Vec<u8> {
        // One unit per sampler, each advanced exactly once.
        let count = props.get(IdString::new("diffuse_map"));
        (0..count).map(|i| i as u8).collect()
    }

    fn pack_per_object(
        &self,
        device: &mut dyn RenderSystem,
        entry: &ShaderCacheEntry,
        renderable: &dyn Renderable,
        datablock: &dyn HlmsDatablock,
        pass: &PreparedPass,
        mask: VariabilityMask,
        last_texture_hash: Option<u32>,
    ) -> Result<u32> {
        let block = as_unlit(datablock)?;

        // Vertex constants: worldViewProj, then texture matrices in UV
        // channel order (the order the shader's matrix indices advance in),
        // then the caster depth range.
        let vertex_bytes = entry.layout.vertex.total_bytes as usize;
        let buffer = device.map_constant_buffer(ShaderStage::Vertex, vertex_bytes)?;
        let mut cursor = 0;

        let view_proj = pass.view_proj[usize::from(renderable.use_identity_projection())];
        let world_view_proj = view_proj * renderable.world_transform();
        write_bytes(buffer, &mut cursor, bytemuck::bytes_of(&world_view_proj));
        let mut animated: SmallVec<[&TextureUnit; 8]> = block
            .texture_units()
            .iter()
            .filter(|unit| unit.texture_matrix.is_some())
            .collect();
        animated.sort_unstable_by_key(|unit| unit.uv_set);
        for unit in animated {
            if let Some(matrix) = &unit.texture_matrix {
                write_bytes(buffer, &mut cursor, bytemuck::bytes_of(matrix));
            }
        }
        if pass.caster_pass
            && let Some((near, inv_range)) = pass.shadow_depth_range
        {
            write_bytes(buffer, &mut cursor, bytemuck::cast_slice(&[near, inv_range]));
        }
        debug_assert_eq!(
            cursor, vertex_bytes,
            "vertex constants diverge from the declared layout"
        );
        device.commit_constants(ShaderStage::Vertex, mask)?;

        // Pixel constants: colour, alpha threshold, atlas windows.
        let pixel_bytes = entry.layout.pixel.total_bytes as usize;
        if pixel_bytes > 0 {
            let buffer = device.map_constant_buffer(ShaderStage::Pixel, pixel_bytes)?;
            let mut cursor = 0;

            if let Some(colour) = block.colour() {
                write_bytes(buffer, &mut cursor, bytemuck::bytes_of(&colour));
            }
            if let Some((_, threshold)) = block.alpha_test() {
                write_bytes(buffer, &mut cursor, bytemuck::bytes_of(&threshold));
            }
            for unit in block.texture_units() {
                if unit.is_atlas {
                    let p = unit.atlas_params;
                    let packed = [p.u_offset, p.v_offset, p.u_scale, p.v_scale];
                    write_bytes(buffer, &mut cursor, bytemuck::cast_slice(&packed));
                }
            }
            debug_assert_eq!(
                cursor, pixel_bytes,
                "pixel constants diverge from the declared layout"
            );
            device.commit_constants(ShaderStage::Pixel, mask)?;
        }

        // Texture binds only when the bound set actually differs.
        let texture_hash = block.texture_hash();
        if last_texture_hash != Some(texture_hash) {
            for (i, unit) in block.texture_units().iter().enumerate() {
                device.bind_texture(i as u8, unit.texture)?;
            }
            device.disable_texture_units_from(block.num_texture_units() as u8)?;
        }

        Ok(texture_hash)
    }
}
