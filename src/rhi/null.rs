//! Null Render System
//!
//! A backend that compiles nothing and draws nowhere, but records every
//! call it receives. Drives the integration tests and headless tools; also
//! a reference for the call sequence a real backend must accept.

use rustc_hash::FxHashMap;

use crate::errors::Result;

use super::{
    Blendblock, BufferHandle, DrawCall, Macroblock, PipelineHandle, RenderSystem, ShaderHandle,
    ShaderStage, TextureHandle, TextureManager, VariabilityMask,
};

/// One recorded device call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOp {
    CompileShader(ShaderStage),
    CreatePipeline(PipelineHandle),
    BindPipeline(PipelineHandle),
    CommitConstants(ShaderStage, VariabilityMask),
    BindTexture(u8, TextureHandle),
    DisableTextureUnitsFrom(u8),
    Draw(BufferHandle, u32),
}

/// Recording no-op backend.
#[derive(Debug, Default)]
pub struct NullRenderSystem {
    next_handle: u32,
    /// Sources handed to `compile_shader`, in submission order.
    shader_sources: Vec<(ShaderStage, String)>,
    constant_buffers: FxHashMap<ShaderStage, Vec<u8>>,
    textures: FxHashMap<String, TextureHandle>,
    ops: Vec<RenderOp>,
    /// Substring that makes `compile_shader` fail, for error-path tests.
    poison: Option<String>,
}

impl NullRenderSystem {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Any shader source containing `needle` will fail to compile with a
    /// canned driver log.
    pub fn poison_source(&mut self, needle: &str) {
        self.poison = Some(needle.to_string());
    }

    pub fn clear_poison(&mut self) {
        self.poison = None;
    }

    /// Recorded calls, in submission order.
    #[must_use]
    pub fn ops(&self) -> &[RenderOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Number of `compile_shader` calls so far.
    #[must_use]
    pub fn compile_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, RenderOp::CompileShader(_)))
            .count()
    }

    /// Texture binds recorded since the last `clear_ops`.
    #[must_use]
    pub fn texture_bind_count(&self) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, RenderOp::BindTexture(..)))
            .count()
    }

    /// The source last handed to `compile_shader` for `stage`.
    #[must_use]
    pub fn last_source(&self, stage: ShaderStage) -> Option<&str> {
        self.shader_sources
            .iter()
            .rev()
            .find(|(s, _)| *s == stage)
            .map(|(_, src)| src.as_str())
    }

    /// Bytes currently in the constant buffer backing `stage`.
    #[must_use]
    pub fn constant_buffer(&self, stage: ShaderStage) -> &[u8] {
        self.constant_buffers
            .get(&stage)
            .map_or(&[], Vec::as_slice)
    }

    fn alloc(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }
}

impl RenderSystem for NullRenderSystem {
    fn name(&self) -> &str {
        "NULL Rendering Subsystem"
    }

    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> std::result::Result<ShaderHandle, String> {
        if let Some(needle) = &self.poison
            && source.contains(needle.as_str())
        {
            return Err(format!("0(1) : error C0000: syntax error near '{needle}'"));
        }
        let handle = ShaderHandle(self.alloc());
        self.shader_sources.push((stage, source.to_string()));
        self.ops.push(RenderOp::CompileShader(stage));
        Ok(handle)
    }

    fn create_pipeline(
        &mut self,
        _stages: &[(ShaderStage, ShaderHandle)],
        _macroblock: &Macroblock,
        _blendblock: &Blendblock,
    ) -> Result<PipelineHandle> {
        let handle = PipelineHandle(self.alloc());
        self.ops.push(RenderOp::CreatePipeline(handle));
        Ok(handle)
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> Result<()> {
        self.ops.push(RenderOp::BindPipeline(pipeline));
        Ok(())
    }

    fn map_constant_buffer(&mut self, stage: ShaderStage, bytes: usize) -> Result<&mut [u8]> {
        let buffer = self.constant_buffers.entry(stage).or_default();
        buffer.clear();
        buffer.resize(bytes, 0);
        Ok(buffer.as_mut_slice())
    }

    fn commit_constants(&mut self, stage: ShaderStage, mask: VariabilityMask) -> Result<()> {
        self.ops.push(RenderOp::CommitConstants(stage, mask));
        Ok(())
    }

    fn bind_texture(&mut self, unit: u8, texture: TextureHandle) -> Result<()> {
        self.ops.push(RenderOp::BindTexture(unit, texture));
        Ok(())
    }

    fn disable_texture_units_from(&mut self, unit: u8) -> Result<()> {
        self.ops.push(RenderOp::DisableTextureUnitsFrom(unit));
        Ok(())
    }

    fn draw(&mut self, draw: &DrawCall) -> Result<()> {
        self.ops
            .push(RenderOp::Draw(draw.vertex_buffer, draw.element_count));
        Ok(())
    }
}

impl TextureManager for NullRenderSystem {
    /// Every name resolves; identical names share a handle.
    fn acquire(&mut self, name: &str) -> Option<TextureHandle> {
        if let Some(&handle) = self.textures.get(name) {
            return Some(handle);
        }
        let handle = TextureHandle(self.alloc());
        self.textures.insert(name.to_string(), handle);
        Some(handle)
    }
}
