//! High-Level Material System
//!
//! The pipeline that turns material parameter blocks plus geometry into
//! compiled GPU pipelines and packed constant buffers:
//!
//! 1. [`Hlms::prepare_pass`] freezes pass-scoped state and its hash.
//! 2. Per renderable, the family strategy derives a [`PropertySet`] and
//!    injected pieces; their hash becomes the low half of the permutation
//!    key, the pass hash the high half.
//! 3. A cache miss on the key expands the family's templates, compiles the
//!    stages and assembles a pipeline, exactly once per key.
//! 4. [`Hlms::render`] walks the pre-sorted queue, packing constants per
//!    the entry's declared layout and minimizing pipeline and texture
//!    rebinds.
//!
//! The core is family-agnostic: everything material-semantic lives behind
//! [`HlmsFamily`], the unlit implementation being [`unlit::UnlitHlms`].

pub mod archive;
pub mod cache;
pub mod datablock;
pub mod pass;
pub mod registry;
pub mod unlit;

use std::any::Any;
use std::sync::Arc;

use log::{debug, info};
use rustc_hash::FxHashMap;

use crate::errors::{HlmsError, Result};
use crate::id::IdString;
use crate::properties::{PiecesMap, PropertySet};
use crate::rhi::{
    Blendblock, Macroblock, RenderSystem, ShaderApi, ShaderStage, TextureManager, VariabilityMask,
};
use crate::scene::{PassContext, QueuedRenderable, Renderable};
use crate::template;

use archive::TemplateArchive;
use cache::{ConstantLayout, ShaderCache, ShaderCacheEntry};
use pass::PreparedPass;
use registry::DatablockRegistry;

// ─── Datablock Abstraction ────────────────────────────────────────────────────

/// What the family-agnostic core needs from a material parameter block.
/// Concrete families downcast via [`as_any`](Self::as_any).
pub trait HlmsDatablock: Any {
    fn name(&self) -> IdString;
    fn macroblock(&self) -> &Arc<Macroblock>;
    fn blendblock(&self) -> &Arc<Blendblock>;
    /// Hash of the bound texture set, for rebind elision.
    fn texture_hash(&self) -> u32;
    /// Whether derived state is current (see the datablock lifecycle).
    fn is_clean(&self) -> bool;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

// ─── Per-Stage Pieces ─────────────────────────────────────────────────────────

/// The pieces a renderable hash injects, one map per shader stage.
#[derive(Debug, Clone, Default)]
pub struct StagePieces {
    stages: [PiecesMap; ShaderStage::COUNT],
}

impl StagePieces {
    #[inline]
    #[must_use]
    pub fn stage(&self, stage: ShaderStage) -> &PiecesMap {
        &self.stages[stage.index()]
    }

    #[inline]
    pub fn stage_mut(&mut self, stage: ShaderStage) -> &mut PiecesMap {
        &mut self.stages[stage.index()]
    }

    /// Order-independent hash over all stages.
    #[must_use]
    pub fn hash(&self) -> u32 {
        self.stages
            .iter()
            .fold(0x811c_9dc5u32, |acc, map| {
                acc.wrapping_mul(0x0100_0193) ^ map.hash()
            })
    }
}

// ─── Family Strategy ──────────────────────────────────────────────────────────

/// The material-semantic half of the system. One implementation per
/// material family (unlit, PBR, …); the core never sees family internals.
pub trait HlmsFamily {
    /// Family name, for logs.
    fn name(&self) -> &str;

    /// Parse a material script body into a fresh datablock.
    fn create_datablock(
        &self,
        name: IdString,
        macroblock: Arc<Macroblock>,
        blendblock: Arc<Blendblock>,
        script: &str,
        textures: &mut dyn TextureManager,
    ) -> Result<Box<dyn HlmsDatablock>>;

    /// Derive the permutation properties and injected pieces for one
    /// (renderable, datablock) pairing. Errors mean the combination is
    /// invalid and the draw must be skipped.
    fn calculate_properties(
        &self,
        renderable: &dyn Renderable,
        datablock: &dyn HlmsDatablock,
        props: &mut PropertySet,
        pieces: &mut StagePieces,
    ) -> Result<()>;

    /// Declare the constant-buffer layout the packed properties imply.
    fn declare_layout(&self, props: &PropertySet) -> ConstantLayout;

    /// Texture unit serving each pixel-stage sampler, in declaration order.
    fn sampler_units(&self, props: &PropertySet) -> Vec<u8>;

    /// Pack the per-object constants and bind textures for one draw.
    /// `last_texture_hash` is the hash bound by the previous draw (if any);
    /// returns this draw's, which the caller threads into the next.
    fn pack_per_object(
        &self,
        device: &mut dyn RenderSystem,
        entry: &ShaderCacheEntry,
        renderable: &dyn Renderable,
        datablock: &dyn HlmsDatablock,
        pass: &PreparedPass,
        mask: VariabilityMask,
        last_texture_hash: Option<u32>,
    ) -> Result<u32>;
}

// ─── Facade ───────────────────────────────────────────────────────────────────

#[derive(Clone)]
struct RenderableCacheEntry {
    props: PropertySet,
    pieces: StagePieces,
}

/// The material system. Owns the datablock registry, the shader cache and
/// the render device; generic over the backend so headless tests can
/// inspect a [`NullRenderSystem`](crate::rhi::NullRenderSystem) directly.
pub struct Hlms<R: RenderSystem> {
    family: Box<dyn HlmsFamily>,
    archive: TemplateArchive,
    api: ShaderApi,
    device: R,
    cache: ShaderCache,
    registry: DatablockRegistry,
    /// Permutation inputs by the low half of the key, kept so a cache miss
    /// can rebuild without re-walking the renderable.
    renderable_cache: FxHashMap<u16, RenderableCacheEntry>,
    pass: Option<PreparedPass>,
}

impl<R: RenderSystem> Hlms<R> {
    pub fn new(family: Box<dyn HlmsFamily>, archive: TemplateArchive, api: ShaderApi, device: R) -> Self {
        info!(
            "material system up: family '{}', device '{}'",
            family.name(),
            device.name()
        );
        Self {
            family,
            archive,
            api,
            device,
            cache: ShaderCache::new(),
            registry: DatablockRegistry::new(),
            renderable_cache: FxHashMap::default(),
            pass: None,
        }
    }

    // ─── Accessors ────────────────────────────────────────────────────────

    #[inline]
    pub fn device(&self) -> &R {
        &self.device
    }

    #[inline]
    pub fn device_mut(&mut self) -> &mut R {
        &mut self.device
    }

    #[inline]
    pub fn registry(&self) -> &DatablockRegistry {
        &self.registry
    }

    #[inline]
    pub fn registry_mut(&mut self) -> &mut DatablockRegistry {
        &mut self.registry
    }

    #[must_use]
    pub fn datablock(&self, name: IdString) -> Option<&dyn HlmsDatablock> {
        self.registry.get(name)
    }

    #[inline]
    #[must_use]
    pub fn shader_cache(&self) -> &ShaderCache {
        &self.cache
    }

    // ─── Datablock Management ─────────────────────────────────────────────

    /// Parse `script` into a new datablock registered under `name`.
    /// `textures` resolves texture names; use
    /// [`create_datablock`](Self::create_datablock) when the device doubles
    /// as the texture manager.
    pub fn create_datablock_with(
        &mut self,
        name: &str,
        macroblock: Macroblock,
        blendblock: Blendblock,
        script: &str,
        textures: &mut dyn TextureManager,
    ) -> Result<IdString> {
        let id = IdString::new(name);
        if self.registry.get(id).is_some() {
            return Err(HlmsError::DatablockAlreadyExists(id));
        }
        let macroblock = self.registry.macroblock(macroblock);
        let blendblock = self.registry.blendblock(blendblock);
        let block = self
            .family
            .create_datablock(id, macroblock, blendblock, script, textures)?;
        self.registry.insert(block)?;
        debug!("created datablock '{id}'");
        Ok(id)
    }

    /// Drop every datablock. Queued renderables referencing them must not
    /// be submitted afterwards.
    pub fn destroy_all_datablocks(&mut self) {
        self.registry.clear();
        self.renderable_cache.clear();
    }

    // ─── Cache Management ─────────────────────────────────────────────────

    /// Drop every compiled permutation; templates recompile on demand.
    pub fn clear_shader_cache(&mut self) {
        self.cache.clear();
        self.renderable_cache.clear();
    }

    /// Swap the device. Every compiled permutation belonged to the old
    /// device, so the shader cache empties; datablocks survive.
    pub fn change_render_system(&mut self, device: R) {
        info!("render system changed to '{}'", device.name());
        self.device = device;
        self.clear_shader_cache();
        self.pass = None;
    }

    // ─── Per-Pass / Per-Object ────────────────────────────────────────────

    /// Freeze pass state; returns the pass hash (the upper half of every
    /// permutation key resolved until the next call).
    pub fn prepare_pass(&mut self, ctx: &PassContext) -> u32 {
        let prepared = pass::prepare(ctx);
        let hash = prepared.pass_hash;
        self.pass = Some(prepared);
        hash
    }

    /// Resolve (and memoize into `queued`) the final permutation key for
    /// one queue entry under the current pass.
    pub fn calculate_hash_for(&mut self, queued: &mut QueuedRenderable<'_>) -> Result<u32> {
        let pass = self.pass.clone().ok_or(HlmsError::PassNotPrepared)?;
        self.resolve_hash(&pass, queued)
    }

    fn resolve_hash(
        &mut self,
        pass: &PreparedPass,
        queued: &mut QueuedRenderable<'_>,
    ) -> Result<u32> {
        let Self {
            family,
            registry,
            renderable_cache,
            ..
        } = self;
        let block = registry
            .get(queued.datablock)
            .ok_or(HlmsError::DatablockNotFound(queued.datablock))?;
        debug_assert!(block.is_clean(), "hashing against a dirty datablock");

        let mut props = PropertySet::new();
        let mut pieces = StagePieces::default();
        family.calculate_properties(queued.renderable, block, &mut props, &mut pieces)?;

        let renderable_hash = props.hash().wrapping_mul(0x0100_0193) ^ pieces.hash();
        renderable_cache.insert(
            (renderable_hash & 0xFFFF) as u16,
            RenderableCacheEntry { props, pieces },
        );

        let final_hash = pass::combine_hashes(pass.pass_hash, renderable_hash);
        queued.final_hash = Some(final_hash);
        Ok(final_hash)
    }

    /// The compiled permutation for `final_hash`, compiling on a miss.
    fn shader_for(
        &mut self,
        pass: &PreparedPass,
        final_hash: u32,
        macroblock: &Macroblock,
        blendblock: &Blendblock,
    ) -> Result<Arc<ShaderCacheEntry>> {
        if let Some(entry) = self.cache.lookup(final_hash) {
            return Ok(entry);
        }

        let Self {
            family,
            archive,
            api,
            device,
            cache,
            renderable_cache,
            ..
        } = self;
        let api = *api;
        let inputs = renderable_cache
            .get(&((final_hash & 0xFFFF) as u16))
            .cloned()
            .ok_or(HlmsError::PassNotPrepared)?;

        cache.get_or_build(final_hash, || {
            debug!("compiling permutation {final_hash:08x}");

            let mut props = inputs.props.clone();
            for &(id, value) in pass.properties.iter() {
                props.set(id, value);
            }

            let piece_files = archive.piece_files(api)?;
            let mut shaders = Vec::new();
            for stage in ShaderStage::ALL {
                if !archive.has_stage(api, stage) {
                    continue;
                }
                // Library pieces first; renderable-injected pieces win on a
                // name clash.
                let mut pieces = PiecesMap::new();
                for (name, source) in &piece_files {
                    template::collect_pieces(source, &props, name, &mut pieces)?;
                }
                pieces.merge(inputs.pieces.stage(stage));

                let (file, source) = archive.stage_template(api, stage)?;
                let expanded = template::expand(&source, &props, &pieces, &file)?;
                let handle = device
                    .compile_shader(stage, &expanded)
                    .map_err(|log| HlmsError::ShaderCompile { stage, file, log })?;
                shaders.push((stage, handle));
            }

            let pipeline = device.create_pipeline(&shaders, macroblock, blendblock)?;
            Ok(ShaderCacheEntry {
                final_hash,
                pipeline,
                shaders,
                layout: family.declare_layout(&props),
                sampler_units: family.sampler_units(&props),
            })
        })
    }

    // ─── Render Loop ──────────────────────────────────────────────────────

    /// Draw a pre-sorted queue under the current pass.
    ///
    /// Per-material failures (validation, template syntax, compile errors)
    /// skip the draw and are logged once per (datablock, message); a lost
    /// device aborts the queue and escapes.
    pub fn render(&mut self, queue: &mut [QueuedRenderable<'_>]) -> Result<()> {
        let pass = self.pass.clone().ok_or(HlmsError::PassNotPrepared)?;
        let mut last_pipeline: Option<u32> = None;
        let mut last_texture_hash: Option<u32> = None;

        for queued in queue.iter_mut() {
            match self.draw_one(&pass, queued, &mut last_pipeline, &mut last_texture_hash) {
                Ok(()) => {}
                Err(err @ HlmsError::DeviceLost(_)) => return Err(err),
                Err(err) => {
                    self.registry.log_once(queued.datablock, &err.to_string());
                }
            }
        }
        Ok(())
    }

    fn draw_one(
        &mut self,
        pass: &PreparedPass,
        queued: &mut QueuedRenderable<'_>,
        last_pipeline: &mut Option<u32>,
        last_texture_hash: &mut Option<u32>,
    ) -> Result<()> {
        let mut final_hash = match queued.final_hash {
            Some(hash) => hash,
            None => self.resolve_hash(pass, queued)?,
        };
        // A cached key can outlive its memoized inputs (cache cleared since);
        // rebuild them before compiling.
        if self.cache.lookup(final_hash).is_none()
            && !self
                .renderable_cache
                .contains_key(&((final_hash & 0xFFFF) as u16))
        {
            final_hash = self.resolve_hash(pass, queued)?;
        }

        let block = self
            .registry
            .get(queued.datablock)
            .ok_or(HlmsError::DatablockNotFound(queued.datablock))?;
        let macroblock = block.macroblock().clone();
        let blendblock = block.blendblock().clone();

        let entry = self.shader_for(pass, final_hash, &macroblock, &blendblock)?;

        let mask = if *last_pipeline == Some(final_hash) {
            VariabilityMask::PER_OBJECT
        } else {
            self.device.bind_pipeline(entry.pipeline)?;
            *last_pipeline = Some(final_hash);
            VariabilityMask::ALL
        };

        let Self {
            family,
            device,
            registry,
            ..
        } = self;
        let block = registry
            .get(queued.datablock)
            .ok_or(HlmsError::DatablockNotFound(queued.datablock))?;
        let bound = family.pack_per_object(
            device,
            &entry,
            queued.renderable,
            block,
            pass,
            mask,
            *last_texture_hash,
        )?;
        *last_texture_hash = Some(bound);

        device.draw(&queued.renderable.draw_call())
    }
}

impl<R: RenderSystem + TextureManager> Hlms<R> {
    /// As [`create_datablock_with`](Self::create_datablock_with), with the
    /// device doubling as the texture manager.
    pub fn create_datablock(
        &mut self,
        name: &str,
        macroblock: Macroblock,
        blendblock: Blendblock,
        script: &str,
    ) -> Result<IdString> {
        let id = IdString::new(name);
        if self.registry.get(id).is_some() {
            return Err(HlmsError::DatablockAlreadyExists(id));
        }
        let Self {
            family,
            registry,
            device,
            ..
        } = self;
        let macroblock = registry.macroblock(macroblock);
        let blendblock = registry.blendblock(blendblock);
        let block = family.create_datablock(id, macroblock, blendblock, script, device)?;
        registry.insert(block)?;
        debug!("created datablock '{id}'");
        Ok(id)
    }
}
