//! Shader Cache
//!
//! Content-addressed store of compiled permutations, keyed by the final
//! hash. Lookups are the per-draw fast path; a miss triggers exactly one
//! compile per key no matter how many threads miss simultaneously — the
//! losers block on a condvar until the winner publishes (or fails).
//!
//! Failed compiles are never memoized, so a fixed template recompiles on
//! the next request instead of serving a stale error.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::errors::Result;
use crate::id::IdString;
use crate::rhi::{PipelineHandle, ShaderHandle, ShaderStage, VariabilityMask};

// ─── Constant Layout ──────────────────────────────────────────────────────────

/// One named constant inside a stage's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantDef {
    pub name: IdString,
    /// Byte offset from the start of the stage buffer.
    pub offset: u32,
    pub bytes: u32,
    pub variability: VariabilityMask,
}

/// Packed layout of one stage's constant buffer.
#[derive(Debug, Clone, Default)]
pub struct StageLayout {
    pub total_bytes: u32,
    pub constants: Vec<ConstantDef>,
}

impl StageLayout {
    /// Append a constant at the current end of the buffer.
    pub fn push(&mut self, name: &str, bytes: u32, variability: VariabilityMask) {
        self.constants.push(ConstantDef {
            name: IdString::new(name),
            offset: self.total_bytes,
            bytes,
            variability,
        });
        self.total_bytes += bytes;
    }

    #[must_use]
    pub fn offset_of(&self, name: IdString) -> Option<u32> {
        self.constants
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.offset)
    }
}

/// Explicit byte layout of the constant buffers a permutation consumes.
///
/// Declared once at compile time; the per-frame packer follows it instead
/// of re-deriving offsets from properties, and asserts against it in debug
/// builds.
#[derive(Debug, Clone, Default)]
pub struct ConstantLayout {
    pub vertex: StageLayout,
    pub pixel: StageLayout,
}

impl ConstantLayout {
    #[must_use]
    pub fn stage(&self, stage: ShaderStage) -> &StageLayout {
        match stage {
            ShaderStage::Pixel => &self.pixel,
            _ => &self.vertex,
        }
    }
}

// ─── Cache Entry ──────────────────────────────────────────────────────────────

/// One compiled permutation.
#[derive(Debug)]
pub struct ShaderCacheEntry {
    pub final_hash: u32,
    pub pipeline: PipelineHandle,
    pub shaders: Vec<(ShaderStage, ShaderHandle)>,
    pub layout: ConstantLayout,
    /// Texture unit assigned to each sampler of the pixel stage, in
    /// declaration order (unit `i` serves sampler `i`).
    pub sampler_units: Vec<u8>,
}

// ─── Cache ────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct CacheState {
    entries: FxHashMap<u32, Arc<ShaderCacheEntry>>,
    in_flight: FxHashSet<u32>,
}

/// The permutation store. See the module docs for the concurrency
/// contract.
#[derive(Default)]
pub struct ShaderCache {
    state: Mutex<CacheState>,
    published: Condvar,
}

impl ShaderCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fast-path lookup; `None` means the caller must go through
    /// [`get_or_build`](Self::get_or_build).
    #[must_use]
    pub fn lookup(&self, final_hash: u32) -> Option<Arc<ShaderCacheEntry>> {
        self.state.lock().entries.get(&final_hash).cloned()
    }

    /// Return the entry for `final_hash`, invoking `build` on a miss.
    ///
    /// At most one caller runs `build` for a given key; concurrent callers
    /// for the same key block until it either publishes or fails. A failed
    /// build leaves no entry behind — the next caller retries.
    pub fn get_or_build<F>(&self, final_hash: u32, build: F) -> Result<Arc<ShaderCacheEntry>>
    where
        F: FnOnce() -> Result<ShaderCacheEntry>,
    {
        {
            let mut state = self.state.lock();
            loop {
                if let Some(entry) = state.entries.get(&final_hash) {
                    return Ok(entry.clone());
                }
                if state.in_flight.insert(final_hash) {
                    break;
                }
                self.published.wait(&mut state);
            }
        }

        let built = build();

        let mut state = self.state.lock();
        state.in_flight.remove(&final_hash);
        self.published.notify_all();
        match built {
            Ok(entry) => {
                let entry = Arc::new(entry);
                state.entries.insert(final_hash, entry.clone());
                Ok(entry)
            }
            Err(err) => Err(err),
        }
    }

    /// Drop every entry. Device objects referenced by the entries are the
    /// render system's to reclaim.
    pub fn clear(&self) {
        self.state.lock().entries.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::HlmsError;

    fn entry(hash: u32) -> ShaderCacheEntry {
        ShaderCacheEntry {
            final_hash: hash,
            pipeline: PipelineHandle(hash),
            shaders: Vec::new(),
            layout: ConstantLayout::default(),
            sampler_units: Vec::new(),
        }
    }

    #[test]
    fn test_build_runs_once_per_key() {
        let cache = ShaderCache::new();
        let mut builds = 0;
        for _ in 0..3 {
            cache
                .get_or_build(7, || {
                    builds += 1;
                    Ok(entry(7))
                })
                .unwrap();
        }
        assert_eq!(builds, 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_failure_is_not_memoized() {
        let cache = ShaderCache::new();
        let err = cache.get_or_build(9, || {
            Err(HlmsError::ShaderCompile {
                stage: ShaderStage::Pixel,
                file: "PixelShader_ps.glsl".into(),
                log: "syntax error".into(),
            })
        });
        assert!(err.is_err());
        assert!(cache.lookup(9).is_none());

        // The fixed template compiles on the next request.
        cache.get_or_build(9, || Ok(entry(9))).unwrap();
        assert!(cache.lookup(9).is_some());
    }

    #[test]
    fn test_clear_empties_the_store() {
        let cache = ShaderCache::new();
        cache.get_or_build(1, || Ok(entry(1))).unwrap();
        cache.get_or_build(2, || Ok(entry(2))).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_stage_layout_offsets() {
        let mut layout = StageLayout::default();
        layout.push("worldViewProj", 64, VariabilityMask::PER_OBJECT);
        layout.push("texture_matrix0", 64, VariabilityMask::PER_OBJECT);
        assert_eq!(layout.total_bytes, 128);
        assert_eq!(layout.offset_of(IdString::new("texture_matrix0")), Some(64));
        assert_eq!(layout.offset_of(IdString::new("missing")), None);
    }
}
