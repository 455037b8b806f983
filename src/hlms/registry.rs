//! Datablock Registry
//!
//! Owns every live datablock by name, deduplicates the shared state blocks
//! ([`Macroblock`] / [`Blendblock`]) behind `Arc`s so equality is pointer
//! equality, and rate-limits validation noise to one log line per
//! (datablock, message) pair.

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use log::warn;
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use crate::errors::{HlmsError, Result};
use crate::id::IdString;
use crate::rhi::{Blendblock, Macroblock};

use super::HlmsDatablock;

/// Name-addressed datablock store with state-block deduplication.
#[derive(Default)]
pub struct DatablockRegistry {
    datablocks: FxHashMap<IdString, Box<dyn HlmsDatablock>>,
    macroblocks: FxHashMap<Macroblock, Arc<Macroblock>>,
    blendblocks: FxHashMap<Blendblock, Arc<Blendblock>>,
    /// (datablock, message-hash) pairs already reported.
    logged: FxHashSet<(IdString, u64)>,
}

impl DatablockRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Storage ──────────────────────────────────────────────────────────

    /// Register a freshly created datablock. Names are unique; a clash is
    /// an error rather than a silent replace.
    pub fn insert(&mut self, block: Box<dyn HlmsDatablock>) -> Result<()> {
        let name = block.name();
        if self.datablocks.contains_key(&name) {
            return Err(HlmsError::DatablockAlreadyExists(name));
        }
        self.datablocks.insert(name, block);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: IdString) -> Option<&dyn HlmsDatablock> {
        self.datablocks.get(&name).map(Box::as_ref)
    }

    pub fn get_mut(&mut self, name: IdString) -> Option<&mut dyn HlmsDatablock> {
        self.datablocks.get_mut(&name).map(Box::as_mut)
    }

    pub fn remove(&mut self, name: IdString) -> Option<Box<dyn HlmsDatablock>> {
        self.datablocks.remove(&name)
    }

    /// Drop every datablock. The dedup pools survive; an identical
    /// macroblock requested later reuses the old allocation.
    pub fn clear(&mut self) {
        self.datablocks.clear();
        self.logged.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.datablocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.datablocks.is_empty()
    }

    // ─── State-Block Pools ────────────────────────────────────────────────

    /// Shared handle for `desc`; identical content yields the same `Arc`.
    pub fn macroblock(&mut self, desc: Macroblock) -> Arc<Macroblock> {
        self.macroblocks
            .entry(desc)
            .or_insert_with(|| Arc::new(desc))
            .clone()
    }

    /// Shared handle for `desc`; identical content yields the same `Arc`.
    pub fn blendblock(&mut self, desc: Blendblock) -> Arc<Blendblock> {
        self.blendblocks
            .entry(desc)
            .or_insert_with(|| Arc::new(desc))
            .clone()
    }

    // ─── Validation Logging ───────────────────────────────────────────────

    /// Log `message` against `datablock` unless the same pair was already
    /// reported. Returns whether anything was emitted.
    pub fn log_once(&mut self, datablock: IdString, message: &str) -> bool {
        let mut hasher = FxHasher::default();
        message.hash(&mut hasher);
        if !self.logged.insert((datablock, hasher.finish())) {
            return false;
        }
        warn!("datablock '{datablock}': {message}");
        true
    }
}
