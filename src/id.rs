//! Hashed String Identifiers
//!
//! [`IdString`] is a 32-bit handle derived from a case-insensitive string by
//! FNV-1a. Equality, ordering and hashing all operate on the integer, so
//! identifiers are process-wide stable and directly comparable across
//! datablocks, properties and pieces.
//!
//! The original string is kept only for diagnostics: debug builds register
//! every constructed name in a global reverse map so `Debug`/`friendly_text`
//! can print something readable. Release builds skip the registration and
//! print the raw hash.

use std::fmt;

#[cfg(debug_assertions)]
use parking_lot::RwLock;
#[cfg(debug_assertions)]
use rustc_hash::FxHashMap;
#[cfg(debug_assertions)]
use std::sync::OnceLock;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

#[cfg(debug_assertions)]
static NAME_REGISTRY: OnceLock<RwLock<FxHashMap<u32, String>>> = OnceLock::new();

#[cfg(debug_assertions)]
fn registry() -> &'static RwLock<FxHashMap<u32, String>> {
    NAME_REGISTRY.get_or_init(|| RwLock::new(FxHashMap::default()))
}

/// A 32-bit identifier hashed from a case-insensitive string.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct IdString(pub u32);

impl IdString {
    /// Hash `name` into an identifier. Hashing is case-insensitive (ASCII).
    #[must_use]
    pub fn new(name: &str) -> Self {
        let mut hash = FNV_OFFSET_BASIS;
        for byte in name.bytes() {
            hash ^= u32::from(byte.to_ascii_lowercase());
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        let id = Self(hash);

        #[cfg(debug_assertions)]
        {
            let reg = registry();
            if !reg.read().contains_key(&hash) {
                reg.write().entry(hash).or_insert_with(|| name.to_string());
            }
        }

        id
    }

    /// Raw hash value.
    #[inline]
    #[must_use]
    pub fn value(self) -> u32 {
        self.0
    }

    /// Human-readable form for log messages.
    ///
    /// Debug builds return the original string when the identifier was
    /// constructed in this process; otherwise (and always in release) the
    /// hash is formatted as hex.
    #[must_use]
    pub fn friendly_text(self) -> String {
        #[cfg(debug_assertions)]
        {
            if let Some(name) = registry().read().get(&self.0) {
                return name.clone();
            }
        }
        format!("[Hash 0x{:08x}]", self.0)
    }
}

impl From<&str> for IdString {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Debug for IdString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IdString({})", self.friendly_text())
    }
}

impl fmt::Display for IdString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.friendly_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive() {
        assert_eq!(IdString::new("diffuse_map"), IdString::new("DIFFUSE_MAP"));
        assert_eq!(IdString::new("Alpha_Test"), IdString::new("alpha_test"));
    }

    #[test]
    fn test_distinct_names_distinct_ids() {
        assert_ne!(IdString::new("uv_count0"), IdString::new("uv_count1"));
    }

    #[test]
    fn test_stable_across_calls() {
        let a = IdString::new("blend_mode_idx3");
        let b = IdString::new("blend_mode_idx3");
        assert_eq!(a.value(), b.value());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn test_friendly_text_roundtrip() {
        let id = IdString::new("worldViewProj");
        assert_eq!(id.friendly_text(), "worldViewProj");
    }
}
