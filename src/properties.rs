//! Permutation Property Sets
//!
//! A [`PropertySet`] is the deterministic description of one shader
//! permutation: an ordered sequence of `(IdString, i32)` pairs kept sorted by
//! identifier so two equivalent sets hash identically regardless of
//! insertion order.
//!
//! The integer value encodes either a boolean flag (0/1), a small count
//! (e.g. number of texture units) or an enumerant. Reading an absent
//! property yields 0 — absence and "set to zero" are indistinguishable by
//! design, which is what lets template expressions treat undefined names as
//! falsy.
//!
//! [`PiecesMap`] holds named shader-source fragments for one shader stage,
//! stored the same way (flat sorted vector + binary search) so the combined
//! renderable hash is insertion-order independent as well.

use crate::id::IdString;

const HASH_OFFSET: u32 = 0x811c_9dc5;
const HASH_PRIME: u32 = 0x0100_0193;

/// An ordered set of `(identifier, i32)` properties.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertySet {
    props: Vec<(IdString, i32)>,
}

impl PropertySet {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { props: Vec::new() }
    }

    #[inline]
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            props: Vec::with_capacity(capacity),
        }
    }

    /// Insert or overwrite a property, preserving sort order.
    pub fn set(&mut self, id: IdString, value: i32) {
        match self.props.binary_search_by_key(&id, |&(k, _)| k) {
            Ok(idx) => self.props[idx].1 = value,
            Err(idx) => self.props.insert(idx, (id, value)),
        }
    }

    /// Value of `id`, or 0 when absent. 0 is the defined absence.
    #[must_use]
    pub fn get(&self, id: IdString) -> i32 {
        self.props
            .binary_search_by_key(&id, |&(k, _)| k)
            .map_or(0, |idx| self.props[idx].1)
    }

    /// Whether `id` was explicitly set (even to 0).
    #[must_use]
    pub fn contains(&self, id: IdString) -> bool {
        self.props.binary_search_by_key(&id, |&(k, _)| k).is_ok()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.props.clear();
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.props.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.props.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &(IdString, i32)> {
        self.props.iter()
    }

    /// Streaming 32-bit mix over `(id, value)` pairs in sorted order.
    ///
    /// Identical content produces an identical hash regardless of the order
    /// in which properties were inserted.
    #[must_use]
    pub fn hash(&self) -> u32 {
        let mut hash = HASH_OFFSET;
        for &(id, value) in &self.props {
            for byte in id.value().to_le_bytes() {
                hash = (hash ^ u32::from(byte)).wrapping_mul(HASH_PRIME);
            }
            for byte in value.to_le_bytes() {
                hash = (hash ^ u32::from(byte)).wrapping_mul(HASH_PRIME);
            }
        }
        hash
    }
}

/// Named shader-source fragments for a single shader stage.
///
/// Pieces declared in template files (`@piece(name)…@end`) or injected by
/// the renderable hasher both land here; `@insertpiece(name)` expands them
/// in place during template expansion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PiecesMap {
    pieces: Vec<(IdString, String)>,
}

impl PiecesMap {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self { pieces: Vec::new() }
    }

    /// Insert or overwrite a piece, preserving sort order.
    pub fn set(&mut self, id: IdString, source: String) {
        match self.pieces.binary_search_by_key(&id, |(k, _)| *k) {
            Ok(idx) => self.pieces[idx].1 = source,
            Err(idx) => self.pieces.insert(idx, (id, source)),
        }
    }

    /// Source of the named piece. Undefined pieces expand to empty text.
    #[must_use]
    pub fn get(&self, id: IdString) -> Option<&str> {
        self.pieces
            .binary_search_by_key(&id, |(k, _)| *k)
            .ok()
            .map(|idx| self.pieces[idx].1.as_str())
    }

    #[inline]
    #[must_use]
    pub fn contains(&self, id: IdString) -> bool {
        self.pieces.binary_search_by_key(&id, |(k, _)| *k).is_ok()
    }

    #[inline]
    pub fn clear(&mut self) {
        self.pieces.clear();
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &(IdString, String)> {
        self.pieces.iter()
    }

    /// Merge `other` into `self`; conflicting names take `other`'s text.
    pub fn merge(&mut self, other: &PiecesMap) {
        for (id, source) in &other.pieces {
            self.set(*id, source.clone());
        }
    }

    /// Streaming 32-bit mix over `(id, text)` pairs in sorted order.
    #[must_use]
    pub fn hash(&self) -> u32 {
        let mut hash = HASH_OFFSET;
        for (id, source) in &self.pieces {
            for byte in id.value().to_le_bytes() {
                hash = (hash ^ u32::from(byte)).wrapping_mul(HASH_PRIME);
            }
            for byte in source.bytes() {
                hash = (hash ^ u32::from(byte)).wrapping_mul(HASH_PRIME);
            }
        }
        hash
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let mut props = PropertySet::new();
        props.set(IdString::new("uv_count"), 2);
        props.set(IdString::new("colour"), 1);

        assert_eq!(props.get(IdString::new("uv_count")), 2);
        assert_eq!(props.get(IdString::new("colour")), 1);
        assert_eq!(props.get(IdString::new("missing")), 0);
    }

    #[test]
    fn test_set_idempotent() {
        let mut props = PropertySet::new();
        props.set(IdString::new("alpha_test"), 1);
        props.set(IdString::new("alpha_test"), 1);

        assert_eq!(props.get(IdString::new("alpha_test")), 1);
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn test_overwrite() {
        let mut props = PropertySet::new();
        props.set(IdString::new("diffuse_map"), 1);
        props.set(IdString::new("diffuse_map"), 3);

        assert_eq!(props.get(IdString::new("diffuse_map")), 3);
        assert_eq!(props.len(), 1);
    }

    #[test]
    fn test_hash_insertion_order_independent() {
        let mut a = PropertySet::new();
        a.set(IdString::new("normal"), 1);
        a.set(IdString::new("uv_count"), 2);
        a.set(IdString::new("skeleton"), 0);

        let mut b = PropertySet::new();
        b.set(IdString::new("skeleton"), 0);
        b.set(IdString::new("uv_count"), 2);
        b.set(IdString::new("normal"), 1);

        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_hash_sensitive_to_values() {
        let mut a = PropertySet::new();
        a.set(IdString::new("uv_count"), 1);
        let mut b = PropertySet::new();
        b.set(IdString::new("uv_count"), 2);

        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_pieces_undefined_is_none() {
        let pieces = PiecesMap::new();
        assert!(pieces.get(IdString::new("alpha_test_cmp_func")).is_none());
    }

    #[test]
    fn test_pieces_hash_order_independent() {
        let mut a = PiecesMap::new();
        a.set(IdString::new("blend_mode_idx0"), "src * dst".into());
        a.set(IdString::new("blend_mode_idx1"), "src + dst".into());

        let mut b = PiecesMap::new();
        b.set(IdString::new("blend_mode_idx1"), "src + dst".into());
        b.set(IdString::new("blend_mode_idx0"), "src * dst".into());

        assert_eq!(a.hash(), b.hash());
    }
}
