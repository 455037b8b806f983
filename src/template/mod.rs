//! Shader Template Engine
//!
//! Expands shader source text written in the `@`-directive language into
//! final GLSL/HLSL/MSL, driven by a [`PropertySet`] and a [`PiecesMap`]:
//!
//! - `@property(expr)` … `@end` — block kept iff `expr` is truthy.
//! - `@piece(name)` … `@end` — declares a named source fragment.
//! - `@insertpiece(name)` — expands the named piece in place.
//! - `@foreach(n, i[, start])` … `@end` — unrolls the body, substituting
//!   `@i` with the iteration index.
//! - `@counter(name)` / `@value(name)` — read-and-increment / read-only
//!   substitution of a property value.
//! - `@<property>` — plain textual substitution with the property's value.
//!
//! Expansion is a pure function of (source, pieces, properties): the same
//! inputs always produce byte-identical output. Undefined properties read
//! as 0 and undefined pieces as empty text; only malformed source (an
//! unmatched `@end`, EOF inside a block, a bad expression, or nesting
//! deeper than [`MAX_NESTING_DEPTH`]) is an error.
//!
//! Pass order mirrors the structure of the permutation pipeline: loops are
//! unrolled first, then `@property` blocks are resolved, then `@piece`
//! declarations are collected out of the text, then `@insertpiece` sites
//! are expanded (recursively — inserted pieces may insert further pieces),
//! then counters, and finally bare property substitution.

pub mod expr;

use crate::errors::{HlmsError, Result};
use crate::id::IdString;
use crate::properties::{PiecesMap, PropertySet};

/// Maximum nesting depth for blocks and piece insertion.
pub const MAX_NESTING_DEPTH: usize = 32;

/// Expand `source` into final shader text.
///
/// `pieces` supplies the fragments visible to `@insertpiece`; pieces
/// declared inline in `source` are collected into a local copy first and
/// shadow same-named entries.
pub fn expand(
    source: &str,
    props: &PropertySet,
    pieces: &PiecesMap,
    file: &str,
) -> Result<String> {
    let ctx = Context { file };

    let text = ctx.unroll_foreach(source, props, 0)?;
    let text = ctx.evaluate_properties(&text, props, 0)?;

    let mut local_pieces = pieces.clone();
    let text = ctx.extract_pieces(&text, &mut local_pieces)?;

    let text = ctx.insert_pieces(&text, &local_pieces, 0)?;
    let text = ctx.apply_counters(&text, props)?;
    ctx.substitute_properties(&text, props)
}

/// Parse a `Pieces/` file: run the loop and property passes, then collect
/// every `@piece` declaration into `out`. Text outside piece blocks is
/// discarded — piece files are parsed, never standalone-compiled.
pub fn collect_pieces(
    source: &str,
    props: &PropertySet,
    file: &str,
    out: &mut PiecesMap,
) -> Result<()> {
    let ctx = Context { file };
    let text = ctx.unroll_foreach(source, props, 0)?;
    let text = ctx.evaluate_properties(&text, props, 0)?;
    ctx.extract_pieces(&text, out)?;
    Ok(())
}

struct Context<'a> {
    file: &'a str,
}

/// Block-opening directives. `@insertpiece` is not one — it has no `@end`.
const BLOCK_OPENERS: [&str; 3] = ["property", "foreach", "piece"];

impl Context<'_> {
    fn syntax_error(&self, source: &str, pos: usize, message: impl Into<String>) -> HlmsError {
        HlmsError::TemplateSyntax {
            file: self.file.to_string(),
            line: source[..pos].matches('\n').count() + 1,
            message: message.into(),
        }
    }

    // ── Pass 1: @foreach ─────────────────────────────────────────────────

    fn unroll_foreach(&self, source: &str, props: &PropertySet, depth: usize) -> Result<String> {
        if depth > MAX_NESTING_DEPTH {
            return Err(self.syntax_error(source, 0, "@foreach nesting depth exceeds 32"));
        }

        let mut out = String::with_capacity(source.len());
        let mut pos = 0;

        while let Some((dir_start, name, args, body_start)) =
            next_directive(source, pos, "foreach")
        {
            debug_assert_eq!(name, "foreach");
            out.push_str(&source[pos..dir_start]);

            let args = args.ok_or_else(|| {
                self.syntax_error(source, dir_start, "@foreach requires (count, var[, start])")
            })?;
            let (body, after_end) = self.find_block_end(source, body_start)?;

            let parts: Vec<&str> = args.split(',').map(str::trim).collect();
            if parts.len() < 2 || parts.len() > 3 {
                return Err(self.syntax_error(
                    source,
                    dir_start,
                    format!("@foreach expects 2 or 3 arguments, got {}", parts.len()),
                ));
            }
            let count = self.int_or_property(source, dir_start, parts[0], props)?;
            let var = parts[1];
            let start = if parts.len() == 3 {
                self.int_or_property(source, dir_start, parts[2], props)?
            } else {
                0
            };

            for i in start..count {
                let iteration = substitute_token(body, var, &i.to_string());
                let iteration = self.unroll_foreach(&iteration, props, depth + 1)?;
                out.push_str(&iteration);
            }

            pos = after_end;
        }

        out.push_str(&source[pos..]);
        Ok(out)
    }

    fn int_or_property(
        &self,
        source: &str,
        pos: usize,
        arg: &str,
        props: &PropertySet,
    ) -> Result<i32> {
        if arg.is_empty() {
            return Err(self.syntax_error(source, pos, "empty @foreach argument"));
        }
        if arg.bytes().all(|b| b.is_ascii_digit()) {
            return arg
                .parse()
                .map_err(|_| self.syntax_error(source, pos, "integer literal out of range"));
        }
        // Property-referenced count; @value(x) form is accepted too.
        let name = arg
            .strip_prefix("@value(")
            .and_then(|rest| rest.strip_suffix(')'))
            .map_or(arg, str::trim);
        Ok(props.get(IdString::new(name)))
    }

    // ── Pass 2: @property blocks ─────────────────────────────────────────

    fn evaluate_properties(
        &self,
        source: &str,
        props: &PropertySet,
        depth: usize,
    ) -> Result<String> {
        if depth > MAX_NESTING_DEPTH {
            return Err(self.syntax_error(source, 0, "@property nesting depth exceeds 32"));
        }

        let mut out = String::with_capacity(source.len());
        let mut pos = 0;

        while let Some((dir_start, _, args, body_start)) =
            next_directive(source, pos, "property")
        {
            out.push_str(&source[pos..dir_start]);

            let expr_src = args.ok_or_else(|| {
                self.syntax_error(source, dir_start, "@property requires an expression")
            })?;
            let (body, after_end) = self.find_block_end(source, body_start)?;

            let value = expr::evaluate(expr_src, props)
                .map_err(|message| self.syntax_error(source, dir_start, message))?;
            if value != 0 {
                out.push_str(&self.evaluate_properties(body, props, depth + 1)?);
            }

            pos = after_end;
        }

        out.push_str(&source[pos..]);
        Ok(out)
    }

    // ── Pass 3: @piece collection ────────────────────────────────────────

    fn extract_pieces(&self, source: &str, out: &mut PiecesMap) -> Result<String> {
        let mut text = String::with_capacity(source.len());
        let mut pos = 0;

        while let Some((dir_start, _, args, body_start)) = next_directive(source, pos, "piece") {
            text.push_str(&source[pos..dir_start]);

            let name = args
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| self.syntax_error(source, dir_start, "@piece requires a name"))?;
            let (body, after_end) = self.find_block_end(source, body_start)?;

            out.set(IdString::new(name), body.to_string());
            pos = after_end;
        }

        text.push_str(&source[pos..]);

        // A stray @end at this point belongs to no block.
        if let Some(offset) = find_end_directive(&text) {
            return Err(self.syntax_error(&text, offset, "unmatched @end"));
        }
        Ok(text)
    }

    // ── Pass 4: @insertpiece ─────────────────────────────────────────────

    fn insert_pieces(&self, source: &str, pieces: &PiecesMap, depth: usize) -> Result<String> {
        if depth > MAX_NESTING_DEPTH {
            return Err(self.syntax_error(source, 0, "@insertpiece recursion depth exceeds 32"));
        }

        let mut out = String::with_capacity(source.len());
        let mut pos = 0;

        while let Some((dir_start, _, args, after)) = next_directive(source, pos, "insertpiece") {
            out.push_str(&source[pos..dir_start]);

            let name = args
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    self.syntax_error(source, dir_start, "@insertpiece requires a name")
                })?;

            // Undefined pieces expand to empty text.
            if let Some(body) = pieces.get(IdString::new(name)) {
                out.push_str(&self.insert_pieces(body, pieces, depth + 1)?);
            }

            pos = after;
        }

        out.push_str(&source[pos..]);
        Ok(out)
    }

    // ── Pass 5: @counter / @value ────────────────────────────────────────

    fn apply_counters(&self, source: &str, props: &PropertySet) -> Result<String> {
        // Counters mutate a scratch copy; expansion stays deterministic.
        let mut scratch = props.clone();
        let mut out = String::with_capacity(source.len());
        let mut pos = 0;

        loop {
            let next_counter = next_directive(source, pos, "counter");
            let next_value = next_directive(source, pos, "value");
            let (dir_start, name, args, after) = match (next_counter, next_value) {
                (Some(c), Some(v)) => {
                    if c.0 < v.0 {
                        c
                    } else {
                        v
                    }
                }
                (Some(c), None) => c,
                (None, Some(v)) => v,
                (None, None) => break,
            };

            out.push_str(&source[pos..dir_start]);

            let arg = args.map(str::trim).filter(|arg| !arg.is_empty()).ok_or_else(|| {
                self.syntax_error(source, dir_start, format!("@{name} requires a property name"))
            })?;
            let id = IdString::new(arg);
            let current = scratch.get(id);
            out.push_str(&current.to_string());
            if name == "counter" {
                scratch.set(id, current + 1);
            }

            pos = after;
        }

        out.push_str(&source[pos..]);
        Ok(out)
    }

    // ── Pass 6: bare @property substitution ──────────────────────────────

    #[allow(clippy::unused_self)]
    fn substitute_properties(&self, source: &str, props: &PropertySet) -> Result<String> {
        let bytes = source.as_bytes();
        let mut out = String::with_capacity(source.len());
        let mut pos = 0;

        while let Some(offset) = source[pos..].find('@') {
            let at = pos + offset;
            out.push_str(&source[pos..at]);

            let ident_end = ident_end(bytes, at + 1);
            if ident_end == at + 1 {
                // '@' not followed by an identifier; keep it.
                out.push('@');
                pos = at + 1;
                continue;
            }

            let name = &source[at + 1..ident_end];
            out.push_str(&props.get(IdString::new(name)).to_string());
            pos = ident_end;
        }

        out.push_str(&source[pos..]);
        Ok(out)
    }

    // ── Block scanning ───────────────────────────────────────────────────

    /// Find the body of a block whose opener ends at `body_start`, matching
    /// nested openers against `@end`. Returns (body, offset past `@end`).
    fn find_block_end<'s>(&self, source: &'s str, body_start: usize) -> Result<(&'s str, usize)> {
        let mut depth = 1usize;
        let mut pos = body_start;

        while let Some(offset) = source[pos..].find('@') {
            let at = pos + offset;
            let ident_start = at + 1;
            let end = ident_end(source.as_bytes(), ident_start);
            let name = &source[ident_start..end];

            if name == "end" {
                depth -= 1;
                if depth == 0 {
                    return Ok((&source[body_start..at], end));
                }
                pos = end;
            } else if BLOCK_OPENERS.contains(&name) {
                depth += 1;
                if depth > MAX_NESTING_DEPTH {
                    return Err(self.syntax_error(source, at, "block nesting depth exceeds 32"));
                }
                pos = end;
            } else {
                pos = ident_start;
            }
        }

        Err(self.syntax_error(
            source,
            source.len(),
            "unexpected end of file inside block (missing @end)",
        ))
    }
}

/// End offset of the identifier starting at `start` (may equal `start`).
fn ident_end(bytes: &[u8], start: usize) -> usize {
    let mut end = start;
    if end < bytes.len() && (bytes[end].is_ascii_alphabetic() || bytes[end] == b'_') {
        end += 1;
        while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
            end += 1;
        }
    }
    end
}

/// Locate the next `@<wanted>` directive at or after `from`.
///
/// Returns `(directive_offset, name, parenthesized_args, offset_after)`.
/// For block openers, `offset_after` is the start of the block body.
fn next_directive<'s>(
    source: &'s str,
    from: usize,
    wanted: &'static str,
) -> Option<(usize, &'static str, Option<&'s str>, usize)> {
    let bytes = source.as_bytes();
    let mut pos = from;

    while let Some(offset) = source[pos..].find('@') {
        let at = pos + offset;
        let ident_start = at + 1;
        let end = ident_end(bytes, ident_start);
        if &source[ident_start..end] != wanted {
            pos = ident_start;
            continue;
        }

        // Optional parenthesized argument list with nested parens.
        if end < bytes.len() && bytes[end] == b'(' {
            let mut depth = 1usize;
            let mut close = end + 1;
            while close < bytes.len() && depth > 0 {
                match bytes[close] {
                    b'(' => depth += 1,
                    b')' => depth -= 1,
                    _ => {}
                }
                close += 1;
            }
            if depth != 0 {
                // Unclosed parens; treat as plain text and keep scanning.
                pos = ident_start;
                continue;
            }
            return Some((at, wanted, Some(&source[end + 1..close - 1]), close));
        }
        return Some((at, wanted, None, end));
    }
    None
}

/// Offset of the first `@end` directive, if any.
fn find_end_directive(source: &str) -> Option<usize> {
    let bytes = source.as_bytes();
    let mut pos = 0;
    while let Some(offset) = source[pos..].find('@') {
        let at = pos + offset;
        let end = ident_end(bytes, at + 1);
        if &source[at + 1..end] == "end" {
            return Some(at);
        }
        pos = at + 1;
    }
    None
}

/// Replace `@<var>` occurrences at identifier boundaries.
fn substitute_token(source: &str, var: &str, replacement: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = String::with_capacity(source.len());
    let mut pos = 0;

    while let Some(offset) = source[pos..].find('@') {
        let at = pos + offset;
        let end = ident_end(bytes, at + 1);
        if &source[at + 1..end] == var {
            out.push_str(&source[pos..at]);
            out.push_str(replacement);
            pos = end;
        } else {
            out.push_str(&source[pos..=at]);
            pos = at + 1;
        }
    }

    out.push_str(&source[pos..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, i32)]) -> PropertySet {
        let mut set = PropertySet::new();
        for &(name, value) in pairs {
            set.set(IdString::new(name), value);
        }
        set
    }

    fn expand_str(source: &str, pairs: &[(&str, i32)]) -> String {
        expand(source, &props(pairs), &PiecesMap::new(), "test.glsl").unwrap()
    }

    #[test]
    fn test_property_block_kept_and_dropped() {
        let src = "a\n@property(colour)kept\n@end\nb";
        assert_eq!(expand_str(src, &[("colour", 1)]), "a\nkept\n\nb");
        assert_eq!(expand_str(src, &[]), "a\n\nb");
    }

    #[test]
    fn test_empty_props_removes_all_property_blocks() {
        let src = "x@property(a)A@end y@property(b > 2)B@end z";
        assert_eq!(expand_str(src, &[]), "x y z");
    }

    #[test]
    fn test_nested_property_blocks() {
        let src = "@property(a)outer @property(b)inner@end tail@end";
        assert_eq!(expand_str(src, &[("a", 1), ("b", 1)]), "outer inner tail");
        assert_eq!(expand_str(src, &[("a", 1)]), "outer  tail");
        assert_eq!(expand_str(src, &[("b", 1)]), "");
    }

    #[test]
    fn test_piece_declaration_and_insertion() {
        let src = "@piece(Greeting)hello@end@insertpiece(Greeting) world";
        assert_eq!(expand_str(src, &[]), "hello world");
    }

    #[test]
    fn test_insertpiece_undefined_expands_empty() {
        assert_eq!(expand_str("a@insertpiece(Nope)b", &[]), "ab");
    }

    #[test]
    fn test_insertpiece_recursive() {
        let mut pieces = PiecesMap::new();
        pieces.set(IdString::new("Outer"), "[@insertpiece( Inner )]".into());
        pieces.set(IdString::new("Inner"), "core".into());
        let out = expand("@insertpiece(Outer)", &PropertySet::new(), &pieces, "t").unwrap();
        assert_eq!(out, "[core]");
    }

    #[test]
    fn test_foreach_unrolls() {
        let src = "@foreach(3, n)v@n;@end";
        assert_eq!(expand_str(src, &[]), "v0;v1;v2;");
    }

    #[test]
    fn test_foreach_with_start_and_property_count() {
        let src = "@foreach(uv_count, n, 1)uv@n @end";
        assert_eq!(expand_str(src, &[("uv_count", 3)]), "uv1 uv2 ");
    }

    #[test]
    fn test_foreach_zero_iterations() {
        assert_eq!(expand_str("@foreach(uv_count, n)x@end", &[]), "");
    }

    #[test]
    fn test_counter_and_value() {
        let src = "@counter(slot) @counter(slot) @value(slot)";
        assert_eq!(expand_str(src, &[]), "0 1 2");
        assert_eq!(expand_str(src, &[("slot", 5)]), "5 6 7");
    }

    #[test]
    fn test_bare_property_substitution() {
        let src = "layout(location = @uv_count) in vec2 uv;";
        assert_eq!(
            expand_str(src, &[("uv_count", 2)]),
            "layout(location = 2) in vec2 uv;"
        );
        // Undefined property substitutes 0.
        assert_eq!(expand_str("@nope", &[]), "0");
    }

    #[test]
    fn test_expansion_is_pure() {
        let src = "@property(a)@foreach(2, n)p@n @end@end@counter(c)";
        let set = props(&[("a", 1)]);
        let pieces = PiecesMap::new();
        let first = expand(src, &set, &pieces, "t").unwrap();
        let second = expand(src, &set, &pieces, "t").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unmatched_end_is_error() {
        let err = expand("text\n@end", &PropertySet::new(), &PiecesMap::new(), "f.glsl")
            .unwrap_err();
        match err {
            HlmsError::TemplateSyntax { file, line, .. } => {
                assert_eq!(file, "f.glsl");
                assert_eq!(line, 2);
            }
            other => panic!("expected TemplateSyntax, got {other:?}"),
        }
    }

    #[test]
    fn test_eof_inside_block_is_error() {
        let err = expand("@property(a)body", &PropertySet::new(), &PiecesMap::new(), "f")
            .unwrap_err();
        assert!(matches!(err, HlmsError::TemplateSyntax { .. }));
    }

    #[test]
    fn test_bad_expression_is_error() {
        let err = expand("@property(a &&)x@end", &PropertySet::new(), &PiecesMap::new(), "f")
            .unwrap_err();
        assert!(matches!(err, HlmsError::TemplateSyntax { .. }));
    }

    #[test]
    fn test_collect_pieces_discards_outer_text() {
        let mut out = PiecesMap::new();
        collect_pieces(
            "header\n@piece(A)aaa@end middle @piece(B)bbb@end\n",
            &PropertySet::new(),
            "pieces.glsl",
            &mut out,
        )
        .unwrap();
        assert_eq!(out.get(IdString::new("A")), Some("aaa"));
        assert_eq!(out.get(IdString::new("B")), Some("bbb"));
    }

    #[test]
    fn test_collect_pieces_respects_properties() {
        let mut out = PiecesMap::new();
        collect_pieces(
            "@piece(Blend)@property(premul)pre@end@property(!premul)post@end@end",
            &props(&[("premul", 1)]),
            "pieces.glsl",
            &mut out,
        )
        .unwrap();
        assert_eq!(out.get(IdString::new("Blend")), Some("pre"));
    }
}
