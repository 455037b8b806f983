//! Template Archive
//!
//! Where shader template text comes from. The stock unlit templates are
//! embedded into the binary at build time; a filesystem archive exists for
//! template development, where editing a `.glsl` and re-running beats
//! recompiling the engine.
//!
//! Layout inside an archive, mirrored by both backends:
//!
//! ```text
//! <Api>/<StageDir>/<StageDir>.<ext>   entry template per stage
//! <Api>/Pieces/*.<ext>                shared piece libraries
//! ```

use std::path::PathBuf;

use rust_embed::RustEmbed;

use crate::errors::{HlmsError, Result};
use crate::rhi::{ShaderApi, ShaderStage};

#[derive(RustEmbed)]
#[folder = "src/hlms/templates"]
struct EmbeddedTemplates;

/// A source of shader template text.
pub enum TemplateArchive {
    /// The templates compiled into the binary.
    Embedded,
    /// A directory on disk with the same layout.
    Filesystem(PathBuf),
}

impl TemplateArchive {
    #[must_use]
    pub fn embedded() -> Self {
        Self::Embedded
    }

    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self::Filesystem(root.into())
    }

    /// Read one file by archive-relative path.
    pub fn read(&self, rel: &str) -> Result<String> {
        match self {
            Self::Embedded => EmbeddedTemplates::get(rel)
                .map(|file| String::from_utf8_lossy(&file.data).into_owned())
                .ok_or_else(|| HlmsError::TemplateNotFound(rel.to_string())),
            Self::Filesystem(root) => {
                let path = root.join(rel);
                if !path.is_file() {
                    return Err(HlmsError::TemplateNotFound(rel.to_string()));
                }
                Ok(std::fs::read_to_string(path)?)
            }
        }
    }

    fn stage_rel(api: ShaderApi, stage: ShaderStage) -> String {
        format!(
            "{api}/{stage}/{stage}.{ext}",
            api = api.directory(),
            stage = stage.directory(),
            ext = api.extension()
        )
    }

    /// Whether an entry template exists for `stage`.
    #[must_use]
    pub fn has_stage(&self, api: ShaderApi, stage: ShaderStage) -> bool {
        let rel = Self::stage_rel(api, stage);
        match self {
            Self::Embedded => EmbeddedTemplates::get(&rel).is_some(),
            Self::Filesystem(root) => root.join(rel).is_file(),
        }
    }

    /// Entry template for `stage`: `(file name for diagnostics, source)`.
    pub fn stage_template(&self, api: ShaderApi, stage: ShaderStage) -> Result<(String, String)> {
        let rel = Self::stage_rel(api, stage);
        let source = self.read(&rel)?;
        Ok((rel, source))
    }

    /// Every piece library under `<Api>/Pieces/`, sorted by name so
    /// collection order (and thus shadowing) is deterministic.
    pub fn piece_files(&self, api: ShaderApi) -> Result<Vec<(String, String)>> {
        let prefix = format!("{}/Pieces/", api.directory());
        let mut names: Vec<String> = match self {
            Self::Embedded => EmbeddedTemplates::iter()
                .filter(|path| path.starts_with(&prefix))
                .map(|path| path.into_owned())
                .collect(),
            Self::Filesystem(root) => {
                let dir = root.join(&prefix);
                if !dir.is_dir() {
                    return Ok(Vec::new());
                }
                std::fs::read_dir(dir)?
                    .filter_map(std::result::Result::ok)
                    .filter(|entry| entry.path().is_file())
                    .map(|entry| format!("{prefix}{}", entry.file_name().to_string_lossy()))
                    .collect()
            }
        };
        names.sort_unstable();

        names
            .into_iter()
            .map(|name| {
                let source = self.read(&name)?;
                Ok((name, source))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_unlit_templates_present() {
        let archive = TemplateArchive::embedded();
        assert!(archive.has_stage(ShaderApi::Glsl, ShaderStage::Vertex));
        assert!(archive.has_stage(ShaderApi::Glsl, ShaderStage::Pixel));
        assert!(!archive.has_stage(ShaderApi::Glsl, ShaderStage::Geometry));
    }

    #[test]
    fn test_embedded_piece_files_sorted() {
        let archive = TemplateArchive::embedded();
        let pieces = archive.piece_files(ShaderApi::Glsl).unwrap();
        assert!(!pieces.is_empty());
        let names: Vec<&str> = pieces.iter().map(|(n, _)| n.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_missing_template_is_an_error() {
        let archive = TemplateArchive::embedded();
        let err = archive.read("GLSL/Nope/nothing.glsl").unwrap_err();
        assert!(matches!(err, HlmsError::TemplateNotFound(_)));
    }
}
