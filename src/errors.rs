//! Error Types
//!
//! One variant per failure kind the material system can surface. The
//! propagation policy is: permutation-level errors (template syntax, shader
//! compile, datablock validation) are contained — one bad material must not
//! prevent other draws — while device-level errors escape to the caller,
//! who is expected to call `change_render_system`, which clears all caches.

use thiserror::Error;

use crate::id::IdString;
use crate::rhi::ShaderStage;

/// The error type for the material system.
#[derive(Error, Debug)]
pub enum HlmsError {
    /// Malformed template source: unbalanced block, bad expression, or
    /// nesting deeper than the engine supports. Fatal to the affected
    /// permutation only.
    #[error("template syntax error in '{file}' line {line}: {message}")]
    TemplateSyntax {
        file: String,
        line: usize,
        message: String,
    },

    /// A shader stage failed to compile. Carries the driver's log verbatim.
    /// The cache does not memoize failures, so correcting the source and
    /// retrying works.
    #[error("shader compile error ({stage:?}, '{file}'): {log}")]
    ShaderCompile {
        stage: ShaderStage,
        file: String,
        log: String,
    },

    /// A datablock option is inconsistent with the geometry or with another
    /// option (e.g. a texture unit addressing a UV set the mesh lacks).
    /// Fatal to the draw; the renderable is skipped.
    #[error("datablock '{datablock}': {message}")]
    DatablockValidation {
        datablock: IdString,
        message: String,
    },

    /// No datablock registered under this name.
    #[error("datablock '{0}' not found")]
    DatablockNotFound(IdString),

    /// A datablock with this name already exists.
    #[error("datablock '{0}' already exists")]
    DatablockAlreadyExists(IdString),

    /// The registry could not resolve a texture name to a GPU handle.
    #[error("texture '{name}' not found (datablock '{datablock}')")]
    TextureNotFound { datablock: IdString, name: String },

    /// The GPU device was lost. Propagated up; the caller must rebind a
    /// render system, which invalidates every cache.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// A per-draw operation ran before `prepare_pass` for the frame.
    #[error("no pass is prepared")]
    PassNotPrepared,

    /// Template archive I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A template file named by the archive layout does not exist.
    #[error("shader template '{0}' not found")]
    TemplateNotFound(String),
}

/// Alias for `Result<T, HlmsError>`.
pub type Result<T> = std::result::Result<T, HlmsError>;
