#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::too_many_arguments)]

pub mod errors;
pub mod hlms;
pub mod id;
pub mod properties;
pub mod rhi;
pub mod scene;
pub mod template;

pub use errors::{HlmsError, Result};
pub use hlms::archive::TemplateArchive;
pub use hlms::cache::{ConstantLayout, ShaderCache, ShaderCacheEntry};
pub use hlms::datablock::{TextureUnit, UnlitBlendMode, UnlitDatablock, UvAtlasParams};
pub use hlms::pass::{PreparedPass, combine_hashes, prepare as prepare_pass};
pub use hlms::registry::DatablockRegistry;
pub use hlms::unlit::UnlitHlms;
pub use hlms::{Hlms, HlmsDatablock, HlmsFamily, StagePieces};
pub use id::IdString;
pub use properties::{PiecesMap, PropertySet};
pub use rhi::{
    Blendblock, CompareFunction, DrawCall, Macroblock, NullRenderSystem, RenderSystem, ShaderApi,
    ShaderStage, TextureManager, VariabilityMask,
};
pub use scene::{
    PassContext, QueuedRenderable, Renderable, ShadowParams, TargetFormatClass, VertexDeclaration,
    VertexSemantic,
};
