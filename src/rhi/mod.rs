//! Render-System Interface
//!
//! The material system never talks to a GPU API directly; it consumes the
//! capability set below. Concrete backends (D3D11, GL, Metal, …) live
//! outside this crate — [`NullRenderSystem`] is the only in-crate
//! implementation, used for tests and headless runs.
//!
//! The state descriptors ([`Macroblock`], [`Blendblock`]) are plain
//! hashable mirrors of the fixed-function state a pipeline bakes in, so
//! they can serve as deduplication keys.

mod null;

pub use null::{NullRenderSystem, RenderOp};

use crate::errors::Result;

// ─── Shader Stages & APIs ─────────────────────────────────────────────────────

/// Shader pipeline stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
    Hull,
    Domain,
    Compute,
}

impl ShaderStage {
    pub const COUNT: usize = 6;

    /// All stages, in pipeline order.
    pub const ALL: [ShaderStage; Self::COUNT] = [
        Self::Vertex,
        Self::Pixel,
        Self::Geometry,
        Self::Hull,
        Self::Domain,
        Self::Compute,
    ];

    /// Index into per-stage arrays.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::Vertex => 0,
            Self::Pixel => 1,
            Self::Geometry => 2,
            Self::Hull => 3,
            Self::Domain => 4,
            Self::Compute => 5,
        }
    }

    /// Directory name inside a template archive.
    #[must_use]
    pub fn directory(self) -> &'static str {
        match self {
            Self::Vertex => "VertexShader_vs",
            Self::Pixel => "PixelShader_ps",
            Self::Geometry => "GeometryShader_gs",
            Self::Hull => "HullShader_hs",
            Self::Domain => "DomainShader_ds",
            Self::Compute => "ComputeShader_cs",
        }
    }
}

/// Shading language a template archive targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderApi {
    Glsl,
    Hlsl,
    Metal,
}

impl ShaderApi {
    /// Directory name inside a template archive.
    #[must_use]
    pub fn directory(self) -> &'static str {
        match self {
            Self::Glsl => "GLSL",
            Self::Hlsl => "HLSL",
            Self::Metal => "Metal",
        }
    }

    /// Source file extension.
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Glsl => "glsl",
            Self::Hlsl => "hlsl",
            Self::Metal => "metal",
        }
    }
}

// ─── Handles ──────────────────────────────────────────────────────────────────

/// Opaque handle to a compiled shader stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub u32);

/// Opaque handle to an assembled pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub u32);

/// Opaque handle to a GPU texture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureHandle(pub u32);

/// Opaque handle to a vertex or index buffer, owned by the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub u32);

// ─── Fixed-Function State Descriptors ─────────────────────────────────────────

/// Depth/alpha comparison functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareFunction {
    Never,
    Less,
    #[default]
    LessEqual,
    Equal,
    NotEqual,
    GreaterEqual,
    Greater,
    Always,
}

impl CompareFunction {
    /// The comparison operator as shader source text, for template pieces.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Never => "!= 0 && 0 ==",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::GreaterEqual => ">=",
            Self::Greater => ">",
            Self::Always => "== 0 || 0 ==",
        }
    }

    /// Parse a material-script token; symbols and names are both accepted.
    #[must_use]
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "<" | "less" => Some(Self::Less),
            "<=" | "less_equal" => Some(Self::LessEqual),
            "==" | "equal" => Some(Self::Equal),
            "!=" | "not_equal" => Some(Self::NotEqual),
            ">=" | "greater_equal" => Some(Self::GreaterEqual),
            ">" | "greater" => Some(Self::Greater),
            "never" => Some(Self::Never),
            "always" => Some(Self::Always),
            _ => None,
        }
    }
}

/// Face culling modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CullMode {
    None,
    #[default]
    Clockwise,
    Anticlockwise,
}

/// Rasterizer fill modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PolygonMode {
    Points,
    Wireframe,
    #[default]
    Solid,
}

/// Rasterizer + depth state baked into a pipeline.
///
/// Shared and content-deduplicated by the datablock registry; compare and
/// hash therefore operate on every field (floats by bit pattern).
#[derive(Debug, Clone, Copy)]
pub struct Macroblock {
    pub scissor_test: bool,
    pub depth_check: bool,
    pub depth_write: bool,
    pub depth_func: CompareFunction,
    pub depth_bias_constant: f32,
    pub depth_bias_slope_scale: f32,
    pub cull_mode: CullMode,
    pub polygon_mode: PolygonMode,
}

impl Default for Macroblock {
    fn default() -> Self {
        Self {
            scissor_test: false,
            depth_check: true,
            depth_write: true,
            depth_func: CompareFunction::LessEqual,
            depth_bias_constant: 0.0,
            depth_bias_slope_scale: 0.0,
            cull_mode: CullMode::Clockwise,
            polygon_mode: PolygonMode::Solid,
        }
    }
}

impl PartialEq for Macroblock {
    fn eq(&self, other: &Self) -> bool {
        self.scissor_test == other.scissor_test
            && self.depth_check == other.depth_check
            && self.depth_write == other.depth_write
            && self.depth_func == other.depth_func
            && self.depth_bias_constant.to_bits() == other.depth_bias_constant.to_bits()
            && self.depth_bias_slope_scale.to_bits() == other.depth_bias_slope_scale.to_bits()
            && self.cull_mode == other.cull_mode
            && self.polygon_mode == other.polygon_mode
    }
}

impl Eq for Macroblock {}

impl std::hash::Hash for Macroblock {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.scissor_test.hash(state);
        self.depth_check.hash(state);
        self.depth_write.hash(state);
        self.depth_func.hash(state);
        self.depth_bias_constant.to_bits().hash(state);
        self.depth_bias_slope_scale.to_bits().hash(state);
        self.cull_mode.hash(state);
        self.polygon_mode.hash(state);
    }
}

/// Blend factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendFactor {
    #[default]
    One,
    Zero,
    DestColour,
    SourceColour,
    OneMinusDestColour,
    OneMinusSourceColour,
    DestAlpha,
    SourceAlpha,
    OneMinusDestAlpha,
    OneMinusSourceAlpha,
}

/// Blend equation operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlendOperation {
    #[default]
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

/// Framebuffer blend state baked into a pipeline. Deduplicated like
/// [`Macroblock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Blendblock {
    pub separate_blend: bool,
    pub source_factor: BlendFactor,
    pub dest_factor: BlendFactor,
    pub source_factor_alpha: BlendFactor,
    pub dest_factor_alpha: BlendFactor,
    pub operation: BlendOperation,
    pub operation_alpha: BlendOperation,
}

impl Default for Blendblock {
    fn default() -> Self {
        Self {
            separate_blend: false,
            source_factor: BlendFactor::One,
            dest_factor: BlendFactor::Zero,
            source_factor_alpha: BlendFactor::One,
            dest_factor_alpha: BlendFactor::Zero,
            operation: BlendOperation::Add,
            operation_alpha: BlendOperation::Add,
        }
    }
}

// ─── Variability Mask ─────────────────────────────────────────────────────────

bitflags::bitflags! {
    /// Which subset of a constant buffer must be rewritten before a draw.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct VariabilityMask: u8 {
        /// Values that change per object (world matrix, material colour, …).
        const PER_OBJECT = 0b01;
        /// Values shared by the whole pass (view·projection, shadow params).
        const PER_PASS = 0b10;
        /// Everything; used when the bound pipeline just changed.
        const ALL = 0b11;
    }
}

// ─── Draw Submission ──────────────────────────────────────────────────────────

/// One draw call, ready for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawCall {
    pub vertex_buffer: BufferHandle,
    /// `Some` for indexed draws.
    pub index_buffer: Option<BufferHandle>,
    /// Index count when indexed, vertex count otherwise.
    pub element_count: u32,
    pub instance_count: u32,
}

// ─── RenderSystem Trait ───────────────────────────────────────────────────────

/// Device-level backend consumed by the material system.
///
/// Shader compilation and pipeline assembly are synchronous driver calls
/// and may block for tens of milliseconds; everything else is expected to
/// be cheap. All methods may surface [`HlmsError::DeviceLost`], which
/// escapes to the caller.
///
/// [`HlmsError::DeviceLost`]: crate::errors::HlmsError::DeviceLost
pub trait RenderSystem {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Compile one stage. On failure the driver's log is returned verbatim
    /// so the caller can annotate it with file information.
    fn compile_shader(
        &mut self,
        stage: ShaderStage,
        source: &str,
    ) -> std::result::Result<ShaderHandle, String>;

    /// Assemble a pipeline from compiled stages plus fixed-function state.
    fn create_pipeline(
        &mut self,
        stages: &[(ShaderStage, ShaderHandle)],
        macroblock: &Macroblock,
        blendblock: &Blendblock,
    ) -> Result<PipelineHandle>;

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) -> Result<()>;

    /// Map the constant buffer backing `stage` for writing. The mapping is
    /// valid until the matching [`commit_constants`](Self::commit_constants)
    /// and is never retained across draws.
    fn map_constant_buffer(&mut self, stage: ShaderStage, bytes: usize) -> Result<&mut [u8]>;

    /// Flush the mapped range and bind it, uploading only the subset named
    /// by `mask`.
    fn commit_constants(&mut self, stage: ShaderStage, mask: VariabilityMask) -> Result<()>;

    fn bind_texture(&mut self, unit: u8, texture: TextureHandle) -> Result<()>;

    /// Unbind every texture unit at `unit` and above.
    fn disable_texture_units_from(&mut self, unit: u8) -> Result<()>;

    fn draw(&mut self, draw: &DrawCall) -> Result<()>;
}

/// Texture name resolution, supplied by the resource layer.
///
/// The registry uses this to turn `diffuse_map0 <name>` options into GPU
/// handles; texture I/O itself is outside this crate.
pub trait TextureManager {
    fn acquire(&mut self, name: &str) -> Option<TextureHandle>;
}
