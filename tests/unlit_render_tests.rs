//! End-to-end exercises of the unlit pipeline against the recording null
//! backend: permutation resolution, compilation, constant packing and the
//! rebind-elision behavior of the render loop.

use glam::{Mat4, Vec4};

use patina::rhi::{BufferHandle, RenderOp};
use patina::{
    DrawCall, Hlms, IdString, Macroblock, Blendblock, NullRenderSystem, PassContext,
    QueuedRenderable, Renderable, ShaderApi, ShaderStage, ShadowParams, TemplateArchive,
    UnlitHlms, VariabilityMask, VertexDeclaration, VertexSemantic,
};

// ─── Fixtures ─────────────────────────────────────────────────────────────────

struct Mesh {
    decl: VertexDeclaration,
    world: Mat4,
    identity_projection: bool,
}

impl Mesh {
    fn new(uv_channels: u8) -> Self {
        let mut decl = VertexDeclaration::new();
        decl.push(VertexSemantic::Position, 0, 3);
        for i in 0..uv_channels {
            decl.push(VertexSemantic::TexCoord, i, 2);
        }
        Self {
            decl,
            world: Mat4::IDENTITY,
            identity_projection: false,
        }
    }

    fn with_world(mut self, world: Mat4) -> Self {
        self.world = world;
        self
    }

    fn with_identity_projection(mut self) -> Self {
        self.identity_projection = true;
        self
    }
}

impl Renderable for Mesh {
    fn vertex_declaration(&self) -> &VertexDeclaration {
        &self.decl
    }
    fn world_transform(&self) -> Mat4 {
        self.world
    }
    fn use_identity_projection(&self) -> bool {
        self.identity_projection
    }
    fn draw_call(&self) -> DrawCall {
        DrawCall {
            vertex_buffer: BufferHandle(7),
            index_buffer: None,
            element_count: 3,
            instance_count: 1,
        }
    }
}

fn hlms() -> Hlms<NullRenderSystem> {
    let _ = env_logger::builder().is_test(true).try_init();
    Hlms::new(
        Box::new(UnlitHlms::new()),
        TemplateArchive::embedded(),
        ShaderApi::Glsl,
        NullRenderSystem::new(),
    )
}

fn datablock(hlms: &mut Hlms<NullRenderSystem>, name: &str, script: &str) -> IdString {
    hlms.create_datablock(name, Macroblock::default(), Blendblock::default(), script)
        .unwrap()
}

fn draws(device: &NullRenderSystem) -> usize {
    device
        .ops()
        .iter()
        .filter(|op| matches!(op, RenderOp::Draw(..)))
        .count()
}

// ─── Constant Packing ─────────────────────────────────────────────────────────

#[test]
fn test_empty_material_packs_one_matrix_and_no_pixel_constants() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "plain", "");
    hlms.prepare_pass(&PassContext::default());

    let mesh = Mesh::new(0);
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();

    let device = hlms.device();
    assert_eq!(draws(device), 1);
    assert_eq!(device.constant_buffer(ShaderStage::Vertex).len(), 64);
    assert_eq!(
        device.constant_buffer(ShaderStage::Vertex),
        bytemuck::bytes_of(&Mat4::IDENTITY)
    );
    assert!(device.constant_buffer(ShaderStage::Pixel).is_empty());
    assert!(
        !device
            .ops()
            .iter()
            .any(|op| matches!(op, RenderOp::CommitConstants(ShaderStage::Pixel, _)))
    );
}

#[test]
fn test_alpha_test_emits_comparison_and_threshold() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "cutout", "alpha_test < 0.5\n");
    hlms.prepare_pass(&PassContext::default());

    let mesh = Mesh::new(1);
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();

    let device = hlms.device();
    let pixel_source = device.last_source(ShaderStage::Pixel).unwrap();
    assert!(pixel_source.contains("finalColour.a < alphaTestThreshold"));

    let pixel = device.constant_buffer(ShaderStage::Pixel);
    assert_eq!(pixel.len(), 4);
    assert_eq!(f32::from_le_bytes(pixel.try_into().unwrap()), 0.5);
}

#[test]
fn test_identity_projection_bypasses_the_camera() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "hud", "");
    hlms.prepare_pass(&PassContext {
        projection_matrix: Mat4::perspective_lh(1.2, 1.5, 0.1, 50.0),
        view_matrix: Mat4::from_translation(glam::Vec3::new(0.0, 2.0, -5.0)),
        ..PassContext::default()
    });

    let world = Mat4::from_translation(glam::Vec3::new(0.25, -0.5, 0.0));
    let mesh = Mesh::new(0).with_world(world).with_identity_projection();
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();

    assert_eq!(
        hlms.device().constant_buffer(ShaderStage::Vertex),
        bytemuck::bytes_of(&world)
    );
}

#[test]
fn test_two_units_can_share_one_uv_set() {
    let mut hlms = hlms();
    let db = datablock(
        &mut hlms,
        "decal",
        "diffuse_map0 base.png\ndiffuse_map1 decal.png\nblendmode1 NormalNonPremul\n",
    );
    hlms.prepare_pass(&PassContext::default());

    let mesh = Mesh::new(1);
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();

    let device = hlms.device();
    assert_eq!(draws(device), 1);
    let pixel_source = device.last_source(ShaderStage::Pixel).unwrap();
    assert!(pixel_source.contains("sampler2D texDiffuseMap[2]"));
    // Both fetches address the same varying.
    assert_eq!(pixel_source.matches("psUv0").count(), 3);
    assert_eq!(device.texture_bind_count(), 2);
    assert!(
        device
            .ops()
            .iter()
            .any(|op| matches!(op, RenderOp::DisableTextureUnitsFrom(2)))
    );
}

#[test]
fn test_caster_pass_packs_the_shadow_depth_range() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "caster", "");
    hlms.prepare_pass(&PassContext {
        caster_pass: true,
        shadow: Some(ShadowParams {
            light_view: Mat4::IDENTITY,
            light_projection: Mat4::IDENTITY,
            depth_range: (1.0, 101.0),
        }),
        ..PassContext::default()
    });

    let mesh = Mesh::new(0);
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();

    let device = hlms.device();
    assert_eq!(draws(device), 1);
    let vertex_source = device.last_source(ShaderStage::Vertex).unwrap();
    assert!(vertex_source.contains("uniform vec2 shadowDepthRange;"));

    // worldViewProj followed by (near, 1 / (far - near)).
    let vertex = device.constant_buffer(ShaderStage::Vertex);
    assert_eq!(vertex.len(), 72);
    let near = f32::from_le_bytes(vertex[64..68].try_into().unwrap());
    let inv_range = f32::from_le_bytes(vertex[68..72].try_into().unwrap());
    assert_eq!(near, 1.0);
    assert_eq!(inv_range, 1.0 / 100.0);
}

// ─── Validation ───────────────────────────────────────────────────────────────

#[test]
fn test_uv_set_out_of_range_skips_the_draw() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "broken", "diffuse_map0 a.png\nuv_set0 2\n");
    hlms.prepare_pass(&PassContext::default());

    let mesh = Mesh::new(1);
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();
    assert_eq!(draws(hlms.device()), 0);

    // Same failure again; still skipped, still no draw.
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();
    assert_eq!(draws(hlms.device()), 0);
}

// ─── Caching & Rebinds ────────────────────────────────────────────────────────

#[test]
fn test_identical_permutations_compile_once() {
    let mut hlms = hlms();
    // Two datablocks, different textures, same permutation inputs.
    let a = datablock(&mut hlms, "wood", "diffuse_map0 wood.png\n");
    let b = datablock(&mut hlms, "steel", "diffuse_map0 steel.png\n");
    hlms.prepare_pass(&PassContext::default());

    let mesh = Mesh::new(1);
    let mut queue = [
        QueuedRenderable::new(&mesh, a),
        QueuedRenderable::new(&mesh, a),
        QueuedRenderable::new(&mesh, b),
    ];
    hlms.render(&mut queue).unwrap();

    let device = hlms.device();
    // One vertex + one pixel compile serve all three draws.
    assert_eq!(device.compile_count(), 2);
    assert_eq!(hlms.shader_cache().len(), 1);
    assert_eq!(draws(hlms.device()), 3);
}

#[test]
fn test_texture_rebinds_follow_the_texture_hash() {
    let mut hlms = hlms();
    let a = datablock(&mut hlms, "wood", "diffuse_map0 wood.png\n");
    let b = datablock(&mut hlms, "steel", "diffuse_map0 steel.png\n");
    hlms.prepare_pass(&PassContext::default());

    let mesh = Mesh::new(1);
    let mut queue = [
        QueuedRenderable::new(&mesh, a),
        QueuedRenderable::new(&mesh, a),
        QueuedRenderable::new(&mesh, b),
    ];
    hlms.render(&mut queue).unwrap();

    // Draw 1 binds wood, draw 2 reuses it, draw 3 binds steel.
    assert_eq!(hlms.device().texture_bind_count(), 2);
    let disables = hlms
        .device()
        .ops()
        .iter()
        .filter(|op| matches!(op, RenderOp::DisableTextureUnitsFrom(1)))
        .count();
    assert_eq!(disables, 2);
}

#[test]
fn test_pipeline_rebind_widens_the_variability_mask() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "plain", "");
    hlms.prepare_pass(&PassContext::default());

    let mesh = Mesh::new(0);
    let mut queue = [
        QueuedRenderable::new(&mesh, db),
        QueuedRenderable::new(&mesh, db),
    ];
    hlms.render(&mut queue).unwrap();

    let masks: Vec<VariabilityMask> = hlms
        .device()
        .ops()
        .iter()
        .filter_map(|op| match op {
            RenderOp::CommitConstants(ShaderStage::Vertex, mask) => Some(*mask),
            _ => None,
        })
        .collect();
    assert_eq!(masks, vec![VariabilityMask::ALL, VariabilityMask::PER_OBJECT]);
}

#[test]
fn test_clear_shader_cache_forces_recompilation() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "plain", "");
    hlms.prepare_pass(&PassContext::default());
    let mesh = Mesh::new(0);

    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();
    assert_eq!(hlms.device().compile_count(), 2);

    hlms.clear_shader_cache();
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();
    assert_eq!(hlms.device().compile_count(), 4);
}

#[test]
fn test_compile_failure_skips_draw_and_is_not_memoized() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "cutout", "alpha_test >= 0.25\n");
    hlms.prepare_pass(&PassContext::default());
    hlms.device_mut().poison_source("alphaTestThreshold");

    let mesh = Mesh::new(1);
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();
    assert_eq!(draws(hlms.device()), 0);
    assert_eq!(hlms.shader_cache().len(), 0);

    // Driver recovers; the same key compiles on the next request.
    hlms.device_mut().clear_poison();
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();
    assert_eq!(draws(hlms.device()), 1);
    assert_eq!(hlms.shader_cache().len(), 1);
}

// ─── Hash Structure ───────────────────────────────────────────────────────────

#[test]
fn test_pass_state_changes_only_the_upper_hash_half() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "plain", "");
    let mesh = Mesh::new(0);

    hlms.prepare_pass(&PassContext::default());
    let mut queued = QueuedRenderable::new(&mesh, db);
    let normal = hlms.calculate_hash_for(&mut queued).unwrap();

    hlms.prepare_pass(&PassContext {
        caster_pass: true,
        ..PassContext::default()
    });
    let mut queued = QueuedRenderable::new(&mesh, db);
    let caster = hlms.calculate_hash_for(&mut queued).unwrap();

    assert_ne!(normal, caster);
    assert_eq!(normal & 0xFFFF, caster & 0xFFFF);
}

#[test]
fn test_missing_datablock_is_an_error() {
    let mut hlms = hlms();
    hlms.prepare_pass(&PassContext::default());
    let mesh = Mesh::new(0);
    let mut queued = QueuedRenderable::new(&mesh, IdString::new("nope"));
    assert!(hlms.calculate_hash_for(&mut queued).is_err());
}

#[test]
fn test_constant_colour_reaches_the_pixel_buffer() {
    let mut hlms = hlms();
    let db = datablock(&mut hlms, "tinted", "diffuse 1 0.5 0.25 1\n");
    hlms.prepare_pass(&PassContext::default());

    let mesh = Mesh::new(0);
    let mut queue = [QueuedRenderable::new(&mesh, db)];
    hlms.render(&mut queue).unwrap();

    let pixel = hlms.device().constant_buffer(ShaderStage::Pixel);
    assert_eq!(pixel, bytemuck::bytes_of(&Vec4::new(1.0, 0.5, 0.25, 1.0)));
}
