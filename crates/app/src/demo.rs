//! Deferred demo: g-buffer prepass, then a lit resolve into the backbuffer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use asset::mesh::PositionVertex;
use asset::texture::TextureData;
use asset::{FsSource, MemorySource, SourceProvider, VertexLayout};
use corelib::camera::{Camera, ViewUniform};
use corelib::transform::Transform;
use corelib::{Vec3, vec3};
use renderer::{
    Backbuffer, BindingKind, BufferDesc, BufferId, BufferUsage, DepthFormat, FrameGraph,
    Framebuffer, FramebufferParams, GeometryBuffer, GeometryBuilder, Model, PassDesc, PassOutput,
    ProgramBinding, ProgramDesc, ProgramId, RenderContext, RenderDevice, ResourceCache,
    SharedSampler, TextureFormat, Topology,
};

use crate::config::AppConfig;

const PREPASS_WGSL: &str = include_str!("../shaders/prepass.wgsl");
const RESOLVE_WGSL: &str = include_str!("../shaders/resolve.wgsl");

const CAMERA_SLOT: u32 = 0;
const GBUFFER_FORMATS: [TextureFormat; 2] = [TextureFormat::Rgba8Unorm, TextureFormat::Rgba16Float];
const GBUFFER_DEPTH: DepthFormat = DepthFormat::D32Float;
const CLEAR: [f32; 4] = [0.0, 0.0, 0.0, 0.0];

const PREPASS_BINDINGS: [ProgramBinding; 4] = [
    ProgramBinding::new(BindingKind::ConstantBuffer, CAMERA_SLOT),
    ProgramBinding::new(BindingKind::ConstantBuffer, renderer::material::MATERIAL_CONSTANT_SLOT),
    ProgramBinding::new(BindingKind::Texture, 1),
    ProgramBinding::new(BindingKind::Sampler, renderer::material::MATERIAL_SAMPLER_SLOT),
];

const RESOLVE_BINDINGS: [ProgramBinding; 3] = [
    ProgramBinding::new(BindingKind::Texture, 0),
    ProgramBinding::new(BindingKind::Texture, 1),
    ProgramBinding::new(BindingKind::DepthTexture, 2),
];

const BUILTIN_OBJ: &str = "\
mtllib crate.mtl
v -1 -1 -1
v 1 -1 -1
v 1 1 -1
v -1 1 -1
v -1 -1 1
v 1 -1 1
v 1 1 1
v -1 1 1
vt 0 0
vt 1 0
vt 1 1
vt 0 1
vn 0 0 -1
vn 0 0 1
vn 1 0 0
vn -1 0 0
vn 0 1 0
vn 0 -1 0
g sides
usemtl wood
f 1/1/1 3/3/1 2/2/1
f 1/1/1 4/4/1 3/3/1
f 5/1/2 6/2/2 7/3/2
f 5/1/2 7/3/2 8/4/2
f 2/1/3 3/4/3 7/3/3
f 2/1/3 7/3/3 6/2/3
f 1/2/4 5/1/4 8/4/4
f 1/2/4 8/4/4 4/3/4
g caps
usemtl lacquer
f 4/1/5 8/4/5 7/3/5
f 4/1/5 7/3/5 3/2/5
f 1/1/6 2/2/6 6/3/6
f 1/1/6 6/3/6 5/4/6
";

const BUILTIN_MTL: &str = "\
newmtl wood
Kd 0.9 0.7 0.5
d 1
illum 1
map_Kd crate.png
newmtl lacquer
Kd 0.6 0.1 0.1
Ks 0.5 0.5 0.5
Ns 32
d 1
illum 2
";

/// Per-frame data handed to every pass.
struct Scene {
    device: Arc<dyn RenderDevice>,
    model: Model,
    sampler: SharedSampler,
    camera: BufferId,
    prepass: HashMap<VertexLayout, ProgramId>,
    resolve: ProgramId,
    fullscreen: GeometryBuffer<PositionVertex>,
}

impl Drop for Scene {
    fn drop(&mut self) {
        for program in self.prepass.values() {
            self.device.destroy_program(*program);
        }
        self.device.destroy_program(self.resolve);
        self.device.destroy_buffer(self.camera);
    }
}

fn builtin_source() -> Result<MemorySource> {
    let png = TextureData::checkerboard(64).to_png()?;
    Ok(MemorySource::new()
        .with("builtin/crate.obj", BUILTIN_OBJ)
        .with("builtin/crate.mtl", BUILTIN_MTL)
        .with("builtin/crate.png", png))
}

fn vertex_entry(layout: VertexLayout) -> &'static str {
    match layout {
        VertexLayout::Position => "vs_p",
        VertexLayout::PositionNormal => "vs_pn",
        VertexLayout::PositionTexcoord => "vs_pt",
        VertexLayout::PositionTexcoordNormal => "vs_ptn",
    }
}

fn create_prepass(device: &dyn RenderDevice, layout: VertexLayout) -> Result<ProgramId> {
    let id = device.create_program(&ProgramDesc {
        label: vertex_entry(layout),
        source: PREPASS_WGSL,
        vertex_entry: vertex_entry(layout),
        pixel_entry: Some("fs_main"),
        geometry_entry: None,
        vertex_layout: layout,
        topology: Topology::TriangleList,
        color_formats: &GBUFFER_FORMATS,
        depth_format: Some(GBUFFER_DEPTH),
        depth_test: true,
        depth_write: true,
        sample_count: 1,
        bindings: &PREPASS_BINDINGS,
    })?;
    Ok(id)
}

fn create_resolve(device: &dyn RenderDevice) -> Result<ProgramId> {
    let id = device.create_program(&ProgramDesc {
        label: "resolve",
        source: RESOLVE_WGSL,
        vertex_entry: "vs_main",
        pixel_entry: Some("fs_main"),
        geometry_entry: None,
        vertex_layout: VertexLayout::Position,
        topology: Topology::TriangleList,
        color_formats: &[Backbuffer::COLOR_FORMAT],
        depth_format: Some(Backbuffer::DEPTH_FORMAT),
        depth_test: false,
        depth_write: false,
        sample_count: 1,
        bindings: &RESOLVE_BINDINGS,
    })?;
    Ok(id)
}

fn camera_block(device: &dyn RenderDevice, model: &Model, width: u32, height: u32) -> Result<BufferId> {
    let fit = model.bounds().map(|b| Transform::fit(&b)).unwrap_or_default();
    let tilt = Transform::from_euler_xyz(0.5, 0.6, 0.0);
    let camera = Camera::looking_at(vec3(0.0, 0.0, -4.0), Vec3::ZERO, 1.0).for_target(width, height);
    let uniform = ViewUniform::new(&(tilt.matrix() * fit.matrix()), &camera);
    let id = device.create_buffer(&BufferDesc {
        label: "camera",
        usage: BufferUsage::CONSTANT,
        contents: bytemuck::bytes_of(&uniform),
    })?;
    Ok(id)
}

fn fullscreen_triangle(device: &Arc<dyn RenderDevice>) -> Result<GeometryBuffer<PositionVertex>> {
    let mut builder = GeometryBuilder::new("fullscreen");
    for position in [[-1.0, -1.0, 0.0], [-1.0, 3.0, 0.0], [3.0, -1.0, 0.0]] {
        let index = builder.add_vertex(PositionVertex { position });
        builder.add_index(index);
    }
    Ok(builder.finalize(device)?)
}

/// Loads the scene and renders `config.frames` frames into `ctx`.
pub fn run(device: Arc<dyn RenderDevice>, ctx: &mut dyn RenderContext, config: &AppConfig) -> Result<()> {
    let source: Arc<dyn SourceProvider> = match config.model {
        Some(_) => Arc::new(FsSource),
        None => Arc::new(builtin_source()?),
    };
    let path = config
        .model
        .clone()
        .unwrap_or_else(|| "builtin/crate.obj".into());
    let cache = ResourceCache::new(device.clone(), source);

    {
        let model = Model::load(&cache, &path).with_context(|| format!("loading {}", path.display()))?;
        log::info!(
            "{}: {} mesh(es), {} triangle(s)",
            path.display(),
            model.mesh_count(),
            model.triangle_count()
        );

        let mut prepass = HashMap::new();
        for (_, mesh) in model.meshes() {
            let layout = mesh.geometry.layout();
            if !prepass.contains_key(&layout) {
                prepass.insert(layout, create_prepass(device.as_ref(), layout)?);
            }
        }
        let scene = Scene {
            camera: camera_block(device.as_ref(), &model, config.width, config.height)?,
            resolve: create_resolve(device.as_ref())?,
            fullscreen: fullscreen_triangle(&device)?,
            sampler: cache.default_sampler()?,
            device: device.clone(),
            model,
            prepass,
        };

        let mut graph = FrameGraph::<Scene>::new();
        let gbuffer = graph.add_target(Framebuffer::new(
            device.clone(),
            FramebufferParams::new(config.width, config.height)
                .label("gbuffer")
                .colors(&GBUFFER_FORMATS)
                .readable_depth(GBUFFER_DEPTH),
        )?);
        graph.add_pass(
            PassDesc::new("prepass", PassOutput::Target(gbuffer)).clear(CLEAR),
            Box::new(|ctx: &mut dyn RenderContext, scene: &Scene| {
                ctx.bind_constant_buffer(CAMERA_SLOT, scene.camera);
                for (_, mesh) in scene.model.meshes() {
                    let Some(&program) = scene.prepass.get(&mesh.geometry.layout()) else {
                        continue;
                    };
                    ctx.set_program(program);
                    if let Some(material) = scene.model.material_for(mesh) {
                        material.bind(ctx, &scene.sampler);
                    }
                    mesh.geometry.draw(ctx);
                }
            }),
        )?;
        graph.add_pass(
            PassDesc::new("resolve", PassOutput::Backbuffer)
                .read_colors(gbuffer, 0, GBUFFER_FORMATS.len())
                .read_depth(gbuffer, 2)
                .clear([0.0, 0.0, 0.0, 1.0]),
            Box::new(|ctx: &mut dyn RenderContext, scene: &Scene| {
                ctx.set_program(scene.resolve);
                scene.fullscreen.draw(ctx);
            }),
        )?;

        for frame in 0..config.frames {
            let start = Instant::now();
            graph.execute(ctx, &scene)?;
            ctx.present()?;
            log::debug!("frame {frame}: {:.2} ms", start.elapsed().as_secs_f64() * 1e3);
        }
        log::info!("Rendered {} frame(s) at {}x{}", config.frames, config.width, config.height);
    }

    cache.teardown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::Command;
    use renderer::backend::{HeadlessContext, HeadlessDevice};

    #[test]
    fn builtin_scene_renders_headless() {
        let headless = Arc::new(HeadlessDevice::new());
        let config = AppConfig {
            width: 64,
            height: 32,
            frames: 2,
            headless: true,
            ..AppConfig::default()
        };
        let mut ctx = HeadlessContext::new(headless.clone(), config.width, config.height).unwrap();
        run(headless.clone(), &mut ctx, &config).unwrap();

        assert_eq!(ctx.frames().len(), 2);
        let draws = ctx.frames()[0]
            .iter()
            .filter(|c| matches!(c, Command::DrawIndexed { .. }))
            .count();
        // Two sub-meshes plus the resolve triangle.
        assert_eq!(draws, 3);
        assert_eq!(headless.live_programs(), 0);
        assert_eq!(headless.live_buffers(), 0);
        // Only the backbuffer remains.
        assert_eq!(headless.live_textures(), 2);
    }

    #[test]
    fn missing_model_is_reported() {
        let headless = Arc::new(HeadlessDevice::new());
        let config = AppConfig {
            model: Some("does/not/exist.obj".into()),
            width: 8,
            height: 8,
            ..AppConfig::default()
        };
        let mut ctx = HeadlessContext::new(headless.clone(), 8, 8).unwrap();
        let err = run(headless.clone(), &mut ctx, &config).unwrap_err();
        assert!(format!("{err:#}").contains("does/not/exist.obj"));
        assert_eq!(headless.live_buffers(), 0);
    }
}
