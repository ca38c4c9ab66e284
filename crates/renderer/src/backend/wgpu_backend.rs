//! wgpu implementation of the device and context traits.
//!
//! The context records commands like every other backend and encodes them on
//! `present`: each clear becomes its own render pass, each draw a pass that
//! loads the bound targets, and copies go straight to the encoder.
//!
//! Programs use bind group 0. Constant buffer slot `n` is binding `n`,
//! shader resource slot `n` is binding `16 + n` and sampler slot `n` is
//! binding `32 + n`. Unbound slots receive 1x1 fallbacks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use asset::VertexLayout;
use asset::mesh::AttributeFormat;
use parking_lot::Mutex;
use wgpu::util::DeviceExt;

use crate::device::{
    Backbuffer, BindingKind, Command, ProgramBinding, ProgramDesc, RenderContext, RenderDevice,
};
use crate::error::GpuError;
use crate::types::{
    AddressMode, BufferDesc, BufferId, BufferUsage, CompareFunction, FilterMode, IndexFormat,
    ProgramId, SamplerDesc, SamplerId, TextureDesc, TextureFormat, TextureId, TextureUsage,
    Topology, ViewDesc, ViewId, ViewKind, Viewport,
};

pub const RESOURCE_BINDING_BASE: u32 = 16;
pub const SAMPLER_BINDING_BASE: u32 = 32;
const FALLBACK_CONSTANTS_SIZE: u64 = 256;

/// WGSL `@binding` index of a program slot.
pub fn binding_index(kind: BindingKind, slot: u32) -> u32 {
    match kind {
        BindingKind::ConstantBuffer => slot,
        BindingKind::Texture | BindingKind::DepthTexture => RESOURCE_BINDING_BASE + slot,
        BindingKind::Sampler => SAMPLER_BINDING_BASE + slot,
    }
}

fn map_format(format: TextureFormat) -> wgpu::TextureFormat {
    use TextureFormat as F;
    use wgpu::TextureFormat as W;
    match format {
        F::Rgba8Unorm => W::Rgba8Unorm,
        F::Rgba8UnormSrgb => W::Rgba8UnormSrgb,
        F::Bgra8Unorm => W::Bgra8Unorm,
        F::Bgra8UnormSrgb => W::Bgra8UnormSrgb,
        F::Rgba16Float => W::Rgba16Float,
        F::Rgba32Float => W::Rgba32Float,
        F::Rg16Float => W::Rg16Float,
        F::R32Float => W::R32Float,
        F::R16Unorm => W::R16Unorm,
        // Typeless storage is the depth format itself; shader views read the
        // depth aspect.
        F::Depth16Unorm | F::R16Typeless => W::Depth16Unorm,
        F::Depth24UnormS8 | F::R24G8Typeless | F::R24UnormX8 => W::Depth24PlusStencil8,
        F::Depth32Float | F::R32Typeless => W::Depth32Float,
        F::Depth32FloatS8 | F::R32G8X24Typeless | F::R32FloatX8X24 => W::Depth32FloatStencil8,
    }
}

fn map_texture_usage(usage: TextureUsage) -> wgpu::TextureUsages {
    let mut out = wgpu::TextureUsages::empty();
    if usage.intersects(TextureUsage::RENDER_TARGET | TextureUsage::DEPTH_TARGET) {
        out |= wgpu::TextureUsages::RENDER_ATTACHMENT;
    }
    if usage.contains(TextureUsage::SHADER_READ) {
        out |= wgpu::TextureUsages::TEXTURE_BINDING;
    }
    if usage.contains(TextureUsage::COPY_SRC) {
        out |= wgpu::TextureUsages::COPY_SRC;
    }
    if usage.contains(TextureUsage::COPY_DST) {
        out |= wgpu::TextureUsages::COPY_DST;
    }
    out
}

fn map_buffer_usage(usage: BufferUsage) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    if usage.contains(BufferUsage::VERTEX) {
        out |= wgpu::BufferUsages::VERTEX;
    }
    if usage.contains(BufferUsage::INDEX) {
        out |= wgpu::BufferUsages::INDEX;
    }
    if usage.contains(BufferUsage::CONSTANT) {
        out |= wgpu::BufferUsages::UNIFORM;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        out |= wgpu::BufferUsages::COPY_DST;
    }
    out
}

fn map_filter(filter: FilterMode) -> wgpu::FilterMode {
    match filter {
        FilterMode::Nearest => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn map_address(address: AddressMode) -> wgpu::AddressMode {
    match address {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
        AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
    }
}

fn map_compare(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn map_topology(topology: Topology) -> wgpu::PrimitiveTopology {
    match topology {
        Topology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
        Topology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        Topology::LineList => wgpu::PrimitiveTopology::LineList,
        Topology::PointList => wgpu::PrimitiveTopology::PointList,
    }
}

fn map_index_format(format: IndexFormat) -> Option<wgpu::IndexFormat> {
    match format {
        IndexFormat::U8 => None,
        IndexFormat::U16 => Some(wgpu::IndexFormat::Uint16),
        IndexFormat::U32 => Some(wgpu::IndexFormat::Uint32),
    }
}

fn map_attribute_format(format: AttributeFormat) -> wgpu::VertexFormat {
    match format {
        AttributeFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        AttributeFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
    }
}

fn binding_type(kind: BindingKind) -> wgpu::BindingType {
    match kind {
        BindingKind::ConstantBuffer => wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        BindingKind::Texture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: true },
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingKind::DepthTexture => wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Depth,
            view_dimension: wgpu::TextureViewDimension::D2,
            multisampled: false,
        },
        BindingKind::Sampler => wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
    }
}

fn vertex_attributes(layout: VertexLayout) -> Vec<wgpu::VertexAttribute> {
    layout
        .attributes()
        .iter()
        .map(|a| wgpu::VertexAttribute {
            format: map_attribute_format(a.format),
            offset: a.offset as u64,
            shader_location: a.semantic.location(),
        })
        .collect()
}

struct TextureEntry {
    texture: wgpu::Texture,
    format: TextureFormat,
    mip_levels: u32,
}

struct ViewEntry {
    view: wgpu::TextureView,
    format: wgpu::TextureFormat,
}

struct ProgramEntry {
    label: String,
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    bindings: Vec<ProgramBinding>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    buffers: HashMap<BufferId, wgpu::Buffer>,
    textures: HashMap<TextureId, TextureEntry>,
    views: HashMap<ViewId, ViewEntry>,
    samplers: HashMap<SamplerId, wgpu::Sampler>,
    programs: HashMap<ProgramId, ProgramEntry>,
}

impl Registry {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn buffer(&self, id: BufferId) -> Result<&wgpu::Buffer, GpuError> {
        self.buffers.get(&id).ok_or(GpuError::UnknownResource {
            kind: "buffer",
            id: id.0,
        })
    }

    fn texture(&self, id: TextureId) -> Result<&TextureEntry, GpuError> {
        self.textures.get(&id).ok_or(GpuError::UnknownResource {
            kind: "texture",
            id: id.0,
        })
    }

    fn view(&self, id: ViewId) -> Result<&ViewEntry, GpuError> {
        self.views.get(&id).ok_or(GpuError::UnknownResource {
            kind: "view",
            id: id.0,
        })
    }
}

/// Objects bound to slots a draw leaves empty.
struct Fallbacks {
    constants: wgpu::Buffer,
    texture: wgpu::TextureView,
    depth: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

impl Fallbacks {
    fn new(device: &wgpu::Device, queue: &wgpu::Queue) -> Self {
        let constants = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("fallback constants"),
            size: FALLBACK_CONSTANTS_SIZE,
            usage: wgpu::BufferUsages::UNIFORM,
            mapped_at_creation: false,
        });
        let size = wgpu::Extent3d {
            width: 1,
            height: 1,
            depth_or_array_layers: 1,
        };
        let white = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some("fallback texture"),
                size,
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::Rgba8Unorm,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("fallback depth"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Depth32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING,
            view_formats: &[],
        });
        Self {
            constants,
            texture: white.create_view(&wgpu::TextureViewDescriptor::default()),
            depth: depth.create_view(&wgpu::TextureViewDescriptor::default()),
            sampler: device.create_sampler(&wgpu::SamplerDescriptor::default()),
        }
    }
}

struct Shared {
    name: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    fallbacks: Fallbacks,
    registry: Mutex<Registry>,
}

impl Shared {
    /// Runs `f` inside validation and out-of-memory error scopes.
    fn scoped<T>(&self, f: impl FnOnce() -> T) -> Result<T, String> {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let value = f();
        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        match validation.or(oom) {
            Some(err) => Err(err.to_string()),
            None => Ok(value),
        }
    }
}

#[derive(Clone)]
pub struct WgpuDevice {
    shared: Arc<Shared>,
}

impl WgpuDevice {
    /// Opens the first suitable adapter among `backends`, without a surface.
    pub async fn new(backends: wgpu::Backends) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|e| GpuError::Adapter(e.to_string()))?;

        let optional = wgpu::Features::DEPTH32FLOAT_STENCIL8 | wgpu::Features::TEXTURE_FORMAT_16BIT_NORM;
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("kdx device"),
                required_features: adapter.features() & optional,
                required_limits: wgpu::Limits::downlevel_defaults().using_resolution(adapter.limits()),
                memory_hints: Default::default(),
                trace: Default::default(),
            })
            .await
            .map_err(|e| GpuError::Device(e.to_string()))?;

        let info = adapter.get_info();
        log::info!("wgpu adapter: {} ({:?})", info.name, info.backend);
        Ok(Self::from_parts(device, queue, info.name))
    }

    /// Wraps an already opened device.
    pub fn from_parts(device: wgpu::Device, queue: wgpu::Queue, name: impl Into<String>) -> Self {
        let fallbacks = Fallbacks::new(&device, &queue);
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                device,
                queue,
                fallbacks,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    pub fn raw_device(&self) -> &wgpu::Device {
        &self.shared.device
    }

    pub fn raw_queue(&self) -> &wgpu::Queue {
        &self.shared.queue
    }

    fn build_program(&self, desc: &ProgramDesc<'_>) -> ProgramEntry {
        let device = &self.shared.device;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(desc.label),
            source: wgpu::ShaderSource::Wgsl(desc.source.into()),
        });

        let entries: Vec<wgpu::BindGroupLayoutEntry> = desc
            .bindings
            .iter()
            .map(|b| wgpu::BindGroupLayoutEntry {
                binding: binding_index(b.kind, b.slot),
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: binding_type(b.kind),
                count: None,
            })
            .collect();
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(desc.label),
            entries: &entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(desc.label),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });

        let attributes = vertex_attributes(desc.vertex_layout);
        let buffers = [wgpu::VertexBufferLayout {
            array_stride: desc.vertex_layout.stride() as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &attributes,
        }];
        let targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_formats
            .iter()
            .map(|&format| {
                Some(wgpu::ColorTargetState {
                    format: map_format(format),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(desc.label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some(desc.vertex_entry),
                compilation_options: Default::default(),
                buffers: &buffers,
            },
            // Engine space is left-handed: front faces wind clockwise.
            primitive: wgpu::PrimitiveState {
                topology: map_topology(desc.topology),
                front_face: wgpu::FrontFace::Cw,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil: desc.depth_format.map(|depth| wgpu::DepthStencilState {
                format: map_format(depth.target_format()),
                depth_write_enabled: desc.depth_write,
                depth_compare: if desc.depth_test {
                    wgpu::CompareFunction::LessEqual
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: desc.sample_count,
                ..Default::default()
            },
            fragment: desc.pixel_entry.map(|entry| wgpu::FragmentState {
                module: &module,
                entry_point: Some(entry),
                compilation_options: Default::default(),
                targets: &targets,
            }),
            multiview: None,
            cache: None,
        });

        ProgramEntry {
            label: desc.label.to_owned(),
            pipeline,
            layout,
            bindings: desc.bindings.to_vec(),
        }
    }
}

impl RenderDevice for WgpuDevice {
    fn name(&self) -> &str {
        &self.shared.name
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<BufferId, GpuError> {
        if desc.contents.is_empty() {
            return Err(GpuError::allocation(desc.label, "empty buffer"));
        }
        let buffer = self
            .shared
            .scoped(|| {
                self.shared
                    .device
                    .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some(desc.label),
                        contents: desc.contents,
                        usage: map_buffer_usage(desc.usage),
                    })
            })
            .map_err(|reason| GpuError::allocation(desc.label, reason))?;
        let mut registry = self.shared.registry.lock();
        let id = BufferId(registry.next());
        registry.buffers.insert(id, buffer);
        log::trace!("wgpu: buffer {id:?} '{}' ({} bytes)", desc.label, desc.contents.len());
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) {
        match self.shared.registry.lock().buffers.remove(&id) {
            Some(buffer) => buffer.destroy(),
            None => panic!("destroying unknown or already destroyed buffer {id:?}"),
        }
    }

    fn create_texture(
        &self,
        desc: &TextureDesc<'_>,
        data: Option<&[u8]>,
    ) -> Result<TextureId, GpuError> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::allocation(desc.label, "zero-sized texture"));
        }
        if let Some(data) = data {
            if data.len() != desc.data_len() {
                return Err(GpuError::allocation(
                    desc.label,
                    format!("initial data is {} bytes, expected {}", data.len(), desc.data_len()),
                ));
            }
        }
        let mut usage = map_texture_usage(desc.usage);
        if data.is_some() {
            usage |= wgpu::TextureUsages::COPY_DST;
        }
        let size = wgpu::Extent3d {
            width: desc.width,
            height: desc.height,
            depth_or_array_layers: 1,
        };
        let shared = &self.shared;
        let texture = shared
            .scoped(|| {
                let texture = shared.device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(desc.label),
                    size,
                    mip_level_count: desc.mip_levels,
                    sample_count: desc.sample_count,
                    dimension: wgpu::TextureDimension::D2,
                    format: map_format(desc.format),
                    usage,
                    view_formats: &[],
                });
                if let Some(data) = data {
                    let bpp = desc.format.bytes_per_pixel();
                    let mut offset = 0;
                    for level in 0..desc.mip_levels {
                        let (width, height) = desc.mip_size(level);
                        let len = (width * height * bpp) as usize;
                        shared.queue.write_texture(
                            wgpu::TexelCopyTextureInfo {
                                texture: &texture,
                                mip_level: level,
                                origin: wgpu::Origin3d::ZERO,
                                aspect: wgpu::TextureAspect::All,
                            },
                            &data[offset..offset + len],
                            wgpu::TexelCopyBufferLayout {
                                offset: 0,
                                bytes_per_row: Some(width * bpp),
                                rows_per_image: Some(height),
                            },
                            wgpu::Extent3d {
                                width,
                                height,
                                depth_or_array_layers: 1,
                            },
                        );
                        offset += len;
                    }
                }
                texture
            })
            .map_err(|reason| GpuError::allocation(desc.label, reason))?;

        let mut registry = shared.registry.lock();
        let id = TextureId(registry.next());
        registry.textures.insert(
            id,
            TextureEntry {
                texture,
                format: desc.format,
                mip_levels: desc.mip_levels,
            },
        );
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) {
        match self.shared.registry.lock().textures.remove(&id) {
            Some(entry) => entry.texture.destroy(),
            None => panic!("destroying unknown or already destroyed texture {id:?}"),
        }
    }

    fn create_view(&self, texture: TextureId, desc: &ViewDesc) -> Result<ViewId, GpuError> {
        let mut registry = self.shared.registry.lock();
        let entry = registry.texture(texture)?;
        if !entry.format.is_view_compatible(desc.format) {
            return Err(GpuError::InvalidView(format!(
                "{:?} view over {:?} storage",
                desc.format, entry.format
            )));
        }
        let storage = map_format(entry.format);
        let (format, aspect) = if storage.is_depth_stencil_format() {
            let aspect = match desc.kind {
                ViewKind::ShaderRead => wgpu::TextureAspect::DepthOnly,
                _ => wgpu::TextureAspect::All,
            };
            (None, aspect)
        } else {
            (Some(map_format(desc.format)), wgpu::TextureAspect::All)
        };
        // Targets write the top level only; shader reads see the whole chain.
        let mip_level_count = match desc.kind {
            ViewKind::ShaderRead => entry.mip_levels,
            _ => 1,
        };
        let view = self
            .shared
            .scoped(|| {
                entry.texture.create_view(&wgpu::TextureViewDescriptor {
                    format,
                    dimension: Some(wgpu::TextureViewDimension::D2),
                    aspect,
                    base_mip_level: 0,
                    mip_level_count: Some(mip_level_count),
                    ..Default::default()
                })
            })
            .map_err(GpuError::InvalidView)?;
        let id = ViewId(registry.next());
        registry.views.insert(
            id,
            ViewEntry {
                view,
                format: format.unwrap_or(storage),
            },
        );
        Ok(id)
    }

    fn destroy_view(&self, id: ViewId) {
        if self.shared.registry.lock().views.remove(&id).is_none() {
            panic!("destroying unknown or already destroyed view {id:?}");
        }
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId, GpuError> {
        let address = map_address(desc.address);
        let filter = map_filter(desc.filter);
        let sampler = self
            .shared
            .scoped(|| {
                self.shared.device.create_sampler(&wgpu::SamplerDescriptor {
                    label: None,
                    address_mode_u: address,
                    address_mode_v: address,
                    address_mode_w: address,
                    mag_filter: filter,
                    min_filter: filter,
                    mipmap_filter: filter,
                    lod_min_clamp: desc.lod_min,
                    lod_max_clamp: desc.lod_max.min(32.0),
                    compare: desc.compare.map(map_compare),
                    ..Default::default()
                })
            })
            .map_err(|reason| GpuError::allocation("sampler", reason))?;
        let mut registry = self.shared.registry.lock();
        let id = SamplerId(registry.next());
        registry.samplers.insert(id, sampler);
        Ok(id)
    }

    fn destroy_sampler(&self, id: SamplerId) {
        if self.shared.registry.lock().samplers.remove(&id).is_none() {
            panic!("destroying unknown or already destroyed sampler {id:?}");
        }
    }

    fn create_program(&self, desc: &ProgramDesc<'_>) -> Result<ProgramId, GpuError> {
        if desc.geometry_entry.is_some() {
            return Err(GpuError::Unsupported(format!(
                "program '{}': geometry stage",
                desc.label
            )));
        }
        let entry = self
            .shared
            .scoped(|| self.build_program(desc))
            .map_err(|reason| GpuError::Program {
                label: desc.label.to_owned(),
                reason,
            })?;
        let mut registry = self.shared.registry.lock();
        let id = ProgramId(registry.next());
        registry.programs.insert(id, entry);
        log::debug!("wgpu: program '{}' -> {id:?}", desc.label);
        Ok(id)
    }

    fn destroy_program(&self, id: ProgramId) {
        if self.shared.registry.lock().programs.remove(&id).is_none() {
            panic!("destroying unknown or already destroyed program {id:?}");
        }
    }

    fn supports_index_format(&self, format: IndexFormat) -> bool {
        map_index_format(format).is_some()
    }
}

/// Bound state accumulated while encoding a frame.
#[derive(Default)]
struct EncodeState {
    colors: Vec<ViewId>,
    depth: Option<ViewId>,
    program: Option<ProgramId>,
    viewport: Option<Viewport>,
    vertex: Option<BufferId>,
    index: Option<(BufferId, IndexFormat)>,
    constants: BTreeMap<u32, BufferId>,
    resources: BTreeMap<u32, ViewId>,
    samplers: BTreeMap<u32, SamplerId>,
}

enum Bound {
    Buffer(wgpu::Buffer),
    View(wgpu::TextureView),
    Sampler(wgpu::Sampler),
}

/// Context rendering into an offscreen backbuffer.
pub struct WgpuContext {
    device: WgpuDevice,
    backbuffer: Backbuffer,
    pending: Vec<Command>,
}

impl WgpuContext {
    pub fn new(device: &WgpuDevice, width: u32, height: u32) -> Result<Self, GpuError> {
        let backbuffer = Backbuffer::create(device, width, height)?;
        Ok(Self {
            device: device.clone(),
            backbuffer,
            pending: Vec::new(),
        })
    }

    /// Reallocate the backbuffer; a no-op when the size is unchanged.
    pub fn resize_backbuffer(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if (width.max(1), height.max(1)) == (self.backbuffer.width, self.backbuffer.height) {
            return Ok(());
        }
        let next = Backbuffer::create(&self.device, width, height)?;
        self.backbuffer.destroy(&self.device);
        self.backbuffer = next;
        Ok(())
    }

    fn encode(
        &self,
        registry: &Registry,
        encoder: &mut wgpu::CommandEncoder,
        state: &mut EncodeState,
        command: Command,
    ) -> Result<(), GpuError> {
        match command {
            Command::BindTargets { colors, depth } => {
                state.colors = colors;
                state.depth = depth;
            }
            Command::BindShaderResources { slot, views } => {
                for (i, view) in views.into_iter().enumerate() {
                    state.resources.insert(slot + i as u32, view);
                }
            }
            Command::UnbindShaderResources { slot, count } => {
                for s in slot..slot + count {
                    state.resources.remove(&s);
                }
            }
            Command::BindSamplers { slot, samplers } => {
                for (i, sampler) in samplers.into_iter().enumerate() {
                    state.samplers.insert(slot + i as u32, sampler);
                }
            }
            Command::BindConstantBuffer { slot, buffer } => {
                state.constants.insert(slot, buffer);
            }
            Command::SetProgram(program) => state.program = Some(program),
            Command::SetViewport(viewport) => state.viewport = Some(viewport),
            Command::SetVertexBuffer { buffer, .. } => state.vertex = Some(buffer),
            Command::SetIndexBuffer { buffer, format } => state.index = Some((buffer, format)),
            // Topology is part of the pipeline.
            Command::SetTopology(_) => {}
            Command::DrawIndexed { count } => self.draw(registry, encoder, state, count)?,
            Command::ClearColor { view, color } => {
                let view = &registry.view(view)?.view;
                let [r, g, b, a] = color.map(f64::from);
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("clear color"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        depth_slice: None,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    occlusion_query_set: None,
                    timestamp_writes: None,
                });
            }
            Command::ClearDepth { view, depth } => {
                let entry = registry.view(view)?;
                let stencil_ops = entry.format.has_stencil_aspect().then_some(wgpu::Operations {
                    load: wgpu::LoadOp::Clear(0),
                    store: wgpu::StoreOp::Store,
                });
                let _pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("clear depth"),
                    color_attachments: &[],
                    depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                        view: &entry.view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(depth),
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops,
                    }),
                    occlusion_query_set: None,
                    timestamp_writes: None,
                });
            }
            Command::CopyTexture { src, dst } => {
                let src = &registry.texture(src)?.texture;
                let dst = &registry.texture(dst)?.texture;
                if matches!(
                    src.format(),
                    wgpu::TextureFormat::Depth24Plus | wgpu::TextureFormat::Depth24PlusStencil8
                ) {
                    log::warn!("wgpu: {:?} textures cannot be copied, skipping", src.format());
                    return Ok(());
                }
                encoder.copy_texture_to_texture(src.as_image_copy(), dst.as_image_copy(), src.size());
            }
        }
        Ok(())
    }

    fn draw(
        &self,
        registry: &Registry,
        encoder: &mut wgpu::CommandEncoder,
        state: &EncodeState,
        count: u32,
    ) -> Result<(), GpuError> {
        let Some(program_id) = state.program else {
            log::warn!("wgpu: draw without a program, skipping");
            return Ok(());
        };
        let program = registry.programs.get(&program_id).ok_or(GpuError::UnknownResource {
            kind: "program",
            id: program_id.0,
        })?;
        let (Some(vertex), Some((index, index_format))) = (state.vertex, state.index) else {
            log::warn!("wgpu: draw in '{}' without geometry, skipping", program.label);
            return Ok(());
        };
        let index_format = map_index_format(index_format)
            .ok_or_else(|| GpuError::Unsupported(format!("{index_format:?} indices")))?;
        let vertex = registry.buffer(vertex)?;
        let index = registry.buffer(index)?;

        let fallbacks = &self.device.shared.fallbacks;
        let mut bound = Vec::with_capacity(program.bindings.len());
        for binding in &program.bindings {
            let slot = binding.slot;
            let resource = match binding.kind {
                BindingKind::ConstantBuffer => Bound::Buffer(match state.constants.get(&slot) {
                    Some(&id) => registry.buffer(id)?.clone(),
                    None => fallbacks.constants.clone(),
                }),
                BindingKind::Texture => Bound::View(match state.resources.get(&slot) {
                    Some(&id) => registry.view(id)?.view.clone(),
                    None => fallbacks.texture.clone(),
                }),
                BindingKind::DepthTexture => Bound::View(match state.resources.get(&slot) {
                    Some(&id) => registry.view(id)?.view.clone(),
                    None => fallbacks.depth.clone(),
                }),
                BindingKind::Sampler => Bound::Sampler(match state.samplers.get(&slot) {
                    Some(id) => registry
                        .samplers
                        .get(id)
                        .ok_or(GpuError::UnknownResource {
                            kind: "sampler",
                            id: id.0,
                        })?
                        .clone(),
                    None => fallbacks.sampler.clone(),
                }),
            };
            bound.push((binding_index(binding.kind, slot), resource));
        }
        let entries: Vec<wgpu::BindGroupEntry<'_>> = bound
            .iter()
            .map(|(binding, resource)| wgpu::BindGroupEntry {
                binding: *binding,
                resource: match resource {
                    Bound::Buffer(buffer) => buffer.as_entire_binding(),
                    Bound::View(view) => wgpu::BindingResource::TextureView(view),
                    Bound::Sampler(sampler) => wgpu::BindingResource::Sampler(sampler),
                },
            })
            .collect();
        let bind_group = self.device.shared.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(program.label.as_str()),
            layout: &program.layout,
            entries: &entries,
        });

        let colors = state
            .colors
            .iter()
            .map(|&id| registry.view(id).map(|v| &v.view))
            .collect::<Result<Vec<_>, _>>()?;
        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = colors
            .iter()
            .map(|&view| {
                Some(wgpu::RenderPassColorAttachment {
                    view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                })
            })
            .collect();
        let depth = state.depth.map(|id| registry.view(id)).transpose()?;

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some(program.label.as_str()),
            color_attachments: &color_attachments,
            depth_stencil_attachment: depth.map(|entry| wgpu::RenderPassDepthStencilAttachment {
                view: &entry.view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        if let Some(vp) = state.viewport {
            pass.set_viewport(vp.x, vp.y, vp.width, vp.height, vp.min_depth, vp.max_depth);
        }
        pass.set_pipeline(&program.pipeline);
        pass.set_bind_group(0, &bind_group, &[]);
        pass.set_vertex_buffer(0, vertex.slice(..));
        pass.set_index_buffer(index.slice(..), index_format);
        pass.draw_indexed(0..count, 0, 0..1);
        Ok(())
    }
}

impl RenderContext for WgpuContext {
    fn record(&mut self, command: Command) {
        self.pending.push(command);
    }

    fn backbuffer(&self) -> &Backbuffer {
        &self.backbuffer
    }

    fn present(&mut self) -> Result<(), GpuError> {
        let commands = std::mem::take(&mut self.pending);
        let shared = self.device.shared.clone();
        let registry = shared.registry.lock();
        let mut encoder = shared
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kdx frame"),
            });

        let mut state = EncodeState::default();
        let encoded = shared.scoped(|| {
            for command in commands {
                self.encode(&registry, &mut encoder, &mut state, command)?;
            }
            Ok::<_, GpuError>(())
        });
        match encoded {
            Ok(result) => result?,
            Err(reason) => return Err(GpuError::Submit(reason)),
        }
        drop(registry);

        shared
            .scoped(|| shared.queue.submit(Some(encoder.finish())))
            .map(|_| ())
            .map_err(GpuError::Submit)
    }
}

impl Drop for WgpuContext {
    fn drop(&mut self) {
        self.backbuffer.destroy(&self.device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DepthFormat;

    #[test]
    fn binding_slots_are_partitioned() {
        assert_eq!(binding_index(BindingKind::ConstantBuffer, 1), 1);
        assert_eq!(binding_index(BindingKind::Texture, 2), 18);
        assert_eq!(binding_index(BindingKind::DepthTexture, 0), 16);
        assert_eq!(binding_index(BindingKind::Sampler, 0), 32);
    }

    #[test]
    fn depth_storage_maps_to_depth_formats() {
        for depth in [
            DepthFormat::D16Unorm,
            DepthFormat::D24UnormS8,
            DepthFormat::D32Float,
            DepthFormat::D32FloatS8,
        ] {
            let storage = map_format(depth.storage_format());
            assert!(storage.is_depth_stencil_format());
            assert_eq!(storage, map_format(depth.target_format()));
        }
        assert_eq!(map_format(TextureFormat::Rgba8UnormSrgb), wgpu::TextureFormat::Rgba8UnormSrgb);
    }

    #[test]
    fn byte_indices_are_unsupported() {
        assert_eq!(map_index_format(IndexFormat::U8), None);
        assert_eq!(map_index_format(IndexFormat::U16), Some(wgpu::IndexFormat::Uint16));
    }

    #[test]
    fn attributes_use_semantic_locations() {
        let attrs = vertex_attributes(VertexLayout::PositionNormal);
        assert_eq!(attrs[0].shader_location, 0);
        assert_eq!(attrs[1].shader_location, 2);
        assert_eq!(attrs[1].offset, 12);
    }

    #[test]
    fn usage_flags_translate() {
        let usage = map_texture_usage(TextureUsage::DEPTH_TARGET | TextureUsage::SHADER_READ);
        assert_eq!(
            usage,
            wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::TEXTURE_BINDING
        );
        assert_eq!(map_buffer_usage(BufferUsage::CONSTANT), wgpu::BufferUsages::UNIFORM);
    }
}
