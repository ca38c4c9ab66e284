//! Device and context abstraction shared by every backend.
//!
//! A [`RenderDevice`] owns resource lifetimes and is shared across threads.
//! A [`RenderContext`] records commands for one frame; backends translate
//! the recorded stream when the frame is presented.

use asset::VertexLayout;

use crate::error::GpuError;
use crate::types::{
    BufferDesc, BufferId, DepthFormat, IndexFormat, ProgramId, SamplerDesc, SamplerId,
    TextureDesc, TextureFormat, TextureId, TextureUsage, Topology, ViewDesc, ViewId, Viewport,
};

/// Programmable stages a program may carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Geometry,
}

/// Kind of resource a program slot expects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    ConstantBuffer,
    Texture,
    DepthTexture,
    Sampler,
}

/// One resource slot declared by a program.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProgramBinding {
    pub kind: BindingKind,
    pub slot: u32,
}

impl ProgramBinding {
    pub const fn new(kind: BindingKind, slot: u32) -> Self {
        Self { kind, slot }
    }
}

/// Everything needed to build a pipeline for one set of targets.
#[derive(Clone, Copy, Debug)]
pub struct ProgramDesc<'a> {
    pub label: &'a str,
    pub source: &'a str,
    pub vertex_entry: &'a str,
    pub pixel_entry: Option<&'a str>,
    pub geometry_entry: Option<&'a str>,
    pub vertex_layout: VertexLayout,
    pub topology: Topology,
    pub color_formats: &'a [TextureFormat],
    pub depth_format: Option<DepthFormat>,
    /// Compare against stored depth; when false every fragment passes.
    pub depth_test: bool,
    pub depth_write: bool,
    pub sample_count: u32,
    pub bindings: &'a [ProgramBinding],
}

impl ProgramDesc<'_> {
    pub fn stages(&self) -> Vec<ShaderStage> {
        let mut stages = vec![ShaderStage::Vertex];
        if self.geometry_entry.is_some() {
            stages.push(ShaderStage::Geometry);
        }
        if self.pixel_entry.is_some() {
            stages.push(ShaderStage::Pixel);
        }
        stages
    }
}

/// Resource allocation and release.
///
/// Destroying a handle twice, or one the device never issued, is a caller
/// bug and may panic.
pub trait RenderDevice: Send + Sync {
    fn name(&self) -> &str;

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<BufferId, GpuError>;
    fn destroy_buffer(&self, id: BufferId);

    /// Creates a texture, uploading `data` (tightly packed rows) when given.
    fn create_texture(
        &self,
        desc: &TextureDesc<'_>,
        data: Option<&[u8]>,
    ) -> Result<TextureId, GpuError>;
    fn destroy_texture(&self, id: TextureId);

    fn create_view(&self, texture: TextureId, desc: &ViewDesc) -> Result<ViewId, GpuError>;
    fn destroy_view(&self, id: ViewId);

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId, GpuError>;
    fn destroy_sampler(&self, id: SamplerId);

    fn create_program(&self, desc: &ProgramDesc<'_>) -> Result<ProgramId, GpuError>;
    fn destroy_program(&self, id: ProgramId);

    fn supports_index_format(&self, format: IndexFormat) -> bool;
}

/// A recorded rendering command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    BindTargets {
        colors: Vec<ViewId>,
        depth: Option<ViewId>,
    },
    BindShaderResources {
        slot: u32,
        views: Vec<ViewId>,
    },
    UnbindShaderResources {
        slot: u32,
        count: u32,
    },
    BindSamplers {
        slot: u32,
        samplers: Vec<SamplerId>,
    },
    BindConstantBuffer {
        slot: u32,
        buffer: BufferId,
    },
    SetProgram(ProgramId),
    SetViewport(Viewport),
    SetVertexBuffer {
        buffer: BufferId,
        layout: VertexLayout,
    },
    SetIndexBuffer {
        buffer: BufferId,
        format: IndexFormat,
    },
    SetTopology(Topology),
    DrawIndexed {
        count: u32,
    },
    ClearColor {
        view: ViewId,
        color: [f32; 4],
    },
    ClearDepth {
        view: ViewId,
        depth: f32,
    },
    CopyTexture {
        src: TextureId,
        dst: TextureId,
    },
}

/// Per-frame command recording.
///
/// Slots bound through `bind_shader_resources`/`bind_samplers` are
/// consecutive starting at `slot`.
pub trait RenderContext {
    fn record(&mut self, command: Command);
    fn backbuffer(&self) -> &Backbuffer;
    /// Submits everything recorded since the last present.
    fn present(&mut self) -> Result<(), GpuError>;

    fn bind_targets(&mut self, colors: &[ViewId], depth: Option<ViewId>) {
        self.record(Command::BindTargets {
            colors: colors.to_vec(),
            depth,
        });
    }

    fn bind_backbuffer(&mut self) {
        let bb = self.backbuffer();
        let colors = vec![bb.color_view];
        let depth = bb.depth_view;
        let viewport = Viewport::full(bb.width, bb.height);
        self.record(Command::BindTargets { colors, depth });
        self.record(Command::SetViewport(viewport));
    }

    fn bind_shader_resources(&mut self, slot: u32, views: &[ViewId]) {
        self.record(Command::BindShaderResources {
            slot,
            views: views.to_vec(),
        });
    }

    fn unbind_shader_resources(&mut self, slot: u32, count: u32) {
        self.record(Command::UnbindShaderResources { slot, count });
    }

    fn bind_samplers(&mut self, slot: u32, samplers: &[SamplerId]) {
        self.record(Command::BindSamplers {
            slot,
            samplers: samplers.to_vec(),
        });
    }

    fn bind_constant_buffer(&mut self, slot: u32, buffer: BufferId) {
        self.record(Command::BindConstantBuffer { slot, buffer });
    }

    fn set_program(&mut self, program: ProgramId) {
        self.record(Command::SetProgram(program));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.record(Command::SetViewport(viewport));
    }

    fn set_vertex_buffer(&mut self, buffer: BufferId, layout: VertexLayout) {
        self.record(Command::SetVertexBuffer { buffer, layout });
    }

    fn set_index_buffer(&mut self, buffer: BufferId, format: IndexFormat) {
        self.record(Command::SetIndexBuffer { buffer, format });
    }

    fn set_topology(&mut self, topology: Topology) {
        self.record(Command::SetTopology(topology));
    }

    fn draw_indexed(&mut self, count: u32) {
        self.record(Command::DrawIndexed { count });
    }

    fn clear_color(&mut self, view: ViewId, color: [f32; 4]) {
        self.record(Command::ClearColor { view, color });
    }

    fn clear_depth(&mut self, view: ViewId, depth: f32) {
        self.record(Command::ClearDepth { view, depth });
    }

    fn copy_texture(&mut self, src: TextureId, dst: TextureId) {
        self.record(Command::CopyTexture { src, dst });
    }
}

/// Final presentation surface, owned by the context.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Backbuffer {
    pub width: u32,
    pub height: u32,
    pub color: TextureId,
    pub color_view: ViewId,
    pub color_format: TextureFormat,
    pub depth: Option<TextureId>,
    pub depth_view: Option<ViewId>,
    pub depth_format: Option<DepthFormat>,
}

impl Backbuffer {
    pub const COLOR_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;
    pub const DEPTH_FORMAT: DepthFormat = DepthFormat::D32Float;

    /// Allocates backbuffer storage through `device`.
    pub fn create(device: &dyn RenderDevice, width: u32, height: u32) -> Result<Self, GpuError> {
        let (width, height) = (width.max(1), height.max(1));
        let color = device.create_texture(
            &TextureDesc {
                label: "backbuffer color",
                width,
                height,
                format: Self::COLOR_FORMAT,
                mip_levels: 1,
                sample_count: 1,
                usage: TextureUsage::RENDER_TARGET | TextureUsage::COPY_DST | TextureUsage::COPY_SRC,
            },
            None,
        )?;
        let color_view = match device.create_view(color, &ViewDesc::render_target(Self::COLOR_FORMAT)) {
            Ok(view) => view,
            Err(err) => {
                device.destroy_texture(color);
                return Err(err);
            }
        };

        let depth_format = Self::DEPTH_FORMAT;
        let depth = device
            .create_texture(
                &TextureDesc {
                    label: "backbuffer depth",
                    width,
                    height,
                    format: depth_format.target_format(),
                    mip_levels: 1,
                    sample_count: 1,
                    usage: TextureUsage::DEPTH_TARGET | TextureUsage::COPY_DST,
                },
                None,
            )
            .and_then(|tex| {
                match device.create_view(tex, &ViewDesc::depth_target(depth_format.target_format())) {
                    Ok(view) => Ok((tex, view)),
                    Err(err) => {
                        device.destroy_texture(tex);
                        Err(err)
                    }
                }
            });
        let (depth, depth_view) = match depth {
            Ok(pair) => pair,
            Err(err) => {
                device.destroy_view(color_view);
                device.destroy_texture(color);
                return Err(err);
            }
        };

        Ok(Self {
            width,
            height,
            color,
            color_view,
            color_format: Self::COLOR_FORMAT,
            depth: Some(depth),
            depth_view: Some(depth_view),
            depth_format: Some(depth_format),
        })
    }

    pub fn destroy(&self, device: &dyn RenderDevice) {
        if let Some(view) = self.depth_view {
            device.destroy_view(view);
        }
        if let Some(tex) = self.depth {
            device.destroy_texture(tex);
        }
        device.destroy_view(self.color_view);
        device.destroy_texture(self.color);
    }
}
