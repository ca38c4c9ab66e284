//! Multi-target framebuffers usable as draw destination or shader input.
//!
//! Every color attachment carries a render target view and a shader view.
//! A readable depth attachment is allocated with typeless storage so that a
//! depth view and a shader view can both be derived from it.

use std::sync::Arc;

use thiserror::Error;

use crate::device::{Backbuffer, RenderContext, RenderDevice};
use crate::error::GpuError;
use crate::types::{
    DepthFormat, TextureDesc, TextureFormat, TextureId, TextureUsage, ViewDesc, ViewId, Viewport,
};

/// Depth value `clear` resets to.
pub const FAR_DEPTH: f32 = 1.0;

#[derive(Debug, Error)]
pub enum FramebufferError {
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("invalid framebuffer parameters: {0}")]
    InvalidParams(String),
    #[error("blit size mismatch: {src:?} -> {dst:?}")]
    SizeMismatch { src: (u32, u32), dst: (u32, u32) },
    #[error("blit color attachment {index}: {src:?} -> {dst:?}")]
    ColorFormatMismatch {
        index: usize,
        src: TextureFormat,
        dst: TextureFormat,
    },
    #[error("blit depth format mismatch: {src:?} -> {dst:?}")]
    DepthFormatMismatch { src: DepthFormat, dst: DepthFormat },
    #[error("blit sample count mismatch: {src} -> {dst}")]
    SampleCountMismatch { src: u32, dst: u32 },
    #[error("framebuffer '{0}' has no shader-readable depth")]
    DepthNotReadable(String),
    #[error("framebuffer '{0}' cannot be blitted onto itself")]
    SelfBlit(String),
}

/// Creation parameters, kept for the framebuffer's lifetime.
#[derive(Clone, Debug, PartialEq)]
pub struct FramebufferParams {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
    pub color_formats: Vec<TextureFormat>,
    pub depth: Option<DepthFormat>,
    pub depth_readable: bool,
}

impl FramebufferParams {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            label: "framebuffer".into(),
            width,
            height,
            sample_count: 1,
            color_formats: Vec::new(),
            depth: None,
            depth_readable: false,
        }
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn samples(mut self, count: u32) -> Self {
        self.sample_count = count;
        self
    }

    pub fn color(mut self, format: TextureFormat) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn colors(mut self, formats: &[TextureFormat]) -> Self {
        self.color_formats.extend_from_slice(formats);
        self
    }

    /// Depth used only for testing.
    pub fn depth(mut self, format: DepthFormat) -> Self {
        self.depth = Some(format);
        self.depth_readable = false;
        self
    }

    /// Depth that later passes can also sample.
    pub fn readable_depth(mut self, format: DepthFormat) -> Self {
        self.depth = Some(format);
        self.depth_readable = true;
        self
    }

    fn validate(&self) -> Result<(), FramebufferError> {
        if self.color_formats.is_empty() && self.depth.is_none() {
            return Err(FramebufferError::InvalidParams(format!(
                "'{}' has no attachments",
                self.label
            )));
        }
        if self.sample_count == 0 || !self.sample_count.is_power_of_two() {
            return Err(FramebufferError::InvalidParams(format!(
                "sample count {} is not a power of two",
                self.sample_count
            )));
        }
        if let Some(format) = self.color_formats.iter().find(|f| !f.is_color_renderable()) {
            return Err(FramebufferError::InvalidParams(format!(
                "{format:?} is not a color target format"
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug)]
struct ColorAttachment {
    texture: TextureId,
    shader_view: ViewId,
    target_view: ViewId,
}

#[derive(Clone, Copy, Debug)]
struct DepthAttachment {
    texture: TextureId,
    shader_view: Option<ViewId>,
    target_view: ViewId,
}

#[derive(Default)]
struct Attachments {
    colors: Vec<ColorAttachment>,
    depth: Option<DepthAttachment>,
}

impl Attachments {
    fn allocate(device: &dyn RenderDevice, params: &FramebufferParams) -> Result<Self, GpuError> {
        let mut out = Attachments::default();
        if let Err(err) = out.fill(device, params) {
            out.release(device);
            return Err(err);
        }
        Ok(out)
    }

    fn fill(&mut self, device: &dyn RenderDevice, params: &FramebufferParams) -> Result<(), GpuError> {
        let copy = TextureUsage::COPY_SRC | TextureUsage::COPY_DST;
        for (i, &format) in params.color_formats.iter().enumerate() {
            let label = format!("{} color {i}", params.label);
            let texture = device.create_texture(
                &TextureDesc {
                    label: &label,
                    width: params.width,
                    height: params.height,
                    format,
                    mip_levels: 1,
                    sample_count: params.sample_count,
                    usage: TextureUsage::RENDER_TARGET | TextureUsage::SHADER_READ | copy,
                },
                None,
            )?;
            let target_view = match device.create_view(texture, &ViewDesc::render_target(format)) {
                Ok(view) => view,
                Err(err) => {
                    device.destroy_texture(texture);
                    return Err(err);
                }
            };
            let shader_view = match device.create_view(texture, &ViewDesc::shader_read(format)) {
                Ok(view) => view,
                Err(err) => {
                    device.destroy_view(target_view);
                    device.destroy_texture(texture);
                    return Err(err);
                }
            };
            self.colors.push(ColorAttachment {
                texture,
                shader_view,
                target_view,
            });
        }

        let Some(depth) = params.depth else {
            return Ok(());
        };
        let label = format!("{} depth", params.label);
        let (storage, usage) = if params.depth_readable {
            (
                depth.storage_format(),
                TextureUsage::DEPTH_TARGET | TextureUsage::SHADER_READ | copy,
            )
        } else {
            (depth.target_format(), TextureUsage::DEPTH_TARGET | copy)
        };
        let texture = device.create_texture(
            &TextureDesc {
                label: &label,
                width: params.width,
                height: params.height,
                format: storage,
                mip_levels: 1,
                sample_count: params.sample_count,
                usage,
            },
            None,
        )?;
        let target_view = match device.create_view(texture, &ViewDesc::depth_target(depth.target_format())) {
            Ok(view) => view,
            Err(err) => {
                device.destroy_texture(texture);
                return Err(err);
            }
        };
        let shader_view = if params.depth_readable {
            match device.create_view(texture, &ViewDesc::shader_read(depth.shader_format())) {
                Ok(view) => Some(view),
                Err(err) => {
                    device.destroy_view(target_view);
                    device.destroy_texture(texture);
                    return Err(err);
                }
            }
        } else {
            None
        };
        self.depth = Some(DepthAttachment {
            texture,
            shader_view,
            target_view,
        });
        Ok(())
    }

    fn release(&mut self, device: &dyn RenderDevice) {
        for color in self.colors.drain(..) {
            device.destroy_view(color.target_view);
            device.destroy_view(color.shader_view);
            device.destroy_texture(color.texture);
        }
        if let Some(depth) = self.depth.take() {
            if let Some(view) = depth.shader_view {
                device.destroy_view(view);
            }
            device.destroy_view(depth.target_view);
            device.destroy_texture(depth.texture);
        }
    }
}

pub struct Framebuffer {
    device: Arc<dyn RenderDevice>,
    params: FramebufferParams,
    attachments: Attachments,
}

impl Framebuffer {
    /// Allocates every attachment. Zero dimensions are clamped to 1.
    pub fn new(device: Arc<dyn RenderDevice>, mut params: FramebufferParams) -> Result<Self, FramebufferError> {
        params.width = params.width.max(1);
        params.height = params.height.max(1);
        params.validate()?;
        let attachments = Attachments::allocate(device.as_ref(), &params)?;
        log::debug!(
            "framebuffer '{}': {}x{}, {} color, depth {:?}",
            params.label,
            params.width,
            params.height,
            params.color_formats.len(),
            params.depth
        );
        Ok(Self {
            device,
            params,
            attachments,
        })
    }

    pub fn params(&self) -> &FramebufferParams {
        &self.params
    }

    pub fn label(&self) -> &str {
        &self.params.label
    }

    pub fn width(&self) -> u32 {
        self.params.width
    }

    pub fn height(&self) -> u32 {
        self.params.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.params.width, self.params.height)
    }

    pub fn sample_count(&self) -> u32 {
        self.params.sample_count
    }

    pub fn color_count(&self) -> usize {
        self.attachments.colors.len()
    }

    pub fn color_formats(&self) -> &[TextureFormat] {
        &self.params.color_formats
    }

    pub fn depth_format(&self) -> Option<DepthFormat> {
        self.params.depth
    }

    pub fn has_readable_depth(&self) -> bool {
        self.attachments.depth.is_some_and(|d| d.shader_view.is_some())
    }

    pub fn color_texture(&self, index: usize) -> Option<TextureId> {
        self.attachments.colors.get(index).map(|c| c.texture)
    }

    /// Shader view of color attachment `index`.
    pub fn color_view(&self, index: usize) -> Option<ViewId> {
        self.attachments.colors.get(index).map(|c| c.shader_view)
    }

    pub fn color_target_view(&self, index: usize) -> Option<ViewId> {
        self.attachments.colors.get(index).map(|c| c.target_view)
    }

    pub fn depth_texture(&self) -> Option<TextureId> {
        self.attachments.depth.map(|d| d.texture)
    }

    /// Shader view of the depth attachment, if it is readable.
    pub fn depth_view(&self) -> Option<ViewId> {
        self.attachments.depth.and_then(|d| d.shader_view)
    }

    pub fn depth_target_view(&self) -> Option<ViewId> {
        self.attachments.depth.map(|d| d.target_view)
    }

    pub fn viewport(&self) -> Viewport {
        Viewport::full(self.params.width, self.params.height)
    }

    pub fn set_viewport(&self, ctx: &mut dyn RenderContext) {
        ctx.set_viewport(self.viewport());
    }

    /// Binds all attachments as the draw destination and covers them with
    /// the viewport.
    pub fn bind(&self, ctx: &mut dyn RenderContext) {
        let colors: Vec<ViewId> = self.attachments.colors.iter().map(|c| c.target_view).collect();
        ctx.bind_targets(&colors, self.depth_target_view());
        self.set_viewport(ctx);
    }

    /// Binds the first `count` color attachments as shader inputs starting
    /// at `slot`. The framebuffer must not be bound as a target meanwhile.
    pub fn use_color_resources(&self, ctx: &mut dyn RenderContext, slot: u32, count: usize) {
        if count > self.color_count() {
            log::warn!(
                "'{}' has {} color attachment(s), {count} requested",
                self.params.label,
                self.color_count()
            );
        }
        let views: Vec<ViewId> = self
            .attachments
            .colors
            .iter()
            .take(count)
            .map(|c| c.shader_view)
            .collect();
        ctx.bind_shader_resources(slot, &views);
    }

    pub fn use_depth_resource(&self, ctx: &mut dyn RenderContext, slot: u32) -> Result<(), FramebufferError> {
        let view = self
            .depth_view()
            .ok_or_else(|| FramebufferError::DepthNotReadable(self.params.label.clone()))?;
        ctx.bind_shader_resources(slot, &[view]);
        Ok(())
    }

    /// Clears every color attachment to `color` and depth to the far plane.
    pub fn clear(&self, ctx: &mut dyn RenderContext, color: [f32; 4]) {
        for attachment in &self.attachments.colors {
            ctx.clear_color(attachment.target_view, color);
        }
        if let Some(depth) = self.attachments.depth {
            ctx.clear_depth(depth.target_view, FAR_DEPTH);
        }
    }

    /// Copies like-indexed color attachments, and depth when both sides have
    /// it, into `dst`. Attachments beyond the smaller color count are skipped.
    pub fn blit(&self, ctx: &mut dyn RenderContext, dst: &Framebuffer) -> Result<(), FramebufferError> {
        if std::ptr::eq(self, dst) {
            return Err(FramebufferError::SelfBlit(self.params.label.clone()));
        }
        self.check_blit(dst.size(), dst.sample_count())?;
        let pairs = self.params.color_formats.iter().zip(&dst.params.color_formats);
        for (index, (&src, &dst)) in pairs.enumerate() {
            if !src.is_copy_compatible(dst) {
                return Err(FramebufferError::ColorFormatMismatch { index, src, dst });
            }
        }
        if let (Some(src), Some(dst)) = (self.params.depth, dst.params.depth) {
            if src != dst {
                return Err(FramebufferError::DepthFormatMismatch { src, dst });
            }
        }

        for (src, dst) in self.attachments.colors.iter().zip(&dst.attachments.colors) {
            ctx.copy_texture(src.texture, dst.texture);
        }
        if let (Some(src), Some(dst)) = (self.attachments.depth, dst.attachments.depth) {
            ctx.copy_texture(src.texture, dst.texture);
        }
        Ok(())
    }

    /// Copies color attachment 0 and depth into the backbuffer.
    pub fn blit_to_backbuffer(&self, ctx: &mut dyn RenderContext) -> Result<(), FramebufferError> {
        let bb: Backbuffer = *ctx.backbuffer();
        self.check_blit((bb.width, bb.height), 1)?;
        let color = self.attachments.colors.first();
        if let Some(&src) = self.params.color_formats.first() {
            if !src.is_copy_compatible(bb.color_format) {
                return Err(FramebufferError::ColorFormatMismatch {
                    index: 0,
                    src,
                    dst: bb.color_format,
                });
            }
        }
        let depth = match (self.params.depth, bb.depth_format, self.attachments.depth, bb.depth) {
            (Some(src), Some(dst), Some(attachment), Some(texture)) => {
                if src != dst {
                    return Err(FramebufferError::DepthFormatMismatch { src, dst });
                }
                Some((attachment.texture, texture))
            }
            _ => None,
        };

        if let Some(color) = color {
            ctx.copy_texture(color.texture, bb.color);
        }
        if let Some((src, dst)) = depth {
            ctx.copy_texture(src, dst);
        }
        Ok(())
    }

    fn check_blit(&self, dst_size: (u32, u32), dst_samples: u32) -> Result<(), FramebufferError> {
        if self.size() != dst_size {
            return Err(FramebufferError::SizeMismatch {
                src: self.size(),
                dst: dst_size,
            });
        }
        if self.params.sample_count != dst_samples {
            return Err(FramebufferError::SampleCountMismatch {
                src: self.params.sample_count,
                dst: dst_samples,
            });
        }
        Ok(())
    }

    /// Recreates every attachment at the new size with the same formats.
    /// On failure the old attachments are kept.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), FramebufferError> {
        let mut params = self.params.clone();
        params.width = width.max(1);
        params.height = height.max(1);
        let next = Attachments::allocate(self.device.as_ref(), &params)?;
        let mut old = std::mem::replace(&mut self.attachments, next);
        old.release(self.device.as_ref());
        self.params = params;
        log::debug!(
            "framebuffer '{}' resized to {}x{}",
            self.params.label,
            self.params.width,
            self.params.height
        );
        Ok(())
    }
}

impl Drop for Framebuffer {
    fn drop(&mut self) {
        self.attachments.release(self.device.as_ref());
    }
}

impl std::fmt::Debug for Framebuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Framebuffer")
            .field("params", &self.params)
            .field("colors", &self.attachments.colors)
            .field("depth", &self.attachments.depth)
            .finish()
    }
}
