//! Renderer: device abstraction, resource cache, geometry, models and
//! framebuffers.
//!
//! GPU work goes through [`RenderDevice`] and [`RenderContext`]. The
//! headless backend is always built; the wgpu backend sits behind the
//! `wgpu-backend` feature.

pub mod backend;
pub mod cache;
pub mod device;
pub mod error;
pub mod framebuffer;
pub mod framegraph;
pub mod geometry;
pub mod material;
pub mod model;
pub mod types;

pub use cache::{CacheError, ResourceCache, ResourceKey, SharedSampler, SharedTexture};
pub use device::{
    Backbuffer, BindingKind, Command, ProgramBinding, ProgramDesc, RenderContext, RenderDevice,
    ShaderStage,
};
pub use error::GpuError;
pub use framebuffer::{Framebuffer, FramebufferError, FramebufferParams};
pub use framegraph::{FrameGraph, FrameGraphError, PassDesc, PassId, PassOutput, TargetId};
pub use geometry::{GeometryBuffer, GeometryBuilder, RawGeometry, finalize_mesh_data};
pub use material::{Material, MaterialConstants};
pub use model::{Mesh, Model, ModelError};
pub use types::*;
