//! Device implementations.
//!
//! The headless backend is always available and records everything it is
//! asked to do; the wgpu backend drives real hardware.

pub mod headless;
#[cfg(feature = "wgpu-backend")]
pub mod wgpu_backend;

pub use headless::{HeadlessContext, HeadlessDevice};
#[cfg(feature = "wgpu-backend")]
pub use wgpu_backend::{WgpuContext, WgpuDevice};
