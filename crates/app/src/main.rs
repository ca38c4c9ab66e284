//! Entry point: renders the deferred demo offscreen.
//!
//! Flags: --gpu-backend=auto|vulkan|dx12|metal|gl, --size=WxH, --width=,
//! --height=, --model=path.obj, --frames=N, --headless.

mod config;
mod demo;

use std::sync::Arc;

use anyhow::{Context, Result};
use renderer::backend::{HeadlessContext, HeadlessDevice, WgpuContext, WgpuDevice};
use renderer::RenderDevice;

use crate::config::AppConfig;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = AppConfig::from_args(std::env::args().skip(1))?;
    log::info!(
        "Starting kdx. Backend: {:?}, headless={}, size={}x{}, frames={}",
        config.backends,
        config.headless,
        config.width,
        config.height,
        config.frames
    );

    if config.headless {
        let device = Arc::new(HeadlessDevice::new());
        let mut ctx = HeadlessContext::new(device.clone(), config.width, config.height)?;
        demo::run(device.clone(), &mut ctx, &config)?;
        log::info!("Headless stats: {:?}", device.stats());
    } else {
        let device = pollster::block_on(WgpuDevice::new(config.backends))
            .context("no usable GPU; try --headless")?;
        log::info!("Using device '{}'", device.name());
        let mut ctx = WgpuContext::new(&device, config.width, config.height)?;
        demo::run(Arc::new(device.clone()), &mut ctx, &config)?;
    }

    log::info!("Graceful shutdown. Bye!");
    Ok(())
}
