//! Command line flags.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};

/// Parsed launch options. Unknown flags are ignored with a warning.
#[derive(Clone, Debug, PartialEq)]
pub struct AppConfig {
    pub backends: wgpu::Backends,
    pub width: u32,
    pub height: u32,
    /// OBJ file to show; the built-in scene is used when absent.
    pub model: Option<PathBuf>,
    pub frames: u32,
    /// Record against the headless device instead of a GPU.
    pub headless: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            width: 1280,
            height: 720,
            model: None,
            frames: 3,
            headless: false,
        }
    }
}

impl AppConfig {
    /// Parse flags (without the program name).
    pub fn from_args<I, S>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut cfg = Self::default();
        for arg in args {
            let arg = arg.as_ref();
            if let Some(val) = arg.strip_prefix("--gpu-backend=") {
                cfg.backends = parse_backend(val);
            } else if let Some(val) = arg.strip_prefix("--size=") {
                let (w, h) = val
                    .split_once('x')
                    .or_else(|| val.split_once('X'))
                    .with_context(|| format!("--size expects WxH, got '{val}'"))?;
                cfg.width = parse_dim("width", w)?;
                cfg.height = parse_dim("height", h)?;
            } else if let Some(val) = arg.strip_prefix("--width=") {
                cfg.width = parse_dim("width", val)?;
            } else if let Some(val) = arg.strip_prefix("--height=") {
                cfg.height = parse_dim("height", val)?;
            } else if let Some(val) = arg.strip_prefix("--model=") {
                cfg.model = Some(PathBuf::from(val));
            } else if let Some(val) = arg.strip_prefix("--frames=") {
                cfg.frames = val
                    .parse()
                    .with_context(|| format!("--frames expects a number, got '{val}'"))?;
            } else if arg == "--headless" {
                cfg.headless = true;
            } else {
                log::warn!("Ignoring unknown argument '{arg}'");
            }
        }
        Ok(cfg)
    }
}

fn parse_backend(val: &str) -> wgpu::Backends {
    match val.to_ascii_lowercase().as_str() {
        "auto" => wgpu::Backends::all(),
        "vulkan" | "vk" => wgpu::Backends::VULKAN,
        "dx12" | "d3d12" => wgpu::Backends::DX12,
        "metal" | "mtl" => wgpu::Backends::METAL,
        "gl" | "opengl" | "gles" => wgpu::Backends::GL,
        other => {
            log::warn!("Unknown backend '{other}', falling back to auto.");
            wgpu::Backends::all()
        }
    }
}

fn parse_dim(what: &str, val: &str) -> Result<u32> {
    let n: u32 = val
        .parse()
        .with_context(|| format!("invalid {what} '{val}'"))?;
    if n == 0 {
        bail!("{what} must be positive");
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_flags() {
        let cfg = AppConfig::from_args(Vec::<String>::new()).unwrap();
        assert_eq!(cfg, AppConfig::default());
    }

    #[test]
    fn parses_every_flag() {
        let cfg = AppConfig::from_args([
            "--gpu-backend=vk",
            "--size=640x480",
            "--height=400",
            "--model=assets/sponza.obj",
            "--frames=10",
            "--headless",
        ])
        .unwrap();
        assert_eq!(cfg.backends, wgpu::Backends::VULKAN);
        assert_eq!((cfg.width, cfg.height), (640, 400));
        assert_eq!(cfg.model, Some(PathBuf::from("assets/sponza.obj")));
        assert_eq!(cfg.frames, 10);
        assert!(cfg.headless);
    }

    #[test]
    fn unknown_backend_falls_back_to_auto() {
        let cfg = AppConfig::from_args(["--gpu-backend=glide"]).unwrap();
        assert_eq!(cfg.backends, wgpu::Backends::all());
    }

    #[test]
    fn bad_sizes_are_errors() {
        assert!(AppConfig::from_args(["--size=640"]).is_err());
        assert!(AppConfig::from_args(["--width=0"]).is_err());
        assert!(AppConfig::from_args(["--height=tall"]).is_err());
    }
}
