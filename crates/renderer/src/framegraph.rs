//! Mini frame graph: named framebuffer targets and ordered render passes.
//! Each pass writes one output and may read attachments of other targets.

use thiserror::Error;

use crate::device::RenderContext;
use crate::framebuffer::{Framebuffer, FramebufferError};

/// Handle for a target registered with the graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TargetId(pub u32);

/// Handle for a render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PassId(pub u32);

/// Where a pass draws.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassOutput {
    Target(TargetId),
    Backbuffer,
}

/// Attachments a pass samples, and the slots they land in.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassInput {
    Color {
        target: TargetId,
        slot: u32,
        count: usize,
    },
    Depth {
        target: TargetId,
        slot: u32,
    },
}

impl PassInput {
    fn target(&self) -> TargetId {
        match *self {
            PassInput::Color { target, .. } | PassInput::Depth { target, .. } => target,
        }
    }

    fn slots(&self) -> (u32, u32) {
        match *self {
            PassInput::Color { slot, count, .. } => (slot, count as u32),
            PassInput::Depth { slot, .. } => (slot, 1),
        }
    }
}

/// Render pass description.
#[derive(Clone, Debug)]
pub struct PassDesc {
    pub label: String,
    pub output: PassOutput,
    pub inputs: Vec<PassInput>,
    /// Clear color applied before the pass runs; depth clears to far.
    pub clear: Option<[f32; 4]>,
}

impl PassDesc {
    pub fn new(label: impl Into<String>, output: PassOutput) -> Self {
        Self {
            label: label.into(),
            output,
            inputs: Vec::new(),
            clear: None,
        }
    }

    pub fn read_colors(mut self, target: TargetId, slot: u32, count: usize) -> Self {
        self.inputs.push(PassInput::Color { target, slot, count });
        self
    }

    pub fn read_depth(mut self, target: TargetId, slot: u32) -> Self {
        self.inputs.push(PassInput::Depth { target, slot });
        self
    }

    pub fn clear(mut self, color: [f32; 4]) -> Self {
        self.clear = Some(color);
        self
    }
}

/// Render pass execution function; `T` is caller-owned frame data.
pub type PassExecuteFn<T> = Box<dyn FnMut(&mut dyn RenderContext, &T)>;

struct Pass<T> {
    desc: PassDesc,
    execute: PassExecuteFn<T>,
}

#[derive(Debug, Error)]
pub enum FrameGraphError {
    #[error("unknown target {0:?}")]
    UnknownTarget(TargetId),
    #[error("pass '{pass}' reads its own output")]
    SelfDependency { pass: String },
    #[error("pass '{pass}' reads {requested} color attachment(s) of '{target}' which has {available}")]
    TooManyInputs {
        pass: String,
        target: String,
        requested: usize,
        available: usize,
    },
    #[error("pass '{pass}' reads depth of '{target}' which is not shader readable")]
    DepthNotReadable { pass: String, target: String },
    #[error(transparent)]
    Framebuffer(#[from] FramebufferError),
}

pub struct FrameGraph<T> {
    targets: Vec<Framebuffer>,
    passes: Vec<Pass<T>>,
}

impl<T> FrameGraph<T> {
    pub fn new() -> Self {
        Self {
            targets: Vec::new(),
            passes: Vec::new(),
        }
    }

    /// Add a render target to the graph.
    pub fn add_target(&mut self, framebuffer: Framebuffer) -> TargetId {
        let id = TargetId(self.targets.len() as u32);
        self.targets.push(framebuffer);
        id
    }

    pub fn target(&self, id: TargetId) -> Option<&Framebuffer> {
        self.targets.get(id.0 as usize)
    }

    pub fn target_mut(&mut self, id: TargetId) -> Option<&mut Framebuffer> {
        self.targets.get_mut(id.0 as usize)
    }

    fn lookup(&self, id: TargetId) -> Result<&Framebuffer, FrameGraphError> {
        self.target(id).ok_or(FrameGraphError::UnknownTarget(id))
    }

    /// Add a render pass. Passes run in the order they are added.
    pub fn add_pass(&mut self, desc: PassDesc, execute: PassExecuteFn<T>) -> Result<PassId, FrameGraphError> {
        if let PassOutput::Target(out) = desc.output {
            self.lookup(out)?;
        }
        for input in &desc.inputs {
            let target = input.target();
            let fb = self.lookup(target)?;
            if desc.output == PassOutput::Target(target) {
                return Err(FrameGraphError::SelfDependency {
                    pass: desc.label.clone(),
                });
            }
            match *input {
                PassInput::Color { count, .. } if count > fb.color_count() => {
                    return Err(FrameGraphError::TooManyInputs {
                        pass: desc.label.clone(),
                        target: fb.label().to_owned(),
                        requested: count,
                        available: fb.color_count(),
                    });
                }
                PassInput::Depth { .. } if !fb.has_readable_depth() => {
                    return Err(FrameGraphError::DepthNotReadable {
                        pass: desc.label.clone(),
                        target: fb.label().to_owned(),
                    });
                }
                _ => {}
            }
            let written = self
                .passes
                .iter()
                .any(|p| p.desc.output == PassOutput::Target(target));
            if !written {
                log::warn!(
                    "pass '{}' reads '{}' before any pass writes it",
                    desc.label,
                    fb.label()
                );
            }
        }

        let id = PassId(self.passes.len() as u32);
        self.passes.push(Pass { desc, execute });
        Ok(id)
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Runs every pass: bind output, clear, bind inputs, execute, unbind inputs.
    pub fn execute(&mut self, ctx: &mut dyn RenderContext, data: &T) -> Result<(), FrameGraphError> {
        for pass in &mut self.passes {
            log::trace!("frame graph: pass '{}'", pass.desc.label);
            match pass.desc.output {
                PassOutput::Target(id) => {
                    let fb = self.targets.get(id.0 as usize).ok_or(FrameGraphError::UnknownTarget(id))?;
                    fb.bind(ctx);
                    if let Some(color) = pass.desc.clear {
                        fb.clear(ctx, color);
                    }
                }
                PassOutput::Backbuffer => {
                    ctx.bind_backbuffer();
                    if let Some(color) = pass.desc.clear {
                        let bb = *ctx.backbuffer();
                        ctx.clear_color(bb.color_view, color);
                        if let Some(depth) = bb.depth_view {
                            ctx.clear_depth(depth, crate::framebuffer::FAR_DEPTH);
                        }
                    }
                }
            }

            for input in &pass.desc.inputs {
                let target = input.target();
                let fb = self
                    .targets
                    .get(target.0 as usize)
                    .ok_or(FrameGraphError::UnknownTarget(target))?;
                match *input {
                    PassInput::Color { slot, count, .. } => fb.use_color_resources(ctx, slot, count),
                    PassInput::Depth { slot, .. } => fb.use_depth_resource(ctx, slot)?,
                }
            }

            (pass.execute)(ctx, data);

            for input in &pass.desc.inputs {
                let (slot, count) = input.slots();
                ctx.unbind_shader_resources(slot, count);
            }
        }
        Ok(())
    }

    /// Resize every target; stops at the first failure.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<(), FrameGraphError> {
        for fb in &mut self.targets {
            fb.resize(width, height)?;
        }
        Ok(())
    }
}

impl<T> Default for FrameGraph<T> {
    fn default() -> Self {
        Self::new()
    }
}
