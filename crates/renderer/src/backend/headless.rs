//! Headless device that validates and records instead of rendering.
//!
//! Used by tests and by `--headless` runs. Allocations are tracked so leaks
//! and double frees show up, and failures can be injected to exercise error
//! paths.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::device::{Backbuffer, Command, ProgramDesc, RenderContext, RenderDevice};
use crate::error::GpuError;
use crate::types::{
    BufferDesc, BufferId, BufferUsage, IndexFormat, ProgramId, SamplerDesc, SamplerId,
    TextureDesc, TextureId, TextureUsage, ViewDesc, ViewId, ViewKind, max_mip_levels,
};

#[derive(Clone, Debug, PartialEq)]
pub struct BufferRecord {
    pub label: String,
    pub usage: BufferUsage,
    pub contents: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TextureRecord {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: crate::types::TextureFormat,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub usage: TextureUsage,
    pub data: Option<Vec<u8>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ViewRecord {
    pub texture: TextureId,
    pub desc: ViewDesc,
}

/// Running totals since the device was created.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeadlessStats {
    pub buffers_created: usize,
    pub buffers_destroyed: usize,
    pub textures_created: usize,
    pub textures_destroyed: usize,
    pub views_created: usize,
    pub views_destroyed: usize,
    pub samplers_created: usize,
    pub samplers_destroyed: usize,
    pub programs_created: usize,
}

#[derive(Default)]
struct State {
    next_id: u64,
    skip_before_fail: usize,
    fail_next: usize,
    fail_views: usize,
    buffers: HashMap<BufferId, BufferRecord>,
    textures: HashMap<TextureId, TextureRecord>,
    views: HashMap<ViewId, ViewRecord>,
    samplers: HashMap<SamplerId, SamplerDesc>,
    programs: HashMap<ProgramId, String>,
    stats: HeadlessStats,
}

impl State {
    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn check_injected(&mut self, label: &str) -> Result<(), GpuError> {
        if self.fail_next == 0 {
            return Ok(());
        }
        if self.skip_before_fail > 0 {
            self.skip_before_fail -= 1;
            return Ok(());
        }
        self.fail_next -= 1;
        Err(GpuError::allocation(label, "injected failure"))
    }
}

pub struct HeadlessDevice {
    state: Mutex<State>,
    byte_indices: bool,
}

impl HeadlessDevice {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            byte_indices: true,
        }
    }

    /// A device that rejects 8-bit index buffers, like most modern APIs.
    pub fn without_byte_indices() -> Self {
        Self {
            byte_indices: false,
            ..Self::new()
        }
    }

    /// Make the next `count` allocations of any kind fail.
    pub fn fail_next_allocations(&self, count: usize) {
        self.fail_allocations_after(0, count);
    }

    /// Let `skip` allocations succeed, then fail the following `count`.
    pub fn fail_allocations_after(&self, skip: usize, count: usize) {
        let mut state = self.state.lock();
        state.skip_before_fail = skip;
        state.fail_next = count;
    }

    /// Make the next `count` view creations fail after validation.
    pub fn fail_next_views(&self, count: usize) {
        self.state.lock().fail_views = count;
    }

    pub fn stats(&self) -> HeadlessStats {
        self.state.lock().stats
    }

    pub fn live_buffers(&self) -> usize {
        self.state.lock().buffers.len()
    }

    pub fn live_textures(&self) -> usize {
        self.state.lock().textures.len()
    }

    pub fn live_views(&self) -> usize {
        self.state.lock().views.len()
    }

    pub fn live_samplers(&self) -> usize {
        self.state.lock().samplers.len()
    }

    pub fn live_programs(&self) -> usize {
        self.state.lock().programs.len()
    }

    pub fn buffer(&self, id: BufferId) -> Option<BufferRecord> {
        self.state.lock().buffers.get(&id).cloned()
    }

    pub fn texture(&self, id: TextureId) -> Option<TextureRecord> {
        self.state.lock().textures.get(&id).cloned()
    }

    pub fn view(&self, id: ViewId) -> Option<ViewRecord> {
        self.state.lock().views.get(&id).copied()
    }

    pub fn sampler(&self, id: SamplerId) -> Option<SamplerDesc> {
        self.state.lock().samplers.get(&id).copied()
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_texture(desc: &TextureDesc<'_>, data: Option<&[u8]>) -> Result<(), GpuError> {
    if desc.width == 0 || desc.height == 0 {
        return Err(GpuError::allocation(desc.label, "zero-sized texture"));
    }
    if desc.sample_count == 0 || !desc.sample_count.is_power_of_two() {
        return Err(GpuError::allocation(
            desc.label,
            format!("invalid sample count {}", desc.sample_count),
        ));
    }
    let max_levels = max_mip_levels(desc.width, desc.height);
    if desc.mip_levels == 0 || desc.mip_levels > max_levels {
        return Err(GpuError::allocation(
            desc.label,
            format!("{} mip levels, {}x{} allows 1..={max_levels}", desc.mip_levels, desc.width, desc.height),
        ));
    }
    if desc.mip_levels > 1 && desc.sample_count > 1 {
        return Err(GpuError::allocation(desc.label, "multisampled textures have one mip level"));
    }
    let format = desc.format;
    if desc.usage.contains(TextureUsage::DEPTH_TARGET) && !(format.is_depth() || format.is_typeless()) {
        return Err(GpuError::allocation(desc.label, format!("{format:?} cannot back a depth target")));
    }
    // A typed depth surface cannot also be sampled; it needs typeless storage.
    if desc.usage.contains(TextureUsage::SHADER_READ) && format.is_depth() {
        return Err(GpuError::allocation(
            desc.label,
            format!("{format:?} is not shader readable, use typeless storage"),
        ));
    }
    if let Some(data) = data {
        let expected = desc.data_len();
        if data.len() != expected {
            return Err(GpuError::allocation(
                desc.label,
                format!("initial data is {} bytes, expected {expected}", data.len()),
            ));
        }
    }
    Ok(())
}

fn validate_view(texture: &TextureRecord, desc: &ViewDesc) -> Result<(), GpuError> {
    let storage = texture.format;
    if !storage.is_view_compatible(desc.format) {
        return Err(GpuError::InvalidView(format!(
            "{:?} view over {storage:?} storage of '{}'",
            desc.format, texture.label
        )));
    }
    let (needed, format_ok) = match desc.kind {
        ViewKind::ShaderRead => (TextureUsage::SHADER_READ, !desc.format.is_depth()),
        ViewKind::RenderTarget => (TextureUsage::RENDER_TARGET, desc.format.is_color_renderable()),
        ViewKind::DepthTarget => (TextureUsage::DEPTH_TARGET, desc.format.is_depth()),
    };
    if !texture.usage.contains(needed) {
        return Err(GpuError::InvalidView(format!(
            "'{}' was not created with {needed:?}",
            texture.label
        )));
    }
    if !format_ok {
        return Err(GpuError::InvalidView(format!(
            "{:?} cannot be used as {:?}",
            desc.format, desc.kind
        )));
    }
    Ok(())
}

impl RenderDevice for HeadlessDevice {
    fn name(&self) -> &str {
        "headless"
    }

    fn create_buffer(&self, desc: &BufferDesc<'_>) -> Result<BufferId, GpuError> {
        let mut state = self.state.lock();
        state.check_injected(desc.label)?;
        if desc.contents.is_empty() {
            return Err(GpuError::allocation(desc.label, "empty buffer"));
        }
        let id = BufferId(state.next());
        state.buffers.insert(
            id,
            BufferRecord {
                label: desc.label.to_owned(),
                usage: desc.usage,
                contents: desc.contents.to_vec(),
            },
        );
        state.stats.buffers_created += 1;
        Ok(id)
    }

    fn destroy_buffer(&self, id: BufferId) {
        let mut state = self.state.lock();
        if state.buffers.remove(&id).is_none() {
            panic!("destroying unknown or already destroyed buffer {id:?}");
        }
        state.stats.buffers_destroyed += 1;
    }

    fn create_texture(
        &self,
        desc: &TextureDesc<'_>,
        data: Option<&[u8]>,
    ) -> Result<TextureId, GpuError> {
        let mut state = self.state.lock();
        state.check_injected(desc.label)?;
        validate_texture(desc, data)?;
        let id = TextureId(state.next());
        state.textures.insert(
            id,
            TextureRecord {
                label: desc.label.to_owned(),
                width: desc.width,
                height: desc.height,
                format: desc.format,
                mip_levels: desc.mip_levels,
                sample_count: desc.sample_count,
                usage: desc.usage,
                data: data.map(<[u8]>::to_vec),
            },
        );
        state.stats.textures_created += 1;
        Ok(id)
    }

    fn destroy_texture(&self, id: TextureId) {
        let mut state = self.state.lock();
        if state.textures.remove(&id).is_none() {
            panic!("destroying unknown or already destroyed texture {id:?}");
        }
        state.stats.textures_destroyed += 1;
    }

    fn create_view(&self, texture: TextureId, desc: &ViewDesc) -> Result<ViewId, GpuError> {
        let mut state = self.state.lock();
        let record = state
            .textures
            .get(&texture)
            .ok_or(GpuError::UnknownResource {
                kind: "texture",
                id: texture.0,
            })?;
        validate_view(record, desc)?;
        let label = format!("view of '{}'", record.label);
        state.check_injected(&label)?;
        if state.fail_views > 0 {
            state.fail_views -= 1;
            return Err(GpuError::allocation(&label, "injected failure"));
        }
        let id = ViewId(state.next());
        state.views.insert(id, ViewRecord { texture, desc: *desc });
        state.stats.views_created += 1;
        Ok(id)
    }

    fn destroy_view(&self, id: ViewId) {
        let mut state = self.state.lock();
        if state.views.remove(&id).is_none() {
            panic!("destroying unknown or already destroyed view {id:?}");
        }
        state.stats.views_destroyed += 1;
    }

    fn create_sampler(&self, desc: &SamplerDesc) -> Result<SamplerId, GpuError> {
        let mut state = self.state.lock();
        state.check_injected("sampler")?;
        if desc.lod_min > desc.lod_max {
            return Err(GpuError::allocation("sampler", "lod_min exceeds lod_max"));
        }
        let id = SamplerId(state.next());
        state.samplers.insert(id, *desc);
        state.stats.samplers_created += 1;
        Ok(id)
    }

    fn destroy_sampler(&self, id: SamplerId) {
        let mut state = self.state.lock();
        if state.samplers.remove(&id).is_none() {
            panic!("destroying unknown or already destroyed sampler {id:?}");
        }
        state.stats.samplers_destroyed += 1;
    }

    fn create_program(&self, desc: &ProgramDesc<'_>) -> Result<ProgramId, GpuError> {
        let mut state = self.state.lock();
        state.check_injected(desc.label)?;
        if desc.source.trim().is_empty() {
            return Err(GpuError::Program {
                label: desc.label.to_owned(),
                reason: "empty source".into(),
            });
        }
        if (desc.depth_test || desc.depth_write) && desc.depth_format.is_none() {
            return Err(GpuError::Program {
                label: desc.label.to_owned(),
                reason: "depth state without a depth format".into(),
            });
        }
        log::debug!("headless program '{}' with stages {:?}", desc.label, desc.stages());
        let id = ProgramId(state.next());
        state.programs.insert(id, desc.label.to_owned());
        state.stats.programs_created += 1;
        Ok(id)
    }

    fn destroy_program(&self, id: ProgramId) {
        let mut state = self.state.lock();
        if state.programs.remove(&id).is_none() {
            panic!("destroying unknown or already destroyed program {id:?}");
        }
    }

    fn supports_index_format(&self, format: IndexFormat) -> bool {
        format != IndexFormat::U8 || self.byte_indices
    }
}

/// Context that keeps the recorded command stream for inspection.
pub struct HeadlessContext {
    device: Arc<HeadlessDevice>,
    backbuffer: Backbuffer,
    pending: Vec<Command>,
    submitted: Vec<Vec<Command>>,
}

impl HeadlessContext {
    pub fn new(device: Arc<HeadlessDevice>, width: u32, height: u32) -> Result<Self, GpuError> {
        let backbuffer = Backbuffer::create(device.as_ref(), width, height)?;
        Ok(Self {
            device,
            backbuffer,
            pending: Vec::new(),
            submitted: Vec::new(),
        })
    }

    pub fn device(&self) -> &Arc<HeadlessDevice> {
        &self.device
    }

    /// Commands recorded since the last present.
    pub fn commands(&self) -> &[Command] {
        &self.pending
    }

    pub fn take_commands(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.pending)
    }

    /// Command streams of every presented frame, oldest first.
    pub fn frames(&self) -> &[Vec<Command>] {
        &self.submitted
    }

    pub fn draw_count(&self) -> usize {
        self.pending
            .iter()
            .filter(|c| matches!(c, Command::DrawIndexed { .. }))
            .count()
    }

    /// Reallocate the backbuffer; a no-op when the size is unchanged.
    pub fn resize_backbuffer(&mut self, width: u32, height: u32) -> Result<(), GpuError> {
        if (width.max(1), height.max(1)) == (self.backbuffer.width, self.backbuffer.height) {
            return Ok(());
        }
        let next = Backbuffer::create(self.device.as_ref(), width, height)?;
        self.backbuffer.destroy(self.device.as_ref());
        self.backbuffer = next;
        Ok(())
    }
}

impl RenderContext for HeadlessContext {
    fn record(&mut self, command: Command) {
        log::trace!("headless: {command:?}");
        self.pending.push(command);
    }

    fn backbuffer(&self) -> &Backbuffer {
        &self.backbuffer
    }

    fn present(&mut self) -> Result<(), GpuError> {
        let frame = std::mem::take(&mut self.pending);
        self.submitted.push(frame);
        Ok(())
    }
}

impl Drop for HeadlessContext {
    fn drop(&mut self) {
        self.backbuffer.destroy(self.device.as_ref());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DepthFormat, TextureFormat};

    fn depth_desc(format: TextureFormat, usage: TextureUsage) -> TextureDesc<'static> {
        TextureDesc {
            label: "depth",
            width: 4,
            height: 4,
            format,
            mip_levels: 1,
            sample_count: 1,
            usage,
        }
    }

    #[test]
    fn typed_depth_cannot_be_sampled() {
        let device = HeadlessDevice::new();
        let err = device
            .create_texture(
                &depth_desc(
                    TextureFormat::Depth32Float,
                    TextureUsage::DEPTH_TARGET | TextureUsage::SHADER_READ,
                ),
                None,
            )
            .unwrap_err();
        assert!(matches!(err, GpuError::AllocationFailed { .. }));
    }

    #[test]
    fn mip_chain_data_covers_every_level() {
        let device = HeadlessDevice::new();
        let mut desc = TextureDesc {
            label: "mipped",
            width: 4,
            height: 2,
            format: TextureFormat::Rgba8Unorm,
            mip_levels: 3,
            sample_count: 1,
            usage: TextureUsage::SHADER_READ | TextureUsage::COPY_DST,
        };
        // 4x2 + 2x1 + 1x1 texels.
        let data = vec![0u8; (8 + 2 + 1) * 4];
        let id = device.create_texture(&desc, Some(&data)).unwrap();
        assert_eq!(device.texture(id).unwrap().mip_levels, 3);
        assert!(device.create_texture(&desc, Some(&data[..32])).is_err());

        desc.mip_levels = 4;
        assert!(device.create_texture(&desc, None).is_err());
        desc.mip_levels = 0;
        assert!(device.create_texture(&desc, None).is_err());
        desc.mip_levels = 2;
        desc.sample_count = 4;
        assert!(device.create_texture(&desc, None).is_err());
        assert_eq!(device.live_textures(), 1);
    }

    #[test]
    fn typeless_depth_admits_two_views() {
        let device = HeadlessDevice::new();
        let depth = DepthFormat::D24UnormS8;
        let tex = device
            .create_texture(
                &depth_desc(
                    depth.storage_format(),
                    TextureUsage::DEPTH_TARGET | TextureUsage::SHADER_READ,
                ),
                None,
            )
            .unwrap();
        device
            .create_view(tex, &ViewDesc::depth_target(depth.target_format()))
            .unwrap();
        device
            .create_view(tex, &ViewDesc::shader_read(depth.shader_format()))
            .unwrap();
        let err = device
            .create_view(tex, &ViewDesc::shader_read(TextureFormat::R32Float))
            .unwrap_err();
        assert!(matches!(err, GpuError::InvalidView(_)));
        assert_eq!(device.live_views(), 2);
    }

    #[test]
    fn injected_failures_are_consumed() {
        let device = HeadlessDevice::new();
        device.fail_next_allocations(1);
        assert!(device.create_sampler(&SamplerDesc::default()).is_err());
        assert!(device.create_sampler(&SamplerDesc::default()).is_ok());
        assert_eq!(device.live_samplers(), 1);
    }

    #[test]
    #[should_panic(expected = "already destroyed")]
    fn double_destroy_panics() {
        let device = HeadlessDevice::new();
        let id = device.create_sampler(&SamplerDesc::default()).unwrap();
        device.destroy_sampler(id);
        device.destroy_sampler(id);
    }

    #[test]
    fn context_owns_backbuffer() {
        let device = Arc::new(HeadlessDevice::new());
        {
            let mut ctx = HeadlessContext::new(device.clone(), 8, 6).unwrap();
            assert_eq!(device.live_textures(), 2);
            ctx.bind_backbuffer();
            ctx.clear_color(ctx.backbuffer().color_view, [0.0; 4]);
            assert_eq!(ctx.commands().len(), 3);
            ctx.present().unwrap();
            assert!(ctx.commands().is_empty());
            assert_eq!(ctx.frames().len(), 1);

            ctx.resize_backbuffer(16, 12).unwrap();
            assert_eq!(ctx.backbuffer().width, 16);
            assert_eq!(device.live_textures(), 2);
        }
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.live_views(), 0);
    }

    #[test]
    fn program_depth_state_needs_a_depth_format() {
        use crate::device::{BindingKind, ProgramBinding};
        let device = HeadlessDevice::new();
        let bindings = [ProgramBinding::new(BindingKind::ConstantBuffer, 0)];
        let mut desc = ProgramDesc {
            label: "p",
            source: "fn vs_main() {}",
            vertex_entry: "vs_main",
            pixel_entry: None,
            geometry_entry: None,
            vertex_layout: asset::VertexLayout::Position,
            topology: crate::types::Topology::TriangleList,
            color_formats: &[],
            depth_format: None,
            depth_test: true,
            depth_write: true,
            sample_count: 1,
            bindings: &bindings,
        };
        assert!(matches!(device.create_program(&desc), Err(GpuError::Program { .. })));

        desc.depth_format = Some(DepthFormat::D32Float);
        let id = device.create_program(&desc).unwrap();
        assert_eq!(device.live_programs(), 1);
        device.destroy_program(id);
        assert_eq!(device.live_programs(), 0);
    }
}
