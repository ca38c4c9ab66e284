//! Immutable indexed vertex/index buffers.

use std::marker::PhantomData;
use std::sync::Arc;

use asset::mesh::Vertex;
use asset::{MeshData, VertexLayout};

use crate::device::{RenderContext, RenderDevice};
use crate::error::GpuError;
use crate::types::{BufferDesc, BufferId, BufferUsage, IndexFormat, Topology};

/// Accumulates vertices of one layout plus indices, then uploads them once.
#[derive(Clone, Debug)]
pub struct GeometryBuilder<V: Vertex> {
    label: String,
    vertices: Vec<V>,
    indices: Vec<u32>,
    topology: Topology,
    index_format: Option<IndexFormat>,
}

impl<V: Vertex> GeometryBuilder<V> {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            vertices: Vec::new(),
            indices: Vec::new(),
            topology: Topology::TriangleList,
            index_format: None,
        }
    }

    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Force an index width instead of picking the narrowest.
    pub fn with_index_format(mut self, format: IndexFormat) -> Self {
        self.index_format = Some(format);
        self
    }

    /// Appends a vertex and returns its index.
    pub fn add_vertex(&mut self, vertex: V) -> u32 {
        self.vertices.push(vertex);
        (self.vertices.len() - 1) as u32
    }

    pub fn add_vertices(&mut self, vertices: &[V]) {
        self.vertices.extend_from_slice(vertices);
    }

    pub fn add_index(&mut self, index: u32) {
        self.indices.push(index);
    }

    pub fn add_indices(&mut self, indices: &[u32]) {
        self.indices.extend_from_slice(indices);
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn index_count(&self) -> usize {
        self.indices.len()
    }

    /// Uploads the accumulated data.
    ///
    /// # Panics
    ///
    /// If no vertices or no indices were added.
    pub fn finalize(self, device: &Arc<dyn RenderDevice>) -> Result<GeometryBuffer<V>, GpuError> {
        let buffer = upload(
            device,
            &self.label,
            V::LAYOUT,
            bytemuck::cast_slice(&self.vertices),
            self.vertices.len(),
            &self.indices,
            self.topology,
            self.index_format,
        )?;
        Ok(GeometryBuffer {
            raw: buffer,
            _vertex: PhantomData,
        })
    }
}

/// Layout-erased geometry, as produced by the model loader.
pub struct RawGeometry {
    device: Arc<dyn RenderDevice>,
    label: String,
    vertex_buffer: BufferId,
    index_buffer: BufferId,
    vertex_count: u32,
    index_count: u32,
    index_format: IndexFormat,
    layout: VertexLayout,
    topology: Topology,
}

/// Geometry whose vertex type is known statically.
pub struct GeometryBuffer<V: Vertex> {
    raw: RawGeometry,
    _vertex: PhantomData<V>,
}

impl<V: Vertex> GeometryBuffer<V> {
    pub fn draw(&self, ctx: &mut dyn RenderContext) {
        self.raw.draw(ctx);
    }

    pub fn into_raw(self) -> RawGeometry {
        self.raw
    }
}

impl<V: Vertex> std::ops::Deref for GeometryBuffer<V> {
    type Target = RawGeometry;

    fn deref(&self) -> &RawGeometry {
        &self.raw
    }
}

/// Builds geometry from loader output of any vertex layout.
///
/// # Panics
///
/// If `mesh` has no vertices or no indices.
pub fn finalize_mesh_data(
    device: &Arc<dyn RenderDevice>,
    label: &str,
    mesh: &MeshData,
) -> Result<RawGeometry, GpuError> {
    upload(
        device,
        label,
        mesh.layout(),
        mesh.vertices.as_bytes(),
        mesh.vertices.len(),
        &mesh.indices,
        Topology::TriangleList,
        None,
    )
}

/// Picks the narrowest width for `indices` that `device` accepts, starting
/// from `requested` when given.
pub fn select_index_format(
    device: &dyn RenderDevice,
    indices: &[u32],
    requested: Option<IndexFormat>,
) -> IndexFormat {
    let max = indices.iter().copied().max().unwrap_or(0);
    let mut format = match requested {
        Some(f) if f.fits(max) => f,
        Some(f) => {
            log::warn!("index format {f:?} cannot hold index {max}, widening");
            IndexFormat::narrowest_for(max)
        }
        None => IndexFormat::narrowest_for(max),
    };
    while !device.supports_index_format(format) {
        match format.wider() {
            Some(next) => format = next,
            None => break,
        }
    }
    format
}

#[allow(clippy::too_many_arguments)]
fn upload(
    device: &Arc<dyn RenderDevice>,
    label: &str,
    layout: VertexLayout,
    vertex_bytes: &[u8],
    vertex_count: usize,
    indices: &[u32],
    topology: Topology,
    requested: Option<IndexFormat>,
) -> Result<RawGeometry, GpuError> {
    assert!(vertex_count > 0, "geometry '{label}' has no vertices");
    assert!(!indices.is_empty(), "geometry '{label}' has no indices");

    let index_format = select_index_format(device.as_ref(), indices, requested);
    let vertex_buffer = device.create_buffer(&BufferDesc {
        label,
        usage: BufferUsage::VERTEX,
        contents: vertex_bytes,
    })?;
    let index_bytes = index_format.pack(indices);
    let index_buffer = match device.create_buffer(&BufferDesc {
        label,
        usage: BufferUsage::INDEX,
        contents: &index_bytes,
    }) {
        Ok(id) => id,
        Err(err) => {
            device.destroy_buffer(vertex_buffer);
            return Err(err);
        }
    };

    log::debug!(
        "geometry '{label}': {vertex_count} vertices, {} indices as {index_format:?}",
        indices.len()
    );
    Ok(RawGeometry {
        device: device.clone(),
        label: label.to_owned(),
        vertex_buffer,
        index_buffer,
        vertex_count: vertex_count as u32,
        index_count: indices.len() as u32,
        index_format,
        layout,
        topology,
    })
}

impl RawGeometry {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    pub fn index_format(&self) -> IndexFormat {
        self.index_format
    }

    pub fn layout(&self) -> VertexLayout {
        self.layout
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn vertex_buffer(&self) -> BufferId {
        self.vertex_buffer
    }

    pub fn index_buffer(&self) -> BufferId {
        self.index_buffer
    }

    /// Binds both buffers and the topology, then draws every index.
    pub fn draw(&self, ctx: &mut dyn RenderContext) {
        ctx.set_vertex_buffer(self.vertex_buffer, self.layout);
        ctx.set_index_buffer(self.index_buffer, self.index_format);
        ctx.set_topology(self.topology);
        ctx.draw_indexed(self.index_count);
    }
}

impl Drop for RawGeometry {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.index_buffer);
        self.device.destroy_buffer(self.vertex_buffer);
    }
}

impl std::fmt::Debug for RawGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RawGeometry")
            .field("label", &self.label)
            .field("vertex_count", &self.vertex_count)
            .field("index_count", &self.index_count)
            .field("index_format", &self.index_format)
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessContext, HeadlessDevice};
    use crate::device::Command;
    use asset::VertexData;
    use asset::mesh::{PositionTexcoordVertex, PositionVertex};

    fn device() -> (Arc<HeadlessDevice>, Arc<dyn RenderDevice>) {
        let headless = Arc::new(HeadlessDevice::new());
        let dyn_device: Arc<dyn RenderDevice> = headless.clone();
        (headless, dyn_device)
    }

    fn triangle() -> GeometryBuilder<PositionVertex> {
        let mut builder = GeometryBuilder::new("tri");
        builder.add_vertices(&[
            PositionVertex { position: [0.0, 0.0, 0.0] },
            PositionVertex { position: [1.0, 0.0, 0.0] },
            PositionVertex { position: [0.0, 1.0, 0.0] },
        ]);
        builder.add_indices(&[0, 1, 2]);
        builder
    }

    #[test]
    fn uploads_exact_sizes_with_narrowest_indices() {
        let (headless, device) = device();
        let geo = triangle().finalize(&device).unwrap();
        assert_eq!(geo.vertex_count(), 3);
        assert_eq!(geo.index_count(), 3);
        assert_eq!(geo.index_format(), IndexFormat::U8);
        let vb = headless.buffer(geo.vertex_buffer()).unwrap();
        assert_eq!(vb.contents.len(), 3 * 12);
        assert_eq!(headless.buffer(geo.index_buffer()).unwrap().contents, vec![0, 1, 2]);
        drop(geo);
        assert_eq!(headless.live_buffers(), 0);
    }

    #[test]
    fn widens_when_device_lacks_byte_indices() {
        let headless = Arc::new(HeadlessDevice::without_byte_indices());
        let device: Arc<dyn RenderDevice> = headless.clone();
        let geo = triangle().finalize(&device).unwrap();
        assert_eq!(geo.index_format(), IndexFormat::U16);
        assert_eq!(headless.buffer(geo.index_buffer()).unwrap().contents.len(), 6);
    }

    #[test]
    fn index_width_follows_max_index() {
        let (_, device) = device();
        let dev = device.as_ref();
        assert_eq!(select_index_format(dev, &[0, 255], None), IndexFormat::U8);
        assert_eq!(select_index_format(dev, &[0, 256], None), IndexFormat::U16);
        assert_eq!(select_index_format(dev, &[70_000], None), IndexFormat::U32);
        assert_eq!(select_index_format(dev, &[1], Some(IndexFormat::U32)), IndexFormat::U32);
        assert_eq!(select_index_format(dev, &[300], Some(IndexFormat::U8)), IndexFormat::U16);
    }

    #[test]
    #[should_panic(expected = "no vertices")]
    fn empty_vertices_panic() {
        let (_, device) = device();
        let mut builder = GeometryBuilder::<PositionVertex>::new("empty");
        builder.add_index(0);
        let _ = builder.finalize(&device);
    }

    #[test]
    #[should_panic(expected = "no indices")]
    fn empty_indices_panic() {
        let (_, device) = device();
        let mut builder = GeometryBuilder::<PositionVertex>::new("empty");
        builder.add_vertex(PositionVertex::default());
        let _ = builder.finalize(&device);
    }

    #[test]
    fn failed_index_upload_releases_vertices() {
        let (headless, device) = device();
        let mut builder = GeometryBuilder::<PositionTexcoordVertex>::new("quad");
        builder.add_vertices(&[PositionTexcoordVertex::default(); 4]);
        builder.add_indices(&[0, 1, 2, 0, 2, 3]);
        // Let the vertex buffer through, fail the index buffer.
        headless.fail_allocations_after(1, 1);
        assert!(builder.finalize(&device).is_err());
        assert_eq!(headless.live_buffers(), 0);
    }

    #[test]
    fn draw_binds_then_draws() {
        let (headless, device) = device();
        let geo = triangle().with_topology(Topology::TriangleStrip).finalize(&device).unwrap();
        let mut ctx = HeadlessContext::new(headless, 4, 4).unwrap();
        geo.draw(&mut ctx);
        assert_eq!(
            ctx.commands(),
            &[
                Command::SetVertexBuffer {
                    buffer: geo.vertex_buffer(),
                    layout: VertexLayout::Position
                },
                Command::SetIndexBuffer {
                    buffer: geo.index_buffer(),
                    format: IndexFormat::U8
                },
                Command::SetTopology(Topology::TriangleStrip),
                Command::DrawIndexed { count: 3 },
            ]
        );
    }

    #[test]
    fn mesh_data_of_any_layout() {
        let (_, device) = device();
        let mesh = MeshData::new(
            VertexData::PositionTexcoord(vec![PositionTexcoordVertex::default(); 3]),
            vec![0, 1, 2],
        );
        let geo = finalize_mesh_data(&device, "mesh", &mesh).unwrap();
        assert_eq!(geo.layout(), VertexLayout::PositionTexcoord);
        assert_eq!(geo.vertex_count(), 3);
    }
}
