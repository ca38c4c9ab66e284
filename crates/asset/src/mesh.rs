//! CPU-side mesh representation used by loaders.
//!
//! A mesh stores one of four fixed vertex layouts, picked from which attribute
//! pools a file declares. [`SubMeshBuilder`] deduplicates face references so
//! every distinct (position, texcoord, normal) triple becomes exactly one
//! vertex.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use corelib::{Aabb, Vec3, convention};

/// Position-only vertex.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PositionVertex {
    pub position: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PositionNormalVertex {
    pub position: [f32; 3],
    pub normal: [f32; 3],
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PositionTexcoordVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
}

/// Vertex with position/uv/normal. Values are in engine space.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct PositionTexcoordNormalVertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [f32; 3],
}

/// The closed set of interleaved vertex layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VertexLayout {
    Position,
    PositionNormal,
    PositionTexcoord,
    PositionTexcoordNormal,
}

/// Meaning of one vertex attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Semantic {
    Position,
    Texcoord,
    Normal,
}

impl Semantic {
    /// Shader input location, identical across layouts.
    pub const fn location(self) -> u32 {
        match self {
            Semantic::Position => 0,
            Semantic::Texcoord => 1,
            Semantic::Normal => 2,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AttributeFormat {
    Float32x2,
    Float32x3,
}

impl AttributeFormat {
    pub const fn size(self) -> u32 {
        match self {
            AttributeFormat::Float32x2 => 8,
            AttributeFormat::Float32x3 => 12,
        }
    }
}

/// One element of an input layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub semantic: Semantic,
    pub format: AttributeFormat,
    pub offset: u32,
}

const fn attr(semantic: Semantic, format: AttributeFormat, offset: u32) -> VertexAttribute {
    VertexAttribute {
        semantic,
        format,
        offset,
    }
}

const P_ATTRS: [VertexAttribute; 1] = [attr(Semantic::Position, AttributeFormat::Float32x3, 0)];
const PN_ATTRS: [VertexAttribute; 2] = [
    attr(Semantic::Position, AttributeFormat::Float32x3, 0),
    attr(Semantic::Normal, AttributeFormat::Float32x3, 12),
];
const PT_ATTRS: [VertexAttribute; 2] = [
    attr(Semantic::Position, AttributeFormat::Float32x3, 0),
    attr(Semantic::Texcoord, AttributeFormat::Float32x2, 12),
];
const PTN_ATTRS: [VertexAttribute; 3] = [
    attr(Semantic::Position, AttributeFormat::Float32x3, 0),
    attr(Semantic::Texcoord, AttributeFormat::Float32x2, 12),
    attr(Semantic::Normal, AttributeFormat::Float32x3, 20),
];

impl VertexLayout {
    /// Pick the layout from which attribute pools are non-empty.
    pub fn for_pools(has_texcoords: bool, has_normals: bool) -> Self {
        match (has_texcoords, has_normals) {
            (false, false) => VertexLayout::Position,
            (false, true) => VertexLayout::PositionNormal,
            (true, false) => VertexLayout::PositionTexcoord,
            (true, true) => VertexLayout::PositionTexcoordNormal,
        }
    }

    pub fn has_texcoord(self) -> bool {
        matches!(
            self,
            VertexLayout::PositionTexcoord | VertexLayout::PositionTexcoordNormal
        )
    }

    pub fn has_normal(self) -> bool {
        matches!(
            self,
            VertexLayout::PositionNormal | VertexLayout::PositionTexcoordNormal
        )
    }

    /// Size of one interleaved vertex in bytes.
    pub fn stride(self) -> u32 {
        match self {
            VertexLayout::Position => std::mem::size_of::<PositionVertex>() as u32,
            VertexLayout::PositionNormal => std::mem::size_of::<PositionNormalVertex>() as u32,
            VertexLayout::PositionTexcoord => std::mem::size_of::<PositionTexcoordVertex>() as u32,
            VertexLayout::PositionTexcoordNormal => {
                std::mem::size_of::<PositionTexcoordNormalVertex>() as u32
            }
        }
    }

    pub fn attributes(self) -> &'static [VertexAttribute] {
        match self {
            VertexLayout::Position => &P_ATTRS,
            VertexLayout::PositionNormal => &PN_ATTRS,
            VertexLayout::PositionTexcoord => &PT_ATTRS,
            VertexLayout::PositionTexcoordNormal => &PTN_ATTRS,
        }
    }
}

/// Implemented by the four interleaved vertex structs.
pub trait Vertex: Pod {
    const LAYOUT: VertexLayout;
}

impl Vertex for PositionVertex {
    const LAYOUT: VertexLayout = VertexLayout::Position;
}
impl Vertex for PositionNormalVertex {
    const LAYOUT: VertexLayout = VertexLayout::PositionNormal;
}
impl Vertex for PositionTexcoordVertex {
    const LAYOUT: VertexLayout = VertexLayout::PositionTexcoord;
}
impl Vertex for PositionTexcoordNormalVertex {
    const LAYOUT: VertexLayout = VertexLayout::PositionTexcoordNormal;
}

/// Vertex storage tagged by layout.
#[derive(Clone, Debug, PartialEq)]
pub enum VertexData {
    Position(Vec<PositionVertex>),
    PositionNormal(Vec<PositionNormalVertex>),
    PositionTexcoord(Vec<PositionTexcoordVertex>),
    PositionTexcoordNormal(Vec<PositionTexcoordNormalVertex>),
}

impl VertexData {
    pub fn empty(layout: VertexLayout) -> Self {
        match layout {
            VertexLayout::Position => VertexData::Position(Vec::new()),
            VertexLayout::PositionNormal => VertexData::PositionNormal(Vec::new()),
            VertexLayout::PositionTexcoord => VertexData::PositionTexcoord(Vec::new()),
            VertexLayout::PositionTexcoordNormal => VertexData::PositionTexcoordNormal(Vec::new()),
        }
    }

    pub fn layout(&self) -> VertexLayout {
        match self {
            VertexData::Position(_) => VertexLayout::Position,
            VertexData::PositionNormal(_) => VertexLayout::PositionNormal,
            VertexData::PositionTexcoord(_) => VertexLayout::PositionTexcoord,
            VertexData::PositionTexcoordNormal(_) => VertexLayout::PositionTexcoordNormal,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VertexData::Position(v) => v.len(),
            VertexData::PositionNormal(v) => v.len(),
            VertexData::PositionTexcoord(v) => v.len(),
            VertexData::PositionTexcoordNormal(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tightly packed bytes ready for upload.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            VertexData::Position(v) => bytemuck::cast_slice(v),
            VertexData::PositionNormal(v) => bytemuck::cast_slice(v),
            VertexData::PositionTexcoord(v) => bytemuck::cast_slice(v),
            VertexData::PositionTexcoordNormal(v) => bytemuck::cast_slice(v),
        }
    }

    /// Position of vertex `i`, whatever the layout.
    pub fn position(&self, i: usize) -> Option<[f32; 3]> {
        match self {
            VertexData::Position(v) => v.get(i).map(|v| v.position),
            VertexData::PositionNormal(v) => v.get(i).map(|v| v.position),
            VertexData::PositionTexcoord(v) => v.get(i).map(|v| v.position),
            VertexData::PositionTexcoordNormal(v) => v.get(i).map(|v| v.position),
        }
    }
}

/// Indexed triangle mesh with tightly-packed vertices.
#[derive(Clone, Debug, PartialEq)]
pub struct MeshData {
    pub vertices: VertexData,
    pub indices: Vec<u32>,
}

impl MeshData {
    pub fn new(vertices: VertexData, indices: Vec<u32>) -> Self {
        Self { vertices, indices }
    }

    /// Returns `true` if both vertex and index buffers are non-empty.
    pub fn is_valid(&self) -> bool {
        !self.vertices.is_empty() && !self.indices.is_empty()
    }

    pub fn layout(&self) -> VertexLayout {
        self.vertices.layout()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }
}

/// Deduplication key: 0-based pool indices of one face corner.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AttributeCombo {
    pub position: u32,
    pub texcoord: Option<u32>,
    pub normal: Option<u32>,
}

/// Raw attributes in file order, already converted to engine conventions.
#[derive(Clone, Debug, Default)]
pub struct AttributePools {
    pub positions: Vec<[f32; 3]>,
    pub texcoords: Vec<[f32; 2]>,
    pub normals: Vec<[f32; 3]>,
    bounds: Option<Aabb>,
}

impl AttributePools {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a right-handed file position (Z is negated).
    pub fn push_position(&mut self, p: [f32; 3]) {
        let p = convention::position_from_rh(p);
        let v = Vec3::from_array(p);
        match self.bounds.as_mut() {
            Some(b) => b.include(v),
            None => self.bounds = Some(Aabb::from_point(v)),
        }
        self.positions.push(p);
    }

    /// Store a bottom-left-origin texcoord (V is flipped).
    pub fn push_texcoord(&mut self, uv: [f32; 2]) {
        self.texcoords.push(convention::texcoord_from_bottom_left(uv));
    }

    /// Store a right-handed file normal (Z is negated).
    pub fn push_normal(&mut self, n: [f32; 3]) {
        self.normals.push(convention::normal_from_rh(n));
    }

    pub fn layout(&self) -> VertexLayout {
        VertexLayout::for_pools(!self.texcoords.is_empty(), !self.normals.is_empty())
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    fn position(&self, i: u32) -> [f32; 3] {
        self.positions.get(i as usize).copied().unwrap_or_default()
    }

    fn texcoord(&self, i: Option<u32>) -> [f32; 2] {
        i.and_then(|i| self.texcoords.get(i as usize).copied())
            .unwrap_or([0.0, 0.0])
    }

    fn normal(&self, i: Option<u32>) -> [f32; 3] {
        i.and_then(|i| self.normals.get(i as usize).copied())
            .unwrap_or([0.0, 0.0, 1.0])
    }
}

/// Builds one sub-mesh, assigning output indices to distinct combos in
/// first-seen order.
#[derive(Debug)]
pub struct SubMeshBuilder {
    combos: HashMap<AttributeCombo, u32>,
    vertices: VertexData,
    indices: Vec<u32>,
}

impl SubMeshBuilder {
    pub fn new(layout: VertexLayout) -> Self {
        Self {
            combos: HashMap::new(),
            vertices: VertexData::empty(layout),
            indices: Vec::new(),
        }
    }

    pub fn layout(&self) -> VertexLayout {
        self.vertices.layout()
    }

    /// Append one face corner and return its output index.
    ///
    /// Combo indices must already be validated against `pools`.
    pub fn add(&mut self, combo: AttributeCombo, pools: &AttributePools) -> u32 {
        if let Some(&index) = self.combos.get(&combo) {
            self.indices.push(index);
            return index;
        }

        let index = self.vertices.len() as u32;
        let position = pools.position(combo.position);
        match &mut self.vertices {
            VertexData::Position(v) => v.push(PositionVertex { position }),
            VertexData::PositionNormal(v) => v.push(PositionNormalVertex {
                position,
                normal: pools.normal(combo.normal),
            }),
            VertexData::PositionTexcoord(v) => v.push(PositionTexcoordVertex {
                position,
                uv: pools.texcoord(combo.texcoord),
            }),
            VertexData::PositionTexcoordNormal(v) => v.push(PositionTexcoordNormalVertex {
                position,
                uv: pools.texcoord(combo.texcoord),
                normal: pools.normal(combo.normal),
            }),
        }
        self.combos.insert(combo, index);
        self.indices.push(index);
        index
    }

    pub fn unique_count(&self) -> usize {
        self.combos.len()
    }

    pub fn finish(self) -> MeshData {
        MeshData::new(self.vertices, self.indices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn combo(p: u32, t: Option<u32>, n: Option<u32>) -> AttributeCombo {
        AttributeCombo {
            position: p,
            texcoord: t,
            normal: n,
        }
    }

    #[test]
    fn mesh_data_validity() {
        let data = MeshData::new(VertexData::Position(vec![PositionVertex::default()]), vec![0]);
        assert!(data.is_valid());
        let empty = MeshData::new(VertexData::empty(VertexLayout::Position), vec![]);
        assert!(!empty.is_valid());
    }

    #[test]
    fn strides_match_attribute_offsets() {
        for layout in [
            VertexLayout::Position,
            VertexLayout::PositionNormal,
            VertexLayout::PositionTexcoord,
            VertexLayout::PositionTexcoordNormal,
        ] {
            let last = layout.attributes().last().unwrap();
            assert_eq!(last.offset + last.format.size(), layout.stride());
        }
        assert_eq!(VertexLayout::PositionTexcoordNormal.stride(), 32);
    }

    #[test]
    fn layout_follows_pool_composition() {
        assert_eq!(VertexLayout::for_pools(false, false), VertexLayout::Position);
        assert_eq!(VertexLayout::for_pools(false, true), VertexLayout::PositionNormal);
        assert_eq!(VertexLayout::for_pools(true, false), VertexLayout::PositionTexcoord);
        assert_eq!(
            VertexLayout::for_pools(true, true),
            VertexLayout::PositionTexcoordNormal
        );
    }

    #[test]
    fn pools_apply_engine_conventions() {
        let mut pools = AttributePools::new();
        pools.push_position([1.0, 2.0, 3.0]);
        pools.push_texcoord([0.25, 0.1]);
        pools.push_normal([0.0, 0.0, 1.0]);
        assert_eq!(pools.positions[0], [1.0, 2.0, -3.0]);
        assert_eq!(pools.texcoords[0], [0.25, 0.9]);
        assert_eq!(pools.normals[0], [0.0, 0.0, -1.0]);
        let b = pools.bounds().unwrap();
        assert_eq!(b.min, Vec3::new(1.0, 2.0, -3.0));
    }

    #[test]
    fn shared_combos_map_to_one_vertex() {
        let mut pools = AttributePools::new();
        for p in [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [1.0, 1.0, 0.0]] {
            pools.push_position(p);
        }
        pools.push_texcoord([0.0, 0.0]);
        pools.push_texcoord([1.0, 1.0]);

        let mut b = SubMeshBuilder::new(VertexLayout::PositionTexcoord);
        for c in [
            combo(0, Some(0), None),
            combo(1, Some(0), None),
            combo(2, Some(0), None),
            combo(0, Some(0), None),
            combo(1, Some(0), None),
            combo(3, Some(1), None),
        ] {
            b.add(c, &pools);
        }
        assert_eq!(b.unique_count(), 4);
        let mesh = b.finish();
        assert_eq!(mesh.vertices.len(), 4);
        assert_eq!(mesh.indices, vec![0, 1, 2, 0, 1, 3]);
        match &mesh.vertices {
            VertexData::PositionTexcoord(v) => {
                assert_eq!(v[3].position, [1.0, 1.0, 0.0]);
                assert_eq!(v[3].uv, [1.0, 0.0]);
            }
            other => panic!("unexpected layout {:?}", other.layout()),
        }
    }

    #[test]
    fn same_position_with_different_normals_is_two_vertices() {
        let mut pools = AttributePools::new();
        pools.push_position([0.0, 0.0, 0.0]);
        pools.push_normal([0.0, 1.0, 0.0]);
        pools.push_normal([1.0, 0.0, 0.0]);
        let mut b = SubMeshBuilder::new(VertexLayout::PositionNormal);
        assert_eq!(b.add(combo(0, None, Some(0)), &pools), 0);
        assert_eq!(b.add(combo(0, None, Some(1)), &pools), 1);
        assert_eq!(b.add(combo(0, None, Some(0)), &pools), 0);
        assert_eq!(b.finish().vertices.len(), 2);
    }
}
