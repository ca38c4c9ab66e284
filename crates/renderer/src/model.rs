//! Models: named geometry buffers paired with named materials.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use asset::obj::{self, ObjData};
use asset::{AssetError, MaterialDesc};
use corelib::Aabb;
use thiserror::Error;

use crate::cache::{CacheError, ResourceCache, SharedSampler, SharedTexture};
use crate::device::RenderContext;
use crate::error::GpuError;
use crate::geometry::{RawGeometry, finalize_mesh_data};
use crate::material::Material;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("duplicate mesh '{0}'")]
    DuplicateMesh(String),
    #[error("duplicate material '{0}'")]
    DuplicateMaterial(String),
    #[error("mesh '{mesh}' uses undefined material '{material}'")]
    UndefinedMaterial { mesh: String, material: String },
}

/// One sub-mesh: its geometry and the material it was read with.
#[derive(Debug)]
pub struct Mesh {
    pub geometry: RawGeometry,
    pub material: Option<String>,
}

#[derive(Debug)]
pub struct Model {
    path: PathBuf,
    meshes: BTreeMap<String, Mesh>,
    materials: BTreeMap<String, Material>,
    /// Every map referenced by the materials, one handle per path.
    textures: BTreeMap<PathBuf, SharedTexture>,
    /// Used by meshes without a material.
    fallback: Option<Material>,
    bounds: Option<Aabb>,
}

impl Model {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            meshes: BTreeMap::new(),
            materials: BTreeMap::new(),
            textures: BTreeMap::new(),
            fallback: None,
            bounds: None,
        }
    }

    /// Parses `path` through the cache's source and uploads everything.
    pub fn load(cache: &ResourceCache, path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let data = obj::load_obj(cache.source().as_ref(), path)?;
        Self::from_obj(cache, &data)
    }

    /// Uploads already parsed geometry and materials.
    pub fn from_obj(cache: &ResourceCache, data: &ObjData) -> Result<Self, ModelError> {
        let mut model = Model::new(&data.path);
        for desc in &data.materials {
            model.insert_material(Material::new(cache, desc)?)?;
            for map in desc.texture_refs() {
                if !model.textures.contains_key(&map.path) {
                    let texture = cache.acquire_texture(&map.path)?;
                    model.textures.insert(map.path.clone(), texture);
                }
            }
        }
        for sub in &data.sub_meshes {
            let label = format!("{}:{}", data.path.display(), sub.name);
            let geometry = finalize_mesh_data(cache.device(), &label, &sub.mesh)?;
            if sub.material.is_none() && model.fallback.is_none() {
                model.fallback = Some(Material::new(cache, &fallback_desc())?);
            }
            model.insert_mesh(&sub.name, geometry, sub.material.clone())?;
        }
        model.bounds = data.bounds;

        log::info!(
            "Model {}: {} mesh(es), {} material(s)",
            data.path.display(),
            model.meshes.len(),
            model.materials.len()
        );
        Ok(model)
    }

    pub fn insert_material(&mut self, material: Material) -> Result<(), ModelError> {
        if self.materials.contains_key(material.name()) {
            return Err(ModelError::DuplicateMaterial(material.name().to_owned()));
        }
        self.materials.insert(material.name().to_owned(), material);
        Ok(())
    }

    /// Adds a mesh; `material`, when given, must already be inserted.
    pub fn insert_mesh(
        &mut self,
        name: &str,
        geometry: RawGeometry,
        material: Option<String>,
    ) -> Result<(), ModelError> {
        if self.meshes.contains_key(name) {
            return Err(ModelError::DuplicateMesh(name.to_owned()));
        }
        if let Some(material) = &material {
            if !self.materials.contains_key(material) {
                return Err(ModelError::UndefinedMaterial {
                    mesh: name.to_owned(),
                    material: material.clone(),
                });
            }
        }
        self.meshes.insert(name.to_owned(), Mesh { geometry, material });
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mesh(&self, name: &str) -> Option<&Mesh> {
        self.meshes.get(name)
    }

    /// Meshes in name order.
    pub fn meshes(&self) -> impl Iterator<Item = (&str, &Mesh)> {
        self.meshes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    pub fn material(&self, name: &str) -> Option<&Material> {
        self.materials.get(name)
    }

    pub fn materials(&self) -> impl Iterator<Item = &Material> {
        self.materials.values()
    }

    /// Cached texture loaded from `path` by one of the materials.
    pub fn texture(&self, path: impl AsRef<Path>) -> Option<&SharedTexture> {
        self.textures.get(path.as_ref())
    }

    /// Textures in path order.
    pub fn textures(&self) -> impl Iterator<Item = (&Path, &SharedTexture)> {
        self.textures.iter().map(|(k, v)| (k.as_path(), v))
    }

    pub fn bounds(&self) -> Option<Aabb> {
        self.bounds
    }

    pub fn triangle_count(&self) -> u32 {
        self.meshes.values().map(|m| m.geometry.index_count() / 3).sum()
    }

    /// The material `mesh` is drawn with, falling back to the default one
    /// for meshes read without `usemtl`.
    pub fn material_for(&self, mesh: &Mesh) -> Option<&Material> {
        mesh
            .material
            .as_deref()
            .and_then(|name| self.materials.get(name))
            .or(self.fallback.as_ref())
    }

    /// Draws every mesh with its material bound.
    pub fn draw(&self, ctx: &mut dyn RenderContext, sampler: &SharedSampler) {
        for mesh in self.meshes.values() {
            if let Some(material) = self.material_for(mesh) {
                material.bind(ctx, sampler);
            }
            mesh.geometry.draw(ctx);
        }
    }
}

fn fallback_desc() -> MaterialDesc {
    MaterialDesc {
        kd: [1.0, 1.0, 1.0],
        d: 1.0,
        illum: 1,
        ..MaterialDesc::new("<fallback>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessContext, HeadlessDevice};
    use crate::device::{Command, RenderDevice};
    use asset::texture::TextureData;
    use asset::{MemorySource, VertexLayout};
    use std::sync::Arc;

    const CUBE_OBJ: &str = "\
mtllib cube.mtl
v 0 0 0
v 1 0 0
v 0 1 0
v 1 1 1
vt 0 0
vt 1 1
g front
usemtl red
f 1/1 2/1 3/1
f 1/1 2/1 4/2
g back
usemtl textured
f 4/2 3/1 2/1
";

    const CUBE_MTL: &str = "\
newmtl red
Kd 1 0 0
d 1
newmtl textured
Kd 1 1 1
map_Kd maps/wood.png
";

    fn setup() -> (Arc<HeadlessDevice>, ResourceCache) {
        let headless = Arc::new(HeadlessDevice::new());
        let png = TextureData::checkerboard(4).to_png().unwrap();
        let source = MemorySource::new()
            .with("assets/cube.obj", CUBE_OBJ)
            .with("assets/cube.mtl", CUBE_MTL)
            .with("assets/maps/wood.png", png)
            .with("assets/plain.obj", "v 0 0 0\nv 1 0 0\nv 0 1 0\nf 1 2 3\n");
        let cache = ResourceCache::new(headless.clone(), Arc::new(source));
        (headless, cache)
    }

    #[test]
    fn loads_meshes_and_materials() {
        let (headless, cache) = setup();
        let model = Model::load(&cache, "assets/cube.obj").unwrap();
        assert_eq!(model.mesh_count(), 2);
        let names: Vec<_> = model.meshes().map(|(n, _)| n).collect();
        assert_eq!(names, ["back", "front"]);

        let front = model.mesh("front").unwrap();
        assert_eq!(front.material.as_deref(), Some("red"));
        assert_eq!(front.geometry.vertex_count(), 4);
        assert_eq!(front.geometry.layout(), VertexLayout::PositionTexcoord);
        let indices = headless.buffer(front.geometry.index_buffer()).unwrap().contents;
        assert_eq!(indices, vec![0, 1, 2, 0, 1, 3]);

        let textured = model.material("textured").unwrap();
        assert!(textured.diffuse_map().is_some());
        assert!(textured.ambient_map().is_none());
        assert_eq!(model.material("red").unwrap().constants().kd, [1.0, 0.0, 0.0]);
        assert_eq!(model.triangle_count(), 3);

        let wood = model.texture("assets/maps/wood.png").unwrap();
        assert_eq!(wood.texture(), textured.diffuse_map().unwrap().texture());
        assert_eq!(model.textures().count(), 1);
        assert!(model.texture("assets/maps/none.png").is_none());

        let bounds = model.bounds().unwrap();
        assert_eq!(bounds.min.z, -1.0);
    }

    #[test]
    fn dropping_model_releases_everything() {
        let (headless, cache) = setup();
        let model = Model::load(&cache, "assets/cube.obj").unwrap();
        assert_eq!(cache.len(), 1);
        drop(model);
        assert!(cache.is_empty());
        assert_eq!(headless.live_buffers(), 0);
        assert_eq!(headless.live_textures(), 0);
    }

    #[test]
    fn models_share_cached_textures() {
        let (headless, cache) = setup();
        let a = Model::load(&cache, "assets/cube.obj").unwrap();
        let b = Model::load(&cache, "assets/cube.obj").unwrap();
        assert_eq!(headless.stats().textures_created, 1);
        let key = crate::cache::ResourceKey::Texture("assets/maps/wood.png".into());
        // Each model holds the material's map and its own path entry.
        assert_eq!(cache.ref_count(&key), 4);
        drop(a);
        assert_eq!(cache.ref_count(&key), 2);
        drop(b);
        assert_eq!(cache.ref_count(&key), 0);
    }

    #[test]
    fn materialless_mesh_gets_fallback() {
        let (headless, cache) = setup();
        let model = Model::load(&cache, "assets/plain.obj").unwrap();
        let sampler = cache.default_sampler().unwrap();
        let mut ctx = HeadlessContext::new(headless, 4, 4).unwrap();
        model.draw(&mut ctx, &sampler);
        assert!(matches!(ctx.commands()[0], Command::BindConstantBuffer { slot: 1, .. }));
        assert_eq!(ctx.draw_count(), 1);

        let (_, mesh) = model.meshes().next().unwrap();
        let fallback = model.material_for(mesh).unwrap();
        assert_eq!(fallback.name(), "<fallback>");
        assert_eq!(fallback.constants().kd, [1.0; 3]);
    }

    #[test]
    fn missing_texture_fails_whole_load() {
        let headless = Arc::new(HeadlessDevice::new());
        let source = MemorySource::new()
            .with("m.obj", "mtllib m.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nusemtl a\nf 1 2 3\n")
            .with("m.mtl", "newmtl a\nmap_Kd gone.png\n");
        let cache = ResourceCache::new(headless.clone(), Arc::new(source));
        let err = Model::load(&cache, "m.obj").unwrap_err();
        assert!(matches!(
            err,
            ModelError::Cache(CacheError::Asset(AssetError::FileNotFound(_)))
        ));
        assert_eq!(headless.live_buffers(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn insert_checks_names() {
        let (headless, cache) = setup();
        let device: Arc<dyn RenderDevice> = headless.clone();
        let data = obj::load_obj(cache.source().as_ref(), Path::new("assets/plain.obj")).unwrap();
        let mesh = &data.sub_meshes[0].mesh;
        let mut model = Model::new("manual");
        model
            .insert_mesh("a", finalize_mesh_data(&device, "a", mesh).unwrap(), None)
            .unwrap();
        let dup = model.insert_mesh("a", finalize_mesh_data(&device, "a", mesh).unwrap(), None);
        assert!(matches!(dup, Err(ModelError::DuplicateMesh(name)) if name == "a"));
        let undefined = model.insert_mesh(
            "b",
            finalize_mesh_data(&device, "b", mesh).unwrap(),
            Some("nope".into()),
        );
        assert!(matches!(undefined, Err(ModelError::UndefinedMaterial { .. })));
        drop(model);
        assert_eq!(headless.live_buffers(), 0);
    }
}
