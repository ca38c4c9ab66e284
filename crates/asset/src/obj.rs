//! OBJ geometry parser supporting positions, normals and texture coordinates,
//! groups and material libraries.
//!
//! Faces must be triangles. All faces of one sub-mesh are expected to be
//! contiguous: any other directive closes the sub-mesh that is being built,
//! and the next face starts a fresh one. The vertex layout of a sub-mesh is
//! fixed by which attribute pools are non-empty when its first face is read.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use corelib::Aabb;

use crate::{
    error::{AssetError, AssetResult},
    lexer::{Directive, Lexer},
    mesh::{AttributeCombo, AttributePools, MeshData, SubMeshBuilder, VertexLayout},
    mtl::{self, MaterialDesc},
    source::{FsSource, MemorySource, SourceProvider, sibling_path},
};

/// Name used for faces that appear before any `g` directive.
pub const DEFAULT_SUB_MESH: &str = "default";

/// One contiguous run of faces.
#[derive(Clone, Debug, PartialEq)]
pub struct SubMesh {
    pub name: String,
    /// Material active when the faces were read, if any.
    pub material: Option<String>,
    pub mesh: MeshData,
}

/// Everything read from one OBJ file and the libraries it references.
#[derive(Clone, Debug)]
pub struct ObjData {
    pub path: PathBuf,
    pub sub_meshes: Vec<SubMesh>,
    pub materials: Vec<MaterialDesc>,
    pub bounds: Option<Aabb>,
}

impl ObjData {
    pub fn sub_mesh(&self, name: &str) -> Option<&SubMesh> {
        self.sub_meshes.iter().find(|s| s.name == name)
    }

    pub fn material(&self, name: &str) -> Option<&MaterialDesc> {
        self.materials.iter().find(|m| m.name == name)
    }
}

/// Load an OBJ file (and its material libraries) from the filesystem.
pub fn load_obj_from_path(path: impl AsRef<Path>) -> AssetResult<ObjData> {
    load_obj(&FsSource, path.as_ref())
}

/// Load an OBJ file through `source`; `mtllib` paths resolve next to `path`.
pub fn load_obj(source: &dyn SourceProvider, path: &Path) -> AssetResult<ObjData> {
    let text = source.read_to_string(path)?;
    let data = ObjParser::new(source, path).run(&text)?;
    log::info!(
        "Loaded {}: {} sub-mesh(es), {} material(s)",
        path.display(),
        data.sub_meshes.len(),
        data.materials.len()
    );
    Ok(data)
}

/// Convenience helper to parse an OBJ string literal without material files.
pub fn load_obj_from_str(contents: &str) -> AssetResult<ObjData> {
    let empty = MemorySource::new();
    ObjParser::new(&empty, Path::new("<memory>")).run(contents)
}

struct ObjParser<'s> {
    source: &'s dyn SourceProvider,
    path: &'s Path,
    pools: AttributePools,
    libraries: HashSet<PathBuf>,
    materials: Vec<MaterialDesc>,
    group: Option<String>,
    active_material: Option<String>,
    building: Option<SubMeshBuilder>,
    sub_meshes: Vec<SubMesh>,
}

impl<'s> ObjParser<'s> {
    fn new(source: &'s dyn SourceProvider, path: &'s Path) -> Self {
        Self {
            source,
            path,
            pools: AttributePools::new(),
            libraries: HashSet::new(),
            materials: Vec::new(),
            group: None,
            active_material: None,
            building: None,
            sub_meshes: Vec::new(),
        }
    }

    fn run(mut self, text: &str) -> AssetResult<ObjData> {
        for mut d in Lexer::new(self.path, text) {
            if d.keyword != "f" {
                self.close_sub_mesh()?;
            }

            match d.keyword {
                "v" => {
                    let x = d.next_f32("x coordinate")?;
                    let y = d.next_f32("y coordinate")?;
                    let z = d.next_f32("z coordinate")?;
                    self.pools.push_position([x, y, z]);
                }
                "vt" => {
                    let u = d.next_f32("u coordinate")?;
                    let v = d.opt_f32("v coordinate")?.unwrap_or(0.0);
                    d.opt_f32("w coordinate")?;
                    self.pools.push_texcoord([u, v]);
                }
                "vn" => {
                    let n = d.next_vec3("normal component")?;
                    self.pools.push_normal(n);
                }
                "f" => self.face(&d)?,
                "g" => {
                    self.group = d.remaining().first().map(|s| s.to_string());
                }
                "mtllib" => self.material_libraries(&d)?,
                "usemtl" => self.use_material(&mut d)?,
                other => log::trace!("{}:{}: skipping '{}'", self.path.display(), d.line, other),
            }
        }
        self.close_sub_mesh()?;

        if self.sub_meshes.is_empty() {
            return Err(AssetError::NoGeometry(self.path.to_path_buf()));
        }

        Ok(ObjData {
            path: self.path.to_path_buf(),
            bounds: self.pools.bounds(),
            sub_meshes: self.sub_meshes,
            materials: self.materials,
        })
    }

    fn face(&mut self, d: &Directive<'_>) -> AssetResult<()> {
        let layout = match &self.building {
            Some(b) => b.layout(),
            None => self.pools.layout(),
        };

        let refs = d.remaining();
        if refs.len() != 3 {
            return Err(d.error(format!(
                "faces must be triangles, found {} vertices",
                refs.len()
            )));
        }

        let mut corners = [AttributeCombo {
            position: 0,
            texcoord: None,
            normal: None,
        }; 3];
        for (corner, token) in corners.iter_mut().zip(refs) {
            *corner = parse_face_vertex(token, layout, &self.pools, d)?;
        }

        let builder = self
            .building
            .get_or_insert_with(|| SubMeshBuilder::new(layout));
        for corner in corners {
            builder.add(corner, &self.pools);
        }
        Ok(())
    }

    fn close_sub_mesh(&mut self) -> AssetResult<()> {
        let Some(builder) = self.building.take() else {
            return Ok(());
        };

        let name = self
            .group
            .clone()
            .unwrap_or_else(|| DEFAULT_SUB_MESH.to_string());
        if self.sub_meshes.iter().any(|s| s.name == name) {
            return Err(AssetError::DuplicateName {
                kind: "mesh",
                name,
                file: self.path.to_path_buf(),
            });
        }

        let mesh = builder.finish();
        log::debug!(
            "Sub-mesh '{}': {:?}, {} vertices, {} triangles, material {:?}",
            name,
            mesh.layout(),
            mesh.vertices.len(),
            mesh.triangle_count(),
            self.active_material
        );
        self.sub_meshes.push(SubMesh {
            name,
            material: self.active_material.clone(),
            mesh,
        });
        Ok(())
    }

    fn material_libraries(&mut self, d: &Directive<'_>) -> AssetResult<()> {
        if d.remaining().is_empty() {
            return Err(d.error("missing library name after 'mtllib'"));
        }
        for name in d.remaining() {
            let path = sibling_path(self.path, name);
            if !self.libraries.insert(path.clone()) {
                log::debug!("Material library {} already loaded", path.display());
                continue;
            }
            for material in mtl::load_mtl(self.source, &path)? {
                if self.materials.iter().any(|m| m.name == material.name) {
                    return Err(AssetError::DuplicateName {
                        kind: "material",
                        name: material.name,
                        file: path,
                    });
                }
                self.materials.push(material);
            }
        }
        Ok(())
    }

    fn use_material(&mut self, d: &mut Directive<'_>) -> AssetResult<()> {
        let name = d.next_token("material name")?;
        if !self.materials.iter().any(|m| m.name == name) {
            return Err(AssetError::UndefinedMaterial {
                file: self.path.to_path_buf(),
                line: d.line,
                name: name.to_string(),
            });
        }
        self.active_material = Some(name.to_string());
        Ok(())
    }
}

fn parse_face_vertex(
    token: &str,
    layout: VertexLayout,
    pools: &AttributePools,
    d: &Directive<'_>,
) -> AssetResult<AttributeCombo> {
    let mut split = token.split('/');
    let pos = split.next().unwrap_or_default();
    let tex = split.next().filter(|s| !s.is_empty());
    let norm = split.next().filter(|s| !s.is_empty());
    if split.next().is_some() {
        return Err(d.error(format!("malformed face element '{}'", token)));
    }

    if tex.is_some() != layout.has_texcoord() || norm.is_some() != layout.has_normal() {
        return Err(d.error(format!(
            "face element '{}' does not match the {:?} vertex layout",
            token, layout
        )));
    }

    Ok(AttributeCombo {
        position: resolve_index(pos, pools.positions.len(), d)?,
        texcoord: tex
            .map(|t| resolve_index(t, pools.texcoords.len(), d))
            .transpose()?,
        normal: norm
            .map(|n| resolve_index(n, pools.normals.len(), d))
            .transpose()?,
    })
}

/// Turn a 1-based (or negative, relative) OBJ index into a 0-based one.
fn resolve_index(token: &str, len: usize, d: &Directive<'_>) -> AssetResult<u32> {
    let raw = token
        .parse::<i64>()
        .map_err(|_| d.error(format!("invalid index '{}'", token)))?;
    if raw == 0 {
        return Err(d.error("OBJ indices are 1-based; found 0"));
    }

    let idx = if raw > 0 { raw - 1 } else { len as i64 + raw };

    if idx < 0 || idx as usize >= len {
        return Err(d.error(format!(
            "index {} resolved out of bounds (len={})",
            raw, len
        )));
    }

    Ok(idx as u32)
}
