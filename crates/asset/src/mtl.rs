//! Companion material (MTL) parser.

use std::path::{Path, PathBuf};

use crate::{
    error::{AssetError, AssetResult},
    lexer::{Directive, Lexer},
    source::{SourceProvider, sibling_path},
};

/// A texture map reference: the path as written and where it resolves to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TextureRef {
    pub name: String,
    pub path: PathBuf,
}

/// Flat material record. Fields not present in the file stay zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MaterialDesc {
    pub name: String,
    /// Specular exponent.
    pub ns: f32,
    /// Index of refraction.
    pub ni: f32,
    /// Opacity; `d` and `Tr` both write here, keeping the larger value.
    pub d: f32,
    /// Transmission filter.
    pub tf: [f32; 3],
    /// Illumination model id (0 constant, 1 lambert, 2 lambert + blinn-phong, ...).
    pub illum: u32,
    pub ka: [f32; 3],
    pub kd: [f32; 3],
    pub ks: [f32; 3],
    pub ke: [f32; 3],
    pub map_ka: Option<TextureRef>,
    pub map_kd: Option<TextureRef>,
    pub map_ks: Option<TextureRef>,
}

impl MaterialDesc {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Texture maps present on this material.
    pub fn texture_refs(&self) -> impl Iterator<Item = &TextureRef> {
        [&self.map_ka, &self.map_kd, &self.map_ks]
            .into_iter()
            .filter_map(|m| m.as_ref())
    }
}

/// Read and parse a material library.
pub fn load_mtl(source: &dyn SourceProvider, path: &Path) -> AssetResult<Vec<MaterialDesc>> {
    let text = source.read_to_string(path)?;
    parse_mtl(path, &text)
}

/// Parse material library text. Map paths resolve against `file`'s directory.
pub fn parse_mtl(file: &Path, text: &str) -> AssetResult<Vec<MaterialDesc>> {
    let mut materials: Vec<MaterialDesc> = Vec::new();

    for mut d in Lexer::new(file, text) {
        if d.keyword == "newmtl" {
            let name = d.next_token("material name")?;
            if materials.iter().any(|m| m.name == name) {
                return Err(AssetError::DuplicateName {
                    kind: "material",
                    name: name.to_string(),
                    file: file.to_path_buf(),
                });
            }
            materials.push(MaterialDesc::new(name));
            continue;
        }

        if !is_material_field(d.keyword) {
            log::trace!("{}:{}: skipping '{}'", file.display(), d.line, d.keyword);
            continue;
        }

        let Some(current) = materials.last_mut() else {
            return Err(d.error(format!("'{}' before any 'newmtl'", d.keyword)));
        };
        apply_field(current, &mut d, file)?;
    }

    log::debug!("Parsed {} material(s) from {}", materials.len(), file.display());
    Ok(materials)
}

fn is_material_field(keyword: &str) -> bool {
    matches!(
        keyword,
        "Ns" | "Ni" | "d" | "Tr" | "Tf" | "illum" | "Ka" | "Kd" | "Ks" | "Ke" | "map_Ka"
            | "map_Kd" | "map_Ks"
    )
}

fn apply_field(mat: &mut MaterialDesc, d: &mut Directive<'_>, file: &Path) -> AssetResult<()> {
    match d.keyword {
        "Ns" => mat.ns = d.next_f32("specular exponent")?,
        "Ni" => mat.ni = d.next_f32("refractive index")?,
        "d" | "Tr" => {
            let value = d.next_f32("opacity")?;
            mat.d = mat.d.max(value);
        }
        "Tf" => mat.tf = d.next_vec3("transmission filter")?,
        "illum" => mat.illum = d.next_u32("illumination model")?,
        "Ka" => mat.ka = d.next_vec3("ambient color")?,
        "Kd" => mat.kd = d.next_vec3("diffuse color")?,
        "Ks" => mat.ks = d.next_vec3("specular color")?,
        "Ke" => mat.ke = d.next_vec3("emissive color")?,
        "map_Ka" => mat.map_ka = Some(texture_ref(d, file)?),
        "map_Kd" => mat.map_kd = Some(texture_ref(d, file)?),
        "map_Ks" => mat.map_ks = Some(texture_ref(d, file)?),
        _ => {}
    }
    Ok(())
}

fn texture_ref(d: &Directive<'_>, file: &Path) -> AssetResult<TextureRef> {
    let name = d.last_token("texture path")?;
    Ok(TextureRef {
        name: name.to_string(),
        path: sibling_path(file, name),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const BRICK: &str = r#"
        # two materials
        newmtl brick
        Ns 96.078431
        Ni 1.000000
        d 0.5
        Tr 0.25
        illum 2
        Ka 0.1 0.1 0.1
        Kd 0.64 0.3 0.2
        Ks 0.5 0.5 0.5
        Ke 0 0 0
        Tf 1 0.5 1
        map_Kd textures/brick.png
        map_Ks -bm 1 textures/brick_spec.png

        newmtl glass
        d 0.1
    "#;

    #[test]
    fn parses_coefficients_and_maps() {
        let mats = parse_mtl(Path::new("models/scene.mtl"), BRICK).unwrap();
        assert_eq!(mats.len(), 2);
        let brick = &mats[0];
        assert_eq!(brick.name, "brick");
        assert!((brick.ns - 96.078431).abs() < 1e-4);
        assert_eq!(brick.d, 0.5);
        assert_eq!(brick.illum, 2);
        assert_eq!(brick.kd, [0.64, 0.3, 0.2]);
        assert_eq!(brick.tf, [1.0, 0.5, 1.0]);
        let kd = brick.map_kd.as_ref().unwrap();
        assert_eq!(kd.name, "textures/brick.png");
        assert_eq!(kd.path, PathBuf::from("models/textures/brick.png"));
        assert_eq!(
            brick.map_ks.as_ref().unwrap().path,
            PathBuf::from("models/textures/brick_spec.png")
        );
        assert!(brick.map_ka.is_none());
        assert_eq!(brick.texture_refs().count(), 2);
        assert_eq!(mats[1].d, 0.1);
    }

    #[test]
    fn duplicate_material_is_an_error() {
        let err = parse_mtl(Path::new("m.mtl"), "newmtl a\nnewmtl a\n").unwrap_err();
        assert!(matches!(err, AssetError::DuplicateName { kind: "material", .. }));
    }

    #[test]
    fn field_before_newmtl_is_an_error() {
        let err = parse_mtl(Path::new("m.mtl"), "Kd 1 1 1\n").unwrap_err();
        assert!(matches!(err, AssetError::Parse { line: 1, .. }));
    }

    #[test]
    fn malformed_color_is_an_error() {
        let err = parse_mtl(Path::new("m.mtl"), "newmtl a\nKd 1 x 1\n").unwrap_err();
        assert!(matches!(err, AssetError::Parse { line: 2, .. }));
    }

    #[test]
    fn unknown_directives_are_ignored() {
        let mats = parse_mtl(Path::new("m.mtl"), "newmtl a\nbump n.png\nmap_d a.png\n").unwrap();
        assert_eq!(mats.len(), 1);
        assert_eq!(mats[0].texture_refs().count(), 0);
    }
}
