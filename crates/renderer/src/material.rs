//! GPU-side material: constant block plus cached texture maps.

use std::sync::Arc;

use asset::MaterialDesc;
use bytemuck::{Pod, Zeroable};

use crate::cache::{CacheError, ResourceCache, SharedSampler, SharedTexture};
use crate::device::{RenderContext, RenderDevice};
use crate::types::{BufferDesc, BufferId, BufferUsage};

/// Constant buffer slot the material block is bound to.
pub const MATERIAL_CONSTANT_SLOT: u32 = 1;
/// Shader resource slots of the ambient, diffuse and specular maps.
pub const MATERIAL_TEXTURE_SLOTS: [u32; 3] = [0, 1, 2];
pub const MATERIAL_SAMPLER_SLOT: u32 = 0;

/// Material coefficients as laid out in the shader constant block.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialConstants {
    pub ns: f32,
    pub ni: f32,
    pub d: f32,
    _pad0: f32,
    pub tf: [f32; 3],
    pub illum: u32,
    pub ka: [f32; 3],
    _pad1: f32,
    pub kd: [f32; 3],
    _pad2: f32,
    pub ks: [f32; 3],
    _pad3: f32,
    pub ke: [f32; 3],
    _pad4: f32,
}

impl From<&MaterialDesc> for MaterialConstants {
    fn from(desc: &MaterialDesc) -> Self {
        Self {
            ns: desc.ns,
            ni: desc.ni,
            d: desc.d,
            tf: desc.tf,
            illum: desc.illum,
            ka: desc.ka,
            kd: desc.kd,
            ks: desc.ks,
            ke: desc.ke,
            ..Default::default()
        }
    }
}

pub struct Material {
    name: String,
    constants: MaterialConstants,
    buffer: BufferId,
    device: Arc<dyn RenderDevice>,
    maps: [Option<SharedTexture>; 3],
}

impl Material {
    /// Uploads the constant block and acquires the texture maps.
    pub fn new(cache: &ResourceCache, desc: &MaterialDesc) -> Result<Self, CacheError> {
        let mut maps: [Option<SharedTexture>; 3] = Default::default();
        for (slot, map) in [&desc.map_ka, &desc.map_kd, &desc.map_ks].into_iter().enumerate() {
            if let Some(texture) = map {
                maps[slot] = Some(cache.acquire_texture(&texture.path)?);
            }
        }

        let constants = MaterialConstants::from(desc);
        let device = cache.device().clone();
        let buffer = device.create_buffer(&BufferDesc {
            label: &desc.name,
            usage: BufferUsage::CONSTANT,
            contents: bytemuck::bytes_of(&constants),
        })?;
        log::debug!(
            "material '{}': {} texture map(s)",
            desc.name,
            maps.iter().flatten().count()
        );

        Ok(Self {
            name: desc.name.clone(),
            constants,
            buffer,
            device,
            maps,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn constants(&self) -> &MaterialConstants {
        &self.constants
    }

    pub fn constant_buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn ambient_map(&self) -> Option<&SharedTexture> {
        self.maps[0].as_ref()
    }

    pub fn diffuse_map(&self) -> Option<&SharedTexture> {
        self.maps[1].as_ref()
    }

    pub fn specular_map(&self) -> Option<&SharedTexture> {
        self.maps[2].as_ref()
    }

    /// Binds the constant block, present maps and `sampler`. Absent maps
    /// leave their slot unbound.
    pub fn bind(&self, ctx: &mut dyn RenderContext, sampler: &SharedSampler) {
        ctx.bind_constant_buffer(MATERIAL_CONSTANT_SLOT, self.buffer);
        for (slot, map) in MATERIAL_TEXTURE_SLOTS.into_iter().zip(&self.maps) {
            match map {
                Some(texture) => ctx.bind_shader_resources(slot, &[texture.view()]),
                None => ctx.unbind_shader_resources(slot, 1),
            }
        }
        ctx.bind_samplers(MATERIAL_SAMPLER_SLOT, &[sampler.id()]);
    }
}

impl Drop for Material {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.buffer);
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Material")
            .field("name", &self.name)
            .field("constants", &self.constants)
            .field("maps", &self.maps)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{HeadlessContext, HeadlessDevice};
    use crate::device::Command;
    use asset::texture::TextureData;
    use asset::{MemorySource, TextureRef};

    #[test]
    fn constant_block_layout() {
        assert_eq!(std::mem::size_of::<MaterialConstants>(), 96);
        let mut desc = MaterialDesc::new("m");
        desc.ns = 10.0;
        desc.d = 0.5;
        desc.tf = [0.1, 0.2, 0.3];
        desc.illum = 2;
        desc.kd = [1.0, 0.5, 0.25];
        desc.ke = [0.0, 0.0, 9.0];
        let constants = MaterialConstants::from(&desc);
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&constants));
        assert_eq!(floats[0], 10.0);
        assert_eq!(floats[2], 0.5);
        assert_eq!(&floats[4..7], &[0.1, 0.2, 0.3]);
        assert_eq!(floats[7].to_bits(), 2);
        assert_eq!(&floats[12..15], &[1.0, 0.5, 0.25]);
        assert_eq!(floats[22], 9.0);
    }

    #[test]
    fn binds_maps_at_fixed_slots() {
        let headless = Arc::new(HeadlessDevice::new());
        let png = TextureData::checkerboard(2).to_png().unwrap();
        let source = MemorySource::new().with("m/diffuse.png", png);
        let cache = ResourceCache::new(headless.clone(), Arc::new(source));

        let mut desc = MaterialDesc::new("m");
        desc.map_kd = Some(TextureRef {
            name: "diffuse.png".into(),
            path: "m/diffuse.png".into(),
        });
        let material = Material::new(&cache, &desc).unwrap();
        let sampler = cache.default_sampler().unwrap();
        let diffuse = material.diffuse_map().unwrap().view();

        let mut ctx = HeadlessContext::new(headless.clone(), 2, 2).unwrap();
        material.bind(&mut ctx, &sampler);
        assert_eq!(
            ctx.commands(),
            &[
                Command::BindConstantBuffer {
                    slot: 1,
                    buffer: material.constant_buffer()
                },
                Command::UnbindShaderResources { slot: 0, count: 1 },
                Command::BindShaderResources {
                    slot: 1,
                    views: vec![diffuse]
                },
                Command::UnbindShaderResources { slot: 2, count: 1 },
                Command::BindSamplers {
                    slot: 0,
                    samplers: vec![sampler.id()]
                },
            ]
        );

        let before = headless.live_buffers();
        drop(material);
        assert_eq!(headless.live_buffers(), before - 1);
        assert!(!cache.contains(&crate::cache::ResourceKey::Texture("m/diffuse.png".into())));
    }
}
