//! Reference-counted texture and sampler cache.
//!
//! Resources are keyed by path (textures) or name (samplers). Every handle
//! handed out holds one reference; cloning a handle adds one and dropping it
//! removes one. When the count reaches zero the GPU objects are destroyed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use asset::texture::TextureData;
use asset::{AssetError, SourceProvider};
use parking_lot::Mutex;
use thiserror::Error;

use crate::device::RenderDevice;
use crate::error::GpuError;
use crate::types::{SamplerDesc, SamplerId, TextureDesc, TextureFormat, TextureId, TextureUsage, ViewDesc, ViewId};

/// Format cached image textures are uploaded with.
pub const CACHED_TEXTURE_FORMAT: TextureFormat = TextureFormat::Rgba8UnormSrgb;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error(transparent)]
    Asset(#[from] AssetError),
    #[error(transparent)]
    Gpu(#[from] GpuError),
    #[error("resource cache has been torn down")]
    Closed,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Texture(PathBuf),
    Sampler(String),
    DefaultSampler,
}

#[derive(Clone, Copy, Debug)]
enum Resource {
    Texture {
        texture: TextureId,
        view: ViewId,
        width: u32,
        height: u32,
        mip_levels: u32,
    },
    Sampler(SamplerId),
}

struct Entry {
    resource: Resource,
    count: usize,
}

#[derive(Default)]
struct State {
    entries: HashMap<ResourceKey, Entry>,
    closed: bool,
}

struct Inner {
    device: Arc<dyn RenderDevice>,
    source: Arc<dyn SourceProvider>,
    state: Mutex<State>,
}

impl Inner {
    fn destroy(&self, resource: Resource) {
        match resource {
            Resource::Texture { texture, view, .. } => {
                self.device.destroy_view(view);
                self.device.destroy_texture(texture);
            }
            Resource::Sampler(id) => self.device.destroy_sampler(id),
        }
    }

    fn retain(&self, key: &ResourceKey) {
        if let Some(entry) = self.state.lock().entries.get_mut(key) {
            entry.count += 1;
        }
    }

    fn release(&self, key: &ResourceKey) {
        let freed = {
            let mut state = self.state.lock();
            let Some(entry) = state.entries.get_mut(key) else {
                if !state.closed {
                    log::error!("release of {key:?} which is not cached");
                }
                return;
            };
            entry.count -= 1;
            if entry.count > 0 {
                return;
            }
            state.entries.remove(key).map(|e| e.resource)
        };
        if let Some(resource) = freed {
            log::debug!("cache: freeing {key:?}");
            self.destroy(resource);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let entries = std::mem::take(&mut self.state.get_mut().entries);
        for (_, entry) in entries {
            self.destroy(entry.resource);
        }
    }
}

/// Shared handle to the cache. Cheap to clone.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<Inner>,
}

impl ResourceCache {
    pub fn new(device: Arc<dyn RenderDevice>, source: Arc<dyn SourceProvider>) -> Self {
        Self {
            inner: Arc::new(Inner {
                device,
                source,
                state: Mutex::new(State::default()),
            }),
        }
    }

    pub fn device(&self) -> &Arc<dyn RenderDevice> {
        &self.inner.device
    }

    pub fn source(&self) -> &Arc<dyn SourceProvider> {
        &self.inner.source
    }

    /// Returns the texture at `path`, loading and uploading it on first use.
    ///
    /// The file is read, decoded and uploaded without holding the cache
    /// lock. If another thread cached the same path meanwhile, its entry
    /// wins and the copy made here is destroyed.
    ///
    /// On failure nothing is cached and no GPU object is left behind.
    pub fn acquire_texture(&self, path: impl AsRef<Path>) -> Result<SharedTexture, CacheError> {
        let path = path.as_ref();
        let key = ResourceKey::Texture(path.to_path_buf());
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(CacheError::Closed);
            }
            if let Some(entry) = state.entries.get_mut(&key) {
                entry.count += 1;
                return Ok(self.texture_handle(key, entry.resource));
            }
        }

        let loaded = self.upload_texture(path)?;
        let mut state = self.inner.state.lock();
        if state.closed {
            drop(state);
            self.inner.destroy(loaded);
            return Err(CacheError::Closed);
        }
        if let Some(entry) = state.entries.get_mut(&key) {
            entry.count += 1;
            let resource = entry.resource;
            drop(state);
            log::debug!("cache: {} was loaded concurrently, dropping duplicate", path.display());
            self.inner.destroy(loaded);
            return Ok(self.texture_handle(key, resource));
        }
        state.entries.insert(
            key.clone(),
            Entry {
                resource: loaded,
                count: 1,
            },
        );
        Ok(self.texture_handle(key, loaded))
    }

    /// Decodes `path`, builds its mip chain and uploads every level.
    fn upload_texture(&self, path: &Path) -> Result<Resource, CacheError> {
        let data = TextureData::load(self.inner.source.as_ref(), path)?;
        let chain = data.mip_chain();
        let pixels: Vec<u8> = chain.iter().flat_map(|level| level.pixels.iter().copied()).collect();
        let mip_levels = chain.len() as u32;

        let label = path.to_string_lossy();
        let device = self.inner.device.as_ref();
        let texture = device.create_texture(
            &TextureDesc {
                label: &label,
                width: data.width,
                height: data.height,
                format: CACHED_TEXTURE_FORMAT,
                mip_levels,
                sample_count: 1,
                usage: TextureUsage::SHADER_READ | TextureUsage::COPY_DST,
            },
            Some(&pixels),
        )?;
        let view = match device.create_view(texture, &ViewDesc::shader_read(CACHED_TEXTURE_FORMAT)) {
            Ok(view) => view,
            Err(err) => {
                device.destroy_texture(texture);
                return Err(err.into());
            }
        };

        log::debug!(
            "cache: loaded {} ({}x{}, {mip_levels} mips)",
            path.display(),
            data.width,
            data.height
        );
        Ok(Resource::Texture {
            texture,
            view,
            width: data.width,
            height: data.height,
            mip_levels,
        })
    }

    /// Returns the sampler named `name`, creating it from `desc` on first use.
    /// Later calls with a different `desc` get the existing sampler.
    pub fn acquire_sampler(&self, name: &str, desc: &SamplerDesc) -> Result<SharedSampler, CacheError> {
        self.sampler(ResourceKey::Sampler(name.to_owned()), desc, 1)
    }

    /// Linear filtering with wrap addressing. The cache keeps its own
    /// reference, so the sampler lives until [`ResourceCache::teardown`].
    pub fn default_sampler(&self) -> Result<SharedSampler, CacheError> {
        self.sampler(ResourceKey::DefaultSampler, &SamplerDesc::linear_wrap(), 2)
    }

    fn sampler(&self, key: ResourceKey, desc: &SamplerDesc, initial: usize) -> Result<SharedSampler, CacheError> {
        let mut state = self.inner.state.lock();
        if state.closed {
            return Err(CacheError::Closed);
        }
        let id = match state.entries.get_mut(&key) {
            Some(entry) => {
                entry.count += 1;
                match entry.resource {
                    Resource::Sampler(id) => id,
                    Resource::Texture { .. } => unreachable!("sampler key holds a texture"),
                }
            }
            None => {
                let id = self.inner.device.create_sampler(desc)?;
                log::debug!("cache: created sampler {key:?}");
                state.entries.insert(
                    key.clone(),
                    Entry {
                        resource: Resource::Sampler(id),
                        count: initial,
                    },
                );
                id
            }
        };
        Ok(SharedSampler {
            cache: self.inner.clone(),
            key,
            id,
        })
    }

    fn texture_handle(&self, key: ResourceKey, resource: Resource) -> SharedTexture {
        match resource {
            Resource::Texture {
                texture,
                view,
                width,
                height,
                mip_levels,
            } => SharedTexture {
                cache: self.inner.clone(),
                key,
                texture,
                view,
                width,
                height,
                mip_levels,
            },
            Resource::Sampler(_) => unreachable!("texture key holds a sampler"),
        }
    }

    /// Current reference count for `key`, zero if not cached.
    pub fn ref_count(&self, key: &ResourceKey) -> usize {
        self.inner
            .state
            .lock()
            .entries
            .get(key)
            .map_or(0, |e| e.count)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.inner.state.lock().entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Destroys every cached resource. Handles still alive afterwards keep
    /// their ids but must not be bound; dropping them is harmless.
    pub fn teardown(&self) {
        let entries = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            std::mem::take(&mut state.entries)
        };
        for (key, entry) in entries {
            let own = usize::from(key == ResourceKey::DefaultSampler);
            if entry.count > own {
                log::warn!("cache teardown: {key:?} still has {} reference(s)", entry.count - own);
            }
            self.inner.destroy(entry.resource);
        }
        log::info!("resource cache torn down");
    }
}

/// Counted reference to a cached texture and its shader view.
pub struct SharedTexture {
    cache: Arc<Inner>,
    key: ResourceKey,
    texture: TextureId,
    view: ViewId,
    width: u32,
    height: u32,
    mip_levels: u32,
}

impl SharedTexture {
    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn view(&self) -> ViewId {
        self.view
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }
}

impl Clone for SharedTexture {
    fn clone(&self) -> Self {
        self.cache.retain(&self.key);
        Self {
            cache: self.cache.clone(),
            key: self.key.clone(),
            texture: self.texture,
            view: self.view,
            width: self.width,
            height: self.height,
            mip_levels: self.mip_levels,
        }
    }
}

impl Drop for SharedTexture {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

impl std::fmt::Debug for SharedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTexture")
            .field("key", &self.key)
            .field("texture", &self.texture)
            .field("view", &self.view)
            .finish()
    }
}

/// Counted reference to a cached sampler.
pub struct SharedSampler {
    cache: Arc<Inner>,
    key: ResourceKey,
    id: SamplerId,
}

impl SharedSampler {
    pub fn id(&self) -> SamplerId {
        self.id
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }
}

impl Clone for SharedSampler {
    fn clone(&self) -> Self {
        self.cache.retain(&self.key);
        Self {
            cache: self.cache.clone(),
            key: self.key.clone(),
            id: self.id,
        }
    }
}

impl Drop for SharedSampler {
    fn drop(&mut self) {
        self.cache.release(&self.key);
    }
}

impl std::fmt::Debug for SharedSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSampler")
            .field("key", &self.key)
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::HeadlessDevice;
    use asset::MemorySource;

    fn png(size: u32) -> Vec<u8> {
        TextureData::checkerboard(size).to_png().unwrap()
    }

    fn setup() -> (Arc<HeadlessDevice>, ResourceCache) {
        let device = Arc::new(HeadlessDevice::new());
        let source = MemorySource::new()
            .with("tex/a.png", png(8))
            .with("tex/b.png", png(4))
            .with("tex/broken.png", b"not an image".to_vec());
        let cache = ResourceCache::new(device.clone(), Arc::new(source));
        (device, cache)
    }

    #[test]
    fn texture_shared_by_path() {
        let (device, cache) = setup();
        let a = cache.acquire_texture("tex/a.png").unwrap();
        let again = cache.acquire_texture("tex/a.png").unwrap();
        assert_eq!(a.texture(), again.texture());
        assert_eq!(a.size(), (8, 8));
        assert_eq!(device.stats().textures_created, 1);
        let key = ResourceKey::Texture("tex/a.png".into());
        assert_eq!(cache.ref_count(&key), 2);

        drop(again);
        assert_eq!(cache.ref_count(&key), 1);
        assert_eq!(device.live_textures(), 1);

        drop(a);
        assert_eq!(cache.ref_count(&key), 0);
        assert_eq!(device.live_textures(), 0);
        assert_eq!(device.live_views(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn clone_counts_as_reference() {
        let (device, cache) = setup();
        let b = cache.acquire_texture("tex/b.png").unwrap();
        let copy = b.clone();
        let key = b.key().clone();
        assert_eq!(cache.ref_count(&key), 2);
        drop(b);
        assert_eq!(device.live_textures(), 1);
        drop(copy);
        assert_eq!(device.live_textures(), 0);
    }

    #[test]
    fn uploads_decoded_pixels() {
        let (device, cache) = setup();
        let b = cache.acquire_texture("tex/b.png").unwrap();
        let record = device.texture(b.texture()).unwrap();
        assert_eq!(record.format, CACHED_TEXTURE_FORMAT);
        let data = record.data.unwrap();
        assert_eq!(&data[..4 * 4 * 4], &TextureData::checkerboard(4).pixels[..]);
    }

    #[test]
    fn uploads_full_mip_chain() {
        let (device, cache) = setup();
        let a = cache.acquire_texture("tex/a.png").unwrap();
        assert_eq!(a.mip_levels(), 4);
        let record = device.texture(a.texture()).unwrap();
        assert_eq!(record.mip_levels, 4);
        // 8x8, 4x4, 2x2, 1x1
        assert_eq!(record.data.map(|d| d.len()), Some((64 + 16 + 4 + 1) * 4));
    }

    /// Source that acquires the same texture through the cache while the
    /// outer load is still reading it.
    struct NestedLoad {
        files: MemorySource,
        cache: std::sync::OnceLock<ResourceCache>,
        nested: std::sync::atomic::AtomicBool,
        inner: Mutex<Option<SharedTexture>>,
    }

    impl SourceProvider for NestedLoad {
        fn read_bytes(&self, path: &Path) -> asset::AssetResult<Vec<u8>> {
            let first = !self.nested.swap(true, std::sync::atomic::Ordering::SeqCst);
            if let (true, Some(cache)) = (first, self.cache.get()) {
                let handle = cache.acquire_texture(path).unwrap();
                *self.inner.lock() = Some(handle);
            }
            self.files.read_bytes(path)
        }
    }

    #[test]
    fn load_runs_unlocked_and_keeps_first_entry() {
        let device = Arc::new(HeadlessDevice::new());
        let source = Arc::new(NestedLoad {
            files: MemorySource::new().with("tex/a.png", png(8)),
            cache: std::sync::OnceLock::new(),
            nested: std::sync::atomic::AtomicBool::new(false),
            inner: Mutex::new(None),
        });
        let cache = ResourceCache::new(device.clone(), source.clone());
        let _ = source.cache.set(cache.clone());

        let outer = cache.acquire_texture("tex/a.png").unwrap();
        let nested = source.inner.lock().take().unwrap();
        assert_eq!(outer.texture(), nested.texture());
        let key = ResourceKey::Texture("tex/a.png".into());
        assert_eq!(cache.ref_count(&key), 2);
        assert_eq!(device.stats().textures_created, 2);
        assert_eq!(device.live_textures(), 1);
        assert_eq!(device.live_views(), 1);

        drop(nested);
        drop(outer);
        assert_eq!(device.live_textures(), 0);
        cache.teardown();
    }

    #[test]
    fn named_samplers_are_shared() {
        let (device, cache) = setup();
        let s1 = cache.acquire_sampler("clamp", &SamplerDesc::nearest_clamp()).unwrap();
        let s2 = cache.acquire_sampler("clamp", &SamplerDesc::linear_wrap()).unwrap();
        assert_eq!(s1.id(), s2.id());
        assert_eq!(device.sampler(s1.id()), Some(SamplerDesc::nearest_clamp()));
        drop(s1);
        drop(s2);
        assert_eq!(device.live_samplers(), 0);
    }

    #[test]
    fn default_sampler_survives_until_teardown() {
        let (device, cache) = setup();
        let s = cache.default_sampler().unwrap();
        assert_eq!(device.sampler(s.id()), Some(SamplerDesc::linear_wrap()));
        drop(s);
        assert_eq!(device.live_samplers(), 1);
        assert_eq!(cache.ref_count(&ResourceKey::DefaultSampler), 1);

        let tex = cache.acquire_texture("tex/a.png").unwrap();
        cache.teardown();
        assert_eq!(device.live_samplers(), 0);
        assert_eq!(device.live_textures(), 0);
        drop(tex);
        assert!(matches!(cache.default_sampler(), Err(CacheError::Closed)));
    }

    #[test]
    fn dropping_last_cache_handle_frees_default_sampler() {
        let (device, cache) = setup();
        drop(cache.default_sampler().unwrap());
        drop(cache);
        assert_eq!(device.live_samplers(), 0);
    }
}
