//! Where asset bytes come from.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::error::{AssetError, AssetResult};

/// Read access to asset files by path.
pub trait SourceProvider: Send + Sync {
    fn read_bytes(&self, path: &Path) -> AssetResult<Vec<u8>>;

    fn read_to_string(&self, path: &Path) -> AssetResult<String> {
        let bytes = self.read_bytes(path)?;
        String::from_utf8(bytes).map_err(|e| AssetError::Io {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })
    }
}

/// Reads straight from the filesystem.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsSource;

impl SourceProvider for FsSource {
    fn read_bytes(&self, path: &Path) -> AssetResult<Vec<u8>> {
        log::trace!("Reading {}", path.display());
        fs::read(path).map_err(|e| AssetError::from_io(path.to_path_buf(), e))
    }
}

/// In-memory file table, keyed by the exact path callers will request.
#[derive(Clone, Debug, Default)]
pub struct MemorySource {
    files: HashMap<PathBuf, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> &mut Self {
        self.files.insert(path.into(), contents.into());
        self
    }

    pub fn with(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }
}

impl SourceProvider for MemorySource {
    fn read_bytes(&self, path: &Path) -> AssetResult<Vec<u8>> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| AssetError::FileNotFound(path.to_path_buf()))
    }
}

/// Resolve `name` against the directory containing `base`.
pub fn sibling_path(base: &Path, name: &str) -> PathBuf {
    match base.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
        _ => PathBuf::from(name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_source_misses_are_file_not_found() {
        let src = MemorySource::new().with("a/b.obj", "v 0 0 0");
        assert_eq!(src.read_to_string(Path::new("a/b.obj")).unwrap(), "v 0 0 0");
        assert!(matches!(
            src.read_bytes(Path::new("a/c.obj")),
            Err(AssetError::FileNotFound(_))
        ));
    }

    #[test]
    fn sibling_paths_follow_the_base_directory() {
        assert_eq!(
            sibling_path(Path::new("models/cube.obj"), "cube.mtl"),
            PathBuf::from("models/cube.mtl")
        );
        assert_eq!(sibling_path(Path::new("cube.obj"), "cube.mtl"), PathBuf::from("cube.mtl"));
    }
}
