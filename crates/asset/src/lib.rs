//! Asset loading/parsers (meshes, materials, textures).
//!
//! Everything here is CPU-side: files are tokenized and validated, vertices
//! are deduplicated per sub-mesh, and images are decoded to RGBA8. GPU upload
//! lives in the `renderer` crate.

pub mod error;
pub mod lexer;
pub mod mesh;
pub mod mtl;
pub mod obj;
pub mod source;
pub mod texture;

pub use error::{AssetError, AssetResult};
pub use mesh::{MeshData, VertexData, VertexLayout};
pub use mtl::{MaterialDesc, TextureRef};
pub use obj::{ObjData, SubMesh};
pub use source::{FsSource, MemorySource, SourceProvider};
