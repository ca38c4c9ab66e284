use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading model, material and image files.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", .file.display())]
    Parse {
        file: PathBuf,
        line: usize,
        message: String,
    },

    #[error("duplicate {kind} name '{name}' in {}", .file.display())]
    DuplicateName {
        kind: &'static str,
        name: String,
        file: PathBuf,
    },

    #[error("{}:{line}: material '{name}' is not defined", .file.display())]
    UndefinedMaterial {
        file: PathBuf,
        line: usize,
        name: String,
    },

    #[error("{} contains no faces", .0.display())]
    NoGeometry(PathBuf),

    #[error("failed to decode image {}: {source}", .path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

pub type AssetResult<T> = Result<T, AssetError>;

impl AssetError {
    pub(crate) fn from_io(path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            AssetError::FileNotFound(path)
        } else {
            AssetError::Io { path, source }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_maps_to_file_not_found() {
        let err = AssetError::from_io(
            PathBuf::from("models/none.obj"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        assert!(matches!(err, AssetError::FileNotFound(_)));
        assert_eq!(err.to_string(), "file not found: models/none.obj");
    }

    #[test]
    fn parse_error_mentions_location() {
        let err = AssetError::Parse {
            file: PathBuf::from("a.obj"),
            line: 7,
            message: "bad".into(),
        };
        assert_eq!(err.to_string(), "a.obj:7: bad");
    }
}
