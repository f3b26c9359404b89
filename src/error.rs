use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CropMatchError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image {path:?}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl CropMatchError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for failures tied to a single unreadable or undecodable file.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Image { .. })
    }
}

pub type Result<T, E = CropMatchError> = std::result::Result<T, E>;
