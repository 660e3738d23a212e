use thiserror::Error;

#[derive(Debug, Error)]
pub enum GalleryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("invalid scanner pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("unknown resize preset: {0}")]
    UnknownPreset(String),

    #[error("not found")]
    NotFound,
}

impl GalleryError {
    /// Missing originals surface as not-found rather than a server error.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            GalleryError::NotFound | GalleryError::Storage(crate::storage::StorageError::NotFound(_))
        )
    }
}
