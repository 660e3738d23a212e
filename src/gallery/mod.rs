// Gallery module - catalog, access control, and the derivative pipeline
pub mod access;
mod catalog;
mod error;
mod export;
mod handlers;
mod resize;
mod scan;
#[cfg(test)]
pub(crate) mod testutil;
mod types;

pub use catalog::Catalog;
pub use error::GalleryError;
pub use export::ArchiveRef;
pub use handlers::{
    album_export_handler, album_handler, index_handler, latest_handler, photo_handler,
    photo_image_handler,
};
pub use resize::DerivativeRef;
pub use scan::ScanStats;
pub use types::*;

use std::sync::Arc;

use tokio::sync::RwLock;

use crate::storage::StorageSet;

pub type SharedGallery = Arc<Gallery>;

pub struct Gallery {
    pub(crate) config: crate::GalleryConfig,
    pub(crate) storage: StorageSet,
    pub(crate) catalog: RwLock<Catalog>,
}

impl Gallery {
    /// Build the gallery, loading the persisted catalog from the cache store.
    pub fn new(config: crate::GalleryConfig, storage: StorageSet) -> Result<Self, GalleryError> {
        let catalog = Catalog::load(&storage.cache)?;
        Ok(Self {
            config,
            storage,
            catalog: RwLock::new(catalog),
        })
    }

    pub async fn save_catalog(&self) -> Result<(), GalleryError> {
        self.catalog.read().await.save(&self.storage.cache)
    }

    pub fn preset(&self, name: &str) -> Result<ResizePreset, GalleryError> {
        self.config
            .presets
            .get(name)
            .copied()
            .ok_or_else(|| GalleryError::UnknownPreset(name.to_string()))
    }

    pub async fn with_catalog<T>(&self, f: impl FnOnce(&Catalog) -> T) -> T {
        f(&*self.catalog.read().await)
    }

    pub async fn with_catalog_mut<T>(&self, f: impl FnOnce(&mut Catalog) -> T) -> T {
        f(&mut *self.catalog.write().await)
    }
}
