//! The album/photo catalog.
//!
//! Records are kept in memory and persisted as JSON in the cache store, the
//! same way the metadata caches are. The scanner reconciles the catalog with
//! the photo store; the policy subcommand edits the attached access policies.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::GalleryError;
use super::types::{
    Album, AlbumAccessPolicy, AlbumId, Photo, PhotoAccessPolicy, PhotoId,
};
use crate::storage::Storage;

const CATALOG_OBJECT: &str = "catalog.json";

#[derive(Default, Serialize, Deserialize)]
pub struct Catalog {
    next_album_id: u64,
    next_photo_id: u64,
    albums: BTreeMap<AlbumId, Album>,
    photos: BTreeMap<PhotoId, Photo>,
}

impl Catalog {
    /// Load the catalog from the cache store, starting empty if absent.
    pub fn load(cache: &Storage) -> Result<Self, GalleryError> {
        if !cache.exists(CATALOG_OBJECT) {
            debug!("Catalog not found in cache store, starting empty");
            return Ok(Self::default());
        }
        let bytes = cache.read(CATALOG_OBJECT)?;
        let catalog: Catalog = serde_json::from_slice(&bytes)?;
        info!(
            "Loaded catalog: {} albums, {} photos",
            catalog.albums.len(),
            catalog.photos.len()
        );
        Ok(catalog)
    }

    pub fn save(&self, cache: &Storage) -> Result<(), GalleryError> {
        let json = serde_json::to_vec_pretty(self)?;
        cache.save(CATALOG_OBJECT, &json)?;
        Ok(())
    }

    pub fn album(&self, id: AlbumId) -> Option<&Album> {
        self.albums.get(&id)
    }

    pub fn photo(&self, id: PhotoId) -> Option<&Photo> {
        self.photos.get(&id)
    }

    pub fn albums(&self) -> impl Iterator<Item = &Album> {
        self.albums.values()
    }

    pub fn photos(&self) -> impl Iterator<Item = &Photo> {
        self.photos.values()
    }

    pub fn find_album(&self, category: &str, dirpath: &str) -> Option<&Album> {
        self.albums
            .values()
            .find(|album| album.category == category && album.dirpath == dirpath)
    }

    pub fn find_photo(&self, album: AlbumId, filename: &str) -> Option<&Photo> {
        self.photos
            .values()
            .find(|photo| photo.album == album && photo.filename == filename)
    }

    /// Photos of an album in navigation order.
    pub fn photos_of_album(&self, album: AlbumId) -> Vec<&Photo> {
        let mut photos: Vec<&Photo> = self
            .photos
            .values()
            .filter(|photo| photo.album == album)
            .collect();
        photos.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        photos
    }

    /// Insert a new album. (category, dirpath) must not already exist.
    pub fn add_album(
        &mut self,
        category: String,
        dirpath: String,
        date: NaiveDate,
        name: String,
    ) -> AlbumId {
        debug_assert!(self.find_album(&category, &dirpath).is_none());
        self.next_album_id += 1;
        let id = AlbumId(self.next_album_id);
        self.albums.insert(
            id,
            Album {
                id,
                category,
                dirpath,
                date,
                name,
                access_policy: None,
            },
        );
        id
    }

    /// Remove an album and, cascading, all its photos.
    pub fn remove_album(&mut self, id: AlbumId) -> Option<Album> {
        let album = self.albums.remove(&id)?;
        self.photos.retain(|_, photo| photo.album != id);
        Some(album)
    }

    /// Insert a new photo. (album, filename) must not already exist.
    pub fn add_photo(
        &mut self,
        album: AlbumId,
        filename: String,
        date: Option<NaiveDateTime>,
    ) -> PhotoId {
        debug_assert!(self.find_photo(album, &filename).is_none());
        self.next_photo_id += 1;
        let id = PhotoId(self.next_photo_id);
        self.photos.insert(
            id,
            Photo {
                id,
                album,
                filename,
                date,
                access_policy: None,
            },
        );
        id
    }

    pub fn remove_photo(&mut self, id: PhotoId) -> Option<Photo> {
        self.photos.remove(&id)
    }

    pub fn set_album_date(&mut self, id: AlbumId, date: NaiveDate) {
        if let Some(album) = self.albums.get_mut(&id) {
            album.date = date;
        }
    }

    pub fn set_photo_date(&mut self, id: PhotoId, date: Option<NaiveDateTime>) {
        if let Some(photo) = self.photos.get_mut(&id) {
            photo.date = date;
        }
    }

    pub fn set_album_policy(&mut self, id: AlbumId, policy: Option<AlbumAccessPolicy>) -> bool {
        match self.albums.get_mut(&id) {
            Some(album) => {
                album.access_policy = policy;
                true
            }
            None => false,
        }
    }

    pub fn set_photo_policy(&mut self, id: PhotoId, policy: Option<PhotoAccessPolicy>) -> bool {
        match self.photos.get_mut(&id) {
            Some(photo) => {
                photo.access_policy = policy;
                true
            }
            None => false,
        }
    }
}
