//! Album export: a zip archive of exactly the photos the viewer may see.
//!
//! The archive key covers the visible photo set, so a policy change or a
//! rescan that alters visibility produces a fresh archive instead of serving
//! a stale one.

use std::io::{Seek, SeekFrom};
use std::time::{Duration, SystemTime};

use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use zip::ZipWriter;
use zip::write::SimpleFileOptions;

use super::access;
use super::types::{Album, AlbumId, Photo, Viewer};
use super::{Gallery, GalleryError, SharedGallery};

const EXPORT_PREFIX: &str = "export";

/// Where a built archive can be fetched from.
#[derive(Debug, Clone)]
pub struct ArchiveRef {
    /// Key in the cache store.
    pub name: String,
    pub path: Option<std::path::PathBuf>,
    pub url: Option<String>,
    /// Suggested download filename.
    pub filename: String,
    pub cache_hit: bool,
}

impl Gallery {
    /// Archive cache key: a digest over the secret, the album, and every
    /// visible photo's id and timestamp.
    fn archive_name(&self, album: &Album, photos: &[Photo]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.secret_key.as_bytes());
        hasher.update(album.id.0.to_le_bytes());
        for photo in photos {
            hasher.update(photo.id.0.to_le_bytes());
            if let Some(date) = photo.date {
                hasher.update(date.and_utc().timestamp().to_le_bytes());
            }
        }
        format!("{}/{:x}.zip", EXPORT_PREFIX, hasher.finalize())
    }

    /// Build (or reuse) a zip archive of the album for this viewer.
    pub async fn export_album(
        self: &SharedGallery,
        album_id: AlbumId,
        viewer: &Viewer,
    ) -> Result<ArchiveRef, GalleryError> {
        let (album, photos) = {
            let catalog = self.catalog.read().await;
            let album = catalog.album(album_id).ok_or(GalleryError::NotFound)?.clone();
            let photos: Vec<Photo> = access::visible_photos(&catalog, &album, viewer)
                .into_iter()
                .cloned()
                .collect();
            (album, photos)
        };

        let name = self.archive_name(&album, &photos);
        if self.storage.cache.exists(&name) {
            return Ok(self.archive_ref(name, &album, true));
        }

        let gallery = self.clone();
        let name_for_task = name.clone();
        let album_for_task = album.clone();
        tokio::task::spawn_blocking(move || {
            gallery.purge_expired_archives();
            gallery.build_archive(&album_for_task, &photos, &name_for_task)
        })
        .await??;

        info!("Exported album {} as {}", album.dirpath, name);
        Ok(self.archive_ref(name, &album, false))
    }

    fn archive_ref(&self, name: String, album: &Album, cache_hit: bool) -> ArchiveRef {
        let filename = format!("{}_{}.zip", album.date, sanitize(&album.display_name()));
        ArchiveRef {
            path: self.storage.cache.path(&name),
            url: self.storage.cache.url(&name),
            name,
            filename,
            cache_hit,
        }
    }

    /// Assemble the zip in a temporary file, then stream it into the cache
    /// store, so the archive is never held in memory.
    fn build_archive(
        &self,
        album: &Album,
        photos: &[Photo],
        name: &str,
    ) -> Result<(), GalleryError> {
        let mut temp = tempfile::tempfile()?;
        {
            let mut archive = ZipWriter::new(&mut temp);
            let options = SimpleFileOptions::default();
            for photo in photos {
                let mut original = self.storage.photo.open(&photo.image_name(album))?;
                // Plain filenames, no directory nesting inside the archive.
                archive.start_file(photo.filename.as_str(), options)?;
                std::io::copy(&mut original, &mut archive)?;
            }
            archive.finish()?;
        }
        temp.seek(SeekFrom::Start(0))?;

        if let Err(e) = self.storage.cache.save_reader(name, &mut temp) {
            let _ = self.storage.cache.delete(name);
            return Err(e.into());
        }
        Ok(())
    }

    /// Drop archives older than the retention window. Runs lazily before a
    /// new export; failures only cost disk space, so they are logged and
    /// ignored.
    fn purge_expired_archives(&self) {
        let Some(days) = self.config.archive_expiry_days else {
            return;
        };
        let cutoff = SystemTime::now() - Duration::from_secs(days * 86400);
        let files = match self.storage.cache.listdir(EXPORT_PREFIX) {
            Ok((_, files)) => files,
            Err(_) => return,
        };
        for file in files {
            if !file.ends_with(".zip") {
                continue;
            }
            let key = format!("{}/{}", EXPORT_PREFIX, file);
            match self.storage.cache.modified(&key) {
                Ok(modified) if modified < cutoff => {
                    debug!("Purging expired archive {}", key);
                    if let Err(e) = self.storage.cache.delete(&key) {
                        warn!("Failed to purge archive {}: {}", key, e);
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to stat archive {}: {}", key, e),
            }
        }
    }
}

/// Reduce a display name to a safe ASCII download filename.
pub(crate) fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect()
}
