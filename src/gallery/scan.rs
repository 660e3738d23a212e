//! Scanner: reconciles the catalog with the contents of the photo store.
//!
//! Paths are matched against configured category patterns whose named
//! captures (`a_year`, `a_month`, `a_day`, `a_name*` for albums, `p_year`
//! through `p_second` for photos) supply dates and display names. Albums and
//! photos are diffed by key; a full sync additionally corrects dates.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use tracing::{debug, info, warn};

use super::types::{AlbumId, PhotoId};
use super::{Gallery, GalleryError, SharedGallery};
use crate::storage::Storage;

type CaptureMap = BTreeMap<String, String>;
type DiscoveredAlbums = BTreeMap<(String, String), BTreeMap<String, CaptureMap>>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub albums_added: usize,
    pub albums_removed: usize,
    pub photos_added: usize,
    pub photos_removed: usize,
    pub dates_fixed: usize,
    pub unmatched: usize,
}

struct CompiledPatterns {
    ignores: Vec<Regex>,
    categories: Vec<(String, Regex)>,
}

impl CompiledPatterns {
    fn from_config(config: &crate::ScannerConfig) -> Result<Self, GalleryError> {
        let ignores = config
            .ignores
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<_, _>>()?;
        let categories = config
            .patterns
            .iter()
            .map(|p| Ok((p.category.clone(), Regex::new(&p.pattern)?)))
            .collect::<Result<_, GalleryError>>()?;
        Ok(Self {
            ignores,
            categories,
        })
    }

    fn is_ignored(&self, path: &str) -> bool {
        self.ignores.iter().any(|pattern| pattern.is_match(path))
    }

    fn matched(&self, path: &str) -> Option<(&str, CaptureMap)> {
        for (category, pattern) in &self.categories {
            if let Some(captures) = pattern.captures(path) {
                let mut map = CaptureMap::new();
                for name in pattern.capture_names().flatten() {
                    if let Some(value) = captures.name(name) {
                        map.insert(name.to_string(), value.as_str().to_string());
                    }
                }
                return Some((category, map));
            }
        }
        None
    }
}

/// Album date and name from the captures of one of its photos.
fn album_info(captures: &CaptureMap, fallback_date: NaiveDate) -> (NaiveDate, String) {
    let date = capture_date(captures, "a_").unwrap_or_else(|| {
        warn!("Pattern captured no album date, using {}", fallback_date);
        fallback_date
    });
    let mut name_parts: Vec<&str> = Vec::new();
    for (key, value) in captures {
        // BTreeMap iteration already sorts the a_name* keys.
        if key.starts_with("a_name") && !value.is_empty() {
            name_parts.push(value);
        }
    }
    let name = name_parts.join(" ").replace('/', " > ");
    (date, name)
}

/// Photo timestamp from its captures, when the pattern provides one.
fn photo_info(captures: &CaptureMap) -> Option<NaiveDateTime> {
    let date = capture_date(captures, "p_")?;
    let hour: u32 = captures.get("p_hour")?.parse().ok()?;
    let minute: u32 = captures.get("p_minute")?.parse().ok()?;
    let second: u32 = captures.get("p_second")?.parse().ok()?;
    date.and_hms_opt(hour, minute, second)
}

fn capture_date(captures: &CaptureMap, prefix: &str) -> Option<NaiveDate> {
    let year: i32 = captures.get(&format!("{}year", prefix))?.parse().ok()?;
    let month: u32 = captures.get(&format!("{}month", prefix))?.parse().ok()?;
    let day: u32 = captures.get(&format!("{}day", prefix))?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Yield (directory path, file names) pairs for every directory of the
/// store that contains files.
fn walk_storage(
    storage: &Storage,
    path: &str,
    out: &mut Vec<(String, Vec<String>)>,
) -> Result<(), GalleryError> {
    let (directories, files) = storage.listdir(path)?;
    if !files.is_empty() {
        out.push((path.to_string(), files));
    }
    for directory in directories {
        let dir_path = if path.is_empty() {
            directory
        } else {
            format!("{}/{}", path, directory)
        };
        walk_storage(storage, &dir_path, out)?;
    }
    Ok(())
}

impl Gallery {
    /// Walk the photo store and group matching files into albums keyed by
    /// (category, dirpath).
    fn scan_photo_storage(&self) -> Result<(DiscoveredAlbums, usize), GalleryError> {
        let patterns = CompiledPatterns::from_config(&self.config.scanner)?;
        let mut listing = Vec::new();
        walk_storage(&self.storage.photo, "", &mut listing)?;

        let mut albums = DiscoveredAlbums::new();
        let mut unmatched = 0;
        for (dirpath, filenames) in listing {
            for filename in filenames {
                let filepath = if dirpath.is_empty() {
                    filename.clone()
                } else {
                    format!("{}/{}", dirpath, filename)
                };
                if patterns.is_ignored(&filepath) {
                    debug!("- {}", filepath);
                    continue;
                }
                match patterns.matched(&filepath) {
                    Some((category, captures)) => {
                        debug!("> {}", filepath);
                        albums
                            .entry((category.to_string(), dirpath.clone()))
                            .or_default()
                            .insert(filename, captures);
                    }
                    None => {
                        warn!("? {}", filepath);
                        unmatched += 1;
                    }
                }
            }
        }
        Ok((albums, unmatched))
    }

    /// Reconcile the catalog with the photo store and persist it.
    ///
    /// Returns the new photos so callers can pre-generate derivatives.
    pub async fn scan(
        self: &SharedGallery,
        full_sync: bool,
    ) -> Result<(ScanStats, Vec<PhotoId>), GalleryError> {
        let gallery = self.clone();
        let (discovered, unmatched) =
            tokio::task::spawn_blocking(move || gallery.scan_photo_storage()).await??;

        let today = chrono::Local::now().date_naive();
        let mut stats = ScanStats {
            unmatched,
            ..Default::default()
        };
        let mut new_photos = Vec::new();

        let mut catalog = self.catalog.write().await;

        // Albums first: additions, removals, then date fixes on full sync.
        let old_keys: Vec<(String, String)> = catalog
            .albums()
            .map(|album| (album.category.clone(), album.dirpath.clone()))
            .collect();
        for ((category, dirpath), photos) in &discovered {
            let Some(sample) = photos.values().next() else {
                continue;
            };
            let (date, name) = album_info(sample, today);
            let existing = catalog
                .find_album(category, dirpath)
                .map(|album| (album.id, album.date));
            match existing {
                None => {
                    info!("Adding album {} ({}) as {}", dirpath, category, name);
                    catalog.add_album(category.clone(), dirpath.clone(), date, name);
                    stats.albums_added += 1;
                }
                Some((id, old_date)) => {
                    if full_sync && old_date != date {
                        info!("Fixing date of album {} ({})", dirpath, category);
                        catalog.set_album_date(id, date);
                        stats.dates_fixed += 1;
                    }
                }
            }
        }
        for (category, dirpath) in old_keys {
            if !discovered.contains_key(&(category.clone(), dirpath.clone())) {
                info!("Removing album {} ({})", dirpath, category);
                let id = catalog.find_album(&category, &dirpath).map(|a| a.id);
                if let Some(id) = id {
                    catalog.remove_album(id);
                    stats.albums_removed += 1;
                }
            }
        }

        // Photos per album.
        for ((category, dirpath), filenames) in &discovered {
            let album_id = match catalog.find_album(category, dirpath) {
                Some(album) => album.id,
                None => continue,
            };
            let old_names: Vec<String> = catalog
                .photos_of_album(album_id)
                .iter()
                .map(|photo| photo.filename.clone())
                .collect();
            for (filename, captures) in filenames {
                let date = photo_info(captures);
                let existing = catalog
                    .find_photo(album_id, filename)
                    .map(|photo| (photo.id, photo.date));
                match existing {
                    None => {
                        debug!("Adding photo {} to album {} ({})", filename, dirpath, category);
                        let id = catalog.add_photo(album_id, filename.clone(), date);
                        new_photos.push(id);
                        stats.photos_added += 1;
                    }
                    Some((id, old_date)) => {
                        if full_sync && old_date != date {
                            debug!(
                                "Fixing date of photo {} from album {} ({})",
                                filename, dirpath, category
                            );
                            catalog.set_photo_date(id, date);
                            stats.dates_fixed += 1;
                        }
                    }
                }
            }
            for filename in old_names {
                if !filenames.contains_key(&filename) {
                    debug!(
                        "Removing photo {} from album {} ({})",
                        filename, dirpath, category
                    );
                    let id = catalog.find_photo(album_id, &filename).map(|p| p.id);
                    if let Some(id) = id {
                        catalog.remove_photo(id);
                        stats.photos_removed += 1;
                    }
                }
            }
        }

        catalog.save(&self.storage.cache)?;
        drop(catalog);

        info!(
            "Scan complete: +{} / -{} albums, +{} / -{} photos, {} dates fixed, {} unmatched",
            stats.albums_added,
            stats.albums_removed,
            stats.photos_added,
            stats.photos_removed,
            stats.dates_fixed,
            stats.unmatched
        );
        Ok((stats, new_photos))
    }

    /// Scan, then pre-generate derivatives for the given presets.
    pub async fn scan_and_resize(
        self: &SharedGallery,
        full_sync: bool,
        presets: &[String],
    ) -> Result<ScanStats, GalleryError> {
        let (stats, new_photos) = self.scan(full_sync).await?;
        for preset in presets {
            for photo_id in &new_photos {
                self.resize(*photo_id, preset).await?;
            }
        }
        Ok(stats)
    }

    /// Albums that currently have no policy attached, for operator review.
    pub async fn albums_without_policy(&self) -> Vec<(AlbumId, String)> {
        let catalog = self.catalog.read().await;
        catalog
            .albums()
            .filter(|album| album.access_policy.is_none())
            .map(|album| (album.id, album.dirpath.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageSet;
    use crate::{PatternConfig, ScannerConfig};
    use std::sync::Arc;

    fn test_gallery() -> SharedGallery {
        let mut config = crate::GalleryConfig::default();
        config.scanner = ScannerConfig {
            patterns: vec![PatternConfig {
                category: "Photos".to_string(),
                pattern: r"(?P<a_year>\d{4})_(?P<a_month>\d{2})_(?P<a_day>\d{2})_(?P<a_name>[^/]+)/(?P<p_year>\d{4})(?P<p_month>\d{2})(?P<p_day>\d{2})_(?P<p_hour>\d{2})(?P<p_minute>\d{2})(?P<p_second>\d{2})\.jpg$".to_string(),
            }, PatternConfig {
                category: "Photos".to_string(),
                pattern: r"(?P<a_year>\d{4})_(?P<a_month>\d{2})_(?P<a_day>\d{2})_(?P<a_name>[^/]+)/[^/]+\.jpg$".to_string(),
            }],
            ignores: vec![r"\.DS_Store$".to_string(), r"(^|/)\.".to_string()],
        };
        Arc::new(Gallery::new(config, StorageSet::in_memory()).unwrap())
    }

    #[tokio::test]
    async fn scan_discovers_albums_and_photos() {
        let gallery = test_gallery();
        let store = &gallery.storage.photo;
        store
            .save("2023_06_01_Trip/20230601_120000.jpg", b"x")
            .unwrap();
        store.save("2023_06_01_Trip/extra.jpg", b"x").unwrap();
        store.save("2023_06_01_Trip/.DS_Store", b"x").unwrap();
        store.save("notes.txt", b"x").unwrap();

        let (stats, new_photos) = gallery.scan(false).await.unwrap();
        assert_eq!(stats.albums_added, 1);
        assert_eq!(stats.photos_added, 2);
        assert_eq!(new_photos.len(), 2);
        assert_eq!(stats.unmatched, 1); // notes.txt

        gallery
            .with_catalog(|catalog| {
                let album = catalog.find_album("Photos", "2023_06_01_Trip").unwrap();
                assert_eq!(album.name, "Trip");
                assert_eq!(
                    album.date,
                    NaiveDate::from_ymd_opt(2023, 6, 1).unwrap()
                );
                let photos = catalog.photos_of_album(album.id);
                assert_eq!(photos.len(), 2);
                // The timestamped pattern populated the photo date.
                let dated = catalog.find_photo(album.id, "20230601_120000.jpg").unwrap();
                assert_eq!(
                    dated.date,
                    NaiveDate::from_ymd_opt(2023, 6, 1)
                        .unwrap()
                        .and_hms_opt(12, 0, 0)
                );
                let plain = catalog.find_photo(album.id, "extra.jpg").unwrap();
                assert!(plain.date.is_none());
            })
            .await;
    }

    #[tokio::test]
    async fn rescan_is_stable_and_tracks_removals() {
        let gallery = test_gallery();
        let store = &gallery.storage.photo;
        store.save("2023_06_01_Trip/a.jpg", b"x").unwrap();
        store.save("2023_07_01_Other/b.jpg", b"x").unwrap();

        gallery.scan(false).await.unwrap();
        let (stats, _) = gallery.scan(false).await.unwrap();
        assert_eq!(stats, ScanStats::default());

        // Removing a directory removes the album and cascades its photos.
        store.delete("2023_07_01_Other/b.jpg").unwrap();
        let (stats, _) = gallery.scan(false).await.unwrap();
        assert_eq!(stats.albums_removed, 1);
        gallery
            .with_catalog(|catalog| {
                assert!(catalog.find_album("Photos", "2023_07_01_Other").is_none());
                assert_eq!(catalog.photos().count(), 1);
            })
            .await;
    }

    #[tokio::test]
    async fn full_sync_fixes_photo_dates() {
        let gallery = test_gallery();
        let store = &gallery.storage.photo;
        store.save("2023_06_01_Trip/a.jpg", b"x").unwrap();
        gallery.scan(false).await.unwrap();

        // Simulate a stale timestamp in the catalog.
        gallery
            .with_catalog_mut(|catalog| {
                let id = catalog.find_album("Photos", "2023_06_01_Trip").unwrap().id;
                let photo = catalog.find_photo(id, "a.jpg").unwrap().id;
                catalog.set_photo_date(
                    photo,
                    NaiveDate::from_ymd_opt(2000, 1, 1)
                        .unwrap()
                        .and_hms_opt(0, 0, 0),
                );
            })
            .await;

        // Plain scan leaves it alone; a full sync corrects it.
        let (stats, _) = gallery.scan(false).await.unwrap();
        assert_eq!(stats.dates_fixed, 0);
        let (stats, _) = gallery.scan(true).await.unwrap();
        assert_eq!(stats.dates_fixed, 1);
    }
}
