//! Derivative production: deterministic cache keys, EXIF auto-rotation,
//! center-crop, downscale, and the content-addressed cache in front of it.

use image::{DynamicImage, ImageFormat, imageops::FilterType};
use sha2::{Digest, Sha256};
use tracing::{debug, trace};

use super::types::{Album, Photo, PhotoId, ResizePreset};
use super::{Gallery, GalleryError, SharedGallery};

/// Where a produced derivative can be fetched from.
#[derive(Debug, Clone)]
pub struct DerivativeRef {
    /// Key in the cache store.
    pub name: String,
    pub path: Option<std::path::PathBuf>,
    pub url: Option<String>,
    /// True when the entry already existed and no transform ran.
    pub cache_hit: bool,
}

impl Gallery {
    /// Cache key for a derivative.
    ///
    /// A pure function of (secret, album id, photo id, preset), so the entry
    /// is immutable once written and concurrent producers are harmless. The
    /// album-date prefix keeps directory fan-out bounded.
    pub fn derivative_name(&self, photo: &Photo, album: &Album, preset: ResizePreset) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.config.secret_key.as_bytes());
        hasher.update(album.id.0.to_le_bytes());
        hasher.update(photo.id.0.to_le_bytes());
        hasher.update(preset.width.to_le_bytes());
        hasher.update(preset.height.to_le_bytes());
        hasher.update([preset.crop as u8]);
        let extension = photo
            .filename
            .rsplit_once('.')
            .map(|(_, ext)| format!(".{}", ext.to_lowercase()))
            .unwrap_or_default();
        format!(
            "{}/{:x}{}",
            album.date.format("%y%m"),
            hasher.finalize(),
            extension
        )
    }

    /// Produce (or reuse) a resized derivative of a photo.
    pub async fn resize(
        self: &SharedGallery,
        photo_id: PhotoId,
        preset_name: &str,
    ) -> Result<DerivativeRef, GalleryError> {
        let preset = self.preset(preset_name)?;

        let (photo, album) = {
            let catalog = self.catalog.read().await;
            let photo = catalog.photo(photo_id).ok_or(GalleryError::NotFound)?.clone();
            let album = catalog
                .album(photo.album)
                .ok_or(GalleryError::NotFound)?
                .clone();
            (photo, album)
        };

        let name = self.derivative_name(&photo, &album, preset);
        if self.storage.cache.exists(&name) {
            trace!("Derivative cache hit: {}", name);
            return Ok(self.derivative_ref(name, true));
        }

        debug!(
            "Producing derivative {} for {} ({}x{}, crop={})",
            name,
            photo.image_name(&album),
            preset.width,
            preset.height,
            preset.crop
        );

        let gallery = self.clone();
        let name_for_task = name.clone();
        tokio::task::spawn_blocking(move || {
            gallery.produce_derivative(&photo, &album, preset, &name_for_task)
        })
        .await??;

        Ok(self.derivative_ref(name, false))
    }

    fn derivative_ref(&self, name: String, cache_hit: bool) -> DerivativeRef {
        DerivativeRef {
            path: self.storage.cache.path(&name),
            url: self.storage.cache.url(&name),
            name,
            cache_hit,
        }
    }

    /// Blocking part of the pipeline: load, transform, encode, store.
    pub(crate) fn produce_derivative(
        &self,
        photo: &Photo,
        album: &Album,
        preset: ResizePreset,
        name: &str,
    ) -> Result<(), GalleryError> {
        let original = self.storage.photo.read(&photo.image_name(album))?;
        let bytes = transform_image(&original, preset, self.config.jpeg_quality)?;

        // A failed put must not leave a corrupt entry behind to be served as
        // a cache hit later.
        if let Err(e) = self.storage.cache.save(name, &bytes) {
            let _ = self.storage.cache.delete(name);
            return Err(e.into());
        }
        Ok(())
    }
}

/// Decode, auto-rotate, crop, downscale, and re-encode one image in its
/// original format.
pub(crate) fn transform_image(
    original: &[u8],
    preset: ResizePreset,
    jpeg_quality: u8,
) -> Result<Vec<u8>, GalleryError> {
    let format = image::guess_format(original)?;
    let mut img = image::load_from_memory_with_format(original, format)?;

    // Only JPEG carries EXIF orientation worth honoring here. Malformed or
    // absent EXIF blocks are common; they mean "no rotation", never an error.
    if format == ImageFormat::Jpeg {
        img = apply_exif_orientation(img, original);
    }

    if preset.crop {
        img = center_crop(img, preset.width, preset.height);
    }

    // Fit within the preset, preserving aspect ratio, never upscaling.
    let final_width = preset.width.min(img.width());
    let final_height = preset.height.min(img.height());
    if final_width != img.width() || final_height != img.height() {
        img = img.resize(final_width, final_height, FilterType::Lanczos3);
    }

    encode_image(&img, format, jpeg_quality)
}

fn apply_exif_orientation(img: DynamicImage, original: &[u8]) -> DynamicImage {
    let orientation = match read_exif_orientation(original) {
        Some(value) => value,
        None => return img,
    };
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        // 1 is the identity; values outside 1..=8 are invalid and left alone.
        _ => img,
    }
}

fn read_exif_orientation(original: &[u8]) -> Option<u16> {
    match rexif::parse_buffer_quiet(original).0 {
        Ok(exif) => exif
            .entries
            .iter()
            .find(|entry| entry.tag == rexif::ExifTag::Orientation)
            .and_then(|entry| match &entry.value {
                rexif::TagValue::U16(values) => values.first().copied(),
                _ => None,
            }),
        Err(e) => {
            trace!("No usable EXIF data: {}", e);
            None
        }
    }
}

/// Symmetric center crop to the target aspect ratio, integer arithmetic
/// throughout so the cropped region matches the target ratio exactly.
fn center_crop(img: DynamicImage, width: u32, height: u32) -> DynamicImage {
    let (image_width, image_height) = (img.width(), img.height());
    let lhs = width as u64 * image_height as u64;
    let rhs = image_width as u64 * height as u64;
    if lhs > rhs {
        // Source is too tall: trim equal margins top and bottom.
        let target_height = (image_width as u64 * height as u64 / width as u64) as u32;
        let top = (image_height - target_height) / 2;
        img.crop_imm(0, top, image_width, target_height)
    } else if lhs < rhs {
        // Source is too wide: trim equal margins left and right.
        let target_width = (image_height as u64 * width as u64 / height as u64) as u32;
        let left = (image_width - target_width) / 2;
        img.crop_imm(left, 0, target_width, image_height)
    } else {
        img
    }
}

fn encode_image(
    img: &DynamicImage,
    format: ImageFormat,
    jpeg_quality: u8,
) -> Result<Vec<u8>, GalleryError> {
    let mut buffer = std::io::Cursor::new(Vec::new());
    match format {
        ImageFormat::Jpeg => {
            // JPEG takes the configured quality; it has no alpha channel.
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder =
                image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, jpeg_quality);
            rgb.write_with_encoder(encoder)?;
        }
        _ => {
            // Other formats are written back with their default options.
            img.write_to(&mut buffer, format)?;
        }
    }
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::testutil::{decode_size, make_image_bytes};
    use crate::gallery::types::PhotoId;
    use crate::storage::StorageSet;
    use chrono::NaiveDate;
    use std::sync::Arc;

    fn preset(width: u32, height: u32, crop: bool) -> ResizePreset {
        ResizePreset { width, height, crop }
    }

    #[test]
    fn crop_to_square_yields_exact_preset_size() {
        let original = make_image_bytes(48, 36, ImageFormat::Jpeg);
        let out = transform_image(&original, preset(16, 16, true), 85).unwrap();
        assert_eq!(decode_size(&out), (16, 16));
    }

    #[test]
    fn fit_within_preserves_aspect() {
        let original = make_image_bytes(48, 36, ImageFormat::Jpeg);
        let out = transform_image(&original, preset(16, 16, false), 85).unwrap();
        assert_eq!(decode_size(&out), (16, 12));
    }

    #[test]
    fn vertical_source_fit_and_crop() {
        let original = make_image_bytes(36, 48, ImageFormat::Jpeg);
        let out = transform_image(&original, preset(16, 16, false), 85).unwrap();
        assert_eq!(decode_size(&out), (12, 16));
        let out = transform_image(&original, preset(16, 16, true), 85).unwrap();
        assert_eq!(decode_size(&out), (16, 16));
    }

    #[test]
    fn never_upscales() {
        let original = make_image_bytes(10, 8, ImageFormat::Jpeg);
        let out = transform_image(&original, preset(16, 16, false), 85).unwrap();
        assert_eq!(decode_size(&out), (10, 8));
    }

    #[test]
    fn keeps_original_format() {
        let original = make_image_bytes(36, 36, ImageFormat::Png);
        let out = transform_image(&original, preset(8, 8, true), 85).unwrap();
        assert_eq!(image::guess_format(&out).unwrap(), ImageFormat::Png);
        assert_eq!(decode_size(&out), (8, 8));
    }

    #[test]
    fn corrupt_source_propagates_decode_error() {
        let garbage = vec![0u8; 64];
        assert!(transform_image(&garbage, preset(8, 8, false), 85).is_err());
    }

    fn test_gallery() -> SharedGallery {
        let mut config = crate::GalleryConfig::default();
        config.secret_key = "test-secret".to_string();
        config
            .presets
            .insert("thumb".to_string(), preset(16, 16, true));
        Arc::new(Gallery::new(config, StorageSet::in_memory()).unwrap())
    }

    async fn seed_photo(gallery: &SharedGallery) -> PhotoId {
        let photo_id = gallery
            .with_catalog_mut(|catalog| {
                let album = catalog.add_album(
                    "default".to_string(),
                    "trip".to_string(),
                    NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
                    String::new(),
                );
                catalog.add_photo(album, "original.jpg".to_string(), None)
            })
            .await;
        gallery
            .storage
            .photo
            .save(
                "trip/original.jpg",
                &make_image_bytes(48, 36, ImageFormat::Jpeg),
            )
            .unwrap();
        photo_id
    }

    #[tokio::test]
    async fn resize_is_idempotent_and_cached() {
        let gallery = test_gallery();
        let photo_id = seed_photo(&gallery).await;

        let first = gallery.resize(photo_id, "thumb").await.unwrap();
        assert!(!first.cache_hit);
        assert!(gallery.storage.cache.exists(&first.name));

        let second = gallery.resize(photo_id, "thumb").await.unwrap();
        assert!(second.cache_hit);
        assert_eq!(first.name, second.name);

        let bytes = gallery.storage.cache.read(&first.name).unwrap();
        assert_eq!(decode_size(&bytes), (16, 16));
    }

    #[tokio::test]
    async fn derivative_name_is_deterministic_and_input_sensitive() {
        let gallery = test_gallery();
        let photo_id = seed_photo(&gallery).await;
        let (photo, album) = gallery
            .with_catalog(|catalog| {
                let photo = catalog.photo(photo_id).unwrap().clone();
                let album = catalog.album(photo.album).unwrap().clone();
                (photo, album)
            })
            .await;

        let a = gallery.derivative_name(&photo, &album, preset(16, 16, true));
        let b = gallery.derivative_name(&photo, &album, preset(16, 16, true));
        assert_eq!(a, b);
        // Prefix from the album date, extension from the original.
        assert!(a.starts_with("2306/"));
        assert!(a.ends_with(".jpg"));

        let c = gallery.derivative_name(&photo, &album, preset(16, 16, false));
        assert_ne!(a, c, "crop flag must change the key");
        let d = gallery.derivative_name(&photo, &album, preset(32, 16, true));
        assert_ne!(a, d, "dimensions must change the key");

        let mut other = photo.clone();
        other.id = PhotoId(999);
        let e = gallery.derivative_name(&other, &album, preset(16, 16, true));
        assert_ne!(a, e, "photo id must change the key");
    }

    #[tokio::test]
    async fn unknown_preset_is_a_configuration_error() {
        let gallery = test_gallery();
        let photo_id = seed_photo(&gallery).await;
        assert!(matches!(
            gallery.resize(photo_id, "missing").await,
            Err(GalleryError::UnknownPreset(_))
        ));
    }

    #[tokio::test]
    async fn missing_original_is_not_found() {
        let gallery = test_gallery();
        let photo_id = gallery
            .with_catalog_mut(|catalog| {
                let album = catalog.add_album(
                    "default".to_string(),
                    "empty".to_string(),
                    NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
                    String::new(),
                );
                catalog.add_photo(album, "ghost.jpg".to_string(), None)
            })
            .await;
        let err = gallery.resize(photo_id, "thumb").await.unwrap_err();
        assert!(err.is_not_found());
    }
}
