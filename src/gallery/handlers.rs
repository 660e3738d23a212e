//! HTTP surface of the gallery. Every handler resolves the viewer from the
//! signed cookie first and filters through the access module; entities the
//! viewer may not see 404 exactly like entities that do not exist.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Redirect, Response},
};
use chrono::{Datelike, NaiveDate, NaiveDateTime};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{error, warn};

use super::types::{Album, AlbumId, Photo, PhotoId, Viewer};
use super::{GalleryError, access};
use crate::AppState;
use crate::storage::Storage;

#[derive(Debug, Deserialize)]
pub struct GalleryQuery {
    pub year: Option<i32>,
    pub q: Option<String>,
    /// Presence alone turns the flag on (`?show_public`).
    pub show_public: Option<String>,
}

impl GalleryQuery {
    fn show_public(&self) -> bool {
        self.show_public.is_some()
    }
}

/// Whether public albums appear in listings for this request. Anonymous and
/// view-all viewers always see them; a signed-in viewer browsing their own
/// grants must opt in per request.
fn include_public(viewer: &Viewer, show_public: bool) -> bool {
    if viewer.can_view_all() || !viewer.is_authenticated() {
        return true;
    }
    show_public
}

fn not_found() -> Response {
    (StatusCode::NOT_FOUND, "Not found").into_response()
}

/// Derivative and archive keys are content-addressed, so entries never
/// change under a given name.
const IMMUTABLE_CACHE: &str = "public, max-age=31536000, immutable";
/// Originals keep their name across rescans while their bytes may change;
/// clients must revalidate against Last-Modified.
const REVALIDATE_CACHE: &str = "private, max-age=0, must-revalidate";

#[derive(Debug, Serialize)]
pub struct AlbumSummary {
    pub id: AlbumId,
    pub display_name: String,
    pub date: NaiveDate,
    pub category: String,
    pub photo_count: usize,
    /// Random sample of visible photo ids for preview tiles.
    pub preview: Vec<PhotoId>,
}

#[derive(Debug, Serialize)]
pub struct IndexResponse {
    pub albums: Vec<AlbumSummary>,
}

#[axum::debug_handler]
pub async fn index_handler(
    State(app_state): State<AppState>,
    Query(query): Query<GalleryQuery>,
    headers: HeaderMap,
) -> Json<IndexResponse> {
    let viewer = app_state.viewer(&headers);
    let catalog = app_state.gallery.catalog.read().await;

    let mut albums =
        access::visible_albums(&catalog, &viewer, include_public(&viewer, query.show_public()));
    if let Some(year) = query.year {
        albums.retain(|album| album.date.year() == year);
    }
    if let Some(q) = &query.q {
        let needle = q.to_lowercase();
        albums.retain(|album| album.display_name().to_lowercase().contains(&needle));
    }
    // Newest first.
    albums.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));

    let preview_count = app_state.config.gallery.preview_count;
    let albums = albums
        .iter()
        .map(|album| {
            let visible = access::visible_photos(&catalog, album, &viewer);
            AlbumSummary {
                id: album.id,
                display_name: album.display_name(),
                date: album.date,
                category: album.category.clone(),
                photo_count: visible.len(),
                preview: preview_sample(&visible, preview_count),
            }
        })
        .collect();

    Json(IndexResponse { albums })
}

/// Random sample of an album's photos for the index tiles, returned in
/// display order rather than draw order.
fn preview_sample(photos: &[&Photo], count: usize) -> Vec<PhotoId> {
    let mut rng = rand::rng();
    let mut sample = photos.to_vec();
    sample.shuffle(&mut rng);
    sample.truncate(count);
    sample.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    sample.iter().map(|photo| photo.id).collect()
}

#[derive(Debug, Serialize)]
pub struct PhotoSummary {
    pub id: PhotoId,
    pub filename: String,
    pub display_name: String,
    pub date: Option<NaiveDateTime>,
}

impl PhotoSummary {
    fn from_photo(photo: &Photo) -> Self {
        Self {
            id: photo.id,
            filename: photo.filename.clone(),
            display_name: photo.display_name(),
            date: photo.date,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AlbumDetail {
    pub id: AlbumId,
    pub display_name: String,
    pub date: NaiveDate,
    pub category: String,
    pub photos: Vec<PhotoSummary>,
    pub previous: Option<AlbumId>,
    pub next: Option<AlbumId>,
}

#[axum::debug_handler]
pub async fn album_handler(
    State(app_state): State<AppState>,
    Path(id): Path<u64>,
    Query(query): Query<GalleryQuery>,
    headers: HeaderMap,
) -> Response {
    let viewer = app_state.viewer(&headers);
    let catalog = app_state.gallery.catalog.read().await;

    let Some(album) = catalog.album(AlbumId(id)) else {
        return not_found();
    };
    if !access::album_allowed(album, &viewer) {
        return not_found();
    }

    // Neighbors come from the same listing the viewer navigated in.
    let neighbors =
        access::visible_albums(&catalog, &viewer, include_public(&viewer, query.show_public()));
    let photos = access::visible_photos(&catalog, album, &viewer)
        .iter()
        .map(|photo| PhotoSummary::from_photo(photo))
        .collect();

    Json(AlbumDetail {
        id: album.id,
        display_name: album.display_name(),
        date: album.date,
        category: album.category.clone(),
        photos,
        previous: album.previous_in(&neighbors).map(|a| a.id),
        next: album.next_in(&neighbors).map(|a| a.id),
    })
    .into_response()
}

#[axum::debug_handler]
pub async fn album_export_handler(
    State(app_state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    let viewer = app_state.viewer(&headers);
    let album_id = AlbumId(id);
    {
        let catalog = app_state.gallery.catalog.read().await;
        let Some(album) = catalog.album(album_id) else {
            return not_found();
        };
        if !access::album_allowed(album, &viewer) {
            return not_found();
        }
    }

    match app_state.gallery.export_album(album_id, &viewer).await {
        Ok(archive) => {
            serve_stored(
                &app_state.gallery.storage.cache,
                &archive.name,
                Some(&archive.filename),
                IMMUTABLE_CACHE,
            )
            .await
        }
        Err(e) if e.is_not_found() => not_found(),
        Err(e) => {
            error!("Failed to export album {}: {}", album_id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PhotoDetail {
    pub id: PhotoId,
    pub album: AlbumId,
    pub filename: String,
    pub display_name: String,
    pub date: Option<NaiveDateTime>,
    pub previous: Option<PhotoId>,
    pub next: Option<PhotoId>,
}

#[axum::debug_handler]
pub async fn photo_handler(
    State(app_state): State<AppState>,
    Path(id): Path<u64>,
    headers: HeaderMap,
) -> Response {
    let viewer = app_state.viewer(&headers);
    let catalog = app_state.gallery.catalog.read().await;

    let Some((photo, album)) = lookup_photo(&catalog, PhotoId(id), &viewer) else {
        return not_found();
    };

    let neighbors = access::visible_photos(&catalog, album, &viewer);
    Json(PhotoDetail {
        id: photo.id,
        album: album.id,
        filename: photo.filename.clone(),
        display_name: photo.display_name(),
        date: photo.date,
        previous: photo.previous_in(&neighbors).map(|p| p.id),
        next: photo.next_in(&neighbors).map(|p| p.id),
    })
    .into_response()
}

fn lookup_photo<'a>(
    catalog: &'a super::Catalog,
    id: PhotoId,
    viewer: &Viewer,
) -> Option<(&'a Photo, &'a Album)> {
    let photo = catalog.photo(id)?;
    let album = catalog.album(photo.album)?;
    if access::photo_allowed(photo, album, viewer) {
        Some((photo, album))
    } else {
        None
    }
}

/// Serves both derivative sizes and the original, selected by the path
/// segment. "original" is reserved and cannot collide with a preset name.
#[axum::debug_handler]
pub async fn photo_image_handler(
    State(app_state): State<AppState>,
    Path((id, size)): Path<(u64, String)>,
    headers: HeaderMap,
) -> Response {
    let viewer = app_state.viewer(&headers);
    let (photo, album) = {
        let catalog = app_state.gallery.catalog.read().await;
        match lookup_photo(&catalog, PhotoId(id), &viewer) {
            Some((photo, album)) => (photo.clone(), album.clone()),
            None => return not_found(),
        }
    };

    if size == "original" {
        return serve_stored(
            &app_state.gallery.storage.photo,
            &photo.image_name(&album),
            Some(&photo.filename),
            REVALIDATE_CACHE,
        )
        .await;
    }

    match app_state.gallery.resize(photo.id, &size).await {
        Ok(derivative) => {
            serve_stored(
                &app_state.gallery.storage.cache,
                &derivative.name,
                None,
                IMMUTABLE_CACHE,
            )
            .await
        }
        Err(GalleryError::UnknownPreset(name)) => {
            warn!("Unknown preset '{}' requested", name);
            (StatusCode::BAD_REQUEST, "Unknown size").into_response()
        }
        Err(e) if e.is_not_found() => not_found(),
        Err(e) => {
            error!("Failed to resize photo {}: {}", photo.id, e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[axum::debug_handler]
pub async fn latest_handler(
    State(app_state): State<AppState>,
    Query(query): Query<GalleryQuery>,
    headers: HeaderMap,
) -> Redirect {
    let viewer = app_state.viewer(&headers);
    let catalog = app_state.gallery.catalog.read().await;
    let albums =
        access::visible_albums(&catalog, &viewer, include_public(&viewer, query.show_public()));
    match albums.iter().max_by_key(|album| album.sort_key()) {
        Some(album) => Redirect::temporary(&format!("/albums/{}", album.id)),
        None => Redirect::temporary("/"),
    }
}

/// Serve an object from a store: stream it from the local path when the
/// backend has one, redirect when it only has a public URL, and fall back to
/// buffering for path-less in-process stores.
async fn serve_stored(
    store: &Storage,
    name: &str,
    attachment: Option<&str>,
    cache_control: &str,
) -> Response {
    let content_type = mime_guess::from_path(name).first_or_octet_stream();
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type.as_ref())
        .header(header::CACHE_CONTROL, cache_control);
    if let Some(filename) = attachment {
        response = response.header(
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", filename),
        );
    }
    if let Ok(modified) = store.modified(name) {
        response = response.header(header::LAST_MODIFIED, httpdate::fmt_http_date(modified));
    }

    if let Some(path) = store.path(name) {
        let file = match File::open(&path).await {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to open {:?}: {}", path, e);
                return not_found();
            }
        };
        let body = Body::from_stream(ReaderStream::new(file));
        return match response.body(body) {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to build response for {}: {}", name, e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        };
    }

    if let Some(url) = store.url(name) {
        return Redirect::temporary(&url).into_response();
    }

    match store.read(name) {
        Ok(bytes) => match response.body(Body::from(bytes)) {
            Ok(response) => response,
            Err(e) => {
                error!("Failed to build response for {}: {}", name, e);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(e) => {
            warn!("Failed to read {}: {}", name, e);
            not_found()
        }
    }
}
