use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::{Value, json};
use tempfile::TempDir;

use galleria::gallery::{AccessControl, AlbumAccessPolicy, AlbumId, Gallery, SharedGallery};
use galleria::storage::{StorageConfig, StorageSet};
use galleria::{AppState, Config, PatternConfig, ResizePreset, ScannerConfig, UserConfig};

fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.gallery.secret_key = "integration-secret".to_string();
    config.gallery.presets.insert(
        "thumb".to_string(),
        ResizePreset {
            width: 16,
            height: 16,
            crop: true,
        },
    );
    config.gallery.scanner = ScannerConfig {
        patterns: vec![PatternConfig {
            category: "Photos".to_string(),
            pattern:
                r"(?P<a_year>\d{4})_(?P<a_month>\d{2})_(?P<a_day>\d{2})_(?P<a_name>[^/]+)/[^/]+\.jpg$"
                    .to_string(),
        }],
        ignores: vec![],
    };
    config.storage.photo = StorageConfig::filesystem(temp_dir.path().join("photos"));
    config.storage.cache = StorageConfig::filesystem(temp_dir.path().join("cache"));
    config.users = vec![
        UserConfig {
            username: "alice".to_string(),
            password: "wonderland".to_string(),
            groups: vec!["family".to_string()],
            view_all: false,
        },
        UserConfig {
            username: "admin".to_string(),
            password: "s3cret".to_string(),
            groups: vec![],
            view_all: true,
        },
    ];
    config
}

fn write_jpeg(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let img = image::RgbImage::from_fn(48, 36, |x, y| {
        image::Rgb([(x * 5) as u8, (y * 7) as u8, 128])
    });
    image::DynamicImage::ImageRgb8(img)
        .save_with_format(path, image::ImageFormat::Jpeg)
        .unwrap();
}

/// One public album ("Trip", two photos) and one group-restricted album
/// ("Family", one photo, group `family`), scanned from disk.
async fn seed_and_start(temp_dir: &TempDir) -> (TestServer, SharedGallery, AlbumId, AlbumId) {
    let photos = temp_dir.path().join("photos");
    write_jpeg(&photos.join("2023_06_01_Trip/a.jpg"));
    write_jpeg(&photos.join("2023_06_01_Trip/b.jpg"));
    write_jpeg(&photos.join("2023_07_01_Family/c.jpg"));

    let config = test_config(temp_dir);
    let storage = StorageSet::from_config(&config.storage.photo, &config.storage.cache);
    let gallery: SharedGallery = Arc::new(Gallery::new(config.gallery.clone(), storage).unwrap());
    gallery.scan(false).await.unwrap();

    let (trip, family) = gallery
        .with_catalog_mut(|catalog| {
            let trip = catalog.find_album("Photos", "2023_06_01_Trip").unwrap().id;
            let family = catalog
                .find_album("Photos", "2023_07_01_Family")
                .unwrap()
                .id;
            catalog.set_album_policy(
                trip,
                Some(AlbumAccessPolicy {
                    access: AccessControl::public(),
                    inherit: true,
                }),
            );
            catalog.set_album_policy(
                family,
                Some(AlbumAccessPolicy {
                    access: AccessControl {
                        public: false,
                        groups: ["family".to_string()].into(),
                        users: Default::default(),
                    },
                    inherit: true,
                }),
            );
            (trip, family)
        })
        .await;

    let app_state = AppState {
        gallery: gallery.clone(),
        config: Arc::new(config),
    };
    let mut server = TestServer::new(galleria::router(app_state)).unwrap();
    server.save_cookies();
    (server, gallery, trip, family)
}

async fn login(server: &TestServer, username: &str, password: &str) {
    let response = server
        .post("/api/login")
        .json(&json!({ "username": username, "password": password }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["success"], json!(true));
}

fn album_names(body: &Value) -> Vec<String> {
    body["albums"]
        .as_array()
        .unwrap()
        .iter()
        .map(|album| album["display_name"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn index_shows_only_visible_albums() {
    let temp_dir = TempDir::new().unwrap();
    let (server, gallery, trip_id, _) = seed_and_start(&temp_dir).await;
    let (a, b) = gallery
        .with_catalog(|catalog| {
            (
                catalog.find_photo(trip_id, "a.jpg").unwrap().id,
                catalog.find_photo(trip_id, "b.jpg").unwrap().id,
            )
        })
        .await;

    let body = server.get("/").await.json::<Value>();
    assert_eq!(album_names(&body), vec!["Trip"]);
    let trip = &body["albums"][0];
    assert_eq!(trip["photo_count"], json!(2));
    // The sample covers the whole album here, so it must come back in
    // display order, not draw order.
    assert_eq!(trip["preview"], json!([a.0, b.0]));

    // Newest first once the restricted album becomes visible.
    login(&server, "admin", "s3cret").await;
    let body = server.get("/").await.json::<Value>();
    assert_eq!(album_names(&body), vec!["Family", "Trip"]);
}

#[tokio::test]
async fn signed_in_viewer_opts_into_public_albums() {
    let temp_dir = TempDir::new().unwrap();
    let (server, _gallery, _, _) = seed_and_start(&temp_dir).await;
    login(&server, "alice", "wonderland").await;

    // Own grants only by default.
    let body = server.get("/").await.json::<Value>();
    assert_eq!(album_names(&body), vec!["Family"]);

    let body = server.get("/?show_public").await.json::<Value>();
    assert_eq!(album_names(&body), vec!["Family", "Trip"]);
}

#[tokio::test]
async fn index_filters_by_year_and_name() {
    let temp_dir = TempDir::new().unwrap();
    let (server, _gallery, _, _) = seed_and_start(&temp_dir).await;

    let body = server.get("/?q=trip").await.json::<Value>();
    assert_eq!(album_names(&body), vec!["Trip"]);
    let body = server.get("/?q=family").await.json::<Value>();
    assert!(album_names(&body).is_empty());
    let body = server.get("/?year=2022").await.json::<Value>();
    assert!(album_names(&body).is_empty());
}

#[tokio::test]
async fn restricted_entities_are_indistinguishable_from_missing() {
    let temp_dir = TempDir::new().unwrap();
    let (server, gallery, _, family) = seed_and_start(&temp_dir).await;

    let photo = gallery
        .with_catalog(|catalog| catalog.find_photo(family, "c.jpg").unwrap().id)
        .await;

    server
        .get(&format!("/albums/{}", family))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get(&format!("/photos/{}", photo))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get(&format!("/photos/{}/thumb", photo))
        .await
        .assert_status(StatusCode::NOT_FOUND);
    server
        .get("/albums/424242")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    // The same URLs work for a viewer in the granted group.
    login(&server, "alice", "wonderland").await;
    server
        .get(&format!("/albums/{}", family))
        .await
        .assert_status_ok();
    server
        .get(&format!("/photos/{}", photo))
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn album_detail_lists_photos_in_order() {
    let temp_dir = TempDir::new().unwrap();
    let (server, _gallery, trip, _) = seed_and_start(&temp_dir).await;

    let body = server.get(&format!("/albums/{}", trip)).await.json::<Value>();
    assert_eq!(body["display_name"], json!("Trip"));
    let filenames: Vec<&str> = body["photos"]
        .as_array()
        .unwrap()
        .iter()
        .map(|photo| photo["filename"].as_str().unwrap())
        .collect();
    assert_eq!(filenames, vec!["a.jpg", "b.jpg"]);
    // The other album is invisible to anonymous, so there are no neighbors.
    assert_eq!(body["previous"], Value::Null);
    assert_eq!(body["next"], Value::Null);
}

#[tokio::test]
async fn photo_detail_has_navigation_within_album() {
    let temp_dir = TempDir::new().unwrap();
    let (server, gallery, trip, _) = seed_and_start(&temp_dir).await;

    let (a, b) = gallery
        .with_catalog(|catalog| {
            (
                catalog.find_photo(trip, "a.jpg").unwrap().id,
                catalog.find_photo(trip, "b.jpg").unwrap().id,
            )
        })
        .await;

    let body = server.get(&format!("/photos/{}", a)).await.json::<Value>();
    assert_eq!(body["filename"], json!("a.jpg"));
    assert_eq!(body["previous"], Value::Null);
    assert_eq!(body["next"], json!(b.0));

    let body = server.get(&format!("/photos/{}", b)).await.json::<Value>();
    assert_eq!(body["previous"], json!(a.0));
    assert_eq!(body["next"], Value::Null);
}

#[tokio::test]
async fn derivative_is_served_with_cache_headers() {
    let temp_dir = TempDir::new().unwrap();
    let (server, gallery, trip, _) = seed_and_start(&temp_dir).await;
    let photo = gallery
        .with_catalog(|catalog| catalog.find_photo(trip, "a.jpg").unwrap().id)
        .await;

    let response = server.get(&format!("/photos/{}/thumb", photo)).await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "image/jpeg");
    assert!(
        response
            .header("cache-control")
            .to_str()
            .unwrap()
            .contains("immutable")
    );
    assert!(!response.header("last-modified").is_empty());

    let img = image::load_from_memory(response.as_bytes()).unwrap();
    assert_eq!((img.width(), img.height()), (16, 16));
}

#[tokio::test]
async fn original_download_and_bad_preset() {
    let temp_dir = TempDir::new().unwrap();
    let (server, gallery, trip, _) = seed_and_start(&temp_dir).await;
    let photo = gallery
        .with_catalog(|catalog| catalog.find_photo(trip, "a.jpg").unwrap().id)
        .await;

    let response = server.get(&format!("/photos/{}/original", photo)).await;
    response.assert_status_ok();
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"a.jpg\""
    );
    // Unlike derivatives, originals can change under the same id after a
    // rescan, so they must not be cached as immutable.
    assert_eq!(
        response.header("cache-control"),
        "private, max-age=0, must-revalidate"
    );
    assert!(!response.header("last-modified").is_empty());
    let img = image::load_from_memory(response.as_bytes()).unwrap();
    assert_eq!((img.width(), img.height()), (48, 36));

    server
        .get(&format!("/photos/{}/enormous", photo))
        .await
        .assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn export_streams_a_zip_of_visible_photos() {
    let temp_dir = TempDir::new().unwrap();
    let (server, _gallery, trip, family) = seed_and_start(&temp_dir).await;

    let response = server.get(&format!("/albums/{}/export", trip)).await;
    response.assert_status_ok();
    assert_eq!(response.header("content-type"), "application/zip");
    assert_eq!(
        response.header("content-disposition"),
        "attachment; filename=\"2023-06-01_Trip.zip\""
    );

    let reader = std::io::Cursor::new(response.as_bytes().to_vec());
    let archive = zip::ZipArchive::new(reader).unwrap();
    let mut names: Vec<&str> = archive.file_names().collect();
    names.sort();
    assert_eq!(names, vec!["a.jpg", "b.jpg"]);

    // Export of an invisible album 404s like any other access.
    server
        .get(&format!("/albums/{}/export", family))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn latest_redirects_to_newest_visible_album() {
    let temp_dir = TempDir::new().unwrap();
    let (server, _gallery, trip, family) = seed_and_start(&temp_dir).await;

    let response = server.get("/latest").await;
    response.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.header("location"), format!("/albums/{}", trip));

    // The Family album is newer and visible to alice.
    login(&server, "alice", "wonderland").await;
    let response = server.get("/latest").await;
    response.assert_status(StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.header("location"), format!("/albums/{}", family));
}

#[tokio::test]
async fn create_app_builds_a_working_router() {
    let temp_dir = TempDir::new().unwrap();
    std::fs::create_dir_all(temp_dir.path().join("photos")).unwrap();

    let (app, gallery) = galleria::create_app(test_config(&temp_dir)).unwrap();
    let server = TestServer::new(app).unwrap();

    let body = server.get("/").await.json::<Value>();
    assert!(body["albums"].as_array().unwrap().is_empty());

    // The returned handle is the one behind the router.
    gallery.save_catalog().await.unwrap();
    assert!(temp_dir.path().join("cache").join("catalog.json").exists());
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let temp_dir = TempDir::new().unwrap();
    let (server, _gallery, _, _) = seed_and_start(&temp_dir).await;

    let response = server
        .post("/api/login")
        .json(&json!({ "username": "alice", "password": "wrong" }))
        .await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["success"], json!(false));

    let body = server.get("/api/verify").await.json::<Value>();
    assert_eq!(body["authorized"], json!(false));

    login(&server, "alice", "wonderland").await;
    let body = server.get("/api/verify").await.json::<Value>();
    assert_eq!(body["authorized"], json!(true));
    assert_eq!(body["username"], json!("alice"));
}
