//! Signed-cookie authentication. The cookie carries the username plus an
//! HMAC-SHA256 signature over it; user accounts, groups, and the view-all
//! capability live in configuration.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Json},
};
use base64::{Engine, engine::general_purpose};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, warn};

use crate::AppState;
use crate::gallery::{UserIdentity, Viewer};

type HmacSha256 = Hmac<Sha256>;

pub const AUTH_COOKIE: &str = "auth";

pub fn create_signed_cookie(secret: &str, value: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(value.as_bytes());
    let signature = mac.finalize().into_bytes();
    let signature_b64 = general_purpose::URL_SAFE_NO_PAD.encode(signature);
    Some(format!("{}:{}", value, signature_b64))
}

pub fn verify_signed_cookie(secret: &str, signed_value: &str) -> bool {
    if let Some((value, signature_b64)) = signed_value.rsplit_once(':')
        && let Ok(signature) = general_purpose::URL_SAFE_NO_PAD.decode(signature_b64)
        && let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes())
    {
        mac.update(value.as_bytes());
        return mac.verify_slice(&signature).is_ok();
    }
    false
}

pub fn get_cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get("cookie")?
        .to_str()
        .ok()?
        .split(';')
        .find_map(|cookie| {
            let (key, value) = cookie.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
}

/// Resolve the viewer for a request. A missing, malformed, or forged cookie
/// degrades to anonymous, as does a username no longer in configuration.
pub fn resolve_viewer(headers: &HeaderMap, config: &crate::Config) -> Viewer {
    let Some(signed_value) = get_cookie_value(headers, AUTH_COOKIE) else {
        return Viewer::Anonymous;
    };
    if !verify_signed_cookie(&config.gallery.secret_key, &signed_value) {
        return Viewer::Anonymous;
    }
    let Some((username, _)) = signed_value.rsplit_once(':') else {
        return Viewer::Anonymous;
    };
    match config.users.iter().find(|user| user.username == username) {
        Some(user) => Viewer::User(UserIdentity {
            username: user.username.clone(),
            groups: user.groups.iter().cloned().collect(),
            view_all: user.view_all,
        }),
        None => {
            warn!("Valid cookie for unknown user '{}'", username);
            Viewer::Anonymous
        }
    }
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
pub struct VerifyResponse {
    authorized: bool,
    username: Option<String>,
}

#[axum::debug_handler]
pub async fn login_handler(
    State(app_state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, StatusCode> {
    let config = &app_state.config;
    let matched = config
        .users
        .iter()
        .find(|user| user.username == payload.username && user.password == payload.password);

    if matched.is_none() {
        warn!("Login failed for '{}'", payload.username);
        return Ok((
            HeaderMap::new(),
            Json(LoginResponse {
                success: false,
                message: "Invalid username or password".to_string(),
            }),
        ));
    }

    let signed_value = create_signed_cookie(&config.gallery.secret_key, &payload.username)
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;
    let cookie = format!(
        "{}={}; Path=/; Max-Age=86400; HttpOnly; SameSite=Lax",
        AUTH_COOKIE, signed_value
    );
    let mut headers = HeaderMap::new();
    headers.insert(
        SET_COOKIE,
        cookie.parse().map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?,
    );

    info!("Login succeeded for '{}'", payload.username);
    Ok((
        headers,
        Json(LoginResponse {
            success: true,
            message: "Login successful".to_string(),
        }),
    ))
}

#[axum::debug_handler]
pub async fn verify_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
) -> Json<VerifyResponse> {
    match resolve_viewer(&headers, &app_state.config) {
        Viewer::Anonymous => Json(VerifyResponse {
            authorized: false,
            username: None,
        }),
        Viewer::User(identity) => Json(VerifyResponse {
            authorized: true,
            username: Some(identity.username),
        }),
    }
}
