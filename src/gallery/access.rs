//! Access policy resolution.
//!
//! Everything here is pure decision logic: policies and viewers go in, a
//! boolean or a filtered set comes out. Enforcement happens by omission, the
//! handlers never expose an entity these functions rejected.

use super::catalog::Catalog;
use super::types::{AccessControl, Album, Photo, Viewer};

/// Core predicate over the shared policy shape.
///
/// True iff the policy is public, or the viewer is authenticated and is
/// either named directly or shares a group with the policy.
pub fn allows(access: &AccessControl, viewer: &Viewer) -> bool {
    if access.public {
        return true;
    }
    explicitly_granted(access, viewer)
}

/// Grant by name or group only, ignoring the public flag.
fn explicitly_granted(access: &AccessControl, viewer: &Viewer) -> bool {
    match viewer {
        Viewer::Anonymous => false,
        Viewer::User(identity) => {
            identity.groups.iter().any(|g| access.groups.contains(g))
                || access.users.contains(&identity.username)
        }
    }
}

/// The policy that actually governs a photo: its own when present, else the
/// album's when that one allows inheritance. The own-policy check comes
/// first unconditionally, so a restrictive photo policy is never widened by
/// a permissive album policy.
pub fn effective_photo_policy<'a>(photo: &'a Photo, album: &'a Album) -> Option<&'a AccessControl> {
    if let Some(policy) = &photo.access_policy {
        return Some(&policy.access);
    }
    match &album.access_policy {
        Some(policy) if policy.inherit => Some(&policy.access),
        _ => None,
    }
}

/// Albums have no parent to inherit from: only their own policy counts.
/// An album without a policy is hidden from everyone except blanket viewers.
pub fn album_allowed(album: &Album, viewer: &Viewer) -> bool {
    if viewer.can_view_all() {
        return true;
    }
    match &album.access_policy {
        Some(policy) => allows(&policy.access, viewer),
        None => false,
    }
}

pub fn photo_allowed(photo: &Photo, album: &Album, viewer: &Viewer) -> bool {
    if viewer.can_view_all() {
        return true;
    }
    match effective_photo_policy(photo, album) {
        Some(access) => allows(access, viewer),
        None => false,
    }
}

/// Albums the viewer may see, in navigation order.
///
/// `include_public` mirrors the index page toggle: when false, public albums
/// are listed only if the viewer also holds an explicit grant. Blanket
/// viewers see every album regardless.
pub fn visible_albums<'a>(
    catalog: &'a Catalog,
    viewer: &Viewer,
    include_public: bool,
) -> Vec<&'a Album> {
    let mut albums: Vec<&Album> = catalog
        .albums()
        .filter(|album| {
            if viewer.can_view_all() {
                return true;
            }
            match &album.access_policy {
                Some(policy) => {
                    (include_public && policy.access.public)
                        || explicitly_granted(&policy.access, viewer)
                }
                None => false,
            }
        })
        .collect();
    albums.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
    albums
}

/// Photos of one album the viewer may see, in navigation order.
pub fn visible_photos<'a>(
    catalog: &'a Catalog,
    album: &'a Album,
    viewer: &Viewer,
) -> Vec<&'a Photo> {
    catalog
        .photos_of_album(album.id)
        .into_iter()
        .filter(|photo| photo_allowed(photo, album, viewer))
        .collect()
}
