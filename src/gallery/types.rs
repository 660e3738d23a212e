use std::collections::BTreeSet;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlbumId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhotoId(pub u64);

impl std::fmt::Display for AlbumId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for PhotoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// The shared shape of an access policy: a public flag plus explicit group
/// and user grants. `allows` in the access module is the only consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub groups: BTreeSet<String>,
    #[serde(default)]
    pub users: BTreeSet<String>,
}

impl AccessControl {
    pub fn public() -> Self {
        Self {
            public: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlbumAccessPolicy {
    #[serde(flatten)]
    pub access: AccessControl,
    /// Photos without a policy of their own borrow this album's policy.
    #[serde(default = "default_inherit")]
    pub inherit: bool,
}

fn default_inherit() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhotoAccessPolicy {
    #[serde(flatten)]
    pub access: AccessControl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Album {
    pub id: AlbumId,
    pub category: String,
    pub dirpath: String,
    pub date: NaiveDate,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_policy: Option<AlbumAccessPolicy>,
}

impl Album {
    pub fn display_name(&self) -> String {
        if self.name.is_empty() {
            self.dirpath.replace('/', " > ")
        } else {
            self.name.clone()
        }
    }

    /// Ordering key for navigation, ties broken field by field.
    pub fn sort_key(&self) -> (NaiveDate, &str, &str, &str) {
        (self.date, &self.name, &self.dirpath, &self.category)
    }

    /// Least album strictly after this one, among the candidates.
    pub fn next_in<'a>(&self, albums: &[&'a Album]) -> Option<&'a Album> {
        albums
            .iter()
            .filter(|other| other.sort_key() > self.sort_key())
            .min_by_key(|other| other.sort_key())
            .copied()
    }

    /// Greatest album strictly before this one, among the candidates.
    pub fn previous_in<'a>(&self, albums: &[&'a Album]) -> Option<&'a Album> {
        albums
            .iter()
            .filter(|other| other.sort_key() < self.sort_key())
            .max_by_key(|other| other.sort_key())
            .copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    pub album: AlbumId,
    pub filename: String,
    #[serde(default)]
    pub date: Option<NaiveDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_policy: Option<PhotoAccessPolicy>,
}

impl Photo {
    pub fn display_name(&self) -> String {
        match self.date {
            Some(date) => date.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => self
                .filename
                .rsplit_once('.')
                .map(|(stem, _)| stem.to_string())
                .unwrap_or_else(|| self.filename.clone()),
        }
    }

    /// Key of the original in the photo store.
    pub fn image_name(&self, album: &Album) -> String {
        format!("{}/{}", album.dirpath, self.filename)
    }

    /// Ordering key for navigation. A photo without a date sorts before any
    /// photo that has one; `Option`'s ordering gives exactly that, and the
    /// same key serves both directions so neighbors stay symmetric.
    pub fn sort_key(&self) -> (Option<NaiveDateTime>, &str) {
        (self.date, &self.filename)
    }

    pub fn next_in<'a>(&self, photos: &[&'a Photo]) -> Option<&'a Photo> {
        photos
            .iter()
            .filter(|other| other.sort_key() > self.sort_key())
            .min_by_key(|other| other.sort_key())
            .copied()
    }

    pub fn previous_in<'a>(&self, photos: &[&'a Photo]) -> Option<&'a Photo> {
        photos
            .iter()
            .filter(|other| other.sort_key() < self.sort_key())
            .max_by_key(|other| other.sort_key())
            .copied()
    }
}

/// Who is looking at the gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Viewer {
    Anonymous,
    User(UserIdentity),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub username: String,
    pub groups: BTreeSet<String>,
    /// Blanket capability: bypasses every per-entity policy check.
    pub view_all: bool,
}

impl Viewer {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Viewer::User(_))
    }

    pub fn can_view_all(&self) -> bool {
        matches!(self, Viewer::User(identity) if identity.view_all)
    }

    pub fn username(&self) -> Option<&str> {
        match self {
            Viewer::Anonymous => None,
            Viewer::User(identity) => Some(&identity.username),
        }
    }
}

/// Named target shape for derivatives. Presets are configuration, not data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResizePreset {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub crop: bool,
}
