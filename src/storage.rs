//! Named blob stores backing the gallery.
//!
//! Two instances are configured per deployment: `photo` holds the originals
//! and `cache` holds resized derivatives and export archives. Backends form a
//! closed enum resolved from configuration at startup.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("object not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Filesystem,
    Memory,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    #[serde(default)]
    pub root: PathBuf,
    /// Public URL prefix for objects, when the store is exposed directly.
    #[serde(default)]
    pub base_url: Option<String>,
}

impl StorageConfig {
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: StorageBackend::Filesystem,
            root: root.into(),
            base_url: None,
        }
    }
}

pub enum Storage {
    Filesystem(FilesystemStorage),
    Memory(MemoryStorage),
}

impl Storage {
    pub fn from_config(config: &StorageConfig) -> Self {
        match config.backend {
            StorageBackend::Filesystem => Storage::Filesystem(FilesystemStorage {
                root: config.root.clone(),
                base_url: config.base_url.clone(),
            }),
            StorageBackend::Memory => Storage::Memory(MemoryStorage::new()),
        }
    }

    pub fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        match self {
            Storage::Filesystem(fs) => fs.open(name),
            Storage::Memory(mem) => mem.open(name),
        }
    }

    /// Read an object fully into memory.
    pub fn read(&self, name: &str) -> Result<Vec<u8>, StorageError> {
        let mut reader = self.open(name)?;
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        Ok(buffer)
    }

    pub fn save(&self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        self.save_reader(name, &mut io::Cursor::new(data))
    }

    /// Stream an object into the store without holding it in memory.
    pub fn save_reader(&self, name: &str, reader: &mut dyn Read) -> Result<(), StorageError> {
        match self {
            Storage::Filesystem(fs) => fs.save_reader(name, reader),
            Storage::Memory(mem) => mem.save_reader(name, reader),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        match self {
            Storage::Filesystem(fs) => fs.full_path(name).exists(),
            Storage::Memory(mem) => mem.objects.lock().unwrap().contains_key(name),
        }
    }

    pub fn delete(&self, name: &str) -> Result<(), StorageError> {
        match self {
            Storage::Filesystem(fs) => Ok(std::fs::remove_file(fs.full_path(name))?),
            Storage::Memory(mem) => {
                mem.objects
                    .lock()
                    .unwrap()
                    .remove(name)
                    .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
                Ok(())
            }
        }
    }

    /// List the immediate subdirectories and files under a prefix.
    pub fn listdir(&self, prefix: &str) -> Result<(Vec<String>, Vec<String>), StorageError> {
        match self {
            Storage::Filesystem(fs) => fs.listdir(prefix),
            Storage::Memory(mem) => Ok(mem.listdir(prefix)),
        }
    }

    pub fn modified(&self, name: &str) -> Result<SystemTime, StorageError> {
        match self {
            Storage::Filesystem(fs) => Ok(std::fs::metadata(fs.full_path(name))?.modified()?),
            Storage::Memory(mem) => mem
                .objects
                .lock()
                .unwrap()
                .get(name)
                .map(|entry| entry.modified)
                .ok_or_else(|| StorageError::NotFound(name.to_string())),
        }
    }

    /// Local filesystem path of an object, when the backend has one.
    pub fn path(&self, name: &str) -> Option<PathBuf> {
        match self {
            Storage::Filesystem(fs) => Some(fs.full_path(name)),
            Storage::Memory(_) => None,
        }
    }

    /// Public URL of an object, when the store is exposed over HTTP.
    pub fn url(&self, name: &str) -> Option<String> {
        match self {
            Storage::Filesystem(fs) => fs
                .base_url
                .as_ref()
                .map(|base| format!("{}/{}", base.trim_end_matches('/'), name)),
            Storage::Memory(_) => None,
        }
    }
}

pub struct FilesystemStorage {
    root: PathBuf,
    base_url: Option<String>,
}

impl FilesystemStorage {
    fn full_path(&self, name: &str) -> PathBuf {
        let mut path = self.root.clone();
        for part in name.split('/') {
            path.push(part);
        }
        path
    }

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let path = self.full_path(name);
        match std::fs::File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn save_reader(&self, name: &str, reader: &mut dyn Read) -> Result<(), StorageError> {
        let path = self.full_path(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&path)?;
        io::copy(reader, &mut file)?;
        Ok(())
    }

    fn listdir(&self, prefix: &str) -> Result<(Vec<String>, Vec<String>), StorageError> {
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.full_path(prefix)
        };
        let mut subdirs = Vec::new();
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type()?.is_dir() {
                subdirs.push(name);
            } else {
                files.push(name);
            }
        }
        subdirs.sort();
        files.sort();
        Ok((subdirs, files))
    }
}

struct MemoryObject {
    data: Vec<u8>,
    modified: SystemTime,
}

/// In-memory store, used by the test suite.
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, MemoryObject>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
        }
    }

    fn open(&self, name: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        let objects = self.objects.lock().unwrap();
        let object = objects
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(Box::new(io::Cursor::new(object.data.clone())))
    }

    fn save_reader(&self, name: &str, reader: &mut dyn Read) -> Result<(), StorageError> {
        let mut data = Vec::new();
        reader.read_to_end(&mut data)?;
        self.objects.lock().unwrap().insert(
            name.to_string(),
            MemoryObject {
                data,
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    fn listdir(&self, prefix: &str) -> (Vec<String>, Vec<String>) {
        let objects = self.objects.lock().unwrap();
        let mut subdirs = Vec::new();
        let mut files = Vec::new();
        for key in objects.keys() {
            let rest = if prefix.is_empty() {
                key.as_str()
            } else if let Some(rest) = key
                .strip_prefix(prefix)
                .and_then(|rest| rest.strip_prefix('/'))
            {
                rest
            } else {
                continue;
            };
            match rest.split_once('/') {
                Some((dir, _)) => {
                    if !subdirs.iter().any(|d| d == dir) {
                        subdirs.push(dir.to_string());
                    }
                }
                None => files.push(rest.to_string()),
            }
        }
        subdirs.sort();
        files.sort();
        (subdirs, files)
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// The two stores every deployment configures, resolved once at startup.
pub struct StorageSet {
    pub photo: Storage,
    pub cache: Storage,
}

impl StorageSet {
    pub fn from_config(photo: &StorageConfig, cache: &StorageConfig) -> Self {
        Self {
            photo: Storage::from_config(photo),
            cache: Storage::from_config(cache),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            photo: Storage::Memory(MemoryStorage::new()),
            cache: Storage::Memory(MemoryStorage::new()),
        }
    }
}
