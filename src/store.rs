// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Key/value persistence over a directory.
//!
//! Keys look like `{namespace}:{id}`. Each value is one file whose name is the
//! percent-encoded key. Writes go to a temporary file that is renamed into place,
//! so a reader never sees a partial value.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::fs;
use tracing::{debug, warn};

use crate::project::{ControllerProfile, Project};

pub const PROJECTS: &str = "projects";
pub const PROFILES: &str = "profiles";
pub const SAMPLES: &str = "samples";

const TMP_SUFFIX: &str = ".tmp";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unable to (de)serialize {key}: {source}")]
    Serialization {
        key: String,
        source: serde_json::Error,
    },

    #[error("nothing stored under {0}")]
    Missing(String),
}

/// Builds a key in a namespace.
pub fn key(namespace: &str, id: &str) -> String {
    format!("{}:{}", namespace, id)
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_'
}

/// Percent-encodes everything but alphanumerics, `-` and `_`. Encoded names never
/// contain `.`, which leaves that free for temporary files.
fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        if is_plain(byte) {
            encoded.push(byte as char);
        } else {
            encoded.push_str(&format!("%{:02X}", byte));
        }
    }
    encoded
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' => {
                let hex = name.get(i + 1..i + 3)?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            byte if is_plain(byte) => {
                decoded.push(byte);
                i += 1;
            }
            _ => return None,
        }
    }
    String::from_utf8(decoded).ok()
}

/// A directory of keyed values.
#[derive(Clone, Debug)]
pub struct Store {
    dir: PathBuf,
}

impl Store {
    /// Opens the store, creating the directory if needed.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Store, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        debug!(dir = %dir.display(), "Opened store");
        Ok(Store { dir })
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(encode_key(key))
    }

    pub async fn save(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path(key);
        let mut tmp = path.clone().into_os_string();
        tmp.push(TMP_SUFFIX);

        fs::write(&tmp, value).await?;
        fs::rename(&tmp, &path).await?;
        debug!(key, bytes = value.len(), "Saved");
        Ok(())
    }

    /// Loads a value, or nothing if the key is not stored.
    pub async fn load(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(self.path(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removes a value. Returns false if nothing was stored under the key.
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        match fs::remove_file(self.path(key)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every stored key starting with the prefix, sorted.
    pub async fn list_keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.ends_with(TMP_SUFFIX) {
                continue;
            }
            match decode_key(name) {
                Some(key) if key.starts_with(prefix) => keys.push(key),
                Some(_) => {}
                None => warn!(file = name, "Ignoring unrecognized file in store"),
            }
        }
        keys.sort();
        Ok(keys)
    }

    /// The ids stored in a namespace.
    pub async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StoreError> {
        let prefix = key(namespace, "");
        Ok(self
            .list_keys_with_prefix(&prefix)
            .await?
            .into_iter()
            .filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value).map_err(|source| StoreError::Serialization {
            key: key.to_string(),
            source,
        })?;
        self.save(key, &bytes).await
    }

    async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.load(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| StoreError::Serialization {
                key: key.to_string(),
                source,
            })
    }

    pub async fn save_project(&self, id: &str, project: &Project) -> Result<(), StoreError> {
        self.save_json(&key(PROJECTS, id), project).await
    }

    pub async fn load_project(&self, id: &str) -> Result<Option<Project>, StoreError> {
        self.load_json(&key(PROJECTS, id)).await
    }

    pub async fn list_projects(&self) -> Result<Vec<String>, StoreError> {
        self.list_ids(PROJECTS).await
    }

    /// Saves a profile under its own id.
    pub async fn save_profile(&self, profile: &ControllerProfile) -> Result<(), StoreError> {
        self.save_json(&key(PROFILES, &profile.id), profile).await
    }

    pub async fn load_profile(&self, id: &str) -> Result<Option<ControllerProfile>, StoreError> {
        self.load_json(&key(PROFILES, id)).await
    }

    pub async fn list_profiles(&self) -> Result<Vec<String>, StoreError> {
        self.list_ids(PROFILES).await
    }

    pub async fn save_sample(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.save(&key(SAMPLES, id), bytes).await
    }

    pub async fn load_sample(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.load(&key(SAMPLES, id)).await
    }

    /// Loads a sample that must exist.
    pub async fn require_sample(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        self.load_sample(id)
            .await?
            .ok_or_else(|| StoreError::Missing(key(SAMPLES, id)))
    }
}
