//! Bibliothèque locale des modules installables
//!
//! Fichier JSON unique (`library.json`), lu et réécrit en entier. Jamais modifié
//! par l'état du device : seules l'ajout, la suppression par nom et l'install
//! (qui consomme l'entrée) y touchent.

use crate::error::GatewayError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LibraryEntry {
    pub url: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub version: String,
    /// UUIDv7 : ordonné dans le temps, unique pour ce processus
    #[serde(default)]
    pub uuid: String,
    #[serde(with = "time::serde::rfc3339", default = "OffsetDateTime::now_utc")]
    pub added_at: OffsetDateTime,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLibraryEntry {
    pub url: String,
    pub name: String,
    pub description: Option<String>,
    pub vendor: Option<String>,
    pub version: Option<String>,
}

pub struct LibraryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LibraryStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into(), lock: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn list(&self) -> Vec<LibraryEntry> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    pub async fn add(&self, new: NewLibraryEntry) -> LibraryEntry {
        let _guard = self.lock.lock().await;
        let entry = LibraryEntry {
            url: new.url.trim().to_string(),
            name: new.name.trim().to_string(),
            description: new.description.unwrap_or_default(),
            vendor: new.vendor.unwrap_or_default(),
            version: new.version.unwrap_or_default(),
            uuid: Uuid::now_v7().to_string(),
            added_at: OffsetDateTime::now_utc(),
        };

        let mut entries = self.load().await;
        entries.push(entry.clone());
        self.save(&entries).await;
        info!("added {} ({}) to library", entry.name, entry.url);
        entry
    }

    /// Retire toutes les entrées portant ce nom, renvoie le nombre retiré
    pub async fn remove(&self, name: &str) -> usize {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await;
        let before = entries.len();
        entries.retain(|e| e.name != name);
        let removed = before - entries.len();
        if removed > 0 {
            self.save(&entries).await;
            info!("removed {} from library", name);
        }
        removed
    }

    /// Fichier absent ou illisible → vide ; entrée mal formée → ignorée
    async fn load(&self) -> Vec<LibraryEntry> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!("failed to load {}, initializing empty: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        let raw: Vec<serde_json::Value> = match serde_json::from_str::<Option<Vec<serde_json::Value>>>(&content) {
            Ok(values) => values.unwrap_or_default(),
            Err(e) => {
                warn!("failed to load {}, initializing empty: {}", self.path.display(), e);
                return Vec::new();
            }
        };
        raw.into_iter()
            .filter_map(|value| match serde_json::from_value::<LibraryEntry>(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("skipping malformed library entry: {}", e);
                    None
                }
            })
            .collect()
    }

    async fn save(&self, entries: &[LibraryEntry]) {
        if let Err(e) = self.write(entries).await {
            error!("failed to save {}: {}", self.path.display(), e);
        }
    }

    async fn write(&self, entries: &[LibraryEntry]) -> Result<(), GatewayError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, serde_json::to_string_pretty(entries)?).await?;
        Ok(())
    }
}
