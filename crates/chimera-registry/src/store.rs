//! JSON document persistence for the personality registry.
//!
//! One file holds the whole store; every mutation re-serialises a snapshot
//! and replaces the file atomically (write to `.tmp`, rename). Writes are
//! serialized through a single writer task so concurrent mutations can never
//! interleave partial documents. A legacy flat shape (pre-registry era) is
//! auto-migrated on startup with a `.legacy.json` backup written beside it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use chimera_core::types::{PersonalityId, UserId};

use crate::error::{RegistryError, Result};
use crate::types::Personality;

pub const STORE_FILE: &str = "personalities.json";

/// The persisted document shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreDocument {
    pub personalities: Vec<Personality>,
    #[serde(default)]
    pub aliases: AliasDocument,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AliasDocument {
    /// folded alias → personality id
    #[serde(default)]
    pub global: HashMap<String, String>,
    /// user id → { folded alias → personality id }
    #[serde(default)]
    pub user: HashMap<String, HashMap<String, String>>,
}

/// Record shape of the legacy flat file: `{ "<name>": { fullName, addedBy, … } }`.
#[derive(Debug, Deserialize)]
struct LegacyRecord {
    #[serde(rename = "fullName")]
    full_name: String,
    #[serde(rename = "addedBy")]
    added_by: String,
    #[serde(rename = "avatarUrl")]
    avatar_url: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

pub struct PersonalityStore {
    path: PathBuf,
}

impl PersonalityStore {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(STORE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store, auto-migrating the legacy flat shape when detected.
    /// A missing file is an empty store, not an error.
    pub fn load(&self) -> Result<StoreDocument> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoreDocument::default())
            }
            Err(e) => return Err(RegistryError::Persistence(e.to_string())),
        };

        let value: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| RegistryError::Persistence(format!("unparseable store: {e}")))?;

        if is_legacy_shape(&value) {
            info!(path = %self.path.display(), "legacy personality store detected, migrating");
            let migrated = migrate_legacy(&value)?;
            self.backup_legacy(&raw)?;
            self.save(&migrated)?;
            return Ok(migrated);
        }

        serde_json::from_value(value)
            .map_err(|e| RegistryError::Persistence(format!("bad store document: {e}")))
    }

    /// Atomic replace: serialize to `<file>.tmp`, then rename over the target.
    pub fn save(&self, doc: &StoreDocument) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| RegistryError::Persistence(e.to_string()))?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(doc)
            .map_err(|e| RegistryError::Persistence(e.to_string()))?;
        std::fs::write(&tmp, json).map_err(|e| RegistryError::Persistence(e.to_string()))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| RegistryError::Persistence(e.to_string()))?;
        Ok(())
    }

    fn backup_legacy(&self, raw: &str) -> Result<()> {
        let backup = self.path.with_extension("legacy.json");
        std::fs::write(&backup, raw).map_err(|e| RegistryError::Persistence(e.to_string()))?;
        info!(path = %backup.display(), "legacy store backed up");
        Ok(())
    }

    /// Spawn the single writer task. Mutations send snapshots; the task
    /// coalesces bursts down to the most recent document before writing.
    pub fn spawn_writer(self) -> mpsc::UnboundedSender<StoreDocument> {
        let (tx, mut rx) = mpsc::unbounded_channel::<StoreDocument>();
        tokio::spawn(async move {
            while let Some(mut doc) = rx.recv().await {
                // Drain any queued snapshots — only the latest matters.
                while let Ok(newer) = rx.try_recv() {
                    doc = newer;
                }
                if let Err(e) = self.save(&doc) {
                    error!(error = %e, path = %self.path.display(), "store write failed");
                }
            }
        });
        tx
    }
}

fn is_legacy_shape(value: &serde_json::Value) -> bool {
    let Some(obj) = value.as_object() else {
        return false;
    };
    if obj.contains_key("personalities") {
        return false;
    }
    obj.values().any(|v| {
        v.as_object()
            .map(|r| r.contains_key("fullName") || r.contains_key("addedBy"))
            .unwrap_or(false)
    })
}

fn migrate_legacy(value: &serde_json::Value) -> Result<StoreDocument> {
    let obj = value
        .as_object()
        .ok_or_else(|| RegistryError::Persistence("legacy store is not an object".to_string()))?;

    let mut doc = StoreDocument::default();
    for (name, record) in obj {
        let record: LegacyRecord = match serde_json::from_value(record.clone()) {
            Ok(r) => r,
            Err(e) => {
                warn!(name = %name, error = %e, "skipping unreadable legacy record");
                continue;
            }
        };
        let personality = Personality {
            // Legacy stores were keyed by name; the key stays the canonical id
            // so existing references keep resolving.
            id: PersonalityId::from(name.as_str()),
            display_name: record.full_name,
            avatar_url: record.avatar_url,
            error_message: record.error_message,
            owner_user_id: UserId::from(record.added_by.as_str()),
            created_at: chrono::Utc::now(),
        };
        doc.aliases
            .global
            .insert(crate::types::fold(name), personality.id.to_string());
        doc.personalities.push(personality);
    }
    Ok(doc)
}
