//! JSON file storage implementation.
//!
//! Stores one pretty-printed JSON file per record under
//! `<root>/progress/<user>/<form>.json`. Path components are percent-encoded
//! so arbitrary identifiers map to safe file names. Uppercase letters are
//! encoded as well, so ids differing only in case never share a file on a
//! case-insensitive filesystem.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use formkeep_core::{FormProgress, FormType, UserId};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::{ProgressStore, Result};

/// File-based JSON storage backend.
pub struct JsonStorage {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonStorage {
    /// Create storage rooted at `root`, creating the `progress/` directory.
    pub async fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(root.join("progress")).await?;

        Ok(Self {
            root,
            write_lock: Mutex::new(()),
        })
    }

    /// Root directory of this store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn user_dir(&self, user_id: &UserId) -> PathBuf {
        self.root
            .join("progress")
            .join(encode_component(user_id.as_str()))
    }

    fn record_path(&self, user_id: &UserId, form_type: &FormType) -> PathBuf {
        self.user_dir(user_id)
            .join(format!("{}.json", encode_component(form_type.as_str())))
    }
}

#[async_trait]
impl ProgressStore for JsonStorage {
    async fn load(&self, user_id: &UserId, form_type: &FormType) -> Result<Option<FormProgress>> {
        read_json(&self.record_path(user_id, form_type)).await
    }

    async fn upsert(&self, record: &FormProgress) -> Result<FormProgress> {
        let mut stored = record.clone();
        stored.updated_at = chrono::Utc::now();

        let path = self.record_path(&stored.user_id, &stored.form_type);
        let json = serde_json::to_string_pretty(&stored)?;

        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(self.user_dir(&stored.user_id)).await?;
        write_atomic(&path, json.as_bytes()).await?;

        debug!(key = %stored.key(), step = stored.current_step, "progress written");
        Ok(stored)
    }

    async fn delete(&self, user_id: &UserId, form_type: &FormType) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        fs::remove_file(self.record_path(user_id, form_type)).await.or_else(|e| {
            if e.kind() == std::io::ErrorKind::NotFound { Ok(()) } else { Err(e) }
        })?;
        Ok(())
    }

    async fn list(&self, user_id: &UserId) -> Result<Vec<FormProgress>> {
        let mut records: Vec<FormProgress> = list_dir(&self.user_dir(user_id)).await?;
        records.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(records)
    }
}

/// Write to a sibling temp file, flush it to disk, then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    drop(file);
    fs::rename(&tmp, path).await?;
    Ok(())
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read_to_string(path).await {
        Ok(json) => {
            let value = serde_json::from_str(&json)?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

async fn list_dir<T: serde::de::DeserializeOwned>(dir: &Path) -> Result<Vec<T>> {
    let mut items = Vec::new();
    let mut rd = match fs::read_dir(dir).await {
        Ok(rd) => rd,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(items),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = rd.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        match read_json(&path).await {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {}
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
        }
    }
    Ok(items)
}

/// Percent-encode everything except lowercase ASCII letters, digits, `-` and `_`.
fn encode_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_lowercase() || byte.is_ascii_digit() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}
