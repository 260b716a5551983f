//! Persistent stream store
//!
//! One JSON document per provider:
//!
//! ```text
//! <dir>/<provider>.json
//! {
//!   "streams": [
//!     { "id": "s-1a2b3c4d", "kind": "sender", ... },
//!     ...
//!   ]
//! }
//! ```
//!
//! Every read-modify-write cycle holds the provider's lock, and every write
//! goes to a temporary file that is renamed over the document, so readers
//! see either the old or the new document, never a partial one.
//!
//! Entries are decoded one at a time. An entry that does not decode (an
//! unknown `kind`, a port out of range) is kept verbatim as an
//! [`UnreadableStream`] and written back untouched; it never hides the
//! entries around it.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::stream::{generate_unique_id, StreamConfig, StreamKind, StreamPatch, ValidationError};

use super::config::RegistryConfig;
use super::error::RegistryError;

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// On-disk document shape; entries are decoded individually
#[derive(Debug, Default, Deserialize)]
struct StreamDocument {
    #[serde(default)]
    streams: Vec<Value>,
}

/// A persisted entry that is not a usable stream configuration
#[derive(Debug, Clone, PartialEq)]
pub struct UnreadableStream {
    /// Stream ID, assigned by the registry if the entry had none
    pub id: String,
    /// Why the entry could not be decoded
    pub error: ValidationError,
    raw: Value,
}

impl UnreadableStream {
    /// The entry as stored
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    fn set_id(&mut self, id: String) {
        if let Value::Object(ref mut map) = self.raw {
            map.insert("id".into(), Value::String(id.clone()));
        }
        self.id = id;
    }
}

impl Serialize for UnreadableStream {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.raw.serialize(serializer)
    }
}

/// One entry of a provider document
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredStream {
    /// A decoded stream configuration
    Config(StreamConfig),
    /// An entry kept as-is because it does not decode
    Unreadable(UnreadableStream),
}

impl StoredStream {
    /// Decode one raw document entry
    fn decode(raw: Value) -> Self {
        match StreamConfig::deserialize(&raw) {
            Ok(config) => StoredStream::Config(config),
            Err(e) => {
                let kind = raw.get("kind").and_then(Value::as_str);
                let error = match kind.map(str::parse::<StreamKind>) {
                    Some(Err(unknown)) => unknown,
                    _ => ValidationError::from(e),
                };
                let id = raw
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                StoredStream::Unreadable(UnreadableStream { id, error, raw })
            }
        }
    }

    /// Stream ID
    pub fn id(&self) -> &str {
        match self {
            StoredStream::Config(config) => &config.id,
            StoredStream::Unreadable(entry) => &entry.id,
        }
    }

    fn set_id(&mut self, id: String) {
        match self {
            StoredStream::Config(config) => config.id = id,
            StoredStream::Unreadable(entry) => entry.set_id(id),
        }
    }

    /// The decoded configuration, if the entry is readable
    pub fn config(&self) -> Option<&StreamConfig> {
        match self {
            StoredStream::Config(config) => Some(config),
            StoredStream::Unreadable(_) => None,
        }
    }

    /// The configuration, or the reason it cannot be used
    pub fn into_config(self) -> Result<StreamConfig> {
        match self {
            StoredStream::Config(config) => Ok(config),
            StoredStream::Unreadable(entry) => Err(RegistryError::Unreadable {
                id: entry.id,
                source: entry.error,
            }),
        }
    }
}

fn readable(entries: Vec<StoredStream>) -> Vec<StreamConfig> {
    entries
        .into_iter()
        .filter_map(|entry| match entry {
            StoredStream::Config(config) => Some(config),
            StoredStream::Unreadable(_) => None,
        })
        .collect()
}

/// Durable store of stream configurations, keyed by provider
pub struct StreamStore {
    config: RegistryConfig,

    /// One lock per provider document
    locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl StreamStore {
    /// Create a store with the given configuration
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            locks: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Create a store rooted at `dir`
    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self::new(RegistryConfig::new(dir))
    }

    /// Get the registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Document path for `provider`
    pub fn path_for(&self, provider: &str) -> Result<PathBuf> {
        let valid = !provider.is_empty()
            && provider
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(RegistryError::InvalidProvider(provider.to_string()));
        }

        Ok(self.config.dir.join(format!("{}.json", provider)))
    }

    fn provider_lock(&self, provider: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(provider.to_string())
            .or_default()
            .clone()
    }

    /// Every entry of `provider`'s document, in document order
    ///
    /// A missing document reads as empty. Entries persisted without an ID
    /// are assigned one and the document is rewritten.
    pub async fn entries(&self, provider: &str) -> Result<Vec<StoredStream>> {
        let path = self.path_for(provider)?;
        let lock = self.provider_lock(provider);
        let _guard = lock.lock().await;

        let mut entries = read_document(&path).await?;
        if normalize(&mut entries) {
            tracing::info!(provider = provider, "Assigned missing stream IDs");
            write_document(&path, &entries).await?;
        }

        Ok(entries)
    }

    /// All readable streams of `provider`, in document order
    ///
    /// Unreadable entries are logged and skipped; [`entries`](Self::entries)
    /// returns them too.
    pub async fn list_all(&self, provider: &str) -> Result<Vec<StreamConfig>> {
        let entries = self.entries(provider).await?;
        for entry in &entries {
            if let StoredStream::Unreadable(bad) = entry {
                tracing::warn!(stream = %bad.id, error = %bad.error, "Skipping unreadable stream entry");
            }
        }

        Ok(readable(entries))
    }

    /// The entry with `id`, readable or not
    pub async fn entry(&self, id: &str, provider: &str) -> Result<Option<StoredStream>> {
        Ok(self
            .entries(provider)
            .await?
            .into_iter()
            .find(|entry| entry.id() == id))
    }

    /// Look up one stream by ID
    ///
    /// An entry that exists but does not decode is an
    /// [`Unreadable`](RegistryError::Unreadable) error.
    pub async fn get_by_id(&self, id: &str, provider: &str) -> Result<Option<StreamConfig>> {
        self.entry(id, provider)
            .await?
            .map(StoredStream::into_config)
            .transpose()
    }

    /// Append a stream, assigning an ID if it has none or a taken one
    ///
    /// Returns the full list after the write; the new stream is last.
    pub async fn add(&self, config: StreamConfig, provider: &str) -> Result<Vec<StreamConfig>> {
        config.validate()?;

        self.modify(provider, |entries| {
            let requested = config.id.clone();
            entries.push(StoredStream::Config(config));
            normalize(entries);

            if let Some(StoredStream::Config(added)) = entries.last() {
                if !requested.is_empty() && added.id != requested {
                    tracing::warn!(
                        requested = %requested,
                        assigned = %added.id,
                        "Stream ID already taken, assigned a new one"
                    );
                }
                tracing::info!(stream = %added.id, summary = %added.summary(), "Stream added");
            }
            Ok(())
        })
        .await
    }

    /// Merge `patch` into the stream with `id`
    ///
    /// The stored ID is kept even if the patch names another. An unreadable
    /// entry cannot be patched; replace or delete it instead.
    pub async fn update(
        &self,
        id: &str,
        patch: StreamPatch,
        provider: &str,
    ) -> Result<Vec<StreamConfig>> {
        self.modify(provider, |entries| {
            let entry = entries
                .iter_mut()
                .find(|entry| entry.id() == id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let stream = match entry {
                StoredStream::Config(config) => config,
                StoredStream::Unreadable(bad) => {
                    return Err(RegistryError::Unreadable {
                        id: bad.id.clone(),
                        source: bad.error.clone(),
                    })
                }
            };

            let mut merged = stream.clone();
            merged.apply_patch(patch);
            merged.validate()?;
            *stream = merged;

            tracing::info!(stream = %id, summary = %stream.summary(), "Stream updated");
            Ok(())
        })
        .await
    }

    /// Remove the stream with `id`
    pub async fn delete(&self, id: &str, provider: &str) -> Result<Vec<StreamConfig>> {
        self.modify(provider, |entries| {
            let before = entries.len();
            entries.retain(|entry| entry.id() != id);
            if entries.len() == before {
                return Err(RegistryError::NotFound(id.to_string()));
            }

            tracing::info!(stream = %id, "Stream deleted");
            Ok(())
        })
        .await
    }

    /// Replace the whole list, keeping the submitted order
    pub async fn replace_all(
        &self,
        configs: Vec<StreamConfig>,
        provider: &str,
    ) -> Result<Vec<StreamConfig>> {
        for config in &configs {
            config.validate()?;
        }

        self.modify(provider, |entries| {
            *entries = configs.into_iter().map(StoredStream::Config).collect();
            normalize(entries);

            tracing::info!(provider = provider, count = entries.len(), "Stream list replaced");
            Ok(())
        })
        .await
    }

    /// Locked read-modify-write; nothing is written if `f` fails
    ///
    /// Returns the readable streams after the write.
    async fn modify<F>(&self, provider: &str, f: F) -> Result<Vec<StreamConfig>>
    where
        F: FnOnce(&mut Vec<StoredStream>) -> Result<()>,
    {
        let path = self.path_for(provider)?;
        let lock = self.provider_lock(provider);
        let _guard = lock.lock().await;

        let mut entries = read_document(&path).await?;
        normalize(&mut entries);
        f(&mut entries)?;
        write_document(&path, &entries).await?;

        Ok(readable(entries))
    }
}

/// Give every entry a unique, non-empty ID
///
/// The first holder of an ID keeps it; later duplicates and empty IDs get
/// fresh ones. Returns whether anything changed.
fn normalize(entries: &mut [StoredStream]) -> bool {
    let mut taken: HashSet<String> = entries
        .iter()
        .filter(|entry| !entry.id().is_empty())
        .map(|entry| entry.id().to_string())
        .collect();
    let mut seen = HashSet::new();
    let mut changed = false;

    for entry in entries.iter_mut() {
        if entry.id().is_empty() || !seen.insert(entry.id().to_string()) {
            let id = generate_unique_id(&taken);
            taken.insert(id.clone());
            seen.insert(id.clone());
            entry.set_id(id);
            changed = true;
        }
    }

    changed
}

async fn read_document(path: &Path) -> Result<Vec<StoredStream>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(source) => {
            return Err(RegistryError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let document: StreamDocument =
        serde_json::from_slice(&bytes).map_err(|source| RegistryError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    Ok(document
        .streams
        .into_iter()
        .map(StoredStream::decode)
        .collect())
}

async fn write_document(path: &Path, streams: &[StoredStream]) -> Result<()> {
    let to_err = |source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };

    #[derive(Serialize)]
    struct DocumentRef<'a> {
        streams: &'a [StoredStream],
    }

    let mut contents = serde_json::to_vec_pretty(&DocumentRef { streams })
        .map_err(|e| to_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;
    contents.push(b'\n');

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }

    let temp_path = path.with_extension("json.tmp");
    let mut file = tokio::fs::File::create(&temp_path).await.map_err(to_err)?;
    file.write_all(&contents).await.map_err(to_err)?;
    file.sync_all().await.map_err(to_err)?;
    drop(file);
    tokio::fs::rename(&temp_path, path).await.map_err(to_err)?;

    tracing::debug!(path = %path.display(), count = streams.len(), "Wrote stream document");
    Ok(())
}
