//! External key store holding attachment keys outside the ledger

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use medledger_health_crypto::{AttachmentKey, CryptoError};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("No key entry for {0}")]
    Missing(String),

    #[error("Key entry {0} already exists")]
    Conflict(String),

    #[error("Key store I/O failed at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Key store is corrupt: {0}")]
    Corrupt(String),

    #[error("Key store lock poisoned")]
    Poisoned,
}

/// Key material and nonce of one attachment
#[derive(Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub key_material: Vec<u8>,
    pub iv: Vec<u8>,
}

impl KeyEntry {
    pub fn to_key(&self) -> Result<AttachmentKey, CryptoError> {
        AttachmentKey::from_parts(&self.key_material, &self.iv)
    }
}

impl From<&AttachmentKey> for KeyEntry {
    fn from(key: &AttachmentKey) -> Self {
        Self {
            key_material: key.key_bytes().to_vec(),
            iv: key.iv_bytes().to_vec(),
        }
    }
}

impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("key_len", &self.key_material.len())
            .field("iv_len", &self.iv.len())
            .finish()
    }
}

/// Key-value store of attachment keys, keyed by record id.
///
/// It commits independently of the ledger.
pub trait KeyStore {
    fn get(&self, record_id: &str) -> Result<Option<KeyEntry>, KeyStoreError>;

    /// Insert or replace
    fn put(&self, record_id: &str, entry: KeyEntry) -> Result<(), KeyStoreError>;

    /// Returns whether an entry was removed
    fn delete(&self, record_id: &str) -> Result<bool, KeyStoreError>;

    /// Move an entry to a new id. Fails if `old_id` is absent or `new_id`
    /// is taken.
    fn rekey(&self, old_id: &str, new_id: &str) -> Result<(), KeyStoreError>;

    fn record_ids(&self) -> Result<Vec<String>, KeyStoreError>;
}

impl<K: KeyStore + ?Sized> KeyStore for &K {
    fn get(&self, record_id: &str) -> Result<Option<KeyEntry>, KeyStoreError> {
        (**self).get(record_id)
    }

    fn put(&self, record_id: &str, entry: KeyEntry) -> Result<(), KeyStoreError> {
        (**self).put(record_id, entry)
    }

    fn delete(&self, record_id: &str) -> Result<bool, KeyStoreError> {
        (**self).delete(record_id)
    }

    fn rekey(&self, old_id: &str, new_id: &str) -> Result<(), KeyStoreError> {
        (**self).rekey(old_id, new_id)
    }

    fn record_ids(&self) -> Result<Vec<String>, KeyStoreError> {
        (**self).record_ids()
    }
}

/// Move `old_id` to `new_id` without overwriting
fn rekey_in<V>(entries: &mut BTreeMap<String, V>, old_id: &str, new_id: &str) -> Result<(), KeyStoreError> {
    if !entries.contains_key(old_id) {
        return Err(KeyStoreError::Missing(old_id.to_string()));
    }
    if old_id == new_id {
        return Ok(());
    }
    if entries.contains_key(new_id) {
        return Err(KeyStoreError::Conflict(new_id.to_string()));
    }
    if let Some(entry) = entries.remove(old_id) {
        entries.insert(new_id.to_string(), entry);
    }
    Ok(())
}

// ==================== MEMORY STORE ====================

#[derive(Debug, Default)]
pub struct MemoryKeyStore {
    entries: Mutex<BTreeMap<String, KeyEntry>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, KeyEntry>>, KeyStoreError> {
        self.entries.lock().map_err(|_| KeyStoreError::Poisoned)
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, record_id: &str) -> Result<Option<KeyEntry>, KeyStoreError> {
        Ok(self.lock()?.get(record_id).cloned())
    }

    fn put(&self, record_id: &str, entry: KeyEntry) -> Result<(), KeyStoreError> {
        self.lock()?.insert(record_id.to_string(), entry);
        Ok(())
    }

    fn delete(&self, record_id: &str) -> Result<bool, KeyStoreError> {
        Ok(self.lock()?.remove(record_id).is_some())
    }

    fn rekey(&self, old_id: &str, new_id: &str) -> Result<(), KeyStoreError> {
        rekey_in(&mut *self.lock()?, old_id, new_id)
    }

    fn record_ids(&self) -> Result<Vec<String>, KeyStoreError> {
        Ok(self.lock()?.keys().cloned().collect())
    }
}

// ==================== FILE STORE ====================

/// On-disk form: hex-encoded key and iv
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredEntry {
    encryption_key: String,
    iv: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredKeys {
    #[serde(default)]
    file_keys: BTreeMap<String, StoredEntry>,
}

/// JSON file key store. Every change rewrites the whole file through a
/// temporary sibling and a rename, so a crash never leaves a torn file.
#[derive(Debug)]
pub struct FileKeyStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> KeyStoreError {
        KeyStoreError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    fn load(&self) -> Result<StoredKeys, KeyStoreError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(StoredKeys::default()),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| KeyStoreError::Corrupt(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredKeys::default()),
            Err(e) => Err(self.io_error(&self.path, e)),
        }
    }

    fn save(&self, keys: &StoredKeys) -> Result<(), KeyStoreError> {
        let bytes = serde_json::to_vec_pretty(keys).map_err(|e| KeyStoreError::Corrupt(e.to_string()))?;
        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        std::fs::write(&tmp, bytes).map_err(|e| self.io_error(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(&self.path, e))?;
        debug!(path = %self.path.display(), entries = keys.file_keys.len(), "key store saved");
        Ok(())
    }

    /// Load, apply `change`, and save when it reports a modification
    fn update<T>(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, StoredEntry>) -> Result<(T, bool), KeyStoreError>,
    ) -> Result<T, KeyStoreError> {
        let _guard = self.lock.lock().map_err(|_| KeyStoreError::Poisoned)?;
        let mut keys = self.load()?;
        let (result, modified) = change(&mut keys.file_keys)?;
        if modified {
            self.save(&keys)?;
        }
        Ok(result)
    }
}

fn decode_entry(record_id: &str, stored: &StoredEntry) -> Result<KeyEntry, KeyStoreError> {
    let corrupt = |e: hex::FromHexError| KeyStoreError::Corrupt(format!("{record_id}: {e}"));
    Ok(KeyEntry {
        key_material: hex::decode(&stored.encryption_key).map_err(corrupt)?,
        iv: hex::decode(&stored.iv).map_err(corrupt)?,
    })
}

impl KeyStore for FileKeyStore {
    fn get(&self, record_id: &str) -> Result<Option<KeyEntry>, KeyStoreError> {
        let _guard = self.lock.lock().map_err(|_| KeyStoreError::Poisoned)?;
        self.load()?
            .file_keys
            .get(record_id)
            .map(|stored| decode_entry(record_id, stored))
            .transpose()
    }

    fn put(&self, record_id: &str, entry: KeyEntry) -> Result<(), KeyStoreError> {
        let stored = StoredEntry {
            encryption_key: hex::encode(&entry.key_material),
            iv: hex::encode(&entry.iv),
        };
        self.update(|keys| {
            keys.insert(record_id.to_string(), stored);
            Ok(((), true))
        })
    }

    fn delete(&self, record_id: &str) -> Result<bool, KeyStoreError> {
        self.update(|keys| {
            let removed = keys.remove(record_id).is_some();
            Ok((removed, removed))
        })
    }

    fn rekey(&self, old_id: &str, new_id: &str) -> Result<(), KeyStoreError> {
        self.update(|keys| {
            rekey_in(keys, old_id, new_id)?;
            Ok(((), old_id != new_id))
        })
    }

    fn record_ids(&self) -> Result<Vec<String>, KeyStoreError> {
        let _guard = self.lock.lock().map_err(|_| KeyStoreError::Poisoned)?;
        Ok(self.load()?.file_keys.into_keys().collect())
    }
}
