//! File-based keystore
//!
//! One file per message key under the base directory:
//! ```text
//! [Magic: 8 bytes "VNKEY001"]
//! [Key: 32 bytes]
//! ```
//! Removal overwrites the file with zeros before unlinking it.

use super::{KeystoreError, LocalKeyStore};
use crate::core_crypto::key_vault::{MessageKey, KEY_LEN};
use crate::core_store::model::MessageId;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Magic header for key files
const MAGIC_HEADER: &[u8; 8] = b"VNKEY001";

const FILE_LEN: usize = MAGIC_HEADER.len() + KEY_LEN;

const EXTENSION: &str = "key";

/// Key files in a directory
pub struct FileKeyStore {
    base_path: PathBuf,
}

impl FileKeyStore {
    /// Create the directory if needed
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self, KeystoreError> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path)?;
        Ok(FileKeyStore { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, id: &MessageId) -> Result<PathBuf, KeystoreError> {
        let name = id.as_str();
        let safe = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !safe {
            return Err(KeystoreError::InvalidId(name.to_string()));
        }
        Ok(self.base_path.join(format!("{}.{}", name, EXTENSION)))
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> Result<(), KeystoreError> {
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, data)?;
        fs::rename(temp_path, path)?;
        Ok(())
    }
}

impl LocalKeyStore for FileKeyStore {
    fn put(&self, id: &MessageId, key: &MessageKey) -> Result<(), KeystoreError> {
        let path = self.key_path(id)?;
        let mut data = Zeroizing::new(Vec::with_capacity(FILE_LEN));
        data.extend_from_slice(MAGIC_HEADER);
        data.extend_from_slice(key.as_bytes());
        self.write_atomic(&path, &data)
    }

    fn get(&self, id: &MessageId) -> Result<Option<MessageKey>, KeystoreError> {
        let path = self.key_path(id)?;
        if !path.exists() {
            return Ok(None);
        }
        let data = Zeroizing::new(fs::read(&path)?);
        if data.len() != FILE_LEN || &data[..MAGIC_HEADER.len()] != MAGIC_HEADER {
            return Err(KeystoreError::Corrupted(id.to_string()));
        }
        MessageKey::from_bytes(&data[MAGIC_HEADER.len()..])
            .map(Some)
            .map_err(|e| KeystoreError::Corrupted(e.to_string()))
    }

    fn remove(&self, id: &MessageId) -> Result<bool, KeystoreError> {
        let path = self.key_path(id)?;
        if !path.exists() {
            return Ok(false);
        }
        let len = fs::metadata(&path)?.len() as usize;
        {
            let mut file = fs::OpenOptions::new().write(true).open(&path)?;
            file.write_all(&vec![0u8; len])?;
            file.sync_all()?;
        }
        fs::remove_file(&path)?;
        Ok(true)
    }

    fn ids(&self) -> Result<Vec<MessageId>, KeystoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(&self.base_path)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(MessageId::new(stem));
            }
        }
        ids.sort();
        Ok(ids)
    }
}
