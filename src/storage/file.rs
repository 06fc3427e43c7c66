use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::StoreError;
use super::KeyValueStore;

/// Directory-backed store: one file per key
///
/// Keys are percent-encoded into file names so that `auditlog:p1:archive:42`
/// maps to a single portable file.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Open (and create if needed) a store rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|source| StoreError::Io {
            key: root.display().to_string(),
            source,
        })?;
        Ok(Self { root })
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey {
                key: key.to_string(),
                reason: "key must not be empty".to_string(),
            });
        }
        Ok(self.root.join(format!("{}.json", encode_key(key))))
    }
}

fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' | b'.' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{:02X}", byte)),
        }
    }
    encoded
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io { key: key.to_string(), source }),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.path_for(key)?;

        // Write to a sibling temp file first so readers never see a torn value
        let tmp_path = path.with_extension("json.tmp");
        fs::write(&tmp_path, value).map_err(|source| StoreError::Io { key: key.to_string(), source })?;
        fs::rename(&tmp_path, &path).map_err(|source| StoreError::Io { key: key.to_string(), source })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(StoreError::Io { key: key.to_string(), source }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_store_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path().join("store")).unwrap();

        assert!(store.get("auditlog:p1").unwrap().is_none());

        store.set("auditlog:p1", br#"{"entries":[]}"#).unwrap();
        assert_eq!(store.get("auditlog:p1").unwrap(), Some(br#"{"entries":[]}"#.to_vec()));

        store.remove("auditlog:p1").unwrap();
        assert!(store.get("auditlog:p1").unwrap().is_none());
    }

    #[test]
    fn test_persistence_across_instances() {
        let temp_dir = TempDir::new().unwrap();

        {
            let store = FileStore::new(temp_dir.path()).unwrap();
            store.set("trend:p1", b"[1,2,3]").unwrap();
        }

        let store = FileStore::new(temp_dir.path()).unwrap();
        assert_eq!(store.get("trend:p1").unwrap(), Some(b"[1,2,3]".to_vec()));
    }

    #[test]
    fn test_key_encoding_is_distinct() {
        assert_eq!(encode_key("auditlog:p1"), "auditlog%3Ap1");
        assert_ne!(encode_key("a/b"), encode_key("a_b"));
    }

    #[test]
    fn test_empty_key_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::new(temp_dir.path()).unwrap();
        assert!(matches!(store.set("", b"x"), Err(StoreError::InvalidKey { .. })));
    }
}
