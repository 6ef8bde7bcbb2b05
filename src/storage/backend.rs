//! Durable key/value backends.
//!
//! A backend stores opaque, encoded payloads under string keys. The table
//! store keeps one entry per table plus one for the session.

use crate::error::{Result, StoreError};
use crate::types::SnapshotEncoding;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Magic bytes for entry files.
const ENTRY_MAGIC: &[u8; 4] = b"PST\0";

/// Current entry format version.
const ENTRY_VERSION: u8 = 1;

/// File extension for entry files.
const ENTRY_EXT: &str = "tbl";

/// An encoded payload as it sits in durable storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredEntry {
    pub encoding: SnapshotEncoding,
    pub payload: Vec<u8>,
}

/// Durable storage for encoded entries.
///
/// `save` replaces the entry as a whole; a reader never observes a partially
/// written entry.
pub trait StorageBackend: Send + Sync {
    /// Load an entry, or `None` if the key was never written (or was removed).
    fn load(&self, key: &str) -> Result<Option<StoredEntry>>;

    /// Replace an entry.
    fn save(&self, key: &str, entry: &StoredEntry) -> Result<()>;

    /// Remove an entry. Removing a missing key is not an error.
    fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently present.
    fn keys(&self) -> Result<Vec<String>>;
}

/// One file per key inside a directory.
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    /// Directory holding the entry files.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.path.join(format!("{}.{}", escape_key(key), ENTRY_EXT))
    }

    fn read_entry(path: &Path) -> Result<StoredEntry> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != ENTRY_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid entry magic".into()));
        }

        let mut header = [0u8; 2];
        file.read_exact(&mut header)?;
        if header[0] != ENTRY_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported entry version: {}",
                header[0]
            )));
        }
        let encoding = SnapshotEncoding::from_tag(header[1]).ok_or_else(|| {
            StoreError::InvalidFormat(format!("Unknown encoding tag: {}", header[1]))
        })?;

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut payload = vec![0u8; len];
        file.read_exact(&mut payload)
            .map_err(|_| StoreError::Corruption(format!("Truncated entry {}", path.display())))?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&payload);
        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        Ok(StoredEntry { encoding, payload })
    }
}

impl StorageBackend for FileBackend {
    fn load(&self, key: &str) -> Result<Option<StoredEntry>> {
        let path = self.entry_path(key);
        if !path.exists() {
            return Ok(None);
        }
        Self::read_entry(&path).map(Some)
    }

    fn save(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        let path = self.entry_path(key);
        let tmp_path = path.with_extension(format!("{}.tmp", ENTRY_EXT));

        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(ENTRY_MAGIC)?;
            file.write_all(&[ENTRY_VERSION, entry.encoding.tag()])?;
            file.write_all(&(entry.payload.len() as u64).to_le_bytes())?;
            file.write_all(&entry.payload)?;
            file.write_all(&crc32fast::hash(&entry.payload).to_le_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        if path.exists() {
            fs::remove_file(&path)?;
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.path)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(&format!(".{}", ENTRY_EXT)) {
                if let Some(key) = unescape_key(stem) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Volatile backend for tests and throwaway stores.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, StoredEntry>>,
    fail_writes: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `save`/`remove` fail with an IO error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "writes disabled",
            )));
        }
        Ok(())
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self, key: &str) -> Result<Option<StoredEntry>> {
        Ok(self.entries.lock().get(key).cloned())
    }

    fn save(&self, key: &str, entry: &StoredEntry) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().insert(key.to_string(), entry.clone());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.check_writable()?;
        self.entries.lock().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self.entries.lock().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Map a key onto a portable file stem: `[A-Za-z0-9_-]` pass through,
/// everything else becomes `%XX` per UTF-8 byte.
fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for byte in key.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn unescape_key(stem: &str) -> Option<String> {
    let bytes = stem.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = stem.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(payload: &[u8]) -> StoredEntry {
        StoredEntry {
            encoding: SnapshotEncoding::Json,
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path().join("data")).unwrap();

        assert!(backend.load("table-polls").unwrap().is_none());

        backend.save("table-polls", &entry(b"[1,2,3]")).unwrap();
        let loaded = backend.load("table-polls").unwrap().unwrap();
        assert_eq!(loaded.payload, b"[1,2,3]");
        assert_eq!(loaded.encoding, SnapshotEncoding::Json);

        backend.save("table-polls", &entry(b"[]")).unwrap();
        assert_eq!(backend.load("table-polls").unwrap().unwrap().payload, b"[]");
    }

    #[test]
    fn test_file_checksum_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.save("session", &entry(b"{\"a\":1}")).unwrap();

        let path = backend.entry_path("session");
        let mut bytes = fs::read(&path).unwrap();
        // Flip a payload byte (header is 4 + 2 + 8 bytes).
        bytes[15] ^= 0xFF;
        fs::write(&path, bytes).unwrap();

        let result = backend.load("session");
        assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_file_keys_roundtrip_escaping() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();

        backend.save("table-poll options", &entry(b"[]")).unwrap();
        backend.save("session", &entry(b"null")).unwrap();

        assert_eq!(
            backend.keys().unwrap(),
            vec!["session".to_string(), "table-poll options".to_string()]
        );

        backend.remove("session").unwrap();
        backend.remove("session").unwrap();
        assert!(backend.load("session").unwrap().is_none());
    }

    #[test]
    fn test_memory_backend_failing_writes() {
        let backend = MemoryBackend::new();
        backend.save("k", &entry(b"1")).unwrap();

        backend.set_fail_writes(true);
        assert!(backend.save("k", &entry(b"2")).is_err());
        assert_eq!(backend.load("k").unwrap().unwrap().payload, b"1");

        backend.set_fail_writes(false);
        backend.remove("k").unwrap();
        assert!(backend.keys().unwrap().is_empty());
    }
}
