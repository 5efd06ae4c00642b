//! Directory-backed payload store.
//!
//! Each payload is one file `<dir>/<key>.wmp`. Writes go to a temporary file
//! which is renamed into place, so a crash mid-flush leaves either the old
//! payload or the new one, never a torn file under the final name.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Error as IoError, ErrorKind, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};
use uuid::Uuid;

use crate::error::WorldResult;
use crate::storage::traits::ExternalStore;

use super::codec;
use super::file_lock::FileLock;
use super::PersistentConfig;

const PAYLOAD_EXTENSION: &str = "wmp";

/// Payload store writing one checksummed file per payload.
#[derive(Debug)]
pub struct DirectoryStore {
    root: PathBuf,
    config: PersistentConfig,
    _lock: FileLock,
}

impl DirectoryStore {
    /// Opens (creating if needed) the payload directory and locks it.
    ///
    /// # Errors
    /// - If the directory cannot be created
    /// - If another process holds the directory lock
    pub fn open(root: impl AsRef<Path>, config: PersistentConfig) -> WorldResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let lock = FileLock::acquire(&root)?;
        info!(dir = %root.display(), "opened payload directory");
        Ok(Self {
            root,
            config,
            _lock: lock,
        })
    }

    /// Directory holding the payload files.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> WorldResult<PathBuf> {
        let is_plain_name = !path.is_empty()
            && !path.contains(['/', '\\'])
            && path != "."
            && path != "..";
        if !is_plain_name {
            return Err(IoError::new(
                ErrorKind::InvalidInput,
                format!("payload path must be a plain file name: {path:?}"),
            )
            .into());
        }
        Ok(self.root.join(path))
    }
}

impl ExternalStore for DirectoryStore {
    fn put(&self, key: &str, bytes: &[u8]) -> WorldResult<String> {
        let name = format!("{key}.{PAYLOAD_EXTENSION}");
        let final_path = self.resolve(&name)?;
        let temp_path = self
            .root
            .join(format!("{name}.tmp.{}", Uuid::new_v4().simple()));

        let result = (|| -> std::io::Result<()> {
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&temp_path)?;
            let mut writer = BufWriter::new(file);
            codec::write_payload(&mut writer, bytes)?;
            writer.flush()?;
            if self.config.sync_on_write {
                writer.get_ref().sync_all()?;
            }
            fs::rename(&temp_path, &final_path)
        })();

        if let Err(err) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(err.into());
        }

        debug!(file = %name, bytes = bytes.len(), "flushed payload");
        Ok(name)
    }

    fn get(&self, path: &str) -> WorldResult<Vec<u8>> {
        let full = self.resolve(path)?;
        let mut reader = BufReader::new(File::open(full)?);
        Ok(codec::read_payload(&mut reader)?)
    }

    fn contains(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.is_file()).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open(dir: &Path) -> DirectoryStore {
        DirectoryStore::open(dir, PersistentConfig::default()).unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());

        let path = store.put("e1-ann-0011223344556677", b"scan bytes").unwrap();
        assert_eq!(path, "e1-ann-0011223344556677.wmp");
        assert!(store.contains(&path));
        assert_eq!(store.get(&path).unwrap(), b"scan bytes");
    }

    #[test]
    fn test_no_temp_files_left_behind() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        store.put("k1", b"a").unwrap();
        store.put("k1", b"b").unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
        assert_eq!(store.get("k1.wmp").unwrap(), b"b");
    }

    #[test]
    fn test_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let err = store.get("../outside.wmp").unwrap_err();
        assert!(err.is_io());
        assert!(!store.contains("../outside.wmp"));
    }

    #[test]
    fn test_detects_corrupted_file() {
        let dir = tempdir().unwrap();
        let store = open(dir.path());
        let path = store.put("k", b"0123456789abcdef").unwrap();

        let full = dir.path().join(&path);
        let mut raw = fs::read(&full).unwrap();
        raw[16] ^= 0xFF;
        fs::write(&full, raw).unwrap();

        let err = store.get(&path).unwrap_err();
        assert!(err.is_io());
        assert!(err.to_string().contains("CRC"));
    }

    #[test]
    fn test_second_open_is_refused() {
        let dir = tempdir().unwrap();
        let _store = open(dir.path());
        let err = DirectoryStore::open(dir.path(), PersistentConfig::default()).unwrap_err();
        assert!(err.is_io());
    }
}
