//! Content-addressed blob storage
//!
//! Article payloads are stored once per distinct content, keyed by the hex
//! SHA-256 digest of the raw bytes. The first four hex characters become two
//! nested directory levels so no single directory accumulates every blob:
//! `<data-dir>/data/<hash[0:2]>/<hash[2:4]>/<full-hash>`.

use crate::error::Result;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// Directory under the data dir that holds the blob hierarchy
const BLOB_DIR: &str = "data";

/// Blob store rooted at `<data-dir>/data`
#[derive(Debug)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Blob store for the given data directory
    pub fn new(data_dir: &Path) -> Self {
        Self {
            root: data_dir.join(BLOB_DIR),
        }
    }

    /// Hex SHA-256 digest of `data`
    pub fn content_hash(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// Fan-out directory for a hash
    fn blob_dir(&self, hash: &str) -> PathBuf {
        self.root.join(&hash[0..2]).join(&hash[2..4])
    }

    /// Directory and leaf name for a hash
    fn blob_path(&self, hash: &str) -> PathBuf {
        self.blob_dir(hash).join(hash)
    }

    /// Write `data`, returning its content hash
    ///
    /// The write is idempotent: when a blob with the same hash already
    /// exists the call is a no-op beyond the existence check. New blobs are
    /// written to a temporary sibling and renamed into place, so concurrent
    /// writers of identical content cannot observe a torn file.
    pub fn write(&self, data: &[u8]) -> Result<String> {
        let hash = Self::content_hash(data);
        let path = self.blob_path(&hash);

        if path.exists() {
            trace!("blob {} already present", hash);
            return Ok(hash);
        }

        let dir = self.blob_dir(&hash);
        fs::create_dir_all(&dir)?;

        let tmp = dir.join(format!("{}.tmp{:08x}", hash, rand::random::<u32>()));
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        fs::rename(&tmp, &path)?;

        debug!("stored blob {} ({} bytes)", hash, data.len());
        Ok(hash)
    }

    /// Open a stored blob for reading
    ///
    /// Returns `Ok(None)` when no blob with that hash exists.
    pub fn open(&self, hash: &str) -> Result<Option<File>> {
        if hash.len() < 4 {
            return Ok(None);
        }
        match File::open(self.blob_path(hash)) {
            Ok(file) => Ok(Some(file)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use tempfile::TempDir;

    #[test]
    fn test_content_hash_is_hex_sha256() {
        // sha256("hello")
        assert_eq!(
            BlobStore::content_hash(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_blob_path_fanout() {
        let store = BlobStore::new(Path::new("/srv/news"));
        let hash = BlobStore::content_hash(b"hello");
        let path = store.blob_path(&hash);
        assert_eq!(
            path,
            Path::new("/srv/news/data/2c/f2")
                .join("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
    }

    #[test]
    fn test_write_and_open_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());

        let hash = store.write(b"payload").unwrap();
        let mut file = store.open(&hash).unwrap().unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"payload");
    }

    #[test]
    fn test_write_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());

        let first = store.write(b"same bytes").unwrap();
        let second = store.write(b"same bytes").unwrap();
        assert_eq!(first, second);

        // Exactly one regular file under the blob root
        let mut blobs = 0;
        for level1 in fs::read_dir(dir.path().join("data")).unwrap() {
            for level2 in fs::read_dir(level1.unwrap().path()).unwrap() {
                blobs += fs::read_dir(level2.unwrap().path()).unwrap().count();
            }
        }
        assert_eq!(blobs, 1);
    }

    #[test]
    fn test_open_missing_blob_is_none() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());
        let hash = BlobStore::content_hash(b"never stored");
        assert!(store.open(&hash).unwrap().is_none());
        assert!(store.open("").unwrap().is_none());
    }
}
