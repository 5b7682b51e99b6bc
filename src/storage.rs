use std::collections::HashMap;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

/// The single embedding bound to an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub identity: String,
    pub embedding: Vec<f32>,
}

/// Keyed storage of identity records. `put` overwrites.
pub trait IdentityStore {
    fn put(&self, record: &IdentityRecord) -> Result<()>;
    fn get(&self, identity: &str) -> Result<Option<IdentityRecord>>;
    /// Returns whether a record was present.
    fn remove(&self, identity: &str) -> Result<bool>;
}

impl<S: IdentityStore + ?Sized> IdentityStore for &S {
    fn put(&self, record: &IdentityRecord) -> Result<()> {
        (**self).put(record)
    }

    fn get(&self, identity: &str) -> Result<Option<IdentityRecord>> {
        (**self).get(identity)
    }

    fn remove(&self, identity: &str) -> Result<bool> {
        (**self).remove(identity)
    }
}

/// One postcard file per identity under a directory.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    root: PathBuf,
}

impl FileIdentityStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // Identities are arbitrary strings up to any length, so files are named by digest.
    // The record carries its identity and `get` checks it.
    fn record_path(&self, identity: &str) -> PathBuf {
        let digest = Sha256::digest(identity.as_bytes());
        self.root.join(format!("{}.bin", hex::encode(digest)))
    }
}

impl IdentityStore for FileIdentityStore {
    fn put(&self, record: &IdentityRecord) -> Result<()> {
        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("creating {}", self.root.display()))?;
        let path = self.record_path(&record.identity);
        let data = postcard::to_allocvec(record)?;

        // Write beside the target and rename so readers never see a partial record.
        let mut tmp = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("staging write in {}", self.root.display()))?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|err| anyhow!("replacing {}: {}", path.display(), err.error))?;

        log::debug!("stored record for {} at {}", record.identity, path.display());
        Ok(())
    }

    fn get(&self, identity: &str) -> Result<Option<IdentityRecord>> {
        let path = self.record_path(identity);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err).with_context(|| format!("reading {}", path.display()));
            }
        };
        let record: IdentityRecord =
            postcard::from_bytes(&data).with_context(|| format!("decoding {}", path.display()))?;
        if record.identity != identity {
            anyhow::bail!(
                "record at {} belongs to {}, not {}",
                path.display(),
                record.identity,
                identity
            );
        }
        Ok(Some(record))
    }

    fn remove(&self, identity: &str) -> Result<bool> {
        let path = self.record_path(identity);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("removing {}", path.display())),
        }
    }
}

/// Process-local store, shareable across threads.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    records: RwLock<HashMap<String, Vec<f32>>>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn put(&self, record: &IdentityRecord) -> Result<()> {
        self.records
            .write()
            .map_err(|_| anyhow!("identity store lock poisoned"))?
            .insert(record.identity.clone(), record.embedding.clone());
        Ok(())
    }

    fn get(&self, identity: &str) -> Result<Option<IdentityRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("identity store lock poisoned"))?;
        Ok(records.get(identity).map(|embedding| IdentityRecord {
            identity: identity.to_string(),
            embedding: embedding.clone(),
        }))
    }

    fn remove(&self, identity: &str) -> Result<bool> {
        Ok(self
            .records
            .write()
            .map_err(|_| anyhow!("identity store lock poisoned"))?
            .remove(identity)
            .is_some())
    }
}
