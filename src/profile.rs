use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde_json::{Map, Value};

/// Auxiliary account data returned with a successful verification.
pub type Profile = Map<String, Value>;

/// Secondary lookup of account data. Callers treat failures as "no profile".
pub trait ProfileStore {
    fn find_by_identity(&self, identity: &str) -> Result<Option<Profile>>;
}

impl<P: ProfileStore + ?Sized> ProfileStore for &P {
    fn find_by_identity(&self, identity: &str) -> Result<Option<Profile>> {
        (**self).find_by_identity(identity)
    }
}

/// Profile store with no data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProfiles;

impl ProfileStore for NoProfiles {
    fn find_by_identity(&self, _identity: &str) -> Result<Option<Profile>> {
        Ok(None)
    }
}

/// Accounts kept as a JSON array of objects, matched on their `email` field.
///
/// The file is re-read on every lookup so edits show up without a restart.
#[derive(Debug, Clone)]
pub struct JsonProfileStore {
    path: PathBuf,
}

impl JsonProfileStore {
    pub const KEY_FIELD: &'static str = "email";

    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl ProfileStore for JsonProfileStore {
    fn find_by_identity(&self, identity: &str) -> Result<Option<Profile>> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("reading profiles at {}", self.path.display()));
            }
        };
        let accounts: Vec<Profile> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing profiles {}", self.path.display()))?;

        Ok(accounts.into_iter().find(|account| {
            account.get(Self::KEY_FIELD).and_then(Value::as_str) == Some(identity)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn finds_first_matching_account() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("accounts.json");
        std::fs::write(
            &path,
            r#"[
                {"email": "b@x.com", "name": "Bea"},
                {"email": "a@x.com", "name": "Ann", "role": "student"},
                {"email": "a@x.com", "name": "Duplicate"}
            ]"#,
        )
        .unwrap();

        let store = JsonProfileStore::new(&path);
        let profile = store.find_by_identity("a@x.com").unwrap().unwrap();
        assert_eq!(profile["name"], "Ann");
        assert_eq!(profile["role"], "student");
        assert!(store.find_by_identity("c@x.com").unwrap().is_none());
    }

    #[test]
    fn missing_file_means_no_profile() {
        let store = JsonProfileStore::new("/nonexistent/accounts.json");
        assert!(store.find_by_identity("a@x.com").unwrap().is_none());
    }

    #[test]
    fn unreadable_path_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let parent = tmp.path().join("data");
        std::fs::write(&parent, b"").unwrap();
        let store = JsonProfileStore::new(parent.join("accounts.json"));
        assert!(store.find_by_identity("a@x.com").is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("accounts.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(JsonProfileStore::new(&path).find_by_identity("a@x.com").is_err());
    }
}
