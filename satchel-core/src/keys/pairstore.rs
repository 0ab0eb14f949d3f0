use crate::error::{Result, SatchelError};
use crate::keys::info::KeyPairInfo;
use crate::symfile::header::{MAGIC, PayloadType};
use crate::symfile::reader::read_symfile_to_writer;
use crate::symfile::writer::{SymOptions, write_symfile_from_reader};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const STORE_VERSION: u8 = 1;

/// The identity used when `--from` is not given.
pub const DEFAULT_KEYPAIR: &str = "default";
/// Internal identities encrypting local artifacts for the local user.
pub const LOCAL_READ_KEYPAIR: &str = "local-read";
pub const LOCAL_WRITE_KEYPAIR: &str = "local-write";

pub fn is_reserved(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower == DEFAULT_KEYPAIR || lower == LOCAL_READ_KEYPAIR || lower == LOCAL_WRITE_KEYPAIR
}

#[derive(Serialize, Deserialize)]
struct StoreBlob {
    version: u8,
    keypairs: Vec<KeyPairInfo>,
}

/// Case-insensitive `name → KeyPairInfo` mapping. Always carries the
/// reserved `default` identity and the internal local read/write pair.
#[derive(Default)]
pub struct KeypairStore {
    keypairs: BTreeMap<String, KeyPairInfo>,
    origin: Option<PathBuf>,
}

impl KeypairStore {
    /// Fresh store with the reserved identities generated.
    pub fn init() -> Result<Self> {
        let mut store = Self::default();
        for name in [DEFAULT_KEYPAIR, LOCAL_READ_KEYPAIR, LOCAL_WRITE_KEYPAIR] {
            store
                .keypairs
                .insert(name.to_string(), KeyPairInfo::generate(name)?);
        }
        Ok(store)
    }

    pub fn load(path: &Path, password: Option<&[u8]>) -> Result<Self> {
        let raw = fs::read(path)
            .map_err(|e| SatchelError::NotFound(format!("{}: {e}", path.display())))?;
        let plain = if raw.starts_with(MAGIC) {
            let password = password.ok_or_else(|| {
                SatchelError::InvalidInput("store is encrypted; password required".into())
            })?;
            let mut out = Vec::new();
            read_symfile_to_writer(password, &mut &raw[..], &mut out)?;
            out
        } else {
            raw
        };

        let blob: StoreBlob = ciborium::de::from_reader(&plain[..])
            .map_err(|e| SatchelError::Format(format!("decode store: {e}")))?;
        if blob.version != STORE_VERSION {
            return Err(SatchelError::Format(format!(
                "unsupported store version {}",
                blob.version
            )));
        }

        let mut store = Self {
            origin: Some(path.to_path_buf()),
            ..Self::default()
        };
        for kp in blob.keypairs {
            store.keypairs.insert(kp.name.to_lowercase(), kp);
        }
        for name in [DEFAULT_KEYPAIR, LOCAL_READ_KEYPAIR, LOCAL_WRITE_KEYPAIR] {
            if !store.keypairs.contains_key(name) {
                return Err(SatchelError::Format(format!(
                    "store is missing reserved identity {name:?}"
                )));
            }
        }
        Ok(store)
    }

    pub fn set_origin(&mut self, path: impl Into<PathBuf>) {
        self.origin = Some(path.into());
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    pub fn save_to_origin(&self, password: Option<&[u8]>, opts: Option<&SymOptions>) -> Result<()> {
        let origin = self
            .origin
            .clone()
            .ok_or_else(|| SatchelError::InvalidInput("store has no origin path".into()))?;
        self.save_to(&origin, password, opts)
    }

    pub fn save_to(
        &self,
        path: &Path,
        password: Option<&[u8]>,
        opts: Option<&SymOptions>,
    ) -> Result<()> {
        let blob = StoreBlob {
            version: STORE_VERSION,
            keypairs: self.keypairs.values().map(|kp| kp.duplicate()).collect(),
        };
        let mut plain = Vec::new();
        ciborium::ser::into_writer(&blob, &mut plain)
            .map_err(|e| SatchelError::Format(format!("encode store: {e}")))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let result = match password {
            Some(pw) => {
                let mut out = fs::File::create(path)?;
                write_symfile_from_reader(
                    pw,
                    &mut &plain[..],
                    &mut out,
                    PayloadType::Stream,
                    None,
                    opts,
                )
                .map(|_| ())
            }
            None => fs::write(path, &plain).map_err(SatchelError::Io),
        };
        crate::crypto::wipe::wipe(&mut plain);
        result?;
        tracing::debug!(path = %path.display(), entries = self.keypairs.len(), "keypair store saved");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&KeyPairInfo> {
        self.keypairs.get(&name.to_lowercase())
    }

    pub fn default_keypair(&self) -> Result<&KeyPairInfo> {
        self.get(DEFAULT_KEYPAIR)
            .ok_or_else(|| SatchelError::NotFound(DEFAULT_KEYPAIR.into()))
    }

    pub fn local_read(&self) -> Result<&KeyPairInfo> {
        self.get(LOCAL_READ_KEYPAIR)
            .ok_or_else(|| SatchelError::NotFound(LOCAL_READ_KEYPAIR.into()))
    }

    pub fn local_write(&self) -> Result<&KeyPairInfo> {
        self.get(LOCAL_WRITE_KEYPAIR)
            .ok_or_else(|| SatchelError::NotFound(LOCAL_WRITE_KEYPAIR.into()))
    }

    pub fn add(&mut self, keypair: KeyPairInfo) -> Result<()> {
        let key = keypair.name.to_lowercase();
        if key.is_empty() {
            return Err(SatchelError::InvalidInput("keypair name is empty".into()));
        }
        if self.keypairs.contains_key(&key) {
            return Err(SatchelError::ConflictExists(keypair.name));
        }
        self.keypairs.insert(key, keypair);
        Ok(())
    }

    pub fn update(&mut self, keypair: KeyPairInfo) -> Result<()> {
        let key = keypair.name.to_lowercase();
        if !self.keypairs.contains_key(&key) {
            return Err(SatchelError::NotFound(keypair.name));
        }
        self.keypairs.insert(key, keypair);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<KeyPairInfo> {
        if is_reserved(name) {
            return Err(SatchelError::NotPermitted(format!(
                "{name:?} is a reserved identity"
            )));
        }
        self.keypairs
            .remove(&name.to_lowercase())
            .ok_or_else(|| SatchelError::NotFound(name.to_string()))
    }

    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if is_reserved(old) || is_reserved(new) {
            return Err(SatchelError::NotPermitted(
                "reserved identities cannot be renamed".into(),
            ));
        }
        if new.trim().is_empty() {
            return Err(SatchelError::InvalidInput("new name is empty".into()));
        }
        if self.keypairs.contains_key(&new.to_lowercase()) {
            return Err(SatchelError::ConflictExists(new.to_string()));
        }
        let mut kp = self.remove(old)?;
        kp.name = new.to_string();
        self.add(kp)
    }

    pub fn walk<F>(&self, filter: Option<&str>, sort: bool, mut f: F) -> Result<usize>
    where
        F: FnMut(&KeyPairInfo) -> Result<()>,
    {
        let pattern = filter
            .map(|p| {
                Pattern::new(&p.to_lowercase())
                    .map_err(|e| SatchelError::InvalidInput(format!("bad filter {p:?}: {e}")))
            })
            .transpose()?;

        let mut names: Vec<&String> = self.keypairs.keys().collect();
        if sort {
            names.sort_unstable();
        }

        let mut visited = 0;
        for key in names {
            let kp = &self.keypairs[key];
            if let Some(p) = &pattern {
                if !p.matches(key) {
                    continue;
                }
            }
            f(kp)?;
            visited += 1;
        }
        Ok(visited)
    }

    pub fn len(&self) -> usize {
        self.keypairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypairs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_creates_reserved_identities() {
        let store = KeypairStore::init().unwrap();
        assert!(store.default_keypair().is_ok());
        assert!(store.local_read().is_ok());
        assert!(store.local_write().is_ok());
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn reserved_names_cannot_be_removed_or_renamed() {
        let mut store = KeypairStore::init().unwrap();
        assert!(matches!(
            store.remove("default").unwrap_err(),
            SatchelError::NotPermitted(_)
        ));
        assert!(matches!(
            store.rename("Default", "other").unwrap_err(),
            SatchelError::NotPermitted(_)
        ));
        assert!(matches!(
            store.rename("other", "local-read").unwrap_err(),
            SatchelError::NotPermitted(_)
        ));
    }

    #[test]
    fn add_rename_remove_cycle() {
        let mut store = KeypairStore::init().unwrap();
        store.add(KeyPairInfo::generate("work").unwrap()).unwrap();
        store.rename("WORK", "work2").unwrap();
        assert!(store.get("work").is_none());
        assert!(store.get("work2").is_some());
        store.remove("work2").unwrap();
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn persistence_roundtrip_keeps_seeds() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("keypair-store.dat");
        let store = KeypairStore::init().unwrap();
        let expect = store.default_keypair().unwrap().public_info();
        store.save_to(&path, None, None).unwrap();

        let back = KeypairStore::load(&path, None).unwrap();
        assert_eq!(back.default_keypair().unwrap().public_info(), expect);
    }

    #[test]
    fn load_rejects_store_without_reserved_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("keypair-store.dat");
        let blob = StoreBlob {
            version: STORE_VERSION,
            keypairs: vec![KeyPairInfo::generate("just-one").unwrap()],
        };
        let mut plain = Vec::new();
        ciborium::ser::into_writer(&blob, &mut plain).unwrap();
        fs::write(&path, &plain).unwrap();
        assert!(KeypairStore::load(&path, None).is_err());
    }
}
