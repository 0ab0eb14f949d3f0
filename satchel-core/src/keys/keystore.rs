use crate::error::{Result, SatchelError};
use crate::keys::info::Entity;
use crate::symfile::header::{MAGIC, PayloadType};
use crate::symfile::reader::read_symfile_to_writer;
use crate::symfile::writer::{SymOptions, write_symfile_from_reader};
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const STORE_VERSION: u8 = 1;

#[derive(Serialize, Deserialize)]
struct StoreBlob {
    version: u8,
    entities: Vec<Entity>,
}

/// Case-insensitive `name → Entity` mapping, persisted as a CBOR blob
/// which may be wrapped in a symmetric container under a store password.
#[derive(Default, Debug)]
pub struct Keystore {
    entities: BTreeMap<String, Entity>,
    origin: Option<PathBuf>,
}

impl Keystore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from disk. An encrypted blob (container magic) requires the
    /// store password; a raw blob ignores it.
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
        for e in blob.entities {
            store.entities.insert(e.name.to_lowercase(), e);
        }
        Ok(store)
    }

    pub fn set_origin(&mut self, path: impl Into<PathBuf>) {
        self.origin = Some(path.into());
    }

    pub fn origin(&self) -> Option<&Path> {
        self.origin.as_deref()
    }

    /// Serialise and rewrite the on-disk blob. A password produces an
    /// encrypted store; `None` writes it raw. Changing the password is
    /// just saving again with the new one.
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
            entities: self.entities.values().cloned().collect(),
        };
        let mut plain = Vec::new();
        ciborium::ser::into_writer(&blob, &mut plain)
            .map_err(|e| SatchelError::Format(format!("encode store: {e}")))?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        match password {
            Some(pw) => {
                let mut out = fs::File::create(path)?;
                write_symfile_from_reader(
                    pw,
                    &mut &plain[..],
                    &mut out,
                    PayloadType::Stream,
                    None,
                    opts,
                )?;
            }
            None => fs::write(path, &plain)?,
        }
        tracing::debug!(path = %path.display(), entries = self.entities.len(), "store saved");
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Entity> {
        self.entities.get(&name.to_lowercase())
    }

    pub fn add(&mut self, entity: Entity) -> Result<()> {
        let key = entity.name.to_lowercase();
        if key.is_empty() {
            return Err(SatchelError::InvalidInput("entity name is empty".into()));
        }
        if self.entities.contains_key(&key) {
            return Err(SatchelError::ConflictExists(entity.name));
        }
        self.entities.insert(key, entity);
        Ok(())
    }

    pub fn update(&mut self, entity: Entity) -> Result<()> {
        let key = entity.name.to_lowercase();
        if !self.entities.contains_key(&key) {
            return Err(SatchelError::NotFound(entity.name));
        }
        self.entities.insert(key, entity);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Result<Entity> {
        self.entities
            .remove(&name.to_lowercase())
            .ok_or_else(|| SatchelError::NotFound(name.to_string()))
    }

    /// Remove + re-add under the new name, preserving contents.
    pub fn rename(&mut self, old: &str, new: &str) -> Result<()> {
        if new.trim().is_empty() {
            return Err(SatchelError::InvalidInput("new name is empty".into()));
        }
        if self.entities.contains_key(&new.to_lowercase()) {
            return Err(SatchelError::ConflictExists(new.to_string()));
        }
        let mut entity = self.remove(old)?;
        entity.name = new.to_string();
        entity.public_keys.name = new.to_string();
        self.add(entity)
    }

    /// Visit entries, optionally filtered by a name glob and sorted
    /// case-insensitively. Returns the number of entries visited.
    pub fn walk<F>(&self, filter: Option<&str>, sort: bool, mut f: F) -> Result<usize>
    where
        F: FnMut(&Entity) -> Result<()>,
    {
        let pattern = filter
            .map(|p| {
                Pattern::new(&p.to_lowercase())
                    .map_err(|e| SatchelError::InvalidInput(format!("bad filter {p:?}: {e}")))
            })
            .transpose()?;

        let mut names: Vec<&String> = self.entities.keys().collect();
        if sort {
            names.sort_unstable();
        }

        let mut visited = 0;
        for key in names {
            let entity = &self.entities[key];
            if let Some(p) = &pattern {
                if !p.matches(key) {
                    continue;
                }
            }
            f(entity)?;
            visited += 1;
        }
        Ok(visited)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
