use crate::error::{Result, SatchelError};
use crate::keys::pairstore::DEFAULT_KEYPAIR;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.yaml";
pub const KEYSTORE_FILE: &str = "keystore.dat";
pub const KEYPAIR_STORE_FILE: &str = "keypair-store.dat";
pub const PROFILES_DIR: &str = "profiles";
pub const DEFAULT_PROFILE: &str = "default";

/// One keystore + one keypair store + defaults, grouped under a profile
/// directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    pub path: PathBuf,
    pub keystore_path: PathBuf,
    pub keypair_store_path: PathBuf,
    pub keypair_store_encrypted: bool,
    pub default_keypair_name: String,
}

impl Profile {
    /// Profile rooted at `<home>/profiles/<name>` with the standard store
    /// file names.
    pub fn under_home(home: &Path, name: &str) -> Self {
        let path = home.join(PROFILES_DIR).join(name);
        Self {
            name: name.to_string(),
            keystore_path: path.join(KEYSTORE_FILE),
            keypair_store_path: path.join(KEYPAIR_STORE_FILE),
            path,
            keypair_store_encrypted: false,
            default_keypair_name: DEFAULT_KEYPAIR.to_string(),
        }
    }
}

/// The YAML document at `<config_home>/config.yaml`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub current_profile: String,
    pub profiles: Vec<Profile>,
}

impl Config {
    pub fn config_home() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|d| d.join("satchel"))
            .ok_or_else(|| SatchelError::NotFound("no config directory on this system".into()))
    }

    pub fn path_in(home: &Path) -> PathBuf {
        home.join(CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .map_err(|e| SatchelError::NotFound(format!("{}: {e}", path.display())))?;
        serde_yaml::from_str(&text)
            .map_err(|e| SatchelError::Format(format!("parse config: {e}")))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_yaml::to_string(self)
            .map_err(|e| SatchelError::Format(format!("encode config: {e}")))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, text)?;
        Ok(())
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn current(&self) -> Result<&Profile> {
        self.profile(&self.current_profile).ok_or_else(|| {
            SatchelError::NotFound(format!(
                "current profile {:?} is not configured",
                self.current_profile
            ))
        })
    }

    /// Switch the current profile. Idempotent: returns false when it was
    /// already current (callers then skip the config rewrite).
    pub fn set_current(&mut self, name: &str) -> Result<bool> {
        let profile = self
            .profile(name)
            .ok_or_else(|| SatchelError::NotFound(format!("profile {name:?}")))?;
        let canonical = profile.name.clone();
        if self.current_profile == canonical {
            return Ok(false);
        }
        self.current_profile = canonical;
        Ok(true)
    }

    pub fn add_profile(&mut self, profile: Profile) -> Result<()> {
        if self.profile(&profile.name).is_some() {
            return Err(SatchelError::ConflictExists(profile.name));
        }
        if self.profiles.is_empty() {
            self.current_profile = profile.name.clone();
        }
        self.profiles.push(profile);
        Ok(())
    }

    /// Replace a profile with the same name, or append.
    pub fn upsert_profile(&mut self, profile: Profile) {
        if let Some(existing) = self
            .profiles
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(&profile.name))
        {
            *existing = profile;
        } else {
            if self.profiles.is_empty() {
                self.current_profile = profile.name.clone();
            }
            self.profiles.push(profile);
        }
    }
}
