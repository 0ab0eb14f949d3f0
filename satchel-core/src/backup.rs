use crate::config::{Config, PROFILES_DIR, Profile};
use crate::error::{Result, SatchelError};
use crate::stream::decode::OverwriteDecider;
use crate::stream::tree::ScanOptions;
use crate::symfile::header::PayloadType;
use crate::symfile::metadata::MetadataCollection;
use crate::symfile::reader::{read_symfile, read_symfile_metadata};
use crate::symfile::writer::{SymOptions, write_symfile_dirs_typed};
use std::path::{Path, PathBuf};

/// Metadata item carrying the serialised profile list.
pub const PROFILES_ITEM: &str = "PROFILES";

fn profiles_to_cbor(profiles: &[Profile]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    ciborium::ser::into_writer(&profiles, &mut out)
        .map_err(|e| SatchelError::Format(format!("encode profiles: {e}")))?;
    Ok(out)
}

fn profiles_from_cbor(bytes: &[u8]) -> Result<Vec<Profile>> {
    ciborium::de::from_reader(bytes)
        .map_err(|e| SatchelError::Format(format!("decode profiles: {e}")))
}

fn select<'a>(config: &'a Config, names: &[String]) -> Result<Vec<&'a Profile>> {
    if names.is_empty() {
        return Ok(config.profiles.iter().collect());
    }
    names
        .iter()
        .map(|n| {
            config
                .profile(n)
                .ok_or_else(|| SatchelError::NotFound(format!("profile {n:?}")))
        })
        .collect()
}

/// Encrypt the selected profile directories into a backup container.
/// The profile list rides in the metadata section, so a restore can show
/// contents before touching the payload. Returns payload bytes written.
pub fn backup_profiles(
    config: &Config,
    profile_names: &[String],
    output: &Path,
    password: &[u8],
    opts: Option<&SymOptions>,
) -> Result<u64> {
    let selected = select(config, profile_names)?;
    if selected.is_empty() {
        return Err(SatchelError::InvalidInput("no profiles to back up".into()));
    }

    let mut dirs: Vec<PathBuf> = Vec::new();
    let mut kept: Vec<Profile> = Vec::new();
    for p in selected {
        if p.path.as_os_str().is_empty() || !p.path.is_dir() {
            tracing::warn!(profile = %p.name, "profile directory missing, skipped");
            continue;
        }
        dirs.push(p.path.clone());
        kept.push(p.clone());
    }
    if dirs.is_empty() {
        return Err(SatchelError::InvalidInput(
            "none of the selected profiles has a directory on disk".into(),
        ));
    }

    let mut metadata = MetadataCollection::new();
    metadata.insert(PROFILES_ITEM, profiles_to_cbor(&kept)?)?;

    let scan_opts = ScanOptions {
        include_item_details: true,
        include_empty_paths: true,
        ..ScanOptions::default()
    };
    write_symfile_dirs_typed(
        password,
        &dirs,
        output,
        PayloadType::Backup,
        Some(&metadata),
        &scan_opts,
        opts,
    )
}

/// List the profiles inside a backup without reading any payload bytes.
pub fn read_backup_profiles(input: &Path, password: &[u8]) -> Result<Vec<Profile>> {
    let metadata = read_symfile_metadata(password, input)?;
    let item = metadata
        .get(PROFILES_ITEM)
        .ok_or_else(|| SatchelError::Format("backup has no profile listing".into()))?;
    profiles_from_cbor(&item.data)
}

/// Materialise a backup under `config_home` and rewrite config.yaml to
/// list the restored profiles (paths rebased onto the new home). Existing
/// files go through the overwrite arbitration; a negative answer on the
/// whole operation surfaces as `UserCancelled` from the decider.
pub fn restore_profiles(
    input: &Path,
    password: &[u8],
    config_home: &Path,
    profile_names: &[String],
    decider: Option<Box<dyn OverwriteDecider + '_>>,
) -> Result<Config> {
    let stored = read_backup_profiles(input, password)?;
    let wanted: Vec<&Profile> = if profile_names.is_empty() {
        stored.iter().collect()
    } else {
        profile_names
            .iter()
            .map(|n| {
                stored
                    .iter()
                    .find(|p| p.name.eq_ignore_ascii_case(n))
                    .ok_or_else(|| SatchelError::NotFound(format!("profile {n:?} in backup")))
            })
            .collect::<Result<_>>()?
    };
    if wanted.is_empty() {
        return Err(SatchelError::InvalidInput("backup lists no profiles".into()));
    }

    let dest = config_home.join(PROFILES_DIR);
    read_symfile(password, input, &dest, decider)?;

    let config_path = Config::path_in(config_home);
    let mut config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    for p in wanted {
        let mut rebased = Profile::under_home(config_home, &p.name);
        rebased.keypair_store_encrypted = p.keypair_store_encrypted;
        rebased.default_keypair_name = p.default_keypair_name.clone();
        config.upsert_profile(rebased);
    }
    config.save(&config_path)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::KdfCosts;
    use crate::keys::info::{Entity, KeyPairInfo};
    use crate::keys::keystore::Keystore;
    use std::fs;

    fn fast() -> SymOptions {
        SymOptions {
            kdf_costs: KdfCosts {
                m_cost: 8,
                t_cost: 1,
                p_cost: 1,
            },
            ..SymOptions::default()
        }
    }

    fn seeded_home(tmp: &Path) -> (Config, Entity) {
        let profile = Profile::under_home(tmp, "default");
        fs::create_dir_all(&profile.path).unwrap();

        let kp = KeyPairInfo::generate("peer").unwrap();
        let entity = Entity::new("peer", kp.public_info());
        let mut ks = Keystore::new();
        ks.add(entity.clone()).unwrap();
        ks.save_to(&profile.keystore_path, None, None).unwrap();

        let mut config = Config::default();
        config.add_profile(profile).unwrap();
        config.save(&Config::path_in(tmp)).unwrap();
        (config, entity)
    }

    #[test]
    fn backup_then_metadata_lists_profiles() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, _) = seeded_home(tmp.path());

        let out = tmp.path().join("bk.bsym");
        backup_profiles(&config, &[], &out, b"pw", Some(&fast())).unwrap();

        let listed = read_backup_profiles(&out, b"pw").unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "default");
    }

    #[test]
    fn restore_into_empty_home_rebuilds_keystore() {
        let src_home = tempfile::tempdir().unwrap();
        let (config, entity) = seeded_home(src_home.path());

        let out = src_home.path().join("bk.bsym");
        backup_profiles(&config, &[], &out, b"pw", Some(&fast())).unwrap();

        let new_home = tempfile::tempdir().unwrap();
        let restored = restore_profiles(&out, b"pw", new_home.path(), &[], None).unwrap();
        assert_eq!(restored.profiles.len(), 1);
        assert_eq!(restored.current_profile, "default");

        let profile = restored.current().unwrap();
        let ks = Keystore::load(&profile.keystore_path, None).unwrap();
        let back = ks.get("peer").unwrap();
        assert_eq!(back.public_keys, entity.public_keys);

        let cfg_on_disk = Config::load(&Config::path_in(new_home.path())).unwrap();
        assert_eq!(cfg_on_disk, restored);
    }

    #[test]
    fn unknown_profile_name_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, _) = seeded_home(tmp.path());
        let out = tmp.path().join("bk.bsym");
        let err = backup_profiles(&config, &["ghost".into()], &out, b"pw", Some(&fast()))
            .unwrap_err();
        assert!(matches!(err, SatchelError::NotFound(_)));
    }

    #[test]
    fn wrong_password_cannot_list() {
        let tmp = tempfile::tempdir().unwrap();
        let (config, _) = seeded_home(tmp.path());
        let out = tmp.path().join("bk.bsym");
        backup_profiles(&config, &[], &out, b"pw", Some(&fast())).unwrap();
        assert!(matches!(
            read_backup_profiles(&out, b"nope").unwrap_err(),
            SatchelError::Integrity(_)
        ));
    }
}
