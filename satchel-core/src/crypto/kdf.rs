use crate::crypto::wipe::{SecretBytes, random_array};
use crate::error::{Result, SatchelError};
use argon2::{Algorithm, Argon2, Params, Version};

pub const SALT_LEN: usize = 16;
pub const KEY_LEN: usize = 32;

/// Argon2id costs carried in the container header so readers rebuild the
/// exact function. Defaults: 64 MiB memory, 3 passes, 4 lanes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KdfCosts {
    /// Memory in KiB.
    pub m_cost: u32,
    pub t_cost: u32,
    pub p_cost: u32,
}

impl Default for KdfCosts {
    fn default() -> Self {
        Self {
            m_cost: 64 * 1024,
            t_cost: 3,
            p_cost: 4,
        }
    }
}

pub fn random_salt() -> Result<[u8; SALT_LEN]> {
    random_array()
}

/// Derive the 32-byte container key from a password and per-container salt.
pub fn derive_key(
    password: &[u8],
    salt: &[u8; SALT_LEN],
    costs: KdfCosts,
) -> Result<SecretBytes> {
    let params = Params::new(costs.m_cost, costs.t_cost, costs.p_cost, Some(KEY_LEN))
        .map_err(|e| SatchelError::Crypto(format!("kdf params: {e}")))?;
    let argon = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
    let mut key = vec![0u8; KEY_LEN];
    argon
        .hash_password_into(password, salt, &mut key)
        .map_err(|e| SatchelError::Crypto(format!("kdf: {e}")))?;
    Ok(SecretBytes::new(key))
}
