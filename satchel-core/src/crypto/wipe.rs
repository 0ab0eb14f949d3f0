use crate::error::{Result, SatchelError};
use std::ops::Deref;

/// Overwrite a buffer with fresh random bytes. Falls back to zero-fill if
/// the system RNG is unavailable (residue must never survive either way).
pub fn wipe(buf: &mut [u8]) {
    if buf.is_empty() {
        return;
    }
    if getrandom::getrandom(buf).is_err() {
        buf.fill(0);
    }
}

/// Fill a buffer with cryptographically-random bytes.
pub fn fill_random(buf: &mut [u8]) -> Result<()> {
    getrandom::getrandom(buf).map_err(|e| SatchelError::Crypto(format!("rng: {e}")))
}

pub fn random_array<const N: usize>() -> Result<[u8; N]> {
    let mut out = [0u8; N];
    fill_random(&mut out)?;
    Ok(out)
}

/// Owning container for transient secret bytes (passwords, derived keys).
/// The backing memory is wiped when the container drops.
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn random(len: usize) -> Result<Self> {
        let mut v = vec![0u8; len];
        fill_random(&mut v)?;
        Ok(Self(v))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Explicit clone; each copy wipes independently.
    pub fn duplicate(&self) -> Self {
        Self(self.0.clone())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for SecretBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl Drop for SecretBytes {
    fn drop(&mut self) {
        wipe(&mut self.0);
    }
}

impl std::fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecretBytes({} bytes)", self.0.len())
    }
}
