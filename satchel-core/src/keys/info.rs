use crate::crypto::sign::DIGEST_LEN;
use crate::error::Result;
use crate::keys::ident::{CipherKey, CipherSeed, SigningKey, SigningSeed};
use serde::{Deserialize, Serialize};

/// Public identity of a peer (or a sender's public half). No secrets.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    pub name: String,
    pub cipher_pub: CipherKey,
    pub signing_pub: SigningKey,
}

/// Sender-side identity: both seeds. Not `Clone` — copies are explicit
/// via `duplicate`, and each copy wipes independently.
#[derive(Debug, Serialize, Deserialize)]
pub struct KeyPairInfo {
    pub name: String,
    cipher_seed: CipherSeed,
    signing_seed: SigningSeed,
}

impl KeyPairInfo {
    pub fn new(name: impl Into<String>, cipher_seed: CipherSeed, signing_seed: SigningSeed) -> Self {
        Self {
            name: name.into(),
            cipher_seed,
            signing_seed,
        }
    }

    pub fn generate(name: impl Into<String>) -> Result<Self> {
        Ok(Self {
            name: name.into(),
            cipher_seed: CipherSeed::generate()?,
            signing_seed: SigningSeed::generate()?,
        })
    }

    pub fn cipher_seed(&self) -> &CipherSeed {
        &self.cipher_seed
    }

    pub fn signing_seed(&self) -> &SigningSeed {
        &self.signing_seed
    }

    pub fn public_info(&self) -> KeyInfo {
        KeyInfo {
            name: self.name.clone(),
            cipher_pub: self.cipher_seed.public(),
            signing_pub: self.signing_seed.public(),
        }
    }

    pub fn duplicate(&self) -> Self {
        Self {
            name: self.name.clone(),
            cipher_seed: self.cipher_seed.duplicate(),
            signing_seed: self.signing_seed.duplicate(),
        }
    }

    pub fn sign_digest(&self, digest: &[u8; DIGEST_LEN]) -> Result<Vec<u8>> {
        self.signing_seed.sign_digest(digest)
    }
}

/// Named peer record in the keystore.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub name: String,
    pub public_keys: KeyInfo,
}

impl Entity {
    pub fn new(name: impl Into<String>, public_keys: KeyInfo) -> Self {
        Self {
            name: name.into(),
            public_keys,
        }
    }
}
