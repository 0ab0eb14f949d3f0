use crate::crypto::aead::{AeadKey, NONCE_LEN, open_whole, seal_whole};
use crate::crypto::wipe::{SecretBytes, random_array};
use crate::error::{Result, SatchelError};
use chacha20poly1305::XNonce;
use hkdf::Hkdf;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

pub const PAYLOAD_KEY_LEN: usize = 32;
pub const SHARED_LEN: usize = 32;

/// Domain-separation string pinning the HKDF construction for bundle
/// header version 1.
const WRAP_INFO: &[u8] = b"satchel.bundle.key.v1";

const WRAP_AD: &[u8] = b"payload-key";

/// Curve25519 scalar multiplication between a 32-byte seed and a peer's
/// 32-byte public key.
pub fn shared_secret(seed: &[u8; 32], peer_pub: &[u8; 32]) -> SecretBytes {
    let secret = StaticSecret::from(*seed);
    let public = PublicKey::from(*peer_pub);
    SecretBytes::new(secret.diffie_hellman(&public).as_bytes().to_vec())
}

/// Public half of a cipher seed.
pub fn cipher_public(seed: &[u8; 32]) -> [u8; 32] {
    let secret = StaticSecret::from(*seed);
    *PublicKey::from(&secret).as_bytes()
}

/// `K = HKDF-SHA256(ikm = shared, salt = bundle_salt, info = WRAP_INFO)`.
pub fn derive_wrap_key(shared: &SecretBytes, salt: &[u8]) -> Result<AeadKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), shared.as_bytes());
    let mut okm = [0u8; PAYLOAD_KEY_LEN];
    hk.expand(WRAP_INFO, &mut okm)
        .map_err(|_| SatchelError::Crypto("hkdf expand failed".into()))?;
    Ok(AeadKey::new(okm))
}

/// Seal a freshly-generated payload key to the wrap key. Output layout:
/// `nonce:24 || ct:32+16`.
pub fn wrap_payload_key(wrap_key: &AeadKey, payload_key: &SecretBytes) -> Result<Vec<u8>> {
    let nonce_bytes: [u8; NONCE_LEN] = random_array()?;
    let nonce = XNonce::from_slice(&nonce_bytes).to_owned();
    let ct = seal_whole(wrap_key, &nonce, WRAP_AD, payload_key.as_bytes())?;
    let mut out = Vec::with_capacity(NONCE_LEN + ct.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ct);
    Ok(out)
}

/// Recover the payload key. Tag failure is `Integrity`.
pub fn unwrap_payload_key(wrap_key: &AeadKey, wrapped: &[u8]) -> Result<SecretBytes> {
    if wrapped.len() <= NONCE_LEN {
        return Err(SatchelError::Format("wrapped payload key too short".into()));
    }
    let nonce = XNonce::from_slice(&wrapped[..NONCE_LEN]).to_owned();
    let pt = open_whole(wrap_key, &nonce, WRAP_AD, &wrapped[NONCE_LEN..])?;
    if pt.len() != PAYLOAD_KEY_LEN {
        return Err(SatchelError::Format("payload key has wrong length".into()));
    }
    Ok(SecretBytes::new(pt))
}
