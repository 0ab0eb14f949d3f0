use crate::crypto::wipe::random_array;
use crate::error::{Result, SatchelError};
use blake3::Hasher;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

pub const DIGEST_LEN: usize = 32;

/// Deterministic digest over the bundle header's bound fields:
/// sender and receiver cipher publics (canonical text), bundle salt,
/// wrapped payload key, creation timestamp.
pub fn canonical_digest(
    sender_cipher_pub: &str,
    receiver_cipher_pub: &str,
    bundle_salt: &[u8],
    wrapped_payload_key: &[u8],
    create_date: &str,
) -> [u8; DIGEST_LEN] {
    let mut h = Hasher::new();
    h.update(sender_cipher_pub.as_bytes());
    h.update(receiver_cipher_pub.as_bytes());
    h.update(bundle_salt);
    h.update(wrapped_payload_key);
    h.update(create_date.as_bytes());
    *h.finalize().as_bytes()
}

/// Chosen-text defence: the signed message is `random || digest`, so a
/// signature can never be obtained over attacker-chosen bytes alone.
#[derive(Serialize, Deserialize)]
struct RandomSignature {
    random: Vec<u8>,
    sig: Vec<u8>,
}

/// Sign a canonical digest, producing the serialised random-signature
/// envelope.
pub fn sign_digest(signing_seed: &[u8; 32], digest: &[u8; DIGEST_LEN]) -> Result<Vec<u8>> {
    let random: [u8; 32] = random_array()?;
    let mut msg = Vec::with_capacity(32 + DIGEST_LEN);
    msg.extend_from_slice(&random);
    msg.extend_from_slice(digest);

    let key = SigningKey::from_bytes(signing_seed);
    let sig = key.sign(&msg);

    let envelope = RandomSignature {
        random: random.to_vec(),
        sig: sig.to_bytes().to_vec(),
    };
    let mut out = Vec::new();
    ciborium::ser::into_writer(&envelope, &mut out)
        .map_err(|e| SatchelError::Format(format!("encode signature: {e}")))?;
    Ok(out)
}

/// Decode the envelope and verify the signature over `random || digest`.
pub fn verify_digest(
    verifying_pub: &[u8; 32],
    digest: &[u8; DIGEST_LEN],
    envelope: &[u8],
) -> Result<()> {
    let env: RandomSignature = ciborium::de::from_reader(envelope)
        .map_err(|e| SatchelError::Format(format!("decode signature: {e}")))?;
    if env.random.len() != 32 {
        return Err(SatchelError::Format("signature random must be 32 bytes".into()));
    }
    let sig = Signature::from_slice(&env.sig)
        .map_err(|_| SatchelError::Format("malformed signature bytes".into()))?;
    let key = VerifyingKey::from_bytes(verifying_pub)
        .map_err(|_| SatchelError::Format("malformed signing public key".into()))?;

    let mut msg = Vec::with_capacity(32 + DIGEST_LEN);
    msg.extend_from_slice(&env.random);
    msg.extend_from_slice(digest);

    key.verify(&msg, &sig)
        .map_err(|_| SatchelError::SignatureInvalid("sender signature does not verify".into()))
}

/// Public half of a signing seed.
pub fn signing_public(seed: &[u8; 32]) -> [u8; 32] {
    SigningKey::from_bytes(seed).verifying_key().to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_verify_roundtrip() {
        let seed: [u8; 32] = random_array().unwrap();
        let digest = canonical_digest("a", "b", &[1, 2], &[3, 4], "2026-01-01T00:00:00Z");
        let env = sign_digest(&seed, &digest).unwrap();
        verify_digest(&signing_public(&seed), &digest, &env).unwrap();
    }

    #[test]
    fn envelopes_are_randomised() {
        let seed: [u8; 32] = random_array().unwrap();
        let digest = canonical_digest("a", "b", &[], &[], "d");
        let e1 = sign_digest(&seed, &digest).unwrap();
        let e2 = sign_digest(&seed, &digest).unwrap();
        assert_ne!(e1, e2);
    }

    #[test]
    fn wrong_key_fails() {
        let seed: [u8; 32] = random_array().unwrap();
        let other: [u8; 32] = random_array().unwrap();
        let digest = canonical_digest("a", "b", &[], &[], "d");
        let env = sign_digest(&seed, &digest).unwrap();
        let err = verify_digest(&signing_public(&other), &digest, &env).unwrap_err();
        assert!(matches!(err, SatchelError::SignatureInvalid(_)));
    }

    #[test]
    fn altered_digest_fails() {
        let seed: [u8; 32] = random_array().unwrap();
        let digest = canonical_digest("a", "b", &[], &[], "d");
        let env = sign_digest(&seed, &digest).unwrap();
        let altered = canonical_digest("a", "b", &[], &[], "e");
        let err = verify_digest(&signing_public(&seed), &altered, &env).unwrap_err();
        assert!(matches!(err, SatchelError::SignatureInvalid(_)));
    }
}
