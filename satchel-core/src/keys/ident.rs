use crate::crypto::{agree, sign, wipe};
use crate::error::{Result, SatchelError};
use base32::Alphabet;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const KEY_LEN: usize = 32;

/// One-byte type prefixes inside the canonical text encoding.
pub const CIPHER_PREFIX: u8 = b'C';
pub const SIGNING_PREFIX: u8 = b'S';

const ALPHABET: Alphabet = Alphabet::Rfc4648 { padding: false };

fn encode_canonical(prefix: u8, bytes: &[u8; KEY_LEN]) -> String {
    let mut raw = [0u8; 1 + KEY_LEN];
    raw[0] = prefix;
    raw[1..].copy_from_slice(bytes);
    base32::encode(ALPHABET, &raw)
}

fn decode_canonical(prefix: u8, text: &str) -> Result<[u8; KEY_LEN]> {
    let raw = base32::decode(ALPHABET, text.trim())
        .ok_or_else(|| SatchelError::InvalidInput(format!("not a canonical key: {text:?}")))?;
    if raw.len() != 1 + KEY_LEN {
        return Err(SatchelError::InvalidInput(format!(
            "canonical key has wrong length ({})",
            raw.len()
        )));
    }
    if raw[0] != prefix {
        return Err(SatchelError::InvalidInput(format!(
            "canonical key has type prefix {:?}, expected {:?}",
            raw[0] as char, prefix as char
        )));
    }
    let mut out = [0u8; KEY_LEN];
    out.copy_from_slice(&raw[1..]);
    Ok(out)
}

/// Curve25519 public key (receiver side of key agreement). No secrets.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CipherKey([u8; KEY_LEN]);

impl CipherKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn canonical(&self) -> String {
        encode_canonical(CIPHER_PREFIX, &self.0)
    }

    pub fn from_canonical(text: &str) -> Result<Self> {
        Ok(Self(decode_canonical(CIPHER_PREFIX, text)?))
    }
}

/// Ed25519 verifying key. No secrets.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct SigningKey([u8; KEY_LEN]);

impl SigningKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn canonical(&self) -> String {
        encode_canonical(SIGNING_PREFIX, &self.0)
    }

    pub fn from_canonical(text: &str) -> Result<Self> {
        Ok(Self(decode_canonical(SIGNING_PREFIX, text)?))
    }
}

macro_rules! canonical_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.serialize_str(&self.canonical())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
                let text = String::deserialize(d)?;
                $ty::from_canonical(&text).map_err(D::Error::custom)
            }
        }
    };
}

canonical_serde!(CipherKey);
canonical_serde!(SigningKey);

/// Owning Curve25519 seed. Wiped on drop; copies are explicit.
pub struct CipherSeed([u8; KEY_LEN]);

impl CipherSeed {
    pub fn generate() -> Result<Self> {
        Ok(Self(wipe::random_array()?))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn public(&self) -> CipherKey {
        CipherKey(agree::cipher_public(&self.0))
    }

    pub fn duplicate(&self) -> Self {
        Self(self.0)
    }
}

impl Drop for CipherSeed {
    fn drop(&mut self) {
        wipe::wipe(&mut self.0);
    }
}

impl std::fmt::Debug for CipherSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CipherSeed(..)")
    }
}

/// Owning Ed25519 seed. Wiped on drop; copies are explicit.
pub struct SigningSeed([u8; KEY_LEN]);

impl SigningSeed {
    pub fn generate() -> Result<Self> {
        Ok(Self(wipe::random_array()?))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn public(&self) -> SigningKey {
        SigningKey(sign::signing_public(&self.0))
    }

    pub fn duplicate(&self) -> Self {
        Self(self.0)
    }

    pub fn sign_digest(&self, digest: &[u8; sign::DIGEST_LEN]) -> Result<Vec<u8>> {
        sign::sign_digest(&self.0, digest)
    }
}

impl Drop for SigningSeed {
    fn drop(&mut self) {
        wipe::wipe(&mut self.0);
    }
}

impl std::fmt::Debug for SigningSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SigningSeed(..)")
    }
}

macro_rules! seed_serde {
    ($ty:ident) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
                s.serialize_bytes(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
                let raw = serde_bytes_vec(d)?;
                let arr: [u8; KEY_LEN] = raw
                    .try_into()
                    .map_err(|_| D::Error::custom("seed must be 32 bytes"))?;
                Ok($ty(arr))
            }
        }
    };
}

/// CBOR writes byte strings; accept either a byte string or an int array.
fn serde_bytes_vec<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Vec<u8>, D::Error> {
    struct V;
    impl<'de> serde::de::Visitor<'de> for V {
        type Value = Vec<u8>;
        fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
            f.write_str("bytes")
        }
        fn visit_bytes<E: serde::de::Error>(self, v: &[u8]) -> std::result::Result<Vec<u8>, E> {
            Ok(v.to_vec())
        }
        fn visit_byte_buf<E: serde::de::Error>(self, v: Vec<u8>) -> std::result::Result<Vec<u8>, E> {
            Ok(v)
        }
        fn visit_seq<A: serde::de::SeqAccess<'de>>(
            self,
            mut seq: A,
        ) -> std::result::Result<Vec<u8>, A::Error> {
            let mut out = Vec::new();
            while let Some(b) = seq.next_element::<u8>()? {
                out.push(b);
            }
            Ok(out)
        }
    }
    d.deserialize_any(V)
}

seed_serde!(CipherSeed);
seed_serde!(SigningSeed);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_roundtrip() {
        let seed = CipherSeed::generate().unwrap();
        let pubkey = seed.public();
        let text = pubkey.canonical();
        assert_eq!(CipherKey::from_canonical(&text).unwrap(), pubkey);
    }

    #[test]
    fn prefix_mismatch_rejected() {
        let seed = SigningSeed::generate().unwrap();
        let text = seed.public().canonical();
        assert!(CipherKey::from_canonical(&text).is_err());
    }

    #[test]
    fn garbage_rejected() {
        assert!(CipherKey::from_canonical("not base32 !!!").is_err());
        assert!(CipherKey::from_canonical("").is_err());
    }

    #[test]
    fn seed_publics_are_stable() {
        let seed = CipherSeed::generate().unwrap();
        assert_eq!(seed.public(), seed.duplicate().public());
    }

    #[test]
    fn cbor_roundtrip_keys_and_seeds() {
        let cs = CipherSeed::generate().unwrap();
        let pk = cs.public();

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&pk, &mut buf).unwrap();
        let back: CipherKey = ciborium::de::from_reader(&buf[..]).unwrap();
        assert_eq!(back, pk);

        let mut buf = Vec::new();
        ciborium::ser::into_writer(&cs, &mut buf).unwrap();
        let back: CipherSeed = ciborium::de::from_reader(&buf[..]).unwrap();
        assert_eq!(back.as_bytes(), cs.as_bytes());
    }
}
