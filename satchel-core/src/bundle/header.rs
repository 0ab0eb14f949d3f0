use crate::crypto::wipe::wipe;
use crate::error::{Result, SatchelError};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

pub const BUNDLE_VERSION: u8 = 1;

/// Guard against hostile length prefixes.
const MAX_HEADER_LEN: u32 = 1024 * 1024;

/// What fed the bundle's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum InputSource {
    Direct = 1,
    File = 2,
    MultiDir = 3,
}

impl From<InputSource> for u8 {
    fn from(v: InputSource) -> u8 {
        v as u8
    }
}

impl TryFrom<u8> for InputSource {
    type Error = String;

    fn try_from(v: u8) -> std::result::Result<Self, String> {
        match v {
            1 => Ok(InputSource::Direct),
            2 => Ok(InputSource::File),
            3 => Ok(InputSource::MultiDir),
            _ => Err(format!("unknown input source {v}")),
        }
    }
}

impl std::fmt::Display for InputSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InputSource::Direct => "Direct",
            InputSource::File => "File",
            InputSource::MultiDir => "MultiDir",
        })
    }
}

/// Self-describing bundle header, serialised as length-prefixed CBOR.
/// Everything the receiver needs travels here: both canonical cipher
/// publics (the signature binds them), the salt, the wrapped payload key
/// and the payload nonce base.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BundleHeader {
    pub version: u8,
    /// RFC-3339 UTC.
    pub create_date: String,
    /// Empty when the input was not a file.
    pub original_file_name: String,
    pub original_file_date: String,
    pub to_name: String,
    pub from_name: String,
    pub input_source: InputSource,
    pub sender_cipher_pub: String,
    pub receiver_cipher_pub: String,
    pub bundle_salt: Vec<u8>,
    pub wrapped_payload_key: Vec<u8>,
    pub nonce_base: Vec<u8>,
    pub sender_signature: Vec<u8>,
}

impl BundleHeader {
    /// CBOR body, without the length prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut body = Vec::new();
        ciborium::ser::into_writer(self, &mut body)
            .map_err(|e| SatchelError::Format(format!("encode bundle header: {e}")))?;
        Ok(body)
    }

    /// Write the length-prefixed header. Returns the digest of the body
    /// bytes; payload frames carry it as associated data, so any flip in
    /// the serialised header fails the first frame's tag.
    pub fn write_to(&self, w: &mut dyn Write) -> Result<[u8; 32]> {
        let body = self.to_bytes()?;
        w.write_all(&(body.len() as u32).to_be_bytes())?;
        w.write_all(&body)?;
        Ok(*blake3::hash(&body).as_bytes())
    }

    pub fn read_from(r: &mut dyn Read) -> Result<Self> {
        Self::read_bound(r).map(|(header, _)| header)
    }

    /// Read the header together with the body digest the payload frames
    /// are bound to.
    pub fn read_bound(r: &mut dyn Read) -> Result<(Self, [u8; 32])> {
        let mut len_buf = [0u8; 4];
        r.read_exact(&mut len_buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SatchelError::Format("truncated bundle header".into())
            } else {
                SatchelError::Io(e)
            }
        })?;
        let len = u32::from_be_bytes(len_buf);
        if len == 0 || len > MAX_HEADER_LEN {
            return Err(SatchelError::Format(format!(
                "bad bundle header length {len}"
            )));
        }
        let mut body = vec![0u8; len as usize];
        r.read_exact(&mut body).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SatchelError::Format("truncated bundle header".into())
            } else {
                SatchelError::Io(e)
            }
        })?;
        let header: BundleHeader = ciborium::de::from_reader(&body[..])
            .map_err(|e| SatchelError::Format(format!("decode bundle header: {e}")))?;
        if header.version != BUNDLE_VERSION {
            return Err(SatchelError::Format(format!(
                "unsupported bundle version {}",
                header.version
            )));
        }
        Ok((header, *blake3::hash(&body).as_bytes()))
    }

    /// Sanitised copy for details-only display.
    pub fn details(&self) -> BundleInfo {
        BundleInfo {
            version: self.version,
            create_date: self.create_date.clone(),
            original_file_name: self.original_file_name.clone(),
            original_file_date: self.original_file_date.clone(),
            to_name: self.to_name.clone(),
            from_name: self.from_name.clone(),
            input_source: self.input_source,
            sender_cipher_pub: self.sender_cipher_pub.clone(),
        }
    }
}

/// Header facts safe to print. Carries no key material beyond the
/// sender's public identity; the string buffers are still wiped on drop
/// so prompt/display copies do not linger.
#[derive(Debug)]
pub struct BundleInfo {
    pub version: u8,
    pub create_date: String,
    pub original_file_name: String,
    pub original_file_date: String,
    pub to_name: String,
    pub from_name: String,
    pub input_source: InputSource,
    pub sender_cipher_pub: String,
}

impl BundleInfo {
    pub fn wipe(&mut self) {
        for field in [
            &mut self.create_date,
            &mut self.original_file_name,
            &mut self.original_file_date,
            &mut self.to_name,
            &mut self.from_name,
            &mut self.sender_cipher_pub,
        ] {
            let mut bytes = std::mem::take(field).into_bytes();
            wipe(&mut bytes);
        }
    }
}

impl Drop for BundleInfo {
    fn drop(&mut self) {
        self.wipe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> BundleHeader {
        BundleHeader {
            version: BUNDLE_VERSION,
            create_date: "2026-08-01T00:00:00Z".into(),
            original_file_name: "doc.pdf".into(),
            original_file_date: "2026-07-31T00:00:00Z".into(),
            to_name: "bob".into(),
            from_name: "alice".into(),
            input_source: InputSource::File,
            sender_cipher_pub: "CAAAA".into(),
            receiver_cipher_pub: "CBBBB".into(),
            bundle_salt: vec![1; 16],
            wrapped_payload_key: vec![2; 72],
            nonce_base: vec![3; 24],
            sender_signature: vec![4; 100],
        }
    }

    #[test]
    fn header_roundtrip() {
        let h = sample();
        let mut buf = Vec::new();
        let written_digest = h.write_to(&mut buf).unwrap();
        let (back, read_digest) = BundleHeader::read_bound(&mut &buf[..]).unwrap();
        assert_eq!(back.to_name, "bob");
        assert_eq!(back.from_name, "alice");
        assert_eq!(back.input_source, InputSource::File);
        assert_eq!(back.wrapped_payload_key, h.wrapped_payload_key);
        assert_eq!(written_digest, read_digest);
    }

    #[test]
    fn digest_tracks_every_field() {
        let h = sample();
        let base = *blake3::hash(&h.to_bytes().unwrap()).as_bytes();

        let mut renamed = h.clone();
        renamed.to_name = "boc".into();
        assert_ne!(*blake3::hash(&renamed.to_bytes().unwrap()).as_bytes(), base);

        let mut resourced = h.clone();
        resourced.input_source = InputSource::Direct;
        assert_ne!(
            *blake3::hash(&resourced.to_bytes().unwrap()).as_bytes(),
            base
        );
    }

    #[test]
    fn truncated_header_rejected() {
        let mut buf = Vec::new();
        sample().write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(BundleHeader::read_from(&mut &buf[..]).is_err());
    }

    #[test]
    fn details_strip_key_material() {
        let h = sample();
        let info = h.details();
        assert_eq!(info.from_name, "alice");
        assert_eq!(info.input_source, InputSource::File);
    }

    #[test]
    fn info_wipe_clears_fields() {
        let mut info = sample().details();
        info.wipe();
        assert!(info.from_name.is_empty());
        assert!(info.sender_cipher_pub.is_empty());
    }
}
