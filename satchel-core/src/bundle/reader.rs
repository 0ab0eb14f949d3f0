use crate::bundle::header::{BundleHeader, BundleInfo, InputSource};
use crate::crypto::aead::{AeadKey, NONCE_LEN, StreamOpener};
use crate::crypto::agree;
use crate::crypto::sign::{canonical_digest, verify_digest};
use crate::crypto::wipe::SecretBytes;
use crate::error::{Result, SatchelError};
use crate::keys::ident::{CipherKey, SigningKey};
use crate::keys::info::KeyPairInfo;
use crate::keys::keystore::Keystore;
use crate::stream::decode::{OverwriteDecider, TreeWriter};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Resolve the sender's signing key from the keystore entity named in the
/// header. Local-keys mode skips this and uses the pairstore directly.
pub fn sender_signing_key(keystore: &Keystore, from_name: &str) -> Result<SigningKey> {
    let entity = keystore
        .get(from_name)
        .ok_or_else(|| SatchelError::NotFound(format!("sender {from_name:?} not in keystore")))?;
    Ok(entity.public_keys.signing_pub.clone())
}

/// Verification steps 2–4: reproduce the shared secret, check the sender
/// signature over the canonical digest, then unwrap the payload key.
/// Signature failure is `SignatureInvalid`; unwrap failure is `Integrity`.
pub fn open_payload_key(
    header: &BundleHeader,
    receiver: &KeyPairInfo,
    sender_signing_pub: &SigningKey,
) -> Result<SecretBytes> {
    let sender_pub = CipherKey::from_canonical(&header.sender_cipher_pub)
        .map_err(|_| SatchelError::Format("malformed sender cipher key".into()))?;
    let shared = agree::shared_secret(receiver.cipher_seed().as_bytes(), sender_pub.as_bytes());
    let wrap_key = agree::derive_wrap_key(&shared, &header.bundle_salt)?;

    let digest = canonical_digest(
        &header.sender_cipher_pub,
        &header.receiver_cipher_pub,
        &header.bundle_salt,
        &header.wrapped_payload_key,
        &header.create_date,
    );
    verify_digest(sender_signing_pub.as_bytes(), &digest, &header.sender_signature)?;

    agree::unwrap_payload_key(&wrap_key, &header.wrapped_payload_key)
}

fn payload_opener(header: &BundleHeader, payload_key: &SecretBytes) -> Result<StreamOpener> {
    let nonce_base: [u8; NONCE_LEN] = header
        .nonce_base
        .as_slice()
        .try_into()
        .map_err(|_| SatchelError::Format("nonce base must be 24 bytes".into()))?;
    Ok(StreamOpener::new(
        AeadKey::from_slice(payload_key.as_bytes())?,
        nonce_base,
    ))
}

/// Verified bundle with the payload stream positioned at its first frame.
pub struct BundleReader<R: Read> {
    header: BundleHeader,
    opener: StreamOpener,
    src: R,
}

impl<R: Read> BundleReader<R> {
    /// Combined artifact: header then frames in one stream.
    pub fn open_combined(
        receiver: &KeyPairInfo,
        sender_signing_pub: &SigningKey,
        mut src: R,
    ) -> Result<Self> {
        let (header, binding) = BundleHeader::read_bound(&mut src)?;
        let payload_key = open_payload_key(&header, receiver, sender_signing_pub)?;
        let opener = payload_opener(&header, &payload_key)?.bind(&binding);
        Ok(Self {
            header,
            opener,
            src,
        })
    }

    /// Split artifacts: header from one stream, frames from another.
    pub fn open_split(
        receiver: &KeyPairInfo,
        sender_signing_pub: &SigningKey,
        hdr_src: &mut dyn Read,
        src: R,
    ) -> Result<Self> {
        let (header, binding) = BundleHeader::read_bound(hdr_src)?;
        let payload_key = open_payload_key(&header, receiver, sender_signing_pub)?;
        let opener = payload_opener(&header, &payload_key)?.bind(&binding);
        Ok(Self {
            header,
            opener,
            src,
        })
    }

    pub fn header(&self) -> &BundleHeader {
        &self.header
    }

    pub fn copy_payload(&mut self, dst: &mut dyn Write) -> Result<u64> {
        self.opener.open_stream(&mut self.src, dst)
    }

    /// Decode a multi-dir payload under `dest`.
    pub fn extract_payload(
        &mut self,
        dest: &Path,
        decider: Option<Box<dyn OverwriteDecider + '_>>,
    ) -> Result<u64> {
        if self.header.input_source != InputSource::MultiDir {
            return Err(SatchelError::InvalidInput(
                "bundle payload is not a directory archive".into(),
            ));
        }
        std::fs::create_dir_all(dest)?;
        let mut tw = match decider {
            Some(d) => TreeWriter::new(dest, d),
            None => TreeWriter::without_confirmation(dest),
        };
        let n = self.opener.open_stream(&mut self.src, &mut tw)?;
        tw.finish()?;
        Ok(n)
    }
}

/// Parse only the header and return displayable details. Nothing is
/// verified or decrypted; the payload is never read.
pub fn get_bundle_details_from_reader(src: &mut dyn Read) -> Result<BundleInfo> {
    let header = BundleHeader::read_from(src)?;
    Ok(header.details())
}

pub fn get_bundle_details_from_file(path: &Path) -> Result<BundleInfo> {
    let mut f = BufReader::new(File::open(path)?);
    get_bundle_details_from_reader(&mut f)
}

/// Combined artifact decrypted straight into a writer.
pub fn read_combined_to_writer(
    receiver: &KeyPairInfo,
    sender_signing_pub: &SigningKey,
    src: &mut dyn Read,
    dst: &mut dyn Write,
) -> Result<u64> {
    let mut reader = BundleReader::open_combined(receiver, sender_signing_pub, src)?;
    reader.copy_payload(dst)
}

/// Combined artifact to a named file, or into a directory (the embedded
/// original name applies when the output is a directory).
pub fn read_combined_to_file(
    receiver: &KeyPairInfo,
    sender_signing_pub: &SigningKey,
    input: &Path,
    output: &Path,
) -> Result<u64> {
    let f = File::open(input)
        .map_err(|e| SatchelError::InvalidInput(format!("{}: {e}", input.display())))?;
    let mut reader =
        BundleReader::open_combined(receiver, sender_signing_pub, BufReader::new(f))?;
    let target = file_target(reader.header(), output)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = File::create(&target)?;
    reader.copy_payload(&mut out)
}

/// Combined multi-dir artifact extracted under `dest`.
pub fn read_combined_to_dir(
    receiver: &KeyPairInfo,
    sender_signing_pub: &SigningKey,
    input: &Path,
    dest: &Path,
    decider: Option<Box<dyn OverwriteDecider + '_>>,
) -> Result<u64> {
    let f = File::open(input)
        .map_err(|e| SatchelError::InvalidInput(format!("{}: {e}", input.display())))?;
    let mut reader =
        BundleReader::open_combined(receiver, sender_signing_pub, BufReader::new(f))?;
    reader.extract_payload(dest, decider)
}

/// Split pair decrypted into a writer. Both artifacts are required.
pub fn read_split_to_writer(
    receiver: &KeyPairInfo,
    sender_signing_pub: &SigningKey,
    hdr_input: &Path,
    data_input: &Path,
    dst: &mut dyn Write,
) -> Result<u64> {
    let mut hdr = BufReader::new(File::open(hdr_input).map_err(|e| {
        SatchelError::InvalidInput(format!("{}: {e}", hdr_input.display()))
    })?);
    let data = BufReader::new(File::open(data_input).map_err(|e| {
        SatchelError::InvalidInput(format!("{}: {e}", data_input.display()))
    })?);
    let mut reader = BundleReader::open_split(receiver, sender_signing_pub, &mut hdr, data)?;
    reader.copy_payload(dst)
}

pub fn read_split_to_file(
    receiver: &KeyPairInfo,
    sender_signing_pub: &SigningKey,
    hdr_input: &Path,
    data_input: &Path,
    output: &Path,
) -> Result<u64> {
    let mut hdr = BufReader::new(File::open(hdr_input).map_err(|e| {
        SatchelError::InvalidInput(format!("{}: {e}", hdr_input.display()))
    })?);
    let data = BufReader::new(File::open(data_input).map_err(|e| {
        SatchelError::InvalidInput(format!("{}: {e}", data_input.display()))
    })?);
    let mut reader = BundleReader::open_split(receiver, sender_signing_pub, &mut hdr, data)?;
    let target = file_target(reader.header(), output)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut out = File::create(&target)?;
    reader.copy_payload(&mut out)
}

pub fn read_split_to_dir(
    receiver: &KeyPairInfo,
    sender_signing_pub: &SigningKey,
    hdr_input: &Path,
    data_input: &Path,
    dest: &Path,
    decider: Option<Box<dyn OverwriteDecider + '_>>,
) -> Result<u64> {
    let mut hdr = BufReader::new(File::open(hdr_input).map_err(|e| {
        SatchelError::InvalidInput(format!("{}: {e}", hdr_input.display()))
    })?);
    let data = BufReader::new(File::open(data_input).map_err(|e| {
        SatchelError::InvalidInput(format!("{}: {e}", data_input.display()))
    })?);
    let mut reader = BundleReader::open_split(receiver, sender_signing_pub, &mut hdr, data)?;
    reader.extract_payload(dest, decider)
}

fn file_target(header: &BundleHeader, output: &Path) -> Result<PathBuf> {
    if output.is_dir() {
        if header.original_file_name.is_empty() {
            return Err(SatchelError::InvalidInput(
                "bundle has no original file name; give a file path".into(),
            ));
        }
        Ok(output.join(&header.original_file_name))
    } else {
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::writer::{
        write_combined_from_dirs, write_combined_from_reader, write_split_from_reader,
    };
    use crate::stream::tree::ScanOptions;

    fn pair(name: &str) -> KeyPairInfo {
        KeyPairInfo::generate(name).unwrap()
    }

    #[test]
    fn combined_roundtrip() {
        let alice = pair("alice");
        let bob = pair("bob");
        let payload = b"meet at dawn".to_vec();

        let mut artifact = Vec::new();
        write_combined_from_reader(
            &alice,
            &bob.public_info(),
            InputSource::Direct,
            &mut &payload[..],
            &mut artifact,
            None,
        )
        .unwrap();

        let mut out = Vec::new();
        let n = read_combined_to_writer(
            &bob,
            &alice.signing_seed().public(),
            &mut &artifact[..],
            &mut out,
        )
        .unwrap();
        assert_eq!(n, payload.len() as u64);
        assert_eq!(out, payload);
    }

    #[test]
    fn wrong_sender_key_is_signature_invalid() {
        let alice = pair("alice");
        let bob = pair("bob");
        let mallory = pair("mallory");

        let mut artifact = Vec::new();
        write_combined_from_reader(
            &alice,
            &bob.public_info(),
            InputSource::Direct,
            &mut &b"x"[..],
            &mut artifact,
            None,
        )
        .unwrap();

        let mut out = Vec::new();
        let err = read_combined_to_writer(
            &bob,
            &mallory.signing_seed().public(),
            &mut &artifact[..],
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, SatchelError::SignatureInvalid(_)));
    }

    #[test]
    fn wrong_receiver_seed_is_integrity() {
        let alice = pair("alice");
        let bob = pair("bob");
        let carol = pair("carol");

        let mut artifact = Vec::new();
        write_combined_from_reader(
            &alice,
            &bob.public_info(),
            InputSource::Direct,
            &mut &b"x"[..],
            &mut artifact,
            None,
        )
        .unwrap();

        let mut out = Vec::new();
        let err = read_combined_to_writer(
            &carol,
            &alice.signing_seed().public(),
            &mut &artifact[..],
            &mut out,
        )
        .unwrap_err();
        assert!(matches!(err, SatchelError::Integrity(_)));
    }

    #[test]
    fn any_byte_flip_fails_read() {
        let alice = pair("alice");
        let bob = pair("bob");

        let mut artifact = Vec::new();
        write_combined_from_reader(
            &alice,
            &bob.public_info(),
            InputSource::Direct,
            &mut &b"payload bytes"[..],
            &mut artifact,
            None,
        )
        .unwrap();

        // the artifact is short enough to flip every single byte
        for idx in 0..artifact.len() {
            let mut tampered = artifact.clone();
            tampered[idx] ^= 0x01;
            let mut out = Vec::new();
            assert!(
                read_combined_to_writer(
                    &bob,
                    &alice.signing_seed().public(),
                    &mut &tampered[..],
                    &mut out,
                )
                .is_err(),
                "flip at {idx} must fail"
            );
        }
    }

    // a header field outside the signed digest (to_name, input_source,
    // original_file_name) is still bound to the payload frames; editing
    // it without touching signature or payload must fail the tag
    #[test]
    fn unsigned_header_field_tamper_is_integrity() {
        let alice = pair("alice");
        let bob = pair("bob");

        let mut artifact = Vec::new();
        write_combined_from_reader(
            &alice,
            &bob.public_info(),
            InputSource::Direct,
            &mut &b"secret"[..],
            &mut artifact,
            None,
        )
        .unwrap();

        let (header, _) = BundleHeader::read_bound(&mut &artifact[..]).unwrap();
        let hdr_len = 4 + u32::from_be_bytes(artifact[..4].try_into().unwrap()) as usize;
        let payload = artifact[hdr_len..].to_vec();

        let mut renamed = header.clone();
        renamed.to_name = "boc".into();
        let mut resourced = header.clone();
        resourced.input_source = InputSource::File;
        let mut refiled = header.clone();
        refiled.original_file_name = "dov.pdf".into();

        for tampered_header in [renamed, resourced, refiled] {
            let mut tampered = Vec::new();
            tampered_header.write_to(&mut tampered).unwrap();
            tampered.extend_from_slice(&payload);

            let mut out = Vec::new();
            let err = read_combined_to_writer(
                &bob,
                &alice.signing_seed().public(),
                &mut &tampered[..],
                &mut out,
            )
            .unwrap_err();
            assert!(matches!(err, SatchelError::Integrity(_)));
        }
    }

    #[test]
    fn split_roundtrip() {
        let alice = pair("alice");
        let bob = pair("bob");

        let mut hdr = Vec::new();
        let mut data = Vec::new();
        write_split_from_reader(
            &alice,
            &bob.public_info(),
            InputSource::Direct,
            &mut &b"split payload"[..],
            &mut hdr,
            &mut data,
            None,
        )
        .unwrap();
        assert!(!hdr.is_empty());
        assert!(!data.is_empty());

        let mut reader = BundleReader::open_split(
            &bob,
            &alice.signing_seed().public(),
            &mut &hdr[..],
            &data[..],
        )
        .unwrap();
        let mut out = Vec::new();
        reader.copy_payload(&mut out).unwrap();
        assert_eq!(out, b"split payload");
    }

    #[test]
    fn details_only_reads_header() {
        let alice = pair("alice");
        let bob = pair("bob");
        let mut artifact = Vec::new();
        write_combined_from_reader(
            &alice,
            &bob.public_info(),
            InputSource::Direct,
            &mut &b"x"[..],
            &mut artifact,
            None,
        )
        .unwrap();

        let info = get_bundle_details_from_reader(&mut &artifact[..]).unwrap();
        assert_eq!(info.from_name, "alice");
        assert_eq!(info.to_name, "bob");
        assert_eq!(info.input_source, InputSource::Direct);
    }

    #[test]
    fn multidir_payload_extracts() {
        let alice = pair("alice");
        let bob = pair("bob");

        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("docs");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("note.txt"), b"hello").unwrap();

        let mut artifact = Vec::new();
        write_combined_from_dirs(
            &alice,
            &bob.public_info(),
            &[src],
            &ScanOptions::default(),
            &mut artifact,
            None,
        )
        .unwrap();

        let dest = tmp.path().join("out");
        let mut reader = BundleReader::open_combined(
            &bob,
            &alice.signing_seed().public(),
            &artifact[..],
        )
        .unwrap();
        reader.extract_payload(&dest, None).unwrap();
        assert_eq!(
            std::fs::read(dest.join("docs/note.txt")).unwrap(),
            b"hello"
        );
    }
}
