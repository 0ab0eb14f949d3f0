use crate::crypto::wipe::SecretBytes;
use crate::error::{Result, SatchelError};
use crate::keys::ident::{CipherKey, CipherSeed, SigningKey, SigningSeed};
use crate::keys::info::{KeyInfo, KeyPairInfo};
use crate::symfile::header::PayloadType;
use crate::symfile::reader::read_symfile_to_writer;
use crate::symfile::writer::{SymOptions, write_symfile_from_reader};
use crate::textio::framing::{FrameMode, FramedReader, FramedWriter};
use serde::{Deserialize, Serialize};
use std::io::{BufReader, Write};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExportDataType {
    KeyInfo,
    KeyPairInfo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExportEncoding {
    Text,
    Raw,
}

/// Serialised payload of an export envelope. Seeds are present only for
/// keypair exports and wipe themselves on drop.
#[derive(Serialize, Deserialize, Debug)]
struct ExportKeyInfo {
    name: String,
    info_type: ExportDataType,
    cipher_pub: String,
    signing_pub: String,
    cipher_seed: Option<CipherSeed>,
    signing_seed: Option<SigningSeed>,
}

fn write_envelope(
    envelope: &ExportKeyInfo,
    password: &[u8],
    encoding: ExportEncoding,
    mode: FrameMode,
    dst: &mut dyn Write,
    opts: Option<&SymOptions>,
) -> Result<()> {
    let mut plain = Vec::new();
    ciborium::ser::into_writer(envelope, &mut plain)
        .map_err(|e| SatchelError::Format(format!("encode export: {e}")))?;

    let result = match encoding {
        ExportEncoding::Raw => write_symfile_from_reader(
            password,
            &mut &plain[..],
            dst,
            PayloadType::Stream,
            None,
            opts,
        )
        .map(|_| ()),
        ExportEncoding::Text => {
            let mut framed = FramedWriter::new(dst, mode);
            write_symfile_from_reader(
                password,
                &mut &plain[..],
                &mut framed,
                PayloadType::Stream,
                None,
                opts,
            )?;
            framed.finish().map_err(SatchelError::Io)
        }
    };
    crate::crypto::wipe::wipe(&mut plain);
    result
}

/// Export a public identity. The password may be empty — public keys are
/// not secret; the container wrapping is for transport integrity.
pub fn export_key_info(
    info: &KeyInfo,
    password: Option<&[u8]>,
    encoding: ExportEncoding,
    dst: &mut dyn Write,
    opts: Option<&SymOptions>,
) -> Result<()> {
    let envelope = ExportKeyInfo {
        name: info.name.clone(),
        info_type: ExportDataType::KeyInfo,
        cipher_pub: info.cipher_pub.canonical(),
        signing_pub: info.signing_pub.canonical(),
        cipher_seed: None,
        signing_seed: None,
    };
    write_envelope(
        &envelope,
        password.unwrap_or(b""),
        encoding,
        FrameMode::ExportUser,
        dst,
        opts,
    )
}

/// Export a full keypair. A non-empty password is required: the envelope
/// carries seeds.
pub fn export_keypair(
    keypair: &KeyPairInfo,
    password: &[u8],
    encoding: ExportEncoding,
    dst: &mut dyn Write,
    opts: Option<&SymOptions>,
) -> Result<()> {
    if password.is_empty() {
        return Err(SatchelError::InvalidInput(
            "keypair exports require a password".into(),
        ));
    }
    let info = keypair.public_info();
    let envelope = ExportKeyInfo {
        name: keypair.name.clone(),
        info_type: ExportDataType::KeyPairInfo,
        cipher_pub: info.cipher_pub.canonical(),
        signing_pub: info.signing_pub.canonical(),
        cipher_seed: Some(keypair.cipher_seed().duplicate()),
        signing_seed: Some(keypair.signing_seed().duplicate()),
    };
    write_envelope(
        &envelope,
        password,
        encoding,
        FrameMode::ExportKeypair,
        dst,
        opts,
    )
}

/// Parses an export artifact (text or raw), deriving the container key on
/// demand: the empty password is tried first, then the callback is asked
/// exactly once.
#[derive(Debug)]
pub struct ImportProcessor {
    envelope: ExportKeyInfo,
}

impl ImportProcessor {
    pub fn parse(
        data: &[u8],
        request_password: &mut dyn FnMut() -> Result<SecretBytes>,
    ) -> Result<Self> {
        let is_text = data
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .map(|i| data[i..].starts_with(b":start"))
            .unwrap_or(false);

        let container: Vec<u8> = if is_text {
            let reader = FramedReader::new(BufReader::new(data))?;
            let (_, bytes, _) = reader.decode_all()?;
            bytes
        } else {
            data.to_vec()
        };

        let mut plain = Vec::new();
        match read_symfile_to_writer(b"", &mut &container[..], &mut plain) {
            Ok(_) => {}
            Err(SatchelError::Integrity(_)) => {
                let password = request_password()?;
                plain.clear();
                read_symfile_to_writer(password.as_bytes(), &mut &container[..], &mut plain)?;
            }
            Err(e) => return Err(e),
        }

        let envelope: ExportKeyInfo = ciborium::de::from_reader(&plain[..])
            .map_err(|e| SatchelError::Format(format!("decode export: {e}")))?;
        crate::crypto::wipe::wipe(&mut plain);
        Ok(Self { envelope })
    }

    pub fn data_type(&self) -> ExportDataType {
        self.envelope.info_type
    }

    pub fn name(&self) -> &str {
        &self.envelope.name
    }

    pub fn key_info(&self) -> Result<KeyInfo> {
        Ok(KeyInfo {
            name: self.envelope.name.clone(),
            cipher_pub: CipherKey::from_canonical(&self.envelope.cipher_pub)?,
            signing_pub: SigningKey::from_canonical(&self.envelope.signing_pub)?,
        })
    }

    pub fn keypair_info(&self) -> Result<KeyPairInfo> {
        if self.envelope.info_type != ExportDataType::KeyPairInfo {
            return Err(SatchelError::InvalidInput(
                "envelope holds a public identity, not a keypair".into(),
            ));
        }
        let cipher_seed = self
            .envelope
            .cipher_seed
            .as_ref()
            .ok_or_else(|| SatchelError::Format("keypair envelope missing cipher seed".into()))?
            .duplicate();
        let signing_seed = self
            .envelope
            .signing_seed
            .as_ref()
            .ok_or_else(|| SatchelError::Format("keypair envelope missing signing seed".into()))?
            .duplicate();
        Ok(KeyPairInfo::new(
            self.envelope.name.clone(),
            cipher_seed,
            signing_seed,
        ))
    }
}
