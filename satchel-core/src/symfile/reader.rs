use crate::crypto::aead::{AeadKey, StreamOpener};
use crate::crypto::kdf;
use crate::error::{Result, SatchelError};
use crate::stream::decode::{OverwriteDecider, TreeWriter};
use crate::symfile::header::{PayloadType, SymHeader};
use crate::symfile::metadata::MetadataCollection;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};

/// Open container: parsed header, decrypted metadata, and the payload
/// stream positioned at the first frame.
pub struct SymReader<R: Read> {
    header: SymHeader,
    metadata: MetadataCollection,
    opener: StreamOpener,
    src: R,
}

impl<R: Read> SymReader<R> {
    /// Parse the header, derive the key, decrypt the metadata section.
    /// The payload is untouched until `copy_payload`.
    pub fn open(password: &[u8], mut src: R) -> Result<Self> {
        let header = SymHeader::read_from(&mut src)?;
        let key = kdf::derive_key(password, &header.kdf_salt, header.kdf_costs)?;
        let opener = StreamOpener::new(AeadKey::from_slice(key.as_bytes())?, header.nonce_base);

        let metadata = if header.metadata_blob.is_empty() {
            MetadataCollection::new()
        } else {
            let plain = opener.open_metadata(&header.metadata_blob)?;
            MetadataCollection::from_cbor(&plain)?
        };

        Ok(Self {
            header,
            metadata,
            opener,
            src,
        })
    }

    pub fn header(&self) -> &SymHeader {
        &self.header
    }

    pub fn payload_type(&self) -> PayloadType {
        self.header.payload_type
    }

    pub fn metadata(&self) -> &MetadataCollection {
        &self.metadata
    }

    pub fn take_metadata(&mut self) -> MetadataCollection {
        std::mem::take(&mut self.metadata)
    }

    /// Decrypt all payload frames into a writer. Returns plaintext bytes.
    pub fn copy_payload(&mut self, dst: &mut dyn Write) -> Result<u64> {
        self.opener.open_stream(&mut self.src, dst)
    }
}

/// Decrypt a container file into `output`. Dispatch follows the payload
/// type:
/// - `MultiDir`/`Backup`: `output` must be a directory; the payload is
///   wired into the tree decoder (overwrite policy from `decider`).
/// - `File`: when `output` is a directory, the embedded source file name
///   decides the on-disk name; otherwise `output` is the file path.
/// - `Stream`: bytes written verbatim to the `output` path.
///
/// Returns bytes written.
pub fn read_symfile(
    password: &[u8],
    input_path: &Path,
    output: &Path,
    decider: Option<Box<dyn OverwriteDecider + '_>>,
) -> Result<u64> {
    let f = File::open(input_path)
        .map_err(|e| SatchelError::InvalidInput(format!("{}: {e}", input_path.display())))?;
    let mut reader = SymReader::open(password, BufReader::new(f))?;

    match reader.payload_type() {
        PayloadType::MultiDir | PayloadType::Backup => {
            if output.exists() && !output.is_dir() {
                return Err(SatchelError::InvalidInput(format!(
                    "{} is not a directory",
                    output.display()
                )));
            }
            std::fs::create_dir_all(output)?;
            let mut tw = match decider {
                Some(d) => TreeWriter::new(output, d),
                None => TreeWriter::without_confirmation(output),
            };
            let n = reader.copy_payload(&mut tw)?;
            tw.finish()?;
            Ok(n)
        }
        PayloadType::File => {
            let target: PathBuf = if output.is_dir() {
                let name = reader
                    .header()
                    .source_file
                    .as_ref()
                    .map(|i| i.name.clone())
                    .ok_or_else(|| {
                        SatchelError::Format("file payload missing source info".into())
                    })?;
                output.join(name)
            } else {
                output.to_path_buf()
            };
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(&target)?;
            reader.copy_payload(&mut out)
        }
        PayloadType::Stream => {
            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut out = File::create(output)?;
            reader.copy_payload(&mut out)
        }
    }
}

/// Decrypt a container from any reader straight into a writer, ignoring
/// the payload-type dispatch (console and pipe outputs).
pub fn read_symfile_to_writer(
    password: &[u8],
    src: &mut dyn Read,
    dst: &mut dyn Write,
) -> Result<u64> {
    let mut reader = SymReader::open(password, src)?;
    reader.copy_payload(dst)
}

/// Read only the header and decrypt the metadata section. The payload is
/// never touched.
pub fn read_symfile_metadata(password: &[u8], input_path: &Path) -> Result<MetadataCollection> {
    let f = File::open(input_path)
        .map_err(|e| SatchelError::InvalidInput(format!("{}: {e}", input_path.display())))?;
    let mut reader = SymReader::open(password, BufReader::new(f))?;
    Ok(reader.take_metadata())
}
