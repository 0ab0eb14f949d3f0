use crate::bundle::header::{BUNDLE_VERSION, BundleHeader, InputSource};
use crate::crypto::aead::{AeadKey, DEFAULT_CHUNK_SIZE, NONCE_LEN, StreamSealer};
use crate::crypto::agree;
use crate::crypto::kdf::SALT_LEN;
use crate::crypto::sign::canonical_digest;
use crate::crypto::wipe::{SecretBytes, random_array};
use crate::error::{Result, SatchelError};
use crate::keys::info::{KeyInfo, KeyPairInfo};
use crate::stream::encode::{EncodeOptions, TreeStream};
use crate::stream::tree::ScanOptions;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

/// Split-mode artifact extensions.
pub const HEADER_EXT: &str = "bhdr";
pub const DATA_EXT: &str = "bdata";

#[derive(Clone, Copy, Debug)]
pub struct BundleOptions {
    pub chunk_size: usize,
    /// Per-block compression for multi-dir payloads.
    pub compress: bool,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compress: true,
        }
    }
}

fn effective(opts: Option<&BundleOptions>) -> BundleOptions {
    opts.copied().unwrap_or_default()
}

fn now_rfc3339() -> Result<String> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| SatchelError::Format(format!("format date: {e}")))
}

fn mtime_rfc3339(path: &Path) -> String {
    std::fs::metadata(path)
        .and_then(|md| md.modified())
        .ok()
        .map(OffsetDateTime::from)
        .and_then(|t| t.format(&Rfc3339).ok())
        .unwrap_or_default()
}

/// Freshly generated payload key plus the header binding it to the
/// receiver and signing it by the sender.
fn build_header(
    sender: &KeyPairInfo,
    receiver: &KeyInfo,
    input_source: InputSource,
    original_file_name: String,
    original_file_date: String,
) -> Result<(BundleHeader, SecretBytes)> {
    if receiver.name.trim().is_empty() {
        return Err(SatchelError::InvalidInput("receiver name is empty".into()));
    }
    if sender.name.trim().is_empty() {
        return Err(SatchelError::InvalidInput("sender name is empty".into()));
    }

    let payload_key = SecretBytes::random(agree::PAYLOAD_KEY_LEN)?;
    let bundle_salt: [u8; SALT_LEN] = random_array()?;
    let nonce_base: [u8; NONCE_LEN] = random_array()?;

    let sender_cipher_pub = sender.cipher_seed().public();
    let shared = agree::shared_secret(
        sender.cipher_seed().as_bytes(),
        receiver.cipher_pub.as_bytes(),
    );
    let wrap_key = agree::derive_wrap_key(&shared, &bundle_salt)?;
    let wrapped_payload_key = agree::wrap_payload_key(&wrap_key, &payload_key)?;

    let create_date = now_rfc3339()?;
    let digest = canonical_digest(
        &sender_cipher_pub.canonical(),
        &receiver.cipher_pub.canonical(),
        &bundle_salt,
        &wrapped_payload_key,
        &create_date,
    );
    let sender_signature = sender.sign_digest(&digest)?;

    let header = BundleHeader {
        version: BUNDLE_VERSION,
        create_date,
        original_file_name,
        original_file_date,
        to_name: receiver.name.clone(),
        from_name: sender.name.clone(),
        input_source,
        sender_cipher_pub: sender_cipher_pub.canonical(),
        receiver_cipher_pub: receiver.cipher_pub.canonical(),
        bundle_salt: bundle_salt.to_vec(),
        wrapped_payload_key,
        nonce_base: nonce_base.to_vec(),
        sender_signature,
    };
    Ok((header, payload_key))
}

fn payload_sealer(
    header: &BundleHeader,
    payload_key: &SecretBytes,
    opts: &BundleOptions,
) -> Result<StreamSealer> {
    let nonce_base: [u8; NONCE_LEN] = header
        .nonce_base
        .as_slice()
        .try_into()
        .map_err(|_| SatchelError::Format("nonce base must be 24 bytes".into()))?;
    Ok(StreamSealer::with_chunk_size(
        AeadKey::from_slice(payload_key.as_bytes())?,
        nonce_base,
        opts.chunk_size,
    ))
}

/// Header and encrypted frames in one artifact.
pub fn write_combined_from_reader(
    sender: &KeyPairInfo,
    receiver: &KeyInfo,
    input_source: InputSource,
    src: &mut dyn Read,
    dst: &mut dyn Write,
    opts: Option<&BundleOptions>,
) -> Result<u64> {
    let opts = effective(opts);
    let (header, payload_key) =
        build_header(sender, receiver, input_source, String::new(), String::new())?;
    let binding = header.write_to(dst)?;
    let mut sealer = payload_sealer(&header, &payload_key, &opts)?.bind(&binding);
    sealer.seal_stream(src, dst)
}

/// Header to one artifact, encrypted frames to a sibling.
pub fn write_split_from_reader(
    sender: &KeyPairInfo,
    receiver: &KeyInfo,
    input_source: InputSource,
    src: &mut dyn Read,
    hdr_dst: &mut dyn Write,
    data_dst: &mut dyn Write,
    opts: Option<&BundleOptions>,
) -> Result<u64> {
    let opts = effective(opts);
    let (header, payload_key) =
        build_header(sender, receiver, input_source, String::new(), String::new())?;
    let binding = header.write_to(hdr_dst)?;
    let mut sealer = payload_sealer(&header, &payload_key, &opts)?.bind(&binding);
    sealer.seal_stream(src, data_dst)
}

/// Bundle one file (combined), recording its name and timestamp.
pub fn write_combined_from_file(
    sender: &KeyPairInfo,
    receiver: &KeyInfo,
    input: &Path,
    dst: &mut dyn Write,
    opts: Option<&BundleOptions>,
) -> Result<u64> {
    let opts = effective(opts);
    let (header, payload_key) = build_header(
        sender,
        receiver,
        InputSource::File,
        file_name(input)?,
        mtime_rfc3339(input),
    )?;
    let binding = header.write_to(dst)?;
    let mut f = File::open(input)?;
    let mut sealer = payload_sealer(&header, &payload_key, &opts)?.bind(&binding);
    sealer.seal_stream(&mut f, dst)
}

/// Bundle one file (split).
pub fn write_split_from_file(
    sender: &KeyPairInfo,
    receiver: &KeyInfo,
    input: &Path,
    hdr_dst: &mut dyn Write,
    data_dst: &mut dyn Write,
    opts: Option<&BundleOptions>,
) -> Result<u64> {
    let opts = effective(opts);
    let (header, payload_key) = build_header(
        sender,
        receiver,
        InputSource::File,
        file_name(input)?,
        mtime_rfc3339(input),
    )?;
    let binding = header.write_to(hdr_dst)?;
    let mut f = File::open(input)?;
    let mut sealer = payload_sealer(&header, &payload_key, &opts)?.bind(&binding);
    sealer.seal_stream(&mut f, data_dst)
}

/// Bundle directory roots as a multi-tree archive payload (combined).
pub fn write_combined_from_dirs(
    sender: &KeyPairInfo,
    receiver: &KeyInfo,
    dirs: &[PathBuf],
    scan_opts: &ScanOptions,
    dst: &mut dyn Write,
    opts: Option<&BundleOptions>,
) -> Result<u64> {
    if dirs.is_empty() {
        return Err(SatchelError::InvalidInput("no input directories".into()));
    }
    let opts = effective(opts);
    let (header, payload_key) = build_header(
        sender,
        receiver,
        InputSource::MultiDir,
        String::new(),
        String::new(),
    )?;
    let binding = header.write_to(dst)?;
    let mut stream = TreeStream::from_roots(
        dirs,
        scan_opts,
        EncodeOptions {
            compress: opts.compress,
            chunk_size: opts.chunk_size,
        },
    )?;
    let mut sealer = payload_sealer(&header, &payload_key, &opts)?.bind(&binding);
    sealer.seal_stream(&mut stream, dst)
}

/// File-targeted combined write.
pub fn write_combined_to_file(
    sender: &KeyPairInfo,
    receiver: &KeyInfo,
    input: &Path,
    output: &Path,
    opts: Option<&BundleOptions>,
) -> Result<u64> {
    let mut out = File::create(output)?;
    write_combined_from_file(sender, receiver, input, &mut out, opts)
}

/// File-targeted split write: `foo.ext` becomes `foo.bhdr` + `foo.bdata`.
pub fn write_split_to_files(
    sender: &KeyPairInfo,
    receiver: &KeyInfo,
    input: &Path,
    output_base: &Path,
    opts: Option<&BundleOptions>,
) -> Result<(PathBuf, PathBuf)> {
    let (hdr_path, data_path) = split_paths(output_base);
    let mut hdr = File::create(&hdr_path)?;
    let mut data = File::create(&data_path)?;
    write_split_from_file(sender, receiver, input, &mut hdr, &mut data, opts)?;
    Ok((hdr_path, data_path))
}

/// `foo.ext` → (`foo.bhdr`, `foo.bdata`); extensionless paths gain them.
pub fn split_paths(base: &Path) -> (PathBuf, PathBuf) {
    (
        base.with_extension(HEADER_EXT),
        base.with_extension(DATA_EXT),
    )
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| SatchelError::InvalidInput("input has no file name".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(name: &str) -> KeyPairInfo {
        KeyPairInfo::generate(name).unwrap()
    }

    #[test]
    fn empty_receiver_name_rejected_before_output() {
        let sender = pair("alice");
        let receiver_kp = pair("");
        let receiver = receiver_kp.public_info();

        let mut out = Vec::new();
        let err = write_combined_from_reader(
            &sender,
            &receiver,
            InputSource::Direct,
            &mut &b"x"[..],
            &mut out,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, SatchelError::InvalidInput(_)));
        assert!(out.is_empty());
    }

    #[test]
    fn combined_artifact_starts_with_header() {
        let sender = pair("alice");
        let receiver = pair("bob").public_info();
        let mut out = Vec::new();
        write_combined_from_reader(
            &sender,
            &receiver,
            InputSource::Direct,
            &mut &b"secret"[..],
            &mut out,
            None,
        )
        .unwrap();
        let header = BundleHeader::read_from(&mut &out[..]).unwrap();
        assert_eq!(header.from_name, "alice");
        assert_eq!(header.to_name, "bob");
        assert_eq!(header.input_source, InputSource::Direct);
        assert_eq!(header.bundle_salt.len(), SALT_LEN);
        assert_eq!(header.nonce_base.len(), NONCE_LEN);
    }

    #[test]
    fn split_paths_use_fixed_extensions() {
        let (h, d) = split_paths(Path::new("/tmp/out.bin"));
        assert_eq!(h, Path::new("/tmp/out.bhdr"));
        assert_eq!(d, Path::new("/tmp/out.bdata"));
    }
}
