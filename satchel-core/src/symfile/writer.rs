use crate::crypto::aead::{AeadKey, DEFAULT_CHUNK_SIZE, NONCE_LEN, StreamSealer};
use crate::crypto::kdf::{self, KdfCosts};
use crate::crypto::wipe::random_array;
use crate::error::{Result, SatchelError};
use crate::stream::encode::{EncodeOptions, TreeStream};
use crate::stream::tree::ScanOptions;
use crate::symfile::header::{PayloadType, SourceFileInfo, SymHeader};
use crate::symfile::metadata::MetadataCollection;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Writer-side tuning. Readers need none of this; everything they need
/// travels in the header.
#[derive(Clone, Copy, Debug)]
pub struct SymOptions {
    pub kdf_costs: KdfCosts,
    pub chunk_size: usize,
    /// Per-block compression for multi-dir payloads.
    pub compress: bool,
}

impl Default for SymOptions {
    fn default() -> Self {
        Self {
            kdf_costs: KdfCosts::default(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            compress: true,
        }
    }
}

fn effective(opts: Option<&SymOptions>) -> SymOptions {
    opts.copied().unwrap_or_default()
}

/// Emit the header (metadata sealed under the container key) and hand
/// back the sealer positioned for payload frames.
fn start_container(
    password: &[u8],
    dst: &mut dyn Write,
    payload_type: PayloadType,
    metadata: Option<&MetadataCollection>,
    source_file: Option<SourceFileInfo>,
    opts: &SymOptions,
) -> Result<StreamSealer> {
    let kdf_salt = kdf::random_salt()?;
    let nonce_base: [u8; NONCE_LEN] = random_array()?;
    let key = kdf::derive_key(password, &kdf_salt, opts.kdf_costs)?;
    let sealer = StreamSealer::with_chunk_size(
        AeadKey::from_slice(key.as_bytes())?,
        nonce_base,
        opts.chunk_size,
    );

    let metadata_blob = match metadata {
        Some(md) if !md.is_empty() => sealer.seal_metadata(&md.to_cbor()?)?,
        _ => Vec::new(),
    };

    let header = SymHeader {
        version: crate::symfile::header::SYM_VERSION,
        kdf_salt,
        kdf_costs: opts.kdf_costs,
        nonce_base,
        payload_type,
        metadata_blob,
        source_file,
    };
    header.write_to(dst)?;
    Ok(sealer)
}

/// Wrap an arbitrary payload stream. `File` payloads carry a source-file
/// block and must go through `write_symfile_from_file`.
pub fn write_symfile_from_reader(
    password: &[u8],
    src: &mut dyn Read,
    dst: &mut dyn Write,
    payload_type: PayloadType,
    metadata: Option<&MetadataCollection>,
    opts: Option<&SymOptions>,
) -> Result<u64> {
    if payload_type == PayloadType::File {
        return Err(SatchelError::InvalidInput(
            "file payloads need write_symfile_from_file".into(),
        ));
    }
    let opts = effective(opts);
    let mut sealer = start_container(password, dst, payload_type, metadata, None, &opts)?;
    sealer.seal_stream(src, dst)
}

/// Wrap one file, recording its name, timestamp, mode and size.
pub fn write_symfile_from_file(
    password: &[u8],
    input: &Path,
    dst: &mut dyn Write,
    metadata: Option<&MetadataCollection>,
    opts: Option<&SymOptions>,
) -> Result<u64> {
    let md = std::fs::metadata(input)
        .map_err(|e| SatchelError::InvalidInput(format!("{}: {e}", input.display())))?;
    if !md.is_file() {
        return Err(SatchelError::InvalidInput(format!(
            "{} is not a file",
            input.display()
        )));
    }
    let name = input
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| SatchelError::InvalidInput("input has no file name".into()))?;
    let info = SourceFileInfo {
        name,
        mtime: md
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0),
        perm: file_perm(&md),
        size: md.len(),
    };

    let opts = effective(opts);
    let mut sealer =
        start_container(password, dst, PayloadType::File, metadata, Some(info), &opts)?;
    let mut f = File::open(input)?;
    sealer.seal_stream(&mut f, dst)
}

/// Wrap one or more directory roots as a multi-tree archive, creating the
/// output file. `Backup` shares this layout and passes its own payload
/// type.
pub fn write_symfile_from_dirs(
    password: &[u8],
    dirs: &[PathBuf],
    output: &Path,
    metadata: Option<&MetadataCollection>,
    scan_opts: &ScanOptions,
    opts: Option<&SymOptions>,
) -> Result<u64> {
    write_symfile_dirs_typed(
        password,
        dirs,
        output,
        PayloadType::MultiDir,
        metadata,
        scan_opts,
        opts,
    )
}

pub(crate) fn write_symfile_dirs_typed(
    password: &[u8],
    dirs: &[PathBuf],
    output: &Path,
    payload_type: PayloadType,
    metadata: Option<&MetadataCollection>,
    scan_opts: &ScanOptions,
    opts: Option<&SymOptions>,
) -> Result<u64> {
    if dirs.is_empty() {
        return Err(SatchelError::InvalidInput("no input directories".into()));
    }
    let opts = effective(opts);
    let mut stream = TreeStream::from_roots(
        dirs,
        scan_opts,
        EncodeOptions {
            compress: opts.compress,
            chunk_size: opts.chunk_size,
        },
    )?;
    let mut out = File::create(output)?;
    let mut sealer = start_container(password, &mut out, payload_type, metadata, None, &opts)?;
    sealer.seal_stream(&mut stream, &mut out)
}

fn file_perm(md: &std::fs::Metadata) -> u16 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        (md.permissions().mode() & 0xFFFF) as u16
    }
    #[cfg(not(unix))]
    {
        let _ = md;
        0o644
    }
}
