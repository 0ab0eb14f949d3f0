use crate::error::{Result, SatchelError};
use crate::stream::block::{
    BLOCK_HEADER_LEN, BlockHeader, BlockType, FLAG_COMPRESSED, FLAG_LAST_DATA, ITEM_HEADER_LEN,
    ItemHeader,
};
use crate::stream::compress::decompress_block;
use crate::stream::tree::Tree;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Five-way overwrite answer. `AlwaysYes` / `AlwaysNo` latch for the
/// remainder of the stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Choice {
    Yes,
    No,
    AlwaysYes,
    AlwaysNo,
    Cancel,
}

/// Collaborator consulted when an output file already exists.
pub trait OverwriteDecider {
    fn confirm(&mut self, path: &Path) -> Choice;
}

impl<T: OverwriteDecider + ?Sized> OverwriteDecider for &mut T {
    fn confirm(&mut self, path: &Path) -> Choice {
        (**self).confirm(path)
    }
}

/// Batch mode: existing files are silently overwritten.
pub struct SilentOverwrite;

impl OverwriteDecider for SilentOverwrite {
    fn confirm(&mut self, _path: &Path) -> Choice {
        Choice::Yes
    }
}

/// Fixed-answer decider, mostly for tests and scripted runs.
pub struct FixedChoice(pub Choice);

impl OverwriteDecider for FixedChoice {
    fn confirm(&mut self, _path: &Path) -> Choice {
        self.0
    }
}

enum State {
    ExpectBlock,
    ExpectTreeBody { len: usize },
    ExpectItemHeader { len: usize },
    ExpectItemBody { len: usize, flags: u8 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub trees: u64,
    pub files_written: u64,
    pub files_skipped: u64,
    pub bytes_written: u64,
}

/// Writer-side state machine rebuilding directory trees from a block
/// stream of arbitrary chunking.
pub struct TreeWriter<'a> {
    dest: PathBuf,
    decider: Box<dyn OverwriteDecider + 'a>,
    require_confirm: bool,
    overwrite_deny_all: bool,
    buf: Vec<u8>,
    state: State,
    current_tree: Option<Tree>,
    tree_root: PathBuf,
    open_file: Option<(File, PathBuf, u32, bool)>,
    skipping: bool,
    stats: DecodeStats,
}

impl<'a> TreeWriter<'a> {
    pub fn new(dest: impl Into<PathBuf>, decider: Box<dyn OverwriteDecider + 'a>) -> Self {
        let dest = dest.into();
        Self {
            tree_root: dest.clone(),
            dest,
            decider,
            require_confirm: true,
            overwrite_deny_all: false,
            buf: Vec::new(),
            state: State::ExpectBlock,
            current_tree: None,
            open_file: None,
            skipping: false,
            stats: DecodeStats::default(),
        }
    }

    /// Batch mode; equivalent to a decider that always answers `Yes`.
    pub fn without_confirmation(dest: impl Into<PathBuf>) -> Self {
        let mut w = Self::new(dest, Box::new(SilentOverwrite));
        w.require_confirm = false;
        w
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Must be called after the final byte; verifies the stream ended on a
    /// block boundary with no file half-written.
    pub fn finish(&mut self) -> Result<()> {
        if self.open_file.is_some() {
            return Err(SatchelError::Format("stream ended inside an item".into()));
        }
        match self.state {
            State::ExpectBlock if self.buf.is_empty() => Ok(()),
            _ => Err(SatchelError::Format("stream ended inside a block".into())),
        }
    }

    fn pump(&mut self) -> Result<()> {
        loop {
            match self.state {
                State::ExpectBlock => {
                    if self.buf.len() < BLOCK_HEADER_LEN {
                        return Ok(());
                    }
                    let mut hdr = [0u8; BLOCK_HEADER_LEN];
                    hdr.copy_from_slice(&self.buf[..BLOCK_HEADER_LEN]);
                    self.buf.drain(..BLOCK_HEADER_LEN);
                    let bh = BlockHeader::decode(&hdr)?;
                    let len = bh.length as usize;
                    self.state = match bh.block_type {
                        BlockType::TreeData => State::ExpectTreeBody { len },
                        BlockType::ItemHeader => {
                            if len != ITEM_HEADER_LEN {
                                return Err(SatchelError::Format(format!(
                                    "item header block has length {len}"
                                )));
                            }
                            State::ExpectItemHeader { len }
                        }
                        BlockType::ItemData => State::ExpectItemBody {
                            len,
                            flags: bh.flags,
                        },
                    };
                }
                State::ExpectTreeBody { len } => {
                    if self.buf.len() < len {
                        return Ok(());
                    }
                    let body: Vec<u8> = self.buf.drain(..len).collect();
                    self.begin_tree(&body)?;
                    self.state = State::ExpectBlock;
                }
                State::ExpectItemHeader { len } => {
                    if self.buf.len() < len {
                        return Ok(());
                    }
                    let body: Vec<u8> = self.buf.drain(..len).collect();
                    let header = ItemHeader::decode(&body)?;
                    self.begin_item(header)?;
                    self.state = State::ExpectBlock;
                }
                State::ExpectItemBody { len, flags } => {
                    if self.buf.len() < len {
                        return Ok(());
                    }
                    let body: Vec<u8> = self.buf.drain(..len).collect();
                    self.item_data(&body, flags)?;
                    self.state = State::ExpectBlock;
                }
            }
        }
    }

    fn begin_tree(&mut self, body: &[u8]) -> Result<()> {
        let tree = Tree::from_cbor(body)?;
        self.tree_root = if tree.parent_path_prefix.is_empty() {
            self.dest.clone()
        } else {
            self.dest.join(&tree.parent_path_prefix)
        };
        for dir in &tree.dir_nodes {
            let p = if dir.path == "/" {
                self.tree_root.clone()
            } else {
                safe_join(&self.tree_root, &dir.path)?
            };
            fs::create_dir_all(&p)?;
        }
        tracing::debug!(
            dirs = tree.dir_nodes.len(),
            items = tree.item_nodes.len(),
            "tree materialised"
        );
        self.stats.trees += 1;
        self.current_tree = Some(tree);
        Ok(())
    }

    fn begin_item(&mut self, header: ItemHeader) -> Result<()> {
        if self.open_file.is_some() {
            return Err(SatchelError::Format(
                "item header before previous item finished".into(),
            ));
        }
        let tree = self
            .current_tree
            .as_ref()
            .ok_or_else(|| SatchelError::Format("item header before tree data".into()))?;
        let item = tree.item_by_id(header.item_id).ok_or_else(|| {
            SatchelError::Format(format!("unknown item id {}", header.item_id))
        })?;
        if item.dir_id != header.dir_id {
            return Err(SatchelError::Format(format!(
                "item {} does not belong to dir {}",
                header.item_id, header.dir_id
            )));
        }
        let rel = tree.item_rel_path(item)?;
        let path = safe_join(&self.tree_root, &rel)?;
        let perm = item.perm;
        let apply_props = item.props_included;

        self.skipping = false;
        if path.exists() {
            if self.require_confirm {
                if self.overwrite_deny_all {
                    self.skipping = true;
                } else {
                    match self.decider.confirm(&path) {
                        Choice::Yes => {}
                        Choice::No => self.skipping = true,
                        Choice::AlwaysYes => self.require_confirm = false,
                        Choice::AlwaysNo => {
                            self.overwrite_deny_all = true;
                            self.skipping = true;
                        }
                        Choice::Cancel => return Err(SatchelError::UserCancelled),
                    }
                }
            }
        }

        if self.skipping {
            self.stats.files_skipped += 1;
            return Ok(());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let f = File::create(&path)?;
        self.open_file = Some((f, path, perm, apply_props));
        Ok(())
    }

    fn item_data(&mut self, body: &[u8], flags: u8) -> Result<()> {
        if self.open_file.is_none() && !self.skipping {
            return Err(SatchelError::Format("item data before item header".into()));
        }
        if !self.skipping {
            let plain = if flags & FLAG_COMPRESSED != 0 {
                decompress_block(body)?
            } else {
                body.to_vec()
            };
            if let Some((f, _, _, _)) = self.open_file.as_mut() {
                f.write_all(&plain)?;
                self.stats.bytes_written += plain.len() as u64;
            }
        }
        if flags & FLAG_LAST_DATA != 0 {
            if let Some((f, path, perm, apply_props)) = self.open_file.take() {
                drop(f);
                if apply_props {
                    apply_permissions(&path, perm);
                }
                self.stats.files_written += 1;
            }
            self.skipping = false;
        }
        Ok(())
    }
}

impl Write for TreeWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        self.pump().map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(unix)]
fn apply_permissions(path: &Path, perm: u32) {
    use std::os::unix::fs::PermissionsExt;
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(perm));
}

#[cfg(not(unix))]
fn apply_permissions(_path: &Path, _perm: u32) {}

fn safe_join(root: &Path, rel: &str) -> Result<PathBuf> {
    let p = Path::new(rel);
    if p.is_absolute() || rel.split('/').any(|c| c == "..") {
        return Err(SatchelError::Format(format!("unsafe path: {rel}")));
    }
    Ok(root.join(p))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::encode::{EncodeOptions, TreeStream};
    use crate::stream::tree::{ScanOptions, TreeScanner};
    use std::io::Read as _;

    fn fixture() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a/c")).unwrap();
        fs::write(tmp.path().join("a/b.txt"), b"hi").unwrap();
        tmp
    }

    fn scan_opts() -> ScanOptions {
        ScanOptions {
            include_empty_paths: true,
            ..ScanOptions::default()
        }
    }

    fn encode(tmp: &tempfile::TempDir) -> Vec<u8> {
        let mut stream = TreeStream::from_roots(
            &[tmp.path().to_path_buf()],
            &scan_opts(),
            EncodeOptions::default(),
        )
        .unwrap();
        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn roundtrip_rebuilds_tree() {
        let src = fixture();
        let encoded = encode(&src);
        let base = src.path().file_name().unwrap().to_string_lossy().to_string();

        let dest = tempfile::tempdir().unwrap();
        let mut w = TreeWriter::without_confirmation(dest.path());
        w.write_all(&encoded).unwrap();
        w.finish().unwrap();

        let root = dest.path().join(&base);
        assert_eq!(fs::read(root.join("a/b.txt")).unwrap(), b"hi");
        assert!(root.join("a/c").is_dir());
    }

    #[test]
    fn single_byte_writes_work() {
        let src = fixture();
        let encoded = encode(&src);
        let dest = tempfile::tempdir().unwrap();
        let mut w = TreeWriter::without_confirmation(dest.path());
        for b in &encoded {
            w.write_all(std::slice::from_ref(b)).unwrap();
        }
        w.finish().unwrap();
        assert_eq!(w.stats().files_written, 1);
    }

    #[test]
    fn scan_of_rebuilt_tree_matches() {
        let src = fixture();
        let original = TreeScanner::new(src.path(), scan_opts()).scan().unwrap();
        let encoded = encode(&src);

        let dest = tempfile::tempdir().unwrap();
        let mut w = TreeWriter::without_confirmation(dest.path());
        w.write_all(&encoded).unwrap();
        w.finish().unwrap();

        let base = src.path().file_name().unwrap().to_string_lossy().to_string();
        let rebuilt = TreeScanner::new(dest.path().join(base), scan_opts())
            .scan()
            .unwrap();
        // identical shape modulo the root base
        assert_eq!(rebuilt.dir_nodes.len(), original.dir_nodes.len());
        assert_eq!(rebuilt.item_nodes.len(), original.item_nodes.len());
        for (a, b) in rebuilt.dir_nodes.iter().zip(&original.dir_nodes) {
            assert_eq!(a.path, b.path);
        }
        for (a, b) in rebuilt.item_nodes.iter().zip(&original.item_nodes) {
            assert_eq!((a.name.as_str(), a.size), (b.name.as_str(), b.size));
        }
    }

    #[test]
    fn always_no_latches() {
        let src = fixture();
        let encoded = encode(&src);
        let dest = tempfile::tempdir().unwrap();

        // first pass materialises the file
        let mut w = TreeWriter::without_confirmation(dest.path());
        w.write_all(&encoded).unwrap();
        w.finish().unwrap();

        let base = src.path().file_name().unwrap().to_string_lossy().to_string();
        let target = dest.path().join(&base).join("a/b.txt");
        fs::write(&target, b"KEEP").unwrap();

        // second pass with AlwaysNo must leave it untouched
        let mut w = TreeWriter::new(dest.path(), Box::new(FixedChoice(Choice::AlwaysNo)));
        w.write_all(&encoded).unwrap();
        w.finish().unwrap();

        assert_eq!(fs::read(&target).unwrap(), b"KEEP");
        assert_eq!(w.stats().files_skipped, 1);
    }

    #[test]
    fn cancel_aborts_with_user_cancelled() {
        let src = fixture();
        let encoded = encode(&src);
        let dest = tempfile::tempdir().unwrap();

        let mut w = TreeWriter::without_confirmation(dest.path());
        w.write_all(&encoded).unwrap();
        w.finish().unwrap();

        let mut w = TreeWriter::new(dest.path(), Box::new(FixedChoice(Choice::Cancel)));
        let err = w.write_all(&encoded).unwrap_err();
        let inner = err.get_ref().and_then(|e| e.downcast_ref::<SatchelError>());
        assert!(matches!(inner, Some(SatchelError::UserCancelled)));
    }

    #[test]
    fn truncated_stream_fails_finish() {
        let src = fixture();
        let mut encoded = encode(&src);
        encoded.truncate(encoded.len() - 3);
        let dest = tempfile::tempdir().unwrap();
        let mut w = TreeWriter::without_confirmation(dest.path());
        let _ = w.write_all(&encoded);
        assert!(w.finish().is_err());
    }

    #[test]
    fn garbage_block_type_is_fatal() {
        let dest = tempfile::tempdir().unwrap();
        let mut w = TreeWriter::without_confirmation(dest.path());
        let bogus = [1u8, 0, 9, 0, 0, 0, 0];
        assert!(w.write_all(&bogus).is_err());
    }

    #[test]
    fn traversal_paths_rejected() {
        assert!(safe_join(Path::new("/tmp/x"), "../escape").is_err());
        assert!(safe_join(Path::new("/tmp/x"), "/abs").is_err());
        assert!(safe_join(Path::new("/tmp/x"), "a/../../b").is_err());
        assert!(safe_join(Path::new("/tmp/x"), "a/b").is_ok());
    }
}
