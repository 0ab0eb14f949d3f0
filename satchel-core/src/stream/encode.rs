use crate::error::{Result, SatchelError};
use crate::stream::block::{
    BLOCK_HEADER_LEN, BlockHeader, BlockType, FLAG_COMPRESSED, FLAG_LAST_DATA, ITEM_HEADER_LEN,
    ItemHeader,
};
use crate::stream::compress::compress_block;
use crate::stream::tree::{ScanOptions, Tree, TreeScanner};
use crossbeam_channel::{Receiver, Sender, TryRecvError, bounded};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::thread;

/// Blocks in flight between the iterator task and the collector. Small on
/// purpose: downstream consumption paces upstream file I/O.
const CHANNEL_DEPTH: usize = 8;

#[derive(Clone, Copy, Debug)]
pub struct EncodeOptions {
    pub compress: bool,
    /// Plaintext bytes per ItemData block.
    pub chunk_size: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            compress: true,
            chunk_size: crate::crypto::aead::DEFAULT_CHUNK_SIZE,
        }
    }
}

enum Packet {
    Data(Vec<u8>),
    Err(SatchelError),
    Eof,
}

/// Buffers emitted block bytes and answers read requests of arbitrary
/// size, splicing across block boundaries.
#[derive(Default)]
struct Collector {
    chunks: VecDeque<Vec<u8>>,
    pos: usize,
}

impl Collector {
    fn push(&mut self, chunk: Vec<u8>) {
        if !chunk.is_empty() {
            self.chunks.push_back(chunk);
        }
    }

    fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    fn read_into(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        while filled < buf.len() {
            let Some(front) = self.chunks.front() else {
                break;
            };
            let avail = &front[self.pos..];
            let n = avail.len().min(buf.len() - filled);
            buf[filled..filled + n].copy_from_slice(&avail[..n]);
            filled += n;
            self.pos += n;
            if self.pos == front.len() {
                self.chunks.pop_front();
                self.pos = 0;
            }
        }
        filled
    }
}

/// Byte-stream emitter over one or more scanned trees. Three cooperating
/// parties: an iterator thread walking trees and files, the collector
/// buffer, and this `Read` implementation. Dropping the stream (or calling
/// `abort`) stops the iterator at its next suspension point.
pub struct TreeStream {
    rx: Receiver<Packet>,
    _abort_tx: Sender<()>,
    collector: Collector,
    eof: bool,
    pending_err: Option<SatchelError>,
}

impl TreeStream {
    /// Scan each root, then start streaming them in insertion order.
    pub fn from_roots(
        roots: &[PathBuf],
        scan_opts: &ScanOptions,
        opts: EncodeOptions,
    ) -> Result<Self> {
        let mut trees = Vec::with_capacity(roots.len());
        for root in roots {
            let tree = TreeScanner::new(root, scan_opts.clone()).scan()?;
            trees.push((root.clone(), tree));
        }
        Ok(Self::from_trees(trees, opts))
    }

    /// Stream already-scanned trees; each is paired with its scan root.
    pub fn from_trees(trees: Vec<(PathBuf, Tree)>, opts: EncodeOptions) -> Self {
        let (tx, rx) = bounded::<Packet>(CHANNEL_DEPTH);
        let (abort_tx, abort_rx) = bounded::<()>(1);

        thread::spawn(move || {
            iterate(trees, opts, &tx, &abort_rx);
        });

        Self {
            rx,
            _abort_tx: abort_tx,
            collector: Collector::default(),
            eof: false,
            pending_err: None,
        }
    }

    /// Request early termination; the iterator stops at its next send.
    pub fn abort(&self) {
        let _ = self._abort_tx.try_send(());
    }
}

impl Read for TreeStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        loop {
            if !self.collector.is_empty() {
                return Ok(self.collector.read_into(buf));
            }
            if let Some(err) = self.pending_err.take() {
                return Err(io::Error::other(err));
            }
            if self.eof {
                return Ok(0);
            }
            match self.rx.recv() {
                Ok(Packet::Data(chunk)) => self.collector.push(chunk),
                Ok(Packet::Err(e)) => {
                    // buffered bytes drain first; the error surfaces on
                    // the following read
                    self.pending_err = Some(e);
                }
                Ok(Packet::Eof) => self.eof = true,
                Err(_) => {
                    return Err(io::Error::other("tree stream producer vanished"));
                }
            }
        }
    }
}

fn aborted(abort_rx: &Receiver<()>) -> bool {
    match abort_rx.try_recv() {
        Ok(()) => true,
        Err(TryRecvError::Disconnected) => true,
        Err(TryRecvError::Empty) => false,
    }
}

fn send(tx: &Sender<Packet>, abort_rx: &Receiver<()>, packet: Packet) -> bool {
    if aborted(abort_rx) {
        return false;
    }
    tx.send(packet).is_ok()
}

fn iterate(
    trees: Vec<(PathBuf, Tree)>,
    opts: EncodeOptions,
    tx: &Sender<Packet>,
    abort_rx: &Receiver<()>,
) {
    for (root, tree) in &trees {
        match emit_tree(root, tree, opts, tx, abort_rx) {
            Ok(true) => {}
            Ok(false) => return, // aborted or receiver gone
            Err(e) => {
                let _ = tx.send(Packet::Err(e));
                return;
            }
        }
    }
    let _ = tx.send(Packet::Eof);
}

fn emit_tree(
    root: &Path,
    tree: &Tree,
    opts: EncodeOptions,
    tx: &Sender<Packet>,
    abort_rx: &Receiver<()>,
) -> Result<bool> {
    let body = tree.to_cbor()?;
    let mut block = Vec::with_capacity(BLOCK_HEADER_LEN + body.len());
    block.extend_from_slice(&BlockHeader::new(BlockType::TreeData, 0, body.len() as u32).encode());
    block.extend_from_slice(&body);
    if !send(tx, abort_rx, Packet::Data(block)) {
        return Ok(false);
    }
    tracing::debug!(items = tree.item_nodes.len(), "tree block emitted");

    let chunk_size = opts.chunk_size.max(1);
    for item in &tree.item_nodes {
        let header = ItemHeader::new(item.item_id, item.dir_id);
        let mut block = Vec::with_capacity(BLOCK_HEADER_LEN + ITEM_HEADER_LEN);
        block.extend_from_slice(
            &BlockHeader::new(BlockType::ItemHeader, 0, ITEM_HEADER_LEN as u32).encode(),
        );
        block.extend_from_slice(&header.encode());
        if !send(tx, abort_rx, Packet::Data(block)) {
            return Ok(false);
        }

        let rel = tree.item_rel_path(item)?;
        let path = root.join(&rel);
        let mut f = File::open(&path)
            .map_err(|e| SatchelError::Io(io::Error::new(e.kind(), format!("{rel}: {e}"))))?;

        // one chunk of read-ahead decides the LastDataBlock flag; an
        // empty file still carries one (empty) final block
        let mut cur = read_chunk(&mut f, chunk_size)?;
        loop {
            let next = if cur.len() < chunk_size {
                Vec::new()
            } else {
                read_chunk(&mut f, chunk_size)?
            };
            let last = next.is_empty();
            if !send_item_data(tx, abort_rx, &cur, last, opts.compress)? {
                return Ok(false);
            }
            if last {
                break;
            }
            cur = next;
        }
    }

    Ok(true)
}

fn send_item_data(
    tx: &Sender<Packet>,
    abort_rx: &Receiver<()>,
    data: &[u8],
    last: bool,
    compress: bool,
) -> Result<bool> {
    let (payload, compressed) = if compress {
        compress_block(data)?
    } else {
        (data.to_vec(), false)
    };
    let mut flags = 0u8;
    if last {
        flags |= FLAG_LAST_DATA;
    }
    if compressed {
        flags |= FLAG_COMPRESSED;
    }
    let mut block = Vec::with_capacity(BLOCK_HEADER_LEN + payload.len());
    block.extend_from_slice(
        &BlockHeader::new(BlockType::ItemData, flags, payload.len() as u32).encode(),
    );
    block.extend_from_slice(&payload);
    Ok(send(tx, abort_rx, Packet::Data(block)))
}

fn read_chunk(f: &mut File, want: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; want];
    let mut filled = 0;
    while filled < want {
        let n = f.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::io::Write as _;

    fn fixture() -> tempfile::TempDir {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("a/c")).unwrap();
        fs::File::create(tmp.path().join("a/b.txt"))
            .unwrap()
            .write_all(b"hi")
            .unwrap();
        tmp
    }

    fn scan_opts() -> ScanOptions {
        ScanOptions {
            include_empty_paths: true,
            ..ScanOptions::default()
        }
    }

    #[test]
    fn emits_tree_then_item_blocks() {
        let tmp = fixture();
        let mut stream = TreeStream::from_roots(
            &[tmp.path().to_path_buf()],
            &scan_opts(),
            EncodeOptions::default(),
        )
        .unwrap();

        let mut out = Vec::new();
        stream.read_to_end(&mut out).unwrap();

        let mut hdr = [0u8; BLOCK_HEADER_LEN];
        hdr.copy_from_slice(&out[..BLOCK_HEADER_LEN]);
        let first = BlockHeader::decode(&hdr).unwrap();
        assert_eq!(first.block_type, BlockType::TreeData);

        // walk all blocks; expect exactly one ItemHeader and one final
        // ItemData for a/b.txt
        let mut off = 0usize;
        let mut item_headers = 0;
        let mut last_data = 0;
        while off < out.len() {
            let mut h = [0u8; BLOCK_HEADER_LEN];
            h.copy_from_slice(&out[off..off + BLOCK_HEADER_LEN]);
            let bh = BlockHeader::decode(&h).unwrap();
            off += BLOCK_HEADER_LEN + bh.length as usize;
            match bh.block_type {
                BlockType::ItemHeader => item_headers += 1,
                BlockType::ItemData if bh.flags & FLAG_LAST_DATA != 0 => last_data += 1,
                _ => {}
            }
        }
        assert_eq!(off, out.len());
        assert_eq!(item_headers, 1);
        assert_eq!(last_data, 1);
    }

    #[test]
    fn arbitrary_read_sizes_splice_blocks() {
        let tmp = fixture();
        let mut stream = TreeStream::from_roots(
            &[tmp.path().to_path_buf()],
            &scan_opts(),
            EncodeOptions::default(),
        )
        .unwrap();

        let mut whole = Vec::new();
        let mut buf = [0u8; 3];
        loop {
            let n = stream.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            whole.extend_from_slice(&buf[..n]);
        }

        let mut again = TreeStream::from_roots(
            &[tmp.path().to_path_buf()],
            &scan_opts(),
            EncodeOptions::default(),
        )
        .unwrap();
        let mut expect = Vec::new();
        again.read_to_end(&mut expect).unwrap();
        assert_eq!(whole, expect);
    }

    #[test]
    fn abort_stops_stream() {
        let tmp = fixture();
        let mut stream = TreeStream::from_roots(
            &[tmp.path().to_path_buf()],
            &scan_opts(),
            EncodeOptions::default(),
        )
        .unwrap();
        stream.abort();
        // remaining reads drain whatever was already buffered, then stop
        let mut out = Vec::new();
        let _ = stream.read_to_end(&mut out);
    }

    #[test]
    fn missing_file_surfaces_as_error() {
        let tmp = fixture();
        let tree = TreeScanner::new(tmp.path(), scan_opts()).scan().unwrap();
        fs::remove_file(tmp.path().join("a/b.txt")).unwrap();

        let mut stream = TreeStream::from_trees(
            vec![(tmp.path().to_path_buf(), tree)],
            EncodeOptions::default(),
        );
        let mut out = Vec::new();
        assert!(stream.read_to_end(&mut out).is_err());
    }
}
