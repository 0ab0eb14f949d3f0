use crate::crypto::wipe::wipe;
use crate::error::{Result, SatchelError};
use chacha20poly1305::{
    Key, XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit, Payload},
};
use std::io::{Read, Write};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 24;
pub const TAG_LEN: usize = 16;
pub const STREAM_VERSION: u8 = 1;

/// Plaintext bytes per frame. Tuned for latency over throughput.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Upper bound accepted for a single frame on decode; anything larger is a
/// malformed stream, not a tuning choice.
const MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Frame flag: this is the final chunk of the payload.
pub const FLAG_LAST: u8 = 1;

/// Associated-data tag for the header metadata blob (counter 0).
const AD_METADATA: u8 = 2;

/// Per-frame wire prologue: flags byte + big-endian ciphertext length.
pub const FRAME_PROLOGUE_LEN: usize = 1 + 4;

/// Owning 32-byte AEAD key, wiped on drop.
pub struct AeadKey([u8; KEY_LEN]);

impl AeadKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| SatchelError::Crypto("aead key must be 32 bytes".into()))?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for AeadKey {
    fn drop(&mut self) {
        wipe(&mut self.0);
    }
}

/// Nonce for frame `counter`: the 24-byte base with the counter xor'd into
/// the final 8 bytes (little-endian). Counter 0 is reserved for metadata.
pub fn chunk_nonce(base: &[u8; NONCE_LEN], counter: u64) -> XNonce {
    let mut n = *base;
    let ctr = counter.to_le_bytes();
    for (b, c) in n[NONCE_LEN - 8..].iter_mut().zip(ctr) {
        *b ^= c;
    }
    XNonce::from_slice(&n).to_owned()
}

/// Seal a whole buffer under one nonce.
pub fn seal_whole(key: &AeadKey, nonce: &XNonce, ad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let aead = XChaCha20Poly1305::new(Key::from_slice(&key.0));
    aead.encrypt(
        nonce,
        Payload {
            msg: plaintext,
            aad: ad,
        },
    )
    .map_err(|_| SatchelError::Crypto("encrypt failed".into()))
}

/// Open a whole buffer. Tag mismatch surfaces as `Integrity`.
pub fn open_whole(key: &AeadKey, nonce: &XNonce, ad: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let aead = XChaCha20Poly1305::new(Key::from_slice(&key.0));
    aead.decrypt(
        nonce,
        Payload {
            msg: ciphertext,
            aad: ad,
        },
    )
    .map_err(|_| SatchelError::Integrity("authentication tag mismatch".into()))
}

fn read_up_to(src: &mut dyn Read, want: usize) -> std::io::Result<Vec<u8>> {
    let mut buf = vec![0u8; want];
    let mut filled = 0;
    while filled < want {
        let n = src.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

/// Chunked AEAD encryptor: frames are `flags:u8 || len:u32_be || ct`, the
/// final frame carries `FLAG_LAST` in its (authenticated) flags.
pub struct StreamSealer {
    key: AeadKey,
    nonce_base: [u8; NONCE_LEN],
    counter: u64,
    chunk_size: usize,
    binding: Vec<u8>,
}

impl StreamSealer {
    pub fn new(key: AeadKey, nonce_base: [u8; NONCE_LEN]) -> Self {
        Self::with_chunk_size(key, nonce_base, DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(key: AeadKey, nonce_base: [u8; NONCE_LEN], chunk_size: usize) -> Self {
        Self {
            key,
            nonce_base,
            counter: 0,
            chunk_size: chunk_size.max(1),
            binding: Vec::new(),
        }
    }

    /// Mix extra bytes into every frame's associated data. Used to bind
    /// a container's plaintext header to its payload: tampering with the
    /// header then fails the first frame's tag.
    pub fn bind(mut self, binding: &[u8]) -> Self {
        self.binding = binding.to_vec();
        self
    }

    fn ad(&self, tag: u8) -> Vec<u8> {
        let mut ad = Vec::with_capacity(2 + self.binding.len());
        ad.push(STREAM_VERSION);
        ad.push(tag);
        ad.extend_from_slice(&self.binding);
        ad
    }

    /// Seal the header metadata blob under the reserved counter 0.
    pub fn seal_metadata(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let nonce = chunk_nonce(&self.nonce_base, 0);
        seal_whole(&self.key, &nonce, &self.ad(AD_METADATA), plaintext)
    }

    /// Seal one payload chunk into a complete wire frame.
    pub fn seal_chunk(&mut self, plaintext: &[u8], last: bool) -> Result<Vec<u8>> {
        self.counter += 1;
        let flags = if last { FLAG_LAST } else { 0 };
        let nonce = chunk_nonce(&self.nonce_base, self.counter);
        let ct = seal_whole(&self.key, &nonce, &self.ad(flags), plaintext)?;
        let mut frame = Vec::with_capacity(FRAME_PROLOGUE_LEN + ct.len());
        frame.push(flags);
        frame.extend_from_slice(&(ct.len() as u32).to_be_bytes());
        frame.extend_from_slice(&ct);
        Ok(frame)
    }

    /// Pump an entire reader through the sealer. Returns plaintext bytes
    /// consumed. One frame of read-ahead decides the final-chunk flag.
    pub fn seal_stream(&mut self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64> {
        let mut total = 0u64;
        let mut cur = read_up_to(src, self.chunk_size)?;
        loop {
            let next = if cur.len() < self.chunk_size {
                Vec::new()
            } else {
                read_up_to(src, self.chunk_size)?
            };
            let last = next.is_empty();
            let frame = self.seal_chunk(&cur, last)?;
            dst.write_all(&frame)?;
            total += cur.len() as u64;
            if last {
                break;
            }
            cur = next;
        }
        Ok(total)
    }
}

/// Chunked AEAD decryptor, mirror of `StreamSealer`.
pub struct StreamOpener {
    key: AeadKey,
    nonce_base: [u8; NONCE_LEN],
    counter: u64,
    finished: bool,
    binding: Vec<u8>,
}

impl StreamOpener {
    pub fn new(key: AeadKey, nonce_base: [u8; NONCE_LEN]) -> Self {
        Self {
            key,
            nonce_base,
            counter: 0,
            finished: false,
            binding: Vec::new(),
        }
    }

    /// Mirror of `StreamSealer::bind`; must carry the same bytes.
    pub fn bind(mut self, binding: &[u8]) -> Self {
        self.binding = binding.to_vec();
        self
    }

    fn ad(&self, tag: u8) -> Vec<u8> {
        let mut ad = Vec::with_capacity(2 + self.binding.len());
        ad.push(STREAM_VERSION);
        ad.push(tag);
        ad.extend_from_slice(&self.binding);
        ad
    }

    /// Open the header metadata blob (reserved counter 0).
    pub fn open_metadata(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = chunk_nonce(&self.nonce_base, 0);
        open_whole(&self.key, &nonce, &self.ad(AD_METADATA), ciphertext)
    }

    /// Read and open the next frame. `None` once the final frame has been
    /// consumed. Truncation before the final frame is a `Format` error.
    pub fn next_chunk(&mut self, src: &mut dyn Read) -> Result<Option<Vec<u8>>> {
        if self.finished {
            return Ok(None);
        }
        let mut prologue = [0u8; FRAME_PROLOGUE_LEN];
        src.read_exact(&mut prologue).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SatchelError::Format("stream truncated before final chunk".into())
            } else {
                SatchelError::Io(e)
            }
        })?;
        let flags = prologue[0];
        let len = u32::from_be_bytes([prologue[1], prologue[2], prologue[3], prologue[4]]) as usize;
        if len < TAG_LEN || len > MAX_FRAME_LEN {
            return Err(SatchelError::Format(format!("bad frame length {len}")));
        }
        let mut ct = vec![0u8; len];
        src.read_exact(&mut ct).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                SatchelError::Format("stream truncated inside frame".into())
            } else {
                SatchelError::Io(e)
            }
        })?;
        self.counter += 1;
        let nonce = chunk_nonce(&self.nonce_base, self.counter);
        let pt = open_whole(&self.key, &nonce, &self.ad(flags), &ct)?;
        if flags & FLAG_LAST != 0 {
            self.finished = true;
        }
        Ok(Some(pt))
    }

    /// Pump all remaining frames into a writer. Returns plaintext bytes.
    pub fn open_stream(&mut self, src: &mut dyn Read, dst: &mut dyn Write) -> Result<u64> {
        let mut total = 0u64;
        while let Some(pt) = self.next_chunk(src)? {
            dst.write_all(&pt)?;
            total += pt.len() as u64;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::wipe::random_array;

    fn key() -> AeadKey {
        AeadKey::new([9u8; KEY_LEN])
    }

    #[test]
    fn whole_roundtrip() {
        let nonce = chunk_nonce(&[1u8; NONCE_LEN], 5);
        let ct = seal_whole(&key(), &nonce, b"ad", b"payload").unwrap();
        let pt = open_whole(&key(), &nonce, b"ad", &ct).unwrap();
        assert_eq!(pt, b"payload");
    }

    #[test]
    fn wrong_ad_fails_integrity() {
        let nonce = chunk_nonce(&[1u8; NONCE_LEN], 5);
        let ct = seal_whole(&key(), &nonce, b"ad", b"payload").unwrap();
        let err = open_whole(&key(), &nonce, b"other", &ct).unwrap_err();
        assert!(matches!(err, SatchelError::Integrity(_)));
    }

    #[test]
    fn stream_roundtrip_multi_frame() {
        let base = random_array().unwrap();
        let data: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();

        let mut sealed = Vec::new();
        let mut sealer = StreamSealer::new(key(), base);
        let n = sealer.seal_stream(&mut &data[..], &mut sealed).unwrap();
        assert_eq!(n, data.len() as u64);

        let mut opened = Vec::new();
        let mut opener = StreamOpener::new(key(), base);
        let m = opener.open_stream(&mut &sealed[..], &mut opened).unwrap();
        assert_eq!(m, data.len() as u64);
        assert_eq!(opened, data);
    }

    #[test]
    fn stream_roundtrip_empty_payload() {
        let base = [3u8; NONCE_LEN];
        let mut sealed = Vec::new();
        StreamSealer::new(key(), base)
            .seal_stream(&mut &b""[..], &mut sealed)
            .unwrap();

        let mut opened = Vec::new();
        StreamOpener::new(key(), base)
            .open_stream(&mut &sealed[..], &mut opened)
            .unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn bit_flip_fails_integrity() {
        let base = [3u8; NONCE_LEN];
        let mut sealed = Vec::new();
        StreamSealer::new(key(), base)
            .seal_stream(&mut &b"some payload"[..], &mut sealed)
            .unwrap();

        let idx = FRAME_PROLOGUE_LEN + 2;
        sealed[idx] ^= 0x01;

        let mut opened = Vec::new();
        let err = StreamOpener::new(key(), base)
            .open_stream(&mut &sealed[..], &mut opened)
            .unwrap_err();
        assert!(matches!(err, SatchelError::Integrity(_)));
    }

    #[test]
    fn last_flag_flip_fails_integrity() {
        let base = [3u8; NONCE_LEN];
        let mut sealed = Vec::new();
        StreamSealer::new(key(), base)
            .seal_stream(&mut &b"x"[..], &mut sealed)
            .unwrap();
        sealed[0] ^= FLAG_LAST;

        let mut opened = Vec::new();
        let err = StreamOpener::new(key(), base)
            .open_stream(&mut &sealed[..], &mut opened)
            .unwrap_err();
        assert!(matches!(err, SatchelError::Integrity(_)));
    }

    #[test]
    fn binding_mismatch_fails_integrity() {
        let base = [3u8; NONCE_LEN];
        let mut sealed = Vec::new();
        StreamSealer::new(key(), base)
            .bind(b"header-digest")
            .seal_stream(&mut &b"payload"[..], &mut sealed)
            .unwrap();

        let mut opened = Vec::new();
        let err = StreamOpener::new(key(), base)
            .bind(b"other-digest")
            .open_stream(&mut &sealed[..], &mut opened)
            .unwrap_err();
        assert!(matches!(err, SatchelError::Integrity(_)));

        let mut opened = Vec::new();
        StreamOpener::new(key(), base)
            .bind(b"header-digest")
            .open_stream(&mut &sealed[..], &mut opened)
            .unwrap();
        assert_eq!(opened, b"payload");
    }

    #[test]
    fn truncated_stream_is_format_error() {
        let base = [3u8; NONCE_LEN];
        let data = vec![7u8; 100_000];
        let mut sealed = Vec::new();
        StreamSealer::new(key(), base)
            .seal_stream(&mut &data[..], &mut sealed)
            .unwrap();
        sealed.truncate(sealed.len() / 2);

        let mut opened = Vec::new();
        let err = StreamOpener::new(key(), base)
            .open_stream(&mut &sealed[..], &mut opened)
            .unwrap_err();
        assert!(matches!(
            err,
            SatchelError::Format(_) | SatchelError::Integrity(_)
        ));
    }
}
