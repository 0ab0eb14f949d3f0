use crate::error::{Result, SatchelError};
use std::io::{self, BufRead, Read, Write};

/// Hex characters per emitted line.
pub const LINE_WIDTH: usize = 64;

/// Which envelope a framing writer/reader is carrying. Replaces the
/// finish-callback arrangement: the mode itself knows its tags, and the
/// writer emits its own separators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameMode {
    /// Header and payload in one envelope.
    Combined,
    /// First envelope of a split pair.
    SplitHeader,
    /// Second envelope of a split pair.
    SplitData,
    ExportUser,
    ExportKeypair,
}

impl FrameMode {
    pub fn tags(&self) -> &'static str {
        match self {
            FrameMode::Combined => ":header+data :hex",
            FrameMode::SplitHeader => ":header :hex",
            FrameMode::SplitData => ":data :hex",
            FrameMode::ExportUser => ":export-user :hex",
            FrameMode::ExportKeypair => ":export-keypair :hex",
        }
    }

    pub fn from_tags(tags: &[String]) -> Option<FrameMode> {
        let has = |t: &str| tags.iter().any(|x| x == t);
        if has(":header+data") {
            Some(FrameMode::Combined)
        } else if has(":header") {
            Some(FrameMode::SplitHeader)
        } else if has(":data") {
            Some(FrameMode::SplitData)
        } else if has(":export-user") {
            Some(FrameMode::ExportUser)
        } else if has(":export-keypair") {
            Some(FrameMode::ExportKeypair)
        } else {
            None
        }
    }
}

/// Hex-line envelope writer: `:start <tags>` line, hex lines of
/// `LINE_WIDTH` chars, `:end` line on `finish`.
pub struct FramedWriter<W: Write> {
    inner: W,
    mode: FrameMode,
    pending: Vec<u8>,
    started: bool,
    finished: bool,
}

impl<W: Write> FramedWriter<W> {
    pub fn new(inner: W, mode: FrameMode) -> Self {
        Self {
            inner,
            mode,
            pending: Vec::with_capacity(LINE_WIDTH / 2),
            started: false,
            finished: false,
        }
    }

    fn ensure_started(&mut self) -> io::Result<()> {
        if !self.started {
            writeln!(self.inner, ":start {}", self.mode.tags())?;
            self.started = true;
        }
        Ok(())
    }

    fn emit_line(&mut self, bytes: &[u8]) -> io::Result<()> {
        writeln!(self.inner, "{}", hex::encode(bytes))
    }

    /// Flush the partial line and emit the `:end` terminator.
    pub fn finish(&mut self) -> io::Result<()> {
        if self.finished {
            return Ok(());
        }
        self.ensure_started()?;
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            self.emit_line(&rest)?;
        }
        writeln!(self.inner, ":end")?;
        self.inner.flush()?;
        self.finished = true;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for FramedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.ensure_started()?;
        self.pending.extend_from_slice(buf);
        let bytes_per_line = LINE_WIDTH / 2;
        while self.pending.len() >= bytes_per_line {
            let line: Vec<u8> = self.pending.drain(..bytes_per_line).collect();
            self.emit_line(&line)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Hex-line envelope reader. Stops consuming at the `:end` line so a
/// following envelope in the same input stays readable.
pub struct FramedReader<R: BufRead> {
    inner: R,
    tags: Vec<String>,
    buf: Vec<u8>,
    pos: usize,
    done: bool,
}

impl<R: BufRead> FramedReader<R> {
    /// Parse the `:start` line (skipping blank leading lines).
    pub fn new(mut inner: R) -> Result<Self> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = inner.read_line(&mut line)?;
            if n == 0 {
                return Err(SatchelError::Format("missing :start line".into()));
            }
            if !line.trim().is_empty() {
                break;
            }
        }
        let trimmed = line.trim();
        let mut parts = trimmed.split_whitespace();
        if parts.next() != Some(":start") {
            return Err(SatchelError::Format(format!(
                "expected :start line, found {trimmed:?}"
            )));
        }
        let tags = parts.map(str::to_string).collect();
        Ok(Self {
            inner,
            tags,
            buf: Vec::new(),
            pos: 0,
            done: false,
        })
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn mode(&self) -> Option<FrameMode> {
        FrameMode::from_tags(&self.tags)
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn next_line(&mut self) -> io::Result<()> {
        let mut line = String::new();
        loop {
            line.clear();
            let n = self.inner.read_line(&mut line)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "framed stream ended without :end",
                ));
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if trimmed == ":end" {
                self.done = true;
                return Ok(());
            }
            let decoded = hex::decode(trimmed).map_err(|e| {
                io::Error::new(io::ErrorKind::InvalidData, format!("bad hex line: {e}"))
            })?;
            self.buf = decoded;
            self.pos = 0;
            return Ok(());
        }
    }

    /// Decode the whole envelope into memory.
    pub fn decode_all(mut self) -> Result<(Vec<String>, Vec<u8>, R)> {
        let mut out = Vec::new();
        self.read_to_end(&mut out).map_err(|e| {
            if e.kind() == io::ErrorKind::InvalidData || e.kind() == io::ErrorKind::UnexpectedEof {
                SatchelError::Format(e.to_string())
            } else {
                SatchelError::Io(e)
            }
        })?;
        Ok((self.tags, out, self.inner))
    }
}

impl<R: BufRead> Read for FramedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if self.pos < self.buf.len() {
                let n = (self.buf.len() - self.pos).min(buf.len());
                buf[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            if self.done {
                return Ok(0);
            }
            self.next_line()?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(mode: FrameMode, data: &[u8]) -> (String, Vec<u8>) {
        let mut sink = Vec::new();
        let mut w = FramedWriter::new(&mut sink, mode);
        w.write_all(data).unwrap();
        w.finish().unwrap();
        let text = String::from_utf8(sink).unwrap();

        let r = FramedReader::new(text.as_bytes()).unwrap();
        let (_, bytes, _) = r.decode_all().unwrap();
        (text, bytes)
    }

    #[test]
    fn combined_roundtrip() {
        let data: Vec<u8> = (0..300u16).map(|i| (i % 256) as u8).collect();
        let (text, bytes) = roundtrip(FrameMode::Combined, &data);
        assert!(text.starts_with(":start :header+data :hex\n"));
        assert!(text.ends_with(":end\n"));
        assert_eq!(bytes, data);
    }

    #[test]
    fn export_user_tags() {
        let (text, bytes) = roundtrip(FrameMode::ExportUser, b"hello");
        assert!(text.starts_with(":start :export-user :hex\n"));
        assert_eq!(bytes, b"hello");
    }

    #[test]
    fn lines_are_width_limited() {
        let data = vec![0xABu8; 100];
        let (text, _) = roundtrip(FrameMode::Combined, &data);
        for line in text.lines() {
            if !line.starts_with(':') {
                assert!(line.len() <= LINE_WIDTH);
            }
        }
    }

    #[test]
    fn tolerant_of_crlf_and_whitespace() {
        let mut sink = Vec::new();
        let mut w = FramedWriter::new(&mut sink, FrameMode::SplitHeader);
        w.write_all(b"abc123").unwrap();
        w.finish().unwrap();
        let crlf = String::from_utf8(sink).unwrap().replace('\n', "\r\n");
        let padded = format!("\r\n  {}", crlf.replace(":end", "  :end  "));

        let r = FramedReader::new(padded.as_bytes()).unwrap();
        assert_eq!(r.mode(), Some(FrameMode::SplitHeader));
        let (_, bytes, _) = r.decode_all().unwrap();
        assert_eq!(bytes, b"abc123");
    }

    #[test]
    fn split_envelopes_read_sequentially() {
        let mut sink = Vec::new();
        let mut w = FramedWriter::new(&mut sink, FrameMode::SplitHeader);
        w.write_all(b"header-bytes").unwrap();
        w.finish().unwrap();
        let mut w = FramedWriter::new(&mut sink, FrameMode::SplitData);
        w.write_all(b"data-bytes").unwrap();
        w.finish().unwrap();

        let cursor = std::io::Cursor::new(sink);
        let mut reader = std::io::BufReader::new(cursor);
        let r1 = FramedReader::new(&mut reader).unwrap();
        assert_eq!(r1.mode(), Some(FrameMode::SplitHeader));
        let (_, h, _) = r1.decode_all().unwrap();
        assert_eq!(h, b"header-bytes");

        let r2 = FramedReader::new(&mut reader).unwrap();
        assert_eq!(r2.mode(), Some(FrameMode::SplitData));
        let (_, d, _) = r2.decode_all().unwrap();
        assert_eq!(d, b"data-bytes");
    }

    #[test]
    fn missing_end_is_error() {
        let text = ":start :header :hex\ndeadbeef\n";
        let r = FramedReader::new(text.as_bytes()).unwrap();
        assert!(r.decode_all().is_err());
    }
}
