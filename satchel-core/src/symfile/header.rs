use crate::crypto::aead::NONCE_LEN;
use crate::crypto::kdf::{KdfCosts, SALT_LEN};
use crate::error::{Result, SatchelError};
use std::io::{Read, Write};

pub const MAGIC: &[u8; 4] = b"BSYM";
pub const SYM_VERSION: u8 = 1;

/// Cap on the encrypted metadata section; larger values mean a corrupt
/// or hostile header.
const MAX_METADATA_LEN: u32 = 16 * 1024 * 1024;
const MAX_NAME_LEN: u16 = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PayloadType {
    File = 1,
    Stream = 2,
    MultiDir = 3,
    Backup = 4,
}

impl PayloadType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(PayloadType::File),
            2 => Ok(PayloadType::Stream),
            3 => Ok(PayloadType::MultiDir),
            4 => Ok(PayloadType::Backup),
            _ => Err(SatchelError::Format(format!("unknown payload type {v}"))),
        }
    }
}

/// Original-file block carried for `PayloadType::File`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceFileInfo {
    pub name: String,
    pub mtime: i64,
    pub perm: u16,
    pub size: u64,
}

/// Plaintext container header. Only the metadata blob inside it is
/// encrypted (under the container key, reserved nonce counter).
#[derive(Debug)]
pub struct SymHeader {
    pub version: u8,
    pub kdf_salt: [u8; SALT_LEN],
    pub kdf_costs: KdfCosts,
    pub nonce_base: [u8; NONCE_LEN],
    pub payload_type: PayloadType,
    /// AEAD ciphertext of the metadata collection; empty when absent.
    pub metadata_blob: Vec<u8>,
    pub source_file: Option<SourceFileInfo>,
}

impl SymHeader {
    pub fn write_to(&self, w: &mut dyn Write) -> Result<()> {
        w.write_all(MAGIC)?;
        w.write_all(&[self.version])?;
        w.write_all(&self.kdf_salt)?;
        w.write_all(&self.kdf_costs.m_cost.to_be_bytes())?;
        w.write_all(&self.kdf_costs.t_cost.to_be_bytes())?;
        w.write_all(&self.kdf_costs.p_cost.to_be_bytes())?;
        w.write_all(&self.nonce_base)?;
        w.write_all(&[self.payload_type as u8])?;
        w.write_all(&(self.metadata_blob.len() as u32).to_be_bytes())?;
        w.write_all(&self.metadata_blob)?;

        if self.payload_type == PayloadType::File {
            let info = self.source_file.as_ref().ok_or_else(|| {
                SatchelError::Format("file payload requires source file info".into())
            })?;
            let name = info.name.as_bytes();
            if name.len() > MAX_NAME_LEN as usize {
                return Err(SatchelError::InvalidInput("file name too long".into()));
            }
            w.write_all(&(name.len() as u16).to_be_bytes())?;
            w.write_all(name)?;
            w.write_all(&info.mtime.to_be_bytes())?;
            w.write_all(&info.perm.to_be_bytes())?;
            w.write_all(&info.size.to_be_bytes())?;
        }
        Ok(())
    }

    pub fn read_from(r: &mut dyn Read) -> Result<Self> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(map_eof)?;
        if &magic != MAGIC {
            return Err(SatchelError::Format("not a symmetric container".into()));
        }
        let version = read_u8(r)?;
        if version != SYM_VERSION {
            return Err(SatchelError::Format(format!(
                "unsupported container version {version}"
            )));
        }
        let mut kdf_salt = [0u8; SALT_LEN];
        r.read_exact(&mut kdf_salt).map_err(map_eof)?;
        let kdf_costs = KdfCosts {
            m_cost: read_u32(r)?,
            t_cost: read_u32(r)?,
            p_cost: read_u32(r)?,
        };
        let mut nonce_base = [0u8; NONCE_LEN];
        r.read_exact(&mut nonce_base).map_err(map_eof)?;
        let payload_type = PayloadType::from_u8(read_u8(r)?)?;
        let metadata_len = read_u32(r)?;
        if metadata_len > MAX_METADATA_LEN {
            return Err(SatchelError::Format(format!(
                "metadata section of {metadata_len} bytes"
            )));
        }
        let mut metadata_blob = vec![0u8; metadata_len as usize];
        r.read_exact(&mut metadata_blob).map_err(map_eof)?;

        let source_file = if payload_type == PayloadType::File {
            let name_len = read_u16(r)?;
            if name_len > MAX_NAME_LEN {
                return Err(SatchelError::Format("file name too long".into()));
            }
            let mut name = vec![0u8; name_len as usize];
            r.read_exact(&mut name).map_err(map_eof)?;
            let name = String::from_utf8(name)
                .map_err(|_| SatchelError::Format("file name is not UTF-8".into()))?;
            let mtime = read_i64(r)?;
            let perm = read_u16(r)?;
            let size = read_u64(r)?;
            Some(SourceFileInfo {
                name,
                mtime,
                perm,
                size,
            })
        } else {
            None
        };

        Ok(Self {
            version,
            kdf_salt,
            kdf_costs,
            nonce_base,
            payload_type,
            metadata_blob,
            source_file,
        })
    }
}

fn map_eof(e: std::io::Error) -> SatchelError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        SatchelError::Format("truncated container header".into())
    } else {
        SatchelError::Io(e)
    }
}

fn read_u8(r: &mut dyn Read) -> Result<u8> {
    let mut b = [0u8; 1];
    r.read_exact(&mut b).map_err(map_eof)?;
    Ok(b[0])
}

fn read_u16(r: &mut dyn Read) -> Result<u16> {
    let mut b = [0u8; 2];
    r.read_exact(&mut b).map_err(map_eof)?;
    Ok(u16::from_be_bytes(b))
}

fn read_u32(r: &mut dyn Read) -> Result<u32> {
    let mut b = [0u8; 4];
    r.read_exact(&mut b).map_err(map_eof)?;
    Ok(u32::from_be_bytes(b))
}

fn read_u64(r: &mut dyn Read) -> Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(map_eof)?;
    Ok(u64::from_be_bytes(b))
}

fn read_i64(r: &mut dyn Read) -> Result<i64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b).map_err(map_eof)?;
    Ok(i64::from_be_bytes(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(payload_type: PayloadType, source_file: Option<SourceFileInfo>) -> SymHeader {
        SymHeader {
            version: SYM_VERSION,
            kdf_salt: [1u8; SALT_LEN],
            kdf_costs: KdfCosts::default(),
            nonce_base: [2u8; NONCE_LEN],
            payload_type,
            metadata_blob: vec![9, 9, 9],
            source_file,
        }
    }

    #[test]
    fn stream_header_roundtrip() {
        let h = sample(PayloadType::Stream, None);
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        let back = SymHeader::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.payload_type, PayloadType::Stream);
        assert_eq!(back.kdf_salt, h.kdf_salt);
        assert_eq!(back.kdf_costs, h.kdf_costs);
        assert_eq!(back.metadata_blob, h.metadata_blob);
        assert!(back.source_file.is_none());
    }

    #[test]
    fn file_header_carries_source_info() {
        let info = SourceFileInfo {
            name: "doc.pdf".into(),
            mtime: 1_700_000_000,
            perm: 0o644,
            size: 1234,
        };
        let h = sample(PayloadType::File, Some(info.clone()));
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        let back = SymHeader::read_from(&mut &buf[..]).unwrap();
        assert_eq!(back.source_file, Some(info));
    }

    #[test]
    fn bad_magic_rejected() {
        let err = SymHeader::read_from(&mut &b"NOPE....."[..]).unwrap_err();
        assert!(matches!(err, SatchelError::Format(_)));
    }

    #[test]
    fn truncated_header_rejected() {
        let h = sample(PayloadType::Stream, None);
        let mut buf = Vec::new();
        h.write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 2);
        assert!(SymHeader::read_from(&mut &buf[..]).is_err());
    }
}
