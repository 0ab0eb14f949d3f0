use crate::error::{Result, SatchelError};

pub const BLOCK_VERSION: u8 = 1;

/// Fixed descriptor preceding every block payload.
pub const BLOCK_HEADER_LEN: usize = 7;

/// Fixed ItemHeader block payload length.
pub const ITEM_HEADER_LEN: usize = 9;

/// Final ItemData block for the current item.
pub const FLAG_LAST_DATA: u8 = 1;
/// Payload was accepted by the per-block compressor.
pub const FLAG_COMPRESSED: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum BlockType {
    TreeData = 1,
    ItemHeader = 2,
    ItemData = 3,
}

impl BlockType {
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(BlockType::TreeData),
            2 => Ok(BlockType::ItemHeader),
            3 => Ok(BlockType::ItemData),
            _ => Err(SatchelError::Format(format!("unknown block type {v}"))),
        }
    }
}

/// `version:u8, flags:u8, type:u8, length:u32_be`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: u8,
    pub flags: u8,
    pub block_type: BlockType,
    pub length: u32,
}

impl BlockHeader {
    pub fn new(block_type: BlockType, flags: u8, length: u32) -> Self {
        Self {
            version: BLOCK_VERSION,
            flags,
            block_type,
            length,
        }
    }

    pub fn encode(&self) -> [u8; BLOCK_HEADER_LEN] {
        let mut out = [0u8; BLOCK_HEADER_LEN];
        out[0] = self.version;
        out[1] = self.flags;
        out[2] = self.block_type as u8;
        out[3..7].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8; BLOCK_HEADER_LEN]) -> Result<Self> {
        if buf[0] != BLOCK_VERSION {
            return Err(SatchelError::Format(format!(
                "unsupported block version {}",
                buf[0]
            )));
        }
        Ok(Self {
            version: buf[0],
            flags: buf[1],
            block_type: BlockType::from_u8(buf[2])?,
            length: u32::from_be_bytes([buf[3], buf[4], buf[5], buf[6]]),
        })
    }
}

/// ItemHeader block payload: `version:u8, item_id:u32_be, dir_id:u32_be`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ItemHeader {
    pub version: u8,
    pub item_id: u32,
    pub dir_id: u32,
}

impl ItemHeader {
    pub fn new(item_id: u32, dir_id: u32) -> Self {
        Self {
            version: BLOCK_VERSION,
            item_id,
            dir_id,
        }
    }

    pub fn encode(&self) -> [u8; ITEM_HEADER_LEN] {
        let mut out = [0u8; ITEM_HEADER_LEN];
        out[0] = self.version;
        out[1..5].copy_from_slice(&self.item_id.to_be_bytes());
        out[5..9].copy_from_slice(&self.dir_id.to_be_bytes());
        out
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() != ITEM_HEADER_LEN {
            return Err(SatchelError::Format(format!(
                "item header must be {ITEM_HEADER_LEN} bytes, got {}",
                buf.len()
            )));
        }
        if buf[0] != BLOCK_VERSION {
            return Err(SatchelError::Format(format!(
                "unsupported item header version {}",
                buf[0]
            )));
        }
        Ok(Self {
            version: buf[0],
            item_id: u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]),
            dir_id: u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_header_roundtrip() {
        let h = BlockHeader::new(BlockType::ItemData, FLAG_LAST_DATA | FLAG_COMPRESSED, 4096);
        let enc = h.encode();
        assert_eq!(BlockHeader::decode(&enc).unwrap(), h);
    }

    #[test]
    fn unknown_type_rejected() {
        let mut enc = BlockHeader::new(BlockType::TreeData, 0, 1).encode();
        enc[2] = 99;
        assert!(BlockHeader::decode(&enc).is_err());
    }

    #[test]
    fn unknown_version_rejected() {
        let mut enc = BlockHeader::new(BlockType::TreeData, 0, 1).encode();
        enc[0] = 2;
        assert!(BlockHeader::decode(&enc).is_err());
    }

    #[test]
    fn item_header_roundtrip() {
        let h = ItemHeader::new(7, 3);
        let enc = h.encode();
        assert_eq!(ItemHeader::decode(&enc).unwrap(), h);
    }
}
