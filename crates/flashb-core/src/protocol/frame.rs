//! Wire layout of firmware command payloads.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};
use thiserror::Error;

use super::constants::{CHUNK_PAYLOAD_SIZE, CHUNK_SIZE, PAD_BYTE, WORD_RESPONSE_LEN};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Buffer too small: expected {expected}, got {actual}")]
    BufferTooSmall { expected: usize, actual: usize },
    #[error("Block must be {expected} bytes, got {actual}")]
    BadBlockLength { expected: usize, actual: usize },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Chunk command payload (20 bytes, follows the opcode).
///
/// ```text
/// 0-1:  firmware version (LE)
/// 2-3:  address (LE)
/// 4-19: block data
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkFrame {
    pub fw_version: u16,
    pub address: u16,
    pub data: [u8; CHUNK_SIZE],
}

impl ChunkFrame {
    pub const SIZE: usize = CHUNK_PAYLOAD_SIZE;

    pub fn new(fw_version: u16, address: u16, block: &[u8]) -> Result<Self, FrameError> {
        let data: [u8; CHUNK_SIZE] =
            block
                .try_into()
                .map_err(|_| FrameError::BadBlockLength {
                    expected: CHUNK_SIZE,
                    actual: block.len(),
                })?;
        Ok(Self {
            fw_version,
            address,
            data,
        })
    }

    /// Build a frame from the tail of a section, padding with [`PAD_BYTE`].
    pub fn padded(fw_version: u16, address: u16, tail: &[u8]) -> Self {
        let mut data = [PAD_BYTE; CHUNK_SIZE];
        let n = tail.len().min(CHUNK_SIZE);
        data[..n].copy_from_slice(&tail[..n]);
        Self {
            fw_version,
            address,
            data,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.write_u16::<LittleEndian>(self.fw_version).unwrap();
        buf.write_u16::<LittleEndian>(self.address).unwrap();
        buf.extend_from_slice(&self.data);
        buf
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, FrameError> {
        if data.len() < Self::SIZE {
            return Err(FrameError::BufferTooSmall {
                expected: Self::SIZE,
                actual: data.len(),
            });
        }
        let mut cursor = Cursor::new(data);
        let fw_version = cursor.read_u16::<LittleEndian>()?;
        let address = cursor.read_u16::<LittleEndian>()?;
        let mut block = [0u8; CHUNK_SIZE];
        cursor.read_exact(&mut block)?;
        Ok(Self {
            fw_version,
            address,
            data: block,
        })
    }
}

/// Decode a 16-bit little-endian reply (version or next address).
pub fn decode_word(response: &[u8]) -> Result<u16, FrameError> {
    if response.len() < WORD_RESPONSE_LEN {
        return Err(FrameError::BufferTooSmall {
            expected: WORD_RESPONSE_LEN,
            actual: response.len(),
        });
    }
    Ok(Cursor::new(response).read_u16::<LittleEndian>()?)
}

/// Encode a 16-bit reply the way the device sends it.
pub fn encode_word(value: u16) -> Vec<u8> {
    value.to_le_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_layout() {
        let block: Vec<u8> = (0..16).collect();
        let frame = ChunkFrame::new(0, 0xC010, &block).unwrap();
        let bytes = frame.to_bytes();
        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x10, 0xC0]);
        assert_eq!(&bytes[4..], block.as_slice());
    }

    #[test]
    fn test_chunk_decodes_on_device_side() {
        let block = [0x5Au8; 16];
        let sent = ChunkFrame::new(0, 0xE0F0, &block).unwrap().to_bytes();
        let received = ChunkFrame::from_bytes(&sent).unwrap();
        assert_eq!(received.address, 0xE0F0);
        assert_eq!(received.fw_version, 0);
        assert_eq!(received.data, block);
    }

    #[test]
    fn test_padded_tail() {
        let frame = ChunkFrame::padded(0, 0x1000, &[1, 2, 3]);
        assert_eq!(&frame.data[..3], &[1, 2, 3]);
        assert!(frame.data[3..].iter().all(|&b| b == PAD_BYTE));
    }

    #[test]
    fn test_new_rejects_short_block() {
        let err = ChunkFrame::new(0, 0, &[0u8; 15]).unwrap_err();
        assert!(matches!(
            err,
            FrameError::BadBlockLength {
                expected: 16,
                actual: 15
            }
        ));
    }

    #[test]
    fn test_from_bytes_too_small() {
        assert!(ChunkFrame::from_bytes(&[0u8; 19]).is_err());
    }

    #[test]
    fn test_decode_word() {
        assert_eq!(decode_word(&[0x34, 0x12]).unwrap(), 0x1234);
        assert_eq!(decode_word(&[0x00, 0xE0, 0xFF]).unwrap(), 0xE000);
        assert!(decode_word(&[0x01]).is_err());
    }
}
