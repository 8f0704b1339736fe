//! Binary image of a frozen trie.
//!
//! Little-endian layout: a 24-byte header, `index_length` 16-bit index
//! entries, then the data array at the stored value width. The header's
//! `options` word packs the moved null-data offset above a value-width
//! code, so a reader needs nothing beyond this module to interpret an
//! image.

use crate::{
    layout::{BMP_INDEX_LENGTH, INDEX_SHIFT, NO_DATA_NULL_OFFSET, SHIFT_1},
    trie::{CodePointTrie, TrieData, ValueWidth},
};
use thiserror::Error;

/// `"Tri3"` as a little-endian 32-bit word.
pub const SIGNATURE: u32 = 0x5472_6933;

/// Fixed header length in bytes.
pub const HEADER_LENGTH: usize = 24;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("serialized trie is truncated: {have} bytes, need {need}")]
    Truncated { need: usize, have: usize },
    #[error("unrecognized signature 0x{0:08X}")]
    UnrecognizedSignature(u32),
    #[error("unrecognized value width code {0}")]
    UnrecognizedValueWidth(u32),
    #[error("index table too short: {0} entries")]
    IndexTooShort(u16),
}

impl CodePointTrie {
    /// Total byte length of the serialized image.
    pub fn serialized_length(&self) -> usize {
        let value_size = match self.data {
            TrieData::Bits16(_) => 2,
            TrieData::Bits32(_) => 4,
        };
        HEADER_LENGTH + self.index.len() * 2 + self.data.len() * value_size
    }

    /// Serializes the trie into a single contiguous buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.serialized_length());
        out.extend_from_slice(&SIGNATURE.to_le_bytes());
        let options = (self.data_null_offset << 12) | self.value_width().code();
        out.extend_from_slice(&options.to_le_bytes());
        out.extend_from_slice(&(self.index.len() as u16).to_le_bytes());
        out.extend_from_slice(&((self.data.len() as u32 >> INDEX_SHIFT) as u16).to_le_bytes());
        out.extend_from_slice(&self.index2_null_offset.to_le_bytes());
        out.extend_from_slice(&((self.high_start >> SHIFT_1) as u16).to_le_bytes());
        out.extend_from_slice(&self.high_value.to_le_bytes());
        out.extend_from_slice(&self.error_value.to_le_bytes());
        for &entry in &self.index {
            out.extend_from_slice(&entry.to_le_bytes());
        }
        match &self.data {
            TrieData::Bits16(data) => {
                for &v in data {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
            TrieData::Bits32(data) => {
                for &v in data {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }
        debug_assert_eq!(out.len(), self.serialized_length());
        out
    }

    /// Re-opens a trie from a serialized image. Trailing bytes past the
    /// image are ignored.
    pub fn from_bytes(bytes: &[u8]) -> Result<CodePointTrie, FormatError> {
        if bytes.len() < HEADER_LENGTH {
            return Err(FormatError::Truncated {
                need: HEADER_LENGTH,
                have: bytes.len(),
            });
        }
        let signature = read_u32(bytes, 0);
        if signature != SIGNATURE {
            return Err(FormatError::UnrecognizedSignature(signature));
        }
        let options = read_u32(bytes, 4);
        let width = ValueWidth::from_code(options & 0xFFF)
            .ok_or(FormatError::UnrecognizedValueWidth(options & 0xFFF))?;
        let data_null_offset = options >> 12;
        let index_length = read_u16(bytes, 8);
        let data_length = (read_u16(bytes, 10) as usize) << INDEX_SHIFT;
        let index2_null_offset = read_u16(bytes, 12);
        let high_start = (read_u16(bytes, 14) as u32) << SHIFT_1;
        let high_value = read_u32(bytes, 16);
        let error_value = read_u32(bytes, 20);

        if (index_length as u32) < BMP_INDEX_LENGTH {
            return Err(FormatError::IndexTooShort(index_length));
        }
        let value_size = match width {
            ValueWidth::Bits16 => 2,
            ValueWidth::Bits32 => 4,
        };
        let need = HEADER_LENGTH + index_length as usize * 2 + data_length * value_size;
        if bytes.len() < need {
            return Err(FormatError::Truncated {
                need,
                have: bytes.len(),
            });
        }

        let mut pos = HEADER_LENGTH;
        let mut index = Vec::with_capacity(index_length as usize);
        for _ in 0..index_length {
            index.push(read_u16(bytes, pos));
            pos += 2;
        }
        let data = match width {
            ValueWidth::Bits16 => {
                let mut data = Vec::with_capacity(data_length);
                for _ in 0..data_length {
                    data.push(read_u16(bytes, pos));
                    pos += 2;
                }
                TrieData::Bits16(data)
            }
            ValueWidth::Bits32 => {
                let mut data = Vec::with_capacity(data_length);
                for _ in 0..data_length {
                    data.push(read_u32(bytes, pos));
                    pos += 4;
                }
                TrieData::Bits32(data)
            }
        };

        let data_move = match width {
            ValueWidth::Bits16 => index_length as u32,
            ValueWidth::Bits32 => 0,
        };
        let mut trie = CodePointTrie {
            index,
            data,
            high_start,
            high_value,
            error_value,
            // Recovered below; the header does not carry it.
            initial_value: high_value,
            data_null_offset,
            index2_null_offset,
            data_move,
        };
        if data_null_offset != NO_DATA_NULL_OFFSET {
            let di = data_null_offset.wrapping_sub(data_move) as usize;
            if di < trie.data.len() {
                trie.initial_value = match &trie.data {
                    TrieData::Bits16(d) => d[di] as u32,
                    TrieData::Bits32(d) => d[di],
                };
            }
        }
        Ok(trie)
    }
}

#[inline]
fn read_u16(bytes: &[u8], pos: usize) -> u16 {
    u16::from_le_bytes([bytes[pos], bytes[pos + 1]])
}

#[inline]
fn read_u32(bytes: &[u8], pos: usize) -> u32 {
    u32::from_le_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]])
}
