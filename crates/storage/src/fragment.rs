//! Fragment data and its export stream
//!
//! Stream format:
//! - Magic: `FMFR` (4 bytes)
//! - Body: sorted `(row, column)` pairs serialized with bincode
//! - Trailer: crc32 of the body (u32, little endian)
//!
//! Bits are kept sorted, so equal fragments always export equal bytes.

use bincode::{config::standard, serde::{decode_from_slice, encode_to_vec}};
use bytes::{BufMut, Bytes, BytesMut};
use crc32fast::Hasher as Crc32Hasher;
use std::collections::BTreeSet;

use crate::traits::{StoreError, StoreResult};

const MAGIC: &[u8; 4] = b"FMFR";
const TRAILER_LEN: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragment {
    bits: BTreeSet<(u64, u64)>,
}

impl Fragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_bit(&mut self, row: u64, column: u64) -> bool {
        self.bits.insert((row, column))
    }

    pub fn contains(&self, row: u64, column: u64) -> bool {
        self.bits.contains(&(row, column))
    }

    /// Columns set in `row`
    pub fn row(&self, row: u64) -> Vec<u64> {
        self.bits
            .range((row, 0)..=(row, u64::MAX))
            .map(|&(_, c)| c)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn export(&self) -> StoreResult<Bytes> {
        let body = encode_to_vec(&self.bits, standard())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut hasher = Crc32Hasher::new();
        hasher.update(&body);
        let crc = hasher.finalize();

        let mut buf = BytesMut::with_capacity(MAGIC.len() + body.len() + TRAILER_LEN);
        buf.put_slice(MAGIC);
        buf.put_slice(&body);
        buf.put_u32_le(crc);
        Ok(buf.freeze())
    }

    /// Decode an exported stream without touching any fragment
    pub fn decode(data: &[u8]) -> StoreResult<Fragment> {
        if data.len() < MAGIC.len() + TRAILER_LEN {
            return Err(StoreError::Corrupt(format!(
                "stream too short: {} bytes",
                data.len()
            )));
        }
        if &data[..MAGIC.len()] != MAGIC {
            return Err(StoreError::Corrupt("bad magic".to_string()));
        }

        let body = &data[MAGIC.len()..data.len() - TRAILER_LEN];
        let mut trailer = [0u8; TRAILER_LEN];
        trailer.copy_from_slice(&data[data.len() - TRAILER_LEN..]);
        let expected = u32::from_le_bytes(trailer);

        let mut hasher = Crc32Hasher::new();
        hasher.update(body);
        let actual = hasher.finalize();
        if actual != expected {
            return Err(StoreError::Checksum { expected, actual });
        }

        let (bits, read): (BTreeSet<(u64, u64)>, usize) = decode_from_slice(body, standard())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        if read != body.len() {
            return Err(StoreError::Corrupt(format!(
                "{} trailing body bytes",
                body.len() - read
            )));
        }
        Ok(Fragment { bits })
    }

    /// Union another fragment's bits into this one
    pub fn merge(&mut self, other: Fragment) {
        self.bits.extend(other.bits);
    }
}
