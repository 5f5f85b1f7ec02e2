use rand::RngCore;
use thiserror::Error;

use crate::sim::types::{U16, U32, U8};

/// Default size of simulated memory: 16 MiB.
pub const DEFAULT_SIZE: usize = 0x0100_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    #[error("out of bounds memory access at {address:#010x} (memory size {size:#x})")]
    OutOfBounds { address: u32, size: usize },
}

/// Flat little-endian memory.
///
/// Reads only check the start address; bytes past the end read as zero.
/// Writes never fail: bytes past the end are dropped.
#[derive(Clone)]
pub struct BinaryMemory {
    bytes: Vec<u8>,
}

impl std::fmt::Debug for BinaryMemory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryMemory")
            .field("size", &self.bytes.len())
            .finish_non_exhaustive()
    }
}

impl BinaryMemory {
    #[must_use]
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0; size],
        }
    }

    /// Memory filled with random bytes, so reads of uninitialized data stand out.
    #[must_use]
    pub fn randomized(size: usize) -> Self {
        let mut bytes = vec![0; size];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    fn check(&self, address: u32) -> Result<usize, MemoryError> {
        let index = address as usize;
        if index >= self.bytes.len() {
            return Err(MemoryError::OutOfBounds {
                address,
                size: self.bytes.len(),
            });
        }
        Ok(index)
    }

    fn read_le<const N: usize>(&self, address: u32) -> Result<[u8; N], MemoryError> {
        let start = self.check(address)?;
        let mut out = [0u8; N];
        for (i, byte) in out.iter_mut().enumerate() {
            *byte = self.bytes.get(start + i).copied().unwrap_or(0);
        }
        Ok(out)
    }

    pub fn read_u8(&self, address: u32) -> Result<U8, MemoryError> {
        Ok(U8::new(self.read_le::<1>(address)?[0]))
    }

    pub fn read_u16(&self, address: u32) -> Result<U16, MemoryError> {
        Ok(U16::new(u16::from_le_bytes(self.read_le(address)?)))
    }

    pub fn read_u32(&self, address: u32) -> Result<U32, MemoryError> {
        Ok(U32::new(u32::from_le_bytes(self.read_le(address)?)))
    }

    /// Bytes from `address` up to, not including, the next NUL.
    pub fn read_string(&self, address: u32) -> Result<Vec<u8>, MemoryError> {
        self.read_string_bounded(address, usize::MAX)
    }

    /// Like [`Self::read_string`], but stops after `limit` bytes.
    pub fn read_string_bounded(&self, address: u32, limit: usize) -> Result<Vec<u8>, MemoryError> {
        let start = self.check(address)?;
        Ok(self.bytes[start..]
            .iter()
            .take(limit)
            .take_while(|&&b| b != 0)
            .copied()
            .collect())
    }

    pub fn write_bytes(&mut self, address: u32, data: &[u8]) {
        let start = address as usize;
        for (i, &byte) in data.iter().enumerate() {
            if let Some(slot) = self.bytes.get_mut(start + i) {
                *slot = byte;
            }
        }
    }

    pub fn write_u8(&mut self, address: u32, value: U8) {
        self.write_bytes(address, &[value.value()]);
    }

    pub fn write_u16(&mut self, address: u32, value: U16) {
        self.write_bytes(address, &value.value().to_le_bytes());
    }

    pub fn write_u32(&mut self, address: u32, value: U32) {
        self.write_bytes(address, &value.value().to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::{BinaryMemory, MemoryError};
    use crate::sim::types::{U16, U32, U8};

    #[test]
    fn little_endian_round_trip() {
        let mut memory = BinaryMemory::new(16);
        memory.write_u32(0, U32::new(0x1234_5678));
        assert_eq!(memory.read_u8(0).expect("u8"), U8::new(0x78));
        assert_eq!(memory.read_u16(2).expect("u16"), U16::new(0x1234));
    }

    #[test]
    fn reads_check_start_address_only() {
        let mut memory = BinaryMemory::new(4);
        memory.write_bytes(0, &[1, 2, 3, 4]);
        assert_eq!(memory.read_u32(2).expect("partial").value(), 0x0403);
        assert_eq!(
            memory.read_u32(4),
            Err(MemoryError::OutOfBounds { address: 4, size: 4 })
        );
    }

    #[test]
    fn writes_past_end_are_dropped() {
        let mut memory = BinaryMemory::new(4);
        memory.write_u32(2, U32::new(0xaabb_ccdd));
        memory.write_u8(100, U8::new(1));
        assert_eq!(memory.read_u16(2).expect("u16").value(), 0xccdd);
    }

    #[test]
    fn reads_c_strings() {
        let mut memory = BinaryMemory::new(8);
        memory.write_bytes(1, b"hi\0x");
        assert_eq!(memory.read_string(1).expect("string"), b"hi".to_vec());
        assert!(memory.read_string(8).is_err());
    }

    #[test]
    fn bounded_strings_stop_at_the_limit() {
        let mut memory = BinaryMemory::new(8);
        memory.write_bytes(0, b"abcdefgh");
        assert_eq!(memory.read_string(0).expect("unterminated"), b"abcdefgh".to_vec());
        assert_eq!(memory.read_string_bounded(0, 3).expect("bounded"), b"abc".to_vec());
        assert_eq!(memory.read_string_bounded(6, 3).expect("short"), b"gh".to_vec());
    }
}
