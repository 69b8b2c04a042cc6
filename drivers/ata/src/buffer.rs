//! The shared data buffer used for every PIO and DMA payload.

use alloc::vec;
use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU64, Ordering};

use crate::consts::{BUFFER_SIZE, SECTOR_SIZE};

/// Opaque handle a DMA platform uses to look up the physical address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(u64);

impl BufferId {
    pub fn new() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        BufferId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Default for BufferId {
    fn default() -> Self {
        Self::new()
    }
}

/// One fixed-size byte buffer owned by a controller.
#[derive(Debug)]
pub struct DataBuffer {
    id: BufferId,
    data: Vec<u8>,
}

impl DataBuffer {
    pub fn new() -> Self {
        Self::with_capacity(BUFFER_SIZE)
    }

    pub fn with_capacity(size: usize) -> Self {
        Self {
            id: BufferId::new(),
            data: vec![0u8; size],
        }
    }

    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    /// The `index`-th 512-byte sector of the buffer
    pub fn sector(&self, index: usize) -> &[u8] {
        let start = index * SECTOR_SIZE;
        &self.data[start..start + SECTOR_SIZE]
    }

    pub fn sector_mut(&mut self, index: usize) -> &mut [u8] {
        let start = index * SECTOR_SIZE;
        &mut self.data[start..start + SECTOR_SIZE]
    }

    /// Little-endian word `index`
    pub fn word(&self, index: usize) -> u16 {
        u16::from_le_bytes([self.data[index * 2], self.data[index * 2 + 1]])
    }

    pub fn set_word(&mut self, index: usize, value: u16) {
        self.data[index * 2..index * 2 + 2].copy_from_slice(&value.to_le_bytes());
    }
}

impl Default for DataBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deref for DataBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for DataBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_words_are_little_endian() {
        let mut buf = DataBuffer::new();
        assert_eq!(buf.capacity(), 32768);
        buf.set_word(83, 0x0400);
        assert_eq!(buf[166], 0x00);
        assert_eq!(buf[167], 0x04);
        assert_eq!(buf.word(83), 0x0400);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(DataBuffer::new().id(), DataBuffer::new().id());
    }
}
