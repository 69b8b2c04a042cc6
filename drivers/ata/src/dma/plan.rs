//! ISA DMA transfer plan.
//!
//! The 16-bit ISA channels address memory as a page plus a 16-bit word
//! offset, so one programmed transfer cannot cross a 128K physical boundary.
//! A buffer that straddles one is moved as two sub-transfers.

use heapless::Vec;

use crate::consts::{ISA_DMA_BOUNDARY, ISA_DMA_BOUNDARY_MASK};

/// One programmed DMA transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubTransfer {
    /// Page register value (physical address bits 16-19, bit 16 ignored)
    pub page: u8,
    /// Word offset within the 128K page
    pub word_offset: u16,
    pub word_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DmaTransferPlan {
    parts: Vec<SubTransfer, 2>,
}

impl DmaTransferPlan {
    /// Split `byte_count` bytes starting at physical `address`.
    pub fn new(address: u32, byte_count: u32) -> Self {
        let region = address & ISA_DMA_BOUNDARY_MASK;
        let page = (region >> 16) as u8;
        let word_offset = ((address & 0x1_FFFE) >> 1) as u16;
        let total_words = byte_count >> 1;

        let mut parts = Vec::new();
        let last = address.wrapping_add(byte_count.saturating_sub(1));
        if byte_count > 0 && (last & ISA_DMA_BOUNDARY_MASK) != region {
            let first_bytes = region + ISA_DMA_BOUNDARY - address;
            let first_words = first_bytes >> 1;
            let _ = parts.push(SubTransfer { page, word_offset, word_count: first_words });
            let _ = parts.push(SubTransfer {
                page: page.wrapping_add(2),
                word_offset: 0,
                word_count: total_words - first_words,
            });
        } else {
            let _ = parts.push(SubTransfer { page, word_offset, word_count: total_words });
        }
        Self { parts }
    }

    pub fn parts(&self) -> &[SubTransfer] {
        &self.parts
    }

    pub fn is_split(&self) -> bool {
        self.parts.len() == 2
    }

    pub fn total_words(&self) -> u32 {
        self.parts.iter().map(|p| p.word_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_transfer_inside_region() {
        let plan = DmaTransferPlan::new(0x0002_1000, 0x1000);
        assert!(!plan.is_split());
        assert_eq!(
            plan.parts()[0],
            SubTransfer { page: 0x02, word_offset: 0x0800, word_count: 0x800 }
        );
    }

    #[test]
    fn test_split_at_128k_boundary() {
        let plan = DmaTransferPlan::new(0x0003_F000, 0x2000);
        assert!(plan.is_split());
        let parts = plan.parts();
        assert_eq!(parts[0], SubTransfer { page: 0x02, word_offset: 0xF800, word_count: 0x800 });
        assert_eq!(parts[1], SubTransfer { page: 0x04, word_offset: 0, word_count: 0x800 });
    }

    #[test]
    fn test_word_counts_always_sum_to_half_the_bytes() {
        let mut address = 0x0001_0000u32;
        while address < 0x000A_0000 {
            for &bytes in &[2u32, 512, 4096, 32768, 0x1_0000] {
                let plan = DmaTransferPlan::new(address, bytes);
                let crosses = (address & 0xE_0000) != ((address + bytes - 1) & 0xE_0000);
                assert_eq!(plan.is_split(), crosses, "address 0x{:X} bytes {}", address, bytes);
                assert_eq!(plan.total_words(), bytes / 2, "address 0x{:X} bytes {}", address, bytes);
            }
            address += 0x1F02;
        }
    }

    #[test]
    fn test_last_byte_on_boundary_is_not_split() {
        let plan = DmaTransferPlan::new(0x0001_FE00, 0x200);
        assert!(!plan.is_split(), "0x1FE00 + 0x1FF stays below 0x20000");
    }
}
