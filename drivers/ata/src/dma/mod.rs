//! DMA transport
//!
//! Two engines share one contract: program the engine for the buffer, let
//! the controller write the ATA command, wait for completion and always
//! stop the engine on the way out.
//!
//! - [`isa`]: legacy 8237 16-bit channels 5, 6 and 7. Needs a physical
//!   address below 1M and splits at 128K boundaries ([`plan`]).
//! - [`bmide`]: PCI bus-master IDE driven by a PRD table.
//!
//! Physical addresses come from the [`DmaPlatform`] the kernel supplies.

pub mod bmide;
pub mod isa;
pub mod plan;

pub use bmide::{BusMaster, PrdEntry, PrdTable};
pub use isa::IsaChannel;
pub use plan::{DmaTransferPlan, SubTransfer};

use crate::buffer::DataBuffer;

/// Which engine a DMA command runs on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DmaEngine {
    Isa,
    BusMaster,
}

/// Platform services needed to aim a DMA engine at a buffer.
pub trait DmaPlatform: Send {
    /// Physical address of the buffer's first byte, if it is DMA capable
    fn physical_address(&self, buffer: &DataBuffer) -> Option<u32>;

    /// Copy `entries` into DMA-reachable memory and return the table's
    /// physical address
    fn load_prd_table(&mut self, entries: &[PrdEntry]) -> Option<u32>;

    /// Make the first `bytes` of `buffer` visible to the engine before it
    /// reads memory.
    fn sync_for_device(&mut self, _buffer: &DataBuffer, _bytes: usize) {}

    /// Make what the engine wrote visible in the first `bytes` of `buffer`.
    fn sync_for_cpu(&mut self, _buffer: &mut DataBuffer, _bytes: usize) {}
}

/// Identity-mapped platform: the buffer's virtual address is its physical
/// address and PRD tables live in a static area the caller provides.
pub struct IdentityMapped {
    prd_area: *mut PrdEntry,
    prd_capacity: usize,
}

// The PRD area is owned by this value for its lifetime.
unsafe impl Send for IdentityMapped {}

impl IdentityMapped {
    /// # Safety
    ///
    /// `prd_area` must be identity mapped, 4-byte aligned, not cross a 64K
    /// boundary and hold `prd_capacity` entries.
    pub unsafe fn new(prd_area: *mut PrdEntry, prd_capacity: usize) -> Self {
        Self { prd_area, prd_capacity }
    }
}

impl DmaPlatform for IdentityMapped {
    fn physical_address(&self, buffer: &DataBuffer) -> Option<u32> {
        u32::try_from(buffer.as_ptr() as usize).ok()
    }

    fn load_prd_table(&mut self, entries: &[PrdEntry]) -> Option<u32> {
        if entries.len() > self.prd_capacity {
            return None;
        }
        for (i, entry) in entries.iter().enumerate() {
            unsafe { core::ptr::write_volatile(self.prd_area.add(i), *entry) };
        }
        u32::try_from(self.prd_area as usize).ok()
    }
}
