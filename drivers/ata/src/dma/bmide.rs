//! PCI bus-master IDE engine and its physical region descriptor table.

use alloc::vec::Vec;

use crate::consts::*;
use crate::error::{AtaError, AtaResult};
use crate::io::{Bus, RegisterIo};
use crate::types::DataDirection;

/// One physical region descriptor as the engine reads it from memory.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PrdEntry {
    pub physical: u32,
    /// Byte count; 0 means 64K
    pub byte_count: u16,
    /// Bit 15 marks the last entry
    pub flags: u16,
}

impl PrdEntry {
    pub fn is_last(&self) -> bool {
        self.flags & PRD_EOT != 0
    }

    pub fn len(&self) -> u32 {
        if self.byte_count == 0 {
            PRD_MAX_BYTES
        } else {
            self.byte_count as u32
        }
    }
}

/// Builds a PRD table; no entry may cross a 64K physical boundary.
#[derive(Debug, Default)]
pub struct PrdTable {
    entries: Vec<PrdEntry>,
    total_bytes: u32,
}

impl PrdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region, splitting it at 64K boundaries
    pub fn add_region(&mut self, physical: u32, byte_count: u32) -> AtaResult<()> {
        if byte_count == 0 || byte_count & 1 != 0 || physical & 1 != 0 {
            return Err(AtaError::InvalidArgument);
        }
        let mut addr = physical;
        let mut remaining = byte_count;
        while remaining > 0 {
            let to_boundary = PRD_MAX_BYTES - (addr & (PRD_MAX_BYTES - 1));
            let len = remaining.min(to_boundary);
            self.entries.push(PrdEntry {
                physical: addr,
                byte_count: (len & 0xFFFF) as u16,
                flags: 0,
            });
            addr = addr.checked_add(len).ok_or(AtaError::InvalidArgument)?;
            remaining -= len;
        }
        self.total_bytes += byte_count;
        Ok(())
    }

    /// Mark the last entry and hand back the table
    pub fn build(mut self) -> (Vec<PrdEntry>, u32) {
        if let Some(last) = self.entries.last_mut() {
            last.flags |= PRD_EOT;
        }
        (self.entries, self.total_bytes)
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    pub fn total_size(&self) -> u32 {
        self.total_bytes
    }
}

/// Bus-master registers for one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusMaster {
    base: u16,
}

impl BusMaster {
    pub fn new(base: u16) -> Self {
        Self { base }
    }

    pub fn base(&self) -> u16 {
        self.base
    }

    pub fn status_port(&self) -> u16 {
        self.base + BM_STATUS
    }

    pub fn stop<B: RegisterIo>(&self, bus: &mut Bus<B>) {
        bus.port_write8(self.base + BM_COMMAND, 0);
    }

    /// Clear the write-one-to-clear INT and ERR bits
    pub fn clear_status<B: RegisterIo>(&self, bus: &mut Bus<B>) {
        bus.port_write8(self.status_port(), BM_SR_INT | BM_SR_ERROR);
    }

    pub fn status<B: RegisterIo>(&self, bus: &mut Bus<B>) -> u8 {
        bus.port_read8(self.status_port())
    }

    pub fn set_prd_address<B: RegisterIo>(&self, bus: &mut Bus<B>, physical: u32) {
        bus.port_write32(self.base + BM_PRD_ADDR, physical);
    }

    /// Set the direction with the engine stopped; reads move device to memory
    pub fn set_direction<B: RegisterIo>(&self, bus: &mut Bus<B>, direction: DataDirection) {
        bus.port_write8(self.base + BM_COMMAND, Self::direction_bits(direction));
    }

    pub fn start<B: RegisterIo>(&self, bus: &mut Bus<B>, direction: DataDirection) {
        bus.port_write8(self.base + BM_COMMAND, Self::direction_bits(direction) | BM_CR_START);
    }

    fn direction_bits(direction: DataDirection) -> u8 {
        match direction {
            DataDirection::In => BM_CR_READ,
            _ => 0,
        }
    }
}
