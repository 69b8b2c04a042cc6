//! Low-level register access trace.
//!
//! Every individual register read or write made through [`super::Bus`] lands
//! here. This is distinct from the command history, which records one entry
//! per dispatched command.

use heapless::Deque;
use serde::Serialize;

use crate::consts::REGISTER_TRACE_CAPACITY;
use crate::types::Register;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessKind {
    Read8,
    Write8,
    Read16,
    Write16,
    Read32,
    Write32,
    /// Block transfer of `value` units from the data register
    BlockIn,
    /// Block transfer of `value` units to the data register
    BlockOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegisterAccess {
    pub kind: AccessKind,
    /// Named ATA register, or `None` for DMA controller and bus-master ports
    pub register: Option<Register>,
    pub addr: u32,
    pub value: u32,
}

pub struct RegisterTrace {
    records: Deque<RegisterAccess, REGISTER_TRACE_CAPACITY>,
    total: u64,
    enabled: bool,
}

impl RegisterTrace {
    pub const fn new() -> Self {
        Self {
            records: Deque::new(),
            total: 0,
            enabled: true,
        }
    }

    pub fn record(&mut self, access: RegisterAccess) {
        if !self.enabled {
            return;
        }
        log::trace!(
            "{:?} {:?} @0x{:04X} = 0x{:X}",
            access.kind,
            access.register,
            access.addr,
            access.value
        );
        if self.records.is_full() {
            self.records.pop_front();
        }
        let _ = self.records.push_back(access);
        self.total += 1;
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Number of accesses recorded since creation, including overwritten ones
    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &RegisterAccess> {
        self.records.iter()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Writes to a named register, oldest first
    pub fn writes_to(&self, register: Register) -> impl Iterator<Item = u32> + '_ {
        self.records
            .iter()
            .filter(move |a| a.register == Some(register) && matches!(a.kind, AccessKind::Write8))
            .map(|a| a.value)
    }
}

impl Default for RegisterTrace {
    fn default() -> Self {
        Self::new()
    }
}
