//! x86 I/O-port backend.

use x86_64::instructions::interrupts;
use x86_64::instructions::port::Port;

use super::RegisterIo;

/// Direct `in`/`out` instruction access to the 16-bit I/O space.
///
/// Addresses above 0xFFFF are truncated to the port width.
pub struct PortIo {
    _private: (),
}

impl PortIo {
    /// # Safety
    ///
    /// The caller must run at an I/O privilege level that permits port access
    /// and must own the ATA channel and DMA controller ports it will touch.
    pub unsafe fn new() -> Self {
        Self { _private: () }
    }
}

impl RegisterIo for PortIo {
    fn read8(&mut self, addr: u32) -> u8 {
        unsafe { Port::<u8>::new(addr as u16).read() }
    }

    fn write8(&mut self, addr: u32, value: u8) {
        unsafe { Port::<u8>::new(addr as u16).write(value) }
    }

    fn read16(&mut self, addr: u32) -> u16 {
        unsafe { Port::<u16>::new(addr as u16).read() }
    }

    fn write16(&mut self, addr: u32, value: u16) {
        unsafe { Port::<u16>::new(addr as u16).write(value) }
    }

    fn read32(&mut self, addr: u32) -> u32 {
        unsafe { Port::<u32>::new(addr as u16).read() }
    }

    fn write32(&mut self, addr: u32, value: u32) {
        unsafe { Port::<u32>::new(addr as u16).write(value) }
    }

    fn interrupts_off(&mut self) -> bool {
        let was_enabled = interrupts::are_enabled();
        if was_enabled {
            interrupts::disable();
        }
        was_enabled
    }

    fn interrupts_restore(&mut self, was_enabled: bool) {
        if was_enabled {
            interrupts::enable();
        }
    }
}
