//! Memory-mapped register window backend (PCMCIA memory mode).

use core::mem::size_of;

use volatile::Volatile;

use super::RegisterIo;

/// A mapped register window.
///
/// Accesses outside the window read as all ones and writes are dropped,
/// the way an undecoded bus behaves.
pub struct MmioWindow {
    base: *mut u8,
    len: usize,
}

// The window is only reached through `&mut self`.
unsafe impl Send for MmioWindow {}

impl MmioWindow {
    /// # Safety
    ///
    /// `base..base + len` must be a valid, writable mapping for the lifetime
    /// of the window, aligned to at least 4 bytes, and not aliased elsewhere.
    pub unsafe fn new(base: *mut u8, len: usize) -> Self {
        Self { base, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn cell<T>(&mut self, addr: u32) -> Option<Volatile<&mut T>> {
        let offset = addr as usize;
        if offset % size_of::<T>() != 0 || offset + size_of::<T>() > self.len {
            return None;
        }
        // SAFETY: bounds and alignment checked above; `new` guarantees the
        // mapping is valid and exclusively ours.
        Some(Volatile::new(unsafe { &mut *(self.base.add(offset) as *mut T) }))
    }
}

impl RegisterIo for MmioWindow {
    fn read8(&mut self, addr: u32) -> u8 {
        self.cell::<u8>(addr).map_or(0xFF, |c| c.read())
    }

    fn write8(&mut self, addr: u32, value: u8) {
        if let Some(mut c) = self.cell::<u8>(addr) {
            c.write(value);
        }
    }

    fn read16(&mut self, addr: u32) -> u16 {
        self.cell::<u16>(addr).map_or(0xFFFF, |c| c.read())
    }

    fn write16(&mut self, addr: u32, value: u16) {
        if let Some(mut c) = self.cell::<u16>(addr) {
            c.write(value);
        }
    }

    fn read32(&mut self, addr: u32) -> u32 {
        self.cell::<u32>(addr).map_or(0xFFFF_FFFF, |c| c.read())
    }

    fn write32(&mut self, addr: u32, value: u32) {
        if let Some(mut c) = self.cell::<u32>(addr) {
            c.write(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_access() {
        let mut backing = [0u32; 16];
        let mut window = unsafe { MmioWindow::new(backing.as_mut_ptr() as *mut u8, 64) };

        window.write8(0x07, 0xEC);
        window.write16(0x08, 0xBEEF);
        assert_eq!(window.read8(0x07), 0xEC);
        assert_eq!(window.read16(0x08), 0xBEEF);
        assert_eq!(window.read8(0x08), 0xEF, "little-endian byte view");
    }

    #[test]
    fn test_out_of_window_floats_high() {
        let mut backing = [0u32; 4];
        let mut window = unsafe { MmioWindow::new(backing.as_mut_ptr() as *mut u8, 16) };
        assert_eq!(window.read8(0x400), 0xFF);
        assert_eq!(window.read16(0x03), 0xFFFF, "misaligned word access is not decoded");
        window.write32(0x40, 1);
        assert_eq!(backing, [0; 4]);
    }
}
