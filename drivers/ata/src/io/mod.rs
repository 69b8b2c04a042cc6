//! Port/register access layer
//!
//! [`RegisterIo`] is the backend seam: raw 8/16/32-bit reads and writes at an
//! address in either I/O-port space or a memory-mapped window. [`Bus`] sits on
//! top of a backend and knows the ATA register layout, the configured data
//! transfer width and the PCMCIA data-register options. Every access made
//! through a `Bus` is recorded in its [`RegisterTrace`].
//!
//! No retries and no interpretation happen here; values go up raw.

pub mod mmio;
#[cfg(target_arch = "x86_64")]
pub mod port;
pub mod trace;

use crate::config::{MemoryDataOption, TransferWidth};
use crate::consts::*;
use crate::types::Register;

pub use trace::{AccessKind, RegisterAccess, RegisterTrace};

/// Raw hardware access backend
pub trait RegisterIo {
    fn read8(&mut self, addr: u32) -> u8;
    fn write8(&mut self, addr: u32, value: u8);
    fn read16(&mut self, addr: u32) -> u16;
    fn write16(&mut self, addr: u32, value: u16);
    fn read32(&mut self, addr: u32) -> u32;
    fn write32(&mut self, addr: u32, value: u32);

    /// Mask CPU interrupts, returning whether they were enabled.
    ///
    /// Backends with no real interrupts leave this as a no-op.
    fn interrupts_off(&mut self) -> bool {
        false
    }

    fn interrupts_restore(&mut self, _was_enabled: bool) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSpace {
    Io,
    Memory,
}

/// Resolved addresses of the ten channel registers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterMap {
    space: AddressSpace,
    addrs: [u32; 10],
}

impl RegisterMap {
    fn build(space: AddressSpace, base: u32, ctrl: u32) -> Self {
        let mut addrs = [0u32; 10];
        for (i, slot) in addrs.iter_mut().enumerate().take(8) {
            *slot = base + i as u32;
        }
        addrs[8] = ctrl + ATA_REG_ALTSTATUS as u32;
        addrs[9] = ctrl + ATA_REG_DRVADDR as u32;
        Self { space, addrs }
    }

    /// Port-I/O channel; `ctrl` is the control block base (alt status at +6)
    pub fn io(base: u16, ctrl: u16) -> Self {
        Self::build(AddressSpace::Io, base as u32, ctrl as u32)
    }

    /// PCMCIA memory window: command block at 0, control block at 8
    pub fn memory() -> Self {
        Self::build(AddressSpace::Memory, MEM_CMD_BASE, MEM_CTRL_BASE)
    }

    pub fn space(&self) -> AddressSpace {
        self.space
    }

    pub fn addr(&self, reg: Register) -> u32 {
        self.addrs[reg.index()]
    }

    pub fn command_base(&self) -> u32 {
        self.addrs[0]
    }

    /// Reverse lookup used by backends that model a device
    pub fn decode(&self, addr: u32) -> Option<Register> {
        const ALL: [Register; 10] = [
            Register::Data,
            Register::Features,
            Register::SectorCount,
            Register::SectorNumber,
            Register::CylinderLow,
            Register::CylinderHigh,
            Register::DeviceHead,
            Register::Command,
            Register::DeviceControl,
            Register::DriveAddress,
        ];
        if self.space == AddressSpace::Memory && (MEM_BURST_BASE..MEM_BURST_BASE * 2).contains(&addr) {
            return Some(Register::Data);
        }
        ALL.iter().copied().find(|r| self.addrs[r.index()] == addr)
    }
}

/// Data register addressing for one memory-mode DRQ block.
///
/// `OptR` picks one of the fixed options from `tick`; a burst picked that
/// way also starts at a tick-derived offset inside the window.
pub fn resolve_memory_option(option: MemoryDataOption, tick: u32) -> (MemoryDataOption, u32) {
    match option {
        MemoryDataOption::Opt0 => (MemoryDataOption::Opt0, MEM_CMD_BASE),
        MemoryDataOption::Opt8 => (MemoryDataOption::Opt8, MEM_CTRL_BASE),
        MemoryDataOption::OptB => (MemoryDataOption::OptB, MEM_BURST_BASE),
        MemoryDataOption::OptR => match tick % 3 {
            0 => (MemoryDataOption::Opt0, MEM_CMD_BASE),
            1 => (MemoryDataOption::Opt8, MEM_CTRL_BASE),
            _ => (MemoryDataOption::OptB, MEM_BURST_BASE | (tick & MEM_BURST_MASK_WORD)),
        },
    }
}

/// Next burst address after one access of `step` bytes
fn next_burst(addr: u32, step: u32) -> u32 {
    let mask = if step == 1 { MEM_BURST_MASK_BYTE } else { MEM_BURST_MASK_WORD };
    ((addr + step) & mask) | MEM_BURST_BASE
}

/// An ATA channel reached through a backend
pub struct Bus<B: RegisterIo> {
    io: B,
    map: RegisterMap,
    width: TransferWidth,
    memory_option: MemoryDataOption,
    trace: RegisterTrace,
}

impl<B: RegisterIo> Bus<B> {
    pub fn new(io: B, map: RegisterMap) -> Self {
        Self {
            io,
            map,
            width: TransferWidth::Bits16,
            memory_option: MemoryDataOption::Opt0,
            trace: RegisterTrace::new(),
        }
    }

    pub fn set_map(&mut self, map: RegisterMap) {
        self.map = map;
    }

    pub fn map(&self) -> &RegisterMap {
        &self.map
    }

    pub fn set_transfer_width(&mut self, width: TransferWidth) {
        self.width = width;
    }

    pub fn transfer_width(&self) -> TransferWidth {
        self.width
    }

    pub fn set_memory_option(&mut self, option: MemoryDataOption) {
        self.memory_option = option;
    }

    pub fn trace(&self) -> &RegisterTrace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut RegisterTrace {
        &mut self.trace
    }

    pub fn io(&self) -> &B {
        &self.io
    }

    pub fn io_mut(&mut self) -> &mut B {
        &mut self.io
    }

    pub fn read(&mut self, reg: Register) -> u8 {
        let addr = self.map.addr(reg);
        let value = self.io.read8(addr);
        self.trace.record(RegisterAccess {
            kind: AccessKind::Read8,
            register: Some(reg),
            addr,
            value: value as u32,
        });
        value
    }

    pub fn write(&mut self, reg: Register, value: u8) {
        let addr = self.map.addr(reg);
        self.io.write8(addr, value);
        self.trace.record(RegisterAccess {
            kind: AccessKind::Write8,
            register: Some(reg),
            addr,
            value: value as u32,
        });
    }

    /// Byte access to a port outside the channel (DMA controller, bus master)
    pub fn port_read8(&mut self, addr: u16) -> u8 {
        let value = self.io.read8(addr as u32);
        self.trace.record(RegisterAccess {
            kind: AccessKind::Read8,
            register: None,
            addr: addr as u32,
            value: value as u32,
        });
        value
    }

    pub fn port_write8(&mut self, addr: u16, value: u8) {
        self.io.write8(addr as u32, value);
        self.trace.record(RegisterAccess {
            kind: AccessKind::Write8,
            register: None,
            addr: addr as u32,
            value: value as u32,
        });
    }

    pub fn port_write32(&mut self, addr: u16, value: u32) {
        self.io.write32(addr as u32, value);
        self.trace.record(RegisterAccess {
            kind: AccessKind::Write32,
            register: None,
            addr: addr as u32,
            value,
        });
    }

    /// Run `f` with interrupts held off on the backend
    pub fn critical<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let was_enabled = self.io.interrupts_off();
        let result = f(self);
        self.io.interrupts_restore(was_enabled);
        result
    }

    /// Read one DRQ data block into `buf` using the configured width.
    ///
    /// `tick` seeds the random memory-mode option.
    pub fn read_block(&mut self, buf: &mut [u8], tick: u32) {
        let words = buf.len() / 2;
        let data = self.map.addr(Register::Data);
        match self.map.space() {
            AddressSpace::Io => {
                for chunk in buf[..words * 2].chunks_mut(PIO_CHUNK_WORDS * 2) {
                    self.io_block_in(data, chunk);
                }
            }
            AddressSpace::Memory => self.mem_block_in(buf, tick),
        }
    }

    /// Write one DRQ data block from `buf` using the configured width
    pub fn write_block(&mut self, buf: &[u8], tick: u32) {
        let words = buf.len() / 2;
        let data = self.map.addr(Register::Data);
        match self.map.space() {
            AddressSpace::Io => {
                for chunk in buf[..words * 2].chunks(PIO_CHUNK_WORDS * 2) {
                    self.io_block_out(data, chunk);
                }
            }
            AddressSpace::Memory => self.mem_block_out(buf, tick),
        }
    }

    /// 32-bit transfers need an even word count; odd counts drop to 16-bit
    fn effective_width(&self, words: usize) -> TransferWidth {
        match self.width {
            TransferWidth::Bits32 if words % 2 != 0 => TransferWidth::Bits16,
            w => w,
        }
    }

    fn io_block_in(&mut self, data: u32, chunk: &mut [u8]) {
        let width = self.effective_width(chunk.len() / 2);
        match width {
            TransferWidth::Bits8 => {
                for b in chunk.iter_mut() {
                    *b = self.io.read8(data);
                }
            }
            TransferWidth::Bits16 => {
                for pair in chunk.chunks_exact_mut(2) {
                    pair.copy_from_slice(&self.io.read16(data).to_le_bytes());
                }
            }
            TransferWidth::Bits32 => {
                for quad in chunk.chunks_exact_mut(4) {
                    quad.copy_from_slice(&self.io.read32(data).to_le_bytes());
                }
            }
        }
        self.record_block(AccessKind::BlockIn, data, width, chunk.len());
    }

    fn io_block_out(&mut self, data: u32, chunk: &[u8]) {
        let width = self.effective_width(chunk.len() / 2);
        match width {
            TransferWidth::Bits8 => {
                for &b in chunk {
                    self.io.write8(data, b);
                }
            }
            TransferWidth::Bits16 => {
                for pair in chunk.chunks_exact(2) {
                    self.io.write16(data, u16::from_le_bytes([pair[0], pair[1]]));
                }
            }
            TransferWidth::Bits32 => {
                for quad in chunk.chunks_exact(4) {
                    self.io.write32(data, u32::from_le_bytes([quad[0], quad[1], quad[2], quad[3]]));
                }
            }
        }
        self.record_block(AccessKind::BlockOut, data, width, chunk.len());
    }

    fn mem_block_in(&mut self, buf: &mut [u8], tick: u32) {
        let (option, mut addr) = resolve_memory_option(self.memory_option, tick);
        let start = addr;
        let burst = option == MemoryDataOption::OptB;
        match self.width {
            TransferWidth::Bits8 => {
                for b in buf.iter_mut() {
                    *b = self.io.read8(addr);
                    if burst {
                        addr = next_burst(addr, 1);
                    }
                }
            }
            _ => {
                for pair in buf.chunks_exact_mut(2) {
                    pair.copy_from_slice(&self.io.read16(addr).to_le_bytes());
                    if burst {
                        addr = next_burst(addr, 2);
                    }
                }
            }
        }
        self.record_block(AccessKind::BlockIn, start, self.width, buf.len());
    }

    fn mem_block_out(&mut self, buf: &[u8], tick: u32) {
        let (option, mut addr) = resolve_memory_option(self.memory_option, tick);
        let start = addr;
        let burst = option == MemoryDataOption::OptB;
        match self.width {
            TransferWidth::Bits8 => {
                for &b in buf {
                    self.io.write8(addr, b);
                    if burst {
                        addr = next_burst(addr, 1);
                    }
                }
            }
            _ => {
                for pair in buf.chunks_exact(2) {
                    self.io.write16(addr, u16::from_le_bytes([pair[0], pair[1]]));
                    if burst {
                        addr = next_burst(addr, 2);
                    }
                }
            }
        }
        self.record_block(AccessKind::BlockOut, start, self.width, buf.len());
    }

    fn record_block(&mut self, kind: AccessKind, addr: u32, width: TransferWidth, bytes: usize) {
        let units = match width {
            TransferWidth::Bits8 => bytes,
            TransferWidth::Bits16 => bytes / 2,
            TransferWidth::Bits32 => bytes / 4,
        };
        self.trace.record(RegisterAccess {
            kind,
            register: Some(Register::Data),
            addr,
            value: units as u32,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;

    /// Records widths of data register accesses and serves a counter
    struct WidthRecorder {
        widths: Vec<u8>,
        addrs: Vec<u32>,
        next: u32,
    }

    impl WidthRecorder {
        fn new() -> Self {
            Self { widths: Vec::new(), addrs: Vec::new(), next: 0 }
        }
    }

    impl RegisterIo for WidthRecorder {
        fn read8(&mut self, addr: u32) -> u8 {
            self.widths.push(8);
            self.addrs.push(addr);
            self.next += 1;
            self.next as u8
        }
        fn write8(&mut self, addr: u32, _value: u8) {
            self.widths.push(8);
            self.addrs.push(addr);
        }
        fn read16(&mut self, addr: u32) -> u16 {
            self.widths.push(16);
            self.addrs.push(addr);
            self.next += 1;
            self.next as u16
        }
        fn write16(&mut self, addr: u32, _value: u16) {
            self.widths.push(16);
            self.addrs.push(addr);
        }
        fn read32(&mut self, addr: u32) -> u32 {
            self.widths.push(32);
            self.addrs.push(addr);
            self.next += 1;
            self.next
        }
        fn write32(&mut self, addr: u32, _value: u32) {
            self.widths.push(32);
            self.addrs.push(addr);
        }
    }

    #[test]
    fn test_io_register_map() {
        let map = RegisterMap::io(0x1F0, 0x3F0);
        assert_eq!(map.addr(Register::Data), 0x1F0);
        assert_eq!(map.addr(Register::STATUS), 0x1F7);
        assert_eq!(map.addr(Register::ALT_STATUS), 0x3F6);
        assert_eq!(map.decode(0x1F6), Some(Register::DeviceHead));
        assert_eq!(map.decode(0x3F7), Some(Register::DriveAddress));

        let mem = RegisterMap::memory();
        assert_eq!(mem.addr(Register::ALT_STATUS), 0x0E);
        assert_eq!(mem.decode(0x0402), Some(Register::Data));
    }

    #[test]
    fn test_32bit_falls_back_on_odd_words() {
        let mut bus = Bus::new(WidthRecorder::new(), RegisterMap::io(0x1F0, 0x3F0));
        bus.set_transfer_width(TransferWidth::Bits32);

        let mut even = [0u8; 8];
        bus.read_block(&mut even, 0);
        assert_eq!(bus.io().widths, [32, 32]);

        bus.io_mut().widths.clear();
        let mut odd = [0u8; 6];
        bus.read_block(&mut odd, 0);
        assert_eq!(bus.io().widths, [16, 16, 16], "three words cannot move as dwords");
        assert_eq!(bus.trace().total(), 2);
    }

    #[test]
    fn test_little_endian_words() {
        let mut bus = Bus::new(WidthRecorder::new(), RegisterMap::io(0x170, 0x370));
        let mut buf = [0u8; 4];
        bus.read_block(&mut buf, 0);
        assert_eq!(buf, [1, 0, 2, 0]);
        assert!(bus.io().addrs.iter().all(|&a| a == 0x170));
    }

    #[test]
    fn test_burst_addressing_wraps() {
        let mut bus = Bus::new(WidthRecorder::new(), RegisterMap::memory());
        bus.set_memory_option(MemoryDataOption::OptB);
        let mut buf = [0u8; 4];
        bus.read_block(&mut buf, 0);
        assert_eq!(bus.io().addrs, [0x400, 0x402]);

        assert_eq!(next_burst(0x7FE, 2), 0x400);
        assert_eq!(next_burst(0x7FF, 1), 0x400);
    }

    #[test]
    fn test_random_option_from_tick() {
        assert_eq!(resolve_memory_option(MemoryDataOption::OptR, 3).0, MemoryDataOption::Opt0);
        assert_eq!(resolve_memory_option(MemoryDataOption::OptR, 4).0, MemoryDataOption::Opt8);
        let (opt, start) = resolve_memory_option(MemoryDataOption::OptR, 0x125);
        assert_eq!(opt, MemoryDataOption::OptB);
        assert_eq!(start, 0x400 | 0x124);
    }
}
