//! Legacy ISA DMA, second 8237 controller.

use crate::consts::*;
use crate::error::ConfigError;
use crate::io::{Bus, RegisterIo};
use crate::types::DataDirection;

use super::plan::SubTransfer;

/// Highest physical address the 20-bit ISA engine can reach
pub const ISA_DMA_LIMIT: u32 = 0x10_0000;

/// Port layout of one 16-bit channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsaChannel {
    channel: u8,
    page_reg: u16,
    addr_reg: u16,
    count_reg: u16,
    select: u8,
    tc_bit: u8,
}

impl IsaChannel {
    pub fn new(channel: u8) -> Result<Self, ConfigError> {
        let (page_reg, addr_reg, count_reg, select, tc_bit) = match channel {
            5 => (0x8B, 0xC4, 0xC6, 0x01, 0x02),
            6 => (0x89, 0xC8, 0xCA, 0x02, 0x04),
            7 => (0x8A, 0xCC, 0xCE, 0x03, 0x08),
            other => return Err(ConfigError::InvalidDmaChannel(other)),
        };
        Ok(Self { channel, page_reg, addr_reg, count_reg, select, tc_bit })
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Mode byte: demand transfer, direction, channel select
    pub fn mode(&self, direction: DataDirection) -> u8 {
        let dir = match direction {
            DataDirection::Out => ISA_MODE_MEMR,
            _ => ISA_MODE_MEMW,
        };
        ISA_MODE_DEMAND | dir | self.select
    }

    /// Program and enable the channel for one sub-transfer.
    pub fn program<B: RegisterIo>(&self, bus: &mut Bus<B>, part: &SubTransfer, direction: DataDirection) {
        let mode = self.mode(direction);
        bus.critical(|bus| {
            self.mask(bus);
            // Reading status resets the TC latches on some chipsets.
            bus.port_read8(ISA_DMA_STATUS);

            bus.port_write8(ISA_DMA_FLIPFLOP, 0);
            bus.port_write8(self.addr_reg, part.word_offset as u8);
            bus.port_write8(self.addr_reg, (part.word_offset >> 8) as u8);
            bus.port_write8(self.page_reg, part.page);

            let count = part.word_count.wrapping_sub(1);
            bus.port_write8(ISA_DMA_FLIPFLOP, 0);
            bus.port_write8(self.count_reg, count as u8);
            bus.port_write8(self.count_reg, (count >> 8) as u8);

            bus.port_write8(ISA_DMA_MODE, mode);
            bus.port_write8(ISA_DMA_MASK, self.select);
        });
    }

    pub fn disable<B: RegisterIo>(&self, bus: &mut Bus<B>) {
        self.mask(bus);
    }

    fn mask<B: RegisterIo>(&self, bus: &mut Bus<B>) {
        bus.port_write8(ISA_DMA_MASK, ISA_DMA_DISABLE | self.select);
    }

    /// Terminal count reached. Reading the status port clears the latch.
    pub fn terminal_count<B: RegisterIo>(&self, bus: &mut Bus<B>) -> bool {
        bus.port_read8(ISA_DMA_STATUS) & self.tc_bit != 0
    }

    /// Words still outstanding in the current sub-transfer
    pub fn residual_words<B: RegisterIo>(&self, bus: &mut Bus<B>) -> u32 {
        bus.port_write8(ISA_DMA_FLIPFLOP, 0);
        let lo = bus.port_read8(self.count_reg) as u32;
        let hi = bus.port_read8(self.count_reg) as u32;
        (((hi << 8) | lo) + 1) & 0xFFFF
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::{AccessKind, RegisterMap};
    use crate::sim::ScriptedIo;
    use alloc::vec::Vec;

    fn port_writes(bus: &Bus<ScriptedIo>) -> Vec<(u32, u32)> {
        bus.trace()
            .iter()
            .filter(|a| a.kind == AccessKind::Write8 && a.register.is_none())
            .map(|a| (a.addr, a.value))
            .collect()
    }

    #[test]
    fn test_channel_table() {
        assert!(IsaChannel::new(4).is_err());
        let ch = IsaChannel::new(6).unwrap();
        assert_eq!(ch.mode(DataDirection::In), 0x06);
        assert_eq!(ch.mode(DataDirection::Out), 0x0A);
    }

    #[test]
    fn test_program_sequence() {
        let mut bus = Bus::new(ScriptedIo::new(), RegisterMap::io(0x1F0, 0x3F0));
        let ch = IsaChannel::new(5).unwrap();
        let part = SubTransfer { page: 0x02, word_offset: 0x1234, word_count: 0x100 };
        ch.program(&mut bus, &part, DataDirection::In);

        assert_eq!(
            port_writes(&bus),
            [
                (0xD4, 0x05),
                (0xD8, 0x00),
                (0xC4, 0x34),
                (0xC4, 0x12),
                (0x8B, 0x02),
                (0xD8, 0x00),
                (0xC6, 0xFF),
                (0xC6, 0x00),
                (0xD6, 0x05),
                (0xD4, 0x01),
            ]
        );
    }

    #[test]
    fn test_residual_count() {
        let mut bus = Bus::new(ScriptedIo::new(), RegisterMap::io(0x1F0, 0x3F0));
        bus.io_mut().script(0xCA, &[0x0F, 0x00]);
        let ch = IsaChannel::new(6).unwrap();
        assert_eq!(ch.residual_words(&mut bus), 0x10);

        bus.io_mut().script(0xCA, &[0xFF, 0xFF]);
        assert_eq!(ch.residual_words(&mut bus), 0, "counter wrapped: all words moved");
    }
}
