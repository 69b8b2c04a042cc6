//! Runtime configuration for a controller session.

use crate::consts::*;
use crate::error::ConfigError;

/// Width of each data register access during a DRQ block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferWidth {
    Bits8,
    #[default]
    Bits16,
    Bits32,
}

impl TryFrom<u8> for TransferWidth {
    type Error = ConfigError;

    fn try_from(bits: u8) -> Result<Self, Self::Error> {
        match bits {
            8 => Ok(TransferWidth::Bits8),
            16 => Ok(TransferWidth::Bits16),
            32 => Ok(TransferWidth::Bits32),
            other => Err(ConfigError::InvalidTransferWidth(other)),
        }
    }
}

/// How the data register is addressed in a memory-mapped (PCMCIA) window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MemoryDataOption {
    /// Data register at offset 0x0000
    #[default]
    Opt0,
    /// Data register at offset 0x0008
    Opt8,
    /// Burst window at 0x0400, address advanced on every access
    OptB,
    /// One of the above picked from the tick counter per transfer
    OptR,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtaConfig {
    pub command_timeout_secs: u32,
    pub scan_timeout_secs: u32,
    pub transfer_width: TransferWidth,
    pub memory_option: MemoryDataOption,
    pub use_interrupts: bool,
    /// When off, PIO data-out commands return right after the last block
    /// and completion is collected later with `command_in_progress`.
    pub poll_for_completion: bool,
    pub pic_offsets: (u8, u8),
    /// ISA DMA channel; 0 disables ISA DMA
    pub isa_dma_channel: u8,
    pub erase_hard_limit_secs: u32,
    pub erase_poll_interval_secs: u32,
    pub default_erase_minutes: u32,
}

impl Default for AtaConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: DEFAULT_COMMAND_TIMEOUT_SECS,
            scan_timeout_secs: SCAN_TIMEOUT_SECS,
            transfer_width: TransferWidth::Bits16,
            memory_option: MemoryDataOption::Opt0,
            use_interrupts: false,
            poll_for_completion: true,
            pic_offsets: (0x08, 0x70),
            isa_dma_channel: 0,
            erase_hard_limit_secs: ERASE_HARD_LIMIT_SECS,
            erase_poll_interval_secs: ERASE_POLL_INTERVAL_SECS,
            default_erase_minutes: DEFAULT_ERASE_MINUTES,
        }
    }
}

impl AtaConfig {
    pub fn with_timeout(mut self, secs: u32) -> Self {
        self.command_timeout_secs = secs;
        self
    }

    /// Timeout used while probing channels during a rescan
    pub fn with_scan_timeout(mut self, secs: u32) -> Self {
        self.scan_timeout_secs = secs;
        self
    }

    pub fn with_transfer_width(mut self, width: TransferWidth) -> Self {
        self.transfer_width = width;
        self
    }

    pub fn with_memory_option(mut self, option: MemoryDataOption) -> Self {
        self.memory_option = option;
        self
    }

    pub fn with_interrupts(mut self, enabled: bool) -> Self {
        self.use_interrupts = enabled;
        self
    }

    pub fn with_poll_for_completion(mut self, enabled: bool) -> Self {
        self.poll_for_completion = enabled;
        self
    }

    pub fn with_pic_offsets(mut self, master: u8, slave: u8) -> Self {
        self.pic_offsets = (master, slave);
        self
    }

    pub fn with_isa_dma_channel(mut self, channel: u8) -> Result<Self, ConfigError> {
        if !matches!(channel, 0 | 5 | 6 | 7) {
            return Err(ConfigError::InvalidDmaChannel(channel));
        }
        self.isa_dma_channel = channel;
        Ok(self)
    }

    pub fn with_erase_limits(mut self, hard_limit_secs: u32, poll_interval_secs: u32) -> Self {
        self.erase_hard_limit_secs = hard_limit_secs;
        self.erase_poll_interval_secs = poll_interval_secs;
        self
    }
}
