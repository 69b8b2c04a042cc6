//! Register-level vocabulary shared by every layer of the driver.

use bitflags::bitflags;
use serde::Serialize;

use crate::consts::*;

bitflags! {
    /// Status / alternate status register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        const BSY = ATA_SR_BSY;
        const DRDY = ATA_SR_DRDY;
        const DF = ATA_SR_DF;
        const DSC = ATA_SR_DSC;
        const DRQ = ATA_SR_DRQ;
        const CORR = ATA_SR_CORR;
        const IDX = ATA_SR_IDX;
        const ERR = ATA_SR_ERR;
    }
}

impl Status {
    /// Any of the bits that make a final status bad.
    pub fn is_bad_completion(self) -> bool {
        self.intersects(Status::BSY | Status::DF | Status::DRQ | Status::ERR)
    }

    /// Completion condition used when polling: not busy and no DRQ, or a
    /// fault or error reported with BSY clear.
    pub fn is_done(self) -> bool {
        let bits = self.bits();
        (bits & (ATA_SR_BSY | ATA_SR_DRQ)) == 0
            || (bits & (ATA_SR_BSY | ATA_SR_DF)) == ATA_SR_DF
            || (bits & (ATA_SR_BSY | ATA_SR_ERR)) == ATA_SR_ERR
    }
}

bitflags! {
    /// Error register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ErrorBits: u8 {
        const ICRC = ATA_ER_ICRC;
        const UNC = ATA_ER_UNC;
        const MC = ATA_ER_MC;
        const IDNF = ATA_ER_IDNF;
        const MCR = ATA_ER_MCR;
        const ABRT = ATA_ER_ABRT;
        const TK0NF = ATA_ER_TK0NF;
        const AMNF = ATA_ER_AMNF;
    }
}

bitflags! {
    /// Device control register
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeviceControl: u8 {
        const HOB = ATA_DC_HOB;
        const SRST = ATA_DC_SRST;
        const NIEN = ATA_DC_NIEN;
    }
}

/// The ten registers of an ATA channel.
///
/// Several registers share an address and differ only by direction, so the
/// read-side and write-side names map to the same slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Register {
    Data,
    Features,
    SectorCount,
    SectorNumber,
    CylinderLow,
    CylinderHigh,
    DeviceHead,
    Command,
    DeviceControl,
    DriveAddress,
}

impl Register {
    pub const ERROR: Register = Register::Features;
    pub const STATUS: Register = Register::Command;
    pub const ALT_STATUS: Register = Register::DeviceControl;

    /// Index into a register map; 0-7 are command block, 8-9 control block.
    pub const fn index(self) -> usize {
        match self {
            Register::Data => 0,
            Register::Features => 1,
            Register::SectorCount => 2,
            Register::SectorNumber => 3,
            Register::CylinderLow => 4,
            Register::CylinderHigh => 5,
            Register::DeviceHead => 6,
            Register::Command => 7,
            Register::DeviceControl => 8,
            Register::DriveAddress => 9,
        }
    }
}

/// Device 0 (master) or device 1 (slave) on a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DeviceSelect {
    #[default]
    Device0,
    Device1,
}

impl DeviceSelect {
    pub const fn bit(self) -> u8 {
        match self {
            DeviceSelect::Device0 => 0,
            DeviceSelect::Device1 => ATA_DH_DEV1,
        }
    }

    pub const fn index(self) -> usize {
        match self {
            DeviceSelect::Device0 => 0,
            DeviceSelect::Device1 => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AddressMode {
    Chs,
    Lba28,
    Lba48,
}

/// Command address in one of the three addressing schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Address {
    Chs { cylinder: u16, head: u8, sector: u8 },
    Lba28(u32),
    Lba48(u64),
}

impl Address {
    pub const fn mode(&self) -> AddressMode {
        match self {
            Address::Chs { .. } => AddressMode::Chs,
            Address::Lba28(_) => AddressMode::Lba28,
            Address::Lba48(_) => AddressMode::Lba48,
        }
    }

    /// False when the LBA has bits above what its scheme can carry
    pub const fn fits(&self) -> bool {
        match *self {
            Address::Chs { .. } => true,
            Address::Lba28(lba) => lba <= LBA28_MAX as u32,
            Address::Lba48(lba) => lba <= LBA48_MAX,
        }
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::Lba28(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum DataDirection {
    #[default]
    None,
    In,
    Out,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum TransferProtocol {
    #[default]
    NonData,
    Pio,
    Dma,
}

/// Values written to the command block before the command byte.
///
/// 16-bit fields carry the current value in the low byte and the previous
/// (high order) value in the high byte; only 48-bit commands write the
/// high bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct InputRegisters {
    pub features: u16,
    pub sector_count: u16,
    pub lba_low: u16,
    pub lba_mid: u16,
    pub lba_high: u16,
    pub device_head: u8,
    pub device_control: u8,
    pub command: u8,
}

/// Values read back after a command completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct OutputRegisters {
    pub error: u8,
    pub sector_count: u16,
    pub lba_low: u16,
    pub lba_mid: u16,
    pub lba_high: u16,
    pub device_head: u8,
    pub status: u8,
    pub alt_status: u8,
}

impl OutputRegisters {
    pub fn status(&self) -> Status {
        Status::from_bits_retain(self.status)
    }

    pub fn error_bits(&self) -> ErrorBits {
        ErrorBits::from_bits_retain(self.error)
    }

    /// 28-bit address from the LBA registers and the device/head nibble.
    pub fn lba28(&self) -> u32 {
        ((self.device_head as u32 & 0x0F) << 24)
            | ((self.lba_high as u32 & 0xFF) << 16)
            | ((self.lba_mid as u32 & 0xFF) << 8)
            | (self.lba_low as u32 & 0xFF)
    }

    /// 48-bit address from current and previous LBA register values.
    pub fn lba48(&self) -> u64 {
        let hi = ((self.lba_high as u64 >> 8) << 40)
            | ((self.lba_mid as u64 >> 8) << 32)
            | ((self.lba_low as u64 >> 8) << 24);
        let lo = ((self.lba_high as u64 & 0xFF) << 16)
            | ((self.lba_mid as u64 & 0xFF) << 8)
            | (self.lba_low as u64 & 0xFF);
        hi | lo
    }
}
