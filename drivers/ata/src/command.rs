//! ATA command representation
//!
//! A [`CommandDescriptor`] is the one unit of work the controller accepts.
//! [`protocol_for`] decides from the opcode (and, for SMART and DCO, the
//! feature code) how the command moves data. [`encode`] turns a descriptor
//! into the register values written before the command byte, and
//! [`decode_address`] reads an address back out of them.

use serde::Serialize;

use crate::consts::*;
use crate::error::{AtaError, AtaResult, ErrorCode};
use crate::types::{
    Address, AddressMode, DataDirection, DeviceSelect, InputRegisters, OutputRegisters,
    TransferProtocol,
};

/// How an opcode moves data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub protocol: TransferProtocol,
    pub direction: DataDirection,
    /// Data commands that always move exactly this many sectors
    pub fixed_sectors: Option<u32>,
}

impl Classification {
    const fn non_data() -> Self {
        Self {
            protocol: TransferProtocol::NonData,
            direction: DataDirection::None,
            fixed_sectors: None,
        }
    }

    const fn pio(direction: DataDirection, fixed_sectors: Option<u32>) -> Self {
        Self { protocol: TransferProtocol::Pio, direction, fixed_sectors }
    }

    const fn dma(direction: DataDirection) -> Self {
        Self { protocol: TransferProtocol::Dma, direction, fixed_sectors: None }
    }
}

/// Classify `opcode`. Unknown opcodes are treated as non-data.
pub fn protocol_for(opcode: u8, features: u8) -> Classification {
    use DataDirection::{In, Out};

    match opcode {
        ATA_CMD_DCO => match features {
            DCO_IDENTIFY => Classification::pio(In, Some(1)),
            DCO_SET => Classification::pio(Out, Some(1)),
            _ => Classification::non_data(),
        },
        ATA_CMD_SMART => match features {
            SMART_READ_DATA | SMART_READ_THRESHOLDS => Classification::pio(In, Some(1)),
            SMART_READ_LOG => Classification::pio(In, None),
            SMART_WRITE_LOG => Classification::pio(Out, None),
            _ => Classification::non_data(),
        },

        ATA_CMD_IDENTIFY | ATA_CMD_READ_BUFFER => Classification::pio(In, Some(1)),
        ATA_CMD_READ_SECTORS
        | ATA_CMD_READ_MULTIPLE
        | ATA_CMD_READ_SECTORS_EXT
        | ATA_CMD_READ_MULTIPLE_EXT
        | ATA_CMD_READ_LOG_EXT => Classification::pio(In, None),

        ATA_CMD_WRITE_BUFFER => Classification::pio(Out, Some(1)),
        ATA_CMD_WRITE_SECTORS
        | ATA_CMD_WRITE_MULTIPLE
        | ATA_CMD_WRITE_VERIFY
        | ATA_CMD_WRITE_SECTORS_EXT
        | ATA_CMD_WRITE_MULTIPLE_EXT
        | ATA_CMD_WRITE_MULTIPLE_FUA_EXT
        | ATA_CMD_WRITE_LOG_EXT => Classification::pio(Out, None),

        // Security commands carry one 512-byte parameter block.
        ATA_CMD_SECURITY_SET_PASSWORD
        | ATA_CMD_SECURITY_UNLOCK
        | ATA_CMD_SECURITY_DISABLE
        | ATA_CMD_SECURITY_ERASE_UNIT => Classification::pio(Out, Some(1)),

        ATA_CMD_READ_DMA | ATA_CMD_READ_DMA_EXT => Classification::dma(In),
        ATA_CMD_WRITE_DMA | ATA_CMD_WRITE_DMA_EXT | ATA_CMD_WRITE_DMA_FUA_EXT => {
            Classification::dma(Out)
        }

        _ => Classification::non_data(),
    }
}

/// One command as submitted to [`crate::controller::Controller::dispatch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommandDescriptor {
    pub opcode: u8,
    /// Low byte current, high byte previous (48-bit only)
    pub features: u16,
    pub sector_count: u16,
    pub address: Address,
    pub device: DeviceSelect,
    pub direction: DataDirection,
    pub protocol: TransferProtocol,
}

impl CommandDescriptor {
    /// A command classified from its opcode, addressed at LBA 0
    pub fn new(opcode: u8) -> Self {
        let class = protocol_for(opcode, 0);
        Self {
            opcode,
            features: 0,
            sector_count: 0,
            address: Address::default(),
            device: DeviceSelect::Device0,
            direction: class.direction,
            protocol: class.protocol,
        }
    }

    /// Set the features register and reclassify for SMART and DCO
    pub fn with_features(mut self, features: u16) -> Self {
        self.features = features;
        let class = protocol_for(self.opcode, features as u8);
        self.direction = class.direction;
        self.protocol = class.protocol;
        self
    }

    pub fn with_sector_count(mut self, count: u16) -> Self {
        self.sector_count = count;
        self
    }

    pub fn with_address(mut self, address: Address) -> Self {
        self.address = address;
        self
    }

    pub fn on_device(mut self, device: DeviceSelect) -> Self {
        self.device = device;
        self
    }

    /// Override the classification; the pairing with the opcode is not checked
    pub fn with_protocol(mut self, protocol: TransferProtocol, direction: DataDirection) -> Self {
        self.protocol = protocol;
        self.direction = direction;
        self
    }

    /// IDENTIFY DEVICE
    pub fn identify() -> Self {
        Self::new(ATA_CMD_IDENTIFY)
    }

    /// READ SECTORS (EXT when addressed with a 48-bit LBA)
    pub fn read_sectors(address: Address, count: u16) -> Self {
        let opcode = match address.mode() {
            AddressMode::Lba48 => ATA_CMD_READ_SECTORS_EXT,
            _ => ATA_CMD_READ_SECTORS,
        };
        Self::new(opcode).with_address(address).with_sector_count(count)
    }

    /// WRITE SECTORS (EXT when addressed with a 48-bit LBA)
    pub fn write_sectors(address: Address, count: u16) -> Self {
        let opcode = match address.mode() {
            AddressMode::Lba48 => ATA_CMD_WRITE_SECTORS_EXT,
            _ => ATA_CMD_WRITE_SECTORS,
        };
        Self::new(opcode).with_address(address).with_sector_count(count)
    }

    pub fn read_dma(lba: u64, count: u16, ext: bool) -> Self {
        if ext {
            Self::new(ATA_CMD_READ_DMA_EXT)
                .with_address(Address::Lba48(lba))
                .with_sector_count(count)
        } else {
            Self::new(ATA_CMD_READ_DMA)
                .with_address(lba28(lba))
                .with_sector_count(count)
        }
    }

    pub fn write_dma(lba: u64, count: u16, ext: bool) -> Self {
        if ext {
            Self::new(ATA_CMD_WRITE_DMA_EXT)
                .with_address(Address::Lba48(lba))
                .with_sector_count(count)
        } else {
            Self::new(ATA_CMD_WRITE_DMA)
                .with_address(lba28(lba))
                .with_sector_count(count)
        }
    }

    pub fn read_native_max(ext: bool) -> Self {
        if ext {
            Self::new(ATA_CMD_READ_NATIVE_MAX_EXT).with_address(Address::Lba48(0))
        } else {
            Self::new(ATA_CMD_READ_NATIVE_MAX).with_address(Address::Lba28(0))
        }
    }

    /// SET MAX ADDRESS; sector count bit 0 selects a non-volatile setting
    pub fn set_max(lba: u64, ext: bool, non_volatile: bool) -> Self {
        let cmd = if ext {
            Self::new(ATA_CMD_SET_MAX_EXT).with_address(Address::Lba48(lba))
        } else {
            Self::new(ATA_CMD_SET_MAX).with_address(lba28(lba))
        };
        cmd.with_sector_count(non_volatile as u16)
    }

    pub fn dco(feature: u8) -> Self {
        Self::new(ATA_CMD_DCO).with_features(feature as u16)
    }

    /// SMART subcommand with the 0xC24F signature in the cylinder registers
    pub fn smart(feature: u8) -> Self {
        Self::new(ATA_CMD_SMART)
            .with_features(feature as u16)
            .with_address(Address::Lba28(SMART_LBA_SIGNATURE))
    }

    pub fn set_features(subcommand: u8, count: u8) -> Self {
        Self::new(ATA_CMD_SET_FEATURES)
            .with_features(subcommand as u16)
            .with_sector_count(count as u16)
    }

    pub fn read_log_ext(log_address: u8, page: u16, sectors: u16) -> Self {
        Self::new(ATA_CMD_READ_LOG_EXT)
            .with_address(Address::Lba48(log_address as u64 | ((page as u64) << 8)))
            .with_sector_count(sectors)
    }

    pub fn write_log_ext(log_address: u8, page: u16, sectors: u16) -> Self {
        Self::new(ATA_CMD_WRITE_LOG_EXT)
            .with_address(Address::Lba48(log_address as u64 | ((page as u64) << 8)))
            .with_sector_count(sectors)
    }

    pub fn flush_cache(ext: bool) -> Self {
        if ext {
            Self::new(ATA_CMD_CACHE_FLUSH_EXT).with_address(Address::Lba48(0))
        } else {
            Self::new(ATA_CMD_CACHE_FLUSH)
        }
    }

    pub fn is_ext(&self) -> bool {
        self.address.mode() == AddressMode::Lba48
    }

    /// Sectors of data this command moves; a zero count means the maximum
    /// the addressing scheme allows.
    pub fn transfer_sectors(&self) -> u32 {
        if self.protocol == TransferProtocol::NonData {
            return 0;
        }
        if let Some(fixed) = protocol_for(self.opcode, self.features as u8).fixed_sectors {
            return fixed;
        }
        if self.is_ext() {
            match self.sector_count {
                0 => 65536,
                n => n as u32,
            }
        } else {
            match self.sector_count & 0xFF {
                0 => 256,
                n => n as u32,
            }
        }
    }
}

/// A 28-bit address that keeps out-of-range LBAs out of range, so dispatch
/// rejects them instead of sending a wrapped address.
fn lba28(lba: u64) -> Address {
    Address::Lba28(u32::try_from(lba).unwrap_or(u32::MAX))
}

/// Register values for `cmd`.
///
/// `interrupts` leaves nIEN clear in the device control value.
pub fn encode(cmd: &CommandDescriptor, interrupts: bool) -> InputRegisters {
    let dev = ATA_DH_OBSOLETE | cmd.device.bit();
    let device_control = if interrupts { 0 } else { ATA_DC_NIEN };
    let mut regs = InputRegisters {
        command: cmd.opcode,
        device_control,
        ..Default::default()
    };

    match cmd.address {
        Address::Chs { cylinder, head, sector } => {
            regs.features = cmd.features & 0xFF;
            regs.sector_count = cmd.sector_count & 0xFF;
            regs.lba_low = sector as u16;
            regs.lba_mid = cylinder & 0xFF;
            regs.lba_high = cylinder >> 8;
            regs.device_head = dev | (head & 0x0F);
        }
        Address::Lba28(lba) => {
            regs.features = cmd.features & 0xFF;
            regs.sector_count = cmd.sector_count & 0xFF;
            regs.lba_low = (lba & 0xFF) as u16;
            regs.lba_mid = ((lba >> 8) & 0xFF) as u16;
            regs.lba_high = ((lba >> 16) & 0xFF) as u16;
            regs.device_head = dev | ATA_DH_LBA | ((lba >> 24) & 0x0F) as u8;
        }
        Address::Lba48(lba) => {
            let byte = |shift: u32| ((lba >> shift) & 0xFF) as u16;
            regs.features = cmd.features;
            regs.sector_count = cmd.sector_count;
            regs.lba_low = byte(0) | (byte(24) << 8);
            regs.lba_mid = byte(8) | (byte(32) << 8);
            regs.lba_high = byte(16) | (byte(40) << 8);
            regs.device_head = dev | ATA_DH_LBA;
        }
    }
    regs
}

/// Address held in `regs` under `mode`
pub fn decode_address(regs: &InputRegisters, mode: AddressMode) -> Address {
    let out = OutputRegisters {
        lba_low: regs.lba_low,
        lba_mid: regs.lba_mid,
        lba_high: regs.lba_high,
        device_head: regs.device_head,
        ..Default::default()
    };
    match mode {
        AddressMode::Chs => Address::Chs {
            cylinder: (regs.lba_mid & 0xFF) | ((regs.lba_high & 0xFF) << 8),
            head: regs.device_head & 0x0F,
            sector: regs.lba_low as u8,
        },
        AddressMode::Lba28 => Address::Lba28(out.lba28()),
        AddressMode::Lba48 => Address::Lba48(out.lba48()),
    }
}

/// Result of one dispatch. Immutable once returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CommandOutcome {
    pub opcode: u8,
    pub protocol: TransferProtocol,
    pub direction: DataDirection,
    /// Final status (or alternate status) register
    pub status: u8,
    pub error: u8,
    pub timed_out: bool,
    /// Bytes the command asked to move
    pub requested_bytes: u32,
    pub total_bytes: u32,
    pub input: InputRegisters,
    pub output: OutputRegisters,
    /// Low-level code; zero when the transport saw nothing wrong
    pub code: ErrorCode,
    /// Interrupts counted while the handler was installed
    pub interrupts: u32,
    /// A software reset followed the failure
    pub reset_issued: bool,
    /// Why that reset failed; zero when it succeeded
    pub reset_code: ErrorCode,
}

impl CommandOutcome {
    pub fn begin(cmd: &CommandDescriptor, input: InputRegisters) -> Self {
        Self {
            opcode: cmd.opcode,
            protocol: cmd.protocol,
            direction: cmd.direction,
            requested_bytes: cmd.transfer_sectors() * SECTOR_SIZE as u32,
            input,
            ..Default::default()
        }
    }

    /// Record a low-level failure; the first one wins
    pub fn fail(&mut self, code: ErrorCode) {
        if !self.code.is_error() {
            self.code = code;
        }
    }

    pub fn fail_timeout(&mut self, code: ErrorCode) {
        self.timed_out = true;
        self.fail(code);
    }

    pub fn has_failed(&self) -> bool {
        self.code.is_error()
    }

    /// Record the result of the reset issued after this command
    pub fn record_reset(&mut self, result: &AtaResult<()>) {
        self.reset_issued = true;
        self.reset_code = match result {
            Ok(()) => ErrorCode::NONE,
            Err(e) => e.code().unwrap_or(ErrorCode::RESET_NO_DEVICE),
        };
    }

    pub fn error(&self) -> Option<AtaError> {
        match self.code {
            ErrorCode::TRANSFER_TOO_LARGE => Some(AtaError::TransferSizeExceeded {
                requested: self.requested_bytes,
                limit: BUFFER_SIZE as u32,
            }),
            code => code.classify(self.status, self.error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error().is_none()
    }

    pub fn into_result(self) -> AtaResult<Self> {
        match self.error() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_round_trip_all_modes() {
        let cases = [
            Address::Chs { cylinder: 0x3FFF, head: 15, sector: 63 },
            Address::Chs { cylinder: 0, head: 0, sector: 1 },
            Address::Lba28(0x0FFF_FFFF),
            Address::Lba28(0x0123_4567),
            Address::Lba48(0xFFFF_FFFF_FFFF),
            Address::Lba48(0x0000_1234_5678),
        ];
        for addr in cases {
            let cmd = CommandDescriptor::new(ATA_CMD_SEEK)
                .with_address(addr)
                .on_device(DeviceSelect::Device1);
            let regs = encode(&cmd, false);
            assert_eq!(decode_address(&regs, addr.mode()), addr, "{:?}", addr);
            assert_eq!(regs.device_head & ATA_DH_DEV1, ATA_DH_DEV1);
        }
    }

    #[test]
    fn test_lba28_register_layout() {
        let cmd = CommandDescriptor::read_sectors(Address::Lba28(0x0A12_3456), 4);
        let regs = encode(&cmd, true);
        assert_eq!(regs.lba_low, 0x56);
        assert_eq!(regs.lba_mid, 0x34);
        assert_eq!(regs.lba_high, 0x12);
        assert_eq!(regs.device_head, 0xEA);
        assert_eq!(regs.device_control, 0);
        assert_eq!(regs.command, ATA_CMD_READ_SECTORS);
    }

    #[test]
    fn test_lba48_keeps_previous_bytes() {
        let cmd = CommandDescriptor::read_sectors(Address::Lba48(0xAABB_CCDD_EEFF), 0x0102);
        let regs = encode(&cmd, false);
        assert_eq!(cmd.opcode, ATA_CMD_READ_SECTORS_EXT);
        assert_eq!(regs.sector_count, 0x0102);
        assert_eq!(regs.lba_low, 0xCCFF);
        assert_eq!(regs.lba_mid, 0xBBEE);
        assert_eq!(regs.lba_high, 0xAADD);
        assert_eq!(regs.device_control, ATA_DC_NIEN);
    }

    #[test]
    fn test_classification() {
        assert_eq!(protocol_for(0xEC, 0).protocol, TransferProtocol::Pio);
        assert_eq!(protocol_for(0x25, 0), Classification::dma(DataDirection::In));
        assert_eq!(protocol_for(0x3D, 0).direction, DataDirection::Out);
        assert_eq!(protocol_for(0xB1, 0xC2).direction, DataDirection::In);
        assert_eq!(protocol_for(0xB1, 0xC3).direction, DataDirection::Out);
        assert_eq!(protocol_for(0xB1, 0xC0), Classification::non_data());
        assert_eq!(protocol_for(0xB0, 0xDA), Classification::non_data());
        assert_eq!(protocol_for(0xF3, 0), Classification::non_data());
        assert_eq!(protocol_for(0x7B, 0), Classification::non_data(), "vendor opcode");
    }

    #[test]
    fn test_erase_unit_is_its_own_data_out_case() {
        let class = protocol_for(ATA_CMD_SECURITY_ERASE_UNIT, 0);
        assert_eq!(class, Classification::pio(DataDirection::Out, Some(1)));
    }

    #[test]
    fn test_transfer_sectors() {
        assert_eq!(CommandDescriptor::identify().transfer_sectors(), 1);
        assert_eq!(
            CommandDescriptor::read_sectors(Address::Lba28(0), 0).transfer_sectors(),
            256
        );
        assert_eq!(
            CommandDescriptor::read_sectors(Address::Lba48(0), 0).transfer_sectors(),
            65536
        );
        assert_eq!(
            CommandDescriptor::read_sectors(Address::Lba28(0), 8).transfer_sectors(),
            8
        );
        assert_eq!(CommandDescriptor::new(ATA_CMD_SEEK).transfer_sectors(), 0);
    }

    #[test]
    fn test_too_large_reports_full_zero_count() {
        let cmd = CommandDescriptor::read_sectors(Address::Lba28(0), 0);
        let mut outcome = CommandOutcome::begin(&cmd, encode(&cmd, false));
        outcome.fail(ErrorCode::TRANSFER_TOO_LARGE);
        assert_eq!(
            outcome.error(),
            Some(AtaError::TransferSizeExceeded {
                requested: 256 * SECTOR_SIZE as u32,
                limit: BUFFER_SIZE as u32,
            })
        );
    }

    #[test]
    fn test_dma_builders_keep_wide_lba_out_of_range() {
        let cmd = CommandDescriptor::read_dma(0x1234_5678, 1, false);
        assert_eq!(cmd.address, Address::Lba28(0x1234_5678));
        assert!(!cmd.address.fits());
        let cmd = CommandDescriptor::write_dma(0x1_0000_0000, 1, false);
        assert_eq!(cmd.address, Address::Lba28(u32::MAX));
        assert!(!cmd.address.fits());
        assert!(!CommandDescriptor::set_max(LBA28_MAX + 1, false, false).address.fits());

        assert!(CommandDescriptor::read_dma(LBA28_MAX, 1, false).address.fits());
        assert!(CommandDescriptor::read_dma(LBA28_MAX + 1, 1, true).address.fits());
    }

    #[test]
    fn test_outcome_keeps_first_failure() {
        let mut outcome = CommandOutcome::default();
        outcome.fail(ErrorCode::DRQ_MISSING);
        outcome.fail_timeout(ErrorCode::COMPLETION_TIMEOUT);
        assert_eq!(outcome.code, ErrorCode::DRQ_MISSING);
        assert!(outcome.timed_out);
    }
}
