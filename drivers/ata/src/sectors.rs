//! Sector, log and transfer-mode commands

use crate::command::{CommandDescriptor, CommandOutcome};
use crate::consts::*;
use crate::controller::Controller;
use crate::error::{AtaError, AtaResult};
use crate::io::RegisterIo;
use crate::types::Address;

const LBA28_LIMIT: u64 = 0x1000_0000;
const MAX_UDMA_MODE: u8 = 6;

/// A zero count asks for one sector, not the protocol maximum.
fn at_least_one(count: u16) -> u16 {
    count.max(1)
}

fn fits_lba28(lba: u64, count: u16) -> bool {
    lba + at_least_one(count) as u64 <= LBA28_LIMIT
}

impl<B: RegisterIo> Controller<B> {
    /// READ SECTORS into the data buffer. The opcode follows the address:
    /// 48-bit addresses use the EXT form.
    pub fn read_sectors(&mut self, address: Address, count: u16) -> AtaResult<CommandOutcome> {
        self.execute(&CommandDescriptor::read_sectors(address, at_least_one(count)))
    }

    /// WRITE SECTORS from the data buffer
    pub fn write_sectors(&mut self, address: Address, count: u16) -> AtaResult<CommandOutcome> {
        self.execute(&CommandDescriptor::write_sectors(address, at_least_one(count)))
    }

    /// READ VERIFY SECTORS: the drive reads the media without moving data
    pub fn read_verify(&mut self, address: Address, count: u16) -> AtaResult<CommandOutcome> {
        let opcode = match address {
            Address::Lba48(_) => ATA_CMD_READ_VERIFY_EXT,
            _ => ATA_CMD_READ_VERIFY,
        };
        let cmd = CommandDescriptor::new(opcode)
            .with_address(address)
            .with_sector_count(at_least_one(count));
        self.execute(&cmd)
    }

    /// READ DMA EXT, falling back to READ DMA when the EXT form fails and
    /// the range is 28-bit addressable.
    pub fn read_dma(&mut self, lba: u64, count: u16) -> AtaResult<CommandOutcome> {
        self.dma_with_fallback(lba, at_least_one(count), CommandDescriptor::read_dma)
    }

    pub fn write_dma(&mut self, lba: u64, count: u16) -> AtaResult<CommandOutcome> {
        self.dma_with_fallback(lba, at_least_one(count), CommandDescriptor::write_dma)
    }

    fn dma_with_fallback(
        &mut self,
        lba: u64,
        count: u16,
        build: fn(u64, u16, bool) -> CommandDescriptor,
    ) -> AtaResult<CommandOutcome> {
        let err = match self.execute(&build(lba, count, true)) {
            Ok(outcome) => return Ok(outcome),
            Err(e) => e,
        };
        if !fits_lba28(lba, count) || matches!(err, AtaError::Timeout { .. }) {
            return Err(err);
        }
        log::warn!("EXT DMA at LBA {} failed ({}), retrying 28-bit", lba, err);
        self.execute(&build(lba, count, false))
    }

    /// READ LOG EXT of `sectors` pages starting at `page`
    pub fn read_log_ext(&mut self, log: u8, page: u16, sectors: u16) -> AtaResult<CommandOutcome> {
        self.execute(&CommandDescriptor::read_log_ext(log, page, at_least_one(sectors)))
    }

    pub fn write_log_ext(&mut self, log: u8, page: u16, sectors: u16) -> AtaResult<CommandOutcome> {
        self.execute(&CommandDescriptor::write_log_ext(log, page, at_least_one(sectors)))
    }

    pub fn flush_cache(&mut self, ext: bool) -> AtaResult<()> {
        self.execute(&CommandDescriptor::flush_cache(ext))?;
        Ok(())
    }

    /// SET MULTIPLE MODE. READ/WRITE MULTIPLE then move `count` sectors per
    /// DRQ block.
    pub fn set_multiple_mode(&mut self, count: u8) -> AtaResult<()> {
        if count == 0 || !count.is_power_of_two() {
            return Err(AtaError::InvalidArgument);
        }
        let cmd = CommandDescriptor::new(ATA_CMD_SET_MULTIPLE).with_sector_count(count as u16);
        self.execute(&cmd)?;
        log::info!("multiple mode set to {} sectors", count);
        Ok(())
    }

    /// SET FEATURES transfer mode with Ultra DMA `mode`
    pub fn set_udma_mode(&mut self, mode: u8) -> AtaResult<()> {
        if mode > MAX_UDMA_MODE {
            return Err(AtaError::InvalidArgument);
        }
        let cmd = CommandDescriptor::set_features(SETF_TRANSFER_MODE, SETF_UDMA_MODE_BASE | mode);
        self.execute(&cmd)?;
        log::info!("UDMA mode {} selected", mode);
        Ok(())
    }

    /// Select the fastest Ultra DMA mode Identify word 88 advertises
    pub fn set_highest_udma_mode(&mut self) -> AtaResult<u8> {
        let mode = self.identify()?.highest_udma_mode().ok_or(AtaError::Unsupported)?;
        self.set_udma_mode(mode)?;
        Ok(mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sim_controller, SimDevice, SimDmaPlatform};

    #[test]
    fn test_zero_count_reads_one_sector() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        let outcome = ctl.read_sectors(Address::Lba28(3), 0).unwrap();
        assert_eq!(outcome.total_bytes, SECTOR_SIZE as u32);
        assert_eq!(outcome.input.sector_count, 1);
        assert_eq!(&ctl.buffer()[..4], &[3, 4, 5, 6]);
    }

    #[test]
    fn test_addressing_modes() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        ctl.read_sectors(Address::Lba48(0x1_0000), 2).unwrap();
        assert_eq!(ctl.last_outcome().opcode, ATA_CMD_READ_SECTORS_EXT);
        assert_eq!(ctl.buffer()[0], 0);
        assert_eq!(ctl.buffer()[SECTOR_SIZE], 1);

        // C/H/S 0/1/1 is LBA 63 on the sim's 16-head, 63-sector geometry
        ctl.read_sectors(Address::Chs { cylinder: 0, head: 1, sector: 1 }, 1).unwrap();
        assert_eq!(ctl.last_outcome().opcode, ATA_CMD_READ_SECTORS);
        assert_eq!(ctl.buffer()[0], 63);
    }

    #[test]
    fn test_write_then_read_back() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        ctl.buffer_mut()[..SECTOR_SIZE * 2].fill(0xA5);
        ctl.write_sectors(Address::Lba28(100), 2).unwrap();
        assert_eq!(ctl.bus().io().sector(101), [0xA5; SECTOR_SIZE]);

        ctl.buffer_mut().fill(0);
        ctl.read_sectors(Address::Lba28(100), 2).unwrap();
        assert!(ctl.buffer()[..SECTOR_SIZE * 2].iter().all(|&b| b == 0xA5));
    }

    #[test]
    fn test_read_verify_is_non_data() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock).with_capacity(1000));
        let outcome = ctl.read_verify(Address::Lba28(10), 8).unwrap();
        assert_eq!(outcome.total_bytes, 0);
        assert!(matches!(
            ctl.read_verify(Address::Lba28(2000), 1),
            Err(AtaError::DeviceError { .. })
        ));
    }

    fn bus_master_controller(build: impl FnOnce(SimDevice) -> SimDevice) -> Controller<SimDevice> {
        let platform = SimDmaPlatform::new(0x0010_0000);
        let memory = platform.memory();
        let (mut ctl, _) = sim_controller(|clock| {
            build(SimDevice::new(clock).with_bus_master(0xC000).with_dma_memory(memory))
        });
        ctl.set_bus_master(Some(0xC000));
        ctl.set_dma_platform(Box::new(platform));
        ctl
    }

    #[test]
    fn test_dma_falls_back_to_28_bit() {
        let mut ctl = bus_master_controller(|dev| dev.without_lba48());

        let outcome = ctl.read_dma(8, 4).unwrap();
        assert_eq!(outcome.opcode, ATA_CMD_READ_DMA);
        assert_eq!(outcome.total_bytes, 4 * SECTOR_SIZE as u32);
        assert_eq!(ctl.bus().io().commands(), [ATA_CMD_READ_DMA_EXT, ATA_CMD_READ_DMA]);
        for (n, lba) in (8..12u64).enumerate() {
            let sector = ctl.bus().io().sector(lba);
            assert_eq!(&ctl.buffer()[n * SECTOR_SIZE..(n + 1) * SECTOR_SIZE], &sector[..]);
        }
    }

    #[test]
    fn test_dma_ext_succeeds_first() {
        let mut ctl = bus_master_controller(|dev| dev);
        ctl.buffer_mut()[..SECTOR_SIZE].fill(0x6B);

        ctl.write_dma(8, 1).unwrap();
        assert_eq!(ctl.bus().io().commands(), [ATA_CMD_WRITE_DMA_EXT]);
        assert_eq!(ctl.bus().io().sector(8), [0x6B; SECTOR_SIZE]);
    }

    #[test]
    fn test_log_pages() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        ctl.buffer_mut()[..SECTOR_SIZE].fill(0x3C);
        ctl.write_log_ext(0x80, 2, 1).unwrap();

        ctl.buffer_mut().fill(0);
        ctl.read_log_ext(0x80, 2, 1).unwrap();
        assert!(ctl.buffer()[..SECTOR_SIZE].iter().all(|&b| b == 0x3C));
        ctl.read_log_ext(0x80, 3, 1).unwrap();
        assert!(ctl.buffer()[..SECTOR_SIZE].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_multiple_mode() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        assert_eq!(ctl.set_multiple_mode(3), Err(AtaError::InvalidArgument));
        ctl.set_multiple_mode(8).unwrap();
        assert_eq!(ctl.multiple_count(), 8);
    }

    #[test]
    fn test_highest_udma_mode() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        assert_eq!(ctl.set_highest_udma_mode().unwrap(), 5);
        assert_eq!(ctl.bus().io().udma_selected(), Some(5));
        assert_eq!(ctl.identify().unwrap().udma_selected(), Some(5));
        assert_eq!(ctl.set_udma_mode(7), Err(AtaError::InvalidArgument));
        assert!(ctl.set_udma_mode(6).is_err(), "mode 6 not supported by the drive");
        ctl.flush_cache(true).unwrap();
    }
}
