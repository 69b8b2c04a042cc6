use super::*;
use crate::dma::DmaEngine;
use crate::error::ConfigError;
use crate::sim::{sim_controller, sim_controller_with, IsaEvent, SimDevice, SimDmaPlatform};
use crate::types::Address;

#[test]
fn test_read_sector_pio() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    let outcome = ctl.execute(&CommandDescriptor::read_sectors(Address::Lba28(0), 1)).unwrap();

    assert_eq!(outcome.total_bytes, SECTOR_SIZE as u32);
    assert_eq!(outcome.code, ErrorCode::NONE);
    assert!(!outcome.timed_out);
    for (i, &b) in ctl.buffer()[..SECTOR_SIZE].iter().enumerate() {
        assert_eq!(b, i as u8);
    }
    assert_eq!(ctl.history().len(), 1);
    assert_eq!(ctl.last_outcome().opcode, ATA_CMD_READ_SECTORS);
}

#[test]
fn test_write_then_read_lba48() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    for (i, b) in ctl.buffer_mut()[..SECTOR_SIZE].iter_mut().enumerate() {
        *b = !(i as u8);
    }
    ctl.execute(&CommandDescriptor::write_sectors(Address::Lba48(0x1_2345), 1)).unwrap();
    assert_eq!(ctl.last_outcome().opcode, ATA_CMD_WRITE_SECTORS_EXT);

    ctl.execute(&CommandDescriptor::read_sectors(Address::Lba48(0x1_2345), 1)).unwrap();
    assert_eq!(ctl.buffer()[0], 0xFF);
    assert_eq!(ctl.buffer()[1], 0xFE);
}

#[test]
fn test_hung_command_times_out() {
    let (mut ctl, _) =
        sim_controller(|clock| SimDevice::new(clock).hang_on(ATA_CMD_CACHE_FLUSH));
    let err = ctl.execute(&CommandDescriptor::flush_cache(false)).unwrap_err();
    assert_eq!(err, AtaError::Timeout { code: ErrorCode::COMPLETION_TIMEOUT });
    assert!(err.needs_reset());
    assert!(ctl.last_outcome().timed_out);
    assert!(ctl.last_outcome().reset_issued);
    assert_eq!(ctl.last_outcome().reset_code, ErrorCode::NONE);
    assert_eq!(ctl.history().len(), 1);

    // The reset already cleared the hung command.
    assert!(ctl.execute(&CommandDescriptor::identify()).is_ok());
    assert!(!ctl.last_outcome().reset_issued);
}

#[test]
fn test_transfer_too_large_touches_nothing() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    let writes = ctl.bus().io().register_writes();

    // A zero count on a 28-bit read means 256 sectors.
    let outcome = ctl.dispatch(&CommandDescriptor::read_sectors(Address::Lba28(0), 0));
    assert_eq!(outcome.code, ErrorCode::TRANSFER_TOO_LARGE);
    assert!(matches!(outcome.error(), Some(AtaError::TransferSizeExceeded { .. })));
    assert_eq!(ctl.bus().io().register_writes(), writes);
    assert!(ctl.bus().io().commands().is_empty());
    assert_eq!(
        outcome.error(),
        Some(AtaError::TransferSizeExceeded {
            requested: 256 * SECTOR_SIZE as u32,
            limit: BUFFER_SIZE as u32,
        })
    );
}

#[test]
fn test_wide_lba28_rejected_before_the_bus() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    ctl.set_isa_dma_channel(5).unwrap();
    ctl.set_dma_platform(Box::new(SimDmaPlatform::new(0x0001_0000)));
    let writes = ctl.bus().io().register_writes();

    let outcome = ctl.dispatch(&CommandDescriptor::read_dma(0x1000_0000, 1, false));
    assert_eq!(outcome.code, ErrorCode::LBA_OUT_OF_RANGE);
    assert_eq!(outcome.error(), Some(AtaError::InvalidArgument));
    assert_eq!(ctl.bus().io().register_writes(), writes);
    assert!(ctl.bus().io().commands().is_empty());
    assert_eq!(ctl.history().len(), 1);
}

#[test]
fn test_device_error_reported() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock).with_capacity(100));
    let err = ctl.execute(&CommandDescriptor::read_sectors(Address::Lba28(200), 1)).unwrap_err();
    match err {
        AtaError::DeviceError { status, error } => {
            assert_ne!(status & ATA_SR_ERR, 0);
            assert_ne!(error & ATA_ER_IDNF, 0);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_interrupt_mode() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    ctl.enable_interrupts(14, false).unwrap();
    let state = ctl.interrupts().state();
    ctl.bus_mut().io_mut().attach_irq(state);

    let outcome = ctl.execute(&CommandDescriptor::flush_cache(false)).unwrap();
    assert_eq!(outcome.input.device_control, 0, "nIEN clear");
    assert!(outcome.interrupts >= 1);

    let outcome = ctl.execute(&CommandDescriptor::read_sectors(Address::Lba28(7), 2)).unwrap();
    assert_eq!(outcome.total_bytes, 2 * SECTOR_SIZE as u32);
    assert_eq!(ctl.buffer()[0], 7);
    assert_eq!(ctl.buffer()[SECTOR_SIZE], 8);

    assert_eq!(
        ctl.enable_interrupts(14, false),
        Err(AtaError::Configuration(ConfigError::InterruptsAlreadyEnabled))
    );
    ctl.disable_interrupts();
    assert!(!ctl.config().use_interrupts);
}

/// Controller on ISA channel `channel` with its buffer at `buffer_address`,
/// DMA data shared between the platform and the drive.
fn isa_controller(
    channel: u8,
    buffer_address: u32,
    build: impl FnOnce(SimDevice) -> SimDevice,
) -> Controller<SimDevice> {
    let platform = SimDmaPlatform::new(buffer_address);
    let memory = platform.memory();
    let (mut ctl, _) =
        sim_controller(|clock| build(SimDevice::new(clock).with_dma_memory(memory)));
    ctl.set_isa_dma_channel(channel).unwrap();
    ctl.set_dma_platform(Box::new(platform));
    ctl
}

fn isa_enables(events: &[IsaEvent]) -> Vec<(usize, IsaEvent)> {
    events
        .iter()
        .enumerate()
        .filter(|(_, e)| matches!(e, IsaEvent::Enabled { .. }))
        .map(|(i, e)| (i, *e))
        .collect()
}

#[test]
fn test_isa_dma() {
    let mut ctl = isa_controller(5, 0x0001_0000, |dev| dev);
    assert_eq!(ctl.dma_engine(), DmaEngine::Isa);

    let outcome = ctl.execute(&CommandDescriptor::read_dma(4, 2, false)).unwrap();
    assert_eq!(outcome.total_bytes, 2 * SECTOR_SIZE as u32);
    let (first, second) = (ctl.bus().io().sector(4), ctl.bus().io().sector(5));
    assert_eq!(&ctl.buffer()[..SECTOR_SIZE], &first[..]);
    assert_eq!(&ctl.buffer()[SECTOR_SIZE..2 * SECTOR_SIZE], &second[..]);
    assert_eq!(ctl.buffer()[1], 5);
}

#[test]
fn test_isa_dma_write_reaches_media() {
    let mut ctl = isa_controller(6, 0x0004_0000, |dev| dev);
    for (i, b) in ctl.buffer_mut()[..2 * SECTOR_SIZE].iter_mut().enumerate() {
        *b = (i * 3) as u8;
    }
    let outcome = ctl.execute(&CommandDescriptor::write_dma(30, 2, false)).unwrap();
    assert_eq!(outcome.total_bytes, 2 * SECTOR_SIZE as u32);

    let (first, second) = (ctl.bus().io().sector(30), ctl.bus().io().sector(31));
    assert_eq!(&first[..], &ctl.buffer()[..SECTOR_SIZE]);
    assert_eq!(&second[..], &ctl.buffer()[SECTOR_SIZE..2 * SECTOR_SIZE]);
}

#[test]
fn test_isa_dma_split_at_128k() {
    // One sector sits below the 128K boundary, one above it.
    let mut ctl = isa_controller(5, 0x0001_FE00, |dev| dev);
    let outcome = ctl.execute(&CommandDescriptor::read_dma(10, 2, false)).unwrap();
    assert_eq!(outcome.total_bytes, 2 * SECTOR_SIZE as u32);
    assert_eq!(ctl.buffer()[0], 10);
    assert_eq!(ctl.buffer()[SECTOR_SIZE], 11);

    let events = ctl.bus().io().isa_events();
    let enables = isa_enables(events);
    assert_eq!(enables.len(), 2);
    assert_eq!(
        enables[0].1,
        IsaEvent::Enabled { channel: 5, physical: 0x0001_FE00, words: 256 }
    );
    assert_eq!(
        enables[1].1,
        IsaEvent::Enabled { channel: 5, physical: 0x0002_0000, words: 256 }
    );
    // The second part is programmed only after TC for the first was seen.
    let first_tc = events.iter().position(|e| *e == IsaEvent::StatusRead(0x02)).unwrap();
    assert!(enables[0].0 < first_tc && first_tc < enables[1].0);
}

#[test]
fn test_isa_first_part_never_terminates() {
    let mut ctl = isa_controller(5, 0x0001_FE00, |dev| dev.stall_dma());
    let outcome = ctl.dispatch(&CommandDescriptor::read_dma(0, 2, false));
    assert_eq!(outcome.code, ErrorCode::ISA_FIRST_PART_TIMEOUT);
    assert!(outcome.timed_out);
    assert_eq!(outcome.total_bytes, 0);
    assert!(outcome.reset_issued);
    assert_eq!(isa_enables(ctl.bus().io().isa_events()).len(), 1);

    assert!(ctl.execute(&CommandDescriptor::identify()).is_ok());
}

#[test]
fn test_isa_residual_counts_partial_transfer() {
    let mut ctl = isa_controller(5, 0x0001_0000, |dev| dev.fail_dma_after(3 * SECTOR_SIZE));
    let outcome = ctl.dispatch(&CommandDescriptor::read_dma(0, 4, false));
    assert_eq!(outcome.code, ErrorCode::ISA_BAD_FINAL_STATUS);
    assert!(matches!(outcome.error(), Some(AtaError::DeviceError { .. })));

    let residual_words = 256;
    assert_eq!(outcome.requested_bytes, 4 * SECTOR_SIZE as u32);
    assert_eq!(outcome.total_bytes, outcome.requested_bytes - residual_words * 2);
    assert!(!outcome.reset_issued);
}

#[test]
fn test_isa_residual_in_second_part() {
    let mut ctl = isa_controller(5, 0x0001_FE00, |dev| dev.fail_dma_after(SECTOR_SIZE + 256));
    let outcome = ctl.dispatch(&CommandDescriptor::read_dma(20, 2, false));
    assert_eq!(outcome.code, ErrorCode::ISA_BAD_FINAL_STATUS);

    // First part complete, then 128 of 256 words before the abort.
    let residual_words = 128;
    assert_eq!(outcome.total_bytes, outcome.requested_bytes - residual_words * 2);
    assert_eq!(outcome.total_bytes, (SECTOR_SIZE + 256) as u32);
    assert_eq!(ctl.buffer()[SECTOR_SIZE], 21);
    assert_eq!(ctl.buffer()[SECTOR_SIZE + 256], 0);
}

#[test]
fn test_isa_dma_beyond_reach() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    ctl.set_isa_dma_channel(6).unwrap();
    ctl.set_dma_platform(Box::new(SimDmaPlatform::new(0x0020_0000)));
    let outcome = ctl.dispatch(&CommandDescriptor::read_dma(0, 1, false));
    assert_eq!(outcome.code, ErrorCode::DMA_ADDRESS_UNREACHABLE);
    assert_eq!(outcome.error(), Some(AtaError::NoDmaPlatform));
}

#[test]
fn test_dma_without_platform() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    ctl.set_isa_dma_channel(5).unwrap();
    let outcome = ctl.dispatch(&CommandDescriptor::read_dma(0, 1, false));
    assert_eq!(outcome.code, ErrorCode::NO_DMA_PLATFORM);
}

#[test]
fn test_bus_master_dma() {
    let platform = SimDmaPlatform::new(0x0030_0000);
    let loaded = platform.loaded();
    let memory = platform.memory();
    let (mut ctl, _) = sim_controller(|clock| {
        SimDevice::new(clock).with_bus_master(0xC000).with_dma_memory(memory)
    });
    ctl.set_bus_master(Some(0xC000));
    ctl.set_dma_platform(Box::new(platform));
    assert_eq!(ctl.dma_engine(), DmaEngine::BusMaster);

    for (i, b) in ctl.buffer_mut()[..4 * SECTOR_SIZE].iter_mut().enumerate() {
        *b = (i / 7) as u8;
    }
    let outcome = ctl.execute(&CommandDescriptor::write_dma(16, 4, true)).unwrap();
    assert_eq!(outcome.total_bytes, 4 * SECTOR_SIZE as u32);
    assert_eq!(ctl.bus().io().bm_prd(), 0x0009_F000);
    assert_eq!(loaded.lock().len(), 1);
    let last = ctl.bus().io().sector(19);
    assert_eq!(&last[..], &ctl.buffer()[3 * SECTOR_SIZE..4 * SECTOR_SIZE]);

    let written = ctl.buffer()[..4 * SECTOR_SIZE].to_vec();
    ctl.buffer_mut().fill(0xEE);
    ctl.execute(&CommandDescriptor::read_dma(16, 4, true)).unwrap();
    assert_eq!(&ctl.buffer()[..4 * SECTOR_SIZE], &written[..]);
}

#[test]
fn test_bus_master_stall_times_out() {
    let (mut ctl, _) =
        sim_controller(|clock| SimDevice::new(clock).with_bus_master(0xC000).stall_dma());
    ctl.set_bus_master(Some(0xC000));
    ctl.set_dma_platform(Box::new(SimDmaPlatform::new(0x0030_0000)));

    let outcome = ctl.dispatch(&CommandDescriptor::read_dma(0, 1, false));
    assert_eq!(outcome.code, ErrorCode::BM_TIMEOUT);
    assert!(outcome.reset_issued);
    assert_eq!(outcome.total_bytes, 0);
}

#[test]
fn test_no_bus_master_configured() {
    let (mut ctl, _) = sim_controller(|clock| {
        SimDevice::new(clock).with_map(RegisterMap::io(0x1E8, 0x3E8))
    });
    ctl.set_register_map(RegisterMap::io(0x1E8, 0x3E8));
    ctl.set_dma_platform(Box::new(SimDmaPlatform::new(0x0001_0000)));
    let outcome = ctl.dispatch(&CommandDescriptor::read_dma(0, 1, false));
    assert_eq!(outcome.code, ErrorCode::BM_NOT_CONFIGURED);
}

#[test]
fn test_status_checker_counts_failures() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    ctl.execute(&CommandDescriptor::identify()).unwrap();
    assert!(ctl.check_status_and_error(ATA_SR_DRDY | ATA_SR_DSC, 0));
    assert_eq!(ctl.failures(), 0);
    assert!(!ctl.check_status_and_error(ATA_SR_DRDY | ATA_SR_ERR, ATA_ER_ABRT));
    assert_eq!(ctl.failures(), 1);

    assert_eq!(ctl.handle_error(&AtaError::NoDevice), Ok(()));
    assert_eq!(ctl.failures(), 2);
    assert!(ctl.last_outcome().reset_issued);
    assert_eq!(ctl.last_outcome().reset_code, ErrorCode::NONE);
}

#[test]
fn test_handle_error_reports_failed_reset() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    ctl.execute(&CommandDescriptor::identify()).unwrap();
    ctl.bus_mut().io_mut().detach();

    let result = ctl.handle_error(&AtaError::NoDevice);
    assert_eq!(
        result,
        Err(AtaError::ProtocolViolation { code: ErrorCode::RESET_NO_DEVICE })
    );
    assert!(ctl.last_outcome().reset_issued);
    assert_eq!(ctl.last_outcome().reset_code, ErrorCode::RESET_NO_DEVICE);
}

#[test]
fn test_write_left_running() {
    let config = AtaConfig::default().with_poll_for_completion(false);
    let (mut ctl, _) = sim_controller_with(config, |clock| SimDevice::new(clock));
    ctl.buffer_mut()[..SECTOR_SIZE].fill(0x11);
    ctl.execute(&CommandDescriptor::write_sectors(Address::Lba28(9), 1)).unwrap();
    assert!(ctl.history().is_empty(), "not recorded until collected");

    let mut polls = 0;
    while ctl.command_in_progress() {
        polls += 1;
        assert!(polls < 100);
    }
    assert_eq!(ctl.last_outcome().opcode, ATA_CMD_WRITE_SECTORS);
    assert!(ctl.last_outcome().is_ok());
    assert_eq!(ctl.history().len(), 1);
    assert_eq!(ctl.bus().io().sector(9), [0x11; SECTOR_SIZE]);
}

#[test]
fn test_reset_leaves_signature() {
    let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
    ctl.soft_reset().unwrap();
    assert_eq!(ctl.bus_mut().read(Register::SectorCount), 1);
    assert_eq!(ctl.bus_mut().read(Register::SectorNumber), 1);
    assert_eq!(ctl.bus_mut().read(Register::CylinderLow), 0);
    assert_eq!(ctl.bus_mut().read(Register::CylinderHigh), 0);
}
