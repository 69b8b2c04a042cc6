//! The controller session
//!
//! A [`Controller`] owns everything one command needs: the register bus, the
//! data buffer, the interrupt session, the DMA engines and the command
//! history. Every command goes through [`Controller::dispatch`]:
//!
//! 1. encode the descriptor into input registers
//! 2. select the device and wait for BSY and DRQ to clear
//! 3. load the registers (previous then current bytes for 48-bit)
//! 4. install the interrupt handler if interrupt mode is on
//! 5. write the command register and let BSY assert
//! 6. move data by PIO or hand the buffer to a DMA engine
//! 7. wait for completion by interrupt flag or by polling
//! 8. read the final status and the output registers
//! 9. remove the handler and append the outcome to the history
//!
//! Nothing here retries. A failure is recorded in the outcome as a numeric
//! [`ErrorCode`] and classified by [`CommandOutcome::error`].

mod dma;
mod pio;

use alloc::boxed::Box;
use alloc::sync::Arc;

use crate::buffer::DataBuffer;
use crate::command::{encode, CommandDescriptor, CommandOutcome};
use crate::config::AtaConfig;
use crate::consts::*;
use crate::dma::{BusMaster, DmaPlatform, IsaChannel};
use crate::error::{AtaError, AtaResult, ErrorCode};
use crate::history::CommandHistory;
use crate::io::{Bus, RegisterIo, RegisterMap};
use crate::irq::{InterruptManager, InterruptPlatform};
use crate::timer::{TickSource, Timeout};
use crate::types::{
    DataDirection, DeviceControl, DeviceSelect, InputRegisters, OutputRegisters, Register, Status,
    TransferProtocol,
};

pub struct Controller<B: RegisterIo> {
    bus: Bus<B>,
    buffer: DataBuffer,
    history: CommandHistory,
    interrupts: InterruptManager,
    clock: Arc<dyn TickSource>,
    config: AtaConfig,
    device: DeviceSelect,
    failures: u32,
    multiple_count: u16,
    dma_platform: Option<Box<dyn DmaPlatform>>,
    isa: Option<IsaChannel>,
    bus_master: Option<BusMaster>,
    /// Outcome of a PIO write left running, and whether it was 48-bit
    pending: Option<(CommandOutcome, bool)>,
    last: CommandOutcome,
}

impl<B: RegisterIo> Controller<B> {
    pub fn new(
        io: B,
        map: RegisterMap,
        clock: Arc<dyn TickSource>,
        config: AtaConfig,
    ) -> AtaResult<Self> {
        let isa = match config.isa_dma_channel {
            0 => None,
            channel => Some(IsaChannel::new(channel)?),
        };
        let mut bus = Bus::new(io, map);
        bus.set_transfer_width(config.transfer_width);
        bus.set_memory_option(config.memory_option);

        Ok(Self {
            bus,
            buffer: DataBuffer::new(),
            history: CommandHistory::new(),
            interrupts: InterruptManager::new(config.pic_offsets),
            clock,
            config,
            device: DeviceSelect::Device0,
            failures: 0,
            multiple_count: 1,
            dma_platform: None,
            isa,
            bus_master: None,
            pending: None,
            last: CommandOutcome::default(),
        })
    }

    pub fn bus(&self) -> &Bus<B> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut Bus<B> {
        &mut self.bus
    }

    pub fn buffer(&self) -> &DataBuffer {
        &self.buffer
    }

    pub fn buffer_mut(&mut self) -> &mut DataBuffer {
        &mut self.buffer
    }

    pub fn history(&self) -> &CommandHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut CommandHistory {
        &mut self.history
    }

    pub fn config(&self) -> &AtaConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut AtaConfig {
        &mut self.config
    }

    pub fn clock(&self) -> &Arc<dyn TickSource> {
        &self.clock
    }

    pub fn device(&self) -> DeviceSelect {
        self.device
    }

    /// Target of subsequent commands. Only change between dispatches.
    pub fn set_device(&mut self, device: DeviceSelect) {
        self.device = device;
    }

    pub fn set_register_map(&mut self, map: RegisterMap) {
        self.bus.set_map(map);
    }

    pub fn set_dma_platform(&mut self, platform: Box<dyn DmaPlatform>) {
        self.dma_platform = Some(platform);
    }

    pub fn set_interrupt_platform(&mut self, platform: Box<dyn InterruptPlatform>) {
        self.interrupts.set_platform(platform);
    }

    pub fn interrupts(&self) -> &InterruptManager {
        &self.interrupts
    }

    pub fn interrupts_mut(&mut self) -> &mut InterruptManager {
        &mut self.interrupts
    }

    /// Bus-master base for PCI DMA; `None` for legacy ISA DMA
    pub fn set_bus_master(&mut self, base: Option<u16>) {
        self.bus_master = base.map(BusMaster::new);
    }

    pub fn bus_master(&self) -> Option<BusMaster> {
        self.bus_master
    }

    /// 0 turns ISA DMA off
    pub fn set_isa_dma_channel(&mut self, channel: u8) -> AtaResult<()> {
        self.config = self.config.clone().with_isa_dma_channel(channel)?;
        self.isa = match channel {
            0 => None,
            ch => Some(IsaChannel::new(ch)?),
        };
        Ok(())
    }

    /// Enter interrupt mode on `irq` for the current register map.
    pub fn enable_interrupts(&mut self, irq: u8, shared: bool) -> AtaResult<()> {
        let bm_status = self.bus_master.map(|bm| bm.status_port()).unwrap_or(0);
        let ata_status = self.bus.map().addr(Register::STATUS);
        let ata_status = u16::try_from(ata_status).map_err(|_| AtaError::InvalidArgument)?;
        self.interrupts.enable(irq, bm_status, ata_status, shared)?;
        self.config.use_interrupts = true;
        Ok(())
    }

    /// Leave interrupt mode. Must be called before the controller is dropped
    /// when interrupts were enabled.
    pub fn disable_interrupts(&mut self) {
        self.interrupts.disable();
        self.config.use_interrupts = false;
    }

    /// Failures counted by the status checker and the error handler
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn last_outcome(&self) -> &CommandOutcome {
        &self.last
    }

    pub fn multiple_count(&self) -> u16 {
        self.multiple_count
    }

    /// Run one command to completion.
    pub fn dispatch(&mut self, cmd: &CommandDescriptor) -> CommandOutcome {
        let cmd = cmd.on_device(self.device);
        let input = encode(&cmd, self.interrupts_active());
        let mut outcome = CommandOutcome::begin(&cmd, input);
        self.pending = None;

        log::debug!(
            "dispatch 0x{:02X} {:?}/{:?} {:?}",
            cmd.opcode,
            cmd.protocol,
            cmd.direction,
            cmd.address
        );

        if !cmd.address.fits() {
            log::warn!("{:?} does not fit its addressing scheme", cmd.address);
            outcome.fail(ErrorCode::LBA_OUT_OF_RANGE);
        } else {
            match (cmd.protocol, cmd.direction) {
                (TransferProtocol::Pio, DataDirection::In) => self.exec_pio_in(&cmd, &mut outcome),
                (TransferProtocol::Pio, DataDirection::Out) => {
                    self.exec_pio_out(&cmd, &mut outcome)
                }
                (TransferProtocol::Dma, _) => self.exec_dma(&cmd, &mut outcome),
                _ => self.exec_non_data(&cmd, &mut outcome),
            }
        }

        if cmd.opcode == ATA_CMD_SET_MULTIPLE && outcome.is_ok() {
            self.multiple_count = (cmd.sector_count & 0xFF).max(1);
        }

        // A device that stopped answering is still mid-command.
        if outcome.timed_out {
            log::warn!("command 0x{:02X} timed out, resetting", cmd.opcode);
            let reset = self.soft_reset();
            outcome.record_reset(&reset);
        }

        if self.pending.is_none() {
            self.finish(outcome);
        }
        outcome
    }

    /// Dispatch and turn a failed outcome into an error
    pub fn execute(&mut self, cmd: &CommandDescriptor) -> AtaResult<CommandOutcome> {
        self.dispatch(cmd).into_result()
    }

    fn finish(&mut self, outcome: CommandOutcome) {
        if let Some(err) = outcome.error() {
            log::error!(
                "command 0x{:02X} failed: {} (status 0x{:02X} error 0x{:02X} code {})",
                outcome.opcode,
                err,
                outcome.status,
                outcome.error,
                outcome.code
            );
        }
        self.history.record(self.device, outcome);
        self.last = outcome;
    }

    /// True while a command left running by a non-polling PIO write is still
    /// busy. Once it is not, its final status is collected into
    /// [`Controller::last_outcome`] and the history.
    pub fn command_in_progress(&mut self) -> bool {
        let status = self.alt_status();
        if status.contains(Status::BSY) {
            return true;
        }
        if let Some((mut outcome, ext)) = self.pending.take() {
            let final_status = self.bus.read(Register::STATUS);
            let st = Status::from_bits_retain(final_status);
            if !outcome.has_failed() {
                if st.contains(Status::DRQ) {
                    outcome.fail(ErrorCode::DRQ_STUCK);
                } else if st.is_bad_completion() {
                    outcome.fail(ErrorCode::BAD_FINAL_STATUS);
                }
            }
            self.complete(ext, &mut outcome, final_status);
            self.finish(outcome);
        }
        false
    }

    /// Pulse SRST and wait for the devices to come out of reset.
    pub fn soft_reset(&mut self) -> AtaResult<()> {
        log::info!("software reset");
        let control = if self.interrupts_active() { 0 } else { ATA_DC_NIEN };
        self.bus.write(Register::DeviceControl, control | ATA_DC_SRST);
        self.ata_delay();
        self.bus.write(Register::DeviceControl, control);
        self.ata_delay();

        let mut timer = Timeout::arm(self.now());
        let result = self.wait_reset(&mut timer);
        self.bus.write(Register::DeviceHead, ATA_DH_OBSOLETE | self.device.bit());
        self.ata_delay();
        if let Err(e) = result {
            log::error!("software reset failed: {}", e);
        }
        result
    }

    fn wait_reset(&mut self, timer: &mut Timeout) -> AtaResult<()> {
        if self.alt_status().bits() == 0xFF {
            return Err(AtaError::ProtocolViolation { code: ErrorCode::RESET_NO_DEVICE });
        }
        if !self.poll_until(timer, |s| !s.contains(Status::BSY)) {
            return Err(AtaError::Timeout { code: ErrorCode::RESET_DEV0_BUSY });
        }

        self.bus.write(Register::DeviceHead, ATA_DH_OBSOLETE | ATA_DH_DEV1);
        self.ata_delay();
        if self.alt_status().bits() != 0xFF
            && !self.poll_until(timer, |s| !s.contains(Status::BSY))
        {
            return Err(AtaError::Timeout { code: ErrorCode::RESET_DEV1_BUSY });
        }
        Ok(())
    }

    /// Compare the last command's alternate status and error registers with
    /// the expected values, counting a failure on mismatch.
    pub fn check_status_and_error(&mut self, expected_status: u8, expected_error: u8) -> bool {
        let actual_status = self.last.output.alt_status;
        let actual_error = self.last.output.error;
        if actual_status == expected_status && actual_error == expected_error {
            return true;
        }
        self.failures += 1;
        log::warn!(
            "expected status/error {:02X}{:02X}h, got {:02X}{:02X}h (failures: {})",
            expected_status,
            expected_error,
            actual_status,
            actual_error,
            self.failures
        );
        false
    }

    /// Count a failure and reset the device to clear whatever state it is in.
    /// The reset result is also recorded on [`Controller::last_outcome`].
    pub fn handle_error(&mut self, error: &AtaError) -> AtaResult<()> {
        self.failures += 1;
        log::error!(
            "{} (status 0x{:02X} error 0x{:02X}, failures: {})",
            error,
            self.last.status,
            self.last.error,
            self.failures
        );
        let reset = self.soft_reset();
        self.last.record_reset(&reset);
        reset
    }

    // ---- steps shared by every protocol ----

    pub(crate) fn now(&self) -> u32 {
        self.clock.ticks()
    }

    fn timeout_secs(&self) -> u32 {
        self.config.command_timeout_secs
    }

    fn interrupts_active(&self) -> bool {
        self.config.use_interrupts && self.interrupts.is_enabled()
    }

    fn alt_status(&mut self) -> Status {
        Status::from_bits_retain(self.bus.read(Register::ALT_STATUS))
    }

    /// Give the device time to raise BSY
    fn ata_delay(&mut self) {
        for _ in 0..4 {
            self.bus.read(Register::ALT_STATUS);
        }
    }

    fn poll_until(&mut self, timer: &mut Timeout, done: fn(Status) -> bool) -> bool {
        let secs = self.timeout_secs();
        loop {
            if done(self.alt_status()) {
                return true;
            }
            if timer.expired(self.now(), secs) {
                return false;
            }
        }
    }

    /// Wait for the interrupt flag in interrupt mode, otherwise poll the
    /// alternate status for `done`. Records `code` on timeout.
    fn wait_for(
        &mut self,
        timer: &mut Timeout,
        outcome: &mut CommandOutcome,
        code: ErrorCode,
        done: fn(Status) -> bool,
    ) -> bool {
        let secs = self.timeout_secs();
        let state = self.interrupts.state();
        let use_irq = self.interrupts_active();
        loop {
            let finished = if use_irq { state.fired() } else { done(self.alt_status()) };
            if finished {
                return true;
            }
            if timer.expired(self.now(), secs) {
                outcome.fail_timeout(code);
                return false;
            }
        }
    }

    fn select(&mut self, regs: &InputRegisters, timer: &mut Timeout, outcome: &mut CommandOutcome) -> bool {
        self.bus.write(Register::DeviceHead, regs.device_head);
        self.ata_delay();
        if self.poll_until(timer, |s| !s.intersects(Status::BSY | Status::DRQ)) {
            true
        } else {
            outcome.fail_timeout(ErrorCode::SELECT_TIMEOUT);
            false
        }
    }

    fn setup_registers(&mut self, regs: &InputRegisters, ext: bool) {
        self.bus.write(Register::DeviceControl, regs.device_control);
        let pairs = [
            (Register::Features, regs.features),
            (Register::SectorCount, regs.sector_count),
            (Register::SectorNumber, regs.lba_low),
            (Register::CylinderLow, regs.lba_mid),
            (Register::CylinderHigh, regs.lba_high),
        ];
        for (reg, value) in pairs {
            if ext {
                self.bus.write(reg, (value >> 8) as u8);
            }
            self.bus.write(reg, value as u8);
        }
        self.bus.write(Register::DeviceHead, regs.device_head);
    }

    fn issue(&mut self, opcode: u8) {
        self.bus.write(Register::Command, opcode);
        self.ata_delay();
    }

    fn arm_interrupt(&mut self) {
        if self.interrupts_active() {
            self.interrupts.install_handler();
            self.interrupts.state().reset_flag();
        }
    }

    fn rearm_interrupt(&mut self) {
        if self.interrupts_active() {
            self.interrupts.state().reset_flag();
        }
    }

    /// Status after completion: captured by the handler in interrupt mode,
    /// read fresh when polling or after an error.
    fn final_status(&mut self, outcome: &CommandOutcome) -> u8 {
        if self.interrupts_active() && !outcome.has_failed() {
            self.interrupts.state().captured_status()
        } else {
            self.bus.read(Register::STATUS)
        }
    }

    fn read_outputs(&mut self, ext: bool, status: u8, control: u8) -> OutputRegisters {
        let mut out = OutputRegisters {
            error: self.bus.read(Register::ERROR),
            sector_count: self.bus.read(Register::SectorCount) as u16,
            lba_low: self.bus.read(Register::SectorNumber) as u16,
            lba_mid: self.bus.read(Register::CylinderLow) as u16,
            lba_high: self.bus.read(Register::CylinderHigh) as u16,
            device_head: self.bus.read(Register::DeviceHead),
            status,
            alt_status: 0,
        };
        if ext {
            self.bus.write(Register::DeviceControl, control | DeviceControl::HOB.bits());
            out.sector_count |= (self.bus.read(Register::SectorCount) as u16) << 8;
            out.lba_low |= (self.bus.read(Register::SectorNumber) as u16) << 8;
            out.lba_mid |= (self.bus.read(Register::CylinderLow) as u16) << 8;
            out.lba_high |= (self.bus.read(Register::CylinderHigh) as u16) << 8;
            self.bus.write(Register::DeviceControl, control);
        }
        out.alt_status = self.bus.read(Register::ALT_STATUS);
        out
    }

    /// Collect output registers and close the interrupt window
    fn complete(&mut self, ext: bool, outcome: &mut CommandOutcome, status: u8) {
        let output = self.read_outputs(ext, status, outcome.input.device_control);
        outcome.status = status;
        outcome.error = output.error;
        outcome.output = output;
        if self.interrupts_active() {
            outcome.interrupts = self.interrupts.state().count();
            self.interrupts.remove_handler();
        }
    }

    fn exec_non_data(&mut self, cmd: &CommandDescriptor, outcome: &mut CommandOutcome) {
        let input = outcome.input;
        let mut timer = Timeout::arm(self.now());
        if !self.select(&input, &mut timer, outcome) {
            let status = self.bus.read(Register::STATUS);
            self.complete(cmd.is_ext(), outcome, status);
            return;
        }
        self.setup_registers(&input, cmd.is_ext());
        self.arm_interrupt();
        self.issue(cmd.opcode);

        self.wait_for(&mut timer, outcome, ErrorCode::COMPLETION_TIMEOUT, Status::is_done);
        let status = self.final_status(outcome);
        if !outcome.has_failed() && Status::from_bits_retain(status).is_bad_completion() {
            outcome.fail(ErrorCode::BAD_STATUS);
        }
        self.complete(cmd.is_ext(), outcome, status);
    }
}

#[cfg(test)]
mod tests;
