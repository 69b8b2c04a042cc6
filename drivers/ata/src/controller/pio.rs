//! PIO data-in and data-out

use crate::command::{CommandDescriptor, CommandOutcome};
use crate::consts::*;
use crate::error::ErrorCode;
use crate::io::RegisterIo;
use crate::timer::Timeout;
use crate::types::{Register, Status};

use super::Controller;

fn not_busy(status: Status) -> bool {
    !status.contains(Status::BSY)
}

fn data_ready(status: Status) -> bool {
    status.contains(Status::DRQ) && !status.contains(Status::BSY)
}

impl<B: RegisterIo> Controller<B> {
    /// Sectors moved per DRQ block for `opcode`
    pub(super) fn drq_block_sectors(&self, opcode: u8) -> u32 {
        match opcode {
            ATA_CMD_READ_MULTIPLE
            | ATA_CMD_WRITE_MULTIPLE
            | ATA_CMD_READ_MULTIPLE_EXT
            | ATA_CMD_WRITE_MULTIPLE_EXT
            | ATA_CMD_WRITE_MULTIPLE_FUA_EXT => self.multiple_count.max(1) as u32,
            _ => 1,
        }
    }

    /// Byte count for `cmd`, or `None` (with code 61 recorded) when it does
    /// not fit the buffer.
    pub(super) fn checked_transfer_bytes(
        &self,
        cmd: &CommandDescriptor,
        outcome: &mut CommandOutcome,
    ) -> Option<usize> {
        let bytes = cmd.transfer_sectors() as usize * SECTOR_SIZE;
        if bytes > self.buffer.capacity() {
            log::warn!(
                "transfer of {} bytes exceeds the {} byte buffer",
                bytes,
                self.buffer.capacity()
            );
            outcome.fail(ErrorCode::TRANSFER_TOO_LARGE);
            return None;
        }
        Some(bytes)
    }

    pub(super) fn exec_pio_in(&mut self, cmd: &CommandDescriptor, outcome: &mut CommandOutcome) {
        let Some(bytes) = self.checked_transfer_bytes(cmd, outcome) else {
            return;
        };
        let ext = cmd.is_ext();
        let input = outcome.input;
        self.buffer.fill(0);

        let mut timer = Timeout::arm(self.now());
        if !self.select(&input, &mut timer, outcome) {
            let status = self.bus.read(Register::STATUS);
            self.complete(ext, outcome, status);
            return;
        }
        self.setup_registers(&input, ext);
        self.arm_interrupt();
        self.issue(cmd.opcode);

        let block = self.drq_block_sectors(cmd.opcode) as usize * SECTOR_SIZE;
        let mut offset = 0;
        while offset < bytes {
            if !self.wait_for(&mut timer, outcome, ErrorCode::COMPLETION_TIMEOUT, not_busy) {
                break;
            }
            let status = Status::from_bits_retain(self.bus.read(Register::STATUS));
            if !data_ready(status) {
                outcome.fail(ErrorCode::DRQ_MISSING);
                break;
            }
            let chunk = block.min(bytes - offset);
            let tick = self.now();
            self.rearm_interrupt();
            self.bus.read_block(&mut self.buffer[offset..offset + chunk], tick);
            offset += chunk;
            outcome.total_bytes += chunk as u32;
        }

        // No interrupt follows the last data-in block.
        if !outcome.has_failed() && !self.poll_until(&mut timer, not_busy) {
            outcome.fail_timeout(ErrorCode::COMPLETION_TIMEOUT);
        }
        let status = self.bus.read(Register::STATUS);
        if !outcome.has_failed() {
            let st = Status::from_bits_retain(status);
            if st.contains(Status::DRQ) {
                outcome.fail(ErrorCode::DRQ_STUCK);
            } else if st.is_bad_completion() {
                outcome.fail(ErrorCode::BAD_FINAL_STATUS);
            }
        }
        self.complete(ext, outcome, status);
    }

    pub(super) fn exec_pio_out(&mut self, cmd: &CommandDescriptor, outcome: &mut CommandOutcome) {
        let Some(bytes) = self.checked_transfer_bytes(cmd, outcome) else {
            return;
        };
        let ext = cmd.is_ext();
        let input = outcome.input;

        let mut timer = Timeout::arm(self.now());
        if !self.select(&input, &mut timer, outcome) {
            let status = self.bus.read(Register::STATUS);
            self.complete(ext, outcome, status);
            return;
        }
        self.setup_registers(&input, ext);
        self.arm_interrupt();
        self.issue(cmd.opcode);

        let block = self.drq_block_sectors(cmd.opcode) as usize * SECTOR_SIZE;
        let mut offset = 0;
        while offset < bytes {
            // The first block is requested without an interrupt.
            let ready = if offset == 0 {
                if self.poll_until(&mut timer, not_busy) {
                    true
                } else {
                    outcome.fail_timeout(ErrorCode::COMPLETION_TIMEOUT);
                    false
                }
            } else {
                self.wait_for(&mut timer, outcome, ErrorCode::COMPLETION_TIMEOUT, not_busy)
            };
            if !ready {
                break;
            }
            let status = Status::from_bits_retain(self.bus.read(Register::STATUS));
            if !data_ready(status) {
                outcome.fail(ErrorCode::DRQ_MISSING);
                break;
            }
            let chunk = block.min(bytes - offset);
            let tick = self.now();
            self.rearm_interrupt();
            self.bus.write_block(&self.buffer[offset..offset + chunk], tick);
            offset += chunk;
            outcome.total_bytes += chunk as u32;
        }

        if !outcome.has_failed() && !self.config.poll_for_completion {
            log::debug!("0x{:02X} left running after {} bytes", cmd.opcode, offset);
            outcome.status = self.alt_status().bits();
            self.pending = Some((*outcome, ext));
            return;
        }

        if !outcome.has_failed() {
            self.wait_for(&mut timer, outcome, ErrorCode::COMPLETION_TIMEOUT, Status::is_done);
        }
        let status = self.final_status(outcome);
        if !outcome.has_failed() {
            let st = Status::from_bits_retain(status);
            if st.contains(Status::DRQ) {
                outcome.fail(ErrorCode::DRQ_STUCK);
            } else if st.is_bad_completion() {
                outcome.fail(ErrorCode::BAD_FINAL_STATUS);
            }
        }
        self.complete(ext, outcome, status);
    }
}
