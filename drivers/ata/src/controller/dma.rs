//! DMA command execution on the ISA or bus-master engine

use crate::command::{CommandDescriptor, CommandOutcome};
use crate::consts::*;
use crate::dma::isa::ISA_DMA_LIMIT;
use crate::dma::{DmaEngine, DmaTransferPlan, PrdTable};
use crate::error::ErrorCode;
use crate::io::RegisterIo;
use crate::timer::Timeout;
use crate::types::{DataDirection, Register, Status};

use super::Controller;

impl<B: RegisterIo> Controller<B> {
    /// ISA DMA is only reachable on the legacy channels without a bus master.
    pub fn dma_engine(&self) -> DmaEngine {
        let base = self.bus.map().command_base();
        let legacy = base == LEGACY_PRIMARY_BASE as u32 || base == LEGACY_SECONDARY_BASE as u32;
        if self.bus_master.is_none() && legacy {
            DmaEngine::Isa
        } else {
            DmaEngine::BusMaster
        }
    }

    pub(super) fn exec_dma(&mut self, cmd: &CommandDescriptor, outcome: &mut CommandOutcome) {
        match self.dma_engine() {
            DmaEngine::Isa => self.exec_isa_dma(cmd, outcome),
            DmaEngine::BusMaster => self.exec_bus_master(cmd, outcome),
        }
    }

    fn buffer_physical(&self, outcome: &mut CommandOutcome) -> Option<u32> {
        let Some(platform) = self.dma_platform.as_ref() else {
            outcome.fail(ErrorCode::NO_DMA_PLATFORM);
            return None;
        };
        let physical = platform.physical_address(&self.buffer);
        if physical.is_none() {
            outcome.fail(ErrorCode::DMA_ADDRESS_UNREACHABLE);
        }
        physical
    }

    fn sync_for_device(&mut self, direction: DataDirection, bytes: u32) {
        if direction != DataDirection::Out {
            return;
        }
        if let Some(platform) = self.dma_platform.as_mut() {
            platform.sync_for_device(&self.buffer, bytes as usize);
        }
    }

    fn sync_for_cpu(&mut self, direction: DataDirection, bytes: u32) {
        if direction != DataDirection::In {
            return;
        }
        if let Some(platform) = self.dma_platform.as_mut() {
            platform.sync_for_cpu(&mut self.buffer, bytes as usize);
        }
    }

    fn exec_isa_dma(&mut self, cmd: &CommandDescriptor, outcome: &mut CommandOutcome) {
        let Some(channel) = self.isa else {
            outcome.fail(ErrorCode::ISA_NO_CHANNEL);
            return;
        };
        let Some(bytes) = self.checked_transfer_bytes(cmd, outcome) else {
            return;
        };
        let Some(physical) = self.buffer_physical(outcome) else {
            return;
        };
        let bytes = bytes as u32;
        if physical.checked_add(bytes).map_or(true, |end| end > ISA_DMA_LIMIT) {
            log::warn!("buffer at 0x{:X} is beyond ISA DMA reach", physical);
            outcome.fail(ErrorCode::DMA_ADDRESS_UNREACHABLE);
            return;
        }
        if cmd.direction == DataDirection::In {
            self.buffer.fill(0);
        }
        self.sync_for_device(cmd.direction, bytes);

        let plan = DmaTransferPlan::new(physical, bytes);
        let parts = plan.parts();
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
        channel.program(&mut self.bus, &parts[0], cmd.direction);
        self.issue(cmd.opcode);

        let mut current_words = parts[0].word_count;
        if let Some(second) = parts.get(1) {
            let secs = self.timeout_secs();
            loop {
                if channel.terminal_count(&mut self.bus) {
                    break;
                }
                if self.alt_status().is_done() {
                    outcome.fail(ErrorCode::ISA_EARLY_COMPLETION);
                    break;
                }
                if timer.expired(self.now(), secs) {
                    outcome.fail_timeout(ErrorCode::ISA_FIRST_PART_TIMEOUT);
                    break;
                }
            }
            if !outcome.has_failed() {
                outcome.total_bytes += current_words << 1;
                channel.program(&mut self.bus, second, cmd.direction);
                current_words = second.word_count;
            }
        }

        if !outcome.has_failed() {
            self.wait_for(&mut timer, outcome, ErrorCode::ISA_COMPLETION_TIMEOUT, Status::is_done);
        }

        let terminal = channel.terminal_count(&mut self.bus);
        let status = self.final_status(outcome);
        if !outcome.has_failed() {
            if Status::from_bits_retain(status).is_bad_completion() {
                outcome.fail(ErrorCode::ISA_BAD_FINAL_STATUS);
            } else if !terminal {
                outcome.fail(ErrorCode::ISA_EARLY_COMPLETION);
            }
        }

        if outcome.has_failed() {
            let residual = channel.residual_words(&mut self.bus);
            outcome.total_bytes += current_words.saturating_sub(residual) << 1;
        } else {
            outcome.total_bytes += current_words << 1;
        }
        channel.disable(&mut self.bus);
        self.sync_for_cpu(cmd.direction, bytes);
        self.complete(ext, outcome, status);
    }

    fn exec_bus_master(&mut self, cmd: &CommandDescriptor, outcome: &mut CommandOutcome) {
        let Some(bm) = self.bus_master else {
            outcome.fail(ErrorCode::BM_NOT_CONFIGURED);
            return;
        };
        let Some(bytes) = self.checked_transfer_bytes(cmd, outcome) else {
            return;
        };
        let Some(physical) = self.buffer_physical(outcome) else {
            return;
        };
        let bytes = bytes as u32;

        let mut table = PrdTable::new();
        if table.add_region(physical, bytes).is_err() {
            outcome.fail(ErrorCode::DMA_ADDRESS_UNREACHABLE);
            return;
        }
        let (entries, _) = table.build();
        let prd = self.dma_platform.as_mut().and_then(|p| p.load_prd_table(&entries));
        let Some(prd) = prd else {
            outcome.fail(ErrorCode::DMA_ADDRESS_UNREACHABLE);
            return;
        };
        if cmd.direction == DataDirection::In {
            self.buffer.fill(0);
        }
        self.sync_for_device(cmd.direction, bytes);

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

        bm.stop(&mut self.bus);
        bm.clear_status(&mut self.bus);
        bm.set_prd_address(&mut self.bus, prd);
        bm.set_direction(&mut self.bus, cmd.direction);
        self.issue(cmd.opcode);
        bm.start(&mut self.bus, cmd.direction);

        let secs = self.timeout_secs();
        let state = self.interrupts.state();
        let use_irq = self.interrupts_active();
        loop {
            let finished = if use_irq {
                state.fired()
            } else {
                let bm_status = bm.status(&mut self.bus);
                bm_status & BM_SR_INT != 0
                    || (bm_status & BM_SR_ACTIVE == 0 && self.alt_status().is_done())
            };
            if finished {
                break;
            }
            if timer.expired(self.now(), secs) {
                outcome.fail_timeout(ErrorCode::BM_TIMEOUT);
                break;
            }
        }

        bm.stop(&mut self.bus);
        let bm_status = if use_irq && !outcome.has_failed() {
            state.captured_bm_status()
        } else {
            bm.status(&mut self.bus)
        };
        if !outcome.has_failed() {
            if bm_status & BM_SR_ACTIVE != 0 {
                outcome.fail(ErrorCode::BM_STILL_ACTIVE);
            } else if bm_status & BM_SR_ERROR != 0 {
                outcome.fail(ErrorCode::BM_ENGINE_ERROR);
            }
        }
        let status = self.final_status(outcome);
        if !outcome.has_failed() && Status::from_bits_retain(status).is_bad_completion() {
            outcome.fail(ErrorCode::BM_BAD_FINAL_STATUS);
        }
        if !outcome.has_failed() {
            outcome.total_bytes = bytes;
        }
        bm.clear_status(&mut self.bus);
        self.sync_for_cpu(cmd.direction, bytes);
        self.complete(ext, outcome, status);
    }
}
