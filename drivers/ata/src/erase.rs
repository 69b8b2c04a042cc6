//! SECURITY ERASE UNIT, blocking and monitored
//!
//! Both paths set the master password, take the drive's own estimate from
//! Identify words 89/90 and send ERASE PREPARE immediately followed by
//! ERASE UNIT. The blocking path raises the command timeout to twice the
//! estimate for the one command. [`EraseMonitor`] leaves the commands
//! running on several devices and polls them in turn.

use alloc::vec::Vec;

use serde::Serialize;

use crate::command::{CommandDescriptor, CommandOutcome};
use crate::config::AtaConfig;
use crate::consts::*;
use crate::controller::Controller;
use crate::device::DeviceTable;
use crate::error::{AtaError, AtaResult};
use crate::io::RegisterIo;
use crate::security::{password_block, PasswordKind, SecurityLevel};
use crate::timer::Timeout;
use crate::types::{Register, Status};

const ENHANCED_ERASE_FLAG: u8 = 0x02;

/// Command timeout for an erase the drive estimates at `estimate_minutes`
pub fn erase_timeout_secs(estimate_minutes: u32, default_minutes: u32) -> u32 {
    if estimate_minutes == 0 {
        default_minutes.saturating_mul(60)
    } else {
        estimate_minutes.saturating_mul(2 * 60)
    }
}

impl<B: RegisterIo> Controller<B> {
    pub fn security_erase_prepare(&mut self) -> AtaResult<()> {
        self.execute(&CommandDescriptor::new(ATA_CMD_SECURITY_ERASE_PREPARE))?;
        Ok(())
    }

    /// SECURITY ERASE UNIT with the master password. Must directly follow
    /// [`Controller::security_erase_prepare`].
    pub fn security_erase_unit(&mut self, password: &[u8], enhanced: bool) -> AtaResult<CommandOutcome> {
        let mut block = password_block(PasswordKind::Master, SecurityLevel::High, password)?;
        if enhanced {
            block[0] |= ENHANCED_ERASE_FLAG;
        }
        self.send_password_block(ATA_CMD_SECURITY_ERASE_UNIT, &block)
    }

    /// Check support, set the master password and return the erase timeout
    /// in seconds.
    fn prepare_erase(&mut self, password: &[u8], enhanced: bool) -> AtaResult<u32> {
        let id = self.identify()?;
        if !id.supports_security() || (enhanced && !id.supports_enhanced_erase()) {
            return Err(AtaError::Unsupported);
        }
        self.security_set_password(PasswordKind::Master, SecurityLevel::High, password)?;

        let minutes = if enhanced { id.enhanced_erase_minutes() } else { id.erase_minutes() };
        let timeout = erase_timeout_secs(minutes, self.config().default_erase_minutes);
        log::info!(
            "{} erase estimated at {} min, timeout {} s",
            if enhanced { "enhanced" } else { "normal" },
            minutes,
            timeout
        );
        Ok(timeout)
    }

    /// Erase the whole drive and wait for it.
    ///
    /// A timeout abandons the erase: the device is reset and left in
    /// whatever state it reached. Nothing is retried.
    pub fn secure_erase(&mut self, password: &[u8], enhanced: bool) -> AtaResult<()> {
        let timeout = self.prepare_erase(password, enhanced)?;
        self.security_erase_prepare()?;

        let saved = self.config().command_timeout_secs;
        self.config_mut().command_timeout_secs = timeout;
        let result = self.security_erase_unit(password, enhanced);
        self.config_mut().command_timeout_secs = saved;

        match result {
            Ok(_) => {
                log::info!("secure erase complete");
                Ok(())
            }
            Err(AtaError::Timeout { code }) => {
                log::error!("secure erase timed out (code {}), abandoning", code);
                let reset = self.last_outcome().reset_code;
                if reset.is_error() {
                    log::error!("reset after abandoned erase failed (code {})", reset);
                }
                Err(AtaError::Abandoned)
            }
            Err(e) => Err(e),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EraseProgress {
    Running,
    Completed { status: u8 },
    Failed { status: u8, error: u8 },
    /// Hard limit hit; reset issued, device left as it was
    Abandoned,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct EraseJob {
    /// Entry in the device table
    pub index: usize,
    pub timeout_secs: u32,
    pub progress: EraseProgress,
    #[serde(skip)]
    started: Timeout,
    #[serde(skip)]
    last_poll: Timeout,
}

impl EraseJob {
    pub fn is_running(&self) -> bool {
        self.progress == EraseProgress::Running
    }
}

/// Erases left running on several devices at once
pub struct EraseMonitor {
    jobs: Vec<EraseJob>,
    hard_limit_secs: u32,
    poll_interval_secs: u32,
}

impl EraseMonitor {
    pub fn new(config: &AtaConfig) -> Self {
        Self {
            jobs: Vec::new(),
            hard_limit_secs: config.erase_hard_limit_secs,
            poll_interval_secs: config.erase_poll_interval_secs,
        }
    }

    pub fn jobs(&self) -> &[EraseJob] {
        &self.jobs
    }

    pub fn running(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_running()).count()
    }

    /// Start an erase on table entry `index` without waiting for it
    pub fn start<B: RegisterIo>(
        &mut self,
        ctl: &mut Controller<B>,
        table: &mut DeviceTable,
        index: usize,
        password: &[u8],
        enhanced: bool,
    ) -> AtaResult<()> {
        table.set_active(ctl, index)?;
        let timeout_secs = ctl.prepare_erase(password, enhanced)?;
        ctl.security_erase_prepare()?;

        let saved = ctl.config().poll_for_completion;
        ctl.config_mut().poll_for_completion = false;
        let result = ctl.security_erase_unit(password, enhanced);
        ctl.config_mut().poll_for_completion = saved;
        result?;

        let now = ctl.now();
        log::info!("erase started on device {}", index);
        self.jobs.push(EraseJob {
            index,
            timeout_secs,
            progress: EraseProgress::Running,
            started: Timeout::arm(now),
            last_poll: Timeout::arm(now),
        });
        Ok(())
    }

    /// Visit every running job whose poll interval has passed. Returns the
    /// number still running.
    pub fn poll<B: RegisterIo>(
        &mut self,
        ctl: &mut Controller<B>,
        table: &mut DeviceTable,
    ) -> AtaResult<usize> {
        for job in self.jobs.iter_mut().filter(|j| j.is_running()) {
            let now = ctl.now();
            if !job.last_poll.expired(now, self.poll_interval_secs) {
                continue;
            }
            job.last_poll = Timeout::arm(now);
            table.set_active(ctl, job.index)?;

            let alt = Status::from_bits_retain(ctl.bus_mut().read(Register::ALT_STATUS));
            if !alt.contains(Status::BSY) {
                let status = ctl.bus_mut().read(Register::STATUS);
                let error = ctl.bus_mut().read(Register::ERROR);
                job.progress = if Status::from_bits_retain(status).is_bad_completion() {
                    log::error!("erase on device {} failed: {:02X}/{:02X}", job.index, status, error);
                    EraseProgress::Failed { status, error }
                } else {
                    log::info!("erase on device {} complete", job.index);
                    EraseProgress::Completed { status }
                };
            } else if job.started.expired(ctl.now(), self.hard_limit_secs) {
                log::error!("erase on device {} passed the hard limit, abandoning", job.index);
                if let Err(e) = ctl.soft_reset() {
                    log::error!("reset failed: {}", e);
                }
                job.progress = EraseProgress::Abandoned;
            }
        }
        Ok(self.running())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sim_controller, SimDevice};

    #[test]
    fn test_timeout_from_estimate() {
        assert_eq!(erase_timeout_secs(0, 300), 18_000, "default when the drive gives none");
        assert_eq!(erase_timeout_secs(10, 300), 1_200, "twice the estimate");
    }

    #[test]
    fn test_secure_erase() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        assert_ne!(ctl.bus().io().sector(5), [0u8; SECTOR_SIZE]);
        ctl.secure_erase(b"erase", false).unwrap();

        let dev = ctl.bus().io();
        assert_eq!(
            dev.commands(),
            [
                ATA_CMD_IDENTIFY,
                ATA_CMD_SECURITY_SET_PASSWORD,
                ATA_CMD_SECURITY_ERASE_PREPARE,
                ATA_CMD_SECURITY_ERASE_UNIT,
            ]
        );
        assert_eq!(dev.sector(5), [0u8; SECTOR_SIZE]);
        assert_eq!(ctl.config().command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
    }

    #[test]
    fn test_erase_timeout_abandons() {
        let (mut ctl, _) =
            sim_controller(|clock| SimDevice::new(clock).with_erase_ticks(1_000_000));
        assert_eq!(ctl.secure_erase(b"erase", false), Err(AtaError::Abandoned));
        assert_eq!(ctl.config().command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
        assert!(ctl.last_outcome().timed_out);
        assert!(ctl.last_outcome().reset_issued);
        assert!(ctl.execute(&CommandDescriptor::identify()).is_ok());
    }

    #[test]
    fn test_enhanced_requires_support() {
        let (mut ctl, _) = sim_controller(|clock| {
            let mut dev = SimDevice::new(clock);
            dev.security.enhanced_supported = false;
            dev
        });
        assert_eq!(ctl.secure_erase(b"erase", true), Err(AtaError::Unsupported));
        assert_eq!(ctl.bus().io().commands(), [ATA_CMD_IDENTIFY]);
    }

    #[test]
    fn test_monitor_completes() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        let mut table = DeviceTable::new();
        table.rescan(&mut ctl, &[]).unwrap();

        let config = AtaConfig::default().with_erase_limits(60, 0);
        let mut monitor = EraseMonitor::new(&config);
        monitor.start(&mut ctl, &mut table, 0, b"erase", false).unwrap();
        assert!(ctl.config().poll_for_completion, "polling mode restored");
        assert_eq!(monitor.running(), 1);

        let mut polls = 0;
        while monitor.poll(&mut ctl, &mut table).unwrap() > 0 {
            polls += 1;
            assert!(polls < 100);
        }
        assert!(matches!(monitor.jobs()[0].progress, EraseProgress::Completed { .. }));
        assert_eq!(ctl.bus().io().sector(0), [0u8; SECTOR_SIZE]);
    }

    #[test]
    fn test_monitor_abandons_after_hard_limit() {
        let (mut ctl, clock) =
            sim_controller(|clock| SimDevice::new(clock).with_erase_ticks(1_000_000));
        let mut table = DeviceTable::new();
        table.rescan(&mut ctl, &[]).unwrap();

        let config = AtaConfig::default().with_erase_limits(10, 0);
        let mut monitor = EraseMonitor::new(&config);
        monitor.start(&mut ctl, &mut table, 0, b"erase", false).unwrap();
        assert_eq!(monitor.poll(&mut ctl, &mut table).unwrap(), 1);

        clock.advance_secs(11);
        assert_eq!(monitor.poll(&mut ctl, &mut table).unwrap(), 0);
        assert_eq!(monitor.jobs()[0].progress, EraseProgress::Abandoned);
    }
}
