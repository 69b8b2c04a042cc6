//! Host Protected Area: READ NATIVE MAX ADDRESS followed by SET MAX ADDRESS

use crate::command::CommandDescriptor;
use crate::controller::Controller;
use crate::error::{AtaError, AtaResult};
use crate::io::RegisterIo;

impl<B: RegisterIo> Controller<B> {
    /// Hide everything above `max_lba`. SET MAX must directly follow a READ
    /// NATIVE MAX, so both are always sent as a pair.
    pub fn set_hpa(&mut self, max_lba: u64, ext: bool, non_volatile: bool) -> AtaResult<()> {
        let native = self.max_lba_from_native(ext)?;
        if max_lba > native {
            log::warn!("HPA at {} is above native max {}", max_lba, native);
            return Err(AtaError::InvalidArgument);
        }
        self.execute(&CommandDescriptor::set_max(max_lba, ext, non_volatile))?;
        log::info!("max address set to {} (native {})", max_lba, native);
        Ok(())
    }

    /// True when Identify reports fewer sectors than the native max
    pub fn hpa_is_set(&mut self) -> AtaResult<bool> {
        let id = self.identify()?;
        let native = self.max_lba_from_native(id.supports_lba48())?;
        Ok(id.max_lba() as u32 != native as u32)
    }

    /// One READ NATIVE MAX / SET MAX pair restoring the native size. SET MAX
    /// is sent even when the read fails, carrying whatever address the
    /// registers returned; the pair's result is the SET MAX result.
    fn restore_native_max(&mut self, ext: bool, non_volatile: bool) -> AtaResult<u64> {
        let native = match self.max_lba_from_native(ext) {
            Ok(native) => native,
            Err(e) => {
                let out = self.last_outcome().output;
                let returned = if ext { out.lba48() } else { out.lba28() as u64 };
                log::warn!("READ NATIVE MAX failed ({}), SET MAX {} follows anyway", e, returned);
                returned
            }
        };
        self.execute(&CommandDescriptor::set_max(native, ext, non_volatile))?;
        Ok(native)
    }

    /// Remove any HPA.
    ///
    /// Drives over 137GB can carry a legacy and an EXT HPA at once, so the
    /// order is fixed: 28-bit volatile, 48-bit volatile, 28-bit non-volatile
    /// and, only if that fails, 48-bit non-volatile.
    pub fn remove_hpa(&mut self) -> AtaResult<()> {
        log::info!("removing HPA");
        if let Err(e) = self.restore_native_max(false, false) {
            log::warn!("28-bit volatile HPA removal failed: {}", e);
        }
        if let Err(e) = self.restore_native_max(true, false) {
            log::warn!("48-bit volatile HPA removal failed: {}", e);
        }
        match self.restore_native_max(false, true) {
            Ok(max) => {
                log::info!("HPA removed, max LBA {}", max);
                Ok(())
            }
            Err(e) => {
                log::warn!("28-bit HPA removal failed ({}), trying EXT", e);
                let max = self.restore_native_max(true, true)?;
                log::info!("HPA removed, max LBA {}", max);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::consts::*;
    use crate::sim::{sim_controller, SimDevice};

    #[test]
    fn test_set_hpa() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock).with_capacity(1000));
        assert!(!ctl.hpa_is_set().unwrap());
        ctl.set_hpa(499, false, false).unwrap();
        assert_eq!(ctl.max_lba_from_identify().unwrap(), 499);
        assert!(ctl.hpa_is_set().unwrap());
        assert!(ctl.set_hpa(1000, false, false).is_err(), "above native max");
    }

    #[test]
    fn test_remove_hpa_sequence() {
        let (mut ctl, _) =
            sim_controller(|clock| SimDevice::new(clock).with_capacity(1000).with_hpa(499));
        ctl.remove_hpa().unwrap();
        let dev = ctl.bus().io();
        assert_eq!(dev.current_max(), 999);
        assert_eq!(
            dev.commands(),
            [
                ATA_CMD_READ_NATIVE_MAX,
                ATA_CMD_SET_MAX,
                ATA_CMD_READ_NATIVE_MAX_EXT,
                ATA_CMD_SET_MAX_EXT,
                ATA_CMD_READ_NATIVE_MAX,
                ATA_CMD_SET_MAX,
            ]
        );
        assert_eq!(dev.non_volatile_sets(), 1);
    }

    #[test]
    fn test_remove_hpa_falls_back_to_ext() {
        let (mut ctl, _) = sim_controller(|clock| {
            SimDevice::new(clock)
                .with_capacity(1000)
                .with_hpa(499)
                .fail_on(ATA_CMD_SET_MAX, ATA_ER_ABRT)
        });
        ctl.remove_hpa().unwrap();
        let dev = ctl.bus().io();
        assert_eq!(dev.current_max(), 999);
        assert_eq!(&dev.commands()[6..], [ATA_CMD_READ_NATIVE_MAX_EXT, ATA_CMD_SET_MAX_EXT]);
        assert_eq!(dev.non_volatile_sets(), 1, "only the EXT non-volatile step took");
    }

    #[test]
    fn test_set_max_follows_failed_native_read() {
        let (mut ctl, _) = sim_controller(|clock| {
            SimDevice::new(clock)
                .with_capacity(1000)
                .with_hpa(499)
                .fail_on(ATA_CMD_READ_NATIVE_MAX, ATA_ER_ABRT)
        });
        ctl.remove_hpa().unwrap();
        let dev = ctl.bus().io();
        assert_eq!(
            dev.commands(),
            [
                ATA_CMD_READ_NATIVE_MAX,
                ATA_CMD_SET_MAX,
                ATA_CMD_READ_NATIVE_MAX_EXT,
                ATA_CMD_SET_MAX_EXT,
                ATA_CMD_READ_NATIVE_MAX,
                ATA_CMD_SET_MAX,
                ATA_CMD_READ_NATIVE_MAX_EXT,
                ATA_CMD_SET_MAX_EXT,
            ]
        );
        assert_eq!(dev.current_max(), 999);
    }

    #[test]
    fn test_remove_hpa_reports_last_failure() {
        let (mut ctl, _) = sim_controller(|clock| {
            SimDevice::new(clock)
                .with_capacity(1000)
                .without_lba48()
                .fail_on(ATA_CMD_SET_MAX, ATA_ER_ABRT)
        });
        let err = ctl.remove_hpa().unwrap_err();
        assert!(matches!(err, crate::error::AtaError::DeviceError { .. }));
    }
}
