//! Device Configuration Overlay
//!
//! The overlay structure is read with DCO IDENTIFY, edited in memory and
//! written back with DCO SET. Every edit starts from the factory settings
//! (DCO RESTORE first) and ends with a fresh checksum in byte 511.

use crate::command::CommandDescriptor;
use crate::consts::*;
use crate::controller::Controller;
use crate::error::{AtaError, AtaResult, MismatchKind};
use crate::io::RegisterIo;
use crate::types::Address;

/// Two's complement of the byte sum of `data[..511]`
pub fn dco_checksum(data: &[u8]) -> u8 {
    data[..DCO_CHECKSUM_BYTE]
        .iter()
        .fold(0u8, |acc, &b| acc.wrapping_add(b))
        .wrapping_neg()
}

/// The 512-byte overlay structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DcoData {
    bytes: [u8; SECTOR_SIZE],
}

impl DcoData {
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut bytes = [0u8; SECTOR_SIZE];
        let n = data.len().min(SECTOR_SIZE);
        bytes[..n].copy_from_slice(&data[..n]);
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; SECTOR_SIZE] {
        &self.bytes
    }

    /// Highest LBA the overlay allows (words 3-6)
    pub fn max_lba(&self) -> u64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&self.bytes[DCO_BYTE_MAX_LBA..DCO_BYTE_MAX_LBA + 8]);
        u64::from_le_bytes(raw)
    }

    /// Store a 32-bit max LBA; the upper words are cleared
    pub fn set_max_lba(&mut self, max_lba: u32) {
        self.bytes[DCO_BYTE_MAX_LBA..DCO_BYTE_MAX_LBA_HIGH].copy_from_slice(&max_lba.to_le_bytes());
        self.bytes[DCO_BYTE_MAX_LBA_HIGH..DCO_BYTE_FEATURES].fill(0);
    }

    pub fn security_supported(&self) -> bool {
        self.bytes[DCO_BYTE_FEATURES] & DCO_SECURITY_BIT != 0
    }

    pub fn set_security_supported(&mut self, supported: bool) {
        if supported {
            self.bytes[DCO_BYTE_FEATURES] |= DCO_SECURITY_BIT;
        } else {
            self.bytes[DCO_BYTE_FEATURES] &= !DCO_SECURITY_BIT;
        }
    }

    pub fn stored_checksum(&self) -> u8 {
        self.bytes[DCO_CHECKSUM_BYTE]
    }

    pub fn update_checksum(&mut self) {
        self.bytes[DCO_CHECKSUM_BYTE] = dco_checksum(&self.bytes);
    }

    pub fn verify_checksum(&self) -> AtaResult<()> {
        let computed = dco_checksum(&self.bytes);
        if computed == self.stored_checksum() {
            Ok(())
        } else {
            Err(AtaError::Mismatch(MismatchKind::Checksum {
                stored: self.stored_checksum(),
                computed,
            }))
        }
    }
}

impl<B: RegisterIo> Controller<B> {
    /// DCO RESTORE: return capacity and features to factory settings
    pub fn dco_restore(&mut self) -> AtaResult<()> {
        let cmd = CommandDescriptor::dco(DCO_RESTORE).with_address(Address::Lba48(0));
        self.execute(&cmd)?;
        Ok(())
    }

    pub fn dco_identify(&mut self) -> AtaResult<DcoData> {
        self.execute(&CommandDescriptor::dco(DCO_IDENTIFY))?;
        Ok(DcoData::from_bytes(&self.buffer()[..SECTOR_SIZE]))
    }

    /// DCO SET with `data` as the parameter block
    pub fn dco_set(&mut self, data: &DcoData) -> AtaResult<()> {
        self.buffer_mut()[..SECTOR_SIZE].copy_from_slice(data.as_bytes());
        self.execute(&CommandDescriptor::dco(DCO_SET))?;
        Ok(())
    }

    pub fn dco_freeze_lock(&mut self) -> AtaResult<()> {
        self.execute(&CommandDescriptor::dco(DCO_FREEZE_LOCK))?;
        log::info!("DCO frozen");
        Ok(())
    }

    /// Max LBA the current overlay allows
    pub fn max_lba_from_dco(&mut self) -> AtaResult<u64> {
        Ok(self.dco_identify()?.max_lba())
    }

    /// Restore, then read back the factory configuration
    pub fn dco_factory_config(&mut self) -> AtaResult<DcoData> {
        self.dco_restore()?;
        self.dco_identify()
    }

    /// Shrink the drive to `new_max` through the overlay.
    ///
    /// `factory` is the configuration read by [`Controller::dco_factory_config`];
    /// a request at or above its max LBA is rejected before any command is
    /// sent.
    pub fn change_capacity_via_dco(&mut self, new_max: u32, factory: &DcoData) -> AtaResult<()> {
        let requested = new_max as u64;
        if requested >= factory.max_lba() {
            log::warn!("DCO capacity {} is not below factory max {}", requested, factory.max_lba());
            return Err(AtaError::Mismatch(MismatchKind::CapacityNotBelowFactory {
                requested,
                factory: factory.max_lba(),
            }));
        }

        let mut config = self.dco_factory_config()?;
        config.set_max_lba(new_max);
        config.update_checksum();
        self.dco_set(&config)?;

        let actual = self.max_lba_from_native(requested > LBA28_MAX)?;
        if actual != requested {
            return Err(AtaError::Mismatch(MismatchKind::CapacityReadback {
                expected: requested,
                actual,
            }));
        }
        log::info!("DCO max LBA now {}", actual);
        Ok(())
    }

    /// Read the factory configuration and shrink to `new_max`
    pub fn set_capacity_via_dco(&mut self, new_max: u32) -> AtaResult<()> {
        let factory = self.dco_factory_config()?;
        self.change_capacity_via_dco(new_max, &factory)
    }

    /// Turn the security feature set on or off in the overlay
    pub fn set_dco_security(&mut self, supported: bool) -> AtaResult<()> {
        let mut config = self.dco_factory_config()?;
        config.set_security_supported(supported);
        config.update_checksum();
        self.dco_set(&config)?;
        log::info!("DCO security feature set {}", if supported { "on" } else { "off" });
        Ok(())
    }
}
