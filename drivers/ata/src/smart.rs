//! SMART READ DATA

use alloc::vec::Vec;

use serde::Serialize;

use crate::command::CommandDescriptor;
use crate::consts::*;
use crate::controller::Controller;
use crate::error::AtaResult;
use crate::io::RegisterIo;

pub const SMART_MAX_ATTRIBUTES: usize = 30;
const ATTRIBUTE_SIZE: usize = 12;
const ATTRIBUTES_OFFSET: usize = 2;

const OFFLINE_STATUS: usize = 362;
const SELF_TEST_STATUS: usize = 363;
const OFFLINE_SECONDS: usize = 364;
const OFFLINE_CAPABILITY: usize = 367;
const SMART_CAPABILITY: usize = 368;
const ERROR_LOG_CAPABILITY: usize = 370;
const SHORT_TEST_MINUTES: usize = 372;
const EXTENDED_TEST_MINUTES: usize = 373;
const CONVEYANCE_TEST_MINUTES: usize = 374;
const CHECKSUM: usize = 511;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SmartAttribute {
    pub id: u8,
    pub flags: u16,
    pub current: u8,
    pub worst: u8,
    /// 48-bit raw value
    pub raw: u64,
}

impl SmartAttribute {
    fn parse(entry: &[u8]) -> Self {
        let mut raw = [0u8; 8];
        raw[..6].copy_from_slice(&entry[5..11]);
        Self {
            id: entry[0],
            flags: u16::from_le_bytes([entry[1], entry[2]]),
            current: entry[3],
            worst: entry[4],
            raw: u64::from_le_bytes(raw),
        }
    }

    /// Bit 0 of the flags: failure of this attribute predicts drive failure
    pub fn is_prefailure(&self) -> bool {
        self.flags & 0x0001 != 0
    }
}

/// The 512-byte SMART data structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SmartData {
    pub revision: u16,
    /// Non-empty attribute slots in table order
    pub attributes: Vec<SmartAttribute>,
    pub offline_status: u8,
    pub self_test_status: u8,
    pub offline_seconds: u16,
    pub offline_capability: u8,
    pub smart_capability: u16,
    pub error_log_capability: u8,
    pub short_test_minutes: u8,
    pub extended_test_minutes: u8,
    pub conveyance_test_minutes: u8,
    pub checksum: u8,
}

impl SmartData {
    /// Parse a SMART READ DATA response. Slots with attribute id 0 are unused.
    pub fn parse(bytes: &[u8; SECTOR_SIZE]) -> Self {
        let table = &bytes[ATTRIBUTES_OFFSET..ATTRIBUTES_OFFSET + SMART_MAX_ATTRIBUTES * ATTRIBUTE_SIZE];
        let attributes = table
            .chunks_exact(ATTRIBUTE_SIZE)
            .filter(|entry| entry[0] != 0)
            .map(SmartAttribute::parse)
            .collect();
        let le16 = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        Self {
            revision: le16(0),
            attributes,
            offline_status: bytes[OFFLINE_STATUS],
            self_test_status: bytes[SELF_TEST_STATUS],
            offline_seconds: le16(OFFLINE_SECONDS),
            offline_capability: bytes[OFFLINE_CAPABILITY],
            smart_capability: le16(SMART_CAPABILITY),
            error_log_capability: bytes[ERROR_LOG_CAPABILITY],
            short_test_minutes: bytes[SHORT_TEST_MINUTES],
            extended_test_minutes: bytes[EXTENDED_TEST_MINUTES],
            conveyance_test_minutes: bytes[CONVEYANCE_TEST_MINUTES],
            checksum: bytes[CHECKSUM],
        }
    }

    pub fn attribute(&self, id: u8) -> Option<&SmartAttribute> {
        self.attributes.iter().find(|a| a.id == id)
    }
}

impl<B: RegisterIo> Controller<B> {
    pub fn smart_read_data(&mut self) -> AtaResult<SmartData> {
        self.execute(&CommandDescriptor::smart(SMART_READ_DATA))?;
        let mut bytes = [0u8; SECTOR_SIZE];
        bytes.copy_from_slice(&self.buffer()[..SECTOR_SIZE]);
        let data = SmartData::parse(&bytes);
        let sum = bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        if sum != 0 {
            log::warn!("SMART data checksum off by 0x{:02X}", sum);
        }
        log::info!("SMART revision {} with {} attributes", data.revision, data.attributes.len());
        Ok(data)
    }

    pub fn smart_enable(&mut self) -> AtaResult<()> {
        self.execute(&CommandDescriptor::smart(SMART_ENABLE_OPERATIONS))?;
        Ok(())
    }

    pub fn smart_disable(&mut self) -> AtaResult<()> {
        self.execute(&CommandDescriptor::smart(SMART_DISABLE_OPERATIONS))?;
        Ok(())
    }

    /// SMART RETURN STATUS: true when a threshold has been exceeded
    pub fn smart_threshold_exceeded(&mut self) -> AtaResult<bool> {
        let outcome = self.execute(&CommandDescriptor::smart(SMART_RETURN_STATUS))?;
        let cylinder = (outcome.output.lba_high & 0xFF) << 8 | (outcome.output.lba_mid & 0xFF);
        Ok(cylinder == SMART_THRESHOLD_EXCEEDED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AtaError;
    use crate::sim::{sim_controller, SimAttribute, SimDevice};

    #[test]
    fn test_parse_skips_empty_slots() {
        let mut bytes = [0u8; SECTOR_SIZE];
        bytes[0] = 0x10;
        // slot 0 empty, slot 1 holds attribute 9
        let at = ATTRIBUTES_OFFSET + ATTRIBUTE_SIZE;
        bytes[at..at + 11].copy_from_slice(&[9, 0x32, 0x00, 98, 97, 0x10, 0x27, 0, 0, 0x01, 0]);
        bytes[SHORT_TEST_MINUTES] = 2;

        let data = SmartData::parse(&bytes);
        assert_eq!(data.revision, 0x10);
        assert_eq!(data.attributes.len(), 1);
        let hours = data.attribute(9).unwrap();
        assert_eq!(hours.flags, 0x0032);
        assert_eq!((hours.current, hours.worst), (98, 97));
        assert_eq!(hours.raw, 0x0001_0000_2710);
        assert!(!hours.is_prefailure());
        assert_eq!(data.short_test_minutes, 2);
    }

    #[test]
    fn test_read_from_sim() {
        let (mut ctl, _) = sim_controller(|clock| {
            SimDevice::new(clock)
                .with_smart_attribute(SimAttribute { id: 5, flags: 0x33, current: 100, worst: 100, raw: 0 })
                .with_smart_attribute(SimAttribute { id: 194, flags: 0x22, current: 64, worst: 50, raw: 36 })
        });
        let data = ctl.smart_read_data().unwrap();
        assert_eq!(data.attributes.len(), 2);
        assert!(data.attribute(5).unwrap().is_prefailure());
        assert_eq!(data.attribute(194).unwrap().raw, 36);
        assert_eq!(data.offline_seconds, 600);
        assert_eq!(data.extended_test_minutes, 90);
        assert!(!ctl.smart_threshold_exceeded().unwrap());

        let input = ctl.last_outcome().input;
        assert_eq!((input.lba_mid, input.lba_high), (0x4F, 0xC2), "signature in the cylinder registers");
    }

    #[test]
    fn test_read_needs_smart_enabled() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        ctl.smart_disable().unwrap();
        assert!(matches!(ctl.smart_read_data(), Err(AtaError::DeviceError { .. })));
        ctl.smart_enable().unwrap();
        assert!(ctl.smart_read_data().is_ok());
    }
}
