//! IDENTIFY DEVICE data and capacity sources
//!
//! The drive reports its capacity three ways and they may legitimately
//! disagree: Identify words 60-61/100-103 (reduced by an HPA), READ NATIVE
//! MAX ADDRESS (reduced only by a DCO) and DEVICE CONFIGURATION IDENTIFY
//! (the factory ceiling after restore).

use alloc::string::String;

use crate::command::CommandDescriptor;
use crate::consts::*;
use crate::controller::Controller;
use crate::error::AtaResult;
use crate::io::RegisterIo;

/// One 512-byte IDENTIFY DEVICE response
#[derive(Clone, PartialEq, Eq)]
pub struct IdentifyData {
    words: [u16; 256],
}

impl core::fmt::Debug for IdentifyData {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("IdentifyData")
            .field("model", &self.model())
            .field("serial", &self.serial())
            .field("firmware", &self.firmware())
            .field("max_lba", &self.max_lba())
            .finish()
    }
}

impl IdentifyData {
    /// Parse from raw bytes; missing bytes read as zero
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut words = [0u16; 256];
        for (i, pair) in bytes.chunks_exact(2).take(256).enumerate() {
            words[i] = u16::from_le_bytes([pair[0], pair[1]]);
        }
        Self { words }
    }

    pub fn word(&self, index: usize) -> u16 {
        self.words[index]
    }

    pub fn words(&self) -> &[u16; 256] {
        &self.words
    }

    pub fn model(&self) -> String {
        ata_string(&self.words[ID_WORD_MODEL..ID_WORD_MODEL + ID_MODEL_WORDS])
    }

    pub fn serial(&self) -> String {
        ata_string(&self.words[ID_WORD_SERIAL..ID_WORD_SERIAL + ID_SERIAL_WORDS])
    }

    pub fn firmware(&self) -> String {
        ata_string(&self.words[ID_WORD_FIRMWARE..ID_WORD_FIRMWARE + ID_FIRMWARE_WORDS])
    }

    pub fn supports_lba48(&self) -> bool {
        self.words[ID_WORD_COMMAND_SET_2] & ID_CS2_LBA48 != 0
    }

    pub fn supports_hpa(&self) -> bool {
        self.words[ID_WORD_COMMAND_SET_1] & ID_CS1_HPA != 0
    }

    pub fn supports_dco(&self) -> bool {
        self.words[ID_WORD_COMMAND_SET_2] & ID_CS2_DCO != 0
    }

    pub fn supports_security(&self) -> bool {
        self.words[ID_WORD_COMMAND_SET_1] & ID_CS1_SECURITY != 0
    }

    pub fn security_word(&self) -> u16 {
        self.words[ID_WORD_SECURITY]
    }

    pub fn supports_enhanced_erase(&self) -> bool {
        self.security_word() & SEC_ENHANCED_ERASE != 0
    }

    /// Addressable sectors from words 60-61
    pub fn lba28_sectors(&self) -> u32 {
        self.words[ID_WORD_MAX_LBA] as u32 | (self.words[ID_WORD_MAX_LBA + 1] as u32) << 16
    }

    /// Addressable sectors from words 100-103
    pub fn lba48_sectors(&self) -> u64 {
        (0..4).fold(0u64, |acc, i| acc | (self.words[ID_WORD_MAX_LBA_EXT + i] as u64) << (16 * i))
    }

    /// Addressable sectors under the addressing mode the drive supports
    pub fn sectors(&self) -> u64 {
        if self.supports_lba48() {
            self.lba48_sectors()
        } else {
            self.lba28_sectors() as u64
        }
    }

    /// Highest user-addressable LBA
    pub fn max_lba(&self) -> u64 {
        self.sectors().saturating_sub(1)
    }

    /// Supported Ultra DMA modes, bit n for mode n
    pub fn udma_supported(&self) -> u8 {
        (self.words[ID_WORD_UDMA] & 0x7F) as u8
    }

    pub fn udma_selected(&self) -> Option<u8> {
        let selected = (self.words[ID_WORD_UDMA] >> 8) & 0x7F;
        (selected != 0).then(|| selected.trailing_zeros() as u8)
    }

    /// Highest supported Ultra DMA mode
    pub fn highest_udma_mode(&self) -> Option<u8> {
        let supported = self.udma_supported();
        (supported != 0).then(|| 7 - supported.leading_zeros() as u8)
    }

    /// Normal erase estimate in minutes; zero when the drive gives none
    pub fn erase_minutes(&self) -> u32 {
        (self.words[ID_WORD_ERASE_TIME] & 0xFF) as u32 * 2
    }

    pub fn enhanced_erase_minutes(&self) -> u32 {
        (self.words[ID_WORD_ENHANCED_ERASE_TIME] & 0xFF) as u32 * 2
    }

    /// Largest READ/WRITE MULTIPLE block the drive accepts
    pub fn max_multiple(&self) -> u8 {
        (self.words[47] & 0xFF) as u8
    }
}

/// Decode an ATA string: each word holds two characters high byte first.
/// Trailing spaces and NULs are dropped, leading spaces kept.
pub fn ata_string(words: &[u16]) -> String {
    let mut out = String::with_capacity(words.len() * 2);
    for word in words {
        let [hi, lo] = word.to_be_bytes();
        out.push(hi as char);
        out.push(lo as char);
    }
    let trimmed = out.trim_end_matches(|c| c == ' ' || c == '\0').len();
    out.truncate(trimmed);
    out
}

impl<B: RegisterIo> Controller<B> {
    /// Issue IDENTIFY DEVICE and parse the result
    pub fn identify(&mut self) -> AtaResult<IdentifyData> {
        self.execute(&CommandDescriptor::identify())?;
        let id = IdentifyData::from_bytes(&self.buffer()[..SECTOR_SIZE]);
        log::info!("identified '{}' serial '{}', max LBA {}", id.model(), id.serial(), id.max_lba());
        Ok(id)
    }

    /// Max LBA as reported by IDENTIFY DEVICE (HPA applied)
    pub fn max_lba_from_identify(&mut self) -> AtaResult<u64> {
        Ok(self.identify()?.max_lba())
    }

    /// Max LBA from READ NATIVE MAX ADDRESS (EXT when the drive has 48-bit
    /// addressing)
    pub fn max_lba_from_native(&mut self, ext: bool) -> AtaResult<u64> {
        let outcome = self.execute(&CommandDescriptor::read_native_max(ext))?;
        Ok(if ext { outcome.output.lba48() } else { outcome.output.lba28() as u64 })
    }
}
