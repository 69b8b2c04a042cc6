#![allow(unused)]

// Shared data buffer
pub const BUFFER_SIZE: usize = 32768;
pub const SECTOR_SIZE: usize = 512;
pub const LBA28_MAX: u64 = 0x0FFF_FFFF;
pub const LBA48_MAX: u64 = 0xFFFF_FFFF_FFFF;
pub const MAX_SECTORS_PER_COMMAND: u32 = 256;

// Largest block moved by one rep-string instruction
pub const PIO_CHUNK_WORDS: usize = 16384;

// BIOS timer runs at 18.2 Hz; whole ticks are used for timeouts
pub const TICKS_PER_SECOND: u32 = 18;
pub const DEFAULT_COMMAND_TIMEOUT_SECS: u32 = 20;
pub const SCAN_TIMEOUT_SECS: u32 = 1;

// Device table
pub const MAX_STORAGE_DEVICES: usize = 16;
pub const HISTORY_CAPACITY: usize = 20;
pub const REGISTER_TRACE_CAPACITY: usize = 256;

// Command block register offsets (from the command base)
pub const ATA_REG_DATA: u8 = 0x00;      // Data register
pub const ATA_REG_ERROR: u8 = 0x01;     // Error register (read)
pub const ATA_REG_FEATURES: u8 = 0x01;  // Features register (write)
pub const ATA_REG_SECCOUNT: u8 = 0x02;  // Sector count
pub const ATA_REG_SECNUM: u8 = 0x03;    // Sector number / LBA 7:0
pub const ATA_REG_CYL_LOW: u8 = 0x04;   // Cylinder low / LBA 15:8
pub const ATA_REG_CYL_HIGH: u8 = 0x05;  // Cylinder high / LBA 23:16
pub const ATA_REG_DEVHEAD: u8 = 0x06;   // Device/head
pub const ATA_REG_STATUS: u8 = 0x07;    // Status (read)
pub const ATA_REG_COMMAND: u8 = 0x07;   // Command (write)

// Control block register offsets (from the control base)
pub const ATA_REG_ALTSTATUS: u8 = 0x06; // Alternate status (read)
pub const ATA_REG_CONTROL: u8 = 0x06;   // Device control (write)
pub const ATA_REG_DRVADDR: u8 = 0x07;   // Drive address

// Memory-mapped (PCMCIA) register window
pub const MEM_CMD_BASE: u32 = 0x0000;
pub const MEM_CTRL_BASE: u32 = 0x0008;
pub const MEM_BURST_BASE: u32 = 0x0400;
pub const MEM_BURST_MASK_BYTE: u32 = 0x03ff;
pub const MEM_BURST_MASK_WORD: u32 = 0x03fe;

// Device/head register bits
pub const ATA_DH_OBSOLETE: u8 = 0xA0;
pub const ATA_DH_LBA: u8 = 0x40;
pub const ATA_DH_DEV1: u8 = 0x10;

// ATA Status Register bits
pub const ATA_SR_BSY: u8 = 0x80;    // Busy
pub const ATA_SR_DRDY: u8 = 0x40;   // Drive ready
pub const ATA_SR_DF: u8 = 0x20;     // Drive write fault
pub const ATA_SR_DSC: u8 = 0x10;    // Drive seek complete
pub const ATA_SR_DRQ: u8 = 0x08;    // Data request ready
pub const ATA_SR_CORR: u8 = 0x04;   // Corrected data
pub const ATA_SR_IDX: u8 = 0x02;    // Index
pub const ATA_SR_ERR: u8 = 0x01;    // Error

// ATA Error Register bits
pub const ATA_ER_ICRC: u8 = 0x80;   // Interface CRC
pub const ATA_ER_UNC: u8 = 0x40;    // Uncorrectable data
pub const ATA_ER_MC: u8 = 0x20;     // Media changed
pub const ATA_ER_IDNF: u8 = 0x10;   // ID not found
pub const ATA_ER_MCR: u8 = 0x08;    // Media change request
pub const ATA_ER_ABRT: u8 = 0x04;   // Command aborted
pub const ATA_ER_TK0NF: u8 = 0x02;  // Track 0 not found
pub const ATA_ER_AMNF: u8 = 0x01;   // No address mark

// Device control bits
pub const ATA_DC_HOB: u8 = 0x80;    // High order byte readback
pub const ATA_DC_SRST: u8 = 0x04;   // Software reset
pub const ATA_DC_NIEN: u8 = 0x02;   // Interrupts disabled

// ATA Commands
pub const ATA_CMD_NOP: u8 = 0x00;
pub const ATA_CMD_DEVICE_RESET: u8 = 0x08;
pub const ATA_CMD_RECALIBRATE: u8 = 0x10;
pub const ATA_CMD_READ_SECTORS: u8 = 0x20;
pub const ATA_CMD_READ_SECTORS_EXT: u8 = 0x24;
pub const ATA_CMD_READ_DMA_EXT: u8 = 0x25;
pub const ATA_CMD_READ_NATIVE_MAX_EXT: u8 = 0x27;
pub const ATA_CMD_READ_MULTIPLE_EXT: u8 = 0x29;
pub const ATA_CMD_READ_LOG_EXT: u8 = 0x2F;
pub const ATA_CMD_WRITE_SECTORS: u8 = 0x30;
pub const ATA_CMD_WRITE_SECTORS_EXT: u8 = 0x34;
pub const ATA_CMD_WRITE_DMA_EXT: u8 = 0x35;
pub const ATA_CMD_SET_MAX_EXT: u8 = 0x37;
pub const ATA_CMD_WRITE_MULTIPLE_EXT: u8 = 0x39;
pub const ATA_CMD_WRITE_VERIFY: u8 = 0x3C;
pub const ATA_CMD_WRITE_DMA_FUA_EXT: u8 = 0x3D;
pub const ATA_CMD_WRITE_LOG_EXT: u8 = 0x3F;
pub const ATA_CMD_READ_VERIFY: u8 = 0x40;
pub const ATA_CMD_READ_VERIFY_EXT: u8 = 0x42;
pub const ATA_CMD_SEEK: u8 = 0x70;
pub const ATA_CMD_EXECUTE_DIAGNOSTIC: u8 = 0x90;
pub const ATA_CMD_INIT_DEVICE_PARAMS: u8 = 0x91;
pub const ATA_CMD_PACKET: u8 = 0xA0;
pub const ATA_CMD_IDENTIFY_PACKET: u8 = 0xA1;
pub const ATA_CMD_SMART: u8 = 0xB0;
pub const ATA_CMD_DCO: u8 = 0xB1;
pub const ATA_CMD_READ_MULTIPLE: u8 = 0xC4;
pub const ATA_CMD_WRITE_MULTIPLE: u8 = 0xC5;
pub const ATA_CMD_SET_MULTIPLE: u8 = 0xC6;
pub const ATA_CMD_READ_DMA: u8 = 0xC8;
pub const ATA_CMD_WRITE_DMA: u8 = 0xCA;
pub const ATA_CMD_WRITE_MULTIPLE_FUA_EXT: u8 = 0xCE;
pub const ATA_CMD_STANDBY_IMMEDIATE: u8 = 0xE0;
pub const ATA_CMD_IDLE_IMMEDIATE: u8 = 0xE1;
pub const ATA_CMD_STANDBY: u8 = 0xE2;
pub const ATA_CMD_IDLE: u8 = 0xE3;
pub const ATA_CMD_READ_BUFFER: u8 = 0xE4;
pub const ATA_CMD_CHECK_POWER_MODE: u8 = 0xE5;
pub const ATA_CMD_SLEEP: u8 = 0xE6;
pub const ATA_CMD_CACHE_FLUSH: u8 = 0xE7;
pub const ATA_CMD_WRITE_BUFFER: u8 = 0xE8;
pub const ATA_CMD_CACHE_FLUSH_EXT: u8 = 0xEA;
pub const ATA_CMD_IDENTIFY: u8 = 0xEC;
pub const ATA_CMD_SET_FEATURES: u8 = 0xEF;
pub const ATA_CMD_SECURITY_SET_PASSWORD: u8 = 0xF1;
pub const ATA_CMD_SECURITY_UNLOCK: u8 = 0xF2;
pub const ATA_CMD_SECURITY_ERASE_PREPARE: u8 = 0xF3;
pub const ATA_CMD_SECURITY_ERASE_UNIT: u8 = 0xF4;
pub const ATA_CMD_SECURITY_FREEZE_LOCK: u8 = 0xF5;
pub const ATA_CMD_SECURITY_DISABLE: u8 = 0xF6;
pub const ATA_CMD_READ_NATIVE_MAX: u8 = 0xF8;
pub const ATA_CMD_SET_MAX: u8 = 0xF9;

// DEVICE CONFIGURATION OVERLAY features
pub const DCO_RESTORE: u8 = 0xC0;
pub const DCO_FREEZE_LOCK: u8 = 0xC1;
pub const DCO_IDENTIFY: u8 = 0xC2;
pub const DCO_SET: u8 = 0xC3;

// SMART features and signature
pub const SMART_READ_DATA: u8 = 0xD0;
pub const SMART_READ_THRESHOLDS: u8 = 0xD1;
pub const SMART_ENABLE_OPERATIONS: u8 = 0xD8;
pub const SMART_DISABLE_OPERATIONS: u8 = 0xD9;
pub const SMART_RETURN_STATUS: u8 = 0xDA;
pub const SMART_READ_LOG: u8 = 0xD5;
pub const SMART_WRITE_LOG: u8 = 0xD6;
pub const SMART_LBA_SIGNATURE: u32 = 0x00C2_4F00;
pub const SMART_CYL_SIGNATURE: u16 = 0xC24F;
pub const SMART_THRESHOLD_EXCEEDED: u16 = 0x2CF4;

// SET FEATURES subcommands
pub const SETF_TRANSFER_MODE: u8 = 0x03;
pub const SETF_UDMA_MODE_BASE: u8 = 0x40;

// Identify Device word offsets
pub const ID_WORD_SERIAL: usize = 10;
pub const ID_SERIAL_WORDS: usize = 10;
pub const ID_WORD_FIRMWARE: usize = 23;
pub const ID_FIRMWARE_WORDS: usize = 4;
pub const ID_WORD_MODEL: usize = 27;
pub const ID_MODEL_WORDS: usize = 20;
pub const ID_WORD_MAX_LBA: usize = 60;
pub const ID_WORD_COMMAND_SET_1: usize = 82;
pub const ID_WORD_COMMAND_SET_2: usize = 83;
pub const ID_WORD_UDMA: usize = 88;
pub const ID_WORD_ERASE_TIME: usize = 89;
pub const ID_WORD_ENHANCED_ERASE_TIME: usize = 90;
pub const ID_WORD_MAX_LBA_EXT: usize = 100;
pub const ID_WORD_SECURITY: usize = 128;

// Identify feature bits
pub const ID_CS1_SECURITY: u16 = 1 << 1;
pub const ID_CS1_HPA: u16 = 1 << 10;
pub const ID_CS2_LBA48: u16 = 1 << 10;
pub const ID_CS2_DCO: u16 = 1 << 11;

// Security word (Identify word 128)
pub const SEC_SUPPORTED: u16 = 0x0001;
pub const SEC_ENABLED: u16 = 0x0002;
pub const SEC_LOCKED: u16 = 0x0004;
pub const SEC_FROZEN: u16 = 0x0008;
pub const SEC_COUNT_EXPIRED: u16 = 0x0010;
pub const SEC_ENHANCED_ERASE: u16 = 0x0020;
pub const SEC_LEVEL_MAX: u16 = 0x0100;

pub const DEFAULT_ERASE_MINUTES: u32 = 5 * 60;
pub const ERASE_HARD_LIMIT_SECS: u32 = 12 * 60 * 60;
pub const ERASE_POLL_INTERVAL_SECS: u32 = 10;

// DCO data structure
pub const DCO_BYTE_MAX_LBA: usize = 6;
pub const DCO_BYTE_MAX_LBA_HIGH: usize = 10;
pub const DCO_BYTE_FEATURES: usize = 14;
pub const DCO_SECURITY_BIT: u8 = 0x08;
pub const DCO_CHECKSUM_BYTE: usize = 511;

// ISA DMA controller (second 8237, 16-bit channels)
pub const ISA_DMA_STATUS: u16 = 0xD0;
pub const ISA_DMA_MASK: u16 = 0xD4;
pub const ISA_DMA_MODE: u16 = 0xD6;
pub const ISA_DMA_FLIPFLOP: u16 = 0xD8;
pub const ISA_DMA_DISABLE: u8 = 0x04;
pub const ISA_MODE_DEMAND: u8 = 0x00;
pub const ISA_MODE_MEMW: u8 = 0x04;     // Device to memory
pub const ISA_MODE_MEMR: u8 = 0x08;     // Memory to device
pub const ISA_DMA_BOUNDARY_MASK: u32 = 0x000E_0000;
pub const ISA_DMA_BOUNDARY: u32 = 0x0002_0000;

// Legacy channel bases
pub const LEGACY_PRIMARY_BASE: u16 = 0x1F0;
pub const LEGACY_PRIMARY_CTRL: u16 = 0x3F0;
pub const LEGACY_PRIMARY_IRQ: u8 = 14;
pub const LEGACY_SECONDARY_BASE: u16 = 0x170;
pub const LEGACY_SECONDARY_CTRL: u16 = 0x370;
pub const LEGACY_SECONDARY_IRQ: u8 = 15;

// Bus-master IDE registers (offsets from BMIDE base)
pub const BM_COMMAND: u16 = 0x00;
pub const BM_STATUS: u16 = 0x02;
pub const BM_PRD_ADDR: u16 = 0x04;
pub const BM_CR_START: u8 = 0x01;
pub const BM_CR_READ: u8 = 0x08;        // Device to memory
pub const BM_SR_ACTIVE: u8 = 0x01;
pub const BM_SR_ERROR: u8 = 0x02;
pub const BM_SR_INT: u8 = 0x04;
pub const BM_SECONDARY_OFFSET: u16 = 0x08;
pub const PRD_EOT: u16 = 0x8000;
pub const PRD_MAX_BYTES: u32 = 0x1_0000;

// 8259 PICs
pub const PIC_EOI: u8 = 0x20;
pub const PIC_CASCADE_IRQ: u8 = 2;

// PCI mass storage
pub const PCI_CLASS_STORAGE: u8 = 0x01;
pub const PCI_SUBCLASS_IDE: u8 = 0x01;
pub const PCI_SUBCLASS_ATA: u8 = 0x05;
pub const PCI_SUBCLASS_SATA: u8 = 0x06;
pub const PCI_SUBCLASS_OTHER: u8 = 0x80;
pub const PCI_BAR_UNMAPPED: u32 = 0xFFFF;
pub const PCI_BAR_IO_MASK: u32 = 0xFFFE;
pub const PCI_CTRL_ADJUST: u16 = 4;
