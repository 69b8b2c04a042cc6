//! ATA Driver Error Types
//!
//! Low-level layers report a numeric [`ErrorCode`]; the dispatch layer
//! classifies it together with the final status and error registers into an
//! [`AtaError`], which is what high-level operations and callers see.

use core::fmt;

use serde::Serialize;

use crate::consts::*;
use crate::types::InputRegisters;

/// Raw error code reported by the register, PIO and DMA layers.
///
/// Zero means no error. The values are stable so a caller can print them
/// next to the status and error registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ErrorCode(pub u8);

impl ErrorCode {
    pub const NONE: ErrorCode = ErrorCode(0);

    // Soft reset
    pub const RESET_DEV0_BUSY: ErrorCode = ErrorCode(1);
    pub const RESET_DEV1_BUSY: ErrorCode = ErrorCode(2);
    pub const RESET_NO_DEVICE: ErrorCode = ErrorCode(3);

    // Device selection
    pub const SELECT_TIMEOUT: ErrorCode = ErrorCode(11);

    // Command completion
    pub const BAD_STATUS: ErrorCode = ErrorCode(21);
    pub const COMPLETION_TIMEOUT: ErrorCode = ErrorCode(22);
    pub const BAD_FINAL_STATUS: ErrorCode = ErrorCode(23);
    pub const DRQ_MISSING: ErrorCode = ErrorCode(24);
    pub const DRQ_STUCK: ErrorCode = ErrorCode(25);

    // ISA DMA
    pub const TRANSFER_TOO_LARGE: ErrorCode = ErrorCode(61);
    /// Address does not fit its addressing scheme; nothing was sent
    pub const LBA_OUT_OF_RANGE: ErrorCode = ErrorCode(62);
    pub const ISA_NO_CHANNEL: ErrorCode = ErrorCode(70);
    /// Command ended before terminal count, or terminal count never seen
    pub const ISA_EARLY_COMPLETION: ErrorCode = ErrorCode(71);
    pub const ISA_FIRST_PART_TIMEOUT: ErrorCode = ErrorCode(72);
    pub const ISA_COMPLETION_TIMEOUT: ErrorCode = ErrorCode(73);
    pub const ISA_BAD_FINAL_STATUS: ErrorCode = ErrorCode(74);

    // Bus-master DMA
    pub const BM_NOT_CONFIGURED: ErrorCode = ErrorCode(80);
    pub const BM_STILL_ACTIVE: ErrorCode = ErrorCode(81);
    pub const BM_ENGINE_ERROR: ErrorCode = ErrorCode(82);
    pub const BM_TIMEOUT: ErrorCode = ErrorCode(83);
    pub const BM_BAD_FINAL_STATUS: ErrorCode = ErrorCode(84);

    // DMA platform
    pub const NO_DMA_PLATFORM: ErrorCode = ErrorCode(85);
    /// Buffer or PRD table has no address the engine can reach
    pub const DMA_ADDRESS_UNREACHABLE: ErrorCode = ErrorCode(86);

    pub const fn is_error(self) -> bool {
        self.0 != 0
    }

    pub const fn is_timeout(self) -> bool {
        matches!(
            self,
            ErrorCode::SELECT_TIMEOUT
                | ErrorCode::COMPLETION_TIMEOUT
                | ErrorCode::ISA_FIRST_PART_TIMEOUT
                | ErrorCode::ISA_COMPLETION_TIMEOUT
                | ErrorCode::BM_TIMEOUT
                | ErrorCode::RESET_DEV0_BUSY
                | ErrorCode::RESET_DEV1_BUSY
        )
    }

    /// Map a low-level code and the final registers into the error taxonomy.
    ///
    /// Returns `None` when the command completed cleanly.
    pub fn classify(self, status: u8, error: u8) -> Option<AtaError> {
        if self.is_timeout() {
            return Some(AtaError::Timeout { code: self });
        }
        if self == ErrorCode::TRANSFER_TOO_LARGE {
            return Some(AtaError::TransferSizeExceeded {
                requested: 0,
                limit: BUFFER_SIZE as u32,
            });
        }
        if self == ErrorCode::LBA_OUT_OF_RANGE {
            return Some(AtaError::InvalidArgument);
        }
        if self == ErrorCode::ISA_NO_CHANNEL || self == ErrorCode::BM_NOT_CONFIGURED {
            return Some(AtaError::Configuration(ConfigError::NoDmaChannel));
        }
        if self == ErrorCode::NO_DMA_PLATFORM || self == ErrorCode::DMA_ADDRESS_UNREACHABLE {
            return Some(AtaError::NoDmaPlatform);
        }
        if status & (ATA_SR_ERR | ATA_SR_DF) != 0 {
            return Some(AtaError::DeviceError { status, error });
        }
        if self.is_error() {
            return Some(AtaError::ProtocolViolation { code: self });
        }
        None
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Setup-time configuration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConfigError {
    /// Interrupt handling was already enabled
    InterruptsAlreadyEnabled,
    /// IRQ outside 1..=15 or the cascade line
    InvalidIrq(u8),
    /// Bus-master status address is in the motherboard range
    InvalidBusMasterAddress(u16),
    /// Shared IRQ requested without a bus-master status register to test
    SharedIrqWithoutBusMaster,
    /// ATA status address is in the motherboard range
    InvalidAtaAddress(u16),
    /// ISA DMA channel other than 0, 5, 6 or 7
    InvalidDmaChannel(u8),
    /// DMA requested but no channel or bus master is configured
    NoDmaChannel,
    /// Transfer width other than 8, 16 or 32
    InvalidTransferWidth(u8),
}

impl ConfigError {
    /// Numeric value returned by the interrupt enable routine.
    pub fn code(&self) -> u8 {
        match self {
            ConfigError::InterruptsAlreadyEnabled => 1,
            ConfigError::InvalidIrq(_) => 2,
            ConfigError::InvalidBusMasterAddress(_) => 3,
            ConfigError::SharedIrqWithoutBusMaster => 4,
            ConfigError::InvalidAtaAddress(_) => 5,
            ConfigError::InvalidDmaChannel(_) => 6,
            ConfigError::NoDmaChannel => 7,
            ConfigError::InvalidTransferWidth(_) => 8,
        }
    }
}

/// Post-condition readbacks that did not match the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MismatchKind {
    /// Requested capacity is not below the factory maximum
    CapacityNotBelowFactory { requested: u64, factory: u64 },
    /// Native max read back after a DCO set differs from the request
    CapacityReadback { expected: u64, actual: u64 },
    /// Security feature still locked after the unlock attempts
    StillLocked,
    /// Security still enabled after disable attempts
    StillEnabled,
    /// Password set but security did not become enabled
    NotEnabled,
    /// Data structure checksum did not sum to zero
    Checksum { stored: u8, computed: u8 },
}

/// ATA driver error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AtaError {
    /// Unexpected status bits at a protocol checkpoint
    ProtocolViolation { code: ErrorCode },

    /// Command did not complete in time
    Timeout { code: ErrorCode },

    /// ERR or DF set; the error register holds the cause
    DeviceError { status: u8, error: u8 },

    /// Request larger than the data buffer or hardware limit
    TransferSizeExceeded { requested: u32, limit: u32 },

    /// Invalid IRQ, DMA channel or address at setup time
    Configuration(ConfigError),

    /// Operation did not take effect as verified by a readback
    Mismatch(MismatchKind),

    /// No active device selected
    NoDevice,

    /// DMA requested without a platform that can provide physical addresses
    NoDmaPlatform,

    /// Invalid parameters passed to function
    InvalidArgument,

    /// Device does not support the requested feature set
    Unsupported,

    /// Erase exceeded the hard time limit and was abandoned
    Abandoned,
}

impl AtaError {
    /// Check if error is recoverable
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AtaError::DeviceError { .. } | AtaError::Mismatch(MismatchKind::StillLocked)
        )
    }

    /// Check if error indicates hardware failure
    pub fn is_hardware_error(&self) -> bool {
        matches!(
            self,
            AtaError::ProtocolViolation { .. } | AtaError::Timeout { .. } | AtaError::DeviceError { .. }
        )
    }

    /// Timeouts leave the device in an unknown state; the policy is a reset.
    pub fn needs_reset(&self) -> bool {
        matches!(self, AtaError::Timeout { .. } | AtaError::Abandoned)
    }

    /// Numeric low-level code when one is attached
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AtaError::ProtocolViolation { code } | AtaError::Timeout { code } => Some(*code),
            _ => None,
        }
    }

    /// Get error severity level
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            AtaError::Timeout { .. } | AtaError::Abandoned => ErrorSeverity::Critical,
            AtaError::ProtocolViolation { .. } | AtaError::DeviceError { .. } => ErrorSeverity::Error,
            AtaError::Mismatch(_) | AtaError::TransferSizeExceeded { .. } => ErrorSeverity::Warning,
            AtaError::Configuration(_) | AtaError::NoDmaPlatform | AtaError::NoDevice => {
                ErrorSeverity::Warning
            }
            AtaError::InvalidArgument | AtaError::Unsupported => ErrorSeverity::Info,
        }
    }
}

/// Error severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Informational - request rejected before touching the device
    Info,
    /// Warning - operation failed but the device state is known
    Warning,
    /// Serious error - device reported failure
    Error,
    /// Device state unknown, reset required
    Critical,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InterruptsAlreadyEnabled => write!(f, "interrupts already enabled"),
            ConfigError::InvalidIrq(irq) => write!(f, "invalid IRQ {}", irq),
            ConfigError::InvalidBusMasterAddress(a) => write!(f, "invalid BMIDE address 0x{:04X}", a),
            ConfigError::SharedIrqWithoutBusMaster => write!(f, "shared IRQ needs a BMIDE address"),
            ConfigError::InvalidAtaAddress(a) => write!(f, "invalid ATA status address 0x{:04X}", a),
            ConfigError::InvalidDmaChannel(c) => write!(f, "invalid ISA DMA channel {}", c),
            ConfigError::NoDmaChannel => write!(f, "no DMA channel configured"),
            ConfigError::InvalidTransferWidth(w) => write!(f, "invalid transfer width {}", w),
        }
    }
}

impl fmt::Display for AtaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtaError::ProtocolViolation { code } =>
                write!(f, "Unexpected status at protocol checkpoint (code {})", code),
            AtaError::Timeout { code } =>
                write!(f, "Command timeout (code {})", code),
            AtaError::DeviceError { status, error } =>
                write!(f, "Device reported error: status 0x{:02X}, error 0x{:02X}", status, error),
            AtaError::TransferSizeExceeded { requested, limit } =>
                write!(f, "Transfer of {} bytes exceeds limit of {}", requested, limit),
            AtaError::Configuration(e) =>
                write!(f, "Configuration error: {}", e),
            AtaError::Mismatch(kind) =>
                write!(f, "Readback mismatch: {:?}", kind),
            AtaError::NoDevice =>
                write!(f, "No active device"),
            AtaError::NoDmaPlatform =>
                write!(f, "No DMA-capable memory available"),
            AtaError::InvalidArgument =>
                write!(f, "Invalid parameters passed to function"),
            AtaError::Unsupported =>
                write!(f, "Feature set not supported by device"),
            AtaError::Abandoned =>
                write!(f, "Command abandoned after hard timeout; device left in current state"),
        }
    }
}

impl From<ConfigError> for AtaError {
    fn from(e: ConfigError) -> Self {
        AtaError::Configuration(e)
    }
}

/// ATA Result type alias
pub type AtaResult<T> = Result<T, AtaError>;

/// Error context for detailed error reporting
#[derive(Debug)]
pub struct ErrorContext {
    pub error: AtaError,
    pub device_index: Option<usize>,
    pub command: Option<u8>,
    pub lba: Option<u64>,
    pub sector_count: Option<u32>,
    pub registers: Option<InputRegisters>,
    pub failures: Option<u32>,
}

impl ErrorContext {
    pub fn new(error: AtaError) -> Self {
        Self {
            error,
            device_index: None,
            command: None,
            lba: None,
            sector_count: None,
            registers: None,
            failures: None,
        }
    }

    pub fn with_device(mut self, index: usize) -> Self {
        self.device_index = Some(index);
        self
    }

    pub fn with_command(mut self, command: u8, lba: u64, sectors: u32) -> Self {
        self.command = Some(command);
        self.lba = Some(lba);
        self.sector_count = Some(sectors);
        self
    }

    pub fn with_registers(mut self, registers: InputRegisters) -> Self {
        self.registers = Some(registers);
        self
    }

    pub fn with_failures(mut self, failures: u32) -> Self {
        self.failures = Some(failures);
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ATA Error: {}", self.error)?;

        if let Some(index) = self.device_index {
            write!(f, " [Device {}]", index)?;
        }

        if let Some(cmd) = self.command {
            write!(f, " [Cmd 0x{:02X}]", cmd)?;
        }

        if let Some(lba) = self.lba {
            write!(f, " [LBA 0x{:X}]", lba)?;
        }

        if let Some(sectors) = self.sector_count {
            write!(f, " [Sectors {}]", sectors)?;
        }

        if let Some(failures) = self.failures {
            write!(f, " [Failures {}]", failures)?;
        }

        Ok(())
    }
}

/// Build an [`ErrorContext`] with optional location details
#[macro_export]
macro_rules! ata_error {
    ($error:expr) => {
        $crate::error::ErrorContext::new($error)
    };
    ($error:expr, device = $dev:expr) => {
        $crate::error::ErrorContext::new($error).with_device($dev)
    };
    ($error:expr, device = $dev:expr, command = $cmd:expr) => {
        $crate::error::ErrorContext::new($error)
            .with_device($dev)
            .with_command($cmd, 0, 0)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(ErrorCode::NONE.classify(0x50, 0), None);
        assert_eq!(
            ErrorCode::BAD_FINAL_STATUS.classify(0x51, 0x04),
            Some(AtaError::DeviceError { status: 0x51, error: 0x04 })
        );
        assert_eq!(
            ErrorCode::COMPLETION_TIMEOUT.classify(0xD0, 0),
            Some(AtaError::Timeout { code: ErrorCode::COMPLETION_TIMEOUT })
        );
        assert_eq!(
            ErrorCode::DRQ_MISSING.classify(0x50, 0),
            Some(AtaError::ProtocolViolation { code: ErrorCode::DRQ_MISSING })
        );
    }

    #[test]
    fn test_timeout_is_distinct_from_device_error() {
        let timeout = ErrorCode::ISA_COMPLETION_TIMEOUT.classify(0x51, 0x04).unwrap();
        assert!(matches!(timeout, AtaError::Timeout { .. }), "timeout wins over ERR bit");
        assert!(timeout.needs_reset());
        assert_eq!(timeout.severity(), ErrorSeverity::Critical);
    }

    #[test]
    fn test_context_display() {
        let ctx = ata_error!(AtaError::InvalidArgument, device = 2).with_command(0x20, 0x10, 1);
        let text = format!("{}", ctx);
        assert!(text.contains("[Device 2]"));
        assert!(text.contains("[Cmd 0x20]"));
        assert!(text.contains("[LBA 0x10]"));
    }
}
