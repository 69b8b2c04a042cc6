//! ATA command-block driver and drive diagnostics
//!
//! Drives one ATA channel at a time through its command-block registers,
//! in port I/O or memory-mapped space, and keeps a record of everything it
//! sends:
//!
//! - PIO data-in, data-out and non-data protocols, polled or interrupt driven
//! - ISA (8237) and PCI bus-master DMA through a platform trait
//! - Identify, Host Protected Area and Device Configuration Overlay
//! - the Security feature set, including monitored secure erase
//! - SMART attribute data
//! - a command history and a register access trace
//! - device discovery on PCI and legacy channels, plus a small command shell
//!
//! Hardware access sits behind [`io::RegisterIo`]; the `sim` feature exports
//! a simulated drive for harnesses without hardware.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod consts;
pub mod error;
pub mod logger;
pub mod types;

pub mod buffer;
pub mod command;
pub mod config;
pub mod dma;
pub mod history;
pub mod io;
pub mod irq;
pub mod timer;

pub mod controller;
pub mod dco;
pub mod device;
pub mod erase;
pub mod hpa;
pub mod identify;
pub mod sectors;
pub mod security;
pub mod smart;

pub mod shell;

#[cfg(any(test, feature = "sim"))]
pub mod sim;

pub use buffer::DataBuffer;
pub use command::{CommandDescriptor, CommandOutcome};
pub use config::{AtaConfig, MemoryDataOption, TransferWidth};
pub use controller::Controller;
pub use dco::DcoData;
pub use device::{DeviceEntry, DeviceKind, DeviceTable, PciStorageFunction};
pub use dma::{DmaEngine, DmaPlatform};
pub use erase::{EraseMonitor, EraseProgress};
pub use error::{AtaError, AtaResult, ConfigError, ErrorCode, MismatchKind};
pub use identify::IdentifyData;
pub use io::{RegisterIo, RegisterMap};
pub use irq::{InterruptPlatform, Pic8259Platform};
pub use security::{PasswordKind, SecurityLevel, SecurityState, SecurityStatus};
pub use smart::{SmartAttribute, SmartData};
pub use timer::{BiosTicks, ManualTicks, TickSource};
pub use types::{Address, DeviceSelect, Register};
