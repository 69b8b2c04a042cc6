//! Storage device table
//!
//! PCI configuration space is scanned elsewhere; this module takes the
//! mass-storage functions found there, maps their BARs to ATA register
//! bases, scans each channel and falls back to the legacy ports for
//! channels no PCI function claimed.

use heapless::Vec;
use serde::Serialize;

use crate::consts::*;
use crate::controller::Controller;
use crate::error::{AtaError, AtaResult};
use crate::io::{RegisterIo, RegisterMap};
use crate::types::{DeviceSelect, Register};

/// One mass-storage PCI function as reported by the bus scan
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PciStorageFunction {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
    pub class_code: u8,
    pub subclass: u8,
    pub bars: [u32; 6],
    pub interrupt_line: u8,
}

impl PciStorageFunction {
    /// IDE, ATA, SATA and "other" storage controllers can expose task-file
    /// registers
    pub fn is_ata_controller(&self) -> bool {
        self.class_code == PCI_CLASS_STORAGE
            && matches!(
                self.subclass,
                PCI_SUBCLASS_IDE | PCI_SUBCLASS_ATA | PCI_SUBCLASS_SATA | PCI_SUBCLASS_OTHER
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Channel {
    Primary,
    Secondary,
}

/// Register bases and interrupt line of one channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelPorts {
    pub channel: Channel,
    pub command_base: u16,
    pub control_base: u16,
    pub bus_master: Option<u16>,
    pub irq: u8,
}

impl ChannelPorts {
    pub fn register_map(&self) -> RegisterMap {
        RegisterMap::io(self.command_base, self.control_base)
    }
}

/// Map a function's BARs for `channel`: BAR0/1 or BAR2/3 for the task file,
/// BAR4 for the bus master (+8 on the secondary channel). Unprogrammed BARs
/// yield `None`.
pub fn map_pci_channel(func: &PciStorageFunction, channel: Channel) -> Option<ChannelPorts> {
    let (cmd, ctrl) = match channel {
        Channel::Primary => (func.bars[0], func.bars[1]),
        Channel::Secondary => (func.bars[2], func.bars[3]),
    };
    let bm = func.bars[4];
    let word = |bar: u32| bar & 0xFFFF;
    if [cmd, ctrl, bm].iter().any(|&bar| word(bar) == PCI_BAR_UNMAPPED) {
        return None;
    }

    let command_base = (word(cmd) & PCI_BAR_IO_MASK) as u16;
    let control_base = ((word(ctrl) & PCI_BAR_IO_MASK) as u16).checked_sub(PCI_CTRL_ADJUST)?;
    let mut bus_master = (word(bm) & PCI_BAR_IO_MASK) as u16;
    if channel == Channel::Secondary {
        bus_master += BM_SECONDARY_OFFSET;
    }
    Some(ChannelPorts {
        channel,
        command_base,
        control_base,
        bus_master: Some(bus_master),
        irq: func.interrupt_line,
    })
}

/// The two ISA-compatible channels
pub fn legacy_channels() -> [ChannelPorts; 2] {
    [
        ChannelPorts {
            channel: Channel::Primary,
            command_base: LEGACY_PRIMARY_BASE,
            control_base: LEGACY_PRIMARY_CTRL,
            bus_master: None,
            irq: LEGACY_PRIMARY_IRQ,
        },
        ChannelPorts {
            channel: Channel::Secondary,
            command_base: LEGACY_SECONDARY_BASE,
            control_base: LEGACY_SECONDARY_CTRL,
            bus_master: None,
            irq: LEGACY_SECONDARY_IRQ,
        },
    ]
}

/// What answered at a device position after reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceKind {
    None,
    Ata,
    Atapi,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PciLocation {
    pub bus: u8,
    pub device: u8,
    pub function: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceEntry {
    pub ports: ChannelPorts,
    pub device: DeviceSelect,
    pub kind: DeviceKind,
    /// `None` for legacy-port entries
    pub pci: Option<PciLocation>,
}

impl<B: RegisterIo> Controller<B> {
    /// Detect both device positions on the channel the register map points
    /// at: a register read-back test, a software reset, then the reset
    /// signature.
    pub fn detect_devices(&mut self) -> [DeviceKind; 2] {
        let mut present = [false; 2];
        for dev in [DeviceSelect::Device0, DeviceSelect::Device1] {
            let bus = self.bus_mut();
            bus.write(Register::DeviceHead, ATA_DH_OBSOLETE | dev.bit());
            for (sc, sn) in [(0x55, 0xAA), (0xAA, 0x55), (0x55, 0xAA)] {
                bus.write(Register::SectorCount, sc);
                bus.write(Register::SectorNumber, sn);
            }
            present[dev.index()] = bus.read(Register::SectorCount) == 0x55
                && bus.read(Register::SectorNumber) == 0xAA;
        }

        let mut kinds = [DeviceKind::None; 2];
        if !present.iter().any(|&p| p) {
            return kinds;
        }
        if let Err(e) = self.soft_reset() {
            log::debug!("detection reset: {}", e);
        }

        for dev in [DeviceSelect::Device0, DeviceSelect::Device1] {
            if !present[dev.index()] {
                continue;
            }
            let bus = self.bus_mut();
            bus.write(Register::DeviceHead, ATA_DH_OBSOLETE | dev.bit());
            let sc = bus.read(Register::SectorCount);
            let sn = bus.read(Register::SectorNumber);
            if sc != 0x01 || sn != 0x01 {
                kinds[dev.index()] = DeviceKind::Unknown;
                continue;
            }
            let cl = bus.read(Register::CylinderLow);
            let ch = bus.read(Register::CylinderHigh);
            let status = bus.read(Register::STATUS);
            kinds[dev.index()] = match (cl, ch) {
                (0x14, 0xEB) => DeviceKind::Atapi,
                (0x00, 0x00) if status != 0 => DeviceKind::Ata,
                _ => DeviceKind::Unknown,
            };
        }
        let current = self.device();
        self.bus_mut().write(Register::DeviceHead, ATA_DH_OBSOLETE | current.bit());
        kinds
    }
}

/// Every ATA device found by the last rescan, and which one is active
#[derive(Debug, Default)]
pub struct DeviceTable {
    entries: Vec<DeviceEntry, MAX_STORAGE_DEVICES>,
    active: Option<usize>,
}

impl DeviceTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[DeviceEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&DeviceEntry> {
        self.entries.get(index)
    }

    pub fn active(&self) -> Option<usize> {
        self.active
    }

    pub fn active_entry(&self) -> Option<&DeviceEntry> {
        self.active.and_then(|i| self.entries.get(i))
    }

    pub fn push(&mut self, entry: DeviceEntry) -> AtaResult<()> {
        self.entries.push(entry).map_err(|_| {
            log::warn!("device table full, dropping {:?}", entry.ports);
            AtaError::InvalidArgument
        })
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.active = None;
    }

    /// Scan one channel and add an entry for every ATA device on it
    fn scan_channel<B: RegisterIo>(
        &mut self,
        ctl: &mut Controller<B>,
        ports: ChannelPorts,
        pci: Option<PciLocation>,
    ) -> usize {
        ctl.set_register_map(ports.register_map());
        ctl.set_bus_master(ports.bus_master);
        let kinds = ctl.detect_devices();
        let mut found = 0;
        for (dev, kind) in [DeviceSelect::Device0, DeviceSelect::Device1].into_iter().zip(kinds) {
            if kind != DeviceKind::Ata {
                continue;
            }
            log::info!(
                "ATA device at 0x{:04X}/0x{:04X} {:?} irq {}",
                ports.command_base,
                ports.control_base,
                dev,
                ports.irq
            );
            if self.push(DeviceEntry { ports, device: dev, kind, pci }).is_ok() {
                found += 1;
            }
        }
        found
    }

    /// Rebuild the table from the PCI functions and then the legacy ports
    /// not already claimed. Probing uses the short scan timeout. The first
    /// entry found becomes active.
    pub fn rescan<B: RegisterIo>(
        &mut self,
        ctl: &mut Controller<B>,
        functions: &[PciStorageFunction],
    ) -> AtaResult<usize> {
        self.clear();
        let saved_timeout = ctl.config().command_timeout_secs;
        ctl.config_mut().command_timeout_secs = ctl.config().scan_timeout_secs;

        for func in functions.iter().filter(|f| f.is_ata_controller()) {
            let location = PciLocation { bus: func.bus, device: func.device, function: func.function };
            for channel in [Channel::Primary, Channel::Secondary] {
                if let Some(ports) = map_pci_channel(func, channel) {
                    self.scan_channel(ctl, ports, Some(location));
                }
            }
        }
        for ports in legacy_channels() {
            let claimed = self.entries.iter().any(|e| e.ports.command_base == ports.command_base);
            if !claimed {
                self.scan_channel(ctl, ports, None);
            }
        }

        ctl.config_mut().command_timeout_secs = saved_timeout;
        log::info!("rescan found {} ATA devices", self.entries.len());
        if self.entries.is_empty() {
            return Err(AtaError::NoDevice);
        }
        self.set_active(ctl, 0)?;
        Ok(self.entries.len())
    }

    /// Point the controller at entry `index`: register map, bus master,
    /// device select and, in interrupt mode, the IRQ line.
    pub fn set_active<B: RegisterIo>(
        &mut self,
        ctl: &mut Controller<B>,
        index: usize,
    ) -> AtaResult<&DeviceEntry> {
        let entry = *self.entries.get(index).ok_or(AtaError::NoDevice)?;
        ctl.set_register_map(entry.ports.register_map());
        ctl.set_bus_master(entry.ports.bus_master);
        ctl.set_device(entry.device);
        if ctl.config().use_interrupts && ctl.interrupts().irq() != entry.ports.irq {
            ctl.disable_interrupts();
            ctl.enable_interrupts(entry.ports.irq, false)?;
        }
        self.active = Some(index);
        log::debug!("active device {} ({:?})", index, entry.device);
        Ok(&self.entries[index])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sim_controller, SimDevice};

    fn ide_function(bars: [u32; 6]) -> PciStorageFunction {
        PciStorageFunction {
            bus: 0,
            device: 31,
            function: 1,
            class_code: PCI_CLASS_STORAGE,
            subclass: PCI_SUBCLASS_IDE,
            bars,
            interrupt_line: 11,
        }
    }

    #[test]
    fn test_pci_bar_mapping() {
        let func = ide_function([0xD001, 0xD105, 0xD201, 0xD305, 0xC001, 0]);
        let primary = map_pci_channel(&func, Channel::Primary).unwrap();
        assert_eq!(primary.command_base, 0xD000);
        assert_eq!(primary.control_base, 0xD100);
        assert_eq!(primary.bus_master, Some(0xC000));
        assert_eq!(primary.irq, 11);

        let secondary = map_pci_channel(&func, Channel::Secondary).unwrap();
        assert_eq!(secondary.command_base, 0xD200);
        assert_eq!(secondary.control_base, 0xD300);
        assert_eq!(secondary.bus_master, Some(0xC008));

        let unmapped = ide_function([0xD001, 0xD105, 0xFFFF, 0xD305, 0xC001, 0]);
        assert!(map_pci_channel(&unmapped, Channel::Secondary).is_none());
        assert!(map_pci_channel(&unmapped, Channel::Primary).is_some());
    }

    #[test]
    fn test_controller_filter() {
        let mut func = ide_function([0; 6]);
        assert!(func.is_ata_controller());
        func.subclass = 0x08;
        assert!(!func.is_ata_controller());
    }

    #[test]
    fn test_detect_finds_device0_only() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        assert_eq!(ctl.detect_devices(), [DeviceKind::Ata, DeviceKind::None]);
    }

    #[test]
    fn test_rescan_prefers_pci_over_legacy() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        // A native-mode function whose primary channel sits on the legacy ports.
        let func = ide_function([0x1F1, 0x3F5, 0x171, 0x375, 0xC001, 0]);
        let mut table = DeviceTable::new();
        assert_eq!(table.rescan(&mut ctl, &[func]).unwrap(), 1);

        let entry = table.get(0).unwrap();
        assert_eq!(entry.ports.command_base, 0x1F0);
        assert_eq!(entry.ports.control_base, 0x3F0);
        assert_eq!(entry.ports.bus_master, Some(0xC000));
        assert_eq!(entry.device, DeviceSelect::Device0);
        assert!(entry.pci.is_some());
        assert_eq!(table.active(), Some(0));
        assert_eq!(ctl.bus_master().map(|bm| bm.base()), Some(0xC000));
        assert_eq!(ctl.config().command_timeout_secs, DEFAULT_COMMAND_TIMEOUT_SECS);
    }

    #[test]
    fn test_rescan_legacy_fallback() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        let mut table = DeviceTable::new();
        assert_eq!(table.rescan(&mut ctl, &[]).unwrap(), 1);
        let entry = table.active_entry().unwrap();
        assert_eq!(entry.ports.irq, LEGACY_PRIMARY_IRQ);
        assert_eq!(entry.ports.bus_master, None);
        assert!(entry.pci.is_none());
        assert!(ctl.identify().is_ok(), "controller left on the active entry");
    }

    #[test]
    fn test_set_active_bounds() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        let mut table = DeviceTable::new();
        assert!(matches!(table.set_active(&mut ctl, 0), Err(AtaError::NoDevice)));
    }
}
