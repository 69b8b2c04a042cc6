//! Interrupt layer
//!
//! A session moves through **Disabled -> Armed -> Firing -> Disabled**:
//! [`InterruptManager::enable`] validates the line and unmasks it at the
//! 8259 pair, [`InterruptManager::install_handler`] swaps the vector in for
//! the duration of one command, and [`InterruptManager::disable`] must be
//! called before the owner goes away; nothing restores the vector
//! automatically.
//!
//! The handler side is [`IrqState::service`]. It only touches atomics, so the
//! dispatch loop polls [`IrqState::fired`] instead of blocking.

use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU16, AtomicU32, AtomicU8, Ordering};

use crate::consts::*;
use crate::error::ConfigError;
use crate::io::RegisterIo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqSessionState {
    Disabled,
    Armed,
    Firing,
}

/// What the low-level stub must do after [`IrqState::service`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqDisposition {
    /// Line is shared: jump to the previously installed handler
    Chain,
    /// Line is ours: acknowledge at the PIC(s)
    EndOfInterrupt,
}

/// Interrupt vector for `irq` given the master/slave PIC offsets.
pub fn vector_for(irq: u8, offsets: (u8, u8)) -> u8 {
    if irq < 8 {
        offsets.0 + irq
    } else {
        offsets.1 + (irq - 8)
    }
}

/// PIC masks with `irq` unmasked; slave lines also open the cascade input.
pub fn unmask(masks: (u8, u8), irq: u8) -> (u8, u8) {
    let (mut master, mut slave) = masks;
    if irq < 8 {
        master &= !(1 << irq);
    } else {
        master &= !(1 << PIC_CASCADE_IRQ);
        slave &= !(1 << (irq - 8));
    }
    (master, slave)
}

/// State shared between the interrupt handler and the dispatch loop
#[derive(Debug, Default)]
pub struct IrqState {
    count: AtomicU32,
    flag: AtomicU32,
    ata_status: AtomicU8,
    bm_status: AtomicU8,
    ata_status_addr: AtomicU16,
    bm_status_addr: AtomicU16,
    shared: AtomicBool,
}

impl IrqState {
    pub fn new() -> Self {
        Self::default()
    }

    fn configure(&self, bm_status_addr: u16, ata_status_addr: u16, shared: bool) {
        self.bm_status_addr.store(bm_status_addr, Ordering::SeqCst);
        self.ata_status_addr.store(ata_status_addr, Ordering::SeqCst);
        self.shared.store(shared, Ordering::SeqCst);
    }

    /// Handler body: count the interrupt, capture status, acknowledge the
    /// bus master.
    ///
    /// With a bus master configured, only interrupts that set its INT bit
    /// count as ours.
    pub fn service<B: RegisterIo>(&self, io: &mut B) -> IrqDisposition {
        self.count.fetch_add(1, Ordering::SeqCst);

        let bm = self.bm_status_addr.load(Ordering::SeqCst);
        let ata = self.ata_status_addr.load(Ordering::SeqCst) as u32;
        if bm != 0 {
            let bm_status = io.read8(bm as u32);
            self.bm_status.store(bm_status, Ordering::SeqCst);
            if bm_status & BM_SR_INT != 0 {
                self.ata_status.store(io.read8(ata), Ordering::SeqCst);
                io.write8(bm as u32, BM_SR_INT);
                self.flag.fetch_add(1, Ordering::SeqCst);
            }
        } else {
            self.ata_status.store(io.read8(ata), Ordering::SeqCst);
            self.flag.fetch_add(1, Ordering::SeqCst);
        }

        if self.shared.load(Ordering::SeqCst) {
            IrqDisposition::Chain
        } else {
            IrqDisposition::EndOfInterrupt
        }
    }

    /// Clear the completion flag before issuing a command
    pub fn reset_flag(&self) {
        self.flag.store(0, Ordering::SeqCst);
    }

    pub fn fired(&self) -> bool {
        self.flag.load(Ordering::SeqCst) != 0
    }

    /// Total interrupts seen since the handler was installed
    pub fn count(&self) -> u32 {
        self.count.load(Ordering::SeqCst)
    }

    /// ATA status captured by the last interrupt that was ours
    pub fn captured_status(&self) -> u8 {
        self.ata_status.load(Ordering::SeqCst)
    }

    pub fn captured_bm_status(&self) -> u8 {
        self.bm_status.load(Ordering::SeqCst)
    }

    fn reset_counters(&self) {
        self.count.store(0, Ordering::SeqCst);
        self.flag.store(0, Ordering::SeqCst);
    }
}

/// Interrupt controller and vector table operations the platform provides
pub trait InterruptPlatform: Send {
    fn read_masks(&mut self) -> (u8, u8);
    fn write_masks(&mut self, master: u8, slave: u8);
    /// Point `vector` at the driver's stub, remembering the old handler
    fn install(&mut self, vector: u8);
    /// Put the remembered handler back
    fn restore(&mut self, vector: u8);
    fn end_of_interrupt(&mut self, vector: u8);
    /// Transfer control to the handler that was installed before ours
    fn chain(&mut self, vector: u8);
}

/// Vector table access a kernel supplies for [`Pic8259Platform`]
pub trait VectorTable: Send {
    fn install(&mut self, vector: u8);
    fn restore(&mut self, vector: u8);
    fn chain(&mut self, vector: u8);
}

/// 8259 pair through the `pic8259` crate
pub struct Pic8259Platform<V: VectorTable> {
    pics: pic8259::ChainedPics,
    vectors: V,
}

impl<V: VectorTable> Pic8259Platform<V> {
    /// # Safety
    ///
    /// The offsets must match how the PICs are actually programmed.
    pub unsafe fn new(offsets: (u8, u8), vectors: V) -> Self {
        Self {
            pics: pic8259::ChainedPics::new(offsets.0, offsets.1),
            vectors,
        }
    }
}

impl<V: VectorTable> InterruptPlatform for Pic8259Platform<V> {
    fn read_masks(&mut self) -> (u8, u8) {
        let [master, slave] = unsafe { self.pics.read_masks() };
        (master, slave)
    }

    fn write_masks(&mut self, master: u8, slave: u8) {
        unsafe { self.pics.write_masks(master, slave) }
    }

    fn install(&mut self, vector: u8) {
        self.vectors.install(vector);
    }

    fn restore(&mut self, vector: u8) {
        self.vectors.restore(vector);
    }

    fn end_of_interrupt(&mut self, vector: u8) {
        unsafe { self.pics.notify_end_of_interrupt(vector) }
    }

    fn chain(&mut self, vector: u8) {
        self.vectors.chain(vector);
    }
}

/// Owner side of the interrupt session
pub struct InterruptManager {
    platform: Option<Box<dyn InterruptPlatform>>,
    state: Arc<IrqState>,
    offsets: (u8, u8),
    enabled: bool,
    installed: bool,
    irq: u8,
}

impl InterruptManager {
    pub fn new(offsets: (u8, u8)) -> Self {
        Self {
            platform: None,
            state: Arc::new(IrqState::new()),
            offsets,
            enabled: false,
            installed: false,
            irq: 0,
        }
    }

    pub fn with_platform(mut self, platform: Box<dyn InterruptPlatform>) -> Self {
        self.platform = Some(platform);
        self
    }

    pub fn set_platform(&mut self, platform: Box<dyn InterruptPlatform>) {
        self.platform = Some(platform);
    }

    /// Handle for the interrupt stub
    pub fn state(&self) -> Arc<IrqState> {
        Arc::clone(&self.state)
    }

    pub fn session_state(&self) -> IrqSessionState {
        match (self.enabled, self.installed) {
            (false, _) => IrqSessionState::Disabled,
            (true, false) => IrqSessionState::Armed,
            (true, true) => IrqSessionState::Firing,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn irq(&self) -> u8 {
        self.irq
    }

    pub fn vector(&self) -> u8 {
        vector_for(self.irq, self.offsets)
    }

    /// Validate and unmask `irq`.
    ///
    /// `bm_status_addr` is the bus-master status port (0 when there is no
    /// bus master); `ata_status_addr` is the ATA status register.
    pub fn enable(
        &mut self,
        irq: u8,
        bm_status_addr: u16,
        ata_status_addr: u16,
        shared: bool,
    ) -> Result<(), ConfigError> {
        if self.enabled {
            return Err(ConfigError::InterruptsAlreadyEnabled);
        }
        if !(1..=15).contains(&irq) || irq == PIC_CASCADE_IRQ {
            return Err(ConfigError::InvalidIrq(irq));
        }
        if bm_status_addr != 0 && bm_status_addr < 0x100 {
            return Err(ConfigError::InvalidBusMasterAddress(bm_status_addr));
        }
        if shared && bm_status_addr == 0 {
            return Err(ConfigError::SharedIrqWithoutBusMaster);
        }
        if ata_status_addr < 0x100 {
            return Err(ConfigError::InvalidAtaAddress(ata_status_addr));
        }

        self.irq = irq;
        self.state.configure(bm_status_addr, ata_status_addr, shared);
        if let Some(platform) = self.platform.as_mut() {
            let masks = platform.read_masks();
            let (master, slave) = unmask(masks, irq);
            platform.write_masks(master, slave);
        }
        self.enabled = true;
        log::debug!(
            "irq {} enabled (vector 0x{:02X}, shared {})",
            irq,
            self.vector(),
            shared
        );
        Ok(())
    }

    /// Swap our handler in; no-op unless enabled and not yet installed
    pub fn install_handler(&mut self) {
        if !self.enabled || self.installed {
            return;
        }
        let vector = self.vector();
        if let Some(platform) = self.platform.as_mut() {
            platform.install(vector);
        }
        self.state.reset_counters();
        self.installed = true;
    }

    /// Put the previous handler back; no-op unless installed
    pub fn remove_handler(&mut self) {
        if !self.enabled || !self.installed {
            return;
        }
        let vector = self.vector();
        if let Some(platform) = self.platform.as_mut() {
            platform.restore(vector);
        }
        self.installed = false;
    }

    /// Leave interrupt mode. Must be called before the session is dropped.
    pub fn disable(&mut self) {
        if self.installed {
            let vector = self.vector();
            if let Some(platform) = self.platform.as_mut() {
                platform.restore(vector);
            }
        }
        self.enabled = false;
        self.installed = false;
    }

    /// Finish an interrupt on behalf of the stub
    pub fn acknowledge(&mut self, disposition: IrqDisposition) {
        let vector = self.vector();
        if let Some(platform) = self.platform.as_mut() {
            match disposition {
                IrqDisposition::Chain => platform.chain(vector),
                IrqDisposition::EndOfInterrupt => platform.end_of_interrupt(vector),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use spin::Mutex;

    #[derive(Default)]
    struct Calls {
        masks: (u8, u8),
        installs: Vec<u8>,
        restores: Vec<u8>,
        eois: Vec<u8>,
    }

    struct MockPlatform(Arc<Mutex<Calls>>);

    impl InterruptPlatform for MockPlatform {
        fn read_masks(&mut self) -> (u8, u8) {
            self.0.lock().masks
        }
        fn write_masks(&mut self, master: u8, slave: u8) {
            self.0.lock().masks = (master, slave);
        }
        fn install(&mut self, vector: u8) {
            self.0.lock().installs.push(vector);
        }
        fn restore(&mut self, vector: u8) {
            self.0.lock().restores.push(vector);
        }
        fn end_of_interrupt(&mut self, vector: u8) {
            self.0.lock().eois.push(vector);
        }
        fn chain(&mut self, _vector: u8) {}
    }

    struct StatusPorts {
        bm_status: u8,
        writes: Vec<(u32, u8)>,
    }

    impl RegisterIo for StatusPorts {
        fn read8(&mut self, addr: u32) -> u8 {
            if addr == 0xC002 { self.bm_status } else { 0x50 }
        }
        fn write8(&mut self, addr: u32, value: u8) {
            self.writes.push((addr, value));
        }
        fn read16(&mut self, _addr: u32) -> u16 { 0 }
        fn write16(&mut self, _addr: u32, _value: u16) {}
        fn read32(&mut self, _addr: u32) -> u32 { 0 }
        fn write32(&mut self, _addr: u32, _value: u32) {}
    }

    fn manager() -> (InterruptManager, Arc<Mutex<Calls>>) {
        let calls = Arc::new(Mutex::new(Calls { masks: (0xFF, 0xFF), ..Default::default() }));
        let mgr = InterruptManager::new((0x08, 0x70))
            .with_platform(Box::new(MockPlatform(Arc::clone(&calls))));
        (mgr, calls)
    }

    #[test]
    fn test_enable_validation_codes() {
        let (mut mgr, _) = manager();
        assert_eq!(mgr.enable(2, 0, 0x1F7, false).unwrap_err().code(), 2);
        assert_eq!(mgr.enable(16, 0, 0x1F7, false).unwrap_err().code(), 2);
        assert_eq!(mgr.enable(14, 0x80, 0x1F7, false).unwrap_err().code(), 3);
        assert_eq!(mgr.enable(14, 0, 0x1F7, true).unwrap_err().code(), 4);
        assert_eq!(mgr.enable(14, 0, 0x07, false).unwrap_err().code(), 5);
        assert!(mgr.enable(14, 0, 0x1F7, false).is_ok());
        assert_eq!(mgr.enable(14, 0, 0x1F7, false).unwrap_err().code(), 1);
    }

    #[test]
    fn test_slave_irq_unmasks_cascade() {
        let (mut mgr, calls) = manager();
        mgr.enable(14, 0, 0x1F7, false).unwrap();
        assert_eq!(calls.lock().masks, (0xFB, 0xBF));
        assert_eq!(mgr.vector(), 0x76);
        assert_eq!(unmask((0xFF, 0xFF), 5), (0xDF, 0xFF));
        assert_eq!(vector_for(5, (0x08, 0x70)), 0x0D);
    }

    #[test]
    fn test_session_lifecycle_is_idempotent() {
        let (mut mgr, calls) = manager();
        mgr.install_handler();
        assert!(calls.lock().installs.is_empty(), "not enabled yet");

        mgr.enable(15, 0, 0x177, false).unwrap();
        assert_eq!(mgr.session_state(), IrqSessionState::Armed);
        mgr.install_handler();
        mgr.install_handler();
        assert_eq!(calls.lock().installs.len(), 1);
        assert_eq!(mgr.session_state(), IrqSessionState::Firing);

        mgr.remove_handler();
        mgr.remove_handler();
        assert_eq!(calls.lock().restores.len(), 1);

        mgr.install_handler();
        mgr.disable();
        assert_eq!(calls.lock().restores.len(), 2);
        assert_eq!(mgr.session_state(), IrqSessionState::Disabled);
    }

    #[test]
    fn test_service_with_bus_master() {
        let (mut mgr, calls) = manager();
        mgr.enable(14, 0xC002, 0x1F7, false).unwrap();
        mgr.install_handler();
        let state = mgr.state();

        let mut ports = StatusPorts { bm_status: 0x00, writes: Vec::new() };
        assert_eq!(state.service(&mut ports), IrqDisposition::EndOfInterrupt);
        assert!(!state.fired(), "bus master INT clear: not ours");
        assert_eq!(state.count(), 1);

        ports.bm_status = BM_SR_INT;
        let disposition = state.service(&mut ports);
        assert!(state.fired());
        assert_eq!(state.captured_status(), 0x50);
        assert_eq!(ports.writes, [(0xC002, BM_SR_INT)]);

        mgr.acknowledge(disposition);
        assert_eq!(calls.lock().eois, [0x76]);
    }
}
