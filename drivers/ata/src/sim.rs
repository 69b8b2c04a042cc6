//! Simulated ATA hardware
//!
//! [`SimDevice`] answers register accesses the way a single ATA disk on a
//! legacy channel would: shadowed command-block registers with the 48-bit
//! two-deep FIFO, BSY/DRQ sequencing, a sparse sector store, Identify, HPA,
//! DCO, security and SMART behaviour, plus the DMA controller ports the
//! driver programs. Time only moves when the driver polls status, so
//! timeouts are deterministic.
//!
//! [`ScriptedIo`] is a bare backend that serves scripted reads per address.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use hashbrown::HashMap;
use spin::Mutex;

use crate::buffer::DataBuffer;
use crate::config::AtaConfig;
use crate::consts::*;
use crate::controller::Controller;
use crate::dma::{DmaPlatform, PrdEntry};
use crate::io::{RegisterIo, RegisterMap};
use crate::irq::IrqState;
use crate::timer::{ManualTicks, TickSource};
use crate::types::Register;

/// Backend that returns scripted bytes per address and 0 otherwise
#[derive(Debug, Default)]
pub struct ScriptedIo {
    reads: HashMap<u32, VecDeque<u8>>,
    writes: Vec<(u32, u32)>,
}

impl ScriptedIo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `values` to be returned by successive reads of `addr`
    pub fn script(&mut self, addr: u16, values: &[u8]) {
        self.reads.entry(addr as u32).or_default().extend(values.iter().copied());
    }

    pub fn writes(&self) -> &[(u32, u32)] {
        &self.writes
    }
}

impl RegisterIo for ScriptedIo {
    fn read8(&mut self, addr: u32) -> u8 {
        self.reads.get_mut(&addr).and_then(|q| q.pop_front()).unwrap_or(0)
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.writes.push((addr, value as u32));
    }

    fn read16(&mut self, addr: u32) -> u16 {
        u16::from_le_bytes([self.read8(addr), self.read8(addr)])
    }

    fn write16(&mut self, addr: u32, value: u16) {
        self.writes.push((addr, value as u32));
    }

    fn read32(&mut self, addr: u32) -> u32 {
        u32::from_le_bytes([self.read8(addr), self.read8(addr), self.read8(addr), self.read8(addr)])
    }

    fn write32(&mut self, addr: u32, value: u32) {
        self.writes.push((addr, value));
    }
}

/// Sparse physical memory shared by [`SimDmaPlatform`] and the DMA engines
/// inside [`SimDevice`]. Unwritten bytes read as zero.
#[derive(Debug, Clone, Default)]
pub struct SimMemory(Arc<Mutex<HashMap<u32, u8>>>);

impl SimMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, address: u32, bytes: &[u8]) {
        let mut cells = self.0.lock();
        for (i, &b) in bytes.iter().enumerate() {
            cells.insert(address.wrapping_add(i as u32), b);
        }
    }

    pub fn read_into(&self, address: u32, out: &mut [u8]) {
        let cells = self.0.lock();
        for (i, b) in out.iter_mut().enumerate() {
            *b = cells.get(&address.wrapping_add(i as u32)).copied().unwrap_or(0);
        }
    }

    pub fn read(&self, address: u32, len: usize) -> Vec<u8> {
        let mut out = vec![0; len];
        self.read_into(address, &mut out);
        out
    }
}

/// DMA platform for simulation: a fixed buffer address, a recorded PRD
/// table and a memory the buffer is copied through.
#[derive(Debug, Clone)]
pub struct SimDmaPlatform {
    buffer_address: Option<u32>,
    prd_address: u32,
    loaded: Arc<Mutex<Vec<PrdEntry>>>,
    memory: SimMemory,
}

impl SimDmaPlatform {
    pub fn new(buffer_address: u32) -> Self {
        Self {
            buffer_address: Some(buffer_address),
            prd_address: 0x0009_F000,
            loaded: Arc::new(Mutex::new(Vec::new())),
            memory: SimMemory::new(),
        }
    }

    /// A platform that cannot map the buffer
    pub fn unmapped() -> Self {
        Self { buffer_address: None, ..Self::new(0) }
    }

    /// Entries of the last loaded PRD table
    pub fn loaded(&self) -> Arc<Mutex<Vec<PrdEntry>>> {
        Arc::clone(&self.loaded)
    }

    /// Memory to hand to [`SimDevice::with_dma_memory`]
    pub fn memory(&self) -> SimMemory {
        self.memory.clone()
    }
}

impl DmaPlatform for SimDmaPlatform {
    fn physical_address(&self, _buffer: &DataBuffer) -> Option<u32> {
        self.buffer_address
    }

    fn load_prd_table(&mut self, entries: &[PrdEntry]) -> Option<u32> {
        for (i, entry) in entries.iter().enumerate() {
            let mut raw = [0u8; 8];
            raw[..4].copy_from_slice(&entry.physical.to_le_bytes());
            raw[4..6].copy_from_slice(&entry.byte_count.to_le_bytes());
            raw[6..].copy_from_slice(&entry.flags.to_le_bytes());
            self.memory.write(self.prd_address + 8 * i as u32, &raw);
        }
        *self.loaded.lock() = entries.to_vec();
        Some(self.prd_address)
    }

    fn sync_for_device(&mut self, buffer: &DataBuffer, bytes: usize) {
        if let Some(address) = self.buffer_address {
            self.memory.write(address, &buffer[..bytes.min(buffer.len())]);
        }
    }

    fn sync_for_cpu(&mut self, buffer: &mut DataBuffer, bytes: usize) {
        if let Some(address) = self.buffer_address {
            let n = bytes.min(buffer.len());
            self.memory.read_into(address, &mut buffer[..n]);
        }
    }
}

/// One command-block register with its previous value
#[derive(Debug, Clone, Copy, Default)]
struct Shadow {
    cur: u8,
    prev: u8,
}

impl Shadow {
    fn push(&mut self, value: u8) {
        self.prev = self.cur;
        self.cur = value;
    }

    fn set(&mut self, value: u16) {
        self.cur = value as u8;
        self.prev = (value >> 8) as u8;
    }

    fn read(&self, hob: bool) -> u8 {
        if hob {
            self.prev
        } else {
            self.cur
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterBusy {
    /// Wait for an external event (bus-master start)
    Hold,
    Done,
    DataReady,
    ResetDone,
}

#[derive(Debug, Clone, Copy)]
struct Busy {
    until: Option<u32>,
    then: AfterBusy,
    hung: bool,
}

/// A DMA command waiting for an engine to move its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DmaJob {
    Read,
    Write { lba: u64 },
}

/// Programmed state of one 16-bit 8237 channel
#[derive(Debug, Clone, Copy, Default)]
struct SimIsaChannel {
    page: u8,
    address: u16,
    count: u16,
}

impl SimIsaChannel {
    fn physical(&self) -> u32 {
        ((self.page & 0xFE) as u32) << 16 | (self.address as u32) << 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IsaPort {
    Page,
    Address,
    Count,
}

/// Page, address and count ports for channels 5, 6 and 7
const ISA_PORTS: [(u16, u16, u16); 3] = [(0x8B, 0xC4, 0xC6), (0x89, 0xC8, 0xCA), (0x8A, 0xCC, 0xCE)];

fn isa_port(addr: u16) -> Option<(usize, IsaPort)> {
    ISA_PORTS.iter().enumerate().find_map(|(i, &(page, address, count))| {
        if addr == page {
            Some((i, IsaPort::Page))
        } else if addr == address {
            Some((i, IsaPort::Address))
        } else if addr == count {
            Some((i, IsaPort::Count))
        } else {
            None
        }
    })
}

/// ISA DMA controller activity, oldest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsaEvent {
    /// A channel was unmasked with this programming
    Enabled { channel: u8, physical: u32, words: u32 },
    /// The status port was read and returned these TC bits
    StatusRead(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    DataIn,
    DataOut { opcode: u8, features: u8, lba: u64, count: u32 },
}

/// Security feature set state
#[derive(Debug, Clone)]
pub struct SimSecurity {
    pub supported: bool,
    pub enabled: bool,
    pub locked: bool,
    pub frozen: bool,
    pub level_max: bool,
    pub enhanced_supported: bool,
    pub attempts: u8,
    pub user: Option<[u8; 32]>,
    pub master: [u8; 32],
    pub erase_minutes: u16,
    pub enhanced_minutes: u16,
}

impl Default for SimSecurity {
    fn default() -> Self {
        Self {
            supported: true,
            enabled: false,
            locked: false,
            frozen: false,
            level_max: false,
            enhanced_supported: true,
            attempts: 0,
            user: None,
            master: [0; 32],
            erase_minutes: 2,
            enhanced_minutes: 4,
        }
    }
}

impl SimSecurity {
    fn word(&self) -> u16 {
        let mut w = 0;
        if self.supported {
            w |= SEC_SUPPORTED;
        }
        if self.enabled {
            w |= SEC_ENABLED;
        }
        if self.locked {
            w |= SEC_LOCKED;
        }
        if self.frozen {
            w |= SEC_FROZEN;
        }
        if self.attempts >= 5 {
            w |= SEC_COUNT_EXPIRED;
        }
        if self.enhanced_supported {
            w |= SEC_ENHANCED_ERASE;
        }
        if self.level_max {
            w |= SEC_LEVEL_MAX;
        }
        w
    }
}

/// Zero-padded 32-byte password
pub fn password_bytes(password: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    let bytes = password.as_bytes();
    let n = bytes.len().min(32);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

/// One SMART attribute as the sim reports it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimAttribute {
    pub id: u8,
    pub flags: u16,
    pub current: u8,
    pub worst: u8,
    pub raw: u64,
}

const DEFAULT_BUSY_TICKS: u32 = 2;
const SIM_HEADS: u64 = 16;
const SIM_SECTORS_PER_TRACK: u64 = 63;
/// Longest PRD table the simulated engine walks
const SIM_PRD_ENTRIES: u32 = 64;

/// A simulated ATA disk as device 0 on one channel
pub struct SimDevice {
    map: RegisterMap,
    clock: Arc<ManualTicks>,
    irq: Option<Arc<IrqState>>,

    features: Shadow,
    sector_count: Shadow,
    lba_low: Shadow,
    lba_mid: Shadow,
    lba_high: Shadow,
    device_head: u8,
    control: u8,
    status: u8,
    error: u8,

    busy: Option<Busy>,
    busy_ticks: u32,
    erase_ticks: u32,
    phase: Phase,
    data: Vec<u8>,
    data_pos: usize,
    drq_block: usize,

    sectors: HashMap<u64, [u8; SECTOR_SIZE]>,
    logs: HashMap<(u8, u16), [u8; SECTOR_SIZE]>,
    erased: bool,

    model: String,
    serial: String,
    firmware: String,
    lba48: bool,
    native_max: u64,
    current_max: u64,
    factory_max: u64,
    dco_max: u64,
    dco_security: bool,
    dco_frozen: bool,
    set_max_armed: bool,
    non_volatile_sets: u32,
    multiple: u16,
    udma_supported: u8,
    udma_selected: Option<u8>,

    pub security: SimSecurity,
    erase_prepared: bool,
    smart_enabled: bool,
    attributes: Vec<SimAttribute>,

    hang_on: Option<u8>,
    fail_on: Option<(u8, u8)>,

    dma: Option<DmaJob>,
    dma_memory: Option<SimMemory>,
    dma_stalled: bool,
    dma_fail_after: Option<usize>,
    isa_channels: [SimIsaChannel; 3],
    isa_flipflop: bool,
    isa_events: Vec<IsaEvent>,
    isa_tc: u8,
    isa_enabled: u8,
    bm_base: Option<u16>,
    bm_command: u8,
    bm_status: u8,
    bm_prd: u32,

    commands: Vec<u8>,
    register_writes: usize,
    detached: bool,
}

impl SimDevice {
    /// A 1 GiB (2,097,152 sector) 48-bit capable disk on 0x1F0/0x3F0
    pub fn new(clock: Arc<ManualTicks>) -> Self {
        let max = 2_097_151;
        Self {
            map: RegisterMap::io(LEGACY_PRIMARY_BASE, LEGACY_PRIMARY_CTRL),
            clock,
            irq: None,
            features: Shadow::default(),
            sector_count: Shadow::default(),
            lba_low: Shadow::default(),
            lba_mid: Shadow::default(),
            lba_high: Shadow::default(),
            device_head: ATA_DH_OBSOLETE,
            control: ATA_DC_NIEN,
            status: 0x50,
            error: 0,
            busy: None,
            busy_ticks: DEFAULT_BUSY_TICKS,
            erase_ticks: 4,
            phase: Phase::Idle,
            data: Vec::new(),
            data_pos: 0,
            drq_block: SECTOR_SIZE,
            sectors: HashMap::new(),
            logs: HashMap::new(),
            erased: false,
            model: String::from("SIM ATA DISK"),
            serial: String::from("SIM0001"),
            firmware: String::from("1.0"),
            lba48: true,
            native_max: max,
            current_max: max,
            factory_max: max,
            dco_max: max,
            dco_security: true,
            dco_frozen: false,
            set_max_armed: false,
            non_volatile_sets: 0,
            multiple: 1,
            udma_supported: 0x3F,
            udma_selected: None,
            security: SimSecurity::default(),
            erase_prepared: false,
            smart_enabled: true,
            attributes: Vec::new(),
            hang_on: None,
            fail_on: None,
            dma: None,
            dma_memory: None,
            dma_stalled: false,
            dma_fail_after: None,
            isa_channels: [SimIsaChannel::default(); 3],
            isa_flipflop: false,
            isa_events: Vec::new(),
            isa_tc: 0,
            isa_enabled: 0,
            bm_base: None,
            bm_command: 0,
            bm_status: 0,
            bm_prd: 0,
            commands: Vec::new(),
            register_writes: 0,
            detached: false,
        }
    }

    pub fn with_map(mut self, map: RegisterMap) -> Self {
        self.map = map;
        self
    }

    /// Factory capacity in sectors; clears HPA and DCO restrictions
    pub fn with_capacity(mut self, sectors: u64) -> Self {
        let max = sectors.saturating_sub(1);
        self.native_max = max;
        self.current_max = max;
        self.factory_max = max;
        self.dco_max = max;
        self
    }

    /// Restrict the visible capacity to `max_lba` with an HPA
    pub fn with_hpa(mut self, max_lba: u64) -> Self {
        self.current_max = max_lba.min(self.native_max);
        self
    }

    /// Restrict the native capacity to `max_lba` with a DCO
    pub fn with_dco_max(mut self, max_lba: u64) -> Self {
        self.dco_max = max_lba.min(self.factory_max);
        self.native_max = self.dco_max;
        self.current_max = self.current_max.min(self.dco_max);
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = String::from(model);
        self
    }

    pub fn with_serial(mut self, serial: &str) -> Self {
        self.serial = String::from(serial);
        self
    }

    pub fn without_lba48(mut self) -> Self {
        self.lba48 = false;
        self
    }

    pub fn with_security(mut self, security: SimSecurity) -> Self {
        self.security = security;
        self
    }

    /// Enable security with `user` as the user password
    pub fn with_user_password(mut self, user: &str) -> Self {
        self.security.enabled = true;
        self.security.user = Some(password_bytes(user));
        self
    }

    pub fn with_master_password(mut self, master: &str) -> Self {
        self.security.master = password_bytes(master);
        self
    }

    pub fn locked(mut self) -> Self {
        self.security.locked = self.security.enabled;
        self
    }

    pub fn with_erase_minutes(mut self, normal: u16, enhanced: u16) -> Self {
        self.security.erase_minutes = normal;
        self.security.enhanced_minutes = enhanced;
        self
    }

    /// Ticks SECURITY ERASE UNIT stays busy
    pub fn with_erase_ticks(mut self, ticks: u32) -> Self {
        self.erase_ticks = ticks;
        self
    }

    pub fn with_busy_ticks(mut self, ticks: u32) -> Self {
        self.busy_ticks = ticks;
        self
    }

    pub fn with_sector(mut self, lba: u64, data: &[u8]) -> Self {
        let mut sector = [0u8; SECTOR_SIZE];
        let n = data.len().min(SECTOR_SIZE);
        sector[..n].copy_from_slice(&data[..n]);
        self.sectors.insert(lba, sector);
        self
    }

    pub fn with_smart_attribute(mut self, attribute: SimAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Never complete `opcode`
    pub fn hang_on(mut self, opcode: u8) -> Self {
        self.hang_on = Some(opcode);
        self
    }

    /// Complete `opcode` with ERR and `error`
    pub fn fail_on(mut self, opcode: u8, error: u8) -> Self {
        self.fail_on = Some((opcode, error));
        self
    }

    /// Serve bus-master DMA at `base`
    pub fn with_bus_master(mut self, base: u16) -> Self {
        self.bm_base = Some(base);
        self
    }

    /// Move DMA data through `memory`, normally [`SimDmaPlatform::memory`]
    pub fn with_dma_memory(mut self, memory: SimMemory) -> Self {
        self.dma_memory = Some(memory);
        self
    }

    /// DMA commands start but no engine ever moves a byte
    pub fn stall_dma(mut self) -> Self {
        self.dma_stalled = true;
        self
    }

    /// DMA commands abort with ABRT once `bytes` have moved
    pub fn fail_dma_after(mut self, bytes: usize) -> Self {
        self.dma_fail_after = Some(bytes);
        self
    }

    /// Pull the drive: every register reads 0xFF from now on
    pub fn detach(&mut self) {
        self.detached = true;
    }

    pub fn isa_events(&self) -> &[IsaEvent] {
        &self.isa_events
    }

    /// Raise interrupts through `state` while nIEN is clear
    pub fn attach_irq(&mut self, state: Arc<IrqState>) {
        self.irq = Some(state);
    }

    pub fn commands(&self) -> &[u8] {
        &self.commands
    }

    /// Writes to any ATA register, DMA port or bus-master port
    pub fn register_writes(&self) -> usize {
        self.register_writes
    }

    pub fn sector(&self, lba: u64) -> [u8; SECTOR_SIZE] {
        self.sectors.get(&lba).copied().unwrap_or_else(|| self.default_sector(lba))
    }

    pub fn current_max(&self) -> u64 {
        self.current_max
    }

    pub fn native_max(&self) -> u64 {
        self.native_max
    }

    pub fn dco_security(&self) -> bool {
        self.dco_security
    }

    pub fn non_volatile_sets(&self) -> u32 {
        self.non_volatile_sets
    }

    pub fn udma_selected(&self) -> Option<u8> {
        self.udma_selected
    }

    pub fn bm_prd(&self) -> u32 {
        self.bm_prd
    }

    /// Unwritten sectors carry their LBA in every byte pair
    fn default_sector(&self, lba: u64) -> [u8; SECTOR_SIZE] {
        let mut sector = [0u8; SECTOR_SIZE];
        if !self.erased {
            for (i, b) in sector.iter_mut().enumerate() {
                *b = (lba as u8).wrapping_add(i as u8);
            }
        }
        sector
    }

    fn selected(&self) -> bool {
        self.device_head & ATA_DH_DEV1 == 0
    }

    fn hob(&self) -> bool {
        self.control & ATA_DC_HOB != 0
    }

    fn raise(&mut self) {
        if self.control & ATA_DC_NIEN != 0 {
            return;
        }
        if let Some(irq) = self.irq.clone() {
            irq.service(self);
        }
    }

    /// Hold BSY over the pending completion status
    fn start_busy(&mut self, ticks: u32, then: AfterBusy) {
        self.status = (self.status & !ATA_SR_DRQ) | ATA_SR_BSY;
        let until = match then {
            AfterBusy::Hold => None,
            _ => Some(self.clock.ticks().wrapping_add(ticks)),
        };
        self.busy = Some(Busy { until, then, hung: false });
    }

    /// Status read: time passes while busy
    fn poll_busy(&mut self) {
        let Some(busy) = self.busy else {
            return;
        };
        if busy.hung {
            self.clock.advance(TICKS_PER_SECOND);
            return;
        }
        self.clock.advance(1);
        match busy.until {
            Some(until) if self.clock.ticks() >= until => {
                self.busy = None;
                self.after_busy(busy.then);
            }
            _ => {}
        }
    }

    fn after_busy(&mut self, then: AfterBusy) {
        match then {
            AfterBusy::Hold => {}
            AfterBusy::Done => {
                self.status &= !(ATA_SR_BSY | ATA_SR_DRQ);
                self.raise();
            }
            AfterBusy::DataReady => {
                self.status = ATA_SR_DRDY | ATA_SR_DRQ;
                self.raise();
            }
            AfterBusy::ResetDone => {
                self.status = ATA_SR_DRDY | ATA_SR_DSC;
                self.error = 0x01;
                self.sector_count.set(1);
                self.lba_low.set(1);
                self.lba_mid.set(0);
                self.lba_high.set(0);
            }
        }
    }

    fn finish_ok(&mut self) {
        self.status = ATA_SR_DRDY | ATA_SR_DSC;
        self.error = 0;
    }

    fn abort(&mut self, error: u8) {
        self.status = ATA_SR_DRDY | ATA_SR_ERR;
        self.error = error;
        self.phase = Phase::Idle;
        self.data.clear();
    }

    fn command_lba(&self, ext: bool) -> u64 {
        if ext {
            (self.lba_low.cur as u64)
                | (self.lba_mid.cur as u64) << 8
                | (self.lba_high.cur as u64) << 16
                | (self.lba_low.prev as u64) << 24
                | (self.lba_mid.prev as u64) << 32
                | (self.lba_high.prev as u64) << 40
        } else if self.device_head & ATA_DH_LBA != 0 {
            (self.lba_low.cur as u64)
                | (self.lba_mid.cur as u64) << 8
                | (self.lba_high.cur as u64) << 16
                | ((self.device_head & 0x0F) as u64) << 24
        } else {
            let cylinder = (self.lba_mid.cur as u64) | (self.lba_high.cur as u64) << 8;
            let head = (self.device_head & 0x0F) as u64;
            let sector = self.lba_low.cur.max(1) as u64;
            (cylinder * SIM_HEADS + head) * SIM_SECTORS_PER_TRACK + sector - 1
        }
    }

    fn command_count(&self, ext: bool) -> u32 {
        if ext {
            match (self.sector_count.prev as u32) << 8 | self.sector_count.cur as u32 {
                0 => 65536,
                n => n,
            }
        } else {
            match self.sector_count.cur {
                0 => 256,
                n => n as u32,
            }
        }
    }

    fn set_output_lba(&mut self, lba: u64, ext: bool) {
        if ext {
            self.lba_low.set((lba & 0xFF) as u16 | (((lba >> 24) & 0xFF) as u16) << 8);
            self.lba_mid.set(((lba >> 8) & 0xFF) as u16 | (((lba >> 32) & 0xFF) as u16) << 8);
            self.lba_high.set(((lba >> 16) & 0xFF) as u16 | (((lba >> 40) & 0xFF) as u16) << 8);
        } else {
            self.lba_low.set((lba & 0xFF) as u16);
            self.lba_mid.set(((lba >> 8) & 0xFF) as u16);
            self.lba_high.set(((lba >> 16) & 0xFF) as u16);
            self.device_head = (self.device_head & 0xF0) | ((lba >> 24) & 0x0F) as u8;
        }
    }

    fn begin_data_in(&mut self, data: Vec<u8>, block_sectors: usize) {
        self.data = data;
        self.data_pos = 0;
        self.drq_block = block_sectors.max(1) * SECTOR_SIZE;
        self.phase = Phase::DataIn;
        self.start_busy(self.busy_ticks, AfterBusy::DataReady);
    }

    fn begin_data_out(&mut self, opcode: u8, lba: u64, count: u32, block_sectors: usize) {
        self.data = vec![0; count as usize * SECTOR_SIZE];
        self.data_pos = 0;
        self.drq_block = block_sectors.max(1) * SECTOR_SIZE;
        self.phase = Phase::DataOut { opcode, features: self.features.cur, lba, count };
        self.status = ATA_SR_DRDY | ATA_SR_DRQ;
    }

    fn media_range_ok(&self, lba: u64, count: u32) -> bool {
        lba + count as u64 <= self.current_max + 1
    }

    fn read_sectors_data(&self, lba: u64, count: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(count as usize * SECTOR_SIZE);
        for i in 0..count as u64 {
            data.extend_from_slice(&self.sector(lba + i));
        }
        data
    }

    fn execute(&mut self, opcode: u8) {
        self.commands.push(opcode);
        self.phase = Phase::Idle;
        self.status = ATA_SR_DRDY | ATA_SR_DSC;
        self.error = 0;
        let armed = core::mem::take(&mut self.set_max_armed);
        let prepared = core::mem::take(&mut self.erase_prepared);
        self.dma = None;

        if self.hang_on == Some(opcode) {
            self.status = ATA_SR_BSY | ATA_SR_DRDY;
            self.busy = Some(Busy { until: None, then: AfterBusy::Done, hung: true });
            return;
        }
        if let Some((op, error)) = self.fail_on {
            if op == opcode {
                self.abort(error);
                self.start_busy(self.busy_ticks, AfterBusy::Done);
                return;
            }
        }

        let media = matches!(
            opcode,
            ATA_CMD_READ_SECTORS
                | ATA_CMD_READ_SECTORS_EXT
                | ATA_CMD_READ_MULTIPLE
                | ATA_CMD_READ_MULTIPLE_EXT
                | ATA_CMD_WRITE_SECTORS
                | ATA_CMD_WRITE_SECTORS_EXT
                | ATA_CMD_WRITE_MULTIPLE
                | ATA_CMD_WRITE_MULTIPLE_EXT
                | ATA_CMD_READ_DMA
                | ATA_CMD_READ_DMA_EXT
                | ATA_CMD_WRITE_DMA
                | ATA_CMD_WRITE_DMA_EXT
                | ATA_CMD_READ_VERIFY
                | ATA_CMD_READ_VERIFY_EXT
        );
        if media && self.security.locked {
            self.abort(ATA_ER_ABRT);
            self.start_busy(self.busy_ticks, AfterBusy::Done);
            return;
        }

        let ext = matches!(
            opcode,
            ATA_CMD_READ_SECTORS_EXT
                | ATA_CMD_READ_MULTIPLE_EXT
                | ATA_CMD_WRITE_SECTORS_EXT
                | ATA_CMD_WRITE_MULTIPLE_EXT
                | ATA_CMD_READ_DMA_EXT
                | ATA_CMD_WRITE_DMA_EXT
                | ATA_CMD_READ_VERIFY_EXT
                | ATA_CMD_READ_NATIVE_MAX_EXT
                | ATA_CMD_SET_MAX_EXT
                | ATA_CMD_READ_LOG_EXT
                | ATA_CMD_WRITE_LOG_EXT
                | ATA_CMD_CACHE_FLUSH_EXT
        );
        if ext && !self.lba48 {
            self.abort(ATA_ER_ABRT);
            self.start_busy(self.busy_ticks, AfterBusy::Done);
            return;
        }

        match opcode {
            ATA_CMD_IDENTIFY => {
                let id = self.identify_data();
                self.begin_data_in(id, 1);
            }
            ATA_CMD_READ_SECTORS | ATA_CMD_READ_SECTORS_EXT | ATA_CMD_READ_MULTIPLE
            | ATA_CMD_READ_MULTIPLE_EXT => {
                let lba = self.command_lba(ext);
                let count = self.command_count(ext);
                if !self.media_range_ok(lba, count) {
                    self.abort(ATA_ER_IDNF);
                    self.start_busy(self.busy_ticks, AfterBusy::Done);
                    return;
                }
                let block = match opcode {
                    ATA_CMD_READ_MULTIPLE | ATA_CMD_READ_MULTIPLE_EXT => self.multiple as usize,
                    _ => 1,
                };
                let data = self.read_sectors_data(lba, count);
                self.begin_data_in(data, block);
            }
            ATA_CMD_WRITE_SECTORS | ATA_CMD_WRITE_SECTORS_EXT | ATA_CMD_WRITE_MULTIPLE
            | ATA_CMD_WRITE_MULTIPLE_EXT => {
                let lba = self.command_lba(ext);
                let count = self.command_count(ext);
                if !self.media_range_ok(lba, count) {
                    self.abort(ATA_ER_IDNF);
                    self.start_busy(self.busy_ticks, AfterBusy::Done);
                    return;
                }
                let block = match opcode {
                    ATA_CMD_WRITE_MULTIPLE | ATA_CMD_WRITE_MULTIPLE_EXT => self.multiple as usize,
                    _ => 1,
                };
                self.begin_data_out(opcode, lba, count, block);
            }
            ATA_CMD_READ_VERIFY | ATA_CMD_READ_VERIFY_EXT => {
                let lba = self.command_lba(ext);
                let count = self.command_count(ext);
                if !self.media_range_ok(lba, count) {
                    self.abort(ATA_ER_IDNF);
                } else {
                    self.finish_ok();
                }
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            ATA_CMD_READ_DMA | ATA_CMD_READ_DMA_EXT | ATA_CMD_WRITE_DMA | ATA_CMD_WRITE_DMA_EXT => {
                let lba = self.command_lba(ext);
                let count = self.command_count(ext);
                if !self.media_range_ok(lba, count) {
                    self.abort(ATA_ER_IDNF);
                    self.start_busy(self.busy_ticks, AfterBusy::Done);
                    return;
                }
                let job = match opcode {
                    ATA_CMD_WRITE_DMA | ATA_CMD_WRITE_DMA_EXT => {
                        self.data = vec![0; count as usize * SECTOR_SIZE];
                        DmaJob::Write { lba }
                    }
                    _ => {
                        self.data = self.read_sectors_data(lba, count);
                        DmaJob::Read
                    }
                };
                self.data_pos = 0;
                self.dma = Some(job);
                self.start_busy(0, AfterBusy::Hold);
                if self.bm_base.is_none() {
                    self.run_isa_dma();
                }
            }
            ATA_CMD_READ_NATIVE_MAX | ATA_CMD_READ_NATIVE_MAX_EXT => {
                let max = if ext { self.native_max } else { self.native_max.min(0x0FFF_FFFF) };
                self.finish_ok();
                self.set_output_lba(max, ext);
                self.set_max_armed = true;
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            ATA_CMD_SET_MAX | ATA_CMD_SET_MAX_EXT => {
                let lba = self.command_lba(ext);
                if !armed || lba > self.native_max {
                    self.abort(ATA_ER_ABRT);
                } else {
                    self.current_max = lba;
                    if self.sector_count.cur & 0x01 != 0 {
                        self.non_volatile_sets += 1;
                    }
                    self.finish_ok();
                    self.set_output_lba(lba, ext);
                }
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            ATA_CMD_DCO => self.execute_dco(),
            ATA_CMD_SMART => self.execute_smart(),
            ATA_CMD_SECURITY_SET_PASSWORD | ATA_CMD_SECURITY_UNLOCK | ATA_CMD_SECURITY_DISABLE => {
                if self.security.frozen || !self.security.supported {
                    self.abort(ATA_ER_ABRT);
                    self.start_busy(self.busy_ticks, AfterBusy::Done);
                    return;
                }
                self.begin_data_out(opcode, 0, 1, 1);
            }
            ATA_CMD_SECURITY_ERASE_PREPARE => {
                if self.security.frozen {
                    self.abort(ATA_ER_ABRT);
                } else {
                    self.erase_prepared = true;
                    self.finish_ok();
                }
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            ATA_CMD_SECURITY_ERASE_UNIT => {
                if !prepared || self.security.frozen {
                    self.abort(ATA_ER_ABRT);
                    self.start_busy(self.busy_ticks, AfterBusy::Done);
                    return;
                }
                self.begin_data_out(opcode, 0, 1, 1);
            }
            ATA_CMD_SECURITY_FREEZE_LOCK => {
                self.security.frozen = true;
                self.finish_ok();
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            ATA_CMD_SET_MULTIPLE => {
                let n = self.sector_count.cur as u16;
                if n == 0 || n > 16 || !n.is_power_of_two() {
                    self.abort(ATA_ER_ABRT);
                } else {
                    self.multiple = n;
                    self.finish_ok();
                }
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            ATA_CMD_SET_FEATURES => {
                if self.features.cur == SETF_TRANSFER_MODE
                    && self.sector_count.cur & 0xF8 == SETF_UDMA_MODE_BASE
                {
                    let mode = self.sector_count.cur & 0x07;
                    if self.udma_supported & (1 << mode) != 0 {
                        self.udma_selected = Some(mode);
                        self.finish_ok();
                    } else {
                        self.abort(ATA_ER_ABRT);
                    }
                } else {
                    self.finish_ok();
                }
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            ATA_CMD_READ_LOG_EXT => {
                let lba = self.command_lba(true);
                let count = self.command_count(true);
                let (log, page) = ((lba & 0xFF) as u8, ((lba >> 8) & 0xFFFF) as u16);
                let mut data = Vec::with_capacity(count as usize * SECTOR_SIZE);
                for p in 0..count as u16 {
                    let sector = self.logs.get(&(log, page.wrapping_add(p))).copied().unwrap_or([0; SECTOR_SIZE]);
                    data.extend_from_slice(&sector);
                }
                self.begin_data_in(data, 1);
            }
            ATA_CMD_WRITE_LOG_EXT => {
                let lba = self.command_lba(true);
                let count = self.command_count(true);
                self.begin_data_out(opcode, lba, count, 1);
            }
            ATA_CMD_CACHE_FLUSH | ATA_CMD_CACHE_FLUSH_EXT | ATA_CMD_SEEK | ATA_CMD_RECALIBRATE
            | ATA_CMD_IDLE_IMMEDIATE | ATA_CMD_STANDBY_IMMEDIATE => {
                self.finish_ok();
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            ATA_CMD_CHECK_POWER_MODE => {
                self.finish_ok();
                self.sector_count.set(0xFF);
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            _ => {
                self.abort(ATA_ER_ABRT);
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
        }
    }

    fn execute_dco(&mut self) {
        if self.dco_frozen {
            self.abort(ATA_ER_ABRT);
            self.start_busy(self.busy_ticks, AfterBusy::Done);
            return;
        }
        match self.features.cur {
            DCO_RESTORE => {
                self.dco_max = self.factory_max;
                self.native_max = self.factory_max;
                self.current_max = self.factory_max;
                self.dco_security = true;
                self.security.supported = true;
                self.finish_ok();
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            DCO_FREEZE_LOCK => {
                self.dco_frozen = true;
                self.finish_ok();
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            DCO_IDENTIFY => {
                let data = self.dco_data();
                self.begin_data_in(data, 1);
            }
            DCO_SET => self.begin_data_out(ATA_CMD_DCO, 0, 1, 1),
            _ => {
                self.abort(ATA_ER_ABRT);
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
        }
    }

    fn execute_smart(&mut self) {
        if self.lba_mid.cur != 0x4F || self.lba_high.cur != 0xC2 {
            self.abort(ATA_ER_ABRT);
            self.start_busy(self.busy_ticks, AfterBusy::Done);
            return;
        }
        match self.features.cur {
            SMART_READ_DATA if self.smart_enabled => {
                let data = self.smart_data();
                self.begin_data_in(data, 1);
            }
            SMART_ENABLE_OPERATIONS => {
                self.smart_enabled = true;
                self.finish_ok();
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            SMART_DISABLE_OPERATIONS => {
                self.smart_enabled = false;
                self.finish_ok();
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            SMART_RETURN_STATUS if self.smart_enabled => {
                self.finish_ok();
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
            _ => {
                self.abort(ATA_ER_ABRT);
                self.start_busy(self.busy_ticks, AfterBusy::Done);
            }
        }
    }

    /// Last data-out block received: apply the command
    fn commit(&mut self, opcode: u8, features: u8, lba: u64, count: u32) {
        let data = core::mem::take(&mut self.data);
        let mut busy = self.busy_ticks;
        match opcode {
            ATA_CMD_WRITE_SECTORS | ATA_CMD_WRITE_SECTORS_EXT | ATA_CMD_WRITE_MULTIPLE
            | ATA_CMD_WRITE_MULTIPLE_EXT => {
                for i in 0..count as usize {
                    let mut sector = [0u8; SECTOR_SIZE];
                    sector.copy_from_slice(&data[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
                    self.sectors.insert(lba + i as u64, sector);
                }
                self.finish_ok();
            }
            ATA_CMD_WRITE_LOG_EXT => {
                let (log, page) = ((lba & 0xFF) as u8, ((lba >> 8) & 0xFFFF) as u16);
                for i in 0..count as usize {
                    let mut sector = [0u8; SECTOR_SIZE];
                    sector.copy_from_slice(&data[i * SECTOR_SIZE..(i + 1) * SECTOR_SIZE]);
                    self.logs.insert((log, page.wrapping_add(i as u16)), sector);
                }
                self.finish_ok();
            }
            ATA_CMD_DCO if features == DCO_SET => self.commit_dco(&data),
            ATA_CMD_SECURITY_SET_PASSWORD => {
                let master = data[0] & 0x01 != 0;
                let mut password = [0u8; 32];
                password.copy_from_slice(&data[2..34]);
                if self.security.locked {
                    self.abort(ATA_ER_ABRT);
                } else if master {
                    self.security.master = password;
                    self.finish_ok();
                } else {
                    self.security.user = Some(password);
                    self.security.enabled = true;
                    self.security.level_max = data[1] & 0x01 != 0;
                    self.finish_ok();
                }
            }
            ATA_CMD_SECURITY_UNLOCK => {
                if self.password_matches(&data) {
                    self.security.locked = false;
                    self.security.attempts = 0;
                    self.finish_ok();
                } else {
                    self.security.attempts = self.security.attempts.saturating_add(1);
                    self.abort(ATA_ER_ABRT);
                }
            }
            ATA_CMD_SECURITY_DISABLE => {
                if !self.security.locked && self.password_matches(&data) {
                    self.security.enabled = false;
                    self.security.user = None;
                    self.security.level_max = false;
                    self.finish_ok();
                } else {
                    self.abort(ATA_ER_ABRT);
                }
            }
            ATA_CMD_SECURITY_ERASE_UNIT => {
                if self.password_matches(&data) {
                    self.sectors.clear();
                    self.erased = true;
                    self.security.enabled = false;
                    self.security.locked = false;
                    self.security.user = None;
                    self.security.level_max = false;
                    self.finish_ok();
                    busy = self.erase_ticks;
                } else {
                    self.abort(ATA_ER_ABRT);
                }
            }
            _ => self.finish_ok(),
        }
        self.phase = Phase::Idle;
        self.start_busy(busy, AfterBusy::Done);
    }

    fn password_matches(&self, block: &[u8]) -> bool {
        let master = block[0] & 0x01 != 0;
        let given = &block[2..34];
        if master {
            !self.security.level_max && given == &self.security.master[..]
        } else {
            self.security.user.map_or(false, |user| given == &user[..])
        }
    }

    fn commit_dco(&mut self, data: &[u8]) {
        let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        let mut max_bytes = [0u8; 8];
        max_bytes[..6].copy_from_slice(&data[DCO_BYTE_MAX_LBA..DCO_BYTE_MAX_LBA + 6]);
        let max = u64::from_le_bytes(max_bytes);
        if sum != 0 || max > self.factory_max {
            self.abort(ATA_ER_ABRT);
            return;
        }
        self.dco_max = max;
        self.native_max = max;
        self.current_max = max;
        self.dco_security = data[DCO_BYTE_FEATURES] & DCO_SECURITY_BIT != 0;
        self.security.supported = self.dco_security;
        self.finish_ok();
    }

    fn put_string(words: &mut [u16], start: usize, len: usize, text: &str) {
        let mut bytes = vec![b' '; len * 2];
        let n = text.len().min(len * 2);
        bytes[..n].copy_from_slice(&text.as_bytes()[..n]);
        for i in 0..len {
            words[start + i] = u16::from_be_bytes([bytes[2 * i], bytes[2 * i + 1]]);
        }
    }

    fn identify_words(&self) -> [u16; 256] {
        let mut w = [0u16; 256];
        let sectors = self.current_max + 1;
        let cylinders = (sectors / (SIM_HEADS * SIM_SECTORS_PER_TRACK)).min(16383);
        w[0] = 0x0040;
        w[1] = cylinders as u16;
        w[3] = SIM_HEADS as u16;
        w[6] = SIM_SECTORS_PER_TRACK as u16;
        Self::put_string(&mut w, ID_WORD_SERIAL, ID_SERIAL_WORDS, &self.serial);
        Self::put_string(&mut w, ID_WORD_FIRMWARE, ID_FIRMWARE_WORDS, &self.firmware);
        Self::put_string(&mut w, ID_WORD_MODEL, ID_MODEL_WORDS, &self.model);
        w[47] = 0x8010;
        w[49] = 0x0300;
        w[53] = 0x0006;
        w[59] = 0x0100 | self.multiple;
        let lba28 = sectors.min(0x0FFF_FFFF) as u32;
        w[ID_WORD_MAX_LBA] = lba28 as u16;
        w[ID_WORD_MAX_LBA + 1] = (lba28 >> 16) as u16;
        w[80] = 0x007E;

        let mut cs1 = 0x0001 | ID_CS1_HPA;
        if self.security.supported {
            cs1 |= ID_CS1_SECURITY;
        }
        let mut cs2 = 0x4000 | ID_CS2_DCO;
        if self.lba48 {
            cs2 |= ID_CS2_LBA48;
        }
        w[ID_WORD_COMMAND_SET_1] = cs1;
        w[ID_WORD_COMMAND_SET_2] = cs2;
        let security_enabled = if self.security.enabled { ID_CS1_SECURITY } else { 0 };
        w[85] = (cs1 & !ID_CS1_SECURITY) | security_enabled;
        w[86] = cs2 & !0x4000;

        let selected = self.udma_selected.map_or(0, |m| 1u16 << (8 + m));
        w[ID_WORD_UDMA] = self.udma_supported as u16 | selected;
        w[ID_WORD_ERASE_TIME] = self.security.erase_minutes / 2;
        w[ID_WORD_ENHANCED_ERASE_TIME] = self.security.enhanced_minutes / 2;
        if self.lba48 {
            w[ID_WORD_MAX_LBA_EXT] = sectors as u16;
            w[ID_WORD_MAX_LBA_EXT + 1] = (sectors >> 16) as u16;
            w[ID_WORD_MAX_LBA_EXT + 2] = (sectors >> 32) as u16;
        }
        w[ID_WORD_SECURITY] = self.security.word();
        w
    }

    /// The 512-byte IDENTIFY DEVICE response
    pub fn identify_data(&self) -> Vec<u8> {
        self.identify_words().iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    fn dco_data(&self) -> Vec<u8> {
        let mut data = vec![0u8; SECTOR_SIZE];
        data[0..2].copy_from_slice(&0x0002u16.to_le_bytes());
        data[2..4].copy_from_slice(&0x0007u16.to_le_bytes());
        data[4..6].copy_from_slice(&(self.udma_supported as u16).to_le_bytes());
        data[DCO_BYTE_MAX_LBA..DCO_BYTE_MAX_LBA + 8].copy_from_slice(&self.dco_max.to_le_bytes());
        let features = 0x01C7 | if self.dco_security { DCO_SECURITY_BIT as u16 } else { 0 };
        data[DCO_BYTE_FEATURES..DCO_BYTE_FEATURES + 2].copy_from_slice(&features.to_le_bytes());
        data[510] = 0xA5;
        let sum = data[..DCO_CHECKSUM_BYTE].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        data[DCO_CHECKSUM_BYTE] = sum.wrapping_neg();
        data
    }

    fn smart_data(&self) -> Vec<u8> {
        let mut data = vec![0u8; SECTOR_SIZE];
        data[0..2].copy_from_slice(&0x0010u16.to_le_bytes());
        for (i, attr) in self.attributes.iter().take(30).enumerate() {
            let at = 2 + i * 12;
            data[at] = attr.id;
            data[at + 1..at + 3].copy_from_slice(&attr.flags.to_le_bytes());
            data[at + 3] = attr.current;
            data[at + 4] = attr.worst;
            data[at + 5..at + 11].copy_from_slice(&attr.raw.to_le_bytes()[..6]);
        }
        data[362] = 0x82;
        data[364..366].copy_from_slice(&600u16.to_le_bytes());
        data[367] = 0x7B;
        data[368..370].copy_from_slice(&0x0003u16.to_le_bytes());
        data[370] = 0x01;
        data[372] = 2;
        data[373] = 90;
        data[374] = 5;
        let sum = data[..511].iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        data[511] = sum.wrapping_neg();
        data
    }

    fn write_register(&mut self, reg: Register, value: u8) {
        match reg {
            Register::Features => self.features.push(value),
            Register::SectorCount => self.sector_count.push(value),
            Register::SectorNumber => self.lba_low.push(value),
            Register::CylinderLow => self.lba_mid.push(value),
            Register::CylinderHigh => self.lba_high.push(value),
            Register::DeviceHead => self.device_head = value,
            Register::Command => {
                if self.selected() && self.busy.is_none() {
                    self.execute(value);
                }
            }
            Register::DeviceControl => {
                let was_reset = self.control & ATA_DC_SRST != 0;
                self.control = value;
                if value & ATA_DC_SRST != 0 {
                    self.status = ATA_SR_BSY;
                    self.busy = Some(Busy { until: None, then: AfterBusy::Hold, hung: false });
                    self.phase = Phase::Idle;
                    self.dma = None;
                } else if was_reset {
                    self.start_busy(self.busy_ticks, AfterBusy::ResetDone);
                }
            }
            Register::Data | Register::DriveAddress => {}
        }
        if matches!(
            reg,
            Register::Features
                | Register::SectorCount
                | Register::SectorNumber
                | Register::CylinderLow
                | Register::CylinderHigh
                | Register::DeviceHead
        ) {
            self.control &= !ATA_DC_HOB;
        }
    }

    fn read_register(&mut self, reg: Register) -> u8 {
        if !self.selected() && !matches!(reg, Register::DeviceHead) {
            return 0;
        }
        let hob = self.hob();
        match reg {
            Register::Data => self.data_in(1)[0],
            Register::Features => self.error,
            Register::SectorCount => self.sector_count.read(hob),
            Register::SectorNumber => self.lba_low.read(hob),
            Register::CylinderLow => self.lba_mid.read(hob),
            Register::CylinderHigh => self.lba_high.read(hob),
            Register::DeviceHead => self.device_head,
            Register::Command | Register::DeviceControl => {
                self.poll_busy();
                self.status
            }
            Register::DriveAddress => 0xFF,
        }
    }

    /// Next `n` bytes of data-in; zeros outside a data phase
    fn data_in(&mut self, n: usize) -> [u8; 4] {
        let mut out = [0u8; 4];
        if self.phase != Phase::DataIn || self.status & ATA_SR_DRQ == 0 {
            return out;
        }
        for b in out.iter_mut().take(n) {
            *b = self.data.get(self.data_pos).copied().unwrap_or(0);
            self.data_pos += 1;
        }
        if self.data_pos >= self.data.len() {
            self.phase = Phase::Idle;
            self.data.clear();
            self.finish_ok();
        } else if self.data_pos % self.drq_block == 0 {
            self.status = ATA_SR_DRDY | ATA_SR_DRQ;
            self.raise();
        }
        out
    }

    fn data_out(&mut self, bytes: &[u8]) {
        let Phase::DataOut { opcode, features, lba, count } = self.phase else {
            return;
        };
        if self.status & ATA_SR_DRQ == 0 {
            return;
        }
        for &b in bytes {
            if let Some(slot) = self.data.get_mut(self.data_pos) {
                *slot = b;
            }
            self.data_pos += 1;
        }
        if self.data_pos >= self.data.len() {
            self.commit(opcode, features, lba, count);
        } else if self.data_pos % self.drq_block == 0 {
            self.status = ATA_SR_DRDY | ATA_SR_DRQ;
            self.raise();
        }
    }

    /// Move up to `max` bytes of the running DMA command between the drive
    /// and memory at `physical`. Returns the bytes moved.
    fn dma_move(&mut self, physical: u32, max: usize) -> usize {
        let end = self.dma_fail_after.map_or(self.data.len(), |n| n.min(self.data.len()));
        let n = max.min(end.saturating_sub(self.data_pos));
        let range = self.data_pos..self.data_pos + n;
        if let Some(memory) = &self.dma_memory {
            match self.dma {
                Some(DmaJob::Read) => memory.write(physical, &self.data[range]),
                Some(DmaJob::Write { .. }) => memory.read_into(physical, &mut self.data[range]),
                None => {}
            }
        }
        self.data_pos += n;
        n
    }

    /// Complete or abort the running DMA command once its data has moved
    /// or the injected failure point is reached.
    fn settle_dma(&mut self) {
        if self.data_pos >= self.data.len() {
            if let Some(DmaJob::Write { lba }) = self.dma {
                for (i, chunk) in self.data.chunks_exact(SECTOR_SIZE).enumerate() {
                    let mut sector = [0u8; SECTOR_SIZE];
                    sector.copy_from_slice(chunk);
                    self.sectors.insert(lba + i as u64, sector);
                }
            }
            self.dma = None;
            self.busy = None;
            self.finish_ok();
            self.raise();
        } else if self.dma_fail_after.map_or(false, |n| self.data_pos >= n) {
            self.dma = None;
            self.busy = None;
            self.abort(ATA_ER_ABRT);
            self.raise();
        }
    }

    /// The first unmasked ISA channel runs until its count is exhausted or
    /// the drive stops supplying data.
    fn run_isa_dma(&mut self) {
        if self.dma.is_none() || self.dma_stalled {
            return;
        }
        let Some(index) = (0..3).find(|&i| self.isa_enabled & (2 << i) != 0) else {
            return;
        };
        let channel = self.isa_channels[index];
        let words = channel.count as usize + 1;
        let moved = self.dma_move(channel.physical(), words * 2) / 2;

        let ch = &mut self.isa_channels[index];
        ch.address = ch.address.wrapping_add(moved as u16);
        ch.count = (words - moved).wrapping_sub(1) as u16;
        if moved == words {
            self.isa_tc |= 2 << index;
        }
        self.settle_dma();
    }

    /// Walk the PRD table in memory and move each region.
    fn run_bus_master(&mut self) {
        if self.dma_stalled {
            self.bm_status |= BM_SR_ACTIVE;
            return;
        }
        match self.dma_memory.clone() {
            Some(memory) => {
                for i in 0..SIM_PRD_ENTRIES {
                    let raw = memory.read(self.bm_prd.wrapping_add(8 * i), 8);
                    let entry = PrdEntry {
                        physical: u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                        byte_count: u16::from_le_bytes([raw[4], raw[5]]),
                        flags: u16::from_le_bytes([raw[6], raw[7]]),
                    };
                    let len = entry.len() as usize;
                    if self.dma_move(entry.physical, len) < len || entry.is_last() {
                        break;
                    }
                }
            }
            None => {
                self.dma_move(0, self.data.len());
            }
        }
        self.bm_status = (self.bm_status & !BM_SR_ACTIVE) | BM_SR_INT;
        if self.data_pos < self.data.len() && self.dma_fail_after.is_none() {
            self.bm_status |= BM_SR_ERROR;
        }
        self.settle_dma();
    }

    fn dma_port_write(&mut self, addr: u16, value: u8) {
        if addr == ISA_DMA_FLIPFLOP {
            self.isa_flipflop = false;
        } else if let Some((index, port)) = isa_port(addr) {
            let ch = &mut self.isa_channels[index];
            let high = self.isa_flipflop;
            let word = match port {
                IsaPort::Page => {
                    ch.page = value;
                    return;
                }
                IsaPort::Address => &mut ch.address,
                IsaPort::Count => &mut ch.count,
            };
            *word = if high {
                (*word & 0x00FF) | (value as u16) << 8
            } else {
                (*word & 0xFF00) | value as u16
            };
            self.isa_flipflop = !high;
        } else if addr == ISA_DMA_MASK {
            let select = 1u8 << (value & 0x03);
            if value & ISA_DMA_DISABLE != 0 {
                self.isa_enabled &= !select;
            } else if let Some(index) = (value & 0x03).checked_sub(1) {
                self.isa_enabled |= select;
                let ch = self.isa_channels[index as usize];
                self.isa_events.push(IsaEvent::Enabled {
                    channel: index + 5,
                    physical: ch.physical(),
                    words: ch.count as u32 + 1,
                });
                self.run_isa_dma();
            }
        }
        if let Some(base) = self.bm_base {
            if addr == base + BM_COMMAND {
                let starting = value & BM_CR_START != 0 && self.bm_command & BM_CR_START == 0;
                self.bm_command = value;
                if value & BM_CR_START == 0 {
                    self.bm_status &= !BM_SR_ACTIVE;
                } else if starting && self.dma.is_some() {
                    self.run_bus_master();
                }
            } else if addr == base + BM_STATUS {
                self.bm_status &= !(value & (BM_SR_INT | BM_SR_ERROR));
            }
        }
    }

    fn dma_port_read(&mut self, addr: u16) -> u8 {
        if addr == ISA_DMA_STATUS {
            // TC bits for channels 5-7 sit in bits 1-3; reading clears them.
            let tc = self.isa_tc;
            self.isa_tc = 0;
            self.isa_events.push(IsaEvent::StatusRead(tc));
            return tc;
        }
        if let Some((index, IsaPort::Count)) = isa_port(addr) {
            let count = self.isa_channels[index].count;
            let high = self.isa_flipflop;
            self.isa_flipflop = !high;
            return if high { (count >> 8) as u8 } else { count as u8 };
        }
        if let Some(base) = self.bm_base {
            if addr == base + BM_STATUS {
                self.poll_busy();
                return self.bm_status;
            }
            if addr == base + BM_COMMAND {
                return self.bm_command;
            }
        }
        0
    }
}

impl RegisterIo for SimDevice {
    fn read8(&mut self, addr: u32) -> u8 {
        match self.map.decode(addr) {
            Some(_) if self.detached => 0xFF,
            Some(reg) => self.read_register(reg),
            None => self.dma_port_read(addr as u16),
        }
    }

    fn write8(&mut self, addr: u32, value: u8) {
        self.register_writes += 1;
        match self.map.decode(addr) {
            Some(Register::Data) => self.data_out(&[value]),
            Some(reg) => self.write_register(reg, value),
            None => self.dma_port_write(addr as u16, value),
        }
    }

    fn read16(&mut self, addr: u32) -> u16 {
        match self.map.decode(addr) {
            Some(Register::Data) => {
                let b = self.data_in(2);
                u16::from_le_bytes([b[0], b[1]])
            }
            _ => self.read8(addr) as u16,
        }
    }

    fn write16(&mut self, addr: u32, value: u16) {
        self.register_writes += 1;
        if self.map.decode(addr) == Some(Register::Data) {
            self.data_out(&value.to_le_bytes());
        }
    }

    fn read32(&mut self, addr: u32) -> u32 {
        match self.map.decode(addr) {
            Some(Register::Data) => u32::from_le_bytes(self.data_in(4)),
            _ => self.read8(addr) as u32,
        }
    }

    fn write32(&mut self, addr: u32, value: u32) {
        self.register_writes += 1;
        match self.map.decode(addr) {
            Some(Register::Data) => self.data_out(&value.to_le_bytes()),
            Some(_) => {}
            None => {
                if self.bm_base.map_or(false, |base| addr as u16 == base + BM_PRD_ADDR) {
                    self.bm_prd = value;
                }
            }
        }
    }
}

/// A controller on the legacy primary channel driving the device `build`
/// returns, with a manual clock starting at zero.
pub fn sim_controller(
    build: impl FnOnce(Arc<ManualTicks>) -> SimDevice,
) -> (Controller<SimDevice>, Arc<ManualTicks>) {
    sim_controller_with(AtaConfig::default(), build)
}

pub fn sim_controller_with(
    config: AtaConfig,
    build: impl FnOnce(Arc<ManualTicks>) -> SimDevice,
) -> (Controller<SimDevice>, Arc<ManualTicks>) {
    let clock = Arc::new(ManualTicks::new(0));
    let device = build(Arc::clone(&clock));
    let map = RegisterMap::io(LEGACY_PRIMARY_BASE, LEGACY_PRIMARY_CTRL);
    let ticks: Arc<dyn TickSource> = clock.clone();
    let controller = match Controller::new(device, map, ticks, config) {
        Ok(c) => c,
        Err(e) => panic!("simulated controller setup failed: {}", e),
    };
    (controller, clock)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Bus;

    fn sim() -> SimDevice {
        SimDevice::new(Arc::new(ManualTicks::new(0)))
    }

    #[test]
    fn test_identify_strings_are_byte_swapped() {
        let dev = sim().with_model("AB");
        let id = dev.identify_data();
        let model = ID_WORD_MODEL * 2;
        assert_eq!(&id[model..model + 4], b"BA  ");
    }

    #[test]
    fn test_lba48_shadow_registers() {
        let mut bus = Bus::new(sim(), RegisterMap::io(0x1F0, 0x3F0));
        bus.write(Register::SectorNumber, 0x44);
        bus.write(Register::SectorNumber, 0x11);
        bus.write(Register::DeviceControl, ATA_DC_NIEN | ATA_DC_HOB);
        assert_eq!(bus.read(Register::SectorNumber), 0x44);
        bus.write(Register::DeviceControl, ATA_DC_NIEN);
        assert_eq!(bus.read(Register::SectorNumber), 0x11);
    }

    #[test]
    fn test_busy_advances_clock() {
        let clock = Arc::new(ManualTicks::new(0));
        let mut bus = Bus::new(SimDevice::new(Arc::clone(&clock)), RegisterMap::io(0x1F0, 0x3F0));
        bus.write(Register::DeviceHead, 0xA0);
        bus.write(Register::Command, ATA_CMD_CACHE_FLUSH);
        assert_ne!(bus.read(Register::ALT_STATUS) & ATA_SR_BSY, 0);
        assert_eq!(bus.read(Register::ALT_STATUS) & ATA_SR_BSY, 0);
        assert_eq!(clock.ticks(), 2);
    }

    #[test]
    fn test_device1_absent() {
        let mut bus = Bus::new(sim(), RegisterMap::io(0x1F0, 0x3F0));
        bus.write(Register::DeviceHead, 0xB0);
        assert_eq!(bus.read(Register::STATUS), 0);
    }

    #[test]
    fn test_dco_data_checksum() {
        let data = sim().dco_data();
        let sum = data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b));
        assert_eq!(sum, 0);
    }
}
