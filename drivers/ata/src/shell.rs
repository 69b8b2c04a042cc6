//! Single-line command shell over one controller session
//!
//! Each line is split on whitespace; the first word picks a command
//! (case-insensitive) from a name-keyed table and the rest are its
//! arguments. Numbers take decimal or `0x` hex. Output goes to a caller
//! supplied `String` so any front end can render it.
//!
//! ```rust,ignore
//! let mut shell = Shell::new(Session::new(controller));
//! let mut out = String::new();
//! shell.execute("rescan", &mut out)?;
//! shell.execute("read 0x800", &mut out)?;
//! ```

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::{self, Write};

use hashbrown::HashMap;
use log::LevelFilter;

use crate::command::CommandDescriptor;
use crate::consts::*;
use crate::controller::Controller;
use crate::device::{DeviceKind, DeviceTable, PciStorageFunction};
use crate::error::{AtaError, MismatchKind};
use crate::io::RegisterIo;
use crate::security::{PasswordKind, SecurityLevel, SecurityStatus};
use crate::types::Address;

/// Maximum number of arguments per command
const MAX_ARGS: usize = 16;

const DUMP_BYTES: usize = 64;
const IDENTIFY_DUMP_BYTES: usize = 258;

/// What the caller should do after a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandResult {
    Success,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellError {
    UnknownCommand(String),
    /// Bad or missing arguments; carries the usage line
    Usage(&'static str),
    Ata(AtaError),
    Output,
}

impl From<AtaError> for ShellError {
    fn from(e: AtaError) -> Self {
        ShellError::Ata(e)
    }
}

impl From<fmt::Error> for ShellError {
    fn from(_: fmt::Error) -> Self {
        ShellError::Output
    }
}

impl fmt::Display for ShellError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellError::UnknownCommand(name) => write!(f, "Unknown command: {}", name),
            ShellError::Usage(usage) => write!(f, "Usage: {}", usage),
            ShellError::Ata(e) => write!(f, "Error executing command: {}", e),
            ShellError::Output => write!(f, "output formatting failed"),
        }
    }
}

pub type ShellResult = Result<CommandResult, ShellError>;

/// Everything a command can touch
pub struct Session<B: RegisterIo> {
    pub controller: Controller<B>,
    pub devices: DeviceTable,
    /// ATA-capable PCI functions handed in by the platform for `rescan`
    pub pci: Vec<PciStorageFunction>,
}

impl<B: RegisterIo> Session<B> {
    pub fn new(controller: Controller<B>) -> Self {
        Self { controller, devices: DeviceTable::new(), pci: Vec::new() }
    }

    pub fn with_pci(mut self, functions: Vec<PciStorageFunction>) -> Self {
        self.pci = functions;
        self
    }
}

type CommandFn<B> = fn(&mut Session<B>, &[&str], &mut String) -> ShellResult;

/// Built-in command definition
pub struct Command<B: RegisterIo> {
    pub name: &'static str,
    pub description: &'static str,
    pub usage: &'static str,
    pub handler: CommandFn<B>,
}

pub struct Shell<B: RegisterIo> {
    commands: HashMap<&'static str, Command<B>>,
    session: Session<B>,
}

impl<B: RegisterIo> Shell<B> {
    pub fn new(session: Session<B>) -> Self {
        let commands = builtin_commands::<B>().into_iter().map(|c| (c.name, c)).collect();
        Self { commands, session }
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session<B> {
        &mut self.session
    }

    /// Command names in alphabetical order
    pub fn command_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run one command line. Empty lines do nothing.
    pub fn execute(&mut self, line: &str, out: &mut String) -> ShellResult {
        let mut words = line.split_whitespace();
        let Some(first) = words.next() else {
            return Ok(CommandResult::Success);
        };
        let mut args: heapless::Vec<&str, MAX_ARGS> = heapless::Vec::new();
        for word in words {
            args.push(word).map_err(|_| ShellError::Usage("at most 16 arguments"))?;
        }

        let name = first.to_ascii_lowercase();
        if name == "help" {
            self.write_help(out)?;
            return Ok(CommandResult::Success);
        }
        let Some(command) = self.commands.get(name.as_str()) else {
            log::warn!("unknown shell command '{}'", first);
            return Err(ShellError::UnknownCommand(String::from(first)));
        };
        log::debug!("shell: {} {:?}", command.name, args.as_slice());
        (command.handler)(&mut self.session, &args, out)
    }

    fn write_help(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "Available commands:")?;
        writeln!(out, "  {:10} - {}", "help", "Display available commands")?;
        for name in self.command_names() {
            if let Some(cmd) = self.commands.get(name) {
                writeln!(out, "  {:10} - {} ({})", cmd.name, cmd.description, cmd.usage)?;
            }
        }
        Ok(())
    }
}

fn parse_number(word: &str) -> Option<u64> {
    match word.strip_prefix("0x").or_else(|| word.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => word.parse().ok(),
    }
}

/// Numeric argument `index`; a missing argument reads as 0
fn number_arg(args: &[&str], index: usize, usage: &'static str) -> Result<u64, ShellError> {
    match args.get(index) {
        None => Ok(0),
        Some(word) => parse_number(word).ok_or(ShellError::Usage(usage)),
    }
}

fn password_arg<'a>(args: &[&'a str], usage: &'static str) -> Result<&'a [u8], ShellError> {
    args.first().map(|p| p.as_bytes()).ok_or(ShellError::Usage(usage))
}

/// Hex dump, 16 bytes per line, as bytes or little-endian words
fn dump(out: &mut String, bytes: &[u8], words: bool) -> fmt::Result {
    for (line, chunk) in bytes.chunks(16).enumerate() {
        write!(out, "{:04X}:", line * 16)?;
        if words {
            for pair in chunk.chunks(2) {
                let word = u16::from_le_bytes([pair[0], *pair.get(1).unwrap_or(&0)]);
                write!(out, " {:04X}", word)?;
            }
        } else {
            for b in chunk {
                write!(out, " {:02X}", b)?;
            }
        }
        writeln!(out)?;
    }
    Ok(())
}

fn cmd_read<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    let lba = number_arg(args, 0, "read <lba>")?;
    write!(out, "Reading LBA {} ({:X}h)...", lba, lba)?;
    s.controller.read_sectors(Address::Lba48(lba), 1)?;
    writeln!(out, "Success")?;
    dump(out, &s.controller.buffer()[..DUMP_BYTES], false)?;
    Ok(CommandResult::Success)
}

/// Writes the LBA pattern: every byte the low LBA byte, first four bytes the
/// LBA itself
fn cmd_write<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    let lba = number_arg(args, 0, "write <lba>")?;
    let buffer = s.controller.buffer_mut();
    buffer.fill(lba as u8);
    buffer[..4].copy_from_slice(&(lba as u32).to_le_bytes());
    write!(out, "Writing {:X}h to LBA {}...", lba, lba)?;
    s.controller.write_sectors(Address::Lba48(lba), 1)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn write_max_lbas<B: RegisterIo>(s: &mut Session<B>, out: &mut String) -> Result<(), ShellError> {
    let id = s.controller.identify()?;
    let native = s.controller.max_lba_from_native(id.supports_lba48())?;
    writeln!(out, "Max ID LBA : {:08X} ({})", id.max_lba(), id.max_lba())?;
    writeln!(out, "Max HPA LBA: {:08X} ({})", native, native)?;
    match s.controller.max_lba_from_dco() {
        Ok(dco) => writeln!(out, "Max DCO LBA: {:08X} ({})", dco, dco)?,
        Err(e) => writeln!(out, "Max DCO LBA: unavailable ({})", e)?,
    }
    Ok(())
}

fn cmd_id<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    write!(out, "Issuing Identify Device...")?;
    s.controller.identify()?;
    writeln!(out, "Success")?;
    dump(out, &s.controller.buffer()[..IDENTIFY_DUMP_BYTES], true)?;
    write_max_lbas(s, out)?;
    Ok(CommandResult::Success)
}

fn cmd_reset<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    write!(out, "Issuing Software Reset...")?;
    s.controller.soft_reset()?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_hpa<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    let lba = number_arg(args, 0, "hpa <lba>")?;
    write!(out, "Setting HPA to LBA {} ({:X}h)...", lba, lba)?;
    s.controller.set_hpa(lba, lba > LBA28_MAX, true)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_dco<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    const USAGE: &str = "dco <lba below 2^32>";
    let lba = number_arg(args, 0, USAGE)?;
    let lba = u32::try_from(lba).map_err(|_| ShellError::Usage(USAGE))?;
    write!(out, "Setting DCO to LBA {} ({:X}h)...", lba, lba)?;
    s.controller.set_capacity_via_dco(lba)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_secon<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    write!(out, "ENABLING security via DCO...")?;
    s.controller.set_dco_security(true)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_secoff<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    write!(out, "DISABLING security via DCO...")?;
    s.controller.set_dco_security(false)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

/// HPA first, then DCO; both are gone when Identify and DCO agree
fn cmd_remove<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    write!(out, "Removing DCO and HPA if they exist...")?;
    if let Err(e) = s.controller.remove_hpa() {
        log::warn!("HPA removal failed: {}", e);
    }
    s.controller.dco_restore()?;
    let id_max = s.controller.max_lba_from_identify()?;
    let dco_max = s.controller.max_lba_from_dco()?;
    if id_max != dco_max {
        return Err(AtaError::Mismatch(MismatchKind::CapacityReadback {
            expected: dco_max,
            actual: id_max,
        })
        .into());
    }
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_setmpw<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    let password = password_arg(args, "setmpw <password>")?;
    write!(out, "Setting master password...")?;
    s.controller.security_set_password(PasswordKind::Master, SecurityLevel::High, password)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_setupw<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    let password = password_arg(args, "setupw <password>")?;
    write!(out, "Setting user password...")?;
    s.controller.security_set_password(PasswordKind::User, SecurityLevel::High, password)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_unlock<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    let password = password_arg(args, "unlock <password>")?;
    write!(out, "Unlocking...")?;
    s.controller.security_unlock(password)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_pwdis<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    let password = password_arg(args, "pwdis <password>")?;
    write!(out, "Disabling password...")?;
    s.controller.security_disable(password)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_viewbuf<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    let sectors = number_arg(args, 0, "viewbuf <sectors>")?.max(1) as usize;
    let bytes = (sectors * SECTOR_SIZE).min(s.controller.buffer().capacity());
    dump(out, &s.controller.buffer()[..bytes], true)?;
    Ok(CommandResult::Success)
}

/// Raw command: opcode, features, sector count and LBA. LBAs past 28 bits
/// are sent 48-bit.
fn cmd_atacmd<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    const USAGE: &str = "atacmd <opcode> [features] [count] [lba]";
    if args.is_empty() {
        return Err(ShellError::Usage(USAGE));
    }
    let opcode = u8::try_from(number_arg(args, 0, USAGE)?).map_err(|_| ShellError::Usage(USAGE))?;
    let features = u16::try_from(number_arg(args, 1, USAGE)?).map_err(|_| ShellError::Usage(USAGE))?;
    let count = u16::try_from(number_arg(args, 2, USAGE)?).map_err(|_| ShellError::Usage(USAGE))?;
    let lba = number_arg(args, 3, USAGE)?;
    let address = if lba > LBA28_MAX { Address::Lba48(lba) } else { Address::Lba28(lba as u32) };

    let cmd = CommandDescriptor::new(opcode)
        .with_features(features)
        .with_sector_count(count)
        .with_address(address);
    let outcome = s.controller.dispatch(&cmd);
    writeln!(
        out,
        "Cmd {:02X}h: status {:02X}h error {:02X}h code {} bytes {}",
        outcome.opcode, outcome.status, outcome.error, outcome.code, outcome.total_bytes
    )?;
    let o = outcome.output;
    writeln!(
        out,
        "SC {:04X} LBA {:04X} {:04X} {:04X} DH {:02X}",
        o.sector_count, o.lba_low, o.lba_mid, o.lba_high, o.device_head
    )?;
    outcome.into_result()?;
    Ok(CommandResult::Success)
}

fn cmd_rescan<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    let Session { controller, devices, pci } = s;
    let found = devices.rescan(controller, pci.as_slice())?;
    writeln!(out, "{} ATA device(s):", found)?;
    for (i, entry) in devices.entries().iter().enumerate() {
        write!(
            out,
            "  {:2}: {:04X}/{:04X} {:?} irq {}",
            i, entry.ports.command_base, entry.ports.control_base, entry.device, entry.ports.irq
        )?;
        if let Some(bm) = entry.ports.bus_master {
            write!(out, " bm {:04X}", bm)?;
        }
        match entry.pci {
            Some(pci) => writeln!(out, " pci {:02X}:{:02X}.{}", pci.bus, pci.device, pci.function)?,
            None => writeln!(out, " legacy")?,
        }
    }
    let model = controller.identify()?.model();
    writeln!(out, "Active HDD: {}", model)?;
    Ok(CommandResult::Success)
}

fn cmd_dut<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    if let Some(entry) = s.devices.active_entry() {
        if entry.kind != DeviceKind::Ata {
            log::warn!("active entry is {:?}", entry.kind);
        }
        writeln!(out, "Channel {:04X} {:?}", entry.ports.command_base, entry.device)?;
    }
    let id = s.controller.identify()?;
    writeln!(out, "Model # .....: {}", id.model())?;
    writeln!(out, "Serial # ....: {}", id.serial())?;
    writeln!(out, "Firmware Rev : {}", id.firmware())?;
    write_max_lbas(s, out)?;

    let word = id.security_word();
    let status = SecurityStatus::from_word(word);
    write!(out, "Security W128: {:04X}h, ", word)?;
    match status.state.code() {
        Some(code) => write!(out, "{} {:?}, ", code, status.state)?,
        None => write!(out, "Security not supported, ")?,
    }
    match status.level {
        SecurityLevel::Maximum => writeln!(out, "level MAX")?,
        SecurityLevel::High => writeln!(out, "level HIGH")?,
    }
    Ok(CommandResult::Success)
}

fn cmd_clrbuf<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], _out: &mut String) -> ShellResult {
    s.controller.buffer_mut().fill(0);
    Ok(CommandResult::Success)
}

fn cmd_fillbuf<B: RegisterIo>(s: &mut Session<B>, args: &[&str], _out: &mut String) -> ShellResult {
    let value = number_arg(args, 0, "fillbuf <byte>")?;
    s.controller.buffer_mut().fill(value as u8);
    Ok(CommandResult::Success)
}

fn cmd_rdma<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    let lba = number_arg(args, 0, "rdma <lba>")?;
    write!(out, "Reading LBA {} ({:X}h)...", lba, lba)?;
    s.controller.read_dma(lba, 1)?;
    writeln!(out, "Success")?;
    dump(out, &s.controller.buffer()[..DUMP_BYTES], false)?;
    Ok(CommandResult::Success)
}

fn cmd_trcclr<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], _out: &mut String) -> ShellResult {
    s.controller.bus_mut().trace_mut().clear();
    s.controller.history_mut().clear();
    Ok(CommandResult::Success)
}

fn cmd_trc<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    let history = s.controller.history();
    for entry in history.entries_newest_first() {
        let o = &entry.outcome;
        writeln!(
            out,
            "#{:<5} {:?} cmd {:02X}h status {:02X}h error {:02X}h code {}",
            entry.entry_number, entry.device, o.opcode, o.status, o.error, o.code
        )?;
    }
    let trace = s.controller.bus().trace();
    writeln!(out, "{} register accesses ({} kept)", trace.total(), trace.len())?;
    for access in trace.iter() {
        writeln!(
            out,
            "  {:?} {:?} @{:04X} = {:X}",
            access.kind, access.register, access.addr, access.value
        )?;
    }
    Ok(CommandResult::Success)
}

fn cmd_erase<B: RegisterIo>(s: &mut Session<B>, args: &[&str], out: &mut String) -> ShellResult {
    const USAGE: &str = "erase <password> [enhanced]";
    let password = password_arg(args, USAGE)?;
    let enhanced = match args.get(1) {
        None => false,
        Some(word) if word.eq_ignore_ascii_case("enhanced") => true,
        Some(_) => return Err(ShellError::Usage(USAGE)),
    };
    write!(out, "Executing security erase...")?;
    s.controller.secure_erase(password, enhanced)?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

fn cmd_smart<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    write!(out, "Getting SMART attribute data...")?;
    let data = s.controller.smart_read_data()?;
    writeln!(out, "Success")?;
    writeln!(out, "Att ID | Flags | Value | Worst | Raw")?;
    writeln!(out, "-------+-------+-------+-------+--------------")?;
    for a in &data.attributes {
        writeln!(
            out,
            "   {:3} | {:04X}h |  {:02X}h  |  {:02X}h  | {:012X}h",
            a.id, a.flags, a.current, a.worst, a.raw
        )?;
    }
    Ok(CommandResult::Success)
}

fn set_log_level(level: LevelFilter) {
    crate::logger::global().set_min_level(level);
    log::set_max_level(level);
}

fn cmd_debon<B: RegisterIo>(_s: &mut Session<B>, _args: &[&str], _out: &mut String) -> ShellResult {
    set_log_level(LevelFilter::Debug);
    Ok(CommandResult::Success)
}

fn cmd_deboff<B: RegisterIo>(_s: &mut Session<B>, _args: &[&str], _out: &mut String) -> ShellResult {
    set_log_level(LevelFilter::Info);
    Ok(CommandResult::Success)
}

fn cmd_exit<B: RegisterIo>(_s: &mut Session<B>, _args: &[&str], _out: &mut String) -> ShellResult {
    Ok(CommandResult::Exit)
}

fn builtin_commands<B: RegisterIo>() -> [Command<B>; 29] {
    [
        Command { name: "read", description: "PIO read of one sector", usage: "read <lba>", handler: cmd_read::<B> },
        Command { name: "write", description: "PIO write of the LBA pattern", usage: "write <lba>", handler: cmd_write::<B> },
        Command { name: "id", description: "Identify device and max LBAs", usage: "id", handler: cmd_id::<B> },
        Command { name: "reset", description: "Software reset", usage: "reset", handler: cmd_reset::<B> },
        Command { name: "hpa", description: "Set a non-volatile HPA", usage: "hpa <lba>", handler: cmd_hpa::<B> },
        Command { name: "dco", description: "Change capacity via DCO", usage: "dco <lba>", handler: cmd_dco::<B> },
        Command { name: "secon", description: "Enable security via DCO", usage: "secon", handler: cmd_secon::<B> },
        Command { name: "secoff", description: "Disable security via DCO", usage: "secoff", handler: cmd_secoff::<B> },
        Command { name: "remove", description: "Remove HPA and DCO", usage: "remove", handler: cmd_remove::<B> },
        Command { name: "setmpw", description: "Set the master password", usage: "setmpw <password>", handler: cmd_setmpw::<B> },
        Command { name: "setupw", description: "Set the user password", usage: "setupw <password>", handler: cmd_setupw::<B> },
        Command { name: "unlock", description: "Security unlock", usage: "unlock <password>", handler: cmd_unlock::<B> },
        Command { name: "pwdis", description: "Security disable password", usage: "pwdis <password>", handler: cmd_pwdis::<B> },
        Command { name: "viewbuf", description: "Show the data buffer", usage: "viewbuf [sectors]", handler: cmd_viewbuf::<B> },
        Command { name: "atacmd", description: "Send a raw command", usage: "atacmd <opcode> [features] [count] [lba]", handler: cmd_atacmd::<B> },
        Command { name: "rescan", description: "Scan for ATA devices", usage: "rescan", handler: cmd_rescan::<B> },
        Command { name: "dut", description: "Show the active device", usage: "dut", handler: cmd_dut::<B> },
        Command { name: "clrbuf", description: "Zero the data buffer", usage: "clrbuf", handler: cmd_clrbuf::<B> },
        Command { name: "fillbuf", description: "Fill the data buffer", usage: "fillbuf <byte>", handler: cmd_fillbuf::<B> },
        Command { name: "rdma", description: "DMA read of one sector", usage: "rdma <lba>", handler: cmd_rdma::<B> },
        Command { name: "trcclr", description: "Clear history and register trace", usage: "trcclr", handler: cmd_trcclr::<B> },
        Command { name: "trc", description: "Show history and register trace", usage: "trc", handler: cmd_trc::<B> },
        Command { name: "erase", description: "Security erase unit", usage: "erase <password> [enhanced]", handler: cmd_erase::<B> },
        Command { name: "smart", description: "SMART attributes", usage: "smart", handler: cmd_smart::<B> },
        Command { name: "debon", description: "Log at debug level", usage: "debon", handler: cmd_debon::<B> },
        Command { name: "deboff", description: "Log at info level", usage: "deboff", handler: cmd_deboff::<B> },
        Command { name: "exit", description: "Leave the shell", usage: "exit", handler: cmd_exit::<B> },
        Command { name: "ex", description: "Leave the shell", usage: "ex", handler: cmd_exit::<B> },
        Command { name: "freeze", description: "Security and DCO freeze lock", usage: "freeze", handler: cmd_freeze::<B> },
    ]
}

fn cmd_freeze<B: RegisterIo>(s: &mut Session<B>, _args: &[&str], out: &mut String) -> ShellResult {
    write!(out, "Freezing security and DCO...")?;
    s.controller.security_freeze_lock()?;
    s.controller.dco_freeze_lock()?;
    writeln!(out, "Success")?;
    Ok(CommandResult::Success)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sim_controller, SimAttribute, SimDevice};
    use crate::timer::ManualTicks;
    use alloc::sync::Arc;

    type Dev = SimDevice;

    fn shell(build: impl FnOnce(Arc<ManualTicks>) -> Dev) -> Shell<Dev> {
        let (ctl, _) = sim_controller(build);
        Shell::new(Session::new(ctl))
    }

    fn run(shell: &mut Shell<Dev>, line: &str) -> (ShellResult, String) {
        let mut out = String::new();
        let result = shell.execute(line, &mut out);
        (result, out)
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("42"), Some(42));
        assert_eq!(parse_number("0x1F"), Some(0x1F));
        assert_eq!(parse_number("0XFF"), Some(0xFF));
        assert_eq!(parse_number("zz"), None);
    }

    #[test]
    fn test_unknown_and_empty() {
        let mut sh = shell(SimDevice::new);
        assert_eq!(run(&mut sh, "").0, Ok(CommandResult::Success));
        assert_eq!(
            run(&mut sh, "frobnicate").0,
            Err(ShellError::UnknownCommand(String::from("frobnicate")))
        );
        assert_eq!(run(&mut sh, "EXIT").0, Ok(CommandResult::Exit));
    }

    #[test]
    fn test_help_lists_commands() {
        let mut sh = shell(SimDevice::new);
        let (result, out) = run(&mut sh, "help");
        assert!(result.is_ok());
        for name in ["read", "atacmd", "smart", "fillbuf"] {
            assert!(out.contains(name), "help lists {}", name);
        }
        assert!(sh.command_names().windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_read_and_write() {
        let mut sh = shell(SimDevice::new);
        let (result, out) = run(&mut sh, "read 3");
        assert!(result.is_ok());
        assert!(out.starts_with("Reading LBA 3 (3h)...Success"));
        assert!(out.contains("0000: 03 04 05 06"));

        assert!(run(&mut sh, "write 0x105").0.is_ok());
        let sector = sh.session().controller.bus().io().sector(0x105);
        assert_eq!(&sector[..6], &[0x05, 0x01, 0, 0, 0x05, 0x05]);
    }

    #[test]
    fn test_bad_number_is_usage_error() {
        let mut sh = shell(SimDevice::new);
        assert_eq!(run(&mut sh, "read lots").0, Err(ShellError::Usage("read <lba>")));
        assert!(sh.session().controller.bus().io().commands().is_empty());
    }

    #[test]
    fn test_buffer_commands() {
        let mut sh = shell(SimDevice::new);
        run(&mut sh, "fillbuf 0xAB").0.unwrap();
        let (_, out) = run(&mut sh, "viewbuf");
        assert!(out.starts_with("0000: ABAB ABAB"));
        assert_eq!(out.lines().count(), SECTOR_SIZE / 16);

        run(&mut sh, "clrbuf").0.unwrap();
        assert!(sh.session().controller.buffer().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_passwords_need_an_argument() {
        let mut sh = shell(SimDevice::new);
        assert_eq!(run(&mut sh, "setupw").0, Err(ShellError::Usage("setupw <password>")));
        run(&mut sh, "setupw hunter2").0.unwrap();
        assert!(sh.session().controller.bus().io().security.enabled);
        run(&mut sh, "pwdis hunter2").0.unwrap();
        assert!(!sh.session().controller.bus().io().security.enabled);
    }

    #[test]
    fn test_atacmd_reports_registers() {
        let mut sh = shell(SimDevice::new);
        let (result, out) = run(&mut sh, "atacmd 0xE7");
        assert!(result.is_ok());
        assert!(out.starts_with("Cmd E7h: status 50h error 00h code 0"));

        let (result, _) = run(&mut sh, "atacmd 0x99");
        assert!(matches!(result, Err(ShellError::Ata(AtaError::DeviceError { .. }))));
        assert_eq!(run(&mut sh, "atacmd").0, Err(ShellError::Usage("atacmd <opcode> [features] [count] [lba]")));
    }

    #[test]
    fn test_rescan_and_dut() {
        let mut sh = shell(|clock| SimDevice::new(clock).with_model("TEST DRIVE"));
        let (result, out) = run(&mut sh, "rescan");
        assert!(result.is_ok());
        assert!(out.starts_with("1 ATA device(s):"));
        assert!(out.contains("01F0/03F0"));
        assert!(out.contains("Active HDD: TEST DRIVE"));

        let (result, out) = run(&mut sh, "dut");
        assert!(result.is_ok());
        assert!(out.contains("Model # .....: TEST DRIVE"));
        assert!(out.contains("SEC1"));
        assert!(out.contains("level HIGH"));
    }

    #[test]
    fn test_hpa_then_remove() {
        let mut sh = shell(|clock| SimDevice::new(clock).with_capacity(1000));
        run(&mut sh, "hpa 500").0.unwrap();
        assert_eq!(sh.session().controller.bus().io().current_max(), 500);
        run(&mut sh, "remove").0.unwrap();
        assert_eq!(sh.session().controller.bus().io().current_max(), 999);
    }

    #[test]
    fn test_smart_table() {
        let mut sh = shell(|clock| {
            SimDevice::new(clock)
                .with_smart_attribute(SimAttribute { id: 194, flags: 0x22, current: 64, worst: 50, raw: 36 })
        });
        let (result, out) = run(&mut sh, "smart");
        assert!(result.is_ok());
        assert!(out.contains("   194 | 0022h |  40h  |  32h  | 000000000024h"));
    }

    #[test]
    fn test_trace_clear() {
        let mut sh = shell(SimDevice::new);
        run(&mut sh, "id").0.unwrap();
        let (_, out) = run(&mut sh, "trc");
        assert!(out.contains("cmd ECh"));
        run(&mut sh, "trcclr").0.unwrap();
        assert!(sh.session().controller.history().is_empty());
        assert!(sh.session().controller.bus().trace().is_empty());
    }
}
