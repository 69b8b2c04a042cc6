//! ATA security feature set
//!
//! The state is read from Identify word 128. Passwords travel in a 512-byte
//! parameter block: word 0 carries the password type (bit 0) and, for
//! SECURITY SET PASSWORD, the level in bit 8; words 1-16 carry the password.

use serde::Serialize;

use crate::command::{CommandDescriptor, CommandOutcome};
use crate::consts::*;
use crate::controller::Controller;
use crate::error::{AtaError, AtaResult, MismatchKind};
use crate::io::RegisterIo;

pub const MAX_PASSWORD_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PasswordKind {
    User,
    Master,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SecurityLevel {
    #[default]
    High,
    Maximum,
}

/// Security states as named by the ATA standard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SecurityState {
    Unsupported,
    /// SEC1
    SupportedDisabled,
    /// SEC2
    SupportedDisabledFrozen,
    /// SEC4
    EnabledLocked,
    /// SEC5
    EnabledUnlockedNotFrozen,
    /// SEC6
    EnabledUnlockedFrozen,
}

impl SecurityState {
    /// Decode the low byte of Identify word 128. Locked wins over frozen.
    pub fn decode(word: u16) -> Self {
        let has = |bit: u16| word & bit != 0;
        if !has(SEC_SUPPORTED) {
            return SecurityState::Unsupported;
        }
        match (has(SEC_ENABLED), has(SEC_LOCKED), has(SEC_FROZEN)) {
            (false, _, false) => SecurityState::SupportedDisabled,
            (false, _, true) => SecurityState::SupportedDisabledFrozen,
            (true, true, _) => SecurityState::EnabledLocked,
            (true, false, false) => SecurityState::EnabledUnlockedNotFrozen,
            (true, false, true) => SecurityState::EnabledUnlockedFrozen,
        }
    }

    /// Standard state name, `None` when the feature set is absent
    pub fn code(self) -> Option<&'static str> {
        match self {
            SecurityState::Unsupported => None,
            SecurityState::SupportedDisabled => Some("SEC1"),
            SecurityState::SupportedDisabledFrozen => Some("SEC2"),
            SecurityState::EnabledLocked => Some("SEC4"),
            SecurityState::EnabledUnlockedNotFrozen => Some("SEC5"),
            SecurityState::EnabledUnlockedFrozen => Some("SEC6"),
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(
            self,
            SecurityState::EnabledLocked
                | SecurityState::EnabledUnlockedNotFrozen
                | SecurityState::EnabledUnlockedFrozen
        )
    }

    pub fn is_locked(self) -> bool {
        self == SecurityState::EnabledLocked
    }

    pub fn is_frozen(self) -> bool {
        matches!(
            self,
            SecurityState::SupportedDisabledFrozen | SecurityState::EnabledUnlockedFrozen
        )
    }
}

/// Everything word 128 says
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SecurityStatus {
    pub state: SecurityState,
    pub level: SecurityLevel,
    pub count_expired: bool,
    pub enhanced_erase: bool,
}

impl SecurityStatus {
    pub fn from_word(word: u16) -> Self {
        Self {
            state: SecurityState::decode(word),
            level: if word & SEC_LEVEL_MAX != 0 { SecurityLevel::Maximum } else { SecurityLevel::High },
            count_expired: word & SEC_COUNT_EXPIRED != 0,
            enhanced_erase: word & SEC_ENHANCED_ERASE != 0,
        }
    }
}

/// Build the parameter block for F1/F2/F4/F6
pub fn password_block(
    kind: PasswordKind,
    level: SecurityLevel,
    password: &[u8],
) -> AtaResult<[u8; SECTOR_SIZE]> {
    if password.len() > MAX_PASSWORD_LEN {
        return Err(AtaError::InvalidArgument);
    }
    let mut block = [0u8; SECTOR_SIZE];
    block[0] = (kind == PasswordKind::Master) as u8;
    block[1] = (level == SecurityLevel::Maximum) as u8;
    block[2..2 + password.len()].copy_from_slice(password);
    Ok(block)
}

impl<B: RegisterIo> Controller<B> {
    pub fn security_status(&mut self) -> AtaResult<SecurityStatus> {
        let id = self.identify()?;
        Ok(SecurityStatus::from_word(id.security_word()))
    }

    /// Send one password-carrying security command
    pub(crate) fn send_password_block(
        &mut self,
        opcode: u8,
        block: &[u8; SECTOR_SIZE],
    ) -> AtaResult<CommandOutcome> {
        self.buffer_mut()[..SECTOR_SIZE].copy_from_slice(block);
        self.execute(&CommandDescriptor::new(opcode))
    }

    /// Try `opcode` with the master password first, then the user password.
    fn master_then_user(&mut self, opcode: u8, password: &[u8]) -> AtaResult<()> {
        let block = password_block(PasswordKind::Master, SecurityLevel::High, password)?;
        match self.send_password_block(opcode, &block) {
            Ok(_) => return Ok(()),
            Err(e) => log::warn!("0x{:02X} as master password failed ({}), trying user", opcode, e),
        }
        let block = password_block(PasswordKind::User, SecurityLevel::High, password)?;
        self.send_password_block(opcode, &block)?;
        Ok(())
    }

    /// SECURITY SET PASSWORD. Setting the user password enables security,
    /// which is checked afterwards.
    pub fn security_set_password(
        &mut self,
        kind: PasswordKind,
        level: SecurityLevel,
        password: &[u8],
    ) -> AtaResult<()> {
        let block = password_block(kind, level, password)?;
        self.send_password_block(ATA_CMD_SECURITY_SET_PASSWORD, &block)?;
        if kind == PasswordKind::User && !self.security_status()?.state.is_enabled() {
            return Err(AtaError::Mismatch(MismatchKind::NotEnabled));
        }
        log::info!("{:?} password set", kind);
        Ok(())
    }

    /// SECURITY UNLOCK, as master and then as user
    pub fn security_unlock(&mut self, password: &[u8]) -> AtaResult<()> {
        self.master_then_user(ATA_CMD_SECURITY_UNLOCK, password)?;
        if self.security_status()?.state.is_locked() {
            return Err(AtaError::Mismatch(MismatchKind::StillLocked));
        }
        log::info!("device unlocked");
        Ok(())
    }

    /// SECURITY DISABLE PASSWORD, as master and then as user
    pub fn security_disable(&mut self, password: &[u8]) -> AtaResult<()> {
        self.master_then_user(ATA_CMD_SECURITY_DISABLE, password)?;
        if self.security_status()?.state.is_enabled() {
            return Err(AtaError::Mismatch(MismatchKind::StillEnabled));
        }
        log::info!("security disabled");
        Ok(())
    }

    pub fn security_freeze_lock(&mut self) -> AtaResult<()> {
        self.execute(&CommandDescriptor::new(ATA_CMD_SECURITY_FREEZE_LOCK))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{sim_controller, SimDevice};

    #[test]
    fn test_state_decode() {
        assert_eq!(SecurityState::decode(0x0001).code(), Some("SEC1"));
        assert_eq!(SecurityState::decode(0x0009), SecurityState::SupportedDisabledFrozen);
        assert_eq!(SecurityState::decode(0x0009).code(), Some("SEC2"));
        assert_eq!(SecurityState::decode(0x0007), SecurityState::EnabledLocked);
        assert_eq!(SecurityState::decode(0x0007).code(), Some("SEC4"));
        assert_eq!(SecurityState::decode(0x0003), SecurityState::EnabledUnlockedNotFrozen);
        assert_eq!(SecurityState::decode(0x000B), SecurityState::EnabledUnlockedFrozen);
        assert_eq!(SecurityState::decode(0x0000), SecurityState::Unsupported);
        assert_eq!(SecurityState::decode(0x0000).code(), None);

        let status = SecurityStatus::from_word(0x0131);
        assert_eq!(status.level, SecurityLevel::Maximum);
        assert!(status.count_expired);
        assert!(status.enhanced_erase);
    }

    #[test]
    fn test_password_block_layout() {
        let block = password_block(PasswordKind::Master, SecurityLevel::Maximum, b"pw").unwrap();
        assert_eq!(&block[..4], &[1, 1, b'p', b'w']);
        assert!(block[4..].iter().all(|&b| b == 0));
        assert_eq!(
            password_block(PasswordKind::User, SecurityLevel::High, &[b'x'; 33]),
            Err(AtaError::InvalidArgument)
        );
    }

    #[test]
    fn test_unlock_falls_back_to_user_password() {
        let (mut ctl, _) =
            sim_controller(|clock| SimDevice::new(clock).with_user_password("secret").locked());
        assert_eq!(ctl.security_status().unwrap().state, SecurityState::EnabledLocked);

        ctl.security_unlock(b"secret").unwrap();
        let dev = ctl.bus().io();
        let unlocks: usize =
            dev.commands().iter().filter(|&&op| op == ATA_CMD_SECURITY_UNLOCK).count();
        assert_eq!(unlocks, 2, "master attempt then user attempt");
        assert_eq!(dev.security.attempts, 0);
        assert_eq!(
            ctl.security_status().unwrap().state,
            SecurityState::EnabledUnlockedNotFrozen
        );
    }

    #[test]
    fn test_unlock_with_wrong_password() {
        let (mut ctl, _) =
            sim_controller(|clock| SimDevice::new(clock).with_user_password("secret").locked());
        assert!(matches!(ctl.security_unlock(b"wrong"), Err(AtaError::DeviceError { .. })));
        assert!(ctl.bus().io().security.locked);
    }

    #[test]
    fn test_password_lifecycle() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        assert_eq!(ctl.security_status().unwrap().state, SecurityState::SupportedDisabled);

        ctl.security_set_password(PasswordKind::User, SecurityLevel::High, b"user").unwrap();
        assert!(ctl.security_status().unwrap().state.is_enabled());

        ctl.security_disable(b"user").unwrap();
        assert_eq!(ctl.security_status().unwrap().state, SecurityState::SupportedDisabled);

        ctl.security_freeze_lock().unwrap();
        assert_eq!(ctl.security_status().unwrap().state, SecurityState::SupportedDisabledFrozen);
        assert!(ctl
            .security_set_password(PasswordKind::User, SecurityLevel::High, b"user")
            .is_err());
    }

    #[test]
    fn test_master_password_does_not_enable() {
        let (mut ctl, _) = sim_controller(|clock| SimDevice::new(clock));
        ctl.security_set_password(PasswordKind::Master, SecurityLevel::High, b"m").unwrap();
        assert_eq!(ctl.bus().io().security.master, crate::sim::password_bytes("m"));
        assert!(!ctl.security_status().unwrap().state.is_enabled());
    }
}
