//! Command timeouts driven by the BIOS timer tick.
//!
//! The tick counter advances 18.2 times a second and is cleared at midnight.
//! A check that sees the counter go backwards moves its baseline instead of
//! reporting a timeout.

use core::ptr::read_volatile;
use core::sync::atomic::{AtomicU32, Ordering};

use crate::consts::TICKS_PER_SECOND;

/// Source of timer ticks
pub trait TickSource: Send + Sync {
    fn ticks(&self) -> u32;
}

/// The BIOS data area tick counter (physical 0x0046C).
pub struct BiosTicks {
    counter: *const u32,
}

// Read-only access to a counter the timer interrupt updates.
unsafe impl Send for BiosTicks {}
unsafe impl Sync for BiosTicks {}

impl BiosTicks {
    pub const PHYS_ADDR: usize = 0x46C;

    /// # Safety
    ///
    /// `counter` must point at the mapped BIOS tick counter for the life of
    /// this value.
    pub unsafe fn new(counter: *const u32) -> Self {
        Self { counter }
    }
}

impl TickSource for BiosTicks {
    fn ticks(&self) -> u32 {
        unsafe { read_volatile(self.counter) }
    }
}

/// A tick counter advanced by software: a timer interrupt hook on real
/// systems, the test itself in simulation.
#[derive(Debug, Default)]
pub struct ManualTicks {
    now: AtomicU32,
}

impl ManualTicks {
    pub const fn new(start: u32) -> Self {
        Self { now: AtomicU32::new(start) }
    }

    pub fn set(&self, ticks: u32) {
        self.now.store(ticks, Ordering::SeqCst);
    }

    pub fn advance(&self, ticks: u32) {
        self.now.fetch_add(ticks, Ordering::SeqCst);
    }

    pub fn advance_secs(&self, secs: u32) {
        self.advance(secs * TICKS_PER_SECOND);
    }
}

impl TickSource for ManualTicks {
    fn ticks(&self) -> u32 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Baseline for one armed command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    start: u32,
}

impl Timeout {
    pub fn arm(now: u32) -> Self {
        Self { start: now }
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    /// True once `secs` seconds worth of ticks have passed since arming.
    pub fn expired(&mut self, now: u32, secs: u32) -> bool {
        if now < self.start {
            // Midnight rollover.
            self.start = now;
            return false;
        }
        now - self.start >= secs.saturating_mul(TICKS_PER_SECOND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry() {
        let mut t = Timeout::arm(100);
        assert!(!t.expired(100, 1));
        assert!(!t.expired(117, 1));
        assert!(t.expired(118, 1));
    }

    #[test]
    fn test_midnight_wraparound_resets_baseline() {
        let mut t = Timeout::arm(0x0018_00A0);
        assert!(!t.expired(3, 20), "counter went backwards, not a timeout");
        assert_eq!(t.start(), 3);
        assert!(!t.expired(3 + 20 * 18 - 1, 20));
        assert!(t.expired(3 + 20 * 18, 20));
    }

    #[test]
    fn test_manual_ticks() {
        let clock = ManualTicks::new(5);
        clock.advance_secs(2);
        assert_eq!(clock.ticks(), 41);
    }
}
