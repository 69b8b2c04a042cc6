//! Command history ring.
//!
//! Holds the last `N` dispatched commands. Each entry carries a running
//! `entry_number`, so the total number of commands issued stays known after
//! the ring wraps.

use heapless::Deque;
use serde::Serialize;

use crate::command::CommandOutcome;
use crate::consts::HISTORY_CAPACITY;
use crate::types::DeviceSelect;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    /// 1 for the first command ever recorded
    pub entry_number: u64,
    pub device: DeviceSelect,
    pub outcome: CommandOutcome,
}

pub struct CommandHistory<const N: usize = HISTORY_CAPACITY> {
    entries: Deque<HistoryEntry, N>,
    next_number: u64,
}

impl<const N: usize> CommandHistory<N> {
    pub const fn new() -> Self {
        Self {
            entries: Deque::new(),
            next_number: 1,
        }
    }

    /// Append, dropping the oldest entry when full
    pub fn record(&mut self, device: DeviceSelect, outcome: CommandOutcome) -> u64 {
        let entry_number = self.next_number;
        self.next_number += 1;
        if self.entries.is_full() {
            self.entries.pop_front();
        }
        let _ = self.entries.push_back(HistoryEntry { entry_number, device, outcome });
        entry_number
    }

    /// `index` 0 is the newest entry
    pub fn get_previous(&self, index: usize) -> Option<&HistoryEntry> {
        let len = self.entries.len();
        if index >= len {
            return None;
        }
        self.entries.iter().nth(len - 1 - index)
    }

    /// Entry number of the newest entry, 0 when nothing was recorded
    pub fn last_index(&self) -> u64 {
        self.next_number - 1
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        N
    }

    pub fn entries_newest_first(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter().rev()
    }

    /// Drop the entries; numbering continues
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<const N: usize> Default for CommandHistory<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(opcode: u8) -> CommandOutcome {
        CommandOutcome { opcode, ..Default::default() }
    }

    #[test]
    fn test_wraparound_keeps_numbering() {
        let mut history: CommandHistory<4> = CommandHistory::new();
        for op in 0..6u8 {
            history.record(DeviceSelect::Device0, outcome(op));
        }
        assert_eq!(history.len(), 4);
        assert_eq!(history.last_index(), 6);

        let newest = history.get_previous(0).unwrap();
        assert_eq!(newest.entry_number, 6);
        assert_eq!(newest.outcome.opcode, 5);

        let oldest = history.get_previous(3).unwrap();
        assert_eq!(oldest.entry_number, 3);
        assert!(history.get_previous(4).is_none());
    }

    #[test]
    fn test_newest_first_order() {
        let mut history: CommandHistory<3> = CommandHistory::new();
        history.record(DeviceSelect::Device0, outcome(0x20));
        history.record(DeviceSelect::Device1, outcome(0xEC));
        let ops: alloc::vec::Vec<u8> = history.entries_newest_first().map(|e| e.outcome.opcode).collect();
        assert_eq!(ops, [0xEC, 0x20]);

        history.clear();
        assert!(history.is_empty());
        assert_eq!(history.record(DeviceSelect::Device0, outcome(0)), 3);
    }
}
