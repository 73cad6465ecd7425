// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The fixed-capacity table tracking commands awaiting a broker
//! acknowledgment, keyed by packet id. Agent-thread-private: nothing outside
//! [`crate::agent::core::Agent`] ever touches it.

use log::warn;

use crate::command::Command;
use crate::error::AgentStatus;
use crate::interface::CompletionOutcome;

/// Default size of [`PendingAckTable`], matching `MAX_OUTSTANDING_ACKS`.
pub const DEFAULT_MAX_OUTSTANDING_ACKS: usize = 20;

struct Slot {
    packet_id: u16,
    command: Command,
}

/// A fixed-capacity array of `{packet_id, command}` slots. `packet_id == 0`
/// marks a slot free; the MQTT protocol layer never assigns packet id 0, so
/// zero is never ambiguous with a real in-flight ack.
///
/// Deliberately a linear-scan array rather than a map: the table is small
/// (20 entries by default) and is only ever touched from the agent task, so
/// there is nothing to gain from a lock-free or hashed structure.
pub struct PendingAckTable {
    slots: Vec<Option<Slot>>,
}

impl PendingAckTable {
    /// Build a new table with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        PendingAckTable { slots }
    }

    /// Insert a command awaiting an ack for `packet_id`. First empty slot
    /// wins the tie-break. On a full table, hands the command back
    /// unconsumed so the caller can still complete it (with `NoMemory`)
    /// rather than silently dropping it.
    pub fn insert(&mut self, packet_id: u16, command: Command) -> Result<(), Command> {
        debug_assert_ne!(packet_id, 0, "packet id 0 is never a real ack target");
        if let Some(slot) = self.slots.iter_mut().find(|s| s.is_none()) {
            *slot = Some(Slot { packet_id, command });
            Ok(())
        } else {
            Err(command)
        }
    }

    /// Find the index of the slot holding `packet_id`, if any. Packet id 0
    /// always misses.
    #[must_use]
    pub fn find(&self, packet_id: u16) -> Option<usize> {
        if packet_id == 0 {
            return None;
        }
        self.slots
            .iter()
            .position(|s| matches!(s, Some(slot) if slot.packet_id == packet_id))
    }

    /// Clear the slot at `index` and return its command.
    ///
    /// # Panics
    /// Panics if `index` does not hold an occupied slot; callers are
    /// expected to have just obtained `index` from [`PendingAckTable::find`].
    pub fn take(&mut self, index: usize) -> Command {
        self.slots[index]
            .take()
            .expect("take() called on an empty slot")
            .command
    }

    /// Look up `packet_id` and, on a hit, remove and return its command. On
    /// a miss, logs a warning and returns `None` — a missing slot for a real
    /// ack type must never crash the agent.
    pub fn take_by_packet_id(&mut self, packet_id: u16) -> Option<Command> {
        match self.find(packet_id) {
            Some(index) => Some(self.take(index)),
            None => {
                warn!("received an ack for unknown packet id {packet_id}; ignoring");
                None
            }
        }
    }

    /// Iterate all occupied slots, invoking each command's completion with
    /// `status` and clearing the slot.
    pub fn drain(&mut self, status: AgentStatus) {
        for slot in &mut self.slots {
            if let Some(Slot { command, .. }) = slot.take() {
                command.complete(CompletionOutcome::status(status.clone()));
            }
        }
    }

    /// Number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    /// Whether the table has no occupied slots.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Capacity of the table.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

impl Default for PendingAckTable {
    fn default() -> Self {
        PendingAckTable::new(DEFAULT_MAX_OUTSTANDING_ACKS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CommandArgs, CommandKind};

    fn bare_command() -> Command {
        Command::new(CommandKind::Publish, CommandArgs::None, None)
    }

    #[test]
    fn insert_and_find_round_trip() {
        let mut table = PendingAckTable::new(4);
        assert!(table.insert(5, bare_command()).is_ok());
        assert_eq!(table.find(5), Some(0));
        assert_eq!(table.find(6), None);
    }

    #[test]
    fn packet_id_zero_always_misses() {
        let table = PendingAckTable::new(4);
        assert_eq!(table.find(0), None);
    }

    #[test]
    fn insert_fails_when_full() {
        let mut table = PendingAckTable::new(2);
        assert!(table.insert(1, bare_command()).is_ok());
        assert!(table.insert(2, bare_command()).is_ok());
        assert!(table.insert(3, bare_command()).is_err());
    }

    #[test]
    fn first_empty_slot_wins_after_a_take() {
        let mut table = PendingAckTable::new(2);
        table.insert(1, bare_command()).unwrap();
        table.insert(2, bare_command()).unwrap();
        let idx = table.find(1).unwrap();
        table.take(idx);
        assert!(table.insert(3, bare_command()).is_ok());
        assert_eq!(table.find(3), Some(idx));
    }

    #[test]
    fn no_two_slots_share_a_packet_id() {
        let mut table = PendingAckTable::new(4);
        table.insert(7, bare_command()).unwrap();
        // A second insert under the same id would violate the invariant;
        // the table itself does not forbid it (callers never do it), but
        // find() must not accidentally match the wrong slot.
        assert_eq!(table.find(7), Some(0));
    }

    #[test]
    fn take_by_packet_id_misses_gracefully() {
        let mut table = PendingAckTable::new(4);
        assert!(table.take_by_packet_id(42).is_none());
    }

    #[test]
    fn drain_completes_every_occupied_slot() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        let mut table = PendingAckTable::new(4);
        let fired = Arc::new(AtomicUsize::new(0));
        for id in 1..=3u16 {
            let fired = fired.clone();
            table.insert(
                id,
                Command::new(
                    CommandKind::Publish,
                    CommandArgs::None,
                    Some(Box::new(move |_| {
                        fired.fetch_add(1, Ordering::SeqCst);
                    })),
                ),
            );
        }
        table.drain(AgentStatus::BadResponse);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
        assert!(table.is_empty());
    }
}
