// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Producer-visible agent state, shared between [`super::Agent`] and every
//! [`super::AgentHandle`] clone the same way `src/interface_mocks.rs`'s
//! `Shared` struct is shared between a `MockClient` and its `EventInjector`:
//! a small set of atomics behind one `Arc`, readable from any task without
//! reaching into [`super::core::AgentContext`].

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// The state `AgentHandle` consults synchronously to perform the
/// producer-side pre-checks the public API is responsible for: whether the
/// underlying MQTT client has been initialized, the configured network
/// buffer size, and a best-effort snapshot of pending-ack occupancy.
///
/// The pending-ack count is necessarily racy: the agent thread is free to
/// insert or clear a slot the instant after a producer reads it. The check
/// built on top of it is an early rejection, not an authoritative one — the
/// agent thread's own insert into `pending_acks` is still the authoritative
/// check, surfaced as `NoMemory` rather than `BadParameter`.
pub struct AgentState {
    initialized: AtomicBool,
    pending_ack_count: AtomicUsize,
    pending_ack_capacity: usize,
    network_buffer_size: usize,
}

impl AgentState {
    /// Build a new, not-yet-initialized state. `network_buffer_size` and
    /// `pending_ack_capacity` normally come from the same [`super::AgentOptions`]
    /// passed to [`super::Agent::new`].
    #[must_use]
    pub fn new(network_buffer_size: usize, pending_ack_capacity: usize) -> Arc<Self> {
        Arc::new(AgentState {
            initialized: AtomicBool::new(false),
            pending_ack_count: AtomicUsize::new(0),
            pending_ack_capacity,
            network_buffer_size,
        })
    }

    /// Mark the underlying MQTT client as initialized. Called once, from
    /// [`super::Agent::new`], which is the point at which the client this
    /// state describes is guaranteed constructed and owned by an agent loop.
    pub(crate) fn mark_initialized(&self) {
        self.initialized.store(true, Ordering::SeqCst);
    }

    /// Whether the underlying MQTT client has been initialized.
    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Record the agent thread's current pending-ack occupancy.
    pub(crate) fn set_pending_ack_count(&self, count: usize) {
        self.pending_ack_count.store(count, Ordering::Relaxed);
    }

    /// The last-observed pending-ack occupancy. Stale the instant it's read.
    pub(crate) fn pending_ack_count(&self) -> usize {
        self.pending_ack_count.load(Ordering::Relaxed)
    }

    /// The fixed capacity of the pending-ack table.
    pub(crate) fn pending_ack_capacity(&self) -> usize {
        self.pending_ack_capacity
    }

    /// The configured network buffer size.
    pub(crate) fn network_buffer_size(&self) -> usize {
        self.network_buffer_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_uninitialized() {
        let state = AgentState::new(4096, 20);
        assert!(!state.is_initialized());
        state.mark_initialized();
        assert!(state.is_initialized());
    }

    #[test]
    fn pending_ack_count_is_a_plain_snapshot() {
        let state = AgentState::new(4096, 20);
        assert_eq!(state.pending_ack_count(), 0);
        state.set_pending_ack_count(5);
        assert_eq!(state.pending_ack_count(), 5);
        assert_eq!(state.pending_ack_capacity(), 20);
    }
}
