// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Tuning knobs for an [`Agent`](crate::agent::Agent), built with a
//! validated owned builder in the style of [`crate::connection_settings`].

use std::time::Duration;

use derive_builder::Builder;

use crate::agent::pending_ack::DEFAULT_MAX_OUTSTANDING_ACKS;

/// Agent `recv` timeout (`MAX_EVENT_QUEUE_WAIT_MS`), in milliseconds.
pub const DEFAULT_MAX_EVENT_QUEUE_WAIT_MS: u64 = 1000;

/// Default command queue/pool capacity used by [`TokioChannelMessaging`](crate::messaging::TokioChannelMessaging).
pub const DEFAULT_COMMAND_POOL_CAPACITY: usize = 64;

/// Default size of the network buffer a PUBLISH's fixed header and topic
/// name must fit inside, used by the producer-side pre-check in
/// [`super::AgentHandle::publish`].
pub const DEFAULT_NETWORK_BUFFER_SIZE: usize = 4096;

/// Options controlling an [`Agent`](crate::agent::Agent)'s resource limits
/// and timeouts.
#[derive(Clone, Debug, Builder)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct AgentOptions {
    /// Size of the pending-ack table (`MAX_OUTSTANDING_ACKS`).
    #[builder(default = "DEFAULT_MAX_OUTSTANDING_ACKS")]
    pub max_outstanding_acks: usize,

    /// How long the agent's `recv` blocks waiting for a command before
    /// looping back to poll the MQTT client again (`MAX_EVENT_QUEUE_WAIT_MS`).
    #[builder(default = "Duration::from_millis(DEFAULT_MAX_EVENT_QUEUE_WAIT_MS)")]
    pub max_event_queue_wait: Duration,

    /// Capacity of the bundled command queue/pool.
    #[builder(default = "DEFAULT_COMMAND_POOL_CAPACITY")]
    pub command_pool_capacity: usize,

    /// Size of the network buffer a PUBLISH's fixed header and topic name
    /// must fit inside, checked synchronously by `AgentHandle::publish`
    /// before a command is ever queued.
    #[builder(default = "DEFAULT_NETWORK_BUFFER_SIZE")]
    pub network_buffer_size: usize,
}

impl AgentOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        if let Some(max_outstanding_acks) = self.max_outstanding_acks {
            if max_outstanding_acks == 0 {
                return Err("max_outstanding_acks must be greater than zero".to_string());
            }
        }
        if let Some(command_pool_capacity) = self.command_pool_capacity {
            if command_pool_capacity == 0 {
                return Err("command_pool_capacity must be greater than zero".to_string());
            }
        }
        if let Some(network_buffer_size) = self.network_buffer_size {
            if network_buffer_size == 0 {
                return Err("network_buffer_size must be greater than zero".to_string());
            }
        }
        Ok(())
    }
}

impl Default for AgentOptions {
    fn default() -> Self {
        AgentOptionsBuilder::default()
            .build()
            .expect("defaults always validate")
    }
}
