// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The single-writer serialization agent: one task owns the MQTT client and
//! the pending-ack table; any number of [`AgentHandle`] clones submit work
//! through a [`crate::interface::MessagingInterface`].

mod core;
mod dispatch;
mod handle;
mod inbound;
mod options;
mod pending_ack;
mod state;

pub use core::{Agent, AgentContext};
pub use handle::AgentHandle;
pub use inbound::IncomingPublishHandler;
pub use options::{
    AgentOptions, AgentOptionsBuilder, AgentOptionsBuilderError, DEFAULT_NETWORK_BUFFER_SIZE,
};
pub use pending_ack::{PendingAckTable, DEFAULT_MAX_OUTSTANDING_ACKS};
pub use state::AgentState;
