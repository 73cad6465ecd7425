// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The command records the agent dequeues and dispatches, one variant per
//! MQTT operation the agent exposes to producers.

use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

use crate::control_packet::{LastWill, PublishProperties, QoS, SubscribeProperties};
use crate::error::AgentStatus;
use crate::interface::CompletionOutcome;

/// The stable, `repr(u8)` discriminant for a [`Command`], including the zero
/// value used when `recv` times out with no command available.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// No command; used when the agent's `recv` times out.
    None = 0,
    /// Drive the underlying MQTT protocol machine once.
    ProcessLoop,
    /// Publish a message.
    Publish,
    /// Subscribe to one or more topic filters.
    Subscribe,
    /// Unsubscribe from one or more topic filters.
    Unsubscribe,
    /// Send a PINGREQ.
    Ping,
    /// Connect to the broker.
    Connect,
    /// Disconnect from the broker.
    Disconnect,
    /// Drain the queue and the pending-ack table, then end the agent loop.
    Terminate,
}

/// Arguments for a [`CommandKind::Publish`] command.
#[derive(Debug, Clone)]
pub struct PublishArgs {
    /// The topic to publish to.
    pub topic: Arc<str>,
    /// The quality of service to publish at.
    pub qos: QoS,
    /// Whether the broker should retain this message.
    pub retain: bool,
    /// The message payload.
    pub payload: Bytes,
    /// Optional PUBLISH properties.
    pub properties: Option<PublishProperties>,
}

/// A single entry in a [`SubscribeArgs`]/[`UnsubscribeArgs`] filter list.
#[derive(Debug, Clone)]
pub struct SubscribeFilter {
    /// The topic filter.
    pub filter: Arc<str>,
    /// The requested quality of service (ignored for unsubscribe).
    pub qos: QoS,
}

/// Arguments for a [`CommandKind::Subscribe`] command.
#[derive(Debug, Clone)]
pub struct SubscribeArgs {
    /// The filters to subscribe to. Must be non-empty.
    pub filters: Vec<SubscribeFilter>,
    /// Optional SUBSCRIBE properties.
    pub properties: Option<SubscribeProperties>,
}

/// Arguments for a [`CommandKind::Unsubscribe`] command.
#[derive(Debug, Clone)]
pub struct UnsubscribeArgs {
    /// The filters to unsubscribe from. Must be non-empty.
    pub filters: Vec<Arc<str>>,
}

/// Arguments for a [`CommandKind::Connect`] command.
#[derive(Debug, Clone)]
pub struct ConnectArgs {
    /// An optional last-will message to register with the broker.
    pub will: Option<LastWill>,
    /// How long to wait for a CONNACK before failing the connect.
    pub timeout: Duration,
    /// Whether to request a clean session.
    pub clean_start: bool,
}

/// The type-erased argument payload carried by a [`Command`], one variant per
/// [`CommandKind`] that takes arguments.
#[derive(Debug, Clone)]
pub enum CommandArgs {
    /// No arguments.
    None,
    /// [`PublishArgs`].
    Publish(PublishArgs),
    /// [`SubscribeArgs`].
    Subscribe(SubscribeArgs),
    /// [`UnsubscribeArgs`].
    Unsubscribe(UnsubscribeArgs),
    /// [`ConnectArgs`].
    Connect(ConnectArgs),
}

/// A completion callback, invoked synchronously and exactly once by the
/// agent thread when a command reaches a terminal outcome.
pub type Completion = Box<dyn FnOnce(CompletionOutcome) + Send>;

/// A queued unit of work describing one MQTT operation plus its completion.
///
/// Arguments are owned, cheaply-clonable buffers (`Bytes`/`Arc<str>`) rather
/// than borrowed pointers, so a `Command` can cross from a producer task to
/// the agent task without a lifetime tied to the producer's stack frame. See
/// the design notes on type-erased arguments for why this departs from a
/// literal non-owning buffer.
pub struct Command {
    kind: CommandKind,
    args: CommandArgs,
    completion: Option<Completion>,
    permit: Option<crate::interface::CommandPermit>,
}

impl Command {
    /// Build a new command of the given kind, with the given arguments and
    /// an optional completion callback.
    #[must_use]
    pub fn new(kind: CommandKind, args: CommandArgs, completion: Option<Completion>) -> Self {
        Command {
            kind,
            args,
            completion,
            permit: None,
        }
    }

    /// Attach the pool permit acquired for this command, so that dropping
    /// the command — whether right after dispatch, when its ack arrives, or
    /// at Terminate — is what returns the permit to the pool. This is how
    /// `release_command` is realized: as a consequence of the command's
    /// lifetime ending exactly once, rather than a call callers must
    /// remember to make.
    #[must_use]
    pub fn with_permit(mut self, permit: crate::interface::CommandPermit) -> Self {
        self.permit = Some(permit);
        self
    }

    /// The command's variant discriminant.
    #[must_use]
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// Borrow the command's arguments.
    #[must_use]
    pub fn args(&self) -> &CommandArgs {
        &self.args
    }

    /// Invoke the completion callback, if any, with the given outcome.
    ///
    /// This is the only place a completion runs; it always runs on the
    /// agent thread and must not itself block.
    pub fn complete(self, outcome: CompletionOutcome) {
        if let Some(completion) = self.completion {
            completion(outcome);
        }
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Command")
            .field("kind", &self.kind)
            .field("args", &self.args)
            .field("has_completion", &self.completion.is_some())
            .finish()
    }
}

/// The outcome of dispatching a single command, telling the agent loop what
/// to do next. Produced by the dispatch table, consumed only by the agent
/// loop — handlers never touch `pending_acks` or `packet_received_in_loop`
/// directly.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReturnFlags {
    /// The packet id assigned by the handler, if any (0 if none was assigned).
    pub mqtt_packet_id: u16,
    /// Whether the agent loop should insert this command into the pending-ack table.
    pub add_to_pending_acks: bool,
    /// Whether the agent loop should drive the MQTT process loop until quiet.
    pub run_process_loop: bool,
    /// Whether the agent loop should end after this command.
    pub end_loop: bool,
}

impl ReturnFlags {
    /// Flags for a handler that did nothing requiring further loop action.
    #[must_use]
    pub fn none() -> Self {
        ReturnFlags::default()
    }
}
