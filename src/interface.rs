// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The two seams the agent is built against: [`MqttClient`], the narrow
//! interface to the underlying MQTT protocol library, and
//! [`MessagingInterface`], the abstraction hiding the concrete command
//! queue/pool implementation.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use crate::command::{Command, ConnectArgs, PublishArgs, SubscribeArgs, UnsubscribeArgs};
use crate::control_packet::{QoS, SubscribeReasonCode};
use crate::error::AgentStatus;

/// A deserialized inbound packet, as the MQTT library would hand it to the
/// event callback. This is the input to the inbound dispatcher.
#[derive(Debug, Clone)]
pub enum InboundPacket {
    /// An inbound PUBLISH from the broker.
    Publish(InboundPublish),
    /// A PUBACK acknowledging a QoS-1 publish.
    PubAck {
        /// The acknowledged packet id.
        packet_id: u16,
    },
    /// A PUBCOMP acknowledging a QoS-2 publish's release.
    PubComp {
        /// The acknowledged packet id.
        packet_id: u16,
    },
    /// A SUBACK acknowledging a subscribe.
    SubAck {
        /// The acknowledged packet id.
        packet_id: u16,
        /// The per-filter reason codes the broker assigned.
        return_codes: Vec<SubscribeReasonCode>,
    },
    /// An UNSUBACK acknowledging an unsubscribe.
    UnsubAck {
        /// The acknowledged packet id.
        packet_id: u16,
    },
    /// A PUBREC, handled internally by the protocol library; ignored here.
    PubRec {
        /// The packet id of the in-flight QoS-2 publish.
        packet_id: u16,
    },
    /// A PUBREL, handled internally by the protocol library; ignored here.
    PubRel {
        /// The packet id of the in-flight QoS-2 publish.
        packet_id: u16,
    },
    /// Any other inbound packet type (CONNACK is consumed directly by the
    /// Connect handler rather than flowing through here; PINGRESP and the
    /// like land in this bucket).
    Other,
}

/// An inbound PUBLISH delivered to the application's incoming-publish
/// callback. There is no per-topic fan-out here — every PUBLISH reaches the
/// same callback.
#[derive(Debug, Clone)]
pub struct InboundPublish {
    /// The packet id (0 for QoS 0).
    pub packet_id: u16,
    /// The topic the message was published to.
    pub topic: String,
    /// The message payload.
    pub payload: Bytes,
    /// The quality of service the message was delivered at.
    pub qos: QoS,
    /// Whether the broker marked this as a retained message.
    pub retain: bool,
    /// Whether the broker marked this as a duplicate delivery.
    pub dup: bool,
}

/// The terminal status of a command, delivered to its completion callback.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    /// The final status of the command.
    pub status: AgentStatus,
    /// For a successful Subscribe, the per-filter reason codes from the SUBACK.
    pub suback: Option<Vec<SubscribeReasonCode>>,
}

impl CompletionOutcome {
    /// A bare status with no SUBACK payload.
    #[must_use]
    pub fn status(status: AgentStatus) -> Self {
        CompletionOutcome {
            status,
            suback: None,
        }
    }
}

/// An awaitable handle to a command's terminal outcome, bridging the agent's
/// synchronous completion callback to an async producer caller. The agent
/// loop's completion callback itself stays synchronous and non-blocking, as
/// the protocol requires; this wrapper only exists at the producer-facing
/// boundary.
pub struct CompletionWaiter {
    receiver: oneshot::Receiver<CompletionOutcome>,
}

impl CompletionWaiter {
    fn new(receiver: oneshot::Receiver<CompletionOutcome>) -> Self {
        CompletionWaiter { receiver }
    }

    /// Pair a new waiter with the completion callback the agent will invoke.
    #[must_use]
    pub fn pair() -> (crate::command::Completion, Self) {
        let (tx, rx) = oneshot::channel();
        let completion: crate::command::Completion = Box::new(move |outcome| {
            // The caller may have dropped the waiter; nobody is listening
            // for the outcome anymore, which is fine.
            let _ = tx.send(outcome);
        });
        (completion, CompletionWaiter::new(rx))
    }
}

impl Future for CompletionWaiter {
    type Output = CompletionOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // The agent dropped the completion without firing it (e.g. the
            // agent task itself panicked); report that as a bad response
            // rather than hanging the caller forever.
            Poll::Ready(Err(_)) => {
                Poll::Ready(CompletionOutcome::status(AgentStatus::BadResponse))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The narrow interface to the underlying MQTT protocol library (here,
/// `rumqttc`'s v5 client and event loop). Every MQTT command handler goes
/// through this trait and nothing else.
#[async_trait]
pub trait MqttClient: Send {
    /// True once `connect` has completed successfully and the client has not
    /// since disconnected. Mirrors "`next_packet_id == 0` means uninitialized".
    fn is_connected(&self) -> bool;

    /// Connect to the broker, waiting up to the arguments' timeout for a
    /// CONNACK. Returns whether the broker reported a resumed session.
    async fn connect(&mut self, args: &ConnectArgs) -> Result<bool, AgentStatus>;

    /// Publish a message, returning the assigned packet id (0 for QoS 0).
    async fn publish(&mut self, args: &PublishArgs) -> Result<u16, AgentStatus>;

    /// Re-publish an already-assigned packet id with the DUP flag set, used
    /// during session resumption.
    async fn republish(&mut self, packet_id: u16) -> Result<(), AgentStatus>;

    /// Subscribe to one or more filters, returning the assigned packet id.
    async fn subscribe(&mut self, args: &SubscribeArgs) -> Result<u16, AgentStatus>;

    /// Unsubscribe from one or more filters, returning the assigned packet id.
    async fn unsubscribe(&mut self, args: &UnsubscribeArgs) -> Result<u16, AgentStatus>;

    /// Disconnect from the broker.
    async fn disconnect(&mut self) -> Result<(), AgentStatus>;

    /// Send a PINGREQ. A no-op for protocol libraries (like `rumqttc`) that
    /// manage keepalive internally; kept for dispatch-table symmetry.
    async fn ping(&mut self) -> Result<(), AgentStatus>;

    /// Drive the protocol machine once without blocking, returning the next
    /// inbound packet if one was already buffered.
    async fn process_loop(&mut self) -> Result<Option<InboundPacket>, AgentStatus>;

    /// The list of packet ids the protocol library believes require
    /// retransmission after a resumed session. May legitimately contain ids
    /// the agent's own `pending_acks` no longer has an entry for.
    fn publish_to_resend(&mut self) -> Vec<u16>;
}

/// Whether `recv` returned a real command, a timeout, or a "true with no
/// command" wake-up. The three are distinguishable; a wake-up is not a
/// timeout and must not be mistaken for one.
pub enum RecvOutcome {
    /// A command was dequeued.
    Command(Command),
    /// `recv` was woken early with no command to deliver.
    WakeUp,
    /// `recv` timed out with nothing to deliver.
    TimedOut,
}

/// Proof that a command slot was acquired from the pool. Dropping it without
/// building a `Command` from it releases the slot back to the pool on the
/// early-failure path, the same as an explicit `release_command` call.
pub struct CommandPermit {
    _permit: tokio::sync::OwnedSemaphorePermit,
}

impl CommandPermit {
    pub(crate) fn new(permit: tokio::sync::OwnedSemaphorePermit) -> Self {
        CommandPermit { _permit: permit }
    }
}

/// The abstraction hiding the concrete command queue and command-record pool.
/// `send`, `acquire_command`, and `release_command` must be safe to call from
/// any task concurrently with each other and with the agent; `recv` is
/// documented to be agent-task-only and must never be called from a producer.
#[async_trait]
pub trait MessagingInterface: Send + Sync {
    /// Enqueue a command, blocking up to `block` on a full queue.
    /// Returns `false` (and does not enqueue) on timeout.
    async fn send(&self, command: Command, block: Duration) -> bool;

    /// Dequeue a command. Agent-task-only: never call this from a producer.
    async fn recv(&self, block: Duration) -> RecvOutcome;

    /// Acquire a command-pool permit, blocking up to `block` on exhaustion.
    /// Returns `None` on timeout.
    async fn acquire_command(&self, block: Duration) -> Option<CommandPermit>;

    /// Release a previously acquired permit back to the pool. The default
    /// implementation simply drops the permit, which is sufficient for a
    /// semaphore-backed pool; implementations with external bookkeeping may
    /// override this.
    fn release_command(&self, permit: CommandPermit) {
        drop(permit);
    }
}
