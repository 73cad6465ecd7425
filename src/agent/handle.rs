// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! [`AgentHandle`]: the cloneable producer-facing API surface. Every public
//! method follows validate → acquire → populate → enqueue → on-failure-release,
//! so a validation failure never touches the command pool and a pool or
//! queue failure never leaves a permit stranded.

use std::sync::Arc;
use std::time::Duration;

use crate::command::{
    Command, CommandArgs, CommandKind, ConnectArgs, PublishArgs, SubscribeArgs, UnsubscribeArgs,
};
use crate::control_packet::QoS;
use crate::error::{
    AgentStatus, ConnectError, DisconnectError, PingError, PublishError, SubscribeError,
    UnsubscribeError,
};
use crate::interface::{CompletionWaiter, MessagingInterface};

use super::state::AgentState;

/// Worst-case PUBLISH fixed header: 1 control byte plus up to 4 remaining-
/// length bytes.
const PUBLISH_FIXED_HEADER_MAX_LEN: usize = 5;

/// The topic name in a PUBLISH variable header is itself length-prefixed.
const TOPIC_LENGTH_PREFIX_LEN: usize = 2;

/// Whether a PUBLISH's fixed header and topic name fit inside
/// `buffer_size` with at least one byte left over for payload framing.
fn fits_in_network_buffer(topic: &str, buffer_size: usize) -> bool {
    let required = PUBLISH_FIXED_HEADER_MAX_LEN + TOPIC_LENGTH_PREFIX_LEN + topic.len();
    required < buffer_size
}

/// A cloneable handle to an agent's producer-facing API. Any number of tasks
/// may hold clones and call these methods concurrently; none of them ever
/// touch the agent's private state directly — only the shared messaging
/// interface and the read-only [`AgentState`] snapshot.
#[derive(Clone)]
pub struct AgentHandle {
    messaging: Arc<dyn MessagingInterface>,
    state: Arc<AgentState>,
}

impl AgentHandle {
    /// Build a handle over the given messaging interface. Normally obtained
    /// from the same `Arc`s passed to [`super::Agent::new`], not constructed
    /// independently.
    #[must_use]
    pub fn new(messaging: Arc<dyn MessagingInterface>, state: Arc<AgentState>) -> Self {
        AgentHandle { messaging, state }
    }

    /// `MQTT_Init` has been called: `next_packet_id != 0`. Every producer
    /// method checks this first, before any other validation.
    fn check_initialized(&self) -> Result<(), AgentStatus> {
        if self.state.is_initialized() {
            Ok(())
        } else {
            Err(AgentStatus::BadParameter)
        }
    }

    /// Publish a message.
    ///
    /// # Errors
    /// Returns [`PublishError`] if the MQTT client has not been initialized,
    /// `args.topic` is empty, the fixed header and topic name don't fit
    /// inside the configured network buffer, the pending-ack table appears
    /// full for a QoS above 0, the command pool is exhausted, or the command
    /// could not be enqueued within `block`.
    pub async fn publish(
        &self,
        args: PublishArgs,
        block: Duration,
    ) -> Result<CompletionWaiter, PublishError> {
        self.check_initialized()?;
        if args.topic.is_empty() {
            return Err(AgentStatus::BadParameter.into());
        }
        if !fits_in_network_buffer(&args.topic, self.state.network_buffer_size()) {
            return Err(AgentStatus::BadParameter.into());
        }
        if args.qos != QoS::AtMostOnce
            && self.state.pending_ack_count() >= self.state.pending_ack_capacity()
        {
            return Err(AgentStatus::BadParameter.into());
        }
        self.enqueue(CommandKind::Publish, CommandArgs::Publish(args), block)
            .await
            .map_err(Into::into)
    }

    /// Subscribe to one or more topic filters.
    ///
    /// # Errors
    /// Returns [`SubscribeError`] if the MQTT client has not been
    /// initialized, `args.filters` is empty, the command pool is exhausted,
    /// or the command could not be enqueued within `block`.
    pub async fn subscribe(
        &self,
        args: SubscribeArgs,
        block: Duration,
    ) -> Result<CompletionWaiter, SubscribeError> {
        self.check_initialized()?;
        if args.filters.is_empty() {
            return Err(AgentStatus::BadParameter.into());
        }
        self.enqueue(CommandKind::Subscribe, CommandArgs::Subscribe(args), block)
            .await
            .map_err(Into::into)
    }

    /// Unsubscribe from one or more topic filters.
    ///
    /// # Errors
    /// Returns [`UnsubscribeError`] if the MQTT client has not been
    /// initialized, `args.filters` is empty, the command pool is exhausted,
    /// or the command could not be enqueued within `block`.
    pub async fn unsubscribe(
        &self,
        args: UnsubscribeArgs,
        block: Duration,
    ) -> Result<CompletionWaiter, UnsubscribeError> {
        self.check_initialized()?;
        if args.filters.is_empty() {
            return Err(AgentStatus::BadParameter.into());
        }
        self.enqueue(
            CommandKind::Unsubscribe,
            CommandArgs::Unsubscribe(args),
            block,
        )
        .await
        .map_err(Into::into)
    }

    /// Connect to the broker.
    ///
    /// # Errors
    /// Returns [`ConnectError`] if the MQTT client has not been initialized,
    /// the command pool is exhausted, or the command could not be enqueued
    /// within `block`.
    pub async fn connect(
        &self,
        args: ConnectArgs,
        block: Duration,
    ) -> Result<CompletionWaiter, ConnectError> {
        self.check_initialized()?;
        self.enqueue(CommandKind::Connect, CommandArgs::Connect(args), block)
            .await
            .map_err(Into::into)
    }

    /// Disconnect from the broker.
    ///
    /// # Errors
    /// Returns [`DisconnectError`] if the MQTT client has not been
    /// initialized, the command pool is exhausted, or the command could not
    /// be enqueued within `block`.
    pub async fn disconnect(&self, block: Duration) -> Result<CompletionWaiter, DisconnectError> {
        self.check_initialized()?;
        self.enqueue(CommandKind::Disconnect, CommandArgs::None, block)
            .await
            .map_err(Into::into)
    }

    /// Send a PINGREQ. A no-op against the bundled adapter; kept for parity
    /// with the rest of the dispatch table.
    ///
    /// # Errors
    /// Returns [`PingError`] if the MQTT client has not been initialized,
    /// the command pool is exhausted, or the command could not be enqueued
    /// within `block`.
    pub async fn ping(&self, block: Duration) -> Result<CompletionWaiter, PingError> {
        self.check_initialized()?;
        self.enqueue(CommandKind::Ping, CommandArgs::None, block)
            .await
            .map_err(Into::into)
    }

    /// Drain the command queue and the pending-ack table, then end the agent
    /// loop. Every other command outstanding at that point — queued siblings
    /// and anything still awaiting a broker ack — completes with
    /// `AgentStatus::BadResponse`; Terminate's own completion reports
    /// whatever status the drain itself returned (`Success` absent an
    /// internal error).
    ///
    /// # Errors
    /// Returns [`AgentStatus`] if the MQTT client has not been initialized,
    /// the command pool is exhausted, or the command could not be enqueued
    /// within `block`.
    pub async fn terminate(&self, block: Duration) -> Result<CompletionWaiter, AgentStatus> {
        self.check_initialized()?;
        self.enqueue(CommandKind::Terminate, CommandArgs::None, block)
            .await
    }

    async fn enqueue(
        &self,
        kind: CommandKind,
        args: CommandArgs,
        block: Duration,
    ) -> Result<CompletionWaiter, AgentStatus> {
        let permit = self
            .messaging
            .acquire_command(block)
            .await
            .ok_or(AgentStatus::NoMemory)?;
        let (completion, waiter) = CompletionWaiter::pair();
        let command = Command::new(kind, args, Some(completion)).with_permit(permit);
        if self.messaging.send(command, block).await {
            Ok(waiter)
        } else {
            Err(AgentStatus::SendFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::SubscribeFilter;
    use crate::messaging::TokioChannelMessaging;
    use bytes::Bytes;
    use std::sync::Arc as StdArc;

    fn handle_with(
        capacity: usize,
        network_buffer_size: usize,
        pending_ack_capacity: usize,
    ) -> (AgentHandle, StdArc<TokioChannelMessaging>, Arc<AgentState>) {
        let messaging = StdArc::new(TokioChannelMessaging::new(capacity));
        let state = AgentState::new(network_buffer_size, pending_ack_capacity);
        state.mark_initialized();
        (
            AgentHandle::new(messaging.clone(), state.clone()),
            messaging,
            state,
        )
    }

    fn handle_with_capacity(capacity: usize) -> (AgentHandle, StdArc<TokioChannelMessaging>) {
        let (handle, messaging, _state) = handle_with(
            capacity,
            super::DEFAULT_NETWORK_BUFFER_SIZE,
            super::DEFAULT_MAX_OUTSTANDING_ACKS,
        );
        (handle, messaging)
    }

    #[tokio::test]
    async fn publish_rejects_empty_topic_before_touching_the_pool() {
        let (handle, messaging) = handle_with_capacity(4);
        let args = PublishArgs {
            topic: Arc::from(""),
            qos: QoS::AtMostOnce,
            retain: false,
            payload: Bytes::new(),
            properties: None,
        };
        let err = handle.publish(args, Duration::ZERO).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::PublishErrorKind::Status(AgentStatus::BadParameter)
        ));
        assert_eq!(messaging.command_pool_available(), 4);
    }

    #[tokio::test]
    async fn subscribe_rejects_empty_filter_list() {
        let (handle, _messaging) = handle_with_capacity(4);
        let args = SubscribeArgs {
            filters: vec![],
            properties: None,
        };
        let err = handle.subscribe(args, Duration::ZERO).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::SubscribeErrorKind::Status(AgentStatus::BadParameter)
        ));
    }

    #[tokio::test]
    async fn valid_subscribe_enqueues_and_releases_the_permit_back_on_recv() {
        let (handle, messaging) = handle_with_capacity(1);
        let args = SubscribeArgs {
            filters: vec![SubscribeFilter {
                filter: Arc::from("a/b"),
                qos: QoS::AtLeastOnce,
            }],
            properties: None,
        };
        let waiter = handle.subscribe(args, Duration::ZERO).await.unwrap();
        assert_eq!(messaging.command_pool_available(), 0);
        let outcome = messaging.recv(Duration::ZERO).await;
        match outcome {
            crate::interface::RecvOutcome::Command(cmd) => {
                cmd.complete(crate::interface::CompletionOutcome::status(
                    AgentStatus::Success,
                ));
            }
            _ => panic!("expected a command"),
        }
        let outcome = waiter.await;
        assert_eq!(outcome.status, AgentStatus::Success);
    }

    #[tokio::test]
    async fn pool_exhaustion_surfaces_as_no_memory_without_enqueueing() {
        let (handle, messaging) = handle_with_capacity(1);
        let held = messaging.acquire_command(Duration::ZERO).await.unwrap();
        let err = handle.ping(Duration::ZERO).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::PingErrorKind::Status(AgentStatus::NoMemory)
        ));
        messaging.release_command(held);
    }

    #[tokio::test]
    async fn publish_before_initialization_is_rejected() {
        let messaging = StdArc::new(TokioChannelMessaging::new(4));
        let state = AgentState::new(super::DEFAULT_NETWORK_BUFFER_SIZE, 4);
        let handle = AgentHandle::new(messaging.clone(), state);
        let args = PublishArgs {
            topic: Arc::from("a/b"),
            qos: QoS::AtMostOnce,
            retain: false,
            payload: Bytes::new(),
            properties: None,
        };
        let err = handle.publish(args, Duration::ZERO).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::PublishErrorKind::Status(AgentStatus::BadParameter)
        ));
        assert_eq!(messaging.command_pool_available(), 4);
    }

    #[tokio::test]
    async fn publish_rejects_topic_too_large_for_the_network_buffer() {
        let (handle, messaging, _state) = handle_with(4, 16, 4);
        let args = PublishArgs {
            topic: Arc::from("a-topic-longer-than-the-buffer"),
            qos: QoS::AtMostOnce,
            retain: false,
            payload: Bytes::new(),
            properties: None,
        };
        let err = handle.publish(args, Duration::ZERO).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::PublishErrorKind::Status(AgentStatus::BadParameter)
        ));
        assert_eq!(messaging.command_pool_available(), 4);
    }

    #[tokio::test]
    async fn qos1_publish_rejected_when_pending_ack_table_reports_full() {
        let (handle, messaging, state) = handle_with(4, super::DEFAULT_NETWORK_BUFFER_SIZE, 2);
        state.set_pending_ack_count(2);
        let args = PublishArgs {
            topic: Arc::from("a/b"),
            qos: QoS::AtLeastOnce,
            retain: false,
            payload: Bytes::new(),
            properties: None,
        };
        let err = handle.publish(args, Duration::ZERO).await.unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::PublishErrorKind::Status(AgentStatus::BadParameter)
        ));
        assert_eq!(messaging.command_pool_available(), 4);
    }

    #[tokio::test]
    async fn qos0_publish_ignores_pending_ack_occupancy() {
        let (handle, _messaging, state) = handle_with(4, super::DEFAULT_NETWORK_BUFFER_SIZE, 2);
        state.set_pending_ack_count(2);
        let args = PublishArgs {
            topic: Arc::from("a/b"),
            qos: QoS::AtMostOnce,
            retain: false,
            payload: Bytes::new(),
            properties: None,
        };
        assert!(handle.publish(args, Duration::ZERO).await.is_ok());
    }
}
