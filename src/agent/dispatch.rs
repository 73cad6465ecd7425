// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The command dispatch table: one handler per [`CommandKind`], matched
//! exhaustively rather than indexed through a runtime function-pointer array
//! — the compiler enforces the "one entry per variant" completeness the
//! source's array-indexed table enforced by convention.

use log::{debug, warn};

use crate::command::{CommandArgs, CommandKind, PublishArgs, ReturnFlags};
use crate::control_packet::QoS;
use crate::error::AgentStatus;
use crate::interface::{CompletionOutcome, MessagingInterface, MqttClient, RecvOutcome};

use super::pending_ack::PendingAckTable;

/// The pieces of [`super::core::AgentContext`] a dispatch handler needs.
/// Bundled as a struct (rather than passing `&mut AgentContext` directly) so
/// the borrow checker can see that `client` and `pending_acks` are disjoint
/// borrows even though both are mutated within one dispatch call.
pub struct DispatchContext<'a> {
    /// The underlying MQTT protocol handle.
    pub client: &'a mut dyn MqttClient,
    /// The pending-acknowledgment table. Handlers besides Connect and
    /// Terminate must not mutate this directly; those two are the documented
    /// exceptions (session resumption and drain-on-terminate).
    pub pending_acks: &'a mut PendingAckTable,
    /// The messaging interface, needed only by Terminate to drain the queue.
    pub messaging: &'a dyn MessagingInterface,
}

/// Dispatch one command variant, returning the resulting status and the
/// flags telling the agent loop what to do next.
pub async fn dispatch(
    ctx: &mut DispatchContext<'_>,
    kind: CommandKind,
    args: &CommandArgs,
) -> (AgentStatus, ReturnFlags) {
    match kind {
        CommandKind::None => (AgentStatus::Success, ReturnFlags::none()),
        CommandKind::ProcessLoop => dispatch_process_loop(ctx).await,
        CommandKind::Publish => dispatch_publish(ctx, args).await,
        CommandKind::Subscribe => dispatch_subscribe(ctx, args).await,
        CommandKind::Unsubscribe => dispatch_unsubscribe(ctx, args).await,
        CommandKind::Connect => dispatch_connect(ctx, args).await,
        CommandKind::Disconnect => dispatch_disconnect(ctx).await,
        CommandKind::Ping => dispatch_ping(ctx).await,
        CommandKind::Terminate => handle_terminate(ctx).await,
    }
}

async fn dispatch_process_loop(_ctx: &mut DispatchContext<'_>) -> (AgentStatus, ReturnFlags) {
    debug!("dispatching ProcessLoop");
    (
        AgentStatus::Success,
        ReturnFlags {
            run_process_loop: true,
            ..ReturnFlags::none()
        },
    )
}

async fn dispatch_publish(
    ctx: &mut DispatchContext<'_>,
    args: &CommandArgs,
) -> (AgentStatus, ReturnFlags) {
    let CommandArgs::Publish(publish) = args else {
        return (AgentStatus::BadParameter, ReturnFlags::none());
    };
    debug!("dispatching Publish to {}", publish.topic);
    match ctx.client.publish(publish).await {
        Ok(packet_id) => {
            let qos1_or_2 = publish.qos != QoS::AtMostOnce;
            (
                AgentStatus::Success,
                ReturnFlags {
                    mqtt_packet_id: packet_id,
                    add_to_pending_acks: qos1_or_2,
                    run_process_loop: true,
                    end_loop: false,
                },
            )
        }
        Err(status) => (status, ReturnFlags::none()),
    }
}

async fn dispatch_subscribe(
    ctx: &mut DispatchContext<'_>,
    args: &CommandArgs,
) -> (AgentStatus, ReturnFlags) {
    let CommandArgs::Subscribe(subscribe) = args else {
        return (AgentStatus::BadParameter, ReturnFlags::none());
    };
    debug!("dispatching Subscribe to {} filter(s)", subscribe.filters.len());
    match ctx.client.subscribe(subscribe).await {
        Ok(packet_id) => (
            AgentStatus::Success,
            ReturnFlags {
                mqtt_packet_id: packet_id,
                add_to_pending_acks: true,
                run_process_loop: true,
                end_loop: false,
            },
        ),
        Err(status) => (status, ReturnFlags::none()),
    }
}

async fn dispatch_unsubscribe(
    ctx: &mut DispatchContext<'_>,
    args: &CommandArgs,
) -> (AgentStatus, ReturnFlags) {
    let CommandArgs::Unsubscribe(unsubscribe) = args else {
        return (AgentStatus::BadParameter, ReturnFlags::none());
    };
    debug!(
        "dispatching Unsubscribe from {} filter(s)",
        unsubscribe.filters.len()
    );
    match ctx.client.unsubscribe(unsubscribe).await {
        Ok(packet_id) => (
            AgentStatus::Success,
            ReturnFlags {
                mqtt_packet_id: packet_id,
                add_to_pending_acks: true,
                run_process_loop: true,
                end_loop: false,
            },
        ),
        Err(status) => (status, ReturnFlags::none()),
    }
}

async fn dispatch_connect(
    ctx: &mut DispatchContext<'_>,
    args: &CommandArgs,
) -> (AgentStatus, ReturnFlags) {
    let CommandArgs::Connect(connect) = args else {
        return (AgentStatus::BadParameter, ReturnFlags::none());
    };
    debug!("dispatching Connect");
    match ctx.client.connect(connect).await {
        Ok(session_present) => {
            let status = resume_session(ctx, session_present).await;
            (status, ReturnFlags::none())
        }
        Err(status) => (status, ReturnFlags::none()),
    }
}

/// `ResumeSession`: called from the Connect handler after CONNACK.
///
/// On a resumed session, retransmits every in-flight QoS≥1 publish the
/// protocol library's resend list names, in the order it names them,
/// stopping at the first failure. On a clean session, drains `pending_acks`
/// with `RecvFailed` — the previous session's outstanding work cannot
/// possibly be acknowledged by a broker that has forgotten it existed.
async fn resume_session(ctx: &mut DispatchContext<'_>, session_present: bool) -> AgentStatus {
    if !session_present {
        ctx.pending_acks.drain(AgentStatus::RecvFailed);
        return AgentStatus::Success;
    }

    for packet_id in ctx.client.publish_to_resend() {
        if ctx.pending_acks.find(packet_id).is_none() {
            // The protocol library may track state the agent does not
            // mirror; this is a documented, non-error possibility.
            warn!("publish_to_resend named packet id {packet_id} with no pending-ack entry; skipping");
            continue;
        }
        if let Err(status) = ctx.client.republish(packet_id).await {
            return status;
        }
    }
    AgentStatus::Success
}

async fn dispatch_disconnect(ctx: &mut DispatchContext<'_>) -> (AgentStatus, ReturnFlags) {
    debug!("dispatching Disconnect");
    match ctx.client.disconnect().await {
        Ok(()) => (
            AgentStatus::Success,
            ReturnFlags {
                end_loop: true,
                ..ReturnFlags::none()
            },
        ),
        Err(status) => (status, ReturnFlags::none()),
    }
}

async fn dispatch_ping(ctx: &mut DispatchContext<'_>) -> (AgentStatus, ReturnFlags) {
    debug!("dispatching Ping");
    match ctx.client.ping().await {
        Ok(()) => (
            AgentStatus::Success,
            ReturnFlags {
                run_process_loop: true,
                ..ReturnFlags::none()
            },
        ),
        Err(status) => (status, ReturnFlags::none()),
    }
}

/// Terminate: drain the remaining command queue non-blockingly, completing
/// each with `BadResponse`, then drain `pending_acks` the same way.
async fn handle_terminate(ctx: &mut DispatchContext<'_>) -> (AgentStatus, ReturnFlags) {
    debug!("dispatching Terminate");
    loop {
        match ctx.messaging.recv(std::time::Duration::ZERO).await {
            RecvOutcome::Command(cmd) => {
                cmd.complete(CompletionOutcome::status(AgentStatus::BadResponse));
            }
            RecvOutcome::WakeUp => continue,
            RecvOutcome::TimedOut => break,
        }
    }
    ctx.pending_acks.drain(AgentStatus::BadResponse);
    (
        AgentStatus::Success,
        ReturnFlags {
            end_loop: true,
            ..ReturnFlags::none()
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, ConnectArgs, PublishArgs};
    use crate::interface_mocks::MockClient;
    use crate::messaging::TokioChannelMessaging;
    use bytes::Bytes;
    use std::sync::Arc;
    use std::time::Duration;

    fn publish_args(qos: QoS) -> CommandArgs {
        CommandArgs::Publish(PublishArgs {
            topic: Arc::from("a/b"),
            qos,
            retain: false,
            payload: Bytes::from_static(b"hi"),
            properties: None,
        })
    }

    #[tokio::test]
    async fn qos0_publish_does_not_request_pending_ack() {
        let (mut client, _injector) = MockClient::new();
        let mut pending_acks = PendingAckTable::new(4);
        let messaging = TokioChannelMessaging::new(4);
        let mut ctx = DispatchContext {
            client: &mut client,
            pending_acks: &mut pending_acks,
            messaging: &messaging,
        };
        let (status, flags) =
            dispatch(&mut ctx, CommandKind::Publish, &publish_args(QoS::AtMostOnce)).await;
        assert_eq!(status, AgentStatus::Success);
        assert!(!flags.add_to_pending_acks);
        assert!(flags.run_process_loop);
    }

    #[tokio::test]
    async fn qos1_publish_requests_pending_ack_with_packet_id() {
        let (mut client, _injector) = MockClient::new();
        let mut pending_acks = PendingAckTable::new(4);
        let messaging = TokioChannelMessaging::new(4);
        let mut ctx = DispatchContext {
            client: &mut client,
            pending_acks: &mut pending_acks,
            messaging: &messaging,
        };
        let (status, flags) = dispatch(
            &mut ctx,
            CommandKind::Publish,
            &publish_args(QoS::AtLeastOnce),
        )
        .await;
        assert_eq!(status, AgentStatus::Success);
        assert!(flags.add_to_pending_acks);
        assert_ne!(flags.mqtt_packet_id, 0);
    }

    #[tokio::test]
    async fn connect_with_clean_session_drains_pending_acks() {
        let (mut client, _injector) = MockClient::new();
        let mut pending_acks = PendingAckTable::new(4);
        pending_acks.insert(1, Command::new(CommandKind::Publish, CommandArgs::None, None));
        let messaging = TokioChannelMessaging::new(4);
        let mut ctx = DispatchContext {
            client: &mut client,
            pending_acks: &mut pending_acks,
            messaging: &messaging,
        };
        let args = CommandArgs::Connect(ConnectArgs {
            will: None,
            timeout: Duration::from_secs(5),
            clean_start: true,
        });
        let (status, _flags) = dispatch(&mut ctx, CommandKind::Connect, &args).await;
        assert_eq!(status, AgentStatus::Success);
        assert!(pending_acks.is_empty());
    }

    #[tokio::test]
    async fn terminate_drains_queue_and_pending_acks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let (mut client, _injector) = MockClient::new();
        let mut pending_acks = PendingAckTable::new(4);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        pending_acks.insert(
            9,
            Command::new(
                CommandKind::Subscribe,
                CommandArgs::None,
                Some(Box::new(move |outcome| {
                    assert_eq!(outcome.status, AgentStatus::BadResponse);
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                })),
            ),
        );
        let messaging = TokioChannelMessaging::new(4);
        let fired_clone2 = fired.clone();
        messaging
            .send(
                Command::new(
                    CommandKind::Publish,
                    CommandArgs::None,
                    Some(Box::new(move |outcome| {
                        assert_eq!(outcome.status, AgentStatus::BadResponse);
                        fired_clone2.fetch_add(1, Ordering::SeqCst);
                    })),
                ),
                Duration::ZERO,
            )
            .await;
        let mut ctx = DispatchContext {
            client: &mut client,
            pending_acks: &mut pending_acks,
            messaging: &messaging,
        };
        let (status, flags) = dispatch(&mut ctx, CommandKind::Terminate, &CommandArgs::None).await;
        assert_eq!(status, AgentStatus::Success);
        assert!(flags.end_loop);
        assert!(pending_acks.is_empty());
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }
}
