// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The inbound dispatcher: routes every deserialized packet the MQTT
//! library delivers during a process-loop drive to either the application's
//! incoming-publish callback or the pending-ack table.

use log::{debug, trace};

use crate::error::AgentStatus;
use crate::interface::{CompletionOutcome, InboundPacket, InboundPublish};

use super::pending_ack::PendingAckTable;

/// A boxed incoming-publish callback. Invoked synchronously on the agent
/// task for every PUBLISH, regardless of topic — there is no per-topic
/// fan-out in the core.
pub type IncomingPublishHandler = Box<dyn Fn(InboundPublish) + Send + Sync>;

/// Routes one inbound packet to the right consumer.
///
/// Sets `packet_received_in_loop` via its return value rather than a shared
/// flag: the caller (the agent loop) is the only thing that needs to know a
/// packet arrived, so there's no reason to thread a mutable flag through
/// here when the boolean return communicates the same fact directly.
pub fn dispatch(
    pending_acks: &mut PendingAckTable,
    on_incoming_publish: &IncomingPublishHandler,
    packet: InboundPacket,
) -> bool {
    match packet {
        InboundPacket::Publish(publish) => {
            debug!(
                "inbound PUBLISH on {} (packet_id={})",
                publish.topic, publish.packet_id
            );
            on_incoming_publish(publish);
        }
        InboundPacket::PubAck { packet_id } => {
            complete_ack(pending_acks, packet_id, AgentStatus::Success, None);
        }
        InboundPacket::PubComp { packet_id } => {
            complete_ack(pending_acks, packet_id, AgentStatus::Success, None);
        }
        InboundPacket::SubAck {
            packet_id,
            return_codes,
        } => {
            complete_ack(pending_acks, packet_id, AgentStatus::Success, Some(return_codes));
        }
        InboundPacket::UnsubAck { packet_id } => {
            complete_ack(pending_acks, packet_id, AgentStatus::Success, None);
        }
        InboundPacket::PubRec { packet_id } | InboundPacket::PubRel { packet_id } => {
            // Handled internally by the MQTT library; nothing to do here.
            trace!("ignoring PUBREC/PUBREL for packet id {packet_id}");
        }
        InboundPacket::Other => {
            trace!("ignoring unrecognized inbound packet");
        }
    }
    true
}

fn complete_ack(
    pending_acks: &mut PendingAckTable,
    packet_id: u16,
    status: AgentStatus,
    suback: Option<Vec<crate::control_packet::SubscribeReasonCode>>,
) {
    if let Some(command) = pending_acks.take_by_packet_id(packet_id) {
        command.complete(CompletionOutcome { status, suback });
    }
    // A miss is already logged by `take_by_packet_id`; the agent must not crash.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandArgs, CommandKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn noop_publish_handler() -> IncomingPublishHandler {
        Box::new(|_| {})
    }

    #[test]
    fn puback_clears_the_matching_slot_and_completes_success() {
        let mut pending_acks = PendingAckTable::new(4);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired_clone = fired.clone();
        pending_acks.insert(
            5,
            Command::new(
                CommandKind::Publish,
                CommandArgs::None,
                Some(Box::new(move |outcome| {
                    assert_eq!(outcome.status, AgentStatus::Success);
                    fired_clone.fetch_add(1, Ordering::SeqCst);
                })),
            ),
        );
        let handler = noop_publish_handler();
        let woke = dispatch(&mut pending_acks, &handler, InboundPacket::PubAck { packet_id: 5 });
        assert!(woke);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(pending_acks.find(5).is_none());
    }

    #[test]
    fn ack_for_unknown_packet_id_is_discarded_not_a_crash() {
        let mut pending_acks = PendingAckTable::new(4);
        let handler = noop_publish_handler();
        let woke = dispatch(
            &mut pending_acks,
            &handler,
            InboundPacket::PubAck { packet_id: 99 },
        );
        assert!(woke);
    }

    #[test]
    fn publish_invokes_the_incoming_callback_exactly_once() {
        let mut pending_acks = PendingAckTable::new(4);
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();
        let handler: IncomingPublishHandler = Box::new(move |publish| {
            assert_eq!(publish.packet_id, 11);
            seen_clone.fetch_add(1, Ordering::SeqCst);
        });
        dispatch(
            &mut pending_acks,
            &handler,
            InboundPacket::Publish(InboundPublish {
                packet_id: 11,
                topic: "a/b".to_string(),
                payload: bytes::Bytes::from_static(b"x"),
                qos: crate::control_packet::QoS::AtLeastOnce,
                retain: false,
                dup: false,
            }),
        );
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn suback_carries_return_codes_through_to_completion() {
        use crate::control_packet::SubscribeReasonCode;
        let mut pending_acks = PendingAckTable::new(4);
        let got = Arc::new(std::sync::Mutex::new(None));
        let got_clone = got.clone();
        pending_acks.insert(
            3,
            Command::new(
                CommandKind::Subscribe,
                CommandArgs::None,
                Some(Box::new(move |outcome| {
                    *got_clone.lock().unwrap() = outcome.suback;
                })),
            ),
        );
        let handler = noop_publish_handler();
        dispatch(
            &mut pending_acks,
            &handler,
            InboundPacket::SubAck {
                packet_id: 3,
                return_codes: vec![SubscribeReasonCode::QoS1],
            },
        );
        assert_eq!(got.lock().unwrap().as_ref().unwrap().len(), 1);
    }
}
