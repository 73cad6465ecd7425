// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The single-threaded agent loop: receive command, dispatch, optionally
//! track a pending ack, optionally drain the MQTT process loop, loop again.

use std::sync::Arc;

use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::command::{CommandArgs, CommandKind, ReturnFlags};
use crate::error::AgentStatus;
use crate::interface::{CompletionOutcome, InboundPacket, MessagingInterface, MqttClient, RecvOutcome};

use super::dispatch::{self, DispatchContext};
use super::inbound::{self, IncomingPublishHandler};
use super::options::AgentOptions;
use super::pending_ack::PendingAckTable;
use super::state::AgentState;

/// The agent's private state. Owned for the whole lifetime of the task
/// running [`Agent::run`]; nothing outside that task ever references it,
/// which is what makes `pending_acks` and the process-loop drain safe
/// without a lock.
pub struct AgentContext<C: MqttClient> {
    mqtt_client: C,
    pending_acks: PendingAckTable,
    on_incoming_publish: IncomingPublishHandler,
}

/// The single-writer serialization agent. Construct with [`Agent::new`] and
/// consume with [`Agent::run`] inside a dedicated task — `run` takes `self`
/// by value specifically so no second task can ever hold a reference into
/// its [`AgentContext`].
pub struct Agent<C: MqttClient, M: MessagingInterface> {
    ctx: AgentContext<C>,
    messaging: Arc<M>,
    options: AgentOptions,
    cancel: CancellationToken,
    state: Arc<AgentState>,
}

impl<C: MqttClient, M: MessagingInterface> Agent<C, M> {
    /// Build a new agent over the given MQTT client and messaging interface.
    ///
    /// `state` is normally built with [`AgentState::new`] from the same
    /// `options` and shared with every [`super::AgentHandle`] this agent's
    /// producers use; constructing the agent marks it initialized, the
    /// signal `AgentHandle`'s producer-side pre-checks gate on.
    #[must_use]
    pub fn new(
        mqtt_client: C,
        messaging: Arc<M>,
        on_incoming_publish: IncomingPublishHandler,
        options: AgentOptions,
        state: Arc<AgentState>,
    ) -> Self {
        state.mark_initialized();
        Agent {
            ctx: AgentContext {
                mqtt_client,
                pending_acks: PendingAckTable::new(options.max_outstanding_acks),
                on_incoming_publish,
            },
            messaging,
            options,
            cancel: CancellationToken::new(),
            state,
        }
    }

    /// A token that, when cancelled, forcibly ends [`Agent::run`] even with
    /// work outstanding — for host-process shutdown, not per-command
    /// cancellation (which this crate does not support; Terminate is the
    /// only in-band cancellation path).
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run the agent loop to completion, returning the terminal status.
    ///
    /// Consumes `self`: once this returns, the `AgentContext` it owned is
    /// gone, and any `CompletionWaiter`s still outstanding resolve to
    /// `BadResponse` rather than hang.
    pub async fn run(mut self) -> AgentStatus {
        info!("agent loop starting");
        loop {
            let recv_outcome = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    info!("agent loop cancelled; terminating outstanding work");
                    self.ctx.pending_acks.drain(AgentStatus::BadResponse);
                    return AgentStatus::Success;
                }
                outcome = self.messaging.recv(self.options.max_event_queue_wait) => outcome,
            };

            let mut command = match recv_outcome {
                RecvOutcome::Command(cmd) => Some(cmd),
                RecvOutcome::WakeUp | RecvOutcome::TimedOut => None,
            };
            let kind = command.as_ref().map_or(CommandKind::None, |c| c.kind());
            let args = command
                .as_ref()
                .map_or(CommandArgs::None, |c| c.args().clone());

            let mut dispatch_ctx = DispatchContext {
                client: &mut self.ctx.mqtt_client,
                pending_acks: &mut self.ctx.pending_acks,
                messaging: self.messaging.as_ref(),
            };
            let (mut status, flags) = dispatch::dispatch(&mut dispatch_ctx, kind, &args).await;

            if status == AgentStatus::Success && flags.add_to_pending_acks {
                if let Some(cmd) = command.take() {
                    if let Err(cmd) = self.ctx.pending_acks.insert(flags.mqtt_packet_id, cmd) {
                        status = AgentStatus::NoMemory;
                        command = Some(cmd);
                    }
                }
            }

            if let Some(cmd) = command {
                debug!("command {kind:?} completed with status {status}");
                cmd.complete(CompletionOutcome::status(status.clone()));
            }

            if status == AgentStatus::Success && flags.run_process_loop {
                if let Err(terminal) = self.drain_process_loop().await {
                    status = terminal;
                }
            }

            self.state
                .set_pending_ack_count(self.ctx.pending_acks.len());

            if flags.end_loop || status != AgentStatus::Success {
                if status != AgentStatus::Success {
                    error!("agent loop ending on status {status}");
                }
                info!("agent loop ending");
                return status;
            }
        }
    }

    /// `MQTT_ProcessLoop(timeout=0)` driven until quiet: each iteration
    /// clears `packet_received_in_loop`, drives the client once, and repeats
    /// only if that drive actually produced a packet — never blocks waiting
    /// for new socket data.
    async fn drain_process_loop(&mut self) -> Result<(), AgentStatus> {
        loop {
            let mut packet_received_in_loop = false;
            if self.ctx.mqtt_client.is_connected() {
                if let Some(packet) = self.ctx.mqtt_client.process_loop().await? {
                    packet_received_in_loop = self.dispatch_inbound(packet);
                }
            }
            if !packet_received_in_loop {
                return Ok(());
            }
        }
    }

    fn dispatch_inbound(&mut self, packet: InboundPacket) -> bool {
        inbound::dispatch(
            &mut self.ctx.pending_acks,
            &self.ctx.on_incoming_publish,
            packet,
        )
    }
}
