// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bespoke mocks for the traits defined in [`crate::interface`], used by this
//! crate's own test suite and exported so downstream crates can drive an
//! [`Agent`](crate::agent::Agent) without a real broker.
#![allow(unused_variables)]

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc::{error::SendError, unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::command::{ConnectArgs, PublishArgs, SubscribeArgs, UnsubscribeArgs};
use crate::error::AgentStatus;
use crate::interface::{InboundPacket, MqttClient};

/// State shared between a [`MockClient`] and its [`EventInjector`], so a test
/// can keep steering the client (failures, the resend list, whether the next
/// connect reports a resumed session) after the client itself has been moved
/// into an [`Agent`](crate::agent::Agent).
struct Shared {
    connected: AtomicBool,
    next_packet_id: AtomicU16,
    fail_next: AtomicBool,
    to_resend: std::sync::Mutex<Vec<u16>>,
    session_present: AtomicBool,
    republished: std::sync::Mutex<Vec<u16>>,
}

impl Shared {
    fn take_failure(&self) -> Option<AgentStatus> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            Some(AgentStatus::Protocol(crate::error::ProtocolStatus(
                "injected test failure".to_string(),
            )))
        } else {
            None
        }
    }

    fn next_packet_id(&self) -> u16 {
        let id = self.next_packet_id.fetch_add(1, Ordering::SeqCst);
        if id == 0 {
            self.next_packet_id.fetch_add(1, Ordering::SeqCst)
        } else {
            id
        }
    }
}

/// A fake [`MqttClient`] whose calls always succeed unless told otherwise,
/// and whose inbound packets are injected on demand through an
/// [`EventInjector`] rather than arriving from a real broker.
pub struct MockClient {
    shared: Arc<Shared>,
    events: UnboundedReceiver<InboundPacket>,
}

impl MockClient {
    /// Build a new mock client along with its [`EventInjector`].
    #[must_use]
    pub fn new() -> (Self, EventInjector) {
        let (tx, rx) = unbounded_channel();
        let shared = Arc::new(Shared {
            connected: AtomicBool::new(false),
            next_packet_id: AtomicU16::new(1),
            fail_next: AtomicBool::new(false),
            to_resend: std::sync::Mutex::new(Vec::new()),
            session_present: AtomicBool::new(false),
            republished: std::sync::Mutex::new(Vec::new()),
        });
        (
            MockClient {
                shared: shared.clone(),
                events: rx,
            },
            EventInjector { tx, shared },
        )
    }

    /// Make the next call into this client fail with [`AgentStatus::Protocol`].
    pub fn fail_next_call(&self) {
        self.shared.fail_next.store(true, Ordering::SeqCst);
    }

    /// Seed the list [`MqttClient::publish_to_resend`] will return.
    pub fn set_resend_list(&self, packet_ids: Vec<u16>) {
        *self.shared.to_resend.lock().unwrap() = packet_ids;
    }
}

#[async_trait]
impl MqttClient for MockClient {
    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    async fn connect(&mut self, _args: &ConnectArgs) -> Result<bool, AgentStatus> {
        if let Some(status) = self.shared.take_failure() {
            return Err(status);
        }
        self.shared.connected.store(true, Ordering::SeqCst);
        Ok(self.shared.session_present.load(Ordering::SeqCst))
    }

    async fn publish(&mut self, args: &PublishArgs) -> Result<u16, AgentStatus> {
        if let Some(status) = self.shared.take_failure() {
            return Err(status);
        }
        if args.qos == crate::control_packet::QoS::AtMostOnce {
            Ok(0)
        } else {
            Ok(self.shared.next_packet_id())
        }
    }

    async fn republish(&mut self, packet_id: u16) -> Result<(), AgentStatus> {
        if let Some(status) = self.shared.take_failure() {
            return Err(status);
        }
        self.shared.republished.lock().unwrap().push(packet_id);
        Ok(())
    }

    async fn subscribe(&mut self, _args: &SubscribeArgs) -> Result<u16, AgentStatus> {
        if let Some(status) = self.shared.take_failure() {
            return Err(status);
        }
        Ok(self.shared.next_packet_id())
    }

    async fn unsubscribe(&mut self, _args: &UnsubscribeArgs) -> Result<u16, AgentStatus> {
        if let Some(status) = self.shared.take_failure() {
            return Err(status);
        }
        Ok(self.shared.next_packet_id())
    }

    async fn disconnect(&mut self) -> Result<(), AgentStatus> {
        self.shared.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), AgentStatus> {
        Ok(())
    }

    async fn process_loop(&mut self) -> Result<Option<InboundPacket>, AgentStatus> {
        if let Some(status) = self.shared.take_failure() {
            return Err(status);
        }
        match self.events.try_recv() {
            Ok(packet) => Ok(Some(packet)),
            Err(_) => Ok(None),
        }
    }

    fn publish_to_resend(&mut self) -> Vec<u16> {
        self.shared.to_resend.lock().unwrap().drain(..).collect()
    }
}

/// Injects [`InboundPacket`]s into a [`MockClient`]'s `process_loop`, as if
/// they had arrived from a real broker, and steers the control knobs
/// ([`Self::fail_next_call`], [`Self::set_resend_list`],
/// [`Self::set_session_present`]) that stay reachable after the client has
/// been moved into an [`Agent`](crate::agent::Agent).
#[derive(Clone)]
pub struct EventInjector {
    tx: UnboundedSender<InboundPacket>,
    shared: Arc<Shared>,
}

impl EventInjector {
    /// Inject one inbound packet.
    ///
    /// # Errors
    /// Returns the packet back if the client has been dropped.
    pub fn inject(&self, packet: InboundPacket) -> Result<(), SendError<InboundPacket>> {
        self.tx.send(packet)
    }

    /// Make the paired client's next call fail with [`AgentStatus::Protocol`].
    pub fn fail_next_call(&self) {
        self.shared.fail_next.store(true, Ordering::SeqCst);
    }

    /// Seed the list the paired client's `publish_to_resend` will return on
    /// its next call.
    pub fn set_resend_list(&self, packet_ids: Vec<u16>) {
        *self.shared.to_resend.lock().unwrap() = packet_ids;
    }

    /// Control whether the paired client's next `connect` reports a resumed
    /// session.
    pub fn set_session_present(&self, present: bool) {
        self.shared.session_present.store(present, Ordering::SeqCst);
    }

    /// The packet ids `republish` has been called with so far, in call order.
    #[must_use]
    pub fn republished_order(&self) -> Vec<u16> {
        self.shared.republished.lock().unwrap().clone()
    }
}

/// Convenience wrapper pairing a [`MockClient`] with a cloneable handle to
/// its injector, for tests that need to hold both past a move into an agent.
pub struct InjectableMockClient {
    /// The injector half; clone freely.
    pub injector: EventInjector,
    client: Arc<std::sync::Mutex<Option<MockClient>>>,
}

impl InjectableMockClient {
    /// Build a new injectable mock client.
    #[must_use]
    pub fn new() -> Self {
        let (client, injector) = MockClient::new();
        InjectableMockClient {
            injector,
            client: Arc::new(std::sync::Mutex::new(Some(client))),
        }
    }

    /// Take the underlying client, e.g. to hand off to an [`Agent`](crate::agent::Agent).
    ///
    /// # Panics
    /// Panics if called more than once.
    #[must_use]
    pub fn take(&self) -> MockClient {
        self.client
            .lock()
            .unwrap()
            .take()
            .expect("InjectableMockClient::take called more than once")
    }
}

impl Default for InjectableMockClient {
    fn default() -> Self {
        Self::new()
    }
}
