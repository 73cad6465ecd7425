// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A concrete [`MessagingInterface`] backed by a bounded `tokio` channel and
//! a semaphore-gated command pool — the "bounded ring buffer with
//! semaphores" option named as an application choice.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Semaphore};

use crate::command::Command;
use crate::interface::{CommandPermit, MessagingInterface, RecvOutcome};

/// A [`MessagingInterface`] implementation over a bounded `tokio::sync::mpsc`
/// channel, with a `tokio::sync::Semaphore` standing in for the command pool.
/// The channel's own capacity is the pool's capacity, so a command can only
/// be acquired once a prior one has been released.
pub struct TokioChannelMessaging {
    sender: mpsc::Sender<Command>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Command>>,
    pool: Arc<Semaphore>,
}

impl TokioChannelMessaging {
    /// Build a new instance with the given channel/pool capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(capacity);
        TokioChannelMessaging {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
            pool: Arc::new(Semaphore::new(capacity)),
        }
    }

    /// Number of command-pool permits currently free. For tests and metrics;
    /// not part of [`MessagingInterface`].
    #[must_use]
    pub fn command_pool_available(&self) -> usize {
        self.pool.available_permits()
    }
}

#[async_trait]
impl MessagingInterface for TokioChannelMessaging {
    async fn send(&self, command: Command, block: Duration) -> bool {
        let outcome = if block.is_zero() {
            self.sender.try_send(command).map_err(|_| ())
        } else {
            match tokio::time::timeout(block, self.sender.send(command)).await {
                Ok(Ok(())) => Ok(()),
                _ => Err(()),
            }
        };
        outcome.is_ok()
    }

    async fn recv(&self, block: Duration) -> RecvOutcome {
        // Only the agent task is ever expected to hold this lock long
        // enough to matter; the mutex exists because `mpsc::Receiver::recv`
        // needs `&mut self` and `MessagingInterface::recv` takes `&self`.
        let mut receiver = self.receiver.lock().await;
        match tokio::time::timeout(block, receiver.recv()).await {
            Ok(Some(command)) => RecvOutcome::Command(command),
            // The channel was closed without a command: a legitimate
            // wake-up, not a timeout.
            Ok(None) => RecvOutcome::WakeUp,
            Err(_) => RecvOutcome::TimedOut,
        }
    }

    async fn acquire_command(&self, block: Duration) -> Option<CommandPermit> {
        let permit = if block.is_zero() {
            self.pool.clone().try_acquire_owned().ok()
        } else {
            tokio::time::timeout(block, self.pool.clone().acquire_owned())
                .await
                .ok()
                .and_then(Result::ok)
        };
        permit.map(CommandPermit::new)
    }
}
