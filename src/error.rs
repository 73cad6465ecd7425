// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error and status types surfaced by the agent and its producer API.

use std::fmt;

use thiserror::Error;

/// The status vocabulary shared by every command outcome, whether it is
/// returned synchronously from a producer call or delivered later through a
/// completion callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentStatus {
    /// The operation completed as requested.
    Success,
    /// A producer-supplied argument failed validation before anything was enqueued.
    BadParameter,
    /// The command pool or the pending-ack table had no free slot.
    NoMemory,
    /// The command could not be enqueued onto the agent's messaging interface.
    SendFailed,
    /// Terminate (or another cancellation path) ended the command before a real response arrived.
    BadResponse,
    /// The connection was lost while the command was outstanding.
    RecvFailed,
    /// A status surfaced verbatim from the underlying MQTT protocol library.
    Protocol(ProtocolStatus),
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentStatus::Success => write!(f, "success"),
            AgentStatus::BadParameter => write!(f, "bad parameter"),
            AgentStatus::NoMemory => write!(f, "no memory"),
            AgentStatus::SendFailed => write!(f, "send failed"),
            AgentStatus::BadResponse => write!(f, "bad response"),
            AgentStatus::RecvFailed => write!(f, "recv failed"),
            AgentStatus::Protocol(p) => write!(f, "protocol error: {p}"),
        }
    }
}

impl AgentStatus {
    /// True if this status represents a fatal protocol outcome that should end the agent loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, AgentStatus::Success)
    }
}

/// A status passed through verbatim from the underlying MQTT protocol library
/// (`rumqttc`), without reinterpretation by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolStatus(pub String);

impl fmt::Display for ProtocolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ProtocolStatus {
    /// Wrap a concrete error value from the protocol library by its `Display` rendering.
    pub fn from_display(err: &impl fmt::Display) -> Self {
        ProtocolStatus(err.to_string())
    }
}

macro_rules! op_error {
    ($err:ident, $kind:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Error)]
        #[error(transparent)]
        pub struct $err(#[from] pub $kind);

        impl $err {
            /// The kind of error that occurred.
            #[must_use]
            pub fn kind(&self) -> &$kind {
                &self.0
            }
        }

        #[doc = concat!("Error kind for [`", stringify!($err), "`].")]
        #[derive(Debug, Error)]
        pub enum $kind {
            /// The underlying command did not complete successfully.
            #[error("{0}")]
            Status(AgentStatus),
        }

        impl From<AgentStatus> for $err {
            fn from(status: AgentStatus) -> Self {
                $err($kind::Status(status))
            }
        }
    };
}

op_error!(
    PublishError,
    PublishErrorKind,
    "Error type for a failed publish."
);
op_error!(
    SubscribeError,
    SubscribeErrorKind,
    "Error type for a failed subscribe."
);
op_error!(
    UnsubscribeError,
    UnsubscribeErrorKind,
    "Error type for a failed unsubscribe."
);
op_error!(
    ConnectError,
    ConnectErrorKind,
    "Error type for a failed connect."
);
op_error!(
    DisconnectError,
    DisconnectErrorKind,
    "Error type for a failed disconnect."
);
op_error!(PingError, PingErrorKind, "Error type for a failed ping.");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_error_carries_status() {
        let err: PublishError = AgentStatus::NoMemory.into();
        match err.kind() {
            PublishErrorKind::Status(AgentStatus::NoMemory) => {}
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn status_display_is_stable() {
        assert_eq!(AgentStatus::BadParameter.to_string(), "bad parameter");
        assert_eq!(AgentStatus::Success.to_string(), "success");
    }

    #[test]
    fn only_success_is_non_fatal() {
        assert!(!AgentStatus::Success.is_fatal());
        assert!(AgentStatus::BadResponse.is_fatal());
    }
}
