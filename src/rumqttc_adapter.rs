// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The [`RumqttcAdapter`], the one concrete implementation of
//! [`crate::interface::MqttClient`] this crate ships, wrapping `rumqttc`'s
//! v5 async client and event loop.

use std::fs::{self, File};
use std::io::BufReader;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::tokio_rustls::rustls::{
    client::WebPkiServerVerifier, pki_types::PrivateKeyDer, ClientConfig, RootCertStore,
};
use rumqttc::v5::mqttbytes::v5::Packet;
use rumqttc::Transport;
use thiserror::Error;

use crate::command::{ConnectArgs, PublishArgs, SubscribeArgs, UnsubscribeArgs};
use crate::connection_settings::MqttConnectionSettings;
use crate::error::{AgentStatus, ProtocolStatus};
use crate::interface::{InboundPacket, InboundPublish, MqttClient};

/// The concrete client/event-loop pair this adapter drives.
pub struct RumqttcAdapter {
    client: rumqttc::v5::AsyncClient,
    event_loop: rumqttc::v5::EventLoop,
    connected: bool,
    next_packet_id: u16,
    /// Packet ids this adapter believes are still outstanding against the
    /// broker, along with the arguments needed to republish them. Tracked
    /// independently of the agent's own pending-ack table by design: the two
    /// are allowed to drift, and session resumption must tolerate that.
    outstanding_publishes: Vec<(u16, PublishArgs)>,
}

impl RumqttcAdapter {
    /// Build a new adapter from connection settings, with the given channel
    /// capacity for `rumqttc`'s internal request channel.
    ///
    /// # Errors
    /// Returns [`ConnectionSettingsAdapterError`] if the settings cannot be
    /// translated into `rumqttc` options (e.g. an invalid session expiry or
    /// an unreadable TLS file).
    pub fn new(
        connection_settings: MqttConnectionSettings,
        channel_capacity: usize,
    ) -> Result<Self, ConnectionSettingsAdapterError> {
        let mut mqtt_options: rumqttc::v5::MqttOptions = connection_settings.try_into()?;
        mqtt_options.set_manual_acks(false);
        let (client, event_loop) = rumqttc::v5::AsyncClient::new(mqtt_options, channel_capacity);
        Ok(RumqttcAdapter {
            client,
            event_loop,
            connected: false,
            next_packet_id: 1,
            outstanding_publishes: Vec::new(),
        })
    }

    fn assign_packet_id(&mut self) -> u16 {
        let id = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);
        if self.next_packet_id == 0 {
            self.next_packet_id = 1;
        }
        id
    }

    fn forget_outstanding(&mut self, packet_id: u16) {
        self.outstanding_publishes.retain(|(id, _)| *id != packet_id);
    }
}

#[async_trait]
impl MqttClient for RumqttcAdapter {
    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn connect(&mut self, args: &ConnectArgs) -> Result<bool, AgentStatus> {
        // clean_start is baked into the MqttOptions built at construction
        // time from MqttConnectionSettings; rumqttc exposes no supported way
        // to change it on an already-built EventLoop, so a Connect command
        // requesting a different value than the adapter was built with is
        // not honored.
        let deadline = tokio::time::Instant::now() + args.timeout;
        loop {
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(AgentStatus::RecvFailed);
            }
            let remaining = deadline - now;
            let event = tokio::time::timeout(remaining, self.event_loop.poll())
                .await
                .map_err(|_| AgentStatus::RecvFailed)?
                .map_err(|e| AgentStatus::Protocol(ProtocolStatus::from_display(&e)))?;
            if let rumqttc::v5::Event::Incoming(Packet::ConnAck(ack)) = event {
                self.connected = true;
                return Ok(ack.session_present);
            }
        }
    }

    async fn publish(&mut self, args: &PublishArgs) -> Result<u16, AgentStatus> {
        let packet_id = if args.qos == crate::control_packet::QoS::AtMostOnce {
            0
        } else {
            self.assign_packet_id()
        };
        let result = if let Some(properties) = args.properties.clone() {
            self.client
                .publish_with_properties(
                    args.topic.as_ref(),
                    args.qos,
                    args.retain,
                    args.payload.clone(),
                    properties,
                )
                .await
        } else {
            self.client
                .publish(
                    args.topic.as_ref(),
                    args.qos,
                    args.retain,
                    args.payload.clone(),
                )
                .await
        };
        result.map_err(|e| AgentStatus::Protocol(ProtocolStatus::from_display(&e)))?;
        if packet_id != 0 {
            self.outstanding_publishes.push((packet_id, args.clone()));
        }
        Ok(packet_id)
    }

    async fn republish(&mut self, packet_id: u16) -> Result<(), AgentStatus> {
        let Some((_, args)) = self
            .outstanding_publishes
            .iter()
            .find(|(id, _)| *id == packet_id)
            .cloned()
        else {
            return Err(AgentStatus::BadParameter);
        };
        self.client
            .publish(
                args.topic.as_ref(),
                args.qos,
                args.retain,
                args.payload.clone(),
            )
            .await
            .map_err(|e| AgentStatus::Protocol(ProtocolStatus::from_display(&e)))
    }

    async fn subscribe(&mut self, args: &SubscribeArgs) -> Result<u16, AgentStatus> {
        // `rumqttc`'s client subscribes one filter per call (and assigns one
        // packet id per call); a multi-filter SUBSCRIBE command only
        // subscribes its first filter. Additional filters would need a
        // `subscribe_many`-shaped call this crate does not currently make.
        let first = args.filters.first().ok_or(AgentStatus::BadParameter)?;
        let packet_id = self.assign_packet_id();
        let result = if let Some(properties) = args.properties.clone() {
            self.client
                .subscribe_with_properties(first.filter.as_ref(), first.qos, properties)
                .await
        } else {
            self.client.subscribe(first.filter.as_ref(), first.qos).await
        };
        result.map_err(|e| AgentStatus::Protocol(ProtocolStatus::from_display(&e)))?;
        Ok(packet_id)
    }

    async fn unsubscribe(&mut self, args: &UnsubscribeArgs) -> Result<u16, AgentStatus> {
        let packet_id = self.assign_packet_id();
        let first = args.filters.first().ok_or(AgentStatus::BadParameter)?;
        self.client
            .unsubscribe(first.as_ref())
            .await
            .map_err(|e| AgentStatus::Protocol(ProtocolStatus::from_display(&e)))?;
        Ok(packet_id)
    }

    async fn disconnect(&mut self) -> Result<(), AgentStatus> {
        self.client
            .disconnect()
            .await
            .map_err(|e| AgentStatus::Protocol(ProtocolStatus::from_display(&e)))?;
        self.connected = false;
        Ok(())
    }

    async fn ping(&mut self) -> Result<(), AgentStatus> {
        // rumqttc's event loop sends PINGREQ on its own keep-alive schedule;
        // there is no manual trigger to call.
        Ok(())
    }

    async fn process_loop(&mut self) -> Result<Option<InboundPacket>, AgentStatus> {
        let event = match tokio::time::timeout(Duration::ZERO, self.event_loop.poll()).await {
            Ok(Ok(event)) => event,
            Ok(Err(e)) => {
                self.connected = false;
                return Err(AgentStatus::Protocol(ProtocolStatus::from_display(&e)));
            }
            Err(_) => return Ok(None),
        };
        let rumqttc::v5::Event::Incoming(packet) = event else {
            return Ok(None);
        };
        let mapped = match packet {
            Packet::Publish(publish) => InboundPacket::Publish(InboundPublish {
                packet_id: publish.pkid,
                topic: String::from_utf8_lossy(&publish.topic).to_string(),
                payload: publish.payload,
                qos: publish.qos,
                retain: publish.retain,
                dup: publish.dup,
            }),
            Packet::PubAck(ack) => {
                self.forget_outstanding(ack.pkid);
                InboundPacket::PubAck { packet_id: ack.pkid }
            }
            Packet::PubComp(comp) => {
                self.forget_outstanding(comp.pkid);
                InboundPacket::PubComp { packet_id: comp.pkid }
            }
            Packet::SubAck(ack) => InboundPacket::SubAck {
                packet_id: ack.pkid,
                return_codes: ack.return_codes,
            },
            Packet::UnsubAck(ack) => InboundPacket::UnsubAck { packet_id: ack.pkid },
            Packet::PubRec(rec) => InboundPacket::PubRec { packet_id: rec.pkid },
            Packet::PubRel(rel) => InboundPacket::PubRel { packet_id: rel.pkid },
            Packet::Disconnect(_) => {
                self.connected = false;
                InboundPacket::Other
            }
            _ => InboundPacket::Other,
        };
        Ok(Some(mapped))
    }

    fn publish_to_resend(&mut self) -> Vec<u16> {
        self.outstanding_publishes
            .iter()
            .map(|(id, _)| *id)
            .collect()
    }
}

/// Error translating [`MqttConnectionSettings`] into `rumqttc`'s own options
/// type, or reading one of the files it names.
#[derive(Error, Debug)]
#[error("{msg}: {field}")]
pub struct ConnectionSettingsAdapterError {
    msg: String,
    field: ConnectionSettingsField,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

/// The setting that failed translation, for [`ConnectionSettingsAdapterError`].
#[derive(Debug)]
pub enum ConnectionSettingsField {
    /// The session expiry interval.
    SessionExpiry(std::time::Duration),
    /// The path to the password file.
    PasswordFile(String),
    /// Whether TLS was requested.
    UseTls(bool),
}

impl std::fmt::Display for ConnectionSettingsField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionSettingsField::SessionExpiry(v) => write!(f, "session expiry: {v:?}"),
            ConnectionSettingsField::PasswordFile(v) => write!(f, "password file: {v:?}"),
            ConnectionSettingsField::UseTls(v) => write!(f, "use tls: {v:?}"),
        }
    }
}

/// Error building the TLS client configuration.
#[derive(Error, Debug)]
#[error("{msg}")]
pub struct TlsError {
    msg: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TlsError {
    fn new(msg: impl Into<String>) -> Self {
        TlsError {
            msg: msg.into(),
            source: None,
        }
    }

    fn wrap(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        TlsError {
            msg: err.to_string(),
            source: Some(Box::new(err)),
        }
    }
}

impl TryFrom<MqttConnectionSettings> for rumqttc::v5::MqttOptions {
    type Error = ConnectionSettingsAdapterError;

    fn try_from(value: MqttConnectionSettings) -> Result<Self, Self::Error> {
        let mut mqtt_options = rumqttc::v5::MqttOptions::new(
            value.client_id.clone(),
            value.host_name,
            value.tcp_port,
        );
        mqtt_options.set_keep_alive(value.keep_alive);

        let session_expiry_secs: u32 =
            value.session_expiry.as_secs().try_into().map_err(|e| {
                ConnectionSettingsAdapterError {
                    msg: "cannot convert session expiry to u32".to_string(),
                    field: ConnectionSettingsField::SessionExpiry(value.session_expiry),
                    source: Some(Box::new(e)),
                }
            })?;
        if session_expiry_secs < 5 {
            return Err(ConnectionSettingsAdapterError {
                msg: "must be at least 5 seconds".to_string(),
                field: ConnectionSettingsField::SessionExpiry(value.session_expiry),
                source: None,
            });
        }
        mqtt_options.set_session_expiry_interval(Some(session_expiry_secs));
        mqtt_options.set_connection_timeout(value.connection_timeout.as_secs());
        mqtt_options.set_clean_start(value.clean_start);

        if let Some(username) = value.username {
            let password = if let Some(password_file) = value.password_file {
                fs::read_to_string(&password_file).map_err(|e| ConnectionSettingsAdapterError {
                    msg: "cannot read password file".to_string(),
                    field: ConnectionSettingsField::PasswordFile(password_file),
                    source: Some(Box::new(e)),
                })?
            } else {
                value.password.unwrap_or_default()
            };
            mqtt_options.set_credentials(username, password);
        }

        if value.use_tls {
            let config = tls_config(
                value.ca_file,
                value.ca_require_revocation_check,
                value.cert_file,
                value.key_file,
            )
            .map_err(|e| ConnectionSettingsAdapterError {
                msg: "tls config error".to_string(),
                field: ConnectionSettingsField::UseTls(true),
                source: Some(Box::new(e)),
            })?;
            mqtt_options.set_transport(Transport::tls_with_config(
                rumqttc::TlsConfiguration::Rustls(Arc::new(config)),
            ));
        }

        Ok(mqtt_options)
    }
}

fn tls_config(
    ca_file: Option<String>,
    ca_require_revocation_check: bool,
    cert_file: Option<String>,
    key_file: Option<String>,
) -> Result<ClientConfig, TlsError> {
    let config_builder = if let Some(ca_file) = ca_file {
        let mut root_cert_store = RootCertStore::empty();
        let fh = File::open(ca_file).map_err(TlsError::wrap)?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(fh))
            .collect::<Result<Vec<_>, _>>()
            .map_err(TlsError::wrap)?;
        root_cert_store.add_parsable_certificates(certs);

        if ca_require_revocation_check {
            ClientConfig::builder().with_webpki_verifier(
                WebPkiServerVerifier::builder(root_cert_store.into())
                    .build()
                    .map_err(TlsError::wrap)?,
            )
        } else {
            ClientConfig::builder().with_root_certificates(root_cert_store)
        }
    } else {
        let mut root_cert_store = RootCertStore::empty();
        let native_certs = rustls_native_certs::load_native_certs().map_err(TlsError::wrap)?;
        for cert in native_certs {
            root_cert_store.add(cert).map_err(TlsError::wrap)?;
        }
        ClientConfig::builder().with_root_certificates(root_cert_store)
    };

    let config = if let (Some(cert_file), Some(key_file)) = (cert_file, key_file) {
        let fh = File::open(&cert_file).map_err(TlsError::wrap)?;
        let certs = rustls_pemfile::certs(&mut BufReader::new(fh))
            .collect::<Result<Vec<_>, _>>()
            .map_err(TlsError::wrap)?;
        if certs.is_empty() {
            return Err(TlsError::new("no valid client cert in cert file chain"));
        }
        let fh = File::open(&key_file).map_err(TlsError::wrap)?;
        let key: PrivateKeyDer = match rustls_pemfile::private_key(&mut BufReader::new(fh)) {
            Ok(Some(key)) => key,
            Ok(None) => return Err(TlsError::new("no valid client key in key file")),
            Err(e) => return Err(TlsError::wrap(e)),
        };
        config_builder
            .with_client_auth_cert(certs, key)
            .map_err(TlsError::wrap)?
    } else {
        config_builder.with_no_client_auth()
    };

    Ok(config)
}

#[cfg(test)]
mod tests {
    use crate::rumqttc_adapter::ConnectionSettingsAdapterError;
    use crate::MqttConnectionSettingsBuilder;

    #[test]
    fn settings_without_tls_translate_cleanly() {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .use_tls(false)
            .build()
            .unwrap();
        let mqtt_options: Result<rumqttc::v5::MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(mqtt_options.is_ok());
    }

    #[test]
    fn session_expiry_below_five_seconds_is_rejected() {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .use_tls(false)
            .session_expiry(std::time::Duration::from_secs(1))
            .build()
            .unwrap();
        let mqtt_options: Result<rumqttc::v5::MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(mqtt_options.is_err());
    }

    #[test]
    fn missing_ca_file_surfaces_as_a_config_error() {
        let connection_settings = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .use_tls(true)
            .ca_file("/nonexistent/path/to/ca.pem".to_string())
            .build()
            .unwrap();
        let mqtt_options: Result<rumqttc::v5::MqttOptions, ConnectionSettingsAdapterError> =
            connection_settings.try_into();
        assert!(mqtt_options.is_err());
    }
}
