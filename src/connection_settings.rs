// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Generic MQTT connection settings.

use std::time::Duration;

/// All the settings required to establish an MQTT connection.
#[derive(Builder, Clone)]
#[builder(pattern = "owned", setter(into), build_fn(validate = "Self::validate"))]
pub struct MqttConnectionSettings {
    /// Client identifier
    pub(crate) client_id: String,
    /// FQDN of the host to connect to
    pub(crate) host_name: String,
    /// TCP port to connect to the host on
    #[builder(default = "8883")]
    pub(crate) tcp_port: u16,
    /// Max time between communications
    #[builder(default = "Duration::from_secs(60)")]
    pub(crate) keep_alive: Duration,
    /// Session Expiry Interval. Must be at least 5 seconds; `rumqttc` panics below that.
    #[builder(default = "Duration::from_secs(3600)")]
    pub(crate) session_expiry: Duration,
    /// Connection timeout
    #[builder(default = "Duration::from_secs(30)")]
    pub(crate) connection_timeout: Duration,
    /// Clean start
    #[builder(default = "true")]
    pub(crate) clean_start: bool,
    /// Username for MQTT
    #[builder(default = "None")]
    pub(crate) username: Option<String>,
    /// Password for MQTT
    #[builder(default = "None")]
    pub(crate) password: Option<String>,
    /// Path to a file containing the MQTT password
    #[builder(default = "None")]
    pub(crate) password_file: Option<String>,
    /// TLS negotiation enabled
    #[builder(default = "true")]
    pub(crate) use_tls: bool,
    /// Path to a PEM file used to validate server identity
    #[builder(default = "None")]
    pub(crate) ca_file: Option<String>,
    /// Whether to check the CA chain against revocation, requiring a CA file
    #[builder(default = "false")]
    pub(crate) ca_require_revocation_check: bool,
    /// Path to a PEM file used to establish X509 client authentication
    #[builder(default = "None")]
    pub(crate) cert_file: Option<String>,
    /// Path to a file containing a key used to establish X509 client authentication
    #[builder(default = "None")]
    pub(crate) key_file: Option<String>,
}

impl MqttConnectionSettingsBuilder {
    /// Validate the MQTT Connection Settings.
    ///
    /// # Errors
    /// Returns a `String` describing the error if
    /// - `host_name` is empty
    /// - `client_id` is empty and `clean_start` is false
    /// - `password` and `password_file` are both set
    /// - `key_file` is set and `cert_file` is not, or vice versa
    fn validate(&self) -> Result<(), String> {
        if let Some(host_name) = &self.host_name {
            if host_name.is_empty() {
                return Err("Host name cannot be empty".to_string());
            }
        }
        if let Some(client_id) = &self.client_id {
            if client_id.is_empty() {
                let clean_start = self.clean_start.unwrap_or(true);
                if !clean_start {
                    return Err(
                        "client_id is mandatory when clean_start is set to false".to_string()
                    );
                }
            }
        }
        if let (Some(Some(_)), Some(Some(_))) = (&self.password, &self.password_file) {
            return Err(
                "password and password_file should not be used at the same time.".to_string(),
            );
        }
        match (&self.cert_file, &self.key_file) {
            (Some(Some(cert_file)), Some(Some(key_file))) => {
                if cert_file.is_empty() || key_file.is_empty() {
                    return Err("key_file and cert_file need to be provided together.".to_string());
                }
            }
            (None | Some(None), None | Some(None)) => {}
            _ => {
                return Err("key_file and cert_file need to be provided together.".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimum_configuration() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn host_name_cannot_be_empty() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name(String::new())
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn client_id_clean_start_combos() {
        // client_id must be provided if clean_start is false
        let result = MqttConnectionSettingsBuilder::default()
            .host_name("test_host".to_string())
            .clean_start(false)
            .build();
        assert!(result.is_err());

        // client_id cannot be empty if clean_start is false
        let result = MqttConnectionSettingsBuilder::default()
            .client_id(String::new())
            .host_name("test_host".to_string())
            .clean_start(false)
            .build();
        assert!(result.is_err());

        // an empty client_id is allowed if clean_start is true
        let result = MqttConnectionSettingsBuilder::default()
            .client_id(String::new())
            .host_name("test_host".to_string())
            .clean_start(true)
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn password_and_password_file_are_mutually_exclusive() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .password("test_password".to_string())
            .password_file("test_password_file".to_string())
            .build();
        assert!(result.is_err());

        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .password("test_password".to_string())
            .build();
        assert!(result.is_ok());

        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .password_file("test_password_file".to_string())
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn cert_file_key_file_combos() {
        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .cert_file("test_cert_file".to_string())
            .key_file("test_key_file".to_string())
            .build();
        assert!(result.is_ok());

        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .cert_file("test_cert_file".to_string())
            .build();
        assert!(result.is_err());

        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .key_file("test_key_file".to_string())
            .build();
        assert!(result.is_err());

        let result = MqttConnectionSettingsBuilder::default()
            .client_id("test_client_id".to_string())
            .host_name("test_host".to_string())
            .cert_file("test_cert_file".to_string())
            .key_file(String::new())
            .build();
        assert!(result.is_err());
    }
}
