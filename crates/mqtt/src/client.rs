//! Construction of the rumqttc `AsyncClient`/`EventLoop` pair from a `Config`.
//!
//! Nothing here touches the network; the connection is opened lazily the
//! first time the event loop is polled by the kernel.

use std::{fs, time::Duration};

use rumqttc::{AsyncClient, EventLoop, MqttOptions, TlsConfiguration, Transport};
use tracing::debug;

use super::{
    config::{Config, TlsConfig},
    error::TransferError,
};

pub struct ClientBuilder {
    opts: MqttOptions,
    cap: usize,
    tls: Option<TlsConfig>,
}

impl ClientBuilder {
    pub fn new(client_id: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            opts: MqttOptions::new(client_id, host, port),
            cap: 10,
            tls: None,
        }
    }

    /// Applies every option of the `[transport]` table.
    pub fn from_config(config: &Config) -> Self {
        let mut builder = Self::new(config.client_id.clone(), config.host.clone(), config.port)
            .keep_alive(config.keep_alive)
            .clean_session(config.clean_session)
            .max_inflight(config.max_inflight)
            .channel_capacity(config.request_channel_capacity);

        if let Some(size) = config.max_packet_size {
            builder.opts.set_max_packet_size(size as usize, size as usize);
        }
        if let Some((user, pass)) = config.credentials() {
            builder = builder.credentials(user, pass);
        }
        builder.tls = config.tls.clone().filter(TlsConfig::is_enabled);
        builder
    }

    pub fn keep_alive(mut self, secs: u64) -> Self {
        self.opts.set_keep_alive(Duration::from_secs(secs));
        self
    }

    pub fn clean_session(mut self, clean: bool) -> Self {
        self.opts.set_clean_session(clean);
        self
    }

    pub fn max_inflight(mut self, max: u16) -> Self {
        self.opts.set_inflight(max);
        self
    }

    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.opts.set_credentials(username, password);
        self
    }

    pub fn channel_capacity(mut self, cap: usize) -> Self {
        self.cap = cap.max(1);
        self
    }

    pub fn with_tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    fn tls_transport(tls: &TlsConfig) -> Result<Transport, TransferError> {
        let ca_path = tls
            .ca_cert_path
            .as_deref()
            .ok_or_else(|| TransferError::ClientSetup("TLS enabled without a CA certificate".into()))?;
        let ca = fs::read(ca_path)?;

        let client_auth = match (tls.client_cert_path.as_deref(), tls.client_key_path.as_deref()) {
            (Some(cert), Some(key)) => Some((fs::read(cert)?, fs::read(key)?)),
            (None, None) => None,
            _ => {
                return Err(TransferError::ClientSetup(
                    "Both client certificate and key must be provided or neither".into(),
                ))
            }
        };

        Ok(Transport::Tls(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth,
        }))
    }

    pub fn build(mut self) -> Result<(AsyncClient, EventLoop), TransferError> {
        if let Some(tls) = &self.tls {
            let transport = Self::tls_transport(tls)?;
            self.opts.set_transport(transport);
        }
        let (host, port) = self.opts.broker_address();
        debug!(
            client_id = %self.opts.client_id(),
            %host,
            port,
            tls = self.tls.is_some(),
            "Building MQTT client"
        );
        Ok(AsyncClient::new(self.opts, self.cap))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::NamedTempFile;

    use super::*;

    fn config() -> Config {
        Config {
            host: "localhost".into(),
            client_id: "kitchen".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_plain_tcp() {
        let result = ClientBuilder::from_config(&config()).build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_options_from_config() {
        let config = Config {
            keep_alive: 15,
            clean_session: false,
            username: Some("u".into()),
            password: Some("p".into()),
            ..config()
        };
        let builder = ClientBuilder::from_config(&config);
        assert_eq!(builder.opts.client_id(), "kitchen");
        assert_eq!(builder.opts.keep_alive(), Duration::from_secs(15));
        assert!(!builder.opts.clean_session());
        assert_eq!(
            builder.opts.credentials(),
            Some(("u".to_string(), "p".to_string()))
        );
    }

    #[test]
    fn test_build_with_tls_ca_only() {
        let mut ca = NamedTempFile::new().unwrap();
        writeln!(ca, "-----BEGIN CERTIFICATE-----").unwrap();

        let result = ClientBuilder::from_config(&config())
            .with_tls(TlsConfig::with_ca_only(ca.path().to_str().unwrap()))
            .build();
        assert!(result.is_ok());
    }

    #[test]
    fn test_build_with_missing_ca_file() {
        let result = ClientBuilder::from_config(&config())
            .with_tls(TlsConfig::with_ca_only("/nonexistent/ca.pem"))
            .build();
        assert!(matches!(result, Err(TransferError::Io(_))));
    }

    #[test]
    fn test_build_with_partial_client_auth() {
        let ca = NamedTempFile::new().unwrap();
        let tls = TlsConfig {
            ca_cert_path: Some(ca.path().to_str().unwrap().into()),
            client_cert_path: None,
            client_key_path: Some("/tmp/key.pem".into()),
        };
        let result = ClientBuilder::from_config(&config()).with_tls(tls).build();
        assert!(matches!(result, Err(TransferError::ClientSetup(_))));
    }
}
