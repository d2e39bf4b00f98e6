use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_postgres::{Config as TokioPgConnectOptions, config::SslMode as TokioPgSslMode};

use crate::SerializableSecretString;
use crate::shared::ValidationError;

/// Configuration for connecting to the Postgres database holding the mirrored rows.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PgConnectionConfig {
    /// Hostname or IP address of the Postgres server.
    pub host: String,
    /// Port number on which the Postgres server is listening.
    pub port: u16,
    /// Name of the Postgres database to connect to.
    pub name: String,
    /// Username for authenticating with the Postgres server.
    pub username: String,
    /// Password for the specified user. This field is sensitive and redacted in debug output.
    pub password: Option<SerializableSecretString>,
    /// TLS configuration for secure connections.
    pub tls: TlsConfig,
    /// Timeout, in milliseconds, for establishing a connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_ms: Option<u64>,
}

impl PgConnectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.tls.validate()
    }
}

/// TLS settings for secure Postgres connections.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TlsConfig {
    /// PEM-encoded trusted root certificates.
    pub trusted_root_certs: String,
    /// Whether TLS is enabled for the connection.
    pub enabled: bool,
}

impl TlsConfig {
    /// Validates the [`TlsConfig`].
    ///
    /// Returns [`ValidationError::MissingTrustedRootCerts`] if TLS is enabled but no certificates are provided.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.enabled && self.trusted_root_certs.is_empty() {
            return Err(ValidationError::MissingTrustedRootCerts);
        }

        Ok(())
    }

    /// Returns a configuration with TLS turned off.
    pub fn disabled() -> Self {
        Self {
            trusted_root_certs: String::new(),
            enabled: false,
        }
    }
}

/// Converts [`PgConnectionConfig`] into driver specific connect options.
pub trait IntoConnectOptions<Output> {
    /// Creates connection options without selecting a database.
    ///
    /// Used for administrative operations such as creating the database itself.
    fn without_db(&self) -> Output;

    /// Creates connection options for the configured database.
    fn with_db(&self) -> Output;
}

impl IntoConnectOptions<TokioPgConnectOptions> for PgConnectionConfig {
    fn without_db(&self) -> TokioPgConnectOptions {
        let ssl_mode = if self.tls.enabled {
            TokioPgSslMode::Require
        } else {
            TokioPgSslMode::Prefer
        };
        let mut config = TokioPgConnectOptions::new();
        config
            .host(self.host.clone())
            .port(self.port)
            .user(self.username.clone())
            // Certificates are verified by the rustls connector, the driver only sees the mode.
            .ssl_mode(ssl_mode);

        if let Some(password) = &self.password {
            config.password(password.expose_secret());
        }

        if let Some(connect_timeout_ms) = self.connect_timeout_ms {
            config.connect_timeout(Duration::from_millis(connect_timeout_ms));
        }

        config
    }

    fn with_db(&self) -> TokioPgConnectOptions {
        let mut options: TokioPgConnectOptions = self.without_db();
        options.dbname(self.name.clone());
        options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection_config() -> PgConnectionConfig {
        PgConnectionConfig {
            host: "localhost".to_owned(),
            port: 5430,
            name: "writers".to_owned(),
            username: "postgres".to_owned(),
            password: Some("postgres".into()),
            tls: TlsConfig::disabled(),
            connect_timeout_ms: Some(2_000),
        }
    }

    #[test]
    fn tls_without_certificates_is_rejected() {
        let mut config = connection_config();
        config.tls.enabled = true;

        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingTrustedRootCerts)
        );
    }

    #[test]
    fn connect_options_carry_database_only_when_requested() {
        let config = connection_config();

        let without_db: TokioPgConnectOptions = config.without_db();
        assert_eq!(without_db.get_dbname(), None);
        assert_eq!(without_db.get_ports(), &[5430]);
        assert_eq!(without_db.get_user(), Some("postgres"));
        assert_eq!(
            without_db.get_connect_timeout(),
            Some(&Duration::from_millis(2_000))
        );

        let with_db: TokioPgConnectOptions = config.with_db();
        assert_eq!(with_db.get_dbname(), Some("writers"));
    }
}
