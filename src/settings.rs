//! Validated runtime settings derived from [`AppConfig`].
//!
//! Raw configuration arrives as strings and integers from files, the
//! environment and flags. [`RuntimeSettings::from_config`] rejects values
//! that cannot drive a delivery and builds the typed pieces the pipeline and
//! transport consume.

use std::time::Duration;

use camino::Utf8PathBuf;
use cli_defs::AppConfig;
use thiserror::Error;

use crate::{
    delivery::RetryPolicy,
    pipeline::PipelineLayout,
    transport::{TlsSettings, TransportConfig},
};

/// Configuration values that cannot be used.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    /// The receiver host is blank.
    #[error("receiver host cannot be empty")]
    EmptyHost,
    /// Port zero cannot be connected to.
    #[error("receiver port must be non-zero")]
    ZeroPort,
    /// A zero timeout would fail every attempt.
    #[error("timeout must be at least one second")]
    ZeroTimeout,
    /// At least one attempt is needed to deliver anything.
    #[error("attempts must be at least 1")]
    ZeroAttempts,
    /// The pipeline root is blank.
    #[error("pipeline root cannot be empty")]
    EmptyRoot,
}

/// Typed settings for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    layout: PipelineLayout,
    transport: TransportConfig,
    retry: RetryPolicy,
}

impl RuntimeSettings {
    /// Validate `cfg` and build the pipeline, transport and retry settings.
    ///
    /// # Errors
    /// Returns the first [`SettingsError`] found.
    pub fn from_config(cfg: &AppConfig) -> Result<Self, SettingsError> {
        if cfg.root.trim().is_empty() {
            return Err(SettingsError::EmptyRoot);
        }
        let host = cfg.host.trim();
        if host.is_empty() {
            return Err(SettingsError::EmptyHost);
        }
        if cfg.port == 0 {
            return Err(SettingsError::ZeroPort);
        }
        if cfg.timeout_secs == 0 {
            return Err(SettingsError::ZeroTimeout);
        }
        if cfg.attempts == 0 {
            return Err(SettingsError::ZeroAttempts);
        }

        let tls = cfg.tls.then(|| TlsSettings {
            ca_file: cfg.ca_file.as_deref().map(Utf8PathBuf::from),
        });
        Ok(Self {
            layout: PipelineLayout::new(cfg.root.as_str()),
            transport: TransportConfig {
                host: host.to_owned(),
                port: cfg.port,
                timeout: Duration::from_secs(cfg.timeout_secs),
                tls,
            },
            retry: RetryPolicy::new(cfg.attempts, Duration::from_millis(cfg.backoff_ms)),
        })
    }

    /// Return the pipeline layout.
    #[must_use]
    pub const fn layout(&self) -> &PipelineLayout { &self.layout }

    /// Return the receiver connection settings.
    #[must_use]
    pub const fn transport(&self) -> &TransportConfig { &self.transport }

    /// Return the retry policy.
    #[must_use]
    pub const fn retry(&self) -> RetryPolicy { self.retry }
}

#[cfg(test)]
mod tests {
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn cfg() -> AppConfig {
        AppConfig {
            root: "/srv/edi".to_owned(),
            host: "edi.example.net".to_owned(),
            port: 2575,
            timeout_secs: 15,
            attempts: 3,
            backoff_ms: 1000,
            tls: false,
            ca_file: None,
        }
    }

    #[rstest]
    fn builds_plain_settings(cfg: AppConfig) {
        let settings = RuntimeSettings::from_config(&cfg).expect("valid config");
        assert_eq!(settings.layout().root().as_str(), "/srv/edi");
        assert_eq!(
            settings.transport(),
            &TransportConfig::plain("edi.example.net", 2575, Duration::from_secs(15))
        );
        assert_eq!(settings.retry(), RetryPolicy::new(3, Duration::from_secs(1)));
    }

    #[rstest]
    fn tls_carries_ca_file(mut cfg: AppConfig) {
        cfg.tls = true;
        cfg.ca_file = Some("/etc/edi/ca.pem".to_owned());
        let settings = RuntimeSettings::from_config(&cfg).expect("valid config");
        assert_eq!(
            settings.transport().tls,
            Some(TlsSettings {
                ca_file: Some(Utf8PathBuf::from("/etc/edi/ca.pem")),
            })
        );
    }

    #[rstest]
    fn ca_file_without_tls_is_ignored(mut cfg: AppConfig) {
        cfg.ca_file = Some("/etc/edi/ca.pem".to_owned());
        let settings = RuntimeSettings::from_config(&cfg).expect("valid config");
        assert_eq!(settings.transport().tls, None);
    }

    #[rstest]
    #[case::blank_host(|c: &mut AppConfig| c.host = "  ".to_owned(), SettingsError::EmptyHost)]
    #[case::zero_port(|c: &mut AppConfig| c.port = 0, SettingsError::ZeroPort)]
    #[case::zero_timeout(|c: &mut AppConfig| c.timeout_secs = 0, SettingsError::ZeroTimeout)]
    #[case::zero_attempts(|c: &mut AppConfig| c.attempts = 0, SettingsError::ZeroAttempts)]
    #[case::blank_root(|c: &mut AppConfig| c.root = String::new(), SettingsError::EmptyRoot)]
    fn rejects_unusable_values(
        mut cfg: AppConfig,
        #[case] tweak: fn(&mut AppConfig),
        #[case] expected: SettingsError,
    ) {
        tweak(&mut cfg);
        assert_eq!(RuntimeSettings::from_config(&cfg), Err(expected));
    }
}
