//! Outbound MLLP transport.
//!
//! One call to [`Transport::send`] opens a connection, writes a single frame,
//! waits for one acknowledgement frame and closes the connection again. The
//! transport never retries; bounded retry lives in [`crate::delivery`].
//! Every failure is reported as a [`TransportError`] value so the caller can
//! record it against the document and move on.

pub mod tls;

use std::{io, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8PathBuf;
use futures_util::{SinkExt, StreamExt};
use rustls::pki_types::ServerName;
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    time::{Instant, timeout, timeout_at},
};
use tokio_rustls::TlsConnector;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::frame::MllpCodec;

/// Errors produced by a single send/acknowledge exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    /// TCP connection could not be established within the timeout.
    #[error("connect to {addr} failed: {reason}")]
    Connect {
        /// `host:port` that was dialled.
        addr: String,
        /// Underlying failure description.
        reason: String,
    },
    /// TLS handshake with the receiver failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(String),
    /// TLS settings could not be turned into a client configuration.
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// No complete acknowledgement arrived before the deadline.
    #[error("no acknowledgement within {0:?}")]
    Timeout(Duration),
    /// The receiver closed the connection without a complete frame.
    #[error("peer closed the connection before acknowledging")]
    Closed,
    /// Reading or writing the socket failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// TLS options for a receiver.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsSettings {
    /// PEM bundle of trusted roots; the WebPKI roots are used when `None`.
    pub ca_file: Option<Utf8PathBuf>,
}

/// Connection parameters for an MLLP receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Receiver host name or address.
    pub host: String,
    /// Receiver TCP port.
    pub port: u16,
    /// Bound on connecting, on the TLS handshake and on waiting for the ACK.
    pub timeout: Duration,
    /// TLS options; plain TCP when `None`.
    pub tls: Option<TlsSettings>,
}

impl TransportConfig {
    /// Plain TCP configuration for `host:port`.
    #[must_use]
    pub fn plain(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            tls: None,
        }
    }

    /// Return `host:port` for log and error messages.
    #[must_use]
    pub fn addr(&self) -> String { format!("{}:{}", self.host, self.port) }
}

/// Something that can deliver one framed payload and return the ACK payload.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send `payload` as one frame and wait for one acknowledgement frame.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] describing why no acknowledgement was
    /// obtained.
    async fn send(&self, payload: &[u8]) -> Result<Bytes, TransportError>;
}

/// MLLP client over TCP or TLS.
#[derive(Clone)]
pub struct MllpClient {
    config: TransportConfig,
    tls: Option<TlsConnector>,
}

impl std::fmt::Debug for MllpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MllpClient")
            .field("config", &self.config)
            .field("tls", &self.tls.is_some())
            .finish()
    }
}

impl MllpClient {
    /// Build a client, resolving TLS trust up front when TLS is enabled.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::TlsConfig`] if the CA bundle is unusable.
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let tls = config
            .tls
            .as_ref()
            .map(|settings| tls::connector(settings.ca_file.as_deref()))
            .transpose()?;
        Ok(Self { config, tls })
    }

    /// Return the connection parameters.
    #[must_use]
    pub const fn config(&self) -> &TransportConfig { &self.config }

    async fn connect(&self) -> Result<TcpStream, TransportError> {
        let addr = self.config.addr();
        let dial = TcpStream::connect((self.config.host.as_str(), self.config.port));
        match timeout(self.config.timeout, dial).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(TransportError::Connect {
                addr,
                reason: e.to_string(),
            }),
            Err(_) => Err(TransportError::Connect {
                addr,
                reason: format!("timed out after {:?}", self.config.timeout),
            }),
        }
    }

    async fn handshake(
        &self,
        connector: &TlsConnector,
        stream: TcpStream,
    ) -> Result<tokio_rustls::client::TlsStream<TcpStream>, TransportError> {
        let server_name = ServerName::try_from(self.config.host.clone())
            .map_err(|e| TransportError::Handshake(format!("invalid server name: {e}")))?;
        // The raw stream is moved into the handshake future and dropped with
        // it, so every failure path below closes the socket.
        match timeout(self.config.timeout, connector.connect(server_name, stream)).await {
            Ok(Ok(tls)) => Ok(tls),
            Ok(Err(e)) => Err(TransportError::Handshake(e.to_string())),
            Err(_) => Err(TransportError::Handshake(format!(
                "timed out after {:?}",
                self.config.timeout
            ))),
        }
    }
}

#[async_trait]
impl Transport for MllpClient {
    async fn send(&self, payload: &[u8]) -> Result<Bytes, TransportError> {
        let stream = self.connect().await?;
        debug!(addr = %self.config.addr(), tls = self.tls.is_some(), "connected");
        match &self.tls {
            Some(connector) => {
                let tls = self.handshake(connector, stream).await?;
                exchange(tls, payload, self.config.timeout).await
            }
            None => exchange(stream, payload, self.config.timeout).await,
        }
    }
}

/// Write one frame to `stream` and wait for the first acknowledgement frame.
///
/// The stream is shut down and dropped before returning, whatever the
/// outcome.
async fn exchange<S>(stream: S, payload: &[u8], limit: Duration) -> Result<Bytes, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let deadline = Instant::now() + limit;
    let mut framed = Framed::new(stream, MllpCodec::new());
    let result = timeout_at(deadline, send_and_await_ack(&mut framed, payload))
        .await
        .unwrap_or(Err(TransportError::Timeout(limit)));

    match timeout(limit, framed.get_mut().shutdown()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(error = %e, "shutdown after exchange failed"),
        Err(_) => debug!("shutdown after exchange timed out"),
    }
    result
}

async fn send_and_await_ack<S>(
    framed: &mut Framed<S, MllpCodec>,
    payload: &[u8],
) -> Result<Bytes, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    framed.send(payload).await?;
    match framed.next().await {
        Some(Ok(ack)) => Ok(ack),
        Some(Err(e)) => Err(TransportError::Io(e)),
        None => Err(TransportError::Closed),
    }
}
