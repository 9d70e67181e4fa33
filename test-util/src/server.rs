//! Scripted loopback MLLP receiver.
//!
//! Each accepted connection consumes the next [`Reply`] from the script;
//! once the script is exhausted the fallback reply is used. Received frame
//! payloads are recorded in arrival order. [`AckServer::start_tls`] wraps
//! every connection in TLS using a certificate issued for `127.0.0.1`.

use std::{
    collections::VecDeque,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use bytes::Bytes;
use edictl::frame::{MllpCodec, encode_frame};
use futures_util::{SinkExt, StreamExt};
use rcgen::CertifiedKey;
use rustls::{ServerConfig, crypto::ring, pki_types::PrivateKeyDer};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpListener,
    task::JoinHandle,
};
use tokio_rustls::TlsAcceptor;
use tokio_util::codec::Framed;
use tracing::debug;

use crate::AnyError;

/// How the receiver answers one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Read one frame, answer with one framed acknowledgement.
    Ack(Vec<u8>),
    /// Like [`Reply::Ack`] but the framed reply is written in two pieces.
    SplitAck(Vec<u8>),
    /// Read one frame and never answer; hold the socket until the peer leaves.
    Silent,
    /// Send the start of a frame, then close without finishing it.
    Truncate,
    /// Write raw bytes as soon as the connection opens, then close.
    Garbage(Vec<u8>),
}

#[derive(Debug, Default)]
struct Shared {
    script: VecDeque<Reply>,
    received: Vec<Bytes>,
    connections: usize,
}

/// Loopback receiver bound to an ephemeral port.
///
/// The accept loop is aborted on drop.
#[derive(Debug)]
pub struct AckServer {
    addr: SocketAddr,
    shared: Arc<Mutex<Shared>>,
    task: JoinHandle<()>,
    ca_pem: Option<String>,
}

impl AckServer {
    /// Start a receiver that answers every connection with `fallback` once
    /// `script` runs out.
    ///
    /// # Errors
    ///
    /// Returns an error if the loopback listener cannot be bound.
    pub async fn start(
        script: impl IntoIterator<Item = Reply>,
        fallback: Reply,
    ) -> Result<Self, AnyError> {
        Self::bind(script, fallback, None).await
    }

    /// Like [`AckServer::start`], but every connection is a TLS session.
    ///
    /// The server certificate is self-signed for `127.0.0.1`; clients trust
    /// it through the PEM returned by [`AckServer::ca_pem`].
    ///
    /// # Errors
    ///
    /// Returns an error if the certificate cannot be issued, the TLS
    /// configuration is rejected or the listener cannot be bound.
    pub async fn start_tls(
        script: impl IntoIterator<Item = Reply>,
        fallback: Reply,
    ) -> Result<Self, AnyError> {
        let CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["127.0.0.1".to_owned()])?;
        let key = PrivateKeyDer::Pkcs8(key_pair.serialize_der().into());
        let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()?
            .with_no_client_auth()
            .with_single_cert(vec![cert.der().clone()], key)?;
        let acceptor = TlsAcceptor::from(Arc::new(config));
        let mut server = Self::bind(script, fallback, Some(acceptor)).await?;
        server.ca_pem = Some(cert.pem());
        Ok(server)
    }

    async fn bind(
        script: impl IntoIterator<Item = Reply>,
        fallback: Reply,
        tls: Option<TlsAcceptor>,
    ) -> Result<Self, AnyError> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Mutex::new(Shared {
            script: script.into_iter().collect(),
            ..Shared::default()
        }));
        let task = tokio::spawn(accept_loop(listener, Arc::clone(&shared), fallback, tls));
        Ok(Self {
            addr,
            shared,
            task,
            ca_pem: None,
        })
    }

    /// Start a receiver that acknowledges every frame with `ack`.
    ///
    /// # Errors
    ///
    /// Returns an error if the loopback listener cannot be bound.
    pub async fn acking(ack: &[u8]) -> Result<Self, AnyError> {
        Self::start([], Reply::Ack(ack.to_vec())).await
    }

    /// Return the bound address.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr { self.addr }

    /// Return the bound port.
    #[must_use]
    pub const fn port(&self) -> u16 { self.addr.port() }

    /// Return every payload received so far.
    #[must_use]
    pub fn received(&self) -> Vec<Bytes> { self.with_shared(|s| s.received.clone()) }

    /// Return the PEM certificate a TLS client must trust, if TLS is on.
    #[must_use]
    pub fn ca_pem(&self) -> Option<&str> { self.ca_pem.as_deref() }

    /// Return how many connections have been accepted.
    #[must_use]
    pub fn connections(&self) -> usize { self.with_shared(|s| s.connections) }

    fn with_shared<T>(&self, f: impl FnOnce(&Shared) -> T) -> T {
        let guard = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }
}

impl Drop for AckServer {
    fn drop(&mut self) { self.task.abort(); }
}

async fn accept_loop(
    listener: TcpListener,
    shared: Arc<Mutex<Shared>>,
    fallback: Reply,
    tls: Option<TlsAcceptor>,
) {
    loop {
        let Ok((socket, peer)) = listener.accept().await else {
            return;
        };
        let reply = {
            let mut state = shared.lock().unwrap_or_else(PoisonError::into_inner);
            state.connections += 1;
            state.script.pop_front().unwrap_or_else(|| fallback.clone())
        };
        debug!(%peer, ?reply, "accepted test connection");
        let served = match &tls {
            Some(acceptor) => match acceptor.accept(socket).await {
                Ok(stream) => serve(stream, &reply, &shared).await,
                Err(e) => Err(e.into()),
            },
            None => serve(socket, &reply, &shared).await,
        };
        if let Err(e) = served {
            debug!(%peer, error = %e, "test connection ended with error");
        }
    }
}

async fn serve<S>(mut socket: S, reply: &Reply, shared: &Mutex<Shared>) -> Result<(), AnyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match reply {
        Reply::Garbage(bytes) => {
            socket.write_all(bytes).await?;
            socket.shutdown().await?;
            Ok(())
        }
        Reply::Truncate => {
            let mut buf = [0_u8; 1024];
            let _read = socket.read(&mut buf).await?;
            socket.write_all(b"\x0bpartial ack").await?;
            socket.shutdown().await?;
            Ok(())
        }
        Reply::Ack(ack) => {
            let mut framed = Framed::new(socket, MllpCodec::new());
            if record_frame(&mut framed, shared).await {
                framed.send(Bytes::copy_from_slice(ack)).await?;
            }
            Ok(())
        }
        Reply::SplitAck(ack) => {
            let mut framed = Framed::new(socket, MllpCodec::new());
            if record_frame(&mut framed, shared).await {
                let mut raw = framed.into_inner();
                let wire = encode_frame(ack);
                let (head, tail) = wire.split_at(wire.len().div_euclid(2));
                raw.write_all(head).await?;
                raw.flush().await?;
                tokio::time::sleep(Duration::from_millis(20)).await;
                raw.write_all(tail).await?;
                raw.flush().await?;
            }
            Ok(())
        }
        Reply::Silent => {
            let mut framed = Framed::new(socket, MllpCodec::new());
            record_frame(&mut framed, shared).await;
            while framed.next().await.is_some() {}
            Ok(())
        }
    }
}

/// Read one frame and record it. Returns `false` if the peer left first.
async fn record_frame<S>(framed: &mut Framed<S, MllpCodec>, shared: &Mutex<Shared>) -> bool
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    match framed.next().await {
        Some(Ok(payload)) => {
            shared
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .received
                .push(payload);
            true
        }
        _ => false,
    }
}
