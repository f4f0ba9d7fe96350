//! # Connections
//!
//! Dialing, binding and accepting for both transport kinds, and the frame
//! codec that turns a byte stream into whole envelopes.

use std::path::PathBuf;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::LengthDelimitedCodec;

use crate::config::{SocketConfig, TransportKind};
use crate::errors::TransportError;

/// Largest frame accepted on the wire.
pub const MAX_FRAME_LENGTH: usize = 64 * 1024 * 1024;

/// Any connected byte stream.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Io for T {}

pub type BoxedIo = Box<dyn Io>;

/// Codec for one envelope per frame.
#[must_use]
pub fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .max_frame_length(MAX_FRAME_LENGTH)
        .new_codec()
}

/// Open one connection to the configured endpoint.
pub async fn dial(config: &SocketConfig) -> std::io::Result<BoxedIo> {
    match config.transport {
        TransportKind::Tcp => {
            let stream = TcpStream::connect((config.address.as_str(), config.port)).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
        #[cfg(unix)]
        TransportKind::Unix => {
            let stream = tokio::net::UnixStream::connect(&config.address).await?;
            Ok(Box::new(stream))
        }
        #[cfg(not(unix))]
        TransportKind::Unix => Err(std::io::Error::new(
            std::io::ErrorKind::Unsupported,
            "unix sockets are not supported on this platform",
        )),
    }
}

/// A bound listener of either kind.
#[derive(Debug)]
pub enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix {
        listener: tokio::net::UnixListener,
        path: PathBuf,
    },
}

impl Listener {
    /// Bind the configured endpoint. A stale Unix socket file is replaced.
    pub async fn bind(config: &SocketConfig) -> Result<Self, TransportError> {
        let endpoint = config.endpoint();
        match config.transport {
            TransportKind::Tcp => TcpListener::bind((config.address.as_str(), config.port))
                .await
                .map(Self::Tcp)
                .map_err(|source| TransportError::Bind { endpoint, source }),
            #[cfg(unix)]
            TransportKind::Unix => {
                let path = PathBuf::from(&config.address);
                if path.exists() {
                    std::fs::remove_file(&path)
                        .map_err(|source| TransportError::Bind { endpoint: endpoint.clone(), source })?;
                }
                let listener = tokio::net::UnixListener::bind(&path)
                    .map_err(|source| TransportError::Bind { endpoint, source })?;
                Ok(Self::Unix { listener, path })
            }
            #[cfg(not(unix))]
            TransportKind::Unix => Err(TransportError::UnsupportedTransport),
        }
    }

    /// Accept a single connection.
    pub async fn accept(&self) -> std::io::Result<BoxedIo> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Self::Unix { listener, .. } => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }

    /// Bound TCP address, if this is a TCP listener.
    #[must_use]
    pub fn local_addr(&self) -> Option<std::net::SocketAddr> {
        match self {
            Self::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            Self::Unix { .. } => None,
        }
    }
}

#[cfg(unix)]
impl Drop for Listener {
    fn drop(&mut self) {
        if let Self::Unix { path, .. } = self {
            let _ = std::fs::remove_file(path);
        }
    }
}
