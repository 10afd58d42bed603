//! Dialing backend connections.

use std::io;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::backend::descriptor::{AddressError, BackendAddress, BackendDescriptor};
use crate::resilience::{CancelReason, ExchangeContext};

/// Any duplex byte stream usable as a backend connection.
pub trait BackendStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> BackendStream for T {}

pub type BoxedStream = Box<dyn BackendStream>;

/// Errors establishing a backend connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("connect cancelled: {0}")]
    Cancelled(CancelReason),

    #[error(transparent)]
    Address(#[from] AddressError),

    #[error("connect to {address} timed out after {timeout:?}")]
    Timeout { address: String, timeout: Duration },

    #[error("connect to {address} failed: {error}")]
    Io { address: String, error: io::Error },
}

/// Open a connection to `backend`, honouring both the exchange context and
/// the connect timeout.
pub async fn connect(
    ctx: &ExchangeContext,
    backend: &BackendDescriptor,
    connect_timeout: Duration,
) -> Result<BoxedStream, ConnectError> {
    ctx.check().map_err(ConnectError::Cancelled)?;
    let address = backend.parse_address()?;

    let dial = async {
        match &address {
            BackendAddress::Tcp(addr) => {
                let stream = TcpStream::connect(addr).await?;
                stream.set_nodelay(true)?;
                Ok::<BoxedStream, io::Error>(Box::new(stream))
            }
            #[cfg(unix)]
            BackendAddress::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await?;
                Ok::<BoxedStream, io::Error>(Box::new(stream))
            }
            #[cfg(not(unix))]
            BackendAddress::Unix(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "unix sockets are not supported on this platform",
            )),
        }
    };

    let dialed = ctx
        .run(tokio::time::timeout(connect_timeout, dial))
        .await
        .map_err(ConnectError::Cancelled)?;

    match dialed {
        Ok(Ok(stream)) => {
            tracing::trace!(address = %address, "Backend connection established");
            Ok(stream)
        }
        Ok(Err(error)) => Err(ConnectError::Io {
            address: address.to_string(),
            error,
        }),
        Err(_) => Err(ConnectError::Timeout {
            address: address.to_string(),
            timeout: connect_timeout,
        }),
    }
}
