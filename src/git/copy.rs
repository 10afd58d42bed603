//! Directional copy loops between the HTTP exchange and the sidechannel.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};

use crate::backend::sidechannel::{SidechannelError, SidechannelReader, SidechannelWriter};
use crate::git::response::HttpResponseWriter;
use crate::resilience::{CancelReason, ExchangeContext};

const COPY_BUFFER_SIZE: usize = 32 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Request body → sidechannel.
    Inbound,
    /// Sidechannel → response.
    Outbound,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Inbound => "inbound",
            Direction::Outbound => "outbound",
        }
    }
}

#[derive(Debug, Error)]
pub enum CopyError {
    #[error("reading request body: {0}")]
    ClientRead(io::Error),

    #[error("writing response: {0}")]
    ClientWrite(io::Error),

    #[error(transparent)]
    Sidechannel(SidechannelError),

    #[error("copy cancelled: {0}")]
    Cancelled(CancelReason),
}

impl CopyError {
    /// Failure on the client's side of the exchange.
    pub fn is_client_side(&self) -> bool {
        matches!(self, CopyError::ClientRead(_) | CopyError::ClientWrite(_))
    }
}

impl From<SidechannelError> for CopyError {
    fn from(err: SidechannelError) -> Self {
        match err {
            SidechannelError::Cancelled(reason) => CopyError::Cancelled(reason),
            other => CopyError::Sidechannel(other),
        }
    }
}

/// Terminal state of one copy loop.
#[derive(Debug)]
pub struct CopyResult {
    pub direction: Direction,
    pub bytes: u64,
    /// `None` means a clean EOF.
    pub error: Option<CopyError>,
}

impl CopyResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Copy the request body into the sidechannel, then half-close it.
pub async fn copy_inbound<B>(
    ctx: &ExchangeContext,
    body: &mut B,
    mut sidechannel: SidechannelWriter<'_>,
) -> CopyResult
where
    B: AsyncRead + Unpin,
{
    let mut bytes = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    let error = loop {
        let n = match ctx.run(body.read(&mut buf)).await {
            Ok(Ok(0)) => match sidechannel.close_write().await {
                Ok(()) => break None,
                Err(e) => break Some(CopyError::from(e)),
            },
            Ok(Ok(n)) => n,
            Ok(Err(e)) => break Some(CopyError::ClientRead(e)),
            Err(reason) => break Some(CopyError::Cancelled(reason)),
        };

        if let Err(e) = sidechannel.write_all(&buf[..n]).await {
            break Some(CopyError::from(e));
        }
        bytes += n as u64;
    };

    CopyResult {
        direction: Direction::Inbound,
        bytes,
        error,
    }
}

/// Copy sidechannel output into the HTTP response until the backend is done.
pub async fn copy_outbound<W>(
    ctx: &ExchangeContext,
    mut sidechannel: SidechannelReader<'_>,
    response: &mut HttpResponseWriter<W>,
) -> CopyResult
where
    W: AsyncWrite + Unpin,
{
    let mut bytes = 0u64;
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];

    let error = loop {
        let n = match sidechannel.read(&mut buf).await {
            Ok(0) => match ctx.run(response.flush()).await {
                Ok(Ok(())) => break None,
                Ok(Err(e)) => break Some(CopyError::ClientWrite(e)),
                Err(reason) => break Some(CopyError::Cancelled(reason)),
            },
            Ok(n) => n,
            Err(e) => break Some(CopyError::from(e)),
        };

        match ctx.run(response.write_all(&buf[..n])).await {
            Ok(Ok(())) => bytes += n as u64,
            Ok(Err(e)) => break Some(CopyError::ClientWrite(e)),
            Err(reason) => break Some(CopyError::Cancelled(reason)),
        }
    };

    CopyResult {
        direction: Direction::Outbound,
        bytes,
        error,
    }
}
