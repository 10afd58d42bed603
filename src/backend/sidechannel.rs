//! Sidechannel transport.
//!
//! # Responsibilities
//! - Open a raw duplex connection correlated to a pending RPC call
//! - Make every read and write race the exchange context
//! - Release the connection exactly once
//!
//! # Design Decisions
//! - `split` hands out borrowed halves, so one reader and one writer can run
//!   concurrently and `close` cannot run while either half is alive
//! - `Drop` releases the connection if `close` was never reached (panic or
//!   early return)

use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::backend::connect::{connect, BoxedStream, ConnectError};
use crate::backend::descriptor::BackendDescriptor;
use crate::backend::wire::{write_frame, Hello, SidechannelId, WireError};
use crate::resilience::{CancelReason, ExchangeContext};

/// Errors from sidechannel operations.
#[derive(Debug, Error)]
pub enum SidechannelError {
    #[error("sidechannel cancelled: {0}")]
    Cancelled(CancelReason),

    #[error("sidechannel is closed")]
    Closed,

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("sidechannel handshake failed: {0}")]
    Handshake(#[from] WireError),

    #[error("sidechannel i/o error: {0}")]
    Io(#[from] io::Error),
}

/// Shared view of a sidechannel's lifecycle.
#[derive(Debug, Clone, Default)]
pub struct SidechannelStatus {
    inner: Arc<StatusInner>,
}

#[derive(Debug, Default)]
struct StatusInner {
    closed: AtomicBool,
    releases: AtomicUsize,
}

impl SidechannelStatus {
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// How many times the connection was released. Never more than one.
    pub fn close_count(&self) -> usize {
        self.inner.releases.load(Ordering::Acquire)
    }

    /// Returns true for the call that actually performed the transition.
    fn mark_closed(&self) -> bool {
        let first = !self.inner.closed.swap(true, Ordering::AcqRel);
        if first {
            self.inner.releases.fetch_add(1, Ordering::AcqRel);
        }
        first
    }
}

struct Halves {
    reader: ReadHalf<BoxedStream>,
    writer: WriteHalf<BoxedStream>,
}

/// An open sidechannel for one RPC call.
pub struct Sidechannel {
    id: SidechannelId,
    ctx: ExchangeContext,
    io: Option<Halves>,
    write_closed: bool,
    status: SidechannelStatus,
}

impl Sidechannel {
    /// Wrap an already handshaken stream.
    pub fn new(id: SidechannelId, stream: BoxedStream, ctx: ExchangeContext) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            id,
            ctx,
            io: Some(Halves { reader, writer }),
            write_closed: false,
            status: SidechannelStatus::default(),
        }
    }

    pub fn id(&self) -> &SidechannelId {
        &self.id
    }

    pub fn status(&self) -> SidechannelStatus {
        self.status.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.io.is_none()
    }

    /// Borrow the reading and writing halves for concurrent use.
    pub fn split(&mut self) -> Result<(SidechannelReader<'_>, SidechannelWriter<'_>), SidechannelError> {
        let halves = self.io.as_mut().ok_or(SidechannelError::Closed)?;
        Ok((
            SidechannelReader {
                reader: &mut halves.reader,
                ctx: &self.ctx,
            },
            SidechannelWriter {
                writer: &mut halves.writer,
                ctx: &self.ctx,
                write_closed: &mut self.write_closed,
            },
        ))
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SidechannelError> {
        let (mut reader, _) = self.split()?;
        reader.read(buf).await
    }

    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, SidechannelError> {
        let (_, mut writer) = self.split()?;
        writer.write(buf).await
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), SidechannelError> {
        let (_, mut writer) = self.split()?;
        writer.write_all(buf).await
    }

    /// Half-close: tell the backend no more input is coming.
    pub async fn close_write(&mut self) -> Result<(), SidechannelError> {
        let (_, mut writer) = self.split()?;
        writer.close_write().await
    }

    /// Release the connection. Idempotent.
    pub async fn close(&mut self) -> Result<(), SidechannelError> {
        let Some(mut halves) = self.io.take() else {
            return Ok(());
        };
        self.status.mark_closed();

        let result = if self.write_closed {
            Ok(())
        } else {
            // Bounded so a wedged peer cannot hold up the caller.
            match tokio::time::timeout(Duration::from_secs(1), halves.writer.shutdown()).await {
                Ok(result) => result,
                Err(_) => Ok(()),
            }
        };
        tracing::trace!(sidechannel_id = %self.id, "Sidechannel closed");

        match result {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => Ok(()),
            Err(e) => Err(SidechannelError::Io(e)),
        }
    }
}

impl Drop for Sidechannel {
    fn drop(&mut self) {
        if self.io.take().is_some() && self.status.mark_closed() {
            tracing::debug!(sidechannel_id = %self.id, "Sidechannel released on drop");
        }
    }
}

impl std::fmt::Debug for Sidechannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sidechannel")
            .field("id", &self.id)
            .field("closed", &self.is_closed())
            .field("write_closed", &self.write_closed)
            .finish()
    }
}

fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::NotConnected | io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

/// Reading half borrowed from a [`Sidechannel`].
pub struct SidechannelReader<'a> {
    reader: &'a mut ReadHalf<BoxedStream>,
    ctx: &'a ExchangeContext,
}

impl SidechannelReader<'_> {
    /// Read some bytes; `Ok(0)` means the backend finished writing.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, SidechannelError> {
        let n = self
            .ctx
            .run(self.reader.read(buf))
            .await
            .map_err(SidechannelError::Cancelled)??;
        Ok(n)
    }
}

/// Writing half borrowed from a [`Sidechannel`].
pub struct SidechannelWriter<'a> {
    writer: &'a mut WriteHalf<BoxedStream>,
    ctx: &'a ExchangeContext,
    write_closed: &'a mut bool,
}

impl SidechannelWriter<'_> {
    pub async fn write(&mut self, buf: &[u8]) -> Result<usize, SidechannelError> {
        if *self.write_closed {
            return Err(SidechannelError::Closed);
        }
        let n = self
            .ctx
            .run(self.writer.write(buf))
            .await
            .map_err(SidechannelError::Cancelled)??;
        Ok(n)
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), SidechannelError> {
        if *self.write_closed {
            return Err(SidechannelError::Closed);
        }
        self.ctx
            .run(self.writer.write_all(buf))
            .await
            .map_err(SidechannelError::Cancelled)??;
        Ok(())
    }

    /// Flush and shut down the write direction. Idempotent.
    pub async fn close_write(&mut self) -> Result<(), SidechannelError> {
        if *self.write_closed {
            return Ok(());
        }
        self.ctx
            .run(self.writer.shutdown())
            .await
            .map_err(SidechannelError::Cancelled)??;
        *self.write_closed = true;
        Ok(())
    }
}

/// Capability to open the sidechannel for a pending call.
pub trait SidechannelDialer: Send + Sync {
    fn open(
        &self,
        ctx: &ExchangeContext,
        backend: &BackendDescriptor,
        id: &SidechannelId,
    ) -> impl Future<Output = Result<Sidechannel, SidechannelError>> + Send;
}

/// Dials sidechannels on the backend's own address.
#[derive(Debug, Clone)]
pub struct BackendDialer {
    connect_timeout: Duration,
}

impl BackendDialer {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl SidechannelDialer for BackendDialer {
    async fn open(
        &self,
        ctx: &ExchangeContext,
        backend: &BackendDescriptor,
        id: &SidechannelId,
    ) -> Result<Sidechannel, SidechannelError> {
        ctx.check().map_err(SidechannelError::Cancelled)?;

        let mut stream = connect(ctx, backend, self.connect_timeout).await?;
        let hello = Hello::Sidechannel {
            sidechannel_id: id.clone(),
        };
        ctx.run(write_frame(&mut stream, &hello))
            .await
            .map_err(SidechannelError::Cancelled)??;

        tracing::debug!(sidechannel_id = %id, "Sidechannel opened");
        Ok(Sidechannel::new(id.clone(), stream, ctx.clone()))
    }
}
