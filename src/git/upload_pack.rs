//! Upload-pack bridge.
//!
//! # Responsibilities
//! - Start the backend call and open its sidechannel
//! - Pump the request body into the sidechannel and the sidechannel into the
//!   HTTP response, concurrently
//! - Wait for both pumps and the call's reply under one exchange context
//! - Fold every failure into a single classified outcome
//!
//! # Design Decisions
//! - The pumps and the reply wait run as joined futures on the caller's task;
//!   any failure cancels the shared context so the others unblock promptly
//! - The sidechannel is closed after the join, on every path; `Drop` covers
//!   panics
//! - A deadline wins over any other observation, regardless of which
//!   participant noticed it first

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use crate::backend::{
    BackendDescriptor, Repository, RpcError, SidechannelDialer, SidechannelError, SidechannelId,
    UploadPackCall, UploadPackRpc,
};
use crate::git::copy::{copy_inbound, copy_outbound, CopyError, CopyResult};
use crate::git::error::{OutcomeKind, TransportError, UploadPackError};
use crate::git::response::HttpResponseWriter;
use crate::observability::metrics;
use crate::resilience::{CancelReason, DeadlineController, ExchangeContext};

/// One inbound upload-pack request.
#[derive(Debug)]
pub struct UploadPackRequest<B> {
    /// Raw git-upload-pack request bytes, consumed once.
    pub body: B,
    pub repository: Repository,
    /// Value of the `Git-Protocol` header.
    pub git_protocol: Option<String>,
    pub git_config_options: Vec<String>,
    /// Cancelled when the inbound request goes away.
    pub cancel: CancellationToken,
}

impl<B> UploadPackRequest<B> {
    pub fn new(body: B, repository: Repository) -> Self {
        Self {
            body,
            repository,
            git_protocol: None,
            git_config_options: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }
}

/// What a successful exchange moved.
#[derive(Debug, Clone)]
pub struct UploadPackSummary {
    pub sidechannel_id: SidechannelId,
    pub bytes_in: u64,
    pub bytes_out: u64,
    pub elapsed: Duration,
}

/// Everything observed while the exchange ran, before classification.
#[derive(Debug, Default)]
struct Observed {
    client: Option<CopyError>,
    backend: Option<RpcError>,
    transport: Option<TransportError>,
}

impl Observed {
    fn record_copy(&mut self, result: &mut CopyResult) {
        match result.error.take() {
            Some(err) if err.is_client_side() => {
                self.client.get_or_insert(err);
            }
            Some(err) => self.record_transport(TransportError::Copy(err)),
            None => {}
        }
    }

    fn record_rpc(&mut self, err: RpcError) {
        match err {
            RpcError::Backend(_) => {
                self.backend.get_or_insert(err);
            }
            other => self.record_transport(TransportError::Rpc(other)),
        }
    }

    /// Cancellation echoes never displace a real transport failure.
    fn record_transport(&mut self, err: TransportError) {
        let replace = match &self.transport {
            None => true,
            Some(existing) => is_cancellation(existing) && !is_cancellation(&err),
        };
        if replace {
            self.transport = Some(err);
        }
    }

    fn resolve(self, ctx: &ExchangeContext) -> Result<(), UploadPackError> {
        match ctx.reason() {
            Some(CancelReason::DeadlineExceeded) => {
                return Err(UploadPackError::DeadlineExceeded {
                    timeout: ctx.timeout(),
                })
            }
            Some(CancelReason::ClientAborted) => {
                return Err(UploadPackError::ClientAborted {
                    source: self.client,
                })
            }
            _ => {}
        }

        if let Some(err) = self.client {
            return Err(UploadPackError::ClientAborted { source: Some(err) });
        }
        if let Some(RpcError::Backend(status)) = self.backend {
            return Err(UploadPackError::Backend(status));
        }
        match self.transport {
            Some(err) => Err(UploadPackError::Transport(err)),
            None => Ok(()),
        }
    }
}

fn is_cancellation(err: &TransportError) -> bool {
    matches!(
        err,
        TransportError::Rpc(RpcError::Cancelled(_))
            | TransportError::Copy(CopyError::Cancelled(_))
            | TransportError::Sidechannel(SidechannelError::Cancelled(_))
    )
}

/// Drives upload-pack exchanges against a backend.
#[derive(Debug, Clone)]
pub struct UploadPackBridge<R, D> {
    rpc: R,
    dialer: D,
    deadline: DeadlineController,
}

impl<R, D> UploadPackBridge<R, D>
where
    R: UploadPackRpc,
    D: SidechannelDialer,
{
    pub fn new(rpc: R, dialer: D, deadline: DeadlineController) -> Self {
        Self {
            rpc,
            dialer,
            deadline,
        }
    }

    pub fn deadline(&self) -> &DeadlineController {
        &self.deadline
    }

    /// Run one upload-pack exchange.
    ///
    /// Response bytes are streamed into `response` as they arrive. Errors are
    /// returned even when the response was already committed, in which case
    /// the body is simply truncated.
    pub async fn handle<B, W>(
        &self,
        response: &mut HttpResponseWriter<W>,
        request: UploadPackRequest<B>,
        backend: &BackendDescriptor,
    ) -> Result<UploadPackSummary, UploadPackError>
    where
        B: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let started = Instant::now();
        let UploadPackRequest {
            mut body,
            repository,
            git_protocol,
            git_config_options,
            cancel,
        } = request;

        let ctx = self.deadline.begin(&cancel);
        let _finish = ctx.finish_on_drop();

        tracing::debug!(
            storage = %repository.storage_name,
            repository = %repository.relative_path,
            timeout_ms = ctx.timeout().as_millis() as u64,
            "Starting upload-pack"
        );

        let call = UploadPackCall {
            repository,
            git_protocol,
            git_config_options,
        };
        let mut observed = Observed::default();

        let pending = match self.rpc.start(&ctx, backend, call).await {
            Ok(pending) => pending,
            Err(err) => {
                observed.record_rpc(err);
                return self.finish(started, None, 0, 0, observed.resolve(&ctx));
            }
        };
        let sidechannel_id = pending.sidechannel_id().clone();

        let mut sidechannel = match self.dialer.open(&ctx, backend, &sidechannel_id).await {
            Ok(channel) => channel,
            Err(err) => {
                observed.record_transport(TransportError::Sidechannel(err));
                return self.finish(started, Some(&sidechannel_id), 0, 0, observed.resolve(&ctx));
            }
        };

        let (mut inbound, mut outbound, reply) = match sidechannel.split() {
            Ok((reader, writer)) => {
                let inbound = async {
                    let result = copy_inbound(&ctx, &mut body, writer).await;
                    if !result.is_ok() {
                        ctx.cancel(CancelReason::Done);
                    }
                    result
                };
                let outbound = async {
                    let result = copy_outbound(&ctx, reader, response).await;
                    if !result.is_ok() {
                        ctx.cancel(CancelReason::Done);
                    }
                    result
                };
                let reply = async {
                    let result = pending.finish(&ctx).await;
                    if result.is_err() {
                        ctx.cancel(CancelReason::Done);
                    }
                    result
                };
                tokio::join!(inbound, outbound, reply)
            }
            Err(err) => {
                observed.record_transport(TransportError::Sidechannel(err));
                return self.finish(started, Some(&sidechannel_id), 0, 0, observed.resolve(&ctx));
            }
        };

        if let Err(err) = sidechannel.close().await {
            tracing::debug!(sidechannel_id = %sidechannel_id, error = %err, "Sidechannel close failed");
        }

        observed.record_copy(&mut inbound);
        observed.record_copy(&mut outbound);
        if let Err(err) = reply {
            observed.record_rpc(err);
        }

        let outcome = observed.resolve(&ctx);
        self.finish(
            started,
            Some(&sidechannel_id),
            inbound.bytes,
            outbound.bytes,
            outcome,
        )
    }

    fn finish(
        &self,
        started: Instant,
        sidechannel_id: Option<&SidechannelId>,
        bytes_in: u64,
        bytes_out: u64,
        outcome: Result<(), UploadPackError>,
    ) -> Result<UploadPackSummary, UploadPackError> {
        let elapsed = started.elapsed();
        let kind = match &outcome {
            Ok(()) => OutcomeKind::Success,
            Err(err) => err.kind(),
        };
        metrics::record_upload_pack(kind, elapsed, bytes_in, bytes_out);

        match outcome {
            Ok(()) => {
                tracing::info!(
                    sidechannel_id = ?sidechannel_id.map(ToString::to_string),
                    bytes_in,
                    bytes_out,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Upload-pack completed"
                );
                Ok(UploadPackSummary {
                    sidechannel_id: sidechannel_id.cloned().unwrap_or_default(),
                    bytes_in,
                    bytes_out,
                    elapsed,
                })
            }
            Err(err) => {
                tracing::warn!(
                    sidechannel_id = ?sidechannel_id.map(ToString::to_string),
                    outcome = kind.as_str(),
                    bytes_in,
                    bytes_out,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "Upload-pack failed"
                );
                Err(err)
            }
        }
    }
}
