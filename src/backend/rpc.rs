//! Upload-pack RPC with sidechannel correlation.
//!
//! # Responsibilities
//! - Start the `PostUploadPackWithSidechannel` call and hand back its
//!   correlation token straight away
//! - Keep the call pending until the backend finishes the sidechannel work
//! - Separate backend-reported failures from transport failures
//!
//! # Design Decisions
//! - Starting and finishing a call are two steps so the caller can open the
//!   sidechannel in between
//! - Dropping a `PendingCall` closes its connection, which the backend sees as
//!   a cancelled call

use std::fmt;
use std::future::Future;
use std::time::Duration;

use futures_util::future::BoxFuture;
use thiserror::Error;

use crate::backend::connect::{connect, ConnectError};
use crate::backend::descriptor::BackendDescriptor;
use crate::backend::wire::{
    read_frame, write_frame, CallReply, CallRequest, Hello, Repository, SidechannelId, WireError,
    UPLOAD_PACK_WITH_SIDECHANNEL,
};
use crate::resilience::{CancelReason, ExchangeContext};

/// Failure reported by the backend itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct BackendStatus {
    pub code: String,
    pub message: String,
}

/// Errors from an upload-pack RPC.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The backend answered with an explicit error.
    #[error("backend error: {0}")]
    Backend(BackendStatus),

    #[error("rpc cancelled: {0}")]
    Cancelled(CancelReason),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error("rpc wire error: {0}")]
    Wire(#[from] WireError),
}

/// Parameters of one upload-pack call.
#[derive(Debug, Clone, Default)]
pub struct UploadPackCall {
    pub repository: Repository,
    pub git_protocol: Option<String>,
    pub git_config_options: Vec<String>,
}

/// A started call waiting for its final reply.
pub struct PendingCall {
    sidechannel_id: SidechannelId,
    reply: BoxFuture<'static, Result<(), RpcError>>,
}

impl PendingCall {
    pub fn new<F>(sidechannel_id: SidechannelId, reply: F) -> Self
    where
        F: Future<Output = Result<(), RpcError>> + Send + 'static,
    {
        Self {
            sidechannel_id,
            reply: Box::pin(reply),
        }
    }

    /// Token the sidechannel must present to be matched with this call.
    pub fn sidechannel_id(&self) -> &SidechannelId {
        &self.sidechannel_id
    }

    /// Wait for the backend's reply or the context's cancellation.
    pub async fn finish(self, ctx: &ExchangeContext) -> Result<(), RpcError> {
        ctx.run(self.reply).await.map_err(RpcError::Cancelled)?
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("sidechannel_id", &self.sidechannel_id)
            .finish_non_exhaustive()
    }
}

/// Capability to issue the upload-pack call.
pub trait UploadPackRpc: Send + Sync {
    fn start(
        &self,
        ctx: &ExchangeContext,
        backend: &BackendDescriptor,
        call: UploadPackCall,
    ) -> impl Future<Output = Result<PendingCall, RpcError>> + Send;
}

/// RPC client speaking the backend wire contract.
#[derive(Debug, Clone)]
pub struct RpcClient {
    connect_timeout: Duration,
}

impl RpcClient {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl UploadPackRpc for RpcClient {
    async fn start(
        &self,
        ctx: &ExchangeContext,
        backend: &BackendDescriptor,
        call: UploadPackCall,
    ) -> Result<PendingCall, RpcError> {
        let mut conn = connect(ctx, backend, self.connect_timeout).await?;

        let sidechannel_id = SidechannelId::new();
        let hello = Hello::Call(CallRequest {
            method: UPLOAD_PACK_WITH_SIDECHANNEL.to_string(),
            authorization: backend.token.clone(),
            repository: call.repository,
            git_protocol: call.git_protocol,
            git_config_options: call.git_config_options,
            sidechannel_id: sidechannel_id.clone(),
        });

        ctx.run(write_frame(&mut conn, &hello))
            .await
            .map_err(RpcError::Cancelled)??;

        tracing::debug!(sidechannel_id = %sidechannel_id, "Upload-pack call started");

        Ok(PendingCall::new(sidechannel_id, async move {
            match read_frame::<_, CallReply>(&mut conn).await? {
                CallReply::Ok => Ok(()),
                CallReply::Error { code, message } => {
                    Err(RpcError::Backend(BackendStatus { code, message }))
                }
            }
        }))
    }
}
