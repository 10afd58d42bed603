//! Upload-pack outcome taxonomy.

use std::time::Duration;

use thiserror::Error;

use crate::backend::{BackendStatus, RpcError, SidechannelError};
use crate::git::copy::CopyError;

/// Classification of a finished exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeKind {
    Success,
    DeadlineExceeded,
    ClientAborted,
    BackendError,
    TransportError,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Success => "success",
            OutcomeKind::DeadlineExceeded => "deadline_exceeded",
            OutcomeKind::ClientAborted => "client_aborted",
            OutcomeKind::BackendError => "backend_error",
            OutcomeKind::TransportError => "transport_error",
        }
    }
}

/// Lower-level failure on the RPC connection or the sidechannel.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Sidechannel(#[from] SidechannelError),

    #[error(transparent)]
    Copy(#[from] CopyError),
}

/// Why an upload-pack exchange failed.
#[derive(Debug, Error)]
pub enum UploadPackError {
    /// The exchange ran past its configured timeout.
    #[error("upload-pack deadline of {timeout:?} exceeded")]
    DeadlineExceeded { timeout: Duration },

    /// The client went away or its request body failed.
    #[error("client aborted upload-pack")]
    ClientAborted {
        #[source]
        source: Option<CopyError>,
    },

    /// The backend explicitly reported failure.
    #[error("backend rejected upload-pack: {0}")]
    Backend(BackendStatus),

    #[error("upload-pack transport failure: {0}")]
    Transport(TransportError),
}

impl UploadPackError {
    pub fn kind(&self) -> OutcomeKind {
        match self {
            UploadPackError::DeadlineExceeded { .. } => OutcomeKind::DeadlineExceeded,
            UploadPackError::ClientAborted { .. } => OutcomeKind::ClientAborted,
            UploadPackError::Backend(_) => OutcomeKind::BackendError,
            UploadPackError::Transport(_) => OutcomeKind::TransportError,
        }
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, UploadPackError::DeadlineExceeded { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_messages() {
        let err = UploadPackError::DeadlineExceeded {
            timeout: Duration::from_millis(1),
        };
        assert!(err.is_deadline_exceeded());
        assert_eq!(err.kind().as_str(), "deadline_exceeded");

        let err = UploadPackError::Backend(BackendStatus {
            code: "not_found".into(),
            message: "repository not found".into(),
        });
        assert!(!err.is_deadline_exceeded());
        assert_eq!(err.kind(), OutcomeKind::BackendError);
        assert_eq!(
            err.to_string(),
            "backend rejected upload-pack: not_found: repository not found"
        );
    }

    /// Renders the error the way chain-walking reporters do.
    fn render_chain(err: &dyn std::error::Error) -> String {
        let mut out = err.to_string();
        let mut next = err.source();
        while let Some(cause) = next {
            out.push_str(": ");
            out.push_str(&cause.to_string());
            next = cause.source();
        }
        out
    }

    #[test]
    fn chain_reports_inner_message_once() {
        let err = UploadPackError::Backend(BackendStatus {
            code: "internal".into(),
            message: "pack-objects died".into(),
        });
        assert_eq!(render_chain(&err).matches("pack-objects died").count(), 1);

        let err = UploadPackError::Transport(TransportError::Sidechannel(SidechannelError::Closed));
        assert_eq!(render_chain(&err).matches("sidechannel is closed").count(), 1);

        let err = UploadPackError::Transport(TransportError::Copy(CopyError::ClientWrite(
            std::io::Error::new(std::io::ErrorKind::BrokenPipe, "peer went away"),
        )));
        assert_eq!(render_chain(&err).matches("peer went away").count(), 1);
    }
}
