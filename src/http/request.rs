//! Request handling helpers.
//!
//! # Responsibilities
//! - Attach a request ID (UUID v4) as early as possible and echo it back
//! - Extract the upload-pack inputs (repository path, Git-Protocol, body)
//!
//! # Design Decisions
//! - Request ID added before tracing so spans carry it
//! - The body is adapted to `AsyncRead` and consumed exactly once

use std::io;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName};
use futures_util::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

pub const X_REQUEST_ID: &str = "x-request-id";
pub const GIT_PROTOCOL: &str = "git-protocol";
const UPLOAD_PACK_SUFFIX: &str = "/git-upload-pack";

/// Layer that assigns a request ID to requests missing one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuid)
}

/// Layer that copies the request ID onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// Convenience accessors on request headers.
pub trait RequestIdExt {
    fn request_id(&self) -> &str;
    fn git_protocol(&self) -> Option<String>;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> &str {
        self.get(X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown")
    }

    fn git_protocol(&self) -> Option<String> {
        self.get(GIT_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

/// Repository path of an upload-pack request, e.g. `group/project.git`.
pub fn upload_pack_repository(path: &str) -> Option<&str> {
    path.strip_suffix(UPLOAD_PACK_SUFFIX)
        .map(|repo| repo.trim_start_matches('/'))
        .filter(|repo| !repo.is_empty())
}

/// Adapt an HTTP body into a byte reader.
pub fn body_reader(body: Body) -> impl AsyncRead + Unpin + Send {
    StreamReader::new(body.into_data_stream().map_err(io::Error::other))
}
