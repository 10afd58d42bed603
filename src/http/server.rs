//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the upload-pack and health handlers
//! - Wire up middleware (request ID, tracing)
//! - Bind server to listener and shut down gracefully
//! - Commit response headers on the first relayed byte; map earlier failures
//!   to status codes
//! - Apply reloaded upload-pack timeouts

use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use futures_util::Stream;
use tokio::io::DuplexStream;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio_util::io::ReaderStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::backend::{BackendDialer, BackendLocator, LocateError, RpcClient, StaticLocator};
use crate::config::ProxyConfig;
use crate::git::{HttpResponseWriter, OutcomeKind, UploadPackBridge, UploadPackError, UploadPackRequest};
use crate::http::request::{self, RequestIdExt};
use crate::resilience::DeadlineController;

const UPLOAD_PACK_RESULT: &str = "application/x-git-upload-pack-result";
const RESPONSE_BUFFER: usize = 64 * 1024;

pub type Bridge = UploadPackBridge<RpcClient, BackendDialer>;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<Bridge>,
    pub locator: Arc<dyn BackendLocator>,
}

/// HTTP front end for the upload-pack proxy.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
    deadline: DeadlineController,
}

impl HttpServer {
    /// Create a server that routes every repository to the configured backend.
    pub fn new(config: ProxyConfig) -> Self {
        let locator = Arc::new(StaticLocator::from_config(&config.backend));
        Self::with_locator(config, locator)
    }

    /// Create a server with a custom backend locator.
    pub fn with_locator(config: ProxyConfig, locator: Arc<dyn BackendLocator>) -> Self {
        let deadline = DeadlineController::new(config.timeouts.upload_pack());
        let connect_timeout = config.timeouts.connect();
        let bridge = Arc::new(UploadPackBridge::new(
            RpcClient::new(connect_timeout),
            BackendDialer::new(connect_timeout),
            deadline.clone(),
        ));

        let state = AppState { bridge, locator };
        let router = Self::build_router(state);
        Self {
            router,
            config,
            deadline,
        }
    }

    /// Build the Axum router with all middleware layers.
    fn build_router(state: AppState) -> Router {
        Router::new()
            .route("/-/health", get(health_handler))
            .route("/{*path}", post(upload_pack_handler))
            .with_state(state)
            .layer(DefaultBodyLimit::disable())
            .layer(
                ServiceBuilder::new()
                    .layer(request::set_request_id_layer())
                    .layer(TraceLayer::new_for_http())
                    .layer(request::propagate_request_id_layer()),
            )
    }

    /// Run the server until `shutdown` fires.
    ///
    /// Configuration updates received on `config_updates` change the timeout
    /// of exchanges started afterwards.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<ProxyConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            upload_pack_timeout_secs = self.deadline.timeout().as_secs(),
            "HTTP server starting"
        );

        let deadline = self.deadline.clone();
        let reload = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                deadline.set_timeout(config.timeouts.upload_pack());
            }
        });

        let result = axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;

        reload.abort();
        tracing::info!("HTTP server stopped");
        result
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Controller shared by every exchange this server runs.
    pub fn deadline(&self) -> &DeadlineController {
        &self.deadline
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

/// Proxy one `POST <repo>/git-upload-pack` to the backend.
async fn upload_pack_handler(
    State(state): State<AppState>,
    Path(path): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let request_id = headers.request_id().to_string();

    let Some(repo) = request::upload_pack_repository(&path) else {
        return (StatusCode::NOT_FOUND, "Not found").into_response();
    };
    let target = match state.locator.locate(repo) {
        Ok(target) => target,
        Err(e) => {
            tracing::warn!(request_id = %request_id, repository = %repo, error = %e, "Backend lookup failed");
            return locate_error_response(&e);
        }
    };

    let cancel = CancellationToken::new();
    // Lives in the handler until headers are committed, then in the response
    // body. Either one is dropped when the client goes away.
    let abort_on_drop = cancel.clone().drop_guard();

    let upload_pack = UploadPackRequest {
        body: request::body_reader(body),
        repository: target.repository,
        git_protocol: headers.git_protocol(),
        git_config_options: target.git_config_options,
        cancel,
    };

    let (sink, source) = tokio::io::duplex(RESPONSE_BUFFER);
    let mut writer = HttpResponseWriter::new(sink);
    let mut headers_sent = writer.subscribe();
    let backend = target.backend;
    let bridge = state.bridge.clone();
    let span_request_id = request_id.clone();

    let mut exchange = tokio::spawn(async move {
        let result = bridge.handle(&mut writer, upload_pack, &backend).await;
        if let Err(e) = &result {
            if writer.headers_sent() {
                tracing::warn!(
                    request_id = %span_request_id,
                    error = %e,
                    "Upload-pack failed after headers were sent; response truncated"
                );
            }
        }
        result.map(|_| ())
    });

    let committed = async { headers_sent.wait_for(|sent| *sent).await.is_ok() };

    let outcome = tokio::select! {
        biased;
        true = committed => None,
        joined = &mut exchange => Some(joined),
    };

    match outcome {
        None | Some(Ok(Ok(()))) => streaming_response(source, abort_on_drop),
        Some(Ok(Err(e))) => {
            tracing::debug!(request_id = %request_id, error = %e, "Upload-pack failed before headers");
            error_response(&e)
        }
        Some(Err(join_error)) => {
            tracing::error!(request_id = %request_id, error = %join_error, "Upload-pack task failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
        }
    }
}

/// Streamed response body that cancels the exchange when dropped early.
struct ExchangeBody {
    inner: ReaderStream<DuplexStream>,
    _abort_on_drop: DropGuard,
}

impl Stream for ExchangeBody {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

fn streaming_response(source: DuplexStream, abort_on_drop: DropGuard) -> Response {
    let body = ExchangeBody {
        inner: ReaderStream::new(source),
        _abort_on_drop: abort_on_drop,
    };
    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(UPLOAD_PACK_RESULT));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

/// Status for a failure that happened before any byte was relayed.
pub fn status_for(err: &UploadPackError) -> StatusCode {
    match err.kind() {
        OutcomeKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        OutcomeKind::BackendError | OutcomeKind::TransportError => StatusCode::BAD_GATEWAY,
        OutcomeKind::ClientAborted => {
            StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
        }
        OutcomeKind::Success => StatusCode::OK,
    }
}

fn error_response(err: &UploadPackError) -> Response {
    let message = match err.kind() {
        OutcomeKind::DeadlineExceeded => "Upload-pack timed out",
        OutcomeKind::ClientAborted => "Client closed request",
        _ => "Upload-pack failed",
    };
    (status_for(err), message).into_response()
}

fn locate_error_response(err: &LocateError) -> Response {
    match err {
        LocateError::InvalidPath(_) => (StatusCode::NOT_FOUND, "Repository not found").into_response(),
    }
}
