//! Upload-pack bridge tests against a backend speaking the real wire contract.

use std::time::{Duration, Instant};

use git_upload_proxy::backend::wire::CallReply;
use git_upload_proxy::backend::{BackendDialer, Repository, RpcClient};
use git_upload_proxy::git::{HttpResponseWriter, OutcomeKind, UploadPackRequest};
use git_upload_proxy::{DeadlineController, UploadPackBridge};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

mod common;
use common::{MockBackend, WaitReader};

fn bridge(timeout: Duration) -> UploadPackBridge<RpcClient, BackendDialer> {
    let connect_timeout = Duration::from_secs(5);
    UploadPackBridge::new(
        RpcClient::new(connect_timeout),
        BackendDialer::new(connect_timeout),
        DeadlineController::new(timeout),
    )
}

fn repository() -> Repository {
    Repository {
        storage_name: "default".into(),
        relative_path: "group/project.git".into(),
    }
}

#[tokio::test]
async fn test_stalled_request_hits_deadline() {
    let backend = MockBackend::stalled(Duration::from_secs(30)).await;
    let bridge = bridge(Duration::from_millis(50));
    let mut response = HttpResponseWriter::new(Vec::new());
    let request = UploadPackRequest::new(WaitReader::new(Duration::from_secs(10)), repository());

    let started = Instant::now();
    let err = bridge
        .handle(&mut response, request, &backend.descriptor)
        .await
        .unwrap_err();

    assert!(err.is_deadline_exceeded(), "unexpected error: {err}");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(!response.headers_sent());
}

#[tokio::test]
async fn test_echo_relays_bytes() {
    let backend = MockBackend::echo().await;
    let bridge = bridge(Duration::from_secs(5));
    let mut response = HttpResponseWriter::new(Vec::new());
    let body: &[u8] = b"0032want 0a53e9ddeaddad63ad106860237bbf53411d11a7\n00000009done\n";
    let request = UploadPackRequest::new(body, repository());

    let summary = bridge
        .handle(&mut response, request, &backend.descriptor)
        .await
        .unwrap();

    assert_eq!(response.get_ref().as_slice(), body);
    assert_eq!(summary.bytes_in, body.len() as u64);
    assert_eq!(summary.bytes_out, body.len() as u64);
    assert!(response.headers_sent());
    assert_eq!(backend.sidechannels(), vec![summary.sidechannel_id.clone()]);
}

#[tokio::test]
async fn test_backend_error_is_reported() {
    let backend = MockBackend::failing("not_found", "repository not found").await;
    let bridge = bridge(Duration::from_secs(5));
    let mut response = HttpResponseWriter::new(Vec::new());
    let request = UploadPackRequest::new(&b"0000"[..], repository());

    let err = bridge
        .handle(&mut response, request, &backend.descriptor)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), OutcomeKind::BackendError);
    assert!(err.to_string().contains("repository not found"));
}

#[tokio::test]
async fn test_call_carries_request_metadata() {
    let backend = MockBackend::echo().await;
    let bridge = bridge(Duration::from_secs(5));
    let mut response = HttpResponseWriter::new(Vec::new());
    let mut request = UploadPackRequest::new(&b"0000"[..], repository());
    request.git_protocol = Some("version=2".into());
    request.git_config_options = vec!["uploadpack.allowFilter=true".into()];

    let summary = bridge
        .handle(&mut response, request, &backend.descriptor.clone().with_token("secret"))
        .await
        .unwrap();

    let calls = backend.calls();
    assert_eq!(calls.len(), 1);
    let call = &calls[0];
    assert_eq!(call.repository, repository());
    assert_eq!(call.git_protocol.as_deref(), Some("version=2"));
    assert_eq!(call.git_config_options, vec!["uploadpack.allowFilter=true".to_string()]);
    assert_eq!(call.authorization.as_deref(), Some("secret"));
    assert_eq!(call.sidechannel_id, summary.sidechannel_id);
}

#[tokio::test]
async fn test_backend_streams_before_request_finishes() {
    // Responds with the advertisement before reading anything.
    let backend = MockBackend::start(|_request, mut stream| async move {
        let _ = stream.write_all(b"0008NAK\n").await;
        let mut rest = Vec::new();
        let _ = stream.read_to_end(&mut rest).await;
        let _ = stream.shutdown().await;
        CallReply::Ok
    })
    .await;
    let bridge = bridge(Duration::from_secs(5));
    let mut response = HttpResponseWriter::new(Vec::new());
    let request = UploadPackRequest::new(&b"0009done\n"[..], repository());

    bridge
        .handle(&mut response, request, &backend.descriptor)
        .await
        .unwrap();

    assert_eq!(response.get_ref().as_slice(), b"0008NAK\n");
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_error() {
    let bridge = bridge(Duration::from_secs(5));
    let mut response = HttpResponseWriter::new(Vec::new());
    let request = UploadPackRequest::new(&b"0000"[..], repository());
    let backend = git_upload_proxy::backend::BackendDescriptor::new("tcp://127.0.0.1:1");

    let err = bridge
        .handle(&mut response, request, &backend)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), OutcomeKind::TransportError);
}

#[tokio::test]
async fn test_failure_after_first_byte_truncates_response() {
    let backend = MockBackend::failing_after(b"0008NAK\n", "internal", "pack-objects died").await;
    let bridge = bridge(Duration::from_secs(5));
    let mut response = HttpResponseWriter::new(Vec::new());
    let request = UploadPackRequest::new(&b"0009done\n"[..], repository());

    let err = bridge
        .handle(&mut response, request, &backend.descriptor)
        .await
        .unwrap_err();

    assert!(response.headers_sent());
    assert_eq!(err.kind(), OutcomeKind::BackendError);
    assert_eq!(response.get_ref().as_slice(), b"0008NAK\n");
    assert_eq!(response.bytes_written(), 8);
}
