//! Shared utilities for integration testing.
//!
//! `MockBackend` speaks the backend wire contract over TCP: it accepts call
//! and sidechannel connections in either order, pairs them by sidechannel ID
//! and hands the sidechannel stream to a programmable handler whose result
//! becomes the call's reply.

#![allow(dead_code)]

use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use git_upload_proxy::backend::wire::{read_frame, write_frame, CallReply, CallRequest, Hello};
use git_upload_proxy::backend::{BackendDescriptor, SidechannelId};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};

#[derive(Default)]
struct Pairing {
    tx: Option<oneshot::Sender<TcpStream>>,
    rx: Option<oneshot::Receiver<TcpStream>>,
}

type Registry = Arc<Mutex<HashMap<SidechannelId, Pairing>>>;

/// Take (or create) the pairing slot for `id` and apply `f` to it.
fn with_pairing<T>(registry: &Registry, id: &SidechannelId, f: impl FnOnce(&mut Pairing) -> T) -> T {
    let mut map = registry.lock().unwrap();
    let slot = map.entry(id.clone()).or_insert_with(|| {
        let (tx, rx) = oneshot::channel();
        Pairing {
            tx: Some(tx),
            rx: Some(rx),
        }
    });
    let out = f(slot);
    if slot.tx.is_none() && slot.rx.is_none() {
        map.remove(id);
    }
    out
}

/// Programmable backend listening on a loopback port.
pub struct MockBackend {
    pub descriptor: BackendDescriptor,
    calls: Arc<Mutex<Vec<CallRequest>>>,
    sidechannels: Arc<Mutex<Vec<SidechannelId>>>,
    hung_up: Arc<Notify>,
}

impl MockBackend {
    /// Start a backend; `handler` runs once per call with its sidechannel.
    pub async fn start<F, Fut>(handler: F) -> Self
    where
        F: Fn(CallRequest, TcpStream) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CallReply> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(handler);
        let registry: Registry = Arc::default();
        let calls: Arc<Mutex<Vec<CallRequest>>> = Arc::default();
        let sidechannels: Arc<Mutex<Vec<SidechannelId>>> = Arc::default();
        let hung_up = Arc::new(Notify::new());

        let (calls_log, sidechannels_log) = (calls.clone(), sidechannels.clone());
        let hung_up_signal = hung_up.clone();
        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let handler = handler.clone();
                let registry = registry.clone();
                let calls = calls_log.clone();
                let sidechannels = sidechannels_log.clone();
                let hung_up = hung_up_signal.clone();

                tokio::spawn(async move {
                    let Ok(hello) = read_frame::<_, Hello>(&mut socket).await else {
                        return;
                    };
                    match hello {
                        Hello::Call(request) => {
                            calls.lock().unwrap().push(request.clone());
                            let rx = with_pairing(&registry, &request.sidechannel_id, |p| p.rx.take());
                            let Some(rx) = rx else { return };
                            let Ok(stream) = rx.await else { return };

                            // The proxy sends nothing after the hello, so a
                            // readable call socket means it hung up.
                            let mut hangup = [0u8; 1];
                            let reply = tokio::select! {
                                reply = handler(request, stream) => Some(reply),
                                _ = socket.read(&mut hangup) => None,
                            };
                            match reply {
                                Some(reply) => {
                                    let _ = write_frame(&mut socket, &reply).await;
                                }
                                None => hung_up.notify_one(),
                            }
                        }
                        Hello::Sidechannel { sidechannel_id } => {
                            sidechannels.lock().unwrap().push(sidechannel_id.clone());
                            let tx = with_pairing(&registry, &sidechannel_id, |p| p.tx.take());
                            if let Some(tx) = tx {
                                let _ = tx.send(socket);
                            }
                        }
                    }
                });
            }
        });

        Self {
            descriptor: BackendDescriptor::new(format!("tcp://{addr}")),
            calls,
            sidechannels,
            hung_up,
        }
    }

    /// Backend that reads the whole request and writes it back.
    pub async fn echo() -> Self {
        Self::start(|_request, mut stream| async move {
            let mut request = Vec::new();
            if stream.read_to_end(&mut request).await.is_err() {
                return CallReply::Error {
                    code: "aborted".into(),
                    message: "sidechannel read failed".into(),
                };
            }
            let _ = stream.write_all(&request).await;
            let _ = stream.shutdown().await;
            CallReply::Ok
        })
        .await
    }

    /// Backend that holds the sidechannel without answering for `wait`.
    pub async fn stalled(wait: Duration) -> Self {
        Self::start(move |_request, stream| async move {
            tokio::time::sleep(wait).await;
            drop(stream);
            CallReply::Ok
        })
        .await
    }

    /// Backend that answers with `prefix`, drains the request and then
    /// reports `code`.
    pub async fn failing_after(prefix: &'static [u8], code: &'static str, message: &'static str) -> Self {
        Self::start(move |_request, mut stream| async move {
            let _ = stream.write_all(prefix).await;
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
            let _ = stream.shutdown().await;
            CallReply::Error {
                code: code.into(),
                message: message.into(),
            }
        })
        .await
    }

    /// Backend that drains the request and then reports `code`.
    pub async fn failing(code: &'static str, message: &'static str) -> Self {
        Self::start(move |_request, mut stream| async move {
            let mut sink = Vec::new();
            let _ = stream.read_to_end(&mut sink).await;
            let _ = stream.shutdown().await;
            CallReply::Error {
                code: code.into(),
                message: message.into(),
            }
        })
        .await
    }

    pub fn calls(&self) -> Vec<CallRequest> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sidechannels(&self) -> Vec<SidechannelId> {
        self.sidechannels.lock().unwrap().clone()
    }

    /// Resolves once the proxy drops a call before the backend replied.
    pub async fn call_abandoned(&self) {
        self.hung_up.notified().await;
    }
}

/// Request body that sleeps before reporting EOF.
pub struct WaitReader {
    sleep: Pin<Box<tokio::time::Sleep>>,
}

impl WaitReader {
    pub fn new(wait: Duration) -> Self {
        Self {
            sleep: Box::pin(tokio::time::sleep(wait)),
        }
    }
}

impl AsyncRead for WaitReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.sleep.as_mut().poll(cx).map(Ok)
    }
}
