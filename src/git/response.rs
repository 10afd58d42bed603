//! HTTP response adapter.
//!
//! Wraps the response sink and records whether anything was written. Once
//! the first write happens the status line is committed, so later failures
//! can only truncate the body.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

/// Response sink that knows whether headers went out.
#[derive(Debug)]
pub struct HttpResponseWriter<W> {
    inner: W,
    headers_sent: watch::Sender<bool>,
    bytes_written: u64,
}

impl<W: AsyncWrite + Unpin> HttpResponseWriter<W> {
    pub fn new(inner: W) -> Self {
        let (headers_sent, _) = watch::channel(false);
        Self {
            inner,
            headers_sent,
            bytes_written: 0,
        }
    }

    /// True once the first write was attempted.
    pub fn headers_sent(&self) -> bool {
        *self.headers_sent.borrow()
    }

    /// Watch for the moment headers become committed.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.headers_sent.subscribe()
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub async fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.commit_headers();
        let n = self.inner.write(buf).await?;
        self.bytes_written += n as u64;
        Ok(n)
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.commit_headers();
        self.inner.write_all(buf).await?;
        self.bytes_written += buf.len() as u64;
        Ok(())
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn commit_headers(&self) {
        self.headers_sent.send_if_modified(|sent| !std::mem::replace(sent, true));
    }
}
