//! Upload body that holds the file to the length declared in the request.
//!
//! The digest and `Content-Length` are fixed before the transfer starts; a
//! file that grows or shrinks while it streams would be stored under a digest
//! that no longer describes it, so the body fails instead of ending early.

use crate::fs::checksum::CHUNK_SIZE;
use bytes::Bytes;
use futures_util::Stream;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::fs::File;
use tokio::time::{Duration, Instant};
use tokio_util::io::ReaderStream;
use tracing::debug;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);

pub struct UploadBody<S> {
    inner: S,
    key: String,
    expected: u64,
    sent: u64,
    last_report: Instant,
    report_interval: Duration,
    done: bool,
}

impl UploadBody<ReaderStream<File>> {
    /// Stream `file` in checksum-sized chunks.
    pub fn from_file(file: File, key: impl Into<String>, expected: u64) -> Self {
        Self::new(ReaderStream::with_capacity(file, CHUNK_SIZE), key, expected)
    }
}

impl<S> UploadBody<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    pub fn new(inner: S, key: impl Into<String>, expected: u64) -> Self {
        Self {
            inner,
            key: key.into(),
            expected,
            sent: 0,
            last_report: Instant::now(),
            report_interval: REPORT_INTERVAL,
            done: false,
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.sent
    }

    fn length_error(&self, how: &str) -> io::Error {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "{} {} during upload: declared {} bytes, read {}",
                self.key, how, self.expected, self.sent
            ),
        )
    }
}

impl<S> Stream for UploadBody<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                self.sent += chunk.len() as u64;
                if self.sent > self.expected {
                    self.done = true;
                    return Poll::Ready(Some(Err(self.length_error("grew"))));
                }

                if self.last_report.elapsed() >= self.report_interval {
                    debug!(key = %self.key, sent = self.sent, expected = self.expected, "upload progress");
                    self.last_report = Instant::now();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                self.done = true;
                Poll::Ready(Some(Err(e)))
            }
            Poll::Ready(None) => {
                self.done = true;
                if self.sent != self.expected {
                    return Poll::Ready(Some(Err(self.length_error("shrank"))));
                }
                debug!(key = %self.key, sent = self.sent, "upload body complete");
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
