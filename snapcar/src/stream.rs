use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use pin_project_lite::pin_project;
use snapcar_db::Artifact;
use tokio::fs::File;
use tokio_util::io::ReaderStream;

use crate::error::StreamError;
use crate::prometheus::{SidecarMetrics, Sink};

pin_project! {
    /// Byte stream over a snapshot artifact that owns the artifact.
    ///
    /// Dropping the stream records the outcome, closes the file and then
    /// removes the artifact. actix drops the body once it is fully sent or as
    /// soon as writing to the client fails, so an aborted download stops
    /// reading promptly.
    pub(crate) struct ArtifactStream {
        #[pin]
        inner: ReaderStream<File>,
        len: u64,
        sent: u64,
        artifact: Artifact,
        metrics: Arc<SidecarMetrics>,
    }

    impl PinnedDrop for ArtifactStream {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if *this.sent >= *this.len {
                this.metrics.record_success(Sink::Stream, *this.sent);
            } else {
                log::warn!(
                    "download of {} ended after {} of {} bytes",
                    this.artifact.file_name(),
                    this.sent,
                    this.len
                );
                this.metrics.record_failure(Sink::Stream);
            }
        }
    }
}

impl ArtifactStream {
    /// Open the artifact for streaming. Fails before any header is sent.
    pub(crate) async fn open(
        artifact: Artifact,
        metrics: Arc<SidecarMetrics>,
    ) -> Result<Self, StreamError> {
        let open_err = |e| StreamError::Open {
            path: artifact.path().display().to_string(),
            source: e,
        };
        let file = File::open(artifact.path()).await.map_err(open_err)?;
        let len = file.metadata().await.map_err(open_err)?.len();

        Ok(Self {
            inner: ReaderStream::new(file),
            len,
            sent: 0,
            artifact,
            metrics,
        })
    }

    pub(crate) fn len(&self) -> u64 {
        self.len
    }

    pub(crate) fn file_name(&self) -> String {
        self.artifact.file_name()
    }
}

impl Stream for ArtifactStream {
    type Item = std::io::Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match this.inner.poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                *this.sent += chunk.len() as u64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(e))) => {
                log::error!("failed reading {}: {e}", this.artifact.file_name());
                Poll::Ready(Some(Err(e)))
            }
            other => other,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
