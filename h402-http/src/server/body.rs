//! Response body released after an asynchronous settlement.
//!
//! The head only goes out once settlement has succeeded, so a failure found
//! here can no longer become a 402. What is left is the upstream stream
//! failing after bytes were flushed: that is logged, and the body ends with an
//! error so the server aborts the connection instead of finishing a truncated
//! response as if it were complete.

use std::pin::Pin;
use std::task::{Context, Poll, ready};

use axum_core::body::Body;
use bytes::Bytes;
use http_body::{Body as _, Frame, SizeHint};

/// Boxed error produced by [`GuardedBody`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The upstream body failed after the response head was sent.
#[derive(Debug, thiserror::Error)]
#[error("response stream aborted after settlement: {0}")]
pub struct StreamAborted(#[source] pub BoxError);

/// Forwards a settled response's body and aborts on the first upstream error.
pub struct GuardedBody {
    inner: Body,
    failed: bool,
}

impl GuardedBody {
    /// Wraps the body of a response whose payment is settled.
    #[must_use]
    pub const fn new(inner: Body) -> Self {
        Self {
            inner,
            failed: false,
        }
    }
}

impl std::fmt::Debug for GuardedBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedBody")
            .field("failed", &self.failed)
            .finish_non_exhaustive()
    }
}

impl http_body::Body for GuardedBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }
        match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
            Some(Err(err)) => {
                this.failed = true;
                #[cfg(feature = "telemetry")]
                tracing::error!(error = %err, "Response stream failed after settlement, aborting");
                Poll::Ready(Some(Err(StreamAborted(err.into_inner()).into())))
            }
            next => Poll::Ready(next.map(|result| result.map_err(Into::into))),
        }
    }

    fn is_end_stream(&self) -> bool {
        self.failed || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}


#[cfg(test)]
mod tests {
    use std::io;

    use http_body::Body as _;

    use super::testing::next_frame;
    use super::*;

    /// Yields one chunk, then fails.
    struct BreaksMidway {
        sent: bool,
    }

    impl http_body::Body for BreaksMidway {
        type Data = Bytes;
        type Error = io::Error;

        fn poll_frame(
            mut self: Pin<&mut Self>,
            _: &mut Context<'_>,
        ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
            if self.sent {
                return Poll::Ready(Some(Err(io::Error::other("upstream reset"))));
            }
            self.sent = true;
            Poll::Ready(Some(Ok(Frame::data(Bytes::from_static(b"first chunk")))))
        }
    }

    #[tokio::test]
    async fn forwards_a_healthy_body() {
        let mut body = GuardedBody::new(Body::from("paid content"));
        assert_eq!(body.size_hint().exact(), Some(12));
        let data = next_frame(&mut body).await.unwrap().unwrap();
        assert_eq!(data.into_data().unwrap(), Bytes::from_static(b"paid content"));
        assert!(next_frame(&mut body).await.is_none());
        assert!(body.is_end_stream());
    }

    #[tokio::test]
    async fn upstream_failure_after_flush_aborts() {
        let mut body = GuardedBody::new(Body::new(BreaksMidway { sent: false }));
        let data = next_frame(&mut body).await.unwrap().unwrap();
        assert_eq!(data.into_data().unwrap(), Bytes::from_static(b"first chunk"));

        let err = next_frame(&mut body).await.unwrap().unwrap_err();
        assert!(err.is::<StreamAborted>());
        assert!(err.to_string().starts_with("response stream aborted"));
        assert!(next_frame(&mut body).await.is_none());
        assert!(body.is_end_stream());
    }
}
