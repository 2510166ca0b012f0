//! Deadline wrapper for relayed oracle bodies.
//!
//! The oracle's response-wait ceiling covers the whole exchange. Headers are
//! bounded in [`crate::oracle`]; this wrapper bounds the body that follows
//! with whatever budget is left.

use bytes::Bytes;
use http_body::{Body, Frame};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::time::{Instant, Sleep, sleep_until};

use crate::BoxError;

/// Body wrapper that fails the stream once `deadline` passes.
pub struct TimeoutBody<B> {
    inner: B,
    deadline: Pin<Box<Sleep>>,
    expired: bool,
}

impl<B> TimeoutBody<B> {
    /// Wrap `inner` so it must finish before `deadline`.
    pub fn new(inner: B, deadline: Instant) -> Self {
        Self {
            inner,
            deadline: Box::pin(sleep_until(deadline)),
            expired: false,
        }
    }

    /// Instant after which the stream errors.
    pub fn deadline(&self) -> Instant {
        self.deadline.deadline()
    }
}

impl<B> Body for TimeoutBody<B>
where
    B: Body<Data = Bytes> + Unpin,
    B::Error: Into<BoxError>,
{
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = &mut *self;

        if this.expired {
            return Poll::Ready(None);
        }

        // Data already buffered wins over an expired deadline
        match Pin::new(&mut this.inner).poll_frame(cx) {
            Poll::Ready(result) => Poll::Ready(result.map(|r| r.map_err(Into::into))),
            Poll::Pending => {
                if this.deadline.as_mut().poll(cx).is_ready() {
                    this.expired = true;
                    Poll::Ready(Some(Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "oracle response body exceeded deadline",
                    )
                    .into())))
                } else {
                    Poll::Pending
                }
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.expired || self.inner.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.inner.size_hint()
    }
}
