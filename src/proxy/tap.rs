//! Body wrapper that copies data frames into a capture while forwarding them

use crate::source::Capture;
use bytes::Bytes;
use http_body::{Body, Frame, SizeHint};
use parking_lot::Mutex;
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

/// Capture shared by the request and response taps of one exchange
pub type SharedCapture = Arc<Mutex<Option<Capture>>>;

pub fn share(capture: Capture) -> SharedCapture {
    Arc::new(Mutex::new(Some(capture)))
}

enum Side {
    Request,
    Response {
        completed: mpsc::Sender<Capture>,
    },
}

/// One direction of an exchange being tapped
pub struct Tap {
    capture: SharedCapture,
    side: Side,
    finished: bool,
}

impl Tap {
    pub fn request(capture: SharedCapture) -> Self {
        Self {
            capture,
            side: Side::Request,
            finished: false,
        }
    }

    /// The response tap hands the capture to `completed` once the body ends
    pub fn response(capture: SharedCapture, completed: mpsc::Sender<Capture>) -> Self {
        Self {
            capture,
            side: Side::Response { completed },
            finished: false,
        }
    }

    fn record(&self, chunk: &Bytes) {
        if let Some(capture) = self.capture.lock().as_mut() {
            match self.side {
                Side::Request => capture.push_request(chunk),
                Side::Response { .. } => capture.push_response(chunk),
            }
        }
    }

    /// End of body; the response side releases the capture for delivery
    pub fn finish(&mut self) {
        if std::mem::replace(&mut self.finished, true) {
            return;
        }
        if let Side::Response { completed } = &self.side {
            if let Some(capture) = self.capture.lock().take() {
                let id = capture.id();
                match completed.try_send(capture) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(exchange_id = %id, "Delivery queue full, capture dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        debug!(exchange_id = %id, "Delivery worker gone, capture discarded");
                    }
                }
            }
        }
    }

    /// The body failed; nothing will be delivered for this exchange
    fn abandon(&mut self) {
        self.finished = true;
        if let Some(capture) = self.capture.lock().take() {
            debug!(exchange_id = %capture.id(), "Body stream failed, capture discarded");
        }
    }
}

impl Drop for Tap {
    fn drop(&mut self) {
        if self.finished || matches!(self.side, Side::Request) {
            return;
        }
        if let Some(capture) = self.capture.lock().take() {
            debug!(
                exchange_id = %capture.id(),
                "Response body dropped before completion, capture discarded"
            );
        }
    }
}

pin_project! {
    /// Forwards every frame of `inner` unchanged, copying data frames into the tap
    pub struct TapBody<B> {
        #[pin]
        inner: B,
        tap: Option<Tap>,
    }
}

impl<B> TapBody<B>
where
    B: Body<Data = Bytes>,
{
    pub fn new(inner: B, mut tap: Tap) -> Self {
        if inner.is_end_stream() {
            tap.finish();
        }
        Self {
            inner,
            tap: Some(tap),
        }
    }
}

impl<B> Body for TapBody<B>
where
    B: Body<Data = Bytes>,
{
    type Data = Bytes;
    type Error = B::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let mut this = self.project();

        match ready!(this.inner.as_mut().poll_frame(cx)) {
            Some(Ok(frame)) => {
                if let Some(tap) = this.tap.as_mut() {
                    if let Some(data) = frame.data_ref() {
                        tap.record(data);
                    }
                    if this.inner.is_end_stream() {
                        tap.finish();
                    }
                }
                Poll::Ready(Some(Ok(frame)))
            }
            Some(Err(e)) => {
                if let Some(tap) = this.tap.as_mut() {
                    tap.abandon();
                }
                Poll::Ready(Some(Err(e)))
            }
            None => {
                if let Some(tap) = this.tap.as_mut() {
                    tap.finish();
                }
                Poll::Ready(None)
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}
