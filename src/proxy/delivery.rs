//! Delivery worker that settles completed captures in arrival order

use crate::source::{Capture, ExchangeSource};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Single consumer of completed captures.
///
/// Running every delivery on one task keeps records in completion order and
/// delivery to any one subscriber sequential.
pub struct DeliveryWorker {
    source: Arc<ExchangeSource>,
    captures: mpsc::Receiver<Capture>,
    shutdown_rx: mpsc::Receiver<()>,
}

impl DeliveryWorker {
    /// Returns the worker, the sender taps release captures into, and a shutdown handle.
    ///
    /// At most `queue` completed captures wait for delivery at once.
    pub fn new(
        source: Arc<ExchangeSource>,
        queue: usize,
    ) -> (Self, mpsc::Sender<Capture>, mpsc::Sender<()>) {
        let (captures_tx, captures) = mpsc::channel(queue.max(1));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let worker = Self {
            source,
            captures,
            shutdown_rx,
        };

        (worker, captures_tx, shutdown_tx)
    }

    pub async fn run(mut self) {
        info!("Delivery worker started");

        loop {
            tokio::select! {
                biased;

                capture = self.captures.recv() => match capture {
                    Some(capture) => self.source.settle(capture),
                    None => {
                        debug!("All capture senders dropped");
                        break;
                    }
                },
                _ = self.shutdown_rx.recv() => {
                    info!("Delivery worker shutting down");
                    self.drain();
                    break;
                }
            }
        }

        info!("Delivery worker stopped");
    }

    fn drain(&mut self) {
        let mut drained = 0usize;
        while let Ok(capture) = self.captures.try_recv() {
            self.source.settle(capture);
            drained += 1;
        }
        if drained > 0 {
            debug!(drained, "Settled pending captures before stopping");
        }
    }
}
