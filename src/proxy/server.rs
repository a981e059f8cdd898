//! Proxy server lifecycle
//!
//! ```rust,ignore
//! let server = ProxyServer::new(ProxyConfig::with_target(target));
//! let recent = server
//!     .source()
//!     .request_filter(|head| head.path().starts_with("/kcsapi/"))
//!     .to_store(StoreOptions::default());
//! let server = server.listen("127.0.0.1:8080".parse()?).await?;
//! // ...
//! server.shutdown().await?;
//! ```

use crate::proxy::delivery::DeliveryWorker;
use crate::proxy::forward::Forwarder;
use crate::proxy::types::*;
use crate::source::{Capture, ExchangeSource};
use axum::{
    body::Body,
    extract::{Request, State},
    response::Response,
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

struct Listening {
    local_addr: SocketAddr,
    shutdown_tx: oneshot::Sender<()>,
    task: JoinHandle<std::io::Result<()>>,
}

struct Worker {
    captures_tx: mpsc::Sender<Capture>,
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

/// HTTP proxy feeding an [`ExchangeSource`]
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    source: Arc<ExchangeSource>,
    listening: Option<Listening>,
    worker: Option<Worker>,
}

impl ProxyServer {
    pub fn new(config: ProxyConfig) -> Self {
        Self {
            config: Arc::new(config),
            source: ExchangeSource::new(),
            listening: None,
            worker: None,
        }
    }

    /// Root of every pipeline built on this server's traffic
    pub fn source(&self) -> Arc<ExchangeSource> {
        Arc::clone(&self.source)
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    /// Build the proxy router, starting the delivery worker on first use.
    ///
    /// Must be called from within a tokio runtime.
    pub fn router(&mut self) -> Router {
        let captures_tx = self.start_worker();
        let forwarder = Arc::new(Forwarder::new(
            Arc::clone(&self.config),
            Arc::clone(&self.source),
            captures_tx,
        ));

        Router::new()
            .fallback(proxy_handler)
            .with_state(forwarder)
            .layer(TraceLayer::new_for_http())
    }

    fn start_worker(&mut self) -> mpsc::Sender<Capture> {
        if let Some(worker) = &self.worker {
            return worker.captures_tx.clone();
        }
        let (worker, captures_tx, shutdown_tx) =
            DeliveryWorker::new(Arc::clone(&self.source), self.config.delivery_queue);
        let task = tokio::spawn(worker.run());
        self.worker = Some(Worker {
            captures_tx: captures_tx.clone(),
            shutdown_tx,
            task,
        });
        captures_tx
    }

    /// Bind `addr` and start serving. Port `0` picks a free port; see
    /// [`ProxyServer::local_addr`].
    pub async fn listen(mut self, addr: SocketAddr) -> ProxyResult<Self> {
        if let Some(listening) = &self.listening {
            return Err(ProxyError::AlreadyListening(listening.local_addr));
        }

        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let serve = axum::serve(listener, router).with_graceful_shutdown(async move {
            let _ = shutdown_rx.await;
        });
        let task = tokio::spawn(async move { serve.await });

        info!(%local_addr, target = ?self.config.target, "Proxy listening");
        self.listening = Some(Listening {
            local_addr,
            shutdown_tx,
            task,
        });
        Ok(self)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.as_ref().map(|listening| listening.local_addr)
    }

    /// Stop accepting connections, wait for in-flight requests, then settle
    /// every capture still queued for delivery
    pub async fn shutdown(mut self) -> ProxyResult<()> {
        if let Some(listening) = self.listening.take() {
            let _ = listening.shutdown_tx.send(());
            match listening.task.await {
                Ok(result) => result?,
                Err(e) => warn!(error = %e, "Proxy server task failed"),
            }
        }

        if let Some(worker) = self.worker.take() {
            let _ = worker.shutdown_tx.send(()).await;
            if let Err(e) = worker.task.await {
                warn!(error = %e, "Delivery worker task failed");
            }
        }

        info!("Proxy stopped");
        Ok(())
    }
}

async fn proxy_handler(
    State(forwarder): State<Arc<Forwarder>>,
    request: Request,
) -> Result<Response<Body>, ProxyError> {
    forwarder.forward(request).await
}
