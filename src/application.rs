use crate::config::Settings;
use crate::exchange::Exchange;
use crate::proxy::ProxyServer;
use crate::store::RecordStore;
use crate::Result;
use std::sync::Arc;
use tracing::{info, instrument};

/// Wires settings, the proxy server and the default recording pipeline
pub struct Application {
    settings: Settings,
    server: ProxyServer,
    recent: Arc<RecordStore<Exchange>>,
}

impl Application {
    #[instrument(skip(settings))]
    pub fn new(settings: Settings) -> Result<Self> {
        let server = ProxyServer::new(settings.proxy_config()?);
        let options = settings.store_options()?;
        let prefixes = settings.capture.path_prefixes.clone();

        let recent = if prefixes.is_empty() {
            server.source().stream().to_store(options)
        } else {
            info!(?prefixes, "Capturing matching paths only");
            server
                .source()
                .request_filter(move |head| {
                    prefixes.iter().any(|prefix| head.path().starts_with(prefix.as_str()))
                })
                .to_store(options)
        };

        recent.subscribe_with(|exchange: Exchange| {
            info!(
                exchange_id = %exchange.id,
                method = %exchange.method(),
                path = exchange.path(),
                status = exchange.status().as_u16(),
                request_bytes = exchange.request_body.len(),
                response_bytes = exchange.response_body.len(),
                "Exchange captured"
            );
        });

        Ok(Self {
            settings,
            server,
            recent,
        })
    }

    /// Serve until `shutdown` resolves
    #[instrument(skip_all)]
    pub async fn run(self, shutdown: impl std::future::Future<Output = ()>) -> Result<()> {
        let addr = self.settings.listen_addr()?;
        let server = self.server.listen(addr).await?;
        info!(
            addr = ?server.local_addr(),
            max_count = self.recent.max_count(),
            "Proxy tap started"
        );

        shutdown.await;
        info!("Shutdown requested");
        server.shutdown().await?;
        self.recent.destroy();
        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn recent(&self) -> &Arc<RecordStore<Exchange>> {
        &self.recent
    }
}
