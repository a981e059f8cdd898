use crate::error::{Error, Result};
use crate::proxy::{ProxyConfig, TargetUrl};
use crate::store::StoreOptions;
use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub proxy: ProxySettings,
    pub store: StoreSettings,
    #[serde(default)]
    pub capture: CaptureSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProxySettings {
    pub host: String,
    pub port: u16,
    pub target: Option<String>,
    pub request_timeout_ms: u64,
    pub delivery_queue: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreSettings {
    pub max_count: usize,
}

/// Which exchanges the binary records
#[derive(Debug, Deserialize, Clone, Default)]
pub struct CaptureSettings {
    /// Path prefixes worth capturing; empty means every exchange
    #[serde(default)]
    pub path_prefixes: Vec<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSettings {
    pub level: String,
    pub format: String,
}

impl Settings {
    pub fn new() -> std::result::Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        Self::from_config(
            Self::defaults()?
                // Add configuration file if it exists
                .add_source(File::with_name("config/default").required(false))
                .add_source(File::with_name(&format!("config/{environment}")).required(false))
                .add_source(File::with_name("config/local").required(false))
                // Add environment variables with prefix
                .add_source(Environment::with_prefix("PROXY_TAP").separator("__"))
                .build()?,
        )
    }

    /// Builder preloaded with every default
    pub fn defaults() -> std::result::Result<ConfigBuilder<DefaultState>, ConfigError> {
        Config::builder()
            .set_default("proxy.host", "127.0.0.1")?
            .set_default("proxy.port", 8080)?
            .set_default("proxy.request_timeout_ms", 30_000)?
            .set_default("proxy.delivery_queue", 1024)?
            .set_default("store.max_count", 10)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "pretty")
    }

    pub fn from_config(config: Config) -> std::result::Result<Self, ConfigError> {
        config.try_deserialize()
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.proxy.host, self.proxy.port)
            .parse()
            .map_err(|e| Error::invalid_setting("proxy.host", e))
    }

    pub fn proxy_config(&self) -> Result<ProxyConfig> {
        let target = self
            .proxy
            .target
            .as_deref()
            .filter(|target| !target.trim().is_empty())
            .map(|target| {
                TargetUrl::try_new(target.to_string())
                    .map_err(|e| Error::invalid_setting("proxy.target", e))
            })
            .transpose()?;
        if self.proxy.delivery_queue == 0 {
            return Err(Error::invalid_setting(
                "proxy.delivery_queue",
                "must be greater than zero",
            ));
        }

        Ok(ProxyConfig {
            target,
            request_timeout: Duration::from_millis(self.proxy.request_timeout_ms),
            delivery_queue: self.proxy.delivery_queue,
        })
    }

    pub fn store_options(&self) -> Result<StoreOptions> {
        StoreOptions::with_max_count(self.store.max_count)
            .map_err(|e| Error::invalid_setting("store.max_count", e))
    }
}
