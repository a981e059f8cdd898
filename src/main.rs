use anyhow::Result;
use proxy_tap::config::{LoggingSettings, Settings};
use proxy_tap::Application;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    init_tracing(&settings.logging);

    info!("Starting proxy tap");

    let app = Application::new(settings)?;
    app.run(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c, shutting down");
        }
    })
    .await?;

    Ok(())
}

fn init_tracing(logging: &LoggingSettings) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    match logging.format.as_str() {
        "json" => builder.json().init(),
        "compact" => builder.compact().init(),
        _ => builder.pretty().init(),
    }
}
