use anyhow::{Context, Result};
use clap::Parser;
use firefly_proxy::config::Config;
use firefly_proxy::server::{self, AppState};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "firefly-proxy")]
#[command(about = "Proxy chat, translation and Firefly prompt requests to an LLM provider")]
struct CliArgs {
    /// Address to listen on; overrides BIND_ADDR.
    #[arg(long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "firefly_proxy=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();

    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
    }

    info!(
        "Starting firefly-proxy (provider {}, model {})",
        config.provider, config.default_model
    );

    let bind_addr = config.bind_addr.clone();
    let app = server::router(AppState::from_config(config)?);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;
    info!("Listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shut down cleanly");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::CliArgs;
    use clap::Parser;

    #[test]
    fn test_bind_flag() {
        let args = CliArgs::parse_from(["firefly-proxy", "--bind", "127.0.0.1:8080"]);
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:8080"));
    }

    #[test]
    fn test_bind_defaults_to_config() {
        let args = CliArgs::parse_from(["firefly-proxy"]);
        assert!(args.bind.is_none());
    }
}
