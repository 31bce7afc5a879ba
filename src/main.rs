use std::path::PathBuf;
use std::time::Instant;

use mail_relay::config::RelayConfig;
use mail_relay::daemon;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let boot = Instant::now();

    // Logging first so every later failure is visible
    let log_file = std::env::var("MAIL_RELAY_LOG_FILE").ok().map(PathBuf::from);
    let _log_guard = daemon::init_tracing(log_file.as_deref());

    if let Ok(pidfile) = std::env::var("MAIL_RELAY_PIDFILE") {
        daemon::write_pidfile(&PathBuf::from(pidfile));
    }

    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::warn!("rustls crypto provider was already installed");
    }

    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        tracing::error!("CRITICAL: {e}");
        std::process::exit(1);
    });

    mail_relay::run(config, boot).await?;
    Ok(())
}
