//! relay-worker: watches a directory and relays new files to a Telegram chat.
//!
//! Flow: notify watcher thread → discovery channel → ingest pipeline
//! (dedup → stability → delivery → archive/delete).
//!
//! Shuts down on SIGINT/SIGTERM, letting in-flight uploads finish.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

use relay_core::config::load_dotenv;
use relay_core::RelayConfig;
use relay_ingest::{DedupGuard, DirectoryWatcher, IngestPipeline};
use relay_transport::{Deliverer, DeliveryTransport, TelegramTransport};

// ── CLI ─────────────────────────────────────────────────────────────

/// Relay worker: uploads files dropped into a watch directory.
#[derive(Parser, Debug)]
#[command(name = "relay-worker", version, about)]
struct Cli {
    /// Config profile; keys are read as {PROFILE}_{KEY} first.
    #[arg(long, env = "RELAY_PROFILE")]
    profile: Option<String>,

    /// Directory to watch for new files.
    #[arg(long)]
    watch_dir: Option<PathBuf>,

    /// Directory uploaded files are moved to.
    #[arg(long)]
    uploaded_dir: Option<PathBuf>,

    /// Target chat: `@username` or numeric id.
    #[arg(long)]
    target: Option<String>,

    /// Delete files after upload instead of archiving them.
    #[arg(long)]
    delete_after_upload: bool,
}

impl Cli {
    fn apply(self, config: &mut RelayConfig) {
        if let Some(dir) = self.watch_dir {
            config.watch.watch_dir = dir;
        }
        if let Some(dir) = self.uploaded_dir {
            config.watch.uploaded_dir = dir;
        }
        if let Some(target) = self.target {
            config.telegram.target_channel = Some(target);
        }
        if self.delete_after_upload {
            config.watch.delete_after_upload = true;
        }
    }
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();

    let mut config = match cli.profile.as_deref() {
        Some(profile) => RelayConfig::for_profile(profile),
        None => RelayConfig::from_env(),
    };
    cli.apply(&mut config);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level)),
        )
        .init();

    config.log_summary();
    config.validate()?;

    std::fs::create_dir_all(&config.watch.watch_dir)?;
    std::fs::create_dir_all(&config.watch.uploaded_dir)?;

    let token = config.telegram.bot_token.clone().unwrap_or_default();
    let channel = config.telegram.target_channel.clone().unwrap_or_default();
    let transport = Arc::new(TelegramTransport::from_config(
        token,
        config.telegram.api_url.clone(),
    )?);

    match transport.identify().await {
        Ok(username) => info!("Logged in as @{}", username),
        Err(e) => warn!(error = %e, "getMe failed; continuing with target resolution"),
    }

    let target = match transport.resolve_target(&channel).await {
        Ok(target) => target,
        Err(e) => {
            error!(
                target = %channel,
                error = %e,
                "Unable to resolve target channel. Make sure the bot has permission to post there."
            );
            return Err(e.into());
        }
    };
    info!(chat_id = target.chat_id, "Target channel resolved: {}", target.display_name());

    let pipeline = Arc::new(IngestPipeline::new(
        Arc::new(DedupGuard::new()),
        Deliverer::new(transport, config.delivery_timeout()),
        Arc::new(target),
        config.relocation_policy(),
        config.stability(),
    ));

    let (tx, rx) = mpsc::unbounded_channel();
    let watcher = DirectoryWatcher::start(&config.watch.watch_dir, tx)?;

    let shutdown = Arc::new(Notify::new());
    let runner = tokio::spawn(Arc::clone(&pipeline).run(rx, shutdown.clone()));

    info!("relay-worker started");
    os_signal().await?;
    info!("shutdown signal received, draining in-flight uploads");

    // Stop producing events first; the pipeline then finishes what it has.
    drop(watcher);
    shutdown.notify_one();
    runner.await?;

    info!("relay-worker exited cleanly");
    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn os_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        Ok(())
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
