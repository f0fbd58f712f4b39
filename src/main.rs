use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use secrecy::SecretString;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use inbox_sift::channels::{ImapMailbox, Mailbox};
use inbox_sift::config::{
    AppConfig, DEFAULT_CONFIG_PATH, MailboxConfig, OracleBackendKind, api_key_from_env,
};
use inbox_sift::llm::{OracleClient, create_backend};
use inbox_sift::pipeline::{
    ActionApplier, ActionPolicy, Classifier, Dispatcher, ScanOutcome, Scanner, VerdictCache,
    spawn_scan_loop, spawn_sweep_task,
};
use inbox_sift::store::{CheckpointStore, FileCheckpoint};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        anyhow::bail!("Failed to install rustls crypto provider");
    }

    // Initialize tracing; keep the appender guard alive for the whole run.
    let _log_guard = init_tracing();

    let config_path = std::env::var("INBOX_SIFT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
    let config = AppConfig::load(&config_path)
        .with_context(|| format!("loading rules file {}", config_path.display()))?;
    let mailbox_config = MailboxConfig::from_env().context("reading IMAP settings")?;

    eprintln!("📬 Inbox Sift v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Mailbox: {}@{}/{}", mailbox_config.username, mailbox_config.host, mailbox_config.mailbox);
    eprintln!("   Oracle: {:?} ({})", config.oracle.backend, config.oracle.model);
    eprintln!("   Categories: {}", config.rules.categories.join(", "));

    let scanner = build_scanner(&config, mailbox_config)?;

    // ── Run ─────────────────────────────────────────────────────────────
    if config.settings.poll_interval_secs == 0 {
        return match scanner.run_scan().await {
            Ok(ScanOutcome::NoMessages) => {
                eprintln!("No unread, non-flagged messages found.");
                Ok(())
            }
            Ok(ScanOutcome::Completed(report)) => {
                eprintln!("Finished processing {} message(s).", report.processed());
                Ok(())
            }
            Err(e) => {
                tracing::error!(error = %e, "Scan failed");
                std::process::exit(1);
            }
        };
    }

    let interval = Duration::from_secs(config.settings.poll_interval_secs);
    let (handle, shutdown) = spawn_scan_loop(scanner, interval);

    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    tracing::info!("Shutdown requested");
    // Wakes the loop if it is idle; a running scan is allowed to finish.
    let _ = shutdown.send(true);
    if let Err(e) = handle.await {
        tracing::error!(error = %e, "Scan loop task failed");
    }

    Ok(())
}

/// Stderr logging, plus a daily log file when `INBOX_SIFT_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    match std::env::var("INBOX_SIFT_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "inbox-sift.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

/// Wire oracle, cache, mailbox and checkpoint into a scanner.
fn build_scanner(config: &AppConfig, mailbox_config: MailboxConfig) -> inbox_sift::Result<Arc<Scanner>> {
    // ── Oracle ──────────────────────────────────────────────────────────
    let api_key = oracle_api_key(config.oracle.backend)?;
    let backend = create_backend(&config.oracle, api_key)?;
    let oracle = OracleClient::from_config(backend, &config.oracle);

    // ── Cache + classifier ──────────────────────────────────────────────
    let cache = VerdictCache::new(config.settings.cache_ttl());
    spawn_sweep_task(Arc::clone(&cache));

    let classifier = Arc::new(
        Classifier::new(oracle, cache, Arc::new(config.rules.clone()))
            .with_settings(&config.settings)
            .with_sampling(&config.oracle),
    );

    // ── Mailbox + actions ───────────────────────────────────────────────
    let mailbox: Arc<dyn Mailbox> = Arc::new(ImapMailbox::new(mailbox_config));
    let applier = Arc::new(ActionApplier::new(
        Arc::clone(&mailbox),
        ActionPolicy::from(&config.settings),
    ));
    let dispatcher = Dispatcher::new(Arc::clone(&mailbox), classifier, applier, &config.settings);

    let checkpoint: Arc<dyn CheckpointStore> =
        Arc::new(FileCheckpoint::new(config.settings.checkpoint_path.clone()));
    Ok(Arc::new(Scanner::new(mailbox, dispatcher, checkpoint)))
}

/// API key for the configured backend. The local backend needs none.
fn oracle_api_key(backend: OracleBackendKind) -> inbox_sift::Result<Option<SecretString>> {
    let var = match backend {
        OracleBackendKind::OpenAi => "OPENAI_API_KEY",
        OracleBackendKind::Anthropic => "ANTHROPIC_API_KEY",
        OracleBackendKind::Local => return Ok(None),
    };
    Ok(Some(api_key_from_env(var)?))
}
