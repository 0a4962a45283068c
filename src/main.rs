use std::sync::Arc;

use mail_agent::attachments::AttachmentStore;
use mail_agent::config::Config;
use mail_agent::crm::{CustomerStore, LibSqlStore};
use mail_agent::dispatch::MailDispatcher;
use mail_agent::llm::{LlmConfig, create_provider};
use mail_agent::mailbox::poller::{Poller, spawn_poller};
use mail_agent::transcribe::Transcriber;
use mail_agent::triage::TriageEngine;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = Config::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    let llm_config = LlmConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        std::process::exit(1);
    });

    eprintln!("📬 Mail Agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   IMAP: {}:{}", config.mailbox.imap_host, config.mailbox.imap_port);
    eprintln!("   SMTP: {}:{}", config.smtp.smtp_host, config.smtp.smtp_port);
    eprintln!("   Model: {}", llm_config.model);
    eprintln!("   Database: {}", config.store.db_path.display());
    eprintln!(
        "   Attachments: {} (log: {})\n",
        config.store.attachment_dir.display(),
        config.store.audit_log.display()
    );

    // ── LLM ─────────────────────────────────────────────────────────
    let llm = create_provider(&llm_config)?;
    let triage = TriageEngine::new(llm);

    // ── Customer store ──────────────────────────────────────────────
    let store: Arc<dyn CustomerStore> = Arc::new(
        LibSqlStore::new_local(&config.store.db_path)
            .await
            .unwrap_or_else(|e| {
                eprintln!(
                    "Error: Failed to open database at {}: {e}",
                    config.store.db_path.display()
                );
                std::process::exit(1);
            }),
    );

    // ── Attachments ─────────────────────────────────────────────────
    let attachments =
        AttachmentStore::new(&config.store.attachment_dir, &config.store.audit_log)
            .unwrap_or_else(|e| {
                eprintln!("Error: Failed to set up attachment store: {e}");
                std::process::exit(1);
            });
    // Start with a clean working directory
    attachments.clear();

    // ── Transcription ───────────────────────────────────────────────
    let transcriber = Transcriber::new(config.transcribe.clone()).unwrap_or_else(|e| {
        eprintln!("Error: Failed to set up transcription client: {e}");
        std::process::exit(1);
    });

    // ── Poller ──────────────────────────────────────────────────────
    let dispatcher = MailDispatcher::new(config.smtp.clone());
    let poller = Poller::new(
        config.mailbox.clone(),
        triage,
        dispatcher,
        transcriber,
        attachments,
        store,
    );

    let (handle, shutdown) = spawn_poller(poller);

    tokio::signal::ctrl_c().await?;
    eprintln!("\nShutting down...");
    shutdown.store(true, std::sync::atomic::Ordering::Relaxed);
    handle.abort();

    Ok(())
}
