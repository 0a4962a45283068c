//! Configuration types — everything is environment-supplied.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Read a required environment variable, with a hint for the error message.
fn required(key: &str, hint: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

/// Read an optional u16 with a default.
fn port_or(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

// ── Mailbox (IMAP) ──────────────────────────────────────────────────

/// IMAP polling configuration.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: String,
    /// Delay between poll cycles.
    pub poll_interval: Duration,
}

impl MailboxConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let imap_host = required("MAIL_IMAP_HOST", "e.g. imap.gmail.com")?;
        let username = required("MAIL_USERNAME", "mailbox login")?;
        let password = required("MAIL_PASSWORD", "mailbox password or app password")?;

        let poll_interval_secs: u64 = std::env::var("MAIL_POLL_INTERVAL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5);

        Ok(Self {
            imap_host,
            imap_port: port_or("MAIL_IMAP_PORT", 993),
            username,
            password,
            poll_interval: Duration::from_secs(poll_interval_secs),
        })
    }
}

// ── SMTP ────────────────────────────────────────────────────────────

/// Outbound mail configuration.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub username: String,
    pub password: String,
    pub from_address: String,
}

impl SmtpConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let username = required("MAIL_USERNAME", "mailbox login")?;
        let password = required("MAIL_PASSWORD", "mailbox password or app password")?;

        let smtp_host =
            std::env::var("MAIL_SMTP_HOST").unwrap_or_else(|_| "smtp.gmail.com".to_string());
        let from_address =
            std::env::var("MAIL_FROM_ADDRESS").unwrap_or_else(|_| username.clone());

        Ok(Self {
            smtp_host,
            smtp_port: port_or("MAIL_SMTP_PORT", 587),
            username,
            password,
            from_address,
        })
    }
}

// ── Transcription ───────────────────────────────────────────────────

/// Speech-to-text service configuration (OpenAI-compatible endpoint).
#[derive(Debug, Clone)]
pub struct TranscribeConfig {
    pub api_key: SecretString,
    pub base_url: String,
    pub model: String,
    /// Minimum audio duration; shorter files are rejected without upload.
    pub min_duration: Duration,
}

impl TranscribeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = required("OPENAI_API_KEY", "export OPENAI_API_KEY=sk-...")?;

        let base_url = std::env::var("TRANSCRIBE_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let model =
            std::env::var("TRANSCRIBE_MODEL").unwrap_or_else(|_| "whisper-1".to_string());

        Ok(Self {
            api_key: SecretString::from(api_key),
            base_url,
            model,
            min_duration: Duration::from_secs(5),
        })
    }
}

// ── Storage paths ───────────────────────────────────────────────────

/// Filesystem and database locations.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Directory for downloaded media attachments.
    pub attachment_dir: PathBuf,
    /// CSV audit log of attachment downloads.
    pub audit_log: PathBuf,
    /// libSQL database file for customer records.
    pub db_path: PathBuf,
}

impl StoreConfig {
    pub fn from_env() -> Self {
        let attachment_dir = std::env::var("MAIL_ATTACHMENT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("email_attachments"));
        let audit_log = std::env::var("MAIL_DOWNLOAD_LOG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("email_downloads.csv"));
        let db_path = std::env::var("MAIL_AGENT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/mail-agent.db"));

        Self {
            attachment_dir,
            audit_log,
            db_path,
        }
    }
}

// ── Aggregate ───────────────────────────────────────────────────────

/// Full agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub mailbox: MailboxConfig,
    pub smtp: SmtpConfig,
    pub transcribe: TranscribeConfig,
    pub store: StoreConfig,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            mailbox: MailboxConfig::from_env()?,
            smtp: SmtpConfig::from_env()?,
            transcribe: TranscribeConfig::from_env()?,
            store: StoreConfig::from_env(),
        })
    }
}
