//! Attachment storage and download audit log.
//!
//! Media attachments land in a single working directory that is emptied
//! before the first save of each poll cycle, so the transcription pass only
//! ever sees files from the current batch. Every save is appended to a CSV
//! audit log.

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Local, Utc};
use regex::Regex;
use tracing::{error, info};

use crate::error::ConfigError;

/// Attachment extensions accepted for download, lowercase with dot.
pub const MEDIA_EXTENSIONS: &[&str] = &[
    // Video
    ".mp4", ".mov", ".avi", ".mkv", ".wmv", ".flv", ".webm", ".m4v", ".3gp",
    // Audio
    ".mp3", ".wav", ".aac", ".ogg", ".flac", ".m4a", ".wma",
];

const CSV_HEADER: &str = "timestamp,sender,subject,filename,file_path";

/// One audit-log row for a saved attachment.
#[derive(Debug, Clone)]
pub struct DownloadRecord {
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub subject: String,
    pub filename: String,
    pub path: PathBuf,
}

/// Filesystem store for downloaded media attachments.
pub struct AttachmentStore {
    dir: PathBuf,
    audit_log: PathBuf,
    sanitize: Regex,
}

impl AttachmentStore {
    /// Create the store, making the download directory and seeding the audit
    /// log header if either is missing.
    pub fn new(dir: impl Into<PathBuf>, audit_log: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let dir = dir.into();
        let audit_log = audit_log.into();

        if !dir.exists() {
            fs::create_dir_all(&dir)?;
            info!(dir = %dir.display(), "Created download directory");
        }
        if !audit_log.exists() {
            let mut file = fs::File::create(&audit_log)?;
            writeln!(file, "{CSV_HEADER}")?;
            info!(path = %audit_log.display(), "Created download audit log");
        }

        // The pattern is a literal constant, so compilation cannot fail.
        let sanitize = Regex::new(r#"[\\/*?:"<>|]"#)
            .map_err(|e| ConfigError::InvalidValue {
                key: "sanitize_pattern".to_string(),
                message: e.to_string(),
            })?;

        Ok(Self {
            dir,
            audit_log,
            sanitize,
        })
    }

    /// Whether a filename carries a supported media extension.
    pub fn is_supported_media(filename: &str) -> bool {
        let lower = filename.to_lowercase();
        MEDIA_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
    }

    /// Empty the download directory. Failures on individual entries are
    /// logged and skipped.
    pub fn clear(&self) {
        info!(dir = %self.dir.display(), "Clearing download directory");
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!(error = %e, "Failed to read download directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            if let Err(e) = result {
                error!(path = %path.display(), error = %e, "Failed to delete entry");
            }
        }
    }

    /// Save one attachment, returning its audit record. The filename is
    /// sanitized; the stored path is absolute.
    pub fn save(
        &self,
        sender: &str,
        subject: &str,
        filename: &str,
        data: &[u8],
    ) -> Result<DownloadRecord, std::io::Error> {
        let safe_name = self.sanitize.replace_all(filename, "_").to_string();
        let path = self.dir.join(&safe_name);
        fs::write(&path, data)?;

        let abs_path = path.canonicalize().unwrap_or(path);
        info!(path = %abs_path.display(), "Downloaded attachment");

        Ok(DownloadRecord {
            timestamp: Utc::now(),
            sender: sender.to_string(),
            subject: subject.to_string(),
            filename: safe_name,
            path: abs_path,
        })
    }

    /// Append one record to the CSV audit log.
    pub fn append_audit(&self, record: &DownloadRecord) -> Result<(), std::io::Error> {
        let mut file = fs::OpenOptions::new().append(true).open(&self.audit_log)?;
        let local: DateTime<Local> = record.timestamp.into();
        writeln!(
            file,
            "{},{},{},{},{}",
            local.format("%Y-%m-%d %H:%M:%S"),
            csv_escape(&record.sender),
            csv_escape(&record.subject),
            csv_escape(&record.filename),
            csv_escape(&record.path.to_string_lossy()),
        )?;
        info!(filename = %record.filename, "Logged download to audit log");
        Ok(())
    }

}

/// Escape a value for CSV (RFC 4180).
///
/// Wraps in double quotes if the value contains commas, quotes, or newlines.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_fixture() -> (tempfile::TempDir, AttachmentStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = AttachmentStore::new(tmp.path().join("media"), tmp.path().join("log.csv"))
            .unwrap();
        (tmp, store)
    }

    fn entry_count(store: &AttachmentStore) -> usize {
        std::fs::read_dir(&store.dir).unwrap().count()
    }

    #[test]
    fn supported_media_matches_extension_case_insensitively() {
        assert!(AttachmentStore::is_supported_media("voice.MP3"));
        assert!(AttachmentStore::is_supported_media("clip.webm"));
        assert!(!AttachmentStore::is_supported_media("invoice.pdf"));
        assert!(!AttachmentStore::is_supported_media("readme"));
    }

    #[test]
    fn save_sanitizes_filename() {
        let (_tmp, store) = store_fixture();
        let record = store
            .save("a@b.com", "hi", "bad:name?.mp3", b"data")
            .unwrap();
        assert_eq!(record.filename, "bad_name_.mp3");
        assert!(record.path.exists());
    }

    #[test]
    fn clear_empties_directory() {
        let (_tmp, store) = store_fixture();
        store.save("a@b.com", "hi", "one.mp3", b"x").unwrap();
        store.save("a@b.com", "hi", "two.wav", b"y").unwrap();
        assert_eq!(entry_count(&store), 2);

        store.clear();
        assert_eq!(entry_count(&store), 0);
    }

    #[test]
    fn audit_log_has_header_and_rows() {
        let (tmp, store) = store_fixture();
        let record = store.save("a@b.com", "subject, with comma", "v.mp3", b"x").unwrap();
        store.append_audit(&record).unwrap();

        let content = std::fs::read_to_string(tmp.path().join("log.csv")).unwrap();
        let mut lines = content.lines();
        assert_eq!(lines.next(), Some(CSV_HEADER));
        let row = lines.next().unwrap();
        assert!(row.contains("\"subject, with comma\""));
        assert!(row.contains("v.mp3"));
    }

    #[test]
    fn csv_escape_quotes_specials() {
        assert_eq!(csv_escape("plain"), "plain");
        assert_eq!(csv_escape("a,b"), "\"a,b\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
