//! Raw IMAP over TLS — blocking, run under `spawn_blocking`.
//!
//! Only the handful of commands the poller needs: LOGIN, SELECT, STATUS,
//! FETCH, LOGOUT. Each session covers one poll cycle; the connection is not
//! kept open between cycles.

use std::io::Write as IoWrite;
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::config::MailboxConfig;
use crate::error::MailboxError;

type TlsStream = rustls::StreamOwned<rustls::ClientConnection, TcpStream>;

/// One authenticated IMAP session.
pub struct ImapSession {
    tls: TlsStream,
    tag_counter: u32,
}

impl ImapSession {
    /// Connect, read the greeting, and log in.
    pub fn connect(config: &MailboxConfig) -> Result<Self, MailboxError> {
        let tcp = TcpStream::connect((&*config.imap_host, config.imap_port)).map_err(|e| {
            MailboxError::Connect {
                host: config.imap_host.clone(),
                port: config.imap_port,
                reason: e.to_string(),
            }
        })?;
        tcp.set_read_timeout(Some(Duration::from_secs(30)))?;

        let mut root_store = rustls::RootCertStore::empty();
        root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let tls_config = Arc::new(
            rustls::ClientConfig::builder()
                .with_root_certificates(root_store)
                .with_no_client_auth(),
        );
        let server_name: rustls::pki_types::ServerName<'_> =
            rustls::pki_types::ServerName::try_from(config.imap_host.clone())
                .map_err(|e| MailboxError::Tls(e.to_string()))?;
        let conn = rustls::ClientConnection::new(tls_config, server_name)
            .map_err(|e| MailboxError::Tls(e.to_string()))?;
        let tls = rustls::StreamOwned::new(conn, tcp);

        let mut session = Self {
            tls,
            tag_counter: 1,
        };

        let _greeting = session.read_line()?;

        let login_resp = session.send_cmd(&format!(
            "LOGIN \"{}\" \"{}\"",
            config.username, config.password
        ))?;
        if !login_resp.last().is_some_and(|l| l.contains("OK")) {
            return Err(MailboxError::AuthFailed {
                user: config.username.clone(),
            });
        }
        info!(host = %config.imap_host, "Logged in to IMAP server");

        Ok(session)
    }

    /// SELECT the inbox.
    pub fn select_inbox(&mut self) -> Result<(), MailboxError> {
        let resp = self.send_cmd("SELECT \"INBOX\"")?;
        if !resp.last().is_some_and(|l| l.contains("OK")) {
            return Err(MailboxError::CommandFailed {
                command: "SELECT".to_string(),
                reason: resp.last().cloned().unwrap_or_default(),
            });
        }
        Ok(())
    }

    /// Total message count via `STATUS "INBOX" (MESSAGES)`.
    pub fn message_count(&mut self) -> Result<u32, MailboxError> {
        let resp = self.send_cmd("STATUS \"INBOX\" (MESSAGES)")?;
        if !resp.last().is_some_and(|l| l.contains("OK")) {
            return Err(MailboxError::CommandFailed {
                command: "STATUS".to_string(),
                reason: resp.last().cloned().unwrap_or_default(),
            });
        }

        for line in &resp {
            if line.starts_with("* STATUS") {
                return parse_status_messages(line);
            }
        }
        Err(MailboxError::BadResponse(
            "no STATUS line in response".to_string(),
        ))
    }

    /// Fetch one message by sequence number, returning the raw RFC822 text.
    pub fn fetch_message(&mut self, seq: u32) -> Result<String, MailboxError> {
        debug!(seq, "Fetching message");
        let resp = self.send_cmd(&format!("FETCH {seq} RFC822"))?;
        if !resp.last().is_some_and(|l| l.contains("OK")) {
            return Err(MailboxError::CommandFailed {
                command: format!("FETCH {seq}"),
                reason: resp.last().cloned().unwrap_or_default(),
            });
        }

        // First line is the untagged FETCH header, last is the tagged OK;
        // everything between is literal message text.
        let raw: String = resp
            .iter()
            .skip(1)
            .take(resp.len().saturating_sub(2))
            .cloned()
            .collect();
        Ok(raw)
    }

    /// Log out, consuming the session. Errors are ignored.
    pub fn logout(mut self) {
        let _ = self.send_cmd("LOGOUT");
        debug!("Logged out from IMAP server");
    }

    // ── Wire helpers ────────────────────────────────────────────────

    fn read_line(&mut self) -> Result<String, MailboxError> {
        let mut buf = Vec::new();
        loop {
            let mut byte = [0u8; 1];
            match std::io::Read::read(&mut self.tls, &mut byte) {
                Ok(0) => {
                    return Err(MailboxError::BadResponse(
                        "IMAP connection closed".to_string(),
                    ));
                }
                Ok(_) => {
                    buf.push(byte[0]);
                    if buf.ends_with(b"\r\n") {
                        return Ok(String::from_utf8_lossy(&buf).to_string());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn send_cmd(&mut self, cmd: &str) -> Result<Vec<String>, MailboxError> {
        let tag = format!("A{}", self.tag_counter);
        self.tag_counter += 1;

        let full = format!("{tag} {cmd}\r\n");
        IoWrite::write_all(&mut self.tls, full.as_bytes())?;
        IoWrite::flush(&mut self.tls)?;

        let mut lines = Vec::new();
        loop {
            let line = self.read_line()?;
            let done = line.starts_with(&tag);
            lines.push(line);
            if done {
                break;
            }
        }
        Ok(lines)
    }
}

/// Parse the message count out of a `* STATUS "INBOX" (MESSAGES n)` line.
fn parse_status_messages(line: &str) -> Result<u32, MailboxError> {
    let mut tokens = line.split_whitespace();
    while let Some(token) = tokens.next() {
        if token.trim_start_matches('(') == "MESSAGES" {
            let value = tokens
                .next()
                .ok_or_else(|| MailboxError::BadResponse(line.to_string()))?;
            return value
                .trim_matches(|c: char| !c.is_ascii_digit())
                .parse()
                .map_err(|_| MailboxError::BadResponse(line.to_string()));
        }
    }
    Err(MailboxError::BadResponse(line.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_parses_count() {
        let line = "* STATUS \"INBOX\" (MESSAGES 172)\r\n";
        assert_eq!(parse_status_messages(line).unwrap(), 172);
    }

    #[test]
    fn status_line_zero_messages() {
        let line = "* STATUS INBOX (MESSAGES 0)\r\n";
        assert_eq!(parse_status_messages(line).unwrap(), 0);
    }

    #[test]
    fn status_line_without_count_is_error() {
        let line = "* STATUS \"INBOX\" (UIDNEXT 5)\r\n";
        assert!(parse_status_messages(line).is_err());
    }
}
