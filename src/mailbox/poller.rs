//! Poll loop — fetches new mail, routes it, and drives the reply paths.
//!
//! One cycle: connect, count the inbox, fetch everything past the cursor,
//! run the text routes inline, then hand the cycle's downloaded media to
//! the audio pass. The cursor advances whether or not individual messages
//! succeeded, and never moves backward, so each message is attempted at
//! most once.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::attachments::{AttachmentStore, DownloadRecord};
use crate::config::MailboxConfig;
use crate::crm::{CustomerPatch, CustomerStore};
use crate::dispatch::MailDispatcher;
use crate::error::{Error, MailboxError};
use crate::mailbox::imap::ImapSession;
use crate::mailbox::message::{
    InboundEmail, extract_email_from_sender, extract_name_from_sender,
};
use crate::mailbox::{Route, SHORT_AUDIO_REPLY, SHORT_TEXT_REPLY, route_message};
use crate::transcribe::{Transcriber, TranscriptionOutcome};
use crate::triage::TriageEngine;

/// Position in the mailbox: the highest sequence number already handled.
///
/// `None` until the first successful cycle, which records the current
/// count without processing anything — only mail arriving after startup
/// is handled.
#[derive(Debug, Clone, Copy, Default)]
pub struct PollCursor {
    last_processed: Option<u32>,
}

impl PollCursor {
    /// Sequence numbers to process given the current inbox count, oldest
    /// first. Empty on the first observation.
    pub fn pending(&self, count: u32) -> Vec<u32> {
        match self.last_processed {
            None => Vec::new(),
            Some(last) if count > last => (last + 1..=count).collect(),
            Some(_) => Vec::new(),
        }
    }

    /// Move the cursor to the observed count. Never moves backward: a
    /// count lowered by deletions leaves the cursor where it is, so old
    /// messages are not re-fetched.
    pub fn advance(&mut self, count: u32) {
        self.last_processed = Some(count.max(self.last_processed.unwrap_or(0)));
    }

    pub fn is_seeded(&self) -> bool {
        self.last_processed.is_some()
    }
}

/// Media downloaded during one cycle. Produced by the fetch pass and
/// consumed, by value, by the audio pass — nothing else holds it.
#[derive(Debug, Default)]
struct AttachmentBatch {
    records: Vec<DownloadRecord>,
}

impl AttachmentBatch {
    fn has_media(&self) -> bool {
        !self.records.is_empty()
    }
}

/// Result of one blocking IMAP round trip.
struct FetchResult {
    count: u32,
    messages: Vec<(u32, String)>,
}

/// The polling agent: owns every adapter the routes need.
pub struct Poller {
    mailbox: MailboxConfig,
    triage: TriageEngine,
    dispatcher: Arc<MailDispatcher>,
    transcriber: Transcriber,
    attachments: AttachmentStore,
    store: Arc<dyn CustomerStore>,
}

impl Poller {
    pub fn new(
        mailbox: MailboxConfig,
        triage: TriageEngine,
        dispatcher: MailDispatcher,
        transcriber: Transcriber,
        attachments: AttachmentStore,
        store: Arc<dyn CustomerStore>,
    ) -> Self {
        Self {
            mailbox,
            triage,
            dispatcher: Arc::new(dispatcher),
            transcriber,
            attachments,
            store,
        }
    }

    /// Run the poll loop until the shutdown flag is set.
    pub async fn run(self, shutdown: Arc<AtomicBool>) {
        info!(
            host = %self.mailbox.imap_host,
            interval_secs = self.mailbox.poll_interval.as_secs(),
            "Mail polling started"
        );

        let mut cursor = PollCursor::default();
        let mut tick = tokio::time::interval(self.mailbox.poll_interval);

        loop {
            tick.tick().await;

            if shutdown.load(Ordering::Relaxed) {
                info!("Mail poller shutting down");
                return;
            }

            if let Err(e) = self.run_cycle(&mut cursor).await {
                error!(error = %e, "Poll cycle failed");
            }
        }
    }

    /// One poll cycle. A connection or login failure aborts the whole
    /// cycle; the next tick retries from scratch.
    pub async fn run_cycle(&self, cursor: &mut PollCursor) -> Result<(), Error> {
        let config = self.mailbox.clone();
        let cursor_snapshot = *cursor;

        let fetch = tokio::task::spawn_blocking(move || fetch_new_mail(&config, cursor_snapshot))
            .await
            .map_err(|e| MailboxError::BadResponse(format!("fetch task panicked: {e}")))??;

        if !cursor.is_seeded() {
            info!(count = fetch.count, "First cycle: seeding mailbox cursor");
            cursor.advance(fetch.count);
            return Ok(());
        }

        if fetch.messages.is_empty() {
            cursor.advance(fetch.count);
            return Ok(());
        }

        info!(new = fetch.messages.len(), "Found new email(s)");
        let mut batch = AttachmentBatch::default();

        for (seq, raw) in &fetch.messages {
            if let Err(e) = self.process_message(*seq, raw, &mut batch).await {
                error!(seq, error = %e, "Failed to process message");
            }
        }

        for record in &batch.records {
            if let Err(e) = self.attachments.append_audit(record) {
                error!(filename = %record.filename, error = %e, "Failed to write audit row");
            }
        }

        if batch.has_media() {
            self.process_audio_batch(batch).await;
        }

        // At-most-once: failures above do not hold the cursor back.
        cursor.advance(fetch.count);
        Ok(())
    }

    /// Handle one fetched message: download its media, then run the text
    /// route.
    async fn process_message(
        &self,
        seq: u32,
        raw: &str,
        batch: &mut AttachmentBatch,
    ) -> Result<(), Error> {
        let email = InboundEmail::parse(seq, raw)?;
        let word_count = email.word_count();
        let sender_email = email.sender_email();

        info!(
            seq,
            from = %email.sender_display,
            subject = %email.subject,
            words = word_count,
            "New email received"
        );

        let mut saved_media = false;
        for attachment in &email.attachments {
            if !AttachmentStore::is_supported_media(&attachment.filename) {
                continue;
            }
            // The working directory holds exactly one cycle's batch.
            if !batch.has_media() {
                self.attachments.clear();
            }
            match self.attachments.save(
                &email.sender_display,
                &email.subject,
                &attachment.filename,
                &attachment.data,
            ) {
                Ok(record) => {
                    batch.records.push(record);
                    saved_media = true;
                }
                Err(e) => {
                    error!(filename = %attachment.filename, error = %e, "Failed to save attachment");
                }
            }
        }

        match route_message(word_count, saved_media) {
            Route::Drop => {}
            Route::AudioOnly => {
                info!(seq, "Short text with media attachments, deferring to audio pass");
            }
            Route::ShortText => {
                info!(seq, words = word_count, "Text too brief, requesting more details");
                upsert_or_log(self.store.as_ref(), &sender_email, CustomerPatch::default())
                    .await;
                self.send_reply(SHORT_TEXT_REPLY.0, SHORT_TEXT_REPLY.1, &sender_email)
                    .await?;
            }
            Route::Triage => {
                upsert_or_log(self.store.as_ref(), &sender_email, CustomerPatch::default())
                    .await;
                self.triage_and_reply(&email.body, &email.sender_name(), &sender_email)
                    .await?;
            }
        }

        Ok(())
    }

    /// Run the triage pipeline for one message and send the reply.
    /// Successful triage also records the extracted details.
    async fn triage_and_reply(
        &self,
        user_message: &str,
        sender_name: &str,
        recipient: &str,
    ) -> Result<(), Error> {
        let result = self.triage.process_complaint(user_message, sender_name).await?;

        let report = self
            .send_reply(&result.reply.subject, &result.reply.body, recipient)
            .await?;

        info!(
            to = %report.recipient,
            subject = %report.subject,
            preview = %report.body_preview,
            "Reply dispatched"
        );

        let details = result.details;
        let patch = CustomerPatch {
            customer_name: details.customer_name,
            address: details.address,
            user_message: Some(user_message.to_string()),
            agent_mail: Some(result.reply.body),
            refund_requested: details.refund_requested,
            product_issue: details.product_issue,
            order_id: details.order_id,
            status: None,
        };
        upsert_or_log(self.store.as_ref(), recipient, patch).await;

        Ok(())
    }

    /// Transcribe the cycle's downloaded media and reply per file.
    ///
    /// Senders whose recordings were all too short get exactly one canned
    /// reply each, however many files they sent.
    async fn process_audio_batch(&self, batch: AttachmentBatch) {
        info!(files = batch.records.len(), "Processing downloaded audio files");

        let mut short_senders: BTreeSet<String> = BTreeSet::new();

        for record in &batch.records {
            match self.transcriber.transcribe_file(&record.path).await {
                Ok(TranscriptionOutcome::Text(text)) => {
                    let sender_name = extract_name_from_sender(&record.sender);
                    let recipient = extract_email_from_sender(&record.sender);
                    info!(filename = %record.filename, "Transcription complete, triaging");
                    if let Err(e) = self
                        .triage_and_reply(&text, &sender_name, &recipient)
                        .await
                    {
                        error!(filename = %record.filename, error = %e, "Failed to reply to transcription");
                    }
                }
                Ok(TranscriptionOutcome::TooShort { duration_secs }) => {
                    warn!(
                        filename = %record.filename,
                        duration_secs = format!("{duration_secs:.2}"),
                        "Recording below minimum duration"
                    );
                    short_senders.insert(extract_email_from_sender(&record.sender));
                }
                Err(e) => {
                    error!(filename = %record.filename, error = %e, "Transcription failed");
                }
            }
        }

        for recipient in short_senders {
            info!(to = %recipient, "Requesting a longer recording");
            if let Err(e) = self
                .send_reply(SHORT_AUDIO_REPLY.0, SHORT_AUDIO_REPLY.1, &recipient)
                .await
            {
                error!(to = %recipient, error = %e, "Failed to send short-audio reply");
            }
        }
    }

    /// Send one reply over SMTP, off the async runtime.
    async fn send_reply(
        &self,
        subject: &str,
        body: &str,
        recipient: &str,
    ) -> Result<crate::dispatch::DispatchReport, Error> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let subject = subject.to_string();
        let body = body.to_string();
        let recipient = recipient.to_string();

        let report = tokio::task::spawn_blocking(move || {
            dispatcher.send(&subject, &body, &recipient)
        })
        .await
        .map_err(|e| {
            crate::error::DispatchError::Transport(format!("send task panicked: {e}"))
        })??;

        Ok(report)
    }
}

/// Spawn the poller as a background task.
///
/// Returns a `JoinHandle` and a shutdown flag. Set the flag to stop polling.
pub fn spawn_poller(poller: Poller) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);
    let handle = tokio::spawn(async move {
        poller.run(shutdown).await;
    });
    (handle, shutdown_flag)
}

/// Record what is known about a sender. Store failures are logged and
/// swallowed; the reply still goes out.
async fn upsert_or_log(store: &dyn CustomerStore, email: &str, patch: CustomerPatch) {
    if let Err(e) = store.upsert_partial(email, patch).await {
        error!(email = %email, error = %e, "Failed to record customer contact");
    }
}

/// One blocking IMAP round trip: count the inbox and fetch every message
/// past the cursor. Fetch failures on individual messages are logged and
/// skipped; the message is not retried later.
fn fetch_new_mail(
    config: &MailboxConfig,
    cursor: PollCursor,
) -> Result<FetchResult, MailboxError> {
    let mut session = ImapSession::connect(config)?;
    session.select_inbox()?;
    let count = session.message_count()?;

    let mut messages = Vec::new();
    for seq in cursor.pending(count) {
        match session.fetch_message(seq) {
            Ok(raw) => messages.push((seq, raw)),
            Err(e) => error!(seq, error = %e, "Failed to fetch message"),
        }
    }

    session.logout();
    Ok(FetchResult { count, messages })
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::crm::CustomerRecord;
    use crate::error::DatabaseError;

    struct FailingStore;

    #[async_trait]
    impl CustomerStore for FailingStore {
        async fn upsert_partial(
            &self,
            _email: &str,
            _patch: CustomerPatch,
        ) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".to_string()))
        }

        async fn update_fields(
            &self,
            _email: &str,
            _patch: CustomerPatch,
        ) -> Result<(), DatabaseError> {
            Err(DatabaseError::Query("disk full".to_string()))
        }

        async fn get_by_email(
            &self,
            _email: &str,
        ) -> Result<Option<CustomerRecord>, DatabaseError> {
            Err(DatabaseError::Query("disk full".to_string()))
        }
    }

    #[tokio::test]
    async fn store_failure_does_not_interrupt_the_route() {
        // The reply paths run this before dispatch; a store error must
        // not stop the reply from going out.
        upsert_or_log(&FailingStore, "ana@example.com", CustomerPatch::default()).await;
    }

    #[test]
    fn cursor_starts_unseeded() {
        let cursor = PollCursor::default();
        assert!(!cursor.is_seeded());
        assert!(cursor.pending(42).is_empty());
    }

    #[test]
    fn cursor_pending_range_is_oldest_first() {
        let mut cursor = PollCursor::default();
        cursor.advance(10);
        assert_eq!(cursor.pending(13), vec![11, 12, 13]);
    }

    #[test]
    fn cursor_no_new_mail() {
        let mut cursor = PollCursor::default();
        cursor.advance(10);
        assert!(cursor.pending(10).is_empty());
    }

    #[test]
    fn cursor_never_moves_backward() {
        let mut cursor = PollCursor::default();
        cursor.advance(10);
        // Deleted mail can lower the count; the cursor holds its position
        // and nothing already seen re-surfaces as new.
        assert!(cursor.pending(8).is_empty());
        cursor.advance(8);
        assert!(cursor.pending(9).is_empty());
        assert_eq!(cursor.pending(11), vec![11]);
    }

    #[test]
    fn cursor_advances_past_failures() {
        let mut cursor = PollCursor::default();
        cursor.advance(5);
        cursor.advance(7);
        assert!(cursor.pending(7).is_empty());
        assert_eq!(cursor.pending(8), vec![8]);
    }
}
