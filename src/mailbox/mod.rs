//! Inbox polling and message routing.
//!
//! `poller` drives the cycle loop; `imap` is the blocking wire protocol;
//! `message` parses raw messages. Routing itself is a pure function over
//! word count and the presence of media attachments, so it lives here
//! where it can be tested without any I/O.

pub mod imap;
pub mod message;
pub mod poller;

/// Minimum body word count for the full triage pipeline.
pub const MIN_TRIAGE_WORDS: usize = 30;

/// Below this word count, an email carrying media attachments is treated
/// as an audio query and its text is ignored.
pub const MEDIA_TEXT_WORD_LIMIT: usize = 20;

/// Canned reply sent for text queries under [`MIN_TRIAGE_WORDS`] words.
pub const SHORT_TEXT_REPLY: (&str, &str) = (
    "Additional Information Required",
    "Thank you for contacting us. Your query appears to be too brief for us to \
     understand your specific needs. Please send us a more detailed description of \
     your issue or question (at least 30 words) so we can assist you properly.",
);

/// Canned reply sent for audio recordings under the minimum duration.
pub const SHORT_AUDIO_REPLY: (&str, &str) = (
    "Additional Information Required",
    "Thank you for your audio message. Unfortunately, the recording is too short \
     for us to properly understand your query. Please send a longer audio recording \
     (at least 5 seconds) or provide your query in text format with sufficient details.",
);

/// What to do with one inbound email.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Empty body and nothing to transcribe.
    Drop,
    /// Media attachments with little or no accompanying text; the audio
    /// batch pass handles the reply.
    AudioOnly,
    /// Body too short to triage; send the canned short-text reply.
    ShortText,
    /// Full triage pipeline.
    Triage,
}

/// Decide the route for a message from its word count and whether it
/// carried supported media attachments.
pub fn route_message(word_count: usize, has_media: bool) -> Route {
    if has_media && word_count < MEDIA_TEXT_WORD_LIMIT {
        return Route::AudioOnly;
    }
    if word_count == 0 {
        return Route::Drop;
    }
    if word_count < MIN_TRIAGE_WORDS {
        return Route::ShortText;
    }
    Route::Triage
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_with_short_text_routes_to_audio() {
        assert_eq!(route_message(0, true), Route::AudioOnly);
        assert_eq!(route_message(19, true), Route::AudioOnly);
    }

    #[test]
    fn media_with_long_text_routes_to_text_path() {
        assert_eq!(route_message(20, true), Route::ShortText);
        assert_eq!(route_message(30, true), Route::Triage);
    }

    #[test]
    fn empty_body_without_media_is_dropped() {
        assert_eq!(route_message(0, false), Route::Drop);
    }

    #[test]
    fn short_text_gets_canned_reply() {
        assert_eq!(route_message(1, false), Route::ShortText);
        assert_eq!(route_message(29, false), Route::ShortText);
    }

    #[test]
    fn long_text_is_triaged() {
        assert_eq!(route_message(30, false), Route::Triage);
        assert_eq!(route_message(500, false), Route::Triage);
    }
}
