//! Display Helpers
//!
//! Pure functions a render layer uses to draw the conversation: avatar
//! initials, time and latency formatting, message grouping with date
//! separators, plus the anonymous identity and WebSocket endpoint derivation.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, TimeZone};
use rand::Rng;

use crate::messages::Message;

/// Text of the welcome bubble shown while the conversation is empty
pub const WELCOME_TEXT: &str = "Hey there 👋\nHow can I help you today?";

/// Domain used for anonymous user identities
pub const ANONYMOUS_EMAIL_DOMAIN: &str = "webchat.genistudio.com";

const USER_ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const USER_ID_LEN: usize = 13;

/// Two-letter abbreviation for an avatar
///
/// A single word yields its first two letters, several words yield the
/// initials of the first and last word.
#[must_use]
pub fn abbreviation(name: &str) -> String {
    let words: Vec<&str> = name.split_whitespace().collect();
    match words.as_slice() {
        [] => String::new(),
        [only] => only.chars().take(2).collect::<String>().to_uppercase(),
        [first, .., last] => first
            .chars()
            .take(1)
            .chain(last.chars().take(1))
            .collect::<String>()
            .to_uppercase(),
    }
}

/// Format a Unix-millisecond timestamp as local `HH:MM`
#[must_use]
pub fn format_time(timestamp_ms: i64) -> String {
    local_datetime(timestamp_ms)
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_default()
}

/// Format a response latency
///
/// Sub-second values print in milliseconds, sub-minute values in seconds
/// with two decimals, anything longer as minutes and seconds.
#[must_use]
pub fn format_response_time(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs < 1.0 {
        format!("{}ms", (secs * 1000.0).round() as u64)
    } else if secs < 60.0 {
        format!("{secs:.2}s")
    } else {
        let minutes = (secs / 60.0).floor() as u64;
        let remaining = secs % 60.0;
        format!("{minutes}m {remaining:.1}s")
    }
}

/// Label for a date separator
#[must_use]
pub fn date_label(date: NaiveDate, today: NaiveDate) -> String {
    if date == today {
        "Today".to_string()
    } else if today.pred_opt() == Some(date) {
        "Yesterday".to_string()
    } else {
        date.format("%b %-d, %Y").to_string()
    }
}

/// Local calendar date of a Unix-millisecond timestamp
#[must_use]
pub fn local_date(timestamp_ms: i64) -> Option<NaiveDate> {
    local_datetime(timestamp_ms).map(|dt| dt.date_naive())
}

fn local_datetime(timestamp_ms: i64) -> Option<DateTime<Local>> {
    Local.timestamp_millis_opt(timestamp_ms).single()
}

/// Grouping information for one rendered message
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MessageGroupInfo {
    /// Starts a run of messages from the same sender
    pub is_first_in_group: bool,
    /// Ends a run of messages from the same sender
    pub is_last_in_group: bool,
    /// A date separator goes above this message
    pub needs_date_separator: bool,
}

/// Compute grouping for consecutive messages from the same sender
///
/// A group breaks on a sender change or when the local calendar day changes.
/// The returned vector is parallel to `messages`.
#[must_use]
pub fn group_messages(messages: &[Message]) -> Vec<MessageGroupInfo> {
    let new_day = |current: &Message, previous: Option<&Message>| match previous {
        None => true,
        Some(previous) => local_date(current.timestamp) != local_date(previous.timestamp),
    };

    messages
        .iter()
        .enumerate()
        .map(|(idx, message)| {
            let prev = idx.checked_sub(1).and_then(|i| messages.get(i));
            let next = messages.get(idx + 1);
            let needs_date_separator = new_day(message, prev);

            let is_first_in_group = match prev {
                None => true,
                Some(prev) => prev.sender != message.sender || needs_date_separator,
            };
            let is_last_in_group = match next {
                None => true,
                Some(next) => next.sender != message.sender || new_day(next, Some(message)),
            };

            MessageGroupInfo {
                is_first_in_group,
                is_last_in_group,
                needs_date_separator,
            }
        })
        .collect()
}

/// Random anonymous user id: `web_` plus 13 base36 characters
#[must_use]
pub fn generate_user_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..USER_ID_LEN)
        .map(|_| USER_ID_ALPHABET[rng.gen_range(0..USER_ID_ALPHABET.len())] as char)
        .collect();
    format!("web_{suffix}")
}

/// Anonymous email identity for users who did not supply one
#[must_use]
pub fn anonymous_email() -> String {
    format!("{}@{ANONYMOUS_EMAIL_DOMAIN}", generate_user_id())
}

/// Derive the WebSocket endpoint from the HTTP API URL
///
/// Swaps the leading `http` for `ws` (so `https` becomes `wss`) and appends
/// `/webchat/ws`.
#[must_use]
pub fn websocket_url(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let base = match base.strip_prefix("http") {
        Some(rest) => format!("ws{rest}"),
        None => base.to_string(),
    };
    format!("{base}/webchat/ws")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::Sender;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_abbreviation() {
        assert_eq!(abbreviation("GeniStudio Support"), "GS");
        assert_eq!(abbreviation("assistant"), "AS");
        assert_eq!(abbreviation("  ada  lovelace  byron "), "AB");
        assert_eq!(abbreviation("x"), "X");
        assert_eq!(abbreviation("   "), "");
    }

    #[test]
    fn test_format_response_time() {
        assert_eq!(format_response_time(Duration::from_millis(42)), "42ms");
        assert_eq!(format_response_time(Duration::from_millis(999)), "999ms");
        assert_eq!(format_response_time(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_response_time(Duration::from_millis(59_990)), "59.99s");
        assert_eq!(format_response_time(Duration::from_millis(75_500)), "1m 15.5s");
    }

    #[test]
    fn test_date_label() {
        let today = NaiveDate::from_ymd_opt(2024, 3, 10).unwrap();
        assert_eq!(date_label(today, today), "Today");
        assert_eq!(
            date_label(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(), today),
            "Yesterday"
        );
        assert_eq!(
            date_label(NaiveDate::from_ymd_opt(2024, 1, 5).unwrap(), today),
            "Jan 5, 2024"
        );
    }

    #[test]
    fn test_generate_user_id() {
        let id = generate_user_id();
        assert!(id.starts_with("web_"));
        assert_eq!(id.len(), 4 + USER_ID_LEN);
        assert!(id[4..]
            .chars()
            .all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_ne!(generate_user_id(), id);
    }

    #[test]
    fn test_anonymous_email() {
        let email = anonymous_email();
        assert!(email.starts_with("web_"));
        assert!(email.ends_with("@webchat.genistudio.com"));
    }

    #[test]
    fn test_websocket_url() {
        assert_eq!(
            websocket_url("http://localhost:3000"),
            "ws://localhost:3000/webchat/ws"
        );
        assert_eq!(
            websocket_url("https://chat.example.com/"),
            "wss://chat.example.com/webchat/ws"
        );
    }

    fn message_at(sender: Sender, timestamp: i64) -> Message {
        let mut message = match sender {
            Sender::User => Message::user("x"),
            Sender::Bot => Message::bot("x"),
        };
        message.timestamp = timestamp;
        message
    }

    #[test]
    fn test_group_messages() {
        // 2024-03-10 12:00:00 UTC and a few minutes after
        let base = 1_710_072_000_000;
        let minute = 60_000;
        let messages = vec![
            message_at(Sender::User, base),
            message_at(Sender::Bot, base + minute),
            message_at(Sender::Bot, base + 2 * minute),
            message_at(Sender::User, base + 3 * minute),
            // Three days later
            message_at(Sender::User, base + 3 * 24 * 60 * minute),
        ];

        let groups = group_messages(&messages);
        assert_eq!(groups.len(), 5);

        assert!(groups[0].needs_date_separator);
        assert!(groups[0].is_first_in_group && groups[0].is_last_in_group);

        assert!(groups[1].is_first_in_group);
        assert!(!groups[1].is_last_in_group);
        assert!(!groups[2].is_first_in_group);
        assert!(groups[2].is_last_in_group);
        assert!(!groups[2].needs_date_separator);

        assert!(groups[3].is_last_in_group);
        assert!(groups[4].needs_date_separator);
        assert!(groups[4].is_first_in_group);
    }

    #[test]
    fn test_group_messages_empty() {
        assert!(group_messages(&[]).is_empty());
    }
}
