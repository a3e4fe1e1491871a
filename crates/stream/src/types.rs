//! Core types for the message log service.

use std::{collections::HashMap, time::Duration};

use chrono::Utc;
use uuid::Uuid;

use crate::keys::{self, EntryId};

/// Field under which a message body is stored in each record.
pub const MESSAGE_FIELD: &str = "message";

/// Default sliding expiry of a log.
pub const DEFAULT_LOG_TTL: Duration = Duration::from_secs(60 * 60);

/// A message logged in a (user, session) log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub user_id: Uuid,
    pub session_id: Uuid,
    /// Append time in milliseconds since epoch, assigned by the server
    pub timestamp: u64,
    /// Message body
    pub text: String,
}

impl Message {
    /// Create a message stamped with the current wall-clock time.
    pub fn now(user_id: Uuid, session_id: Uuid, text: impl Into<String>) -> Self {
        Self {
            user_id,
            session_id,
            timestamp: now_millis(),
            text: text.into(),
        }
    }

    /// Key of the log this message belongs to.
    pub fn log_key(&self) -> String {
        keys::log_key(&self.user_id, &self.session_id)
    }

    /// Entry id this message is appended at.
    pub fn entry_id(&self) -> EntryId {
        keys::entry_id(self.timestamp)
    }
}

/// A record returned by a backend range scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub id: EntryId,
    /// Raw field values; a backend makes no promise they are UTF-8
    pub fields: HashMap<String, Vec<u8>>,
}

impl Record {
    /// The message body, if present and valid UTF-8.
    pub fn message(&self) -> Option<&str> {
        self.fields
            .get(MESSAGE_FIELD)
            .and_then(|raw| std::str::from_utf8(raw).ok())
    }
}

/// Server configuration options.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    /// Port to listen on (0 for auto-assign)
    pub port: u16,
    /// Host to bind to
    pub host: String,
    /// Deadline for a single store call made on behalf of a request
    pub request_timeout: Duration,
    /// How long in-flight requests may take to drain on shutdown
    pub shutdown_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            request_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

/// Current wall-clock time in milliseconds since epoch.
pub fn now_millis() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_keys() {
        let user_id = Uuid::parse_str("11111111-1111-1111-1111-111111111111").unwrap();
        let session_id = Uuid::parse_str("22222222-2222-2222-2222-222222222222").unwrap();
        let message = Message {
            user_id,
            session_id,
            timestamp: 1000,
            text: "hi".to_string(),
        };

        assert_eq!(message.log_key(), keys::log_key(&user_id, &session_id));
        assert_eq!(message.entry_id().to_string(), "1000-0");
    }

    #[test]
    fn test_message_now_is_stamped() {
        let before = now_millis();
        let message = Message::now(Uuid::new_v4(), Uuid::new_v4(), "hello");
        assert!(message.timestamp >= before);
        assert_eq!(message.text, "hello");
    }

    #[test]
    fn test_record_message_field() {
        let mut fields = HashMap::new();
        fields.insert(MESSAGE_FIELD.to_string(), b"hello".to_vec());
        let record = Record {
            id: keys::entry_id(1),
            fields,
        };
        assert_eq!(record.message(), Some("hello"));

        let corrupt = Record {
            id: keys::entry_id(2),
            fields: HashMap::from([(MESSAGE_FIELD.to_string(), vec![0xff, 0xfe])]),
        };
        assert_eq!(corrupt.message(), None);

        let missing = Record {
            id: keys::entry_id(3),
            fields: HashMap::from([("other".to_string(), b"x".to_vec())]),
        };
        assert_eq!(missing.message(), None);
    }
}
