//! Log keys and entry ids.
//!
//! A log is addressed by `"<userId>-<sessionId>"` and its entries by
//! `"<millis>-<seq>"`, the id format used by Redis streams. Entry ids compare
//! numerically on the millisecond part first, then on the sequence, which is
//! the order the backend keeps its entries in.

use std::{fmt, str::FromStr};

use uuid::Uuid;

/// Length of the canonical hyphenated UUID text form.
const UUID_TEXT_LEN: usize = 36;

/// Build the log key for a (user, session) pair.
///
/// Both halves use the fixed-width hyphenated form, so the separator always
/// sits at byte 36 and the key can be split back unambiguously.
pub fn log_key(user_id: &Uuid, session_id: &Uuid) -> String {
    format!("{}-{}", user_id.hyphenated(), session_id.hyphenated())
}

/// Split a log key back into its (user, session) pair.
pub fn parse_log_key(key: &str) -> Option<(Uuid, Uuid)> {
    if key.len() != UUID_TEXT_LEN * 2 + 1 || key.as_bytes()[UUID_TEXT_LEN] != b'-' {
        return None;
    }
    let user_id = Uuid::try_parse(&key[..UUID_TEXT_LEN]).ok()?;
    let session_id = Uuid::try_parse(&key[UUID_TEXT_LEN + 1..]).ok()?;
    Some((user_id, session_id))
}

/// Entry id for a message appended at `timestamp_millis`.
///
/// The sequence part is always zero: two appends to the same log within one
/// millisecond resolve to the same id and the backend rejects the second.
pub fn entry_id(timestamp_millis: u64) -> EntryId {
    EntryId::new(timestamp_millis, 0)
}

/// Inclusive lower bound for a range scan starting at `timestamp_millis`.
pub fn lower_bound_entry_id(timestamp_millis: u64) -> EntryId {
    EntryId::new(timestamp_millis, 0)
}

/// Position of an entry within a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    millis: u64,
    seq: u64,
}

impl EntryId {
    /// `0-0`, which no backend accepts as an append id.
    pub const MIN: EntryId = EntryId { millis: 0, seq: 0 };

    pub const fn new(millis: u64, seq: u64) -> Self {
        Self { millis, seq }
    }

    /// Milliseconds part, the append timestamp.
    pub fn millis(&self) -> u64 {
        self.millis
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid entry id: {0}")]
pub struct ParseEntryIdError(String);

impl FromStr for EntryId {
    type Err = ParseEntryIdError;

    /// Accepts `"<ms>-<seq>"` and a bare `"<ms>"` (sequence 0).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseEntryIdError(s.to_string());
        let (millis, seq) = match s.split_once('-') {
            Some((millis, seq)) => (millis, seq),
            None => (s, "0"),
        };
        let millis = millis.parse().map_err(|_| invalid())?;
        let seq = seq.parse().map_err(|_| invalid())?;
        Ok(EntryId { millis, seq })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uuid(s: &str) -> Uuid {
        Uuid::parse_str(s).unwrap()
    }

    #[test]
    fn test_log_key_format() {
        let key = log_key(
            &uuid("11111111-1111-1111-1111-111111111111"),
            &uuid("22222222-2222-2222-2222-222222222222"),
        );
        assert_eq!(
            key,
            "11111111-1111-1111-1111-111111111111-22222222-2222-2222-2222-222222222222"
        );
    }

    #[test]
    fn test_log_key_is_deterministic() {
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        assert_eq!(log_key(&user, &session), log_key(&user, &session));
    }

    #[test]
    fn test_log_key_distinguishes_pairs() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        assert_ne!(log_key(&a, &b), log_key(&b, &a));
        assert_ne!(log_key(&a, &a), log_key(&a, &b));
        assert_ne!(log_key(&a, &b), log_key(&b, &b));
    }

    #[test]
    fn test_log_key_uses_lowercase() {
        let user = uuid("AAAAAAAA-AAAA-AAAA-AAAA-AAAAAAAAAAAA");
        let key = log_key(&user, &user);
        assert_eq!(key, key.to_lowercase());
    }

    #[test]
    fn test_parse_log_key_round_trip() {
        let user = Uuid::new_v4();
        let session = Uuid::new_v4();
        let key = log_key(&user, &session);
        assert_eq!(parse_log_key(&key), Some((user, session)));

        assert_eq!(parse_log_key("not-a-key"), None);
        assert_eq!(parse_log_key(&key[1..]), None);
    }

    #[test]
    fn test_entry_id_format() {
        assert_eq!(entry_id(1000).to_string(), "1000-0");
        assert_eq!(lower_bound_entry_id(1500).to_string(), "1500-0");
        assert_eq!(EntryId::MIN.to_string(), "0-0");
    }

    #[test]
    fn test_entry_id_ordering_is_numeric() {
        // String comparison would put "999-0" after "1000-0".
        assert!(entry_id(999) < entry_id(1000));
        assert!(entry_id(1000) < EntryId::new(1000, 1));
        assert!(EntryId::new(1000, u64::MAX) < entry_id(1001));
    }

    #[test]
    fn test_parse_entry_id() {
        assert_eq!("1000-0".parse::<EntryId>(), Ok(EntryId::new(1000, 0)));
        assert_eq!("1000-7".parse::<EntryId>(), Ok(EntryId::new(1000, 7)));
        assert_eq!("1000".parse::<EntryId>(), Ok(EntryId::new(1000, 0)));
        assert!("abc-0".parse::<EntryId>().is_err());
        assert!("1000-".parse::<EntryId>().is_err());
        assert!("-1-0".parse::<EntryId>().is_err());
    }
}
