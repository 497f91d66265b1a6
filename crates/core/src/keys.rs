//! Storage key layout shared by the capture, replay and retention engines.
//!
//! ```text
//! continuous/<YYYY-MM-DD>/<signal>/<HHMMSSmmm>-<id>.bin[.gz]
//! sessions/<sessionId>/metadata.json
//! sessions/<sessionId>/<signal>/<sequence>.bin[.gz]
//! archive/sessions/<sessionId>/<signal>/<sequence>.bin[.gz]
//! ```
//!
//! The layout is shared with existing deployments and must not change.

use chrono::{DateTime, NaiveDate, Utc};

use crate::error::{Error, Result};
use crate::types::SignalType;

pub const CONTINUOUS_PREFIX: &str = "continuous/";
pub const SESSIONS_PREFIX: &str = "sessions/";
pub const ARCHIVE_PREFIX: &str = "archive/";
pub const METADATA_FILE: &str = "metadata.json";

const RECORD_EXT: &str = ".bin";
const GZIP_EXT: &str = ".gz";

/// Reject ids that would escape their key prefix.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty()
        || session_id.contains('/')
        || session_id == "."
        || session_id == ".."
        || session_id.chars().any(char::is_control)
    {
        return Err(Error::invalid_request(format!(
            "invalid session id '{}'",
            session_id
        )));
    }
    Ok(())
}

pub fn session_prefix(session_id: &str) -> String {
    format!("{}{}/", SESSIONS_PREFIX, session_id)
}

pub fn metadata_key(session_id: &str) -> String {
    format!("{}{}/{}", SESSIONS_PREFIX, session_id, METADATA_FILE)
}

pub fn signal_prefix(session_id: &str, signal: SignalType) -> String {
    format!("{}{}/{}/", SESSIONS_PREFIX, session_id, signal)
}

fn record_suffix(compressed: bool) -> &'static str {
    if compressed {
        ".bin.gz"
    } else {
        RECORD_EXT
    }
}

/// Key of a session record.
pub fn record_key(session_id: &str, signal: SignalType, sequence: u64, compressed: bool) -> String {
    format!(
        "{}{}{}",
        signal_prefix(session_id, signal),
        sequence,
        record_suffix(compressed)
    )
}

/// Key of a live object once moved to the archive tier.
pub fn archive_key(key: &str) -> String {
    format!("{}{}", ARCHIVE_PREFIX, key)
}

pub fn archived_session_prefix(session_id: &str) -> String {
    archive_key(&session_prefix(session_id))
}

/// Key of an always-on capture object.
pub fn continuous_key(
    at: DateTime<Utc>,
    signal: SignalType,
    object_id: &str,
    compressed: bool,
) -> String {
    format!(
        "{}{}/{}/{}-{}{}",
        CONTINUOUS_PREFIX,
        at.format("%Y-%m-%d"),
        signal,
        at.format("%H%M%S%3f"),
        object_id,
        record_suffix(compressed)
    )
}

/// Capture date encoded in a `continuous/<date>/...` key.
pub fn continuous_date(key: &str) -> Option<NaiveDate> {
    let rest = key.strip_prefix(CONTINUOUS_PREFIX)?;
    let date = rest.split('/').next()?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// What a key under `sessions/` points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionObject {
    Metadata,
    Record { signal: SignalType, sequence: u64 },
    Other,
}

/// Split a `sessions/<id>/...` key into its session id and object kind.
pub fn parse_session_key(key: &str) -> Option<(&str, SessionObject)> {
    let rest = key.strip_prefix(SESSIONS_PREFIX)?;
    let (session_id, tail) = rest.split_once('/')?;
    if session_id.is_empty() {
        return None;
    }
    if tail == METADATA_FILE {
        return Some((session_id, SessionObject::Metadata));
    }
    let object = tail
        .split_once('/')
        .and_then(|(signal, file)| {
            let signal = signal.parse::<SignalType>().ok()?;
            let stem = file.strip_suffix(GZIP_EXT).unwrap_or(file);
            let sequence = stem.strip_suffix(RECORD_EXT)?.parse::<u64>().ok()?;
            Some(SessionObject::Record { signal, sequence })
        })
        .unwrap_or(SessionObject::Other);
    Some((session_id, object))
}
