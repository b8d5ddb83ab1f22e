//! Snapshot file-name layout.
//!
//! Every snapshot lives directly under the storage directory as
//! `{prefix}-{YYYYMMDDThhmmss}.{profile}.pb.gz`. The timestamp is the
//! cycle's nominal capture time in local time, so all profiles captured in
//! one cycle share it.

use chrono::{DateTime, Local, NaiveDateTime};

use crate::{SNAPSHOT_SUFFIX, TIMESTAMP_FORMAT};

/// Length of a formatted `YYYYMMDDThhmmss` timestamp.
const TIMESTAMP_LEN: usize = 15;

/// Build the file name for one snapshot.
pub fn snapshot_file_name(prefix: &str, timestamp: DateTime<Local>, name: &str) -> String {
    format!(
        "{}-{}.{}{}",
        prefix,
        timestamp.format(TIMESTAMP_FORMAT),
        name,
        SNAPSHOT_SUFFIX
    )
}

/// Components recovered from a snapshot file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFileName {
    pub prefix: String,
    pub timestamp: NaiveDateTime,
    pub profile: String,
}

/// Parse a file name produced by [`snapshot_file_name`].
///
/// Returns `None` for anything that is not a snapshot file (foreign files in
/// the storage directory are common and simply ignored). The prefix may
/// contain `-` and `.`; the profile name may not contain `.`.
pub fn parse_snapshot_file_name(file_name: &str) -> Option<SnapshotFileName> {
    let stem = file_name.strip_suffix(SNAPSHOT_SUFFIX)?;
    let (head, profile) = stem.rsplit_once('.')?;
    if profile.is_empty() {
        return None;
    }

    if head.len() < TIMESTAMP_LEN + 1 || !head.is_char_boundary(head.len() - TIMESTAMP_LEN) {
        return None;
    }
    let (prefix_dash, ts) = head.split_at(head.len() - TIMESTAMP_LEN);
    let prefix = prefix_dash.strip_suffix('-')?;
    let timestamp = NaiveDateTime::parse_from_str(ts, TIMESTAMP_FORMAT).ok()?;

    Some(SnapshotFileName {
        prefix: prefix.to_string(),
        timestamp,
        profile: profile.to_string(),
    })
}
