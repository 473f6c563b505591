//! Named timestamp checkpoints.
//!
//! Values are stored as RFC 3339 strings at whole-second precision, so any
//! sub-second part of a timestamp is lost on the way in.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

/// The sync cursors this service keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKey {
    /// Feed change time up to which repo-based evaluation has been dispatched.
    LastEvalRepoBased,
    /// Completion time of the last successful pass.
    LastSync,
    /// Completion time of the last pass that swept the feed from the start.
    LastFullSync,
    /// Feed export time seen by the last successful pass.
    LastExport,
}

impl CheckpointKey {
    pub const ALL: [CheckpointKey; 4] = [
        CheckpointKey::LastEvalRepoBased,
        CheckpointKey::LastSync,
        CheckpointKey::LastFullSync,
        CheckpointKey::LastExport,
    ];

    /// Row name in the checkpoint table.
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckpointKey::LastEvalRepoBased => "last_eval_repo_based",
            CheckpointKey::LastSync => "last_sync",
            CheckpointKey::LastFullSync => "last_full_sync",
            CheckpointKey::LastExport => "last_export",
        }
    }
}

impl fmt::Display for CheckpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renders a timestamp the way it is stored.
pub fn format_checkpoint(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parses a stored checkpoint value.
pub fn parse_checkpoint(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(value).map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stored_form_truncates_sub_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 5, 6, 39, 53).unwrap()
            + chrono::Duration::microseconds(553_807);
        assert_eq!(format_checkpoint(&ts), "2024-01-05T06:39:53Z");
    }

    #[test]
    fn parse_accepts_offsets() {
        let ts = parse_checkpoint("2018-09-22T12:00:00-04:00").unwrap();
        assert_eq!(format_checkpoint(&ts), "2018-09-22T16:00:00Z");
    }

    #[test]
    fn key_names_are_distinct() {
        let names: std::collections::BTreeSet<_> =
            CheckpointKey::ALL.iter().map(|k| k.as_str()).collect();
        assert_eq!(names.len(), CheckpointKey::ALL.len());
    }
}
