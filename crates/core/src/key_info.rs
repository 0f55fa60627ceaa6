//! Key metadata projected from stored records.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Metadata about a stored key, without its value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// The record key.
    pub key: String,
    /// Value length in bytes.
    pub size: u64,
    /// Last write time, as stamped by the backend.
    #[serde(with = "time::serde::rfc3339")]
    pub modified: OffsetDateTime,
    /// Whether the key is a leaf in the hierarchy.
    ///
    /// Always true for stored records: directories are synthesized from
    /// prefixes and never stored.
    pub is_terminal: bool,
}

impl KeyInfo {
    /// Project raw column values into key metadata.
    ///
    /// Lossy rather than fallible: a negative size reads as zero and a
    /// timestamp outside the representable range reads as the Unix epoch.
    pub fn project(key: impl Into<String>, size: i64, modified_at_ms: i64) -> Self {
        Self {
            key: key.into(),
            size: u64::try_from(size).unwrap_or(0),
            modified: millis_to_datetime(modified_at_ms),
            is_terminal: true,
        }
    }
}

/// Convert epoch milliseconds to a UTC timestamp, falling back to the epoch.
pub fn millis_to_datetime(ms: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(ms) * 1_000_000)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH)
}

/// Convert a timestamp to epoch milliseconds, the stored representation.
pub fn datetime_to_millis(at: OffsetDateTime) -> i64 {
    let ms = at.unix_timestamp_nanos() / 1_000_000;
    i64::try_from(ms).unwrap_or(if ms < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_project_maps_columns() {
        let info = KeyInfo::project("certs/a.crt", 9, 1_700_000_000_123);
        assert_eq!(info.key, "certs/a.crt");
        assert_eq!(info.size, 9);
        assert_eq!(info.modified, datetime!(2023-11-14 22:13:20.123 UTC));
        assert!(info.is_terminal);
    }

    #[test]
    fn test_project_degrades_out_of_range_timestamp() {
        let info = KeyInfo::project("k", 1, i64::MAX);
        assert_eq!(info.modified, OffsetDateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_project_clamps_negative_size() {
        let info = KeyInfo::project("k", -4, 0);
        assert_eq!(info.size, 0);
        assert_eq!(info.modified, OffsetDateTime::UNIX_EPOCH);
    }

    #[test]
    fn test_millis_conversion_is_symmetric_at_millisecond_precision() {
        let at = datetime!(2024-02-29 12:00:00.250 UTC);
        assert_eq!(millis_to_datetime(datetime_to_millis(at)), at);
    }
}
