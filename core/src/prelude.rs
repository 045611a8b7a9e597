use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::capture::DecodeError;
use crate::store::StoreError;

/// Time resolution of a rollup bucket, ordered from finest to coarsest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Raw,
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Resolution {
    /// Rollup order used by the rule set.
    pub const ALL: [Resolution; 5] = [
        Resolution::Raw,
        Resolution::Hourly,
        Resolution::Daily,
        Resolution::Weekly,
        Resolution::Monthly,
    ];

    /// The resolution this one rolls up from.
    pub fn parent(self) -> Option<Resolution> {
        match self {
            Resolution::Raw => None,
            Resolution::Hourly => Some(Resolution::Raw),
            Resolution::Daily => Some(Resolution::Hourly),
            Resolution::Weekly => Some(Resolution::Daily),
            Resolution::Monthly => Some(Resolution::Weekly),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Raw => "raw",
            Resolution::Hourly => "hourly",
            Resolution::Daily => "daily",
            Resolution::Weekly => "weekly",
            Resolution::Monthly => "monthly",
        }
    }

    /// Start of the bucket containing `timestamp`.
    ///
    /// Raw buckets are the timestamp itself; weeks start on Monday and all
    /// boundaries are in UTC.
    pub fn bucket_start(self, timestamp: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
        let date = timestamp.date_naive();
        let start = match self {
            Resolution::Raw => return Ok(timestamp),
            Resolution::Hourly => date.and_hms_opt(timestamp.hour(), 0, 0),
            Resolution::Daily => date.and_hms_opt(0, 0, 0),
            Resolution::Weekly => {
                let back = i64::from(date.weekday().num_days_from_monday());
                (date - Duration::days(back)).and_hms_opt(0, 0, 0)
            }
            Resolution::Monthly => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
                .and_then(|first| first.and_hms_opt(0, 0, 0)),
        };
        start
            .map(|naive| naive.and_utc())
            .ok_or_else(|| CoreError::Timestamp(format!("{} bucket of {}", self.as_str(), timestamp)))
    }

    /// Exclusive end of the bucket that starts at `start`.
    pub fn bucket_end(self, start: DateTime<Utc>) -> CoreResult<DateTime<Utc>> {
        let end = match self {
            Resolution::Raw => start.checked_add_signed(Duration::milliseconds(1)),
            Resolution::Hourly => start.checked_add_signed(Duration::hours(1)),
            Resolution::Daily => start.checked_add_signed(Duration::days(1)),
            Resolution::Weekly => start.checked_add_signed(Duration::weeks(1)),
            Resolution::Monthly => start.checked_add_months(Months::new(1)),
        };
        end.ok_or_else(|| CoreError::Timestamp(format!("{} bucket end after {}", self.as_str(), start)))
    }
}

impl std::fmt::Display for Resolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary value kept per frequency bin of a rollup bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingKind {
    Minimum,
    Maximum,
    Average,
}

impl ReadingKind {
    pub const ALL: [ReadingKind; 3] = [ReadingKind::Minimum, ReadingKind::Maximum, ReadingKind::Average];
}

/// Common error type for the ingestion core.
#[derive(thiserror::Error, Debug)]
pub enum CoreError {
    #[error("cell ({row}, {col}) out of bounds for {rows}x{cols} block")]
    OutOfBounds {
        row: usize,
        col: usize,
        rows: usize,
        cols: usize,
    },
    #[error("tiling error: {0}")]
    Tiling(String),
    #[error("invalid timestamp: {0}")]
    Timestamp(String),
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("unknown station: {0}")]
    UnknownStation(String),
    #[error("unknown storage target: {0}")]
    UnknownTarget(String),
    #[error("rule task failed: {0}")]
    Task(String),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn bucket_starts_truncate_to_resolution() {
        // 2024-05-16 is a Thursday.
        let ts = at(2024, 5, 16, 13, 45);
        assert_eq!(Resolution::Raw.bucket_start(ts).unwrap(), ts);
        assert_eq!(Resolution::Hourly.bucket_start(ts).unwrap(), at(2024, 5, 16, 13, 0));
        assert_eq!(Resolution::Daily.bucket_start(ts).unwrap(), at(2024, 5, 16, 0, 0));
        assert_eq!(Resolution::Weekly.bucket_start(ts).unwrap(), at(2024, 5, 13, 0, 0));
        assert_eq!(Resolution::Monthly.bucket_start(ts).unwrap(), at(2024, 5, 1, 0, 0));
    }

    #[test]
    fn monthly_bucket_end_follows_calendar() {
        let start = at(2024, 2, 1, 0, 0);
        assert_eq!(Resolution::Monthly.bucket_end(start).unwrap(), at(2024, 3, 1, 0, 0));
    }

    #[test]
    fn parents_chain_back_to_raw() {
        let mut chain = vec![Resolution::Monthly];
        while let Some(parent) = chain.last().and_then(|r| r.parent()) {
            chain.push(parent);
        }
        chain.reverse();
        assert_eq!(chain, Resolution::ALL.to_vec());
    }
}
