//! Key layout of a time series.
//!
//! These are pure functions of the series name, the bucket width and an instant.
//! Nothing is cached, so a bucket never has to be created or deleted explicitly.
//!
//! Buckets are aligned to the Unix epoch. Writers that truncate relative to
//! another origin, such as Go's `time.Truncate` (January 1, year 1), only agree
//! with these keys when the width divides a day. A 7 s width, for one, is
//! shifted by 4 s.

use std::time::Duration;

use chrono::{DateTime, Utc};

const COUNTER_PREFIX: &str = "counter";
const SERIES_PREFIX: &str = "ts";

/// The counter and sorted-set keys of one bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketKeys {
    pub counter: String,
    pub series: String,
}

impl BucketKeys {
    /// Keys of the bucket starting at `bucket_secs` (Unix seconds).
    pub fn new(name: &str, bucket_secs: i64) -> Self {
        Self {
            counter: format!("{}:{}:{}", name, COUNTER_PREFIX, bucket_secs),
            series: series_key(name, bucket_secs),
        }
    }

    /// Keys of the bucket `at` falls into.
    pub fn for_instant(name: &str, at: &DateTime<Utc>, timestep: Duration) -> Option<Self> {
        bucket_epoch_secs(at, timestep).map(|secs| Self::new(name, secs))
    }
}

#[inline]
pub(crate) fn series_key(name: &str, bucket_secs: i64) -> String {
    format!("{}:{}:{}", name, SERIES_PREFIX, bucket_secs)
}

/// Sorted-set member name for the event that drew `id` from the bucket counter.
#[inline]
pub fn member(name: &str, id: i64) -> String {
    format!("{}:{}", name, id)
}

/// Bucket width in milliseconds. Keys carry whole seconds, so widths under a
/// second would fold several buckets into one key and are refused.
#[inline]
pub(crate) fn step_millis(timestep: Duration) -> Option<i64> {
    match i64::try_from(timestep.as_millis()) {
        Ok(step) if step >= 1000 => Some(step),
        _ => None,
    }
}

/// Truncates a millisecond timestamp down to a multiple of `step`.
/// Timestamps before the epoch round towards negative infinity.
#[inline]
pub(crate) fn truncate_millis(millis: i64, step: i64) -> i64 {
    millis - millis.rem_euclid(step)
}

#[inline]
pub(crate) fn epoch_secs(millis: i64) -> i64 {
    millis.div_euclid(1000)
}

/// Unix seconds of the start of the bucket containing `at`.
///
/// Returns `None` if `timestep` is shorter than a second.
pub fn bucket_epoch_secs(at: &DateTime<Utc>, timestep: Duration) -> Option<i64> {
    let step = step_millis(timestep)?;
    Some(epoch_secs(truncate_millis(at.timestamp_millis(), step)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn keys_follow_naming_contract() {
        let keys = BucketKeys::new("logins", 1_700_000_040);
        assert_eq!(keys.counter, "logins:counter:1700000040");
        assert_eq!(keys.series, "logins:ts:1700000040");
        assert_eq!(member("logins", 17), "logins:17");
    }

    #[test]
    fn instants_in_the_same_bucket_share_keys() {
        let step = Duration::from_secs(60);
        let a = BucketKeys::for_instant("x", &at(1_000_020), step).unwrap();
        let b = BucketKeys::for_instant("x", &at(1_000_079), step).unwrap();
        let c = BucketKeys::for_instant("x", &at(1_000_080), step).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.series, "x:ts:1000020");
        assert_ne!(a, c);
        assert_eq!(c.series, "x:ts:1000080");
    }

    #[test]
    fn truncation_floors_before_epoch() {
        let step = Duration::from_secs(10);
        assert_eq!(bucket_epoch_secs(&at(-1), step), Some(-10));
        assert_eq!(bucket_epoch_secs(&at(-10), step), Some(-10));
        assert_eq!(bucket_epoch_secs(&at(0), step), Some(0));
        assert_eq!(bucket_epoch_secs(&at(9), step), Some(0));
    }

    #[test]
    fn buckets_align_to_unix_epoch() {
        let step = Duration::from_secs(7);
        assert_eq!(bucket_epoch_secs(&at(0), step), Some(0));
        assert_eq!(bucket_epoch_secs(&at(10), step), Some(7));
        assert_eq!(bucket_epoch_secs(&at(13), step), Some(7));
        assert_eq!(bucket_epoch_secs(&at(14), step), Some(14));
    }

    #[test]
    fn sub_second_instants_truncate_to_bucket() {
        let step = Duration::from_secs(1);
        let t = DateTime::from_timestamp_millis(5_999).unwrap();
        assert_eq!(bucket_epoch_secs(&t, step), Some(5));
    }

    #[test]
    fn sub_second_timestep_has_no_buckets() {
        assert_eq!(bucket_epoch_secs(&at(42), Duration::ZERO), None);
        assert_eq!(bucket_epoch_secs(&at(42), Duration::from_millis(999)), None);
        assert_eq!(bucket_epoch_secs(&at(43), Duration::from_millis(1500)), Some(42));
        assert!(BucketKeys::for_instant("x", &at(42), Duration::ZERO).is_none());
    }
}
