//! Bucketed event counters kept in an ordered key-value store.
//!
//! Each event is stored in the bucket its timestamp truncates into. A bucket is a
//! pair of keys: a counter handing out unique member ids and a sorted set whose
//! members are scored by the event's Unix timestamp.
//!
//! ```text
//! <name>:counter:<bucket secs>   -> INCR counter
//! <name>:ts:<bucket secs>        -> sorted set of "<name>:<id>" scored by event secs
//! ```
//!
//! Both keys expire `ttl` seconds after the last write to the bucket.
//!
//! ## Example
//! ```rust,ignore
//! let series = TimeSeries::new("logins", Duration::from_secs(60), Duration::from_secs(3600), MemStore::new())?;
//! series.incr_at(3, now).await?;
//! let total = series.range(now - chrono::Duration::minutes(5), now).await?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use crate::error::{Error, Result, StoreOp};
pub use crate::keys::{bucket_epoch_secs, BucketKeys};
pub use crate::store::{MemStore, Store};
pub use crate::timeseries::TimeSeries;

mod error;
pub mod keys;
mod store;
mod timeseries;

/// What to do when refreshing a bucket's expiry fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpireErrors {
    /// Return the error to the caller.
    #[default]
    Propagate,
    /// Log a warning and carry on. The key may then live without a TTL.
    Ignore,
}

/// How the `end` of a range query is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpperBound {
    /// Events scored at `end` are counted: `[start, end]`.
    #[default]
    Inclusive,
    /// Only events scored strictly before `end` are counted: `[start, end)`.
    Exclusive,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub expire_errors: ExpireErrors,
    pub upper_bound: UpperBound,
    //Deadline applied to every single store call
    pub store_timeout: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_propagates_and_is_inclusive() {
        let cfg = Config::default();
        assert_eq!(cfg.expire_errors, ExpireErrors::Propagate);
        assert_eq!(cfg.upper_bound, UpperBound::Inclusive);
        assert!(cfg.store_timeout.is_none());
    }

    #[test]
    fn config_loads_from_partial_json() {
        let cfg: Config =
            serde_json::from_str(r#"{"expire_errors":"ignore","upper_bound":"exclusive"}"#)
                .unwrap();
        assert_eq!(cfg.expire_errors, ExpireErrors::Ignore);
        assert_eq!(cfg.upper_bound, UpperBound::Exclusive);
        assert!(cfg.store_timeout.is_none());
    }
}
