use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use tokio::time::timeout;

use crate::error::{Error, Result, StoreOp};
use crate::keys::{self, BucketKeys};
use crate::store::Store;
use crate::{Config, ExpireErrors, UpperBound};

/// A counter of events bucketed by time.
///
/// Every recorded event gets its own member in the sorted set of its bucket, named
/// after a fresh value of the bucket counter. A range query issues one `ZCOUNT`
/// per bucket it spans, so its cost depends on the bucket width and not on the
/// number of events.
///
/// Recording is not atomic. If adding to the sorted set fails after the counter
/// was incremented, that counter value is burned and the event is not visible to
/// `range`. Units recorded before a failure within the same call are kept.
pub struct TimeSeries<S> {
    store: S,
    name: String,
    timestep: Duration,
    step_millis: i64,
    ttl: Duration,
    cfg: Config,
}

impl<S: Store> TimeSeries<S> {
    /// creates a series with the default `Config`.
    pub fn new(
        name: impl Into<String>,
        timestep: Duration,
        ttl: Duration,
        store: S,
    ) -> Result<Self> {
        Self::with_config(name, timestep, ttl, store, Config::default())
    }

    /// `timestep` must be at least one second. A zero `ttl` is accepted and makes
    /// every bucket expire as soon as it is written.
    pub fn with_config(
        name: impl Into<String>,
        timestep: Duration,
        ttl: Duration,
        store: S,
        cfg: Config,
    ) -> Result<Self> {
        let step_millis = keys::step_millis(timestep).ok_or(Error::InvalidTimestep)?;
        Ok(Self {
            store,
            name: name.into(),
            timestep,
            step_millis,
            ttl,
            cfg,
        })
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn timestep(&self) -> Duration {
        self.timestep
    }

    #[inline]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.cfg
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Records `amount` events happening now.
    #[inline]
    pub async fn incr(&self, amount: u64) -> Result<()> {
        self.incr_at(amount, Utc::now()).await
    }

    /// Records `amount` events that happened at `at`.
    ///
    /// Each unit is stored as a separate member. The event time is kept with
    /// whole-second resolution.
    pub async fn incr_at(&self, amount: u64, at: DateTime<Utc>) -> Result<()> {
        let keys = self.bucket_keys(at.timestamp_millis());
        let score = at.timestamp() as f64;
        let ttl = self.ttl.as_secs();
        for _ in 0..amount {
            let id = self
                .call(StoreOp::Incr, &keys.counter, self.store.incr(&keys.counter))
                .await?;
            self.refresh(&keys.counter, ttl).await?;

            let member = keys::member(&self.name, id);
            self.call(
                StoreOp::ZAdd,
                &keys.series,
                self.store.zadd(&keys.series, score, &member),
            )
            .await?;
            self.refresh(&keys.series, ttl).await?;
            debug!("{} recorded {} at {}", self.name, member, score);
        }
        Ok(())
    }

    /// Sums the events recorded between `start` and `end`.
    ///
    /// With the default `UpperBound::Inclusive` events at `end` are counted. Fails
    /// with `Error::InvalidRange` if `start` is after `end`.
    pub async fn range(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<f64> {
        if start > end {
            return Err(Error::InvalidRange);
        }

        let min = start.timestamp() as f64;
        let max: i64 = match self.cfg.upper_bound {
            UpperBound::Inclusive => end.timestamp(),
            // scores are whole seconds, so `score < end` is `score <= ceil(end) - 1`
            UpperBound::Exclusive => {
                if end.timestamp_subsec_nanos() == 0 {
                    end.timestamp() - 1
                } else {
                    end.timestamp()
                }
            }
        };
        let max = max as f64;

        let end_millis = end.timestamp_millis();
        let mut current = keys::truncate_millis(start.timestamp_millis(), self.step_millis);
        let mut total: u64 = 0;
        loop {
            let key = keys::series_key(&self.name, keys::epoch_secs(current));
            let count = self
                .call(StoreOp::ZCount, &key, self.store.zcount(&key, min, max))
                .await?;
            debug!("{} [{}, {}] in {}: {}", self.name, min, max, key, count);
            total += count;

            current = match current.checked_add(self.step_millis) {
                Some(next) if next <= end_millis => next,
                _ => break,
            };
        }
        Ok(total as f64)
    }

    #[inline]
    fn bucket_keys(&self, millis: i64) -> BucketKeys {
        let bucket = keys::truncate_millis(millis, self.step_millis);
        BucketKeys::new(&self.name, keys::epoch_secs(bucket))
    }

    async fn refresh(&self, key: &str, ttl: u64) -> Result<()> {
        match self
            .call(StoreOp::Expire, key, self.store.expire(key, ttl))
            .await
        {
            Err(e) if self.cfg.expire_errors == ExpireErrors::Ignore => {
                warn!("{} ignoring expire failure, {}", self.name, e);
                Ok(())
            }
            res => res,
        }
    }

    // Awaits one store call under the configured deadline and tags any failure
    // with the primitive and key.
    async fn call<T, F>(&self, op: StoreOp, key: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let res = match self.cfg.store_timeout {
            Some(dur) => match timeout(dur, fut).await {
                Ok(res) => res,
                Err(e) => Err(Error::from(e)),
            },
            None => fut.await,
        };
        res.map_err(|e| {
            debug!("{} {} {} failed, {:?}", self.name, op, key, e);
            Error::store(op, key, e)
        })
    }
}
