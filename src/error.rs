use std::fmt;

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

/// The store primitive a [`Error::Store`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Incr,
    ZAdd,
    ZCount,
    Expire,
}

impl fmt::Display for StoreOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoreOp::Incr => "INCR",
            StoreOp::ZAdd => "ZADD",
            StoreOp::ZCount => "ZCOUNT",
            StoreOp::Expire => "EXPIRE",
        };
        f.write_str(name)
    }
}

#[derive(Debug, ThisError)]
pub enum Error {
    #[error("timeseries: range is invalid, start must not be after end")]
    InvalidRange,
    #[error("timeseries: timestep must be greater than zero")]
    InvalidTimestep,
    #[error("store {op} failed on key `{key}`: {source}")]
    Store {
        op: StoreOp,
        key: String,
        #[source]
        source: Box<Error>,
    },
    #[error("WRONGTYPE operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("value is not an integer or out of range")]
    NotInteger,
    #[error("timeout")]
    Elapsed,
    #[error("{0}")]
    Msg(String),
    #[error("{0}")]
    Anyhow(anyhow::Error),
}

impl Error {
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    #[inline]
    pub(crate) fn store(op: StoreOp, key: &str, source: Error) -> Self {
        Error::Store {
            op,
            key: key.to_owned(),
            source: source.boxed(),
        }
    }

    /// Returns the failed primitive when this error came from the store.
    pub fn store_op(&self) -> Option<StoreOp> {
        match self {
            Error::Store { op, .. } => Some(*op),
            _ => None,
        }
    }
}

impl From<&str> for Error {
    fn from(e: &str) -> Self {
        Self::Msg(e.to_owned())
    }
}

impl From<anyhow::Error> for Error {
    #[inline]
    fn from(e: anyhow::Error) -> Self {
        Error::Anyhow(e)
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    #[inline]
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::Elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_names_primitive_and_key() {
        let err = Error::store(StoreOp::ZCount, "hits:ts:60", Error::from("connection reset"));
        assert_eq!(err.store_op(), Some(StoreOp::ZCount));
        assert_eq!(
            err.to_string(),
            "store ZCOUNT failed on key `hits:ts:60`: connection reset"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn plain_messages_keep_their_text() {
        let err = Error::from("READONLY replica");
        assert!(matches!(&err, Error::Msg(msg) if msg == "READONLY replica"));
        assert_eq!(err.to_string(), "READONLY replica");
    }

    #[test]
    fn non_store_errors_have_no_op() {
        assert_eq!(Error::InvalidRange.store_op(), None);
        assert_eq!(Error::from(anyhow::anyhow!("boom")).store_op(), None);
    }
}
