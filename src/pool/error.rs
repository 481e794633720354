use std::time::Duration;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("timed out after {0:?} waiting for a pool slot")]
    Timeout(Duration),
    #[error("pool exhausted and configured not to wait")]
    Exhausted,
    #[error("pool wait queue is full ({0} pending)")]
    QueueFull(usize),
    #[error("pool is closed")]
    Closed,
    #[error("failed to open connection: {0}")]
    Connect(#[source] BoxError),
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl PoolError {
    pub fn connect(err: impl Into<BoxError>) -> Self {
        Self::Connect(err.into())
    }
}
