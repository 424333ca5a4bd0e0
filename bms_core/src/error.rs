use crate::types::FaultKind;
use bms_traits::ChannelId;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BmsError {
    #[error("sensor unavailable: {0}")]
    SensorUnavailable(String),
    #[error("channel stale: {0}")]
    ChannelStale(ChannelId),
    #[error("limit exceeded: {kind}")]
    LimitExceeded { kind: FaultKind },
    #[error("keep-alive expired")]
    KeepAliveExpired,
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
    #[error("relay output error: {0}")]
    Relay(String),
    #[error("io error: {0}")]
    Io(String),
    #[error("invalid state: {0}")]
    State(String),
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BuildError {
    #[error("missing relay output")]
    MissingRelay,
    #[error("missing balance output")]
    MissingBalancer,
    #[error("missing configuration")]
    MissingConfig,
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
