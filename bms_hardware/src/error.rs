use bms_traits::ChannelId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("sensor timeout on {0}")]
    Timeout(ChannelId),
    #[error("no such channel: {0}")]
    NoSuchChannel(ChannelId),
    #[error("link down")]
    LinkDown,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
