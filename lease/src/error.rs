use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("No local resource available")]
    NoCapacity,

    #[error("Could not write lease request to the network within {timeout_ms}ms")]
    RequestPublishTimeout { timeout_ms: u128 },

    #[error("No free resource found on the network")]
    NoRemoteFulfillment,

    #[error("Lease duration {0:?} is out of range")]
    DurationOutOfRange(std::time::Duration),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
