use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = ::std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config error: {0}")]
    Config(#[from] serde_yaml::Error),
    #[error("invalid rate: {} per {:?}", rate, per)]
    InvalidRate { rate: f64, per: Duration },
    #[error("invalid prefix: {} is too large for {}", prefix, addr)]
    InvalidPrefix { addr: IpAddr, prefix: u8 },
    #[error("invalid {}: {:?}", name, timeout)]
    InvalidTimeout { name: &'static str, timeout: Duration },
    #[error("invalid address pattern: {}", pattern)]
    InvalidAddress { pattern: String },
    #[error("address already in use: {}", addr)]
    AddressAlreadyInUse { addr: SocketAddr },
    #[error("address not available: {}", addr)]
    AddressNotAvailable { addr: SocketAddr },
    #[error("poisoned error: {}", _0)]
    Poisoned(String),
    /// terminal result of the accept loop
    #[error("listener is shutting down")]
    ShuttingDown,
    #[error("listener already started: {}", name)]
    AlreadyStarted { name: String },
    #[error("thread panicked: {}", name)]
    Panicked { name: String },
}

impl Error {
    pub fn invalid_rate(rate: f64, per: Duration) -> Self {
        Self::InvalidRate { rate, per }
    }

    pub fn invalid_timeout(name: &'static str, timeout: Duration) -> Self {
        Self::InvalidTimeout { name, timeout }
    }

    pub fn invalid_address<S: Into<String>>(pattern: S) -> Self {
        Self::InvalidAddress {
            pattern: pattern.into(),
        }
    }

    pub fn already_started<S: Into<String>>(name: S) -> Self {
        Self::AlreadyStarted { name: name.into() }
    }

    pub fn panicked<S: Into<String>>(name: S) -> Self {
        Self::Panicked { name: name.into() }
    }

    pub fn is_shutting_down(&self) -> bool {
        matches!(self, Error::ShuttingDown)
    }
}

impl<T: fmt::Debug> From<sync::PoisonError<T>> for Error {
    fn from(error: sync::PoisonError<T>) -> Self {
        Error::Poisoned(format!("{:?}", error))
    }
}
