//! Error types for ratha-core
//!
//! The control path itself never errors: out-of-range tuning values are
//! silently rejected at the setter and can be detected by reading the value
//! back. Errors surface only from initialization (an encoder that cannot
//! bind to its pulse source), from the configuration file layer, and from
//! the persistent store.

use thiserror::Error;

/// Errors that can occur in ratha-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Encoder error: {0}")]
    Encoder(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, Error>;
