//! Error types for DriftDB
//!
//! This module defines the error types used throughout DriftDB.

use thiserror::Error;

/// The main error type for DriftDB operations
#[derive(Error, Debug)]
pub enum Error {
    /// An I/O error occurred
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A serialization/deserialization error occurred
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption was detected (bad frame length or checksum)
    #[error("Corruption detected: {0}")]
    Corruption(String),

    /// The requested key was not found
    ///
    /// This is a terminal signal rather than a failure: callers on the
    /// read path treat an absent key as an empty result.
    #[error("Key not found")]
    KeyNotFound,

    /// An iterator has been exhausted
    ///
    /// Like [`Error::KeyNotFound`], this is a terminal signal.
    #[error("No more items")]
    NoMoreItems,

    /// A version vector string could not be decoded
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// A request carried an argument the receiver cannot act on
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Not enough replicas responded to satisfy a quorum
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// The remote side reported an error
    #[error("Remote error: {0}")]
    Remote(String),

    /// An RPC did not complete within its deadline
    #[error("Request timed out")]
    Timeout,

    /// The connection was closed by the peer or by a local shutdown
    #[error("Connection closed")]
    ConnectionClosed,
}

/// A specialized Result type for DriftDB operations
pub type Result<T> = std::result::Result<T, Error>;
