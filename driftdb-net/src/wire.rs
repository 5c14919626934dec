//! Wire message schema for node-to-node RPC
//!
//! The schema is transport-agnostic: messages are serde structures
//! serialized with bincode and carried in checksummed frames (see
//! [`crate::frame`]). Version vectors always travel in their canonical
//! string encoding.

use serde::{Deserialize, Serialize};

use driftdb_core::{Error, Generation, NodeId, RunId, Status};

/// Directory entry as exchanged during anti-entropy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: NodeId,
    pub name: String,
    /// Publicly advertised address
    pub address: String,
    pub status: Status,
    pub generation: Generation,
    pub run_id: RunId,
    /// Last probe error observed for this node, empty if none
    pub error: String,
}

/// A versioned value as it travels between nodes
///
/// The engine-level counterpart keeps the vector decoded; see
/// [`driftdb_core::VersionedValue`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionedValueMsg {
    pub data: Vec<u8>,
    /// Canonical string encoding of the version vector
    pub version: String,
    pub tombstone: bool,
}

/// Outcome of a relayed probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndirectPingResult {
    pub status: Status,
    pub duration_ms: i64,
    pub message: String,
}

/// Requests a node accepts from its peers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Request {
    /// Liveness check; the reply carries the responder's state hash
    Ping,
    /// Ask the receiver to probe `target` on the sender's behalf
    PingIndirect { target: NodeId, timeout_ms: i64 },
    /// Full directory exchange: the sender's snapshot goes in, the
    /// receiver's post-merge snapshot comes back
    PullPushState { nodes: Vec<NodeInfo> },
    /// Read all siblings of a key from the receiver's local engine
    StorageGet { key: String },
    /// Store a value in the receiver's local engine
    ///
    /// `primary` marks the coordinator-originated write and authorizes
    /// the receiver to increment its own slot in the version vector;
    /// replication fan-out copies carry `primary = false` and are stored
    /// verbatim.
    StoragePut {
        key: String,
        value: VersionedValueMsg,
        primary: bool,
    },
}

/// Coarse error classification carried over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    InvalidArgument,
    NotFound,
    Internal,
}

/// Replies, one variant per request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Pong { state_hash: u64 },
    PingIndirect(IndirectPingResult),
    PullPushState { nodes: Vec<NodeInfo> },
    StorageGet { values: Vec<VersionedValueMsg> },
    StoragePut { version: String },
    Error { code: ErrorCode, message: String },
}

impl Response {
    /// Builds the error reply for a failed request
    pub fn from_error(err: &Error) -> Response {
        let code = match err {
            Error::KeyNotFound => ErrorCode::NotFound,
            Error::InvalidVersion(_) | Error::InvalidArgument(_) => ErrorCode::InvalidArgument,
            _ => ErrorCode::Internal,
        };

        Response::Error {
            code,
            message: err.to_string(),
        }
    }
}

impl ErrorCode {
    /// Converts a wire error back into the caller-side error type
    pub fn into_error(self, message: String) -> Error {
        match self {
            ErrorCode::NotFound => Error::KeyNotFound,
            ErrorCode::InvalidArgument => Error::InvalidArgument(message),
            ErrorCode::Internal => Error::Remote(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_roundtrip() {
        let resp = Response::from_error(&Error::KeyNotFound);
        match resp {
            Response::Error { code, message } => {
                assert_eq!(code, ErrorCode::NotFound);
                assert!(matches!(code.into_error(message), Error::KeyNotFound));
            }
            _ => panic!("expected error response"),
        }
    }

    #[test]
    fn test_invalid_version_maps_to_invalid_argument() {
        let resp = Response::from_error(&Error::InvalidVersion("x".to_string()));
        match resp {
            Response::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidArgument),
            _ => panic!("expected error response"),
        }
    }
}
