//! Node RPC client
//!
//! [`NodeClient`] is the capability the failure detector and the
//! coordinator use to talk to a peer. The remote implementation speaks
//! the framed protocol over TCP; an in-process implementation backs the
//! loopback path on the server side. [`Dialer`] abstracts connection
//! establishment so the membership layer can be tested with mock peers.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use driftdb_core::{Error, NodeId, Result};

use crate::frame::{decode_response, encode_request, read_frame, write_frame};
use crate::wire::{IndirectPingResult, NodeInfo, Request, Response, VersionedValueMsg};

/// Capability set a node exposes to its peers
#[async_trait]
pub trait NodeClient: Send + Sync {
    /// Liveness check returning the remote's directory state hash
    async fn ping(&self) -> Result<u64>;

    /// Asks the remote to probe `target` on our behalf
    async fn ping_indirect(&self, target: NodeId, timeout: Duration) -> Result<IndirectPingResult>;

    /// Exchanges full directory snapshots; returns the remote's post-merge view
    async fn pull_push_state(&self, nodes: Vec<NodeInfo>) -> Result<Vec<NodeInfo>>;

    /// Reads all siblings of a key from the remote engine
    async fn storage_get(&self, key: &str) -> Result<Vec<VersionedValueMsg>>;

    /// Stores a value in the remote engine; returns the stored version encoding
    async fn storage_put(&self, key: &str, value: VersionedValueMsg, primary: bool)
        -> Result<String>;

    /// Releases the underlying connection; idempotent
    async fn close(&self) -> Result<()>;
}

/// Establishes connections to peers by address
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, addr: &str) -> Result<Arc<dyn NodeClient>>;
}

/// [`Dialer`] producing framed TCP clients
pub struct TcpDialer;

#[async_trait]
impl Dialer for TcpDialer {
    async fn dial(&self, addr: &str) -> Result<Arc<dyn NodeClient>> {
        Ok(Arc::new(RemoteClient::connect(addr).await?))
    }
}

/// A peer reached over the framed TCP protocol
///
/// The stream carries one request-response exchange at a time; an async
/// mutex serializes concurrent callers.
pub struct RemoteClient {
    stream: Mutex<TcpStream>,
    closed: AtomicBool,
}

impl RemoteClient {
    /// Connects to a peer
    pub async fn connect(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        })
    }

    async fn call(&self, request: &Request) -> Result<Response> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::ConnectionClosed);
        }

        let payload = encode_request(request)?;

        let mut stream = self.stream.lock().await;
        write_frame(&mut *stream, &payload).await?;
        let reply = read_frame(&mut *stream).await?;
        drop(stream);

        match decode_response(&reply)? {
            Response::Error { code, message } => Err(code.into_error(message)),
            response => Ok(response),
        }
    }
}

#[async_trait]
impl NodeClient for RemoteClient {
    async fn ping(&self) -> Result<u64> {
        match self.call(&Request::Ping).await? {
            Response::Pong { state_hash } => Ok(state_hash),
            other => Err(unexpected(&other)),
        }
    }

    async fn ping_indirect(&self, target: NodeId, timeout: Duration) -> Result<IndirectPingResult> {
        let request = Request::PingIndirect {
            target,
            timeout_ms: timeout.as_millis() as i64,
        };

        match self.call(&request).await? {
            Response::PingIndirect(result) => Ok(result),
            other => Err(unexpected(&other)),
        }
    }

    async fn pull_push_state(&self, nodes: Vec<NodeInfo>) -> Result<Vec<NodeInfo>> {
        match self.call(&Request::PullPushState { nodes }).await? {
            Response::PullPushState { nodes } => Ok(nodes),
            other => Err(unexpected(&other)),
        }
    }

    async fn storage_get(&self, key: &str) -> Result<Vec<VersionedValueMsg>> {
        let request = Request::StorageGet {
            key: key.to_string(),
        };

        match self.call(&request).await? {
            Response::StorageGet { values } => Ok(values),
            other => Err(unexpected(&other)),
        }
    }

    async fn storage_put(
        &self,
        key: &str,
        value: VersionedValueMsg,
        primary: bool,
    ) -> Result<String> {
        let request = Request::StoragePut {
            key: key.to_string(),
            value,
            primary,
        };

        match self.call(&request).await? {
            Response::StoragePut { version } => Ok(version),
            other => Err(unexpected(&other)),
        }
    }

    async fn close(&self) -> Result<()> {
        // First closer wins; everyone else sees a no-op.
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(());
        }

        use tokio::io::AsyncWriteExt;
        let mut stream = self.stream.lock().await;
        let _ = stream.shutdown().await;

        Ok(())
    }
}

fn unexpected(response: &Response) -> Error {
    Error::Remote(format!("unexpected response: {:?}", response))
}
