//! Node RPC server
//!
//! Accepts framed connections and dispatches each decoded request to an
//! async [`Handler`]. One task serves each connection; a watch channel
//! signals shutdown to the accept loop and every connection task.

use async_trait::async_trait;
use log::{debug, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use driftdb_core::{Error, Result};

use crate::frame::{decode_request, encode_response, read_frame, write_frame};
use crate::wire::{ErrorCode, Request, Response};

/// Serves decoded requests
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn handle(&self, request: Request) -> Response;
}

/// Listening side of the node RPC protocol
pub struct NodeServer {
    local_addr: SocketAddr,
    stop: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

impl NodeServer {
    /// Binds the listener and starts accepting connections
    pub async fn bind(addr: &str, handler: Arc<dyn Handler>) -> Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Self::from_listener(listener, handler)
    }

    /// Starts accepting connections on an already-bound listener
    pub fn from_listener(listener: TcpListener, handler: Arc<dyn Handler>) -> Result<Self> {
        let local_addr = listener.local_addr()?;

        let (stop, stop_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(listener, handler, stop_rx));

        Ok(Self {
            local_addr,
            stop,
            accept_task,
        })
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting connections and winds down in-flight ones
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        let _ = self.accept_task.await;
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn Handler>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = stop.changed() => return,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {}", peer);
                    tokio::spawn(serve_connection(stream, handler.clone(), stop.clone()));
                }
                Err(err) => warn!("accept failed: {}", err),
            },
        }
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn Handler>,
    mut stop: watch::Receiver<bool>,
) {
    loop {
        let payload = tokio::select! {
            _ = stop.changed() => return,
            frame = read_frame(&mut stream) => match frame {
                Ok(payload) => payload,
                Err(Error::ConnectionClosed) => return,
                Err(err) => {
                    debug!("dropping connection: {}", err);
                    return;
                }
            },
        };

        let response = match decode_request(&payload) {
            Ok(request) => handler.handle(request).await,
            Err(err) => Response::Error {
                code: ErrorCode::InvalidArgument,
                message: err.to_string(),
            },
        };

        if let Err(err) = respond(&mut stream, &response).await {
            debug!("dropping connection: {}", err);
            return;
        }
    }
}

async fn respond(stream: &mut TcpStream, response: &Response) -> Result<()> {
    let payload = encode_response(response)?;
    write_frame(stream, &payload).await
}
