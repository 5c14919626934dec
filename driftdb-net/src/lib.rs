//! Node-to-node RPC for DriftDB
//!
//! This crate defines the logical RPC schema ([`wire`]), the checksummed
//! frame codec carrying it over TCP ([`frame`]), the [`NodeClient`]
//! capability used by the membership and replication layers, and the
//! accept loop serving inbound requests ([`server`]).

pub mod client;
pub mod frame;
pub mod server;
pub mod wire;

pub use client::{Dialer, NodeClient, RemoteClient, TcpDialer};
pub use server::{Handler, NodeServer};
pub use wire::{
    ErrorCode, IndirectPingResult, NodeInfo, Request, Response, VersionedValueMsg,
};
