//! Node RPC service
//!
//! [`NodeService`] answers peer requests against the local cluster
//! directory and storage engine. [`LocalClient`] exposes the same
//! service through the [`NodeClient`] capability, so the coordinator
//! reaches its own replica in-process instead of over loopback TCP.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};

use driftdb_cluster::{from_infos, to_infos, SwimCluster};
use driftdb_core::vclock::Version;
use driftdb_core::{Error, NodeId, Result, Status, VersionedValue};
use driftdb_net::{
    Handler, IndirectPingResult, NodeClient, NodeInfo, Request, Response, VersionedValueMsg,
};
use driftdb_storage::Engine;

use crate::conv;

/// Serves the node-to-node RPC surface
pub struct NodeService {
    cluster: Arc<SwimCluster>,
    engine: Arc<dyn Engine>,
}

impl NodeService {
    pub fn new(cluster: Arc<SwimCluster>, engine: Arc<dyn Engine>) -> Arc<Self> {
        Arc::new(Self { cluster, engine })
    }

    fn ping(&self) -> u64 {
        self.cluster.state_hash()
    }

    /// Probes `target` on behalf of the requesting peer
    async fn ping_indirect(&self, target: NodeId, timeout: Duration) -> IndirectPingResult {
        let start = Instant::now();

        let result = async {
            let conn = self.cluster.conn(target).await?;
            tokio::time::timeout(timeout, conn.ping())
                .await
                .map_err(|_| Error::Timeout)?
        }
        .await;

        let duration_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok(_) => IndirectPingResult {
                status: Status::Healthy,
                duration_ms,
                message: String::new(),
            },
            Err(err) => {
                self.cluster.drop_conn(target);
                IndirectPingResult {
                    status: Status::Unhealthy,
                    duration_ms,
                    message: err.to_string(),
                }
            }
        }
    }

    fn pull_push_state(&self, nodes: Vec<NodeInfo>) -> Vec<NodeInfo> {
        let merged = self.cluster.apply_state(from_infos(nodes), 0);
        to_infos(&merged)
    }

    fn storage_get(&self, key: &str) -> Result<Vec<VersionedValueMsg>> {
        match self.engine.get(key) {
            Ok(values) => Ok(conv::to_msgs(values)),
            // An absent key is an empty response over the wire.
            Err(Error::KeyNotFound) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn storage_put(&self, key: &str, value: VersionedValueMsg, primary: bool) -> Result<String> {
        let mut version = Version::decode(&value.version)?;

        // The coordinator-originated write gets this node's slot
        // advanced; fan-out copies are stored verbatim.
        if primary {
            version.increment(self.cluster.self_id());
        }

        self.engine.put(
            key,
            VersionedValue {
                data: value.data,
                version: version.clone(),
                tombstone: value.tombstone,
            },
        )?;

        Ok(version.encode())
    }
}

#[async_trait]
impl Handler for NodeService {
    async fn handle(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong {
                state_hash: self.ping(),
            },
            Request::PingIndirect { target, timeout_ms } => {
                let timeout = Duration::from_millis(timeout_ms.max(0) as u64);
                Response::PingIndirect(self.ping_indirect(target, timeout).await)
            }
            Request::PullPushState { nodes } => Response::PullPushState {
                nodes: self.pull_push_state(nodes),
            },
            Request::StorageGet { key } => match self.storage_get(&key) {
                Ok(values) => Response::StorageGet { values },
                Err(err) => Response::from_error(&err),
            },
            Request::StoragePut {
                key,
                value,
                primary,
            } => match self.storage_put(&key, value, primary) {
                Ok(version) => Response::StoragePut { version },
                Err(err) => Response::from_error(&err),
            },
        }
    }
}

/// In-process [`NodeClient`] dispatching into the local service
///
/// Backs the coordinator's loopback path; closing it is a no-op because
/// there is no connection to release.
pub struct LocalClient {
    service: Arc<NodeService>,
}

impl LocalClient {
    pub fn new(service: Arc<NodeService>) -> Arc<Self> {
        Arc::new(Self { service })
    }
}

#[async_trait]
impl NodeClient for LocalClient {
    async fn ping(&self) -> Result<u64> {
        Ok(self.service.ping())
    }

    async fn ping_indirect(&self, target: NodeId, timeout: Duration) -> Result<IndirectPingResult> {
        Ok(self.service.ping_indirect(target, timeout).await)
    }

    async fn pull_push_state(&self, nodes: Vec<NodeInfo>) -> Result<Vec<NodeInfo>> {
        Ok(self.service.pull_push_state(nodes))
    }

    async fn storage_get(&self, key: &str) -> Result<Vec<VersionedValueMsg>> {
        self.service.storage_get(key)
    }

    async fn storage_put(
        &self,
        key: &str,
        value: VersionedValueMsg,
        primary: bool,
    ) -> Result<String> {
        self.service.storage_put(key, value, primary)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftdb_cluster::ClusterConfig;
    use driftdb_net::{Dialer, TcpDialer};
    use driftdb_storage::MemoryEngine;

    fn service() -> Arc<NodeService> {
        let cluster = Arc::new(SwimCluster::new(
            ClusterConfig {
                node_id: 1,
                node_name: "node-1".to_string(),
                public_addr: "10.0.0.1:3000".to_string(),
                local_addr: "127.0.0.1:3000".to_string(),
                ..ClusterConfig::default()
            },
            Arc::new(TcpDialer) as Arc<dyn Dialer>,
        ));

        NodeService::new(cluster, Arc::new(MemoryEngine::new()))
    }

    #[tokio::test]
    async fn test_primary_put_increments_own_slot() {
        let service = service();

        let version = service
            .storage_put(
                "k",
                VersionedValueMsg {
                    data: b"v".to_vec(),
                    version: String::new(),
                    tombstone: false,
                },
                true,
            )
            .unwrap();
        assert_eq!(version, "1:1");

        let version = service
            .storage_put(
                "k",
                VersionedValueMsg {
                    data: b"v2".to_vec(),
                    version,
                    tombstone: false,
                },
                true,
            )
            .unwrap();
        assert_eq!(version, "1:2");
    }

    #[tokio::test]
    async fn test_replica_put_stores_verbatim() {
        let service = service();

        let version = service
            .storage_put(
                "k",
                VersionedValueMsg {
                    data: b"v".to_vec(),
                    version: "7:3".to_string(),
                    tombstone: false,
                },
                false,
            )
            .unwrap();
        assert_eq!(version, "7:3");

        let values = service.storage_get("k").unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(values[0].version, "7:3");
    }

    #[tokio::test]
    async fn test_get_missing_key_is_empty_on_the_wire() {
        let service = service();
        assert!(service.storage_get("missing").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_version_is_invalid_argument() {
        let service = service();

        let response = service
            .handle(Request::StoragePut {
                key: "k".to_string(),
                value: VersionedValueMsg {
                    data: Vec::new(),
                    version: "zzz".to_string(),
                    tombstone: false,
                },
                primary: true,
            })
            .await;

        match response {
            Response::Error { code, .. } => {
                assert_eq!(code, driftdb_net::ErrorCode::InvalidArgument)
            }
            other => panic!("expected error response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_pull_push_returns_merged_snapshot() {
        let service = service();

        let reply = service.pull_push_state(vec![NodeInfo {
            id: 2,
            name: "node-2".to_string(),
            address: "10.0.0.2:3000".to_string(),
            status: Status::Healthy,
            generation: 1,
            run_id: 100,
            error: String::new(),
        }]);

        assert_eq!(reply.len(), 2);
        assert!(reply.iter().any(|n| n.id == 1));
        assert!(reply.iter().any(|n| n.id == 2));
    }
}
