//! Replication coordinator
//!
//! Any node may coordinate a client request for any key. A put fans out
//! to the replica set after a primary write assigns the new version; a
//! get fans out, reconciles the returned siblings, and schedules read
//! repair for replicas that answered with dominated values.

use log::{debug, warn};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use driftdb_core::vclock::Version;
use driftdb_core::{Error, NodeId, Result, Status};
use driftdb_cluster::{Node, SwimCluster};
use driftdb_net::VersionedValueMsg;

use crate::merge::{merge_versions, MergeResult, ReplicaValue};

/// Fan-out parameters of the coordinator
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Number of replicas each key is written to
    pub replication_factor: usize,
    /// Successful reads required before reconciling
    pub read_quorum: usize,
    /// Acknowledgments required before a put succeeds
    pub write_quorum: usize,
    /// Deadline for each replica RPC
    pub request_timeout: Duration,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            replication_factor: 3,
            read_quorum: 2,
            write_quorum: 2,
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Reconciled result of a coordinated read
#[derive(Debug)]
pub struct GetResult {
    /// Version the client must present on its next write
    pub version: String,
    /// Surviving siblings
    pub values: Vec<VersionedValueMsg>,
}

/// Result of a coordinated write
#[derive(Debug)]
pub struct PutResult {
    /// Replicas that acknowledged the write
    pub acknowledged: usize,
    /// Version assigned by the primary write
    pub version: String,
}

/// Fans client operations out across the replica set
pub struct Coordinator {
    cluster: Arc<SwimCluster>,
    config: ReplicationConfig,
}

impl Coordinator {
    pub fn new(cluster: Arc<SwimCluster>, config: ReplicationConfig) -> Self {
        Self { cluster, config }
    }

    /// The healthy nodes this coordinator replicates to, lowest IDs
    /// first, capped at the replication factor
    fn replica_set(&self) -> Vec<Node> {
        self.cluster
            .nodes()
            .into_iter()
            .filter(|node| node.status == Status::Healthy)
            .take(self.config.replication_factor)
            .collect()
    }

    /// Coordinated write
    ///
    /// The primary write goes to this node when it is a replica,
    /// otherwise to the lowest-id replica; the receiver increments its
    /// own slot in the caller's version vector and returns the result,
    /// which then fans out verbatim to the remaining replicas.
    pub async fn put(&self, key: &str, data: Vec<u8>, version: &str) -> Result<PutResult> {
        // Reject garbage before touching any replica.
        Version::decode(version)?;

        let replicas = self.replica_set();
        if replicas.is_empty() {
            return Err(Error::Unavailable("no healthy replicas".to_string()));
        }
        let quorum = self.config.write_quorum.min(replicas.len());

        let self_id = self.cluster.self_id();
        let primary = replicas
            .iter()
            .find(|node| node.id == self_id)
            .unwrap_or(&replicas[0])
            .clone();

        let value = VersionedValueMsg {
            data,
            version: version.to_string(),
            tombstone: false,
        };

        let conn = self.cluster.conn(primary.id).await?;
        let new_version = tokio::time::timeout(
            self.config.request_timeout,
            conn.storage_put(key, value.clone(), true),
        )
        .await
        .map_err(|_| Error::Timeout)??;

        let replicated = VersionedValueMsg {
            data: value.data,
            version: new_version.clone(),
            tombstone: value.tombstone,
        };

        let mut tasks = Vec::new();
        for replica in replicas.iter().filter(|node| node.id != primary.id) {
            let cluster = Arc::clone(&self.cluster);
            let key = key.to_string();
            let value = replicated.clone();
            let timeout = self.config.request_timeout;
            let id = replica.id;

            tasks.push(tokio::spawn(async move {
                replica_put(&cluster, id, &key, value, false, timeout).await
            }));
        }

        let mut acknowledged = 1;
        for task in tasks {
            match task.await {
                Ok(Ok(())) => acknowledged += 1,
                Ok(Err((id, err))) => warn!("replica write failed: node_id={} err={}", id, err),
                Err(err) => warn!("replica write task failed: {}", err),
            }
        }

        if acknowledged < quorum {
            return Err(Error::Unavailable(format!(
                "write quorum not reached: {}/{}",
                acknowledged, quorum
            )));
        }

        Ok(PutResult {
            acknowledged,
            version: new_version,
        })
    }

    /// Coordinated read with reconciliation and read repair
    pub async fn get(&self, key: &str) -> Result<GetResult> {
        let replicas = self.replica_set();
        if replicas.is_empty() {
            return Err(Error::Unavailable("no healthy replicas".to_string()));
        }
        let quorum = self.config.read_quorum.min(replicas.len());

        let mut tasks = Vec::new();
        for replica in &replicas {
            let cluster = Arc::clone(&self.cluster);
            let key = key.to_string();
            let timeout = self.config.request_timeout;
            let id = replica.id;

            tasks.push(tokio::spawn(async move {
                replica_get(&cluster, id, &key, timeout).await
            }));
        }

        let mut responses = Vec::new();
        for task in tasks {
            match task.await {
                Ok(Ok(response)) => responses.push(response),
                Ok(Err((id, err))) => warn!("replica read failed: node_id={} err={}", id, err),
                Err(err) => warn!("replica read task failed: {}", err),
            }
        }

        if responses.len() < quorum {
            return Err(Error::Unavailable(format!(
                "read quorum not reached: {}/{}",
                responses.len(),
                quorum
            )));
        }

        let mut replica_values = Vec::new();
        for (id, values) in responses {
            for value in values {
                replica_values.push(ReplicaValue { node_id: id, value });
            }
        }

        let merged = merge_versions(replica_values)?;

        if !merged.stale_replicas.is_empty() {
            self.schedule_read_repair(key, &merged);
        }

        Ok(GetResult {
            version: merged.version,
            values: merged.values.into_iter().map(|v| v.value).collect(),
        })
    }

    /// Brings stale replicas current in the background by re-sending
    /// every surviving sibling to them
    fn schedule_read_repair(&self, key: &str, merged: &MergeResult) {
        let stale: BTreeSet<NodeId> = merged.stale_replicas.iter().copied().collect();

        for id in stale {
            for survivor in &merged.values {
                let cluster = Arc::clone(&self.cluster);
                let key = key.to_string();
                let value = survivor.value.clone();
                let timeout = self.config.request_timeout;

                tokio::spawn(async move {
                    match replica_put(&cluster, id, &key, value, false, timeout).await {
                        Ok(()) => debug!("read repair: node_id={} key={}", id, key),
                        Err((_, err)) => {
                            warn!("read repair failed: node_id={} key={} err={}", id, key, err)
                        }
                    }
                });
            }
        }
    }
}

async fn replica_get(
    cluster: &SwimCluster,
    id: NodeId,
    key: &str,
    timeout: Duration,
) -> std::result::Result<(NodeId, Vec<VersionedValueMsg>), (NodeId, Error)> {
    let result = async {
        let conn = cluster.conn(id).await?;
        tokio::time::timeout(timeout, conn.storage_get(key))
            .await
            .map_err(|_| Error::Timeout)?
    }
    .await;

    match result {
        Ok(values) => Ok((id, values)),
        // An absent key is an empty response, not a failed replica.
        Err(Error::KeyNotFound) => Ok((id, Vec::new())),
        Err(err) => {
            if is_transport_error(&err) {
                cluster.drop_conn(id);
            }
            Err((id, err))
        }
    }
}

async fn replica_put(
    cluster: &SwimCluster,
    id: NodeId,
    key: &str,
    value: VersionedValueMsg,
    primary: bool,
    timeout: Duration,
) -> std::result::Result<(), (NodeId, Error)> {
    let result = async {
        let conn = cluster.conn(id).await?;
        tokio::time::timeout(timeout, conn.storage_put(key, value, primary))
            .await
            .map_err(|_| Error::Timeout)?
    }
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(err) => {
            if is_transport_error(&err) {
                cluster.drop_conn(id);
            }
            Err((id, err))
        }
    }
}

fn is_transport_error(err: &Error) -> bool {
    matches!(
        err,
        Error::Io(_) | Error::Timeout | Error::ConnectionClosed | Error::Corruption(_)
    )
}
