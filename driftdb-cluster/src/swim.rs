//! SWIM cluster: node directory, connection cache, anti-entropy merge
//!
//! The directory is the process-local authoritative table of known
//! nodes, guarded by a single read/write lock. Its XOR state hash is a
//! pure function of the gossiped entries and lets two peers decide with
//! one `Ping` whether a full state exchange is worth doing.

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;

use driftdb_core::{Error, NodeId, Result, Status};
use driftdb_net::{Dialer, NodeClient};

use crate::config::ClusterConfig;
use crate::node::{self, Node};

struct Directory {
    nodes: BTreeMap<NodeId, Node>,
    state_hash: u64,
    /// When each `Left` entry was first observed, for garbage collection
    left_since: HashMap<NodeId, Instant>,
}

impl Directory {
    fn recompute_hash(&mut self) {
        self.state_hash = 0;
        for node in self.nodes.values() {
            self.state_hash ^= node.hash64();
        }
    }

    fn track_left(&mut self, id: NodeId, status: Status) {
        if status == Status::Left {
            self.left_since.entry(id).or_insert_with(Instant::now);
        } else {
            self.left_since.remove(&id);
        }
    }
}

/// Gossip-based cluster membership with failure detection
pub struct SwimCluster {
    self_id: NodeId,
    directory: RwLock<Directory>,
    connections: RwLock<HashMap<NodeId, Arc<dyn NodeClient>>>,
    /// Per-node dial coordination: the second concurrent dialer waits on
    /// the first instead of opening its own connection
    dial_locks: AsyncMutex<HashMap<NodeId, Arc<AsyncMutex<()>>>>,
    local: OnceLock<Arc<dyn NodeClient>>,
    dialer: Arc<dyn Dialer>,
    pub(crate) config: ClusterConfig,
    pub(crate) stop: watch::Sender<bool>,
    pub(crate) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SwimCluster {
    /// Creates a cluster whose directory initially holds only this node
    pub fn new(config: ClusterConfig, dialer: Arc<dyn Dialer>) -> Self {
        let run_id = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs() as i64)
            .unwrap_or(0);

        let local_node = Node {
            id: config.node_id,
            name: config.node_name.clone(),
            public_addr: config.public_addr.clone(),
            local_addr: config.local_addr.clone(),
            status: Status::Healthy,
            gen: 1,
            run_id,
            error: String::new(),
        };

        let state_hash = local_node.hash64();
        let mut nodes = BTreeMap::new();
        nodes.insert(local_node.id, local_node);

        let (stop, _) = watch::channel(false);

        Self {
            self_id: config.node_id,
            directory: RwLock::new(Directory {
                nodes,
                state_hash,
                left_since: HashMap::new(),
            }),
            connections: RwLock::new(HashMap::new()),
            dial_locks: AsyncMutex::new(HashMap::new()),
            local: OnceLock::new(),
            dialer,
            config,
            stop,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Schedules the background tasks managing the cluster state:
    /// probing nodes and garbage collecting departed ones
    pub fn start(self: &Arc<Self>) {
        self.start_detector();
        self.start_gc();
    }

    /// Stops background tasks and releases cached connections
    pub async fn shutdown(&self) {
        let _ = self.stop.send(true);

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }

        let connections: Vec<Arc<dyn NodeClient>> =
            self.connections.write().drain().map(|(_, conn)| conn).collect();
        for conn in connections {
            let _ = conn.close().await;
        }
    }

    /// Returns the ID of the current node
    pub fn self_id(&self) -> NodeId {
        self.self_id
    }

    /// Returns the current node's directory entry
    pub fn self_node(&self) -> Node {
        self.directory.read().nodes[&self.self_id].clone()
    }

    /// Returns all known nodes sorted by ID, including the current node
    /// and nodes that have left but are not garbage collected yet
    pub fn nodes(&self) -> Vec<Node> {
        self.directory.read().nodes.values().cloned().collect()
    }

    /// Returns the node with the given ID, if known
    pub fn node(&self, id: NodeId) -> Option<Node> {
        self.directory.read().nodes.get(&id).cloned()
    }

    /// Returns the XOR hash over all directory entries
    pub fn state_hash(&self) -> u64 {
        self.directory.read().state_hash
    }

    /// Updates a node's status, bumping its generation
    ///
    /// A no-op when the status is unchanged. The state hash is
    /// recomputed atomically with the update.
    pub fn set_status(&self, id: NodeId, status: Status, message: &str) {
        let mut directory = self.directory.write();

        let Some(node) = directory.nodes.get_mut(&id) else {
            return;
        };
        if node.status == status {
            return;
        }

        info!(
            "node status changed: node_id={} status={} error={:?}",
            id, status, message
        );

        node.status = status;
        node.gen += 1;
        node.error = message.to_string();

        directory.track_left(id, status);
        directory.recompute_hash();
    }

    /// Merges a received directory snapshot into the local one
    ///
    /// The merge is deterministic, commutative, and idempotent: a newer
    /// run wins outright, then a newer generation, and on a full tie a
    /// status may only be downgraded (`Left > Unhealthy > Healthy`).
    /// Entries about the local node are ignored — this process is the
    /// sole authority for its own row, and peers converge on it through
    /// their own probes. Invalid entries are skipped rather than
    /// poisoning the merge.
    ///
    /// Returns the post-merge snapshot.
    pub fn apply_state(&self, incoming: Vec<Node>, source: NodeId) -> Vec<Node> {
        let mut directory = self.directory.write();

        for node in incoming {
            if node.id == 0 || node.public_addr.is_empty() {
                warn!(
                    "skipping invalid gossip entry: node_id={} source={}",
                    node.id, source
                );
                continue;
            }

            if node.id == self.self_id {
                continue;
            }

            match directory.nodes.get(&node.id) {
                None => {
                    debug!("discovered node: node_id={} status={}", node.id, node.status);
                    directory.track_left(node.id, node.status);
                    directory.nodes.insert(node.id, node);
                }
                Some(local) => {
                    let newer_run = node.run_id > local.run_id;
                    let newer_gen = node.run_id == local.run_id && node.gen > local.gen;
                    let downgrade = node.run_id == local.run_id
                        && node.gen == local.gen
                        && node.status.rank() > local.status.rank();

                    if newer_run || newer_gen || downgrade {
                        directory.track_left(node.id, node.status);
                        directory.nodes.insert(node.id, node);
                    }
                }
            }
        }

        directory.recompute_hash();
        debug!("applied state from node {}", source);

        directory.nodes.values().cloned().collect()
    }

    /// Wires the in-process client used for the loopback path
    ///
    /// Must be called once during setup, before the cluster starts
    /// coordinating requests.
    pub fn set_local_conn(&self, client: Arc<dyn NodeClient>) {
        if self.local.set(client).is_err() {
            warn!("local connection already wired");
        }
    }

    /// Returns the in-process client, bypassing the wire
    pub fn local_conn(&self) -> Result<Arc<dyn NodeClient>> {
        self.local
            .get()
            .cloned()
            .ok_or_else(|| Error::Unavailable("local connection not wired".to_string()))
    }

    /// Returns a client for the given node, dialing lazily
    ///
    /// Connections are cached per node. At most one dial per node is in
    /// flight at any moment; concurrent callers wait for it and then
    /// pick up the cached client.
    pub async fn conn(&self, id: NodeId) -> Result<Arc<dyn NodeClient>> {
        if id == self.self_id {
            return self.local_conn();
        }

        if let Some(conn) = self.connections.read().get(&id) {
            return Ok(conn.clone());
        }

        let dial_lock = {
            let mut locks = self.dial_locks.lock().await;
            locks
                .entry(id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let _dialing = dial_lock.lock().await;

        // Another caller may have finished dialing while we waited.
        if let Some(conn) = self.connections.read().get(&id) {
            return Ok(conn.clone());
        }

        let addr = self
            .node(id)
            .ok_or_else(|| Error::InvalidArgument(format!("unknown node {}", id)))?
            .public_addr;

        let conn = tokio::time::timeout(self.config.dial_timeout, self.dialer.dial(&addr))
            .await
            .map_err(|_| Error::Timeout)??;

        self.connections.write().insert(id, conn.clone());

        Ok(conn)
    }

    /// Evicts and closes a cached connection, forcing the next call to
    /// re-dial
    pub fn drop_conn(&self, id: NodeId) {
        if let Some(conn) = self.connections.write().remove(&id) {
            tokio::spawn(async move {
                let _ = conn.close().await;
            });
        }
    }

    /// Joins the cluster through a seed address
    ///
    /// Exchanges full state with the seed; both sides learn all of each
    /// other's nodes. A seed that is already present in the directory is
    /// skipped.
    pub async fn join(&self, addr: &str) -> Result<()> {
        if self.nodes().iter().any(|node| node.public_addr == addr) {
            return Ok(()); // already joined
        }

        let conn = tokio::time::timeout(self.config.dial_timeout, self.dialer.dial(addr))
            .await
            .map_err(|_| Error::Timeout)??;

        let snapshot = node::to_infos(&self.nodes());
        let result = conn.pull_push_state(snapshot).await;
        let _ = conn.close().await;

        let remote = result?;
        self.apply_state(node::from_infos(remote), 0);

        info!("joined cluster via {}", addr);

        Ok(())
    }

    /// Drops directory entries that stayed `Left` beyond the GC interval
    pub(crate) fn gc_sweep(&self) {
        let expired: Vec<NodeId> = {
            let directory = self.directory.read();
            directory
                .left_since
                .iter()
                .filter(|(_, since)| since.elapsed() >= self.config.gc_interval)
                .map(|(id, _)| *id)
                .collect()
        };

        if expired.is_empty() {
            return;
        }

        let mut directory = self.directory.write();
        for id in &expired {
            directory.nodes.remove(id);
            directory.left_since.remove(id);
            info!("garbage collected node: node_id={}", id);
        }
        directory.recompute_hash();
        drop(directory);

        for id in expired {
            self.drop_conn(id);
        }
    }
}
