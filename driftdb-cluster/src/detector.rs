//! SWIM failure detector
//!
//! A periodic tick probes one random node directly; if the observed
//! status differs from the directory's, a set of intermediary nodes is
//! asked to probe the target on our behalf. Only a unanimous indirect
//! vote that agrees with the direct observation commits a status change,
//! which distinguishes "the target is down" from "the path to the target
//! is down". A successful direct probe additionally piggybacks the
//! anti-entropy exchange whenever the two state hashes differ.

use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use driftdb_core::{Error, Result, Status};

use crate::node::{self, Node};
use crate::swim::SwimCluster;

/// Outcome of a direct or indirect probe
#[derive(Debug)]
pub(crate) struct ProbeResult {
    pub status: Status,
    pub message: String,
    pub duration: Duration,
}

impl ProbeResult {
    fn healthy(duration: Duration) -> Self {
        Self {
            status: Status::Healthy,
            message: String::new(),
            duration,
        }
    }

    fn unhealthy(message: impl Into<String>, duration: Duration) -> Self {
        Self {
            status: Status::Unhealthy,
            message: message.into(),
            duration,
        }
    }
}

enum DirectProbeError {
    /// The probe itself failed: evidence of an unhealthy target
    Transport(Error),
    /// The probe succeeded but the piggybacked state exchange failed
    Exchange(Error),
}

impl SwimCluster {
    pub(crate) fn start_detector(self: &Arc<Self>) {
        let cluster = Arc::clone(self);
        let mut stop = self.stop.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cluster.config.probe_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if !cluster.config.probe_jitter.is_zero() {
                            let jitter = rand::thread_rng()
                                .gen_range(Duration::ZERO..cluster.config.probe_jitter);
                            tokio::time::sleep(jitter).await;
                        }

                        cluster.detect_failures().await;
                    }
                    _ = stop.changed() => return,
                }
            }
        });

        self.tasks.lock().push(handle);
    }

    pub(crate) fn start_gc(self: &Arc<Self>) {
        let cluster = Arc::clone(self);
        let mut stop = self.stop.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cluster.config.gc_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => cluster.gc_sweep(),
                    _ = stop.changed() => return,
                }
            }
        });

        self.tasks.lock().push(handle);
    }

    /// One detector tick: pick a target and probe it
    pub(crate) async fn detect_failures(self: &Arc<Self>) {
        let Some(target) = self.pick_random_node() else {
            return;
        };

        self.probe_node(&target).await;
    }

    pub(crate) async fn probe_node(self: &Arc<Self>, target: &Node) {
        // Try to directly ping the node and exit if the state is the
        // same as before.
        let direct = match self.direct_probe(target).await {
            Ok(result) => result,
            Err(err) => {
                error!("direct probe failed: node_id={} err={}", target.id, err);
                return;
            }
        };

        debug!(
            "direct probe: node_id={} status={} duration={:?}",
            target.id, direct.status, direct.duration
        );

        if direct.status == target.status {
            return;
        }

        // The state has changed; several intermediary nodes must confirm
        // it. A small cluster may not have enough of them, in which case
        // the direct observation is committed as-is.
        let relays = self.pick_indirect_nodes(target);
        if relays.len() < self.config.indirect_nodes {
            warn!(
                "not enough intermediary nodes: node_id={} have={} want={}",
                target.id,
                relays.len(),
                self.config.indirect_nodes
            );
            self.set_status(target.id, direct.status, &direct.message);
            return;
        }

        let indirect = match self.indirect_probe(target, &relays).await {
            Ok(result) => result,
            Err(err) => {
                error!("indirect probe failed: node_id={} err={}", target.id, err);
                return;
            }
        };

        if indirect.status == target.status {
            return;
        }

        // Do nothing as long as the direct and indirect results differ.
        if direct.status != indirect.status {
            warn!(
                "direct and indirect probe results differ: node_id={} direct={} indirect={}",
                target.id, direct.status, indirect.status
            );
            return;
        }

        self.set_status(target.id, direct.status, &direct.message);
    }

    /// Picks a uniformly random probe target: any known node that is not
    /// this one and has not left
    fn pick_random_node(&self) -> Option<Node> {
        let mut nodes = self.nodes();
        nodes.shuffle(&mut rand::thread_rng());

        nodes
            .into_iter()
            .find(|node| node.id != self.self_id() && node.status != Status::Left)
    }

    /// Picks up to `indirect_nodes` random healthy relays, excluding the
    /// target and this node
    fn pick_indirect_nodes(&self, target: &Node) -> Vec<Node> {
        let mut nodes = self.nodes();
        nodes.shuffle(&mut rand::thread_rng());

        nodes
            .into_iter()
            .filter(|node| {
                node.id != self.self_id()
                    && node.id != target.id
                    && node.status == Status::Healthy
            })
            .take(self.config.indirect_nodes)
            .collect()
    }

    /// Probes the target over its cached connection
    ///
    /// Transport failures are evidence, not errors: they yield an
    /// `Unhealthy` result and evict the cached connection. A state-hash
    /// mismatch on a successful ping triggers the full state exchange;
    /// only a failure of that exchange is reported as an error.
    async fn direct_probe(&self, target: &Node) -> std::result::Result<ProbeResult, Error> {
        let start = Instant::now();

        match self.direct_probe_inner(target).await {
            Ok(()) => Ok(ProbeResult::healthy(start.elapsed())),
            Err(DirectProbeError::Transport(err)) => {
                self.drop_conn(target.id);
                Ok(ProbeResult::unhealthy(err.to_string(), start.elapsed()))
            }
            Err(DirectProbeError::Exchange(err)) => Err(err),
        }
    }

    async fn direct_probe_inner(&self, target: &Node) -> std::result::Result<(), DirectProbeError> {
        // The ping and any piggybacked state exchange share one
        // probe_timeout budget.
        let deadline = tokio::time::Instant::now() + self.config.probe_timeout;

        let ping = async {
            let conn = self.conn(target.id).await?;
            let state_hash = conn.ping().await?;
            Ok::<_, Error>((conn, state_hash))
        };

        let (conn, state_hash) = tokio::time::timeout_at(deadline, ping)
            .await
            .map_err(|_| DirectProbeError::Transport(Error::Timeout))?
            .map_err(DirectProbeError::Transport)?;

        // A differing hash means the directories diverged; exchange full
        // snapshots to make both sides consistent.
        if state_hash != self.state_hash() {
            info!("performing state exchange: node_id={}", target.id);

            let snapshot = node::to_infos(&self.nodes());
            let exchange = tokio::time::timeout_at(deadline, conn.pull_push_state(snapshot));

            match exchange.await {
                Ok(Ok(remote)) => {
                    if !remote.is_empty() {
                        self.apply_state(node::from_infos(remote), target.id);
                    }
                }
                Ok(Err(err)) => {
                    error!("state exchange failed: node_id={} err={}", target.id, err);
                    return Err(DirectProbeError::Exchange(err));
                }
                Err(_) => return Err(DirectProbeError::Exchange(Error::Timeout)),
            }
        }

        Ok(())
    }

    /// Asks every relay to ping the target on our behalf, concurrently,
    /// and tallies the votes
    ///
    /// Only a unanimous vote produces a result; a mixed vote or any
    /// relay failure aborts without a verdict.
    async fn indirect_probe(
        self: &Arc<Self>,
        target: &Node,
        relays: &[Node],
    ) -> Result<ProbeResult> {
        let probe_timeout = self.config.probe_timeout;
        let start = Instant::now();

        let mut tasks = Vec::with_capacity(relays.len());
        for relay in relays {
            let cluster = Arc::clone(self);
            let relay_id = relay.id;
            let target_id = target.id;

            tasks.push(tokio::spawn(async move {
                let conn = cluster.conn(relay_id).await?;
                conn.ping_indirect(target_id, probe_timeout).await
            }));
        }

        let tally = async {
            let mut votes: HashMap<Status, usize> = HashMap::new();
            for task in tasks {
                let result = task
                    .await
                    .map_err(|err| Error::Remote(err.to_string()))??;
                *votes.entry(result.status).or_insert(0) += 1;
            }
            Ok::<_, Error>(votes)
        };

        let votes = tokio::time::timeout(probe_timeout * 3, tally)
            .await
            .map_err(|_| Error::Timeout)??;

        let healthy = votes.get(&Status::Healthy).copied().unwrap_or(0);
        let unhealthy = votes.get(&Status::Unhealthy).copied().unwrap_or(0);

        if unhealthy == relays.len() {
            Ok(ProbeResult::unhealthy(
                "confirmed by indirect probes",
                start.elapsed(),
            ))
        } else if healthy == relays.len() {
            Ok(ProbeResult::healthy(start.elapsed()))
        } else {
            Err(Error::Unavailable("not enough votes".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use async_trait::async_trait;
    use driftdb_net::{Dialer, IndirectPingResult, NodeClient, NodeInfo, VersionedValueMsg};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// A scripted peer: pings succeed or fail, relayed probes answer
    /// with a fixed status.
    struct ScriptedClient {
        ping_ok: bool,
        state_hash: u64,
        indirect_status: Option<Status>,
        pulls: AtomicUsize,
    }

    impl ScriptedClient {
        fn reachable(state_hash: u64) -> Arc<Self> {
            Arc::new(Self {
                ping_ok: true,
                state_hash,
                indirect_status: None,
                pulls: AtomicUsize::new(0),
            })
        }

        fn unreachable() -> Arc<Self> {
            Arc::new(Self {
                ping_ok: false,
                state_hash: 0,
                indirect_status: None,
                pulls: AtomicUsize::new(0),
            })
        }

        fn relay(answer: Status) -> Arc<Self> {
            Arc::new(Self {
                ping_ok: true,
                state_hash: 0,
                indirect_status: Some(answer),
                pulls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl NodeClient for ScriptedClient {
        async fn ping(&self) -> Result<u64> {
            if self.ping_ok {
                Ok(self.state_hash)
            } else {
                Err(Error::ConnectionClosed)
            }
        }

        async fn ping_indirect(
            &self,
            _target: u32,
            _timeout: Duration,
        ) -> Result<IndirectPingResult> {
            match self.indirect_status {
                Some(status) => Ok(IndirectPingResult {
                    status,
                    duration_ms: 1,
                    message: String::new(),
                }),
                None => Err(Error::ConnectionClosed),
            }
        }

        async fn pull_push_state(&self, _nodes: Vec<NodeInfo>) -> Result<Vec<NodeInfo>> {
            self.pulls.fetch_add(1, Ordering::SeqCst);
            Ok(Vec::new())
        }

        async fn storage_get(&self, _key: &str) -> Result<Vec<VersionedValueMsg>> {
            Err(Error::KeyNotFound)
        }

        async fn storage_put(
            &self,
            _key: &str,
            _value: VersionedValueMsg,
            _primary: bool,
        ) -> Result<String> {
            Err(Error::ConnectionClosed)
        }

        async fn close(&self) -> Result<()> {
            Ok(())
        }
    }

    /// Routes dials to scripted peers by address.
    struct ScriptedDialer {
        peers: Mutex<HashMap<String, Arc<ScriptedClient>>>,
    }

    #[async_trait]
    impl Dialer for ScriptedDialer {
        async fn dial(&self, addr: &str) -> Result<Arc<dyn NodeClient>> {
            match self.peers.lock().get(addr) {
                Some(client) => Ok(client.clone() as Arc<dyn NodeClient>),
                None => Err(Error::ConnectionClosed),
            }
        }
    }

    fn entry(id: u32, status: Status) -> Node {
        Node {
            id,
            name: format!("node-{}", id),
            public_addr: format!("peer-{}", id),
            local_addr: String::new(),
            status,
            gen: 1,
            run_id: 100,
            error: String::new(),
        }
    }

    fn scripted_cluster(
        indirect_nodes: usize,
        peers: Vec<(u32, Arc<ScriptedClient>)>,
    ) -> Arc<SwimCluster> {
        let dialer = ScriptedDialer {
            peers: Mutex::new(
                peers
                    .iter()
                    .map(|(id, client)| (format!("peer-{}", id), client.clone()))
                    .collect(),
            ),
        };

        let cluster = Arc::new(SwimCluster::new(
            ClusterConfig {
                node_id: 1,
                node_name: "node-1".to_string(),
                public_addr: "peer-1".to_string(),
                probe_timeout: Duration::from_millis(200),
                indirect_nodes,
                ..ClusterConfig::default()
            },
            Arc::new(dialer),
        ));

        cluster.apply_state(
            peers
                .iter()
                .map(|(id, _)| entry(*id, Status::Healthy))
                .collect(),
            0,
        );

        cluster
    }

    #[tokio::test]
    async fn test_path_failure_does_not_commit() {
        // Target 3 is unreachable from us but healthy per relay 2:
        // a disagreement, so no state change.
        let relay = ScriptedClient::relay(Status::Healthy);
        let cluster = scripted_cluster(
            1,
            vec![(2, relay.clone()), (3, ScriptedClient::unreachable())],
        );

        let target = cluster.node(3).unwrap();
        cluster.probe_node(&target).await;

        assert_eq!(cluster.node(3).unwrap().status, Status::Healthy);
        assert_eq!(cluster.node(3).unwrap().gen, 1);
    }

    #[tokio::test]
    async fn test_confirmed_failure_commits_unhealthy() {
        let relay = ScriptedClient::relay(Status::Unhealthy);
        let cluster = scripted_cluster(
            1,
            vec![(2, relay.clone()), (3, ScriptedClient::unreachable())],
        );

        let target = cluster.node(3).unwrap();
        cluster.probe_node(&target).await;

        let node = cluster.node(3).unwrap();
        assert_eq!(node.status, Status::Unhealthy);
        assert_eq!(node.gen, 2);
        assert!(!node.error.is_empty());
    }

    #[tokio::test]
    async fn test_small_cluster_falls_back_to_direct_result() {
        // Two-node cluster: no relay is available, the direct
        // observation is committed as-is.
        let cluster = scripted_cluster(1, vec![(2, ScriptedClient::unreachable())]);

        let target = cluster.node(2).unwrap();
        cluster.probe_node(&target).await;

        assert_eq!(cluster.node(2).unwrap().status, Status::Unhealthy);
    }

    #[tokio::test]
    async fn test_recovery_commits_healthy_again() {
        let relay = ScriptedClient::relay(Status::Healthy);
        let target_peer = ScriptedClient::reachable(0);
        let cluster = scripted_cluster(1, vec![(2, relay), (3, target_peer.clone())]);

        cluster.set_status(3, Status::Unhealthy, "probe timed out");

        // The target answers pings again; the relay confirms, so the
        // entry flips back to healthy. The peer's zero state hash also
        // forces a (no-op) exchange along the way.
        let target = cluster.node(3).unwrap();
        cluster.probe_node(&target).await;

        assert_eq!(cluster.node(3).unwrap().status, Status::Healthy);
        assert_eq!(target_peer.pulls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_state_exchange_runs_on_hash_mismatch() {
        let peer = ScriptedClient::reachable(0xdeadbeef);
        let cluster = scripted_cluster(1, vec![(2, peer.clone())]);

        let target = cluster.node(2).unwrap();
        // Status unchanged (healthy), so the probe short-circuits after
        // the ping, but the exchange must still have happened.
        cluster.probe_node(&target).await;

        assert_eq!(peer.pulls.load(Ordering::SeqCst), 1);
        assert_eq!(cluster.node(2).unwrap().status, Status::Healthy);
    }

    #[tokio::test]
    async fn test_mixed_votes_do_not_commit() {
        let agree = ScriptedClient::relay(Status::Unhealthy);
        let disagree = ScriptedClient::relay(Status::Healthy);
        let cluster = scripted_cluster(
            2,
            vec![
                (2, agree),
                (4, disagree),
                (3, ScriptedClient::unreachable()),
            ],
        );

        let target = cluster.node(3).unwrap();
        cluster.probe_node(&target).await;

        assert_eq!(cluster.node(3).unwrap().status, Status::Healthy);
    }
}
