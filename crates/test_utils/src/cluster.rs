//! An in-process whanau cluster for tests.

use crate::graph::SocialGraph;
use std::sync::Arc;
use whanau_api::*;
use whanau_core::{Client, MemRpc, NodeKeys, WhanauNode};

/// A cluster of nodes wired over one [MemRpc] registry.
///
/// Node keypairs are derived from each node's index, so a given graph
/// always produces the same addresses.
pub struct TestCluster {
    /// The shared in-process transport.
    pub rpc: Arc<MemRpc>,
    /// The nodes, in graph-index order.
    pub nodes: Vec<Arc<WhanauNode>>,
    masters: Vec<NodeId>,
}

impl TestCluster {
    /// Build a cluster over `graph`. The first `n_masters` nodes are
    /// masters; `sybil[i]` marks node `i` adversary-controlled.
    pub fn build(
        graph: &SocialGraph,
        n_masters: usize,
        sybil: &[bool],
        config: &WhanauConfig,
    ) -> Self {
        let n = graph.neighbors.len();
        let rpc = MemRpc::new(std::time::Duration::from_millis(
            config.rpc_timeout_ms,
        ));
        let transport: DynRpc = rpc.clone();

        let keys: Vec<NodeKeys> = (0..n)
            .map(|i| {
                let mut seed = [0u8; 32];
                seed[..8].copy_from_slice(&(i as u64 + 1).to_le_bytes());
                NodeKeys::from_seed(&seed)
            })
            .collect();
        let ids: Vec<NodeId> =
            keys.iter().map(|k| k.node_id().clone()).collect();
        let masters: Vec<NodeId> = ids[..n_masters].to_vec();

        let nodes: Vec<Arc<WhanauNode>> = keys
            .into_iter()
            .enumerate()
            .map(|(i, node_keys)| {
                let cfg = config
                    .clone()
                    .with_master(i < n_masters)
                    .with_sybil(sybil.get(i).copied().unwrap_or(false));
                let neighbors = graph.neighbors[i]
                    .iter()
                    .map(|&j| ids[j].clone())
                    .collect();
                WhanauNode::new(
                    node_keys,
                    cfg,
                    neighbors,
                    masters.clone(),
                    ids.clone(),
                    transport.clone(),
                )
            })
            .collect();

        for node in &nodes {
            rpc.register(node.node_id().clone(), node.clone());
        }

        Self {
            rpc,
            nodes,
            masters,
        }
    }

    /// Build an honest-only cluster with no masters.
    pub fn honest(graph: &SocialGraph, config: &WhanauConfig) -> Self {
        Self::build(graph, 0, &[], config)
    }

    /// The address of node `i`.
    pub fn node_id(&self, i: usize) -> NodeId {
        self.nodes[i].node_id().clone()
    }

    /// A replica group over the given node indices.
    pub fn group_of(&self, members: &[usize]) -> ReplicaGroup {
        ReplicaGroup::new(
            members.iter().map(|&i| self.node_id(i)).collect(),
        )
    }

    /// Run setup on every node concurrently, as the cluster would
    /// after a master broadcast.
    pub async fn setup_all(&self) {
        futures::future::join_all(
            self.nodes.iter().map(|node| node.setup()),
        )
        .await;
    }

    /// A client addressing node `i`.
    pub fn client(&self, i: usize) -> Client {
        let transport: DynRpc = self.rpc.clone();
        Client::new(transport, self.node_id(i), self.masters.clone())
    }

    /// Seed `key` as an already-replicated record: the writer signs
    /// `payload`, the member nodes accept the seed and the writer
    /// inserts the mapping into its local records.
    pub async fn seed_replicated_key(
        &self,
        key: &Key,
        members: &[usize],
        payload: impl Into<bytes::Bytes>,
        writer: usize,
    ) {
        let record = self.nodes[writer].sign_record(payload.into());
        let group = self.group_of(members);
        let transport: DynRpc = self.rpc.clone();
        for &m in members {
            let req = Request::SeedKey {
                key: key.clone(),
                group: group.clone(),
                record: record.clone(),
            };
            transport
                .call(self.node_id(m), req)
                .await
                .expect("seed rpc failed");
        }
        self.nodes[writer].insert_record(key.clone(), group);
    }

    /// Drop node `i` from the transport, simulating a crash.
    pub fn kill(&self, i: usize) {
        self.rpc.unregister(self.nodes[i].node_id());
    }
}
