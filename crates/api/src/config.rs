//! Configuration of a whanau node.

/// Tuning parameters for one whanau node.
///
/// The routing parameters trade setup cost against lookup success
/// probability:
///
/// - `n_layers` is the height of the finger pyramid; more layers are
///   more robust against clustered ids but slow setup down.
/// - `n_fingers` controls id-space coverage per layer.
/// - `walk_len` is the random-walk step count; `Θ(log n)` steps give
///   near-uniform sampling of the honest region under the
///   bounded-attack-edge assumption.
/// - `db_size`, `succ_samples` and `succs_per_sample` size the sampled
///   `db` and successor lists.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WhanauConfig {
    /// Number of routing layers (`L`).
    pub n_layers: usize,

    /// Fingers sampled per layer (`F`).
    pub n_fingers: usize,

    /// Steps per random walk (`w`).
    pub walk_len: u32,

    /// Records sampled into the local `db` (`rd`).
    pub db_size: usize,

    /// Nodes sampled when building each successor list (`rs`).
    pub succ_samples: usize,

    /// Successor entries requested from each sampled node (`ts`).
    pub succs_per_sample: usize,

    /// Replica-group size (`R`); also the consensus cluster size.
    pub replica_size: usize,

    /// Attempts per lookup before reporting the key as absent.
    pub lookup_tries: usize,

    /// Rounds of systolic mixing performed when a setup epoch is
    /// initiated.
    pub mix_rounds: u32,

    /// Deadline applied to every rpc, in milliseconds.
    pub rpc_timeout_ms: u64,

    /// This node buffers pending writes and may initiate setup epochs.
    pub is_master: bool,

    /// Test-only: this node is adversary-controlled and serves
    /// degenerate replies.
    pub is_sybil: bool,
}

impl Default for WhanauConfig {
    fn default() -> Self {
        Self::for_cluster(32, 128)
    }
}

impl WhanauConfig {
    /// Derive parameters for a cluster of `n_nodes` nodes holding
    /// roughly `n_keys` keys, using the asymptotic scaling of the
    /// routing algorithm: walks of `Θ(log n)` steps and tables of
    /// `Θ(√(nk))` entries.
    pub fn for_cluster(n_nodes: usize, n_keys: usize) -> Self {
        const C: usize = 5;
        let n = n_nodes.max(2) as f64;
        let nk = n_keys.max(1) as f64;
        let sqrt_nk = nk.sqrt() as usize + 1;
        Self {
            n_layers: nk.ln() as usize + 1,
            n_fingers: C * sqrt_nk,
            walk_len: (C as f64 * n.ln()) as u32 + 1,
            db_size: 2 * C * sqrt_nk,
            succ_samples: C * sqrt_nk,
            succs_per_sample: C,
            replica_size: 3,
            lookup_tries: C * (n.ln() as usize + 1),
            mix_rounds: 20,
            rpc_timeout_ms: 500,
            is_master: false,
            is_sybil: false,
        }
    }

    /// Mark this node as a master.
    pub fn with_master(mut self, is_master: bool) -> Self {
        self.is_master = is_master;
        self
    }

    /// Mark this node as a sybil (test only).
    pub fn with_sybil(mut self, is_sybil: bool) -> Self {
        self.is_sybil = is_sybil;
        self
    }

    /// Override the replica-group size.
    pub fn with_replica_size(mut self, replica_size: usize) -> Self {
        self.replica_size = replica_size;
        self
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn cluster_scaling_is_monotone() {
        let small = WhanauConfig::for_cluster(10, 50);
        let large = WhanauConfig::for_cluster(100, 500);
        assert!(large.walk_len > small.walk_len);
        assert!(large.db_size > small.db_size);
        assert!(large.n_fingers > small.n_fingers);
        assert!(small.n_layers >= 1);
        assert!(small.walk_len >= 1);
    }

    #[test]
    fn config_serde_defaults() {
        let c: WhanauConfig = serde_json::from_str("{}").unwrap();
        assert!(!c.is_master);
        assert!(!c.is_sybil);
        assert_eq!(3, c.replica_size);
    }
}
