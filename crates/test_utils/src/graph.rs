//! Social-graph construction for test clusters.
//!
//! The protocol takes the trust graph as an input and does not verify
//! its honesty; these generators are the injection point tests use to
//! shape it. Indices are node positions in the cluster, translated to
//! addresses by the cluster harness.

use rand::Rng;

/// An undirected neighbor graph over `n` nodes, plus bookkeeping
/// about edges crossing the honest/sybil boundary.
#[derive(Debug, Clone)]
pub struct SocialGraph {
    /// Adjacency lists by node index.
    pub neighbors: Vec<Vec<usize>>,

    /// Number of honest-to-sybil edges the generator created.
    pub attack_edges: usize,
}

impl SocialGraph {
    fn empty(n: usize) -> Self {
        Self {
            neighbors: vec![Vec::new(); n],
            attack_edges: 0,
        }
    }

    fn add_edge(&mut self, a: usize, b: usize) {
        self.neighbors[a].push(b);
        self.neighbors[b].push(a);
    }

    /// Every node trusts every other node.
    pub fn complete(n: usize) -> Self {
        let mut graph = Self::empty(n);
        for a in 0..n {
            for b in 0..a {
                graph.add_edge(a, b);
            }
        }
        graph
    }

    /// An honest-only random graph: each pair is connected with
    /// probability `edge_prob`. May be disconnected for sparse
    /// settings; see [SocialGraph::ring_with_chords] for a connected
    /// variant.
    pub fn honest(n: usize, edge_prob: f64, rng: &mut impl Rng) -> Self {
        let mut graph = Self::empty(n);
        for a in 0..n {
            for b in 0..a {
                if rng.gen::<f64>() < edge_prob {
                    graph.add_edge(a, b);
                }
            }
        }
        graph
    }

    /// A trust ring with random chords: node `i` trusts `i±1`, and
    /// each remaining pair is connected with probability
    /// `chord_prob`. Always connected.
    pub fn ring_with_chords(
        n: usize,
        chord_prob: f64,
        rng: &mut impl Rng,
    ) -> Self {
        let mut graph = Self::empty(n);
        for a in 0..n {
            graph.add_edge(a, (a + 1) % n);
        }
        for a in 0..n {
            for b in 0..a {
                if (a + 1) % n == b || (b + 1) % n == a {
                    continue;
                }
                if rng.gen::<f64>() < chord_prob {
                    graph.add_edge(a, b);
                }
            }
        }
        graph
    }

    /// A graph with a sybil region: honest pairs connect with
    /// `edge_prob`, sybil pairs always connect, and each
    /// honest/sybil pair becomes an attack edge with `attack_prob`.
    pub fn with_sybils(
        sybil: &[bool],
        edge_prob: f64,
        attack_prob: f64,
        rng: &mut impl Rng,
    ) -> Self {
        let n = sybil.len();
        let mut graph = Self::empty(n);
        for a in 0..n {
            for b in 0..a {
                match (sybil[a], sybil[b]) {
                    (true, true) => graph.add_edge(a, b),
                    (false, false) => {
                        if rng.gen::<f64>() < edge_prob {
                            graph.add_edge(a, b);
                        }
                    }
                    _ => {
                        if rng.gen::<f64>() < attack_prob {
                            graph.attack_edges += 1;
                            graph.add_edge(a, b);
                        }
                    }
                }
            }
        }
        graph
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn complete_graph_degree() {
        let g = SocialGraph::complete(5);
        assert!(g.neighbors.iter().all(|n| n.len() == 4));
        assert_eq!(0, g.attack_edges);
    }

    #[test]
    fn ring_is_connected() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let g = SocialGraph::ring_with_chords(10, 0.0, &mut rng);
        assert!(g.neighbors.iter().all(|n| n.len() >= 2));
    }

    #[test]
    fn sybil_region_is_clique() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let sybil = [false, false, true, true, true];
        let g = SocialGraph::with_sybils(&sybil, 1.0, 0.0, &mut rng);
        // the three sybils connect to each other and never to honest
        for s in 2..5 {
            assert_eq!(2, g.neighbors[s].len());
            assert!(g.neighbors[s].iter().all(|&p| sybil[p]));
        }
        assert_eq!(0, g.attack_edges);
    }
}
