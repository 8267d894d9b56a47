use rand::SeedableRng;
use whanau_api::*;
use whanau_test_utils::{
    cluster::TestCluster, enable_tracing, graph::SocialGraph,
};

const NSERVERS: usize = 20;
const NSYBILS: usize = 10;
const NKEYS: usize = 100;
const ATTACK_EDGE_PROB: f64 = 0.5;

/// Half the cluster is sybil, attack edges are plentiful, and the
/// sybil region serves degenerate replies. Honest-side lookups of
/// honest-owned keys must keep working at a non-degenerate rate, and
/// every resolved value must be the correct one.
#[tokio::test(flavor = "multi_thread")]
async fn honest_lookups_survive_sybil_region() {
    enable_tracing();

    let sybil: Vec<bool> =
        (0..NSERVERS).map(|i| i >= NSERVERS - NSYBILS).collect();
    let n_honest = NSERVERS - NSYBILS;

    let mut rng = rand::rngs::StdRng::seed_from_u64(826);
    let graph =
        SocialGraph::with_sybils(&sybil, 0.9, ATTACK_EDGE_PROB, &mut rng);
    println!("attack edges: {}", graph.attack_edges);

    let config = WhanauConfig::for_cluster(NSERVERS, NKEYS);
    let cluster = TestCluster::build(&graph, 0, &sybil, &config);

    // honest-owned keys, round-robin across the honest nodes
    let mut expected = Vec::new();
    for i in 0..NKEYS {
        let key = Key::from(format!("{i:03}").as_str());
        let owner = i % n_honest;
        let group = cluster.group_of(&[
            owner,
            (owner + 1) % n_honest,
            (owner + 2) % n_honest,
        ]);
        cluster.nodes[owner].insert_record(key.clone(), group.clone());
        expected.push((key, group));
    }

    cluster.setup_all().await;

    let mut found = 0;
    let mut total = 0;
    for node in cluster.nodes.iter().take(n_honest) {
        for (key, group) in &expected {
            total += 1;
            match node.lookup(key).await {
                Ok(resolved) => {
                    // a sybil cannot forge a mapping without the
                    // honest seeds backing it
                    assert_eq!(
                        resolved, *group,
                        "wrong group for key {key}",
                    );
                    found += 1;
                }
                Err(WhError::NoKey) => {}
                Err(err) => panic!("lookup of {key} failed: {err}"),
            }
        }
    }

    let rate = found as f64 / total as f64;
    println!(
        "honest lookups: {found}/{total} ({rate:.2}), \
         attack edges: {}",
        graph.attack_edges,
    );
    assert!(
        rate >= 0.2,
        "honest lookup success degenerated to {rate:.2}",
    );
}

/// With no attack edges the sybil region is unreachable and honest
/// coverage matches the honest-only baseline.
#[tokio::test(flavor = "multi_thread")]
async fn isolated_sybil_region_costs_nothing() {
    enable_tracing();

    let sybil: Vec<bool> =
        (0..NSERVERS).map(|i| i >= NSERVERS - NSYBILS).collect();
    let n_honest = NSERVERS - NSYBILS;

    let mut rng = rand::rngs::StdRng::seed_from_u64(827);
    let graph = SocialGraph::with_sybils(&sybil, 0.9, 0.0, &mut rng);
    assert_eq!(0, graph.attack_edges);

    let config = WhanauConfig::for_cluster(NSERVERS, NKEYS);
    let cluster = TestCluster::build(&graph, 0, &sybil, &config);

    let mut expected = Vec::new();
    for i in 0..NKEYS {
        let key = Key::from(format!("{i:03}").as_str());
        let owner = i % n_honest;
        let group = cluster.group_of(&[owner, (owner + 1) % n_honest]);
        cluster.nodes[owner].insert_record(key.clone(), group.clone());
        expected.push((key, group));
    }

    cluster.setup_all().await;

    let mut found = 0;
    let mut total = 0;
    for node in cluster.nodes.iter().take(n_honest) {
        for (key, _) in &expected {
            total += 1;
            if node.lookup(key).await.is_ok() {
                found += 1;
            }
        }
    }
    assert!(
        found * 10 >= total * 9,
        "coverage without attack edges fell to {found}/{total}",
    );
}
