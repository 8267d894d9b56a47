use rand::SeedableRng;
use whanau_api::*;
use whanau_test_utils::{
    cluster::TestCluster, enable_tracing, graph::SocialGraph,
};

const NSERVERS: usize = 10;
const NKEYS: usize = 50;

/// Seed `NKEYS` records round-robin across the cluster, each mapped to
/// an arbitrary fixed replica group, and return the expected mapping.
fn seed_records(cluster: &TestCluster) -> Vec<(Key, ReplicaGroup)> {
    let mut expected = Vec::with_capacity(NKEYS);
    for i in 0..NKEYS {
        let key = Key::from(format!("{i:02}").as_str());
        let owner = i % NSERVERS;
        let group = cluster.group_of(&[
            owner,
            (owner + 1) % NSERVERS,
            (owner + 2) % NSERVERS,
        ]);
        cluster.nodes[owner].insert_record(key.clone(), group.clone());
        expected.push((key, group));
    }
    expected
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_resolves_seeded_keys_from_every_node() {
    enable_tracing();

    let mut rng = rand::rngs::StdRng::seed_from_u64(824);
    let graph = SocialGraph::ring_with_chords(NSERVERS, 0.5, &mut rng);
    let config = WhanauConfig::for_cluster(NSERVERS, NKEYS);
    let cluster = TestCluster::honest(&graph, &config);

    let expected = seed_records(&cluster);

    cluster.setup_all().await;

    // every honest node ends the epoch with sorted tables
    for node in &cluster.nodes {
        let tables = node.tables();
        assert_eq!(config.n_layers, tables.ids.len());
        assert!(
            tables.db.windows(2).all(|w| w[0].key <= w[1].key),
            "db out of order",
        );
        for fingers in &tables.fingers {
            assert!(
                fingers.windows(2).all(|w| w[0].id <= w[1].id),
                "fingers out of order",
            );
        }
        for succ in &tables.succ {
            assert!(
                succ.windows(2).all(|w| w[0].key <= w[1].key),
                "successors out of order",
            );
        }
    }

    // at least 90% of keys resolve from every node, and a resolved
    // group is always the one assigned at seeding
    for (i, node) in cluster.nodes.iter().enumerate() {
        let mut found = 0;
        for (key, group) in &expected {
            match node.lookup(key).await {
                Ok(resolved) => {
                    assert_eq!(
                        resolved, *group,
                        "wrong group returned for key {key}",
                    );
                    found += 1;
                }
                Err(WhError::NoKey) => {}
                Err(err) => panic!("lookup of {key} failed: {err}"),
            }
        }
        println!("node {i} resolved {found}/{NKEYS}");
        assert!(
            found * 10 >= NKEYS * 9,
            "node {i} resolved only {found}/{NKEYS} keys",
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn lookup_reports_missing_key_as_no_key() {
    enable_tracing();

    let mut rng = rand::rngs::StdRng::seed_from_u64(825);
    let graph = SocialGraph::ring_with_chords(NSERVERS, 0.5, &mut rng);
    let config = WhanauConfig::for_cluster(NSERVERS, NKEYS);
    let cluster = TestCluster::honest(&graph, &config);

    seed_records(&cluster);
    cluster.setup_all().await;

    let absent = Key::from("no-such-key");
    assert!(matches!(
        cluster.nodes[0].lookup(&absent).await,
        Err(WhError::NoKey)
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn systolic_mixing_terminates_and_conserves_tokens() {
    enable_tracing();

    let graph = SocialGraph::complete(NSERVERS);
    let config = WhanauConfig::for_cluster(NSERVERS, NKEYS);
    let cluster = TestCluster::honest(&graph, &config);

    futures::future::join_all(
        cluster.nodes.iter().map(|node| node.systolic_mix(100)),
    )
    .await;

    let total: usize =
        cluster.nodes.iter().map(|node| node.mix_pool_len()).sum();
    assert_eq!(
        NSERVERS * config.walk_len as usize,
        total,
        "tokens lost or duplicated during mixing",
    );
}
