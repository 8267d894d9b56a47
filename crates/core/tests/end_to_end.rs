use whanau_api::*;
use whanau_test_utils::{
    cluster::TestCluster, enable_tracing, graph::SocialGraph, iter_check,
};

const NSERVERS: usize = 10;
const NKEYS: usize = 20;
const NMASTERS: usize = 3;

/// A cluster in the shape of the real get/put scenario: complete trust
/// graph, three masters, twenty keys replicated on consecutive node
/// triples with a signed "hello" record.
async fn replicated_cluster() -> TestCluster {
    let graph = SocialGraph::complete(NSERVERS);
    let config = WhanauConfig::for_cluster(NSERVERS, NKEYS);
    let cluster = TestCluster::build(&graph, NMASTERS, &[], &config);

    for i in 0..NKEYS {
        let key = Key::from(format!("{i}").as_str());
        let owner = i % NSERVERS;
        let members =
            [owner, (owner + 1) % NSERVERS, (owner + 2) % NSERVERS];
        cluster
            .seed_replicated_key(&key, &members, "hello", owner)
            .await;
    }

    cluster.setup_all().await;
    cluster
}

#[tokio::test(flavor = "multi_thread")]
async fn get_returns_replicated_value() {
    enable_tracing();
    let cluster = replicated_cluster().await;

    let client = cluster.client(0);
    let value = client.get(&Key::from("0")).await.unwrap();
    assert_eq!(bytes::Bytes::from_static(b"hello"), value);
}

#[tokio::test(flavor = "multi_thread")]
async fn put_on_replicated_key_is_readable_without_setup() {
    enable_tracing();
    let cluster = replicated_cluster().await;

    let client = cluster.client(0);
    let key = Key::from("0");

    client.put(&key, "helloworld").await.unwrap();

    // an update of an existing key goes through the replica log and
    // needs no setup epoch
    let value = client.get(&key).await.unwrap();
    assert_eq!(bytes::Bytes::from_static(b"helloworld"), value);
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_write_materializes_after_initiated_epoch() {
    enable_tracing();
    let cluster = replicated_cluster().await;

    let client = cluster.client(0);
    let key = Key::from("40");

    // the key is unknown to the routing layer
    assert!(matches!(client.get(&key).await, Err(WhError::NoKey)));

    // the write lands in a master's pending buffer, not in the DHT
    client.put(&key, "cantbefound").await.unwrap();
    assert!(matches!(client.get(&key).await, Err(WhError::NoKey)));
    let buffered: usize = (0..NMASTERS)
        .map(|m| cluster.nodes[m].pending_len())
        .sum();
    assert_eq!(1, buffered);

    // all masters flush and trigger the next epoch
    futures::future::join_all(
        (0..NMASTERS).map(|m| cluster.nodes[m].initiate_setup()),
    )
    .await;

    iter_check!(30_000, 500, {
        if let Ok(value) = client.get(&key).await {
            assert_eq!(bytes::Bytes::from_static(b"cantbefound"), value);
            break;
        }
    });

    // the buffer drained once the seed succeeded
    let buffered: usize = (0..NMASTERS)
        .map(|m| cluster.nodes[m].pending_len())
        .sum();
    assert_eq!(0, buffered);
}

#[tokio::test(flavor = "multi_thread")]
async fn pending_write_update_before_epoch_wins() {
    enable_tracing();
    let cluster = replicated_cluster().await;

    let client = cluster.client(0);
    let key = Key::from("101");

    client.put(&key, "cantbefound").await.unwrap();
    // a second write to a still-pending key replaces the buffered one
    client.put(&key, "newvalue").await.unwrap();

    futures::future::join_all(
        (0..NMASTERS).map(|m| cluster.nodes[m].initiate_setup()),
    )
    .await;

    iter_check!(30_000, 500, {
        if let Ok(value) = client.get(&key).await {
            assert_eq!(bytes::Bytes::from_static(b"newvalue"), value);
            break;
        }
    });
}
