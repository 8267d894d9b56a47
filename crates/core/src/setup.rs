//! The per-epoch setup engine.
//!
//! Each epoch a node rebuilds, from random-walk samples alone: its
//! `db` (a sampled fraction of the key-to-group mapping), one id key
//! per layer, a finger table per layer and a successor list per layer.
//! Individual rpc failures during sampling are absorbed by issuing
//! more samples (bounded at twice the target count) or by accepting a
//! shorter table; setup never fails hard, degraded tables only lower
//! lookup success probability.

use crate::node::{Finger, RoutingTables, WhanauNode};
use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use whanau_api::*;

/// Rank of a sampled entry for dedup tie-breaking: entries reached by
/// shorter walks win, then the lexicographically smaller digest of the
/// canonical entry bytes.
fn entry_rank(entry: &DbEntry, hops: u32) -> (u32, [u8; 32]) {
    (hops, Sha256::digest(entry.canonical_bytes()).into())
}

impl WhanauNode {
    /// One full epoch as triggered by a master broadcast: warm the
    /// mixing distribution, then rebuild the routing tables.
    pub async fn run_epoch(&self) -> WhResult<u64> {
        self.systolic_mix(self.config.mix_rounds).await;
        self.setup().await
    }

    /// Rebuild this node's routing tables from fresh samples.
    ///
    /// Idempotent per epoch: a second invocation overwrites the first.
    /// Tables are installed as whole snapshots at layer boundaries, so
    /// concurrent rpc readers never observe torn state.
    pub async fn setup(&self) -> WhResult<u64> {
        let _gate = self.setup_gate.lock().await;
        let started = std::time::Instant::now();

        let db = self.build_db().await;

        let n_layers = self.config.n_layers.max(1);
        let mut ids: Vec<Key> = Vec::with_capacity(n_layers);
        let mut fingers: Vec<Vec<Finger>> = Vec::with_capacity(n_layers);
        let mut succ: Vec<Vec<DbEntry>> = Vec::with_capacity(n_layers);

        for layer in 0..n_layers {
            let id = self.choose_id(layer, &db).await;
            ids.push(id.clone());

            // publish the new id before sampling fingers, so peers
            // concurrently running their own setup can see it
            self.install_tables(RoutingTables {
                db: db.clone(),
                ids: ids.clone(),
                fingers: fingers.clone(),
                succ: succ.clone(),
            });

            fingers.push(self.build_fingers(layer).await);
            succ.push(self.build_successors(layer, &id).await);

            self.install_tables(RoutingTables {
                db: db.clone(),
                ids: ids.clone(),
                fingers: fingers.clone(),
                succ: succ.clone(),
            });
        }

        let epoch = self
            .epoch
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
            + 1;
        tracing::info!(
            node = %self.node_id(),
            epoch,
            db = db.len(),
            elapsed = ?started.elapsed(),
            "setup complete",
        );
        Ok(epoch)
    }

    /// Sample `db_size` records from walk endpoints, one record per
    /// endpoint, deduplicated by key.
    async fn build_db(&self) -> Vec<DbEntry> {
        let target = self.config.db_size;
        let limit = self.neighbors.len().clamp(1, 32);

        let peers = self.sample_walk_peers(target).await;
        let sampled: Vec<(DbEntry, u32)> =
            futures::stream::iter(peers.into_iter().map(
                |(addr, hops)| async move {
                    match self.rpc.call(addr, Request::SampleDb).await {
                        Ok(Reply::DbSample { entry: Some(entry) }) => {
                            Some((entry, hops))
                        }
                        _ => None,
                    }
                },
            ))
            .buffer_unordered(limit)
            .filter_map(|r| async move { r })
            .collect()
            .await;

        let mut best: BTreeMap<Key, (DbEntry, (u32, [u8; 32]))> =
            BTreeMap::new();
        for (entry, hops) in sampled {
            let rank = entry_rank(&entry, hops);
            match best.get(&entry.key) {
                Some((_, prev)) if *prev <= rank => {}
                _ => {
                    best.insert(entry.key.clone(), (entry, rank));
                }
            }
        }
        best.into_values().map(|(entry, _)| entry).collect()
    }

    /// The layer id: layer 0 draws a random key from the node's own
    /// db; higher layers adopt a random walk endpoint's id one layer
    /// down, progressively spreading ids over the honest key space.
    async fn choose_id(&self, layer: usize, db: &[DbEntry]) -> Key {
        if layer > 0 {
            for _ in 0..3 {
                let peer = match self.random_walk().await {
                    Ok((peer, _)) => peer,
                    Err(_) => continue,
                };
                if let Ok(Reply::LayerId { key }) = self
                    .rpc
                    .call(peer, Request::GetId { layer: layer - 1 })
                    .await
                {
                    return key;
                }
            }
        }
        self.pick_db_key(db)
    }

    fn pick_db_key(&self, db: &[DbEntry]) -> Key {
        use rand::seq::SliceRandom;
        db.choose(&mut rand::thread_rng())
            .map(|entry| entry.key.clone())
            .unwrap_or_else(|| Key::from(self.node_id().0 .0.clone()))
    }

    /// Sample `n_fingers` peers and their ids at `layer`, sorted by
    /// id. A second sampling pass covers peers that had not yet
    /// published an id for this layer.
    async fn build_fingers(&self, layer: usize) -> Vec<Finger> {
        let target = self.config.n_fingers;
        let mut out: Vec<Finger> = Vec::with_capacity(target);

        for pass in 0..2 {
            let need = target - out.len();
            if need == 0 {
                break;
            }
            if pass > 0 {
                tokio::time::sleep(std::time::Duration::from_millis(20))
                    .await;
            }
            let peers = self.sample_walk_peers(need).await;
            let limit = self.neighbors.len().clamp(1, 32);
            let found: Vec<Finger> =
                futures::stream::iter(peers.into_iter().map(
                    |(addr, _)| async move {
                        match self
                            .rpc
                            .call(addr.clone(), Request::GetId { layer })
                            .await
                        {
                            Ok(Reply::LayerId { key }) => {
                                Some(Finger { addr, id: key })
                            }
                            _ => None,
                        }
                    },
                ))
                .buffer_unordered(limit)
                .filter_map(|r| async move { r })
                .collect()
                .await;
            out.extend(found);
        }

        out.sort_by(|a, b| (&a.id, &a.addr).cmp(&(&b.id, &b.addr)));
        out.dedup_by(|a, b| a.addr == b.addr && a.id == b.id);
        out
    }

    /// Sample `succ_samples` peers and merge the db entries they hold
    /// at or cyclically after this layer's id, sorted by key.
    async fn build_successors(
        &self,
        layer: usize,
        id: &Key,
    ) -> Vec<DbEntry> {
        let peers = self.sample_walk_peers(self.config.succ_samples).await;
        let limit = self.neighbors.len().clamp(1, 32);
        let count = self.config.succs_per_sample;

        let mut merged: Vec<DbEntry> =
            futures::stream::iter(peers.into_iter().map(
                |(addr, _)| async move {
                    let req = Request::SampleSuccessors {
                        layer,
                        start: id.clone(),
                        count,
                    };
                    match self.rpc.call(addr, req).await {
                        Ok(Reply::Entries { entries }) => entries,
                        _ => vec![],
                    }
                },
            ))
            .buffer_unordered(limit)
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .flatten()
            .collect();

        merged.sort();
        merged.dedup();
        merged
    }

    pub(crate) fn handle_sample_db(&self) -> WhResult<Reply> {
        let store = self.kvstore.lock().unwrap();
        if store.is_empty() {
            return Ok(Reply::DbSample { entry: None });
        }
        let nth = rand::random::<usize>() % store.len();
        let entry = store
            .iter()
            .nth(nth)
            .map(|(key, group)| DbEntry {
                key: key.clone(),
                group: group.clone(),
            });
        Ok(Reply::DbSample { entry })
    }

    pub(crate) fn handle_sample_successors(
        &self,
        _layer: usize,
        start: &Key,
        count: usize,
    ) -> WhResult<Reply> {
        let tables = self.tables();
        let db = &tables.db;
        if db.is_empty() {
            return Ok(Reply::Entries { entries: vec![] });
        }
        // the key space is a ring: wrap past the greatest key
        let from = db.partition_point(|entry| entry.key < *start);
        let entries = (0..count.min(db.len()))
            .map(|i| db[(from + i) % db.len()].clone())
            .collect();
        Ok(Reply::Entries { entries })
    }
}
