//! The pending-write pipeline.
//!
//! Writes to keys unknown to the routing layer are buffered at master
//! nodes and materialized into the DHT when a master initiates the
//! next setup epoch. Responsibility for each pending key is
//! partitioned deterministically across the master list, so
//! concurrently initiating masters never seed conflicting replica
//! groups for the same key.

use crate::node::WhanauNode;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use whanau_api::*;

/// The master responsible for a key, by hash of the key over the
/// shared master list. Both the flush pipeline and the client route a
/// given key to the same master, so a re-written pending key replaces
/// its older buffered record instead of forking across masters.
pub(crate) fn master_for<'a>(
    masters: &'a [NodeId],
    key: &Key,
) -> Option<&'a NodeId> {
    if masters.is_empty() {
        return None;
    }
    let digest: [u8; 32] = Sha256::digest(&key.0 .0).into();
    let at = u64::from_le_bytes(digest[..8].try_into().unwrap()) as usize
        % masters.len();
    Some(&masters[at])
}

impl WhanauNode {
    pub(crate) fn handle_add_pending(
        &self,
        key: Key,
        record: SignedRecord,
        origin: NodeId,
    ) -> WhResult<Reply> {
        if !self.config.is_master {
            return Err(WhError::other("not a master"));
        }
        crate::crypto::verify_record(&record)?;
        // a newer write to the same pending key replaces the older one
        self.pending.lock().unwrap().insert(
            key.clone(),
            PendingWrite {
                key,
                record,
                origin,
            },
        );
        Ok(Reply::Ok)
    }

    pub(crate) fn handle_collect_pending(&self) -> WhResult<Reply> {
        if !self.config.is_master {
            return Err(WhError::other("not a master"));
        }
        Ok(Reply::Pending {
            writes: self
                .pending
                .lock()
                .unwrap()
                .values()
                .cloned()
                .collect(),
        })
    }

    pub(crate) fn handle_clear_pending(
        &self,
        keys: &[Key],
    ) -> WhResult<Reply> {
        let mut pending = self.pending.lock().unwrap();
        for key in keys {
            pending.remove(key);
        }
        Ok(Reply::Ok)
    }

    /// The number of writes currently buffered here.
    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Flush pending writes into the DHT and trigger a cluster-wide
    /// setup epoch. Master nodes only.
    ///
    /// Pending tables are unioned across all masters; this master then
    /// materializes its deterministic share, clears those entries
    /// everywhere, and broadcasts the setup trigger.
    pub async fn initiate_setup(&self) -> WhResult<()> {
        if !self.config.is_master {
            return Err(WhError::other("not a master"));
        }

        let mut union: BTreeMap<Key, PendingWrite> =
            self.pending.lock().unwrap().clone();
        for master in self.masters.clone() {
            if master == *self.node_id() {
                continue;
            }
            match self.rpc.call(master, Request::CollectPending).await {
                Ok(Reply::Pending { writes }) => {
                    for write in writes {
                        union.entry(write.key.clone()).or_insert(write);
                    }
                }
                other => {
                    tracing::debug!(
                        ?other,
                        "pending collection from a master failed"
                    );
                }
            }
        }

        let mut seeded: Vec<Key> = Vec::new();
        for (key, write) in union {
            if master_for(&self.masters, &key) != Some(self.node_id()) {
                continue;
            }
            match self.materialize(&write).await {
                Ok(()) => seeded.push(key),
                Err(err) => {
                    // left in the buffer for the next epoch
                    tracing::warn!(%key, ?err, "pending write not seeded");
                }
            }
        }

        if !seeded.is_empty() {
            tracing::info!(
                node = %self.node_id(),
                count = seeded.len(),
                "materialized pending writes",
            );
            self.handle_clear_pending(&seeded)?;
            join_all(self.masters.iter().filter(|m| *m != self.node_id()).map(
                |master| {
                    self.rpc.call(
                        master.clone(),
                        Request::ClearPending {
                            keys: seeded.clone(),
                        },
                    )
                },
            ))
            .await;
        }

        let epoch = self.epoch() + 1;
        join_all(self.peers.iter().map(|peer| {
            self.rpc
                .call(peer.clone(), Request::StartSetup { epoch })
        }))
        .await;
        Ok(())
    }

    /// Choose a replica group for a pending write and seed its
    /// members. Requires a majority of the chosen members to accept
    /// the seed.
    async fn materialize(&self, write: &PendingWrite) -> WhResult<()> {
        let group = self.choose_group(&write.origin).await?;
        let replies = join_all(group.members.iter().map(|member| {
            self.rpc.call(
                member.clone(),
                Request::SeedKey {
                    key: write.key.clone(),
                    group: group.clone(),
                    record: write.record.clone(),
                },
            )
        }))
        .await;

        let oks = replies
            .iter()
            .filter(|r| matches!(r, Ok(Reply::Ok)))
            .count();
        if oks < group.majority() {
            return Err(WhError::busy("seed quorum not reached"));
        }
        Ok(())
    }

    /// Pick replica members by random walks started from the write's
    /// origin, falling back to walks from this master when the origin
    /// is unreachable. Walks repeat up to twice the group size to
    /// gather distinct members.
    async fn choose_group(
        &self,
        origin: &NodeId,
    ) -> WhResult<ReplicaGroup> {
        let size = self.config.replica_size;
        let mut members: Vec<NodeId> = Vec::with_capacity(size);

        for _ in 0..size.saturating_mul(2) {
            if members.len() == size {
                break;
            }
            let walk = Request::RandomWalk {
                steps: self.config.walk_len,
            };
            let endpoint =
                match self.rpc.call(origin.clone(), walk).await {
                    Ok(Reply::Walk { addr, .. }) => Some(addr),
                    _ => self
                        .random_walk()
                        .await
                        .ok()
                        .map(|(addr, _)| addr),
                };
            if let Some(addr) = endpoint {
                if !members.contains(&addr) {
                    members.push(addr);
                }
            }
        }

        if members.is_empty() {
            return Err(WhError::walk("no replica members reachable"));
        }
        Ok(ReplicaGroup::new(members))
    }
}
