//! The replica-group consensus layer: a total-order log per key over
//! the key's fixed replica group.
//!
//! Each slot is decided by single-decree Paxos: phase-1 prepare
//! against a ballot, phase-2 accept, then a learn notification.
//! Proposing returns the record decided at the slot, which may be a
//! competing client's; a writer keeps proposing at later slots until
//! its own record is decided. A majority of honest members is assumed
//! for safety; the routing layer composes groups toward that
//! probabilistically.

use crate::node::WhanauNode;
use futures::future::join_all;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::Ordering;
use whanau_api::*;

/// Bound on slots a proposer will contend for in one propose call.
const MAX_PROPOSE_ATTEMPTS: usize = 16;

/// One member's replica of a key's consensus log.
pub(crate) struct ReplicaLog {
    /// The fixed membership for this key.
    pub(crate) group: ReplicaGroup,
    promised: HashMap<u64, Ballot>,
    accepted: HashMap<u64, (Ballot, SignedRecord)>,
    decided: BTreeMap<u64, SignedRecord>,
}

impl ReplicaLog {
    /// A log seeded with its initial record decided at slot 0.
    pub(crate) fn seeded(group: ReplicaGroup, record: SignedRecord) -> Self {
        let mut decided = BTreeMap::new();
        decided.insert(0, record);
        Self {
            group,
            promised: HashMap::new(),
            accepted: HashMap::new(),
            decided,
        }
    }

    fn latest(&self) -> Option<(u64, SignedRecord)> {
        self.decided
            .last_key_value()
            .map(|(slot, record)| (*slot, record.clone()))
    }

    fn next_slot(&self) -> u64 {
        self.decided
            .last_key_value()
            .map(|(slot, _)| slot + 1)
            .unwrap_or(0)
    }
}

/// Read the most recent decided record for `key` from its replica
/// group. Requires replies from a majority of members; among those,
/// the record decided at the highest slot wins.
pub async fn read_latest(
    rpc: &DynRpc,
    group: &ReplicaGroup,
    key: &Key,
) -> WhResult<SignedRecord> {
    let replies = join_all(group.members.iter().map(|member| {
        rpc.call(
            member.clone(),
            Request::ReplicaRead { key: key.clone() },
        )
    }))
    .await;

    let mut heard = 0;
    let mut latest: Option<(u64, SignedRecord)> = None;
    for reply in replies {
        if let Ok(Reply::Latest { decided }) = reply {
            heard += 1;
            if let Some((slot, record)) = decided {
                if latest.as_ref().map_or(true, |(top, _)| slot > *top) {
                    latest = Some((slot, record));
                }
            }
        }
    }

    if heard < group.majority() {
        return Err(WhError::busy("no majority of replica reads"));
    }
    latest.map(|(_, record)| record).ok_or(WhError::NoKey)
}

impl WhanauNode {
    /// Latest decided record this member holds for `key`, if any.
    /// Exposed for inspection; remote reads go through
    /// [Request::ReplicaRead].
    pub fn replica_latest(&self, key: &Key) -> Option<SignedRecord> {
        self.replicas
            .lock()
            .unwrap()
            .get(key)
            .and_then(|log| log.latest())
            .map(|(_, record)| record)
    }

    pub(crate) fn seed_replica_log(
        &self,
        key: Key,
        group: ReplicaGroup,
        record: SignedRecord,
    ) {
        use std::collections::hash_map::Entry;
        let mut replicas = self.replicas.lock().unwrap();
        match replicas.entry(key) {
            Entry::Occupied(mut occupied) => {
                let log = occupied.get_mut();
                if log.group == group {
                    // re-seed of a group we already serve; keep any
                    // later decisions
                    if log.decided.is_empty() {
                        log.decided.insert(0, record);
                    }
                } else {
                    // the key was re-materialized with new membership
                    *log = ReplicaLog::seeded(group, record);
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(ReplicaLog::seeded(group, record));
            }
        }
    }

    fn next_undecided_slot(&self, key: &Key) -> u64 {
        self.replicas
            .lock()
            .unwrap()
            .get(key)
            .map(|log| log.next_slot())
            .unwrap_or(0)
    }

    /// Drive consensus until `record` is decided at some slot of the
    /// key's log. Returns the decided record on success.
    pub(crate) async fn handle_replica_propose(
        &self,
        key: Key,
        record: SignedRecord,
    ) -> WhResult<Reply> {
        crate::crypto::verify_record(&record)?;
        let group = self
            .replicas
            .lock()
            .unwrap()
            .get(&key)
            .map(|log| log.group.clone())
            .ok_or(WhError::NoKey)?;

        for _ in 0..MAX_PROPOSE_ATTEMPTS {
            let slot = self.next_undecided_slot(&key);
            match self
                .decide_slot(&group, &key, slot, record.clone())
                .await
            {
                Ok(decided) => {
                    if decided == record {
                        return Ok(Reply::Decided { record: decided });
                    }
                    // a competitor won this slot; contend for the next
                }
                Err(err) if err.is_transient() => {
                    tokio::time::sleep(
                        std::time::Duration::from_millis(10),
                    )
                    .await;
                }
                Err(err) => return Err(err),
            }
        }
        Err(WhError::busy("record not decided"))
    }

    /// One single-decree round at `slot` with a fresh ballot.
    async fn decide_slot(
        &self,
        group: &ReplicaGroup,
        key: &Key,
        slot: u64,
        preferred: SignedRecord,
    ) -> WhResult<SignedRecord> {
        let ballot = Ballot {
            round: self.ballot_round.fetch_add(1, Ordering::SeqCst) + 1,
            proposer: self.node_id().clone(),
        };

        // phase 1
        let replies = join_all(group.members.iter().map(|member| {
            self.rpc.call(
                member.clone(),
                Request::ReplicaPrepare {
                    key: key.clone(),
                    slot,
                    ballot: ballot.clone(),
                },
            )
        }))
        .await;

        let mut promises = 0;
        let mut adopted: Option<(Ballot, SignedRecord)> = None;
        for reply in replies {
            if let Ok(Reply::Promise { accepted, .. }) = reply {
                promises += 1;
                if let Some((b, record)) = accepted {
                    if adopted.as_ref().map_or(true, |(top, _)| b > *top) {
                        adopted = Some((b, record));
                    }
                }
            }
        }
        if promises < group.majority() {
            return Err(WhError::busy("prepare did not reach a majority"));
        }

        // a previously accepted value must be driven to decision
        // before any new value
        let value =
            adopted.map(|(_, record)| record).unwrap_or(preferred);

        // phase 2
        let replies = join_all(group.members.iter().map(|member| {
            self.rpc.call(
                member.clone(),
                Request::ReplicaAccept {
                    key: key.clone(),
                    slot,
                    ballot: ballot.clone(),
                    record: value.clone(),
                },
            )
        }))
        .await;

        let accepts = replies
            .iter()
            .filter(|r| matches!(r, Ok(Reply::Accepted { .. })))
            .count();
        if accepts < group.majority() {
            return Err(WhError::busy("accept did not reach a majority"));
        }

        // best-effort decision broadcast, including to ourselves
        join_all(group.members.iter().map(|member| {
            self.rpc.call(
                member.clone(),
                Request::ReplicaLearn {
                    key: key.clone(),
                    slot,
                    record: value.clone(),
                },
            )
        }))
        .await;

        Ok(value)
    }

    pub(crate) fn handle_replica_prepare(
        &self,
        key: &Key,
        slot: u64,
        ballot: Ballot,
    ) -> WhResult<Reply> {
        let mut replicas = self.replicas.lock().unwrap();
        let log = replicas.get_mut(key).ok_or(WhError::NoKey)?;
        if let Some(promised) = log.promised.get(&slot) {
            if *promised > ballot {
                return Err(WhError::busy("promised a higher ballot"));
            }
        }
        log.promised.insert(slot, ballot.clone());
        Ok(Reply::Promise {
            ballot,
            accepted: log.accepted.get(&slot).cloned(),
        })
    }

    pub(crate) fn handle_replica_accept(
        &self,
        key: &Key,
        slot: u64,
        ballot: Ballot,
        record: SignedRecord,
    ) -> WhResult<Reply> {
        crate::crypto::verify_record(&record)?;
        let mut replicas = self.replicas.lock().unwrap();
        let log = replicas.get_mut(key).ok_or(WhError::NoKey)?;
        if let Some(promised) = log.promised.get(&slot) {
            if *promised > ballot {
                return Err(WhError::busy("promised a higher ballot"));
            }
        }
        log.promised.insert(slot, ballot.clone());
        log.accepted.insert(slot, (ballot.clone(), record));
        Ok(Reply::Accepted { ballot })
    }

    pub(crate) fn handle_replica_learn(
        &self,
        key: &Key,
        slot: u64,
        record: SignedRecord,
    ) -> WhResult<Reply> {
        crate::crypto::verify_record(&record)?;
        let mut replicas = self.replicas.lock().unwrap();
        let log = replicas.get_mut(key).ok_or(WhError::NoKey)?;
        log.decided.insert(slot, record);
        Ok(Reply::Ok)
    }

    pub(crate) fn handle_replica_read(&self, key: &Key) -> WhResult<Reply> {
        let replicas = self.replicas.lock().unwrap();
        // a member that was never seeded simply has nothing decided
        let decided =
            replicas.get(key).and_then(|log| log.latest());
        Ok(Reply::Latest { decided })
    }
}
