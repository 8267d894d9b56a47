//! The rpc wire protocol.
//!
//! Every request and reply is labeled by operation name. The canonical
//! wire encoding is JSON; the surface is small and this keeps captures
//! human-debuggable.

use crate::*;

/// A consensus ballot number. Ordered first by round, then by the
/// proposing node, so that two proposers never share a ballot.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct Ballot {
    /// Monotonic per-proposer round counter.
    pub round: u64,

    /// The proposing node.
    pub proposer: NodeId,
}

/// An rpc request.
#[derive(
    Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Request {
    /// Continue a random walk with the given remaining step budget.
    /// A node with zero remaining steps is the walk's endpoint.
    RandomWalk {
        /// Remaining steps.
        steps: u32,
    },

    /// Ask a node for its layer-`layer` id key.
    GetId {
        /// The layer to report.
        layer: usize,
    },

    /// Resolve a key to its replica group, running the full layered
    /// lookup on the receiving node.
    Lookup {
        /// The key to resolve.
        key: Key,
    },

    /// Ask a node to search its own successor lists (all layers) and
    /// local insert table for a key.
    Try {
        /// The key to search for.
        key: Key,
    },

    /// Sample up to `count` of the responder's db entries whose key is
    /// at or cyclically after `start`.
    SampleSuccessors {
        /// The layer whose successor construction this sample feeds.
        layer: usize,
        /// Ring position to sample from.
        start: Key,
        /// Maximum entries to return.
        count: usize,
    },

    /// Request one uniformly random entry from the responder's locally
    /// inserted records.
    SampleDb,

    /// Buffer a write for a key unknown to the routing layer. Master
    /// nodes only.
    AddPending {
        /// The key being inserted.
        key: Key,
        /// The signed initial record.
        record: SignedRecord,
        /// The originating node, used for replica-group selection.
        origin: NodeId,
    },

    /// Master-to-master: report the pending writes buffered here.
    CollectPending,

    /// Master-to-master: drop pending writes that have been
    /// materialized.
    ClearPending {
        /// The keys that were seeded.
        keys: Vec<Key>,
    },

    /// Seed the responder's insert table and replica log with a newly
    /// materialized key.
    SeedKey {
        /// The materialized key.
        key: Key,
        /// The replica group chosen for the key.
        group: ReplicaGroup,
        /// The initial record, decided at slot 0.
        record: SignedRecord,
    },

    /// Ask a master to flush pending writes and trigger a cluster-wide
    /// setup epoch.
    InitiateSetup,

    /// Master broadcast: run one local setup epoch.
    StartSetup {
        /// The initiating master's epoch, so a node can ignore a
        /// broadcast it already served.
        epoch: u64,
    },

    /// One round of systolic mixing: push walk tokens to a neighbor.
    SystolicPush {
        /// The tokens being forwarded.
        tokens: Vec<NodeId>,
    },

    /// Drive consensus on a new record for a key this node replicates,
    /// until the record is decided in some slot.
    ReplicaPropose {
        /// The key being written.
        key: Key,
        /// The record to decide.
        record: SignedRecord,
    },

    /// Consensus phase 1.
    ReplicaPrepare {
        /// The key whose log is addressed.
        key: Key,
        /// The slot under contention.
        slot: u64,
        /// The proposer's ballot.
        ballot: Ballot,
    },

    /// Consensus phase 2.
    ReplicaAccept {
        /// The key whose log is addressed.
        key: Key,
        /// The slot under contention.
        slot: u64,
        /// The proposer's ballot.
        ballot: Ballot,
        /// The value to accept.
        record: SignedRecord,
    },

    /// Consensus decision notification.
    ReplicaLearn {
        /// The key whose log is addressed.
        key: Key,
        /// The decided slot.
        slot: u64,
        /// The decided record.
        record: SignedRecord,
    },

    /// Read the responder's latest decided record for a key.
    ReplicaRead {
        /// The key to read.
        key: Key,
    },
}

/// An rpc reply. Error outcomes are carried by [WhError], not by this
/// type.
#[derive(
    Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum Reply {
    /// Generic acknowledgement.
    Ok,

    /// A walk endpoint.
    Walk {
        /// The address of the node the walk ended at.
        addr: NodeId,
        /// Steps actually taken; a walk may stop short at a dead end.
        hops: u32,
    },

    /// A layer id.
    LayerId {
        /// The responder's id key at the requested layer.
        key: Key,
    },

    /// A resolved replica group (Lookup / Try).
    Value {
        /// The group authoritative for the requested key.
        group: ReplicaGroup,
    },

    /// Sampled successor entries.
    Entries {
        /// Db entries at or cyclically after the requested start key.
        entries: Vec<DbEntry>,
    },

    /// One sampled db entry, if the responder holds any records.
    DbSample {
        /// The sampled entry.
        entry: Option<DbEntry>,
    },

    /// The responder's buffered pending writes.
    Pending {
        /// The pending writes.
        writes: Vec<PendingWrite>,
    },

    /// Consensus phase-1 response.
    Promise {
        /// The ballot being promised.
        ballot: Ballot,
        /// The highest value already accepted at the slot, if any.
        accepted: Option<(Ballot, SignedRecord)>,
    },

    /// Consensus phase-2 response.
    Accepted {
        /// The ballot that was accepted.
        ballot: Ballot,
    },

    /// The record decided for a propose call.
    Decided {
        /// The decided record.
        record: SignedRecord,
    },

    /// The responder's latest decided record for a key, if any.
    Latest {
        /// Decided slot and record.
        decided: Option<(u64, SignedRecord)>,
    },
}

impl Request {
    /// Encode this request to canonical wire bytes.
    pub fn encode(&self) -> WhResult<bytes::Bytes> {
        encode(self)
    }

    /// Decode a request from wire bytes.
    pub fn decode(data: &[u8]) -> WhResult<Self> {
        decode(data)
    }
}

impl Reply {
    /// Encode this reply to canonical wire bytes.
    pub fn encode(&self) -> WhResult<bytes::Bytes> {
        encode(self)
    }

    /// Decode a reply from wire bytes.
    pub fn decode(data: &[u8]) -> WhResult<Self> {
        decode(data)
    }
}

fn encode<T: serde::Serialize>(t: &T) -> WhResult<bytes::Bytes> {
    serde_json::to_vec(t)
        .map(bytes::Bytes::from)
        .map_err(|e| WhError::other_src("encode", e))
}

fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> WhResult<T> {
    serde_json::from_slice(data).map_err(|e| WhError::other_src("decode", e))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_wire_round_trip() {
        let req = Request::SampleSuccessors {
            layer: 2,
            start: Key::from("17"),
            count: 5,
        };
        let enc = req.encode().unwrap();
        assert_eq!(req, Request::decode(&enc).unwrap());
    }

    #[test]
    fn request_wire_is_labeled_by_op() {
        let enc = Request::RandomWalk { steps: 3 }.encode().unwrap();
        let v: serde_json::Value = serde_json::from_slice(&enc).unwrap();
        assert_eq!("randomWalk", v["op"]);
    }

    #[test]
    fn ballot_order() {
        let a = NodeId::from(bytes::Bytes::from_static(b"a"));
        let b = NodeId::from(bytes::Bytes::from_static(b"b"));
        let low = Ballot {
            round: 1,
            proposer: b.clone(),
        };
        let high = Ballot {
            round: 2,
            proposer: a.clone(),
        };
        assert!(low < high);
        // same round: proposer id breaks the tie
        assert!(
            Ballot {
                round: 2,
                proposer: a
            } < Ballot {
                round: 2,
                proposer: b
            }
        );
    }

    #[test]
    fn reply_decode_rejects_garbage() {
        assert!(Reply::decode(b"not json").is_err());
    }
}
