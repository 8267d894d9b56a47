//! Types dealing with stored records and replica groups.
//!
//! The value resolved by a routing lookup is not the user payload
//! itself but a [ReplicaGroup]: the fixed set of nodes running
//! consensus for that key. The payload lives in the group's replicated
//! log as a [SignedRecord], whose detached signature covers a
//! canonical byte encoding of the record with the signature slot
//! omitted.

use crate::*;
use bytes::BufMut;

/// The ordered list of node addresses authoritative for a key.
///
/// Membership is fixed at the setup epoch when the key is materialized
/// and changed only by a subsequent epoch re-running setup.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
#[serde(transparent)]
pub struct ReplicaGroup {
    /// The group members, in selection order.
    pub members: Vec<NodeId>,
}

impl ReplicaGroup {
    /// Construct a group from a member list.
    pub fn new(members: Vec<NodeId>) -> Self {
        Self { members }
    }

    /// The smallest number of members constituting a majority.
    pub fn majority(&self) -> usize {
        self.members.len() / 2 + 1
    }

    /// `true` if the given node is a member of this group.
    pub fn contains(&self, node: &NodeId) -> bool {
        self.members.contains(node)
    }
}

/// A signed value record, the "true value" stored for a key.
///
/// The signature covers [SignedRecord::canonical_bytes], i.e. the
/// record with the signature slot omitted. The binding of
/// `writer_pub_key` to an identity is out of scope here; it is
/// trust-on-first-use or an external concern.
#[derive(
    Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct SignedRecord {
    /// The user payload.
    #[serde(with = "crate::serde_bytes_base64")]
    pub payload: bytes::Bytes,

    /// The address of the writer that produced this record.
    pub writer: NodeId,

    /// The writer's claimed ed25519 public key bytes.
    #[serde(with = "crate::serde_bytes_base64")]
    pub writer_pub_key: bytes::Bytes,

    /// Detached ed25519 signature over [SignedRecord::canonical_bytes].
    #[serde(with = "crate::serde_bytes_base64")]
    pub signature: bytes::Bytes,
}

impl SignedRecord {
    /// The deterministic byte encoding covered by the signature:
    /// the `payload`, `writer`, and `writer_pub_key` fields in that
    /// order, each prefixed by its length as a little-endian u64.
    pub fn canonical_bytes(&self) -> bytes::Bytes {
        canonical_record_bytes(
            &self.payload,
            &self.writer,
            &self.writer_pub_key,
        )
    }
}

/// Compute the canonical signing bytes for a record, see
/// [SignedRecord::canonical_bytes].
pub fn canonical_record_bytes(
    payload: &[u8],
    writer: &NodeId,
    writer_pub_key: &[u8],
) -> bytes::Bytes {
    let mut out = bytes::BytesMut::with_capacity(
        24 + payload.len() + writer.len() + writer_pub_key.len(),
    );
    for field in [payload, &writer.0 .0[..], writer_pub_key] {
        out.put_u64_le(field.len() as u64);
        out.put_slice(field);
    }
    out.freeze()
}

/// One entry of the global key-to-group mapping, as held in a node's
/// sampled `db` and successor lists.
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
pub struct DbEntry {
    /// The record key.
    pub key: Key,

    /// The replica group authoritative for the key.
    pub group: ReplicaGroup,
}

impl DbEntry {
    /// Deterministic encoding of this entry, used for tie-breaking
    /// between conflicting sampled entries.
    pub fn canonical_bytes(&self) -> bytes::Bytes {
        let mut out = bytes::BytesMut::new();
        out.put_u64_le(self.key.len() as u64);
        out.put_slice(&self.key);
        for m in &self.group.members {
            out.put_u64_le(m.len() as u64);
            out.put_slice(m);
        }
        out.freeze()
    }
}

/// A write buffered at a master node, awaiting materialization at the
/// next setup epoch.
#[derive(
    Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub struct PendingWrite {
    /// The key being inserted.
    pub key: Key,

    /// The initial signed record for the key.
    pub record: SignedRecord,

    /// The node the write originated from. Replica-group selection
    /// walks start here.
    pub origin: NodeId,
}

#[cfg(test)]
mod test {
    use super::*;

    fn node(b: &'static [u8]) -> NodeId {
        NodeId::from(bytes::Bytes::from_static(b))
    }

    #[test]
    fn majority_sizes() {
        for (n, m) in [(1, 1), (2, 2), (3, 2), (4, 3), (5, 3), (7, 4)] {
            let g = ReplicaGroup::new(
                (0..n)
                    .map(|i| {
                        NodeId::from(bytes::Bytes::from(vec![i as u8]))
                    })
                    .collect(),
            );
            assert_eq!(m, g.majority());
        }
    }

    #[test]
    fn canonical_bytes_are_field_sensitive() {
        let base = canonical_record_bytes(b"payload", &node(b"w"), b"pk");
        assert_ne!(
            base,
            canonical_record_bytes(b"payloae", &node(b"w"), b"pk"),
        );
        assert_ne!(
            base,
            canonical_record_bytes(b"payload", &node(b"x"), b"pk"),
        );
        assert_ne!(
            base,
            canonical_record_bytes(b"payload", &node(b"w"), b"pl"),
        );
    }

    #[test]
    fn canonical_bytes_are_unambiguous() {
        // length prefixes keep field boundaries from shifting
        assert_ne!(
            canonical_record_bytes(b"ab", &node(b"c"), b""),
            canonical_record_bytes(b"a", &node(b"bc"), b""),
        );
    }
}
