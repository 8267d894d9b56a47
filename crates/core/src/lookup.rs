//! Key resolution over the layered finger tables.
//!
//! A single descent can land in a region of id space whose successor
//! lists do not cover the key, so resolution retries across layers and
//! varied starting fingers up to a configured budget. Lookup is
//! read-only; exhaustion reports the key as absent.

use crate::node::{Finger, WhanauNode};
use whanau_api::*;

/// Index of the finger holding the greatest id at or cyclically before
/// `key`. Fingers must be sorted by id and non-empty.
fn cyclic_pred(fingers: &[Finger], key: &Key) -> usize {
    let at = fingers.partition_point(|f| f.id <= *key);
    if at == 0 {
        // every id is past the key: wrap to the ring's greatest id
        fingers.len() - 1
    } else {
        at - 1
    }
}

impl WhanauNode {
    /// Resolve `key` to its replica group, retrying the layered
    /// descent up to the configured budget. [WhError::NoKey] after
    /// exhaustion is the final answer.
    pub async fn lookup(&self, key: &Key) -> WhResult<ReplicaGroup> {
        if let Ok(group) = self.handle_try(key) {
            return Ok(group);
        }
        for attempt in 0..self.config.lookup_tries {
            if let Ok(group) = self.try_once(key, attempt).await {
                return Ok(group);
            }
        }
        tracing::debug!(node = %self.node_id(), %key, "lookup exhausted");
        Err(WhError::NoKey)
    }

    /// One descent: per layer, pick the finger preceding the key in
    /// cyclic order and ask it to search its successor lists. Later
    /// attempts step back a few fingers so repeated tries explore
    /// different regions.
    async fn try_once(
        &self,
        key: &Key,
        attempt: usize,
    ) -> WhResult<ReplicaGroup> {
        let tables = self.tables();
        for fingers in tables.fingers.iter() {
            if fingers.is_empty() {
                continue;
            }
            let base = cyclic_pred(fingers, key);
            let spread = attempt.min(fingers.len() - 1);
            let back = if spread == 0 {
                0
            } else {
                rand::random::<usize>() % (spread + 1)
            };
            let finger =
                &fingers[(base + fingers.len() - back) % fingers.len()];

            if finger.addr == *self.node_id() {
                if let Ok(group) = self.handle_try(key) {
                    return Ok(group);
                }
                continue;
            }
            let req = Request::Try { key: key.clone() };
            if let Ok(Reply::Value { group }) =
                self.rpc.call(finger.addr.clone(), req).await
            {
                return Ok(group);
            }
        }
        Err(WhError::NoKey)
    }

    /// Search this node's own records for `key`: the local insert
    /// table first, then every layer's successor list.
    pub(crate) fn handle_try(&self, key: &Key) -> WhResult<ReplicaGroup> {
        if let Some(group) = self.kvstore.lock().unwrap().get(key) {
            return Ok(group.clone());
        }
        let tables = self.tables();
        for succ in tables.succ.iter() {
            let at = succ.partition_point(|entry| entry.key < *key);
            if let Some(entry) = succ.get(at) {
                if entry.key == *key {
                    return Ok(entry.group.clone());
                }
            }
        }
        Err(WhError::NoKey)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn finger(id: &str, addr: &[u8]) -> Finger {
        Finger {
            addr: NodeId::from(bytes::Bytes::copy_from_slice(addr)),
            id: Key::from(id),
        }
    }

    #[test]
    fn cyclic_pred_picks_greatest_at_or_before() {
        let fingers =
            vec![finger("10", b"a"), finger("30", b"b"), finger("50", b"c")];
        assert_eq!(0, cyclic_pred(&fingers, &Key::from("10")));
        assert_eq!(0, cyclic_pred(&fingers, &Key::from("20")));
        assert_eq!(1, cyclic_pred(&fingers, &Key::from("30")));
        assert_eq!(2, cyclic_pred(&fingers, &Key::from("70")));
    }

    #[test]
    fn cyclic_pred_wraps_before_least_id() {
        let fingers = vec![finger("30", b"a"), finger("50", b"b")];
        // "1" precedes every id, so the search wraps to "50"
        assert_eq!(1, cyclic_pred(&fingers, &Key::from("1")));
    }
}
