//! The client facade: get and put against a cluster through one known
//! peer.
//!
//! A client holds no routing state of its own; it asks its known peer
//! to resolve keys, then talks to the resolved replica group directly.
//! Writes are signed with the client's own keypair. A write to a key
//! the routing layer does not know is routed to a master as a pending
//! write and materializes at the next setup epoch.

use crate::consensus::read_latest;
use crate::keys::NodeKeys;
use crate::pending::master_for;
use whanau_api::*;

/// A client stub addressing one known peer.
#[derive(Debug)]
pub struct Client {
    rpc: DynRpc,
    server: NodeId,
    masters: Vec<NodeId>,
    keys: NodeKeys,
}

impl Client {
    /// Construct a client talking to `server`, with a fresh keypair.
    /// `masters` is consulted only for writes to unknown keys.
    pub fn new(rpc: DynRpc, server: NodeId, masters: Vec<NodeId>) -> Self {
        Self {
            rpc,
            server,
            masters,
            keys: NodeKeys::default(),
        }
    }

    /// Resolve `key` to its replica group via the known peer.
    pub async fn lookup(&self, key: &Key) -> WhResult<ReplicaGroup> {
        match self
            .rpc
            .call(
                self.server.clone(),
                Request::Lookup { key: key.clone() },
            )
            .await?
        {
            Reply::Value { group } => Ok(group),
            _ => Err(WhError::other("unexpected lookup reply")),
        }
    }

    /// Fetch the current value of `key`.
    ///
    /// Fails with [WhError::NoKey] if the key cannot be resolved or
    /// its group holds no record, and [WhError::BadSignature] if the
    /// authoritative record fails verification. The two are never
    /// conflated.
    pub async fn get(&self, key: &Key) -> WhResult<bytes::Bytes> {
        let group = self.lookup(key).await?;
        let record = read_latest(&self.rpc, &group, key).await?;
        crate::crypto::verify_record(&record)?;
        Ok(record.payload)
    }

    /// Write `payload` under `key`.
    ///
    /// If the key resolves to a replica group, the freshly signed
    /// record is proposed to the group's consensus log and is
    /// readable immediately. Otherwise it is buffered at a master and
    /// becomes readable after the next setup epoch.
    pub async fn put(
        &self,
        key: &Key,
        payload: impl Into<bytes::Bytes>,
    ) -> WhResult<()> {
        let record = crate::crypto::sign_record(
            payload,
            self.keys.node_id().clone(),
            &self.keys,
        );
        match self.lookup(key).await {
            Ok(group) => self.propose(&group, key, record).await,
            Err(WhError::NoKey) => self.add_pending(key, record).await,
            Err(err) => Err(err),
        }
    }

    async fn propose(
        &self,
        group: &ReplicaGroup,
        key: &Key,
        record: SignedRecord,
    ) -> WhResult<()> {
        let mut last = WhError::busy("empty replica group");
        for member in &group.members {
            let req = Request::ReplicaPropose {
                key: key.clone(),
                record: record.clone(),
            };
            match self.rpc.call(member.clone(), req).await {
                Ok(Reply::Decided { .. }) => return Ok(()),
                Ok(_) => last = WhError::other("unexpected propose reply"),
                Err(err) => last = err,
            }
        }
        Err(last)
    }

    async fn add_pending(
        &self,
        key: &Key,
        record: SignedRecord,
    ) -> WhResult<()> {
        // prefer the master responsible for the key, so repeated
        // writes to a still-pending key land in one buffer; fall back
        // through the rest of the list if it is unreachable
        let preferred = match master_for(&self.masters, key) {
            Some(master) => master.clone(),
            None => return Err(WhError::other("no masters known")),
        };
        let mut order = vec![preferred.clone()];
        order.extend(
            self.masters.iter().filter(|m| **m != preferred).cloned(),
        );

        let mut last = WhError::busy("no master reachable");
        for master in &order {
            let req = Request::AddPending {
                key: key.clone(),
                record: record.clone(),
                // the client has no graph presence of its own; walks
                // for group selection start at its known peer
                origin: self.server.clone(),
            };
            match self.rpc.call(master.clone(), req).await {
                Ok(Reply::Ok) => return Ok(()),
                Ok(_) => last = WhError::other("unexpected pending reply"),
                Err(err) => last = err,
            }
        }
        Err(last)
    }
}
