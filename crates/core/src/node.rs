//! The whanau node: owned state and rpc dispatch.
//!
//! A node owns its routing tables exclusively; rpc handlers read them
//! through a snapshot guard while the setup task swaps whole tables at
//! layer boundaries (double-buffered, so readers never observe torn
//! state). All other shared state sits behind short-lived sync locks
//! that are never held across an rpc.

use crate::consensus::ReplicaLog;
use crate::keys::NodeKeys;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use whanau_api::*;

/// One finger: a sampled peer together with its layer id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finger {
    /// The sampled peer.
    pub addr: NodeId,

    /// The peer's id key at the finger's layer.
    pub id: Key,
}

/// One epoch's routing state, installed as an immutable snapshot.
///
/// `fingers[l]` is sorted by id, `succ[l]` and `db` by key.
#[derive(Debug, Default)]
pub struct RoutingTables {
    /// Sampled fraction of the global key-to-group mapping.
    pub db: Vec<DbEntry>,

    /// Per-layer id keys.
    pub ids: Vec<Key>,

    /// Per-layer finger tables.
    pub fingers: Vec<Vec<Finger>>,

    /// Per-layer successor lists.
    pub succ: Vec<Vec<DbEntry>>,
}

/// A whanau node.
///
/// Nodes persist nothing across setup epochs except their keypair,
/// neighbor list, master list, local insert table and (on masters)
/// the pending-write buffer; everything in [RoutingTables] is
/// recomputed by [WhanauNode::setup].
pub struct WhanauNode {
    pub(crate) keys: NodeKeys,
    pub(crate) config: WhanauConfig,
    pub(crate) rpc: DynRpc,

    /// Declared social-graph neighbors; walks step only here.
    pub(crate) neighbors: Vec<NodeId>,

    /// The designated master nodes.
    pub(crate) masters: Vec<NodeId>,

    /// The full node set for this epoch. Used by masters for the
    /// setup broadcast.
    pub(crate) peers: Vec<NodeId>,

    /// Locally inserted records: the node's share of the key-to-group
    /// mapping, the source feeding other nodes' db sampling.
    pub(crate) kvstore: Mutex<BTreeMap<Key, ReplicaGroup>>,

    /// Serving snapshot of the routing tables.
    pub(crate) tables: RwLock<Arc<RoutingTables>>,

    /// Pending writes buffered here (masters only).
    pub(crate) pending: Mutex<BTreeMap<Key, PendingWrite>>,

    /// Replica logs for keys this node helps replicate.
    pub(crate) replicas: Mutex<HashMap<Key, ReplicaLog>>,

    /// Completed setup epochs.
    pub(crate) epoch: AtomicU64,

    /// Highest epoch a setup broadcast has been accepted for, so
    /// concurrent masters triggering the same epoch start one run.
    epoch_target: AtomicU64,

    /// Monotonic consensus ballot counter.
    pub(crate) ballot_round: AtomicU64,

    /// Tokens held between systolic mixing rounds.
    pub(crate) mix_pool: Mutex<Vec<NodeId>>,

    /// Serializes setup runs; a later run simply overwrites.
    pub(crate) setup_gate: tokio::sync::Mutex<()>,

    pub(crate) me: Weak<WhanauNode>,
}

impl std::fmt::Debug for WhanauNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhanauNode")
            .field("id", self.keys.node_id())
            .field("epoch", &self.epoch.load(Ordering::SeqCst))
            .field("is_master", &self.config.is_master)
            .finish()
    }
}

impl WhanauNode {
    /// Construct a node. The caller is responsible for registering
    /// the returned handler with its transport.
    pub fn new(
        keys: NodeKeys,
        config: WhanauConfig,
        neighbors: Vec<NodeId>,
        masters: Vec<NodeId>,
        peers: Vec<NodeId>,
        rpc: DynRpc,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            keys,
            config,
            rpc,
            neighbors,
            masters,
            peers,
            kvstore: Mutex::new(BTreeMap::new()),
            tables: RwLock::new(Arc::new(RoutingTables::default())),
            pending: Mutex::new(BTreeMap::new()),
            replicas: Mutex::new(HashMap::new()),
            epoch: AtomicU64::new(0),
            epoch_target: AtomicU64::new(0),
            ballot_round: AtomicU64::new(0),
            mix_pool: Mutex::new(Vec::new()),
            setup_gate: tokio::sync::Mutex::new(()),
            me: me.clone(),
        })
    }

    /// This node's id / rpc address.
    pub fn node_id(&self) -> &NodeId {
        self.keys.node_id()
    }

    /// The number of setup epochs this node has completed.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// Insert a record into the local insert table, making it a
    /// sampling source for other nodes' setup runs.
    pub fn insert_record(&self, key: Key, group: ReplicaGroup) {
        self.kvstore.lock().unwrap().insert(key, group);
    }

    /// Sign `payload` as a record written by this node.
    pub fn sign_record(
        &self,
        payload: impl Into<bytes::Bytes>,
    ) -> SignedRecord {
        crate::crypto::sign_record(
            payload,
            self.node_id().clone(),
            &self.keys,
        )
    }

    /// The current routing-table snapshot.
    pub fn tables(&self) -> Arc<RoutingTables> {
        self.tables.read().unwrap().clone()
    }

    pub(crate) fn install_tables(&self, tables: RoutingTables) {
        *self.tables.write().unwrap() = Arc::new(tables);
    }

    fn handle_get_id(&self, layer: usize) -> WhResult<Reply> {
        match self.tables().ids.get(layer) {
            Some(key) => Ok(Reply::LayerId { key: key.clone() }),
            None => Err(WhError::NoKey),
        }
    }

    fn handle_seed_key(
        &self,
        key: Key,
        group: ReplicaGroup,
        record: SignedRecord,
    ) -> WhResult<Reply> {
        crate::crypto::verify_record(&record)?;
        if !group.contains(self.node_id()) {
            return Err(WhError::other("seed for a group we are not in"));
        }
        self.insert_record(key.clone(), group.clone());
        self.seed_replica_log(key, group, record);
        Ok(Reply::Ok)
    }

    fn handle_start_setup(&self, epoch: u64) -> WhResult<Reply> {
        if self.epoch_target.fetch_max(epoch, Ordering::SeqCst) >= epoch {
            // stale or duplicate broadcast from a concurrent master
            return Ok(Reply::Ok);
        }
        if let Some(me) = self.me.upgrade() {
            tokio::spawn(async move {
                let _ = me.run_epoch().await;
            });
        }
        Ok(Reply::Ok)
    }

    fn handle_initiate_setup(&self) -> WhResult<Reply> {
        if !self.config.is_master {
            return Err(WhError::other("not a master"));
        }
        if let Some(me) = self.me.upgrade() {
            tokio::spawn(async move {
                if let Err(err) = me.initiate_setup().await {
                    tracing::warn!(?err, "initiate_setup failed");
                }
            });
        }
        Ok(Reply::Ok)
    }

    /// A sybil node serves degenerate replies: walks terminate on
    /// itself, every table reads as empty. Honest nodes absorb these
    /// as sampling failures.
    fn handle_sybil(&self, req: Request) -> WhResult<Reply> {
        match req {
            Request::RandomWalk { .. } => Ok(Reply::Walk {
                addr: self.node_id().clone(),
                hops: 0,
            }),
            Request::SampleSuccessors { .. } => {
                Ok(Reply::Entries { entries: vec![] })
            }
            Request::SampleDb => Ok(Reply::DbSample { entry: None }),
            Request::SystolicPush { .. } => Ok(Reply::Ok),
            Request::StartSetup { .. } => Ok(Reply::Ok),
            _ => Err(WhError::NoKey),
        }
    }
}

impl RpcHandler for WhanauNode {
    fn handle(&self, req: Request) -> BoxFut<'_, WhResult<Reply>> {
        Box::pin(async move {
            if self.config.is_sybil {
                return self.handle_sybil(req);
            }

            match req {
                Request::RandomWalk { steps } => {
                    self.handle_random_walk(steps).await
                }
                Request::GetId { layer } => self.handle_get_id(layer),
                Request::Lookup { key } => {
                    let group = self.lookup(&key).await?;
                    Ok(Reply::Value { group })
                }
                Request::Try { key } => {
                    let group = self.handle_try(&key)?;
                    Ok(Reply::Value { group })
                }
                Request::SampleSuccessors {
                    layer,
                    start,
                    count,
                } => self.handle_sample_successors(layer, &start, count),
                Request::SampleDb => self.handle_sample_db(),
                Request::AddPending {
                    key,
                    record,
                    origin,
                } => self.handle_add_pending(key, record, origin),
                Request::CollectPending => self.handle_collect_pending(),
                Request::ClearPending { keys } => {
                    self.handle_clear_pending(&keys)
                }
                Request::SeedKey {
                    key,
                    group,
                    record,
                } => self.handle_seed_key(key, group, record),
                Request::InitiateSetup => self.handle_initiate_setup(),
                Request::StartSetup { epoch } => {
                    self.handle_start_setup(epoch)
                }
                Request::SystolicPush { tokens } => {
                    self.handle_systolic_push(tokens)
                }
                Request::ReplicaPropose { key, record } => {
                    self.handle_replica_propose(key, record).await
                }
                Request::ReplicaPrepare { key, slot, ballot } => {
                    self.handle_replica_prepare(&key, slot, ballot)
                }
                Request::ReplicaAccept {
                    key,
                    slot,
                    ballot,
                    record,
                } => self.handle_replica_accept(&key, slot, ballot, record),
                Request::ReplicaLearn { key, slot, record } => {
                    self.handle_replica_learn(&key, slot, record)
                }
                Request::ReplicaRead { key } => {
                    self.handle_replica_read(&key)
                }
            }
        })
    }
}
