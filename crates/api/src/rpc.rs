//! The rpc seam between whanau modules and their transport.
//!
//! The production transport is out of scope for this crate; any
//! implementation that can deliver a [Request] to the node addressed
//! by a [NodeId] and return its [Reply] will do. whanau_core ships an
//! in-process implementation for tests and local clusters.

use crate::*;
use std::sync::Arc;

/// Represents the ability to send labeled requests to peers.
///
/// Every call carries the transport's fixed deadline; an elapsed
/// deadline or unreachable peer yields [WhError::Timeout]. Callers
/// treat these as transient and absorb them by over-sampling.
pub trait Rpc: 'static + Send + Sync + std::fmt::Debug {
    /// Deliver a request to `to`, returning its reply.
    fn call(&self, to: NodeId, req: Request) -> BoxFut<'_, WhResult<Reply>>;
}

/// Trait-object [Rpc].
pub type DynRpc = Arc<dyn Rpc>;

/// The receiving side of the rpc seam: a node's request dispatcher.
pub trait RpcHandler: 'static + Send + Sync {
    /// Handle a single inbound request. Handlers are invoked
    /// concurrently and must not block the executor.
    fn handle(&self, req: Request) -> BoxFut<'_, WhResult<Reply>>;
}

/// Trait-object [RpcHandler].
pub type DynRpcHandler = Arc<dyn RpcHandler>;
