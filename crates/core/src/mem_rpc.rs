//! The in-process rpc implementation provided by whanau_core.
//! This is NOT a production module. It is for testing and local
//! clusters only. It will only reach nodes registered in the same
//! registry instance.
//!
//! Unlike a process-global registry, each [MemRpc] is an explicit
//! object, so parallel tests get fully isolated clusters.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use whanau_api::*;

/// An in-process rpc registry. Nodes register their handler under
/// their [NodeId]; calls are routed by id, cross the boundary in wire
/// form, and carry the fixed per-call deadline.
pub struct MemRpc {
    map: Mutex<HashMap<NodeId, DynRpcHandler>>,
    timeout: std::time::Duration,
}

impl std::fmt::Debug for MemRpc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemRpc")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MemRpc {
    /// Construct a new registry applying the given rpc deadline.
    pub fn new(timeout: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            map: Mutex::new(HashMap::new()),
            timeout,
        })
    }

    /// Register a node's handler. A second registration under the
    /// same id replaces the first.
    pub fn register(&self, addr: NodeId, handler: DynRpcHandler) {
        self.map.lock().unwrap().insert(addr, handler);
    }

    /// Remove a node from the registry. Calls to it will time out
    /// from then on, as for a crashed node.
    pub fn unregister(&self, addr: &NodeId) {
        self.map.lock().unwrap().remove(addr);
    }
}

impl Rpc for MemRpc {
    fn call(&self, to: NodeId, req: Request) -> BoxFut<'_, WhResult<Reply>> {
        Box::pin(async move {
            let handler = self.map.lock().unwrap().get(&to).cloned();
            let handler = match handler {
                None => {
                    return Err(WhError::timeout(format!(
                        "no route to {to}"
                    )))
                }
                Some(h) => h,
            };

            // round-trip through the wire encoding, as a real
            // transport would
            let req = Request::decode(&req.encode()?)?;

            let reply =
                tokio::time::timeout(self.timeout, handler.handle(req))
                    .await
                    .map_err(|_| {
                        WhError::timeout(format!("rpc to {to}"))
                    })??;

            Reply::decode(&reply.encode()?)
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Debug)]
    struct Echo;

    impl RpcHandler for Echo {
        fn handle(&self, req: Request) -> BoxFut<'_, WhResult<Reply>> {
            Box::pin(async move {
                match req {
                    Request::GetId { layer } => Ok(Reply::LayerId {
                        key: Key::from(format!("{layer}").as_str()),
                    }),
                    _ => Err(WhError::NoKey),
                }
            })
        }
    }

    #[derive(Debug)]
    struct Stall;

    impl RpcHandler for Stall {
        fn handle(&self, _req: Request) -> BoxFut<'_, WhResult<Reply>> {
            Box::pin(async move {
                tokio::time::sleep(std::time::Duration::from_secs(5))
                    .await;
                Ok(Reply::Ok)
            })
        }
    }

    fn addr(b: &'static [u8]) -> NodeId {
        NodeId::from(bytes::Bytes::from_static(b))
    }

    #[tokio::test]
    async fn routes_to_registered_handler() {
        let rpc = MemRpc::new(std::time::Duration::from_millis(500));
        rpc.register(addr(b"a"), Arc::new(Echo));
        let reply = rpc
            .call(addr(b"a"), Request::GetId { layer: 3 })
            .await
            .unwrap();
        assert_eq!(
            Reply::LayerId {
                key: Key::from("3")
            },
            reply
        );
    }

    #[tokio::test]
    async fn unknown_addr_times_out() {
        let rpc = MemRpc::new(std::time::Duration::from_millis(500));
        assert!(matches!(
            rpc.call(addr(b"nope"), Request::SampleDb).await,
            Err(WhError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let rpc = MemRpc::new(std::time::Duration::from_millis(100));
        rpc.register(addr(b"slow"), Arc::new(Stall));
        assert!(matches!(
            rpc.call(addr(b"slow"), Request::SampleDb).await,
            Err(WhError::Timeout { .. })
        ));
    }

    #[tokio::test]
    async fn unregister_cuts_the_route() {
        let rpc = MemRpc::new(std::time::Duration::from_millis(500));
        rpc.register(addr(b"a"), Arc::new(Echo));
        rpc.unregister(&addr(b"a"));
        assert!(matches!(
            rpc.call(addr(b"a"), Request::SampleDb).await,
            Err(WhError::Timeout { .. })
        ));
    }
}
