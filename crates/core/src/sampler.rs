//! Random walks and systolic mixing.
//!
//! Walks of `Θ(log n)` steps over the social graph are the only
//! sampling primitive the protocol uses; under the bounded-attack-edge
//! assumption their endpoints are near-uniform over the honest region.
//! Walks carry a hop budget rather than a deadline; callers bound time
//! by bounding retries.

use crate::node::WhanauNode;
use futures::StreamExt;
use std::collections::HashMap;
use whanau_api::*;

/// Upper bound on tokens retained in the mixing pool.
const MIX_POOL_CAP: usize = 1024;

impl WhanauNode {
    pub(crate) fn pick_neighbor(&self) -> Option<NodeId> {
        use rand::seq::SliceRandom;
        self.neighbors.choose(&mut rand::thread_rng()).cloned()
    }

    /// Continue a walk with `steps` remaining. A node without
    /// neighbors terminates the walk on itself, short of its budget.
    pub(crate) async fn handle_random_walk(
        &self,
        steps: u32,
    ) -> WhResult<Reply> {
        let next = match self.pick_neighbor() {
            Some(next) if steps > 0 => next,
            _ => {
                return Ok(Reply::Walk {
                    addr: self.node_id().clone(),
                    hops: 0,
                })
            }
        };
        match self
            .rpc
            .call(next, Request::RandomWalk { steps: steps - 1 })
            .await
        {
            Ok(Reply::Walk { addr, hops }) => Ok(Reply::Walk {
                addr,
                hops: hops + 1,
            }),
            Ok(_) => Err(WhError::walk("unexpected walk reply")),
            Err(err) => Err(WhError::walk(format!("step failed: {err}"))),
        }
    }

    /// Run one full random walk from this node, returning the endpoint
    /// and the hops actually taken.
    pub(crate) async fn random_walk(&self) -> WhResult<(NodeId, u32)> {
        match self.handle_random_walk(self.config.walk_len).await? {
            Reply::Walk { addr, hops } => Ok((addr, hops)),
            _ => Err(WhError::walk("unexpected walk reply")),
        }
    }

    /// Sample up to `target` walk endpoints, issuing at most twice
    /// that many walks with bounded concurrency. Failed walks are
    /// absorbed; the result may be shorter than `target`.
    pub(crate) async fn sample_walk_peers(
        &self,
        target: usize,
    ) -> Vec<(NodeId, u32)> {
        let limit = self.neighbors.len().clamp(1, 32);
        futures::stream::iter(0..target.saturating_mul(2))
            .map(|_| self.random_walk())
            .buffer_unordered(limit)
            .filter_map(|r| async move { r.ok() })
            .take(target)
            .collect()
            .await
    }

    /// Run `rounds` rounds of systolic mixing: seed the pool with
    /// `walk_len` tokens carrying this node's address, then push every
    /// held token to a uniformly random neighbor each round. Tokens
    /// arriving from neighbors join the pool for the next round.
    ///
    /// Terminates after `rounds` rounds regardless of convergence; the
    /// residual pool is a warm sample of the mixed distribution.
    pub async fn systolic_mix(&self, rounds: u32) {
        let seed = self.config.walk_len as usize;
        // extend rather than replace: tokens neighbors already pushed
        // this round stay in circulation
        self.mix_pool
            .lock()
            .unwrap()
            .extend(vec![self.node_id().clone(); seed]);

        if self.neighbors.is_empty() {
            return;
        }

        for _ in 0..rounds {
            let tokens: Vec<NodeId> = {
                let mut pool = self.mix_pool.lock().unwrap();
                pool.drain(..).collect()
            };

            let mut by_dest: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
            for token in tokens {
                if let Some(dest) = self.pick_neighbor() {
                    by_dest.entry(dest).or_default().push(token);
                }
            }

            // a failed push drops its tokens; mixing is best-effort
            futures::future::join_all(by_dest.into_iter().map(
                |(dest, tokens)| {
                    self.rpc
                        .call(dest, Request::SystolicPush { tokens })
                },
            ))
            .await;

            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
        }
    }

    /// The number of tokens currently held in the mixing pool.
    pub fn mix_pool_len(&self) -> usize {
        self.mix_pool.lock().unwrap().len()
    }

    pub(crate) fn handle_systolic_push(
        &self,
        tokens: Vec<NodeId>,
    ) -> WhResult<Reply> {
        let mut pool = self.mix_pool.lock().unwrap();
        pool.extend(tokens);
        if pool.len() > MIX_POOL_CAP {
            let excess = pool.len() - MIX_POOL_CAP;
            pool.drain(..excess);
        }
        Ok(Reply::Ok)
    }
}
