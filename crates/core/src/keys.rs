//! Node keypairs, based on ed25519.
//!
//! A node's [NodeId] is exactly its verifying-key bytes, so identity
//! and signature verification share one piece of state. The keypair is
//! the only state a node persists across setup epochs.

use whanau_api::*;

/// An ed25519 keypair held by a node or client.
pub struct NodeKeys {
    sk: ed25519_dalek::SigningKey,
    id: NodeId,
}

impl std::fmt::Debug for NodeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeKeys").field("id", &self.id).finish()
    }
}

impl Default for NodeKeys {
    fn default() -> Self {
        Self::new(ed25519_dalek::SigningKey::generate(&mut rand::thread_rng()))
    }
}

impl NodeKeys {
    fn new(sk: ed25519_dalek::SigningKey) -> Self {
        let id =
            bytes::Bytes::copy_from_slice(sk.verifying_key().as_bytes());
        Self { sk, id: id.into() }
    }

    /// Construct an instance from seed bytes.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self::new(ed25519_dalek::SigningKey::from_bytes(seed))
    }

    /// The [NodeId] bound to this keypair.
    pub fn node_id(&self) -> &NodeId {
        &self.id
    }

    /// The public key bytes of this keypair.
    pub fn pub_key_bytes(&self) -> bytes::Bytes {
        self.id.0 .0.clone()
    }

    /// Sign a message with this keypair.
    pub fn sign(&self, message: &[u8]) -> bytes::Bytes {
        use ed25519_dalek::Signer;
        bytes::Bytes::copy_from_slice(&self.sk.sign(message).to_bytes())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn id_is_verifying_key() {
        let keys = NodeKeys::from_seed(&[7; 32]);
        assert_eq!(32, keys.node_id().len());
        assert_eq!(keys.pub_key_bytes(), keys.node_id().0 .0);
    }

    #[test]
    fn seed_is_deterministic() {
        let a = NodeKeys::from_seed(&[1; 32]);
        let b = NodeKeys::from_seed(&[1; 32]);
        assert_eq!(a.node_id(), b.node_id());
        assert_eq!(a.sign(b"msg"), b.sign(b"msg"));
    }
}
