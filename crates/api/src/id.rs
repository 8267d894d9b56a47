//! Types dealing with node identity and record keys.

macro_rules! imp_deref {
    ($i:ty, $t:ty) => {
        impl std::ops::Deref for $i {
            type Target = $t;

            fn deref(&self) -> &Self::Target {
                &self.0
            }
        }
    };
}

macro_rules! imp_from {
    ($a:ty, $b:ty, $i:ident => $e:expr) => {
        impl From<$b> for $a {
            fn from($i: $b) -> Self {
                $e
            }
        }
    };
}

fn display_b64(
    b: &bytes::Bytes,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    use base64::prelude::*;
    f.write_str(&BASE64_URL_SAFE_NO_PAD.encode(b))
}

/// Base identity type meant for newtyping.
/// You probably want [NodeId] or [Key].
#[derive(
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    serde::Serialize,
    serde::Deserialize,
)]
pub struct Id(#[serde(with = "crate::serde_bytes_base64")] pub bytes::Bytes);

imp_deref!(Id, bytes::Bytes);
imp_from!(Id, bytes::Bytes, b => Id(b));

/// Identifies a node on the social graph. The bytes are the node's
/// ed25519 public key, without prefix or suffix. The id doubles as the
/// node's rpc address.
#[derive(
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
pub struct NodeId(pub Id);

imp_deref!(NodeId, Id);
imp_from!(NodeId, bytes::Bytes, b => NodeId(Id(b)));
imp_from!(NodeId, Id, b => NodeId(b));

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display_b64(&self.0 .0, f)
    }
}

impl std::fmt::Debug for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        display_b64(&self.0 .0, f)
    }
}

/// A record key. Keys are opaque byte strings with a total
/// lexicographic order; the routing layer additionally treats the key
/// space as a ring, wrapping from the greatest key back to the least.
#[derive(
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
pub struct Key(pub Id);

imp_deref!(Key, Id);
imp_from!(Key, bytes::Bytes, b => Key(Id(b)));
imp_from!(Key, Id, b => Key(b));

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(Id(bytes::Bytes::copy_from_slice(s.as_bytes())))
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // keys are frequently human-readable in tests and demos
        match std::str::from_utf8(&self.0 .0) {
            Ok(s) if s.chars().all(|c| c.is_ascii_graphic()) => {
                f.write_str(s)
            }
            _ => display_b64(&self.0 .0, f),
        }
    }
}

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn key_order_is_lexicographic() {
        let a = Key::from("abc");
        let b = Key::from("abd");
        let c = Key::from("b");
        assert!(a < b);
        assert!(b < c);
        assert!(a < c);
    }

    #[test]
    fn key_display_readable() {
        assert_eq!("42", Key::from("42").to_string());
    }

    #[test]
    fn id_serde_round_trip() {
        let id = NodeId::from(bytes::Bytes::from_static(b"test-node-1"));
        let enc = serde_json::to_string(&id).unwrap();
        let dec: NodeId = serde_json::from_str(&enc).unwrap();
        assert_eq!(id, dec);
    }
}
