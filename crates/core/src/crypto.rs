//! The value-integrity envelope: signing and verification of
//! [SignedRecord]s.
//!
//! The signature covers the record's canonical byte encoding with the
//! signature slot omitted, see [SignedRecord::canonical_bytes].
//! Verification is pure; there are no retries here.

use crate::keys::NodeKeys;
use whanau_api::*;

/// Produce a signed record for `payload`, written by `writer` and
/// signed with `keys`.
///
/// `writer` is usually `keys.node_id()`, but a client stub signing on
/// behalf of a different routing address may pass any address; the
/// signature binds whatever address is given.
pub fn sign_record(
    payload: impl Into<bytes::Bytes>,
    writer: NodeId,
    keys: &NodeKeys,
) -> SignedRecord {
    let payload = payload.into();
    let writer_pub_key = keys.pub_key_bytes();
    let message =
        canonical_record_bytes(&payload, &writer, &writer_pub_key);
    let signature = keys.sign(&message);
    SignedRecord {
        payload,
        writer,
        writer_pub_key,
        signature,
    }
}

/// Check a record's signature against its claimed public key.
///
/// Fails with [WhError::MalformedKey] if the claimed key cannot be
/// parsed, and [WhError::BadSignature] if the signature does not
/// cover the record's canonical bytes.
pub fn verify_record(record: &SignedRecord) -> WhResult<()> {
    use ed25519_dalek::Verifier;

    let pub_key: [u8; 32] = record.writer_pub_key[..]
        .try_into()
        .map_err(|_| WhError::MalformedKey)?;
    let pub_key = ed25519_dalek::VerifyingKey::from_bytes(&pub_key)
        .map_err(|_| WhError::MalformedKey)?;

    let signature: [u8; 64] = record.signature[..]
        .try_into()
        .map_err(|_| WhError::BadSignature)?;
    let signature = ed25519_dalek::Signature::from_bytes(&signature);

    pub_key
        .verify(&record.canonical_bytes(), &signature)
        .map_err(|_| WhError::BadSignature)
}
