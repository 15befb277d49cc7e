//! Canonical payload construction and Ed25519 sign/verify over it.
//!
//! `canonical_payload` is the exact byte sequence other aweb implementations
//! must reproduce: only the whitelisted fields, lexicographically sorted keys,
//! no whitespace, literal (non-escaped) UTF-8. `serde_json::Map` sorts keys by
//! default (this crate does not enable the `preserve_order` feature), and
//! `serde_json::to_string` already emits a compact, non-ASCII-literal encoding,
//! so both properties fall out of the default serializer.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde_json::Value;

use super::did::public_key_from_did;

const SIGNED_FIELDS: [&str; 8] = [
    "body",
    "from",
    "from_did",
    "subject",
    "timestamp",
    "to",
    "to_did",
    "type",
];

pub fn canonical_payload(fields: &serde_json::Map<String, Value>) -> Vec<u8> {
    let mut filtered = serde_json::Map::new();
    for key in SIGNED_FIELDS {
        if let Some(value) = fields.get(key) {
            filtered.insert(key.to_string(), value.clone());
        }
    }
    serde_json::to_vec(&filtered).expect("canonical payload serialization cannot fail")
}

pub fn sign(seed: &[u8; 32], payload: &[u8]) -> String {
    let signing_key = SigningKey::from_bytes(seed);
    let signature = signing_key.sign(payload);
    URL_SAFE_NO_PAD.encode(signature.to_bytes())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyOutcome {
    Verified,
    Unverified,
    Failed,
}

pub fn verify(did: Option<&str>, payload: &[u8], signature: Option<&str>) -> VerifyOutcome {
    let (Some(did), Some(signature)) = (did, signature) else {
        return VerifyOutcome::Unverified;
    };

    let Ok(pk_bytes) = public_key_from_did(did) else {
        return VerifyOutcome::Unverified;
    };

    let Ok(verifying_key) = VerifyingKey::from_bytes(&pk_bytes) else {
        return VerifyOutcome::Unverified;
    };

    let Ok(sig_bytes) = URL_SAFE_NO_PAD.decode(signature) else {
        return VerifyOutcome::Failed;
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return VerifyOutcome::Failed;
    };
    let signature = Signature::from_bytes(&sig_bytes);

    match verifying_key.verify(payload, &signature) {
        Ok(()) => VerifyOutcome::Verified,
        Err(_) => VerifyOutcome::Failed,
    }
}

pub fn generate_keypair() -> ([u8; 32], [u8; 32]) {
    use rand_core::OsRng;
    let signing_key = SigningKey::generate(&mut OsRng);
    (signing_key.to_bytes(), signing_key.verifying_key().to_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::did::did_from_public_key;

    #[test]
    fn canonical_payload_drops_unlisted_fields_and_sorts() {
        let mut fields = serde_json::Map::new();
        fields.insert("zzz_unlisted".to_string(), Value::String("drop me".to_string()));
        fields.insert("to".to_string(), Value::String("org/bob".to_string()));
        fields.insert("body".to_string(), Value::String("hi".to_string()));

        let payload = canonical_payload(&fields);
        let text = String::from_utf8(payload).unwrap();
        assert_eq!(text, r#"{"body":"hi","to":"org/bob"}"#);
    }

    #[test]
    fn sign_and_verify_roundtrip() {
        let (seed, pk) = generate_keypair();
        let did = did_from_public_key(&pk);
        let payload = b"{\"body\":\"hi\"}";
        let sig = sign(&seed, payload);
        assert_eq!(verify(Some(&did), payload, Some(&sig)), VerifyOutcome::Verified);
    }

    #[test]
    fn verify_missing_did_or_signature_is_unverified() {
        let payload = b"payload";
        assert_eq!(verify(None, payload, Some("sig")), VerifyOutcome::Unverified);
        assert_eq!(
            verify(Some("did:key:zabc"), payload, None),
            VerifyOutcome::Unverified
        );
    }

    #[test]
    fn verify_malformed_signature_is_failed() {
        let (_, pk) = generate_keypair();
        let did = did_from_public_key(&pk);
        assert_eq!(
            verify(Some(&did), b"payload", Some("not-valid-base64!!")),
            VerifyOutcome::Failed
        );
    }

    #[test]
    fn verify_mismatched_signature_is_failed() {
        let (seed_a, _) = generate_keypair();
        let (_, pk_b) = generate_keypair();
        let did_b = did_from_public_key(&pk_b);
        let payload = b"payload";
        let sig = sign(&seed_a, payload);
        assert_eq!(verify(Some(&did_b), payload, Some(&sig)), VerifyOutcome::Failed);
    }
}
