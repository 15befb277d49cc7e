//! did:key codec for Ed25519 public keys.
//!
//! Encoding is `did:key:z` + base58btc(multicodec_prefix || raw_pubkey), where
//! the multicodec prefix for Ed25519 public keys is the two bytes `0xed 0x01`.

const MULTICODEC_ED25519_PUB: [u8; 2] = [0xed, 0x01];
const DID_KEY_PREFIX: &str = "did:key:z";

#[derive(Debug, thiserror::Error)]
pub enum DidError {
    #[error("invalid DID: {0}")]
    InvalidDid(String),
}

pub fn did_from_public_key(pk: &[u8; 32]) -> String {
    let mut bytes = Vec::with_capacity(2 + 32);
    bytes.extend_from_slice(&MULTICODEC_ED25519_PUB);
    bytes.extend_from_slice(pk);
    format!("{DID_KEY_PREFIX}{}", bs58::encode(bytes).into_string())
}

pub fn public_key_from_did(did: &str) -> Result<[u8; 32], DidError> {
    let encoded = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| DidError::InvalidDid(format!("missing '{DID_KEY_PREFIX}' prefix")))?;

    let decoded = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| DidError::InvalidDid(format!("bad base58: {e}")))?;

    if decoded.len() != 34 {
        return Err(DidError::InvalidDid(format!(
            "expected 34 decoded bytes, got {}",
            decoded.len()
        )));
    }
    if decoded[0..2] != MULTICODEC_ED25519_PUB {
        return Err(DidError::InvalidDid("wrong multicodec tag".to_string()));
    }

    let mut pk = [0u8; 32];
    pk.copy_from_slice(&decoded[2..34]);
    Ok(pk)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let pk = [7u8; 32];
        let did = did_from_public_key(&pk);
        assert!(did.starts_with(DID_KEY_PREFIX));
        assert_eq!(public_key_from_did(&did).unwrap(), pk);
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(public_key_from_did("did:web:example.com").is_err());
    }

    #[test]
    fn rejects_bad_base58() {
        assert!(public_key_from_did("did:key:z0OIl").is_err());
    }

    #[test]
    fn rejects_wrong_length() {
        let short = format!("did:key:z{}", bs58::encode([0xed, 0x01, 1, 2, 3]).into_string());
        assert!(public_key_from_did(&short).is_err());
    }
}
