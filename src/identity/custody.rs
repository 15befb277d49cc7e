//! AEAD-encrypted at-rest storage of custodial agent private keys, and
//! sign-on-behalf for agents whose signing key the service holds.
//!
//! Grounded on `custody.py`: AES-256-GCM, 32-byte master key, 12-byte nonce,
//! stored blob is `nonce || ciphertext_with_tag`. `sign_on_behalf` declines
//! silently (`Ok(None)`) only when there is no master key configured or the
//! agent isn't custodial — both legitimate, expected states. A missing agent
//! row or a custodial agent with no stored key blob are data-integrity
//! faults, not declines, and surface as distinct `Err` variants (spec §4.2)
//! so callers never mistake a corrupted custody record for an ordinary
//! unsigned send.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rusqlite::Connection;

use super::signing::{canonical_payload, sign};

const NONCE_LEN: usize = 12;

#[derive(Debug, thiserror::Error)]
pub enum CustodyError {
    #[error("ciphertext too short to contain a nonce")]
    CiphertextTooShort,
    #[error("decryption failed (tampered or wrong key)")]
    DecryptionFailed,
    #[error("agent not found")]
    AgentNotFound,
    #[error("custodial agent has no stored signing key")]
    NoEncryptedKey,
}

pub fn encrypt_signing_key(seed: &[u8; 32], master_key: &[u8; 32]) -> Vec<u8> {
    use rand_core::RngCore;
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master_key));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand_core::OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, seed.as_slice())
        .expect("AES-GCM encryption cannot fail for valid key/nonce sizes");
    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    blob
}

pub fn decrypt_signing_key(blob: &[u8], master_key: &[u8; 32]) -> Result<[u8; 32], CustodyError> {
    if blob.len() <= NONCE_LEN {
        return Err(CustodyError::CiphertextTooShort);
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(master_key));
    let nonce = Nonce::from_slice(nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CustodyError::DecryptionFailed)?;
    plaintext
        .try_into()
        .map_err(|_| CustodyError::DecryptionFailed)
}

/// `(from_did, signature, signing_key_id)`. `signing_key_id` is always equal
/// to `from_did` in the custodial signing path (resolved ambiguity, spec §9).
///
/// `Ok(None)` means the caller should proceed unsigned: no master key is
/// configured, or the agent simply isn't custodial. `Err` means a custodial
/// agent's key material is missing or unusable, which the caller must not
/// silently swallow as a decline.
pub fn sign_on_behalf(
    conn: &Connection,
    master_key: Option<&[u8; 32]>,
    agent_id: &str,
    message_fields: &serde_json::Map<String, serde_json::Value>,
) -> Result<Option<(String, String, String)>, CustodyError> {
    let Some(master_key) = master_key else {
        return Ok(None);
    };

    let row: Option<(Option<Vec<u8>>, Option<String>, Option<String>)> = conn
        .query_row(
            "SELECT signing_key_enc, custody, did FROM agents \
             WHERE agent_id = ?1 AND deleted_at IS NULL",
            [agent_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .ok();

    let (signing_key_enc, custody, did) = row.ok_or(CustodyError::AgentNotFound)?;

    if custody.as_deref() != Some("custodial") {
        return Ok(None);
    }

    let signing_key_enc = signing_key_enc.ok_or(CustodyError::NoEncryptedKey)?;

    let seed = decrypt_signing_key(&signing_key_enc, master_key)?;
    let payload = canonical_payload(message_fields);
    let signature = sign(&seed, &payload);
    let from_did = did.unwrap_or_default();
    Ok(Some((from_did.clone(), signature, from_did)))
}

pub fn destroy_signing_key(conn: &Connection, agent_id: &str) {
    conn.execute(
        "UPDATE agents SET signing_key_enc = NULL WHERE agent_id = ?1",
        [agent_id],
    )
    .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let master = [9u8; 32];
        let seed = [3u8; 32];
        let blob = encrypt_signing_key(&seed, &master);
        assert_eq!(decrypt_signing_key(&blob, &master).unwrap(), seed);
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let master = [9u8; 32];
        let seed = [3u8; 32];
        let mut blob = encrypt_signing_key(&seed, &master);
        let last = blob.len() - 1;
        blob[last] ^= 0xff;
        assert!(decrypt_signing_key(&blob, &master).is_err());
    }

    #[test]
    fn wrong_key_fails() {
        let master = [9u8; 32];
        let other = [8u8; 32];
        let seed = [3u8; 32];
        let blob = encrypt_signing_key(&seed, &master);
        assert!(decrypt_signing_key(&blob, &other).is_err());
    }
}
