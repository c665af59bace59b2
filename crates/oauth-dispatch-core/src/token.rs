use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Generate a random opaque token and return (raw_token, sha256_hash).
///
/// Only the hash is persisted; the raw value goes to the client once.
pub fn generate_token() -> (String, String) {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    let raw = URL_SAFE_NO_PAD.encode(bytes);
    let hash = hash_token(&raw);
    (raw, hash)
}

/// SHA-256 hash a token string (for storage).
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a presented secret against a stored hash in constant time.
pub fn secret_matches(presented: &str, stored_hash: &str) -> bool {
    let presented_hash = hash_token(presented);
    presented_hash.as_bytes().ct_eq(stored_hash.as_bytes()).unwrap_u8() == 1
}

/// Derive a form token bound to a session token and a purpose. The value is
/// safe to embed in a page: it does not reveal the session token.
pub fn form_token(session_token: &str, purpose: &str) -> String {
    hash_token(&format!("{purpose}:{session_token}"))
}

/// Check a submitted form token in constant time.
pub fn form_token_matches(presented: &str, session_token: &str, purpose: &str) -> bool {
    let expected = form_token(session_token, purpose);
    presented.as_bytes().ct_eq(expected.as_bytes()).unwrap_u8() == 1
}
