use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Random bytes behind every session token.
pub const SESSION_TOKEN_BYTES: usize = 64;

/// Length of the hex-encoded session token.
pub const SESSION_TOKEN_LEN: usize = SESSION_TOKEN_BYTES * 2;

/// Generate a cryptographically secure session token (hex-encoded).
pub fn generate_session_token() -> String {
    let mut bytes = [0u8; SESSION_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Short, non-reversible label for a token, safe to write to logs.
pub fn token_fingerprint(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_fixed_length_hex_and_distinct() {
        let a = generate_session_token();
        let b = generate_session_token();
        assert_eq!(a.len(), SESSION_TOKEN_LEN);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn fingerprint_is_stable_and_short() {
        let token = generate_session_token();
        assert_eq!(token_fingerprint(&token), token_fingerprint(&token));
        assert_eq!(token_fingerprint(&token).len(), 16);
        assert_ne!(token_fingerprint(&token), token_fingerprint(&generate_session_token()));
    }
}
