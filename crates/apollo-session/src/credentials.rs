//! Password hashing and the login challenge.
//!
//! Passwords never cross the wire, not even hashed. The server stores
//! `sha256("<lowercased name>:<password>")` and gives every transport a
//! random nonce. To log in, the client proves it knows the stored hash:
//!
//! ```text
//! response = sha256(client_nonce + sha256(stored_hash + server_nonce))
//! ```
//!
//! The client picks its own nonce so a captured response cannot be replayed
//! against a different transport. All intermediate digests are lowercase
//! hex strings.

use sha2::{Digest, Sha256};

fn hex_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// The stored hash for a name/password pair.
pub fn hash_password(name: &str, password: &str) -> String {
    hex_sha256(format!("{}:{}", name.to_lowercase(), password).as_bytes())
}

/// The response a client computes for a challenge.
pub fn challenge_response(stored_hash: &str, server_nonce: &str, client_nonce: &str) -> String {
    let inner = hex_sha256(format!("{stored_hash}{server_nonce}").as_bytes());
    hex_sha256(format!("{client_nonce}{inner}").as_bytes())
}

/// Checks a client's response against the stored hash.
pub fn verify_challenge(
    stored_hash: &str,
    server_nonce: &str,
    client_nonce: &str,
    response: &str,
) -> bool {
    challenge_response(stored_hash, server_nonce, client_nonce).eq_ignore_ascii_case(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_password_known_vector() {
        // sha256("alice:secret")
        assert_eq!(
            hash_password("Alice", "secret"),
            hex_sha256(b"alice:secret"),
        );
        assert_eq!(hash_password("alice", "secret").len(), 64);
    }

    #[test]
    fn test_verify_challenge_accepts_correct_response() {
        let stored = hash_password("alice", "secret");
        let response = challenge_response(&stored, "server-n", "client-n");
        assert!(verify_challenge(&stored, "server-n", "client-n", &response));
    }

    #[test]
    fn test_verify_challenge_rejects_wrong_password_or_nonce() {
        let stored = hash_password("alice", "secret");
        let wrong = challenge_response(&hash_password("alice", "guess"), "server-n", "client-n");
        assert!(!verify_challenge(&stored, "server-n", "client-n", &wrong));

        let replayed = challenge_response(&stored, "other-server-n", "client-n");
        assert!(!verify_challenge(&stored, "server-n", "client-n", &replayed));
    }
}
