//! Password hashing and log-redaction helpers.

use sha2::{Digest, Sha256};

const BCRYPT_COST: u32 = bcrypt::DEFAULT_COST;

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    Ok(bcrypt::hash(plain, BCRYPT_COST)?)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    Ok(bcrypt::verify(plain, hash)?)
}

/// Hash a value for logging/privacy (8-byte truncated SHA256, hex encoded).
pub fn hash_for_log(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    to_hex(&result[..8])
}

/// Redact a sensitive identifier for logs, e.g. "h:3fae91b2c4d5e677".
pub fn redact_for_log(value: &str) -> String {
    format!("h:{}", hash_for_log(value))
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_for_log_is_16_hex_chars() {
        let hash = hash_for_log("test-convo-id");
        assert_eq!(hash.len(), 16);
    }

    #[test]
    fn redact_for_log_is_stable() {
        assert_eq!(redact_for_log("abc"), redact_for_log("abc"));
        assert_ne!(redact_for_log("abc"), redact_for_log("abd"));
    }

    #[test]
    fn password_round_trips() {
        let hash = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }
}
