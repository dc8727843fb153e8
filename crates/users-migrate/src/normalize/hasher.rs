//! One-way credential hashing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::SaltMode;

type HmacSha256 = Hmac<Sha256>;

/// Hashes a plaintext credential for storage.
///
/// Implementations are called from the blocking thread pool and must be
/// safe to share across threads.
pub trait CredentialHasher: Send + Sync {
    /// Hash `secret` for the record identified by `identity_key`.
    fn hash(&self, identity_key: &str, secret: &str) -> Result<String, String>;
}

/// bcrypt hasher with a fixed work factor.
#[derive(Clone)]
pub struct BcryptHasher {
    cost: u32,
    salt_mode: SaltMode,
    salt_secret: Vec<u8>,
}

impl BcryptHasher {
    /// Create a hasher using random salts.
    pub fn new(cost: u32) -> Self {
        Self {
            cost,
            salt_mode: SaltMode::Random,
            salt_secret: Vec::new(),
        }
    }

    /// Create a hasher that derives the salt from the identity key.
    ///
    /// The same identity key and credential always produce the same hash,
    /// which keeps repeated runs from rewriting unchanged users.
    pub fn derived(cost: u32, salt_secret: impl Into<Vec<u8>>) -> Self {
        Self {
            cost,
            salt_mode: SaltMode::Derived,
            salt_secret: salt_secret.into(),
        }
    }

    /// The configured work factor.
    pub fn cost(&self) -> u32 {
        self.cost
    }

    fn derive_salt(&self, identity_key: &str) -> Result<[u8; 16], String> {
        let mut mac = HmacSha256::new_from_slice(&self.salt_secret)
            .map_err(|e| format!("invalid salt secret: {}", e))?;
        mac.update(identity_key.as_bytes());
        let digest = mac.finalize().into_bytes();

        let mut salt = [0u8; 16];
        salt.copy_from_slice(&digest[..16]);
        Ok(salt)
    }
}

impl CredentialHasher for BcryptHasher {
    fn hash(&self, identity_key: &str, secret: &str) -> Result<String, String> {
        match self.salt_mode {
            SaltMode::Random => bcrypt::hash(secret, self.cost).map_err(|e| e.to_string()),
            SaltMode::Derived => {
                let salt = self.derive_salt(identity_key)?;
                bcrypt::hash_with_salt(secret, self.cost, salt)
                    .map(|parts| parts.format_for_version(bcrypt::Version::TwoB))
                    .map_err(|e| e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bcrypt_hash_verifies() {
        let hasher = BcryptHasher::new(4);
        let hashed = hasher.hash("a@b.com", "hunter2").unwrap();
        assert!(hashed.starts_with("$2"));
        assert!(bcrypt::verify("hunter2", &hashed).unwrap());
        assert!(!bcrypt::verify("hunter3", &hashed).unwrap());
    }

    #[test]
    fn test_derived_salt_is_stable_per_identity() {
        let hasher = BcryptHasher::derived(4, "pepper");
        let first = hasher.hash("a@b.com", "hunter2").unwrap();
        let second = hasher.hash("a@b.com", "hunter2").unwrap();
        let other_user = hasher.hash("c@d.com", "hunter2").unwrap();

        assert_eq!(first, second);
        assert_ne!(first, other_user);
        assert!(bcrypt::verify("hunter2", &first).unwrap());
    }

    #[test]
    fn test_random_salt_differs() {
        let hasher = BcryptHasher::new(4);
        let first = hasher.hash("a@b.com", "hunter2").unwrap();
        let second = hasher.hash("a@b.com", "hunter2").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_invalid_cost_is_an_error() {
        let hasher = BcryptHasher::new(2);
        assert!(hasher.hash("a@b.com", "hunter2").is_err());
    }
}
