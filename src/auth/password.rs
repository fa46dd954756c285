use argon2::{self, Config as ArgonConfig};
use rand::Rng;

/// Hashes with a fresh random salt; the encoded string carries salt and parameters.
pub fn hash_password(password: &str) -> Result<String, argon2::Error> {
    let salt: [u8; 16] = rand::thread_rng().gen();
    let config = ArgonConfig::default();
    argon2::hash_encoded(password.as_bytes(), &salt, &config)
}

/// Malformed hashes count as a mismatch.
pub fn verify_password(hash: &str, password: &str) -> bool {
    argon2::verify_encoded(hash, password.as_bytes()).unwrap_or(false)
}
