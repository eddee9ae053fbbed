//! Handshake authentication scrambles.
//!
//! `mysql_native_password` (the pre-8.0 default):
//!
//! ```text
//! SHA1(password) XOR SHA1(salt + SHA1(SHA1(password)))
//! ```
//!
//! `caching_sha2_password` (8.0+ default), fast path only:
//!
//! ```text
//! SHA256(password) XOR SHA256(SHA256(SHA256(password)) + salt)
//! ```
//!
//! The caching_sha2 full-auth path needs a secure channel and is refused
//! without one.

use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Well-known authentication plugin names.
pub mod plugins {
    pub const MYSQL_NATIVE_PASSWORD: &str = "mysql_native_password";
    pub const CACHING_SHA2_PASSWORD: &str = "caching_sha2_password";
    pub const MYSQL_CLEAR_PASSWORD: &str = "mysql_clear_password";
}

/// Continuation codes inside the caching_sha2_password exchange.
pub mod caching_sha2 {
    /// The server found the password in its cache
    pub const FAST_AUTH_SUCCESS: u8 = 0x03;
    /// A secure channel or RSA exchange is needed
    pub const PERFORM_FULL_AUTH: u8 = 0x04;
}

/// Compute the `mysql_native_password` scramble.
///
/// Empty passwords produce an empty scramble; otherwise the result is
/// exactly 20 bytes. Only the first 20 salt bytes participate, matching the
/// server's own truncation.
pub fn scramble_native_password(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let salt = if salt.len() > 20 { &salt[..20] } else { salt };

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(salt);
    hasher.update(stage2);
    let mask = hasher.finalize();

    stage1.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect()
}

/// Compute the `caching_sha2_password` fast-path scramble (32 bytes).
pub fn scramble_caching_sha2(password: &str, salt: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    // the server often appends a NUL to its 20-byte seed
    let salt = match salt {
        [head @ .., 0] if salt.len() == 21 => head,
        _ => salt,
    };

    let stage1 = Sha256::digest(password.as_bytes());
    let stage2 = Sha256::digest(stage1);

    let mut hasher = Sha256::new();
    hasher.update(stage2);
    hasher.update(salt);
    let mask = hasher.finalize();

    stage1.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect()
}
