//! One-way password hashing for protected links
//!
//! PBKDF2-HMAC-SHA256 with a random salt, stored as
//! `pbkdf2-sha256$<iterations>$<salt>$<hash>` (base64, no padding).

use base64::prelude::*;
use rand::Rng;
use sha2::Sha256;
use subtle::ConstantTimeEq;

const SCHEME: &str = "pbkdf2-sha256";
const ITERATIONS: u32 = 100_000;
const SALT_LEN: usize = 16;

fn derive(password: &[u8], salt: &[u8], iterations: u32) -> [u8; 32] {
    let mut out = [0u8; 32];
    pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
    out
}

pub fn hash_password(password: &str) -> String {
    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill(&mut salt[..]);
    hash_with(password, &salt, ITERATIONS)
}

fn hash_with(password: &str, salt: &[u8], iterations: u32) -> String {
    let digest = derive(password.as_bytes(), salt, iterations);
    format!(
        "{}${}${}${}",
        SCHEME,
        iterations,
        BASE64_STANDARD_NO_PAD.encode(salt),
        BASE64_STANDARD_NO_PAD.encode(digest)
    )
}

/// Constant-time comparison against a stored hash; malformed hashes never match
pub fn verify_password(password: &str, stored: &str) -> bool {
    let parts: Vec<&str> = stored.split('$').collect();
    let [scheme, iterations, salt, expected] = parts.as_slice() else {
        return false;
    };
    if *scheme != SCHEME {
        return false;
    }

    let Ok(iterations) = iterations.parse::<u32>() else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (
        BASE64_STANDARD_NO_PAD.decode(salt),
        BASE64_STANDARD_NO_PAD.decode(expected),
    ) else {
        return false;
    };
    if iterations == 0 {
        return false;
    }

    let actual = derive(password.as_bytes(), &salt, iterations);
    actual[..].ct_eq(&expected[..]).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_and_verify() {
        let hash = hash_password("hunter2");
        assert!(hash.starts_with("pbkdf2-sha256$100000$"));
        assert!(verify_password("hunter2", &hash));
        assert!(!verify_password("hunter3", &hash));
    }

    #[test]
    fn test_salts_differ() {
        assert_ne!(hash_password("same"), hash_password("same"));
    }

    #[test]
    fn test_known_vector() {
        // RFC 7914 section 11, first PBKDF2-HMAC-SHA256 vector (first 32 bytes)
        let digest = derive(b"passwd", b"salt", 1);
        assert_eq!(
            &digest[..8],
            &[0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f]
        );
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        assert!(!verify_password("x", "plain-text"));
        assert!(!verify_password("x", "pbkdf2-sha256$abc$AAAA$AAAA"));
        assert!(!verify_password("x", "md5$1$AAAA$AAAA"));
    }
}
