use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};

/// Hash arbitrary bytes → hex
pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Short token unique to this process, this moment and `seed`. Used to keep
/// credential files of different plans apart in a shared scratch directory.
pub fn unique_token(seed: &str) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let material = format!("{}\0{}\0{}", seed, std::process::id(), nanos);
    sha256_bytes(material.as_bytes())[..12].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_bytes_known_value() {
        assert_eq!(
            sha256_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_unique_token_shape() {
        let a = unique_token("daily");
        assert_eq!(a.len(), 12);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
