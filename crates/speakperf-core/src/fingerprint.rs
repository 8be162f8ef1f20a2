use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Deduplication key for stored compose content.
///
/// Hashes the exact bytes: two sources with byte-identical content share a
/// row, while any whitespace difference yields a new one.
pub fn content_hash(content: &str) -> String {
    sha256_hex(content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_hash_is_stable_and_byte_exact() {
        let a = "services:\n  web:\n    image: nginx\n";
        assert_eq!(content_hash(a), content_hash(a));
        assert_eq!(content_hash(a).len(), 64);
        assert_ne!(content_hash(a), content_hash(&format!("{a} ")));
        assert_eq!(
            content_hash(""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
