//! SHA-256 checksums recorded alongside applied versions.

use sha2::{Digest, Sha256};

/// Checksum over several texts in order, e.g. every script of a version.
///
/// Each part is length-prefixed so `["ab", "c"]` and `["a", "bc"]` differ.
pub fn compute_checksum_all<'a>(parts: impl IntoIterator<Item = &'a str>) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable_hex() {
        let a = compute_checksum_all(["CREATE TABLE t (id INT);"]);
        assert_eq!(a.len(), 64);
        assert_eq!(a, compute_checksum_all(["CREATE TABLE t (id INT);"]));
    }

    #[test]
    fn test_checksum_all_respects_boundaries() {
        assert_ne!(
            compute_checksum_all(["ab", "c"]),
            compute_checksum_all(["a", "bc"])
        );
    }
}
