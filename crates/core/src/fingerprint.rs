//! 32-bit content fingerprint of an ordered item collection.
//!
//! MurmurHash3 (x86, 32-bit, seed 0) over the JSON serialization. The value
//! doubles as the `message_id` of the aggregation request, so it must be
//! stable across runs.

use std::io::Cursor;

use serde::Serialize;

fn hash(data: &[u8]) -> u32 {
    // Reading from an in-memory cursor does not fail.
    murmur3::murmur3_32(&mut Cursor::new(data), 0).unwrap_or_default()
}

/// Fingerprint of `items` in their current order.
pub fn of<T: Serialize>(items: &[T]) -> u32 {
    // Serializing plain data structs cannot fail; an empty string still hashes.
    let json = serde_json::to_string(items).unwrap_or_default();
    hash(json.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_vectors() {
        assert_eq!(hash(b""), 0);
        assert_eq!(hash(b"test"), 0xba6b_d213);
        assert_eq!(hash(b"Hello, world!"), 0xc036_3e43);
        assert_eq!(hash(b"The quick brown fox jumps over the lazy dog"), 0x2e4f_f723);
    }

    #[test]
    fn hashes_the_json_form() {
        assert_eq!(of(&["a", "b"]), hash(br#"["a","b"]"#));
    }

    #[test]
    fn order_matters() {
        assert_eq!(of(&["a", "b"]), of(&["a", "b"]));
        assert_ne!(of(&["a", "b"]), of(&["b", "a"]));
    }
}
