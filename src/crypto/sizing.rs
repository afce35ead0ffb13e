//! Logical size of objects stored in the segmented encrypted container format.
//!
//! Encrypted objects consist of a header followed by ciphertext blocks. Each
//! block carries 64 KiB of plaintext plus a 28-byte authentication tag
//! (12-byte nonce + 16-byte MAC). Backends that decrypt transparently serve the
//! plaintext, so the filesystem must report the plaintext length.

/// Plaintext bytes carried by one full block.
pub const BLOCK_SIZE: i64 = 65536;

/// Per-block overhead (nonce + MAC).
pub const MAC_SIZE: i64 = 28;

/// Bytes occupied by one full ciphertext block.
pub const CIPHER_BLOCK_SIZE: i64 = BLOCK_SIZE + MAC_SIZE;

/// Compute the plaintext size of an encrypted object.
///
/// Returns `None` when `file_size` cannot hold the header plus at least one
/// block overhead. Pure integer arithmetic; exact multiples of
/// [`CIPHER_BLOCK_SIZE`] map to exact multiples of [`BLOCK_SIZE`].
pub fn decrypted_size(file_size: i64, header_size: i64) -> Option<i64> {
    if file_size < header_size + MAC_SIZE {
        return None;
    }

    let body = file_size - header_size;
    let blocks = body / CIPHER_BLOCK_SIZE;
    let mut remainder = body % CIPHER_BLOCK_SIZE - MAC_SIZE;
    // A tail shorter than the tag belongs to the previous block's accounting.
    if remainder < 0 {
        remainder += MAC_SIZE;
    }

    Some(blocks * BLOCK_SIZE + remainder)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: i64 = 100;

    #[test]
    fn test_exact_block_multiples() {
        for k in 1..=3 {
            let size = HEADER + k * CIPHER_BLOCK_SIZE;
            assert_eq!(decrypted_size(size, HEADER), Some(k * BLOCK_SIZE), "k = {}", k);
        }
    }

    #[test]
    fn test_one_byte_past_block_boundary() {
        for k in 1..=3 {
            let size = HEADER + k * CIPHER_BLOCK_SIZE + 1;
            assert_eq!(decrypted_size(size, HEADER), Some(k * BLOCK_SIZE + 1), "k = {}", k);
        }
    }

    #[test]
    fn test_too_small_is_invalid() {
        assert_eq!(decrypted_size(HEADER + MAC_SIZE - 1, HEADER), None);
        assert_eq!(decrypted_size(0, HEADER), None);
        assert_eq!(decrypted_size(HEADER, HEADER), None);
    }

    #[test]
    fn test_header_plus_mac_is_empty_plaintext() {
        assert_eq!(decrypted_size(HEADER + MAC_SIZE, HEADER), Some(0));
    }

    #[test]
    fn test_partial_single_block() {
        // 72 bytes of ciphertext body beyond the tag
        assert_eq!(decrypted_size(HEADER + 100, HEADER), Some(72));
        assert_eq!(
            decrypted_size(HEADER + CIPHER_BLOCK_SIZE + 1000, HEADER),
            Some(BLOCK_SIZE + 1000 - MAC_SIZE)
        );
    }

    #[test]
    fn test_large_object_stays_exact() {
        let k = 1_000_000;
        let size = HEADER + k * CIPHER_BLOCK_SIZE;
        assert_eq!(decrypted_size(size, HEADER), Some(k * BLOCK_SIZE));
    }
}
