//! Plaintext/ciphertext size arithmetic
//!
//! Sizes are identical for DARE 1.0 and 2.0 when 1.0 uses full 64 KiB
//! packages: every full package adds 32 bytes of overhead and a trailing
//! partial package of `r` bytes becomes `r + 32` bytes.

use crate::error::{Error, Result};
use crate::{
    HEADER_SIZE, MAX_DECRYPTED_SIZE, MAX_ENCRYPTED_SIZE, MAX_PACKAGE_SIZE, MAX_PAYLOAD_SIZE,
    TAG_SIZE,
};

const OVERHEAD: u64 = (HEADER_SIZE + TAG_SIZE) as u64;

/// Ciphertext size of a plaintext of `size` bytes.
pub fn encrypted_size(size: u64) -> Result<u64> {
    if size > MAX_DECRYPTED_SIZE {
        return Err(Error::UnexpectedSize);
    }
    let full = size / MAX_PAYLOAD_SIZE as u64;
    let rest = size % MAX_PAYLOAD_SIZE as u64;
    let mut encrypted = full * MAX_PACKAGE_SIZE as u64;
    if rest > 0 {
        encrypted += rest + OVERHEAD;
    }
    Ok(encrypted)
}

/// Plaintext size of a ciphertext of `size` bytes.
///
/// Fails with [`Error::InvalidSize`] when `size` cannot be the length of a
/// well-formed stream, i.e. the trailing partial package would have no
/// payload.
pub fn decrypted_size(size: u64) -> Result<u64> {
    if size > MAX_ENCRYPTED_SIZE {
        return Err(Error::UnexpectedSize);
    }
    let full = size / MAX_PACKAGE_SIZE as u64;
    let rest = size % MAX_PACKAGE_SIZE as u64;
    if rest > 0 && rest <= OVERHEAD {
        return Err(Error::InvalidSize);
    }
    let mut decrypted = full * MAX_PAYLOAD_SIZE as u64;
    if rest > 0 {
        decrypted += rest - OVERHEAD;
    }
    Ok(decrypted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encrypted_size_table() {
        let cases: &[(u64, u64)] = &[
            (0, 0),
            (1, 33),
            (65535, 65567),
            (65536, 65568),
            (65537, 65601),
            (200_000, 200_128),
        ];
        for &(plain, cipher) in cases {
            assert_eq!(encrypted_size(plain).unwrap(), cipher, "plaintext {plain}");
            assert_eq!(decrypted_size(cipher).unwrap(), plain, "ciphertext {cipher}");
        }
    }

    #[test]
    fn test_encrypted_size_limit() {
        assert!(encrypted_size(MAX_DECRYPTED_SIZE).is_ok());
        assert!(matches!(
            encrypted_size(MAX_DECRYPTED_SIZE + 1),
            Err(Error::UnexpectedSize)
        ));
    }

    #[test]
    fn test_decrypted_size_limit() {
        assert_eq!(
            decrypted_size(encrypted_size(MAX_DECRYPTED_SIZE).unwrap()).unwrap(),
            MAX_DECRYPTED_SIZE
        );
        assert!(matches!(
            decrypted_size(MAX_ENCRYPTED_SIZE + 1),
            Err(Error::UnexpectedSize)
        ));
    }

    #[test]
    fn test_decrypted_size_rejects_empty_trailing_package() {
        for rest in 1..=32u64 {
            assert!(matches!(decrypted_size(rest), Err(Error::InvalidSize)));
            assert!(matches!(
                decrypted_size(MAX_PACKAGE_SIZE as u64 + rest),
                Err(Error::InvalidSize)
            ));
        }
        assert_eq!(decrypted_size(33).unwrap(), 1);
    }

    proptest! {
        #[test]
        fn prop_size_law(n in 0u64..=MAX_DECRYPTED_SIZE) {
            let enc = encrypted_size(n).unwrap();
            prop_assert_eq!(decrypted_size(enc).unwrap(), n);
            prop_assert!(enc >= n);
        }
    }
}
