//! ipos-sio: the DARE stream format
//!
//! DARE splits a plaintext stream into packages of at most 64 KiB and seals
//! each one with an AEAD (AES-256-GCM or ChaCha20-Poly1305):
//!
//! ```text
//! [16 bytes: header][N bytes: ciphertext][16 bytes: tag]     N <= 65536
//! ```
//!
//! Two wire-incompatible versions exist:
//! - `0x10` (DARE 1.0): the header carries the sequence number; the last
//!   package is simply the one the stream ends with.
//! - `0x20` (DARE 2.0): every non-final package is exactly 64 KiB and the
//!   last one is sealed with a final flag folded into its nonce, so dropping
//!   trailing packages is detected.
//!
//! Entry points:
//! - [`encrypt`] / [`decrypt`]: copy a whole stream
//! - [`EncryptReader`] / [`DecryptReader`]: pull-based (`io::Read`)
//! - [`EncryptWriter`] / [`DecryptWriter`]: push-based (`io::Write` + `finish`)
//! - [`DecryptReaderAt`]: random-access decryption of byte ranges
//! - [`encrypted_size`] / [`decrypted_size`]: size arithmetic

pub mod cipher;
pub mod config;
pub mod error;
pub mod generic;
mod package;
pub mod pool;
pub mod reader_at;
pub mod size;
mod v1;
mod v2;

use std::io::{self, Read, Write};

pub use cipher::CipherSuite;
pub use config::{Config, RandSource, Version};
pub use error::{Error, Result};
pub use generic::{DecryptReader, DecryptWriter, EncryptReader, EncryptWriter};
pub use pool::BufferPool;
pub use reader_at::{DecryptReaderAt, ReadAt};
pub use size::{decrypted_size, encrypted_size};

/// Size of a DARE stream key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of a package header
pub const HEADER_SIZE: usize = 16;

/// Maximum plaintext payload of a single package
pub const MAX_PAYLOAD_SIZE: usize = 1 << 16;

/// Size of the AEAD authentication tag
pub const TAG_SIZE: usize = 16;

/// Size of a full package: header + max payload + tag
pub const MAX_PACKAGE_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + TAG_SIZE;

/// Largest plaintext a DARE stream can address (2^48 bytes)
pub const MAX_DECRYPTED_SIZE: u64 = 1 << 48;

/// Largest ciphertext a DARE stream can address
pub const MAX_ENCRYPTED_SIZE: u64 = MAX_DECRYPTED_SIZE + (((HEADER_SIZE + TAG_SIZE) as u64) << 32);

/// Encrypt everything from `src` into `dst`. Returns the number of
/// ciphertext bytes written.
pub fn encrypt<W: Write + ?Sized, R: Read>(dst: &mut W, src: R, config: Config) -> Result<u64> {
    let mut reader = EncryptReader::new(src, config)?;
    io::copy(&mut reader, dst).map_err(Error::from_io)
}

/// Decrypt everything from `src` into `dst`. Returns the number of
/// plaintext bytes written.
///
/// Plaintext is written package by package as each one is authenticated, so
/// on error `dst` holds exactly the plaintext of the packages that verified.
pub fn decrypt<W: Write + ?Sized, R: Read>(dst: &mut W, src: R, config: Config) -> Result<u64> {
    let mut reader = DecryptReader::new(src, config)?;
    io::copy(&mut reader, dst).map_err(Error::from_io)
}

/// Fill `buf` from `src` until it is full or the source is exhausted.
/// Returns the number of bytes read.
pub(crate) fn read_full<R: Read + ?Sized>(src: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut n = 0;
    while n < buf.len() {
        match src.read(&mut buf[n..]) {
            Ok(0) => break,
            Ok(nn) => n += nn,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_package_geometry() {
        assert_eq!(MAX_PACKAGE_SIZE, 65568);
        assert_eq!(MAX_ENCRYPTED_SIZE, (1 << 48) + (1 << 37));
    }

    #[test]
    fn test_read_full_stops_at_eof() {
        let mut src: &[u8] = b"abc";
        let mut buf = [0u8; 8];
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(read_full(&mut src, &mut buf).unwrap(), 0);
    }

    #[test]
    fn test_encrypt_decrypt_helpers() {
        let plaintext = vec![7u8; 100_000];
        let config = Config::new([1u8; KEY_SIZE]);

        let mut ciphertext = Vec::new();
        let n = encrypt(&mut ciphertext, plaintext.as_slice(), config.clone()).unwrap();
        assert_eq!(n, encrypted_size(plaintext.len() as u64).unwrap());
        assert_eq!(n as usize, ciphertext.len());

        let mut output = Vec::new();
        let n = decrypt(&mut output, ciphertext.as_slice(), config).unwrap();
        assert_eq!(n as usize, plaintext.len());
        assert_eq!(output, plaintext);
    }

    #[test]
    fn test_decrypt_wrong_key() {
        let mut ciphertext = Vec::new();
        encrypt(&mut ciphertext, &b"secret data"[..], Config::new([1u8; KEY_SIZE])).unwrap();

        let mut output = Vec::new();
        let err = decrypt(&mut output, ciphertext.as_slice(), Config::new([2u8; KEY_SIZE]))
            .unwrap_err();
        assert!(matches!(err, Error::TagMismatch));
        assert!(output.is_empty());
    }
}
