//! Object keys: generation, sealing, part keys, ETag sealing
//!
//! ```text
//! external key (SSE-C client key or KMS data key)
//!   └── sealing key = HMAC-SHA256(ext, iv ‖ domain ‖ "DAREv2-HMAC-SHA256" ‖ bucket/object)
//!         └── sealed object key (64 bytes: one DARE 2.0 package)
//! object key
//!   ├── part key   = HMAC-SHA256(object key, le32(part id))
//!   └── ETag key   = HMAC-SHA256(object key, "SSE-etag")
//! ```

use std::fmt;
use std::str::FromStr;

use hmac::{Hmac, Mac};
use ipos_sio::{Config, Version};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::error;
use zeroize::{Zeroize, Zeroizing};

use crate::error::{Error, Result};
use crate::KEY_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Size of a sealed object key: one DARE package holding 32 bytes.
pub const SEALED_KEY_SIZE: usize = 64;

/// Size of the per-object sealing IV.
pub const IV_SIZE: usize = 32;

/// Key sealing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SealAlgorithm {
    /// HMAC-SHA256 sealing key with domain separation, DARE 2.0.
    DareV2HmacSha256,
    /// SHA256(ext ‖ iv) sealing key, DARE 1.0. Only accepted when unsealing.
    DareSha256,
}

impl SealAlgorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            SealAlgorithm::DareV2HmacSha256 => "DAREv2-HMAC-SHA256",
            SealAlgorithm::DareSha256 => "DARE-SHA256",
        }
    }
}

impl FromStr for SealAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "DAREv2-HMAC-SHA256" => Ok(SealAlgorithm::DareV2HmacSha256),
            "DARE-SHA256" => Ok(SealAlgorithm::DareSha256),
            other => Err(Error::UnsupportedSealAlgorithm(other.to_string())),
        }
    }
}

impl fmt::Display for SealAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An object key sealed by an external key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedKey {
    pub key: [u8; SEALED_KEY_SIZE],
    pub iv: [u8; IV_SIZE],
    pub algorithm: SealAlgorithm,
}

/// A per-object 256-bit data key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct ObjectKey {
    bytes: [u8; KEY_SIZE],
}

impl ObjectKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Generate a fresh object key bound to `ext_key`: SHA256(ext ‖ 32 random bytes).
    ///
    /// Panics if `rng` cannot produce randomness.
    pub fn generate<R: RngCore + ?Sized>(ext_key: &[u8; KEY_SIZE], rng: &mut R) -> Self {
        let mut nonce = Zeroizing::new([0u8; 32]);
        fill_random(rng, &mut *nonce);

        let mut sha = Sha256::new();
        sha.update(ext_key);
        sha.update(&*nonce);
        Self::from_bytes(sha.finalize().into())
    }

    /// Seal the key under `ext_key`, binding it to `domain` and the object path.
    pub fn seal(
        &self,
        ext_key: &[u8; KEY_SIZE],
        iv: [u8; IV_SIZE],
        domain: &str,
        bucket: &str,
        object: &str,
    ) -> SealedKey {
        let sealing_key = derive_sealing_key(ext_key, &iv, domain, bucket, object);
        let mut sealed = Vec::with_capacity(SEALED_KEY_SIZE);
        match ipos_sio::encrypt(&mut sealed, &self.bytes[..], Config::new(*sealing_key)) {
            Ok(n) if n as usize == SEALED_KEY_SIZE => {}
            Ok(_) => critical("unable to generate sealed key"),
            Err(ipos_sio::Error::Rand(_)) => critical(OUT_OF_ENTROPY),
            Err(_) => critical("unable to generate sealed key"),
        }

        let mut key = [0u8; SEALED_KEY_SIZE];
        key.copy_from_slice(&sealed);
        SealedKey {
            key,
            iv,
            algorithm: SealAlgorithm::DareV2HmacSha256,
        }
    }

    /// Recover an object key sealed with [`ObjectKey::seal`] (or the legacy
    /// SHA256 scheme). Any mismatch in key, IV, domain, or path yields
    /// [`Error::SecretKeyMismatch`].
    pub fn unseal(
        ext_key: &[u8; KEY_SIZE],
        sealed: &SealedKey,
        domain: &str,
        bucket: &str,
        object: &str,
    ) -> Result<Self> {
        let (sealing_key, min_version) = match sealed.algorithm {
            SealAlgorithm::DareV2HmacSha256 => (
                derive_sealing_key(ext_key, &sealed.iv, domain, bucket, object),
                Version::V2,
            ),
            SealAlgorithm::DareSha256 => {
                let mut sha = Sha256::new();
                sha.update(ext_key);
                sha.update(sealed.iv);
                (Zeroizing::new(sha.finalize().into()), Version::V1)
            }
        };

        let mut plaintext = Zeroizing::new(Vec::with_capacity(KEY_SIZE));
        let config = Config::new(*sealing_key).with_min_version(min_version);
        match ipos_sio::decrypt(&mut *plaintext, &sealed.key[..], config) {
            Ok(n) if n as usize == KEY_SIZE => {}
            _ => return Err(Error::SecretKeyMismatch),
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&plaintext);
        Ok(Self::from_bytes(bytes))
    }

    /// Key for multipart part `id`.
    pub fn derive_part_key(&self, id: u32) -> ObjectKey {
        ObjectKey::from_bytes(*hmac_sha256(&self.bytes, &[&id.to_le_bytes()]))
    }

    /// Encrypt an ETag. Empty ETags are returned unchanged.
    pub fn seal_etag(&self, etag: &[u8]) -> Vec<u8> {
        if etag.is_empty() {
            return Vec::new();
        }
        let mut sealed = Vec::new();
        if let Err(e) = ipos_sio::encrypt(&mut sealed, etag, Config::new(*self.etag_key())) {
            error!(error = %e, "ETag sealing failed");
            critical("unable to encrypt ETag using object key");
        }
        sealed
    }

    /// Decrypt an ETag sealed with [`ObjectKey::seal_etag`]. ETags of at most
    /// 16 bytes are plain and returned unchanged.
    pub fn unseal_etag(&self, etag: &[u8]) -> Result<Vec<u8>> {
        if !is_etag_sealed(etag) {
            return Ok(etag.to_vec());
        }
        let mut plain = Vec::new();
        ipos_sio::decrypt(&mut plain, etag, Config::new(*self.etag_key()))?;
        Ok(plain)
    }

    fn etag_key(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        hmac_sha256(&self.bytes, &[b"SSE-etag"])
    }
}

impl Drop for ObjectKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Generate a random 32-byte sealing IV. Panics if `rng` fails.
pub fn generate_iv<R: RngCore + ?Sized>(rng: &mut R) -> [u8; IV_SIZE] {
    let mut iv = [0u8; IV_SIZE];
    fill_random(rng, &mut iv);
    iv
}

/// An unsealed ETag is an MD5 digest (16 bytes) or shorter.
pub fn is_etag_sealed(etag: &[u8]) -> bool {
    etag.len() > 16
}

/// Join bucket and object into a slash-separated path and clean it
/// lexically: empty elements are skipped, duplicate slashes, `.` and
/// resolvable `..` segments are removed.
pub fn path_join(bucket: &str, object: &str) -> String {
    let parts: Vec<&str> = [bucket, object]
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return String::new();
    }
    clean_path(&parts.join("/"))
}

fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if rooted => {}
                _ => segments.push(".."),
            },
            s => segments.push(s),
        }
    }
    let joined = segments.join("/");
    if rooted {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

fn derive_sealing_key(
    ext_key: &[u8; KEY_SIZE],
    iv: &[u8; IV_SIZE],
    domain: &str,
    bucket: &str,
    object: &str,
) -> Zeroizing<[u8; KEY_SIZE]> {
    let path = path_join(bucket, object);
    hmac_sha256(
        ext_key,
        &[
            iv,
            domain.as_bytes(),
            SealAlgorithm::DareV2HmacSha256.as_str().as_bytes(),
            path.as_bytes(),
        ],
    )
}

pub(crate) fn hmac_sha256(key: &[u8], parts: &[&[u8]]) -> Zeroizing<[u8; KEY_SIZE]> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    for part in parts {
        mac.update(part);
    }
    Zeroizing::new(mac.finalize().into_bytes().into())
}

const OUT_OF_ENTROPY: &str = "unable to read enough randomness from the system";

/// Fill `buf` with randomness. Running out of entropy is not recoverable.
pub(crate) fn fill_random<R: RngCore + ?Sized>(rng: &mut R, buf: &mut [u8]) {
    if let Err(e) = rng.try_fill_bytes(buf) {
        error!(error = %e, "random source failed");
        critical(OUT_OF_ENTROPY);
    }
}

fn critical(msg: &str) -> ! {
    error!("{msg}");
    panic!("{msg}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::{OsRng, StdRng};
    use rand::SeedableRng;

    const EXT_KEY: [u8; KEY_SIZE] = [0x11; KEY_SIZE];

    fn object_key() -> ObjectKey {
        ObjectKey::generate(&EXT_KEY, &mut OsRng)
    }

    #[test]
    fn test_generate_is_deterministic_per_rng() {
        let a = ObjectKey::generate(&EXT_KEY, &mut StdRng::seed_from_u64(1));
        let b = ObjectKey::generate(&EXT_KEY, &mut StdRng::seed_from_u64(1));
        let c = ObjectKey::generate(&[0x22; KEY_SIZE], &mut StdRng::seed_from_u64(1));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_seal_unseal_roundtrip() {
        let key = object_key();
        let iv = generate_iv(&mut OsRng);
        let sealed = key.seal(&EXT_KEY, iv, "SSE-C", "bucket", "object");
        assert_eq!(sealed.algorithm, SealAlgorithm::DareV2HmacSha256);
        assert_eq!(sealed.key[0], 0x20);

        let unsealed = ObjectKey::unseal(&EXT_KEY, &sealed, "SSE-C", "bucket", "object").unwrap();
        assert_eq!(unsealed, key);
    }

    #[test]
    fn test_unseal_binds_domain_and_path() {
        let key = object_key();
        let sealed = key.seal(&EXT_KEY, generate_iv(&mut OsRng), "SSE-S3", "bucket", "x");

        for (ext, domain, bucket, object) in [
            ([0x12; KEY_SIZE], "SSE-S3", "bucket", "x"),
            (EXT_KEY, "SSE-C", "bucket", "x"),
            (EXT_KEY, "SSE-S3", "other", "x"),
            (EXT_KEY, "SSE-S3", "bucket", "y"),
        ] {
            let err = ObjectKey::unseal(&ext, &sealed, domain, bucket, object).unwrap_err();
            assert!(matches!(err, Error::SecretKeyMismatch));
        }
    }

    #[test]
    fn test_unseal_tampered_iv() {
        let key = object_key();
        let mut sealed = key.seal(&EXT_KEY, [7u8; IV_SIZE], "SSE-C", "b", "o");
        sealed.iv[0] ^= 1;
        assert!(matches!(
            ObjectKey::unseal(&EXT_KEY, &sealed, "SSE-C", "b", "o"),
            Err(Error::SecretKeyMismatch)
        ));
    }

    #[test]
    fn test_unseal_legacy_algorithm() {
        let key = object_key();
        let iv = [3u8; IV_SIZE];
        let mut sha = Sha256::new();
        sha.update(EXT_KEY);
        sha.update(iv);
        let legacy_key: [u8; KEY_SIZE] = sha.finalize().into();

        let mut sealed = Vec::new();
        ipos_sio::encrypt(
            &mut sealed,
            &key.as_bytes()[..],
            Config::new(legacy_key).with_version(Version::V1),
        )
        .unwrap();
        assert_eq!(sealed.len(), SEALED_KEY_SIZE);

        let mut bytes = [0u8; SEALED_KEY_SIZE];
        bytes.copy_from_slice(&sealed);
        let sealed = SealedKey {
            key: bytes,
            iv,
            algorithm: SealAlgorithm::DareSha256,
        };
        // The legacy scheme is not bound to domain or path.
        let unsealed = ObjectKey::unseal(&EXT_KEY, &sealed, "SSE-C", "any", "path").unwrap();
        assert_eq!(unsealed, key);
    }

    #[test]
    fn test_unknown_algorithm() {
        assert!(matches!(
            "AES-KW".parse::<SealAlgorithm>(),
            Err(Error::UnsupportedSealAlgorithm(name)) if name == "AES-KW"
        ));
        assert_eq!(
            "DARE-SHA256".parse::<SealAlgorithm>().unwrap(),
            SealAlgorithm::DareSha256
        );
    }

    #[test]
    fn test_part_keys_differ() {
        let key = ObjectKey::from_bytes([5u8; KEY_SIZE]);
        let p1 = key.derive_part_key(1);
        let p2 = key.derive_part_key(2);
        assert_ne!(p1, p2);
        assert_eq!(p1, key.derive_part_key(1));
        assert_eq!(
            p1.as_bytes(),
            &*hmac_sha256(&[5u8; KEY_SIZE], &[&[1, 0, 0, 0]])
        );
    }

    #[test]
    fn test_etag_sealing() {
        let key = object_key();
        let etag = hex::decode("d41d8cd98f00b204e9800998ecf8427e").unwrap();
        let sealed = key.seal_etag(&etag);
        assert!(is_etag_sealed(&sealed));
        assert_eq!(key.unseal_etag(&sealed).unwrap(), etag);

        // plain ETags pass through
        assert_eq!(key.unseal_etag(&etag).unwrap(), etag);
        assert!(key.seal_etag(&[]).is_empty());

        let other = object_key();
        assert!(other.unseal_etag(&sealed).is_err());
    }

    #[test]
    fn test_path_join() {
        assert_eq!(path_join("bucket", "object"), "bucket/object");
        assert_eq!(path_join("bucket", "a//b/./c"), "bucket/a/b/c");
        assert_eq!(path_join("bucket", "a/../b"), "bucket/b");
        assert_eq!(path_join("bucket", "../../x"), "../x");
        assert_eq!(path_join("", "object"), "object");
        assert_eq!(path_join("bucket", ""), "bucket");
        assert_eq!(path_join("", ""), "");
        assert_eq!(path_join("/bucket/", "/obj/"), "/bucket/obj");
        assert_eq!(path_join("/", ".."), "/");
        assert_eq!(path_join("a", ".."), ".");
    }

    #[test]
    fn test_debug_redacts_key() {
        let dbg = format!("{:?}", ObjectKey::from_bytes([0xAB; KEY_SIZE]));
        assert!(dbg.contains("REDACTED"));
    }
}
