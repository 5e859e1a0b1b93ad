//! SSE-S3 and SSE-C: object key metadata and stream helpers
//!
//! SSE-S3 seals the object key with a KMS data key; the KMS key ID and the
//! KMS-sealed data key are stored in the metadata. SSE-C seals the object key
//! with the 256-bit key the client sends with every request.

use std::io::{self, Read, Write};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ipos_sio::{Config, DecryptWriter, EncryptReader, Version, MAX_DECRYPTED_SIZE, MAX_PAYLOAD_SIZE};
use tracing::debug;

use crate::error::{Error, Result};
use crate::key::{path_join, ObjectKey, SealAlgorithm, SealedKey, IV_SIZE, SEALED_KEY_SIZE};
use crate::kms::{Context, Kms};
use crate::metadata::{
    Metadata, S3_KMS_KEY_ID, S3_KMS_SEALED_KEY, S3_SEALED_KEY, SSEC_SEALED_KEY, SSE_IV,
    SSE_SEAL_ALGORITHM,
};
use crate::KEY_SIZE;

/// A data key sealed by the KMS, as stored with an SSE-S3 object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsDataKey {
    pub key_id: String,
    pub sealed_key: Vec<u8>,
}

/// Parsed SSE-S3 metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseS3Metadata {
    pub kms: Option<KmsDataKey>,
    pub sealed_key: SealedKey,
}

/// Server-side encryption with KMS-managed keys.
#[derive(Debug, Clone, Copy)]
pub struct SseS3;

impl SseS3 {
    pub const DOMAIN: &'static str = "SSE-S3";

    pub fn is_encrypted(metadata: &Metadata) -> bool {
        [S3_SEALED_KEY, S3_KMS_KEY_ID, S3_KMS_SEALED_KEY]
            .iter()
            .any(|k| metadata.contains_key(*k))
    }

    /// The KMS context an SSE-S3 data key is bound to.
    pub fn context(bucket: &str, object: &str) -> Context {
        [(bucket, path_join(bucket, object))].into_iter().collect()
    }

    /// Write the sealed object key (and the KMS data key, if any) to `metadata`.
    pub fn create_metadata(
        metadata: &mut Metadata,
        kms: Option<&KmsDataKey>,
        sealed_key: &SealedKey,
    ) -> Result<()> {
        if sealed_key.algorithm != SealAlgorithm::DareV2HmacSha256 {
            return Err(Error::InvalidMetadata(format!(
                "the seal algorithm '{}' is invalid for SSE-S3",
                sealed_key.algorithm
            )));
        }
        if let Some(kms) = kms {
            if kms.key_id.is_empty() {
                return Err(Error::InvalidMetadata(
                    "the key ID must not be empty if a KMS data key is present".into(),
                ));
            }
            if kms.sealed_key.is_empty() {
                return Err(Error::InvalidMetadata(
                    "the KMS data key must not be empty if a key ID is present".into(),
                ));
            }
        }

        write_sealed_key(metadata, S3_SEALED_KEY, sealed_key);
        if let Some(kms) = kms {
            metadata.insert(S3_KMS_KEY_ID.to_string(), kms.key_id.clone());
            metadata.insert(S3_KMS_SEALED_KEY.to_string(), STANDARD.encode(&kms.sealed_key));
        }
        Ok(())
    }

    /// Read SSE-S3 entries back. Only the current seal algorithm is accepted;
    /// the KMS key ID and the sealed data key must appear together.
    pub fn parse_metadata(metadata: &Metadata) -> Result<SseS3Metadata> {
        let b64_iv = metadata.get(SSE_IV).ok_or(Error::MissingIv)?;
        let algorithm = metadata.get(SSE_SEAL_ALGORITHM).ok_or(Error::MissingSealAlgorithm)?;
        let b64_sealed_key = metadata
            .get(S3_SEALED_KEY)
            .ok_or(Error::MissingSealedKey(Self::DOMAIN))?;

        let key_id = metadata.get(S3_KMS_KEY_ID);
        let b64_kms_key = metadata.get(S3_KMS_SEALED_KEY);
        match (key_id, b64_kms_key) {
            (None, Some(_)) => return Err(Error::MissingKmsKeyId),
            (Some(_), None) => return Err(Error::MissingKmsSealedKey),
            _ => {}
        }

        let iv = decode_iv(b64_iv)?;
        if algorithm.as_str() != SealAlgorithm::DareV2HmacSha256.as_str() {
            return Err(Error::InvalidSealAlgorithm);
        }
        let key = decode_sealed_key(b64_sealed_key, Self::DOMAIN)?;
        let kms = match (key_id, b64_kms_key) {
            (Some(key_id), Some(b64)) => Some(KmsDataKey {
                key_id: key_id.clone(),
                sealed_key: STANDARD.decode(b64).map_err(|_| Error::InvalidKmsSealedKey)?,
            }),
            _ => None,
        };

        Ok(SseS3Metadata {
            kms,
            sealed_key: SealedKey {
                key,
                iv,
                algorithm: SealAlgorithm::DareV2HmacSha256,
            },
        })
    }

    /// Unseal the data key through `kms`, then the object key.
    pub fn unseal_object_key(
        kms: &dyn Kms,
        metadata: &Metadata,
        bucket: &str,
        object: &str,
    ) -> Result<ObjectKey> {
        let parsed = Self::parse_metadata(metadata)?;
        let data_key = parsed.kms.as_ref().ok_or(Error::MissingKmsKeyId)?;
        debug!(key_id = %data_key.key_id, bucket, object, "unsealing SSE-S3 object key");
        let unseal_key = kms.unseal_key(
            &data_key.key_id,
            &data_key.sealed_key,
            &Self::context(bucket, object),
        )?;
        ObjectKey::unseal(&unseal_key, &parsed.sealed_key, Self::DOMAIN, bucket, object)
    }
}

/// Server-side encryption with client-provided keys.
#[derive(Debug, Clone, Copy)]
pub struct SseC;

impl SseC {
    pub const DOMAIN: &'static str = "SSE-C";

    pub fn is_encrypted(metadata: &Metadata) -> bool {
        metadata.contains_key(SSEC_SEALED_KEY)
    }

    pub fn create_metadata(metadata: &mut Metadata, sealed_key: &SealedKey) -> Result<()> {
        if sealed_key.algorithm != SealAlgorithm::DareV2HmacSha256 {
            return Err(Error::InvalidMetadata(format!(
                "the seal algorithm '{}' is invalid for SSE-C",
                sealed_key.algorithm
            )));
        }
        write_sealed_key(metadata, SSEC_SEALED_KEY, sealed_key);
        Ok(())
    }

    /// Read SSE-C entries back. Objects sealed with the legacy algorithm are
    /// still accepted.
    pub fn parse_metadata(metadata: &Metadata) -> Result<SealedKey> {
        let b64_iv = metadata.get(SSE_IV).ok_or(Error::MissingIv)?;
        let algorithm = metadata.get(SSE_SEAL_ALGORITHM).ok_or(Error::MissingSealAlgorithm)?;
        let b64_sealed_key = metadata
            .get(SSEC_SEALED_KEY)
            .ok_or(Error::MissingSealedKey(Self::DOMAIN))?;

        let iv = decode_iv(b64_iv)?;
        let algorithm = algorithm
            .parse::<SealAlgorithm>()
            .map_err(|_| Error::InvalidSealAlgorithm)?;
        let key = decode_sealed_key(b64_sealed_key, Self::DOMAIN)?;
        Ok(SealedKey { key, iv, algorithm })
    }

    pub fn unseal_object_key(
        client_key: &[u8; KEY_SIZE],
        metadata: &Metadata,
        bucket: &str,
        object: &str,
    ) -> Result<ObjectKey> {
        let sealed_key = Self::parse_metadata(metadata)?;
        ObjectKey::unseal(client_key, &sealed_key, Self::DOMAIN, bucket, object)
    }
}

fn write_sealed_key(metadata: &mut Metadata, entry: &str, sealed_key: &SealedKey) {
    metadata.insert(
        SSE_SEAL_ALGORITHM.to_string(),
        sealed_key.algorithm.as_str().to_string(),
    );
    metadata.insert(SSE_IV.to_string(), STANDARD.encode(sealed_key.iv));
    metadata.insert(entry.to_string(), STANDARD.encode(sealed_key.key));
}

fn decode_iv(value: &str) -> Result<[u8; IV_SIZE]> {
    STANDARD
        .decode(value)
        .ok()
        .and_then(|iv| <[u8; IV_SIZE]>::try_from(iv.as_slice()).ok())
        .ok_or(Error::InvalidIv)
}

fn decode_sealed_key(value: &str, domain: &'static str) -> Result<[u8; SEALED_KEY_SIZE]> {
    STANDARD
        .decode(value)
        .ok()
        .and_then(|key| <[u8; SEALED_KEY_SIZE]>::try_from(key.as_slice()).ok())
        .ok_or(Error::InvalidSealedKey(domain))
}

/// Encrypt a single-part object with its object key (DARE 2.0 only).
pub fn encrypt_single_part<R: Read>(src: R, key: &ObjectKey) -> Result<EncryptReader<R>> {
    let config = Config::new(*key.as_bytes()).with_min_version(Version::V2);
    Ok(EncryptReader::new(src, config)?)
}

/// Encrypt part `part_id` of a multipart object with the derived part key.
pub fn encrypt_multi_part<R: Read>(
    src: R,
    part_id: u32,
    key: &ObjectKey,
) -> Result<EncryptReader<R>> {
    encrypt_single_part(src, &key.derive_part_key(part_id))
}

/// Decrypt a range of a single-part object into `dst`.
///
/// The ciphertext written to the returned writer must start at the package
/// holding `offset`; only the `length` plaintext bytes starting at `offset`
/// reach `dst`. Call [`DecryptWriter::finish`] to verify the last package.
pub fn decrypt_single_part<W: Write>(
    dst: W,
    offset: u64,
    length: u64,
    key: &ObjectKey,
) -> Result<DecryptWriter<LimitedWriter<W>>> {
    if offset >= MAX_DECRYPTED_SIZE {
        return Err(ipos_sio::Error::UnexpectedSize.into());
    }
    let payload = MAX_PAYLOAD_SIZE as u64;
    let sequence = u32::try_from(offset / payload).map_err(|_| ipos_sio::Error::UnexpectedSize)?;
    let dst = LimitedWriter::new(dst, offset % payload, length);
    let config = Config::new(*key.as_bytes()).with_sequence_number(sequence);
    Ok(DecryptWriter::new(dst, config)?)
}

/// Writer that drops the first `skip` bytes, forwards the next `length`
/// bytes and silently discards the rest.
#[derive(Debug)]
pub struct LimitedWriter<W> {
    inner: W,
    skip: u64,
    remaining: u64,
}

impl<W: Write> LimitedWriter<W> {
    pub fn new(inner: W, skip: u64, length: u64) -> Self {
        Self {
            inner,
            skip,
            remaining: length,
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for LimitedWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let skip = self.skip.min(buf.len() as u64) as usize;
        self.skip -= skip as u64;
        let rest = &buf[skip..];

        let take = self.remaining.min(rest.len() as u64) as usize;
        if take > 0 {
            self.inner.write_all(&rest[..take])?;
            self.remaining -= take as u64;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
