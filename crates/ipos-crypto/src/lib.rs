//! ipos-crypto: server-side encryption of objects
//!
//! Every object is encrypted with its own random object key. The object key
//! is sealed by an external key and stored, base64-encoded, in the object
//! metadata:
//!
//! ```text
//! SSE-C:  client key ──seal──▶ sealed object key
//! SSE-S3: KMS ──generate──▶ data key + sealed data key
//!                data key ──seal──▶ sealed object key
//! object key ──DARE──▶ object data (multipart: per-part keys)
//! ```
//!
//! Sealing binds the object key to a domain ("SSE-C" / "SSE-S3") and to the
//! `bucket/object` path, so a sealed key copied to another object or mode
//! fails to unseal.

pub mod config;
pub mod error;
pub mod kes;
pub mod key;
pub mod kms;
pub mod metadata;
pub mod sse;

pub use config::{KesConfig, KmsConfig, MasterKeyConfig};
pub use error::{Error, Result};
pub use kes::KesClient;
pub use key::{generate_iv, is_etag_sealed, path_join, ObjectKey, SealAlgorithm, SealedKey};
pub use kms::{parse_master_key, Context, DataKey, Kms, KmsInfo, MasterKeyKms};
pub use metadata::Metadata;
pub use sse::{
    decrypt_single_part, encrypt_multi_part, encrypt_single_part, KmsDataKey, LimitedWriter,
    SseC, SseS3, SseS3Metadata,
};

/// Size of object keys, KMS data keys, and client keys in bytes (256-bit)
pub const KEY_SIZE: usize = ipos_sio::KEY_SIZE;
