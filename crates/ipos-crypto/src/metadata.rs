//! Internal object metadata entries written by server-side encryption

use std::collections::HashMap;

/// Object metadata: an opaque string map persisted next to the object.
pub type Metadata = HashMap<String, String>;

/// Marks a multipart object whose parts are encrypted with part keys.
pub const SSE_MULTIPART: &str = "X-IPOS-Internal-Encrypted-Multipart";

/// Base64 sealing IV.
pub const SSE_IV: &str = "X-IPOS-Internal-Server-Side-Encryption-Iv";

/// Name of the algorithm used to seal the object key.
pub const SSE_SEAL_ALGORITHM: &str = "X-IPOS-Internal-Server-Side-Encryption-Seal-Algorithm";

/// Base64 object key sealed by an SSE-C client key.
pub const SSEC_SEALED_KEY: &str = "X-IPOS-Internal-Server-Side-Encryption-Sealed-Key";

/// Base64 object key sealed by a KMS data key.
pub const S3_SEALED_KEY: &str = "X-IPOS-Internal-Server-Side-Encryption-S3-Sealed-Key";

/// ID of the KMS master key that sealed the data key.
pub const S3_KMS_KEY_ID: &str = "X-IPOS-Internal-Server-Side-Encryption-S3-Kms-Key-Id";

/// Base64 data key sealed by the KMS.
pub const S3_KMS_SEALED_KEY: &str = "X-IPOS-Internal-Server-Side-Encryption-S3-Kms-Sealed-Key";

const INTERNAL_ENTRIES: [&str; 7] = [
    SSE_MULTIPART,
    SSE_IV,
    SSE_SEAL_ALGORITHM,
    SSEC_SEALED_KEY,
    S3_SEALED_KEY,
    S3_KMS_KEY_ID,
    S3_KMS_SEALED_KEY,
];

pub fn is_multipart(metadata: &Metadata) -> bool {
    metadata.contains_key(SSE_MULTIPART)
}

/// True if any internal encryption entry is present.
pub fn is_encrypted(metadata: &Metadata) -> bool {
    INTERNAL_ENTRIES.iter().any(|k| metadata.contains_key(*k))
}

/// Mark `metadata` as belonging to an encrypted multipart object.
pub fn create_multipart_metadata(metadata: &mut Metadata) {
    metadata.insert(SSE_MULTIPART.to_string(), String::new());
}

/// Strip every internal encryption entry, e.g. before returning metadata to a client.
pub fn remove_internal_entries(metadata: &mut Metadata) {
    for key in INTERNAL_ENTRIES {
        metadata.remove(key);
    }
}
