//! Key management: the `Kms` trait and the built-in master-key KMS
//!
//! A KMS hands out data keys together with a sealed (encrypted) copy that is
//! stored next to the object. Every data key is bound to a key ID and a
//! [`Context`]; unsealing with a different context fails.

use std::collections::BTreeMap;
use std::fmt;

use rand::rngs::OsRng;
use serde::Serialize;
use tracing::debug;
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::key::{fill_random, hmac_sha256};
use crate::KEY_SIZE;

/// A plaintext data key. Zeroized on drop.
pub type DataKey = Zeroizing<[u8; KEY_SIZE]>;

/// Key/value pairs a data key is cryptographically bound to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Context(BTreeMap<String, String>);

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical serialization: `{"k1":"v1","k2":"v2"}` with keys sorted and
    /// no whitespace. Keys and values are written verbatim, without JSON
    /// escaping, since existing sealed keys are bound to exactly this form.
    pub fn canonical(&self) -> String {
        let body = self
            .0
            .iter()
            .map(|(k, v)| format!("\"{k}\":\"{v}\""))
            .collect::<Vec<_>>()
            .join(",");
        format!("{{{body}}}")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Context {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Description of a configured KMS.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KmsInfo {
    pub endpoint: String,
    pub name: String,
    pub auth_type: String,
}

/// A key management service that generates and unseals data keys.
pub trait Kms: Send + Sync {
    /// The default key ID.
    fn key_id(&self) -> &str;

    /// Generate a fresh data key and its sealed form.
    fn generate_key(&self, key_id: &str, ctx: &Context) -> Result<(DataKey, Vec<u8>)>;

    /// Recover the data key from its sealed form.
    fn unseal_key(&self, key_id: &str, sealed_key: &[u8], ctx: &Context) -> Result<DataKey>;

    /// Re-seal a data key under the current master key. Implementations
    /// without key rotation verify the sealed key and return it unchanged.
    fn update_key(&self, key_id: &str, sealed_key: &[u8], ctx: &Context) -> Result<Vec<u8>> {
        self.unseal_key(key_id, sealed_key, ctx)?;
        Ok(sealed_key.to_vec())
    }

    fn info(&self) -> KmsInfo;
}

/// A KMS backed by a single locally held 256-bit master key.
pub struct MasterKeyKms {
    key_id: String,
    master_key: Zeroizing<[u8; KEY_SIZE]>,
}

impl MasterKeyKms {
    pub fn new(key_id: impl Into<String>, master_key: [u8; KEY_SIZE]) -> Self {
        Self {
            key_id: key_id.into(),
            master_key: Zeroizing::new(master_key),
        }
    }

    /// Build from a key given as 64 hex characters.
    pub fn from_hex(key_id: impl Into<String>, hex_key: &str) -> Result<Self> {
        if hex_key.len() != 2 * KEY_SIZE {
            return Err(Error::InvalidMasterKey(
                "key is not a 32 bytes long HEX value".into(),
            ));
        }
        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        hex::decode_to_slice(hex_key, &mut *key)
            .map_err(|e| Error::InvalidMasterKey(e.to_string()))?;
        Ok(Self::new(key_id, *key))
    }

    fn derive_key(&self, key_id: &str, ctx: &Context) -> Zeroizing<[u8; KEY_SIZE]> {
        let canonical = ctx.canonical();
        hmac_sha256(&*self.master_key, &[key_id.as_bytes(), canonical.as_bytes()])
    }
}

impl fmt::Debug for MasterKeyKms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MasterKeyKms")
            .field("key_id", &self.key_id)
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

impl Kms for MasterKeyKms {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn generate_key(&self, key_id: &str, ctx: &Context) -> Result<(DataKey, Vec<u8>)> {
        let mut key: DataKey = Zeroizing::new([0u8; KEY_SIZE]);
        fill_random(&mut OsRng, &mut *key);

        let derived = self.derive_key(key_id, ctx);
        let mut sealed = Vec::with_capacity(64);
        let n = ipos_sio::encrypt(&mut sealed, &key[..], ipos_sio::Config::new(*derived))?;
        if n != 64 {
            return Err(Error::Kms("unable to encrypt data key".into()));
        }
        debug!(key_id, "generated data key with master key");
        Ok((key, sealed))
    }

    fn unseal_key(&self, key_id: &str, sealed_key: &[u8], ctx: &Context) -> Result<DataKey> {
        let derived = self.derive_key(key_id, ctx);
        let mut plain = Zeroizing::new(Vec::with_capacity(KEY_SIZE));
        let n = ipos_sio::decrypt(&mut *plain, sealed_key, ipos_sio::Config::new(*derived))?;
        if n as usize != KEY_SIZE {
            return Err(Error::Kms("invalid data key size".into()));
        }
        let mut key: DataKey = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&plain);
        Ok(key)
    }

    fn info(&self) -> KmsInfo {
        KmsInfo {
            endpoint: String::new(),
            name: String::new(),
            auth_type: "master-key".to_string(),
        }
    }
}

/// Parse a master key of the form `<key-id>:<64 hex characters>`.
pub fn parse_master_key(value: &str) -> Result<MasterKeyKms> {
    let (key_id, hex_key) = value
        .split_once(':')
        .ok_or_else(|| Error::InvalidMasterKey("value does not contain a ':'".into()))?;
    MasterKeyKms::from_hex(key_id, hex_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MASTER: &str =
        "my-key:6368616e676520746869732070617373776f726420746f206120736563726574";

    fn ctx(bucket: &str, path: &str) -> Context {
        [(bucket, path)].into_iter().collect()
    }

    #[test]
    fn test_context_canonical_form() {
        assert_eq!(Context::new().canonical(), "{}");

        let mut c = Context::new();
        c.insert("b", "2");
        c.insert("a", "1");
        assert_eq!(c.canonical(), r#"{"a":"1","b":"2"}"#);

        // written verbatim
        let c = ctx("bucket", "say \"hi\"");
        assert_eq!(c.canonical(), r#"{"bucket":"say "hi""}"#);
    }

    #[test]
    fn test_master_key_roundtrip() {
        let kms = parse_master_key(MASTER).unwrap();
        assert_eq!(kms.key_id(), "my-key");

        let c = ctx("bucket", "bucket/object");
        let (key, sealed) = kms.generate_key("my-key", &c).unwrap();
        assert_eq!(sealed.len(), 64);

        let unsealed = kms.unseal_key("my-key", &sealed, &c).unwrap();
        assert_eq!(*unsealed, *key);
    }

    #[test]
    fn test_master_key_binds_context_and_id() {
        let kms = parse_master_key(MASTER).unwrap();
        let c = ctx("bucket", "bucket/object");
        let (_, sealed) = kms.generate_key("my-key", &c).unwrap();

        assert!(kms.unseal_key("my-key", &sealed, &ctx("bucket", "bucket/other")).is_err());
        assert!(kms.unseal_key("other-key", &sealed, &c).is_err());
        assert!(kms.unseal_key("my-key", &sealed, &Context::new()).is_err());
    }

    #[test]
    fn test_update_key_returns_input() {
        let kms = MasterKeyKms::new("id", [9u8; KEY_SIZE]);
        let c = ctx("b", "b/o");
        let (_, sealed) = kms.generate_key("id", &c).unwrap();
        assert_eq!(kms.update_key("id", &sealed, &c).unwrap(), sealed);

        let mut tampered = sealed.clone();
        tampered[20] ^= 1;
        assert!(kms.update_key("id", &tampered, &c).is_err());
    }

    #[test]
    fn test_info() {
        let info = MasterKeyKms::new("id", [0u8; KEY_SIZE]).info();
        assert_eq!(info.auth_type, "master-key");
        assert!(info.endpoint.is_empty());
    }

    #[test]
    fn test_parse_master_key_errors() {
        assert!(matches!(parse_master_key("no-colon"), Err(Error::InvalidMasterKey(_))));
        assert!(matches!(parse_master_key("id:abcd"), Err(Error::InvalidMasterKey(_))));
        let bad_hex = format!("id:{}", "zz".repeat(32));
        assert!(matches!(parse_master_key(&bad_hex), Err(Error::InvalidMasterKey(_))));
    }

    #[test]
    fn test_parse_master_key_splits_on_first_colon() {
        let kms = parse_master_key(MASTER).unwrap();
        assert_eq!(kms.key_id(), "my-key");
        let err = parse_master_key("a:b:c").unwrap_err();
        assert!(matches!(err, Error::InvalidMasterKey(_)));
    }

    #[test]
    fn test_debug_redacts_master_key() {
        let dbg = format!("{:?}", MasterKeyKms::new("id", [0xCD; KEY_SIZE]));
        assert!(dbg.contains("REDACTED"));
        assert!(!dbg.contains("205"));
    }
}
