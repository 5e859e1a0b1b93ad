//! Stream configuration
//!
//! A [`Config`] is cheap to clone and is consumed by every stream
//! constructor. Unset fields are filled in by [`Config::resolve`]:
//!
//! | field          | default                                   |
//! |----------------|-------------------------------------------|
//! | min version    | DARE 1.0                                  |
//! | max version    | DARE 2.0                                  |
//! | cipher suites  | host preference (see [`default_cipher_suites`]) |
//! | payload size   | 65536                                     |
//! | randomness     | `OsRng`                                   |

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::cipher::{default_cipher_suites, CipherSuite};
use crate::error::{Error, Result};
use crate::{KEY_SIZE, MAX_PAYLOAD_SIZE};

/// DARE format versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Version {
    V1 = 0x10,
    V2 = 0x20,
}

impl Version {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x10 => Some(Version::V1),
            0x20 => Some(Version::V2),
            _ => None,
        }
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A thread-safe, shareable source of randomness for stream nonces.
#[derive(Clone)]
pub struct RandSource(Arc<Mutex<dyn RngCore + Send>>);

impl RandSource {
    pub fn new<R: RngCore + Send + 'static>(rng: R) -> Self {
        Self(Arc::new(Mutex::new(rng)))
    }

    /// The operating system CSPRNG.
    pub fn os() -> Self {
        Self::new(rand::rngs::OsRng)
    }

    pub fn fill(&self, dst: &mut [u8]) -> Result<()> {
        self.0
            .lock()
            .try_fill_bytes(dst)
            .map_err(|e| Error::Rand(e.to_string()))
    }
}

impl fmt::Debug for RandSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RandSource")
    }
}

/// DARE stream configuration.
#[derive(Clone)]
pub struct Config {
    key: Zeroizing<[u8; KEY_SIZE]>,
    min_version: Option<Version>,
    max_version: Option<Version>,
    cipher_suites: Vec<CipherSuite>,
    sequence_number: u32,
    payload_size: Option<usize>,
    rand: Option<RandSource>,
}

impl Config {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key: Zeroizing::new(key),
            min_version: None,
            max_version: None,
            cipher_suites: Vec::new(),
            sequence_number: 0,
            payload_size: None,
            rand: None,
        }
    }

    /// Build a config from a key slice; the slice must be exactly 32 bytes.
    pub fn from_slice(key: &[u8]) -> Result<Self> {
        let key: [u8; KEY_SIZE] = key
            .try_into()
            .map_err(|_| Error::InvalidConfig("invalid key size"))?;
        Ok(Self::new(key))
    }

    pub fn with_min_version(mut self, version: Version) -> Self {
        self.min_version = Some(version);
        self
    }

    pub fn with_max_version(mut self, version: Version) -> Self {
        self.max_version = Some(version);
        self
    }

    /// Pin both the minimum and maximum version.
    pub fn with_version(self, version: Version) -> Self {
        self.with_min_version(version).with_max_version(version)
    }

    /// Allowed cipher suites in order of preference. Encryption always uses
    /// the first one; decryption accepts any of them.
    pub fn with_cipher_suites(mut self, suites: &[CipherSuite]) -> Self {
        self.cipher_suites = suites.to_vec();
        self
    }

    pub fn with_sequence_number(mut self, seq: u32) -> Self {
        self.sequence_number = seq;
        self
    }

    /// Plaintext bytes per package. Only DARE 1.0 honours values below
    /// 65536; DARE 2.0 packages are always full-size.
    pub fn with_payload_size(mut self, size: usize) -> Self {
        self.payload_size = Some(size);
        self
    }

    pub fn with_rand(mut self, rand: RandSource) -> Self {
        self.rand = Some(rand);
        self
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Validate the config and fill in defaults.
    pub fn resolve(&self) -> Result<Settings> {
        if self.cipher_suites.len() > 2 {
            return Err(Error::InvalidConfig("too many cipher suites"));
        }
        let payload_size = match self.payload_size {
            None => MAX_PAYLOAD_SIZE,
            Some(0) => return Err(Error::InvalidConfig("payload size must not be zero")),
            Some(n) if n > MAX_PAYLOAD_SIZE => {
                return Err(Error::InvalidConfig("payload size is too large"))
            }
            Some(n) => n,
        };
        let min_version = self.min_version.unwrap_or(Version::V1);
        let max_version = self.max_version.unwrap_or(Version::V2);
        if min_version > max_version {
            return Err(Error::InvalidConfig(
                "minimum version cannot be larger than maximum version",
            ));
        }
        let cipher_suites = if self.cipher_suites.is_empty() {
            default_cipher_suites()
        } else {
            self.cipher_suites.clone()
        };

        Ok(Settings {
            min_version,
            max_version,
            cipher_suites,
            key: self.key.clone(),
            sequence_number: self.sequence_number,
            payload_size,
            rand: self.rand.clone().unwrap_or_else(RandSource::os),
        })
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("key", &"[REDACTED]")
            .field("min_version", &self.min_version)
            .field("max_version", &self.max_version)
            .field("cipher_suites", &self.cipher_suites)
            .field("sequence_number", &self.sequence_number)
            .field("payload_size", &self.payload_size)
            .finish()
    }
}

/// A validated [`Config`] with every default applied.
#[derive(Clone)]
pub struct Settings {
    pub(crate) min_version: Version,
    pub(crate) max_version: Version,
    pub(crate) cipher_suites: Vec<CipherSuite>,
    pub(crate) key: Zeroizing<[u8; KEY_SIZE]>,
    pub(crate) sequence_number: u32,
    pub(crate) payload_size: usize,
    pub(crate) rand: RandSource,
}

impl Settings {
    /// The single version a decryptor is pinned to, if min == max.
    pub(crate) fn pinned_version(&self) -> Option<Version> {
        (self.min_version == self.max_version).then_some(self.min_version)
    }

    /// The suite used for encryption.
    pub(crate) fn preferred_suite(&self) -> CipherSuite {
        // resolve() never leaves the list empty
        self.cipher_suites
            .first()
            .copied()
            .unwrap_or(CipherSuite::Aes256Gcm)
    }
}
