//! Cipher registry: one-byte cipher IDs → AEAD primitives
//!
//! ```text
//! 0x00  AES-256-GCM
//! 0x01  ChaCha20-Poly1305
//! ```
//!
//! Both use a 96-bit nonce and a 128-bit tag, so the package layout does not
//! depend on the cipher.

use aes_gcm::{
    aead::{generic_array::GenericArray, AeadInPlace, KeyInit},
    Aes256Gcm,
};
use chacha20poly1305::ChaCha20Poly1305;

use crate::error::{Error, Result};
use crate::{KEY_SIZE, TAG_SIZE};

/// Size of the per-package AEAD nonce
pub(crate) const NONCE_SIZE: usize = 12;

/// AEAD cipher suites supported by DARE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum CipherSuite {
    Aes256Gcm = 0x00,
    ChaCha20Poly1305 = 0x01,
}

impl CipherSuite {
    /// Look up a suite by its wire ID.
    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(CipherSuite::Aes256Gcm),
            0x01 => Some(CipherSuite::ChaCha20Poly1305),
            _ => None,
        }
    }

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            CipherSuite::Aes256Gcm => "AES-256-GCM",
            CipherSuite::ChaCha20Poly1305 => "ChaCha20-Poly1305",
        }
    }
}

impl std::fmt::Display for CipherSuite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Default preference order: AES-256-GCM first when the host has hardware
/// AES and carry-less multiplication, ChaCha20-Poly1305 first otherwise.
pub fn default_cipher_suites() -> Vec<CipherSuite> {
    if supports_aes() {
        vec![CipherSuite::Aes256Gcm, CipherSuite::ChaCha20Poly1305]
    } else {
        vec![CipherSuite::ChaCha20Poly1305, CipherSuite::Aes256Gcm]
    }
}

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
fn supports_aes() -> bool {
    std::arch::is_x86_feature_detected!("aes") && std::arch::is_x86_feature_detected!("pclmulqdq")
}

#[cfg(target_arch = "aarch64")]
fn supports_aes() -> bool {
    std::arch::is_aarch64_feature_detected!("aes")
}

#[cfg(target_arch = "s390x")]
fn supports_aes() -> bool {
    true
}

#[cfg(not(any(
    target_arch = "x86",
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "s390x"
)))]
fn supports_aes() -> bool {
    false
}

/// A keyed AEAD instance.
#[derive(Clone)]
pub(crate) enum Aead {
    Aes256Gcm(Box<Aes256Gcm>),
    ChaCha20Poly1305(Box<ChaCha20Poly1305>),
}

impl Aead {
    pub(crate) fn new(suite: CipherSuite, key: &[u8; KEY_SIZE]) -> Self {
        match suite {
            CipherSuite::Aes256Gcm => Aead::Aes256Gcm(Box::new(Aes256Gcm::new(key.into()))),
            CipherSuite::ChaCha20Poly1305 => {
                Aead::ChaCha20Poly1305(Box::new(ChaCha20Poly1305::new(key.into())))
            }
        }
    }

    /// Encrypt `buf` in place and return the detached tag.
    pub(crate) fn seal_in_place(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buf: &mut [u8],
    ) -> Result<[u8; TAG_SIZE]> {
        let nonce = GenericArray::from_slice(nonce);
        let tag = match self {
            Aead::Aes256Gcm(c) => c.encrypt_in_place_detached(nonce, aad, buf),
            Aead::ChaCha20Poly1305(c) => c.encrypt_in_place_detached(nonce, aad, buf),
        }
        .map_err(|_| Error::InvalidPayloadSize)?;

        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Verify `tag` and decrypt `buf` in place. On failure `buf` must not be
    /// released to the caller.
    pub(crate) fn open_in_place(
        &self,
        nonce: &[u8; NONCE_SIZE],
        aad: &[u8],
        buf: &mut [u8],
        tag: &[u8],
    ) -> Result<()> {
        if tag.len() != TAG_SIZE {
            return Err(Error::InvalidPayloadSize);
        }
        let nonce = GenericArray::from_slice(nonce);
        let tag = GenericArray::from_slice(tag);
        match self {
            Aead::Aes256Gcm(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
            Aead::ChaCha20Poly1305(c) => c.decrypt_in_place_detached(nonce, aad, buf, tag),
        }
        .map_err(|_| Error::TagMismatch)
    }
}

/// The decryption side keeps one keyed instance per allowed suite, indexed by
/// cipher ID. Suites not listed in the config stay `None` and are rejected.
#[derive(Clone)]
pub(crate) struct CipherSet {
    ciphers: [Option<Aead>; 2],
}

impl CipherSet {
    pub(crate) fn new(suites: &[CipherSuite], key: &[u8; KEY_SIZE]) -> Self {
        let mut ciphers: [Option<Aead>; 2] = [None, None];
        for &suite in suites {
            ciphers[suite.id() as usize] = Some(Aead::new(suite, key));
        }
        Self { ciphers }
    }

    pub(crate) fn get(&self, id: u8) -> Result<&Aead> {
        self.ciphers
            .get(id as usize)
            .and_then(Option::as_ref)
            .ok_or(Error::UnsupportedCipher)
    }
}
