//! Package framing
//!
//! Header layout (16 bytes):
//! ```text
//!          DARE 1.0 (0x10)                    DARE 2.0 (0x20)
//! [0]      version                            version
//! [1]      cipher ID                          cipher ID
//! [2..4]   payload length - 1 (LE u16)        payload length - 1 (LE u16)
//! [4..8]   sequence number (LE u32)           random value [0..4], bit 7 of [4] = final flag
//! [8..16]  random value (8 bytes)             random value [4..12]
//! ```
//!
//! AAD is `header[0..4]` for both versions. The DARE 1.0 nonce is
//! `header[4..16]` as-is. The DARE 2.0 nonce is `header[4..16]` with its
//! last four bytes XORed with the sequence number; because the final flag
//! lives inside the nonce, a package sealed as final cannot be passed off as
//! non-final or vice versa.
//!
//! Sealing and opening work in place on a buffer laid out as
//! `[header | payload | tag]`.

use crate::cipher::{Aead, CipherSet, CipherSuite, NONCE_SIZE};
use crate::config::{Settings, Version};
use crate::error::{Error, Result};
use crate::{HEADER_SIZE, MAX_PAYLOAD_SIZE, TAG_SIZE};

const FINAL_FLAG: u8 = 0x80;

/// Read-only view of a package header.
#[derive(Clone, Copy)]
pub(crate) struct Header<'a>(&'a [u8]);

impl<'a> Header<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        debug_assert!(bytes.len() >= HEADER_SIZE);
        Self(&bytes[..HEADER_SIZE])
    }

    pub(crate) fn version(&self) -> u8 {
        self.0[0]
    }

    pub(crate) fn cipher(&self) -> u8 {
        self.0[1]
    }

    /// Payload length in bytes (1..=65536).
    pub(crate) fn payload_len(&self) -> usize {
        u16::from_le_bytes([self.0[2], self.0[3]]) as usize + 1
    }

    /// DARE 1.0 sequence number.
    pub(crate) fn sequence_number(&self) -> u32 {
        u32::from_le_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    /// DARE 2.0 final flag.
    pub(crate) fn is_final(&self) -> bool {
        self.0[4] & FINAL_FLAG == FINAL_FLAG
    }

    pub(crate) fn nonce(&self) -> [u8; NONCE_SIZE] {
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&self.0[4..HEADER_SIZE]);
        nonce
    }

    /// DARE 2.0 random value with the final flag cleared.
    pub(crate) fn random_value(&self) -> [u8; NONCE_SIZE] {
        let mut rand = self.nonce();
        rand[0] &= !FINAL_FLAG;
        rand
    }

    pub(crate) fn aad(&self) -> &[u8] {
        &self.0[..4]
    }
}

/// Total package length for a payload of `payload_len` bytes.
pub(crate) fn package_len(payload_len: usize) -> usize {
    HEADER_SIZE + payload_len + TAG_SIZE
}

fn write_common(header: &mut [u8], version: Version, suite: CipherSuite, payload_len: usize) {
    debug_assert!((1..=MAX_PAYLOAD_SIZE).contains(&payload_len));
    header[0] = version.as_byte();
    header[1] = suite.id();
    header[2..4].copy_from_slice(&((payload_len - 1) as u16).to_le_bytes());
}

fn v2_nonce(header: &Header<'_>, seq: u32) -> [u8; NONCE_SIZE] {
    let mut nonce = header.nonce();
    let tail = u32::from_le_bytes([nonce[8], nonce[9], nonce[10], nonce[11]]) ^ seq;
    nonce[8..].copy_from_slice(&tail.to_le_bytes());
    nonce
}

/// Seal `pkg[HEADER_SIZE..HEADER_SIZE + payload_len]` in place; the header
/// must already be written. Returns the package length.
fn seal_package(aead: &Aead, nonce: &[u8; NONCE_SIZE], pkg: &mut [u8], payload_len: usize) -> Result<usize> {
    let (header, body) = pkg.split_at_mut(HEADER_SIZE);
    let (payload, rest) = body.split_at_mut(payload_len);
    let tag = aead.seal_in_place(nonce, Header::new(header).aad(), payload)?;
    rest[..TAG_SIZE].copy_from_slice(&tag);
    Ok(package_len(payload_len))
}

/// Open `pkg` in place. The caller has already validated the header against
/// `pkg.len()`. Returns the payload length.
fn open_package(aead: &Aead, nonce: &[u8; NONCE_SIZE], pkg: &mut [u8]) -> Result<usize> {
    let payload_len = pkg.len() - HEADER_SIZE - TAG_SIZE;
    let (header, body) = pkg.split_at_mut(HEADER_SIZE);
    let (payload, tag) = body.split_at_mut(payload_len);
    aead.open_in_place(nonce, Header::new(header).aad(), payload, tag)?;
    Ok(payload_len)
}

// ── DARE 1.0 ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct AuthEncV1 {
    suite: CipherSuite,
    aead: Aead,
    rand: [u8; 8],
    pub(crate) seq: u32,
}

impl AuthEncV1 {
    pub(crate) fn new(settings: &Settings) -> Result<Self> {
        let suite = settings.preferred_suite();
        let mut rand = [0u8; 8];
        settings.rand.fill(&mut rand)?;
        Ok(Self {
            suite,
            aead: Aead::new(suite, &settings.key),
            rand,
            seq: settings.sequence_number,
        })
    }

    /// Seal the payload at `pkg[16..16 + payload_len]`. Returns the package length.
    pub(crate) fn seal(&mut self, pkg: &mut [u8], payload_len: usize) -> Result<usize> {
        let header = &mut pkg[..HEADER_SIZE];
        write_common(header, Version::V1, self.suite, payload_len);
        header[4..8].copy_from_slice(&self.seq.to_le_bytes());
        header[8..16].copy_from_slice(&self.rand);
        let nonce = Header::new(header).nonce();

        let n = seal_package(&self.aead, &nonce, pkg, payload_len)?;
        self.seq = self.seq.wrapping_add(1);
        Ok(n)
    }
}

#[derive(Clone)]
pub(crate) struct AuthDecV1 {
    ciphers: CipherSet,
    pub(crate) seq: u32,
}

impl AuthDecV1 {
    pub(crate) fn new(settings: &Settings) -> Self {
        Self {
            ciphers: CipherSet::new(&settings.cipher_suites, &settings.key),
            seq: settings.sequence_number,
        }
    }

    /// Verify and decrypt a complete package in place. Returns the payload length.
    pub(crate) fn open(&mut self, pkg: &mut [u8]) -> Result<usize> {
        if pkg.len() <= HEADER_SIZE + TAG_SIZE {
            return Err(Error::InvalidPayloadSize);
        }
        let header = Header::new(pkg);
        if header.version() != Version::V1.as_byte() {
            return Err(Error::UnsupportedVersion);
        }
        let aead = self.ciphers.get(header.cipher())?;
        if package_len(header.payload_len()) != pkg.len() {
            return Err(Error::InvalidPayloadSize);
        }
        if header.sequence_number() != self.seq {
            return Err(Error::PackageOutOfOrder);
        }
        let nonce = header.nonce();

        let n = open_package(aead, &nonce, pkg)?;
        self.seq = self.seq.wrapping_add(1);
        Ok(n)
    }
}

// ── DARE 2.0 ──────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub(crate) struct AuthEncV2 {
    suite: CipherSuite,
    aead: Aead,
    rand: [u8; NONCE_SIZE],
    pub(crate) seq: u32,
    pub(crate) finalized: bool,
}

impl AuthEncV2 {
    pub(crate) fn new(settings: &Settings) -> Result<Self> {
        let suite = settings.preferred_suite();
        let mut rand = [0u8; NONCE_SIZE];
        settings.rand.fill(&mut rand)?;
        rand[0] &= !FINAL_FLAG;
        Ok(Self {
            suite,
            aead: Aead::new(suite, &settings.key),
            rand,
            seq: settings.sequence_number,
            finalized: false,
        })
    }

    pub(crate) fn seal(&mut self, pkg: &mut [u8], payload_len: usize) -> Result<usize> {
        self.seal_with(pkg, payload_len, false)
    }

    pub(crate) fn seal_final(&mut self, pkg: &mut [u8], payload_len: usize) -> Result<usize> {
        self.seal_with(pkg, payload_len, true)
    }

    fn seal_with(&mut self, pkg: &mut [u8], payload_len: usize, last: bool) -> Result<usize> {
        if self.finalized {
            return Err(Error::Finalized);
        }
        let header = &mut pkg[..HEADER_SIZE];
        write_common(header, Version::V2, self.suite, payload_len);
        header[4..16].copy_from_slice(&self.rand);
        if last {
            header[4] |= FINAL_FLAG;
        }
        let nonce = v2_nonce(&Header::new(header), self.seq);

        let n = seal_package(&self.aead, &nonce, pkg, payload_len)?;
        self.seq = self.seq.wrapping_add(1);
        self.finalized = last;
        Ok(n)
    }
}

#[derive(Clone)]
pub(crate) struct AuthDecV2 {
    ciphers: CipherSet,
    reference: Option<[u8; NONCE_SIZE]>,
    pub(crate) seq: u32,
    pub(crate) finalized: bool,
}

impl AuthDecV2 {
    pub(crate) fn new(settings: &Settings) -> Self {
        Self {
            ciphers: CipherSet::new(&settings.cipher_suites, &settings.key),
            reference: None,
            seq: settings.sequence_number,
            finalized: false,
        }
    }

    /// Verify and decrypt a complete package in place. Returns the payload length.
    pub(crate) fn open(&mut self, pkg: &mut [u8]) -> Result<usize> {
        if self.finalized {
            return Err(Error::UnexpectedData);
        }
        if pkg.len() <= HEADER_SIZE + TAG_SIZE {
            return Err(Error::InvalidPayloadSize);
        }
        let header = Header::new(pkg);
        if header.version() != Version::V2.as_byte() {
            return Err(Error::UnsupportedVersion);
        }
        let aead = self.ciphers.get(header.cipher())?;
        if package_len(header.payload_len()) != pkg.len() {
            return Err(Error::InvalidPayloadSize);
        }
        let last = header.is_final();
        if !last && header.payload_len() != MAX_PAYLOAD_SIZE {
            return Err(Error::InvalidPayloadSize);
        }
        let random = header.random_value();
        if self.reference.is_some_and(|r| r != random) {
            return Err(Error::NonceMismatch);
        }
        let nonce = v2_nonce(&header, self.seq);

        let n = open_package(aead, &nonce, pkg)?;
        self.reference = Some(random);
        self.seq = self.seq.wrapping_add(1);
        self.finalized = last;
        Ok(n)
    }
}
