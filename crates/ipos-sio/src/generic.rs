//! Version-selecting stream wrappers
//!
//! Encryptors write DARE 2.0 unless the config caps the version at 1.0.
//! Decryptors bind to a single codec when the config pins one version, and
//! otherwise sniff the version from the first byte of the stream.

use std::io::{self, Read, Write};
use std::mem;

use tracing::debug;

use crate::config::{Config, Settings, Version};
use crate::error::{Error, Result};
use crate::v1::{DecReaderV1, DecWriterV1, EncReaderV1, EncWriterV1};
use crate::v2::{DecReaderV2, DecWriterV2, EncReaderV2, EncWriterV2};

fn accepts(settings: &Settings, version: Version) -> bool {
    settings.min_version <= version && version <= settings.max_version
}

fn sniff(settings: &Settings, first: u8) -> Result<Version> {
    match Version::from_byte(first) {
        Some(v) if accepts(settings, v) => {
            debug!(version = ?v, "detected DARE version");
            Ok(v)
        }
        _ => Err(Error::UnsupportedVersion),
    }
}

/// A reader that hands out one already-consumed byte before reading from
/// the inner source.
pub(crate) struct Prefixed<R> {
    prefix: Option<u8>,
    inner: R,
}

impl<R> Prefixed<R> {
    pub(crate) fn new(prefix: Option<u8>, inner: R) -> Self {
        Self { prefix, inner }
    }
}

impl<R: Read> Read for Prefixed<R> {
    fn read(&mut self, p: &mut [u8]) -> io::Result<usize> {
        if p.is_empty() {
            return Ok(0);
        }
        match self.prefix.take() {
            Some(b) => {
                p[0] = b;
                Ok(1)
            }
            None => self.inner.read(p),
        }
    }
}

// ── Encryption ────────────────────────────────────────────────────────────────

enum EncReader<R> {
    V1(EncReaderV1<R>),
    V2(EncReaderV2<R>),
}

/// Reads plaintext from `R` and yields a DARE stream.
pub struct EncryptReader<R: Read>(EncReader<R>);

impl<R: Read> EncryptReader<R> {
    pub fn new(src: R, config: Config) -> Result<Self> {
        let settings = config.resolve()?;
        let inner = match settings.max_version {
            Version::V2 => EncReader::V2(EncReaderV2::new(src, &settings)?),
            Version::V1 => EncReader::V1(EncReaderV1::new(src, &settings)?),
        };
        Ok(Self(inner))
    }
}

impl<R: Read> Read for EncryptReader<R> {
    fn read(&mut self, p: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            EncReader::V1(r) => r.read(p),
            EncReader::V2(r) => r.read(p),
        }
    }
}

enum EncWriter<W> {
    V1(EncWriterV1<W>),
    V2(EncWriterV2<W>),
}

/// Encrypts everything written to it into `W`. [`EncryptWriter::finish`]
/// must be called to seal the last package.
pub struct EncryptWriter<W: Write>(EncWriter<W>);

impl<W: Write> EncryptWriter<W> {
    pub fn new(dst: W, config: Config) -> Result<Self> {
        let settings = config.resolve()?;
        let inner = match settings.max_version {
            Version::V2 => EncWriter::V2(EncWriterV2::new(dst, &settings)?),
            Version::V1 => EncWriter::V1(EncWriterV1::new(dst, &settings)?),
        };
        Ok(Self(inner))
    }

    /// Seal the remaining plaintext and return the destination.
    pub fn finish(self) -> Result<W> {
        match self.0 {
            EncWriter::V1(w) => w.finish(),
            EncWriter::V2(w) => w.finish(),
        }
    }
}

impl<W: Write> Write for EncryptWriter<W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        match &mut self.0 {
            EncWriter::V1(w) => w.write(p),
            EncWriter::V2(w) => w.write(p),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.0 {
            EncWriter::V1(w) => w.flush(),
            EncWriter::V2(w) => w.flush(),
        }
    }
}

// ── Decryption ────────────────────────────────────────────────────────────────

enum DecReader<R> {
    Sniff { src: R, settings: Settings },
    V1(DecReaderV1<Prefixed<R>>),
    V2(DecReaderV2<Prefixed<R>>),
    Empty,
    Rejected,
}

/// Reads a DARE stream from `R` and yields the authenticated plaintext.
pub struct DecryptReader<R: Read>(DecReader<R>);

impl<R: Read> DecryptReader<R> {
    pub fn new(src: R, config: Config) -> Result<Self> {
        let settings = config.resolve()?;
        let inner = match settings.pinned_version() {
            Some(Version::V1) => DecReader::V1(DecReaderV1::new(Prefixed::new(None, src), &settings)),
            Some(Version::V2) => DecReader::V2(DecReaderV2::new(Prefixed::new(None, src), &settings)),
            None => DecReader::Sniff { src, settings },
        };
        Ok(Self(inner))
    }

    fn detect(&mut self) -> io::Result<()> {
        if !matches!(self.0, DecReader::Sniff { .. }) {
            return Ok(());
        }
        let DecReader::Sniff { mut src, settings } = mem::replace(&mut self.0, DecReader::Rejected) else {
            return Ok(());
        };
        let mut first = [0u8; 1];
        let n = match crate::read_full(&mut src, &mut first) {
            Ok(n) => n,
            Err(e) => {
                self.0 = DecReader::Sniff { src, settings };
                return Err(e);
            }
        };
        if n == 0 {
            self.0 = DecReader::Empty;
            return Ok(());
        }
        let src = Prefixed::new(Some(first[0]), src);
        self.0 = match sniff(&settings, first[0])? {
            Version::V1 => DecReader::V1(DecReaderV1::new(src, &settings)),
            Version::V2 => DecReader::V2(DecReaderV2::new(src, &settings)),
        };
        Ok(())
    }
}

impl<R: Read> Read for DecryptReader<R> {
    fn read(&mut self, p: &mut [u8]) -> io::Result<usize> {
        if p.is_empty() {
            return Ok(0);
        }
        self.detect()?;
        match &mut self.0 {
            DecReader::V1(r) => r.read(p),
            DecReader::V2(r) => r.read(p),
            DecReader::Empty => Ok(0),
            DecReader::Sniff { .. } | DecReader::Rejected => Err(Error::UnsupportedVersion.into()),
        }
    }
}

enum DecWriter<W> {
    Sniff { dst: W, settings: Settings },
    V1(DecWriterV1<W>),
    V2(DecWriterV2<W>),
    Rejected,
}

/// Decrypts a DARE stream written to it into `W`. [`DecryptWriter::finish`]
/// must be called to verify the end of the stream.
pub struct DecryptWriter<W: Write>(DecWriter<W>);

impl<W: Write> DecryptWriter<W> {
    pub fn new(dst: W, config: Config) -> Result<Self> {
        let settings = config.resolve()?;
        let inner = match settings.pinned_version() {
            Some(Version::V1) => DecWriter::V1(DecWriterV1::new(dst, &settings)),
            Some(Version::V2) => DecWriter::V2(DecWriterV2::new(dst, &settings)),
            None => DecWriter::Sniff { dst, settings },
        };
        Ok(Self(inner))
    }

    /// Verify the stream is complete and return the destination.
    pub fn finish(self) -> Result<W> {
        match self.0 {
            DecWriter::Sniff { mut dst, .. } => {
                dst.flush()?;
                Ok(dst)
            }
            DecWriter::V1(w) => w.finish(),
            DecWriter::V2(w) => w.finish(),
            DecWriter::Rejected => Err(Error::UnsupportedVersion),
        }
    }
}

impl<W: Write> Write for DecryptWriter<W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        if p.is_empty() {
            return Ok(0);
        }
        if matches!(self.0, DecWriter::Sniff { .. }) {
            if let DecWriter::Sniff { dst, settings } = mem::replace(&mut self.0, DecWriter::Rejected) {
                self.0 = match sniff(&settings, p[0])? {
                    Version::V1 => DecWriter::V1(DecWriterV1::new(dst, &settings)),
                    Version::V2 => DecWriter::V2(DecWriterV2::new(dst, &settings)),
                };
            }
        }
        match &mut self.0 {
            DecWriter::V1(w) => w.write(p),
            DecWriter::V2(w) => w.write(p),
            DecWriter::Sniff { .. } | DecWriter::Rejected => Err(Error::UnsupportedVersion.into()),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.0 {
            DecWriter::Sniff { dst, .. } => dst.flush(),
            DecWriter::V1(w) => w.flush(),
            DecWriter::V2(w) => w.flush(),
            DecWriter::Rejected => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    const KEY: [u8; KEY_SIZE] = [0x5a; KEY_SIZE];

    fn encrypt(plaintext: &[u8], version: Version) -> Vec<u8> {
        let mut out = Vec::new();
        EncryptReader::new(plaintext, Config::new(KEY).with_max_version(version))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_default_encrypts_v2() {
        assert_eq!(encrypt(b"abc", Version::V2)[0], 0x20);
        assert_eq!(encrypt(b"abc", Version::V1)[0], 0x10);
    }

    #[test]
    fn test_sniffing_reader_accepts_both_versions() {
        let plaintext = vec![0x33u8; 70_000];
        for version in [Version::V1, Version::V2] {
            let ciphertext = encrypt(&plaintext, version);
            let mut out = Vec::new();
            DecryptReader::new(ciphertext.as_slice(), Config::new(KEY))
                .unwrap()
                .read_to_end(&mut out)
                .unwrap();
            assert_eq!(out, plaintext);
        }
    }

    #[test]
    fn test_sniffing_writer_accepts_both_versions() {
        let plaintext = vec![0x44u8; 70_000];
        for version in [Version::V1, Version::V2] {
            let ciphertext = encrypt(&plaintext, version);
            let mut w = DecryptWriter::new(Vec::new(), Config::new(KEY)).unwrap();
            for chunk in ciphertext.chunks(4096) {
                w.write_all(chunk).unwrap();
            }
            assert_eq!(w.finish().unwrap(), plaintext);
        }
    }

    #[test]
    fn test_min_version_rejects_v1_stream() {
        let ciphertext = encrypt(b"legacy", Version::V1);
        let config = Config::new(KEY).with_min_version(Version::V2);

        let mut out = Vec::new();
        let err = DecryptReader::new(ciphertext.as_slice(), config.clone())
            .unwrap()
            .read_to_end(&mut out)
            .unwrap_err();
        assert!(matches!(Error::from_io(err), Error::UnsupportedVersion));

        let mut w = DecryptWriter::new(Vec::new(), config).unwrap();
        let err = w.write_all(&ciphertext).unwrap_err();
        assert!(matches!(Error::from_io(err), Error::UnsupportedVersion));
    }

    #[test]
    fn test_unknown_version_byte() {
        let mut out = Vec::new();
        let err = DecryptReader::new(&[0x30u8; 64][..], Config::new(KEY))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap_err();
        assert!(matches!(Error::from_io(err), Error::UnsupportedVersion));
    }

    #[test]
    fn test_empty_streams() {
        let mut out = Vec::new();
        let n = DecryptReader::new(&[][..], Config::new(KEY))
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(n, 0);

        let w = DecryptWriter::new(Vec::new(), Config::new(KEY)).unwrap();
        assert!(w.finish().unwrap().is_empty());

        let w = EncryptWriter::new(Vec::new(), Config::new(KEY)).unwrap();
        assert!(w.finish().unwrap().is_empty());
    }

    #[test]
    fn test_prefixed_reinserts_byte() {
        let mut r = Prefixed::new(Some(b'x'), &b"yz"[..]);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"xyz");
    }
}
