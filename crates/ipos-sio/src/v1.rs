//! DARE 1.0 stream codecs
//!
//! Packages carry their sequence number in the header. The stream simply ends
//! after the last package, so a 1.0 decryptor cannot tell a truncated stream
//! from a complete one at a package boundary.

use std::io::{self, Read, Write};

use tracing::trace;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::package::{package_len, AuthDecV1, AuthEncV1, Header};
use crate::{read_full, HEADER_SIZE, MAX_PACKAGE_SIZE, TAG_SIZE};

fn package_buffer() -> Box<[u8]> {
    vec![0u8; MAX_PACKAGE_SIZE].into_boxed_slice()
}

/// Copy the pending range `buf[*pos..end]` into `p`.
pub(crate) fn drain(buf: &[u8], pos: &mut usize, end: usize, p: &mut [u8]) -> usize {
    let n = (end - *pos).min(p.len());
    p[..n].copy_from_slice(&buf[*pos..*pos + n]);
    *pos += n;
    n
}

pub(crate) struct EncReaderV1<R> {
    src: R,
    enc: AuthEncV1,
    payload_size: usize,
    buf: Box<[u8]>,
    pos: usize,
    end: usize,
    eof: bool,
}

impl<R: Read> EncReaderV1<R> {
    pub(crate) fn new(src: R, settings: &Settings) -> Result<Self> {
        Ok(Self {
            src,
            enc: AuthEncV1::new(settings)?,
            payload_size: settings.payload_size,
            buf: package_buffer(),
            pos: 0,
            end: 0,
            eof: false,
        })
    }

    fn next_package(&mut self) -> Result<bool> {
        if self.eof {
            return Ok(false);
        }
        let n = read_full(&mut self.src, &mut self.buf[HEADER_SIZE..HEADER_SIZE + self.payload_size])?;
        if n == 0 {
            self.eof = true;
            return Ok(false);
        }
        if n < self.payload_size {
            self.eof = true;
        }
        self.end = self.enc.seal(&mut self.buf, n)?;
        self.pos = 0;
        trace!(seq = self.enc.seq, payload = n, "sealed DARE 1.0 package");
        Ok(true)
    }
}

impl<R: Read> Read for EncReaderV1<R> {
    fn read(&mut self, p: &mut [u8]) -> io::Result<usize> {
        if p.is_empty() {
            return Ok(0);
        }
        if self.pos == self.end && !self.next_package()? {
            return Ok(0);
        }
        Ok(drain(&self.buf, &mut self.pos, self.end, p))
    }
}

pub(crate) struct DecReaderV1<R> {
    src: R,
    dec: AuthDecV1,
    buf: Box<[u8]>,
    pos: usize,
    end: usize,
}

impl<R: Read> DecReaderV1<R> {
    pub(crate) fn new(src: R, settings: &Settings) -> Self {
        Self::from_parts(src, AuthDecV1::new(settings), package_buffer())
    }

    /// Build a decryptor around a prepared authenticator and a package buffer
    /// of `MAX_PACKAGE_SIZE` bytes.
    pub(crate) fn from_parts(src: R, dec: AuthDecV1, buf: Box<[u8]>) -> Self {
        debug_assert_eq!(buf.len(), MAX_PACKAGE_SIZE);
        Self { src, dec, buf, pos: 0, end: 0 }
    }

    pub(crate) fn into_buffer(self) -> Box<[u8]> {
        self.buf
    }

    fn next_package(&mut self) -> Result<bool> {
        let n = read_full(&mut self.src, &mut self.buf[..HEADER_SIZE])?;
        if n == 0 {
            return Ok(false);
        }
        if n < HEADER_SIZE {
            return Err(Error::InvalidPayloadSize);
        }
        let len = package_len(Header::new(&self.buf).payload_len());
        let n = read_full(&mut self.src, &mut self.buf[HEADER_SIZE..len])?;
        if n < len - HEADER_SIZE {
            return Err(Error::InvalidPayloadSize);
        }
        let payload = self.dec.open(&mut self.buf[..len])?;
        self.pos = HEADER_SIZE;
        self.end = HEADER_SIZE + payload;
        trace!(seq = self.dec.seq, payload, "opened DARE 1.0 package");
        Ok(true)
    }
}

impl<R: Read> Read for DecReaderV1<R> {
    fn read(&mut self, p: &mut [u8]) -> io::Result<usize> {
        if p.is_empty() {
            return Ok(0);
        }
        if self.pos == self.end && !self.next_package()? {
            return Ok(0);
        }
        Ok(drain(&self.buf, &mut self.pos, self.end, p))
    }
}

pub(crate) struct EncWriterV1<W> {
    dst: W,
    enc: AuthEncV1,
    payload_size: usize,
    buf: Box<[u8]>,
    len: usize,
}

impl<W: Write> EncWriterV1<W> {
    pub(crate) fn new(dst: W, settings: &Settings) -> Result<Self> {
        Ok(Self {
            dst,
            enc: AuthEncV1::new(settings)?,
            payload_size: settings.payload_size,
            buf: package_buffer(),
            len: 0,
        })
    }

    fn flush_package(&mut self) -> Result<()> {
        let n = self.enc.seal(&mut self.buf, self.len)?;
        self.dst.write_all(&self.buf[..n])?;
        self.len = 0;
        Ok(())
    }

    /// Seal any buffered plaintext and return the destination.
    pub(crate) fn finish(mut self) -> Result<W> {
        if self.len > 0 {
            self.flush_package()?;
        }
        self.dst.flush()?;
        Ok(self.dst)
    }
}

impl<W: Write> Write for EncWriterV1<W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        let mut rest = p;
        while !rest.is_empty() {
            let n = (self.payload_size - self.len).min(rest.len());
            let at = HEADER_SIZE + self.len;
            self.buf[at..at + n].copy_from_slice(&rest[..n]);
            self.len += n;
            rest = &rest[n..];
            if self.len == self.payload_size {
                self.flush_package()?;
            }
        }
        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dst.flush()
    }
}

pub(crate) struct DecWriterV1<W> {
    dst: W,
    dec: AuthDecV1,
    buf: Box<[u8]>,
    len: usize,
}

impl<W: Write> DecWriterV1<W> {
    pub(crate) fn new(dst: W, settings: &Settings) -> Self {
        Self {
            dst,
            dec: AuthDecV1::new(settings),
            buf: package_buffer(),
            len: 0,
        }
    }

    /// Bytes still needed to complete the package being assembled.
    fn wanted(&self) -> usize {
        if self.len < HEADER_SIZE {
            HEADER_SIZE - self.len
        } else {
            package_len(Header::new(&self.buf).payload_len()) - self.len
        }
    }

    fn open_package(&mut self) -> Result<()> {
        let n = self.dec.open(&mut self.buf[..self.len])?;
        self.dst.write_all(&self.buf[HEADER_SIZE..HEADER_SIZE + n])?;
        self.len = 0;
        Ok(())
    }

    /// Verify that the stream ended on a package boundary and return the
    /// destination.
    pub(crate) fn finish(mut self) -> Result<W> {
        if self.len > 0 {
            return Err(Error::InvalidPayloadSize);
        }
        self.dst.flush()?;
        Ok(self.dst)
    }
}

impl<W: Write> Write for DecWriterV1<W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        let mut rest = p;
        while !rest.is_empty() {
            let n = self.wanted().min(rest.len());
            self.buf[self.len..self.len + n].copy_from_slice(&rest[..n]);
            self.len += n;
            rest = &rest[n..];
            if self.len > HEADER_SIZE + TAG_SIZE && self.wanted() == 0 {
                self.open_package()?;
            }
        }
        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dst.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, Version};
    use crate::{CipherSuite, KEY_SIZE, MAX_PAYLOAD_SIZE};

    fn settings(payload_size: usize) -> Settings {
        Config::new([0x42; KEY_SIZE])
            .with_version(Version::V1)
            .with_cipher_suites(&[CipherSuite::ChaCha20Poly1305])
            .with_payload_size(payload_size)
            .resolve()
            .unwrap()
    }

    fn encrypt(plaintext: &[u8], settings: &Settings) -> Vec<u8> {
        let mut out = Vec::new();
        EncReaderV1::new(plaintext, settings)
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_reader_roundtrip_small_packages() {
        let s = settings(100);
        let plaintext: Vec<u8> = (0..1000u32).map(|i| i as u8).collect();
        let ciphertext = encrypt(&plaintext, &s);
        assert_eq!(ciphertext.len(), 10 * (100 + 32));

        let mut out = Vec::new();
        DecReaderV1::new(ciphertext.as_slice(), &s)
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, plaintext);
    }

    #[test]
    fn test_empty_stream() {
        let s = settings(MAX_PAYLOAD_SIZE);
        assert!(encrypt(&[], &s).is_empty());

        let mut out = Vec::new();
        DecReaderV1::new(&[][..], &s).read_to_end(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_writer_matches_reader_layout() {
        let s = settings(MAX_PAYLOAD_SIZE);
        let plaintext = vec![9u8; MAX_PAYLOAD_SIZE + 10];

        let mut w = EncWriterV1::new(Vec::new(), &s).unwrap();
        for chunk in plaintext.chunks(777) {
            w.write_all(chunk).unwrap();
        }
        let ciphertext = w.finish().unwrap();
        assert_eq!(ciphertext.len(), MAX_PACKAGE_SIZE + 10 + 32);

        let mut d = DecWriterV1::new(Vec::new(), &s);
        for chunk in ciphertext.chunks(1000) {
            d.write_all(chunk).unwrap();
        }
        assert_eq!(d.finish().unwrap(), plaintext);
    }

    #[test]
    fn test_truncated_header() {
        let s = settings(MAX_PAYLOAD_SIZE);
        let ciphertext = encrypt(b"hello", &s);
        let mut out = Vec::new();
        let err = DecReaderV1::new(&ciphertext[..10], &s)
            .read_to_end(&mut out)
            .unwrap_err();
        assert!(matches!(Error::from_io(err), Error::InvalidPayloadSize));
    }

    #[test]
    fn test_truncated_payload() {
        let s = settings(MAX_PAYLOAD_SIZE);
        let ciphertext = encrypt(b"hello world", &s);
        let mut out = Vec::new();
        let err = DecReaderV1::new(&ciphertext[..ciphertext.len() - 1], &s)
            .read_to_end(&mut out)
            .unwrap_err();
        assert!(matches!(Error::from_io(err), Error::InvalidPayloadSize));
    }

    #[test]
    fn test_writer_partial_package_at_finish() {
        let s = settings(MAX_PAYLOAD_SIZE);
        let ciphertext = encrypt(b"hello world", &s);
        let mut d = DecWriterV1::new(Vec::new(), &s);
        d.write_all(&ciphertext[..20]).unwrap();
        assert!(matches!(d.finish(), Err(Error::InvalidPayloadSize)));
    }

    #[test]
    fn test_swapped_packages_rejected() {
        let s = settings(16);
        let ciphertext = encrypt(&[1u8; 64], &s);
        let mut swapped = ciphertext.clone();
        let pkg = 16 + 32;
        swapped[..pkg].copy_from_slice(&ciphertext[pkg..2 * pkg]);
        swapped[pkg..2 * pkg].copy_from_slice(&ciphertext[..pkg]);

        let mut out = Vec::new();
        let err = DecReaderV1::new(swapped.as_slice(), &s)
            .read_to_end(&mut out)
            .unwrap_err();
        assert!(matches!(Error::from_io(err), Error::PackageOutOfOrder));
    }
}
