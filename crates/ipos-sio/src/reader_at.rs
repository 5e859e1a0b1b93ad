//! Random-access decryption
//!
//! Plaintext offset `o` lives in package `o / 64 KiB`, which starts at
//! ciphertext offset `(o / 64 KiB) * 65568`. [`DecryptReaderAt`] seeks to
//! that package, decrypts forward with the sequence number the package was
//! sealed with, and discards the leading bytes. Only streams written with
//! full 64 KiB packages can be addressed this way, which holds for every
//! DARE 2.0 stream and for DARE 1.0 streams with the default payload size.
//!
//! A DARE 2.0 stream cut at a package boundary looks like a shorter valid
//! stream to a reader that starts past the cut. Reads that land on an empty
//! package therefore locate the last package and require its final flag
//! before reporting the end of the stream.

use std::fs::File;
use std::io::{self, Read};
use std::sync::{Arc, OnceLock};

use tracing::debug;

use crate::config::{Config, Settings, Version};
use crate::error::{Error, Result};
use crate::package::{AuthDecV1, AuthDecV2};
use crate::pool::BufferPool;
use crate::v1::DecReaderV1;
use crate::v2::DecReaderV2;
use crate::{read_full, MAX_PACKAGE_SIZE, MAX_PAYLOAD_SIZE};

/// Positional reads that do not move a shared cursor, so a single source
/// can serve concurrent readers.
pub trait ReadAt {
    /// Read up to `buf.len()` bytes starting at `offset`. Returns 0 at or
    /// past the end of the source.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;

    fn read_exact_at(&self, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(buf, offset) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        if start >= self.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

#[cfg(any(unix, windows))]
impl ReadAt for File {
    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// Sequential view of a [`ReadAt`] source starting at a fixed offset.
struct SectionReader<'a, S: ?Sized> {
    src: &'a S,
    offset: u64,
}

impl<S: ReadAt + ?Sized> Read for SectionReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.src.read_at(buf, self.offset)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Authenticator template for the detected stream version.
#[derive(Clone)]
enum Codec {
    V1(AuthDecV1),
    V2(AuthDecV2),
}

/// Decrypts arbitrary plaintext ranges of a DARE stream stored in a
/// [`ReadAt`] source. Safe to share between threads; each call works on its
/// own pooled package buffer.
pub struct DecryptReaderAt<S> {
    src: S,
    settings: Settings,
    codec: OnceLock<Codec>,
    /// Set once the last DARE 2.0 package has been seen to be final.
    end_verified: OnceLock<()>,
    pool: Arc<BufferPool>,
}

impl<S: ReadAt> DecryptReaderAt<S> {
    pub fn new(src: S, config: Config) -> Result<Self> {
        Self::with_pool(src, config, Arc::new(BufferPool::default()))
    }

    /// Like [`DecryptReaderAt::new`] but draws package buffers from a shared pool.
    pub fn with_pool(src: S, config: Config, pool: Arc<BufferPool>) -> Result<Self> {
        let settings = config.resolve()?;
        let codec = OnceLock::new();
        if let Some(version) = settings.pinned_version() {
            let _ = codec.set(Self::template(&settings, version));
        }
        Ok(Self { src, settings, codec, end_verified: OnceLock::new(), pool })
    }

    pub fn get_ref(&self) -> &S {
        &self.src
    }

    pub fn into_inner(self) -> S {
        self.src
    }

    fn template(settings: &Settings, version: Version) -> Codec {
        match version {
            Version::V1 => Codec::V1(AuthDecV1::new(settings)),
            Version::V2 => Codec::V2(AuthDecV2::new(settings)),
        }
    }

    /// Detect the stream version from its first byte. Returns `None` for an
    /// empty source.
    fn codec(&self) -> io::Result<Option<&Codec>> {
        if let Some(codec) = self.codec.get() {
            return Ok(Some(codec));
        }
        let mut first = [0u8; 1];
        if read_full(&mut SectionReader { src: &self.src, offset: 0 }, &mut first)? == 0 {
            return Ok(None);
        }
        let version = match Version::from_byte(first[0]) {
            Some(v) if self.settings.min_version <= v && v <= self.settings.max_version => v,
            _ => return Err(Error::UnsupportedVersion.into()),
        };
        debug!(?version, "detected DARE version for random access");
        Ok(Some(self.codec.get_or_init(|| Self::template(&self.settings, version))))
    }

    /// Decrypt plaintext starting at `offset` into `buf`. Returns fewer than
    /// `buf.len()` bytes only when the end of the stream is reached, and 0 if
    /// `offset` is at or past the end.
    ///
    /// Package `t` is opened with sequence number `base + t`, wrapping at
    /// `u32::MAX` like the sequential decoder, where `base` is the configured
    /// sequence number (0 unless set with `Config::with_sequence_number`).
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let Some(codec) = self.codec()? else {
            return Ok(0);
        };

        let package = offset / MAX_PAYLOAD_SIZE as u64;
        if package + 1 > u32::MAX as u64 {
            return Err(Error::UnexpectedSize.into());
        }
        let seq = self.settings.sequence_number.wrapping_add(package as u32);
        let skip = offset % MAX_PAYLOAD_SIZE as u64;
        let section = SectionReader {
            src: &self.src,
            offset: package * MAX_PACKAGE_SIZE as u64,
        };

        match codec.clone() {
            Codec::V1(mut dec) => {
                dec.seq = seq;
                let mut reader = DecReaderV1::from_parts(section, dec, self.pool.take());
                let result = fill(&mut reader, skip, buf);
                self.pool.put(reader.into_buffer());
                result
            }
            Codec::V2(mut dec) => {
                let template = dec.clone();
                dec.seq = seq;
                let mut reader = DecReaderV2::from_parts(section, dec, self.pool.take());
                let result = fill(&mut reader, skip, buf);
                let started = reader.started();
                self.pool.put(reader.into_buffer());
                match result {
                    Ok(0) if !started && package > 0 => {
                        self.verify_final(template, package)?;
                        Ok(0)
                    }
                    result => result,
                }
            }
        }
    }

    /// Check that the DARE 2.0 stream ends with a final package. `absent` is
    /// a package index known to hold no ciphertext.
    fn verify_final(&self, mut dec: AuthDecV2, absent: u64) -> io::Result<()> {
        if self.end_verified.get().is_some() {
            return Ok(());
        }

        // The ciphertext length lies in (lo, hi]: byte `lo` exists, byte `hi` does not.
        let mut lo = 0u64;
        let mut hi = absent * MAX_PACKAGE_SIZE as u64;
        let mut byte = [0u8; 1];
        while hi - lo > 1 {
            let mid = lo + (hi - lo) / 2;
            if self.src.read_at(&mut byte, mid)? == 0 {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        let last = (hi - 1) / MAX_PACKAGE_SIZE as u64;
        debug!(ciphertext_len = hi, last, "verifying final DARE 2.0 package");

        dec.seq = self.settings.sequence_number.wrapping_add(last as u32);
        let section = SectionReader {
            src: &self.src,
            offset: last * MAX_PACKAGE_SIZE as u64,
        };
        let mut reader = DecReaderV2::from_parts(section, dec, self.pool.take());
        let result = io::copy(&mut reader, &mut io::sink());
        self.pool.put(reader.into_buffer());
        result?;

        let _ = self.end_verified.set(());
        Ok(())
    }
}

impl<S: ReadAt> ReadAt for DecryptReaderAt<S> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        DecryptReaderAt::read_at(self, buf, offset)
    }
}

fn fill<R: Read>(reader: &mut R, skip: u64, buf: &mut [u8]) -> io::Result<usize> {
    let skipped = io::copy(&mut reader.by_ref().take(skip), &mut io::sink())?;
    if skipped < skip {
        return Ok(0);
    }
    read_full(reader, buf)
}
