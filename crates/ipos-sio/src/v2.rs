//! DARE 2.0 stream codecs
//!
//! Every package except the last carries exactly 64 KiB of plaintext and the
//! last one is sealed with the final flag. The encryptors therefore need one
//! byte of lookahead: a full buffer can only be sealed as non-final once it
//! is known that more plaintext follows.

use std::io::{self, Read, Write};

use tracing::trace;

use crate::config::Settings;
use crate::error::{Error, Result};
use crate::package::{AuthDecV2, AuthEncV2};
use crate::v1::drain;
use crate::{read_full, HEADER_SIZE, MAX_PACKAGE_SIZE, MAX_PAYLOAD_SIZE};

fn package_buffer() -> Box<[u8]> {
    vec![0u8; MAX_PACKAGE_SIZE].into_boxed_slice()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EncState {
    /// Nothing read from the source yet.
    Buffering,
    /// At least one more plaintext byte is pending.
    Streaming(u8),
    /// The final package has been produced.
    Finalized,
}

pub(crate) struct EncReaderV2<R> {
    src: R,
    enc: AuthEncV2,
    state: EncState,
    buf: Box<[u8]>,
    pos: usize,
    end: usize,
}

impl<R: Read> EncReaderV2<R> {
    pub(crate) fn new(src: R, settings: &Settings) -> Result<Self> {
        Ok(Self {
            src,
            enc: AuthEncV2::new(settings)?,
            state: EncState::Buffering,
            buf: package_buffer(),
            pos: 0,
            end: 0,
        })
    }

    fn next_package(&mut self) -> Result<bool> {
        loop {
            match self.state {
                EncState::Finalized => return Ok(false),
                EncState::Buffering => {
                    let mut first = [0u8; 1];
                    self.state = match read_full(&mut self.src, &mut first)? {
                        0 => EncState::Finalized,
                        _ => EncState::Streaming(first[0]),
                    };
                }
                EncState::Streaming(pending) => {
                    // Payload starts with the pending byte, followed by up to a
                    // full payload read into buf[17..]. If that read comes back
                    // full, its last byte is the next package's lookahead.
                    self.buf[HEADER_SIZE] = pending;
                    let start = HEADER_SIZE + 1;
                    let n = read_full(&mut self.src, &mut self.buf[start..start + MAX_PAYLOAD_SIZE])?;
                    self.end = if n == MAX_PAYLOAD_SIZE {
                        let lookahead = self.buf[HEADER_SIZE + MAX_PAYLOAD_SIZE];
                        self.state = EncState::Streaming(lookahead);
                        self.enc.seal(&mut self.buf, MAX_PAYLOAD_SIZE)?
                    } else {
                        self.state = EncState::Finalized;
                        trace!(seq = self.enc.seq, payload = n + 1, "sealing final DARE 2.0 package");
                        self.enc.seal_final(&mut self.buf, n + 1)?
                    };
                    self.pos = 0;
                    return Ok(true);
                }
            }
        }
    }
}

impl<R: Read> Read for EncReaderV2<R> {
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

pub(crate) struct DecReaderV2<R> {
    src: R,
    dec: AuthDecV2,
    buf: Box<[u8]>,
    pos: usize,
    end: usize,
    started: bool,
}

impl<R: Read> DecReaderV2<R> {
    pub(crate) fn new(src: R, settings: &Settings) -> Self {
        Self::from_parts(src, AuthDecV2::new(settings), package_buffer())
    }

    /// Build a decryptor around a prepared authenticator and a package buffer
    /// of `MAX_PACKAGE_SIZE` bytes.
    pub(crate) fn from_parts(src: R, dec: AuthDecV2, buf: Box<[u8]>) -> Self {
        debug_assert_eq!(buf.len(), MAX_PACKAGE_SIZE);
        Self { src, dec, buf, pos: 0, end: 0, started: false }
    }

    pub(crate) fn into_buffer(self) -> Box<[u8]> {
        self.buf
    }

    /// Whether at least one package has been read from `src`.
    pub(crate) fn started(&self) -> bool {
        self.started
    }

    fn next_package(&mut self) -> Result<bool> {
        let n = read_full(&mut self.src, &mut self.buf[..MAX_PACKAGE_SIZE])?;
        if n == 0 {
            if self.dec.finalized || !self.started {
                return Ok(false);
            }
            return Err(Error::UnexpectedEof);
        }
        self.started = true;
        let payload = self.dec.open(&mut self.buf[..n])?;
        self.pos = HEADER_SIZE;
        self.end = HEADER_SIZE + payload;
        trace!(seq = self.dec.seq, payload, last = self.dec.finalized, "opened DARE 2.0 package");
        Ok(true)
    }
}

impl<R: Read> Read for DecReaderV2<R> {
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

pub(crate) struct EncWriterV2<W> {
    dst: W,
    enc: AuthEncV2,
    buf: Box<[u8]>,
    len: usize,
}

impl<W: Write> EncWriterV2<W> {
    pub(crate) fn new(dst: W, settings: &Settings) -> Result<Self> {
        Ok(Self {
            dst,
            enc: AuthEncV2::new(settings)?,
            buf: package_buffer(),
            len: 0,
        })
    }

    /// Seal the buffered plaintext as the final package and return the
    /// destination. An empty stream produces no output.
    pub(crate) fn finish(mut self) -> Result<W> {
        if self.len > 0 {
            let n = self.enc.seal_final(&mut self.buf, self.len)?;
            self.dst.write_all(&self.buf[..n])?;
            self.len = 0;
        }
        self.dst.flush()?;
        Ok(self.dst)
    }
}

impl<W: Write> Write for EncWriterV2<W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        let mut rest = p;
        while !rest.is_empty() {
            if self.len == MAX_PAYLOAD_SIZE {
                let n = self.enc.seal(&mut self.buf, MAX_PAYLOAD_SIZE)?;
                self.dst.write_all(&self.buf[..n])?;
                self.len = 0;
            }
            let n = (MAX_PAYLOAD_SIZE - self.len).min(rest.len());
            let at = HEADER_SIZE + self.len;
            self.buf[at..at + n].copy_from_slice(&rest[..n]);
            self.len += n;
            rest = &rest[n..];
        }
        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dst.flush()
    }
}

pub(crate) struct DecWriterV2<W> {
    dst: W,
    dec: AuthDecV2,
    buf: Box<[u8]>,
    len: usize,
    opened: bool,
}

impl<W: Write> DecWriterV2<W> {
    pub(crate) fn new(dst: W, settings: &Settings) -> Self {
        Self {
            dst,
            dec: AuthDecV2::new(settings),
            buf: package_buffer(),
            len: 0,
            opened: false,
        }
    }

    fn open_package(&mut self) -> Result<()> {
        let n = self.dec.open(&mut self.buf[..self.len])?;
        self.dst.write_all(&self.buf[HEADER_SIZE..HEADER_SIZE + n])?;
        self.len = 0;
        self.opened = true;
        Ok(())
    }

    /// Open the trailing package and return the destination. Fails if the
    /// stream ended before its final package.
    pub(crate) fn finish(mut self) -> Result<W> {
        if self.len > 0 {
            self.open_package()?;
        }
        if self.opened && !self.dec.finalized {
            return Err(Error::UnexpectedEof);
        }
        self.dst.flush()?;
        Ok(self.dst)
    }
}

impl<W: Write> Write for DecWriterV2<W> {
    fn write(&mut self, p: &[u8]) -> io::Result<usize> {
        let mut rest = p;
        while !rest.is_empty() {
            if self.dec.finalized {
                return Err(Error::UnexpectedData.into());
            }
            let n = (MAX_PACKAGE_SIZE - self.len).min(rest.len());
            self.buf[self.len..self.len + n].copy_from_slice(&rest[..n]);
            self.len += n;
            rest = &rest[n..];
            if self.len == MAX_PACKAGE_SIZE {
                self.open_package()?;
            }
        }
        Ok(p.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.dst.flush()
    }
}
