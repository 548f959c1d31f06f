//! Signature scanning.
//!
//! Every ZIP record starts with `PK` and a two-byte type code. The scanner
//! walks a byte stream through a small state machine and reports each
//! signature it completes, together with its absolute offset. It works
//! forward over any [`Read`] (driving sequential record discovery) or
//! backward over a [`Read`] + [`Seek`] source (locating the end of central
//! directory record).

use std::io::{self, Read, Seek, SeekFrom};

use crate::format::RecordType;

const BUFFER_SIZE: usize = 64 * 1024;
const BACKWARD_WINDOW: u64 = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum MatchState {
    #[default]
    SeekP,
    SeekK,
    SeekTypeByte1,
    HaveTypeByte1(u8),
}

/// Byte-wise matcher for `PK` + type-code signatures.
///
/// Both type bytes must lie in `1..=8`, which covers every record type the
/// format defines and rejects most `PK` pairs occurring in ordinary data.
#[derive(Debug, Clone, Default)]
pub struct SignatureMatcher {
    state: MatchState,
}

impl SignatureMatcher {
    /// Creates a matcher in its initial state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns to the initial state.
    pub fn reset(&mut self) {
        self.state = MatchState::SeekP;
    }

    /// Consumes one byte, returning the type code when a signature completes.
    pub fn feed(&mut self, byte: u8) -> Option<u16> {
        let (next, found) = match self.state {
            MatchState::SeekP => (restart(byte), None),
            MatchState::SeekK if byte == b'K' => (MatchState::SeekTypeByte1, None),
            MatchState::SeekTypeByte1 if is_type_byte(byte) => {
                (MatchState::HaveTypeByte1(byte), None)
            }
            MatchState::HaveTypeByte1(first) if is_type_byte(byte) => {
                (MatchState::SeekP, Some(u16::from_le_bytes([first, byte])))
            }
            _ => (restart(byte), None),
        };
        self.state = next;
        found
    }
}

fn restart(byte: u8) -> MatchState {
    if byte == b'P' {
        MatchState::SeekK
    } else {
        MatchState::SeekP
    }
}

fn is_type_byte(byte: u8) -> bool {
    (1..=8).contains(&byte)
}

/// A signature found in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    /// Absolute offset of the `P` byte.
    pub offset: u64,
    /// Record type named by the code.
    pub record_type: RecordType,
}

/// Forward signature scanner over a sequential reader.
///
/// The scanner owns a read buffer and tracks the absolute position of the
/// next unconsumed byte. It also implements [`Read`], so a record body can
/// be parsed directly from it once its signature has been reported.
pub struct SignatureScanner<R> {
    inner: R,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    position: u64,
}

impl<R: Read> SignatureScanner<R> {
    /// Creates a scanner whose first byte is at offset 0.
    pub fn new(inner: R) -> Self {
        Self::with_offset(inner, 0)
    }

    /// Creates a scanner whose first byte is at `offset`.
    pub fn with_offset(inner: R, offset: u64) -> Self {
        Self {
            inner,
            buf: vec![0u8; BUFFER_SIZE],
            start: 0,
            end: 0,
            position: offset,
        }
    }

    /// Absolute offset of the next unconsumed byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Returns the underlying reader. Buffered bytes are lost.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Advances to the next signature and consumes its four bytes.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub fn next_signature(&mut self) -> io::Result<Option<Signature>> {
        let mut matcher = SignatureMatcher::new();
        loop {
            if self.start == self.end && self.fill()? == 0 {
                return Ok(None);
            }
            while self.start < self.end {
                let byte = self.buf[self.start];
                self.start += 1;
                self.position += 1;
                if let Some(code) = matcher.feed(byte) {
                    return Ok(Some(Signature {
                        offset: self.position - 4,
                        record_type: RecordType::from_code(code),
                    }));
                }
            }
        }
    }

    /// Returns up to `n` upcoming bytes without consuming them.
    ///
    /// Fewer than `n` bytes are returned only at end of stream.
    pub fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        if self.end - self.start < n {
            if self.buf.len() < n {
                self.buf.resize(n, 0);
            }
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
            while self.end < n {
                let read = self.inner.read(&mut self.buf[self.end..])?;
                if read == 0 {
                    break;
                }
                self.end += read;
            }
        }
        let available = (self.end - self.start).min(n);
        Ok(&self.buf[self.start..self.start + available])
    }

    fn fill(&mut self) -> io::Result<usize> {
        self.start = 0;
        self.end = self.inner.read(&mut self.buf)?;
        Ok(self.end)
    }
}

impl<R: Read> Read for SignatureScanner<R> {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        if self.start == self.end {
            if out.len() >= self.buf.len() {
                let n = self.inner.read(out)?;
                self.position += n as u64;
                return Ok(n);
            }
            self.fill()?;
        }
        let n = (self.end - self.start).min(out.len());
        out[..n].copy_from_slice(&self.buf[self.start..self.start + n]);
        self.start += n;
        self.position += n as u64;
        Ok(n)
    }
}

/// Searches backward from `end` for the last signature of `record_type`.
///
/// Only signatures starting at or after `end - limit` and ending at or
/// before `end` are considered. The source is read in reverse windows that
/// overlap by three bytes, so a signature spanning two windows is still
/// seen. Returns the offset of the highest match.
pub fn find_backward<R: Read + Seek>(
    reader: &mut R,
    end: u64,
    record_type: RecordType,
    limit: u64,
) -> io::Result<Option<u64>> {
    let lower = end.saturating_sub(limit);
    let target = record_type.code();
    let mut window_end = end;
    let mut buf = Vec::new();

    while window_end > lower {
        let window_start = window_end.saturating_sub(BACKWARD_WINDOW).max(lower);
        let read_end = (window_end + 3).min(end);
        buf.resize((read_end - window_start) as usize, 0);
        reader.seek(SeekFrom::Start(window_start))?;
        reader.read_exact(&mut buf)?;

        let mut matcher = SignatureMatcher::new();
        let mut found = None;
        for (i, &byte) in buf.iter().enumerate() {
            if matcher.feed(byte) == Some(target) {
                found = Some(window_start + i as u64 - 3);
            }
        }
        if found.is_some() {
            return Ok(found);
        }
        window_end = window_start;
    }

    Ok(None)
}
