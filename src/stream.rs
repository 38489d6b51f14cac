//! Ranged byte-stream reader and writer.
//!
//! A forward-only cursor with a stack of byte-range scopes. Every read is checked
//! against the innermost scope (or the source length, when known) before any byte is
//! consumed, so a failing numeric read leaves the cursor where it was.

use crate::ast::Encoding;
use crate::error::{DecodeError, EncodeError};
use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::io::{self, BufRead, Cursor, Read, Write};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

pub struct RangedReader<R> {
    inner: R,
    pos: u64,
    source_len: Option<u64>,
    /// Absolute end offsets, innermost last.
    ranges: Vec<u64>,
    endianness: Endianness,
}

impl<'a> RangedReader<Cursor<&'a [u8]>> {
    pub fn from_slice(bytes: &'a [u8]) -> Self {
        RangedReader::with_len(Cursor::new(bytes), bytes.len() as u64)
    }
}

impl<R: BufRead> RangedReader<R> {
    /// Reader over a source of unknown length. Reads fail with `EndOfStream` when the
    /// source runs dry; outside any scope such a failure may have consumed a prefix.
    pub fn new(inner: R) -> Self {
        RangedReader {
            inner,
            pos: 0,
            source_len: None,
            ranges: Vec::new(),
            endianness: Endianness::Big,
        }
    }

    pub fn with_len(inner: R, len: u64) -> Self {
        RangedReader {
            source_len: Some(len),
            ..RangedReader::new(inner)
        }
    }

    pub fn with_endianness(mut self, endianness: Endianness) -> Self {
        self.endianness = endianness;
        self
    }

    pub fn set_endianness(&mut self, endianness: Endianness) {
        self.endianness = endianness;
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Bytes consumed since the reader was created.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Number of open range scopes.
    pub fn depth(&self) -> usize {
        self.ranges.len()
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn limit(&self) -> Option<u64> {
        self.ranges.last().copied().or(self.source_len)
    }

    /// Bytes left in the innermost scope, or in the source when no scope is open.
    /// `None` when neither bound is known.
    pub fn available(&self) -> Option<u64> {
        self.limit().map(|end| end.saturating_sub(self.pos))
    }

    pub fn is_exhausted(&mut self) -> Result<bool, DecodeError> {
        match self.available() {
            Some(n) => Ok(n == 0),
            None => Ok(self.inner.fill_buf()?.is_empty()),
        }
    }

    fn ensure(&self, needed: u64) -> Result<(), DecodeError> {
        match self.available() {
            Some(available) if needed > available => {
                Err(DecodeError::EndOfStream { needed, available })
            }
            _ => Ok(()),
        }
    }

    fn fill(&mut self, buf: &mut [u8]) -> Result<(), DecodeError> {
        self.ensure(buf.len() as u64)?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => {
                    return Err(DecodeError::EndOfStream {
                        needed: buf.len() as u64,
                        available: filled as u64,
                    })
                }
                Ok(n) => {
                    filled += n;
                    self.pos += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        let mut b = [0u8; 1];
        self.fill(&mut b)?;
        Ok(b[0])
    }

    pub fn read_i8(&mut self) -> Result<i8, DecodeError> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        let mut b = [0u8; 2];
        self.fill(&mut b)?;
        Ok(match self.endianness {
            Endianness::Big => BigEndian::read_u16(&b),
            Endianness::Little => LittleEndian::read_u16(&b),
        })
    }

    pub fn read_i16(&mut self) -> Result<i16, DecodeError> {
        Ok(self.read_u16()? as i16)
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let mut b = [0u8; 4];
        self.fill(&mut b)?;
        Ok(match self.endianness {
            Endianness::Big => BigEndian::read_u32(&b),
            Endianness::Little => LittleEndian::read_u32(&b),
        })
    }

    pub fn read_i32(&mut self) -> Result<i32, DecodeError> {
        Ok(self.read_u32()? as i32)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let mut b = [0u8; 8];
        self.fill(&mut b)?;
        Ok(match self.endianness {
            Endianness::Big => BigEndian::read_u64(&b),
            Endianness::Little => LittleEndian::read_u64(&b),
        })
    }

    pub fn read_i64(&mut self) -> Result<i64, DecodeError> {
        Ok(self.read_u64()? as i64)
    }

    pub fn read_f32(&mut self) -> Result<f32, DecodeError> {
        Ok(f32::from_bits(self.read_u32()?))
    }

    pub fn read_f64(&mut self) -> Result<f64, DecodeError> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    /// Unsigned integer of `width` bytes (0..=8), zero-extended.
    pub fn read_uint(&mut self, width: usize) -> Result<u64, DecodeError> {
        if width == 0 {
            return Ok(0);
        }
        if width > 8 {
            return Err(DecodeError::InvalidDescriptor(format!(
                "integer width {} exceeds 8 bytes",
                width
            )));
        }
        let mut b = [0u8; 8];
        self.fill(&mut b[..width])?;
        Ok(match self.endianness {
            Endianness::Big => BigEndian::read_uint(&b[..width], width),
            Endianness::Little => LittleEndian::read_uint(&b[..width], width),
        })
    }

    pub fn read_bytes(&mut self, n: u64) -> Result<Vec<u8>, DecodeError> {
        self.ensure(n)?;
        let mut out = Vec::with_capacity(n.min(64 * 1024) as usize);
        let got = (&mut self.inner).take(n).read_to_end(&mut out)? as u64;
        self.pos += got;
        if got < n {
            return Err(DecodeError::EndOfStream { needed: n, available: got });
        }
        Ok(out)
    }

    /// Everything left in the innermost scope (or the source).
    pub fn read_remaining(&mut self) -> Result<Vec<u8>, DecodeError> {
        match self.available() {
            Some(n) => self.read_bytes(n),
            None => {
                let mut out = Vec::new();
                let got = self.inner.read_to_end(&mut out)?;
                self.pos += got as u64;
                Ok(out)
            }
        }
    }

    pub fn read_string(&mut self, n: u64, encoding: Encoding) -> Result<String, DecodeError> {
        let bytes = self.read_bytes(n)?;
        Ok(encoding.decode(&bytes))
    }

    /// `u32` length `L` followed by `max(L, 4)` bytes of text.
    pub fn read_minimum_string(&mut self, encoding: Encoding) -> Result<String, DecodeError> {
        let len = self.read_u32()? as u64;
        self.read_string(len.max(4), encoding)
    }

    pub fn skip(&mut self, n: u64) -> Result<(), DecodeError> {
        self.ensure(n)?;
        let got = io::copy(&mut (&mut self.inner).take(n), &mut io::sink())?;
        self.pos += got;
        if got < n {
            return Err(DecodeError::EndOfStream { needed: n, available: got });
        }
        Ok(())
    }

    pub fn skip_remaining(&mut self) -> Result<(), DecodeError> {
        match self.available() {
            Some(n) => self.skip(n),
            None => {
                let got = io::copy(&mut self.inner, &mut io::sink())?;
                self.pos += got;
                Ok(())
            }
        }
    }

    /// Restricts subsequent reads to the next `len` bytes. Exceeding an enclosing
    /// scope is a `RangeUnderflow`; exceeding the source itself is an `EndOfStream`.
    pub fn push_range(&mut self, len: u64) -> Result<(), DecodeError> {
        if let Some(available) = self.available() {
            if len > available {
                return Err(if self.ranges.is_empty() {
                    DecodeError::EndOfStream { needed: len, available }
                } else {
                    DecodeError::RangeUnderflow { requested: len, available }
                });
            }
        }
        let end = self.pos.saturating_add(len);
        log::trace!("push range {}..{} (depth {})", self.pos, end, self.ranges.len() + 1);
        self.ranges.push(end);
        Ok(())
    }

    /// Closes the innermost scope, skipping whatever the nested read left unread.
    pub fn pop_range(&mut self) -> Result<(), DecodeError> {
        let end = self.ranges.last().copied().ok_or(DecodeError::StackUnderflow)?;
        let rest = end.saturating_sub(self.pos);
        if rest > 0 {
            log::trace!("pop range at {}: skipping {} unread byte(s)", self.pos, rest);
            self.skip(rest)?;
        }
        self.ranges.pop();
        Ok(())
    }

    /// Drops scopes opened above `depth` without seeking. Used when a decode aborts.
    pub(crate) fn truncate_ranges(&mut self, depth: usize) {
        self.ranges.truncate(depth);
    }
}

/// Mirror of [`RangedReader`] for the encoder: scoped regions are padded with zeros
/// up to their declared length when popped.
pub struct RangedWriter<W> {
    inner: W,
    pos: u64,
    /// (start, end) of each open scope, innermost last.
    ranges: Vec<(u64, u64)>,
    endianness: Endianness,
}

impl<W: Write> RangedWriter<W> {
    pub fn new(inner: W, endianness: Endianness) -> Self {
        RangedWriter { inner, pos: 0, ranges: Vec::new(), endianness }
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), EncodeError> {
        if let Some(&(start, end)) = self.ranges.last() {
            let written = self.pos + bytes.len() as u64;
            if written > end {
                return Err(EncodeError::ScopeOverflow {
                    declared: end - start,
                    written: written - start,
                });
            }
        }
        self.inner.write_all(bytes)?;
        self.pos += bytes.len() as u64;
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> Result<(), EncodeError> {
        self.write_bytes(&[v])
    }

    pub fn write_u16(&mut self, v: u16) -> Result<(), EncodeError> {
        let mut b = [0u8; 2];
        match self.endianness {
            Endianness::Big => BigEndian::write_u16(&mut b, v),
            Endianness::Little => LittleEndian::write_u16(&mut b, v),
        }
        self.write_bytes(&b)
    }

    pub fn write_u32(&mut self, v: u32) -> Result<(), EncodeError> {
        let mut b = [0u8; 4];
        match self.endianness {
            Endianness::Big => BigEndian::write_u32(&mut b, v),
            Endianness::Little => LittleEndian::write_u32(&mut b, v),
        }
        self.write_bytes(&b)
    }

    pub fn write_u64(&mut self, v: u64) -> Result<(), EncodeError> {
        let mut b = [0u8; 8];
        match self.endianness {
            Endianness::Big => BigEndian::write_u64(&mut b, v),
            Endianness::Little => LittleEndian::write_u64(&mut b, v),
        }
        self.write_bytes(&b)
    }

    pub fn write_f32(&mut self, v: f32) -> Result<(), EncodeError> {
        self.write_u32(v.to_bits())
    }

    pub fn write_f64(&mut self, v: f64) -> Result<(), EncodeError> {
        self.write_u64(v.to_bits())
    }

    /// Low `width` bytes of `v` (0..=8).
    pub fn write_uint(&mut self, v: u64, width: usize) -> Result<(), EncodeError> {
        if width == 0 {
            return Ok(());
        }
        let width = width.min(8);
        let mut b = [0u8; 8];
        let v = if width < 8 { v & ((1u64 << (width * 8)) - 1) } else { v };
        match self.endianness {
            Endianness::Big => BigEndian::write_uint(&mut b[..width], v, width),
            Endianness::Little => LittleEndian::write_uint(&mut b[..width], v, width),
        }
        self.write_bytes(&b[..width])
    }

    pub fn write_zeros(&mut self, n: u64) -> Result<(), EncodeError> {
        let chunk = [0u8; 256];
        let mut left = n;
        while left > 0 {
            let step = left.min(chunk.len() as u64) as usize;
            self.write_bytes(&chunk[..step])?;
            left -= step as u64;
        }
        Ok(())
    }

    pub fn push_range(&mut self, len: u64) -> Result<(), EncodeError> {
        let end = self.pos + len;
        if let Some(&(start, outer)) = self.ranges.last() {
            if end > outer {
                return Err(EncodeError::ScopeOverflow {
                    declared: outer - start,
                    written: end - start,
                });
            }
        }
        self.ranges.push((self.pos, end));
        Ok(())
    }

    /// Closes the innermost scope, zero-padding it to its declared length.
    pub fn pop_range(&mut self) -> Result<(), EncodeError> {
        let end = match self.ranges.last() {
            Some(&(_, end)) => end,
            None => return Ok(()),
        };
        self.write_zeros(end.saturating_sub(self.pos))?;
        self.ranges.pop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_big_endian_by_default() {
        let mut r = RangedReader::from_slice(&[0x00, 0x01, 0xff, 0xff, 0xff, 0xfe]);
        assert_eq!(r.read_u16().unwrap(), 1);
        assert_eq!(r.read_i32().unwrap(), -2);
        assert!(r.is_exhausted().unwrap());
    }

    #[test]
    fn failed_read_does_not_advance() {
        let mut r = RangedReader::from_slice(&[1, 2, 3]);
        let err = r.read_u32().unwrap_err();
        assert!(matches!(err, DecodeError::EndOfStream { needed: 4, available: 3 }));
        assert_eq!(r.position(), 0);
        assert_eq!(r.read_u16().unwrap(), 0x0102);
    }

    #[test]
    fn scope_bounds_reads_and_pop_skips_tail() {
        let mut r = RangedReader::from_slice(&[1, 2, 3, 4, 5, 6]);
        r.push_range(4).unwrap();
        assert_eq!(r.available(), Some(4));
        assert_eq!(r.read_u8().unwrap(), 1);
        assert!(r.read_u32().is_err());
        r.pop_range().unwrap();
        assert_eq!(r.position(), 4);
        assert_eq!(r.available(), Some(2));
        assert_eq!(r.read_u8().unwrap(), 5);
    }

    #[test]
    fn nested_scope_cannot_exceed_parent() {
        let mut r = RangedReader::from_slice(&[0; 8]);
        assert!(matches!(r.push_range(9), Err(DecodeError::EndOfStream { .. })));
        r.push_range(4).unwrap();
        let err = r.push_range(5).unwrap_err();
        assert!(matches!(err, DecodeError::RangeUnderflow { requested: 5, available: 4 }));
        r.push_range(2).unwrap();
        r.pop_range().unwrap();
        assert_eq!(r.position(), 2);
        r.pop_range().unwrap();
        assert_eq!(r.position(), 4);
        assert!(matches!(r.pop_range(), Err(DecodeError::StackUnderflow)));
    }

    #[test]
    fn narrow_uint_and_little_endian() {
        let mut r = RangedReader::from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05])
            .with_endianness(Endianness::Little);
        assert_eq!(r.read_uint(3).unwrap(), 0x030201);
        assert_eq!(r.read_u16().unwrap(), 0x0504);
    }

    #[test]
    fn minimum_string_reads_at_least_four_bytes() {
        let mut r = RangedReader::from_slice(b"\0\0\0\0abcd\0\0\0\x05hello");
        assert_eq!(r.read_minimum_string(Encoding::Latin1).unwrap(), "abcd");
        assert_eq!(r.read_minimum_string(Encoding::Latin1).unwrap(), "hello");
    }

    #[test]
    fn unbounded_source_reports_exhaustion() {
        let data = [7u8, 8];
        let mut r = RangedReader::new(&data[..]);
        assert_eq!(r.available(), None);
        assert!(!r.is_exhausted().unwrap());
        assert_eq!(r.read_remaining().unwrap(), vec![7, 8]);
        assert!(r.is_exhausted().unwrap());
        assert!(matches!(r.read_u8(), Err(DecodeError::EndOfStream { .. })));
    }

    #[test]
    fn writer_pads_scopes_and_rejects_overflow() {
        let mut w = RangedWriter::new(Vec::new(), Endianness::Big);
        w.push_range(4).unwrap();
        w.write_u16(0xabcd).unwrap();
        w.pop_range().unwrap();
        w.push_range(1).unwrap();
        assert!(matches!(
            w.write_u16(1),
            Err(EncodeError::ScopeOverflow { declared: 1, written: 2 })
        ));
        assert_eq!(w.into_inner(), vec![0xab, 0xcd, 0, 0]);
    }
}
