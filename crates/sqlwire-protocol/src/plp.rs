//! Partially length-prefixed (PLP) values.
//!
//! A PLP value starts with a `u64` total length, then a run of chunks each
//! prefixed by a `u32` length, closed by a zero-length chunk. The total is
//! either exact, [`PLP_UNKNOWN_LEN`], or [`PLP_NULL`] (in which case no
//! chunks follow).

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::codec::{read_bytes, read_u32_le, read_u64_le, skip};
use crate::error::ProtocolError;

/// Total length marking a NULL value.
pub const PLP_NULL: u64 = 0xFFFF_FFFF_FFFF_FFFF;

/// Total length marking a value of unannounced size.
pub const PLP_UNKNOWN_LEN: u64 = 0xFFFF_FFFF_FFFF_FFFE;

/// Read a PLP value, concatenating its chunks in arrival order.
///
/// Returns `None` for NULL. A single-chunk value is returned without
/// copying. When the chunks do not add up to the announced total the value
/// is still consumed whole and [`ProtocolError::PlpLengthMismatch`] is
/// returned with `src` positioned on the next field.
pub fn read_plp(src: &mut Bytes) -> Result<Option<Bytes>, ProtocolError> {
    let mut resume = PlpResume::default();
    resume.begin(src.len());
    resume.read(src)
}

/// Progress through the PLP values of a token that is still arriving.
///
/// The token decoder retries from the token start whenever a packet
/// arrives. Chunks walked on an earlier attempt are kept here, copied once,
/// so a value spanning many packets is not re-read from its first chunk.
/// Positions are offsets from the token start, which does not move until
/// the token decodes.
#[derive(Debug, Default)]
pub struct PlpResume {
    len: usize,
    partial: Option<Partial>,
    finished: Vec<Finished>,
}

#[derive(Debug)]
struct Partial {
    at: usize,
    total: u64,
    /// Offset of the first chunk header not yet in `data`.
    next: usize,
    data: BytesMut,
}

#[derive(Debug)]
struct Finished {
    at: usize,
    end: usize,
    total: u64,
    value: Bytes,
}

impl PlpResume {
    /// Start an attempt over `len` buffered bytes beginning at the token start.
    pub fn begin(&mut self, len: usize) {
        self.len = len;
    }

    /// Drop all progress.
    pub fn reset(&mut self) {
        self.partial = None;
        self.finished.clear();
    }

    /// Bytes of a partly received value already walked, if any.
    #[must_use]
    pub fn pending(&self) -> Option<usize> {
        self.partial.as_ref().map(|p| p.next - p.at)
    }

    fn position(&self, src: &Bytes) -> usize {
        self.len.saturating_sub(src.len())
    }

    /// Read one PLP value, continuing a previous attempt at the same offset.
    pub fn read(&mut self, src: &mut Bytes) -> Result<Option<Bytes>, ProtocolError> {
        let at = self.position(src);
        if let Some(done) = self.finished.iter().find(|f| f.at == at) {
            skip(src, done.end - at)?;
            return checked(done.total, done.value.clone()).map(Some);
        }

        let mut partial = match self.partial.take() {
            Some(p) if p.at == at => {
                if let Err(e) = skip(src, p.next - at) {
                    self.partial = Some(p);
                    return Err(e);
                }
                p
            }
            other => {
                self.partial = other;
                let total = read_u64_le(src)?;
                if total == PLP_NULL {
                    return Ok(None);
                }
                Partial {
                    at,
                    total,
                    next: self.position(src),
                    data: BytesMut::new(),
                }
            }
        };

        let mut chunks: Vec<Bytes> = Vec::new();
        loop {
            match read_u32_le(src).and_then(|len| read_bytes(src, len as usize)) {
                Ok(chunk) if chunk.is_empty() => break,
                Ok(chunk) => {
                    chunks.push(chunk);
                    partial.next = self.position(src);
                }
                Err(e) => {
                    for chunk in &chunks {
                        partial.data.extend_from_slice(chunk);
                    }
                    self.partial = Some(partial);
                    return Err(e);
                }
            }
        }

        let value = if partial.data.is_empty() && chunks.len() <= 1 {
            chunks.pop().unwrap_or_default()
        } else {
            partial.data.reserve(chunks.iter().map(Bytes::len).sum());
            for chunk in &chunks {
                partial.data.extend_from_slice(chunk);
            }
            let value = partial.data.freeze();
            self.finished.push(Finished {
                at,
                end: self.position(src),
                total: partial.total,
                value: value.clone(),
            });
            value
        };
        checked(partial.total, value).map(Some)
    }
}

fn checked(total: u64, value: Bytes) -> Result<Bytes, ProtocolError> {
    if total != PLP_UNKNOWN_LEN && total != value.len() as u64 {
        return Err(ProtocolError::PlpLengthMismatch {
            announced: total,
            received: value.len(),
        });
    }
    Ok(value)
}

/// Write a PLP value as one chunk plus terminator, or the NULL marker.
pub fn write_plp(dst: &mut impl BufMut, value: Option<&[u8]>) {
    match value {
        None => dst.put_u64_le(PLP_NULL),
        Some(data) => {
            dst.put_u64_le(data.len() as u64);
            if !data.is_empty() {
                dst.put_u32_le(data.len() as u32);
                dst.put_slice(data);
            }
            dst.put_u32_le(0);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn chunked(total: u64, chunks: &[&[u8]]) -> Bytes {
        let mut buf = BytesMut::new();
        buf.put_u64_le(total);
        for chunk in chunks {
            buf.put_u32_le(chunk.len() as u32);
            buf.put_slice(chunk);
        }
        buf.put_u32_le(0);
        buf.freeze()
    }

    #[test]
    fn test_chunks_are_joined_in_order() {
        let mut src = chunked(12, &[b"hello", b" world!"]);
        let value = read_plp(&mut src).unwrap().unwrap();
        assert_eq!(value.as_ref(), b"hello world!");
        assert_eq!(value.len(), 12);
        assert!(src.is_empty());
    }

    #[test]
    fn test_unknown_length() {
        let mut src = chunked(PLP_UNKNOWN_LEN, &[b"ab", b"c"]);
        assert_eq!(read_plp(&mut src).unwrap().unwrap().as_ref(), b"abc");
    }

    #[test]
    fn test_null_and_empty() {
        let mut src = Bytes::from_static(&[0xFF; 8]);
        assert_eq!(read_plp(&mut src).unwrap(), None);

        let mut src = chunked(0, &[]);
        assert_eq!(read_plp(&mut src).unwrap(), Some(Bytes::new()));
    }

    #[test]
    fn test_length_mismatch_consumes_value() {
        let mut src = chunked(10, &[b"abc"]);
        src = [src, Bytes::from_static(b"next")].concat().into();
        assert_eq!(
            read_plp(&mut src),
            Err(ProtocolError::PlpLengthMismatch {
                announced: 10,
                received: 3
            })
        );
        assert!(ProtocolError::PlpLengthMismatch { announced: 10, received: 3 }.is_value_scoped());
        assert_eq!(src.as_ref(), b"next");
    }

    #[test]
    fn test_resume_continues_after_last_whole_chunk() {
        let whole = chunked(9, &[b"abc", b"def", b"ghi"]);
        let mut resume = PlpResume::default();

        // header, first chunk and half of the second
        let mut src = whole.slice(..8 + 7 + 5);
        resume.begin(src.len());
        assert_eq!(resume.read(&mut src), Err(ProtocolError::UnexpectedEof));
        assert_eq!(resume.pending(), Some(8 + 7));

        let mut src = whole.slice(..8 + 7 * 3 - 1);
        resume.begin(src.len());
        assert_eq!(resume.read(&mut src), Err(ProtocolError::UnexpectedEof));
        assert_eq!(resume.pending(), Some(8 + 7 * 2));

        let mut src = whole.clone();
        resume.begin(src.len());
        assert_eq!(resume.read(&mut src).unwrap().unwrap().as_ref(), b"abcdefghi");
        assert!(src.is_empty());
        assert_eq!(resume.pending(), None);

        // a retry of the same token reuses the assembled value
        let mut src = whole.clone();
        resume.begin(src.len());
        assert_eq!(resume.read(&mut src).unwrap().unwrap().as_ref(), b"abcdefghi");
        assert!(src.is_empty());
    }

    #[test]
    fn test_resume_ignores_progress_at_other_offsets() {
        let mut resume = PlpResume::default();
        let mut src = chunked(6, &[b"abc", b"def"]).slice(..12);
        resume.begin(src.len());
        assert!(resume.read(&mut src).is_err());
        assert!(resume.pending().is_some());

        // a different value two bytes further into the token
        let mut other = [Bytes::from_static(&[0, 0]), chunked(2, &[b"xy"])].concat();
        let mut src = Bytes::from(other.split_off(2));
        resume.begin(src.len() + 2);
        assert_eq!(resume.read(&mut src).unwrap().unwrap().as_ref(), b"xy");
        assert!(resume.pending().is_some());
    }

    #[test]
    fn test_truncated_chunk_is_eof() {
        let mut src = chunked(12, &[b"hello", b" world!"]).slice(..20);
        assert_eq!(read_plp(&mut src), Err(ProtocolError::UnexpectedEof));
    }

    #[test]
    fn test_write() {
        let mut buf = BytesMut::new();
        write_plp(&mut buf, Some(&b"xy"[..]));
        assert_eq!(&buf[..], &[2, 0, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, b'x', b'y', 0, 0, 0, 0]);

        let mut buf = BytesMut::new();
        write_plp(&mut buf, None);
        assert_eq!(&buf[..], &[0xFF; 8]);
    }
}
