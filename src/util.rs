use std::io::{Error, ErrorKind, Read, Result, Write};

use crate::header::BLOCK_SIZE;

/// This function reads the exact amount of bytes required to fill the buffer, possibly performing
/// multiple reads to do so (and also retrying if required to deal with EINTR).
///
/// The "-ish" is that, unlike the standard Read::read_exact() method, it's possible to determine
/// the difference between an incomplete read (where some amount of bytes were read, but the buffer
/// wasn't filled) and a "clean" EOF where an EOF occurred immediately with no data read at all,
/// which is still considered to be a success.
///
/// # Return value
///
///  - in case the requested number of bytes were successfully read into the buffer, returns
///    Ok(true)
///  - in case of a "clean" EOF where the stream ends immediately, the function returns
///    Ok(false)
///  - in case of an unexpected EOF after some bytes were read, the function returns an Error with
///    ErrorKind::UnexpectedEof
///  - in case of underlying errors from the Read implementation, the error is returned directly
pub(crate) fn read_exactish(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool> {
    match read_to_fill(reader, buf)? {
        0 if !buf.is_empty() => Ok(false),
        n if n == buf.len() => Ok(true),
        _ => Err(Error::from(ErrorKind::UnexpectedEof)),
    }
}

/// Reads until the buffer is full or EOF is reached, retrying on EINTR.  Returns the number of
/// bytes read, which is less than the buffer length only at EOF.
pub(crate) fn read_to_fill(reader: &mut impl Read, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;

    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    Ok(filled)
}

/// Number of padding bytes needed after `size` bytes of content to reach a block boundary.
pub(crate) fn padding_for(size: u64) -> usize {
    (size.next_multiple_of(BLOCK_SIZE as u64) - size) as usize
}

/// Writes `count` zero bytes.
pub(crate) fn write_zeros(writer: &mut impl Write, count: usize) -> Result<()> {
    const ZEROS: [u8; BLOCK_SIZE] = [0; BLOCK_SIZE];

    let mut todo = count;
    while todo > 0 {
        let n = todo.min(BLOCK_SIZE);
        writer.write_all(&ZEROS[..n])?;
        todo -= n;
    }
    Ok(())
}

/// Reads and discards exactly `count` bytes.
pub(crate) fn skip_bytes(reader: &mut impl Read, count: u64) -> Result<()> {
    let skipped = std::io::copy(&mut reader.take(count), &mut std::io::sink())?;
    if skipped != count {
        return Err(Error::from(ErrorKind::UnexpectedEof));
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use similar_asserts::assert_eq;

    use super::*;

    #[test]
    fn test_read_exactish() {
        let read9 = |r: &mut &[u8]| read_exactish(r, &mut [0; 9]);

        // empty returns false immediately
        let mut r = b"" as &[u8];
        assert_eq!(read9(&mut r).unwrap(), false);
        assert_eq!(read9(&mut r).unwrap(), false); // repeatable

        // read one full buffer and then immediate EOF
        r = b"ninebytes";
        assert_eq!(read9(&mut r).unwrap(), true);
        assert_eq!(read9(&mut r).unwrap(), false);

        // read a full buffer and then fail on a partial one
        r = b"twelve bytes";
        assert_eq!(read9(&mut r).unwrap(), true);
        assert_eq!(read9(&mut r).unwrap_err().kind(), ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_read_exactish_broken_reader() {
        struct BrokenReader;
        impl Read for BrokenReader {
            fn read(&mut self, _buffer: &mut [u8]) -> Result<usize> {
                Err(ErrorKind::NetworkDown.into())
            }
        }

        assert_eq!(
            read_exactish(&mut BrokenReader, &mut [0; 9])
                .unwrap_err()
                .kind(),
            ErrorKind::NetworkDown
        );
    }

    #[test]
    fn test_read_to_fill_short_reads() {
        // hands out one byte per call
        struct Trickle<'a>(&'a [u8]);
        impl Read for Trickle<'_> {
            fn read(&mut self, buffer: &mut [u8]) -> Result<usize> {
                match (self.0.split_first(), buffer.first_mut()) {
                    (Some((&byte, rest)), Some(slot)) => {
                        *slot = byte;
                        self.0 = rest;
                        Ok(1)
                    }
                    _ => Ok(0),
                }
            }
        }

        let mut buf = [0; 4];
        assert_eq!(read_to_fill(&mut Trickle(b"abcdef"), &mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(read_to_fill(&mut Trickle(b"xy"), &mut buf).unwrap(), 2);
    }

    #[test]
    fn test_padding() {
        assert_eq!(padding_for(0), 0);
        assert_eq!(padding_for(1), 511);
        assert_eq!(padding_for(512), 0);
        assert_eq!(padding_for(513), 511);
    }

    #[test]
    fn test_write_zeros_and_skip() {
        let mut out = vec![];
        write_zeros(&mut out, 1300).unwrap();
        assert_eq!(out.len(), 1300);
        assert!(out.iter().all(|&b| b == 0));

        let mut r = &out[..];
        skip_bytes(&mut r, 1000).unwrap();
        assert_eq!(r.len(), 300);
        assert_eq!(
            skip_bytes(&mut r, 301).unwrap_err().kind(),
            ErrorKind::UnexpectedEof
        );
    }
}
