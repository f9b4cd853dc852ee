// SPDX-FileCopyrightText: 2023-2025 Andrew Gunnerson
// SPDX-License-Identifier: GPL-3.0-only

use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::util;

/// Common function for reading a structure from a reader.
pub trait FromReader<R: Read>: Sized {
    type Error;

    fn from_reader(reader: R) -> Result<Self, Self::Error>;
}

/// Common function for writing a structure to a writer.
pub trait ToWriter<W: Write>: Sized {
    type Error;

    fn to_writer(&self, writer: W) -> Result<(), Self::Error>;
}

/// Extensions for writers to easily write zeros (eg. for padding).
pub trait WriteZerosExt {
    fn write_zeros(&mut self, size: u64) -> io::Result<u64>;

    fn write_zeros_exact(&mut self, size: u64) -> io::Result<()> {
        let n = self.write_zeros(size)?;
        if n != size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("Expected to write {size} bytes, but reached EOF after {n} bytes"),
            ));
        }
        Ok(())
    }
}

impl<W: Write> WriteZerosExt for W {
    fn write_zeros(&mut self, size: u64) -> io::Result<u64> {
        // We don't use std::io::copy() on std::io::repeat(0) because it fails
        // if the writer hits EOF before all data is written.
        let mut written = 0;

        while written < size {
            let to_write = (size - written).min(util::ZEROS.len() as u64) as usize;
            let n = self.write(&util::ZEROS[..to_write])?;
            written += n as u64;

            if n < to_write {
                break;
            }
        }

        Ok(written)
    }
}

/// Extensions for reading fixed-size UTF-8 strings.
pub trait ReadStringExt {
    /// Read exactly `size` bytes and interpret them as a UTF-8 string.
    fn read_string_exact(&mut self, size: usize) -> io::Result<String>;

    /// Read exactly `size` bytes and interpret everything up to the first NULL
    /// byte as a UTF-8 string. The remaining bytes must all be NULL.
    fn read_string_padded(&mut self, size: usize) -> io::Result<String>;
}

impl<R: Read> ReadStringExt for R {
    fn read_string_exact(&mut self, size: usize) -> io::Result<String> {
        let mut buf = vec![0u8; size];
        self.read_exact(&mut buf)?;

        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn read_string_padded(&mut self, size: usize) -> io::Result<String> {
        let mut buf = vec![0u8; size];
        self.read_exact(&mut buf)?;

        let len = buf.iter().position(|b| *b == 0).unwrap_or(size);
        if !util::is_zero(&buf[len..]) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "String padding contains non-NULL bytes",
            ));
        }
        buf.truncate(len);

        String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Extensions for writing fixed-size UTF-8 strings.
pub trait WriteStringExt {
    /// Write a string, padded with NULL bytes to `size` bytes. Fails if the
    /// string is longer than `size`.
    fn write_string_padded(&mut self, data: &str, size: usize) -> io::Result<()>;
}

impl<W: Write> WriteStringExt for W {
    fn write_string_padded(&mut self, data: &str, size: usize) -> io::Result<()> {
        if data.len() > size {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("String exceeds {size} bytes: {data:?}"),
            ));
        }

        self.write_all(data.as_bytes())?;
        self.write_zeros_exact((size - data.len()) as u64)?;

        Ok(())
    }
}

/// A reader or writer wrapper that keeps track of how many bytes have passed
/// through it. [`Seek`] is implemented, but only for reporting that count.
pub struct Counting<T> {
    inner: T,
    offset: u64,
}

pub type CountingReader<R> = Counting<R>;
pub type CountingWriter<W> = Counting<W>;

impl<T> Counting<T> {
    pub fn new(inner: T) -> Self {
        Self { inner, offset: 0 }
    }

    pub fn finish(self) -> (T, u64) {
        (self.inner, self.offset)
    }
}

impl<R: Read> Read for Counting<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

impl<W: Write> Write for Counting<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.offset += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<T> Seek for Counting<T> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match pos {
            SeekFrom::Current(0) => Ok(self.offset),
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "Can only report current offset",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn padded_strings() {
        let mut writer = Cursor::new(Vec::new());
        writer.write_string_padded("avbtool", 12).unwrap();
        assert_eq!(writer.get_ref(), b"avbtool\0\0\0\0\0");

        let mut reader = Cursor::new(writer.into_inner());
        assert_eq!(reader.read_string_padded(12).unwrap(), "avbtool");

        let mut reader = Cursor::new(b"ab\0c");
        let err = reader.read_string_padded(4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let mut writer = Cursor::new(Vec::new());
        let err = writer.write_string_padded("too long", 4).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn counting_reader() {
        let mut reader = CountingReader::new(Cursor::new(b"foobar"));
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(reader.stream_position().unwrap(), 4);

        let err = reader.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(reader.seek(SeekFrom::Start(0)).is_err());

        let (_, offset) = reader.finish();
        assert_eq!(offset, 6);
    }

    #[test]
    fn counting_writer() {
        let mut writer = CountingWriter::new(Vec::new());
        writer.write_all(b"foo").unwrap();
        writer.write_zeros_exact(5).unwrap();
        assert_eq!(writer.stream_position().unwrap(), 8);

        let (inner, offset) = writer.finish();
        assert_eq!(offset, 8);
        assert_eq!(inner, b"foo\0\0\0\0\0");
    }
}
