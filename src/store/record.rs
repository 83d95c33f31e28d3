//! Record framing shared by snapshot and changelog files.
//!
//! Each record is
//!
//! ```text
//! i32 BE key length | key bytes | i32 BE value length | value bytes
//! ```
//!
//! A value length of `-1` marks a delete (no value bytes follow). A key length
//! of `-1` ends the file. A stream that ends anywhere else is truncated and
//! fails with [`ErrorKind::UnexpectedEof`].

use std::io::{self, ErrorKind, Read, Write};

const END_OF_FILE: i32 = -1;
const TOMBSTONE: i32 = -1;
const READ_CHUNK: usize = 64 * 1024;

/// One framed mutation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Record {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Iterates the records of a (decompressed) state file.
pub struct RecordReader<R> {
    inner: R,
    done: bool,
}

impl<R: Read> RecordReader<R> {
    pub const fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn read_len(&mut self) -> io::Result<i32> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(i32::from_be_bytes(buf))
    }

    fn read_bytes(&mut self, len: i32) -> io::Result<Vec<u8>> {
        let len = usize::try_from(len).map_err(|_| {
            io::Error::new(ErrorKind::InvalidData, format!("negative record length {len}"))
        })?;
        // Grow with the data actually read; a garbled length must not allocate up front.
        let mut buf = Vec::with_capacity(len.min(READ_CHUNK));
        (&mut self.inner).take(len as u64).read_to_end(&mut buf)?;
        if buf.len() != len {
            return Err(io::Error::new(
                ErrorKind::UnexpectedEof,
                format!("record declares {len} bytes but only {} remain", buf.len()),
            ));
        }
        Ok(buf)
    }

    fn read_record(&mut self) -> io::Result<Option<Record>> {
        let key_len = self.read_len()?;
        if key_len == END_OF_FILE {
            return Ok(None);
        }
        let key = self.read_bytes(key_len)?;
        let value_len = self.read_len()?;
        if value_len == TOMBSTONE {
            return Ok(Some(Record::Delete { key }));
        }
        let value = self.read_bytes(value_len)?;
        Ok(Some(Record::Put { key, value }))
    }
}

impl<R: Read> Iterator for RecordReader<R> {
    type Item = io::Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Writes framed records; used to build state files.
pub struct RecordWriter<W: Write> {
    inner: W,
}

impl<W: Write> RecordWriter<W> {
    pub const fn new(inner: W) -> Self {
        Self { inner }
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let len = i32::try_from(bytes.len())
            .map_err(|_| io::Error::new(ErrorKind::InvalidInput, "record larger than 2 GiB"))?;
        self.inner.write_all(&len.to_be_bytes())?;
        self.inner.write_all(bytes)
    }

    /// # Errors
    /// Propagates write failures.
    pub fn put(&mut self, key: &[u8], value: &[u8]) -> io::Result<()> {
        self.write_bytes(key)?;
        self.write_bytes(value)
    }

    /// # Errors
    /// Propagates write failures.
    pub fn delete(&mut self, key: &[u8]) -> io::Result<()> {
        self.write_bytes(key)?;
        self.inner.write_all(&TOMBSTONE.to_be_bytes())
    }

    /// Write the end marker, flush, and hand back the inner writer.
    ///
    /// # Errors
    /// Propagates write failures.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.write_all(&END_OF_FILE.to_be_bytes())?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}
