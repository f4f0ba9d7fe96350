//! # Buffer File Records
//!
//! ```text
//! Sequenced: [length: u32 BE][sequence: u64 BE][envelope: length - 8]
//! Plain:     [length: u32 BE][envelope: length]
//! ```
//!
//! A reader that hits the end of the file in the middle of a record rewinds to
//! the record's start and reports "nothing complete yet"; the writer may still
//! be flushing it.

use std::io::{self, Read, Seek, SeekFrom, Write};

/// Size of the length prefix.
pub const LENGTH_PREFIX: usize = 4;

/// Size of the sequence field in sequenced records.
pub const SEQUENCE_FIELD: usize = 8;

/// Largest record body accepted, the same bound the socket puts on a frame.
pub const MAX_RECORD_LENGTH: usize = 64 * 1024 * 1024;

/// Record layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// Envelope only. Producer-side file mirror and replay files.
    Plain,
    /// Buffer sequence, then envelope. Durable write-ahead buffer.
    Sequenced,
}

/// One decoded record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Present for [`Framing::Sequenced`] only.
    pub sequence: Option<u64>,
    pub payload: Vec<u8>,
}

/// Appends records to a writer.
#[derive(Debug)]
pub struct RecordWriter<W: Write> {
    inner: W,
    framing: Framing,
}

impl<W: Write> RecordWriter<W> {
    pub fn new(inner: W, framing: Framing) -> Self {
        Self { inner, framing }
    }

    /// Append one record. `sequence` is ignored for plain framing.
    pub fn write_record(&mut self, sequence: u64, payload: &[u8]) -> io::Result<()> {
        let body_len = match self.framing {
            Framing::Plain => payload.len(),
            Framing::Sequenced => payload.len() + SEQUENCE_FIELD,
        };
        let length = u32::try_from(body_len)
            .ok()
            .filter(|_| body_len <= MAX_RECORD_LENGTH)
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "record too large"))?;

        self.inner.write_all(&length.to_be_bytes())?;
        if self.framing == Framing::Sequenced {
            self.inner.write_all(&sequence.to_be_bytes())?;
        }
        self.inner.write_all(payload)
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }
}

/// Reads records back from a seekable reader.
#[derive(Debug)]
pub struct RecordReader<R: Read + Seek> {
    inner: R,
    framing: Framing,
}

impl<R: Read + Seek> RecordReader<R> {
    pub fn new(inner: R, framing: Framing) -> Self {
        Self { inner, framing }
    }

    /// Next complete record, or `None` if the remaining bytes do not yet form
    /// one. On `None` the reader is positioned at the start of the
    /// incomplete record.
    pub fn next_record(&mut self) -> io::Result<Option<Record>> {
        let start = self.inner.stream_position()?;

        let mut prefix = [0u8; LENGTH_PREFIX];
        if !self.fill(&mut prefix)? {
            self.inner.seek(SeekFrom::Start(start))?;
            return Ok(None);
        }
        let length = u32::from_be_bytes(prefix) as usize;
        if length > MAX_RECORD_LENGTH {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record length {length} exceeds {MAX_RECORD_LENGTH}"),
            ));
        }
        if self.framing == Framing::Sequenced && length < SEQUENCE_FIELD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record length {length} shorter than sequence field"),
            ));
        }

        let mut body = vec![0u8; length];
        if !self.fill(&mut body)? {
            self.inner.seek(SeekFrom::Start(start))?;
            return Ok(None);
        }

        Ok(Some(match self.framing {
            Framing::Plain => Record {
                sequence: None,
                payload: body,
            },
            Framing::Sequenced => {
                let payload = body.split_off(SEQUENCE_FIELD);
                let mut seq = [0u8; SEQUENCE_FIELD];
                seq.copy_from_slice(&body);
                Record {
                    sequence: Some(u64::from_be_bytes(seq)),
                    payload,
                }
            }
        }))
    }

    /// Whether every byte of the underlying reader has been consumed.
    pub fn at_end(&mut self) -> io::Result<bool> {
        let position = self.inner.stream_position()?;
        let end = self.inner.seek(SeekFrom::End(0))?;
        self.inner.seek(SeekFrom::Start(position))?;
        Ok(position >= end)
    }

    /// Read exactly `buf.len()` bytes. `false` on a short read.
    fn fill(&mut self, buf: &mut [u8]) -> io::Result<bool> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(true)
    }
}

impl<R: Read + Seek> Iterator for RecordReader<R> {
    type Item = io::Result<Record>;

    /// Iterates complete records; stops at the first incomplete one.
    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
