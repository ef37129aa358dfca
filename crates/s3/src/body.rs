//! Outgoing body producer and incoming body sink
//!
//! An outgoing body is a cursor over either an in-memory block or a byte
//! range of a caller-supplied descriptor. The cursor hands out chunks of at
//! most [`CHUNK_SIZE`] bytes, never more than what remains, and an empty chunk
//! once the range is exhausted. Descriptor reads are positional, so several
//! exchanges can stream different ranges of the same descriptor at once.

use std::fs::File;

use bytes::Bytes;
use futures::Stream;

use bfs_core::{Descriptor, Error, Result};

/// Size of one chunk handed to the transport
pub const CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
enum BodySource {
    Memory(Bytes),
    File(Descriptor),
}

/// Streaming-read cursor over an outgoing body
#[derive(Debug, Clone)]
pub struct BodyCursor {
    source: BodySource,
    offset: u64,
    remaining: u64,
}

impl BodyCursor {
    /// Cursor over an in-memory block
    pub fn memory(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let remaining = data.len() as u64;
        Self {
            source: BodySource::Memory(data),
            offset: 0,
            remaining,
        }
    }

    /// Cursor over `[start, start + size)` of `file`
    pub fn file(file: Descriptor, start: u64, size: u64) -> Self {
        Self {
            source: BodySource::File(file),
            offset: start,
            remaining: size,
        }
    }

    /// Bytes not yet handed out
    pub fn remaining(&self) -> u64 {
        self.remaining
    }

    /// Hand out the next chunk of at most `max` bytes; empty at end of body.
    pub fn read_chunk(&mut self, max: usize) -> Result<Bytes> {
        let n = (max as u64).min(self.remaining) as usize;
        if n == 0 {
            return Ok(Bytes::new());
        }

        let chunk = match &self.source {
            BodySource::Memory(data) => {
                let start = self.offset as usize;
                data.slice(start..start + n)
            }
            BodySource::File(file) => {
                let mut buf = vec![0u8; n];
                read_exact_at(file, &mut buf, self.offset).map_err(|e| {
                    Error::Io(std::io::Error::new(
                        e.kind(),
                        format!("reading {n} bytes at offset {}: {e}", self.offset),
                    ))
                })?;
                Bytes::from(buf)
            }
        };

        self.offset += n as u64;
        self.remaining -= n as u64;
        Ok(chunk)
    }

    /// Turn the cursor into a chunk stream for the HTTP client.
    ///
    /// `on_chunk` sees the size of every chunk as it leaves, for stall
    /// detection. Descriptor reads run on the blocking pool.
    pub fn into_stream<F>(self, on_chunk: F) -> impl Stream<Item = Result<Bytes>> + Send + 'static
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        futures::stream::unfold(
            (Some(self), on_chunk),
            |(cursor, on_chunk)| async move {
                let mut cursor = cursor?;
                let read = if matches!(cursor.source, BodySource::Memory(_)) {
                    cursor.read_chunk(CHUNK_SIZE).map(|c| (cursor, c))
                } else {
                    tokio::task::spawn_blocking(move || {
                        cursor.read_chunk(CHUNK_SIZE).map(|c| (cursor, c))
                    })
                    .await
                    .map_err(|e| Error::General(format!("body reader task failed: {e}")))
                    .and_then(|r| r)
                };
                match read {
                    Ok((_, chunk)) if chunk.is_empty() => None,
                    Ok((cursor, chunk)) => {
                        on_chunk(chunk.len());
                        Some((Ok(chunk), (Some(cursor), on_chunk)))
                    }
                    Err(e) => Some((Err(e), (None, on_chunk))),
                }
            },
        )
    }
}

/// Where a response body goes
#[derive(Debug, Clone, Default)]
pub enum BodySink {
    /// Into the exchange's body buffer
    #[default]
    Buffer,
    /// Into a caller descriptor, starting at `offset`
    File {
        file: Descriptor,
        offset: u64,
        written: u64,
    },
}

impl BodySink {
    pub fn file(file: Descriptor, offset: u64) -> Self {
        BodySink::File {
            file,
            offset,
            written: 0,
        }
    }

    /// Bytes written to a descriptor so far (0 for the buffer sink)
    pub fn written(&self) -> u64 {
        match self {
            BodySink::Buffer => 0,
            BodySink::File { written, .. } => *written,
        }
    }

    /// Forget what was written, for a resubmitted exchange
    pub fn rewind(&mut self) {
        if let BodySink::File { written, .. } = self {
            *written = 0;
        }
    }
}

#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
pub(crate) fn write_all_at(file: &File, buf: &[u8], offset: u64) -> std::io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset)? {
            0 => return Err(std::io::ErrorKind::UnexpectedEof.into()),
            n => {
                buf = &mut std::mem::take(&mut buf)[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}

#[cfg(windows)]
pub(crate) fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> std::io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset)? {
            0 => return Err(std::io::ErrorKind::WriteZero.into()),
            n => {
                buf = &buf[n..];
                offset += n as u64;
            }
        }
    }
    Ok(())
}
