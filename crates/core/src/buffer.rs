//! Growable byte store for streamed response data
//!
//! Response headers and bodies arrive in chunks of unknown count. `ByteBuffer`
//! accumulates them in one contiguous allocation that always keeps a trailing
//! NUL byte after the content, grows by doubling, and reports allocation
//! failure as an error on the owning exchange instead of aborting.

use std::borrow::Cow;

use crate::error::{Error, Result};

/// Bytes reserved after the content for the terminator.
pub const TERMINATOR_MARGIN: usize = 1;

/// Owned, contiguous, append-only byte store.
///
/// Invariant: once storage is allocated, `capacity() >= len() + TERMINATOR_MARGIN`
/// and the byte at `len()` is zero.
#[derive(Debug, Default, Clone)]
pub struct ByteBuffer {
    /// Content followed by the terminator; `store.len() == len + 1` once allocated.
    store: Vec<u8>,
    /// Capacity this buffer asked for.
    capacity: usize,
}

impl ByteBuffer {
    /// Create an empty buffer without allocating
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes, growing to `max(needed, capacity * 2)` when short of room.
    pub fn append(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }

        let len = self.len();
        let needed = len
            .checked_add(bytes.len())
            .and_then(|n| n.checked_add(TERMINATOR_MARGIN))
            .ok_or_else(|| Error::Buffer(format!("cannot grow past {len} bytes")))?;

        if needed > self.capacity {
            self.grow(needed)?;
        }

        // Drop the old terminator, copy, and terminate again.
        self.store.truncate(len);
        self.store.extend_from_slice(bytes);
        self.store.push(0);
        Ok(())
    }

    fn grow(&mut self, needed: usize) -> Result<()> {
        let target = needed.max(self.capacity.saturating_mul(2));
        let additional = target - self.store.len();
        self.store.try_reserve_exact(additional).map_err(|e| {
            Error::Buffer(format!(
                "failed to grow buffer from {} to {target} bytes: {e}",
                self.capacity
            ))
        })?;
        self.capacity = target;
        Ok(())
    }

    /// Release the storage and reset to empty
    pub fn clear(&mut self) {
        self.store = Vec::new();
        self.capacity = 0;
    }

    /// Content without the terminator
    pub fn as_bytes(&self) -> &[u8] {
        match self.store.split_last() {
            Some((_, content)) => content,
            None => &[],
        }
    }

    /// Content as text; an empty buffer yields an empty string
    pub fn to_str_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }

    /// Number of content bytes
    pub fn len(&self) -> usize {
        self.store.len().saturating_sub(TERMINATOR_MARGIN)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocated capacity, terminator included
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_buffer() {
        let buf = ByteBuffer::new();
        assert!(buf.is_empty());
        assert_eq!(buf.as_bytes(), b"");
        assert_eq!(buf.to_str_lossy(), "");
        assert_eq!(buf.capacity(), 0);
    }

    #[test]
    fn test_append_concatenates_in_order() {
        let blocks: [&[u8]; 5] = [b"HTTP/1.1 ", b"200", b" OK\r\n", b"", b"ETag: \"abc\"\r\n"];
        let mut buf = ByteBuffer::new();
        let mut expected = Vec::new();

        for block in blocks {
            buf.append(block).unwrap();
            expected.extend_from_slice(block);
            assert_eq!(buf.as_bytes(), expected.as_slice());
            assert!(buf.capacity() >= buf.len() + TERMINATOR_MARGIN);
        }

        assert_eq!(buf.to_str_lossy(), "HTTP/1.1 200 OK\r\nETag: \"abc\"\r\n");
    }

    #[test]
    fn test_first_growth_is_exact() {
        let mut buf = ByteBuffer::new();
        buf.append(b"hello").unwrap();
        assert_eq!(buf.capacity(), 5 + TERMINATOR_MARGIN);
        assert_eq!(buf.len(), 5);
    }

    #[test]
    fn test_growth_doubles() {
        let mut buf = ByteBuffer::new();
        buf.append(&[1u8; 10]).unwrap();
        assert_eq!(buf.capacity(), 11);

        // needs 12, doubling gives 22
        buf.append(&[2u8; 1]).unwrap();
        assert_eq!(buf.capacity(), 22);

        // fits without growing
        buf.append(&[3u8; 10]).unwrap();
        assert_eq!(buf.capacity(), 22);
        assert_eq!(buf.len(), 21);

        // a large append beats doubling
        buf.append(&[4u8; 100]).unwrap();
        assert_eq!(buf.capacity(), 122);
        assert_eq!(&buf.as_bytes()[..10], &[1u8; 10]);
    }

    #[test]
    fn test_terminator_is_kept() {
        let mut buf = ByteBuffer::new();
        buf.append(b"abc").unwrap();
        buf.append(b"def").unwrap();
        assert_eq!(buf.store.last(), Some(&0));
        assert_eq!(buf.store.len(), buf.len() + TERMINATOR_MARGIN);
    }

    #[test]
    fn test_clear_releases_storage() {
        let mut buf = ByteBuffer::new();
        buf.append(b"payload").unwrap();
        buf.clear();
        assert!(buf.is_empty());
        assert_eq!(buf.capacity(), 0);
        buf.append(b"again").unwrap();
        assert_eq!(buf.as_bytes(), b"again");
    }
}
