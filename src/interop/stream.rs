use std::sync::{Arc, Mutex};

use crate::{Error::OutOfBounds, Result};

/// A byte stream that marshal data is written to and read from.
///
/// Holding a `Box<dyn Stream>` holds one reference to the stream; dropping it releases
/// that reference.
pub trait Stream: Send {
    /// Writes all of `bytes` at the current position and advances past them.
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Fills `buffer` from the current position and advances past it.
    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()>;
}

#[derive(Debug, Default)]
struct Inner {
    data: Vec<u8>,
    position: usize,
}

/// An in-memory [`Stream`] whose clones share one buffer and cursor.
///
/// Cloning adds a reference; [`MemoryStream::references`] reports how many are alive.
#[derive(Debug, Clone, Default)]
pub struct MemoryStream {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStream {
    /// Creates an empty stream
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a stream over existing bytes, positioned at the start
    #[must_use]
    pub fn from_bytes(data: Vec<u8>) -> Self {
        MemoryStream {
            inner: Arc::new(Mutex::new(Inner { data, position: 0 })),
        }
    }

    /// Copy of the whole buffer
    #[must_use]
    pub fn to_vec(&self) -> Vec<u8> {
        lock!(self.inner).data.clone()
    }

    /// Current cursor position
    #[must_use]
    pub fn position(&self) -> usize {
        lock!(self.inner).position
    }

    /// Moves the cursor; seeking past the end is an error.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `position` is beyond the buffer.
    pub fn seek(&self, position: usize) -> Result<()> {
        let mut inner = lock!(self.inner);
        if position > inner.data.len() {
            return Err(OutOfBounds);
        }

        inner.position = position;
        Ok(())
    }

    /// Number of live references to this stream
    #[must_use]
    pub fn references(&self) -> usize {
        Arc::strong_count(&self.inner)
    }
}

impl Stream for MemoryStream {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        let mut inner = lock!(self.inner);
        let start = inner.position;
        let end = start.checked_add(bytes.len()).ok_or(OutOfBounds)?;
        if end > inner.data.len() {
            inner.data.resize(end, 0);
        }

        inner.data[start..end].copy_from_slice(bytes);
        inner.position = end;
        Ok(())
    }

    fn read_exact(&mut self, buffer: &mut [u8]) -> Result<()> {
        let mut inner = lock!(self.inner);
        let start = inner.position;
        let end = start.checked_add(buffer.len()).ok_or(OutOfBounds)?;
        if end > inner.data.len() {
            return Err(OutOfBounds);
        }

        buffer.copy_from_slice(&inner.data[start..end]);
        inner.position = end;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_buffer_and_cursor() {
        let mut writer = MemoryStream::new();
        let reader = writer.clone();
        assert_eq!(writer.references(), 2);

        writer.write_all(b"MEOW").unwrap();
        assert_eq!(reader.to_vec(), b"MEOW");
        assert_eq!(reader.position(), 4);

        drop(reader);
        assert_eq!(writer.references(), 1);
    }

    #[test]
    fn short_read_fails_without_moving() {
        let mut stream = MemoryStream::from_bytes(vec![1, 2, 3]);
        let mut buffer = [0u8; 4];
        assert!(matches!(stream.read_exact(&mut buffer), Err(OutOfBounds)));
        assert_eq!(stream.position(), 0);

        let mut buffer = [0u8; 2];
        stream.read_exact(&mut buffer).unwrap();
        assert_eq!(buffer, [1, 2]);
        assert!(stream.seek(4).is_err());
    }

    #[test]
    fn overwrite_in_place() {
        let mut stream = MemoryStream::from_bytes(vec![0; 4]);
        stream.seek(1).unwrap();
        stream.write_all(&[9, 9, 9, 9]).unwrap();
        assert_eq!(stream.to_vec(), vec![0, 9, 9, 9, 9]);
    }
}
