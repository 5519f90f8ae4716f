use uguid::Guid;
use widestring::U16String;

use crate::{
    io::{read_be_at, read_le_at, NativeIO},
    Error::OutOfBounds,
    Result,
};

/// A cursor over a byte buffer for sequential, bounds-checked decoding.
///
/// Used to walk fixed-size records in mapped data files and to decode marshal packets.
///
/// # Examples
///
/// ```rust
/// use dotinterop::io::Parser;
///
/// let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
/// let mut parser = Parser::new(&data);
///
/// let first = parser.read_le::<u32>()?;
/// assert_eq!(first, 0x04030201);
///
/// parser.seek(6)?;
/// assert_eq!(parser.read_le::<u16>()?, 0x0807);
/// # Ok::<(), dotinterop::Error>(())
/// ```
pub struct Parser<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a new parser positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Length of the underlying buffer
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the underlying buffer is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns `true` if the cursor is before the end of the buffer
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Current cursor position
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Bytes left after the cursor
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.position)
    }

    /// Move the cursor to `pos`. Seeking to the very end is allowed.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `pos` is beyond the buffer.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(OutOfBounds);
        }

        self.position = pos;
        Ok(())
    }

    /// Move the cursor forward by `step` bytes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if that would pass the end of the buffer.
    pub fn advance_by(&mut self, step: usize) -> Result<()> {
        self.position = self.calc_end_position(step)?;
        Ok(())
    }

    /// Runs `f` and restores the cursor if it fails.
    ///
    /// # Errors
    /// Returns the error of `f`.
    pub fn transactional<T, F>(&mut self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        let saved_position = self.position;
        let result = f(self);
        if result.is_err() {
            self.position = saved_position;
        }
        result
    }

    /// Advance the cursor to the next multiple of `alignment` (a power of two).
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if aligning would pass the end of the buffer.
    pub fn align(&mut self, alignment: usize) -> Result<()> {
        let padding = (alignment - (self.position % alignment)) % alignment;
        self.advance_by(padding)
    }

    /// Read a little-endian `T` and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
    pub fn read_le<T: NativeIO>(&mut self) -> Result<T> {
        read_le_at::<T>(self.data, &mut self.position)
    }

    /// Read a big-endian `T` and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
    pub fn read_be<T: NativeIO>(&mut self) -> Result<T> {
        read_be_at::<T>(self.data, &mut self.position)
    }

    /// Borrow the next `length` bytes and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
    pub fn read_bytes(&mut self, length: usize) -> Result<&'a [u8]> {
        let end = self.calc_end_position(length)?;
        let bytes = &self.data[self.position..end];
        self.position = end;
        Ok(bytes)
    }

    /// Borrow the next fixed-size record of `N` bytes and advance.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
    pub fn read_record<const N: usize>(&mut self) -> Result<&'a [u8; N]> {
        let bytes = self.read_bytes(N)?;
        bytes.try_into().map_err(|_| OutOfBounds)
    }

    /// Read a GUID in its in-memory (mixed-endian) layout.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if fewer than 16 bytes remain.
    pub fn read_guid(&mut self) -> Result<Guid> {
        Ok(Guid::from_bytes(*self.read_record::<16>()?))
    }

    /// Read a NUL-terminated little-endian UTF-16 string and advance past the terminator.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if no terminator is found, or
    /// [`crate::Error::Malformed`] if the string is not valid UTF-16.
    pub fn read_utf16_cstr(&mut self) -> Result<String> {
        self.transactional(|parser| {
            let mut units = Vec::new();
            loop {
                match parser.read_le::<u16>()? {
                    0 => break,
                    unit => units.push(unit),
                }
            }

            U16String::from_vec(units)
                .to_string()
                .map_err(|_| malformed_error!("Invalid UTF-16 string ending at {}", parser.position))
        })
    }

    fn calc_end_position(&self, length: usize) -> Result<usize> {
        match self.position.checked_add(length) {
            Some(end) if end <= self.data.len() => Ok(end),
            _ => Err(OutOfBounds),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn records_and_alignment() {
        let data = [0x01, 0xAA, 0xBB, 0xCC, 0x10, 0x20, 0x30, 0x40];
        let mut parser = Parser::new(&data);

        assert_eq!(parser.read_le::<u8>().unwrap(), 0x01);
        parser.align(4).unwrap();
        assert_eq!(parser.pos(), 4);
        assert_eq!(parser.read_record::<4>().unwrap(), &[0x10, 0x20, 0x30, 0x40]);
        assert!(!parser.has_more_data());
        assert!(matches!(parser.read_le::<u8>(), Err(Error::OutOfBounds)));
    }

    #[test]
    fn utf16_cstr() {
        let data = [b'O', 0, b'L', 0, b'E', 0, 0, 0, 0x7F];
        let mut parser = Parser::new(&data);
        assert_eq!(parser.read_utf16_cstr().unwrap(), "OLE");
        assert_eq!(parser.pos(), 8);
        assert_eq!(parser.remaining(), 1);
    }

    #[test]
    fn unterminated_utf16_restores_cursor() {
        let data = [b'O', 0, b'L', 0];
        let mut parser = Parser::new(&data);
        assert!(matches!(parser.read_utf16_cstr(), Err(Error::OutOfBounds)));
        assert_eq!(parser.pos(), 0);
    }

    #[test]
    fn unpaired_surrogate_is_malformed() {
        let data = [0x00, 0xD8, 0x41, 0x00, 0x00, 0x00];
        let mut parser = Parser::new(&data);
        assert!(matches!(
            parser.read_utf16_cstr(),
            Err(Error::Malformed { .. })
        ));
    }

    #[test]
    fn seek_bounds() {
        let data = [0u8; 4];
        let mut parser = Parser::new(&data);
        parser.seek(4).unwrap();
        assert!(parser.seek(5).is_err());
        assert!(parser.advance_by(1).is_err());
        assert!(Parser::new(&[]).is_empty());
    }
}
