//! Endian-aware, bounds-checked reading and writing of primitive values.
//!
//! Mapped regions and marshal packets are plain byte buffers whose layouts are defined
//! by external formats. This module reads and writes the fixed-width fields of those
//! layouts without ever indexing past the end of a buffer.
//!
//! # Key Components
//!
//! - [`crate::io::NativeIO`] - Byte-order conversion for the primitive field types
//! - [`crate::io::read_le`] / [`crate::io::read_le_at`] / [`crate::io::read_be_at`] - Offset-advancing reads
//! - [`crate::io::write_le_at`] - Offset-advancing writes
//! - [`crate::io::Parser`] - Cursor over a buffer for record-by-record decoding
//!
//! All functions are pure and thread-safe; each caller keeps its own offset.

mod parser;

pub use parser::Parser;

use crate::{Error::OutOfBounds, Result};

/// Byte-order conversion for fixed-width primitive types.
pub trait NativeIO: Sized + Copy {
    /// The fixed-size byte array holding one value
    type Bytes: Sized + AsRef<[u8]> + for<'a> TryFrom<&'a [u8]>;

    /// Decode from little-endian bytes
    fn from_le_bytes(bytes: Self::Bytes) -> Self;
    /// Decode from big-endian bytes
    fn from_be_bytes(bytes: Self::Bytes) -> Self;
    /// Encode as little-endian bytes
    fn to_le_bytes(self) -> Self::Bytes;
}

macro_rules! impl_native_io {
    ($($ty:ty),* $(,)?) => {
        $(
            impl NativeIO for $ty {
                type Bytes = [u8; std::mem::size_of::<$ty>()];

                fn from_le_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_le_bytes(bytes)
                }

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_le_bytes(self) -> Self::Bytes {
                    <$ty>::to_le_bytes(self)
                }
            }
        )*
    };
}

impl_native_io!(u8, i8, u16, i16, u32, i32, u64, i64);

fn field<T: NativeIO>(data: &[u8], offset: usize) -> Result<T::Bytes> {
    let end = offset
        .checked_add(std::mem::size_of::<T>())
        .ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    T::Bytes::try_from(&data[offset..end]).map_err(|_| OutOfBounds)
}

/// Reads a little-endian `T` from the start of `data`.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if `data` is too short.
pub fn read_le<T: NativeIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_le_at(data, &mut offset)
}

/// Reads a little-endian `T` at `offset` and advances the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain;
/// the offset is left untouched.
pub fn read_le_at<T: NativeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let bytes = field::<T>(data, *offset)?;
    *offset += std::mem::size_of::<T>();
    Ok(T::from_le_bytes(bytes))
}

/// Reads a big-endian `T` at `offset` and advances the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn read_be_at<T: NativeIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let bytes = field::<T>(data, *offset)?;
    *offset += std::mem::size_of::<T>();
    Ok(T::from_be_bytes(bytes))
}

/// Writes `value` little-endian at `offset` and advances the offset past it.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if fewer than `size_of::<T>()` bytes remain.
pub fn write_le_at<T: NativeIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let end = offset.checked_add(type_len).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(value.to_le_bytes().as_ref());
    *offset = end;
    Ok(())
}

/// Copies `bytes` to `offset` and advances the offset past them.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too short.
pub fn write_bytes_at(data: &mut [u8], offset: &mut usize, bytes: &[u8]) -> Result<()> {
    let end = offset.checked_add(bytes.len()).ok_or(OutOfBounds)?;
    if end > data.len() {
        return Err(OutOfBounds);
    }

    data[*offset..end].copy_from_slice(bytes);
    *offset = end;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn read_advances_offset() {
        let data = [0x01, 0x00, 0x02, 0x00, 0x78, 0x56, 0x34, 0x12];
        let mut offset = 0;
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 1);
        assert_eq!(read_le_at::<u16>(&data, &mut offset).unwrap(), 2);
        assert_eq!(read_le_at::<u32>(&data, &mut offset).unwrap(), 0x1234_5678);
        assert_eq!(offset, 8);

        let mut offset = 4;
        assert_eq!(read_be_at::<u32>(&data, &mut offset).unwrap(), 0x7856_3412);
    }

    #[test]
    fn read_past_end_fails_without_moving() {
        let data = [0xFF, 0xFF, 0xFF];
        let mut offset = 0;
        assert!(matches!(
            read_le_at::<u32>(&data, &mut offset),
            Err(Error::OutOfBounds)
        ));
        assert_eq!(offset, 0);

        let mut offset = usize::MAX;
        assert!(read_le_at::<u8>(&data, &mut offset).is_err());
    }

    #[test]
    fn write_then_read() {
        let mut data = [0u8; 12];
        let mut offset = 0;
        write_le_at(&mut data, &mut offset, 0x574F_454D_u32).unwrap();
        write_le_at(&mut data, &mut offset, -2_i64).unwrap();
        assert_eq!(&data[..4], b"MEOW");
        assert_eq!(read_le::<u32>(&data).unwrap(), 0x574F_454D);

        let mut offset = 10;
        assert!(write_le_at(&mut data, &mut offset, 1_u32).is_err());
        assert!(write_bytes_at(&mut data, &mut offset, &[1, 2]).is_ok());
        assert_eq!(offset, 12);
    }
}
