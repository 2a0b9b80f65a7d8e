//! Big-endian reading and writing primitives for class file data.
//!
//! Every multi-byte quantity in a class file is stored big-endian (JVMS §4). This module provides
//! the [`ClassIO`] trait that abstracts over the fixed-size primitive types used by the format and
//! a small set of bounds-checked helpers built on top of it.
//!
//! # Key Components
//!
//! - [`ClassIO`] - Trait defining big-endian conversion for primitive types
//! - [`read_be`] / [`read_be_at`] - Bounds-checked reads, the latter advancing an offset
//! - [`write_be_at`] - Bounds-checked in-place writes, used to patch already emitted data
//!
//! # Examples
//!
//! ```rust
//! use threadscope::classfile::io::{read_be, read_be_at};
//!
//! let data = [0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x34];
//! assert_eq!(read_be::<u32>(&data)?, 0xCAFE_BABE);
//!
//! let mut offset = 4;
//! let major: u16 = read_be_at(&data, &mut offset)?;
//! assert_eq!(major, 52);
//! assert_eq!(offset, 6);
//! # Ok::<(), threadscope::Error>(())
//! ```

use crate::Result;

/// Trait for type-specific, big-endian binary conversion.
///
/// Each implementation defines a `Bytes` associated type that represents the fixed-size byte
/// array required for that particular type (e.g., `[u8; 4]` for `u32`).
pub trait ClassIO: Sized {
    /// Associated type representing the byte array type for this numeric type.
    type Bytes: Sized + for<'a> TryFrom<&'a [u8]> + AsRef<[u8]>;

    /// Read T from a byte buffer in big-endian
    fn from_be_bytes(bytes: Self::Bytes) -> Self;

    /// Write T to a byte buffer in big-endian
    fn to_be_bytes(self) -> Self::Bytes;
}

macro_rules! impl_class_io {
    ($($ty:ty => $len:expr),* $(,)?) => {
        $(
            impl ClassIO for $ty {
                type Bytes = [u8; $len];

                fn from_be_bytes(bytes: Self::Bytes) -> Self {
                    <$ty>::from_be_bytes(bytes)
                }

                fn to_be_bytes(self) -> Self::Bytes {
                    <$ty>::to_be_bytes(self)
                }
            }
        )*
    };
}

impl_class_io! {
    u8 => 1,
    i8 => 1,
    u16 => 2,
    i16 => 2,
    u32 => 4,
    i32 => 4,
    u64 => 8,
    i64 => 8,
}

/// Safely reads a value of type `T` in big-endian byte order from the start of a buffer.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be<T: ClassIO>(data: &[u8]) -> Result<T> {
    let mut offset = 0_usize;
    read_be_at(data, &mut offset)
}

/// Safely reads a value of type `T` in big-endian byte order at `offset`, advancing the offset
/// by the number of bytes read.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if there are insufficient bytes.
pub fn read_be_at<T: ClassIO>(data: &[u8], offset: &mut usize) -> Result<T> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    let Ok(read) = data[*offset..end].try_into() else {
        return Err(out_of_bounds_error!());
    };

    *offset = end;

    Ok(T::from_be_bytes(read))
}

/// Safely writes a value of type `T` in big-endian byte order at `offset`, advancing the offset
/// by the number of bytes written.
///
/// # Errors
/// Returns [`crate::Error::OutOfBounds`] if the buffer is too small.
pub fn write_be_at<T: ClassIO>(data: &mut [u8], offset: &mut usize, value: T) -> Result<()> {
    let type_len = std::mem::size_of::<T>();
    let Some(end) = offset.checked_add(type_len) else {
        return Err(out_of_bounds_error!());
    };
    if end > data.len() {
        return Err(out_of_bounds_error!());
    }

    data[*offset..end].copy_from_slice(value.to_be_bytes().as_ref());
    *offset = end;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_BUFFER: [u8; 8] = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];

    #[test]
    fn read_be_u16() {
        let result = read_be::<u16>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0102);
    }

    #[test]
    fn read_be_i32() {
        let result = read_be::<i32>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0102_0304);
    }

    #[test]
    fn read_be_u64() {
        let result = read_be::<u64>(&TEST_BUFFER).unwrap();
        assert_eq!(result, 0x0102_0304_0506_0708);
    }

    #[test]
    fn read_be_negative() {
        let data = [0xFF, 0xFE];
        assert_eq!(read_be::<i16>(&data).unwrap(), -2);
    }

    #[test]
    fn read_at_advances() {
        let mut offset = 2;
        let value: u16 = read_be_at(&TEST_BUFFER, &mut offset).unwrap();
        assert_eq!(value, 0x0304);
        assert_eq!(offset, 4);
    }

    #[test]
    fn read_past_end() {
        let mut offset = 6;
        assert!(read_be_at::<u32>(&TEST_BUFFER, &mut offset).is_err());
        assert_eq!(offset, 6);
    }

    #[test]
    fn write_and_patch() {
        let mut data = [0u8; 6];
        let mut offset = 0;
        write_be_at(&mut data, &mut offset, 0xCAFE_u16).unwrap();
        write_be_at(&mut data, &mut offset, -1_i32).unwrap();
        assert_eq!(data, [0xCA, 0xFE, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(offset, 6);

        assert!(write_be_at(&mut data, &mut offset, 1_u8).is_err());
    }
}
