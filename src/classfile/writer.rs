//! Growable big-endian output buffer for class file structures.
//!
//! [`ClassWriter`] is the emitting counterpart of [`crate::Parser`]: every structure that can be
//! parsed from a class file knows how to write itself back through it. Length fields that are
//! only known after their payload has been written are reserved first and patched afterwards.
//!
//! # Examples
//!
//! ```rust
//! use threadscope::classfile::ClassWriter;
//!
//! let mut writer = ClassWriter::new();
//! let length_at = writer.reserve_u32();
//! writer.write_be(0xCAFE_u16);
//! writer.patch_length(length_at)?;
//!
//! assert_eq!(writer.into_inner(), vec![0, 0, 0, 2, 0xCA, 0xFE]);
//! # Ok::<(), threadscope::Error>(())
//! ```

use crate::{
    classfile::io::{write_be_at, ClassIO},
    Result,
};

/// Sequential writer producing big-endian class file data.
#[derive(Debug, Default)]
pub struct ClassWriter {
    data: Vec<u8>,
}

impl ClassWriter {
    /// Create an empty writer.
    #[must_use]
    pub fn new() -> Self {
        ClassWriter { data: Vec::new() }
    }

    /// Create an empty writer with room for `capacity` bytes.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        ClassWriter {
            data: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.data.len()
    }

    /// Append a value in big-endian byte order.
    pub fn write_be<T: ClassIO>(&mut self, value: T) {
        self.data.extend_from_slice(value.to_be_bytes().as_ref());
    }

    /// Append raw bytes.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Append a `u16` length prefix followed by `bytes`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `bytes` is longer than 65535.
    pub fn write_prefixed_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        let Ok(len) = u16::try_from(bytes.len()) else {
            return Err(malformed_error!(
                "Length {} does not fit a u16 prefix",
                bytes.len()
            ));
        };
        self.write_be(len);
        self.write_bytes(bytes);
        Ok(())
    }

    /// Reserve four bytes for a length to be filled in by [`ClassWriter::patch_length`].
    pub fn reserve_u32(&mut self) -> usize {
        let at = self.data.len();
        self.write_be(0_u32);
        at
    }

    /// Patch the reserved `u32` at `at` with the number of bytes written after it.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if `at` was not obtained from this writer, or
    /// [`crate::Error::Malformed`] if the payload exceeds `u32::MAX` bytes.
    pub fn patch_length(&mut self, at: usize) -> Result<()> {
        let Some(payload) = self.data.len().checked_sub(at + 4) else {
            return Err(out_of_bounds_error!());
        };
        let Ok(payload) = u32::try_from(payload) else {
            return Err(malformed_error!("Attribute payload of {} bytes", payload));
        };

        let mut offset = at;
        write_be_at(&mut self.data, &mut offset, payload)
    }

    /// Overwrite an already written value at `at`.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the value does not fit the written data.
    pub fn patch_be<T: ClassIO>(&mut self, at: usize, value: T) -> Result<()> {
        let mut offset = at;
        write_be_at(&mut self.data, &mut offset, value)
    }

    /// Borrow the bytes written so far.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Consume the writer and return its buffer.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_bytes() {
        let mut writer = ClassWriter::new();
        writer.write_prefixed_bytes(b"run").unwrap();
        assert_eq!(writer.as_slice(), &[0, 3, b'r', b'u', b'n']);

        let huge = vec![0u8; 70_000];
        assert!(writer.write_prefixed_bytes(&huge).is_err());
    }

    #[test]
    fn patch_values() {
        let mut writer = ClassWriter::with_capacity(8);
        writer.write_be(0_u16);
        writer.write_be(7_u8);
        writer.patch_be(0, 0x1234_u16).unwrap();
        assert_eq!(writer.as_slice(), &[0x12, 0x34, 7]);
        assert!(writer.patch_be(2, 0_u16).is_err());
    }

    #[test]
    fn patch_length_rejects_foreign_offset() {
        let mut writer = ClassWriter::new();
        writer.write_be(1_u8);
        assert!(writer.patch_length(4).is_err());
    }
}
