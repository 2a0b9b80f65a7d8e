//! The class file constant pool.
//!
//! The pool is kept in its on-disk shape: one [`Constant`] per slot, with the slot following
//! every `Long` and `Double` marked [`Constant::Unusable`], so indices taken from bytecode and
//! attributes address [`ConstantPool`] entries directly. `Utf8` entries keep their raw modified
//! UTF-8 bytes, which makes writing an unchanged pool reproduce its input byte for byte.
//!
//! Rewriting code needs new symbolic references. The `add_*` methods return the index of an
//! existing, equal entry when there is one and only append otherwise.
//!
//! # Examples
//!
//! ```rust
//! use threadscope::classfile::ConstantPool;
//!
//! let mut pool = ConstantPool::new();
//! let start = pool.add_methodref("java/lang/Thread", "start", "()V")?;
//! assert_eq!(pool.add_methodref("java/lang/Thread", "start", "()V")?, start);
//!
//! let member = pool.member_ref(start)?;
//! assert_eq!(member.owner, "java/lang/Thread");
//! assert_eq!(member.name, "start");
//! # Ok::<(), threadscope::Error>(())
//! ```

use strum::IntoStaticStr;

use crate::{
    classfile::{parser::Parser, writer::ClassWriter},
    Error, Result,
};

const TAG_UTF8: u8 = 1;
const TAG_INTEGER: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_LONG: u8 = 5;
const TAG_DOUBLE: u8 = 6;
const TAG_CLASS: u8 = 7;
const TAG_STRING: u8 = 8;
const TAG_FIELDREF: u8 = 9;
const TAG_METHODREF: u8 = 10;
const TAG_INTERFACE_METHODREF: u8 = 11;
const TAG_NAME_AND_TYPE: u8 = 12;
const TAG_METHOD_HANDLE: u8 = 15;
const TAG_METHOD_TYPE: u8 = 16;
const TAG_DYNAMIC: u8 = 17;
const TAG_INVOKE_DYNAMIC: u8 = 18;
const TAG_MODULE: u8 = 19;
const TAG_PACKAGE: u8 = 20;

/// Largest number of slots a constant pool can have, including the unused slot 0.
const MAX_SLOTS: usize = u16::MAX as usize;

/// One constant pool slot.
///
/// Floating point constants are stored as their raw bit patterns so that equality (and with it
/// de-duplication) is exact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum Constant {
    /// Modified UTF-8 text, raw
    Utf8(Vec<u8>),
    /// 32-bit integer
    Integer(i32),
    /// 32-bit float, as bits
    Float(u32),
    /// 64-bit integer, occupies two slots
    Long(i64),
    /// 64-bit float as bits, occupies two slots
    Double(u64),
    /// Class or interface, by index of its internal name
    Class(u16),
    /// String literal, by index of its text
    String(u16),
    /// Field reference
    Fieldref {
        /// Index of the owning [`Constant::Class`]
        class: u16,
        /// Index of the [`Constant::NameAndType`]
        name_and_type: u16,
    },
    /// Class method reference
    Methodref {
        /// Index of the owning [`Constant::Class`]
        class: u16,
        /// Index of the [`Constant::NameAndType`]
        name_and_type: u16,
    },
    /// Interface method reference
    InterfaceMethodref {
        /// Index of the owning [`Constant::Class`]
        class: u16,
        /// Index of the [`Constant::NameAndType`]
        name_and_type: u16,
    },
    /// Name and descriptor pair
    NameAndType {
        /// Index of the name
        name: u16,
        /// Index of the descriptor
        descriptor: u16,
    },
    /// Method handle
    MethodHandle {
        /// Reference kind (1-9)
        kind: u8,
        /// Index of the referenced member
        reference: u16,
    },
    /// Method type, by index of its descriptor
    MethodType(u16),
    /// Dynamically computed constant
    Dynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap: u16,
        /// Index of the [`Constant::NameAndType`]
        name_and_type: u16,
    },
    /// Dynamically computed call site
    InvokeDynamic {
        /// Index into the `BootstrapMethods` attribute
        bootstrap: u16,
        /// Index of the [`Constant::NameAndType`]
        name_and_type: u16,
    },
    /// Module, by index of its name
    Module(u16),
    /// Package, by index of its name
    Package(u16),
    /// Slot 0 and the slot after a `Long` or `Double`
    Unusable,
}

impl Constant {
    /// Number of pool slots this constant occupies.
    #[must_use]
    pub fn slots(&self) -> usize {
        match self {
            Constant::Long(_) | Constant::Double(_) => 2,
            _ => 1,
        }
    }

    fn parse(parser: &mut Parser) -> Result<Constant> {
        let tag = parser.read_be::<u8>()?;
        let constant = match tag {
            TAG_UTF8 => Constant::Utf8(parser.read_prefixed_bytes()?.to_vec()),
            TAG_INTEGER => Constant::Integer(parser.read_be()?),
            TAG_FLOAT => Constant::Float(parser.read_be()?),
            TAG_LONG => Constant::Long(parser.read_be()?),
            TAG_DOUBLE => Constant::Double(parser.read_be()?),
            TAG_CLASS => Constant::Class(parser.read_be()?),
            TAG_STRING => Constant::String(parser.read_be()?),
            TAG_FIELDREF => Constant::Fieldref {
                class: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            TAG_METHODREF => Constant::Methodref {
                class: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            TAG_INTERFACE_METHODREF => Constant::InterfaceMethodref {
                class: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            TAG_NAME_AND_TYPE => Constant::NameAndType {
                name: parser.read_be()?,
                descriptor: parser.read_be()?,
            },
            TAG_METHOD_HANDLE => Constant::MethodHandle {
                kind: parser.read_be()?,
                reference: parser.read_be()?,
            },
            TAG_METHOD_TYPE => Constant::MethodType(parser.read_be()?),
            TAG_DYNAMIC => Constant::Dynamic {
                bootstrap: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            TAG_INVOKE_DYNAMIC => Constant::InvokeDynamic {
                bootstrap: parser.read_be()?,
                name_and_type: parser.read_be()?,
            },
            TAG_MODULE => Constant::Module(parser.read_be()?),
            TAG_PACKAGE => Constant::Package(parser.read_be()?),
            _ => {
                return Err(malformed_error!(
                    "Unknown constant pool tag {} at offset {}",
                    tag,
                    parser.pos() - 1
                ))
            }
        };

        Ok(constant)
    }

    fn write(&self, writer: &mut ClassWriter) -> Result<()> {
        match self {
            Constant::Utf8(bytes) => {
                writer.write_be(TAG_UTF8);
                writer.write_prefixed_bytes(bytes)?;
            }
            Constant::Integer(value) => {
                writer.write_be(TAG_INTEGER);
                writer.write_be(*value);
            }
            Constant::Float(bits) => {
                writer.write_be(TAG_FLOAT);
                writer.write_be(*bits);
            }
            Constant::Long(value) => {
                writer.write_be(TAG_LONG);
                writer.write_be(*value);
            }
            Constant::Double(bits) => {
                writer.write_be(TAG_DOUBLE);
                writer.write_be(*bits);
            }
            Constant::Class(name) => {
                writer.write_be(TAG_CLASS);
                writer.write_be(*name);
            }
            Constant::String(text) => {
                writer.write_be(TAG_STRING);
                writer.write_be(*text);
            }
            Constant::Fieldref {
                class,
                name_and_type,
            } => {
                writer.write_be(TAG_FIELDREF);
                writer.write_be(*class);
                writer.write_be(*name_and_type);
            }
            Constant::Methodref {
                class,
                name_and_type,
            } => {
                writer.write_be(TAG_METHODREF);
                writer.write_be(*class);
                writer.write_be(*name_and_type);
            }
            Constant::InterfaceMethodref {
                class,
                name_and_type,
            } => {
                writer.write_be(TAG_INTERFACE_METHODREF);
                writer.write_be(*class);
                writer.write_be(*name_and_type);
            }
            Constant::NameAndType { name, descriptor } => {
                writer.write_be(TAG_NAME_AND_TYPE);
                writer.write_be(*name);
                writer.write_be(*descriptor);
            }
            Constant::MethodHandle { kind, reference } => {
                writer.write_be(TAG_METHOD_HANDLE);
                writer.write_be(*kind);
                writer.write_be(*reference);
            }
            Constant::MethodType(descriptor) => {
                writer.write_be(TAG_METHOD_TYPE);
                writer.write_be(*descriptor);
            }
            Constant::Dynamic {
                bootstrap,
                name_and_type,
            } => {
                writer.write_be(TAG_DYNAMIC);
                writer.write_be(*bootstrap);
                writer.write_be(*name_and_type);
            }
            Constant::InvokeDynamic {
                bootstrap,
                name_and_type,
            } => {
                writer.write_be(TAG_INVOKE_DYNAMIC);
                writer.write_be(*bootstrap);
                writer.write_be(*name_and_type);
            }
            Constant::Module(name) => {
                writer.write_be(TAG_MODULE);
                writer.write_be(*name);
            }
            Constant::Package(name) => {
                writer.write_be(TAG_PACKAGE);
                writer.write_be(*name);
            }
            Constant::Unusable => {}
        }

        Ok(())
    }
}

/// What a member reference points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// `CONSTANT_Fieldref`
    Field,
    /// `CONSTANT_Methodref`
    Method,
    /// `CONSTANT_InterfaceMethodref`
    InterfaceMethod,
}

/// A member reference with every index resolved to text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberRef {
    /// Kind of reference
    pub kind: MemberKind,
    /// Internal name of the referenced class
    pub owner: String,
    /// Member name
    pub name: String,
    /// Member descriptor
    pub descriptor: String,
}

/// The constant pool of one class file.
#[derive(Debug, Clone)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstantPool {
    /// Create an empty pool, holding only the reserved slot 0.
    #[must_use]
    pub fn new() -> Self {
        ConstantPool {
            entries: vec![Constant::Unusable],
        }
    }

    /// Parse `constant_pool_count` followed by the pool entries.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an empty pool or an unknown tag, and
    /// [`crate::Error::OutOfBounds`] if the data is truncated.
    pub fn parse(parser: &mut Parser) -> Result<Self> {
        let count = usize::from(parser.read_be::<u16>()?);
        if count == 0 {
            return Err(malformed_error!("Constant pool count of 0"));
        }

        let mut entries = Vec::with_capacity(count);
        entries.push(Constant::Unusable);
        while entries.len() < count {
            let constant = Constant::parse(parser)?;
            let slots = constant.slots();
            entries.push(constant);
            if slots == 2 {
                entries.push(Constant::Unusable);
            }
        }

        if entries.len() != count {
            return Err(malformed_error!(
                "Wide constant overruns the pool count of {}",
                count
            ));
        }

        Ok(ConstantPool { entries })
    }

    /// Write `constant_pool_count` followed by the pool entries.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool outgrew its count field.
    pub fn write(&self, writer: &mut ClassWriter) -> Result<()> {
        let Ok(count) = u16::try_from(self.entries.len()) else {
            return Err(Error::ConstantPoolFull);
        };
        writer.write_be(count);
        for constant in &self.entries[1..] {
            constant.write(writer)?;
        }
        Ok(())
    }

    /// The `constant_pool_count` value: number of slots including slot 0.
    #[must_use]
    pub fn count(&self) -> usize {
        self.entries.len()
    }

    /// Get the constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `index` is 0, out of range, or the second slot of
    /// a wide constant.
    pub fn get(&self, index: u16) -> Result<&Constant> {
        match self.entries.get(usize::from(index)) {
            Some(Constant::Unusable) | None => Err(malformed_error!(
                "Invalid constant pool index {} (count {})",
                index,
                self.entries.len()
            )),
            Some(constant) => Ok(constant),
        }
    }

    /// Raw modified UTF-8 bytes of the `Utf8` constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the slot is not a `Utf8` constant.
    pub fn utf8_bytes(&self, index: u16) -> Result<&[u8]> {
        match self.get(index)? {
            Constant::Utf8(bytes) => Ok(bytes),
            other => Err(self.unexpected(index, "Utf8", other)),
        }
    }

    /// Decoded text of the `Utf8` constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the slot is not a valid `Utf8` constant.
    pub fn utf8(&self, index: u16) -> Result<String> {
        decode_modified_utf8(self.utf8_bytes(index)?)
    }

    /// Internal name of the `Class` constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the slot is not a `Class` constant.
    pub fn class_name(&self, index: u16) -> Result<String> {
        match self.get(index)? {
            Constant::Class(name) => self.utf8(*name),
            other => Err(self.unexpected(index, "Class", other)),
        }
    }

    /// Name and descriptor of the `NameAndType` constant at `index`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the slot is not a `NameAndType` constant.
    pub fn name_and_type(&self, index: u16) -> Result<(String, String)> {
        match self.get(index)? {
            Constant::NameAndType { name, descriptor } => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            other => Err(self.unexpected(index, "NameAndType", other)),
        }
    }

    /// Resolve the field, method or interface method reference at `index` to text.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the slot is not a member reference or any of the
    /// entries it points at is invalid.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef> {
        let (kind, class, name_and_type) = match self.get(index)? {
            Constant::Fieldref {
                class,
                name_and_type,
            } => (MemberKind::Field, *class, *name_and_type),
            Constant::Methodref {
                class,
                name_and_type,
            } => (MemberKind::Method, *class, *name_and_type),
            Constant::InterfaceMethodref {
                class,
                name_and_type,
            } => (MemberKind::InterfaceMethod, *class, *name_and_type),
            other => return Err(self.unexpected(index, "member reference", other)),
        };

        let (name, descriptor) = self.name_and_type(name_and_type)?;
        Ok(MemberRef {
            kind,
            owner: self.class_name(class)?,
            name,
            descriptor,
        })
    }

    /// Index of a `Utf8` constant holding `text`, appending one if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn add_utf8(&mut self, text: &str) -> Result<u16> {
        self.add(Constant::Utf8(encode_modified_utf8(text)))
    }

    /// Index of a `Class` constant for `internal_name`, appending entries if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn add_class(&mut self, internal_name: &str) -> Result<u16> {
        let name = self.add_utf8(internal_name)?;
        self.add(Constant::Class(name))
    }

    /// Index of a `String` constant for `text`, appending entries if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn add_string(&mut self, text: &str) -> Result<u16> {
        let utf8 = self.add_utf8(text)?;
        self.add(Constant::String(utf8))
    }

    /// Index of a `NameAndType` constant, appending entries if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn add_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name = self.add_utf8(name)?;
        let descriptor = self.add_utf8(descriptor)?;
        self.add(Constant::NameAndType { name, descriptor })
    }

    /// Index of a `Methodref` constant, appending entries if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn add_methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::Methodref {
            class,
            name_and_type,
        })
    }

    /// Index of an `InterfaceMethodref` constant, appending entries if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn add_interface_methodref(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16> {
        let class = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::InterfaceMethodref {
            class,
            name_and_type,
        })
    }

    /// Index of a `Fieldref` constant, appending entries if needed.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn add_fieldref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class = self.add_class(owner)?;
        let name_and_type = self.add_name_and_type(name, descriptor)?;
        self.add(Constant::Fieldref {
            class,
            name_and_type,
        })
    }

    fn add(&mut self, constant: Constant) -> Result<u16> {
        if let Some(existing) = self.entries.iter().position(|entry| *entry == constant) {
            return u16::try_from(existing).map_err(|_| Error::ConstantPoolFull);
        }

        let index = self.entries.len();
        if index + constant.slots() > MAX_SLOTS {
            return Err(Error::ConstantPoolFull);
        }

        let wide = constant.slots() == 2;
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }

        u16::try_from(index).map_err(|_| Error::ConstantPoolFull)
    }

    fn unexpected(&self, index: u16, expected: &str, found: &Constant) -> Error {
        let found: &'static str = found.into();
        malformed_error!(
            "Constant pool index {} is {}, expected {}",
            index,
            found,
            expected
        )
    }
}

/// Decode the modified UTF-8 used by class files into a Rust string.
///
/// Supplementary characters are stored as surrogate pairs; lone surrogates are replaced with
/// U+FFFD.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for an invalid byte sequence.
pub fn decode_modified_utf8(bytes: &[u8]) -> Result<String> {
    if bytes.is_ascii() && !bytes.contains(&0) {
        return Ok(bytes.iter().map(|&b| char::from(b)).collect());
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut position = 0;
    while position < bytes.len() {
        let first = u16::from(bytes[position]);
        let (unit, width) = match first {
            0x01..=0x7F => (first, 1),
            0xC0..=0xDF => {
                let second = continuation(bytes, position + 1)?;
                (((first & 0x1F) << 6) | second, 2)
            }
            0xE0..=0xEF => {
                let second = continuation(bytes, position + 1)?;
                let third = continuation(bytes, position + 2)?;
                (((first & 0x0F) << 12) | (second << 6) | third, 3)
            }
            _ => {
                return Err(malformed_error!(
                    "Invalid modified UTF-8 byte 0x{:02X} at {}",
                    first,
                    position
                ))
            }
        };
        units.push(unit);
        position += width;
    }

    Ok(char::decode_utf16(units)
        .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

fn continuation(bytes: &[u8], position: usize) -> Result<u16> {
    match bytes.get(position) {
        Some(&byte) if byte & 0xC0 == 0x80 => Ok(u16::from(byte & 0x3F)),
        _ => Err(malformed_error!(
            "Truncated modified UTF-8 sequence at {}",
            position
        )),
    }
}

/// Encode a Rust string as class file modified UTF-8.
#[must_use]
pub fn encode_modified_utf8(text: &str) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(text.len());
    for unit in text.encode_utf16() {
        match unit {
            0x0001..=0x007F => bytes.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                bytes.push(0xC0 | (unit >> 6) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                bytes.push(0xE0 | (unit >> 12) as u8);
                bytes.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                bytes.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    bytes
}
