//! JVM class file model.
//!
//! This module parses a class file into a [`ClassFile`] that can be edited and written back.
//! The model keeps everything it does not need to understand as raw bytes: attributes are
//! opaque [`Attribute`] values, `Utf8` constants keep their encoded form, and a class that is
//! parsed and written without edits comes out byte-identical.
//!
//! # Architecture
//!
//! - [`io`] / [`parser`] / [`writer`] - Big-endian primitives, the read cursor and the output buffer
//! - [`constpool`] - The constant pool with de-duplicating appenders
//! - [`attributes`] - Raw attributes plus the decoded `Code` family
//! - [`stackmap`] - `StackMapTable` frames with absolute offsets
//! - [`descriptor`] - Just enough descriptor parsing for code generation
//! - [`builder`] - Assembles class files from scratch, for tests and tools
//!
//! # Examples
//!
//! ```rust
//! use threadscope::classfile::{ClassBuilder, ClassFile};
//!
//! let bytes = ClassBuilder::new("com/example/Runner", "java/lang/Object").build()?;
//! let class = ClassFile::parse(&bytes)?;
//!
//! assert_eq!(class.name()?, "com/example/Runner");
//! assert_eq!(class.super_name()?.as_deref(), Some("java/lang/Object"));
//! assert_eq!(class.to_bytes()?, bytes);
//! # Ok::<(), threadscope::Error>(())
//! ```

pub mod attributes;
pub mod builder;
pub mod constpool;
pub mod descriptor;
pub mod io;
pub mod parser;
pub mod stackmap;
pub mod writer;

use bitflags::bitflags;

pub use attributes::{Attribute, CodeAttribute, ExceptionEntry, LineNumber, LocalVariable};
pub use builder::ClassBuilder;
pub use constpool::{Constant, ConstantPool, MemberKind, MemberRef};
pub use writer::ClassWriter;

use crate::{Error, Parser, Result};

/// The magic number every class file starts with.
pub const MAGIC: u32 = 0xCAFE_BABE;

bitflags! {
    /// Access and property flags of a class or interface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassAccessFlags: u16 {
        /// Accessible from outside its package
        const PUBLIC = 0x0001;
        /// No subclasses allowed
        const FINAL = 0x0010;
        /// Treat superclass methods specially in `invokespecial`
        const SUPER = 0x0020;
        /// Is an interface
        const INTERFACE = 0x0200;
        /// Must not be instantiated
        const ABSTRACT = 0x0400;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
        /// Is an annotation interface
        const ANNOTATION = 0x2000;
        /// Is an enum class
        const ENUM = 0x4000;
        /// Is a module descriptor
        const MODULE = 0x8000;
    }
}

bitflags! {
    /// Access and property flags of a method.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodAccessFlags: u16 {
        /// Accessible from outside its package
        const PUBLIC = 0x0001;
        /// Accessible only within the defining class
        const PRIVATE = 0x0002;
        /// Accessible within subclasses
        const PROTECTED = 0x0004;
        /// Has no receiver
        const STATIC = 0x0008;
        /// Must not be overridden
        const FINAL = 0x0010;
        /// Invocation is wrapped by a monitor
        const SYNCHRONIZED = 0x0020;
        /// Compiler-generated bridge
        const BRIDGE = 0x0040;
        /// Variable number of arguments
        const VARARGS = 0x0080;
        /// Implemented outside the JVM
        const NATIVE = 0x0100;
        /// No implementation
        const ABSTRACT = 0x0400;
        /// Strict floating point
        const STRICT = 0x0800;
        /// Not present in source code
        const SYNTHETIC = 0x1000;
    }
}

/// A field or method.
///
/// Fields and methods share one layout; the flags are kept raw because the same bit means
/// different things for each (see [`MemberInfo::method_flags`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Raw access flags
    pub access_flags: u16,
    /// Constant pool index of the name
    pub name_index: u16,
    /// Constant pool index of the descriptor
    pub descriptor_index: u16,
    /// Member attributes (`Code` for methods with a body)
    pub attributes: Vec<Attribute>,
}

impl MemberInfo {
    fn parse(parser: &mut Parser) -> Result<Self> {
        Ok(MemberInfo {
            access_flags: parser.read_be()?,
            name_index: parser.read_be()?,
            descriptor_index: parser.read_be()?,
            attributes: Attribute::parse_list(parser)?,
        })
    }

    fn write(&self, writer: &mut ClassWriter) -> Result<()> {
        writer.write_be(self.access_flags);
        writer.write_be(self.name_index);
        writer.write_be(self.descriptor_index);
        Attribute::write_list(&self.attributes, writer)
    }

    /// The access flags interpreted as method flags.
    #[must_use]
    pub fn method_flags(&self) -> MethodAccessFlags {
        MethodAccessFlags::from_bits_retain(self.access_flags)
    }

    /// Position of the first attribute called `name`.
    #[must_use]
    pub fn find_attribute(&self, pool: &ConstantPool, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.is(pool, name))
    }
}

/// A parsed class file.
#[derive(Debug, Clone)]
pub struct ClassFile {
    /// Minor version
    pub minor_version: u16,
    /// Major version (52 = Java 8, 61 = Java 17, ...)
    pub major_version: u16,
    /// The constant pool
    pub constant_pool: ConstantPool,
    /// Class access flags
    pub access_flags: ClassAccessFlags,
    /// Constant pool index of this class
    pub this_class: u16,
    /// Constant pool index of the superclass, 0 for `java/lang/Object` and module descriptors
    pub super_class: u16,
    /// Constant pool indices of the direct superinterfaces
    pub interfaces: Vec<u16>,
    /// Fields
    pub fields: Vec<MemberInfo>,
    /// Methods
    pub methods: Vec<MemberInfo>,
    /// Class attributes
    pub attributes: Vec<Attribute>,
}

impl ClassFile {
    /// Parse a complete class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::Empty`] for empty input, [`crate::Error::Malformed`] for a bad
    /// magic number, invalid structure or trailing data, and [`crate::Error::OutOfBounds`] if the
    /// data is truncated.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::Empty);
        }

        let mut parser = Parser::new(data);
        let magic = parser.read_be::<u32>()?;
        if magic != MAGIC {
            return Err(malformed_error!("Invalid magic 0x{:08X}", magic));
        }

        let minor_version = parser.read_be()?;
        let major_version = parser.read_be()?;
        let constant_pool = ConstantPool::parse(&mut parser)?;
        let access_flags = ClassAccessFlags::from_bits_retain(parser.read_be()?);
        let this_class = parser.read_be()?;
        let super_class = parser.read_be()?;

        let interface_count = parser.read_be::<u16>()?;
        let interfaces = (0..interface_count)
            .map(|_| parser.read_be::<u16>())
            .collect::<Result<Vec<_>>>()?;

        let field_count = parser.read_be::<u16>()?;
        let fields = (0..field_count)
            .map(|_| MemberInfo::parse(&mut parser))
            .collect::<Result<Vec<_>>>()?;

        let method_count = parser.read_be::<u16>()?;
        let methods = (0..method_count)
            .map(|_| MemberInfo::parse(&mut parser))
            .collect::<Result<Vec<_>>>()?;

        let attributes = Attribute::parse_list(&mut parser)?;

        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after class file",
                parser.len() - parser.pos()
            ));
        }

        let class = ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        };
        class.name()?;

        Ok(class)
    }

    /// Serialize the class file.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool outgrew its count field and
    /// [`crate::Error::Malformed`] if a table outgrew its count field.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut writer = ClassWriter::with_capacity(4096);
        writer.write_be(MAGIC);
        writer.write_be(self.minor_version);
        writer.write_be(self.major_version);
        self.constant_pool.write(&mut writer)?;
        writer.write_be(self.access_flags.bits());
        writer.write_be(self.this_class);
        writer.write_be(self.super_class);

        writer.write_be(count_u16(self.interfaces.len(), "interfaces")?);
        for interface in &self.interfaces {
            writer.write_be(*interface);
        }

        writer.write_be(count_u16(self.fields.len(), "fields")?);
        for field in &self.fields {
            field.write(&mut writer)?;
        }

        writer.write_be(count_u16(self.methods.len(), "methods")?);
        for method in &self.methods {
            method.write(&mut writer)?;
        }

        Attribute::write_list(&self.attributes, &mut writer)?;
        Ok(writer.into_inner())
    }

    /// Internal name of this class.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `this_class` is not a `Class` constant.
    pub fn name(&self) -> Result<String> {
        self.constant_pool.class_name(self.this_class)
    }

    /// Internal name of the superclass, `None` for `java/lang/Object`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `super_class` is not a `Class` constant.
    pub fn super_name(&self) -> Result<Option<String>> {
        if self.super_class == 0 {
            return Ok(None);
        }
        self.constant_pool.class_name(self.super_class).map(Some)
    }

    /// Internal names of the direct superinterfaces.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an entry is not a `Class` constant.
    pub fn interface_names(&self) -> Result<Vec<String>> {
        self.interfaces
            .iter()
            .map(|&index| self.constant_pool.class_name(index))
            .collect()
    }

    /// Name of a field or method.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the name index is not a `Utf8` constant.
    pub fn member_name(&self, member: &MemberInfo) -> Result<String> {
        self.constant_pool.utf8(member.name_index)
    }

    /// Descriptor of a field or method.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the descriptor index is not a `Utf8` constant.
    pub fn member_descriptor(&self, member: &MemberInfo) -> Result<String> {
        self.constant_pool.utf8(member.descriptor_index)
    }

    /// Whether this class file describes an interface.
    #[must_use]
    pub fn is_interface(&self) -> bool {
        self.access_flags.contains(ClassAccessFlags::INTERFACE)
    }
}

fn count_u16(len: usize, what: &str) -> Result<u16> {
    u16::try_from(len).map_err(|_| malformed_error!("{} {} exceed the class file limit", len, what))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut builder = ClassBuilder::new("com/example/Sample", "java/lang/Thread");
        builder.interface("java/lang/Runnable");
        builder.field(0x0002, "count", "I");
        builder.method(
            0x0001,
            "run",
            "()V",
            CodeAttribute {
                max_stack: 0,
                max_locals: 1,
                code: vec![0xB1],
                exception_table: Vec::new(),
                attributes: Vec::new(),
            },
        );
        builder.build().unwrap()
    }

    #[test]
    fn parse_and_reproduce() {
        let bytes = sample();
        let class = ClassFile::parse(&bytes).unwrap();

        assert_eq!(class.name().unwrap(), "com/example/Sample");
        assert_eq!(class.super_name().unwrap().unwrap(), "java/lang/Thread");
        assert_eq!(class.interface_names().unwrap(), vec!["java/lang/Runnable"]);
        assert_eq!(class.fields.len(), 1);
        assert_eq!(class.member_name(&class.methods[0]).unwrap(), "run");
        assert_eq!(class.member_descriptor(&class.methods[0]).unwrap(), "()V");
        assert!(class.methods[0].method_flags().contains(MethodAccessFlags::PUBLIC));
        assert!(!class.is_interface());
        assert_eq!(
            class.methods[0].find_attribute(&class.constant_pool, attributes::CODE),
            Some(0)
        );

        assert_eq!(class.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn reject_bad_input() {
        assert!(matches!(ClassFile::parse(&[]), Err(Error::Empty)));
        assert!(matches!(
            ClassFile::parse(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 52]),
            Err(Error::Malformed { .. })
        ));

        let bytes = sample();
        assert!(ClassFile::parse(&bytes[..bytes.len() - 1]).is_err());

        let mut trailing = bytes.clone();
        trailing.push(0);
        assert!(ClassFile::parse(&trailing).is_err());
    }
}
