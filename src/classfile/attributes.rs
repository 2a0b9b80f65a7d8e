//! Attributes of classes, members and method bodies.
//!
//! Every attribute is kept as an opaque [`Attribute`] (name index plus payload) so that the
//! ones this crate never edits survive a rewrite untouched. The attributes a method body edit
//! has to keep consistent with moved instructions are decoded on demand:
//!
//! - [`CodeAttribute`] - bytecode, exception table and nested attributes
//! - [`LineNumber`] - entries of `LineNumberTable`
//! - [`LocalVariable`] - entries of `LocalVariableTable` and `LocalVariableTypeTable`
//!
//! `StackMapTable` lives in [`crate::classfile::stackmap`].

use crate::{
    classfile::{constpool::ConstantPool, parser::Parser, writer::ClassWriter},
    Result,
};

/// Name of the method body attribute.
pub const CODE: &str = "Code";
/// Name of the bytecode offset to source line table.
pub const LINE_NUMBER_TABLE: &str = "LineNumberTable";
/// Name of the local variable debug table.
pub const LOCAL_VARIABLE_TABLE: &str = "LocalVariableTable";
/// Name of the generic signature local variable debug table.
pub const LOCAL_VARIABLE_TYPE_TABLE: &str = "LocalVariableTypeTable";
/// Name of the verifier's frame table.
pub const STACK_MAP_TABLE: &str = "StackMapTable";
/// Type annotations visible at runtime; carry bytecode offsets.
pub const RUNTIME_VISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeVisibleTypeAnnotations";
/// Type annotations invisible at runtime; carry bytecode offsets.
pub const RUNTIME_INVISIBLE_TYPE_ANNOTATIONS: &str = "RuntimeInvisibleTypeAnnotations";

/// A raw attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Constant pool index of the attribute name
    pub name_index: u16,
    /// Payload, without the name and length header
    pub info: Vec<u8>,
}

impl Attribute {
    /// Parse one attribute header and payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the payload is truncated.
    pub fn parse(parser: &mut Parser) -> Result<Self> {
        let name_index = parser.read_be::<u16>()?;
        let length = parser.read_be::<u32>()?;
        let Ok(length) = usize::try_from(length) else {
            return Err(out_of_bounds_error!());
        };
        let info = parser.read_bytes(length)?.to_vec();

        Ok(Attribute { name_index, info })
    }

    /// Parse a `u16` count followed by that many attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the data is truncated.
    pub fn parse_list(parser: &mut Parser) -> Result<Vec<Attribute>> {
        let count = parser.read_be::<u16>()?;
        (0..count).map(|_| Attribute::parse(parser)).collect()
    }

    /// Write the attribute header and payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the payload exceeds `u32::MAX` bytes.
    pub fn write(&self, writer: &mut ClassWriter) -> Result<()> {
        let Ok(length) = u32::try_from(self.info.len()) else {
            return Err(malformed_error!("Attribute of {} bytes", self.info.len()));
        };
        writer.write_be(self.name_index);
        writer.write_be(length);
        writer.write_bytes(&self.info);
        Ok(())
    }

    /// Write a `u16` count followed by the attributes.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if there are more than 65535 attributes.
    pub fn write_list(attributes: &[Attribute], writer: &mut ClassWriter) -> Result<()> {
        let Ok(count) = u16::try_from(attributes.len()) else {
            return Err(malformed_error!("{} attributes", attributes.len()));
        };
        writer.write_be(count);
        for attribute in attributes {
            attribute.write(writer)?;
        }
        Ok(())
    }

    /// Decoded name of this attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the name index is not a `Utf8` constant.
    pub fn name(&self, pool: &ConstantPool) -> Result<String> {
        pool.utf8(self.name_index)
    }

    /// Whether this attribute is called `name`.
    ///
    /// An invalid name index simply does not match.
    #[must_use]
    pub fn is(&self, pool: &ConstantPool, name: &str) -> bool {
        pool.utf8_bytes(self.name_index)
            .is_ok_and(|bytes| bytes == name.as_bytes())
    }
}

/// One entry of a method's exception table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionEntry {
    /// First covered instruction
    pub start_pc: u16,
    /// End of the covered range, exclusive
    pub end_pc: u16,
    /// Handler entry point
    pub handler_pc: u16,
    /// Caught class, 0 for any
    pub catch_type: u16,
}

/// The `Code` attribute of a method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeAttribute {
    /// Maximum operand stack depth
    pub max_stack: u16,
    /// Number of local variable slots, parameters included
    pub max_locals: u16,
    /// The bytecode
    pub code: Vec<u8>,
    /// Exception handlers in precedence order
    pub exception_table: Vec<ExceptionEntry>,
    /// Nested attributes (`LineNumberTable`, `StackMapTable`, ...)
    pub attributes: Vec<Attribute>,
}

impl CodeAttribute {
    /// Decode the payload of a `Code` attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an empty or oversized body and
    /// [`crate::Error::OutOfBounds`] if the payload is truncated.
    pub fn parse(info: &[u8]) -> Result<Self> {
        let mut parser = Parser::new(info);
        let max_stack = parser.read_be::<u16>()?;
        let max_locals = parser.read_be::<u16>()?;
        let code_length = parser.read_be::<u32>()?;
        if code_length == 0 || code_length > u32::from(u16::MAX) {
            return Err(malformed_error!("Invalid code length {}", code_length));
        }
        let code = parser.read_bytes(code_length as usize)?.to_vec();

        let entries = parser.read_be::<u16>()?;
        let mut exception_table = Vec::with_capacity(usize::from(entries));
        for _ in 0..entries {
            exception_table.push(ExceptionEntry {
                start_pc: parser.read_be()?,
                end_pc: parser.read_be()?,
                handler_pc: parser.read_be()?,
                catch_type: parser.read_be()?,
            });
        }

        let attributes = Attribute::parse_list(&mut parser)?;
        if parser.has_more_data() {
            return Err(malformed_error!(
                "{} trailing bytes after Code attribute",
                parser.len() - parser.pos()
            ));
        }

        Ok(CodeAttribute {
            max_stack,
            max_locals,
            code,
            exception_table,
            attributes,
        })
    }

    /// Encode the payload of a `Code` attribute.
    ///
    /// # Errors
    /// Returns [`crate::Error::CodeTooLarge`] if the bytecode exceeds 65535 bytes and
    /// [`crate::Error::Malformed`] if a table outgrew its count field.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.code.len() > usize::from(u16::MAX) {
            return Err(crate::Error::CodeTooLarge(self.code.len()));
        }
        let Ok(handlers) = u16::try_from(self.exception_table.len()) else {
            return Err(malformed_error!(
                "{} exception handlers",
                self.exception_table.len()
            ));
        };

        let mut writer = ClassWriter::with_capacity(self.code.len() + 64);
        writer.write_be(self.max_stack);
        writer.write_be(self.max_locals);
        writer.write_be(self.code.len() as u32);
        writer.write_bytes(&self.code);
        writer.write_be(handlers);
        for entry in &self.exception_table {
            writer.write_be(entry.start_pc);
            writer.write_be(entry.end_pc);
            writer.write_be(entry.handler_pc);
            writer.write_be(entry.catch_type);
        }
        Attribute::write_list(&self.attributes, &mut writer)?;

        Ok(writer.into_inner())
    }
}

/// One `LineNumberTable` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineNumber {
    /// First instruction of the line
    pub start_pc: u16,
    /// Source line
    pub line: u16,
}

impl LineNumber {
    /// Decode a `LineNumberTable` payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the payload is truncated.
    pub fn parse_table(info: &[u8]) -> Result<Vec<LineNumber>> {
        let mut parser = Parser::new(info);
        let count = parser.read_be::<u16>()?;
        (0..count)
            .map(|_| -> Result<LineNumber> {
                Ok(LineNumber {
                    start_pc: parser.read_be()?,
                    line: parser.read_be()?,
                })
            })
            .collect()
    }

    /// Encode a `LineNumberTable` payload.
    #[must_use]
    pub fn write_table(entries: &[LineNumber]) -> Vec<u8> {
        let mut writer = ClassWriter::with_capacity(2 + entries.len() * 4);
        writer.write_be(entries.len() as u16);
        for entry in entries {
            writer.write_be(entry.start_pc);
            writer.write_be(entry.line);
        }
        writer.into_inner()
    }
}

/// One `LocalVariableTable` or `LocalVariableTypeTable` entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalVariable {
    /// First instruction of the scope
    pub start_pc: u16,
    /// Length of the scope in bytes
    pub length: u16,
    /// Variable name
    pub name_index: u16,
    /// Descriptor, or generic signature in the type table
    pub descriptor_index: u16,
    /// Local slot
    pub index: u16,
}

impl LocalVariable {
    /// Decode a local variable table payload.
    ///
    /// # Errors
    /// Returns [`crate::Error::OutOfBounds`] if the payload is truncated.
    pub fn parse_table(info: &[u8]) -> Result<Vec<LocalVariable>> {
        let mut parser = Parser::new(info);
        let count = parser.read_be::<u16>()?;
        (0..count)
            .map(|_| -> Result<LocalVariable> {
                Ok(LocalVariable {
                    start_pc: parser.read_be()?,
                    length: parser.read_be()?,
                    name_index: parser.read_be()?,
                    descriptor_index: parser.read_be()?,
                    index: parser.read_be()?,
                })
            })
            .collect()
    }

    /// Encode a local variable table payload.
    #[must_use]
    pub fn write_table(entries: &[LocalVariable]) -> Vec<u8> {
        let mut writer = ClassWriter::with_capacity(2 + entries.len() * 10);
        writer.write_be(entries.len() as u16);
        for entry in entries {
            writer.write_be(entry.start_pc);
            writer.write_be(entry.length);
            writer.write_be(entry.name_index);
            writer.write_be(entry.descriptor_index);
            writer.write_be(entry.index);
        }
        writer.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_code() -> CodeAttribute {
        CodeAttribute {
            max_stack: 2,
            max_locals: 1,
            code: vec![0x2A, 0xB6, 0x00, 0x07, 0xB1],
            exception_table: vec![ExceptionEntry {
                start_pc: 0,
                end_pc: 4,
                handler_pc: 4,
                catch_type: 0,
            }],
            attributes: vec![Attribute {
                name_index: 9,
                info: LineNumber::write_table(&[LineNumber {
                    start_pc: 0,
                    line: 12,
                }]),
            }],
        }
    }

    #[test]
    fn code_attribute_cycle() {
        let code = sample_code();
        let bytes = code.to_bytes().unwrap();
        assert_eq!(CodeAttribute::parse(&bytes).unwrap(), code);
    }

    #[test]
    fn code_attribute_rejects_trailing_bytes() {
        let mut bytes = sample_code().to_bytes().unwrap();
        bytes.push(0);
        assert!(CodeAttribute::parse(&bytes).is_err());
    }

    #[test]
    fn code_attribute_rejects_empty_body() {
        let bytes = [0, 1, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(CodeAttribute::parse(&bytes).is_err());
    }

    #[test]
    fn oversized_code() {
        let mut code = sample_code();
        code.code = vec![0; 70_000];
        assert!(matches!(
            code.to_bytes(),
            Err(crate::Error::CodeTooLarge(70_000))
        ));
    }

    #[test]
    fn local_variable_table() {
        let entries = [LocalVariable {
            start_pc: 2,
            length: 10,
            name_index: 5,
            descriptor_index: 6,
            index: 1,
        }];
        let bytes = LocalVariable::write_table(&entries);
        assert_eq!(bytes.len(), 12);
        assert_eq!(LocalVariable::parse_table(&bytes).unwrap(), entries);
        assert!(LocalVariable::parse_table(&bytes[..7]).is_err());
    }
}
