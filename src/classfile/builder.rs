//! Assembling class files from scratch.
//!
//! [`ClassBuilder`] produces small but complete class files. The engine itself never builds
//! classes; the builder exists for tests, benchmarks and fuzz seeds that need precise control
//! over the bytecode a transformation sees.
//!
//! Constants referenced from code must exist before the code is written, so the pool is
//! available through [`ClassBuilder::pool`] and the shortcut methods while members are added.
//!
//! # Examples
//!
//! ```rust
//! use threadscope::classfile::{ClassBuilder, ClassFile, CodeAttribute};
//!
//! let mut builder = ClassBuilder::new("com/example/Runner", "java/lang/Object");
//! let start = builder.methodref("java/lang/Thread", "start", "()V")?;
//! let [hi, lo] = start.to_be_bytes();
//! builder.method(0x0009, "launch", "(Ljava/lang/Thread;)V", CodeAttribute {
//!     max_stack: 1,
//!     max_locals: 1,
//!     // aload_0; invokevirtual Thread.start; return
//!     code: vec![0x2A, 0xB6, hi, lo, 0xB1],
//!     exception_table: Vec::new(),
//!     attributes: Vec::new(),
//! });
//!
//! let class = ClassFile::parse(&builder.build()?)?;
//! assert_eq!(class.methods.len(), 1);
//! # Ok::<(), threadscope::Error>(())
//! ```

use crate::{
    classfile::{
        attributes::{self, Attribute, CodeAttribute},
        constpool::ConstantPool,
        ClassAccessFlags, ClassFile, MemberInfo,
    },
    Result,
};

struct PendingMember {
    access_flags: u16,
    name: String,
    descriptor: String,
    code: Option<CodeAttribute>,
}

/// Builder for synthetic class files.
pub struct ClassBuilder {
    name: String,
    super_name: Option<String>,
    interfaces: Vec<String>,
    access_flags: ClassAccessFlags,
    major_version: u16,
    pool: ConstantPool,
    fields: Vec<PendingMember>,
    methods: Vec<PendingMember>,
}

impl ClassBuilder {
    /// Start a public class file (version 52, Java 8) named `name` extending `super_name`.
    ///
    /// Pass an empty `super_name` for `java/lang/Object` itself.
    #[must_use]
    pub fn new(name: &str, super_name: &str) -> Self {
        ClassBuilder {
            name: name.to_string(),
            super_name: (!super_name.is_empty()).then(|| super_name.to_string()),
            interfaces: Vec::new(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            major_version: 52,
            pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    /// Set the major version.
    pub fn version(&mut self, major: u16) -> &mut Self {
        self.major_version = major;
        self
    }

    /// Set the class access flags.
    pub fn access(&mut self, flags: ClassAccessFlags) -> &mut Self {
        self.access_flags = flags;
        self
    }

    /// Add a direct superinterface.
    pub fn interface(&mut self, name: &str) -> &mut Self {
        self.interfaces.push(name.to_string());
        self
    }

    /// Add a field.
    pub fn field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        self.fields.push(PendingMember {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: None,
        });
        self
    }

    /// Add a method with a body.
    pub fn method(
        &mut self,
        access_flags: u16,
        name: &str,
        descriptor: &str,
        code: CodeAttribute,
    ) -> &mut Self {
        self.methods.push(PendingMember {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: Some(code),
        });
        self
    }

    /// Add a method without a body (abstract or native).
    pub fn abstract_method(&mut self, access_flags: u16, name: &str, descriptor: &str) -> &mut Self {
        self.methods.push(PendingMember {
            access_flags,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            code: None,
        });
        self
    }

    /// The constant pool under construction.
    pub fn pool(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    /// Shortcut for [`ConstantPool::add_methodref`].
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        self.pool.add_methodref(owner, name, descriptor)
    }

    /// Shortcut for [`ConstantPool::add_interface_methodref`].
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn interface_methodref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        self.pool.add_interface_methodref(owner, name, descriptor)
    }

    /// Shortcut for [`ConstantPool::add_class`].
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn class(&mut self, name: &str) -> Result<u16> {
        self.pool.add_class(name)
    }

    /// Build a raw attribute named `name` for use inside a [`CodeAttribute`].
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the pool has no free slot.
    pub fn attribute(&mut self, name: &str, info: Vec<u8>) -> Result<Attribute> {
        Ok(Attribute {
            name_index: self.pool.add_utf8(name)?,
            info,
        })
    }

    /// Assemble the [`ClassFile`].
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the constants do not fit the pool and
    /// [`crate::Error::CodeTooLarge`] for an oversized method body.
    pub fn build_class(&self) -> Result<ClassFile> {
        let mut pool = self.pool.clone();

        let this_class = pool.add_class(&self.name)?;
        let super_class = match &self.super_name {
            Some(name) => pool.add_class(name)?,
            None => 0,
        };
        let interfaces = self
            .interfaces
            .iter()
            .map(|name| pool.add_class(name))
            .collect::<Result<Vec<_>>>()?;

        let fields = self
            .fields
            .iter()
            .map(|member| member_info(&mut pool, member))
            .collect::<Result<Vec<_>>>()?;
        let methods = self
            .methods
            .iter()
            .map(|member| member_info(&mut pool, member))
            .collect::<Result<Vec<_>>>()?;

        Ok(ClassFile {
            minor_version: 0,
            major_version: self.major_version,
            constant_pool: pool,
            access_flags: self.access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes: Vec::new(),
        })
    }

    /// Assemble and serialize the class file.
    ///
    /// # Errors
    /// See [`ClassBuilder::build_class`].
    pub fn build(&self) -> Result<Vec<u8>> {
        self.build_class()?.to_bytes()
    }
}

fn member_info(pool: &mut ConstantPool, member: &PendingMember) -> Result<MemberInfo> {
    let name_index = pool.add_utf8(&member.name)?;
    let descriptor_index = pool.add_utf8(&member.descriptor)?;

    let mut attributes = Vec::new();
    if let Some(code) = &member.code {
        attributes.push(Attribute {
            name_index: pool.add_utf8(attributes::CODE)?,
            info: code.to_bytes()?,
        });
    }

    Ok(MemberInfo {
        access_flags: member.access_flags,
        name_index,
        descriptor_index,
        attributes,
    })
}
