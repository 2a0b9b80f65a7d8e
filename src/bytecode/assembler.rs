//! Assembling straight-line bytecode sequences.
//!
//! [`Assembler`] emits instructions into a byte buffer while tracking the operand stack depth,
//! so a sequence's contribution to `max_stack` is known the moment it is finished. Constants
//! the instructions reference are added to the class's [`ConstantPool`] on the fly.
//!
//! Only position independent instructions are offered: sequences produced here are inserted
//! into existing method bodies and must not contain branches.
//!
//! # Examples
//!
//! ```rust
//! use threadscope::bytecode::Assembler;
//! use threadscope::classfile::ConstantPool;
//!
//! let mut pool = ConstantPool::new();
//! let mut asm = Assembler::new(&mut pool, 0);
//! asm.getstatic("java/lang/System", "out", "Ljava/io/PrintStream;")?
//!     .ldc_string("hello")?
//!     .invokevirtual("java/io/PrintStream", "println", "(Ljava/lang/String;)V")?;
//!
//! let (code, max_depth) = asm.finish();
//! assert_eq!(code.len(), 8);
//! assert_eq!(max_depth, 2);
//! # Ok::<(), threadscope::Error>(())
//! ```

use crate::{
    bytecode::opcodes::*,
    classfile::{
        descriptor::{MethodDescriptor, ValueKind},
        ConstantPool,
    },
    Result,
};

/// Emits branch-free bytecode and tracks the operand stack.
pub struct Assembler<'p> {
    pool: &'p mut ConstantPool,
    code: Vec<u8>,
    depth: u16,
    max_depth: u16,
}

impl<'p> Assembler<'p> {
    /// Create an assembler whose sequence starts with `initial_depth` stack slots in use.
    pub fn new(pool: &'p mut ConstantPool, initial_depth: u16) -> Self {
        Assembler {
            pool,
            code: Vec::with_capacity(64),
            depth: initial_depth,
            max_depth: initial_depth,
        }
    }

    /// Current operand stack depth in slots.
    #[must_use]
    pub fn depth(&self) -> u16 {
        self.depth
    }

    /// Account for an instruction that pops `pops` and then pushes `pushes` slots.
    fn effect(&mut self, pops: u16, pushes: u16) -> Result<()> {
        let Some(depth) = self.depth.checked_sub(pops) else {
            return Err(malformed_error!(
                "Stack underflow at offset {}: {} slots in use, {} popped",
                self.code.len(),
                self.depth,
                pops
            ));
        };
        self.depth = depth + pushes;
        self.max_depth = self.max_depth.max(self.depth);
        Ok(())
    }

    fn emit(&mut self, bytes: &[u8], pops: u16, pushes: u16) -> Result<&mut Self> {
        self.effect(pops, pushes)?;
        self.code.extend_from_slice(bytes);
        Ok(self)
    }

    fn emit_indexed(&mut self, opcode: u8, index: u16, pops: u16, pushes: u16) -> Result<&mut Self> {
        let [hi, lo] = index.to_be_bytes();
        self.emit(&[opcode, hi, lo], pops, pushes)
    }

    /// Load a local variable of `kind` from `slot`.
    ///
    /// # Errors
    /// Never fails for loads; the `Result` keeps the chain uniform.
    pub fn load(&mut self, kind: ValueKind, slot: u16) -> Result<&mut Self> {
        let opcode = match kind {
            ValueKind::Int => ILOAD,
            ValueKind::Long => LLOAD,
            ValueKind::Float => FLOAD,
            ValueKind::Double => DLOAD,
            ValueKind::Reference => ALOAD,
        };
        self.local(opcode, slot, 0, kind.slots())
    }

    /// Store the top of the stack, a value of `kind`, into `slot`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the stack holds fewer slots than `kind` needs.
    pub fn store(&mut self, kind: ValueKind, slot: u16) -> Result<&mut Self> {
        let opcode = match kind {
            ValueKind::Int => ISTORE,
            ValueKind::Long => LSTORE,
            ValueKind::Float => FSTORE,
            ValueKind::Double => DSTORE,
            ValueKind::Reference => ASTORE,
        };
        self.local(opcode, slot, kind.slots(), 0)
    }

    fn local(&mut self, opcode: u8, slot: u16, pops: u16, pushes: u16) -> Result<&mut Self> {
        match u8::try_from(slot) {
            Ok(slot) => self.emit(&[opcode, slot], pops, pushes),
            Err(_) => {
                let [hi, lo] = slot.to_be_bytes();
                self.emit(&[WIDE, opcode, hi, lo], pops, pushes)
            }
        }
    }

    /// Duplicate the single-slot value on top of the stack.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] on an empty stack.
    pub fn dup(&mut self) -> Result<&mut Self> {
        self.emit(&[DUP], 1, 2)
    }

    /// Push a small `int` constant.
    ///
    /// # Errors
    /// Never fails; the `Result` keeps the chain uniform.
    pub fn iconst(&mut self, value: i16) -> Result<&mut Self> {
        match value {
            -1..=5 => {
                let opcode = (i16::from(ICONST_0) + value) as u8;
                self.emit(&[opcode], 0, 1)
            }
            _ => match i8::try_from(value) {
                Ok(byte) => self.emit(&[BIPUSH, byte as u8], 0, 1),
                Err(_) => {
                    let [hi, lo] = value.to_be_bytes();
                    self.emit(&[SIPUSH, hi, lo], 0, 1)
                }
            },
        }
    }

    /// Subtract the two `int`s on top of the stack.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if fewer than two slots are in use.
    pub fn isub(&mut self) -> Result<&mut Self> {
        self.emit(&[ISUB], 2, 1)
    }

    /// Push a string constant.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the constant cannot be added.
    pub fn ldc_string(&mut self, text: &str) -> Result<&mut Self> {
        let index = self.pool.add_string(text)?;
        match u8::try_from(index) {
            Ok(index) => self.emit(&[LDC, index], 0, 1),
            Err(_) => self.emit_indexed(LDC_W, index, 0, 1),
        }
    }

    /// Push a static field.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the reference cannot be added.
    pub fn getstatic(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        let index = self.pool.add_fieldref(owner, name, descriptor)?;
        let pushes = field_slots(descriptor);
        self.emit_indexed(GETSTATIC, index, 0, pushes)
    }

    /// Allocate an uninitialized instance of `class`.
    ///
    /// # Errors
    /// Returns [`crate::Error::ConstantPoolFull`] if the class cannot be added.
    pub fn new_object(&mut self, class: &str) -> Result<&mut Self> {
        let index = self.pool.add_class(class)?;
        self.emit_indexed(NEW, index, 0, 1)
    }

    /// Call an instance method through `invokevirtual`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for an invalid descriptor or a stack underflow, and
    /// [`crate::Error::ConstantPoolFull`] if the reference cannot be added.
    pub fn invokevirtual(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.invoke(INVOKEVIRTUAL, owner, name, descriptor, 1)
    }

    /// Call a constructor or private method through `invokespecial`.
    ///
    /// # Errors
    /// See [`Assembler::invokevirtual`].
    pub fn invokespecial(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.invoke(INVOKESPECIAL, owner, name, descriptor, 1)
    }

    /// Call a static method.
    ///
    /// # Errors
    /// See [`Assembler::invokevirtual`].
    pub fn invokestatic(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<&mut Self> {
        self.invoke(INVOKESTATIC, owner, name, descriptor, 0)
    }

    fn invoke(
        &mut self,
        opcode: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
        receiver: u16,
    ) -> Result<&mut Self> {
        let signature = MethodDescriptor::parse(descriptor)?;
        let index = self.pool.add_methodref(owner, name, descriptor)?;
        self.emit_indexed(
            opcode,
            index,
            signature.parameter_slots() + receiver,
            signature.return_slots(),
        )
    }

    /// Finish the sequence, returning its bytes and the deepest stack it reached.
    #[must_use]
    pub fn finish(self) -> (Vec<u8>, u16) {
        (self.code, self.max_depth)
    }
}

fn field_slots(descriptor: &str) -> u16 {
    match descriptor.as_bytes().first() {
        Some(b'J' | b'D') => 2,
        _ => 1,
    }
}
