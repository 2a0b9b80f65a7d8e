//! Call sites found in method bodies.

use strum::{Display, IntoStaticStr};

use crate::bytecode::opcodes;

/// How a call site invokes its target.
///
/// Only the instance invocations are call sites: static and dynamic invokes have no receiver
/// and can never start or join a thread object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
pub enum InvokeKind {
    /// `invokevirtual`
    #[strum(serialize = "invokevirtual")]
    Virtual,
    /// `invokespecial`
    #[strum(serialize = "invokespecial")]
    Special,
    /// `invokeinterface`
    #[strum(serialize = "invokeinterface")]
    Interface,
}

impl InvokeKind {
    /// Kind of the instruction `opcode`, `None` if it is not an instance invocation.
    #[must_use]
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            opcodes::INVOKEVIRTUAL => Some(InvokeKind::Virtual),
            opcodes::INVOKESPECIAL => Some(InvokeKind::Special),
            opcodes::INVOKEINTERFACE => Some(InvokeKind::Interface),
            _ => None,
        }
    }
}

/// One invocation inside a method body.
///
/// Call sites are produced by [`crate::editor::EditableType::call_sites`] and only identify
/// positions in the type they were produced from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSite {
    /// Index of the enclosing method in the class's method table
    pub method_index: usize,
    /// Index of the invoke among the method's decoded instructions
    pub instruction_index: usize,
    /// Bytecode offset of the invoke in the original method body
    pub offset: u32,
    /// Invocation instruction
    pub kind: InvokeKind,
    /// Internal name of the class named by the method reference
    pub owner: String,
    /// Invoked method name
    pub name: String,
    /// Invoked method descriptor
    pub descriptor: String,
}

impl CallSite {
    /// The referenced method as `owner.name descriptor`, e.g. `java/lang/Thread.join(J)V`.
    #[must_use]
    pub fn signature(&self) -> String {
        format!("{}.{}{}", self.owner, self.name, self.descriptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_and_signature() {
        assert_eq!(
            InvokeKind::from_opcode(opcodes::INVOKEINTERFACE),
            Some(InvokeKind::Interface)
        );
        assert_eq!(InvokeKind::from_opcode(opcodes::INVOKESTATIC), None);
        assert_eq!(InvokeKind::Virtual.to_string(), "invokevirtual");

        let site = CallSite {
            method_index: 0,
            instruction_index: 3,
            offset: 7,
            kind: InvokeKind::Virtual,
            owner: "java/lang/Thread".to_string(),
            name: "join".to_string(),
            descriptor: "(J)V".to_string(),
        };
        assert_eq!(site.signature(), "java/lang/Thread.join(J)V");
    }
}
