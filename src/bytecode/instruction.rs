//! Decoded JVM instructions.
//!
//! An [`Instruction`] records where it sits in the original code and how long it was. Operands
//! are only decoded where relocation has to understand them: branch offsets and switch tables.
//! Every other operand (constant pool indices, local slots, immediates) is position independent
//! and copied verbatim when the code is re-encoded.

use crate::bytecode::opcodes;

/// The relocation-relevant operand of an instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    /// Operand bytes, if any, do not depend on the instruction's position
    Fixed,
    /// Relative branch offset; 16-bit except for `goto_w` and `jsr_w`
    Branch(i32),
    /// `tableswitch` with offsets relative to the instruction
    TableSwitch {
        /// Offset for keys outside `low..=high`
        default: i32,
        /// Lowest key
        low: i32,
        /// Highest key
        high: i32,
        /// One offset per key from `low` to `high`
        offsets: Vec<i32>,
    },
    /// `lookupswitch` with offsets relative to the instruction
    LookupSwitch {
        /// Offset for unmatched keys
        default: i32,
        /// Sorted `(key, offset)` pairs
        pairs: Vec<(i32, i32)>,
    },
}

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Execution continues with the next instruction
    Sequential,
    /// Conditional branch
    ConditionalBranch,
    /// Unconditional jump, including subroutine calls
    UnconditionalBranch,
    /// Multi-way branch
    Switch,
    /// Method invocation
    Call,
    /// Return, `athrow` or subroutine return
    Terminal,
}

/// One decoded instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    /// Offset of the first byte (the `wide` prefix, if present) in the original code
    pub offset: u32,
    /// Opcode, the modified one for `wide` instructions
    pub opcode: u8,
    /// Whether the instruction carries a `wide` prefix
    pub wide: bool,
    /// Length in the original code, prefix and padding included
    pub length: u32,
    /// Relocation-relevant operand
    pub operand: Operand,
}

impl Instruction {
    /// Whether this instruction invokes a method.
    #[must_use]
    pub fn is_invoke(&self) -> bool {
        matches!(
            self.opcode,
            opcodes::INVOKEVIRTUAL
                | opcodes::INVOKESPECIAL
                | opcodes::INVOKESTATIC
                | opcodes::INVOKEINTERFACE
                | opcodes::INVOKEDYNAMIC
        )
    }

    /// Control flow category.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        match self.opcode {
            opcodes::IFEQ..=opcodes::IF_ACMPNE | opcodes::IFNULL | opcodes::IFNONNULL => {
                FlowType::ConditionalBranch
            }
            opcodes::GOTO | opcodes::JSR | opcodes::GOTO_W | opcodes::JSR_W => {
                FlowType::UnconditionalBranch
            }
            opcodes::TABLESWITCH | opcodes::LOOKUPSWITCH => FlowType::Switch,
            opcodes::INVOKEVIRTUAL..=opcodes::INVOKEDYNAMIC => FlowType::Call,
            opcodes::IRETURN..=opcodes::RETURN | opcodes::ATHROW | opcodes::RET => {
                FlowType::Terminal
            }
            _ => FlowType::Sequential,
        }
    }

    /// Absolute targets of a branch or switch in the original code.
    #[must_use]
    pub fn targets(&self) -> Vec<i64> {
        let base = i64::from(self.offset);
        match &self.operand {
            Operand::Fixed => Vec::new(),
            Operand::Branch(delta) => vec![base + i64::from(*delta)],
            Operand::TableSwitch {
                default, offsets, ..
            } => std::iter::once(default)
                .chain(offsets)
                .map(|delta| base + i64::from(*delta))
                .collect(),
            Operand::LookupSwitch { default, pairs } => std::iter::once(*default)
                .chain(pairs.iter().map(|(_, delta)| *delta))
                .map(|delta| base + i64::from(delta))
                .collect(),
        }
    }

    /// Constant pool index operand of an invoke, field or type instruction.
    ///
    /// `code` must be the code this instruction was decoded from.
    #[must_use]
    pub fn pool_index(&self, code: &[u8]) -> Option<u16> {
        let takes_index = matches!(
            self.opcode,
            opcodes::LDC_W
                | opcodes::LDC2_W
                | opcodes::GETSTATIC..=opcodes::INVOKEDYNAMIC
                | opcodes::NEW
                | opcodes::ANEWARRAY
                | opcodes::CHECKCAST
                | opcodes::INSTANCEOF
                | opcodes::MULTIANEWARRAY
        );
        if !takes_index || self.wide {
            return None;
        }

        let at = self.offset as usize + 1;
        let bytes = code.get(at..at + 2)?;
        Some(u16::from_be_bytes([bytes[0], bytes[1]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction(opcode: u8, operand: Operand) -> Instruction {
        Instruction {
            offset: 10,
            opcode,
            wide: false,
            length: 3,
            operand,
        }
    }

    #[test]
    fn flow_types() {
        assert_eq!(
            instruction(opcodes::IFNULL, Operand::Branch(4)).flow(),
            FlowType::ConditionalBranch
        );
        assert_eq!(
            instruction(opcodes::INVOKEINTERFACE, Operand::Fixed).flow(),
            FlowType::Call
        );
        assert_eq!(instruction(opcodes::ATHROW, Operand::Fixed).flow(), FlowType::Terminal);
        assert_eq!(instruction(opcodes::IADD, Operand::Fixed).flow(), FlowType::Sequential);
    }

    #[test]
    fn switch_targets() {
        let switch = instruction(
            opcodes::LOOKUPSWITCH,
            Operand::LookupSwitch {
                default: 20,
                pairs: vec![(1, -10), (7, 30)],
            },
        );
        assert_eq!(switch.targets(), vec![30, 0, 40]);
    }

    #[test]
    fn pool_index_of_invoke() {
        let code = [0x00; 10]
            .iter()
            .copied()
            .chain([opcodes::INVOKEVIRTUAL, 0x01, 0x02])
            .collect::<Vec<u8>>();
        let invoke = instruction(opcodes::INVOKEVIRTUAL, Operand::Fixed);
        assert!(invoke.is_invoke());
        assert_eq!(invoke.pool_index(&code), Some(0x0102));
        assert_eq!(instruction(opcodes::IADD, Operand::Fixed).pool_index(&code), None);
    }
}
