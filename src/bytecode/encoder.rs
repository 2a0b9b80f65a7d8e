//! Re-encoding decoded bytecode with inserted sequences.
//!
//! [`relocate`] lays a method body out again with straight-line byte sequences inserted in
//! front of chosen instructions, and returns the new code together with an [`OffsetMap`] that
//! translates every old instruction offset into the new layout.
//!
//! # Layout
//!
//! Each instruction becomes a group: its inserted prelude (possibly empty) followed by the
//! instruction itself. Two offsets are tracked per instruction:
//!
//! - the *group start*, where control arriving at the old instruction now arrives. Branch and
//!   switch targets, exception ranges and handlers, line numbers, local variable scopes and
//!   stack map frames all move to the group start, so a jump to an instrumented call executes
//!   the prelude first
//! - the *instruction start*, where the instruction itself now sits. `Uninitialized` stack map
//!   entries name the `new` instruction and move there
//!
//! Branch instructions keep their width. A 16-bit branch whose new distance does not fit is an
//! [`crate::Error::BranchOutOfRange`]; switch padding is recomputed for the new position.
//!
//! # Examples
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use threadscope::bytecode::{decode_code, relocate};
//!
//! // 0: aload_0  1: invokevirtual #7  4: goto -3
//! let code = [0x2A, 0xB6, 0x00, 0x07, 0xA7, 0xFF, 0xFD];
//! let instructions = decode_code(&code)?;
//!
//! let mut insertions = BTreeMap::new();
//! insertions.insert(1, vec![0x00, 0x00]); // two nops before the invoke
//! let relocated = relocate(&code, &instructions, &insertions)?;
//!
//! assert_eq!(relocated.offsets.group(1)?, 1);
//! assert_eq!(relocated.offsets.instruction(1)?, 3);
//! // the goto now lands on the first nop
//! assert_eq!(&relocated.code[6..9], &[0xA7, 0xFF, 0xFB]);
//! # Ok::<(), threadscope::Error>(())
//! ```

use std::collections::BTreeMap;

use crate::{
    bytecode::{
        instruction::{Instruction, Operand},
        opcodes,
    },
    classfile::ClassWriter,
    Error, Result,
};

/// Translation of old instruction offsets into a relocated layout.
#[derive(Debug, Clone)]
pub struct OffsetMap {
    old_offsets: Vec<u32>,
    group_starts: Vec<u32>,
    instruction_starts: Vec<u32>,
    old_length: u32,
    new_length: u32,
}

impl OffsetMap {
    /// Index of the instruction at `old`, `None` for the end of the code.
    fn index(&self, old: u32) -> Result<Option<usize>> {
        if old == self.old_length {
            return Ok(None);
        }
        match self.old_offsets.binary_search(&old) {
            Ok(index) => Ok(Some(index)),
            Err(_) => Err(malformed_error!(
                "Offset {} is not an instruction boundary",
                old
            )),
        }
    }

    /// New offset at which control arriving at the old instruction now arrives.
    ///
    /// The end of the old code maps to the end of the new code.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `old` is not an instruction boundary.
    pub fn group(&self, old: u32) -> Result<u32> {
        Ok(match self.index(old)? {
            Some(index) => self.group_starts[index],
            None => self.new_length,
        })
    }

    /// New offset of the old instruction itself.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `old` is not an instruction boundary.
    pub fn instruction(&self, old: u32) -> Result<u32> {
        Ok(match self.index(old)? {
            Some(index) => self.instruction_starts[index],
            None => self.new_length,
        })
    }

    /// Length of the relocated code.
    #[must_use]
    pub fn new_length(&self) -> u32 {
        self.new_length
    }
}

/// Result of [`relocate`].
#[derive(Debug, Clone)]
pub struct Relocated {
    /// The new method body
    pub code: Vec<u8>,
    /// Old to new offset translation
    pub offsets: OffsetMap,
}

/// Re-encode `instructions` (decoded from `code`) with `insertions` placed in front of the
/// instructions at the given indices.
///
/// Inserted sequences must be position independent: no branches, no switches.
///
/// # Errors
/// Returns [`crate::Error::CodeTooLarge`] if the result exceeds 65535 bytes,
/// [`crate::Error::BranchOutOfRange`] if a 16-bit branch can no longer reach its target and
/// [`crate::Error::Malformed`] if a branch does not target an instruction boundary.
pub fn relocate(
    code: &[u8],
    instructions: &[Instruction],
    insertions: &BTreeMap<usize, Vec<u8>>,
) -> Result<Relocated> {
    let offsets = layout(code, instructions, insertions)?;
    let mut writer = ClassWriter::with_capacity(offsets.new_length as usize);

    for (index, instruction) in instructions.iter().enumerate() {
        if let Some(prelude) = insertions.get(&index) {
            writer.write_bytes(prelude);
        }

        let position = offsets.instruction_starts[index];
        debug_assert_eq!(writer.pos(), position as usize);
        let target = |delta: i32| -> Result<i64> {
            let old = i64::from(instruction.offset) + i64::from(delta);
            let Ok(old) = u32::try_from(old) else {
                return Err(malformed_error!(
                    "Branch at {} targets negative offset {}",
                    instruction.offset,
                    old
                ));
            };
            Ok(i64::from(offsets.group(old)?) - i64::from(position))
        };

        match &instruction.operand {
            Operand::Fixed => {
                let start = instruction.offset as usize;
                writer.write_bytes(&code[start..start + instruction.length as usize]);
            }
            Operand::Branch(delta) => {
                let relative = target(*delta)?;
                writer.write_be(instruction.opcode);
                if matches!(instruction.opcode, opcodes::GOTO_W | opcodes::JSR_W) {
                    writer.write_be(relative as i32);
                } else {
                    let Ok(relative) = i16::try_from(relative) else {
                        return Err(Error::BranchOutOfRange {
                            offset: position,
                            delta: relative,
                        });
                    };
                    writer.write_be(relative);
                }
            }
            Operand::TableSwitch {
                default,
                low,
                high,
                offsets: table,
            } => {
                writer.write_be(instruction.opcode);
                write_padding(&mut writer, position);
                writer.write_be(target(*default)? as i32);
                writer.write_be(*low);
                writer.write_be(*high);
                for delta in table {
                    writer.write_be(target(*delta)? as i32);
                }
            }
            Operand::LookupSwitch { default, pairs } => {
                writer.write_be(instruction.opcode);
                write_padding(&mut writer, position);
                writer.write_be(target(*default)? as i32);
                writer.write_be(pairs.len() as i32);
                for (key, delta) in pairs {
                    writer.write_be(*key);
                    writer.write_be(target(*delta)? as i32);
                }
            }
        }
    }

    Ok(Relocated {
        code: writer.into_inner(),
        offsets,
    })
}

/// Compute group and instruction starts for the new layout.
fn layout(
    code: &[u8],
    instructions: &[Instruction],
    insertions: &BTreeMap<usize, Vec<u8>>,
) -> Result<OffsetMap> {
    let mut old_offsets = Vec::with_capacity(instructions.len());
    let mut group_starts = Vec::with_capacity(instructions.len());
    let mut instruction_starts = Vec::with_capacity(instructions.len());
    let mut cursor: usize = 0;

    for (index, instruction) in instructions.iter().enumerate() {
        old_offsets.push(instruction.offset);
        group_starts.push(cursor);
        if let Some(prelude) = insertions.get(&index) {
            cursor += prelude.len();
        }
        instruction_starts.push(cursor);

        cursor += match &instruction.operand {
            Operand::TableSwitch { offsets, .. } => {
                1 + padding(cursor) + 12 + offsets.len() * 4
            }
            Operand::LookupSwitch { pairs, .. } => 1 + padding(cursor) + 8 + pairs.len() * 8,
            _ => instruction.length as usize,
        };

        if cursor > usize::from(u16::MAX) {
            return Err(Error::CodeTooLarge(cursor));
        }
    }

    // Checked above, every start fits the u16 code range.
    let narrow = |starts: Vec<usize>| -> Vec<u32> { starts.into_iter().map(|s| s as u32).collect() };
    Ok(OffsetMap {
        old_offsets,
        group_starts: narrow(group_starts),
        instruction_starts: narrow(instruction_starts),
        old_length: code.len() as u32,
        new_length: cursor as u32,
    })
}

/// Padding bytes after a switch opcode at `position`.
fn padding(position: usize) -> usize {
    (4 - (position + 1) % 4) % 4
}

fn write_padding(writer: &mut ClassWriter, position: u32) {
    for _ in 0..padding(position as usize) {
        writer.write_be(0_u8);
    }
}
