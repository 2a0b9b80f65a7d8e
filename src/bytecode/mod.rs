//! JVM bytecode decoding, relocation and assembly.
//!
//! Method bodies are handled in three steps:
//!
//! - [`decode_code`] turns a body into [`Instruction`]s that remember their original offsets
//! - [`Assembler`] produces the straight-line sequences that get inserted
//! - [`relocate`] lays the body out again with the insertions in place, re-encoding every
//!   branch and switch and returning an [`OffsetMap`] for the tables that refer to offsets
//!
//! The instruction set knowledge lives in [`opcodes`].

mod assembler;
mod decoder;
mod encoder;
mod instruction;
pub mod opcodes;

pub use assembler::Assembler;
pub use decoder::{decode_code, decode_instruction};
pub use encoder::{relocate, OffsetMap, Relocated};
pub use instruction::{FlowType, Instruction, Operand};
