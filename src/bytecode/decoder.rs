//! Linear JVM bytecode decoding.
//!
//! [`decode_code`] splits a method body into [`Instruction`]s, front to back. Class files
//! never interleave data with code, so a linear sweep visits every instruction exactly once;
//! the only variable-length encodings are the `wide` prefix and the padded switch tables.
//!
//! # Examples
//!
//! ```rust
//! use threadscope::bytecode::{decode_code, opcodes, Operand};
//!
//! // aload_0; ifnull +6; aload_0; invokevirtual #7; return
//! let code = [0x2A, 0xC6, 0x00, 0x06, 0x2A, 0xB6, 0x00, 0x07, 0xB1];
//! let instructions = decode_code(&code)?;
//!
//! assert_eq!(instructions.len(), 5);
//! assert_eq!(instructions[1].operand, Operand::Branch(6));
//! assert_eq!(instructions[3].opcode, opcodes::INVOKEVIRTUAL);
//! assert_eq!(instructions[3].offset, 5);
//! # Ok::<(), threadscope::Error>(())
//! ```

use crate::{
    bytecode::{
        instruction::{Instruction, Operand},
        opcodes::*,
    },
    Parser, Result,
};

/// Decode a complete method body.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved or unknown opcodes, invalid `wide` targets
/// and inconsistent switch tables, and [`crate::Error::OutOfBounds`] if the last instruction is
/// truncated.
pub fn decode_code(code: &[u8]) -> Result<Vec<Instruction>> {
    let mut parser = Parser::new(code);
    let mut instructions = Vec::with_capacity(code.len() / 2);

    while parser.has_more_data() {
        instructions.push(decode_instruction(&mut parser)?);
    }

    Ok(instructions)
}

/// Decode the instruction at the parser's position.
///
/// Switch padding is computed relative to the start of the parser's data, which must
/// therefore be the start of the method body.
///
/// # Errors
/// See [`decode_code`].
pub fn decode_instruction(parser: &mut Parser) -> Result<Instruction> {
    let start = parser.pos();
    let mut opcode = parser.read_be::<u8>()?;
    let mut wide = false;

    let operand = match opcode {
        NOP..=DCONST_1 => Operand::Fixed,
        BIPUSH | LDC => {
            parser.advance_by(1)?;
            Operand::Fixed
        }
        SIPUSH | LDC_W | LDC2_W => {
            parser.advance_by(2)?;
            Operand::Fixed
        }
        ILOAD..=ALOAD | ISTORE..=ASTORE | RET => {
            parser.advance_by(1)?;
            Operand::Fixed
        }
        ILOAD_0..=SALOAD | ISTORE_0..=LXOR | I2L..=DCMPG => Operand::Fixed,
        IINC => {
            parser.advance_by(2)?;
            Operand::Fixed
        }
        IFEQ..=JSR | IFNULL | IFNONNULL => Operand::Branch(i32::from(parser.read_be::<i16>()?)),
        GOTO_W | JSR_W => Operand::Branch(parser.read_be::<i32>()?),
        TABLESWITCH => {
            parser.align(4)?;
            let default = parser.read_be::<i32>()?;
            let low = parser.read_be::<i32>()?;
            let high = parser.read_be::<i32>()?;
            if low > high {
                return Err(malformed_error!(
                    "tableswitch at {} has low {} > high {}",
                    start,
                    low,
                    high
                ));
            }
            let count = i64::from(high) - i64::from(low) + 1;
            if count * 4 > (parser.len() - parser.pos()) as i64 {
                return Err(out_of_bounds_error!());
            }
            let offsets = (0..count)
                .map(|_| parser.read_be::<i32>())
                .collect::<Result<Vec<_>>>()?;
            Operand::TableSwitch {
                default,
                low,
                high,
                offsets,
            }
        }
        LOOKUPSWITCH => {
            parser.align(4)?;
            let default = parser.read_be::<i32>()?;
            let count = parser.read_be::<i32>()?;
            if count < 0 || i64::from(count) * 8 > (parser.len() - parser.pos()) as i64 {
                return Err(malformed_error!(
                    "lookupswitch at {} has {} pairs",
                    start,
                    count
                ));
            }
            let pairs = (0..count)
                .map(|_| -> Result<(i32, i32)> {
                    Ok((parser.read_be::<i32>()?, parser.read_be::<i32>()?))
                })
                .collect::<Result<Vec<_>>>()?;
            Operand::LookupSwitch { default, pairs }
        }
        IRETURN..=RETURN | ARRAYLENGTH | ATHROW | MONITORENTER | MONITOREXIT => Operand::Fixed,
        GETSTATIC..=INVOKESTATIC | NEW | ANEWARRAY | CHECKCAST | INSTANCEOF => {
            parser.advance_by(2)?;
            Operand::Fixed
        }
        INVOKEINTERFACE | INVOKEDYNAMIC => {
            parser.advance_by(4)?;
            Operand::Fixed
        }
        NEWARRAY => {
            parser.advance_by(1)?;
            Operand::Fixed
        }
        MULTIANEWARRAY => {
            parser.advance_by(3)?;
            Operand::Fixed
        }
        WIDE => {
            wide = true;
            opcode = parser.read_be::<u8>()?;
            match opcode {
                ILOAD..=ALOAD | ISTORE..=ASTORE | RET => parser.advance_by(2)?,
                IINC => parser.advance_by(4)?,
                _ => {
                    return Err(malformed_error!(
                        "wide prefix at {} applied to opcode 0x{:02X}",
                        start,
                        opcode
                    ))
                }
            }
            Operand::Fixed
        }
        _ => {
            return Err(malformed_error!(
                "Invalid opcode 0x{:02X} at offset {}",
                opcode,
                start
            ))
        }
    };

    Ok(Instruction {
        offset: start as u32,
        opcode,
        wide,
        length: (parser.pos() - start) as u32,
        operand,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn lengths_of_common_instructions() {
        let code = [
            BIPUSH, 5, // 0
            SIPUSH, 1, 0, // 2
            LDC, 3, // 5
            ILOAD, 1, // 7
            IINC, 1, 1, // 9
            INVOKEINTERFACE, 0, 4, 1, 0, // 12
            MULTIANEWARRAY, 0, 2, 2, // 17
            GOTO_W, 0xFF, 0xFF, 0xFF, 0xEB, // 21
            RETURN, // 26
        ];
        let instructions = decode_code(&code).unwrap();

        let offsets: Vec<u32> = instructions.iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![0, 2, 5, 7, 9, 12, 17, 21, 26]);
        assert_eq!(instructions[7].operand, Operand::Branch(-21));
    }

    #[test]
    fn wide_instructions() {
        let code = [WIDE, ILOAD, 0x01, 0x00, WIDE, IINC, 0x01, 0x00, 0xFF, 0xFF, RETURN];
        let instructions = decode_code(&code).unwrap();

        assert_eq!(instructions.len(), 3);
        assert!(instructions[0].wide);
        assert_eq!(instructions[0].opcode, ILOAD);
        assert_eq!(instructions[0].length, 4);
        assert_eq!(instructions[1].length, 6);

        assert!(decode_code(&[WIDE, NOP]).is_err());
    }

    #[test]
    fn tableswitch_padding() {
        // iload_0 at 0, tableswitch at 1, padding to 4
        let code = [
            ILOAD_0, TABLESWITCH, 0, 0, //
            0, 0, 0, 20, // default
            0, 0, 0, 1, // low
            0, 0, 0, 2, // high
            0, 0, 0, 23, 0, 0, 0, 24, // offsets
            RETURN,
        ];
        let instructions = decode_code(&code).unwrap();

        assert_eq!(instructions[1].length, 23);
        assert_eq!(
            instructions[1].operand,
            Operand::TableSwitch {
                default: 20,
                low: 1,
                high: 2,
                offsets: vec![23, 24],
            }
        );
        assert_eq!(instructions[2].offset, 24);
    }

    #[test]
    fn lookupswitch_with_negative_count() {
        let code = [LOOKUPSWITCH, 0, 0, 0, 0, 0, 0, 8, 0xFF, 0xFF, 0xFF, 0xFF];
        assert!(matches!(decode_code(&code), Err(Error::Malformed { .. })));
    }

    #[test]
    fn reserved_opcode() {
        assert!(decode_code(&[0xCA]).is_err());
        assert!(decode_code(&[0xFE]).is_err());
    }

    #[test]
    fn truncated_operand() {
        assert!(matches!(
            decode_code(&[INVOKEVIRTUAL, 0x00]),
            Err(Error::OutOfBounds { .. })
        ));
    }
}
