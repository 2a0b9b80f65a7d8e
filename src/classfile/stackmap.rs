//! `StackMapTable` decoding and encoding.
//!
//! On disk every frame stores its offset as a delta to the previous frame and picks the most
//! compact of seven encodings. Relocating code moves frames, which can push a delta past what
//! its compact encoding holds, so frames are decoded into [`StackMapFrame`] values with absolute
//! offsets and a semantic [`FrameKind`], and [`encode_frames`] picks the encoding again from
//! scratch.
//!
//! # Examples
//!
//! ```rust
//! use threadscope::classfile::stackmap::{decode_frames, encode_frames, FrameKind};
//!
//! // same_frame at 5, then same_frame_extended 100 bytes later
//! let info = [0x00, 0x02, 5, 251, 0x00, 99];
//! let frames = decode_frames(&info)?;
//! assert_eq!(frames[1].offset, 105);
//! assert_eq!(frames[1].kind, FrameKind::Same);
//! assert_eq!(encode_frames(&frames)?, info);
//! # Ok::<(), threadscope::Error>(())
//! ```

use crate::{
    classfile::{parser::Parser, writer::ClassWriter},
    Result,
};

const ITEM_TOP: u8 = 0;
const ITEM_INTEGER: u8 = 1;
const ITEM_FLOAT: u8 = 2;
const ITEM_DOUBLE: u8 = 3;
const ITEM_LONG: u8 = 4;
const ITEM_NULL: u8 = 5;
const ITEM_UNINITIALIZED_THIS: u8 = 6;
const ITEM_OBJECT: u8 = 7;
const ITEM_UNINITIALIZED: u8 = 8;

const SAME_LOCALS_1_STACK_ITEM_EXTENDED: u8 = 247;
const SAME_FRAME_EXTENDED: u8 = 251;
const FULL_FRAME: u8 = 255;

/// A verification type of a local or stack slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationType {
    /// Unusable slot
    Top,
    /// `int` and smaller integral types
    Integer,
    /// `float`
    Float,
    /// `double`
    Double,
    /// `long`
    Long,
    /// The null reference
    Null,
    /// `this` before the super constructor ran
    UninitializedThis,
    /// An object of the class at the given constant pool index
    Object(u16),
    /// The result of the `new` instruction at the given bytecode offset
    Uninitialized(u16),
}

impl VerificationType {
    fn parse(parser: &mut Parser) -> Result<Self> {
        let tag = parser.read_be::<u8>()?;
        Ok(match tag {
            ITEM_TOP => VerificationType::Top,
            ITEM_INTEGER => VerificationType::Integer,
            ITEM_FLOAT => VerificationType::Float,
            ITEM_DOUBLE => VerificationType::Double,
            ITEM_LONG => VerificationType::Long,
            ITEM_NULL => VerificationType::Null,
            ITEM_UNINITIALIZED_THIS => VerificationType::UninitializedThis,
            ITEM_OBJECT => VerificationType::Object(parser.read_be()?),
            ITEM_UNINITIALIZED => VerificationType::Uninitialized(parser.read_be()?),
            _ => return Err(malformed_error!("Unknown verification type tag {}", tag)),
        })
    }

    fn write(self, writer: &mut ClassWriter) {
        match self {
            VerificationType::Top => writer.write_be(ITEM_TOP),
            VerificationType::Integer => writer.write_be(ITEM_INTEGER),
            VerificationType::Float => writer.write_be(ITEM_FLOAT),
            VerificationType::Double => writer.write_be(ITEM_DOUBLE),
            VerificationType::Long => writer.write_be(ITEM_LONG),
            VerificationType::Null => writer.write_be(ITEM_NULL),
            VerificationType::UninitializedThis => writer.write_be(ITEM_UNINITIALIZED_THIS),
            VerificationType::Object(class) => {
                writer.write_be(ITEM_OBJECT);
                writer.write_be(class);
            }
            VerificationType::Uninitialized(offset) => {
                writer.write_be(ITEM_UNINITIALIZED);
                writer.write_be(offset);
            }
        }
    }

    fn parse_list(parser: &mut Parser, count: usize) -> Result<Vec<Self>> {
        (0..count).map(|_| VerificationType::parse(parser)).collect()
    }
}

/// What a frame says relative to the previous one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameKind {
    /// Same locals, empty stack
    Same,
    /// Same locals, one stack item
    SameLocals1StackItem(VerificationType),
    /// The last `n` locals are gone (1-3), empty stack
    Chop(u8),
    /// Additional locals (1-3), empty stack
    Append(Vec<VerificationType>),
    /// Everything spelled out
    Full {
        /// Locals
        locals: Vec<VerificationType>,
        /// Operand stack, bottom first
        stack: Vec<VerificationType>,
    },
}

/// A frame at an absolute bytecode offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackMapFrame {
    /// Bytecode offset the frame applies to
    pub offset: u32,
    /// Frame contents
    pub kind: FrameKind,
}

impl StackMapFrame {
    /// Apply `map` to every `Uninitialized` offset in the frame.
    pub fn map_uninitialized(&mut self, mut map: impl FnMut(u16) -> Result<u16>) -> Result<()> {
        let mut apply = |item: &mut VerificationType| -> Result<()> {
            if let VerificationType::Uninitialized(offset) = item {
                *offset = map(*offset)?;
            }
            Ok(())
        };

        match &mut self.kind {
            FrameKind::Same | FrameKind::Chop(_) => Ok(()),
            FrameKind::SameLocals1StackItem(item) => apply(item),
            FrameKind::Append(items) => items.iter_mut().try_for_each(apply),
            FrameKind::Full { locals, stack } => {
                locals.iter_mut().chain(stack.iter_mut()).try_for_each(apply)
            }
        }
    }
}

/// Decode a `StackMapTable` payload into frames with absolute offsets.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for reserved frame types or unknown verification tags and
/// [`crate::Error::OutOfBounds`] if the payload is truncated.
pub fn decode_frames(info: &[u8]) -> Result<Vec<StackMapFrame>> {
    let mut parser = Parser::new(info);
    let count = parser.read_be::<u16>()?;
    let mut frames = Vec::with_capacity(usize::from(count));
    let mut previous: Option<u32> = None;

    for _ in 0..count {
        let frame_type = parser.read_be::<u8>()?;
        let (delta, kind) = match frame_type {
            0..=63 => (u16::from(frame_type), FrameKind::Same),
            64..=127 => (
                u16::from(frame_type - 64),
                FrameKind::SameLocals1StackItem(VerificationType::parse(&mut parser)?),
            ),
            SAME_LOCALS_1_STACK_ITEM_EXTENDED => {
                let delta = parser.read_be::<u16>()?;
                (
                    delta,
                    FrameKind::SameLocals1StackItem(VerificationType::parse(&mut parser)?),
                )
            }
            248..=250 => (
                parser.read_be::<u16>()?,
                FrameKind::Chop(SAME_FRAME_EXTENDED - frame_type),
            ),
            SAME_FRAME_EXTENDED => (parser.read_be::<u16>()?, FrameKind::Same),
            252..=254 => {
                let delta = parser.read_be::<u16>()?;
                let count = usize::from(frame_type - SAME_FRAME_EXTENDED);
                (
                    delta,
                    FrameKind::Append(VerificationType::parse_list(&mut parser, count)?),
                )
            }
            FULL_FRAME => {
                let delta = parser.read_be::<u16>()?;
                let locals = parser.read_be::<u16>()?;
                let locals = VerificationType::parse_list(&mut parser, usize::from(locals))?;
                let stack = parser.read_be::<u16>()?;
                let stack = VerificationType::parse_list(&mut parser, usize::from(stack))?;
                (delta, FrameKind::Full { locals, stack })
            }
            _ => return Err(malformed_error!("Reserved stack map frame type {}", frame_type)),
        };

        let offset = match previous {
            None => u32::from(delta),
            Some(previous) => previous + u32::from(delta) + 1,
        };
        previous = Some(offset);
        frames.push(StackMapFrame { offset, kind });
    }

    if parser.has_more_data() {
        return Err(malformed_error!("Trailing bytes after StackMapTable"));
    }

    Ok(frames)
}

/// Encode frames with absolute offsets, choosing the most compact encoding for each.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] if offsets are not strictly increasing, a delta exceeds
/// 65535, or a chop/append frame holds an invalid number of locals.
pub fn encode_frames(frames: &[StackMapFrame]) -> Result<Vec<u8>> {
    let Ok(count) = u16::try_from(frames.len()) else {
        return Err(malformed_error!("{} stack map frames", frames.len()));
    };

    let mut writer = ClassWriter::with_capacity(2 + frames.len() * 4);
    writer.write_be(count);

    let mut previous: Option<u32> = None;
    for frame in frames {
        let delta = match previous {
            None => Some(frame.offset),
            Some(previous) => frame
                .offset
                .checked_sub(previous)
                .and_then(|gap| gap.checked_sub(1)),
        };
        let Some(delta) = delta.and_then(|delta| u16::try_from(delta).ok()) else {
            return Err(malformed_error!(
                "Stack map frame at {} cannot follow {:?}",
                frame.offset,
                previous
            ));
        };
        previous = Some(frame.offset);

        match &frame.kind {
            FrameKind::Same if delta <= 63 => writer.write_be(delta as u8),
            FrameKind::Same => {
                writer.write_be(SAME_FRAME_EXTENDED);
                writer.write_be(delta);
            }
            FrameKind::SameLocals1StackItem(item) => {
                if delta <= 63 {
                    writer.write_be(64 + delta as u8);
                } else {
                    writer.write_be(SAME_LOCALS_1_STACK_ITEM_EXTENDED);
                    writer.write_be(delta);
                }
                item.write(&mut writer);
            }
            FrameKind::Chop(chopped) => {
                if !(1..=3).contains(chopped) {
                    return Err(malformed_error!("Chop frame removing {} locals", chopped));
                }
                writer.write_be(SAME_FRAME_EXTENDED - chopped);
                writer.write_be(delta);
            }
            FrameKind::Append(items) => {
                if !(1..=3).contains(&items.len()) {
                    return Err(malformed_error!("Append frame adding {} locals", items.len()));
                }
                writer.write_be(SAME_FRAME_EXTENDED + items.len() as u8);
                writer.write_be(delta);
                for item in items {
                    item.write(&mut writer);
                }
            }
            FrameKind::Full { locals, stack } => {
                writer.write_be(FULL_FRAME);
                writer.write_be(delta);
                writer.write_be(locals.len() as u16);
                for item in locals {
                    item.write(&mut writer);
                }
                writer.write_be(stack.len() as u16);
                for item in stack {
                    item.write(&mut writer);
                }
            }
        }
    }

    Ok(writer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_all_frame_types() {
        let info = [
            0x00, 0x06, //
            3, // same at 3
            65, 1, // same_locals_1_stack_item(int) at 5
            249, 0x00, 0x02, // chop 2 at 8
            253, 0x00, 0x00, 7, 0x00, 0x04, 4, // append Object(#4), long at 9
            247, 0x00, 0x64, 8, 0x00, 0x01, // same_locals_1 extended, Uninitialized(1) at 110
            255, 0x00, 0x00, 0x00, 0x01, 6, 0x00, 0x01, 5, // full at 111
        ];
        let frames = decode_frames(&info).unwrap();

        let offsets: Vec<u32> = frames.iter().map(|f| f.offset).collect();
        assert_eq!(offsets, vec![3, 5, 8, 9, 110, 111]);
        assert_eq!(frames[2].kind, FrameKind::Chop(2));
        assert_eq!(
            frames[3].kind,
            FrameKind::Append(vec![VerificationType::Object(4), VerificationType::Long])
        );
        assert_eq!(
            frames[5].kind,
            FrameKind::Full {
                locals: vec![VerificationType::UninitializedThis],
                stack: vec![VerificationType::Null],
            }
        );

        assert_eq!(encode_frames(&frames).unwrap(), info);
    }

    #[test]
    fn widen_when_delta_grows() {
        let mut frames = decode_frames(&[0x00, 0x02, 10, 64 + 5, 1]).unwrap();
        frames[0].offset += 100;
        frames[1].offset += 100;
        let encoded = encode_frames(&frames).unwrap();

        assert_eq!(encoded[2], SAME_FRAME_EXTENDED);
        assert_eq!(decode_frames(&encoded).unwrap(), frames);
    }

    #[test]
    fn reject_unordered_frames() {
        let frames = vec![
            StackMapFrame {
                offset: 4,
                kind: FrameKind::Same,
            },
            StackMapFrame {
                offset: 4,
                kind: FrameKind::Same,
            },
        ];
        assert!(encode_frames(&frames).is_err());
    }

    #[test]
    fn reserved_frame_type() {
        assert!(decode_frames(&[0x00, 0x01, 200]).is_err());
    }

    #[test]
    fn map_uninitialized_offsets() {
        let mut frame = StackMapFrame {
            offset: 20,
            kind: FrameKind::Full {
                locals: vec![VerificationType::Integer],
                stack: vec![
                    VerificationType::Uninitialized(3),
                    VerificationType::Uninitialized(3),
                ],
            },
        };
        frame.map_uninitialized(|offset| Ok(offset + 40)).unwrap();

        let FrameKind::Full { stack, .. } = &frame.kind else {
            panic!("kind changed");
        };
        assert_eq!(stack[1], VerificationType::Uninitialized(43));
    }
}
