//! Field and method descriptors.
//!
//! Only as much of a descriptor is modelled as code generation needs: how many local slots and
//! stack slots a value takes and which load/store instruction family moves it.
//!
//! # Examples
//!
//! ```rust
//! use threadscope::classfile::descriptor::{MethodDescriptor, ValueKind};
//!
//! let join = MethodDescriptor::parse("(JI)V")?;
//! assert_eq!(join.parameters, vec![ValueKind::Long, ValueKind::Int]);
//! assert_eq!(join.parameter_slots(), 3);
//! assert_eq!(join.return_kind, None);
//! # Ok::<(), threadscope::Error>(())
//! ```

use crate::Result;

/// The computational category of a value, as far as loads and stores are concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// `boolean`, `byte`, `char`, `short` and `int`
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// Objects and arrays
    Reference,
}

impl ValueKind {
    /// Number of local variable and operand stack slots a value of this kind occupies.
    #[must_use]
    pub fn slots(self) -> u16 {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }
}

/// A parsed method descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    /// Parameters in declaration order
    pub parameters: Vec<ValueKind>,
    /// Return value, `None` for `void`
    pub return_kind: Option<ValueKind>,
}

impl MethodDescriptor {
    /// Parse a method descriptor such as `(Ljava/lang/String;[I)J`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if `descriptor` is not a valid method descriptor.
    pub fn parse(descriptor: &str) -> Result<Self> {
        let bytes = descriptor.as_bytes();
        if bytes.first() != Some(&b'(') {
            return Err(malformed_error!("Invalid method descriptor '{}'", descriptor));
        }

        let mut position = 1;
        let mut parameters = Vec::new();
        while bytes.get(position) != Some(&b')') {
            let (kind, next) = field_type(bytes, position)
                .ok_or_else(|| malformed_error!("Invalid method descriptor '{}'", descriptor))?;
            parameters.push(kind);
            position = next;
        }
        position += 1;

        let return_kind = if bytes.get(position) == Some(&b'V') && position + 1 == bytes.len() {
            None
        } else {
            match field_type(bytes, position) {
                Some((kind, end)) if end == bytes.len() => Some(kind),
                _ => return Err(malformed_error!("Invalid method descriptor '{}'", descriptor)),
            }
        };

        Ok(MethodDescriptor {
            parameters,
            return_kind,
        })
    }

    /// Total local slots taken by the parameters, not counting a receiver.
    #[must_use]
    pub fn parameter_slots(&self) -> u16 {
        self.parameters.iter().map(|kind| kind.slots()).sum()
    }

    /// Stack slots the return value occupies.
    #[must_use]
    pub fn return_slots(&self) -> u16 {
        self.return_kind.map_or(0, ValueKind::slots)
    }
}

/// Parse one field type starting at `position`, returning its kind and the position after it.
fn field_type(bytes: &[u8], position: usize) -> Option<(ValueKind, usize)> {
    let mut end = position;
    while bytes.get(end) == Some(&b'[') {
        end += 1;
    }
    let array = end > position;

    let kind = match bytes.get(end)? {
        b'B' | b'C' | b'I' | b'S' | b'Z' => ValueKind::Int,
        b'J' => ValueKind::Long,
        b'F' => ValueKind::Float,
        b'D' => ValueKind::Double,
        b'L' => {
            let semicolon = bytes[end..].iter().position(|&b| b == b';')?;
            if semicolon == 1 {
                return None;
            }
            end += semicolon;
            ValueKind::Reference
        }
        _ => return None,
    };

    let kind = if array { ValueKind::Reference } else { kind };
    Some((kind, end + 1))
}

/// Convert an internal name (`java/lang/Thread`) into its dotted binary form.
#[must_use]
pub fn to_dotted(internal_name: &str) -> String {
    internal_name.replace('/', ".")
}

/// Convert a dotted binary name (`java.lang.Thread`) into its internal form.
#[must_use]
pub fn to_internal(binary_name: &str) -> String {
    binary_name.replace('.', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_descriptors() {
        let d = MethodDescriptor::parse("()V").unwrap();
        assert!(d.parameters.is_empty());
        assert_eq!(d.return_slots(), 0);

        let d = MethodDescriptor::parse("([[Ljava/lang/String;DZ)Ljava/lang/Object;").unwrap();
        assert_eq!(
            d.parameters,
            vec![ValueKind::Reference, ValueKind::Double, ValueKind::Int]
        );
        assert_eq!(d.parameter_slots(), 4);
        assert_eq!(d.return_kind, Some(ValueKind::Reference));

        let d = MethodDescriptor::parse("(F)[J").unwrap();
        assert_eq!(d.parameters, vec![ValueKind::Float]);
        assert_eq!(d.return_kind, Some(ValueKind::Reference));
    }

    #[test]
    fn reject_invalid() {
        for bad in ["", "V", "(", "(L;)V", "(Ljava/lang/String)V", "(I)", "(I)VV", "(Q)V", "()[V"] {
            assert!(MethodDescriptor::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn name_forms() {
        assert_eq!(to_dotted("com/example/Runner$1"), "com.example.Runner$1");
        assert_eq!(to_internal("com.example"), "com/example");
    }
}
