//! Editable method representations.
//!
//! The transformer does not work on class files directly. It asks a [`BytecodeEditor`] to
//! parse the incoming bytes into an [`EditableType`], enumerates its call sites, replaces the
//! ones it wants instrumented and serializes the result. [`ClassFileEditor`] is the
//! implementation for JVM class files. Other editors plug in through
//! [`crate::instrument::Transformer::with_editor`]; whatever an editor fails on, the transformer
//! hands back the original bytes.
//!
//! # Key Components
//!
//! - [`BytecodeEditor`] / [`EditableType`] - the editing capability
//! - [`CallSite`] - one instance invocation inside a method body
//! - [`Probe`] - what to inject in front of a call, compiled by [`probe::compile`]
//! - [`ClassFileEditor`] / [`EditableClass`] - class file implementation
//!
//! # Examples
//!
//! ```rust
//! use threadscope::classfile::{ClassBuilder, CodeAttribute};
//! use threadscope::editor::{BytecodeEditor, ClassFileEditor, EditableType, Operation, Probe};
//!
//! let mut builder = ClassBuilder::new("com/example/Runner", "java/lang/Object");
//! let [hi, lo] = builder.methodref("java/lang/Thread", "start", "()V")?.to_be_bytes();
//! builder.method(0x0009, "launch", "(Ljava/lang/Thread;)V", CodeAttribute {
//!     max_stack: 1,
//!     max_locals: 1,
//!     code: vec![0x2A, 0xB6, hi, lo, 0xB1],
//!     exception_table: Vec::new(),
//!     attributes: Vec::new(),
//! });
//! let bytes = builder.build()?;
//!
//! let mut class = ClassFileEditor.parse(&bytes)?;
//! for site in class.call_sites()? {
//!     let probe = Probe {
//!         operation: Operation::Start,
//!         declaring_type: site.owner.clone(),
//!         trace_caller: false,
//!         dump_stack: true,
//!     };
//!     class.replace_call_site(&site, &probe)?;
//! }
//! assert!(class.serialize()?.len() > bytes.len());
//! # Ok::<(), threadscope::Error>(())
//! ```

mod class;
pub mod probe;
mod site;

pub use class::{ClassFileEditor, EditableClass};
pub use probe::{Operation, Probe};
pub use site::{CallSite, InvokeKind};

use crate::{hierarchy::TypeInfo, Result};

/// Parses raw type bytes into an editable representation.
pub trait BytecodeEditor: Send + Sync {
    /// The editable representation
    type Type: EditableType;

    /// Parse `bytes`.
    ///
    /// # Errors
    /// Returns an error if the bytes are not a type this editor understands.
    fn parse(&self, bytes: &[u8]) -> Result<Self::Type>;
}

/// A parsed type whose call sites can be instrumented.
pub trait EditableType {
    /// Internal name of the type.
    fn name(&self) -> &str;

    /// Hierarchy summary of the type as parsed.
    fn summary(&self) -> TypeInfo;

    /// Every instance invocation in every method body, in method and code order.
    ///
    /// # Errors
    /// Returns an error if an invocation refers to an invalid constant.
    fn call_sites(&self) -> Result<Vec<CallSite>>;

    /// Human readable name of the method containing `site`.
    fn enclosing_method(&self, site: &CallSite) -> String;

    /// Insert the diagnostic block described by `probe` in front of `site`.
    ///
    /// The invocation itself stays in place and keeps its arguments and result.
    ///
    /// # Errors
    /// Returns an error if `site` does not belong to this type, is already instrumented, or
    /// the block cannot be added.
    fn replace_call_site(&mut self, site: &CallSite, probe: &Probe) -> Result<()>;

    /// Serialize the type with all replacements applied.
    ///
    /// # Errors
    /// Returns an error if the edited type cannot be represented, e.g. because a method grew
    /// past its size limit or a branch can no longer reach its target.
    fn serialize(&self) -> Result<Vec<u8>>;
}
