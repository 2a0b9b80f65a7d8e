//! # threadscope Prelude
//!
//! The types needed to configure and run the instrument, build test classes and plug in
//! other class sources or runtimes.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all threadscope operations
pub use crate::Error;

/// The result type used throughout threadscope
pub use crate::Result;

// ================================================================================================
// Class Files
// ================================================================================================

/// Class file model and builder
pub use crate::classfile::{ClassBuilder, ClassFile, CodeAttribute};

// ================================================================================================
// Editing
// ================================================================================================

/// The editing capability and its class file implementation
pub use crate::editor::{
    BytecodeEditor, CallSite, ClassFileEditor, EditableType, InvokeKind, Operation, Probe,
};

// ================================================================================================
// Type Hierarchy
// ================================================================================================

/// Class sources and resolution
pub use crate::hierarchy::{
    ChainSource, ClassBytes, ClassSource, DirectorySource, MemorySource, Resolution, TargetType,
    TypeHierarchy, MONITORED_TYPE,
};

// ================================================================================================
// Instrument
// ================================================================================================

/// Configuration and output
pub use crate::instrument::{Config, Flags, LogSink, Logger, MemorySink, StdoutSink};

/// Transformation and the attach sequence
pub use crate::instrument::{
    attach, retransform_all, AttachReport, LoadedType, Outcome, RetransformStatus,
    RetransformTally, Runtime, SiteDecision, Transformer, TypeUnderTransformation,
};
