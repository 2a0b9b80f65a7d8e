//! The instrument: configuration, diagnostic output, the per-class transformer and the attach
//! sequence.
//!
//! This module is runtime agnostic. It talks to the host runtime through the
//! [`Runtime`] trait and to class bytes through [`crate::hierarchy::ClassSource`], so the
//! whole instrument runs in-process under test. `crate::jvm` binds it to a real JVM.
//!
//! # Examples
//!
//! ```rust
//! use threadscope::{
//!     hierarchy::MemorySource,
//!     instrument::{Config, Logger, Outcome, Transformer, TypeUnderTransformation},
//! };
//!
//! let (logger, sink) = Logger::memory();
//! let transformer = Transformer::new(Config::default(), None, logger);
//!
//! let outcome = transformer.transform(
//!     &TypeUnderTransformation { name: None, display_name: None, bytes: &[] },
//!     &MemorySource::new(),
//! );
//! assert!(matches!(outcome, Outcome::Unnamed));
//! assert_eq!(sink.lines(), vec!["[threadscope] ClassName was null; Class=null"]);
//! ```

mod attach;
mod config;
mod logger;
mod retransform;
mod transformer;

pub use attach::{attach, AttachReport};
pub use config::{
    parse_exclusions, Config, Flags, ENV_REPORT_UNRESOLVED, ENV_TRACE_CALLER, ENV_TRACE_JOIN,
};
pub use logger::{global, install, LogSink, Logger, MemorySink, StdoutSink, MARKER};
pub use retransform::{
    retransform_all, LoadedType, RetransformStatus, RetransformTally, Runtime, SELF_NAMESPACE,
};
pub use transformer::{Outcome, SiteDecision, Transformer, TypeUnderTransformation};
