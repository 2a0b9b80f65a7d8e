//! Type hierarchy inspection.
//!
//! Deciding whether a call site targets the monitored type needs two answers the class being
//! transformed cannot give on its own: which type actually declares the invoked method, and
//! whether that type is the monitored type or one of its subtypes. Both are computed from
//! summaries ([`TypeInfo`]) of the classes involved, loaded through a [`ClassSource`].
//!
//! # Key Components
//!
//! - [`ClassSource`] and its implementations - where class bytes come from
//! - [`TypeHierarchy`] - memoizing resolution and subtype queries for one transformation
//! - [`TargetType`] - the monitored type, resolved once at attach time

mod resolver;
mod source;
mod target;

pub use resolver::{MethodKey, Resolution, TypeHierarchy, TypeInfo};
pub use source::{ChainSource, ClassBytes, ClassSource, DirectorySource, MemorySource};
pub use target::{TargetType, MONITORED_TYPE};
