//! The JVMTI binding.
//!
//! Built as a `cdylib`, the crate is a native agent:
//!
//! ```text
//! java -agentpath:/path/to/libthreadscope.so=sun/awt,sun/java2d -jar app.jar
//! ```
//!
//! The option string after `=` is the exclusion list of [`crate::instrument::Config`]. The
//! binding declares the few JNI and JVMTI functions it calls in [`sys`], wraps them in
//! [`Jvmti`] and [`JniEnv`], reads class bytes through the defining class loader with
//! [`LoaderSource`] and drives the instrument through [`JvmRuntime`].
//!
//! Class lookups use `InputStream.readAllBytes`, so the agent needs Java 9 or later.

mod agent;
mod env;
mod runtime;
mod source;
pub mod sys;

pub use agent::Agent_OnLoad;
pub use env::{GlobalRef, JniEnv, Jvmti, LocalRef, MethodId};
pub use runtime::JvmRuntime;
pub use source::{LoaderSource, ResourceMethods};
