// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![allow(clippy::too_many_arguments)]
// - 'jvm' talks to the VM through raw JNI and JVMTI function tables
// - 'hierarchy/source.rs' uses mmap to map class files into memory

//! # threadscope
//!
//! A JVMTI agent that finds out who starts threads. Every class the JVM loads is rewritten so
//! that calls to `Thread.start()` (and, on request, `Thread.join()`) on `java.lang.Thread` or
//! any subtype print a line naming the thread, followed by the stack of the starting code:
//!
//! ```text
//! [threadscope] Detected java.lang.Thread.start() id: 31 name: pool-1-thread-1
//! [threadscope] 	java.base/java.util.concurrent.ThreadPoolExecutor.addWorker(ThreadPoolExecutor.java:945)
//! [threadscope] 	java.base/java.util.concurrent.ThreadPoolExecutor.execute(ThreadPoolExecutor.java:1364)
//! [threadscope] 	com.example.Server.start(Server.java:42)
//! ```
//!
//! ## Quick Start
//!
//! Build the agent and load it before the application:
//!
//! ```bash
//! cargo build --release
//! java -agentpath:target/release/libthreadscope.so=sun/awt,sun/java2d -jar app.jar
//! ```
//!
//! The option string lists class name prefixes to leave alone. Three environment variables
//! switch on optional behavior:
//!
//! - `THREADSCOPE_TRACE_JOIN` - also report `join` calls (without a stack)
//! - `THREADSCOPE_TRACE_CALLER` - also print the thread making the call
//! - `THREADSCOPE_REPORT_UNRESOLVED` - report call sites whose target cannot be resolved
//!
//! ### Using the engine directly
//!
//! The rewriting engine has no dependency on a running VM:
//!
//! ```rust
//! use threadscope::prelude::*;
//!
//! let mut thread = ClassBuilder::new("java/lang/Thread", "java/lang/Object");
//! thread.abstract_method(0x0001, "start", "()V");
//! let bytes = thread.build()?;
//! let mut source = MemorySource::new();
//! source.insert("java/lang/Thread", bytes.clone());
//!
//! let (logger, _lines) = Logger::memory();
//! let target = TargetType::resolve(&source)?;
//! let transformer = Transformer::new(Config::default(), Some(target.into()), logger);
//!
//! let outcome = transformer.transform(
//!     &TypeUnderTransformation {
//!         name: Some("java/lang/Thread"),
//!         display_name: Some("java.lang.Thread"),
//!         bytes: &bytes,
//!     },
//!     &source,
//! );
//! assert!(matches!(outcome, Outcome::Untouched));
//! # Ok::<(), threadscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`classfile`] - class file model, parser and writer
//! - [`bytecode`] - JVM instruction decoding, relocation and assembly
//! - [`editor`] - call site enumeration and the prelude rewrite
//! - [`hierarchy`] - class sources, supertype walks and method resolution
//! - [`instrument`] - configuration, output, the transformer and the attach sequence
//! - [`jvm`] - the JVMTI binding and the `Agent_OnLoad` entry point
//!
//! ## Error Handling
//!
//! All operations return [`Result<T, Error>`](Result). While a class is being transformed
//! every error makes the instrument keep the class's original bytes; only a failure to resolve
//! `java.lang.Thread` while attaching stops the VM.
//!
//! ## Development and Testing
//!
//! ```bash
//! cargo test
//! cargo test -- --ignored   # runs rewritten classes on the `java` found on PATH
//! cargo +nightly fuzz run transform --release
//! ```
#[macro_use]
pub(crate) mod macros;

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use threadscope::prelude::*;
///
/// let config = Config::from_lookup(Some("sun/awt"), |_| false);
/// assert!(config.excludes("sun/awt/Toolkit").is_some());
/// ```
pub mod prelude;

/// The class file model.
///
/// A [`classfile::ClassFile`] keeps everything it does not interpret as raw bytes, so parsing
/// and writing an unmodified class reproduces it exactly. [`classfile::ClassBuilder`] creates
/// small classes from scratch, which the tests use as fixtures.
pub mod classfile;

/// JVM instructions.
///
/// - [`bytecode::decode_code`] - decode a method body into instructions
/// - [`bytecode::relocate`] - re-encode a body with byte sequences inserted before instructions
/// - [`bytecode::Assembler`] - emit short instruction sequences with stack tracking
pub mod bytecode;

/// Editing call sites in class files.
pub mod editor;

/// Type hierarchy and method resolution.
pub mod hierarchy;

/// The instrument.
pub mod instrument;

/// The JVMTI binding.
pub mod jvm;

/// `threadscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// `threadscope` Error type
///
/// See [`error::Error`] for the failure taxonomy.
pub use error::Error;

/// Cursor over big-endian class file data.
pub use classfile::parser::Parser;
