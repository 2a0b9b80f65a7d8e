use thiserror::Error;

macro_rules! malformed_error {
    // Single string version
    ($msg:expr) => {
        crate::Error::Malformed {
            message: $msg.to_string(),
            file: file!(),
            line: line!(),
        }
    };

    // Format string with arguments version
    ($fmt:expr, $($arg:tt)*) => {
        crate::Error::Malformed {
            message: format!($fmt, $($arg)*),
            file: file!(),
            line: line!(),
        }
    };
}

macro_rules! out_of_bounds_error {
    () => {
        crate::Error::OutOfBounds {
            file: file!(),
            line: line!(),
        }
    };
}

/// The generic Error type, which provides coverage for all errors this library can potentially
/// return.
///
/// The variants fall into four groups, mirroring the failure taxonomy of the instrument:
///
/// ## Class file errors
/// - [`Error::Malformed`] - Corrupted or invalid class file structure
/// - [`Error::OutOfBounds`] - Attempted to read beyond the end of the input
/// - [`Error::NotSupported`] - A construct this engine does not handle
/// - [`Error::Empty`] - Empty input provided
///
/// ## Rewrite errors
/// - [`Error::BranchOutOfRange`] - A relocated branch no longer fits its offset field
/// - [`Error::CodeTooLarge`] - A rewritten method body exceeds the 64 KiB limit
/// - [`Error::ConstantPoolFull`] - No room left for the injected constants
///
/// ## Resolution and configuration errors
/// - [`Error::Unresolved`] - A call site's target could not be resolved
/// - [`Error::Configuration`] - The monitored type could not be resolved at attach time
///
/// ## Runtime errors
/// - [`Error::Jvmti`] - A JVMTI function returned an error code
/// - [`Error::Jni`] - A JNI call failed or left an exception pending
///
/// Only [`Error::Configuration`] is fatal. Every other error raised while a class is being
/// transformed makes the engine fall back to the class's original bytes.
///
/// # Examples
///
/// ```rust
/// use threadscope::{classfile::ClassFile, Error};
///
/// match ClassFile::parse(&[0xCA, 0xFE]) {
///     Ok(_) => println!("parsed"),
///     Err(Error::OutOfBounds { .. }) => println!("truncated class file"),
///     Err(Error::Malformed { message, .. }) => println!("malformed: {message}"),
///     Err(e) => println!("other error: {e}"),
/// }
/// ```
#[derive(Error, Debug)]
pub enum Error {
    /// The class file is damaged and could not be parsed.
    ///
    /// The error includes the source location where the malformation was detected for
    /// debugging purposes.
    #[error("Malformed - {file}:{line}: {message}")]
    Malformed {
        /// The message to be printed for the Malformed error
        message: String,
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// An out of bound access was attempted while parsing the input.
    #[error("Out of Bound read would have occurred! - {file}:{line}")]
    OutOfBounds {
        /// The source file in which this error occured
        file: &'static str,
        /// The source line in which this error occured
        line: u32,
    },

    /// This construct is not supported.
    #[error("This construct is not supported - {0}")]
    NotSupported(String),

    /// Provided input was empty.
    #[error("Provided input was empty")]
    Empty,

    /// File I/O error.
    #[error("{0}")]
    FileError(#[from] std::io::Error),

    /// The monitored type could not be resolved while attaching.
    ///
    /// Instrumenting without a reliable subtype test would silently under-instrument, so this
    /// error aborts the attach sequence.
    #[error("Configuration error - {0}")]
    Configuration(String),

    /// The target of a call site could not be resolved.
    #[error("Could not resolve {owner}.{name}{descriptor}: {reason}")]
    Unresolved {
        /// Internal name of the class the call site references
        owner: String,
        /// Name of the invoked method
        name: String,
        /// Descriptor of the invoked method
        descriptor: String,
        /// Why resolution failed
        reason: String,
    },

    /// A branch offset no longer fits its encoding after relocation.
    #[error("Branch at offset {offset} can no longer reach its target (delta {delta})")]
    BranchOutOfRange {
        /// New offset of the branch instruction
        offset: u32,
        /// Required relative offset
        delta: i64,
    },

    /// A rewritten method body exceeds the maximum code length of a class file.
    #[error("Rewritten method body is {0} bytes, the limit is 65535")]
    CodeTooLarge(usize),

    /// The constant pool has no room for another entry.
    #[error("Constant pool is full")]
    ConstantPoolFull,

    /// A JVMTI function returned an error.
    #[error("JVMTI {operation} failed with error {code}")]
    Jvmti {
        /// The JVMTI function that failed
        operation: &'static str,
        /// The raw `jvmtiError` code
        code: u32,
    },

    /// A JNI call failed or left a Java exception pending.
    #[error("JNI - {0}")]
    Jni(String),

    /// Generic error for miscellaneous failures.
    #[error("{0}")]
    Error(String),
}
