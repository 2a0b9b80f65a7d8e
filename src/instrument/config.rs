//! Attach-time configuration.
//!
//! The agent option string is a comma separated list of class name prefixes to leave alone,
//! e.g. `-agentpath:libthreadscope.so=sun/awt,sun/java2d`. Three environment variables switch
//! optional behavior on by their mere presence; their values are ignored:
//!
//! | Variable | Flag |
//! |---|---|
//! | `THREADSCOPE_REPORT_UNRESOLVED` | [`Flags::REPORT_UNRESOLVED`] |
//! | `THREADSCOPE_TRACE_JOIN` | [`Flags::TRACE_JOIN`] |
//! | `THREADSCOPE_TRACE_CALLER` | [`Flags::TRACE_CALLER`] |
//!
//! # Examples
//!
//! ```rust
//! use threadscope::instrument::{Config, Flags};
//!
//! let config = Config::from_lookup(Some("com.example.ignored, sun/awt,"), |key| {
//!     key == "THREADSCOPE_TRACE_JOIN"
//! });
//!
//! assert_eq!(config.excluded(), ["com/example/ignored", "sun/awt"]);
//! assert_eq!(config.flags(), Flags::TRACE_JOIN);
//! assert_eq!(config.excludes("com/example/ignored/Worker"), Some("com/example/ignored"));
//! assert_eq!(config.excludes("com/example/Runner"), None);
//! ```

use bitflags::bitflags;

use crate::{classfile::descriptor::to_internal, instrument::Logger};

/// Variable enabling [`Flags::REPORT_UNRESOLVED`].
pub const ENV_REPORT_UNRESOLVED: &str = "THREADSCOPE_REPORT_UNRESOLVED";
/// Variable enabling [`Flags::TRACE_JOIN`].
pub const ENV_TRACE_JOIN: &str = "THREADSCOPE_TRACE_JOIN";
/// Variable enabling [`Flags::TRACE_CALLER`].
pub const ENV_TRACE_CALLER: &str = "THREADSCOPE_TRACE_CALLER";

bitflags! {
    /// Optional behavior.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Flags: u8 {
        /// Log call sites whose target method cannot be resolved
        const REPORT_UNRESOLVED = 0x01;
        /// Instrument `join` calls as well as `start` calls
        const TRACE_JOIN = 0x02;
        /// Also print the thread making the call
        const TRACE_CALLER = 0x04;
    }
}

/// Immutable instrument configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    argument: Option<String>,
    excluded: Vec<String>,
    flags: Flags,
}

impl Config {
    /// Create a configuration from already parsed parts.
    #[must_use]
    pub fn new(excluded: Vec<String>, flags: Flags) -> Self {
        Config {
            argument: None,
            excluded,
            flags,
        }
    }

    /// Read the configuration from the agent option string and the process environment.
    #[must_use]
    pub fn from_env(argument: Option<&str>) -> Self {
        Self::from_lookup(argument, |key| std::env::var_os(key).is_some())
    }

    /// Read the configuration from the agent option string, asking `is_set` which
    /// environment variables are present.
    pub fn from_lookup(argument: Option<&str>, is_set: impl Fn(&str) -> bool) -> Self {
        let mut flags = Flags::empty();
        for (variable, flag) in [
            (ENV_REPORT_UNRESOLVED, Flags::REPORT_UNRESOLVED),
            (ENV_TRACE_JOIN, Flags::TRACE_JOIN),
            (ENV_TRACE_CALLER, Flags::TRACE_CALLER),
        ] {
            if is_set(variable) {
                flags |= flag;
            }
        }

        Config {
            argument: argument.map(str::to_string),
            excluded: argument.map(parse_exclusions).unwrap_or_default(),
            flags,
        }
    }

    /// Excluded class name prefixes, in internal form.
    #[must_use]
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// The enabled flags.
    #[must_use]
    pub fn flags(&self) -> Flags {
        self.flags
    }

    /// Whether `flag` is enabled.
    #[must_use]
    pub fn has(&self, flag: Flags) -> bool {
        self.flags.contains(flag)
    }

    /// The first excluded prefix `name` starts with.
    #[must_use]
    pub fn excludes(&self, name: &str) -> Option<&str> {
        self.excluded
            .iter()
            .map(String::as_str)
            .find(|prefix| name.starts_with(prefix))
    }

    /// Log the raw option string, the exclusions and the flags.
    pub fn log_summary(&self, logger: &Logger) {
        diag!(logger, "Arg: {}", self.argument.as_deref().unwrap_or("null"));
        diag!(logger, "Ignoring excluded: {}", self.excluded.join(","));

        let flags = self
            .flags
            .iter_names()
            .map(|(name, _)| name)
            .collect::<Vec<_>>();
        if flags.is_empty() {
            logger.line("Flags: none");
        } else {
            diag!(logger, "Flags: {}", flags.join(","));
        }
    }
}

/// Split an option string into exclusion prefixes.
///
/// Segments are trimmed, empty segments dropped and dotted names turned into internal names so
/// that `com.example` and `com/example` exclude the same classes.
#[must_use]
pub fn parse_exclusions(argument: &str) -> Vec<String> {
    argument
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(to_internal)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_argument() {
        let config = Config::from_lookup(None, |_| false);
        assert!(config.excluded().is_empty());
        assert_eq!(config.flags(), Flags::empty());
        assert_eq!(config.excludes("anything"), None);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn exclusions_are_normalized() {
        assert_eq!(
            parse_exclusions(" sun.awt ,,sun/java2d, "),
            vec!["sun/awt", "sun/java2d"]
        );
        assert!(parse_exclusions("").is_empty());
        assert!(parse_exclusions(",,").is_empty());
    }

    #[test]
    fn first_matching_prefix_wins() {
        let config = Config::new(vec!["com/a".to_string(), "com".to_string()], Flags::empty());
        assert_eq!(config.excludes("com/a/B"), Some("com/a"));
        assert_eq!(config.excludes("com/b/C"), Some("com"));
        assert_eq!(config.excludes("org/C"), None);
    }

    #[test]
    fn flags_from_presence() {
        let config = Config::from_lookup(None, |key| key != ENV_TRACE_JOIN);
        assert!(config.has(Flags::REPORT_UNRESOLVED));
        assert!(config.has(Flags::TRACE_CALLER));
        assert!(!config.has(Flags::TRACE_JOIN));
    }

    #[test]
    fn summary_lines() {
        let (logger, sink) = Logger::memory();
        Config::from_lookup(Some("sun/awt,sun.java2d"), |key| key == ENV_TRACE_CALLER)
            .log_summary(&logger);
        assert_eq!(
            sink.lines(),
            vec![
                "[threadscope] Arg: sun/awt,sun.java2d",
                "[threadscope] Ignoring excluded: sun/awt,sun/java2d",
                "[threadscope] Flags: TRACE_CALLER",
            ]
        );

        let (logger, sink) = Logger::memory();
        Config::default().log_summary(&logger);
        assert_eq!(sink.lines()[0], "[threadscope] Arg: null");
        assert_eq!(sink.lines()[2], "[threadscope] Flags: none");
    }
}
