use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// threadscope - trace who starts and joins threads by rewriting class files
#[derive(Debug, Parser)]
#[command(name = "threadscope", version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOptions,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared across all subcommands.
#[derive(Debug, Parser)]
pub struct GlobalOptions {
    /// Emit output as JSON instead of human-readable text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Enable verbose (debug-level) logging output.
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Options that select how call sites are matched and what the prelude prints.
#[derive(Debug, Clone, Parser)]
pub struct TransformOptions {
    /// Additional class directories used to resolve supertypes (repeatable).
    ///
    /// One of them must contain java/lang/Thread.class unless --exact-match is given.
    #[arg(long = "classpath", value_name = "DIR")]
    pub classpath: Vec<PathBuf>,

    /// Comma-separated class name prefixes to leave alone (e.g. sun.awt,com.example.gen).
    #[arg(long, value_name = "LIST")]
    pub exclude: Option<String>,

    /// Also instrument Thread.join calls.
    #[arg(long)]
    pub trace_join: bool,

    /// Also print the thread making the call.
    #[arg(long)]
    pub trace_caller: bool,

    /// Report call sites whose target method cannot be resolved.
    #[arg(long)]
    pub report_unresolved: bool,

    /// Match java.lang.Thread by name only, without loading it. Calls declared by
    /// subclasses that override start or join are missed.
    #[arg(long)]
    pub exact_match: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Instrument a class file or every class file under a directory.
    Instrument {
        /// Path to a .class file or a directory of class files.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output file (for a single class) or directory. Without it nothing is written.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,

        /// Do not print the diagnostic lines the instrument produces.
        #[arg(short, long)]
        quiet: bool,

        #[command(flatten)]
        transform: TransformOptions,
    },

    /// List the Thread.start and Thread.join call sites and how they would be treated.
    Scan {
        /// Path to a .class file or a directory of class files.
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        #[command(flatten)]
        transform: TransformOptions,
    },
}
