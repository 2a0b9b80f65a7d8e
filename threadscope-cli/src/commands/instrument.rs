use std::path::Path;

use anyhow::Context;
use serde::Serialize;
use threadscope::{classfile::descriptor::to_dotted, prelude::*};

use crate::{
    app::{GlobalOptions, TransformOptions},
    commands::common::{class_path, load_inputs, transformer, InputClass},
    output::{print_output, Align, TabWriter},
};

#[derive(Debug, Serialize)]
struct ClassResult {
    file: String,
    class: String,
    outcome: &'static str,
    sites: usize,
    written: Option<String>,
}

#[derive(Debug, Serialize)]
struct InstrumentSummary {
    files: usize,
    rewritten: usize,
    sites: usize,
    results: Vec<ClassResult>,
    diagnostics: Vec<String>,
}

pub fn run(
    input: &Path,
    output: Option<&Path>,
    quiet: bool,
    options: &TransformOptions,
    opts: &GlobalOptions,
) -> anyhow::Result<()> {
    let classes = load_inputs(input)?;
    let source = class_path(input, &classes, &options.classpath)?;
    let (logger, sink) = Logger::memory();
    let transformer = transformer(options, &source, logger)?;

    let mut results = Vec::with_capacity(classes.len());
    for class in &classes {
        let outcome = transformer.transform(
            &TypeUnderTransformation {
                name: Some(&class.name),
                display_name: Some(&to_dotted(&class.name)),
                bytes: &class.bytes,
            },
            &source,
        );

        let written = match output {
            Some(output) => {
                let destination = if input.is_dir() {
                    output.join(&class.relative)
                } else {
                    output.to_path_buf()
                };
                write_class(&destination, outcome.bytes_or(&class.bytes))?;
                Some(destination.display().to_string())
            }
            None => None,
        };

        results.push(result(class, &outcome, written));
    }

    let summary = InstrumentSummary {
        files: results.len(),
        rewritten: results.iter().filter(|r| r.outcome == "rewritten").count(),
        sites: results.iter().map(|r| r.sites).sum(),
        results,
        diagnostics: sink.take(),
    };

    print_output(&summary, opts, |summary| {
        if !quiet {
            for line in &summary.diagnostics {
                println!("{line}");
            }
        }

        let mut table = TabWriter::new(&[
            ("FILE", Align::Left),
            ("CLASS", Align::Left),
            ("OUTCOME", Align::Left),
            ("SITES", Align::Right),
        ]);
        for result in &summary.results {
            table.row(vec![
                result.file.clone(),
                result.class.clone(),
                result.outcome.to_string(),
                result.sites.to_string(),
            ]);
        }
        if table.is_empty() {
            println!("No class files found");
            return;
        }

        table.print();
        println!();
        println!(
            "Instrumented {} call sites in {} of {} classes",
            summary.sites, summary.rewritten, summary.files
        );
        if output.is_none() {
            println!("Nothing written, pass --output to save the classes");
        }
    })
}

fn result(class: &InputClass, outcome: &Outcome, written: Option<String>) -> ClassResult {
    let (label, sites) = match outcome {
        Outcome::Unnamed => ("unnamed", 0),
        Outcome::Excluded => ("excluded", 0),
        Outcome::Unparseable => ("unparseable", 0),
        Outcome::Untouched => ("untouched", 0),
        Outcome::Rewritten { sites, .. } => ("rewritten", *sites),
        Outcome::Failed(_) => ("failed", 0),
    };

    ClassResult {
        file: class.relative.display().to_string(),
        class: to_dotted(&class.name),
        outcome: label,
        sites,
        written,
    }
}

/// Write `bytes` to `path`, creating parent directories.
fn write_class(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }
    std::fs::write(path, bytes).with_context(|| format!("failed to write: {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadscope::bytecode::opcodes;

    fn write(root: &Path, name: &str, bytes: &[u8]) {
        write_class(&root.join(format!("{name}.class")), bytes).unwrap();
    }

    fn starter(name: &str) -> Vec<u8> {
        let mut builder = ClassBuilder::new(name, "java/lang/Object");
        let [hi, lo] = builder
            .methodref("java/lang/Thread", "start", "()V")
            .unwrap()
            .to_be_bytes();
        builder.method(
            0x0009,
            "launch",
            "(Ljava/lang/Thread;)V",
            CodeAttribute {
                max_stack: 1,
                max_locals: 1,
                code: vec![opcodes::ALOAD_0, opcodes::INVOKEVIRTUAL, hi, lo, opcodes::RETURN],
                exception_table: Vec::new(),
                attributes: Vec::new(),
            },
        );
        builder.build().unwrap()
    }

    #[test]
    fn directory_is_mirrored() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();

        let mut thread = ClassBuilder::new("java/lang/Thread", "java/lang/Object");
        thread.abstract_method(0x0001, "start", "()V");
        let thread = thread.build().unwrap();
        let plain = ClassBuilder::new("com/example/Plain", "java/lang/Object")
            .build()
            .unwrap();
        let excluded = starter("sun/awt/Toolkit");
        let started = starter("com/example/Starter");

        write(input.path(), "java/lang/Thread", &thread);
        write(input.path(), "com/example/Plain", &plain);
        write(input.path(), "com/example/Starter", &started);
        write(input.path(), "sun/awt/Toolkit", &excluded);

        let options = TransformOptions {
            classpath: Vec::new(),
            exclude: Some("sun.awt".to_string()),
            trace_join: false,
            trace_caller: false,
            report_unresolved: false,
            exact_match: false,
        };
        let global = GlobalOptions {
            json: true,
            verbose: false,
        };
        run(input.path(), Some(output.path()), true, &options, &global).unwrap();

        let read = |name: &str| std::fs::read(output.path().join(format!("{name}.class"))).unwrap();
        assert_eq!(read("java/lang/Thread"), thread);
        assert_eq!(read("com/example/Plain"), plain);
        assert_eq!(read("sun/awt/Toolkit"), excluded);

        let rewritten = read("com/example/Starter");
        assert_ne!(rewritten, started);
        ClassFile::parse(&rewritten).unwrap();
    }

    #[test]
    fn missing_thread_needs_exact_match() {
        let input = tempfile::tempdir().unwrap();
        write(input.path(), "com/example/Starter", &starter("com/example/Starter"));

        let mut options = TransformOptions {
            classpath: Vec::new(),
            exclude: None,
            trace_join: false,
            trace_caller: false,
            report_unresolved: false,
            exact_match: false,
        };
        let global = GlobalOptions {
            json: true,
            verbose: false,
        };
        assert!(run(input.path(), None, true, &options, &global).is_err());

        options.exact_match = true;
        run(input.path(), None, true, &options, &global).unwrap();
    }
}
