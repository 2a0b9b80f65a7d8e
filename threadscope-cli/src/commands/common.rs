use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use threadscope::{
    classfile::{descriptor::to_internal, ClassFile},
    instrument::{ENV_REPORT_UNRESOLVED, ENV_TRACE_CALLER, ENV_TRACE_JOIN},
    prelude::*,
};

use crate::app::TransformOptions;

/// One class file given on the command line.
pub struct InputClass {
    /// Where the class was read from
    pub path: PathBuf,
    /// Path relative to the input directory, or the file name for a single file
    pub relative: PathBuf,
    /// Internal name from the class file, or derived from `relative` if it does not parse
    pub name: String,
    pub bytes: Vec<u8>,
}

/// Read `input`, a single class file or a directory searched recursively for class files.
pub fn load_inputs(input: &Path) -> anyhow::Result<Vec<InputClass>> {
    let (root, files) = if input.is_dir() {
        (input, collect_class_files(input)?)
    } else {
        let parent = input.parent().unwrap_or(Path::new(""));
        (parent, vec![input.to_path_buf()])
    };

    files
        .into_iter()
        .map(|path| {
            let bytes = std::fs::read(&path)
                .with_context(|| format!("failed to read class file: {}", path.display()))?;
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            let name = class_name(&bytes).unwrap_or_else(|| name_from_path(&relative));
            Ok(InputClass {
                path,
                relative,
                name,
                bytes,
            })
        })
        .collect()
}

/// The class path to resolve supertypes against: the inputs first, then `--classpath`.
pub fn class_path(
    input: &Path,
    classes: &[InputClass],
    classpath: &[PathBuf],
) -> anyhow::Result<ChainSource> {
    let mut chain = ChainSource::default();
    if input.is_dir() {
        chain.push(Box::new(DirectorySource::new(input)?));
    } else {
        let mut memory = MemorySource::new();
        for class in classes {
            memory.insert(&class.name, class.bytes.clone());
        }
        chain.push(Box::new(memory));
    }

    for dir in classpath {
        let source = DirectorySource::new(dir)
            .with_context(|| format!("invalid --classpath entry: {}", dir.display()))?;
        chain.push(Box::new(source));
    }
    Ok(chain)
}

/// Configuration from the command line, the way the agent reads it from its options and
/// environment.
pub fn config(options: &TransformOptions) -> Config {
    Config::from_lookup(options.exclude.as_deref(), |key| match key {
        ENV_TRACE_JOIN => options.trace_join,
        ENV_TRACE_CALLER => options.trace_caller,
        ENV_REPORT_UNRESOLVED => options.report_unresolved,
        _ => false,
    })
}

/// A transformer over `source`, with `java/lang/Thread` resolved from it unless
/// `--exact-match` is given.
pub fn transformer(
    options: &TransformOptions,
    source: &dyn ClassSource,
    logger: Logger,
) -> anyhow::Result<Transformer> {
    let config = config(options);
    config.log_summary(&logger);

    let target = if options.exact_match {
        None
    } else {
        let target = TargetType::resolve(source).context(
            "pass a --classpath directory containing java/lang/Thread.class, or use --exact-match",
        )?;
        Some(Arc::new(target))
    };

    Ok(Transformer::new(config, target, logger))
}

/// Collect all `.class` files recursively from a directory.
pub fn collect_class_files(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    collect_class_files_recursive(dir, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_class_files_recursive(dir: &Path, files: &mut Vec<PathBuf>) -> anyhow::Result<()> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.is_dir() {
            collect_class_files_recursive(&path, files)?;
        } else if is_class_file(&path) {
            files.push(path);
        }
    }
    Ok(())
}

/// Returns true if the path has a `.class` extension.
pub fn is_class_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some("class")
}

fn class_name(bytes: &[u8]) -> Option<String> {
    ClassFile::parse(bytes).and_then(|class| class.name()).ok()
}

/// `com/example/Main.class` -> `com/example/Main`
fn name_from_path(relative: &Path) -> String {
    let stem = relative.with_extension("");
    to_internal(
        &stem
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_from_paths() {
        assert_eq!(
            name_from_path(Path::new("com/example/Main.class")),
            "com/example/Main"
        );
        assert_eq!(name_from_path(Path::new("Main.class")), "Main");
    }

    #[test]
    fn inputs_keep_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("com").join("example");
        std::fs::create_dir_all(&nested).unwrap();

        let bytes = ClassBuilder::new("com/example/Main", "java/lang/Object")
            .build()
            .unwrap();
        std::fs::write(nested.join("Main.class"), &bytes).unwrap();
        std::fs::write(nested.join("notes.txt"), b"not a class").unwrap();
        std::fs::write(dir.path().join("Broken.class"), b"\xCA\xFE").unwrap();

        let inputs = load_inputs(dir.path()).unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].name, "Broken");
        assert_eq!(inputs[1].relative, Path::new("com/example/Main.class"));
        assert_eq!(inputs[1].name, "com/example/Main");
        assert_eq!(inputs[1].bytes, bytes);
    }

    #[test]
    fn options_become_flags() {
        let options = TransformOptions {
            classpath: Vec::new(),
            exclude: Some("sun.awt".to_string()),
            trace_join: true,
            trace_caller: false,
            report_unresolved: true,
            exact_match: false,
        };
        let config = config(&options);
        assert_eq!(config.flags(), Flags::TRACE_JOIN | Flags::REPORT_UNRESOLVED);
        assert_eq!(config.excluded(), ["sun/awt"]);
    }
}
