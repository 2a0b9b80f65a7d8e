//! Runs the built agent inside a real JVM.
//!
//! These tests need a `java` executable (Java 9 or later) on `PATH` and are ignored by
//! default:
//!
//! ```bash
//! cargo test --test jvm_e2e -- --ignored
//! ```

use std::{
    env::consts::{DLL_PREFIX, DLL_SUFFIX},
    path::PathBuf,
    process::Command,
};

use threadscope::{bytecode::opcodes, instrument::ENV_TRACE_JOIN, prelude::*};

/// The agent library cargo built next to the test executable.
fn agent_library() -> PathBuf {
    let exe = std::env::current_exe().unwrap();
    let profile_dir = exe.parent().and_then(|deps| deps.parent()).unwrap();
    profile_dir.join(format!("{DLL_PREFIX}threadscope{DLL_SUFFIX}"))
}

/// `Main.main` creates a thread, starts it and joins it.
fn main_class() -> Result<Vec<u8>> {
    let mut builder = ClassBuilder::new("Main", "java/lang/Object");
    let thread = builder.class("java/lang/Thread")?;
    let init = builder.methodref("java/lang/Thread", "<init>", "()V")?;
    let start = builder.methodref("java/lang/Thread", "start", "()V")?;
    let join = builder.methodref("java/lang/Thread", "join", "()V")?;

    let [thread_hi, thread_lo] = thread.to_be_bytes();
    let [init_hi, init_lo] = init.to_be_bytes();
    let [start_hi, start_lo] = start.to_be_bytes();
    let [join_hi, join_lo] = join.to_be_bytes();

    builder.method(
        0x0009,
        "main",
        "([Ljava/lang/String;)V",
        CodeAttribute {
            max_stack: 2,
            max_locals: 2,
            code: vec![
                opcodes::NEW,
                thread_hi,
                thread_lo,
                opcodes::DUP,
                opcodes::INVOKESPECIAL,
                init_hi,
                init_lo,
                opcodes::ASTORE_1,
                opcodes::ALOAD_1,
                opcodes::INVOKEVIRTUAL,
                start_hi,
                start_lo,
                opcodes::ALOAD_1,
                opcodes::INVOKEVIRTUAL,
                join_hi,
                join_lo,
                opcodes::RETURN,
            ],
            exception_table: Vec::new(),
            attributes: Vec::new(),
        },
    );
    builder.build()
}

fn run_java(options: &str, trace_join: bool) -> Result<String> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("Main.class"), main_class()?)?;

    let mut command = Command::new("java");
    command
        .arg(format!("-agentpath:{}={}", agent_library().display(), options))
        .arg("-cp")
        .arg(dir.path())
        .arg("Main");
    if trace_join {
        command.env(ENV_TRACE_JOIN, "1");
    } else {
        command.env_remove(ENV_TRACE_JOIN);
    }

    let output = command.output()?;
    assert!(
        output.status.success(),
        "java failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[test]
#[ignore = "needs java on PATH"]
fn start_is_reported_with_its_stack() -> Result<()> {
    let stdout = run_java("", false)?;

    assert!(stdout.contains("[threadscope] Arg: "));
    assert!(stdout.contains("[threadscope] Retransform loaded classes; "));

    let detection = stdout
        .lines()
        .position(|line| line.starts_with("[threadscope] Detected java.lang.Thread.start() id: "))
        .expect("no start detected");
    let frame = stdout.lines().nth(detection + 1).unwrap_or_default();
    assert!(frame.starts_with("[threadscope] \t"), "{frame}");
    assert!(frame.contains("Main.main("), "{frame}");

    assert!(!stdout.contains("Detected java.lang.Thread.join()"));
    Ok(())
}

#[test]
#[ignore = "needs java on PATH"]
fn join_is_reported_on_request() -> Result<()> {
    let stdout = run_java("", true)?;
    assert!(stdout.contains("[threadscope] Detected java.lang.Thread.join() id: "));
    Ok(())
}

#[test]
#[ignore = "needs java on PATH"]
fn excluded_classes_are_left_alone() -> Result<()> {
    let stdout = run_java("Main", false)?;
    assert!(stdout.contains("[threadscope] Excluded class=Main"));
    assert!(!stdout.lines().any(|line| line.starts_with("[threadscope] \t") && line.contains("Main.main(")));
    Ok(())
}
