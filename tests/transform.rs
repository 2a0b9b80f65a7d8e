//! Integration tests for the class transformer.
//!
//! Every test builds a small class path in memory: a `java.lang.Thread` with the lifecycle
//! methods, optional subclasses, and a caller class whose methods invoke them. The caller is
//! then run through [`Transformer::transform`] and the result is inspected at the class file
//! level.

use threadscope::{
    bytecode::{decode_code, opcodes, Operand},
    classfile::{attributes::CODE, Constant, ConstantPool},
    editor::EditableClass,
    hierarchy::TypeInfo,
    prelude::*,
};

const THREAD: &str = "java/lang/Thread";

fn body(code: Vec<u8>, max_stack: u16, max_locals: u16) -> CodeAttribute {
    CodeAttribute {
        max_stack,
        max_locals,
        code,
        exception_table: Vec::new(),
        attributes: Vec::new(),
    }
}

/// `java.lang.Thread`, `com.example.Worker extends Thread` and
/// `com.example.Custom extends Thread` overriding `start`, plus an unrelated `Engine.start()`.
fn class_path() -> Result<MemorySource> {
    let mut source = MemorySource::new();

    let mut thread = ClassBuilder::new(THREAD, "java/lang/Object");
    thread
        .interface("java/lang/Runnable")
        .abstract_method(0x0021, "start", "()V")
        .abstract_method(0x0011, "join", "()V")
        .abstract_method(0x0011, "join", "(J)V")
        .abstract_method(0x0001, "run", "()V");
    source.insert(THREAD, thread.build()?);

    source.insert(
        "com/example/Worker",
        ClassBuilder::new("com/example/Worker", THREAD).build()?,
    );

    let mut custom = ClassBuilder::new("com/example/Custom", THREAD);
    custom.abstract_method(0x0001, "start", "()V");
    source.insert("com/example/Custom", custom.build()?);

    let mut engine = ClassBuilder::new("com/example/Engine", "java/lang/Object");
    engine.abstract_method(0x0001, "start", "()V");
    source.insert("com/example/Engine", engine.build()?);

    Ok(source)
}

/// A caller whose static `go(X)V` method calls `owner.name descriptor` on its argument.
fn caller(owner: &str, name: &str, descriptor: &str, interface: bool) -> Result<Vec<u8>> {
    let mut builder = ClassBuilder::new("com/example/Launcher", "java/lang/Object");
    let (index, invoke) = if interface {
        (
            builder.interface_methodref(owner, name, descriptor)?,
            opcodes::INVOKEINTERFACE,
        )
    } else {
        (builder.methodref(owner, name, descriptor)?, opcodes::INVOKEVIRTUAL)
    };

    let [hi, lo] = index.to_be_bytes();
    let mut code = vec![opcodes::ALOAD_0, invoke, hi, lo];
    if interface {
        code.extend([1, 0]);
    }
    code.push(opcodes::RETURN);

    builder.method(0x0009, "go", &format!("(L{owner};)V"), body(code, 1, 1));
    builder.build()
}

fn launcher(bytes: &[u8]) -> TypeUnderTransformation<'_> {
    TypeUnderTransformation {
        name: Some("com/example/Launcher"),
        display_name: Some("com.example.Launcher"),
        bytes,
    }
}

fn transformer_with(
    source: &MemorySource,
    flags: Flags,
) -> Result<(Transformer, std::sync::Arc<MemorySink>)> {
    let (logger, sink) = Logger::memory();
    let target = TargetType::resolve(source)?;
    Ok((
        Transformer::new(Config::new(Vec::new(), flags), Some(target.into()), logger),
        sink,
    ))
}

fn strings(pool: &ConstantPool) -> Vec<String> {
    (1..pool.count() as u16)
        .filter_map(|index| match pool.get(index) {
            Ok(Constant::String(utf8)) => pool.utf8(*utf8).ok(),
            _ => None,
        })
        .collect()
}

fn rewritten(outcome: Outcome) -> Vec<u8> {
    match outcome {
        Outcome::Rewritten { bytes, .. } => bytes,
        other => panic!("expected a rewritten class, got {other:?}"),
    }
}

fn go_body(class: &ClassFile) -> Result<CodeAttribute> {
    let method = &class.methods[0];
    let index = method
        .find_attribute(&class.constant_pool, CODE)
        .expect("go has a body");
    CodeAttribute::parse(&method.attributes[index].info)
}

#[test]
fn start_on_a_subclass_reference_is_instrumented() -> Result<()> {
    let source = class_path()?;
    let (transformer, sink) = transformer_with(&source, Flags::empty())?;

    let bytes = caller("com/example/Worker", "start", "()V", false)?;
    let output = rewritten(transformer.transform(&launcher(&bytes), &source));
    assert!(sink.lines().is_empty());

    let class = ClassFile::parse(&output)?;
    let texts = strings(&class.constant_pool);
    assert!(texts.contains(&"[threadscope] Detected java.lang.Thread.start() id: ".to_string()));
    assert!(texts.contains(&"[threadscope] \t".to_string()));

    let code = go_body(&class)?;
    assert!(code.max_locals >= 3);
    assert!(code.max_stack > 1);

    let instructions = decode_code(&code.code)?;
    let tail = &instructions[instructions.len() - 2..];
    assert_eq!(tail[0].opcode, opcodes::INVOKEVIRTUAL);
    assert_eq!(tail[1].opcode, opcodes::RETURN);
    assert_eq!(
        class
            .constant_pool
            .member_ref(tail[0].pool_index(&code.code).unwrap())?
            .owner,
        "com/example/Worker"
    );
    Ok(())
}

#[test]
fn overriding_subtype_is_named_in_the_trace() -> Result<()> {
    let source = class_path()?;
    let (transformer, _) = transformer_with(&source, Flags::empty())?;

    let bytes = caller("com/example/Custom", "start", "()V", false)?;
    let class = ClassFile::parse(&rewritten(transformer.transform(&launcher(&bytes), &source)))?;
    assert!(strings(&class.constant_pool)
        .contains(&"[threadscope] Detected com.example.Custom.start() id: ".to_string()));
    Ok(())
}

#[test]
fn unrelated_start_is_untouched() -> Result<()> {
    let source = class_path()?;
    let (transformer, _) = transformer_with(&source, Flags::empty())?;

    let bytes = caller("com/example/Engine", "start", "()V", false)?;
    let outcome = transformer.transform(&launcher(&bytes), &source);
    assert!(matches!(outcome, Outcome::Untouched));
    assert_eq!(outcome.bytes_or(&bytes), &bytes[..]);

    let bytes = caller("java/lang/Runnable", "run", "()V", true)?;
    assert!(matches!(
        transformer.transform(&launcher(&bytes), &source),
        Outcome::Untouched
    ));
    Ok(())
}

#[test]
fn join_needs_the_flag_and_has_no_stack() -> Result<()> {
    let source = class_path()?;
    let bytes = caller(THREAD, "join", "()V", false)?;

    let (transformer, _) = transformer_with(&source, Flags::empty())?;
    assert!(matches!(
        transformer.transform(&launcher(&bytes), &source),
        Outcome::Untouched
    ));

    let (transformer, _) = transformer_with(&source, Flags::TRACE_JOIN | Flags::TRACE_CALLER)?;
    let class = ClassFile::parse(&rewritten(transformer.transform(&launcher(&bytes), &source)))?;
    let texts = strings(&class.constant_pool);
    assert!(texts.contains(&"[threadscope] Detected java.lang.Thread.join() id: ".to_string()));
    assert!(texts.contains(&"[threadscope] Caller thread id: ".to_string()));
    assert!(!texts.contains(&"[threadscope] \t".to_string()));
    Ok(())
}

#[test]
fn caller_line_follows_its_flag_alone() -> Result<()> {
    let source = class_path()?;

    let (transformer, _) = transformer_with(&source, Flags::TRACE_CALLER)?;
    let bytes = caller(THREAD, "start", "()V", false)?;
    let class = ClassFile::parse(&rewritten(transformer.transform(&launcher(&bytes), &source)))?;
    let texts = strings(&class.constant_pool);
    assert!(texts.contains(&"[threadscope] Caller thread id: ".to_string()));
    assert!(texts.contains(&"[threadscope] \t".to_string()));

    let (transformer, _) = transformer_with(&source, Flags::TRACE_JOIN)?;
    let bytes = caller(THREAD, "join", "()V", false)?;
    let class = ClassFile::parse(&rewritten(transformer.transform(&launcher(&bytes), &source)))?;
    let texts = strings(&class.constant_pool);
    assert!(texts.contains(&"[threadscope] Detected java.lang.Thread.join() id: ".to_string()));
    assert!(!texts.iter().any(|text| text.contains("Caller")));
    Ok(())
}

#[test]
fn timed_join_keeps_its_argument() -> Result<()> {
    let source = class_path()?;
    let (transformer, _) = transformer_with(&source, Flags::TRACE_JOIN)?;

    let mut builder = ClassBuilder::new("com/example/Launcher", "java/lang/Object");
    let [hi, lo] = builder.methodref(THREAD, "join", "(J)V")?.to_be_bytes();
    builder.method(
        0x0009,
        "go",
        "(Ljava/lang/Thread;)V",
        body(
            vec![opcodes::ALOAD_0, opcodes::LCONST_1, opcodes::INVOKEVIRTUAL, hi, lo, opcodes::RETURN],
            3,
            1,
        ),
    );
    let bytes = builder.build()?;

    let class = ClassFile::parse(&rewritten(transformer.transform(&launcher(&bytes), &source)))?;
    let code = go_body(&class)?;
    assert_eq!(code.max_locals, 1 + 2 + 2);

    let instructions = decode_code(&code.code)?;
    // The long is parked first and reloaded right before the original invoke.
    let park = &instructions[2];
    assert_eq!(park.opcode, opcodes::LSTORE);
    assert_eq!(code.code[park.offset as usize + 1], 1);
    let reload = &instructions[instructions.len() - 3];
    assert_eq!(reload.opcode, opcodes::LLOAD);
    assert_eq!(code.code[reload.offset as usize + 1], 1);
    Ok(())
}

#[test]
fn branches_into_the_call_land_on_the_prelude() -> Result<()> {
    let source = class_path()?;
    let (transformer, _) = transformer_with(&source, Flags::empty())?;

    // 0: aload_0  1: goto 4  4: invokevirtual start  7: return
    let mut builder = ClassBuilder::new("com/example/Launcher", "java/lang/Object");
    let [hi, lo] = builder.methodref(THREAD, "start", "()V")?.to_be_bytes();
    builder.method(
        0x0009,
        "go",
        "(Ljava/lang/Thread;)V",
        body(
            vec![
                opcodes::ALOAD_0,
                opcodes::GOTO,
                0,
                3,
                opcodes::INVOKEVIRTUAL,
                hi,
                lo,
                opcodes::RETURN,
            ],
            1,
            1,
        ),
    );
    let bytes = builder.build()?;

    let class = ClassFile::parse(&rewritten(transformer.transform(&launcher(&bytes), &source)))?;
    let instructions = decode_code(&go_body(&class)?.code)?;
    assert_eq!(instructions[1].opcode, opcodes::GOTO);
    assert_eq!(instructions[1].operand, Operand::Branch(3));
    assert_eq!(instructions[2].offset, 4);
    assert_eq!(instructions[2].opcode, opcodes::DUP);
    Ok(())
}

#[test]
fn excluded_and_unparseable_classes_keep_their_bytes() -> Result<()> {
    let source = class_path()?;
    let (logger, sink) = Logger::memory();
    let target = TargetType::resolve(&source)?;
    let config = Config::from_lookup(Some("com.example"), |_| false);
    let transformer = Transformer::new(config, Some(target.into()), logger);

    let bytes = caller(THREAD, "start", "()V", false)?;
    let outcome = transformer.transform(&launcher(&bytes), &source);
    assert!(matches!(outcome, Outcome::Excluded));
    assert_eq!(outcome.bytes_or(&bytes), &bytes[..]);
    assert_eq!(
        sink.take(),
        vec!["[threadscope] Excluded class=com/example/Launcher"]
    );

    let garbage = [0xCA, 0xFE, 0xBA, 0xBE, 0x00];
    let ty = TypeUnderTransformation {
        name: Some("org/example/Broken"),
        display_name: None,
        bytes: &garbage,
    };
    assert!(matches!(
        transformer.transform(&ty, &source),
        Outcome::Unparseable
    ));
    assert!(sink.lines().is_empty());
    Ok(())
}

#[test]
fn unresolved_sites_are_reported_and_skipped() -> Result<()> {
    let source = class_path()?;
    let (transformer, sink) = transformer_with(&source, Flags::REPORT_UNRESOLVED)?;

    let bytes = caller("com/example/Missing", "start", "()V", false)?;
    assert!(matches!(
        transformer.transform(&launcher(&bytes), &source),
        Outcome::Untouched
    ));
    assert_eq!(
        sink.lines(),
        vec![
            "[threadscope] Could not find method 'com/example/Missing.start()V' called from \
             com.example.Launcher.go(Lcom/example/Missing;)V: class com/example/Missing not found"
        ]
    );
    Ok(())
}

/// Edits class files normally but refuses to serialize them.
struct UnserializableEditor;

struct Unserializable(EditableClass);

impl BytecodeEditor for UnserializableEditor {
    type Type = Unserializable;

    fn parse(&self, bytes: &[u8]) -> Result<Unserializable> {
        Ok(Unserializable(ClassFileEditor.parse(bytes)?))
    }
}

impl EditableType for Unserializable {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn summary(&self) -> TypeInfo {
        self.0.summary()
    }

    fn call_sites(&self) -> Result<Vec<CallSite>> {
        self.0.call_sites()
    }

    fn enclosing_method(&self, site: &CallSite) -> String {
        self.0.enclosing_method(site)
    }

    fn replace_call_site(&mut self, site: &CallSite, probe: &Probe) -> Result<()> {
        self.0.replace_call_site(site, probe)
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Err(Error::Error("out of disk".to_string()))
    }
}

#[test]
fn failed_serialization_keeps_the_original_bytes() -> Result<()> {
    let source = class_path()?;
    let (logger, sink) = Logger::memory();
    let target = TargetType::resolve(&source)?;
    let transformer = Transformer::with_editor(
        Config::default(),
        Some(target.into()),
        logger,
        UnserializableEditor,
    );

    let bytes = caller(THREAD, "start", "()V", false)?;
    let outcome = transformer.transform(&launcher(&bytes), &source);
    assert!(matches!(&outcome, Outcome::Failed(Error::Error(message)) if message == "out of disk"));
    assert_eq!(outcome.bytes_or(&bytes), &bytes[..]);
    assert_eq!(
        sink.take(),
        vec!["[threadscope] Could not instrument com/example/Launcher/com.example.Launcher, \
              exception: out of disk"]
    );
    Ok(())
}

#[test]
fn branch_pushed_out_of_range_keeps_the_original_bytes() -> Result<()> {
    let source = class_path()?;
    let (transformer, sink) = transformer_with(&source, Flags::empty())?;

    // goto over 600 `aload_0; invokevirtual start` pairs to the final return
    const SITES: usize = 600;
    let mut builder = ClassBuilder::new("com/example/Launcher", "java/lang/Object");
    let [hi, lo] = builder.methodref(THREAD, "start", "()V")?.to_be_bytes();
    let [jump_hi, jump_lo] = (3 + 4 * SITES as u16).to_be_bytes();
    let mut code = vec![opcodes::GOTO, jump_hi, jump_lo];
    for _ in 0..SITES {
        code.extend([opcodes::ALOAD_0, opcodes::INVOKEVIRTUAL, hi, lo]);
    }
    code.push(opcodes::RETURN);
    builder.method(0x0009, "go", "(Ljava/lang/Thread;)V", body(code, 1, 1));
    let bytes = builder.build()?;

    let outcome = transformer.transform(&launcher(&bytes), &source);
    let Outcome::Failed(error) = &outcome else {
        panic!("expected a failed rewrite, got {outcome:?}");
    };
    assert!(matches!(
        error,
        Error::BranchOutOfRange { offset: 0, delta } if *delta > i64::from(i16::MAX)
    ));
    assert_eq!(outcome.bytes_or(&bytes), &bytes[..]);
    assert_eq!(
        sink.take(),
        vec![format!(
            "[threadscope] Could not instrument com/example/Launcher/com.example.Launcher, \
             exception: {error}"
        )]
    );
    Ok(())
}
