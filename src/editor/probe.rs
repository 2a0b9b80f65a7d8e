//! The diagnostic block injected in front of a monitored call.
//!
//! A [`Probe`] describes what to print; [`compile`] turns it into bytecode for one call site.
//! The generated prelude is straight-line code that leaves the operand stack and every
//! pre-existing local exactly as it found them:
//!
//! 1. the call's arguments are stored into fresh locals, last argument first
//! 2. the receiver is duplicated into a fresh local
//! 3. the detection line, the optional caller line and the optional stack block are printed
//! 4. the arguments are loaded back in their original order
//!
//! The original invoke follows the prelude unchanged, so argument values, evaluation order,
//! exceptions and the return value are those of the uninstrumented call.
//!
//! All output goes through `System.out.println` and uses nothing but `java.base` methods:
//!
//! ```text
//! [threadscope] Detected java.lang.Thread.start() id: 21 name: Thread-0
//! [threadscope] Caller thread id: 1 name: main
//! [threadscope] \tcom.example.Runner.launch(Runner.java:12)
//! [threadscope] \tcom.example.Runner.main(Runner.java:5)
//! ```
//!
//! The stack block is `Arrays.toString(new Throwable().getStackTrace())` with the brackets cut
//! off and every `", "` separator replaced by a line separator plus the indented marker, so
//! the innermost frame comes first and the last line carries no separator.

use strum::{Display, EnumIter, IntoEnumIterator, IntoStaticStr};

use crate::{
    bytecode::Assembler,
    classfile::{
        descriptor::{to_dotted, MethodDescriptor, ValueKind},
        ConstantPool,
    },
    hierarchy::MONITORED_TYPE,
    instrument::MARKER,
    Error, Result,
};

const SYSTEM: &str = "java/lang/System";
const STRING: &str = "java/lang/String";
const PRINT_STREAM: &str = "java/io/PrintStream";
const THROWABLE: &str = "java/lang/Throwable";
const ARRAYS: &str = "java/util/Arrays";

/// A monitored operation of the monitored type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Operation {
    /// `Thread.start`
    Start,
    /// `Thread.join`, every overload
    Join,
}

impl Operation {
    /// The operation a method called `name` performs, if it is monitored.
    #[must_use]
    pub fn from_method_name(name: &str) -> Option<Self> {
        Operation::iter().find(|operation| <&'static str>::from(*operation) == name)
    }
}

/// Description of the diagnostic block for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Probe {
    /// The monitored operation being called
    pub operation: Operation,
    /// Internal name of the type declaring the called method
    pub declaring_type: String,
    /// Print the identity of the calling thread
    pub trace_caller: bool,
    /// Print the current call stack
    pub dump_stack: bool,
}

impl Probe {
    /// Text of the detection line up to the receiver's id.
    #[must_use]
    pub fn detection_prefix(&self) -> String {
        format!(
            "{MARKER}Detected {}.{}() id: ",
            to_dotted(&self.declaring_type),
            self.operation
        )
    }
}

/// A compiled probe for one call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prelude {
    /// Bytecode to place in front of the invoke
    pub code: Vec<u8>,
    /// Additional operand stack slots needed on top of the slots in use at the call site
    pub extra_stack: u16,
    /// Local slots used, starting at the first fresh local
    pub extra_locals: u16,
}

/// Compile `probe` for a call with `descriptor` whose fresh locals start at `first_local`.
///
/// Constants the prelude needs are added to `pool`.
///
/// # Errors
/// Returns [`crate::Error::Malformed`] for an invalid descriptor,
/// [`crate::Error::NotSupported`] if the fresh locals do not fit the local variable limit and
/// [`crate::Error::ConstantPoolFull`] if the constants do not fit the pool.
pub fn compile(
    probe: &Probe,
    descriptor: &str,
    pool: &mut ConstantPool,
    first_local: u16,
) -> Result<Prelude> {
    let signature = MethodDescriptor::parse(descriptor)?;
    let argument_slots = signature.parameter_slots();
    let extra_locals = argument_slots + 2;
    if u32::from(first_local) + u32::from(extra_locals) > u32::from(u16::MAX) {
        return Err(Error::NotSupported(format!(
            "{} locals in use, no room for {} more",
            first_local, extra_locals
        )));
    }

    let mut slots = Vec::with_capacity(signature.parameters.len());
    let mut next = first_local;
    for kind in &signature.parameters {
        slots.push((*kind, next));
        next += kind.slots();
    }
    let receiver = next;
    let scratch = next + 1;

    let initial = argument_slots + 1;
    let mut asm = Assembler::new(pool, initial);

    for &(kind, slot) in slots.iter().rev() {
        asm.store(kind, slot)?;
    }
    asm.dup()?.store(ValueKind::Reference, receiver)?;

    asm.getstatic(SYSTEM, "out", "Ljava/io/PrintStream;")?
        .ldc_string(&probe.detection_prefix())?
        .load(ValueKind::Reference, receiver)?;
    identity(&mut asm)?
        .load(ValueKind::Reference, receiver)?
        .invokevirtual(MONITORED_TYPE, "getName", "()Ljava/lang/String;")?
        .invokevirtual(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;")?
        .invokevirtual(PRINT_STREAM, "println", "(Ljava/lang/String;)V")?;

    if probe.trace_caller {
        let prefix = format!("{MARKER}Caller thread id: ");
        asm.getstatic(SYSTEM, "out", "Ljava/io/PrintStream;")?
            .ldc_string(&prefix)?
            .invokestatic(MONITORED_TYPE, "currentThread", "()Ljava/lang/Thread;")?;
        identity(&mut asm)?
            .invokestatic(MONITORED_TYPE, "currentThread", "()Ljava/lang/Thread;")?
            .invokevirtual(MONITORED_TYPE, "getName", "()Ljava/lang/String;")?
            .invokevirtual(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;")?
            .invokevirtual(PRINT_STREAM, "println", "(Ljava/lang/String;)V")?;
    }

    if probe.dump_stack {
        stack_block(&mut asm, scratch)?;
    }

    for &(kind, slot) in &slots {
        asm.load(kind, slot)?;
    }

    if asm.depth() != initial {
        return Err(malformed_error!(
            "Prelude leaves {} stack slots, expected {}",
            asm.depth(),
            initial
        ));
    }

    let (code, max_depth) = asm.finish();
    Ok(Prelude {
        code,
        extra_stack: max_depth - initial,
        extra_locals,
    })
}

/// With `prefix, thread` on the stack, leave `prefix + thread.getId() + " name: "`.
fn identity<'a, 'p>(asm: &'a mut Assembler<'p>) -> Result<&'a mut Assembler<'p>> {
    asm.invokevirtual(MONITORED_TYPE, "getId", "()J")?
        .invokestatic(STRING, "valueOf", "(J)Ljava/lang/String;")?
        .invokevirtual(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;")?
        .ldc_string(" name: ")?
        .invokevirtual(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;")
}

fn stack_block(asm: &mut Assembler, scratch: u16) -> Result<()> {
    let indent = format!("{MARKER}\t");

    asm.getstatic(SYSTEM, "out", "Ljava/io/PrintStream;")?
        .ldc_string(&indent)?
        .new_object(THROWABLE)?
        .dup()?
        .invokespecial(THROWABLE, "<init>", "()V")?
        .invokevirtual(THROWABLE, "getStackTrace", "()[Ljava/lang/StackTraceElement;")?
        .invokestatic(ARRAYS, "toString", "([Ljava/lang/Object;)Ljava/lang/String;")?
        .store(ValueKind::Reference, scratch)?;

    // frames = text.substring(1, text.length() - 1)
    asm.load(ValueKind::Reference, scratch)?
        .iconst(1)?
        .load(ValueKind::Reference, scratch)?
        .invokevirtual(STRING, "length", "()I")?
        .iconst(1)?
        .isub()?
        .invokevirtual(STRING, "substring", "(II)Ljava/lang/String;")?;

    asm.ldc_string(", ")?
        .invokestatic(SYSTEM, "lineSeparator", "()Ljava/lang/String;")?
        .ldc_string(&indent)?
        .invokevirtual(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;")?
        .invokevirtual(
            STRING,
            "replace",
            "(Ljava/lang/CharSequence;Ljava/lang/CharSequence;)Ljava/lang/String;",
        )?
        .invokevirtual(STRING, "concat", "(Ljava/lang/String;)Ljava/lang/String;")?
        .invokevirtual(PRINT_STREAM, "println", "(Ljava/lang/String;)V")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{decode_code, opcodes},
        classfile::Constant,
    };

    fn probe(operation: Operation, trace_caller: bool, dump_stack: bool) -> Probe {
        Probe {
            operation,
            declaring_type: "java/lang/Thread".to_string(),
            trace_caller,
            dump_stack,
        }
    }

    fn strings(pool: &ConstantPool) -> Vec<String> {
        (1..pool.count() as u16)
            .filter_map(|index| match pool.get(index) {
                Ok(Constant::String(utf8)) => pool.utf8(*utf8).ok(),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn operations_by_name() {
        assert_eq!(Operation::from_method_name("start"), Some(Operation::Start));
        assert_eq!(Operation::from_method_name("join"), Some(Operation::Join));
        assert_eq!(Operation::from_method_name("run"), None);
        assert_eq!(Operation::Join.to_string(), "join");
    }

    #[test]
    fn start_probe() {
        let mut pool = ConstantPool::new();
        let prelude = compile(&probe(Operation::Start, false, true), "()V", &mut pool, 1).unwrap();

        let instructions = decode_code(&prelude.code).unwrap();
        assert_eq!(instructions[0].opcode, opcodes::DUP);
        assert_eq!(&prelude.code[1..3], &[opcodes::ASTORE, 1]);
        assert_eq!(prelude.extra_locals, 2);
        assert_eq!(prelude.extra_stack, 6);

        let strings = strings(&pool);
        assert!(strings.contains(&"[threadscope] Detected java.lang.Thread.start() id: ".to_string()));
        assert!(strings.contains(&"[threadscope] \t".to_string()));
        assert!(!strings.iter().any(|s| s.contains("Caller")));
    }

    #[test]
    fn join_probe_restores_arguments() {
        let mut pool = ConstantPool::new();
        let prelude = compile(&probe(Operation::Join, true, false), "(J)V", &mut pool, 3).unwrap();

        // lstore 3; dup; astore 5 ... lload 3
        assert_eq!(&prelude.code[..5], &[opcodes::LSTORE, 3, opcodes::DUP, opcodes::ASTORE, 5]);
        assert_eq!(&prelude.code[prelude.code.len() - 2..], &[opcodes::LLOAD, 3]);
        assert_eq!(prelude.extra_locals, 4);

        let strings = strings(&pool);
        assert!(strings.contains(&"[threadscope] Detected java.lang.Thread.join() id: ".to_string()));
        assert!(strings.contains(&"[threadscope] Caller thread id: ".to_string()));
        assert!(!strings.contains(&"[threadscope] \t".to_string()));
    }

    #[test]
    fn caller_line_is_independent_of_the_operation() {
        let mut pool = ConstantPool::new();
        compile(&probe(Operation::Start, true, true), "()V", &mut pool, 1).unwrap();
        let strings = strings(&pool);
        assert!(strings.contains(&"[threadscope] Caller thread id: ".to_string()));
        assert!(strings.contains(&"[threadscope] \t".to_string()));

        let mut pool = ConstantPool::new();
        compile(&probe(Operation::Join, false, false), "()V", &mut pool, 1).unwrap();
        let strings = self::strings(&pool);
        assert!(strings.contains(&"[threadscope] Detected java.lang.Thread.join() id: ".to_string()));
        assert!(!strings.iter().any(|s| s.contains("Caller")));
    }

    #[test]
    fn locals_limit() {
        let mut pool = ConstantPool::new();
        let result = compile(&probe(Operation::Start, false, true), "()V", &mut pool, u16::MAX - 1);
        assert!(matches!(result, Err(Error::NotSupported(_))));
    }
}
