//! [`BytecodeEditor`] for JVM class files.

use std::collections::BTreeMap;

use crate::{
    bytecode::{decode_code, relocate, Instruction, OffsetMap},
    classfile::{
        attributes, descriptor::to_dotted, stackmap, Attribute, ClassFile, CodeAttribute,
        ConstantPool, ExceptionEntry, LineNumber, LocalVariable, MemberKind,
    },
    editor::{
        probe::{self, Probe},
        BytecodeEditor, CallSite, EditableType, InvokeKind,
    },
    hierarchy::TypeInfo,
    Error, Result,
};

/// Parses class files into [`EditableClass`]es.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassFileEditor;

impl BytecodeEditor for ClassFileEditor {
    type Type = EditableClass;

    fn parse(&self, bytes: &[u8]) -> Result<EditableClass> {
        EditableClass::parse(bytes)
    }
}

/// The decoded body of one method and the edits pending on it.
#[derive(Debug, Clone)]
struct MethodBody {
    /// Position of the `Code` attribute among the method's attributes
    attribute: usize,
    code: CodeAttribute,
    instructions: Vec<Instruction>,
    /// Preludes keyed by instruction index
    insertions: BTreeMap<usize, Vec<u8>>,
    extra_stack: u16,
    extra_locals: u16,
}

/// A class file whose method bodies can have call sites instrumented.
///
/// Every `Code` attribute is decoded when the class is parsed, so a body the decoder does not
/// understand makes the whole class unparsable instead of failing half way through an edit.
/// Edits only touch the constant pool and the pending insertions; [`EditableType::serialize`]
/// relocates the edited bodies and leaves everything else byte for byte as it was.
#[derive(Debug, Clone)]
pub struct EditableClass {
    class: ClassFile,
    summary: TypeInfo,
    bodies: Vec<Option<MethodBody>>,
}

impl EditableClass {
    /// Parse a class file and decode its method bodies.
    ///
    /// # Errors
    /// Returns the class file or bytecode decoding error.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let class = ClassFile::parse(bytes)?;
        let summary = TypeInfo::from_class(&class)?;

        let bodies = class
            .methods
            .iter()
            .map(|method| -> Result<Option<MethodBody>> {
                let Some(attribute) = method.find_attribute(&class.constant_pool, attributes::CODE)
                else {
                    return Ok(None);
                };
                let code = CodeAttribute::parse(&method.attributes[attribute].info)?;
                let instructions = decode_code(&code.code)?;
                Ok(Some(MethodBody {
                    attribute,
                    code,
                    instructions,
                    insertions: BTreeMap::new(),
                    extra_stack: 0,
                    extra_locals: 0,
                }))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(EditableClass {
            class,
            summary,
            bodies,
        })
    }

    /// The underlying class file, without pending edits applied to method bodies.
    #[must_use]
    pub fn class_file(&self) -> &ClassFile {
        &self.class
    }

    /// Whether any call site has been replaced.
    #[must_use]
    pub fn is_edited(&self) -> bool {
        self.bodies
            .iter()
            .flatten()
            .any(|body| !body.insertions.is_empty())
    }
}

impl EditableType for EditableClass {
    fn name(&self) -> &str {
        &self.summary.name
    }

    fn summary(&self) -> TypeInfo {
        self.summary.clone()
    }

    fn call_sites(&self) -> Result<Vec<CallSite>> {
        let pool = &self.class.constant_pool;
        let mut sites = Vec::new();

        for (method_index, body) in self.bodies.iter().enumerate() {
            let Some(body) = body else {
                continue;
            };

            for (instruction_index, instruction) in body.instructions.iter().enumerate() {
                let Some(kind) = InvokeKind::from_opcode(instruction.opcode) else {
                    continue;
                };
                let Some(index) = instruction.pool_index(&body.code.code) else {
                    return Err(malformed_error!(
                        "Invoke at {} has no constant pool operand",
                        instruction.offset
                    ));
                };

                let reference = pool.member_ref(index)?;
                if reference.kind == MemberKind::Field {
                    return Err(malformed_error!(
                        "Invoke at {} references field {}.{}",
                        instruction.offset,
                        reference.owner,
                        reference.name
                    ));
                }

                sites.push(CallSite {
                    method_index,
                    instruction_index,
                    offset: instruction.offset,
                    kind,
                    owner: reference.owner,
                    name: reference.name,
                    descriptor: reference.descriptor,
                });
            }
        }

        Ok(sites)
    }

    fn enclosing_method(&self, site: &CallSite) -> String {
        let method = self.class.methods.get(site.method_index);
        let name = method.and_then(|m| self.class.member_name(m).ok());
        let descriptor = method.and_then(|m| self.class.member_descriptor(m).ok());

        format!(
            "{}.{}{}",
            to_dotted(&self.summary.name),
            name.as_deref().unwrap_or("<unknown>"),
            descriptor.as_deref().unwrap_or("")
        )
    }

    fn replace_call_site(&mut self, site: &CallSite, probe: &Probe) -> Result<()> {
        let Some(body) = self
            .bodies
            .get_mut(site.method_index)
            .and_then(Option::as_mut)
        else {
            return Err(malformed_error!(
                "Method {} has no code for call site {}",
                site.method_index,
                site.signature()
            ));
        };

        let matches = body
            .instructions
            .get(site.instruction_index)
            .is_some_and(|instruction| {
                instruction.offset == site.offset
                    && InvokeKind::from_opcode(instruction.opcode) == Some(site.kind)
            });
        if !matches {
            return Err(malformed_error!(
                "No {} at offset {} for call site {}",
                site.kind,
                site.offset,
                site.signature()
            ));
        }
        if body.insertions.contains_key(&site.instruction_index) {
            return Err(Error::NotSupported(format!(
                "Call site {} at offset {} is already instrumented",
                site.signature(),
                site.offset
            )));
        }

        let prelude = probe::compile(
            probe,
            &site.descriptor,
            &mut self.class.constant_pool,
            body.code.max_locals,
        )?;

        body.insertions.insert(site.instruction_index, prelude.code);
        body.extra_stack = body.extra_stack.max(prelude.extra_stack);
        body.extra_locals = body.extra_locals.max(prelude.extra_locals);
        Ok(())
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut class = self.class.clone();

        for (method_index, body) in self.bodies.iter().enumerate() {
            let Some(body) = body else {
                continue;
            };
            if body.insertions.is_empty() {
                continue;
            }

            let code = rewrite_body(&class.constant_pool, body)?;
            class.methods[method_index].attributes[body.attribute].info = code.to_bytes()?;
        }

        class.to_bytes()
    }
}

/// Apply the pending insertions of `body` and remap everything that refers to code offsets.
fn rewrite_body(pool: &ConstantPool, body: &MethodBody) -> Result<CodeAttribute> {
    let relocated = relocate(&body.code.code, &body.instructions, &body.insertions)?;
    let offsets = &relocated.offsets;

    let exception_table = body
        .code
        .exception_table
        .iter()
        .map(|entry| -> Result<ExceptionEntry> {
            Ok(ExceptionEntry {
                start_pc: group(offsets, entry.start_pc)?,
                end_pc: group(offsets, entry.end_pc)?,
                handler_pc: group(offsets, entry.handler_pc)?,
                catch_type: entry.catch_type,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut nested = Vec::with_capacity(body.code.attributes.len());
    for attribute in &body.code.attributes {
        if attribute.is(pool, attributes::RUNTIME_VISIBLE_TYPE_ANNOTATIONS)
            || attribute.is(pool, attributes::RUNTIME_INVISIBLE_TYPE_ANNOTATIONS)
        {
            // Offsets inside type annotations are not remapped; the annotations go.
            continue;
        }

        let info = if attribute.is(pool, attributes::LINE_NUMBER_TABLE) {
            let lines = LineNumber::parse_table(&attribute.info)?
                .into_iter()
                .map(|line| -> Result<LineNumber> {
                    Ok(LineNumber {
                        start_pc: group(offsets, line.start_pc)?,
                        line: line.line,
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            LineNumber::write_table(&lines)
        } else if attribute.is(pool, attributes::LOCAL_VARIABLE_TABLE)
            || attribute.is(pool, attributes::LOCAL_VARIABLE_TYPE_TABLE)
        {
            let variables = LocalVariable::parse_table(&attribute.info)?
                .into_iter()
                .map(|variable| remap_scope(offsets, variable))
                .collect::<Result<Vec<_>>>()?;
            LocalVariable::write_table(&variables)
        } else if attribute.is(pool, attributes::STACK_MAP_TABLE) {
            let mut frames = stackmap::decode_frames(&attribute.info)?;
            for frame in &mut frames {
                frame.offset = offsets.group(frame.offset)?;
                frame.map_uninitialized(|new_at| {
                    narrow(offsets.instruction(u32::from(new_at))?)
                })?;
            }
            stackmap::encode_frames(&frames)?
        } else {
            attribute.info.clone()
        };

        nested.push(Attribute {
            name_index: attribute.name_index,
            info,
        });
    }

    let Some(max_stack) = body.code.max_stack.checked_add(body.extra_stack) else {
        return Err(Error::NotSupported(format!(
            "Operand stack of {} slots cannot grow by {}",
            body.code.max_stack, body.extra_stack
        )));
    };
    let Some(max_locals) = body.code.max_locals.checked_add(body.extra_locals) else {
        return Err(Error::NotSupported(format!(
            "{} locals cannot grow by {}",
            body.code.max_locals, body.extra_locals
        )));
    };

    Ok(CodeAttribute {
        max_stack,
        max_locals,
        code: relocated.code,
        exception_table,
        attributes: nested,
    })
}

fn remap_scope(offsets: &OffsetMap, variable: LocalVariable) -> Result<LocalVariable> {
    let start = offsets.group(u32::from(variable.start_pc))?;
    let end = offsets.group(u32::from(variable.start_pc) + u32::from(variable.length))?;

    Ok(LocalVariable {
        start_pc: narrow(start)?,
        length: narrow(end - start)?,
        ..variable
    })
}

fn group(offsets: &OffsetMap, pc: u16) -> Result<u16> {
    narrow(offsets.group(u32::from(pc))?)
}

fn narrow(offset: u32) -> Result<u16> {
    u16::try_from(offset).map_err(|_| Error::CodeTooLarge(offset as usize))
}
