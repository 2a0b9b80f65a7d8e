//! The call-site scanner and rewriter.
//!
//! [`Transformer::transform`] is what the load-time hook runs for every class. It either
//! returns rewritten bytes or tells the caller to keep the original ones; there is no third
//! option and no partial result. The steps, in order:
//!
//! 1. classes without a name are skipped
//! 2. classes under an excluded prefix are skipped before anything is parsed
//! 3. the bytes are parsed; unparsable classes are skipped
//! 4. every instance call site is resolved to the type declaring its target; calls to `start`
//!    (and with [`Flags::TRACE_JOIN`], `join`) declared by the monitored type or a subtype get
//!    a diagnostic prelude
//! 5. the edited class is serialized; any error while editing or serializing discards all edits
//!
//! The transformer holds nothing but immutable state and can be called from any number of
//! threads at once.

use std::sync::Arc;

use crate::{
    editor::{BytecodeEditor, CallSite, ClassFileEditor, EditableType, Operation, Probe},
    hierarchy::{ClassSource, Resolution, TargetType, TypeHierarchy, MONITORED_TYPE},
    instrument::{Config, Flags, Logger},
    Error, Result,
};

/// One class presented to the hook.
#[derive(Debug, Clone, Copy)]
pub struct TypeUnderTransformation<'a> {
    /// Internal name, `None` for classes the runtime does not name
    pub name: Option<&'a str>,
    /// Name for diagnostics, usually the dotted binary name
    pub display_name: Option<&'a str>,
    /// The class file
    pub bytes: &'a [u8],
}

/// What [`Transformer::transform`] did with a class.
///
/// Every variant except [`Outcome::Rewritten`] means the original bytes are to be used.
#[derive(Debug)]
pub enum Outcome {
    /// The class has no name
    Unnamed,
    /// The class is under an excluded prefix
    Excluded,
    /// The bytes could not be parsed
    Unparseable,
    /// Nothing in the class is instrumented
    Untouched,
    /// The class was instrumented
    Rewritten {
        /// The rewritten class file
        bytes: Vec<u8>,
        /// Number of instrumented call sites
        sites: usize,
    },
    /// Instrumenting failed and all edits were discarded
    Failed(Error),
}

impl Outcome {
    /// Whether the class was rewritten.
    #[must_use]
    pub fn is_rewritten(&self) -> bool {
        matches!(self, Outcome::Rewritten { .. })
    }

    /// The bytes to use in place of `original`.
    #[must_use]
    pub fn bytes_or<'a>(&'a self, original: &'a [u8]) -> &'a [u8] {
        match self {
            Outcome::Rewritten { bytes, .. } => bytes,
            _ => original,
        }
    }
}

/// How one call site is treated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteDecision {
    /// The call site
    pub site: CallSite,
    /// Resolution of the target method, `None` if resolving was not needed
    pub resolution: Option<Resolution>,
    /// The probe to inject, `None` to leave the call alone
    pub probe: Option<Probe>,
}

/// Instruments the monitored calls of a class.
pub struct Transformer<E: BytecodeEditor = ClassFileEditor> {
    config: Config,
    target: Option<Arc<TargetType>>,
    logger: Logger,
    editor: E,
}

impl Transformer<ClassFileEditor> {
    /// Create a transformer for class files.
    ///
    /// Without a `target`, declaring types are compared to the monitored type by name only and
    /// calls declared by subtypes are missed.
    #[must_use]
    pub fn new(config: Config, target: Option<Arc<TargetType>>, logger: Logger) -> Self {
        Self::with_editor(config, target, logger, ClassFileEditor)
    }
}

impl<E: BytecodeEditor> Transformer<E> {
    /// Create a transformer that parses and edits with `editor`.
    pub fn with_editor(
        config: Config,
        target: Option<Arc<TargetType>>,
        logger: Logger,
        editor: E,
    ) -> Self {
        Transformer {
            config,
            target,
            logger,
            editor,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The logger diagnostics go to.
    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Instrument `ty`, resolving supertypes through `source`.
    pub fn transform(&self, ty: &TypeUnderTransformation, source: &dyn ClassSource) -> Outcome {
        let display_name = ty.display_name.unwrap_or("null");
        let Some(name) = ty.name else {
            diag!(self.logger, "ClassName was null; Class={}", display_name);
            return Outcome::Unnamed;
        };

        if self.config.excludes(name).is_some() {
            diag!(self.logger, "Excluded class={}", name);
            return Outcome::Excluded;
        }

        let mut class = match self.editor.parse(ty.bytes) {
            Ok(class) => class,
            Err(error) => {
                log::debug!("Leaving {} alone, it does not parse: {}", name, error);
                return Outcome::Unparseable;
            }
        };

        let result = self
            .rewrite(&mut class, source)
            .and_then(|sites| match sites {
                0 => Ok(None),
                sites => Ok(Some((class.serialize()?, sites))),
            });

        match result {
            Ok(None) => Outcome::Untouched,
            Ok(Some((bytes, sites))) => {
                log::debug!("Instrumented {} call sites in {}", sites, name);
                Outcome::Rewritten { bytes, sites }
            }
            Err(error) => {
                diag!(
                    self.logger,
                    "Could not instrument {}/{}, exception: {}",
                    name,
                    display_name,
                    error
                );
                Outcome::Failed(error)
            }
        }
    }

    /// Decide, without editing, how every call site of `class` would be treated.
    ///
    /// # Errors
    /// Returns an error if the call sites cannot be enumerated.
    pub fn inspect(&self, class: &E::Type, source: &dyn ClassSource) -> Result<Vec<SiteDecision>> {
        let hierarchy = self.hierarchy_for(class, source);
        Ok(class
            .call_sites()?
            .into_iter()
            .map(|site| self.decide(site, &hierarchy))
            .collect())
    }

    /// Instrument the call sites of `class`, returning how many were edited.
    fn rewrite(&self, class: &mut E::Type, source: &dyn ClassSource) -> Result<usize> {
        let hierarchy = self.hierarchy_for(class, source);
        let mut edited = 0;

        for site in class.call_sites()? {
            let decision = self.decide(site, &hierarchy);

            if let Some(Resolution::Unresolved { reason }) = &decision.resolution {
                if self.config.has(Flags::REPORT_UNRESOLVED) {
                    diag!(
                        self.logger,
                        "Could not find method '{}' called from {}: {}",
                        decision.site.signature(),
                        class.enclosing_method(&decision.site),
                        reason
                    );
                }
            }

            if let Some(probe) = &decision.probe {
                class.replace_call_site(&decision.site, probe)?;
                edited += 1;
            }
        }

        Ok(edited)
    }

    fn hierarchy_for<'s>(&self, class: &E::Type, source: &'s dyn ClassSource) -> TypeHierarchy<'s> {
        let hierarchy = TypeHierarchy::new(source);
        if let Some(target) = &self.target {
            hierarchy.seed(target.info().clone());
        }
        hierarchy.seed(Arc::new(class.summary()));
        hierarchy
    }

    fn decide(&self, site: CallSite, hierarchy: &TypeHierarchy) -> SiteDecision {
        let operation = Operation::from_method_name(&site.name);
        if operation.is_none() && !self.config.has(Flags::REPORT_UNRESOLVED) {
            return SiteDecision {
                site,
                resolution: None,
                probe: None,
            };
        }

        let resolution = hierarchy.resolve_method(&site.owner, &site.name, &site.descriptor);
        let probe = match (operation, resolution.declaring()) {
            (Some(operation), Some(declaring)) if self.is_monitored(declaring, hierarchy) => {
                self.probe_for(operation, declaring)
            }
            _ => None,
        };

        SiteDecision {
            site,
            resolution: Some(resolution),
            probe,
        }
    }

    fn is_monitored(&self, declaring: &str, hierarchy: &TypeHierarchy) -> bool {
        match &self.target {
            Some(target) => target.matches(declaring, hierarchy),
            None => declaring == MONITORED_TYPE,
        }
    }

    fn probe_for(&self, operation: Operation, declaring: &str) -> Option<Probe> {
        let dump_stack = match operation {
            Operation::Start => true,
            Operation::Join if self.config.has(Flags::TRACE_JOIN) => false,
            Operation::Join => return None,
        };

        Some(Probe {
            operation,
            declaring_type: declaring.to_string(),
            trace_caller: self.config.has(Flags::TRACE_CALLER),
            dump_stack,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classfile::{ClassBuilder, CodeAttribute},
        hierarchy::{MemorySource, TypeInfo},
    };

    fn thread_source() -> MemorySource {
        let mut thread = ClassBuilder::new(MONITORED_TYPE, "java/lang/Object");
        thread
            .abstract_method(0x0001, "start", "()V")
            .abstract_method(0x0011, "join", "()V")
            .abstract_method(0x0011, "join", "(J)V")
            .abstract_method(0x0001, "run", "()V");
        let mut source = MemorySource::new();
        source.insert(MONITORED_TYPE, thread.build().unwrap());
        source
    }

    fn target(source: &MemorySource) -> Option<Arc<TargetType>> {
        Some(Arc::new(TargetType::resolve(source).unwrap()))
    }

    /// A class whose `go(Thread)` calls `start`, `join`, `join(J)` and `run` on its argument.
    fn caller() -> Vec<u8> {
        let mut builder = ClassBuilder::new("com/example/Runner", "java/lang/Object");
        let mut code = Vec::new();
        for (name, descriptor) in [("start", "()V"), ("join", "()V"), ("run", "()V")] {
            let [hi, lo] = builder
                .methodref(MONITORED_TYPE, name, descriptor)
                .unwrap()
                .to_be_bytes();
            code.extend([0x2A, 0xB6, hi, lo]);
        }
        let [hi, lo] = builder
            .methodref(MONITORED_TYPE, "join", "(J)V")
            .unwrap()
            .to_be_bytes();
        code.extend([0x2A, 0x0A, 0xB6, hi, lo, 0xB1]);

        builder.method(
            0x0009,
            "go",
            "(Ljava/lang/Thread;)V",
            CodeAttribute {
                max_stack: 3,
                max_locals: 1,
                code,
                exception_table: Vec::new(),
                attributes: Vec::new(),
            },
        );
        builder.build().unwrap()
    }

    fn ty(bytes: &[u8]) -> TypeUnderTransformation<'_> {
        TypeUnderTransformation {
            name: Some("com/example/Runner"),
            display_name: Some("com.example.Runner"),
            bytes,
        }
    }

    fn sites(outcome: &Outcome) -> usize {
        match outcome {
            Outcome::Rewritten { sites, .. } => *sites,
            _ => 0,
        }
    }

    #[test]
    fn start_only_by_default() {
        let source = thread_source();
        let (logger, _) = Logger::memory();
        let transformer = Transformer::new(Config::default(), target(&source), logger);

        let bytes = caller();
        let outcome = transformer.transform(&ty(&bytes), &source);
        assert_eq!(sites(&outcome), 1);
        assert_ne!(outcome.bytes_or(&bytes), &bytes[..]);
    }

    #[test]
    fn join_with_flag() {
        let source = thread_source();
        let (logger, _) = Logger::memory();
        let config = Config::new(Vec::new(), Flags::TRACE_JOIN);
        let transformer = Transformer::new(config, target(&source), logger);

        let bytes = caller();
        assert_eq!(sites(&transformer.transform(&ty(&bytes), &source)), 3);
    }

    #[test]
    fn unnamed_and_excluded() {
        let source = thread_source();
        let (logger, sink) = Logger::memory();
        let config = Config::new(vec!["com/example".to_string()], Flags::empty());
        let transformer = Transformer::new(config, target(&source), logger);

        let bytes = caller();
        let unnamed = TypeUnderTransformation {
            name: None,
            display_name: None,
            bytes: &bytes,
        };
        assert!(matches!(
            transformer.transform(&unnamed, &source),
            Outcome::Unnamed
        ));
        assert!(matches!(
            transformer.transform(&ty(&bytes), &source),
            Outcome::Excluded
        ));
        assert_eq!(
            sink.lines(),
            vec![
                "[threadscope] ClassName was null; Class=null",
                "[threadscope] Excluded class=com/example/Runner",
            ]
        );
    }

    #[test]
    fn garbage_is_unparseable() {
        let source = thread_source();
        let (logger, sink) = Logger::memory();
        let transformer = Transformer::new(Config::default(), target(&source), logger);

        let bytes = [0xCA, 0xFE, 0xBA, 0xBE, 0x00];
        let outcome = transformer.transform(&ty(&bytes), &source);
        assert!(matches!(outcome, Outcome::Unparseable));
        assert_eq!(outcome.bytes_or(&bytes), &bytes[..]);
        assert!(sink.lines().is_empty());
    }

    #[test]
    fn exact_name_match_without_target() {
        let source = thread_source();
        let (logger, _) = Logger::memory();
        let transformer = Transformer::new(Config::default(), None, logger);

        let bytes = caller();
        assert_eq!(sites(&transformer.transform(&ty(&bytes), &source)), 1);
    }

    #[test]
    fn unresolved_sites_are_reported_on_request() {
        let source = MemorySource::new();
        let (logger, sink) = Logger::memory();
        let config = Config::new(Vec::new(), Flags::REPORT_UNRESOLVED);
        let target = TargetType::from_info(TypeInfo {
            name: "java/lang/Thread".to_string(),
            super_name: None,
            interfaces: Vec::new(),
            is_interface: false,
            methods: Vec::new(),
        });
        let transformer = Transformer::new(config, Some(Arc::new(target)), logger);

        let bytes = caller();
        let outcome = transformer.transform(&ty(&bytes), &source);
        assert!(matches!(outcome, Outcome::Untouched));

        let lines = sink.lines();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with(
            "[threadscope] Could not find method 'java/lang/Thread.start()V' called from com.example.Runner.go(Ljava/lang/Thread;)V: "
        ));
    }

    #[test]
    fn inspect_does_not_edit() {
        let source = thread_source();
        let (logger, _) = Logger::memory();
        let transformer = Transformer::new(Config::default(), target(&source), logger);

        let class = ClassFileEditor.parse(&caller()).unwrap();
        let decisions = transformer.inspect(&class, &source).unwrap();
        assert_eq!(decisions.len(), 4);
        assert!(decisions[0].probe.as_ref().is_some_and(|p| p.dump_stack));
        assert!(decisions[1].probe.is_none());
        // not a monitored operation, not resolved without REPORT_UNRESOLVED
        assert!(decisions[2].resolution.is_none());
        assert!(!class.is_edited());
    }
}
