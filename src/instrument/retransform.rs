//! The load-time hook and the retroactive pass.
//!
//! The host runtime is reached through the [`Runtime`] trait: it installs the transformer as
//! the hook for every class definition, lists the classes already loaded and asks for one of
//! them to be presented to the hook again. `crate::jvm::JvmRuntime` implements it over JVMTI;
//! tests use scripted runtimes.

use std::sync::Arc;

use crate::{
    classfile::descriptor::to_dotted,
    instrument::{Logger, Transformer},
    Result,
};

/// Internal name prefix of the instrument's own classes, never retransformed.
pub const SELF_NAMESPACE: &str = "threadscope/";

/// Result of asking the runtime to retransform one class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetransformStatus {
    /// The class went through the hook again
    Retransformed,
    /// The runtime does not allow the class to be modified
    Unmodifiable,
}

/// A class already loaded when the instrument attached.
#[derive(Debug, Clone)]
pub struct LoadedType<C> {
    /// Internal name
    pub name: String,
    /// Runtime handle
    pub class: C,
}

/// Outcome counts of the retroactive pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetransformTally {
    /// Classes the runtime presented to the hook again
    pub succeeded: u64,
    /// Classes the runtime refused to modify
    pub refused: u64,
}

impl RetransformTally {
    /// Number of classes the pass asked the runtime about.
    #[must_use]
    pub fn total(&self) -> u64 {
        self.succeeded + self.refused
    }
}

/// The host runtime's class loading and redefinition machinery.
pub trait Runtime {
    /// Handle to a loaded class
    type Class;

    /// Run `transformer` for every class defined or redefined from now on.
    ///
    /// # Errors
    /// Returns an error if the hook cannot be installed.
    fn install_hook(&self, transformer: Arc<Transformer>) -> Result<()>;

    /// Every class currently loaded.
    ///
    /// # Errors
    /// Returns an error if the runtime cannot enumerate its classes.
    fn loaded_types(&self) -> Result<Vec<LoadedType<Self::Class>>>;

    /// Present `class` to the installed hook again.
    ///
    /// # Errors
    /// Returns an error for failures other than the class being unmodifiable.
    fn retransform(&self, class: &Self::Class) -> Result<RetransformStatus>;
}

/// Ask `runtime` to retransform every loaded class outside [`SELF_NAMESPACE`].
///
/// Unmodifiable classes and classes whose retransformation fails for any other reason count
/// as refused; nothing is retried.
///
/// # Errors
/// Returns an error only if the loaded classes cannot be enumerated.
pub fn retransform_all<R: Runtime + ?Sized>(runtime: &R, logger: &Logger) -> Result<RetransformTally> {
    logger.line("Trying to retransform loaded classes");

    let mut tally = RetransformTally::default();
    for loaded in runtime.loaded_types()? {
        if loaded.name.starts_with(SELF_NAMESPACE) {
            diag!(logger, "Ignoring {}", to_dotted(&loaded.name));
            continue;
        }

        match runtime.retransform(&loaded.class) {
            Ok(RetransformStatus::Retransformed) => tally.succeeded += 1,
            Ok(RetransformStatus::Unmodifiable) => tally.refused += 1,
            Err(error) => {
                log::warn!("Retransforming {} failed: {}", loaded.name, error);
                tally.refused += 1;
            }
        }
    }

    diag!(
        logger,
        "Retransform loaded classes; {}x successful, {}x failed",
        tally.succeeded,
        tally.refused
    );
    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::sync::Mutex;

    struct Scripted {
        classes: Vec<(&'static str, Option<RetransformStatus>)>,
        asked: Mutex<Vec<usize>>,
    }

    impl Runtime for Scripted {
        type Class = usize;

        fn install_hook(&self, _transformer: Arc<Transformer>) -> Result<()> {
            Ok(())
        }

        fn loaded_types(&self) -> Result<Vec<LoadedType<usize>>> {
            Ok(self
                .classes
                .iter()
                .enumerate()
                .map(|(class, (name, _))| LoadedType {
                    name: name.to_string(),
                    class,
                })
                .collect())
        }

        fn retransform(&self, class: &usize) -> Result<RetransformStatus> {
            lock!(self.asked).push(*class);
            self.classes[*class]
                .1
                .ok_or_else(|| Error::Jvmti {
                    operation: "RetransformClasses",
                    code: 62,
                })
        }
    }

    #[test]
    fn tally_and_self_exclusion() {
        let runtime = Scripted {
            classes: vec![
                ("java/lang/String", Some(RetransformStatus::Retransformed)),
                ("[I", Some(RetransformStatus::Unmodifiable)),
                ("threadscope/Probe", Some(RetransformStatus::Retransformed)),
                ("com/example/Odd", None),
                ("com/example/Runner", Some(RetransformStatus::Retransformed)),
            ],
            asked: Mutex::new(Vec::new()),
        };
        let (logger, sink) = Logger::memory();

        let tally = retransform_all(&runtime, &logger).unwrap();
        assert_eq!(tally, RetransformTally { succeeded: 2, refused: 2 });
        assert_eq!(tally.total(), 4);
        assert_eq!(*lock!(runtime.asked), vec![0, 1, 3, 4]);
        assert_eq!(
            sink.lines(),
            vec![
                "[threadscope] Trying to retransform loaded classes",
                "[threadscope] Ignoring threadscope.Probe",
                "[threadscope] Retransform loaded classes; 2x successful, 2x failed",
            ]
        );
    }
}
