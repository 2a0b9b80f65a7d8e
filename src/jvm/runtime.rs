//! [`Runtime`] over JVMTI.

use std::sync::Arc;

use crate::{
    instrument::{LoadedType, RetransformStatus, Runtime, Transformer},
    jvm::{
        agent,
        env::{JniEnv, Jvmti, LocalRef},
        sys,
    },
    Error, Result,
};

/// The running JVM, seen from the thread executing the attach sequence.
pub struct JvmRuntime<'a> {
    jvmti: Jvmti,
    env: &'a JniEnv<'a>,
}

impl<'a> JvmRuntime<'a> {
    /// Create a runtime for the current thread.
    pub fn new(jvmti: Jvmti, env: &'a JniEnv<'a>) -> Self {
        JvmRuntime { jvmti, env }
    }
}

impl<'a> Runtime for JvmRuntime<'a> {
    type Class = LocalRef<'a>;

    fn install_hook(&self, transformer: Arc<Transformer>) -> Result<()> {
        agent::set_transformer(transformer)?;
        self.jvmti.enable_event(sys::JVMTI_EVENT_CLASS_FILE_LOAD_HOOK)
    }

    fn loaded_types(&self) -> Result<Vec<LoadedType<LocalRef<'a>>>> {
        let classes = self.jvmti.loaded_classes()?;
        let mut loaded = Vec::with_capacity(classes.len());

        for raw in classes {
            // SAFETY: GetLoadedClasses hands out fresh local references of this thread.
            let class = unsafe { self.env.adopt(raw) };
            match self.jvmti.class_signature(class.get()) {
                Ok(signature) => loaded.push(LoadedType {
                    name: internal_name(&signature).to_string(),
                    class,
                }),
                Err(error) => log::debug!("Skipping a loaded class: {}", error),
            }
        }

        Ok(loaded)
    }

    fn retransform(&self, class: &LocalRef<'a>) -> Result<RetransformStatus> {
        match self.jvmti.retransform_class(class.get()) {
            Ok(()) => Ok(RetransformStatus::Retransformed),
            Err(Error::Jvmti {
                code: sys::JVMTI_ERROR_UNMODIFIABLE_CLASS,
                ..
            }) => Ok(RetransformStatus::Unmodifiable),
            Err(Error::Jvmti { operation, code }) => {
                log::debug!(
                    "{} failed with {}",
                    operation,
                    self.jvmti.error_name(code).unwrap_or_default()
                );
                Err(Error::Jvmti { operation, code })
            }
            Err(error) => Err(error),
        }
    }
}

/// Internal name for a JVM type signature; array signatures are kept as they are.
pub(crate) fn internal_name(signature: &str) -> &str {
    signature
        .strip_prefix('L')
        .and_then(|name| name.strip_suffix(';'))
        .unwrap_or(signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signatures() {
        assert_eq!(internal_name("Ljava/lang/Thread;"), "java/lang/Thread");
        assert_eq!(internal_name("[Ljava/lang/Thread;"), "[Ljava/lang/Thread;");
        assert_eq!(internal_name("[I"), "[I");
    }
}
