//! Class bytes as a class loader sees them.

use std::cell::Cell;

use crate::{
    hierarchy::{ClassBytes, ClassSource},
    jvm::{
        env::{GlobalRef, JniEnv, MethodId},
        sys::{self, jvalue},
    },
    Result,
};

thread_local! {
    static LOOKUP_ACTIVE: Cell<bool> = const { Cell::new(false) };
}

/// Marks a loader lookup in progress on this thread until dropped, unwinding included.
struct LookupGuard;

impl LookupGuard {
    /// `None` if this thread is already inside a lookup.
    fn enter() -> Option<Self> {
        LOOKUP_ACTIVE.with(|active| (!active.replace(true)).then_some(LookupGuard))
    }
}

impl Drop for LookupGuard {
    fn drop(&mut self) {
        LOOKUP_ACTIVE.with(|active| active.set(false));
    }
}

/// Method IDs used for resource lookups, resolved once at attach.
#[derive(Debug)]
pub struct ResourceMethods {
    class_loader: GlobalRef,
    get_resource_as_stream: MethodId,
    get_system_resource_as_stream: MethodId,
    read_all_bytes: MethodId,
    close: MethodId,
}

impl ResourceMethods {
    /// Resolve the lookup methods of `java.lang.ClassLoader` and `java.io.InputStream`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Jni`] if a method is missing, e.g. `readAllBytes` before Java 9.
    pub fn resolve(env: &JniEnv) -> Result<Self> {
        let class_loader = env.find_class("java/lang/ClassLoader")?;
        let input_stream = env.find_class("java/io/InputStream")?;

        Ok(ResourceMethods {
            get_resource_as_stream: env.method_id(
                &class_loader,
                "getResourceAsStream",
                "(Ljava/lang/String;)Ljava/io/InputStream;",
            )?,
            get_system_resource_as_stream: env.static_method_id(
                &class_loader,
                "getSystemResourceAsStream",
                "(Ljava/lang/String;)Ljava/io/InputStream;",
            )?,
            read_all_bytes: env.method_id(&input_stream, "readAllBytes", "()[B")?,
            close: env.method_id(&input_stream, "close", "()V")?,
            class_loader: env.new_global(&class_loader)?,
        })
    }
}

/// Reads `<name>.class` resources through a class loader.
///
/// A `null` loader stands for the bootstrap loader and is served by the system class loader,
/// which delegates to it. Lookups can load classes and so re-enter the class file load hook on
/// the same thread; such nested hook invocations find nothing rather than look up again.
pub struct LoaderSource<'a> {
    env: &'a JniEnv<'a>,
    loader: sys::jobject,
    methods: &'a ResourceMethods,
}

impl<'a> LoaderSource<'a> {
    /// Create a source over `loader`, which may be `null`.
    pub fn new(env: &'a JniEnv<'a>, loader: sys::jobject, methods: &'a ResourceMethods) -> Self {
        LoaderSource {
            env,
            loader,
            methods,
        }
    }

    fn read(&self, resource: &str) -> Result<Option<Vec<u8>>> {
        let env = self.env;
        env.with_local_frame(8, || {
            let name = env.new_string(resource)?;
            let args = [jvalue { l: name.get() }];
            let stream = if self.loader.is_null() {
                env.call_static_object(
                    self.methods.class_loader.get(),
                    self.methods.get_system_resource_as_stream,
                    &args,
                )?
            } else {
                env.call_object(self.loader, self.methods.get_resource_as_stream, &args)?
            };

            let Some(stream) = stream else {
                return Ok(None);
            };

            let bytes = env
                .call_object(stream.get(), self.methods.read_all_bytes, &[])
                .and_then(|array| match array {
                    Some(array) => env.byte_array(&array).map(Some),
                    None => Ok(None),
                });
            if let Err(error) = env.call_void(stream.get(), self.methods.close, &[]) {
                log::debug!("Closing {} failed: {}", resource, error);
            }
            bytes
        })
    }
}

impl ClassSource for LoaderSource<'_> {
    fn load(&self, internal_name: &str) -> Result<Option<ClassBytes>> {
        let Some(_guard) = LookupGuard::enter() else {
            log::trace!("Skipping nested lookup of {}", internal_name);
            return Ok(None);
        };

        Ok(self
            .read(&format!("{internal_name}.class"))?
            .map(ClassBytes::Owned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nested_lookups_are_refused() {
        let outer = LookupGuard::enter().unwrap();
        assert!(LookupGuard::enter().is_none());
        drop(outer);
        assert!(LookupGuard::enter().is_some());
    }

    #[test]
    fn panicking_lookup_releases_the_thread() {
        let result = std::panic::catch_unwind(|| {
            let _guard = LookupGuard::enter().unwrap();
            panic!("lookup failed");
        });
        assert!(result.is_err());
        assert!(LookupGuard::enter().is_some());
    }
}
