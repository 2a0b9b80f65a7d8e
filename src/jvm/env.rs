//! Safe wrappers over the JVMTI and JNI environments.

use std::{
    ffi::{c_char, c_void, CStr, CString},
    marker::PhantomData,
    ptr, slice,
};

use crate::{
    jvm::sys::{self, jint, jvalue, Capabilities},
    Error, Result,
};

/// A JVMTI environment.
///
/// Unlike a JNI environment, a JVMTI environment may be used from any thread.
#[derive(Debug, Clone, Copy)]
pub struct Jvmti {
    raw: *mut sys::jvmtiEnv,
}

// SAFETY: JVMTI environments are not bound to the thread that created them.
unsafe impl Send for Jvmti {}
unsafe impl Sync for Jvmti {}

impl Jvmti {
    /// Obtain the JVMTI environment of `vm`.
    ///
    /// # Safety
    /// `vm` must be the live `JavaVM` handed to the agent.
    ///
    /// # Errors
    /// Returns [`Error::Jvmti`] if the VM does not provide JVMTI 1.2.
    pub unsafe fn from_vm(vm: *mut sys::JavaVM) -> Result<Self> {
        let mut raw: *mut c_void = ptr::null_mut();
        let code = ((**vm).GetEnv)(vm, &mut raw, sys::JVMTI_VERSION_1_2);
        if code != sys::JNI_OK || raw.is_null() {
            return Err(Error::Jvmti {
                operation: "GetEnv",
                code: code.unsigned_abs(),
            });
        }

        Ok(Jvmti { raw: raw.cast() })
    }

    /// Wrap a JVMTI environment handed to a callback.
    ///
    /// # Safety
    /// `raw` must be a live JVMTI environment.
    pub unsafe fn from_raw(raw: *mut sys::jvmtiEnv) -> Self {
        Jvmti { raw }
    }

    fn functions(&self) -> &sys::jvmtiInterface_1 {
        // SAFETY: `raw` is a live environment for the lifetime of the VM.
        unsafe { &**self.raw }
    }

    fn check(&self, operation: &'static str, code: sys::jvmtiError) -> Result<()> {
        if code == sys::JVMTI_ERROR_NONE {
            Ok(())
        } else {
            Err(Error::Jvmti { operation, code })
        }
    }

    /// Request `capabilities`.
    ///
    /// # Errors
    /// Returns [`Error::Jvmti`] if the VM cannot grant them.
    pub fn add_capabilities(&self, capabilities: Capabilities) -> Result<()> {
        let capabilities = sys::jvmtiCapabilities::from(capabilities);
        // SAFETY: the capability block outlives the call.
        let code = unsafe { (self.functions().AddCapabilities)(self.raw, &capabilities) };
        self.check("AddCapabilities", code)
    }

    /// Register the event callbacks.
    ///
    /// # Errors
    /// Returns [`Error::Jvmti`] if the VM rejects them.
    pub fn set_event_callbacks(&self, callbacks: &sys::jvmtiEventCallbacks) -> Result<()> {
        let size = std::mem::size_of::<sys::jvmtiEventCallbacks>() as jint;
        // SAFETY: the VM copies the callback block before returning.
        let code = unsafe { (self.functions().SetEventCallbacks)(self.raw, callbacks, size) };
        self.check("SetEventCallbacks", code)
    }

    /// Enable `event` on all threads.
    ///
    /// # Errors
    /// Returns [`Error::Jvmti`] if the event cannot be enabled.
    pub fn enable_event(&self, event: jint) -> Result<()> {
        // SAFETY: a null thread selects all threads.
        let code = unsafe {
            (self.functions().SetEventNotificationMode)(
                self.raw,
                sys::JVMTI_ENABLE,
                event,
                ptr::null_mut(),
            )
        };
        self.check("SetEventNotificationMode", code)
    }

    /// Every loaded class, as local references of the calling thread.
    ///
    /// # Errors
    /// Returns [`Error::Jvmti`] if the classes cannot be enumerated.
    pub fn loaded_classes(&self) -> Result<Vec<sys::jclass>> {
        let mut count: jint = 0;
        let mut classes: *mut sys::jclass = ptr::null_mut();
        // SAFETY: both out pointers are valid; the array is released below.
        let code = unsafe { (self.functions().GetLoadedClasses)(self.raw, &mut count, &mut classes) };
        self.check("GetLoadedClasses", code)?;

        if classes.is_null() {
            return Ok(Vec::new());
        }

        // SAFETY: the VM returned `count` class references at `classes`.
        let loaded = unsafe { slice::from_raw_parts(classes, count.max(0) as usize) }.to_vec();
        self.deallocate(classes.cast());
        Ok(loaded)
    }

    /// The JVM type signature of `class`, e.g. `Ljava/lang/Thread;`.
    ///
    /// # Errors
    /// Returns [`Error::Jvmti`] if the signature cannot be read.
    pub fn class_signature(&self, class: sys::jclass) -> Result<String> {
        let mut signature: *mut c_char = ptr::null_mut();
        // SAFETY: the generic signature is not requested; the signature is released below.
        let code = unsafe {
            (self.functions().GetClassSignature)(self.raw, class, &mut signature, ptr::null_mut())
        };
        self.check("GetClassSignature", code)?;

        if signature.is_null() {
            return Err(Error::Jvmti {
                operation: "GetClassSignature",
                code,
            });
        }

        // SAFETY: the VM returned a NUL terminated string.
        let value = unsafe { CStr::from_ptr(signature) }.to_string_lossy().into_owned();
        self.deallocate(signature.cast());
        Ok(value)
    }

    /// Retransform one class.
    ///
    /// # Errors
    /// Returns [`Error::Jvmti`] with the VM's error code if the class was not retransformed.
    pub fn retransform_class(&self, class: sys::jclass) -> Result<()> {
        // SAFETY: one valid class reference is passed.
        let code = unsafe { (self.functions().RetransformClasses)(self.raw, 1, &class) };
        self.check("RetransformClasses", code)
    }

    /// Copy `bytes` into memory allocated by the VM, as class file load hooks must return.
    ///
    /// # Errors
    /// Returns [`Error::Jvmti`] if the allocation fails.
    pub fn allocate_copy(&self, bytes: &[u8]) -> Result<*mut u8> {
        let mut memory: *mut u8 = ptr::null_mut();
        // SAFETY: the VM allocates at least `bytes.len()` bytes or fails.
        let code = unsafe { (self.functions().Allocate)(self.raw, bytes.len() as i64, &mut memory) };
        self.check("Allocate", code)?;

        // SAFETY: `memory` is a fresh allocation of `bytes.len()` bytes.
        unsafe { ptr::copy_nonoverlapping(bytes.as_ptr(), memory, bytes.len()) };
        Ok(memory)
    }

    /// The VM's name for a JVMTI error code.
    #[must_use]
    pub fn error_name(&self, code: sys::jvmtiError) -> Option<String> {
        let mut name: *mut c_char = ptr::null_mut();
        // SAFETY: the name is released below.
        let result = unsafe { (self.functions().GetErrorName)(self.raw, code, &mut name) };
        if result != sys::JVMTI_ERROR_NONE || name.is_null() {
            return None;
        }

        // SAFETY: the VM returned a NUL terminated string.
        let value = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
        self.deallocate(name.cast());
        Some(value)
    }

    fn deallocate(&self, memory: *mut u8) {
        // SAFETY: `memory` was allocated by this environment.
        let code = unsafe { (self.functions().Deallocate)(self.raw, memory) };
        if code != sys::JVMTI_ERROR_NONE {
            log::warn!("JVMTI Deallocate failed with error {}", code);
        }
    }
}

/// The JNI environment of the current thread.
pub struct JniEnv<'a> {
    raw: *mut sys::JNIEnv,
    _thread: PhantomData<&'a ()>,
}

impl<'a> JniEnv<'a> {
    /// Wrap the JNI environment handed to a callback.
    ///
    /// # Safety
    /// `raw` must be the live JNI environment of the calling thread, valid for `'a`.
    pub unsafe fn from_raw(raw: *mut sys::JNIEnv) -> Self {
        JniEnv {
            raw,
            _thread: PhantomData,
        }
    }

    fn functions(&self) -> &sys::JNINativeInterface {
        // SAFETY: `raw` is the live environment of this thread.
        unsafe { &**self.raw }
    }

    /// Fail with the pending Java exception, if any, after clearing it.
    fn check_exception(&self, what: &str) -> Result<()> {
        // SAFETY: exception queries are valid with or without a pending exception.
        unsafe {
            if (self.functions().ExceptionCheck)(self.raw) == sys::JNI_FALSE {
                return Ok(());
            }
            if log::log_enabled!(log::Level::Debug) {
                (self.functions().ExceptionDescribe)(self.raw);
            }
            (self.functions().ExceptionClear)(self.raw);
        }
        Err(Error::Jni(format!("{what} raised an exception")))
    }

    /// Take ownership of a local reference obtained outside this wrapper.
    ///
    /// # Safety
    /// `raw` must be a live, non-null local reference of this thread not owned elsewhere.
    pub unsafe fn adopt(&self, raw: sys::jobject) -> LocalRef<'_> {
        LocalRef { env: self, raw }
    }

    fn local(&self, raw: sys::jobject, what: &str) -> Result<Option<LocalRef<'_>>> {
        self.check_exception(what)?;
        Ok((!raw.is_null()).then(|| LocalRef { env: self, raw }))
    }

    /// Look up a class by internal name.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the class cannot be found.
    pub fn find_class(&self, name: &str) -> Result<LocalRef<'_>> {
        let name_c = c_string(name)?;
        // SAFETY: `name_c` is NUL terminated.
        let class = unsafe { (self.functions().FindClass)(self.raw, name_c.as_ptr()) };
        self.local(class, name)?
            .ok_or_else(|| Error::Jni(format!("class {name} not found")))
    }

    /// Look up an instance method.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the method does not exist.
    pub fn method_id(&self, class: &LocalRef, name: &str, descriptor: &str) -> Result<MethodId> {
        let (name_c, descriptor_c) = (c_string(name)?, c_string(descriptor)?);
        // SAFETY: both strings are NUL terminated and `class` is a live reference.
        let id = unsafe {
            (self.functions().GetMethodID)(self.raw, class.raw, name_c.as_ptr(), descriptor_c.as_ptr())
        };
        self.method(id, name)
    }

    /// Look up a static method.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the method does not exist.
    pub fn static_method_id(
        &self,
        class: &LocalRef,
        name: &str,
        descriptor: &str,
    ) -> Result<MethodId> {
        let (name_c, descriptor_c) = (c_string(name)?, c_string(descriptor)?);
        // SAFETY: both strings are NUL terminated and `class` is a live reference.
        let id = unsafe {
            (self.functions().GetStaticMethodID)(
                self.raw,
                class.raw,
                name_c.as_ptr(),
                descriptor_c.as_ptr(),
            )
        };
        self.method(id, name)
    }

    fn method(&self, id: sys::jmethodID, name: &str) -> Result<MethodId> {
        self.check_exception(name)?;
        if id.is_null() {
            return Err(Error::Jni(format!("method {name} not found")));
        }
        Ok(MethodId(id))
    }

    /// Call an instance method returning an object; a `null` result is `None`.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the call throws.
    pub fn call_object(
        &self,
        receiver: sys::jobject,
        method: MethodId,
        args: &[jvalue],
    ) -> Result<Option<LocalRef<'_>>> {
        // SAFETY: `method` belongs to the receiver's class and `args` matches its descriptor.
        let result =
            unsafe { (self.functions().CallObjectMethodA)(self.raw, receiver, method.0, args.as_ptr()) };
        self.local(result, "CallObjectMethodA")
    }

    /// Call a static method returning an object; a `null` result is `None`.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the call throws.
    pub fn call_static_object(
        &self,
        class: sys::jclass,
        method: MethodId,
        args: &[jvalue],
    ) -> Result<Option<LocalRef<'_>>> {
        // SAFETY: `method` is a static method of `class` and `args` matches its descriptor.
        let result = unsafe {
            (self.functions().CallStaticObjectMethodA)(self.raw, class, method.0, args.as_ptr())
        };
        self.local(result, "CallStaticObjectMethodA")
    }

    /// Call an instance method returning `void`.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the call throws.
    pub fn call_void(&self, receiver: sys::jobject, method: MethodId, args: &[jvalue]) -> Result<()> {
        // SAFETY: `method` belongs to the receiver's class and `args` matches its descriptor.
        unsafe { (self.functions().CallVoidMethodA)(self.raw, receiver, method.0, args.as_ptr()) };
        self.check_exception("CallVoidMethodA")
    }

    /// Create a Java string.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the string contains NUL or the VM is out of memory.
    pub fn new_string(&self, value: &str) -> Result<LocalRef<'_>> {
        let value_c = c_string(value)?;
        // SAFETY: `value_c` is NUL terminated.
        let string = unsafe { (self.functions().NewStringUTF)(self.raw, value_c.as_ptr()) };
        self.local(string, "NewStringUTF")?
            .ok_or_else(|| Error::Jni("NewStringUTF returned null".to_string()))
    }

    /// Copy the contents of a `byte[]`.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the array cannot be read.
    pub fn byte_array(&self, array: &LocalRef) -> Result<Vec<u8>> {
        // SAFETY: `array` is a live `byte[]` reference.
        let length = unsafe { (self.functions().GetArrayLength)(self.raw, array.raw) };
        self.check_exception("GetArrayLength")?;

        let mut bytes = vec![0u8; length.max(0) as usize];
        // SAFETY: `bytes` holds exactly `length` elements.
        unsafe {
            (self.functions().GetByteArrayRegion)(
                self.raw,
                array.raw,
                0,
                length,
                bytes.as_mut_ptr().cast(),
            );
        }
        self.check_exception("GetByteArrayRegion")?;
        Ok(bytes)
    }

    /// Make `object` a global reference that outlives the current native frame.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the VM is out of memory.
    pub fn new_global(&self, object: &LocalRef) -> Result<GlobalRef> {
        // SAFETY: `object` is a live reference.
        let raw = unsafe { (self.functions().NewGlobalRef)(self.raw, object.raw) };
        if raw.is_null() {
            return Err(Error::Jni("NewGlobalRef returned null".to_string()));
        }
        Ok(GlobalRef { raw })
    }

    /// Run `body` inside a local reference frame of `capacity` references.
    ///
    /// # Errors
    /// Returns [`Error::Jni`] if the frame cannot be created, otherwise `body`'s result.
    pub fn with_local_frame<T>(&self, capacity: jint, body: impl FnOnce() -> Result<T>) -> Result<T> {
        // SAFETY: the frame is popped below on every path.
        if unsafe { (self.functions().PushLocalFrame)(self.raw, capacity) } != sys::JNI_OK {
            self.check_exception("PushLocalFrame")?;
            return Err(Error::Jni("PushLocalFrame failed".to_string()));
        }

        let result = body();
        // SAFETY: pops the frame pushed above; no result reference is carried out.
        unsafe { (self.functions().PopLocalFrame)(self.raw, ptr::null_mut()) };
        result
    }

    /// Abort the VM with `message`.
    pub fn fatal_error(&self, message: &str) -> ! {
        let message_c = CString::new(message.replace('\0', " "))
            .unwrap_or_else(|_| CString::from(c"threadscope: fatal error"));
        // SAFETY: `message_c` is NUL terminated; the call does not return.
        unsafe { (self.functions().FatalError)(self.raw, message_c.as_ptr()) }
    }
}

fn c_string(value: &str) -> Result<CString> {
    CString::new(value).map_err(|_| Error::Jni(format!("{value:?} contains NUL")))
}

/// A resolved `jmethodID`.
#[derive(Debug, Clone, Copy)]
pub struct MethodId(sys::jmethodID);

// SAFETY: method IDs stay valid on every thread until their class is unloaded.
unsafe impl Send for MethodId {}
unsafe impl Sync for MethodId {}

/// A local reference, deleted when dropped.
pub struct LocalRef<'a> {
    env: &'a JniEnv<'a>,
    raw: sys::jobject,
}

impl LocalRef<'_> {
    /// The raw reference.
    #[must_use]
    pub fn get(&self) -> sys::jobject {
        self.raw
    }
}

impl Drop for LocalRef<'_> {
    fn drop(&mut self) {
        // SAFETY: `raw` is a live local reference of `env`'s thread.
        unsafe { (self.env.functions().DeleteLocalRef)(self.env.raw, self.raw) };
    }
}

/// A global reference, valid on every thread.
///
/// Global references held in statics are never deleted.
#[derive(Debug)]
pub struct GlobalRef {
    raw: sys::jobject,
}

// SAFETY: global references may be used from any attached thread.
unsafe impl Send for GlobalRef {}
unsafe impl Sync for GlobalRef {}

impl GlobalRef {
    /// The raw reference.
    #[must_use]
    pub fn get(&self) -> sys::jobject {
        self.raw
    }
}
