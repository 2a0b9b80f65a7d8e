//! The native agent entry points.
//!
//! `Agent_OnLoad` runs before any application class is loaded. It requests the capabilities,
//! registers the callbacks and enables `VMInit`; the attach sequence itself runs in `VMInit`,
//! once JNI is usable. From then on every class definition passes through
//! `on_class_file_load`.

use std::{
    ffi::{c_char, c_uchar, c_void, CStr},
    panic::{self, AssertUnwindSafe},
    ptr, slice,
    sync::{Arc, OnceLock},
};

use crate::{
    classfile::descriptor::to_dotted,
    instrument::{self, attach, Logger, Outcome, Transformer, TypeUnderTransformation},
    jvm::{
        env::{JniEnv, Jvmti},
        runtime::{internal_name, JvmRuntime},
        source::{LoaderSource, ResourceMethods},
        sys::{self, jint, Capabilities},
    },
    Error, Result,
};

struct AgentState {
    jvmti: Jvmti,
    options: Option<String>,
}

static AGENT: OnceLock<AgentState> = OnceLock::new();
static TRANSFORMER: OnceLock<Arc<Transformer>> = OnceLock::new();
static RESOURCES: OnceLock<ResourceMethods> = OnceLock::new();

/// Make `transformer` the one the class file load hook runs.
pub(crate) fn set_transformer(transformer: Arc<Transformer>) -> Result<()> {
    TRANSFORMER
        .set(transformer)
        .map_err(|_| Error::Error("The class file load hook is already installed".to_string()))
}

/// Called by the VM when the library is loaded with `-agentpath`.
///
/// # Safety
/// Must only be called by the VM, with a live `JavaVM` and an optional NUL terminated option
/// string.
#[no_mangle]
#[allow(non_snake_case)]
pub unsafe extern "system" fn Agent_OnLoad(
    vm: *mut sys::JavaVM,
    options: *mut c_char,
    _reserved: *mut c_void,
) -> jint {
    let options = (!options.is_null())
        .then(|| CStr::from_ptr(options).to_string_lossy().into_owned());

    match on_load(vm, options) {
        Ok(()) => sys::JNI_OK,
        Err(error) => {
            diag!(instrument::global(), "Could not load: {}", error);
            sys::JNI_ERR
        }
    }
}

unsafe fn on_load(vm: *mut sys::JavaVM, options: Option<String>) -> Result<()> {
    instrument::install(Logger::stdout())?;

    let jvmti = Jvmti::from_vm(vm)?;
    jvmti.add_capabilities(Capabilities::ALL_CLASS_HOOK_EVENTS | Capabilities::RETRANSFORM_CLASSES)?;
    jvmti.set_event_callbacks(&sys::jvmtiEventCallbacks {
        VMInit: Some(on_vm_init),
        ClassFileLoadHook: Some(on_class_file_load),
        ..Default::default()
    })?;

    AGENT
        .set(AgentState { jvmti, options })
        .map_err(|_| Error::Error("The agent is already loaded".to_string()))?;
    jvmti.enable_event(sys::JVMTI_EVENT_VM_INIT)
}

unsafe extern "system" fn on_vm_init(
    _jvmti: *mut sys::jvmtiEnv,
    jni: *mut sys::JNIEnv,
    _thread: sys::jthread,
) {
    let Some(agent) = AGENT.get() else {
        return;
    };
    let env = JniEnv::from_raw(jni);

    match panic::catch_unwind(AssertUnwindSafe(|| start(agent, &env))) {
        Ok(Ok(())) => {}
        Ok(Err(error @ Error::Configuration(_))) => {
            env.fatal_error(&format!("threadscope: {error}"))
        }
        Ok(Err(error)) => diag!(instrument::global(), "Could not attach: {}", error),
        Err(_) => env.fatal_error("threadscope: attach panicked"),
    }
}

fn start(agent: &AgentState, env: &JniEnv) -> Result<()> {
    let methods = ResourceMethods::resolve(env)
        .map_err(|error| Error::Configuration(format!("class lookups unavailable: {error}")))?;
    let methods = RESOURCES.get_or_init(|| methods);

    let source = LoaderSource::new(env, ptr::null_mut(), methods);
    let runtime = JvmRuntime::new(agent.jvmti, env);
    let report = attach(
        &runtime,
        &source,
        agent.options.as_deref(),
        &|key| std::env::var_os(key).is_some(),
        instrument::global().clone(),
    )?;

    log::debug!(
        "Attached with {} exclusions, {} classes retransformed",
        report.config.excluded().len(),
        report.tally.succeeded
    );
    Ok(())
}

#[allow(clippy::too_many_arguments)]
unsafe extern "system" fn on_class_file_load(
    jvmti: *mut sys::jvmtiEnv,
    jni: *mut sys::JNIEnv,
    class_being_redefined: sys::jclass,
    loader: sys::jobject,
    name: *const c_char,
    _protection_domain: sys::jobject,
    class_data_len: jint,
    class_data: *const c_uchar,
    new_class_data_len: *mut jint,
    new_class_data: *mut *mut c_uchar,
) {
    let (Some(transformer), Some(methods)) = (TRANSFORMER.get(), RESOURCES.get()) else {
        return;
    };
    if class_data.is_null() || class_data_len <= 0 {
        return;
    }

    let jvmti = Jvmti::from_raw(jvmti);
    let env = JniEnv::from_raw(jni);
    let name = (!name.is_null()).then(|| CStr::from_ptr(name).to_string_lossy());
    let display_name = match &name {
        Some(name) => Some(to_dotted(name)),
        None if !class_being_redefined.is_null() => jvmti
            .class_signature(class_being_redefined)
            .ok()
            .map(|signature| to_dotted(internal_name(&signature))),
        None => None,
    };

    let bytes = slice::from_raw_parts(class_data, class_data_len as usize);
    let source = LoaderSource::new(&env, loader, methods);
    let ty = TypeUnderTransformation {
        name: name.as_deref(),
        display_name: display_name.as_deref(),
        bytes,
    };

    let outcome = match panic::catch_unwind(AssertUnwindSafe(|| transformer.transform(&ty, &source))) {
        Ok(outcome) => outcome,
        Err(_) => {
            log::error!("Transforming {} panicked", name.as_deref().unwrap_or("?"));
            return;
        }
    };

    if let Outcome::Rewritten { bytes, .. } = outcome {
        match jvmti.allocate_copy(&bytes) {
            Ok(memory) => {
                *new_class_data_len = bytes.len() as jint;
                *new_class_data = memory;
            }
            Err(error) => log::warn!("Keeping the original class: {}", error),
        }
    }
}
