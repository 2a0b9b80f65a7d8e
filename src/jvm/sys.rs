//! Raw JNI and JVMTI declarations.
//!
//! Only the function table slots this crate calls are typed; the rest of each table is
//! declared as opaque padding so the typed slots land at their ABI positions. Slot numbers in
//! the comments are zero based indices into the respective function table.
#![allow(non_camel_case_types, non_snake_case, missing_docs)]

use std::ffi::{c_char, c_uchar, c_void};

use bitflags::bitflags;

pub type jint = i32;
pub type jlong = i64;
pub type jbyte = i8;
pub type jboolean = u8;
pub type jsize = jint;

#[repr(C)]
pub struct _jobject {
    _private: [u8; 0],
}

pub type jobject = *mut _jobject;
pub type jclass = jobject;
pub type jstring = jobject;
pub type jthread = jobject;
pub type jarray = jobject;
pub type jbyteArray = jarray;

#[repr(C)]
pub struct _jmethodID {
    _private: [u8; 0],
}

pub type jmethodID = *mut _jmethodID;

#[repr(C)]
#[derive(Clone, Copy)]
pub union jvalue {
    pub z: jboolean,
    pub b: jbyte,
    pub i: jint,
    pub j: jlong,
    pub l: jobject,
}

pub const JNI_OK: jint = 0;
pub const JNI_ERR: jint = -1;
pub const JNI_FALSE: jboolean = 0;

type Padding<const N: usize> = [*const c_void; N];

/// The JNI function table.
#[repr(C)]
pub struct JNINativeInterface {
    _reserved: Padding<6>,
    /* 6 */ pub FindClass: unsafe extern "system" fn(*mut JNIEnv, *const c_char) -> jclass,
    _pad_7: Padding<9>,
    /* 16 */ pub ExceptionDescribe: unsafe extern "system" fn(*mut JNIEnv),
    /* 17 */ pub ExceptionClear: unsafe extern "system" fn(*mut JNIEnv),
    /* 18 */ pub FatalError: unsafe extern "system" fn(*mut JNIEnv, *const c_char) -> !,
    /* 19 */ pub PushLocalFrame: unsafe extern "system" fn(*mut JNIEnv, jint) -> jint,
    /* 20 */ pub PopLocalFrame: unsafe extern "system" fn(*mut JNIEnv, jobject) -> jobject,
    /* 21 */ pub NewGlobalRef: unsafe extern "system" fn(*mut JNIEnv, jobject) -> jobject,
    /* 22 */ pub DeleteGlobalRef: unsafe extern "system" fn(*mut JNIEnv, jobject),
    /* 23 */ pub DeleteLocalRef: unsafe extern "system" fn(*mut JNIEnv, jobject),
    _pad_24: Padding<9>,
    /* 33 */
    pub GetMethodID:
        unsafe extern "system" fn(*mut JNIEnv, jclass, *const c_char, *const c_char) -> jmethodID,
    _pad_34: Padding<2>,
    /* 36 */
    pub CallObjectMethodA:
        unsafe extern "system" fn(*mut JNIEnv, jobject, jmethodID, *const jvalue) -> jobject,
    _pad_37: Padding<26>,
    /* 63 */
    pub CallVoidMethodA: unsafe extern "system" fn(*mut JNIEnv, jobject, jmethodID, *const jvalue),
    _pad_64: Padding<49>,
    /* 113 */
    pub GetStaticMethodID:
        unsafe extern "system" fn(*mut JNIEnv, jclass, *const c_char, *const c_char) -> jmethodID,
    _pad_114: Padding<2>,
    /* 116 */
    pub CallStaticObjectMethodA:
        unsafe extern "system" fn(*mut JNIEnv, jclass, jmethodID, *const jvalue) -> jobject,
    _pad_117: Padding<50>,
    /* 167 */ pub NewStringUTF: unsafe extern "system" fn(*mut JNIEnv, *const c_char) -> jstring,
    _pad_168: Padding<3>,
    /* 171 */ pub GetArrayLength: unsafe extern "system" fn(*mut JNIEnv, jarray) -> jsize,
    _pad_172: Padding<28>,
    /* 200 */
    pub GetByteArrayRegion:
        unsafe extern "system" fn(*mut JNIEnv, jbyteArray, jsize, jsize, *mut jbyte),
    _pad_201: Padding<27>,
    /* 228 */ pub ExceptionCheck: unsafe extern "system" fn(*mut JNIEnv) -> jboolean,
}

pub type JNIEnv = *const JNINativeInterface;

/// The invocation interface.
#[repr(C)]
pub struct JNIInvokeInterface {
    _reserved: Padding<6>,
    /* 6 */ pub GetEnv: unsafe extern "system" fn(*mut JavaVM, *mut *mut c_void, jint) -> jint,
}

pub type JavaVM = *const JNIInvokeInterface;

pub type jvmtiError = u32;

pub const JVMTI_VERSION_1_2: jint = 0x3001_0200;
pub const JVMTI_ERROR_NONE: jvmtiError = 0;
pub const JVMTI_ERROR_UNMODIFIABLE_CLASS: jvmtiError = 79;
pub const JVMTI_ENABLE: jint = 1;
pub const JVMTI_EVENT_VM_INIT: jint = 50;
pub const JVMTI_EVENT_CLASS_FILE_LOAD_HOOK: jint = 54;

/// The JVMTI function table.
#[repr(C)]
pub struct jvmtiInterface_1 {
    _reserved: Padding<1>,
    /* 1 */
    pub SetEventNotificationMode:
        unsafe extern "C" fn(*mut jvmtiEnv, jint, jint, jthread, ...) -> jvmtiError,
    _pad_2: Padding<43>,
    /* 45 */ pub Allocate: unsafe extern "system" fn(*mut jvmtiEnv, jlong, *mut *mut c_uchar) -> jvmtiError,
    /* 46 */ pub Deallocate: unsafe extern "system" fn(*mut jvmtiEnv, *mut c_uchar) -> jvmtiError,
    /* 47 */
    pub GetClassSignature: unsafe extern "system" fn(
        *mut jvmtiEnv,
        jclass,
        *mut *mut c_char,
        *mut *mut c_char,
    ) -> jvmtiError,
    _pad_48: Padding<29>,
    /* 77 */
    pub GetLoadedClasses:
        unsafe extern "system" fn(*mut jvmtiEnv, *mut jint, *mut *mut jclass) -> jvmtiError,
    _pad_78: Padding<43>,
    /* 121 */
    pub SetEventCallbacks:
        unsafe extern "system" fn(*mut jvmtiEnv, *const jvmtiEventCallbacks, jint) -> jvmtiError,
    _pad_122: Padding<5>,
    /* 127 */
    pub GetErrorName:
        unsafe extern "system" fn(*mut jvmtiEnv, jvmtiError, *mut *mut c_char) -> jvmtiError,
    _pad_128: Padding<13>,
    /* 141 */
    pub AddCapabilities:
        unsafe extern "system" fn(*mut jvmtiEnv, *const jvmtiCapabilities) -> jvmtiError,
    _pad_142: Padding<9>,
    /* 151 */
    pub RetransformClasses:
        unsafe extern "system" fn(*mut jvmtiEnv, jint, *const jclass) -> jvmtiError,
}

pub type jvmtiEnv = *const jvmtiInterface_1;

pub type VMInitCallback = unsafe extern "system" fn(*mut jvmtiEnv, *mut JNIEnv, jthread);

pub type ClassFileLoadHookCallback = unsafe extern "system" fn(
    *mut jvmtiEnv,
    *mut JNIEnv,
    jclass,
    jobject,
    *const c_char,
    jobject,
    jint,
    *const c_uchar,
    *mut jint,
    *mut *mut c_uchar,
);

/// Leading part of `jvmtiEventCallbacks`; the VM treats the missing tail as unset.
#[repr(C)]
#[derive(Default)]
pub struct jvmtiEventCallbacks {
    pub VMInit: Option<VMInitCallback>,
    pub VMDeath: Option<unsafe extern "system" fn(*mut jvmtiEnv, *mut JNIEnv)>,
    pub ThreadStart: Option<unsafe extern "system" fn(*mut jvmtiEnv, *mut JNIEnv, jthread)>,
    pub ThreadEnd: Option<unsafe extern "system" fn(*mut jvmtiEnv, *mut JNIEnv, jthread)>,
    pub ClassFileLoadHook: Option<ClassFileLoadHookCallback>,
}

bitflags! {
    /// The capability bits this crate requests.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Capabilities: u128 {
        /// `can_generate_all_class_hook_events`
        const ALL_CLASS_HOOK_EVENTS = 1 << 26;
        /// `can_retransform_classes`
        const RETRANSFORM_CLASSES = 1 << 37;
    }
}

/// The `jvmtiCapabilities` bitfield block.
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct jvmtiCapabilities {
    words: [u32; 4],
}

impl From<Capabilities> for jvmtiCapabilities {
    fn from(capabilities: Capabilities) -> Self {
        let bits = capabilities.bits();
        let mut words = [0u32; 4];
        for (index, word) in words.iter_mut().enumerate() {
            *word = (bits >> (32 * index)) as u32;
        }
        jvmtiCapabilities { words }
    }
}
