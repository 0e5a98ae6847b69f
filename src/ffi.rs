//! C ABI
//!
//! Hosts written in other languages load the library and call
//! `filerecall_api()` to get a versioned table of function pointers.
//! Engines and results are opaque handles. Every entry point rejects
//! null handles and invalid UTF-8 with a status code, and a panic is
//! turned into `FR_STATUS_PANIC` instead of crossing the boundary.
//!
//! Recovery through the C ABI is blocking; call `cancel` from another
//! thread to stop it. A null extension list selects every type, while
//! an empty or blank list is rejected.

use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::PathBuf;
use std::ptr;

use crate::application::{EngineLogger, LogLevel, RecoveryEngine, summarize};
use crate::domain::entities::{DeviceId, ExtensionSet, JobState, RecoveryMode, RecoveryResult};
use crate::domain::errors::RecoveryError;

pub const FILERECALL_ABI_VERSION: u32 = 1;

pub const FR_STATUS_OK: c_int = 0;
pub const FR_STATUS_NULL_ARGUMENT: c_int = 1;
pub const FR_STATUS_INVALID_UTF8: c_int = 2;
pub const FR_STATUS_INVALID_ARGUMENT: c_int = 3;
pub const FR_STATUS_NOT_INITIALIZED: c_int = 4;
pub const FR_STATUS_BUSY: c_int = 5;
pub const FR_STATUS_ACCESS_DENIED: c_int = 6;
pub const FR_STATUS_DEVICE_NOT_FOUND: c_int = 7;
pub const FR_STATUS_FAILED: c_int = 8;
pub const FR_STATUS_PANIC: c_int = 9;

pub const FR_MODE_METADATA: c_int = 0;
pub const FR_MODE_SIGNATURE: c_int = 1;
pub const FR_MODE_COMBINED: c_int = 2;

/// Log sink: `level` is 0 debug, 1 info, 2 warn, 3 error
pub type FrLogCallback = Option<unsafe extern "C" fn(user_data: *mut c_void, level: c_int, message: *const c_char)>;

/// Opaque engine handle
pub struct FrEngine {
    engine: RecoveryEngine,
}

/// Opaque result handle
pub struct FrResult {
    result: RecoveryResult,
}

/// Forwards engine messages to a C callback
struct CallbackLogger {
    callback: unsafe extern "C" fn(*mut c_void, c_int, *const c_char),
    user_data: *mut c_void,
}

// The host promises the callback may be called from any thread with
// its `user_data`.
unsafe impl Send for CallbackLogger {}
unsafe impl Sync for CallbackLogger {}

impl EngineLogger for CallbackLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let message = CString::new(message.replace('\0', " ")).unwrap_or_default();
        unsafe { (self.callback)(self.user_data, level as c_int, message.as_ptr()) }
    }
}

/// Function table handed to hosts
#[repr(C)]
pub struct FileRecallApi {
    pub abi_version: u32,
    pub engine_new: unsafe extern "C" fn(FrLogCallback, *mut c_void) -> *mut FrEngine,
    pub engine_free: unsafe extern "C" fn(*mut FrEngine),
    pub initialize: unsafe extern "C" fn(*const FrEngine, u32) -> bool,
    pub open_path: unsafe extern "C" fn(*const FrEngine, *const c_char) -> c_int,
    pub recover: unsafe extern "C" fn(
        *const FrEngine,
        c_int,
        *const c_char,
        u64,
        *const c_char,
        *mut *mut FrResult,
    ) -> c_int,
    pub cancel: unsafe extern "C" fn(*const FrEngine),
    pub result_state: unsafe extern "C" fn(*const FrResult) -> c_int,
    pub result_recovered: unsafe extern "C" fn(*const FrResult) -> u64,
    pub result_skipped: unsafe extern "C" fn(*const FrResult) -> u64,
    pub result_errors: unsafe extern "C" fn(*const FrResult) -> u64,
    pub result_bytes_written: unsafe extern "C" fn(*const FrResult) -> u64,
    pub result_manifest_json: unsafe extern "C" fn(*const FrResult) -> *mut c_char,
    pub result_free: unsafe extern "C" fn(*mut FrResult),
    pub string_free: unsafe extern "C" fn(*mut c_char),
}

static API: FileRecallApi = FileRecallApi {
    abi_version: FILERECALL_ABI_VERSION,
    engine_new,
    engine_free,
    initialize,
    open_path,
    recover,
    cancel,
    result_state,
    result_recovered,
    result_skipped,
    result_errors,
    result_bytes_written,
    result_manifest_json,
    result_free,
    string_free,
};

#[unsafe(no_mangle)]
pub extern "C" fn filerecall_api() -> *const FileRecallApi {
    &API
}

fn guard<T>(on_panic: T, body: impl FnOnce() -> T) -> T {
    catch_unwind(AssertUnwindSafe(body)).unwrap_or(on_panic)
}

fn status_of(err: &RecoveryError) -> c_int {
    match err {
        RecoveryError::AccessDenied(_) => FR_STATUS_ACCESS_DENIED,
        RecoveryError::DeviceNotFound(_) => FR_STATUS_DEVICE_NOT_FOUND,
        RecoveryError::InvalidJob(_) => FR_STATUS_INVALID_ARGUMENT,
        RecoveryError::EngineBusy => FR_STATUS_BUSY,
        RecoveryError::NotInitialized => FR_STATUS_NOT_INITIALIZED,
        _ => FR_STATUS_FAILED,
    }
}

fn state_code(state: JobState) -> c_int {
    match state {
        JobState::Created => 0,
        JobState::Initializing => 1,
        JobState::Scanning => 2,
        JobState::Writing => 3,
        JobState::Completed => 4,
        JobState::Cancelling => 5,
        JobState::Cancelled => 6,
        JobState::Failed => 7,
    }
}

/// Borrowed UTF-8 string from a C pointer
unsafe fn utf8<'a>(ptr: *const c_char) -> Result<&'a str, c_int> {
    if ptr.is_null() {
        return Err(FR_STATUS_NULL_ARGUMENT);
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|_| FR_STATUS_INVALID_UTF8)
}

unsafe extern "C" fn engine_new(log: FrLogCallback, user_data: *mut c_void) -> *mut FrEngine {
    guard(ptr::null_mut(), || {
        let engine = match log {
            Some(callback) => RecoveryEngine::new(CallbackLogger { callback, user_data }),
            None => RecoveryEngine::default(),
        };
        Box::into_raw(Box::new(FrEngine { engine }))
    })
}

unsafe extern "C" fn engine_free(handle: *mut FrEngine) {
    if handle.is_null() {
        return;
    }
    guard((), || drop(unsafe { Box::from_raw(handle) }))
}

unsafe extern "C" fn initialize(handle: *const FrEngine, drive_index: u32) -> bool {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return false;
    };
    guard(false, || handle.engine.initialize(drive_index))
}

unsafe extern "C" fn open_path(handle: *const FrEngine, path: *const c_char) -> c_int {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return FR_STATUS_NULL_ARGUMENT;
    };
    let path = match unsafe { utf8(path) } {
        Ok(path) => path,
        Err(status) => return status,
    };
    guard(FR_STATUS_PANIC, || {
        match handle.engine.open(&DeviceId::Path(PathBuf::from(path))) {
            Ok(_) => FR_STATUS_OK,
            Err(e) => status_of(&e),
        }
    })
}

unsafe extern "C" fn recover(
    handle: *const FrEngine,
    mode: c_int,
    extensions: *const c_char,
    max_bytes: u64,
    output: *const c_char,
    out_result: *mut *mut FrResult,
) -> c_int {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return FR_STATUS_NULL_ARGUMENT;
    };
    if out_result.is_null() {
        return FR_STATUS_NULL_ARGUMENT;
    }
    let mode = match mode {
        FR_MODE_METADATA => RecoveryMode::MetadataOnly,
        FR_MODE_SIGNATURE => RecoveryMode::SignatureOnly,
        FR_MODE_COMBINED => RecoveryMode::Combined,
        _ => return FR_STATUS_INVALID_ARGUMENT,
    };
    // A null extension list means every type; a list naming none is an error
    let extensions = if extensions.is_null() {
        ExtensionSet::all()
    } else {
        match unsafe { utf8(extensions) } {
            Ok(list) => match list.parse::<ExtensionSet>() {
                Ok(set) if !set.is_all() => set,
                _ => return FR_STATUS_INVALID_ARGUMENT,
            },
            Err(status) => return status,
        }
    };
    let output = match unsafe { utf8(output) } {
        Ok(output) => output,
        Err(status) => return status,
    };

    guard(FR_STATUS_PANIC, || {
        match handle
            .engine
            .recover_files_blocking(mode, extensions, max_bytes, output)
        {
            Ok(result) => {
                let boxed = Box::into_raw(Box::new(FrResult { result }));
                unsafe { *out_result = boxed };
                FR_STATUS_OK
            }
            Err(e) => status_of(&e),
        }
    })
}

unsafe extern "C" fn cancel(handle: *const FrEngine) {
    if let Some(handle) = unsafe { handle.as_ref() } {
        guard((), || handle.engine.cancel());
    }
}

unsafe extern "C" fn result_state(handle: *const FrResult) -> c_int {
    unsafe { handle.as_ref() }.map_or(-1, |r| state_code(r.result.state))
}

unsafe extern "C" fn result_recovered(handle: *const FrResult) -> u64 {
    unsafe { handle.as_ref() }.map_or(0, |r| r.result.files_recovered() as u64)
}

unsafe extern "C" fn result_skipped(handle: *const FrResult) -> u64 {
    unsafe { handle.as_ref() }.map_or(0, |r| r.result.files_skipped() as u64)
}

unsafe extern "C" fn result_errors(handle: *const FrResult) -> u64 {
    unsafe { handle.as_ref() }.map_or(0, |r| r.result.issues.len() as u64)
}

unsafe extern "C" fn result_bytes_written(handle: *const FrResult) -> u64 {
    unsafe { handle.as_ref() }.map_or(0, |r| r.result.bytes_written)
}

/// Manifest JSON, to be released with `string_free`; null on failure
unsafe extern "C" fn result_manifest_json(handle: *const FrResult) -> *mut c_char {
    let Some(handle) = (unsafe { handle.as_ref() }) else {
        return ptr::null_mut();
    };
    guard(ptr::null_mut(), || {
        summarize(&handle.result)
            .to_json()
            .ok()
            .and_then(|json| CString::new(json).ok())
            .map_or(ptr::null_mut(), CString::into_raw)
    })
}

unsafe extern "C" fn result_free(handle: *mut FrResult) {
    if !handle.is_null() {
        drop(unsafe { Box::from_raw(handle) });
    }
}

unsafe extern "C" fn string_free(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}
