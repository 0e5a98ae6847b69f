//! Round trips through the C function table

mod common;

use common::gif_image;
use filerecall::ffi::*;
use std::ffi::{CStr, CString, c_char, c_int, c_void};
use std::fs;
use std::ptr;
use std::sync::Mutex;
use tempfile::TempDir;

fn api() -> &'static FileRecallApi {
    unsafe { &*filerecall_api() }
}

unsafe extern "C" fn collect_log(user_data: *mut c_void, level: c_int, message: *const c_char) {
    let lines = unsafe { &*(user_data as *const Mutex<Vec<(c_int, String)>>) };
    let message = unsafe { CStr::from_ptr(message) }.to_string_lossy().into_owned();
    lines.lock().unwrap().push((level, message));
}

#[test]
fn test_table_version() {
    assert_eq!(api().abi_version, FILERECALL_ABI_VERSION);
}

#[test]
fn test_recover_round_trip() {
    let dir = TempDir::new().unwrap();
    let image = dir.path().join("disk.img");
    fs::write(&image, gif_image(256)).unwrap();
    let out = dir.path().join("out");

    let api = api();
    let log: Mutex<Vec<(c_int, String)>> = Mutex::new(Vec::new());
    unsafe {
        let engine = (api.engine_new)(Some(collect_log), &log as *const _ as *mut c_void);
        assert!(!engine.is_null());

        let path = CString::new(image.to_str().unwrap()).unwrap();
        assert_eq!((api.open_path)(engine, path.as_ptr()), FR_STATUS_OK);

        let exts = CString::new("gif,jpg").unwrap();
        let output = CString::new(out.to_str().unwrap()).unwrap();
        let mut result = ptr::null_mut();
        let status = (api.recover)(engine, FR_MODE_COMBINED, exts.as_ptr(), u64::MAX, output.as_ptr(), &mut result);
        assert_eq!(status, FR_STATUS_OK);
        assert!(!result.is_null());

        assert_eq!((api.result_state)(result), 4);
        assert_eq!((api.result_recovered)(result), 3);
        assert_eq!((api.result_skipped)(result), 0);
        assert_eq!((api.result_errors)(result), 0);
        assert_eq!((api.result_bytes_written)(result), 1800);

        let json = (api.result_manifest_json)(result);
        assert!(!json.is_null());
        let manifest: serde_json::Value =
            serde_json::from_str(CStr::from_ptr(json).to_str().unwrap()).unwrap();
        assert_eq!(manifest["totals"]["files_recovered"], 3);
        assert_eq!(manifest["by_extension"]["gif"], 3);
        (api.string_free)(json);

        (api.result_free)(result);
        (api.engine_free)(engine);
    }

    assert!(out.join("f40.gif").exists());
    let lines = log.lock().unwrap();
    assert!(lines.iter().any(|(level, msg)| *level == 1 && msg.starts_with("Opened")));
}

#[test]
fn test_null_and_invalid_arguments() {
    let api = api();
    unsafe {
        let engine = (api.engine_new)(None, ptr::null_mut());
        let mut result = ptr::null_mut();

        assert_eq!((api.open_path)(ptr::null(), c"disk.img".as_ptr()), FR_STATUS_NULL_ARGUMENT);
        assert_eq!((api.open_path)(engine, ptr::null()), FR_STATUS_NULL_ARGUMENT);

        let invalid = [0xFFu8, 0xFE, 0x00];
        assert_eq!(
            (api.open_path)(engine, invalid.as_ptr() as *const c_char),
            FR_STATUS_INVALID_UTF8
        );

        assert_eq!(
            (api.recover)(engine, FR_MODE_COMBINED, ptr::null(), u64::MAX, c"/tmp/out".as_ptr(), &mut result),
            FR_STATUS_NOT_INITIALIZED
        );
        assert_eq!(
            (api.recover)(engine, 42, ptr::null(), u64::MAX, c"/tmp/out".as_ptr(), &mut result),
            FR_STATUS_INVALID_ARGUMENT
        );
        for blank in [c"", c" , ", c";"] {
            assert_eq!(
                (api.recover)(engine, FR_MODE_COMBINED, blank.as_ptr(), u64::MAX, c"/tmp/out".as_ptr(), &mut result),
                FR_STATUS_INVALID_ARGUMENT
            );
        }
        assert_eq!(
            (api.recover)(engine, FR_MODE_COMBINED, ptr::null(), u64::MAX, c"/tmp/out".as_ptr(), ptr::null_mut()),
            FR_STATUS_NULL_ARGUMENT
        );
        assert!(result.is_null());

        assert_eq!(
            (api.open_path)(engine, c"/nonexistent/filerecall.img".as_ptr()),
            FR_STATUS_DEVICE_NOT_FOUND
        );

        assert_eq!((api.result_state)(ptr::null()), -1);
        assert_eq!((api.result_recovered)(ptr::null()), 0);
        assert!((api.result_manifest_json)(ptr::null()).is_null());
        (api.cancel)(ptr::null());
        (api.result_free)(ptr::null_mut());
        (api.string_free)(ptr::null_mut());
        (api.engine_free)(ptr::null_mut());
        (api.engine_free)(engine);
    }
}
