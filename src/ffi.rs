//! FFI bindings for Pulse Phase
//!
//! This module provides C-compatible functions for calling the engine from
//! other languages. All functions use C strings (null-terminated) and return
//! allocated memory that must be freed by the caller using
//! `phase_free_string`.

use std::cell::RefCell;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;

use chrono::DateTime;

use crate::pipeline::{replay, PhaseEngine};
use crate::types::{IntervalSample, RrEvent};

// Thread-local storage for the last error message
thread_local! {
    static LAST_ERROR: RefCell<Option<CString>> = const { RefCell::new(None) };
}

/// Set the last error message
fn set_last_error(msg: &str) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = CString::new(msg).ok();
    });
}

/// Clear the last error message
fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

/// Helper to convert C string to Rust string
unsafe fn cstr_to_string(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().map(|s| s.to_string())
}

/// Helper to convert Rust string to C string (caller must free)
fn string_to_cstr(s: &str) -> *mut c_char {
    match CString::new(s) {
        Ok(cstr) => cstr.into_raw(),
        Err(_) => ptr::null_mut(),
    }
}

/// Helper to convert a Vec<String> of JSON records to a JSON array string
fn vec_to_json_array(vec: Vec<String>) -> String {
    let elements: Vec<&str> = vec.iter().map(|s| s.as_str()).collect();
    format!("[{}]", elements.join(","))
}

// ============================================================================
// Stateless API
// ============================================================================

/// Replay a JSON array of interval events (`[{"ts": "...", "rr_ms": 812}, ...]`)
/// through a fresh engine and return a JSON array of per-tick records.
///
/// # Safety
/// - `json` must be a valid null-terminated C string.
/// - Returns a newly allocated string that must be freed with `phase_free_string`.
/// - Returns NULL on error; call `phase_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn phase_replay(json: *const c_char) -> *mut c_char {
    clear_last_error();

    let json_str = match cstr_to_string(json) {
        Some(s) => s,
        None => {
            set_last_error("Invalid JSON string pointer");
            return ptr::null_mut();
        }
    };

    let events: Vec<RrEvent> = match serde_json::from_str(&json_str) {
        Ok(events) => events,
        Err(e) => {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    };
    for event in &events {
        if let Err(e) = event.validate() {
            set_last_error(&e.to_string());
            return ptr::null_mut();
        }
    }

    let samples: Vec<IntervalSample> = events
        .iter()
        .map(|e| IntervalSample::new(e.rr_ms, e.ts))
        .collect();

    match replay(&samples) {
        Ok(lines) => string_to_cstr(&vec_to_json_array(lines)),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Stateful Engine API
// ============================================================================

/// Opaque handle to a PhaseEngine
pub struct PhaseEngineHandle {
    engine: PhaseEngine,
}

/// Create a new PhaseEngine with the default configuration.
///
/// # Safety
/// - Returns a pointer to a newly allocated PhaseEngine.
/// - Must be freed with `phase_engine_free`.
#[no_mangle]
pub unsafe extern "C" fn phase_engine_new() -> *mut PhaseEngineHandle {
    clear_last_error();
    let handle = Box::new(PhaseEngineHandle {
        engine: PhaseEngine::new(),
    });
    Box::into_raw(handle)
}

/// Free a PhaseEngine.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `phase_engine_new`.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn phase_engine_free(engine: *mut PhaseEngineHandle) {
    if !engine.is_null() {
        drop(Box::from_raw(engine));
    }
}

/// Run one update tick: consume one interval and return the record as JSON.
///
/// `timestamp_ms` is the observation time as Unix epoch milliseconds;
/// `interval_ms` is the beat-to-beat interval in milliseconds.
///
/// # Safety
/// - `engine` must be a valid pointer returned by `phase_engine_new`.
/// - Returns a newly allocated string that must be freed with `phase_free_string`.
/// - Returns NULL on error; call `phase_last_error` to get the error message.
#[no_mangle]
pub unsafe extern "C" fn phase_engine_tick(
    engine: *mut PhaseEngineHandle,
    timestamp_ms: i64,
    interval_ms: u32,
) -> *mut c_char {
    clear_last_error();

    if engine.is_null() {
        set_last_error("Null engine pointer");
        return ptr::null_mut();
    }
    if interval_ms == 0 {
        set_last_error("interval_ms must be positive");
        return ptr::null_mut();
    }
    let ts = match DateTime::from_timestamp_millis(timestamp_ms) {
        Some(ts) => ts,
        None => {
            set_last_error("timestamp_ms out of representable range");
            return ptr::null_mut();
        }
    };

    let handle = &mut *engine;
    let record = handle.engine.tick(IntervalSample::new(interval_ms, ts));
    match record.to_json() {
        Ok(json) => string_to_cstr(&json),
        Err(e) => {
            set_last_error(&e.to_string());
            ptr::null_mut()
        }
    }
}

// ============================================================================
// Memory Management
// ============================================================================

/// Free a string returned by Pulse Phase functions.
///
/// # Safety
/// - `ptr` must be a valid pointer returned by a Pulse Phase function, or NULL.
/// - After calling this function, the pointer is invalid.
#[no_mangle]
pub unsafe extern "C" fn phase_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Get the last error message.
///
/// # Safety
/// - Returns a pointer to a thread-local error string.
/// - The returned pointer is valid until the next Pulse Phase call on this thread.
/// - Do NOT free the returned pointer.
/// - Returns NULL if no error occurred.
#[no_mangle]
pub unsafe extern "C" fn phase_last_error() -> *const c_char {
    LAST_ERROR.with(|e| match &*e.borrow() {
        Some(cstr) => cstr.as_ptr(),
        None => ptr::null(),
    })
}

// ============================================================================
// Version Information
// ============================================================================

/// Get the Pulse Phase library version.
///
/// # Safety
/// - Returns a pointer to a static string. Do NOT free.
#[no_mangle]
pub unsafe extern "C" fn phase_version() -> *const c_char {
    // Use a static CString to avoid allocation
    static VERSION: &[u8] = concat!(env!("CARGO_PKG_VERSION"), "\0").as_bytes();
    VERSION.as_ptr() as *const c_char
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn events_json() -> CString {
        CString::new(
            r#"[
                {"ts": "2024-01-15T12:00:00Z", "rr_ms": 812},
                {"ts": "2024-01-15T12:00:00.812Z", "rr_ms": 798},
                {"ts": "2024-01-15T12:00:01.610Z", "rr_ms": 825}
            ]"#,
        )
        .unwrap()
    }

    unsafe fn take_string(ptr: *mut c_char) -> String {
        assert!(!ptr.is_null(), "expected a non-null result");
        let s = CStr::from_ptr(ptr).to_str().unwrap().to_string();
        phase_free_string(ptr);
        s
    }

    #[test]
    fn test_replay_returns_json_array() {
        unsafe {
            let result = phase_replay(events_json().as_ptr());
            let json = take_string(result);
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value.as_array().unwrap().len(), 3);
            assert!(value[0]["metrics"].is_object());
        }
    }

    #[test]
    fn test_replay_invalid_json_sets_error() {
        unsafe {
            let bad = CString::new("not json").unwrap();
            let result = phase_replay(bad.as_ptr());
            assert!(result.is_null());
            let err = phase_last_error();
            assert!(!err.is_null());
            assert!(!CStr::from_ptr(err).to_str().unwrap().is_empty());
        }
    }

    #[test]
    fn test_replay_null_pointer() {
        unsafe {
            let result = phase_replay(ptr::null());
            assert!(result.is_null());
        }
    }

    #[test]
    fn test_engine_tick_produces_record() {
        unsafe {
            let engine = phase_engine_new();
            assert!(!engine.is_null());

            let result = phase_engine_tick(engine, 1_705_320_000_000, 812);
            let json = take_string(result);
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value["rr"][0], 812);

            phase_engine_free(engine);
        }
    }

    #[test]
    fn test_engine_tick_rejects_zero_interval() {
        unsafe {
            let engine = phase_engine_new();
            let result = phase_engine_tick(engine, 1_705_320_000_000, 0);
            assert!(result.is_null());
            assert!(!phase_last_error().is_null());
            phase_engine_free(engine);
        }
    }

    #[test]
    fn test_null_engine_pointer() {
        unsafe {
            let result = phase_engine_tick(ptr::null_mut(), 1_705_320_000_000, 812);
            assert!(result.is_null());
        }
    }

    #[test]
    fn test_version_is_static() {
        unsafe {
            let version = phase_version();
            assert!(!version.is_null());
            assert_eq!(
                CStr::from_ptr(version).to_str().unwrap(),
                env!("CARGO_PKG_VERSION")
            );
        }
    }
}
