//! C ABI over an opaque engine handle
//!
//! Conventions:
//! - Strings in are NUL-terminated UTF-8; strings out are written into
//!   caller buffers as NUL-terminated JSON carrying a `success` field.
//! - Negative return values are [`EngineError::code`]s; `-1` means a NULL
//!   handle or a caught panic.
//! - Every call on a handle sets its last error on failure and blanks it on
//!   success (`bio_last_error`).
//! - Calls that change state (enroll, push, pull, model install) keep their
//!   success code when `out_json` is too small: the buffer then holds an
//!   empty string and the full report stays readable via `bio_last_report`.

#![allow(clippy::missing_safety_doc)]

use crate::ear::GrayImage;
use crate::engine::Engine;
use crate::error::{EngineError, Result};
use crate::paths::EnginePaths;
use crate::storage::NewPhrase;
use crate::sync::{CancelToken, SyncOptions};
use crate::validation::{threshold_override, validate_input_file};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use std::ffi::CStr;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

const INVALID_HANDLE: i32 = -1;

pub struct EngineHandle {
    engine: Engine,
    last_error: Mutex<String>,
    last_report: Mutex<String>,
    cancel: Mutex<CancelToken>,
}

impl EngineHandle {
    fn set_error(&self, message: &str) {
        if let Ok(mut slot) = self.last_error.lock() {
            slot.clear();
            slot.push_str(message);
        }
    }

    /// Write the report of a committed mutation. Never fails: a short buffer
    /// gets an empty string and the report is kept for `bio_last_report`.
    unsafe fn write_report(&self, value: &Value, out: *mut c_char, len: usize) {
        let text = value.to_string();
        if write_str(&text, out, len).is_err() {
            log::warn!(
                "Report needs {} bytes, buffer has {}; kept for bio_last_report",
                text.len() + 1,
                len
            );
            if !out.is_null() && len > 0 {
                *out = 0;
            }
        }
        if let Ok(mut slot) = self.last_report.lock() {
            *slot = text;
        }
    }

    /// Fresh cancel token for a network call, reachable from `bio_sync_cancel`
    fn sync_options(&self, timeout_ms: u64) -> SyncOptions {
        let token = CancelToken::new();
        if let Ok(mut slot) = self.cancel.lock() {
            *slot = token.clone();
        }
        let mut opts = self.engine.sync_options();
        if timeout_ms > 0 {
            opts.timeout = Duration::from_millis(timeout_ms);
        }
        opts.cancel = Some(token);
        opts
    }
}

unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(EngineError::InvalidInput(format!("{} is NULL", name)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| EngineError::InvalidInput(format!("{} is not valid UTF-8", name)))
}

unsafe fn opt_str_arg<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok().filter(|s| !s.is_empty())
}

/// Copy `text` plus a NUL into `out`
unsafe fn write_str(text: &str, out: *mut c_char, len: usize) -> Result<()> {
    let needed = text.len() + 1;
    if out.is_null() || len < needed {
        return Err(EngineError::BufferTooSmall {
            needed,
            capacity: len,
        });
    }
    std::ptr::copy_nonoverlapping(text.as_ptr(), out as *mut u8, text.len());
    *out.add(text.len()) = 0;
    Ok(())
}

fn success_json<T: Serialize>(value: &T) -> Result<Value> {
    let mut v = serde_json::to_value(value)?;
    match v.as_object_mut() {
        Some(obj) => {
            obj.insert("success".to_string(), Value::Bool(true));
            Ok(v)
        }
        None => Ok(json!({"success": true, "data": v})),
    }
}

unsafe fn write_json(value: &Value, out: *mut c_char, len: usize) -> Result<()> {
    write_str(&value.to_string(), out, len)
}

/// Run `f` against a live handle, recording the outcome as the last error
unsafe fn with_handle<T>(
    handle: *const EngineHandle,
    on_error: T,
    f: impl FnOnce(&EngineHandle) -> Result<T>,
) -> T
where
    T: Copy + From<i32>,
{
    let Some(h) = handle.as_ref() else {
        return T::from(INVALID_HANDLE);
    };
    match catch_unwind(AssertUnwindSafe(|| f(h))) {
        Ok(Ok(value)) => {
            h.set_error("");
            value
        }
        Ok(Err(e)) => {
            log::warn!("{}", e);
            h.set_error(&e.to_string());
            T::from(e.code())
        }
        Err(_) => {
            log::error!("Engine call panicked");
            h.set_error("internal error");
            on_error
        }
    }
}

fn read_image(path: &str) -> Result<GrayImage> {
    let path = validate_input_file(path)?;
    GrayImage::from_pgm(&std::fs::read(&path)?)
}

fn read_file(path: &str) -> Result<Vec<u8>> {
    let path = validate_input_file(path)?;
    Ok(std::fs::read(&path)?)
}

fn phrase_arg(phrase_id: i64) -> Option<i64> {
    (phrase_id > 0).then_some(phrase_id)
}

// ---- lifecycle ----

/// Open an engine. Returns NULL on failure with the message in `err_buf`.
#[no_mangle]
pub unsafe extern "C" fn bio_init(
    store_path: *const c_char,
    model_dir: *const c_char,
    dataset_path: *const c_char,
    err_buf: *mut c_char,
    err_len: usize,
) -> *mut EngineHandle {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();

    let result = catch_unwind(AssertUnwindSafe(|| -> Result<Engine> {
        let paths = EnginePaths::new(
            Path::new(str_arg(store_path, "store_path")?),
            Path::new(str_arg(model_dir, "model_dir")?),
            Path::new(str_arg(dataset_path, "dataset_path")?),
        );
        Engine::open(paths)
    }));

    let message = match result {
        Ok(Ok(engine)) => {
            return Box::into_raw(Box::new(EngineHandle {
                engine,
                last_error: Mutex::new(String::new()),
                last_report: Mutex::new(String::new()),
                cancel: Mutex::new(CancelToken::new()),
            }))
        }
        Ok(Err(e)) => e.to_string(),
        Err(_) => "internal error during init".to_string(),
    };
    log::error!("bio_init failed: {}", message);
    if !err_buf.is_null() && err_len > 0 {
        let cut = truncate_to_boundary(&message, err_len - 1);
        let _ = write_str(cut, err_buf, err_len);
    }
    std::ptr::null_mut()
}

fn truncate_to_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Re-read model and dataset from disk
#[no_mangle]
pub unsafe extern "C" fn bio_reload(handle: *const EngineHandle) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        h.engine.reload()?;
        Ok(0)
    })
}

#[no_mangle]
pub unsafe extern "C" fn bio_cleanup(handle: *mut EngineHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
        log::info!("Engine handle released");
    }
}

#[no_mangle]
pub extern "C" fn bio_version() -> *const c_char {
    concat!(env!("CARGO_PKG_VERSION"), "\0").as_ptr() as *const c_char
}

#[no_mangle]
pub unsafe extern "C" fn bio_last_error(
    handle: *const EngineHandle,
    buf: *mut c_char,
    len: usize,
) -> i32 {
    let Some(h) = handle.as_ref() else {
        return INVALID_HANDLE;
    };
    let message = match h.last_error.lock() {
        Ok(slot) => slot.clone(),
        Err(_) => "last error unavailable".to_string(),
    };
    match write_str(&message, buf, len) {
        Ok(()) => message.len() as i32,
        Err(e) => e.code(),
    }
}

/// Report of the last state-changing call. `*len` is the buffer capacity on
/// entry and the size needed (with NUL) on return; `-12` when it does not fit.
#[no_mangle]
pub unsafe extern "C" fn bio_last_report(
    handle: *const EngineHandle,
    buf: *mut c_char,
    len: *mut usize,
) -> i32 {
    let Some(h) = handle.as_ref() else {
        return INVALID_HANDLE;
    };
    if len.is_null() {
        return EngineError::InvalidInput("len is NULL".to_string()).code();
    }
    let report = match h.last_report.lock() {
        Ok(slot) => slot.clone(),
        Err(_) => return EngineError::Storage("last report unavailable".to_string()).code(),
    };
    let capacity = *len;
    *len = report.len() + 1;
    match write_str(&report, buf, capacity) {
        Ok(()) => 0,
        Err(e) => e.code(),
    }
}

// ---- users ----

/// Local user id, `-10` when unknown
#[no_mangle]
pub unsafe extern "C" fn bio_user_id(handle: *const EngineHandle, external_id: *const c_char) -> i64 {
    with_handle(handle, INVALID_HANDLE as i64, |h| {
        let external_id = str_arg(external_id, "external_id")?;
        h.engine
            .user_id(external_id)?
            .ok_or_else(|| EngineError::NotFound(format!("user '{}'", external_id)))
    })
}

#[no_mangle]
pub unsafe extern "C" fn bio_user_exists(
    handle: *const EngineHandle,
    external_id: *const c_char,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        Ok(h.engine.user_exists(str_arg(external_id, "external_id")?)? as i32)
    })
}

/// Get-or-create; returns the local user id
#[no_mangle]
pub unsafe extern "C" fn bio_create_user(
    handle: *const EngineHandle,
    external_id: *const c_char,
) -> i64 {
    with_handle(handle, INVALID_HANDLE as i64, |h| {
        let (user, _) = h.engine.create_user(str_arg(external_id, "external_id")?)?;
        Ok(user.user_id)
    })
}

// ---- phrases ----

/// Returns the phrase id; details go to `out_json`
#[no_mangle]
pub unsafe extern "C" fn bio_random_phrase(
    handle: *const EngineHandle,
    out_json: *mut c_char,
    len: usize,
) -> i64 {
    with_handle(handle, INVALID_HANDLE as i64, |h| {
        let phrase = h.engine.random_phrase()?;
        write_json(&success_json(&phrase)?, out_json, len)?;
        Ok(phrase.phrase_id)
    })
}

#[no_mangle]
pub unsafe extern "C" fn bio_phrase_by_id(
    handle: *const EngineHandle,
    phrase_id: i64,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let phrase = h.engine.phrase(phrase_id)?;
        write_json(&success_json(&phrase)?, out_json, len)?;
        Ok(0)
    })
}

/// `phrases_json` is `[{"text": "...", "category": "..."}]`; returns the count
#[no_mangle]
pub unsafe extern "C" fn bio_insert_phrases(
    handle: *const EngineHandle,
    phrases_json: *const c_char,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let phrases: Vec<NewPhrase> = serde_json::from_str(str_arg(phrases_json, "phrases_json")?)?;
        Ok(h.engine.insert_phrases(&phrases)? as i32)
    })
}

// ---- enrollment ----

/// `phrase_id <= 0` means no phrase
#[no_mangle]
pub unsafe extern "C" fn bio_enroll_voice(
    handle: *const EngineHandle,
    external_id: *const c_char,
    wav_path: *const c_char,
    phrase_id: i64,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let wav = read_file(str_arg(wav_path, "wav_path")?)?;
        let report = h.engine.enroll_voice(
            str_arg(external_id, "external_id")?,
            &wav,
            phrase_arg(phrase_id),
        )?;
        h.write_report(&success_json(&report)?, out_json, len);
        Ok(0)
    })
}

#[no_mangle]
pub unsafe extern "C" fn bio_enroll_ear(
    handle: *const EngineHandle,
    external_id: *const c_char,
    image_paths: *const *const c_char,
    count: usize,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        if image_paths.is_null() && count > 0 {
            return Err(EngineError::InvalidInput("image_paths is NULL".to_string()));
        }
        let images = (0..count)
            .map(|i| read_image(str_arg(*image_paths.add(i), "image path")?))
            .collect::<Result<Vec<_>>>()?;
        let report = h
            .engine
            .enroll_ear(str_arg(external_id, "external_id")?, &images)?;
        h.write_report(&success_json(&report)?, out_json, len);
        Ok(0)
    })
}

// ---- authentication ----

/// 1 accept, 0 reject, negative on error. A negative threshold uses the
/// model's, so a negative override (valid for nearest-mean scores) cannot
/// be passed here; `Engine::authenticate_voice` accepts any finite value.
#[no_mangle]
pub unsafe extern "C" fn bio_authenticate_voice(
    handle: *const EngineHandle,
    external_id: *const c_char,
    wav_path: *const c_char,
    phrase_id: i64,
    threshold: f64,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let wav = read_file(str_arg(wav_path, "wav_path")?)?;
        let outcome = h.engine.authenticate_voice(
            str_arg(external_id, "external_id")?,
            &wav,
            phrase_arg(phrase_id),
            threshold_override(threshold)?,
        )?;
        write_json(&success_json(&outcome)?, out_json, len)?;
        Ok(outcome.decision.accepted() as i32)
    })
}

#[no_mangle]
pub unsafe extern "C" fn bio_authenticate_ear(
    handle: *const EngineHandle,
    external_id: *const c_char,
    image_path: *const c_char,
    threshold: f64,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let image = read_image(str_arg(image_path, "image_path")?)?;
        let outcome = h.engine.authenticate_ear(
            str_arg(external_id, "external_id")?,
            &image,
            threshold_override(threshold)?,
        )?;
        write_json(&success_json(&outcome)?, out_json, len)?;
        Ok(outcome.decision.accepted() as i32)
    })
}

// ---- sync queue ----

/// Returns the pending count; the items go to `out_json`
#[no_mangle]
pub unsafe extern "C" fn bio_sync_queue(
    handle: *const EngineHandle,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let items = h.engine.pending_items(None)?;
        let body = json!({"success": true, "pending": items});
        write_json(&body, out_json, len)?;
        Ok(items.len() as i32)
    })
}

/// 1 when the item moved to synced, 0 when it already was
#[no_mangle]
pub unsafe extern "C" fn bio_mark_synced(handle: *const EngineHandle, sync_id: i64) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        Ok(h.engine.mark_synced(sync_id)? as i32)
    })
}

/// Returns the number of items pushed. `timeout_ms == 0` uses the config.
#[no_mangle]
pub unsafe extern "C" fn bio_sync_push(
    handle: *const EngineHandle,
    server_url: *const c_char,
    timeout_ms: u64,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let opts = h.sync_options(timeout_ms);
        let report = h.engine.sync_push(str_arg(server_url, "server_url")?, &opts)?;
        let mut body = serde_json::to_value(&report)?;
        body["success"] = Value::Bool(report.error.is_none());
        h.write_report(&body, out_json, len);
        Ok(report.sent as i32)
    })
}

/// `since` is RFC 3339; NULL or empty pulls everything
#[no_mangle]
pub unsafe extern "C" fn bio_sync_pull(
    handle: *const EngineHandle,
    server_url: *const c_char,
    since: *const c_char,
    timeout_ms: u64,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let since = opt_str_arg(since)
            .map(|s| {
                DateTime::parse_from_rfc3339(s)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|e| EngineError::InvalidInput(format!("since: {}", e)))
            })
            .transpose()?;
        let opts = h.sync_options(timeout_ms);
        let report = h
            .engine
            .sync_pull(str_arg(server_url, "server_url")?, since, &opts)?;
        h.write_report(&success_json(&report)?, out_json, len);
        Ok((report.users + report.templates + report.phrases) as i32)
    })
}

#[no_mangle]
pub unsafe extern "C" fn bio_sync_model(
    handle: *const EngineHandle,
    server_url: *const c_char,
    filename: *const c_char,
    timeout_ms: u64,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let opts = h.sync_options(timeout_ms);
        let download = h.engine.sync_model(
            str_arg(server_url, "server_url")?,
            str_arg(filename, "filename")?,
            &opts,
        )?;
        h.write_report(&success_json(&download)?, out_json, len);
        Ok(download.installed as i32)
    })
}

/// 1 when the server answers, 0 when it reports itself down
#[no_mangle]
pub unsafe extern "C" fn bio_sync_ping(
    handle: *const EngineHandle,
    server_url: *const c_char,
    timeout_ms: u64,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        let opts = h.sync_options(timeout_ms);
        Ok(h.engine.sync_ping(str_arg(server_url, "server_url")?, &opts)? as i32)
    })
}

/// Cancel the network call currently running on this handle, if any
#[no_mangle]
pub unsafe extern "C" fn bio_sync_cancel(handle: *const EngineHandle) -> i32 {
    let Some(h) = handle.as_ref() else {
        return INVALID_HANDLE;
    };
    if let Ok(token) = h.cancel.lock() {
        token.cancel();
    }
    0
}

// ---- snapshots ----

unsafe fn export_into(bytes: Vec<u8>, buf: *mut u8, len: *mut usize) -> Result<i32> {
    if len.is_null() {
        return Err(EngineError::InvalidInput("len is NULL".to_string()));
    }
    let capacity = *len;
    *len = bytes.len();
    if buf.is_null() || capacity < bytes.len() {
        return Err(EngineError::BufferTooSmall {
            needed: bytes.len(),
            capacity,
        });
    }
    std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
    Ok(0)
}

unsafe fn bytes_arg<'a>(buf: *const u8, len: usize) -> Result<&'a [u8]> {
    if buf.is_null() {
        return Err(EngineError::InvalidInput("buffer is NULL".to_string()));
    }
    Ok(std::slice::from_raw_parts(buf, len))
}

/// On `-12` the required size is written to `*len`
#[no_mangle]
pub unsafe extern "C" fn bio_export_model(
    handle: *const EngineHandle,
    buf: *mut u8,
    len: *mut usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        export_into(h.engine.export_model()?, buf, len)
    })
}

/// On `-12` the required size is written to `*len`
#[no_mangle]
pub unsafe extern "C" fn bio_export_dataset(
    handle: *const EngineHandle,
    buf: *mut u8,
    len: *mut usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        export_into(h.engine.export_dataset()?, buf, len)
    })
}

#[no_mangle]
pub unsafe extern "C" fn bio_import_model(
    handle: *const EngineHandle,
    buf: *const u8,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        h.engine.import_model(bytes_arg(buf, len)?)?;
        Ok(0)
    })
}

#[no_mangle]
pub unsafe extern "C" fn bio_import_dataset(
    handle: *const EngineHandle,
    buf: *const u8,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        h.engine.import_dataset(bytes_arg(buf, len)?)?;
        Ok(0)
    })
}

// ---- housekeeping ----

#[no_mangle]
pub unsafe extern "C" fn bio_stats(
    handle: *const EngineHandle,
    out_json: *mut c_char,
    len: usize,
) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| {
        write_json(&success_json(&h.engine.stats()?)?, out_json, len)?;
        Ok(0)
    })
}

/// Returns the number of cached files removed
#[no_mangle]
pub unsafe extern "C" fn bio_clear_cache(handle: *const EngineHandle) -> i32 {
    with_handle(handle, INVALID_HANDLE, |h| Ok(h.engine.clear_cache()? as i32))
}
