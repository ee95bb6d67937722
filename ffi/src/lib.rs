//! C-ABI wrapper around `kitchen-core`.
//!
//! # Overview
//! Two ways in:
//! - Descriptor calls (`kitchen_build_request` / `kitchen_parse_response`)
//!   let a host that owns its HTTP stack build requests and parse responses
//!   without any networking on the Rust side.
//! - Managed calls (`kitchen_login`, `kitchen_fetch_data_list`, ...) run the
//!   whole round-trip on a runtime owned by the client handle and report
//!   through a completion callback.
//!
//! The local recipe store is exposed through `kitchen_store_*` and
//! `kitchen_recipe_*`.
//!
//! # Design
//! - Every `extern "C"` function wraps its body in `catch_unwind` so panics
//!   never cross the FFI boundary.
//! - Payloads cross as JSON inside `FfiKitchenResult`.
//! - The C caller owns all returned pointers and must call the matching
//!   `kitchen_free_*` function to release them. A result handed to a
//!   callback belongs to the callback.
//! - Callbacks run on a runtime worker thread. Never free the client from
//!   inside a callback for a call it is still running.

pub mod types;

use std::ffi::c_void;
use std::os::raw::c_char;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr;

use kitchen_core::{
    ApiError, ClientConfig, Credentials, Endpoint, Fields, FileUpload, HttpResponse, KitchenApi,
    NewRecipe, Registration, Store,
};

use types::*;

/// Completion callback for managed calls. Receives the `user_data` given to
/// the call and a result the callback must free with `kitchen_free_result`.
pub type KitchenCallback = extern "C" fn(user_data: *mut c_void, result: *mut FfiKitchenResult);

/// `catch_unwind` for closures over raw handles. Handles are never touched
/// again after a panic, so unwind safety is asserted.
fn guard<R>(f: impl FnOnce() -> R) -> std::thread::Result<R> {
    catch_unwind(AssertUnwindSafe(f))
}

/// Opaque caller context carried to the completion thread.
struct UserData(*mut c_void);

// SAFETY: the pointer is never dereferenced on the Rust side; the caller
// promises it may be used from the callback thread.
unsafe impl Send for UserData {}

impl UserData {
    fn into_inner(self) -> *mut c_void {
        self.0
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Install a `tracing` subscriber that writes to stderr. `filter` uses
/// `RUST_LOG` syntax and may be null for `kitchen_core=info`.
///
/// Returns false if a subscriber was already installed.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_init_logging(filter: *const c_char) -> bool {
    guard(|| {
        let filter = unsafe { read_str(filter) }.unwrap_or("kitchen_core=info,kitchen_ffi=info");
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    })
    .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Client lifecycle
// ---------------------------------------------------------------------------

/// Create a client from a JSON `ClientConfig`. Missing fields take their
/// defaults; a null `config_json` means all defaults.
///
/// Returns null on invalid JSON, if the runtime cannot start, or if an
/// internal panic occurs. Free with `kitchen_client_free`.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_client_new(config_json: *const c_char) -> *mut FfiKitchenClient {
    guard(|| {
        let config = if config_json.is_null() {
            ClientConfig::default()
        } else {
            let parsed = unsafe { read_str(config_json) }
                .ok_or_else(|| "config is not UTF-8".to_string())
                .and_then(|raw| serde_json::from_str::<ClientConfig>(raw).map_err(|e| e.to_string()));
            match parsed {
                Ok(config) => config,
                Err(err) => {
                    tracing::error!(%err, "rejecting client config");
                    return ptr::null_mut();
                }
            }
        };

        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("kitchen-ffi")
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::error!(%err, "failed to start runtime");
                return ptr::null_mut();
            }
        };

        let api = KitchenApi::new(config, runtime.handle().clone());
        Box::into_raw(Box::new(FfiKitchenClient { runtime, api }))
    })
    .unwrap_or(ptr::null_mut())
}

/// Free a client created by `kitchen_client_new`. Calls still in flight are
/// abandoned and their callbacks may never run. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_client_free(client: *mut FfiKitchenClient) {
    if !client.is_null() {
        let _ = guard(|| {
            let client = unsafe { Box::from_raw(client) };
            let FfiKitchenClient { runtime, api, .. } = *client;
            drop(api);
            runtime.shutdown_background();
        });
    }
}

// ---------------------------------------------------------------------------
// Descriptor calls
// ---------------------------------------------------------------------------

/// Build the request for a JSON-encoded call such as
/// `{"operation":"fetch_data_detail","args":{"id":7}}`, with the session's
/// bearer token attached when logged in.
///
/// Returns null if an argument is null, the call does not parse, or the
/// base URL is invalid. Free with `kitchen_free_request`.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_build_request(
    client: *const FfiKitchenClient,
    call_json: *const c_char,
) -> *mut FfiHttpRequest {
    guard(|| {
        if client.is_null() {
            return ptr::null_mut();
        }
        let client = unsafe { &*client };
        let Some(raw) = (unsafe { read_str(call_json) }) else {
            return ptr::null_mut();
        };
        let call: FfiCall = match serde_json::from_str(raw) {
            Ok(call) => call,
            Err(err) => {
                tracing::warn!(%err, "unparseable call");
                return ptr::null_mut();
            }
        };
        client
            .api
            .prepare(&Endpoint::from(call))
            .map_or(ptr::null_mut(), FfiHttpRequest::from_core)
    })
    .unwrap_or(ptr::null_mut())
}

/// Parse the response the host received for `operation` (the name used in
/// `kitchen_build_request`). On success `data_json` is the unwrapped payload
/// (`null` when the server sent none).
///
/// Session effects match the managed calls: a successful `login` or
/// `register` stores the returned tokens, and an unauthorized response logs
/// the session out.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_parse_response(
    client: *const FfiKitchenClient,
    operation: *const c_char,
    response: *const FfiHttpResponse,
) -> *mut FfiKitchenResult {
    guard(|| {
        if client.is_null() {
            return FfiKitchenResult::null_arg("client");
        }
        if response.is_null() {
            return FfiKitchenResult::null_arg("response");
        }
        let Some(operation) = (unsafe { read_str(operation) }) else {
            return FfiKitchenResult::null_arg("operation");
        };
        let client = unsafe { &*client };
        let resp = unsafe { &*response };
        let core_resp = HttpResponse {
            status: resp.status,
            headers: Vec::new(),
            body: unsafe { read_str(resp.body) }.unwrap_or("").to_string(),
        };
        match operation {
            "login" | "register" => {
                FfiKitchenResult::from_api(client.api.complete_sign_in(operation, &core_resp))
            }
            _ => FfiKitchenResult::from_api(
                client.api.complete::<serde_json::Value>(operation, &core_resp),
            ),
        }
    })
    .unwrap_or_else(|_| FfiKitchenResult::panic("kitchen_parse_response"))
}

// ---------------------------------------------------------------------------
// Managed calls
// ---------------------------------------------------------------------------

/// Run `start` against the client's facade, or report a boundary error
/// through `callback` straight away.
fn managed(
    function: &str,
    client: *const FfiKitchenClient,
    callback: KitchenCallback,
    user_data: *mut c_void,
    start: impl FnOnce(&KitchenApi, UserData) -> Result<(), *mut FfiKitchenResult>,
) {
    let outcome = guard(|| {
        if client.is_null() {
            return Err(FfiKitchenResult::null_arg("client"));
        }
        let client = unsafe { &*client };
        start(&client.api, UserData(user_data))
    });
    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(result)) => callback(user_data, result),
        Err(_) => callback(user_data, FfiKitchenResult::panic(function)),
    }
}

/// Completion closure for the facade's callback forms.
fn reply<T: serde::Serialize + 'static>(
    callback: KitchenCallback,
    user_data: UserData,
) -> impl FnOnce(Result<T, ApiError>) + Send + 'static {
    move |result| callback(user_data.into_inner(), FfiKitchenResult::from_api(result))
}

/// Log in and store the returned tokens. `data_json` is the auth response.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_login(
    client: *const FfiKitchenClient,
    username: *const c_char,
    password: *const c_char,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_login", client, callback, user_data, |api, user_data| {
        let (Some(username), Some(password)) =
            (unsafe { read_str(username) }, unsafe { read_str(password) })
        else {
            return Err(FfiKitchenResult::null_arg("username/password"));
        };
        let credentials = Credentials {
            username: username.to_string(),
            password: password.to_string(),
        };
        api.login_with_callback(credentials, reply(callback, user_data));
        Ok(())
    });
}

/// Create an account and store the returned tokens. `data_json` is the auth
/// response.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_register(
    client: *const FfiKitchenClient,
    username: *const c_char,
    email: *const c_char,
    password: *const c_char,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_register", client, callback, user_data, |api, user_data| {
        let (Some(username), Some(email), Some(password)) = (
            unsafe { read_str(username) },
            unsafe { read_str(email) },
            unsafe { read_str(password) },
        ) else {
            return Err(FfiKitchenResult::null_arg("username/email/password"));
        };
        let registration = Registration {
            username: username.to_string(),
            email: email.to_string(),
            password: password.to_string(),
        };
        api.register_with_callback(registration, reply(callback, user_data));
        Ok(())
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn kitchen_get_user_info(
    client: *const FfiKitchenClient,
    user_id: i64,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_get_user_info", client, callback, user_data, |api, user_data| {
        api.get_user_info_with_callback(user_id, reply(callback, user_data));
        Ok(())
    });
}

/// `fields_json` must be a JSON object; it is sent as-is.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_update_user_info(
    client: *const FfiKitchenClient,
    user_id: i64,
    fields_json: *const c_char,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_update_user_info", client, callback, user_data, |api, user_data| {
        let fields = parse_fields(fields_json)?;
        api.update_user_info_with_callback(user_id, fields, reply(callback, user_data));
        Ok(())
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn kitchen_fetch_data_list(
    client: *const FfiKitchenClient,
    page: u32,
    limit: u32,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_fetch_data_list", client, callback, user_data, |api, user_data| {
        api.fetch_data_list_with_callback(page, limit, reply(callback, user_data));
        Ok(())
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn kitchen_fetch_data_detail(
    client: *const FfiKitchenClient,
    id: i64,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_fetch_data_detail", client, callback, user_data, |api, user_data| {
        api.fetch_data_detail_with_callback(id, reply(callback, user_data));
        Ok(())
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn kitchen_upload_data(
    client: *const FfiKitchenClient,
    fields_json: *const c_char,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_upload_data", client, callback, user_data, |api, user_data| {
        let fields = parse_fields(fields_json)?;
        api.upload_data_with_callback(fields, reply(callback, user_data));
        Ok(())
    });
}

/// Delete an item. On success `data_json` is `null`.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_delete_data(
    client: *const FfiKitchenClient,
    id: i64,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_delete_data", client, callback, user_data, |api, user_data| {
        api.delete_data_with_callback(id, reply(callback, user_data));
        Ok(())
    });
}

/// Re-encode `bytes` as JPEG at `quality` (0.0–1.0) and upload it. The bytes
/// are copied before this function returns.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_upload_image(
    client: *const FfiKitchenClient,
    bytes: *const u8,
    len: usize,
    file_name: *const c_char,
    quality: f32,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_upload_image", client, callback, user_data, |api, user_data| {
        if bytes.is_null() {
            return Err(FfiKitchenResult::null_arg("bytes"));
        }
        let Some(file_name) = (unsafe { read_str(file_name) }) else {
            return Err(FfiKitchenResult::null_arg("file_name"));
        };
        let image = unsafe { std::slice::from_raw_parts(bytes, len) }.to_vec();
        api.upload_image_with_callback(image, file_name.to_string(), quality, reply(callback, user_data));
        Ok(())
    });
}

/// Upload `bytes` unchanged as `file_name` with `mime_type`. The bytes are
/// copied before this function returns.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_upload_file(
    client: *const FfiKitchenClient,
    bytes: *const u8,
    len: usize,
    file_name: *const c_char,
    mime_type: *const c_char,
    callback: KitchenCallback,
    user_data: *mut c_void,
) {
    managed("kitchen_upload_file", client, callback, user_data, |api, user_data| {
        if bytes.is_null() {
            return Err(FfiKitchenResult::null_arg("bytes"));
        }
        let (Some(file_name), Some(mime_type)) =
            (unsafe { read_str(file_name) }, unsafe { read_str(mime_type) })
        else {
            return Err(FfiKitchenResult::null_arg("file_name/mime_type"));
        };
        let file = FileUpload {
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            bytes: unsafe { std::slice::from_raw_parts(bytes, len) }.to_vec(),
        };
        api.upload_file_with_callback(file, reply(callback, user_data));
        Ok(())
    });
}

fn parse_fields(fields_json: *const c_char) -> Result<Fields, *mut FfiKitchenResult> {
    let raw = unsafe { read_str(fields_json) }.ok_or_else(|| FfiKitchenResult::null_arg("fields_json"))?;
    serde_json::from_str(raw).map_err(|e| FfiKitchenResult::invalid_arg("fields_json", e))
}

#[unsafe(no_mangle)]
pub extern "C" fn kitchen_is_logged_in(client: *const FfiKitchenClient) -> bool {
    if client.is_null() {
        return false;
    }
    guard(|| unsafe { &*client }.api.is_logged_in()).unwrap_or(false)
}

/// Drop the stored tokens. No request is made.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_logout(client: *const FfiKitchenClient) {
    if !client.is_null() {
        let _ = guard(|| unsafe { &*client }.api.logout());
    }
}

// ---------------------------------------------------------------------------
// Local store
// ---------------------------------------------------------------------------

/// Create a store rooted at `support_dir`. Nothing is opened until
/// `kitchen_store_setup`. Returns null if `support_dir` is null.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_store_new(support_dir: *const c_char) -> *mut FfiKitchenStore {
    guard(|| match unsafe { read_str(support_dir) } {
        Some(dir) => Box::into_raw(Box::new(FfiKitchenStore::new(Store::new(dir)))),
        None => ptr::null_mut(),
    })
    .unwrap_or(ptr::null_mut())
}

/// Open the database file and run migrations. `data_json` is `null` on
/// success.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_store_setup(
    store: *const FfiKitchenStore,
    file_name: *const c_char,
) -> *mut FfiKitchenResult {
    guard(|| {
        if store.is_null() {
            return FfiKitchenResult::null_arg("store");
        }
        let Some(file_name) = (unsafe { read_str(file_name) }) else {
            return FfiKitchenResult::null_arg("file_name");
        };
        FfiKitchenResult::from_store(unsafe { &*store }.store.setup(file_name))
    })
    .unwrap_or_else(|_| FfiKitchenResult::panic("kitchen_store_setup"))
}

#[unsafe(no_mangle)]
pub extern "C" fn kitchen_store_free(store: *mut FfiKitchenStore) {
    if !store.is_null() {
        let _ = guard(|| {
            drop(unsafe { Box::from_raw(store) });
        });
    }
}

/// Save a recipe. `cuisine` may be null. `data_json` is the saved recipe.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_recipe_insert(
    store: *const FfiKitchenStore,
    name: *const c_char,
    cuisine: *const c_char,
) -> *mut FfiKitchenResult {
    guard(|| {
        if store.is_null() {
            return FfiKitchenResult::null_arg("store");
        }
        let Some(name) = (unsafe { read_str(name) }) else {
            return FfiKitchenResult::null_arg("name");
        };
        let recipe = NewRecipe {
            name: name.to_string(),
            cuisine: unsafe { read_str(cuisine) }.map(str::to_string),
        };
        FfiKitchenResult::from_store(unsafe { &*store }.recipes.insert(&recipe))
    })
    .unwrap_or_else(|_| FfiKitchenResult::panic("kitchen_recipe_insert"))
}

/// Every recipe, newest first, as a JSON array.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_recipe_list(store: *const FfiKitchenStore) -> *mut FfiKitchenResult {
    guard(|| {
        if store.is_null() {
            return FfiKitchenResult::null_arg("store");
        }
        FfiKitchenResult::from_store(unsafe { &*store }.recipes.list())
    })
    .unwrap_or_else(|_| FfiKitchenResult::panic("kitchen_recipe_list"))
}

/// `data_json` is `true` if a recipe was deleted, `false` if none matched.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_recipe_delete(store: *const FfiKitchenStore, id: i64) -> *mut FfiKitchenResult {
    guard(|| {
        if store.is_null() {
            return FfiKitchenResult::null_arg("store");
        }
        FfiKitchenResult::from_store(unsafe { &*store }.recipes.delete(id))
    })
    .unwrap_or_else(|_| FfiKitchenResult::panic("kitchen_recipe_delete"))
}

// ---------------------------------------------------------------------------
// Free functions
// ---------------------------------------------------------------------------

/// Free a request returned by `kitchen_build_request`. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_free_request(req: *mut FfiHttpRequest) {
    if !req.is_null() {
        let _ = guard(|| unsafe { FfiHttpRequest::free(req) });
    }
}

/// Free a result. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_free_result(result: *mut FfiKitchenResult) {
    if !result.is_null() {
        let _ = guard(|| unsafe { FfiKitchenResult::free(result) });
    }
}

/// Free a standalone string allocated by this library. Safe to call with null.
#[unsafe(no_mangle)]
pub extern "C" fn kitchen_free_string(s: *mut c_char) {
    let _ = guard(|| free_c_string(s));
}
