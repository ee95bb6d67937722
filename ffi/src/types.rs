//! `#[repr(C)]` types for the FFI boundary.
//!
//! # Design
//! Requests cross the boundary as plain data (`FfiHttpRequest`); results
//! cross as `FfiKitchenResult`, a numeric error code plus either an error
//! message or the payload serialized as JSON. Handing payloads over as JSON
//! keeps the C surface fixed while the DTOs evolve. Conversion helpers live
//! here to keep `lib.rs` focused on the `extern "C"` surface.

use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::ptr;
use std::sync::Arc;

use kitchen_core::{
    ApiError, Credentials, Endpoint, Fields, HttpMethod, KitchenApi, RecipeRepository, Registration,
    Store, StoreError,
};
use serde::Deserialize;
use serde::Serialize;
use tokio::runtime::Runtime;

/// Error code for a null pointer argument.
pub const KITCHEN_ERR_NULL_ARG: i32 = 2000;
/// Error code for a panic caught at the boundary.
pub const KITCHEN_ERR_PANIC: i32 = 2001;
/// Error code for an argument that is not valid UTF-8 or valid JSON.
pub const KITCHEN_ERR_INVALID_ARG: i32 = 2002;

/// Opaque handle owning a runtime and the API facade. C callers receive a
/// pointer to this and pass it back into every client function.
pub struct FfiKitchenClient {
    pub(crate) runtime: Runtime,
    pub(crate) api: KitchenApi,
}

/// Opaque handle to the local store.
pub struct FfiKitchenStore {
    pub(crate) store: Arc<Store>,
    pub(crate) recipes: RecipeRepository,
}

impl FfiKitchenStore {
    pub(crate) fn new(store: Store) -> Self {
        let store = Arc::new(store);
        Self {
            recipes: RecipeRepository::new(Arc::clone(&store)),
            store,
        }
    }
}

// ---------------------------------------------------------------------------
// Strings
// ---------------------------------------------------------------------------

/// Borrow a C string as `&str`. `None` for null or invalid UTF-8.
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn read_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }.to_str().ok()
}

/// Hand a string to C. Interior NULs are dropped.
pub(crate) fn to_c_string(s: impl Into<String>) -> *mut c_char {
    let mut bytes = s.into().into_bytes();
    bytes.retain(|b| *b != 0);
    CString::new(bytes).map_or(ptr::null_mut(), CString::into_raw)
}

// ---------------------------------------------------------------------------
// Request descriptors
// ---------------------------------------------------------------------------

/// HTTP method as a C enum.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FfiHttpMethod {
    Get = 0,
    Post = 1,
    Put = 2,
    Delete = 3,
}

impl From<HttpMethod> for FfiHttpMethod {
    fn from(m: HttpMethod) -> Self {
        match m {
            HttpMethod::Get => FfiHttpMethod::Get,
            HttpMethod::Post => FfiHttpMethod::Post,
            HttpMethod::Put => FfiHttpMethod::Put,
            HttpMethod::Delete => FfiHttpMethod::Delete,
        }
    }
}

#[repr(C)]
pub struct FfiHeader {
    pub key: *mut c_char,
    pub value: *mut c_char,
}

/// An HTTP request described as C-compatible plain data.
///
/// Built by `kitchen_build_request`. The host executes it and feeds the
/// outcome back through `kitchen_parse_response`. `headers` already holds
/// the content type and, when logged in, the bearer token. `content_type`
/// repeats the body's type and is null when there is no body.
#[repr(C)]
pub struct FfiHttpRequest {
    pub method: FfiHttpMethod,
    pub url: *mut c_char,
    pub headers: *mut FfiHeader,
    pub headers_len: usize,
    pub content_type: *mut c_char,
    pub body: *mut u8,
    pub body_len: usize,
}

impl FfiHttpRequest {
    pub(crate) fn from_core(req: kitchen_core::HttpRequest) -> *mut Self {
        let (content_type, body, body_len) = match &req.body {
            Some(body) => {
                let bytes = body.to_bytes().into_boxed_slice();
                let len = bytes.len();
                (
                    to_c_string(body.content_type()),
                    Box::into_raw(bytes) as *mut u8,
                    len,
                )
            }
            None => (ptr::null_mut(), ptr::null_mut(), 0),
        };

        let headers: Box<[FfiHeader]> = req
            .headers
            .into_iter()
            .map(|(k, v)| FfiHeader {
                key: to_c_string(k),
                value: to_c_string(v),
            })
            .collect();
        let headers_len = headers.len();

        Box::into_raw(Box::new(FfiHttpRequest {
            method: req.method.into(),
            url: to_c_string(req.url),
            headers: Box::into_raw(headers) as *mut FfiHeader,
            headers_len,
            content_type,
            body,
            body_len,
        }))
    }

    /// # Safety
    /// `req` must come from `from_core` and not have been freed.
    pub(crate) unsafe fn free(req: *mut Self) {
        let req = unsafe { Box::from_raw(req) };
        free_c_string(req.url);
        free_c_string(req.content_type);
        let headers = unsafe {
            Box::from_raw(ptr::slice_from_raw_parts_mut(req.headers, req.headers_len))
        };
        for header in headers.iter() {
            free_c_string(header.key);
            free_c_string(header.value);
        }
        if !req.body.is_null() {
            drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(req.body, req.body_len)) });
        }
    }
}

pub(crate) fn free_c_string(s: *mut c_char) {
    if !s.is_null() {
        drop(unsafe { CString::from_raw(s) });
    }
}

/// An HTTP response the host received. Read, never freed, by this crate.
#[repr(C)]
pub struct FfiHttpResponse {
    pub status: u16,
    pub body: *const c_char,
}

/// A JSON-encoded call for `kitchen_build_request`, for example
/// `{"operation":"fetch_data_list","args":{"page":1,"limit":20}}`.
///
/// Uploads carry raw bytes and are only available through the managed
/// `kitchen_upload_*` functions.
#[derive(Debug, Deserialize)]
#[serde(tag = "operation", content = "args", rename_all = "snake_case")]
pub enum FfiCall {
    Login(Credentials),
    Register(Registration),
    GetUserInfo { user_id: i64 },
    UpdateUserInfo { user_id: i64, fields: Fields },
    FetchDataList { page: u32, limit: u32 },
    FetchDataDetail { id: i64 },
    UploadData { fields: Fields },
    DeleteData { id: i64 },
}

impl From<FfiCall> for Endpoint {
    fn from(call: FfiCall) -> Self {
        match call {
            FfiCall::Login(credentials) => Endpoint::Login(credentials),
            FfiCall::Register(registration) => Endpoint::Register(registration),
            FfiCall::GetUserInfo { user_id } => Endpoint::GetUserInfo { user_id },
            FfiCall::UpdateUserInfo { user_id, fields } => Endpoint::UpdateUserInfo { user_id, fields },
            FfiCall::FetchDataList { page, limit } => Endpoint::FetchDataList { page, limit },
            FfiCall::FetchDataDetail { id } => Endpoint::FetchDataDetail { id },
            FfiCall::UploadData { fields } => Endpoint::UploadData { fields },
            FfiCall::DeleteData { id } => Endpoint::DeleteData { id },
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Result of every fallible call.
///
/// On success `error_code` is 0, `error_message` is null and `data_json`
/// holds the payload as JSON (`null` for operations without one). On failure
/// `error_code` is the core error code (1000–1099 for network errors,
/// 3000–3003 for store errors, 2000–2002 for boundary errors),
/// `error_message` is human-readable and `data_json` is null.
#[repr(C)]
pub struct FfiKitchenResult {
    pub error_code: i32,
    pub error_message: *mut c_char,
    pub data_json: *mut c_char,
}

impl FfiKitchenResult {
    fn boxed(error_code: i32, error_message: *mut c_char, data_json: *mut c_char) -> *mut Self {
        Box::into_raw(Box::new(FfiKitchenResult {
            error_code,
            error_message,
            data_json,
        }))
    }

    pub(crate) fn ok<T: Serialize>(value: &T) -> *mut Self {
        match serde_json::to_string(value) {
            Ok(json) => Self::boxed(0, ptr::null_mut(), to_c_string(json)),
            Err(e) => Self::error(ApiError::Encoding(e.to_string()).code(), e.to_string()),
        }
    }

    pub(crate) fn error(code: i32, message: impl Into<String>) -> *mut Self {
        Self::boxed(code, to_c_string(message), ptr::null_mut())
    }

    pub(crate) fn from_api<T: Serialize>(result: Result<T, ApiError>) -> *mut Self {
        match result {
            Ok(value) => Self::ok(&value),
            Err(err) => Self::error(err.code(), err.to_string()),
        }
    }

    pub(crate) fn from_store<T: Serialize>(result: Result<T, StoreError>) -> *mut Self {
        match result {
            Ok(value) => Self::ok(&value),
            Err(err) => Self::error(err.code(), err.to_string()),
        }
    }

    pub(crate) fn null_arg(name: &str) -> *mut Self {
        Self::error(KITCHEN_ERR_NULL_ARG, format!("null argument: {name}"))
    }

    pub(crate) fn invalid_arg(name: &str, reason: impl std::fmt::Display) -> *mut Self {
        Self::error(KITCHEN_ERR_INVALID_ARG, format!("invalid argument {name}: {reason}"))
    }

    pub(crate) fn panic(function: &str) -> *mut Self {
        Self::error(KITCHEN_ERR_PANIC, format!("panic in {function}"))
    }

    /// # Safety
    /// `result` must come from this module and not have been freed.
    pub(crate) unsafe fn free(result: *mut Self) {
        let result = unsafe { Box::from_raw(result) };
        free_c_string(result.error_message);
        free_c_string(result.data_json);
    }
}
