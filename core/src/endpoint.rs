//! The closed set of API operations.
//!
//! Each `Endpoint` variant carries the typed arguments of one operation.
//! `KitchenClient::build` turns a variant into an `HttpRequest`; this module
//! only knows the per-operation rules (method, path, query, body).

use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::http::{HttpMethod, MultipartForm, Part, RequestBody};
use crate::types::{Credentials, Registration};

/// Untyped JSON object accepted by the profile and data upload endpoints.
pub type Fields = Map<String, Value>;

/// A file to send as the single part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Login(Credentials),
    Register(Registration),
    GetUserInfo { user_id: i64 },
    UpdateUserInfo { user_id: i64, fields: Fields },
    FetchDataList { page: u32, limit: u32 },
    FetchDataDetail { id: i64 },
    UploadData { fields: Fields },
    DeleteData { id: i64 },
    UploadImage(FileUpload),
    UploadFile(FileUpload),
}

impl Endpoint {
    /// Short operation name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Endpoint::Login(_) => "login",
            Endpoint::Register(_) => "register",
            Endpoint::GetUserInfo { .. } => "get_user_info",
            Endpoint::UpdateUserInfo { .. } => "update_user_info",
            Endpoint::FetchDataList { .. } => "fetch_data_list",
            Endpoint::FetchDataDetail { .. } => "fetch_data_detail",
            Endpoint::UploadData { .. } => "upload_data",
            Endpoint::DeleteData { .. } => "delete_data",
            Endpoint::UploadImage(_) => "upload_image",
            Endpoint::UploadFile(_) => "upload_file",
        }
    }

    pub fn method(&self) -> HttpMethod {
        match self {
            Endpoint::GetUserInfo { .. }
            | Endpoint::FetchDataList { .. }
            | Endpoint::FetchDataDetail { .. } => HttpMethod::Get,
            Endpoint::UpdateUserInfo { .. } => HttpMethod::Put,
            Endpoint::DeleteData { .. } => HttpMethod::Delete,
            Endpoint::Login(_)
            | Endpoint::Register(_)
            | Endpoint::UploadData { .. }
            | Endpoint::UploadImage(_)
            | Endpoint::UploadFile(_) => HttpMethod::Post,
        }
    }

    /// Path segments appended to the base URL. Each segment is percent-encoded
    /// on its own, so identifiers can never introduce extra path levels.
    pub fn path_segments(&self) -> Vec<String> {
        let segments: &[&str] = match self {
            Endpoint::Login(_) => &["auth", "login"],
            Endpoint::Register(_) => &["auth", "register"],
            Endpoint::GetUserInfo { user_id } | Endpoint::UpdateUserInfo { user_id, .. } => {
                return vec!["users".to_string(), user_id.to_string()];
            }
            Endpoint::FetchDataList { .. } | Endpoint::UploadData { .. } => &["data"],
            Endpoint::FetchDataDetail { id } | Endpoint::DeleteData { id } => {
                return vec!["data".to_string(), id.to_string()];
            }
            Endpoint::UploadImage(_) => &["upload", "image"],
            Endpoint::UploadFile(_) => &["upload", "file"],
        };
        segments.iter().map(|s| s.to_string()).collect()
    }

    pub fn query(&self) -> Vec<(&'static str, String)> {
        match self {
            Endpoint::FetchDataList { page, limit } => {
                vec![("page", page.to_string()), ("limit", limit.to_string())]
            }
            _ => Vec::new(),
        }
    }

    pub fn body(&self) -> Result<Option<RequestBody>, ApiError> {
        let json = match self {
            Endpoint::Login(credentials) => serde_json::to_string(credentials),
            Endpoint::Register(registration) => serde_json::to_string(registration),
            Endpoint::UpdateUserInfo { fields, .. } | Endpoint::UploadData { fields } => {
                serde_json::to_string(fields)
            }
            Endpoint::UploadImage(file) => return Ok(Some(multipart("image", file))),
            Endpoint::UploadFile(file) => return Ok(Some(multipart("file", file))),
            Endpoint::GetUserInfo { .. }
            | Endpoint::FetchDataList { .. }
            | Endpoint::FetchDataDetail { .. }
            | Endpoint::DeleteData { .. } => return Ok(None),
        };
        json.map(|body| Some(RequestBody::Json(body)))
            .map_err(|e| ApiError::Encoding(e.to_string()))
    }
}

fn multipart(name: &str, file: &FileUpload) -> RequestBody {
    RequestBody::Multipart(MultipartForm::new().with_part(Part {
        name: name.to_string(),
        file_name: file.file_name.clone(),
        mime_type: file.mime_type.clone(),
        bytes: file.bytes.clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload() -> FileUpload {
        FileUpload {
            file_name: "menu.pdf".to_string(),
            mime_type: "application/pdf".to_string(),
            bytes: vec![1, 2, 3],
        }
    }

    #[test]
    fn methods_follow_operation_class() {
        let creds = Credentials {
            username: "chef".to_string(),
            password: "secret".to_string(),
        };
        assert_eq!(Endpoint::Login(creds).method(), HttpMethod::Post);
        assert_eq!(Endpoint::GetUserInfo { user_id: 1 }.method(), HttpMethod::Get);
        assert_eq!(
            Endpoint::UpdateUserInfo { user_id: 1, fields: Fields::new() }.method(),
            HttpMethod::Put
        );
        assert_eq!(Endpoint::DeleteData { id: 1 }.method(), HttpMethod::Delete);
        assert_eq!(Endpoint::UploadFile(upload()).method(), HttpMethod::Post);
    }

    #[test]
    fn only_list_has_query() {
        let list = Endpoint::FetchDataList { page: 2, limit: 50 };
        assert_eq!(
            list.query(),
            vec![("page", "2".to_string()), ("limit", "50".to_string())]
        );
        assert!(Endpoint::FetchDataDetail { id: 2 }.query().is_empty());
    }

    #[test]
    fn bodiless_operations() {
        assert_eq!(Endpoint::DeleteData { id: 3 }.body().unwrap(), None);
        assert_eq!(Endpoint::FetchDataList { page: 1, limit: 20 }.body().unwrap(), None);
    }

    #[test]
    fn uploads_use_named_part() {
        let body = Endpoint::UploadFile(upload()).body().unwrap().unwrap();
        let RequestBody::Multipart(form) = body else {
            panic!("expected multipart body");
        };
        assert_eq!(form.parts().len(), 1);
        assert_eq!(form.parts()[0].name, "file");
        assert_eq!(form.parts()[0].file_name, "menu.pdf");
    }

    #[test]
    fn path_ids_are_separate_segments() {
        assert_eq!(
            Endpoint::FetchDataDetail { id: 42 }.path_segments(),
            vec!["data".to_string(), "42".to_string()]
        );
    }
}
