//! Stateless request builder and response parser for the kitchen API.
//!
//! # Design
//! `KitchenClient` holds only a `base_url` and carries no mutable state
//! between calls. `build` turns an `Endpoint` into an `HttpRequest` and
//! `parse` turns an `HttpResponse` into a typed value. Neither touches the
//! network: the transport (or an FFI host) performs the round-trip in
//! between.

use serde::de::DeserializeOwned;
use url::Url;

use crate::endpoint::Endpoint;
use crate::envelope::{classify_http_status, decode};
use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse};

/// Synchronous, stateless client for the kitchen API.
#[derive(Debug, Clone)]
pub struct KitchenClient {
    base_url: String,
}

impl KitchenClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the request descriptor for `endpoint`.
    ///
    /// Fails with `InvalidUrl` when the base URL is not an absolute http(s)
    /// URL and with `Encoding` when the JSON payload cannot be serialized.
    pub fn build(&self, endpoint: &Endpoint) -> Result<HttpRequest, ApiError> {
        let mut url = Url::parse(&self.base_url).map_err(|_| ApiError::InvalidUrl)?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ApiError::InvalidUrl);
        }
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl)?
            .pop_if_empty()
            .extend(endpoint.path_segments());

        let query = endpoint.query();
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }

        Ok(HttpRequest {
            method: endpoint.method(),
            url: url.into(),
            headers: vec![("accept".to_string(), "application/json".to_string())],
            body: endpoint.body()?,
        })
    }

    /// Parse a response into `T`, classifying non-2xx statuses first.
    pub fn parse<T: DeserializeOwned>(&self, response: &HttpResponse) -> Result<T, ApiError> {
        if !response.is_success() {
            return Err(classify_http_status(response.status, &response.body));
        }
        decode(&response.body, response.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Fields, FileUpload};
    use crate::http::{HttpMethod, RequestBody};
    use crate::types::{Credentials, DataItem, Paginated};

    fn client() -> KitchenClient {
        KitchenClient::new("http://localhost:3000")
    }

    fn response(status: u16, body: &str) -> HttpResponse {
        HttpResponse {
            status,
            headers: Vec::new(),
            body: body.to_string(),
        }
    }

    #[test]
    fn build_login_produces_json_post() {
        let req = client()
            .build(&Endpoint::Login(Credentials {
                username: "chef".to_string(),
                password: "secret".to_string(),
            }))
            .unwrap();
        assert_eq!(req.method, HttpMethod::Post);
        assert_eq!(req.url, "http://localhost:3000/auth/login");
        let Some(RequestBody::Json(body)) = req.body else {
            panic!("expected json body");
        };
        let body: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["username"], "chef");
        assert_eq!(body["password"], "secret");
    }

    #[test]
    fn build_list_puts_paging_in_query() {
        let req = client()
            .build(&Endpoint::FetchDataList { page: 1, limit: 20 })
            .unwrap();
        assert_eq!(req.method, HttpMethod::Get);
        assert_eq!(req.url, "http://localhost:3000/data?page=1&limit=20");
        assert!(req.body.is_none());
    }

    #[test]
    fn build_keeps_base_path_prefix() {
        let client = KitchenClient::new("https://api.example.com/v1/");
        let req = client.build(&Endpoint::DeleteData { id: 9 }).unwrap();
        assert_eq!(req.url, "https://api.example.com/v1/data/9");
        assert_eq!(req.method, HttpMethod::Delete);
    }

    #[test]
    fn build_update_user_sends_untyped_fields() {
        let mut fields = Fields::new();
        fields.insert("avatar".to_string(), serde_json::json!("a.png"));
        let req = client()
            .build(&Endpoint::UpdateUserInfo { user_id: 5, fields })
            .unwrap();
        assert_eq!(req.method, HttpMethod::Put);
        assert_eq!(req.url, "http://localhost:3000/users/5");
        assert_eq!(
            req.body,
            Some(RequestBody::Json(r#"{"avatar":"a.png"}"#.to_string()))
        );
    }

    #[test]
    fn build_upload_image_is_multipart() {
        let req = client()
            .build(&Endpoint::UploadImage(FileUpload {
                file_name: "cake.jpg".to_string(),
                mime_type: "image/jpeg".to_string(),
                bytes: vec![0xff, 0xd8],
            }))
            .unwrap();
        assert_eq!(req.url, "http://localhost:3000/upload/image");
        assert!(matches!(req.body, Some(RequestBody::Multipart(_))));
    }

    #[test]
    fn invalid_base_url() {
        let err = KitchenClient::new("not a url")
            .build(&Endpoint::FetchDataDetail { id: 1 })
            .unwrap_err();
        assert_eq!(err, ApiError::InvalidUrl);
        let err = KitchenClient::new("ftp://files.example.com")
            .build(&Endpoint::FetchDataDetail { id: 1 })
            .unwrap_err();
        assert_eq!(err, ApiError::InvalidUrl);
    }

    #[test]
    fn parse_classifies_status_before_decoding() {
        let err = client()
            .parse::<DataItem>(&response(404, r#"{"success":false,"message":"gone"}"#))
            .unwrap_err();
        assert_eq!(err, ApiError::NotFound);
        let err = client().parse::<DataItem>(&response(401, "")).unwrap_err();
        assert_eq!(err, ApiError::Unauthorized);
    }

    #[test]
    fn parse_empty_page() {
        let page: Paginated<DataItem> = client()
            .parse(&response(
                200,
                r#"{"success":true,"data":{"items":[],"total":0,"page":1,"limit":20}}"#,
            ))
            .unwrap();
        assert!(page.items.is_empty());
        assert_eq!(page.total, 0);
    }

    #[test]
    fn trailing_slash_is_stripped() {
        let client = KitchenClient::new("http://localhost:3000/");
        assert_eq!(client.base_url(), "http://localhost:3000");
        let req = client.build(&Endpoint::FetchDataDetail { id: 3 }).unwrap();
        assert_eq!(req.url, "http://localhost:3000/data/3");
    }
}
