//! Verify `build` and `parse` against JSON test vectors stored in `test-vectors/`.
//!
//! Request vectors describe an operation and the descriptor it must produce;
//! response vectors describe a simulated response and the value or error code
//! it must parse to. Comparing parsed JSON (not raw strings) avoids false
//! negatives from field-ordering differences.

use kitchen_core::{
    ApiError, Credentials, DataItem, Endpoint, FileUpload, HttpMethod, HttpResponse, KitchenClient,
    Paginated, Registration, RequestBody, User,
};
use serde_json::Value;

fn parse_method(s: &str) -> HttpMethod {
    match s {
        "GET" => HttpMethod::Get,
        "POST" => HttpMethod::Post,
        "PUT" => HttpMethod::Put,
        "DELETE" => HttpMethod::Delete,
        other => panic!("unknown method: {other}"),
    }
}

fn endpoint(operation: &str, args: &Value) -> Endpoint {
    let int = |key: &str| args[key].as_i64().unwrap();
    let upload = || FileUpload {
        file_name: args["file_name"].as_str().unwrap().to_string(),
        mime_type: args["mime_type"].as_str().unwrap().to_string(),
        bytes: vec![0xff, 0xd8, 0x00],
    };
    let fields = || args["fields"].as_object().unwrap().clone();
    match operation {
        "login" => Endpoint::Login(serde_json::from_value::<Credentials>(args.clone()).unwrap()),
        "register" => {
            Endpoint::Register(serde_json::from_value::<Registration>(args.clone()).unwrap())
        }
        "get_user_info" => Endpoint::GetUserInfo { user_id: int("user_id") },
        "update_user_info" => Endpoint::UpdateUserInfo {
            user_id: int("user_id"),
            fields: fields(),
        },
        "fetch_data_list" => Endpoint::FetchDataList {
            page: int("page") as u32,
            limit: int("limit") as u32,
        },
        "fetch_data_detail" => Endpoint::FetchDataDetail { id: int("id") },
        "upload_data" => Endpoint::UploadData { fields: fields() },
        "delete_data" => Endpoint::DeleteData { id: int("id") },
        "upload_image" => Endpoint::UploadImage(upload()),
        "upload_file" => Endpoint::UploadFile(upload()),
        other => panic!("unknown operation: {other}"),
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

#[test]
fn request_vectors() {
    let raw = include_str!("../../test-vectors/requests.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let base_url = vectors["base_url"].as_str().unwrap();
    let client = KitchenClient::new(base_url);

    let cases = vectors["cases"].as_array().unwrap();
    assert_eq!(cases.len(), 10, "one vector per catalog operation");

    for case in cases {
        let name = case["name"].as_str().unwrap();
        let operation = case["operation"].as_str().unwrap();
        let expected = &case["expected_request"];

        let endpoint = endpoint(operation, &case["args"]);
        assert_eq!(endpoint.name(), operation, "{name}: name");
        let req = client.build(&endpoint).unwrap();

        assert_eq!(req.method, parse_method(expected["method"].as_str().unwrap()), "{name}: method");
        assert_eq!(req.url, format!("{base_url}{}", expected["url"].as_str().unwrap()), "{name}: url");

        let expected_headers: Vec<(String, String)> =
            serde_json::from_value(expected["headers"].clone()).unwrap();
        assert_eq!(req.headers, expected_headers, "{name}: headers");

        match (&req.body, expected.get("multipart_part")) {
            (Some(RequestBody::Multipart(form)), Some(part)) => {
                assert_eq!(form.parts().len(), 1, "{name}: part count");
                assert_eq!(form.parts()[0].name, part.as_str().unwrap(), "{name}: part name");
                assert_eq!(form.parts()[0].file_name, case["args"]["file_name"], "{name}: file name");
            }
            (Some(RequestBody::Json(json)), None) => {
                let body: Value = serde_json::from_str(json).unwrap();
                assert_eq!(body, expected["body"], "{name}: body");
            }
            (None, None) => assert!(expected["body"].is_null(), "{name}: body"),
            (body, _) => panic!("{name}: unexpected body {body:?}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn response(case: &Value) -> HttpResponse {
    let body = match &case["response"]["body"] {
        Value::String(raw) => raw.clone(),
        json => json.to_string(),
    };
    HttpResponse {
        status: case["response"]["status"].as_u64().unwrap() as u16,
        headers: Vec::new(),
        body,
    }
}

fn parse_as(client: &KitchenClient, target: &str, resp: &HttpResponse) -> Result<Value, ApiError> {
    fn to_json<T: serde::Serialize>(result: Result<T, ApiError>) -> Result<Value, ApiError> {
        result.map(|value| serde_json::to_value(value).unwrap())
    }
    match target {
        "data_item" => to_json(client.parse::<DataItem>(resp)),
        "page" => to_json(client.parse::<Paginated<DataItem>>(resp)),
        "user" => to_json(client.parse::<User>(resp)),
        "unit" => to_json(client.parse::<()>(resp)),
        other => panic!("unknown target: {other}"),
    }
}

#[test]
fn response_vectors() {
    let raw = include_str!("../../test-vectors/responses.json");
    let vectors: Value = serde_json::from_str(raw).unwrap();
    let client = KitchenClient::new("http://localhost:3000");

    for case in vectors["cases"].as_array().unwrap() {
        let name = case["name"].as_str().unwrap();
        let expected = &case["expected"];
        let result = parse_as(&client, case["target"].as_str().unwrap(), &response(case));

        if let Some(ok) = expected.get("ok") {
            assert_eq!(result.as_ref().unwrap(), ok, "{name}: value");
            continue;
        }

        let err = result.unwrap_err();
        assert_eq!(
            i64::from(err.code()),
            expected["error_code"].as_i64().unwrap(),
            "{name}: error code ({err})"
        );
        if let Some(server_code) = expected.get("server_code") {
            let ApiError::Server { code, message } = &err else {
                panic!("{name}: expected a server error, got {err:?}");
            };
            assert_eq!(*code, server_code.as_i64().unwrap(), "{name}: server code");
            assert_eq!(message.as_deref(), expected["message"].as_str(), "{name}: message");
        }
    }
}
