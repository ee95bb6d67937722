use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    extract::{Multipart, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Date format used on the wire: UTC with microseconds and a literal `Z`.
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Account every fresh server starts with.
pub const SEED_USERNAME: &str = "chef";
pub const SEED_PASSWORD: &str = "secret";

/// Envelope code for a request the server understood but refused.
pub const VALIDATION_FAILED: i64 = 4001;

const DEFAULT_PAGE_LIMIT: u32 = 20;
const MAX_PAGE_LIMIT: u32 = 100;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            message: None,
            code: None,
            data: Some(data),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AuthPayload {
    pub access_token: String,
    pub refresh_token: String,
    pub user: User,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DataItem {
    pub id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Upload {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub size: usize,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

struct Account {
    user: User,
    password: String,
}

/// In-memory state behind the routes.
pub struct Kitchen {
    accounts: HashMap<i64, Account>,
    items: BTreeMap<i64, DataItem>,
    /// Access token to user id.
    tokens: HashMap<String, i64>,
    next_user_id: i64,
    next_item_id: i64,
}

impl Kitchen {
    /// State holding only the seed account.
    pub fn seeded() -> Self {
        let mut kitchen = Self {
            accounts: HashMap::new(),
            items: BTreeMap::new(),
            tokens: HashMap::new(),
            next_user_id: 1,
            next_item_id: 1,
        };
        kitchen.create_account(SEED_USERNAME, Some("chef@kitchen.test".into()), SEED_PASSWORD);
        kitchen
    }

    fn create_account(&mut self, username: &str, email: Option<String>, password: &str) -> User {
        let user = User {
            id: self.next_user_id,
            username: username.to_string(),
            email,
            avatar: None,
            created_at: now(),
        };
        self.next_user_id += 1;
        self.accounts.insert(
            user.id,
            Account {
                user: user.clone(),
                password: password.to_string(),
            },
        );
        user
    }

    fn issue_tokens(&mut self, user: User) -> AuthPayload {
        let access_token = format!("access-{}", Uuid::new_v4().simple());
        self.tokens.insert(access_token.clone(), user.id);
        AuthPayload {
            access_token,
            refresh_token: format!("refresh-{}", Uuid::new_v4().simple()),
            user,
        }
    }
}

pub type Db = Arc<RwLock<Kitchen>>;

/// An enveloped error response.
#[derive(Debug)]
pub struct Failure {
    status: StatusCode,
    code: i64,
    message: String,
}

impl Failure {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            code: i64::from(status.as_u16()),
            message: message.into(),
        }
    }

    /// Refusal delivered with HTTP 200 and `success: false`.
    fn validation(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            code: VALIDATION_FAILED,
            message: message.into(),
        }
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "missing or invalid access token")
    }

    fn not_found(what: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("{what} not found"))
    }
}

impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        tracing::debug!(status = %self.status, code = self.code, message = %self.message, "request refused");
        let body = Envelope::<()> {
            success: false,
            message: Some(self.message),
            code: Some(self.code),
            data: None,
        };
        (self.status, Json(body)).into_response()
    }
}

type Reply<T> = Result<Json<Envelope<T>>, Failure>;

pub fn app() -> Router {
    let db: Db = Arc::new(RwLock::new(Kitchen::seeded()));
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/register", post(register))
        .route("/users/{id}", get(get_user).put(update_user))
        .route("/data", get(list_data).post(create_data))
        .route("/data/{id}", get(get_data).delete(delete_data))
        .route("/upload/image", post(upload_image))
        .route("/upload/file", post(upload_file))
        .with_state(db)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    axum::serve(listener, app()).await
}

fn now() -> String {
    chrono::Utc::now().format(DATE_FORMAT).to_string()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

/// User id owning the request's access token.
fn authorize(kitchen: &Kitchen, headers: &HeaderMap) -> Result<i64, Failure> {
    bearer(headers)
        .and_then(|token| kitchen.tokens.get(token).copied())
        .ok_or_else(Failure::unauthorized)
}

async fn login(State(db): State<Db>, Json(input): Json<LoginRequest>) -> Reply<AuthPayload> {
    let mut kitchen = db.write().await;
    let user = kitchen
        .accounts
        .values()
        .find(|account| account.user.username == input.username && account.password == input.password)
        .map(|account| account.user.clone())
        .ok_or_else(|| Failure::new(StatusCode::UNAUTHORIZED, "invalid username or password"))?;
    tracing::info!(user_id = user.id, "login");
    Ok(Json(Envelope::ok(kitchen.issue_tokens(user))))
}

async fn register(
    State(db): State<Db>,
    Json(input): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<Envelope<AuthPayload>>), Failure> {
    let mut kitchen = db.write().await;
    if kitchen
        .accounts
        .values()
        .any(|account| account.user.username == input.username)
    {
        return Err(Failure::new(StatusCode::CONFLICT, "username already taken"));
    }
    let user = kitchen.create_account(&input.username, Some(input.email), &input.password);
    tracing::info!(user_id = user.id, "registered");
    Ok((StatusCode::CREATED, Json(Envelope::ok(kitchen.issue_tokens(user)))))
}

async fn get_user(State(db): State<Db>, headers: HeaderMap, Path(id): Path<i64>) -> Reply<User> {
    let kitchen = db.read().await;
    authorize(&kitchen, &headers)?;
    kitchen
        .accounts
        .get(&id)
        .map(|account| Json(Envelope::ok(account.user.clone())))
        .ok_or_else(|| Failure::not_found("user"))
}

async fn update_user(
    State(db): State<Db>,
    headers: HeaderMap,
    Path(id): Path<i64>,
    Json(fields): Json<Map<String, Value>>,
) -> Reply<User> {
    let mut kitchen = db.write().await;
    let caller = authorize(&kitchen, &headers)?;
    let account = kitchen
        .accounts
        .get_mut(&id)
        .ok_or_else(|| Failure::not_found("user"))?;
    if caller != id {
        return Err(Failure::new(StatusCode::FORBIDDEN, "cannot edit another user"));
    }
    for (key, value) in fields {
        match (key.as_str(), value) {
            ("username", Value::String(username)) => account.user.username = username,
            ("email", Value::String(email)) => account.user.email = Some(email),
            ("avatar", Value::String(avatar)) => account.user.avatar = Some(avatar),
            ("email", Value::Null) => account.user.email = None,
            ("avatar", Value::Null) => account.user.avatar = None,
            // Unknown or mistyped fields are ignored.
            _ => {}
        }
    }
    Ok(Json(Envelope::ok(account.user.clone())))
}

async fn list_data(State(db): State<Db>, Query(query): Query<PageQuery>) -> Reply<Page<DataItem>> {
    let page = query.page.unwrap_or(1).max(1);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_PAGE_LIMIT)
        .clamp(1, MAX_PAGE_LIMIT);
    let kitchen = db.read().await;
    let items = kitchen
        .items
        .values()
        .skip((page - 1).saturating_mul(limit) as usize)
        .take(limit as usize)
        .cloned()
        .collect();
    Ok(Json(Envelope::ok(Page {
        items,
        total: kitchen.items.len() as u64,
        page,
        limit,
    })))
}

fn optional_string(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields.get(key).and_then(Value::as_str).map(str::to_string)
}

async fn create_data(
    State(db): State<Db>,
    Json(fields): Json<Map<String, Value>>,
) -> Result<(StatusCode, Json<Envelope<DataItem>>), Failure> {
    let title = optional_string(&fields, "title")
        .filter(|title| !title.trim().is_empty())
        .ok_or_else(|| Failure::validation("title is required"))?;
    let mut kitchen = db.write().await;
    let item = DataItem {
        id: kitchen.next_item_id,
        title,
        content: optional_string(&fields, "content"),
        image_url: optional_string(&fields, "image_url"),
        created_at: now(),
    };
    kitchen.next_item_id += 1;
    kitchen.items.insert(item.id, item.clone());
    Ok((StatusCode::CREATED, Json(Envelope::ok(item))))
}

async fn get_data(State(db): State<Db>, Path(id): Path<i64>) -> Reply<DataItem> {
    let kitchen = db.read().await;
    kitchen
        .items
        .get(&id)
        .map(|item| Json(Envelope::ok(item.clone())))
        .ok_or_else(|| Failure::not_found("item"))
}

async fn delete_data(State(db): State<Db>, Path(id): Path<i64>) -> Reply<()> {
    let mut kitchen = db.write().await;
    kitchen
        .items
        .remove(&id)
        .ok_or_else(|| Failure::not_found("item"))?;
    Ok(Json(Envelope {
        success: true,
        message: Some("deleted".to_string()),
        code: None,
        data: None,
    }))
}

/// File name and bytes of the multipart part called `name`.
async fn read_part(
    mut multipart: Multipart,
    name: &str,
) -> Result<(Option<String>, Vec<u8>), Failure> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| Failure::new(StatusCode::BAD_REQUEST, e.body_text()))?
    {
        if field.name() != Some(name) {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| Failure::new(StatusCode::BAD_REQUEST, e.body_text()))?;
        return Ok((file_name, bytes.to_vec()));
    }
    Err(Failure::new(
        StatusCode::BAD_REQUEST,
        format!("missing multipart part `{name}`"),
    ))
}

fn stored_upload(file_name: Option<String>, size: usize) -> Upload {
    let extension = file_name
        .as_deref()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| format!(".{ext}"))
        .unwrap_or_default();
    Upload {
        url: format!("/files/{}{extension}", Uuid::new_v4().simple()),
        file_name,
        size,
    }
}

async fn upload_image(State(db): State<Db>, headers: HeaderMap, multipart: Multipart) -> Reply<Upload> {
    authorize(&*db.read().await, &headers)?;
    let (file_name, bytes) = read_part(multipart, "image").await?;
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return Err(Failure::new(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected a JPEG image",
        ));
    }
    Ok(Json(Envelope::ok(stored_upload(file_name, bytes.len()))))
}

async fn upload_file(State(db): State<Db>, headers: HeaderMap, multipart: Multipart) -> Reply<Upload> {
    authorize(&*db.read().await, &headers)?;
    let (file_name, bytes) = read_part(multipart, "file").await?;
    Ok(Json(Envelope::ok(stored_upload(file_name, bytes.len()))))
}
