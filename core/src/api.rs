//! API facade: every catalog operation in three completion styles.
//!
//! # Design
//! The `async fn` form is the only implementation of each operation. The
//! callback form (`*_with_callback`) spawns that future and hands its result
//! to a closure; the stream form (`*_stream`) spawns it and exposes the result
//! as a one-item `Stream`. Both are generated by `completion_forms!` so no
//! operation logic is duplicated.
//!
//! Blocking HTTP calls run on the runtime's blocking pool, so awaiting an
//! operation never blocks the caller's thread. Every error is reported to the
//! error observer, which logs it and ends the session on `Unauthorized`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::{AbortHandle, Abortable, BoxStream};
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use tokio::runtime::Handle;
use tokio::sync::watch;

use crate::client::KitchenClient;
use crate::config::ClientConfig;
use crate::endpoint::{Endpoint, Fields, FileUpload};
use crate::error::ApiError;
use crate::http::{HttpRequest, HttpResponse};
use crate::media::compress_jpeg;
use crate::session::{JsonFileStore, KeyValueStore, MemoryStore, Session};
use crate::transport::{ActivityObserver, Connector, LoggingObserver, Transport, UreqConnector};
use crate::types::{AuthResponse, Credentials, DataItem, Paginated, Registration, UploadResult, User};

struct Inner {
    client: KitchenClient,
    transport: Transport,
    session: Session,
    activity: Arc<ActivityObserver>,
    config: ClientConfig,
}

/// Entry point for all network operations. Cheap to clone.
#[derive(Clone)]
pub struct KitchenApi {
    inner: Arc<Inner>,
    runtime: Handle,
}

impl KitchenApi {
    /// Build a facade with the production connector. Tokens persist to
    /// `config.session_file` when set, in memory otherwise.
    pub fn new(config: ClientConfig, runtime: Handle) -> Self {
        let store: Arc<dyn KeyValueStore> = match &config.session_file {
            Some(path) => Arc::new(JsonFileStore::open(path)),
            None => Arc::new(MemoryStore::new()),
        };
        let connector = Arc::new(UreqConnector::new(config.timeout()));
        Self::with_connector(config, Session::new(store), connector, runtime)
    }

    pub fn with_connector(
        config: ClientConfig,
        session: Session,
        connector: Arc<dyn Connector>,
        runtime: Handle,
    ) -> Self {
        let activity = Arc::new(ActivityObserver::new());
        let transport = Transport::new(connector, session.clone())
            .with_observer(Arc::new(LoggingObserver::new(config.verbose_logging)))
            .with_observer(activity.clone());
        let inner = Inner {
            client: KitchenClient::new(&config.base_url),
            transport,
            session,
            activity,
            config,
        };
        Self {
            inner: Arc::new(inner),
            runtime,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn session(&self) -> &Session {
        &self.inner.session
    }

    pub fn is_logged_in(&self) -> bool {
        self.inner.session.is_logged_in()
    }

    /// Drop the stored tokens. Purely local; no request is made.
    pub fn logout(&self) {
        self.inner.session.logout();
    }

    /// Busy flag that is `true` while any request is in flight.
    pub fn network_activity(&self) -> watch::Receiver<bool> {
        self.inner.activity.subscribe()
    }

    /// Descriptor for `endpoint` carrying the content-type and auth headers
    /// the transport would attach. For hosts that execute requests
    /// themselves; pair with [`KitchenApi::complete`].
    pub fn prepare(&self, endpoint: &Endpoint) -> Result<HttpRequest, ApiError> {
        match self.inner.client.build(endpoint) {
            Ok(request) => Ok(self.inner.transport.prepare(&request)),
            Err(err) => {
                self.report(endpoint.name(), &err);
                Err(err)
            }
        }
    }

    /// Decode a response the host received for `operation` (an
    /// [`Endpoint::name`]). Errors go through the error observer, so an
    /// `Unauthorized` ends the session here too.
    pub fn complete<T: DeserializeOwned>(
        &self,
        operation: &str,
        response: &HttpResponse,
    ) -> Result<T, ApiError> {
        let result = self.inner.client.parse(response);
        if let Err(err) = &result {
            self.report(operation, err);
        }
        result
    }

    /// [`KitchenApi::complete`] for a login or register response: stores the
    /// returned tokens before handing them back.
    pub fn complete_sign_in(
        &self,
        operation: &str,
        response: &HttpResponse,
    ) -> Result<AuthResponse, ApiError> {
        self.complete(operation, response).map(|auth: AuthResponse| self.signed_in(auth))
    }

    pub async fn login(&self, credentials: Credentials) -> Result<AuthResponse, ApiError> {
        let auth = self.send(Endpoint::Login(credentials)).await?;
        Ok(self.signed_in(auth))
    }

    pub async fn register(&self, registration: Registration) -> Result<AuthResponse, ApiError> {
        let auth = self.send(Endpoint::Register(registration)).await?;
        Ok(self.signed_in(auth))
    }

    pub async fn get_user_info(&self, user_id: i64) -> Result<User, ApiError> {
        self.send(Endpoint::GetUserInfo { user_id }).await
    }

    pub async fn update_user_info(&self, user_id: i64, fields: Fields) -> Result<User, ApiError> {
        self.send(Endpoint::UpdateUserInfo { user_id, fields }).await
    }

    pub async fn fetch_data_list(&self, page: u32, limit: u32) -> Result<Paginated<DataItem>, ApiError> {
        self.send(Endpoint::FetchDataList { page, limit }).await
    }

    pub async fn fetch_data_detail(&self, id: i64) -> Result<DataItem, ApiError> {
        self.send(Endpoint::FetchDataDetail { id }).await
    }

    pub async fn upload_data(&self, fields: Fields) -> Result<DataItem, ApiError> {
        self.send(Endpoint::UploadData { fields }).await
    }

    pub async fn delete_data(&self, id: i64) -> Result<(), ApiError> {
        self.send(Endpoint::DeleteData { id }).await
    }

    /// Re-encode `image` as JPEG at `quality` (0.0–1.0) and upload it.
    /// An image that cannot be re-encoded fails before any request is made.
    pub async fn upload_image(
        &self,
        image: Vec<u8>,
        file_name: String,
        quality: f32,
    ) -> Result<UploadResult, ApiError> {
        let compressed = self
            .runtime
            .spawn_blocking(move || compress_jpeg(&image, quality))
            .await
            .map_err(|e| ApiError::Unknown(e.to_string()))
            .and_then(|result| result);
        let bytes = match compressed {
            Ok(bytes) => bytes,
            Err(err) => {
                self.report("upload_image", &err);
                return Err(err);
            }
        };
        self.send(Endpoint::UploadImage(FileUpload {
            file_name: jpeg_file_name(&file_name),
            mime_type: "image/jpeg".to_string(),
            bytes,
        }))
        .await
    }

    pub async fn upload_file(&self, file: FileUpload) -> Result<UploadResult, ApiError> {
        self.send(Endpoint::UploadFile(file)).await
    }

    async fn send<T: DeserializeOwned>(&self, endpoint: Endpoint) -> Result<T, ApiError> {
        let operation = endpoint.name();
        let result = self.dispatch(endpoint).await;
        if let Err(err) = &result {
            self.report(operation, err);
        }
        result
    }

    async fn dispatch<T: DeserializeOwned>(&self, endpoint: Endpoint) -> Result<T, ApiError> {
        let request = self.inner.client.build(&endpoint)?;
        let inner = Arc::clone(&self.inner);
        let response = self
            .runtime
            .spawn_blocking(move || inner.transport.execute(&request))
            .await
            .map_err(|e| ApiError::Unknown(e.to_string()))??;
        self.inner.client.parse(&response)
    }

    fn signed_in(&self, auth: AuthResponse) -> AuthResponse {
        self.inner.session.store_tokens(&auth.access_token, &auth.refresh_token);
        auth
    }

    /// Error observer shared by every operation.
    fn report(&self, operation: &str, err: &ApiError) {
        tracing::warn!(operation, code = err.code(), error = %err, "api call failed");
        if err.requires_reauth() {
            self.inner.session.invalidate();
        }
    }

    fn deliver<T, F, C>(&self, future: F, completion: C)
    where
        T: Send + 'static,
        F: Future<Output = Result<T, ApiError>> + Send + 'static,
        C: FnOnce(Result<T, ApiError>) + Send + 'static,
    {
        self.runtime.spawn(async move { completion(future.await) });
    }
}

fn jpeg_file_name(file_name: &str) -> String {
    let stem = file_name.rsplit_once('.').map_or(file_name, |(stem, _)| stem);
    let stem = if stem.is_empty() { "image" } else { stem };
    format!("{stem}.jpg")
}

macro_rules! completion_forms {
    ($($op:ident => $callback:ident, $stream:ident ($($arg:ident: $ty:ty),*) -> $out:ty;)*) => {
        impl KitchenApi {
            $(
                #[doc = concat!("Callback form of [`KitchenApi::", stringify!($op), "`]. ")]
                #[doc = "The completion runs exactly once, on a runtime worker thread."]
                pub fn $callback<C>(&self, $($arg: $ty,)* completion: C)
                where
                    C: FnOnce(Result<$out, ApiError>) + Send + 'static,
                {
                    let api = self.clone();
                    self.deliver(async move { api.$op($($arg),*).await }, completion);
                }

                #[doc = concat!("Stream form of [`KitchenApi::", stringify!($op), "`].")]
                pub fn $stream(&self, $($arg: $ty),*) -> ResponseStream<$out> {
                    let api = self.clone();
                    ResponseStream::spawn(&self.runtime, async move { api.$op($($arg),*).await })
                }
            )*
        }
    };
}

completion_forms! {
    login => login_with_callback, login_stream(credentials: Credentials) -> AuthResponse;
    register => register_with_callback, register_stream(registration: Registration) -> AuthResponse;
    get_user_info => get_user_info_with_callback, get_user_info_stream(user_id: i64) -> User;
    update_user_info => update_user_info_with_callback, update_user_info_stream(user_id: i64, fields: Fields) -> User;
    fetch_data_list => fetch_data_list_with_callback, fetch_data_list_stream(page: u32, limit: u32) -> Paginated<DataItem>;
    fetch_data_detail => fetch_data_detail_with_callback, fetch_data_detail_stream(id: i64) -> DataItem;
    upload_data => upload_data_with_callback, upload_data_stream(fields: Fields) -> DataItem;
    delete_data => delete_data_with_callback, delete_data_stream(id: i64) -> ();
    upload_image => upload_image_with_callback, upload_image_stream(image: Vec<u8>, file_name: String, quality: f32) -> UploadResult;
    upload_file => upload_file_with_callback, upload_file_stream(file: FileUpload) -> UploadResult;
}

/// Single-value stream: yields one `Ok` or one `Err`, then ends.
///
/// The call runs on its own task. Aborting the stream stops delivery but
/// lets the call (and its side effects, such as storing tokens) finish.
pub struct ResponseStream<T> {
    inner: Abortable<BoxStream<'static, Result<T, ApiError>>>,
    handle: AbortHandle,
}

impl<T: Send + 'static> ResponseStream<T> {
    fn spawn<F>(runtime: &Handle, future: F) -> Self
    where
        F: Future<Output = Result<T, ApiError>> + Send + 'static,
    {
        let task = runtime.spawn(future);
        let once = futures::stream::once(async move {
            task.await
                .unwrap_or_else(|e| Err(ApiError::Unknown(e.to_string())))
        })
        .boxed();
        let (handle, registration) = AbortHandle::new_pair();
        Self {
            inner: Abortable::new(once, registration),
            handle,
        }
    }
}

impl<T> ResponseStream<T> {
    pub fn abort_handle(&self) -> AbortHandle {
        self.handle.clone()
    }

    /// Suppress delivery of the pending value or error.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_cancelled(&self) -> bool {
        self.handle.is_aborted()
    }
}

impl<T> Stream for ResponseStream<T> {
    type Item = Result<T, ApiError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
