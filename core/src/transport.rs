//! Transport adapter: executes request descriptors over HTTP.
//!
//! # Design
//! `Connector` is the seam to the HTTP library. `UreqConnector` is the
//! production implementation; tests substitute their own. `Transport` wraps
//! a connector with the cross-cutting steps every call shares: content and
//! auth headers, observer notification, and classification of failures into
//! `ApiError`. Calls are blocking; the facade moves them onto tokio's
//! blocking pool.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::envelope::{classify_http_status, classify_transport_failure};
use crate::error::ApiError;
use crate::http::{FailureKind, HttpMethod, HttpRequest, HttpResponse, RequestBody, TransportFailure};
use crate::session::Session;

/// Executes one HTTP round-trip. Non-2xx statuses are returned as data.
pub trait Connector: Send + Sync {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportFailure>;
}

/// `Connector` backed by a single long-lived `ureq::Agent`.
pub struct UreqConnector {
    agent: ureq::Agent,
}

impl UreqConnector {
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Connector for UreqConnector {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportFailure> {
        let body = request.body.as_ref().map(RequestBody::to_bytes);
        let headers = &request.headers;

        let result = match (request.method, body) {
            (HttpMethod::Get, _) => with_headers(self.agent.get(request.url.as_str()), headers).call(),
            (HttpMethod::Delete, _) => with_headers(self.agent.delete(request.url.as_str()), headers).call(),
            (HttpMethod::Post, Some(body)) => {
                with_headers(self.agent.post(request.url.as_str()), headers).send(&body[..])
            }
            (HttpMethod::Post, None) => with_headers(self.agent.post(request.url.as_str()), headers).send_empty(),
            (HttpMethod::Put, Some(body)) => {
                with_headers(self.agent.put(request.url.as_str()), headers).send(&body[..])
            }
            (HttpMethod::Put, None) => with_headers(self.agent.put(request.url.as_str()), headers).send_empty(),
        };
        let mut response = result.map_err(map_ureq_error)?;

        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response.body_mut().read_to_string().map_err(map_ureq_error)?;

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

fn with_headers<B>(
    mut builder: ureq::RequestBuilder<B>,
    headers: &[(String, String)],
) -> ureq::RequestBuilder<B> {
    for (key, value) in headers {
        builder = builder.header(key.as_str(), value.as_str());
    }
    builder
}

fn map_ureq_error(err: ureq::Error) -> TransportFailure {
    let kind = match &err {
        ureq::Error::Timeout(_) => FailureKind::TimedOut,
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => FailureKind::NotConnected,
        ureq::Error::BadUri(_) | ureq::Error::Http(_) => FailureKind::BadUrl,
        ureq::Error::Io(io) => match io.kind() {
            ErrorKind::ConnectionRefused | ErrorKind::NotConnected | ErrorKind::AddrNotAvailable => {
                FailureKind::NotConnected
            }
            ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => FailureKind::ConnectionLost,
            ErrorKind::TimedOut => FailureKind::TimedOut,
            _ => FailureKind::Other,
        },
        _ => FailureKind::Other,
    };
    TransportFailure::new(kind, err.to_string())
}

/// Side-effecting hook run around every transport call. Observers never
/// change the outcome of a call.
pub trait TransportObserver: Send + Sync {
    fn will_send(&self, _request: &HttpRequest) {}
    fn did_receive(&self, _request: &HttpRequest, _result: &Result<HttpResponse, TransportFailure>) {}
}

/// Logs each call through `tracing`; bodies only in verbose mode.
pub struct LoggingObserver {
    verbose: bool,
}

impl LoggingObserver {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl TransportObserver for LoggingObserver {
    fn will_send(&self, request: &HttpRequest) {
        tracing::debug!(method = %request.method, url = %request.url, "sending request");
        if self.verbose {
            match &request.body {
                Some(RequestBody::Json(json)) => tracing::trace!(body = %json, "request body"),
                Some(RequestBody::Multipart(form)) => {
                    tracing::trace!(parts = form.parts().len(), "multipart request body")
                }
                None => {}
            }
        }
    }

    fn did_receive(&self, request: &HttpRequest, result: &Result<HttpResponse, TransportFailure>) {
        match result {
            Ok(response) => {
                tracing::debug!(
                    method = %request.method,
                    url = %request.url,
                    status = response.status,
                    "received response"
                );
                if self.verbose {
                    tracing::trace!(body = %response.body, "response body");
                }
            }
            Err(failure) => {
                tracing::warn!(method = %request.method, url = %request.url, %failure, "request failed")
            }
        }
    }
}

/// Tracks in-flight calls and publishes an app-wide busy flag.
pub struct ActivityObserver {
    in_flight: AtomicUsize,
    busy: watch::Sender<bool>,
}

impl ActivityObserver {
    pub fn new() -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            in_flight: AtomicUsize::new(0),
            busy,
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Receiver that flips to `true` when the first call starts and back to
    /// `false` when the last one completes.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.busy.subscribe()
    }
}

impl Default for ActivityObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportObserver for ActivityObserver {
    fn will_send(&self, _request: &HttpRequest) {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) == 0 {
            self.busy.send_replace(true);
        }
    }

    fn did_receive(&self, _request: &HttpRequest, _result: &Result<HttpResponse, TransportFailure>) {
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.busy.send_replace(false);
        }
    }
}

/// Shared transport: one connector, the session it reads tokens from, and
/// the observers notified around each call.
pub struct Transport {
    connector: Arc<dyn Connector>,
    session: Session,
    observers: Vec<Arc<dyn TransportObserver>>,
}

impl Transport {
    pub fn new(connector: Arc<dyn Connector>, session: Session) -> Self {
        Self {
            connector,
            session,
            observers: Vec::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn TransportObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Execute `request`, returning the response only for 2xx statuses.
    pub fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, ApiError> {
        let prepared = self.prepare(request);
        for observer in &self.observers {
            observer.will_send(&prepared);
        }
        let in_flight = InFlight {
            observers: &self.observers,
            request: &prepared,
        };
        let result = self.connector.send(&prepared);
        in_flight.finish(&result);

        let response = result.map_err(|failure| classify_transport_failure(&failure))?;
        if !response.is_success() {
            return Err(classify_http_status(response.status, &response.body));
        }
        Ok(response)
    }

    /// Copy of `request` with content-type and auth headers attached, as it
    /// goes on the wire.
    pub fn prepare(&self, request: &HttpRequest) -> HttpRequest {
        let mut prepared = request.clone();
        prepared
            .headers
            .retain(|(k, _)| !k.eq_ignore_ascii_case("content-type") && !k.eq_ignore_ascii_case("authorization"));

        let content_type = request
            .body
            .as_ref()
            .map(RequestBody::content_type)
            .unwrap_or_else(|| "application/json".to_string());
        prepared.headers.push(("content-type".to_string(), content_type));

        if let Some(token) = self.session.access_token() {
            prepared
                .headers
                .push(("authorization".to_string(), format!("Bearer {token}")));
        }
        prepared
    }
}

/// Pairs every `will_send` with exactly one `did_receive`, even when the
/// connector unwinds.
struct InFlight<'a> {
    observers: &'a [Arc<dyn TransportObserver>],
    request: &'a HttpRequest,
}

impl InFlight<'_> {
    fn finish(self, result: &Result<HttpResponse, TransportFailure>) {
        self.notify(result);
        std::mem::forget(self);
    }

    fn notify(&self, result: &Result<HttpResponse, TransportFailure>) {
        for observer in self.observers {
            observer.did_receive(self.request, result);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.notify(&Err(TransportFailure::new(FailureKind::Other, "connector panicked")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{MultipartForm, Part};
    use parking_lot::Mutex;

    /// Connector that records requests and replays a canned result.
    struct Canned {
        result: Result<HttpResponse, TransportFailure>,
        seen: Mutex<Vec<HttpRequest>>,
    }

    impl Canned {
        fn status(status: u16, body: &str) -> Arc<Self> {
            Arc::new(Self {
                result: Ok(HttpResponse {
                    status,
                    headers: Vec::new(),
                    body: body.to_string(),
                }),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn failure(kind: FailureKind) -> Arc<Self> {
            Arc::new(Self {
                result: Err(TransportFailure::new(kind, "simulated")),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    impl Connector for Canned {
        fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportFailure> {
            self.seen.lock().push(request.clone());
            self.result.clone()
        }
    }

    fn get() -> HttpRequest {
        HttpRequest {
            method: HttpMethod::Get,
            url: "http://localhost/data/1".to_string(),
            headers: Vec::new(),
            body: None,
        }
    }

    #[test]
    fn attaches_bearer_token_when_logged_in() {
        let connector = Canned::status(200, "{}");
        let session = Session::in_memory();
        let transport = Transport::new(connector.clone(), session.clone());

        transport.execute(&get()).unwrap();
        session.store_tokens("tok-1", "ref-1");
        transport.execute(&get()).unwrap();

        let seen = connector.seen.lock();
        assert_eq!(seen[0].header("authorization"), None);
        assert_eq!(seen[1].header("authorization"), Some("Bearer tok-1"));
        assert_eq!(seen[1].header("content-type"), Some("application/json"));
    }

    #[test]
    fn multipart_overrides_content_type() {
        let connector = Canned::status(200, "{}");
        let transport = Transport::new(connector.clone(), Session::in_memory());
        let form = MultipartForm::new().with_part(Part {
            name: "file".to_string(),
            file_name: "a.txt".to_string(),
            mime_type: "text/plain".to_string(),
            bytes: b"hi".to_vec(),
        });
        let boundary = form.boundary().to_string();
        let mut request = get();
        request.method = HttpMethod::Post;
        request.headers.push(("Content-Type".to_string(), "application/json".to_string()));
        request.body = Some(RequestBody::Multipart(form));

        transport.execute(&request).unwrap();

        let seen = connector.seen.lock();
        let content_types: Vec<_> = seen[0]
            .headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .collect();
        assert_eq!(content_types.len(), 1);
        assert_eq!(
            content_types[0].1,
            format!("multipart/form-data; boundary={boundary}")
        );
        // The caller's descriptor is untouched.
        assert_eq!(request.headers.len(), 1);
    }

    #[test]
    fn non_success_status_is_classified() {
        let transport = Transport::new(Canned::status(403, ""), Session::in_memory());
        assert_eq!(transport.execute(&get()).unwrap_err(), ApiError::Forbidden);
        let transport = Transport::new(
            Canned::status(500, r#"{"message":"oven on fire"}"#),
            Session::in_memory(),
        );
        assert_eq!(
            transport.execute(&get()).unwrap_err(),
            ApiError::server(500, Some("oven on fire".to_string()))
        );
    }

    #[test]
    fn transport_failure_is_classified() {
        let transport = Transport::new(Canned::failure(FailureKind::NotConnected), Session::in_memory());
        assert_eq!(transport.execute(&get()).unwrap_err(), ApiError::NetworkUnavailable);
        let transport = Transport::new(Canned::failure(FailureKind::TimedOut), Session::in_memory());
        assert_eq!(transport.execute(&get()).unwrap_err(), ApiError::Timeout);
    }

    #[test]
    fn activity_observer_toggles_busy_flag() {
        let activity = Arc::new(ActivityObserver::new());
        let mut busy = activity.subscribe();
        let transport = Transport::new(Canned::status(200, "{}"), Session::in_memory())
            .with_observer(activity.clone())
            .with_observer(Arc::new(LoggingObserver::new(true)));

        assert!(!activity.is_busy());
        transport.execute(&get()).unwrap();
        assert!(!activity.is_busy());
        assert_eq!(activity.in_flight(), 0);
        // The flag went up and back down during the call.
        assert!(busy.has_changed().unwrap());
        assert!(!*busy.borrow_and_update());
    }

    struct Panicking;

    impl Connector for Panicking {
        fn send(&self, _request: &HttpRequest) -> Result<HttpResponse, TransportFailure> {
            panic!("connector bug");
        }
    }

    #[test]
    fn panicking_connector_still_settles_activity() {
        let activity = Arc::new(ActivityObserver::new());
        let transport =
            Transport::new(Arc::new(Panicking), Session::in_memory()).with_observer(activity.clone());

        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| transport.execute(&get())));
        assert!(outcome.is_err());
        assert_eq!(activity.in_flight(), 0);
        assert!(!activity.is_busy());
    }

    #[test]
    fn prepare_leaves_descriptor_untouched() {
        let session = Session::in_memory();
        session.store_tokens("tok-2", "ref-2");
        let transport = Transport::new(Canned::status(200, "{}"), session);
        let request = get();
        let prepared = transport.prepare(&request);
        assert_eq!(prepared.header("authorization"), Some("Bearer tok-2"));
        assert_eq!(prepared.header("content-type"), Some("application/json"));
        assert!(request.headers.is_empty());
    }

    #[test]
    fn activity_observer_counts_overlapping_calls() {
        let activity = ActivityObserver::new();
        let request = get();
        let done = Ok(HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: String::new(),
        });
        activity.will_send(&request);
        activity.will_send(&request);
        assert!(activity.is_busy());
        activity.did_receive(&request, &done);
        assert!(activity.is_busy());
        activity.did_receive(&request, &done);
        assert!(!activity.is_busy());
    }
}
