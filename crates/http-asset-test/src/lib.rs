//! Helpers for testing assets against a real HTTP origin.
//!
//! When writing tests, keep the following points in mind:
//!
//!  - In every test, call [`setup`]. This will set up the logger so that all console output
//!    is captured by the test runner.
//!
//!  - When using [`tempdir`], make sure that the handle to the temp directory is held for the
//!    entire lifetime of the test, as the directory is deleted once the handle is dropped.
//!
//!  - When using [`MockServer`], make sure that the server is held until all requests to the
//!    server have been made. The server stops serving when it is dropped.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::header::{self, HeaderMap, HeaderName};
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::fmt;
use url::Url;

pub use tempfile::TempDir;

/// Setup the test environment.
///
///  - Initializes logs: The logger only captures logs from the `http_asset` crate and mutes all
///    other logs (such as hyper or reqwest).
pub fn setup() {
    fmt()
        .with_env_filter(EnvFilter::new("http_asset=trace"))
        .with_target(false)
        .pretty()
        .with_test_writer()
        .try_init()
        .ok();
}

/// Creates a temporary directory.
///
/// The directory is deleted when the [`TempDir`] instance is dropped. Use it as a guard to
/// automatically clean up after tests.
pub fn tempdir() -> TempDir {
    TempDir::new().unwrap()
}

/// Returns the `ETag` the [`MockServer`] uses for a file with the given contents.
pub fn checksum(body: &str) -> String {
    format!("\"{}\"", hex::encode(Sha256::digest(body)))
}

/// A test server that binds to a random port and serves a web app.
///
/// This server requires a `tokio` runtime and is supposed to be run in a `tokio::test`. It
/// automatically stops serving when dropped.
#[derive(Debug)]
pub struct Server {
    pub handle: tokio::task::JoinHandle<()>,
    pub socket: SocketAddr,
}

impl Server {
    pub fn with_router(router: Router) -> Self {
        let listener = std::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0))).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();
        let listener = tokio::net::TcpListener::from_std(listener).unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });

        Self { handle, socket }
    }

    /// Returns the socket address that this server listens on.
    pub fn addr(&self) -> SocketAddr {
        self.socket
    }

    /// Returns the port that this server listens on.
    pub fn port(&self) -> u16 {
        self.addr().port()
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> Url {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.port(), path)
            .parse()
            .unwrap()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// The parts of a request the [`MockServer`] records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockRequest {
    pub path: String,
    pub if_none_match: Option<String>,
}

/// A response of the [`MockServer`].
///
/// Unknown paths are answered with an empty `404 Not Found`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: StatusCode,
    pub headers: Vec<(HeaderName, String)>,
    pub body: Option<String>,
}

impl MockResponse {
    /// An empty response with the given status.
    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: None,
        }
    }

    /// A `200 OK` response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(StatusCode::OK).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }
}

impl IntoResponse for MockResponse {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        for (name, value) in self.headers {
            if let Ok(value) = value.parse() {
                headers.append(name, value);
            }
        }
        (self.status, headers, self.body.unwrap_or_default()).into_response()
    }
}

/// One request handled by the [`MockServer`], together with its response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub req: MockRequest,
    pub res: MockResponse,
}

/// Computes a response from the request and the number of requests handled before it.
type Handler = Arc<dyn Fn(&MockRequest, usize) -> MockResponse + Send + Sync>;

enum Route {
    /// A static file, served with a checksum `ETag` and `304` revalidation.
    File(String),
    Handler(Handler),
}

#[derive(Default)]
struct MockState {
    routes: BTreeMap<String, Route>,
    log: Vec<Event>,
    delay: Duration,
}

/// An HTTP origin with scripted routes that records every request it handles.
pub struct MockServer {
    server: Server,
    state: Arc<Mutex<MockState>>,
}

impl MockServer {
    pub fn new() -> Self {
        let state = Arc::new(Mutex::new(MockState::default()));
        let router = Router::new().fallback(handle).with_state(state.clone());

        Self {
            server: Server::with_router(router),
            state,
        }
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Serves `body` at `path`, with a checksum of the body as `ETag`.
    pub fn file(&self, path: &str, body: impl Into<String>) {
        self.state()
            .routes
            .insert(path.into(), Route::File(body.into()));
    }

    /// Answers requests to `path` with the response computed by `handler`.
    ///
    /// The handler receives the request and the number of requests the server handled before.
    pub fn handler<F>(&self, path: &str, handler: F)
    where
        F: Fn(&MockRequest, usize) -> MockResponse + Send + Sync + 'static,
    {
        self.state()
            .routes
            .insert(path.into(), Route::Handler(Arc::new(handler)));
    }

    /// Delays every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        self.state().delay = delay;
    }

    /// Returns all requests handled so far, in order.
    pub fn log(&self) -> Vec<Event> {
        self.state().log.clone()
    }

    /// Returns the number of requests handled so far.
    pub fn requests(&self) -> usize {
        self.state().log.len()
    }

    pub fn url(&self, path: &str) -> Url {
        self.server.url(path)
    }
}

impl Default for MockServer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServer")
            .field("server", &self.server)
            .finish_non_exhaustive()
    }
}

async fn handle(
    State(state): State<Arc<Mutex<MockState>>>,
    uri: Uri,
    headers: HeaderMap,
) -> MockResponse {
    let req = MockRequest {
        path: uri.path().into(),
        if_none_match: headers
            .get(header::IF_NONE_MATCH)
            .and_then(|v| v.to_str().ok())
            .map(Into::into),
    };

    let delay = state.lock().unwrap().delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut state = state.lock().unwrap();
    let res = match state.routes.get(&req.path) {
        Some(Route::File(body)) => serve_file(&req, body),
        Some(Route::Handler(handler)) => handler(&req, state.log.len()),
        None => MockResponse::status(StatusCode::NOT_FOUND),
    };

    state.log.push(Event {
        req,
        res: res.clone(),
    });
    res
}

fn serve_file(req: &MockRequest, body: &str) -> MockResponse {
    let etag = checksum(body);
    if req.if_none_match.as_deref() == Some(etag.as_str()) {
        MockResponse::status(StatusCode::NOT_MODIFIED).with_header(header::ETAG, etag)
    } else {
        MockResponse::ok(body).with_header(header::ETAG, etag)
    }
}
