//! Integration test support for cartsync.
//!
//! [`MockCartServer`] is an in-process cart REST API built on `axum` and bound
//! to an ephemeral localhost port. It behaves like the real service where the
//! client cares:
//!
//! - issues anonymous session keys (`tok-001`, `tok-002`, ...) to requests
//!   carrying no identity, and reports them in `owner.sessionKey`, a
//!   top-level `sessionKey`, and the `X-Session-Key` header;
//! - keeps one cart per identity, prices as decimal strings;
//! - answers stock and validation problems with per-field `400` bodies.
//!
//! Every request is recorded (method, path, identity headers, body) so tests
//! can assert exactly what went over the wire. Failures and latency can be
//! scripted per test.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartsync-integration-tests
//! ```

#![allow(clippy::expect_used, clippy::missing_panics_doc)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::header::{AUTHORIZATION, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use cartsync_client::{CartClientConfig, CartService, IdentityStore, Transport};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use url::Url;
use uuid::Uuid;

pub use axum::http::{Method, StatusCode};

/// Header carrying the anonymous session key.
pub const SESSION_HEADER: &str = "x-session-key";

/// Path prefix the API is mounted under.
const API_PREFIX: &str = "/api/";

// =============================================================================
// Recorded Requests
// =============================================================================

/// A request as the server saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    /// Path relative to the API root, e.g. `cart/add_item`.
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub session_key: Option<String>,
    pub body: Option<Value>,
}

impl RecordedRequest {
    /// Returns true if this request was `method path`.
    #[must_use]
    pub fn is(&self, method: &Method, path: &str) -> bool {
        self.method == *method && self.path == path
    }

    /// Returns true for anything but a read.
    #[must_use]
    pub fn is_mutation(&self) -> bool {
        self.method != Method::GET
    }
}

// =============================================================================
// Server State
// =============================================================================

struct Product {
    name: String,
    price: Decimal,
    stock: Option<u32>,
}

struct Line {
    item_id: Uuid,
    product_id: Uuid,
    quantity: u32,
}

#[derive(Default)]
struct StoredCart {
    id: Uuid,
    lines: Vec<Line>,
}

struct Failure {
    status: StatusCode,
    body: Value,
    retry_after: Option<u64>,
}

enum Owner {
    User(String),
    Session(String),
    Nobody,
}

impl Owner {
    fn cart_key(&self) -> String {
        match self {
            Self::User(token) => format!("user:{token}"),
            Self::Session(key) => format!("session:{key}"),
            Self::Nobody => "nobody".to_string(),
        }
    }

    fn json(&self) -> Value {
        match self {
            Self::User(_) => json!({"type": "user"}),
            Self::Session(key) => json!({"type": "session", "sessionKey": key}),
            Self::Nobody => json!({"type": "session"}),
        }
    }
}

struct ServerState {
    requests: Vec<RecordedRequest>,
    products: HashMap<Uuid, Product>,
    carts: HashMap<String, StoredCart>,
    sessions_issued: u32,
    assign_sessions: bool,
    rotations: HashMap<String, String>,
    failures: VecDeque<Failure>,
    delay: Duration,
}

type SharedState = Arc<Mutex<ServerState>>;

fn lock(state: &SharedState) -> std::sync::MutexGuard<'_, ServerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockCartServer
// =============================================================================

/// In-process cart API.
pub struct MockCartServer {
    addr: SocketAddr,
    state: SharedState,
    task: JoinHandle<()>,
}

impl MockCartServer {
    /// Bind to an ephemeral port and start serving.
    pub async fn start() -> Self {
        let state: SharedState = Arc::new(Mutex::new(ServerState {
            requests: Vec::new(),
            products: HashMap::new(),
            carts: HashMap::new(),
            sessions_issued: 0,
            assign_sessions: true,
            rotations: HashMap::new(),
            failures: VecDeque::new(),
            delay: Duration::ZERO,
        }));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock server");
        let addr = listener.local_addr().expect("Failed to read local address");

        let app = Router::new()
            .fallback(handle)
            .with_state(Arc::clone(&state));
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .await
                .expect("Mock server failed");
        });

        Self { addr, state, task }
    }

    /// API base URL.
    #[must_use]
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}{API_PREFIX}", self.addr)).expect("Invalid base URL")
    }

    /// Client configuration pointing at this server, tuned for tests.
    #[must_use]
    pub fn config(&self) -> CartClientConfig {
        CartClientConfig::new(self.base_url())
            .with_session_header(SESSION_HEADER)
            .with_bootstrap_timeout(Duration::from_secs(2))
            .with_request_timeout(Duration::from_secs(5))
            .with_read_retry(3, Duration::from_millis(10))
    }

    /// A cart service over a fresh transport using `identity`.
    #[must_use]
    pub fn service(&self, identity: IdentityStore) -> CartService {
        let transport =
            Transport::new(&self.config(), identity).expect("Failed to build transport");
        CartService::new(transport)
    }

    // =========================================================================
    // Setup
    // =========================================================================

    /// Add a product to the catalog and return its ID.
    pub fn add_product(&self, name: &str, price: &str, stock: Option<u32>) -> Uuid {
        let id = Uuid::new_v4();
        let price = price.parse().expect("Invalid price");
        lock(&self.state).products.insert(
            id,
            Product {
                name: name.to_string(),
                price,
                stock,
            },
        );
        id
    }

    /// Fail the next request with `status` and `body`.
    pub fn fail_next(&self, status: StatusCode, body: Value) {
        lock(&self.state).failures.push_back(Failure {
            status,
            body,
            retry_after: None,
        });
    }

    /// Fail the next request with `429 Too Many Requests`.
    pub fn throttle_next(&self, retry_after: Option<u64>) {
        lock(&self.state).failures.push_back(Failure {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: json!({"detail": "Request was throttled."}),
            retry_after,
        });
    }

    /// Delay every response by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        lock(&self.state).delay = delay;
    }

    /// Stop issuing session keys to anonymous requests.
    pub fn set_assign_sessions(&self, assign: bool) {
        lock(&self.state).assign_sessions = assign;
    }

    /// Replace session key `from` with `to` on its next request.
    pub fn rotate_session(&self, from: &str, to: &str) {
        lock(&self.state)
            .rotations
            .insert(from.to_string(), to.to_string());
    }

    // =========================================================================
    // Inspection
    // =========================================================================

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state).requests.clone()
    }

    /// Requests received after the first `skip`.
    #[must_use]
    pub fn requests_since(&self, skip: usize) -> Vec<RecordedRequest> {
        lock(&self.state).requests.iter().skip(skip).cloned().collect()
    }

    /// Number of requests received so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        lock(&self.state).requests.len()
    }

    /// Number of `method path` requests received so far.
    #[must_use]
    pub fn count(&self, method: &Method, path: &str) -> usize {
        lock(&self.state)
            .requests
            .iter()
            .filter(|r| r.is(method, path))
            .count()
    }
}

impl Drop for MockCartServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// A base URL on a localhost port with no listener.
#[must_use]
pub fn unreachable_base_url() -> Url {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let port = listener.local_addr().expect("Failed to read address").port();
    drop(listener);
    Url::parse(&format!("http://127.0.0.1:{port}{API_PREFIX}")).expect("Invalid URL")
}

// =============================================================================
// Handler
// =============================================================================

async fn handle(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .map(str::to_string)
    };

    let request = RecordedRequest {
        method,
        path: uri
            .path()
            .strip_prefix(API_PREFIX)
            .unwrap_or(uri.path())
            .to_string(),
        query: uri.query().map(str::to_string),
        authorization: header(AUTHORIZATION.as_str()),
        session_key: header(SESSION_HEADER),
        body: serde_json::from_slice(&body).ok(),
    };

    let delay = {
        let mut server = lock(&state);
        server.requests.push(request.clone());
        server.delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut server = lock(&state);
    if let Some(failure) = server.failures.pop_front() {
        let mut response = (failure.status, Json(failure.body)).into_response();
        if let Some(secs) = failure.retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        return response;
    }

    let owner = server.resolve_owner(&request);
    let (status, body) = server.route(&request, &owner);

    let mut response = (status, Json(body)).into_response();
    if let Owner::Session(key) = &owner
        && let Ok(value) = HeaderValue::from_str(key)
    {
        response.headers_mut().insert(SESSION_HEADER, value);
    }
    response
}

impl ServerState {
    fn resolve_owner(&mut self, request: &RecordedRequest) -> Owner {
        if let Some(token) = request
            .authorization
            .as_deref()
            .and_then(|v| v.strip_prefix("Bearer "))
        {
            return Owner::User(token.to_string());
        }

        if let Some(key) = &request.session_key {
            if let Some(rotated) = self.rotations.remove(key) {
                let cart = self.carts.remove(&format!("session:{key}")).unwrap_or_default();
                self.carts.insert(format!("session:{rotated}"), cart);
                return Owner::Session(rotated);
            }
            return Owner::Session(key.clone());
        }

        if !self.assign_sessions {
            return Owner::Nobody;
        }
        self.sessions_issued += 1;
        Owner::Session(format!("tok-{:03}", self.sessions_issued))
    }

    fn route(&mut self, request: &RecordedRequest, owner: &Owner) -> (StatusCode, Value) {
        let key = owner.cart_key();
        let result = match (&request.method, request.path.as_str()) {
            (&Method::GET, "cart/current") => Ok(self.cart_json(&key, owner)),
            (&Method::GET, "cart/summary") => Ok(self.summary_json(&key, owner)),
            (&Method::POST, "cart/add_item") => self.add_item(&key, request.body.as_ref()).map(|()| {
                json!({"cart": self.cart_json(&key, owner), "summary": self.summary_json(&key, owner)})
            }),
            (&Method::PATCH, "cart/update_item") => {
                self.update_item(&key, request.body.as_ref()).map(|()| {
                    json!({"cart": self.cart_json(&key, owner), "summary": self.summary_json(&key, owner)})
                })
            }
            (&Method::DELETE, "cart/remove_item") => self
                .remove_item(&key, request.query.as_deref())
                .map(|()| json!({"summary": self.summary_json(&key, owner)})),
            (&Method::DELETE, "cart/clear") => {
                self.carts.entry(key.clone()).or_default().lines.clear();
                Ok(json!({"summary": self.summary_json(&key, owner)}))
            }
            _ => Err((StatusCode::NOT_FOUND, json!({"detail": "Not found."}))),
        };

        match result {
            Ok(body) => (StatusCode::OK, body),
            Err(error) => error,
        }
    }

    fn add_item(&mut self, key: &str, body: Option<&Value>) -> Result<(), (StatusCode, Value)> {
        let raw_id = field_str(body, "product_id");
        let product_id = Uuid::parse_str(&raw_id)
            .ok()
            .filter(|id| self.products.contains_key(id))
            .ok_or_else(|| {
                bad_request(
                    "product_id",
                    format!("Invalid pk \"{raw_id}\" - object does not exist."),
                )
            })?;
        let quantity = field_quantity(body)?;
        if quantity == 0 {
            return Err(bad_request(
                "quantity",
                "Ensure this value is greater than or equal to 1.",
            ));
        }

        let cart = self.carts.entry(key.to_string()).or_default();
        if cart.id.is_nil() {
            cart.id = Uuid::new_v4();
        }
        let existing = cart
            .lines
            .iter()
            .find(|l| l.product_id == product_id)
            .map_or(0, |l| l.quantity);

        if let Some(stock) = self.products.get(&product_id).and_then(|p| p.stock)
            && existing + quantity > stock
        {
            return Err(bad_request("quantity", format!("Only {stock} left in stock.")));
        }

        let cart = self.carts.entry(key.to_string()).or_default();
        match cart.lines.iter_mut().find(|l| l.product_id == product_id) {
            Some(line) => line.quantity += quantity,
            None => cart.lines.push(Line {
                item_id: Uuid::new_v4(),
                product_id,
                quantity,
            }),
        }
        Ok(())
    }

    fn update_item(&mut self, key: &str, body: Option<&Value>) -> Result<(), (StatusCode, Value)> {
        let item_id = Uuid::parse_str(&field_str(body, "item_id")).map_err(|_| not_found())?;
        let quantity = field_quantity(body)?;
        if quantity == 0 {
            return Err(bad_request(
                "quantity",
                "Ensure this value is greater than or equal to 1.",
            ));
        }

        let product_id = self
            .carts
            .get(key)
            .and_then(|c| c.lines.iter().find(|l| l.item_id == item_id))
            .map(|l| l.product_id)
            .ok_or_else(not_found)?;

        if let Some(stock) = self.products.get(&product_id).and_then(|p| p.stock)
            && quantity > stock
        {
            return Err(bad_request("quantity", format!("Only {stock} left in stock.")));
        }

        if let Some(line) = self
            .carts
            .get_mut(key)
            .and_then(|c| c.lines.iter_mut().find(|l| l.item_id == item_id))
        {
            line.quantity = quantity;
        }
        Ok(())
    }

    fn remove_item(&mut self, key: &str, query: Option<&str>) -> Result<(), (StatusCode, Value)> {
        let item_id = query
            .unwrap_or_default()
            .split('&')
            .find_map(|pair| pair.strip_prefix("item_id="))
            .and_then(|v| Uuid::parse_str(v).ok())
            .ok_or_else(|| bad_request("item_id", "This field is required."))?;

        let cart = self.carts.get_mut(key).ok_or_else(not_found)?;
        let before = cart.lines.len();
        cart.lines.retain(|l| l.item_id != item_id);
        if cart.lines.len() == before {
            return Err(not_found());
        }
        Ok(())
    }

    fn totals(&self, key: &str) -> (u32, Decimal, u32) {
        let lines = self.carts.get(key).map(|c| c.lines.as_slice()).unwrap_or_default();
        let total_items = lines.iter().map(|l| l.quantity).sum();
        let total_price = lines.iter().map(|l| self.line_total(l)).sum();
        let items_count = u32::try_from(lines.len()).unwrap_or(u32::MAX);
        (total_items, total_price, items_count)
    }

    fn line_total(&self, line: &Line) -> Decimal {
        self.products
            .get(&line.product_id)
            .map_or(Decimal::ZERO, |p| p.price * Decimal::from(line.quantity))
    }

    fn cart_json(&self, key: &str, owner: &Owner) -> Value {
        let cart = self.carts.get(key);
        let items: Vec<Value> = cart
            .map(|c| c.lines.as_slice())
            .unwrap_or_default()
            .iter()
            .map(|line| {
                let product = self.products.get(&line.product_id);
                json!({
                    "id": line.item_id.to_string(),
                    "product": {
                        "id": line.product_id.to_string(),
                        "name": product.map_or("", |p| p.name.as_str()),
                        "price": product.map_or(Decimal::ZERO, |p| p.price).to_string(),
                    },
                    "quantity": line.quantity,
                    "total_price": self.line_total(line).to_string(),
                })
            })
            .collect();

        let (total_items, total_price, items_count) = self.totals(key);
        json!({
            "id": cart.map_or_else(Uuid::nil, |c| c.id).to_string(),
            "items": items,
            "total_price": total_price.to_string(),
            "total_items": total_items,
            "items_count": items_count,
            "is_empty": items_count == 0,
            "owner": owner.json(),
        })
    }

    fn summary_json(&self, key: &str, owner: &Owner) -> Value {
        let (total_items, total_price, items_count) = self.totals(key);
        let mut summary = json!({
            "total_items": total_items,
            "total_price": total_price.to_string(),
            "items_count": items_count,
            "is_empty": items_count == 0,
        });
        if let Owner::Session(session_key) = owner {
            summary["sessionKey"] = json!(session_key);
        }
        summary
    }
}

fn field_str(body: Option<&Value>, field: &str) -> String {
    body.and_then(|b| b.get(field))
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn field_quantity(body: Option<&Value>) -> Result<u32, (StatusCode, Value)> {
    body.and_then(|b| b.get("quantity"))
        .and_then(Value::as_u64)
        .and_then(|q| u32::try_from(q).ok())
        .ok_or_else(|| bad_request("quantity", "A valid integer is required."))
}

fn bad_request(field: &str, message: impl Into<String>) -> (StatusCode, Value) {
    let message: String = message.into();
    (StatusCode::BAD_REQUEST, json!({ field: [message] }))
}

fn not_found() -> (StatusCode, Value) {
    (StatusCode::NOT_FOUND, json!({"detail": "Not found."}))
}
