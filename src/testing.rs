//! In-process stand-in for the capture backend, used by the async tests.

use axum::{
    Json, Router,
    extract::{
        Path, Query, Request, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    body::to_bytes,
    http::{HeaderMap, StatusCode, header::COOKIE},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use url::Url;

#[derive(Debug, Clone)]
enum MockFrame {
    Text(String),
    Drop,
}

#[derive(Debug, Clone)]
struct MockWebhook {
    id: u64,
    slug: String,
    active: bool,
}

#[derive(Debug, Clone)]
struct MockRequest {
    id: u64,
    webhook_id: u64,
    timestamp: DateTime<Utc>,
    body: String,
    headers: BTreeMap<String, String>,
    query_params: BTreeMap<String, String>,
}

#[derive(Default)]
struct Store {
    webhooks: Vec<MockWebhook>,
    requests: Vec<MockRequest>,
    next_webhook: u64,
    next_request: u64,
}

impl Store {
    fn webhook(&self, slug: &str) -> Option<&MockWebhook> {
        self.webhooks.iter().find(|webhook| webhook.slug == slug)
    }

    fn insert_request(
        &mut self,
        webhook_id: u64,
        body: String,
        headers: BTreeMap<String, String>,
        query_params: BTreeMap<String, String>,
    ) -> MockRequest {
        self.next_request += 1;
        let request = MockRequest {
            id: self.next_request,
            webhook_id,
            timestamp: epoch() + ChronoDuration::seconds(self.next_request as i64),
            body,
            headers,
            query_params,
        };
        self.requests.push(request.clone());
        request
    }
}

struct Shared {
    addr: SocketAddr,
    store: Mutex<Store>,
    frames: broadcast::Sender<MockFrame>,
    ws_connections: AtomicUsize,
    last_cookie: Mutex<Option<String>>,
}

type MockState = Arc<Shared>;

struct MockError {
    status: StatusCode,
    detail: &'static str,
}

impl MockError {
    fn new(status: StatusCode, detail: &'static str) -> Self {
        Self { status, detail }
    }
}

impl IntoResponse for MockError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

pub struct MockBackend {
    shared: MockState,
}

impl MockBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (frames, _) = broadcast::channel(64);
        let shared = Arc::new(Shared {
            addr,
            store: Mutex::new(Store::default()),
            frames,
            ws_connections: AtomicUsize::new(0),
            last_cookie: Mutex::new(None),
        });

        let app = Router::new()
            .route("/ws", get(ws_upgrade))
            .route("/add_webhook", post(add_webhook))
            .route("/delete", post(delete_webhook))
            .route("/pause", post(pause_webhook))
            .route("/delete_request", post(delete_request))
            .route("/webhooks/delete_all", post(delete_all))
            .route("/webhook/request/:id", get(show_request))
            .route("/api/webhook/:slug/requests", get(list_requests))
            .route("/:slug", post(capture))
            .with_state(shared.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { shared }
    }

    /// A websocket URL nothing listens on.
    pub async fn unreachable_ws_url() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        Url::parse(&format!("ws://{addr}/ws")).unwrap()
    }

    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}/", self.shared.addr)).unwrap()
    }

    pub fn ws_url(&self) -> Url {
        Url::parse(&format!("ws://{}/ws", self.shared.addr)).unwrap()
    }

    pub fn add_webhook(&self, slug: &str) -> u64 {
        let mut store = self.shared.store.lock().unwrap();
        store.next_webhook += 1;
        let id = store.next_webhook;
        store.webhooks.push(MockWebhook {
            id,
            slug: slug.to_string(),
            active: true,
        });
        id
    }

    /// Stores `count` captured requests without announcing them.
    pub fn seed_requests(&self, slug: &str, count: usize) -> Vec<u64> {
        let mut store = self.shared.store.lock().unwrap();
        let webhook_id = store.webhook(slug).map(|webhook| webhook.id).unwrap();
        (0..count)
            .map(|n| {
                let body = json!({ "n": n }).to_string();
                let headers = BTreeMap::from([(
                    "content-type".to_string(),
                    "application/json".to_string(),
                )]);
                store
                    .insert_request(webhook_id, body, headers, BTreeMap::new())
                    .id
            })
            .collect()
    }

    pub fn request_count(&self, slug: &str) -> usize {
        let store = self.shared.store.lock().unwrap();
        let Some(webhook) = store.webhook(slug) else {
            return 0;
        };
        store
            .requests
            .iter()
            .filter(|request| request.webhook_id == webhook.id)
            .count()
    }

    pub fn is_active(&self, slug: &str) -> Option<bool> {
        let store = self.shared.store.lock().unwrap();
        store.webhook(slug).map(|webhook| webhook.active)
    }

    pub fn push_frame(&self, raw: &str) {
        let _ = self.shared.frames.send(MockFrame::Text(raw.to_string()));
    }

    /// Closes every open push socket from the server side.
    pub fn drop_sockets(&self) {
        let _ = self.shared.frames.send(MockFrame::Drop);
    }

    pub fn ws_connections(&self) -> usize {
        self.shared.ws_connections.load(Ordering::SeqCst)
    }

    pub async fn wait_for_ws_connections(&self, count: usize) -> bool {
        for _ in 0..500 {
            if self.ws_connections() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    pub fn last_cookie(&self) -> Option<String> {
        self.shared.last_cookie.lock().unwrap().clone()
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

fn remember_cookie(state: &MockState, headers: &HeaderMap) {
    if let Some(cookie) = headers.get(COOKIE).and_then(|value| value.to_str().ok()) {
        *state.last_cookie.lock().unwrap() = Some(cookie.to_string());
    }
}

async fn ws_upgrade(
    State(state): State<MockState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    remember_cookie(&state, &headers);
    ws.on_upgrade(move |socket| serve_socket(state, socket))
}

async fn serve_socket(state: MockState, mut socket: WebSocket) {
    let mut frames = state.frames.subscribe();
    state.ws_connections.fetch_add(1, Ordering::SeqCst);
    loop {
        tokio::select! {
            frame = frames.recv() => match frame {
                Ok(MockFrame::Text(text)) => {
                    if socket.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(MockFrame::Drop) | Err(_) => {
                    let _ = socket.send(Message::Close(None)).await;
                    break;
                }
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
}

#[derive(Deserialize)]
struct NameBody {
    name: String,
}

#[derive(Deserialize)]
struct UrlBody {
    url: String,
}

#[derive(Deserialize)]
struct IdBody {
    id: u64,
}

#[derive(Deserialize)]
struct WebhookIdBody {
    webhook_id: String,
}

#[derive(Deserialize)]
struct PageParams {
    #[serde(default)]
    offset: usize,
    #[serde(default = "default_limit")]
    limit: usize,
}

fn default_limit() -> usize {
    100
}

async fn add_webhook(
    State(state): State<MockState>,
    headers: HeaderMap,
    Json(body): Json<NameBody>,
) -> (StatusCode, Json<Value>) {
    remember_cookie(&state, &headers);
    let mut store = state.store.lock().unwrap();
    store.next_webhook += 1;
    let id = store.next_webhook;
    let slug = format!("mock{id:06}");
    store.webhooks.push(MockWebhook {
        id,
        slug: slug.clone(),
        active: true,
    });
    let url = format!("http://{}/{slug}", state.addr);
    (StatusCode::CREATED, Json(json!({ "url": url, "name": body.name })))
}

async fn delete_webhook(
    State(state): State<MockState>,
    Json(body): Json<UrlBody>,
) -> Result<Json<Value>, MockError> {
    let mut store = state.store.lock().unwrap();
    let index = store
        .webhooks
        .iter()
        .position(|webhook| webhook.slug == body.url)
        .ok_or(MockError::new(StatusCode::NOT_FOUND, "Webhook not found"))?;
    let removed = store.webhooks.remove(index);
    store.requests.retain(|request| request.webhook_id != removed.id);
    Ok(Json(json!({ "message": "Webhook deleted successfully" })))
}

async fn pause_webhook(
    State(state): State<MockState>,
    Json(body): Json<UrlBody>,
) -> Result<Json<Value>, MockError> {
    let mut store = state.store.lock().unwrap();
    let webhook = store
        .webhooks
        .iter_mut()
        .find(|webhook| webhook.slug == body.url)
        .ok_or(MockError::new(StatusCode::NOT_FOUND, "Webhook not found"))?;
    webhook.active = !webhook.active;
    Ok(Json(json!({
        "message": "Webhook status updated successfully",
        "status": webhook.active,
    })))
}

async fn delete_request(
    State(state): State<MockState>,
    Json(body): Json<IdBody>,
) -> Result<Json<Value>, MockError> {
    let mut store = state.store.lock().unwrap();
    let index = store
        .requests
        .iter()
        .position(|request| request.id == body.id)
        .ok_or(MockError::new(StatusCode::NOT_FOUND, "Webhook request not found"))?;
    store.requests.remove(index);
    Ok(Json(json!({ "message": "Webhook request deleted successfully" })))
}

async fn delete_all(
    State(state): State<MockState>,
    Json(body): Json<WebhookIdBody>,
) -> Result<Json<Value>, MockError> {
    let mut store = state.store.lock().unwrap();
    let webhook_id = store
        .webhook(&body.webhook_id)
        .map(|webhook| webhook.id)
        .ok_or(MockError::new(StatusCode::NOT_FOUND, "Webhook not found"))?;
    let before = store.requests.len();
    store.requests.retain(|request| request.webhook_id != webhook_id);
    let deleted = before - store.requests.len();
    Ok(Json(json!({
        "message": format!("Successfully deleted {deleted} webhook requests.")
    })))
}

async fn show_request(
    State(state): State<MockState>,
    Path(id): Path<u64>,
) -> Result<Json<Value>, MockError> {
    let store = state.store.lock().unwrap();
    let request = store
        .requests
        .iter()
        .find(|request| request.id == id)
        .ok_or(MockError::new(StatusCode::NOT_FOUND, "Request not found"))?;
    Ok(Json(json!({
        "headers": request.headers,
        "body": request.body,
        "query_params": request.query_params,
        "timestamp": request.timestamp.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
    })))
}

async fn list_requests(
    State(state): State<MockState>,
    Path(slug): Path<String>,
    Query(params): Query<PageParams>,
    headers: HeaderMap,
) -> Result<Json<Value>, MockError> {
    remember_cookie(&state, &headers);
    let store = state.store.lock().unwrap();
    let webhook_id = store
        .webhook(&slug)
        .map(|webhook| webhook.id)
        .ok_or(MockError::new(StatusCode::NOT_FOUND, "Webhook not found"))?;
    let mut matching: Vec<&MockRequest> = store
        .requests
        .iter()
        .filter(|request| request.webhook_id == webhook_id)
        .collect();
    matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    let total = matching.len();
    let page: Vec<Value> = matching
        .into_iter()
        .skip(params.offset)
        .take(params.limit.min(100))
        .map(|request| {
            json!({
                "id": request.id,
                "timestamp": format!("{}Z", request.timestamp.format("%Y-%m-%dT%H:%M:%S%.6f")),
                "body_length": request.body.len(),
            })
        })
        .collect();
    let has_more = params.offset + page.len() < total;
    Ok(Json(json!({
        "requests": page,
        "total": total,
        "offset": params.offset,
        "limit": params.limit,
        "has_more": has_more,
    })))
}

/// Captures a request and announces it on every push socket.
async fn capture(
    State(state): State<MockState>,
    Path(slug): Path<String>,
    Query(query_params): Query<BTreeMap<String, String>>,
    request: Request,
) -> Result<(StatusCode, Json<Value>), MockError> {
    let (parts, body) = request.into_parts();
    let body = to_bytes(body, 1024 * 1024)
        .await
        .map_err(|_| MockError::new(StatusCode::PAYLOAD_TOO_LARGE, "payload exceeds limit"))?;
    let headers = parts
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.to_string(),
                value.to_str().unwrap_or("<binary>").to_string(),
            )
        })
        .collect();

    let frame = {
        let mut store = state.store.lock().unwrap();
        let webhook = store
            .webhook(&slug)
            .cloned()
            .ok_or(MockError::new(StatusCode::NOT_FOUND, "Webhook not found"))?;
        if !webhook.active {
            return Ok((StatusCode::OK, Json(json!({ "message": "Webhook is paused" }))));
        }
        let stored = store.insert_request(
            webhook.id,
            String::from_utf8_lossy(&body).to_string(),
            headers,
            query_params,
        );
        json!({
            "type": "new_webhook_request",
            "webhook_id": webhook.id,
            "webhook_url": webhook.slug,
            "request_id": stored.id,
            "timestamp": stored.timestamp.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            "body_length": stored.body.len(),
        })
        .to_string()
    };
    let _ = state.frames.send(MockFrame::Text(frame));

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "message": "Webhook received and queued for processing",
            "job_id": "job-1",
            "status": "queued",
        })),
    ))
}
