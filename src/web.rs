//! ==============================================================================
//! web.rs - http routes
//! ==============================================================================
//!
//! routes:
//!     POST /data              ingest one envelope from the streaming app
//!     GET  /                  landing page
//!     GET  /dashboard         html dashboard over the in-memory window
//!     GET  /api/data          in-memory messages, oldest first
//!     GET  /api/latest?n=     last n in-memory messages
//!     GET  /api/db/data       stored messages (limit, device, sensor)
//!     GET  /api/db/devices    per-device statistics
//!     GET  /api/db/stats      storage totals
//!
//! ingest order: normalize -> store.add_bounded -> respond. sink.save and the
//! raw body archive run in a detached task on blocking workers after the
//! store lock is released; the response never waits for them.
//!
//! every request is logged at debug level (method, uri, status, latency) by
//! the tower-http trace layer.
//!
//! ==============================================================================

use crate::archive::RawArchive;
use crate::config::HostConfig;
use crate::dashboard::{self, DashboardData};
use crate::domain::NormalizedMessage;
use crate::decoders::DecoderRegistry;
use crate::normalizer::Normalizer;
use crate::sink::{DeviceInfo, PersistenceSink, SinkQuery, SinkStats};
use crate::store::MessageStore;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tower_http::LatencyUnit;
use tracing::{debug, error, info, warn, Level};

const DEFAULT_LATEST: usize = 10;
const DEFAULT_DB_LIMIT: usize = 50;

// ==============================================================================
// shared state
// ==============================================================================
// handed to every handler through axum's State extractor. no globals:
// main builds one of these and tests build their own.

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<MessageStore>,
    pub normalizer: Arc<Normalizer>,
    pub sink: Arc<dyn PersistenceSink>,
    pub archive: Option<Arc<RawArchive>>,
    pub config: Arc<HostConfig>,
}

impl AppState {
    pub fn new(config: HostConfig, sink: Arc<dyn PersistenceSink>) -> Self {
        Self {
            store: Arc::new(MessageStore::new()),
            normalizer: Arc::new(Normalizer::new(DecoderRegistry::with_builtin())),
            sink,
            archive: config.archive_dir().map(|dir| Arc::new(RawArchive::new(dir))),
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/data", post(ingest_handler))
        .route("/dashboard", get(dashboard_handler))
        .route("/api/data", get(api_data_handler))
        .route("/api/latest", get(api_latest_handler))
        .route("/api/db/data", get(db_data_handler))
        .route("/api/db/devices", get(db_devices_handler))
        .route("/api/db/stats", get(db_stats_handler))
        .layer(CorsLayer::permissive())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::DEBUG)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .with_state(state)
}

pub async fn run_server(state: AppState, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
    let addr = state.config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "http server listening");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

// ==============================================================================
// ingest
// ==============================================================================

pub async fn ingest_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let started = Instant::now();

    let message = match state.normalizer.normalize(&body) {
        Ok(m) => Arc::new(m),
        Err(e) => {
            warn!(error = %e, bytes = body.len(), "rejected sensor message");
            return (StatusCode::BAD_REQUEST, "failed to parse sensor message").into_response();
        }
    };

    if state.config.logging.show_sensor_data {
        info!(
            message_id = message.message_id,
            device_id = %message.device_id,
            session_id = %message.session_id,
            readings = message.total_readings,
            sensor_types = %message.sensor_types.join(","),
            "sensor message received"
        );
    }

    state.store.add_bounded(message.clone(), state.config.store.max_messages);

    tokio::spawn(persist(state.sink.clone(), state.archive.clone(), message, body));

    debug!(elapsed_ms = started.elapsed().as_millis() as u64, "ingest done");
    (StatusCode::OK, "data received").into_response()
}

/// best-effort durable copies on blocking workers; failures are only logged
async fn persist(
    sink: Arc<dyn PersistenceSink>,
    archive: Option<Arc<RawArchive>>,
    message: Arc<NormalizedMessage>,
    body: Bytes,
) {
    let device_id = message.device_id.clone();
    let message_id = message.message_id;
    let received_at = message.received_at;

    match tokio::task::spawn_blocking(move || sink.save(&message)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(%device_id, message_id, error = ?e, "failed to persist message"),
        Err(e) => error!(%device_id, message_id, error = %e, "persist task failed"),
    }

    let Some(archive) = archive else { return };
    match tokio::task::spawn_blocking(move || archive.save(&body, received_at)).await {
        Ok(Ok(path)) => debug!(%device_id, message_id, path = %path.display(), "raw body archived"),
        Ok(Err(e)) => error!(%device_id, message_id, error = ?e, "failed to archive raw body"),
        Err(e) => error!(%device_id, message_id, error = %e, "archive task failed"),
    }
}

// ==============================================================================
// html
// ==============================================================================

async fn index_handler(State(state): State<AppState>) -> Html<String> {
    let last_received = state.store.latest_one().map(|m| m.received_at);
    Html(dashboard::render_index(state.store.len(), last_received))
}

pub async fn dashboard_handler(State(state): State<AppState>) -> Html<String> {
    let data = DashboardData::collect(&state.store);
    Html(dashboard::render_dashboard(&data))
}

// ==============================================================================
// json api - in-memory window
// ==============================================================================

pub async fn api_data_handler(State(state): State<AppState>) -> Json<Vec<Arc<NormalizedMessage>>> {
    Json(state.store.snapshot())
}

#[derive(Debug, Deserialize)]
pub struct LatestParams {
    n: Option<usize>,
}

pub async fn api_latest_handler(
    State(state): State<AppState>,
    Query(params): Query<LatestParams>,
) -> Json<Vec<Arc<NormalizedMessage>>> {
    Json(state.store.latest(params.n.unwrap_or(DEFAULT_LATEST)))
}

// ==============================================================================
// json api - persisted data
// ==============================================================================

/// raw strings so a bad limit falls back to the default instead of a 400
#[derive(Debug, Default, Deserialize)]
pub struct DbDataParams {
    limit: Option<String>,
    device: Option<String>,
    sensor: Option<String>,
}

impl DbDataParams {
    fn into_query(self) -> SinkQuery {
        let limit = self
            .limit
            .and_then(|l| l.parse::<usize>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_DB_LIMIT);
        SinkQuery {
            limit,
            device_id: self.device.filter(|d| !d.is_empty()),
            sensor_type: self.sensor.filter(|s| !s.is_empty()),
        }
    }
}

/// run a blocking sink call and map failure to a 500
async fn sink_call<T, F>(sink: Arc<dyn PersistenceSink>, op: &'static str, f: F) -> Result<T, (StatusCode, String)>
where
    T: Send + 'static,
    F: FnOnce(&dyn PersistenceSink) -> Result<T> + Send + 'static,
{
    let started = Instant::now();
    let result = tokio::task::spawn_blocking(move || f(sink.as_ref()))
        .await
        .map_err(anyhow::Error::from)
        .and_then(|r| r);

    match result {
        Ok(value) => {
            debug!(op, elapsed_ms = started.elapsed().as_millis() as u64, "sink query ok");
            Ok(value)
        }
        Err(e) => {
            error!(op, error = ?e, "sink query failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, format!("{} failed", op)))
        }
    }
}

pub async fn db_data_handler(
    State(state): State<AppState>,
    Query(params): Query<DbDataParams>,
) -> Result<Json<Vec<NormalizedMessage>>, (StatusCode, String)> {
    let query = params.into_query();
    sink_call(state.sink, "query messages", move |sink| sink.query(&query))
        .await
        .map(Json)
}

pub async fn db_devices_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<DeviceInfo>>, (StatusCode, String)> {
    sink_call(state.sink, "query devices", |sink| sink.devices())
        .await
        .map(Json)
}

pub async fn db_stats_handler(
    State(state): State<AppState>,
) -> Result<Json<SinkStats>, (StatusCode, String)> {
    sink_call(state.sink, "query stats", |sink| sink.stats())
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::NullSink;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    const BODY: &str = r#"{"messageId":27,"sessionId":"s","deviceId":"d","payload":[{"name":"accelerometer","values":{"x":-0.0328,"y":-0.0049,"z":0.0891},"accuracy":3,"time":1751729987437545000}]}"#;

    /// counts saves, optionally slow or failing every one of them
    #[derive(Default)]
    struct CountingSink {
        saves: AtomicUsize,
        fail: bool,
        delay: Duration,
    }

    impl CountingSink {
        fn saves(&self) -> usize {
            self.saves.load(Ordering::SeqCst)
        }
    }

    impl PersistenceSink for CountingSink {
        fn save(&self, _message: &NormalizedMessage) -> Result<()> {
            std::thread::sleep(self.delay);
            self.saves.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(anyhow!("disk on fire"));
            }
            Ok(())
        }

        fn query(&self, _query: &SinkQuery) -> Result<Vec<NormalizedMessage>> {
            Err(anyhow!("unavailable"))
        }

        fn devices(&self) -> Result<Vec<DeviceInfo>> {
            Ok(Vec::new())
        }

        fn stats(&self) -> Result<SinkStats> {
            Ok(SinkStats::default())
        }
    }

    fn state_with(sink: Arc<dyn PersistenceSink>, max_messages: usize) -> AppState {
        let mut config = HostConfig::default();
        config.store.max_messages = max_messages;
        config.logging.show_sensor_data = false;
        config.storage.archive_raw = false;
        AppState::new(config, sink)
    }

    /// persistence is detached from the response, so poll for it
    async fn wait_until<F: Fn() -> bool>(done: F) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(done());
    }

    #[tokio::test]
    async fn test_ingest_ok() {
        let sink = Arc::new(CountingSink::default());
        let state = state_with(sink.clone(), 100);

        let resp = ingest_handler(State(state.clone()), Bytes::from_static(BODY.as_bytes())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.store.len(), 1);
        wait_until(|| sink.saves() == 1).await;

        let Json(latest) = api_latest_handler(State(state), Query(LatestParams { n: None })).await;
        assert_eq!(latest[0].sensor_types, ["accelerometer"]);
    }

    #[tokio::test]
    async fn test_slow_sink_does_not_delay_response() {
        let sink = Arc::new(CountingSink { delay: Duration::from_millis(1500), ..Default::default() });
        let state = state_with(sink.clone(), 100);

        let started = Instant::now();
        let resp = ingest_handler(State(state.clone()), Bytes::from_static(BODY.as_bytes())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(started.elapsed() < Duration::from_millis(500));
        assert_eq!(state.store.len(), 1);

        wait_until(|| sink.saves() == 1).await;
    }

    #[tokio::test]
    async fn test_ingest_rejects_bad_json() {
        let state = state_with(Arc::new(NullSink), 100);
        let resp = ingest_handler(State(state.clone()), Bytes::from_static(b"{oops")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert!(state.store.is_empty());
    }

    #[tokio::test]
    async fn test_sink_failure_does_not_fail_ingest() {
        let sink = Arc::new(CountingSink { fail: true, ..Default::default() });
        let state = state_with(sink.clone(), 100);

        let resp = ingest_handler(State(state.clone()), Bytes::from_static(BODY.as_bytes())).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.store.len(), 1);
        wait_until(|| sink.saves() == 1).await;
    }

    #[tokio::test]
    async fn test_ingest_trims_to_cap() {
        let state = state_with(Arc::new(NullSink), 3);
        for id in 0..5 {
            let body = BODY.replace("\"messageId\":27", &format!("\"messageId\":{}", id));
            ingest_handler(State(state.clone()), Bytes::from(body)).await;
        }

        let Json(all) = api_data_handler(State(state)).await;
        let ids: Vec<_> = all.iter().map(|m| m.message_id).collect();
        assert_eq!(ids, [2, 3, 4]);
    }

    #[tokio::test]
    async fn test_concurrent_ingest() {
        let state = state_with(Arc::new(NullSink), 1000);
        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let state = state.clone();
                tokio::spawn(async move {
                    ingest_handler(State(state), Bytes::from_static(BODY.as_bytes())).await
                })
            })
            .collect();

        for t in tasks {
            assert_eq!(t.await.unwrap().status(), StatusCode::OK);
        }
        assert_eq!(state.store.len(), 32);
    }

    #[tokio::test]
    async fn test_db_handlers() {
        let state = state_with(Arc::new(CountingSink::default()), 100);

        let err = db_data_handler(State(state.clone()), Query(DbDataParams::default()))
            .await
            .unwrap_err();
        assert_eq!(err.0, StatusCode::INTERNAL_SERVER_ERROR);

        assert!(db_devices_handler(State(state.clone())).await.is_ok());
        let Json(stats) = db_stats_handler(State(state)).await.unwrap();
        assert_eq!(stats.total_messages, 0);
    }

    #[test]
    fn test_db_params() {
        let q = DbDataParams { limit: Some("-3".into()), device: Some(String::new()), sensor: Some("gps".into()) }
            .into_query();
        assert_eq!(q.limit, DEFAULT_DB_LIMIT);
        assert_eq!(q.device_id, None);
        assert_eq!(q.sensor_type.as_deref(), Some("gps"));

        let q = DbDataParams { limit: Some("7".into()), ..Default::default() }.into_query();
        assert_eq!(q.limit, 7);
    }

    #[tokio::test]
    async fn test_dashboard_renders() {
        let state = state_with(Arc::new(NullSink), 100);
        ingest_handler(State(state.clone()), Bytes::from_static(BODY.as_bytes())).await;

        let Html(html) = dashboard_handler(State(state)).await;
        assert!(html.contains("X-axis acceleration"));
        assert!(html.contains("-0.032800"));
    }

    #[tokio::test]
    async fn test_raw_body_archived() {
        let dir = std::env::temp_dir().join(format!("sensor-hub-web-archive-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);

        let mut config = HostConfig::default();
        config.logging.show_sensor_data = false;
        config.storage.data_dir = dir.clone();
        let state = AppState::new(config, Arc::new(NullSink));
        let raw_dir = dir.join("raw");

        let resp = ingest_handler(State(state.clone()), Bytes::from_static(BODY.as_bytes())).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let count = || std::fs::read_dir(&raw_dir).map(|d| d.count()).unwrap_or(0);
        wait_until(|| count() == 1).await;
        let entry = std::fs::read_dir(&raw_dir).unwrap().next().unwrap().unwrap();
        assert_eq!(std::fs::read(entry.path()).unwrap(), BODY.as_bytes());

        // rejected bodies are not archived
        ingest_handler(State(state), Bytes::from_static(b"{oops")).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    async fn send(addr: std::net::SocketAddr, request: &str) -> String {
        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn test_router_logs_each_request() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state_with(Arc::new(NullSink), 100));
        tokio::spawn(async move { axum::serve(listener, app).await });

        let post = format!(
            "POST /data HTTP/1.1\r\nHost: localhost\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            BODY.len(),
            BODY
        );
        assert!(send(addr, &post).await.starts_with("HTTP/1.1 200"));

        let get = "GET /api/data HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let response = send(addr, get).await;
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"messageId\":27"));

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        let finished: Vec<_> = logs.lines().filter(|l| l.contains("finished processing request")).collect();
        assert_eq!(finished.len(), 2);
        assert!(finished[0].contains("/data") && finished[0].contains("status=200"));
        assert!(finished[1].contains("/api/data") && finished[1].contains("status=200"));
        assert!(finished.iter().all(|l| l.contains("latency=")));
    }
}
