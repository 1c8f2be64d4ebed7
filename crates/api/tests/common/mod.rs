#![allow(dead_code)]

use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use futures::{SinkExt, StreamExt};
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

use arttic_api::config::{AcceleratorKind, ServerConfig};
use arttic_api::notifications::NotificationRouter;
use arttic_api::router::build_app_router;
use arttic_api::state::AppState;
use arttic_api::ws::ConnectionRegistry;
use arttic_core::model::ModelResolver;
use arttic_events::EventBus;
use arttic_pipeline::{PipelineManager, SimulatedBackend, SimulatorProbe};
use arttic_worker::{ImageStore, JobExecutor, LocalImageStore};

/// Models created in every test catalog.
pub const MODELS: &[&str] = &["sd15-A", "sdxl-base"];
pub const LORAS: &[&str] = &["detail"];

/// Build a test `ServerConfig` rooted at `root`.
pub fn test_config(root: &Path, step_delay_ms: u64) -> ServerConfig {
    ServerConfig {
        host: Ipv4Addr::LOCALHOST.into(),
        port: 0,
        cors_origins: vec!["http://localhost:7860".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        models_dir: root.join("models"),
        loras_dir: root.join("loras"),
        outputs_dir: root.join("outputs"),
        hf_token: None,
        accelerator: AcceleratorKind::Simulated,
        step_delay_ms,
    }
}

/// A fully wired application over the simulated backend, with its own
/// temporary model catalog and outputs directory.
pub struct TestApp {
    pub dir: TempDir,
    pub config: ServerConfig,
    pub state: AppState,
    pub probe: Arc<SimulatorProbe>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with_step_delay(0)
    }

    /// `step_delay_ms` slows every denoising step, to keep jobs in flight.
    pub fn with_step_delay(step_delay_ms: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config(dir.path(), step_delay_ms);

        std::fs::create_dir_all(&config.models_dir).unwrap();
        std::fs::create_dir_all(&config.loras_dir).unwrap();
        for id in MODELS {
            std::fs::write(config.models_dir.join(format!("{id}.safetensors")), id.as_bytes()).unwrap();
        }
        for id in LORAS {
            std::fs::write(config.loras_dir.join(format!("{id}.safetensors")), id.as_bytes()).unwrap();
        }

        let store: Arc<dyn ImageStore> = Arc::new(LocalImageStore::new(&config.outputs_dir).unwrap());
        let bus = Arc::new(EventBus::default());
        let backend = SimulatedBackend::new(config.simulator_config());
        let probe = backend.probe();
        let (executor, _thread) = JobExecutor::spawn(
            PipelineManager::new(backend, None),
            Arc::clone(&store),
            Arc::clone(&bus),
        )
        .unwrap();

        let registry = Arc::new(ConnectionRegistry::new());
        tokio::spawn(NotificationRouter::new(Arc::clone(&registry)).run(bus.subscribe()));

        let state = AppState {
            config: Arc::new(config.clone()),
            registry,
            executor,
            store,
            resolver: ModelResolver::new(&config.models_dir),
        };

        Self {
            dir,
            config,
            state,
            probe,
        }
    }

    pub fn router(&self) -> Router {
        build_app_router(self.state.clone(), &self.config)
    }

    /// Serve the app on an ephemeral port and return its address.
    pub async fn serve(&self) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = self.router();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self.state.executor.shutdown();
    }
}

// ---------------------------------------------------------------------------
// HTTP helpers
// ---------------------------------------------------------------------------

pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_json(response: Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn get_json(app: Router, uri: &str) -> Value {
    let response = get(app, uri).await;
    assert_eq!(response.status(), StatusCode::OK, "GET {uri}");
    body_json(response).await
}

// ---------------------------------------------------------------------------
// WebSocket client
// ---------------------------------------------------------------------------

const RECV_TIMEOUT: Duration = Duration::from_secs(10);

/// A WebSocket client speaking the `{action, payload}` / `{type, data}`
/// protocol.
pub struct WsClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl WsClient {
    /// Connect and consume the greeting (`model_status`, `gallery_updated`).
    pub async fn connect(addr: SocketAddr) -> Self {
        let (stream, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        let mut client = Self { stream };
        assert_eq!(client.recv().await["type"], "model_status");
        client.recv_until("gallery_updated").await;
        client
    }

    pub async fn send(&mut self, action: &str, payload: Value) {
        let text = serde_json::json!({ "action": action, "payload": payload }).to_string();
        self.send_raw(&text).await;
    }

    pub async fn send_raw(&mut self, text: &str) {
        self.stream.send(WsMessage::Text(text.to_string())).await.unwrap();
    }

    /// Next JSON message, skipping control frames.
    pub async fn recv(&mut self) -> Value {
        loop {
            let frame = tokio::time::timeout(RECV_TIMEOUT, self.stream.next())
                .await
                .expect("timed out waiting for a message")
                .expect("connection closed")
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    /// Next message of type `msg_type`, collecting those skipped on the way.
    pub async fn recv_until(&mut self, msg_type: &str) -> (Value, Vec<Value>) {
        let mut skipped = Vec::new();
        loop {
            let msg = self.recv().await;
            if msg["type"] == msg_type {
                return (msg, skipped);
            }
            skipped.push(msg);
        }
    }

    /// Next message that is a reply to this client, skipping broadcasts
    /// (`model_status`, `gallery_updated`) and progress updates.
    pub async fn recv_reply(&mut self) -> Value {
        loop {
            let msg = self.recv().await;
            match msg["type"].as_str() {
                Some("model_status" | "gallery_updated" | "progress_update") => continue,
                _ => return msg,
            }
        }
    }

    pub async fn close(mut self) {
        let _ = self.stream.close(None).await;
    }
}
