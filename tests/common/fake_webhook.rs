//! Fake alert webhook for integration tests.
//!
//! Spins up a minimal `axum` HTTP server on a random TCP port bound to
//! 127.0.0.1. Serves `POST /hook`, recording every JSON body and answering
//! with a configurable status.
//!
//! # Example
//!
//! ```rust,no_run
//! let hook = FakeWebhook::start(StatusCode::OK).await.unwrap();
//! let sink = WebhookSink::new(&hook.url(), Duration::from_secs(5)).unwrap();
//! // ... trigger an alert ...
//! let bodies = hook.wait_for(1, Duration::from_secs(2)).await;
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

struct HookState {
    status: StatusCode,
    bodies: Vec<serde_json::Value>,
}

/// Handle to the running fake webhook.
pub struct FakeWebhook {
    addr: SocketAddr,
    state: Arc<Mutex<HookState>>,
}

impl FakeWebhook {
    /// Start the receiver on a random port. Returns once it is listening.
    pub async fn start(status: StatusCode) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(Mutex::new(HookState {
            status,
            bodies: Vec::new(),
        }));

        let app = Router::new()
            .route("/hook", post(receive))
            .with_state(state.clone());

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Ok(Self { addr, state })
    }

    /// Full hook URL (e.g. `http://127.0.0.1:PORT/hook`).
    pub fn url(&self) -> String {
        format!("http://{}/hook", self.addr)
    }

    pub async fn bodies(&self) -> Vec<serde_json::Value> {
        self.state.lock().await.bodies.clone()
    }

    /// Poll until at least `n` bodies arrived or `timeout` elapsed.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> Vec<serde_json::Value> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let bodies = self.bodies().await;
            if bodies.len() >= n || tokio::time::Instant::now() >= deadline {
                return bodies;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

async fn receive(
    State(state): State<Arc<Mutex<HookState>>>,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let mut state = state.lock().await;
    state.bodies.push(body);
    state.status
}
