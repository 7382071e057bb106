use crate::{ApiData, MockApi, MockBroker};
use axum::Router;

/// Handle to a running mock backend
pub struct TestServer {
    pub base_url: String,
    pub ws_url: String,
    pub broker: MockBroker,
    pub api: MockApi,
    _shutdown_tx: tokio::sync::oneshot::Sender<()>,
}

impl TestServer {
    /// Start an empty mock backend on a random available port
    pub async fn start() -> anyhow::Result<Self> {
        Self::with_data(ApiData::default()).await
    }

    /// Start a mock backend serving `data`
    ///
    /// This spawns one axum server with:
    /// - the STOMP broker on `/ws`
    /// - the REST API under `/api`
    ///
    /// The server runs in the background and will shutdown when dropped.
    pub async fn with_data(data: ApiData) -> anyhow::Result<Self> {
        let broker = MockBroker::new();
        let api = MockApi::new(data);

        let app = Router::new().merge(broker.routes()).merge(api.routes());

        // Bind to random available port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let base_url = format!("http://{}", addr);
        let ws_url = format!("ws://{}/ws", addr);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await;
            if let Err(e) = result {
                tracing::error!(error = %e, "mock backend stopped");
            }
        });

        Ok(Self {
            base_url,
            ws_url,
            broker,
            api,
            _shutdown_tx: shutdown_tx,
        })
    }

    /// Build full HTTP URL for a path
    ///
    /// # Example
    /// ```rust,ignore
    /// let url = server.url("/api/health");
    /// let response = reqwest::get(&url).await?;
    /// ```
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}
