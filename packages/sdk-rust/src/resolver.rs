//! Backend address resolution
//!
//! A locally running backend wins when it answers a health probe within the
//! probe timeout; otherwise the configured remote base is used. The answer is
//! computed once per resolver and shared by every caller.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use url::Url;

use crate::error::{SdkError, SdkResult};
use crate::logger::Logger;

fn default_local_base() -> String {
    "http://localhost:8080".to_string()
}

fn default_probe_path() -> String {
    "/api/health".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    1500
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolverConfig {
    #[serde(default = "default_local_base")]
    pub local_base: String,
    pub remote_base: String,
    #[serde(default = "default_probe_path")]
    pub probe_path: String,
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
}

impl ResolverConfig {
    pub fn new(remote_base: impl Into<String>) -> Self {
        Self {
            local_base: default_local_base(),
            remote_base: remote_base.into(),
            probe_path: default_probe_path(),
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }

    pub fn with_local_base(mut self, local_base: impl Into<String>) -> Self {
        self.local_base = local_base.into();
        self
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    Local,
    Remote,
    Fixed,
}

/// Resolved REST base and the messaging endpoint derived from it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAddress {
    pub http_base: String,
    pub ws_endpoint: String,
    pub source: AddressSource,
}

impl BackendAddress {
    pub fn from_base(base: &str, source: AddressSource) -> SdkResult<Self> {
        Ok(Self {
            http_base: base.trim_end_matches('/').to_string(),
            ws_endpoint: messaging_endpoint(base)?,
            source,
        })
    }
}

/// `http(s)://host/prefix` → `ws(s)://host/prefix/ws`
pub fn messaging_endpoint(base: &str) -> SdkResult<String> {
    let mut url = Url::parse(base)
        .map_err(|e| SdkError::ConnectionError(format!("invalid base address {:?}: {}", base, e)))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(SdkError::ConnectionError(format!(
                "unsupported scheme {:?} in {:?}",
                other, base
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| SdkError::ConnectionError(format!("cannot switch {:?} to {}", base, scheme)))?;

    let path = format!("{}/ws", url.path().trim_end_matches('/'));
    url.set_path(&path);
    Ok(url.to_string())
}

/// Liveness check against a candidate base address
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, url: &str) -> bool;
}

/// GET probe; any 2xx counts as alive
#[derive(Debug, Clone, Default)]
pub struct HttpProber {
    client: reqwest::Client,
}

impl HttpProber {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, url: &str) -> bool {
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

/// Memoizing resolver, shared by the REST client and the signaling client
pub struct AddressResolver {
    probe_url: String,
    probe_timeout: Duration,
    local: BackendAddress,
    remote: BackendAddress,
    prober: Arc<dyn Prober>,
    resolved: OnceCell<BackendAddress>,
    probes: AtomicUsize,
    logger: Arc<dyn Logger>,
}

impl AddressResolver {
    /// Validates both candidate bases up front so resolution itself cannot fail
    pub fn new(
        config: ResolverConfig,
        prober: Arc<dyn Prober>,
        logger: Arc<dyn Logger>,
    ) -> SdkResult<Self> {
        let local = BackendAddress::from_base(&config.local_base, AddressSource::Local)?;
        let remote = BackendAddress::from_base(&config.remote_base, AddressSource::Remote)?;
        Ok(Self {
            probe_url: format!("{}{}", local.http_base, config.probe_path),
            probe_timeout: config.probe_timeout(),
            local,
            remote,
            prober,
            resolved: OnceCell::new(),
            probes: AtomicUsize::new(0),
            logger,
        })
    }

    /// Resolver that never probes
    pub fn fixed(base: &str, logger: Arc<dyn Logger>) -> SdkResult<Self> {
        let address = BackendAddress::from_base(base, AddressSource::Fixed)?;
        Ok(Self {
            probe_url: String::new(),
            probe_timeout: Duration::ZERO,
            local: address.clone(),
            remote: address.clone(),
            prober: Arc::new(NeverProbe),
            resolved: OnceCell::new_with(Some(address)),
            probes: AtomicUsize::new(0),
            logger,
        })
    }

    pub async fn resolve(&self) -> BackendAddress {
        self.resolved
            .get_or_init(|| self.probe_once())
            .await
            .clone()
    }

    /// Address if resolution already happened
    pub fn resolved(&self) -> Option<&BackendAddress> {
        self.resolved.get()
    }

    /// Number of probes issued so far
    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::Relaxed)
    }

    async fn probe_once(&self) -> BackendAddress {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let alive = tokio::time::timeout(self.probe_timeout, self.prober.probe(&self.probe_url))
            .await
            .unwrap_or(false);

        if alive {
            self.logger
                .info(&format!("Using local backend {}", self.local.http_base));
            self.local.clone()
        } else {
            self.logger.debug(&format!(
                "Local probe {} failed, falling back to {}",
                self.probe_url, self.remote.http_base
            ));
            self.remote.clone()
        }
    }
}

struct NeverProbe;

#[async_trait]
impl Prober for NeverProbe {
    async fn probe(&self, _url: &str) -> bool {
        false
    }
}
