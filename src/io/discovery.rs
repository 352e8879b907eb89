//! Collector discovery polling
//!
//! The observer learns where to report by polling a discovery endpoint that
//! returns the collector's URL, API key and activation status. Reporting is
//! gated on the collector being active. Without a discovery URL the
//! configured collector is treated as always active.

use crate::infra::metrics::Metrics;
use parking_lot::RwLock;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Where and how to reach the collector right now
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorInfo {
    pub base_url: String,
    pub api_key: Option<String>,
    pub active: bool,
}

pub type SharedCollector = Arc<RwLock<CollectorInfo>>;

pub fn new_shared_collector(base_url: String, api_key: Option<String>, active: bool) -> SharedCollector {
    Arc::new(RwLock::new(CollectorInfo { base_url, api_key, active }))
}

/// Discovery endpoint response
#[derive(Debug, Deserialize)]
struct DiscoveryResponse {
    server_url: String,
    #[serde(default)]
    api_key: Option<String>,
    status: String,
}

/// Polls the discovery endpoint and keeps `SharedCollector` current
pub struct CollectorDiscovery {
    client: reqwest::Client,
    discovery_url: String,
    camera_id: String,
    interval: Duration,
    collector: SharedCollector,
    metrics: Arc<Metrics>,
}

impl CollectorDiscovery {
    pub fn new(
        discovery_url: String,
        camera_id: String,
        interval: Duration,
        request_timeout: Duration,
        collector: SharedCollector,
        metrics: Arc<Metrics>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();
        Self { client, discovery_url, camera_id, interval, collector, metrics }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            discovery_url = %self.discovery_url,
            interval_secs = %self.interval.as_secs(),
            "discovery_started"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("discovery_shutdown");
                        break;
                    }
                }
            }
        }
    }

    async fn poll_once(&self) {
        let url = format!("{}?camera_id={}", self.discovery_url, self.camera_id);
        let result = async {
            let response = self.client.get(&url).send().await?;
            response.error_for_status()?.json::<DiscoveryResponse>().await
        }
        .await;

        let was_active = self.collector.read().active;
        match result {
            Ok(discovered) => {
                let active = discovered.status == "active";
                {
                    let mut info = self.collector.write();
                    info.base_url = discovered.server_url;
                    info.api_key = discovered.api_key;
                    info.active = active;
                }
                self.metrics.set_collector_active(active);
                if active != was_active {
                    info!(active = %active, "collector_status_changed");
                } else {
                    debug!(active = %active, "discovery_poll_ok");
                }
            }
            Err(err) => {
                self.collector.write().active = false;
                self.metrics.set_collector_active(false);
                if was_active {
                    warn!(error = %err, "collector_unreachable");
                } else {
                    debug!(error = %err, "discovery_poll_failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_collector_defaults() {
        let shared = new_shared_collector("http://localhost:5800".to_string(), None, true);
        let info = shared.read().clone();
        assert!(info.active);
        assert_eq!(info.base_url, "http://localhost:5800");
    }

    #[test]
    fn test_discovery_response_parsing() {
        let json = r#"{"server_url":"http://10.0.0.5:5800","api_key":"secret","status":"active"}"#;
        let parsed: DiscoveryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.server_url, "http://10.0.0.5:5800");
        assert_eq!(parsed.api_key.as_deref(), Some("secret"));
        assert_eq!(parsed.status, "active");

        let json = r#"{"server_url":"http://10.0.0.5:5800","status":"paused"}"#;
        let parsed: DiscoveryResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.api_key.is_none());
        assert_ne!(parsed.status, "active");
    }
}
