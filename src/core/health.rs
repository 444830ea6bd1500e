use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub last_cycle_at: Option<chrono::DateTime<chrono::Utc>>,
    pub components: ComponentHealth,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub database: bool,
    pub ebay_api: bool,
    pub notifier: bool,
    #[serde(flatten)]
    pub extra: HashMap<String, bool>,
}

#[derive(Clone)]
pub struct HealthChecker {
    start_time: std::time::Instant,
    status: Arc<RwLock<ComponentHealth>>,
    last_cycle_at: Arc<RwLock<Option<chrono::DateTime<chrono::Utc>>>>,
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            start_time: std::time::Instant::now(),
            status: Arc::new(RwLock::new(ComponentHealth::default())),
            last_cycle_at: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn get_status(&self) -> HealthStatus {
        let components = self.status.read().await.clone();

        HealthStatus {
            status: if components.ebay_api && components.database {
                "healthy".to_string()
            } else {
                "degraded".to_string()
            },
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            last_cycle_at: *self.last_cycle_at.read().await,
            components,
        }
    }

    pub async fn update_component(&self, component: &str, healthy: bool) {
        let mut status = self.status.write().await;
        match component {
            "database" => status.database = healthy,
            "ebay_api" => status.ebay_api = healthy,
            "notifier" => status.notifier = healthy,
            _ => {
                status.extra.insert(component.to_string(), healthy);
            }
        }
    }

    pub async fn mark_cycle(&self, at: chrono::DateTime<chrono::Utc>) {
        *self.last_cycle_at.write().await = Some(at);
    }
}
