use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::change_detector::{
    DiffSummary, ImageChange, NewListing, PriceChange, RatingChange, RemovedListing, TitleChange,
};
use super::hot_products::HotProduct;
use super::reporter::{MonitorReporter, MonitoringStats};
use crate::core::config::NotificationConfig;
use crate::core::{MonitorError, MonitorResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryReceipt {
    pub channel: String,
    pub message_id: Option<String>,
}

/// Delivers the outcome of a monitoring cycle.
///
/// Called once per cycle whether or not anything changed.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        changes: &DiffSummary,
        stats: &MonitoringStats,
    ) -> MonitorResult<DeliveryReceipt>;

    /// Sends the hot products digest, to `recipient` instead of the
    /// configured list when given.
    async fn notify_hot_products(
        &self,
        products: &[HotProduct],
        recipient: Option<String>,
    ) -> MonitorResult<DeliveryReceipt>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    SellerMonitorAlert,
    SellerMonitorStatus,
    HotProductsAlert,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    Info,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayPayload<'a, C> {
    pub changes: C,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub monitoring_stats: Option<&'a MonitoringStats>,
    pub email_type: EmailType,
    pub recipients: &'a [String],
    pub priority: Priority,
}

/// Hot products shaped like a diff so the relay can reuse its change template.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotProductsChanges<'a> {
    pub has_changes: bool,
    pub hot_products: &'a [HotProduct],
    pub price_changes: Vec<PriceChange>,
    pub new_listings: Vec<NewListing>,
    pub removed_listings: Vec<RemovedListing>,
    pub title_changes: Vec<TitleChange>,
    pub image_changes: Vec<ImageChange>,
    pub rating_changes: Vec<RatingChange>,
}

impl<'a> RelayPayload<'a, HotProductsChanges<'a>> {
    pub fn hot_products(products: &'a [HotProduct], recipients: &'a [String]) -> Self {
        Self {
            changes: HotProductsChanges {
                has_changes: true,
                hot_products: products,
                ..Default::default()
            },
            monitoring_stats: None,
            email_type: EmailType::HotProductsAlert,
            recipients,
            priority: Priority::Normal,
        }
    }
}

impl<'a> RelayPayload<'a, &'a DiffSummary> {
    pub fn new(
        changes: &'a DiffSummary,
        stats: &'a MonitoringStats,
        recipients: &'a [String],
    ) -> Self {
        let (email_type, priority) = if changes.has_changes {
            (EmailType::SellerMonitorAlert, Priority::Normal)
        } else {
            (EmailType::SellerMonitorStatus, Priority::Info)
        };

        Self {
            changes,
            monitoring_stats: Some(stats),
            email_type,
            recipients,
            priority,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, rename = "sendResult")]
    send_result: Option<SendResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SendResult {
    message_id: Option<String>,
}

/// Hands the diff to an HTTP email relay which renders and sends the mail.
pub struct EmailRelayNotifier {
    client: Client,
    relay_url: String,
    recipients: Vec<String>,
}

impl EmailRelayNotifier {
    pub fn new(relay_url: impl Into<String>, recipients: Vec<String>) -> Self {
        Self {
            client: Client::new(),
            relay_url: relay_url.into(),
            recipients,
        }
    }

    async fn send<C: Serialize + Sync>(
        &self,
        payload: &RelayPayload<'_, C>,
    ) -> MonitorResult<DeliveryReceipt> {
        tracing::info!(
            "Sending {:?} notification to {} recipient(s)",
            payload.email_type,
            payload.recipients.len()
        );

        let response = self.client.post(&self.relay_url).json(payload).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(MonitorError::Notification(format!(
                "relay returned {}: {}",
                status, body
            )));
        }

        let result: RelayResponse = response.json().await?;
        if !result.success {
            return Err(MonitorError::Notification(
                result.error.unwrap_or_else(|| "relay reported failure".to_string()),
            ));
        }

        Ok(DeliveryReceipt {
            channel: "email_relay".to_string(),
            message_id: result.send_result.and_then(|r| r.message_id),
        })
    }
}

#[async_trait]
impl Notifier for EmailRelayNotifier {
    async fn notify(
        &self,
        changes: &DiffSummary,
        stats: &MonitoringStats,
    ) -> MonitorResult<DeliveryReceipt> {
        self.send(&RelayPayload::new(changes, stats, &self.recipients)).await
    }

    async fn notify_hot_products(
        &self,
        products: &[HotProduct],
        recipient: Option<String>,
    ) -> MonitorResult<DeliveryReceipt> {
        let recipients = recipient.map(|r| vec![r]).unwrap_or_else(|| self.recipients.clone());
        self.send(&RelayPayload::hot_products(products, &recipients)).await
    }
}

/// Writes the summary to the log when no relay is configured.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        changes: &DiffSummary,
        stats: &MonitoringStats,
    ) -> MonitorResult<DeliveryReceipt> {
        let summary = MonitorReporter::format_summary(changes, stats);
        if changes.has_changes {
            tracing::warn!("{}", summary);
        } else {
            tracing::info!("{}", summary);
        }

        Ok(DeliveryReceipt {
            channel: "log".to_string(),
            message_id: None,
        })
    }

    async fn notify_hot_products(
        &self,
        products: &[HotProduct],
        _recipient: Option<String>,
    ) -> MonitorResult<DeliveryReceipt> {
        tracing::info!("🔥 {} hot products", products.len());
        for product in products {
            tracing::info!(
                "   #{} [{}] {} ({} {})",
                product.rank,
                product.category,
                product.title,
                product
                    .price
                    .map(|p| format!("{:.2}", p))
                    .unwrap_or_else(|| "-".to_string()),
                product.currency.as_deref().unwrap_or("USD")
            );
        }

        Ok(DeliveryReceipt {
            channel: "log".to_string(),
            message_id: None,
        })
    }
}

pub fn from_config(config: &NotificationConfig) -> Arc<dyn Notifier> {
    match &config.relay_url {
        Some(url) => Arc::new(EmailRelayNotifier::new(url.clone(), config.recipients.clone())),
        None => {
            tracing::warn!("NOTIFY_RELAY_URL not set, notifications go to the log only");
            Arc::new(LogNotifier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_payload_type_follows_changes() {
        let stats = MonitoringStats::first_run(Utc::now());
        let recipients = vec!["ops@example.com".to_string()];

        let quiet = DiffSummary::default();
        let payload = serde_json::to_value(RelayPayload::new(&quiet, &stats, &recipients)).unwrap();
        assert_eq!(payload["emailType"], "seller_monitor_status");
        assert_eq!(payload["priority"], "info");
        assert_eq!(payload["monitoringStats"]["totalChecks"], 1);

        let busy = DiffSummary {
            has_changes: true,
            ..Default::default()
        };
        let payload = serde_json::to_value(RelayPayload::new(&busy, &stats, &recipients)).unwrap();
        assert_eq!(payload["emailType"], "seller_monitor_alert");
        assert_eq!(payload["priority"], "normal");
        assert_eq!(payload["recipients"][0], "ops@example.com");
    }

    #[test]
    fn test_hot_products_payload_reuses_change_layout() {
        let products = vec![HotProduct {
            rank: 1,
            category: "iPhone 15".to_string(),
            score: 7,
            item_id: "1".to_string(),
            title: "Apple iPhone 15".to_string(),
            price: Some(799.0),
            currency: Some("USD".to_string()),
            image: None,
            url: None,
            condition: Some("New".to_string()),
            seller: "cellfc".to_string(),
        }];
        let recipients = vec!["me@example.com".to_string()];

        let payload =
            serde_json::to_value(RelayPayload::hot_products(&products, &recipients)).unwrap();
        assert_eq!(payload["emailType"], "hot_products_alert");
        assert_eq!(payload["priority"], "normal");
        assert_eq!(payload["changes"]["hasChanges"], true);
        assert_eq!(payload["changes"]["hotProducts"][0]["rank"], 1);
        assert!(payload["changes"]["priceChanges"].as_array().unwrap().is_empty());
        assert!(payload.get("monitoringStats").is_none());
    }

    #[tokio::test]
    async fn test_log_notifier_always_delivers() {
        let receipt = LogNotifier
            .notify(&DiffSummary::default(), &MonitoringStats::first_run(Utc::now()))
            .await
            .unwrap();
        assert_eq!(receipt.channel, "log");
        assert!(receipt.message_id.is_none());
    }

    #[test]
    fn test_relay_response_parsing() {
        let ok: RelayResponse =
            serde_json::from_str(r#"{"success": true, "sendResult": {"message_id": "abc"}}"#)
                .unwrap();
        assert!(ok.success);
        assert_eq!(ok.send_result.and_then(|r| r.message_id).as_deref(), Some("abc"));

        let failed: RelayResponse =
            serde_json::from_str(r#"{"success": false, "error": "quota"}"#).unwrap();
        assert!(!failed.success);
        assert_eq!(failed.error.as_deref(), Some("quota"));
    }
}
