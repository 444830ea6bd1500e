use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::listing::ListingRecord;
use super::notifier::{DeliveryReceipt, Notifier};
use crate::api::ListingSource;
use crate::core::config::HotProductsConfig;
use crate::core::{MonitorError, MonitorResult};

const SEARCH_LIMIT: u32 = 5;
const PER_KEYWORD: usize = 3;
const MAX_PRODUCTS: usize = 8;
const LONG_TITLE_CHARS: usize = 50;
const PREMIUM_BRANDS: [&str; 7] = [
    "apple",
    "samsung",
    "sony",
    "nintendo",
    "tesla",
    "microsoft",
    "google",
];

/// A newly listed item picked for the digest mail.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotProduct {
    pub rank: usize,
    /// The keyword the item was found under.
    pub category: String,
    pub score: u32,
    pub item_id: String,
    pub title: String,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub image: Option<String>,
    pub url: Option<String>,
    pub condition: Option<String>,
    pub seller: String,
}

impl HotProduct {
    fn from_listing(category: &str, score: u32, listing: ListingRecord) -> Self {
        Self {
            rank: 0,
            category: category.to_string(),
            score,
            item_id: listing.item_id,
            title: listing.title,
            price: listing.price,
            currency: listing.currency,
            image: listing.image,
            url: listing.url,
            condition: listing.condition,
            seller: listing.seller,
        }
    }
}

/// How interesting a listing looks: price tiers, a descriptive title, a
/// picture, a premium brand and new condition all add points.
pub fn score_listing(listing: &ListingRecord) -> u32 {
    let mut score = 0;

    let price = listing.price.unwrap_or(0.0);
    if price > 100.0 {
        score += 2;
    }
    if price > 500.0 {
        score += 2;
    }
    if price > 1000.0 {
        score += 3;
    }

    if listing.title.chars().count() > LONG_TITLE_CHARS {
        score += 2;
    }

    if listing.image.is_some() {
        score += 1;
    }

    let title = listing.title.to_lowercase();
    if PREMIUM_BRANDS.iter().any(|brand| title.contains(brand)) {
        score += 3;
    }

    if listing
        .condition
        .as_deref()
        .is_some_and(|c| c.eq_ignore_ascii_case("new"))
    {
        score += 2;
    }

    score
}

/// Takes the first few results of every keyword, drops those without a price
/// or title, and keeps the best scored. Equal scores keep search order.
pub fn rank_hot_products(found: Vec<(String, Vec<ListingRecord>)>) -> Vec<HotProduct> {
    let mut products: Vec<HotProduct> = found
        .into_iter()
        .flat_map(|(keyword, listings)| {
            listings
                .into_iter()
                .take(PER_KEYWORD)
                .filter(|l| l.price.is_some() && !l.title.is_empty())
                .map(move |l| HotProduct::from_listing(&keyword, score_listing(&l), l))
        })
        .collect();

    products.sort_by(|a, b| b.score.cmp(&a.score));
    products.truncate(MAX_PRODUCTS);
    for (index, product) in products.iter_mut().enumerate() {
        product.rank = index + 1;
    }

    products
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotProductsSummary {
    pub count: usize,
    /// Distinct categories in rank order.
    pub categories: Vec<String>,
    /// Sum of prices with two decimals.
    pub total_value: String,
}

impl HotProductsSummary {
    pub fn of(products: &[HotProduct]) -> Self {
        let mut categories: Vec<String> = Vec::new();
        for product in products {
            if !categories.contains(&product.category) {
                categories.push(product.category.clone());
            }
        }

        let total: f64 = products.iter().filter_map(|p| p.price).sum();

        Self {
            count: products.len(),
            categories,
            total_value: format!("{:.2}", total),
        }
    }
}

/// Outcome of the mail step; a failed send does not fail the digest.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<MonitorResult<DeliveryReceipt>> for EmailResult {
    fn from(result: MonitorResult<DeliveryReceipt>) -> Self {
        match result {
            Ok(receipt) => Self {
                success: true,
                channel: Some(receipt.channel),
                message_id: receipt.message_id,
                error: None,
            },
            Err(e) => Self {
                success: false,
                channel: None,
                message_id: None,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HotProductsReport {
    pub timestamp: DateTime<Utc>,
    pub keywords: Vec<String>,
    pub hot_products: HotProductsSummary,
    pub products: Vec<HotProduct>,
    pub email_result: EmailResult,
}

/// Searches the newest listings for a rotating set of keywords and mails
/// the highest scored ones.
pub struct HotProductsDigest {
    source: Arc<dyn ListingSource>,
    notifier: Arc<dyn Notifier>,
    keywords: Vec<String>,
    keywords_per_run: usize,
    next_keyword: AtomicUsize,
}

impl HotProductsDigest {
    pub fn new(
        source: Arc<dyn ListingSource>,
        notifier: Arc<dyn Notifier>,
        config: HotProductsConfig,
    ) -> Self {
        Self {
            source,
            notifier,
            keywords: config.keywords,
            keywords_per_run: config.keywords_per_run.max(1),
            next_keyword: AtomicUsize::new(0),
        }
    }

    /// The keywords for this run, continuing where the previous run stopped.
    pub fn next_keywords(&self) -> Vec<String> {
        if self.keywords.is_empty() {
            return Vec::new();
        }

        let count = self.keywords_per_run.min(self.keywords.len());
        let start = self.next_keyword.fetch_add(count, Ordering::Relaxed);

        (0..count)
            .map(|i| self.keywords[(start + i) % self.keywords.len()].clone())
            .collect()
    }

    /// A keyword whose search fails is skipped; missing or rejected
    /// credentials fail the whole search.
    pub async fn find(&self, keywords: &[String]) -> MonitorResult<Vec<HotProduct>> {
        let mut found = Vec::with_capacity(keywords.len());

        for keyword in keywords {
            match self.source.search_newly_listed(keyword, SEARCH_LIMIT).await {
                Ok(listings) => found.push((keyword.clone(), listings)),
                Err(e @ (MonitorError::MissingCredentials | MonitorError::Token(_))) => {
                    return Err(e)
                }
                Err(e) => {
                    tracing::warn!("⚠️  Hot products search for '{}' failed: {}", keyword, e)
                }
            }
        }

        Ok(rank_hot_products(found))
    }

    pub async fn run(&self, recipient: Option<String>) -> MonitorResult<HotProductsReport> {
        let keywords = self.next_keywords();
        tracing::info!("🔥 Searching hot products for: {}", keywords.join(", "));

        let products = self.find(&keywords).await?;
        if products.is_empty() {
            return Err(MonitorError::NoHotProducts);
        }
        tracing::info!("Found {} hot products", products.len());

        let delivery = self.notifier.notify_hot_products(&products, recipient).await;
        if let Err(e) = &delivery {
            tracing::error!("❌ Hot products mail failed: {}", e);
        }

        Ok(HotProductsReport {
            timestamp: Utc::now(),
            keywords,
            hot_products: HotProductsSummary::of(&products),
            products,
            email_result: delivery.into(),
        })
    }
}
