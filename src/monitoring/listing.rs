use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// One seller listing as observed during a monitoring cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingRecord {
    pub item_id: String,
    pub seller: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
    #[serde(default, alias = "itemWebUrl")]
    pub url: Option<String>,
    #[serde(default)]
    pub seller_feedback_score: Option<i64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub seller_feedback_percentage: Option<f64>,
}

impl ListingRecord {
    pub fn new(
        item_id: impl Into<String>,
        seller: impl Into<String>,
        title: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            seller: seller.into(),
            title: title.into(),
            price: None,
            currency: None,
            image: None,
            condition: None,
            url: None,
            seller_feedback_score: None,
            seller_feedback_percentage: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn with_feedback_percentage(mut self, percentage: f64) -> Self {
        self.seller_feedback_percentage = Some(percentage);
        self
    }
}

/// Listings of every monitored seller at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, alias = "products")]
    pub listings: Vec<ListingRecord>,
}

impl Snapshot {
    pub fn new(timestamp: DateTime<Utc>, listings: Vec<ListingRecord>) -> Self {
        Self {
            timestamp: Some(timestamp),
            listings,
        }
    }

    /// The snapshot used when nothing has been stored yet.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_first_run(&self) -> bool {
        self.timestamp.is_none() && self.listings.is_empty()
    }
}

/// A snapshot together with the row version it was read at.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoredSnapshot {
    pub version: i64,
    pub snapshot: Snapshot,
}

impl StoredSnapshot {
    pub fn empty() -> Self {
        Self::default()
    }
}

// Older rows carry eBay's string amounts ("499.99").
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrText {
        Number(f64),
        Text(String),
    }

    Ok(match Option::<NumberOrText>::deserialize(deserializer)? {
        Some(NumberOrText::Number(n)) => Some(n),
        Some(NumberOrText::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}
