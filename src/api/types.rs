use serde::{Deserialize, Serialize};

use crate::monitoring::ListingRecord;

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

/// Browse API `item_summary/search` response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPagedCollection {
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub item_summaries: Vec<ItemSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSummary {
    pub item_id: String,
    #[serde(default)]
    pub title: String,
    pub price: Option<Amount>,
    pub image: Option<Image>,
    pub condition: Option<String>,
    pub item_web_url: Option<String>,
    pub seller: Option<SellerSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Amount {
    pub value: String,
    pub currency: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub image_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SellerSummary {
    pub username: Option<String>,
    pub feedback_score: Option<i64>,
    pub feedback_percentage: Option<String>,
}

impl ItemSummary {
    /// Maps the summary onto the record the change detector compares.
    pub fn into_listing(self, seller: Option<&str>) -> ListingRecord {
        let seller_name = seller
            .map(str::to_string)
            .or_else(|| self.seller.as_ref().and_then(|s| s.username.clone()))
            .unwrap_or_default();

        ListingRecord {
            item_id: self.item_id,
            seller: seller_name,
            title: self.title,
            price: self.price.as_ref().and_then(|p| p.value.parse().ok()),
            currency: self.price.map(|p| p.currency),
            image: self.image.map(|i| i.image_url),
            condition: self.condition,
            url: self.item_web_url,
            seller_feedback_score: self.seller.as_ref().and_then(|s| s.feedback_score),
            seller_feedback_percentage: self
                .seller
                .as_ref()
                .and_then(|s| s.feedback_percentage.as_deref())
                .and_then(|p| p.parse().ok()),
        }
    }
}
