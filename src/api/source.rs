use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::core::MonitorResult;
use crate::monitoring::ListingRecord;

/// Where current listings come from.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ListingSource: Send + Sync {
    /// Listings of one seller matching `query`, tagged with that seller.
    async fn search_items_by_seller(
        &self,
        seller: &str,
        query: &str,
    ) -> MonitorResult<Vec<ListingRecord>>;

    /// Unfiltered keyword search.
    async fn search_items(&self, query: &str) -> MonitorResult<Vec<ListingRecord>>;

    /// Up to `limit` of the newest listings matching `query`.
    async fn search_newly_listed(
        &self,
        query: &str,
        limit: u32,
    ) -> MonitorResult<Vec<ListingRecord>>;
}
