use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use super::source::ListingSource;
use super::types::*;
use crate::core::config::EbayConfig;
use crate::core::{MonitorError, MonitorResult};
use crate::monitoring::ListingRecord;

const OAUTH_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";
const SEARCH_ENDPOINT: &str = "/buy/browse/v1/item_summary/search";
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct EbayClient {
    client: Client,
    config: EbayConfig,
    token: RwLock<Option<CachedToken>>,
}

impl EbayClient {
    pub fn new(config: EbayConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            token: RwLock::new(None),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.config.client_id.is_some() && self.config.client_secret.is_some()
    }

    /// Application token from the client-credentials grant, reused until
    /// shortly before it expires.
    pub async fn access_token(&self) -> MonitorResult<String> {
        if let Some(token) = self.token.read().await.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        // Held across the request so concurrent callers share one refresh.
        let mut cached = self.token.write().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        let credentials = (&self.config.client_id, &self.config.client_secret);
        let (client_id, client_secret) = match credentials {
            (Some(id), Some(secret)) => (id, secret),
            _ => return Err(MonitorError::MissingCredentials),
        };

        let response = self
            .client
            .post(&self.config.auth_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", OAUTH_SCOPE)])
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("eBay token request failed: {} - {}", status, error_text);
            return Err(MonitorError::Token(format!("{} - {}", status, error_text)));
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        tracing::debug!("Obtained eBay access token (valid {}s)", token.expires_in);

        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(token.access_token)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, String)],
    ) -> MonitorResult<T> {
        let token = self.access_token().await?;
        let url = format!("{}{}", self.config.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .bearer_auth(token)
            .header("X-EBAY-C-MARKETPLACE-ID", &self.config.marketplace_id)
            .query(query)
            .send()
            .await?;
        let status = response.status();

        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!("eBay API error: {} - {}", status, error_text);
            return Err(MonitorError::Api {
                status: status.as_u16(),
                body: error_text,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn search(
        &self,
        query: &str,
        seller: Option<&str>,
    ) -> MonitorResult<SearchPagedCollection> {
        let mut params = vec![
            ("q", query.to_string()),
            ("limit", self.config.search_limit.to_string()),
        ];
        if let Some(seller) = seller {
            params.push(("filter", format!("sellers:{{{}}}", seller)));
        }

        self.get(SEARCH_ENDPOINT, &params).await
    }

    /// Most recently listed items first.
    pub async fn search_newest(
        &self,
        query: &str,
        limit: u32,
    ) -> MonitorResult<SearchPagedCollection> {
        let params = [
            ("q", query.to_string()),
            ("limit", limit.to_string()),
            ("sort", "newlyListed".to_string()),
        ];

        self.get(SEARCH_ENDPOINT, &params).await
    }
}

#[async_trait]
impl ListingSource for EbayClient {
    async fn search_items_by_seller(
        &self,
        seller: &str,
        query: &str,
    ) -> MonitorResult<Vec<ListingRecord>> {
        let page = self.search(query, Some(seller)).await?;
        tracing::info!("Found {} listings for seller {}", page.item_summaries.len(), seller);

        Ok(page
            .item_summaries
            .into_iter()
            .map(|item| item.into_listing(Some(seller)))
            .collect())
    }

    async fn search_items(&self, query: &str) -> MonitorResult<Vec<ListingRecord>> {
        let page = self.search(query, None).await?;

        Ok(page
            .item_summaries
            .into_iter()
            .map(|item| item.into_listing(None))
            .collect())
    }

    async fn search_newly_listed(
        &self,
        query: &str,
        limit: u32,
    ) -> MonitorResult<Vec<ListingRecord>> {
        let page = self.search_newest(query, limit).await?;

        Ok(page
            .item_summaries
            .into_iter()
            .map(|item| item.into_listing(None))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use warp::Filter;

    fn config(client_id: Option<&str>) -> EbayConfig {
        config_at("http://127.0.0.1:9", client_id)
    }

    fn config_at(base_url: &str, client_id: Option<&str>) -> EbayConfig {
        EbayConfig {
            client_id: client_id.map(str::to_string),
            client_secret: client_id.map(|_| "secret".to_string()),
            base_url: base_url.to_string(),
            auth_url: format!("{}/identity/v1/oauth2/token", base_url),
            marketplace_id: "EBAY_US".to_string(),
            search_limit: 50,
        }
    }

    /// Local stand-in for the identity and Browse endpoints. The search
    /// route echoes the query parameters and marketplace header as the title.
    fn serve_fake_ebay(token_requests: Arc<AtomicUsize>) -> String {
        let token = warp::path!("identity" / "v1" / "oauth2" / "token")
            .and(warp::post())
            .map(move || {
                token_requests.fetch_add(1, Ordering::SeqCst);
                warp::reply::json(&serde_json::json!({
                    "access_token": "fresh-token",
                    "expires_in": 7200,
                    "token_type": "Application Access Token"
                }))
            });

        let search = warp::path!("buy" / "browse" / "v1" / "item_summary" / "search")
            .and(warp::header::<String>("x-ebay-c-marketplace-id"))
            .and(warp::header::<String>("authorization"))
            .and(warp::query::<HashMap<String, String>>())
            .map(|marketplace: String, auth: String, params: HashMap<String, String>| {
                let mut keys: Vec<String> =
                    params.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
                keys.sort();
                warp::reply::json(&serde_json::json!({
                    "total": 1,
                    "itemSummaries": [{
                        "itemId": "v1|1|0",
                        "title": format!("{} {} {}", marketplace, auth, keys.join("&")),
                        "price": {"value": "10.00", "currency": "USD"},
                        "seller": {"username": "echo"}
                    }]
                }))
            });

        let (addr, server) = warp::serve(token.or(search)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_missing_credentials_fail_before_any_request() {
        let client = EbayClient::new(config(None));
        assert!(!client.has_credentials());

        let err = client.access_token().await.unwrap_err();
        assert!(matches!(err, MonitorError::MissingCredentials));
        assert!(err.is_upstream());

        let err = client.search_items_by_seller("cellfc", "iphone").await.unwrap_err();
        assert!(matches!(err, MonitorError::MissingCredentials));
    }

    #[tokio::test]
    async fn test_cached_token_is_reused() {
        let client = EbayClient::new(config(Some("id")));
        *client.token.write().await = Some(CachedToken {
            value: "cached".to_string(),
            expires_at: Instant::now() + Duration::from_secs(600),
        });

        assert_eq!(client.access_token().await.unwrap(), "cached");
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_token_request() {
        let token_requests = Arc::new(AtomicUsize::new(0));
        let base_url = serve_fake_ebay(token_requests.clone());
        let client = EbayClient::new(config_at(&base_url, Some("id")));

        let (a, b, c) = tokio::join!(
            client.access_token(),
            client.access_token(),
            client.access_token()
        );

        assert_eq!(a.unwrap(), "fresh-token");
        assert_eq!(b.unwrap(), "fresh-token");
        assert_eq!(c.unwrap(), "fresh-token");
        assert_eq!(token_requests.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_seller_search_sends_filter_and_marketplace() {
        let token_requests = Arc::new(AtomicUsize::new(0));
        let base_url = serve_fake_ebay(token_requests.clone());
        let client = EbayClient::new(config_at(&base_url, Some("id")));

        let listings = client.search_items_by_seller("cellfc", "iphone").await.unwrap();
        assert_eq!(listings.len(), 1);
        assert_eq!(listings[0].seller, "cellfc");
        assert_eq!(listings[0].price, Some(10.0));
        assert_eq!(
            listings[0].title,
            "EBAY_US Bearer fresh-token filter=sellers:{cellfc}&limit=50&q=iphone"
        );

        let newest = client.search_newly_listed("iPhone 15", 5).await.unwrap();
        assert_eq!(newest[0].seller, "echo");
        assert_eq!(
            newest[0].title,
            "EBAY_US Bearer fresh-token limit=5&q=iPhone 15&sort=newlyListed"
        );
        assert_eq!(token_requests.load(Ordering::SeqCst), 1);
    }
}
