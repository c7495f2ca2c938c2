//! Paginated listing fetch loop
//!
//! `PageFetcher` drives `{currentPage, itemsPerPage}` pagination against
//! one endpoint, yielding a lazy, finite, non-restartable sequence of
//! pages. A short page (returned count below the requested size) is the
//! authoritative last-page signal; the remote's `totalPages` metadata is
//! unreliable and only ever used as a progress estimate.

use std::sync::Arc;

use reqwest::Method;
use serde_json::Value;
use tokio::time::Duration;
use tracing::{debug, warn};

use super::api_client::MarketplaceClient;
use super::rate_limiter::RateBucket;
use super::response::PageRequest;
use crate::error::ApiError;

/// One fetched page of listing records
#[derive(Debug, Clone)]
pub struct Page {
    /// 1-based page index
    pub number: u32,

    /// Records on this page
    pub items: Vec<Value>,

    /// Remote-reported page count, progress estimate only
    pub total_pages_hint: Option<u32>,

    /// Remote-reported item count, progress estimate only
    pub total_items_hint: Option<u64>,
}

/// Lazy pull-based fetcher over one paginated endpoint
pub struct PageFetcher {
    client: Arc<MarketplaceClient>,
    endpoint: String,
    bucket: RateBucket,
    items_per_page: u32,
    max_pages: u32,
    inter_page_delay: Duration,
    next_page: u32,
    finished: bool,
    cap_reached: bool,
}

impl PageFetcher {
    /// Create a fetcher for one endpoint
    ///
    /// `max_pages` is a safety cap: the fetcher stops without error once
    /// the page index would exceed it, even if the remote keeps
    /// returning full pages.
    pub fn new(
        client: Arc<MarketplaceClient>,
        endpoint: impl Into<String>,
        items_per_page: u32,
        max_pages: u32,
        inter_page_delay: Duration,
    ) -> Self {
        let endpoint = endpoint.into();
        let bucket = RateBucket::for_endpoint(&endpoint);
        Self {
            client,
            endpoint,
            bucket,
            items_per_page: items_per_page.max(1),
            max_pages: max_pages.max(1),
            inter_page_delay,
            next_page: 1,
            finished: false,
            cap_reached: false,
        }
    }

    /// Fetch the next page, or `None` once the sequence is exhausted
    ///
    /// Termination conditions, checked in order: an API error propagates
    /// and poisons the fetcher; a short or empty page ends the sequence;
    /// the page cap ends the sequence without error. The configured
    /// inter-page delay is applied before every request after the first.
    pub async fn next_page(&mut self) -> Result<Option<Page>, ApiError> {
        if self.finished {
            return Ok(None);
        }

        if self.next_page > self.max_pages {
            warn!(
                endpoint = %self.endpoint,
                max_pages = self.max_pages,
                "Page cap reached, stopping pagination"
            );
            self.finished = true;
            self.cap_reached = true;
            return Ok(None);
        }

        if self.next_page > 1 && !self.inter_page_delay.is_zero() {
            tokio::time::sleep(self.inter_page_delay).await;
        }

        let request = PageRequest {
            current_page: self.next_page,
            items_per_page: self.items_per_page,
        };
        let payload = serde_json::to_value(&request)
            .map_err(|e| ApiError::InvalidResponse(format!("failed to encode page request: {}", e)))?;

        let envelope = match self
            .client
            .request(Method::POST, &self.endpoint, Some(&payload), self.bucket)
            .await
        {
            Ok(envelope) => envelope,
            Err(err) => {
                self.finished = true;
                return Err(err);
            }
        };

        let items = match envelope.items() {
            Ok(items) => items,
            Err(reason) => {
                self.finished = true;
                return Err(ApiError::InvalidResponse(reason));
            }
        };

        let (total_pages_hint, total_items_hint) = envelope
            .pagination
            .as_ref()
            .map(|p| (p.total_pages, p.total_items))
            .unwrap_or((None, None));

        let number = self.next_page;
        self.next_page += 1;

        // Short page is the authoritative end-of-data signal
        if (items.len() as u32) < self.items_per_page {
            debug!(
                endpoint = %self.endpoint,
                page = number,
                items = items.len(),
                "Short page, treating as last"
            );
            self.finished = true;
        }

        if items.is_empty() {
            return Ok(None);
        }

        Ok(Some(Page {
            number,
            items,
            total_pages_hint,
            total_items_hint,
        }))
    }

    /// Whether the sequence is exhausted
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Whether the sequence was stopped by the page cap rather than by
    /// the remote running out of data
    pub fn cap_reached(&self) -> bool {
        self.cap_reached
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AccountConfig, ApiConfig, CircuitBreakerConfig, RateLimitConfig, RetryConfig,
    };
    use crate::client::rate_limiter::RateLimiter;
    use crate::models::AccountType;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str) -> Arc<MarketplaceClient> {
        let account_config = AccountConfig {
            enabled: true,
            username: "seller".to_string(),
            password: "secret".to_string(),
            rate_limit: RateLimitConfig {
                orders_per_second: 100,
                other_per_second: 100,
            },
        };
        let api_config = ApiConfig {
            base_url: base_url.to_string(),
            connect_timeout_secs: 5,
            request_timeout_secs: 10,
        };
        let retry_config = RetryConfig {
            max_retries: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let rate_limiter = Arc::new(RateLimiter::new(&account_config.rate_limit));

        Arc::new(
            MarketplaceClient::new(
                AccountType::Main,
                &account_config,
                &api_config,
                retry_config,
                CircuitBreakerConfig {
                    enabled: false,
                    ..Default::default()
                },
                rate_limiter,
            )
            .unwrap(),
        )
    }

    fn page_body(count: usize, total_pages: Option<u32>) -> serde_json::Value {
        let items: Vec<_> = (0..count).map(|i| json!({"sku": format!("SKU-{}", i)})).collect();
        json!({
            "isError": false,
            "messages": [],
            "results": items,
            "pagination": {"totalPages": total_pages, "totalItems": null}
        })
    }

    // Test 1: Short page terminates the sequence
    #[tokio::test]
    async fn test_short_page_terminates() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/product/read"))
            .and(body_partial_json(json!({"currentPage": 1})))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(3, None)))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/product/read"))
            .and(body_partial_json(json!({"currentPage": 2})))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(1, None)))
            .mount(&server)
            .await;

        let mut fetcher = PageFetcher::new(
            test_client(&server.uri()),
            "product/read",
            3,
            10,
            Duration::ZERO,
        );

        let page1 = fetcher.next_page().await.unwrap().unwrap();
        assert_eq!(page1.number, 1);
        assert_eq!(page1.items.len(), 3);
        assert!(!fetcher.is_finished());

        let page2 = fetcher.next_page().await.unwrap().unwrap();
        assert_eq!(page2.number, 2);
        assert_eq!(page2.items.len(), 1);
        assert!(fetcher.is_finished());

        assert!(fetcher.next_page().await.unwrap().is_none());
    }

    // Test 2: Page cap halts even when the remote keeps returning full pages
    #[tokio::test]
    async fn test_page_cap_halts() {
        let server = MockServer::start().await;
        // Full pages forever, with a totalPages lie
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(2, Some(9999))))
            .expect(3)
            .mount(&server)
            .await;

        let mut fetcher = PageFetcher::new(
            test_client(&server.uri()),
            "product/read",
            2,
            3,
            Duration::ZERO,
        );

        let mut pages = 0;
        let mut iterations = 0;
        while iterations <= 4 {
            iterations += 1;
            match fetcher.next_page().await.unwrap() {
                Some(_) => pages += 1,
                None => break,
            }
        }

        // Halts within max_pages + 1 iterations
        assert_eq!(pages, 3);
        assert!(iterations <= 4);
        assert!(fetcher.is_finished());
    }

    // Test 3: Empty first page yields None immediately
    #[tokio::test]
    async fn test_empty_first_page() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(0, Some(0))))
            .expect(1)
            .mount(&server)
            .await;

        let mut fetcher = PageFetcher::new(
            test_client(&server.uri()),
            "product/read",
            50,
            10,
            Duration::ZERO,
        );

        assert!(fetcher.next_page().await.unwrap().is_none());
        assert!(fetcher.is_finished());
    }

    // Test 4: An API error propagates and poisons the fetcher
    #[tokio::test]
    async fn test_error_poisons_fetcher() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "isError": true,
                "messages": ["bad request"],
                "results": []
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut fetcher = PageFetcher::new(
            test_client(&server.uri()),
            "product/read",
            50,
            10,
            Duration::ZERO,
        );

        let err = fetcher.next_page().await.unwrap_err();
        assert!(matches!(err, ApiError::Validation(_)));

        // Poisoned: no further requests are made
        assert!(fetcher.next_page().await.unwrap().is_none());
    }

    // Test 5: Pagination hints are surfaced on pages
    #[tokio::test]
    async fn test_pagination_hints() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(page_body(1, Some(7))))
            .mount(&server)
            .await;

        let mut fetcher = PageFetcher::new(
            test_client(&server.uri()),
            "product/read",
            50,
            10,
            Duration::ZERO,
        );

        let page = fetcher.next_page().await.unwrap().unwrap();
        assert_eq!(page.total_pages_hint, Some(7));
    }

    // Test 6: Orders endpoint is charged to the orders bucket
    #[test]
    fn test_bucket_selection() {
        // Bucket mapping is derived from the endpoint path
        assert_eq!(RateBucket::for_endpoint("order/read"), RateBucket::Orders);
        assert_eq!(RateBucket::for_endpoint("product/read"), RateBucket::Other);
    }
}
