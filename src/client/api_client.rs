//! Resilient marketplace API client
//!
//! `MarketplaceClient` is the single place where HTTP happens. It
//! authenticates with a cached HTTP Basic digest, charges every request
//! against the account's rate limiter, classifies each outcome into the
//! typed error taxonomy, retries transient failures with exponential
//! backoff in an explicit bounded loop, and records every attempt to the
//! compliance audit log with credentials masked.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use super::rate_limiter::{RateBucket, RateLimiter};
use super::response::ApiEnvelope;
use super::retry::RetryPolicy;
use crate::config::{AccountConfig, ApiConfig, CircuitBreakerConfig, RetryConfig};
use crate::database::Database;
use crate::error::{ApiError, AppError};
use crate::models::request_log::mask_header_value;
use crate::models::{AccountType, RequestLogEntry};

/// Callback surface for per-run request counters
///
/// The orchestrator supplies an implementation so the owning sync log's
/// `api_requests_made` and `rate_limit_hits` counters track client
/// activity.
pub trait ClientObserver: Send + Sync {
    /// Called once per HTTP request attempt
    fn on_request(&self) {}

    /// Called once per 429 response
    fn on_rate_limit_hit(&self) {}
}

/// Observer that ignores all events
#[derive(Debug, Default)]
pub struct NoopObserver;

impl ClientObserver for NoopObserver {}

/// Sink for compliance audit entries
#[async_trait]
pub trait RequestRecorder: Send + Sync {
    /// Record one request/response pair; implementations must not fail
    /// the request on recording errors
    async fn record(&self, entry: RequestLogEntry);
}

/// RequestRecorder that persists entries through the Database trait
pub struct DatabaseRequestRecorder {
    db: Arc<dyn Database>,
}

impl DatabaseRequestRecorder {
    /// Create a recorder backed by the given database
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl RequestRecorder for DatabaseRequestRecorder {
    async fn record(&self, entry: RequestLogEntry) {
        if let Err(err) = self.db.insert_request_log(&entry).await {
            // Audit failures must never fail the request itself
            warn!(error = %err, url = %entry.url, "Failed to persist request audit entry");
        }
    }
}

/// Circuit breaker over consecutive transient failures
struct CircuitBreaker {
    config: CircuitBreakerConfig,
    consecutive_failures: AtomicU32,
    opened_at: StdMutex<Option<Instant>>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            consecutive_failures: AtomicU32::new(0),
            opened_at: StdMutex::new(None),
        }
    }

    /// Fail fast while the breaker is open; allow a probe once the open
    /// window has elapsed
    fn check(&self) -> Result<(), ApiError> {
        if !self.config.enabled {
            return Ok(());
        }

        let mut opened = self.opened_at.lock().unwrap();
        if let Some(at) = *opened {
            if at.elapsed() >= Duration::from_millis(self.config.open_duration_ms) {
                // Half-open: let the next request probe the remote
                *opened = None;
                self.consecutive_failures.store(0, Ordering::SeqCst);
            } else {
                return Err(ApiError::CircuitOpen);
            }
        }
        Ok(())
    }

    fn record_failure(&self) {
        if !self.config.enabled {
            return;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= self.config.failure_threshold {
            let mut opened = self.opened_at.lock().unwrap();
            if opened.is_none() {
                warn!(
                    failures = failures,
                    open_ms = self.config.open_duration_ms,
                    "Circuit breaker opened after consecutive transient failures"
                );
                *opened = Some(Instant::now());
            }
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
        *self.opened_at.lock().unwrap() = None;
    }
}

/// Authenticated, rate-limited, retrying API client for one seller account
pub struct MarketplaceClient {
    http: reqwest::Client,
    base_url: String,
    account: AccountType,
    username: String,
    password: String,
    auth_header: RwLock<Option<String>>,
    rate_limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    breaker: CircuitBreaker,
    observer: Arc<dyn ClientObserver>,
    recorder: Option<Arc<dyn RequestRecorder>>,
}

impl MarketplaceClient {
    /// Create a client for one account
    ///
    /// The rate limiter is injected so the orchestrator can give each
    /// account its own instance.
    pub fn new(
        account: AccountType,
        account_config: &AccountConfig,
        api_config: &ApiConfig,
        retry_config: RetryConfig,
        breaker_config: CircuitBreakerConfig,
        rate_limiter: Arc<RateLimiter>,
    ) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(api_config.connect_timeout_secs))
            .timeout(Duration::from_secs(api_config.request_timeout_secs))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: api_config.base_url.trim_end_matches('/').to_string(),
            account,
            username: account_config.username.clone(),
            password: account_config.password.clone(),
            auth_header: RwLock::new(None),
            rate_limiter,
            retry: RetryPolicy::new(retry_config),
            breaker: CircuitBreaker::new(breaker_config),
            observer: Arc::new(NoopObserver),
            recorder: None,
        })
    }

    /// Attach a request counter observer
    pub fn with_observer(mut self, observer: Arc<dyn ClientObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Attach a compliance audit recorder
    pub fn with_recorder(mut self, recorder: Arc<dyn RequestRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Account this client authenticates as
    pub fn account(&self) -> AccountType {
        self.account
    }

    /// Execute one API call against the given endpoint
    ///
    /// Classifies every HTTP/transport outcome into the typed taxonomy.
    /// Transient failures (network, timeout, 5xx) are retried up to the
    /// configured budget with exponential backoff; a 429 is retried
    /// honoring the server's `Retry-After` hint; a 401 invalidates the
    /// cached credentials and is retried exactly once after
    /// re-authentication. A 200 envelope with `isError` set is
    /// normalized to a `Validation` error here so no caller ever
    /// branches on the envelope shape.
    pub async fn request(
        &self,
        method: Method,
        endpoint: &str,
        payload: Option<&Value>,
        bucket: RateBucket,
    ) -> Result<ApiEnvelope, ApiError> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut attempt = 0u32;
        let mut reauthenticated = false;

        loop {
            self.breaker.check()?;
            self.rate_limiter.acquire(bucket).await;
            self.observer.on_request();

            let auth = self.auth_header().await;
            let started = Instant::now();

            let mut request = self
                .http
                .request(method.clone(), &url)
                .header(AUTHORIZATION, auth.as_str())
                .header(CONTENT_TYPE, "application/json");
            if let Some(body) = payload {
                request = request.json(body);
            }

            let outcome = request.send().await;
            let duration_ms = started.elapsed().as_millis() as u64;

            let response = match outcome {
                Ok(response) => response,
                Err(err) => {
                    let classified = if err.is_timeout() {
                        ApiError::Transient("request timed out".to_string())
                    } else if err.is_connect() {
                        ApiError::Transient(format!("connection failed: {}", err))
                    } else {
                        ApiError::Transient(format!("network error: {}", err))
                    };

                    self.audit(&method, &url, &auth, payload, None, duration_ms, true)
                        .await;
                    self.breaker.record_failure();

                    if attempt < self.retry.max_retries() {
                        let backoff = self.retry.calculate_backoff(attempt);
                        debug!(
                            account = %self.account,
                            url = %url,
                            attempt = attempt + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            error = %classified,
                            "Retrying after transport failure"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(classified);
                }
            };

            let status = response.status();

            match status {
                StatusCode::UNAUTHORIZED => {
                    self.audit(
                        &method,
                        &url,
                        &auth,
                        payload,
                        Some(status.as_u16()),
                        duration_ms,
                        true,
                    )
                    .await;
                    self.invalidate_credentials().await;

                    if !reauthenticated {
                        warn!(
                            account = %self.account,
                            url = %url,
                            "Credentials rejected, re-authenticating once"
                        );
                        reauthenticated = true;
                        continue;
                    }
                    return Err(ApiError::Auth(format!(
                        "credentials rejected for account {}",
                        self.account
                    )));
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    self.observer.on_rate_limit_hit();
                    let retry_after = response
                        .headers()
                        .get("Retry-After")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok());

                    self.audit(
                        &method,
                        &url,
                        &auth,
                        payload,
                        Some(status.as_u16()),
                        duration_ms,
                        true,
                    )
                    .await;

                    if attempt < self.retry.max_retries() {
                        let wait = retry_after
                            .map(Duration::from_secs)
                            .unwrap_or_else(|| self.retry.calculate_backoff(attempt));
                        warn!(
                            account = %self.account,
                            url = %url,
                            wait_ms = wait.as_millis() as u64,
                            "Rate limited by remote, backing off"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ApiError::RateLimited { retry_after });
                }
                StatusCode::BAD_REQUEST => {
                    self.audit(
                        &method,
                        &url,
                        &auth,
                        payload,
                        Some(status.as_u16()),
                        duration_ms,
                        true,
                    )
                    .await;

                    let message = response
                        .json::<ApiEnvelope>()
                        .await
                        .map(|envelope| envelope.error_message())
                        .unwrap_or_else(|_| "request rejected by remote API".to_string());
                    return Err(ApiError::Validation(message));
                }
                StatusCode::NOT_FOUND => {
                    self.audit(
                        &method,
                        &url,
                        &auth,
                        payload,
                        Some(status.as_u16()),
                        duration_ms,
                        true,
                    )
                    .await;
                    return Err(ApiError::NotFound);
                }
                status if status.is_server_error() => {
                    self.audit(
                        &method,
                        &url,
                        &auth,
                        payload,
                        Some(status.as_u16()),
                        duration_ms,
                        true,
                    )
                    .await;
                    self.breaker.record_failure();

                    if attempt < self.retry.max_retries() {
                        let backoff = self.retry.calculate_backoff(attempt);
                        debug!(
                            account = %self.account,
                            url = %url,
                            status = status.as_u16(),
                            attempt = attempt + 1,
                            backoff_ms = backoff.as_millis() as u64,
                            "Retrying after server error"
                        );
                        tokio::time::sleep(backoff).await;
                        attempt += 1;
                        continue;
                    }
                    return Err(ApiError::Transient(format!("HTTP {}", status.as_u16())));
                }
                status if status.is_success() => {
                    self.audit(
                        &method,
                        &url,
                        &auth,
                        payload,
                        Some(status.as_u16()),
                        duration_ms,
                        false,
                    )
                    .await;

                    let envelope = response.json::<ApiEnvelope>().await.map_err(|e| {
                        ApiError::InvalidResponse(format!("failed to decode envelope: {}", e))
                    })?;

                    if envelope.is_error {
                        // Normalize the error envelope into the taxonomy
                        return Err(ApiError::Validation(envelope.error_message()));
                    }

                    self.breaker.record_success();
                    return Ok(envelope);
                }
                status => {
                    self.audit(
                        &method,
                        &url,
                        &auth,
                        payload,
                        Some(status.as_u16()),
                        duration_ms,
                        true,
                    )
                    .await;
                    return Err(ApiError::InvalidResponse(format!(
                        "unexpected status {}",
                        status.as_u16()
                    )));
                }
            }
        }
    }

    /// Cached HTTP Basic digest, computed on first use and after a 401
    async fn auth_header(&self) -> String {
        if let Some(header) = self.auth_header.read().await.clone() {
            return header;
        }

        let digest = format!(
            "Basic {}",
            BASE64.encode(format!("{}:{}", self.username, self.password))
        );
        *self.auth_header.write().await = Some(digest.clone());
        digest
    }

    /// Drop the cached digest so the next request recomputes it
    async fn invalidate_credentials(&self) {
        *self.auth_header.write().await = None;
    }

    /// Record one attempt to the compliance log, credentials masked
    #[allow(clippy::too_many_arguments)]
    async fn audit(
        &self,
        method: &Method,
        url: &str,
        auth: &str,
        payload: Option<&Value>,
        status: Option<u16>,
        duration_ms: u64,
        is_error: bool,
    ) {
        let Some(recorder) = &self.recorder else {
            return;
        };

        let mut entry = RequestLogEntry::new(method.as_str(), url);
        entry.headers = json!({
            "authorization": mask_header_value(auth),
            "content-type": "application/json",
        });
        entry.payload = payload.cloned();
        entry.status = status;
        entry.duration_ms = duration_ms;
        entry.is_error = is_error;

        recorder.record(entry).await;
    }
}
