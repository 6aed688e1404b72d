use crate::llm::{
    create_model_client, ActivityModelClient, GenerationSettings,
    ModelClientConfig, RetryPolicy,
};
use crate::rate_limit::RateLimiter;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{info, warn};

pub mod activities;
pub mod app;
pub mod cli;
pub mod criteria;
pub mod error;
pub mod finder;
pub mod llm;
pub mod prompts;
pub mod rate_limit;

pub mod test_utils;

// ServiceStats struct for both main app and testing
#[derive(Debug)]
pub struct ServiceStats {
    pub request_count: AtomicU64,
    pub success_count: AtomicU64,
    pub error_count: AtomicU64,
    pub parse_failure_count: AtomicU64,
    pub total_upstream_time_ms: AtomicU64,
}

impl Default for ServiceStats {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceStats {
    pub fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
            parse_failure_count: AtomicU64::new(0),
            total_upstream_time_ms: AtomicU64::new(0),
        }
    }

    pub fn average_upstream_time_ms(&self) -> f64 {
        let completed = self.success_count.load(Ordering::Relaxed)
            + self.parse_failure_count.load(Ordering::Relaxed);
        if completed == 0 {
            return 0.0;
        }
        self.total_upstream_time_ms.load(Ordering::Relaxed) as f64
            / completed as f64
    }
}

// Shared state handed to every request handler
pub struct AppState {
    pub model_client: Option<Arc<dyn ActivityModelClient>>,
    pub generation: GenerationSettings,
    pub retry_policy: RetryPolicy,
    // Caps concurrent upstream calls
    pub semaphore: Arc<tokio::sync::Semaphore>,
    pub rate_limiter: RateLimiter,
    // Key rate limits on X-Forwarded-For instead of the peer address
    pub trust_forwarded_for: bool,
    pub stats: ServiceStats,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new_for_testing() -> Self {
        Self::new_for_testing_with_client(None)
    }

    // Create a new AppState for testing with minimal configuration
    pub fn new_for_testing_with_client(
        model_client: Option<Arc<dyn ActivityModelClient>>,
    ) -> Self {
        Self {
            model_client,
            generation: GenerationSettings::default(),
            retry_policy: RetryPolicy {
                timeout: std::time::Duration::from_secs(5),
                max_attempts: 2,
                backoff: std::time::Duration::from_millis(1),
            },
            semaphore: Arc::new(tokio::sync::Semaphore::new(3)),
            rate_limiter: RateLimiter::disabled(),
            trust_forwarded_for: false,
            stats: ServiceStats::new(),
            started_at: Utc::now(),
        }
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = rate_limiter;
        self
    }

    pub fn with_trust_forwarded_for(mut self, trust: bool) -> Self {
        self.trust_forwarded_for = trust;
        self
    }
}

// Create a config struct to hold AppState configuration
pub struct AppConfig {
    pub model_client: ModelClientConfig,
    pub generation: GenerationSettings,
    pub retry_policy: RetryPolicy,
    pub max_concurrent_requests: usize,
    pub requests_per_minute: u32,
    pub trust_forwarded_for: bool,
}

// Function to create AppState from parameters
pub fn create_app_state(config: AppConfig) -> Arc<AppState> {
    let model_client = match create_model_client(&config.model_client) {
        Ok(client) => {
            info!(
                provider = client.provider_name(),
                model = client.model_name(),
                "Model client ready"
            );
            Some(client)
        }
        Err(e) => {
            warn!("Failed to create model client: {}", e);
            None
        }
    };

    Arc::new(AppState {
        model_client,
        generation: config.generation,
        retry_policy: config.retry_policy,
        semaphore: Arc::new(tokio::sync::Semaphore::new(
            config.max_concurrent_requests.max(1),
        )),
        rate_limiter: RateLimiter::per_minute(config.requests_per_minute),
        trust_forwarded_for: config.trust_forwarded_for,
        stats: ServiceStats::new(),
        started_at: Utc::now(),
    })
}
