use crate::activities::ActivityRecord;
use crate::cli::CommonArgs;
use crate::criteria::{RawCriteria, SearchCriteria};
use crate::error::ApiError;
use crate::finder::{self, FinderError};
use crate::AppState;
use anyhow::Result;
use axum::{
    extract::{rejection::JsonRejection, ConnectInfo, Request, State},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use clap::Parser;
use serde::Serialize;
use serde_json::json;
use std::env;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};
use tracing_subscriber::{prelude::*, Registry};
use tracing_tree::HierarchicalLayer;

// Add build-time information
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    build_info: String,
    started_at: DateTime<Utc>,
    provider: Option<String>,
    model: Option<String>,
    stats: StatusStats,
}

#[derive(Debug, Serialize)]
struct StatusStats {
    request_count: u64,
    success_count: u64,
    error_count: u64,
    parse_failure_count: u64,
    total_upstream_time_ms: u64,
    average_upstream_time_ms: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityItem {
    pub id: usize,
    #[serde(flatten)]
    pub record: ActivityRecord,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMetadata {
    pub city: String,
    pub kids_ages: String,
    pub availability: String,
    pub miles_range: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences: Option<String>,
    pub searched_at: DateTime<Utc>,
    pub model: String,
    pub search_queries: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct ActivitiesResponse {
    pub activities: Vec<ActivityItem>,
    pub metadata: SearchMetadata,
}

impl ActivitiesResponse {
    fn new(criteria: SearchCriteria, search: finder::ActivitySearch) -> Self {
        let activities = search
            .activities
            .into_iter()
            .enumerate()
            .map(|(i, record)| ActivityItem { id: i + 1, record })
            .collect();
        Self {
            activities,
            metadata: SearchMetadata {
                city: criteria.city,
                kids_ages: criteria.kids_ages,
                availability: criteria.availability,
                miles_range: criteria.miles_range,
                preferences: criteria.preferences,
                searched_at: Utc::now(),
                model: search.model,
                search_queries: search.search_queries,
            },
        }
    }
}

// Health check endpoint
#[instrument]
pub async fn health_check() -> &'static str {
    debug!("Health check requested");
    "OK"
}

async fn api_health() -> impl IntoResponse {
    Json(json!({ "status": "ok", "message": "Server is running" }))
}

fn get_build_info() -> String {
    fn clean(value: Option<String>) -> Option<String> {
        value
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty() && v != "unknown")
    }

    let clean_env = |key: &str| clean(env::var(key).ok());

    let mut parts = Vec::new();
    parts.push(format!("Version {}", built_info::PKG_VERSION));

    if let Some(tag) = clean_env("APP_BUILD_TAG") {
        parts.push(format!("Image {}", tag));
    }

    let commit = clean_env("APP_BUILD_COMMIT").or_else(|| {
        clean(built_info::GIT_COMMIT_HASH_SHORT.map(|s| s.to_string()))
    });
    if let Some(commit) = commit {
        parts.push(format!("Commit {}", commit));
    }

    if built_info::GIT_DIRTY == Some(true) {
        parts.push("workspace dirty".to_string());
    }

    parts.push(format!("Built {}", built_info::BUILT_TIME_UTC));
    parts.push(format!("Profile {}", built_info::PROFILE));
    parts.push(format!("Rustc {}", built_info::RUSTC_VERSION));

    parts.join(" • ")
}

async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = &state.stats;
    let status = StatusResponse {
        build_info: get_build_info(),
        started_at: state.started_at,
        provider: state
            .model_client
            .as_ref()
            .map(|c| c.provider_name().to_string()),
        model: state.model_client.as_ref().map(|c| c.model_name().to_string()),
        stats: StatusStats {
            request_count: stats.request_count.load(Ordering::Relaxed),
            success_count: stats.success_count.load(Ordering::Relaxed),
            error_count: stats.error_count.load(Ordering::Relaxed),
            parse_failure_count: stats
                .parse_failure_count
                .load(Ordering::Relaxed),
            total_upstream_time_ms: stats
                .total_upstream_time_ms
                .load(Ordering::Relaxed),
            average_upstream_time_ms: stats.average_upstream_time_ms(),
        },
    };

    Json(status).into_response()
}

#[instrument(skip_all)]
async fn find_activities_handler(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<RawCriteria>, JsonRejection>,
) -> Result<Json<ActivitiesResponse>, ApiError> {
    state.stats.request_count.fetch_add(1, Ordering::Relaxed);

    let result = search_activities(&state, payload).await;
    match &result {
        Ok(response) => {
            state.stats.success_count.fetch_add(1, Ordering::Relaxed);
            info!(count = response.activities.len(), "Activity search complete");
        }
        Err(ApiError::ParseFailed { .. }) => {
            state.stats.parse_failure_count.fetch_add(1, Ordering::Relaxed);
            state.stats.error_count.fetch_add(1, Ordering::Relaxed);
        }
        Err(e) => {
            state.stats.error_count.fetch_add(1, Ordering::Relaxed);
            warn!(status = %e.status(), "Activity search failed");
        }
    }
    result.map(Json)
}

async fn search_activities(
    state: &AppState,
    payload: Result<Json<RawCriteria>, JsonRejection>,
) -> Result<ActivitiesResponse, ApiError> {
    let Json(raw) =
        payload.map_err(|e| ApiError::InvalidBody(e.body_text()))?;
    let criteria = raw.validate()?;

    let client = state.model_client.as_ref().ok_or_else(|| {
        ApiError::Unavailable(
            "No model client configured, set GOOGLE_API_KEY or OPENAI_API_KEY"
                .to_string(),
        )
    })?;

    let _permit = state
        .semaphore
        .acquire()
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    info!(
        city = %criteria.city,
        kids_ages = %criteria.kids_ages,
        miles_range = criteria.miles_range,
        "Searching for activities"
    );

    let start = Instant::now();
    let result = finder::find_activities(
        client.as_ref(),
        &criteria,
        &state.generation,
        &state.retry_policy,
    )
    .await;
    if matches!(result, Ok(_) | Err(FinderError::NoActivities { .. })) {
        state
            .stats
            .total_upstream_time_ms
            .fetch_add(start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }

    let search = result?;
    for query in &search.search_queries {
        debug!(query = %query, "Grounding search query");
    }
    Ok(ActivitiesResponse::new(criteria, search))
}

// The peer address, or the first forwarded address when the server sits
// behind a trusted proxy. Falls back to a shared bucket.
fn client_key(request: &Request, trust_forwarded_for: bool) -> String {
    if trust_forwarded_for {
        if let Some(forwarded) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return forwarded.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let client = client_key(&request, state.trust_forwarded_for);
    match state.rate_limiter.check(&client) {
        Ok(()) => next.run(request).await,
        Err(wait) => {
            warn!(client = %client, wait_secs = wait.as_secs(), "Client rate limited");
            ApiError::RateLimited {
                retry_after_secs: Some(wait.as_secs().max(1)),
            }
            .into_response()
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(long, default_value_t = 5000, env = "PORT")]
    port: u16,

    /// Upstream requests allowed in flight at once
    #[arg(long, default_value_t = 3)]
    max_concurrent_requests: usize,

    /// Searches allowed per client per minute, 0 disables the limit
    #[arg(long, default_value_t = 10)]
    requests_per_minute: u32,

    /// Key rate limits on X-Forwarded-For, only safe behind a proxy that sets it
    #[arg(long, default_value_t = false, env = "TRUST_FORWARDED_FOR")]
    trust_forwarded_for: bool,

    #[command(flatten)]
    common: CommonArgs,
}

pub fn routes(state: Arc<AppState>) -> Router {
    let search = Router::new()
        .route("/api/activities", post(find_activities_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/health", get(health_check))
        .route("/api/health", get(api_health))
        .route("/api/status", get(get_status))
        .merge(search)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Ok(()) = tokio::signal::ctrl_c().await {
        info!("Received CTRL-C, initiating shutdown");
    }
}

pub async fn serve() -> Result<()> {
    // Initialize logging with tracing
    let subscriber = Registry::default()
        .with(
            HierarchicalLayer::new(2)
                .with_targets(true)
                .with_bracketed_fields(true),
        )
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        );

    tracing::subscriber::set_global_default(subscriber)?;

    // Parse command line arguments
    let args = Args::parse();

    info!("Starting activity finder service");
    info!("{}", get_build_info());

    let state = crate::create_app_state(crate::AppConfig {
        model_client: args.common.model_client_config(),
        generation: args.common.generation_settings(),
        retry_policy: args.common.retry_policy(),
        max_concurrent_requests: args.max_concurrent_requests,
        requests_per_minute: args.requests_per_minute,
        trust_forwarded_for: args.trust_forwarded_for,
    });

    if state.model_client.is_none() {
        warn!("No model client available, searches will return 503");
    }

    // Start web server
    let app = routes(state)
        .into_make_service_with_connect_info::<SocketAddr>();
    let addr = format!("{}:{}", args.host, args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server running on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}
