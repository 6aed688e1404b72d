use activity_finder::llm::fake::FakeModelClient;
use activity_finder::llm::{ModelCompletion, UpstreamError};
use activity_finder::rate_limit::RateLimiter;
use activity_finder::test_utils::{init_test_logging, state_with_fake};
use activity_finder::AppState;
use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use http_body_util::BodyExt;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tower::util::ServiceExt;

const MODEL_ANSWER: &str = "Here are five activities for this weekend:

**🚃 Muni Heritage Weekend - Sunday 10am-4pm**
Ride vintage streetcars along the Embarcadero. Free for kids under 5.

**🎨 Kids Art Studio at SFMOMA - Saturday 11am**
Hands-on art making in the family studio, included with admission.

**🦕 Dino Days at the Academy - Saturday all day**
Fossil digs and a T. rex cast in the main hall.

**🌳 Golden Gate Park Story Walk - Saturday 9am**
A picture book posted page by page along the trail near Stow Lake.

**🎭 Puppet Show at Fairyland - Sunday 2pm**
Classic marionette show, seats fill up fast so arrive early.";

/// Create a test app with a scripted model client
fn app_with(client: FakeModelClient) -> (Arc<FakeModelClient>, Arc<AppState>, Router) {
    let (client, state) = state_with_fake(client);
    let state = Arc::new(state);
    let routes = activity_finder::app::routes(state.clone());
    (client, state, routes)
}

/// Create a test app with no model configured
fn app() -> (Arc<AppState>, Router) {
    let app_state = Arc::new(AppState::new_for_testing());
    let routes = activity_finder::app::routes(app_state.clone());
    (app_state, routes)
}

fn search_body() -> Value {
    json!({
        "city": "San Francisco",
        "kidsAges": "5,7",
        "availability": "this Saturday",
        "milesRange": 15,
        "otherPreferences": "outdoor activities"
    })
}

fn post_json(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/activities")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

#[tokio::test]
async fn test_health_endpoint() {
    init_test_logging();
    let (_, router) = app();

    // Use tower's `oneshot` to send a request to our app
    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"OK");
}

#[tokio::test]
async fn test_api_health_endpoint() {
    init_test_logging();
    let (_, router) = app();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({"status": "ok", "message": "Server is running"})
    );
}

#[tokio::test]
async fn test_not_found() {
    init_test_logging();
    let (_, router) = app();

    let response = router
        .oneshot(
            Request::builder()
                .uri("/does-not-exist")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_search_returns_parsed_activities() {
    init_test_logging();
    let (client, state, router) = app_with(
        FakeModelClient::new()
            .with_model("gemini-test")
            .with_completion(ModelCompletion {
                text: MODEL_ANSWER.to_string(),
                search_queries: vec![
                    "family events San Francisco this Saturday".to_string(),
                ],
            }),
    );

    let response = router.oneshot(post_json(&search_body())).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let activities = body["activities"].as_array().unwrap();
    assert_eq!(activities.len(), 5);
    assert_eq!(
        activities[0],
        json!({
            "id": 1,
            "emoji": "🚃",
            "title": "Muni Heritage Weekend - Sunday 10am-4pm",
            "description": "Ride vintage streetcars along the Embarcadero. Free for kids under 5."
        })
    );
    assert_eq!(activities[4]["id"], 5);
    assert_eq!(activities[4]["emoji"], "🎭");

    let metadata = &body["metadata"];
    assert_eq!(metadata["city"], "San Francisco");
    assert_eq!(metadata["kidsAges"], "5,7");
    assert_eq!(metadata["availability"], "this Saturday");
    assert_eq!(metadata["milesRange"], 15);
    assert_eq!(metadata["model"], "gemini-test");
    assert_eq!(
        metadata["searchQueries"],
        json!(["family events San Francisco this Saturday"])
    );
    assert!(metadata["searchedAt"].is_string());

    let prompts = client.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("San Francisco"));
    assert!(prompts[0].contains("outdoor activities"));

    assert_eq!(state.stats.request_count.load(Ordering::Relaxed), 1);
    assert_eq!(state.stats.success_count.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_preferences_alias_is_accepted() {
    init_test_logging();
    let (client, _, router) =
        app_with(FakeModelClient::new().with_response(MODEL_ANSWER));

    let body = json!({
        "city": "Austin",
        "kidsAges": "3",
        "availability": "Sunday morning",
        "milesRange": "20",
        "preferences": "indoor play"
    });
    let response = router.oneshot(post_json(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(client.prompts()[0].contains("indoor play"));
}

#[tokio::test]
async fn test_missing_fields_are_listed() {
    init_test_logging();
    let (client, _, router) = app_with(FakeModelClient::new());

    let body = json!({ "city": "Austin", "kidsAges": "  " });
    let response = router.oneshot(post_json(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        body_json(response).await,
        json!({
            "error": "Missing required fields",
            "required": ["kidsAges", "availability", "milesRange"]
        })
    );
    // The model is never called for a rejected request
    assert!(client.prompts().is_empty());
}

#[tokio::test]
async fn test_invalid_miles_range_is_rejected() {
    init_test_logging();
    let (_, _, router) = app_with(FakeModelClient::new());

    let mut body = search_body();
    body["milesRange"] = json!(5000);
    let response = router.oneshot(post_json(&body)).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Invalid input");
    assert!(body["message"].as_str().unwrap().contains("milesRange"));
}

#[tokio::test]
async fn test_malformed_json_is_rejected() {
    init_test_logging();
    let (_, _, router) = app_with(FakeModelClient::new());

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/activities")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{\"city\": "))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Invalid request body");
}

#[tokio::test]
async fn test_unparseable_answer_returns_raw_response() {
    init_test_logging();
    let answer = "I could not find any events matching your criteria.";
    let (_, state, router) =
        app_with(FakeModelClient::new().with_response(answer));

    let response = router.oneshot(post_json(&search_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        body_json(response).await,
        json!({
            "error": "Failed to parse activities from model response",
            "rawResponse": answer
        })
    );
    assert_eq!(state.stats.parse_failure_count.load(Ordering::Relaxed), 1);
    assert_eq!(state.stats.error_count.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_upstream_auth_failure_maps_to_unauthorized() {
    init_test_logging();
    let (_, _, router) = app_with(FakeModelClient::new().with_error(
        UpstreamError::Authentication("API key not valid".to_string()),
    ));

    let response = router.oneshot(post_json(&search_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"], "Invalid API key");
}

#[tokio::test]
async fn test_upstream_rate_limit_is_passed_on() {
    init_test_logging();
    let (client, _, router) = app_with(FakeModelClient::new().with_error(
        UpstreamError::RateLimited {
            retry_after_secs: Some(30),
        },
    ));

    let response = router.oneshot(post_json(&search_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "30");
    assert_eq!(body_json(response).await["error"], "Rate limit exceeded");
    // Rate limits are not retried
    assert_eq!(client.prompts().len(), 1);
}

#[tokio::test]
async fn test_transient_upstream_failure_is_retried() {
    init_test_logging();
    let (client, _, router) = app_with(
        FakeModelClient::new()
            .with_error(UpstreamError::Api {
                status: 503,
                message: "overloaded".to_string(),
            })
            .with_response(MODEL_ANSWER),
    );

    let response = router.oneshot(post_json(&search_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(client.prompts().len(), 2);
}

#[tokio::test]
async fn test_missing_client_returns_unavailable() {
    init_test_logging();
    let (_, router) = app();

    let response = router.oneshot(post_json(&search_body())).await.unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_json(response).await["error"], "Service unavailable");
}

/// Search request from `peer`, optionally claiming another address
fn request_from(peer: [u8; 4], forwarded_for: Option<&str>) -> Request<Body> {
    let mut request = post_json(&search_body());
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
    if let Some(ip) = forwarded_for {
        request
            .headers_mut()
            .insert("x-forwarded-for", ip.parse().unwrap());
    }
    request
}

fn limited_app(trust_forwarded_for: bool) -> (Arc<FakeModelClient>, Router) {
    let (client, state) = state_with_fake(
        FakeModelClient::new()
            .with_response(MODEL_ANSWER)
            .with_response(MODEL_ANSWER),
    );
    let state = state
        .with_rate_limiter(RateLimiter::per_minute(1))
        .with_trust_forwarded_for(trust_forwarded_for);
    (client, activity_finder::app::routes(Arc::new(state)))
}

#[tokio::test]
async fn test_clients_are_rate_limited_by_peer_address() {
    init_test_logging();
    let (client, router) = limited_app(false);

    let first = router
        .clone()
        .oneshot(request_from([198, 51, 100, 1], None))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .clone()
        .oneshot(request_from([198, 51, 100, 1], None))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(second.headers().contains_key(header::RETRY_AFTER));

    let other = router
        .oneshot(request_from([198, 51, 100, 2], None))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    assert_eq!(client.prompts().len(), 2);
}

#[tokio::test]
async fn test_forwarded_header_does_not_reset_window_by_default() {
    init_test_logging();
    let (client, router) = limited_app(false);

    let first = router
        .clone()
        .oneshot(request_from([198, 51, 100, 1], Some("203.0.113.1")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    // A fresh header value from the same peer stays in the same window
    let spoofed = router
        .oneshot(request_from([198, 51, 100, 1], Some("203.0.113.2")))
        .await
        .unwrap();
    assert_eq!(spoofed.status(), StatusCode::TOO_MANY_REQUESTS);

    assert_eq!(client.prompts().len(), 1);
}

#[tokio::test]
async fn test_trusted_proxy_limits_by_forwarded_address() {
    init_test_logging();
    let (client, router) = limited_app(true);
    let proxy = [10, 0, 0, 1];

    let first = router
        .clone()
        .oneshot(request_from(proxy, Some("203.0.113.1")))
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);

    let second = router
        .clone()
        .oneshot(request_from(proxy, Some("203.0.113.1")))
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);

    let other = router
        .oneshot(request_from(proxy, Some("203.0.113.2")))
        .await
        .unwrap();
    assert_eq!(other.status(), StatusCode::OK);

    assert_eq!(client.prompts().len(), 2);
}

#[tokio::test]
async fn test_status_reports_counters_and_model() {
    init_test_logging();
    let (_, _, router) = app_with(
        FakeModelClient::new()
            .with_model("gemini-test")
            .with_response(MODEL_ANSWER),
    );

    let response = router
        .clone()
        .oneshot(post_json(&search_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["provider"], "fake");
    assert_eq!(body["model"], "gemini-test");
    assert_eq!(body["stats"]["request_count"], 1);
    assert_eq!(body["stats"]["success_count"], 1);
    assert_eq!(body["stats"]["error_count"], 0);
    assert!(body["build_info"].as_str().unwrap().starts_with("Version"));
}
