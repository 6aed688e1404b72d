use crate::llm::fake::FakeModelClient;
use crate::llm::ActivityModelClient;
use crate::AppState;
use std::sync::Arc;
use std::sync::Once;

static INIT: Once = Once::new();

/// Initialize test logging in a thread-safe way.
/// This function ensures that logging is initialized only once across all tests,
/// even when multiple test files are running in parallel.
pub fn init_test_logging() {
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "info,tower_http=debug".into()),
            )
            .with_test_writer()
            .finish();

        // Another harness may already own the global subscriber
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// Builds an `AppState` whose searches are answered by `client`.
pub fn state_with_fake(client: FakeModelClient) -> (Arc<FakeModelClient>, AppState) {
    let client = Arc::new(client);
    let dyn_client: Arc<dyn ActivityModelClient> = client.clone();
    (client, AppState::new_for_testing_with_client(Some(dyn_client)))
}
