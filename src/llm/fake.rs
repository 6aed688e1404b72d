use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::llm::{
    ActivityModelClient, GenerationSettings, ModelCompletion, UpstreamError,
};

/// A fake model client for testing
///
/// Scripted outcomes are returned in order; once the script runs out every
/// call gets a fixed default answer. Each prompt is recorded so tests can
/// check what would have been sent upstream.
///
/// # Example
///
/// ```
/// use activity_finder::llm::fake::FakeModelClient;
/// use activity_finder::llm::{ActivityModelClient, GenerationSettings};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = FakeModelClient::new()
///         .with_response("**🎨 Art Walk - Friday 6pm**\nGalleries stay open late.");
///
///     let completion = client
///         .generate("find activities", &GenerationSettings::default())
///         .await?;
///
///     assert!(completion.text.contains("Art Walk"));
///     assert_eq!(client.prompts(), vec!["find activities".to_string()]);
///     Ok(())
/// }
/// ```
pub struct FakeModelClient {
    outcomes: Mutex<VecDeque<Result<ModelCompletion, UpstreamError>>>,
    delay: Option<Duration>,
    model: String,
    // Track prompts for verification in tests
    prompts: Mutex<Vec<String>>,
    settings: Mutex<Vec<GenerationSettings>>,
}

impl Default for FakeModelClient {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeModelClient {
    pub const DEFAULT_RESPONSE: &'static str = "Fake default response";

    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            delay: None,
            model: "fake-model".to_string(),
            prompts: Mutex::new(vec![]),
            settings: Mutex::new(vec![]),
        }
    }

    /// Add a text response to be returned by the fake client
    pub fn with_response(self, response: &str) -> Self {
        self.with_completion(ModelCompletion {
            text: response.to_string(),
            search_queries: vec![],
        })
    }

    /// Add a full completion, including grounding queries
    pub fn with_completion(self, completion: ModelCompletion) -> Self {
        self.outcomes.lock().unwrap().push_back(Ok(completion));
        self
    }

    /// Make the next call fail with the given error
    pub fn with_error(self, error: UpstreamError) -> Self {
        self.outcomes.lock().unwrap().push_back(Err(error));
        self
    }

    /// Sleep before answering, to exercise timeouts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn settings(&self) -> Vec<GenerationSettings> {
        self.settings.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActivityModelClient for FakeModelClient {
    async fn generate(
        &self,
        prompt: &str,
        settings: &GenerationSettings,
    ) -> Result<ModelCompletion, UpstreamError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.settings.lock().unwrap().push(settings.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.outcomes.lock().unwrap().pop_front();
        next.unwrap_or_else(|| {
            Ok(ModelCompletion {
                text: Self::DEFAULT_RESPONSE.to_string(),
                search_queries: vec![],
            })
        })
    }

    fn provider_name(&self) -> &'static str {
        "fake"
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
