use crate::activities::{parse_activities, ActivityRecord, MAX_ACTIVITIES};
use crate::criteria::SearchCriteria;
use crate::llm::{
    generate_with_retry, ActivityModelClient, GenerationSettings,
    RetryPolicy, UpstreamError,
};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

/// Parsed recommendations along with what produced them.
#[derive(Debug, Clone)]
pub struct ActivitySearch {
    pub activities: Vec<ActivityRecord>,
    pub search_queries: Vec<String>,
    pub model: String,
}

#[derive(Debug, Error)]
pub enum FinderError {
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// The model answered but no line looked like an activity header. The
    /// raw answer is kept so it can be shown for diagnosis.
    #[error("Failed to parse activities from model response")]
    NoActivities { raw_response: String },
}

/// Builds the prompt, asks the model and parses its answer.
#[instrument(
    skip_all,
    fields(city = %criteria.city, availability = %criteria.availability)
)]
pub async fn find_activities(
    client: &dyn ActivityModelClient,
    criteria: &SearchCriteria,
    settings: &GenerationSettings,
    policy: &RetryPolicy,
) -> Result<ActivitySearch, FinderError> {
    let prompt = criteria.to_prompt();
    debug!(prompt_chars = prompt.len(), "Built activity prompt");

    let completion =
        generate_with_retry(client, &prompt, settings, policy).await?;

    let activities = parse_activities(&completion.text);
    if activities.is_empty() {
        warn!(
            raw_chars = completion.text.len(),
            "No activities found in model response"
        );
        return Err(FinderError::NoActivities {
            raw_response: completion.text,
        });
    }
    if activities.len() < MAX_ACTIVITIES {
        warn!(count = activities.len(), "Model returned fewer activities than requested");
    }

    info!(count = activities.len(), "Parsed activities");
    Ok(ActivitySearch {
        activities,
        search_queries: completion.search_queries,
        model: client.model_name().to_string(),
    })
}
