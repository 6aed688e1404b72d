use regex::{Captures, Regex};
use std::sync::OnceLock;

/// Instruction template sent to the grounded model. Placeholders are
/// `{city}`, `{kids_ages}`, `{availability}`, `{miles_range}` and
/// `{preferences}`.
///
/// The parser in `crate::activities` depends on the output format this
/// template mandates; change them together.
pub const ACTIVITY_PROMPT_TEMPLATE: &str =
    include_str!("templates/activity_prompt.txt");

/// Substituted when the user gave no preferences.
pub const NO_PREFERENCES: &str = "none specified";

fn placeholder_regex() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(
            r"\{(city|kids_ages|availability|miles_range|preferences)\}",
        )
        .expect("placeholder pattern is valid")
    })
}

/// Builds the activity search prompt.
///
/// Every value is interpolated verbatim in a single pass, so user text that
/// looks like a placeholder is never expanded a second time. No validation
/// happens here; callers reject bad input beforehand.
pub fn build_activity_prompt(
    city: &str,
    kids_ages: &str,
    availability: &str,
    miles_range: u32,
    preferences: Option<&str>,
) -> String {
    let preferences = preferences
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .unwrap_or(NO_PREFERENCES);
    let miles_range = miles_range.to_string();

    placeholder_regex()
        .replace_all(ACTIVITY_PROMPT_TEMPLATE, |caps: &Captures| {
            match &caps[1] {
                "city" => city,
                "kids_ages" => kids_ages,
                "availability" => availability,
                "miles_range" => miles_range.as_str(),
                _ => preferences,
            }
            .to_string()
        })
        .into_owned()
}
