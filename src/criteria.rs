use crate::prompts::build_activity_prompt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const MIN_MILES_RANGE: u32 = 1;
pub const MAX_MILES_RANGE: u32 = 500;
const MAX_PREFERENCES_LEN: usize = 500;

/// Everything the user told us about their family. Built once per request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    pub city: String,
    pub kids_ages: String,
    pub availability: String,
    pub miles_range: u32,
    pub preferences: Option<String>,
}

impl SearchCriteria {
    pub fn to_prompt(&self) -> String {
        build_activity_prompt(
            &self.city,
            &self.kids_ages,
            &self.availability,
            self.miles_range,
            self.preferences.as_deref(),
        )
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CriteriaError {
    #[error("Missing required fields: {}", .0.join(", "))]
    MissingFields(Vec<&'static str>),

    #[error("{field} {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// The request body as it arrives over the wire, before any checks.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawCriteria {
    pub city: Option<String>,
    pub kids_ages: Option<String>,
    pub availability: Option<String>,
    /// Sent as a number by the slider, but older clients send a string.
    pub miles_range: Option<Value>,
    #[serde(alias = "preferences")]
    pub other_preferences: Option<String>,
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

fn check_length(
    field: &'static str,
    value: &str,
    min: usize,
    max: usize,
) -> Result<(), CriteriaError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(CriteriaError::Invalid {
            field,
            reason: format!("must be between {} and {} characters", min, max),
        });
    }
    Ok(())
}

fn check_charset(
    field: &'static str,
    value: &str,
    allowed: impl Fn(char) -> bool,
    description: &str,
) -> Result<(), CriteriaError> {
    if let Some(bad) = value.chars().find(|c| !allowed(*c)) {
        return Err(CriteriaError::Invalid {
            field,
            reason: format!(
                "may only contain {} (found {:?})",
                description, bad
            ),
        });
    }
    Ok(())
}

fn parse_miles(value: &Value) -> Option<u32> {
    match value {
        Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl RawCriteria {
    /// Trims every field, reports all missing required fields at once, then
    /// checks lengths and character sets.
    pub fn validate(&self) -> Result<SearchCriteria, CriteriaError> {
        let city = non_empty(self.city.as_ref());
        let kids_ages = non_empty(self.kids_ages.as_ref());
        let availability = non_empty(self.availability.as_ref());
        let miles_present = match &self.miles_range {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };

        let mut missing = Vec::new();
        if city.is_none() {
            missing.push("city");
        }
        if kids_ages.is_none() {
            missing.push("kidsAges");
        }
        if availability.is_none() {
            missing.push("availability");
        }
        if !miles_present {
            missing.push("milesRange");
        }
        let (Some(city), Some(kids_ages), Some(availability), Some(miles)) =
            (city, kids_ages, availability, self.miles_range.as_ref())
        else {
            return Err(CriteriaError::MissingFields(missing));
        };
        if !missing.is_empty() {
            return Err(CriteriaError::MissingFields(missing));
        }

        check_length("city", city, 2, 100)?;
        check_charset(
            "city",
            city,
            |c| c.is_alphabetic() || matches!(c, ' ' | '-' | ','),
            "letters, spaces, hyphens and commas",
        )?;

        check_length("kidsAges", kids_ages, 1, 50)?;
        check_charset(
            "kidsAges",
            kids_ages,
            |c| c.is_ascii_digit() || matches!(c, ' ' | ',' | '-'),
            "digits, spaces, commas and hyphens",
        )?;

        check_length("availability", availability, 2, 100)?;
        check_charset(
            "availability",
            availability,
            |c| {
                c.is_alphanumeric()
                    || matches!(
                        c,
                        ' ' | ',' | '-' | ':' | '/' | '(' | ')' | '\'' | '.' | '&'
                    )
            },
            "letters, digits, spaces and , - : / ( ) ' . &",
        )?;

        let miles_range = parse_miles(miles)
            .filter(|m| (MIN_MILES_RANGE..=MAX_MILES_RANGE).contains(m))
            .ok_or_else(|| CriteriaError::Invalid {
                field: "milesRange",
                reason: format!(
                    "must be a whole number between {} and {}",
                    MIN_MILES_RANGE, MAX_MILES_RANGE
                ),
            })?;

        let preferences = non_empty(self.other_preferences.as_ref());
        if let Some(preferences) = preferences {
            if preferences.chars().count() > MAX_PREFERENCES_LEN {
                return Err(CriteriaError::Invalid {
                    field: "otherPreferences",
                    reason: format!(
                        "must be at most {} characters",
                        MAX_PREFERENCES_LEN
                    ),
                });
            }
        }

        Ok(SearchCriteria {
            city: city.to_string(),
            kids_ages: kids_ages.to_string(),
            availability: availability.to_string(),
            miles_range,
            preferences: preferences.map(str::to_string),
        })
    }
}
