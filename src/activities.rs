//! Recovers activity records from the model's free-text answer.
//!
//! The model is asked for five entries shaped like
//! `**🎨 Event Name - Date/Time**` followed by a description line, but
//! grounded answers drift: preambles, notes, inline descriptions, missing
//! bold markers and extra entries all show up. Parsing is a line scan over
//! a two-state machine; anything that does not fit is dropped instead of
//! failing the whole answer.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Upper bound on records returned from one answer.
pub const MAX_ACTIVITIES: usize = 5;

/// Used when a record has no detectable emoji.
pub const DEFAULT_EMOJI: &str = "🎯";

const BOLD_MARKER: &str = "**";

/// Lines starting with these are the model talking about its answer.
const PREAMBLE_PREFIXES: [&str; 4] = ["Here", "Okay", "I will", "Note:"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub emoji: String,
    pub title: String,
    pub description: String,
}

impl ActivityRecord {
    fn append_description(&mut self, line: &str) {
        if self.description.is_empty() {
            self.description = line.to_string();
        } else {
            self.description.push(' ');
            self.description.push_str(line);
        }
    }

    fn normalized(self) -> Self {
        Self {
            emoji: if self.emoji.is_empty() {
                DEFAULT_EMOJI.to_string()
            } else {
                self.emoji
            },
            title: collapse_whitespace(&self.title),
            description: collapse_whitespace(&self.description),
        }
    }
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// One emoji token: a pictograph, a run of regional indicators (flags) or a
// keycap, plus any variation selectors, skin tones, tag characters and
// zero-width-joined pictographs that belong to it. Bare digits, '#' and '*'
// are not emoji so numbered lists never open a record.
const EMOJI_TOKEN: &str = concat!(
    r"(?:\p{Extended_Pictographic}|[\x{1F1E6}-\x{1F1FF}]|[0-9#*]\x{FE0F}?\x{20E3})",
    r"[\x{FE0E}\x{FE0F}\x{1F3FB}-\x{1F3FF}\x{E0020}-\x{E007F}]*",
    r"(?:\x{200D}\p{Extended_Pictographic}[\x{FE0E}\x{FE0F}\x{1F3FB}-\x{1F3FF}]*)*",
);

fn emoji_prefix_regex() -> &'static Regex {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    PREFIX.get_or_init(|| {
        Regex::new(&format!(r"^(?:{})+", EMOJI_TOKEN))
            .expect("emoji prefix pattern is valid")
    })
}

// A title stops at the first run of 2+ whitespace or at the first period
// followed by whitespace. Known to mis-split abbreviations ("St. Mary's").
fn title_split_regex() -> &'static Regex {
    static SPLIT: OnceLock<Regex> = OnceLock::new();
    SPLIT.get_or_init(|| {
        Regex::new(r"^(?P<title>.+?)(?:\s{2,}|\.\s+)(?P<description>.+)$")
            .expect("title split pattern is valid")
    })
}

/// Parses a header line into a fresh record, or `None` when the line does
/// not begin with an emoji followed by text.
fn parse_header(line: &str) -> Option<ActivityRecord> {
    // The prefix match is the longest one, so a sequence is never split
    // between the emoji and the title.
    let prefix = emoji_prefix_regex().find(line)?;
    let rest = line[prefix.end()..].trim_start();
    if rest.is_empty() {
        return None;
    }
    let emoji = prefix.as_str().to_string();

    let (title, description) = match title_split_regex().captures(rest) {
        Some(split) => {
            (split["title"].to_string(), split["description"].to_string())
        }
        None => (rest.to_string(), String::new()),
    };

    Some(ActivityRecord {
        emoji,
        title,
        description,
    })
}

fn is_preamble(line: &str) -> bool {
    PREAMBLE_PREFIXES
        .iter()
        .any(|prefix| line.starts_with(prefix))
}

#[derive(Debug, Default)]
enum ParserState {
    #[default]
    Idle,
    Collecting(ActivityRecord),
}

impl ParserState {
    /// Moves any open record into `out` and returns to `Idle`.
    fn finalize(&mut self, out: &mut Vec<ActivityRecord>) {
        if let ParserState::Collecting(record) = std::mem::take(self) {
            out.push(record.normalized());
        }
    }

    fn accept(&mut self, line: &str, out: &mut Vec<ActivityRecord>) {
        if let Some(record) = parse_header(line) {
            self.finalize(out);
            *self = ParserState::Collecting(record);
            return;
        }
        match self {
            ParserState::Collecting(record) if !is_preamble(line) => {
                record.append_description(line);
            }
            _ => {}
        }
    }
}

/// Parses raw model output into at most [`MAX_ACTIVITIES`] records, in the
/// order they appear.
///
/// Never fails: an answer without any emoji-led line yields an empty vector,
/// and it is up to the caller to treat that as an error.
pub fn parse_activities(raw: &str) -> Vec<ActivityRecord> {
    let cleaned = raw.replace(BOLD_MARKER, "");
    let mut activities = Vec::new();
    let mut state = ParserState::Idle;

    for line in cleaned.lines().map(str::trim).filter(|l| !l.is_empty()) {
        state.accept(line, &mut activities);
    }
    state.finalize(&mut activities);

    activities.truncate(MAX_ACTIVITIES);
    activities
}
