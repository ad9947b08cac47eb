use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;

pub const HOUR_MS: i64 = 60 * 60 * 1000;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "u32", into = "u32")]
pub enum StoryDuration {
    #[default]
    SixHours,
    TwelveHours,
    TwentyFourHours,
}

impl StoryDuration {
    pub fn from_hours(hours: u32) -> Option<Self> {
        match hours {
            6 => Some(StoryDuration::SixHours),
            12 => Some(StoryDuration::TwelveHours),
            24 => Some(StoryDuration::TwentyFourHours),
            _ => None,
        }
    }

    pub fn hours(self) -> u32 {
        match self {
            StoryDuration::SixHours => 6,
            StoryDuration::TwelveHours => 12,
            StoryDuration::TwentyFourHours => 24,
        }
    }

    pub fn ttl_ms(self) -> i64 {
        i64::from(self.hours()) * HOUR_MS
    }

    /// On-screen window when pacing scales with the declared duration: one
    /// second per hour of lifetime.
    pub fn scaled_view_window_ms(self) -> u64 {
        u64::from(self.hours()) * 1_000
    }
}

impl TryFrom<u32> for StoryDuration {
    type Error = DomainError;

    fn try_from(hours: u32) -> Result<Self, Self::Error> {
        StoryDuration::from_hours(hours).ok_or_else(|| {
            DomainError::Validation(format!("unsupported story duration: {hours}"))
        })
    }
}

impl From<StoryDuration> for u32 {
    fn from(value: StoryDuration) -> Self {
        value.hours()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoryAuthor {
    pub author_id: String,
    pub display_name: String,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
    pub is_viewer: bool,
}

impl StoryAuthor {
    pub fn short_name(&self) -> &str {
        self.display_name
            .split_whitespace()
            .next()
            .unwrap_or(self.display_name.as_str())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoryRecord {
    pub story_id: String,
    pub author: StoryAuthor,
    pub media_url: Option<String>,
    pub title: String,
    pub created_at_ms: i64,
    pub duration: StoryDuration,
    /// Explicit on-screen duration, overriding the pacing policy.
    pub view_window_ms: Option<u64>,
    pub view_count: u64,
    pub like_count: u64,
    pub is_viewed: bool,
    pub is_liked: bool,
}

impl StoryRecord {
    pub fn can_delete(&self) -> bool {
        self.author.is_viewer
    }
}

/// Loosely typed story as decoded from a backend response.
#[derive(Clone, Debug, Default)]
pub struct StoryPayload {
    pub story_id: Option<String>,
    pub author_id: Option<String>,
    pub author_name: Option<String>,
    pub author_username: Option<String>,
    pub author_avatar_url: Option<String>,
    pub is_author: Option<bool>,
    pub media_url: Option<String>,
    pub title: Option<String>,
    pub created_at: Option<String>,
    pub duration_hours: Option<u32>,
    pub view_seconds: Option<u32>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
    pub is_viewed: Option<bool>,
    pub is_liked: Option<bool>,
}

pub fn validate_story_payload(payload: StoryPayload) -> DomainResult<StoryRecord> {
    let story_id = required_text(payload.story_id, "story id")?;
    let author_id = required_text(payload.author_id, "author id")?;
    let created_at = required_text(payload.created_at, "created_at")?;
    let created_at_ms = crate::util::parse_rfc3339_ms(&created_at)?;
    let hours = payload
        .duration_hours
        .ok_or_else(|| DomainError::Validation(format!("story {story_id} has no duration")))?;
    let duration = StoryDuration::try_from(hours)?;

    let username = non_blank(payload.author_username);
    let display_name = non_blank(payload.author_name)
        .or_else(|| username.clone())
        .unwrap_or_else(|| author_id.clone());

    let view_window_ms = match payload.view_seconds {
        Some(0) => {
            return Err(DomainError::Validation(format!(
                "story {story_id} has a zero view duration"
            )));
        }
        Some(seconds) => Some(u64::from(seconds) * 1_000),
        None => None,
    };

    Ok(StoryRecord {
        author: StoryAuthor {
            author_id,
            display_name,
            username,
            avatar_url: non_blank(payload.author_avatar_url),
            is_viewer: payload.is_author.unwrap_or(false),
        },
        media_url: non_blank(payload.media_url),
        title: payload.title.unwrap_or_default().trim().to_string(),
        created_at_ms,
        duration,
        view_window_ms,
        view_count: counter(payload.view_count, "view count", &story_id)?,
        like_count: counter(payload.like_count, "like count", &story_id)?,
        is_viewed: payload.is_viewed.unwrap_or(false),
        is_liked: payload.is_liked.unwrap_or(false),
        story_id,
    })
}

pub fn relative_age_label(created_at_ms: i64, now_ms: i64) -> String {
    let seconds = now_ms.saturating_sub(created_at_ms).max(0) / 1_000;
    if seconds < 60 {
        format!("{seconds}s ago")
    } else if seconds < 3_600 {
        format!("{}m ago", seconds / 60)
    } else if seconds < 86_400 {
        format!("{}h ago", seconds / 3_600)
    } else {
        format!("{}d ago", seconds / 86_400)
    }
}

fn required_text(value: Option<String>, field: &str) -> DomainResult<String> {
    non_blank(value).ok_or_else(|| DomainError::Validation(format!("{field} is required")))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn counter(value: Option<i64>, field: &str, story_id: &str) -> DomainResult<u64> {
    match value {
        None => Ok(0),
        Some(count) => u64::try_from(count).map_err(|_| {
            DomainError::Validation(format!("story {story_id} has a negative {field}"))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> StoryPayload {
        StoryPayload {
            story_id: Some("41".to_string()),
            author_id: Some("7".to_string()),
            author_name: Some("Dilnoza Karimova".to_string()),
            author_username: Some("dilnoza".to_string()),
            media_url: Some("https://cdn.example/41.jpg".to_string()),
            title: Some(" Morning run ".to_string()),
            created_at: Some("2025-03-01T08:00:00Z".to_string()),
            duration_hours: Some(12),
            view_count: Some(4),
            like_count: Some(1),
            is_viewed: Some(true),
            ..StoryPayload::default()
        }
    }

    #[test]
    fn payload_validates_into_record() {
        let record = validate_story_payload(payload()).unwrap();
        assert_eq!(record.story_id, "41");
        assert_eq!(record.title, "Morning run");
        assert_eq!(record.duration, StoryDuration::TwelveHours);
        assert_eq!(record.author.short_name(), "Dilnoza");
        assert!(!record.author.is_viewer);
        assert!(!record.is_liked);
        assert_eq!(record.view_count, 4);
        assert_eq!(record.view_window_ms, None);
    }

    #[test]
    fn missing_identity_is_rejected() {
        let mut input = payload();
        input.story_id = Some("  ".to_string());
        assert!(matches!(
            validate_story_payload(input),
            Err(DomainError::Validation(_))
        ));

        let mut input = payload();
        input.author_id = None;
        assert!(validate_story_payload(input).is_err());
    }

    #[test]
    fn unknown_duration_is_rejected() {
        let mut input = payload();
        input.duration_hours = Some(48);
        assert!(validate_story_payload(input).is_err());

        let mut input = payload();
        input.duration_hours = None;
        assert!(validate_story_payload(input).is_err());
    }

    #[test]
    fn negative_counters_are_rejected() {
        let mut input = payload();
        input.like_count = Some(-1);
        assert!(validate_story_payload(input).is_err());
    }

    #[test]
    fn display_name_falls_back_to_username() {
        let mut input = payload();
        input.author_name = None;
        let record = validate_story_payload(input).unwrap();
        assert_eq!(record.author.display_name, "dilnoza");
    }

    #[test]
    fn explicit_view_seconds_become_window() {
        let mut input = payload();
        input.view_seconds = Some(3);
        let record = validate_story_payload(input).unwrap();
        assert_eq!(record.view_window_ms, Some(3_000));
    }

    #[test]
    fn duration_serializes_as_hours() {
        let json = serde_json::to_string(&StoryDuration::TwentyFourHours).unwrap();
        assert_eq!(json, "24");
        let parsed: StoryDuration = serde_json::from_str("6").unwrap();
        assert_eq!(parsed, StoryDuration::SixHours);
        assert!(serde_json::from_str::<StoryDuration>("7").is_err());
    }

    #[test]
    fn relative_age_uses_largest_unit() {
        let now = 10 * 86_400_000;
        assert_eq!(relative_age_label(now - 45_000, now), "45s ago");
        assert_eq!(relative_age_label(now - 12 * 60_000, now), "12m ago");
        assert_eq!(relative_age_label(now - 3 * HOUR_MS, now), "3h ago");
        assert_eq!(relative_age_label(now - 2 * 24 * HOUR_MS, now), "2d ago");
        assert_eq!(relative_age_label(now + 5_000, now), "0s ago");
    }
}
