use serde::{Deserialize, Serialize};

use crate::DomainResult;
use crate::error::DomainError;
use crate::stories::StoryDuration;

pub const DEFAULT_MAX_ACTIVE_STORIES: usize = 3;
const MAX_TITLE_LENGTH: usize = 120;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MediaUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoryDraft {
    pub title: String,
    pub media: Option<MediaUpload>,
    pub duration: StoryDuration,
}

/// Per-author quota on concurrently active stories.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreationGate {
    max_active: usize,
    tracked_active: usize,
}

impl Default for CreationGate {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACTIVE_STORIES)
    }
}

impl CreationGate {
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active,
            tracked_active: 0,
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn tracked_active(&self) -> usize {
        self.tracked_active
    }

    pub fn can_create(&self, author_active_count: usize) -> bool {
        author_active_count < self.max_active
    }

    pub fn check(&self) -> DomainResult<()> {
        if self.can_create(self.tracked_active) {
            Ok(())
        } else {
            Err(DomainError::QuotaExceeded {
                max: self.max_active,
            })
        }
    }

    /// Replaces the tracked count with one recomputed from fresh records.
    pub fn sync(&mut self, author_active_count: usize) {
        self.tracked_active = author_active_count;
    }
}

pub fn validate_story_draft(draft: &StoryDraft) -> DomainResult<()> {
    let title = draft.title.trim();
    if title.is_empty() {
        return Err(DomainError::Validation("title is required".into()));
    }
    if title.chars().count() > MAX_TITLE_LENGTH {
        return Err(DomainError::Validation(format!(
            "title exceeds max length of {MAX_TITLE_LENGTH}"
        )));
    }

    let Some(media) = &draft.media else {
        return Err(DomainError::Validation("image is required".into()));
    };
    if media.bytes.is_empty() {
        return Err(DomainError::Validation("image is empty".into()));
    }
    if !media.content_type.starts_with("image/") {
        return Err(DomainError::Validation(format!(
            "unsupported media type: {}",
            media.content_type
        )));
    }
    if media.file_name.trim().is_empty() {
        return Err(DomainError::Validation("image file name is required".into()));
    }

    Ok(())
}
