//! Synchronous coordinator for the story projections, the playback cursor
//! and the creation gate.
//!
//! Network-bound actions are split in two: `begin_*` applies the optimistic
//! part and hands back a tagged request, `resolve_*` applies the response.
//! A response whose tag no longer matches the engine state is discarded.

use std::collections::HashSet;

use serde::Serialize;
use tracing::{debug, warn};

use crate::DomainResult;
use crate::creation::{CreationGate, DEFAULT_MAX_ACTIVE_STORIES, StoryDraft, validate_story_draft};
use crate::error::DomainError;
use crate::expiry;
use crate::grouping::GroupSummary;
use crate::playback::{PlaybackConfig, PlaybackCursor, PlaybackEvent, TimerToken};
use crate::reconciliation::{MutationKind, MutationResult, Reconciled, StoryProjections};
use crate::stories::{StoryRecord, relative_age_label};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    pub playback: PlaybackConfig,
    pub max_active_stories: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            playback: PlaybackConfig::default(),
            max_active_stories: DEFAULT_MAX_ACTIVE_STORIES,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DetailRequest {
    pub request_id: u64,
    pub story_id: String,
    pub author_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LikeRequest {
    pub request_id: u64,
    pub story_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeleteRequest {
    pub request_id: u64,
    pub story_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreateRequest {
    pub request_id: u64,
    pub draft: StoryDraft,
}

/// Result of one cursor transition, plus the detail fetch it calls for.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineStep {
    pub event: PlaybackEvent,
    pub detail: Option<DetailRequest>,
}

impl EngineStep {
    fn idle(event: PlaybackEvent) -> Self {
        Self {
            event,
            detail: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DetailOutcome {
    Applied,
    /// The cursor moved on or closed before the response arrived.
    Stale,
    /// The record no longer exists; the cursor was clamped.
    Removed(EngineStep),
    /// Non-fatal: playback stays open and progress pauses.
    Failed(DomainError),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Resolution {
    pub reconciled: Reconciled,
    pub step: EngineStep,
    pub error: Option<DomainError>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum Segment {
    Done,
    Current { progress: f64 },
    Pending,
}

/// Everything the view layer needs to draw the open story.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Frame {
    pub story_id: String,
    pub author_id: String,
    pub author_name: String,
    pub avatar_url: Option<String>,
    pub title: String,
    pub media_url: Option<String>,
    pub segments: Vec<Segment>,
    pub view_count: u64,
    pub like_count: u64,
    pub is_liked: bool,
    pub can_delete: bool,
    pub age_label: String,
    pub paused: bool,
}

#[derive(Clone, Debug)]
pub struct StoryEngine {
    config: EngineConfig,
    projections: StoryProjections,
    cursor: PlaybackCursor,
    gate: CreationGate,
    next_request_id: u64,
    inflight_detail: Option<u64>,
    pending_deletes: HashSet<String>,
    create_in_flight: bool,
}

impl Default for StoryEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl StoryEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            projections: StoryProjections::default(),
            cursor: PlaybackCursor::new(config.playback),
            gate: CreationGate::new(config.max_active_stories),
            next_request_id: 0,
            inflight_detail: None,
            pending_deletes: HashSet::new(),
            create_in_flight: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn projections(&self) -> &StoryProjections {
        &self.projections
    }

    pub fn cursor(&self) -> &PlaybackCursor {
        &self.cursor
    }

    pub fn gate(&self) -> &CreationGate {
        &self.gate
    }

    pub fn timer(&self) -> Option<TimerToken> {
        self.cursor.timer()
    }

    pub fn groups(&self) -> Vec<GroupSummary> {
        self.projections.index().summaries()
    }

    pub fn viewer_active_count(&self, now_ms: i64) -> usize {
        expiry::active_records(self.projections.records(), now_ms)
            .filter(|record| record.author.is_viewer)
            .count()
    }

    /// Installs a fresh fetch and resynchronises the cursor against it.
    pub fn install_records(&mut self, records: Vec<StoryRecord>, now_ms: i64) -> EngineStep {
        self.projections.install(records, now_ms);
        self.after_rebuild(now_ms)
    }

    /// Re-evaluates expiry without refetching.
    pub fn refresh_expiry(&mut self, now_ms: i64) -> EngineStep {
        self.projections.rebuild(now_ms);
        self.after_rebuild(now_ms)
    }

    pub fn open(
        &mut self,
        author_id: &str,
        start_index: usize,
        now_ms: i64,
    ) -> DomainResult<EngineStep> {
        let group = self
            .projections
            .index()
            .get(author_id)
            .ok_or(DomainError::NotFound)?;
        let event = self.cursor.open(group, start_index);
        Ok(self.on_cursor_event(event, now_ms))
    }

    pub fn tick(&mut self, token: TimerToken, now_ms: i64) -> EngineStep {
        let event = self.cursor.tick(token);
        self.on_cursor_event(event, now_ms)
    }

    pub fn next(&mut self, now_ms: i64) -> EngineStep {
        let event = self.cursor.next();
        self.on_cursor_event(event, now_ms)
    }

    pub fn previous(&mut self, now_ms: i64) -> EngineStep {
        let event = self.cursor.previous();
        self.on_cursor_event(event, now_ms)
    }

    pub fn close(&mut self) -> EngineStep {
        let event = self.cursor.close();
        self.on_cursor_event(event, 0)
    }

    /// Whether `request` is the detail fetch the cursor is waiting on.
    pub fn awaits_detail(&self, request: &DetailRequest) -> bool {
        self.inflight_detail == Some(request.request_id)
            && self.cursor.current_story_id() == Some(request.story_id.as_str())
    }

    /// Reissues the detail fetch for a paused record.
    pub fn retry_detail(&mut self, now_ms: i64) -> Option<DetailRequest> {
        if !self.cursor.is_paused() {
            return None;
        }
        let story_id = self.cursor.current_story_id()?.to_string();
        self.projections
            .apply_mutation(&story_id, MutationKind::Viewed, MutationResult::Pending, now_ms);
        Some(self.issue_detail(story_id))
    }

    pub fn resolve_detail(
        &mut self,
        request: &DetailRequest,
        result: DomainResult<StoryRecord>,
        now_ms: i64,
    ) -> DetailOutcome {
        if !self.awaits_detail(request) {
            debug!(
                request_id = request.request_id,
                story_id = %request.story_id,
                "discarding stale story detail"
            );
            return DetailOutcome::Stale;
        }
        self.inflight_detail = None;

        match result {
            Ok(record) => {
                self.projections.apply_mutation(
                    &request.story_id,
                    MutationKind::Viewed,
                    MutationResult::Confirmed(Some(record)),
                    now_ms,
                );
                self.cursor.resume();
                DetailOutcome::Applied
            }
            Err(DomainError::NotFound) => {
                let step = self.remove_record(&request.story_id, MutationKind::Viewed, now_ms);
                DetailOutcome::Removed(step)
            }
            Err(err) => {
                warn!(
                    story_id = %request.story_id,
                    error = %err,
                    "story detail fetch failed, pausing playback"
                );
                self.projections.apply_mutation(
                    &request.story_id,
                    MutationKind::Viewed,
                    MutationResult::Failed(err.clone()),
                    now_ms,
                );
                self.cursor.pause();
                DetailOutcome::Failed(err)
            }
        }
    }

    pub fn begin_like(&mut self, story_id: &str, now_ms: i64) -> DomainResult<LikeRequest> {
        if self.projections.record(story_id).is_none() {
            return Err(DomainError::NotFound);
        }
        if self.projections.is_like_pending(story_id) {
            return Err(DomainError::Conflict);
        }
        self.projections.apply_mutation(
            story_id,
            MutationKind::LikeToggled,
            MutationResult::Pending,
            now_ms,
        );
        Ok(LikeRequest {
            request_id: self.next_request_id(),
            story_id: story_id.to_string(),
        })
    }

    pub fn resolve_like(
        &mut self,
        request: &LikeRequest,
        result: DomainResult<Option<StoryRecord>>,
        now_ms: i64,
    ) -> Resolution {
        match result {
            Ok(record) => Resolution {
                reconciled: self.projections.apply_mutation(
                    &request.story_id,
                    MutationKind::LikeToggled,
                    MutationResult::Confirmed(record),
                    now_ms,
                ),
                step: EngineStep::idle(PlaybackEvent::Unchanged),
                error: None,
            },
            Err(DomainError::NotFound) => Resolution {
                reconciled: Reconciled::Removed,
                step: self.remove_record(&request.story_id, MutationKind::LikeToggled, now_ms),
                error: Some(DomainError::NotFound),
            },
            Err(err) => Resolution {
                reconciled: self.projections.apply_mutation(
                    &request.story_id,
                    MutationKind::LikeToggled,
                    MutationResult::Failed(err.clone()),
                    now_ms,
                ),
                step: EngineStep::idle(PlaybackEvent::Unchanged),
                error: Some(err),
            },
        }
    }

    pub fn begin_delete(&mut self, story_id: &str) -> DomainResult<DeleteRequest> {
        let record = self
            .projections
            .record(story_id)
            .ok_or(DomainError::NotFound)?;
        if !record.can_delete() {
            return Err(DomainError::Unauthorized(
                "only the author can delete a story".into(),
            ));
        }
        if !self.pending_deletes.insert(story_id.to_string()) {
            return Err(DomainError::Conflict);
        }
        Ok(DeleteRequest {
            request_id: self.next_request_id(),
            story_id: story_id.to_string(),
        })
    }

    pub fn resolve_delete(
        &mut self,
        request: &DeleteRequest,
        result: DomainResult<()>,
        now_ms: i64,
    ) -> Resolution {
        self.pending_deletes.remove(&request.story_id);
        match result {
            Ok(()) | Err(DomainError::NotFound) => Resolution {
                reconciled: Reconciled::Removed,
                step: self.remove_record(&request.story_id, MutationKind::Deleted, now_ms),
                error: None,
            },
            Err(err) => Resolution {
                reconciled: Reconciled::Ignored,
                step: EngineStep::idle(PlaybackEvent::Unchanged),
                error: Some(err),
            },
        }
    }

    /// Checks the quota and the draft before anything reaches the network.
    pub fn begin_create(&mut self, draft: StoryDraft, now_ms: i64) -> DomainResult<CreateRequest> {
        let active = self.viewer_active_count(now_ms);
        self.gate.sync(active);
        self.gate.check()?;
        validate_story_draft(&draft)?;
        if self.create_in_flight {
            return Err(DomainError::Conflict);
        }
        self.create_in_flight = true;
        Ok(CreateRequest {
            request_id: self.next_request_id(),
            draft,
        })
    }

    /// Inserts the created record and resynchronises the gate and cursor
    /// against the rebuilt index.
    pub fn resolve_create(
        &mut self,
        request: &CreateRequest,
        result: DomainResult<StoryRecord>,
        now_ms: i64,
    ) -> DomainResult<(StoryRecord, EngineStep)> {
        self.create_in_flight = false;
        let mut record = result?;
        record.author.is_viewer = true;
        debug!(
            request_id = request.request_id,
            story_id = %record.story_id,
            "story created"
        );
        let story_id = record.story_id.clone();
        self.projections.apply_mutation(
            &story_id,
            MutationKind::Created,
            MutationResult::Confirmed(Some(record.clone())),
            now_ms,
        );
        let step = self.after_rebuild(now_ms);
        Ok((record, step))
    }

    pub fn frame(&self, now_ms: i64) -> Option<Frame> {
        let snapshot = self.cursor.snapshot()?;
        let record = self
            .projections
            .detail()
            .filter(|detail| detail.story_id == snapshot.story_id)
            .or_else(|| self.projections.record(&snapshot.story_id))?;

        let segments = (0..snapshot.len)
            .map(|position| match position.cmp(&snapshot.index) {
                std::cmp::Ordering::Less => Segment::Done,
                std::cmp::Ordering::Equal => Segment::Current {
                    progress: snapshot.progress,
                },
                std::cmp::Ordering::Greater => Segment::Pending,
            })
            .collect();

        Some(Frame {
            story_id: record.story_id.clone(),
            author_id: record.author.author_id.clone(),
            author_name: record.author.display_name.clone(),
            avatar_url: record.author.avatar_url.clone(),
            title: record.title.clone(),
            media_url: record.media_url.clone(),
            segments,
            view_count: record.view_count,
            like_count: record.like_count,
            is_liked: record.is_liked,
            can_delete: record.can_delete(),
            age_label: relative_age_label(record.created_at_ms, now_ms),
            paused: snapshot.paused,
        })
    }

    fn after_rebuild(&mut self, now_ms: i64) -> EngineStep {
        let active = self.viewer_active_count(now_ms);
        self.gate.sync(active);
        let event = self.cursor.sync(self.projections.index());
        self.on_cursor_event(event, now_ms)
    }

    fn remove_record(&mut self, story_id: &str, kind: MutationKind, now_ms: i64) -> EngineStep {
        self.projections.apply_mutation(
            story_id,
            kind,
            MutationResult::Failed(DomainError::NotFound),
            now_ms,
        );
        let active = self.viewer_active_count(now_ms);
        self.gate.sync(active);
        let event = self.cursor.record_removed(story_id);
        self.on_cursor_event(event, now_ms)
    }

    fn on_cursor_event(&mut self, event: PlaybackEvent, now_ms: i64) -> EngineStep {
        let moved_to = match &event {
            PlaybackEvent::Moved { story_id, .. } => Some(story_id.clone()),
            PlaybackEvent::Closed => {
                if let Some(request_id) = self.inflight_detail.take() {
                    debug!(request_id, "abandoning in-flight story detail");
                }
                self.projections.focus(None);
                None
            }
            _ => None,
        };
        let Some(story_id) = moved_to else {
            return EngineStep::idle(event);
        };

        // A pause belongs to the record whose fetch failed.
        self.cursor.resume();
        self.projections.focus(Some(&story_id));
        self.projections.apply_mutation(
            &story_id,
            MutationKind::Viewed,
            MutationResult::Pending,
            now_ms,
        );
        EngineStep {
            event,
            detail: Some(self.issue_detail(story_id)),
        }
    }

    fn issue_detail(&mut self, story_id: String) -> DetailRequest {
        let request_id = self.next_request_id();
        self.inflight_detail = Some(request_id);
        DetailRequest {
            request_id,
            author_id: self.cursor.author_id().unwrap_or_default().to_string(),
            story_id,
        }
    }

    fn next_request_id(&mut self) -> u64 {
        self.next_request_id = self.next_request_id.wrapping_add(1);
        self.next_request_id
    }
}
