//! Keeps the flat record list, the author grouping index and the cursor
//! detail consistent. Every mutation result passes through
//! [`StoryProjections::apply_mutation`]; nothing else writes to a single
//! projection.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::grouping::GroupIndex;
use crate::stories::StoryRecord;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Viewed,
    LikeToggled,
    Deleted,
    Created,
}

#[derive(Clone, Debug, PartialEq)]
pub enum MutationResult {
    /// Optimistic application before the request resolves.
    Pending,
    /// Server acknowledged; carries the authoritative record when known.
    Confirmed(Option<StoryRecord>),
    Failed(DomainError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reconciled {
    Applied,
    Removed,
    RolledBack,
    Ignored,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ViewMark {
    prior_viewed: bool,
    prior_count: u64,
    confirmed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct LikeSnapshot {
    was_liked: bool,
    like_count: u64,
}

#[derive(Clone, Debug, Default)]
pub struct StoryProjections {
    records: Vec<StoryRecord>,
    index: GroupIndex,
    detail: Option<StoryRecord>,
    counted_views: HashMap<String, ViewMark>,
    pending_likes: HashMap<String, LikeSnapshot>,
}

impl StoryProjections {
    pub fn records(&self) -> &[StoryRecord] {
        &self.records
    }

    pub fn index(&self) -> &GroupIndex {
        &self.index
    }

    pub fn detail(&self) -> Option<&StoryRecord> {
        self.detail.as_ref()
    }

    pub fn record(&self, story_id: &str) -> Option<&StoryRecord> {
        self.records
            .iter()
            .find(|record| record.story_id == story_id)
    }

    pub fn is_like_pending(&self, story_id: &str) -> bool {
        self.pending_likes.contains_key(story_id)
    }

    /// Replaces the flat list with a fresh fetch and rebuilds the index.
    pub fn install(&mut self, records: Vec<StoryRecord>, now_ms: i64) {
        let mut seen = HashSet::new();
        self.records = records
            .into_iter()
            .filter(|record| seen.insert(record.story_id.clone()))
            .collect();
        self.counted_views
            .retain(|story_id, _| seen.contains(story_id));
        self.pending_likes
            .retain(|story_id, _| seen.contains(story_id));
        self.detail = self
            .detail
            .take()
            .and_then(|detail| self.record(&detail.story_id).cloned());
        self.rebuild(now_ms);
    }

    pub fn rebuild(&mut self, now_ms: i64) {
        self.index = GroupIndex::rebuild(&self.records, now_ms);
    }

    /// Points the detail projection at the record the cursor now plays,
    /// seeded from the flat list until its own detail arrives.
    pub(crate) fn focus(&mut self, story_id: Option<&str>) {
        match story_id {
            None => self.detail = None,
            Some(story_id) => {
                if self
                    .detail
                    .as_ref()
                    .is_some_and(|detail| detail.story_id == story_id)
                {
                    return;
                }
                self.detail = self.record(story_id).cloned();
            }
        }
    }

    pub fn apply_mutation(
        &mut self,
        story_id: &str,
        kind: MutationKind,
        result: MutationResult,
        now_ms: i64,
    ) -> Reconciled {
        if let MutationResult::Failed(DomainError::NotFound) = result {
            if kind != MutationKind::Created {
                return self.remove(story_id, now_ms);
            }
        }

        match (kind, result) {
            (MutationKind::Viewed, MutationResult::Pending) => self.mark_viewed(story_id),
            (MutationKind::Viewed, MutationResult::Confirmed(None)) => {
                let outcome = self.mark_viewed(story_id);
                if let Some(mark) = self.counted_views.get_mut(story_id) {
                    mark.confirmed = true;
                }
                outcome
            }
            (MutationKind::Viewed, MutationResult::Confirmed(Some(record))) => {
                self.confirm_view(story_id, record)
            }
            (MutationKind::Viewed, MutationResult::Failed(_)) => self.rollback_view(story_id),

            (MutationKind::LikeToggled, MutationResult::Pending) => self.toggle_like(story_id),
            (MutationKind::LikeToggled, MutationResult::Confirmed(record)) => {
                self.confirm_like(story_id, record)
            }
            (MutationKind::LikeToggled, MutationResult::Failed(_)) => self.rollback_like(story_id),

            (MutationKind::Deleted, MutationResult::Confirmed(_)) => {
                self.remove(story_id, now_ms)
            }
            (MutationKind::Deleted, _) => Reconciled::Ignored,

            (MutationKind::Created, MutationResult::Confirmed(Some(record))) => {
                if record.story_id != story_id || self.record(story_id).is_some() {
                    return Reconciled::Ignored;
                }
                self.records.push(record);
                self.rebuild(now_ms);
                Reconciled::Applied
            }
            (MutationKind::Created, _) => Reconciled::Ignored,
        }
    }

    fn mark_viewed(&mut self, story_id: &str) -> Reconciled {
        if self.counted_views.contains_key(story_id) {
            return Reconciled::Ignored;
        }
        let Some(current) = self.record(story_id) else {
            return Reconciled::Ignored;
        };
        let mark = ViewMark {
            prior_viewed: current.is_viewed,
            prior_count: current.view_count,
            confirmed: false,
        };
        let already_viewed = mark.prior_viewed;
        self.counted_views.insert(story_id.to_string(), mark);
        if already_viewed {
            return Reconciled::Ignored;
        }
        self.update_everywhere(story_id, |story| {
            story.is_viewed = true;
            story.view_count = story.view_count.saturating_add(1);
        });
        Reconciled::Applied
    }

    fn confirm_view(&mut self, story_id: &str, mut record: StoryRecord) -> Reconciled {
        if record.story_id != story_id || self.record(story_id).is_none() {
            return Reconciled::Ignored;
        }
        self.counted_views
            .entry(story_id.to_string())
            .and_modify(|mark| mark.confirmed = true)
            .or_insert(ViewMark {
                prior_viewed: record.is_viewed,
                prior_count: record.view_count,
                confirmed: true,
            });
        let like_pending = self.pending_likes.contains_key(story_id);
        if let Some(current) = self.record(story_id) {
            // Ownership comes from the authored listing; detail payloads
            // may omit it or report the author under another id.
            record.author.is_viewer |= current.author.is_viewer;
            if record.author.author_id != current.author.author_id {
                record.author.author_id = current.author.author_id.clone();
            }
            if like_pending {
                record.is_liked = current.is_liked;
                record.like_count = current.like_count;
            }
        }
        record.is_viewed = true;
        self.update_everywhere(story_id, |story| *story = record.clone());
        Reconciled::Applied
    }

    fn rollback_view(&mut self, story_id: &str) -> Reconciled {
        let Some(mark) = self.counted_views.get(story_id) else {
            return Reconciled::Ignored;
        };
        if mark.confirmed {
            return Reconciled::Ignored;
        }
        let Some(mark) = self.counted_views.remove(story_id) else {
            return Reconciled::Ignored;
        };
        self.update_everywhere(story_id, |story| {
            story.is_viewed = mark.prior_viewed;
            story.view_count = mark.prior_count;
        });
        Reconciled::RolledBack
    }

    fn toggle_like(&mut self, story_id: &str) -> Reconciled {
        if self.pending_likes.contains_key(story_id) {
            return Reconciled::Ignored;
        }
        let Some(current) = self.record(story_id) else {
            return Reconciled::Ignored;
        };
        let snapshot = LikeSnapshot {
            was_liked: current.is_liked,
            like_count: current.like_count,
        };
        let was_liked = snapshot.was_liked;
        self.pending_likes.insert(story_id.to_string(), snapshot);
        self.update_everywhere(story_id, |story| {
            story.is_liked = !was_liked;
            story.like_count = if was_liked {
                story.like_count.saturating_sub(1)
            } else {
                story.like_count.saturating_add(1)
            };
        });
        Reconciled::Applied
    }

    fn confirm_like(&mut self, story_id: &str, record: Option<StoryRecord>) -> Reconciled {
        let was_pending = self.pending_likes.remove(story_id).is_some();
        match record {
            Some(record) if record.story_id == story_id => {
                self.update_everywhere(story_id, |story| {
                    story.is_liked = record.is_liked;
                    story.like_count = record.like_count;
                });
                Reconciled::Applied
            }
            _ if was_pending => Reconciled::Applied,
            _ => Reconciled::Ignored,
        }
    }

    fn rollback_like(&mut self, story_id: &str) -> Reconciled {
        let Some(snapshot) = self.pending_likes.remove(story_id) else {
            return Reconciled::Ignored;
        };
        self.update_everywhere(story_id, |story| {
            story.is_liked = snapshot.was_liked;
            story.like_count = snapshot.like_count;
        });
        Reconciled::RolledBack
    }

    fn remove(&mut self, story_id: &str, now_ms: i64) -> Reconciled {
        let before = self.records.len();
        self.records.retain(|record| record.story_id != story_id);
        self.counted_views.remove(story_id);
        self.pending_likes.remove(story_id);
        if self
            .detail
            .as_ref()
            .is_some_and(|detail| detail.story_id == story_id)
        {
            self.detail = None;
        }
        if self.records.len() == before {
            return Reconciled::Ignored;
        }
        self.rebuild(now_ms);
        Reconciled::Removed
    }

    fn update_everywhere<F>(&mut self, story_id: &str, mut apply: F)
    where
        F: FnMut(&mut StoryRecord),
    {
        for record in self
            .records
            .iter_mut()
            .filter(|record| record.story_id == story_id)
        {
            apply(record);
        }
        self.index.update_story(story_id, &mut apply);
        if let Some(detail) = self.detail.as_mut()
            && detail.story_id == story_id
        {
            apply(detail);
        }
    }
}
