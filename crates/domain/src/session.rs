use std::sync::Arc;

use tracing::{info, warn};

use crate::DomainResult;
use crate::creation::StoryDraft;
use crate::engine::{
    DetailOutcome, DetailRequest, EngineConfig, EngineStep, Frame, Resolution, StoryEngine,
};
use crate::error::DomainError;
use crate::playback::TimerToken;
use crate::ports::BoxFuture;
use crate::ports::stories::StoryRepository;
use crate::reconciliation::Reconciled;
use crate::stories::StoryRecord;
use crate::util::now_ms;

pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// A finished detail fetch, tagged with the request it answers.
#[derive(Clone, Debug, PartialEq)]
pub struct DetailResponse {
    pub request: DetailRequest,
    pub result: DomainResult<StoryRecord>,
}

/// Drives a [`StoryEngine`] against a [`StoryRepository`].
///
/// Navigation never waits on the network. A step that needs a story detail
/// leaves the request outstanding; the caller takes it with
/// [`StorySession::take_detail_fetch`], runs it wherever it likes and hands
/// the response back to [`StorySession::apply_detail`]. Responses may come
/// back in any order; the engine drops the ones the cursor has moved past.
pub struct StorySession {
    repository: Arc<dyn StoryRepository>,
    engine: StoryEngine,
    clock: Clock,
    outstanding: Option<DetailRequest>,
}

impl StorySession {
    pub fn new(repository: Arc<dyn StoryRepository>, config: EngineConfig) -> Self {
        Self {
            repository,
            engine: StoryEngine::new(config),
            clock: Arc::new(now_ms),
            outstanding: None,
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn engine(&self) -> &StoryEngine {
        &self.engine
    }

    pub fn now(&self) -> i64 {
        (self.clock)()
    }

    pub fn frame(&self) -> Option<Frame> {
        self.engine.frame(self.now())
    }

    /// Refetches both listings and installs them as one flat list. The
    /// viewer's own stories come first so their group leads the strip.
    pub async fn refresh(&mut self) -> DomainResult<EngineStep> {
        let authored = self.repository.list_authored().await?;
        let feed = self.repository.list_feed().await?;
        let records = merge_listings(authored, feed);
        info!(story_count = records.len(), "installing story listings");
        let now = self.now();
        let step = self.engine.install_records(records, now);
        Ok(self.track(step))
    }

    pub fn refresh_expiry(&mut self) -> EngineStep {
        let now = self.now();
        let step = self.engine.refresh_expiry(now);
        self.track(step)
    }

    pub fn open(&mut self, author_id: &str, start_index: usize) -> DomainResult<EngineStep> {
        let now = self.now();
        let step = self.engine.open(author_id, start_index, now)?;
        Ok(self.track(step))
    }

    pub fn tick(&mut self, token: TimerToken) -> EngineStep {
        let now = self.now();
        let step = self.engine.tick(token, now);
        self.track(step)
    }

    pub fn next(&mut self) -> EngineStep {
        let now = self.now();
        let step = self.engine.next(now);
        self.track(step)
    }

    pub fn previous(&mut self) -> EngineStep {
        let now = self.now();
        let step = self.engine.previous(now);
        self.track(step)
    }

    pub fn close(&mut self) -> EngineStep {
        self.outstanding = None;
        self.engine.close()
    }

    /// Queues a fresh detail fetch for a record whose previous fetch failed.
    /// Returns false when playback is not paused.
    pub fn retry(&mut self) -> bool {
        let now = self.now();
        match self.engine.retry_detail(now) {
            Some(request) => {
                self.outstanding = Some(request);
                true
            }
            None => false,
        }
    }

    /// Hands out the detail fetch the engine is waiting for, once. The
    /// future owns what it needs, so it can be spawned.
    pub fn take_detail_fetch(&mut self) -> Option<BoxFuture<'static, DetailResponse>> {
        let request = self
            .outstanding
            .take()
            .filter(|request| self.engine.awaits_detail(request))?;
        let repository = Arc::clone(&self.repository);
        Some(Box::pin(async move {
            let result = repository.fetch_detail(&request.story_id).await;
            DetailResponse { request, result }
        }))
    }

    /// Applies a detail response. Only a lost session is an error; other
    /// failures pause playback and come back as [`DetailOutcome::Failed`].
    pub fn apply_detail(&mut self, response: DetailResponse) -> DomainResult<DetailOutcome> {
        let DetailResponse { request, result } = response;
        let now = self.now();
        let outcome = self.engine.resolve_detail(&request, result, now);
        match &outcome {
            DetailOutcome::Removed(step) => {
                self.track(step.clone());
            }
            DetailOutcome::Failed(DomainError::Unauthenticated) => {
                return Err(DomainError::Unauthenticated);
            }
            DetailOutcome::Failed(err) => {
                warn!(story_id = %request.story_id, error = %err, "story detail unavailable");
            }
            DetailOutcome::Applied | DetailOutcome::Stale => {}
        }
        Ok(outcome)
    }

    /// Runs outstanding detail fetches in place until none remain. A
    /// vanished record moves the cursor again, which may queue another.
    pub async fn settle_details(&mut self) -> DomainResult<()> {
        while let Some(fetch) = self.take_detail_fetch() {
            let response = fetch.await;
            self.apply_detail(response)?;
        }
        Ok(())
    }

    pub async fn toggle_like(&mut self, story_id: &str) -> DomainResult<Reconciled> {
        let now = self.now();
        let request = self.engine.begin_like(story_id, now)?;
        let result = self.repository.toggle_like(&request.story_id).await;
        let now = self.now();
        let resolution = self.engine.resolve_like(&request, result, now);
        self.settle(resolution).map(|(reconciled, _)| reconciled)
    }

    pub async fn delete(&mut self, story_id: &str) -> DomainResult<EngineStep> {
        let request = self.engine.begin_delete(story_id)?;
        let result = self.repository.delete(&request.story_id).await;
        let now = self.now();
        let resolution = self.engine.resolve_delete(&request, result, now);
        self.settle(resolution).map(|(_, step)| step)
    }

    /// Quota and draft checks run before the repository is touched.
    pub async fn create(&mut self, draft: StoryDraft) -> DomainResult<StoryRecord> {
        let now = self.now();
        let request = self.engine.begin_create(draft, now)?;
        let result = self.repository.create(&request.draft).await;
        let now = self.now();
        let (record, step) = self.engine.resolve_create(&request, result, now)?;
        self.track(step);
        Ok(record)
    }

    fn settle(&mut self, resolution: Resolution) -> DomainResult<(Reconciled, EngineStep)> {
        let Resolution {
            reconciled,
            step,
            error,
        } = resolution;
        let step = self.track(step);
        match error {
            Some(err) => Err(err),
            None => Ok((reconciled, step)),
        }
    }

    fn track(&mut self, step: EngineStep) -> EngineStep {
        if let Some(request) = &step.detail {
            self.outstanding = Some(request.clone());
        }
        step
    }
}

fn merge_listings(authored: Vec<StoryRecord>, feed: Vec<StoryRecord>) -> Vec<StoryRecord> {
    authored
        .into_iter()
        .map(|mut record| {
            record.author.is_viewer = true;
            record
        })
        .chain(feed)
        .collect()
}
