use crate::DomainResult;
use crate::creation::StoryDraft;
use crate::stories::StoryRecord;

/// Remote story backend. Implementations attach the session token and
/// normalise transport failures into [`crate::error::DomainError`].
pub trait StoryRepository: Send + Sync {
    /// Stories visible to the viewer, across authors.
    fn list_feed(&self) -> crate::ports::BoxFuture<'_, DomainResult<Vec<StoryRecord>>>;

    /// Stories authored by the viewer.
    fn list_authored(&self) -> crate::ports::BoxFuture<'_, DomainResult<Vec<StoryRecord>>>;

    /// Single story detail. The backend counts this read as a view.
    fn fetch_detail(
        &self,
        story_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<StoryRecord>>;

    fn create(&self, draft: &StoryDraft)
    -> crate::ports::BoxFuture<'_, DomainResult<StoryRecord>>;

    /// Toggles the viewer's like. Returns the updated record when the
    /// backend echoes one.
    fn toggle_like(
        &self,
        story_id: &str,
    ) -> crate::ports::BoxFuture<'_, DomainResult<Option<StoryRecord>>>;

    fn delete(&self, story_id: &str) -> crate::ports::BoxFuture<'_, DomainResult<()>>;
}
