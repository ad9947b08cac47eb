use std::sync::Arc;

use karyera_domain::DomainResult;
use karyera_domain::creation::{StoryDraft, validate_story_draft};
use karyera_domain::error::DomainError;
use karyera_domain::ports::BoxFuture;
use karyera_domain::ports::stories::StoryRepository;
use karyera_domain::stories::{HOUR_MS, StoryAuthor, StoryDuration, StoryRecord};
use karyera_domain::util::{now_ms, uuid_v7_without_dashes};
use tokio::sync::RwLock;

/// Backend stand-in holding stories in memory. `viewer` is the account the
/// session runs as; detail reads count views and likes toggle on its behalf.
#[derive(Clone)]
pub struct InMemoryStoryRepository {
    viewer: StoryAuthor,
    store: Arc<RwLock<Vec<StoryRecord>>>,
}

impl InMemoryStoryRepository {
    pub fn new(viewer: StoryAuthor) -> Self {
        Self {
            viewer: StoryAuthor {
                is_viewer: true,
                ..viewer
            },
            store: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn with_stories(viewer: StoryAuthor, stories: Vec<StoryRecord>) -> Self {
        let repo = Self::new(viewer);
        let viewer_id = repo.viewer.author_id.clone();
        let stories = stories
            .into_iter()
            .map(|mut story| {
                story.author.is_viewer = story.author.author_id == viewer_id;
                story
            })
            .collect();
        Self {
            store: Arc::new(RwLock::new(stories)),
            ..repo
        }
    }

    /// A small multi-author feed for local runs.
    pub fn demo(now_ms: i64) -> Self {
        let viewer = author("u-1", "Aziza Rahimova", "aziza");
        let malika = author("u-2", "Malika Yusupova", "malika");
        let timur = author("u-3", "Timur Saidov", "timur");
        let minute = 60_000;
        let stories = vec![
            story("s-1", &viewer, "Office view", now_ms - 2 * HOUR_MS, StoryDuration::SixHours),
            story("s-2", &malika, "Design review", now_ms - 50 * minute, StoryDuration::TwelveHours),
            story("s-3", &malika, "Team lunch", now_ms - 20 * minute, StoryDuration::SixHours),
            story("s-4", &timur, "New role", now_ms - 5 * HOUR_MS, StoryDuration::TwentyFourHours),
            story("s-5", &timur, "Old news", now_ms - 30 * HOUR_MS, StoryDuration::TwentyFourHours),
        ];
        Self::with_stories(viewer, stories)
    }

    pub async fn snapshot(&self) -> Vec<StoryRecord> {
        self.store.read().await.clone()
    }
}

fn author(author_id: &str, display_name: &str, username: &str) -> StoryAuthor {
    StoryAuthor {
        author_id: author_id.to_string(),
        display_name: display_name.to_string(),
        username: Some(username.to_string()),
        avatar_url: None,
        is_viewer: false,
    }
}

fn story(
    story_id: &str,
    author: &StoryAuthor,
    title: &str,
    created_at_ms: i64,
    duration: StoryDuration,
) -> StoryRecord {
    StoryRecord {
        story_id: story_id.to_string(),
        author: author.clone(),
        media_url: Some(format!("memory://{story_id}.jpg")),
        title: title.to_string(),
        created_at_ms,
        duration,
        view_window_ms: None,
        view_count: 0,
        like_count: 0,
        is_viewed: false,
        is_liked: false,
    }
}

impl StoryRepository for InMemoryStoryRepository {
    fn list_feed(&self) -> BoxFuture<'_, DomainResult<Vec<StoryRecord>>> {
        let store = self.store.clone();
        Box::pin(async move { Ok(store.read().await.clone()) })
    }

    fn list_authored(&self) -> BoxFuture<'_, DomainResult<Vec<StoryRecord>>> {
        let store = self.store.clone();
        Box::pin(async move {
            let items = store.read().await;
            Ok(items
                .iter()
                .filter(|story| story.author.is_viewer)
                .cloned()
                .collect())
        })
    }

    fn fetch_detail(&self, story_id: &str) -> BoxFuture<'_, DomainResult<StoryRecord>> {
        let story_id = story_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut items = store.write().await;
            let story = items
                .iter_mut()
                .find(|story| story.story_id == story_id)
                .ok_or(DomainError::NotFound)?;
            if !story.is_viewed {
                story.is_viewed = true;
                story.view_count = story.view_count.saturating_add(1);
            }
            Ok(story.clone())
        })
    }

    fn create(&self, draft: &StoryDraft) -> BoxFuture<'_, DomainResult<StoryRecord>> {
        let draft = draft.clone();
        let store = self.store.clone();
        let viewer = self.viewer.clone();
        Box::pin(async move {
            validate_story_draft(&draft)?;
            let story_id = uuid_v7_without_dashes();
            let record = StoryRecord {
                media_url: Some(format!("memory://{story_id}.jpg")),
                story_id,
                author: viewer,
                title: draft.title.trim().to_string(),
                created_at_ms: now_ms(),
                duration: draft.duration,
                view_window_ms: None,
                view_count: 0,
                like_count: 0,
                is_viewed: false,
                is_liked: false,
            };
            store.write().await.push(record.clone());
            Ok(record)
        })
    }

    fn toggle_like(&self, story_id: &str) -> BoxFuture<'_, DomainResult<Option<StoryRecord>>> {
        let story_id = story_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut items = store.write().await;
            let story = items
                .iter_mut()
                .find(|story| story.story_id == story_id)
                .ok_or(DomainError::NotFound)?;
            story.is_liked = !story.is_liked;
            story.like_count = if story.is_liked {
                story.like_count.saturating_add(1)
            } else {
                story.like_count.saturating_sub(1)
            };
            Ok(Some(story.clone()))
        })
    }

    fn delete(&self, story_id: &str) -> BoxFuture<'_, DomainResult<()>> {
        let story_id = story_id.to_string();
        let store = self.store.clone();
        Box::pin(async move {
            let mut items = store.write().await;
            let position = items
                .iter()
                .position(|story| story.story_id == story_id)
                .ok_or(DomainError::NotFound)?;
            if !items[position].author.is_viewer {
                return Err(DomainError::Unauthorized(
                    "only the author can delete a story".into(),
                ));
            }
            items.remove(position);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use karyera_domain::creation::MediaUpload;

    const NOW: i64 = 1_740_000_000_000;

    #[tokio::test]
    async fn demo_marks_viewer_stories() {
        let repo = InMemoryStoryRepository::demo(NOW);
        let authored = repo.list_authored().await.unwrap();
        assert_eq!(authored.len(), 1);
        assert_eq!(authored[0].story_id, "s-1");
        assert_eq!(repo.list_feed().await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn detail_counts_one_view_per_viewer() {
        let repo = InMemoryStoryRepository::demo(NOW);
        repo.fetch_detail("s-2").await.unwrap();
        let again = repo.fetch_detail("s-2").await.unwrap();
        assert_eq!(again.view_count, 1);
        assert_eq!(
            repo.fetch_detail("missing").await,
            Err(DomainError::NotFound)
        );
    }

    #[tokio::test]
    async fn like_toggles_and_delete_is_author_only() {
        let repo = InMemoryStoryRepository::demo(NOW);
        let liked = repo.toggle_like("s-3").await.unwrap().unwrap();
        assert!(liked.is_liked);
        assert_eq!(liked.like_count, 1);
        let unliked = repo.toggle_like("s-3").await.unwrap().unwrap();
        assert_eq!(unliked.like_count, 0);

        assert!(matches!(
            repo.delete("s-3").await,
            Err(DomainError::Unauthorized(_))
        ));
        repo.delete("s-1").await.unwrap();
        assert_eq!(repo.delete("s-1").await, Err(DomainError::NotFound));
    }

    #[tokio::test]
    async fn create_attaches_viewer_as_author() {
        let repo = InMemoryStoryRepository::demo(NOW);
        let draft = StoryDraft {
            title: " hello ".into(),
            media: Some(MediaUpload {
                file_name: "h.png".into(),
                content_type: "image/png".into(),
                bytes: vec![7],
            }),
            duration: StoryDuration::TwelveHours,
        };
        let created = repo.create(&draft).await.unwrap();
        assert_eq!(created.title, "hello");
        assert!(created.author.is_viewer);
        assert_eq!(created.story_id.len(), 32);
        assert_eq!(repo.list_authored().await.unwrap().len(), 2);
    }
}
