use serde::{Deserialize, Serialize};

use crate::expiry;
use crate::stories::{StoryAuthor, StoryRecord};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthorGroup {
    pub author: StoryAuthor,
    pub stories: Vec<StoryRecord>,
}

impl AuthorGroup {
    pub fn author_id(&self) -> &str {
        &self.author.author_id
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    pub fn has_unread(&self) -> bool {
        self.stories.iter().any(|story| !story.is_viewed)
    }

    pub fn position(&self, story_id: &str) -> Option<usize> {
        self.stories
            .iter()
            .position(|story| story.story_id == story_id)
    }

    pub fn first_unread(&self) -> Option<usize> {
        self.stories.iter().position(|story| !story.is_viewed)
    }
}

/// Avatar strip entry for one author.
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct GroupSummary {
    pub author_id: String,
    pub short_name: String,
    pub avatar_url: Option<String>,
    pub story_count: usize,
    pub has_unread: bool,
}

/// Active stories partitioned by author. Groups keep the order in which
/// their author first appears in the source list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupIndex {
    groups: Vec<AuthorGroup>,
}

impl GroupIndex {
    pub fn rebuild(records: &[StoryRecord], now_ms: i64) -> Self {
        let mut groups: Vec<AuthorGroup> = Vec::new();
        for record in expiry::active_records(records, now_ms) {
            let author_id = record.author.author_id.as_str();
            match groups
                .iter_mut()
                .find(|group| group.author_id() == author_id)
            {
                Some(group) => group.stories.push(record.clone()),
                None => groups.push(AuthorGroup {
                    author: record.author.clone(),
                    stories: vec![record.clone()],
                }),
            }
        }

        for group in &mut groups {
            group.stories.sort_by(|a, b| {
                a.created_at_ms
                    .cmp(&b.created_at_ms)
                    .then_with(|| a.story_id.cmp(&b.story_id))
            });
        }

        Self { groups }
    }

    pub fn get(&self, author_id: &str) -> Option<&AuthorGroup> {
        self.groups
            .iter()
            .find(|group| group.author_id() == author_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuthorGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn find_story(&self, story_id: &str) -> Option<(&AuthorGroup, usize)> {
        self.groups.iter().find_map(|group| {
            group
                .position(story_id)
                .map(|position| (group, position))
        })
    }

    pub fn summaries(&self) -> Vec<GroupSummary> {
        self.groups
            .iter()
            .map(|group| GroupSummary {
                author_id: group.author.author_id.clone(),
                short_name: group.author.short_name().to_string(),
                avatar_url: group.author.avatar_url.clone(),
                story_count: group.len(),
                has_unread: group.has_unread(),
            })
            .collect()
    }

    /// Author to open first: the first group with anything unread, else the
    /// first group.
    pub fn preferred_author(&self) -> Option<&str> {
        self.groups
            .iter()
            .find(|group| group.has_unread())
            .or_else(|| self.groups.first())
            .map(AuthorGroup::author_id)
    }

    pub(crate) fn update_story<F>(&mut self, story_id: &str, mut apply: F) -> bool
    where
        F: FnMut(&mut StoryRecord),
    {
        let mut touched = false;
        for story in self
            .groups
            .iter_mut()
            .flat_map(|group| group.stories.iter_mut())
            .filter(|story| story.story_id == story_id)
        {
            apply(story);
            touched = true;
        }
        touched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::fixtures::{story, story_aged};
    use crate::stories::{HOUR_MS, StoryDuration};
    use proptest::prelude::*;

    const NOW: i64 = 1_740_000_000_000;

    #[test]
    fn partitions_by_author_in_creation_order() {
        let records = vec![
            story("3", "bob", NOW - 1_000),
            story("1", "ana", NOW - 3_000),
            story("2", "bob", NOW - 5_000),
            story("4", "ana", NOW - 2_000),
        ];
        let index = GroupIndex::rebuild(&records, NOW);

        let authors: Vec<_> = index.iter().map(AuthorGroup::author_id).collect();
        assert_eq!(authors, vec!["bob", "ana"]);

        let bob: Vec<_> = index
            .get("bob")
            .unwrap()
            .stories
            .iter()
            .map(|s| s.story_id.as_str())
            .collect();
        assert_eq!(bob, vec!["2", "3"]);
        assert_eq!(index.find_story("4").map(|(_, i)| i), Some(1));
    }

    #[test]
    fn fully_expired_author_disappears() {
        let records = vec![
            story_aged("a", "ana", NOW, 7, StoryDuration::SixHours),
            story_aged("b", "bob", NOW, 1, StoryDuration::SixHours),
        ];
        let index = GroupIndex::rebuild(&records, NOW);
        assert!(index.get("ana").is_none());
        assert_eq!(index.len(), 1);

        let later = GroupIndex::rebuild(&records, NOW + 6 * HOUR_MS);
        assert!(later.is_empty());
    }

    #[test]
    fn unread_flag_aggregates_members() {
        let mut seen = story("1", "ana", NOW - 10);
        seen.is_viewed = true;
        let unseen = story("2", "ana", NOW - 5);
        let index = GroupIndex::rebuild(&[seen.clone(), unseen], NOW);
        assert!(index.get("ana").unwrap().has_unread());
        assert_eq!(index.get("ana").unwrap().first_unread(), Some(1));

        let index = GroupIndex::rebuild(&[seen], NOW);
        assert!(!index.get("ana").unwrap().has_unread());
    }

    #[test]
    fn preferred_author_skips_fully_read_groups() {
        let mut read = story("1", "ana", NOW - 10);
        read.is_viewed = true;
        let index = GroupIndex::rebuild(&[read, story("2", "bob", NOW - 5)], NOW);
        assert_eq!(index.preferred_author(), Some("bob"));

        let summaries = index.summaries();
        assert_eq!(summaries.len(), 2);
        assert!(!summaries[0].has_unread);
        assert_eq!(summaries[1].short_name, "Author");
    }

    proptest! {
        #[test]
        fn rebuild_is_idempotent(
            entries in proptest::collection::vec((0u8..4, 0i64..(8 * HOUR_MS)), 0..24),
        ) {
            let records: Vec<_> = entries
                .iter()
                .enumerate()
                .map(|(n, (author, age))| story(&n.to_string(), &format!("u{author}"), NOW - age))
                .collect();
            let first = GroupIndex::rebuild(&records, NOW);
            let second = GroupIndex::rebuild(&records, NOW);
            prop_assert_eq!(&first, &second);
            prop_assert!(first.iter().all(|group| !group.is_empty()));
            for group in first.iter() {
                prop_assert!(group
                    .stories
                    .windows(2)
                    .all(|pair| pair[0].created_at_ms <= pair[1].created_at_ms));
            }
        }
    }
}
