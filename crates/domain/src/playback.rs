//! Playback cursor and timer state machine.
//!
//! The cursor owns the timer: every transition that restarts playback of a
//! record bumps the timer generation, and ticks carrying an older
//! [`TimerToken`] are ignored. Callers drive it from a single logical
//! thread, so a tick and a manual navigation never interleave.

use serde::{Deserialize, Serialize};

use crate::grouping::{AuthorGroup, GroupIndex};
use crate::stories::StoryRecord;

pub const DEFAULT_TICK_INTERVAL_MS: u64 = 100;
pub const DEFAULT_FIXED_VIEW_WINDOW_MS: u64 = 5_000;
pub const DEFAULT_TERMINAL_GRACE_MS: u64 = 5_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PacingPolicy {
    /// On-screen time follows the declared duration (see
    /// [`crate::stories::StoryDuration::scaled_view_window_ms`]).
    #[default]
    Scaled,
    /// Every record is shown for the same window.
    FixedWindow { window_ms: u64 },
}

impl PacingPolicy {
    pub fn view_window_ms(&self, record: &StoryRecord) -> u64 {
        if let Some(explicit) = record.view_window_ms {
            return explicit.max(1);
        }
        match self {
            PacingPolicy::Scaled => record.duration.scaled_view_window_ms(),
            PacingPolicy::FixedWindow { window_ms } => (*window_ms).max(1),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PlaybackConfig {
    pub tick_interval_ms: u64,
    pub pacing: PacingPolicy,
    pub terminal_grace_ms: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            pacing: PacingPolicy::Scaled,
            terminal_grace_ms: DEFAULT_TERMINAL_GRACE_MS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerToken(u64);

#[derive(Clone, Debug, PartialEq, Eq)]
struct PlaybackEntry {
    story_id: String,
    view_window_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Playing {
    author_id: String,
    entries: Vec<PlaybackEntry>,
    index: usize,
    elapsed_ms: u64,
    grace_elapsed_ms: Option<u64>,
    paused: bool,
}

impl Playing {
    fn current(&self) -> &PlaybackEntry {
        &self.entries[self.index]
    }

    fn progress(&self) -> f64 {
        let window = self.current().view_window_ms.max(1);
        (self.elapsed_ms.min(window) as f64 * 100.0) / window as f64
    }

    fn reset(&mut self) {
        self.elapsed_ms = 0;
        self.grace_elapsed_ms = None;
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Closed,
    Playing(Playing),
}

#[derive(Clone, Debug, PartialEq)]
pub enum PlaybackEvent {
    /// Nothing applied: stale token, closed cursor, paused playback, or an
    /// unknown record.
    Ignored,
    Progressed { progress: f64 },
    /// A different record is now playing from 0%.
    Moved { story_id: String, index: usize },
    /// The same record restarted from 0%.
    Restarted { story_id: String },
    /// The playing record is unchanged; the index may have shifted.
    Unchanged,
    /// The last record finished; the grace delay is running.
    Finishing,
    Closed,
}

/// Read-only view of an open cursor.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CursorSnapshot {
    pub author_id: String,
    pub story_id: String,
    pub index: usize,
    pub len: usize,
    pub progress: f64,
    pub paused: bool,
    pub finishing: bool,
}

#[derive(Clone, Debug)]
pub struct PlaybackCursor {
    config: PlaybackConfig,
    state: PlaybackState,
    generation: u64,
}

impl PlaybackCursor {
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            state: PlaybackState::Closed,
            generation: 0,
        }
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, PlaybackState::Playing(_))
    }

    /// Token of the running timer, `None` while closed.
    pub fn timer(&self) -> Option<TimerToken> {
        self.is_open().then_some(TimerToken(self.generation))
    }

    pub fn author_id(&self) -> Option<&str> {
        self.playing().map(|playing| playing.author_id.as_str())
    }

    pub fn index(&self) -> Option<usize> {
        self.playing().map(|playing| playing.index)
    }

    pub fn current_story_id(&self) -> Option<&str> {
        self.playing()
            .map(|playing| playing.current().story_id.as_str())
    }

    pub fn progress(&self) -> f64 {
        self.playing().map(Playing::progress).unwrap_or(0.0)
    }

    pub fn is_paused(&self) -> bool {
        self.playing().is_some_and(|playing| playing.paused)
    }

    pub fn story_ids(&self) -> Vec<&str> {
        self.playing()
            .map(|playing| {
                playing
                    .entries
                    .iter()
                    .map(|entry| entry.story_id.as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> Option<CursorSnapshot> {
        self.playing().map(|playing| CursorSnapshot {
            author_id: playing.author_id.clone(),
            story_id: playing.current().story_id.clone(),
            index: playing.index,
            len: playing.entries.len(),
            progress: playing.progress(),
            paused: playing.paused,
            finishing: playing.grace_elapsed_ms.is_some(),
        })
    }

    /// `Playing` always points at a valid offset of a non-empty sequence.
    pub fn invariant_holds(&self) -> bool {
        match &self.state {
            PlaybackState::Closed => true,
            PlaybackState::Playing(playing) => playing.index < playing.entries.len(),
        }
    }

    pub fn open(&mut self, group: &AuthorGroup, start_index: usize) -> PlaybackEvent {
        if group.is_empty() {
            return PlaybackEvent::Ignored;
        }
        let entries = self.entries_for(group);
        let index = start_index.min(entries.len() - 1);
        let story_id = entries[index].story_id.clone();
        self.state = PlaybackState::Playing(Playing {
            author_id: group.author_id().to_string(),
            entries,
            index,
            elapsed_ms: 0,
            grace_elapsed_ms: None,
            paused: false,
        });
        self.restart_timer();
        PlaybackEvent::Moved { story_id, index }
    }

    pub fn tick(&mut self, token: TimerToken) -> PlaybackEvent {
        if token.0 != self.generation {
            return PlaybackEvent::Ignored;
        }
        let interval = self.config.tick_interval_ms.max(1);
        let grace = self.config.terminal_grace_ms;
        let PlaybackState::Playing(playing) = &mut self.state else {
            return PlaybackEvent::Ignored;
        };
        if playing.paused {
            return PlaybackEvent::Ignored;
        }

        if let Some(waited) = playing.grace_elapsed_ms.as_mut() {
            *waited = waited.saturating_add(interval);
            if *waited >= grace {
                return self.close();
            }
            return PlaybackEvent::Progressed { progress: 100.0 };
        }

        let window = playing.current().view_window_ms.max(1);
        playing.elapsed_ms = playing.elapsed_ms.saturating_add(interval).min(window);
        if playing.elapsed_ms < window {
            return PlaybackEvent::Progressed {
                progress: playing.progress(),
            };
        }

        if playing.index + 1 < playing.entries.len() {
            playing.index += 1;
            playing.reset();
            return PlaybackEvent::Moved {
                story_id: playing.current().story_id.clone(),
                index: playing.index,
            };
        }

        if grace == 0 {
            return self.close();
        }
        playing.grace_elapsed_ms = Some(0);
        PlaybackEvent::Finishing
    }

    pub fn next(&mut self) -> PlaybackEvent {
        let PlaybackState::Playing(playing) = &mut self.state else {
            return PlaybackEvent::Ignored;
        };
        if playing.index + 1 >= playing.entries.len() {
            return self.close();
        }
        playing.index += 1;
        playing.reset();
        let event = PlaybackEvent::Moved {
            story_id: playing.current().story_id.clone(),
            index: playing.index,
        };
        self.restart_timer();
        event
    }

    pub fn previous(&mut self) -> PlaybackEvent {
        let PlaybackState::Playing(playing) = &mut self.state else {
            return PlaybackEvent::Ignored;
        };
        let event = if playing.index > 0 {
            playing.index -= 1;
            playing.reset();
            PlaybackEvent::Moved {
                story_id: playing.current().story_id.clone(),
                index: playing.index,
            }
        } else {
            playing.reset();
            PlaybackEvent::Restarted {
                story_id: playing.current().story_id.clone(),
            }
        };
        self.restart_timer();
        event
    }

    /// Applied synchronously with a deletion so the cursor never points at a
    /// freed record.
    pub fn record_removed(&mut self, story_id: &str) -> PlaybackEvent {
        let PlaybackState::Playing(playing) = &mut self.state else {
            return PlaybackEvent::Ignored;
        };
        let Some(position) = playing
            .entries
            .iter()
            .position(|entry| entry.story_id == story_id)
        else {
            return PlaybackEvent::Ignored;
        };

        playing.entries.remove(position);
        if playing.entries.is_empty() {
            return self.close();
        }
        if position != playing.index {
            if position < playing.index {
                playing.index -= 1;
            }
            return PlaybackEvent::Unchanged;
        }

        if playing.index >= playing.entries.len() {
            playing.index = playing.entries.len() - 1;
        }
        playing.reset();
        let event = PlaybackEvent::Moved {
            story_id: playing.current().story_id.clone(),
            index: playing.index,
        };
        self.restart_timer();
        event
    }

    /// Re-reads the playing group after the index was rebuilt.
    pub fn sync(&mut self, index: &GroupIndex) -> PlaybackEvent {
        let Some(author_id) = self.author_id() else {
            return PlaybackEvent::Ignored;
        };
        let Some(group) = index.get(author_id).filter(|group| !group.is_empty()) else {
            return self.close();
        };
        let entries = self.entries_for(group);
        let PlaybackState::Playing(playing) = &mut self.state else {
            return PlaybackEvent::Ignored;
        };

        let current_id = playing.current().story_id.clone();
        if let Some(position) = entries
            .iter()
            .position(|entry| entry.story_id == current_id)
        {
            playing.entries = entries;
            playing.index = position;
            return PlaybackEvent::Unchanged;
        }

        playing.index = playing.index.min(entries.len() - 1);
        playing.entries = entries;
        playing.reset();
        let event = PlaybackEvent::Moved {
            story_id: playing.current().story_id.clone(),
            index: playing.index,
        };
        self.restart_timer();
        event
    }

    pub fn pause(&mut self) -> bool {
        self.set_paused(true)
    }

    pub fn resume(&mut self) -> bool {
        self.set_paused(false)
    }

    pub fn close(&mut self) -> PlaybackEvent {
        self.state = PlaybackState::Closed;
        self.restart_timer();
        PlaybackEvent::Closed
    }

    fn set_paused(&mut self, paused: bool) -> bool {
        match &mut self.state {
            PlaybackState::Playing(playing) => {
                playing.paused = paused;
                true
            }
            PlaybackState::Closed => false,
        }
    }

    fn restart_timer(&mut self) {
        self.generation = self.generation.wrapping_add(1);
    }

    fn playing(&self) -> Option<&Playing> {
        match &self.state {
            PlaybackState::Playing(playing) => Some(playing),
            PlaybackState::Closed => None,
        }
    }

    fn entries_for(&self, group: &AuthorGroup) -> Vec<PlaybackEntry> {
        group
            .stories
            .iter()
            .map(|story| PlaybackEntry {
                story_id: story.story_id.clone(),
                view_window_ms: self.config.pacing.view_window_ms(story),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expiry::fixtures::story;
    use crate::stories::StoryDuration;
    use proptest::prelude::*;

    const NOW: i64 = 1_740_000_000_000;

    fn group(ids: &[&str]) -> AuthorGroup {
        let records: Vec<_> = ids
            .iter()
            .enumerate()
            .map(|(n, id)| story(id, "ana", NOW - 10_000 + n as i64))
            .collect();
        GroupIndex::rebuild(&records, NOW)
            .get("ana")
            .cloned()
            .expect("group")
    }

    fn fixed(window_ms: u64, grace_ms: u64) -> PlaybackConfig {
        PlaybackConfig {
            tick_interval_ms: 100,
            pacing: PacingPolicy::FixedWindow { window_ms },
            terminal_grace_ms: grace_ms,
        }
    }

    fn tick_until_change(cursor: &mut PlaybackCursor) -> PlaybackEvent {
        for _ in 0..10_000 {
            let token = cursor.timer().expect("open");
            match cursor.tick(token) {
                PlaybackEvent::Progressed { .. } => continue,
                other => return other,
            }
        }
        panic!("cursor never changed record");
    }

    #[test]
    fn empty_group_does_not_open() {
        let mut cursor = PlaybackCursor::new(PlaybackConfig::default());
        let empty = AuthorGroup {
            author: crate::expiry::fixtures::author("ana"),
            stories: Vec::new(),
        };
        assert_eq!(cursor.open(&empty, 0), PlaybackEvent::Ignored);
        assert!(!cursor.is_open());
    }

    #[test]
    fn natural_completion_walks_group_then_closes() {
        let mut cursor = PlaybackCursor::new(fixed(1_000, 300));
        let opened = cursor.open(&group(&["a", "b", "c"]), 0);
        assert_eq!(
            opened,
            PlaybackEvent::Moved {
                story_id: "a".into(),
                index: 0
            }
        );

        assert_eq!(
            tick_until_change(&mut cursor),
            PlaybackEvent::Moved {
                story_id: "b".into(),
                index: 1
            }
        );
        assert_eq!(cursor.progress(), 0.0);
        assert_eq!(
            tick_until_change(&mut cursor),
            PlaybackEvent::Moved {
                story_id: "c".into(),
                index: 2
            }
        );
        assert_eq!(tick_until_change(&mut cursor), PlaybackEvent::Finishing);
        assert_eq!(cursor.progress(), 100.0);
        assert!(cursor.is_open());
        assert_eq!(tick_until_change(&mut cursor), PlaybackEvent::Closed);
        assert!(!cursor.is_open());
    }

    #[test]
    fn record_completes_after_exact_number_of_ticks() {
        let mut cursor = PlaybackCursor::new(fixed(1_000, 0));
        cursor.open(&group(&["a", "b"]), 0);
        let token = cursor.timer().unwrap();
        for n in 1..10 {
            assert_eq!(
                cursor.tick(token),
                PlaybackEvent::Progressed {
                    progress: n as f64 * 10.0
                }
            );
        }
        assert!(matches!(cursor.tick(token), PlaybackEvent::Moved { .. }));
    }

    #[test]
    fn scaled_pacing_follows_declared_duration() {
        let mut short = story("a", "ana", NOW);
        short.duration = StoryDuration::SixHours;
        let mut long = story("b", "ana", NOW);
        long.duration = StoryDuration::TwentyFourHours;
        let mut explicit = story("c", "ana", NOW);
        explicit.view_window_ms = Some(2_500);

        let policy = PacingPolicy::Scaled;
        assert_eq!(policy.view_window_ms(&short), 6_000);
        assert_eq!(policy.view_window_ms(&long), 24_000);
        assert_eq!(policy.view_window_ms(&explicit), 2_500);

        let fixed = PacingPolicy::FixedWindow { window_ms: 5_000 };
        assert_eq!(fixed.view_window_ms(&long), 5_000);
        assert_eq!(fixed.view_window_ms(&explicit), 2_500);
    }

    #[test]
    fn manual_navigation_restarts_timer() {
        let mut cursor = PlaybackCursor::new(fixed(1_000, 0));
        cursor.open(&group(&["a", "b", "c"]), 0);
        let stale = cursor.timer().unwrap();
        cursor.tick(stale);

        assert!(matches!(cursor.next(), PlaybackEvent::Moved { index: 1, .. }));
        assert_eq!(cursor.tick(stale), PlaybackEvent::Ignored);
        assert_eq!(cursor.progress(), 0.0);

        let fresh = cursor.timer().unwrap();
        assert_ne!(fresh, stale);
        assert!(matches!(
            cursor.tick(fresh),
            PlaybackEvent::Progressed { .. }
        ));
    }

    #[test]
    fn previous_at_start_restarts_current_record() {
        let mut cursor = PlaybackCursor::new(fixed(1_000, 0));
        cursor.open(&group(&["a", "b"]), 0);
        let token = cursor.timer().unwrap();
        cursor.tick(token);
        assert_eq!(
            cursor.previous(),
            PlaybackEvent::Restarted {
                story_id: "a".into()
            }
        );
        assert_eq!(cursor.progress(), 0.0);

        cursor.next();
        assert!(matches!(
            cursor.previous(),
            PlaybackEvent::Moved { index: 0, .. }
        ));
    }

    #[test]
    fn next_on_last_record_closes() {
        let mut cursor = PlaybackCursor::new(PlaybackConfig::default());
        cursor.open(&group(&["a"]), 0);
        assert_eq!(cursor.next(), PlaybackEvent::Closed);
        assert_eq!(cursor.timer(), None);
    }

    #[test]
    fn removing_playing_record_moves_to_successor() {
        let mut cursor = PlaybackCursor::new(PlaybackConfig::default());
        cursor.open(&group(&["a", "b", "c"]), 1);
        assert_eq!(
            cursor.record_removed("b"),
            PlaybackEvent::Moved {
                story_id: "c".into(),
                index: 1
            }
        );
        assert_eq!(cursor.current_story_id(), Some("c"));
    }

    #[test]
    fn removing_last_playing_record_steps_back() {
        let mut cursor = PlaybackCursor::new(PlaybackConfig::default());
        cursor.open(&group(&["a", "b", "c"]), 2);
        assert!(matches!(
            cursor.record_removed("c"),
            PlaybackEvent::Moved { index: 1, .. }
        ));
        assert_eq!(cursor.current_story_id(), Some("b"));
    }

    #[test]
    fn removing_only_record_closes() {
        let mut cursor = PlaybackCursor::new(PlaybackConfig::default());
        cursor.open(&group(&["a"]), 0);
        assert_eq!(cursor.record_removed("a"), PlaybackEvent::Closed);
        assert!(!cursor.is_open());
    }

    #[test]
    fn removing_earlier_record_keeps_logical_position() {
        let mut cursor = PlaybackCursor::new(fixed(1_000, 0));
        cursor.open(&group(&["a", "b", "c"]), 2);
        let token = cursor.timer().unwrap();
        cursor.tick(token);

        assert_eq!(cursor.record_removed("a"), PlaybackEvent::Unchanged);
        assert_eq!(cursor.index(), Some(1));
        assert_eq!(cursor.current_story_id(), Some("c"));
        assert_eq!(cursor.timer(), Some(token));
        assert_eq!(cursor.record_removed("zzz"), PlaybackEvent::Ignored);
    }

    #[test]
    fn paused_cursor_ignores_ticks() {
        let mut cursor = PlaybackCursor::new(fixed(1_000, 0));
        cursor.open(&group(&["a"]), 0);
        let token = cursor.timer().unwrap();
        assert!(cursor.pause());
        assert_eq!(cursor.tick(token), PlaybackEvent::Ignored);
        assert_eq!(cursor.progress(), 0.0);
        cursor.resume();
        assert!(matches!(
            cursor.tick(token),
            PlaybackEvent::Progressed { .. }
        ));
    }

    #[test]
    fn sync_follows_story_or_closes_when_group_vanishes() {
        let mut cursor = PlaybackCursor::new(PlaybackConfig::default());
        cursor.open(&group(&["a", "b", "c"]), 1);

        let shrunk = GroupIndex::rebuild(
            &[story("b", "ana", NOW - 5_000), story("c", "ana", NOW - 4_000)],
            NOW,
        );
        assert_eq!(cursor.sync(&shrunk), PlaybackEvent::Unchanged);
        assert_eq!(cursor.index(), Some(0));
        assert_eq!(cursor.current_story_id(), Some("b"));

        let without_current = GroupIndex::rebuild(&[story("c", "ana", NOW - 4_000)], NOW);
        assert!(matches!(
            cursor.sync(&without_current),
            PlaybackEvent::Moved { index: 0, .. }
        ));

        assert_eq!(cursor.sync(&GroupIndex::default()), PlaybackEvent::Closed);
    }

    #[test]
    fn close_always_succeeds() {
        let mut cursor = PlaybackCursor::new(PlaybackConfig::default());
        assert_eq!(cursor.close(), PlaybackEvent::Closed);
        cursor.open(&group(&["a"]), 0);
        let token = cursor.timer().unwrap();
        assert_eq!(cursor.close(), PlaybackEvent::Closed);
        assert_eq!(cursor.tick(token), PlaybackEvent::Ignored);
    }

    #[derive(Clone, Debug)]
    enum Command {
        Open(usize),
        Tick,
        StaleTick,
        Next,
        Previous,
        Remove(usize),
        Close,
    }

    fn command_strategy() -> impl Strategy<Value = Command> {
        prop_oneof![
            (0usize..6).prop_map(Command::Open),
            Just(Command::Tick),
            Just(Command::Tick),
            Just(Command::Tick),
            Just(Command::StaleTick),
            Just(Command::Next),
            Just(Command::Previous),
            (0usize..6).prop_map(Command::Remove),
            Just(Command::Close),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn index_stays_in_bounds(
            commands in proptest::collection::vec(command_strategy(), 1..80),
        ) {
            let ids = ["s0", "s1", "s2", "s3", "s4"];
            let full = group(&ids);
            let mut cursor = PlaybackCursor::new(fixed(300, 200));
            let mut stale = cursor.timer();

            for command in commands {
                match command {
                    Command::Open(start) => {
                        stale = cursor.timer();
                        cursor.open(&full, start);
                    }
                    Command::Tick => {
                        if let Some(token) = cursor.timer() {
                            cursor.tick(token);
                        }
                    }
                    Command::StaleTick => {
                        if let Some(token) = stale {
                            cursor.tick(token);
                        }
                    }
                    Command::Next => {
                        stale = cursor.timer();
                        cursor.next();
                    }
                    Command::Previous => {
                        stale = cursor.timer();
                        cursor.previous();
                    }
                    Command::Remove(n) => {
                        cursor.record_removed(ids[n % ids.len()]);
                    }
                    Command::Close => {
                        cursor.close();
                    }
                }
                prop_assert!(cursor.invariant_holds());
                let progress = cursor.progress();
                prop_assert!((0.0..=100.0).contains(&progress));
            }
        }
    }
}
