//! Single source of truth for whether a story is still visible.
//!
//! Activity is never stored on a record; callers pass the current time on
//! every read.

use crate::stories::StoryRecord;

pub fn expires_at_ms(record: &StoryRecord) -> i64 {
    record
        .created_at_ms
        .saturating_add(record.duration.ttl_ms())
}

pub fn is_active(record: &StoryRecord, now_ms: i64) -> bool {
    now_ms < expires_at_ms(record)
}

pub fn active_records<'a, I>(records: I, now_ms: i64) -> impl Iterator<Item = &'a StoryRecord>
where
    I: IntoIterator<Item = &'a StoryRecord>,
{
    records
        .into_iter()
        .filter(move |record| is_active(record, now_ms))
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::stories::{HOUR_MS, StoryDuration};
    use proptest::prelude::*;

    const NOW: i64 = 1_740_000_000_000;

    #[test]
    fn two_stories_of_one_author_expire_independently() {
        let six = story_aged("a", "u1", NOW, 1, StoryDuration::SixHours);
        let twelve = story_aged("b", "u1", NOW, 10, StoryDuration::TwelveHours);
        assert!(is_active(&six, NOW));
        assert!(is_active(&twelve, NOW));

        let later = NOW + 2 * HOUR_MS;
        assert!(is_active(&six, later));
        assert!(!is_active(&twelve, later));
        assert_eq!(active_records([&six, &twelve], later).count(), 1);
    }

    #[test]
    fn expiry_instant_is_exclusive() {
        let record = story("a", "u1", NOW);
        let expires = expires_at_ms(&record);
        assert_eq!(expires, NOW + 6 * HOUR_MS);
        assert!(is_active(&record, expires - 1));
        assert!(!is_active(&record, expires));
    }

    fn duration_strategy() -> impl Strategy<Value = StoryDuration> {
        prop_oneof![
            Just(StoryDuration::SixHours),
            Just(StoryDuration::TwelveHours),
            Just(StoryDuration::TwentyFourHours),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

        #[test]
        fn active_exactly_within_lifetime(
            created in 0i64..4_000_000_000_000,
            duration in duration_strategy(),
            offset in 0i64..(48 * HOUR_MS),
        ) {
            let mut record = story("p", "u", created);
            record.duration = duration;
            let now = created + offset;
            prop_assert_eq!(is_active(&record, now), offset < duration.ttl_ms());
        }
    }
}
