use std::collections::HashSet;

use nostr_sdk::prelude::{Event, Kind, PublicKey, Timestamp};

/// Display-side filter applied to the cached event set.
///
/// All present criteria are ANDed together; an absent criterion is
/// unconstrained, never "match nothing". Matching is pure: criteria hold
/// no references into the cache and evaluation never mutates anything.
#[derive(Debug, Clone, Default)]
pub struct EventCriteria {
    authors: Option<HashSet<PublicKey>>,
    kinds: Option<HashSet<Kind>>,
    since: Option<Timestamp>,
    until: Option<Timestamp>,
    search: Option<String>,
}

impl EventCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn authors<I>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = PublicKey>,
    {
        self.authors = Some(authors.into_iter().collect());
        self
    }

    pub fn kinds<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = Kind>,
    {
        self.kinds = Some(kinds.into_iter().collect());
        self
    }

    /// Inclusive lower bound on the creation timestamp.
    pub fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    /// Inclusive upper bound on the creation timestamp.
    pub fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    /// Case-insensitive substring match against the content or the author
    /// identifier in hex form.
    pub fn search<S>(mut self, needle: S) -> Self
    where
        S: Into<String>,
    {
        self.search = Some(needle.into());
        self
    }

    pub fn is_unconstrained(&self) -> bool {
        self.authors.is_none()
            && self.kinds.is_none()
            && self.since.is_none()
            && self.until.is_none()
            && self.search.as_deref().is_none_or(str::is_empty)
    }

    pub fn matches(&self, event: &Event) -> bool {
        if let Some(authors) = &self.authors {
            if !authors.contains(&event.pubkey) {
                return false;
            }
        }
        if let Some(kinds) = &self.kinds {
            if !kinds.contains(&event.kind) {
                return false;
            }
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if event.created_at > until {
                return false;
            }
        }
        if let Some(needle) = &self.search {
            let needle = needle.to_lowercase();
            if !needle.is_empty()
                && !event.content.to_lowercase().contains(&needle)
                && !event.pubkey.to_hex().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use nostr_sdk::prelude::Keys;
    use rstest::rstest;

    use super::*;
    use crate::test_helpers::{text_note, text_note_with_keys};

    #[test]
    fn test_unconstrained_matches_everything() {
        let criteria = EventCriteria::new();
        assert!(criteria.is_unconstrained());
        assert!(criteria.matches(&text_note("anything", 1)));
    }

    #[test]
    fn test_author_membership() {
        let keys = Keys::generate();
        let event = text_note_with_keys(&keys, "mine", 10);
        let other = text_note("not mine", 10);

        let criteria = EventCriteria::new().authors([keys.public_key()]);
        assert!(criteria.matches(&event));
        assert!(!criteria.matches(&other));
    }

    #[test]
    fn test_kind_membership() {
        let note = text_note("note", 10);
        let criteria = EventCriteria::new().kinds([Kind::Metadata]);
        assert!(!criteria.matches(&note));
        assert!(EventCriteria::new().kinds([Kind::TextNote]).matches(&note));
    }

    #[rstest]
    #[case(100, None, None, true)]
    #[case(100, Some(100), None, true)] // lower bound is inclusive
    #[case(100, Some(101), None, false)]
    #[case(100, None, Some(100), true)] // upper bound is inclusive
    #[case(100, None, Some(99), false)]
    #[case(100, Some(50), Some(150), true)]
    fn test_timestamp_range(
        #[case] created_at: u64,
        #[case] since: Option<u64>,
        #[case] until: Option<u64>,
        #[case] expected: bool,
    ) {
        let event = text_note("range", created_at);
        let mut criteria = EventCriteria::new();
        if let Some(since) = since {
            criteria = criteria.since(Timestamp::from(since));
        }
        if let Some(until) = until {
            criteria = criteria.until(Timestamp::from(until));
        }
        assert_eq!(criteria.matches(&event), expected);
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let event = text_note("Hello Relay World", 10);
        assert!(EventCriteria::new().search("relay").matches(&event));
        assert!(EventCriteria::new().search("RELAY").matches(&event));
        assert!(!EventCriteria::new().search("missing").matches(&event));
    }

    #[test]
    fn test_search_matches_author_hex() {
        let keys = Keys::generate();
        let event = text_note_with_keys(&keys, "irrelevant", 10);
        let prefix = keys.public_key().to_hex()[..8].to_string();
        assert!(EventCriteria::new().search(prefix).matches(&event));
    }

    #[test]
    fn test_criteria_are_anded() {
        let keys = Keys::generate();
        let event = text_note_with_keys(&keys, "hello", 100);

        let criteria = EventCriteria::new()
            .authors([keys.public_key()])
            .kinds([Kind::TextNote])
            .since(Timestamp::from(50))
            .search("hello");
        assert!(criteria.matches(&event));

        let mismatched_kind = criteria.clone().kinds([Kind::Metadata]);
        assert!(!mismatched_kind.matches(&event));
    }
}
