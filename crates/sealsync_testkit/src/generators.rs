//! Property-based test generators using proptest.

use proptest::prelude::*;
use sealsync_protocol::{
    ComponentContent, Content, ContentType, DomainRecord, NoteContent, RecordMeta, Reference,
    TagContent,
};
use std::time::Duration;
use uuid::Uuid;

/// Strategy for generating record identities.
pub fn uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>()
        .prop_filter("uuid must not be nil", |v| *v != 0)
        .prop_map(Uuid::from_u128)
}

/// Strategy for generating titles, including non-ASCII text.
pub fn title_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-zA-Z0-9 äöüß日本語]{0,40}").expect("Invalid regex")
}

/// Strategy for generating record metadata.
pub fn record_meta_strategy() -> impl Strategy<Value = RecordMeta> {
    (
        uuid_strategy(),
        0i64..4_000_000_000_000_000,
        0i64..1_000_000_000,
        prop::option::of(uuid_strategy()),
    )
        .prop_map(|(uuid, created, delta, duplicate_of)| {
            let mut meta = RecordMeta::new(uuid);
            meta.created_at_timestamp = created;
            meta.updated_at_timestamp = created + delta;
            meta.duplicate_of = duplicate_of;
            meta
        })
}

fn references_strategy() -> impl Strategy<Value = Vec<Reference>> {
    prop::collection::vec(
        uuid_strategy().prop_map(|uuid| Reference::new(uuid, ContentType::Note)),
        0..4,
    )
}

/// Strategy for generating typed payloads of every user content type.
pub fn content_strategy() -> impl Strategy<Value = Content> {
    prop_oneof![
        3 => (title_strategy(), any::<String>())
            .prop_map(|(title, text)| Content::Note(NoteContent::new(title, text))),
        2 => (title_strategy(), references_strategy()).prop_map(|(title, references)| {
            let mut tag = TagContent::new(title);
            tag.references = references;
            Content::Tag(tag)
        }),
        1 => title_strategy().prop_map(|name| Content::Component(ComponentContent {
            name,
            ..ComponentContent::default()
        })),
    ]
}

/// Strategy for generating complete domain records.
pub fn domain_record_strategy() -> impl Strategy<Value = DomainRecord> {
    (record_meta_strategy(), content_strategy())
        .prop_map(|(meta, content)| DomainRecord { meta, content })
}

/// Strategy for generating backoff parameters: initial delay, cap and
/// multiplier.
pub fn backoff_strategy() -> impl Strategy<Value = (Duration, Duration, f64)> {
    (1u64..500, 1u64..20, 1.0f64..4.0).prop_map(|(initial, factor, multiplier)| {
        (
            Duration::from_millis(initial),
            Duration::from_millis(initial * factor),
            multiplier,
        )
    })
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
