//! Property-based test generators using proptest.
//!
//! Provides strategies for generating records, conflicting pairs and
//! configurations that satisfy the protocol's validation rules.

use crate::fixtures::at;
use proptest::prelude::*;
use readsync_engine::NetworkStatus;
use readsync_protocol::{
    ConflictStrategy, NetworkType, Record, RecordId, SyncConfiguration, SyncInterval,
};

const TAGS: &[&str] = &["rust", "sync", "longread", "news", "later"];

/// Strategy for remote record ids.
pub fn remote_id_strategy() -> impl Strategy<Value = RecordId> {
    prop::string::string_regex("[a-z0-9]{1,12}")
        .expect("Invalid regex")
        .prop_map(RecordId::remote)
}

/// Strategy for epoch seconds within a few days.
pub fn timestamp_strategy() -> impl Strategy<Value = i64> {
    1_600_000_000i64..1_600_500_000i64
}

/// Strategy for tag sets drawn from a small vocabulary.
pub fn tags_strategy() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(TAGS, 0..=TAGS.len())
}

/// Strategy for valid records with the given id.
pub fn record_with_id_strategy(id: RecordId) -> impl Strategy<Value = Record> {
    (
        "[A-Za-z][A-Za-z ]{0,20}",
        "[a-z ]{0,40}",
        tags_strategy(),
        any::<(bool, bool, bool)>(),
        timestamp_strategy(),
        any::<bool>(),
    )
        .prop_map(
            move |(title, content, tags, (archived, favorite, read), modified, dirty)| {
                Record::new(id.clone(), title, "https://example.com/a", at(modified - 1_000))
                    .with_content(content)
                    .with_tags(tags)
                    .with_archived(archived)
                    .with_favorite(favorite)
                    .with_read(read)
                    .with_modified_at(at(modified))
                    .with_dirty(dirty)
            },
        )
}

/// Strategy for valid records with remote ids.
pub fn record_strategy() -> impl Strategy<Value = Record> {
    remote_id_strategy().prop_flat_map(record_with_id_strategy)
}

/// Strategy for a local (dirty) and remote version of the same record.
pub fn record_pair_strategy() -> impl Strategy<Value = (Record, Record)> {
    remote_id_strategy().prop_flat_map(|id| {
        (
            record_with_id_strategy(id.clone()).prop_map(|r| r.with_dirty(true)),
            record_with_id_strategy(id).prop_map(|r| r.with_dirty(false)),
        )
    })
}

/// Strategy for conflict strategies.
pub fn conflict_strategy_strategy() -> impl Strategy<Value = ConflictStrategy> {
    prop_oneof![
        Just(ConflictStrategy::LastWriteWins),
        Just(ConflictStrategy::LocalWins),
        Just(ConflictStrategy::RemoteWins),
        Just(ConflictStrategy::Manual),
        Just(ConflictStrategy::Merge),
    ]
}

/// Strategy for automatic conflict strategies.
pub fn auto_strategy_strategy() -> impl Strategy<Value = ConflictStrategy> {
    conflict_strategy_strategy().prop_filter("must resolve automatically", |s| s.auto_resolves())
}

/// Strategy for network statuses, offline included.
pub fn network_status_strategy() -> impl Strategy<Value = NetworkStatus> {
    (
        prop_oneof![
            Just(NetworkType::Wifi),
            Just(NetworkType::Cellular),
            Just(NetworkType::Ethernet),
            Just(NetworkType::Other),
            Just(NetworkType::None),
        ],
        any::<bool>(),
        any::<bool>(),
    )
        .prop_map(|(network_type, is_expensive, reachable)| NetworkStatus {
            connected: network_type != NetworkType::None,
            reachable: reachable && network_type != NetworkType::None,
            network_type,
            is_expensive,
        })
}

/// Strategy for valid configurations.
pub fn sync_configuration_strategy() -> impl Strategy<Value = SyncConfiguration> {
    (
        any::<(bool, bool, bool, bool, bool)>(),
        prop_oneof![
            Just(SyncInterval::Manual),
            (1u32..=1_440).prop_map(SyncInterval::Minutes),
        ],
        conflict_strategy_strategy(),
        1u32..=100,
    )
        .prop_map(
            |(
                (background_enabled, wifi_only, allow_cellular, allow_metered, full_content),
                interval,
                conflict_strategy,
                batch_size,
            )| SyncConfiguration {
                background_enabled,
                interval,
                wifi_only,
                allow_cellular,
                allow_metered,
                download_full_content: full_content,
                conflict_strategy,
                batch_size,
            },
        )
}
