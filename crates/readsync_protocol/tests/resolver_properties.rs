//! Property tests for conflict classification and resolution.

use proptest::prelude::*;
use readsync_protocol::{classify, ConflictStrategy, ResolutionOutcome, WinnerSide};
use readsync_testkit::{at, auto_strategy_strategy, conflict_strategy_strategy, record_pair_strategy};

proptest! {
    #[test]
    fn equal_content_never_loses_data(
        (local, remote) in record_pair_strategy(),
        strategy in conflict_strategy_strategy(),
    ) {
        let mut remote = remote;
        remote.title.clone_from(&local.title);
        remote.content.clone_from(&local.content);
        remote.summary.clone_from(&local.summary);
        remote.url.clone_from(&local.url);
        remote.tags.clone_from(&local.tags);
        remote.archived = local.archived;
        remote.favorite = local.favorite;
        remote.read = local.read;

        prop_assert!(classify(&local, &remote).is_none());
        match strategy.resolve(&local, &remote, at(1_700_000_000)) {
            ResolutionOutcome::Resolved { winner, resolution } => {
                prop_assert!(!resolution.data_loss);
                prop_assert!(!winner.dirty);
                prop_assert_eq!(winner.id, local.id);
            }
            ResolutionOutcome::Unresolved => prop_assert!(false, "equal content must resolve"),
        }
    }

    #[test]
    fn classification_matches_content_equality((local, remote) in record_pair_strategy()) {
        prop_assert_eq!(classify(&local, &remote).is_none(), local.content_eq(&remote));
    }

    #[test]
    fn automatic_strategies_always_resolve(
        (local, remote) in record_pair_strategy(),
        strategy in auto_strategy_strategy(),
    ) {
        let outcome = strategy.resolve(&local, &remote, at(1_700_000_000));
        prop_assert!(outcome.is_resolved());
        let winner = outcome.winner().expect("resolved");
        prop_assert_eq!(&winner.id, &local.id);
    }

    #[test]
    fn last_write_wins_keeps_the_newer_content((local, remote) in record_pair_strategy()) {
        prop_assume!(!local.content_eq(&remote));
        prop_assume!(local.modified_at != remote.modified_at);

        let outcome = ConflictStrategy::LastWriteWins.resolve(&local, &remote, at(1_700_000_000));
        let ResolutionOutcome::Resolved { winner, resolution } = outcome else {
            return Err(TestCaseError::fail("last write wins must resolve"));
        };
        let newer = if local.modified_at > remote.modified_at { &local } else { &remote };
        prop_assert!(winner.content_eq(newer));
        let expected = if newer.dirty { WinnerSide::Local } else { WinnerSide::Remote };
        prop_assert_eq!(resolution.winner, expected);
    }

    #[test]
    fn merge_is_idempotent((local, remote) in record_pair_strategy()) {
        let now = at(1_700_000_000);
        let first = ConflictStrategy::Merge.resolve(&local, &remote, now);
        let merged = first.winner().expect("merge resolves").clone();

        let again = ConflictStrategy::Merge.resolve(&merged, &remote, now);
        let twice = again.winner().expect("merge resolves");
        prop_assert!(twice.content_eq(&merged));
        prop_assert!(merged.tags.is_superset(&local.tags));
        prop_assert!(merged.tags.is_superset(&remote.tags));
        prop_assert_eq!(merged.read, local.read || remote.read);
    }
}
