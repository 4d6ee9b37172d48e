//! Property-based tests for checkpoint numbering and event scheduling.

use proptest::prelude::*;
use tempfile::TempDir;

use trainlog_core::error::TrainlogError;
use trainlog_core::sequence::{checkpoint_dir_name, incomplete_marker_name, parse_number};
use trainlog_core::{
    DirStack, Frequencies, LogEvent, atomic_checkpoint, events_for, latest_number,
};

// --- Sequence allocation properties ---

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn latest_number_tracks_successful_commits(outcomes in prop::collection::vec(any::<bool>(), 1..12)) {
        let dir = TempDir::new().unwrap();
        let mut ctx = DirStack::new(dir.path());
        let parent = dir.path().join("checkpoints");

        let mut committed = 0u64;
        for succeed in outcomes {
            let result = atomic_checkpoint(&mut ctx, "checkpoints", |_| {
                if succeed {
                    Ok(())
                } else {
                    Err(TrainlogError::invalid_input("injected"))
                }
            });
            prop_assert_eq!(result.is_ok(), succeed);
            if succeed {
                committed += 1;
            }
            prop_assert_eq!(ctx.depth(), 0);
        }

        let expected = committed.checked_sub(1);
        prop_assert_eq!(latest_number(&parent).unwrap(), expected);
    }

    #[test]
    fn latest_number_ignores_markers_and_noise(
        numbers in prop::collection::btree_set(0u64..100_000, 0..8),
        markers in prop::collection::btree_set(0u64..100_000, 0..8),
    ) {
        let dir = TempDir::new().unwrap();
        for n in &numbers {
            std::fs::create_dir(dir.path().join(checkpoint_dir_name(*n))).unwrap();
        }
        for n in &markers {
            std::fs::create_dir(dir.path().join(incomplete_marker_name(*n))).unwrap();
        }
        std::fs::create_dir(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("99999999"), "a file, not a checkpoint").unwrap();

        prop_assert_eq!(latest_number(dir.path()).unwrap(), numbers.iter().max().copied());
    }

    #[test]
    fn dir_names_parse_back(n in 0u64..u64::MAX) {
        let name = checkpoint_dir_name(n);
        prop_assert!(name.len() >= 5);
        prop_assert_eq!(parse_number(&name), Some(n));
        prop_assert_eq!(parse_number(&incomplete_marker_name(n)), None);
    }
}

// --- Scheduling properties ---

proptest! {
    #[test]
    fn iteration_zero_fires_every_periodic_event(
        tick in 1u64..1000,
        progress in 1u64..1000,
        checkpoint in 1u64..1000,
    ) {
        let events = events_for(0, &Frequencies::new(tick, progress, checkpoint));
        prop_assert_eq!(events.len(), 3);
    }

    #[test]
    fn events_follow_divisibility(
        iteration in 0u64..100_000,
        tick in 1u64..500,
        progress in 1u64..500,
        checkpoint in 1u64..500,
    ) {
        let events = events_for(iteration, &Frequencies::new(tick, progress, checkpoint));
        prop_assert_eq!(events.contains(LogEvent::Tick), iteration % tick == 0);
        prop_assert_eq!(events.contains(LogEvent::Progress), iteration % progress == 0);
        prop_assert_eq!(events.contains(LogEvent::Checkpoint), iteration % checkpoint == 0);
        prop_assert!(!events.contains(LogEvent::Init));
        prop_assert!(!events.contains(LogEvent::Resume));
        prop_assert!(!events.contains(LogEvent::Epoch));
    }
}
