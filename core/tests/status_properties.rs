//! Property tests for status derivation and the transition table.

#![allow(clippy::unwrap_used)] // Tests can unwrap

use chrono::{DateTime, Duration, TimeZone, Utc};
use exam_metrics_core::status::{
    SessionStatus, VerificationStatus, classify_verification, derive_status,
};
use proptest::prelude::*;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 0).unwrap()
}

fn any_status() -> impl Strategy<Value = SessionStatus> {
    prop::sample::select(SessionStatus::ALL.to_vec())
}

proptest! {
    #[test]
    fn cancelled_flag_always_wins(
        now in -10_000i64..10_000,
        start in -5_000i64..5_000,
        len in 1i64..5_000,
        postponed in any::<bool>(),
    ) {
        let start = base() + Duration::minutes(start);
        let end = start + Duration::minutes(len);
        let now = base() + Duration::minutes(now);

        prop_assert_eq!(derive_status(now, start, end, true, postponed), SessionStatus::Cancelled);
    }

    #[test]
    fn time_alone_never_postpones_or_cancels(
        now in -10_000i64..10_000,
        start in -5_000i64..5_000,
        len in 1i64..5_000,
    ) {
        let start = base() + Duration::minutes(start);
        let end = start + Duration::minutes(len);
        let now = base() + Duration::minutes(now);

        let status = derive_status(now, start, end, false, false);
        prop_assert!(!matches!(status, SessionStatus::Postponed | SessionStatus::Cancelled));
    }

    #[test]
    fn derived_status_never_moves_backwards_as_time_passes(
        earlier in -10_000i64..10_000,
        step in 0i64..10_000,
        start in -5_000i64..5_000,
        len in 1i64..5_000,
    ) {
        let start = base() + Duration::minutes(start);
        let end = start + Duration::minutes(len);
        let first_at = base() + Duration::minutes(earlier);
        let later_at = first_at + Duration::minutes(step);
        let first = derive_status(first_at, start, end, false, false);
        let later = derive_status(later_at, start, end, false, false);

        prop_assert!(first.can_transition_to(later));
    }

    #[test]
    fn cancelled_is_reachable_and_terminal(from in any_status(), to in any_status()) {
        prop_assert!(from.can_transition_to(SessionStatus::Cancelled));
        if to != SessionStatus::Cancelled {
            prop_assert!(!SessionStatus::Cancelled.can_transition_to(to));
        }
    }

    #[test]
    fn staying_put_is_always_allowed(status in any_status()) {
        prop_assert!(status.can_transition_to(status));
    }

    #[test]
    fn verification_only_after_completion(
        status in any_status(),
        expected in 0i32..1_000,
        present in 0i32..1_000,
    ) {
        let verification = classify_verification(status, expected, present);
        if status == SessionStatus::Completed {
            prop_assert_ne!(verification, VerificationStatus::Pending);
        } else {
            prop_assert_eq!(verification, VerificationStatus::Pending);
        }
    }
}
