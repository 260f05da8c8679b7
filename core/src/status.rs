//! Session-status derivation and verification classification.
//!
//! Both functions here are pure: they know nothing about the aggregate store
//! and have no side effects.
//!
//! # Status Derivation
//!
//! ```text
//! adminCancelled ──────────────────────────────▶ CANCELLED (terminal)
//! adminPostponed ──────────────────────────────▶ POSTPONED (manual only)
//!
//!          scheduledStart            scheduledEnd
//! ─────────────────┼──────────────────────┼─────────────────▶ now
//!    NOT_STARTED   │     IN_PROGRESS      │    COMPLETED
//! ```

use crate::error::MetricsError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Attendance rate (percent) at or above which a completed session is verified.
pub const VERIFIED_THRESHOLD_PERCENT: i64 = 95;

/// Attendance rate (percent) below which a completed session fails verification.
pub const FAILED_THRESHOLD_PERCENT: i64 = 50;

/// Lifecycle status of an exam session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    /// Scheduled start has not been reached
    NotStarted,
    /// Between scheduled start (inclusive) and scheduled end (exclusive)
    InProgress,
    /// Scheduled end has been reached
    Completed,
    /// Cancelled by an administrator (terminal)
    Cancelled,
    /// Postponed by an administrator
    Postponed,
}

impl SessionStatus {
    /// All statuses, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::NotStarted,
        Self::InProgress,
        Self::Completed,
        Self::Cancelled,
        Self::Postponed,
    ];

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "NOT_STARTED",
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Cancelled => "CANCELLED",
            Self::Postponed => "POSTPONED",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Serialization`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, MetricsError> {
        match s {
            "NOT_STARTED" => Ok(Self::NotStarted),
            "IN_PROGRESS" => Ok(Self::InProgress),
            "COMPLETED" => Ok(Self::Completed),
            "CANCELLED" => Ok(Self::Cancelled),
            "POSTPONED" => Ok(Self::Postponed),
            _ => Err(MetricsError::Serialization(format!(
                "Invalid session status: {s}"
            ))),
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether `next` is reachable from `self`.
    ///
    /// Transitions are forward-only. `CANCELLED` is reachable from every state
    /// and leads nowhere. A postponed session may resume at any point of its
    /// rescheduled window. Staying in the same state is always allowed.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use SessionStatus::{Cancelled, Completed, InProgress, NotStarted, Postponed};

        match (self, next) {
            (Cancelled, Cancelled) => true,
            (Cancelled, _) => false,
            (_, Cancelled) => true,
            (NotStarted, _) | (Postponed, _) => true,
            (InProgress, InProgress | Completed | Postponed) => true,
            (InProgress, NotStarted) => false,
            (Completed, Completed) => true,
            (Completed, _) => false,
        }
    }

    /// Check a transition, producing [`MetricsError::InvalidTransition`] when unreachable.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::InvalidTransition`] if `next` is not reachable from `self`.
    pub fn ensure_transition(
        self,
        session_id: crate::SessionId,
        next: Self,
    ) -> Result<(), MetricsError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(MetricsError::InvalidTransition {
                session_id,
                from: self,
                to: next,
            })
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Post-completion classification of attendance against expectation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VerificationStatus {
    /// Session not completed yet
    Pending,
    /// Attendance rate at or above 95%
    Verified,
    /// Attendance rate below 50%
    Failed,
    /// Partial attendance, accepted with an override
    Overridden,
    /// No candidates were expected
    Absent,
}

impl VerificationStatus {
    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Verified => "VERIFIED",
            Self::Failed => "FAILED",
            Self::Overridden => "OVERRIDDEN",
            Self::Absent => "ABSENT",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::Serialization`] if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, MetricsError> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "VERIFIED" => Ok(Self::Verified),
            "FAILED" => Ok(Self::Failed),
            "OVERRIDDEN" => Ok(Self::Overridden),
            "ABSENT" => Ok(Self::Absent),
            _ => Err(MetricsError::Serialization(format!(
                "Invalid verification status: {s}"
            ))),
        }
    }
}

impl fmt::Display for VerificationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the session status from the clock, the scheduled window and the
/// administrative flags.
///
/// Cancellation wins over everything, then postponement. `POSTPONED` is never
/// produced from time alone.
///
/// # Example
///
/// ```
/// use exam_metrics_core::status::{SessionStatus, derive_status};
/// use chrono::{TimeZone, Utc};
///
/// let start = Utc.with_ymd_and_hms(2025, 6, 2, 10, 0, 0).unwrap();
/// let end = Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap();
///
/// assert_eq!(derive_status(end, start, end, false, false), SessionStatus::Completed);
/// assert_eq!(derive_status(start, start, end, true, false), SessionStatus::Cancelled);
/// ```
#[must_use]
pub fn derive_status(
    now: DateTime<Utc>,
    scheduled_start: DateTime<Utc>,
    scheduled_end: DateTime<Utc>,
    admin_cancelled: bool,
    admin_postponed: bool,
) -> SessionStatus {
    if admin_cancelled {
        return SessionStatus::Cancelled;
    }
    if admin_postponed {
        return SessionStatus::Postponed;
    }
    if now < scheduled_start {
        SessionStatus::NotStarted
    } else if now < scheduled_end {
        SessionStatus::InProgress
    } else {
        SessionStatus::Completed
    }
}

/// Classify attendance once a session has completed.
///
/// Any status other than `COMPLETED` yields `PENDING`. With nobody expected the
/// rate is undefined and the session is classified `ABSENT`.
#[must_use]
pub fn classify_verification(
    status: SessionStatus,
    total_expected: i32,
    total_present: i32,
) -> VerificationStatus {
    if status != SessionStatus::Completed {
        return VerificationStatus::Pending;
    }
    if total_expected <= 0 {
        return VerificationStatus::Absent;
    }

    // Integer percentages keep the thresholds exact.
    let present = i64::from(total_present) * 100;
    let expected = i64::from(total_expected);

    if present >= VERIFIED_THRESHOLD_PERCENT * expected {
        VerificationStatus::Verified
    } else if present < FAILED_THRESHOLD_PERCENT * expected {
        VerificationStatus::Failed
    } else {
        VerificationStatus::Overridden
    }
}
