//! Classifying CI validation runs.
//!
//! Pure evaluation of a try push's outcome from its flags plus the
//! aggregated task results. The driving policy (what to do with each
//! result) lives with the landing driver.

use crate::record::TryPush;
use crate::services::TaskSet;

/// Maximum tolerated failure rate among scheduled test tasks.
///
/// A stability push repeats test execution to smoke out flakes, so a much
/// higher raw failure rate is still informative.
pub const NORMAL_FAILURE_THRESHOLD: f64 = 0.5;
pub const STABILITY_FAILURE_THRESHOLD: f64 = 0.8;

/// Outcome classification for one try push.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TryPushResult {
    Success,
    AcceptableFailures,
    InfraFail,
    TooManyFailures,
    Pending,
}

impl TryPushResult {
    pub fn is_failure(self) -> bool {
        matches!(self, TryPushResult::InfraFail | TryPushResult::TooManyFailures)
    }

    pub fn is_ok(self) -> bool {
        matches!(self, TryPushResult::Success | TryPushResult::AcceptableFailures)
    }
}

pub fn failure_threshold(stability: bool) -> f64 {
    if stability {
        STABILITY_FAILURE_THRESHOLD
    } else {
        NORMAL_FAILURE_THRESHOLD
    }
}

/// Classify a try push once task results are available.
///
/// Conditions are checked in order; `accept_failures` is the human override
/// that lets a run with known-bad infra or excess failures fall through to
/// the remaining checks.
pub fn try_result(push: &TryPush, tasks: &dyn TaskSet) -> TryPushResult {
    if push.infra_fail && !push.accept_failures {
        return TryPushResult::InfraFail;
    }
    if !tasks.complete(true) {
        return TryPushResult::Pending;
    }
    if tasks.success() {
        return TryPushResult::Success;
    }
    if !tasks.failed_builds().is_empty() && !push.accept_failures {
        return TryPushResult::InfraFail;
    }
    if tasks.failure_limit_exceeded(failure_threshold(push.stability)) && !push.accept_failures {
        return TryPushResult::TooManyFailures;
    }
    TryPushResult::AcceptableFailures
}
