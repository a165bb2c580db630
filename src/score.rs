//! Session scoring
//!
//! A pure function of the session record: no I/O and no clock reads feed
//! into the numbers, so scoring the same state twice yields the same record.

use crate::config::ScoringConfig;
use crate::session::{CiStatus, Scoring, SessionState, TimelineEvent, TimelineEventType};
use crate::testing::ExitSignal;
use crate::util::round_to;
use std::time::Instant;

/// Bonus added when the session ends in `CiStatus::Success`
const CI_SUCCESS_BONUS: f64 = 20.0;
/// Scale applied to the speed factor before it becomes points
const SPEED_BONUS_SCALE: f64 = 10.0;
const COMPUTATION_METHOD: &str = "deterministic";

/// Final CI verdict for a session.
///
/// `last_exit` comes from the upstream session document; validation never updates it.
pub fn ci_status(state: &SessionState) -> CiStatus {
    let has_fixes = !state.fixes.is_empty();
    if state.fatal_error {
        CiStatus::Failed
    } else if state.unresolved_failures() == 0 {
        CiStatus::Success
    } else if has_fixes && state.last_exit == Some(ExitSignal::NoTestsCollected) {
        // Without a suite nothing proves the remaining failures still exist.
        CiStatus::Success
    } else if has_fixes {
        CiStatus::Partial
    } else {
        CiStatus::Failed
    }
}

pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    /// Compute the record for `state` with an explicit CI verdict.
    pub fn compute(&self, state: &SessionState, status: CiStatus) -> Scoring {
        let total_failures = state.failures.len();
        let actual_fixes = state.fixes.iter().filter(|fix| fix.validated).count();
        let total_regressions: usize = state
            .validation_results
            .iter()
            .map(|r| r.tests_regressed)
            .sum();

        let fix_efficiency = if total_failures > 0 {
            actual_fixes as f64 / total_failures as f64
        } else {
            0.0
        };
        let fix_score = actual_fixes as f64 * self.config.per_fix;

        let max_iterations = state.max_retries;
        let iterations_used = state.iteration;
        let speed_factor = if max_iterations == 0 {
            0.0
        } else {
            ((max_iterations as f64 - iterations_used as f64) / max_iterations as f64).max(0.0)
        };
        let speed_bonus = speed_factor * self.config.speed_factor * SPEED_BONUS_SCALE;

        let regression_penalty = total_regressions as f64 * self.config.regression_penalty;
        let ci_success_score = if status == CiStatus::Success {
            CI_SUCCESS_BONUS
        } else {
            0.0
        };

        let total = (self.config.base + fix_score + speed_bonus - regression_penalty
            + ci_success_score)
            .max(0.0);

        Scoring {
            base_score: self.config.base,
            fix_efficiency: round_to(fix_efficiency, 4),
            speed_factor: round_to(speed_factor, 4),
            speed_bonus,
            regression_penalty: round_to(regression_penalty, 2),
            ci_success_score,
            total_score: round_to(total, 2),
            iterations_used,
            max_iterations,
            total_possible_fixes: total_failures,
            actual_fixes,
            total_regressions,
            computation_method: COMPUTATION_METHOD.to_string(),
        }
    }

    /// Finalize the CI status and attach a fresh score to the session.
    pub fn score(&self, mut state: SessionState) -> SessionState {
        let started = Instant::now();
        state.ci_status = ci_status(&state);
        let scoring = self.compute(&state, state.ci_status);

        tracing::info!(
            run_id = %state.run_id,
            ci_status = %state.ci_status,
            total = scoring.total_score,
            fixes = scoring.actual_fixes,
            efficiency = scoring.fix_efficiency,
            regression_penalty = scoring.regression_penalty,
            "session scored"
        );

        state.timeline.push(
            TimelineEvent::new(
                state.iteration,
                TimelineEventType::Scoring,
                format!("Final score: {:.1}/100", scoring.total_score),
            )
            .with_duration(started.elapsed().as_secs_f64()),
        );
        state.scoring = Some(scoring);
        state
    }
}
