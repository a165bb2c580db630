//! Patch validation
//!
//! Decides which proposed patches may stay applied. Patches touching
//! distinct files are first tried together as one batch; anything the batch
//! does not settle is applied and tested one patch at a time. Every patch
//! that ends up rejected is rolled back to its `original_code` before
//! `validate` returns.

use crate::config::ValidationConfig;
use crate::error::EngineError;
use crate::safe_apply::PatchApplier;
use crate::session::{
    Fix, Patch, SessionState, TimelineEvent, TimelineEventType, ValidationMode, ValidationResult,
};
use crate::testing::{ExitSignal, TestBackend, TestRunResult};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Instant;

const REASON_APPLY_FAILED: &str = "failed to apply patch";
const REASON_NO_TESTS_FIXED: &str = "no tests fixed by this patch";
const REASON_RUN_INCOMPLETE: &str = "test run did not complete";
const REASON_SYNTAX_BROKEN: &str = "repository no longer parses after patch";
const REASON_NON_DETERMINISTIC: &str = "non-deterministic test outcome";

/// Accept/reject verdict for one suite run, before any side effects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Decision {
    pub accepted: bool,
    pub tests_fixed: usize,
    pub tests_regressed: usize,
    pub reason: Option<String>,
}

impl Decision {
    fn accept(tests_fixed: usize) -> Self {
        Self {
            accepted: true,
            tests_fixed,
            tests_regressed: 0,
            reason: None,
        }
    }

    fn reject(tests_fixed: usize, tests_regressed: usize, reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            tests_fixed,
            tests_regressed,
            reason: Some(reason.into()),
        }
    }
}

/// Whether a run failed in a way that disproves a patch even without a
/// failure baseline.
fn fails_outright(signal: ExitSignal) -> bool {
    matches!(
        signal,
        ExitSignal::TestsFailed | ExitSignal::SyntaxError | ExitSignal::TimedOut | ExitSignal::Crashed
    )
}

/// Judge a single-patch run against the session baseline.
///
/// `previous` is the exit signal the session observed before validation.
pub(crate) fn decide(previous: Option<ExitSignal>, before: usize, run: &TestRunResult) -> Decision {
    let after = run.failures();

    // Without a suite (or without known failures) a clean run cannot
    // disprove the patch.
    if run.signal == ExitSignal::NoTestsCollected || (before == 0 && !fails_outright(run.signal)) {
        return Decision::accept(1);
    }

    // Syntax fixes expose the logic failures the parse error was hiding.
    if previous == Some(ExitSignal::SyntaxError) && run.signal.executed() && run.passed > 0 {
        return Decision::accept(run.passed);
    }

    let new_failures = after.saturating_sub(before);
    let tests_fixed = before.saturating_sub(after);

    if !run.signal.completed() {
        return Decision::reject(
            tests_fixed,
            0,
            format!("{} ({:?})", REASON_RUN_INCOMPLETE, run.signal),
        );
    }
    if new_failures > 0 {
        return Decision::reject(
            tests_fixed,
            new_failures,
            format!("introduced {} new failures", new_failures),
        );
    }
    if run.signal == ExitSignal::SyntaxError {
        return Decision::reject(tests_fixed, 0, REASON_SYNTAX_BROKEN);
    }
    if after >= before && before > 0 {
        return Decision::reject(tests_fixed, 0, REASON_NO_TESTS_FIXED);
    }
    Decision::accept(tests_fixed)
}

/// Whether a batch run may be kept as a whole.
fn batch_improves(baseline: usize, run: &TestRunResult) -> bool {
    let usable = run.signal.executed() || run.signal == ExitSignal::NoTestsCollected;
    usable
        && (run.failures() < baseline || (baseline == 0 && run.signal == ExitSignal::Passed))
}

/// Remaining number of fixes the session may still claim.
///
/// Keeps the sum of `tests_fixed` over accepted results within the number
/// of failures recorded at session start.
#[derive(Debug, Clone, Copy)]
struct FixBudget {
    remaining: usize,
}

impl FixBudget {
    fn for_session(state: &SessionState) -> Self {
        Self {
            remaining: state.failures.len().saturating_sub(state.claimed_fixes()),
        }
    }

    fn claim(&mut self, wanted: usize) -> usize {
        let granted = wanted.min(self.remaining);
        self.remaining -= granted;
        granted
    }
}

/// Validates a session's pending patches against one test backend.
///
/// The backend is fixed for the engine's lifetime, so a session never
/// switches runners halfway through.
pub struct ValidationEngine<'a> {
    backend: &'a dyn TestBackend,
    applier: PatchApplier,
    config: ValidationConfig,
}

impl<'a> ValidationEngine<'a> {
    pub fn new(backend: &'a dyn TestBackend, config: ValidationConfig) -> Self {
        Self {
            backend,
            applier: PatchApplier::new(),
            config,
        }
    }

    /// Validate every patch not yet validated and return the updated state.
    pub fn validate(&self, mut state: SessionState) -> SessionState {
        let started = Instant::now();
        let baseline = state.unresolved_failures();
        let mut budget = FixBudget::for_session(&state);
        let pending: Vec<usize> = state
            .patches
            .iter()
            .enumerate()
            .filter(|(_, p)| !p.validated)
            .map(|(idx, _)| idx)
            .collect();

        tracing::info!(
            patches = pending.len(),
            baseline,
            backend = self.backend.name(),
            "validating patches"
        );

        let mut results: Vec<ValidationResult> = Vec::new();
        let mut accepted: Vec<usize> = Vec::new();
        let mut fatal: Option<EngineError> = None;
        // Patches whose file could not be rolled back after a failed batch
        let mut unrestored: HashSet<usize> = HashSet::new();

        let grouped = group_by_file(&state, &pending);
        if grouped.len() >= 2 {
            match self.try_batch(&state, &grouped, baseline, &mut unrestored) {
                Ok(Some(run)) => {
                    let after = run.failures();
                    tracing::info!(
                        files = grouped.len(),
                        before = baseline,
                        after,
                        "batch validation accepted"
                    );
                    for &idx in &grouped {
                        let patch = &mut state.patches[idx];
                        patch.validated = true;
                        let result = ValidationResult {
                            patch_id: patch.patch_id.clone(),
                            passed: true,
                            tests_before: baseline,
                            tests_after: after,
                            tests_fixed: budget.claim(1),
                            tests_regressed: 0,
                            rejection_reason: None,
                            deterministic: true,
                            mode: ValidationMode::Batch,
                        };
                        let event = decision_event(state.iteration, &state.patches[idx], &result);
                        state.timeline.push(event);
                        results.push(result);
                        accepted.push(idx);
                    }
                }
                Ok(None) => {
                    tracing::warn!(
                        files = grouped.len(),
                        "batch validation failed, validating patches one at a time"
                    );
                }
                Err(err) => fatal = Some(err),
            }
        }

        if fatal.is_none() {
            for &idx in &pending {
                if state.patches[idx].validated {
                    continue;
                }
                let dirty = unrestored.contains(&idx);
                match self.validate_one(&state, &state.patches[idx], baseline, &mut budget, dirty) {
                    Ok(result) => {
                        let event = decision_event(state.iteration, &state.patches[idx], &result);
                        state.timeline.push(event);
                        if result.passed {
                            state.patches[idx].validated = true;
                            accepted.push(idx);
                        }
                        results.push(result);
                    }
                    Err(err) => {
                        fatal = Some(err);
                        break;
                    }
                }
            }
        }

        if let Some(err) = fatal {
            tracing::error!(error = %err, "test backend unavailable, aborting validation");
            state.fatal_error = true;
            state.timeline.push(TimelineEvent::new(
                state.iteration,
                TimelineEventType::BackendFailure,
                format!("Validation aborted: {}", err),
            ));
        }

        let validated = results.len();
        let accepted_count = results.iter().filter(|r| r.passed).count();
        let fixes = build_fixes(&state, &accepted);
        state.validation_results.extend(results);
        state.fixes.extend(fixes);

        let elapsed = started.elapsed().as_secs_f64();
        state.timeline.push(
            TimelineEvent::new(
                state.iteration,
                TimelineEventType::Validation,
                format!(
                    "Validated {} patches, {} accepted",
                    validated, accepted_count
                ),
            )
            .with_counts(baseline, state.unresolved_failures())
            .with_duration(elapsed),
        );

        tracing::info!(
            accepted = accepted_count,
            validated,
            seconds = elapsed,
            "validation finished"
        );
        state
    }

    /// Apply all grouped patches, run once, keep them all or revert them all.
    ///
    /// `Ok(Some(run))` means the batch was accepted and stays applied. Files
    /// that could not be rolled back are added to `unrestored`.
    fn try_batch(
        &self,
        state: &SessionState,
        grouped: &[usize],
        baseline: usize,
        unrestored: &mut HashSet<usize>,
    ) -> Result<Option<TestRunResult>, EngineError> {
        tracing::info!(files = grouped.len(), "attempting batch validation");
        let mut patches: Vec<(usize, &Patch, PathBuf)> = Vec::with_capacity(grouped.len());
        for &idx in grouped {
            let patch = &state.patches[idx];
            match state.resolve(&patch.file_path) {
                Ok(path) => patches.push((idx, patch, path)),
                Err(err) => {
                    tracing::warn!(patch_id = patch.short_id(), error = %err, "batch path refused");
                    return Ok(None);
                }
            }
        }

        for (applied, (_, patch, path)) in patches.iter().enumerate() {
            if let Err(err) = self.applier.apply(path, &patch.patched_code) {
                tracing::warn!(patch_id = patch.short_id(), error = %err, "batch apply failed");
                self.revert_all(&patches[..applied], unrestored);
                return Ok(None);
            }
        }

        let run = match self.backend.run_suite() {
            Ok(run) => run,
            Err(err) => {
                self.revert_all(&patches, unrestored);
                return Err(err);
            }
        };

        if !batch_improves(baseline, &run) {
            self.revert_all(&patches, unrestored);
            return Ok(None);
        }

        if self.config.verify_determinism {
            let rerun = match self.backend.run_suite() {
                Ok(rerun) => rerun,
                Err(err) => {
                    self.revert_all(&patches, unrestored);
                    return Err(err);
                }
            };
            if !run.same_outcome(&rerun) {
                tracing::warn!("batch outcome differed between runs");
                self.revert_all(&patches, unrestored);
                return Ok(None);
            }
        }

        Ok(Some(run))
    }

    fn revert_all(&self, patches: &[(usize, &Patch, PathBuf)], unrestored: &mut HashSet<usize>) {
        for (idx, patch, path) in patches {
            if self.restore(patch, path).is_some() {
                unrestored.insert(*idx);
            }
        }
    }

    /// Apply one patch, run the suite, and keep or roll back the patch.
    ///
    /// Errors only when the backend produced no result; the file has been
    /// restored by then.
    fn validate_one(
        &self,
        state: &SessionState,
        patch: &Patch,
        baseline: usize,
        budget: &mut FixBudget,
        dirty: bool,
    ) -> Result<ValidationResult, EngineError> {
        let mut result = ValidationResult {
            patch_id: patch.patch_id.clone(),
            passed: false,
            tests_before: baseline,
            tests_after: baseline,
            tests_fixed: 0,
            tests_regressed: 0,
            rejection_reason: None,
            deterministic: true,
            mode: ValidationMode::Sequential,
        };

        let path = match state.resolve(&patch.file_path) {
            Ok(path) => path,
            Err(err) => {
                result.rejection_reason = Some(format!("{}: {}", REASON_APPLY_FAILED, err));
                return Ok(result);
            }
        };

        // The write is atomic, so a failed apply leaves the file as it was.
        // For a `dirty` file that is the batch content, so retry the rollback.
        if let Err(err) = self.applier.apply(&path, &patch.patched_code) {
            let mut reason = format!("{}: {}", REASON_APPLY_FAILED, err);
            if dirty {
                if let Some(revert_err) = self.restore(patch, &path) {
                    reason = format!("{}; rollback failed: {}", reason, revert_err);
                }
            }
            result.rejection_reason = Some(reason);
            return Ok(result);
        }

        let run = match self.backend.run_suite() {
            Ok(run) => run,
            Err(err) => {
                self.restore(patch, &path);
                return Err(err);
            }
        };

        let mut decision = decide(state.last_exit, baseline, &run);
        result.tests_after = run.failures();

        if decision.accepted && self.config.verify_determinism {
            let rerun = match self.backend.run_suite() {
                Ok(rerun) => rerun,
                Err(err) => {
                    self.restore(patch, &path);
                    return Err(err);
                }
            };
            if !run.same_outcome(&rerun) {
                result.deterministic = false;
                decision = Decision::reject(decision.tests_fixed, 0, REASON_NON_DETERMINISTIC);
            }
        }

        result.tests_regressed = decision.tests_regressed;
        if decision.accepted {
            result.passed = true;
            result.tests_fixed = budget.claim(decision.tests_fixed);
            return Ok(result);
        }

        result.tests_fixed = decision.tests_fixed;
        let mut reason = decision.reason.unwrap_or_else(|| REASON_NO_TESTS_FIXED.to_string());
        if let Some(err) = self.restore(patch, &path) {
            reason = format!("{}; rollback failed: {}", reason, err);
        }
        result.rejection_reason = Some(reason);
        Ok(result)
    }

    fn restore(&self, patch: &Patch, path: &std::path::Path) -> Option<EngineError> {
        match self.applier.revert(path, &patch.original_code) {
            Ok(()) => None,
            Err(err) => {
                tracing::error!(patch_id = patch.short_id(), error = %err, "failed to restore file");
                Some(err)
            }
        }
    }
}

/// First pending patch per target file, in proposal order.
///
/// Patches whose path is refused never join a batch.
fn group_by_file(state: &SessionState, pending: &[usize]) -> Vec<usize> {
    let mut seen: HashSet<PathBuf> = HashSet::new();
    pending
        .iter()
        .copied()
        .filter(|&idx| match state.resolve(&state.patches[idx].file_path) {
            Ok(path) => seen.insert(path),
            Err(_) => false,
        })
        .collect()
}

fn build_fixes(state: &SessionState, accepted: &[usize]) -> Vec<Fix> {
    let failures: HashMap<&str, _> = state
        .failures
        .iter()
        .map(|f| (f.failure_id.as_str(), f))
        .collect();

    accepted
        .iter()
        .filter_map(|&idx| {
            let patch = &state.patches[idx];
            match failures.get(patch.failure_id.as_str()) {
                Some(failure) => Some(Fix::from_accepted(patch, failure)),
                None => {
                    tracing::debug!(
                        patch_id = patch.short_id(),
                        failure_id = %patch.failure_id,
                        "accepted patch targets an unknown failure, no fix recorded"
                    );
                    None
                }
            }
        })
        .collect()
}

fn decision_event(iteration: u32, patch: &Patch, result: &ValidationResult) -> TimelineEvent {
    let (event_type, description) = if result.passed {
        tracing::info!(
            patch_id = patch.short_id(),
            file = %patch.file_path.display(),
            fixed = result.tests_fixed,
            mode = ?result.mode,
            "patch accepted"
        );
        (
            TimelineEventType::PatchAccepted,
            format!(
                "Patch {} accepted ({}): fixed {} tests",
                patch.short_id(),
                patch.file_path.display(),
                result.tests_fixed
            ),
        )
    } else {
        let reason = result.rejection_reason.as_deref().unwrap_or("rejected");
        tracing::warn!(
            patch_id = patch.short_id(),
            file = %patch.file_path.display(),
            reason,
            "patch rejected"
        );
        (
            TimelineEventType::PatchRejected,
            format!(
                "Patch {} rejected ({}): {}",
                patch.short_id(),
                patch.file_path.display(),
                reason
            ),
        )
    };
    TimelineEvent::new(iteration, event_type, description)
        .with_counts(result.tests_before, result.tests_after)
}

#[cfg(test)]
mod tests;
