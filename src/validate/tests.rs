use super::*;
use crate::error::EngineResult;
use crate::session::{Failure, FailureType, PatchType};
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

const SUITE_SIZE: usize = 10;

fn run(signal: ExitSignal, passed: usize, failed: usize, errors: usize) -> TestRunResult {
    TestRunResult {
        exit_code: None,
        signal,
        total: passed + failed + errors,
        passed,
        failed,
        errors,
        raw_output: String::new(),
        duration_seconds: 0.0,
    }
}

/// Replays canned results in order.
struct ScriptedBackend {
    runs: RefCell<VecDeque<EngineResult<TestRunResult>>>,
    calls: Cell<usize>,
}

impl ScriptedBackend {
    fn new(runs: Vec<EngineResult<TestRunResult>>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            calls: Cell::new(0),
        }
    }
}

impl TestBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn run_suite(&self) -> EngineResult<TestRunResult> {
        self.calls.set(self.calls.get() + 1);
        self.runs
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(EngineError::backend("scripted", "script exhausted")))
    }
}

/// Derives results from the files on disk: every `BUG` marker is one
/// failing test, any `SYNTAX` marker breaks collection.
struct MarkerBackend {
    root: PathBuf,
    calls: Cell<usize>,
}

impl MarkerBackend {
    fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            calls: Cell::new(0),
        }
    }
}

impl TestBackend for MarkerBackend {
    fn name(&self) -> &str {
        "marker"
    }

    fn run_suite(&self) -> EngineResult<TestRunResult> {
        self.calls.set(self.calls.get() + 1);
        let mut bugs = 0;
        let mut broken = false;
        for entry in fs::read_dir(&self.root)? {
            let content = fs::read_to_string(entry?.path())?;
            bugs += content.matches("BUG").count();
            broken |= content.contains("SYNTAX");
        }
        if broken {
            return Ok(run(ExitSignal::SyntaxError, 0, 0, 1));
        }
        let signal = if bugs > 0 {
            ExitSignal::TestsFailed
        } else {
            ExitSignal::Passed
        };
        Ok(run(signal, SUITE_SIZE.saturating_sub(bugs), bugs, 0))
    }
}

fn failure(id: &str, file: &str) -> Failure {
    Failure {
        failure_id: id.to_string(),
        failure_type: FailureType::Assertion,
        file_path: PathBuf::from(file),
        line_number: Some(1),
        test_name: None,
        message: None,
    }
}

fn patch(id: &str, failure_id: &str, file: &str, original: &str, patched: &str) -> Patch {
    Patch {
        patch_id: id.to_string(),
        failure_id: failure_id.to_string(),
        file_path: PathBuf::from(file),
        original_code: original.to_string(),
        patched_code: patched.to_string(),
        reasoning: format!("fix {}", failure_id),
        patch_type: PatchType::LogicFix,
        diff: String::new(),
        validated: false,
    }
}

fn session(root: &Path) -> SessionState {
    SessionState::new("test-run", root)
}

fn read(root: &Path, file: &str) -> String {
    fs::read_to_string(root.join(file)).unwrap()
}

// ---------------------------------------------------------------------------
// decide()
// ---------------------------------------------------------------------------

#[test]
fn no_tests_collected_is_accepted_unconditionally() {
    let decision = decide(None, 3, &run(ExitSignal::NoTestsCollected, 0, 0, 0));
    assert!(decision.accepted);
    assert_eq!(decision.tests_fixed, 1);
    assert_eq!(decision.tests_regressed, 0);
}

#[test]
fn clean_run_without_baseline_is_accepted() {
    let decision = decide(None, 0, &run(ExitSignal::Passed, 4, 0, 0));
    assert!(decision.accepted);
}

#[test]
fn failing_run_without_baseline_is_a_regression() {
    let decision = decide(None, 0, &run(ExitSignal::TestsFailed, 3, 2, 0));
    assert!(!decision.accepted);
    assert_eq!(decision.tests_regressed, 2);
    assert_eq!(
        decision.reason.as_deref(),
        Some("introduced 2 new failures")
    );
}

#[test]
fn more_failures_than_baseline_is_rejected_with_count() {
    let decision = decide(None, 2, &run(ExitSignal::TestsFailed, 1, 4, 1));
    assert!(!decision.accepted);
    assert_eq!(decision.tests_regressed, 3);
    assert!(decision.reason.unwrap().contains('3'));
}

#[test]
fn unchanged_failures_fix_nothing() {
    let decision = decide(None, 2, &run(ExitSignal::TestsFailed, 5, 2, 0));
    assert!(!decision.accepted);
    assert_eq!(decision.reason.as_deref(), Some(REASON_NO_TESTS_FIXED));
}

#[test]
fn fewer_failures_is_accepted_with_fixed_count() {
    let decision = decide(None, 5, &run(ExitSignal::TestsFailed, 8, 1, 1));
    assert!(decision.accepted);
    assert_eq!(decision.tests_fixed, 3);
}

#[test]
fn syntax_fix_that_exposes_failures_is_progress() {
    let decision = decide(
        Some(ExitSignal::SyntaxError),
        1,
        &run(ExitSignal::TestsFailed, 6, 3, 0),
    );
    assert!(decision.accepted);
    assert_eq!(decision.tests_fixed, 6);
}

#[test]
fn syntax_fix_needs_a_passing_test() {
    let decision = decide(
        Some(ExitSignal::SyntaxError),
        1,
        &run(ExitSignal::TestsFailed, 0, 3, 0),
    );
    assert!(!decision.accepted);
}

#[test]
fn timed_out_run_is_rejected() {
    let decision = decide(None, 2, &run(ExitSignal::TimedOut, 0, 0, 0));
    assert!(!decision.accepted);
    assert!(decision.reason.unwrap().starts_with(REASON_RUN_INCOMPLETE));
}

#[test]
fn patch_that_breaks_parsing_is_rejected() {
    let decision = decide(None, 4, &run(ExitSignal::SyntaxError, 0, 0, 1));
    assert!(!decision.accepted);
    assert_eq!(decision.reason.as_deref(), Some(REASON_SYNTAX_BROKEN));
}

#[test]
fn fix_budget_never_exceeds_failures() {
    let mut budget = FixBudget { remaining: 2 };
    assert_eq!(budget.claim(1), 1);
    assert_eq!(budget.claim(5), 1);
    assert_eq!(budget.claim(1), 0);
}

// ---------------------------------------------------------------------------
// ValidationEngine
// ---------------------------------------------------------------------------

#[test]
fn accepted_patch_stays_applied_and_records_fix() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("calc.py"), "BUG BUG").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "calc.py"), failure("f2", "calc.py")];
    state.patches = vec![patch("p1", "f1", "calc.py", "BUG BUG", "ok")];

    let backend = MarkerBackend::new(root);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert_eq!(read(root, "calc.py"), "ok");
    assert!(state.patches[0].validated);
    assert_eq!(state.validation_results.len(), 1);
    let result = &state.validation_results[0];
    assert!(result.passed);
    assert_eq!(result.tests_before, 2);
    assert_eq!(result.tests_after, 0);
    assert_eq!(result.tests_fixed, 2);
    assert_eq!(result.mode, ValidationMode::Sequential);
    assert_eq!(state.fixes.len(), 1);
    assert_eq!(state.fixes[0].patch_id, "p1");
    assert!(state.fixes[0].validated);
}

#[test]
fn regressing_patch_is_rejected_and_restored() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("calc.py"), "BUG").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "calc.py")];
    state.patches = vec![patch("p1", "f1", "calc.py", "BUG", "BUG BUG BUG")];

    let backend = MarkerBackend::new(root);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert_eq!(read(root, "calc.py"), "BUG");
    assert!(!state.patches[0].validated);
    let result = &state.validation_results[0];
    assert!(!result.passed);
    assert_eq!(result.tests_regressed, 2);
    assert!(result.rejection_reason.as_deref().unwrap().contains('2'));
    assert!(state.fixes.is_empty());
    assert!(state
        .timeline
        .iter()
        .any(|e| e.event_type == TimelineEventType::PatchRejected));
}

#[test]
fn multi_file_batch_is_accepted_in_one_run() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "BUG").unwrap();
    fs::write(root.join("b.py"), "BUG").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py"), failure("f2", "b.py")];
    state.patches = vec![
        patch("p1", "f1", "a.py", "BUG", "fine"),
        patch("p2", "f2", "b.py", "BUG", "fine"),
    ];

    let backend = MarkerBackend::new(root);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert_eq!(backend.calls.get(), 1);
    assert_eq!(read(root, "a.py"), "fine");
    assert_eq!(read(root, "b.py"), "fine");
    assert!(state.patches.iter().all(|p| p.validated));
    assert_eq!(state.validation_results.len(), 2);
    for result in &state.validation_results {
        assert!(result.passed);
        assert_eq!(result.mode, ValidationMode::Batch);
        assert_eq!(result.tests_before, 2);
        assert_eq!(result.tests_after, 0);
        assert_eq!(result.tests_fixed, 1);
    }
    assert_eq!(state.fixes.len(), 2);
    assert_eq!(state.unresolved_failures(), 0);
}

#[test]
fn failed_batch_reverts_and_falls_back_to_sequential() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "BUG").unwrap();
    fs::write(root.join("b.py"), "BUG").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py"), failure("f2", "b.py")];
    state.patches = vec![
        patch("p1", "f1", "a.py", "BUG", "fine"),
        patch("p2", "f2", "b.py", "BUG", "BUG BUG BUG"),
    ];

    let backend = MarkerBackend::new(root);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    // batch + one run per patch
    assert_eq!(backend.calls.get(), 3);
    assert_eq!(read(root, "a.py"), "fine");
    assert_eq!(read(root, "b.py"), "BUG");
    assert!(state
        .validation_results
        .iter()
        .all(|r| r.mode == ValidationMode::Sequential));

    let first = &state.validation_results[0];
    assert!(first.passed);
    assert_eq!(first.tests_fixed, 1);
    let second = &state.validation_results[1];
    assert!(!second.passed);
    assert_eq!(second.tests_regressed, 1);
    assert_eq!(state.fixes.len(), 1);
}

#[test]
fn second_patch_for_same_file_is_validated_sequentially() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "BUG").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py")];
    state.patches = vec![
        patch("p1", "f1", "a.py", "BUG", "BUG BUG"),
        patch("p2", "f1", "a.py", "BUG", "fine"),
    ];

    let pending = vec![0, 1];
    assert_eq!(group_by_file(&state, &pending), vec![0]);

    let backend = MarkerBackend::new(root);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert_eq!(backend.calls.get(), 2);
    assert!(!state.validation_results[0].passed);
    assert!(state.validation_results[1].passed);
    assert_eq!(read(root, "a.py"), "fine");
}

#[test]
fn apply_failure_rejects_only_that_patch() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "BUG").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py"), failure("f2", "missing/b.py")];
    state.patches = vec![
        patch("p1", "f2", "missing/b.py", "x", "y"),
        patch("p2", "f1", "a.py", "BUG", "fine"),
    ];

    let backend = MarkerBackend::new(root);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert!(!state.fatal_error);
    let rejected = &state.validation_results[0];
    assert!(!rejected.passed);
    assert!(rejected
        .rejection_reason
        .as_deref()
        .unwrap()
        .starts_with(REASON_APPLY_FAILED));
    assert!(!root.join("missing").exists());
    assert!(state.validation_results[1].passed);
    assert_eq!(read(root, "a.py"), "fine");
}

#[test]
fn backend_failure_is_fatal_and_restores_file() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "old-a").unwrap();
    fs::write(root.join("b.py"), "old-b").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py")];
    state.patches = vec![
        patch("p1", "f1", "a.py", "old-a", "new-a"),
        patch("p2", "f1", "a.py", "old-a", "newer-a"),
    ];

    let backend = ScriptedBackend::new(vec![Err(EngineError::backend("scripted", "sandbox down"))]);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert!(state.fatal_error);
    assert_eq!(backend.calls.get(), 1);
    assert_eq!(read(root, "a.py"), "old-a");
    assert!(state.validation_results.is_empty());
    assert!(state.patches.iter().all(|p| !p.validated));
    assert!(state
        .timeline
        .iter()
        .any(|e| e.event_type == TimelineEventType::BackendFailure));
}

#[test]
fn no_test_suite_accepts_patch() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("tool.py"), "old").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "tool.py")];
    state.patches = vec![patch("p1", "f1", "tool.py", "old", "new")];

    let backend = ScriptedBackend::new(vec![Ok(run(ExitSignal::NoTestsCollected, 0, 0, 0))]);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    let result = &state.validation_results[0];
    assert!(result.passed);
    assert!(result.deterministic);
    assert_eq!(result.tests_fixed, 1);
    assert_eq!(read(root, "tool.py"), "new");
}

#[test]
fn syntax_transition_is_accepted_by_engine() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("mod.py"), "def f(:").unwrap();

    let mut state = session(root);
    state.last_exit = Some(ExitSignal::SyntaxError);
    state.failures = vec![failure("f1", "mod.py")];
    state.patches = vec![patch("p1", "f1", "mod.py", "def f(:", "def f():")];

    let backend = ScriptedBackend::new(vec![Ok(run(ExitSignal::TestsFailed, 4, 2, 0))]);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    let result = &state.validation_results[0];
    assert!(result.passed);
    // clamped to the single failure known at session start
    assert_eq!(result.tests_fixed, 1);
    assert_eq!(read(root, "mod.py"), "def f():");
}

#[test]
fn determinism_check_rejects_flaky_outcome() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "old").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py"), failure("f2", "a.py")];
    state.patches = vec![patch("p1", "f1", "a.py", "old", "new")];

    let backend = ScriptedBackend::new(vec![
        Ok(run(ExitSignal::TestsFailed, 9, 1, 0)),
        Ok(run(ExitSignal::TestsFailed, 8, 2, 0)),
    ]);
    let config = ValidationConfig {
        verify_determinism: true,
    };
    let state = ValidationEngine::new(&backend, config).validate(state);

    assert_eq!(backend.calls.get(), 2);
    let result = &state.validation_results[0];
    assert!(!result.passed);
    assert!(!result.deterministic);
    assert_eq!(
        result.rejection_reason.as_deref(),
        Some(REASON_NON_DETERMINISTIC)
    );
    assert_eq!(read(root, "a.py"), "old");
}

#[test]
fn determinism_check_keeps_stable_outcome() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "BUG").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py")];
    state.patches = vec![patch("p1", "f1", "a.py", "BUG", "ok")];

    let backend = MarkerBackend::new(root);
    let config = ValidationConfig {
        verify_determinism: true,
    };
    let state = ValidationEngine::new(&backend, config).validate(state);

    assert_eq!(backend.calls.get(), 2);
    assert!(state.validation_results[0].passed);
    assert!(state.validation_results[0].deterministic);
}

#[test]
fn validated_patches_are_not_revisited() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "ok").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py")];
    let mut done = patch("p1", "f1", "a.py", "BUG", "ok");
    done.validated = true;
    state.patches = vec![done];

    let backend = ScriptedBackend::new(Vec::new());
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert_eq!(backend.calls.get(), 0);
    assert!(state.validation_results.is_empty());
    assert_eq!(
        state.timeline.last().unwrap().event_type,
        TimelineEventType::Validation
    );
}

#[test]
fn accepted_patch_without_known_failure_records_no_fix() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "BUG").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py")];
    state.patches = vec![patch("p1", "gone", "a.py", "BUG", "ok")];

    let backend = MarkerBackend::new(root);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert!(state.validation_results[0].passed);
    assert!(state.patches[0].validated);
    assert!(state.fixes.is_empty());
}

#[test]
fn batch_fix_claims_respect_failure_count() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    for name in ["a.py", "b.py", "c.py"] {
        fs::write(root.join(name), "BUG").unwrap();
    }

    let mut state = session(root);
    // Three buggy files but only two failures were recorded upstream.
    state.failures = vec![failure("f1", "a.py"), failure("f2", "b.py")];
    state.patches = vec![
        patch("p1", "f1", "a.py", "BUG", "ok"),
        patch("p2", "f2", "b.py", "BUG", "ok"),
        patch("p3", "f2", "c.py", "BUG", "ok"),
    ];

    let backend = MarkerBackend::new(root);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    let claimed: usize = state
        .validation_results
        .iter()
        .filter(|r| r.passed)
        .map(|r| r.tests_fixed)
        .sum();
    assert_eq!(state.validation_results.len(), 3);
    assert!(claimed <= state.failures.len());
}

#[test]
fn suite_that_fails_to_load_is_not_a_fix() {
    // Three tests still pass but the module the failing tests import is broken.
    let decision = decide(None, 2, &run(ExitSignal::SyntaxError, 3, 0, 1));
    assert!(!decision.accepted);
    assert_eq!(decision.reason.as_deref(), Some(REASON_SYNTAX_BROKEN));

    let decision = decide(None, 5, &run(ExitSignal::SyntaxError, 0, 0, 1));
    assert!(!decision.accepted);
    assert_eq!(decision.tests_regressed, 0);
}

#[test]
fn patch_escaping_repository_is_refused_before_writing() {
    let dir = tempdir().unwrap();
    let root = dir.path().join("repo");
    fs::create_dir(&root).unwrap();
    fs::write(dir.path().join("outside.py"), "keep").unwrap();
    fs::write(root.join("a.py"), "BUG").unwrap();

    let mut state = session(&root);
    state.failures = vec![failure("f1", "a.py"), failure("f2", "a.py")];
    state.patches = vec![
        patch("p1", "f1", "../outside.py", "keep", "overwritten"),
        patch("p2", "f2", "a.py", "BUG", "ok"),
    ];

    let backend = ScriptedBackend::new(vec![Ok(run(ExitSignal::Passed, 9, 0, 0))]);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert_eq!(fs::read_to_string(dir.path().join("outside.py")).unwrap(), "keep");
    assert_eq!(backend.calls.get(), 1);
    let refused = &state.validation_results[0];
    assert!(!refused.passed);
    assert!(refused
        .rejection_reason
        .as_deref()
        .unwrap()
        .starts_with(REASON_APPLY_FAILED));
    assert!(!state.patches[0].validated);
    assert!(state.validation_results[1].passed);
    assert_eq!(read(&root, "a.py"), "ok");
}

#[test]
fn batch_apply_failure_reverts_files_already_written() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "a-old").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py"), failure("f2", "missing/b.py")];
    state.patches = vec![
        patch("p1", "f1", "a.py", "a-old", "a-new"),
        patch("p2", "f2", "missing/b.py", "b-old", "b-new"),
    ];

    // Only the sequential run of p1 reaches the suite, and it fixes nothing.
    let backend = ScriptedBackend::new(vec![Ok(run(ExitSignal::TestsFailed, 3, 2, 0))]);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert_eq!(backend.calls.get(), 1);
    assert_eq!(read(root, "a.py"), "a-old");
    assert!(!root.join("missing").exists());
    assert_eq!(state.validation_results.len(), 2);
    assert!(state
        .validation_results
        .iter()
        .all(|r| !r.passed && r.mode == ValidationMode::Sequential));
    assert!(!state.fatal_error);
}

#[test]
fn backend_failure_during_batch_reverts_every_file() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::write(root.join("a.py"), "a-old").unwrap();
    fs::write(root.join("b.py"), "b-old").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py"), failure("f2", "b.py")];
    state.patches = vec![
        patch("p1", "f1", "a.py", "a-old", "a-new"),
        patch("p2", "f2", "b.py", "b-old", "b-new"),
    ];

    let backend = ScriptedBackend::new(vec![Err(EngineError::backend("scripted", "sandbox down"))]);
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert!(state.fatal_error);
    assert_eq!(backend.calls.get(), 1);
    assert_eq!(read(root, "a.py"), "a-old");
    assert_eq!(read(root, "b.py"), "b-old");
    assert!(state.validation_results.is_empty());
    assert!(state.patches.iter().all(|p| !p.validated));
}

/// Replaces `sub/` with a plain file during the first run, so nothing
/// under it can be written afterwards.
struct ClobberingBackend {
    root: PathBuf,
    calls: Cell<usize>,
}

impl TestBackend for ClobberingBackend {
    fn name(&self) -> &str {
        "clobbering"
    }

    fn run_suite(&self) -> EngineResult<TestRunResult> {
        self.calls.set(self.calls.get() + 1);
        if self.calls.get() == 1 {
            let sub = self.root.join("sub");
            fs::remove_dir_all(&sub)?;
            fs::write(&sub, "not a directory")?;
            return Ok(run(ExitSignal::TestsFailed, 0, 5, 0));
        }
        Ok(run(ExitSignal::TestsFailed, 3, 2, 0))
    }
}

#[test]
fn failed_batch_rollback_is_reported_in_rejection() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("sub")).unwrap();
    fs::write(root.join("a.py"), "a-old").unwrap();
    fs::write(root.join("sub/b.py"), "b-old").unwrap();

    let mut state = session(root);
    state.failures = vec![failure("f1", "a.py"), failure("f2", "sub/b.py")];
    state.patches = vec![
        patch("p1", "f1", "a.py", "a-old", "a-new"),
        patch("p2", "f2", "sub/b.py", "b-old", "b-new"),
    ];

    let backend = ClobberingBackend {
        root: root.to_path_buf(),
        calls: Cell::new(0),
    };
    let state = ValidationEngine::new(&backend, ValidationConfig::default()).validate(state);

    assert_eq!(backend.calls.get(), 2);
    assert_eq!(read(root, "a.py"), "a-old");
    let reason = state.validation_results[1]
        .rejection_reason
        .as_deref()
        .unwrap();
    assert!(reason.starts_with(REASON_APPLY_FAILED));
    assert!(reason.contains("rollback failed"));
}
