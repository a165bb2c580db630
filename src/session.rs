//! Session record shared by the validation and scoring stages
//!
//! A `SessionState` is passed by value into each stage and handed back to the
//! caller, so only one stage can ever hold it at a time. Collections are
//! append-only; the only mutation allowed on an existing entry is flipping a
//! patch's `validated` flag.

use crate::error::{EngineError, EngineResult};
use crate::testing::{ExitSignal, RepoLanguage};
use crate::util::resolve_repo_path_allow_new;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Category of an observed test failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureType {
    Assertion,
    Error,
    Syntax,
    Import,
    Timeout,
    Other,
}

impl FailureType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureType::Assertion => "assertion",
            FailureType::Error => "error",
            FailureType::Syntax => "syntax",
            FailureType::Import => "import",
            FailureType::Timeout => "timeout",
            FailureType::Other => "other",
        }
    }
}

/// Nature of a proposed change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchType {
    LogicFix,
    SyntaxFix,
    ImportFix,
    TypeFix,
    TestFix,
    Refactor,
    Other,
}

/// Session-level verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CiStatus {
    Success,
    Partial,
    #[default]
    Failed,
}

impl std::fmt::Display for CiStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CiStatus::Success => "SUCCESS",
            CiStatus::Partial => "PARTIAL",
            CiStatus::Failed => "FAILED",
        };
        write!(f, "{}", label)
    }
}

/// One observed test failure, recorded before validation starts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub failure_id: String,
    pub failure_type: FailureType,
    pub file_path: PathBuf,
    #[serde(default)]
    pub line_number: Option<u32>,
    #[serde(default)]
    pub test_name: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A whole-file replacement proposed by the upstream repair process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub patch_id: String,
    pub failure_id: String,
    pub file_path: PathBuf,
    /// Pre-change snapshot, used for rollback
    pub original_code: String,
    pub patched_code: String,
    #[serde(default)]
    pub reasoning: String,
    pub patch_type: PatchType,
    #[serde(default)]
    pub diff: String,
    #[serde(default)]
    pub validated: bool,
}

impl Patch {
    /// First eight characters of the id, for log lines.
    pub fn short_id(&self) -> &str {
        match self.patch_id.char_indices().nth(8) {
            Some((idx, _)) => &self.patch_id[..idx],
            None => &self.patch_id,
        }
    }
}

/// How a validation result was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    Batch,
    #[default]
    Sequential,
}

/// Outcome of one patch attempt. Never revised once appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub patch_id: String,
    pub passed: bool,
    pub tests_before: usize,
    pub tests_after: usize,
    pub tests_fixed: usize,
    /// New failures introduced by the patch
    pub tests_regressed: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    pub deterministic: bool,
    #[serde(default)]
    pub mode: ValidationMode,
}

/// Durable record of an accepted patch joined with the failure it targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub failure_id: String,
    pub patch_id: String,
    pub failure_type: FailureType,
    pub file_path: PathBuf,
    #[serde(default)]
    pub line_number: Option<u32>,
    pub description: String,
    pub patch_type: PatchType,
    pub diff: String,
    pub original_code: String,
    pub patched_code: String,
    pub validated: bool,
}

impl Fix {
    pub fn from_accepted(patch: &Patch, failure: &Failure) -> Self {
        Self {
            failure_id: failure.failure_id.clone(),
            patch_id: patch.patch_id.clone(),
            failure_type: failure.failure_type,
            file_path: patch.file_path.clone(),
            line_number: failure.line_number,
            description: patch.reasoning.clone(),
            patch_type: patch.patch_type,
            diff: patch.diff.clone(),
            original_code: patch.original_code.clone(),
            patched_code: patch.patched_code.clone(),
            validated: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimelineEventType {
    PatchAccepted,
    PatchRejected,
    Validation,
    BackendFailure,
    Scoring,
}

/// Audit log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub iteration: u32,
    pub event_type: TimelineEventType,
    pub description: String,
    #[serde(default)]
    pub failures_before: usize,
    #[serde(default)]
    pub failures_after: usize,
    #[serde(default)]
    pub duration_seconds: f64,
    pub recorded_at: DateTime<Utc>,
}

impl TimelineEvent {
    pub fn new(iteration: u32, event_type: TimelineEventType, description: impl Into<String>) -> Self {
        Self {
            iteration,
            event_type,
            description: description.into(),
            failures_before: 0,
            failures_after: 0,
            duration_seconds: 0.0,
            recorded_at: Utc::now(),
        }
    }

    pub fn with_counts(mut self, before: usize, after: usize) -> Self {
        self.failures_before = before;
        self.failures_after = after;
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = seconds;
        self
    }
}

/// Final score for a session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scoring {
    pub base_score: f64,
    pub fix_efficiency: f64,
    pub speed_factor: f64,
    pub speed_bonus: f64,
    pub regression_penalty: f64,
    pub ci_success_score: f64,
    pub total_score: f64,
    pub iterations_used: u32,
    pub max_iterations: u32,
    pub total_possible_fixes: usize,
    pub actual_fixes: usize,
    pub total_regressions: usize,
    pub computation_method: String,
}

fn default_max_retries() -> u32 {
    5
}

fn default_iteration() -> u32 {
    1
}

/// Everything known about one repair session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub run_id: String,
    pub repo_path: PathBuf,
    #[serde(default)]
    pub language: Option<RepoLanguage>,
    #[serde(default)]
    pub failures: Vec<Failure>,
    #[serde(default)]
    pub patches: Vec<Patch>,
    #[serde(default)]
    pub fixes: Vec<Fix>,
    #[serde(default)]
    pub validation_results: Vec<ValidationResult>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
    #[serde(default = "default_iteration")]
    pub iteration: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Exit signal of the most recent suite run observed before this stage
    #[serde(default)]
    pub last_exit: Option<ExitSignal>,
    #[serde(default)]
    pub fatal_error: bool,
    #[serde(default)]
    pub ci_status: CiStatus,
    #[serde(default)]
    pub scoring: Option<Scoring>,
}

impl SessionState {
    pub fn new(run_id: impl Into<String>, repo_path: impl AsRef<Path>) -> Self {
        Self {
            run_id: run_id.into(),
            repo_path: repo_path.as_ref().to_path_buf(),
            language: None,
            failures: Vec::new(),
            patches: Vec::new(),
            fixes: Vec::new(),
            validation_results: Vec::new(),
            timeline: Vec::new(),
            iteration: default_iteration(),
            max_retries: default_max_retries(),
            last_exit: None,
            fatal_error: false,
            ci_status: CiStatus::default(),
            scoring: None,
        }
    }

    /// Failures that no accepted fix resolves yet.
    pub fn unresolved_failures(&self) -> usize {
        let fixed: HashSet<&str> = self
            .fixes
            .iter()
            .map(|fix| fix.failure_id.as_str())
            .collect();
        self.failures
            .iter()
            .filter(|f| !fixed.contains(f.failure_id.as_str()))
            .count()
    }

    /// Sum of `tests_fixed` already claimed by accepted results.
    pub fn claimed_fixes(&self) -> usize {
        self.validation_results
            .iter()
            .filter(|r| r.passed)
            .map(|r| r.tests_fixed)
            .sum()
    }

    /// Resolve a patch path against the repository root.
    ///
    /// Absolute paths are accepted only when they already point into
    /// `repo_path`; anything that would leave the repository is refused.
    pub fn resolve(&self, file_path: &Path) -> EngineResult<PathBuf> {
        let relative = if file_path.is_absolute() {
            file_path.strip_prefix(&self.repo_path).unwrap_or(file_path)
        } else {
            file_path
        };
        resolve_repo_path_allow_new(&self.repo_path, relative)
            .map(|resolved| resolved.absolute)
            .map_err(|message| EngineError::InvalidPath {
                path: file_path.to_path_buf(),
                message,
            })
    }

    pub fn language(&self) -> RepoLanguage {
        self.language
            .unwrap_or_else(|| RepoLanguage::detect(&self.repo_path))
    }
}
