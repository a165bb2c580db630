//! Test suite execution
//!
//! Runs a target repository's whole test suite once and reports structured
//! counts. Which runner is used follows from the session's declared
//! language and never changes within a session.

mod parse;
mod sandbox;

pub use parse::SuiteCounts;
pub use sandbox::SuiteCommand;

use crate::config::SandboxConfig;
use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Language of the repository under test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoLanguage {
    Python,
    Node,
    Java,
}

impl RepoLanguage {
    pub fn name(&self) -> &'static str {
        match self {
            RepoLanguage::Python => "Python",
            RepoLanguage::Node => "Node.js",
            RepoLanguage::Java => "Java",
        }
    }

    /// Detect the language from build files in the repository root.
    ///
    /// Anything unrecognised falls back to Python, the default runner.
    pub fn detect(repo_path: &Path) -> Self {
        if repo_path.join("package.json").exists() {
            RepoLanguage::Node
        } else if repo_path.join("pom.xml").exists()
            || repo_path.join("build.gradle").exists()
            || repo_path.join("build.gradle.kts").exists()
        {
            RepoLanguage::Java
        } else {
            RepoLanguage::Python
        }
    }
}

/// What a suite run's exit status means, independent of the runner's
/// own exit-code conventions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitSignal {
    /// Every collected test passed
    Passed,
    /// The suite ran and at least one test failed
    TestsFailed,
    /// The repository does not parse or compile
    SyntaxError,
    /// The suite exists but collected zero tests
    NoTestsCollected,
    /// The run exceeded its time limit and was killed
    TimedOut,
    /// The runner itself failed (internal error, killed by a signal)
    Crashed,
}

impl ExitSignal {
    /// Whether the suite actually executed tests.
    pub fn executed(&self) -> bool {
        matches!(self, ExitSignal::Passed | ExitSignal::TestsFailed)
    }

    /// Whether the run finished on its own.
    pub fn completed(&self) -> bool {
        !matches!(self, ExitSignal::TimedOut | ExitSignal::Crashed)
    }
}

/// Outcome of a single suite run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResult {
    /// Raw exit code; `None` when the process was killed
    pub exit_code: Option<i32>,
    pub signal: ExitSignal,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
    pub raw_output: String,
    pub duration_seconds: f64,
}

impl TestRunResult {
    /// Failed plus errored tests
    pub fn failures(&self) -> usize {
        self.failed + self.errors
    }

    /// Whether two runs describe the same observable outcome.
    pub fn same_outcome(&self, other: &TestRunResult) -> bool {
        self.signal == other.signal && self.failed == other.failed && self.errors == other.errors
    }
}

/// Runs a repository's test suite once.
pub trait TestBackend {
    fn name(&self) -> &str;

    /// Run the whole suite and report counts.
    ///
    /// A timeout or failing suite is a normal result. An error means no
    /// result could be produced at all.
    fn run_suite(&self) -> EngineResult<TestRunResult>;
}

/// Where and under which limits a suite runs
#[derive(Debug, Clone)]
pub struct SuiteTarget {
    pub repo_path: PathBuf,
    pub sandbox: SandboxConfig,
}

/// The concrete runner for each supported language
#[derive(Debug, Clone)]
pub enum SuiteRunner {
    Pytest(SuiteTarget),
    Node(SuiteTarget),
    Jvm(SuiteTarget),
}

impl SuiteRunner {
    pub fn for_language(language: RepoLanguage, repo_path: &Path, sandbox: &SandboxConfig) -> Self {
        let target = SuiteTarget {
            repo_path: repo_path.to_path_buf(),
            sandbox: sandbox.clone(),
        };
        match language {
            RepoLanguage::Python => SuiteRunner::Pytest(target),
            RepoLanguage::Node => SuiteRunner::Node(target),
            RepoLanguage::Java => SuiteRunner::Jvm(target),
        }
    }

    pub fn language(&self) -> RepoLanguage {
        match self {
            SuiteRunner::Pytest(_) => RepoLanguage::Python,
            SuiteRunner::Node(_) => RepoLanguage::Node,
            SuiteRunner::Jvm(_) => RepoLanguage::Java,
        }
    }

    fn target(&self) -> &SuiteTarget {
        match self {
            SuiteRunner::Pytest(t) | SuiteRunner::Node(t) | SuiteRunner::Jvm(t) => t,
        }
    }

    /// The command this runner executes for the suite.
    pub fn command(&self) -> SuiteCommand {
        match self {
            SuiteRunner::Pytest(_) => SuiteCommand::new("python3")
                .args(&[
                    "-m",
                    "pytest",
                    "-q",
                    "--tb=short",
                    "--no-header",
                    "-p",
                    "no:cacheprovider",
                ])
                .env("PYTHONHASHSEED", "42")
                .env("PYTHONDONTWRITEBYTECODE", "1"),
            SuiteRunner::Node(_) => SuiteCommand::new("npm")
                .args(&["test", "--silent"])
                .env("CI", "true"),
            SuiteRunner::Jvm(t) => jvm_command(&t.repo_path),
        }
    }
}

fn jvm_command(repo_path: &Path) -> SuiteCommand {
    if repo_path.join("pom.xml").exists() {
        return SuiteCommand::new("mvn").args(&["-B", "test"]);
    }
    if repo_path.join("gradlew").exists() {
        return SuiteCommand::new("./gradlew").args(&["test", "--console=plain"]);
    }
    SuiteCommand::new("gradle").args(&["test", "--console=plain"])
}

impl TestBackend for SuiteRunner {
    fn name(&self) -> &str {
        match self {
            SuiteRunner::Pytest(_) => "pytest",
            SuiteRunner::Node(_) => "node",
            SuiteRunner::Jvm(_) => "jvm",
        }
    }

    fn run_suite(&self) -> EngineResult<TestRunResult> {
        let target = self.target();
        let command = self.command();
        tracing::debug!(
            backend = self.name(),
            command = %command.label(),
            repo = %target.repo_path.display(),
            "running test suite"
        );

        let run = sandbox::execute(self.name(), &command, &target.repo_path, &target.sandbox)?;
        let output = run.combined_output();
        let (signal, counts) = match self.language() {
            RepoLanguage::Python => (
                parse::classify_pytest(run.exit_code(), run.timed_out),
                parse::parse_pytest(&output),
            ),
            RepoLanguage::Node => {
                let counts = parse::parse_node(&output);
                (
                    parse::classify_node(run.exit_code(), run.timed_out, &output, &counts),
                    counts,
                )
            }
            RepoLanguage::Java => (
                parse::classify_jvm(run.exit_code(), run.timed_out, &output),
                parse::parse_jvm(&output),
            ),
        };

        let result = TestRunResult {
            exit_code: run.exit_code(),
            signal,
            total: counts.total,
            passed: counts.passed,
            failed: counts.failed,
            errors: counts.errors,
            raw_output: crate::util::tail_chars(&output, RAW_OUTPUT_MAX_CHARS),
            duration_seconds: run.elapsed.as_secs_f64(),
        };
        tracing::info!(
            backend = self.name(),
            signal = ?result.signal,
            passed = result.passed,
            failed = result.failed,
            errors = result.errors,
            seconds = result.duration_seconds,
            "test suite finished"
        );
        Ok(result)
    }
}

const RAW_OUTPUT_MAX_CHARS: usize = 8_000;
