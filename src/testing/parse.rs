//! Exit-code classification and count extraction for each runner's output.

use super::ExitSignal;
use regex::Regex;
use std::sync::LazyLock;

static PYTEST_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\bin \d+(\.\d+)?s\b").expect("valid pytest summary regex"));
static PYTEST_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) (passed|failed|errors?|skipped|xfailed|xpassed)\b")
        .expect("valid pytest count regex")
});
static NODE_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) (passed|failed|skipped|todo|total)\b").expect("valid node count regex")
});
static VITEST_TOTAL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\((\d+)\)").expect("valid vitest total regex"));
static VITEST_FAILED_SUITES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Failed Suites (\d+)").expect("valid vitest failed suites regex")
});
static SUREFIRE_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests run: (\d+), Failures: (\d+), Errors: (\d+), Skipped: (\d+)")
        .expect("valid surefire regex")
});
static GRADLE_COUNT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\d+) tests? completed, (\d+) failed(?:, (\d+) skipped)?")
        .expect("valid gradle regex")
});

/// Test counts scraped from a runner's output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SuiteCounts {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub errors: usize,
}

fn num(s: &str) -> usize {
    s.parse().unwrap_or(0)
}

/// pytest exit codes: 0 ok, 1 failures, 2 interrupted (collection or
/// syntax errors), 3 internal error, 4 usage error, 5 nothing collected.
pub fn classify_pytest(exit_code: Option<i32>, timed_out: bool) -> ExitSignal {
    if timed_out {
        return ExitSignal::TimedOut;
    }
    match exit_code {
        Some(0) => ExitSignal::Passed,
        Some(1) => ExitSignal::TestsFailed,
        Some(2) | Some(4) => ExitSignal::SyntaxError,
        Some(5) => ExitSignal::NoTestsCollected,
        _ => ExitSignal::Crashed,
    }
}

/// Counts from the last pytest summary line, e.g.
/// `3 failed, 5 passed, 1 error in 0.42s`.
pub fn parse_pytest(output: &str) -> SuiteCounts {
    let Some(line) = output
        .lines()
        .rev()
        .find(|line| PYTEST_SUMMARY.is_match(line) && PYTEST_COUNT.is_match(line))
    else {
        return SuiteCounts::default();
    };

    let mut counts = SuiteCounts::default();
    for cap in PYTEST_COUNT.captures_iter(line) {
        let n = num(&cap[1]);
        match &cap[2] {
            "passed" => counts.passed += n,
            "failed" => counts.failed += n,
            "error" | "errors" => counts.errors += n,
            _ => {}
        }
        counts.total += n;
    }
    counts
}

pub fn classify_node(
    exit_code: Option<i32>,
    timed_out: bool,
    output: &str,
    counts: &SuiteCounts,
) -> ExitSignal {
    if timed_out {
        return ExitSignal::TimedOut;
    }
    let no_tests = output.contains("No tests found")
        || output.contains("No test files found")
        || output.contains("Missing script: \"test\"")
        || output.contains("Error: no test specified");
    if no_tests {
        return ExitSignal::NoTestsCollected;
    }
    match exit_code {
        Some(0) => ExitSignal::Passed,
        // A suite that cannot even load hides every test in it.
        Some(_) if counts.errors > 0 => ExitSignal::SyntaxError,
        Some(_) if counts.total == 0 && output.contains("SyntaxError") => ExitSignal::SyntaxError,
        Some(_) => ExitSignal::TestsFailed,
        None => ExitSignal::Crashed,
    }
}

/// Counts from Jest (`Tests: 1 failed, 4 passed, 5 total`) or Vitest
/// (`Tests  1 failed | 4 passed (5)`) summaries.
///
/// Suites that failed to load are reported as `errors`, one per suite,
/// since their tests never appear in the summary.
pub fn parse_node(output: &str) -> SuiteCounts {
    let mut counts = SuiteCounts::default();
    let mut failed_suites = 0;

    for line in output.lines() {
        let trimmed = line.trim_start();
        if let Some(rest) = trimmed.strip_prefix("Test Suites:") {
            for cap in NODE_COUNT.captures_iter(rest) {
                if &cap[2] == "failed" {
                    failed_suites = num(&cap[1]);
                }
            }
        } else if let Some(rest) = trimmed
            .strip_prefix("Tests:")
            .or_else(|| trimmed.strip_prefix("Tests "))
        {
            let mut line_counts = SuiteCounts::default();
            let mut explicit_total = None;
            for cap in NODE_COUNT.captures_iter(rest) {
                let n = num(&cap[1]);
                match &cap[2] {
                    "passed" => line_counts.passed = n,
                    "failed" => line_counts.failed = n,
                    "total" => explicit_total = Some(n),
                    _ => line_counts.total += n,
                }
            }
            if explicit_total.is_none() {
                explicit_total = VITEST_TOTAL.captures(rest).map(|cap| num(&cap[1]));
            }
            line_counts.total = explicit_total
                .unwrap_or(line_counts.total + line_counts.passed + line_counts.failed);
            counts = line_counts;
        }
    }

    let mut load_failures = output.matches("Test suite failed to run").count();
    if let Some(cap) = VITEST_FAILED_SUITES.captures_iter(output).last() {
        load_failures = load_failures.max(num(&cap[1]));
    }
    // With no test line at all, every failed suite failed to load.
    if counts.total == 0 {
        load_failures = load_failures.max(failed_suites);
    }
    counts.errors = load_failures;
    counts
}

pub fn classify_jvm(exit_code: Option<i32>, timed_out: bool, output: &str) -> ExitSignal {
    if timed_out {
        return ExitSignal::TimedOut;
    }
    let compile_failed = output.contains("COMPILATION ERROR")
        || output.contains("Compilation failed")
        || output.contains("compileJava FAILED")
        || output.contains("compileTestJava FAILED");
    if compile_failed && exit_code != Some(0) {
        return ExitSignal::SyntaxError;
    }
    if output.contains("No tests to run") || output.contains("No tests found") {
        return ExitSignal::NoTestsCollected;
    }
    match exit_code {
        Some(0) => ExitSignal::Passed,
        Some(_) => ExitSignal::TestsFailed,
        None => ExitSignal::Crashed,
    }
}

/// Counts from the last Surefire `Tests run:` line (Maven prints the
/// aggregate last) or Gradle's `N tests completed, F failed`.
pub fn parse_jvm(output: &str) -> SuiteCounts {
    if let Some(cap) = SUREFIRE_COUNT.captures_iter(output).last() {
        let total = num(&cap[1]);
        let failed = num(&cap[2]);
        let errors = num(&cap[3]);
        let skipped = num(&cap[4]);
        return SuiteCounts {
            total,
            passed: total.saturating_sub(failed + errors + skipped),
            failed,
            errors,
        };
    }
    if let Some(cap) = GRADLE_COUNT.captures_iter(output).last() {
        let total = num(&cap[1]);
        let failed = num(&cap[2]);
        let skipped = cap.get(3).map(|m| num(m.as_str())).unwrap_or(0);
        return SuiteCounts {
            total,
            passed: total.saturating_sub(failed + skipped),
            failed,
            errors: 0,
        };
    }
    SuiteCounts::default()
}
