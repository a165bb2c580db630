use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use suture::results::load_session;
use suture::session::CiStatus;
use suture::{
    RepoLanguage, ResultsWriter, ScoringEngine, SessionState, Settings, SuiteRunner, TestBackend,
    ValidationEngine,
};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "suture",
    about = "Validate proposed patches against a repository's test suite and score the session",
    version
)]
struct Cli {
    /// Config file (defaults to ~/.config/suture/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory that receives <run_id>/results.json
    #[arg(long, global = true, env = "SUTURE_RESULTS_DIR")]
    results_dir: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Errors only
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate a session's pending patches, score it and write results
    Run(SessionArgs),
    /// Score a session without running any tests
    Score(SessionArgs),
    /// Run a repository's test suite once and print the result as JSON
    Probe(ProbeArgs),
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Session document produced by the repair process
    #[arg(long)]
    session: PathBuf,

    /// Print the summary without writing results.json
    #[arg(long)]
    no_write: bool,
}

#[derive(Args, Debug)]
struct ProbeArgs {
    #[arg(long, default_value = ".")]
    repo: PathBuf,

    /// Override language detection
    #[arg(long, value_enum)]
    language: Option<LanguageArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LanguageArg {
    Python,
    Node,
    Java,
}

impl From<LanguageArg> for RepoLanguage {
    fn from(arg: LanguageArg) -> Self {
        match arg {
            LanguageArg::Python => RepoLanguage::Python,
            LanguageArg::Node => RepoLanguage::Node,
            LanguageArg::Java => RepoLanguage::Java,
        }
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(dir) = cli.results_dir {
        settings.results_dir = dir;
    }

    match cli.command {
        Commands::Run(args) => {
            let state = read_session(&args.session)?;
            let runner =
                SuiteRunner::for_language(state.language(), &state.repo_path, &settings.sandbox);
            tracing::info!(
                run_id = %state.run_id,
                language = runner.language().name(),
                backend = runner.name(),
                "starting session"
            );
            let state = ValidationEngine::new(&runner, settings.validation.clone()).validate(state);
            let state = ScoringEngine::new(settings.scoring.clone()).score(state);
            finish(&settings, state, args.no_write)
        }
        Commands::Score(args) => {
            let state = read_session(&args.session)?;
            let state = ScoringEngine::new(settings.scoring.clone()).score(state);
            finish(&settings, state, args.no_write)
        }
        Commands::Probe(args) => {
            let language = args
                .language
                .map(RepoLanguage::from)
                .unwrap_or_else(|| RepoLanguage::detect(&args.repo));
            let runner = SuiteRunner::for_language(language, &args.repo, &settings.sandbox);
            let result = runner
                .run_suite()
                .with_context(|| format!("Failed to run test suite in {}", args.repo.display()))?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        LevelFilter::ERROR
    } else if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    // RUST_LOG wins over the flags when set.
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn read_session(path: &Path) -> Result<SessionState> {
    load_session(path).with_context(|| format!("Failed to read session from {}", path.display()))
}

fn finish(settings: &Settings, state: SessionState, no_write: bool) -> Result<ExitCode> {
    let written = if no_write {
        None
    } else {
        let writer = ResultsWriter::new(&settings.results_dir);
        Some(writer.write(&state).context("Failed to write results")?)
    };
    print_summary(&state, written.as_deref());

    Ok(if state.ci_status == CiStatus::Failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_summary(state: &SessionState, written: Option<&Path>) {
    let accepted = state.validation_results.iter().filter(|r| r.passed).count();
    println!("Run {}: {}", state.run_id, state.ci_status);
    println!(
        "  patches: {} accepted of {} attempted",
        accepted,
        state.validation_results.len()
    );
    println!(
        "  failures: {} recorded, {} fixed",
        state.failures.len(),
        state.fixes.len()
    );

    let fixed: Vec<&str> = state.fixes.iter().map(|f| f.failure_id.as_str()).collect();
    let mut remaining: BTreeMap<&str, usize> = BTreeMap::new();
    for failure in &state.failures {
        if !fixed.contains(&failure.failure_id.as_str()) {
            *remaining.entry(failure.failure_type.as_str()).or_default() += 1;
        }
    }
    for (kind, count) in &remaining {
        println!("    unresolved {}: {}", kind, count);
    }

    if let Some(scoring) = &state.scoring {
        println!(
            "  score: {:.2} (efficiency {:.2}, speed {:.2}, penalty {:.1})",
            scoring.total_score,
            scoring.fix_efficiency,
            scoring.speed_factor,
            scoring.regression_penalty
        );
    }
    if state.fatal_error {
        println!("  test backend failed; validation was aborted");
    }
    if let Some(path) = written {
        println!("  results: {}", path.display());
    }
}
