//! Suture library crate
//!
//! Validates candidate patches against a repository's own test suite,
//! keeps only the ones that make measurable progress without regressions,
//! and scores the repair session.

pub mod config;
pub mod error;
pub mod results;
pub mod safe_apply;
pub mod score;
pub mod session;
pub mod testing;
pub mod util;
pub mod validate;

pub use config::Settings;
pub use error::{EngineError, EngineResult};
pub use results::ResultsWriter;
pub use score::ScoringEngine;
pub use session::SessionState;
pub use testing::{RepoLanguage, SuiteRunner, TestBackend, TestRunResult};
pub use validate::ValidationEngine;
