//! Configuration management for suture
//!
//! Settings live in `~/.config/suture/config.toml` (or a path given on the
//! command line). Every numeric knob can be overridden through a
//! `SUTURE_*` environment variable, which takes precedence over the file.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "suture";
const CONFIG_FILE_NAME: &str = "config.toml";

/// Constants of the scoring formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base: f64,
    pub per_fix: f64,
    pub speed_factor: f64,
    pub regression_penalty: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base: 50.0,
            per_fix: 10.0,
            speed_factor: 1.0,
            regression_penalty: 5.0,
        }
    }
}

/// Limits applied to every test-suite invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub timeout_secs: u64,
    /// Run the suite inside this container image; `None` runs it locally
    pub docker_image: Option<String>,
    pub memory_limit: String,
    pub cpus: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            docker_image: None,
            memory_limit: "512m".to_string(),
            cpus: "1.0".to_string(),
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Re-run the suite for accepted patches and reject on differing outcomes
    pub verify_determinism: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub results_dir: PathBuf,
    pub scoring: ScoringConfig,
    pub sandbox: SandboxConfig,
    pub validation: ValidationConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            results_dir: PathBuf::from("results"),
            scoring: ScoringConfig::default(),
            sandbox: SandboxConfig::default(),
            validation: ValidationConfig::default(),
        }
    }
}

impl Settings {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load settings from `path` (or the default location), then apply
    /// environment overrides.
    ///
    /// A missing file yields defaults. A file that fails to parse is moved
    /// aside to `config.toml.corrupt` and defaults are used instead.
    pub fn load(path: Option<&Path>) -> EngineResult<Self> {
        let path = path.map(Path::to_path_buf).or_else(Self::default_path);
        let mut settings = match path {
            Some(path) => Self::load_file(&path)?,
            None => Self::default(),
        };
        settings.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    fn load_file(path: &Path) -> EngineResult<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err.into()),
        };
        match toml::from_str(&content) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                preserve_corrupt_config(path, &content);
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Ok(Self::default())
            }
        }
    }

    /// Apply `SUTURE_*` overrides using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> EngineResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("SUTURE_SCORE_BASE") {
            self.scoring.base = parse_env("SUTURE_SCORE_BASE", &v)?;
        }
        if let Some(v) = lookup("SUTURE_SCORE_PER_FIX") {
            self.scoring.per_fix = parse_env("SUTURE_SCORE_PER_FIX", &v)?;
        }
        if let Some(v) = lookup("SUTURE_SCORE_SPEED_FACTOR") {
            self.scoring.speed_factor = parse_env("SUTURE_SCORE_SPEED_FACTOR", &v)?;
        }
        if let Some(v) = lookup("SUTURE_SCORE_REGRESSION_PENALTY") {
            self.scoring.regression_penalty = parse_env("SUTURE_SCORE_REGRESSION_PENALTY", &v)?;
        }
        if let Some(v) = lookup("SUTURE_SANDBOX_TIMEOUT_SECS") {
            self.sandbox.timeout_secs = parse_env("SUTURE_SANDBOX_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("SUTURE_SANDBOX_IMAGE") {
            let image = v.trim();
            self.sandbox.docker_image = (!image.is_empty()).then(|| image.to_string());
        }
        if let Some(v) = lookup("SUTURE_SANDBOX_MEMORY") {
            self.sandbox.memory_limit = v.trim().to_string();
        }
        if let Some(v) = lookup("SUTURE_SANDBOX_CPUS") {
            self.sandbox.cpus = v.trim().to_string();
        }
        if let Some(v) = lookup("SUTURE_VERIFY_DETERMINISM") {
            self.validation.verify_determinism = parse_bool("SUTURE_VERIFY_DETERMINISM", &v)?;
        }
        if let Some(v) = lookup("SUTURE_RESULTS_DIR") {
            self.results_dir = PathBuf::from(v.trim());
        }
        Ok(())
    }

    /// Write settings to `path` atomically
    pub fn save(&self, path: &Path) -> EngineResult<()> {
        let content =
            toml::to_string_pretty(self).map_err(|e| EngineError::Config(e.to_string()))?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        crate::safe_apply::write_atomic(path, &content)?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> EngineResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| EngineError::Config(format!("{}={:?}: {}", key, value, e)))
}

fn parse_bool(key: &str, value: &str) -> EngineResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(EngineError::Config(format!(
            "{}={:?}: expected a boolean",
            key, other
        ))),
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_settings_default() {
        let settings = Settings::default();
        assert_eq!(settings.scoring.base, 50.0);
        assert_eq!(settings.sandbox.timeout_secs, 120);
        assert!(settings.sandbox.docker_image.is_none());
        assert!(!settings.validation.verify_determinism);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scoring]\nper_fix = 7.5\n").unwrap();
        let settings = Settings::load_file(&path).unwrap();
        assert_eq!(settings.scoring.per_fix, 7.5);
        assert_eq!(settings.scoring.base, 50.0);
        assert_eq!(settings.results_dir, PathBuf::from("results"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load_file(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_corrupt_file_is_preserved() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[scoring\nbase = ").unwrap();
        let settings = Settings::load_file(&path).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(!path.exists());
        assert!(dir.path().join("config.toml.corrupt").exists());
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SUTURE_SCORE_BASE", "10"),
            ("SUTURE_SANDBOX_IMAGE", "python:3.11-slim"),
            ("SUTURE_VERIFY_DETERMINISM", "yes"),
        ]);
        let mut settings = Settings::default();
        settings
            .apply_env_overrides(|key| env.get(key).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(settings.scoring.base, 10.0);
        assert_eq!(
            settings.sandbox.docker_image.as_deref(),
            Some("python:3.11-slim")
        );
        assert!(settings.validation.verify_determinism);
    }

    #[test]
    fn test_invalid_env_override_is_an_error() {
        let mut settings = Settings::default();
        let err = settings
            .apply_env_overrides(|key| (key == "SUTURE_SCORE_PER_FIX").then(|| "lots".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("SUTURE_SCORE_PER_FIX"));
    }

    #[test]
    fn test_save_round_trips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut settings = Settings::default();
        settings.scoring.regression_penalty = 2.5;
        settings.save(&path).unwrap();
        assert_eq!(Settings::load_file(&path).unwrap(), settings);
    }
}
