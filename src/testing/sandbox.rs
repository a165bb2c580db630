use crate::config::SandboxConfig;
use crate::error::{EngineError, EngineResult};
use crate::util::{run_command_with_timeout, CommandRunResult};
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Exit code `docker run` uses when the daemon itself failed.
const DOCKER_DAEMON_ERROR: i32 = 125;
const CONTAINER_REPO_DIR: &str = "/repo";

/// A test-suite invocation, independent of where it runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl SuiteCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.args = args.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn label(&self) -> String {
        format!("{} {}", self.program, self.args.join(" "))
            .trim()
            .to_string()
    }

    fn local(&self, repo_path: &Path) -> Command {
        let mut command = Command::new(&self.program);
        command.current_dir(repo_path).args(&self.args);
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command
    }

    /// `docker run` arguments that execute this command against a read-only
    /// mount of the repository.
    fn docker_args(&self, repo_path: &Path, sandbox: &SandboxConfig, image: &str, name: &str) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--name".to_string(),
            name.to_string(),
            "-v".to_string(),
            format!("{}:{}:ro", repo_path.display(), CONTAINER_REPO_DIR),
            "-w".to_string(),
            CONTAINER_REPO_DIR.to_string(),
            "--memory".to_string(),
            sandbox.memory_limit.clone(),
            "--cpus".to_string(),
            sandbox.cpus.clone(),
        ];
        for (key, value) in &self.env {
            args.push("-e".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(image.to_string());
        args.push(self.program.clone());
        args.extend(self.args.iter().cloned());
        args
    }
}

/// Run `command` for `repo_path`, inside a container when one is configured.
///
/// If the container cannot be started at all the suite runs locally instead.
/// An error is returned only when no process could be started either way.
pub(super) fn execute(
    backend: &str,
    command: &SuiteCommand,
    repo_path: &Path,
    sandbox: &SandboxConfig,
) -> EngineResult<CommandRunResult> {
    if let Some(image) = sandbox.docker_image.as_deref() {
        match execute_in_docker(command, repo_path, sandbox, image) {
            Ok(result) => return Ok(result),
            Err(reason) => {
                tracing::warn!(
                    backend,
                    image,
                    reason = %reason,
                    "docker sandbox unavailable, falling back to local run"
                );
            }
        }
    }

    let mut local = command.local(repo_path);
    run_command_with_timeout(&mut local, sandbox.timeout())
        .map_err(|e| EngineError::backend(backend, format!("{}: {}", command.label(), e)))
}

fn execute_in_docker(
    command: &SuiteCommand,
    repo_path: &Path,
    sandbox: &SandboxConfig,
    image: &str,
) -> Result<CommandRunResult, String> {
    let repo_path = repo_path
        .canonicalize()
        .map_err(|e| format!("failed to resolve repo path: {}", e))?;
    let name = format!("suture-{}", uuid::Uuid::new_v4().simple());
    let mut docker = Command::new("docker");
    docker.args(command.docker_args(&repo_path, sandbox, image, &name));

    let result = run_command_with_timeout(&mut docker, sandbox.timeout())
        .map_err(|e| format!("failed to start docker: {}", e))?;

    if result.timed_out {
        // Killing the client does not stop the container.
        let mut cleanup = Command::new("docker");
        cleanup.args(["rm", "-f", &name]);
        let _ = run_command_with_timeout(&mut cleanup, Duration::from_secs(15));
    }
    if result.exit_code() == Some(DOCKER_DAEMON_ERROR) {
        return Err(crate::util::truncate(result.stderr.trim(), 300));
    }
    Ok(result)
}
