//! External tool invocation (slide renderer, video encoder).
//!
//! Stages never spawn processes themselves. They call
//! [`ExternalToolInvoker::run`], which hands a [`ToolInvocation`] to a
//! [`ProcessRunner`] and maps the outcome onto [`ToolOutput`] or a typed
//! [`ExternalToolFailure`]. The invoker does not retry.
//!
//! Platform differences live in the runner implementations:
//! [`DirectRunner`] executes the program as-is, [`ShellShimRunner`] routes it
//! through `cmd /C` so npm-style `.cmd` shims (the usual Windows install of
//! Marp) resolve. [`platform_runner`] picks one at compile time.

use crate::error::PipelineError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Maximum characters of combined stdout/stderr kept in a failure.
const MAX_CAPTURED_OUTPUT: usize = 4000;

/// Everything needed to start one external process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl ToolInvocation {
    /// The command line as a single string, for logs.
    pub fn render(&self) -> String {
        let mut s = self.program.display().to_string();
        for arg in &self.args {
            s.push(' ');
            if arg.contains(' ') {
                s.push_str(&format!("\"{arg}\""));
            } else {
                s.push_str(arg);
            }
        }
        s
    }
}

/// What a runner observed. `exit_code` is `None` when the process was
/// terminated by a signal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Why a runner could not produce a [`RawOutput`].
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error("failed to start: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),
}

/// Starts processes. Implementations encapsulate OS-specific launching.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(&self, invocation: &ToolInvocation) -> Result<RawOutput, RunnerError>;
}

/// Runs the program directly, without a shell.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectRunner;

#[async_trait]
impl ProcessRunner for DirectRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<RawOutput, RunnerError> {
        let mut command = tokio::process::Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(ref dir) = invocation.cwd {
            command.current_dir(dir);
        }

        let child = command.spawn()?;
        // Dropping the future on timeout drops the child, which kills it.
        match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await {
            Ok(output) => {
                let output = output?;
                Ok(RawOutput {
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                })
            }
            Err(_) => Err(RunnerError::TimedOut(invocation.timeout)),
        }
    }
}

/// Runs the program through `cmd /C`, for Windows batch shims.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShellShimRunner;

impl ShellShimRunner {
    /// Rewrite an invocation so that `cmd` launches the original program.
    pub fn wrap(invocation: &ToolInvocation) -> ToolInvocation {
        let mut args = Vec::with_capacity(invocation.args.len() + 2);
        args.push("/C".to_string());
        args.push(invocation.program.display().to_string());
        args.extend(invocation.args.iter().cloned());
        ToolInvocation {
            program: PathBuf::from("cmd"),
            args,
            ..invocation.clone()
        }
    }
}

#[async_trait]
impl ProcessRunner for ShellShimRunner {
    async fn run(&self, invocation: &ToolInvocation) -> Result<RawOutput, RunnerError> {
        DirectRunner.run(&Self::wrap(invocation)).await
    }
}

/// The runner appropriate for the target platform.
pub fn platform_runner() -> Arc<dyn ProcessRunner> {
    #[cfg(windows)]
    {
        Arc::new(ShellShimRunner)
    }
    #[cfg(not(windows))]
    {
        Arc::new(DirectRunner)
    }
}

/// Successful result of a tool run (exit code 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A tool that exited non-zero, timed out, or never started.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{tool} failed (exit code {exit_code:?}): {output}")]
pub struct ExternalToolFailure {
    pub tool: String,
    pub exit_code: Option<i32>,
    pub output: String,
}

impl From<ExternalToolFailure> for PipelineError {
    fn from(f: ExternalToolFailure) -> Self {
        PipelineError::ExternalToolFailure {
            tool: f.tool,
            exit_code: f.exit_code,
            output: f.output,
        }
    }
}

/// Runs external executables and reports failures as values.
#[derive(Clone)]
pub struct ExternalToolInvoker {
    runner: Arc<dyn ProcessRunner>,
    timeout: Duration,
}

impl ExternalToolInvoker {
    pub fn new(runner: Arc<dyn ProcessRunner>, timeout: Duration) -> Self {
        Self { runner, timeout }
    }

    /// Invoker using [`platform_runner`].
    pub fn for_platform(timeout: Duration) -> Self {
        Self::new(platform_runner(), timeout)
    }

    /// Run `executable` with `args` and extra environment variables.
    pub async fn run(
        &self,
        tool: &str,
        executable: &Path,
        args: &[String],
        env: &[(String, String)],
    ) -> Result<ToolOutput, ExternalToolFailure> {
        self.run_in(tool, executable, args, env, None).await
    }

    /// Like [`run`](Self::run) with an explicit working directory.
    pub async fn run_in(
        &self,
        tool: &str,
        executable: &Path,
        args: &[String],
        env: &[(String, String)],
        cwd: Option<&Path>,
    ) -> Result<ToolOutput, ExternalToolFailure> {
        let invocation = ToolInvocation {
            program: executable.to_path_buf(),
            args: args.to_vec(),
            env: env.to_vec(),
            cwd: cwd.map(Path::to_path_buf),
            timeout: self.timeout,
        };
        debug!(tool, "running: {}", invocation.render());

        match self.runner.run(&invocation).await {
            Ok(raw) if raw.exit_code == Some(0) => Ok(ToolOutput {
                exit_code: 0,
                stdout: raw.stdout,
                stderr: raw.stderr,
            }),
            Ok(raw) => {
                warn!(tool, exit_code = ?raw.exit_code, "external tool failed");
                Err(ExternalToolFailure {
                    tool: tool.to_string(),
                    exit_code: raw.exit_code,
                    output: captured_output(&raw.stdout, &raw.stderr),
                })
            }
            Err(e) => {
                warn!(tool, "external tool did not complete: {}", e);
                Err(ExternalToolFailure {
                    tool: tool.to_string(),
                    exit_code: None,
                    output: format!("{}: {}", invocation.render(), e),
                })
            }
        }
    }
}

/// Combine stdout and stderr, keeping the tail when the output is long.
fn captured_output(stdout: &str, stderr: &str) -> String {
    let combined = match (stdout.trim(), stderr.trim()) {
        ("", err) => err.to_string(),
        (out, "") => out.to_string(),
        (out, err) => format!("{out}\n{err}"),
    };
    let count = combined.chars().count();
    if count <= MAX_CAPTURED_OUTPUT {
        combined
    } else {
        let tail: String = combined.chars().skip(count - MAX_CAPTURED_OUTPUT).collect();
        format!("\u{2026}{tail}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FixedRunner {
        result: Mutex<Option<Result<RawOutput, RunnerError>>>,
    }

    #[async_trait]
    impl ProcessRunner for FixedRunner {
        async fn run(&self, _invocation: &ToolInvocation) -> Result<RawOutput, RunnerError> {
            self.result.lock().unwrap().take().expect("single use")
        }
    }

    fn invoker(result: Result<RawOutput, RunnerError>) -> ExternalToolInvoker {
        ExternalToolInvoker::new(
            Arc::new(FixedRunner {
                result: Mutex::new(Some(result)),
            }),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn zero_exit_is_success() {
        let inv = invoker(Ok(RawOutput {
            exit_code: Some(0),
            stdout: "done".into(),
            stderr: String::new(),
        }));
        let out = inv.run("marp", Path::new("marp"), &[], &[]).await.unwrap();
        assert_eq!(out.stdout, "done");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported_with_output() {
        let inv = invoker(Ok(RawOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "[ERROR] boom".into(),
        }));
        let err = inv.run("marp", Path::new("marp"), &[], &[]).await.unwrap_err();
        assert_eq!(err.exit_code, Some(1));
        assert_eq!(err.tool, "marp");
        assert!(err.output.contains("boom"));
    }

    #[tokio::test]
    async fn timeout_has_no_exit_code() {
        let inv = invoker(Err(RunnerError::TimedOut(Duration::from_secs(3))));
        let err = inv.run("ffmpeg", Path::new("ffmpeg"), &[], &[]).await.unwrap_err();
        assert_eq!(err.exit_code, None);
        assert!(err.output.contains("timed out after 3s"));
    }

    #[test]
    fn shell_shim_wraps_program_and_args() {
        let inv = ToolInvocation {
            program: PathBuf::from("marp.cmd"),
            args: vec!["deck.md".into(), "--images".into(), "png".into()],
            env: vec![],
            cwd: None,
            timeout: Duration::from_secs(1),
        };
        let wrapped = ShellShimRunner::wrap(&inv);
        assert_eq!(wrapped.program, PathBuf::from("cmd"));
        assert_eq!(wrapped.args, vec!["/C", "marp.cmd", "deck.md", "--images", "png"]);
    }

    #[test]
    fn long_output_keeps_the_tail() {
        let long = "x".repeat(MAX_CAPTURED_OUTPUT + 10) + "END";
        let captured = captured_output("", &long);
        assert!(captured.ends_with("END"));
        assert!(captured.starts_with('\u{2026}'));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn direct_runner_reports_missing_program() {
        let inv = ExternalToolInvoker::new(Arc::new(DirectRunner), Duration::from_secs(5));
        let err = inv
            .run("renderer", Path::new("/definitely/not/a/binary"), &[], &[])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code, None);
        assert!(err.output.contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn direct_runner_captures_exit_code() {
        let inv = ExternalToolInvoker::new(Arc::new(DirectRunner), Duration::from_secs(5));
        let err = inv
            .run("sh", Path::new("sh"), &["-c".into(), "echo oops >&2; exit 3".into()], &[])
            .await
            .unwrap_err();
        assert_eq!(err.exit_code, Some(3));
        assert!(err.output.contains("oops"));
    }
}
