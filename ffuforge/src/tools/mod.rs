//! External command execution.
//!
//! Providers and imaging steps never spawn processes directly; they describe
//! the call as a [`CommandSpec`] and hand it to a [`CommandRunner`]. The
//! production runner is [`SystemRunner`]; tests substitute a scripted one.

#[cfg(test)]
pub(crate) mod fake;
mod log_stream;
mod system;

pub use system::SystemRunner;

use async_trait::async_trait;
use ffuforge_shared::errors::{FfuError, FfuResult};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// One external command invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Text written to the child's stdin (diskpart scripts).
    pub stdin: Option<String>,
    pub working_dir: Option<PathBuf>,
    pub timeout: Duration,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            stdin: None,
            working_dir: None,
            timeout,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Self {
        self.stdin = Some(input.into());
        self
    }

    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// A PowerShell invocation of `script`, non-interactive and profile-free.
    pub fn powershell(script: impl Into<String>, timeout: Duration) -> Self {
        Self::new("powershell.exe", timeout).args([
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-Command".to_string(),
            script.into(),
        ])
    }

    /// Human-readable name of the tool for error messages.
    pub fn tool_name(&self) -> &str {
        self.program
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or(&self.program)
    }

    /// Tool name plus arguments, for logs.
    pub fn display_line(&self) -> String {
        format!("{} {}", self.tool_name(), self.args.join(" "))
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when the process was killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }

    /// Map a nonzero exit into [`FfuError::ExternalTool`].
    pub fn check(self, tool: &str) -> FfuResult<Self> {
        if self.is_success() {
            return Ok(self);
        }
        let detail = if self.stderr.trim().is_empty() {
            self.stdout.trim().to_string()
        } else {
            self.stderr.trim().to_string()
        };
        Err(FfuError::ExternalTool {
            tool: tool.to_string(),
            code: self.code,
            detail,
        })
    }
}

/// Runs external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `spec` to completion.
    ///
    /// Returns `OperationTimeout` if the command exceeds `spec.timeout`
    /// (the child is killed) and `Ok` with a nonzero code on tool failure.
    async fn run(&self, spec: CommandSpec) -> FfuResult<CommandOutput>;
}

/// PIDs of external processes currently running on behalf of a build.
///
/// The controller kills whatever is left here when a worker misses its
/// cancellation grace period.
#[derive(Clone, Default)]
pub struct ChildTracker {
    pids: Arc<Mutex<HashSet<u32>>>,
}

impl ChildTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, pid: u32) {
        self.pids.lock().insert(pid);
    }

    pub(crate) fn remove(&self, pid: u32) {
        self.pids.lock().remove(&pid);
    }

    pub fn snapshot(&self) -> Vec<u32> {
        self.pids.lock().iter().copied().collect()
    }

    /// Kill every tracked process tree. Returns the number killed.
    pub fn kill_all(&self) -> usize {
        let pids: Vec<u32> = self.pids.lock().drain().collect();
        let mut killed = 0;
        for pid in pids {
            if crate::util::kill_process_tree(pid) {
                killed += 1;
            } else {
                tracing::warn!(pid, "Failed to kill external process");
            }
        }
        killed
    }
}
