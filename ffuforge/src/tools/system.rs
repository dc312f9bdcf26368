//! Runner backed by real OS processes.

use super::log_stream::{Stream, spawn_reader};
use super::{ChildTracker, CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use ffuforge_shared::errors::{FfuError, FfuResult};
use std::process::Stdio;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Spawns commands as child processes.
///
/// Children are killed when their future is dropped (task abort) or when
/// they exceed the spec's timeout. PIDs are published to a [`ChildTracker`]
/// for the controller's grace-period kill.
#[derive(Clone, Default)]
pub struct SystemRunner {
    tracker: ChildTracker,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tracker(tracker: ChildTracker) -> Self {
        Self { tracker }
    }

    pub fn tracker(&self) -> &ChildTracker {
        &self.tracker
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: CommandSpec) -> FfuResult<CommandOutput> {
        let tool = spec.tool_name().to_string();
        tracing::debug!(command = %spec.display_line(), timeout = ?spec.timeout, "Running external command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.working_dir {
            command.current_dir(dir);
        }
        // Own process group, so a tree kill reaches grandchildren.
        #[cfg(unix)]
        command.process_group(0);

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| FfuError::ExternalTool {
            tool: tool.clone(),
            code: None,
            detail: format!("failed to start: {}", e),
        })?;
        let pid = child.id();
        if let Some(pid) = pid {
            self.tracker.insert(pid);
        }

        if let (Some(input), Some(mut stdin)) = (spec.stdin.as_ref(), child.stdin.take()) {
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                if let Some(pid) = pid {
                    self.tracker.remove(pid);
                }
                return Err(FfuError::ExternalTool {
                    tool,
                    code: None,
                    detail: format!("failed to write stdin: {}", e),
                });
            }
            // Closing stdin lets script-driven tools (diskpart) exit.
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .map(|out| spawn_reader(out, tool.clone(), Stream::Stdout));
        let stderr = child
            .stderr
            .take()
            .map(|err| spawn_reader(err, tool.clone(), Stream::Stderr));

        let waited = tokio::time::timeout(spec.timeout, child.wait()).await;
        if let Some(pid) = pid {
            self.tracker.remove(pid);
        }

        let status = match waited {
            Ok(status) => status.map_err(|e| FfuError::ExternalTool {
                tool: tool.clone(),
                code: None,
                detail: format!("failed to wait for process: {}", e),
            })?,
            Err(_) => {
                if let Some(pid) = pid {
                    let killed = tokio::task::spawn_blocking(move || {
                        crate::util::kill_process_tree(pid)
                    })
                    .await
                    .unwrap_or(false);
                    if !killed {
                        tracing::warn!(tool = %tool, pid, "Failed to kill process tree");
                    }
                }
                if let Err(e) = child.kill().await {
                    tracing::warn!(tool = %tool, "Failed to kill timed out process: {}", e);
                }
                return Err(FfuError::timeout(spec.display_line(), started.elapsed()));
            }
        };

        let stdout = match stdout {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };
        let stderr = match stderr {
            Some(handle) => handle.await.unwrap_or_default(),
            None => String::new(),
        };

        tracing::debug!(
            tool = %tool,
            code = ?status.code(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "External command finished"
        );

        Ok(CommandOutput {
            code: status.code(),
            stdout,
            stderr,
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_runs_command_and_captures_output() {
        let runner = SystemRunner::new();
        let out = runner
            .run(CommandSpec::new("sh", Duration::from_secs(10)).args(["-c", "echo hello; echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert_eq!(out.code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");
        assert_eq!(out.stderr.trim(), "oops");
        assert!(runner.tracker().snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let runner = SystemRunner::new();
        let out = runner
            .run(CommandSpec::new("cat", Duration::from_secs(10)).stdin("select disk 1\n"))
            .await
            .unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout, "select disk 1\n");
    }

    #[tokio::test]
    async fn test_timeout_kills_child() {
        let runner = SystemRunner::new();
        let err = runner
            .run(CommandSpec::new("sleep", Duration::from_millis(100)).arg("30"))
            .await
            .unwrap_err();
        assert!(matches!(err, FfuError::OperationTimeout { .. }));
        assert!(runner.tracker().snapshot().is_empty());
    }

    #[cfg(target_os = "linux")]
    fn is_gone(pid: u32) -> bool {
        // zombies count: only an unreaped exit status is left
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .is_some_and(|(_, rest)| rest.trim_start().starts_with('Z')),
            Err(_) => true,
        }
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_timeout_kills_grandchildren() {
        let dir = tempfile::TempDir::new().unwrap();
        let pid_file = dir.path().join("grandchild.pid");
        let script = format!("sleep 30 & echo $! > {}; wait", pid_file.display());

        let runner = SystemRunner::new();
        let err = runner
            .run(CommandSpec::new("sh", Duration::from_millis(300)).args(["-c", &script]))
            .await
            .unwrap_err();
        assert!(matches!(err, FfuError::OperationTimeout { .. }));

        let pid: u32 = std::fs::read_to_string(&pid_file).unwrap().trim().parse().unwrap();
        let mut gone = false;
        for _ in 0..50 {
            if is_gone(pid) {
                gone = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(gone, "grandchild {pid} survived the timeout");
    }

    #[tokio::test]
    async fn test_missing_program_is_tool_error() {
        let runner = SystemRunner::new();
        let err = runner
            .run(CommandSpec::new("definitely-not-a-real-tool-ffu", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, FfuError::ExternalTool { code: None, .. }));
        assert!(!err.is_not_found());
    }
}
