//! In-crate scripted runner for unit tests.

use super::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use ffuforge_shared::errors::FfuResult;
use parking_lot::Mutex;

/// Answers each command with the output of the first rule whose needle
/// occurs in the command line; unmatched commands succeed with no output.
#[derive(Default)]
pub(crate) struct RuleRunner {
    rules: Mutex<Vec<(String, CommandOutput)>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl RuleRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on(self, needle: &str, output: CommandOutput) -> Self {
        self.rules.lock().push((needle.to_string(), output));
        self
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Command lines (plus stdin) of every call, in order.
    pub(crate) fn lines(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|spec| match &spec.stdin {
                Some(input) => format!("{} <<{}", spec.display_line(), input),
                None => spec.display_line(),
            })
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RuleRunner {
    async fn run(&self, spec: CommandSpec) -> FfuResult<CommandOutput> {
        let line = match &spec.stdin {
            Some(input) => format!("{} {}", spec.display_line(), input),
            None => spec.display_line(),
        };
        self.calls.lock().push(spec);
        let rules = self.rules.lock();
        let output = rules
            .iter()
            .find(|(needle, _)| line.contains(needle.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_else(|| CommandOutput::success(""));
        Ok(output)
    }
}
