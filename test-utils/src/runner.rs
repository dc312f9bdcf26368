use async_trait::async_trait;
use ffuforge::tools::{CommandOutput, CommandRunner, CommandSpec};
use ffuforge_shared::errors::FfuResult;
use parking_lot::Mutex;

struct Rule {
    needle: String,
    outputs: Vec<CommandOutput>,
    served: usize,
}

/// Command runner answering from scripted rules.
///
/// The first rule whose needle occurs in the command line (or its stdin)
/// answers. A rule serves its outputs in order and repeats the last one;
/// unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, needle: &str, output: CommandOutput) -> Self {
        self.on_sequence(needle, vec![output])
    }

    pub fn on_sequence(self, needle: &str, outputs: Vec<CommandOutput>) -> Self {
        self.rules.lock().push(Rule {
            needle: needle.to_string(),
            outputs,
            served: 0,
        });
        self
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Number of calls whose command line contains `needle`.
    pub fn count(&self, needle: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|spec| command_text(spec).contains(needle))
            .count()
    }
}

fn command_text(spec: &CommandSpec) -> String {
    match &spec.stdin {
        Some(input) => format!("{} {}", spec.display_line(), input),
        None => spec.display_line(),
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: CommandSpec) -> FfuResult<CommandOutput> {
        let text = command_text(&spec);
        self.calls.lock().push(spec);

        let mut rules = self.rules.lock();
        let output = match rules.iter_mut().find(|r| text.contains(r.needle.as_str())) {
            Some(rule) if !rule.outputs.is_empty() => {
                let index = rule.served.min(rule.outputs.len() - 1);
                rule.served += 1;
                rule.outputs[index].clone()
            }
            _ => CommandOutput::success(""),
        };
        Ok(output)
    }
}
