//! Scripted command runner
//!
//! Deterministic `CommandRunner` used by tests and dry runs. Commands are
//! matched against substring rules; the first matching rule decides the
//! outcome, and unmatched commands succeed with empty output.

use crate::executor::error::ExecutionError;
use crate::executor::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

/// Outcome of a scripted command
#[derive(Debug, Clone)]
pub enum Script {
    /// Succeed with the given stdout
    Succeed(String),
    /// Fail with the given message
    Fail(String),
    /// Fail the first `n` invocations, then succeed
    FailTimes(u32, String),
    /// Sleep, then succeed with empty output
    Delay(Duration),
}

struct Rule {
    pattern: String,
    script: Script,
    hits: u32,
}

/// Command runner that follows pre-registered scripts
#[derive(Default)]
pub struct ScriptedCommandRunner {
    rules: Mutex<Vec<Rule>>,
    invocations: Mutex<Vec<String>>,
}

impl ScriptedCommandRunner {
    /// Runner where every command succeeds
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a rule for commands containing `pattern`
    pub fn on(self, pattern: impl Into<String>, script: Script) -> Self {
        self.rules
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Rule {
                pattern: pattern.into(),
                script,
                hits: 0,
            });
        self
    }

    /// Commands run so far, in order
    pub fn invocations(&self) -> Vec<String> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_script(&self, command: &str) -> Option<(Script, u32)> {
        let mut rules = self.rules.lock().unwrap_or_else(|e| e.into_inner());
        rules
            .iter_mut()
            .find(|rule| command.contains(&rule.pattern))
            .map(|rule| {
                rule.hits += 1;
                (rule.script.clone(), rule.hits)
            })
    }
}

#[async_trait]
impl CommandRunner for ScriptedCommandRunner {
    async fn run(
        &self,
        command: &str,
        _env: &HashMap<String, String>,
    ) -> Result<CommandOutput, ExecutionError> {
        self.invocations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(command.to_string());

        match self.next_script(command) {
            None => Ok(CommandOutput::default()),
            Some((Script::Succeed(out), _)) => Ok(CommandOutput::stdout(out)),
            Some((Script::Fail(msg), _)) => Err(ExecutionError::ProcessFailed(msg)),
            Some((Script::FailTimes(n, msg), hit)) => {
                if hit <= n {
                    Err(ExecutionError::ProcessFailed(msg))
                } else {
                    Ok(CommandOutput::default())
                }
            }
            Some((Script::Delay(duration), _)) => {
                tokio::time::sleep(duration).await;
                Ok(CommandOutput::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unmatched_command_succeeds() {
        let runner = ScriptedCommandRunner::new();
        let output = runner.run("npm ci", &HashMap::new()).await.unwrap();
        assert!(output.stdout.is_empty());
        assert_eq!(runner.invocations(), vec!["npm ci".to_string()]);
    }

    #[tokio::test]
    async fn test_fail_times_then_succeed() {
        let runner = ScriptedCommandRunner::new().on("flaky", Script::FailTimes(2, "nope".into()));
        let env = HashMap::new();
        assert!(runner.run("flaky test", &env).await.is_err());
        assert!(runner.run("flaky test", &env).await.is_err());
        assert!(runner.run("flaky test", &env).await.is_ok());
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let runner = ScriptedCommandRunner::new()
            .on("deploy", Script::Fail("denied".into()))
            .on("deploy --prod", Script::Succeed("ok".into()));
        let result = runner.run("deploy --prod", &HashMap::new()).await;
        assert!(matches!(result, Err(ExecutionError::ProcessFailed(m)) if m == "denied"));
    }
}
