//! Provider backed by an external command.
//!
//! Runs `<program> <args...>` once per request, writes the prompt to its
//! stdin and reads the whole of stdout as the response. The default command
//! is `claude -p`, which answers in plain text.

use std::process::Stdio;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use super::trait_def::IntelligenceProvider;
use super::{IntelligenceError, IntelligenceRequest, RequestKind};

/// Default provider program, looked up on `$PATH`.
pub const DEFAULT_PROGRAM: &str = "claude";

/// Provider that shells out to a command for every request.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: String,
    args: Vec<String>,
    name: String,
}

impl CommandProvider {
    /// `claude -p`, found via `$PATH`.
    pub fn new() -> Self {
        Self::with_command(DEFAULT_PROGRAM, ["-p"])
    }

    pub fn with_command<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let program = program.into();
        Self {
            name: format!("command:{program}"),
            program,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Split a shell-style command line on whitespace. No quoting support.
    pub fn from_command_line(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        let program = words.next()?;
        Some(Self::with_command(program, words))
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Default for CommandProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Turn captured stdout into a response value.
///
/// JSON output is passed through as-is; anything else is wrapped as
/// `{"text": ...}` for the parser's text strategies.
fn response_from_stdout(stdout: &[u8]) -> Value {
    let text = String::from_utf8_lossy(stdout);
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => json!({ "text": text }),
    }
}

#[async_trait]
impl IntelligenceProvider for CommandProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn request_intelligence(
        &self,
        kind: RequestKind,
        request: &IntelligenceRequest,
    ) -> Result<Value, IntelligenceError> {
        debug!(program = %self.program, %kind, "spawning provider command");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    IntelligenceError::Unavailable(self.program.clone())
                }
                _ => IntelligenceError::Failed(format!("failed to spawn {}: {e}", self.program)),
            })?;

        let stdin = child.stdin.take();
        let prompt = request.prompt.as_bytes();
        let feed = async move {
            if let Some(mut stdin) = stdin {
                // The child may exit without reading; its exit status decides.
                if let Err(e) = stdin.write_all(prompt).await {
                    debug!(error = %e, "provider closed stdin early");
                }
            }
        };

        let ((), output) = tokio::join!(feed, child.wait_with_output());
        let output = output.map_err(|e| {
            IntelligenceError::Failed(format!("{} did not finish: {e}", self.program))
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            warn!(program = %self.program, status = %output.status, "provider command failed");
            return Err(IntelligenceError::Failed(format!(
                "{} exited with {}: {stderr}",
                self.program, output.status
            )));
        }

        Ok(response_from_stdout(&output.stdout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(prompt: &str) -> IntelligenceRequest {
        IntelligenceRequest::new(prompt)
    }

    #[test]
    fn plain_stdout_is_wrapped_as_text() {
        let value = response_from_stdout(b"Here is a plan\n");
        assert_eq!(value, json!({"text": "Here is a plan\n"}));
    }

    #[test]
    fn json_stdout_passes_through() {
        let value = response_from_stdout(br#"{"branch_tasks": []}"#);
        assert_eq!(value, json!({"branch_tasks": []}));
    }

    #[test]
    fn scalar_json_is_still_wrapped() {
        assert_eq!(response_from_stdout(b"42"), json!({"text": "42"}));
    }

    #[test]
    fn command_line_splits_program_and_args() {
        let provider = CommandProvider::from_command_line("  llm -m  fast ").unwrap();
        assert_eq!(provider.program(), "llm");
        assert_eq!(provider.args, vec!["-m", "fast"]);
        assert_eq!(provider.name(), "command:llm");
        assert!(CommandProvider::from_command_line("   ").is_none());
    }

    #[test]
    fn default_is_claude_print_mode() {
        let provider = CommandProvider::default();
        assert_eq!(provider.program(), "claude");
        assert_eq!(provider.args, vec!["-p"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn prompt_is_written_to_stdin() {
        let provider = CommandProvider::with_command("cat", Vec::<String>::new());
        let value = provider
            .request_intelligence(RequestKind::HtaDecomposition, &request("echo me"))
            .await
            .unwrap();
        assert_eq!(value, json!({"text": "echo me"}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_is_failure_with_stderr() {
        let provider = CommandProvider::with_command("sh", ["-c", "echo boom >&2; exit 3"]);
        let err = provider
            .request_intelligence(RequestKind::HtaDecomposition, &request("x"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, IntelligenceError::Failed(ref msg) if msg.contains("boom")),
            "expected Failed, got: {err}"
        );
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let provider =
            CommandProvider::with_command("forest-test-no-such-binary-7f3a", Vec::<String>::new());
        let err = provider
            .request_intelligence(RequestKind::HtaDecomposition, &request("x"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, IntelligenceError::Unavailable(_)),
            "expected Unavailable, got: {err}"
        );
    }
}
