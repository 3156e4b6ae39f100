use super::docker::ExecResult;
use serde::{Deserialize, Serialize};

/// Line the write-output editor hook prints when git opens an editor. Its
/// presence in stdout means the command is now waiting on editor input.
/// This is a fixed contract with the sandbox image.
pub const EDITOR_SENTINEL: &str = "# CREATED_BY_OUTPUT.SH\n";

/// How an executed command turned out, from the caller's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResultKind {
    Success,
    Fail,
    EditorPrompt,
}

/// What the caller gets back for one submitted request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub message: String,
    pub result: ResultKind,
}

/// Classify captured output.
///
/// The editor sentinel wins over everything else, whatever mode was
/// requested: the text before it is the prompt the user must answer. After
/// that, any stderr text marks a failed command (a normal, user-visible
/// outcome), and the remaining case is plain success.
pub fn classify(captured: &ExecResult) -> CommandReply {
    if let Some(at) = captured.stdout.find(EDITOR_SENTINEL) {
        return CommandReply {
            message: captured.stdout[..at].to_string(),
            result: ResultKind::EditorPrompt,
        };
    }

    if !captured.stderr.is_empty() {
        return CommandReply {
            message: captured.stderr.clone(),
            result: ResultKind::Fail,
        };
    }

    CommandReply {
        message: captured.stdout.clone(),
        result: ResultKind::Success,
    }
}
