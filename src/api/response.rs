use crate::storage::{LogMode, SandboxId};
use serde::{Deserialize, Serialize};

/// Body of a command submission
#[derive(Debug, Clone, Deserialize)]
pub struct CommandRequest {
    pub mode: LogMode,
    pub message: String,
}

/// Body returned by a restore request
#[derive(Debug, Clone, Serialize)]
pub struct RestoreResponse {
    pub sandbox_id: SandboxId,
}
