pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of one sandbox instance. Doubles as the container name, so a
/// runtime lookup by name is a lookup by id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SandboxId(String);

impl SandboxId {
    /// Allocate a fresh identifier. Only the provisioner should call this.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SandboxId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl fmt::Display for SandboxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of a fixed exercise definition. Content is external and
/// read-only; the id addresses seed trees on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExerciseId(pub i64);

impl fmt::Display for ExerciseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Opaque session token, issued and owned by the surrounding system.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

impl From<&str> for SessionId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a logged message was meant to be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogMode {
    /// Executed directly through the restricted shell
    Command,
    /// Text answering the editor prompt raised by the preceding command
    Editor,
}

impl LogMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogMode::Command => "command",
            LogMode::Editor => "editor",
        }
    }
}

impl FromStr for LogMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "command" => Ok(LogMode::Command),
            "editor" => Ok(LogMode::Editor),
            other => Err(anyhow::anyhow!("unknown log mode: {other}")),
        }
    }
}

/// One executed request, immutable once appended. Replaying the sequence in
/// order reproduces the sandbox's command history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub mode: LogMode,
    pub message: String,
}

/// Key of one (session, exercise) binding, the unit of sandbox lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BindingKey {
    pub session: SessionId,
    pub exercise: ExerciseId,
}

/// Persistence boundary for bindings and their command logs.
///
/// Callers serialize writes per key (the dispatcher holds a per-binding
/// lock), so implementations only need atomicity per statement.
#[async_trait]
pub trait SessionStore: Send + Sync + Clone {
    /// Sandbox currently bound to the key, if any.
    async fn sandbox_for(&self, key: &BindingKey) -> Result<Option<SandboxId>>;

    /// Bind a sandbox to the key, replacing any previous binding.
    async fn bind_sandbox(&self, key: &BindingKey, sandbox: &SandboxId) -> Result<()>;

    /// Most recent log entry for the key.
    async fn last_entry(&self, key: &BindingKey) -> Result<Option<LogEntry>>;

    /// Append an entry to the key's log.
    async fn append_entry(&self, key: &BindingKey, entry: LogEntry) -> Result<()>;

    /// Full log for the key, in append order.
    async fn entries(&self, key: &BindingKey) -> Result<Vec<LogEntry>>;

    /// Drop the binding and its log. A later use of the key starts fresh.
    async fn remove_binding(&self, key: &BindingKey) -> Result<()>;

    /// Keys of every binding belonging to a session.
    async fn session_bindings(&self, session: &SessionId) -> Result<Vec<BindingKey>>;
}
