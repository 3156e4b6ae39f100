use crate::config::SandboxConfig;
use crate::sandbox::{classify, invocation, CommandReply, Invocation, Provisioner, Runner};
use crate::storage::{BindingKey, ExerciseId, LogEntry, LogMode, SandboxId, SessionId, SessionStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Failures the inbound layer must tell apart. Execution failure is not
/// here: a command that errored inside the sandbox is a normal reply with
/// result `fail`.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Editor input arrived without a command waiting on it. User-facing,
    /// nothing was mutated.
    #[error("{0}")]
    Protocol(String),

    /// The stored log cannot be replayed. Internal; replay was abandoned
    /// before executing anything.
    #[error("command log is not replayable: {0}")]
    LogIntegrity(String),

    /// Engine or storage trouble. Internal; the raw text must not reach
    /// the caller.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Orchestrates one binding's lifecycle per request: ensures a live
/// sandbox, enforces the command/editor alternation, executes, and records
/// history.
///
/// Work on the same (session, exercise) binding is serialized behind a
/// per-key async mutex; different bindings proceed concurrently.
pub struct Dispatcher<S: SessionStore> {
    store: S,
    provisioner: Provisioner,
    runner: Runner,
    sandbox: SandboxConfig,
    locks: Mutex<HashMap<BindingKey, Arc<tokio::sync::Mutex<()>>>>,
}

impl<S: SessionStore> Dispatcher<S> {
    pub fn new(
        store: S,
        provisioner: Provisioner,
        runner: Runner,
        sandbox: SandboxConfig,
    ) -> Self {
        Self {
            store,
            provisioner,
            runner,
            sandbox,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn binding_lock(&self, key: &BindingKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("binding lock map poisoned");
        locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Handle one user request against a binding.
    pub async fn submit(
        &self,
        session: SessionId,
        exercise: ExerciseId,
        mode: LogMode,
        message: String,
    ) -> Result<CommandReply, DispatchError> {
        let key = BindingKey { session, exercise };
        let lock = self.binding_lock(&key);
        let _guard = lock.lock().await;

        // Editor input must answer the immediately preceding command. The
        // check runs before any provisioning so a rejected first request
        // leaves no sandbox behind.
        let pending = match mode {
            LogMode::Editor => match self.store.last_entry(&key).await? {
                Some(entry) if entry.mode == LogMode::Command => Some(entry.message),
                _ => {
                    return Err(DispatchError::Protocol(
                        "editor input must follow a command".to_string(),
                    ))
                }
            },
            LogMode::Command => None,
        };

        let sandbox = self.ensure_sandbox(&key).await?;

        let invocation = match &pending {
            Some(command) => {
                debug!(
                    "Editor input for binding ({}, {}) answering `{}`",
                    key.session, key.exercise, command
                );
                self.editor_invocation(&message, command)?
            }
            None => {
                debug!(
                    "Running `{}` for binding ({}, {})",
                    message, key.session, key.exercise
                );
                invocation::shell_command(&self.sandbox.shell, &message)
            }
        };

        let captured = self.runner.run(&sandbox, &invocation).await?;
        let reply = classify(&captured);

        // Every accepted request becomes history, failed executions
        // included, so replay stays order-faithful
        self.store.append_entry(&key, LogEntry { mode, message }).await?;

        Ok(reply)
    }

    /// Rebuild a binding's sandbox from its log after the original was
    /// lost. Builds every entry's invocation first (deriving each editor
    /// entry's pending command from the preceding command entry), then
    /// submits the whole history as one combined batch. Best-effort: a
    /// mid-sequence failure is not surfaced per entry.
    pub async fn restore(
        &self,
        session: SessionId,
        exercise: ExerciseId,
    ) -> Result<SandboxId, DispatchError> {
        let key = BindingKey { session, exercise };
        let lock = self.binding_lock(&key);
        let _guard = lock.lock().await;

        let entries = self.store.entries(&key).await?;
        let invocations = self.replay_invocations(&entries)?;

        if let Some(stale) = self.store.sandbox_for(&key).await? {
            if let Err(err) = self.provisioner.destroy(&stale).await {
                warn!("Failed to remove stale sandbox {}: {}", stale, err);
            }
        }

        let fresh = self.provisioner.provision(exercise).await?;
        self.store.bind_sandbox(&key, &fresh).await?;

        info!(
            "Restoring {} log entries into sandbox {} for binding ({}, {})",
            entries.len(),
            fresh,
            key.session,
            key.exercise
        );

        if !invocations.is_empty() {
            self.runner.run_batch(&fresh, &invocations).await?;
        }

        Ok(fresh)
    }

    /// Destroy the bound sandbox and discard the binding's history. The log
    /// is discarded even when destruction fails; the destruction error
    /// still propagates.
    pub async fn delete_binding(
        &self,
        session: SessionId,
        exercise: ExerciseId,
    ) -> Result<(), DispatchError> {
        let key = BindingKey { session, exercise };
        let lock = self.binding_lock(&key);
        let _guard = lock.lock().await;

        let destroyed = match self.store.sandbox_for(&key).await? {
            Some(sandbox) => {
                info!(
                    "Destroying sandbox {} for binding ({}, {})",
                    sandbox, key.session, key.exercise
                );
                self.provisioner.destroy(&sandbox).await
            }
            None => Ok(()),
        };

        self.store.remove_binding(&key).await?;

        destroyed.map_err(DispatchError::Internal)
    }

    /// Delete every binding of a session. Each binding is taken under its
    /// own lock, so an in-flight command finishes before its sandbox goes.
    pub async fn delete_session(&self, session: SessionId) -> Result<(), DispatchError> {
        let mut first_error = None;

        for key in self.store.session_bindings(&session).await? {
            if let Err(err) = self.delete_binding(key.session, key.exercise).await {
                warn!("Failed to delete binding for session {}: {}", session, err);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Resolve the binding's sandbox, reprovisioning when there is none or
    /// the bound one is gone. A stale id is never reused.
    async fn ensure_sandbox(&self, key: &BindingKey) -> Result<SandboxId, DispatchError> {
        if let Some(bound) = self.store.sandbox_for(key).await? {
            if self.provisioner.is_live(&bound).await? {
                return Ok(bound);
            }
            info!(
                "Sandbox {} for binding ({}, {}) is gone, reprovisioning",
                bound, key.session, key.exercise
            );
        }

        let fresh = self.provisioner.provision(key.exercise).await?;
        self.store.bind_sandbox(key, &fresh).await?;

        Ok(fresh)
    }

    fn editor_invocation(
        &self,
        payload: &str,
        pending: &str,
    ) -> Result<Invocation, DispatchError> {
        Ok(invocation::editor_command(
            &self.sandbox.shell,
            &self.sandbox.input_hook,
            &self.sandbox.output_hook,
            payload,
            pending,
        )?)
    }

    /// Build the full replay batch, tracking the pending command while
    /// scanning the log in order. An editor entry with nothing before it
    /// means the log is corrupt; nothing gets executed in that case.
    fn replay_invocations(
        &self,
        entries: &[LogEntry],
    ) -> Result<Vec<Invocation>, DispatchError> {
        let mut pending: Option<&str> = None;
        let mut invocations = Vec::with_capacity(entries.len());

        for (position, entry) in entries.iter().enumerate() {
            match entry.mode {
                LogMode::Command => {
                    pending = Some(&entry.message);
                    invocations.push(invocation::shell_command(
                        &self.sandbox.shell,
                        &entry.message,
                    ));
                }
                LogMode::Editor => {
                    let command = pending.ok_or_else(|| {
                        DispatchError::LogIntegrity(format!(
                            "editor entry at position {position} has no preceding command"
                        ))
                    })?;
                    invocations.push(self.editor_invocation(&entry.message, command)?);
                }
            }
        }

        Ok(invocations)
    }
}
