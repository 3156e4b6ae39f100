use super::docker::{ExecResult, ExecSpec};
use super::invocation::{render_batch, Invocation};
use super::SandboxRuntime;
use crate::config::SandboxConfig;
use crate::storage::SandboxId;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

/// Stateless executor for invocations inside a sandbox. Every exec runs as
/// the restricted user in the practice directory and is bounded by a
/// timeout so a wedged engine call cannot stall a binding forever.
pub struct Runner {
    runtime: Arc<dyn SandboxRuntime>,
    user: String,
    workdir: String,
    timeout: Duration,
}

impl Runner {
    pub fn new(runtime: Arc<dyn SandboxRuntime>, sandbox: &SandboxConfig, timeout: Duration) -> Self {
        Self {
            runtime,
            user: sandbox.user.clone(),
            workdir: sandbox.practice_dir.clone(),
            timeout,
        }
    }

    /// Execute one invocation and capture its output.
    pub async fn run(&self, sandbox: &SandboxId, invocation: &Invocation) -> Result<ExecResult> {
        self.bounded(self.timeout, sandbox, invocation.argv()).await
    }

    /// Execute an ordered batch as one combined invocation (the replay
    /// path). A failing line does not stop the lines after it; the budget
    /// scales with the batch size.
    pub async fn run_batch(
        &self,
        sandbox: &SandboxId,
        invocations: &[Invocation],
    ) -> Result<ExecResult> {
        let script = render_batch(invocations)?.join("\n");
        let budget = self
            .timeout
            .saturating_mul(invocations.len().max(1) as u32);

        self.bounded(
            budget,
            sandbox,
            vec!["sh".to_string(), "-c".to_string(), script],
        )
        .await
    }

    async fn bounded(
        &self,
        limit: Duration,
        sandbox: &SandboxId,
        argv: Vec<String>,
    ) -> Result<ExecResult> {
        let spec = ExecSpec {
            argv,
            user: Some(self.user.clone()),
            workdir: Some(self.workdir.clone()),
        };

        match tokio::time::timeout(limit, self.runtime.exec(sandbox.as_str(), &spec)).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "execution in sandbox {} exceeded {}s",
                sandbox,
                limit.as_secs()
            )),
        }
    }
}
