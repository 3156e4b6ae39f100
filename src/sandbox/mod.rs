mod docker;
pub mod invocation;
mod output;
mod runner;

pub use docker::{ContainerInfo, CreateSpec, DockerClient, ExecResult, ExecSpec};
pub use invocation::Invocation;
pub use output::{classify, CommandReply, ResultKind, EDITOR_SENTINEL};
pub use runner::Runner;

use crate::config::{ContentConfig, SandboxConfig};
use crate::storage::{ExerciseId, SandboxId};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Capability surface the core needs from the container engine. Concrete
/// implementation is the Docker client; tests substitute a scripted fake.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Create and start a sandbox under the given name.
    async fn create(&self, name: &str, spec: &CreateSpec) -> Result<String>;

    /// Execute an argv inside a sandbox.
    async fn exec(&self, sandbox: &str, spec: &ExecSpec) -> Result<ExecResult>;

    /// Names of sandboxes matching a name filter. An error means the engine
    /// was unreachable, distinct from an empty match.
    async fn containers_named(&self, name: &str) -> Result<Vec<String>>;

    /// Force-remove a sandbox.
    async fn remove(&self, name: &str) -> Result<()>;
}

#[async_trait]
impl SandboxRuntime for DockerClient {
    async fn create(&self, name: &str, spec: &CreateSpec) -> Result<String> {
        self.create_sandbox(name, spec).await
    }

    async fn exec(&self, sandbox: &str, spec: &ExecSpec) -> Result<ExecResult> {
        self.exec_command(sandbox, spec).await
    }

    async fn containers_named(&self, name: &str) -> Result<Vec<String>> {
        DockerClient::containers_named(self, name).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.remove_container(name).await
    }
}

/// Creates, checks and destroys sandboxes for exercises.
pub struct Provisioner {
    runtime: Arc<dyn SandboxRuntime>,
    sandbox: SandboxConfig,
    content: ContentConfig,
    timeout: Duration,
}

impl Provisioner {
    pub fn new(
        runtime: Arc<dyn SandboxRuntime>,
        sandbox: SandboxConfig,
        content: ContentConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            runtime,
            sandbox,
            content,
            timeout,
        }
    }

    /// Provision a fresh sandbox for an exercise: create the container with
    /// networking disabled and the seed trees bound read-only, copy the
    /// seeds into place, fix ownership, and install the default editor
    /// hook. Any mandatory step failing aborts with an error; the optional
    /// origin/upstream steps are no-ops when their source tree is absent.
    pub async fn provision(&self, exercise: ExerciseId) -> Result<SandboxId> {
        // Fails before any engine work when the exercise has no content
        let binds = self.seed_binds(exercise)?;

        let id = SandboxId::generate();
        info!("Provisioning sandbox {} for exercise {}", id, exercise);

        let provisioned = match tokio::time::timeout(self.timeout, self.build(exercise, &id, binds))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!(
                "provisioning sandbox {} exceeded {}s",
                id,
                self.timeout.as_secs()
            )),
        };

        if let Err(err) = provisioned {
            // Don't leave a half-built container behind
            if let Err(remove_err) = self.runtime.remove(id.as_str()).await {
                warn!(
                    "Failed to clean up partially provisioned sandbox {}: {}",
                    id, remove_err
                );
            }
            return Err(err);
        }

        Ok(id)
    }

    /// Read-only bind mounts seeding the sandbox. The exercise tree is
    /// mandatory; origin/upstream are bound only when their host tree
    /// exists, so the in-container guards in the seed script see exactly
    /// what is available.
    fn seed_binds(&self, exercise: ExerciseId) -> Result<Vec<String>> {
        let seed = Path::new(&self.content.exercises_dir).join(exercise.to_string());
        if !seed.is_dir() {
            anyhow::bail!(
                "no exercise content for id {} at {}",
                exercise,
                seed.display()
            );
        }

        let mut binds = vec![
            format!("{}:/seed/exercise:ro", seed.display()),
            format!("{}:/editor:ro", self.content.editor_dir),
        ];

        let origin = Path::new(&self.content.origins_dir).join(exercise.to_string());
        if origin.is_dir() {
            binds.push(format!("{}:/seed/origin:ro", origin.display()));
        }
        let upstream = Path::new(&self.content.upstreams_dir).join(exercise.to_string());
        if upstream.is_dir() {
            binds.push(format!("{}:/seed/upstream:ro", upstream.display()));
        }

        Ok(binds)
    }

    async fn build(&self, exercise: ExerciseId, id: &SandboxId, binds: Vec<String>) -> Result<()> {
        let spec = CreateSpec {
            image: self.sandbox.image.clone(),
            binds,
            network_enabled: false,
            labels: HashMap::from([
                ("gitgym.exercise".to_string(), exercise.to_string()),
                ("gitgym.created_at".to_string(), Utc::now().to_rfc3339()),
            ]),
        };

        self.runtime
            .create(id.as_str(), &spec)
            .await
            .context("Failed to create sandbox container")?;

        // Seed filesystem content in one batched pass as root
        let seeding = self
            .runtime
            .exec(
                id.as_str(),
                &ExecSpec {
                    argv: vec![
                        "sh".to_string(),
                        "-c".to_string(),
                        self.seed_script(),
                    ],
                    user: Some("root".to_string()),
                    workdir: None,
                },
            )
            .await
            .context("Failed to run sandbox seeding")?;

        if seeding.exit_code != 0 {
            anyhow::bail!(
                "sandbox seeding failed with exit code {}: {}",
                seeding.exit_code,
                seeding.stderr
            );
        }

        // Default editor hook, installed as the restricted user
        let hook = self
            .runtime
            .exec(
                id.as_str(),
                &ExecSpec {
                    argv: vec![
                        "git".to_string(),
                        "config".to_string(),
                        "--global".to_string(),
                        "core.editor".to_string(),
                        self.sandbox.output_hook.clone(),
                    ],
                    user: Some(self.sandbox.user.clone()),
                    workdir: Some(self.sandbox.practice_dir.clone()),
                },
            )
            .await
            .context("Failed to install editor hook")?;

        if hook.exit_code != 0 {
            anyhow::bail!(
                "installing editor hook failed with exit code {}: {}",
                hook.exit_code,
                hook.stderr
            );
        }

        Ok(())
    }

    /// Root-run seeding script. The practice copy and its chown are
    /// mandatory; origin/upstream steps are skipped when unbound and their
    /// failure never fails the batch.
    fn seed_script(&self) -> String {
        let user = &self.sandbox.user;
        let practice = &self.sandbox.practice_dir;

        format!(
            "set -e\n\
             mkdir -p '{practice}'\n\
             cp -a /seed/exercise/. '{practice}/'\n\
             chown -R '{user}:{user}' '{practice}'\n\
             if [ -d /seed/origin ]; then {{ mkdir -p /origin && cp -a /seed/origin/. /origin/ && chown -R '{user}:{user}' /origin; }} || true; fi\n\
             if [ -d /seed/upstream ]; then {{ mkdir -p /upstream && cp -a /seed/upstream/. /upstream/ && chown -R '{user}:{user}' /upstream; }} || true; fi\n"
        )
    }

    /// Whether a sandbox still exists on the engine, running or stopped.
    /// Engine-unreachable conditions propagate as errors.
    pub async fn is_live(&self, id: &SandboxId) -> Result<bool> {
        let matches = self.runtime.containers_named(id.as_str()).await?;
        Ok(!matches.is_empty())
    }

    /// Force-remove a sandbox.
    pub async fn destroy(&self, id: &SandboxId) -> Result<()> {
        self.runtime.remove(id.as_str()).await
    }
}
