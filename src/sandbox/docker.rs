use anyhow::{Context, Result};
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogOutput, RemoveContainerOptions,
};
use bollard::exec::CreateExecOptions;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::stream::StreamExt;
use std::collections::HashMap;
use tracing::{debug, info};

/// Docker client wrapper with gitgym-specific helpers
pub struct DockerClient {
    client: Docker,
}

/// Result of command execution in a sandbox
#[derive(Debug, Clone)]
pub struct ExecResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
}

/// Configuration for creating a sandbox container
#[derive(Debug, Clone)]
pub struct CreateSpec {
    pub image: String,
    /// host:container:mode bind mounts (seed trees and editor hooks)
    pub binds: Vec<String>,
    pub network_enabled: bool,
    pub labels: HashMap<String, String>,
}

/// One exec inside a sandbox
#[derive(Debug, Clone)]
pub struct ExecSpec {
    pub argv: Vec<String>,
    pub user: Option<String>,
    pub workdir: Option<String>,
}

/// Information about a sandbox container
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
}

impl DockerClient {
    /// Create a new Docker client
    pub async fn new() -> Result<Self> {
        let client = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        debug!("Connected to Docker daemon");
        Ok(Self { client })
    }

    /// Pull an image from registry if not present
    pub async fn pull_image(&self, image: &str) -> Result<()> {
        if self.client.inspect_image(image).await.is_ok() {
            debug!("Image already exists: {}", image);
            return Ok(());
        }

        info!("Pulling Docker image: {}", image);

        let create_image_options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self
            .client
            .create_image(Some(create_image_options), None, None);

        // Consume the stream to ensure the image is pulled
        while let Some(_) = stream.next().await {}

        info!("Successfully pulled Docker image: {}", image);
        Ok(())
    }

    /// Create and start a sandbox container. The container idles on a shell
    /// so it stays up between execs.
    pub async fn create_sandbox(&self, name: &str, spec: &CreateSpec) -> Result<String> {
        self.pull_image(&spec.image).await?;

        let container_config = Config {
            image: Some(spec.image.clone()),
            cmd: Some(vec!["/bin/sh".to_string()]),
            tty: Some(true),
            open_stdin: Some(true),
            host_config: Some(bollard::models::HostConfig {
                binds: if !spec.binds.is_empty() {
                    Some(spec.binds.clone())
                } else {
                    None
                },
                network_mode: if spec.network_enabled {
                    Some("bridge".to_string())
                } else {
                    Some("none".to_string())
                },
                ..Default::default()
            }),
            labels: Some(spec.labels.clone()),
            ..Default::default()
        };

        let options = CreateContainerOptions {
            name,
            platform: None,
        };

        let response = self
            .client
            .create_container(Some(options), container_config)
            .await
            .context("Failed to create container")?;

        let start_options: Option<bollard::container::StartContainerOptions<String>> = None;
        self.client
            .start_container(&response.id, start_options)
            .await
            .context("Failed to start container")?;

        info!("Created sandbox container: {} (id: {})", name, response.id);

        Ok(response.id)
    }

    /// Execute an argv in a container and capture output
    pub async fn exec_command(&self, container: &str, spec: &ExecSpec) -> Result<ExecResult> {
        let exec_options = CreateExecOptions {
            cmd: Some(spec.argv.clone()),
            user: spec.user.clone(),
            working_dir: spec.workdir.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec_id = self
            .client
            .create_exec(container, exec_options)
            .await
            .context("Failed to create exec instance")?;

        use bollard::exec::StartExecResults;

        let output = self
            .client
            .start_exec(&exec_id.id, None)
            .await
            .context("Failed to start exec")?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        if let StartExecResults::Attached {
            mut output,
            input: _,
        } = output
        {
            while let Some(Ok(msg)) = output.next().await {
                match msg {
                    LogOutput::StdOut { message } => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    LogOutput::StdErr { message } => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    _ => {}
                }
            }
        }

        let inspect_result = self
            .client
            .inspect_exec(&exec_id.id)
            .await
            .context("Failed to inspect exec")?;

        let exit_code = inspect_result.exit_code.unwrap_or(-1);

        debug!(
            "Command executed in sandbox: exit_code={}, stdout_len={}, stderr_len={}",
            exit_code,
            stdout.len(),
            stderr.len()
        );

        Ok(ExecResult {
            stdout,
            stderr,
            exit_code,
        })
    }

    /// Names of containers matching a name filter, running or stopped.
    /// Errors mean the engine itself was unreachable, not "no match".
    pub async fn containers_named(&self, name: &str) -> Result<Vec<String>> {
        let mut filters = HashMap::new();
        filters.insert("name".to_string(), vec![name.to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        Ok(containers
            .into_iter()
            .filter_map(|c| c.names.and_then(|mut n| n.pop()))
            .map(|n| n.trim_start_matches('/').to_string())
            .collect())
    }

    /// List all containers carrying gitgym labels
    pub async fn list_sandbox_containers(&self) -> Result<Vec<ContainerInfo>> {
        let mut filters = HashMap::new();
        filters.insert("label".to_string(), vec!["gitgym.exercise".to_string()]);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self
            .client
            .list_containers(Some(options))
            .await
            .context("Failed to list containers")?;

        let mut result = vec![];

        for container in containers {
            if let (Some(id), Some(name)) =
                (container.id, container.names.and_then(|mut n| n.pop()))
            {
                let name = name.trim_start_matches('/').to_string();
                result.push(ContainerInfo { id, name });
            }
        }

        Ok(result)
    }

    /// Force-remove a container
    pub async fn remove_container(&self, container: &str) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        self.client
            .remove_container(container, Some(options))
            .await
            .context("Failed to remove container")?;

        info!("Removed container: {}", container);
        Ok(())
    }
}
