pub mod api;
pub mod config;
pub mod core;
pub mod sandbox;
pub mod storage;

pub use config::Config;
pub use core::{DispatchError, Dispatcher};
pub use sandbox::{CommandReply, DockerClient, Provisioner, ResultKind, Runner, SandboxRuntime};
pub use storage::{ExerciseId, LogEntry, LogMode, SandboxId, SessionId, SessionStore};

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

pub async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting gitgym...");

    // Storage
    let store = storage::sqlite::SqliteStore::new(&config.storage.path).await?;
    tracing::info!("Storage initialized: {}", config.storage.path);

    // Container runtime
    let runtime: Arc<dyn SandboxRuntime> = Arc::new(DockerClient::new().await?);
    tracing::info!("Docker runtime connected");

    // Core
    let provisioner = Provisioner::new(
        runtime.clone(),
        config.sandbox.clone(),
        config.content.clone(),
        Duration::from_secs(config.timeouts.provision_secs),
    );
    let runner = Runner::new(
        runtime,
        &config.sandbox,
        Duration::from_secs(config.timeouts.exec_secs),
    );
    let dispatcher = Arc::new(Dispatcher::new(
        store,
        provisioner,
        runner,
        config.sandbox.clone(),
    ));
    tracing::info!("Dispatcher initialized");

    // Inbound surface
    let api = api::WebApi::new(dispatcher, config.server.host.clone(), config.server.port);
    api.start().await
}
