use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub content: ContentConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub timeouts: TimeoutsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// Settings for the sandbox containers commands run in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Image every sandbox is created from
    #[serde(default = "default_image")]
    pub image: String,
    /// Unprivileged account commands run as inside the sandbox
    #[serde(default = "default_user")]
    pub user: String,
    /// Restricted shell that interprets user command lines
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Working directory for every command, seeded from the exercise tree
    #[serde(default = "default_practice_dir")]
    pub practice_dir: String,
    /// In-container editor hook that reads piped input
    #[serde(default = "default_input_hook")]
    pub input_hook: String,
    /// In-container editor hook that emits the prompt sentinel
    #[serde(default = "default_output_hook")]
    pub output_hook: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            user: default_user(),
            shell: default_shell(),
            practice_dir: default_practice_dir(),
            input_hook: default_input_hook(),
            output_hook: default_output_hook(),
        }
    }
}

/// Host-side directories the sandboxes are seeded from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentConfig {
    /// Per-exercise seed trees, one subdirectory per exercise id
    #[serde(default = "default_exercises_dir")]
    pub exercises_dir: String,
    /// Optional per-exercise origin remotes
    #[serde(default = "default_origins_dir")]
    pub origins_dir: String,
    /// Optional per-exercise upstream remotes
    #[serde(default = "default_upstreams_dir")]
    pub upstreams_dir: String,
    /// Editor hook scripts mounted read-only into every sandbox
    #[serde(default = "default_editor_dir")]
    pub editor_dir: String,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            exercises_dir: default_exercises_dir(),
            origins_dir: default_origins_dir(),
            upstreams_dir: default_upstreams_dir(),
            editor_dir: default_editor_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_storage_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_storage_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutsConfig {
    /// Upper bound on a single command execution
    #[serde(default = "default_exec_secs")]
    pub exec_secs: u64,
    /// Upper bound on provisioning one sandbox end to end
    #[serde(default = "default_provision_secs")]
    pub provision_secs: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            exec_secs: default_exec_secs(),
            provision_secs: default_provision_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_image() -> String {
    "gitgym/alpine-git:latest".to_string()
}

fn default_user() -> String {
    "trainee".to_string()
}

fn default_shell() -> String {
    "/usr/local/bin/restricted-shell".to_string()
}

fn default_practice_dir() -> String {
    "/home/trainee/exercise".to_string()
}

fn default_input_hook() -> String {
    "/editor/input.sh".to_string()
}

fn default_output_hook() -> String {
    "/editor/output.sh".to_string()
}

fn home_joined(rel: &str) -> String {
    dirs::home_dir()
        .map(|h| h.join(rel).to_string_lossy().to_string())
        .unwrap_or_else(|| rel.to_string())
}

fn default_exercises_dir() -> String {
    home_joined("exercises")
}

fn default_origins_dir() -> String {
    home_joined("origins")
}

fn default_upstreams_dir() -> String {
    home_joined("upstreams")
}

fn default_editor_dir() -> String {
    home_joined("editor")
}

fn default_storage_path() -> String {
    home_joined(".gitgym/gitgym.db")
}

fn default_exec_secs() -> u64 {
    30
}

fn default_provision_secs() -> u64 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}
