//! Global configuration.
//!
//! Loaded from an explicit path, `.drover.yml` in the project, or
//! `~/.config/drover/drover.yml`, falling back to defaults. Configuration
//! errors are fatal and reported before any iteration runs.

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default completion marker the agent must print to signal it is done.
pub const COMPLETION_MARKER: &str = "ALL_TASKS_COMPLETE";

/// Well-known task prompt files, checked in order.
pub const PROMPT_FILES: [&str; 2] = ["PROMPT.md", "TASK.md"];

/// Global configuration for Drover.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Agent invocation settings.
    pub agent: AgentConfig,

    /// Loop bounds and detection thresholds.
    pub run: RunConfig,

    /// Context assembly limits.
    pub context: ContextConfig,

    /// Fingerprint walk settings.
    pub fingerprint: FingerprintConfig,

    /// Swarm child resource ceilings.
    pub swarm: SwarmConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            agent: AgentConfig::default(),
            run: RunConfig::default(),
            context: ContextConfig::default(),
            fingerprint: FingerprintConfig::default(),
            swarm: SwarmConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load configuration with fallback chain.
    ///
    /// Search order:
    /// 1. Explicit path if provided
    /// 2. .drover.yml in current directory
    /// 3. ~/.config/drover/drover.yml
    /// 4. Defaults
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        let project_config = PathBuf::from(".drover.yml");
        if project_config.exists() {
            match Self::load_from_file(&project_config) {
                Ok(config) => {
                    log::info!("Loaded config from .drover.yml");
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load .drover.yml: {}", e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("drover").join("drover.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => {
                        log::info!("Loaded config from {}", user_config.display());
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.run.max_iterations == 0 || self.run.max_iterations > 1000 {
            eyre::bail!("run.max-iterations must be in 1..=1000");
        }
        if self.agent.timeout_secs == 0 {
            eyre::bail!("agent.timeout-secs must be > 0");
        }
        if self.run.stall_threshold < 2 {
            eyre::bail!("run.stall-threshold must be >= 2");
        }
        if self.context.plan_window_pending == 0 {
            eyre::bail!("context.plan-window-pending must be > 0");
        }
        Ok(())
    }
}

/// Agent invocation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Default tool name (amp, claude, opencode).
    pub tool: String,

    /// Default model identifier passed to the tool.
    pub model: String,

    /// Timeout for one invocation in seconds.
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            tool: "claude".to_string(),
            model: "sonnet".to_string(),
            timeout_secs: 1800,
        }
    }
}

/// Loop bounds and detection thresholds.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RunConfig {
    /// Maximum iterations per run.
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Consecutive unchanged fingerprints before a stall reflexion fires.
    #[serde(rename = "stall-threshold")]
    pub stall_threshold: u32,

    /// Trailing agent-output lines hashed into the loop signature.
    #[serde(rename = "signature-lines")]
    pub signature_lines: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            stall_threshold: 2,
            signature_lines: 20,
        }
    }
}

/// Context assembly limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Completed plan items shown (tail of the done list).
    #[serde(rename = "plan-window-done")]
    pub plan_window_done: usize,

    /// Pending plan items shown (head of the pending list).
    #[serde(rename = "plan-window-pending")]
    pub plan_window_pending: usize,

    /// Per-file cap before an extra context file draws a size warning (bytes).
    #[serde(rename = "context-file-cap-bytes")]
    pub context_file_cap_bytes: usize,

    /// Lines of unified diff context when --diff-context is enabled.
    #[serde(rename = "diff-context-lines")]
    pub diff_context_lines: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            plan_window_done: 5,
            plan_window_pending: 10,
            context_file_cap_bytes: 32 * 1024,
            diff_context_lines: 3,
        }
    }
}

/// Fingerprint walk settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Directory names pruned by the fallback walk.
    #[serde(rename = "skip-dirs")]
    pub skip_dirs: Vec<String>,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            skip_dirs: vec![
                "target".to_string(),
                "node_modules".to_string(),
                ".git".to_string(),
                ".drover".to_string(),
                "dist".to_string(),
                "build".to_string(),
                "__pycache__".to_string(),
                ".venv".to_string(),
            ],
        }
    }
}

/// Swarm child resource ceilings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SwarmConfig {
    /// Virtual memory ceiling for child agents in megabytes.
    #[serde(rename = "child-memory-mb")]
    pub child_memory_mb: u64,

    /// CPU time ceiling for child agents in seconds.
    #[serde(rename = "child-cpu-secs")]
    pub child_cpu_secs: u64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            child_memory_mb: 4096,
            child_cpu_secs: 7200,
        }
    }
}
