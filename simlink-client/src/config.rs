//! Console client configuration.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use simlink_core::config::{DEFAULT_CINEMATIC_SECS, DEFAULT_IDLE_TIMEOUT};
use simlink_core::persistence::DEFAULT_AUTOSAVE_INTERVAL;
use simlink_core::router::DEFAULT_LOG_CAPACITY;
use simlink_core::state::connection::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use simlink_core::{
    LaunchContext, LaunchTarget, RetryPolicy, Role, SessionConfig, TaskSequence, TaskSpec,
};

/// Top-level configuration for the console client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Task list override. Empty means the built-in exercise.
    pub tasks: Vec<TaskSpec>,
    /// Where the simulation stream lives.
    pub network: NetworkConfig,
    /// Which simulation to launch.
    pub simulation: SimulationConfig,
    /// Retry, autosave and timing.
    pub session: SessionSettings,
    /// Launch context.
    pub user: UserConfig,
    /// Logging.
    pub logging: LoggingConfig,
    /// Correct answer index per question id.
    pub answers: HashMap<String, usize>,
}

/// Network settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Simulation stream address (host:port).
    pub sim_address: String,
    /// Connection timeout in milliseconds.
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub project_id: String,
    pub model_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// Automatic launch attempts before giving up.
    pub max_retries: u32,
    /// Pause between attempts in milliseconds.
    pub retry_delay_ms: u64,
    /// Autosave period in seconds.
    pub autosave_secs: u64,
    /// Quiet seconds before a live session expires; `0` never expires.
    pub idle_timeout_secs: u64,
    /// Messages kept for `/log`.
    pub log_capacity: usize,
    /// Cinematic length; `0` skips it.
    pub cinematic_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub user_id: String,
    pub role: Role,
    /// Launched from a learning platform.
    pub lti: bool,
}

/// Logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level, overridden by `RUST_LOG`.
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            sim_address: "127.0.0.1:7440".into(),
            timeout_ms: 5000,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            autosave_secs: DEFAULT_AUTOSAVE_INTERVAL.as_secs(),
            idle_timeout_secs: DEFAULT_IDLE_TIMEOUT.as_secs(),
            log_capacity: DEFAULT_LOG_CAPACITY,
            cinematic_secs: DEFAULT_CINEMATIC_SECS,
        }
    }
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            user_id: "local".into(),
            role: Role::Student,
            lti: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl ClientConfig {
    /// Load from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    /// Write default config to a file.
    pub fn write_default(path: &Path) -> std::io::Result<()> {
        let text = toml::to_string_pretty(&Self::default()).map_err(std::io::Error::other)?;
        std::fs::write(path, text)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.network.timeout_ms)
    }

    pub fn launch_context(&self) -> LaunchContext {
        LaunchContext {
            user_id: self.user.user_id.clone(),
            role: self.user.role,
            is_lti: self.user.lti,
        }
    }

    /// Settings for the session controller.
    pub fn to_session_config(&self) -> SessionConfig {
        let tasks = if self.tasks.is_empty() {
            TaskSequence::default()
        } else {
            TaskSequence::new(self.tasks.clone())
        };
        SessionConfig {
            target: LaunchTarget {
                project_id: self.simulation.project_id.clone(),
                model_id: self.simulation.model_id.clone(),
            },
            retry: RetryPolicy {
                max_retries: self.session.max_retries,
                delay: Duration::from_millis(self.session.retry_delay_ms),
            },
            autosave_interval: Duration::from_secs(self.session.autosave_secs),
            idle_timeout: (self.session.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.session.idle_timeout_secs)),
            log_capacity: self.session.log_capacity,
            tasks,
            answers: self.answers.clone(),
            cinematic_secs: self.session.cinematic_secs,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        assert!(text.contains("sim_address"));
        assert!(text.contains("max_retries"));
    }

    #[test]
    fn roundtrip_config() {
        let text = toml::to_string_pretty(&ClientConfig::default()).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.network.sim_address, "127.0.0.1:7440");
        assert_eq!(parsed.session.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(parsed.user.role, Role::Student);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: ClientConfig = toml::from_str(
            r#"
            [user]
            user_id = "u-17"
            role = "instructor"
            lti = true

            [answers]
            Q1 = 2
            "#,
        )
        .unwrap();
        assert_eq!(parsed.user.role, Role::Instructor);
        assert_eq!(parsed.network.timeout_ms, 5000);
        assert!(!parsed.launch_context().is_lti_student());

        let session = parsed.to_session_config();
        assert_eq!(session.is_correct("Q1", 2), Some(true));
        assert_eq!(session.tasks.len(), 6);
    }

    #[test]
    fn task_override_and_timing() {
        let parsed: ClientConfig = toml::from_str(
            r#"
            [session]
            retry_delay_ms = 250
            autosave_secs = 0
            idle_timeout_secs = 0

            [[tasks]]
            tool = "Shovel"
            task_id = "excavation"
            name = "Dig"
            "#,
        )
        .unwrap();
        let session = parsed.to_session_config();
        assert_eq!(session.tasks.len(), 1);
        assert_eq!(session.retry.delay, Duration::from_millis(250));
        assert_eq!(session.autosave_interval, Duration::ZERO);
        assert_eq!(session.idle_timeout, None);

        // The session raises a zero period to its minimum.
        let pm = simlink_core::PersistenceManager::new(
            simlink_core::MemoryStore::new(),
            session.autosave_interval,
        );
        assert_eq!(pm.interval(), simlink_core::persistence::MIN_AUTOSAVE_INTERVAL);
    }

    #[test]
    fn idle_timeout_defaults_on() {
        let session = ClientConfig::default().to_session_config();
        assert_eq!(session.idle_timeout, Some(DEFAULT_IDLE_TIMEOUT));
    }

    #[test]
    fn written_default_loads_back() {
        let path = std::env::temp_dir().join(format!("simlink-client-{}.toml", std::process::id()));
        ClientConfig::write_default(&path).unwrap();
        let cfg = ClientConfig::load(&path);
        std::fs::remove_file(&path).unwrap();
        assert_eq!(cfg.session.cinematic_secs, DEFAULT_CINEMATIC_SECS);
        assert_eq!(cfg.to_session_config().tasks.len(), 6);
    }

    #[test]
    fn missing_file_uses_defaults() {
        let cfg = ClientConfig::load(Path::new("/nonexistent/simlink-client.toml"));
        assert_eq!(cfg.logging.level, "info");
    }
}
