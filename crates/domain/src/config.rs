//! Worker configuration (spec §3 "Worker Options") plus the nested pipeline
//! tunables referenced throughout §4-§5. Field defaults follow the teacher's
//! `#[serde(default)]` + documented-constant style (`config/agents.rs`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutorKind {
    Process,
    Thread,
}

fn d_num_idle_resources() -> usize {
    1
}
fn d_max_resources() -> usize {
    10
}
fn d_initialize_timeout_s() -> u64 {
    30
}
fn d_close_timeout_s() -> u64 {
    10
}
fn d_ping_interval_s() -> u64 {
    15
}
fn d_load_threshold() -> f64 {
    0.8
}
fn d_max_processes() -> usize {
    10
}
fn d_register() -> bool {
    true
}
fn d_log_level() -> String {
    "info".to_string()
}
fn d_executor_kind() -> ExecutorKind {
    ExecutorKind::Process
}

/// Immutable worker configuration (spec §3). Loaded once at process start;
/// never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOptions {
    pub agent_id: String,
    pub auth_token: String,

    #[serde(default = "d_executor_kind")]
    pub executor_kind: ExecutorKind,

    /// Idle executors the Resource Pool tries to keep warm.
    #[serde(default = "d_num_idle_resources")]
    pub num_idle_resources: usize,

    /// Hard ceiling on total executors in the pool.
    #[serde(default = "d_max_resources")]
    pub max_resources: usize,

    #[serde(default = "d_initialize_timeout_s")]
    pub initialize_timeout_s: u64,

    #[serde(default = "d_close_timeout_s")]
    pub close_timeout_s: u64,

    #[serde(default = "d_ping_interval_s")]
    pub ping_interval_s: u64,

    /// Availability decisions reject once `load >= load_threshold` (spec §4.2).
    #[serde(default = "d_load_threshold")]
    pub load_threshold: f64,

    pub max_processes_override: Option<usize>,

    #[serde(default = "d_register")]
    pub register: bool,

    pub signaling_base_url: String,

    #[serde(default = "d_log_level")]
    pub log_level: String,

    /// Whether the pool additionally maintains one dedicated inference
    /// executor shared across jobs (spec §4.3 "Rationale").
    #[serde(default)]
    pub use_dedicated_inference_process: bool,
}

impl WorkerOptions {
    pub fn max_processes(&self) -> usize {
        self.max_processes_override.unwrap_or_else(d_max_processes)
    }

    /// Validate cross-field constraints the type system can't express.
    /// Mirrors the teacher's `Config::validate` (severity-tagged issue
    /// list rather than failing fast on the first problem).
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.agent_id.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "agent_id must not be empty".into(),
            });
        }
        if self.signaling_base_url.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "signaling_base_url must not be empty".into(),
            });
        }
        if self.auth_token.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                message: "auth_token is empty — the registry will likely reject registration".into(),
            });
        }
        if self.num_idle_resources > self.max_resources {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!(
                    "num_idle_resources ({}) exceeds max_resources ({})",
                    self.num_idle_resources, self.max_resources
                ),
            });
        }
        if !(0.0..=1.0).contains(&self.load_threshold) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: format!("load_threshold ({}) must be within 0.0..=1.0", self.load_threshold),
            });
        }
        if self.max_processes() == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                message: "max_processes must be greater than zero".into(),
            });
        }

        issues
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Warning => "warning",
            ConfigSeverity::Error => "error",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

/// Cascading-pipeline tunables named as constants in SPEC_FULL §4.5.
pub mod pipeline_tunables {
    use std::time::Duration;

    /// Wait timer after an EOU-false accumulated transcript (spec §4.5).
    pub const EOU_WAIT: Duration = Duration::from_millis(800);
    /// Soft deadline for graceful-cancel of collector/TTS tasks on barge-in.
    pub const BARGE_IN_GRACE: Duration = Duration::from_millis(500);
    /// Bounded channel capacity bridging the LLM token collector to the TTS
    /// consumer (spec §9 "Async generators").
    pub const LLM_TTS_CHANNEL_CAPACITY: usize = 50;
    /// Upper bound on tool-call round-trips within one response generation.
    pub const MAX_TOOL_LOOPS: usize = 8;
    /// Realtime pipeline's agent-speech-end finalization debounce window
    /// (spec §3 "Turn (Realtime)").
    pub const REALTIME_FINALIZE_DEBOUNCE: Duration = Duration::from_secs(1);

    // Text segmentation constants (spec §4.5, ported from the original's
    // `utils.py::segment_text`).
    pub const SEGMENT_DELIMITERS: &str = ".?!,;:\n";
    pub const SEGMENT_MIN_CHARS: usize = 50;
    pub const SEGMENT_MIN_WORDS: usize = 12;
    pub const SEGMENT_MAX_BUFFER: usize = 600;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_toml() {
        let toml_str = r#"
            agent_id = "agent-1"
            auth_token = "secret"
            signaling_base_url = "wss://registry.example/v1"
        "#;
        let opts: WorkerOptions = toml::from_str(toml_str).unwrap();
        assert_eq!(opts.num_idle_resources, 1);
        assert_eq!(opts.max_processes(), 10);
        assert!(opts.register);
    }

    #[test]
    fn validate_flags_empty_agent_id_as_error() {
        let toml_str = r#"
            agent_id = ""
            auth_token = "secret"
            signaling_base_url = "wss://registry.example/v1"
        "#;
        let opts: WorkerOptions = toml::from_str(toml_str).unwrap();
        let issues = opts.validate();
        assert!(issues.iter().any(|i| i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn validate_passes_on_well_formed_config() {
        let toml_str = r#"
            agent_id = "agent-1"
            auth_token = "secret"
            signaling_base_url = "wss://registry.example/v1"
        "#;
        let opts: WorkerOptions = toml::from_str(toml_str).unwrap();
        let issues = opts.validate();
        assert!(!issues.iter().any(|i| i.severity == ConfigSeverity::Error));
    }
}
