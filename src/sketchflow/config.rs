//! Runtime configuration for sketchflow.
//!
//! Provides the [`RuntimeConfig`] struct read from environment variables.
//! Users can also construct it manually; no config-file parsing
//! dependencies are introduced.
//!
//! # Environment switches
//!
//! | Variable | Meaning |
//! |---|---|
//! | `SKETCHFLOW_DATA_DIR` | Base directory for uploads, history, logs |
//! | `SKETCHFLOW_USE_MCP` | Truthy → dispatch tools through the remote MCP bridge |
//! | `SKETCHFLOW_MCP_URL` | Remote MCP endpoint |
//! | `SKETCHFLOW_MCP_TIMEOUT` | Per-call MCP deadline in seconds |
//! | `SKETCHFLOW_TOKENS_LOG_FILE` | Append-only token usage log |
//! | `SKETCHFLOW_TOKENS_FILE` | Rolling token usage summary |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Default remote MCP endpoint, matching the local development server.
pub const DEFAULT_MCP_URL: &str = "http://127.0.0.1:8000/mcp";

/// Default per-call deadline for MCP initialize/list/call.
pub const DEFAULT_MCP_TIMEOUT_SECS: f64 = 120.0;

/// Global runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Base directory for uploads, analysis history, and usage logs.
    pub data_dir: PathBuf,
    /// Transport mode: `true` routes tool dispatch through the MCP bridge.
    pub use_mcp: bool,
    /// Remote MCP endpoint URL.
    pub mcp_url: String,
    /// Per-call deadline applied to each MCP operation.
    pub mcp_timeout: Duration,
    /// Append-only token usage log file. `None` falls back to
    /// `<data_dir>/tokens_usage.json`.
    pub tokens_log_file: Option<PathBuf>,
    /// Rolling token usage summary file. `None` falls back to
    /// `<data_dir>/tokens.json`.
    pub tokens_summary_file: Option<PathBuf>,
}

impl RuntimeConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let data_dir = env::var("SKETCHFLOW_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".sketchflow"));
        let use_mcp = env::var("SKETCHFLOW_USE_MCP")
            .map(|v| truthy(&v))
            .unwrap_or(false);
        let mcp_url =
            env::var("SKETCHFLOW_MCP_URL").unwrap_or_else(|_| DEFAULT_MCP_URL.to_string());
        let timeout_secs = env::var("SKETCHFLOW_MCP_TIMEOUT")
            .ok()
            .and_then(|v| v.parse::<f64>().ok())
            .unwrap_or(DEFAULT_MCP_TIMEOUT_SECS);
        Self {
            data_dir,
            use_mcp,
            mcp_url,
            mcp_timeout: Duration::from_secs_f64(timeout_secs),
            tokens_log_file: env::var("SKETCHFLOW_TOKENS_LOG_FILE").ok().map(PathBuf::from),
            tokens_summary_file: env::var("SKETCHFLOW_TOKENS_FILE").ok().map(PathBuf::from),
        }
    }

    /// Directory where uploaded files are saved.
    pub fn uploads_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }

    /// Effective token usage log path.
    pub fn tokens_log_path(&self) -> PathBuf {
        self.tokens_log_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tokens_usage.json"))
    }

    /// Effective token usage summary path.
    pub fn tokens_summary_path(&self) -> PathBuf {
        self.tokens_summary_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("tokens.json"))
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".sketchflow"),
            use_mcp: false,
            mcp_url: DEFAULT_MCP_URL.to_string(),
            mcp_timeout: Duration::from_secs_f64(DEFAULT_MCP_TIMEOUT_SECS),
            tokens_log_file: None,
            tokens_summary_file: None,
        }
    }
}

fn truthy(value: &str) -> bool {
    !matches!(value.to_ascii_lowercase().as_str(), "" | "0" | "false" | "no")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_matches_python_semantics() {
        assert!(!truthy("0"));
        assert!(!truthy("false"));
        assert!(!truthy("no"));
        assert!(!truthy(""));
        assert!(truthy("1"));
        assert!(truthy("true"));
        assert!(truthy("anything"));
    }

    #[test]
    fn default_paths_derive_from_data_dir() {
        let config = RuntimeConfig::default();
        assert_eq!(config.uploads_dir(), PathBuf::from(".sketchflow/uploads"));
        assert_eq!(
            config.tokens_log_path(),
            PathBuf::from(".sketchflow/tokens_usage.json")
        );
    }
}
