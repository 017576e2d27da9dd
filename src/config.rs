//! Configuration management for the edge agent and the collector

use crate::{
    batcher::OverflowPolicy,
    constants::{
        DEFAULT_CONVERGENCE_EPSILON, DEFAULT_DATA_DIR, DEFAULT_FLUSH_INTERVAL_MS, DEFAULT_LISTEN_ADDR,
        DEFAULT_MAX_ITERATIONS, DEFAULT_MAX_PENDING_SIGNALS, DEFAULT_MAX_PREVIEW_LIMIT,
        DEFAULT_MAX_REPROJECTION_ERROR_PX, DEFAULT_PITCH_LIMIT_DEG, DEFAULT_PITCH_WEIGHT, DEFAULT_PREVIEW_LIMIT,
        DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_SERVER_TIMEOUT_MS, DEFAULT_YAW_LIMIT_DEG, DEFAULT_YAW_WEIGHT,
        DEFAULT_ZONE_ID,
    },
    Error, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Edge agent upload settings
    pub edge: EdgeConfig,

    /// Pose solver settings
    pub pose: PoseConfig,

    /// Attention scoring thresholds and weights
    pub attention: AttentionConfig,

    /// Collector service settings
    pub collector: CollectorConfig,
}

/// Edge agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Base URL of the collector, e.g. `http://127.0.0.1:8000`
    pub api_base: String,

    /// Session the signals belong to
    pub session_id: String,

    /// Flush cadence in milliseconds
    pub flush_interval_ms: u64,

    /// Upper bound on a single upload request
    pub request_timeout_ms: u64,

    /// Maximum signals held while the collector is unreachable
    pub max_pending: usize,

    /// What to do when `max_pending` is reached
    pub overflow_policy: OverflowPolicy,

    /// Zone used when the keypoint source does not provide one
    pub default_zone: String,

    /// Faces per row for grid zone assignment; fixed zone when unset
    pub grid_columns: Option<usize>,
}

/// Pose solver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    /// Optional 3D face model file (15 values, one per line)
    pub face_model_3d: Option<PathBuf>,

    /// Iteration cap per solver start
    pub max_iterations: usize,

    /// Step and gradient tolerance
    pub convergence_epsilon: f64,

    /// Solutions with a larger RMS reprojection error are discarded
    pub max_reprojection_error_px: f64,
}

/// Attention scoring configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttentionConfig {
    /// Absolute yaw at which the yaw score reaches zero
    pub yaw_limit_deg: f64,

    /// Absolute pitch at which the pitch score reaches zero
    pub pitch_limit_deg: f64,

    /// Weight of the yaw score
    pub yaw_weight: f64,

    /// Weight of the pitch score
    pub pitch_weight: f64,
}

/// Collector service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Socket address to listen on
    pub listen_addr: String,

    /// Directory holding one NDJSON log per session
    pub data_dir: PathBuf,

    /// Records returned by preview when no limit is given
    pub default_preview_limit: usize,

    /// Largest limit a preview request may ask for
    pub max_preview_limit: usize,

    /// Server-side bound on a single request
    pub request_timeout_ms: u64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            api_base: format!("http://{DEFAULT_LISTEN_ADDR}"),
            session_id: "demo-101".to_string(),
            flush_interval_ms: DEFAULT_FLUSH_INTERVAL_MS,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            max_pending: DEFAULT_MAX_PENDING_SIGNALS,
            overflow_policy: OverflowPolicy::DropOldest,
            default_zone: DEFAULT_ZONE_ID.to_string(),
            grid_columns: None,
        }
    }
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            face_model_3d: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence_epsilon: DEFAULT_CONVERGENCE_EPSILON,
            max_reprojection_error_px: DEFAULT_MAX_REPROJECTION_ERROR_PX,
        }
    }
}

impl Default for AttentionConfig {
    fn default() -> Self {
        Self {
            yaw_limit_deg: DEFAULT_YAW_LIMIT_DEG,
            pitch_limit_deg: DEFAULT_PITCH_LIMIT_DEG,
            yaw_weight: DEFAULT_YAW_WEIGHT,
            pitch_weight: DEFAULT_PITCH_WEIGHT,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            default_preview_limit: DEFAULT_PREVIEW_LIMIT,
            max_preview_limit: DEFAULT_MAX_PREVIEW_LIMIT,
            request_timeout_ms: DEFAULT_SERVER_TIMEOUT_MS,
        }
    }
}

impl EdgeConfig {
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate edge settings
    pub fn validate(&self) -> Result<()> {
        if self.api_base.is_empty() {
            return Err(Error::ConfigError("API base URL must not be empty".to_string()));
        }
        crate::signal::validate_session_id(&self.session_id)
            .map_err(|e| Error::ConfigError(format!("Invalid session id: {e}")))?;
        if self.flush_interval_ms == 0 {
            return Err(Error::ConfigError("Flush interval must be greater than 0".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::ConfigError("Request timeout must be greater than 0".to_string()));
        }
        if self.request_timeout_ms > self.flush_interval_ms.saturating_mul(10) {
            log::warn!(
                "Request timeout {}ms is long compared to flush interval {}ms",
                self.request_timeout_ms,
                self.flush_interval_ms
            );
        }
        if self.max_pending == 0 {
            return Err(Error::ConfigError("Max pending signals must be greater than 0".to_string()));
        }
        if self.default_zone.is_empty() {
            return Err(Error::ConfigError("Default zone must not be empty".to_string()));
        }
        if self.grid_columns == Some(0) {
            return Err(Error::ConfigError("Grid columns must be greater than 0".to_string()));
        }
        Ok(())
    }
}

impl PoseConfig {
    /// Validate solver settings
    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            return Err(Error::ConfigError("Max iterations must be greater than 0".to_string()));
        }
        if !(self.convergence_epsilon.is_finite() && self.convergence_epsilon > 0.0) {
            return Err(Error::ConfigError("Convergence epsilon must be positive".to_string()));
        }
        if !(self.max_reprojection_error_px > 0.0) {
            return Err(Error::ConfigError(
                "Max reprojection error must be positive".to_string(),
            ));
        }
        if let Some(path) = &self.face_model_3d {
            if !path.exists() {
                return Err(Error::ConfigError(format!(
                    "3D face model not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }
}

impl AttentionConfig {
    /// Validate thresholds and weights
    pub fn validate(&self) -> Result<()> {
        for (name, limit) in [("Yaw", self.yaw_limit_deg), ("Pitch", self.pitch_limit_deg)] {
            if !(limit.is_finite() && limit > 0.0) {
                return Err(Error::ConfigError(format!("{name} limit must be positive, got {limit}")));
            }
        }
        for (name, weight) in [("Yaw", self.yaw_weight), ("Pitch", self.pitch_weight)] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(Error::ConfigError(format!(
                    "{name} weight must be non-negative, got {weight}"
                )));
            }
        }
        Ok(())
    }
}

impl CollectorConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Validate collector settings
    pub fn validate(&self) -> Result<()> {
        if self.listen_addr.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::ConfigError(format!(
                "Invalid listen address: {}",
                self.listen_addr
            )));
        }
        if self.max_preview_limit == 0 {
            return Err(Error::ConfigError("Max preview limit must be greater than 0".to_string()));
        }
        if self.default_preview_limit > self.max_preview_limit {
            return Err(Error::ConfigError(
                "Default preview limit must not exceed the maximum".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(Error::ConfigError("Request timeout must be greater than 0".to_string()));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;

        serde_yaml::from_str(&content).map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Save configuration to a YAML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.edge.validate()?;
        self.pose.validate()?;
        self.attention.validate()?;
        self.collector.validate()
    }
}

/// Example configuration file content
pub const EXAMPLE_CONFIG: &str = r#"# Attention signal pipeline configuration

# Edge agent
edge:
  api_base: "http://127.0.0.1:8000"
  session_id: "demo-101"
  flush_interval_ms: 700
  request_timeout_ms: 2000
  max_pending: 10000
  overflow_policy: "drop_oldest"
  default_zone: "all"

# Pose solver
pose:
  max_iterations: 100
  convergence_epsilon: 1.0e-9
  max_reprojection_error_px: 25.0

# Attention scoring
attention:
  yaw_limit_deg: 30.0
  pitch_limit_deg: 35.0
  yaw_weight: 0.6
  pitch_weight: 0.4

# Collector service
collector:
  listen_addr: "127.0.0.1:8000"
  data_dir: "data"
  default_preview_limit: 5
  max_preview_limit: 1000
  request_timeout_ms: 5000
"#;
