//! Per-face attention signals and the wire types that carry them.

use crate::{constants::MAX_SESSION_ID_LEN, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A finite value in [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Probability(f64);

impl Probability {
    pub const ZERO: Self = Self(0.0);
    pub const ONE: Self = Self(1.0);

    /// # Errors
    ///
    /// Returns an error if `value` is not finite or lies outside [0, 1]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_finite() && (0.0..=1.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(Error::InvalidInput(format!("Probability must be in [0, 1], got {value}")))
        }
    }

    /// Clamp into [0, 1]; NaN maps to zero
    #[must_use]
    pub fn clamped(value: f64) -> Self {
        if value.is_nan() {
            Self::ZERO
        } else {
            Self(value.clamp(0.0, 1.0))
        }
    }

    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }
}

impl TryFrom<f64> for Probability {
    type Error = Error;

    fn try_from(value: f64) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Probability> for f64 {
    fn from(p: Probability) -> Self {
        p.0
    }
}

impl fmt::Display for Probability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}", self.0)
    }
}

/// One observation of one face at one instant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    /// Unix timestamp in seconds
    #[serde(rename = "ts", alias = "timestamp")]
    pub timestamp: f64,
    #[serde(default = "default_zone")]
    pub zone_id: String,
    #[serde(default)]
    pub head_pose_yaw: Option<f64>,
    #[serde(default)]
    pub head_pose_pitch: Option<f64>,
    #[serde(default)]
    pub gaze_to_board_prob: Option<Probability>,
    #[serde(default)]
    pub speaking_prob: Option<Probability>,
    #[serde(default)]
    pub hand_raise_prob: Option<Probability>,
    #[serde(default)]
    pub device_use_prob: Option<Probability>,
    #[serde(default)]
    pub motion_rate: Option<f64>,
    /// Idempotency key; the collector stores each id at most once per session
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_id: Option<Uuid>,
}

fn default_zone() -> String {
    crate::constants::DEFAULT_ZONE_ID.to_string()
}

impl Signal {
    /// New signal with a fresh idempotency key and no optional fields set
    #[must_use]
    pub fn new(timestamp: f64, zone_id: impl Into<String>) -> Self {
        Self {
            timestamp,
            zone_id: zone_id.into(),
            head_pose_yaw: None,
            head_pose_pitch: None,
            gaze_to_board_prob: None,
            speaking_prob: None,
            hand_raise_prob: None,
            device_use_prob: None,
            motion_rate: None,
            signal_id: Some(Uuid::new_v4()),
        }
    }

    /// Check the invariants that the type system does not already enforce
    ///
    /// # Errors
    ///
    /// Returns an error for an empty zone id or a non-finite numeric field
    pub fn validate(&self) -> Result<()> {
        if self.zone_id.is_empty() {
            return Err(Error::InvalidRequest("zone_id must not be empty".to_string()));
        }
        if !self.timestamp.is_finite() {
            return Err(Error::InvalidRequest(format!("non-finite timestamp {}", self.timestamp)));
        }
        for (name, value) in [
            ("head_pose_yaw", self.head_pose_yaw),
            ("head_pose_pitch", self.head_pose_pitch),
            ("motion_rate", self.motion_rate),
        ] {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(Error::InvalidRequest(format!("non-finite {name}")));
            }
        }
        Ok(())
    }
}

/// Body of `POST /v1/sessions/{session_id}/signals`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPayload {
    pub session_id: String,
    pub batch: Vec<Signal>,
}

/// Successful ingest response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    /// Records appended by this call
    pub written: usize,
    /// Signals skipped because their id was already stored
    #[serde(default)]
    pub duplicates: usize,
}

/// One line of a session log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    #[serde(flatten)]
    pub signal: Signal,
    pub session_id: String,
}

/// Session ids become file names, so they are kept to a conservative alphabet
///
/// # Errors
///
/// Returns an error if the id is empty, too long, or contains other characters
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() || session_id.len() > MAX_SESSION_ID_LEN {
        return Err(Error::InvalidRequest(format!(
            "session_id must be 1-{MAX_SESSION_ID_LEN} characters"
        )));
    }
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.');
    if !session_id.chars().all(allowed) || session_id.starts_with('.') {
        return Err(Error::InvalidRequest(format!(
            "session_id '{session_id}' contains unsupported characters"
        )));
    }
    Ok(())
}
