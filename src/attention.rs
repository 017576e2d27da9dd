//! Mapping from head orientation to a gaze-to-board probability.

use crate::{config::AttentionConfig, pose_estimation::PoseEstimate, signal::Probability, Result};

/// Scores how squarely a head faces the reference plane
#[derive(Debug, Clone, Copy)]
pub struct AttentionScorer {
    config: AttentionConfig,
}

impl AttentionScorer {
    /// # Errors
    ///
    /// Returns an error if a limit is not positive or a weight is negative
    pub fn new(config: AttentionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Score a pose estimate; no estimate scores zero
    #[must_use]
    pub fn score_pose(&self, pose: Option<&PoseEstimate>) -> Probability {
        self.score(pose.map(|p| p.yaw_degrees), pose.map(|p| p.pitch_degrees))
    }

    /// Unknown or non-finite angles are treated as "not attending" and score exactly 0.0
    #[must_use]
    pub fn score(&self, yaw_degrees: Option<f64>, pitch_degrees: Option<f64>) -> Probability {
        let (Some(yaw), Some(pitch)) = (
            yaw_degrees.filter(|v| v.is_finite()),
            pitch_degrees.filter(|v| v.is_finite()),
        ) else {
            return Probability::ZERO;
        };

        let yaw_score = (1.0 - yaw.abs() / self.config.yaw_limit_deg).max(0.0);
        let pitch_score = (1.0 - pitch.abs() / self.config.pitch_limit_deg).max(0.0);
        Probability::clamped(self.config.yaw_weight * yaw_score + self.config.pitch_weight * pitch_score)
    }
}

impl Default for AttentionScorer {
    fn default() -> Self {
        Self {
            config: AttentionConfig::default(),
        }
    }
}
