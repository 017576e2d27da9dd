//! Facial keypoints as produced by an external detector.

use crate::{
    constants::{EPSILON, NUM_FACE_KEYPOINTS},
    Error, Result,
};
use serde::{Deserialize, Serialize};

/// Image-plane coordinate in pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keypoint2D {
    pub x: f64,
    pub y: f64,
}

impl Keypoint2D {
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Keypoint2D {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// Order in which a detector reports its five points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeypointOrder {
    /// nose, left eye, right eye, left mouth, right mouth
    Canonical,
    /// left eye, right eye, nose, left mouth, right mouth (common 5-point detector layout)
    #[default]
    Detector,
}

/// The five landmarks of one detected face, plus an optional chin point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceKeypoints {
    pub nose: Keypoint2D,
    pub left_eye: Keypoint2D,
    pub right_eye: Keypoint2D,
    pub left_mouth: Keypoint2D,
    pub right_mouth: Keypoint2D,
    /// Not used by the pose solve
    pub chin: Option<Keypoint2D>,
}

impl FaceKeypoints {
    /// Build from points given in `order`. A sixth point, if present, is taken as the chin.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than five points are supplied or any coordinate is not finite.
    pub fn from_points(points: &[Keypoint2D], order: KeypointOrder) -> Result<Self> {
        if points.len() < NUM_FACE_KEYPOINTS {
            return Err(Error::InvalidInput(format!(
                "Expected at least {} keypoints, got {}",
                NUM_FACE_KEYPOINTS,
                points.len()
            )));
        }
        if let Some(bad) = points.iter().find(|p| !p.is_finite()) {
            return Err(Error::InvalidInput(format!(
                "Non-finite keypoint ({}, {})",
                bad.x, bad.y
            )));
        }

        let canonical = &points[..NUM_FACE_KEYPOINTS];
        let coincident = canonical
            .iter()
            .all(|p| (p.x - canonical[0].x).abs() < EPSILON && (p.y - canonical[0].y).abs() < EPSILON);
        if coincident {
            return Err(Error::InvalidInput("Degenerate keypoints: all points coincide".to_string()));
        }

        let (nose, left_eye, right_eye) = match order {
            KeypointOrder::Canonical => (points[0], points[1], points[2]),
            KeypointOrder::Detector => (points[2], points[0], points[1]),
        };

        Ok(Self {
            nose,
            left_eye,
            right_eye,
            left_mouth: points[3],
            right_mouth: points[4],
            chin: points.get(NUM_FACE_KEYPOINTS).copied(),
        })
    }

    /// Points in the same order as the canonical 3D face model
    #[must_use]
    pub fn canonical(&self) -> [Keypoint2D; NUM_FACE_KEYPOINTS] {
        [self.nose, self.left_eye, self.right_eye, self.left_mouth, self.right_mouth]
    }
}

/// Width and height of the frame the keypoints came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}
