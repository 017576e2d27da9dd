//! Mapping a detected face to the spatial bucket its signal is filed under.
//!
//! Detection order carries no identity, so these are placement heuristics rather
//! than tracking. A deployment with seat maps can supply its own [`ZoneAssigner`].

use crate::keypoints::FaceKeypoints;

/// Chooses the zone id for the `face_index`-th face of a frame
pub trait ZoneAssigner: Send + Sync {
    fn assign(&self, face_index: usize, face: &FaceKeypoints) -> String;
}

/// Every face goes to the same zone
#[derive(Debug, Clone)]
pub struct FixedZone(pub String);

impl ZoneAssigner for FixedZone {
    fn assign(&self, _face_index: usize, _face: &FaceKeypoints) -> String {
        self.0.clone()
    }
}

/// Row-major grid over detection order: `row{i / columns}_col{i % columns}`
#[derive(Debug, Clone, Copy)]
pub struct GridZone {
    columns: usize,
}

impl GridZone {
    #[must_use]
    pub fn new(columns: usize) -> Self {
        Self {
            columns: columns.max(1),
        }
    }
}

impl ZoneAssigner for GridZone {
    fn assign(&self, face_index: usize, _face: &FaceKeypoints) -> String {
        format!("row{}_col{}", face_index / self.columns, face_index % self.columns)
    }
}
