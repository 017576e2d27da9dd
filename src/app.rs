//! Edge agent: turns keypoint frames into queued attention signals.

use crate::{
    attention::AttentionScorer,
    batcher::{AppendOutcome, SignalBatcher},
    config::Config,
    error::Result,
    keypoints::{FaceKeypoints, FrameSize, Keypoint2D, KeypointOrder},
    pose_estimation::PoseEstimator,
    session::SessionRegistry,
    signal::Signal,
    uploader::{Transport, UploadStats},
    zones::{FixedZone, GridZone, ZoneAssigner},
    Error,
};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::io::BufRead;
use std::sync::Arc;
use std::time::Instant;

/// One face as reported by the external keypoint detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceObservation {
    /// Five `[x, y]` points, optionally followed by a chin point
    pub keypoints: Vec<[f64; 2]>,
    #[serde(default)]
    pub order: KeypointOrder,
    /// Zone chosen upstream; overrides the configured assigner
    #[serde(default)]
    pub zone_id: Option<String>,
}

/// Detector output for one captured frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeypointFrame {
    pub width: u32,
    pub height: u32,
    /// Capture time in Unix seconds; filled in on arrival when absent
    #[serde(default)]
    pub ts: Option<f64>,
    #[serde(default)]
    pub faces: Vec<FaceObservation>,
}

/// Supplies keypoint frames to the edge loop
pub trait FrameSource {
    /// Next frame, or `None` at end of stream
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying stream fails or a frame cannot be decoded
    fn next_frame(&mut self) -> Result<Option<KeypointFrame>>;
}

/// Reads one JSON frame per line; blank lines are ignored
pub struct NdjsonFrameSource<R> {
    reader: R,
    line: String,
    line_number: usize,
}

impl<R: BufRead> NdjsonFrameSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line: String::new(),
            line_number: 0,
        }
    }
}

impl<R: BufRead> FrameSource for NdjsonFrameSource<R> {
    fn next_frame(&mut self) -> Result<Option<KeypointFrame>> {
        loop {
            self.line.clear();
            if self.reader.read_line(&mut self.line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            return serde_json::from_str(trimmed)
                .map(Some)
                .map_err(|e| Error::InvalidInput(format!("Frame on line {}: {e}", self.line_number)));
        }
    }
}

/// Pose, score and zone for every face of a frame
pub struct FramePipeline {
    estimator: PoseEstimator,
    scorer: AttentionScorer,
    zones: Box<dyn ZoneAssigner>,
}

impl FramePipeline {
    #[must_use]
    pub fn new(estimator: PoseEstimator, scorer: AttentionScorer, zones: Box<dyn ZoneAssigner>) -> Self {
        Self {
            estimator,
            scorer,
            zones,
        }
    }

    /// Build the pipeline described by `config`
    ///
    /// # Errors
    ///
    /// Returns an error if the pose or attention settings are invalid or the face model cannot be read
    pub fn from_config(config: &Config) -> Result<Self> {
        let estimator = match &config.pose.face_model_3d {
            Some(path) => PoseEstimator::from_model_file(path, config.pose.clone())?,
            None => PoseEstimator::new(config.pose.clone())?,
        };
        let scorer = AttentionScorer::new(config.attention)?;
        let zones: Box<dyn ZoneAssigner> = match config.edge.grid_columns {
            Some(columns) => Box::new(GridZone::new(columns)),
            None => Box::new(FixedZone(config.edge.default_zone.clone())),
        };
        Ok(Self::new(estimator, scorer, zones))
    }

    /// Signals for every face whose pose could be solved. Faces with bad keypoints
    /// or a non-converging solve contribute nothing.
    pub fn process(&self, frame: &KeypointFrame, timestamp: f64) -> Vec<Signal> {
        let size = FrameSize::new(frame.width, frame.height);
        let mut signals = Vec::with_capacity(frame.faces.len());

        for (index, observation) in frame.faces.iter().enumerate() {
            let points: Vec<Keypoint2D> = observation.keypoints.iter().map(|&[x, y]| Keypoint2D::new(x, y)).collect();
            let face = match FaceKeypoints::from_points(&points, observation.order) {
                Ok(face) => face,
                Err(e) => {
                    debug!("Skipping face {}: {}", index, e);
                    continue;
                }
            };

            let pose = match self.estimator.estimate(&face, size) {
                Ok(Some(pose)) => pose,
                Ok(None) => {
                    debug!("Skipping face {}: pose did not converge", index);
                    continue;
                }
                Err(e) => {
                    warn!("Skipping face {}: {}", index, e);
                    continue;
                }
            };

            let zone_id = observation
                .zone_id
                .clone()
                .filter(|z| !z.is_empty())
                .unwrap_or_else(|| self.zones.assign(index, &face));

            let mut signal = Signal::new(timestamp, zone_id);
            signal.head_pose_yaw = Some(pose.yaw_degrees);
            signal.head_pose_pitch = Some(pose.pitch_degrees);
            signal.gaze_to_board_prob = Some(self.scorer.score_pose(Some(&pose)));
            signals.push(signal);
        }

        signals
    }
}

/// Frame loop counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames: u64,
    pub bad_frames: u64,
    pub faces: u64,
    pub signals: u64,
    pub overflowed: u64,
}

/// Edge frame loop: scores frames and feeds one session's upload worker
pub struct EdgeApp {
    pipeline: FramePipeline,
    registry: SessionRegistry,
    session_id: String,
    batcher: Arc<SignalBatcher>,
    summary: RunSummary,
}

impl EdgeApp {
    /// Create the edge application and start uploading for the configured session
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or the upload worker cannot start
    pub fn new(config: &Config, transport: Arc<dyn Transport>) -> Result<Self> {
        info!("Initializing edge agent for session {}", config.edge.session_id);
        config.edge.validate()?;

        let pipeline = FramePipeline::from_config(config)?;
        let mut registry = SessionRegistry::new(config.edge.clone(), transport);
        let batcher = registry.open(&config.edge.session_id)?;

        Ok(Self {
            pipeline,
            registry,
            session_id: config.edge.session_id.clone(),
            batcher,
            summary: RunSummary::default(),
        })
    }

    /// Score one frame and queue its signals. Returns the number queued.
    pub fn process_frame(&mut self, frame: &KeypointFrame) -> usize {
        let timestamp = frame.ts.unwrap_or_else(unix_now);
        let signals = self.pipeline.process(frame, timestamp);

        self.summary.frames += 1;
        self.summary.faces += frame.faces.len() as u64;

        let mut queued = 0;
        for signal in signals {
            match self.batcher.append(signal) {
                AppendOutcome::Queued => queued += 1,
                AppendOutcome::DroppedOldest => {
                    queued += 1;
                    self.summary.overflowed += 1;
                }
                AppendOutcome::Rejected => self.summary.overflowed += 1,
            }
        }
        self.summary.signals += queued as u64;
        queued
    }

    /// Consume frames until the source is exhausted. Undecodable frames are skipped.
    ///
    /// # Errors
    ///
    /// Returns an error only if the source itself fails to read
    pub fn run(&mut self, source: &mut dyn FrameSource) -> Result<RunSummary> {
        let started = Instant::now();
        loop {
            match source.next_frame() {
                Ok(Some(frame)) => {
                    self.process_frame(&frame);
                }
                Ok(None) => break,
                Err(Error::InvalidInput(msg)) => {
                    self.summary.bad_frames += 1;
                    warn!("{}", msg);
                }
                Err(e) => return Err(e),
            }
        }

        let fps = self.summary.frames as f64 / started.elapsed().as_secs_f64().max(f64::EPSILON);
        info!(
            "Session {}: {} frames ({:.1} fps), {} faces, {} signals, {} pending",
            self.session_id,
            self.summary.frames,
            fps,
            self.summary.faces,
            self.summary.signals,
            self.batcher.len()
        );
        if self.summary.overflowed > 0 {
            warn!(
                "Session {}: {} signals lost to the pending limit",
                self.session_id, self.summary.overflowed
            );
        }
        Ok(self.summary)
    }

    #[must_use]
    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.batcher.len()
    }

    /// Final flush for the session and its upload totals
    pub fn shutdown(mut self) -> UploadStats {
        self.registry.close(&self.session_id).unwrap_or_default()
    }
}

fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1e6
}
