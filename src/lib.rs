//! Attention signals from head pose, delivered to an append-only collector.
//!
//! The edge side of the pipeline works on facial keypoints produced by an external
//! detector:
//! 1. Head pose (yaw, pitch) is recovered with an iterative `PnP` (Perspective-n-Point)
//!    solve against a fixed five-point face model and a camera approximated from the
//!    frame size
//! 2. The pose is mapped to a gaze-to-board probability
//! 3. Signals are queued per session and flushed to the collector on a fixed cadence,
//!    retrying on network failure
//!
//! The collector side validates batches and appends every signal as one line of a
//! per-session NDJSON log.
//!
//! # Examples
//!
//! ## Scoring a face
//!
//! ```no_run
//! use classvision::{
//!     attention::AttentionScorer,
//!     config::PoseConfig,
//!     keypoints::{FaceKeypoints, FrameSize, Keypoint2D, KeypointOrder},
//!     pose_estimation::PoseEstimator,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let estimator = PoseEstimator::new(PoseConfig::default())?;
//! let scorer = AttentionScorer::default();
//!
//! // left eye, right eye, nose, left mouth, right mouth
//! let points = [(290.0, 200.0), (350.0, 200.0), (320.0, 235.0), (298.0, 270.0), (342.0, 270.0)]
//!     .map(Keypoint2D::from);
//! let face = FaceKeypoints::from_points(&points, KeypointOrder::Detector)?;
//!
//! if let Some(pose) = estimator.estimate(&face, FrameSize::new(640, 480))? {
//!     let attention = scorer.score_pose(Some(&pose));
//!     println!("Yaw: {:.1}°, Pitch: {:.1}°, attention {}", pose.yaw_degrees, pose.pitch_degrees, attention);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Uploading signals
//!
//! ```no_run
//! use classvision::{
//!     batcher::{OverflowPolicy, SignalBatcher},
//!     signal::Signal,
//!     uploader::{HttpTransport, UploadWorker, Uploader},
//! };
//! use std::{sync::Arc, time::Duration};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let batcher = Arc::new(SignalBatcher::new(10_000, OverflowPolicy::DropOldest));
//! let transport = Arc::new(HttpTransport::new("http://127.0.0.1:8000", Duration::from_secs(2))?);
//! let uploader = Uploader::new("demo-101", batcher.clone(), transport, Duration::from_millis(700));
//! let worker = UploadWorker::spawn(uploader)?;
//!
//! batcher.append(Signal::new(1_700_000_000.0, "all"));
//!
//! let stats = worker.shutdown();
//! println!("Delivered {} signals", stats.delivered);
//! # Ok(())
//! # }
//! ```

/// Facial keypoints and frame geometry
pub mod keypoints;

/// Head pose estimation module using `PnP` algorithm
pub mod pose_estimation;

/// Orientation to attention probability
pub mod attention;

/// Signal records and wire types
pub mod signal;

/// Zone assignment for detected faces
pub mod zones;

/// Bounded per-session signal buffer
pub mod batcher;

/// Timed upload with retry
pub mod uploader;

/// Session-scoped buffers and upload workers
pub mod session;

/// Main application module
pub mod app;

/// Collection service
pub mod collector;

/// Error types and result handling
pub mod error;

/// Constants used throughout the application
pub mod constants;

/// Configuration management
pub mod config;

pub use error::{Error, Result};
