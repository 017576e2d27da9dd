//! Constants used throughout the pipeline

/// Number of keypoints consumed by the pose solve
pub const NUM_FACE_KEYPOINTS: usize = 5;

/// Canonical 3D face model in millimetres, face-centred.
/// Order: nose tip, left eye outer, right eye outer, left mouth corner, right mouth corner.
pub const MODEL_POINTS_3D: [[f64; 3]; NUM_FACE_KEYPOINTS] = [
    [0.0, 0.0, 0.0],
    [-30.0, 32.0, -30.0],
    [30.0, 32.0, -30.0],
    [-25.0, -28.0, -24.0],
    [25.0, -28.0, -24.0],
];

/// Camera matrix center factor
pub const CAMERA_CENTER_FACTOR: f64 = 2.0;

/// Pose solver defaults
pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_CONVERGENCE_EPSILON: f64 = 1e-9;
pub const DEFAULT_MAX_REPROJECTION_ERROR_PX: f64 = 25.0;

/// Levenberg-Marquardt damping bounds
pub const LM_INITIAL_LAMBDA: f64 = 1e-3;
pub const LM_MAX_LAMBDA: f64 = 1e12;

/// Central difference step for the numeric Jacobian
pub const JACOBIAN_STEP: f64 = 1e-6;

/// Attention scoring defaults
pub const DEFAULT_YAW_LIMIT_DEG: f64 = 30.0;
pub const DEFAULT_PITCH_LIMIT_DEG: f64 = 35.0;
pub const DEFAULT_YAW_WEIGHT: f64 = 0.6;
pub const DEFAULT_PITCH_WEIGHT: f64 = 0.4;

/// Upload cadence and bounds
pub const DEFAULT_FLUSH_INTERVAL_MS: u64 = 700;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 2_000;
pub const DEFAULT_MAX_PENDING_SIGNALS: usize = 10_000;

/// Default zone when no assigner is configured
pub const DEFAULT_ZONE_ID: &str = "all";

/// Collector defaults
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8000";
pub const DEFAULT_DATA_DIR: &str = "data";
pub const DEFAULT_PREVIEW_LIMIT: usize = 5;
pub const DEFAULT_MAX_PREVIEW_LIMIT: usize = 1_000;
pub const DEFAULT_SERVER_TIMEOUT_MS: u64 = 5_000;
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Numeric precision epsilon
pub const EPSILON: f64 = 1e-10;
