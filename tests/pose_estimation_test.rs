//! Pose recovery and attention scoring on synthesized keypoints


use classvision::{
    attention::AttentionScorer,
    config::PoseConfig,
    keypoints::{FaceKeypoints, Keypoint2D, KeypointOrder},
    pose_estimation::PoseEstimator,
    Result,
};
use nalgebra::{Rotation3, Vector3};
use test_helpers::{project_face, synthesize_face, FRAME};

fn estimator() -> PoseEstimator {
    PoseEstimator::new(PoseConfig::default()).expect("default config is valid")
}

#[test]
fn test_identity_pose_scores_full_attention() -> Result<()> {
    let points = project_face(&Rotation3::identity(), Vector3::new(0.0, 0.0, 500.0));
    let face = FaceKeypoints::from_points(&points, KeypointOrder::Canonical)?;

    let pose = estimator().estimate(&face, FRAME)?.expect("solve should converge");
    assert!(pose.yaw_degrees.abs() < 1e-3, "yaw = {}", pose.yaw_degrees);
    assert!(pose.pitch_degrees.abs() < 1e-3, "pitch = {}", pose.pitch_degrees);

    let attention = AttentionScorer::default().score_pose(Some(&pose));
    assert!((attention.value() - 1.0).abs() < 1e-4);
    Ok(())
}

#[test]
fn test_rotated_poses_recovered() -> Result<()> {
    let estimator = estimator();
    let cases = [(20.0, 10.0, 0.0), (-15.0, 5.0, 0.0), (8.0, -12.0, 0.0), (25.0, 0.0, 180.0), (-10.0, 15.0, 180.0)];

    for (yaw, pitch, roll) in cases {
        let face = synthesize_face(yaw, pitch, roll);
        let pose = estimator
            .estimate(&face, FRAME)?
            .unwrap_or_else(|| panic!("no estimate for yaw {yaw} pitch {pitch} roll {roll}"));
        assert!(
            (pose.yaw_degrees - yaw).abs() < 0.1,
            "yaw: expected {yaw}, got {}",
            pose.yaw_degrees
        );
        assert!(
            (pose.pitch_degrees - pitch).abs() < 0.1,
            "pitch: expected {pitch}, got {}",
            pose.pitch_degrees
        );
    }
    Ok(())
}

#[test]
fn test_frontal_face_in_detector_order() -> Result<()> {
    // Image y grows downward, so a camera-facing head is a half turn about X
    let face = synthesize_face(0.0, 0.0, 180.0);
    let [nose, left_eye, right_eye, left_mouth, right_mouth] = face.canonical();
    let detector_points = [left_eye, right_eye, nose, left_mouth, right_mouth];
    let face = FaceKeypoints::from_points(&detector_points, KeypointOrder::Detector)?;

    let pose = estimator().estimate(&face, FRAME)?.expect("solve should converge");
    let attention = AttentionScorer::default().score_pose(Some(&pose));
    assert!(attention.value() > 0.99, "attention = {attention}");
    Ok(())
}

#[test]
fn test_in_plane_angle_stable_under_noise() -> Result<()> {
    let clean = synthesize_face(15.0, 0.0, 180.0);
    let offsets = [(0.3, -0.2), (-0.25, 0.3), (0.2, 0.25), (-0.3, -0.1), (0.1, -0.3)];
    let noisy: Vec<Keypoint2D> = clean
        .canonical()
        .iter()
        .zip(offsets)
        .map(|(p, (dx, dy))| Keypoint2D::new(p.x + dx, p.y + dy))
        .collect();
    let face = FaceKeypoints::from_points(&noisy, KeypointOrder::Canonical)?;

    let pose = estimator().estimate(&face, FRAME)?.expect("solve should converge");
    assert!((pose.yaw_degrees - 15.0).abs() < 2.0, "yaw = {}", pose.yaw_degrees);
    assert!(pose.reprojection_error < 1.0);
    Ok(())
}

#[test]
fn test_collinear_keypoints_do_not_panic() -> Result<()> {
    let points: Vec<Keypoint2D> = (0..5).map(|i| Keypoint2D::new(300.0 + 10.0 * f64::from(i), 240.0)).collect();
    let face = FaceKeypoints::from_points(&points, KeypointOrder::Canonical)?;
    if let Some(pose) = estimator().estimate(&face, FRAME)? {
        assert!(pose.yaw_degrees.is_finite());
        assert!(pose.pitch_degrees.is_finite());
    }
    Ok(())
}

#[test]
fn test_model_file_overrides_builtin_points() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("model.txt");
    let values: Vec<String> = [0.0, 0.0, 0.0, -30.0, 32.0, -30.0, 30.0, 32.0, -30.0, -25.0, -28.0, -24.0, 25.0, -28.0, -24.0]
        .iter()
        .map(|v| format!("{v}"))
        .collect();
    std::fs::write(&path, values.join("\n"))?;

    let from_file = PoseEstimator::from_model_file(&path, PoseConfig::default())?;
    assert_eq!(from_file.model_points(), estimator().model_points());

    std::fs::write(&path, "1.0\n2.0\n")?;
    assert!(PoseEstimator::from_model_file(&path, PoseConfig::default()).is_err());
    Ok(())
}
