use crate::{
    config::PoseConfig,
    constants::{
        CAMERA_CENTER_FACTOR, EPSILON, JACOBIAN_STEP, LM_INITIAL_LAMBDA, LM_MAX_LAMBDA, MODEL_POINTS_3D,
        NUM_FACE_KEYPOINTS,
    },
    keypoints::{FaceKeypoints, FrameSize, Keypoint2D},
    Error, Result,
};
use nalgebra::{Matrix3, Rotation3, SMatrix, SVector, Vector3, Vector6};
use std::f64::consts::PI;
use std::fs;
use std::path::Path;

const NUM_RESIDUALS: usize = NUM_FACE_KEYPOINTS * 2;

type Residuals = SVector<f64, NUM_RESIDUALS>;
type Jacobian = SMatrix<f64, NUM_RESIDUALS, 6>;

/// Starting rotations for the solve. A real frontal face under the canonical model sits
/// near a half turn about X, so starting only from identity can stall in a mirrored minimum.
const INITIAL_ROTATIONS: [[f64; 3]; 4] = [[0.0, 0.0, 0.0], [PI, 0.0, 0.0], [0.0, PI, 0.0], [0.0, 0.0, PI]];

/// Pinhole camera approximated from frame geometry
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraModel {
    pub focal_length: f64,
    pub center_x: f64,
    pub center_y: f64,
}

impl CameraModel {
    /// Focal length equals the frame width, principal point at the frame center, no distortion
    ///
    /// # Errors
    ///
    /// Returns an error if either dimension is zero
    pub fn from_frame(frame: FrameSize) -> Result<Self> {
        if frame.width == 0 || frame.height == 0 {
            return Err(Error::InvalidInput(format!(
                "Frame size must be non-zero, got {}x{}",
                frame.width, frame.height
            )));
        }
        let width = f64::from(frame.width);
        let height = f64::from(frame.height);
        Ok(Self {
            focal_length: width,
            center_x: width / CAMERA_CENTER_FACTOR,
            center_y: height / CAMERA_CENTER_FACTOR,
        })
    }

    /// Intrinsic matrix
    #[must_use]
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focal_length, 0.0, self.center_x,
            0.0, self.focal_length, self.center_y,
            0.0, 0.0, 1.0,
        )
    }

    /// Project a model point under the given pose. `None` if it lands behind the camera.
    #[must_use]
    pub fn project(&self, rotation: &Rotation3<f64>, translation: &Vector3<f64>, point: &Vector3<f64>) -> Option<Keypoint2D> {
        let p = rotation * point + translation;
        if p.z <= EPSILON {
            return None;
        }
        Some(Keypoint2D::new(
            self.focal_length * p.x / p.z + self.center_x,
            self.focal_length * p.y / p.z + self.center_y,
        ))
    }
}

/// Head orientation recovered for one face
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseEstimate {
    pub yaw_degrees: f64,
    pub pitch_degrees: f64,
    /// RMS reprojection error in pixels
    pub reprojection_error: f64,
    pub iterations: usize,
}

struct PnpSolution {
    rotation: Rotation3<f64>,
    translation: Vector3<f64>,
    cost: f64,
    iterations: usize,
}

/// Head pose estimator using an iterative `PnP` solve against a fixed face model
pub struct PoseEstimator {
    model_points: [Vector3<f64>; NUM_FACE_KEYPOINTS],
    config: PoseConfig,
}

impl PoseEstimator {
    /// Create an estimator with the built-in canonical face model
    ///
    /// # Errors
    ///
    /// Returns an error if the solver configuration is invalid
    pub fn new(config: PoseConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            model_points: MODEL_POINTS_3D.map(|[x, y, z]| Vector3::new(x, y, z)),
            config,
        })
    }

    /// Create an estimator with 3D model points loaded from a text file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The model file cannot be read
    /// - The model file has an invalid format
    /// - The solver configuration is invalid
    pub fn from_model_file<P: AsRef<Path>>(model_path: P, config: PoseConfig) -> Result<Self> {
        log::info!("Loading face model from {}", model_path.as_ref().display());
        let content = fs::read_to_string(model_path)?;
        let model_points = Self::parse_model_points(&content)?;
        config.validate()?;
        Ok(Self { model_points, config })
    }

    /// Estimate (yaw, pitch) for one face. `Ok(None)` means the solve did not converge
    /// and the face should be skipped for this frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame size is zero
    pub fn estimate(&self, face: &FaceKeypoints, frame: FrameSize) -> Result<Option<PoseEstimate>> {
        // Rebuilt every frame; there is no persistent calibration
        let camera = CameraModel::from_frame(frame)?;
        let observed = face.canonical();

        let Some(solution) = self.solve_pnp(&camera, &observed) else {
            log::debug!("PnP solve did not converge for {}x{} frame", frame.width, frame.height);
            return Ok(None);
        };

        if solution.translation.z <= 0.0 {
            log::debug!("PnP solution behind camera (tz = {:.1})", solution.translation.z);
            return Ok(None);
        }

        let rms = (solution.cost / NUM_FACE_KEYPOINTS as f64).sqrt();
        if rms > self.config.max_reprojection_error_px {
            log::debug!(
                "Rejecting pose with RMS reprojection error {:.2}px (limit {:.2}px)",
                rms,
                self.config.max_reprojection_error_px
            );
            return Ok(None);
        }

        let (yaw_degrees, pitch_degrees) = Self::rotation_matrix_to_euler(solution.rotation.matrix());
        Ok(Some(PoseEstimate {
            yaw_degrees,
            pitch_degrees,
            reprojection_error: rms,
            iterations: solution.iterations,
        }))
    }

    /// Yaw and pitch in degrees. Roll is not extracted.
    #[must_use]
    pub fn rotation_matrix_to_euler(rotation_matrix: &Matrix3<f64>) -> (f64, f64) {
        let r = rotation_matrix;
        let yaw = r[(1, 0)].atan2(r[(0, 0)]);
        let pitch = (-r[(2, 0)]).atan2(r[(2, 1)].hypot(r[(2, 2)]));
        (yaw.to_degrees(), pitch.to_degrees())
    }

    /// Model points used by the solve, in canonical keypoint order
    #[must_use]
    pub fn model_points(&self) -> &[Vector3<f64>; NUM_FACE_KEYPOINTS] {
        &self.model_points
    }

    /// Multi-start Levenberg-Marquardt; keeps the lowest-cost converged solution
    fn solve_pnp(&self, camera: &CameraModel, observed: &[Keypoint2D; NUM_FACE_KEYPOINTS]) -> Option<PnpSolution> {
        INITIAL_ROTATIONS
            .iter()
            .filter_map(|rvec| {
                let start = self.initial_guess(camera, observed, Vector3::from(*rvec))?;
                self.refine(camera, observed, start)
            })
            .min_by(|a, b| a.cost.total_cmp(&b.cost))
    }

    /// Translation guess from centroid offset and apparent scale under a fixed rotation
    fn initial_guess(
        &self,
        camera: &CameraModel,
        observed: &[Keypoint2D; NUM_FACE_KEYPOINTS],
        rvec: Vector3<f64>,
    ) -> Option<Vector6<f64>> {
        let rotation = Rotation3::new(rvec);
        let rotated: Vec<Vector3<f64>> = self.model_points.iter().map(|p| rotation * p).collect();
        let n = NUM_FACE_KEYPOINTS as f64;

        let model_centroid = rotated.iter().sum::<Vector3<f64>>() / n;
        let (u_mean, v_mean) = observed
            .iter()
            .fold((0.0, 0.0), |(u, v), p| (u + p.x / n, v + p.y / n));

        let model_scale = rotated
            .iter()
            .map(|p| (p.x - model_centroid.x).hypot(p.y - model_centroid.y))
            .sum::<f64>()
            / n;
        let image_scale = observed
            .iter()
            .map(|p| (p.x - u_mean).hypot(p.y - v_mean))
            .sum::<f64>()
            / n;
        if image_scale < EPSILON || model_scale < EPSILON {
            return None;
        }

        let depth = camera.focal_length * model_scale / image_scale;
        let tz = depth - model_centroid.z;
        let tx = (u_mean - camera.center_x) * depth / camera.focal_length - model_centroid.x;
        let ty = (v_mean - camera.center_y) * depth / camera.focal_length - model_centroid.y;

        Some(Vector6::new(rvec.x, rvec.y, rvec.z, tx, ty, tz))
    }

    fn refine(
        &self,
        camera: &CameraModel,
        observed: &[Keypoint2D; NUM_FACE_KEYPOINTS],
        mut params: Vector6<f64>,
    ) -> Option<PnpSolution> {
        let eps = self.config.convergence_epsilon;
        let mut residuals = self.residuals(camera, observed, &params)?;
        let mut cost = residuals.norm_squared();
        let mut lambda = LM_INITIAL_LAMBDA;
        let mut converged = false;
        let mut iterations = 0;

        while iterations < self.config.max_iterations && !converged {
            iterations += 1;
            if cost <= eps * eps {
                converged = true;
                break;
            }

            let jacobian = self.jacobian(camera, observed, &params)?;
            let jtj = jacobian.transpose() * jacobian;
            let gradient = jacobian.transpose() * residuals;
            if gradient.amax() <= eps {
                converged = true;
                break;
            }

            loop {
                let mut damped = jtj;
                for k in 0..6 {
                    damped[(k, k)] += lambda * jtj[(k, k)].max(EPSILON);
                }
                let step = damped.cholesky().map(|c| c.solve(&(-gradient)));

                let accepted = step.and_then(|delta| {
                    let candidate = params + delta;
                    let r = self.residuals(camera, observed, &candidate)?;
                    let candidate_cost = r.norm_squared();
                    (candidate_cost < cost).then_some((delta, candidate, r, candidate_cost))
                });

                match accepted {
                    Some((delta, candidate, r, candidate_cost)) => {
                        let relative_gain = (cost - candidate_cost) / cost.max(EPSILON);
                        params = candidate;
                        residuals = r;
                        cost = candidate_cost;
                        lambda = (lambda / 10.0).max(EPSILON);
                        if delta.norm() <= eps * (params.norm() + eps) || relative_gain <= eps {
                            converged = true;
                        }
                        break;
                    }
                    None => {
                        lambda *= 10.0;
                        if lambda > LM_MAX_LAMBDA {
                            // No descent direction left: local minimum
                            converged = true;
                            break;
                        }
                    }
                }
            }
        }

        if !converged || !cost.is_finite() {
            return None;
        }

        Some(PnpSolution {
            rotation: Rotation3::new(Vector3::new(params[0], params[1], params[2])),
            translation: Vector3::new(params[3], params[4], params[5]),
            cost,
            iterations,
        })
    }

    fn residuals(
        &self,
        camera: &CameraModel,
        observed: &[Keypoint2D; NUM_FACE_KEYPOINTS],
        params: &Vector6<f64>,
    ) -> Option<Residuals> {
        let rotation = Rotation3::new(Vector3::new(params[0], params[1], params[2]));
        let translation = Vector3::new(params[3], params[4], params[5]);

        let mut out = Residuals::zeros();
        for (i, (model, obs)) in self.model_points.iter().zip(observed.iter()).enumerate() {
            let projected = camera.project(&rotation, &translation, model)?;
            out[2 * i] = projected.x - obs.x;
            out[2 * i + 1] = projected.y - obs.y;
        }
        out.iter().all(|v| v.is_finite()).then_some(out)
    }

    /// Central-difference Jacobian of the residuals with respect to the six pose parameters
    fn jacobian(
        &self,
        camera: &CameraModel,
        observed: &[Keypoint2D; NUM_FACE_KEYPOINTS],
        params: &Vector6<f64>,
    ) -> Option<Jacobian> {
        let mut jacobian = Jacobian::zeros();
        for k in 0..6 {
            let h = JACOBIAN_STEP * params[k].abs().max(1.0);
            let mut forward = *params;
            let mut backward = *params;
            forward[k] += h;
            backward[k] -= h;
            let column = (self.residuals(camera, observed, &forward)? - self.residuals(camera, observed, &backward)?)
                / (2.0 * h);
            jacobian.set_column(k, &column);
        }
        Some(jacobian)
    }

    /// Parse 3D model points from a text file with one coordinate per line
    fn parse_model_points(content: &str) -> Result<[Vector3<f64>; NUM_FACE_KEYPOINTS]> {
        let values: Vec<f64> = content
            .lines()
            .filter_map(|line| line.trim().parse::<f64>().ok())
            .collect();

        let expected = NUM_FACE_KEYPOINTS * 3;
        if values.len() != expected {
            return Err(Error::InvalidInput(format!(
                "Expected {} coordinate values ({} points × 3), got {}",
                expected,
                NUM_FACE_KEYPOINTS,
                values.len()
            )));
        }

        let mut points = [Vector3::zeros(); NUM_FACE_KEYPOINTS];
        for (point, chunk) in points.iter_mut().zip(values.chunks_exact(3)) {
            *point = Vector3::new(chunk[0], chunk[1], chunk[2]);
        }
        Ok(points)
    }
}
