//! This module provides the cost function and optimization routines
//! for calibrating a [`FisheyeModel`].
//!
//! It uses the `tiny_solver` crate for non-linear optimization over the flat
//! parameter vector `[focal, cx, cy, k1, k2, k3, k4]`.

use crate::camera::fisheye::PARAM_COUNT;
use crate::camera::{CameraModel, CameraModelError, FisheyeModel};
use crate::optimization::Optimizer;

use log::{debug, info, warn};
use nalgebra::{DMatrix, DVector, Matrix2xX, Matrix3xX, Vector2};
use std::collections::HashMap;
use tiny_solver::factors::Factor;
use tiny_solver::{LevenbergMarquardtOptimizer, Optimizer as TinySolverOptimizer};

const PARAMS_KEY: &str = "params";

/// Per-point data of the reprojection cost that does not depend on the parameters.
#[derive(Debug, Clone)]
struct Observation {
    /// Undistorted normalized point `(X/Z, Y/Z)`.
    normalized: Vector2<f64>,
    /// `|normalized|`.
    radius: f64,
    /// Incidence angle `atan(radius)`.
    theta: f64,
    /// Observed pixel.
    pixel: Vector2<f64>,
}

/// Cost function for `tiny_solver` optimization of the [`FisheyeModel`].
///
/// The residual is the difference between the projected and the observed pixel.
#[derive(Debug, Clone)]
struct FisheyeCost {
    observations: Vec<Observation>,
}

impl FisheyeCost {
    /// Creates a new residual for a set of 3D-2D point correspondences.
    /// Points at or behind the camera center are skipped.
    fn new(points3d: &Matrix3xX<f64>, points2d: &Matrix2xX<f64>) -> Self {
        let observations = points3d
            .column_iter()
            .zip(points2d.column_iter())
            .filter(|(p3d, _)| p3d.z > f64::EPSILON.sqrt())
            .map(|(p3d, p2d)| {
                let normalized = Vector2::new(p3d.x / p3d.z, p3d.y / p3d.z);
                let radius = normalized.norm();
                Observation {
                    normalized,
                    radius,
                    theta: radius.atan(),
                    pixel: p2d.into_owned(),
                }
            })
            .collect();
        Self { observations }
    }

    fn num_residuals(&self) -> usize {
        self.observations.len() * 2
    }
}

impl<T: nalgebra::RealField> Factor<T> for FisheyeCost {
    fn residual_func(&self, params: &[DVector<T>]) -> DVector<T> {
        let cam_params = &params[0];
        let focal = cam_params[0].clone();
        let cx = cam_params[1].clone();
        let cy = cam_params[2].clone();
        let k1 = cam_params[3].clone();
        let k2 = cam_params[4].clone();
        let k3 = cam_params[5].clone();
        let k4 = cam_params[6].clone();

        let mut residuals = DVector::zeros(self.num_residuals());

        for (i, obs) in self.observations.iter().enumerate() {
            let theta: T = nalgebra::convert(obs.theta);
            let theta2 = theta.clone() * theta.clone();
            let theta3 = theta2.clone() * theta.clone();
            let theta5 = theta3.clone() * theta2.clone();
            let theta7 = theta5.clone() * theta2.clone();
            let theta9 = theta7.clone() * theta2;

            let theta_d = theta.clone()
                + k1.clone() * theta3
                + k2.clone() * theta5
                + k3.clone() * theta7
                + k4.clone() * theta9;

            let scale = if obs.radius > crate::camera::fisheye::DISTORTION_EPSILON {
                theta_d / nalgebra::convert::<f64, T>(obs.radius)
            } else {
                nalgebra::convert(1.0)
            };

            let x: T = nalgebra::convert(obs.normalized.x);
            let y: T = nalgebra::convert(obs.normalized.y);
            let projected_x = focal.clone() * scale.clone() * x + cx.clone();
            let projected_y = focal.clone() * scale * y + cy.clone();

            residuals[i * 2] = projected_x - nalgebra::convert::<f64, T>(obs.pixel.x);
            residuals[i * 2 + 1] = projected_y - nalgebra::convert::<f64, T>(obs.pixel.y);
        }
        residuals
    }
}

/// Cost function for fisheye camera model optimization.
///
/// This structure holds the 3D-2D point correspondences and the camera model
/// instance refined during calibration. It implements the [`Optimizer`] trait.
#[derive(Clone)]
pub struct FisheyeOptimizationCost {
    /// The fisheye camera model to be optimized.
    model: FisheyeModel,
    /// 3D points in the camera's coordinate system (3×N matrix).
    points3d: Matrix3xX<f64>,
    /// Corresponding observed 2D points in image coordinates (2×N matrix).
    points2d: Matrix2xX<f64>,
}

impl FisheyeOptimizationCost {
    /// Creates a new [`FisheyeOptimizationCost`] instance.
    ///
    /// # Arguments
    ///
    /// * `model` - The initial [`FisheyeModel`] to be optimized.
    /// * `points3d` - A 3×N matrix of 3D points in the camera frame.
    /// * `points2d` - A 2×N matrix of the corresponding observed pixels.
    pub fn new(model: FisheyeModel, points3d: Matrix3xX<f64>, points2d: Matrix2xX<f64>) -> Self {
        FisheyeOptimizationCost {
            model,
            points3d,
            points2d,
        }
    }

    pub fn model(&self) -> &FisheyeModel {
        &self.model
    }

    pub fn into_model(self) -> FisheyeModel {
        self.model
    }

    fn check_correspondences(&self, min_points: usize) -> Result<(), CameraModelError> {
        if self.points3d.ncols() != self.points2d.ncols() {
            return Err(CameraModelError::InvalidParams(
                "Number of 2D and 3D points must match".to_string(),
            ));
        }
        if self.points3d.ncols() < min_points {
            return Err(CameraModelError::InvalidParams(format!(
                "Not enough points (need at least {min_points}, got {})",
                self.points3d.ncols()
            )));
        }
        Ok(())
    }
}

impl Optimizer for FisheyeOptimizationCost {
    /// Optimizes `[focal, cx, cy, k1, k2, k3, k4]` with Levenberg-Marquardt.
    ///
    /// The solution is written back through
    /// [`CameraModel::update_from_params`] and then validated.
    fn optimize(&mut self, verbose: bool) -> Result<(), CameraModelError> {
        self.check_correspondences(1)?;

        let initial_params = DVector::from_vec(self.model.params());

        let mut problem = tiny_solver::Problem::new();
        let cost_function = FisheyeCost::new(&self.points3d, &self.points2d);
        let num_residuals = cost_function.num_residuals();
        if num_residuals == 0 {
            return Err(CameraModelError::InvalidParams(
                "No point lies in front of the camera".to_string(),
            ));
        }
        problem.add_residual_block(num_residuals, &[PARAMS_KEY], Box::new(cost_function), None);

        let mut initial_values = HashMap::new();
        initial_values.insert(PARAMS_KEY.to_string(), initial_params);

        if verbose {
            info!(
                "Starting fisheye optimization with tiny-solver Levenberg-Marquardt over {} residuals",
                num_residuals
            );
        }

        let optimizer = LevenbergMarquardtOptimizer::default();
        let result = optimizer
            .optimize(&problem, &initial_values, None)
            .ok_or_else(|| CameraModelError::NumericalError("Optimization failed".to_string()))?;

        let optimized_params = result.get(PARAMS_KEY).ok_or_else(|| {
            CameraModelError::NumericalError("Optimizer returned no parameters".to_string())
        })?;

        if optimized_params.len() != PARAM_COUNT {
            warn!(
                "Optimizer returned {} parameters, expected {}",
                optimized_params.len(),
                PARAM_COUNT
            );
        }

        let previous = self.model.clone();
        self.model.update_from_params(optimized_params.as_slice())?;
        if let Err(err) = self.model.validate_params() {
            self.model = previous;
            return Err(err);
        }

        if verbose {
            info!("Optimization finished: {:?}", self.model);
        }

        Ok(())
    }

    /// Linear least-squares estimate of `k1..k4` with the intrinsics held fixed.
    ///
    /// Each correspondence gives `|pixel - c| / focal = theta + k1 theta^3 + k2 theta^5
    /// + k3 theta^7 + k4 theta^9`, which is linear in the coefficients.
    fn linear_estimation(&mut self) -> Result<(), CameraModelError>
    where
        Self: Sized,
    {
        self.check_correspondences(4)?;

        let intrinsics = self.model.intrinsics;
        let num_points = self.points3d.ncols();
        let mut a_mat = DMatrix::zeros(num_points, 4);
        let mut b_vec = DVector::zeros(num_points);
        let mut used = 0;

        for (i, (p3d, p2d)) in self
            .points3d
            .column_iter()
            .zip(self.points2d.column_iter())
            .enumerate()
        {
            if p3d.z <= f64::EPSILON {
                continue;
            }

            let r_world = p3d.x.hypot(p3d.y);
            let theta = r_world.atan2(p3d.z);
            let theta2 = theta * theta;
            let theta3 = theta2 * theta;
            let theta5 = theta3 * theta2;
            let theta7 = theta5 * theta2;
            let theta9 = theta7 * theta2;

            a_mat[(i, 0)] = theta3;
            a_mat[(i, 1)] = theta5;
            a_mat[(i, 2)] = theta7;
            a_mat[(i, 3)] = theta9;

            let distorted = intrinsics.image_to_camera(&p2d.into_owned());
            b_vec[i] = distorted.norm() - theta;
            used += 1;
        }

        if used < 4 {
            return Err(CameraModelError::InvalidParams(
                "Not enough points in front of the camera for linear estimation".to_string(),
            ));
        }

        let svd = a_mat.svd(true, true);
        let coeffs = svd.solve(&b_vec, f64::EPSILON).map_err(|e_str| {
            CameraModelError::NumericalError(format!(
                "SVD solve failed in linear estimation: {}",
                e_str
            ))
        })?;

        debug!("Linear estimation from {used} points: {:?}", coeffs.as_slice());
        self.model
            .set_distortion_coefficients([coeffs[0], coeffs[1], coeffs[2], coeffs[3]]);
        self.model.validate_params()?;
        Ok(())
    }

    fn get_intrinsics(&self) -> crate::camera::Intrinsics {
        self.model.intrinsics
    }

    fn get_resolution(&self) -> crate::camera::Resolution {
        self.model.resolution
    }

    /// Returns `[k1, k2, k3, k4]`.
    fn get_distortion(&self) -> Vec<f64> {
        self.model.get_distortion()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{Intrinsics, Resolution};
    use crate::util;
    use approx::assert_relative_eq;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn reference_model() -> FisheyeModel {
        FisheyeModel::load_from_yaml("samples/fisheye4.yaml").unwrap()
    }

    #[test]
    fn test_fisheye_cost_matches_projection() {
        let model = reference_model();
        let (points_2d, points_3d) = util::sample_points(&model, 100).unwrap();
        let cost = FisheyeCost::new(&points_3d, &points_2d);

        let params = DVector::from_vec(model.params());
        let residuals: DVector<f64> = cost.residual_func(&[params]);
        assert_eq!(residuals.len(), points_2d.ncols() * 2);
        assert!(residuals.amax() < 1e-6, "max residual {}", residuals.amax());
    }

    #[test]
    fn test_fisheye_linear_estimation() {
        init_logger();
        let reference = reference_model();
        let (points_2d, points_3d) = util::sample_points(&reference, 200).unwrap();
        assert!(points_3d.ncols() > 20);

        let initial =
            FisheyeModel::from_intrinsics(reference.intrinsics, reference.resolution).unwrap();
        let mut estimator = FisheyeOptimizationCost::new(initial, points_3d, points_2d);
        estimator.linear_estimation().unwrap();

        for (estimated, expected) in estimator
            .get_distortion()
            .iter()
            .zip(reference.distortions.iter())
        {
            assert_relative_eq!(*estimated, *expected, epsilon = 1e-4);
        }
        assert_eq!(estimator.get_intrinsics(), reference.intrinsics);
    }

    #[test]
    fn test_fisheye_optimize() {
        init_logger();
        let reference = reference_model();
        let (points_2d, points_3d) = util::sample_points(&reference, 200).unwrap();

        let noisy = FisheyeModel::new(
            Intrinsics::new(
                reference.intrinsics.focal * 1.03,
                reference.intrinsics.cx - 3.0,
                reference.intrinsics.cy + 3.0,
            ),
            reference.resolution,
            [0.0; 4],
        )
        .unwrap();

        let initial_error =
            util::compute_reprojection_error(&noisy, &points_3d, &points_2d).unwrap();

        let mut optimizer =
            FisheyeOptimizationCost::new(noisy, points_3d.clone(), points_2d.clone());
        optimizer.optimize(false).unwrap();
        let optimized = optimizer.into_model();

        let final_error =
            util::compute_reprojection_error(&optimized, &points_3d, &points_2d).unwrap();
        assert!(final_error.rmse < initial_error.rmse);
        assert!(final_error.rmse < 0.5, "final rmse {}", final_error.rmse);

        assert_relative_eq!(
            optimized.intrinsics.focal,
            reference.intrinsics.focal,
            epsilon = 5.0
        );
        assert_relative_eq!(optimized.intrinsics.cx, reference.intrinsics.cx, epsilon = 1.0);
        assert_relative_eq!(optimized.intrinsics.cy, reference.intrinsics.cy, epsilon = 1.0);
        for i in 0..4 {
            assert_relative_eq!(
                optimized.distortions[i],
                reference.distortions[i],
                epsilon = 0.05
            );
        }
    }

    #[test]
    fn test_mismatched_correspondences_are_rejected() {
        let model = reference_model();
        let mut optimizer = FisheyeOptimizationCost::new(
            model,
            Matrix3xX::zeros(3),
            Matrix2xX::zeros(2),
        );
        assert!(matches!(
            optimizer.optimize(false),
            Err(CameraModelError::InvalidParams(_))
        ));
        assert!(matches!(
            optimizer.linear_estimation(),
            Err(CameraModelError::InvalidParams(_))
        ));
        assert_eq!(
            optimizer.get_resolution(),
            Resolution {
                width: 1024,
                height: 1024
            }
        );
    }
}
