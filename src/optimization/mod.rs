//! The `optimization` module provides tools and traits for calibrating camera models.
//!
//! This module defines the [`Optimizer`] trait, which outlines the common interface
//! for camera model optimization tasks, and [`FisheyeOptimizationCost`], which
//! refines a [`crate::camera::FisheyeModel`] from 3D-2D correspondences.
//!
//! The optimizer only talks to the camera through its flat parameter vector
//! (`params` / `update_from_params`), the same contract used by external bundle
//! adjustment. The process typically involves:
//! 1. An optional linear estimation step to get a rough initial guess for the
//!    distortion coefficients.
//! 2. A non-linear optimization step (Levenberg-Marquardt) to refine all parameters.

pub mod fisheye;

pub use fisheye::FisheyeOptimizationCost;

use crate::camera::{CameraModelError, Intrinsics, Resolution};

/// A trait for camera model optimization tasks.
///
/// Types implementing `Optimizer` are responsible for refining the parameters
/// of a specific camera model by minimizing the reprojection error of a set of
/// 3D-2D point correspondences.
pub trait Optimizer {
    /// Performs non-linear optimization to refine the camera model parameters.
    ///
    /// # Arguments
    ///
    /// * `verbose` - If `true`, progress is reported through the `log` facade.
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If the optimization succeeded and the model was updated.
    /// * `Err(CameraModelError)` - On invalid input or if the solver failed.
    fn optimize(&mut self, verbose: bool) -> Result<(), CameraModelError>;

    /// Performs a linear estimation of a subset of the parameters, usually as
    /// the initial guess for [`Optimizer::optimize`].
    fn linear_estimation(&mut self) -> Result<(), CameraModelError>
    where
        Self: Sized;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_resolution(&self) -> Resolution;

    /// Retrieves the distortion coefficients of the underlying camera model.
    fn get_distortion(&self) -> Vec<f64>;
}
