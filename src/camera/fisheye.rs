//! Implements the pinhole camera with four-coefficient fisheye distortion.
//!
//! This module provides the [`FisheyeModel`] struct. The lens follows the
//! equidistant fisheye law: a normalized point at radius `r` is mapped to the
//! incidence angle `theta = atan(r)`, which is then distorted by the odd
//! polynomial
//!
//! `theta_d = theta + k1 * theta^3 + k2 * theta^5 + k3 * theta^7 + k4 * theta^9`
//!
//! and the point is rescaled radially so that its new radius is `theta_d`.
//! The inverse has no closed form and is recovered with a fixed number of
//! fixed-point iterations ([`UNDISTORT_ITERATIONS`]).
//!
//! Besides the distortion itself the model exposes the flat parameter vector
//! `[focal, cx, cy, k1, k2, k3, k4]` consumed by bundle adjustment.

use crate::camera::pinhole::{yaml_f64, PinholeModel};
use crate::camera::{
    validation, CameraModel, CameraModelError, CameraModelKind, Intrinsics, Resolution,
};
use log::debug;
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use yaml_rust::YamlLoader;

/// Radius below which the distortion is treated as the identity.
pub const DISTORTION_EPSILON: f64 = 1e-8;

/// Number of fixed-point iterations used by [`FisheyeModel::remove_distortion`].
///
/// The loop does not test for convergence.
pub const UNDISTORT_ITERATIONS: usize = 10;

/// Number of distortion coefficients `(k1, k2, k3, k4)`.
pub const DISTORTION_COUNT: usize = 4;

/// Length of the flat parameter vector: the base intrinsics then the coefficients.
pub const PARAM_COUNT: usize = Intrinsics::PARAM_COUNT + DISTORTION_COUNT;

/// Key of the coefficient list in persisted records.
pub const DISTORTION_KEY: &str = "fisheye4";

/// Represents a pinhole camera with four-coefficient fisheye distortion.
///
/// # Examples
///
/// ```rust
/// use nalgebra::Vector2;
/// use pinhole_fisheye::camera::fisheye::FisheyeModel;
/// use pinhole_fisheye::camera::{CameraModel, Intrinsics, Resolution};
///
/// let model = FisheyeModel::new(
///     Intrinsics::new(350.0, 320.0, 240.0),
///     Resolution { width: 640, height: 480 },
///     [-0.02, 0.01, -0.005, 0.001],
/// )
/// .unwrap();
///
/// let p = Vector2::new(0.3, 0.4);
/// let restored = model.remove_distortion(&model.add_distortion(&p));
/// assert!((restored - p).norm() < 1e-6);
/// assert_eq!(model.params().len(), 7);
/// ```
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct FisheyeModel {
    /// The base pinhole intrinsics, [`Intrinsics`] (focal, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image. A zero resolution disables bounds checks.
    pub resolution: Resolution,
    /// The distortion coefficients `[k1, k2, k3, k4]`.
    #[serde(rename = "fisheye4")]
    pub distortions: [f64; 4],
}

impl FisheyeModel {
    /// Creates a new [`FisheyeModel`] and validates its intrinsics.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    /// * [`CameraModelError::InvalidParams`] for non-finite coefficients.
    pub fn new(
        intrinsics: Intrinsics,
        resolution: Resolution,
        distortions: [f64; 4],
    ) -> Result<Self, CameraModelError> {
        let model = FisheyeModel {
            intrinsics,
            resolution,
            distortions,
        };
        model.validate_params()?;
        Ok(model)
    }

    /// Creates a model without distortion on top of `intrinsics`.
    pub fn from_intrinsics(
        intrinsics: Intrinsics,
        resolution: Resolution,
    ) -> Result<Self, CameraModelError> {
        Self::new(intrinsics, resolution, [0.0; DISTORTION_COUNT])
    }

    /// Builds a model from a flat `[focal, cx, cy, k1, k2, k3, k4]` vector.
    pub fn from_params(params: &[f64], resolution: Resolution) -> Result<Self, CameraModelError> {
        validation::validate_param_count(params, PARAM_COUNT)?;
        Self::new(
            Intrinsics::new(params[0], params[1], params[2]),
            resolution,
            [params[3], params[4], params[5], params[6]],
        )
    }

    /// Returns the base pinhole model this camera is built on.
    pub fn pinhole(&self) -> PinholeModel {
        PinholeModel {
            intrinsics: self.intrinsics,
            resolution: self.resolution,
        }
    }

    pub fn distortion_coefficients(&self) -> [f64; 4] {
        self.distortions
    }

    pub fn set_distortion_coefficients(&mut self, distortions: [f64; 4]) {
        self.distortions = distortions;
    }

    /// Evaluates `theta_d(theta)` for the current coefficients.
    pub fn distorted_angle(&self, theta: f64) -> f64 {
        let [k1, k2, k3, k4] = self.distortions;
        let theta2 = theta * theta;
        let theta3 = theta2 * theta;
        let theta5 = theta3 * theta2;
        let theta7 = theta5 * theta2;
        let theta9 = theta7 * theta2;
        theta + k1 * theta3 + k2 * theta5 + k3 * theta7 + k4 * theta9
    }

    /// Applies the fisheye distortion to a normalized camera-plane point.
    ///
    /// The point is scaled by `theta_d / r`, which tends to `1` on the optical axis;
    /// below [`DISTORTION_EPSILON`] the scale is exactly `1`.
    pub fn add_distortion(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let r = point.x.hypot(point.y);
        let scale = if r > DISTORTION_EPSILON {
            self.distorted_angle(r.atan()) / r
        } else {
            1.0
        };
        point * scale
    }

    /// Removes the fisheye distortion from a normalized camera-plane point.
    ///
    /// The undistorted angle is found by iterating
    /// `theta <- theta_d / (1 + k1 theta^2 + k2 theta^4 + k3 theta^6 + k4 theta^8)`
    /// exactly [`UNDISTORT_ITERATIONS`] times from `theta = theta_d`. Accuracy is only
    /// meaningful for coefficients that keep `theta_d(theta)` monotonic.
    pub fn remove_distortion(&self, point: &Vector2<f64>) -> Vector2<f64> {
        let theta_d = point.x.hypot(point.y);
        if theta_d <= DISTORTION_EPSILON {
            return *point;
        }

        let [k1, k2, k3, k4] = self.distortions;
        let mut theta = theta_d;
        for _ in 0..UNDISTORT_ITERATIONS {
            let theta2 = theta * theta;
            let theta4 = theta2 * theta2;
            let theta6 = theta4 * theta2;
            let theta8 = theta6 * theta2;
            theta = theta_d / (1.0 + k1 * theta2 + k2 * theta4 + k3 * theta6 + k4 * theta8);
        }

        point * (theta.tan() / theta_d)
    }

    fn validate_distortions(&self) -> Result<(), CameraModelError> {
        if let Some(index) = self.distortions.iter().position(|k| !k.is_finite()) {
            return Err(CameraModelError::InvalidParams(format!(
                "Distortion coefficient k{} must be finite",
                index + 1
            )));
        }
        Ok(())
    }
}

/// Provides a debug string representation for [`FisheyeModel`].
impl fmt::Debug for FisheyeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FisheyeModel [focal: {} cx: {} cy: {} distortions: {:?}]",
            self.intrinsics.focal, self.intrinsics.cx, self.intrinsics.cy, self.distortions,
        )
    }
}

impl Default for FisheyeModel {
    fn default() -> Self {
        FisheyeModel {
            intrinsics: Intrinsics::new(1.0, 0.0, 0.0),
            resolution: Resolution::default(),
            distortions: [0.0; DISTORTION_COUNT],
        }
    }
}

impl CameraModel for FisheyeModel {
    /// Projects a 3D point: perspective division, fisheye distortion, then the
    /// pinhole pixel mapping.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: If the 3D point's Z-coordinate is too close to zero.
    /// * [`CameraModelError::ProjectionOutSideImage`]: If a resolution is set and the
    ///   projected point falls outside it.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }

        let normalized = Vector2::new(point_3d.x / point_3d.z, point_3d.y / point_3d.z);
        let pixel = self
            .intrinsics
            .camera_to_image(&FisheyeModel::add_distortion(self, &normalized));

        if !self.resolution.is_unset() && !self.resolution.contains(&pixel) {
            return Err(CameraModelError::ProjectionOutSideImage);
        }

        Ok(pixel)
    }

    /// Unprojects a pixel to the unit ray through its undistorted camera-plane point.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: If a resolution is set and the
    ///   input pixel lies outside it.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if !self.resolution.is_unset() && !self.resolution.contains(point_2d) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let distorted = self.intrinsics.image_to_camera(point_2d);
        let m = FisheyeModel::remove_distortion(self, &distorted);
        Ok(Vector3::new(m.x, m.y, 1.0).normalize())
    }

    fn add_distortion(&self, point: &Vector2<f64>) -> Vector2<f64> {
        FisheyeModel::add_distortion(self, point)
    }

    fn remove_distortion(&self, point: &Vector2<f64>) -> Vector2<f64> {
        FisheyeModel::remove_distortion(self, point)
    }

    fn kind(&self) -> CameraModelKind {
        CameraModelKind::PinholeFisheye
    }

    /// Returns `[focal, cx, cy, k1, k2, k3, k4]`.
    fn params(&self) -> Vec<f64> {
        let mut params = self.pinhole().params();
        params.extend_from_slice(&self.distortions);
        params
    }

    /// Sets the intrinsics and the coefficients together from a 7-vector.
    ///
    /// Any other length yields [`CameraModelError::ParameterCountMismatch`] and
    /// leaves the model as it was.
    fn update_from_params(&mut self, params: &[f64]) -> Result<(), CameraModelError> {
        validation::validate_param_count(params, PARAM_COUNT)?;
        self.intrinsics.set_params(params[0], params[1], params[2]);
        self.distortions = [params[3], params[4], params[5], params[6]];
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        PARAM_COUNT
    }

    /// Loads camera parameters from a YAML file.
    ///
    /// Besides the pinhole fields, `cam0` must contain a `fisheye4` list of
    /// exactly four coefficients.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`]: If there's an issue reading the file.
    /// * [`CameraModelError::YamlError`]: If the YAML content is malformed.
    /// * [`CameraModelError::InvalidParams`]: If fields are missing, mistyped, or the
    ///   coefficient list does not hold four values.
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CameraModelError::InvalidParams("Empty YAML document".to_string()))?;

        let (intrinsics, resolution) = PinholeModel::parse_yaml_base(doc)?;

        let distortion_node = doc["cam0"][DISTORTION_KEY].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams(format!("YAML missing '{DISTORTION_KEY}' list"))
        })?;

        if distortion_node.len() != DISTORTION_COUNT {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected {} distortion parameters in YAML, found {}",
                DISTORTION_COUNT,
                distortion_node.len()
            )));
        }

        let mut distortions = [0.0; DISTORTION_COUNT];
        for (i, param) in distortion_node.iter().enumerate() {
            distortions[i] = yaml_f64(param).ok_or_else(|| {
                CameraModelError::InvalidParams(format!("Invalid distortion parameter k{}", i + 1))
            })?;
        }

        let model = FisheyeModel::new(intrinsics, resolution, distortions)?;
        debug!("Loaded {model:?} from {path}");
        Ok(model)
    }

    /// Saves the pinhole fields followed by the `fisheye4` coefficient list.
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let mut cam0 =
            PinholeModel::yaml_base_mapping(&self.intrinsics, &self.resolution, self.kind())?;
        cam0.insert(
            serde_yaml::Value::String(DISTORTION_KEY.to_string()),
            serde_yaml::to_value(self.distortions.to_vec())
                .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
        );
        PinholeModel::write_yaml(cam0, path)
    }

    /// Validates the intrinsics and checks that every coefficient is finite.
    ///
    /// Coefficient ranges are not checked; a folding distortion field is accepted.
    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        self.validate_distortions()
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    /// Returns `[k1, k2, k3, k4]`.
    fn get_distortion(&self) -> Vec<f64> {
        self.distortions.to_vec()
    }
}
