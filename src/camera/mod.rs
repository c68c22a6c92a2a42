//! The `camera` module defines the camera models supported by the crate.
//!
//! It provides the shared building blocks ([`Intrinsics`], [`Resolution`],
//! [`CameraModelError`]), the [`CameraModel`] trait every model implements,
//! the [`CameraModelKind`] discriminant used to identify a model at runtime,
//! and the closed [`CameraModelEnum`] used for polymorphic serialization.

use nalgebra::{Matrix3, Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod fisheye;
pub mod pinhole;

pub use fisheye::FisheyeModel;
pub use pinhole::PinholeModel;

/// Intrinsic parameters of the base pinhole projection.
///
/// A single focal length is shared by both image axes; `(cx, cy)` is the
/// principal point in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub focal: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// Number of scalars in the flat parameter view of the base model.
    pub const PARAM_COUNT: usize = 3;

    pub fn new(focal: f64, cx: f64, cy: f64) -> Self {
        Intrinsics { focal, cx, cy }
    }

    /// Flat view `[focal, cx, cy]`.
    pub fn params(&self) -> [f64; 3] {
        [self.focal, self.cx, self.cy]
    }

    /// Overwrites the three base scalars at once.
    pub fn set_params(&mut self, focal: f64, cx: f64, cy: f64) {
        self.focal = focal;
        self.cx = cx;
        self.cy = cy;
    }

    /// Converts a pixel into normalized camera-plane coordinates.
    pub fn image_to_camera(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            (pixel.x - self.cx) / self.focal,
            (pixel.y - self.cy) / self.focal,
        )
    }

    /// Converts a normalized camera-plane point into pixel coordinates.
    pub fn camera_to_image(&self, point: &Vector2<f64>) -> Vector2<f64> {
        Vector2::new(
            self.focal * point.x + self.cx,
            self.focal * point.y + self.cy,
        )
    }

    /// The 3x3 calibration matrix `K`.
    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.focal, 0.0, self.cx, //
            0.0, self.focal, self.cy, //
            0.0, 0.0, 1.0,
        )
    }

    /// Closed-form inverse of [`Intrinsics::k_matrix`].
    pub fn k_inverse(&self) -> Matrix3<f64> {
        let inv_f = 1.0 / self.focal;
        Matrix3::new(
            inv_f,
            0.0,
            -self.cx * inv_f,
            0.0,
            inv_f,
            -self.cy * inv_f,
            0.0,
            0.0,
            1.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    /// Returns `true` when no image size has been configured.
    pub fn is_unset(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether `pixel` lies inside `[0, width) x [0, height)`.
    pub fn contains(&self, pixel: &Vector2<f64>) -> bool {
        pixel.x >= 0.0
            && pixel.x < self.width as f64
            && pixel.y >= 0.0
            && pixel.y < self.height as f64
    }
}

#[derive(thiserror::Error, Debug)]
pub enum CameraModelError {
    #[error("Projection is outside the image")]
    ProjectionOutSideImage,
    #[error("Input point is outside the image")]
    PointIsOutSideImage,
    #[error("z is close to zero, point is at camera center")]
    PointAtCameraCenter,
    #[error("Focal length must be positive")]
    FocalLengthMustBePositive,
    #[error("Principal point must be finite")]
    PrincipalPointMustBeFinite,
    #[error("Expected {expected} parameters, got {found}")]
    ParameterCountMismatch { expected: usize, found: usize },
    #[error("Invalid camera parameters: {0}")]
    InvalidParams(String),
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Failed to load YAML: {0}")]
    YamlError(String),
    #[error("JSON error: {0}")]
    JsonError(String),
    #[error("IO Error: {0}")]
    IOError(String),
}

impl From<std::io::Error> for CameraModelError {
    fn from(err: std::io::Error) -> Self {
        CameraModelError::IOError(err.to_string())
    }
}

impl From<yaml_rust::ScanError> for CameraModelError {
    fn from(err: yaml_rust::ScanError) -> Self {
        CameraModelError::YamlError(err.to_string())
    }
}

impl From<serde_json::Error> for CameraModelError {
    fn from(err: serde_json::Error) -> Self {
        CameraModelError::JsonError(err.to_string())
    }
}

/// Runtime discriminant of a camera model.
///
/// The numeric values follow the wider camera-type enumeration this crate
/// interoperates with, where `2`..`4` are radial/Brown variants not provided here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CameraModelKind {
    #[serde(rename = "pinhole")]
    Pinhole,
    #[serde(rename = "fisheye4")]
    PinholeFisheye,
}

impl CameraModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CameraModelKind::Pinhole => "pinhole",
            CameraModelKind::PinholeFisheye => "fisheye4",
        }
    }

    pub fn discriminant(&self) -> u8 {
        match self {
            CameraModelKind::Pinhole => 1,
            CameraModelKind::PinholeFisheye => 5,
        }
    }

    pub fn from_discriminant(value: u8) -> Option<Self> {
        match value {
            1 => Some(CameraModelKind::Pinhole),
            5 => Some(CameraModelKind::PinholeFisheye),
            _ => None,
        }
    }

    /// Whether models of this kind carry lens distortion terms.
    pub fn has_distortion(&self) -> bool {
        matches!(self, CameraModelKind::PinholeFisheye)
    }
}

impl fmt::Display for CameraModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraModelKind {
    type Err = CameraModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pinhole" => Ok(CameraModelKind::Pinhole),
            "fisheye4" => Ok(CameraModelKind::PinholeFisheye),
            other => Err(CameraModelError::InvalidParams(format!(
                "Unknown camera model: {other}"
            ))),
        }
    }
}

/// Trait defining the core functionality for camera models
pub trait CameraModel {
    /// Project a 3D point in the camera frame to pixel coordinates
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError>;

    /// Unproject pixel coordinates to a unit-length 3D ray
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError>;

    /// Map an undistorted normalized camera-plane point to its distorted position
    fn add_distortion(&self, point: &Vector2<f64>) -> Vector2<f64>;

    /// Map a distorted normalized camera-plane point to its undistorted position
    fn remove_distortion(&self, point: &Vector2<f64>) -> Vector2<f64>;

    fn kind(&self) -> CameraModelKind;

    fn has_distortion(&self) -> bool {
        self.kind().has_distortion()
    }

    /// Flat parameter view handed to nonlinear optimizers.
    fn params(&self) -> Vec<f64>;

    /// Replace every parameter from a flat vector, or leave the model untouched
    /// and return [`CameraModelError::ParameterCountMismatch`].
    fn update_from_params(&mut self, params: &[f64]) -> Result<(), CameraModelError>;

    fn parameter_count(&self) -> usize;

    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError>
    where
        Self: Sized;

    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError>;

    fn validate_params(&self) -> Result<(), CameraModelError>;

    fn get_resolution(&self) -> Resolution;

    fn get_intrinsics(&self) -> Intrinsics;

    fn get_distortion(&self) -> Vec<f64>;

    /// Remove the lens distortion from a pixel.
    fn undistort_pixel(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let intrinsics = self.get_intrinsics();
        intrinsics.camera_to_image(&self.remove_distortion(&intrinsics.image_to_camera(pixel)))
    }

    /// Apply the lens distortion to a pixel.
    fn distort_pixel(&self, pixel: &Vector2<f64>) -> Vector2<f64> {
        let intrinsics = self.get_intrinsics();
        intrinsics.camera_to_image(&self.add_distortion(&intrinsics.image_to_camera(pixel)))
    }

    /// Observed pixel minus the projection of `point_3d`.
    fn residual(
        &self,
        point_3d: &Vector3<f64>,
        observed: &Vector2<f64>,
    ) -> Result<Vector2<f64>, CameraModelError> {
        Ok(observed - self.project(point_3d)?)
    }
}

/// Closed set of the camera models provided by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "camera_model")]
pub enum CameraModelEnum {
    #[serde(rename = "pinhole")]
    Pinhole(PinholeModel),
    #[serde(rename = "fisheye4")]
    Fisheye(FisheyeModel),
}

impl CameraModelEnum {
    pub fn kind(&self) -> CameraModelKind {
        self.as_camera_model().kind()
    }

    pub fn as_camera_model(&self) -> &dyn CameraModel {
        match self {
            CameraModelEnum::Pinhole(model) => model,
            CameraModelEnum::Fisheye(model) => model,
        }
    }

    pub fn as_camera_model_mut(&mut self) -> &mut dyn CameraModel {
        match self {
            CameraModelEnum::Pinhole(model) => model,
            CameraModelEnum::Fisheye(model) => model,
        }
    }

    /// Loads a YAML file whose `cam0/camera_model` selects the variant.
    pub fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = std::fs::read_to_string(path)?;
        let docs = yaml_rust::YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CameraModelError::InvalidParams("Empty YAML document".to_string()))?;

        let kind: CameraModelKind = doc["cam0"]["camera_model"]
            .as_str()
            .ok_or_else(|| {
                CameraModelError::InvalidParams("YAML missing 'camera_model'".to_string())
            })?
            .parse()?;

        match kind {
            CameraModelKind::Pinhole => Ok(CameraModelEnum::Pinhole(
                PinholeModel::load_from_yaml(path)?,
            )),
            CameraModelKind::PinholeFisheye => Ok(CameraModelEnum::Fisheye(
                FisheyeModel::load_from_yaml(path)?,
            )),
        }
    }

    pub fn to_json(&self) -> Result<String, CameraModelError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parses a JSON record and validates the resulting model.
    pub fn from_json(json: &str) -> Result<Self, CameraModelError> {
        let model: CameraModelEnum = serde_json::from_str(json)?;
        model.as_camera_model().validate_params()?;
        Ok(model)
    }
}

impl From<PinholeModel> for CameraModelEnum {
    fn from(model: PinholeModel) -> Self {
        CameraModelEnum::Pinhole(model)
    }
}

impl From<FisheyeModel> for CameraModelEnum {
    fn from(model: FisheyeModel) -> Self {
        CameraModelEnum::Fisheye(model)
    }
}

/// Common validation functions for camera parameters
pub mod validation {
    use super::*;

    pub fn validate_intrinsics(intrinsics: &Intrinsics) -> Result<(), CameraModelError> {
        if intrinsics.focal <= 0.0 || !intrinsics.focal.is_finite() {
            return Err(CameraModelError::FocalLengthMustBePositive);
        }
        if !intrinsics.cx.is_finite() || !intrinsics.cy.is_finite() {
            return Err(CameraModelError::PrincipalPointMustBeFinite);
        }
        Ok(())
    }

    /// Checks a flat vector length before any field is written.
    pub fn validate_param_count(params: &[f64], expected: usize) -> Result<(), CameraModelError> {
        if params.len() != expected {
            return Err(CameraModelError::ParameterCountMismatch {
                expected,
                found: params.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_intrinsics_pixel_camera_roundtrip() {
        let intrinsics = Intrinsics::new(400.0, 320.0, 240.0);
        let pixel = Vector2::new(100.0, 450.0);

        let normalized = intrinsics.image_to_camera(&pixel);
        assert_relative_eq!(normalized.x, -0.55, epsilon = 1e-12);
        assert_relative_eq!(normalized.y, 0.525, epsilon = 1e-12);

        let back = intrinsics.camera_to_image(&normalized);
        assert_relative_eq!(back.x, pixel.x, epsilon = 1e-9);
        assert_relative_eq!(back.y, pixel.y, epsilon = 1e-9);
    }

    #[test]
    fn test_k_matrix_inverse() {
        let intrinsics = Intrinsics::new(512.5, 300.25, 210.75);
        let identity = intrinsics.k_matrix() * intrinsics.k_inverse();
        assert_relative_eq!(identity, Matrix3::identity(), epsilon = 1e-12);
    }

    #[test]
    fn test_resolution_contains() {
        let resolution = Resolution {
            width: 640,
            height: 480,
        };
        assert!(resolution.contains(&Vector2::new(0.0, 0.0)));
        assert!(resolution.contains(&Vector2::new(639.9, 479.9)));
        assert!(!resolution.contains(&Vector2::new(640.0, 10.0)));
        assert!(!resolution.contains(&Vector2::new(-0.1, 10.0)));
        assert!(Resolution::default().is_unset());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(CameraModelKind::PinholeFisheye.as_str(), "fisheye4");
        assert_eq!(
            "fisheye4".parse::<CameraModelKind>().unwrap(),
            CameraModelKind::PinholeFisheye
        );
        assert_eq!(
            "pinhole".parse::<CameraModelKind>().unwrap(),
            CameraModelKind::Pinhole
        );
        assert!("kannala_brandt".parse::<CameraModelKind>().is_err());

        for kind in [CameraModelKind::Pinhole, CameraModelKind::PinholeFisheye] {
            assert_eq!(CameraModelKind::from_discriminant(kind.discriminant()), Some(kind));
        }
        assert_eq!(CameraModelKind::from_discriminant(3), None);
        assert!(CameraModelKind::PinholeFisheye.has_distortion());
        assert!(!CameraModelKind::Pinhole.has_distortion());
    }

    #[test]
    fn test_validate_intrinsics() {
        assert!(validation::validate_intrinsics(&Intrinsics::new(300.0, 1.0, 2.0)).is_ok());
        assert!(matches!(
            validation::validate_intrinsics(&Intrinsics::new(0.0, 1.0, 2.0)),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));
        assert!(matches!(
            validation::validate_intrinsics(&Intrinsics::new(f64::NAN, 1.0, 2.0)),
            Err(CameraModelError::FocalLengthMustBePositive)
        ));
        assert!(matches!(
            validation::validate_intrinsics(&Intrinsics::new(300.0, f64::INFINITY, 2.0)),
            Err(CameraModelError::PrincipalPointMustBeFinite)
        ));
    }

    #[test]
    fn test_enum_json_roundtrip() {
        let fisheye = FisheyeModel::new(
            Intrinsics::new(350.0, 320.0, 240.0),
            Resolution {
                width: 640,
                height: 480,
            },
            [-0.02, 0.01, -0.005, 0.001],
        )
        .unwrap();
        let model = CameraModelEnum::from(fisheye);

        let json = model.to_json().unwrap();
        assert!(json.contains("\"camera_model\": \"fisheye4\""));
        assert!(json.contains("\"fisheye4\""));

        let restored = CameraModelEnum::from_json(&json).unwrap();
        assert_eq!(restored, model);
        assert_eq!(restored.kind(), CameraModelKind::PinholeFisheye);
        assert!(restored.as_camera_model().has_distortion());
    }

    #[test]
    fn test_enum_json_rejects_wrong_coefficient_count() {
        let json = r#"{
            "camera_model": "fisheye4",
            "intrinsics": { "focal": 350.0, "cx": 320.0, "cy": 240.0 },
            "resolution": { "width": 640, "height": 480 },
            "fisheye4": [0.1, 0.2, 0.3]
        }"#;
        assert!(matches!(
            CameraModelEnum::from_json(json),
            Err(CameraModelError::JsonError(_))
        ));

        let too_many = json.replace("[0.1, 0.2, 0.3]", "[0.1, 0.2, 0.3, 0.4, 0.5]");
        assert!(CameraModelEnum::from_json(&too_many).is_err());
    }

    #[test]
    fn test_enum_dispatch_mut() {
        let pinhole =
            PinholeModel::new(Intrinsics::new(300.0, 160.0, 120.0), Resolution::default())
                .unwrap();
        let mut model = CameraModelEnum::from(pinhole);
        assert_eq!(model.kind(), CameraModelKind::Pinhole);
        model
            .as_camera_model_mut()
            .update_from_params(&[310.0, 161.0, 121.0])
            .unwrap();
        assert_eq!(model.as_camera_model().params(), vec![310.0, 161.0, 121.0]);
    }
}
