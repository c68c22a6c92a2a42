//! Implements the Pinhole camera model.
//!
//! This module provides the [`PinholeModel`] struct and its associated methods
//! for representing and working with a simple pinhole camera. It adheres to the
//! [`CameraModel`] trait defined in the parent `camera` module ([`crate::camera`]).
//! The pinhole model assumes no lens distortion and is the base projection the
//! [`crate::camera::FisheyeModel`] builds upon.

use crate::camera::{
    validation, CameraModel, CameraModelError, CameraModelKind, Intrinsics, Resolution,
};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use yaml_rust::{Yaml, YamlLoader};

/// Represents a Pinhole camera model.
///
/// This struct holds the intrinsic parameters (focal length, principal point)
/// and image resolution for a pinhole camera. It assumes no lens distortion.
///
/// # Examples
///
/// ```rust
/// use pinhole_fisheye::camera::pinhole::PinholeModel;
/// use pinhole_fisheye::camera::{CameraModel, Intrinsics, Resolution};
///
/// let resolution = Resolution { width: 640, height: 480 };
/// let model = PinholeModel::new(Intrinsics::new(500.0, 320.0, 240.0), resolution).unwrap();
///
/// assert_eq!(model.params(), vec![500.0, 320.0, 240.0]);
/// assert!(!model.has_distortion());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinholeModel {
    /// The intrinsic parameters of the camera, [`Intrinsics`] (focal, cx, cy).
    pub intrinsics: Intrinsics,
    /// The resolution of the camera image, [`Resolution`] (width, height).
    /// A zero resolution disables the image-bounds checks.
    pub resolution: Resolution,
}

impl PinholeModel {
    /// Creates a new [`PinholeModel`] and validates its intrinsics.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::FocalLengthMustBePositive`]
    /// * [`CameraModelError::PrincipalPointMustBeFinite`]
    pub fn new(intrinsics: Intrinsics, resolution: Resolution) -> Result<Self, CameraModelError> {
        let model = PinholeModel {
            intrinsics,
            resolution,
        };
        model.validate_params()?;
        Ok(model)
    }

    /// Reads the `cam0/intrinsics` and `cam0/resolution` entries shared by every
    /// model built on the pinhole projection.
    pub(crate) fn parse_yaml_base(doc: &Yaml) -> Result<(Intrinsics, Resolution), CameraModelError> {
        let intrinsics_yaml = doc["cam0"]["intrinsics"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("YAML missing 'intrinsics' or not an array".to_string())
        })?;
        let resolution_yaml = doc["cam0"]["resolution"].as_vec().ok_or_else(|| {
            CameraModelError::InvalidParams("YAML missing 'resolution' or not an array".to_string())
        })?;

        if intrinsics_yaml.len() != Intrinsics::PARAM_COUNT {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected {} intrinsic parameters in YAML, found {}",
                Intrinsics::PARAM_COUNT,
                intrinsics_yaml.len()
            )));
        }
        if resolution_yaml.len() != 2 {
            return Err(CameraModelError::InvalidParams(format!(
                "Expected 2 resolution entries in YAML, found {}",
                resolution_yaml.len()
            )));
        }

        let intrinsics = Intrinsics {
            focal: yaml_f64(&intrinsics_yaml[0])
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid focal".to_string()))?,
            cx: yaml_f64(&intrinsics_yaml[1])
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid cx".to_string()))?,
            cy: yaml_f64(&intrinsics_yaml[2])
                .ok_or_else(|| CameraModelError::InvalidParams("Invalid cy".to_string()))?,
        };

        let resolution = Resolution {
            width: resolution_yaml[0].as_i64().ok_or_else(|| {
                CameraModelError::InvalidParams("Invalid width: not an integer".to_string())
            })? as u32,
            height: resolution_yaml[1].as_i64().ok_or_else(|| {
                CameraModelError::InvalidParams("Invalid height: not an integer".to_string())
            })? as u32,
        };

        Ok((intrinsics, resolution))
    }

    /// Builds the `cam0` mapping for the pinhole fields, tagged with `kind`.
    pub(crate) fn yaml_base_mapping(
        intrinsics: &Intrinsics,
        resolution: &Resolution,
        kind: CameraModelKind,
    ) -> Result<serde_yaml::Mapping, CameraModelError> {
        let mut cam0 = serde_yaml::Mapping::new();
        cam0.insert(
            serde_yaml::Value::String("camera_model".to_string()),
            serde_yaml::Value::String(kind.as_str().to_string()),
        );
        cam0.insert(
            serde_yaml::Value::String("intrinsics".to_string()),
            serde_yaml::to_value(intrinsics.params().to_vec())
                .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
        );
        cam0.insert(
            serde_yaml::Value::String("resolution".to_string()),
            serde_yaml::to_value(vec![resolution.width, resolution.height])
                .map_err(|e| CameraModelError::YamlError(e.to_string()))?,
        );
        Ok(cam0)
    }

    /// Serializes a `cam0` mapping and writes it to `path`.
    pub(crate) fn write_yaml(cam0: serde_yaml::Mapping, path: &str) -> Result<(), CameraModelError> {
        let yaml = serde_yaml::Mapping::from_iter([(
            serde_yaml::Value::String("cam0".to_string()),
            serde_yaml::Value::Mapping(cam0),
        )]);

        let yaml_string =
            serde_yaml::to_string(&yaml).map_err(|e| CameraModelError::YamlError(e.to_string()))?;

        let mut file = fs::File::create(path)?;
        file.write_all(yaml_string.as_bytes())?;

        Ok(())
    }
}

/// Reads a YAML scalar as `f64`, accepting integer literals such as `500`.
pub(crate) fn yaml_f64(value: &Yaml) -> Option<f64> {
    value.as_f64().or_else(|| value.as_i64().map(|v| v as f64))
}

impl CameraModel for PinholeModel {
    /// Projects a 3D point from camera coordinates to 2D image coordinates.
    ///
    /// `u = f * X / Z + cx`, `v = f * Y / Z + cy`.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointAtCameraCenter`]: If the 3D point's Z-coordinate is too close to zero.
    /// * [`CameraModelError::ProjectionOutSideImage`]: If a resolution is set and the
    ///   projected point falls outside it.
    fn project(&self, point_3d: &Vector3<f64>) -> Result<Vector2<f64>, CameraModelError> {
        // If z is very small, the point is at the camera center
        if point_3d.z < f64::EPSILON.sqrt() {
            return Err(CameraModelError::PointAtCameraCenter);
        }
        let normalized = Vector2::new(point_3d.x / point_3d.z, point_3d.y / point_3d.z);
        let pixel = self.intrinsics.camera_to_image(&normalized);

        if !self.resolution.is_unset() && !self.resolution.contains(&pixel) {
            return Err(CameraModelError::ProjectionOutSideImage);
        }

        Ok(pixel)
    }

    /// Unprojects a pixel to a normalized 3D ray `(mx, my, 1) / |(mx, my, 1)|`.
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::PointIsOutSideImage`]: If a resolution is set and the
    ///   input pixel lies outside it.
    fn unproject(&self, point_2d: &Vector2<f64>) -> Result<Vector3<f64>, CameraModelError> {
        if !self.resolution.is_unset() && !self.resolution.contains(point_2d) {
            return Err(CameraModelError::PointIsOutSideImage);
        }

        let m = self.intrinsics.image_to_camera(point_2d);
        Ok(Vector3::new(m.x, m.y, 1.0).normalize())
    }

    fn add_distortion(&self, point: &Vector2<f64>) -> Vector2<f64> {
        *point
    }

    fn remove_distortion(&self, point: &Vector2<f64>) -> Vector2<f64> {
        *point
    }

    fn kind(&self) -> CameraModelKind {
        CameraModelKind::Pinhole
    }

    /// Returns `[focal, cx, cy]`.
    fn params(&self) -> Vec<f64> {
        self.intrinsics.params().to_vec()
    }

    fn update_from_params(&mut self, params: &[f64]) -> Result<(), CameraModelError> {
        validation::validate_param_count(params, Intrinsics::PARAM_COUNT)?;
        self.intrinsics.set_params(params[0], params[1], params[2]);
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        Intrinsics::PARAM_COUNT
    }

    /// Loads camera parameters from a YAML file.
    ///
    /// The file is expected to hold a `cam0` mapping with `intrinsics`
    /// (`[focal, cx, cy]`) and `resolution` (`[width, height]`).
    ///
    /// # Errors
    ///
    /// * [`CameraModelError::IOError`]: If there's an issue reading the file.
    /// * [`CameraModelError::YamlError`]: If the YAML content is malformed.
    /// * [`CameraModelError::InvalidParams`]: If expected fields are missing or mistyped.
    /// * Errors from `validate_params` if the loaded parameters are invalid.
    fn load_from_yaml(path: &str) -> Result<Self, CameraModelError> {
        let contents = fs::read_to_string(path)?;
        let docs = YamlLoader::load_from_str(&contents)?;
        let doc = docs
            .first()
            .ok_or_else(|| CameraModelError::InvalidParams("Empty YAML document".to_string()))?;

        let (intrinsics, resolution) = Self::parse_yaml_base(doc)?;
        PinholeModel::new(intrinsics, resolution)
    }

    /// Saves the camera model's parameters to a YAML file tagged `pinhole`.
    fn save_to_yaml(&self, path: &str) -> Result<(), CameraModelError> {
        let cam0 = Self::yaml_base_mapping(&self.intrinsics, &self.resolution, self.kind())?;
        Self::write_yaml(cam0, path)
    }

    fn validate_params(&self) -> Result<(), CameraModelError> {
        validation::validate_intrinsics(&self.intrinsics)?;
        Ok(())
    }

    fn get_resolution(&self) -> Resolution {
        self.resolution
    }

    fn get_intrinsics(&self) -> Intrinsics {
        self.intrinsics
    }

    /// For the Pinhole model, there are no distortion parameters.
    fn get_distortion(&self) -> Vec<f64> {
        vec![]
    }
}

/// Contains unit tests for the Pinhole camera model.
#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Tests loading [`PinholeModel`] parameters from a YAML file.
    #[test]
    fn test_pinhole_load_from_yaml() {
        let path = "samples/pinhole.yaml";
        let model = PinholeModel::load_from_yaml(path).unwrap();

        assert_eq!(model.intrinsics.focal, 461.629);
        assert_eq!(model.intrinsics.cx, 362.680);
        assert_eq!(model.intrinsics.cy, 246.049);
        assert_eq!(model.resolution.width, 752);
        assert_eq!(model.resolution.height, 480);
    }

    #[test]
    fn test_pinhole_save_to_yaml() {
        fs::create_dir_all("output").expect("Failed to create output directory for test.");
        let output_path = "output/pinhole_saved.yaml";

        let model = PinholeModel::load_from_yaml("samples/pinhole.yaml").unwrap();
        model.save_to_yaml(output_path).unwrap();

        let saved_model = PinholeModel::load_from_yaml(output_path).unwrap();
        assert_eq!(model, saved_model);

        fs::remove_file(output_path).unwrap();
    }

    /// Tests the projection and unprojection consistency of the [`PinholeModel`].
    #[test]
    fn test_pinhole_project_unproject() {
        let model = PinholeModel::load_from_yaml("samples/pinhole.yaml").unwrap();

        let point_3d = Vector3::new(1.0, 1.0, 5.0);
        let norm_3d = point_3d.normalize();

        let point_2d = model.project(&point_3d).unwrap();
        let point_3d_unprojected = model.unproject(&point_2d).unwrap();

        assert_relative_eq!(norm_3d, point_3d_unprojected, epsilon = 1e-6);
    }

    #[test]
    fn test_pinhole_bounds_and_center() {
        let model = PinholeModel::load_from_yaml("samples/pinhole.yaml").unwrap();

        assert!(matches!(
            model.project(&Vector3::new(1.0, 0.0, 0.0)),
            Err(CameraModelError::PointAtCameraCenter)
        ));
        assert!(matches!(
            model.project(&Vector3::new(10.0, 0.0, 1.0)),
            Err(CameraModelError::ProjectionOutSideImage)
        ));
        assert!(matches!(
            model.unproject(&Vector2::new(-1.0, 10.0)),
            Err(CameraModelError::PointIsOutSideImage)
        ));
    }

    #[test]
    fn test_pinhole_update_from_params() {
        let mut model =
            PinholeModel::new(Intrinsics::new(300.0, 160.0, 120.0), Resolution::default()).unwrap();
        let before = model.params();

        assert!(matches!(
            model.update_from_params(&[1.0, 2.0]),
            Err(CameraModelError::ParameterCountMismatch {
                expected: 3,
                found: 2
            })
        ));
        assert_eq!(model.params(), before);

        model.update_from_params(&[320.0, 161.0, 119.0]).unwrap();
        assert_eq!(model.params(), vec![320.0, 161.0, 119.0]);
        assert_eq!(model.parameter_count(), 3);
    }

    #[test]
    fn test_pinhole_pixel_wrappers_are_identity() {
        let model =
            PinholeModel::new(Intrinsics::new(300.0, 160.0, 120.0), Resolution::default()).unwrap();
        let pixel = Vector2::new(37.5, 201.25);
        assert_relative_eq!(model.undistort_pixel(&pixel), pixel, epsilon = 1e-9);
        assert_relative_eq!(model.distort_pixel(&pixel), pixel, epsilon = 1e-9);
    }
}
