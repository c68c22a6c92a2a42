//! Helpers around a calibrated camera: correspondence sampling, error
//! statistics and CSV export.

use crate::camera::{CameraModel, CameraModelError};
use crate::geometry;
use log::{info, warn};
use nalgebra::{Matrix2xX, Matrix3xX, Vector2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Reprojection tolerance, in pixels, for a sampled pixel to be kept.
const SAMPLE_TOLERANCE_PX: f64 = 1e-3;

#[derive(thiserror::Error, Debug)]
pub enum UtilError {
    #[error("Numerical error in computation: {0}")]
    NumericalError(String),
    #[error("Zero projection points")]
    ZeroProjectionPoints,
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),
    #[error("Camera model error: {0}")]
    CameraModel(#[from] CameraModelError),
    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("CSV Error: {0}")]
    CsvError(#[from] csv::Error),
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProjectionError {
    pub rmse: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub median: f64,
}

impl fmt::Debug for ProjectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Projection Error [ rmse: {}, min: {}, max: {}, mean: {}, stddev: {}, median: {} ]",
            self.rmse, self.min, self.max, self.mean, self.stddev, self.median
        )
    }
}

impl ProjectionError {
    /// Summary statistics over a set of non-negative error magnitudes.
    pub fn from_errors(errors: &[f64]) -> Result<Self, UtilError> {
        if errors.is_empty() {
            return Err(UtilError::ZeroProjectionPoints);
        }
        if errors.iter().any(|e| !e.is_finite()) {
            return Err(UtilError::NumericalError(
                "Non-finite error value".to_string(),
            ));
        }

        let n = errors.len() as f64;
        let mean = errors.iter().sum::<f64>() / n;
        let variance = errors.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
        let rmse = (errors.iter().map(|x| x.powi(2)).sum::<f64>() / n).sqrt();

        let mut sorted_errors = errors.to_vec();
        sorted_errors.sort_by(f64::total_cmp);
        let mid = sorted_errors.len() / 2;
        let median = if sorted_errors.len() % 2 == 0 {
            (sorted_errors[mid - 1] + sorted_errors[mid]) / 2.0
        } else {
            sorted_errors[mid]
        };

        Ok(ProjectionError {
            rmse,
            min: sorted_errors[0],
            max: sorted_errors[sorted_errors.len() - 1],
            mean,
            stddev: variance.sqrt(),
            median,
        })
    }
}

/// Generate pixel/ray correspondences on a grid covering the image.
///
/// Each grid pixel is unprojected with `camera_model`; only pixels whose ray
/// projects back onto them are kept, which drops the image regions where the
/// model folds or leaves the front hemisphere.
///
/// # Returns
///
/// * Matrix2xX where each column is a pixel
/// * Matrix3xX where each column is the corresponding unit ray
pub fn sample_points<T>(
    camera_model: &T,
    n: usize,
) -> Result<(Matrix2xX<f64>, Matrix3xX<f64>), UtilError>
where
    T: ?Sized + CameraModel,
{
    let resolution = camera_model.get_resolution();
    if resolution.is_unset() {
        return Err(UtilError::InvalidParams(
            "Camera resolution must be set to sample points".to_string(),
        ));
    }

    let grid = geometry::sample_points(resolution.width as f64, resolution.height as f64, n);

    let mut valid_2d_points = Vec::new();
    let mut valid_3d_points = Vec::new();
    for p2d in grid {
        let Ok(p3d) = camera_model.unproject(&p2d) else {
            continue;
        };
        if p3d.z <= 0.0 {
            continue;
        }
        match camera_model.project(&p3d) {
            Ok(reprojected) if (reprojected - p2d).norm() < SAMPLE_TOLERANCE_PX => {
                valid_2d_points.push(p2d);
                valid_3d_points.push(p3d);
            }
            _ => {}
        }
    }

    if valid_2d_points.is_empty() {
        return Err(UtilError::ZeroProjectionPoints);
    }

    Ok((
        Matrix2xX::from_columns(&valid_2d_points),
        Matrix3xX::from_columns(&valid_3d_points),
    ))
}

/// Pixel distance between the observations and the projections of `points3d`.
/// Points that fail to project are ignored.
pub fn compute_reprojection_error<T>(
    camera_model: &T,
    points3d: &Matrix3xX<f64>,
    points2d: &Matrix2xX<f64>,
) -> Result<ProjectionError, UtilError>
where
    T: ?Sized + CameraModel,
{
    if points3d.ncols() != points2d.ncols() {
        return Err(UtilError::InvalidParams(
            "Number of 2D and 3D points must match".to_string(),
        ));
    }

    let errors: Vec<f64> = points3d
        .column_iter()
        .zip(points2d.column_iter())
        .filter_map(|(p3d, p2d)| {
            camera_model
                .project(&p3d.into_owned())
                .ok()
                .map(|projected| (projected - p2d).norm())
        })
        .collect();

    ProjectionError::from_errors(&errors)
}

/// Pixel error of `distort_pixel(undistort_pixel(p))` over a grid of about `n` pixels.
pub fn compute_undistortion_error<T>(
    camera_model: &T,
    n: usize,
) -> Result<ProjectionError, UtilError>
where
    T: ?Sized + CameraModel,
{
    let resolution = camera_model.get_resolution();
    let errors: Vec<f64> =
        geometry::sample_points(resolution.width as f64, resolution.height as f64, n)
            .iter()
            .map(|pixel| {
                let restored = camera_model.distort_pixel(&camera_model.undistort_pixel(pixel));
                (restored - pixel).norm()
            })
            .collect();

    ProjectionError::from_errors(&errors)
}

/// Largest error of `remove_distortion(add_distortion(p))` on the normalized
/// plane, over rings of radius up to `max_radius`.
pub fn distortion_roundtrip_error<T>(camera_model: &T, max_radius: f64) -> f64
where
    T: ?Sized + CameraModel,
{
    geometry::radial_probe_points(max_radius, 20, 16)
        .iter()
        .map(|p| (camera_model.remove_distortion(&camera_model.add_distortion(p)) - p).norm())
        .fold(0.0, f64::max)
}

/// One row of an undistortion table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndistortionRecord {
    pub u: f64,
    pub v: f64,
    pub undistorted_u: f64,
    pub undistorted_v: f64,
    pub ray_x: f64,
    pub ray_y: f64,
    pub ray_z: f64,
}

/// Writes pixel, undistorted pixel and ray for a grid of about `n` pixels as CSV.
///
/// Returns the number of rows written.
pub fn export_undistortion_table<T, P>(
    camera_model: &T,
    n: usize,
    path: P,
) -> Result<usize, UtilError>
where
    T: ?Sized + CameraModel,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }

    let (points_2d, points_3d) = sample_points(camera_model, n)?;

    let mut writer = csv::Writer::from_path(path)?;
    for (pixel, ray) in points_2d.column_iter().zip(points_3d.column_iter()) {
        let pixel: Vector2<f64> = pixel.into_owned();
        let undistorted = camera_model.undistort_pixel(&pixel);
        writer.serialize(UndistortionRecord {
            u: pixel.x,
            v: pixel.y,
            undistorted_u: undistorted.x,
            undistorted_v: undistorted.y,
            ray_x: ray.x,
            ray_y: ray.y,
            ray_z: ray.z,
        })?;
    }
    writer.flush()?;

    let rows = points_2d.ncols();
    info!("Exported {rows} undistortion records to {}", path.display());
    Ok(rows)
}

/// Reads back a table written by [`export_undistortion_table`].
pub fn load_undistortion_table<P: AsRef<Path>>(
    path: P,
) -> Result<Vec<UndistortionRecord>, UtilError> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for record in reader.deserialize() {
        records.push(record?);
    }
    if records.is_empty() {
        warn!("Undistortion table is empty");
    }
    Ok(records)
}

/// Logs the parameters of a camera model.
pub fn display_model_parameters(camera_model: &dyn CameraModel) {
    let intrinsics = camera_model.get_intrinsics();
    let resolution = camera_model.get_resolution();
    info!("Camera model: {}", camera_model.kind());
    info!(
        "  focal: {:.4}, cx: {:.4}, cy: {:.4}",
        intrinsics.focal, intrinsics.cx, intrinsics.cy
    );
    info!("  resolution: {}x{}", resolution.width, resolution.height);
    if camera_model.has_distortion() {
        info!("  distortion: {:?}", camera_model.get_distortion());
    }
    info!("  flat parameters: {:?}", camera_model.params());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{FisheyeModel, Intrinsics, PinholeModel, Resolution};

    fn fisheye() -> FisheyeModel {
        FisheyeModel::load_from_yaml("samples/fisheye4.yaml").unwrap()
    }

    #[test]
    fn test_projection_error_statistics() {
        let stats = ProjectionError::from_errors(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.median, 2.5);
        assert!((stats.rmse - 7.5_f64.sqrt()).abs() < 1e-12);
        assert!((stats.stddev - 1.25_f64.sqrt()).abs() < 1e-12);

        assert!(matches!(
            ProjectionError::from_errors(&[]),
            Err(UtilError::ZeroProjectionPoints)
        ));
    }

    #[test]
    fn test_sample_points_reproject() {
        let model = fisheye();
        let (points_2d, points_3d) = sample_points(&model, 100).unwrap();
        assert_eq!(points_2d.ncols(), points_3d.ncols());
        assert!(points_2d.ncols() > 50);

        let error = compute_reprojection_error(&model, &points_3d, &points_2d).unwrap();
        assert!(error.max < SAMPLE_TOLERANCE_PX);
    }

    #[test]
    fn test_sample_points_requires_resolution() {
        let model =
            PinholeModel::new(Intrinsics::new(300.0, 160.0, 120.0), Resolution::default()).unwrap();
        assert!(matches!(
            sample_points(&model, 10),
            Err(UtilError::InvalidParams(_))
        ));
    }

    #[test]
    fn test_undistortion_error_is_small() {
        let model = FisheyeModel::new(
            Intrinsics::new(350.0, 320.0, 240.0),
            Resolution {
                width: 640,
                height: 480,
            },
            [-0.02, 0.01, -0.005, 0.001],
        )
        .unwrap();
        let error = compute_undistortion_error(&model, 200).unwrap();
        assert!(error.max < 1e-6, "{error:?}");
        assert!(distortion_roundtrip_error(&model, 2.0) < 1e-6);
    }

    #[test]
    fn test_export_undistortion_table() {
        let model = fisheye();
        let path = "output/undistortion_table.csv";

        let rows = export_undistortion_table(&model, 50, path).unwrap();
        let records = load_undistortion_table(path).unwrap();
        assert_eq!(records.len(), rows);

        let first = &records[0];
        let expected = model.undistort_pixel(&Vector2::new(first.u, first.v));
        assert!((expected.x - first.undistorted_u).abs() < 1e-9);
        assert!((expected.y - first.undistorted_v).abs() < 1e-9);

        fs::remove_file(path).unwrap();
    }
}
