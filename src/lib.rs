//! Pinhole Fisheye Library
//!
//! A Rust library for a pinhole camera with four-coefficient equidistant fisheye
//! distortion. It provides:
//! - Forward and inverse lens distortion on the normalized camera plane
//! - Pixel-space undistortion and distortion
//! - A flat parameter vector `[focal, cx, cy, k1, k2, k3, k4]` for bundle adjustment
//! - YAML and JSON persistence of the calibration
//!
//! The library also includes optimization routines for camera calibration using
//! the tiny-solver optimization framework.

pub mod camera;
pub mod geometry;
pub mod optimization;
pub mod util;

// Re-export commonly used types
pub use camera::{
    CameraModel, CameraModelEnum, CameraModelError, CameraModelKind, FisheyeModel, Intrinsics,
    PinholeModel, Resolution,
};

pub use optimization::{FisheyeOptimizationCost, Optimizer};
