//! Fisheye Camera Tool
//!
//! Loads a camera calibration, reports its parameters and undistortion
//! accuracy, and optionally undistorts a pixel, exports an undistortion table
//! or re-estimates a fisheye model from the loaded one.
//!
//! Usage:
//! ```bash
//! cargo run --example fisheye_tool -- \
//!   --input-path samples/fisheye4.yaml \
//!   --pixel 100.0 200.0 \
//!   --export output/fisheye4_table.csv \
//!   --calibrate
//! ```

use clap::Parser;
use flexi_logger::{colored_detailed_format, detailed_format, Duplicate, FileSpec, Logger};
use log::{error, info};
use nalgebra::Vector2;
use pinhole_fisheye::camera::{CameraModel, CameraModelEnum, FisheyeModel};
use pinhole_fisheye::optimization::{FisheyeOptimizationCost, Optimizer};
use pinhole_fisheye::util;
use std::path::PathBuf;

/// Fisheye camera inspection tool
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the camera model YAML file
    #[arg(short = 'p', long)]
    input_path: PathBuf,

    /// Pixel to undistort, given as `u v`
    #[arg(long, num_args = 2, value_names = ["U", "V"])]
    pixel: Option<Vec<f64>>,

    /// Write a CSV undistortion table to this path
    #[arg(short = 'e', long)]
    export: Option<PathBuf>,

    /// Approximate number of grid samples
    #[arg(short = 'n', long, default_value_t = 500)]
    samples: usize,

    /// Re-estimate a fisheye model from correspondences sampled on the input model
    #[arg(long)]
    calibrate: bool,

    /// Where to save the re-estimated model
    #[arg(short = 'o', long, default_value = "output/fisheye4_calibrated.yaml")]
    output_path: PathBuf,
}

fn calibrate(
    input_model: &dyn CameraModel,
    samples: usize,
    output_path: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let (points_2d, points_3d) = util::sample_points(input_model, samples)?;
    info!("Sampled {} correspondences", points_2d.ncols());

    let initial =
        FisheyeModel::from_intrinsics(input_model.get_intrinsics(), input_model.get_resolution())?;
    let mut cost_model = FisheyeOptimizationCost::new(initial, points_3d.clone(), points_2d.clone());
    cost_model.linear_estimation()?;
    info!("Linear estimation: {:?}", cost_model.get_distortion());

    match cost_model.optimize(true) {
        Ok(()) => info!("Optimization completed successfully!"),
        Err(e) => {
            error!("Optimization failed: {:?}", e);
            info!("Continuing with linear estimation results...");
        }
    }

    let calibrated = cost_model.into_model();
    let reprojection = util::compute_reprojection_error(&calibrated, &points_3d, &points_2d)?;
    info!("Reprojection error: {:?}", reprojection);

    if let Some(parent) = std::path::Path::new(output_path).parent() {
        std::fs::create_dir_all(parent)?;
    }
    calibrated.save_to_yaml(output_path)?;
    info!("Saved calibrated model to {}", output_path);
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    Logger::try_with_str("info")?
        .log_to_file(
            FileSpec::default()
                .directory("logs")
                .suppress_timestamp()
                .suffix("log"),
        )
        .duplicate_to_stdout(Duplicate::All)
        .format_for_files(detailed_format)
        .format_for_stdout(colored_detailed_format)
        .set_palette("196;208;76;39;178".to_string())
        .start()?;

    let cli = Cli::parse();
    info!("Input Path: {:?}", cli.input_path);

    let input_path = cli.input_path.to_str().ok_or("Invalid input path string")?;
    let model = CameraModelEnum::load_from_yaml(input_path)?;
    let camera = model.as_camera_model();
    util::display_model_parameters(camera);

    let undistortion = util::compute_undistortion_error(camera, cli.samples)?;
    info!("Undistort/distort round trip (px): {:?}", undistortion);
    info!(
        "Normalized-plane round trip up to r = 2: {:.3e}",
        util::distortion_roundtrip_error(camera, 2.0)
    );

    if let Some(pixel) = cli.pixel.as_deref() {
        let pixel = Vector2::new(pixel[0], pixel[1]);
        let undistorted = camera.undistort_pixel(&pixel);
        println!(
            "pixel ({:.3}, {:.3}) -> undistorted ({:.3}, {:.3})",
            pixel.x, pixel.y, undistorted.x, undistorted.y
        );
    }

    if let Some(export) = cli.export.as_ref() {
        let rows = util::export_undistortion_table(camera, cli.samples, export)?;
        println!("Exported {} rows to {}", rows, export.display());
    }

    if cli.calibrate {
        let output_path = cli.output_path.to_str().ok_or("Invalid output path string")?;
        calibrate(camera, cli.samples, output_path)?;
    }

    Ok(())
}
