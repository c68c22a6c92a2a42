use nalgebra::Vector2;

/// Generate a grid of sample points that are evenly distributed across the image
///
/// # Arguments
///
/// * `width` - The width of the image in pixels
/// * `height` - The height of the image in pixels
/// * `n` - The approximate number of points to generate
///
/// # Returns
///
/// A vector of 2D points at the centers of the grid cells, in pixel coordinates.
/// Empty when the image has no area or `n` is zero.
pub fn sample_points(width: f64, height: f64, n: usize) -> Vec<Vector2<f64>> {
    if width <= 0.0 || height <= 0.0 || n == 0 {
        return Vec::new();
    }

    let num_cells_x = ((n as f64 * (width / height)).sqrt().round() as usize).max(1);
    let num_cells_y = ((n as f64 * (height / width)).sqrt().round() as usize).max(1);

    let cell_width = width / num_cells_x as f64;
    let cell_height = height / num_cells_y as f64;

    (0..num_cells_y)
        .flat_map(move |i| {
            (0..num_cells_x).map(move |j| {
                Vector2::new(
                    (j as f64 + 0.5) * cell_width,
                    (i as f64 + 0.5) * cell_height,
                )
            })
        })
        .collect()
}

/// Points on concentric rings around the origin of the normalized camera plane.
///
/// Produces `rings * per_ring` points with radii `max_radius * k / rings` for
/// `k = 1..=rings`, plus the origin itself.
pub fn radial_probe_points(max_radius: f64, rings: usize, per_ring: usize) -> Vec<Vector2<f64>> {
    let mut points = vec![Vector2::zeros()];
    for k in 1..=rings {
        let radius = max_radius * k as f64 / rings as f64;
        for j in 0..per_ring {
            let angle = std::f64::consts::TAU * j as f64 / per_ring as f64;
            points.push(Vector2::new(radius * angle.cos(), radius * angle.sin()));
        }
    }
    points
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_points() {
        let width = 800f64;
        let height = 600f64;
        let n = 100;

        let points = sample_points(width, height, n);

        // It might not be exactly n due to rounding
        let expected_count = (n as f64 * 0.8) as usize..=(n as f64 * 1.2) as usize;
        assert!(
            expected_count.contains(&points.len()),
            "Expected around {} points, got {}",
            n,
            points.len()
        );

        for point in &points {
            assert!(
                point.x >= 0.0 && point.x < width,
                "Point x-coordinate outside image bounds: {}",
                point.x
            );
            assert!(
                point.y >= 0.0 && point.y < height,
                "Point y-coordinate outside image bounds: {}",
                point.y
            );
        }
    }

    #[test]
    fn test_sample_points_degenerate() {
        assert!(sample_points(0.0, 600.0, 10).is_empty());
        assert!(sample_points(800.0, 600.0, 0).is_empty());
        assert_eq!(sample_points(800.0, 600.0, 1).len(), 1);
    }

    #[test]
    fn test_radial_probe_points() {
        let points = radial_probe_points(2.0, 4, 8);
        assert_eq!(points.len(), 1 + 4 * 8);
        let max = points.iter().map(|p| p.norm()).fold(0.0, f64::max);
        assert!((max - 2.0).abs() < 1e-12);
    }
}
