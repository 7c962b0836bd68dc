//! Rescale a scene so that neighbouring cameras are roughly one unit apart.

use cgmath::prelude::*;
use cgmath::Point3;
use itertools::Itertools;
use log::{info, warn};

/// Camera pairs closer than this fraction of the largest distance are treated as pure rotations.
const PURE_ROTATION_FRACTION: f64 = 0.01;
const DEGENERATE_DISTANCE: f64 = 1e-10;
const MIN_FACTOR: f64 = 1e-6;
const MAX_FACTOR: f64 = 1e6;

/// Scale factor and the camera distance statistics it was derived from.
#[derive(Debug, Clone, PartialEq)]
pub struct ScaleEstimate {
    pub factor: f64,
    pub num_cameras: usize,
    /// Number of camera pairs considered.
    pub num_pairs: usize,
    /// Number of pairs that were far enough apart to contribute.
    pub num_valid_pairs: usize,
    pub max_distance: f64,
    pub threshold: f64,
    /// Smallest distance among the contributing pairs, 0 if there were none.
    pub min_distance: f64,
}

impl ScaleEstimate {
    fn identity(num_cameras: usize, num_pairs: usize, max_distance: f64) -> Self {
        ScaleEstimate {
            factor: 1.0,
            num_cameras: num_cameras,
            num_pairs: num_pairs,
            num_valid_pairs: 0,
            max_distance: max_distance,
            threshold: PURE_ROTATION_FRACTION * max_distance,
            min_distance: 0.0,
        }
    }

    /// Compute the factor that maps the smallest non-degenerate camera distance to 1.
    ///
    /// Returns a factor of exactly 1.0 when there are fewer than two cameras, when all cameras
    /// coincide, or when no pair survives the pure rotation filter.
    pub fn from_centers(centers: &[Point3<f64>]) -> Self {
        let distances = centers
            .iter()
            .tuple_combinations()
            .map(|(a, b)| a.distance(*b))
            .collect::<Vec<_>>();
        let max_distance = distances.iter().cloned().fold(0.0, f64::max);
        if distances.is_empty() || max_distance < DEGENERATE_DISTANCE {
            return ScaleEstimate::identity(centers.len(), distances.len(), max_distance);
        }

        let threshold = PURE_ROTATION_FRACTION * max_distance;
        let valid = distances
            .iter()
            .cloned()
            .filter(|d| *d >= threshold)
            .collect::<Vec<_>>();
        if valid.is_empty() {
            return ScaleEstimate::identity(centers.len(), distances.len(), max_distance);
        }
        let min_distance = valid.iter().cloned().fold(std::f64::INFINITY, f64::min);

        ScaleEstimate {
            factor: (1.0 / min_distance).max(MIN_FACTOR).min(MAX_FACTOR),
            num_cameras: centers.len(),
            num_pairs: distances.len(),
            num_valid_pairs: valid.len(),
            max_distance: max_distance,
            threshold: threshold,
            min_distance: min_distance,
        }
    }

    /// Smallest contributing distance after scaling.
    pub fn scaled_min_distance(&self) -> f64 {
        self.min_distance * self.factor
    }
}

/// Scale all 3D points and image translations of `scene` in place. Rotations are untouched, so
/// camera centers scale by the same factor.
pub fn normalize_scale(scene: &mut crate::model::Scene) -> ScaleEstimate {
    let estimate = ScaleEstimate::from_centers(&scene.camera_centers());

    if estimate.num_valid_pairs == 0 {
        warn!(
            "Cannot estimate scale from {} cameras (max distance {:e}), keeping scale 1",
            estimate.num_cameras, estimate.max_distance
        );
        return estimate;
    }

    info!(
        "Scale estimate: {} cameras, {}/{} pairs above pure rotation threshold {:e} (max distance {:e})",
        estimate.num_cameras,
        estimate.num_valid_pairs,
        estimate.num_pairs,
        estimate.threshold,
        estimate.max_distance
    );
    info!(
        "Scaling scene by {:e}, minimum camera distance {:e} -> {:e}",
        estimate.factor,
        estimate.min_distance,
        estimate.scaled_min_distance()
    );

    let s = estimate.factor;
    for point in scene.points3d.iter_mut() {
        point.xyz = Point3::from_vec(point.xyz.to_vec() * s);
    }
    for image in scene.images.iter_mut() {
        image.translation *= s;
    }
    estimate
}
