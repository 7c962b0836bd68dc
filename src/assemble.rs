//! Build cameras and images of a COLMAP model from a reconstruction.

use log::{debug, info, warn};

use std::path::Path;

use crate::model::*;
use crate::reconstruction::{Intrinsics, Reconstruction};
use crate::rotation::matrix_to_quaternion;
use crate::Error;

/// How camera records are emitted for the images of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraPolicy {
    /// One camera per image, camera id equal to image id. This duplicates the intrinsics of
    /// images that share a sensor, but matches what existing consumers of the export expect.
    PerImage,
    /// One camera per intrinsics entry. Images reference the entry they were taken with.
    Shared,
}

impl Default for CameraPolicy {
    fn default() -> Self {
        CameraPolicy::PerImage
    }
}

fn pinhole(id: u32, intrinsics: &Intrinsics) -> Camera {
    Camera::pinhole(
        id,
        intrinsics.width,
        intrinsics.height,
        intrinsics.fx,
        intrinsics.fy,
        intrinsics.cx,
        intrinsics.cy,
    )
}

/// Display name of an image: the file name of its path.
pub fn image_name(path: &str) -> String {
    Path::new(path)
        .file_name()
        .and_then(|x| x.to_str())
        .map(|x| x.to_string())
        .unwrap_or_else(|| path.to_string())
}

/// Create the cameras and images of a scene. Observations and 3D points are left empty; see
/// [`crate::remap`] for filling them in.
///
/// Fails if the reconstruction has no poses or no intrinsics. A missing point table is not an
/// error here, it only leaves the exported model without 3D points.
pub fn assemble_scene(rec: &Reconstruction, policy: CameraPolicy) -> Result<Scene, Error> {
    let poses = rec
        .poses
        .as_ref()
        .ok_or_else(|| Error::MissingInput("reconstruction has no global poses".to_string()))?;
    if rec.intrinsics.is_empty() {
        return Err(Error::MissingInput(
            "reconstruction has no camera intrinsics".to_string(),
        ));
    }
    if rec.points.is_none() {
        warn!("Reconstruction has no 3D points, exporting cameras and images only");
    }

    let mut scene = Scene::default();
    if policy == CameraPolicy::Shared {
        scene.cameras = rec
            .intrinsics
            .iter()
            .enumerate()
            .map(|(i, intrinsics)| pinhole(i as u32, intrinsics))
            .collect();
    }

    for (view_id, pose) in poses.iter().enumerate() {
        let (name, camera) = match rec.features.get(view_id) {
            Some(f) => (image_name(&f.image_path), f.camera),
            None => {
                warn!(
                    "No feature table for view {}, exporting it without observations",
                    view_id
                );
                (format!("{}", view_id), 0)
            }
        };

        if name.contains('\0') {
            warn!("View {} has a NUL byte in its name {:?}, skipping it", view_id, name);
            continue;
        }

        let intrinsics = match rec.intrinsics.get(camera) {
            Some(x) => x,
            None => {
                warn!(
                    "View {} references camera {} but only {} are known, skipping it",
                    view_id,
                    camera,
                    rec.intrinsics.len()
                );
                continue;
            }
        };

        let camera_id = match policy {
            CameraPolicy::PerImage => {
                scene.cameras.push(pinhole(view_id as u32, intrinsics));
                view_id as u32
            }
            CameraPolicy::Shared => camera as u32,
        };

        debug!("Image {} ({}) uses camera {}", view_id, name, camera_id);
        scene.images.push(Image {
            id: view_id as u32,
            rotation: matrix_to_quaternion(&pose.rotation),
            translation: pose.translation,
            camera_id: camera_id,
            name: name,
            observations: Vec::new(),
        });
    }

    info!(
        "Assembled {} images and {} cameras",
        scene.num_images(),
        scene.num_cameras()
    );
    Ok(scene)
}
