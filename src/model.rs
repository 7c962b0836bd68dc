//! In-memory COLMAP sparse model: cameras, images and 3D points.
//!
//! These records are short-lived export artifacts. They are built from a
//! [`Reconstruction`](crate::reconstruction::Reconstruction) on every export call and handed to the
//! binary or text writers.

use cgmath::prelude::*;
use cgmath::{Matrix3, Point2, Point3, Quaternion, Vector3};

use std::collections::HashMap;

use crate::Error;

/// Point id stored in an observation that is not associated with any 3D point.
///
/// Point ids are unsigned 64 bit values everywhere in this crate. The text format writes this
/// value as `-1`.
pub const INVALID_POINT3D_ID: u64 = std::u64::MAX;

/// COLMAP camera model tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraModel {
    SimplePinhole,
    Pinhole,
    SimpleRadial,
    Radial,
    OpenCV,
    OpenCVFisheye,
    FullOpenCV,
    Fov,
    SimpleRadialFisheye,
    RadialFisheye,
    ThinPrismFisheye,
}

impl CameraModel {
    pub fn from_id(id: i32) -> Option<Self> {
        match id {
            0 => Some(CameraModel::SimplePinhole),
            1 => Some(CameraModel::Pinhole),
            2 => Some(CameraModel::SimpleRadial),
            3 => Some(CameraModel::Radial),
            4 => Some(CameraModel::OpenCV),
            5 => Some(CameraModel::OpenCVFisheye),
            6 => Some(CameraModel::FullOpenCV),
            7 => Some(CameraModel::Fov),
            8 => Some(CameraModel::SimpleRadialFisheye),
            9 => Some(CameraModel::RadialFisheye),
            10 => Some(CameraModel::ThinPrismFisheye),
            _ => None,
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "SIMPLE_PINHOLE" => Some(CameraModel::SimplePinhole),
            "PINHOLE" => Some(CameraModel::Pinhole),
            "SIMPLE_RADIAL" => Some(CameraModel::SimpleRadial),
            "RADIAL" => Some(CameraModel::Radial),
            "OPENCV" => Some(CameraModel::OpenCV),
            "OPENCV_FISHEYE" => Some(CameraModel::OpenCVFisheye),
            "FULL_OPENCV" => Some(CameraModel::FullOpenCV),
            "FOV" => Some(CameraModel::Fov),
            "SIMPLE_RADIAL_FISHEYE" => Some(CameraModel::SimpleRadialFisheye),
            "RADIAL_FISHEYE" => Some(CameraModel::RadialFisheye),
            "THIN_PRISM_FISHEYE" => Some(CameraModel::ThinPrismFisheye),
            _ => None,
        }
    }

    pub fn id(&self) -> i32 {
        match self {
            CameraModel::SimplePinhole => 0,
            CameraModel::Pinhole => 1,
            CameraModel::SimpleRadial => 2,
            CameraModel::Radial => 3,
            CameraModel::OpenCV => 4,
            CameraModel::OpenCVFisheye => 5,
            CameraModel::FullOpenCV => 6,
            CameraModel::Fov => 7,
            CameraModel::SimpleRadialFisheye => 8,
            CameraModel::RadialFisheye => 9,
            CameraModel::ThinPrismFisheye => 10,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CameraModel::SimplePinhole => "SIMPLE_PINHOLE",
            CameraModel::Pinhole => "PINHOLE",
            CameraModel::SimpleRadial => "SIMPLE_RADIAL",
            CameraModel::Radial => "RADIAL",
            CameraModel::OpenCV => "OPENCV",
            CameraModel::OpenCVFisheye => "OPENCV_FISHEYE",
            CameraModel::FullOpenCV => "FULL_OPENCV",
            CameraModel::Fov => "FOV",
            CameraModel::SimpleRadialFisheye => "SIMPLE_RADIAL_FISHEYE",
            CameraModel::RadialFisheye => "RADIAL_FISHEYE",
            CameraModel::ThinPrismFisheye => "THIN_PRISM_FISHEYE",
        }
    }

    /// Number of intrinsic parameters stored for this model. The binary camera record has no
    /// explicit count field, so this is the only way a reader can know the record length.
    pub fn num_params(&self) -> usize {
        match self {
            CameraModel::SimplePinhole => 3,
            CameraModel::Pinhole => 4,
            CameraModel::SimpleRadial => 4,
            CameraModel::Radial => 5,
            CameraModel::OpenCV => 8,
            CameraModel::OpenCVFisheye => 8,
            CameraModel::FullOpenCV => 12,
            CameraModel::Fov => 5,
            CameraModel::SimpleRadialFisheye => 4,
            CameraModel::RadialFisheye => 5,
            CameraModel::ThinPrismFisheye => 12,
        }
    }
}

/// Camera intrinsics record.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    pub id: u32,
    /// Raw model tag. Kept as an integer so that text models with unknown tags survive a read.
    pub model: i32,
    pub width: u64,
    pub height: u64,
    pub params: Vec<f64>,
}

impl Camera {
    /// Pinhole camera with parameters `fx, fy, cx, cy`.
    pub fn pinhole(id: u32, width: u64, height: u64, fx: f64, fy: f64, cx: f64, cy: f64) -> Self {
        Camera {
            id: id,
            model: CameraModel::Pinhole.id(),
            width: width,
            height: height,
            params: vec![fx, fy, cx, cy],
        }
    }

    pub fn model(&self) -> Option<CameraModel> {
        CameraModel::from_id(self.model)
    }

    /// Check that the parameter list has exactly the length the model tag prescribes.
    pub fn validate(&self) -> Result<CameraModel, Error> {
        let model = self.model().ok_or_else(|| {
            Error::InvalidCamera(format!(
                "camera {} has unknown model id {}",
                self.id, self.model
            ))
        })?;
        if model.num_params() != self.params.len() {
            return Err(Error::InvalidCamera(format!(
                "camera {} ({}) has {} parameters, expected {}",
                self.id,
                model.name(),
                self.params.len(),
                model.num_params()
            )));
        }
        Ok(model)
    }
}

/// A 2D feature of an image and the 3D point it belongs to.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub xy: Point2<f64>,
    pub point3d_id: u64,
}

impl Observation {
    /// Observation that is not linked to a 3D point.
    pub fn untriangulated(xy: Point2<f64>) -> Self {
        Observation {
            xy: xy,
            point3d_id: INVALID_POINT3D_ID,
        }
    }

    pub fn has_point3d(&self) -> bool {
        self.point3d_id != INVALID_POINT3D_ID
    }
}

/// Registered image with its pose and one observation per extracted feature.
///
/// The pose is world to camera: a world point `p` maps into the camera frame as `R p + t`.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub id: u32,
    /// Unit quaternion `(w, x, y, z)`.
    pub rotation: Quaternion<f64>,
    pub translation: Vector3<f64>,
    pub camera_id: u32,
    pub name: String,
    pub observations: Vec<Observation>,
}

impl Image {
    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        crate::rotation::quaternion_to_matrix(self.rotation)
    }

    /// Camera center in world coordinates, `-R^T t`.
    pub fn center(&self) -> Point3<f64> {
        Point3::from_vec(-(self.rotation_matrix().transpose() * self.translation))
    }

    /// Number of observations that are linked to a 3D point.
    pub fn num_points3d(&self) -> usize {
        self.observations.iter().filter(|o| o.has_point3d()).count()
    }
}

/// Element of a 3D point track: image id and index into that image's observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TrackElement {
    pub image_id: u32,
    pub point2d_idx: u32,
}

/// Triangulated 3D point.
#[derive(Debug, Clone, PartialEq)]
pub struct Point3D {
    pub id: u64,
    pub xyz: Point3<f64>,
    pub color: [u8; 3],
    /// Mean reprojection error over the track.
    pub error: f64,
    pub track: Vec<TrackElement>,
}

/// Complete sparse model.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scene {
    pub cameras: Vec<Camera>,
    pub images: Vec<Image>,
    pub points3d: Vec<Point3D>,
}

impl Scene {
    pub fn num_cameras(&self) -> usize {
        self.cameras.len()
    }

    pub fn num_images(&self) -> usize {
        self.images.len()
    }

    pub fn num_points3d(&self) -> usize {
        self.points3d.len()
    }

    /// Total number of image observations, triangulated or not.
    pub fn num_observations(&self) -> usize {
        self.images.iter().map(|x| x.observations.len()).sum()
    }

    pub fn image_by_id(&self, id: u32) -> Option<&Image> {
        self.images.iter().find(|x| x.id == id)
    }

    /// World space camera centers in image order.
    pub fn camera_centers(&self) -> Vec<Point3<f64>> {
        self.images.iter().map(|x| x.center()).collect()
    }

    /// Mean track length over all 3D points.
    pub fn mean_track_length(&self) -> f64 {
        if self.points3d.is_empty() {
            return 0.0;
        }
        self.points3d.iter().map(|p| p.track.len()).sum::<usize>() as f64
            / self.points3d.len() as f64
    }

    /// Verify that point tracks and image observations reference each other.
    ///
    /// Every track element `(i, k)` of a point `p` must land on an observation of image `i` whose
    /// point id is `p.id`, and every linked observation must appear exactly once in the track of
    /// the point it references.
    pub fn check_consistency(&self) -> Result<(), Error> {
        let image_index: HashMap<u32, usize> = self
            .images
            .iter()
            .enumerate()
            .map(|(i, img)| (img.id, i))
            .collect();
        let camera_ids = self.cameras.iter().map(|c| c.id).collect::<Vec<_>>();

        for image in &self.images {
            if !camera_ids.contains(&image.camera_id) {
                return Err(Error::Inconsistent(format!(
                    "image {} references unknown camera {}",
                    image.id, image.camera_id
                )));
            }
        }

        // (image position, observation index) -> number of times seen in a track
        let mut seen: HashMap<(usize, usize), usize> = HashMap::new();
        for point in &self.points3d {
            for element in &point.track {
                let i = *image_index.get(&element.image_id).ok_or_else(|| {
                    Error::Inconsistent(format!(
                        "point {} references unknown image {}",
                        point.id, element.image_id
                    ))
                })?;
                let k = element.point2d_idx as usize;
                let observation = self.images[i].observations.get(k).ok_or_else(|| {
                    Error::Inconsistent(format!(
                        "point {} references observation {} of image {} which has {} observations",
                        point.id,
                        k,
                        element.image_id,
                        self.images[i].observations.len()
                    ))
                })?;
                if observation.point3d_id != point.id {
                    return Err(Error::Inconsistent(format!(
                        "observation {} of image {} points to {} instead of {}",
                        k, element.image_id, observation.point3d_id, point.id
                    )));
                }
                *seen.entry((i, k)).or_insert(0) += 1;
            }
        }

        for (i, image) in self.images.iter().enumerate() {
            for (k, observation) in image.observations.iter().enumerate() {
                if !observation.has_point3d() {
                    continue;
                }
                match seen.get(&(i, k)) {
                    Some(1) => {}
                    Some(n) => {
                        return Err(Error::Inconsistent(format!(
                            "observation {} of image {} appears {} times in tracks",
                            k, image.id, n
                        )))
                    }
                    None => {
                        return Err(Error::Inconsistent(format!(
                            "observation {} of image {} references point {} which does not track it",
                            k, image.id, observation.point3d_id
                        )))
                    }
                }
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for Scene {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "COLMAP model with {} cameras, {} images, {} points, and {} observations",
            self.num_cameras(),
            self.num_images(),
            self.num_points3d(),
            self.num_observations()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::AbsDiffEq;

    fn two_view_scene() -> Scene {
        let identity = Quaternion::new(1.0, 0.0, 0.0, 0.0);
        let obs = |id| Observation {
            xy: Point2::new(1.0, 2.0),
            point3d_id: id,
        };
        Scene {
            cameras: vec![Camera::pinhole(0, 640, 480, 500.0, 500.0, 320.0, 240.0)],
            images: vec![
                Image {
                    id: 0,
                    rotation: identity,
                    translation: Vector3::new(0.0, 0.0, 0.0),
                    camera_id: 0,
                    name: "a.jpg".to_string(),
                    observations: vec![obs(0), obs(INVALID_POINT3D_ID)],
                },
                Image {
                    id: 1,
                    rotation: identity,
                    translation: Vector3::new(-1.0, 0.0, 0.0),
                    camera_id: 0,
                    name: "b.jpg".to_string(),
                    observations: vec![obs(INVALID_POINT3D_ID), obs(0)],
                },
            ],
            points3d: vec![Point3D {
                id: 0,
                xyz: Point3::new(0.0, 0.0, 5.0),
                color: [10, 20, 30],
                error: 0.5,
                track: vec![
                    TrackElement {
                        image_id: 0,
                        point2d_idx: 0,
                    },
                    TrackElement {
                        image_id: 1,
                        point2d_idx: 1,
                    },
                ],
            }],
        }
    }

    #[test]
    fn test_model_lookup() {
        for id in 0..11 {
            let model = CameraModel::from_id(id).unwrap();
            assert_eq!(model.id(), id);
            assert_eq!(CameraModel::from_name(model.name()), Some(model));
        }
        assert_eq!(CameraModel::from_id(11), None);
        assert_eq!(CameraModel::Pinhole.num_params(), 4);
    }

    #[test]
    fn test_validate_camera() {
        let mut cam = Camera::pinhole(3, 640, 480, 500.0, 500.0, 320.0, 240.0);
        assert_eq!(cam.validate().unwrap(), CameraModel::Pinhole);
        cam.params.pop();
        assert!(cam.validate().is_err());
        cam.model = 42;
        assert!(cam.validate().is_err());
    }

    #[test]
    fn test_center() {
        let scene = two_view_scene();
        let c = scene.images[1].center();
        assert!(c.abs_diff_eq(&Point3::new(1.0, 0.0, 0.0), 1e-12));
    }

    #[test]
    fn test_consistent() {
        let scene = two_view_scene();
        assert!(scene.check_consistency().is_ok());
        assert_eq!(scene.num_observations(), 4);
        assert_eq!(scene.mean_track_length(), 2.0);
    }

    #[test]
    fn test_inconsistent_dangling_observation() {
        let mut scene = two_view_scene();
        scene.images[0].observations[1].point3d_id = 0;
        assert!(scene.check_consistency().is_err());
    }

    #[test]
    fn test_inconsistent_track() {
        let mut scene = two_view_scene();
        scene.points3d[0].track[1].point2d_idx = 0;
        assert!(scene.check_consistency().is_err());
    }
}
