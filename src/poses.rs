//! Global pose table (`global_poses.txt`) and pose import from COLMAP `images.txt`.

use log::{debug, info, warn};

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::model::Scene;
use crate::reconstruction::Pose;
use crate::rotation::{column_major, quaternion_to_matrix};
use crate::Error;

/// Map from image file stem to pose id.
pub type NameMap = BTreeMap<String, usize>;

/// Named world to camera pose.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalPose {
    pub id: usize,
    pub name: String,
    pub pose: Pose,
}

/// Ordered list of named poses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalPoses {
    pub poses: Vec<GlobalPose>,
}

impl GlobalPoses {
    pub fn new() -> Self {
        GlobalPoses { poses: Vec::new() }
    }

    pub fn push(&mut self, id: usize, name: &str, pose: Pose) {
        self.poses.push(GlobalPose {
            id: id,
            name: name.to_string(),
            pose: pose,
        });
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&GlobalPose> {
        self.poses.iter().find(|x| x.id == id)
    }

    /// Poses of all images of a scene, keyed by image id.
    pub fn from_scene(scene: &Scene) -> Self {
        let mut poses = GlobalPoses::new();
        for image in &scene.images {
            poses.push(
                image.id as usize,
                &image.name,
                Pose {
                    rotation: image.rotation_matrix(),
                    translation: image.translation,
                },
            );
        }
        poses
    }

    /// Poses keyed by OpenMVG pose id, named after the image stems that reference them.
    ///
    /// Names are visited in sorted order. Names whose pose id has no extrinsics are skipped.
    pub fn from_extrinsics(extrinsics: &BTreeMap<usize, Pose>, names: &NameMap) -> Self {
        let mut poses = GlobalPoses::new();
        for (name, id) in names {
            match extrinsics.get(id) {
                Some(pose) => poses.push(*id, name, pose.clone()),
                None => warn!("View {} has pose id {} without extrinsics", name, id),
            }
        }
        poses
    }

    /// Write in `global_poses.txt` layout: the pose count on the first line, then one line per
    /// pose with the name, the column-major rotation and the translation.
    pub fn write<W: Write>(&self, w: &mut W) -> Result<(), Error> {
        writeln!(w, "{}", self.poses.len())?;
        for p in &self.poses {
            write!(w, "{}", p.name)?;
            for x in column_major(&p.pose.rotation).iter() {
                write!(w, " {:.8}", x)?;
            }
            let t = p.pose.translation;
            writeln!(w, " {:.8} {:.8} {:.8}", t.x, t.y, t.z)?;
        }
        Ok(())
    }
}

pub fn write_global_poses(path: &Path, poses: &GlobalPoses) -> Result<(), Error> {
    let mut file = BufWriter::new(File::create(path)?);
    poses.write(&mut file)?;
    file.flush()?;
    info!("Wrote {} poses to {}", poses.len(), path.display());
    Ok(())
}

/// Everything before the last `.` of a file name.
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) => &name[..i],
        None => name,
    }
}

/// Load world to camera poses from a COLMAP `images.txt`, assigning pose ids through `names`.
///
/// Images whose name (without extension) is not in `names` are skipped. Fails if no pose could
/// be loaded.
pub fn poses_from_images_txt(path: &Path, names: &NameMap) -> Result<GlobalPoses, Error> {
    let images = crate::text::read_images_text(path)?;
    let mut poses = GlobalPoses::new();
    for image in &images {
        let stem = file_stem(&image.name);
        let id = match names.get(stem) {
            Some(id) => *id,
            None => {
                warn!("Cannot find pose id for image {}", stem);
                continue;
            }
        };
        debug!(
            "Loaded pose for {} (image id {}, pose id {})",
            stem, image.id, id
        );
        poses.push(
            id,
            stem,
            Pose {
                rotation: quaternion_to_matrix(image.rotation),
                translation: image.translation,
            },
        );
    }

    if poses.is_empty() {
        return Err(Error::MissingInput(format!(
            "no poses could be loaded from {}",
            path.display()
        )));
    }
    info!(
        "Loaded {} of {} poses from {}",
        poses.len(),
        images.len(),
        path.display()
    );
    Ok(poses)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::prelude::*;
    use cgmath::{AbsDiffEq, Matrix3, Rad, Vector3};

    #[test]
    fn test_write_layout() {
        let mut poses = GlobalPoses::new();
        poses.push(
            0,
            "img_0",
            Pose {
                rotation: crate::rotation::from_rows([
                    [1.0, 2.0, 3.0],
                    [4.0, 5.0, 6.0],
                    [7.0, 8.0, 9.0],
                ]),
                translation: Vector3::new(0.5, -1.0, 1.0 / 3.0),
            },
        );
        let mut buf = Vec::new();
        poses.write(&mut buf).unwrap();
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "1\nimg_0 1.00000000 4.00000000 7.00000000 2.00000000 5.00000000 8.00000000 \
             3.00000000 6.00000000 9.00000000 0.50000000 -1.00000000 0.33333333\n"
        );
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("a.b.jpg"), "a.b");
        assert_eq!(file_stem("noext"), "noext");
    }

    #[test]
    fn test_poses_from_images_txt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.txt");
        std::fs::write(
            &path,
            "# header\n\
             1 1 0 0 0 1 2 3 1 a.jpg\n\
             \n\
             2 0.70710678118 0 0.70710678118 0 0 0 1 1 b.png\n\
             1 2 -1\n\
             3 1 0 0 0 0 0 0 1 unknown.jpg\n",
        )
        .unwrap();
        let mut names = NameMap::new();
        names.insert("a".to_string(), 4);
        names.insert("b".to_string(), 0);

        let poses = poses_from_images_txt(&path, &names).unwrap();
        assert_eq!(poses.len(), 2);
        let a = poses.get(4).unwrap();
        assert_eq!(a.name, "a");
        assert_eq!(a.pose.translation, Vector3::new(1.0, 2.0, 3.0));
        assert!(a.pose.rotation.abs_diff_eq(&Matrix3::identity(), 1e-12));
        let b = poses.get(0).unwrap();
        assert!(b
            .pose
            .rotation
            .abs_diff_eq(&Matrix3::from_angle_y(Rad(std::f64::consts::FRAC_PI_2)), 1e-9));
    }

    #[test]
    fn test_no_poses_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("images.txt");
        std::fs::write(&path, "1 1 0 0 0 1 2 3 1 a.jpg\n\n").unwrap();
        assert!(poses_from_images_txt(&path, &NameMap::new()).is_err());
        assert!(poses_from_images_txt(&dir.path().join("missing.txt"), &NameMap::new()).is_err());
    }

    #[test]
    fn test_from_extrinsics() {
        let pose = |x| Pose {
            rotation: Matrix3::identity(),
            translation: Vector3::new(x, 0.0, 0.0),
        };
        let mut extrinsics = BTreeMap::new();
        extrinsics.insert(0, pose(1.0));
        extrinsics.insert(2, pose(2.0));
        let mut names = NameMap::new();
        names.insert("b".to_string(), 2);
        names.insert("a".to_string(), 0);
        names.insert("c".to_string(), 5);
        let poses = GlobalPoses::from_extrinsics(&extrinsics, &names);
        let order = poses.poses.iter().map(|p| p.name.as_str()).collect::<Vec<_>>();
        assert_eq!(order, vec!["a", "b"]);
        assert_eq!(poses.get(2).unwrap().pose.translation.x, 2.0);
    }
}
