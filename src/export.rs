//! Export a reconstruction as a COLMAP sparse model directory.

use log::{info, warn};

use std::io::ErrorKind;
use std::path::Path;
use std::process::Command;

use crate::assemble::{assemble_scene, CameraPolicy};
use crate::binary::write_model_binary;
use crate::model::Scene;
use crate::poses::{write_global_poses, GlobalPoses};
use crate::reconstruction::Reconstruction;
use crate::remap::{complete_observations, populate_points};
use crate::scale::{normalize_scale, ScaleEstimate};
use crate::Error;

/// Turns the binary model in a directory into its text form.
pub trait TextConverter {
    fn convert(&self, dir: &Path) -> Result<(), Error>;
}

/// Renders an exported scene for inspection.
pub trait Visualizer {
    fn visualize(&self, dir: &Path, scene: &Scene) -> Result<(), Error>;
}

/// Runs `colmap model_converter` in place on the export directory.
#[derive(Debug, Clone)]
pub struct ColmapModelConverter {
    pub program: String,
}

impl Default for ColmapModelConverter {
    fn default() -> Self {
        ColmapModelConverter {
            program: "colmap".to_string(),
        }
    }
}

impl ColmapModelConverter {
    pub fn new(program: &str) -> Self {
        ColmapModelConverter {
            program: program.to_string(),
        }
    }
}

impl TextConverter for ColmapModelConverter {
    fn convert(&self, dir: &Path) -> Result<(), Error> {
        info!("Converting binary model in {} to text", dir.display());
        let status = Command::new(&self.program)
            .arg("model_converter")
            .arg("--input_path")
            .arg(dir)
            .arg("--output_path")
            .arg(dir)
            .arg("--output_type")
            .arg("TXT")
            .status()
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => Error::Converter(format!(
                    "`{}` not found, make sure COLMAP is installed and in PATH",
                    self.program
                )),
                _ => Error::Converter(format!("failed to run `{}`: {}", self.program, e)),
            })?;
        if !status.success() {
            return Err(Error::Converter(format!(
                "`{} model_converter` failed with {}",
                self.program, status
            )));
        }
        Ok(())
    }
}

/// Leaves the binary model as is.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoConversion;

impl TextConverter for NoConversion {
    fn convert(&self, _dir: &Path) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoVisualization;

impl Visualizer for NoVisualization {
    fn visualize(&self, _dir: &Path, _scene: &Scene) -> Result<(), Error> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub camera_policy: CameraPolicy,
    /// Rescale so that the closest pair of (non co-located) cameras is one unit apart.
    pub normalize_scale: bool,
    /// Also write `global_poses.txt` next to the model.
    pub write_global_poses: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            camera_policy: CameraPolicy::PerImage,
            normalize_scale: true,
            write_global_poses: false,
        }
    }
}

/// What an export produced.
#[derive(Debug, Clone)]
pub struct ExportSummary {
    /// The model as written to disk.
    pub scene: Scene,
    /// `None` when normalization was disabled.
    pub scale: Option<ScaleEstimate>,
    pub converted: bool,
    pub visualized: bool,
}

impl std::fmt::Display for ExportSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.scene)?;
        if let Some(scale) = &self.scale {
            write!(f, ", scaled by {}", scale.factor)?;
        }
        Ok(())
    }
}

/// Export `rec` as a COLMAP binary model into `dir`, creating the directory if needed.
///
/// The scene is assembled, its observations completed and linked to dense point ids, and
/// optionally rescaled before the binary files are written. A model that fails
/// [`Scene::check_consistency`] is never written. Text conversion and visualization
/// run afterwards; their failures are logged and do not fail the export.
pub fn export_scene(
    rec: &Reconstruction,
    dir: &Path,
    options: &ExportOptions,
    converter: &dyn TextConverter,
    visualizer: &dyn Visualizer,
) -> Result<ExportSummary, Error> {
    info!(
        "Exporting {} views and {} tracks to {}",
        rec.num_views(),
        rec.tracks.len(),
        dir.display()
    );
    let mut scene = assemble_scene(rec, options.camera_policy)?;
    complete_observations(&mut scene, rec);
    let remapper = populate_points(&mut scene, rec);
    scene.check_consistency()?;
    info!("{} tracks mapped to dense point ids", remapper.len());

    let scale = if options.normalize_scale {
        Some(normalize_scale(&mut scene))
    } else {
        None
    };

    std::fs::create_dir_all(dir)?;
    write_model_binary(dir, &scene)?;

    if options.write_global_poses {
        let path = dir.join("global_poses.txt");
        if let Err(e) = write_global_poses(&path, &GlobalPoses::from_scene(&scene)) {
            warn!("Cannot write {}: {}", path.display(), e);
        }
    }

    let converted = match converter.convert(dir) {
        Ok(()) => true,
        Err(e) => {
            warn!("Skipping text conversion: {}", e);
            false
        }
    };
    let visualized = match visualizer.visualize(dir, &scene) {
        Ok(()) => true,
        Err(e) => {
            warn!("Skipping visualization: {}", e);
            false
        }
    };

    info!("Exported {}", scene);
    Ok(ExportSummary {
        scene: scene,
        scale: scale,
        converted: converted,
        visualized: visualized,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::*;
    use crate::model::*;
    use crate::reconstruction::*;
    use cgmath::prelude::*;
    use cgmath::{Matrix3, Point2, Point3, Vector3};
    use std::cell::Cell;

    struct FailingConverter {
        calls: Cell<usize>,
    }

    impl TextConverter for FailingConverter {
        fn convert(&self, _dir: &Path) -> Result<(), Error> {
            self.calls.set(self.calls.get() + 1);
            Err(Error::Converter("no colmap here".to_string()))
        }
    }

    struct FailingVisualizer;

    impl Visualizer for FailingVisualizer {
        fn visualize(&self, _dir: &Path, _scene: &Scene) -> Result<(), Error> {
            Err(Error::IOError(std::io::Error::new(
                ErrorKind::Other,
                "disk full",
            )))
        }
    }

    fn obs(view: usize, feature: usize) -> TrackObservation {
        TrackObservation {
            view_id: view,
            feature_id: feature,
            coord: Point2::new(0.0, 0.0),
            used: true,
            color: [100, 100, 100],
            reprojection_error: 0.5,
        }
    }

    /// Two views. View 0 has 5 features of which 1 and 3 belong to triangulated tracks 7 and 12.
    fn reconstruction() -> Reconstruction {
        let mut tracks = vec![Track::default(); 13];
        tracks[7].observations = vec![obs(0, 1), obs(1, 0)];
        tracks[12].observations = vec![obs(0, 3), obs(1, 1)];
        let mut used = vec![false; 13];
        used[7] = true;
        used[12] = true;
        Reconstruction {
            poses: Some(vec![
                Pose {
                    rotation: Matrix3::identity(),
                    translation: Vector3::new(0.0, 0.0, 0.0),
                },
                Pose {
                    rotation: Matrix3::identity(),
                    translation: Vector3::new(-4.0, 0.0, 0.0),
                },
            ]),
            intrinsics: vec![Intrinsics {
                width: 640,
                height: 480,
                fx: 500.0,
                fy: 500.0,
                cx: 320.0,
                cy: 240.0,
            }],
            features: vec![
                ImageFeatures {
                    image_path: "images/a.jpg".to_string(),
                    camera: 0,
                    features: (0..5).map(|i| Point2::new(i as f64, 0.0)).collect(),
                },
                ImageFeatures {
                    image_path: "images/b.jpg".to_string(),
                    camera: 0,
                    features: vec![Point2::new(5.0, 5.0), Point2::new(6.0, 6.0)],
                },
            ],
            tracks: tracks,
            points: Some(PointTable {
                coords: (0..13).map(|i| Point3::new(i as f64, 0.0, 8.0)).collect(),
                used: used,
            }),
        }
    }

    #[test]
    fn test_export() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("sparse/0");
        let options = ExportOptions {
            write_global_poses: true,
            ..ExportOptions::default()
        };
        let summary =
            export_scene(&reconstruction(), &out, &options, &NoConversion, &NoVisualization)
                .unwrap();
        let scene = &summary.scene;

        let ids = scene.images[0]
            .observations
            .iter()
            .map(|o| o.point3d_id)
            .collect::<Vec<_>>();
        assert_eq!(
            ids,
            vec![INVALID_POINT3D_ID, 0, INVALID_POINT3D_ID, 1, INVALID_POINT3D_ID]
        );
        assert!(scene.check_consistency().is_ok());

        // cameras 4 apart
        let scale = summary.scale.as_ref().unwrap();
        assert!((scale.factor - 0.25).abs() < 1e-12);
        assert!((scene.images[1].translation.x + 1.0).abs() < 1e-12);
        assert!((scene.points3d[1].xyz.x - 3.0).abs() < 1e-12);

        let len = |name: &str| std::fs::metadata(out.join(name)).unwrap().len() as usize;
        assert_eq!(
            len("cameras.bin"),
            8 + 2 * camera_record_len(CameraModel::Pinhole)
        );
        assert_eq!(
            len("images.bin"),
            8 + scene.images.iter().map(image_record_len).sum::<usize>()
        );
        assert_eq!(
            len("points3D.bin"),
            8 + scene.points3d.iter().map(point3d_record_len).sum::<usize>()
        );
        let poses = std::fs::read_to_string(out.join("global_poses.txt")).unwrap();
        assert!(poses.starts_with("2\na.jpg 1.00000000"));
        assert!(summary.converted);
        assert!(summary.visualized);
    }

    #[test]
    fn test_export_without_normalization() {
        let dir = tempfile::tempdir().unwrap();
        let options = ExportOptions {
            normalize_scale: false,
            camera_policy: CameraPolicy::Shared,
            ..ExportOptions::default()
        };
        let summary = export_scene(
            &reconstruction(),
            dir.path(),
            &options,
            &NoConversion,
            &NoVisualization,
        )
        .unwrap();
        assert!(summary.scale.is_none());
        assert_eq!(summary.scene.num_cameras(), 1);
        assert_eq!(summary.scene.images[1].translation.x, -4.0);
        assert!(!dir.path().join("global_poses.txt").exists());
    }

    #[test]
    fn test_collaborator_failures_are_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let converter = FailingConverter {
            calls: Cell::new(0),
        };
        let summary = export_scene(
            &reconstruction(),
            dir.path(),
            &ExportOptions::default(),
            &converter,
            &FailingVisualizer,
        )
        .unwrap();
        assert_eq!(converter.calls.get(), 1);
        assert!(!summary.converted);
        assert!(!summary.visualized);
        assert!(dir.path().join("images.bin").exists());
    }

    #[test]
    fn test_missing_poses() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("model");
        let mut rec = reconstruction();
        rec.poses = None;
        assert!(export_scene(
            &rec,
            &out,
            &ExportOptions::default(),
            &NoConversion,
            &NoVisualization
        )
        .is_err());
        assert!(!out.exists());
    }

    #[test]
    fn test_missing_converter_program() {
        let dir = tempfile::tempdir().unwrap();
        let converter = ColmapModelConverter::new("sfm2colmap-no-such-program");
        match converter.convert(dir.path()) {
            Err(Error::Converter(msg)) => assert!(msg.contains("not found")),
            x => panic!("expected Converter error, got {:?}", x),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_converter_exit_status() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ColmapModelConverter::new("true").convert(dir.path()).is_ok());
        assert!(ColmapModelConverter::new("false").convert(dir.path()).is_err());
    }
}
