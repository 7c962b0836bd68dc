//! Internal reconstruction snapshot handed to the exporter.
//!
//! This is the read-only view of a finished structure-from-motion run: global poses, camera
//! intrinsics, the features extracted from each image, the track graph and the table of
//! triangulated points. Nothing in here is modified by the export.

use cgmath::{Matrix3, Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::rotation::from_rows;
use crate::Error;

/// World to camera pose of one view.
#[derive(Debug, Clone, PartialEq)]
pub struct Pose {
    pub rotation: Matrix3<f64>,
    pub translation: Vector3<f64>,
}

/// Pinhole intrinsics of a physical camera.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub width: u64,
    pub height: u64,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

/// Features extracted from one image, in extraction order.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageFeatures {
    pub image_path: String,
    /// Index into [`Reconstruction::intrinsics`].
    pub camera: usize,
    pub features: Vec<Point2<f64>>,
}

/// One 2D observation of a track.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackObservation {
    pub view_id: usize,
    pub feature_id: usize,
    pub coord: Point2<f64>,
    /// False when the observation was rejected as an outlier.
    pub used: bool,
    pub color: [u8; 3],
    pub reprojection_error: f64,
}

/// All observations of a single 3D point candidate.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Track {
    pub observations: Vec<TrackObservation>,
}

/// Triangulated coordinates per track, and whether triangulation succeeded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointTable {
    pub coords: Vec<Point3<f64>>,
    pub used: Vec<bool>,
}

impl PointTable {
    pub fn is_used(&self, track: usize) -> bool {
        self.used.get(track).cloned().unwrap_or(false) && track < self.coords.len()
    }

    pub fn num_used(&self) -> usize {
        (0..self.used.len()).filter(|&i| self.is_used(i)).count()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconstruction {
    /// Indexed by view id. `None` when pose estimation did not produce anything.
    pub poses: Option<Vec<Pose>>,
    pub intrinsics: Vec<Intrinsics>,
    /// Indexed by view id.
    pub features: Vec<ImageFeatures>,
    pub tracks: Vec<Track>,
    /// `None` when triangulation was not run.
    pub points: Option<PointTable>,
}

impl Reconstruction {
    pub fn num_views(&self) -> usize {
        self.poses.as_ref().map(|x| x.len()).unwrap_or(0)
    }

    /// Load a reconstruction from a JSON snapshot. See [`Snapshot`] for the layout.
    pub fn from_json_file(path: &Path) -> Result<Self, Error> {
        let file = File::open(path)?;
        let snapshot: Snapshot = serde_json::from_reader(BufReader::new(file))?;
        Ok(Reconstruction::from(snapshot))
    }

    /// Write a reconstruction as a JSON snapshot.
    pub fn write_json_file(&self, path: &Path) -> Result<(), Error> {
        let file = std::io::BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(file, &Snapshot::from(self))?;
        Ok(())
    }
}

/// On-disk JSON layout of a [`Reconstruction`].
///
/// ```json
/// {
///   "poses": [{"rotation": [[1,0,0],[0,1,0],[0,0,1]], "translation": [0,0,0]}],
///   "intrinsics": [{"width": 640, "height": 480, "fx": 500, "fy": 500, "cx": 320, "cy": 240}],
///   "images": [{"path": "img/0.jpg", "camera": 0, "features": [[10.5, 20.0]]}],
///   "tracks": [[{"view": 0, "feature": 0, "coord": [10.5, 20.0], "color": [255, 0, 0], "error": 0.3}]],
///   "points": {"coords": [[0,0,5]], "used": [true]}
/// }
/// ```
///
/// Rotations are given row by row.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub poses: Option<Vec<PoseRecord>>,
    #[serde(default)]
    pub intrinsics: Vec<Intrinsics>,
    #[serde(default)]
    pub images: Vec<ImageRecord>,
    #[serde(default)]
    pub tracks: Vec<Vec<ObservationRecord>>,
    #[serde(default)]
    pub points: Option<PointsRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PoseRecord {
    pub rotation: [[f64; 3]; 3],
    pub translation: [f64; 3],
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageRecord {
    pub path: String,
    #[serde(default)]
    pub camera: usize,
    #[serde(default)]
    pub features: Vec<[f64; 2]>,
}

fn default_used() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ObservationRecord {
    pub view: usize,
    pub feature: usize,
    pub coord: [f64; 2],
    #[serde(default = "default_used")]
    pub used: bool,
    #[serde(default)]
    pub color: [u8; 3],
    #[serde(default)]
    pub error: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PointsRecord {
    pub coords: Vec<[f64; 3]>,
    pub used: Vec<bool>,
}

impl From<Snapshot> for Reconstruction {
    fn from(s: Snapshot) -> Self {
        Reconstruction {
            poses: s.poses.map(|poses| {
                poses
                    .into_iter()
                    .map(|p| Pose {
                        rotation: from_rows(p.rotation),
                        translation: Vector3::new(
                            p.translation[0],
                            p.translation[1],
                            p.translation[2],
                        ),
                    })
                    .collect()
            }),
            intrinsics: s.intrinsics,
            features: s
                .images
                .into_iter()
                .map(|img| ImageFeatures {
                    image_path: img.path,
                    camera: img.camera,
                    features: img
                        .features
                        .iter()
                        .map(|f| Point2::new(f[0], f[1]))
                        .collect(),
                })
                .collect(),
            tracks: s
                .tracks
                .into_iter()
                .map(|obs| Track {
                    observations: obs
                        .into_iter()
                        .map(|o| TrackObservation {
                            view_id: o.view,
                            feature_id: o.feature,
                            coord: Point2::new(o.coord[0], o.coord[1]),
                            used: o.used,
                            color: o.color,
                            reprojection_error: o.error,
                        })
                        .collect(),
                })
                .collect(),
            points: s.points.map(|p| PointTable {
                coords: p
                    .coords
                    .iter()
                    .map(|c| Point3::new(c[0], c[1], c[2]))
                    .collect(),
                used: p.used,
            }),
        }
    }
}

impl<'a> From<&'a Reconstruction> for Snapshot {
    fn from(r: &'a Reconstruction) -> Self {
        Snapshot {
            poses: r.poses.as_ref().map(|poses| {
                poses
                    .iter()
                    .map(|p| PoseRecord {
                        rotation: [
                            [p.rotation.x.x, p.rotation.y.x, p.rotation.z.x],
                            [p.rotation.x.y, p.rotation.y.y, p.rotation.z.y],
                            [p.rotation.x.z, p.rotation.y.z, p.rotation.z.z],
                        ],
                        translation: [p.translation.x, p.translation.y, p.translation.z],
                    })
                    .collect()
            }),
            intrinsics: r.intrinsics.clone(),
            images: r
                .features
                .iter()
                .map(|f| ImageRecord {
                    path: f.image_path.clone(),
                    camera: f.camera,
                    features: f.features.iter().map(|x| [x.x, x.y]).collect(),
                })
                .collect(),
            tracks: r
                .tracks
                .iter()
                .map(|t| {
                    t.observations
                        .iter()
                        .map(|o| ObservationRecord {
                            view: o.view_id,
                            feature: o.feature_id,
                            coord: [o.coord.x, o.coord.y],
                            used: o.used,
                            color: o.color,
                            error: o.reprojection_error,
                        })
                        .collect()
                })
                .collect(),
            points: r.points.as_ref().map(|p| PointsRecord {
                coords: p.coords.iter().map(|c| [c.x, c.y, c.z]).collect(),
                used: p.used.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_layout() {
        let json = r#"{
            "poses": [{"rotation": [[0,-1,0],[1,0,0],[0,0,1]], "translation": [1,2,3]}],
            "intrinsics": [{"width": 640, "height": 480, "fx": 500, "fy": 510, "cx": 320, "cy": 240}],
            "images": [{"path": "img/0.jpg", "features": [[10.5, 20.0], [1, 2]]}],
            "tracks": [[{"view": 0, "feature": 1, "coord": [1, 2], "color": [255, 0, 0], "error": 0.25}]],
            "points": {"coords": [[0, 0, 5]], "used": [true]}
        }"#;
        let snapshot: Snapshot = serde_json::from_str(json).unwrap();
        let rec = Reconstruction::from(snapshot);

        let pose = &rec.poses.as_ref().unwrap()[0];
        // row 0, column 1
        assert_eq!(pose.rotation[1][0], -1.0);
        assert_eq!(pose.translation, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(rec.features[0].camera, 0);
        assert_eq!(rec.features[0].features.len(), 2);
        let obs = &rec.tracks[0].observations[0];
        assert!(obs.used);
        assert_eq!(obs.feature_id, 1);
        assert_eq!(obs.color, [255, 0, 0]);
        assert!(rec.points.as_ref().unwrap().is_used(0));
        assert!(!rec.points.as_ref().unwrap().is_used(1));
    }

    #[test]
    fn test_snapshot_missing_sections() {
        let rec = Reconstruction::from(serde_json::from_str::<Snapshot>("{}").unwrap());
        assert!(rec.poses.is_none());
        assert!(rec.points.is_none());
        assert_eq!(rec.num_views(), 0);
    }

    #[test]
    fn test_snapshot_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshot.json");
        let rec = Reconstruction {
            poses: Some(vec![Pose {
                rotation: from_rows([[0.0, -1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]),
                translation: Vector3::new(0.5, 0.0, -2.0),
            }]),
            intrinsics: vec![Intrinsics {
                width: 100,
                height: 80,
                fx: 90.0,
                fy: 91.0,
                cx: 50.0,
                cy: 40.0,
            }],
            features: vec![ImageFeatures {
                image_path: "a.png".to_string(),
                camera: 0,
                features: vec![Point2::new(1.0, 2.0)],
            }],
            tracks: vec![],
            points: None,
        };
        rec.write_json_file(&path).unwrap();
        assert_eq!(Reconstruction::from_json_file(&path).unwrap(), rec);
    }
}
