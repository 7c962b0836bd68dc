//! Fill in image observations and 3D points of an assembled scene.
//!
//! Internally, tracks are numbered sparsely: only some of them were triangulated. COLMAP wants
//! point ids `0..N` and an observation list per image that holds every extracted feature in
//! extraction order. [`complete_observations`] allocates those lists and [`populate_points`]
//! assigns dense ids and links observations to points.

use cgmath::Point3;
use log::{debug, info, warn};

use std::collections::{BTreeMap, HashSet};

use crate::model::*;
use crate::reconstruction::Reconstruction;

/// Map from internal track index to dense output point id.
///
/// Ids are handed out sequentially starting at zero in order of assignment.
#[derive(Debug, Clone, Default)]
pub struct IdRemapper {
    map: BTreeMap<usize, u64>,
}

impl IdRemapper {
    pub fn new() -> Self {
        IdRemapper {
            map: BTreeMap::new(),
        }
    }

    /// Dense id of `track`, assigning the next free one if the track has none yet.
    pub fn assign(&mut self, track: usize) -> u64 {
        let next = self.map.len() as u64;
        *self.map.entry(track).or_insert(next)
    }

    pub fn get(&self, track: usize) -> Option<u64> {
        self.map.get(&track).cloned()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// `(track, dense id)` pairs in ascending track order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.map.iter().map(|(t, d)| (*t, *d))
    }
}

/// Give every image one observation per extracted feature, none of them linked to a 3D point.
///
/// Observation `k` of an image is feature `k` of that image's feature table.
pub fn complete_observations(scene: &mut Scene, rec: &Reconstruction) {
    for image in scene.images.iter_mut() {
        image.observations = match rec.features.get(image.id as usize) {
            Some(f) => f
                .features
                .iter()
                .map(|xy| Observation::untriangulated(*xy))
                .collect(),
            None => Vec::new(),
        };
    }
    debug!(
        "Allocated {} observations over {} images",
        scene.num_observations(),
        scene.num_images()
    );
}

fn round_channel(x: f64) -> u8 {
    x.round().max(0.0).min(255.0) as u8
}

/// Create a 3D point for every triangulated track and link it with the image observations.
///
/// Tracks are visited in ascending index order so that id assignment is deterministic. An
/// observation contributes to a point only if it is marked used and refers to an exported image
/// and an existing feature of that image; others are skipped with a warning. Tracks left with no
/// contributing observation are dropped and consume no id. A feature belongs to at most one
/// point: the first track to claim it keeps it. Color and reprojection error are averaged over
/// the contributing observations.
///
/// Must run after [`complete_observations`].
pub fn populate_points(scene: &mut Scene, rec: &Reconstruction) -> IdRemapper {
    let mut remapper = IdRemapper::new();
    let points = match &rec.points {
        Some(p) => p,
        None => {
            warn!("No point table, skipping 3D points");
            return remapper;
        }
    };

    // view id -> position in scene.images
    let mut image_pos = vec![None; rec.num_views().max(rec.features.len())];
    for (i, image) in scene.images.iter().enumerate() {
        if let Some(x) = image_pos.get_mut(image.id as usize) {
            *x = Some(i);
        }
    }

    let mut skipped_tracks = 0;
    let mut skipped_observations = 0;
    for (t, track) in rec.tracks.iter().enumerate() {
        if !points.is_used(t) {
            continue;
        }

        let mut elements = Vec::new();
        let mut visited = HashSet::new();
        let mut color = [0.0; 3];
        let mut error = 0.0;
        for obs in track.observations.iter().filter(|o| o.used) {
            let pos = match image_pos.get(obs.view_id).cloned().flatten() {
                Some(p) => p,
                None => {
                    warn!(
                        "Track {} observes view {} which is not exported, skipping observation",
                        t, obs.view_id
                    );
                    skipped_observations += 1;
                    continue;
                }
            };
            if obs.feature_id >= scene.images[pos].observations.len() {
                warn!(
                    "Track {} observes feature {} of view {} which only has {} features, skipping observation",
                    t,
                    obs.feature_id,
                    obs.view_id,
                    scene.images[pos].observations.len()
                );
                skipped_observations += 1;
                continue;
            }
            if scene.images[pos].observations[obs.feature_id].has_point3d() {
                warn!(
                    "Track {} observes feature {} of view {} which already belongs to point {}, skipping observation",
                    t,
                    obs.feature_id,
                    obs.view_id,
                    scene.images[pos].observations[obs.feature_id].point3d_id
                );
                skipped_observations += 1;
                continue;
            }
            if !visited.insert((pos, obs.feature_id)) {
                debug!(
                    "Track {} observes feature {} of view {} twice",
                    t, obs.feature_id, obs.view_id
                );
                continue;
            }
            for c in 0..3 {
                color[c] += obs.color[c] as f64;
            }
            error += obs.reprojection_error;
            elements.push((pos, obs.feature_id));
        }

        if elements.is_empty() {
            warn!("Track {} has no valid observations, skipping it", t);
            skipped_tracks += 1;
            continue;
        }

        let id = remapper.assign(t);
        let n = elements.len() as f64;
        let mut track_elements = Vec::with_capacity(elements.len());
        for (pos, k) in elements {
            let image = &mut scene.images[pos];
            image.observations[k].point3d_id = id;
            track_elements.push(TrackElement {
                image_id: image.id,
                point2d_idx: k as u32,
            });
        }
        let xyz: Point3<f64> = points.coords[t];
        scene.points3d.push(Point3D {
            id: id,
            xyz: xyz,
            color: [
                round_channel(color[0] / n),
                round_channel(color[1] / n),
                round_channel(color[2] / n),
            ],
            error: error / n,
            track: track_elements,
        });
    }

    if skipped_tracks > 0 || skipped_observations > 0 {
        warn!(
            "Skipped {} tracks and {} observations while building 3D points",
            skipped_tracks, skipped_observations
        );
    }
    info!(
        "Created {} 3D points from {} tracks ({} triangulated)",
        scene.num_points3d(),
        rec.tracks.len(),
        points.num_used()
    );
    remapper
}
