//! Pose import from OpenMVG `sfm_data.json`.
//!
//! Only the JSON serialization is understood. Binary and XML `sfm_data` files use cereal's
//! polymorphic encoding and have to be converted first.

use cgmath::Vector3;
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::Value;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::poses::{file_stem, NameMap};
use crate::reconstruction::Pose;
use crate::rotation::from_rows;
use crate::Error;

/// Refuse anything that is not a `.json` sfm_data file.
pub fn check_format(path: &Path) -> Result<(), Error> {
    let ext = path.extension().and_then(|x| x.to_str()).unwrap_or("");
    match ext {
        "json" => Ok(()),
        "bin" | "xml" => {
            error!(
                "Cannot read {}: convert it to JSON with `openMVG_main_ConvertSfM_DataFormat -i {} -o output.json`",
                path.display(),
                path.display()
            );
            Err(Error::UnsupportedFormat(format!(
                "{} is an OpenMVG .{} file, convert it with `openMVG_main_ConvertSfM_DataFormat -i {} -o output.json`",
                path.display(),
                ext,
                path.display()
            )))
        }
        _ => Err(Error::UnsupportedFormat(format!(
            "unknown sfm_data extension `{}` for {}",
            ext,
            path.display()
        ))),
    }
}

fn read_document(path: &Path) -> Result<Value, Error> {
    check_format(path)?;
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn section<'a>(doc: &'a Value, name: &str, path: &Path) -> Result<&'a Vec<Value>, Error> {
    match doc.get(name).and_then(|x| x.as_array()) {
        Some(x) => Ok(x),
        None => {
            error!("No {} found in {}", name, path.display());
            Err(Error::MissingInput(format!(
                "{} has no `{}` section",
                path.display(),
                name
            )))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ViewData {
    filename: String,
    id_pose: usize,
}

#[derive(Debug, Deserialize)]
struct Extrinsic {
    rotation: [[f64; 3]; 3],
    center: [f64; 3],
}

/// Map from image file stem to pose id, read from the `views` section.
///
/// Views without `filename` or `id_pose` are skipped. Fails if no view could be mapped.
pub fn view_name_map(path: &Path) -> Result<NameMap, Error> {
    let doc = read_document(path)?;
    let mut names = NameMap::new();
    for (i, view) in section(&doc, "views", path)?.iter().enumerate() {
        let data = match view.pointer("/value/ptr_wrapper/data") {
            Some(x) => x,
            None => {
                warn!("Invalid view structure for view entry {}", i);
                continue;
            }
        };
        match ViewData::deserialize(data) {
            Ok(v) => {
                debug!("Mapped {} -> {}", file_stem(&v.filename), v.id_pose);
                names.insert(file_stem(&v.filename).to_string(), v.id_pose);
            }
            Err(e) => warn!("Skipping view entry {}: {}", i, e),
        }
    }

    if names.is_empty() {
        return Err(Error::MissingInput(format!(
            "no valid views in {}",
            path.display()
        )));
    }
    info!("Mapped {} file names to pose ids", names.len());
    Ok(names)
}

/// Poses from the `extrinsics` section, keyed by pose id.
///
/// `rotation` is read row by row. `center` is used directly as the world to camera translation.
pub fn load_extrinsics(path: &Path) -> Result<BTreeMap<usize, Pose>, Error> {
    let doc = read_document(path)?;
    let mut poses = BTreeMap::new();
    for (i, entry) in section(&doc, "extrinsics", path)?.iter().enumerate() {
        let key = match entry.get("key").and_then(|x| x.as_u64()) {
            Some(x) => x as usize,
            None => {
                warn!("Extrinsics entry {} has no key", i);
                continue;
            }
        };
        let value = match entry.get("value") {
            Some(x) => x,
            None => {
                warn!("Extrinsics entry for pose {} has no value", key);
                continue;
            }
        };
        match Extrinsic::deserialize(value) {
            Ok(e) => {
                poses.insert(
                    key,
                    Pose {
                        rotation: from_rows(e.rotation),
                        translation: Vector3::new(e.center[0], e.center[1], e.center[2]),
                    },
                );
            }
            Err(e) => warn!("Skipping invalid pose {}: {}", key, e),
        }
    }

    if poses.is_empty() {
        return Err(Error::MissingInput(format!(
            "no valid poses in {}",
            path.display()
        )));
    }
    info!("Loaded {} poses from {}", poses.len(), path.display());
    Ok(poses)
}
