//! Export structure-from-motion reconstructions as COLMAP sparse models.
//!
//! A [`Reconstruction`] (global poses, intrinsics, per-image features, tracks and triangulated
//! points) is turned into a COLMAP [`Scene`] with dense point ids and one observation per
//! extracted feature, optionally rescaled, and written as `cameras.bin`, `images.bin` and
//! `points3D.bin`. See [`export::export_scene`].

extern crate byteorder;
extern crate cgmath;
extern crate itertools;
extern crate log;
extern crate nom;
extern crate ply_rs;
extern crate serde;
extern crate serde_json;
extern crate thiserror;

pub mod assemble;
pub mod binary;
pub mod export;
pub mod model;
pub mod openmvg;
pub mod ply;
pub mod poses;
pub mod reconstruction;
pub mod remap;
pub mod rotation;
pub mod scale;
pub mod text;

pub use assemble::CameraPolicy;
pub use export::{export_scene, ExportOptions, ExportSummary, TextConverter, Visualizer};
pub use model::{Camera, CameraModel, Image, Observation, Point3D, Scene, INVALID_POINT3D_ID};
pub use reconstruction::Reconstruction;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("parse error: {0}")]
    ParseError(String),
    #[error("io error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("invalid camera: {0}")]
    InvalidCamera(String),
    #[error("invalid image name: {0:?}")]
    InvalidImageName(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("model conversion failed: {0}")]
    Converter(String),
    #[error("inconsistent model: {0}")]
    Inconsistent(String),
}
