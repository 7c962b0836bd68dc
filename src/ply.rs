//! PLY renderings of a sparse model for quick visual inspection.
//!
//! `scene.ply` holds the colored 3D points followed by a small red frustum per image, drawn with
//! edges. `points.ply` holds the 3D points only.

use cgmath::prelude::*;
use cgmath::{Point3, Vector3};
use log::{debug, info};
use ply_rs::ply::{
    Addable, DefaultElement, ElementDef, Encoding, Ply, Property, PropertyDef, PropertyType,
    ScalarType,
};
use ply_rs::writer::Writer;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::export::Visualizer;
use crate::model::{Image, Scene};
use crate::Error;

/// Frustum half width as a fraction of the point cloud bounding box diagonal.
const FRUSTUM_SIZE: f64 = 0.0015;
/// Frustum depth as a fraction of the point cloud bounding box diagonal.
const FRUSTUM_DEPTH: f64 = 0.0025;

pub const VERTICES_PER_CAMERA: usize = 6;
pub const EDGES_PER_CAMERA: usize = 8;

const CAMERA_COLOR: [u8; 3] = [255, 0, 0];

/// Length of the bounding box diagonal of `points`, 1 if there are no points.
pub fn bounding_box_diagonal<'a, I>(points: I) -> f64
where
    I: IntoIterator<Item = &'a Point3<f64>>,
{
    let mut it = points.into_iter();
    let first = match it.next() {
        Some(p) => *p,
        None => return 1.0,
    };
    let (min, max) = it.fold((first, first), |(min, max), p| {
        (
            Point3::new(min.x.min(p.x), min.y.min(p.y), min.z.min(p.z)),
            Point3::new(max.x.max(p.x), max.y.max(p.y), max.z.max(p.z)),
        )
    });
    min.distance(max)
}

/// World space frustum vertices of an image: the center, four corners on the image plane at
/// depth `depth` and half width `size`, and the apex.
pub fn camera_frustum(image: &Image, size: f64, depth: f64) -> [Point3<f64>; VERTICES_PER_CAMERA] {
    let r_t = image.rotation_matrix().transpose();
    let center = image.center();
    let to_world = |c: Vector3<f64>| center + r_t * c;
    [
        center,
        to_world(Vector3::new(-size, -size, depth)),
        to_world(Vector3::new(size, -size, depth)),
        to_world(Vector3::new(size, size, depth)),
        to_world(Vector3::new(-size, size, depth)),
        to_world(Vector3::new(0.0, 0.0, 0.0)),
    ]
}

/// Edges of a frustum whose vertices start at `base`: apex to each corner, then the corner loop.
pub fn frustum_edges(base: usize) -> [(usize, usize); EDGES_PER_CAMERA] {
    let apex = base + 5;
    let corner = |i: usize| base + 1 + i % 4;
    [
        (apex, corner(0)),
        (apex, corner(1)),
        (apex, corner(2)),
        (apex, corner(3)),
        (corner(0), corner(1)),
        (corner(1), corner(2)),
        (corner(2), corner(3)),
        (corner(3), corner(0)),
    ]
}

fn color_properties(element: &mut ElementDef) {
    for name in &["red", "green", "blue"] {
        element.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::UChar),
        ));
    }
}

fn vertex(p: &Point3<f64>, color: [u8; 3]) -> DefaultElement {
    let mut v = DefaultElement::new();
    v.insert("x".to_string(), Property::Float(p.x as f32));
    v.insert("y".to_string(), Property::Float(p.y as f32));
    v.insert("z".to_string(), Property::Float(p.z as f32));
    v.insert("red".to_string(), Property::UChar(color[0]));
    v.insert("green".to_string(), Property::UChar(color[1]));
    v.insert("blue".to_string(), Property::UChar(color[2]));
    v
}

fn edge(a: usize, b: usize, color: [u8; 3]) -> DefaultElement {
    let mut e = DefaultElement::new();
    e.insert("vertex1".to_string(), Property::Int(a as i32));
    e.insert("vertex2".to_string(), Property::Int(b as i32));
    e.insert("red".to_string(), Property::UChar(color[0]));
    e.insert("green".to_string(), Property::UChar(color[1]));
    e.insert("blue".to_string(), Property::UChar(color[2]));
    e
}

fn new_ply(with_edges: bool) -> Ply<DefaultElement> {
    let mut ply = Ply::<DefaultElement>::new();
    ply.header.encoding = Encoding::Ascii;
    ply.header
        .comments
        .push("3D points and camera frustums (red)".to_string());

    let mut vertex_element = ElementDef::new("vertex".to_string());
    for name in &["x", "y", "z"] {
        vertex_element.properties.add(PropertyDef::new(
            name.to_string(),
            PropertyType::Scalar(ScalarType::Float),
        ));
    }
    color_properties(&mut vertex_element);
    ply.header.elements.add(vertex_element);

    if with_edges {
        let mut edge_element = ElementDef::new("edge".to_string());
        for name in &["vertex1", "vertex2"] {
            edge_element.properties.add(PropertyDef::new(
                name.to_string(),
                PropertyType::Scalar(ScalarType::Int),
            ));
        }
        color_properties(&mut edge_element);
        ply.header.elements.add(edge_element);
    }
    ply
}

fn write(path: &Path, ply: &mut Ply<DefaultElement>) -> Result<(), Error> {
    let mut file = BufWriter::new(File::create(path)?);
    let writer = Writer::new();
    writer.write_ply(&mut file, ply)?;
    file.flush()?;
    Ok(())
}

fn point_vertices(scene: &Scene) -> Vec<DefaultElement> {
    scene
        .points3d
        .iter()
        .map(|p| vertex(&p.xyz, p.color))
        .collect()
}

/// Write the 3D points and a frustum for every image.
pub fn write_scene_ply(path: &Path, scene: &Scene) -> Result<(), Error> {
    let diagonal = bounding_box_diagonal(scene.points3d.iter().map(|p| &p.xyz));
    let size = FRUSTUM_SIZE * diagonal;
    let depth = FRUSTUM_DEPTH * diagonal;
    debug!(
        "Scene diagonal {}, frustum size {}, depth {}",
        diagonal, size, depth
    );

    let mut vertices = point_vertices(scene);
    let mut edges = Vec::with_capacity(scene.num_images() * EDGES_PER_CAMERA);
    for image in &scene.images {
        let base = vertices.len();
        for p in camera_frustum(image, size, depth).iter() {
            vertices.push(vertex(p, CAMERA_COLOR));
        }
        for (a, b) in frustum_edges(base).iter() {
            edges.push(edge(*a, *b, CAMERA_COLOR));
        }
    }

    let mut ply = new_ply(true);
    ply.payload.insert("vertex".to_string(), vertices);
    ply.payload.insert("edge".to_string(), edges);
    write(path, &mut ply)?;
    info!(
        "Wrote {} points and {} cameras to {}",
        scene.num_points3d(),
        scene.num_images(),
        path.display()
    );
    Ok(())
}

/// Write the 3D points only.
pub fn write_points_ply(path: &Path, scene: &Scene) -> Result<(), Error> {
    let mut ply = new_ply(false);
    ply.payload
        .insert("vertex".to_string(), point_vertices(scene));
    write(path, &mut ply)?;
    info!(
        "Wrote {} points to {}",
        scene.num_points3d(),
        path.display()
    );
    Ok(())
}

/// Writes `scene.ply` and `points.ply` into the export directory.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlyVisualizer;

impl Visualizer for PlyVisualizer {
    fn visualize(&self, dir: &Path, scene: &Scene) -> Result<(), Error> {
        write_scene_ply(&dir.join("scene.ply"), scene)?;
        write_points_ply(&dir.join("points.ply"), scene)
    }
}
