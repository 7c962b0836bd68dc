//! COLMAP text model reader and writer (`cameras.txt`, `images.txt`, `points3D.txt`).
//!
//! The reader is line oriented. Empty lines and lines starting with `#` are ignored, and a record
//! that fails to parse is logged and skipped instead of failing the whole file.

use itertools::Itertools;
use log::{debug, info, warn};
use nom::branch::alt;
use nom::bytes::complete::is_not;
use nom::character::complete::{char, digit1, space0, space1};
use nom::combinator::{all_consuming, map, map_opt, map_res, opt, recognize, rest};
use nom::error::{convert_error, VerboseError};
use nom::multi::many0;
use nom::number::complete::double;
use nom::sequence::{pair, preceded, tuple};
use nom::IResult;

use cgmath::{Point2, Point3, Quaternion, Vector3};

use std::fs::File;
use std::io::prelude::*;
use std::io::BufWriter;
use std::path::Path;
use std::str::FromStr;

use crate::model::*;
use crate::Error;

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

fn unsigned<T: FromStr>(input: &str) -> Res<T> {
    map_res(digit1, |s: &str| s.parse::<T>())(input)
}

fn signed(input: &str) -> Res<i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), |s: &str| {
        s.parse::<i64>()
    })(input)
}

fn token(input: &str) -> Res<&str> {
    is_not(" \t")(input)
}

/// Numeric model id or COLMAP model name.
fn camera_model(input: &str) -> Res<i32> {
    map_opt(token, |s: &str| {
        s.parse::<i32>()
            .ok()
            .or_else(|| CameraModel::from_name(s).map(|m| m.id()))
    })(input)
}

/// Point id of an observation. Negative values mean "no point".
fn point_id(input: &str) -> Res<u64> {
    alt((
        map(preceded(char('-'), digit1), |_| INVALID_POINT3D_ID),
        unsigned::<u64>,
    ))(input)
}

fn camera_line(input: &str) -> Res<Camera> {
    let (input, id) = preceded(space0, unsigned::<u32>)(input)?;
    let (input, model) = preceded(space1, camera_model)(input)?;
    let (input, width) = preceded(space1, unsigned::<u64>)(input)?;
    let (input, height) = preceded(space1, unsigned::<u64>)(input)?;
    let (input, params) = many0(preceded(space1, double))(input)?;
    let (input, _) = space0(input)?;
    Ok((
        input,
        Camera {
            id: id,
            model: model,
            width: width,
            height: height,
            params: params,
        },
    ))
}

/// Image header line. Names end at the first whitespace; anything after it is returned
/// separately so the caller can report it.
fn image_header(input: &str) -> Res<(Image, &str)> {
    let (input, id) = preceded(space0, unsigned::<u32>)(input)?;
    let (input, (qw, qx, qy, qz)) = tuple((
        preceded(space1, double),
        preceded(space1, double),
        preceded(space1, double),
        preceded(space1, double),
    ))(input)?;
    let (input, (tx, ty, tz)) = tuple((
        preceded(space1, double),
        preceded(space1, double),
        preceded(space1, double),
    ))(input)?;
    let (input, camera_id) = preceded(space1, unsigned::<u32>)(input)?;
    let (input, name) = preceded(space1, token)(input)?;
    let (input, extra) = rest(input)?;
    Ok((
        input,
        (
            Image {
                id: id,
                rotation: Quaternion::new(qw, qx, qy, qz),
                translation: Vector3::new(tx, ty, tz),
                camera_id: camera_id,
                name: name.to_string(),
                observations: Vec::new(),
            },
            extra.trim(),
        ),
    ))
}

fn observation(input: &str) -> Res<Observation> {
    map(
        tuple((
            preceded(space0, double),
            preceded(space1, double),
            preceded(space1, point_id),
        )),
        |(x, y, id)| Observation {
            xy: Point2::new(x, y),
            point3d_id: id,
        },
    )(input)
}

fn point_line(input: &str) -> Res<Point3D> {
    let (input, id) = preceded(space0, unsigned::<u64>)(input)?;
    let (input, (x, y, z)) = tuple((
        preceded(space1, double),
        preceded(space1, double),
        preceded(space1, double),
    ))(input)?;
    let (input, (r, g, b)) = tuple((
        preceded(space1, signed),
        preceded(space1, signed),
        preceded(space1, signed),
    ))(input)?;
    let (input, error) = preceded(space1, double)(input)?;
    let (input, track) = many0(map(
        pair(
            preceded(space1, unsigned::<u32>),
            preceded(space1, unsigned::<u32>),
        ),
        |(image_id, point2d_idx)| TrackElement {
            image_id: image_id,
            point2d_idx: point2d_idx,
        },
    ))(input)?;
    let (input, _) = space0(input)?;
    let narrow = |c: i64| c.max(0).min(255) as u8;
    Ok((
        input,
        Point3D {
            id: id,
            xyz: Point3::new(x, y, z),
            color: [narrow(r), narrow(g), narrow(b)],
            error: error,
            track: track,
        },
    ))
}

/// Run `parser` on a complete line, turning nom errors into a readable message.
fn parse_line<'a, T, F>(line: &'a str, parser: F) -> Result<T, Error>
where
    F: Fn(&'a str) -> Res<'a, T>,
{
    all_consuming(parser)(line)
        .map(|x| x.1)
        .map_err(|x| match x {
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                Error::ParseError(convert_error(line, e))
            }
            nom::Err::Incomplete(x) => Error::ParseError(format!("{:?}", x)),
        })
}

fn is_skipped(line: &str) -> bool {
    let line = line.trim();
    line.is_empty() || line.starts_with('#')
}

fn read_file(path: &Path) -> Result<String, Error> {
    let mut file = File::open(path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

/// Parse the contents of a `cameras.txt` file.
pub fn parse_cameras(contents: &str) -> Vec<Camera> {
    let mut cameras = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        if is_skipped(line) {
            continue;
        }
        match parse_line(line, camera_line) {
            Ok(camera) => cameras.push(camera),
            Err(e) => {
                warn!("Skipping malformed camera on line {}: {}", lineno + 1, line);
                debug!("{}", e);
            }
        }
    }
    cameras
}

/// Parse the contents of an `images.txt` file.
///
/// Each image takes two lines. The line directly after an image header always holds its
/// observations, even when it is empty.
pub fn parse_images(contents: &str) -> Vec<Image> {
    let mut images = Vec::new();
    let mut lines = contents.lines().enumerate();
    while let Some((lineno, line)) = lines.next() {
        if is_skipped(line) {
            continue;
        }
        let mut image = match parse_line(line, image_header) {
            Ok((image, extra)) => {
                if !extra.is_empty() {
                    warn!(
                        "Image name on line {} contains whitespace, keeping {:?} and ignoring {:?}",
                        lineno + 1,
                        image.name,
                        extra
                    );
                }
                image
            }
            Err(e) => {
                warn!("Skipping malformed image on line {}: {}", lineno + 1, line);
                debug!("{}", e);
                continue;
            }
        };

        match lines.next() {
            Some((lineno, line)) => match many0(observation)(line) {
                Ok((rest, observations)) => {
                    if !rest.trim().is_empty() {
                        warn!(
                            "Ignoring trailing data on line {} for image {}: {}",
                            lineno + 1,
                            image.id,
                            rest.trim()
                        );
                    }
                    image.observations = observations;
                }
                Err(_) => warn!(
                    "Cannot parse observations of image {} on line {}",
                    image.id,
                    lineno + 1
                ),
            },
            None => warn!("Missing POINTS2D line for image {}", image.id),
        }
        images.push(image);
    }
    images
}

/// Parse the contents of a `points3D.txt` file.
pub fn parse_points3d(contents: &str) -> Vec<Point3D> {
    let mut points = Vec::new();
    for (lineno, line) in contents.lines().enumerate() {
        if is_skipped(line) {
            continue;
        }
        match parse_line(line, point_line) {
            Ok(point) => points.push(point),
            Err(e) => {
                warn!("Skipping malformed 3D point on line {}: {}", lineno + 1, line);
                debug!("{}", e);
            }
        }
    }
    points
}

pub fn read_cameras_text(path: &Path) -> Result<Vec<Camera>, Error> {
    let cameras = parse_cameras(&read_file(path)?);
    debug!("Read {} cameras from {}", cameras.len(), path.display());
    Ok(cameras)
}

pub fn read_images_text(path: &Path) -> Result<Vec<Image>, Error> {
    let images = parse_images(&read_file(path)?);
    debug!("Read {} images from {}", images.len(), path.display());
    Ok(images)
}

pub fn read_points3d_text(path: &Path) -> Result<Vec<Point3D>, Error> {
    let points = parse_points3d(&read_file(path)?);
    debug!("Read {} 3D points from {}", points.len(), path.display());
    Ok(points)
}

/// Read `cameras.txt`, `images.txt` and `points3D.txt` from `dir`.
pub fn read_model_text(dir: &Path) -> Result<Scene, Error> {
    let scene = Scene {
        cameras: read_cameras_text(&dir.join("cameras.txt"))?,
        images: read_images_text(&dir.join("images.txt"))?,
        points3d: read_points3d_text(&dir.join("points3D.txt"))?,
    };
    info!("Read {} from {}", scene, dir.display());
    Ok(scene)
}

fn model_text(model: i32) -> String {
    match CameraModel::from_id(model) {
        Some(m) => m.name().to_string(),
        None => model.to_string(),
    }
}

fn point_id_text(id: u64) -> String {
    if id == INVALID_POINT3D_ID {
        "-1".to_string()
    } else {
        id.to_string()
    }
}

pub fn write_cameras<W: Write>(w: &mut W, cameras: &[Camera]) -> Result<(), Error> {
    writeln!(w, "# Camera list with one line of data per camera:")?;
    writeln!(w, "#   CAMERA_ID, MODEL, WIDTH, HEIGHT, PARAMS[]")?;
    writeln!(w, "# Number of cameras: {}", cameras.len())?;
    for camera in cameras {
        writeln!(
            w,
            "{} {} {} {} {}",
            camera.id,
            model_text(camera.model),
            camera.width,
            camera.height,
            camera.params.iter().join(" ")
        )?;
    }
    Ok(())
}

pub fn write_images<W: Write>(w: &mut W, images: &[Image]) -> Result<(), Error> {
    let mean_observations = if images.is_empty() {
        0.0
    } else {
        images.iter().map(|x| x.num_points3d()).sum::<usize>() as f64 / images.len() as f64
    };
    writeln!(w, "# Image list with two lines of data per image:")?;
    writeln!(w, "#   IMAGE_ID, QW, QX, QY, QZ, TX, TY, TZ, CAMERA_ID, NAME")?;
    writeln!(w, "#   POINTS2D[] as (X, Y, POINT3D_ID)")?;
    writeln!(
        w,
        "# Number of images: {}, mean observations per image: {}",
        images.len(),
        mean_observations
    )?;
    for image in images {
        let q = image.rotation;
        let t = image.translation;
        writeln!(
            w,
            "{} {} {} {} {} {} {} {} {} {}",
            image.id, q.s, q.v.x, q.v.y, q.v.z, t.x, t.y, t.z, image.camera_id, image.name
        )?;
        writeln!(
            w,
            "{}",
            image
                .observations
                .iter()
                .map(|o| format!("{} {} {}", o.xy.x, o.xy.y, point_id_text(o.point3d_id)))
                .join(" ")
        )?;
    }
    Ok(())
}

pub fn write_points3d<W: Write>(w: &mut W, points: &[Point3D]) -> Result<(), Error> {
    let mean_track_length = if points.is_empty() {
        0.0
    } else {
        points.iter().map(|p| p.track.len()).sum::<usize>() as f64 / points.len() as f64
    };
    writeln!(w, "# 3D point list with one line of data per point:")?;
    writeln!(
        w,
        "#   POINT3D_ID, X, Y, Z, R, G, B, ERROR, TRACK[] as (IMAGE_ID, POINT2D_IDX)"
    )?;
    writeln!(
        w,
        "# Number of points: {}, mean track length: {}",
        points.len(),
        mean_track_length
    )?;
    for p in points {
        write!(
            w,
            "{} {} {} {} {} {} {} {}",
            p.id, p.xyz.x, p.xyz.y, p.xyz.z, p.color[0], p.color[1], p.color[2], p.error
        )?;
        for element in &p.track {
            write!(w, " {} {}", element.image_id, element.point2d_idx)?;
        }
        writeln!(w)?;
    }
    Ok(())
}

fn write_file<F>(path: &Path, f: F) -> Result<(), Error>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<(), Error>,
{
    let mut file = BufWriter::new(File::create(path)?);
    f(&mut file)?;
    file.flush()?;
    Ok(())
}

pub fn write_cameras_text(path: &Path, cameras: &[Camera]) -> Result<(), Error> {
    write_file(path, |w| write_cameras(w, cameras))
}

pub fn write_images_text(path: &Path, images: &[Image]) -> Result<(), Error> {
    write_file(path, |w| write_images(w, images))
}

pub fn write_points3d_text(path: &Path, points: &[Point3D]) -> Result<(), Error> {
    write_file(path, |w| write_points3d(w, points))
}

/// Write `cameras.txt`, `images.txt` and `points3D.txt` into `dir`, which must exist.
pub fn write_model_text(dir: &Path, scene: &Scene) -> Result<(), Error> {
    write_cameras_text(&dir.join("cameras.txt"), &scene.cameras)?;
    write_images_text(&dir.join("images.txt"), &scene.images)?;
    write_points3d_text(&dir.join("points3D.txt"), &scene.points3d)?;
    info!("Wrote text model to {}", dir.display());
    Ok(())
}

#[test]
fn test_camera_line() {
    let cameras = parse_cameras("0 1 640 480 500 500 320 240\n");
    assert_eq!(
        cameras,
        vec![Camera {
            id: 0,
            model: 1,
            width: 640,
            height: 480,
            params: vec![500.0, 500.0, 320.0, 240.0],
        }]
    );
}

#[test]
fn test_camera_model_name() {
    let cameras = parse_cameras(
        "# Camera list\n\n3 SIMPLE_RADIAL 100 50 80.5 50 25 -0.01  \n7 SOMETHING 1 1 1\n",
    );
    assert_eq!(cameras.len(), 1);
    assert_eq!(cameras[0].id, 3);
    assert_eq!(cameras[0].model(), Some(CameraModel::SimpleRadial));
    assert_eq!(cameras[0].params, vec![80.5, 50.0, 25.0, -0.01]);
}

#[test]
fn test_malformed_records_skipped() {
    let cameras = parse_cameras("0 1 640\nx 1 2 3 4\n1 0 10 10 5 5 5\n");
    assert_eq!(cameras.len(), 1);
    assert_eq!(cameras[0].id, 1);

    let points = parse_points3d("0 1 2 3 255 0 0\n1 1 2 3 10 20 30 0.5 4 2\n");
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].id, 1);
}

#[test]
fn test_images() {
    let contents = "\
# Image list with two lines of data per image:
0 1 0 0 0 0.5 -1 2 3 a.jpg
10 20 -1 30.5 40 7
1 1 0 0 0 0 0 0 3 b.jpg

2 0.7071 0 0.7071 0 1 1 1 3 c.jpg";
    let images = parse_images(contents);
    assert_eq!(images.len(), 3);
    assert_eq!(images[0].name, "a.jpg");
    assert_eq!(images[0].translation, Vector3::new(0.5, -1.0, 2.0));
    assert_eq!(images[0].camera_id, 3);
    assert_eq!(
        images[0].observations,
        vec![
            Observation::untriangulated(Point2::new(10.0, 20.0)),
            Observation {
                xy: Point2::new(30.5, 40.0),
                point3d_id: 7
            }
        ]
    );
    assert!(images[1].observations.is_empty());
    // no POINTS2D line at the end of the file
    assert_eq!(images[2].name, "c.jpg");
    assert!(images[2].observations.is_empty());
}

#[test]
fn test_image_name_with_space() {
    let images = parse_images("4 1 0 0 0 0 0 0 1 my photo.jpg\n1 2 -1\n");
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].id, 4);
    assert_eq!(images[0].name, "my");
    assert_eq!(images[0].observations.len(), 1);
}

#[test]
fn test_points() {
    let points = parse_points3d("# comment\n12 1.5 -2 3e2 255 128 0 0.75 0 1 4 2\n");
    assert_eq!(points.len(), 1);
    let p = &points[0];
    assert_eq!(p.id, 12);
    assert_eq!(p.xyz, Point3::new(1.5, -2.0, 300.0));
    assert_eq!(p.color, [255, 128, 0]);
    assert_eq!(p.error, 0.75);
    assert_eq!(
        p.track,
        vec![
            TrackElement {
                image_id: 0,
                point2d_idx: 1
            },
            TrackElement {
                image_id: 4,
                point2d_idx: 2
            }
        ]
    );
}

#[test]
fn test_write_then_read_model() {
    let scene = Scene {
        cameras: vec![
            Camera::pinhole(0, 640, 480, 500.0, 500.5, 320.0, 240.0),
            Camera {
                id: 1,
                model: 0,
                width: 10,
                height: 20,
                params: vec![9.0, 5.0, 10.0],
            },
        ],
        images: vec![
            Image {
                id: 0,
                rotation: Quaternion::new(0.5, 0.5, -0.5, 0.5),
                translation: Vector3::new(0.1, 0.2, -0.3),
                camera_id: 0,
                name: "a.jpg".to_string(),
                observations: vec![
                    Observation {
                        xy: Point2::new(1.25, 2.5),
                        point3d_id: 0,
                    },
                    Observation::untriangulated(Point2::new(3.0, 4.0)),
                ],
            },
            Image {
                id: 1,
                rotation: Quaternion::new(1.0, 0.0, 0.0, 0.0),
                translation: Vector3::new(1.0, 0.0, 0.0),
                camera_id: 1,
                name: "b.jpg".to_string(),
                observations: vec![],
            },
        ],
        points3d: vec![Point3D {
            id: 0,
            xyz: Point3::new(1.0, -2.0, 3.5),
            color: [1, 2, 3],
            error: 0.125,
            track: vec![TrackElement {
                image_id: 0,
                point2d_idx: 0,
            }],
        }],
    };
    let dir = tempfile::tempdir().unwrap();
    write_model_text(dir.path(), &scene).unwrap();
    let images = std::fs::read_to_string(dir.path().join("images.txt")).unwrap();
    assert!(images.contains("1.25 2.5 0 3 4 -1"));
    let cameras = std::fs::read_to_string(dir.path().join("cameras.txt")).unwrap();
    assert!(cameras.contains("0 PINHOLE 640 480 500 500.5 320 240"));

    let read = read_model_text(dir.path()).unwrap();
    assert_eq!(read, scene);
    assert!(read.check_consistency().is_ok());
}

#[test]
fn test_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    assert!(read_model_text(dir.path()).is_err());
}
