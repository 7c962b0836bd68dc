//! COLMAP binary model writer (`cameras.bin`, `images.bin`, `points3D.bin`).
//!
//! All values are little endian with no padding. Each file starts with a `u64` record count.

use byteorder::{LittleEndian, WriteBytesExt};
use log::info;

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::model::*;
use crate::Error;

/// Size in bytes of one `cameras.bin` record.
pub fn camera_record_len(model: CameraModel) -> usize {
    4 + 4 + 8 + 8 + 8 * model.num_params()
}

/// Size in bytes of one `images.bin` record.
pub fn image_record_len(image: &Image) -> usize {
    4 + 4 * 8 + 3 * 8 + 4 + image.name.len() + 1 + 8 + image.observations.len() * (2 * 8 + 8)
}

/// Size in bytes of one `points3D.bin` record.
pub fn point3d_record_len(point: &Point3D) -> usize {
    8 + 3 * 8 + 3 + 8 + 8 + point.track.len() * (4 + 4)
}

/// Write `cameras.bin` content. Every camera is validated before anything is written.
pub fn write_cameras<W: Write>(w: &mut W, cameras: &[Camera]) -> Result<(), Error> {
    for camera in cameras {
        camera.validate()?;
    }
    w.write_u64::<LittleEndian>(cameras.len() as u64)?;
    for camera in cameras {
        w.write_u32::<LittleEndian>(camera.id)?;
        w.write_i32::<LittleEndian>(camera.model)?;
        w.write_u64::<LittleEndian>(camera.width)?;
        w.write_u64::<LittleEndian>(camera.height)?;
        for p in &camera.params {
            w.write_f64::<LittleEndian>(*p)?;
        }
    }
    Ok(())
}

/// Write `images.bin` content. Names are NUL terminated, so a name containing a NUL byte is
/// rejected before anything is written.
pub fn write_images<W: Write>(w: &mut W, images: &[Image]) -> Result<(), Error> {
    if let Some(image) = images.iter().find(|x| x.name.contains('\0')) {
        return Err(Error::InvalidImageName(image.name.clone()));
    }
    w.write_u64::<LittleEndian>(images.len() as u64)?;
    for image in images {
        w.write_u32::<LittleEndian>(image.id)?;
        let q = image.rotation;
        for x in &[q.s, q.v.x, q.v.y, q.v.z] {
            w.write_f64::<LittleEndian>(*x)?;
        }
        for x in &[image.translation.x, image.translation.y, image.translation.z] {
            w.write_f64::<LittleEndian>(*x)?;
        }
        w.write_u32::<LittleEndian>(image.camera_id)?;
        w.write_all(image.name.as_bytes())?;
        w.write_u8(0)?;
        w.write_u64::<LittleEndian>(image.observations.len() as u64)?;
        for obs in &image.observations {
            w.write_f64::<LittleEndian>(obs.xy.x)?;
            w.write_f64::<LittleEndian>(obs.xy.y)?;
            w.write_u64::<LittleEndian>(obs.point3d_id)?;
        }
    }
    Ok(())
}

/// Write `points3D.bin` content.
pub fn write_points3d<W: Write>(w: &mut W, points: &[Point3D]) -> Result<(), Error> {
    w.write_u64::<LittleEndian>(points.len() as u64)?;
    for point in points {
        w.write_u64::<LittleEndian>(point.id)?;
        w.write_f64::<LittleEndian>(point.xyz.x)?;
        w.write_f64::<LittleEndian>(point.xyz.y)?;
        w.write_f64::<LittleEndian>(point.xyz.z)?;
        w.write_all(&point.color)?;
        w.write_f64::<LittleEndian>(point.error)?;
        w.write_u64::<LittleEndian>(point.track.len() as u64)?;
        for element in &point.track {
            w.write_u32::<LittleEndian>(element.image_id)?;
            w.write_u32::<LittleEndian>(element.point2d_idx)?;
        }
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

pub fn write_cameras_binary(path: &Path, cameras: &[Camera]) -> Result<(), Error> {
    write_file(path, |w| write_cameras(w, cameras))
}

pub fn write_images_binary(path: &Path, images: &[Image]) -> Result<(), Error> {
    write_file(path, |w| write_images(w, images))
}

pub fn write_points3d_binary(path: &Path, points: &[Point3D]) -> Result<(), Error> {
    write_file(path, |w| write_points3d(w, points))
}

/// Write `cameras.bin`, `images.bin` and `points3D.bin` into `dir`, which must exist.
pub fn write_model_binary(dir: &Path, scene: &Scene) -> Result<(), Error> {
    write_cameras_binary(&dir.join("cameras.bin"), &scene.cameras)?;
    write_images_binary(&dir.join("images.bin"), &scene.images)?;
    write_points3d_binary(&dir.join("points3D.bin"), &scene.points3d)?;
    info!("Wrote binary model to {}", dir.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use cgmath::{Point2, Point3, Quaternion, Vector3};
    use std::io::{Cursor, Read};

    fn image() -> Image {
        Image {
            id: 5,
            rotation: Quaternion::new(1.0, 0.0, 0.0, 0.0),
            translation: Vector3::new(0.5, -1.0, 2.0),
            camera_id: 2,
            name: "img.jpg".to_string(),
            observations: vec![
                Observation::untriangulated(Point2::new(1.0, 2.0)),
                Observation {
                    xy: Point2::new(3.0, 4.0),
                    point3d_id: 7,
                },
            ],
        }
    }

    fn point() -> Point3D {
        Point3D {
            id: 7,
            xyz: Point3::new(1.0, 2.0, 3.0),
            color: [255, 128, 0],
            error: 0.25,
            track: vec![TrackElement {
                image_id: 5,
                point2d_idx: 1,
            }],
        }
    }

    #[test]
    fn test_camera_bytes() {
        let cam = Camera::pinhole(3, 640, 480, 500.0, 510.0, 320.0, 240.0);
        let mut buf = Vec::new();
        write_cameras(&mut buf, &[cam]).unwrap();
        assert_eq!(buf.len(), 8 + camera_record_len(CameraModel::Pinhole));
        assert_eq!(camera_record_len(CameraModel::Pinhole), 56);

        let mut r = Cursor::new(buf);
        assert_eq!(r.read_u64::<LittleEndian>().unwrap(), 1);
        assert_eq!(r.read_u32::<LittleEndian>().unwrap(), 3);
        assert_eq!(r.read_i32::<LittleEndian>().unwrap(), 1);
        assert_eq!(r.read_u64::<LittleEndian>().unwrap(), 640);
        assert_eq!(r.read_u64::<LittleEndian>().unwrap(), 480);
        assert_eq!(r.read_f64::<LittleEndian>().unwrap(), 500.0);
        assert_eq!(r.read_f64::<LittleEndian>().unwrap(), 510.0);
    }

    #[test]
    fn test_invalid_camera_is_refused() {
        let mut cam = Camera::pinhole(0, 640, 480, 500.0, 510.0, 320.0, 240.0);
        cam.params.push(0.1);
        let mut buf = Vec::new();
        match write_cameras(&mut buf, &[cam]) {
            Err(Error::InvalidCamera(_)) => {}
            x => panic!("expected InvalidCamera, got {:?}", x),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_image_bytes() {
        let img = image();
        let mut buf = Vec::new();
        write_images(&mut buf, &[img.clone()]).unwrap();
        assert_eq!(buf.len(), 8 + image_record_len(&img));

        let mut r = Cursor::new(buf);
        assert_eq!(r.read_u64::<LittleEndian>().unwrap(), 1);
        assert_eq!(r.read_u32::<LittleEndian>().unwrap(), 5);
        assert_eq!(r.read_f64::<LittleEndian>().unwrap(), 1.0);
        for _ in 0..3 {
            assert_eq!(r.read_f64::<LittleEndian>().unwrap(), 0.0);
        }
        assert_eq!(r.read_f64::<LittleEndian>().unwrap(), 0.5);
        assert_eq!(r.read_f64::<LittleEndian>().unwrap(), -1.0);
        assert_eq!(r.read_f64::<LittleEndian>().unwrap(), 2.0);
        assert_eq!(r.read_u32::<LittleEndian>().unwrap(), 2);
        let mut name = [0u8; 8];
        r.read_exact(&mut name).unwrap();
        assert_eq!(&name, b"img.jpg\0");
        assert_eq!(r.read_u64::<LittleEndian>().unwrap(), 2);
        r.read_f64::<LittleEndian>().unwrap();
        r.read_f64::<LittleEndian>().unwrap();
        assert_eq!(r.read_u64::<LittleEndian>().unwrap(), std::u64::MAX);
        r.read_f64::<LittleEndian>().unwrap();
        r.read_f64::<LittleEndian>().unwrap();
        assert_eq!(r.read_u64::<LittleEndian>().unwrap(), 7);
    }

    #[test]
    fn test_nul_in_image_name_is_refused() {
        let mut img = image();
        img.name = "img\0.jpg".to_string();
        let mut buf = Vec::new();
        match write_images(&mut buf, &[image(), img]) {
            Err(Error::InvalidImageName(_)) => {}
            x => panic!("expected InvalidImageName, got {:?}", x),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_point_bytes() {
        let p = point();
        let mut buf = Vec::new();
        write_points3d(&mut buf, &[p.clone()]).unwrap();
        assert_eq!(buf.len(), 8 + point3d_record_len(&p));
        assert_eq!(point3d_record_len(&p), 59);
        // color directly follows the coordinates
        assert_eq!(&buf[8 + 8 + 24..8 + 8 + 24 + 3], &[255, 128, 0]);
        let mut r = Cursor::new(&buf[buf.len() - 16..]);
        assert_eq!(r.read_u64::<LittleEndian>().unwrap(), 1);
        assert_eq!(r.read_u32::<LittleEndian>().unwrap(), 5);
        assert_eq!(r.read_u32::<LittleEndian>().unwrap(), 1);
    }

    #[test]
    fn test_write_model() {
        let dir = tempfile::tempdir().unwrap();
        let scene = Scene {
            cameras: vec![Camera::pinhole(2, 640, 480, 500.0, 510.0, 320.0, 240.0)],
            images: vec![image()],
            points3d: vec![point()],
        };
        write_model_binary(dir.path(), &scene).unwrap();
        let len = |name: &str| std::fs::metadata(dir.path().join(name)).unwrap().len() as usize;
        assert_eq!(len("cameras.bin"), 8 + 56);
        assert_eq!(len("images.bin"), 8 + image_record_len(&scene.images[0]));
        assert_eq!(len("points3D.bin"), 8 + 59);
    }

    #[test]
    fn test_empty_model() {
        let dir = tempfile::tempdir().unwrap();
        write_model_binary(dir.path(), &Scene::default()).unwrap();
        for name in &["cameras.bin", "images.bin", "points3D.bin"] {
            let bytes = std::fs::read(dir.path().join(name)).unwrap();
            assert_eq!(bytes, vec![0u8; 8]);
        }
    }
}
