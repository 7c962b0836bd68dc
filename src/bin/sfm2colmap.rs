extern crate log;
extern crate pretty_env_logger;
extern crate sfm2colmap;
extern crate structopt;

use log::*;
use sfm2colmap::export::*;
use sfm2colmap::ply::PlyVisualizer;
use sfm2colmap::poses::*;
use sfm2colmap::*;
use structopt::StructOpt;

use std::path::{Path, PathBuf};

#[derive(StructOpt, Debug)]
struct ExportOpt {
    /// Reconstruction snapshot in JSON format.
    #[structopt(name = "SNAPSHOT", parse(from_os_str))]
    input: PathBuf,

    /// Output model directory. Created if it does not exist.
    #[structopt(name = "OUT", parse(from_os_str))]
    output: PathBuf,

    /// Emit one camera per intrinsics entry instead of one camera per image.
    #[structopt(long = "shared-camera")]
    shared_camera: bool,

    /// Keep the reconstruction's scale instead of making the closest cameras one unit apart.
    #[structopt(long = "no-normalize")]
    no_normalize: bool,

    /// Also write global_poses.txt into the output directory.
    #[structopt(long = "global-poses")]
    global_poses: bool,

    /// Write cameras.txt, images.txt and points3D.txt next to the binary model.
    #[structopt(long = "text")]
    text: bool,

    /// Convert the binary model to text with `<colmap> model_converter`.
    #[structopt(long = "colmap")]
    colmap: Option<String>,

    /// Write scene.ply and points.ply for visualization.
    #[structopt(long = "ply")]
    ply: bool,
}

#[derive(StructOpt, Debug)]
struct InfoOpt {
    /// Directory containing cameras.txt, images.txt and points3D.txt.
    #[structopt(name = "DIR", parse(from_os_str))]
    input: PathBuf,
}

#[derive(StructOpt, Debug)]
struct PosesOpt {
    /// COLMAP images.txt, or an OpenMVG sfm_data.json.
    #[structopt(name = "INPUT", parse(from_os_str))]
    input: PathBuf,

    /// Output global_poses.txt.
    #[structopt(name = "OUT", parse(from_os_str))]
    output: PathBuf,

    /// OpenMVG sfm_data.json providing the image name to pose id mapping. Defaults to INPUT.
    #[structopt(long = "sfm-data", parse(from_os_str))]
    sfm_data: Option<PathBuf>,
}

#[derive(StructOpt, Debug)]
#[structopt(
    name = "sfm2colmap",
    about = "Export structure-from-motion reconstructions as COLMAP sparse models."
)]
enum Opt {
    /// Export a reconstruction snapshot as a COLMAP binary model.
    Export(ExportOpt),
    /// Summarize a COLMAP text model and check its consistency.
    Info(InfoOpt),
    /// Write global_poses.txt from COLMAP images.txt or OpenMVG sfm_data.
    Poses(PosesOpt),
}

fn run_export(opt: ExportOpt) -> Result<(), Error> {
    let rec = Reconstruction::from_json_file(&opt.input)?;
    let options = ExportOptions {
        camera_policy: if opt.shared_camera {
            CameraPolicy::Shared
        } else {
            CameraPolicy::PerImage
        },
        normalize_scale: !opt.no_normalize,
        write_global_poses: opt.global_poses,
    };

    let converter: Box<dyn TextConverter> = match &opt.colmap {
        Some(program) => Box::new(ColmapModelConverter::new(program)),
        None => Box::new(NoConversion),
    };
    let visualizer: Box<dyn Visualizer> = if opt.ply {
        Box::new(PlyVisualizer)
    } else {
        Box::new(NoVisualization)
    };

    let summary = export_scene(
        &rec,
        &opt.output,
        &options,
        converter.as_ref(),
        visualizer.as_ref(),
    )?;
    if opt.text {
        text::write_model_text(&opt.output, &summary.scene)?;
    }
    println!("{}", summary);
    Ok(())
}

fn run_info(opt: InfoOpt) -> Result<(), Error> {
    let scene = text::read_model_text(&opt.input)?;
    println!("{}", scene);
    println!("Mean track length: {:.2}", scene.mean_track_length());
    let triangulated = scene
        .images
        .iter()
        .map(|x| x.num_points3d())
        .sum::<usize>();
    println!(
        "Triangulated observations: {} of {}",
        triangulated,
        scene.num_observations()
    );
    for camera in &scene.cameras {
        if let Err(e) = camera.validate() {
            warn!("{}", e);
        }
    }
    match scene.check_consistency() {
        Ok(()) => {
            println!("Model is consistent");
            Ok(())
        }
        Err(e) => {
            println!("Model is inconsistent: {}", e);
            Err(e)
        }
    }
}

fn is_images_txt(path: &Path) -> bool {
    path.extension().and_then(|x| x.to_str()) == Some("txt")
}

fn run_poses(opt: PosesOpt) -> Result<(), Error> {
    let poses = if is_images_txt(&opt.input) {
        let sfm_data = opt.sfm_data.as_ref().ok_or_else(|| {
            Error::MissingInput("--sfm-data is required to name poses from images.txt".to_string())
        })?;
        let names = openmvg::view_name_map(sfm_data)?;
        poses_from_images_txt(&opt.input, &names)?
    } else {
        let sfm_data = opt.sfm_data.as_ref().unwrap_or(&opt.input);
        let names = openmvg::view_name_map(sfm_data)?;
        let extrinsics = openmvg::load_extrinsics(&opt.input)?;
        GlobalPoses::from_extrinsics(&extrinsics, &names)
    };
    write_global_poses(&opt.output, &poses)?;
    println!("Wrote {} poses", poses.len());
    Ok(())
}

fn main() -> Result<(), Error> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    pretty_env_logger::init_timed();

    match Opt::from_args() {
        Opt::Export(opt) => run_export(opt),
        Opt::Info(opt) => run_info(opt),
        Opt::Poses(opt) => run_poses(opt),
    }
}
