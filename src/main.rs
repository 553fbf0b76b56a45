use clap::Parser;
use distortion_tools::pipeline;
use log::error;
use std::path::PathBuf;
use std::process::ExitCode;

/// Checkerboard-based lens distortion calibration.
///
/// Fits the distortion model of every view in the input scene dataset from
/// a single checkerboard image and writes the undistorted raster, an ST map
/// and the updated dataset.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input scene dataset (JSON)
    #[arg(short, long)]
    input: PathBuf,

    /// Output scene dataset; rasters are written into its directory
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = pipeline::run(&cli.input, &cli.output) {
        error!("{e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
