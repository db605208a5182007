extern crate clap;

use clap::Parser;
use env_logger::Env;
use error_stack::Result;
use rayon::ThreadPoolBuilder;

use talus::pipeline::{derive_terrain_products, TerrainError, TerrainParams};

#[derive(Parser)]
struct Opts {
    /// Path to the working directory holding the raw tile folder
    path_to_wd: String,

    /// Number of CPU threads
    #[clap(short, long, default_value = "4")]
    ncpu: usize,

    /// Grid resolution of the raw tiles in whole meters
    #[clap(long, default_value = "1")]
    raw_grain: u32,

    /// Target grid resolution in whole meters
    #[clap(short, long, default_value = "2")]
    grain: u32,

    /// Base contour interval in feet
    #[clap(long, default_value = "2.0")]
    base_interval: f64,

    /// Index contour interval in feet
    #[clap(long, default_value = "10.0")]
    index_interval: f64,

    /// Minimum Strahler order kept in the channel network
    #[clap(long, default_value = "5")]
    channel_threshold: i32,

    /// Subdirectory with the raw DEM tiles
    #[clap(long, default_value = "dtm_raw")]
    dem_dir: String,

    /// Subdirectory for the derived products
    #[clap(long, default_value = "products")]
    out_dir: String,

    /// Skip the hillshade
    #[clap(long)]
    skip_hillshade: bool,

    /// Skip the base contours
    #[clap(long)]
    skip_base_contours: bool,

    /// Skip the index contours
    #[clap(long)]
    skip_index_contours: bool,

    /// Skip the percent-slope raster
    #[clap(long)]
    skip_raster_slope: bool,

    /// Skip the vectorized slope classes
    #[clap(long)]
    skip_vector_slope: bool,

    /// Skip the aspect raster
    #[clap(long)]
    skip_raster_aspect: bool,

    /// Skip the vectorized aspect classes
    #[clap(long)]
    skip_vector_aspect: bool,

    /// Skip the channel network
    #[clap(long)]
    skip_channels: bool,
}

fn main() -> Result<(), TerrainError> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let opts: Opts = Opts::parse();

    ThreadPoolBuilder::new()
        .num_threads(opts.ncpu)
        .build_global()
        .unwrap();

    let params = TerrainParams {
        produce_hillshade: !opts.skip_hillshade,
        produce_base_contours: !opts.skip_base_contours,
        produce_index_contours: !opts.skip_index_contours,
        produce_raster_slope: !opts.skip_raster_slope,
        produce_vector_slope: !opts.skip_vector_slope,
        produce_raster_aspect: !opts.skip_raster_aspect,
        produce_vector_aspect: !opts.skip_vector_aspect,
        produce_channels: !opts.skip_channels,
        raw_grain: opts.raw_grain,
        grain: opts.grain,
        base_interval_ft: opts.base_interval,
        index_interval_ft: opts.index_interval,
        channel_threshold: opts.channel_threshold,
        dem_dir: opts.dem_dir,
        out_dir: opts.out_dir,
    };

    derive_terrain_products(&opts.path_to_wd, &params)
}

// RUST_LOG=debug ./derive_terrain /geodata/runs/blackwood_creek/
