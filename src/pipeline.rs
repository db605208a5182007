use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;

use error_stack::{Context, Report, Result, ResultExt};
use log::{info, warn};
use rayon::prelude::*;

use crate::channels::{finalize_channels_geojson, sort_segments, summarize_channels, write_channels_csv};
use crate::classify;
use crate::manifest::{write_manifest, LayerEntry, ProjectManifest};
use crate::raster::Raster;
use crate::style;
use crate::whiteboxtools_wrappers::{
    aspect_raster, contour_lines, d8_flow_accumulation_raster, d8_pointer_raster,
    extract_streams_raster, fill_depressions_raster, hillshade_raster, mosaic_rasters,
    polygonize_raster, raster_streams_to_vector, rescale_raster, shp_to_geojson, slope_raster,
    strahler_order_raster,
};

const MOSAIC_METHOD: &str = "bilinear";
const HILLSHADE_AZIMUTH: f64 = 315.0;
const HILLSHADE_ALTITUDE: f64 = 45.0;
const HILLSHADE_CUT_LO: f64 = 0.02;
const HILLSHADE_CUT_HI: f64 = 0.98;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerrainError {
    Workspace,
    NoInputRasters,
    Mosaic,
    Resample,
    Hillshade,
    Contours,
    Slope,
    Aspect,
    Channels,
    Manifest,
}

impl fmt::Display for TerrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerrainError::Workspace => write!(f, "could not prepare the working directory"),
            TerrainError::NoInputRasters => {
                write!(f, "no elevation rasters found in the input directory")
            }
            TerrainError::Mosaic => write!(f, "mosaicking the input tiles failed"),
            TerrainError::Resample => write!(f, "resampling the DEM failed"),
            TerrainError::Hillshade => write!(f, "deriving the hillshade failed"),
            TerrainError::Contours => write!(f, "deriving the contours failed"),
            TerrainError::Slope => write!(f, "deriving the slope products failed"),
            TerrainError::Aspect => write!(f, "deriving the aspect products failed"),
            TerrainError::Channels => write!(f, "deriving the channel network failed"),
            TerrainError::Manifest => write!(f, "writing the layer manifest failed"),
        }
    }
}

impl Context for TerrainError {}

#[derive(Debug, Clone)]
pub struct TerrainParams {
    pub produce_hillshade: bool,
    pub produce_base_contours: bool,
    pub produce_index_contours: bool,
    pub produce_raster_slope: bool,
    pub produce_vector_slope: bool,
    pub produce_raster_aspect: bool,
    pub produce_vector_aspect: bool,
    pub produce_channels: bool,
    /// Grid resolution of the raw tiles, whole meters.
    pub raw_grain: u32,
    /// Target grid resolution, whole meters.
    pub grain: u32,
    pub base_interval_ft: f64,
    pub index_interval_ft: f64,
    /// Minimum Strahler order kept in the channel network.
    pub channel_threshold: i32,
    pub dem_dir: String,
    pub out_dir: String,
}

impl Default for TerrainParams {
    fn default() -> TerrainParams {
        TerrainParams {
            produce_hillshade: true,
            produce_base_contours: true,
            produce_index_contours: true,
            produce_raster_slope: true,
            produce_vector_slope: true,
            produce_raster_aspect: true,
            produce_vector_aspect: true,
            produce_channels: true,
            raw_grain: 1,
            grain: 2,
            base_interval_ft: 2.0,
            index_interval_ft: 10.0,
            channel_threshold: 5,
            dem_dir: String::from("dtm_raw"),
            out_dir: String::from("products"),
        }
    }
}

fn fmt_interval(ft: f64) -> String {
    if ft.fract() == 0.0 {
        format!("{}", ft as i64)
    } else {
        ft.to_string()
    }
}

fn dem_name(grain: u32) -> String {
    format!("dtm_vm_{}m.tif", grain)
}

fn feet_dem_name(grain: u32) -> String {
    format!("dtm_vft_{}m.tif", grain)
}

fn hillshade_name(grain: u32) -> String {
    format!("hillshade_{}m.tif", grain)
}

fn contour_name(interval_ft: f64) -> String {
    format!("contours_{}ft.shp", fmt_interval(interval_ft))
}

/// Regular files in the tile directory, hidden files (.DS_Store and
/// friends) skipped, sorted for a stable mosaic order.
fn enumerate_dems(dem_dir: &Path) -> io::Result<Vec<String>> {
    let mut dems = Vec::new();

    for entry in fs::read_dir(dem_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }

        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }

        dems.push(entry.path().to_string_lossy().into_owned());
    }

    dems.sort();

    Ok(dems)
}

/// Derives the full terrain product set under `wd`: mosaic and resample
/// the raw tiles, then fan the independent products out over the rayon
/// pool, then record the displayed layers in `layers.json`.
pub fn derive_terrain_products(wd: &str, params: &TerrainParams) -> Result<(), TerrainError> {
    let t0 = Instant::now();

    let dem_dir = format!("{}/{}", wd, params.dem_dir);
    let out_dir = format!("{}/{}", wd, params.out_dir);

    fs::create_dir_all(&out_dir)
        .change_context(TerrainError::Workspace)
        .attach_printable_lazy(|| format!("creating {}", out_dir))?;

    let dems = enumerate_dems(Path::new(&dem_dir))
        .change_context(TerrainError::Workspace)
        .attach_printable_lazy(|| format!("listing {}", dem_dir))?;

    if dems.is_empty() {
        return Err(Report::new(TerrainError::NoInputRasters)
            .attach_printable(format!("looked in {}", dem_dir)));
    }

    info!("{} input tile(s) in {}", dems.len(), dem_dir);

    // A single tile stands in for its own mosaic.
    let mosaic_fn = if dems.len() > 1 {
        let mosaic_fn = format!("{}/{}", out_dir, dem_name(params.raw_grain));
        mosaic_rasters(&dems, &mosaic_fn, MOSAIC_METHOD).change_context(TerrainError::Mosaic)?;
        info!("mosaicked {} tiles -> {}", dems.len(), mosaic_fn);
        mosaic_fn
    } else {
        dems[0].clone()
    };

    // Resample only when the grains differ.
    let dem_fn = if params.raw_grain != params.grain {
        let dem_fn = format!("{}/{}", out_dir, dem_name(params.grain));
        rescale_raster(&mosaic_fn, &dem_fn, params.grain as f64)
            .change_context(TerrainError::Resample)?;
        info!("resampled to a {} m grid -> {}", params.grain, dem_fn);
        dem_fn
    } else {
        mosaic_fn.clone()
    };

    let (crs_wkt, epsg, extent, extent_wgs84) = {
        let dem = Raster::<f64>::read(&dem_fn)
            .change_context(TerrainError::Workspace)
            .attach_printable_lazy(|| format!("reading {}", dem_fn))?;
        (dem.wkt.clone(), dem.epsg(), dem.extent(), dem.wgs_extent())
    };

    let mut tasks: Vec<Box<dyn FnOnce() -> Result<(), TerrainError> + Send>> = Vec::new();

    if params.produce_hillshade {
        let dem_fn = dem_fn.clone();
        let hillshade_fn = format!("{}/{}", out_dir, hillshade_name(params.grain));
        tasks.push(Box::new(move || derive_hillshade(&dem_fn, &hillshade_fn)));
    }

    if params.produce_base_contours || params.produce_index_contours {
        let dem_fn = dem_fn.clone();
        let feet_dem_fn = format!("{}/{}", out_dir, feet_dem_name(params.grain));
        let base = params.produce_base_contours.then(|| {
            (
                params.base_interval_ft,
                format!("{}/{}", out_dir, contour_name(params.base_interval_ft)),
            )
        });
        let index = params.produce_index_contours.then(|| {
            (
                params.index_interval_ft,
                format!("{}/{}", out_dir, contour_name(params.index_interval_ft)),
            )
        });
        tasks.push(Box::new(move || derive_contours(&dem_fn, &feet_dem_fn, base, index)));
    }

    if params.produce_raster_slope || params.produce_vector_slope {
        let dem_fn = dem_fn.clone();
        let slope_fn = format!("{}/slope.tif", out_dir);
        let raster_product = params.produce_raster_slope;
        let vector_product = params.produce_vector_slope.then(|| {
            (
                format!("{}/slope_classes.tif", out_dir),
                format!("{}/slope_classes.shp", out_dir),
            )
        });
        tasks.push(Box::new(move || {
            derive_slope(&dem_fn, &slope_fn, raster_product, vector_product)
        }));
    }

    if params.produce_raster_aspect || params.produce_vector_aspect {
        let dem_fn = dem_fn.clone();
        let aspect_fn = format!("{}/aspect.tif", out_dir);
        let raster_product = params.produce_raster_aspect;
        let vector_product = params.produce_vector_aspect.then(|| {
            (
                format!("{}/aspect_classes.tif", out_dir),
                format!("{}/aspect_classes.shp", out_dir),
            )
        });
        tasks.push(Box::new(move || {
            derive_aspect(&dem_fn, &aspect_fn, raster_product, vector_product)
        }));
    }

    if params.produce_channels {
        let dem_fn = dem_fn.clone();
        let out_dir = out_dir.clone();
        let min_order = params.channel_threshold;
        tasks.push(Box::new(move || derive_channels(&dem_fn, &out_dir, min_order, epsg)));
    }

    tasks
        .into_par_iter()
        .map(|f| f())
        .collect::<Result<Vec<_>, TerrainError>>()?;

    let manifest = ProjectManifest {
        crs_wkt,
        epsg,
        extent,
        extent_wgs84,
        layers: build_layers(wd, params, &dem_fn, &out_dir),
    };

    let manifest_fn = format!("{}/layers.json", out_dir);
    write_manifest(&manifest_fn, &manifest).change_context(TerrainError::Manifest)?;
    info!("manifest -> {}", manifest_fn);

    info!("terrain products derived in {:.1} s", t0.elapsed().as_secs_f64());

    Ok(())
}

fn derive_hillshade(dem_fn: &str, hillshade_fn: &str) -> Result<(), TerrainError> {
    hillshade_raster(dem_fn, hillshade_fn, HILLSHADE_AZIMUTH, HILLSHADE_ALTITUDE)
        .change_context(TerrainError::Hillshade)?;

    // Display range from the cumulative cut, not the full value range,
    // so a few extreme cells don't flatten the relief.
    let hillshade = Raster::<f64>::read(hillshade_fn).change_context(TerrainError::Hillshade)?;
    let (min, max) = hillshade
        .percentile_cut(HILLSHADE_CUT_LO, HILLSHADE_CUT_HI)
        .unwrap_or((0.0, 255.0));

    style::write_qml(hillshade_fn, &style::grayscale_stretch_qml(min, max))
        .change_context(TerrainError::Hillshade)?;

    info!("hillshade -> {}", hillshade_fn);

    Ok(())
}

fn derive_contours(
    dem_fn: &str,
    feet_dem_fn: &str,
    base: Option<(f64, String)>,
    index: Option<(f64, String)>,
) -> Result<(), TerrainError> {
    let dem = Raster::<f64>::read(dem_fn).change_context(TerrainError::Contours)?;
    let feet = classify::to_feet(&dem);
    feet.write(feet_dem_fn).change_context(TerrainError::Contours)?;

    if let Some((interval, contour_fn)) = base {
        contour_lines(feet_dem_fn, &contour_fn, interval).change_context(TerrainError::Contours)?;
        info!("contours every {} ft -> {}", fmt_interval(interval), contour_fn);
    }

    if let Some((interval, contour_fn)) = index {
        contour_lines(feet_dem_fn, &contour_fn, interval).change_context(TerrainError::Contours)?;
        info!("index contours every {} ft -> {}", fmt_interval(interval), contour_fn);
    }

    Ok(())
}

fn derive_slope(
    dem_fn: &str,
    slope_fn: &str,
    raster_product: bool,
    vector_product: Option<(String, String)>,
) -> Result<(), TerrainError> {
    slope_raster(dem_fn, slope_fn).change_context(TerrainError::Slope)?;

    if raster_product {
        style::write_qml(slope_fn, &style::slope_ramp_qml()).change_context(TerrainError::Slope)?;
        info!("slope -> {}", slope_fn);
    }

    if let Some((classes_fn, shp_fn)) = vector_product {
        let slope = Raster::<f64>::read(slope_fn).change_context(TerrainError::Slope)?;
        let classes = classify::classify_slope(&slope);
        classes.write(&classes_fn).change_context(TerrainError::Slope)?;

        polygonize_raster(&classes_fn, &shp_fn, "class").change_context(TerrainError::Slope)?;
        style::write_qml(&shp_fn, &style::slope_classes_qml())
            .change_context(TerrainError::Slope)?;

        info!("slope classes -> {}", shp_fn);
    }

    Ok(())
}

fn derive_aspect(
    dem_fn: &str,
    aspect_fn: &str,
    raster_product: bool,
    vector_product: Option<(String, String)>,
) -> Result<(), TerrainError> {
    aspect_raster(dem_fn, aspect_fn).change_context(TerrainError::Aspect)?;

    if raster_product {
        style::write_qml(aspect_fn, &style::aspect_ramp_qml())
            .change_context(TerrainError::Aspect)?;
        info!("aspect -> {}", aspect_fn);
    }

    if let Some((classes_fn, shp_fn)) = vector_product {
        let aspect = Raster::<f64>::read(aspect_fn).change_context(TerrainError::Aspect)?;
        let classes = classify::classify_aspect(&aspect);
        classes.write(&classes_fn).change_context(TerrainError::Aspect)?;

        polygonize_raster(&classes_fn, &shp_fn, "class").change_context(TerrainError::Aspect)?;
        style::write_qml(&shp_fn, &style::aspect_classes_qml())
            .change_context(TerrainError::Aspect)?;

        info!("aspect classes -> {}", shp_fn);
    }

    Ok(())
}

fn derive_channels(
    dem_fn: &str,
    out_dir: &str,
    min_order: i32,
    epsg: Option<i32>,
) -> Result<(), TerrainError> {
    let filled_fn = format!("{}/dem_filled.tif", out_dir);
    let pointer_fn = format!("{}/d8_pointer.tif", out_dir);
    let accum_fn = format!("{}/flow_accum.tif", out_dir);
    let streams_fn = format!("{}/streams_all.tif", out_dir);
    let order_fn = format!("{}/strahler_order.tif", out_dir);
    let channel_order_fn = format!("{}/channel_order.tif", out_dir);
    let shp_fn = format!("{}/channels.shp", out_dir);
    let geojson_fn = format!("{}/channels.geojson", out_dir);
    let csv_fn = format!("{}/channels.csv", out_dir);

    fill_depressions_raster(dem_fn, &filled_fn).change_context(TerrainError::Channels)?;
    d8_pointer_raster(&filled_fn, &pointer_fn).change_context(TerrainError::Channels)?;
    d8_flow_accumulation_raster(&filled_fn, &accum_fn).change_context(TerrainError::Channels)?;

    // Accumulation counts the cell itself, so a threshold of 1 keeps
    // every valid cell and the Strahler order covers the whole grid
    // before the order cut.
    extract_streams_raster(&accum_fn, &streams_fn, 1.0).change_context(TerrainError::Channels)?;
    strahler_order_raster(&pointer_fn, &streams_fn, &order_fn)
        .change_context(TerrainError::Channels)?;

    let order = Raster::<f64>::read(&order_fn).change_context(TerrainError::Channels)?;
    let kept = classify::threshold_strahler(&order, min_order);
    kept.write(&channel_order_fn).change_context(TerrainError::Channels)?;

    let max_order = match kept.max_value() {
        Some(max_order) => max_order,
        None => {
            warn!("no channels at or above order {}", min_order);
            return Ok(());
        }
    };

    raster_streams_to_vector(&channel_order_fn, &pointer_fn, &shp_fn)
        .change_context(TerrainError::Channels)?;
    shp_to_geojson(&shp_fn, &geojson_fn).change_context(TerrainError::Channels)?;

    let mut segments = summarize_channels(&geojson_fn).change_context(TerrainError::Channels)?;
    sort_segments(&mut segments);
    finalize_channels_geojson(&geojson_fn, &segments, epsg)
        .change_context(TerrainError::Channels)?;
    write_channels_csv(&csv_fn, &segments).change_context(TerrainError::Channels)?;

    style::write_qml(&shp_fn, &style::channels_qml(max_order))
        .change_context(TerrainError::Channels)?;

    info!(
        "{} channel segment(s), renumbered orders 1-{} -> {}",
        segments.len(),
        max_order,
        shp_fn
    );

    Ok(())
}

/// Displayed layers bottom to top, DEM first and channels last. Support
/// grids (feet DEM, class grids, hydrology intermediates) stay out.
fn build_layers(wd: &str, params: &TerrainParams, dem_fn: &str, out_dir: &str) -> Vec<LayerEntry> {
    let prefix = format!("{}/", wd);
    let rel = |path: &str| -> String {
        path.strip_prefix(prefix.as_str()).unwrap_or(path).to_string()
    };

    let mut layers = Vec::new();

    layers.push(LayerEntry::raster(
        &format!("DEM ({} m)", params.grain),
        &rel(dem_fn),
        None,
    ));

    if params.produce_hillshade {
        let hillshade_fn = format!("{}/{}", out_dir, hillshade_name(params.grain));
        layers.push(LayerEntry::raster(
            "Hillshade",
            &rel(&hillshade_fn),
            Some(rel(&style::qml_path(&hillshade_fn))),
        ));
    }

    if params.produce_base_contours {
        let contour_fn = format!("{}/{}", out_dir, contour_name(params.base_interval_ft));
        layers.push(LayerEntry::vector(
            &format!("Contours ({} ft)", fmt_interval(params.base_interval_ft)),
            &rel(&contour_fn),
            None,
        ));
    }

    if params.produce_index_contours {
        let contour_fn = format!("{}/{}", out_dir, contour_name(params.index_interval_ft));
        layers.push(LayerEntry::vector(
            &format!("Index contours ({} ft)", fmt_interval(params.index_interval_ft)),
            &rel(&contour_fn),
            None,
        ));
    }

    if params.produce_raster_slope {
        let slope_fn = format!("{}/slope.tif", out_dir);
        layers.push(LayerEntry::raster(
            "Slope (%)",
            &rel(&slope_fn),
            Some(rel(&style::qml_path(&slope_fn))),
        ));
    }

    if params.produce_vector_slope {
        let shp_fn = format!("{}/slope_classes.shp", out_dir);
        layers.push(LayerEntry::vector(
            "Slope classes",
            &rel(&shp_fn),
            Some(rel(&style::qml_path(&shp_fn))),
        ));
    }

    if params.produce_raster_aspect {
        let aspect_fn = format!("{}/aspect.tif", out_dir);
        layers.push(LayerEntry::raster(
            "Aspect",
            &rel(&aspect_fn),
            Some(rel(&style::qml_path(&aspect_fn))),
        ));
    }

    if params.produce_vector_aspect {
        let shp_fn = format!("{}/aspect_classes.shp", out_dir);
        layers.push(LayerEntry::vector(
            "Aspect classes",
            &rel(&shp_fn),
            Some(rel(&style::qml_path(&shp_fn))),
        ));
    }

    if params.produce_channels {
        let shp_fn = format!("{}/channels.shp", out_dir);
        // Missing when nothing survived the order cut.
        if Path::new(&shp_fn).exists() {
            layers.push(LayerEntry::vector(
                "Channels",
                &rel(&shp_fn),
                Some(rel(&style::qml_path(&shp_fn))),
            ));
        }
    }

    layers
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = TerrainParams::default();
        assert!(params.produce_hillshade);
        assert!(params.produce_channels);
        assert_eq!(params.raw_grain, 1);
        assert_eq!(params.grain, 2);
        assert_eq!(params.base_interval_ft, 2.0);
        assert_eq!(params.index_interval_ft, 10.0);
        assert_eq!(params.channel_threshold, 5);
        assert_eq!(params.dem_dir, "dtm_raw");
        assert_eq!(params.out_dir, "products");
    }

    #[test]
    fn test_product_names() {
        assert_eq!(dem_name(2), "dtm_vm_2m.tif");
        assert_eq!(feet_dem_name(2), "dtm_vft_2m.tif");
        assert_eq!(hillshade_name(2), "hillshade_2m.tif");
        assert_eq!(contour_name(2.0), "contours_2ft.shp");
        assert_eq!(contour_name(2.5), "contours_2.5ft.shp");
        assert_eq!(contour_name(10.0), "contours_10ft.shp");
    }

    #[test]
    fn test_enumerate_dems_skips_hidden() {
        let dir = std::env::temp_dir().join(format!("talus_enum_{}", std::process::id()));
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("b.tif"), b"x").unwrap();
        fs::write(dir.join("a.tif"), b"x").unwrap();
        fs::write(dir.join(".DS_Store"), b"x").unwrap();

        let dems = enumerate_dems(&dir).unwrap();
        assert_eq!(dems.len(), 2);
        assert!(dems[0].ends_with("a.tif"));
        assert!(dems[1].ends_with("b.tif"));

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_enumerate_dems_empty() {
        let dir = std::env::temp_dir().join(format!("talus_enum_empty_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();

        let dems = enumerate_dems(&dir).unwrap();
        assert!(dems.is_empty());

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_build_layers_order_and_paths() {
        let params = TerrainParams::default();
        let layers = build_layers(
            "/data/run",
            &params,
            "/data/run/products/dtm_vm_2m.tif",
            "/data/run/products",
        );

        // channels.shp does not exist, so it drops out
        let names: Vec<&str> = layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "DEM (2 m)",
                "Hillshade",
                "Contours (2 ft)",
                "Index contours (10 ft)",
                "Slope (%)",
                "Slope classes",
                "Aspect",
                "Aspect classes",
            ]
        );

        assert_eq!(layers[0].path, "products/dtm_vm_2m.tif");
        assert_eq!(layers[1].path, "products/hillshade_2m.tif");
        assert_eq!(
            layers[1].style.as_deref(),
            Some("products/hillshade_2m.qml")
        );
        assert!(layers[2].style.is_none());
    }

    #[test]
    fn test_build_layers_respects_skips() {
        let params = TerrainParams {
            produce_hillshade: false,
            produce_base_contours: false,
            produce_index_contours: false,
            produce_raster_slope: false,
            produce_vector_slope: true,
            produce_raster_aspect: false,
            produce_vector_aspect: false,
            produce_channels: false,
            ..TerrainParams::default()
        };

        let layers = build_layers(
            "/data/run",
            &params,
            "/data/run/products/dtm_vm_2m.tif",
            "/data/run/products",
        );

        let names: Vec<&str> = layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["DEM (2 m)", "Slope classes"]);
    }

    #[test]
    fn test_fmt_interval() {
        assert_eq!(fmt_interval(2.0), "2");
        assert_eq!(fmt_interval(10.0), "10");
        assert_eq!(fmt_interval(1.5), "1.5");
    }
}
