use std::env;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, error};
use once_cell::sync::Lazy;

/// Resolved once per run; `WHITEBOX_TOOLS` overrides the executable
/// looked up on PATH.
static WBT_EXE: Lazy<String> =
    Lazy::new(|| env::var("WHITEBOX_TOOLS").unwrap_or_else(|_| String::from("whitebox_tools")));

fn split_path(src_fn: &str) -> (PathBuf, PathBuf) {
    let path = Path::new(src_fn);

    let parent = path.parent().unwrap_or_else(|| Path::new("")).to_path_buf();
    let file_name = path.file_name()
                        .map(Path::new)
                        .unwrap_or_else(|| Path::new(""))
                        .to_path_buf();

    (parent, file_name)
}

fn file_stem(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn run_tool(program: &str, args: &[String]) -> io::Result<()> {
    debug!("{} {}", program, args.join(" "));

    let output = Command::new(program).args(args).output()?;

    if output.status.success() {
        Ok(())
    } else {
        error!("{} failed: {}", program, String::from_utf8_lossy(&output.stderr));
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("{} command failed", program),
        ))
    }
}

fn mosaic_args(src_fns: &[String], dst_fn: &str, method: &str) -> Vec<String> {
    vec![
        String::from("-r=Mosaic"),
        String::from("-v"),
        format!("--inputs={}", src_fns.join(";")),
        format!("-o={}", dst_fn),
        format!("--method={}", method),
    ]
}

/// Mosaics the input tiles into a single raster. Cells covered by more
/// than one tile are resolved by the given resampling method
/// (`nn`, `bilinear`, or `cc`).
pub fn mosaic_rasters(src_fns: &[String], dst_fn: &str, method: &str) -> io::Result<()> {
    run_tool(&WBT_EXE, &mosaic_args(src_fns, dst_fn, method))
}

fn hillshade_args(dem_fn: &str, dst_fn: &str, azimuth: f64, altitude: f64) -> Vec<String> {
    let (wd, _dem_fn) = split_path(dem_fn);
    let (_, _dst_fn) = split_path(dst_fn);

    vec![
        String::from("-r=Hillshade"),
        String::from("-v"),
        format!("--wd={}", wd.to_string_lossy()),
        format!("-i={}", _dem_fn.to_string_lossy()),
        format!("-o={}", _dst_fn.to_string_lossy()),
        format!("--azimuth={}", azimuth),
        format!("--altitude={}", altitude),
        String::from("--zfactor=1.0"),
    ]
}

pub fn hillshade_raster(dem_fn: &str, dst_fn: &str, azimuth: f64, altitude: f64) -> io::Result<()> {
    run_tool(&WBT_EXE, &hillshade_args(dem_fn, dst_fn, azimuth, altitude))
}

fn slope_args(dem_fn: &str, dst_fn: &str) -> Vec<String> {
    let (wd, _dem_fn) = split_path(dem_fn);
    let (_, _dst_fn) = split_path(dst_fn);

    vec![
        String::from("-r=Slope"),
        String::from("-v"),
        format!("--wd={}", wd.to_string_lossy()),
        format!("-i={}", _dem_fn.to_string_lossy()),
        format!("-o={}", _dst_fn.to_string_lossy()),
        String::from("--units=percent"),
        String::from("--zfactor=1.0"),
    ]
}

/// Slope as rise over run in percent.
pub fn slope_raster(dem_fn: &str, dst_fn: &str) -> io::Result<()> {
    run_tool(&WBT_EXE, &slope_args(dem_fn, dst_fn))
}

fn aspect_args(dem_fn: &str, dst_fn: &str) -> Vec<String> {
    let (wd, _dem_fn) = split_path(dem_fn);
    let (_, _dst_fn) = split_path(dst_fn);

    vec![
        String::from("-r=Aspect"),
        String::from("-v"),
        format!("--wd={}", wd.to_string_lossy()),
        format!("-i={}", _dem_fn.to_string_lossy()),
        format!("-o={}", _dst_fn.to_string_lossy()),
        String::from("--zfactor=1.0"),
    ]
}

/// Aspect in compass degrees, 0-360. Flat cells come back negative.
pub fn aspect_raster(dem_fn: &str, dst_fn: &str) -> io::Result<()> {
    run_tool(&WBT_EXE, &aspect_args(dem_fn, dst_fn))
}

fn fill_depressions_args(dem_fn: &str, dst_fn: &str) -> Vec<String> {
    let (wd, _dem_fn) = split_path(dem_fn);
    let (_, _dst_fn) = split_path(dst_fn);

    vec![
        String::from("-r=FillDepressionsWangAndLiu"),
        String::from("-v"),
        format!("--wd={}", wd.to_string_lossy()),
        format!("-i={}", _dem_fn.to_string_lossy()),
        format!("-o={}", _dst_fn.to_string_lossy()),
        String::from("--fix_flats"),
    ]
}

pub fn fill_depressions_raster(dem_fn: &str, dst_fn: &str) -> io::Result<()> {
    run_tool(&WBT_EXE, &fill_depressions_args(dem_fn, dst_fn))
}

fn d8_pointer_args(dem_fn: &str, dst_fn: &str) -> Vec<String> {
    let (wd, _dem_fn) = split_path(dem_fn);
    let (_, _dst_fn) = split_path(dst_fn);

    vec![
        String::from("-r=D8Pointer"),
        String::from("-v"),
        format!("--wd={}", wd.to_string_lossy()),
        format!("-i={}", _dem_fn.to_string_lossy()),
        format!("-o={}", _dst_fn.to_string_lossy()),
    ]
}

pub fn d8_pointer_raster(dem_fn: &str, dst_fn: &str) -> io::Result<()> {
    run_tool(&WBT_EXE, &d8_pointer_args(dem_fn, dst_fn))
}

fn d8_flow_accumulation_args(dem_fn: &str, dst_fn: &str) -> Vec<String> {
    let (wd, _dem_fn) = split_path(dem_fn);
    let (_, _dst_fn) = split_path(dst_fn);

    vec![
        String::from("-r=D8FlowAccumulation"),
        String::from("-v"),
        format!("--wd={}", wd.to_string_lossy()),
        format!("-i={}", _dem_fn.to_string_lossy()),
        format!("-o={}", _dst_fn.to_string_lossy()),
        String::from("--out_type=cells"),
    ]
}

/// Accumulation in cell counts over a depressionless DEM. Every valid
/// cell counts itself, so the minimum is 1.
pub fn d8_flow_accumulation_raster(dem_fn: &str, dst_fn: &str) -> io::Result<()> {
    run_tool(&WBT_EXE, &d8_flow_accumulation_args(dem_fn, dst_fn))
}

fn extract_streams_args(flow_accum_fn: &str, dst_fn: &str, threshold: f64) -> Vec<String> {
    let (wd, _flow_accum_fn) = split_path(flow_accum_fn);
    let (_, _dst_fn) = split_path(dst_fn);

    vec![
        String::from("-r=ExtractStreams"),
        String::from("-v"),
        format!("--wd={}", wd.to_string_lossy()),
        format!("--flow_accum={}", _flow_accum_fn.to_string_lossy()),
        format!("-o={}", _dst_fn.to_string_lossy()),
        format!("--threshold={}", threshold),
    ]
}

pub fn extract_streams_raster(flow_accum_fn: &str, dst_fn: &str, threshold: f64) -> io::Result<()> {
    run_tool(&WBT_EXE, &extract_streams_args(flow_accum_fn, dst_fn, threshold))
}

fn strahler_order_args(d8_pntr_fn: &str, streams_fn: &str, dst_fn: &str) -> Vec<String> {
    let (wd, _d8_pntr_fn) = split_path(d8_pntr_fn);
    let (_, _streams_fn) = split_path(streams_fn);
    let (_, _dst_fn) = split_path(dst_fn);

    vec![
        String::from("-r=StrahlerStreamOrder"),
        String::from("-v"),
        format!("--wd={}", wd.to_string_lossy()),
        format!("--d8_pntr={}", _d8_pntr_fn.to_string_lossy()),
        format!("--streams={}", _streams_fn.to_string_lossy()),
        format!("-o={}", _dst_fn.to_string_lossy()),
    ]
}

pub fn strahler_order_raster(d8_pntr_fn: &str, streams_fn: &str, dst_fn: &str) -> io::Result<()> {
    run_tool(&WBT_EXE, &strahler_order_args(d8_pntr_fn, streams_fn, dst_fn))
}

fn raster_streams_to_vector_args(streams_fn: &str, d8_pntr_fn: &str, dst_fn: &str) -> Vec<String> {
    let (wd, _streams_fn) = split_path(streams_fn);
    let (_, _d8_pntr_fn) = split_path(d8_pntr_fn);
    let (_, _dst_fn) = split_path(dst_fn);

    vec![
        String::from("-r=RasterStreamsToVector"),
        String::from("-v"),
        format!("--wd={}", wd.to_string_lossy()),
        format!("--streams={}", _streams_fn.to_string_lossy()),
        format!("--d8_pntr={}", _d8_pntr_fn.to_string_lossy()),
        format!("-o={}", _dst_fn.to_string_lossy()),
    ]
}

/// Traces the stream cells into a line shapefile. The cell value rides
/// along in the `STRM_VAL` attribute.
pub fn raster_streams_to_vector(streams_fn: &str, d8_pntr_fn: &str, dst_fn: &str) -> io::Result<()> {
    run_tool(&WBT_EXE, &raster_streams_to_vector_args(streams_fn, d8_pntr_fn, dst_fn))
}

fn rescale_args(src_fn: &str, dst_fn: &str, resolution: f64) -> Vec<String> {
    vec![
        String::from("-tr"),
        resolution.to_string(),
        resolution.to_string(),
        String::from("-r"),
        String::from("cubicspline"),
        String::from(src_fn),
        String::from(dst_fn),
    ]
}

/// Resamples to a square cell of the given size with B-spline
/// interpolation.
pub fn rescale_raster(src_fn: &str, dst_fn: &str, resolution: f64) -> io::Result<()> {
    run_tool("gdal_translate", &rescale_args(src_fn, dst_fn, resolution))
}

fn contour_args(src_fn: &str, dst_fn: &str, interval: f64) -> Vec<String> {
    vec![
        String::from("-b"),
        String::from("1"),
        String::from("-a"),
        String::from("ELEV"),
        String::from("-i"),
        interval.to_string(),
        String::from("-f"),
        String::from("ESRI Shapefile"),
        String::from(src_fn),
        String::from(dst_fn),
    ]
}

/// Contour lines at a fixed interval in the DEM's vertical units,
/// elevations in the `ELEV` attribute.
pub fn contour_lines(src_fn: &str, dst_fn: &str, interval: f64) -> io::Result<()> {
    run_tool("gdal_contour", &contour_args(src_fn, dst_fn, interval))
}

fn polygonize_args(src_fn: &str, dst_fn: &str, field: &str) -> Vec<String> {
    vec![
        String::from("/usr/bin/gdal_polygonize.py"),
        String::from(src_fn),
        String::from("-mask"),
        String::from(src_fn),
        String::from("-f"),
        String::from("ESRI Shapefile"),
        String::from(dst_fn),
        file_stem(dst_fn),
        String::from(field),
    ]
}

/// Polygonizes a classed raster, masked by itself so nodata cells stay
/// out, writing the cell value into the named field.
pub fn polygonize_raster(src_fn: &str, dst_fn: &str, field: &str) -> io::Result<()> {
    run_tool("python3", &polygonize_args(src_fn, dst_fn, field))
}

fn shp_to_geojson_args(src_fn: &str, dst_fn: &str) -> Vec<String> {
    vec![
        String::from("-f"),
        String::from("GeoJSON"),
        String::from(dst_fn),
        String::from(src_fn),
    ]
}

/// Shapefile to GeoJSON in the source CRS, so geometry stays in map
/// units.
pub fn shp_to_geojson(src_fn: &str, dst_fn: &str) -> io::Result<()> {
    run_tool("ogr2ogr", &shp_to_geojson_args(src_fn, dst_fn))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path() {
        let (wd, name) = split_path("products/slope.tif");
        assert_eq!(wd.to_string_lossy(), "products");
        assert_eq!(name.to_string_lossy(), "slope.tif");
    }

    #[test]
    fn test_split_path_bare_filename() {
        let (wd, name) = split_path("slope.tif");
        assert_eq!(wd.to_string_lossy(), "");
        assert_eq!(name.to_string_lossy(), "slope.tif");
    }

    #[test]
    fn test_mosaic_args() {
        let inputs = vec![
            String::from("dtm_raw/a.tif"),
            String::from("dtm_raw/b.tif"),
        ];
        let args = mosaic_args(&inputs, "products/dtm_vm_1m.tif", "bilinear");
        assert_eq!(args[0], "-r=Mosaic");
        assert_eq!(args[2], "--inputs=dtm_raw/a.tif;dtm_raw/b.tif");
        assert_eq!(args[3], "-o=products/dtm_vm_1m.tif");
        assert_eq!(args[4], "--method=bilinear");
    }

    #[test]
    fn test_hillshade_args() {
        let args = hillshade_args("products/dtm_vm_2m.tif", "products/hillshade_2m.tif", 315.0, 45.0);
        assert_eq!(args[0], "-r=Hillshade");
        assert_eq!(args[2], "--wd=products");
        assert_eq!(args[3], "-i=dtm_vm_2m.tif");
        assert_eq!(args[4], "-o=hillshade_2m.tif");
        assert!(args.contains(&String::from("--azimuth=315")));
        assert!(args.contains(&String::from("--altitude=45")));
    }

    #[test]
    fn test_slope_args_units() {
        let args = slope_args("products/dtm_vm_2m.tif", "products/slope.tif");
        assert!(args.contains(&String::from("--units=percent")));
    }

    #[test]
    fn test_d8_flow_accumulation_args_out_type() {
        let args = d8_flow_accumulation_args("products/dem_filled.tif", "products/flow_accum.tif");
        assert!(args.contains(&String::from("--out_type=cells")));
    }

    #[test]
    fn test_extract_streams_args_threshold() {
        let args = extract_streams_args("products/flow_accum.tif", "products/streams_all.tif", 1.0);
        assert_eq!(args[2], "--flow_accum=flow_accum.tif");
        assert!(args.contains(&String::from("--threshold=1")));
    }

    #[test]
    fn test_strahler_order_args() {
        let args = strahler_order_args(
            "products/d8_pointer.tif",
            "products/streams_all.tif",
            "products/strahler_order.tif",
        );
        assert_eq!(args[2], "--wd=products");
        assert_eq!(args[3], "--d8_pntr=d8_pointer.tif");
        assert_eq!(args[4], "--streams=streams_all.tif");
        assert_eq!(args[5], "-o=strahler_order.tif");
    }

    #[test]
    fn test_rescale_args() {
        let args = rescale_args("products/dtm_vm_1m.tif", "products/dtm_vm_2m.tif", 2.0);
        assert_eq!(args[0], "-tr");
        assert_eq!(args[1], "2");
        assert_eq!(args[2], "2");
        assert!(args.contains(&String::from("cubicspline")));
    }

    #[test]
    fn test_contour_args() {
        let args = contour_args("products/dtm_vft_2m.tif", "products/contours_2ft.shp", 2.0);
        assert_eq!(args[..8], [
            String::from("-b"),
            String::from("1"),
            String::from("-a"),
            String::from("ELEV"),
            String::from("-i"),
            String::from("2"),
            String::from("-f"),
            String::from("ESRI Shapefile"),
        ]);
    }

    #[test]
    fn test_polygonize_args_layer_and_field() {
        let args = polygonize_args("products/slope_classes.tif", "products/slope_classes.shp", "class");
        assert_eq!(args[args.len() - 2], "slope_classes");
        assert_eq!(args[args.len() - 1], "class");
        assert!(args.contains(&String::from("-mask")));
    }

    #[test]
    fn test_shp_to_geojson_args() {
        let args = shp_to_geojson_args("products/channels.shp", "products/channels.geojson");
        assert_eq!(args, vec![
            String::from("-f"),
            String::from("GeoJSON"),
            String::from("products/channels.geojson"),
            String::from("products/channels.shp"),
        ]);
    }
}
