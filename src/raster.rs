extern crate gdal;

use gdal::raster::{Buffer, GdalType};
use gdal::spatial_ref::SpatialRef;
use gdal::{Dataset, DriverManager};

use proj::Proj;

const NO_DATA_DEFAULT: f64 = -9999.0;

/// Cell types a `Raster` can hold. GDAL converts band data on read,
/// so any band can be pulled into either representation.
pub trait RasterCell: GdalType + Copy + PartialEq {
    fn from_f64(v: f64) -> Self;
    fn to_f64(self) -> f64;
}

impl RasterCell for f64 {
    fn from_f64(v: f64) -> f64 { v }
    fn to_f64(self) -> f64 { self }
}

impl RasterCell for i32 {
    fn from_f64(v: f64) -> i32 { v as i32 }
    fn to_f64(self) -> f64 { self as f64 }
}

/// Single-band grid read through GDAL. `data` is row-major from the
/// northwest corner, matching the geotransform origin.
pub struct Raster<T> {
    pub data: Vec<T>,
    pub width: usize,
    pub height: usize,
    pub geo_transform: [f64; 6],
    pub cellsize: f64,
    pub no_data: T,
    pub wkt: String,
    pub wgs_transform: [f64; 4],
}

/// Linear pixel -> lon/lat transform: `[lon0, dlon, lat0, dlat]`.
pub fn px_to_wgs(wgs_transform: &[f64; 4], px: f64, py: f64) -> (f64, f64) {
    let lon = wgs_transform[0] + px * wgs_transform[1];
    let lat = wgs_transform[2] + py * wgs_transform[3];
    (lon, lat)
}

fn wgs_transform_for(wkt: &str, geo_transform: &[f64; 6], width: usize, height: usize) -> [f64; 4] {
    let nw = (geo_transform[0], geo_transform[3]);
    let se = (
        geo_transform[0] + geo_transform[1] * width as f64,
        geo_transform[3] + geo_transform[5] * height as f64,
    );

    if let Ok(transformer) = Proj::new_known_crs(wkt, "EPSG:4326", None) {
        if let (Ok(nw_ll), Ok(se_ll)) = (transformer.convert(nw), transformer.convert(se)) {
            return [
                nw_ll.0,
                (se_ll.0 - nw_ll.0) / width as f64,
                nw_ll.1,
                (se_ll.1 - nw_ll.1) / height as f64,
            ];
        }
    }

    // No usable CRS: treat the geotransform as already geographic.
    [geo_transform[0], geo_transform[1], geo_transform[3], geo_transform[5]]
}

impl<T: RasterCell> Raster<T> {
    pub fn read(file_path: &str) -> gdal::errors::Result<Raster<T>> {
        let dataset = Dataset::open(file_path)?;
        let (width, height) = dataset.raster_size();
        let geo_transform = dataset.geo_transform()?;
        let wkt = dataset.projection();

        let band = dataset.rasterband(1)?;
        let no_data = T::from_f64(band.no_data_value().unwrap_or(NO_DATA_DEFAULT));
        let buffer = band.read_as::<T>((0, 0), (width, height), (width, height), None)?;

        let wgs_transform = wgs_transform_for(&wkt, &geo_transform, width, height);

        Ok(Raster {
            data: buffer.data,
            width,
            height,
            cellsize: geo_transform[1],
            geo_transform,
            no_data,
            wkt,
            wgs_transform,
        })
    }

    pub fn write(&self, file_path: &str) -> gdal::errors::Result<()> {
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let mut dataset = driver.create_with_band_type::<T, _>(
            file_path,
            self.width as isize,
            self.height as isize,
            1,
        )?;
        dataset.set_geo_transform(&self.geo_transform)?;
        dataset.set_projection(&self.wkt)?;

        let mut band = dataset.rasterband(1)?;
        band.set_no_data_value(Some(self.no_data.to_f64()))?;

        let buffer = Buffer::new((self.width, self.height), self.data.clone());
        band.write((0, 0), (self.width, self.height), &buffer)?;

        Ok(())
    }

    /// Same grid, every cell set to `no_data`.
    pub fn empty_clone(&self) -> Raster<T> {
        Raster {
            data: vec![self.no_data; self.data.len()],
            width: self.width,
            height: self.height,
            geo_transform: self.geo_transform,
            cellsize: self.cellsize,
            no_data: self.no_data,
            wkt: self.wkt.clone(),
            wgs_transform: self.wgs_transform,
        }
    }

    /// Same grid under a different cell type.
    pub fn empty_clone_as<U: RasterCell>(&self, no_data: U) -> Raster<U> {
        Raster {
            data: vec![no_data; self.data.len()],
            width: self.width,
            height: self.height,
            geo_transform: self.geo_transform,
            cellsize: self.cellsize,
            no_data,
            wkt: self.wkt.clone(),
            wgs_transform: self.wgs_transform,
        }
    }

    pub fn is_no_data(&self, value: T) -> bool {
        value == self.no_data
    }

    pub fn xy_to_index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn index_to_xy(&self, index: usize) -> (usize, usize) {
        (index % self.width, index / self.width)
    }

    /// Extent in map units as `[w, s, e, n]`.
    pub fn extent(&self) -> [f64; 4] {
        let w = self.geo_transform[0];
        let n = self.geo_transform[3];
        let e = w + self.geo_transform[1] * self.width as f64;
        let s = n + self.geo_transform[5] * self.height as f64;
        [w, s, e, n]
    }

    /// Extent in EPSG:4326 as `[w, s, e, n]`.
    pub fn wgs_extent(&self) -> [f64; 4] {
        let (w, n) = px_to_wgs(&self.wgs_transform, 0.0, 0.0);
        let (e, s) = px_to_wgs(&self.wgs_transform, self.width as f64, self.height as f64);
        [w, s, e, n]
    }

    pub fn epsg(&self) -> Option<i32> {
        SpatialRef::from_wkt(&self.wkt).ok()?.auth_code().ok()
    }
}

impl Raster<i32> {
    /// Maximum valid cell, `None` when every cell is nodata.
    pub fn max_value(&self) -> Option<i32> {
        self.data
            .iter()
            .copied()
            .filter(|v| *v != self.no_data)
            .max()
    }
}

impl Raster<f64> {
    /// Cumulative-count cut over the valid cells, quantiles in [0, 1].
    /// Returns `None` when the raster holds no valid data.
    pub fn percentile_cut(&self, lo: f64, hi: f64) -> Option<(f64, f64)> {
        let mut values: Vec<f64> = self
            .data
            .iter()
            .copied()
            .filter(|v| *v != self.no_data && v.is_finite())
            .collect();

        if values.is_empty() {
            return None;
        }

        values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        let lo = lo.clamp(0.0, 1.0);
        let hi = hi.clamp(0.0, 1.0);
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };

        let last = values.len() - 1;
        let i_lo = (last as f64 * lo).round() as usize;
        let i_hi = (last as f64 * hi).round() as usize;

        Some((values[i_lo], values[i_hi]))
    }
}
