use crate::raster::Raster;

pub const FT_PER_M: f64 = 3.28084;

/// Upper bounds of the slope classes in percent; the sixth class is
/// open-ended.
pub const SLOPE_CLASS_BOUNDS: [f64; 5] = [5.0, 10.0, 15.0, 20.0, 30.0];

/// Half-width of a compass sector in degrees.
const HALF_SECTOR: f64 = 22.5;

/// Elevations rescaled from meters to feet. Nodata cells pass through.
pub fn to_feet(dem: &Raster<f64>) -> Raster<f64> {
    let mut ft = dem.empty_clone();

    for i in 0..dem.data.len() {
        let v = dem.data[i];
        if !dem.is_no_data(v) {
            ft.data[i] = v * FT_PER_M;
        }
    }

    ft
}

/// Slope class 1-6 from percent slope, boundary values falling in the
/// lower class. Negative slope is unclassed.
pub fn slope_class(pct: f64) -> i32 {
    if pct < 0.0 {
        return 0;
    }
    1 + SLOPE_CLASS_BOUNDS.iter().filter(|bound| pct > **bound).count() as i32
}

/// Compass class 1-8 (N, NE, E, SE, S, SW, W, NW) on half-wind
/// boundaries, north wrapping across 337.5-22.5. Flat cells come out of
/// the aspect engine negative and stay unclassed.
pub fn aspect_class(deg: f64) -> i32 {
    if deg < 0.0 {
        return 0;
    }
    if deg >= 360.0 - HALF_SECTOR || deg < HALF_SECTOR {
        return 1;
    }
    ((deg - HALF_SECTOR) / 45.0).floor() as i32 + 2
}

/// Class grid from a percent-slope raster. Unclassed cells hold 0,
/// which is also the grid's nodata so they mask out of polygonization.
pub fn classify_slope(slope_pct: &Raster<f64>) -> Raster<i32> {
    let mut classes = slope_pct.empty_clone_as::<i32>(0);

    for i in 0..slope_pct.data.len() {
        let v = slope_pct.data[i];
        if slope_pct.is_no_data(v) || !v.is_finite() {
            continue;
        }
        classes.data[i] = slope_class(v);
    }

    classes
}

/// Class grid from an aspect raster in degrees.
pub fn classify_aspect(aspect_deg: &Raster<f64>) -> Raster<i32> {
    let mut classes = aspect_deg.empty_clone_as::<i32>(0);

    for i in 0..aspect_deg.data.len() {
        let v = aspect_deg.data[i];
        if aspect_deg.is_no_data(v) || !v.is_finite() {
            continue;
        }
        classes.data[i] = aspect_class(v);
    }

    classes
}

/// Keeps cells at or above the minimum Strahler order, renumbered so
/// the smallest kept order is 1. Cells below the cut go to nodata.
pub fn threshold_strahler(order: &Raster<f64>, min_order: i32) -> Raster<i32> {
    let mut kept = order.empty_clone_as::<i32>(0);

    for i in 0..order.data.len() {
        let v = order.data[i];
        if order.is_no_data(v) || !v.is_finite() {
            continue;
        }

        let o = v.round() as i32;
        if o >= min_order {
            kept.data[i] = o - min_order + 1;
        }
    }

    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::Raster;

    fn grid(data: Vec<f64>) -> Raster<f64> {
        let n = data.len();
        Raster {
            data,
            width: n,
            height: 1,
            geo_transform: [0.0, 1.0, 0.0, 0.0, 0.0, -1.0],
            cellsize: 1.0,
            no_data: -9999.0,
            wkt: String::new(),
            wgs_transform: [0.0, 1.0, 0.0, -1.0],
        }
    }

    #[test]
    fn test_slope_class_boundaries() {
        assert_eq!(slope_class(0.0), 1);
        assert_eq!(slope_class(5.0), 1);
        assert_eq!(slope_class(5.1), 2);
        assert_eq!(slope_class(10.0), 2);
        assert_eq!(slope_class(15.1), 4);
        assert_eq!(slope_class(20.1), 5);
        assert_eq!(slope_class(30.0), 5);
        assert_eq!(slope_class(30.1), 6);
        assert_eq!(slope_class(250.0), 6);
    }

    #[test]
    fn test_slope_class_negative_unclassed() {
        assert_eq!(slope_class(-0.1), 0);
    }

    #[test]
    fn test_aspect_class_north_wraps() {
        assert_eq!(aspect_class(0.0), 1);
        assert_eq!(aspect_class(22.4), 1);
        assert_eq!(aspect_class(337.5), 1);
        assert_eq!(aspect_class(360.0), 1);
    }

    #[test]
    fn test_aspect_class_sectors() {
        assert_eq!(aspect_class(22.5), 2); // NE
        assert_eq!(aspect_class(45.0), 2);
        assert_eq!(aspect_class(90.0), 3); // E
        assert_eq!(aspect_class(135.0), 4); // SE
        assert_eq!(aspect_class(180.0), 5); // S
        assert_eq!(aspect_class(225.0), 6); // SW
        assert_eq!(aspect_class(270.0), 7); // W
        assert_eq!(aspect_class(315.0), 8); // NW
        assert_eq!(aspect_class(337.4), 8);
    }

    #[test]
    fn test_aspect_class_flat_unclassed() {
        assert_eq!(aspect_class(-1.0), 0);
    }

    #[test]
    fn test_to_feet() {
        let dem = grid(vec![100.0, 0.0, -9999.0]);
        let ft = to_feet(&dem);
        assert!((ft.data[0] - 328.084).abs() < 1e-9);
        assert_eq!(ft.data[1], 0.0);
        assert_eq!(ft.data[2], -9999.0);
        assert_eq!(ft.no_data, -9999.0);
    }

    #[test]
    fn test_classify_slope_grid() {
        let slope = grid(vec![2.0, 7.5, 12.0, 18.0, 25.0, 40.0, -9999.0]);
        let classes = classify_slope(&slope);
        assert_eq!(classes.data, vec![1, 2, 3, 4, 5, 6, 0]);
        assert_eq!(classes.no_data, 0);
    }

    #[test]
    fn test_classify_aspect_grid() {
        let aspect = grid(vec![10.0, 80.0, 200.0, 320.0, -1.0, -9999.0]);
        let classes = classify_aspect(&aspect);
        assert_eq!(classes.data, vec![1, 3, 5, 8, 0, 0]);
    }

    #[test]
    fn test_threshold_strahler_renumbers() {
        let order = grid(vec![1.0, 4.0, 5.0, 6.0, 8.0, -9999.0]);
        let kept = threshold_strahler(&order, 5);
        assert_eq!(kept.data, vec![0, 0, 1, 2, 4, 0]);
        assert_eq!(kept.max_value(), Some(4));
    }

    #[test]
    fn test_threshold_strahler_empty_network() {
        let order = grid(vec![1.0, 2.0, 3.0]);
        let kept = threshold_strahler(&order, 5);
        assert_eq!(kept.data, vec![0, 0, 0]);
        assert_eq!(kept.max_value(), None);
    }
}
