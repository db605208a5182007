use std::fs;
use std::fs::File;
use std::io;

use geojson::GeoJson;
use serde_json::{json, Value};

/// One traced channel segment. `fid` is the feature's position in the
/// vectorized network, `order` the renumbered Strahler order from
/// `STRM_VAL`, `length_m` the polyline length in map units.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelSegment {
    pub fid: usize,
    pub order: i32,
    pub length_m: f64,
}

fn line_length(coords: &[Vec<f64>]) -> f64 {
    coords
        .windows(2)
        .map(|pair| {
            let dx = pair[1][0] - pair[0][0];
            let dy = pair[1][1] - pair[0][1];
            (dx * dx + dy * dy).sqrt()
        })
        .sum()
}

/// Reads the vectorized network (in its native CRS, so lengths come out
/// in meters) into per-segment records, in feature order.
pub fn summarize_channels(geojson_fn: &str) -> io::Result<Vec<ChannelSegment>> {
    let contents = fs::read_to_string(geojson_fn)?;
    let geojson: GeoJson = contents
        .parse()
        .map_err(|e: geojson::Error| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;

    let fc = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "expected a FeatureCollection",
            ))
        }
    };

    let mut segments = Vec::new();

    for (fid, feature) in fc.features.iter().enumerate() {
        let order = feature
            .properties
            .as_ref()
            .and_then(|props| props.get("STRM_VAL"))
            .and_then(|v| v.as_f64())
            .map(|v| v.round() as i32)
            .unwrap_or(0);

        let length_m = match feature.geometry.as_ref().map(|g| &g.value) {
            Some(geojson::Value::LineString(coords)) => line_length(coords),
            Some(geojson::Value::MultiLineString(lines)) => {
                lines.iter().map(|l| line_length(l)).sum()
            }
            _ => 0.0,
        };

        segments.push(ChannelSegment { fid, order, length_m });
    }

    Ok(segments)
}

/// Mainstem first: descending order, ties broken by descending length.
pub fn sort_segments(segments: &mut [ChannelSegment]) {
    segments.sort_by(|a, b| {
        b.order.cmp(&a.order).then(
            b.length_m
                .partial_cmp(&a.length_m)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });
}

pub fn write_channels_csv(path: &str, segments: &[ChannelSegment]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(file);

    let headers: Vec<String> = vec![
        String::from("fid"),
        String::from("order"),
        String::from("length_m"),
    ];

    writer
        .write_record(headers)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

    for segment in segments {
        let record: Vec<String> = vec![
            segment.fid.to_string(),
            segment.order.to_string(),
            segment.length_m.to_string(),
        ];

        writer
            .write_record(record)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    }

    writer.flush()?;

    Ok(())
}

/// Rewrites the channel GeoJSON in place: `order` and `length_m` land
/// in each feature's properties, features are sorted mainstem-first,
/// and a named CRS member is attached when the EPSG code is known.
pub fn finalize_channels_geojson(
    geojson_fn: &str,
    segments: &[ChannelSegment],
    epsg: Option<i32>,
) -> io::Result<()> {
    let contents = fs::read_to_string(geojson_fn)?;
    let geojson: Value = serde_json::from_str(&contents)?;

    let mut features: Vec<Value> = geojson["features"].as_array().cloned().unwrap_or_default();

    for segment in segments {
        if let Some(props) = features
            .get_mut(segment.fid)
            .and_then(|f| f["properties"].as_object_mut())
        {
            props.insert(String::from("order"), json!(segment.order));
            props.insert(String::from("length_m"), json!(segment.length_m));
        }
    }

    features.sort_by(|a, b| {
        let a_order = a["properties"]["order"].as_i64().unwrap_or(0);
        let b_order = b["properties"]["order"].as_i64().unwrap_or(0);
        let a_length = a["properties"]["length_m"].as_f64().unwrap_or(0.0);
        let b_length = b["properties"]["length_m"].as_f64().unwrap_or(0.0);

        b_order.cmp(&a_order).then(
            b_length
                .partial_cmp(&a_length)
                .unwrap_or(std::cmp::Ordering::Equal),
        )
    });

    let mut combined = serde_json::Map::new();

    if let Some(code) = epsg {
        let crs = json!({
            "type": "name",
            "properties": {
                "name": format!("urn:ogc:def:crs:EPSG::{}", code)
            }
        });
        combined.insert(String::from("crs"), crs);
    }

    combined.insert(String::from("type"), json!("FeatureCollection"));
    combined.insert(String::from("features"), Value::Array(features));

    let serialized = serde_json::to_string_pretty(&Value::Object(combined))?;
    fs::write(geojson_fn, serialized)?;

    Ok(())
}
