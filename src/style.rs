use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;

use interp::interp;
use lazy_static::lazy_static;
use maplit::hashmap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn from_hex(hex: &str) -> Option<Rgb> {
        let hex = hex.strip_prefix('#').unwrap_or(hex);
        if hex.len() != 6 {
            return None;
        }

        let r = u8::from_str_radix(&hex[0..2], 16).ok()?;
        let g = u8::from_str_radix(&hex[2..4], 16).ok()?;
        let b = u8::from_str_radix(&hex[4..6], 16).ok()?;

        Some(Rgb { r, g, b })
    }

    pub fn hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// QGIS symbol color property, "r,g,b,a".
    pub fn rgba_prop(&self) -> String {
        format!("{},{},{},255", self.r, self.g, self.b)
    }
}

/// Control stops of the viridis ramp used for channel orders.
const VIRIDIS_STOPS: [(f64, (u8, u8, u8)); 9] = [
    (0.0, (68, 1, 84)),
    (0.125, (71, 44, 122)),
    (0.25, (59, 81, 139)),
    (0.375, (44, 113, 142)),
    (0.5, (33, 144, 141)),
    (0.625, (39, 173, 129)),
    (0.75, (92, 200, 99)),
    (0.875, (170, 220, 50)),
    (1.0, (253, 231, 37)),
];

pub fn viridis(t: f64) -> Rgb {
    let t = t.clamp(0.0, 1.0);

    let xs: Vec<f64> = VIRIDIS_STOPS.iter().map(|(p, _)| *p).collect();
    let rs: Vec<f64> = VIRIDIS_STOPS.iter().map(|(_, c)| c.0 as f64).collect();
    let gs: Vec<f64> = VIRIDIS_STOPS.iter().map(|(_, c)| c.1 as f64).collect();
    let bs: Vec<f64> = VIRIDIS_STOPS.iter().map(|(_, c)| c.2 as f64).collect();

    Rgb {
        r: interp(&xs, &rs, t).round() as u8,
        g: interp(&xs, &gs, t).round() as u8,
        b: interp(&xs, &bs, t).round() as u8,
    }
}

/// Discrete slope ramp, each entry the class upper bound in percent and
/// its color. The last class is open.
pub const SLOPE_RAMP: [(f64, &str); 6] = [
    (5.0, "#000000"),
    (10.0, "#420a68"),
    (15.0, "#932567"),
    (20.0, "#dd5039"),
    (30.0, "#fcbf0b"),
    (f64::INFINITY, "#fcffa4"),
];

pub const SLOPE_CLASS_COLORS: [(i32, &str); 6] = [
    (1, "#000000"),
    (2, "#420a68"),
    (3, "#932567"),
    (4, "#dd5039"),
    (5, "#fcbf0b"),
    (6, "#fcffa4"),
];

pub const ASPECT_CLASS_COLORS: [(i32, &str); 8] = [
    (1, "#bf1f26"),
    (2, "#c57724"),
    (3, "#dee119"),
    (4, "#76c043"),
    (5, "#49c8f5"),
    (6, "#015eae"),
    (7, "#4d2d8f"),
    (8, "#bf5095"),
];

/// Compass wheel for the aspect raster; north wraps back to the same
/// red at 360.
pub const ASPECT_RAMP: [(f64, &str, &str); 9] = [
    (0.0, "#bf1f26", "0° = N"),
    (45.0, "#c57724", "45° = NE"),
    (90.0, "#dee119", "90° = E"),
    (135.0, "#76c043", "135° = SE"),
    (180.0, "#49c8f5", "180° = S"),
    (225.0, "#015eae", "225° = SW"),
    (270.0, "#4d2d8f", "270° = W"),
    (315.0, "#bf5095", "315° = NW"),
    (360.0, "#bf1f26", "360° = N"),
];

lazy_static! {
    pub static ref SLOPE_CLASS_LABELS: HashMap<i32, &'static str> = hashmap! {
        1 => "<=5",
        2 => "5-10",
        3 => "10-15",
        4 => "15-20",
        5 => "20-30",
        6 => ">30",
    };

    pub static ref ASPECT_CLASS_LABELS: HashMap<i32, &'static str> = hashmap! {
        1 => "N",
        2 => "NE",
        3 => "E",
        4 => "SE",
        5 => "S",
        6 => "SW",
        7 => "W",
        8 => "NW",
    };
}

fn xml_escape(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '&' => String::from("&amp;"),
            '<' => String::from("&lt;"),
            '>' => String::from("&gt;"),
            '"' => String::from("&quot;"),
            '\'' => String::from("&apos;"),
            _ => c.to_string(),
        })
        .collect()
}

fn fmt_value(v: f64) -> String {
    if v.is_infinite() {
        String::from("inf")
    } else if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        v.to_string()
    }
}

/// Grayscale renderer stretched to the given display range. The range
/// comes from the hillshade's 2-98 percentile cut.
pub fn grayscale_stretch_qml(min: f64, max: f64) -> String {
    format!(
        r#"<!DOCTYPE qgis PUBLIC 'http://mrcc.com/qgis.dtd' 'SYSTEM'>
<qgis version="3.28.0" styleCategories="AllStyleCategories">
 <pipe>
  <rasterrenderer type="singlebandgray" band="1" gradient="BlackToWhite" opacity="1">
   <contrastEnhancement>
    <minValue>{}</minValue>
    <maxValue>{}</maxValue>
    <algorithm>StretchToMinimumMaximum</algorithm>
   </contrastEnhancement>
  </rasterrenderer>
  <brightnesscontrast brightness="0" contrast="0"/>
 </pipe>
 <blendMode>0</blendMode>
</qgis>
"#,
        min, max
    )
}

fn pseudocolor_qml(ramp_type: &str, min: f64, max: f64, items: &[(String, String, String)]) -> String {
    let mut qml = String::new();
    qml.push_str("<!DOCTYPE qgis PUBLIC 'http://mrcc.com/qgis.dtd' 'SYSTEM'>\n");
    qml.push_str("<qgis version=\"3.28.0\" styleCategories=\"AllStyleCategories\">\n");
    qml.push_str(" <pipe>\n");
    qml.push_str(&format!(
        "  <rasterrenderer type=\"singlebandpseudocolor\" band=\"1\" classificationMin=\"{}\" classificationMax=\"{}\" opacity=\"1\">\n",
        fmt_value(min),
        fmt_value(max)
    ));
    qml.push_str("   <rastershader>\n");
    qml.push_str(&format!(
        "    <colorrampshader colorRampType=\"{}\" classificationMode=\"1\" clip=\"0\">\n",
        ramp_type
    ));

    for (value, color, label) in items {
        qml.push_str(&format!(
            "     <item alpha=\"255\" value=\"{}\" color=\"{}\" label=\"{}\"/>\n",
            value,
            color,
            xml_escape(label)
        ));
    }

    qml.push_str("    </colorrampshader>\n");
    qml.push_str("   </rastershader>\n");
    qml.push_str("  </rasterrenderer>\n");
    qml.push_str(" </pipe>\n");
    qml.push_str(" <blendMode>0</blendMode>\n");
    qml.push_str("</qgis>\n");

    qml
}

/// Discrete six-class ramp for the percent-slope raster.
pub fn slope_ramp_qml() -> String {
    let items: Vec<(String, String, String)> = SLOPE_RAMP
        .iter()
        .zip(1..)
        .map(|((bound, color), class)| {
            (
                fmt_value(*bound),
                String::from(*color),
                String::from(SLOPE_CLASS_LABELS[&class]),
            )
        })
        .collect();

    pseudocolor_qml("DISCRETE", 0.0, 30.0, &items)
}

/// Interpolated compass wheel for the aspect raster.
pub fn aspect_ramp_qml() -> String {
    let items: Vec<(String, String, String)> = ASPECT_RAMP
        .iter()
        .map(|(value, color, label)| {
            (
                fmt_value(*value),
                String::from(*color),
                String::from(*label),
            )
        })
        .collect();

    pseudocolor_qml("INTERPOLATED", 0.0, 360.0, &items)
}

/// Categorized polygon renderer with transparent strokes, one category
/// per class value.
pub fn categorized_polygon_qml(field: &str, categories: &[(i32, &str, &str)]) -> String {
    let mut qml = String::new();
    qml.push_str("<!DOCTYPE qgis PUBLIC 'http://mrcc.com/qgis.dtd' 'SYSTEM'>\n");
    qml.push_str("<qgis version=\"3.28.0\" styleCategories=\"Symbology\">\n");
    qml.push_str(&format!(
        " <renderer-v2 type=\"categorizedSymbol\" attr=\"{}\" forceraster=\"0\" symbollevels=\"0\" enableorderby=\"0\">\n",
        field
    ));

    qml.push_str("  <categories>\n");
    for (i, (value, _, label)) in categories.iter().enumerate() {
        qml.push_str(&format!(
            "   <category render=\"true\" symbol=\"{}\" value=\"{}\" label=\"{}\"/>\n",
            i,
            value,
            xml_escape(label)
        ));
    }
    qml.push_str("  </categories>\n");

    qml.push_str("  <symbols>\n");
    for (i, (_, color, _)) in categories.iter().enumerate() {
        let rgba = Rgb::from_hex(color).unwrap_or(Rgb { r: 0, g: 0, b: 0 }).rgba_prop();
        qml.push_str(&format!(
            "   <symbol type=\"fill\" name=\"{}\" alpha=\"1\" clip_to_extent=\"1\">\n",
            i
        ));
        qml.push_str("    <layer class=\"SimpleFill\" enabled=\"1\" locked=\"0\" pass=\"0\">\n");
        qml.push_str(&format!("     <prop k=\"color\" v=\"{}\"/>\n", rgba));
        qml.push_str("     <prop k=\"style\" v=\"solid\"/>\n");
        qml.push_str("     <prop k=\"outline_style\" v=\"no\"/>\n");
        qml.push_str("    </layer>\n");
        qml.push_str("   </symbol>\n");
    }
    qml.push_str("  </symbols>\n");

    qml.push_str(" </renderer-v2>\n");
    qml.push_str("</qgis>\n");

    qml
}

pub fn slope_classes_qml() -> String {
    let categories: Vec<(i32, &str, &str)> = SLOPE_CLASS_COLORS
        .iter()
        .map(|(class, color)| (*class, *color, SLOPE_CLASS_LABELS[class]))
        .collect();

    categorized_polygon_qml("class", &categories)
}

pub fn aspect_classes_qml() -> String {
    let categories: Vec<(i32, &str, &str)> = ASPECT_CLASS_COLORS
        .iter()
        .map(|(class, color)| (*class, *color, ASPECT_CLASS_LABELS[class]))
        .collect();

    categorized_polygon_qml("class", &categories)
}

/// Graduated line renderer over the renumbered channel order in
/// `STRM_VAL`, colored along viridis from order 1 to `max_order`.
pub fn channels_qml(max_order: i32) -> String {
    let mut qml = String::new();
    qml.push_str("<!DOCTYPE qgis PUBLIC 'http://mrcc.com/qgis.dtd' 'SYSTEM'>\n");
    qml.push_str("<qgis version=\"3.28.0\" styleCategories=\"Symbology\">\n");
    qml.push_str(" <renderer-v2 type=\"graduatedSymbol\" attr=\"STRM_VAL\" graduatedMethod=\"GraduatedColor\" symbollevels=\"0\">\n");

    // One degenerate range per order, lower == upper == the order value.
    qml.push_str("  <ranges>\n");
    for k in 1..=max_order {
        qml.push_str(&format!(
            "   <range render=\"true\" symbol=\"{}\" lower=\"{}\" upper=\"{}\" label=\"{}\"/>\n",
            k - 1,
            k,
            k,
            k
        ));
    }
    qml.push_str("  </ranges>\n");

    qml.push_str("  <symbols>\n");
    for k in 1..=max_order {
        let t = if max_order > 1 {
            (k - 1) as f64 / (max_order - 1) as f64
        } else {
            0.0
        };
        let rgba = viridis(t).rgba_prop();

        qml.push_str(&format!(
            "   <symbol type=\"line\" name=\"{}\" alpha=\"1\" clip_to_extent=\"1\">\n",
            k - 1
        ));
        qml.push_str("    <layer class=\"SimpleLine\" enabled=\"1\" locked=\"0\" pass=\"0\">\n");
        qml.push_str(&format!("     <prop k=\"line_color\" v=\"{}\"/>\n", rgba));
        qml.push_str("     <prop k=\"line_style\" v=\"solid\"/>\n");
        qml.push_str("     <prop k=\"line_width\" v=\"0.5\"/>\n");
        qml.push_str("    </layer>\n");
        qml.push_str("   </symbol>\n");
    }
    qml.push_str("  </symbols>\n");

    qml.push_str(" </renderer-v2>\n");
    qml.push_str("</qgis>\n");

    qml
}

/// Sidecar path QGIS looks for next to a layer.
pub fn qml_path(layer_fn: &str) -> String {
    Path::new(layer_fn)
        .with_extension("qml")
        .to_string_lossy()
        .into_owned()
}

pub fn write_qml(layer_fn: &str, qml: &str) -> io::Result<()> {
    fs::write(qml_path(layer_fn), qml)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_hex_roundtrip() {
        let rgb = Rgb::from_hex("#dd5039").unwrap();
        assert_eq!(rgb, Rgb { r: 221, g: 80, b: 57 });
        assert_eq!(rgb.hex(), "#dd5039");
    }

    #[test]
    fn test_rgb_from_hex_rejects_garbage() {
        assert!(Rgb::from_hex("#dd50").is_none());
        assert!(Rgb::from_hex("#zzzzzz").is_none());
    }

    #[test]
    fn test_rgba_prop() {
        let rgb = Rgb::from_hex("#015eae").unwrap();
        assert_eq!(rgb.rgba_prop(), "1,94,174,255");
    }

    #[test]
    fn test_viridis_endpoints() {
        assert_eq!(viridis(0.0).hex(), "#440154");
        assert_eq!(viridis(1.0).hex(), "#fde725");
    }

    #[test]
    fn test_viridis_midpoint() {
        assert_eq!(viridis(0.5), Rgb { r: 33, g: 144, b: 141 });
    }

    #[test]
    fn test_viridis_clamps() {
        assert_eq!(viridis(-2.0), viridis(0.0));
        assert_eq!(viridis(7.0), viridis(1.0));
    }

    #[test]
    fn test_slope_ramp_qml() {
        let qml = slope_ramp_qml();
        assert!(qml.contains("colorRampType=\"DISCRETE\""));
        assert!(qml.contains("value=\"5\" color=\"#000000\" label=\"&lt;=5\""));
        assert!(qml.contains("value=\"30\" color=\"#fcbf0b\" label=\"20-30\""));
        assert!(qml.contains("value=\"inf\" color=\"#fcffa4\" label=\"&gt;30\""));
        assert_eq!(qml.matches("<item ").count(), 6);
    }

    #[test]
    fn test_aspect_ramp_qml_wraps_north() {
        let qml = aspect_ramp_qml();
        assert!(qml.contains("colorRampType=\"INTERPOLATED\""));
        assert!(qml.contains("value=\"0\" color=\"#bf1f26\" label=\"0° = N\""));
        assert!(qml.contains("value=\"360\" color=\"#bf1f26\" label=\"360° = N\""));
        assert_eq!(qml.matches("<item ").count(), 9);
    }

    #[test]
    fn test_slope_classes_qml() {
        let qml = slope_classes_qml();
        assert!(qml.contains("attr=\"class\""));
        assert!(qml.contains("outline_style\" v=\"no\""));
        assert_eq!(qml.matches("<category ").count(), 6);
        assert_eq!(qml.matches("SimpleFill").count(), 6);
    }

    #[test]
    fn test_aspect_classes_qml_labels() {
        let qml = aspect_classes_qml();
        assert!(qml.contains("value=\"1\" label=\"N\""));
        assert!(qml.contains("value=\"8\" label=\"NW\""));
        assert_eq!(qml.matches("<category ").count(), 8);
    }

    #[test]
    fn test_channels_qml_ranges() {
        let qml = channels_qml(4);
        assert!(qml.contains("attr=\"STRM_VAL\""));
        assert_eq!(qml.matches("<range ").count(), 4);
        assert!(qml.contains("lower=\"1\" upper=\"1\" label=\"1\""));
        assert!(qml.contains("lower=\"4\" upper=\"4\" label=\"4\""));
        assert!(qml.contains("v=\"68,1,84,255\""));
        assert!(qml.contains("v=\"253,231,37,255\""));
    }

    #[test]
    fn test_channels_qml_single_order() {
        let qml = channels_qml(1);
        assert_eq!(qml.matches("<range ").count(), 1);
        assert!(qml.contains(&format!("v=\"{}\"", viridis(0.0).rgba_prop())));
    }

    #[test]
    fn test_qml_path() {
        assert_eq!(qml_path("products/slope.tif"), "products/slope.qml");
        assert_eq!(qml_path("products/channels.shp"), "products/channels.qml");
    }

    #[test]
    fn test_xml_escape() {
        assert_eq!(xml_escape("<=5"), "&lt;=5");
        assert_eq!(xml_escape(">30"), "&gt;30");
        assert_eq!(xml_escape("a & b"), "a &amp; b");
    }
}
