//! Neighborhood vulnerability dataset: loading, level colors, the polygon
//! layer for the map and the downloadable table.

use crate::data::{column_index, csv_reader, read_headers, record_point};
use crate::types::{Indices, Levels, Neighborhood};
use anyhow::{Context, Result, anyhow};
use csv::StringRecord;
use geo::MultiPolygon;
use geojson::{Feature, FeatureCollection, GeoJson, JsonObject};
use serde_json::json;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::info;

pub const SHAPE_COLUMN: &str = "Geo Shape";

/// Level columns charted as bar charts, in display order.
pub const LEVEL_COLUMNS: [&str; 4] = ["Vul_Equip", "Vul_Dem", "Vul_Econom", "Vul_Global"];
/// Index columns charted as box plots, in display order.
pub const INDEX_COLUMNS: [&str; 4] = ["Ind_Equip", "Ind_Dem", "Ind_Econom", "Ind_Global"];

pub const TABLE_COLUMNS: [&str; 10] = [
    "Name", "District", "Ind_Equip", "Vul_Equip", "Ind_Dem", "Vul_Dem",
    "Ind_Econom", "Vul_Econom", "Ind_Global", "Vul_Global",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelColor {
    Red,
    Orange,
    Green,
    Gray,
}

impl LevelColor {
    pub fn as_str(self) -> &'static str {
        match self {
            LevelColor::Red => "red",
            LevelColor::Orange => "orange",
            LevelColor::Green => "green",
            LevelColor::Gray => "gray",
        }
    }
}

pub fn level_color(label: &str) -> LevelColor {
    match label {
        "Vulnerabilidad Alta" => LevelColor::Red,
        "Vulnerabilidad Media" => LevelColor::Orange,
        "Vulnerabilidad Baja" => LevelColor::Green,
        _ => LevelColor::Gray,
    }
}

pub fn load_neighborhoods(path: &Path, delimiter: u8) -> Result<Vec<Neighborhood>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open vulnerability CSV: {:?}", path))?;
    let neighborhoods = read_neighborhoods(file, delimiter)
        .with_context(|| format!("Failed to load vulnerability data from {:?}", path))?;
    info!(neighborhoods = neighborhoods.len(), "Loaded vulnerability data");
    Ok(neighborhoods)
}

pub fn read_neighborhoods<R: Read>(reader: R, delimiter: u8) -> Result<Vec<Neighborhood>> {
    let mut rdr = csv_reader(reader, delimiter);
    let headers = read_headers(&mut rdr)?;
    let [geo_idx, shape_idx, name_idx, district_idx] = columns(
        &headers,
        [crate::data::GEO_POINT_COLUMN, SHAPE_COLUMN, "Name", "District"],
    )?;
    let [ind_equip, ind_dem, ind_econ, ind_global] = columns(&headers, INDEX_COLUMNS)?;
    let [vul_equip, vul_dem, vul_econ, vul_global] = columns(&headers, LEVEL_COLUMNS)?;

    let mut neighborhoods = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let Some(point) = record_point(&record, geo_idx)? else {
            continue;
        };
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let cell = |idx: usize| record.get(idx).unwrap_or("").to_string();

        let indices = Indices {
            equipment: parse_index(&record, ind_equip)?,
            demographic: parse_index(&record, ind_dem)?,
            economic: parse_index(&record, ind_econ)?,
            global: parse_index(&record, ind_global)?,
        };
        let levels = Levels {
            equipment: cell(vul_equip),
            demographic: cell(vul_dem),
            economic: cell(vul_econ),
            global: cell(vul_global),
        };
        let geometry = parse_shape(record.get(shape_idx).unwrap_or(""))
            .with_context(|| format!("Bad {} on line {}", SHAPE_COLUMN, line))?;

        neighborhoods.push(Neighborhood {
            name: cell(name_idx),
            district: cell(district_idx),
            indices,
            levels,
            point,
            geometry,
        });
    }

    Ok(neighborhoods)
}

fn columns<const N: usize>(headers: &[String], names: [&str; N]) -> Result<[usize; N]> {
    let mut indices = [0; N];
    for (slot, name) in indices.iter_mut().zip(names) {
        *slot = column_index(headers, name)?;
    }
    Ok(indices)
}

fn parse_index(record: &StringRecord, idx: usize) -> Result<Option<f64>> {
    let raw = record.get(idx).unwrap_or("").trim();
    if raw.is_empty() {
        return Ok(None);
    }
    let line = record.position().map(|p| p.line()).unwrap_or(0);
    raw.parse::<f64>()
        .map(Some)
        .with_context(|| format!("Bad index value {:?} on line {}", raw, line))
}

/// Parses serialized GeoJSON geometry text into a multipolygon. Empty text
/// and non-areal geometries give `None`.
pub fn parse_shape(text: &str) -> Result<Option<MultiPolygon<f64>>> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }

    let geojson: GeoJson = text.parse().context("Failed to parse GeoJSON geometry")?;
    let geometry = match geojson {
        GeoJson::Geometry(g) => g,
        GeoJson::Feature(Feature { geometry: Some(g), .. }) => g,
        GeoJson::Feature(_) => return Ok(None),
        GeoJson::FeatureCollection(_) => {
            return Err(anyhow!("Expected a single geometry, found a FeatureCollection"))
        }
    };

    let geo_geom: geo::Geometry<f64> = geometry.value.try_into()
        .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;

    Ok(match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon::new(vec![p])),
        _ => None,
    })
}

/// Polygon layer for the map: one feature per neighborhood with a shape,
/// carrying its tooltip fields and fill color.
pub fn feature_collection(neighborhoods: &[Neighborhood]) -> FeatureCollection {
    let features = neighborhoods
        .iter()
        .filter_map(|n| {
            let geometry = n.geometry.as_ref()?;
            let mut properties = JsonObject::new();
            properties.insert("Barrio".to_string(), json!(n.name));
            properties.insert("Distrito".to_string(), json!(n.district));
            properties.insert("Índice Global".to_string(), json!(format_index(n.indices.global)));
            properties.insert("Vulnerabilidad".to_string(), json!(n.levels.global));
            properties.insert("color".to_string(), json!(level_color(&n.levels.global).as_str()));

            Some(Feature {
                bbox: None,
                geometry: Some(geojson::Geometry::new(geojson::Value::from(geometry))),
                id: None,
                properties: Some(properties),
                foreign_members: None,
            })
        })
        .collect();

    FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Formats an index like the source data does: integral values keep one
/// decimal, missing values are left empty.
pub fn format_index(value: Option<f64>) -> String {
    match value {
        Some(v) if v.fract() == 0.0 && v.is_finite() => format!("{:.1}", v),
        Some(v) => v.to_string(),
        None => String::new(),
    }
}

pub fn table_row(n: &Neighborhood) -> [String; 10] {
    [
        n.name.clone(),
        n.district.clone(),
        format_index(n.indices.equipment),
        n.levels.equipment.clone(),
        format_index(n.indices.demographic),
        n.levels.demographic.clone(),
        format_index(n.indices.economic),
        n.levels.economic.clone(),
        format_index(n.indices.global),
        n.levels.global.clone(),
    ]
}

/// Values of one level column, in row order. `None` for a name outside
/// [`LEVEL_COLUMNS`].
pub fn level_values<'a>(neighborhoods: &'a [Neighborhood], column: &str) -> Option<Vec<&'a str>> {
    let pick: fn(&Levels) -> &str = match column {
        "Vul_Equip" => |l| l.equipment.as_str(),
        "Vul_Dem" => |l| l.demographic.as_str(),
        "Vul_Econom" => |l| l.economic.as_str(),
        "Vul_Global" => |l| l.global.as_str(),
        _ => return None,
    };
    Some(neighborhoods.iter().map(|n| pick(&n.levels)).collect())
}

/// Present values of one index column, missing ones dropped. `None` for a
/// name outside [`INDEX_COLUMNS`].
pub fn index_values(neighborhoods: &[Neighborhood], column: &str) -> Option<Vec<f64>> {
    let pick: fn(&Indices) -> Option<f64> = match column {
        "Ind_Equip" => |i| i.equipment,
        "Ind_Dem" => |i| i.demographic,
        "Ind_Econom" => |i| i.economic,
        "Ind_Global" => |i| i.global,
        _ => return None,
    };
    Some(neighborhoods.iter().filter_map(|n| pick(&n.indices)).collect())
}

/// The downloadable table as comma-separated text with a header row.
pub fn to_csv(neighborhoods: &[Neighborhood]) -> Result<String> {
    let mut wtr = csv::Writer::from_writer(Vec::new());
    wtr.write_record(TABLE_COLUMNS)?;
    for n in neighborhoods {
        wtr.write_record(table_row(n))?;
    }
    let bytes = wtr.into_inner().map_err(|e| anyhow!("Failed to flush CSV: {}", e))?;
    Ok(String::from_utf8(bytes)?)
}
