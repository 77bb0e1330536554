use crate::config::{AppConfig, DatasetConfig};
use crate::types::{Dataset, Facility, Neighborhood};
use crate::vulnerability;
use anyhow::{Context, Result, anyhow};
use csv::{ReaderBuilder, StringRecord};
use geo::Point;
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

pub const GEO_POINT_COLUMN: &str = "geo_point_2d";

#[derive(Debug, Error, PartialEq)]
#[error("malformed coordinate field {raw:?}: expected \"<lat>,<lon>\"")]
pub struct CoordinateError {
    pub raw: String,
}

/// Everything the server renders from, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub datasets: Vec<Dataset>,
    pub neighborhoods: Vec<Neighborhood>,
}

impl Catalog {
    pub fn dataset(&self, id: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|d| d.id == id)
    }
}

/// Splits a combined `"<lat>,<lon>"` field.
///
/// Empty fields and fields without a comma are not coordinates and yield
/// `Ok(None)`. A field with a comma must hold exactly two numbers.
pub fn parse_geo_point(text: &str) -> Result<Option<Point<f64>>, CoordinateError> {
    let text = text.trim();
    if text.is_empty() || !text.contains(',') {
        return Ok(None);
    }

    let malformed = || CoordinateError { raw: text.to_string() };
    let mut parts = text.split(',');
    let (lat, lon) = match (parts.next(), parts.next(), parts.next()) {
        (Some(lat), Some(lon), None) => (lat, lon),
        _ => return Err(malformed()),
    };
    let lat: f64 = lat.trim().parse().map_err(|_| malformed())?;
    let lon: f64 = lon.trim().parse().map_err(|_| malformed())?;

    Ok(Some(Point::new(lon, lat)))
}

pub fn load_catalog(config: &AppConfig) -> Result<Catalog> {
    let delimiter = config.delimiter_byte()?;
    info!(count = config.datasets.len(), "Loading service datasets");

    let datasets = config
        .datasets
        .par_iter()
        .map(|dataset_config| {
            let path = config.dataset_path(&dataset_config.file);
            let dataset = load_dataset(&path, delimiter, &dataset_config.id, &dataset_config.file)?;
            for column in check_schema(dataset_config, &dataset) {
                warn!(dataset = %dataset_config.id, %column, "Configured column not found in CSV");
            }
            Ok(dataset)
        })
        .collect::<Result<Vec<_>>>()?;

    let vuln_path = config.dataset_path(&config.vulnerability.file);
    let neighborhoods = vulnerability::load_neighborhoods(&vuln_path, delimiter)?;

    Ok(Catalog { datasets, neighborhoods })
}

pub fn load_dataset(path: &Path, delimiter: u8, id: &str, file: &str) -> Result<Dataset> {
    let reader = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let dataset = read_dataset(reader, delimiter, id, file)
        .with_context(|| format!("Failed to load dataset '{}' from {:?}", id, path))?;
    info!(
        dataset = id,
        records = dataset.facilities.len(),
        "Loaded dataset"
    );
    Ok(dataset)
}

pub fn read_dataset<R: Read>(reader: R, delimiter: u8, id: &str, file: &str) -> Result<Dataset> {
    let mut rdr = csv_reader(reader, delimiter);
    let headers = read_headers(&mut rdr)?;
    let geo_idx = column_index(&headers, GEO_POINT_COLUMN)?;

    let mut facilities = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let Some(point) = record_point(&record, geo_idx)? else {
            continue;
        };

        let fields: HashMap<String, String> = headers
            .iter()
            .zip(record.iter())
            .map(|(h, v)| (h.clone(), v.to_string()))
            .collect();

        facilities.push(Facility { point, fields });
    }

    Ok(Dataset {
        id: id.to_string(),
        file: file.to_string(),
        headers,
        facilities,
    })
}

/// Columns named by the dataset config but absent from its CSV. Rendering
/// still shows `N/D` for them; this only reports the mismatch and logs nothing.
pub fn check_schema(config: &DatasetConfig, dataset: &Dataset) -> Vec<String> {
    let mut wanted: Vec<&str> = config.popup.iter().map(String::as_str).collect();
    wanted.push(&config.tooltip);
    if let Some(name) = &config.name_column {
        wanted.push(name);
    }

    let mut missing: Vec<String> = Vec::new();
    for column in wanted {
        if !dataset.has_column(column) && !missing.iter().any(|m| m == column) {
            missing.push(column.to_string());
        }
    }
    missing
}

pub(crate) fn csv_reader<R: Read>(reader: R, delimiter: u8) -> csv::Reader<R> {
    ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(reader)
}

pub(crate) fn read_headers<R: Read>(rdr: &mut csv::Reader<R>) -> Result<Vec<String>> {
    let headers = rdr.headers().context("Failed to read CSV header")?;
    Ok(headers
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').to_string())
        .collect())
}

pub(crate) fn column_index(headers: &[String], column: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == column)
        .ok_or_else(|| anyhow!("Column '{}' not found in CSV", column))
}

/// The record's coordinate, `None` for rows to skip.
pub(crate) fn record_point(record: &StringRecord, geo_idx: usize) -> Result<Option<Point<f64>>> {
    let raw = record.get(geo_idx).unwrap_or("");
    parse_geo_point(raw).with_context(|| {
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        format!("Bad {} on line {}", GEO_POINT_COLUMN, line)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const HOSPITALS: &str = "\
Nombre;Tipo;Camas;geo_point_2d
Hospital La Fe;General;1000;39.4445,-0.3756
Sin coordenadas;General;10;
Hospital Clínico;General;580;39.4779, -0.3617
Texto suelto;Otro;0;sin coma
";

    #[test]
    fn parse_geo_point_cases() {
        assert_eq!(
            parse_geo_point("39.47,-0.38").unwrap(),
            Some(Point::new(-0.38, 39.47))
        );
        assert_eq!(
            parse_geo_point(" 39.47 , -0.38 ").unwrap(),
            Some(Point::new(-0.38, 39.47))
        );
        assert_eq!(parse_geo_point("").unwrap(), None);
        assert_eq!(parse_geo_point("   ").unwrap(), None);
        assert_eq!(parse_geo_point("39.47 -0.38").unwrap(), None);
    }

    #[test]
    fn parse_geo_point_rejects_comma_garbage() {
        let err = parse_geo_point("abc,def").unwrap_err();
        assert_eq!(err.raw, "abc,def");
        assert!(parse_geo_point("39.47,").is_err());
        assert!(parse_geo_point("1,2,3").is_err());
    }

    #[test]
    fn read_dataset_keeps_only_rows_with_coordinates() {
        let dataset = read_dataset(HOSPITALS.as_bytes(), b';', "hospitales", "hospitales.csv").unwrap();

        assert_eq!(dataset.headers, vec!["Nombre", "Tipo", "Camas", "geo_point_2d"]);
        assert_eq!(dataset.column_count(), 6);
        assert_eq!(dataset.facilities.len(), 2);

        let first = &dataset.facilities[0];
        assert_eq!(first.field("Nombre"), Some("Hospital La Fe"));
        assert!((first.lat() - 39.4445).abs() < 1e-9);
        assert!((first.lon() + 0.3756).abs() < 1e-9);
        assert_eq!(dataset.facilities[1].field("Camas"), Some("580"));
    }

    #[test]
    fn read_dataset_propagates_malformed_coordinates() {
        let csv = "Nombre;geo_point_2d\nA;39.47,-0.38\nB;north,west\n";
        let err = read_dataset(csv.as_bytes(), b';', "x", "x.csv").unwrap_err();
        let coordinate = err.downcast_ref::<CoordinateError>().unwrap();
        assert_eq!(coordinate.raw, "north,west");
        assert!(format!("{:#}", err).contains("line 3"));
    }

    #[test]
    fn read_dataset_requires_geo_column() {
        let csv = "Nombre;Tipo\nA;B\n";
        assert!(read_dataset(csv.as_bytes(), b';', "x", "x.csv").is_err());
    }

    #[test]
    fn quoted_coordinates_and_bom() {
        let csv = "\u{feff}equipamien;geo_point_2d\n\"Centro\";\"39.46,-0.37\"\n";
        let dataset = read_dataset(csv.as_bytes(), b';', "dona", "dona.csv").unwrap();
        assert_eq!(dataset.headers[0], "equipamien");
        assert_eq!(dataset.facilities.len(), 1);
    }

    #[test]
    fn check_schema_reports_missing_columns() {
        let dataset = read_dataset(HOSPITALS.as_bytes(), b';', "hospitales", "hospitales.csv").unwrap();
        let config = DatasetConfig {
            id: "hospitales".to_string(),
            file: "hospitales.csv".to_string(),
            label: "Hospitales".to_string(),
            title: None,
            description: None,
            popup: vec!["Nombre".to_string(), "Direccion".to_string()],
            tooltip: "Nombre".to_string(),
            name_column: None,
        };
        assert_eq!(check_schema(&config, &dataset), vec!["Direccion".to_string()]);
    }

    #[test]
    fn load_dataset_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(HOSPITALS.as_bytes()).unwrap();
        let dataset = load_dataset(file.path(), b';', "hospitales", "hospitales.csv").unwrap();
        assert_eq!(dataset.facilities.len(), 2);

        let missing = load_dataset(Path::new("/no/such/file.csv"), b';', "x", "x.csv");
        assert!(missing.is_err());
    }
}
