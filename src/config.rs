use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{Context, Result};
use thiserror::Error;

pub const FALLBACK_TITLE: &str = "📍 Mapa Interactivo";
pub const FALLBACK_DESCRIPTION: &str = "Mapa de datos geográficos";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub map: MapConfig,
    pub server: ServerConfig,
    pub datasets: Vec<DatasetConfig>,
    pub vulnerability: VulnerabilityConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub data_dir: PathBuf,
    #[serde(default = "default_delimiter")]
    pub delimiter: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapConfig {
    pub tile_url: String,
    pub attribution: String,
    pub zoom_start: u8,
    pub vulnerability_zoom: u8,
    pub default_center: [f64; 2], // [lat, lon], used when a dataset has no points
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            tile_url: "https://{s}.tile.openstreetmap.org/{z}/{x}/{y}.png".to_string(),
            attribution: "&copy; OpenStreetMap contributors".to_string(),
            zoom_start: 13,
            vulnerability_zoom: 12,
            default_center: [39.4699, -0.3763],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    pub port: u16,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

/// One selectable service map. `popup` lists the CSV columns shown in each
/// marker popup and in the data table.
#[derive(Debug, Deserialize, Clone)]
pub struct DatasetConfig {
    pub id: String,
    pub file: String,
    pub label: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub popup: Vec<String>,
    pub tooltip: String,
    pub name_column: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VulnerabilityConfig {
    pub file: String,
    #[serde(default = "default_download_name")]
    pub download_name: String,
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("delimiter must be a single ASCII character, got {0:?}")]
    BadDelimiter(String),
    #[error("no datasets configured")]
    NoDatasets,
    #[error("dataset id must not be empty")]
    EmptyId,
    #[error("duplicate dataset id '{0}'")]
    DuplicateId(String),
    #[error("duplicate dataset file '{0}'")]
    DuplicateFile(String),
    #[error("dataset '{0}' has no popup columns")]
    EmptyPopup(String),
    #[error("dataset '{0}' has no tooltip column")]
    EmptyTooltip(String),
}

fn default_delimiter() -> String {
    ";".to_string()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_static_dir() -> PathBuf {
    PathBuf::from("static")
}

fn default_download_name() -> String {
    "vulnerabilidad_barrios.csv".to_string()
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.delimiter_byte()?;
        if self.datasets.is_empty() {
            return Err(ConfigError::NoDatasets);
        }

        let mut ids = HashSet::new();
        let mut files = HashSet::new();
        for dataset in &self.datasets {
            if dataset.id.trim().is_empty() {
                return Err(ConfigError::EmptyId);
            }
            if !ids.insert(dataset.id.as_str()) {
                return Err(ConfigError::DuplicateId(dataset.id.clone()));
            }
            if !files.insert(dataset.file.as_str()) {
                return Err(ConfigError::DuplicateFile(dataset.file.clone()));
            }
            if dataset.popup.is_empty() {
                return Err(ConfigError::EmptyPopup(dataset.id.clone()));
            }
            if dataset.tooltip.trim().is_empty() {
                return Err(ConfigError::EmptyTooltip(dataset.id.clone()));
            }
        }
        Ok(())
    }

    pub fn delimiter_byte(&self) -> Result<u8, ConfigError> {
        match self.input.delimiter.as_bytes() {
            [b] if b.is_ascii() => Ok(*b),
            _ => Err(ConfigError::BadDelimiter(self.input.delimiter.clone())),
        }
    }

    pub fn dataset(&self, id: &str) -> Option<&DatasetConfig> {
        self.datasets.iter().find(|d| d.id == id)
    }

    pub fn default_dataset(&self) -> &DatasetConfig {
        // validate() guarantees at least one entry
        &self.datasets[0]
    }

    pub fn dataset_path(&self, file: &str) -> PathBuf {
        self.input.data_dir.join(file)
    }

    /// Title and description for a dataset file, with a generic pair for
    /// files that are not configured or carry no title.
    pub fn describe(&self, file: &str) -> (&str, &str) {
        let entry = self.datasets.iter().find(|d| d.file == file);
        let title = entry
            .and_then(|d| d.title.as_deref())
            .unwrap_or(FALLBACK_TITLE);
        let description = entry
            .and_then(|d| d.description.as_deref())
            .unwrap_or(FALLBACK_DESCRIPTION);
        (title, description)
    }
}

impl DatasetConfig {
    /// Column used to name a facility in the nearest-facility banner.
    pub fn resolve_name_column<'a>(&'a self, headers: &[String]) -> &'a str {
        if let Some(col) = &self.name_column {
            return col;
        }
        if headers.iter().any(|h| h == "Nombre") {
            "Nombre"
        } else {
            &self.tooltip
        }
    }
}
