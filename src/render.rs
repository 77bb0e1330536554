use crate::charts;
use crate::config::{AppConfig, DatasetConfig};
use crate::nearest::{self, ClickState};
use crate::types::{mean_center, Dataset, Facility, Neighborhood, DERIVED_COLUMNS};
use crate::vulnerability::{self, INDEX_COLUMNS, LEVEL_COLUMNS, TABLE_COLUMNS};
use anyhow::Result;
use geo::Point;
use serde::Serialize;
use serde_json::json;
use std::fmt::Write;

pub const MISSING_VALUE: &str = "N/D";
const POPUP_MAX_WIDTH: u32 = 300;

const LEAFLET_HEAD: &str = r#"<link rel="stylesheet" href="https://unpkg.com/leaflet@1.9.4/dist/leaflet.css"/>
<link rel="stylesheet" href="https://unpkg.com/leaflet.markercluster@1.5.3/dist/MarkerCluster.css"/>
<link rel="stylesheet" href="https://unpkg.com/leaflet.markercluster@1.5.3/dist/MarkerCluster.Default.css"/>
<link rel="stylesheet" href="https://cdnjs.cloudflare.com/ajax/libs/Leaflet.awesome-markers/2.0.2/leaflet.awesome-markers.css"/>
<link rel="stylesheet" href="https://maxcdn.bootstrapcdn.com/bootstrap/3.2.0/css/bootstrap-glyphicons.css"/>
<script src="https://unpkg.com/leaflet@1.9.4/dist/leaflet.js"></script>
<script src="https://unpkg.com/leaflet.markercluster@1.5.3/dist/leaflet.markercluster.js"></script>
<script src="https://cdnjs.cloudflare.com/ajax/libs/Leaflet.awesome-markers/2.0.2/leaflet.awesome-markers.js"></script>"#;

/// Escapes text for HTML element content and attribute values.
pub fn escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

/// JSON safe to place inside a `<script>` element.
fn script_json<T: Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VulnerabilityView {
    Map,
    Charts,
    Table,
}

#[derive(Serialize)]
struct MarkerData {
    lat: f64,
    lon: f64,
    popup: String,
    tooltip: String,
}

#[derive(Serialize)]
struct OverlayData {
    click: [f64; 2],
    nearest: [f64; 2],
    popup: String,
}

#[derive(Serialize)]
struct ServicesMapData<'a> {
    center: [f64; 2],
    zoom: u8,
    tiles: &'a str,
    attribution: &'a str,
    popup_max_width: u32,
    markers: Vec<MarkerData>,
    overlay: Option<OverlayData>,
}

/// `lat=..&lng=..` for a pending click, so links and forms keep it.
pub fn click_query(click: ClickState) -> Option<String> {
    match click {
        ClickState::Pending(p) => Some(format!("lat={}&lng={}", p.y(), p.x())),
        ClickState::NoClick => None,
    }
}

fn href(path: &str, params: &[Option<String>]) -> String {
    let query: Vec<&str> = params.iter().flatten().map(String::as_str).collect();
    if query.is_empty() {
        path.to_string()
    } else {
        format!("{}?{}", path, query.join("&"))
    }
}

/// Result of a click: where it happened and which facility is closest.
#[derive(Debug, Clone, PartialEq)]
pub struct NearestOverlay {
    pub click: Point<f64>,
    pub facility: Point<f64>,
    pub name: String,
    pub distance_m: f64,
}

impl NearestOverlay {
    pub fn label(&self) -> String {
        format!("{} ({} m)", self.name, nearest::format_meters(self.distance_m))
    }

    pub fn banner(&self) -> String {
        format!(
            "Centro más cercano: {} – {} m",
            self.name,
            nearest::format_meters(self.distance_m)
        )
    }
}

pub fn popup_html(config: &DatasetConfig, facility: &Facility) -> String {
    config
        .popup
        .iter()
        .map(|col| {
            let value = facility
                .field(col)
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(MISSING_VALUE);
            format!("<strong>{}:</strong> {}", escape(col), escape(value))
        })
        .collect::<Vec<_>>()
        .join("<br>")
}

pub fn tooltip_text<'a>(config: &DatasetConfig, facility: &'a Facility) -> &'a str {
    facility.field(&config.tooltip).unwrap_or("")
}

pub fn facility_name(config: &DatasetConfig, dataset: &Dataset, facility: &Facility) -> String {
    let column = config.resolve_name_column(&dataset.headers);
    facility
        .field(column)
        .filter(|v| !v.trim().is_empty())
        .unwrap_or(MISSING_VALUE)
        .to_string()
}

pub fn nearest_overlay(
    config: &DatasetConfig,
    dataset: &Dataset,
    click: ClickState,
) -> Option<NearestOverlay> {
    let ClickState::Pending(point) = click else {
        return None;
    };
    let found = nearest::nearest(point, &dataset.facilities)?;
    let facility = &dataset.facilities[found.index];
    Some(NearestOverlay {
        click: point,
        facility: facility.point,
        name: facility_name(config, dataset, facility),
        distance_m: found.distance_m,
    })
}

/// Columns of the expandable data table: configured popup columns that the
/// CSV actually has, then the derived coordinates.
pub fn table_columns(config: &DatasetConfig, dataset: &Dataset) -> Vec<String> {
    let mut columns: Vec<String> = config
        .popup
        .iter()
        .filter(|c| dataset.has_column(c))
        .cloned()
        .collect();
    columns.extend(DERIVED_COLUMNS.iter().map(|c| c.to_string()));
    columns
}

fn center_or_default(config: &AppConfig, center: Option<Point<f64>>) -> [f64; 2] {
    match center {
        Some(p) => [p.y(), p.x()],
        None => config.map.default_center,
    }
}

pub fn services_page(
    config: &AppConfig,
    dataset_config: &DatasetConfig,
    dataset: &Dataset,
    click: ClickState,
) -> Result<String> {
    let (title, description) = config.describe(&dataset.file);
    let overlay = nearest_overlay(dataset_config, dataset, click);

    let markers = dataset
        .facilities
        .iter()
        .map(|f| MarkerData {
            lat: f.lat(),
            lon: f.lon(),
            popup: popup_html(dataset_config, f),
            tooltip: escape(tooltip_text(dataset_config, f)),
        })
        .collect();

    let map_data = ServicesMapData {
        center: center_or_default(config, dataset.center()),
        zoom: config.map.zoom_start,
        tiles: &config.map.tile_url,
        attribution: &config.map.attribution,
        popup_max_width: POPUP_MAX_WIDTH,
        markers,
        overlay: overlay.as_ref().map(|o| OverlayData {
            click: [o.click.y(), o.click.x()],
            nearest: [o.facility.y(), o.facility.x()],
            popup: escape(&o.label()),
        }),
    };

    let mut body = String::new();
    body.push_str(&dataset_selector(config, &dataset_config.id, click));
    write!(body, "<h2>{}</h2>\n<p>{}</p>\n", escape(title), escape(description))?;
    write!(
        body,
        r#"<div class="metrics">
  <div class="metric"><div class="metric-label">📍 Total de puntos</div><div class="metric-value">{}</div></div>
  <div class="metric"><div class="metric-label">📌 Columnas</div><div class="metric-value">{}</div></div>
  <div class="metric"><div class="metric-label">🗂️ Archivo</div><div class="metric-value">{}</div></div>
</div>
"#,
        dataset.facilities.len(),
        dataset.column_count(),
        escape(&dataset.file)
    )?;

    if let Some(o) = &overlay {
        write!(body, "<div class=\"success\">{}</div>\n", escape(&o.banner()))?;
    }

    write!(
        body,
        r#"<h3>🌍 Vista del mapa</h3>
<div id="map" class="map"></div>
<script>
const DATA = {data};
const map = L.map('map').setView(DATA.center, DATA.zoom);
L.tileLayer(DATA.tiles, {{ attribution: DATA.attribution, maxZoom: 19 }}).addTo(map);
const cluster = L.markerClusterGroup();
const icon = (color, name) => L.AwesomeMarkers.icon({{ icon: name, markerColor: color, prefix: 'glyphicon' }});
DATA.markers.forEach(m => {{
  const marker = L.marker([m.lat, m.lon], {{ icon: icon('cadetblue', 'info-sign') }});
  marker.bindPopup(m.popup, {{ maxWidth: DATA.popup_max_width }});
  if (m.tooltip) marker.bindTooltip(m.tooltip);
  cluster.addLayer(marker);
}});
map.addLayer(cluster);
if (DATA.overlay) {{
  L.marker(DATA.overlay.click, {{ icon: icon('blue', 'screenshot') }}).bindPopup('Aquí has pinchado').addTo(map);
  L.marker(DATA.overlay.nearest, {{ icon: icon('green', 'info-sign') }}).bindPopup(DATA.overlay.popup).addTo(map);
}}
map.on('click', e => {{
  const url = new URL(window.location.href);
  url.searchParams.set('dataset', {dataset_id});
  url.searchParams.set('lat', e.latlng.lat.toFixed(6));
  url.searchParams.set('lng', e.latlng.lng.toFixed(6));
  window.location.assign(url.toString());
}});
</script>
"#,
        data = script_json(&map_data)?,
        dataset_id = script_json(&dataset_config.id)?,
    )?;

    body.push_str(&facility_table(dataset_config, dataset));

    Ok(layout(title, Section::Services, &body, LEAFLET_HEAD, click))
}

fn dataset_selector(config: &AppConfig, selected: &str, click: ClickState) -> String {
    let options: String = config
        .datasets
        .iter()
        .map(|d| {
            format!(
                r#"<option value="{}"{}>{}</option>"#,
                escape(&d.id),
                if d.id == selected { " selected" } else { "" },
                escape(&d.label)
            )
        })
        .collect();
    // the nearest facility is recomputed against the newly selected dataset
    let hidden = match click {
        ClickState::Pending(p) => format!(
            "\n<input type=\"hidden\" name=\"lat\" value=\"{}\"/>\n<input type=\"hidden\" name=\"lng\" value=\"{}\"/>",
            p.y(),
            p.x()
        ),
        ClickState::NoClick => String::new(),
    };
    format!(
        r#"<form class="selector" method="get" action="/services">
<label for="dataset">Selecciona el tipo de mapa:</label>
<select id="dataset" name="dataset" onchange="this.form.submit()">{}</select>{}
</form>
"#,
        options, hidden
    )
}

fn facility_table(config: &DatasetConfig, dataset: &Dataset) -> String {
    let columns = table_columns(config, dataset);
    let mut rows = String::new();
    for f in &dataset.facilities {
        rows.push_str("<tr>");
        for col in &columns {
            let cell = match col.as_str() {
                "LATITUD" => f.lat().to_string(),
                "LONGITUD" => f.lon().to_string(),
                other => f.field(other).unwrap_or("").to_string(),
            };
            rows.push_str(&format!("<td>{}</td>", escape(&cell)));
        }
        rows.push_str("</tr>\n");
    }
    format!(
        "<details class=\"data-table\">\n<summary>📊 Ver tabla de datos</summary>\n{}\n</details>\n",
        html_table(&columns.iter().map(String::as_str).collect::<Vec<_>>(), &rows)
    )
}

fn html_table(headers: &[&str], rows: &str) -> String {
    let head: String = headers
        .iter()
        .map(|h| format!("<th>{}</th>", escape(h)))
        .collect();
    format!("<table>\n<thead><tr>{}</tr></thead>\n<tbody>\n{}</tbody>\n</table>", head, rows)
}

pub fn vulnerability_page(
    config: &AppConfig,
    neighborhoods: &[Neighborhood],
    view: VulnerabilityView,
    click: ClickState,
) -> Result<String> {
    let mut body = String::new();
    body.push_str("<h1>📊 Vulnerabilidad por Barrios</h1>\n");
    body.push_str("<p>Análisis geográfico y estadístico de vulnerabilidad en los barrios de la ciudad.</p>\n");
    body.push_str(&vulnerability_tabs(view, click));

    let head = match view {
        VulnerabilityView::Map => {
            body.push_str(&vulnerability_map(config, neighborhoods)?);
            LEAFLET_HEAD
        }
        VulnerabilityView::Charts => {
            body.push_str(&vulnerability_charts(neighborhoods));
            ""
        }
        VulnerabilityView::Table => {
            body.push_str(&vulnerability_table(neighborhoods));
            ""
        }
    };

    Ok(layout("📊 Vulnerabilidad por Barrios", Section::Vulnerability, &body, head, click))
}

fn vulnerability_tabs(view: VulnerabilityView, click: ClickState) -> String {
    let tabs = [
        (VulnerabilityView::Map, "map", "Mapa interactivo"),
        (VulnerabilityView::Charts, "charts", "Gráficos"),
        (VulnerabilityView::Table, "table", "Tabla de datos"),
    ];
    let links: String = tabs
        .iter()
        .map(|(v, key, label)| {
            let class = if *v == view { " class=\"active\"" } else { "" };
            let target = href("/vulnerability", &[Some(format!("view={}", key)), click_query(click)]);
            format!(r#"<a href="{}"{}>{}</a>"#, escape(&target), class, label)
        })
        .collect();
    format!("<nav class=\"tabs\">{}</nav>\n", links)
}

fn vulnerability_map(config: &AppConfig, neighborhoods: &[Neighborhood]) -> Result<String> {
    let mut collection = vulnerability::feature_collection(neighborhoods);
    for feature in &mut collection.features {
        if let Some(props) = feature.properties.as_mut() {
            let tooltip: String = ["Barrio", "Distrito", "Índice Global", "Vulnerabilidad"]
                .iter()
                .map(|field| {
                    let value = props.get(*field).and_then(|v| v.as_str()).unwrap_or("");
                    format!("<tr><th>{}</th><td>{}</td></tr>", escape(field), escape(value))
                })
                .collect();
            props.insert("tooltip".to_string(), json!(format!("<table>{}</table>", tooltip)));
        }
    }

    let center = mean_center(neighborhoods.iter().map(|n| n.point));
    let data = json!({
        "center": center_or_default(config, center),
        "zoom": config.map.vulnerability_zoom,
        "tiles": config.map.tile_url,
        "attribution": config.map.attribution,
        "areas": collection,
    });

    Ok(format!(
        r#"<h3>🌍 Mapa por nivel de vulnerabilidad global</h3>
<div id="map" class="map"></div>
<script>
const DATA = {};
const map = L.map('map').setView(DATA.center, DATA.zoom);
L.tileLayer(DATA.tiles, {{ attribution: DATA.attribution, maxZoom: 19 }}).addTo(map);
L.geoJSON(DATA.areas, {{
  style: f => ({{ fillColor: f.properties.color, color: 'black', weight: 1, fillOpacity: 0.5 }}),
  onEachFeature: (f, layer) => layer.bindTooltip(f.properties.tooltip, {{ sticky: true }})
}}).addTo(map);
</script>
"#,
        script_json(&data)?
    ))
}

fn vulnerability_charts(neighborhoods: &[Neighborhood]) -> String {
    let mut out = String::from("<h3>📊 Distribución por tipos de vulnerabilidad</h3>\n<div class=\"chart-grid\">\n");
    for column in LEVEL_COLUMNS {
        let values = vulnerability::level_values(neighborhoods, column).unwrap_or_default();
        let counts = charts::value_counts(&values);
        out.push_str(&charts::bar_chart_svg(
            &charts::level_chart_title(column),
            "Nº de barrios",
            &counts,
        ));
        out.push('\n');
    }
    out.push_str("</div>\n<h3>📈 Indicadores numéricos de vulnerabilidad</h3>\n<div class=\"chart-grid\">\n");
    for column in INDEX_COLUMNS {
        let values = vulnerability::index_values(neighborhoods, column).unwrap_or_default();
        let stats = charts::box_stats(&values);
        out.push_str(&charts::box_plot_svg(&charts::index_chart_title(column), stats.as_ref()));
        out.push('\n');
    }
    out.push_str("</div>\n");
    out
}

fn vulnerability_table(neighborhoods: &[Neighborhood]) -> String {
    let mut rows = String::new();
    for n in neighborhoods {
        rows.push_str("<tr>");
        for cell in vulnerability::table_row(n) {
            rows.push_str(&format!("<td>{}</td>", escape(&cell)));
        }
        rows.push_str("</tr>\n");
    }
    format!(
        "<h3>🧾 Tabla de indicadores por barrio</h3>\n{}\n<p><a class=\"download\" href=\"/vulnerability/download.csv\">📥 Descargar datos como CSV</a></p>\n",
        html_table(&TABLE_COLUMNS, &rows)
    )
}

pub fn not_found_page(message: &str) -> String {
    let body = format!("<h2>No encontrado</h2>\n<p>{}</p>\n<p><a href=\"/services\">Volver</a></p>\n", escape(message));
    layout("No encontrado", Section::Services, &body, "", ClickState::NoClick)
}

#[derive(Clone, Copy, PartialEq)]
enum Section {
    Services,
    Vulnerability,
}

fn layout(title: &str, section: Section, body: &str, head: &str, click: ClickState) -> String {
    let link = |target: Section, path: &str, label: &str| {
        let class = if target == section { " class=\"active\"" } else { "" };
        let target_href = href(path, &[click_query(click)]);
        format!(r#"<a href="{}"{}>{}</a>"#, escape(&target_href), class, label)
    };
    format!(
        r#"<!DOCTYPE html>
<html lang="es">
<head>
<meta charset="UTF-8"/>
<meta name="viewport" content="width=device-width, initial-scale=1.0"/>
<title>{title} · Mapa Interactivo</title>
<link rel="stylesheet" href="/static/app.css"/>
{head}
</head>
<body>
<aside class="sidebar">
<p>Selecciona una sección</p>
{services}
{vulnerability}
</aside>
<main class="content">
{body}
</main>
</body>
</html>
"#,
        title = escape(title),
        head = head,
        services = link(Section::Services, "/services", "🗺️ Mapas de servicios"),
        vulnerability = link(Section::Vulnerability, "/vulnerability", "📊 Vulnerabilidad por barrios"),
        body = body,
    )
}
