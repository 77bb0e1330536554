use crate::config::AppConfig;
use crate::data::Catalog;
use crate::nearest::{self, ClickParams, ClickState};
use crate::render::{self, VulnerabilityView};
use crate::types::Neighborhood;
use crate::vulnerability;
use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use geo::algorithm::bounding_rect::BoundingRect;
use geo::algorithm::contains::Contains;
use geo::Point;
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tracing::{error, info};

// Wrapper for RTree indexing of neighborhood polygons
pub struct AreaIndex {
    index: usize,
    aabb: AABB<[f64; 2]>,
}

impl RTreeObject for AreaIndex {
    type Envelope = AABB<[f64; 2]>;
    fn envelope(&self) -> Self::Envelope {
        self.aabb
    }
}

pub struct AppState {
    pub config: AppConfig,
    pub catalog: Catalog,
    pub tree: RTree<AreaIndex>,
}

impl AppState {
    pub fn new(config: AppConfig, catalog: Catalog) -> Self {
        let tree = build_area_index(&catalog.neighborhoods);
        Self { config, catalog, tree }
    }

    /// Neighborhood whose polygon contains the point.
    pub fn area_at(&self, point: Point<f64>) -> Option<&Neighborhood> {
        let envelope = AABB::from_point([point.x(), point.y()]);
        self.tree
            .locate_in_envelope_intersecting(&envelope)
            .filter_map(|candidate| self.catalog.neighborhoods.get(candidate.index))
            .find(|n| n.geometry.as_ref().is_some_and(|g| g.contains(&point)))
    }
}

fn build_area_index(neighborhoods: &[Neighborhood]) -> RTree<AreaIndex> {
    let items: Vec<AreaIndex> = neighborhoods
        .iter()
        .enumerate()
        .filter_map(|(i, n)| {
            let rect = n.geometry.as_ref()?.bounding_rect()?;
            Some(AreaIndex {
                index: i,
                aabb: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            })
        })
        .collect();
    info!(areas = items.len(), "Built neighborhood index");
    RTree::bulk_load(items)
}

#[derive(Serialize)]
pub struct DatasetSummary {
    id: String,
    label: String,
    file: String,
    title: String,
    records: usize,
}

#[derive(Serialize)]
pub struct NearestResponse {
    name: String,
    latitude: f64,
    longitude: f64,
    distance_m: f64,
}

#[derive(Serialize)]
pub struct AreaResponse {
    name: String,
    district: String,
    level: String,
    color: &'static str,
}

pub fn router(state: Arc<AppState>) -> Router {
    let static_files = ServeDir::new(&state.config.server.static_dir);

    Router::new()
        .route("/", get(|| async { Redirect::to("/services") }))
        .route("/services", get(services_handler))
        .route("/vulnerability", get(vulnerability_handler))
        .route("/vulnerability/download.csv", get(download_handler))
        .route("/api/datasets", get(datasets_handler))
        .route("/api/nearest", get(nearest_handler))
        .route("/api/area", get(area_handler))
        .nest_service("/static", static_files)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(config: AppConfig, catalog: Catalog) -> Result<()> {
    let host: std::net::IpAddr = config.server.host.parse()?;
    let addr = SocketAddr::from((host, config.server.port));

    let state = Arc::new(AppState::new(config, catalog));
    let app = router(state);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn coord(query: &HashMap<String, String>, key: &str) -> Option<f64> {
    query.get(key).and_then(|val| val.trim().parse::<f64>().ok())
}

fn click_params(query: &HashMap<String, String>) -> ClickParams {
    ClickParams {
        lat: coord(query, "lat"),
        lng: coord(query, "lng"),
    }
}

fn page(result: Result<String>) -> Response {
    match result {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Failed to render page: {:#}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Error al generar la página").into_response()
        }
    }
}

async fn services_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let dataset_id = query
        .get("dataset")
        .map(String::as_str)
        .unwrap_or(state.config.default_dataset().id.as_str());

    let (Some(dataset_config), Some(dataset)) = (
        state.config.dataset(dataset_id),
        state.catalog.dataset(dataset_id),
    ) else {
        let message = format!("El conjunto de datos '{}' no existe.", dataset_id);
        return (StatusCode::NOT_FOUND, Html(render::not_found_page(&message))).into_response();
    };

    let click = ClickState::from_params(&click_params(&query));
    page(render::services_page(&state.config, dataset_config, dataset, click))
}

async fn vulnerability_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let view = match query.get("view").map(String::as_str) {
        Some("charts") => VulnerabilityView::Charts,
        Some("table") => VulnerabilityView::Table,
        _ => VulnerabilityView::Map,
    };
    let click = ClickState::from_params(&click_params(&query));
    page(render::vulnerability_page(&state.config, &state.catalog.neighborhoods, view, click))
}

async fn download_handler(State(state): State<Arc<AppState>>) -> Response {
    match vulnerability::to_csv(&state.catalog.neighborhoods) {
        Ok(body) => {
            let disposition = format!(
                "attachment; filename=\"{}\"",
                state.config.vulnerability.download_name
            );
            (
                [
                    (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                body,
            )
                .into_response()
        }
        Err(e) => {
            error!("Failed to build CSV download: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn datasets_handler(State(state): State<Arc<AppState>>) -> Json<Vec<DatasetSummary>> {
    let summaries = state
        .config
        .datasets
        .iter()
        .map(|d| DatasetSummary {
            id: d.id.clone(),
            label: d.label.clone(),
            file: d.file.clone(),
            title: state.config.describe(&d.file).0.to_string(),
            records: state.catalog.dataset(&d.id).map_or(0, |ds| ds.facilities.len()),
        })
        .collect();
    Json(summaries)
}

async fn nearest_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let Some(dataset_id) = query.get("dataset") else {
        return (StatusCode::BAD_REQUEST, "missing 'dataset'").into_response();
    };
    let ClickState::Pending(point) = ClickState::from_params(&click_params(&query)) else {
        return (StatusCode::BAD_REQUEST, "missing or invalid 'lat'/'lng'").into_response();
    };
    let (Some(dataset_config), Some(dataset)) = (
        state.config.dataset(dataset_id),
        state.catalog.dataset(dataset_id),
    ) else {
        return StatusCode::NOT_FOUND.into_response();
    };

    let response = nearest::nearest(point, &dataset.facilities).map(|found| {
        let facility = &dataset.facilities[found.index];
        NearestResponse {
            name: render::facility_name(dataset_config, dataset, facility),
            latitude: facility.lat(),
            longitude: facility.lon(),
            distance_m: found.distance_m,
        }
    });
    Json(response).into_response()
}

async fn area_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let (Some(lat), Some(lon)) = (coord(&query, "lat"), coord(&query, "lon")) else {
        return (StatusCode::BAD_REQUEST, "missing or invalid 'lat'/'lon'").into_response();
    };

    let response = state.area_at(Point::new(lon, lat)).map(|n| AreaResponse {
        name: n.name.clone(),
        district: n.district.clone(),
        level: n.levels.global.clone(),
        color: vulnerability::level_color(&n.levels.global).as_str(),
    });
    Json(response).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulnerability::read_neighborhoods;

    fn state_with_square() -> AppState {
        let shape = r#"{"type": "Polygon", "coordinates": [[[-0.38, 39.47], [-0.37, 39.47], [-0.37, 39.48], [-0.38, 39.48], [-0.38, 39.47]]]}"#
            .replace('"', "\"\"");
        let csv = format!(
            "Name;District;Ind_Equip;Vul_Equip;Ind_Dem;Vul_Dem;Ind_Econom;Vul_Econom;Ind_Global;Vul_Global;geo_point_2d;Geo Shape\n\
             RUSSAFA;L'EIXAMPLE;1;Vulnerabilidad Baja;1;Vulnerabilidad Baja;1;Vulnerabilidad Baja;1;Vulnerabilidad Media;39.475,-0.375;\"{shape}\"\n"
        );
        let neighborhoods = read_neighborhoods(csv.as_bytes(), b';').unwrap();
        let config = AppConfig::from_toml(
            r#"
[input]
data_dir = "."
[server]
port = 0
[vulnerability]
file = "v.csv"
[[datasets]]
id = "a"
file = "a.csv"
label = "A"
popup = ["Nombre"]
tooltip = "Nombre"
"#,
        )
        .unwrap();
        AppState::new(config, Catalog { datasets: vec![], neighborhoods })
    }

    #[test]
    fn area_lookup_uses_polygon_containment() {
        let state = state_with_square();
        let inside = state.area_at(Point::new(-0.375, 39.475)).unwrap();
        assert_eq!(inside.name, "RUSSAFA");
        assert!(state.area_at(Point::new(-0.36, 39.475)).is_none());
    }

    #[test]
    fn lenient_coordinate_params() {
        let mut query = HashMap::new();
        query.insert("lat".to_string(), " 39.47 ".to_string());
        query.insert("lng".to_string(), "oops".to_string());
        let params = click_params(&query);
        assert_eq!(params.lat, Some(39.47));
        assert_eq!(params.lng, None);
        assert_eq!(ClickState::from_params(&params), ClickState::NoClick);
    }
}
