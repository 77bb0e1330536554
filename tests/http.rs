use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use servimap::config::AppConfig;
use servimap::data;
use servimap::server::{router, AppState};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

const HOSPITALS: &str = "\
Nombre;Tipo;Camas;Financiaci;Direccion;geo_point_2d
Hospital Uno;General;100;Pública;Calle A 1;39.47,-0.38
Hospital Dos;Privado;50;Privada;Calle B 2;39.48,-0.37
Sin ubicación;General;10;Pública;Calle C 3;
";

const WOMEN: &str = "\
equipamien;identifica;telefono;geo_point_2d
Centro Mujer;CM-1;963000000;39.46,-0.36
";

fn vulnerability_csv() -> String {
    let shape = r#"{"type": "Polygon", "coordinates": [[[-0.38, 39.47], [-0.37, 39.47], [-0.37, 39.48], [-0.38, 39.48], [-0.38, 39.47]]]}"#
        .replace('"', "\"\"");
    format!(
        "Name;District;Ind_Equip;Vul_Equip;Ind_Dem;Vul_Dem;Ind_Econom;Vul_Econom;Ind_Global;Vul_Global;geo_point_2d;Geo Shape\n\
         RUSSAFA;L'EIXAMPLE;0.5;Vulnerabilidad Baja;1;Vulnerabilidad Media;0.25;Vulnerabilidad Alta;2;Vulnerabilidad Alta;39.475,-0.375;\"{shape}\"\n\
         NAZARET;POBLATS MARITIMS;0.7;Vulnerabilidad Alta;0.9;Vulnerabilidad Alta;0.8;Vulnerabilidad Alta;0.9;Vulnerabilidad Media;39.45,-0.33;\n"
    )
}

fn write_fixture(dir: &Path, hospitals: &str) -> AppConfig {
    let csv_dir = dir.join("csv");
    let static_dir = dir.join("static");
    fs::create_dir_all(&csv_dir).unwrap();
    fs::create_dir_all(&static_dir).unwrap();
    fs::write(csv_dir.join("hospitales.csv"), hospitals).unwrap();
    fs::write(csv_dir.join("dona.csv"), WOMEN).unwrap();
    fs::write(csv_dir.join("vulnerabilidad-por-barrios.csv"), vulnerability_csv()).unwrap();
    fs::write(static_dir.join("app.css"), "body { margin: 0; }").unwrap();

    let toml = format!(
        r#"
[input]
data_dir = {csv:?}

[server]
port = 0
static_dir = {static_dir:?}

[vulnerability]
file = "vulnerabilidad-por-barrios.csv"

[[datasets]]
id = "hospitales"
file = "hospitales.csv"
label = "🏥 Mapa de Hospitales"
title = "🏥 Mapa de Hospitales"
description = "Hospitales por tipo, financiación y camas."
popup = ["Nombre", "Tipo", "Camas", "Financiaci", "Direccion"]
tooltip = "Nombre"

[[datasets]]
id = "dona"
file = "dona.csv"
label = "🚺 Mapa de Recursos para la Mujer"
popup = ["equipamien", "identifica", "telefono", "codvia", "numportal"]
tooltip = "equipamien"
"#,
        csv = csv_dir.to_str().unwrap(),
        static_dir = static_dir.to_str().unwrap(),
    );
    AppConfig::from_toml(&toml).unwrap()
}

fn app(dir: &TempDir) -> axum::Router {
    let config = write_fixture(dir.path(), HOSPITALS);
    let catalog = data::load_catalog(&config).unwrap();
    router(Arc::new(AppState::new(config, catalog)))
}

async fn get(app: axum::Router, uri: &str) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn root_redirects_to_services() {
    let dir = TempDir::new().unwrap();
    let (status, headers, _) = get(app(&dir), "/").await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(headers[header::LOCATION], "/services");
}

#[tokio::test]
async fn services_page_defaults_to_first_dataset() {
    let dir = TempDir::new().unwrap();
    let (status, _, body) = get(app(&dir), "/services").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<h2>🏥 Mapa de Hospitales</h2>"));
    assert!(body.contains("📍 Total de puntos</div><div class=\"metric-value\">2</div>"));
    assert!(body.contains("📌 Columnas</div><div class=\"metric-value\">8</div>"));
    assert!(body.contains("<option value=\"hospitales\" selected>"));
    assert!(!body.contains("Sin ubicación"));
}

#[tokio::test]
async fn click_renders_nearest_facility() {
    let dir = TempDir::new().unwrap();
    let (status, _, body) = get(app(&dir), "/services?dataset=hospitales&lat=39.471&lng=-0.381").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Centro más cercano: Hospital Uno – 14"));
    assert!(body.contains(r#""overlay":{"click":[39.471,-0.381],"nearest":[39.47,-0.38]"#));

    // a malformed click is ignored rather than rejected
    let (status, _, body) = get(app(&dir), "/services?dataset=hospitales&lat=abc&lng=-0.381").await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("Centro más cercano"));
    assert!(body.contains(r#""overlay":null"#));

    let (_, _, body) = get(app(&dir), "/services?dataset=hospitales&lat=95&lng=-0.38").await;
    assert!(!body.contains("NaN"));
    assert!(!body.contains("Centro más cercano"));
}

#[tokio::test]
async fn click_follows_dataset_switch() {
    let dir = TempDir::new().unwrap();
    // switching to dona recomputes the nearest against its single facility
    let (status, _, body) = get(app(&dir), "/services?dataset=dona&lat=39.471&lng=-0.381").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("Centro más cercano: Centro Mujer"));
    assert!(body.contains(r#"<input type="hidden" name="lat" value="39.471"/>"#));

    let (_, _, body) = get(app(&dir), "/vulnerability?view=table&lat=39.471&lng=-0.381").await;
    assert!(body.contains(r#"href="/services?lat=39.471&amp;lng=-0.381""#));
}

#[tokio::test]
async fn untitled_dataset_uses_generic_title() {
    let dir = TempDir::new().unwrap();
    let (status, _, body) = get(app(&dir), "/services?dataset=dona").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<h2>📍 Mapa Interactivo</h2>"));
    // codvia and numportal are configured but absent from the CSV; popups
    // travel inside the map script with `</` escaped
    assert!(body.contains(r"<strong>codvia:<\/strong> N/D"));
}

#[tokio::test]
async fn unknown_dataset_is_not_found() {
    let dir = TempDir::new().unwrap();
    let (status, _, body) = get(app(&dir), "/services?dataset=nope").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("nope"));
}

#[tokio::test]
async fn nearest_api() {
    let dir = TempDir::new().unwrap();
    let (status, _, body) = get(app(&dir), "/api/nearest?dataset=hospitales&lat=39.4805&lng=-0.3705").await;
    assert_eq!(status, StatusCode::OK);
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["name"], "Hospital Dos");
    assert!(json["distance_m"].as_f64().unwrap() < 100.0);

    let (status, _, _) = get(app(&dir), "/api/nearest?dataset=nope&lat=39.48&lng=-0.37").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _, _) = get(app(&dir), "/api/nearest?dataset=hospitales").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let (status, _, _) = get(app(&dir), "/api/nearest?dataset=hospitales&lat=95&lng=-0.38").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn datasets_api_lists_counts() {
    let dir = TempDir::new().unwrap();
    let (_, _, body) = get(app(&dir), "/api/datasets").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    let list = json.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["id"], "hospitales");
    assert_eq!(list[0]["records"], 2);
    assert_eq!(list[1]["title"], "📍 Mapa Interactivo");
}

#[tokio::test]
async fn vulnerability_views_and_download() {
    let dir = TempDir::new().unwrap();
    for (uri, needle) in [
        ("/vulnerability", "Mapa por nivel de vulnerabilidad global"),
        ("/vulnerability?view=charts", "Distribución por tipos de vulnerabilidad"),
        ("/vulnerability?view=table", "Tabla de indicadores por barrio"),
        ("/vulnerability?view=bogus", "Mapa por nivel de vulnerabilidad global"),
    ] {
        let (status, _, body) = get(app(&dir), uri).await;
        assert_eq!(status, StatusCode::OK, "{}", uri);
        assert!(body.contains(needle), "{} should contain {}", uri, needle);
    }

    let (status, headers, body) = get(app(&dir), "/vulnerability/download.csv").await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE].to_str().unwrap().starts_with("text/csv"));
    assert_eq!(
        headers[header::CONTENT_DISPOSITION],
        "attachment; filename=\"vulnerabilidad_barrios.csv\""
    );
    assert_eq!(body.lines().count(), 3);
    assert!(body.starts_with("Name,District,Ind_Equip"));
}

#[tokio::test]
async fn area_api_finds_containing_neighborhood() {
    let dir = TempDir::new().unwrap();
    let (_, _, body) = get(app(&dir), "/api/area?lat=39.475&lon=-0.375").await;
    let json: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(json["name"], "RUSSAFA");
    assert_eq!(json["color"], "red");

    let (_, _, body) = get(app(&dir), "/api/area?lat=39.45&lon=-0.33").await;
    assert_eq!(body, "null");
}

#[tokio::test]
async fn static_files_are_served() {
    let dir = TempDir::new().unwrap();
    let (status, _, body) = get(app(&dir), "/static/app.css").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("margin"));
}

#[test]
fn malformed_coordinates_abort_loading() {
    let dir = TempDir::new().unwrap();
    let broken = "Nombre;geo_point_2d\nHospital;norte,oeste\n";
    let config = write_fixture(dir.path(), broken);
    let err = data::load_catalog(&config).unwrap_err();
    let message = format!("{:#}", err);
    assert!(message.contains("hospitales"), "{}", message);
    assert!(message.contains("norte,oeste"), "{}", message);
}
