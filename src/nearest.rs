use crate::types::Facility;
use geo::{GeodesicDistance, Point};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Nearest {
    pub index: usize,
    pub distance_m: f64,
}

/// Where the user last clicked, carried on the request as `lat`/`lng`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClickState {
    NoClick,
    Pending(Point<f64>),
}

#[derive(Debug, Default)]
pub struct ClickParams {
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

impl ClickState {
    pub fn from_params(params: &ClickParams) -> Self {
        match (params.lat, params.lng) {
            (Some(lat), Some(lng)) if lat.abs() <= 90.0 && lng.is_finite() => {
                ClickState::Pending(Point::new(lng, lat))
            }
            _ => ClickState::NoClick,
        }
    }
}

/// Ellipsoidal (WGS-84) distance in meters between two lon/lat points.
pub fn distance_m(a: Point<f64>, b: Point<f64>) -> f64 {
    a.geodesic_distance(&b)
}

/// Linear scan for the facility closest to `query`. Ties keep the first one;
/// facilities whose distance is undefined are skipped.
pub fn nearest(query: Point<f64>, facilities: &[Facility]) -> Option<Nearest> {
    let mut best: Option<Nearest> = None;
    for (index, facility) in facilities.iter().enumerate() {
        let d = distance_m(query, facility.point);
        if !d.is_finite() {
            continue;
        }
        match best {
            Some(b) if d >= b.distance_m => {}
            _ => best = Some(Nearest { index, distance_m: d }),
        }
    }
    best
}

/// Whole meters with `,` thousands separators, e.g. `12,345`. Halves round
/// to even.
pub fn format_meters(meters: f64) -> String {
    let digits = format!("{:.0}", meters.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if meters < 0.0 && digits != "0" {
        out.push('-');
    }
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}
