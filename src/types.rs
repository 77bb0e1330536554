use geo::{MultiPolygon, Point};
use std::collections::HashMap;

/// Extra columns derived from `geo_point_2d`, counted like regular columns.
pub const DERIVED_COLUMNS: [&str; 2] = ["LATITUD", "LONGITUD"];

#[derive(Debug, Clone)]
pub struct Facility {
    pub point: Point<f64>, // x = longitude, y = latitude
    pub fields: HashMap<String, String>,
}

impl Facility {
    pub fn lat(&self) -> f64 {
        self.point.y()
    }

    pub fn lon(&self) -> f64 {
        self.point.x()
    }

    pub fn field(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    pub file: String,
    pub headers: Vec<String>,
    pub facilities: Vec<Facility>,
}

impl Dataset {
    pub fn has_column(&self, column: &str) -> bool {
        self.headers.iter().any(|h| h == column)
    }

    /// Source columns plus the two derived coordinate columns.
    pub fn column_count(&self) -> usize {
        self.headers.len() + DERIVED_COLUMNS.len()
    }

    pub fn center(&self) -> Option<Point<f64>> {
        mean_center(self.facilities.iter().map(|f| f.point))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Indices {
    pub equipment: Option<f64>,
    pub demographic: Option<f64>,
    pub economic: Option<f64>,
    pub global: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Levels {
    pub equipment: String,
    pub demographic: String,
    pub economic: String,
    pub global: String,
}

#[derive(Debug, Clone)]
pub struct Neighborhood {
    pub name: String,
    pub district: String,
    pub indices: Indices,
    pub levels: Levels,
    pub point: Point<f64>,
    pub geometry: Option<MultiPolygon<f64>>,
}

pub fn mean_center(points: impl Iterator<Item = Point<f64>>) -> Option<Point<f64>> {
    let (mut sum_x, mut sum_y, mut n) = (0.0, 0.0, 0usize);
    for p in points {
        sum_x += p.x();
        sum_y += p.y();
        n += 1;
    }
    if n == 0 {
        return None;
    }
    Some(Point::new(sum_x / n as f64, sum_y / n as f64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mean_center_of_points() {
        let pts = vec![Point::new(-0.38, 39.47), Point::new(-0.36, 39.49)];
        let c = mean_center(pts.into_iter()).unwrap();
        assert!((c.x() + 0.37).abs() < 1e-12);
        assert!((c.y() - 39.48).abs() < 1e-12);
        assert!(mean_center(std::iter::empty()).is_none());
    }
}
