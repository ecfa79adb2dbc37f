use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A closed polygon (outer ring only) used as a spatial filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialPolygon {
    pub points: Vec<(f64, f64)>,
    pub srid: i32,
}

impl SpatialPolygon {
    pub fn new(points: Vec<(f64, f64)>, srid: i32) -> Result<Self, QueryError> {
        if srid <= 0 {
            return Err(QueryError::InvalidPolygon(format!("invalid SRID {}", srid)));
        }
        if let Some((x, y)) = points.iter().find(|(x, y)| !x.is_finite() || !y.is_finite()) {
            return Err(QueryError::InvalidPolygon(format!(
                "non-finite coordinate ({}, {})",
                x, y
            )));
        }

        let mut ring = points;
        if ring.len() > 1 && ring.first() == ring.last() {
            ring.pop();
        }
        if ring.len() < 3 {
            return Err(QueryError::InvalidPolygon(format!(
                "a polygon needs at least 3 distinct points, got {}",
                ring.len()
            )));
        }
        Ok(Self { points: ring, srid })
    }

    /// Accepts either `{"points": [[x, y], ...], "coordinate_system": "4326"}`
    /// or a (E)WKT string such as `SRID=4326;POLYGON((...))`.
    pub fn from_json(value: &serde_json::Value, default_srid: i32) -> Result<Self, QueryError> {
        match value {
            serde_json::Value::String(text) => Self::from_ewkt(text, default_srid),
            serde_json::Value::Object(map) => {
                let points = map
                    .get("points")
                    .and_then(|p| p.as_array())
                    .ok_or_else(|| QueryError::InvalidPolygon("missing 'points' array".to_string()))?
                    .iter()
                    .map(parse_point)
                    .collect::<Result<Vec<_>, _>>()?;

                let srid = match map.get("coordinate_system").or_else(|| map.get("srid")) {
                    None | Some(serde_json::Value::Null) => default_srid,
                    Some(serde_json::Value::Number(n)) => n
                        .as_i64()
                        .and_then(|n| i32::try_from(n).ok())
                        .ok_or_else(|| QueryError::InvalidPolygon(format!("invalid SRID {}", n)))?,
                    Some(serde_json::Value::String(s)) => parse_srid(s)?,
                    Some(other) => {
                        return Err(QueryError::InvalidPolygon(format!("invalid SRID {}", other)))
                    }
                };
                Self::new(points, srid)
            }
            other => Err(QueryError::InvalidPolygon(format!(
                "expected an object or a WKT string, got {}",
                other
            ))),
        }
    }

    pub fn from_ewkt(text: &str, default_srid: i32) -> Result<Self, QueryError> {
        let (srid, wkt) = split_ewkt(text, default_srid)?;
        Self::from_wkt(wkt, srid)
    }

    pub fn from_wkt(wkt: &str, srid: i32) -> Result<Self, QueryError> {
        let trimmed = wkt.trim();
        let upper = trimmed.to_ascii_uppercase();
        let body = upper
            .strip_prefix("POLYGON")
            .map(str::trim)
            .and_then(|b| b.strip_prefix("(("))
            .and_then(|b| b.strip_suffix("))"))
            .ok_or_else(|| QueryError::InvalidPolygon(format!("not a POLYGON: {}", trimmed)))?;

        if body.contains('(') || body.contains(')') {
            return Err(QueryError::InvalidPolygon(
                "polygons with interior rings are not supported".to_string(),
            ));
        }

        let points = body
            .split(',')
            .map(|pair| {
                let mut coords = pair.split_whitespace().map(str::parse::<f64>);
                match (coords.next(), coords.next(), coords.next()) {
                    (Some(Ok(x)), Some(Ok(y)), None) => Ok((x, y)),
                    _ => Err(QueryError::InvalidPolygon(format!(
                        "invalid coordinate pair '{}'",
                        pair.trim()
                    ))),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(points, srid)
    }

    /// Closed-ring WKT. Rendered from parsed numbers, so it is safe to inline.
    pub fn to_wkt(&self) -> String {
        let mut coords: Vec<String> = self
            .points
            .iter()
            .map(|(x, y)| format!("{} {}", x, y))
            .collect();
        if let Some(first) = coords.first().cloned() {
            coords.push(first);
        }
        format!("POLYGON(({}))", coords.join(", "))
    }
}

fn parse_point(value: &serde_json::Value) -> Result<(f64, f64), QueryError> {
    let coord = |v: Option<&serde_json::Value>| -> Option<f64> {
        match v? {
            serde_json::Value::Number(n) => n.as_f64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };
    match value.as_array() {
        Some(pair) if pair.len() == 2 => match (coord(pair.first()), coord(pair.get(1))) {
            (Some(x), Some(y)) => Ok((x, y)),
            _ => Err(QueryError::InvalidPolygon(format!("invalid point {}", value))),
        },
        _ => Err(QueryError::InvalidPolygon(format!("invalid point {}", value))),
    }
}

fn parse_srid(text: &str) -> Result<i32, QueryError> {
    let digits = text
        .trim()
        .trim_start_matches("EPSG:")
        .trim_start_matches("epsg:");
    digits
        .parse::<i32>()
        .map_err(|_| QueryError::InvalidPolygon(format!("invalid SRID '{}'", text)))
}

fn split_ewkt(text: &str, default_srid: i32) -> Result<(i32, &str), QueryError> {
    let trimmed = text.trim();
    match trimmed.split_once(';') {
        Some((prefix, wkt)) if prefix.trim().to_ascii_uppercase().starts_with("SRID=") => {
            Ok((parse_srid(&prefix.trim()[5..])?, wkt))
        }
        Some(_) => Err(QueryError::InvalidPolygon(format!(
            "malformed EWKT prefix in '{}'",
            trimmed
        ))),
        None => Ok((default_srid, trimmed)),
    }
}

/// A geometry value as carried on an instance: `SRID=<srid>;<wkt>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpatialValue {
    pub wkt: String,
    pub srid: i32,
}

impl SpatialValue {
    pub fn new(wkt: impl Into<String>, srid: i32) -> Self {
        Self {
            wkt: wkt.into(),
            srid,
        }
    }

    /// Parse a composite value, rejecting characters that never occur in WKT
    /// since the text ends up inlined in SQL.
    pub fn parse(text: &str, default_srid: i32) -> Result<Self, QueryError> {
        let (srid, wkt) = split_ewkt(text, default_srid)?;
        let wkt = wkt.trim();
        let allowed = |c: char| c.is_ascii_alphanumeric() || " .,()-+".contains(c);
        if wkt.is_empty() || !wkt.chars().all(allowed) {
            return Err(QueryError::InvalidPolygon(format!("invalid geometry text '{}'", wkt)));
        }
        Ok(Self::new(wkt, srid))
    }
}

impl fmt::Display for SpatialValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SRID={};{}", self.srid, self.wkt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_polygon_from_points_object_closes_ring() {
        let value = json!({
            "points": [[-105.0, 40.0], [-104.0, 40.0], [-104.0, 41.0], [-105.0, 40.0]],
            "coordinate_system": "4326"
        });
        let polygon = SpatialPolygon::from_json(&value, 3857).unwrap();

        assert_eq!(polygon.srid, 4326);
        assert_eq!(polygon.points.len(), 3);
        assert_eq!(polygon.to_wkt(), "POLYGON((-105 40, -104 40, -104 41, -105 40))");
    }

    #[test]
    fn test_polygon_from_ewkt() {
        let polygon =
            SpatialPolygon::from_ewkt("SRID=26913;POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))", 4326).unwrap();
        assert_eq!(polygon.srid, 26913);
        assert_eq!(polygon.points.len(), 4);
    }

    #[test]
    fn test_malformed_polygons_are_rejected() {
        let cases = vec![
            json!({"points": [[0, 0], [1, 1]], "coordinate_system": "4326"}),
            json!({"points": [[0, 0], [1, "x"], [2, 2]], "coordinate_system": "4326"}),
            json!({"points": [[0, 0], [1, 0], [1, 1]], "coordinate_system": "wgs84"}),
            json!("POLYGON((0 0, 1 0))"),
            json!("LINESTRING(0 0, 1 1)"),
            json!(42),
        ];
        for case in cases {
            let err = SpatialPolygon::from_json(&case, 4326).unwrap_err();
            assert!(matches!(err, QueryError::InvalidPolygon(_)), "{:?}", case);
        }
    }

    #[test]
    fn test_spatial_value_rejects_quotes() {
        assert!(SpatialValue::parse("SRID=4326;POINT(1 2)", 0).is_ok());
        assert!(SpatialValue::parse("POINT(1 2)'); DROP TABLE x; --", 4326).is_err());
        assert_eq!(
            SpatialValue::parse("POINT(1 2)", 4326).unwrap().to_string(),
            "SRID=4326;POINT(1 2)"
        );
    }
}
