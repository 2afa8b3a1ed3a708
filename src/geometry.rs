/// Geometry helpers: WKT point parsing, GeoJSON geometry encoding, and
/// linear referencing along flowlines.
///
/// Coordinates are longitude/latitude degrees (NAD83, EPSG:4269, as stored
/// in NHDPlus). Distances and projections are planar in degree space, the
/// same way PostGIS treats `geometry` columns.

use geo::{
    Coord, EuclideanDistance, LineInterpolatePoint, LineLocatePoint, LineString, MultiPolygon,
    Point, Polygon,
};
use serde::{Deserialize, Serialize};

use crate::model::{clamp_measure, NldiError};

// ---------------------------------------------------------------------------
// WKT input
// ---------------------------------------------------------------------------

/// Parses a `POINT(x y)` string as accepted by the `coords` query parameter.
///
/// Keyword case and surrounding whitespace are ignored. Longitude must lie
/// in [-180, 180] and latitude in [-90, 90].
pub fn parse_wkt_point(input: &str) -> Result<Point<f64>, NldiError> {
    let trimmed = input.trim();
    let malformed = || NldiError::InvalidCoordinates(format!("expected POINT(x y), got '{}'", input));

    let (keyword, rest) = trimmed.split_at(trimmed.find('(').ok_or_else(malformed)?);
    if !keyword.trim().eq_ignore_ascii_case("POINT") {
        return Err(malformed());
    }
    let inner = rest
        .strip_prefix('(')
        .and_then(|r| r.strip_suffix(')'))
        .ok_or_else(malformed)?;

    let parts: Vec<&str> = inner.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(malformed());
    }
    let x: f64 = parts[0].parse().map_err(|_| malformed())?;
    let y: f64 = parts[1].parse().map_err(|_| malformed())?;

    if !x.is_finite() || !y.is_finite() {
        return Err(malformed());
    }
    if !(-180.0..=180.0).contains(&x) || !(-90.0..=90.0).contains(&y) {
        return Err(NldiError::InvalidCoordinates(format!(
            "point ({}, {}) is outside longitude/latitude bounds",
            x, y
        )));
    }
    Ok(Point::new(x, y))
}

// ---------------------------------------------------------------------------
// GeoJSON geometry
// ---------------------------------------------------------------------------

/// GeoJSON geometry object, as produced by `ST_AsGeoJSON(ST_Force2D(..))`
/// and as written into responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum GeoJsonGeometry {
    Point([f64; 2]),
    LineString(Vec<[f64; 2]>),
    MultiLineString(Vec<Vec<[f64; 2]>>),
    Polygon(Vec<Vec<[f64; 2]>>),
    MultiPolygon(Vec<Vec<Vec<[f64; 2]>>>),
}

/// Geometry had the wrong GeoJSON type or no coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryError(pub String);

impl std::fmt::Display for GeometryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Geometry error: {}", self.0)
    }
}

impl std::error::Error for GeometryError {}

fn to_coords(positions: &[[f64; 2]]) -> Vec<Coord<f64>> {
    positions.iter().map(|p| Coord { x: p[0], y: p[1] }).collect()
}

fn from_coords(line: &LineString<f64>) -> Vec<[f64; 2]> {
    line.coords().map(|c| [c.x, c.y]).collect()
}

fn to_polygon(rings: &[Vec<[f64; 2]>]) -> Result<Polygon<f64>, GeometryError> {
    let (exterior, interiors) = rings
        .split_first()
        .ok_or_else(|| GeometryError("polygon without rings".to_string()))?;
    Ok(Polygon::new(
        LineString::new(to_coords(exterior)),
        interiors.iter().map(|r| LineString::new(to_coords(r))).collect(),
    ))
}

fn from_polygon(polygon: &Polygon<f64>) -> Vec<Vec<[f64; 2]>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(from_coords)
        .collect()
}

impl GeoJsonGeometry {
    /// Flowline geometry. Multi-part lines are joined in order, dropping the
    /// repeated vertex where one part ends and the next begins.
    pub fn to_line_string(&self) -> Result<LineString<f64>, GeometryError> {
        let coords = match self {
            GeoJsonGeometry::LineString(positions) => to_coords(positions),
            GeoJsonGeometry::MultiLineString(parts) => {
                let mut joined: Vec<Coord<f64>> = Vec::new();
                for part in parts {
                    for c in to_coords(part) {
                        if joined.last() != Some(&c) {
                            joined.push(c);
                        }
                    }
                }
                joined
            }
            other => {
                return Err(GeometryError(format!("expected a line, got {}", other.type_name())));
            }
        };
        if coords.is_empty() {
            return Err(GeometryError("line has no coordinates".to_string()));
        }
        Ok(LineString::new(coords))
    }

    pub fn to_multi_polygon(&self) -> Result<MultiPolygon<f64>, GeometryError> {
        match self {
            GeoJsonGeometry::Polygon(rings) => Ok(MultiPolygon::new(vec![to_polygon(rings)?])),
            GeoJsonGeometry::MultiPolygon(polygons) => Ok(MultiPolygon::new(
                polygons
                    .iter()
                    .map(|rings| to_polygon(rings))
                    .collect::<Result<Vec<_>, _>>()?,
            )),
            other => Err(GeometryError(format!("expected a polygon, got {}", other.type_name()))),
        }
    }

    pub fn from_point(point: &Point<f64>) -> Self {
        GeoJsonGeometry::Point([point.x(), point.y()])
    }

    pub fn from_line_string(line: &LineString<f64>) -> Self {
        GeoJsonGeometry::LineString(from_coords(line))
    }

    /// Single-polygon collections are written as `Polygon`.
    pub fn from_multi_polygon(polygons: &MultiPolygon<f64>) -> Self {
        match polygons.0.as_slice() {
            [single] => GeoJsonGeometry::Polygon(from_polygon(single)),
            many => GeoJsonGeometry::MultiPolygon(many.iter().map(from_polygon).collect()),
        }
    }

    pub fn from_geometry(geometry: &geo::Geometry<f64>) -> Option<Self> {
        match geometry {
            geo::Geometry::Point(p) => Some(Self::from_point(p)),
            geo::Geometry::LineString(l) => Some(Self::from_line_string(l)),
            geo::Geometry::Polygon(p) => Some(GeoJsonGeometry::Polygon(from_polygon(p))),
            geo::Geometry::MultiPolygon(mp) => Some(Self::from_multi_polygon(mp)),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            GeoJsonGeometry::Point(_) => "Point",
            GeoJsonGeometry::LineString(_) => "LineString",
            GeoJsonGeometry::MultiLineString(_) => "MultiLineString",
            GeoJsonGeometry::Polygon(_) => "Polygon",
            GeoJsonGeometry::MultiPolygon(_) => "MultiPolygon",
        }
    }
}

// ---------------------------------------------------------------------------
// Linear referencing
// ---------------------------------------------------------------------------

/// Projects `point` orthogonally onto `line` and returns the measure of the
/// projection (percent of arc length from the first, upstream, vertex)
/// together with the snapped point.
pub fn locate_measure(line: &LineString<f64>, point: &Point<f64>) -> (f64, Point<f64>) {
    let fraction = line.line_locate_point(point).unwrap_or(0.0);
    let measure = clamp_measure(fraction * 100.0);
    let snapped = point_at_measure(line, measure)
        .or_else(|| line.points().next())
        .unwrap_or(*point);
    (measure, snapped)
}

/// Point at `measure` percent of the line's arc length from its upstream end.
pub fn point_at_measure(line: &LineString<f64>, measure: f64) -> Option<Point<f64>> {
    line.line_interpolate_point(clamp_measure(measure) / 100.0)
}

/// Planar distance (degrees) from a point to a line.
pub fn distance_to_line(line: &LineString<f64>, point: &Point<f64>) -> f64 {
    point.euclidean_distance(line)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
