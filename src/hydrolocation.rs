/// Hydrolocation: snapping an arbitrary point onto the stream network.
///
/// The nearest flowline within the search radius is found by the store; the
/// point is then projected orthogonally onto that polyline and the
/// projection expressed as a measure (percent of arc length from the
/// upstream end).

use geo::Point;
use std::sync::Arc;
use tracing::debug;

use crate::geometry::{locate_measure, point_at_measure};
use crate::model::{FlowlineSegment, NetworkPosition, NldiError};
use crate::store::NetworkStore;

/// The network-indexed half of a hydrolocation.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedLocation {
    pub position: NetworkPosition,
    pub reachcode: Option<String>,
    /// Projection of the input onto the flowline.
    pub point: Point<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hydrolocation {
    pub indexed: IndexedLocation,
    /// The caller's coordinates, unmodified.
    pub provided: Point<f64>,
}

/// One of the two records a hydrolocation is reported as.
#[derive(Debug, Clone, PartialEq)]
pub enum LocationRecord {
    Indexed(IndexedLocation),
    Provided(Point<f64>),
}

impl LocationRecord {
    pub fn label(&self) -> &'static str {
        match self {
            LocationRecord::Indexed(_) => "indexed",
            LocationRecord::Provided(_) => "provided",
        }
    }
}

impl Hydrolocation {
    /// Indexed first, provided second.
    pub fn into_records(self) -> [LocationRecord; 2] {
        [
            LocationRecord::Indexed(self.indexed),
            LocationRecord::Provided(self.provided),
        ]
    }
}

/// Projects `point` onto an already-selected flowline.
pub fn index_on(flowline: &FlowlineSegment, point: &Point<f64>) -> IndexedLocation {
    let (measure, snapped) = locate_measure(&flowline.geometry, point);
    IndexedLocation {
        position: NetworkPosition::new(flowline.comid(), measure),
        reachcode: flowline.segment.reachcode.clone(),
        point: snapped,
    }
}

#[derive(Clone)]
pub struct HydrolocationResolver {
    store: Arc<dyn NetworkStore>,
    max_radius: f64,
}

impl HydrolocationResolver {
    pub fn new(store: Arc<dyn NetworkStore>, max_radius: f64) -> Self {
        HydrolocationResolver { store, max_radius }
    }

    /// Configured search radius in degrees.
    pub fn radius(&self) -> f64 {
        self.max_radius
    }

    pub fn resolve(&self, point: &Point<f64>) -> Result<Hydrolocation, NldiError> {
        self.resolve_within(point, self.max_radius)
    }

    pub fn resolve_within(&self, point: &Point<f64>, max_radius: f64) -> Result<Hydrolocation, NldiError> {
        if !(max_radius > 0.0) {
            return Err(NldiError::InvalidParameter(format!(
                "search radius must be positive, got {}",
                max_radius
            )));
        }
        let flowline = self.store.nearest_segment(point, max_radius)?.ok_or_else(|| {
            NldiError::PositionUnresolvable(format!(
                "no flowline within {} degrees of ({}, {})",
                max_radius,
                point.x(),
                point.y()
            ))
        })?;

        let indexed = index_on(&flowline, point);
        debug!(
            comid = indexed.position.comid,
            measure = indexed.position.measure,
            "hydrolocation resolved"
        );
        Ok(Hydrolocation {
            indexed,
            provided: *point,
        })
    }

    /// The point lying at `position` on its flowline.
    pub fn point_at(&self, position: &NetworkPosition) -> Result<Point<f64>, NldiError> {
        let flowline = self.store.flowline(position.comid)?.ok_or_else(|| {
            NldiError::PositionUnresolvable(format!("comid {} has no flowline", position.comid))
        })?;
        point_at_measure(&flowline.geometry, position.measure).ok_or_else(|| {
            NldiError::PositionUnresolvable(format!("comid {} has an empty flowline", position.comid))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::demo_store;
    use geo::EuclideanDistance;

    fn resolver() -> HydrolocationResolver {
        HydrolocationResolver::new(Arc::new(demo_store()), 0.1)
    }

    #[test]
    fn test_resolve_snaps_to_nearest_flowline() {
        let hydro = resolver().resolve(&Point::new(-89.49, 42.75)).unwrap();
        assert_eq!(hydro.indexed.position.comid, 1002);
        assert!((hydro.indexed.position.measure - 50.0).abs() < 1e-6);
        assert_eq!(hydro.indexed.reachcode.as_deref(), Some("07090002000102"));
        assert!((hydro.indexed.point.x() + 89.5).abs() < 1e-9);
        assert_eq!(hydro.provided, Point::new(-89.49, 42.75));
    }

    #[test]
    fn test_records_are_indexed_then_provided() {
        let records = resolver().resolve(&Point::new(-89.49, 42.75)).unwrap().into_records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].label(), "indexed");
        assert_eq!(records[1].label(), "provided");
    }

    #[test]
    fn test_point_outside_radius_is_unresolvable() {
        let result = resolver().resolve(&Point::new(-88.0, 41.0));
        assert!(matches!(result, Err(NldiError::PositionUnresolvable(_))));
    }

    #[test]
    fn test_non_positive_radius_is_rejected() {
        let result = resolver().resolve_within(&Point::new(-89.49, 42.75), 0.0);
        assert!(matches!(result, Err(NldiError::InvalidParameter(_))));
    }

    #[test]
    fn test_point_at_reproduces_snapped_point() {
        let resolver = resolver();
        for input in [Point::new(-89.52, 42.83), Point::new(-89.46, 42.56), Point::new(-89.33, 42.84)] {
            let hydro = resolver.resolve(&input).unwrap();
            let measure = hydro.indexed.position.measure;
            assert!((0.0..=100.0).contains(&measure));
            let again = resolver.point_at(&hydro.indexed.position).unwrap();
            assert!(again.euclidean_distance(&hydro.indexed.point) < 1e-9);
        }
    }

    #[test]
    fn test_point_at_unknown_comid() {
        let result = resolver().point_at(&NetworkPosition::new(999, 50.0));
        assert!(matches!(result, Err(NldiError::PositionUnresolvable(_))));
    }
}
