/// Basin delineation: the drainage area upstream of a network position.
///
/// Runs an unlimited upstream-with-tributaries traversal, fetches the local
/// catchment of every segment found and unions them. Segments without a
/// catchment are skipped and listed on the result. Simplification only
/// applies to merged basins; a single catchment comes back as stored.

use geo::{BooleanOps, MultiPolygon, Simplify};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::model::{Comid, NetworkPosition, NldiError};
use crate::navigation::{traverse, NavigationMode, TraversalLimits};
use crate::store::NetworkStore;

#[derive(Debug, Clone, PartialEq)]
pub struct Basin {
    pub origin: NetworkPosition,
    /// Segments whose catchments make up the polygon, in traversal order.
    pub comids: Vec<Comid>,
    /// Segments reached by the traversal that have no catchment.
    pub missing_catchments: Vec<Comid>,
    pub geometry: MultiPolygon<f64>,
    pub simplified: bool,
}

#[derive(Clone)]
pub struct BasinDelineator {
    store: Arc<dyn NetworkStore>,
    simplify_tolerance: f64,
}

impl BasinDelineator {
    pub fn new(store: Arc<dyn NetworkStore>, simplify_tolerance: f64) -> Self {
        BasinDelineator {
            store,
            simplify_tolerance,
        }
    }

    pub fn delineate(
        &self,
        start: NetworkPosition,
        simplified: bool,
        deadline: Option<Instant>,
    ) -> Result<Basin, NldiError> {
        let limits = TraversalLimits {
            max_distance_km: None,
            deadline,
        };
        let upstream = traverse(&*self.store, start, NavigationMode::UpstreamTributaries, limits)?;

        let mut comids = Vec::with_capacity(upstream.segments.len());
        let mut missing = Vec::new();
        let mut polygons: Vec<MultiPolygon<f64>> = Vec::with_capacity(upstream.segments.len());

        for segment in &upstream.segments {
            match self.store.catchment_geometry(segment.comid)? {
                Some(catchment) => {
                    comids.push(segment.comid);
                    polygons.push(catchment);
                }
                None => {
                    warn!(comid = segment.comid, origin = start.comid, "catchment missing, skipped from basin");
                    missing.push(segment.comid);
                }
            }
        }

        let mut parts = polygons.into_iter();
        let first = parts.next().ok_or_else(|| {
            NldiError::CatchmentNotFound(format!("no catchments upstream of comid {}", start.comid))
        })?;
        let merged = parts.fold(first, |acc, next| acc.union(&next));

        // A lone catchment is already the basin and is returned untouched.
        let simplified = simplified && self.simplify_tolerance > 0.0 && comids.len() > 1;
        let geometry = if simplified {
            merged.simplify(&self.simplify_tolerance)
        } else {
            merged
        };

        debug!(
            origin = start.comid,
            catchments = comids.len(),
            missing = missing.len(),
            simplified,
            "basin delineated"
        );

        Ok(Basin {
            origin: start,
            comids,
            missing_catchments: missing,
            geometry,
            simplified,
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
    use crate::store::memory::MemoryStore;
    use geo::{Area, CoordsIter};

    fn delineator() -> (Arc<MemoryStore>, BasinDelineator) {
        let store = Arc::new(demo_store());
        let basin = BasinDelineator::new(store.clone(), 0.0005);
        (store, basin)
    }

    #[test]
    fn test_headwater_basin_is_its_own_catchment() {
        let (store, delineator) = delineator();
        let basin = delineator
            .delineate(NetworkPosition::new(1001, 100.0), false, None)
            .unwrap();
        let catchment = store.catchment_geometry(1001).unwrap().unwrap();
        assert_eq!(basin.geometry, catchment);
        assert_eq!(basin.comids, vec![1001]);
        assert!(basin.missing_catchments.is_empty());
    }

    #[test]
    fn test_missing_catchment_is_recorded_and_skipped() {
        let (store, delineator) = delineator();
        let basin = delineator
            .delineate(NetworkPosition::new(1005, 100.0), false, None)
            .unwrap();
        assert_eq!(basin.missing_catchments, vec![4002]);
        assert_eq!(basin.comids.len(), 10);

        // The fixture catchments only touch along edges, so the union keeps
        // their total area.
        let expected: f64 = basin
            .comids
            .iter()
            .map(|c| store.catchment_geometry(*c).unwrap().unwrap().unsigned_area())
            .sum();
        assert!((basin.geometry.unsigned_area() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_simplified_basin_has_no_more_vertices() {
        let (_, delineator) = delineator();
        let full = delineator.delineate(NetworkPosition::new(1003, 100.0), false, None).unwrap();
        let simple = delineator.delineate(NetworkPosition::new(1003, 100.0), true, None).unwrap();
        assert!(simple.simplified);
        assert!(simple.geometry.coords_count() <= full.geometry.coords_count());
    }

    #[test]
    fn test_single_catchment_basin_is_not_simplified() {
        // The notch at (0.5, 0.0001) sits well inside the tolerance and would
        // be dropped by simplification.
        let store = Arc::new(
            MemoryStore::from_toml_str(
                r#"
                [[flowline]]
                comid = 8
                levelpath = 8
                hydroseq = 1
                length_km = 1.0
                coordinates = [[0.5, 1.0], [0.5, 0.0]]

                [[catchment]]
                comid = 8
                rings = [[[0.0, 0.0], [0.5, 0.0001], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]]
                "#,
            )
            .unwrap(),
        );
        let delineator = BasinDelineator::new(store.clone(), 0.0005);
        let basin = delineator.delineate(NetworkPosition::new(8, 100.0), true, None).unwrap();
        let catchment = store.catchment_geometry(8).unwrap().unwrap();
        assert_eq!(basin.geometry, catchment);
        assert_eq!(basin.geometry.coords_count(), 6);
        assert!(!basin.simplified);
    }

    #[test]
    fn test_no_catchments_at_all() {
        let store = MemoryStore::from_toml_str(
            r#"
            [[flowline]]
            comid = 7
            levelpath = 7
            hydroseq = 1
            length_km = 2.0
            coordinates = [[0.0, 1.0], [0.0, 0.0]]
            "#,
        )
        .unwrap();
        let delineator = BasinDelineator::new(Arc::new(store), 0.0005);
        let result = delineator.delineate(NetworkPosition::new(7, 50.0), false, None);
        assert!(matches!(result, Err(NldiError::CatchmentNotFound(_))));
    }
}
