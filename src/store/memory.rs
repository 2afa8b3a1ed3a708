/// In-memory store loaded from a TOML network description.
///
/// Serves the fixture network used throughout the test suite and lets the
/// service run without a database (`--fixture network.toml`). The file lists
/// `[[source]]`, `[[flowline]]`, `[[catchment]]` and `[[feature]]` tables;
/// upstream adjacency is derived from each flowline's `downstream` list, so
/// the two directions can never disagree.
///
/// ```toml
/// [[flowline]]
/// comid = 1001
/// levelpath = 100
/// hydroseq = 10
/// length_km = 11.1
/// downstream = [1002]          # primary first, diversions after
/// coordinates = [[-89.5, 42.9], [-89.5, 42.8]]   # upstream -> downstream
/// ```

use geo::{EuclideanDistance, Geometry, Intersects, LineString, MultiPolygon, Point, Polygon};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use crate::geometry::distance_to_line;
use crate::model::{
    Catchment, Comid, Feature, FlowlineSegment, NetworkPosition, Segment, Source,
    UpstreamNeighbor,
};
use crate::store::{FlowNetwork, NetworkStore, StoreError};

// ---------------------------------------------------------------------------
// TOML Configuration Structures
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NetworkFile {
    #[serde(default, rename = "source")]
    sources: Vec<Source>,
    #[serde(default, rename = "flowline")]
    flowlines: Vec<FlowlineRecord>,
    #[serde(default, rename = "catchment")]
    catchments: Vec<CatchmentRecord>,
    #[serde(default, rename = "feature")]
    features: Vec<FeatureRecord>,
}

#[derive(Debug, Deserialize)]
struct FlowlineRecord {
    comid: Comid,
    levelpath: i64,
    hydroseq: i64,
    length_km: f64,
    #[serde(default)]
    terminal: bool,
    reachcode: Option<String>,
    #[serde(default)]
    downstream: Vec<Comid>,
    coordinates: Vec<[f64; 2]>,
}

#[derive(Debug, Deserialize)]
struct CatchmentRecord {
    comid: Comid,
    /// Exterior ring first, holes after.
    rings: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Deserialize)]
struct FeatureRecord {
    source: String,
    identifier: String,
    name: Option<String>,
    uri: Option<String>,
    reachcode: Option<String>,
    location: Option<[f64; 2]>,
    comid: Option<Comid>,
    measure: Option<f64>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Stored feature row; the source name is joined in at query time.
#[derive(Debug, Clone)]
struct FeatureRow {
    source_suffix: String,
    identifier: String,
    name: Option<String>,
    uri: Option<String>,
    reachcode: Option<String>,
    location: Option<Point<f64>>,
    position: Option<NetworkPosition>,
}

pub struct MemoryStore {
    sources: RwLock<Vec<Source>>,
    flowlines: BTreeMap<Comid, FlowlineSegment>,
    downstream: HashMap<Comid, Vec<Comid>>,
    upstream: HashMap<Comid, Vec<UpstreamNeighbor>>,
    catchments: BTreeMap<Comid, MultiPolygon<f64>>,
    features: Vec<FeatureRow>,
}

fn ring(positions: &[[f64; 2]]) -> LineString<f64> {
    LineString::from(positions.iter().map(|p| (p[0], p[1])).collect::<Vec<_>>())
}

impl MemoryStore {
    /// Load a network description from a TOML file.
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, StoreError> {
        let file: NetworkFile = toml::from_str(content)
            .map_err(|e| StoreError::Decode(format!("network TOML: {}", e)))?;

        let mut flowlines = BTreeMap::new();
        let mut downstream = HashMap::new();
        let mut upstream: HashMap<Comid, Vec<UpstreamNeighbor>> = HashMap::new();

        for record in file.flowlines {
            if record.coordinates.len() < 2 {
                return Err(StoreError::Decode(format!(
                    "flowline {} needs at least two coordinates",
                    record.comid
                )));
            }
            for &down in &record.downstream {
                upstream.entry(down).or_default().push(UpstreamNeighbor {
                    comid: record.comid,
                    levelpath: record.levelpath,
                });
            }
            downstream.insert(record.comid, record.downstream.clone());
            let flowline = FlowlineSegment {
                segment: Segment {
                    comid: record.comid,
                    levelpath: record.levelpath,
                    hydroseq: record.hydroseq,
                    length_km: record.length_km,
                    terminal: record.terminal,
                    reachcode: record.reachcode,
                },
                geometry: ring(&record.coordinates),
            };
            if flowlines.insert(record.comid, flowline).is_some() {
                return Err(StoreError::Decode(format!("duplicate flowline {}", record.comid)));
            }
        }
        for neighbors in upstream.values_mut() {
            neighbors.sort_by_key(|n| n.comid);
        }

        let mut catchments = BTreeMap::new();
        for record in file.catchments {
            let (exterior, holes) = record
                .rings
                .split_first()
                .ok_or_else(|| StoreError::Decode(format!("catchment {} has no rings", record.comid)))?;
            let polygon = Polygon::new(ring(exterior), holes.iter().map(|h| ring(h)).collect());
            catchments.insert(record.comid, MultiPolygon::new(vec![polygon]));
        }

        let mut sources = file.sources;
        sources.sort_by_key(|s| s.crawler_source_id);

        let mut features = Vec::with_capacity(file.features.len());
        for record in file.features {
            if !sources.iter().any(|s| s.matches_suffix(&record.source)) {
                return Err(StoreError::Decode(format!(
                    "feature {} references unknown source {}",
                    record.identifier, record.source
                )));
            }
            let position = record.comid.map(|comid| match record.measure {
                Some(measure) => NetworkPosition::new(comid, measure),
                None => NetworkPosition::at_downstream_end(comid),
            });
            features.push(FeatureRow {
                source_suffix: record.source,
                identifier: record.identifier,
                name: record.name,
                uri: record.uri,
                reachcode: record.reachcode,
                location: record.location.map(|p| Point::new(p[0], p[1])),
                position,
            });
        }
        features.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        Ok(MemoryStore {
            sources: RwLock::new(sources),
            flowlines,
            downstream,
            upstream,
            catchments,
            features,
        })
    }

    fn read_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.sources
            .read()
            .map(|s| s.clone())
            .map_err(|_| StoreError::Unavailable("source table lock poisoned".to_string()))
    }

    fn to_feature(&self, row: &FeatureRow, sources: &[Source]) -> Option<Feature> {
        let source = sources.iter().find(|s| s.matches_suffix(&row.source_suffix))?;
        Some(Feature {
            identifier: row.identifier.clone(),
            name: row.name.clone(),
            uri: row.uri.clone(),
            source_suffix: source.source_suffix.clone(),
            source_name: source.source_name.clone(),
            reachcode: row.reachcode.clone(),
            geometry: row.location.map(Geometry::Point),
            position: row.position,
        })
    }
}

impl FlowNetwork for MemoryStore {
    fn segment(&self, comid: Comid) -> Result<Option<Segment>, StoreError> {
        Ok(self.flowlines.get(&comid).map(|f| f.segment.clone()))
    }

    fn upstream_neighbors(&self, comid: Comid) -> Result<Vec<UpstreamNeighbor>, StoreError> {
        Ok(self.upstream.get(&comid).cloned().unwrap_or_default())
    }

    fn downstream_neighbors(&self, comid: Comid) -> Result<Vec<Comid>, StoreError> {
        Ok(self.downstream.get(&comid).cloned().unwrap_or_default())
    }
}

impl NetworkStore for MemoryStore {
    fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        self.read_sources()
    }

    fn source_by_suffix(&self, suffix: &str) -> Result<Option<Source>, StoreError> {
        Ok(self.read_sources()?.into_iter().find(|s| s.matches_suffix(suffix)))
    }

    fn upsert_source(&self, source: &Source) -> Result<(), StoreError> {
        let mut sources = self
            .sources
            .write()
            .map_err(|_| StoreError::Unavailable("source table lock poisoned".to_string()))?;
        match sources.iter_mut().find(|s| s.crawler_source_id == source.crawler_source_id) {
            Some(existing) => *existing = source.clone(),
            None => sources.push(source.clone()),
        }
        sources.sort_by_key(|s| s.crawler_source_id);
        Ok(())
    }

    fn deactivate_source(&self, suffix: &str) -> Result<bool, StoreError> {
        let mut sources = self
            .sources
            .write()
            .map_err(|_| StoreError::Unavailable("source table lock poisoned".to_string()))?;
        let before = sources.len();
        sources.retain(|s| !s.matches_suffix(suffix));
        Ok(sources.len() != before)
    }

    fn nearest_segment(&self, point: &Point<f64>, radius: f64)
        -> Result<Option<FlowlineSegment>, StoreError> {
        let nearest = self
            .flowlines
            .values()
            .map(|f| (distance_to_line(&f.geometry, point), f))
            .filter(|(d, _)| *d <= radius)
            .min_by(|(da, a), (db, b)| da.total_cmp(db).then(a.comid().cmp(&b.comid())));
        Ok(nearest.map(|(_, f)| f.clone()))
    }

    fn flowline(&self, comid: Comid) -> Result<Option<FlowlineSegment>, StoreError> {
        Ok(self.flowlines.get(&comid).cloned())
    }

    fn levelpath_segments(&self, levelpath: i64) -> Result<Vec<FlowlineSegment>, StoreError> {
        let mut chain: Vec<FlowlineSegment> = self
            .flowlines
            .values()
            .filter(|f| f.segment.levelpath == levelpath)
            .cloned()
            .collect();
        chain.sort_by(|a, b| b.segment.hydroseq.cmp(&a.segment.hydroseq));
        Ok(chain)
    }

    fn catchment_geometry(&self, comid: Comid) -> Result<Option<MultiPolygon<f64>>, StoreError> {
        Ok(self.catchments.get(&comid).cloned())
    }

    fn catchment_at(&self, point: &Point<f64>) -> Result<Option<Catchment>, StoreError> {
        Ok(self
            .catchments
            .iter()
            .find(|(_, polygon)| polygon.intersects(point))
            .map(|(comid, polygon)| Catchment { comid: *comid, geometry: polygon.clone() }))
    }

    fn features_for_source(&self, suffix: &str, identifier: Option<&str>)
        -> Result<Vec<Feature>, StoreError> {
        let sources = self.read_sources()?;
        Ok(self
            .features
            .iter()
            .filter(|row| row.source_suffix.eq_ignore_ascii_case(suffix))
            .filter(|row| identifier.is_none_or(|id| row.identifier == id))
            .filter_map(|row| self.to_feature(row, &sources))
            .collect())
    }

    fn features_near(&self, point: &Point<f64>, radius: f64, limit: usize)
        -> Result<Vec<Feature>, StoreError> {
        let sources = self.read_sources()?;
        let mut near: Vec<(f64, &FeatureRow)> = self
            .features
            .iter()
            .filter_map(|row| row.location.map(|loc| (loc.euclidean_distance(point), row)))
            .filter(|(d, _)| *d <= radius)
            .collect();
        near.sort_by(|(da, a), (db, b)| da.total_cmp(db).then(a.identifier.cmp(&b.identifier)));
        Ok(near
            .into_iter()
            .filter_map(|(_, row)| self.to_feature(row, &sources))
            .take(limit)
            .collect())
    }

    fn features_on_comids(&self, suffix: &str, comids: &[Comid])
        -> Result<Vec<Feature>, StoreError> {
        let sources = self.read_sources()?;
        Ok(self
            .features
            .iter()
            .filter(|row| row.source_suffix.eq_ignore_ascii_case(suffix))
            .filter(|row| row.position.is_some_and(|p| comids.contains(&p.comid)))
            .filter_map(|row| self.to_feature(row, &sources))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::demo_store;

    #[test]
    fn test_upstream_adjacency_is_derived_from_downstream_lists() {
        let store = demo_store();
        let ups: Vec<Comid> = store.upstream_neighbors(1002).unwrap().iter().map(|n| n.comid).collect();
        assert_eq!(ups, vec![1001, 2001]);
        assert!(store.upstream_neighbors(1001).unwrap().is_empty(), "1001 is a headwater");
    }

    #[test]
    fn test_downstream_keeps_primary_first() {
        let store = demo_store();
        assert_eq!(store.downstream_neighbors(1004).unwrap(), vec![1005, 4001]);
        assert!(store.downstream_neighbors(1006).unwrap().is_empty());
    }

    #[test]
    fn test_nearest_segment_respects_radius() {
        let store = demo_store();
        let p = Point::new(-89.49, 42.75);
        assert_eq!(store.nearest_segment(&p, 0.05).unwrap().unwrap().comid(), 1002);
        assert!(store.nearest_segment(&p, 0.001).unwrap().is_none());
    }

    #[test]
    fn test_levelpath_segments_are_upstream_first() {
        let store = demo_store();
        let chain: Vec<Comid> = store.levelpath_segments(100).unwrap().iter().map(|f| f.comid()).collect();
        assert_eq!(chain, vec![1001, 1002, 1003, 1004, 1005, 1006]);
    }

    #[test]
    fn test_features_for_source_is_case_insensitive() {
        let store = demo_store();
        let upper = store.features_for_source("WQP", None).unwrap();
        let lower = store.features_for_source("wqp", None).unwrap();
        assert!(!upper.is_empty());
        assert_eq!(upper, lower);
    }

    #[test]
    fn test_deactivated_source_is_no_longer_listed() {
        let store = demo_store();
        assert!(store.deactivate_source("huc12pp").unwrap());
        assert!(store.source_by_suffix("huc12pp").unwrap().is_none());
        assert!(!store.deactivate_source("huc12pp").unwrap());
    }

    #[test]
    fn test_feature_with_unknown_source_is_rejected() {
        let toml = r#"
            [[feature]]
            source = "nope"
            identifier = "x"
        "#;
        assert!(matches!(MemoryStore::from_toml_str(toml), Err(StoreError::Decode(_))));
    }

    #[test]
    fn test_single_vertex_flowline_is_rejected() {
        let toml = r#"
            [[flowline]]
            comid = 1
            levelpath = 1
            hydroseq = 1
            length_km = 1.0
            coordinates = [[0.0, 0.0]]
        "#;
        assert!(MemoryStore::from_toml_str(toml).is_err());
    }
}
