/// Test fixtures: the demo stream network and small builders.
///
/// `fixtures/demo_network.toml` is a twelve-segment basin with two
/// confluences, a diversion that rejoins the main stem, a terminal outlet
/// and one segment without a catchment. See the file header for the layout.

use crate::model::{IngestType, Source};
use crate::store::memory::MemoryStore;

pub(crate) const DEMO_NETWORK_TOML: &str = include_str!("../fixtures/demo_network.toml");

pub(crate) fn demo_store() -> MemoryStore {
    MemoryStore::from_toml_str(DEMO_NETWORK_TOML).expect("demo network fixture parses")
}

/// Minimal point-ingest source with the given id and suffix.
pub(crate) fn sample_source(id: i32, suffix: &str) -> Source {
    Source {
        crawler_source_id: id,
        source_name: format!("Sample {}", suffix),
        source_suffix: suffix.to_string(),
        source_uri: format!("https://example.org/{}.geojson", suffix),
        feature_id: "id".to_string(),
        feature_name: "name".to_string(),
        feature_uri: "uri".to_string(),
        feature_reach: None,
        feature_measure: None,
        ingest_type: IngestType::Point,
        feature_type: "point".to_string(),
    }
}
