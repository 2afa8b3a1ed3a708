/// GeoJSON response assembly.
///
/// Turns service results into the JSON bodies the endpoint writes. Feature
/// properties follow the linked-data conventions: identifiers, comids and
/// measures of the `provided` hydrolocation record are strings, and every
/// feature carries a `navigation` link back into the API.

use serde_json::{json, Map, Value};

use crate::basin::Basin;
use crate::geometry::GeoJsonGeometry;
use crate::hydrolocation::{Hydrolocation, LocationRecord};
use crate::model::{Catchment, Feature, FlowlineSegment, Mainstem, NldiError, Source, COMID_SOURCE};
use crate::navigation::NavigationMode;
use crate::service::{HealthStatus, NavigatedFeatures, NavigatedFlowlines, SourceEntry};

const INDEXED_SOURCE_NAME: &str = "Automatically indexed by the NLDI";
const PROVIDED_SOURCE_NAME: &str = "Provided via API call";

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

/// Builds absolute URLs below the public service root.
#[derive(Debug, Clone, PartialEq)]
pub struct Links {
    base_url: String,
}

impl Links {
    pub fn new(base_url: &str) -> Self {
        Links {
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// `/linked-data/...` with each segment percent-encoded.
    pub fn linked_data(&self, segments: &[&str]) -> String {
        let encoded: Vec<String> = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        self.url(&format!("linked-data/{}", encoded.join("/")))
    }

    pub fn navigation(&self, source: &str, identifier: &str) -> String {
        self.linked_data(&[&source.to_lowercase(), identifier, "navigation"])
    }

    pub fn navigation_mode(&self, source: &str, identifier: &str, mode: NavigationMode) -> String {
        self.linked_data(&[&source.to_lowercase(), identifier, "navigation", mode.code()])
    }
}

// ---------------------------------------------------------------------------
// Building blocks
// ---------------------------------------------------------------------------

fn geometry_value(geometry: Option<GeoJsonGeometry>) -> Value {
    geometry.map_or(Value::Null, |g| json!(g))
}

fn geo_feature(geometry: Option<GeoJsonGeometry>, properties: Map<String, Value>) -> Value {
    json!({
        "type": "Feature",
        "geometry": geometry_value(geometry),
        "properties": Value::Object(properties),
    })
}

/// FeatureCollection; `truncated` is only written when set.
pub fn feature_collection_json(features: Vec<Value>, truncated: bool) -> Value {
    let mut collection = Map::new();
    collection.insert("type".to_string(), json!("FeatureCollection"));
    collection.insert("features".to_string(), Value::Array(features));
    if truncated {
        collection.insert("truncated".to_string(), json!(true));
    }
    Value::Object(collection)
}

fn flowline_feature(flowline: &FlowlineSegment) -> Value {
    let mut properties = Map::new();
    properties.insert("nhdplus_comid".to_string(), json!(flowline.comid().to_string()));
    geo_feature(Some(GeoJsonGeometry::from_line_string(&flowline.geometry)), properties)
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

pub fn sources_json(links: &Links, entries: &[SourceEntry]) -> Value {
    Value::Array(
        entries
            .iter()
            .map(|entry| {
                json!({
                    "source": entry.suffix.to_lowercase(),
                    "sourceName": entry.name,
                    "features": links.linked_data(&[&entry.suffix.to_lowercase()]),
                })
            })
            .collect(),
    )
}

pub fn feature_json(links: &Links, feature: &Feature) -> Value {
    let mut properties = Map::new();
    properties.insert("identifier".to_string(), json!(feature.identifier));
    properties.insert(
        "navigation".to_string(),
        json!(links.navigation(&feature.source_suffix, &feature.identifier)),
    );
    properties.insert("measure".to_string(), json!(feature.position.map(|p| p.measure)));
    properties.insert("reachcode".to_string(), json!(feature.reachcode));
    properties.insert("name".to_string(), json!(feature.name));
    properties.insert("source".to_string(), json!(feature.source_suffix));
    properties.insert("sourceName".to_string(), json!(feature.source_name));
    properties.insert(
        "comid".to_string(),
        json!(feature.position.map(|p| p.comid.to_string())),
    );
    properties.insert("uri".to_string(), json!(feature.uri));

    let geometry = feature.geometry.as_ref().and_then(GeoJsonGeometry::from_geometry);
    geo_feature(geometry, properties)
}

pub fn features_json(links: &Links, features: &[Feature]) -> Value {
    feature_collection_json(features.iter().map(|f| feature_json(links, f)).collect(), false)
}

pub fn navigated_features_json(links: &Links, result: &NavigatedFeatures) -> Value {
    feature_collection_json(
        result.features.iter().map(|f| feature_json(links, f)).collect(),
        result.navigation.truncated,
    )
}

pub fn navigated_flowlines_json(result: &NavigatedFlowlines) -> Value {
    feature_collection_json(
        result.flowlines.iter().map(flowline_feature).collect(),
        result.navigation.truncated,
    )
}

pub fn flowline_json(flowline: &FlowlineSegment) -> Value {
    feature_collection_json(vec![flowline_feature(flowline)], false)
}

/// `{"upstreamMain": ".../navigation/UM", ...}`
pub fn modes_json(links: &Links, source: &str, identifier: &str, modes: &[NavigationMode]) -> Value {
    let mut listing = Map::new();
    for mode in modes {
        listing.insert(
            mode.name().to_string(),
            json!(links.navigation_mode(source, identifier, *mode)),
        );
    }
    Value::Object(listing)
}

/// Flowlines first, then one entry per registered source.
pub fn data_sources_json(
    links: &Links,
    source: &str,
    identifier: &str,
    mode: NavigationMode,
    entries: &[SourceEntry],
) -> Value {
    let base = links.navigation_mode(source, identifier, mode);
    let flowlines = json!({
        "source": "Flowlines",
        "sourceName": "NHDPlus flowlines",
        "features": format!("{}/flowlines", base),
    });
    Value::Array(
        std::iter::once(flowlines)
            .chain(entries.iter().map(|entry| {
                let suffix = entry.suffix.to_lowercase();
                json!({
                    "source": suffix,
                    "sourceName": entry.name,
                    "features": format!("{}/{}", base, urlencoding::encode(&suffix)),
                })
            }))
            .collect(),
    )
}

/// Segments upstream that had no catchment are listed so an incomplete
/// polygon can be told apart from a complete one.
pub fn basin_json(basin: &Basin) -> Value {
    let mut properties = Map::new();
    if !basin.missing_catchments.is_empty() {
        let missing: Vec<String> = basin.missing_catchments.iter().map(|c| c.to_string()).collect();
        properties.insert("missingCatchments".to_string(), json!(missing));
    }
    let geometry = GeoJsonGeometry::from_multi_polygon(&basin.geometry);
    feature_collection_json(vec![geo_feature(Some(geometry), properties)], false)
}

pub fn mainstem_json(mainstem: &Mainstem) -> Value {
    let features = mainstem
        .segments
        .iter()
        .map(|flowline| {
            let mut properties = Map::new();
            properties.insert("nhdplus_comid".to_string(), json!(flowline.comid().to_string()));
            properties.insert("levelpath".to_string(), json!(mainstem.levelpath.to_string()));
            geo_feature(Some(GeoJsonGeometry::from_line_string(&flowline.geometry)), properties)
        })
        .collect();
    feature_collection_json(features, false)
}

pub fn catchment_json(catchment: &Catchment) -> Value {
    let mut properties = Map::new();
    properties.insert("nhdplus_comid".to_string(), json!(catchment.comid.to_string()));
    let geometry = GeoJsonGeometry::from_multi_polygon(&catchment.geometry);
    feature_collection_json(vec![geo_feature(Some(geometry), properties)], false)
}

/// Indexed record first, then the caller's point.
pub fn hydrolocation_json(links: &Links, hydrolocation: Hydrolocation) -> Value {
    let features = hydrolocation
        .into_records()
        .into_iter()
        .map(|record| {
            let mut properties = Map::new();
            properties.insert("identifier".to_string(), json!(""));
            properties.insert("name".to_string(), json!(""));
            properties.insert("uri".to_string(), json!(""));
            properties.insert("source".to_string(), json!(record.label()));
            match record {
                LocationRecord::Indexed(indexed) => {
                    let comid = indexed.position.comid.to_string();
                    properties.insert(
                        "navigation".to_string(),
                        json!(links.navigation(COMID_SOURCE, &comid)),
                    );
                    properties.insert("measure".to_string(), json!(indexed.position.measure));
                    properties.insert("reachcode".to_string(), json!(indexed.reachcode.unwrap_or_default()));
                    properties.insert("sourceName".to_string(), json!(INDEXED_SOURCE_NAME));
                    properties.insert("comid".to_string(), json!(comid));
                    properties.insert("type".to_string(), json!("hydrolocation"));
                    geo_feature(Some(GeoJsonGeometry::from_point(&indexed.point)), properties)
                }
                LocationRecord::Provided(point) => {
                    properties.insert("navigation".to_string(), json!(""));
                    properties.insert("measure".to_string(), json!(""));
                    properties.insert("reachcode".to_string(), json!(""));
                    properties.insert("sourceName".to_string(), json!(PROVIDED_SOURCE_NAME));
                    properties.insert("comid".to_string(), json!(""));
                    properties.insert("type".to_string(), json!("point"));
                    geo_feature(Some(GeoJsonGeometry::from_point(&point)), properties)
                }
            }
        })
        .collect();
    feature_collection_json(features, false)
}

pub fn source_json(source: &Source) -> Value {
    json!(source)
}

pub fn health_json(health: &HealthStatus) -> Value {
    json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "sources": health.sources,
        "registry_loaded_at": health.registry_loaded_at.to_rfc3339(),
    })
}

pub fn error_json(error: &NldiError) -> Value {
    json!({
        "error": error.kind(),
        "message": error.to_string(),
        "status": error.status_code(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hydrolocation::IndexedLocation;
    use crate::model::NetworkPosition;
    use geo::{Geometry, Point};

    fn links() -> Links {
        Links::new("https://example.org/api/nldi/")
    }

    fn wqp_feature() -> Feature {
        Feature {
            identifier: "USGS-05430000".to_string(),
            name: Some("Yahara River".to_string()),
            uri: None,
            source_suffix: "WQP".to_string(),
            source_name: "Water Quality Portal".to_string(),
            reachcode: Some("07090002000105".to_string()),
            geometry: Some(Geometry::Point(Point::new(-89.5, 42.45))),
            position: Some(NetworkPosition::new(1005, 50.0)),
        }
    }

    #[test]
    fn test_links_join_and_encode() {
        let links = links();
        assert_eq!(links.url("/health"), "https://example.org/api/nldi/health");
        assert_eq!(
            links.linked_data(&["wqp", "A B/1"]),
            "https://example.org/api/nldi/linked-data/wqp/A%20B%2F1"
        );
    }

    #[test]
    fn test_feature_properties() {
        let value = feature_json(&links(), &wqp_feature());
        let props = &value["properties"];
        assert_eq!(props["identifier"], "USGS-05430000");
        assert_eq!(props["comid"], "1005");
        assert_eq!(props["measure"], 50.0);
        assert_eq!(
            props["navigation"],
            "https://example.org/api/nldi/linked-data/wqp/USGS-05430000/navigation"
        );
        assert_eq!(value["geometry"]["type"], "Point");
    }

    #[test]
    fn test_unindexed_feature_has_null_position_fields() {
        let mut feature = wqp_feature();
        feature.position = None;
        feature.geometry = None;
        let value = feature_json(&links(), &feature);
        assert!(value["properties"]["comid"].is_null());
        assert!(value["geometry"].is_null());
    }

    #[test]
    fn test_truncated_flag_only_when_set() {
        assert!(feature_collection_json(vec![], false).get("truncated").is_none());
        assert_eq!(feature_collection_json(vec![], true)["truncated"], true);
    }

    #[test]
    fn test_modes_listing() {
        let value = modes_json(&links(), "comid", "1004", &NavigationMode::ALL);
        let listing = value.as_object().unwrap();
        assert_eq!(listing.len(), 4);
        for code in ["UM", "UT", "DM", "DD"] {
            assert!(listing.values().any(|url| url.as_str().unwrap().ends_with(code)));
        }
        assert!(listing["upstreamTributaries"].as_str().unwrap().ends_with("/navigation/UT"));
    }

    #[test]
    fn test_data_sources_start_with_flowlines() {
        let entries = vec![SourceEntry {
            suffix: "WQP".to_string(),
            name: "Water Quality Portal".to_string(),
        }];
        let value = data_sources_json(&links(), "comid", "1004", NavigationMode::UpstreamMain, &entries);
        assert_eq!(value[0]["source"], "Flowlines");
        assert!(value[0]["features"].as_str().unwrap().ends_with("/navigation/UM/flowlines"));
        assert!(value[1]["features"].as_str().unwrap().ends_with("/navigation/UM/wqp"));
    }

    #[test]
    fn test_hydrolocation_records_in_order() {
        let hydro = Hydrolocation {
            indexed: IndexedLocation {
                position: NetworkPosition::new(1002, 10.0),
                reachcode: None,
                point: Point::new(-89.5, 42.79),
            },
            provided: Point::new(-89.49, 42.79),
        };
        let value = hydrolocation_json(&links(), hydro);
        let features = value["features"].as_array().unwrap();
        assert_eq!(features.len(), 2);
        assert_eq!(features[0]["properties"]["source"], "indexed");
        assert_eq!(features[0]["properties"]["comid"], "1002");
        assert_eq!(features[0]["properties"]["measure"], 10.0);
        assert_eq!(features[1]["properties"]["source"], "provided");
        assert_eq!(features[1]["properties"]["comid"], "");
        assert_eq!(features[1]["geometry"]["coordinates"][0], -89.49);
    }

    #[test]
    fn test_error_body() {
        let value = error_json(&NldiError::InvalidNavigationMode("XX".to_string()));
        assert_eq!(value["error"], "InvalidNavigationMode");
        assert_eq!(value["status"], 400);
    }

    #[test]
    fn test_basin_lists_missing_catchments() {
        use geo::polygon;
        let square = polygon![(x: 0.0, y: 0.0), (x: 1.0, y: 0.0), (x: 1.0, y: 1.0), (x: 0.0, y: 1.0)];
        let mut basin = Basin {
            origin: NetworkPosition::new(1005, 100.0),
            comids: vec![1005],
            missing_catchments: vec![4002],
            geometry: geo::MultiPolygon::new(vec![square]),
            simplified: false,
        };
        let value = basin_json(&basin);
        assert_eq!(value["features"][0]["properties"]["missingCatchments"], json!(["4002"]));

        basin.missing_catchments.clear();
        let value = basin_json(&basin);
        assert!(value["features"][0]["properties"].get("missingCatchments").is_none());
    }
}
