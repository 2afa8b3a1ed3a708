/// Core data types for the NLDI linked-data service.
///
/// Sources, features, network positions, flowline segments and catchments,
/// plus the service-wide error type. Everything here is a plain value:
/// records fetched from the store are read-only projections, and navigation
/// and basin results built from them are discarded after the response is
/// assembled.

use geo::{Geometry, LineString, MultiPolygon, Point};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// NHDPlus common identifier of one flowline segment.
pub type Comid = i64;

/// Suffix of the built-in pseudo-source addressing flowlines by comid.
pub const COMID_SOURCE: &str = "comid";

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// How a source's features are attached to the network by the crawler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestType {
    Point,
    Reach,
    Varies,
}

impl IngestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestType::Point => "point",
            IngestType::Reach => "reach",
            IngestType::Varies => "varies",
        }
    }

    /// Parses the stored column value, ignoring case.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "point" => Some(IngestType::Point),
            "reach" => Some(IngestType::Reach),
            "varies" => Some(IngestType::Varies),
            _ => None,
        }
    }
}

/// One external dataset definition (a row of `nldi_data.crawler_source`).
///
/// `feature_*` fields name the attributes of the upstream dataset that
/// carry the identifier, name, uri, reachcode and measure of each feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub crawler_source_id: i32,
    pub source_name: String,
    pub source_suffix: String,
    pub source_uri: String,
    pub feature_id: String,
    pub feature_name: String,
    pub feature_uri: String,
    #[serde(default)]
    pub feature_reach: Option<String>,
    #[serde(default)]
    pub feature_measure: Option<String>,
    pub ingest_type: IngestType,
    pub feature_type: String,
}

impl Source {
    /// Case-insensitive suffix comparison.
    pub fn matches_suffix(&self, suffix: &str) -> bool {
        self.source_suffix.eq_ignore_ascii_case(suffix)
    }
}

// ---------------------------------------------------------------------------
// Network positions
// ---------------------------------------------------------------------------

/// A location on the stream network.
///
/// `measure` is the percentage of the segment's length from its upstream
/// end, always within [0, 100].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NetworkPosition {
    pub comid: Comid,
    pub measure: f64,
}

impl NetworkPosition {
    pub fn new(comid: Comid, measure: f64) -> Self {
        NetworkPosition {
            comid,
            measure: clamp_measure(measure),
        }
    }

    /// Position at the downstream end of a segment. Used for features of
    /// the `comid` pseudo-source, which stand for the whole flowline.
    pub fn at_downstream_end(comid: Comid) -> Self {
        NetworkPosition { comid, measure: 100.0 }
    }
}

/// Clamps a measure into [0, 100]; NaN collapses to the upstream end.
pub fn clamp_measure(measure: f64) -> f64 {
    if measure.is_nan() {
        0.0
    } else {
        measure.clamp(0.0, 100.0)
    }
}

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// One record from a source, or a flowline exposed through `comid`.
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub identifier: String,
    pub name: Option<String>,
    pub uri: Option<String>,
    pub source_suffix: String,
    pub source_name: String,
    pub reachcode: Option<String>,
    /// Point location for source features, the flowline for `comid`.
    pub geometry: Option<Geometry<f64>>,
    /// `None` until the feature has been indexed onto the network.
    pub position: Option<NetworkPosition>,
}

impl Feature {
    pub fn location(&self) -> Option<Point<f64>> {
        match &self.geometry {
            Some(Geometry::Point(p)) => Some(*p),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Network topology
// ---------------------------------------------------------------------------

/// Topological attributes of one flowline, without geometry.
/// This is what the traversal walks over.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub comid: Comid,
    pub levelpath: i64,
    pub hydroseq: i64,
    pub length_km: f64,
    pub terminal: bool,
    pub reachcode: Option<String>,
}

/// A segment together with its polyline, digitized upstream to downstream.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowlineSegment {
    pub segment: Segment,
    pub geometry: LineString<f64>,
}

impl FlowlineSegment {
    pub fn comid(&self) -> Comid {
        self.segment.comid
    }
}

/// An upstream neighbour as seen from the segment it flows into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpstreamNeighbor {
    pub comid: Comid,
    pub levelpath: i64,
}

/// Local drainage polygon of one segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Catchment {
    pub comid: Comid,
    pub geometry: MultiPolygon<f64>,
}

/// All segments sharing one levelpath, upstream first.
#[derive(Debug, Clone, PartialEq)]
pub struct Mainstem {
    pub levelpath: i64,
    pub segments: Vec<FlowlineSegment>,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors surfaced by the linked-data operations.
///
/// Store failures never carry their internal detail here; they are logged at
/// the store boundary and collapse into `BackingStoreUnavailable`.
#[derive(Debug, Clone, PartialEq)]
pub enum NldiError {
    /// No registered source has this suffix.
    SourceNotFound(String),
    /// The source exists but has no feature with this identifier.
    FeatureNotFound { source: String, identifier: String },
    /// No catchment polygon for the requested comid or location.
    CatchmentNotFound(String),
    /// No network segment within the search radius of the point, or the
    /// start position does not lie on a known segment.
    PositionUnresolvable(String),
    /// Navigation mode code is not one of UM/UT/DM/DD.
    InvalidNavigationMode(String),
    /// Malformed point input.
    InvalidCoordinates(String),
    /// Malformed request parameter other than coordinates.
    InvalidParameter(String),
    /// Source definition rejected by administration or registry load.
    InvalidSource(String),
    /// The handler does not offer this capability.
    UnsupportedOperation(String),
    /// The store could not be reached, even after a reconnect.
    BackingStoreUnavailable,
    /// The request deadline passed while walking the network.
    DeadlineExceeded,
}

impl NldiError {
    /// HTTP status the routing layer answers with.
    pub fn status_code(&self) -> u16 {
        match self {
            NldiError::SourceNotFound(_)
            | NldiError::FeatureNotFound { .. }
            | NldiError::CatchmentNotFound(_)
            | NldiError::PositionUnresolvable(_) => 404,
            NldiError::InvalidNavigationMode(_)
            | NldiError::InvalidCoordinates(_)
            | NldiError::InvalidParameter(_)
            | NldiError::InvalidSource(_)
            | NldiError::UnsupportedOperation(_) => 400,
            NldiError::BackingStoreUnavailable | NldiError::DeadlineExceeded => 503,
        }
    }

    /// Stable machine-readable name of the error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            NldiError::SourceNotFound(_) => "SourceNotFound",
            NldiError::FeatureNotFound { .. } => "FeatureNotFound",
            NldiError::CatchmentNotFound(_) => "CatchmentNotFound",
            NldiError::PositionUnresolvable(_) => "PositionUnresolvable",
            NldiError::InvalidNavigationMode(_) => "InvalidNavigationMode",
            NldiError::InvalidCoordinates(_) => "InvalidCoordinates",
            NldiError::InvalidParameter(_) => "InvalidParameter",
            NldiError::InvalidSource(_) => "InvalidSource",
            NldiError::UnsupportedOperation(_) => "UnsupportedOperation",
            NldiError::BackingStoreUnavailable => "BackingStoreUnavailable",
            NldiError::DeadlineExceeded => "DeadlineExceeded",
        }
    }
}

impl std::fmt::Display for NldiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NldiError::SourceNotFound(suffix) => write!(f, "Source not found: {}", suffix),
            NldiError::FeatureNotFound { source, identifier } => {
                write!(f, "Feature {} not found in source {}", identifier, source)
            }
            NldiError::CatchmentNotFound(what) => write!(f, "Catchment not found: {}", what),
            NldiError::PositionUnresolvable(msg) => {
                write!(f, "Unable to resolve network position: {}", msg)
            }
            NldiError::InvalidNavigationMode(mode) => write!(
                f,
                "Invalid navigation mode '{}': expected one of UM, UT, DM, DD",
                mode
            ),
            NldiError::InvalidCoordinates(msg) => write!(f, "Invalid coordinates: {}", msg),
            NldiError::InvalidParameter(msg) => write!(f, "Invalid parameter: {}", msg),
            NldiError::InvalidSource(msg) => write!(f, "Invalid source definition: {}", msg),
            NldiError::UnsupportedOperation(msg) => write!(f, "Unsupported operation: {}", msg),
            NldiError::BackingStoreUnavailable => {
                write!(f, "Backing store unavailable, try again later")
            }
            NldiError::DeadlineExceeded => write!(f, "Request deadline exceeded"),
        }
    }
}

impl std::error::Error for NldiError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_position_clamps_measure() {
        assert_eq!(NetworkPosition::new(1, -3.0).measure, 0.0);
        assert_eq!(NetworkPosition::new(1, 140.0).measure, 100.0);
        assert_eq!(NetworkPosition::new(1, 47.5).measure, 47.5);
        assert_eq!(NetworkPosition::new(1, f64::NAN).measure, 0.0);
    }

    #[test]
    fn test_source_suffix_match_ignores_case() {
        let source = Source {
            crawler_source_id: 1,
            source_name: "Water Quality Portal".to_string(),
            source_suffix: "WQP".to_string(),
            source_uri: "https://www.waterqualitydata.us/data/Station/search".to_string(),
            feature_id: "MonitoringLocationIdentifier".to_string(),
            feature_name: "MonitoringLocationName".to_string(),
            feature_uri: "siteUrl".to_string(),
            feature_reach: None,
            feature_measure: None,
            ingest_type: IngestType::Point,
            feature_type: "varies".to_string(),
        };
        assert!(source.matches_suffix("wqp"));
        assert!(source.matches_suffix("WqP"));
        assert!(!source.matches_suffix("wqx"));
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(NldiError::SourceNotFound("x".into()).status_code(), 404);
        assert_eq!(
            NldiError::FeatureNotFound { source: "wqp".into(), identifier: "x".into() }.status_code(),
            404
        );
        assert_eq!(NldiError::PositionUnresolvable("x".into()).status_code(), 404);
        assert_eq!(NldiError::InvalidNavigationMode("XX".into()).status_code(), 400);
        assert_eq!(NldiError::InvalidCoordinates("x".into()).status_code(), 400);
        assert_eq!(NldiError::BackingStoreUnavailable.status_code(), 503);
    }

    #[test]
    fn test_store_unavailable_message_hides_detail() {
        let msg = NldiError::BackingStoreUnavailable.to_string();
        assert!(!msg.contains("postgres"));
        assert!(!msg.contains("password"));
    }

    #[test]
    fn test_ingest_type_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&IngestType::Reach).unwrap(), "\"reach\"");
        let parsed: IngestType = serde_json::from_str("\"point\"").unwrap();
        assert_eq!(parsed, IngestType::Point);
        assert_eq!(IngestType::parse(" Reach "), Some(IngestType::Reach));
        assert_eq!(IngestType::parse("polygon"), None);
    }
}
