/// Backing spatial/network store contract.
///
/// The core never owns topology or spatial indexes; it asks the store.
/// `FlowNetwork` is the adjacency-lookup slice of the contract the traversal
/// walks over; `NetworkStore` adds sources, features, geometry and catchments.
///
/// Implementations:
/// - `pg::PgNetworkStore`       — NLDI PostGIS database (`nldi_data`, `nhdplus`)
/// - `memory::MemoryStore`      — TOML fixture networks (tests, `--fixture` runs)

pub mod memory;
pub mod pg;

use geo::{MultiPolygon, Point};
use tracing::error;

use crate::model::{
    Catchment, Comid, Feature, FlowlineSegment, NldiError, Segment, Source, UpstreamNeighbor,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures at the store boundary. These carry internal detail and are only
/// ever logged; callers see `NldiError::BackingStoreUnavailable`.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// Connection could not be established or was lost (after one retry).
    Unavailable(String),
    /// The store answered with an error for this query.
    Query(String),
    /// A row or geometry could not be decoded.
    Decode(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Unavailable(msg) => write!(f, "Store unavailable: {}", msg),
            StoreError::Query(msg) => write!(f, "Store query failed: {}", msg),
            StoreError::Decode(msg) => write!(f, "Store decode failed: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<StoreError> for NldiError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "backing store failure");
        NldiError::BackingStoreUnavailable
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// Adjacency lookups over the directed flowline graph.
pub trait FlowNetwork: Send + Sync {
    /// Topological attributes of one segment.
    fn segment(&self, comid: Comid) -> Result<Option<Segment>, StoreError>;

    /// Segments flowing into `comid`, on any path (main or minor).
    fn upstream_neighbors(&self, comid: Comid) -> Result<Vec<UpstreamNeighbor>, StoreError>;

    /// Segments `comid` flows into. Empty when terminal; the primary
    /// (main path) neighbour comes first, diversions follow.
    fn downstream_neighbors(&self, comid: Comid) -> Result<Vec<Comid>, StoreError>;
}

/// Full query contract consumed by the registry, handlers and resolvers.
pub trait NetworkStore: FlowNetwork {
    /// Active sources, ordered by `crawler_source_id`.
    fn list_sources(&self) -> Result<Vec<Source>, StoreError>;

    fn source_by_suffix(&self, suffix: &str) -> Result<Option<Source>, StoreError>;

    /// Inserts or replaces a source keyed by `crawler_source_id`.
    fn upsert_source(&self, source: &Source) -> Result<(), StoreError>;

    /// Removes a source from the active set. Returns false if it was unknown.
    fn deactivate_source(&self, suffix: &str) -> Result<bool, StoreError>;

    /// Closest flowline to `point` among those within `radius` degrees.
    fn nearest_segment(&self, point: &Point<f64>, radius: f64)
        -> Result<Option<FlowlineSegment>, StoreError>;

    fn flowline(&self, comid: Comid) -> Result<Option<FlowlineSegment>, StoreError>;

    /// All flowlines of a levelpath, ordered by descending hydrologic
    /// sequence (upstream first).
    fn levelpath_segments(&self, levelpath: i64) -> Result<Vec<FlowlineSegment>, StoreError>;

    fn catchment_geometry(&self, comid: Comid) -> Result<Option<MultiPolygon<f64>>, StoreError>;

    /// Catchment whose polygon covers `point`.
    fn catchment_at(&self, point: &Point<f64>) -> Result<Option<Catchment>, StoreError>;

    /// Features of a source, optionally narrowed to one identifier.
    fn features_for_source(&self, suffix: &str, identifier: Option<&str>)
        -> Result<Vec<Feature>, StoreError>;

    /// Features of any source within `radius` degrees, nearest first.
    fn features_near(&self, point: &Point<f64>, radius: f64, limit: usize)
        -> Result<Vec<Feature>, StoreError>;

    /// Features of one source indexed onto any of `comids`.
    fn features_on_comids(&self, suffix: &str, comids: &[Comid])
        -> Result<Vec<Feature>, StoreError>;
}
