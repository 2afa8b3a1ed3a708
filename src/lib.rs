/// nldi_service: Network Linked Data Index over the NHDPlus stream network.
///
/// # Module structure
///
/// ```text
/// nldi_service
/// ├── model         — shared data types (Source, Feature, Segment, NldiError, …)
/// ├── geometry      — WKT points, GeoJSON geometry, linear referencing
/// ├── config        — service configuration loader (nldi.toml)
/// ├── db            — connection pool and schema validation
/// ├── logging       — tracing subscriber setup
/// ├── store
/// │   ├── pg        — NLDI PostgreSQL/PostGIS queries
/// │   └── memory    — TOML fixture networks
/// ├── registry      — crawler source registry with atomic reload
/// ├── hydrolocation — snapping points onto the network
/// ├── navigation    — UM/UT/DM/DD traversal
/// ├── basin         — upstream catchment union
/// ├── handlers      — feature, catchment, flowline, mainstem, crawler_source
/// ├── service       — LinkedData operations and the navigation state machine
/// ├── response      — GeoJSON response bodies
/// └── endpoint      — HTTP routing and server
/// ```

/// Public modules
pub mod basin;
pub mod config;
pub mod db;
pub mod endpoint;
pub mod geometry;
pub mod handlers;
pub mod hydrolocation;
pub mod logging;
pub mod model;
pub mod navigation;
pub mod registry;
pub mod response;
pub mod service;
pub mod store;

#[cfg(test)]
mod fixtures;
