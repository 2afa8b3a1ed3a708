/// Integration tests against a live NLDI database
///
/// These check the service against the published NLDI dataset: source
/// listings, feature lookups and hydrolocation results with known answers.
///
/// Prerequisites:
/// - PostgreSQL with the NLDI database restored (nldi_data, nhdplus schemas)
/// - DATABASE_URL set in .env
///
/// Run with: cargo test --test linked_data_integration -- --ignored --test-threads=1

use nldi_service::config::NavigationConfig;
use nldi_service::db;
use nldi_service::handlers::Handler;
use nldi_service::service::{LinkedData, NavigationRequest};
use nldi_service::store::pg::PgNetworkStore;
use std::sync::Arc;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn live_service() -> LinkedData {
    let pool = db::connect_pool_from_env(4).expect("DATABASE_URL must point at an NLDI database");
    LinkedData::new(Arc::new(PgNetworkStore::new(pool)), NavigationConfig::default())
        .expect("crawler sources load")
}

// ---------------------------------------------------------------------------
// Sources and features
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn test_wqp_source_has_many_features() {
    let service = live_service();
    let features = service.handlers().feature.get_all("wqp").expect("wqp listing");
    assert!(features.len() > 1100, "only {} wqp features", features.len());
}

#[test]
#[ignore]
fn test_get_feature_by_identifier() {
    let service = live_service();
    let feature = service.get_feature("wqp", "USGS-05427930").expect("known WQP site");
    assert_eq!(feature.identifier, "USGS-05427930");
    assert!(feature.position.is_some());
}

#[test]
#[ignore]
fn test_comid_source_is_listed_first() {
    let sources = live_service().list_sources();
    assert_eq!(sources[0].suffix, "comid");
    assert!(sources.iter().any(|s| s.suffix.eq_ignore_ascii_case("wqp")));
}

// ---------------------------------------------------------------------------
// Hydrolocation and navigation
// ---------------------------------------------------------------------------

#[test]
#[ignore]
fn test_hydrolocation_reference_point() {
    let service = live_service();
    let hydro = service
        .hydrolocation("POINT(-89.22401470690966 42.82769689708948)")
        .expect("reference point resolves");
    assert_eq!(hydro.indexed.position.comid, 13297332);
    assert!(
        (hydro.indexed.position.measure - 47.242818).abs() < 1e-6,
        "measure was {}",
        hydro.indexed.position.measure
    );
    assert_eq!(hydro.provided.x(), -89.22401470690966);
}

#[test]
#[ignore]
fn test_upstream_main_navigation_from_reference_comid() {
    let service = live_service();
    let result = service
        .navigate_flowlines(&NavigationRequest {
            source: "comid",
            identifier: "13297332",
            mode: "UM",
            distance_km: Some(50.0),
        })
        .expect("navigation succeeds");
    assert_eq!(result.navigation.comids()[0], 13297332);
    assert!(!result.flowlines.is_empty());
}
