/// Shared setup for the fixture-backed integration tests.

use nldi_service::config::NavigationConfig;
use nldi_service::response::Links;
use nldi_service::service::LinkedData;
use nldi_service::store::memory::MemoryStore;
use std::sync::Arc;

pub const DEMO_NETWORK: &str = "fixtures/demo_network.toml";

pub fn demo_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::from_toml_file(DEMO_NETWORK).expect("fixtures/demo_network.toml loads"))
}

pub fn demo_service() -> LinkedData {
    LinkedData::new(demo_store(), NavigationConfig::default()).expect("registry loads from fixture")
}

#[allow(dead_code)]
pub fn links() -> Links {
    Links::new("http://localhost:8080/api/nldi")
}
