//! NLDI Service - linked-data API daemon
//!
//! Serves the Network Linked Data Index over HTTP:
//! 1. Loads nldi.toml and sets up logging
//! 2. Opens the NLDI PostgreSQL database (or a TOML fixture network)
//! 3. Loads the crawler source registry
//! 4. Answers linked-data, navigation, basin and hydrolocation requests
//!
//! Usage:
//!   cargo run --release                                   # nldi.toml, DATABASE_URL
//!   cargo run --release -- --config /etc/nldi/nldi.toml
//!   cargo run --release -- --fixture fixtures/demo_network.toml --port 8081
//!
//! Environment:
//!   DATABASE_URL - PostgreSQL connection string (name set by database.url_env)
//!   RUST_LOG     - overrides logging.filter

use nldi_service::config::{load_config, NldiConfig};
use nldi_service::db;
use nldi_service::endpoint::{self, EndpointState};
use nldi_service::logging::init_logging;
use nldi_service::response::Links;
use nldi_service::service::LinkedData;
use nldi_service::store::memory::MemoryStore;
use nldi_service::store::pg::PgNetworkStore;
use nldi_service::store::NetworkStore;
use std::env;
use std::sync::Arc;
use tracing::info;

fn usage(program: &str) -> String {
    format!("Usage: {} [--config PATH] [--fixture PATH] [--port PORT]", program)
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("\nStartup failed: {}\n", message);
    std::process::exit(1);
}

fn open_store(config: &NldiConfig, fixture: Option<&str>) -> Arc<dyn NetworkStore> {
    match fixture {
        Some(path) => {
            let store = MemoryStore::from_toml_file(path).unwrap_or_else(|e| fail(e));
            info!(fixture = path, "serving fixture network");
            Arc::new(store)
        }
        None => {
            let pool = db::connect_and_verify(&config.database).unwrap_or_else(|e| fail(e));
            Arc::new(PgNetworkStore::new(pool))
        }
    }
}

fn main() {
    // Parse command-line arguments
    let args: Vec<String> = env::args().collect();
    let mut config_path = "nldi.toml".to_string();
    let mut fixture: Option<String> = None;
    let mut port: Option<u16> = None;

    let mut i = 1;
    while i < args.len() {
        let value = args.get(i + 1);
        match (args[i].as_str(), value) {
            ("--config", Some(path)) => config_path = path.clone(),
            ("--fixture", Some(path)) => fixture = Some(path.clone()),
            ("--port", Some(p)) => match p.parse() {
                Ok(p) => port = Some(p),
                Err(_) => fail(format!("--port expects a port number, got '{}'", p)),
            },
            (flag @ ("--config" | "--fixture" | "--port"), None) => {
                fail(format!("{} requires a value\n{}", flag, usage(&args[0])))
            }
            (other, _) => fail(format!("unknown argument '{}'\n{}", other, usage(&args[0]))),
        }
        i += 2;
    }

    let mut config = load_config(&config_path).unwrap_or_else(|e| fail(e));
    if let Some(port) = port {
        config.server.port = port;
    }
    init_logging(&config.logging);
    info!(config = %config_path, "NLDI service starting");

    let store = open_store(&config, fixture.as_deref());
    let service = LinkedData::new(store, config.navigation.clone()).unwrap_or_else(|e| fail(e));

    let state = Arc::new(EndpointState {
        service,
        links: Links::new(&config.server.base_url),
        enable_admin: config.server.enable_admin,
    });

    if let Err(e) = endpoint::start_endpoint_server(&config.server, state) {
        fail(e);
    }
}
