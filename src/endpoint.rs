/// HTTP endpoint for the linked-data API
///
/// Serves the NLDI routes below `/api/nldi` on a `tiny_http` listener, one
/// request per worker thread from a fixed pool. Routing itself is a pure
/// function of method, url and body so it can be tested without sockets.
///
/// Endpoints:
/// - GET /linked-data                                   - registered sources
/// - GET /linked-data/hydrolocation?coords=POINT(x y)   - snap a point
/// - GET /linked-data/comid/position?coords=POINT(x y)  - flowline at a point
/// - GET /linked-data/comid/catchment?coords=POINT(x y) - catchment at a point
/// - GET /linked-data/{src}                             - features of a source
/// - GET /linked-data/{src}/{id}                        - one feature
/// - GET /linked-data/{src}/{id}/basin                  - upstream basin
/// - GET /linked-data/{src}/{id}/catchment              - local catchment
/// - GET /linked-data/{src}/{id}/mainstem               - levelpath chain
/// - GET /linked-data/{src}/{id}/navigation[/{mode}[/{dataSource}]]
/// - GET /health                                        - service health
/// - POST|PUT|DELETE /admin/sources[/{suffix}]          - when enabled

use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::time::Instant;
use threadpool::ThreadPool;
use tiny_http::Method;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::handlers::feature::is_comid_source;
use crate::model::{NldiError, Source};
use crate::response::{self, Links};
use crate::service::{LinkedData, NavigationRequest};

pub const API_PREFIX: &str = "/api/nldi";

/// Shared by every worker.
pub struct EndpointState {
    pub service: LinkedData,
    pub links: Links,
    pub enable_admin: bool,
}

// ---------------------------------------------------------------------------
// Query parsing
// ---------------------------------------------------------------------------

/// Percent-decodes one path segment. `+` is literal in paths.
fn decode_path_segment(segment: &str) -> Result<String, NldiError> {
    urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .map_err(|_| NldiError::InvalidParameter(format!("'{}' is not valid UTF-8 once decoded", segment)))
}

/// Form-decodes a query key or value, where `+` stands for a space.
fn decode_query_component(component: &str) -> Result<String, NldiError> {
    decode_path_segment(&component.replace('+', " "))
}

/// Decodes `a=1&b=POINT(1+2)` into a map; later keys win.
pub fn parse_query(query: &str) -> Result<HashMap<String, String>, NldiError> {
    let mut params = HashMap::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params.insert(decode_query_component(key)?, decode_query_component(value)?);
    }
    Ok(params)
}

fn coords_param(params: &HashMap<String, String>) -> Result<&str, NldiError> {
    params
        .get("coords")
        .map(String::as_str)
        .ok_or_else(|| NldiError::InvalidCoordinates("missing coords=POINT(x y) parameter".to_string()))
}

fn distance_param(params: &HashMap<String, String>) -> Result<Option<f64>, NldiError> {
    match params.get("distance").map(|d| d.trim()).filter(|d| !d.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<f64>()
            .map(Some)
            .map_err(|_| NldiError::InvalidParameter(format!("distance '{}' is not a number", raw))),
    }
}

/// Basins are simplified unless `simplified=false`.
fn simplified_param(params: &HashMap<String, String>) -> Result<bool, NldiError> {
    match params.get("simplified").map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(true),
        Some(flag) => match flag.as_str() {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(NldiError::InvalidParameter(format!("simplified '{}' is not true or false", flag))),
        },
    }
}

fn source_body(body: &str) -> Result<Source, NldiError> {
    serde_json::from_str(body)
        .map_err(|e| NldiError::InvalidParameter(format!("request body is not a source definition: {}", e)))
}

// ---------------------------------------------------------------------------
// Routing
// ---------------------------------------------------------------------------

/// Maps one request to a status code and JSON body.
pub fn route(state: &EndpointState, method: &Method, url: &str, body: &str) -> (u16, Value) {
    match dispatch(state, method, url, body) {
        Ok(reply) => reply,
        Err(e) => {
            debug!(kind = e.kind(), url, error = %e, "request rejected");
            (e.status_code(), response::error_json(&e))
        }
    }
}

fn not_found(path: &str) -> (u16, Value) {
    (
        404,
        json!({
            "error": "NotFound",
            "message": format!("No route for {}", path),
            "status": 404,
            "available_endpoints": [
                format!("{}/linked-data", API_PREFIX),
                format!("{}/health", API_PREFIX),
            ],
        }),
    )
}

fn dispatch(state: &EndpointState, method: &Method, url: &str, body: &str) -> Result<(u16, Value), NldiError> {
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    let Some(rest) = path.strip_prefix(API_PREFIX) else {
        return Ok(not_found(path));
    };
    let decoded = rest
        .split('/')
        .filter(|s| !s.is_empty())
        .map(decode_path_segment)
        .collect::<Result<Vec<String>, _>>()?;
    let parts: Vec<&str> = decoded.iter().map(String::as_str).collect();
    let params = parse_query(query)?;
    let svc = &state.service;
    let links = &state.links;

    let reply = match (method, parts.as_slice()) {
        (Method::Get, ["health"]) => response::health_json(&svc.health()),

        (Method::Get, ["linked-data"]) => response::sources_json(links, &svc.list_sources()),
        (Method::Get, ["linked-data", "hydrolocation"]) => {
            response::hydrolocation_json(links, svc.hydrolocation(coords_param(&params)?)?)
        }
        (Method::Get, ["linked-data", src, "position"]) if is_comid_source(src) => {
            response::flowline_json(&svc.flowline_by_position(coords_param(&params)?)?)
        }
        (Method::Get, ["linked-data", src, "catchment"]) if is_comid_source(src) => {
            response::catchment_json(&svc.catchment_by_position(coords_param(&params)?)?)
        }
        (Method::Get, ["linked-data", src]) => response::features_json(links, &svc.list_features(src)?),
        (Method::Get, ["linked-data", src, id]) => {
            response::features_json(links, &[svc.get_feature(src, id)?])
        }
        (Method::Get, ["linked-data", src, id, "basin"]) => {
            response::basin_json(&svc.basin(src, id, simplified_param(&params)?)?)
        }
        (Method::Get, ["linked-data", src, id, "catchment"]) => {
            response::catchment_json(&svc.catchment(src, id)?)
        }
        (Method::Get, ["linked-data", src, id, "mainstem"]) => {
            response::mainstem_json(&svc.mainstem(src, id)?)
        }
        (Method::Get, ["linked-data", src, id, "navigation"]) => {
            response::modes_json(links, src, id, &svc.navigation_modes(src, id)?)
        }
        (Method::Get, ["linked-data", src, id, "navigation", mode]) => {
            let (mode, entries) = svc.navigation_data_sources(src, id, mode)?;
            response::data_sources_json(links, src, id, mode, &entries)
        }
        (Method::Get, ["linked-data", src, id, "navigation", mode, data_source]) => {
            let request = NavigationRequest {
                source: *src,
                identifier: *id,
                mode: *mode,
                distance_km: distance_param(&params)?,
            };
            if data_source.eq_ignore_ascii_case("flowlines") {
                response::navigated_flowlines_json(&svc.navigate_flowlines(&request)?)
            } else {
                response::navigated_features_json(links, &svc.navigate_features(&request, data_source)?)
            }
        }

        (_, ["admin", ..]) if state.enable_admin => return admin(svc, method, &parts[1..], body),

        _ => return Ok(not_found(path)),
    };
    Ok((200, reply))
}

fn admin(svc: &LinkedData, method: &Method, parts: &[&str], body: &str) -> Result<(u16, Value), NldiError> {
    let reply = match (method, parts) {
        (Method::Post, ["sources", "reload"]) => (200, json!({ "sources": svc.reload_sources()? })),
        (Method::Post, ["sources"]) => (201, response::source_json(&svc.create_source(source_body(body)?)?)),
        (Method::Put, ["sources", suffix]) => {
            (200, response::source_json(&svc.update_source(suffix, source_body(body)?)?))
        }
        (Method::Delete, ["sources", suffix]) => {
            svc.deactivate_source(suffix)?;
            (200, json!({ "deactivated": suffix }))
        }
        _ => not_found(&format!("{}/admin/{}", API_PREFIX, parts.join("/"))),
    };
    Ok(reply)
}

// ---------------------------------------------------------------------------
// HTTP Server
// ---------------------------------------------------------------------------

/// Start the HTTP endpoint server; blocks for the life of the listener.
pub fn start_endpoint_server(config: &ServerConfig, state: Arc<EndpointState>) -> Result<(), String> {
    let address = format!("{}:{}", config.host, config.port);
    let server = tiny_http::Server::http(&address)
        .map_err(|e| format!("Failed to start HTTP server on {}: {}", address, e))?;
    let pool = ThreadPool::new(config.workers);

    info!(
        address = %address,
        workers = config.workers,
        admin = state.enable_admin,
        "NLDI endpoint listening on http://{}{}",
        address,
        API_PREFIX
    );

    for request in server.incoming_requests() {
        let state = Arc::clone(&state);
        pool.execute(move || handle_request(&state, request));
    }

    Ok(())
}

fn handle_request(state: &EndpointState, mut request: tiny_http::Request) {
    let started = Instant::now();
    let method = request.method().clone();
    let url = request.url().to_string();

    let mut body = String::new();
    let (status, json) = match request.as_reader().read_to_string(&mut body) {
        Ok(_) => route(state, &method, &url, &body),
        Err(e) => {
            let err = NldiError::InvalidParameter(format!("unreadable request body: {}", e));
            (err.status_code(), response::error_json(&err))
        }
    };

    info!(
        method = %method,
        url = %url,
        status,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request served"
    );

    if let Err(e) = request.respond(create_response(status, &json)) {
        warn!(url = %url, error = %e, "failed to send response");
    }
}

/// Create HTTP response with JSON body
fn create_response(status_code: u16, json: &Value) -> tiny_http::Response<Cursor<Vec<u8>>> {
    let body = serde_json::to_string_pretty(json).unwrap_or_else(|_| json.to_string());
    let response = tiny_http::Response::from_data(body.into_bytes())
        .with_status_code(tiny_http::StatusCode::from(status_code));

    match tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..]) {
        Ok(header) => response.with_header(header),
        Err(()) => response,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NavigationConfig;
    use crate::fixtures::{demo_store, sample_source};

    fn state(enable_admin: bool) -> EndpointState {
        EndpointState {
            service: LinkedData::new(Arc::new(demo_store()), NavigationConfig::default()).unwrap(),
            links: Links::new("http://localhost:8080/api/nldi"),
            enable_admin,
        }
    }

    fn get(state: &EndpointState, url: &str) -> (u16, Value) {
        route(state, &Method::Get, url, "")
    }

    #[test]
    fn test_parse_query_decodes_points() {
        let params = parse_query("coords=POINT%28-89.4+42.8%29&distance=10").unwrap();
        assert_eq!(params["coords"], "POINT(-89.4 42.8)");
        assert_eq!(params["distance"], "10");
        assert!(parse_query("").unwrap().is_empty());
    }

    #[test]
    fn test_plus_is_literal_in_path_segments() {
        assert_eq!(decode_path_segment("USGS+05430000").unwrap(), "USGS+05430000");
        assert_eq!(decode_path_segment("A%2BB%20C").unwrap(), "A+B C");
        assert_eq!(decode_query_component("A+B").unwrap(), "A B");

        let (status, body) = get(&state(false), "/api/nldi/linked-data/wqp/USGS+05430000");
        assert_eq!(status, 404);
        assert!(body["message"].as_str().unwrap().starts_with("Feature USGS+05430000 not found"));
    }

    #[test]
    fn test_responses_are_served_as_json() {
        let response = create_response(200, &json!({"type": "FeatureCollection"}));
        assert_eq!(response.status_code().0, 200);
        let content_types: Vec<&str> = response
            .headers()
            .iter()
            .filter(|h| h.field.equiv("Content-Type"))
            .map(|h| h.value.as_str())
            .collect();
        assert_eq!(content_types, vec!["application/json"]);
    }

    #[test]
    fn test_sources_listing() {
        let (status, body) = get(&state(false), "/api/nldi/linked-data");
        assert_eq!(status, 200);
        assert_eq!(body[0]["source"], "comid");
        assert_eq!(body.as_array().unwrap().len(), 4);
    }

    #[test]
    fn test_feature_and_missing_feature() {
        let s = state(false);
        let (status, body) = get(&s, "/api/nldi/linked-data/wqp/USGS-05430000");
        assert_eq!(status, 200);
        assert_eq!(body["features"][0]["properties"]["identifier"], "USGS-05430000");

        let (status, body) = get(&s, "/api/nldi/linked-data/wqp/USGS-00000000");
        assert_eq!(status, 404);
        assert_eq!(body["error"], "FeatureNotFound");
    }

    #[test]
    fn test_navigation_routes() {
        let s = state(false);
        let (status, modes) = get(&s, "/api/nldi/linked-data/comid/1005/navigation");
        assert_eq!(status, 200);
        assert_eq!(modes.as_object().unwrap().len(), 4);

        let (status, flowlines) = get(&s, "/api/nldi/linked-data/comid/1005/navigation/UM/flowlines");
        assert_eq!(status, 200);
        assert_eq!(flowlines["features"].as_array().unwrap().len(), 5);
        assert!(flowlines.get("truncated").is_none());

        let (_, truncated) = get(
            &s,
            "/api/nldi/linked-data/wqp/USGS-05430000/navigation/UT/flowlines?distance=10",
        );
        assert_eq!(truncated["truncated"], true);

        let (status, sources) = get(&s, "/api/nldi/linked-data/comid/1005/navigation/UT");
        assert_eq!(status, 200);
        assert_eq!(sources[0]["source"], "Flowlines");
    }

    #[test]
    fn test_bad_parameters_are_400() {
        let s = state(false);
        let (status, body) = get(&s, "/api/nldi/linked-data/comid/1005/navigation/XX/flowlines");
        assert_eq!(status, 400);
        assert_eq!(body["error"], "InvalidNavigationMode");

        let (status, _) = get(&s, "/api/nldi/linked-data/comid/1005/navigation/UM/flowlines?distance=far");
        assert_eq!(status, 400);

        let (status, body) = get(&s, "/api/nldi/linked-data/hydrolocation?coords=POINT(abc)");
        assert_eq!(status, 400);
        assert_eq!(body["error"], "InvalidCoordinates");

        let (status, _) = get(&s, "/api/nldi/linked-data/comid/1001/basin?simplified=maybe");
        assert_eq!(status, 400);
    }

    #[test]
    fn test_hydrolocation_route() {
        let (status, body) = get(
            &state(false),
            "/api/nldi/linked-data/hydrolocation?coords=POINT%28-89.49%2042.75%29",
        );
        assert_eq!(status, 200);
        assert_eq!(body["features"][0]["properties"]["source"], "indexed");
        assert_eq!(body["features"][1]["properties"]["source"], "provided");
    }

    #[test]
    fn test_position_routes_on_comid_source() {
        let s = state(false);
        let (status, body) = get(&s, "/api/nldi/linked-data/comid/position?coords=POINT(-89.49 42.75)");
        assert_eq!(status, 200);
        assert_eq!(body["features"][0]["properties"]["nhdplus_comid"], "1002");

        let (status, _) = get(&s, "/api/nldi/linked-data/comid/catchment?coords=POINT(-89.5 42.75)");
        assert_eq!(status, 200);
    }

    #[test]
    fn test_unknown_route_and_prefix() {
        let s = state(false);
        assert_eq!(get(&s, "/site/05568500").0, 404);
        assert_eq!(get(&s, "/api/nldi/nothing/here/at/all/really/now").0, 404);
    }

    #[test]
    fn test_admin_routes_hidden_unless_enabled() {
        let body = serde_json::to_string(&sample_source(10, "gages")).unwrap();
        let (status, _) = route(&state(false), &Method::Post, "/api/nldi/admin/sources", &body);
        assert_eq!(status, 404);

        let s = state(true);
        let (status, created) = route(&s, &Method::Post, "/api/nldi/admin/sources", &body);
        assert_eq!(status, 201);
        assert_eq!(created["source_suffix"], "gages");
        assert_eq!(get(&s, "/api/nldi/linked-data").1.as_array().unwrap().len(), 5);

        let (status, _) = route(&s, &Method::Delete, "/api/nldi/admin/sources/gages", "");
        assert_eq!(status, 200);
        let (status, reloaded) = route(&s, &Method::Post, "/api/nldi/admin/sources/reload", "");
        assert_eq!(status, 200);
        assert_eq!(reloaded["sources"], 3);

        let (status, _) = route(&s, &Method::Post, "/api/nldi/admin/sources", "{not json");
        assert_eq!(status, 400);
    }

    #[test]
    fn test_responses_are_repeatable() {
        let s = state(false);
        let url = "/api/nldi/linked-data/wqp/USGS-05430000/navigation/UT/nwissite";
        let first = serde_json::to_string(&get(&s, url).1).unwrap();
        let second = serde_json::to_string(&get(&s, url).1).unwrap();
        assert_eq!(first, second);
    }
}
