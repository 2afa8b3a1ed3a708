/// LinkedData service: the operations exposed over HTTP.
///
/// Owns the registry, the handler set, the hydrolocation resolver and the
/// basin delineator, all sharing one store. Navigation requests run as a
/// small state machine:
///
/// ```text
/// ResolveSource -> ResolvePosition -> ResolveMode -> Traverse -> AssembleResult
/// ```
///
/// A failure in any stage ends the request with that error; the stage is
/// logged with it. A distance cut-off is not a failure, it only marks the
/// result as truncated.

use chrono::{DateTime, Utc};
use geo::Point;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::basin::{Basin, BasinDelineator};
use crate::config::NavigationConfig;
use crate::geometry::parse_wkt_point;
use crate::handlers::feature::COMID_SOURCE_NAME;
use crate::handlers::{Handler, HandlerContext, Handlers};
use crate::hydrolocation::{Hydrolocation, HydrolocationResolver};
use crate::model::{
    Catchment, Feature, FlowlineSegment, Mainstem, NldiError, Source, COMID_SOURCE,
};
use crate::navigation::{traverse, NavigationMode, NavigationResult, TraversalLimits};
use crate::registry::SourceRegistry;
use crate::store::NetworkStore;

// ---------------------------------------------------------------------------
// Request/result types
// ---------------------------------------------------------------------------

/// Stages of a navigation request, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationStage {
    ResolveSource,
    ResolvePosition,
    ResolveMode,
    Traverse,
    AssembleResult,
}

impl NavigationStage {
    pub fn name(&self) -> &'static str {
        match self {
            NavigationStage::ResolveSource => "ResolveSource",
            NavigationStage::ResolvePosition => "ResolvePosition",
            NavigationStage::ResolveMode => "ResolveMode",
            NavigationStage::Traverse => "Traverse",
            NavigationStage::AssembleResult => "AssembleResult",
        }
    }
}

/// A navigation request as it arrives from the routing layer.
#[derive(Debug, Clone, PartialEq)]
pub struct NavigationRequest<'a> {
    pub source: &'a str,
    pub identifier: &'a str,
    pub mode: &'a str,
    /// Kilometres; `None` takes the configured default.
    pub distance_km: Option<f64>,
}

/// One entry of a source listing.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceEntry {
    pub suffix: String,
    pub name: String,
}

impl From<&Source> for SourceEntry {
    fn from(source: &Source) -> Self {
        SourceEntry {
            suffix: source.source_suffix.clone(),
            name: source.source_name.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigatedFlowlines {
    pub navigation: NavigationResult,
    pub flowlines: Vec<FlowlineSegment>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigatedFeatures {
    pub navigation: NavigationResult,
    pub features: Vec<Feature>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HealthStatus {
    pub sources: usize,
    pub registry_loaded_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct LinkedData {
    store: Arc<dyn NetworkStore>,
    registry: Arc<SourceRegistry>,
    handlers: Handlers,
    resolver: HydrolocationResolver,
    basins: BasinDelineator,
    settings: NavigationConfig,
}

impl LinkedData {
    /// Loads the registry from `store` and builds every handler.
    pub fn new(store: Arc<dyn NetworkStore>, settings: NavigationConfig) -> Result<Self, NldiError> {
        let registry = Arc::new(SourceRegistry::load(Arc::clone(&store))?);
        let resolver = HydrolocationResolver::new(Arc::clone(&store), settings.search_radius_deg);
        let ctx = HandlerContext {
            store: Arc::clone(&store),
            registry: Arc::clone(&registry),
            resolver: resolver.clone(),
        };
        let handlers = Handlers::build(&ctx);
        let basins = BasinDelineator::new(Arc::clone(&store), settings.basin_simplify_tolerance);

        info!(
            sources = registry.snapshot().len(),
            search_radius_deg = settings.search_radius_deg,
            "linked-data service ready"
        );
        Ok(LinkedData {
            store,
            registry,
            handlers,
            resolver,
            basins,
            settings,
        })
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    fn deadline(&self) -> Instant {
        Instant::now() + Duration::from_secs(self.settings.request_timeout_secs)
    }

    /// Requested distance, defaulted and capped.
    fn distance_limit(&self, requested: Option<f64>) -> Result<f64, NldiError> {
        match requested {
            None => Ok(self.settings.default_distance_km),
            Some(km) if !km.is_finite() || km < 0.0 => Err(NldiError::InvalidParameter(format!(
                "distance must be a non-negative number of kilometres, got {}",
                km
            ))),
            Some(km) if km > self.settings.max_distance_km => {
                debug!(requested = km, cap = self.settings.max_distance_km, "distance capped");
                Ok(self.settings.max_distance_km)
            }
            Some(km) => Ok(km),
        }
    }

    // --- Sources and features ---------------------------------------------

    /// Every source, with the `comid` pseudo-source first.
    pub fn list_sources(&self) -> Vec<SourceEntry> {
        std::iter::once(SourceEntry {
            suffix: COMID_SOURCE.to_string(),
            name: COMID_SOURCE_NAME.to_string(),
        })
        .chain(self.registry.snapshot().sources().iter().map(SourceEntry::from))
        .collect()
    }

    pub fn list_features(&self, source: &str) -> Result<Vec<Feature>, NldiError> {
        self.handlers.feature.get_all(source)
    }

    pub fn get_feature(&self, source: &str, identifier: &str) -> Result<Feature, NldiError> {
        self.handlers.feature.get_by_id(source, identifier)
    }

    // --- Navigation --------------------------------------------------------

    /// The four modes, after checking that the feature exists.
    pub fn navigation_modes(&self, source: &str, identifier: &str) -> Result<[NavigationMode; 4], NldiError> {
        self.get_feature(source, identifier)?;
        Ok(NavigationMode::ALL)
    }

    /// Sources whose features can be requested for a navigation.
    pub fn navigation_data_sources(
        &self,
        source: &str,
        identifier: &str,
        mode: &str,
    ) -> Result<(NavigationMode, Vec<SourceEntry>), NldiError> {
        self.get_feature(source, identifier)?;
        let mode = NavigationMode::resolve(mode)?;
        let entries = self
            .registry
            .snapshot()
            .sources()
            .iter()
            .map(SourceEntry::from)
            .collect();
        Ok((mode, entries))
    }

    pub fn navigate_flowlines(&self, request: &NavigationRequest<'_>) -> Result<NavigatedFlowlines, NldiError> {
        self.run_navigation(request, None, |navigation| {
            let flowlines = self.handlers.flowline.for_comids(&navigation.comids())?;
            Ok(NavigatedFlowlines { navigation, flowlines })
        })
    }

    /// Features of `data_source` indexed on the navigated segments.
    pub fn navigate_features(
        &self,
        request: &NavigationRequest<'_>,
        data_source: &str,
    ) -> Result<NavigatedFeatures, NldiError> {
        self.run_navigation(request, Some(data_source), |navigation| {
            let features = self.handlers.feature.on_comids(data_source, &navigation.comids())?;
            Ok(NavigatedFeatures { navigation, features })
        })
    }

    fn run_navigation<T, F>(
        &self,
        request: &NavigationRequest<'_>,
        data_source: Option<&str>,
        assemble: F,
    ) -> Result<T, NldiError>
    where
        F: FnOnce(NavigationResult) -> Result<T, NldiError>,
    {
        let mut stage = NavigationStage::ResolveSource;
        let outcome = self.navigation_stages(request, data_source, &mut stage, assemble);
        if let Err(e) = &outcome {
            warn!(
                stage = stage.name(),
                kind = e.kind(),
                source = request.source,
                identifier = request.identifier,
                mode = request.mode,
                error = %e,
                "navigation failed"
            );
        }
        outcome
    }

    fn navigation_stages<T, F>(
        &self,
        request: &NavigationRequest<'_>,
        data_source: Option<&str>,
        stage: &mut NavigationStage,
        assemble: F,
    ) -> Result<T, NldiError>
    where
        F: FnOnce(NavigationResult) -> Result<T, NldiError>,
    {
        *stage = NavigationStage::ResolveSource;
        let feature = self.get_feature(request.source, request.identifier)?;
        if let Some(data_source) = data_source {
            self.handlers.feature.source(data_source)?;
        }

        *stage = NavigationStage::ResolvePosition;
        let start = self.handlers.feature.position_of(&feature)?;

        *stage = NavigationStage::ResolveMode;
        let mode = NavigationMode::resolve(request.mode)?;
        let limits = TraversalLimits::within(self.distance_limit(request.distance_km)?)
            .with_deadline(self.deadline());

        *stage = NavigationStage::Traverse;
        let navigation = traverse(&*self.store, start, mode, limits)?;

        *stage = NavigationStage::AssembleResult;
        assemble(navigation)
    }

    // --- Geometry lookups ----------------------------------------------------

    pub fn basin(&self, source: &str, identifier: &str, simplified: bool) -> Result<Basin, NldiError> {
        let feature = self.get_feature(source, identifier)?;
        let start = self.handlers.feature.position_of(&feature)?;
        self.basins.delineate(start, simplified, Some(self.deadline()))
    }

    /// Snaps a `POINT(x y)` onto the network.
    pub fn hydrolocation(&self, coords: &str) -> Result<Hydrolocation, NldiError> {
        let point = parse_wkt_point(coords)?;
        self.resolver.resolve(&point)
    }

    pub fn flowline_by_position(&self, coords: &str) -> Result<FlowlineSegment, NldiError> {
        let point: Point<f64> = parse_wkt_point(coords)?;
        self.handlers.flowline.get_by_position(&point)
    }

    pub fn mainstem(&self, source: &str, identifier: &str) -> Result<Mainstem, NldiError> {
        self.handlers.mainstem.get_by_id(source, identifier)
    }

    pub fn catchment(&self, source: &str, identifier: &str) -> Result<Catchment, NldiError> {
        self.handlers.catchment.get_by_id(source, identifier)
    }

    pub fn catchment_by_position(&self, coords: &str) -> Result<Catchment, NldiError> {
        let point = parse_wkt_point(coords)?;
        self.handlers.catchment.get_by_position(&point)
    }

    // --- Administration ------------------------------------------------------

    pub fn create_source(&self, source: Source) -> Result<Source, NldiError> {
        self.handlers.crawler_source.create(source)
    }

    pub fn update_source(&self, suffix: &str, source: Source) -> Result<Source, NldiError> {
        self.handlers.crawler_source.update(suffix, source)
    }

    pub fn deactivate_source(&self, suffix: &str) -> Result<(), NldiError> {
        self.handlers.crawler_source.deactivate(suffix)
    }

    pub fn reload_sources(&self) -> Result<usize, NldiError> {
        self.handlers.crawler_source.reload()
    }

    pub fn health(&self) -> HealthStatus {
        let snapshot = self.registry.snapshot();
        HealthStatus {
            sources: snapshot.len(),
            registry_loaded_at: snapshot.loaded_at(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
