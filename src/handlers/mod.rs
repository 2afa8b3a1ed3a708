/// Request handlers over the store, one per kind of linked-data resource.
///
/// Each handler implements the same capability trait (`Handler`): lookup by
/// source and identifier, listing a whole source, and nearest match to a
/// point. Variants decide which of those make sense for them and answer
/// `UnsupportedOperation` otherwise.
///
/// ```text
/// handlers
/// ├── feature         — source features and the `comid` pseudo-source
/// ├── catchment       — local drainage polygons
/// ├── flowline        — flowline polylines, ordered batches for navigation
/// ├── mainstem        — full levelpath chain through a feature
/// └── crawler_source  — source administration (create/update/deactivate)
/// ```

pub mod catchment;
pub mod crawler_source;
pub mod feature;
pub mod flowline;
pub mod mainstem;

use geo::Point;
use std::sync::Arc;
use tracing::debug;

use crate::hydrolocation::HydrolocationResolver;
use crate::model::NldiError;
use crate::registry::SourceRegistry;
use crate::store::NetworkStore;

pub use catchment::CatchmentHandler;
pub use crawler_source::CrawlerSourceHandler;
pub use feature::FeatureHandler;
pub use flowline::FlowlineHandler;
pub use mainstem::MainstemHandler;

/// The closed set of handler variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Feature,
    Catchment,
    Flowline,
    Mainstem,
    CrawlerSource,
}

impl HandlerKind {
    pub const ALL: [HandlerKind; 5] = [
        HandlerKind::Feature,
        HandlerKind::Catchment,
        HandlerKind::Flowline,
        HandlerKind::Mainstem,
        HandlerKind::CrawlerSource,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            HandlerKind::Feature => "feature",
            HandlerKind::Catchment => "catchment",
            HandlerKind::Flowline => "flowline",
            HandlerKind::Mainstem => "mainstem",
            HandlerKind::CrawlerSource => "crawler_source",
        }
    }
}

/// Capability set shared by all handlers.
pub trait Handler: Send + Sync {
    type Item;

    fn kind(&self) -> HandlerKind;

    fn get_by_id(&self, source: &str, identifier: &str) -> Result<Self::Item, NldiError>;

    fn get_all(&self, source: &str) -> Result<Vec<Self::Item>, NldiError>;

    /// Nearest match to `point`, bounded by the configured search radius.
    fn get_by_position(&self, point: &Point<f64>) -> Result<Self::Item, NldiError>;
}

pub(crate) fn unsupported(kind: HandlerKind, operation: &str) -> NldiError {
    NldiError::UnsupportedOperation(format!("{} handler does not support {}", kind.name(), operation))
}

/// Everything a handler may need, shared by cheap clones.
#[derive(Clone)]
pub struct HandlerContext {
    pub store: Arc<dyn NetworkStore>,
    pub registry: Arc<SourceRegistry>,
    pub resolver: HydrolocationResolver,
}

impl HandlerContext {
    pub fn search_radius(&self) -> f64 {
        self.resolver.radius()
    }
}

/// One instance of every handler kind, built once at startup.
pub struct Handlers {
    pub feature: FeatureHandler,
    pub catchment: CatchmentHandler,
    pub flowline: FlowlineHandler,
    pub mainstem: MainstemHandler,
    pub crawler_source: CrawlerSourceHandler,
}

impl Handlers {
    pub fn build(ctx: &HandlerContext) -> Self {
        let handlers = Handlers {
            feature: FeatureHandler::new(ctx.clone()),
            catchment: CatchmentHandler::new(ctx.clone()),
            flowline: FlowlineHandler::new(ctx.clone()),
            mainstem: MainstemHandler::new(ctx.clone()),
            crawler_source: CrawlerSourceHandler::new(ctx.clone()),
        };
        for kind in handlers.kinds() {
            debug!(handler = kind.name(), "handler ready");
        }
        handlers
    }

    /// Kinds actually constructed, in `HandlerKind::ALL` order.
    pub fn kinds(&self) -> [HandlerKind; 5] {
        [
            self.feature.kind(),
            self.catchment.kind(),
            self.flowline.kind(),
            self.mainstem.kind(),
            self.crawler_source.kind(),
        ]
    }
}
