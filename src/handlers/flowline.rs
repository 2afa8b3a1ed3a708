/// Flowline polylines.
///
/// Besides the single lookups, `for_comids` turns a navigation result into
/// its polylines, keeping the traversal order.

use geo::Point;
use tracing::warn;

use super::feature::{is_comid_source, FeatureHandler};
use super::{unsupported, Handler, HandlerContext, HandlerKind};
use crate::model::{Comid, FlowlineSegment, NldiError};

#[derive(Clone)]
pub struct FlowlineHandler {
    ctx: HandlerContext,
    features: FeatureHandler,
}

impl FlowlineHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        let features = FeatureHandler::new(ctx.clone());
        FlowlineHandler { ctx, features }
    }

    pub fn by_comid(&self, comid: Comid) -> Result<FlowlineSegment, NldiError> {
        self.ctx.store.flowline(comid)?.ok_or_else(|| {
            NldiError::PositionUnresolvable(format!("comid {} has no flowline", comid))
        })
    }

    /// Polylines for `comids` in the given order. Comids without geometry
    /// are skipped.
    pub fn for_comids(&self, comids: &[Comid]) -> Result<Vec<FlowlineSegment>, NldiError> {
        let mut flowlines = Vec::with_capacity(comids.len());
        for &comid in comids {
            match self.ctx.store.flowline(comid)? {
                Some(flowline) => flowlines.push(flowline),
                None => warn!(comid, "navigated segment has no flowline geometry"),
            }
        }
        Ok(flowlines)
    }
}

impl Handler for FlowlineHandler {
    type Item = FlowlineSegment;

    fn kind(&self) -> HandlerKind {
        HandlerKind::Flowline
    }

    fn get_by_id(&self, source: &str, identifier: &str) -> Result<FlowlineSegment, NldiError> {
        let comid = if is_comid_source(source) {
            identifier.trim().parse().map_err(|_| NldiError::FeatureNotFound {
                source: source.to_string(),
                identifier: identifier.to_string(),
            })?
        } else {
            let feature = self.features.get_by_id(source, identifier)?;
            self.features.position_of(&feature)?.comid
        };
        self.by_comid(comid)
    }

    fn get_all(&self, _source: &str) -> Result<Vec<FlowlineSegment>, NldiError> {
        Err(unsupported(self.kind(), "listing flowlines"))
    }

    /// Nearest flowline within the search radius.
    fn get_by_position(&self, point: &Point<f64>) -> Result<FlowlineSegment, NldiError> {
        let radius = self.ctx.search_radius();
        self.ctx.store.nearest_segment(point, radius)?.ok_or_else(|| {
            NldiError::PositionUnresolvable(format!(
                "no flowline within {} degrees of ({}, {})",
                radius,
                point.x(),
                point.y()
            ))
        })
    }
}
