/// Mainstems: every flowline sharing the levelpath of a feature's segment.

use geo::Point;

use super::feature::FeatureHandler;
use super::{unsupported, Handler, HandlerContext, HandlerKind};
use crate::model::{Comid, Mainstem, NldiError};

#[derive(Clone)]
pub struct MainstemHandler {
    ctx: HandlerContext,
    features: FeatureHandler,
}

impl MainstemHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        let features = FeatureHandler::new(ctx.clone());
        MainstemHandler { ctx, features }
    }

    /// Mainstem through `comid`, upstream first.
    pub fn through(&self, comid: Comid) -> Result<Mainstem, NldiError> {
        let segment = self.ctx.store.segment(comid)?.ok_or_else(|| {
            NldiError::PositionUnresolvable(format!("comid {} is not on the network", comid))
        })?;
        let segments = self.ctx.store.levelpath_segments(segment.levelpath)?;
        Ok(Mainstem {
            levelpath: segment.levelpath,
            segments,
        })
    }
}

impl Handler for MainstemHandler {
    type Item = Mainstem;

    fn kind(&self) -> HandlerKind {
        HandlerKind::Mainstem
    }

    fn get_by_id(&self, source: &str, identifier: &str) -> Result<Mainstem, NldiError> {
        let feature = self.features.get_by_id(source, identifier)?;
        let comid = self.features.position_of(&feature)?.comid;
        self.through(comid)
    }

    fn get_all(&self, _source: &str) -> Result<Vec<Mainstem>, NldiError> {
        Err(unsupported(self.kind(), "listing mainstems"))
    }

    /// Mainstem of the nearest flowline.
    fn get_by_position(&self, point: &Point<f64>) -> Result<Mainstem, NldiError> {
        let flowline = self
            .ctx
            .store
            .nearest_segment(point, self.ctx.search_radius())?
            .ok_or_else(|| {
                NldiError::PositionUnresolvable(format!("no flowline near ({}, {})", point.x(), point.y()))
            })?;
        self.through(flowline.comid())
    }
}
