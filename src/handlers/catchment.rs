/// Catchment polygons, by comid or by the feature they drain to.

use geo::Point;

use super::feature::{is_comid_source, FeatureHandler};
use super::{unsupported, Handler, HandlerContext, HandlerKind};
use crate::model::{Catchment, Comid, NldiError};

#[derive(Clone)]
pub struct CatchmentHandler {
    ctx: HandlerContext,
    features: FeatureHandler,
}

impl CatchmentHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        let features = FeatureHandler::new(ctx.clone());
        CatchmentHandler { ctx, features }
    }

    pub fn by_comid(&self, comid: Comid) -> Result<Catchment, NldiError> {
        let geometry = self
            .ctx
            .store
            .catchment_geometry(comid)?
            .ok_or_else(|| NldiError::CatchmentNotFound(format!("comid {}", comid)))?;
        Ok(Catchment { comid, geometry })
    }
}

impl Handler for CatchmentHandler {
    type Item = Catchment;

    fn kind(&self) -> HandlerKind {
        HandlerKind::Catchment
    }

    /// For `comid` the identifier is the comid itself; for any other source
    /// it is the catchment of the segment the feature is indexed on.
    fn get_by_id(&self, source: &str, identifier: &str) -> Result<Catchment, NldiError> {
        if is_comid_source(source) {
            let comid: Comid = identifier
                .trim()
                .parse()
                .map_err(|_| NldiError::CatchmentNotFound(format!("comid {}", identifier)))?;
            return self.by_comid(comid);
        }
        let feature = self.features.get_by_id(source, identifier)?;
        let position = self.features.position_of(&feature)?;
        self.by_comid(position.comid)
    }

    fn get_all(&self, _source: &str) -> Result<Vec<Catchment>, NldiError> {
        Err(unsupported(self.kind(), "listing catchments"))
    }

    /// Catchment whose polygon covers the point.
    fn get_by_position(&self, point: &Point<f64>) -> Result<Catchment, NldiError> {
        self.ctx.store.catchment_at(point)?.ok_or_else(|| {
            NldiError::CatchmentNotFound(format!("no catchment covers ({}, {})", point.x(), point.y()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::test_support::demo_context;

    fn handler() -> CatchmentHandler {
        CatchmentHandler::new(demo_context().1)
    }

    #[test]
    fn test_catchment_by_comid() {
        assert_eq!(handler().get_by_id("comid", "1003").unwrap().comid, 1003);
        assert!(matches!(
            handler().get_by_id("comid", "4002"),
            Err(NldiError::CatchmentNotFound(_))
        ));
    }

    #[test]
    fn test_catchment_of_feature() {
        let catchment = handler().get_by_id("huc12pp", "070900020101").unwrap();
        assert_eq!(catchment.comid, 1001);
    }

    #[test]
    fn test_catchment_by_position() {
        let catchment = handler().get_by_position(&Point::new(-89.52, 42.45)).unwrap();
        assert_eq!(catchment.comid, 1005);
        assert!(matches!(
            handler().get_by_position(&Point::new(-80.0, 30.0)),
            Err(NldiError::CatchmentNotFound(_))
        ));
    }

    #[test]
    fn test_listing_is_unsupported() {
        assert!(matches!(handler().get_all("comid"), Err(NldiError::UnsupportedOperation(_))));
    }
}
