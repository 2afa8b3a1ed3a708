/// Features of registered sources, plus the built-in `comid` pseudo-source
/// that exposes each flowline as a feature located at its downstream end.

use geo::{Geometry, Point};
use tracing::debug;

use super::{unsupported, Handler, HandlerContext, HandlerKind};
use crate::model::{
    Comid, Feature, FlowlineSegment, NetworkPosition, NldiError, Source, COMID_SOURCE,
};

pub const COMID_SOURCE_NAME: &str = "NHDPlus comid";

/// A flowline presented as a feature of the `comid` source.
pub fn comid_feature(flowline: FlowlineSegment) -> Feature {
    let comid = flowline.comid();
    Feature {
        identifier: comid.to_string(),
        name: None,
        uri: None,
        source_suffix: COMID_SOURCE.to_string(),
        source_name: COMID_SOURCE_NAME.to_string(),
        reachcode: flowline.segment.reachcode,
        geometry: Some(Geometry::LineString(flowline.geometry)),
        position: Some(NetworkPosition::at_downstream_end(comid)),
    }
}

pub fn is_comid_source(source: &str) -> bool {
    source.eq_ignore_ascii_case(COMID_SOURCE)
}

#[derive(Clone)]
pub struct FeatureHandler {
    ctx: HandlerContext,
}

impl FeatureHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        FeatureHandler { ctx }
    }

    /// Registered source for `suffix`.
    pub fn source(&self, suffix: &str) -> Result<Source, NldiError> {
        self.ctx.registry.by_suffix(suffix)
    }

    fn comid_by_id(&self, identifier: &str) -> Result<Feature, NldiError> {
        let not_found = || NldiError::FeatureNotFound {
            source: COMID_SOURCE.to_string(),
            identifier: identifier.to_string(),
        };
        let comid: Comid = identifier.trim().parse().map_err(|_| not_found())?;
        let flowline = self.ctx.store.flowline(comid)?.ok_or_else(not_found)?;
        Ok(comid_feature(flowline))
    }

    /// Network position of a feature: the stored one, or the feature's
    /// point snapped onto the nearest flowline.
    pub fn position_of(&self, feature: &Feature) -> Result<NetworkPosition, NldiError> {
        if let Some(position) = feature.position {
            return Ok(position);
        }
        let location = feature.location().ok_or_else(|| {
            NldiError::PositionUnresolvable(format!(
                "feature {} of {} has no location",
                feature.identifier, feature.source_suffix
            ))
        })?;
        Ok(self.ctx.resolver.resolve(&location)?.indexed.position)
    }

    /// Features of one registered source indexed onto any of `comids`.
    pub fn on_comids(&self, source: &str, comids: &[Comid]) -> Result<Vec<Feature>, NldiError> {
        let source = self.source(source)?;
        Ok(self.ctx.store.features_on_comids(&source.source_suffix, comids)?)
    }
}

impl Handler for FeatureHandler {
    type Item = Feature;

    fn kind(&self) -> HandlerKind {
        HandlerKind::Feature
    }

    /// Attaches a resolved position when the store has none; a feature that
    /// cannot be snapped is still returned, just without a position.
    fn get_by_id(&self, source: &str, identifier: &str) -> Result<Feature, NldiError> {
        if is_comid_source(source) {
            return self.comid_by_id(identifier);
        }
        let registered = self.source(source)?;
        let mut feature = self
            .ctx
            .store
            .features_for_source(&registered.source_suffix, Some(identifier))?
            .into_iter()
            .next()
            .ok_or_else(|| NldiError::FeatureNotFound {
                source: registered.source_suffix.clone(),
                identifier: identifier.to_string(),
            })?;

        if feature.position.is_none() {
            match self.position_of(&feature) {
                Ok(position) => feature.position = Some(position),
                Err(NldiError::PositionUnresolvable(reason)) => {
                    debug!(identifier, source, %reason, "feature left unindexed");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(feature)
    }

    fn get_all(&self, source: &str) -> Result<Vec<Feature>, NldiError> {
        if is_comid_source(source) {
            return Err(unsupported(self.kind(), "listing every flowline"));
        }
        let registered = self.source(source)?;
        Ok(self.ctx.store.features_for_source(&registered.source_suffix, None)?)
    }

    /// Nearest feature of any source.
    fn get_by_position(&self, point: &Point<f64>) -> Result<Feature, NldiError> {
        self.ctx
            .store
            .features_near(point, self.ctx.search_radius(), 1)?
            .into_iter()
            .next()
            .ok_or_else(|| NldiError::FeatureNotFound {
                source: "any".to_string(),
                identifier: format!("POINT({} {})", point.x(), point.y()),
            })
    }
}
