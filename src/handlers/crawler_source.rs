/// Crawler source administration.
///
/// Writes go to the store first, then the registry is reloaded so the new
/// definition becomes visible to all requests at once. Definitions that
/// would leave the registry inconsistent are rejected before anything is
/// written.

use geo::Point;
use tracing::info;

use super::{unsupported, Handler, HandlerContext, HandlerKind};
use crate::model::{NldiError, Source, COMID_SOURCE};

/// Rejects definitions with missing fields or an unusable suffix.
pub fn validate_source(source: &Source) -> Result<(), NldiError> {
    if source.crawler_source_id <= 0 {
        return Err(NldiError::InvalidSource(format!(
            "crawler_source_id must be positive, got {}",
            source.crawler_source_id
        )));
    }
    let required = [
        ("source_name", &source.source_name),
        ("source_suffix", &source.source_suffix),
        ("source_uri", &source.source_uri),
        ("feature_id", &source.feature_id),
        ("feature_name", &source.feature_name),
        ("feature_uri", &source.feature_uri),
    ];
    if let Some((field, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
        return Err(NldiError::InvalidSource(format!("{} must not be empty", field)));
    }
    let suffix = &source.source_suffix;
    if !suffix.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-') {
        return Err(NldiError::InvalidSource(format!(
            "suffix '{}' may only contain letters, digits, '_' and '-'",
            suffix
        )));
    }
    if suffix.eq_ignore_ascii_case(COMID_SOURCE) {
        return Err(NldiError::InvalidSource(format!("suffix '{}' is reserved", suffix)));
    }
    Ok(())
}

#[derive(Clone)]
pub struct CrawlerSourceHandler {
    ctx: HandlerContext,
}

impl CrawlerSourceHandler {
    pub fn new(ctx: HandlerContext) -> Self {
        CrawlerSourceHandler { ctx }
    }

    /// Registers a new source. Both the id and the suffix must be unused.
    pub fn create(&self, source: Source) -> Result<Source, NldiError> {
        validate_source(&source)?;
        let snapshot = self.ctx.registry.snapshot();
        if snapshot.by_suffix(&source.source_suffix).is_some() {
            return Err(NldiError::InvalidSource(format!(
                "suffix '{}' is already registered",
                source.source_suffix
            )));
        }
        if snapshot
            .sources()
            .iter()
            .any(|s| s.crawler_source_id == source.crawler_source_id)
        {
            return Err(NldiError::InvalidSource(format!(
                "crawler_source_id {} is already registered",
                source.crawler_source_id
            )));
        }

        self.ctx.store.upsert_source(&source)?;
        self.ctx.registry.reload()?;
        info!(suffix = %source.source_suffix, id = source.crawler_source_id, "source created");
        Ok(source)
    }

    /// Replaces the definition registered under `suffix`. The id must stay
    /// the same; the suffix may change if the new one is free.
    pub fn update(&self, suffix: &str, source: Source) -> Result<Source, NldiError> {
        validate_source(&source)?;
        let existing = self.ctx.registry.by_suffix(suffix)?;
        if existing.crawler_source_id != source.crawler_source_id {
            return Err(NldiError::InvalidSource(format!(
                "crawler_source_id cannot change ({} -> {})",
                existing.crawler_source_id, source.crawler_source_id
            )));
        }
        let snapshot = self.ctx.registry.snapshot();
        if let Some(clash) = snapshot.by_suffix(&source.source_suffix) {
            if clash.crawler_source_id != existing.crawler_source_id {
                return Err(NldiError::InvalidSource(format!(
                    "suffix '{}' is already registered",
                    source.source_suffix
                )));
            }
        }

        self.ctx.store.upsert_source(&source)?;
        self.ctx.registry.reload()?;
        info!(suffix, id = source.crawler_source_id, "source updated");
        Ok(source)
    }

    pub fn deactivate(&self, suffix: &str) -> Result<(), NldiError> {
        let existing = self.ctx.registry.by_suffix(suffix)?;
        if !self.ctx.store.deactivate_source(&existing.source_suffix)? {
            return Err(NldiError::SourceNotFound(suffix.to_string()));
        }
        self.ctx.registry.reload()?;
        info!(suffix, id = existing.crawler_source_id, "source deactivated");
        Ok(())
    }

    /// Re-reads the sources from the store; returns how many are active.
    pub fn reload(&self) -> Result<usize, NldiError> {
        Ok(self.ctx.registry.reload()?.len())
    }
}

impl Handler for CrawlerSourceHandler {
    type Item = Source;

    fn kind(&self) -> HandlerKind {
        HandlerKind::CrawlerSource
    }

    /// `identifier` is the source suffix; `source` is not used.
    fn get_by_id(&self, _source: &str, identifier: &str) -> Result<Source, NldiError> {
        self.ctx.registry.by_suffix(identifier)
    }

    fn get_all(&self, _source: &str) -> Result<Vec<Source>, NldiError> {
        Ok(self.ctx.registry.list_sources())
    }

    fn get_by_position(&self, _point: &Point<f64>) -> Result<Source, NldiError> {
        Err(unsupported(self.kind(), "lookup by position"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_source;
    use crate::handlers::test_support::demo_context;

    fn handler() -> CrawlerSourceHandler {
        CrawlerSourceHandler::new(demo_context().1)
    }

    #[test]
    fn test_create_then_lookup() {
        let h = handler();
        h.create(sample_source(10, "gages")).unwrap();
        assert_eq!(h.get_by_id("", "GAGES").unwrap().crawler_source_id, 10);
        assert_eq!(h.get_all("").unwrap().len(), 4);
    }

    #[test]
    fn test_create_rejects_taken_suffix_or_id() {
        let h = handler();
        assert!(matches!(h.create(sample_source(10, "Wqp")), Err(NldiError::InvalidSource(_))));
        assert!(matches!(h.create(sample_source(1, "gages")), Err(NldiError::InvalidSource(_))));
        assert_eq!(h.get_all("").unwrap().len(), 3);
    }

    #[test]
    fn test_validation() {
        assert!(validate_source(&sample_source(10, "ok_suffix-1")).is_ok());
        assert!(validate_source(&sample_source(10, "comid")).is_err());
        assert!(validate_source(&sample_source(10, "has space")).is_err());
        assert!(validate_source(&sample_source(0, "gages")).is_err());
        let mut blank = sample_source(10, "gages");
        blank.source_uri = "  ".to_string();
        assert!(validate_source(&blank).is_err());
    }

    #[test]
    fn test_update_can_rename_suffix() {
        let h = handler();
        let mut renamed = h.get_by_id("", "nwissite").unwrap();
        renamed.source_suffix = "nwis".to_string();
        h.update("nwissite", renamed).unwrap();
        assert!(h.get_by_id("", "nwis").is_ok());
        assert!(matches!(h.get_by_id("", "nwissite"), Err(NldiError::SourceNotFound(_))));
    }

    #[test]
    fn test_update_cannot_change_id_or_steal_suffix() {
        let h = handler();
        let mut other_id = h.get_by_id("", "nwissite").unwrap();
        other_id.crawler_source_id = 99;
        assert!(h.update("nwissite", other_id).is_err());

        let mut steal = h.get_by_id("", "nwissite").unwrap();
        steal.source_suffix = "WQP".to_string();
        assert!(h.update("nwissite", steal).is_err());
    }

    #[test]
    fn test_deactivate_removes_from_registry() {
        let h = handler();
        h.deactivate("huc12pp").unwrap();
        assert!(matches!(h.get_by_id("", "huc12pp"), Err(NldiError::SourceNotFound(_))));
        assert!(matches!(h.deactivate("huc12pp"), Err(NldiError::SourceNotFound(_))));
    }

    #[test]
    fn test_position_lookup_is_unsupported() {
        assert!(matches!(
            handler().get_by_position(&Point::new(0.0, 0.0)),
            Err(NldiError::UnsupportedOperation(_))
        ));
    }
}
