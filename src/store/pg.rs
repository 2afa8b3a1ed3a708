/// PostgreSQL/PostGIS store over the NLDI database.
///
/// Reads network topology from `nhdplus.plusflowlinevaa_np21`, geometry from
/// `nhdplus.nhdflowline_np21` and `nhdplus.catchmentsp`, and crawled features
/// from `nldi_data.feature` / `nldi_data.crawler_source`.
///
/// Every call checks a connection out of the pool for the duration of one
/// query and hands it back on drop. A lost or refused connection is retried
/// once with a fresh checkout; query errors are not retried.

use postgres::error::SqlState;
use postgres::types::FromSql;
use postgres::{Client, Row};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::error::Error as _;
use tracing::{debug, warn};

use geo::{Geometry, MultiPolygon, Point};

use crate::db::PgPool;
use crate::geometry::GeoJsonGeometry;
use crate::model::{
    Catchment, Comid, Feature, FlowlineSegment, IngestType, NetworkPosition, Segment, Source,
    UpstreamNeighbor,
};
use crate::store::{FlowNetwork, NetworkStore, StoreError};

/// Attempts per call: the first checkout plus one reconnect.
const MAX_ATTEMPTS: usize = 2;

// ---------------------------------------------------------------------------
// SQL
// ---------------------------------------------------------------------------

const SEGMENT_COLUMNS: &str = "
    v.comid::bigint, v.levelpathid::bigint, v.hydroseq::bigint,
    f.lengthkm::numeric, (v.terminalfl = 1), f.reachcode";

const FLOWLINE_FROM: &str = "
    FROM nhdplus.plusflowlinevaa_np21 v
    JOIN nhdplus.nhdflowline_np21 f ON f.nhdplus_comid = v.comid";

const SQL_UPSTREAM: &str = "
    SELECT u.comid::bigint, u.levelpathid::bigint
      FROM nhdplus.plusflowlinevaa_np21 c
      JOIN nhdplus.plusflowlinevaa_np21 u
        ON u.dnhydroseq = c.hydroseq OR u.dnminorhyd = c.hydroseq
     WHERE c.comid = $1::bigint
     ORDER BY u.comid";

const SQL_DOWNSTREAM: &str = "
    SELECT d.comid::bigint, (d.hydroseq = c.dnhydroseq) AS is_primary
      FROM nhdplus.plusflowlinevaa_np21 c
      JOIN nhdplus.plusflowlinevaa_np21 d
        ON d.hydroseq = c.dnhydroseq
        OR (c.dnminorhyd <> 0 AND d.hydroseq = c.dnminorhyd)
     WHERE c.comid = $1::bigint
       AND c.terminalfl = 0
     ORDER BY is_primary DESC, d.comid";

const SQL_SOURCES: &str = "
    SELECT crawler_source_id, source_name, source_suffix, source_uri,
           feature_id, feature_name, feature_uri, feature_reach, feature_measure,
           ingest_type, COALESCE(feature_type, '')
      FROM nldi_data.crawler_source";

const SQL_UPSERT_SOURCE: &str = "
    INSERT INTO nldi_data.crawler_source
           (crawler_source_id, source_name, source_suffix, source_uri,
            feature_id, feature_name, feature_uri, feature_reach, feature_measure,
            ingest_type, feature_type)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
    ON CONFLICT (crawler_source_id) DO UPDATE SET
           source_name = EXCLUDED.source_name,
           source_suffix = EXCLUDED.source_suffix,
           source_uri = EXCLUDED.source_uri,
           feature_id = EXCLUDED.feature_id,
           feature_name = EXCLUDED.feature_name,
           feature_uri = EXCLUDED.feature_uri,
           feature_reach = EXCLUDED.feature_reach,
           feature_measure = EXCLUDED.feature_measure,
           ingest_type = EXCLUDED.ingest_type,
           feature_type = EXCLUDED.feature_type";

const SQL_DELETE_SOURCE: &str = "
    DELETE FROM nldi_data.crawler_source WHERE lower(source_suffix) = lower($1)";

const FEATURE_SELECT: &str = "
    SELECT f.identifier, f.name, f.uri, s.source_suffix, s.source_name, f.reachcode,
           ST_X(f.location), ST_Y(f.location), f.comid::bigint, f.measure::numeric
      FROM nldi_data.feature f
      JOIN nldi_data.crawler_source s ON s.crawler_source_id = f.crawler_source_id";

const QUERY_POINT: &str = "ST_SetSRID(ST_MakePoint($1, $2), 4269)";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

pub struct PgNetworkStore {
    pool: PgPool,
}

impl PgNetworkStore {
    pub fn new(pool: PgPool) -> Self {
        PgNetworkStore { pool }
    }

    /// Runs `query` against a pooled connection, retrying once on a
    /// connection-level failure.
    fn with_client<T, F>(&self, op: &str, mut query: F) -> Result<T, StoreError>
    where
        F: FnMut(&mut Client) -> Result<T, postgres::Error>,
    {
        let mut last_failure = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let mut conn = match self.pool.get() {
                Ok(conn) => conn,
                Err(e) => {
                    warn!(op, attempt, error = %e, "connection checkout failed");
                    last_failure = e.to_string();
                    continue;
                }
            };

            match query(&mut *conn) {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) => {
                    warn!(op, attempt, error = %e, "connection lost during query");
                    last_failure = e.to_string();
                }
                Err(e) => return Err(StoreError::Query(format!("{}: {}", op, e))),
            }
        }

        Err(StoreError::Unavailable(format!("{}: {}", op, last_failure)))
    }

    fn query_rows(
        &self,
        op: &str,
        sql: &str,
        params: &[&(dyn postgres::types::ToSql + Sync)],
    ) -> Result<Vec<Row>, StoreError> {
        debug!(op, "store query");
        self.with_client(op, |client| client.query(sql, params))
    }

    fn flowline_where(&self, op: &str, predicate: &str, params: &[&(dyn postgres::types::ToSql + Sync)])
        -> Result<Vec<FlowlineSegment>, StoreError> {
        let sql = format!(
            "SELECT {}, ST_AsGeoJSON(ST_Force2D(ST_LineMerge(f.shape))) {} {}",
            SEGMENT_COLUMNS, FLOWLINE_FROM, predicate
        );
        self.query_rows(op, &sql, params)?
            .iter()
            .map(decode_flowline)
            .collect()
    }

    fn features_where(&self, op: &str, predicate: &str, params: &[&(dyn postgres::types::ToSql + Sync)])
        -> Result<Vec<Feature>, StoreError> {
        let sql = format!("{} {}", FEATURE_SELECT, predicate);
        self.query_rows(op, &sql, params)?
            .iter()
            .map(decode_feature)
            .collect()
    }
}

/// Connection-level failures worth one reconnect: closed sessions, socket
/// errors and server shutdown. Anything else is a problem with the query.
fn is_transient(err: &postgres::Error) -> bool {
    if err.is_closed() {
        return true;
    }
    if let Some(code) = err.code() {
        return code == &SqlState::ADMIN_SHUTDOWN
            || code == &SqlState::CRASH_SHUTDOWN
            || code == &SqlState::CANNOT_CONNECT_NOW
            || code == &SqlState::CONNECTION_FAILURE;
    }
    err.source().is_some_and(|s| s.is::<std::io::Error>())
}

// ---------------------------------------------------------------------------
// Row decoding
// ---------------------------------------------------------------------------

fn column<'a, T: FromSql<'a>>(row: &'a Row, idx: usize) -> Result<T, StoreError> {
    row.try_get(idx)
        .map_err(|e| StoreError::Decode(format!("column {}: {}", idx, e)))
}

fn decimal_to_f64(value: Decimal) -> Result<f64, StoreError> {
    value
        .to_f64()
        .ok_or_else(|| StoreError::Decode(format!("numeric {} out of range", value)))
}

fn parse_geojson(text: &str) -> Result<GeoJsonGeometry, StoreError> {
    serde_json::from_str(text).map_err(|e| StoreError::Decode(format!("geometry: {}", e)))
}

/// Columns 0..=5 as laid out by `SEGMENT_COLUMNS`.
fn decode_segment(row: &Row) -> Result<Segment, StoreError> {
    let length: Option<Decimal> = column(row, 3)?;
    let terminal: Option<bool> = column(row, 4)?;
    Ok(Segment {
        comid: column(row, 0)?,
        levelpath: column(row, 1)?,
        hydroseq: column(row, 2)?,
        length_km: length.map(decimal_to_f64).transpose()?.unwrap_or(0.0),
        terminal: terminal.unwrap_or(false),
        reachcode: column(row, 5)?,
    })
}

fn decode_flowline(row: &Row) -> Result<FlowlineSegment, StoreError> {
    let segment = decode_segment(row)?;
    let text: String = column(row, 6)?;
    let geometry = parse_geojson(&text)?
        .to_line_string()
        .map_err(|e| StoreError::Decode(format!("flowline {}: {}", segment.comid, e)))?;
    Ok(FlowlineSegment { segment, geometry })
}

fn decode_source(row: &Row) -> Result<Source, StoreError> {
    let ingest: String = column(row, 9)?;
    Ok(Source {
        crawler_source_id: column(row, 0)?,
        source_name: column(row, 1)?,
        source_suffix: column(row, 2)?,
        source_uri: column(row, 3)?,
        feature_id: column(row, 4)?,
        feature_name: column(row, 5)?,
        feature_uri: column(row, 6)?,
        feature_reach: column(row, 7)?,
        feature_measure: column(row, 8)?,
        ingest_type: IngestType::parse(&ingest)
            .ok_or_else(|| StoreError::Decode(format!("unknown ingest_type '{}'", ingest)))?,
        feature_type: column(row, 10)?,
    })
}

fn decode_feature(row: &Row) -> Result<Feature, StoreError> {
    let x: Option<f64> = column(row, 6)?;
    let y: Option<f64> = column(row, 7)?;
    let comid: Option<Comid> = column(row, 8)?;
    let measure: Option<Decimal> = column(row, 9)?;

    let position = match (comid, measure) {
        (Some(comid), Some(m)) => Some(NetworkPosition::new(comid, decimal_to_f64(m)?)),
        (Some(comid), None) => Some(NetworkPosition::at_downstream_end(comid)),
        _ => None,
    };

    Ok(Feature {
        identifier: column(row, 0)?,
        name: column(row, 1)?,
        uri: column(row, 2)?,
        source_suffix: column(row, 3)?,
        source_name: column(row, 4)?,
        reachcode: column(row, 5)?,
        geometry: x.zip(y).map(|(x, y)| Geometry::Point(Point::new(x, y))),
        position,
    })
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

impl FlowNetwork for PgNetworkStore {
    fn segment(&self, comid: Comid) -> Result<Option<Segment>, StoreError> {
        let sql = format!("SELECT {} {} WHERE v.comid = $1::bigint", SEGMENT_COLUMNS, FLOWLINE_FROM);
        self.query_rows("segment", &sql, &[&comid])?
            .first()
            .map(decode_segment)
            .transpose()
    }

    fn upstream_neighbors(&self, comid: Comid) -> Result<Vec<UpstreamNeighbor>, StoreError> {
        self.query_rows("upstream_neighbors", SQL_UPSTREAM, &[&comid])?
            .iter()
            .map(|row| {
                Ok(UpstreamNeighbor {
                    comid: column(row, 0)?,
                    levelpath: column(row, 1)?,
                })
            })
            .collect()
    }

    fn downstream_neighbors(&self, comid: Comid) -> Result<Vec<Comid>, StoreError> {
        self.query_rows("downstream_neighbors", SQL_DOWNSTREAM, &[&comid])?
            .iter()
            .map(|row| column(row, 0))
            .collect()
    }
}

impl NetworkStore for PgNetworkStore {
    fn list_sources(&self) -> Result<Vec<Source>, StoreError> {
        let sql = format!("{} ORDER BY crawler_source_id", SQL_SOURCES);
        self.query_rows("list_sources", &sql, &[])?
            .iter()
            .map(decode_source)
            .collect()
    }

    fn source_by_suffix(&self, suffix: &str) -> Result<Option<Source>, StoreError> {
        let sql = format!(
            "{} WHERE lower(source_suffix) = lower($1) ORDER BY crawler_source_id LIMIT 1",
            SQL_SOURCES
        );
        self.query_rows("source_by_suffix", &sql, &[&suffix])?
            .first()
            .map(decode_source)
            .transpose()
    }

    fn upsert_source(&self, source: &Source) -> Result<(), StoreError> {
        let ingest = source.ingest_type.as_str();
        self.with_client("upsert_source", |client| {
            client.execute(
                SQL_UPSERT_SOURCE,
                &[
                    &source.crawler_source_id,
                    &source.source_name,
                    &source.source_suffix,
                    &source.source_uri,
                    &source.feature_id,
                    &source.feature_name,
                    &source.feature_uri,
                    &source.feature_reach,
                    &source.feature_measure,
                    &ingest,
                    &source.feature_type,
                ],
            )
        })?;
        Ok(())
    }

    fn deactivate_source(&self, suffix: &str) -> Result<bool, StoreError> {
        let deleted = self.with_client("deactivate_source", |client| {
            client.execute(SQL_DELETE_SOURCE, &[&suffix])
        })?;
        Ok(deleted > 0)
    }

    fn nearest_segment(&self, point: &Point<f64>, radius: f64)
        -> Result<Option<FlowlineSegment>, StoreError> {
        let predicate = format!(
            "WHERE ST_DWithin(f.shape, {p}, $3)
             ORDER BY ST_Distance(f.shape, {p}), v.comid
             LIMIT 1",
            p = QUERY_POINT
        );
        let (x, y) = (point.x(), point.y());
        Ok(self
            .flowline_where("nearest_segment", &predicate, &[&x, &y, &radius])?
            .into_iter()
            .next())
    }

    fn flowline(&self, comid: Comid) -> Result<Option<FlowlineSegment>, StoreError> {
        Ok(self
            .flowline_where("flowline", "WHERE v.comid = $1::bigint", &[&comid])?
            .into_iter()
            .next())
    }

    fn levelpath_segments(&self, levelpath: i64) -> Result<Vec<FlowlineSegment>, StoreError> {
        self.flowline_where(
            "levelpath_segments",
            "WHERE v.levelpathid = $1::bigint ORDER BY v.hydroseq DESC",
            &[&levelpath],
        )
    }

    fn catchment_geometry(&self, comid: Comid) -> Result<Option<MultiPolygon<f64>>, StoreError> {
        let rows = self.query_rows(
            "catchment_geometry",
            "SELECT ST_AsGeoJSON(ST_Force2D(the_geom)) FROM nhdplus.catchmentsp
              WHERE featureid = $1::bigint",
            &[&comid],
        )?;
        match rows.first() {
            Some(row) => {
                let text: String = column(row, 0)?;
                let polygons = parse_geojson(&text)?
                    .to_multi_polygon()
                    .map_err(|e| StoreError::Decode(format!("catchment {}: {}", comid, e)))?;
                Ok(Some(polygons))
            }
            None => Ok(None),
        }
    }

    fn catchment_at(&self, point: &Point<f64>) -> Result<Option<Catchment>, StoreError> {
        let sql = format!(
            "SELECT featureid::bigint, ST_AsGeoJSON(ST_Force2D(the_geom))
               FROM nhdplus.catchmentsp
              WHERE ST_Covers(the_geom, {})
              ORDER BY featureid
              LIMIT 1",
            QUERY_POINT
        );
        let (x, y) = (point.x(), point.y());
        let rows = self.query_rows("catchment_at", &sql, &[&x, &y])?;
        match rows.first() {
            Some(row) => {
                let comid: Comid = column(row, 0)?;
                let text: String = column(row, 1)?;
                let geometry = parse_geojson(&text)?
                    .to_multi_polygon()
                    .map_err(|e| StoreError::Decode(format!("catchment {}: {}", comid, e)))?;
                Ok(Some(Catchment { comid, geometry }))
            }
            None => Ok(None),
        }
    }

    fn features_for_source(&self, suffix: &str, identifier: Option<&str>)
        -> Result<Vec<Feature>, StoreError> {
        self.features_where(
            "features_for_source",
            "WHERE lower(s.source_suffix) = lower($1)
               AND ($2::text IS NULL OR f.identifier = $2)
             ORDER BY f.identifier",
            &[&suffix, &identifier],
        )
    }

    fn features_near(&self, point: &Point<f64>, radius: f64, limit: usize)
        -> Result<Vec<Feature>, StoreError> {
        let predicate = format!(
            "WHERE f.location IS NOT NULL
               AND ST_DWithin(f.location, {p}, $3)
             ORDER BY ST_Distance(f.location, {p}), f.identifier
             LIMIT $4",
            p = QUERY_POINT
        );
        let (x, y) = (point.x(), point.y());
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.features_where("features_near", &predicate, &[&x, &y, &radius, &limit])
    }

    fn features_on_comids(&self, suffix: &str, comids: &[Comid])
        -> Result<Vec<Feature>, StoreError> {
        if comids.is_empty() {
            return Ok(Vec::new());
        }
        self.features_where(
            "features_on_comids",
            "WHERE lower(s.source_suffix) = lower($1)
               AND f.comid = ANY($2::bigint[])
             ORDER BY f.identifier",
            &[&suffix, &comids],
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
