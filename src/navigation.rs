/// Network navigation: mode resolution and the breadth-first traversal.
///
/// Traversal walks an explicit FIFO worklist over the `FlowNetwork`
/// adjacency lookups, starting from a network position. Each segment is
/// reported once, in the order it is first reached. When a later route
/// reaches a segment over a shorter distance, that distance replaces the
/// recorded one and the segment's neighbours are revisited with it, so
/// diversions of unequal length still find every segment within range.
///
/// Distances are accumulated in kilometres from the start position. The
/// origin contributes the part of its length between the start measure and
/// its far end in the direction of travel; every further segment contributes
/// its full `length_km`. A neighbour is only entered if the distance to its
/// near end does not exceed the limit on its shortest route; a neighbour
/// left out for that reason marks the result as truncated.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Instant;
use tracing::{debug, warn};

use crate::model::{Comid, NetworkPosition, NldiError, Segment};
use crate::store::FlowNetwork;

/// The deadline is checked once per this many dequeued segments.
const DEADLINE_CHECK_INTERVAL: usize = 32;

// ---------------------------------------------------------------------------
// Modes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Upstream,
    Downstream,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationMode {
    /// UM: up the main stem only.
    UpstreamMain,
    /// UT: up the main stem and every tributary.
    UpstreamTributaries,
    /// DM: down the main path, ignoring diversions.
    DownstreamMain,
    /// DD: down the main path and every diversion.
    DownstreamDiversions,
}

impl NavigationMode {
    pub const ALL: [NavigationMode; 4] = [
        NavigationMode::UpstreamMain,
        NavigationMode::UpstreamTributaries,
        NavigationMode::DownstreamMain,
        NavigationMode::DownstreamDiversions,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            NavigationMode::UpstreamMain => "UM",
            NavigationMode::UpstreamTributaries => "UT",
            NavigationMode::DownstreamMain => "DM",
            NavigationMode::DownstreamDiversions => "DD",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            NavigationMode::UpstreamMain => "upstreamMain",
            NavigationMode::UpstreamTributaries => "upstreamTributaries",
            NavigationMode::DownstreamMain => "downstreamMain",
            NavigationMode::DownstreamDiversions => "downstreamDiversions",
        }
    }

    pub fn direction(&self) -> Direction {
        match self {
            NavigationMode::UpstreamMain | NavigationMode::UpstreamTributaries => Direction::Upstream,
            NavigationMode::DownstreamMain | NavigationMode::DownstreamDiversions => Direction::Downstream,
        }
    }

    /// Whether side branches (tributaries upstream, diversions downstream)
    /// are followed.
    pub fn includes_tributaries(&self) -> bool {
        matches!(
            self,
            NavigationMode::UpstreamTributaries | NavigationMode::DownstreamDiversions
        )
    }

    /// Case-insensitive lookup by code.
    pub fn resolve(code: &str) -> Result<Self, NldiError> {
        let trimmed = code.trim();
        Self::ALL
            .into_iter()
            .find(|m| m.code().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| NldiError::InvalidNavigationMode(code.to_string()))
    }
}

impl std::fmt::Display for NavigationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// Bounds on one traversal.
#[derive(Debug, Clone, Copy, Default)]
pub struct TraversalLimits {
    /// `None` walks the whole reachable network.
    pub max_distance_km: Option<f64>,
    pub deadline: Option<Instant>,
}

impl TraversalLimits {
    pub fn unlimited() -> Self {
        TraversalLimits::default()
    }

    pub fn within(max_distance_km: f64) -> Self {
        TraversalLimits {
            max_distance_km: Some(max_distance_km),
            deadline: None,
        }
    }

    pub fn with_deadline(self, deadline: Instant) -> Self {
        TraversalLimits {
            deadline: Some(deadline),
            ..self
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigatedSegment {
    pub comid: Comid,
    pub levelpath: i64,
    pub length_km: f64,
    /// Distance from the start position to this segment's far end.
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationResult {
    pub origin: NetworkPosition,
    pub mode: NavigationMode,
    /// Breadth-first order, origin first.
    pub segments: Vec<NavigatedSegment>,
    /// The distance limit cut off at least one branch.
    pub truncated: bool,
}

impl NavigationResult {
    pub fn comids(&self) -> Vec<Comid> {
        self.segments.iter().map(|s| s.comid).collect()
    }
}

// ---------------------------------------------------------------------------
// Traversal
// ---------------------------------------------------------------------------

/// Walks the network from `start` in the direction and breadth given by
/// `mode`.
pub fn traverse<N>(
    network: &N,
    start: NetworkPosition,
    mode: NavigationMode,
    limits: TraversalLimits,
) -> Result<NavigationResult, NldiError>
where
    N: FlowNetwork + ?Sized,
{
    if let Some(max) = limits.max_distance_km {
        if !(max >= 0.0) {
            return Err(NldiError::InvalidParameter(format!(
                "distance must be a non-negative number of kilometres, got {}",
                max
            )));
        }
    }

    let origin = network.segment(start.comid)?.ok_or_else(|| {
        NldiError::PositionUnresolvable(format!("comid {} is not on the network", start.comid))
    })?;

    let origin_km = match mode.direction() {
        Direction::Upstream => origin.length_km * start.measure / 100.0,
        Direction::Downstream => origin.length_km * (100.0 - start.measure) / 100.0,
    };

    // Shortest known distance to the far end of every segment reached so
    // far. A segment is re-expanded only when a strictly shorter route to it
    // turns up, so loops in the topology still terminate.
    let mut best: HashMap<Comid, f64> = HashMap::from([(origin.comid, origin_km)]);
    let mut emitted: HashMap<Comid, usize> = HashMap::new();
    let mut cut: HashSet<Comid> = HashSet::new();
    let mut queue: VecDeque<(Segment, f64)> = VecDeque::from([(origin, origin_km)]);
    let mut segments: Vec<NavigatedSegment> = Vec::new();
    let mut processed = 0usize;

    while let Some((segment, reach_km)) = queue.pop_front() {
        if best.get(&segment.comid).is_some_and(|&known| reach_km > known) {
            continue;
        }
        if processed % DEADLINE_CHECK_INTERVAL == 0 {
            if let Some(deadline) = limits.deadline {
                if Instant::now() >= deadline {
                    warn!(
                        comid = start.comid,
                        mode = mode.code(),
                        processed,
                        "navigation deadline exceeded"
                    );
                    return Err(NldiError::DeadlineExceeded);
                }
            }
        }
        processed += 1;

        for next in next_segments(network, &segment, mode)? {
            if limits.max_distance_km.is_some_and(|max| reach_km > max) {
                cut.insert(next.comid);
                continue;
            }
            let next_reach = reach_km + next.length_km;
            match best.get(&next.comid) {
                Some(&known) if next_reach >= known => continue,
                Some(&known) => debug!(
                    comid = next.comid,
                    from_km = known,
                    to_km = next_reach,
                    "shorter route found"
                ),
                None => {}
            }
            best.insert(next.comid, next_reach);
            queue.push_back((next, next_reach));
        }

        match emitted.get(&segment.comid) {
            Some(&index) => segments[index].distance_km = reach_km,
            None => {
                emitted.insert(segment.comid, segments.len());
                segments.push(NavigatedSegment {
                    comid: segment.comid,
                    levelpath: segment.levelpath,
                    length_km: segment.length_km,
                    distance_km: reach_km,
                });
            }
        }
    }

    // Only neighbours that no route brought within the limit count as cut.
    let truncated = cut.iter().any(|comid| !best.contains_key(comid));

    debug!(
        comid = start.comid,
        mode = mode.code(),
        segments = segments.len(),
        truncated,
        "navigation complete"
    );

    Ok(NavigationResult {
        origin: start,
        mode,
        segments,
        truncated,
    })
}

/// Neighbours of `segment` to enqueue, in the order they are visited.
fn next_segments<N>(network: &N, segment: &Segment, mode: NavigationMode) -> Result<Vec<Segment>, NldiError>
where
    N: FlowNetwork + ?Sized,
{
    let comids: Vec<Comid> = match mode {
        NavigationMode::UpstreamMain => {
            let upstream = network.upstream_neighbors(segment.comid)?;
            let same_path: Vec<Comid> = upstream
                .iter()
                .filter(|n| n.levelpath == segment.levelpath)
                .map(|n| n.comid)
                .collect();
            let candidates = if same_path.is_empty() {
                upstream.iter().map(|n| n.comid).collect()
            } else {
                same_path
            };
            candidates.into_iter().min().into_iter().collect()
        }
        NavigationMode::UpstreamTributaries => {
            let mut all: Vec<Comid> = network
                .upstream_neighbors(segment.comid)?
                .iter()
                .map(|n| n.comid)
                .collect();
            all.sort_unstable();
            all
        }
        NavigationMode::DownstreamMain => {
            if segment.terminal {
                Vec::new()
            } else {
                network.downstream_neighbors(segment.comid)?.into_iter().take(1).collect()
            }
        }
        NavigationMode::DownstreamDiversions => {
            if segment.terminal {
                Vec::new()
            } else {
                let mut all = network.downstream_neighbors(segment.comid)?;
                if all.len() > 1 {
                    all[1..].sort_unstable();
                }
                all
            }
        }
    };

    let mut resolved = Vec::with_capacity(comids.len());
    for comid in comids {
        match network.segment(comid)? {
            Some(next) => resolved.push(next),
            None => warn!(from = segment.comid, comid, "neighbour missing from network, skipped"),
        }
    }
    Ok(resolved)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
