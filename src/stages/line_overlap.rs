// ===========================================================================
// spatial-3: remove lines duplicated by an overlapping line
// ===========================================================================
use super::{StageCounts, StageOutcome};
use crate::config::PipelineConfig;
use crate::error::{ConsistencyError, StageError};
use crate::geometry_utils;
use crate::graph::Vertex;
use crate::network::{JointOrigin, Line, LineId, Network, Side, Terminal};
use crate::spatial_index::{EnvelopeIndex, grow, to_aabb};
use log::debug;
use rayon::prelude::*;

/// Which of two overlapping lines is redundant: `(redundant, survivor)`.
fn classify(a: &Line, b: &Line, config: &PipelineConfig) -> Option<(LineId, LineId)> {
    let f = config.line_overlap_fraction;
    let (buffer, spacing) = (config.line_overlap_buffer, config.densify_spacing);
    let a_covered = geometry_utils::coverage_fraction(&a.geometry.0, &b.geometry.0, buffer, spacing) >= f;
    let b_covered = geometry_utils::coverage_fraction(&b.geometry.0, &a.geometry.0, buffer, spacing) >= f;
    let (low, high) = if a.id < b.id { (a, b) } else { (b, a) };
    match (a_covered, b_covered) {
        (true, true) => {
            if low.attributes.len() >= high.attributes.len() {
                Some((high.id, low.id))
            } else {
                Some((low.id, high.id))
            }
        }
        (true, false) => Some((a.id, b.id)),
        (false, true) => Some((b.id, a.id)),
        (false, false) => None,
    }
}

fn candidates(network: &Network, config: &PipelineConfig) -> Vec<(LineId, LineId)> {
    let lines: Vec<&Line> = network.lines().collect();
    let buffer = config.line_overlap_buffer;
    let index = EnvelopeIndex::new(
        lines
            .iter()
            .filter_map(|l| l.bbox().map(|b| (l.id, grow(to_aabb(b), buffer)))),
    );
    lines
        .par_iter()
        .flat_map_iter(|a| {
            let found = a
                .bbox()
                .map(|b| index.intersecting(&grow(to_aabb(b), buffer)))
                .unwrap_or_default();
            found
                .into_iter()
                .filter(|id| *id > a.id)
                .filter_map(|id| network.line(id))
                .filter_map(|b| classify(a, b, config))
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Still-used terminals of the redundant line that must be spliced onto the
/// survivor, or `None` when one of them cannot be.
fn plan_splices(
    network: &Network,
    redundant: &Line,
    survivor: &Line,
    buffer: f64,
) -> Option<Vec<Terminal>> {
    let survivor_vertices = [
        Vertex::of(network, survivor.start),
        Vertex::of(network, survivor.end),
    ];
    let mut splices = Vec::new();
    for side in [Side::Start, Side::End] {
        let terminal = redundant.terminal(side);
        let remaining = network.degree(terminal) - redundant.sides_at(terminal).len();
        if remaining == 0
            || splices.contains(&terminal)
            || survivor_vertices.contains(&Vertex::of(network, terminal))
        {
            continue;
        }
        if !network.is_free(terminal) {
            return None;
        }
        let pos = network.position(terminal)?;
        if geometry_utils::point_polyline_distance(pos, &survivor.geometry.0) > buffer {
            return None;
        }
        splices.push(terminal);
    }
    Some(splices)
}

/// Attach the lines of `terminal` to the survivor chain at the closest point.
fn splice(
    network: &mut Network,
    pieces: &mut Vec<LineId>,
    terminal: Terminal,
    tolerance: f64,
    counts: &mut StageCounts,
) -> Result<(), ConsistencyError> {
    let pos = network
        .position(terminal)
        .ok_or_else(|| ConsistencyError::new(format!("splice lost terminal {}", terminal)))?;
    let nearest = pieces
        .iter()
        .filter_map(|id| network.line(*id))
        .filter_map(|l| geometry_utils::project_point_to_polyline(pos, &l.geometry.0).map(|p| (l, p)))
        .min_by(|a, b| a.1.distance_to_line.total_cmp(&b.1.distance_to_line))
        .map(|(l, p)| (l.id, p, l.start, l.end, l.endpoint(Side::Start), l.endpoint(Side::End)));
    let Some((piece, projection, start, end, start_pos, end_pos)) = nearest else {
        return Err(ConsistencyError::new(format!(
            "no survivor left to splice {} onto",
            terminal
        )));
    };
    let target = if geometry_utils::distance(projection.point, start_pos) <= tolerance {
        start
    } else if geometry_utils::distance(projection.point, end_pos) <= tolerance {
        end
    } else {
        let (joint, tail) = network.split_line(piece, projection.point, JointOrigin::Split)?;
        pieces.push(tail);
        counts.created += 1;
        Terminal::Joint(joint)
    };
    if target != terminal {
        network.retarget_all(terminal, target)?;
        network.remove_terminal(terminal);
    }
    Ok(())
}

fn absorb(
    network: &mut Network,
    redundant: LineId,
    survivor: LineId,
    config: &PipelineConfig,
    counts: &mut StageCounts,
) -> Result<bool, ConsistencyError> {
    let (Some(r), Some(s)) = (network.line(redundant), network.line(survivor)) else {
        return Ok(false);
    };
    if classify(r, s, config) != Some((redundant, survivor)) {
        return Ok(false);
    }
    let Some(splices) = plan_splices(network, r, s, config.line_overlap_buffer) else {
        debug!("kept overlapping line {}: its terminals cannot reach {}", redundant, survivor);
        return Ok(false);
    };
    let removed = network
        .remove_line(redundant)
        .ok_or_else(|| ConsistencyError::new(format!("overlap lost line {}", redundant)))?;
    counts.eliminated += 1;

    let missing: Vec<(String, String)> = match network.line(survivor) {
        Some(s) => removed
            .attributes
            .iter()
            .filter(|(k, _)| !s.attributes.contains_key(*k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        None => Vec::new(),
    };
    if !missing.is_empty() {
        network.update_line(survivor, |l| l.attributes.extend(missing));
        counts.updated += 1;
    }

    let mut pieces = vec![survivor];
    for terminal in splices {
        splice(network, &mut pieces, terminal, config.coincidence_tolerance, counts)?;
    }
    debug!("removed line {} overlapping {}", redundant, survivor);
    Ok(true)
}

pub fn run(network: &mut Network, config: &PipelineConfig) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    loop {
        let mut applied = 0;
        for (redundant, survivor) in candidates(network, config) {
            if absorb(network, redundant, survivor, config, &mut counts)? {
                applied += 1;
            }
        }
        if applied == 0 {
            break;
        }
    }
    let (nodes, joints) = network.prune_orphans();
    counts.eliminated += nodes + joints;
    Ok(StageOutcome::from_counts(counts))
}
