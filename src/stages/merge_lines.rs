// ===========================================================================
// node-2 / spatial-6: merge collinear chains through degree-2 terminals
// ===========================================================================
use super::{StageCounts, StageOutcome};
use crate::config::PipelineConfig;
use crate::error::{ConsistencyError, StageError};
use crate::geometry_utils;
use crate::network::{Line, LineId, Network, Side, Terminal};
use geo_types::Coord;
use log::debug;

pub fn run(network: &mut Network, config: &PipelineConfig) -> Result<StageOutcome, StageError> {
    let counts = merge_chains(network, config, |_, _| true)?;
    Ok(StageOutcome::from_counts(counts))
}

/// Equal merge attributes and equal tag.
pub fn compatible(a: &Line, b: &Line, keys: &[String]) -> bool {
    a.tag == b.tag && keys.iter().all(|k| a.attribute(k) == b.attribute(k))
}

/// First coordinate leaving the terminal at `side` that does not sit on it.
fn neighbour(line: &Line, side: Side) -> Option<Coord<f64>> {
    let coords = line.coords_from(side);
    let origin = coords[0];
    coords
        .into_iter()
        .skip(1)
        .find(|c| geometry_utils::distance(*c, origin) > f64::EPSILON)
}

/// The two distinct lines meeting at `terminal` if it is a mergeable junction.
fn junction(network: &Network, terminal: Terminal, config: &PipelineConfig) -> Option<(Side, Side)> {
    if !network.is_free(terminal) {
        return None;
    }
    let ends = network.ends_at(terminal);
    let [(a, side_a), (b, side_b)] = ends else {
        return None;
    };
    if a == b {
        return None;
    }
    let (line_a, line_b) = (network.line(*a)?, network.line(*b)?);
    if !compatible(line_a, line_b, &config.merge_attribute_keys) {
        return None;
    }
    let vertex = network.position(terminal)?;
    let before = neighbour(line_a, *side_a)?;
    let after = neighbour(line_b, *side_b)?;
    let deflection = geometry_utils::deflection_deg(before, vertex, after);
    (deflection <= config.max_merge_deflection_deg).then_some((*side_a, *side_b))
}

/// Merge at every accepted junction until none is left. The lower line id
/// survives and keeps its orientation.
pub fn merge_chains(
    network: &mut Network,
    config: &PipelineConfig,
    accept: impl Fn(&Network, Terminal) -> bool,
) -> Result<StageCounts, ConsistencyError> {
    let mut counts = StageCounts::default();
    loop {
        let mut merged_this_pass = 0;
        for terminal in network.terminals() {
            if !network.terminal_exists(terminal) || !accept(network, terminal) {
                continue;
            }
            let Some((keep_side, drop_side)) = junction(network, terminal, config) else {
                continue;
            };
            let ends = network.ends_at(terminal);
            let (keep, drop) = (ends[0].0, ends[1].0);
            merge_pair(network, terminal, keep, keep_side, drop, drop_side)?;
            merged_this_pass += 1;
        }
        if merged_this_pass == 0 {
            break;
        }
        counts.merged += merged_this_pass;
    }
    Ok(counts)
}

fn merge_pair(
    network: &mut Network,
    terminal: Terminal,
    keep: LineId,
    keep_side: Side,
    drop: LineId,
    drop_side: Side,
) -> Result<(), ConsistencyError> {
    let dropped = network
        .remove_line(drop)
        .ok_or_else(|| ConsistencyError::new(format!("merge lost line {}", drop)))?;
    // Coordinates of the dropped line running away from the junction.
    let away: Vec<Coord<f64>> = dropped.coords_from(drop_side);
    let far_terminal = dropped.terminal(drop_side.opposite());

    network.update_line(keep, |line| {
        let mut coords = line.geometry.0.clone();
        match keep_side {
            Side::End => coords.extend_from_slice(&away[1..]),
            Side::Start => {
                let mut head: Vec<Coord<f64>> = away[1..].iter().rev().copied().collect();
                head.extend(coords);
                coords = head;
            }
        }
        line.geometry.0 = geometry_utils::dedup_consecutive(coords);
        line.set_terminal(keep_side, far_terminal);
        for (k, v) in &dropped.attributes {
            line.attributes.entry(k.clone()).or_insert_with(|| v.clone());
        }
    });

    network.remove_terminal(terminal);
    debug!("merged {} into {} through {}", drop, keep, terminal);
    Ok(())
}
