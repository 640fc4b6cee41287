// ===========================================================================
// spatial-5a / 5b: terminals meeting lines and other terminals
// ===========================================================================
use super::line_joints::unify_free_terminals;
use super::{StageCounts, StageOutcome};
use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::geometry_utils;
use crate::network::{JointOrigin, Line, LineId, Network, Side, Terminal};
use crate::spatial_index::{EnvelopeIndex, around, grow, to_aabb};
use geo_types::Coord;
use log::debug;
use ordered_float::OrderedFloat;
use rayon::prelude::*;

fn line_index(network: &Network, tolerance: f64) -> EnvelopeIndex<LineId> {
    EnvelopeIndex::new(
        network
            .lines()
            .filter_map(|l| l.bbox().map(|b| (l.id, grow(to_aabb(b), tolerance)))),
    )
}

/// Nearest line whose interior passes within `tolerance` of `pos`, then lowest id.
fn split_target(
    network: &Network,
    index: &EnvelopeIndex<LineId>,
    terminal: Terminal,
    pos: Coord<f64>,
    tolerance: f64,
) -> Option<(LineId, Coord<f64>)> {
    index
        .intersecting(&around(pos, tolerance))
        .into_iter()
        .filter_map(|id| network.line(id))
        .filter(|l| l.start != terminal && l.end != terminal)
        .filter_map(|l| interior_hit(l, pos, tolerance).map(|(d, p)| (d, l.id, p)))
        .min_by_key(|(d, id, _)| (OrderedFloat(*d), *id))
        .map(|(_, id, p)| (id, p))
}

fn interior_hit(line: &Line, pos: Coord<f64>, tolerance: f64) -> Option<(f64, Coord<f64>)> {
    let projection = geometry_utils::project_point_to_polyline(pos, &line.geometry.0)?;
    if projection.distance_to_line > tolerance {
        return None;
    }
    let near_end = [Side::Start, Side::End]
        .iter()
        .any(|side| geometry_utils::distance(projection.point, line.endpoint(*side)) <= tolerance);
    (!near_end).then_some((projection.distance_to_line, projection.point))
}

fn bbox_of(network: &Network, id: LineId, tolerance: f64) -> Option<rstar::AABB<[f64; 2]>> {
    network
        .line(id)
        .and_then(|l| l.bbox())
        .map(|b| grow(to_aabb(b), tolerance))
}

pub fn line_terminals(
    network: &mut Network,
    config: &PipelineConfig,
) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let tolerance = config.coincidence_tolerance;
    let mut index = line_index(network, tolerance);

    let dangling: Vec<Terminal> = network
        .terminals()
        .into_par_iter()
        .filter(|t| network.is_free(*t) && network.degree(*t) == 1)
        .filter(|t| {
            network
                .position(*t)
                .and_then(|pos| split_target(network, &index, *t, pos, tolerance))
                .is_some()
        })
        .collect();

    // Splits change the candidate lines, so targets are chosen again one by one.
    for terminal in dangling {
        let Some(pos) = network.position(terminal) else {
            continue;
        };
        if network.degree(terminal) != 1 {
            continue;
        }
        let Some((line, at)) = split_target(network, &index, terminal, pos, tolerance) else {
            continue;
        };
        let before = bbox_of(network, line, tolerance);
        let (joint, tail) = network.split_line(line, at, JointOrigin::Split)?;
        network.retarget_all(terminal, Terminal::Joint(joint))?;
        network.remove_terminal(terminal);

        if let Some(bbox) = before {
            index.remove(line, bbox);
        }
        for piece in [line, tail] {
            if let Some(bbox) = bbox_of(network, piece, tolerance) {
                index.insert(piece, bbox);
            }
        }
        counts.created += 1;
        counts.updated += 1;
        debug!("{} split line {} at {}", terminal, line, joint);
    }
    Ok(StageOutcome::from_counts(counts))
}

pub fn mutual_terminals(
    network: &mut Network,
    config: &PipelineConfig,
) -> Result<StageOutcome, StageError> {
    let counts = unify_free_terminals(
        network,
        config.coincidence_tolerance,
        JointOrigin::MutualTerminal,
    )?;
    Ok(StageOutcome::from_counts(counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fixtures::NetworkFixture;

    #[test]
    fn dangling_end_on_line_interior_splits_it() {
        let mut fx = NetworkFixture::new();
        let main = fx.line(&[(0.0, 0.0), (100.0, 0.0)]);
        let tap = fx.line(&[(40.0, 30.0), (40.0, 0.08)]);
        let mut network = fx.build();

        let outcome = line_terminals(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!(outcome.counts.created, 1);
        assert_eq!(network.line_count(), 3);

        let joint = network.line(tap).unwrap().end;
        let Terminal::Joint(id) = joint else {
            panic!("tap should end on a joint, got {}", joint);
        };
        assert_eq!(network.joint(id).unwrap().origin, JointOrigin::Split);
        assert_eq!(network.line(main).unwrap().end, joint);
        assert_eq!(network.degree(joint), 3);
        assert_eq!(network.line(tap).unwrap().endpoint(Side::End), Coord { x: 40.0, y: 0.0 });

        assert!(line_terminals(&mut network, &PipelineConfig::default()).unwrap().counts.is_empty());
    }

    #[test]
    fn end_near_line_endpoint_is_left_alone() {
        let mut fx = NetworkFixture::new();
        fx.line(&[(0.0, 0.0), (100.0, 0.0)]);
        fx.line(&[(100.05, 30.0), (100.05, 0.05)]);
        let mut network = fx.build();
        let outcome = line_terminals(&mut network, &PipelineConfig::default()).unwrap();
        assert!(outcome.counts.is_empty());

        // the two ends are close enough to unify instead
        let outcome = mutual_terminals(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!((outcome.counts.created, outcome.counts.merged), (1, 2));
        assert_eq!(network.joint_count(), 1);
        assert!(mutual_terminals(&mut network, &PipelineConfig::default()).unwrap().counts.is_empty());
    }
}
