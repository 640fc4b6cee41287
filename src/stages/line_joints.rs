// ===========================================================================
// node-3 / spatial-5b: one joint per junction of distinct lines
// ===========================================================================
use super::{StageCounts, StageOutcome};
use crate::config::PipelineConfig;
use crate::error::{ConsistencyError, StageError};
use crate::network::{JointOrigin, Network, Terminal};
use crate::spatial_index::PointIndex;
use crate::clusters::Clusters;
use log::debug;
use rayon::prelude::*;
use std::collections::BTreeSet;

pub fn run(network: &mut Network, config: &PipelineConfig) -> Result<StageOutcome, StageError> {
    let counts = unify_free_terminals(network, config.coincidence_tolerance, JointOrigin::LineJoint)?;
    Ok(StageOutcome::from_counts(counts))
}

/// Cluster free, referenced terminals lying within `tolerance` of each other.
/// Every cluster touching two or more distinct lines collapses into its
/// lowest joint, or into a new joint of `origin` at its lowest node.
pub fn unify_free_terminals(
    network: &mut Network,
    tolerance: f64,
    origin: JointOrigin,
) -> Result<StageCounts, ConsistencyError> {
    let mut counts = StageCounts::default();
    let terminals: Vec<(Terminal, geo_types::Coord<f64>)> = network
        .terminals()
        .into_iter()
        .filter(|t| network.is_free(*t) && network.degree(*t) > 0)
        .filter_map(|t| network.position(t).map(|p| (t, p)))
        .collect();
    let index = PointIndex::new(terminals.iter().copied());
    let neighbours: Vec<Vec<Terminal>> = terminals
        .par_iter()
        .map(|(_, pos)| index.within(*pos, tolerance))
        .collect();

    let mut clusters = Clusters::new(terminals.iter().map(|(t, _)| *t));
    for ((terminal, _), near) in terminals.iter().zip(&neighbours) {
        for other in near {
            clusters.link(*terminal, *other);
        }
    }

    for members in clusters.into_clusters() {
        let lines: BTreeSet<_> = members.iter().flat_map(|t| network.lines_at(*t)).collect();
        if lines.len() < 2 {
            continue;
        }
        let existing = members
            .iter()
            .copied()
            .find(|t| matches!(t, Terminal::Joint(_)));
        let target = match existing {
            Some(joint) => joint,
            None => {
                let Some(position) = network.position(members[0]) else {
                    continue;
                };
                counts.created += 1;
                Terminal::Joint(network.add_joint(position, origin))
            }
        };
        for member in members.iter().copied().filter(|m| *m != target) {
            network.retarget_all(member, target)?;
            network.remove_terminal(member);
            counts.merged += 1;
        }
        debug!("joined {} lines at {}", lines.len(), target);
    }
    Ok(counts)
}
