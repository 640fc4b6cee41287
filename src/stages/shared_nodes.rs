// ===========================================================================
// node-1: merge coincident nodes
// ===========================================================================
use super::{StageCounts, StageOutcome};
use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::network::{Network, NodeId, Terminal};
use crate::spatial_index::PointIndex;
use crate::clusters::Clusters;
use log::debug;
use rayon::prelude::*;

pub fn run(network: &mut Network, config: &PipelineConfig) -> Result<StageOutcome, StageError> {
    let tolerance = config.coincidence_tolerance;
    let mut counts = StageCounts::default();

    let nodes: Vec<(NodeId, geo_types::Coord<f64>)> =
        network.nodes().map(|n| (n.id, n.position)).collect();
    let index = PointIndex::new(nodes.iter().map(|(i, p)| (*i, *p)));

    let neighbours: Vec<Vec<NodeId>> = nodes
        .par_iter()
        .map(|(_, pos)| index.within(*pos, tolerance))
        .collect();

    let mut clusters = Clusters::new(nodes.iter().map(|(id, _)| *id));
    for ((id, _), near) in nodes.iter().zip(&neighbours) {
        for other in near {
            clusters.link(*id, *other);
        }
    }

    for group in clusters.into_merges() {
        let canonical = group[0];
        let members: Vec<NodeId> = group[1..].to_vec();

        let tag = std::iter::once(canonical)
            .chain(members.iter().copied())
            .find_map(|id| network.node(id).and_then(|n| n.tag.clone()));
        let owner = std::iter::once(canonical)
            .chain(members.iter().copied())
            .filter_map(|id| network.owner(Terminal::Node(id)))
            .min();

        for member in &members {
            network.retarget_all(Terminal::Node(*member), Terminal::Node(canonical))?;
            network.remove_node(*member);
            counts.merged += 1;
        }
        if network.node(canonical).is_some_and(|n| n.tag != tag) {
            network.update_node(canonical, |n| n.tag = tag);
        }
        if owner.is_some() {
            network.set_owner(Terminal::Node(canonical), owner);
        }
        debug!("merged {} nodes into {}", members.len(), canonical);
    }

    let collapsed: Vec<_> = network
        .lines()
        .filter(|l| l.is_loop() && l.length() <= tolerance)
        .map(|l| l.id)
        .collect();
    for id in collapsed {
        network.remove_line(id);
        counts.eliminated += 1;
    }

    let (nodes_dropped, joints_dropped) = network.prune_orphans();
    counts.eliminated += nodes_dropped + joints_dropped;
    Ok(StageOutcome::from_counts(counts))
}
