// ===========================================================================
// topology-1, -2a, -2b, -2c: connectivity graph and pruning
// ===========================================================================
use super::merge_lines::merge_chains;
use super::{StageCounts, StageOutcome};
use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::geometry_utils;
use crate::graph::ENDPOINT_EPSILON;
use crate::network::{JointOrigin, Network, Terminal};
use log::{debug, info};

/// Build and validate the graph; reports its size.
pub fn connections(network: &mut Network, _: &PipelineConfig) -> Result<StageOutcome, StageError> {
    network.validate_endpoints(ENDPOINT_EPSILON)?;
    let graph = network.connectivity()?;
    info!(
        "connectivity graph: {} vertices, {} edges, {} components",
        graph.vertex_count(),
        graph.edge_count(),
        graph.component_count()
    );
    Ok(StageOutcome::default()
        .metric("vertices", graph.vertex_count())
        .metric("edges", graph.edge_count())
        .metric("components", graph.component_count()))
}

/// Free joints left with a single line give way to a plain node.
pub fn dangling_joints(
    network: &mut Network,
    _: &PipelineConfig,
) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    for joint in network.joint_ids() {
        let terminal = Terminal::Joint(joint);
        match network.degree(terminal) {
            0 => {
                network.remove_joint(joint);
                counts.eliminated += 1;
            }
            1 if network.is_free(terminal) => {
                let Some(pos) = network.position(terminal) else {
                    continue;
                };
                let node = network.add_node(pos, None);
                network.retarget_all(terminal, Terminal::Node(node))?;
                network.remove_joint(joint);
                counts.eliminated += 1;
                counts.created += 1;
                debug!("dangling joint {} replaced by {}", joint, node);
            }
            _ => {}
        }
    }
    Ok(StageOutcome::from_counts(counts))
}

/// Splits that ended up joining two mergeable lines are merged away.
pub fn redundant_splits(
    network: &mut Network,
    config: &PipelineConfig,
) -> Result<StageOutcome, StageError> {
    let counts = merge_chains(network, config, |network, terminal| match terminal {
        Terminal::Joint(id) => network
            .joint(id)
            .is_some_and(|j| j.origin == JointOrigin::Split),
        Terminal::Node(_) => false,
    })?;
    Ok(StageOutcome::from_counts(counts))
}

/// Station joints sitting on a node of the same station fold into that node.
pub fn redundant_joints(
    network: &mut Network,
    config: &PipelineConfig,
) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let tolerance = config.coincidence_tolerance;
    for joint in network.joint_ids() {
        let terminal = Terminal::Joint(joint);
        let (Some(station), Some(pos)) = (network.owner(terminal), network.position(terminal)) else {
            continue;
        };
        let node = network.station(station).and_then(|s| {
            s.nodes.iter().copied().find(|n| {
                network
                    .node(*n)
                    .is_some_and(|node| geometry_utils::distance(node.position, pos) <= tolerance)
            })
        });
        if let Some(node) = node {
            network.retarget_all(terminal, Terminal::Node(node))?;
            network.remove_joint(joint);
            counts.merged += 1;
            debug!("station joint {} folded into {}", joint, node);
        }
    }
    Ok(StageOutcome::from_counts(counts))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fixtures::NetworkFixture;
    use geo_types::Coord;

    #[test]
    fn connections_report_graph_size() {
        let mut fx = NetworkFixture::new();
        fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        fx.line(&[(50.0, 0.0), (60.0, 0.0)]);
        let mut network = fx.build();
        let outcome = connections(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!(outcome.metrics["vertices"], 4);
        assert_eq!(outcome.metrics["edges"], 2);
        assert_eq!(outcome.metrics["components"], 2);
        assert!(outcome.counts.is_empty());
        assert!(network.has_cached_connectivity());
    }

    #[test]
    fn dangling_joint_becomes_node() {
        let mut fx = NetworkFixture::new();
        let line = fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        let mut network = fx.build();
        let Terminal::Node(end) = network.line(line).unwrap().end else {
            unreachable!()
        };
        network.promote_to_joint(end, JointOrigin::Split).unwrap();
        network.add_joint(Coord { x: 99.0, y: 99.0 }, JointOrigin::LineJoint);

        let outcome = dangling_joints(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!((outcome.counts.eliminated, outcome.counts.created), (2, 1));
        assert_eq!(network.joint_count(), 0);
        assert!(matches!(network.line(line).unwrap().end, Terminal::Node(_)));
        assert!(dangling_joints(&mut network, &PipelineConfig::default()).unwrap().counts.is_empty());
    }

    #[test]
    fn only_split_joints_are_merged_through() {
        let mut fx = NetworkFixture::new();
        let a = fx.node(0.0, 0.0);
        let b = fx.node(10.0, 0.0);
        let c = fx.node(20.0, 0.0);
        let d = fx.node(30.0, 0.0);
        fx.line_between(a, b, &[]);
        fx.line_between(b, c, &[]);
        fx.line_between(c, d, &[]);
        let mut network = fx.build();
        network.promote_to_joint(b, JointOrigin::Split).unwrap();
        network.promote_to_joint(c, JointOrigin::LineJoint).unwrap();

        let outcome = redundant_splits(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!(outcome.counts.merged, 1);
        assert_eq!(network.line_count(), 2);
        assert_eq!(network.joint_count(), 1);
        assert!(redundant_splits(&mut network, &PipelineConfig::default()).unwrap().counts.is_empty());
    }

    #[test]
    fn station_joint_folds_into_station_node() {
        let mut fx = NetworkFixture::new();
        let station = fx.station(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let busbar = fx.node(5.0, 5.0);
        let outside = fx.node(50.0, 5.0);
        let feeder = fx.line(&[(5.05, 5.0), (50.0, 50.0)]);
        fx.line_between(busbar, outside, &[]);
        let mut network = fx.build();
        let Terminal::Node(start) = network.line(feeder).unwrap().start else {
            unreachable!()
        };
        let joint = network.promote_to_joint(start, JointOrigin::Attachment).unwrap();
        assert_eq!(network.owner(Terminal::Joint(joint)), Some(station));

        let outcome = redundant_joints(&mut network, &PipelineConfig::default()).unwrap();
        assert_eq!(outcome.counts.merged, 1);
        assert_eq!(network.line(feeder).unwrap().start, Terminal::Node(busbar));
        assert_eq!(network.degree(Terminal::Node(busbar)), 2);
        assert!(redundant_joints(&mut network, &PipelineConfig::default()).unwrap().counts.is_empty());
    }
}
