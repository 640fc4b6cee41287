// ===========================================================================
// topology-4: high-voltage subnetwork with electrical closure
// ===========================================================================
use super::electrical::station_classes;
use super::{StageCounts, StageOutcome};
use crate::config::PipelineConfig;
use crate::error::StageError;
use crate::graph::{ConnectivityGraph, Vertex};
use crate::network::{LineId, Network, StationId, VoltageClass};
use crate::clusters::Clusters;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Lines and stations of the high-voltage grid, by id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HighVoltageSubnetwork {
    pub lines: BTreeSet<LineId>,
    /// Lower-voltage lines needed to keep high-voltage groups connected.
    pub closure_lines: BTreeSet<LineId>,
    pub stations: BTreeSet<StationId>,
}

impl HighVoltageSubnetwork {
    pub fn contains_line(&self, id: LineId) -> bool {
        self.lines.contains(&id) || self.closure_lines.contains(&id)
    }

    pub fn all_lines(&self) -> BTreeSet<LineId> {
        self.lines.union(&self.closure_lines).copied().collect()
    }
}

fn is_eligible(network: &Network, id: LineId) -> bool {
    network
        .line(id)
        .is_some_and(|l| !l.electrical.as_ref().is_some_and(|e| e.conflicted))
}

fn is_high(network: &Network, id: LineId) -> bool {
    network.line(id).is_some_and(|l| {
        l.electrical
            .as_ref()
            .is_some_and(|e| !e.conflicted && e.class == Some(VoltageClass::High))
    })
}

/// Shortest eligible path from `tree` to a vertex of a group not yet joined.
/// Returns the group, the lines of the path and the vertices it crosses.
fn nearest_group(
    network: &Network,
    graph: &ConnectivityGraph,
    tree: &BTreeSet<Vertex>,
    group_of: &BTreeMap<Vertex, usize>,
    joined: &[bool],
) -> Option<(usize, Vec<LineId>, Vec<Vertex>)> {
    let mut parent: BTreeMap<Vertex, Option<(Vertex, LineId)>> =
        tree.iter().map(|v| (*v, None)).collect();
    let mut queue: VecDeque<Vertex> = tree.iter().copied().collect();
    while let Some(vertex) = queue.pop_front() {
        for line in graph.lines_at(vertex) {
            if !is_eligible(network, *line) {
                continue;
            }
            let Some(next) = graph.opposite(*line, vertex) else {
                continue;
            };
            if parent.contains_key(&next) {
                continue;
            }
            parent.insert(next, Some((vertex, *line)));
            if let Some(group) = group_of.get(&next).filter(|g| !joined[**g]) {
                let mut lines = Vec::new();
                let mut crossed = Vec::new();
                let mut at = next;
                while let Some(Some((prev, via))) = parent.get(&at) {
                    lines.push(*via);
                    crossed.push(*prev);
                    at = *prev;
                }
                return Some((*group, lines, crossed));
            }
            queue.push_back(next);
        }
    }
    None
}

pub fn run(network: &mut Network, config: &PipelineConfig) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let graph = network.connectivity()?;

    let high_lines: BTreeSet<LineId> = network
        .line_ids()
        .into_iter()
        .filter(|id| is_high(network, *id))
        .collect();
    let mut high_vertices: BTreeSet<Vertex> = network
        .stations()
        .filter(|s| station_classes(s, &config.voltage).contains(&VoltageClass::High))
        .map(|s| Vertex::Station(s.id))
        .collect();
    for line in &high_lines {
        if let Some((a, b)) = graph.endpoints(*line) {
            high_vertices.insert(a);
            high_vertices.insert(b);
        }
    }

    let mut clusters = Clusters::new(high_vertices.iter().copied());
    for line in &high_lines {
        if let Some((a, b)) = graph.endpoints(*line) {
            clusters.link(a, b);
        }
    }
    let groups: Vec<Vec<Vertex>> = clusters.into_clusters();
    let group_of: BTreeMap<Vertex, usize> = groups
        .iter()
        .enumerate()
        .flat_map(|(g, members)| members.iter().map(move |v| (*v, g)))
        .collect();

    let mut closure_lines = BTreeSet::new();
    let mut joined = vec![false; groups.len()];
    for start in 0..groups.len() {
        if joined[start] {
            continue;
        }
        joined[start] = true;
        let mut tree: BTreeSet<Vertex> = groups[start].iter().copied().collect();
        while let Some((group, lines, crossed)) =
            nearest_group(network, &graph, &tree, &group_of, &joined)
        {
            joined[group] = true;
            tree.extend(groups[group].iter().copied());
            tree.extend(crossed);
            for line in lines {
                if !high_lines.contains(&line) {
                    debug!("line {} closes high-voltage group {}", line, group);
                    closure_lines.insert(line);
                }
            }
        }
    }

    let subnetwork = HighVoltageSubnetwork {
        stations: high_vertices
            .iter()
            .filter_map(|v| match v {
                Vertex::Station(id) => Some(*id),
                _ => None,
            })
            .collect(),
        lines: high_lines,
        closure_lines,
    };
    info!(
        "high-voltage network: {} lines, {} closure lines, {} stations",
        subnetwork.lines.len(),
        subnetwork.closure_lines.len(),
        subnetwork.stations.len()
    );
    let outcome_metrics = (
        subnetwork.lines.len(),
        subnetwork.closure_lines.len(),
        subnetwork.stations.len(),
    );
    if network.update_views(|views| views.high_voltage = Some(subnetwork)) {
        counts.updated += 1;
    }
    Ok(StageOutcome::from_counts(counts)
        .metric("lines", outcome_metrics.0)
        .metric("closure_lines", outcome_metrics.1)
        .metric("stations", outcome_metrics.2)
        .metric("groups", groups.len()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fixtures::NetworkFixture;
    use crate::stages::electrical;

    fn square(x: f64) -> Vec<(f64, f64)> {
        vec![(x, 0.0), (x + 10.0, 0.0), (x + 10.0, 10.0), (x, 10.0)]
    }

    #[test]
    fn low_voltage_link_closes_the_grid() {
        let mut fx = NetworkFixture::new();
        let west = fx.station(&square(0.0));
        let east = fx.station(&square(100.0));
        fx.station_attrs(west, &[("voltage", "380000")]);
        fx.station_attrs(east, &[("voltage", "380000")]);
        let a = fx.node(5.0, 5.0);
        let b = fx.node(105.0, 5.0);
        let c = fx.node(105.0, 300.0);
        let link = fx.line_between(a, b, &[]);
        let spur = fx.line_between(b, c, &[]);
        fx.attrs(link, &[("voltage", "400")]);
        fx.attrs(spur, &[("voltage", "400")]);
        let mut network = fx.build();

        let config = PipelineConfig::default();
        electrical::run(&mut network, &config).unwrap();
        let outcome = run(&mut network, &config).unwrap();
        assert_eq!(outcome.counts.updated, 1);

        let hv = network.views().high_voltage.clone().unwrap();
        assert!(hv.lines.is_empty());
        assert_eq!(hv.closure_lines, BTreeSet::from([link]));
        assert_eq!(hv.stations, BTreeSet::from([west, east]));
        assert!(!hv.contains_line(spur));
        assert!(run(&mut network, &config).unwrap().counts.is_empty());
    }

    #[test]
    fn conflicted_lines_are_not_extracted() {
        let mut fx = NetworkFixture::new();
        let a = fx.node(0.0, 0.0);
        let b = fx.node(10.0, 0.0);
        let c = fx.node(20.0, 0.0);
        let d = fx.node(0.0, 100.0);
        let e = fx.node(10.0, 100.0);
        let mixed_high = fx.line_between(a, b, &[]);
        let mixed_low = fx.line_between(b, c, &[]);
        let clean = fx.line_between(d, e, &[]);
        fx.attrs(mixed_high, &[("voltage", "380000")]);
        fx.attrs(mixed_low, &[("voltage", "400")]);
        fx.attrs(clean, &[("voltage", "220000")]);
        let mut network = fx.build();

        let config = PipelineConfig::default();
        electrical::run(&mut network, &config).unwrap();
        run(&mut network, &config).unwrap();
        let hv = network.views().high_voltage.clone().unwrap();
        assert_eq!(hv.lines, BTreeSet::from([clean]));
        assert!(hv.closure_lines.is_empty());
    }
}
