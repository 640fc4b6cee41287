// ===========================================================================
// topology-5: collapse degree-2 chains into abstract edges
// ===========================================================================
use super::{StageCounts, StageOutcome};
use crate::config::{AbstractionScope, PipelineConfig};
use crate::error::StageError;
use crate::graph::{ConnectivityGraph, Vertex};
use crate::network::{LineId, Network};
use log::{info, warn};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractVertex {
    pub vertex: Vertex,
    pub degree: usize,
}

/// A maximal chain of lines between two real vertices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractEdge {
    pub from: Vertex,
    pub to: Vertex,
    /// In walking order from `from`.
    pub lines: Vec<LineId>,
    pub length: f64,
    pub max_voltage: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbstractedTopology {
    pub scope: AbstractionScope,
    pub vertices: Vec<AbstractVertex>,
    pub edges: Vec<AbstractEdge>,
}

struct Walker<'a> {
    graph: &'a ConnectivityGraph,
    scope: &'a BTreeSet<LineId>,
    visited: BTreeSet<LineId>,
}

impl Walker<'_> {
    fn lines_at(&self, vertex: Vertex) -> Vec<LineId> {
        self.graph
            .lines_at(vertex)
            .iter()
            .copied()
            .filter(|l| self.scope.contains(l))
            .collect()
    }

    fn degree(&self, vertex: Vertex) -> usize {
        self.lines_at(vertex).len()
    }

    fn is_real(&self, vertex: Vertex) -> bool {
        vertex.is_station() || self.degree(vertex) != 2
    }

    /// Follow `first` away from `start` until a real vertex or back at `start`.
    fn walk(&mut self, start: Vertex, first: LineId) -> (Vec<LineId>, Vertex) {
        let mut lines = Vec::new();
        let mut at = start;
        let mut line = first;
        loop {
            self.visited.insert(line);
            lines.push(line);
            let Some(next) = self.graph.opposite(line, at) else {
                return (lines, at);
            };
            if next == start || self.is_real(next) {
                return (lines, next);
            }
            let Some(onward) = self.lines_at(next).into_iter().find(|l| *l != line) else {
                return (lines, next);
            };
            if self.visited.contains(&onward) {
                return (lines, next);
            }
            at = next;
            line = onward;
        }
    }

    /// Vertices of the cycle through `line`, walking from one of its ends.
    fn cycle_vertices(&self, line: LineId) -> BTreeSet<Vertex> {
        let mut vertices = BTreeSet::new();
        let Some((mut at, _)) = self.graph.endpoints(line) else {
            return vertices;
        };
        let mut current = line;
        while vertices.insert(at) {
            let Some(next) = self.graph.opposite(current, at) else {
                break;
            };
            let Some(onward) = self.lines_at(next).into_iter().find(|l| *l != current) else {
                vertices.insert(next);
                break;
            };
            at = next;
            current = onward;
        }
        vertices
    }
}

fn edge(network: &Network, from: Vertex, to: Vertex, lines: Vec<LineId>) -> AbstractEdge {
    let parts: Vec<_> = lines.iter().filter_map(|id| network.line(*id)).collect();
    AbstractEdge {
        from,
        to,
        length: parts.iter().map(|l| l.length()).sum(),
        max_voltage: parts
            .iter()
            .filter_map(|l| l.electrical.as_ref().and_then(|e| e.nominal_voltage))
            .max(),
        lines,
    }
}

pub fn abstract_topology(
    network: &Network,
    graph: &ConnectivityGraph,
    scope: AbstractionScope,
) -> AbstractedTopology {
    let lines: BTreeSet<LineId> = match scope {
        AbstractionScope::Full => network.line_ids().into_iter().collect(),
        AbstractionScope::HighVoltage => match &network.views().high_voltage {
            Some(hv) => hv.all_lines(),
            None => {
                warn!("no high-voltage network recorded; abstraction is empty");
                BTreeSet::new()
            }
        },
    };
    let mut walker = Walker {
        graph,
        scope: &lines,
        visited: BTreeSet::new(),
    };

    let mut vertices = Vec::new();
    let mut edges = Vec::new();
    for vertex in graph.vertices() {
        let degree = walker.degree(vertex);
        if degree == 0 || !walker.is_real(vertex) {
            continue;
        }
        vertices.push(AbstractVertex { vertex, degree });
        for first in walker.lines_at(vertex) {
            if walker.visited.contains(&first) {
                continue;
            }
            let (chain, end) = walker.walk(vertex, first);
            edges.push(edge(network, vertex, end, chain));
        }
    }

    // What is left are cycles through degree-2 vertices only.
    for line in lines.iter().copied() {
        if walker.visited.contains(&line) {
            continue;
        }
        let Some(anchor) = walker.cycle_vertices(line).into_iter().next() else {
            continue;
        };
        vertices.push(AbstractVertex { vertex: anchor, degree: 2 });
        if let Some(first) = walker.lines_at(anchor).into_iter().next() {
            let (chain, end) = walker.walk(anchor, first);
            edges.push(edge(network, anchor, end, chain));
        }
    }
    vertices.sort_by_key(|v| v.vertex);

    AbstractedTopology {
        scope,
        vertices,
        edges,
    }
}

pub fn run(network: &mut Network, config: &PipelineConfig) -> Result<StageOutcome, StageError> {
    let mut counts = StageCounts::default();
    let graph = network.connectivity()?;
    let topology = abstract_topology(network, &graph, config.abstraction_scope);
    info!(
        "abstracted {} lines into {} edges over {} vertices",
        topology.edges.iter().map(|e| e.lines.len()).sum::<usize>(),
        topology.edges.len(),
        topology.vertices.len()
    );
    let (edges, vertices) = (topology.edges.len(), topology.vertices.len());
    if network.update_views(|views| views.abstraction = Some(topology)) {
        counts.updated += 1;
    }
    Ok(StageOutcome::from_counts(counts)
        .metric("edges", edges)
        .metric("vertices", vertices))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fixtures::NetworkFixture;

    fn full() -> PipelineConfig {
        PipelineConfig {
            abstraction_scope: AbstractionScope::Full,
            ..Default::default()
        }
    }

    #[test]
    fn chain_between_stations_is_one_edge() {
        let mut fx = NetworkFixture::new();
        let west = fx.station(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let east = fx.station(&[(95.0, 0.0), (105.0, 0.0), (105.0, 10.0), (95.0, 10.0)]);
        let a = fx.node(5.0, 5.0);
        let b = fx.node(40.0, 5.0);
        let c = fx.node(70.0, 45.0);
        let d = fx.node(100.0, 5.0);
        let first = fx.line_between(a, b, &[]);
        let second = fx.line_between(b, c, &[]);
        let third = fx.line_between(c, d, &[]);
        fx.attrs(second, &[("voltage", "110000")]);
        let mut network = fx.build();
        crate::stages::electrical::run(&mut network, &full()).unwrap();

        run(&mut network, &full()).unwrap();
        let topology = network.views().abstraction.clone().unwrap();
        assert_eq!(topology.edges.len(), 1);
        let edge = &topology.edges[0];
        assert_eq!((edge.from, edge.to), (Vertex::Station(west), Vertex::Station(east)));
        assert_eq!(edge.lines, vec![first, second, third]);
        assert_eq!(edge.max_voltage, Some(110000));
        assert!((edge.length - (35.0 + 50.0 + 50.0)).abs() < 1e-9);
        assert_eq!(topology.vertices.len(), 2);
        assert!(run(&mut network, &full()).unwrap().counts.is_empty());
    }

    #[test]
    fn isolated_ring_is_anchored_at_lowest_vertex() {
        let mut fx = NetworkFixture::new();
        let a = fx.node(0.0, 0.0);
        let b = fx.node(10.0, 0.0);
        let c = fx.node(5.0, 8.0);
        let ab = fx.line_between(a, b, &[]);
        let bc = fx.line_between(b, c, &[]);
        let ca = fx.line_between(c, a, &[]);
        let mut network = fx.build();

        run(&mut network, &full()).unwrap();
        let topology = network.views().abstraction.clone().unwrap();
        assert_eq!(topology.vertices.len(), 1);
        assert_eq!(topology.vertices[0].vertex, Vertex::Node(a));
        assert_eq!(topology.edges.len(), 1);
        let edge = &topology.edges[0];
        assert_eq!((edge.from, edge.to), (Vertex::Node(a), Vertex::Node(a)));
        assert_eq!(edge.lines, vec![ab, bc, ca]);
    }

    #[test]
    fn branch_splits_chains() {
        let mut fx = NetworkFixture::new();
        let hub = fx.node(0.0, 0.0);
        let mid = fx.node(10.0, 0.0);
        let north = fx.node(0.0, 10.0);
        let east = fx.node(20.0, 0.0);
        let south = fx.node(0.0, -10.0);
        fx.line_between(hub, mid, &[]);
        fx.line_between(mid, east, &[]);
        fx.line_between(hub, north, &[]);
        fx.line_between(hub, south, &[]);
        let mut network = fx.build();

        run(&mut network, &full()).unwrap();
        let topology = network.views().abstraction.clone().unwrap();
        assert_eq!(topology.edges.len(), 3);
        let hub_vertex = topology
            .vertices
            .iter()
            .find(|v| v.vertex == Vertex::Node(hub))
            .unwrap();
        assert_eq!(hub_vertex.degree, 3);
        assert!(topology.edges.iter().any(|e| e.lines.len() == 2));
    }

    #[test]
    fn default_scope_without_high_voltage_view_is_empty() {
        let mut fx = NetworkFixture::new();
        fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        let mut network = fx.build();
        run(&mut network, &PipelineConfig::default()).unwrap();
        let topology = network.views().abstraction.clone().unwrap();
        assert!(topology.edges.is_empty());
    }
}
