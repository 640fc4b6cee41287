// ===========================================================================
// Connectivity graph over stations, joints and nodes
// ===========================================================================
use crate::error::ConsistencyError;
use crate::geometry_utils;
use crate::network::{JointId, LineId, Network, NodeId, Side, StationId, Terminal};
use crate::stages::StageId;
use crate::clusters::Clusters;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Endpoints further than this from their terminal are inconsistent.
pub const ENDPOINT_EPSILON: f64 = 1e-6;

/// A graph vertex. Terminals owned by a station collapse into the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Vertex {
    Station(StationId),
    Joint(JointId),
    Node(NodeId),
}

impl Vertex {
    pub fn of(network: &Network, terminal: Terminal) -> Vertex {
        match network.owner(terminal) {
            Some(station) => Vertex::Station(station),
            None => match terminal {
                Terminal::Node(id) => Vertex::Node(id),
                Terminal::Joint(id) => Vertex::Joint(id),
            },
        }
    }

    pub fn is_station(&self) -> bool {
        matches!(self, Vertex::Station(_))
    }
}

impl fmt::Display for Vertex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Vertex::Station(id) => id.fmt(f),
            Vertex::Joint(id) => id.fmt(f),
            Vertex::Node(id) => id.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnectivityGraph {
    vertices: BTreeSet<Vertex>,
    /// Lines per vertex, ascending; a loop is listed twice.
    adjacency: BTreeMap<Vertex, Vec<LineId>>,
    edges: BTreeMap<LineId, (Vertex, Vertex)>,
    component_of: BTreeMap<Vertex, usize>,
    component_count: usize,
}

impl ConnectivityGraph {
    /// Build and validate the graph of the current network.
    pub fn build(network: &Network) -> Result<Self, ConsistencyError> {
        let mut graph = ConnectivityGraph::default();
        graph
            .vertices
            .extend(network.station_ids().into_iter().map(Vertex::Station));
        for terminal in network.terminals() {
            graph.vertices.insert(Vertex::of(network, terminal));
        }

        for line in network.lines() {
            let mut ends = [Vertex::Node(NodeId(0)); 2];
            for (slot, side) in [Side::Start, Side::End].into_iter().enumerate() {
                let terminal = line.terminal(side);
                let position = network.position(terminal).ok_or_else(|| {
                    ConsistencyError::new(format!(
                        "line {} references missing terminal {}",
                        line.id, terminal
                    ))
                })?;
                let gap = geometry_utils::distance(position, line.endpoint(side));
                if gap > ENDPOINT_EPSILON {
                    return Err(ConsistencyError::new(format!(
                        "line {} {:?} endpoint lies {:.6} from terminal {}",
                        line.id, side, gap, terminal
                    )));
                }
                ends[slot] = Vertex::of(network, terminal);
            }
            graph.edges.insert(line.id, (ends[0], ends[1]));
            graph.adjacency.entry(ends[0]).or_default().push(line.id);
            graph.adjacency.entry(ends[1]).or_default().push(line.id);
        }
        for lines in graph.adjacency.values_mut() {
            lines.sort();
        }
        graph.label_components();
        Ok(graph)
    }

    fn label_components(&mut self) {
        let mut clusters = Clusters::new(self.vertices.iter().copied());
        for (a, b) in self.edges.values() {
            clusters.link(*a, *b);
        }
        let sets = clusters.into_clusters();
        self.component_count = sets.len();
        for (component, members) in sets.into_iter().enumerate() {
            for member in members {
                self.component_of.insert(member, component);
            }
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn component_count(&self) -> usize {
        self.component_count
    }

    pub fn vertices(&self) -> impl Iterator<Item = Vertex> + '_ {
        self.vertices.iter().copied()
    }

    pub fn contains(&self, vertex: Vertex) -> bool {
        self.vertices.contains(&vertex)
    }

    pub fn lines_at(&self, vertex: Vertex) -> &[LineId] {
        self.adjacency
            .get(&vertex)
            .map(|l| l.as_slice())
            .unwrap_or(&[])
    }

    pub fn degree(&self, vertex: Vertex) -> usize {
        self.lines_at(vertex).len()
    }

    pub fn endpoints(&self, line: LineId) -> Option<(Vertex, Vertex)> {
        self.edges.get(&line).copied()
    }

    /// The vertex at the far end of `line` when leaving from `from`.
    pub fn opposite(&self, line: LineId, from: Vertex) -> Option<Vertex> {
        let (a, b) = self.endpoints(line)?;
        if a == from {
            Some(b)
        } else if b == from {
            Some(a)
        } else {
            None
        }
    }

    pub fn component_of(&self, vertex: Vertex) -> Option<usize> {
        self.component_of.get(&vertex).copied()
    }

    pub fn line_component(&self, line: LineId) -> Option<usize> {
        self.endpoints(line).and_then(|(a, _)| self.component_of(a))
    }

    /// Lines reachable from `start` without crossing a vertex rejected by
    /// `pass`, in breadth-first order. `start` itself is always expanded.
    pub fn reach_lines(&self, start: LineId, pass: impl Fn(Vertex) -> bool) -> Vec<LineId> {
        let mut seen = BTreeSet::from([start]);
        let mut order = vec![start];
        let mut queue = VecDeque::from([start]);
        while let Some(line) = queue.pop_front() {
            let Some((a, b)) = self.endpoints(line) else {
                continue;
            };
            for vertex in [a, b] {
                if !pass(vertex) {
                    continue;
                }
                for next in self.lines_at(vertex) {
                    if seen.insert(*next) {
                        order.push(*next);
                        queue.push_back(*next);
                    }
                }
            }
        }
        order
    }
}

/// Which lines shared a component before a stage ran.
#[derive(Debug, Clone, Default)]
pub struct ConnectivitySnapshot {
    component_of: BTreeMap<LineId, usize>,
}

impl ConnectivitySnapshot {
    pub fn capture(graph: &ConnectivityGraph) -> Self {
        let component_of = graph
            .edges
            .keys()
            .filter_map(|line| graph.line_component(*line).map(|c| (*line, c)))
            .collect();
        Self { component_of }
    }

    /// Lines that were connected and still exist must still be connected.
    pub fn verify(&self, after: &ConnectivityGraph, stage: StageId) -> Result<(), ConsistencyError> {
        let mut expected: BTreeMap<usize, (LineId, usize)> = BTreeMap::new();
        for (line, before) in &self.component_of {
            let Some(now) = after.line_component(*line) else {
                continue;
            };
            match expected.get(before) {
                Some((first, component)) if *component != now => {
                    return Err(ConsistencyError::new(format!(
                        "{} disconnected line {} from line {}",
                        stage, line, first
                    )));
                }
                Some(_) => {}
                None => {
                    expected.insert(*before, (*line, now));
                }
            }
        }
        Ok(())
    }
}
