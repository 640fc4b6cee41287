//! Builder for small hand-made networks used across the test modules.
use super::Network;
use super::entities::{Line, Node, Station, Tag};
use super::ids::{LineId, NodeId, StationId, TagId, Terminal};
use crate::store::Tables;
use geo_types::{Coord, LineString, MultiPolygon, Polygon};

pub(crate) struct NetworkFixture {
    tables: Tables,
    next_node: u64,
    next_line: u64,
    next_station: u64,
}

impl NetworkFixture {
    pub fn new() -> Self {
        Self {
            tables: Tables::default(),
            next_node: 1,
            next_line: 1,
            next_station: 1,
        }
    }

    pub fn node(&mut self, x: f64, y: f64) -> NodeId {
        let id = NodeId(self.next_node);
        self.next_node += 1;
        self.tables.nodes.push(Node {
            id,
            position: Coord { x, y },
            tag: None,
            modified_by: None,
        });
        id
    }

    fn position(&self, id: NodeId) -> Coord<f64> {
        self.tables
            .nodes
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.position)
            .expect("fixture node exists")
    }

    /// A line with fresh nodes at both ends.
    pub fn line(&mut self, coords: &[(f64, f64)]) -> LineId {
        let (first, last) = (coords[0], coords[coords.len() - 1]);
        let start = self.node(first.0, first.1);
        let end = self.node(last.0, last.1);
        self.line_between(start, end, &coords[1..coords.len() - 1])
    }

    /// A line between existing nodes, through optional interior points.
    pub fn line_between(&mut self, start: NodeId, end: NodeId, interior: &[(f64, f64)]) -> LineId {
        let id = LineId(self.next_line);
        self.next_line += 1;
        let mut coords = vec![self.position(start)];
        coords.extend(interior.iter().map(|(x, y)| Coord { x: *x, y: *y }));
        coords.push(self.position(end));
        self.tables.lines.push(Line {
            id,
            geometry: LineString::new(coords),
            start: Terminal::Node(start),
            end: Terminal::Node(end),
            attributes: Default::default(),
            tag: None,
            electrical: None,
            modified_by: None,
        });
        id
    }

    pub fn attrs(&mut self, line: LineId, pairs: &[(&str, &str)]) -> &mut Self {
        if let Some(l) = self.tables.lines.iter_mut().find(|l| l.id == line) {
            for (k, v) in pairs {
                l.attributes.insert(k.to_string(), v.to_string());
            }
        }
        self
    }

    /// A station whose ring is closed automatically.
    pub fn station(&mut self, ring: &[(f64, f64)]) -> StationId {
        let id = StationId(self.next_station);
        self.next_station += 1;
        let mut coords: Vec<Coord<f64>> = ring.iter().map(|(x, y)| Coord { x: *x, y: *y }).collect();
        if coords.first() != coords.last() {
            coords.push(coords[0]);
        }
        self.tables.stations.push(Station {
            id,
            boundary: MultiPolygon::new(vec![Polygon::new(LineString::new(coords), vec![])]),
            attributes: Default::default(),
            nodes: Default::default(),
            joints: Default::default(),
            modified_by: None,
        });
        id
    }

    /// Put `line` under the tag labelled `label`, creating it on first use.
    pub fn tag(&mut self, line: LineId, label: &str) -> TagId {
        let id = match self.tables.tags.iter().find(|t| t.label == label) {
            Some(tag) => tag.id,
            None => {
                let id = TagId(self.tables.tags.len() as u64 + 1);
                self.tables.tags.push(Tag {
                    id,
                    label: label.to_string(),
                    seed: line,
                    modified_by: None,
                });
                id
            }
        };
        if let Some(l) = self.tables.lines.iter_mut().find(|l| l.id == line) {
            l.tag = Some(id);
        }
        id
    }

    pub fn station_attrs(&mut self, station: StationId, pairs: &[(&str, &str)]) -> &mut Self {
        if let Some(s) = self.tables.stations.iter_mut().find(|s| s.id == station) {
            for (k, v) in pairs {
                s.attributes.insert(k.to_string(), v.to_string());
            }
        }
        self
    }

    /// Tables with station membership assigned by containment, lowest station first.
    pub fn tables(mut self) -> Tables {
        for node in &self.tables.nodes {
            if let Some(station) = self
                .tables
                .stations
                .iter_mut()
                .find(|s| s.contains_point(node.position))
            {
                station.nodes.insert(node.id);
            }
        }
        self.tables
    }

    pub fn build(self) -> Network {
        Network::from_tables(self.tables()).expect("fixture network is consistent")
    }
}
