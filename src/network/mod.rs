//! The single owning store of nodes, lines, stations, joints and tags.
//!
//! Every mutation goes through [`Network`] so that three things stay in sync:
//! the line-end incidence index, station ownership of terminals, and the
//! journal of records that must be written at the next commit.

pub mod entities;
pub mod id_allocator;
pub mod ids;
mod journal;

#[cfg(test)]
pub(crate) mod fixtures;

pub use entities::{
    Attributes, ElectricalProperties, Joint, JointOrigin, Line, Node, Station, Tag, VoltageClass,
};
pub use ids::{JointId, LineId, NodeId, RecordKey, Side, StationId, TagId, Terminal};

use crate::error::{ConflictError, ConsistencyError, GeometryError};
use crate::geometry_utils;
use crate::graph::ConnectivityGraph;
use crate::stages::StageId;
use crate::stages::abstraction::AbstractedTopology;
use crate::stages::high_voltage::HighVoltageSubnetwork;
use crate::store::{Record, Tables, Write, WriteBatch};
use ahash::AHashMap;
use geo_types::Coord;
use id_allocator::IdAllocator;
use journal::Journal;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Derived read-only views produced in the topology phase.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Views {
    #[serde(default)]
    pub conflicts: Vec<ConflictError>,
    #[serde(default)]
    pub high_voltage: Option<HighVoltageSubnetwork>,
    #[serde(default)]
    pub abstraction: Option<AbstractedTopology>,
}

pub type LineEnd = (LineId, Side);

#[derive(Debug, Clone, Default)]
pub struct Network {
    nodes: BTreeMap<NodeId, Node>,
    lines: BTreeMap<LineId, Line>,
    stations: BTreeMap<StationId, Station>,
    joints: BTreeMap<JointId, Joint>,
    tags: BTreeMap<TagId, Tag>,
    views: Views,
    /// Line ends per terminal, sorted.
    incidence: AHashMap<Terminal, Vec<LineEnd>>,
    owners: AHashMap<Terminal, StationId>,
    ids: IdAllocator,
    journal: Journal,
    active_stage: Option<StageId>,
    connectivity: Option<Arc<ConnectivityGraph>>,
}

/// What [`Network::intern_tag`] did with a label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interned {
    Existing,
    /// The tag existed with another seed line.
    Reseeded,
    Created,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load tables read from a store. Nothing is journaled.
    pub fn from_tables(tables: Tables) -> Result<Self, ConsistencyError> {
        let mut network = Network::default();
        for node in tables.nodes {
            network.ids.observe_node(node.id);
            network.nodes.insert(node.id, node);
        }
        for joint in tables.joints {
            network.ids.observe_joint(joint.id);
            network.joints.insert(joint.id, joint);
        }
        for tag in tables.tags {
            network.ids.observe_tag(tag.id);
            network.tags.insert(tag.id, tag);
        }
        for line in tables.lines {
            network.ids.observe_line(line.id);
            for side in [Side::Start, Side::End] {
                let terminal = line.terminal(side);
                if !network.terminal_exists(terminal) {
                    return Err(ConsistencyError::new(format!(
                        "line {} references missing terminal {}",
                        line.id, terminal
                    )));
                }
                network.attach(terminal, (line.id, side));
            }
            network.lines.insert(line.id, line);
        }
        for station in tables.stations {
            let members = station
                .nodes
                .iter()
                .map(|id| Terminal::Node(*id))
                .chain(station.joints.iter().map(|id| Terminal::Joint(*id)));
            for terminal in members {
                if let Some(previous) = network.owners.insert(terminal, station.id) {
                    return Err(ConsistencyError::new(format!(
                        "{} is owned by both {} and {}",
                        terminal, previous, station.id
                    )));
                }
            }
            network.stations.insert(station.id, station);
        }
        network.views = tables.views;
        if let Some(marks) = tables.watermarks {
            network.ids.observe_watermarks(&marks);
        }
        Ok(network)
    }

    pub fn to_tables(&self) -> Tables {
        Tables {
            nodes: self.nodes.values().cloned().collect(),
            lines: self.lines.values().cloned().collect(),
            stations: self.stations.values().cloned().collect(),
            joints: self.joints.values().cloned().collect(),
            tags: self.tags.values().cloned().collect(),
            views: self.views.clone(),
            meta: Default::default(),
            watermarks: None,
        }
    }

    pub fn begin_stage(&mut self, stage: StageId) {
        self.active_stage = Some(stage);
    }

    pub fn end_stage(&mut self) {
        self.active_stage = None;
    }

    pub fn active_stage(&self) -> Option<StageId> {
        self.active_stage
    }

    // --- Reads ---

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn line(&self, id: LineId) -> Option<&Line> {
        self.lines.get(&id)
    }

    pub fn station(&self, id: StationId) -> Option<&Station> {
        self.stations.get(&id)
    }

    pub fn joint(&self, id: JointId) -> Option<&Joint> {
        self.joints.get(&id)
    }

    pub fn tag(&self, id: TagId) -> Option<&Tag> {
        self.tags.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn lines(&self) -> impl Iterator<Item = &Line> {
        self.lines.values()
    }

    pub fn stations(&self) -> impl Iterator<Item = &Station> {
        self.stations.values()
    }

    pub fn joints(&self) -> impl Iterator<Item = &Joint> {
        self.joints.values()
    }

    pub fn tags(&self) -> impl Iterator<Item = &Tag> {
        self.tags.values()
    }

    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.keys().copied().collect()
    }

    pub fn line_ids(&self) -> Vec<LineId> {
        self.lines.keys().copied().collect()
    }

    pub fn station_ids(&self) -> Vec<StationId> {
        self.stations.keys().copied().collect()
    }

    pub fn joint_ids(&self) -> Vec<JointId> {
        self.joints.keys().copied().collect()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    pub fn station_count(&self) -> usize {
        self.stations.len()
    }

    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    pub fn views(&self) -> &Views {
        &self.views
    }

    pub fn terminal_exists(&self, terminal: Terminal) -> bool {
        match terminal {
            Terminal::Node(id) => self.nodes.contains_key(&id),
            Terminal::Joint(id) => self.joints.contains_key(&id),
        }
    }

    pub fn position(&self, terminal: Terminal) -> Option<Coord<f64>> {
        match terminal {
            Terminal::Node(id) => self.nodes.get(&id).map(|n| n.position),
            Terminal::Joint(id) => self.joints.get(&id).map(|j| j.position),
        }
    }

    /// All existing terminals, nodes first, ascending.
    pub fn terminals(&self) -> Vec<Terminal> {
        self.nodes
            .keys()
            .map(|id| Terminal::Node(*id))
            .chain(self.joints.keys().map(|id| Terminal::Joint(*id)))
            .collect()
    }

    pub fn owner(&self, terminal: Terminal) -> Option<StationId> {
        self.owners.get(&terminal).copied()
    }

    pub fn is_free(&self, terminal: Terminal) -> bool {
        !self.owners.contains_key(&terminal)
    }

    pub fn ends_at(&self, terminal: Terminal) -> &[LineEnd] {
        self.incidence
            .get(&terminal)
            .map(|ends| ends.as_slice())
            .unwrap_or(&[])
    }

    pub fn degree(&self, terminal: Terminal) -> usize {
        self.ends_at(terminal).len()
    }

    /// Distinct lines attached to a terminal, ascending.
    pub fn lines_at(&self, terminal: Terminal) -> Vec<LineId> {
        let mut lines: Vec<LineId> = self.ends_at(terminal).iter().map(|(l, _)| *l).collect();
        lines.dedup();
        lines
    }

    /// Connectivity graph of the current state, rebuilt after any mutation.
    pub fn connectivity(&mut self) -> Result<Arc<ConnectivityGraph>, ConsistencyError> {
        if let Some(graph) = &self.connectivity {
            return Ok(Arc::clone(graph));
        }
        let graph = Arc::new(ConnectivityGraph::build(self)?);
        self.connectivity = Some(Arc::clone(&graph));
        Ok(graph)
    }

    pub fn has_cached_connectivity(&self) -> bool {
        self.connectivity.is_some()
    }

    // --- Writes ---

    fn touch(&mut self, key: RecordKey) {
        self.journal.touch(key);
        self.connectivity = None;
    }

    fn attach(&mut self, terminal: Terminal, end: LineEnd) {
        let ends = self.incidence.entry(terminal).or_default();
        if let Err(pos) = ends.binary_search(&end) {
            ends.insert(pos, end);
        }
    }

    fn detach(&mut self, terminal: Terminal, end: LineEnd) {
        if let Some(ends) = self.incidence.get_mut(&terminal) {
            ends.retain(|e| *e != end);
            if ends.is_empty() {
                self.incidence.remove(&terminal);
            }
        }
    }

    pub fn add_node(&mut self, position: Coord<f64>, tag: Option<String>) -> NodeId {
        let id = self.ids.node();
        self.insert_node(Node {
            id,
            position,
            tag,
            modified_by: None,
        });
        id
    }

    pub fn insert_node(&mut self, mut node: Node) {
        self.ids.observe_node(node.id);
        node.modified_by = self.active_stage;
        let key = RecordKey::Node(node.id);
        self.nodes.insert(node.id, node);
        self.touch(key);
    }

    pub fn update_node(&mut self, id: NodeId, f: impl FnOnce(&mut Node)) -> bool {
        let stage = self.active_stage;
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        f(node);
        node.modified_by = stage;
        self.touch(RecordKey::Node(id));
        true
    }

    /// Remove a node, releasing station ownership. Lines still attached keep
    /// their reference, so callers retarget them first.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(&id)?;
        self.set_owner(Terminal::Node(id), None);
        self.touch(RecordKey::Node(id));
        Some(node)
    }

    pub fn add_joint(&mut self, position: Coord<f64>, origin: JointOrigin) -> JointId {
        let id = self.ids.joint();
        self.insert_joint(Joint {
            id,
            position,
            origin,
            modified_by: None,
        });
        id
    }

    pub fn insert_joint(&mut self, mut joint: Joint) {
        self.ids.observe_joint(joint.id);
        joint.modified_by = self.active_stage;
        let key = RecordKey::Joint(joint.id);
        self.joints.insert(joint.id, joint);
        self.touch(key);
    }

    pub fn remove_joint(&mut self, id: JointId) -> Option<Joint> {
        let joint = self.joints.remove(&id)?;
        self.set_owner(Terminal::Joint(id), None);
        self.touch(RecordKey::Joint(id));
        Some(joint)
    }

    pub fn remove_terminal(&mut self, terminal: Terminal) -> bool {
        match terminal {
            Terminal::Node(id) => self.remove_node(id).is_some(),
            Terminal::Joint(id) => self.remove_joint(id).is_some(),
        }
    }

    pub fn new_line_id(&mut self) -> LineId {
        self.ids.line()
    }

    pub fn insert_line(&mut self, mut line: Line) {
        self.ids.observe_line(line.id);
        line.modified_by = self.active_stage;
        if let Some(previous) = self.lines.remove(&line.id) {
            self.detach(previous.start, (previous.id, Side::Start));
            self.detach(previous.end, (previous.id, Side::End));
        }
        self.attach(line.start, (line.id, Side::Start));
        self.attach(line.end, (line.id, Side::End));
        let key = RecordKey::Line(line.id);
        self.lines.insert(line.id, line);
        self.touch(key);
    }

    pub fn update_line<R>(&mut self, id: LineId, f: impl FnOnce(&mut Line) -> R) -> Option<R> {
        let stage = self.active_stage;
        let line = self.lines.get_mut(&id)?;
        let (old_start, old_end) = (line.start, line.end);
        let result = f(line);
        line.modified_by = stage;
        let (new_start, new_end) = (line.start, line.end);
        if old_start != new_start {
            self.detach(old_start, (id, Side::Start));
            self.attach(new_start, (id, Side::Start));
        }
        if old_end != new_end {
            self.detach(old_end, (id, Side::End));
            self.attach(new_end, (id, Side::End));
        }
        self.touch(RecordKey::Line(id));
        Some(result)
    }

    pub fn remove_line(&mut self, id: LineId) -> Option<Line> {
        let line = self.lines.remove(&id)?;
        self.detach(line.start, (id, Side::Start));
        self.detach(line.end, (id, Side::End));
        self.touch(RecordKey::Line(id));
        Some(line)
    }

    pub fn update_station(&mut self, id: StationId, f: impl FnOnce(&mut Station)) -> bool {
        let stage = self.active_stage;
        let Some(station) = self.stations.get_mut(&id) else {
            return false;
        };
        f(station);
        station.modified_by = stage;
        self.reindex_owners(id);
        self.touch(RecordKey::Station(id));
        true
    }

    /// Remove a station; its members become free terminals.
    pub fn remove_station(&mut self, id: StationId) -> Option<Station> {
        let station = self.stations.remove(&id)?;
        self.owners.retain(|_, owner| *owner != id);
        self.touch(RecordKey::Station(id));
        Some(station)
    }

    fn reindex_owners(&mut self, id: StationId) {
        self.owners.retain(|_, owner| *owner != id);
        if let Some(station) = self.stations.get(&id) {
            for node in &station.nodes {
                self.owners.insert(Terminal::Node(*node), id);
            }
            for joint in &station.joints {
                self.owners.insert(Terminal::Joint(*joint), id);
            }
        }
    }

    /// Move a terminal into (or out of) a station. Returns true on change.
    pub fn set_owner(&mut self, terminal: Terminal, owner: Option<StationId>) -> bool {
        let current = self.owner(terminal);
        if current == owner {
            return false;
        }
        let stage = self.active_stage;
        if let Some(previous) = current {
            if let Some(station) = self.stations.get_mut(&previous) {
                match terminal {
                    Terminal::Node(id) => station.nodes.remove(&id),
                    Terminal::Joint(id) => station.joints.remove(&id),
                };
                station.modified_by = stage;
            }
            self.owners.remove(&terminal);
            self.touch(RecordKey::Station(previous));
        }
        if let Some(next) = owner {
            let Some(station) = self.stations.get_mut(&next) else {
                return current.is_some();
            };
            match terminal {
                Terminal::Node(id) => station.nodes.insert(id),
                Terminal::Joint(id) => station.joints.insert(id),
            };
            station.modified_by = stage;
            self.owners.insert(terminal, next);
            self.touch(RecordKey::Station(next));
        }
        true
    }

    /// Returns the tag carrying `label`, creating it when missing.
    pub fn intern_tag(&mut self, label: &str, seed: LineId) -> (TagId, Interned) {
        if let Some(tag) = self.tags.values().find(|t| t.label == label) {
            let id = tag.id;
            if tag.seed == seed {
                return (id, Interned::Existing);
            }
            let stage = self.active_stage;
            if let Some(tag) = self.tags.get_mut(&id) {
                tag.seed = seed;
                tag.modified_by = stage;
            }
            self.touch(RecordKey::Tag(id));
            return (id, Interned::Reseeded);
        }
        let id = self.ids.tag();
        self.tags.insert(
            id,
            Tag {
                id,
                label: label.to_string(),
                seed,
                modified_by: self.active_stage,
            },
        );
        self.touch(RecordKey::Tag(id));
        (id, Interned::Created)
    }

    pub fn remove_tag(&mut self, id: TagId) -> Option<Tag> {
        let tag = self.tags.remove(&id)?;
        self.touch(RecordKey::Tag(id));
        Some(tag)
    }

    /// Edit the derived views; journaled only when something changed.
    pub fn update_views(&mut self, f: impl FnOnce(&mut Views)) -> bool {
        let mut next = self.views.clone();
        f(&mut next);
        if next == self.views {
            return false;
        }
        self.views = next;
        self.journal.touch(RecordKey::Views);
        true
    }

    // --- Composite edits ---

    /// Point a line end at another terminal and snap the geometry endpoint to it.
    pub fn retarget(
        &mut self,
        line: LineId,
        side: Side,
        to: Terminal,
    ) -> Result<(), ConsistencyError> {
        let position = self.position(to).ok_or_else(|| {
            ConsistencyError::new(format!("cannot attach {} to missing terminal {}", line, to))
        })?;
        self.update_line(line, |l| {
            l.set_terminal(side, to);
            l.set_endpoint(side, position);
        })
        .ok_or_else(|| ConsistencyError::new(format!("cannot retarget missing line {}", line)))
    }

    /// Move every line end from one terminal to another.
    pub fn retarget_all(&mut self, from: Terminal, to: Terminal) -> Result<usize, ConsistencyError> {
        let ends: Vec<LineEnd> = self.ends_at(from).to_vec();
        for (line, side) in &ends {
            self.retarget(*line, *side, to)?;
        }
        Ok(ends.len())
    }

    /// Replace a node by a joint at the same position, carrying ownership over.
    pub fn promote_to_joint(
        &mut self,
        node: NodeId,
        origin: JointOrigin,
    ) -> Result<JointId, ConsistencyError> {
        let position = self
            .node(node)
            .map(|n| n.position)
            .ok_or_else(|| ConsistencyError::new(format!("cannot promote missing node {}", node)))?;
        let owner = self.owner(Terminal::Node(node));
        let joint = self.add_joint(position, origin);
        self.retarget_all(Terminal::Node(node), Terminal::Joint(joint))?;
        self.remove_node(node);
        if owner.is_some() {
            self.set_owner(Terminal::Joint(joint), owner);
        }
        Ok(joint)
    }

    /// Cut a line where `at` projects onto it. The original id keeps the head,
    /// a new line takes the tail, and a joint of `origin` joins them.
    pub fn split_line(
        &mut self,
        id: LineId,
        at: Coord<f64>,
        origin: JointOrigin,
    ) -> Result<(JointId, LineId), ConsistencyError> {
        let line = self
            .line(id)
            .cloned()
            .ok_or_else(|| ConsistencyError::new(format!("cannot split missing line {}", id)))?;
        let projection = geometry_utils::project_point_to_polyline(at, &line.geometry.0)
            .ok_or_else(|| ConsistencyError::new(format!("line {} has no geometry", id)))?;
        let (head, tail) = geometry_utils::split_polyline(&line.geometry.0, &projection, projection.point);
        if head.len() < 2 || tail.len() < 2 {
            return Err(ConsistencyError::new(format!(
                "splitting line {} at its endpoint",
                id
            )));
        }
        let joint = self.add_joint(projection.point, origin);
        let tail_id = self.new_line_id();
        self.insert_line(Line {
            id: tail_id,
            geometry: tail.into(),
            start: Terminal::Joint(joint),
            end: line.end,
            attributes: line.attributes.clone(),
            tag: line.tag,
            electrical: line.electrical.clone(),
            modified_by: None,
        });
        self.update_line(id, |l| {
            l.geometry = head.into();
            l.end = Terminal::Joint(joint);
        });
        Ok((joint, tail_id))
    }

    /// Drop nodes and joints no line references. Returns (nodes, joints) removed.
    pub fn prune_orphans(&mut self) -> (usize, usize) {
        let orphan_nodes: Vec<NodeId> = self
            .nodes
            .keys()
            .copied()
            .filter(|id| self.degree(Terminal::Node(*id)) == 0)
            .collect();
        let orphan_joints: Vec<JointId> = self
            .joints
            .keys()
            .copied()
            .filter(|id| self.degree(Terminal::Joint(*id)) == 0)
            .collect();
        for id in &orphan_nodes {
            self.remove_node(*id);
        }
        for id in &orphan_joints {
            self.remove_joint(*id);
        }
        (orphan_nodes.len(), orphan_joints.len())
    }

    /// Records the next commit must write.
    pub fn pending_writes(&self) -> usize {
        self.journal.len()
    }

    /// Drain the journal into a batch of upserts and deletes.
    pub fn take_batch(&mut self) -> WriteBatch {
        let writes = self
            .journal
            .drain()
            .into_iter()
            .map(|key| {
                let record = match key {
                    RecordKey::Node(id) => self.nodes.get(&id).cloned().map(Record::Node),
                    RecordKey::Line(id) => self.lines.get(&id).cloned().map(Record::Line),
                    RecordKey::Station(id) => self.stations.get(&id).cloned().map(Record::Station),
                    RecordKey::Joint(id) => self.joints.get(&id).cloned().map(Record::Joint),
                    RecordKey::Tag(id) => self.tags.get(&id).cloned().map(Record::Tag),
                    RecordKey::Views => Some(Record::Views(self.views.clone())),
                };
                match record {
                    Some(record) => Write::Upsert(record),
                    None => Write::Delete(key),
                }
            })
            .collect();
        WriteBatch { writes }
    }

    // --- Validation ---

    /// Reject malformed input geometry before any stage touches it.
    pub fn validate_geometry(&self) -> Result<(), GeometryError> {
        for node in self.nodes.values() {
            if !coord_is_finite(node.position) {
                return Err(GeometryError::new(
                    RecordKey::Node(node.id),
                    "non-finite coordinate",
                ));
            }
        }
        for line in self.lines.values() {
            let key = RecordKey::Line(line.id);
            if line.geometry.0.iter().any(|c| !coord_is_finite(*c)) {
                return Err(GeometryError::new(key, "non-finite coordinate"));
            }
            let distinct = geometry_utils::dedup_consecutive(line.geometry.0.clone());
            if distinct.len() < 2 {
                return Err(GeometryError::new(key, "fewer than two distinct points"));
            }
        }
        for station in self.stations.values() {
            let key = RecordKey::Station(station.id);
            if station.boundary.0.is_empty() {
                return Err(GeometryError::new(key, "empty boundary"));
            }
            for polygon in &station.boundary.0 {
                for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                    if ring.0.iter().any(|c| !coord_is_finite(*c)) {
                        return Err(GeometryError::new(key, "non-finite coordinate"));
                    }
                    if ring.0.len() < 4 || !ring.is_closed() {
                        return Err(GeometryError::new(key, "ring is not a closed polygon ring"));
                    }
                    if geometry_utils::ring_self_intersects(ring) {
                        return Err(GeometryError::new(key, "self-intersecting ring"));
                    }
                }
            }
        }
        Ok(())
    }

    /// Every line end must sit on the terminal it references.
    pub fn validate_endpoints(&self, tolerance: f64) -> Result<(), ConsistencyError> {
        for line in self.lines.values() {
            for side in [Side::Start, Side::End] {
                let terminal = line.terminal(side);
                let position = self.position(terminal).ok_or_else(|| {
                    ConsistencyError::new(format!(
                        "line {} references missing terminal {}",
                        line.id, terminal
                    ))
                })?;
                let gap = geometry_utils::distance(position, line.endpoint(side));
                if gap > tolerance {
                    return Err(ConsistencyError::new(format!(
                        "line {} {:?} end is {:.3} away from {}",
                        line.id, side, gap, terminal
                    )));
                }
            }
        }
        Ok(())
    }
}

fn coord_is_finite(c: Coord<f64>) -> bool {
    c.x.is_finite() && c.y.is_finite()
}

#[cfg(test)]
mod tests {
    use super::fixtures::NetworkFixture;
    use super::*;
    use crate::store::Write;

    #[test]
    fn incidence_follows_retargeting() {
        let mut fx = NetworkFixture::new();
        let a = fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        let b = fx.line(&[(10.0, 0.0), (20.0, 0.0)]);
        let mut network = fx.build();

        let a_end = network.line(a).unwrap().end;
        let b_start = network.line(b).unwrap().start;
        assert_ne!(a_end, b_start);

        network.retarget(b, Side::Start, a_end).unwrap();
        assert_eq!(network.lines_at(a_end), vec![a, b]);
        assert_eq!(network.degree(b_start), 0);
        assert_eq!(network.prune_orphans(), (1, 0));
    }

    #[test]
    fn promote_keeps_station_ownership() {
        let mut fx = NetworkFixture::new();
        let station = fx.station(&[(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]);
        let line = fx.line(&[(5.0, 5.0), (50.0, 5.0)]);
        let mut network = fx.build();
        let node = match network.line(line).unwrap().start {
            Terminal::Node(id) => id,
            other => panic!("unexpected terminal {:?}", other),
        };
        assert_eq!(network.owner(Terminal::Node(node)), Some(station));

        let joint = network.promote_to_joint(node, JointOrigin::LineJoint).unwrap();
        assert_eq!(network.owner(Terminal::Joint(joint)), Some(station));
        assert!(network.station(station).unwrap().joints.contains(&joint));
        assert!(network.node(node).is_none());
    }

    #[test]
    fn batch_carries_upserts_and_deletes_with_provenance() {
        let mut fx = NetworkFixture::new();
        let a = fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        let mut network = fx.build();
        network.begin_stage(StageId::EliminateInternalLines);
        network.remove_line(a);
        network.prune_orphans();
        let batch = network.take_batch();
        assert_eq!(batch.deletes(), 3);
        assert_eq!(network.pending_writes(), 0);

        network.begin_stage(StageId::MergeLines);
        network.add_node(Coord { x: 1.0, y: 1.0 }, None);
        let batch = network.take_batch();
        match &batch.writes[0] {
            Write::Upsert(Record::Node(node)) => {
                assert_eq!(node.modified_by, Some(StageId::MergeLines))
            }
            other => panic!("unexpected write {:?}", other),
        }
    }

    #[test]
    fn split_keeps_head_id_and_joins_tail() {
        let mut fx = NetworkFixture::new();
        let a = fx.line(&[(0.0, 0.0), (10.0, 0.0), (20.0, 0.0)]);
        fx.attrs(a, &[("voltage", "110000")]);
        let mut network = fx.build();
        let far_end = network.line(a).unwrap().end;

        let (joint, tail) = network
            .split_line(a, Coord { x: 15.0, y: 0.05 }, JointOrigin::Split)
            .unwrap();
        let head = network.line(a).unwrap();
        let tail = network.line(tail).unwrap();
        assert_eq!(head.end, Terminal::Joint(joint));
        assert_eq!(tail.start, Terminal::Joint(joint));
        assert_eq!(tail.end, far_end);
        assert_eq!(tail.attribute("voltage"), Some("110000"));
        assert_eq!(network.joint(joint).unwrap().position, Coord { x: 15.0, y: 0.0 });
        assert_eq!(network.degree(Terminal::Joint(joint)), 2);
    }

    #[test]
    fn bowtie_station_is_rejected() {
        let mut fx = NetworkFixture::new();
        fx.station(&[(0.0, 0.0), (1.0, 1.0), (1.0, 0.0), (0.0, 1.0)]);
        let network = fx.build();
        assert!(network.validate_geometry().is_err());
    }
}
