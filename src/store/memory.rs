use super::{CommitReceipt, IdWatermarks, NetworkStore, Record, StoreMeta, Tables, Write, WriteBatch};
use crate::error::StoreError;
use crate::network::{
    Joint, JointId, Line, LineId, Node, NodeId, RecordKey, Station, StationId, Tag, TagId,
    Terminal, Views,
};
use chrono::Utc;
use geo::Intersects;
use geo_types::Rect;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
struct State {
    nodes: BTreeMap<NodeId, Node>,
    lines: BTreeMap<LineId, Line>,
    stations: BTreeMap<StationId, Station>,
    joints: BTreeMap<JointId, Joint>,
    tags: BTreeMap<TagId, Tag>,
    views: Views,
    meta: StoreMeta,
}

impl State {
    fn from_tables(tables: Tables) -> Self {
        Self {
            nodes: tables.nodes.into_iter().map(|n| (n.id, n)).collect(),
            lines: tables.lines.into_iter().map(|l| (l.id, l)).collect(),
            stations: tables.stations.into_iter().map(|s| (s.id, s)).collect(),
            joints: tables.joints.into_iter().map(|j| (j.id, j)).collect(),
            tags: tables.tags.into_iter().map(|t| (t.id, t)).collect(),
            views: tables.views,
            meta: tables.meta,
        }
    }

    fn terminal_exists(&self, terminal: Terminal) -> bool {
        match terminal {
            Terminal::Node(id) => self.nodes.contains_key(&id),
            Terminal::Joint(id) => self.joints.contains_key(&id),
        }
    }

    fn apply(&mut self, write: Write) {
        match write {
            Write::Upsert(Record::Node(n)) => {
                self.nodes.insert(n.id, n);
            }
            Write::Upsert(Record::Line(l)) => {
                self.lines.insert(l.id, l);
            }
            Write::Upsert(Record::Station(s)) => {
                self.stations.insert(s.id, s);
            }
            Write::Upsert(Record::Joint(j)) => {
                self.joints.insert(j.id, j);
            }
            Write::Upsert(Record::Tag(t)) => {
                self.tags.insert(t.id, t);
            }
            Write::Upsert(Record::Views(v)) => self.views = v,
            // Records created and dropped within one phase were never stored.
            Write::Delete(RecordKey::Node(id)) => {
                self.nodes.remove(&id);
            }
            Write::Delete(RecordKey::Line(id)) => {
                self.lines.remove(&id);
            }
            Write::Delete(RecordKey::Station(id)) => {
                self.stations.remove(&id);
            }
            Write::Delete(RecordKey::Joint(id)) => {
                self.joints.remove(&id);
            }
            Write::Delete(RecordKey::Tag(id)) => {
                self.tags.remove(&id);
            }
            Write::Delete(RecordKey::Views) => self.views = Views::default(),
        }
    }

    /// Referential integrity of the whole state.
    fn check(&self) -> Result<(), StoreError> {
        for line in self.lines.values() {
            for terminal in [line.start, line.end] {
                if !self.terminal_exists(terminal) {
                    return Err(StoreError::MissingRecord(terminal.into()));
                }
            }
            if let Some(tag) = line.tag {
                if !self.tags.contains_key(&tag) {
                    return Err(StoreError::MissingRecord(RecordKey::Tag(tag)));
                }
            }
        }
        let mut owned = BTreeSet::new();
        for station in self.stations.values() {
            let members = station
                .nodes
                .iter()
                .map(|id| Terminal::Node(*id))
                .chain(station.joints.iter().map(|id| Terminal::Joint(*id)));
            for terminal in members {
                if !self.terminal_exists(terminal) {
                    return Err(StoreError::MissingRecord(terminal.into()));
                }
                if !owned.insert(terminal) {
                    return Err(StoreError::Corrupt(format!(
                        "{} belongs to more than one station",
                        terminal
                    )));
                }
            }
        }
        Ok(())
    }

    fn tables(&self) -> Tables {
        Tables {
            nodes: self.nodes.values().cloned().collect(),
            lines: self.lines.values().cloned().collect(),
            stations: self.stations.values().cloned().collect(),
            joints: self.joints.values().cloned().collect(),
            tags: self.tags.values().cloned().collect(),
            views: self.views.clone(),
            meta: self.meta.clone(),
            watermarks: None,
        }
    }

    fn watermarks(&self) -> IdWatermarks {
        IdWatermarks {
            node: self.nodes.keys().next_back().map_or(0, |id| id.0),
            line: self.lines.keys().next_back().map_or(0, |id| id.0),
            joint: self.joints.keys().next_back().map_or(0, |id| id.0),
            tag: self.tags.keys().next_back().map_or(0, |id| id.0),
        }
    }
}

/// Table store held in memory. Commits apply to a copy that replaces the
/// current state only when the whole batch succeeded.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: State,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_tables(tables: Tables) -> Result<Self, StoreError> {
        let state = State::from_tables(tables);
        state.check()?;
        Ok(Self { state })
    }

    pub fn snapshot(&self) -> Tables {
        self.state.tables()
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.state.meta
    }

    pub fn set_meta(&mut self, meta: StoreMeta) {
        self.state.meta = meta;
    }

    pub fn line_count(&self) -> usize {
        self.state.lines.len()
    }

    pub fn line(&self, id: LineId) -> Option<&Line> {
        self.state.lines.get(&id)
    }

    pub fn views(&self) -> &Views {
        &self.state.views
    }
}

impl NetworkStore for MemoryStore {
    fn read_all(&self) -> Result<Tables, StoreError> {
        Ok(self.state.tables())
    }

    fn read_region(&self, region: Rect<f64>) -> Result<Tables, StoreError> {
        let state = &self.state;
        let lines: Vec<Line> = state
            .lines
            .values()
            .filter(|l| l.bbox().is_some_and(|b| b.intersects(&region)))
            .cloned()
            .collect();
        let stations: Vec<Station> = state
            .stations
            .values()
            .filter(|s| s.bbox().is_some_and(|b| b.intersects(&region)))
            .cloned()
            .collect();

        let mut node_ids = BTreeSet::new();
        let mut joint_ids = BTreeSet::new();
        let referenced = lines.iter().flat_map(|l| [l.start, l.end]);
        for terminal in referenced {
            match terminal {
                Terminal::Node(id) => node_ids.insert(id),
                Terminal::Joint(id) => joint_ids.insert(id),
            };
        }
        for station in &stations {
            node_ids.extend(station.nodes.iter().copied());
            joint_ids.extend(station.joints.iter().copied());
        }
        let tag_ids: BTreeSet<TagId> = lines.iter().filter_map(|l| l.tag).collect();

        Ok(Tables {
            nodes: self.nodes_by_id(&node_ids)?,
            joints: self.joints_by_id(&joint_ids)?,
            tags: tag_ids
                .iter()
                .filter_map(|id| state.tags.get(id).cloned())
                .collect(),
            lines,
            stations,
            views: state.views.clone(),
            meta: state.meta.clone(),
            watermarks: Some(state.watermarks()),
        })
    }

    fn nodes_by_id(&self, ids: &BTreeSet<NodeId>) -> Result<Vec<Node>, StoreError> {
        ids.iter()
            .map(|id| {
                self.state
                    .nodes
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::MissingRecord(RecordKey::Node(*id)))
            })
            .collect()
    }

    fn joints_by_id(&self, ids: &BTreeSet<JointId>) -> Result<Vec<Joint>, StoreError> {
        ids.iter()
            .map(|id| {
                self.state
                    .joints
                    .get(id)
                    .cloned()
                    .ok_or(StoreError::MissingRecord(RecordKey::Joint(*id)))
            })
            .collect()
    }

    fn prepare(&mut self, tables: Tables) -> Result<(), StoreError> {
        let mut state = State::from_tables(tables);
        state.check()?;
        state.meta.prepared_at = Some(Utc::now());
        state.meta.last_commit = None;
        self.state = state;
        Ok(())
    }

    fn commit(&mut self, batch: WriteBatch) -> Result<CommitReceipt, StoreError> {
        let upserts = batch.upserts();
        let deletes = batch.deletes();
        let mut next = self.state.clone();
        for write in batch.writes {
            next.apply(write);
        }
        next.check()?;
        let committed_at = Utc::now();
        next.meta.last_commit = Some(committed_at);
        self.state = next;
        Ok(CommitReceipt {
            upserts,
            deletes,
            committed_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fixtures::NetworkFixture;
    use geo_types::coord;

    fn two_line_store() -> MemoryStore {
        let mut fx = NetworkFixture::new();
        fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        fx.line(&[(100.0, 100.0), (110.0, 100.0)]);
        MemoryStore::from_tables(fx.tables()).unwrap()
    }

    #[test]
    fn region_read_includes_referenced_terminals() {
        let store = two_line_store();
        let region = Rect::new(coord! { x: -1.0, y: -1.0 }, coord! { x: 20.0, y: 5.0 });
        let tables = store.read_region(region).unwrap();
        assert_eq!(tables.lines.len(), 1);
        assert_eq!(tables.nodes.len(), 2);
        assert_eq!(tables.watermarks.map(|w| w.line), Some(2));
    }

    #[test]
    fn failed_commit_leaves_state_untouched() {
        let mut store = two_line_store();
        let mut line = store.line(LineId(1)).cloned().unwrap();
        line.end = Terminal::Joint(JointId(99));
        let batch = WriteBatch {
            writes: vec![
                Write::Delete(RecordKey::Line(LineId(2))),
                Write::Upsert(Record::Line(line)),
            ],
        };
        let err = store.commit(batch).unwrap_err();
        assert!(matches!(err, StoreError::MissingRecord(RecordKey::Joint(JointId(99)))));
        assert_eq!(store.line_count(), 2);
        assert!(store.meta().last_commit.is_none());
    }

    #[test]
    fn commit_reports_counts() {
        let mut store = two_line_store();
        let batch = WriteBatch {
            writes: vec![
                Write::Delete(RecordKey::Line(LineId(2))),
                Write::Delete(RecordKey::Node(NodeId(3))),
                Write::Delete(RecordKey::Node(NodeId(4))),
            ],
        };
        let receipt = store.commit(batch).unwrap();
        assert_eq!((receipt.upserts, receipt.deletes), (0, 3));
        assert_eq!(store.line_count(), 1);
    }
}
