//! Backing stores for the network tables.
//!
//! The pipeline only needs what [`NetworkStore`] describes: bulk and spatial
//! reads, reads by id, and an atomic commit of a [`WriteBatch`].

mod file;
mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::network::{
    Joint, JointId, Line, Node, NodeId, RecordKey, Station, Tag, Views,
};
use chrono::{DateTime, Utc};
use geo_types::Rect;
use std::collections::BTreeSet;

/// Metadata kept next to the tables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreMeta {
    /// Longitude/latitude origin when coordinates were projected on import.
    #[serde(default)]
    pub origin: Option<(f64, f64)>,
    #[serde(default)]
    pub prepared_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_commit: Option<DateTime<Utc>>,
}

/// A full or partial copy of the store contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tables {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub lines: Vec<Line>,
    #[serde(default)]
    pub stations: Vec<Station>,
    #[serde(default)]
    pub joints: Vec<Joint>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub views: Views,
    #[serde(default)]
    pub meta: StoreMeta,
    /// Set on partial reads so new records never reuse an id held elsewhere.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watermarks: Option<IdWatermarks>,
}

/// Highest identifier stored per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdWatermarks {
    pub node: u64,
    pub line: u64,
    pub joint: u64,
    pub tag: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Record {
    Node(Node),
    Line(Line),
    Station(Station),
    Joint(Joint),
    Tag(Tag),
    Views(Views),
}

impl Record {
    pub fn key(&self) -> RecordKey {
        match self {
            Record::Node(n) => RecordKey::Node(n.id),
            Record::Line(l) => RecordKey::Line(l.id),
            Record::Station(s) => RecordKey::Station(s.id),
            Record::Joint(j) => RecordKey::Joint(j.id),
            Record::Tag(t) => RecordKey::Tag(t.id),
            Record::Views(_) => RecordKey::Views,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Write {
    Upsert(Record),
    Delete(RecordKey),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch {
    pub writes: Vec<Write>,
}

impl WriteBatch {
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn upserts(&self) -> usize {
        self.writes
            .iter()
            .filter(|w| matches!(w, Write::Upsert(_)))
            .count()
    }

    pub fn deletes(&self) -> usize {
        self.writes.len() - self.upserts()
    }
}

/// Returned once a batch is durable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitReceipt {
    pub upserts: usize,
    pub deletes: usize,
    pub committed_at: DateTime<Utc>,
}

pub trait NetworkStore {
    /// Bulk read of every table.
    fn read_all(&self) -> Result<Tables, StoreError>;

    /// Lines and stations whose extent intersects `region`, with the terminals
    /// they reference and the tags their lines use.
    fn read_region(&self, region: Rect<f64>) -> Result<Tables, StoreError>;

    fn nodes_by_id(&self, ids: &BTreeSet<NodeId>) -> Result<Vec<Node>, StoreError>;

    fn joints_by_id(&self, ids: &BTreeSet<JointId>) -> Result<Vec<Joint>, StoreError>;

    /// Drop every table and start over from `tables`.
    fn prepare(&mut self, tables: Tables) -> Result<(), StoreError>;

    /// Apply every write of the batch, or none of them.
    fn commit(&mut self, batch: WriteBatch) -> Result<CommitReceipt, StoreError>;
}
