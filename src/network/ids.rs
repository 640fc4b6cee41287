use std::fmt;

macro_rules! entity_id {
    ($name:ident, $prefix:literal) => {
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

entity_id!(NodeId, "n");
entity_id!(LineId, "l");
entity_id!(StationId, "s");
entity_id!(JointId, "j");
entity_id!(TagId, "t");

/// What a line end is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Terminal {
    Node(NodeId),
    Joint(JointId),
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Node(id) => id.fmt(f),
            Terminal::Joint(id) => id.fmt(f),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    Start,
    End,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Start => Side::End,
            Side::End => Side::Start,
        }
    }
}

/// Key of a persisted record, used by the write journal and store batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RecordKey {
    Node(NodeId),
    Line(LineId),
    Station(StationId),
    Joint(JointId),
    Tag(TagId),
    Views,
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKey::Node(id) => write!(f, "node {}", id),
            RecordKey::Line(id) => write!(f, "line {}", id),
            RecordKey::Station(id) => write!(f, "station {}", id),
            RecordKey::Joint(id) => write!(f, "joint {}", id),
            RecordKey::Tag(id) => write!(f, "tag {}", id),
            RecordKey::Views => write!(f, "derived views"),
        }
    }
}

impl From<Terminal> for RecordKey {
    fn from(terminal: Terminal) -> Self {
        match terminal {
            Terminal::Node(id) => RecordKey::Node(id),
            Terminal::Joint(id) => RecordKey::Joint(id),
        }
    }
}
