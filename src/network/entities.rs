use super::ids::{JointId, LineId, NodeId, Side, StationId, TagId, Terminal};
use crate::geometry_utils;
use crate::stages::StageId;
use geo::{Area, BoundingRect, Contains};
use geo_types::{Coord, LineString, MultiPolygon, Point, Rect};
use std::collections::{BTreeMap, BTreeSet};

/// Raw survey attributes, e.g. `power=line`, `voltage=110000;20000`.
pub type Attributes = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub position: Coord<f64>,
    /// Electrical role from the survey (`tower`, `pole`, `portal`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default)]
    pub modified_by: Option<StageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Line {
    pub id: LineId,
    pub geometry: LineString<f64>,
    pub start: Terminal,
    pub end: Terminal,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub tag: Option<TagId>,
    #[serde(default)]
    pub electrical: Option<ElectricalProperties>,
    #[serde(default)]
    pub modified_by: Option<StageId>,
}

impl Line {
    pub fn terminal(&self, side: Side) -> Terminal {
        match side {
            Side::Start => self.start,
            Side::End => self.end,
        }
    }

    pub fn set_terminal(&mut self, side: Side, terminal: Terminal) {
        match side {
            Side::Start => self.start = terminal,
            Side::End => self.end = terminal,
        }
    }

    /// Sides of this line attached to `terminal` (both for a loop).
    pub fn sides_at(&self, terminal: Terminal) -> Vec<Side> {
        let mut sides = Vec::with_capacity(2);
        if self.start == terminal {
            sides.push(Side::Start);
        }
        if self.end == terminal {
            sides.push(Side::End);
        }
        sides
    }

    pub fn endpoint(&self, side: Side) -> Coord<f64> {
        let coords = &self.geometry.0;
        match side {
            Side::Start => coords[0],
            Side::End => coords[coords.len() - 1],
        }
    }

    pub fn set_endpoint(&mut self, side: Side, position: Coord<f64>) {
        let coords = &mut self.geometry.0;
        let idx = match side {
            Side::Start => 0,
            Side::End => coords.len() - 1,
        };
        coords[idx] = position;
    }

    /// Coordinates oriented so that the sequence begins at `side`.
    pub fn coords_from(&self, side: Side) -> Vec<Coord<f64>> {
        match side {
            Side::Start => self.geometry.0.clone(),
            Side::End => self.geometry.0.iter().rev().copied().collect(),
        }
    }

    pub fn is_loop(&self) -> bool {
        self.start == self.end
    }

    pub fn length(&self) -> f64 {
        geometry_utils::polyline_length(&self.geometry.0)
    }

    pub fn bbox(&self) -> Option<Rect<f64>> {
        self.geometry.bounding_rect()
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub id: StationId,
    pub boundary: MultiPolygon<f64>,
    #[serde(default)]
    pub attributes: Attributes,
    /// Terminals inside this station. A terminal belongs to at most one station.
    #[serde(default)]
    pub nodes: BTreeSet<NodeId>,
    #[serde(default)]
    pub joints: BTreeSet<JointId>,
    #[serde(default)]
    pub modified_by: Option<StageId>,
}

impl Station {
    pub fn area(&self) -> f64 {
        self.boundary.unsigned_area()
    }

    pub fn bbox(&self) -> Option<Rect<f64>> {
        self.boundary.bounding_rect()
    }

    pub fn boundary_distance(&self, position: Coord<f64>) -> f64 {
        geometry_utils::distance_to_boundary(position, &self.boundary)
    }

    /// Strictly inside the boundary.
    pub fn contains_point(&self, position: Coord<f64>) -> bool {
        let point = Point::from(position);
        self.boundary.0.iter().any(|polygon| polygon.contains(&point))
    }

    /// Inside, or within `tolerance` of the boundary.
    pub fn covers_point(&self, position: Coord<f64>, tolerance: f64) -> bool {
        self.contains_point(position) || self.boundary_distance(position) <= tolerance
    }

    /// True when a single polygon of the boundary holds the whole path.
    pub fn encloses(&self, path: &LineString<f64>, tolerance: f64) -> bool {
        let (Some(first), Some(last)) = (path.0.first(), path.0.last()) else {
            return false;
        };
        if !self.covers_point(*first, tolerance) || !self.covers_point(*last, tolerance) {
            return false;
        }
        self.boundary.0.iter().any(|polygon| polygon.contains(path))
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointOrigin {
    /// Two or more lines terminating at a shared node.
    LineJoint,
    /// A line terminal touching a station boundary.
    Attachment,
    /// A dangling terminal splitting another line.
    Split,
    /// Terminals unified after splitting.
    MutualTerminal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    pub id: JointId,
    pub position: Coord<f64>,
    pub origin: JointOrigin,
    #[serde(default)]
    pub modified_by: Option<StageId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: TagId,
    pub label: String,
    /// Lowest seed line carrying this label.
    pub seed: LineId,
    #[serde(default)]
    pub modified_by: Option<StageId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoltageClass {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectricalProperties {
    /// Every voltage the survey lists for this line, ascending, in volts.
    pub voltages: Vec<u32>,
    pub nominal_voltage: Option<u32>,
    pub class: Option<VoltageClass>,
    /// Class taken from the component or adjacent stations rather than the line.
    pub inferred: bool,
    pub frequency: Option<f64>,
    pub cables: Option<u32>,
    pub wires: Option<String>,
    pub circuits: Option<u32>,
    /// Lowest line id of the electrical component.
    pub component: LineId,
    pub conflicted: bool,
}
