//! The nineteen network transformations, grouped into three phases.
//!
//! Stages run in the order of [`StageId::ALL`]. Every stage reads the current
//! [`Network`], applies its edits through the network's mutation methods and
//! reports what it changed in a [`StageOutcome`].

pub mod abstraction;
pub mod electrical;
pub mod high_voltage;
pub mod line_joints;
pub mod line_overlap;
pub mod merge_lines;
pub mod shared_nodes;
pub mod stations;
pub mod tags;
pub mod terminal_intersections;
pub mod topology;

use crate::config::PipelineConfig;
use crate::error::{ConflictError, StageError};
use crate::network::Network;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::AddAssign;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[serde(rename = "shared-nodes")]
    SharedNodes,
    #[serde(rename = "spatial")]
    Spatial,
    #[serde(rename = "topology")]
    Topology,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::SharedNodes, Phase::Spatial, Phase::Topology];

    pub fn name(&self) -> &'static str {
        match self {
            Phase::SharedNodes => "shared-nodes",
            Phase::Spatial => "spatial",
            Phase::Topology => "topology",
        }
    }

    pub fn stages(&self) -> impl Iterator<Item = StageId> + '_ {
        StageId::ALL.into_iter().filter(move |s| s.phase() == *self)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Stable stage identifiers, ordered as the pipeline runs them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum StageId {
    #[serde(rename = "node-1-find-shared")]
    FindSharedNodes,
    #[serde(rename = "node-2-merge-lines")]
    MergeLines,
    #[serde(rename = "node-3-line-joints")]
    LineJoints,
    #[serde(rename = "spatial-1-merge-stations")]
    MergeStations,
    #[serde(rename = "spatial-2-eliminate-internal-lines")]
    EliminateInternalLines,
    #[serde(rename = "spatial-3-eliminate-line-overlap")]
    EliminateLineOverlap,
    #[serde(rename = "spatial-4-attachment-joints")]
    AttachmentJoints,
    #[serde(rename = "spatial-5a-line-terminal-intersections")]
    LineTerminalIntersections,
    #[serde(rename = "spatial-5b-mutual-terminal-intersections")]
    MutualTerminalIntersections,
    #[serde(rename = "spatial-5c-joint-stations")]
    JointStations,
    #[serde(rename = "spatial-6-merge-lines")]
    SecondLineMerge,
    #[serde(rename = "topology-1-connections")]
    Connections,
    #[serde(rename = "topology-2a-dangling-joints")]
    DanglingJoints,
    #[serde(rename = "topology-2b-redundant-splits")]
    RedundantSplits,
    #[serde(rename = "topology-2c-redundant-joints")]
    RedundantJoints,
    #[serde(rename = "topology-3a-assign-tags")]
    AssignTags,
    #[serde(rename = "topology-3b-electrical-properties")]
    ElectricalProperties,
    #[serde(rename = "topology-4-high-voltage-network")]
    HighVoltageNetwork,
    #[serde(rename = "topology-5-abstraction")]
    Abstraction,
}

impl StageId {
    pub const ALL: [StageId; 19] = [
        StageId::FindSharedNodes,
        StageId::MergeLines,
        StageId::LineJoints,
        StageId::MergeStations,
        StageId::EliminateInternalLines,
        StageId::EliminateLineOverlap,
        StageId::AttachmentJoints,
        StageId::LineTerminalIntersections,
        StageId::MutualTerminalIntersections,
        StageId::JointStations,
        StageId::SecondLineMerge,
        StageId::Connections,
        StageId::DanglingJoints,
        StageId::RedundantSplits,
        StageId::RedundantJoints,
        StageId::AssignTags,
        StageId::ElectricalProperties,
        StageId::HighVoltageNetwork,
        StageId::Abstraction,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            StageId::FindSharedNodes => "node-1-find-shared",
            StageId::MergeLines => "node-2-merge-lines",
            StageId::LineJoints => "node-3-line-joints",
            StageId::MergeStations => "spatial-1-merge-stations",
            StageId::EliminateInternalLines => "spatial-2-eliminate-internal-lines",
            StageId::EliminateLineOverlap => "spatial-3-eliminate-line-overlap",
            StageId::AttachmentJoints => "spatial-4-attachment-joints",
            StageId::LineTerminalIntersections => "spatial-5a-line-terminal-intersections",
            StageId::MutualTerminalIntersections => "spatial-5b-mutual-terminal-intersections",
            StageId::JointStations => "spatial-5c-joint-stations",
            StageId::SecondLineMerge => "spatial-6-merge-lines",
            StageId::Connections => "topology-1-connections",
            StageId::DanglingJoints => "topology-2a-dangling-joints",
            StageId::RedundantSplits => "topology-2b-redundant-splits",
            StageId::RedundantJoints => "topology-2c-redundant-joints",
            StageId::AssignTags => "topology-3a-assign-tags",
            StageId::ElectricalProperties => "topology-3b-electrical-properties",
            StageId::HighVoltageNetwork => "topology-4-high-voltage-network",
            StageId::Abstraction => "topology-5-abstraction",
        }
    }

    pub fn phase(&self) -> Phase {
        match self {
            StageId::FindSharedNodes | StageId::MergeLines | StageId::LineJoints => {
                Phase::SharedNodes
            }
            StageId::MergeStations
            | StageId::EliminateInternalLines
            | StageId::EliminateLineOverlap
            | StageId::AttachmentJoints
            | StageId::LineTerminalIntersections
            | StageId::MutualTerminalIntersections
            | StageId::JointStations
            | StageId::SecondLineMerge => Phase::Spatial,
            _ => Phase::Topology,
        }
    }

    /// Stages allowed to drop lines out of their component.
    pub fn may_disconnect(&self) -> bool {
        matches!(
            self,
            StageId::EliminateInternalLines | StageId::DanglingJoints
        )
    }

    pub fn last_of_phase(&self) -> bool {
        self.phase().stages().last() == Some(*self)
    }

    pub fn run(
        &self,
        network: &mut Network,
        config: &PipelineConfig,
    ) -> Result<StageOutcome, StageError> {
        match self {
            StageId::FindSharedNodes => shared_nodes::run(network, config),
            StageId::MergeLines | StageId::SecondLineMerge => merge_lines::run(network, config),
            StageId::LineJoints => line_joints::run(network, config),
            StageId::MergeStations => stations::merge_stations(network, config),
            StageId::EliminateInternalLines => stations::eliminate_internal_lines(network, config),
            StageId::EliminateLineOverlap => line_overlap::run(network, config),
            StageId::AttachmentJoints => stations::attachment_joints(network, config),
            StageId::LineTerminalIntersections => {
                terminal_intersections::line_terminals(network, config)
            }
            StageId::MutualTerminalIntersections => {
                terminal_intersections::mutual_terminals(network, config)
            }
            StageId::JointStations => stations::joint_stations(network, config),
            StageId::Connections => topology::connections(network, config),
            StageId::DanglingJoints => topology::dangling_joints(network, config),
            StageId::RedundantSplits => topology::redundant_splits(network, config),
            StageId::RedundantJoints => topology::redundant_joints(network, config),
            StageId::AssignTags => tags::run(network, config),
            StageId::ElectricalProperties => electrical::run(network, config),
            StageId::HighVoltageNetwork => high_voltage::run(network, config),
            StageId::Abstraction => abstraction::run(network, config),
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StageId::ALL
            .into_iter()
            .find(|stage| stage.name() == s)
            .ok_or_else(|| format!("unknown stage '{}'", s))
    }
}

/// What a stage changed. Zero everywhere means the stage was a no-op.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    pub merged: usize,
    pub eliminated: usize,
    pub created: usize,
    pub updated: usize,
}

impl StageCounts {
    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }

    pub fn total(&self) -> usize {
        self.merged + self.eliminated + self.created + self.updated
    }
}

impl AddAssign for StageCounts {
    fn add_assign(&mut self, other: Self) {
        self.merged += other.merged;
        self.eliminated += other.eliminated;
        self.created += other.created;
        self.updated += other.updated;
    }
}

impl fmt::Display for StageCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "merged={} eliminated={} created={} updated={}",
            self.merged, self.eliminated, self.created, self.updated
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageOutcome {
    pub counts: StageCounts,
    pub conflicts: Vec<ConflictError>,
    /// Stage specific figures, e.g. component counts.
    pub metrics: BTreeMap<String, u64>,
}

impl StageOutcome {
    pub fn from_counts(counts: StageCounts) -> Self {
        Self {
            counts,
            ..Default::default()
        }
    }

    pub fn metric(mut self, name: &str, value: usize) -> Self {
        self.metrics.insert(name.to_string(), value as u64);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageSummary {
    pub stage: StageId,
    pub counts: StageCounts,
    pub conflicts: Vec<ConflictError>,
    pub metrics: BTreeMap<String, u64>,
    pub elapsed_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_parse_back_in_pipeline_order() {
        let parsed: Vec<StageId> = StageId::ALL
            .iter()
            .map(|s| s.name().parse().unwrap())
            .collect();
        assert_eq!(parsed, StageId::ALL.to_vec());
        assert!(StageId::ALL.windows(2).all(|w| w[0] < w[1]));
        assert!("node-9-nothing".parse::<StageId>().is_err());
    }

    #[test]
    fn phases_partition_the_stages() {
        let counts: Vec<usize> = Phase::ALL.iter().map(|p| p.stages().count()).collect();
        assert_eq!(counts, vec![3, 8, 8]);
        assert!(StageId::LineJoints.last_of_phase());
        assert!(StageId::SecondLineMerge.last_of_phase());
        assert!(!StageId::Connections.last_of_phase());
    }

    #[test]
    fn provenance_serializes_as_stage_name() {
        let json = serde_json::to_string(&StageId::JointStations).unwrap();
        assert_eq!(json, "\"spatial-5c-joint-stations\"");
    }
}
