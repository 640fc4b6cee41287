use crate::network::{LineId, RecordKey, VoltageClass};
use crate::stages::StageId;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Malformed input geometry.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed geometry on {entity}: {detail}")]
pub struct GeometryError {
    pub entity: RecordKey,
    pub detail: String,
}

impl GeometryError {
    pub fn new(entity: RecordKey, detail: impl Into<String>) -> Self {
        Self {
            entity,
            detail: detail.into(),
        }
    }
}

/// A transformation would break a network invariant.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{detail}")]
pub struct ConsistencyError {
    pub detail: String,
}

impl ConsistencyError {
    pub fn new(detail: impl Into<String>) -> Self {
        Self {
            detail: detail.into(),
        }
    }
}

/// Inconsistent voltage classes inside one electrical component.
/// Recorded in the stage summary; never aborts a run.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[error("component {component} carries conflicting voltage classes {classes:?}")]
pub struct ConflictError {
    pub component: LineId,
    pub classes: Vec<VoltageClass>,
    pub lines: Vec<LineId>,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error accessing '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("GeoJSON error: {0}")]
    GeoJson(String),
    #[error("batch references missing {0}")]
    MissingRecord(RecordKey),
    #[error("store holds inconsistent tables: {0}")]
    Corrupt(String),
}

/// Failure inside one stage. Every variant aborts the run.
#[derive(Error, Debug)]
pub enum StageError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),
    #[error("consistency error: {0}")]
    Consistency(#[from] ConsistencyError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("stage {stage} failed: {source}")]
    Stage {
        stage: StageId,
        #[source]
        source: StageError,
    },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("empty stage range")]
    EmptyRange,
}

impl PipelineError {
    pub fn stage(&self) -> Option<StageId> {
        match self {
            PipelineError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::NodeId;

    #[test]
    fn stage_error_display_names_stage() {
        let err = PipelineError::Stage {
            stage: StageId::MergeStations,
            source: StageError::Geometry(GeometryError::new(
                RecordKey::Node(NodeId(4)),
                "non-finite coordinate",
            )),
        };
        let text = err.to_string();
        assert!(text.contains("spatial-1-merge-stations"));
        assert!(text.contains("node n4"));
        assert_eq!(err.stage(), Some(StageId::MergeStations));
    }

    #[test]
    fn consistency_converts_into_stage_error() {
        fn inner() -> Result<(), StageError> {
            Err(ConsistencyError::new("line l1 references missing j9"))?;
            Ok(())
        }
        assert!(matches!(inner(), Err(StageError::Consistency(_))));
    }
}
