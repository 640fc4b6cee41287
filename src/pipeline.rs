// ===========================================================================
// Phase-by-phase stage runner with per-phase commits
// ===========================================================================
use crate::config::PipelineConfig;
use crate::error::{ConflictError, PipelineError, StageError, StoreError};
use crate::graph::ConnectivitySnapshot;
use crate::network::Network;
use crate::stages::{Phase, StageCounts, StageId, StageSummary};
use crate::store::{CommitReceipt, NetworkStore};
use log::{debug, info};
use std::ops::RangeBounds;
use std::time::Instant;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseCommit {
    pub phase: Phase,
    pub receipt: CommitReceipt,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub stages: Vec<StageSummary>,
    pub commits: Vec<PhaseCommit>,
}

impl PipelineReport {
    pub fn summary(&self, stage: StageId) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    pub fn conflicts(&self) -> impl Iterator<Item = &ConflictError> {
        self.stages.iter().flat_map(|s| s.conflicts.iter())
    }

    pub fn total_counts(&self) -> StageCounts {
        let mut total = StageCounts::default();
        for stage in &self.stages {
            total += stage.counts;
        }
        total
    }
}

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn load<S: NetworkStore>(&self, store: &S) -> Result<Network, PipelineError> {
        let tables = match self.config.region_rect() {
            Some(region) => store.read_region(region)?,
            None => store.read_all()?,
        };
        info!(
            "loaded {} nodes, {} lines, {} stations, {} joints",
            tables.nodes.len(),
            tables.lines.len(),
            tables.stations.len(),
            tables.joints.len()
        );
        Network::from_tables(tables).map_err(|e| StoreError::Corrupt(e.to_string()).into())
    }

    /// Run the contiguous range of stages against `store`, committing the
    /// writes of each phase before the next phase starts.
    pub fn run<S: NetworkStore>(
        &self,
        store: &mut S,
        range: impl RangeBounds<StageId>,
    ) -> Result<PipelineReport, PipelineError> {
        let selected: Vec<StageId> = StageId::ALL
            .into_iter()
            .filter(|s| range.contains(s))
            .collect();
        let (Some(first), Some(last)) = (selected.first().copied(), selected.last().copied())
        else {
            return Err(PipelineError::EmptyRange);
        };

        let mut network = self.load(store)?;
        network.validate_geometry().map_err(|e| PipelineError::Stage {
            stage: first,
            source: e.into(),
        })?;

        let mut report = PipelineReport::default();
        for stage in selected {
            let summary = self
                .run_stage(&mut network, stage)
                .map_err(|source| PipelineError::Stage { stage, source })?;
            info!(
                "{} finished in {} ms: {}",
                stage, summary.elapsed_ms, summary.counts
            );
            report.stages.push(summary);

            if stage.last_of_phase() || stage == last {
                let batch = network.take_batch();
                let phase = stage.phase();
                let receipt = store.commit(batch).map_err(|e| PipelineError::Stage {
                    stage,
                    source: StageError::Store(e),
                })?;
                info!(
                    "committed {} phase: {} upserts, {} deletes",
                    phase, receipt.upserts, receipt.deletes
                );
                report.commits.push(PhaseCommit { phase, receipt });
            }
        }
        Ok(report)
    }

    fn run_stage(&self, network: &mut Network, stage: StageId) -> Result<StageSummary, StageError> {
        info!("{} started", stage);
        let started = Instant::now();
        let guard = if self.config.verify_connectivity && !stage.may_disconnect() {
            let graph = network.connectivity()?;
            Some(ConnectivitySnapshot::capture(&*graph))
        } else {
            None
        };

        network.begin_stage(stage);
        let outcome = stage.run(network, &self.config);
        network.end_stage();
        let outcome = outcome?;

        if let Some(snapshot) = guard {
            let graph = network.connectivity()?;
            snapshot.verify(&*graph, stage)?;
            debug!("{} kept connectivity", stage);
        }
        Ok(StageSummary {
            stage,
            counts: outcome.counts,
            conflicts: outcome.conflicts,
            metrics: outcome.metrics,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::fixtures::NetworkFixture;
    use crate::store::MemoryStore;
    use geo_types::coord;

    fn chain_store() -> MemoryStore {
        let mut fx = NetworkFixture::new();
        let a = fx.node(0.0, 0.0);
        let b = fx.node(10.0, 0.0);
        let c = fx.node(20.0, 0.0);
        let d = fx.node(30.0, 0.0);
        fx.line_between(a, b, &[]);
        fx.line_between(b, c, &[]);
        fx.line_between(c, d, &[]);
        MemoryStore::from_tables(fx.tables()).unwrap()
    }

    #[test]
    fn full_run_commits_once_per_phase() {
        let mut store = chain_store();
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let report = pipeline.run(&mut store, ..).unwrap();
        assert_eq!(report.stages.len(), 19);
        let phases: Vec<Phase> = report.commits.iter().map(|c| c.phase).collect();
        assert_eq!(phases, Phase::ALL.to_vec());
        assert_eq!(report.summary(StageId::MergeLines).unwrap().counts.merged, 2);
        assert_eq!(store.line_count(), 1);
        assert!(store.views().abstraction.is_some());
    }

    #[test]
    fn partial_range_resumes_from_store() {
        let mut store = chain_store();
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let report = pipeline
            .run(&mut store, StageId::FindSharedNodes..=StageId::MergeLines)
            .unwrap();
        assert_eq!(report.stages.len(), 2);
        assert_eq!(report.commits.len(), 1);
        assert_eq!(store.line_count(), 1);

        let again = pipeline.run(&mut store, StageId::MergeLines..=StageId::MergeLines).unwrap();
        assert!(again.total_counts().is_empty());
    }

    #[test]
    fn empty_range_is_rejected() {
        let mut store = chain_store();
        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let err = pipeline
            .run(&mut store, StageId::Abstraction..StageId::Abstraction)
            .unwrap_err();
        assert!(matches!(err, PipelineError::EmptyRange));
    }

    #[test]
    fn failing_stage_leaves_store_untouched() {
        let mut fx = NetworkFixture::new();
        let line = fx.line(&[(0.0, 0.0), (10.0, 0.0)]);
        fx.line(&[(0.0, 0.05), (-10.0, 0.0)]);
        let mut tables = fx.tables();
        // endpoint no longer on its terminal
        tables.lines[0].geometry.0[1] = coord! { x: 11.0, y: 0.0 };
        let mut store = MemoryStore::from_tables(tables).unwrap();

        let pipeline = Pipeline::new(PipelineConfig::default()).unwrap();
        let err = pipeline.run(&mut store, ..).unwrap_err();
        assert_eq!(err.stage(), Some(StageId::FindSharedNodes));
        assert!(store.meta().last_commit.is_none());
        assert_eq!(store.line(line).unwrap().geometry.0[1], coord! { x: 11.0, y: 0.0 });
    }

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = PipelineConfig {
            coincidence_tolerance: -1.0,
            ..Default::default()
        };
        assert!(matches!(Pipeline::new(config), Err(PipelineError::Config(_))));
    }
}
