//! Pipeline orchestration
//!
//! ValidatingInputs -> LoadingSectors -> LoadingCommunities ->
//! LoadingPopulation -> BuildingIndexes -> Verifying -> Done
//!
//! A fatal error in any stage moves to Failed and nothing after it runs.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::error::{PipelineError, Stage};
use crate::indexes::{build_indexes, IndexReport, INDEXES};
use crate::outcome::LoadOutcome;
use crate::phases::{load_communities, load_population, load_sectors, DEFAULT_BATCH_SIZE};
use crate::records::{
    check_input_files, read_records, COMMUNITIES_FILE, POPULATION_FILE, SECTORS_FILE,
};
use crate::resolver::ReferenceResolver;
use crate::sanitize::Sanitizer;
use crate::store::Store;
use crate::verify::{verify, VerificationReport};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub data_dir: PathBuf,
    pub batch_size: usize,
    pub sanitizer: Sanitizer,
}

impl PipelineConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            batch_size: DEFAULT_BATCH_SIZE,
            sanitizer: Sanitizer::default(),
        }
    }
}

/// Everything a run produced, up to the stage it reached.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stage: Stage,
    pub sectors: Option<LoadOutcome>,
    pub communities: Option<LoadOutcome>,
    pub population: Option<LoadOutcome>,
    pub indexes: Option<IndexReport>,
    pub verification: Option<VerificationReport>,
}

impl PipelineSummary {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            stage: Stage::ValidatingInputs,
            sectors: None,
            communities: None,
            population: None,
            indexes: None,
            verification: None,
        }
    }

    fn has_record_errors(&self) -> bool {
        [&self.sectors, &self.communities, &self.population]
            .into_iter()
            .flatten()
            .any(|o| !o.skipped.is_empty())
    }
}

pub struct Pipeline<'a> {
    store: &'a dyn Store,
    config: PipelineConfig,
    summary: PipelineSummary,
}

impl<'a> Pipeline<'a> {
    pub fn new(store: &'a dyn Store, config: PipelineConfig) -> Self {
        Self {
            store,
            config,
            summary: PipelineSummary::new(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.summary.stage
    }

    pub fn summary(&self) -> &PipelineSummary {
        &self.summary
    }

    /// Run every stage in order. Succeeds only when verification completed.
    pub async fn run(&mut self) -> Result<PipelineSummary, PipelineError> {
        let span = tracing::info_span!("pipeline", run_id = %self.summary.run_id);
        async {
            tracing::info!(data_dir = %self.config.data_dir.display(), "starting data load");

            let result = self.run_stages().await;
            self.summary.finished_at = Some(Utc::now());

            match result {
                Ok(()) => {
                    self.enter(Stage::Done);
                    self.log_summary();
                    tracing::info!("data load completed successfully");
                    Ok(self.summary.clone())
                }
                Err(e) => {
                    tracing::error!(stage = %self.summary.stage, error = %e, "data load failed");
                    self.enter(Stage::Failed);
                    if self.summary.has_record_errors() {
                        self.log_summary();
                    }
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    fn enter(&mut self, stage: Stage) {
        tracing::debug!(from = %self.summary.stage, to = %stage, "stage transition");
        self.summary.stage = stage;
    }

    async fn run_stages(&mut self) -> Result<(), PipelineError> {
        let store = self.store;
        let dir = self.config.data_dir.clone();
        let sanitizer = self.config.sanitizer.clone();
        let mut resolver = ReferenceResolver::new();

        self.enter(Stage::ValidatingInputs);
        check_input_files(&dir).await?;

        self.enter(Stage::LoadingSectors);
        let sectors = async {
            let records = read_records(&dir.join(SECTORS_FILE)).await?;
            load_sectors(store, &records, &sanitizer, &mut resolver).await
        }
        .await
        .map_err(|e| PipelineError::phase(Stage::LoadingSectors, e))?;
        self.summary.sectors = Some(sectors);

        self.enter(Stage::LoadingCommunities);
        let communities = async {
            let records = read_records(&dir.join(COMMUNITIES_FILE)).await?;
            load_communities(store, &records, &sanitizer, &mut resolver).await
        }
        .await
        .map_err(|e| PipelineError::phase(Stage::LoadingCommunities, e))?;
        self.summary.communities = Some(communities);

        self.enter(Stage::LoadingPopulation);
        let batch_size = self.config.batch_size;
        let population = async {
            let records = read_records(&dir.join(POPULATION_FILE)).await?;
            load_population(store, &records, &sanitizer, &resolver, batch_size).await
        }
        .await
        .map_err(|e| PipelineError::phase(Stage::LoadingPopulation, e))?;
        self.summary.population = Some(population);

        self.enter(Stage::BuildingIndexes);
        self.summary.indexes = Some(build_indexes(store, INDEXES).await);

        self.enter(Stage::Verifying);
        let report = verify(store)
            .await
            .map_err(|e| PipelineError::phase(Stage::Verifying, e))?;

        if let Some(population) = &self.summary.population {
            if report.population_records != population.succeeded as i64 {
                tracing::warn!(
                    verified = report.population_records,
                    inserted = population.succeeded,
                    "population count in store differs from rows inserted"
                );
            }
        }
        self.summary.verification = Some(report);

        Ok(())
    }

    fn log_summary(&self) {
        let s = &self.summary;
        let loaded = |o: &Option<LoadOutcome>| o.as_ref().map(|o| o.succeeded).unwrap_or(0);

        tracing::info!(
            stage = %s.stage,
            sectors = loaded(&s.sectors),
            communities = loaded(&s.communities),
            population_records = loaded(&s.population),
            population_attempted = s.population.as_ref().map(|o| o.attempted).unwrap_or(0),
            years = ?s.verification.as_ref().map(|v| v.years()).unwrap_or_default(),
            "load summary"
        );

        for (phase, outcome) in [
            ("sectors", &s.sectors),
            ("communities", &s.communities),
            ("population", &s.population),
        ] {
            if let Some(outcome) = outcome {
                if !outcome.skipped.is_empty() {
                    tracing::info!(phase, skipped = ?outcome.skip_counts(), "skipped records");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::records::REQUIRED_FILES;
    use crate::store::Table;
    use tempfile::TempDir;

    const SECTORS_CSV: &str = "\u{feff}sector_name_en,sector_name_ar,total_population,total_area,total_density\n\
                               Sector A,قطاع أ,1000,5.0,200\n\
                               Sector & Community,,,,\n";

    const COMMUNITIES_CSV: &str = "community_code,name_en,name_ar,sector_name_en,area_km2\n\
                                   311,Al Barsha,البرشاء,Sector A,12.5\n\
                                   312,Jumeirah,جميرا,Unknown Sector,3.1\n";

    const POPULATION_CSV: &str = "community_code,year,population,density,is_estimated,is_anomaly\n\
                                  311,2019,1400,112,false,false\n\
                                  311,2020,1500,120,false,false\n\
                                  311,2021,2600,208,true,true\n\
                                  312,2021,800,258,false,false\n\
                                  311,2022,,130,false,false\n";

    fn write_inputs(sectors: &str, communities: &str, population: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(SECTORS_FILE), sectors).unwrap();
        std::fs::write(dir.path().join(COMMUNITIES_FILE), communities).unwrap();
        std::fs::write(dir.path().join(POPULATION_FILE), population).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_end_to_end() {
        let dir = write_inputs(SECTORS_CSV, COMMUNITIES_CSV, POPULATION_CSV);
        let store = MemoryStore::new();
        let mut pipeline = Pipeline::new(&store, PipelineConfig::new(dir.path()));

        let summary = pipeline.run().await.unwrap();

        assert_eq!(pipeline.stage(), Stage::Done);
        assert_eq!(summary.stage, Stage::Done);
        assert!(summary.finished_at.is_some());

        let sectors = summary.sectors.as_ref().unwrap();
        assert_eq!((sectors.attempted, sectors.succeeded), (2, 1));
        assert_eq!(store.sector_names(), vec!["Sector A".to_string()]);

        let communities = summary.communities.as_ref().unwrap();
        assert_eq!(communities.succeeded, 1);
        assert_eq!(communities.count_of("unresolved_sector"), 1);

        let population = summary.population.as_ref().unwrap();
        assert_eq!(population.attempted, 5);
        assert_eq!(population.succeeded, 3);

        let indexes = summary.indexes.as_ref().unwrap();
        assert_eq!(indexes.created.len(), INDEXES.len());

        let report = summary.verification.as_ref().unwrap();
        assert_eq!(report.sectors, 1);
        assert_eq!(report.communities, 1);
        assert_eq!(report.population_records, 3);
        assert_eq!(report.years(), vec![2019, 2020, 2021]);
        assert_eq!(
            report.year_distribution.values().sum::<i64>(),
            population.succeeded as i64
        );
    }

    #[tokio::test]
    async fn test_missing_files_fail_before_any_mutation() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(COMMUNITIES_FILE), COMMUNITIES_CSV).unwrap();

        let store = MemoryStore::new();
        // rows from an earlier run must survive a failed validation
        let earlier = write_inputs(SECTORS_CSV, COMMUNITIES_CSV, POPULATION_CSV);
        Pipeline::new(&store, PipelineConfig::new(earlier.path()))
            .run()
            .await
            .unwrap();

        let mut pipeline = Pipeline::new(&store, PipelineConfig::new(dir.path()));
        let err = pipeline.run().await.unwrap_err();

        match err {
            PipelineError::MissingFiles { files } => {
                assert_eq!(files, vec!["sectors.csv".to_string(), "population.csv".to_string()]);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(pipeline.stage(), Stage::Failed);
        assert!(pipeline.summary().sectors.is_none());
        assert_eq!(store.count_rows(Table::Sectors).await.unwrap(), 1);
        assert_eq!(store.count_rows(Table::Population).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_no_files_names_all_three() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new();
        let err = Pipeline::new(&store, PipelineConfig::new(dir.path()))
            .run()
            .await
            .unwrap_err();
        let message = err.to_string();
        for name in REQUIRED_FILES {
            assert!(message.contains(name), "{message}");
        }
    }

    #[tokio::test]
    async fn test_rerun_is_idempotent() {
        let dir = write_inputs(SECTORS_CSV, COMMUNITIES_CSV, POPULATION_CSV);
        let store = MemoryStore::new();

        let first = Pipeline::new(&store, PipelineConfig::new(dir.path()))
            .run()
            .await
            .unwrap();
        let second = Pipeline::new(&store, PipelineConfig::new(dir.path()))
            .run()
            .await
            .unwrap();

        assert_ne!(first.run_id, second.run_id);
        assert_eq!(first.verification, second.verification);
        assert_eq!(second.verification.unwrap().population_records, 3);
    }

    #[tokio::test]
    async fn test_sector_phase_failure_stops_pipeline() {
        let dir = write_inputs(SECTORS_CSV, COMMUNITIES_CSV, POPULATION_CSV);
        let store = MemoryStore::without_table(Table::Sectors);
        let mut pipeline = Pipeline::new(&store, PipelineConfig::new(dir.path()));

        let err = pipeline.run().await.unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Phase {
                stage: Stage::LoadingSectors,
                ..
            }
        ));
        assert_eq!(pipeline.stage(), Stage::Failed);
        assert!(pipeline.summary().communities.is_none());
        assert!(pipeline.summary().population.is_none());
        assert_eq!(store.count_rows(Table::Communities).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_population_table_fails_population_stage() {
        let dir = write_inputs(SECTORS_CSV, COMMUNITIES_CSV, POPULATION_CSV);
        let store = MemoryStore::without_table(Table::Population);
        let mut pipeline = Pipeline::new(&store, PipelineConfig::new(dir.path()));

        let result = pipeline.run().await;

        // every insert fails and is skipped; the run only fails when
        // verification cannot count the missing table
        assert!(matches!(
            result,
            Err(PipelineError::Phase {
                stage: Stage::Verifying,
                ..
            })
        ));
        let population = pipeline.summary().population.as_ref().unwrap();
        assert_eq!(population.succeeded, 0);
        assert_eq!(population.count_of("insert_failed"), 3);
        let indexes = pipeline.summary().indexes.as_ref().unwrap();
        assert_eq!(indexes.failed.len(), 2);
    }

    #[tokio::test]
    async fn test_custom_batch_size() {
        let dir = write_inputs(SECTORS_CSV, COMMUNITIES_CSV, POPULATION_CSV);
        let store = MemoryStore::new();
        let mut config = PipelineConfig::new(dir.path());
        config.batch_size = 2;

        let summary = Pipeline::new(&store, config).run().await.unwrap();
        let batches: Vec<usize> = summary
            .population
            .unwrap()
            .batches
            .iter()
            .map(|b| b.rows)
            .collect();
        assert_eq!(batches, vec![2, 2, 1]);
    }

    #[tokio::test]
    async fn test_summary_serializes() {
        let dir = write_inputs(SECTORS_CSV, COMMUNITIES_CSV, POPULATION_CSV);
        let store = MemoryStore::new();
        let summary = Pipeline::new(&store, PipelineConfig::new(dir.path()))
            .run()
            .await
            .unwrap();

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["stage"], "done");
        assert_eq!(json["sectors"]["skipped"]["banner"], 1);
        assert_eq!(json["verification"]["year_distribution"]["2021"], 1);
    }
}
