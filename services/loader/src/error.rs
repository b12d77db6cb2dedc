//! Fatal pipeline errors

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Pipeline position. Stages run strictly in declaration order; `Failed`
/// is reachable from any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    ValidatingInputs,
    LoadingSectors,
    LoadingCommunities,
    LoadingPopulation,
    BuildingIndexes,
    Verifying,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ValidatingInputs => "validating inputs",
            Stage::LoadingSectors => "loading sectors",
            Stage::LoadingCommunities => "loading communities",
            Stage::LoadingPopulation => "loading population",
            Stage::BuildingIndexes => "building indexes",
            Stage::Verifying => "verifying",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Missing required CSV files: {}", files.join(", "))]
    MissingFiles { files: Vec<String> },

    /// A phase whose output later phases depend on could not complete.
    #[error("{stage} failed: {detail}")]
    Phase { stage: Stage, detail: String },
}

impl PipelineError {
    pub fn phase(stage: Stage, err: anyhow::Error) -> Self {
        PipelineError::Phase {
            stage,
            detail: format!("{:#}", err),
        }
    }
}
