use std::path::PathBuf;

use thiserror::Error;

use crate::world::BuildingKind;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("failed to read scenario {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("scenario parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("building kind '{0}' has no cost entry")]
    MissingBuildCost(BuildingKind),
    #[error("scenario validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Error)]
pub enum PolicyFileError {
    #[error("policy file io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("policy file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("failed to replace policy file: {0}")]
    Persist(#[from] tempfile::PersistError),
}
