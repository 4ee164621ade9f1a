use std::path::PathBuf;

use thiserror::Error;

use crate::corpus::CorpusError;
use crate::revert::RevertError;

#[derive(Error, Debug)]
pub enum DriverError {
    #[error("{marker} not found in {}. Wrong directory?", .root.display())]
    NotARepo { root: PathBuf, marker: String },

    #[error("Mutations directory not found: {}", .0.display())]
    MissingMutationsDir(PathBuf),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Baseline tests failed. Cannot proceed with mutation testing.")]
    BaselineFailed { output: String },

    #[error("Corpus error: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Aborting run after failed revert of {mutation}: {source}")]
    RevertFailed {
        mutation: String,
        #[source]
        source: RevertError,
    },

    #[error("Mutation testing interrupted by user")]
    Interrupted,
}

impl DriverError {
    pub fn exit_code(&self) -> i32 {
        match self {
            DriverError::NotARepo { .. }
            | DriverError::MissingMutationsDir(_)
            | DriverError::Config(_) => 2,
            DriverError::BaselineFailed { .. } => 3,
            DriverError::RevertFailed { .. } => 4,
            DriverError::Corpus(_) => 5,
            DriverError::Interrupted => 130,
        }
    }
}
