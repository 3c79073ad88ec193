//! The narrow seam to the external candidate-pruning engine.

use std::path::{Path, PathBuf};

use thiserror::Error;

use kernrace_ivl::ast::Program;

use crate::outcome::{Assignment, InferenceOutcome, VerificationOutcome};

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference engine failure: {0}")]
    Engine(String),
    #[error("cannot read assignment file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed assignment file: {0}")]
    Codec(#[from] serde_json::Error),
}

/// External engine coupling. The pipeline assumes nothing about the
/// engine's algorithm beyond this interface.
pub trait InferenceEngine {
    /// Resolve every candidate in the program to a boolean, reporting
    /// per-implementation outcomes.
    fn infer(&mut self, program: &Program) -> Result<InferenceOutcome, InferenceError>;
}

/// An engine that replays a previously recorded assignment and reports
/// every implementation as verified. Used when the pruning run happened
/// out of process and only its result is available.
#[derive(Debug, Clone)]
pub struct RecordedAssignment {
    assignment: Assignment,
}

impl RecordedAssignment {
    pub fn new(assignment: Assignment) -> Self {
        RecordedAssignment { assignment }
    }

    /// Load the assignment from a JSON file mapping candidate names to
    /// booleans.
    pub fn from_file(path: &Path) -> Result<Self, InferenceError> {
        let text = std::fs::read_to_string(path).map_err(|source| InferenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(RecordedAssignment {
            assignment: serde_json::from_str(&text)?,
        })
    }
}

impl InferenceEngine for RecordedAssignment {
    fn infer(&mut self, program: &Program) -> Result<InferenceOutcome, InferenceError> {
        let implementation_outcomes = program
            .implementations
            .iter()
            .map(|imp| (imp.name.clone(), VerificationOutcome::Verified))
            .collect();
        Ok(InferenceOutcome {
            assignment: self.assignment.clone(),
            implementation_outcomes,
            diagnostics: Vec::new(),
        })
    }
}
