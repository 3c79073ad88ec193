//! Two-phase pipeline orchestration.
//!
//! Phase A discovers invariants with check calls stripped: the checks'
//! assertions depend on invariants not yet found, so they would make every
//! candidate fail. Phase B re-reads the original program with checks
//! retained and replays phase A's assignment onto every candidate
//! occurrence.

use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use kernrace_ivl::frontend::{Frontend, FrontendError};
use kernrace_ivl::passes;

use crate::inference::{InferenceEngine, InferenceError};
use crate::outcome::{Diagnostic, OutcomeTally};

#[derive(Debug, Clone, Copy)]
pub struct LoopUnroll {
    pub bound: usize,
    /// Assert, rather than assume, that the loop cannot iterate past the
    /// bound.
    pub sound: bool,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub do_mod_set_analysis: bool,
    pub coalesce_blocks: bool,
    pub inline: bool,
    /// Unrolling replaces loops outright, so it only runs in phase B, once
    /// no further candidate search is needed.
    pub loop_unroll: Option<LoopUnroll>,
    pub print_assignment: bool,
    /// Where to emit the final artifact; the input location when absent.
    pub output: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Frontend(#[from] FrontendError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// How a pipeline run ended. `NotVerified` is a normal terminal state, not
/// an error: the input was processed, the conclusion was negative.
#[derive(Debug)]
pub enum PipelineOutcome {
    Verified {
        tally: OutcomeTally,
    },
    NotVerified {
        tally: OutcomeTally,
        diagnostics: Vec<Diagnostic>,
    },
}

pub struct InferencePipeline<'a, F: Frontend, E: InferenceEngine> {
    frontend: &'a F,
    engine: &'a mut E,
    options: PipelineOptions,
}

impl<'a, F: Frontend, E: InferenceEngine> InferencePipeline<'a, F, E> {
    pub fn new(frontend: &'a F, engine: &'a mut E, options: PipelineOptions) -> Self {
        InferencePipeline {
            frontend,
            engine,
            options,
        }
    }

    pub fn run(&mut self) -> Result<PipelineOutcome, PipelineError> {
        info!("phase A: invariant discovery");
        let mut program = self.frontend.parse()?;
        self.frontend.resolve(&program)?;
        passes::strip_check_calls(&mut program);
        passes::eliminate_dead_variables(&mut program);
        if self.options.do_mod_set_analysis {
            passes::do_mod_set_analysis(&mut program);
        }
        if self.options.coalesce_blocks {
            passes::coalesce_statements(&mut program);
        }
        if self.options.inline {
            passes::inline_calls(&mut program);
        }

        let outcome = self.engine.infer(&program)?;
        let tally = outcome.tally();
        if self.options.print_assignment {
            let resolved_true = outcome.assignment.values().filter(|v| **v).count();
            let resolved_false = outcome.assignment.len() - resolved_true;
            info!(resolved_true, resolved_false, "candidate assignment");
        }
        if !outcome.all_verified() {
            info!(%tally, "inference left implementations unverified");
            return Ok(PipelineOutcome::NotVerified {
                tally,
                diagnostics: outcome.sorted_diagnostics(),
            });
        }

        info!("phase B: race-check emission");
        let mut program = self.frontend.parse()?;
        self.frontend.resolve(&program)?;
        passes::eliminate_dead_variables(&mut program);
        if self.options.inline {
            passes::inline_calls(&mut program);
        }
        if let Some(unroll) = self.options.loop_unroll {
            passes::unroll_loops(&mut program, unroll.bound, unroll.sound);
            passes::fix_state_ids(&mut program);
        }
        passes::apply_assignment(&mut program, &outcome.assignment);
        self.frontend.emit(&program, self.options.output.as_deref())?;
        info!(%tally, "pipeline finished");
        Ok(PipelineOutcome::Verified { tally })
    }
}
