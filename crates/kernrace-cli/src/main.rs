//! The `kernrace` binary: `instrument` rewrites a kernel program with race
//! logging and checking plus candidate invariants; `crunch` replays an
//! inference assignment through the two-phase pipeline and emits the
//! resolved program.

mod cli;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

use kernrace_engine::inference::{InferenceError, RecordedAssignment};
use kernrace_engine::pipeline::{
    InferencePipeline, LoopUnroll, PipelineError, PipelineOptions, PipelineOutcome,
};
use kernrace_instrument::callsite::CallSiteAnalyser;
use kernrace_instrument::candidates::CandidateInvariantSynthesizer;
use kernrace_instrument::context::{InstrumentationOptions, RaceCheckContext};
use kernrace_instrument::shadow::{ShadowStateInstrumenter, StandardStrategy};
use kernrace_instrument::InstrumentationError;
use kernrace_ivl::frontend::{Frontend, FrontendError, JsonFrontend};

use crate::cli::{Cli, Commands};

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Frontend(#[from] FrontendError),
    #[error(transparent)]
    Instrumentation(#[from] InstrumentationError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match run(Cli::parse()) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode, CliError> {
    match cli.command {
        Commands::Instrument {
            input,
            out,
            no_benign,
            only_log,
        } => {
            instrument(input, out, no_benign, only_log)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Crunch {
            input,
            assignment,
            out,
            loop_unroll,
            sound_loop_unrolling,
            do_mod_set_analysis,
            coalesce_blocks,
            inline,
            print_assignment,
        } => {
            let options = PipelineOptions {
                do_mod_set_analysis,
                coalesce_blocks,
                inline,
                loop_unroll: loop_unroll.map(|bound| LoopUnroll {
                    bound,
                    sound: sound_loop_unrolling,
                }),
                print_assignment,
                output: out,
            };
            crunch(input, assignment, options)
        }
    }
}

fn instrument(
    input: PathBuf,
    out: Option<PathBuf>,
    no_benign: bool,
    only_log: bool,
) -> Result<(), CliError> {
    let frontend = JsonFrontend::new(input);
    let mut program = frontend.parse()?;
    frontend.resolve(&program)?;

    CallSiteAnalyser::analyse(&mut program);

    let mut context = RaceCheckContext::new(InstrumentationOptions {
        benign_tracking: !no_benign,
        log_only: only_log,
    });
    let strategy = StandardStrategy;
    ShadowStateInstrumenter::new(&strategy).instrument(&mut program, &mut context)?;
    CandidateInvariantSynthesizer::synthesize(&mut program, &mut context);

    frontend.emit(&program, out.as_deref())?;
    info!(path = %frontend.path().display(), "instrumented program written");
    Ok(())
}

fn crunch(
    input: PathBuf,
    assignment: PathBuf,
    options: PipelineOptions,
) -> Result<ExitCode, CliError> {
    let frontend = JsonFrontend::new(input);
    let mut engine = RecordedAssignment::from_file(&assignment)?;
    let outcome = InferencePipeline::new(&frontend, &mut engine, options).run()?;
    match outcome {
        PipelineOutcome::Verified { tally } => {
            println!("{tally}");
            Ok(ExitCode::SUCCESS)
        }
        PipelineOutcome::NotVerified { tally, diagnostics } => {
            for d in &diagnostics {
                eprintln!("{}: {}: {}", d.implementation, d.state_label, d.message);
            }
            println!("{tally}");
            Ok(ExitCode::from(
                u8::try_from(tally.exit_code()).unwrap_or(u8::MAX),
            ))
        }
    }
}
