use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "kernrace",
    about = "Race instrumentation and invariant inference for GPU kernel programs",
    version
)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Instrument a kernel program with race logging, race checks, and
    /// candidate invariants
    Instrument {
        /// Path to the JSON program artifact
        input: PathBuf,

        /// Where to write the instrumented program (default: overwrite the
        /// input)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Disable benign-race tracking: report write/write and write/read
        /// conflicts even when the written values agree
        #[arg(long)]
        no_benign: bool,

        /// Emit access logging only, without race checks
        #[arg(long)]
        only_log: bool,
    },

    /// Run the two-phase inference pipeline over an instrumented program
    /// and emit the fully resolved result
    Crunch {
        /// Path to the instrumented JSON program artifact
        input: PathBuf,

        /// JSON file mapping candidate names to booleans, as recorded by
        /// the external pruning engine
        #[arg(long)]
        assignment: PathBuf,

        /// Where to write the resolved program (default: overwrite the
        /// input)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Unroll loops up to the given bound during emission
        #[arg(long)]
        loop_unroll: Option<usize>,

        /// Assert, rather than assume, that unrolled loops cannot iterate
        /// past the bound
        #[arg(long)]
        sound_loop_unrolling: bool,

        /// Recompute procedure modifies clauses before inference
        #[arg(long)]
        do_mod_set_analysis: bool,

        /// Splice conditionals with literal guards before inference
        #[arg(long)]
        coalesce_blocks: bool,

        /// Inline procedures marked inline
        #[arg(long)]
        inline: bool,

        /// Log how many candidates resolved to true and to false
        #[arg(long)]
        print_assignment: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn crunch_flags_parse() {
        let cli = Cli::parse_from([
            "kernrace",
            "crunch",
            "kernel.json",
            "--assignment",
            "assignment.json",
            "--loop-unroll",
            "2",
            "--sound-loop-unrolling",
            "--inline",
        ]);
        match cli.command {
            Commands::Crunch {
                input,
                assignment,
                loop_unroll,
                sound_loop_unrolling,
                inline,
                do_mod_set_analysis,
                ..
            } => {
                assert_eq!(input, PathBuf::from("kernel.json"));
                assert_eq!(assignment, PathBuf::from("assignment.json"));
                assert_eq!(loop_unroll, Some(2));
                assert!(sound_loop_unrolling);
                assert!(inline);
                assert!(!do_mod_set_analysis);
            }
            _ => panic!("expected crunch"),
        }
    }
}
