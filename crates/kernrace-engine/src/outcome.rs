//! Per-implementation verification outcomes and their tally.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// What the external engine reported for one implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationOutcome {
    Verified,
    /// Failed assertions.
    Errors(usize),
    Inconclusive,
    TimedOut,
    OutOfMemory,
}

/// Counts of every outcome category. Categories are never dropped: a
/// timeout and an error both keep phase B from running and both reach the
/// exit status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeTally {
    pub verified: usize,
    pub errors: usize,
    pub inconclusive: usize,
    pub timed_out: usize,
    pub out_of_memory: usize,
}

impl OutcomeTally {
    pub fn record(&mut self, outcome: VerificationOutcome) {
        match outcome {
            VerificationOutcome::Verified => self.verified += 1,
            VerificationOutcome::Errors(n) => self.errors += n,
            VerificationOutcome::Inconclusive => self.inconclusive += 1,
            VerificationOutcome::TimedOut => self.timed_out += 1,
            VerificationOutcome::OutOfMemory => self.out_of_memory += 1,
        }
    }

    pub fn all_verified(&self) -> bool {
        self.errors == 0 && self.inconclusive == 0 && self.timed_out == 0
            && self.out_of_memory == 0
    }

    /// Process exit status: the number of not-verified results.
    pub fn exit_code(&self) -> i32 {
        (self.errors + self.inconclusive + self.timed_out + self.out_of_memory) as i32
    }
}

impl fmt::Display for OutcomeTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "finished with {} verified, {} errors, {} inconclusive, {} time outs, {} out of memory",
            self.verified, self.errors, self.inconclusive, self.timed_out, self.out_of_memory
        )
    }
}

/// One reported failure, tied to the capture-state label of the failing
/// check. The derived ordering (implementation, label, message) is the
/// stable report order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub implementation: String,
    pub state_label: String,
    pub message: String,
}

/// Candidate name to resolved boolean.
pub type Assignment = IndexMap<String, bool>;

/// Everything the external engine reports for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InferenceOutcome {
    pub assignment: Assignment,
    pub implementation_outcomes: IndexMap<String, VerificationOutcome>,
    pub diagnostics: Vec<Diagnostic>,
}

impl InferenceOutcome {
    pub fn tally(&self) -> OutcomeTally {
        let mut tally = OutcomeTally::default();
        for outcome in self.implementation_outcomes.values() {
            tally.record(*outcome);
        }
        tally
    }

    pub fn all_verified(&self) -> bool {
        self.tally().all_verified()
    }

    pub fn sorted_diagnostics(&self) -> Vec<Diagnostic> {
        let mut out = self.diagnostics.clone();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tally_counts_every_category() {
        let mut tally = OutcomeTally::default();
        tally.record(VerificationOutcome::Verified);
        tally.record(VerificationOutcome::Errors(2));
        tally.record(VerificationOutcome::TimedOut);
        tally.record(VerificationOutcome::OutOfMemory);
        tally.record(VerificationOutcome::Inconclusive);
        assert_eq!(tally.verified, 1);
        assert_eq!(tally.errors, 2);
        assert_eq!(tally.timed_out, 1);
        assert_eq!(tally.out_of_memory, 1);
        assert_eq!(tally.inconclusive, 1);
        assert!(!tally.all_verified());
        assert_eq!(tally.exit_code(), 5);
    }

    #[test]
    fn all_verified_requires_every_category_empty() {
        let mut tally = OutcomeTally::default();
        tally.record(VerificationOutcome::Verified);
        assert!(tally.all_verified());
        assert_eq!(tally.exit_code(), 0);
        tally.record(VerificationOutcome::TimedOut);
        assert!(!tally.all_verified());
    }

    #[test]
    fn diagnostics_sort_by_implementation_then_label_then_message() {
        let outcome = InferenceOutcome {
            diagnostics: vec![
                Diagnostic {
                    implementation: "k2".into(),
                    state_label: "check_state_0".into(),
                    message: "race on a".into(),
                },
                Diagnostic {
                    implementation: "k1".into(),
                    state_label: "check_state_1".into(),
                    message: "race on b".into(),
                },
                Diagnostic {
                    implementation: "k1".into(),
                    state_label: "check_state_0".into(),
                    message: "race on a".into(),
                },
            ],
            ..InferenceOutcome::default()
        };
        let sorted = outcome.sorted_diagnostics();
        assert_eq!(sorted[0].implementation, "k1");
        assert_eq!(sorted[0].state_label, "check_state_0");
        assert_eq!(sorted[1].state_label, "check_state_1");
        assert_eq!(sorted[2].implementation, "k2");
    }
}
